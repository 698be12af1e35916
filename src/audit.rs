//! 审计日志模块
//!
//! 提供访问决策事件的记录和审计功能，包括：
//!
//! - **访问事件枚举**: 定义授权、拒绝、冲突、委托等事件
//! - **审计日志 Trait**: 定义日志记录接口
//! - **内存实现**: 用于测试和开发的简单实现
//!
//! ## 使用示例
//!
//! ### 基本用法
//!
//! ```rust
//! use permrs::audit::{AuditLogger, AccessEvent, InMemoryAuditLogger};
//!
//! // 创建内存审计日志器
//! let logger = InMemoryAuditLogger::new();
//!
//! // 记录授权通过事件
//! logger.log(AccessEvent::granted("alice", "invoice", "read"));
//!
//! // 记录拒绝事件
//! logger.log(AccessEvent::denied("bob", "invoice", "delete", "no matching permission"));
//!
//! // 获取所有事件
//! let events = logger.get_events();
//! assert_eq!(events.len(), 2);
//! ```
//!
//! ### 自定义事件
//!
//! ```rust
//! use permrs::audit::{AccessEvent, EventSeverity};
//!
//! let event = AccessEvent::custom("rule_table_reloaded", EventSeverity::Info)
//!     .with_detail("rule_count", "42")
//!     .with_detail("source", "admin console");
//! ```
//!
//! ### 过滤和查询
//!
//! ```rust
//! use permrs::audit::{AuditLogger, AccessEvent, InMemoryAuditLogger, EventSeverity};
//!
//! let logger = InMemoryAuditLogger::new();
//!
//! logger.log(AccessEvent::granted("alice", "invoice", "read"));
//! logger.log(AccessEvent::denied("bob", "invoice", "delete", "locked"));
//!
//! // 按用户过滤
//! let alice_events = logger.get_events_by_user("alice");
//! assert_eq!(alice_events.len(), 1);
//!
//! // 按严重程度过滤
//! let warnings = logger.get_events_by_severity(EventSeverity::Warning);
//! assert_eq!(warnings.len(), 1);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// 事件严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventSeverity {
    /// 调试信息
    Debug,
    /// 一般信息
    #[default]
    Info,
    /// 警告
    Warning,
    /// 错误
    Error,
    /// 严重/危险
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Debug => write!(f, "DEBUG"),
            EventSeverity::Info => write!(f, "INFO"),
            EventSeverity::Warning => write!(f, "WARNING"),
            EventSeverity::Error => write!(f, "ERROR"),
            EventSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// 访问事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// 授权通过
    AccessGranted,
    /// 授权拒绝
    AccessDenied,
    /// 检测到权限冲突
    ConflictDetected,
    /// 权限冲突已处理
    ConflictResolved,
    /// 委托创建
    DelegationCreated,
    /// 委托撤销
    DelegationRevoked,
    /// 委托过期
    DelegationExpired,
    /// 角色继承链中检测到循环
    RoleCycleDetected,
    /// 自定义事件
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::AccessGranted => write!(f, "access_granted"),
            EventType::AccessDenied => write!(f, "access_denied"),
            EventType::ConflictDetected => write!(f, "conflict_detected"),
            EventType::ConflictResolved => write!(f, "conflict_resolved"),
            EventType::DelegationCreated => write!(f, "delegation_created"),
            EventType::DelegationRevoked => write!(f, "delegation_revoked"),
            EventType::DelegationExpired => write!(f, "delegation_expired"),
            EventType::RoleCycleDetected => write!(f, "role_cycle_detected"),
            EventType::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// 访问事件
///
/// 表示一次授权决策或权限管理动作的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    /// 事件 ID
    pub id: String,
    /// 事件类型
    pub event_type: EventType,
    /// 严重程度
    pub severity: EventSeverity,
    /// 用户 ID（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// 资源（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// 操作（如果适用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// 决策结果，非决策类事件为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,
    /// 事件消息/描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 额外详情
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
    /// 事件时间
    pub timestamp: DateTime<Utc>,
}

impl AccessEvent {
    /// 创建新的访问事件
    pub fn new(event_type: EventType, severity: EventSeverity) -> Self {
        Self {
            id: generate_event_id(),
            event_type,
            severity,
            user_id: None,
            resource: None,
            action: None,
            allowed: None,
            message: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// 创建自定义事件
    pub fn custom(name: impl Into<String>, severity: EventSeverity) -> Self {
        Self::new(EventType::Custom(name.into()), severity)
    }

    // ========================================================================
    // 便捷构造方法
    // ========================================================================

    /// 创建授权通过事件
    pub fn granted(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::new(EventType::AccessGranted, EventSeverity::Info)
            .with_user_id(user_id)
            .with_resource(resource)
            .with_action(action)
            .with_allowed(true)
            .with_message("Access granted")
    }

    /// 创建授权拒绝事件
    pub fn denied(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(EventType::AccessDenied, EventSeverity::Warning)
            .with_user_id(user_id)
            .with_resource(resource)
            .with_action(action)
            .with_allowed(false)
            .with_message(reason)
    }

    /// 创建冲突检测事件
    pub fn conflict_detected(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        conflict_id: impl Into<String>,
    ) -> Self {
        Self::new(EventType::ConflictDetected, EventSeverity::Warning)
            .with_user_id(user_id)
            .with_resource(resource)
            .with_detail("conflict_id", conflict_id.into())
            .with_message("Permission conflict detected")
    }

    /// 创建冲突处理事件
    pub fn conflict_resolved(
        conflict_id: impl Into<String>,
        resolved_by: impl Into<String>,
    ) -> Self {
        Self::new(EventType::ConflictResolved, EventSeverity::Info)
            .with_detail("conflict_id", conflict_id.into())
            .with_detail("resolved_by", resolved_by.into())
            .with_message("Permission conflict resolved")
    }

    /// 创建委托创建事件
    pub fn delegation_created(
        delegator_id: impl Into<String>,
        delegatee_id: impl Into<String>,
        permission_id: impl Into<String>,
    ) -> Self {
        Self::new(EventType::DelegationCreated, EventSeverity::Info)
            .with_user_id(delegatee_id)
            .with_detail("delegator_id", delegator_id.into())
            .with_detail("permission_id", permission_id.into())
            .with_message("Permission delegation created")
    }

    /// 创建委托撤销事件
    pub fn delegation_revoked(
        delegation_id: impl Into<String>,
        revoked_by: impl Into<String>,
    ) -> Self {
        Self::new(EventType::DelegationRevoked, EventSeverity::Info)
            .with_detail("delegation_id", delegation_id.into())
            .with_detail("revoked_by", revoked_by.into())
            .with_message("Permission delegation revoked")
    }

    /// 创建委托过期事件
    pub fn delegation_expired(delegation_id: impl Into<String>) -> Self {
        Self::new(EventType::DelegationExpired, EventSeverity::Info)
            .with_detail("delegation_id", delegation_id.into())
            .with_message("Permission delegation expired")
    }

    /// 创建角色循环检测事件
    ///
    /// 循环意味着管理端数据被破坏，按 Critical 记录。
    pub fn role_cycle_detected(role_id: impl Into<String>) -> Self {
        Self::new(EventType::RoleCycleDetected, EventSeverity::Critical)
            .with_detail("role_id", role_id.into())
            .with_message("Role hierarchy cycle detected")
    }

    // ========================================================================
    // Builder 方法
    // ========================================================================

    /// 设置用户 ID
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 设置资源
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// 设置操作
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// 设置决策结果
    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// 设置消息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 添加详情
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// 设置严重程度
    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    // ========================================================================
    // 查询方法
    // ========================================================================

    /// 获取事件类型名称
    pub fn event_name(&self) -> String {
        self.event_type.to_string()
    }

    /// 检查是否是高严重程度事件
    pub fn is_high_severity(&self) -> bool {
        matches!(
            self.severity,
            EventSeverity::Error | EventSeverity::Critical
        )
    }

    /// 检查是否是授权决策事件
    pub fn is_decision_event(&self) -> bool {
        matches!(
            self.event_type,
            EventType::AccessGranted | EventType::AccessDenied
        )
    }
}

/// 生成事件 ID
fn generate_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

// ============================================================================
// AuditLogger Trait
// ============================================================================

/// 审计日志记录器 trait
///
/// 定义审计日志的记录接口
pub trait AuditLogger: Send + Sync {
    /// 记录访问事件
    fn log(&self, event: AccessEvent);

    /// 批量记录事件
    fn log_batch(&self, events: Vec<AccessEvent>) {
        for event in events {
            self.log(event);
        }
    }
}

// ============================================================================
// InMemoryAuditLogger
// ============================================================================

/// 内存审计日志记录器
///
/// 用于测试和开发环境，将事件存储在内存中
#[derive(Debug, Default)]
pub struct InMemoryAuditLogger {
    events: Arc<RwLock<Vec<AccessEvent>>>,
    max_events: Option<usize>,
}

impl InMemoryAuditLogger {
    /// 创建新的内存日志记录器
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events: None,
        }
    }

    /// 创建带有最大事件数限制的日志记录器
    pub fn with_max_events(max: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events: Some(max),
        }
    }

    fn read_events(&self) -> std::sync::RwLockReadGuard<'_, Vec<AccessEvent>> {
        match self.events.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 获取所有事件
    pub fn get_events(&self) -> Vec<AccessEvent> {
        self.read_events().clone()
    }

    /// 获取事件数量
    pub fn event_count(&self) -> usize {
        self.read_events().len()
    }

    /// 按用户 ID 获取事件
    pub fn get_events_by_user(&self, user_id: &str) -> Vec<AccessEvent> {
        self.read_events()
            .iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// 按事件类型获取事件
    pub fn get_events_by_type(&self, event_type: &EventType) -> Vec<AccessEvent> {
        self.read_events()
            .iter()
            .filter(|e| &e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// 按严重程度获取事件
    pub fn get_events_by_severity(&self, severity: EventSeverity) -> Vec<AccessEvent> {
        self.read_events()
            .iter()
            .filter(|e| e.severity == severity)
            .cloned()
            .collect()
    }

    /// 获取时间范围内的事件
    pub fn get_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AccessEvent> {
        self.read_events()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    /// 获取最近 N 个事件
    pub fn get_recent_events(&self, count: usize) -> Vec<AccessEvent> {
        self.read_events().iter().rev().take(count).cloned().collect()
    }

    /// 清空所有事件
    pub fn clear(&self) {
        match self.events.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// 获取高严重程度事件
    pub fn get_high_severity_events(&self) -> Vec<AccessEvent> {
        self.read_events()
            .iter()
            .filter(|e| e.is_high_severity())
            .cloned()
            .collect()
    }

    /// 获取统计信息
    pub fn get_stats(&self) -> AuditStats {
        let events = self.read_events();
        let mut stats = AuditStats {
            total_events: events.len(),
            ..Default::default()
        };

        for event in events.iter() {
            match event.severity {
                EventSeverity::Debug => stats.debug_count += 1,
                EventSeverity::Info => stats.info_count += 1,
                EventSeverity::Warning => stats.warning_count += 1,
                EventSeverity::Error => stats.error_count += 1,
                EventSeverity::Critical => stats.critical_count += 1,
            }

            *stats.events_by_type.entry(event.event_name()).or_insert(0) += 1;
        }

        stats
    }
}

impl AuditLogger for InMemoryAuditLogger {
    fn log(&self, event: AccessEvent) {
        let mut events = match self.events.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // 如果设置了最大事件数，删除最旧的事件
        if let Some(max) = self.max_events {
            while events.len() >= max {
                events.remove(0);
            }
        }

        events.push(event);
    }
}

impl Clone for InMemoryAuditLogger {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            max_events: self.max_events,
        }
    }
}

/// 审计统计信息
#[derive(Debug, Default, Clone)]
pub struct AuditStats {
    /// 总事件数
    pub total_events: usize,
    /// Debug 级别事件数
    pub debug_count: usize,
    /// Info 级别事件数
    pub info_count: usize,
    /// Warning 级别事件数
    pub warning_count: usize,
    /// Error 级别事件数
    pub error_count: usize,
    /// Critical 级别事件数
    pub critical_count: usize,
    /// 按类型统计
    pub events_by_type: HashMap<String, usize>,
}

// ============================================================================
// NoOpAuditLogger
// ============================================================================

/// 空操作日志记录器
///
/// 不执行任何操作，用于禁用审计日志
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAuditLogger;

impl NoOpAuditLogger {
    /// 创建新的空操作日志记录器
    pub fn new() -> Self {
        Self
    }
}

impl AuditLogger for NoOpAuditLogger {
    fn log(&self, _event: AccessEvent) {
        // 不执行任何操作
    }
}

// ============================================================================
// 测试
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_event_creation() {
        let event = AccessEvent::granted("alice", "invoice", "read");

        assert_eq!(event.event_type, EventType::AccessGranted);
        assert_eq!(event.severity, EventSeverity::Info);
        assert_eq!(event.user_id.as_deref(), Some("alice"));
        assert_eq!(event.resource.as_deref(), Some("invoice"));
        assert_eq!(event.action.as_deref(), Some("read"));
        assert_eq!(event.allowed, Some(true));
        assert!(event.id.starts_with("evt_"));
    }

    #[test]
    fn test_access_event_builder() {
        let event = AccessEvent::custom("rule_table_reloaded", EventSeverity::Warning)
            .with_user_id("admin")
            .with_detail("rule_count", "42")
            .with_detail("source", "console");

        assert_eq!(event.user_id.as_deref(), Some("admin"));
        assert_eq!(event.details.get("rule_count"), Some(&"42".to_string()));
        assert_eq!(event.details.get("source"), Some(&"console".to_string()));
        assert!(event.allowed.is_none());
    }

    #[test]
    fn test_in_memory_logger() {
        let logger = InMemoryAuditLogger::new();

        logger.log(AccessEvent::granted("alice", "invoice", "read"));
        logger.log(AccessEvent::denied("bob", "invoice", "delete", "locked"));
        logger.log(AccessEvent::delegation_created("manager", "alice", "p1"));

        assert_eq!(logger.event_count(), 3);
        assert_eq!(logger.get_events().len(), 3);
    }

    #[test]
    fn test_filter_by_user() {
        let logger = InMemoryAuditLogger::new();

        logger.log(AccessEvent::granted("alice", "invoice", "read"));
        logger.log(AccessEvent::denied("bob", "invoice", "delete", "locked"));
        logger.log(AccessEvent::granted("alice", "order", "read"));

        assert_eq!(logger.get_events_by_user("alice").len(), 2);
        assert_eq!(logger.get_events_by_user("bob").len(), 1);
    }

    #[test]
    fn test_filter_by_type_and_severity() {
        let logger = InMemoryAuditLogger::new();

        logger.log(AccessEvent::granted("alice", "invoice", "read"));
        logger.log(AccessEvent::denied("bob", "invoice", "delete", "locked"));
        logger.log(AccessEvent::role_cycle_detected("role_a"));

        assert_eq!(
            logger.get_events_by_type(&EventType::AccessGranted).len(),
            1
        );
        assert_eq!(
            logger.get_events_by_severity(EventSeverity::Warning).len(),
            1
        );
        assert_eq!(logger.get_high_severity_events().len(), 1);
    }

    #[test]
    fn test_max_events_limit() {
        let logger = InMemoryAuditLogger::with_max_events(3);

        logger.log(AccessEvent::granted("user1", "doc", "read"));
        logger.log(AccessEvent::granted("user2", "doc", "read"));
        logger.log(AccessEvent::granted("user3", "doc", "read"));
        logger.log(AccessEvent::granted("user4", "doc", "read"));

        assert_eq!(logger.event_count(), 3);

        // 最旧的事件（user1）应该被删除
        let events = logger.get_events();
        assert!(events.iter().all(|e| e.user_id.as_deref() != Some("user1")));
    }

    #[test]
    fn test_clear_events() {
        let logger = InMemoryAuditLogger::new();

        logger.log(AccessEvent::granted("alice", "invoice", "read"));
        assert_eq!(logger.event_count(), 1);

        logger.clear();
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_get_stats() {
        let logger = InMemoryAuditLogger::new();

        logger.log(AccessEvent::granted("alice", "invoice", "read"));
        logger.log(AccessEvent::denied("bob", "invoice", "delete", "locked"));
        logger.log(AccessEvent::role_cycle_detected("role_a"));

        let stats = logger.get_stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.info_count, 1);
        assert_eq!(stats.warning_count, 1);
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.events_by_type.get("access_granted"), Some(&1));
    }

    #[test]
    fn test_is_decision_event() {
        assert!(AccessEvent::granted("a", "r", "x").is_decision_event());
        assert!(AccessEvent::denied("a", "r", "x", "why").is_decision_event());
        assert!(!AccessEvent::delegation_expired("d1").is_decision_event());
    }

    #[test]
    fn test_event_serialization() {
        let event = AccessEvent::denied("bob", "invoice", "delete", "locked")
            .with_detail("department", "finance");

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AccessEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.user_id, event.user_id);
        assert_eq!(deserialized.allowed, Some(false));
        assert_eq!(
            deserialized.details.get("department"),
            Some(&"finance".to_string())
        );
    }

    #[test]
    fn test_noop_logger() {
        let logger = NoOpAuditLogger::new();

        // 这不应该做任何事情，只是确保不会 panic
        logger.log(AccessEvent::granted("alice", "invoice", "read"));
    }

    #[test]
    fn test_batch_logging() {
        let logger = InMemoryAuditLogger::new();

        logger.log_batch(vec![
            AccessEvent::granted("user1", "doc", "read"),
            AccessEvent::granted("user2", "doc", "read"),
        ]);

        assert_eq!(logger.event_count(), 2);
    }

    #[test]
    fn test_clone_logger_shares_state() {
        let logger1 = InMemoryAuditLogger::new();
        let logger2 = logger1.clone();

        logger1.log(AccessEvent::granted("alice", "invoice", "read"));

        // 两个 logger 应该共享状态
        assert_eq!(logger2.event_count(), 1);
    }
}
