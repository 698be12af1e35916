//! 权限冲突检测与处理模块
//!
//! 当多个授权来源对同一资源给出不一致的结论时，记录一条冲突供管理员
//! 处理。冲突待处理期间解析器只采用兜底策略，绝不静默放大权限。
//!
//! `ConflictLedger` 是全 crate 唯一的共享可变状态，内部用 `Arc<RwLock>`
//! 保护，可在解析器之间克隆共享。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{ConflictError, Error, Result};

/// 冲突处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// 取最严格一侧（默认）
    MostRestrictive,
    /// 人工处理，处理前拒绝
    Manual,
    /// 管理员指定覆盖结果
    Override,
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        Self::MostRestrictive
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MostRestrictive => write!(f, "MOST_RESTRICTIVE"),
            Self::Manual => write!(f, "MANUAL"),
            Self::Override => write!(f, "OVERRIDE"),
        }
    }
}

/// 冲突状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    /// 待处理
    Pending,
    /// 已处理（终态）
    Resolved,
}

/// 权限冲突记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConflict {
    /// 冲突 id
    pub id: String,
    /// 受影响用户 id
    pub user_id: String,
    /// 冲突涉及的资源（权限编码或资源类型）
    pub resource: String,
    /// 来源一描述
    pub source1: String,
    /// 来源二描述
    pub source2: String,
    /// 冲突描述
    pub description: String,
    /// 处理策略
    pub resolution_strategy: ResolutionStrategy,
    /// 状态
    pub status: ConflictStatus,
    /// 检测时间
    pub detected_at: DateTime<Utc>,
    /// 处理时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// 处理人
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// 处理结果说明
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_result: Option<String>,
}

impl PermissionConflict {
    /// 检查是否待处理
    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }
}

// ============================================================================
// ConflictLedger
// ============================================================================

/// 冲突台账
///
/// 追加式记录、单写处理。克隆共享同一底层存储。
#[derive(Debug, Clone, Default)]
pub struct ConflictLedger {
    conflicts: Arc<RwLock<Vec<PermissionConflict>>>,
}

impl ConflictLedger {
    /// 创建空台账
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一条冲突，返回冲突 id
    ///
    /// 相同 (user, resource, 来源对) 的待处理冲突不重复记录，直接返回
    /// 已有记录的 id。来源对不区分顺序。
    pub fn record(
        &self,
        user_id: impl Into<String>,
        resource: impl Into<String>,
        source1: impl Into<String>,
        source2: impl Into<String>,
        description: impl Into<String>,
        resolution_strategy: ResolutionStrategy,
    ) -> String {
        let user_id = user_id.into();
        let resource = resource.into();
        let source1 = source1.into();
        let source2 = source2.into();

        let mut conflicts = match self.conflicts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = conflicts.iter().find(|c| {
            c.is_pending()
                && c.user_id == user_id
                && c.resource == resource
                && ((c.source1 == source1 && c.source2 == source2)
                    || (c.source1 == source2 && c.source2 == source1))
        }) {
            return existing.id.clone();
        }

        let conflict = PermissionConflict {
            id: Uuid::new_v4().to_string(),
            user_id,
            resource,
            source1,
            source2,
            description: description.into(),
            resolution_strategy,
            status: ConflictStatus::Pending,
            detected_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_result: None,
        };
        let id = conflict.id.clone();
        conflicts.push(conflict);
        id
    }

    /// 处理冲突
    ///
    /// Pending → Resolved，终态。重复处理返回
    /// [`ConflictError::AlreadyResolved`]。
    pub fn resolve(
        &self,
        id: &str,
        resolved_by: impl Into<String>,
        result: impl Into<String>,
    ) -> Result<()> {
        let mut conflicts = match self.conflicts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let conflict = conflicts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::from(ConflictError::NotFound(id.to_string())))?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(ConflictError::AlreadyResolved(id.to_string()).into());
        }
        conflict.status = ConflictStatus::Resolved;
        conflict.resolved_at = Some(Utc::now());
        conflict.resolved_by = Some(resolved_by.into());
        conflict.resolution_result = Some(result.into());
        Ok(())
    }

    /// 获取冲突记录
    pub fn get(&self, id: &str) -> Option<PermissionConflict> {
        let conflicts = match self.conflicts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        conflicts.iter().find(|c| c.id == id).cloned()
    }

    /// 所有待处理冲突
    pub fn pending(&self) -> Vec<PermissionConflict> {
        let conflicts = match self.conflicts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        conflicts.iter().filter(|c| c.is_pending()).cloned().collect()
    }

    /// 某用户的待处理冲突
    pub fn pending_for_user(&self, user_id: &str) -> Vec<PermissionConflict> {
        let conflicts = match self.conflicts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        conflicts
            .iter()
            .filter(|c| c.is_pending() && c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// 冲突总数（含已处理）
    pub fn len(&self) -> usize {
        match self.conflicts.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 检查台账是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
