//! 权限委托模块
//!
//! 提供带时间窗口的权限委托：一个用户（delegator）把自己的某个权限临时
//! 授予另一个用户（delegatee）。
//!
//! ## 正确性要求
//!
//! 读取时永远以时间窗口为准，不单独信任 `status` 字段——后台过期清扫
//! 可能滞后，`valid_to` 已过的记录即使仍标记为 Active 也必须排除。
//! 撤销是显式的不可逆状态迁移（Active → Revoked），携带撤销人与原因。
//!
//! ## 使用示例
//!
//! ```rust
//! use permrs::delegation::DelegationManager;
//! use chrono::{Duration, Utc};
//!
//! let mut manager = DelegationManager::new();
//! let now = Utc::now();
//!
//! let id = manager
//!     .delegate("manager", "alice", "perm_1", now, Some(now + Duration::days(7)), None)
//!     .unwrap();
//!
//! assert_eq!(manager.active_delegations("alice", now).len(), 1);
//! manager.revoke(&id, "admin", "coverage ended").unwrap();
//! assert!(manager.active_delegations("alice", now).is_empty());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{DelegationError, Result};

/// 委托状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationStatus {
    /// 生效中
    Active,
    /// 已撤销（不可逆）
    Revoked,
    /// 已过期（由清扫任务标记）
    Expired,
}

/// 权限委托记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDelegation {
    /// 委托记录 id
    pub id: String,
    /// 委托人
    pub delegator_id: String,
    /// 被委托人
    pub delegatee_id: String,
    /// 被委托的权限 id
    pub permission_id: String,
    /// 生效时间
    pub valid_from: DateTime<Utc>,
    /// 失效时间，None 表示无限期
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// 状态
    pub status: DelegationStatus,
    /// 委托原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 附加条件（不透明 JSON，由调用方解释）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Value>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 撤销时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// 撤销人
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    /// 撤销原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
}

impl PermissionDelegation {
    /// 检查委托在 `now` 时刻是否生效
    ///
    /// 同时检查状态和时间窗口：`valid_from <= now < valid_to`。
    /// 窗口已过但尚未被清扫标记的记录视为不生效。
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == DelegationStatus::Active
            && self.valid_from <= now
            && self.valid_to.map_or(true, |to| to > now)
    }

    /// 检查时间窗口是否已过（无论状态）
    pub fn is_past_window(&self, now: DateTime<Utc>) -> bool {
        self.valid_to.is_some_and(|to| to <= now)
    }
}

// ============================================================================
// DelegationManager
// ============================================================================

/// 权限委托管理器
///
/// 负责委托的创建、查询、撤销与过期清扫。
#[derive(Debug, Default)]
pub struct DelegationManager {
    delegations: HashMap<String, PermissionDelegation>,
}

impl DelegationManager {
    /// 创建新的委托管理器
    pub fn new() -> Self {
        Self {
            delegations: HashMap::new(),
        }
    }

    /// 创建权限委托
    ///
    /// 拒绝委托给自己和 `valid_from > valid_to` 的窗口。返回委托记录 id。
    pub fn delegate(
        &mut self,
        delegator_id: impl Into<String>,
        delegatee_id: impl Into<String>,
        permission_id: impl Into<String>,
        valid_from: DateTime<Utc>,
        valid_to: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<String> {
        let delegator_id = delegator_id.into();
        let delegatee_id = delegatee_id.into();

        if delegator_id == delegatee_id {
            return Err(DelegationError::SelfDelegation.into());
        }
        if let Some(to) = valid_to {
            if valid_from > to {
                return Err(DelegationError::InvalidWindow.into());
            }
        }

        let id = Uuid::new_v4().to_string();
        let delegation = PermissionDelegation {
            id: id.clone(),
            delegator_id,
            delegatee_id,
            permission_id: permission_id.into(),
            valid_from,
            valid_to,
            status: DelegationStatus::Active,
            reason,
            conditions: None,
            created_at: Utc::now(),
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
        };
        self.delegations.insert(id.clone(), delegation);
        Ok(id)
    }

    /// 为委托附加不透明条件 JSON
    pub fn set_conditions(&mut self, id: &str, conditions: serde_json::Value) -> Result<()> {
        let delegation = self
            .delegations
            .get_mut(id)
            .ok_or_else(|| DelegationError::NotFound(id.to_string()))?;
        delegation.conditions = Some(conditions);
        Ok(())
    }

    /// 获取委托记录
    pub fn get(&self, id: &str) -> Option<&PermissionDelegation> {
        self.delegations.get(id)
    }

    /// 被委托人在 `now` 时刻生效的委托权限
    ///
    /// 返回 `(permission_id, delegator_id)` 列表。状态与时间窗口同时检查，
    /// 不依赖清扫任务是否已运行。
    pub fn active_delegations(
        &self,
        delegatee_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        self.delegations
            .values()
            .filter(|d| d.delegatee_id == delegatee_id && d.is_active_at(now))
            .map(|d| (d.permission_id.clone(), d.delegator_id.clone()))
            .collect()
    }

    /// 用户委托出去的记录
    pub fn delegations_by(&self, delegator_id: &str) -> Vec<&PermissionDelegation> {
        self.delegations
            .values()
            .filter(|d| d.delegator_id == delegator_id)
            .collect()
    }

    /// 委托给用户的记录
    pub fn delegations_to(&self, delegatee_id: &str) -> Vec<&PermissionDelegation> {
        self.delegations
            .values()
            .filter(|d| d.delegatee_id == delegatee_id)
            .collect()
    }

    /// 撤销委托
    ///
    /// Active → Revoked，不可逆。撤销非 Active 状态的委托是错误。
    pub fn revoke(
        &mut self,
        id: &str,
        revoked_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<()> {
        let delegation = self
            .delegations
            .get_mut(id)
            .ok_or_else(|| DelegationError::NotFound(id.to_string()))?;
        if delegation.status != DelegationStatus::Active {
            return Err(DelegationError::NotActive(id.to_string()).into());
        }
        delegation.status = DelegationStatus::Revoked;
        delegation.revoked_at = Some(Utc::now());
        delegation.revoked_by = Some(revoked_by.into());
        delegation.revoke_reason = Some(reason.into());
        Ok(())
    }

    /// 过期清扫
    ///
    /// 把时间窗口已过且仍为 Active 的记录标记为 Expired，返回被标记
    /// 记录的 id 列表。读取路径以窗口检查为准，清扫任意时刻运行都是
    /// 安全的。
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for d in self.delegations.values_mut() {
            if d.status == DelegationStatus::Active && d.is_past_window(now) {
                d.status = DelegationStatus::Expired;
                d.revoked_at = Some(now);
                d.revoked_by = Some("SYSTEM".to_string());
                d.revoke_reason = Some("expired".to_string());
                expired.push(d.id.clone());
            }
        }
        expired
    }

    /// 撤销某用户的全部委托（委托出去的与委托进来的）
    ///
    /// 用于用户离职等场景，返回撤销条数。
    pub fn revoke_all_for_user(
        &mut self,
        user_id: &str,
        revoked_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> usize {
        let revoked_by = revoked_by.into();
        let reason = reason.into();
        let mut count = 0;
        for d in self.delegations.values_mut() {
            if d.status == DelegationStatus::Active
                && (d.delegator_id == user_id || d.delegatee_id == user_id)
            {
                d.status = DelegationStatus::Revoked;
                d.revoked_at = Some(Utc::now());
                d.revoked_by = Some(revoked_by.clone());
                d.revoke_reason = Some(reason.clone());
                count += 1;
            }
        }
        count
    }

    /// 获取委托总数
    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    /// 检查是否为空
    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }
}
