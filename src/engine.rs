//! 访问决策引擎
//!
//! 把各解析器组装成一次完整的授权判定：
//!
//! 1. 用户状态检查（锁定、未知用户直接拒绝）
//! 2. 聚合四个来源得到有效角色
//! 3. 展开角色权限与委托权限，做通配符匹配
//! 4. 解析行级数据范围（含冲突处理）
//! 5. 产出胜出规则下的列级掩码决策
//! 6. 记录审计事件
//!
//! ## 使用示例
//!
//! ```rust
//! use permrs::engine::{AccessEngine, EngineConfig};
//! use permrs::grant::{User, UserRoleAssignment};
//! use permrs::permission::Permission;
//! use permrs::role::RoleBuilder;
//! use chrono::Utc;
//!
//! let mut engine = AccessEngine::new(EngineConfig::default());
//! engine.roles_mut().add_role(RoleBuilder::new("viewer").build());
//! engine.grants_mut().save_user(User::new("alice", "Alice"));
//! engine
//!     .grants_mut()
//!     .assign_role(UserRoleAssignment::new("alice", "viewer"));
//! engine
//!     .permissions_mut()
//!     .grant("viewer", Permission::new("posts", "read"));
//!
//! let decision = engine.authorize("alice", "posts", "read", Utc::now()).unwrap();
//! assert!(decision.allowed);
//! ```

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::audit::{AccessEvent, AuditLogger, NoOpAuditLogger};
use crate::conflict::{ConflictLedger, ResolutionStrategy};
use crate::delegation::DelegationManager;
use crate::error::{Error, HierarchyError, Result};
use crate::grant::{GrantAggregator, GrantStore, InMemoryGrantStore};
use crate::org::{NodeKind, OrgIndex};
use crate::permission::{PermissionCatalog, PermissionExpander};
use crate::role::RoleHierarchy;
use crate::scope::column::{ColumnDecision, ColumnMaskResolver};
use crate::scope::{DataScopeResolver, ScopeContext, ScopeDecision};

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 同优先级范围冲突的临时策略
    pub conflict_strategy: ResolutionStrategy,
    /// 是否拒绝锁定用户（默认 true）
    pub deny_locked_users: bool,
    /// 有效角色缓存的 TTL，None 表示不缓存
    pub role_cache_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_strategy: ResolutionStrategy::default(),
            deny_locked_users: true,
            role_cache_ttl: None,
        }
    }
}

/// 决策原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionReason {
    /// 授权通过
    Granted,
    /// 用户不存在
    UnknownUser,
    /// 用户处于锁定状态
    UserLocked,
    /// 没有匹配的权限
    NoMatchingPermission,
    /// 存在待人工处理的范围冲突
    ConflictPending,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::Granted => write!(f, "granted"),
            DecisionReason::UnknownUser => write!(f, "unknown user"),
            DecisionReason::UserLocked => write!(f, "user is locked"),
            DecisionReason::NoMatchingPermission => write!(f, "no matching permission"),
            DecisionReason::ConflictPending => {
                write!(f, "pending permission conflict requires manual resolution")
            }
        }
    }
}

/// 一次授权判定的完整结果
#[derive(Debug, Clone)]
pub struct AccessDecision {
    /// 是否允许
    pub allowed: bool,
    /// 行级数据范围结论（拒绝时为 None）
    pub scope: Option<ScopeDecision>,
    /// 列级掩码决策
    pub column_decisions: Vec<ColumnDecision>,
    /// 命中的权限编码
    pub matched_permission: Option<String>,
    /// 决策原因
    pub reason: DecisionReason,
}

impl AccessDecision {
    fn deny(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            scope: None,
            column_decisions: Vec::new(),
            matched_permission: None,
            reason,
        }
    }
}

// ============================================================================
// EffectiveRoleCache
// ============================================================================

/// 有效角色缓存
///
/// 按用户缓存聚合展开后的角色集合。条目超过截止时间后读取视为未命中，
/// 角色、授权、委托的任何管理端写入都应调用
/// [`invalidate_user`](Self::invalidate_user) 或 [`clear`](Self::clear)。
#[derive(Debug, Default)]
pub struct EffectiveRoleCache {
    entries: RwLock<HashMap<String, (HashSet<String>, DateTime<Utc>)>>,
}

impl EffectiveRoleCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取未过期的缓存条目
    pub fn get(&self, user_id: &str, now: DateTime<Utc>) -> Option<HashSet<String>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(user_id).and_then(|(roles, deadline)| {
            if *deadline > now {
                Some(roles.clone())
            } else {
                None
            }
        })
    }

    /// 写入缓存条目
    pub fn put(&self, user_id: &str, roles: HashSet<String>, deadline: DateTime<Utc>) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(user_id.to_string(), (roles, deadline));
    }

    /// 失效某用户的缓存
    pub fn invalidate_user(&self, user_id: &str) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(user_id);
    }

    /// 清空缓存
    pub fn clear(&self) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
    }
}

// ============================================================================
// AccessEngine
// ============================================================================

/// 访问决策引擎
///
/// 持有全部存储与解析器。管理端通过 `*_mut` 访问器写入，
/// 写入后按需调用 [`invalidate_user`](Self::invalidate_user)。
pub struct AccessEngine {
    config: EngineConfig,
    grants: InMemoryGrantStore,
    roles: RoleHierarchy,
    permissions: PermissionExpander,
    catalog: PermissionCatalog,
    delegations: DelegationManager,
    departments: OrgIndex,
    units: OrgIndex,
    scope_resolver: DataScopeResolver,
    column_resolver: ColumnMaskResolver,
    ledger: ConflictLedger,
    audit: Arc<dyn AuditLogger>,
    cache: EffectiveRoleCache,
}

impl AccessEngine {
    /// 创建引擎，默认不记审计（NoOp）
    pub fn new(config: EngineConfig) -> Self {
        Self::with_audit(config, Arc::new(NoOpAuditLogger::new()))
    }

    /// 创建引擎并注入审计日志器
    pub fn with_audit(config: EngineConfig, audit: Arc<dyn AuditLogger>) -> Self {
        let ledger = ConflictLedger::new();
        let scope_resolver =
            DataScopeResolver::new(ledger.clone()).with_strategy(config.conflict_strategy);
        Self {
            config,
            grants: InMemoryGrantStore::new(),
            roles: RoleHierarchy::new(),
            permissions: PermissionExpander::new(),
            catalog: PermissionCatalog::default(),
            delegations: DelegationManager::new(),
            departments: OrgIndex::new(NodeKind::Department),
            units: OrgIndex::new(NodeKind::BusinessUnit),
            scope_resolver,
            column_resolver: ColumnMaskResolver::new(),
            ledger,
            audit,
            cache: EffectiveRoleCache::new(),
        }
    }

    // ==== 访问器 ====

    /// 授权记录存储
    pub fn grants(&self) -> &InMemoryGrantStore {
        &self.grants
    }

    /// 可变授权记录存储
    pub fn grants_mut(&mut self) -> &mut InMemoryGrantStore {
        &mut self.grants
    }

    /// 角色层级
    pub fn roles(&self) -> &RoleHierarchy {
        &self.roles
    }

    /// 可变角色层级
    pub fn roles_mut(&mut self) -> &mut RoleHierarchy {
        &mut self.roles
    }

    /// 角色权限授权表
    pub fn permissions(&self) -> &PermissionExpander {
        &self.permissions
    }

    /// 可变角色权限授权表
    pub fn permissions_mut(&mut self) -> &mut PermissionExpander {
        &mut self.permissions
    }

    /// 权限目录（委托展开时查询）
    pub fn set_catalog(&mut self, catalog: PermissionCatalog) {
        self.catalog = catalog;
    }

    /// 委托管理器
    pub fn delegations(&self) -> &DelegationManager {
        &self.delegations
    }

    /// 可变委托管理器
    pub fn delegations_mut(&mut self) -> &mut DelegationManager {
        &mut self.delegations
    }

    /// 部门层级索引
    pub fn departments(&self) -> &OrgIndex {
        &self.departments
    }

    /// 可变部门层级索引
    pub fn departments_mut(&mut self) -> &mut OrgIndex {
        &mut self.departments
    }

    /// 业务单元层级索引
    pub fn units(&self) -> &OrgIndex {
        &self.units
    }

    /// 可变业务单元层级索引
    pub fn units_mut(&mut self) -> &mut OrgIndex {
        &mut self.units
    }

    /// 数据范围解析器
    pub fn scope_resolver(&self) -> &DataScopeResolver {
        &self.scope_resolver
    }

    /// 可变数据范围解析器
    pub fn scope_resolver_mut(&mut self) -> &mut DataScopeResolver {
        &mut self.scope_resolver
    }

    /// 列掩码解析器
    pub fn column_resolver(&self) -> &ColumnMaskResolver {
        &self.column_resolver
    }

    /// 可变列掩码解析器
    pub fn column_resolver_mut(&mut self) -> &mut ColumnMaskResolver {
        &mut self.column_resolver
    }

    /// 冲突台账
    pub fn conflicts(&self) -> &ConflictLedger {
        &self.ledger
    }

    /// 失效某用户的角色缓存
    ///
    /// 角色、授权、成员关系、委托的任何写入之后必须调用。
    pub fn invalidate_user(&self, user_id: &str) {
        self.cache.invalidate_user(user_id);
    }

    /// 清空角色缓存
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ==== 管理操作（带审计） ====

    /// 创建权限委托并记录审计事件
    pub fn delegate(
        &mut self,
        delegator_id: &str,
        delegatee_id: &str,
        permission_id: &str,
        valid_from: DateTime<Utc>,
        valid_to: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<String> {
        let id = self.delegations.delegate(
            delegator_id,
            delegatee_id,
            permission_id,
            valid_from,
            valid_to,
            reason,
        )?;
        self.audit.log(
            AccessEvent::delegation_created(delegator_id, delegatee_id, permission_id)
                .with_detail("delegation_id", id.as_str()),
        );
        self.cache.invalidate_user(delegatee_id);
        Ok(id)
    }

    /// 撤销委托并记录审计事件
    pub fn revoke_delegation(&mut self, id: &str, revoked_by: &str, reason: &str) -> Result<()> {
        self.delegations.revoke(id, revoked_by, reason)?;
        self.audit
            .log(AccessEvent::delegation_revoked(id, revoked_by));
        if let Some(d) = self.delegations.get(id) {
            self.cache.invalidate_user(&d.delegatee_id);
        }
        Ok(())
    }

    /// 清扫过期委托，逐条记录审计事件，返回处理条数
    pub fn sweep_expired_delegations(&mut self, now: DateTime<Utc>) -> usize {
        let expired = self.delegations.sweep_expired(now);
        for id in &expired {
            self.audit.log(AccessEvent::delegation_expired(id.as_str()));
        }
        expired.len()
    }

    /// 处理待定冲突并记录审计事件
    pub fn resolve_conflict(&mut self, id: &str, resolved_by: &str, result: &str) -> Result<()> {
        self.ledger.resolve(id, resolved_by, result)?;
        self.audit
            .log(AccessEvent::conflict_resolved(id, resolved_by));
        Ok(())
    }

    // ==== 授权判定 ====

    /// 用户在 `now` 时刻的有效角色（经缓存）
    pub fn effective_roles(&self, user_id: &str, now: DateTime<Utc>) -> Result<HashSet<String>> {
        if self.config.role_cache_ttl.is_some() {
            if let Some(roles) = self.cache.get(user_id, now) {
                return Ok(roles);
            }
        }

        let aggregator = GrantAggregator::new(&self.grants);
        let roles = aggregator
            .effective_roles(user_id, &self.roles, now)
            .map_err(|e| {
                if let Error::Hierarchy(HierarchyError::RoleCycle { role_id }) = &e {
                    self.audit
                        .log(AccessEvent::role_cycle_detected(role_id.clone()));
                }
                e
            })?;

        if let Some(ttl) = self.config.role_cache_ttl {
            self.cache.put(user_id, roles.clone(), now + ttl);
        }
        Ok(roles)
    }

    /// 完整的授权判定
    ///
    /// 返回 `Err` 仅在数据完整性错误（如角色循环）时；业务上的拒绝
    /// 通过 `allowed == false` 和 [`DecisionReason`] 表达。
    pub fn authorize(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision> {
        // 1. 用户状态
        let Some(user) = self.grants.user(user_id) else {
            return Ok(self.deny(user_id, resource, action, DecisionReason::UnknownUser));
        };
        if self.config.deny_locked_users && user.is_locked(now) {
            return Ok(self.deny(user_id, resource, action, DecisionReason::UserLocked));
        }

        // 2. 有效角色
        let roles = self.effective_roles(user_id, now)?;

        // 3. 有效权限 + 通配符匹配
        let permissions = self.permissions.effective_permissions(
            roles.iter(),
            &self.delegations,
            &self.catalog,
            user_id,
            now,
        );
        let Some(matched) = permissions.match_for(resource, action) else {
            return Ok(self.deny(user_id, resource, action, DecisionReason::NoMatchingPermission));
        };
        let matched_code = matched.code();

        // 4. 行级数据范围
        let mut ctx = ScopeContext::new(user_id).with_roles(roles.iter().map(String::as_str));
        if let Some(dept) = &user.department_id {
            ctx = ctx.with_department(dept.clone(), self.departments.ancestors_of(dept));
        }
        let mut unit_ids: HashSet<String> = HashSet::new();
        for unit in self.grants.units_of(user_id) {
            unit_ids.extend(self.units.ancestors_of(unit));
            unit_ids.insert(unit.to_string());
        }
        if !unit_ids.is_empty() {
            ctx = ctx.with_units(unit_ids);
        }
        let resolution = self.scope_resolver.resolve(&ctx, resource);

        if let Some(conflict_id) = &resolution.conflict {
            self.audit
                .log(AccessEvent::conflict_detected(user_id, resource, conflict_id));
        }
        let Some(scope) = resolution.decision else {
            return Ok(self.deny(user_id, resource, action, DecisionReason::ConflictPending));
        };

        // 5. 列级决策（仅当范围由具体规则给出）
        let column_decisions = match &scope.rule_id {
            Some(rule_id) => {
                let columns: Vec<String> = self
                    .column_resolver
                    .permissions_of(rule_id)
                    .iter()
                    .map(|p| p.column_name.clone())
                    .collect();
                self.column_resolver.resolve(rule_id, columns)
            }
            None => Vec::new(),
        };

        // 6. 审计
        self.audit.log(
            AccessEvent::granted(user_id, resource, action)
                .with_detail("permission", &matched_code)
                .with_detail("scope", scope.scope.to_string()),
        );

        Ok(AccessDecision {
            allowed: true,
            scope: Some(scope),
            column_decisions,
            matched_permission: Some(matched_code),
            reason: DecisionReason::Granted,
        })
    }

    fn deny(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        reason: DecisionReason,
    ) -> AccessDecision {
        self.audit.log(AccessEvent::denied(
            user_id,
            resource,
            action,
            reason.to_string(),
        ));
        AccessDecision::deny(reason)
    }
}
