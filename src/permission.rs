//! 权限定义与展开模块
//!
//! 提供权限、权限集合（含通配符语义）、角色-权限授予以及把角色集合
//! 展开为具体权限集合的 [`PermissionExpander`]。
//!
//! ## 通配符语义
//!
//! 权限代码格式为 `resource:action`，查询 `资源:操作` 时按以下顺序匹配：
//!
//! 1. 精确匹配
//! 2. `resource:*`
//! 3. `*:action`
//! 4. `*:*`
//!
//! 命中任意一条即授权；全部不命中则拒绝（fail closed）。
//!
//! ## 使用示例
//!
//! ```rust
//! use permrs::permission::{Permission, PermissionSet};
//!
//! let mut set = PermissionSet::new();
//! set.add(Permission::resource_wildcard("orders"));
//!
//! assert!(set.allows("orders", "read"));
//! assert!(set.allows("orders", "delete"));
//! assert!(!set.allows("invoices", "read"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::delegation::DelegationManager;
use chrono::{DateTime, Utc};

/// 通配符常量，表示匹配所有
pub const WILDCARD: &str = "*";

/// 权限定义
///
/// 权限由资源和操作组成，稳定代码为 `resource:action`。
///
/// ## 特殊权限
///
/// - `*:*` - 匹配所有资源的所有操作（超级权限）
/// - `resource:*` - 匹配特定资源的所有操作
/// - `*:action` - 匹配所有资源的特定操作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// 资源标识符
    resource: String,
    /// 操作标识符
    action: String,
    /// 父权限 id，仅用于管理界面分组，授权逻辑从不使用
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    /// 可选的描述
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl Permission {
    /// 创建新的权限
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            parent_id: None,
            description: None,
        }
    }

    /// 创建通配符权限（匹配所有资源的所有操作）
    pub fn wildcard() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    /// 创建资源通配符权限（匹配特定资源的所有操作）
    pub fn resource_wildcard(resource: impl Into<String>) -> Self {
        Self::new(resource, WILDCARD)
    }

    /// 创建操作通配符权限（匹配所有资源的特定操作）
    pub fn action_wildcard(action: impl Into<String>) -> Self {
        Self::new(WILDCARD, action)
    }

    /// 从字符串解析权限
    ///
    /// 格式：`resource:action`
    ///
    /// # 示例
    ///
    /// ```rust
    /// use permrs::permission::Permission;
    ///
    /// let perm = Permission::parse("invoice:read").unwrap();
    /// assert_eq!(perm.resource(), "invoice");
    /// assert_eq!(perm.action(), "read");
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.splitn(2, ':').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }

    /// 设置父权限 id（管理界面分组用）
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// 设置描述
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 获取资源标识符
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// 获取操作标识符
    pub fn action(&self) -> &str {
        &self.action
    }

    /// 获取父权限 id
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// 获取描述
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// 获取稳定权限代码 `resource:action`
    pub fn code(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// 检查是否是完全通配符权限
    pub fn is_wildcard(&self) -> bool {
        self.resource == WILDCARD && self.action == WILDCARD
    }

    /// 检查是否是资源通配符权限
    pub fn is_resource_wildcard(&self) -> bool {
        self.action == WILDCARD && self.resource != WILDCARD
    }

    /// 检查是否是操作通配符权限
    pub fn is_action_wildcard(&self) -> bool {
        self.resource == WILDCARD && self.action != WILDCARD
    }

    /// 检查此权限是否匹配指定的资源和操作
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        let resource_matches = self.resource == WILDCARD || self.resource == resource;
        let action_matches = self.action == WILDCARD || self.action == action;
        resource_matches && action_matches
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.action == other.action
    }
}

impl Eq for Permission {}

impl Hash for Permission {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource.hash(state);
        self.action.hash(state);
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

// ============================================================================
// PermissionSet 类型
// ============================================================================

/// 权限集合
///
/// 管理一组权限并按固定顺序做通配符解析。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    permissions: HashSet<Permission>,
}

impl PermissionSet {
    /// 创建空的权限集合
    pub fn new() -> Self {
        Self {
            permissions: HashSet::new(),
        }
    }

    /// 添加权限
    pub fn add(&mut self, permission: Permission) -> bool {
        self.permissions.insert(permission)
    }

    /// 从权限代码添加，格式无效时返回 false
    pub fn add_code(&mut self, code: &str) -> bool {
        match Permission::parse(code) {
            Some(p) => self.add(p),
            None => false,
        }
    }

    /// 移除权限
    pub fn remove(&mut self, permission: &Permission) -> bool {
        self.permissions.remove(permission)
    }

    /// 按通配符解析顺序查找授权来源
    ///
    /// 顺序：精确匹配 → `resource:*` → `*:action` → `*:*`。
    /// 返回第一个命中的权限，全部未命中返回 None（拒绝）。
    pub fn match_for(&self, resource: &str, action: &str) -> Option<&Permission> {
        let candidates = [
            Permission::new(resource, action),
            Permission::resource_wildcard(resource),
            Permission::action_wildcard(action),
            Permission::wildcard(),
        ];
        candidates
            .iter()
            .find_map(|c| self.permissions.get(c))
    }

    /// 检查是否授权指定的资源和操作
    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.match_for(resource, action).is_some()
    }

    /// 获取权限数量
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// 检查是否为空
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// 获取所有权限的迭代器
    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    /// 合并另一个权限集合
    pub fn merge(&mut self, other: &PermissionSet) {
        for p in &other.permissions {
            self.permissions.insert(p.clone());
        }
    }

    /// 获取权限代码列表
    pub fn codes(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.code()).collect()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self {
            permissions: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = &'a Permission;
    type IntoIter = std::collections::hash_set::Iter<'a, Permission>;

    fn into_iter(self) -> Self::IntoIter {
        self.permissions.iter()
    }
}

// ============================================================================
// RolePermission
// ============================================================================

/// 角色-权限授予
///
/// 把一个权限授予一个角色，可附带条件。条件值是不透明的 JSON，
/// 由数据范围层的调用方解释，权限展开阶段从不求值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermission {
    /// 角色 id
    pub role_id: String,
    /// 授予的权限
    pub permission: Permission,
    /// 条件类型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
    /// 条件值（不透明 JSON）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_value: Option<serde_json::Value>,
}

impl RolePermission {
    /// 创建无条件的角色-权限授予
    pub fn new(role_id: impl Into<String>, permission: Permission) -> Self {
        Self {
            role_id: role_id.into(),
            permission,
            condition_type: None,
            condition_value: None,
        }
    }

    /// 附加条件
    pub fn with_condition(
        mut self,
        condition_type: impl Into<String>,
        condition_value: serde_json::Value,
    ) -> Self {
        self.condition_type = Some(condition_type.into());
        self.condition_value = Some(condition_value);
        self
    }
}

// ============================================================================
// PermissionCatalog
// ============================================================================

/// 权限目录
///
/// id → 权限定义的不可变映射，用于把委托记录里的权限 id 解析为权限代码。
/// 通过显式初始化例程构建，替代原系统的全局静态种子表。
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    by_id: HashMap<String, Permission>,
}

impl PermissionCatalog {
    /// 从 (id, 权限) 列表构建目录
    pub fn from_permissions<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Permission)>,
        S: Into<String>,
    {
        Self {
            by_id: entries
                .into_iter()
                .map(|(id, p)| (id.into(), p))
                .collect(),
        }
    }

    /// 根据 id 查找权限
    pub fn get(&self, id: &str) -> Option<&Permission> {
        self.by_id.get(id)
    }

    /// 获取目录大小
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// 检查目录是否为空
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ============================================================================
// PermissionExpander
// ============================================================================

/// 权限展开器
///
/// 把角色集合展开为具体权限集合，并可叠加在 `now` 时刻生效的委托权限。
/// 本展开器只回答「能否执行操作」，行级范围由数据范围解析器负责。
#[derive(Debug, Default)]
pub struct PermissionExpander {
    grants: HashMap<String, Vec<RolePermission>>,
}

impl PermissionExpander {
    /// 创建空的展开器
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    /// 添加角色-权限授予
    pub fn add_grant(&mut self, grant: RolePermission) {
        self.grants
            .entry(grant.role_id.clone())
            .or_default()
            .push(grant);
    }

    /// 授予角色一个权限（无条件的便捷方法）
    pub fn grant(&mut self, role_id: impl Into<String>, permission: Permission) {
        self.add_grant(RolePermission::new(role_id, permission));
    }

    /// 获取角色的直接授予列表
    pub fn grants_of(&self, role_id: &str) -> &[RolePermission] {
        self.grants.get(role_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 把角色集合展开为权限集合
    ///
    /// 未知角色不产生任何权限。结果是集合并集，幂等且与顺序无关。
    pub fn permissions_of<I, S>(&self, role_ids: I) -> PermissionSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = PermissionSet::new();
        for role_id in role_ids {
            if let Some(grants) = self.grants.get(role_id.as_ref()) {
                for g in grants {
                    out.add(g.permission.clone());
                }
            }
        }
        out
    }

    /// 角色权限加上 `now` 时刻生效的委托权限
    ///
    /// 委托是裸权限而不是角色：折叠进权限集合即止，不参与基于角色的
    /// 数据范围解析，避免把委托人的组织上下文带给被委托人。
    /// 目录中找不到的权限 id 不产生授权。
    pub fn effective_permissions<I, S>(
        &self,
        role_ids: I,
        delegations: &DelegationManager,
        catalog: &PermissionCatalog,
        delegatee_id: &str,
        now: DateTime<Utc>,
    ) -> PermissionSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = self.permissions_of(role_ids);
        for (permission_id, _delegator) in delegations.active_delegations(delegatee_id, now) {
            if let Some(p) = catalog.get(&permission_id) {
                out.add(p.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_permission_new_and_code() {
        let perm = Permission::new("invoice", "read");
        assert_eq!(perm.resource(), "invoice");
        assert_eq!(perm.action(), "read");
        assert_eq!(perm.code(), "invoice:read");
        assert_eq!(format!("{}", perm), "invoice:read");
    }

    #[test]
    fn test_permission_parse() {
        let perm = Permission::parse("users:delete").unwrap();
        assert_eq!(perm.resource(), "users");
        assert_eq!(perm.action(), "delete");

        assert!(Permission::parse("invalid").is_none());
        assert!(Permission::parse(":read").is_none());
        assert!(Permission::parse("users:").is_none());
    }

    #[test]
    fn test_permission_wildcards() {
        assert!(Permission::wildcard().is_wildcard());
        assert!(Permission::resource_wildcard("orders").is_resource_wildcard());
        assert!(Permission::action_wildcard("read").is_action_wildcard());

        assert!(Permission::wildcard().matches("anything", "everything"));
        assert!(Permission::resource_wildcard("orders").matches("orders", "delete"));
        assert!(!Permission::resource_wildcard("orders").matches("invoices", "read"));
    }

    #[test]
    fn test_parent_id_is_carried_but_not_compared() {
        let a = Permission::new("invoice", "read").with_parent("finance_menu");
        let b = Permission::new("invoice", "read");
        // parent_id 只做界面分组，不参与相等性
        assert_eq!(a, b);
        assert_eq!(a.parent_id(), Some("finance_menu"));
    }

    #[test]
    fn test_permission_set_match_order() {
        let mut set = PermissionSet::new();
        set.add(Permission::new("orders", "read"));
        set.add(Permission::resource_wildcard("orders"));

        // 精确匹配优先于 resource:*
        let matched = set.match_for("orders", "read").unwrap();
        assert_eq!(matched.code(), "orders:read");

        // 精确缺失时落到 resource:*
        let matched = set.match_for("orders", "delete").unwrap();
        assert_eq!(matched.code(), "orders:*");
    }

    #[test]
    fn test_permission_set_fail_closed() {
        let mut set = PermissionSet::new();
        set.add(Permission::resource_wildcard("orders"));

        assert!(set.allows("orders", "read"));
        assert!(set.allows("orders", "delete"));
        assert!(!set.allows("invoices", "read"));

        // 空集合拒绝一切
        let empty = PermissionSet::new();
        assert!(!empty.allows("orders", "read"));
    }

    #[test]
    fn test_permission_set_full_wildcard() {
        let mut set = PermissionSet::new();
        set.add(Permission::wildcard());
        assert!(set.allows("anything", "at_all"));
        assert_eq!(set.match_for("a", "b").unwrap().code(), "*:*");
    }

    #[test]
    fn test_expander_union() {
        let mut expander = PermissionExpander::new();
        expander.grant("viewer", Permission::new("posts", "read"));
        expander.grant("editor", Permission::new("posts", "write"));

        let perms = expander.permissions_of(["viewer", "editor"]);
        assert!(perms.allows("posts", "read"));
        assert!(perms.allows("posts", "write"));
        assert!(!perms.allows("posts", "delete"));

        // 空角色集合 → 空权限集合
        let perms = expander.permissions_of(Vec::<String>::new());
        assert!(perms.is_empty());

        // 未知角色不产生权限
        let perms = expander.permissions_of(["ghost"]);
        assert!(perms.is_empty());
    }

    #[test]
    fn test_expander_with_conditional_grant() {
        let mut expander = PermissionExpander::new();
        expander.add_grant(
            RolePermission::new("clerk", Permission::new("invoice", "read"))
                .with_condition("amount_limit", serde_json::json!({ "max": 10000 })),
        );

        // 条件不在展开阶段求值，权限正常计入
        let perms = expander.permissions_of(["clerk"]);
        assert!(perms.allows("invoice", "read"));
        assert_eq!(expander.grants_of("clerk").len(), 1);
        assert_eq!(
            expander.grants_of("clerk")[0].condition_type.as_deref(),
            Some("amount_limit")
        );
    }

    #[test]
    fn test_effective_permissions_folds_delegations() {
        let mut expander = PermissionExpander::new();
        expander.grant("viewer", Permission::new("posts", "read"));

        let catalog = PermissionCatalog::from_permissions([(
            "perm_invoice_approve",
            Permission::new("invoice", "approve"),
        )]);

        let mut delegations = DelegationManager::new();
        let now = Utc::now();
        delegations
            .delegate(
                "manager",
                "alice",
                "perm_invoice_approve",
                now - Duration::hours(1),
                Some(now + Duration::hours(1)),
                None,
            )
            .unwrap();

        let perms =
            expander.effective_permissions(["viewer"], &delegations, &catalog, "alice", now);
        assert!(perms.allows("posts", "read"));
        assert!(perms.allows("invoice", "approve"));

        // 其他用户不因该委托获得权限
        let perms = expander.effective_permissions(["viewer"], &delegations, &catalog, "bob", now);
        assert!(!perms.allows("invoice", "approve"));
    }
}
