//! 角色层级模块
//!
//! 提供角色的定义、存储与继承展开。角色最多只有一个父角色
//! （`parent_role_id`），整体构成森林而不是 DAG。
//!
//! ## 循环检测
//!
//! 父链必须无环。展开时维护访问集合，一旦重复访问同一角色立即以
//! [`HierarchyError::RoleCycle`](crate::error::HierarchyError) 失败——这说明
//! 管理端写入破坏了数据完整性，必须暴露而不是静默截断。写入侧的
//! [`RoleHierarchy::set_parent`] 是第一道防线，展开时的检测只是兜底。
//!
//! ## 使用示例
//!
//! ```rust
//! use permrs::role::{RoleBuilder, RoleHierarchy};
//!
//! let mut hierarchy = RoleHierarchy::new();
//! hierarchy.add_role(RoleBuilder::new("viewer").build());
//! hierarchy.add_role(RoleBuilder::new("editor").parent("viewer").build());
//!
//! let expanded = hierarchy.expand("editor").unwrap();
//! assert!(expanded.contains("editor"));
//! assert!(expanded.contains("viewer"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{HierarchyError, Result};

/// 角色定义
///
/// 角色是一组权限的载体，可选地继承一个父角色的权限。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// 角色唯一标识符
    pub id: String,
    /// 角色名称
    pub name: String,
    /// 角色描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 父角色 id，最多一个
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_role_id: Option<String>,
    /// 角色是否启用
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl Role {
    /// 创建新角色
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            parent_role_id: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 获取角色 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 获取角色名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 检查角色是否启用
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 启用角色
    pub fn enable(&mut self) {
        self.enabled = true;
        self.updated_at = Utc::now();
    }

    /// 禁用角色
    pub fn disable(&mut self) {
        self.enabled = false;
        self.updated_at = Utc::now();
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Role {}

impl std::hash::Hash for Role {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// RoleBuilder
// ============================================================================

/// 角色构建器
///
/// 提供流式 API 来创建角色
///
/// # 示例
///
/// ```rust
/// use permrs::role::RoleBuilder;
///
/// let role = RoleBuilder::new("fin_clerk")
///     .name("Finance Clerk")
///     .description("Handles invoices")
///     .parent("employee")
///     .build();
/// ```
pub struct RoleBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    parent_role_id: Option<String>,
    enabled: bool,
}

impl RoleBuilder {
    /// 创建新的角色构建器
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            parent_role_id: None,
            enabled: true,
        }
    }

    /// 设置角色名称（默认与 ID 相同）
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置描述
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// 设置父角色
    pub fn parent(mut self, role_id: impl Into<String>) -> Self {
        self.parent_role_id = Some(role_id.into());
        self
    }

    /// 设置是否启用
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 构建角色
    pub fn build(self) -> Role {
        let now = Utc::now();
        let name = self.name.unwrap_or_else(|| self.id.clone());

        Role {
            id: self.id,
            name,
            description: self.description,
            parent_role_id: self.parent_role_id,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// RoleStore Trait
// ============================================================================

/// 角色存储 trait
///
/// 定义角色持久化存储的接口
pub trait RoleStore {
    /// 保存角色
    fn save(&mut self, role: Role);

    /// 根据 ID 获取角色
    fn get(&self, id: &str) -> Option<&Role>;

    /// 根据 ID 获取可变角色引用
    fn get_mut(&mut self, id: &str) -> Option<&mut Role>;

    /// 删除角色
    fn delete(&mut self, id: &str) -> Option<Role>;

    /// 列出所有角色
    fn list(&self) -> Vec<&Role>;

    /// 检查角色是否存在
    fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

// ============================================================================
// InMemoryRoleStore
// ============================================================================

/// 内存角色存储
///
/// 用于测试和开发环境
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    roles: HashMap<String, Role>,
}

impl InMemoryRoleStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            roles: HashMap::new(),
        }
    }

    /// 获取角色数量
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// 检查是否为空
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl RoleStore for InMemoryRoleStore {
    fn save(&mut self, role: Role) {
        self.roles.insert(role.id.clone(), role);
    }

    fn get(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Role> {
        self.roles.get_mut(id)
    }

    fn delete(&mut self, id: &str) -> Option<Role> {
        self.roles.remove(id)
    }

    fn list(&self) -> Vec<&Role> {
        self.roles.values().collect()
    }
}

// ============================================================================
// RoleHierarchy
// ============================================================================

/// 角色层级解析器
///
/// 管理角色森林并沿父链展开继承角色。
///
/// # 示例
///
/// ```rust
/// use permrs::role::{RoleBuilder, RoleHierarchy};
///
/// let mut hierarchy = RoleHierarchy::new();
/// hierarchy.add_role(RoleBuilder::new("employee").build());
/// hierarchy.add_role(RoleBuilder::new("auditor").parent("employee").build());
///
/// let roles = hierarchy.expand("auditor").unwrap();
/// assert_eq!(roles.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RoleHierarchy {
    store: InMemoryRoleStore,
}

impl RoleHierarchy {
    /// 创建新的角色层级解析器
    pub fn new() -> Self {
        Self {
            store: InMemoryRoleStore::new(),
        }
    }

    /// 添加角色
    pub fn add_role(&mut self, role: Role) {
        self.store.save(role);
    }

    /// 获取角色
    pub fn get_role(&self, id: &str) -> Option<&Role> {
        self.store.get(id)
    }

    /// 获取可变角色引用
    pub fn get_role_mut(&mut self, id: &str) -> Option<&mut Role> {
        self.store.get_mut(id)
    }

    /// 删除角色
    pub fn remove_role(&mut self, id: &str) -> Option<Role> {
        self.store.delete(id)
    }

    /// 检查角色是否存在
    pub fn role_exists(&self, id: &str) -> bool {
        self.store.exists(id)
    }

    /// 获取角色数量
    pub fn role_count(&self) -> usize {
        self.store.len()
    }

    /// 列出所有角色
    pub fn list_roles(&self) -> Vec<&Role> {
        self.store.list()
    }

    /// 展开角色的继承链
    ///
    /// 返回 `{role} ∪ expand(parent)`。不存在的角色 id 视为无授权来源，
    /// 返回空集合；禁用的角色终止该链且自身不计入。父链中重复访问同一
    /// 角色时返回 [`HierarchyError::RoleCycle`]。
    pub fn expand(&self, role_id: &str) -> Result<HashSet<String>> {
        let mut out = HashSet::new();
        let mut visited = HashSet::new();
        let mut current = Some(role_id.to_string());

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                return Err(HierarchyError::RoleCycle { role_id: id }.into());
            }
            let Some(role) = self.store.get(&id) else {
                // 悬空引用：该来源不产生授权
                break;
            };
            if !role.enabled {
                break;
            }
            out.insert(id);
            current = role.parent_role_id.clone();
        }
        Ok(out)
    }

    /// 展开一组角色的继承链并取并集
    pub fn expand_all<I, S>(&self, role_ids: I) -> Result<HashSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = HashSet::new();
        for id in role_ids {
            out.extend(self.expand(id.as_ref())?);
        }
        Ok(out)
    }

    /// 检查指定的父角色赋值是否会形成循环
    pub fn would_create_cycle(&self, role_id: &str, parent_id: &str) -> bool {
        if role_id == parent_id {
            return true;
        }
        // 沿 parent_id 的父链向上走，遇到 role_id 即为循环
        let mut current = Some(parent_id.to_string());
        let mut visited = HashSet::new();
        while let Some(id) = current {
            if id == role_id {
                return true;
            }
            if !visited.insert(id.clone()) {
                // 已有循环的数据里继续挂父节点同样视为循环
                return true;
            }
            current = self.store.get(&id).and_then(|r| r.parent_role_id.clone());
        }
        false
    }

    /// 安全地设置父角色
    ///
    /// 会形成循环或父角色不存在时拒绝。这是管理端写入的第一道防线，
    /// [`expand`](Self::expand) 的循环检测只是兜底。
    pub fn set_parent(&mut self, role_id: &str, parent_id: &str) -> Result<()> {
        if self.would_create_cycle(role_id, parent_id) {
            return Err(HierarchyError::WouldCreateCycle {
                id: role_id.to_string(),
                parent_id: parent_id.to_string(),
            }
            .into());
        }
        if !self.store.exists(parent_id) {
            return Err(HierarchyError::NodeNotFound(parent_id.to_string()).into());
        }
        let role = self
            .store
            .get_mut(role_id)
            .ok_or_else(|| HierarchyError::NodeNotFound(role_id.to_string()))?;
        role.parent_role_id = Some(parent_id.to_string());
        role.updated_at = Utc::now();
        Ok(())
    }

    /// 清除父角色
    pub fn clear_parent(&mut self, role_id: &str) -> Result<()> {
        let role = self
            .store
            .get_mut(role_id)
            .ok_or_else(|| HierarchyError::NodeNotFound(role_id.to_string()))?;
        role.parent_role_id = None;
        role.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn chain() -> RoleHierarchy {
        // employee <- clerk <- auditor
        let mut h = RoleHierarchy::new();
        h.add_role(RoleBuilder::new("employee").build());
        h.add_role(RoleBuilder::new("clerk").parent("employee").build());
        h.add_role(RoleBuilder::new("auditor").parent("clerk").build());
        h
    }

    #[test]
    fn test_expand_single_role() {
        let h = chain();
        let set = h.expand("employee").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("employee"));
    }

    #[test]
    fn test_expand_walks_parent_chain() {
        let h = chain();
        let set = h.expand("auditor").unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("auditor"));
        assert!(set.contains("clerk"));
        assert!(set.contains("employee"));
    }

    #[test]
    fn test_expand_unknown_role_is_empty() {
        let h = chain();
        let set = h.expand("missing").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_expand_stops_at_disabled_role() {
        let mut h = chain();
        h.get_role_mut("clerk").unwrap().disable();

        let set = h.expand("auditor").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("auditor"));
        assert!(!set.contains("clerk"));
        assert!(!set.contains("employee"));
    }

    #[test]
    fn test_expand_fails_on_cycle() {
        let mut h = RoleHierarchy::new();
        let mut a = RoleBuilder::new("a").build();
        a.parent_role_id = Some("b".to_string());
        let mut b = RoleBuilder::new("b").build();
        b.parent_role_id = Some("a".to_string());
        h.add_role(a);
        h.add_role(b);

        let err = h.expand("a").unwrap_err();
        assert!(matches!(
            err,
            Error::Hierarchy(HierarchyError::RoleCycle { .. })
        ));
    }

    #[test]
    fn test_set_parent_rejects_cycle() {
        let mut h = chain();

        // employee 不能继承 auditor（会形成环）
        let result = h.set_parent("employee", "auditor");
        assert!(result.is_err());

        // 自继承
        assert!(h.set_parent("employee", "employee").is_err());

        // 合法的赋值
        h.add_role(RoleBuilder::new("intern").build());
        assert!(h.set_parent("intern", "employee").is_ok());
    }

    #[test]
    fn test_set_parent_rejects_missing_roles() {
        let mut h = chain();
        assert!(h.set_parent("employee", "missing").is_err());
        assert!(h.set_parent("missing", "employee").is_err());
    }

    #[test]
    fn test_expand_all() {
        let mut h = chain();
        h.add_role(RoleBuilder::new("guest").build());

        let set = h.expand_all(["clerk", "guest"]).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains("clerk"));
        assert!(set.contains("employee"));
        assert!(set.contains("guest"));
    }

    #[test]
    fn test_clear_parent() {
        let mut h = chain();
        h.clear_parent("auditor").unwrap();
        let set = h.expand("auditor").unwrap();
        assert_eq!(set.len(), 1);
    }
}
