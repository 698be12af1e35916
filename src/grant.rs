//! 授权来源聚合模块
//!
//! 一个用户的角色来自四个来源：
//!
//! 1. 直接分配（`UserRoleAssignment`，可带时间窗口）
//! 2. 虚拟组成员身份（组绑定唯一角色，组本身有状态与时间窗口）
//! 3. 业务单元成员身份（单元可绑定多个角色）
//! 4. 角色继承（以上并集再经 `RoleHierarchy` 展开）
//!
//! `GrantAggregator` 负责把四个来源合并为一个角色 id 集合。悬空引用
//! （指向不存在的角色、组、单元）静默跳过，不产生授权也不报错。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::role::RoleHierarchy;

// ============================================================================
// 用户
// ============================================================================

/// 用户状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// 正常
    Active,
    /// 锁定
    Locked,
}

/// 用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// 用户 id
    pub id: String,
    /// 用户名
    pub name: String,
    /// 状态
    pub status: UserStatus,
    /// 锁定截止时间，None 表示无限期锁定
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    /// 所属部门 id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
}

impl User {
    /// 创建正常状态的用户
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: UserStatus::Active,
            locked_until: None,
            department_id: None,
        }
    }

    /// 设置所属部门
    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    /// 锁定用户到指定时间，None 表示无限期
    pub fn lock_until(&mut self, until: Option<DateTime<Utc>>) {
        self.status = UserStatus::Locked;
        self.locked_until = until;
    }

    /// 解除锁定
    pub fn unlock(&mut self) {
        self.status = UserStatus::Active;
        self.locked_until = None;
    }

    /// 检查用户在 `now` 时刻是否处于锁定状态
    ///
    /// 锁定计时器到期的用户视为正常，不要求先执行解锁写入。
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            UserStatus::Active => false,
            UserStatus::Locked => self.locked_until.map_or(true, |until| until > now),
        }
    }
}

// ============================================================================
// 授权记录
// ============================================================================

/// 用户角色直接分配
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    /// 用户 id
    pub user_id: String,
    /// 角色 id
    pub role_id: String,
    /// 生效时间，None 表示立即生效
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// 失效时间，None 表示无限期
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    /// 创建无限期分配
    pub fn new(user_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role_id: role_id.into(),
            valid_from: None,
            valid_to: None,
        }
    }

    /// 设置时间窗口
    pub fn with_window(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// 检查分配在 `now` 时刻是否生效
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= now)
            && self.valid_to.map_or(true, |to| to > now)
    }
}

/// 虚拟组状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VirtualGroupStatus {
    /// 启用
    Active,
    /// 停用
    Disabled,
}

/// 虚拟组
///
/// 跨部门的临时编组（项目组、专项小组）。组绑定唯一角色，
/// 组停用或超出时间窗口时成员不再获得该角色。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualGroup {
    /// 组 id
    pub id: String,
    /// 组名
    pub name: String,
    /// 状态
    pub status: VirtualGroupStatus,
    /// 生效时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// 失效时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

impl VirtualGroup {
    /// 创建启用状态的虚拟组
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: VirtualGroupStatus::Active,
            valid_from: None,
            valid_to: None,
        }
    }

    /// 设置时间窗口
    pub fn with_window(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// 停用虚拟组
    pub fn disable(&mut self) {
        self.status = VirtualGroupStatus::Disabled;
    }

    /// 检查虚拟组在 `now` 时刻是否有效
    ///
    /// 要求状态为启用且在时间窗口内。
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == VirtualGroupStatus::Active
            && self.valid_from.map_or(true, |from| from <= now)
            && self.valid_to.map_or(true, |to| to > now)
    }
}

// ============================================================================
// GrantStore
// ============================================================================

/// 授权记录存储接口
///
/// 只读查询接口按来源拆分，写入接口由内存实现提供。
pub trait GrantStore: Send + Sync {
    /// 获取用户
    fn user(&self, user_id: &str) -> Option<&User>;

    /// 用户的直接角色分配
    fn assignments_of(&self, user_id: &str) -> Vec<&UserRoleAssignment>;

    /// 用户所属的虚拟组 id
    fn groups_of(&self, user_id: &str) -> Vec<&str>;

    /// 获取虚拟组
    fn group(&self, group_id: &str) -> Option<&VirtualGroup>;

    /// 虚拟组绑定的唯一角色 id
    fn group_role(&self, group_id: &str) -> Option<&str>;

    /// 用户所属的业务单元 id
    fn units_of(&self, user_id: &str) -> Vec<&str>;

    /// 业务单元绑定的角色 id 列表
    fn unit_roles(&self, unit_id: &str) -> Vec<&str>;
}

/// 内存授权存储
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    users: HashMap<String, User>,
    assignments: Vec<UserRoleAssignment>,
    groups: HashMap<String, VirtualGroup>,
    /// (group_id, user_id) 成员关系
    group_members: Vec<(String, String)>,
    /// 每组唯一角色
    group_roles: HashMap<String, String>,
    /// (user_id, unit_id) 成员关系
    unit_members: Vec<(String, String)>,
    /// (unit_id, role_id) 绑定
    unit_roles: Vec<(String, String)>,
}

impl InMemoryGrantStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存用户（同 id 覆盖）
    pub fn save_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// 获取可变用户引用
    pub fn user_mut(&mut self, user_id: &str) -> Option<&mut User> {
        self.users.get_mut(user_id)
    }

    /// 添加直接角色分配
    pub fn assign_role(&mut self, assignment: UserRoleAssignment) {
        self.assignments.push(assignment);
    }

    /// 移除用户的某个直接分配
    pub fn unassign_role(&mut self, user_id: &str, role_id: &str) {
        self.assignments
            .retain(|a| !(a.user_id == user_id && a.role_id == role_id));
    }

    /// 保存虚拟组（同 id 覆盖）
    pub fn save_group(&mut self, group: VirtualGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    /// 获取可变虚拟组引用
    pub fn group_mut(&mut self, group_id: &str) -> Option<&mut VirtualGroup> {
        self.groups.get_mut(group_id)
    }

    /// 添加虚拟组成员
    pub fn add_group_member(&mut self, group_id: impl Into<String>, user_id: impl Into<String>) {
        let pair = (group_id.into(), user_id.into());
        if !self.group_members.contains(&pair) {
            self.group_members.push(pair);
        }
    }

    /// 移除虚拟组成员
    pub fn remove_group_member(&mut self, group_id: &str, user_id: &str) {
        self.group_members
            .retain(|(g, u)| !(g == group_id && u == user_id));
    }

    /// 绑定虚拟组角色
    ///
    /// 每组只能绑定一个角色，重复绑定覆盖旧值。
    pub fn bind_group_role(&mut self, group_id: impl Into<String>, role_id: impl Into<String>) {
        self.group_roles.insert(group_id.into(), role_id.into());
    }

    /// 添加业务单元成员
    pub fn add_unit_member(&mut self, user_id: impl Into<String>, unit_id: impl Into<String>) {
        let pair = (user_id.into(), unit_id.into());
        if !self.unit_members.contains(&pair) {
            self.unit_members.push(pair);
        }
    }

    /// 移除业务单元成员
    pub fn remove_unit_member(&mut self, user_id: &str, unit_id: &str) {
        self.unit_members
            .retain(|(u, d)| !(u == user_id && d == unit_id));
    }

    /// 绑定业务单元角色
    pub fn bind_unit_role(&mut self, unit_id: impl Into<String>, role_id: impl Into<String>) {
        let pair = (unit_id.into(), role_id.into());
        if !self.unit_roles.contains(&pair) {
            self.unit_roles.push(pair);
        }
    }

    /// 解绑业务单元角色
    pub fn unbind_unit_role(&mut self, unit_id: &str, role_id: &str) {
        self.unit_roles
            .retain(|(d, r)| !(d == unit_id && r == role_id));
    }
}

impl GrantStore for InMemoryGrantStore {
    fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    fn assignments_of(&self, user_id: &str) -> Vec<&UserRoleAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.user_id == user_id)
            .collect()
    }

    fn groups_of(&self, user_id: &str) -> Vec<&str> {
        self.group_members
            .iter()
            .filter(|(_, u)| u == user_id)
            .map(|(g, _)| g.as_str())
            .collect()
    }

    fn group(&self, group_id: &str) -> Option<&VirtualGroup> {
        self.groups.get(group_id)
    }

    fn group_role(&self, group_id: &str) -> Option<&str> {
        self.group_roles.get(group_id).map(String::as_str)
    }

    fn units_of(&self, user_id: &str) -> Vec<&str> {
        self.unit_members
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, d)| d.as_str())
            .collect()
    }

    fn unit_roles(&self, unit_id: &str) -> Vec<&str> {
        self.unit_roles
            .iter()
            .filter(|(d, _)| d == unit_id)
            .map(|(_, r)| r.as_str())
            .collect()
    }
}

// ============================================================================
// GrantAggregator
// ============================================================================

/// 授权来源聚合器
///
/// 把直接分配、虚拟组、业务单元三个来源的角色合并，再经角色层级展开。
pub struct GrantAggregator<'a, G: GrantStore + ?Sized> {
    store: &'a G,
}

impl<'a, G: GrantStore + ?Sized> GrantAggregator<'a, G> {
    /// 基于存储创建聚合器
    pub fn new(store: &'a G) -> Self {
        Self { store }
    }

    /// 用户在 `now` 时刻未展开的直接角色集合
    ///
    /// 三个来源的并集，不含继承。悬空 id 静默跳过。
    pub fn direct_roles(&self, user_id: &str, now: DateTime<Utc>) -> HashSet<String> {
        let mut roles = HashSet::new();

        // 来源 1：直接分配（时间窗口检查）
        for assignment in self.store.assignments_of(user_id) {
            if assignment.is_active_at(now) {
                roles.insert(assignment.role_id.clone());
            }
        }

        // 来源 2：虚拟组（组有效 且 绑定了角色）
        for group_id in self.store.groups_of(user_id) {
            let Some(group) = self.store.group(group_id) else {
                continue;
            };
            if !group.is_valid_at(now) {
                continue;
            }
            if let Some(role_id) = self.store.group_role(group_id) {
                roles.insert(role_id.to_string());
            }
        }

        // 来源 3：业务单元（成员关系与绑定同时存在即生效）
        for unit_id in self.store.units_of(user_id) {
            for role_id in self.store.unit_roles(unit_id) {
                roles.insert(role_id.to_string());
            }
        }

        roles
    }

    /// 用户在 `now` 时刻的有效角色集合（含继承展开）
    ///
    /// 角色层级中的环导致错误向上传播。结果是集合，与来源顺序无关。
    pub fn effective_roles(
        &self,
        user_id: &str,
        hierarchy: &RoleHierarchy,
        now: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let direct = self.direct_roles(user_id, now);
        hierarchy.expand_all(direct.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleBuilder;
    use chrono::Duration;

    fn hierarchy(pairs: &[(&str, Option<&str>)]) -> RoleHierarchy {
        let mut h = RoleHierarchy::new();
        for (id, parent) in pairs {
            let mut builder = RoleBuilder::new(*id);
            if let Some(p) = parent {
                builder = builder.parent(*p);
            }
            h.add_role(builder.build());
        }
        h
    }

    #[test]
    fn test_lockout_timer_expiry() {
        let now = Utc::now();
        let mut user = User::new("alice", "Alice");
        assert!(!user.is_locked(now));

        user.lock_until(Some(now + Duration::minutes(30)));
        assert!(user.is_locked(now));
        // 计时器到期后无需写入即视为正常
        assert!(!user.is_locked(now + Duration::minutes(31)));

        user.lock_until(None);
        assert!(user.is_locked(now + Duration::days(365)));

        user.unlock();
        assert!(!user.is_locked(now));
    }

    #[test]
    fn test_direct_assignment_window() {
        let now = Utc::now();
        let mut store = InMemoryGrantStore::new();
        store.save_user(User::new("alice", "Alice"));
        store.assign_role(UserRoleAssignment::new("alice", "editor"));
        store.assign_role(
            UserRoleAssignment::new("alice", "temp_admin")
                .with_window(Some(now + Duration::hours(1)), None),
        );
        store.assign_role(
            UserRoleAssignment::new("alice", "old_role")
                .with_window(None, Some(now - Duration::hours(1))),
        );

        let agg = GrantAggregator::new(&store);
        let roles = agg.direct_roles("alice", now);
        assert_eq!(roles, HashSet::from(["editor".to_string()]));

        // 窗口生效后角色出现
        let roles = agg.direct_roles("alice", now + Duration::hours(2));
        assert!(roles.contains("temp_admin"));
    }

    #[test]
    fn test_virtual_group_grant() {
        let now = Utc::now();
        let mut store = InMemoryGrantStore::new();
        store.save_user(User::new("alice", "Alice"));
        store.save_group(VirtualGroup::new("vg_audit", "Audit Taskforce"));
        store.add_group_member("vg_audit", "alice");
        store.bind_group_role("vg_audit", "auditor");

        let agg = GrantAggregator::new(&store);
        assert!(agg.direct_roles("alice", now).contains("auditor"));

        // 组停用后角色消失
        store.group_mut("vg_audit").unwrap().disable();
        let agg = GrantAggregator::new(&store);
        assert!(agg.direct_roles("alice", now).is_empty());
    }

    #[test]
    fn test_virtual_group_window_and_rebind() {
        let now = Utc::now();
        let mut store = InMemoryGrantStore::new();
        store.save_group(
            VirtualGroup::new("vg", "Seasonal")
                .with_window(Some(now - Duration::days(1)), Some(now + Duration::days(1))),
        );
        store.add_group_member("vg", "bob");
        store.bind_group_role("vg", "role_a");
        // 重复绑定覆盖：每组唯一角色
        store.bind_group_role("vg", "role_b");

        let agg = GrantAggregator::new(&store);
        let roles = agg.direct_roles("bob", now);
        assert_eq!(roles, HashSet::from(["role_b".to_string()]));

        // 窗口外不生效
        assert!(agg.direct_roles("bob", now + Duration::days(2)).is_empty());
    }

    #[test]
    fn test_business_unit_grant() {
        let now = Utc::now();
        let mut store = InMemoryGrantStore::new();
        store.add_unit_member("alice", "bu_finance");
        store.bind_unit_role("bu_finance", "fin_clerk");
        store.bind_unit_role("bu_finance", "fin_viewer");

        let agg = GrantAggregator::new(&store);
        let roles = agg.direct_roles("alice", now);
        assert!(roles.contains("fin_clerk"));
        assert!(roles.contains("fin_viewer"));

        // 解除成员关系后两个角色都消失
        store.remove_unit_member("alice", "bu_finance");
        let agg = GrantAggregator::new(&store);
        assert!(agg.direct_roles("alice", now).is_empty());
    }

    #[test]
    fn test_dangling_references_are_skipped() {
        let now = Utc::now();
        let mut store = InMemoryGrantStore::new();
        // 成员关系指向不存在的组
        store.add_group_member("vg_missing", "alice");
        // 组存在但未绑定角色
        store.save_group(VirtualGroup::new("vg_empty", "Empty"));
        store.add_group_member("vg_empty", "alice");

        let agg = GrantAggregator::new(&store);
        assert!(agg.direct_roles("alice", now).is_empty());
    }

    #[test]
    fn test_effective_roles_expand_hierarchy() {
        let now = Utc::now();
        let hierarchy = hierarchy(&[
            ("admin", Some("editor")),
            ("editor", Some("viewer")),
            ("viewer", None),
        ]);

        let mut store = InMemoryGrantStore::new();
        store.assign_role(UserRoleAssignment::new("alice", "admin"));

        let agg = GrantAggregator::new(&store);
        let effective = agg.effective_roles("alice", &hierarchy, now).unwrap();
        assert_eq!(
            effective,
            HashSet::from([
                "admin".to_string(),
                "editor".to_string(),
                "viewer".to_string()
            ])
        );
    }

    #[test]
    fn test_effective_roles_propagates_cycle() {
        let now = Utc::now();
        let hierarchy = hierarchy(&[("a", Some("b")), ("b", Some("a"))]);

        let mut store = InMemoryGrantStore::new();
        store.assign_role(UserRoleAssignment::new("alice", "a"));

        let agg = GrantAggregator::new(&store);
        assert!(agg.effective_roles("alice", &hierarchy, now).is_err());
    }
}
