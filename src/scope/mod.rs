//! 数据范围解析模块
//!
//! 行级数据权限：决定查询某类资源时用户能看到的数据范围（全部、本部门、
//! 本部门及下级、本人、自定义过滤）。
//!
//! 规则按优先级升序求值，第一条命中即胜出，不做规则合并。相同优先级
//! 但不同目标类型的规则对范围给出不同结论时视为配置冲突：记入
//! [`ConflictLedger`](crate::conflict::ConflictLedger)，按配置策略给出
//! 临时结论。没有规则命中时默认最严格的 `Own`，绝不默认 `All`。
//!
//! [`column`] 子模块负责列级掩码决策。

pub mod column;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::conflict::{ConflictLedger, ResolutionStrategy};

/// 数据范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataScope {
    /// 全部数据
    All,
    /// 仅本人数据
    Own,
    /// 本部门数据
    Department,
    /// 本部门及下级部门数据
    DeptAndSub,
    /// 自定义过滤（配合 custom_filter 表达式）
    Custom,
}

impl DataScope {
    /// 严格程度，数值越小越严格
    ///
    /// Own < Custom < Department < DeptAndSub < All。
    /// 取最严格策略时比较该值。
    pub fn restrictiveness(self) -> u8 {
        match self {
            DataScope::Own => 0,
            DataScope::Custom => 1,
            DataScope::Department => 2,
            DataScope::DeptAndSub => 3,
            DataScope::All => 4,
        }
    }
}

impl fmt::Display for DataScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataScope::All => write!(f, "ALL"),
            DataScope::Own => write!(f, "OWN"),
            DataScope::Department => write!(f, "DEPARTMENT"),
            DataScope::DeptAndSub => write!(f, "DEPT_AND_SUB"),
            DataScope::Custom => write!(f, "CUSTOM"),
        }
    }
}

/// 规则目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// 针对角色
    Role,
    /// 针对部门
    Department,
    /// 针对用户
    User,
}

impl TargetType {
    /// 同优先级下的确定性排序名次（User < Role < Department）
    fn rank(self) -> u8 {
        match self {
            TargetType::User => 0,
            TargetType::Role => 1,
            TargetType::Department => 2,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Role => write!(f, "ROLE"),
            TargetType::Department => write!(f, "DEPARTMENT"),
            TargetType::User => write!(f, "USER"),
        }
    }
}

/// 数据权限规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPermissionRule {
    /// 规则 id
    pub id: String,
    /// 规则名
    pub name: String,
    /// 目标类型
    pub target_type: TargetType,
    /// 目标 id（角色 id、部门 id 或用户 id）
    pub target_id: String,
    /// 资源类型
    pub resource_type: String,
    /// 授予的数据范围
    pub data_scope: DataScope,
    /// 自定义过滤表达式，不做解释原样返回
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filter: Option<String>,
    /// 是否启用
    pub enabled: bool,
    /// 优先级，数值越小越先求值
    pub priority: i32,
}

impl DataPermissionRule {
    /// 默认优先级
    pub const DEFAULT_PRIORITY: i32 = 100;

    /// 创建启用状态、默认优先级的规则
    pub fn new(
        id: impl Into<String>,
        target_type: TargetType,
        target_id: impl Into<String>,
        resource_type: impl Into<String>,
        data_scope: DataScope,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            target_type,
            target_id: target_id.into(),
            resource_type: resource_type.into(),
            data_scope,
            custom_filter: None,
            enabled: true,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// 设置规则名
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 设置优先级
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// 设置自定义过滤表达式
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.custom_filter = Some(filter.into());
        self
    }

    /// 停用规则
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// 范围解析上下文
///
/// 调用方预先算好用户的有效角色与部门祖先链，解析器本身不做查找。
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    /// 用户 id
    pub user_id: String,
    /// 有效角色 id 集合（已展开继承）
    pub role_ids: Vec<String>,
    /// 用户所属部门 id
    pub department_id: Option<String>,
    /// 部门祖先 id 链（不含自身）
    pub ancestor_department_ids: Vec<String>,
    /// 用户所属业务单元 id 集合（含各单元的祖先）
    pub unit_ids: Vec<String>,
}

impl ScopeContext {
    /// 创建上下文
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// 设置角色集合
    pub fn with_roles<I, S>(mut self, role_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_ids = role_ids.into_iter().map(Into::into).collect();
        self
    }

    /// 设置部门及其祖先链
    pub fn with_department<I, S>(
        mut self,
        department_id: impl Into<String>,
        ancestors: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.department_id = Some(department_id.into());
        self.ancestor_department_ids = ancestors.into_iter().map(Into::into).collect();
        self
    }

    /// 设置业务单元集合（调用方负责并入各单元的祖先）
    pub fn with_units<I, S>(mut self, unit_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unit_ids = unit_ids.into_iter().map(Into::into).collect();
        self
    }

    /// 检查规则目标是否匹配该上下文
    ///
    /// 部门目标同时匹配用户部门的祖先以及用户所属的业务单元：
    /// 上级组织配置的规则覆盖下级。
    fn matches(&self, rule: &DataPermissionRule) -> bool {
        match rule.target_type {
            TargetType::User => rule.target_id == self.user_id,
            TargetType::Role => self.role_ids.iter().any(|r| r == &rule.target_id),
            TargetType::Department => {
                self.department_id.as_deref() == Some(rule.target_id.as_str())
                    || self
                        .ancestor_department_ids
                        .iter()
                        .any(|d| d == &rule.target_id)
                    || self.unit_ids.iter().any(|u| u == &rule.target_id)
            }
        }
    }
}

/// 解析出的范围结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDecision {
    /// 数据范围
    pub scope: DataScope,
    /// 胜出规则 id，默认兜底时为 None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Custom 范围的过滤表达式，原样透传
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_filter: Option<String>,
}

impl ScopeDecision {
    fn from_rule(rule: &DataPermissionRule) -> Self {
        Self {
            scope: rule.data_scope,
            rule_id: Some(rule.id.clone()),
            custom_filter: rule.custom_filter.clone(),
        }
    }

    /// 无规则命中时的默认结论（最严格）
    pub fn default_own() -> Self {
        Self {
            scope: DataScope::Own,
            rule_id: None,
            custom_filter: None,
        }
    }
}

/// 范围解析结果
///
/// `decision` 为 None 仅出现在 Manual 策略下存在待处理冲突时，
/// 调用方应当拒绝访问直到冲突被处理。
#[derive(Debug, Clone)]
pub struct ScopeResolution {
    /// 范围结论
    pub decision: Option<ScopeDecision>,
    /// 本次解析记录的冲突 id
    pub conflict: Option<String>,
}

// ============================================================================
// DataScopeResolver
// ============================================================================

/// 数据范围解析器
///
/// 持有规则表与冲突台账。规则表是普通可变状态，台账内部自带锁。
#[derive(Debug, Default)]
pub struct DataScopeResolver {
    rules: Vec<DataPermissionRule>,
    ledger: ConflictLedger,
    strategy: ResolutionStrategy,
}

impl DataScopeResolver {
    /// 创建默认策略（最严格）的解析器
    pub fn new(ledger: ConflictLedger) -> Self {
        Self {
            rules: Vec::new(),
            ledger,
            strategy: ResolutionStrategy::default(),
        }
    }

    /// 设置同优先级冲突的临时策略
    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 添加规则
    pub fn add_rule(&mut self, rule: DataPermissionRule) {
        self.rules.push(rule);
    }

    /// 删除规则
    pub fn remove_rule(&mut self, rule_id: &str) {
        self.rules.retain(|r| r.id != rule_id);
    }

    /// 获取规则
    pub fn rule(&self, rule_id: &str) -> Option<&DataPermissionRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// 获取可变规则引用
    pub fn rule_mut(&mut self, rule_id: &str) -> Option<&mut DataPermissionRule> {
        self.rules.iter_mut().find(|r| r.id == rule_id)
    }

    /// 冲突台账
    pub fn ledger(&self) -> &ConflictLedger {
        &self.ledger
    }

    /// 解析用户对某资源类型的数据范围
    ///
    /// 求值顺序：启用规则 → 目标匹配 → 按 (priority, target_type, rule_id)
    /// 排序 → 第一条胜出。胜出优先级上不同目标类型给出不同范围时记冲突，
    /// 按策略给出临时结论。无规则命中默认 `Own`。
    pub fn resolve(&self, ctx: &ScopeContext, resource_type: &str) -> ScopeResolution {
        let mut matched: Vec<&DataPermissionRule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.resource_type == resource_type && ctx.matches(r))
            .collect();

        if matched.is_empty() {
            return ScopeResolution {
                decision: Some(ScopeDecision::default_own()),
                conflict: None,
            };
        }

        matched.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.target_type.rank().cmp(&b.target_type.rank()))
                .then(a.id.cmp(&b.id))
        });

        let winner = matched[0];
        let tied: Vec<&&DataPermissionRule> = matched
            .iter()
            .filter(|r| r.priority == winner.priority)
            .collect();

        // 同优先级且跨目标类型的范围分歧才是冲突；
        // 同类型内部或结论一致的并列按确定性顺序取第一条。
        let ambiguous = tied
            .iter()
            .any(|r| r.target_type != winner.target_type && r.data_scope != winner.data_scope);

        if !ambiguous {
            return ScopeResolution {
                decision: Some(ScopeDecision::from_rule(winner)),
                conflict: None,
            };
        }

        let other = tied
            .iter()
            .find(|r| r.target_type != winner.target_type && r.data_scope != winner.data_scope)
            .map(|r| **r)
            .unwrap_or(winner);

        let conflict_id = self.ledger.record(
            &ctx.user_id,
            resource_type,
            format!("rule:{} ({} {})", winner.id, winner.target_type, winner.data_scope),
            format!("rule:{} ({} {})", other.id, other.target_type, other.data_scope),
            format!(
                "equal-priority ({}) rules disagree on data scope for '{}'",
                winner.priority, resource_type
            ),
            self.strategy,
        );

        let decision = match self.strategy {
            ResolutionStrategy::Manual => None,
            // MostRestrictive 与 Override 待处理期间都取最严格一侧
            ResolutionStrategy::MostRestrictive | ResolutionStrategy::Override => {
                let most_restrictive = tied
                    .iter()
                    .min_by(|a, b| {
                        a.data_scope
                            .restrictiveness()
                            .cmp(&b.data_scope.restrictiveness())
                            .then(a.target_type.rank().cmp(&b.target_type.rank()))
                            .then(a.id.cmp(&b.id))
                    })
                    .map(|r| **r)
                    .unwrap_or(winner);
                Some(ScopeDecision::from_rule(most_restrictive))
            }
        };

        ScopeResolution {
            decision,
            conflict: Some(conflict_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScopeContext {
        ScopeContext::new("alice")
            .with_roles(["fin_clerk", "auditor"])
            .with_department("dept_finance", ["bu_corp"])
    }

    #[test]
    fn test_restrictiveness_order() {
        assert!(DataScope::Own.restrictiveness() < DataScope::Custom.restrictiveness());
        assert!(DataScope::Custom.restrictiveness() < DataScope::Department.restrictiveness());
        assert!(DataScope::Department.restrictiveness() < DataScope::DeptAndSub.restrictiveness());
        assert!(DataScope::DeptAndSub.restrictiveness() < DataScope::All.restrictiveness());
    }

    #[test]
    fn test_no_rule_defaults_to_own() {
        let resolver = DataScopeResolver::new(ConflictLedger::new());
        let resolution = resolver.resolve(&ctx(), "invoice");
        let decision = resolution.decision.unwrap();
        assert_eq!(decision.scope, DataScope::Own);
        assert!(decision.rule_id.is_none());
        assert!(resolution.conflict.is_none());
    }

    #[test]
    fn test_lowest_priority_wins() {
        let mut resolver = DataScopeResolver::new(ConflictLedger::new());
        resolver.add_rule(
            DataPermissionRule::new(
                "r_clerk",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::Department,
            )
            .with_priority(50),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_auditor",
                TargetType::Role,
                "auditor",
                "invoice",
                DataScope::All,
            )
            .with_priority(5),
        );

        let resolution = resolver.resolve(&ctx(), "invoice");
        let decision = resolution.decision.unwrap();
        assert_eq!(decision.scope, DataScope::All);
        assert_eq!(decision.rule_id.as_deref(), Some("r_auditor"));
        assert!(resolution.conflict.is_none());
    }

    #[test]
    fn test_disabled_and_unmatched_rules_skipped() {
        let mut resolver = DataScopeResolver::new(ConflictLedger::new());
        resolver.add_rule(
            DataPermissionRule::new(
                "r_off",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::All,
            )
            .with_priority(1)
            .disabled(),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_other_role",
                TargetType::Role,
                "hr_admin",
                "invoice",
                DataScope::All,
            )
            .with_priority(1),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_other_res",
                TargetType::Role,
                "fin_clerk",
                "order",
                DataScope::All,
            )
            .with_priority(1),
        );

        let decision = resolver.resolve(&ctx(), "invoice").decision.unwrap();
        assert_eq!(decision.scope, DataScope::Own);
        assert!(decision.rule_id.is_none());
    }

    #[test]
    fn test_ancestor_department_rule_applies() {
        let mut resolver = DataScopeResolver::new(ConflictLedger::new());
        // 上级业务单元配置的规则覆盖下属部门成员
        resolver.add_rule(DataPermissionRule::new(
            "r_corp",
            TargetType::Department,
            "bu_corp",
            "invoice",
            DataScope::DeptAndSub,
        ));

        let decision = resolver.resolve(&ctx(), "invoice").decision.unwrap();
        assert_eq!(decision.scope, DataScope::DeptAndSub);
        assert_eq!(decision.rule_id.as_deref(), Some("r_corp"));
    }

    #[test]
    fn test_business_unit_rule_applies() {
        let mut resolver = DataScopeResolver::new(ConflictLedger::new());
        // 部门目标也匹配用户所属的业务单元
        resolver.add_rule(DataPermissionRule::new(
            "r_unit",
            TargetType::Department,
            "bu_finance",
            "invoice",
            DataScope::DeptAndSub,
        ));

        let without_unit = resolver.resolve(&ctx(), "invoice").decision.unwrap();
        assert_eq!(without_unit.scope, DataScope::Own);

        let with_unit = resolver
            .resolve(&ctx().with_units(["bu_finance"]), "invoice")
            .decision
            .unwrap();
        assert_eq!(with_unit.scope, DataScope::DeptAndSub);
        assert_eq!(with_unit.rule_id.as_deref(), Some("r_unit"));
    }

    #[test]
    fn test_custom_filter_passthrough() {
        let mut resolver = DataScopeResolver::new(ConflictLedger::new());
        resolver.add_rule(
            DataPermissionRule::new(
                "r_custom",
                TargetType::User,
                "alice",
                "invoice",
                DataScope::Custom,
            )
            .with_filter("region = 'east'"),
        );

        let decision = resolver.resolve(&ctx(), "invoice").decision.unwrap();
        assert_eq!(decision.scope, DataScope::Custom);
        assert_eq!(decision.custom_filter.as_deref(), Some("region = 'east'"));
    }

    #[test]
    fn test_equal_priority_cross_type_disagreement_records_conflict() {
        let ledger = ConflictLedger::new();
        let mut resolver = DataScopeResolver::new(ledger.clone());
        resolver.add_rule(
            DataPermissionRule::new(
                "r_role",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::All,
            )
            .with_priority(10),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_dept",
                TargetType::Department,
                "dept_finance",
                "invoice",
                DataScope::Own,
            )
            .with_priority(10),
        );

        let resolution = resolver.resolve(&ctx(), "invoice");
        // 默认策略：临时取最严格一侧
        let decision = resolution.decision.unwrap();
        assert_eq!(decision.scope, DataScope::Own);
        assert_eq!(decision.rule_id.as_deref(), Some("r_dept"));

        let conflict_id = resolution.conflict.unwrap();
        assert!(ledger.get(&conflict_id).unwrap().is_pending());

        // 重复解析不重复记录
        let again = resolver.resolve(&ctx(), "invoice");
        assert_eq!(again.conflict.as_deref(), Some(conflict_id.as_str()));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_manual_strategy_withholds_decision() {
        let ledger = ConflictLedger::new();
        let mut resolver =
            DataScopeResolver::new(ledger.clone()).with_strategy(ResolutionStrategy::Manual);
        resolver.add_rule(
            DataPermissionRule::new(
                "r_role",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::All,
            )
            .with_priority(10),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_user",
                TargetType::User,
                "alice",
                "invoice",
                DataScope::Department,
            )
            .with_priority(10),
        );

        let resolution = resolver.resolve(&ctx(), "invoice");
        assert!(resolution.decision.is_none());
        assert!(resolution.conflict.is_some());
    }

    #[test]
    fn test_equal_priority_same_type_is_not_a_conflict() {
        let ledger = ConflictLedger::new();
        let mut resolver = DataScopeResolver::new(ledger.clone());
        // 同为角色规则：确定性顺序（User < Role < Department，再比 id）取第一条
        resolver.add_rule(
            DataPermissionRule::new(
                "r_a",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::All,
            )
            .with_priority(10),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_b",
                TargetType::Role,
                "auditor",
                "invoice",
                DataScope::Own,
            )
            .with_priority(10),
        );

        let resolution = resolver.resolve(&ctx(), "invoice");
        let decision = resolution.decision.unwrap();
        assert_eq!(decision.rule_id.as_deref(), Some("r_a"));
        assert!(resolution.conflict.is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_equal_priority_agreement_is_not_a_conflict() {
        let ledger = ConflictLedger::new();
        let mut resolver = DataScopeResolver::new(ledger.clone());
        resolver.add_rule(
            DataPermissionRule::new(
                "r_role",
                TargetType::Role,
                "fin_clerk",
                "invoice",
                DataScope::Department,
            )
            .with_priority(10),
        );
        resolver.add_rule(
            DataPermissionRule::new(
                "r_user",
                TargetType::User,
                "alice",
                "invoice",
                DataScope::Department,
            )
            .with_priority(10),
        );

        let resolution = resolver.resolve(&ctx(), "invoice");
        assert_eq!(resolution.decision.unwrap().scope, DataScope::Department);
        assert!(resolution.conflict.is_none());
        assert!(ledger.is_empty());
    }
}
