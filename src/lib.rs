//! # PermRS
//!
//! 一个有效权限解析引擎。
//!
//! ## 功能特性
//!
//! - **组织层级索引**: 物化路径的业务单元/部门树，祖先判定 O(1)
//! - **角色层级解析**: 沿父链展开继承角色，循环硬失败
//! - **授权来源聚合**: 直接分配、虚拟组、业务单元、角色继承四源合并
//! - **权限展开**: `resource:action` 编码与通配符匹配，委托权限折叠
//! - **数据范围解析**: 优先级规则、首条命中、同优先级冲突检测
//! - **列级掩码决策**: 字段可见性与脱敏类型，首条注册胜出
//! - **权限委托**: 带时间窗口的委托、撤销与过期清扫
//! - **冲突台账**: 待处理冲突去重记录、终态处理
//! - **审计日志**: 授权决策与权限管理事件的记录与查询
//!
//! ## 授权判定示例
//!
//! ```rust
//! use permrs::engine::{AccessEngine, EngineConfig};
//! use permrs::grant::{User, UserRoleAssignment};
//! use permrs::permission::Permission;
//! use permrs::role::RoleBuilder;
//! use chrono::Utc;
//!
//! let mut engine = AccessEngine::new(EngineConfig::default());
//!
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
//!
//! ## 角色继承示例
//!
//! ```rust
//! use permrs::role::{RoleBuilder, RoleHierarchy};
//!
//! let mut hierarchy = RoleHierarchy::new();
//! hierarchy.add_role(RoleBuilder::new("employee").build());
//! hierarchy.add_role(RoleBuilder::new("clerk").parent("employee").build());
//!
//! // clerk 持有自身与 employee
//! let roles = hierarchy.expand("clerk").unwrap();
//! assert_eq!(roles.len(), 2);
//!
//! // 形成循环的父角色赋值被拒绝
//! assert!(hierarchy.set_parent("employee", "clerk").is_err());
//! ```
//!
//! ## 通配符权限示例
//!
//! ```rust
//! use permrs::permission::{Permission, PermissionSet};
//!
//! let mut set = PermissionSet::new();
//! set.add(Permission::resource_wildcard("invoice"));
//!
//! assert!(set.allows("invoice", "read"));
//! assert!(set.allows("invoice", "approve"));
//! assert!(!set.allows("order", "read"));
//! ```

pub mod audit;
pub mod conflict;
pub mod delegation;
pub mod engine;
pub mod error;
pub mod grant;
pub mod org;
pub mod permission;
pub mod role;
pub mod scope;

pub use error::{Error, Result};

// ============================================================================
// 引擎相关导出
// ============================================================================

pub use engine::{AccessDecision, AccessEngine, DecisionReason, EngineConfig};

// ============================================================================
// 核心类型导出
// ============================================================================

pub use conflict::{ConflictLedger, PermissionConflict, ResolutionStrategy};
pub use delegation::{DelegationManager, PermissionDelegation};
pub use grant::{GrantAggregator, User, UserRoleAssignment, VirtualGroup};
pub use org::{NodeKind, OrgIndex, OrgUnit};
pub use permission::{Permission, PermissionSet};
pub use role::{Role, RoleBuilder, RoleHierarchy};
pub use scope::{DataPermissionRule, DataScope, ScopeContext, ScopeDecision};
