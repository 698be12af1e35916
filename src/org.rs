//! 组织层级索引模块
//!
//! 以节点 arena 的形式维护业务单元 / 部门的父子关系与物化路径（materialized
//! path），支持常数级前缀判断的祖先 / 后代查询。
//!
//! ## 基本概念
//!
//! - **OrgUnit（组织节点）**: 带 `parent_id`、`level` 与物化 `path` 的树节点
//! - **NodeKind（节点类型）**: 业务单元与部门结构相同，共用同一索引类型
//! - **路径不变量**: 根节点 `path == "/" + id`；非根节点
//!   `path == parent.path + "/" + id`，任何重挂载后都必须重算
//!
//! ## 使用示例
//!
//! ```rust
//! use permrs::org::{NodeKind, OrgIndex};
//!
//! let mut index = OrgIndex::new(NodeKind::BusinessUnit);
//! index.insert("hq", "Headquarters", None).unwrap();
//! index.insert("finance", "Finance", Some("hq")).unwrap();
//! index.insert("finance_ap", "Accounts Payable", Some("finance")).unwrap();
//!
//! assert!(index.is_ancestor("hq", "finance_ap"));
//! assert_eq!(index.descendants_of("hq").len(), 2);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{HierarchyError, Result};

/// 节点类型
///
/// 业务单元与部门在源数据中是两棵平行层级，结构完全一致，
/// 这里用类型参数化同一抽象。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// 业务单元
    BusinessUnit,
    /// 部门
    Department,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::BusinessUnit => write!(f, "business_unit"),
            NodeKind::Department => write!(f, "department"),
        }
    }
}

/// 组织节点
///
/// 路径为斜杠分隔的祖先 id 链，根节点路径为 `/` + 自身 id。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUnit {
    /// 节点唯一标识符
    pub id: String,
    /// 节点名称
    pub name: String,
    /// 父节点 id，根节点为 None
    pub parent_id: Option<String>,
    /// 层级深度，根节点为 0
    pub level: u32,
    /// 物化路径
    pub path: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

impl OrgUnit {
    /// 检查是否是根节点
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// 组织层级索引
///
/// 节点按 id 存放在 arena 中，父链接与物化路径预先计算好，
/// 祖先判断只需做一次路径前缀比较，不需要递归遍历。
#[derive(Debug, Clone)]
pub struct OrgIndex {
    kind: NodeKind,
    nodes: HashMap<String, OrgUnit>,
}

impl OrgIndex {
    /// 创建指定类型的空索引
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            nodes: HashMap::new(),
        }
    }

    /// 获取节点类型
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// 插入节点
    ///
    /// 根据父节点计算 `level` 与 `path`。父节点不存在或 id 重复时返回错误。
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        parent_id: Option<&str>,
    ) -> Result<&OrgUnit> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(HierarchyError::NodeAlreadyExists(id).into());
        }

        let (level, path, parent_id) = match parent_id {
            Some(pid) => {
                let parent = self
                    .nodes
                    .get(pid)
                    .ok_or_else(|| HierarchyError::NodeNotFound(pid.to_string()))?;
                (
                    parent.level + 1,
                    format!("{}/{}", parent.path, id),
                    Some(pid.to_string()),
                )
            }
            None => (0, format!("/{}", id), None),
        };

        let now = Utc::now();
        let unit = OrgUnit {
            id: id.clone(),
            name: name.into(),
            parent_id,
            level,
            path,
            created_at: now,
            updated_at: now,
        };
        self.nodes.insert(id.clone(), unit);
        Ok(&self.nodes[&id])
    }

    /// 获取节点
    pub fn get(&self, id: &str) -> Option<&OrgUnit> {
        self.nodes.get(id)
    }

    /// 检查节点是否存在
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// 获取节点数量
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 检查索引是否为空
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 检查 `a` 是否是 `b` 的祖先
    ///
    /// 当且仅当 `b.path` 以 `a.path + "/"` 开头时成立。节点不存在时返回 false。
    pub fn is_ancestor(&self, a: &str, b: &str) -> bool {
        let (Some(a), Some(b)) = (self.nodes.get(a), self.nodes.get(b)) else {
            return false;
        };
        b.path.starts_with(&format!("{}/", a.path))
    }

    /// 获取 `a` 的全部后代节点
    ///
    /// 返回路径以 `a.path` 为真前缀的所有节点。
    pub fn descendants_of(&self, a: &str) -> Vec<&OrgUnit> {
        let Some(root) = self.nodes.get(a) else {
            return Vec::new();
        };
        let prefix = format!("{}/", root.path);
        self.nodes
            .values()
            .filter(|n| n.path.starts_with(&prefix))
            .collect()
    }

    /// 获取节点的祖先 id 链（不含自身），从近到远
    pub fn ancestors_of(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(pid) = current {
            current = self.nodes.get(&pid).and_then(|n| n.parent_id.clone());
            out.push(pid);
        }
        out
    }

    /// 获取节点的直接子节点
    pub fn children_of(&self, id: &str) -> Vec<&OrgUnit> {
        self.nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// 重挂载节点
    ///
    /// 将节点移动到新的父节点下（`None` 表示提升为根）。新父节点位于本节点
    /// 子树内时拒绝，成功后重算本节点与所有后代的 `path` / `level`。
    pub fn reparent(&mut self, id: &str, new_parent: Option<&str>) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.to_string()))?;
        let old_path = node.path.clone();
        let old_level = node.level;

        let (new_path, new_level, new_parent_id) = match new_parent {
            Some(pid) => {
                let parent = self
                    .nodes
                    .get(pid)
                    .ok_or_else(|| HierarchyError::NodeNotFound(pid.to_string()))?;
                // 新父节点在本节点子树内（含自身）说明会形成环
                if pid == id || parent.path.starts_with(&format!("{}/", old_path)) {
                    return Err(HierarchyError::WouldCreateCycle {
                        id: id.to_string(),
                        parent_id: pid.to_string(),
                    }
                    .into());
                }
                (
                    format!("{}/{}", parent.path, id),
                    parent.level + 1,
                    Some(pid.to_string()),
                )
            }
            None => (format!("/{}", id), 0, None),
        };

        let now = Utc::now();
        let level_delta = new_level as i64 - old_level as i64;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.to_string()))?;
        node.parent_id = new_parent_id;
        node.path = new_path.clone();
        node.level = new_level;
        node.updated_at = now;

        // 重算后代路径
        let prefix = format!("{}/", old_path);
        for n in self.nodes.values_mut() {
            if n.path.starts_with(&prefix) {
                n.path = format!("{}{}", new_path, &n.path[old_path.len()..]);
                n.level = (n.level as i64 + level_delta) as u32;
                n.updated_at = now;
            }
        }
        Ok(())
    }

    /// 删除节点
    ///
    /// 仍有子节点的节点不能删除。
    pub fn remove(&mut self, id: &str) -> Result<OrgUnit> {
        if !self.nodes.contains_key(id) {
            return Err(HierarchyError::NodeNotFound(id.to_string()).into());
        }
        if !self.children_of(id).is_empty() {
            return Err(HierarchyError::HasChildren(id.to_string()).into());
        }
        self.nodes
            .remove(id)
            .ok_or_else(|| HierarchyError::NodeNotFound(id.to_string()).into())
    }

    /// 获取所有节点的迭代器
    pub fn iter(&self) -> impl Iterator<Item = &OrgUnit> {
        self.nodes.values()
    }
}
