//! 列级权限与掩码决策
//!
//! 在行级范围之上控制单个字段的可见性与脱敏方式。解析器只产出决策，
//! 不执行字符串脱敏，展示层根据 [`ColumnDecision`] 自行处理。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 掩码类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    /// 手机号（保留前三后四）
    Phone,
    /// 邮箱（保留首字符与域名）
    Email,
    /// 证件号
    IdCard,
    /// 自定义规则，配合 mask_expression
    Custom,
}

/// 列权限配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnPermission {
    /// 所属数据权限规则 id
    pub rule_id: String,
    /// 列名
    pub column_name: String,
    /// 是否可见
    pub visible: bool,
    /// 是否脱敏
    pub masked: bool,
    /// 掩码类型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_type: Option<MaskType>,
    /// 自定义掩码表达式（mask_type 为 Custom 时有效）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_expression: Option<String>,
}

impl ColumnPermission {
    /// 可见且不脱敏
    pub fn visible(rule_id: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            column_name: column_name.into(),
            visible: true,
            masked: false,
            mask_type: None,
            mask_expression: None,
        }
    }

    /// 不可见
    pub fn hidden(rule_id: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            column_name: column_name.into(),
            visible: false,
            masked: false,
            mask_type: None,
            mask_expression: None,
        }
    }

    /// 可见但脱敏
    pub fn masked(
        rule_id: impl Into<String>,
        column_name: impl Into<String>,
        mask_type: MaskType,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            column_name: column_name.into(),
            visible: true,
            masked: true,
            mask_type: Some(mask_type),
            mask_expression: None,
        }
    }

    /// 设置自定义掩码表达式
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.mask_expression = Some(expression.into());
        self
    }
}

/// 单列的最终决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDecision {
    /// 列名
    pub column_name: String,
    /// 是否可见
    pub visible: bool,
    /// 是否脱敏
    pub masked: bool,
    /// 掩码类型
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_type: Option<MaskType>,
    /// 自定义掩码表达式
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_expression: Option<String>,
}

impl ColumnDecision {
    /// 无配置列的默认决策：可见、不脱敏
    pub fn default_visible(column_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            visible: true,
            masked: false,
            mask_type: None,
            mask_expression: None,
        }
    }

    fn from_permission(p: &ColumnPermission) -> Self {
        Self {
            column_name: p.column_name.clone(),
            visible: p.visible,
            masked: p.masked,
            mask_type: p.mask_type.clone(),
            mask_expression: p.mask_expression.clone(),
        }
    }
}

// ============================================================================
// ColumnMaskResolver
// ============================================================================

/// 列掩码解析器
///
/// 按规则 id 存放列配置。同一规则内同名列先注册者胜出。
#[derive(Debug, Default)]
pub struct ColumnMaskResolver {
    /// rule_id -> 列配置（注册顺序）
    permissions: HashMap<String, Vec<ColumnPermission>>,
}

impl ColumnMaskResolver {
    /// 创建空解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册列配置
    pub fn add(&mut self, permission: ColumnPermission) {
        self.permissions
            .entry(permission.rule_id.clone())
            .or_default()
            .push(permission);
    }

    /// 某规则下的列配置
    pub fn permissions_of(&self, rule_id: &str) -> &[ColumnPermission] {
        self.permissions
            .get(rule_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 基于胜出规则为一组列产出决策
    ///
    /// 每列取该规则下第一条匹配配置；没有配置的列默认可见不脱敏。
    /// 返回顺序与入参列顺序一致。
    pub fn resolve<I, S>(&self, rule_id: &str, columns: I) -> Vec<ColumnDecision>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rule_permissions = self.permissions_of(rule_id);
        columns
            .into_iter()
            .map(|column| {
                let name = column.as_ref();
                rule_permissions
                    .iter()
                    .find(|p| p.column_name == name)
                    .map(ColumnDecision::from_permission)
                    .unwrap_or_else(|| ColumnDecision::default_visible(name))
            })
            .collect()
    }
}
