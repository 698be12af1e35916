//! 统一错误类型模块
//!
//! 提供 permrs 库中所有操作的错误类型定义。

use std::fmt;

/// permrs 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// permrs 库的错误类型
#[derive(Debug)]
pub enum Error {
    /// 层级结构错误（角色继承、组织树）
    Hierarchy(HierarchyError),

    /// 权限委托错误
    Delegation(DelegationError),

    /// 权限冲突错误
    Conflict(ConflictError),

    /// 验证错误
    Validation(ValidationError),

    /// 存储错误
    Storage(StorageError),

    /// 内部错误
    Internal(String),

    /// 其他错误
    Other(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }
}

/// 层级结构相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// 角色继承链中检测到循环
    ///
    /// 展开时重复访问同一角色说明管理端写入破坏了数据完整性，
    /// 必须向调用方暴露而不是静默截断。
    RoleCycle { role_id: String },
    /// 添加父节点会形成循环
    WouldCreateCycle { id: String, parent_id: String },
    /// 节点不存在
    NodeNotFound(String),
    /// 节点已存在
    NodeAlreadyExists(String),
    /// 节点仍有子节点，不能删除
    HasChildren(String),
}

/// 权限委托相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationError {
    /// 不能将权限委托给自己
    SelfDelegation,
    /// 生效时间晚于失效时间
    InvalidWindow,
    /// 委托记录不存在
    NotFound(String),
    /// 委托不处于 Active 状态
    NotActive(String),
}

/// 权限冲突相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// 冲突记录不存在
    NotFound(String),
    /// 冲突已被解决，PENDING -> RESOLVED 是终态迁移
    AlreadyResolved(String),
}

/// 验证相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 字段为空
    EmptyField(String),
    /// 自定义验证错误
    Custom(String),
}

/// 存储相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 记录未找到
    NotFound(String),
    /// 记录已存在
    AlreadyExists(String),
    /// 操作失败
    OperationFailed(String),
}

// ============================================================================
// Display 实现
// ============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Hierarchy(e) => write!(f, "Hierarchy error: {}", e),
            Error::Delegation(e) => write!(f, "Delegation error: {}", e),
            Error::Conflict(e) => write!(f, "Conflict error: {}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HierarchyError::RoleCycle { role_id } => {
                write!(f, "role hierarchy cycle detected at role '{}'", role_id)
            }
            HierarchyError::WouldCreateCycle { id, parent_id } => {
                write!(
                    f,
                    "setting parent '{}' on '{}' would create a cycle",
                    parent_id, id
                )
            }
            HierarchyError::NodeNotFound(id) => write!(f, "node not found: {}", id),
            HierarchyError::NodeAlreadyExists(id) => write!(f, "node already exists: {}", id),
            HierarchyError::HasChildren(id) => {
                write!(f, "node '{}' still has children", id)
            }
        }
    }
}

impl fmt::Display for DelegationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelegationError::SelfDelegation => {
                write!(f, "cannot delegate a permission to oneself")
            }
            DelegationError::InvalidWindow => {
                write!(f, "valid_from must not be later than valid_to")
            }
            DelegationError::NotFound(id) => write!(f, "delegation not found: {}", id),
            DelegationError::NotActive(id) => write!(f, "delegation not active: {}", id),
        }
    }
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictError::NotFound(id) => write!(f, "conflict not found: {}", id),
            ConflictError::AlreadyResolved(id) => {
                write!(f, "conflict already resolved: {}", id)
            }
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "field '{}' cannot be empty", field),
            ValidationError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(item) => write!(f, "not found: {}", item),
            StorageError::AlreadyExists(item) => write!(f, "already exists: {}", item),
            StorageError::OperationFailed(msg) => write!(f, "storage operation failed: {}", msg),
        }
    }
}

// ============================================================================
// std::error::Error 实现
// ============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::error::Error for HierarchyError {}
impl std::error::Error for DelegationError {}
impl std::error::Error for ConflictError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for StorageError {}

// ============================================================================
// From 实现 - 方便错误转换
// ============================================================================

impl From<HierarchyError> for Error {
    fn from(err: HierarchyError) -> Self {
        Error::Hierarchy(err)
    }
}

impl From<DelegationError> for Error {
    fn from(err: DelegationError) -> Self {
        Error::Delegation(err)
    }
}

impl From<ConflictError> for Error {
    fn from(err: ConflictError) -> Self {
        Error::Conflict(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
