//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为集合通信规划核心对外暴露的错误语义提供集中定义；
//! - 区分“整体失败”（发现流程、配置加载）与“局部失败”（单个组件查询、单次集合调用），
//!   方便调用方决定是终止初始化还是仅放弃本次调用。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，并实现 `Clone + Eq` 以便测试直接比较；
//! - [`CollectiveError::kind`] 将细粒度变体折叠为少量稳定类别；
//! - [`CollectiveError::code`] 提供稳定的点分错误码，便于日志与告警聚合。

use std::fmt;

use thiserror::Error;

use crate::types::GroupId;

/// 模块统一的返回别名。
pub type Result<T, E = CollectiveError> = core::result::Result<T, E>;

/// 错误类别。
///
/// - **意图 (Why)**：调用方通常只关心“该不该重试/该不该中止”，不需要匹配全部变体；
/// - **契约 (What)**：类别集合稳定，新增变体必须归入已有类别或显式扩展此枚举。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// 分配失败，发现流程、配置包或缓存增长时触发。
    NoMemory,
    /// 参数非法，包括未知组件名与畸形配置。
    InvalidParam,
    /// 组件不接受请求的 API 版本或查询失败；发现流程会跳过该组件。
    Unsupported,
    /// 有界容器已满（根槽位、操作数、接口数）。
    CacheCapacityExceeded,
    /// 目标对象不存在。
    NotFound,
    /// 传输协作方报告的失败。
    Transport,
}

/// 受容量约束的资源种类，用于 [`CollectiveError::CacheCapacityExceeded`]。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BoundedResource {
    /// 单个缓存桶内可区分的根 rank 数量。
    RootSlots,
    /// 一个组的计划缓存可同时持有的操作数量。
    Operations,
    /// 注册表或组持有的接口句柄数量。
    Interfaces,
}

impl fmt::Display for BoundedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundedResource::RootSlots => f.write_str("root slots"),
            BoundedResource::Operations => f.write_str("cached operations"),
            BoundedResource::Interfaces => f.write_str("interfaces"),
        }
    }
}

/// 集合通信规划核心的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合组件发现、配置加载、计划缓存与组生命周期的异常；
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可随 worker 跨线程移动；
///   - 携带可读上下文，日志中无需再拼接额外信息；
/// - **设计权衡 (Trade-offs)**：使用 `String` 保存上下文，失败路径上多一次分配换取可读性。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CollectiveError {
    /// 分配失败。
    ///
    /// - **契约 (What)**：`context` 描述失败环节，例如 `"grow descriptor list"`；
    ///   出现该错误时调用方不会拿到任何部分结果。
    #[error("out of memory during `{context}`")]
    NoMemory { context: &'static str },

    /// 一般性参数错误。
    #[error("invalid parameter: {detail}")]
    InvalidParam { detail: String },

    /// 请求的规划组件名与可用组件不匹配。
    #[error("unknown planner component name: \"{name}\"")]
    UnknownComponent { name: String },

    /// 配置项取值无法按表结构解析。
    ///
    /// - **契约 (What)**：`key` 为完整的环境变量名（含前缀），`value` 为原始文本。
    #[error("malformed configuration `{key}`=`{value}`: {reason}")]
    MalformedConfig {
        key: String,
        value: String,
        reason: String,
    },

    /// 组件拒绝查询，典型原因是 API 版本不兼容。
    #[error("component `{component}` cannot serve query: {detail}")]
    Unsupported { component: String, detail: String },

    /// 有界容器已满。
    ///
    /// - **契约 (What)**：`bucket` 为发生溢出的缓存桶下标（接口集合溢出时为 `None`）；
    ///   `limit` 为容量上限。
    /// - **风险 (Trade-offs)**：根槽位按位置而非内容索引，因此溢出必须报错而不是悄悄淘汰。
    #[error("{resource} capacity exceeded (limit {limit}, bucket {bucket:?})")]
    CacheCapacityExceeded {
        bucket: Option<usize>,
        resource: BoundedResource,
        limit: usize,
    },

    /// 组不存在或已销毁。
    #[error("group {group} is not registered")]
    GroupNotFound { group: GroupId },

    /// 传输协作方失败，例如端点创建或内存注册失败。
    #[error("transport failure during `{context}`: {detail}")]
    Transport {
        context: &'static str,
        detail: String,
    },
}

impl CollectiveError {
    /// 构造 [`CollectiveError::InvalidParam`] 的便捷入口。
    pub fn invalid(detail: impl Into<String>) -> Self {
        CollectiveError::InvalidParam {
            detail: detail.into(),
        }
    }

    /// 构造 [`CollectiveError::Transport`] 的便捷入口。
    pub fn transport(context: &'static str, detail: impl Into<String>) -> Self {
        CollectiveError::Transport {
            context,
            detail: detail.into(),
        }
    }

    /// 折叠为错误类别。
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectiveError::NoMemory { .. } => ErrorKind::NoMemory,
            CollectiveError::InvalidParam { .. }
            | CollectiveError::UnknownComponent { .. }
            | CollectiveError::MalformedConfig { .. } => ErrorKind::InvalidParam,
            CollectiveError::Unsupported { .. } => ErrorKind::Unsupported,
            CollectiveError::CacheCapacityExceeded { .. } => ErrorKind::CacheCapacityExceeded,
            CollectiveError::GroupNotFound { .. } => ErrorKind::NotFound,
            CollectiveError::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// 稳定错误码。
    ///
    /// - **契约 (What)**：返回值在小版本之间保持不变，可作为指标标签使用。
    pub fn code(&self) -> &'static str {
        match self {
            CollectiveError::NoMemory { .. } => "collective.no_memory",
            CollectiveError::InvalidParam { .. } => "collective.invalid_param",
            CollectiveError::UnknownComponent { .. } => "collective.component.unknown",
            CollectiveError::MalformedConfig { .. } => "collective.config.malformed",
            CollectiveError::Unsupported { .. } => "collective.component.unsupported",
            CollectiveError::CacheCapacityExceeded { .. } => "collective.cache.capacity",
            CollectiveError::GroupNotFound { .. } => "collective.group.missing",
            CollectiveError::Transport { .. } => "collective.transport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_component_is_an_invalid_param() {
        let err = CollectiveError::UnknownComponent {
            name: "ring".into(),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert_eq!(err.code(), "collective.component.unknown");
        assert_eq!(err.to_string(), "unknown planner component name: \"ring\"");
    }

    #[test]
    fn capacity_message_names_the_resource() {
        let err = CollectiveError::CacheCapacityExceeded {
            bucket: Some(1),
            resource: BoundedResource::RootSlots,
            limit: 96,
        };
        assert_eq!(err.kind(), ErrorKind::CacheCapacityExceeded);
        assert!(err.to_string().starts_with("root slots capacity exceeded"));
    }
}
