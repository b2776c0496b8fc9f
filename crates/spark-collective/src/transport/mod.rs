//! 传输协作方契约。
//!
//! # 设计动机（Why）
//! - 核心只负责“规划”，真正的建连、编码与数据搬运由外部传输层完成；
//!   本模块定义二者之间的最小句柄与回调面；
//! - 句柄全部是不透明的整数新类型，核心只存储与查找，从不解释其含义。
//!
//! # 契约说明（What）
//! - [`Transport`] 由 worker 独占（`&mut self`），在单线程推进模型下调用，无需内部加锁；
//! - 接口句柄集合有上限 [`MAX_INTERFACES`]，超出时返回
//!   [`CollectiveError::CacheCapacityExceeded`]。

pub mod loopback;

use core::fmt;

use crate::{
    error::{BoundedResource, CollectiveError, Result},
    params::MemoryRegion,
    types::{CollId, GroupId, MemberIndex},
};

/// 注册表与单个组可持有的接口句柄上限。
pub const MAX_INTERFACES: usize = 8;

/// 传输接口句柄。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct InterfaceHandle(pub u64);

/// 端点句柄，对应一个远端成员的连接。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct EndpointHandle(pub u64);

/// 内存注册句柄，把缓冲区绑定到传输层的内存域。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct MemoryHandle(pub u64);

/// 交给传输层启动的一次集合执行。
#[derive(Clone, Copy, Debug)]
pub struct Launch<'a> {
    pub group: GroupId,
    pub coll: CollId,
    pub endpoints: &'a [EndpointHandle],
    pub memory: &'a [MemoryHandle],
}

/// 传输层报告的完成结果。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompletionStatus {
    Done,
    Failed(String),
}

/// 一条完成事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Completion {
    pub group: GroupId,
    pub coll: CollId,
    pub status: CompletionStatus,
}

/// 传输协作方。
///
/// ### 设计目的（Why）
/// - 把“端点从哪里来”“内存如何注册”“数据何时搬完”三件事委托给外部实现；
///
/// ### 契约说明（What）
/// - `create_endpoint` 对同一成员可能被多次调用时由核心去重，实现者无需缓存；
/// - `register_memory` 成功返回的句柄必须由核心通过 `deregister_memory` 归还；
/// - `launch` 只负责把执行交给传输层，不得阻塞；完成通过 `poll_completions` 异步报告。
pub trait Transport: Send {
    /// 当前可用的接口句柄。
    fn interfaces(&self) -> Vec<InterfaceHandle>;

    fn create_endpoint(&mut self, member: MemberIndex) -> Result<EndpointHandle>;

    fn register_memory(&mut self, region: &MemoryRegion) -> Result<MemoryHandle>;

    fn deregister_memory(&mut self, handle: MemoryHandle);

    fn launch(&mut self, launch: Launch<'_>) -> Result<()>;

    /// 取走自上次调用以来的完成事件。
    fn poll_completions(&mut self) -> Vec<Completion>;
}

/// 有界的接口句柄集合。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InterfaceSet {
    handles: Vec<InterfaceHandle>,
}

impl InterfaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加句柄；重复句柄被忽略。
    pub fn push(&mut self, handle: InterfaceHandle) -> Result<()> {
        if self.handles.contains(&handle) {
            return Ok(());
        }
        if self.handles.len() == MAX_INTERFACES {
            return Err(CollectiveError::CacheCapacityExceeded {
                bucket: None,
                resource: BoundedResource::Interfaces,
                limit: MAX_INTERFACES,
            });
        }
        self.handles.push(handle);
        Ok(())
    }

    /// 从迭代器构建，超过上限时整体失败。
    pub fn try_from_iter(handles: impl IntoIterator<Item = InterfaceHandle>) -> Result<Self> {
        let mut set = Self::new();
        for handle in handles {
            set.push(handle)?;
        }
        Ok(set)
    }

    pub fn as_slice(&self) -> &[InterfaceHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl fmt::Display for InterfaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} interfaces", self.handles.len(), MAX_INTERFACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_set_is_bounded() {
        let mut set = InterfaceSet::try_from_iter((0..8).map(InterfaceHandle)).unwrap();
        assert_eq!(set.len(), MAX_INTERFACES);
        set.push(InterfaceHandle(3)).unwrap();
        let err = set.push(InterfaceHandle(8)).unwrap_err();
        assert_eq!(
            err,
            CollectiveError::CacheCapacityExceeded {
                bucket: None,
                resource: BoundedResource::Interfaces,
                limit: MAX_INTERFACES,
            }
        );
        assert_eq!(set.len(), MAX_INTERFACES);
    }
}
