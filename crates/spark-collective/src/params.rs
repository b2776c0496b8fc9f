//! 组参数与集合调用参数。
//!
//! ## 核心意图（Why）
//! - 为决策引擎、计划缓存与组注册表提供共同的输入词汇；
//! - 集合类型由修饰位组合表达（与 MPI 语义对齐），而不是穷举枚举，便于组件自定义新组合。
//!
//! ## 行为契约（What）
//! - [`CollectiveParams::message_bytes`] 是消息大小分级的唯一依据；
//! - [`GroupParams`] 中的成员解析能力把组内 rank 映射为 worker 级的 [`MemberIndex`]，
//!   从而让多个组共享同一端点表。

use core::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    error::{CollectiveError, Result},
    types::{MemberIndex, Rank},
};

bitflags! {
    /// 集合类型修饰位。
    ///
    /// - **契约 (What)**：单个位描述数据流的一个侧面，分类函数只读取这些位与根 rank 无关。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Modifiers: u16 {
        /// 数据由单一源成员发出（bcast、scatter）。
        const SINGLE_SOURCE = 1 << 0;
        /// 数据汇聚到单一目的成员（reduce、gather）。
        const SINGLE_DESTINATION = 1 << 1;
        /// 数据在传输过程中做归约运算。
        const AGGREGATE = 1 << 2;
        /// 结果对所有成员可见。
        const BROADCAST = 1 << 3;
        /// 纯同步，无数据负载。
        const BARRIER = 1 << 4;
        /// 每个成员与其他全部成员交换独立数据块。
        const ALLTOALL = 1 << 5;
        /// 各成员的数据块长度不同（v 系列）。
        const VARIABLE_LENGTH = 1 << 6;
    }
}

/// 集合类型：修饰位加根 rank。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct CollectiveType {
    pub modifiers: Modifiers,
    pub root: Rank,
}

impl CollectiveType {
    pub const fn new(modifiers: Modifiers, root: Rank) -> Self {
        Self { modifiers, root }
    }

    pub fn barrier() -> Self {
        Self::new(Modifiers::BARRIER, Rank(0))
    }

    pub fn bcast(root: Rank) -> Self {
        Self::new(Modifiers::SINGLE_SOURCE | Modifiers::BROADCAST, root)
    }

    pub fn reduce(root: Rank) -> Self {
        Self::new(Modifiers::AGGREGATE | Modifiers::SINGLE_DESTINATION, root)
    }

    pub fn allreduce() -> Self {
        Self::new(Modifiers::AGGREGATE | Modifiers::BROADCAST, Rank(0))
    }

    pub fn gather(root: Rank) -> Self {
        Self::new(Modifiers::SINGLE_DESTINATION, root)
    }

    pub fn scatter(root: Rank) -> Self {
        Self::new(Modifiers::SINGLE_SOURCE, root)
    }

    pub fn allgather() -> Self {
        Self::new(Modifiers::BROADCAST, Rank(0))
    }

    pub fn alltoall() -> Self {
        Self::new(Modifiers::ALLTOALL, Rank(0))
    }

    /// 是否带根（数据从某个成员发出或汇聚到某个成员）。
    pub fn is_rooted(&self) -> bool {
        self.modifiers
            .intersects(Modifiers::SINGLE_SOURCE | Modifiers::SINGLE_DESTINATION)
    }

    pub fn is_barrier(&self) -> bool {
        self.modifiers.contains(Modifiers::BARRIER)
    }
}

/// 数据类型描述：外部 datatype 标识加单元素字节数。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DataType {
    pub id: u32,
    pub size: usize,
}

impl DataType {
    pub const fn new(id: u32, size: usize) -> Self {
        Self { id, size }
    }

    /// 屏障等无负载集合使用的零字节类型。
    pub const NONE: DataType = DataType::new(0, 0);
}

/// 调用方缓冲区的地址区间。
///
/// - **契约 (What)**：仅作为身份与长度信息，核心从不解引用 `addr`。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct MemoryRegion {
    pub addr: usize,
    pub len: usize,
}

impl MemoryRegion {
    pub const fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    pub const EMPTY: MemoryRegion = MemoryRegion::new(0, 0);

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 一次集合调用的完整参数。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CollectiveParams {
    pub coll_type: CollectiveType,
    pub datatype: DataType,
    pub count: usize,
    pub send: MemoryRegion,
    pub recv: MemoryRegion,
}

impl CollectiveParams {
    /// 构造无负载的屏障参数。
    pub fn barrier() -> Self {
        Self {
            coll_type: CollectiveType::barrier(),
            datatype: DataType::NONE,
            count: 0,
            send: MemoryRegion::EMPTY,
            recv: MemoryRegion::EMPTY,
        }
    }

    /// 构造带负载的集合参数；发送与接收缓冲由调用方给出。
    pub fn new(
        coll_type: CollectiveType,
        datatype: DataType,
        count: usize,
        send: MemoryRegion,
        recv: MemoryRegion,
    ) -> Self {
        Self {
            coll_type,
            datatype,
            count,
            send,
            recv,
        }
    }

    /// 单个成员贡献的消息字节数，溢出时饱和。
    pub fn message_bytes(&self) -> usize {
        self.count.saturating_mul(self.datatype.size)
    }
}

/// 组的物理拓扑提示。
///
/// - `nodes`：组跨越的节点数；`ppn`：每节点进程数。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Topology {
    pub nodes: u32,
    pub ppn: u32,
}

impl Topology {
    /// 拓扑是否真正分层，且 `nodes × ppn` 恰好覆盖 `members` 个成员。
    pub fn covers(&self, members: u32) -> bool {
        self.nodes > 1
            && self.ppn > 1
            && u64::from(self.nodes) * u64::from(self.ppn) == u64::from(members)
    }
}

/// 组内 rank 到 worker 级成员下标的解析能力。
pub trait MemberResolver: fmt::Debug + Send + Sync {
    /// 解析 rank；越界时返回 `None`。
    fn resolve(&self, rank: Rank) -> Option<MemberIndex>;
}

/// 恒等解析：rank `r` 对应成员 `r`，适用于覆盖全部进程的世界组。
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityResolver;

impl MemberResolver for IdentityResolver {
    fn resolve(&self, rank: Rank) -> Option<MemberIndex> {
        Some(MemberIndex(u64::from(rank.0)))
    }
}

/// 查表解析：第 `r` 项即 rank `r` 的成员下标，适用于子组。
#[derive(Clone, Debug, Default)]
pub struct TableResolver {
    members: Vec<MemberIndex>,
}

impl TableResolver {
    pub fn new(members: Vec<MemberIndex>) -> Self {
        Self { members }
    }
}

impl MemberResolver for TableResolver {
    fn resolve(&self, rank: Rank) -> Option<MemberIndex> {
        self.members.get(rank.index()).copied()
    }
}

/// 组参数。
///
/// # 教案式说明
/// - **意图 (Why)**：组创建后参数不再变化，后续建连与算法决策都从这里读取；
/// - **契约 (What)**：`my_rank < member_count`，`member_count >= 1`，由 [`GroupParams::validate`] 校验；
/// - **风险 (Trade-offs)**：解析器以 `Arc` 共享，克隆参数时不会复制成员表。
#[derive(Clone, Debug)]
pub struct GroupParams {
    pub member_count: u32,
    pub my_rank: Rank,
    pub topology: Option<Topology>,
    pub resolver: Arc<dyn MemberResolver>,
}

impl GroupParams {
    /// 以恒等解析器构造参数。
    pub fn new(member_count: u32, my_rank: Rank) -> Self {
        Self {
            member_count,
            my_rank,
            topology: None,
            resolver: Arc::new(IdentityResolver),
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn MemberResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// 校验组参数自洽。
    pub fn validate(&self) -> Result<()> {
        if self.member_count == 0 {
            return Err(CollectiveError::invalid("group must have at least one member"));
        }
        if self.my_rank.0 >= self.member_count {
            return Err(CollectiveError::invalid(format!(
                "my rank {} is outside a group of {} members",
                self.my_rank.0, self.member_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_bytes_saturates() {
        let params = CollectiveParams::new(
            CollectiveType::allreduce(),
            DataType::new(1, 8),
            usize::MAX,
            MemoryRegion::EMPTY,
            MemoryRegion::EMPTY,
        );
        assert_eq!(params.message_bytes(), usize::MAX);
    }

    #[test]
    fn table_resolver_maps_ranks_to_members() {
        let resolver = TableResolver::new(vec![MemberIndex(7), MemberIndex(3)]);
        assert_eq!(resolver.resolve(Rank(1)), Some(MemberIndex(3)));
        assert_eq!(resolver.resolve(Rank(2)), None);
    }

    #[test]
    fn group_params_reject_rank_outside_group() {
        assert!(GroupParams::new(4, Rank(3)).validate().is_ok());
        assert!(GroupParams::new(4, Rank(4)).validate().is_err());
        assert!(GroupParams::new(0, Rank(0)).validate().is_err());
    }
}
