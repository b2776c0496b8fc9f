//! # 算法决策引擎
//!
//! ## 核心意图（Why）
//! - 每次集合调用都要回答“用哪个算法”；答案决定了计划缓存的键与构建出的操作；
//! - 把“最佳猜测”（[`AlgorithmDecision::auto_select`]）与“是否合法”
//!   （[`AlgorithmDecision::check_fallback`]）拆开，二者可以独立测试。
//!
//! ## 行为契约（What）
//! - [`classify`] 只读取修饰位，与拓扑、根 rank 无关，结果作为缓存桶下标；
//! - [`MsgSizeLevel::of`] 以 [`MED_MSG_SIZE`] 为界分级；
//! - [`AlgorithmDecision::decide`] 从不失败：回退链最终落到总是合法的 [`Algorithm::Linear`]；
//! - 同样的输入必定得到同样的输出，缓存正确性依赖这一点。

mod algorithm;

pub use algorithm::Algorithm;

use core::fmt;

use serde::Serialize;
use tracing::trace;

use crate::params::{CollectiveParams, CollectiveType, GroupParams, Modifiers};

/// 计划缓存桶的数量上限。
pub const MAX_COLL_TYPE_BUCKETS: usize = 16;

/// 短消息与中长消息的分界（字节）。
pub const MED_MSG_SIZE: usize = 8192;

/// 消息大小级别数量。
pub const MSG_SIZE_LEVELS: usize = 2;

/// 集合类型分类，同时是缓存桶下标。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CollType {
    Barrier,
    Bcast,
    Allreduce,
    Reduce,
    Gather,
    Gatherv,
    Scatter,
    Scatterv,
    Allgather,
    Allgatherv,
    Alltoall,
    Alltoallv,
    /// 无法归类的修饰位组合，只能走线性算法。
    Other,
}

impl CollType {
    pub const ALL: [CollType; 13] = [
        CollType::Barrier,
        CollType::Bcast,
        CollType::Allreduce,
        CollType::Reduce,
        CollType::Gather,
        CollType::Gatherv,
        CollType::Scatter,
        CollType::Scatterv,
        CollType::Allgather,
        CollType::Allgatherv,
        CollType::Alltoall,
        CollType::Alltoallv,
        CollType::Other,
    ];

    /// 缓存桶下标，恒小于 [`MAX_COLL_TYPE_BUCKETS`]。
    pub fn bucket(self) -> usize {
        self as usize
    }

    /// 是否带根。
    pub fn is_rooted(self) -> bool {
        matches!(
            self,
            CollType::Bcast
                | CollType::Reduce
                | CollType::Gather
                | CollType::Gatherv
                | CollType::Scatter
                | CollType::Scatterv
        )
    }
}

impl fmt::Display for CollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollType::Barrier => "barrier",
            CollType::Bcast => "bcast",
            CollType::Allreduce => "allreduce",
            CollType::Reduce => "reduce",
            CollType::Gather => "gather",
            CollType::Gatherv => "gatherv",
            CollType::Scatter => "scatter",
            CollType::Scatterv => "scatterv",
            CollType::Allgather => "allgather",
            CollType::Allgatherv => "allgatherv",
            CollType::Alltoall => "alltoall",
            CollType::Alltoallv => "alltoallv",
            CollType::Other => "other",
        };
        f.write_str(name)
    }
}

/// 按修饰位归类集合类型。
///
/// # 教案式说明
/// - **意图 (Why)**：缓存桶必须是请求类型的纯函数，否则同一类型的调用会散落到不同桶；
/// - **执行 (How)**：先判定屏障与全交换，再按“源/汇/归约/广播”位组合匹配；
///   `VARIABLE_LENGTH` 把定长类型映射到对应的 v 版本；
/// - **契约 (What)**：任何修饰位组合都有确定结果，未识别组合归入 [`CollType::Other`]。
pub fn classify(coll_type: &CollectiveType) -> CollType {
    let bits = coll_type.modifiers;
    let variable = bits.contains(Modifiers::VARIABLE_LENGTH);
    let shape = bits
        & (Modifiers::SINGLE_SOURCE
            | Modifiers::SINGLE_DESTINATION
            | Modifiers::AGGREGATE
            | Modifiers::BROADCAST);

    if bits.contains(Modifiers::BARRIER) {
        return if shape.is_empty() && !variable && !bits.contains(Modifiers::ALLTOALL) {
            CollType::Barrier
        } else {
            CollType::Other
        };
    }
    if bits.contains(Modifiers::ALLTOALL) {
        return match (shape.is_empty(), variable) {
            (true, false) => CollType::Alltoall,
            (true, true) => CollType::Alltoallv,
            _ => CollType::Other,
        };
    }

    let source = Modifiers::SINGLE_SOURCE;
    let destination = Modifiers::SINGLE_DESTINATION;
    let aggregate = Modifiers::AGGREGATE;
    let broadcast = Modifiers::BROADCAST;

    match (shape, variable) {
        (s, false) if s == source | broadcast => CollType::Bcast,
        (s, false) if s == aggregate | broadcast => CollType::Allreduce,
        (s, false) if s == aggregate | destination => CollType::Reduce,
        (s, false) if s == destination => CollType::Gather,
        (s, true) if s == destination => CollType::Gatherv,
        (s, false) if s == source => CollType::Scatter,
        (s, true) if s == source => CollType::Scatterv,
        (s, false) if s == broadcast => CollType::Allgather,
        (s, true) if s == broadcast => CollType::Allgatherv,
        _ => CollType::Other,
    }
}

/// 消息大小级别。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum MsgSizeLevel {
    /// 小于 [`MED_MSG_SIZE`] 字节。
    Short = 0,
    /// 不小于 [`MED_MSG_SIZE`] 字节。
    Medium = 1,
}

impl MsgSizeLevel {
    pub fn of(bytes: usize) -> Self {
        if bytes < MED_MSG_SIZE {
            MsgSizeLevel::Short
        } else {
            MsgSizeLevel::Medium
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// 决策可调参数，来自内建组件的配置。
///
/// - `forced`：按集合类型强制指定的算法，`None` 表示自动选择；
/// - `knomial_degree`：k 叉树的分支度。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecisionConfig {
    pub knomial_degree: u32,
    pub forced_barrier: Option<Algorithm>,
    pub forced_bcast: Option<Algorithm>,
    pub forced_allreduce: Option<Algorithm>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            knomial_degree: 4,
            forced_barrier: None,
            forced_bcast: None,
            forced_allreduce: None,
        }
    }
}

impl DecisionConfig {
    fn forced(&self, coll: CollType) -> Option<Algorithm> {
        match coll {
            CollType::Barrier => self.forced_barrier,
            CollType::Bcast => self.forced_bcast,
            CollType::Allreduce => self.forced_allreduce,
            _ => None,
        }
    }
}

/// 算法决策器。
///
/// # 教案式说明
/// - **意图 (Why)**：持有决策所需的全部可调参数，使决策本身成为无副作用的方法；
/// - **契约 (What)**：不持有可变状态，`decide` 对相同输入返回相同结果；
/// - **风险 (Trade-offs)**：规则是静态表，不做在线调优；需要调优时通过配置强制算法。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AlgorithmDecision {
    config: DecisionConfig,
}

impl AlgorithmDecision {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// 按类型、消息大小与拓扑给出首选算法。
    ///
    /// - **执行 (How)**：配置强制优先；否则按下表挑选：
    ///   屏障优先拓扑感知，其次递归倍增（2 的幂），否则 k 叉树；
    ///   短消息广播/归约走二项树或拓扑感知，中长消息走 k 叉树；
    ///   短消息全归约走递归倍增，中长消息走环；全收集同理；全交换短消息用 Bruck，长消息用成对交换；
    ///   其他类型走二项树或线性。
    pub fn auto_select(&self, group: &GroupParams, coll: &CollectiveParams) -> Algorithm {
        let coll_type = classify(&coll.coll_type);
        if let Some(forced) = self.config.forced(coll_type) {
            return forced;
        }

        let level = MsgSizeLevel::of(coll.message_bytes());
        let topology_aware = group
            .topology
            .is_some_and(|topology| topology.covers(group.member_count));
        let power_of_two = group.member_count.is_power_of_two();

        match (coll_type, level) {
            (CollType::Barrier, _) if topology_aware => Algorithm::TopologyAware,
            (CollType::Barrier, _) if power_of_two => Algorithm::RecursiveDoubling,
            (CollType::Barrier, _) => Algorithm::KnomialTree,
            (CollType::Bcast | CollType::Reduce, MsgSizeLevel::Short) if topology_aware => {
                Algorithm::TopologyAware
            }
            (CollType::Bcast | CollType::Reduce, MsgSizeLevel::Short) => Algorithm::BinomialTree,
            (CollType::Bcast | CollType::Reduce, MsgSizeLevel::Medium) => Algorithm::KnomialTree,
            (CollType::Allreduce, MsgSizeLevel::Short) if power_of_two => {
                Algorithm::RecursiveDoubling
            }
            (CollType::Allreduce, MsgSizeLevel::Short) if topology_aware => {
                Algorithm::TopologyAware
            }
            (CollType::Allreduce, MsgSizeLevel::Short) => Algorithm::BinomialTree,
            (CollType::Allreduce, MsgSizeLevel::Medium) => Algorithm::Ring,
            (CollType::Allgather, MsgSizeLevel::Short) => Algorithm::RecursiveDoubling,
            (CollType::Allgather, MsgSizeLevel::Medium) => Algorithm::Ring,
            (CollType::Alltoall, MsgSizeLevel::Short) => Algorithm::Bruck,
            (CollType::Alltoall, MsgSizeLevel::Medium) => Algorithm::Pairwise,
            (CollType::Gather | CollType::Scatter, _) => Algorithm::BinomialTree,
            _ => Algorithm::Linear,
        }
    }

    /// 校验算法对本组与本次调用是否合法，不合法时回退。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：有些约束只有在选定算法后才有意义（如环算法要求元素数不少于成员数）；
    /// - **执行 (How)**：先尝试原算法，再尝试该类型的保守默认，最后落到线性算法；
    /// - **契约 (What)**：对已合法的算法原样返回。
    pub fn check_fallback(
        &self,
        group: &GroupParams,
        coll: &CollectiveParams,
        algo: Algorithm,
    ) -> Algorithm {
        let coll_type = classify(&coll.coll_type);
        if self.is_legal(group, coll, coll_type, algo) {
            return algo;
        }
        let fallback = Algorithm::conservative_default(coll_type);
        let chosen = if self.is_legal(group, coll, coll_type, fallback) {
            fallback
        } else {
            Algorithm::Linear
        };
        trace!(
            %coll_type,
            rejected = %algo,
            %chosen,
            members = group.member_count,
            "algorithm fell back"
        );
        chosen
    }

    /// 组合入口：分类 → 首选 → 回退校验。
    pub fn decide(&self, group: &GroupParams, coll: &CollectiveParams) -> Algorithm {
        let preferred = self.auto_select(group, coll);
        self.check_fallback(group, coll, preferred)
    }

    fn is_legal(
        &self,
        group: &GroupParams,
        coll: &CollectiveParams,
        coll_type: CollType,
        algo: Algorithm,
    ) -> bool {
        if !algo.serves(coll_type) {
            return false;
        }
        if algo == Algorithm::Linear {
            return true;
        }

        let members = group.member_count;
        if members < 2 {
            return false;
        }
        let root = coll.coll_type.root.0;
        if coll_type.is_rooted() && root >= members {
            return false;
        }

        match algo {
            Algorithm::RecursiveDoubling => members.is_power_of_two(),
            Algorithm::Ring => coll.count >= members as usize,
            Algorithm::KnomialTree => {
                let degree = self.config.knomial_degree;
                degree >= 2 && degree <= members
            }
            Algorithm::TopologyAware => match group.topology {
                Some(topology) if topology.covers(members) => {
                    !coll_type.is_rooted() || root < topology.ppn
                }
                _ => false,
            },
            Algorithm::BinomialTree
            | Algorithm::Bruck
            | Algorithm::Pairwise
            | Algorithm::Linear => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::{DataType, MemoryRegion, Topology},
        types::Rank,
    };

    fn params(coll_type: CollectiveType, count: usize) -> CollectiveParams {
        CollectiveParams::new(
            coll_type,
            DataType::new(1, 1),
            count,
            MemoryRegion::new(0x1000, count),
            MemoryRegion::new(0x9000, count),
        )
    }

    #[test]
    fn classification_covers_named_collectives() {
        assert_eq!(classify(&CollectiveType::barrier()), CollType::Barrier);
        assert_eq!(classify(&CollectiveType::bcast(Rank(3))), CollType::Bcast);
        assert_eq!(classify(&CollectiveType::allreduce()), CollType::Allreduce);
        assert_eq!(classify(&CollectiveType::reduce(Rank(1))), CollType::Reduce);
        assert_eq!(classify(&CollectiveType::gather(Rank(0))), CollType::Gather);
        assert_eq!(classify(&CollectiveType::scatter(Rank(0))), CollType::Scatter);
        assert_eq!(classify(&CollectiveType::allgather()), CollType::Allgather);
        assert_eq!(classify(&CollectiveType::alltoall()), CollType::Alltoall);
        let alltoallv = CollectiveType::new(
            Modifiers::ALLTOALL | Modifiers::VARIABLE_LENGTH,
            Rank(0),
        );
        assert_eq!(classify(&alltoallv), CollType::Alltoallv);
        let odd = CollectiveType::new(Modifiers::BARRIER | Modifiers::AGGREGATE, Rank(0));
        assert_eq!(classify(&odd), CollType::Other);
    }

    #[test]
    fn classification_ignores_root() {
        assert_eq!(
            classify(&CollectiveType::bcast(Rank(0))),
            classify(&CollectiveType::bcast(Rank(77)))
        );
    }

    #[test]
    fn buckets_fit_the_cache() {
        for coll in CollType::ALL {
            assert!(coll.bucket() < MAX_COLL_TYPE_BUCKETS);
        }
    }

    #[test]
    fn size_level_boundary_is_8192() {
        assert_eq!(MsgSizeLevel::of(0), MsgSizeLevel::Short);
        assert_eq!(MsgSizeLevel::of(8191), MsgSizeLevel::Short);
        assert_eq!(MsgSizeLevel::of(8192), MsgSizeLevel::Medium);
        assert_eq!(MsgSizeLevel::of(usize::MAX), MsgSizeLevel::Medium);
        assert_eq!(MsgSizeLevel::of(8191).index(), 0);
        assert_eq!(MsgSizeLevel::of(8192).index(), 1);
    }

    #[test]
    fn allreduce_switches_to_ring_for_long_messages() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(6, Rank(0));
        assert_eq!(
            decision.decide(&group, &params(CollectiveType::allreduce(), 64)),
            Algorithm::BinomialTree
        );
        assert_eq!(
            decision.decide(&group, &params(CollectiveType::allreduce(), 8192)),
            Algorithm::Ring
        );
    }

    #[test]
    fn ring_falls_back_when_count_is_smaller_than_group() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(6, Rank(0));
        let mut coll = params(CollectiveType::allreduce(), 4);
        coll.datatype = DataType::new(2, 4096);
        assert_eq!(decision.auto_select(&group, &coll), Algorithm::Ring);
        assert_eq!(decision.decide(&group, &coll), Algorithm::BinomialTree);
    }

    #[test]
    fn forced_algorithm_still_goes_through_fallback() {
        let decision = AlgorithmDecision::new(DecisionConfig {
            forced_allreduce: Some(Algorithm::RecursiveDoubling),
            ..DecisionConfig::default()
        });
        let pow2 = GroupParams::new(8, Rank(0));
        let odd = GroupParams::new(6, Rank(0));
        let coll = params(CollectiveType::allreduce(), 100_000);
        assert_eq!(decision.decide(&pow2, &coll), Algorithm::RecursiveDoubling);
        assert_eq!(decision.decide(&odd, &coll), Algorithm::BinomialTree);
    }

    #[test]
    fn topology_aware_bcast_requires_root_on_first_node() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(8, Rank(0)).with_topology(Topology { nodes: 2, ppn: 4 });
        assert_eq!(
            decision.decide(&group, &params(CollectiveType::bcast(Rank(2)), 16)),
            Algorithm::TopologyAware
        );
        assert_eq!(
            decision.decide(&group, &params(CollectiveType::bcast(Rank(5)), 16)),
            Algorithm::BinomialTree
        );
    }

    #[test]
    fn topology_that_does_not_cover_the_group_is_illegal() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(3, Rank(0)).with_topology(Topology { nodes: 2, ppn: 4 });
        let barrier = params(CollectiveType::barrier(), 0);
        assert_eq!(decision.auto_select(&group, &barrier), Algorithm::KnomialTree);
        assert_eq!(
            decision.check_fallback(&group, &barrier, Algorithm::TopologyAware),
            Algorithm::BinomialTree
        );

        let forced = AlgorithmDecision::new(DecisionConfig {
            forced_barrier: Some(Algorithm::TopologyAware),
            ..DecisionConfig::default()
        });
        assert_ne!(forced.decide(&group, &barrier), Algorithm::TopologyAware);
    }

    #[test]
    fn single_member_group_always_gets_linear() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(1, Rank(0));
        for coll_type in [
            CollectiveType::barrier(),
            CollectiveType::allreduce(),
            CollectiveType::bcast(Rank(0)),
        ] {
            assert_eq!(
                decision.decide(&group, &params(coll_type, 1 << 20)),
                Algorithm::Linear
            );
        }
    }

    #[test]
    fn out_of_range_root_falls_back_to_linear() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(4, Rank(0));
        let coll = params(CollectiveType::bcast(Rank(9)), 16);
        assert_eq!(decision.decide(&group, &coll), Algorithm::Linear);
    }

    #[test]
    fn check_fallback_keeps_legal_choice() {
        let decision = AlgorithmDecision::default();
        let group = GroupParams::new(8, Rank(0));
        let coll = params(CollectiveType::allreduce(), 64);
        for algo in [
            Algorithm::RecursiveDoubling,
            Algorithm::BinomialTree,
            Algorithm::KnomialTree,
            Algorithm::Ring,
            Algorithm::Linear,
        ] {
            assert_eq!(decision.check_fallback(&group, &coll, algo), algo);
        }
    }
}
