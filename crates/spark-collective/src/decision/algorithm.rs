use core::fmt;

use serde::Serialize;

use super::CollType;

/// 内建组件能够构建的算法。
///
/// - **契约 (What)**：[`Algorithm::Linear`] 服务所有集合类型且对任何组规模合法，是回退链的终点。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Algorithm {
    Linear,
    BinomialTree,
    KnomialTree,
    RecursiveDoubling,
    Ring,
    TopologyAware,
    Bruck,
    Pairwise,
}

impl Algorithm {
    pub const ALL: [Algorithm; 8] = [
        Algorithm::Linear,
        Algorithm::BinomialTree,
        Algorithm::KnomialTree,
        Algorithm::RecursiveDoubling,
        Algorithm::Ring,
        Algorithm::TopologyAware,
        Algorithm::Bruck,
        Algorithm::Pairwise,
    ];

    /// 配置中使用的名称。
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Linear => "linear",
            Algorithm::BinomialTree => "binomial",
            Algorithm::KnomialTree => "knomial",
            Algorithm::RecursiveDoubling => "recursive",
            Algorithm::Ring => "ring",
            Algorithm::TopologyAware => "topo",
            Algorithm::Bruck => "bruck",
            Algorithm::Pairwise => "pairwise",
        }
    }

    /// 按配置名称解析；名称已由配置层规范化为小写。
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|algo| algo.name() == name)
    }

    /// 算法是否能服务该集合类型。
    pub fn serves(self, coll: CollType) -> bool {
        use CollType::*;
        match self {
            Algorithm::Linear => true,
            Algorithm::BinomialTree => {
                matches!(coll, Barrier | Bcast | Allreduce | Reduce | Gather | Scatter)
            }
            Algorithm::KnomialTree | Algorithm::TopologyAware => {
                matches!(coll, Barrier | Bcast | Allreduce | Reduce)
            }
            Algorithm::RecursiveDoubling => matches!(coll, Barrier | Allreduce | Allgather),
            Algorithm::Ring => matches!(coll, Allreduce | Allgather),
            Algorithm::Bruck => matches!(coll, Alltoall | Allgather),
            Algorithm::Pairwise => matches!(coll, Alltoall),
        }
    }

    /// 首选算法不合法时尝试的保守默认：树友好类型走二项树，其余走线性。
    pub fn conservative_default(coll: CollType) -> Self {
        if Algorithm::BinomialTree.serves(coll) {
            Algorithm::BinomialTree
        } else {
            Algorithm::Linear
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
