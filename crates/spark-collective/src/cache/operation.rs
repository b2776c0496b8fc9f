use core::fmt;

use serde::Serialize;

use crate::{
    decision::{Algorithm, CollType, MsgSizeLevel},
    params::{CollectiveParams, DataType, MemoryRegion},
    transport::MemoryHandle,
    types::Rank,
};

/// 缓存分配给每个操作的标识，在一个缓存内单调递增。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// 一次调用的形状：决定缓存操作能否复用的全部缓冲信息。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OperationShape {
    pub datatype: DataType,
    pub count: usize,
    pub send: MemoryRegion,
    pub recv: MemoryRegion,
}

impl OperationShape {
    pub fn of(coll: &CollectiveParams) -> Self {
        Self {
            datatype: coll.datatype,
            count: coll.count,
            send: coll.send,
            recv: coll.recv,
        }
    }

    /// 需要注册到传输层的缓冲区；空区间跳过，收发同址只注册一次。
    pub fn regions(&self) -> impl Iterator<Item = MemoryRegion> {
        let recv = (self.recv != self.send).then_some(self.recv);
        [Some(self.send), recv]
            .into_iter()
            .flatten()
            .filter(|region| !region.is_empty())
    }
}

/// 计划绑定到一次具体调用形状后的可执行实例。
///
/// # 教案式说明
/// - **意图 (Why)**：构建操作需要算连接集合、注册内存，代价远高于一次查表；
///   同形状的重复调用应直接复用；
/// - **契约 (What)**：
///   - 由组件通过 [`Operation::new`] 构建，内存句柄与标识由缓存在入槽时绑定；
///   - [`Operation::can_reuse`] 同时比较算法、桶、级别、根与形状，仅凭根相等不构成复用条件；
/// - **风险 (Trade-offs)**：形状按缓冲区地址与长度比较，同址但内容变化的缓冲仍视为可复用，
///   这与传输层“注册的是地址区间”的语义一致。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    id: OperationId,
    algorithm: Algorithm,
    coll_type: CollType,
    level: MsgSizeLevel,
    root: Rank,
    shape: OperationShape,
    peers: Vec<Rank>,
    memory: Vec<MemoryHandle>,
}

impl Operation {
    /// 由组件构建尚未入槽的操作。
    ///
    /// `peers` 为本成员需要建立端点的对端 rank（连接集合）。
    pub fn new(
        algorithm: Algorithm,
        coll_type: CollType,
        level: MsgSizeLevel,
        coll: &CollectiveParams,
        peers: Vec<Rank>,
    ) -> Self {
        Self {
            id: OperationId(0),
            algorithm,
            coll_type,
            level,
            root: coll.coll_type.root,
            shape: OperationShape::of(coll),
            peers,
            memory: Vec::new(),
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn coll_type(&self) -> CollType {
        self.coll_type
    }

    pub fn level(&self) -> MsgSizeLevel {
        self.level
    }

    pub fn root(&self) -> Rank {
        self.root
    }

    pub fn shape(&self) -> &OperationShape {
        &self.shape
    }

    pub fn peers(&self) -> &[Rank] {
        &self.peers
    }

    pub fn memory(&self) -> &[MemoryHandle] {
        &self.memory
    }

    /// 复用判定。
    pub fn can_reuse(
        &self,
        algorithm: Algorithm,
        coll_type: CollType,
        level: MsgSizeLevel,
        coll: &CollectiveParams,
    ) -> bool {
        self.algorithm == algorithm
            && self.coll_type == coll_type
            && self.level == level
            && self.root == coll.coll_type.root
            && self.shape == OperationShape::of(coll)
    }

    pub(crate) fn bind(&mut self, id: OperationId, memory: Vec<MemoryHandle>) {
        self.id = id;
        self.memory = memory;
    }
}
