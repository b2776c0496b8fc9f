use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use tracing::{debug, trace, warn};

use super::EndpointMap;
use crate::{
    cache::{CacheKey, Operation, PlanCache},
    component::{BuildRequest, PlanDescriptor},
    decision::{AlgorithmDecision, CollType, MsgSizeLevel, classify},
    error::{CollectiveError, Result},
    params::{CollectiveParams, GroupParams},
    stats::{StatsNode, StatsSnapshot},
    transport::{CompletionStatus, EndpointHandle, InterfaceSet, Launch, Transport},
    types::{CollId, GroupId, Rank},
};

/// 组的执行闸门。
///
/// # 教案式说明
/// - **意图 (Why)**：屏障执行期间新提交的调用不得启动，必须排队并按提交顺序回放；
/// - **契约 (What)**：初始为 [`GateState::Open`]；启动屏障时进入
///   [`GateState::BarrierBlocked`]，该屏障完成时回到 `Open`；
/// - **执行 (How)**：跃迁由 [`GateState::can_transition_to`] 校验。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GateState {
    #[default]
    Open,
    BarrierBlocked,
}

impl GateState {
    pub fn can_transition_to(self, target: GateState) -> bool {
        matches!(
            (self, target),
            (GateState::Open, GateState::BarrierBlocked)
                | (GateState::BarrierBlocked, GateState::Open)
        )
    }
}

/// 一次提交的去向。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// 已交给传输层执行。
    Started(CollId),
    /// 屏障未完成，已进入等待队列。
    Queued(CollId),
}

impl SubmitOutcome {
    pub fn coll(self) -> CollId {
        match self {
            SubmitOutcome::Started(coll) | SubmitOutcome::Queued(coll) => coll,
        }
    }
}

/// 回放等待队列的结果。
#[derive(Debug, Default, Eq, PartialEq)]
pub struct DrainReport {
    /// 按启动顺序排列的调用。
    pub started: Vec<CollId>,
    /// 启动失败的调用，失败不影响其后请求的回放。
    pub failed: Vec<(CollId, CollectiveError)>,
}

#[derive(Debug)]
struct PendingRequest {
    coll: CollId,
    params: CollectiveParams,
}

#[derive(Debug)]
struct InFlight {
    op: Arc<Operation>,
    endpoints: Vec<EndpointHandle>,
}

/// 通信组。
///
/// # 教案式说明
/// - **意图 (Why)**：持有一个组规划与执行所需的全部私有状态：
///   闸门、等待队列、计划缓存、统计节点与正在执行的调用；
/// - **契约 (What)**：
///   - 只能由 [`super::GroupRegistry`] 创建与销毁，外部只读访问；
///   - 集合调用 ID 单调递增、永不复用；
///   - 闸门为 `BarrierBlocked` 或队列非空时，新提交一律排队；
/// - **风险 (Trade-offs)**：启动失败的调用仍消耗一个 ID，调用方以返回的错误得知失败。
#[derive(Debug)]
pub struct Group {
    id: GroupId,
    params: GroupParams,
    next_coll: u32,
    gate: GateState,
    barrier: Option<CollId>,
    pending: VecDeque<PendingRequest>,
    interfaces: InterfaceSet,
    planner: PlanDescriptor,
    decision: AlgorithmDecision,
    cache: PlanCache,
    stats: StatsNode,
    in_flight: BTreeMap<CollId, InFlight>,
}

impl Group {
    pub(crate) fn new(
        id: GroupId,
        params: GroupParams,
        planner: PlanDescriptor,
        interfaces: InterfaceSet,
    ) -> Self {
        let options = planner.config().options();
        let decision = planner.component().decision(options);
        let cache = PlanCache::new(planner.component().cache_limits(options));
        Self {
            id,
            params,
            next_coll: 0,
            gate: GateState::Open,
            barrier: None,
            pending: VecDeque::new(),
            interfaces,
            planner,
            decision,
            cache,
            stats: StatsNode::new(id),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn params(&self) -> &GroupParams {
        &self.params
    }

    pub fn gate(&self) -> GateState {
        self.gate
    }

    pub fn is_barrier_outstanding(&self) -> bool {
        self.gate == GateState::BarrierBlocked
    }

    /// 等待队列中的调用，按提交顺序。
    pub fn pending(&self) -> Vec<CollId> {
        self.pending.iter().map(|request| request.coll).collect()
    }

    pub fn in_flight(&self) -> Vec<CollId> {
        self.in_flight.keys().copied().collect()
    }

    /// 正在执行的调用所绑定的操作。
    pub fn operation(&self, coll: CollId) -> Option<&Arc<Operation>> {
        self.in_flight.get(&coll).map(|flight| &flight.op)
    }

    /// 正在执行的调用所绑定的端点。
    pub fn endpoints(&self, coll: CollId) -> Option<&[EndpointHandle]> {
        self.in_flight
            .get(&coll)
            .map(|flight| flight.endpoints.as_slice())
    }

    pub fn interfaces(&self) -> &InterfaceSet {
        &self.interfaces
    }

    pub fn planner(&self) -> &PlanDescriptor {
        &self.planner
    }

    pub fn decision(&self) -> &AlgorithmDecision {
        &self.decision
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn validate(&self, params: &CollectiveParams) -> Result<()> {
        if params.coll_type.is_rooted() && params.coll_type.root.0 >= self.params.member_count {
            return Err(CollectiveError::invalid(format!(
                "root {} is outside group {} of {} members",
                params.coll_type.root, self.id, self.params.member_count
            )));
        }
        if !params.coll_type.is_barrier() && params.count > 0 && params.datatype.size == 0 {
            return Err(CollectiveError::invalid(format!(
                "datatype {} has zero size but {} elements were requested",
                params.datatype.id, params.count
            )));
        }
        Ok(())
    }

    fn next_coll_id(&mut self) -> Result<CollId> {
        let coll = CollId(self.next_coll);
        self.next_coll = self.next_coll.checked_add(1).ok_or_else(|| {
            CollectiveError::invalid(format!("group {} ran out of collective ids", self.id))
        })?;
        Ok(coll)
    }

    fn transition(&mut self, next: GateState) {
        if self.gate.can_transition_to(next) {
            trace!(group = %self.id, from = ?self.gate, to = ?next, "gate transition");
            self.gate = next;
        }
    }

    /// 提交一次集合调用。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：校验参数 → 分配 ID → 闸门关闭或队列非空时排队，否则立即启动；
    /// - **契约 (What)**：参数非法时不消耗 ID；启动失败返回错误，闸门与等待队列保持不变。
    pub(crate) fn submit(
        &mut self,
        params: CollectiveParams,
        transport: &mut dyn Transport,
        endpoints: &mut EndpointMap,
    ) -> Result<SubmitOutcome> {
        self.validate(&params)?;
        let coll = self.next_coll_id()?;
        if self.is_barrier_outstanding() || !self.pending.is_empty() {
            self.pending.push_back(PendingRequest { coll, params });
            self.stats.record_queued();
            trace!(
                group = %self.id,
                %coll,
                pending = self.pending.len(),
                "collective queued behind barrier"
            );
            return Ok(SubmitOutcome::Queued(coll));
        }
        self.start(coll, params, transport, endpoints)?;
        Ok(SubmitOutcome::Started(coll))
    }

    /// 启动一次调用：决策 → 缓存 → 端点 → 交给传输层。
    fn start(
        &mut self,
        coll: CollId,
        params: CollectiveParams,
        transport: &mut dyn Transport,
        endpoints: &mut EndpointMap,
    ) -> Result<()> {
        let coll_type = classify(&params.coll_type);
        let level = MsgSizeLevel::of(params.message_bytes());
        let algorithm = self.decision.decide(&self.params, &params);
        let key = CacheKey {
            coll_type,
            root: if params.coll_type.is_rooted() {
                params.coll_type.root
            } else {
                Rank(0)
            },
            level,
        };
        let request = BuildRequest {
            group: &self.params,
            coll: &params,
            algorithm,
            coll_type,
            level,
        };
        let planner = &self.planner;
        let (op, outcome) = self.cache.get_or_build(transport, key, algorithm, &params, || {
            planner
                .component()
                .build_operation(planner.config().options(), &request)
        })?;
        self.stats.record_cache(outcome);

        let mut handles = Vec::with_capacity(op.peers().len());
        for peer in op.peers() {
            let member = self.params.resolver.resolve(*peer).ok_or_else(|| {
                CollectiveError::invalid(format!("{peer} of group {} has no member index", self.id))
            })?;
            handles.push(endpoints.get_or_create(transport, member)?);
        }

        transport.launch(Launch {
            group: self.id,
            coll,
            endpoints: &handles,
            memory: op.memory(),
        })?;

        if coll_type == CollType::Barrier {
            self.barrier = Some(coll);
            self.transition(GateState::BarrierBlocked);
        }
        debug!(
            group = %self.id,
            %coll,
            %coll_type,
            %algorithm,
            op = %op.id(),
            peers = handles.len(),
            ?outcome,
            "collective started"
        );
        self.in_flight.insert(
            coll,
            InFlight {
                op,
                endpoints: handles,
            },
        );
        self.stats.record_started();
        Ok(())
    }

    /// 处理一次完成事件；若完成的是屏障，则打开闸门并回放等待队列。
    pub(crate) fn complete(
        &mut self,
        coll: CollId,
        status: &CompletionStatus,
        transport: &mut dyn Transport,
        endpoints: &mut EndpointMap,
    ) -> Result<DrainReport> {
        if self.in_flight.remove(&coll).is_none() {
            return Err(CollectiveError::invalid(format!(
                "{coll} of group {} is not in flight",
                self.id
            )));
        }
        match status {
            CompletionStatus::Done => self.stats.record_completed(true),
            CompletionStatus::Failed(reason) => {
                warn!(group = %self.id, %coll, reason = reason.as_str(), "collective failed");
                self.stats.record_completed(false);
            }
        }

        if self.barrier != Some(coll) {
            return Ok(DrainReport::default());
        }
        self.barrier = None;
        self.transition(GateState::Open);
        Ok(self.drain_pending(transport, endpoints))
    }

    /// 按提交顺序回放等待队列，每个请求之前重新检查闸门。
    pub(crate) fn drain_pending(
        &mut self,
        transport: &mut dyn Transport,
        endpoints: &mut EndpointMap,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        while !self.is_barrier_outstanding() {
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            match self.start(request.coll, request.params, transport, endpoints) {
                Ok(()) => report.started.push(request.coll),
                Err(err) => {
                    warn!(
                        group = %self.id,
                        coll = %request.coll,
                        code = err.code(),
                        error = %err,
                        "queued collective failed to start"
                    );
                    report.failed.push((request.coll, err));
                }
            }
        }
        report
    }

    /// 归还缓存中全部操作的内存句柄，返回最终统计。
    pub(crate) fn teardown(&mut self, transport: &mut dyn Transport) -> StatsSnapshot {
        self.cache.clear(transport);
        if !self.pending.is_empty() || !self.in_flight.is_empty() {
            debug!(
                group = %self.id,
                pending = self.pending.len(),
                in_flight = self.in_flight.len(),
                "group destroyed with outstanding collectives"
            );
        }
        self.pending.clear();
        self.in_flight.clear();
        self.stats.snapshot()
    }
}
