use std::{collections::BTreeMap, mem, sync::Arc};

use tracing::{debug, info, warn};

use super::{DrainReport, EndpointMap, Group, SubmitOutcome};
use crate::{
    component::{ComponentRegistry, PlanDescriptorSet},
    error::{CollectiveError, Result},
    params::{CollectiveParams, GroupParams},
    stats::{StatsSink, StatsSnapshot},
    transport::{CompletionStatus, EndpointHandle, InterfaceSet, Transport},
    types::{CollId, GroupId, MemberIndex},
};

/// 一次推进的结果。
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Progress {
    /// 本次处理的完成事件。
    pub completed: Vec<(GroupId, CollId, CompletionStatus)>,
    /// 因屏障完成而从等待队列启动的调用，按启动顺序。
    pub started: Vec<(GroupId, CollId)>,
    /// 从等待队列启动失败的调用。
    pub failed: Vec<(GroupId, CollId, CollectiveError)>,
}

impl Progress {
    pub fn is_idle(&self) -> bool {
        self.completed.is_empty() && self.started.is_empty() && self.failed.is_empty()
    }

    fn absorb(&mut self, group: GroupId, report: DrainReport) {
        self.started
            .extend(report.started.into_iter().map(|coll| (group, coll)));
        self.failed
            .extend(report.failed.into_iter().map(|(coll, err)| (group, coll, err)));
    }
}

/// worker 级的组与端点注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：以显式拥有的上下文对象代替进程级全局状态，
///   每个 worker 一个实例，随 worker 创建与销毁；
/// - **契约 (What)**：
///   - 组 ID 单调递增，销毁后不复用；
///   - 端点表被全部组共享，只增不删；
///   - 所有方法在 worker 的推进线程上调用，内部不加锁；
/// - **执行 (How)**：组按 ID 有序存放；传输协作方以 `Box<dyn Transport>` 独占持有；
/// - **风险 (Trade-offs)**：注册表被丢弃时会拆除剩余的组，但描述符集合只能经
///   [`GroupRegistry::release`] 取回后交给 [`ComponentRegistry::release`]。
pub struct GroupRegistry {
    transport: Box<dyn Transport>,
    groups: BTreeMap<GroupId, Group>,
    next_group: u32,
    interfaces: InterfaceSet,
    endpoints: EndpointMap,
    descriptors: PlanDescriptorSet,
    config_footprint: usize,
    stats: Arc<dyn StatsSink>,
}

impl GroupRegistry {
    /// 以传输协作方与发现结果创建注册表。
    ///
    /// - **契约 (What)**：传输层报告的接口超过上限时返回
    ///   [`CollectiveError::CacheCapacityExceeded`]。
    pub fn new(
        transport: Box<dyn Transport>,
        descriptors: PlanDescriptorSet,
        stats: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        let interfaces = InterfaceSet::try_from_iter(transport.interfaces())?;
        let config_footprint = descriptors.config_footprint();
        info!(
            %interfaces,
            planners = descriptors.len(),
            config_fields = config_footprint,
            "group registry created"
        );
        Ok(Self {
            transport,
            groups: BTreeMap::new(),
            next_group: 1,
            interfaces,
            endpoints: EndpointMap::new(),
            descriptors,
            config_footprint,
            stats,
        })
    }

    /// 创建组。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：校验参数 → 经 [`ComponentRegistry::select_component`] 选择规划器 →
    ///   分配组 ID → 挂接统计节点 → 登记；
    /// - **契约 (What)**：任何一步失败都不会分配 ID，也不会留下半初始化的组。
    pub fn create_group(&mut self, params: GroupParams, planner: Option<&str>) -> Result<GroupId> {
        params.validate()?;
        let descriptor = ComponentRegistry::select_component(
            &self.descriptors,
            planner,
            &params,
            &CollectiveParams::barrier(),
        )?
        .clone();
        let id = GroupId(self.next_group);
        self.next_group = self
            .next_group
            .checked_add(1)
            .ok_or_else(|| CollectiveError::invalid("group id space exhausted"))?;

        self.stats.attach(id);
        let group = Group::new(id, params, descriptor, self.interfaces.clone());
        debug!(
            group = %id,
            members = group.params().member_count,
            rank = group.params().my_rank.0,
            planner = %group.planner().name(),
            "group created"
        );
        self.groups.insert(id, group);
        Ok(id)
    }

    /// 销毁组：归还缓存操作的内存句柄并摘除统计节点；共享端点保持不变。
    pub fn destroy_group(&mut self, id: GroupId) -> Result<StatsSnapshot> {
        let mut group = self
            .groups
            .remove(&id)
            .ok_or(CollectiveError::GroupNotFound { group: id })?;
        let snapshot = group.teardown(self.transport.as_mut());
        self.stats.detach(id, snapshot);
        debug!(group = %id, "group destroyed");
        Ok(snapshot)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// 存活组的 ID，升序。
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn interfaces(&self) -> &InterfaceSet {
        &self.interfaces
    }

    pub fn descriptors(&self) -> &PlanDescriptorSet {
        &self.descriptors
    }

    /// 全部配置包的字段总数。
    pub fn config_footprint(&self) -> usize {
        self.config_footprint
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// 按成员下标取端点，未命中时创建。
    pub fn get_or_create_endpoint(&mut self, member: MemberIndex) -> Result<EndpointHandle> {
        self.endpoints
            .get_or_create(self.transport.as_mut(), member)
    }

    /// 向组提交集合调用。
    pub fn submit(&mut self, id: GroupId, params: CollectiveParams) -> Result<SubmitOutcome> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(CollectiveError::GroupNotFound { group: id })?;
        group.submit(params, self.transport.as_mut(), &mut self.endpoints)
    }

    /// 显式完成一次调用；完成屏障时返回回放结果。
    pub fn complete(&mut self, id: GroupId, coll: CollId) -> Result<DrainReport> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(CollectiveError::GroupNotFound { group: id })?;
        group.complete(
            coll,
            &CompletionStatus::Done,
            self.transport.as_mut(),
            &mut self.endpoints,
        )
    }

    /// 推进一次：取走传输层的完成事件并逐条处理。
    ///
    /// - **契约 (What)**：属于已销毁组或未知调用的事件被记录并忽略；
    ///   不阻塞，没有事件时立即返回空结果。
    pub fn progress(&mut self) -> Progress {
        let mut progress = Progress::default();
        for completion in self.transport.poll_completions() {
            let Some(group) = self.groups.get_mut(&completion.group) else {
                warn!(
                    group = %completion.group,
                    coll = %completion.coll,
                    "completion for a destroyed group ignored"
                );
                continue;
            };
            match group.complete(
                completion.coll,
                &completion.status,
                self.transport.as_mut(),
                &mut self.endpoints,
            ) {
                Ok(report) => {
                    progress.absorb(completion.group, report);
                    progress
                        .completed
                        .push((completion.group, completion.coll, completion.status));
                }
                Err(err) => warn!(
                    group = %completion.group,
                    coll = %completion.coll,
                    error = %err,
                    "unexpected completion ignored"
                ),
            }
        }
        progress
    }

    /// 拆除全部组并交回描述符集合。
    pub fn release(mut self) -> PlanDescriptorSet {
        self.destroy_all();
        mem::take(&mut self.descriptors)
    }

    fn destroy_all(&mut self) {
        let ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for id in ids {
            if let Err(err) = self.destroy_group(id) {
                warn!(group = %id, error = %err, "group teardown failed");
            }
        }
    }
}

impl Drop for GroupRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

impl core::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.groups.len())
            .field("next_group", &self.next_group)
            .field("interfaces", &self.interfaces)
            .field("endpoints", &self.endpoints.len())
            .field("descriptors", &self.descriptors.len())
            .finish_non_exhaustive()
    }
}
