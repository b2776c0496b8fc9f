//! `group_lifecycle` 集成测试：验证组注册表在真实调用路径下的顺序、缓存与端点契约。
//!
//! # 测试目标（Why）
//! - 屏障未完成时的提交必须排队，并在屏障完成后严格按提交顺序启动；
//! - 同形状的重复调用命中缓存，缓冲变化触发重建并重新注册内存；
//! - 端点表在组之间共享，同一成员只建连一次；
//! - 组 ID 单调递增，销毁后不复用。
//!
//! # 结构安排（How）
//! - `Harness` 以内建组件与回环传输搭建注册表，回环传输的克隆用于外部观测与注入完成事件；
//! - 性质测试使用 `proptest` 生成创建/销毁序列与端点请求序列。

use std::{collections::BTreeSet, sync::Arc};

use proptest::prelude::*;
use spark_collective::{
    BoundedResource, BuiltinComponent, CollId, CollectiveError, CollectiveParams, CollectiveType,
    ComponentRegistry, DataType, GateState, GroupId, GroupParams, GroupRegistry, MemberIndex,
    MemoryRegion, MemoryStatsSink, NoopStatsSink, Rank, SubmitOutcome,
    config::{MapSource, SourceLoader},
    stats::StatsEvent,
    transport::loopback::LoopbackTransport,
};

struct Harness {
    registry: GroupRegistry,
    transport: LoopbackTransport,
    stats: MemoryStatsSink,
}

fn harness_with(transport: LoopbackTransport, source: MapSource) -> Harness {
    let loader = SourceLoader::new(source);
    let descriptors = ComponentRegistry::new()
        .with(Arc::new(BuiltinComponent::new()))
        .discover(&loader)
        .expect("内建组件发现成功");
    let stats = MemoryStatsSink::new();
    let registry = GroupRegistry::new(
        Box::new(transport.clone()),
        descriptors,
        Arc::new(stats.clone()),
    )
    .expect("注册表创建成功");
    Harness {
        registry,
        transport,
        stats,
    }
}

fn harness() -> Harness {
    harness_with(LoopbackTransport::new(2), MapSource::new())
}

fn allreduce(send: usize, recv: usize) -> CollectiveParams {
    CollectiveParams::new(
        CollectiveType::allreduce(),
        DataType::new(1, 4),
        16,
        MemoryRegion::new(send, 64),
        MemoryRegion::new(recv, 64),
    )
}

fn bcast(root: u32) -> CollectiveParams {
    CollectiveParams::new(
        CollectiveType::bcast(Rank(root)),
        DataType::new(1, 8),
        8,
        MemoryRegion::new(0x7000, 64),
        MemoryRegion::new(0x7000, 64),
    )
}

fn alltoall() -> CollectiveParams {
    CollectiveParams::new(
        CollectiveType::alltoall(),
        DataType::new(1, 4),
        4,
        MemoryRegion::new(0x8000, 64),
        MemoryRegion::new(0x9000, 64),
    )
}

/// 屏障执行期间的三次提交在屏障完成后按提交顺序启动。
#[test]
fn queued_requests_start_in_submission_order_after_barrier() {
    let mut h = harness();
    let group = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), None)
        .expect("创建组");

    let barrier = h
        .registry
        .submit(group, CollectiveParams::barrier())
        .expect("提交屏障");
    assert_eq!(barrier, SubmitOutcome::Started(CollId(0)));
    assert_eq!(
        h.registry.group(group).expect("组存在").gate(),
        GateState::BarrierBlocked
    );

    let requests = [allreduce(0x1000, 0x2000), bcast(2), allreduce(0x3000, 0x4000)];
    let queued: Vec<SubmitOutcome> = requests
        .into_iter()
        .map(|params| h.registry.submit(group, params).expect("排队提交"))
        .collect();
    assert_eq!(
        queued,
        vec![
            SubmitOutcome::Queued(CollId(1)),
            SubmitOutcome::Queued(CollId(2)),
            SubmitOutcome::Queued(CollId(3)),
        ]
    );
    assert_eq!(h.transport.launches().len(), 1);

    h.transport.complete(group, barrier.coll());
    let progress = h.registry.progress();
    assert_eq!(
        progress.started,
        vec![(group, CollId(1)), (group, CollId(2)), (group, CollId(3))]
    );
    assert!(progress.failed.is_empty());

    let launched: Vec<CollId> = h.transport.launches().iter().map(|l| l.coll).collect();
    assert_eq!(launched, vec![CollId(0), CollId(1), CollId(2), CollId(3)]);
    let group_state = h.registry.group(group).expect("组存在");
    assert_eq!(group_state.gate(), GateState::Open);
    assert!(group_state.pending().is_empty());
}

/// 队列中的第二个屏障重新关闭闸门，其后的请求继续等待。
#[test]
fn later_queued_barrier_blocks_again() {
    let mut h = harness();
    let group = h
        .registry
        .create_group(GroupParams::new(4, Rank(1)), None)
        .expect("创建组");

    h.registry
        .submit(group, CollectiveParams::barrier())
        .expect("首个屏障");
    for params in [
        allreduce(0x1000, 0x2000),
        CollectiveParams::barrier(),
        allreduce(0x1000, 0x2000),
    ] {
        h.registry.submit(group, params).expect("排队提交");
    }

    let report = h.registry.complete(group, CollId(0)).expect("完成首个屏障");
    assert_eq!(report.started, vec![CollId(1), CollId(2)]);
    let state = h.registry.group(group).expect("组存在");
    assert!(state.is_barrier_outstanding());
    assert_eq!(state.pending(), vec![CollId(3)]);

    let report = h.registry.complete(group, CollId(2)).expect("完成第二个屏障");
    assert_eq!(report.started, vec![CollId(3)]);
    assert!(!h.registry.group(group).expect("组存在").is_barrier_outstanding());
}

/// 回放中启动失败的请求被单独报告，不阻塞其后的请求。
#[test]
fn failed_replay_does_not_stall_the_queue() {
    let mut h = harness();
    let group = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), None)
        .expect("创建组");

    h.registry
        .submit(group, CollectiveParams::barrier())
        .expect("屏障");
    h.registry.submit(group, alltoall()).expect("排队全交换");
    h.registry
        .submit(group, allreduce(0x1000, 0x2000))
        .expect("排队全归约");

    h.transport.fail_endpoint_creation(true);
    h.transport.complete(group, CollId(0));
    let progress = h.registry.progress();

    assert_eq!(progress.started, vec![(group, CollId(2))]);
    assert_eq!(progress.failed.len(), 1);
    assert_eq!(progress.failed[0].1, CollId(1));
    assert_eq!(progress.failed[0].2.code(), "collective.transport");
}

/// 同形状命中缓存，缓冲变化重建；销毁组归还全部内存并上报最终统计。
#[test]
fn repeated_shape_hits_cache_and_destroy_releases_memory() {
    let mut h = harness_with(LoopbackTransport::new(1).with_auto_complete(), MapSource::new());
    let group = h
        .registry
        .create_group(GroupParams::new(8, Rank(3)), Some("builtin"))
        .expect("创建组");

    for params in [
        allreduce(0x1000, 0x2000),
        allreduce(0x1000, 0x2000),
        allreduce(0x1000, 0x5000),
    ] {
        let outcome = h.registry.submit(group, params).expect("提交");
        assert!(matches!(outcome, SubmitOutcome::Started(_)));
        assert_eq!(h.registry.progress().completed.len(), 1);
    }

    let stats = h.registry.group(group).expect("组存在").stats();
    assert_eq!(stats.cache_builds, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_rebuilds, 1);
    assert_eq!(stats.completed, 3);
    assert_eq!(h.transport.registered_regions().len(), 4);
    assert_eq!(h.transport.live_registrations(), 2);

    let snapshot = h.registry.destroy_group(group).expect("销毁组");
    assert_eq!(snapshot, stats);
    assert_eq!(h.transport.live_registrations(), 0);
    assert_eq!(h.stats.detached(group), Some(stats));
    assert_eq!(
        h.stats.events().first(),
        Some(&StatsEvent::Attached { group })
    );

    let json = serde_json::to_value(snapshot).expect("快照可序列化");
    assert_eq!(json["cache_hits"], 1);
    assert_eq!(json["completed"], 3);
}

/// 两个组访问同一批成员时只建连一次；销毁组不移除共享端点。
#[test]
fn endpoints_are_shared_between_groups() {
    let mut h = harness();
    let first = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), None)
        .expect("创建第一个组");
    let second = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), None)
        .expect("创建第二个组");

    h.registry.submit(first, alltoall()).expect("第一个组全交换");
    h.registry.submit(second, alltoall()).expect("第二个组全交换");
    assert_eq!(
        h.transport.endpoints_created(),
        vec![MemberIndex(1), MemberIndex(2), MemberIndex(3)]
    );

    let launches = h.transport.launches();
    assert_eq!(launches[0].endpoints, launches[1].endpoints);

    h.registry.destroy_group(first).expect("销毁第一个组");
    assert_eq!(h.registry.endpoint_count(), 3);
}

/// 未知规划器名与非法根都不会消耗 ID。
#[test]
fn rejected_requests_do_not_consume_ids() {
    let mut h = harness();
    let err = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), Some("tuned"))
        .expect_err("未知规划器");
    assert_eq!(
        err,
        CollectiveError::UnknownComponent {
            name: "tuned".into()
        }
    );

    let group = h
        .registry
        .create_group(GroupParams::new(4, Rank(0)), None)
        .expect("创建组");
    assert_eq!(group, GroupId(1));

    let err = h.registry.submit(group, bcast(4)).expect_err("根越界");
    assert!(matches!(err, CollectiveError::InvalidParam { .. }));
    let outcome = h.registry.submit(group, bcast(3)).expect("合法根");
    assert_eq!(outcome.coll(), CollId(0));

    let err = h
        .registry
        .submit(GroupId(99), CollectiveParams::barrier())
        .expect_err("组不存在");
    assert_eq!(err, CollectiveError::GroupNotFound { group: GroupId(99) });
}

/// 缓存根槽位上限来自配置，越界根返回容量错误而不是淘汰。
#[test]
fn configured_root_limit_is_enforced() {
    let mut h = harness_with(
        LoopbackTransport::new(1),
        MapSource::new().with("UCX_BUILTIN_CACHE_MAX_ROOTS", "2"),
    );
    let group = h
        .registry
        .create_group(GroupParams::new(8, Rank(0)), None)
        .expect("创建组");
    h.registry.submit(group, bcast(1)).expect("根 1 可缓存");
    let err = h.registry.submit(group, bcast(5)).expect_err("根 5 越界");
    assert!(matches!(
        err,
        CollectiveError::CacheCapacityExceeded {
            resource: BoundedResource::RootSlots,
            limit: 2,
            ..
        }
    ));
    assert_eq!(h.registry.group(group).expect("组存在").cache().len(), 1);
}

/// 操作数上限按桶计算：广播桶写满后，全归约仍能入缓存。
#[test]
fn operation_limit_applies_per_bucket() {
    let mut h = harness_with(
        LoopbackTransport::new(1),
        MapSource::new().with("UCX_BUILTIN_CACHE_MAX_OPS", "1"),
    );
    let group = h
        .registry
        .create_group(GroupParams::new(8, Rank(0)), None)
        .expect("创建组");
    h.registry.submit(group, bcast(1)).expect("广播入缓存");
    h.registry
        .submit(group, allreduce(0x1000, 0x2000))
        .expect("全归约位于另一个桶");

    let err = h.registry.submit(group, bcast(2)).expect_err("广播桶已满");
    assert!(matches!(
        err,
        CollectiveError::CacheCapacityExceeded {
            resource: BoundedResource::Operations,
            limit: 1,
            ..
        }
    ));
    assert_eq!(h.registry.group(group).expect("组存在").cache().len(), 2);
}

/// 属于已销毁组的完成事件被忽略。
#[test]
fn completion_for_destroyed_group_is_ignored() {
    let mut h = harness();
    let group = h
        .registry
        .create_group(GroupParams::new(2, Rank(0)), None)
        .expect("创建组");
    h.registry
        .submit(group, CollectiveParams::barrier())
        .expect("屏障");
    h.registry.destroy_group(group).expect("销毁组");

    h.transport.complete(group, CollId(0));
    assert!(h.registry.progress().is_idle());
}

/// 传输层报告的接口数超过上限时拒绝创建注册表。
#[test]
fn too_many_interfaces_are_rejected() {
    let err = GroupRegistry::new(
        Box::new(LoopbackTransport::new(9)),
        Default::default(),
        Arc::new(NoopStatsSink),
    )
    .expect_err("接口超限");
    assert!(matches!(
        err,
        CollectiveError::CacheCapacityExceeded {
            resource: BoundedResource::Interfaces,
            limit: 8,
            ..
        }
    ));
}

/// 释放注册表后交回的描述符可以正常归还。
#[test]
fn release_returns_descriptors_after_teardown() {
    let loader = SourceLoader::new(MapSource::new());
    let descriptors = ComponentRegistry::new()
        .with(Arc::new(BuiltinComponent::new()))
        .discover(&loader)
        .expect("发现成功");
    let transport = LoopbackTransport::new(1);
    let mut registry =
        GroupRegistry::new(Box::new(transport.clone()), descriptors, Arc::new(NoopStatsSink))
            .expect("注册表创建成功");
    let group = registry
        .create_group(GroupParams::new(2, Rank(1)), None)
        .expect("创建组");
    registry
        .submit(group, allreduce(0x1000, 0x2000))
        .expect("提交");
    assert!(transport.live_registrations() > 0);

    let descriptors = registry.release();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(transport.live_registrations(), 0);
    ComponentRegistry::release(Some(descriptors), &loader);
}

#[derive(Clone, Debug)]
enum Step {
    Create,
    Destroy(usize),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(Step::Create),
            2 => (0usize..8).prop_map(Step::Destroy),
        ],
        1..40,
    )
}

proptest! {
    #[test]
    fn prop_group_ids_strictly_increase(steps in steps()) {
        let mut h = harness();
        let mut live: Vec<GroupId> = Vec::new();
        let mut issued: Vec<GroupId> = Vec::new();
        for step in steps {
            match step {
                Step::Create => {
                    let id = h
                        .registry
                        .create_group(GroupParams::new(2, Rank(0)), None)
                        .expect("创建组");
                    if let Some(last) = issued.last() {
                        prop_assert!(id > *last);
                    }
                    issued.push(id);
                    live.push(id);
                }
                Step::Destroy(index) if !live.is_empty() => {
                    let id = live.remove(index % live.len());
                    h.registry.destroy_group(id).expect("销毁组");
                }
                Step::Destroy(_) => {}
            }
        }
        let unique: BTreeSet<GroupId> = issued.iter().copied().collect();
        prop_assert_eq!(unique.len(), issued.len());
        prop_assert_eq!(h.registry.group_ids(), live);
    }

    #[test]
    fn prop_one_endpoint_per_member(members in prop::collection::vec(0u64..16, 1..64)) {
        let mut h = harness();
        let mut first_seen = std::collections::BTreeMap::new();
        for member in &members {
            let handle = h
                .registry
                .get_or_create_endpoint(MemberIndex(*member))
                .expect("端点创建成功");
            let known = *first_seen.entry(*member).or_insert(handle);
            prop_assert_eq!(known, handle);
        }
        let distinct: BTreeSet<u64> = members.iter().copied().collect();
        prop_assert_eq!(h.transport.endpoints_created().len(), distinct.len());
        prop_assert_eq!(h.registry.endpoint_count(), distinct.len());
    }

    #[test]
    fn prop_collective_ids_strictly_increase(kinds in prop::collection::vec(0u8..3, 1..30)) {
        let mut h = harness_with(LoopbackTransport::new(1).with_auto_complete(), MapSource::new());
        let group = h
            .registry
            .create_group(GroupParams::new(4, Rank(2)), None)
            .expect("创建组");
        let mut previous: Option<CollId> = None;
        for kind in kinds {
            let params = match kind {
                0 => CollectiveParams::barrier(),
                1 => allreduce(0x1000, 0x2000),
                _ => bcast(1),
            };
            let coll = h.registry.submit(group, params).expect("提交").coll();
            if let Some(previous) = previous {
                prop_assert!(coll > previous);
            }
            previous = Some(coll);
            h.registry.progress();
        }
        prop_assert!(h.registry.group(group).expect("组存在").pending().is_empty());
    }
}
