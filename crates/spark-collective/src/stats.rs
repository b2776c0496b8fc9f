//! 被动统计汇聚点。
//!
//! # 设计动机（Why）
//! - 核心只在组创建与销毁时挂接/摘除统计节点，计数本身由组在推进过程中累加；
//! - 汇聚点以 trait 抽象，宿主可接入任意指标系统；默认实现不做任何事。
//!
//! # 契约说明（What）
//! - 每个组恰好一次 `attach`，销毁时恰好一次 `detach`，并附带最终快照；
//! - [`StatsSnapshot`] 可序列化，便于宿主直接导出。

use std::sync::Arc;

use serde::Serialize;
use spin::Mutex;

use crate::{cache::CacheOutcome, types::GroupId};

/// 组统计快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub started: u64,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_builds: u64,
    pub cache_rebuilds: u64,
}

/// 挂在组上的统计节点。
#[derive(Debug)]
pub struct StatsNode {
    group: GroupId,
    counters: StatsSnapshot,
}

impl StatsNode {
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            counters: StatsSnapshot::default(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn record_started(&mut self) {
        self.counters.started += 1;
    }

    pub fn record_queued(&mut self) {
        self.counters.queued += 1;
    }

    pub fn record_completed(&mut self, success: bool) {
        if success {
            self.counters.completed += 1;
        } else {
            self.counters.failed += 1;
        }
    }

    pub fn record_cache(&mut self, outcome: CacheOutcome) {
        match outcome {
            CacheOutcome::Hit => self.counters.cache_hits += 1,
            CacheOutcome::Built => self.counters.cache_builds += 1,
            CacheOutcome::Rebuilt => self.counters.cache_rebuilds += 1,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.counters
    }
}

/// 统计汇聚点。
pub trait StatsSink: core::fmt::Debug + Send + Sync {
    fn attach(&self, group: GroupId);

    fn detach(&self, group: GroupId, snapshot: StatsSnapshot);
}

/// 丢弃一切的汇聚点。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStatsSink;

impl StatsSink for NoopStatsSink {
    fn attach(&self, _group: GroupId) {}

    fn detach(&self, _group: GroupId, _snapshot: StatsSnapshot) {}
}

/// 汇聚点收到的事件。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatsEvent {
    Attached {
        group: GroupId,
    },
    Detached {
        group: GroupId,
        snapshot: StatsSnapshot,
    },
}

/// 把事件记录在内存中的汇聚点。
///
/// - **执行 (How)**：事件追加到 `spin::Mutex` 保护的向量，临界区只有一次 `push`；
///   克隆共享同一事件列表，测试可在注册表外观测。
#[derive(Clone, Debug, Default)]
pub struct MemoryStatsSink {
    events: Arc<Mutex<Vec<StatsEvent>>>,
}

impl MemoryStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatsEvent> {
        self.events.lock().clone()
    }

    /// 已摘除组的最终快照。
    pub fn detached(&self, group: GroupId) -> Option<StatsSnapshot> {
        self.events.lock().iter().find_map(|event| match event {
            StatsEvent::Detached {
                group: detached,
                snapshot,
            } if *detached == group => Some(*snapshot),
            _ => None,
        })
    }
}

impl StatsSink for MemoryStatsSink {
    fn attach(&self, group: GroupId) {
        self.events.lock().push(StatsEvent::Attached { group });
    }

    fn detach(&self, group: GroupId, snapshot: StatsSnapshot) {
        self.events
            .lock()
            .push(StatsEvent::Detached { group, snapshot });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_counts_cache_outcomes_separately() {
        let mut node = StatsNode::new(GroupId(3));
        node.record_cache(CacheOutcome::Built);
        node.record_cache(CacheOutcome::Hit);
        node.record_cache(CacheOutcome::Hit);
        node.record_cache(CacheOutcome::Rebuilt);
        node.record_completed(false);
        let snapshot = node.snapshot();
        assert_eq!(snapshot.cache_builds, 1);
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_rebuilds, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.completed, 0);
    }

    #[test]
    fn memory_sink_finds_detached_snapshot() {
        let sink = MemoryStatsSink::new();
        let observer = sink.clone();
        sink.attach(GroupId(1));
        let mut node = StatsNode::new(GroupId(1));
        node.record_started();
        sink.detach(GroupId(1), node.snapshot());

        assert_eq!(observer.events().len(), 2);
        assert_eq!(observer.detached(GroupId(1)).map(|s| s.started), Some(1));
        assert_eq!(observer.detached(GroupId(2)), None);
    }
}
