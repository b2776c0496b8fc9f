//! # 组内计划/操作缓存
//!
//! ## 核心意图（Why）
//! - 同一集合模式的重复调用应跳过决策与构建，直接复用已构建的 [`Operation`]；
//! - 缓存按集合类型分桶，桶内按根 rank 的位置与消息大小级别定位槽位。
//!
//! ## 行为契约（What）
//! - 命中时原样返回同一实例，不重建也不重新注册内存；
//! - 未命中或形状不兼容时调用构建函数，注册新缓冲区后替换槽位；旧操作的内存句柄随即归还；
//! - 构建或注册失败时槽位保持原状，之前的有效操作不会被提前淘汰；
//! - 根 rank 超出槽位上限、单个桶内的操作数超出上限时返回
//!   [`CollectiveError::CacheCapacityExceeded`]，从不悄悄淘汰。
//!
//! ## 风险提示（Trade-offs）
//! - 根槽位按位置索引，稀疏的根 rank 会让槽位向量增长到该 rank 为止。

mod operation;

pub use operation::{Operation, OperationId, OperationShape};

use std::sync::Arc;

use tracing::debug;

use crate::{
    decision::{Algorithm, CollType, MAX_COLL_TYPE_BUCKETS, MSG_SIZE_LEVELS, MsgSizeLevel},
    error::{BoundedResource, CollectiveError, Result},
    params::CollectiveParams,
    transport::{MemoryHandle, Transport},
    types::Rank,
};

/// 单个桶内可区分的根 rank 数量默认上限。
pub const DEFAULT_MAX_ROOTS: usize = 96;

/// 单个桶可同时持有的操作数量默认上限。
pub const DEFAULT_MAX_OPS: usize = 200;

/// 缓存容量。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheLimits {
    pub max_roots: usize,
    pub max_ops: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_roots: DEFAULT_MAX_ROOTS,
            max_ops: DEFAULT_MAX_OPS,
        }
    }
}

/// 缓存定位键。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    pub coll_type: CollType,
    pub root: Rank,
    pub level: MsgSizeLevel,
}

/// 一次查询的结果来源。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheOutcome {
    /// 复用了槽位中的操作。
    Hit,
    /// 槽位为空，新建了操作。
    Built,
    /// 槽位中的操作形状不兼容，已被替换。
    Rebuilt,
}

type RootSlot = [Option<Arc<Operation>>; MSG_SIZE_LEVELS];

#[derive(Debug, Default)]
struct Bucket {
    roots: Vec<RootSlot>,
    stored: usize,
}

/// 组私有的计划缓存。
///
/// # 教案式说明
/// - **意图 (Why)**：把“查找、校验复用、构建、注册、入槽”收敛为一个入口，
///   避免调用方在失败路径上遗漏内存句柄；
/// - **契约 (What)**：
///   - 最多 [`MAX_COLL_TYPE_BUCKETS`] 个桶，桶下标由 [`CollType::bucket`] 给出；
///   - `max_roots` 与 `max_ops` 都按桶计算，一个桶写满不影响其他桶；
///   - 槽位中的操作以 `Arc` 共享，正在执行的调用持有的实例不会因替换而失效；
///   - 所有注册过的内存句柄都会经由 [`PlanCache::clear`] 或替换路径归还；
/// - **风险 (Trade-offs)**：替换时立即归还旧句柄；若旧实例仍在执行，
///   其内存绑定由传输层按句柄语义处理。
#[derive(Debug)]
pub struct PlanCache {
    buckets: [Bucket; MAX_COLL_TYPE_BUCKETS],
    limits: CacheLimits,
    next_id: u64,
}

impl PlanCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            buckets: Default::default(),
            limits,
            next_id: 0,
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// 全部桶当前持有的操作数量。
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.stored).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.stored == 0)
    }

    /// 指定集合类型的桶当前持有的操作数量。
    pub fn bucket_len(&self, coll_type: CollType) -> usize {
        self.buckets[coll_type.bucket()].stored
    }

    /// 只读查看槽位。
    pub fn get(&self, key: CacheKey) -> Option<&Arc<Operation>> {
        self.buckets[key.coll_type.bucket()]
            .roots
            .get(key.root.index())?[key.level.index()]
        .as_ref()
    }

    /// 查找可复用的操作，否则构建并入槽。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：
    ///   1. 校验根位置未越过 `max_roots`；
    ///   2. 槽位有操作且 [`Operation::can_reuse`] 成立时直接返回 [`CacheOutcome::Hit`]；
    ///   3. 空槽位需要新增计数，先检查本桶的 `max_ops`；
    ///   4. 预留槽位空间后调用 `build`，再为新形状注册内存；
    ///   5. 入槽并归还被替换操作的内存句柄；
    /// - **契约 (What)**：第 4 步任何失败都会撤销本次已注册的句柄，槽位保持原状。
    pub fn get_or_build<F>(
        &mut self,
        transport: &mut dyn Transport,
        key: CacheKey,
        algorithm: Algorithm,
        coll: &CollectiveParams,
        build: F,
    ) -> Result<(Arc<Operation>, CacheOutcome)>
    where
        F: FnOnce() -> Result<Operation>,
    {
        let bucket_index = key.coll_type.bucket();
        let root_index = key.root.index();
        if root_index >= self.limits.max_roots {
            return Err(CollectiveError::CacheCapacityExceeded {
                bucket: Some(bucket_index),
                resource: BoundedResource::RootSlots,
                limit: self.limits.max_roots,
            });
        }

        let current = self.get(key).cloned();
        if let Some(op) = &current {
            if op.can_reuse(algorithm, key.coll_type, key.level, coll) {
                return Ok((Arc::clone(op), CacheOutcome::Hit));
            }
        } else if self.buckets[bucket_index].stored >= self.limits.max_ops {
            return Err(CollectiveError::CacheCapacityExceeded {
                bucket: Some(bucket_index),
                resource: BoundedResource::Operations,
                limit: self.limits.max_ops,
            });
        }

        let roots = &mut self.buckets[bucket_index].roots;
        if roots.len() <= root_index {
            roots
                .try_reserve(root_index + 1 - roots.len())
                .map_err(|_| CollectiveError::NoMemory {
                    context: "grow plan cache root slots",
                })?;
            roots.resize_with(root_index + 1, Default::default);
        }

        let mut op = build()?;
        let memory = register_regions(transport, &op)?;
        self.next_id += 1;
        op.bind(OperationId(self.next_id), memory);
        let op = Arc::new(op);

        let bucket = &mut self.buckets[bucket_index];
        let previous = bucket.roots[root_index][key.level.index()].replace(Arc::clone(&op));
        let outcome = match previous {
            Some(previous) => {
                release_memory(transport, &previous);
                CacheOutcome::Rebuilt
            }
            None => {
                bucket.stored += 1;
                CacheOutcome::Built
            }
        };
        debug!(
            coll_type = %key.coll_type,
            root = key.root.0,
            level = key.level.index(),
            %algorithm,
            op = %op.id(),
            ?outcome,
            "plan cache slot filled"
        );
        Ok((op, outcome))
    }

    /// 清空全部槽位并归还内存句柄。
    pub fn clear(&mut self, transport: &mut dyn Transport) {
        for bucket in &mut self.buckets {
            for slot in bucket.roots.drain(..) {
                for op in slot.into_iter().flatten() {
                    release_memory(transport, &op);
                }
            }
            bucket.stored = 0;
        }
    }
}

fn register_regions(transport: &mut dyn Transport, op: &Operation) -> Result<Vec<MemoryHandle>> {
    let mut handles = Vec::new();
    for region in op.shape().regions() {
        match transport.register_memory(&region) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                for handle in handles {
                    transport.deregister_memory(handle);
                }
                return Err(err);
            }
        }
    }
    Ok(handles)
}

fn release_memory(transport: &mut dyn Transport, op: &Operation) {
    for handle in op.memory() {
        transport.deregister_memory(*handle);
    }
}
