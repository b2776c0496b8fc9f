#![deny(unsafe_code)]

//! `spark-collective` 是集合通信层的规划与算法选择核心。
//!
//! # 模块定位（Why）
//! - 给定一次集合调用（广播、归约、屏障等）与一个通信组，选择、构建、缓存并复用执行计划，
//!   把抽象操作映射为具体传输接口与端点上的消息交换；
//! - 建连、编码与数据搬运属于外部传输层，具体算法的消息模式属于可插拔组件，
//!   本 crate 只负责发现、决策、缓存与排序。
//!
//! # 设计概要（How）
//! - [`component`]：组件注册表，发现计划描述符并加载每个组件的配置；
//! - [`decision`]：按集合类型、消息大小与拓扑选择算法，带合法性回退；
//! - [`cache`]：组私有的分桶计划缓存，复用或重建操作并负责内存重新注册；
//! - [`group`]：worker 级组注册表、共享端点表与屏障排队；
//! - [`builtin`]：开箱即用的内建规划组件；
//! - [`config`]、[`transport`]、[`stats`]、[`logging`]：配置、传输协作方、统计与日志的外部边界。
//!
//! # 并发模型（What）
//! - 同一 worker 内的全部状态由其推进线程驱动，不加内部锁；
//! - 不同 worker 各自持有 [`GroupRegistry`]，彼此之间没有共享可变状态。
//!
//! # 快速上手
//! ```
//! use std::sync::Arc;
//!
//! use spark_collective::{
//!     BuiltinComponent, CollectiveParams, ComponentRegistry, GroupParams, GroupRegistry,
//!     NoopStatsSink, Rank, SubmitOutcome,
//!     config::{MapSource, SourceLoader},
//!     transport::loopback::LoopbackTransport,
//! };
//!
//! let loader = SourceLoader::new(MapSource::new());
//! let descriptors = ComponentRegistry::new()
//!     .with(Arc::new(BuiltinComponent::new()))
//!     .discover(&loader)?;
//!
//! let transport = LoopbackTransport::new(2);
//! let mut registry =
//!     GroupRegistry::new(Box::new(transport.clone()), descriptors, Arc::new(NoopStatsSink))?;
//! let group = registry.create_group(GroupParams::new(4, Rank(0)), Some("builtin"))?;
//!
//! let outcome = registry.submit(group, CollectiveParams::barrier())?;
//! assert!(matches!(outcome, SubmitOutcome::Started(_)));
//!
//! ComponentRegistry::release(Some(registry.release()), &loader);
//! # Ok::<(), spark_collective::CollectiveError>(())
//! ```

pub mod builtin;
pub mod cache;
pub mod component;
pub mod config;
pub mod decision;
pub mod error;
pub mod group;
pub mod logging;
pub mod params;
pub mod stats;
pub mod transport;
pub mod types;

pub use builtin::BuiltinComponent;
pub use cache::{CacheKey, CacheLimits, CacheOutcome, Operation, OperationId, PlanCache};
pub use component::{
    BuildRequest, ComponentRegistry, ConfigBundle, PlanComponent, PlanDescriptor,
    PlanDescriptorSet, PlanOffer,
};
pub use decision::{Algorithm, AlgorithmDecision, CollType, DecisionConfig, MsgSizeLevel, classify};
pub use error::{BoundedResource, CollectiveError, ErrorKind, Result};
pub use group::{DrainReport, GateState, Group, GroupRegistry, Progress, SubmitOutcome};
pub use params::{
    CollectiveParams, CollectiveType, DataType, GroupParams, MemoryRegion, Modifiers, Topology,
};
pub use stats::{MemoryStatsSink, NoopStatsSink, StatsSink, StatsSnapshot};
pub use types::{CollId, GroupId, MemberIndex, PlanName, Rank};
