//! # 规划组件契约与组件注册表
//!
//! ## 核心意图（Why）
//! - 算法提供者以 [`PlanComponent`] 能力对象的形式在启动时显式交给注册表，
//!   不依赖链接期自注册；
//! - 发现流程把所有组件提供的计划描述符汇总为一个 [`PlanDescriptorSet`]，
//!   每个组件的配置只加载一次，并随描述符一起被拥有与释放。
//!
//! ## 行为契约（What）
//! - 单个组件查询失败（包括不接受 API 版本）只记录告警并跳过；
//! - 结果缓冲增长失败或配置加载失败会中止整个发现流程，并归还已累积的全部状态；
//! - [`ComponentRegistry::select_component`] 在基础设计中只支持单一有效规划器：
//!   请求名与首个描述符不符即失败，否则返回首个描述符。

mod descriptor;

pub use descriptor::{ConfigBundle, PlanDescriptor, PlanDescriptorSet};

use core::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    cache::{CacheLimits, Operation},
    config::{ConfigLoader, ConfigOptions, ConfigTable},
    decision::{Algorithm, AlgorithmDecision, CollType, MsgSizeLevel},
    error::{CollectiveError, Result},
    params::{CollectiveParams, GroupParams},
    types::{ApiVersion, PLAN_API_VERSION, PlanName},
};

/// 组件对一次查询给出的单个计划。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanOffer {
    pub name: PlanName,
}

impl PlanOffer {
    pub fn new(name: PlanName) -> Self {
        Self { name }
    }
}

/// 构建操作所需的上下文。
#[derive(Clone, Copy, Debug)]
pub struct BuildRequest<'a> {
    pub group: &'a GroupParams,
    pub coll: &'a CollectiveParams,
    pub algorithm: Algorithm,
    pub coll_type: CollType,
    pub level: MsgSizeLevel,
}

/// 算法提供者。
///
/// # 教案式说明
/// - **意图 (Why)**：核心只负责发现、打分与缓存，具体算法的消息模式由组件决定；
/// - **契约 (What)**：
///   - `query` 对不支持的版本必须返回错误而不是恐慌，注册表会跳过该组件；
///   - `config_prefix` 与 [`ENV_PREFIX`](crate::config::ENV_PREFIX) 拼接后作为配置键前缀，例如 `UCX_BUILTIN_`；
///   - `decision` 与 `cache_limits` 在组创建时调用一次，输入为发现阶段加载的配置；
///   - `build_operation` 只计算连接集合等计划信息，内存注册由缓存完成；
/// - **风险 (Trade-offs)**：组件以 `Arc<dyn _>` 共享，实现必须是 `Send + Sync`。
pub trait PlanComponent: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn config_prefix(&self) -> &str;

    fn config_table(&self) -> ConfigTable;

    fn query(&self, version: ApiVersion) -> Result<Vec<PlanOffer>>;

    fn decision(&self, _config: &ConfigOptions) -> AlgorithmDecision {
        AlgorithmDecision::default()
    }

    fn cache_limits(&self, _config: &ConfigOptions) -> CacheLimits {
        CacheLimits::default()
    }

    fn build_operation(
        &self,
        config: &ConfigOptions,
        request: &BuildRequest<'_>,
    ) -> Result<Operation>;
}

/// 已注册组件的有序列表。
///
/// - **契约 (What)**：注册顺序即发现顺序，也决定了 `select_component` 的“首个描述符”；
///   `descriptor_capacity` 给描述符列表设定硬上限，超出与分配失败同样报 `NoMemory`。
#[derive(Clone, Debug, Default)]
pub struct ComponentRegistry {
    components: Vec<Arc<dyn PlanComponent>>,
    descriptor_capacity: Option<usize>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: Arc<dyn PlanComponent>) {
        self.components.push(component);
    }

    pub fn with(mut self, component: Arc<dyn PlanComponent>) -> Self {
        self.register(component);
        self
    }

    /// 限制一次发现最多容纳的描述符数量。
    pub fn with_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.descriptor_capacity = Some(capacity);
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// 查询全部组件并汇总描述符。
    ///
    /// # 教案式说明
    /// - **执行 (How)**：
    ///   1. 以 [`PLAN_API_VERSION`] 查询组件，失败或无计划时跳过；
    ///   2. 为本组件的描述符预留空间，超出容量上限或分配失败返回 [`CollectiveError::NoMemory`]；
    ///   3. 以 `UCX_` + 组件前缀加载配置，包装为共享的 [`ConfigBundle`]；
    ///   4. 追加描述符；
    /// - **契约 (What)**：返回的描述符数量等于各成功组件报告数量之和；
    ///   第 2、3 步失败时归还已累积的全部配置并返回错误，调用方拿不到部分结果。
    pub fn discover(&self, loader: &dyn ConfigLoader) -> Result<PlanDescriptorSet> {
        let mut descriptors: Vec<PlanDescriptor> = Vec::new();
        for component in &self.components {
            let offers = match component.query(PLAN_API_VERSION) {
                Ok(offers) => offers,
                Err(err) => {
                    warn!(
                        component = component.name(),
                        code = err.code(),
                        error = %err,
                        "planner component query failed, skipping"
                    );
                    continue;
                }
            };
            if offers.is_empty() {
                debug!(component = component.name(), "planner component offers no plans");
                continue;
            }

            if !self.grow(&mut descriptors, offers.len()) {
                Self::release(Some(PlanDescriptorSet::from_vec(descriptors)), loader);
                return Err(CollectiveError::NoMemory {
                    context: "grow descriptor list",
                });
            }

            let bundle = match ConfigBundle::load(component.as_ref(), loader) {
                Ok(bundle) => Arc::new(bundle),
                Err(err) => {
                    Self::release(Some(PlanDescriptorSet::from_vec(descriptors)), loader);
                    return Err(err);
                }
            };

            let offered = offers.len();
            descriptors.extend(offers.into_iter().map(|offer| {
                PlanDescriptor::new(offer.name, Arc::clone(component), Arc::clone(&bundle))
            }));
            debug!(
                component = component.name(),
                offered,
                total = descriptors.len(),
                "planner component discovered"
            );
        }
        Ok(PlanDescriptorSet::from_vec(descriptors))
    }

    fn grow(&self, descriptors: &mut Vec<PlanDescriptor>, additional: usize) -> bool {
        let within_capacity = self.descriptor_capacity.is_none_or(|capacity| {
            descriptors
                .len()
                .checked_add(additional)
                .is_some_and(|total| total <= capacity)
        });
        within_capacity && descriptors.try_reserve(additional).is_ok()
    }

    /// 只描述单个已知组件，绕过遍历。
    ///
    /// - **契约 (What)**：查询失败直接返回错误；组件无计划时返回
    ///   [`CollectiveError::Unsupported`]；多个计划时取第一个。
    pub fn describe_single(
        component: Arc<dyn PlanComponent>,
        loader: &dyn ConfigLoader,
    ) -> Result<PlanDescriptor> {
        let offer = component
            .query(PLAN_API_VERSION)?
            .into_iter()
            .next()
            .ok_or_else(|| CollectiveError::Unsupported {
                component: component.name().to_owned(),
                detail: "component offers no plans".to_owned(),
            })?;
        let bundle = ConfigBundle::load(component.as_ref(), loader)?;
        Ok(PlanDescriptor::new(offer.name, component, Arc::new(bundle)))
    }

    /// 为组选择规划组件。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：组创建时决定由哪个组件负责本组的计划；
    /// - **契约 (What)**：
    ///   - 空描述符集合返回 [`CollectiveError::InvalidParam`]；
    ///   - 给出名称且与首个描述符不符时返回 [`CollectiveError::UnknownComponent`]；
    ///   - 其余情况返回首个描述符；
    /// - **风险 (Trade-offs)**：组参数与调用参数暂不参与选择，多规划器打分是预留的扩展点。
    pub fn select_component<'a>(
        descriptors: &'a PlanDescriptorSet,
        requested: Option<&str>,
        _group: &GroupParams,
        _coll: &CollectiveParams,
    ) -> Result<&'a PlanDescriptor> {
        let first = descriptors
            .first()
            .ok_or_else(|| CollectiveError::invalid("no planner components were discovered"))?;
        match requested {
            Some(name) if name != first.name().as_str() => {
                error!(requested = name, available = %first.name(), "unknown planner component name");
                Err(CollectiveError::UnknownComponent {
                    name: name.to_owned(),
                })
            }
            _ => Ok(first),
        }
    }

    /// 归还描述符集合与其配置。
    ///
    /// - **契约 (What)**：`None` 为空操作；共享同一配置包的描述符只触发一次 `release_opts`；
    ///   配置包仍被其他持有者引用时记录告警，由最后一个持有者丢弃。
    pub fn release(descriptors: Option<PlanDescriptorSet>, loader: &dyn ConfigLoader) {
        let Some(descriptors) = descriptors else {
            return;
        };
        let count = descriptors.len();
        let mut bundles: Vec<Arc<ConfigBundle>> = Vec::new();
        for descriptor in descriptors.into_vec() {
            let bundle = descriptor.into_bundle();
            if !bundles.iter().any(|known| Arc::ptr_eq(known, &bundle)) {
                bundles.push(bundle);
            }
        }
        for bundle in bundles {
            match Arc::try_unwrap(bundle) {
                Ok(bundle) => bundle.release(loader),
                Err(shared) => warn!(
                    prefix = shared.prefix(),
                    holders = Arc::strong_count(&shared) - 1,
                    "configuration bundle still referenced at release"
                ),
            }
        }
        debug!(descriptors = count, "planner descriptors released");
    }
}
