//! # 内建规划组件
//!
//! ## 核心意图（Why）
//! - 提供开箱即用的规划器：决策表来自 [`crate::decision`]，连接集合来自 [`connection_set`]；
//! - 通过 `UCX_BUILTIN_*` 配置强制算法、调整 k 叉树分支度与缓存容量。
//!
//! ## 配置项（What）
//! | 键 | 默认 | 含义 |
//! | --- | --- | --- |
//! | `UCX_BUILTIN_BARRIER_ALGORITHM` | `auto` | 屏障算法 |
//! | `UCX_BUILTIN_BCAST_ALGORITHM` | `auto` | 广播算法 |
//! | `UCX_BUILTIN_ALLREDUCE_ALGORITHM` | `auto` | 全归约算法 |
//! | `UCX_BUILTIN_KNOMIAL_DEGREE` | `4` | k 叉树分支度 |
//! | `UCX_BUILTIN_CACHE_MAX_ROOTS` | `96` | 每桶根槽位上限 |
//! | `UCX_BUILTIN_CACHE_MAX_OPS` | `200` | 每桶缓存操作上限 |
//!
//! 整数项上限为 `u32::MAX`，超限在发现阶段报 [`CollectiveError::MalformedConfig`]。

mod connections;

pub use connections::connection_set;

use crate::{
    cache::{CacheLimits, DEFAULT_MAX_OPS, DEFAULT_MAX_ROOTS, Operation},
    component::{BuildRequest, PlanComponent, PlanOffer},
    config::{ConfigField, ConfigKind, ConfigOptions, ConfigTable},
    decision::{Algorithm, AlgorithmDecision, DecisionConfig},
    error::{CollectiveError, Result},
    types::{ApiVersion, PlanName},
};

/// 组件名。
pub const BUILTIN_NAME: &str = "builtin";

/// 配置前缀（位于 `UCX_` 之后）。
pub const BUILTIN_PREFIX: &str = "BUILTIN_";

/// 本组件接受的查询主版本。
pub const BUILTIN_API_MAJOR: u16 = 1;

const ALGORITHM_CHOICES: &[&str] = &[
    "auto",
    "linear",
    "binomial",
    "knomial",
    "recursive",
    "ring",
    "topo",
    "bruck",
    "pairwise",
];

const COUNT_MAX: u64 = u32::MAX as u64;

const FIELDS: &[ConfigField] = &[
    ConfigField::new(
        "BARRIER_ALGORITHM",
        "auto",
        "Algorithm used for barrier; auto lets the decision table choose.",
        ConfigKind::Choice(ALGORITHM_CHOICES),
    ),
    ConfigField::new(
        "BCAST_ALGORITHM",
        "auto",
        "Algorithm used for broadcast; auto lets the decision table choose.",
        ConfigKind::Choice(ALGORITHM_CHOICES),
    ),
    ConfigField::new(
        "ALLREDUCE_ALGORITHM",
        "auto",
        "Algorithm used for allreduce; auto lets the decision table choose.",
        ConfigKind::Choice(ALGORITHM_CHOICES),
    ),
    ConfigField::new(
        "KNOMIAL_DEGREE",
        "4",
        "Fan-out of the k-nomial tree.",
        ConfigKind::BoundedUint(COUNT_MAX),
    ),
    ConfigField::new(
        "CACHE_MAX_ROOTS",
        "96",
        "Distinct root positions kept per collective-type bucket.",
        ConfigKind::BoundedUint(COUNT_MAX),
    ),
    ConfigField::new(
        "CACHE_MAX_OPS",
        "200",
        "Operations one collective-type bucket of a plan cache may hold at once.",
        ConfigKind::BoundedUint(COUNT_MAX),
    ),
];

/// 内建组件的配置表。
pub const BUILTIN_CONFIG: ConfigTable = ConfigTable::new("builtin", FIELDS);

/// 内建规划组件。
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinComponent;

impl BuiltinComponent {
    pub fn new() -> Self {
        Self
    }
}

fn forced(config: &ConfigOptions, field: &str) -> Option<Algorithm> {
    config.text(field).and_then(Algorithm::from_name)
}

impl PlanComponent for BuiltinComponent {
    fn name(&self) -> &str {
        BUILTIN_NAME
    }

    fn config_prefix(&self) -> &str {
        BUILTIN_PREFIX
    }

    fn config_table(&self) -> ConfigTable {
        BUILTIN_CONFIG
    }

    fn query(&self, version: ApiVersion) -> Result<Vec<PlanOffer>> {
        if version.major != BUILTIN_API_MAJOR {
            return Err(CollectiveError::Unsupported {
                component: BUILTIN_NAME.to_owned(),
                detail: format!("api version {version} is not {BUILTIN_API_MAJOR}.x"),
            });
        }
        Ok(vec![PlanOffer::new(PlanName::new(BUILTIN_NAME)?)])
    }

    fn decision(&self, config: &ConfigOptions) -> AlgorithmDecision {
        let defaults = DecisionConfig::default();
        AlgorithmDecision::new(DecisionConfig {
            knomial_degree: config
                .uint("KNOMIAL_DEGREE")
                .and_then(|degree| u32::try_from(degree).ok())
                .unwrap_or(defaults.knomial_degree),
            forced_barrier: forced(config, "BARRIER_ALGORITHM"),
            forced_bcast: forced(config, "BCAST_ALGORITHM"),
            forced_allreduce: forced(config, "ALLREDUCE_ALGORITHM"),
        })
    }

    fn cache_limits(&self, config: &ConfigOptions) -> CacheLimits {
        let limit = |field: &str, default: usize| {
            config
                .uint(field)
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(default)
        };
        CacheLimits {
            max_roots: limit("CACHE_MAX_ROOTS", DEFAULT_MAX_ROOTS),
            max_ops: limit("CACHE_MAX_OPS", DEFAULT_MAX_OPS),
        }
    }

    fn build_operation(
        &self,
        _config: &ConfigOptions,
        request: &BuildRequest<'_>,
    ) -> Result<Operation> {
        let peers = connection_set(
            request.algorithm,
            request.group.member_count,
            request.group.my_rank,
            request.coll.coll_type.root,
        );
        Ok(Operation::new(
            request.algorithm,
            request.coll_type,
            request.level,
            request.coll,
            peers,
        ))
    }
}
