use std::sync::Arc;

use super::PlanComponent;
use crate::{
    config::{ConfigLoader, ConfigOptions, ConfigTable, ENV_PREFIX},
    error::Result,
    types::PlanName,
};

/// 一个组件加载一次的配置：表结构、完整前缀与取值。
///
/// # 教案式说明
/// - **意图 (Why)**：描述符需要从配置取值回到其表结构与前缀以完成归还；
///   这里以显式的拥有结构代替按固定偏移回溯；
/// - **契约 (What)**：只能通过 [`ConfigBundle::release`] 把取值交回加载器，之后不可再读。
#[derive(Debug)]
pub struct ConfigBundle {
    table: ConfigTable,
    prefix: String,
    options: ConfigOptions,
}

impl ConfigBundle {
    pub(crate) fn load(component: &dyn PlanComponent, loader: &dyn ConfigLoader) -> Result<Self> {
        let table = component.config_table();
        let options = loader.fill_opts(&table, ENV_PREFIX, component.config_prefix())?;
        Ok(Self {
            table,
            prefix: format!("{ENV_PREFIX}{}", component.config_prefix()),
            options,
        })
    }

    pub fn table(&self) -> &ConfigTable {
        &self.table
    }

    /// 完整键前缀，例如 `UCX_BUILTIN_`。
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn options(&self) -> &ConfigOptions {
        &self.options
    }

    pub(crate) fn release(self, loader: &dyn ConfigLoader) {
        loader.release_opts(self.options, &self.table);
    }
}

/// 计划描述符：组件、计划名与该组件的配置包。
#[derive(Clone, Debug)]
pub struct PlanDescriptor {
    name: PlanName,
    component: Arc<dyn PlanComponent>,
    config: Arc<ConfigBundle>,
}

impl PlanDescriptor {
    pub(crate) fn new(
        name: PlanName,
        component: Arc<dyn PlanComponent>,
        config: Arc<ConfigBundle>,
    ) -> Self {
        Self {
            name,
            component,
            config,
        }
    }

    pub fn name(&self) -> &PlanName {
        &self.name
    }

    pub fn component(&self) -> &Arc<dyn PlanComponent> {
        &self.component
    }

    pub fn config(&self) -> &Arc<ConfigBundle> {
        &self.config
    }

    pub(crate) fn into_bundle(self) -> Arc<ConfigBundle> {
        self.config
    }
}

/// 发现流程的产物。
///
/// - **契约 (What)**：只能由注册表构建；经 [`super::ComponentRegistry::release`] 归还。
#[derive(Debug, Default)]
pub struct PlanDescriptorSet {
    descriptors: Vec<PlanDescriptor>,
}

impl PlanDescriptorSet {
    pub(crate) fn from_vec(descriptors: Vec<PlanDescriptor>) -> Self {
        Self { descriptors }
    }

    pub(crate) fn into_vec(self) -> Vec<PlanDescriptor> {
        self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn first(&self) -> Option<&PlanDescriptor> {
        self.descriptors.first()
    }

    pub fn get(&self, index: usize) -> Option<&PlanDescriptor> {
        self.descriptors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanDescriptor> {
        self.descriptors.iter()
    }

    /// 全部配置包的字段总数，共享的配置包只计一次。
    pub fn config_footprint(&self) -> usize {
        let mut seen: Vec<&Arc<ConfigBundle>> = Vec::new();
        for descriptor in &self.descriptors {
            if !seen.iter().any(|known| Arc::ptr_eq(*known, &descriptor.config)) {
                seen.push(&descriptor.config);
            }
        }
        seen.iter().map(|bundle| bundle.options.len()).sum()
    }
}

impl From<PlanDescriptor> for PlanDescriptorSet {
    fn from(descriptor: PlanDescriptor) -> Self {
        Self::from_vec(vec![descriptor])
    }
}
