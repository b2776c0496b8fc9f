use std::{collections::BTreeMap, env};

use tracing::debug;

use super::{ConfigOptions, ConfigTable, ConfigValue};
use crate::error::{CollectiveError, Result};

/// 键值配置源。
///
/// ### 设计目的（Why）
/// - 抽象环境变量、配置文件等不同后端，核心只需要“按完整键名查值”这一能力；
///
/// ### 契约说明（What）
/// - `lookup` 的键为完整名称（如 `UCX_BUILTIN_BCAST_ALGORITHM`）；
/// - 查询没有副作用，相同键的重复查询返回相同结果。
pub trait ConfigSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// 读取进程环境变量的配置源。
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn lookup(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// 内存中的配置源，测试与嵌入式宿主使用。
///
/// ### 行为说明（How）
/// - [`MapSource::from_toml_str`] 将嵌套表按层级以 `_` 连接并转为大写，
///   例如 `[ucx.builtin] bcast_algorithm = "ring"` 对应键 `UCX_BUILTIN_BCAST_ALGORITHM`；
/// - 标量统一转为文本，后续由配置表按字段种类解析。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MapSource {
    entries: BTreeMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加或覆盖一项。
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 从 TOML 文本构建。
    ///
    /// - **契约 (What)**：语法错误与数组取值均返回 [`CollectiveError::MalformedConfig`]。
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let table = toml::from_str::<toml::Table>(document).map_err(|err| {
            CollectiveError::MalformedConfig {
                key: "<document>".to_owned(),
                value: String::new(),
                reason: err.message().to_owned(),
            }
        })?;
        let mut source = Self::new();
        flatten_table(&mut source, None, &table)?;
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flatten_table(source: &mut MapSource, prefix: Option<&str>, table: &toml::Table) -> Result<()> {
    for (key, value) in table {
        let full = match prefix {
            Some(prefix) => format!("{prefix}_{}", key.to_ascii_uppercase()),
            None => key.to_ascii_uppercase(),
        };
        match value {
            toml::Value::Table(nested) => flatten_table(source, Some(&full), nested)?,
            toml::Value::String(text) => source.insert(full, text.clone()),
            toml::Value::Integer(number) => source.insert(full, number.to_string()),
            toml::Value::Boolean(flag) => source.insert(full, flag.to_string()),
            toml::Value::Float(number) => source.insert(full, number.to_string()),
            toml::Value::Datetime(stamp) => source.insert(full, stamp.to_string()),
            toml::Value::Array(_) => {
                return Err(CollectiveError::MalformedConfig {
                    key: full,
                    value: value.to_string(),
                    reason: "arrays are not supported".to_owned(),
                });
            }
        }
    }
    Ok(())
}

impl ConfigSource for MapSource {
    fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// “按环境前缀填充配置”与“归还已填充配置”的成对能力。
///
/// ### 契约说明（What）
/// - `fill_opts` 成功时返回包含表中全部字段的 [`ConfigOptions`]；
/// - 每次成功的 `fill_opts` 必须且只能对应一次 `release_opts`；
/// - 失败时不得留下任何需要归还的状态。
pub trait ConfigLoader: Send + Sync {
    fn fill_opts(
        &self,
        table: &ConfigTable,
        env_prefix: &str,
        cfg_prefix: &str,
    ) -> Result<ConfigOptions>;

    fn release_opts(&self, options: ConfigOptions, table: &ConfigTable);
}

/// 基于 [`ConfigSource`] 的默认加载器。
///
/// ### 行为说明（How）
/// - 每个字段依次查询 `env_prefix + cfg_prefix + NAME`、`env_prefix + NAME`，都缺失时取默认值；
/// - 任一字段解析失败则整体失败。
#[derive(Clone, Debug, Default)]
pub struct SourceLoader<S> {
    source: S,
}

impl<S: ConfigSource> SourceLoader<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: ConfigSource> ConfigLoader for SourceLoader<S> {
    fn fill_opts(
        &self,
        table: &ConfigTable,
        env_prefix: &str,
        cfg_prefix: &str,
    ) -> Result<ConfigOptions> {
        let mut options = ConfigOptions::default();
        for field in table.fields {
            let scoped = format!("{env_prefix}{cfg_prefix}{}", field.name);
            let global = format!("{env_prefix}{}", field.name);
            let (key, raw) = match self.source.lookup(&scoped) {
                Some(raw) => (scoped, raw),
                None => match self.source.lookup(&global) {
                    Some(raw) => (global, raw),
                    None => (scoped, field.default.to_owned()),
                },
            };
            let value = ConfigValue::parse(field.kind, &key, &raw)?;
            options.insert(field.name, value);
        }
        debug!(
            table = table.name,
            prefix = cfg_prefix,
            fields = options.len(),
            "filled component configuration"
        );
        Ok(options)
    }

    fn release_opts(&self, options: ConfigOptions, table: &ConfigTable) {
        debug!(
            table = table.name,
            fields = options.len(),
            "released component configuration"
        );
        drop(options);
    }
}
