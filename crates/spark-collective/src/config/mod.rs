//! 组件配置：表结构、取值与加载能力。
//!
//! # 设计动机（Why）
//! - 每个规划组件声明一张静态配置表，发现阶段按 `UCX_` + 组件前缀 + 字段名读取；
//! - 表结构与取值分离：表是 `'static` 的，取值 [`ConfigOptions`] 随描述符一起被拥有与释放。
//!
//! # 集成方式（How）
//! - 组件实现者以 `const` 切片声明 [`ConfigField`]，包装为 [`ConfigTable`]；
//! - 注册表通过 [`ConfigLoader`] 填充与归还取值，默认实现为 [`SourceLoader`]。

mod source;

pub use source::{ConfigLoader, ConfigSource, EnvSource, MapSource, SourceLoader};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{CollectiveError, Result};

/// 所有组件共享的环境变量前缀。
pub const ENV_PREFIX: &str = "UCX_";

/// 配置字段的取值种类。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigKind {
    /// 无符号整数。
    Uint,
    /// 不超过给定上限的无符号整数；超限视为畸形配置而不是截断。
    BoundedUint(u64),
    /// 布尔值，接受 `y/n/yes/no/true/false/on/off/1/0`。
    Bool,
    /// 字节数，接受 `k/m/g` 后缀（1024 进制）与 `inf`。
    MemUnits,
    /// 任意文本。
    Text,
    /// 固定候选集合内的取值，大小写不敏感，规范化为小写。
    Choice(&'static [&'static str]),
}

/// 配置表中的单个字段。
#[derive(Clone, Copy, Debug)]
pub struct ConfigField {
    pub name: &'static str,
    pub default: &'static str,
    pub doc: &'static str,
    pub kind: ConfigKind,
}

impl ConfigField {
    pub const fn new(
        name: &'static str,
        default: &'static str,
        doc: &'static str,
        kind: ConfigKind,
    ) -> Self {
        Self {
            name,
            default,
            doc,
            kind,
        }
    }
}

/// 组件配置表。
///
/// - **契约 (What)**：字段名在表内唯一，使用大写与下划线；`name` 仅用于日志。
#[derive(Clone, Copy, Debug)]
pub struct ConfigTable {
    pub name: &'static str,
    pub fields: &'static [ConfigField],
}

impl ConfigTable {
    pub const fn new(name: &'static str, fields: &'static [ConfigField]) -> Self {
        Self { name, fields }
    }

    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// 解析后的配置值。
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Uint(u64),
    Bool(bool),
    /// 字节数；`u64::MAX` 表示 `inf`。
    Bytes(u64),
    Text(String),
}

impl ConfigValue {
    /// 按字段种类解析原始文本。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：环境变量与 TOML 都以文本进入，统一在这里做类型化；
    /// - **契约 (What)**：`key` 为完整键名，仅用于错误信息；失败返回
    ///   [`CollectiveError::MalformedConfig`]。
    pub fn parse(kind: ConfigKind, key: &str, raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let malformed = |reason: &str| CollectiveError::MalformedConfig {
            key: key.to_owned(),
            value: raw.to_owned(),
            reason: reason.to_owned(),
        };

        match kind {
            ConfigKind::Uint => trimmed
                .parse::<u64>()
                .map(ConfigValue::Uint)
                .map_err(|_| malformed("expected an unsigned integer")),
            ConfigKind::BoundedUint(max) => match trimmed.parse::<u64>() {
                Ok(value) if value <= max => Ok(ConfigValue::Uint(value)),
                Ok(_) => Err(malformed(&format!(
                    "expected an unsigned integer no greater than {max}"
                ))),
                Err(_) => Err(malformed("expected an unsigned integer")),
            },
            ConfigKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" | "on" | "1" => Ok(ConfigValue::Bool(true)),
                "n" | "no" | "false" | "off" | "0" => Ok(ConfigValue::Bool(false)),
                _ => Err(malformed("expected a boolean")),
            },
            ConfigKind::MemUnits => parse_mem_units(trimmed)
                .map(ConfigValue::Bytes)
                .ok_or_else(|| malformed("expected a byte size such as 8k or 1m")),
            ConfigKind::Text => Ok(ConfigValue::Text(trimmed.to_owned())),
            ConfigKind::Choice(choices) => {
                let lowered = trimmed.to_ascii_lowercase();
                if choices.contains(&lowered.as_str()) {
                    Ok(ConfigValue::Text(lowered))
                } else {
                    Err(malformed(&format!("expected one of {choices:?}")))
                }
            }
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            ConfigValue::Uint(value) | ConfigValue::Bytes(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

fn parse_mem_units(raw: &str) -> Option<u64> {
    let lowered = raw.to_ascii_lowercase();
    if lowered == "inf" {
        return Some(u64::MAX);
    }
    let lowered = lowered.strip_suffix('b').unwrap_or(&lowered);
    let (digits, shift) = match lowered.chars().last()? {
        'k' => (&lowered[..lowered.len() - 1], 10),
        'm' => (&lowered[..lowered.len() - 1], 20),
        'g' => (&lowered[..lowered.len() - 1], 30),
        _ => (lowered, 0),
    };
    let value = digits.trim().parse::<u64>().ok()?;
    value.checked_mul(1u64 << shift)
}

/// 一次填充得到的配置取值集合。
///
/// - **契约 (What)**：包含表中每一个字段（未显式设置时为默认值）；
///   只能通过 [`ConfigLoader::release_opts`] 归还，归还后不可再读。
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConfigOptions {
    values: BTreeMap<&'static str, ConfigValue>,
}

impl ConfigOptions {
    pub(crate) fn insert(&mut self, name: &'static str, value: ConfigValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(ConfigValue::as_uint)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ConfigValue::as_bool)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ConfigValue::as_str)
    }

    /// 字段数量，用于统计注册表的配置占用。
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ConfigValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_units_accept_binary_suffixes() {
        let parse = |raw| ConfigValue::parse(ConfigKind::MemUnits, "K", raw);
        assert_eq!(parse("8k"), Ok(ConfigValue::Bytes(8192)));
        assert_eq!(parse("1MB"), Ok(ConfigValue::Bytes(1 << 20)));
        assert_eq!(parse("512"), Ok(ConfigValue::Bytes(512)));
        assert_eq!(parse("inf"), Ok(ConfigValue::Bytes(u64::MAX)));
        assert!(parse("lots").is_err());
    }

    #[test]
    fn choice_is_case_insensitive_and_normalized() {
        let kind = ConfigKind::Choice(&["auto", "ring"]);
        assert_eq!(
            ConfigValue::parse(kind, "K", "Ring"),
            Ok(ConfigValue::Text("ring".into()))
        );
        let err = ConfigValue::parse(kind, "UCX_X", "tree").unwrap_err();
        assert!(matches!(
            err,
            CollectiveError::MalformedConfig { ref key, .. } if key == "UCX_X"
        ));
    }

    #[test]
    fn bounded_uint_rejects_values_above_the_limit() {
        let kind = ConfigKind::BoundedUint(10);
        assert_eq!(ConfigValue::parse(kind, "K", "10"), Ok(ConfigValue::Uint(10)));
        let err = ConfigValue::parse(kind, "UCX_K", "11").unwrap_err();
        assert_eq!(
            err,
            CollectiveError::MalformedConfig {
                key: "UCX_K".into(),
                value: "11".into(),
                reason: "expected an unsigned integer no greater than 10".into(),
            }
        );
    }

    #[test]
    fn bool_accepts_ucx_spellings() {
        assert_eq!(
            ConfigValue::parse(ConfigKind::Bool, "K", "y"),
            Ok(ConfigValue::Bool(true))
        );
        assert_eq!(
            ConfigValue::parse(ConfigKind::Bool, "K", "off"),
            Ok(ConfigValue::Bool(false))
        );
    }
}
