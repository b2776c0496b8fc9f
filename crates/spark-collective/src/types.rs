//! 标识符与有界名称类型。
//!
//! # 设计动机（Why）
//! - 组 ID、集合调用 ID、成员下标与 rank 在底层都是整数，混用极易引发隐蔽缺陷；
//!   通过新类型在编译期区分；
//! - 组件名受固定长度上限约束，超长时显式报错而不是截断。

use core::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{CollectiveError, Result};

/// 组件名的最大字节数。
pub const PLAN_NAME_MAX: usize = 16;

/// 组标识，按创建顺序单调递增。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 组内集合调用标识，在组存活期间单调递增且不复用。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct CollId(pub u32);

impl fmt::Display for CollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coll#{}", self.0)
    }
}

/// 远端成员的稳定标识，worker 内所有组共享同一个端点表时以此为键。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct MemberIndex(pub u64);

impl fmt::Display for MemberIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member{}", self.0)
    }
}

/// 组内 rank，取值范围 `0..member_count`。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Rank(pub u32);

impl Rank {
    /// 以 `usize` 形式读取，便于做下标与取模运算。
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank{}", self.0)
    }
}

/// 组件查询 ABI 的版本号。
///
/// - **契约 (What)**：主版本不同视为不兼容；次版本只做向后兼容的增量。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ApiVersion {
    pub major: u16,
    pub minor: u16,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// 当前核心发给组件的查询版本。
pub const PLAN_API_VERSION: ApiVersion = ApiVersion::new(1, 0);

/// 有界的组件名。
///
/// # 教案式说明
/// - **意图 (Why)**：描述符名来自插件，需要在进入注册表前完成长度与内容校验；
/// - **契约 (What)**：非空、ASCII、长度不超过 [`PLAN_NAME_MAX`]；违反时返回
///   [`CollectiveError::InvalidParam`]；
/// - **执行 (How)**：内部以 `Arc<str>` 保存，克隆零拷贝。
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PlanName(Arc<str>);

impl PlanName {
    /// 校验并构造组件名。
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CollectiveError::invalid("planner name must not be empty"));
        }
        if name.len() > PLAN_NAME_MAX {
            return Err(CollectiveError::invalid(format!(
                "planner name `{name}` exceeds {PLAN_NAME_MAX} bytes"
            )));
        }
        if !name.is_ascii() {
            return Err(CollectiveError::invalid(format!(
                "planner name `{name}` must be ASCII"
            )));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_name_rejects_overlong_input_instead_of_truncating() {
        assert!(PlanName::new("builtin").is_ok());
        assert!(PlanName::new("x".repeat(PLAN_NAME_MAX)).is_ok());
        let err = PlanName::new("x".repeat(PLAN_NAME_MAX + 1)).unwrap_err();
        assert!(matches!(err, CollectiveError::InvalidParam { .. }));
        assert!(PlanName::new("").is_err());
    }
}
