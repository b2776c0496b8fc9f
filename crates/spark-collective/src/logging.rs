//! 日志安装入口。
//!
//! # 教案式说明
//! - **意图（Why）**：库代码只通过 `tracing` 宏输出事件；宿主若没有自己的 Subscriber，
//!   调用一次 [`install`] 即可把发现、缓存与排队决策打印到标准输出；
//! - **逻辑（How）**：组装 `EnvFilter + fmt` 两层并设置为全局 Subscriber，
//!   过滤规则取自 `RUST_LOG`，缺省为 `info`；
//! - **契约（What）**：重复调用返回 [`LoggingError::AlreadyInstalled`]，
//!   外部已设置 Subscriber 时返回 [`LoggingError::SubscriberAlreadySet`]，均不恐慌。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装失败的原因。
#[derive(Debug, Error)]
pub enum LoggingError {
    /// [`install`] 已成功执行过。
    #[error("collective logging is already installed")]
    AlreadyInstalled,
    /// 宿主已经设置了全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 的底层失败。
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局日志 Subscriber。
pub fn install() -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Err(LoggingError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    INSTALLED
        .set(())
        .map_err(|_| LoggingError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
