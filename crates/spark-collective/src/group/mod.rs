//! # 组与端点注册表
//!
//! ## 核心意图（Why）
//! - 追踪 worker 内的全部存活组、共享端点表与接口句柄；
//! - 在协作式单线程推进模型下维护唯一的顺序不变式：屏障执行期间到达的提交
//!   必须排队，并在屏障完成后严格按提交顺序回放。
//!
//! ## 行为契约（What）
//! - [`GroupRegistry`] 拥有全部 [`Group`]，外部只读访问组状态；
//! - 一次调用的启动路径为：决策 → 缓存查找或构建 → 解析对端 rank →
//!   取得或创建端点 → 交给传输层；
//! - [`GroupRegistry::progress`] 从不阻塞，只处理传输层已经报告的完成事件。

mod endpoints;
mod registry;
mod state;

pub use endpoints::EndpointMap;
pub use registry::{GroupRegistry, Progress};
pub use state::{DrainReport, GateState, Group, SubmitOutcome};
