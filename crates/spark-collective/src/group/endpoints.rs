use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{
    error::{CollectiveError, Result},
    transport::{EndpointHandle, Transport},
    types::MemberIndex,
};

/// worker 内所有组共享的端点表。
///
/// # 教案式说明
/// - **意图 (Why)**：同一远端成员可能出现在多个组中，连接只应建立一次；
/// - **契约 (What)**：每个 [`MemberIndex`] 至多一个端点；条目只增不删，
///   销毁组不会移除其使用过的端点；
/// - **风险 (Trade-offs)**：传输层建连失败时不写入条目，下次调用会重试。
#[derive(Debug, Default)]
pub struct EndpointMap {
    endpoints: FxHashMap<MemberIndex, EndpointHandle>,
}

impl EndpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, member: MemberIndex) -> Option<EndpointHandle> {
        self.endpoints.get(&member).copied()
    }

    /// 查表，未命中时向传输层请求新端点并写入。
    pub fn get_or_create(
        &mut self,
        transport: &mut dyn Transport,
        member: MemberIndex,
    ) -> Result<EndpointHandle> {
        if let Some(handle) = self.endpoints.get(&member) {
            return Ok(*handle);
        }
        self.endpoints
            .try_reserve(1)
            .map_err(|_| CollectiveError::NoMemory {
                context: "grow endpoint map",
            })?;
        let handle = transport.create_endpoint(member)?;
        self.endpoints.insert(member, handle);
        trace!(%member, endpoint = handle.0, "endpoint created");
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
