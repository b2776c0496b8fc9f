//! 进程内回环传输。
//!
//! # 教案式说明
//! - **意图 (Why)**：在没有真实网络的宿主与测试中驱动完整的规划流程；
//!   同时提供故障注入，覆盖端点创建失败与内存注册失败等错误路径；
//! - **执行 (How)**：状态保存在 `Arc<spin::Mutex<_>>` 中，克隆出的句柄共享同一状态，
//!   测试可以一边把传输交给注册表，一边从外部观测与注入完成事件；
//! - **风险 (Trade-offs)**：自旋锁仅适合极短临界区，这里每次操作只做少量计数与向量追加。

use std::{collections::VecDeque, sync::Arc};

use spin::Mutex;

use super::{
    Completion, CompletionStatus, EndpointHandle, InterfaceHandle, Launch, MemoryHandle, Transport,
};
use crate::{
    error::{CollectiveError, Result},
    params::MemoryRegion,
    types::{CollId, GroupId, MemberIndex},
};

/// 被启动的一次执行记录。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRecord {
    pub group: GroupId,
    pub coll: CollId,
    pub endpoints: Vec<EndpointHandle>,
    pub memory: Vec<MemoryHandle>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    interfaces: Vec<InterfaceHandle>,
    next_handle: u64,
    endpoints_created: Vec<MemberIndex>,
    registered: Vec<(MemoryHandle, MemoryRegion)>,
    deregistered: Vec<MemoryHandle>,
    launches: Vec<LaunchRecord>,
    completions: VecDeque<Completion>,
    fail_endpoints: bool,
    fail_registration: bool,
    auto_complete: bool,
}

/// 回环传输句柄，克隆后共享状态。
#[derive(Clone, Debug, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    /// 以给定数量的接口创建。
    pub fn new(interface_count: u64) -> Self {
        let transport = Self::default();
        transport.state.lock().interfaces = (0..interface_count).map(InterfaceHandle).collect();
        transport
    }

    /// 启动后立即报告完成，适合只关心规划结果的场景。
    pub fn with_auto_complete(self) -> Self {
        self.state.lock().auto_complete = true;
        self
    }

    pub fn fail_endpoint_creation(&self, fail: bool) {
        self.state.lock().fail_endpoints = fail;
    }

    pub fn fail_memory_registration(&self, fail: bool) {
        self.state.lock().fail_registration = fail;
    }

    /// 注入一条完成事件。
    pub fn complete(&self, group: GroupId, coll: CollId) {
        self.state.lock().completions.push_back(Completion {
            group,
            coll,
            status: CompletionStatus::Done,
        });
    }

    /// 注入一条失败事件。
    pub fn fail(&self, group: GroupId, coll: CollId, reason: impl Into<String>) {
        self.state.lock().completions.push_back(Completion {
            group,
            coll,
            status: CompletionStatus::Failed(reason.into()),
        });
    }

    pub fn endpoints_created(&self) -> Vec<MemberIndex> {
        self.state.lock().endpoints_created.clone()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn registered_regions(&self) -> Vec<MemoryRegion> {
        self.state
            .lock()
            .registered
            .iter()
            .map(|(_, region)| *region)
            .collect()
    }

    /// 仍处于注册状态的句柄数量。
    pub fn live_registrations(&self) -> usize {
        let state = self.state.lock();
        state
            .registered
            .iter()
            .filter(|(handle, _)| !state.deregistered.contains(handle))
            .count()
    }

    fn next_handle(state: &mut LoopbackState) -> u64 {
        state.next_handle += 1;
        state.next_handle
    }
}

impl Transport for LoopbackTransport {
    fn interfaces(&self) -> Vec<InterfaceHandle> {
        self.state.lock().interfaces.clone()
    }

    fn create_endpoint(&mut self, member: MemberIndex) -> Result<EndpointHandle> {
        let mut state = self.state.lock();
        if state.fail_endpoints {
            return Err(CollectiveError::transport(
                "create endpoint",
                format!("loopback refused {member}"),
            ));
        }
        state.endpoints_created.push(member);
        Ok(EndpointHandle(Self::next_handle(&mut state)))
    }

    fn register_memory(&mut self, region: &MemoryRegion) -> Result<MemoryHandle> {
        let mut state = self.state.lock();
        if state.fail_registration {
            return Err(CollectiveError::transport(
                "register memory",
                format!("loopback refused {} bytes at {:#x}", region.len, region.addr),
            ));
        }
        let handle = MemoryHandle(Self::next_handle(&mut state));
        state.registered.push((handle, *region));
        Ok(handle)
    }

    fn deregister_memory(&mut self, handle: MemoryHandle) {
        self.state.lock().deregistered.push(handle);
    }

    fn launch(&mut self, launch: Launch<'_>) -> Result<()> {
        let mut state = self.state.lock();
        state.launches.push(LaunchRecord {
            group: launch.group,
            coll: launch.coll,
            endpoints: launch.endpoints.to_vec(),
            memory: launch.memory.to_vec(),
        });
        if state.auto_complete {
            state.completions.push_back(Completion {
                group: launch.group,
                coll: launch.coll,
                status: CompletionStatus::Done,
            });
        }
        Ok(())
    }

    fn poll_completions(&mut self) -> Vec<Completion> {
        self.state.lock().completions.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let observer = LoopbackTransport::new(2);
        let mut transport = observer.clone();
        let handle = transport
            .register_memory(&MemoryRegion::new(0x1000, 64))
            .unwrap();
        assert_eq!(observer.live_registrations(), 1);
        transport.deregister_memory(handle);
        assert_eq!(observer.live_registrations(), 0);

        observer.complete(GroupId(1), CollId(4));
        let completions = transport.poll_completions();
        assert_eq!(completions.len(), 1);
        assert!(transport.poll_completions().is_empty());
    }

    #[test]
    fn injected_registration_failure_is_a_transport_error() {
        let mut transport = LoopbackTransport::new(1);
        transport.fail_memory_registration(true);
        let err = transport
            .register_memory(&MemoryRegion::new(0x10, 8))
            .unwrap_err();
        assert_eq!(err.code(), "collective.transport");
    }
}
