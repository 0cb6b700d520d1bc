use tokio::sync::oneshot;

use crate::id::{ExecutorId, FrameworkId, Pid, SlaveId, TaskId};
use crate::introspection::AgentSnapshot;
use crate::protocol::{FrameworkInfo, StatusUpdate, TaskDescription};

/// Everything the agent actor reacts to. Every inbound wire message, isolation
/// callback, and delayed self-message lands here; handlers run to completion
/// one at a time.
pub enum AgentEvent {
    ServerReady {
        /// The local port the agent server listens on.
        port: u16,
        signal: oneshot::Sender<()>,
    },
    NewMasterDetected {
        pid: Pid,
    },
    NoMasterDetected,
    Registered {
        slave_id: SlaveId,
    },
    Reregistered {
        slave_id: SlaveId,
    },
    RunTask {
        framework: FrameworkInfo,
        framework_id: FrameworkId,
        pid: Pid,
        task: TaskDescription,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    KillFramework {
        framework_id: FrameworkId,
    },
    FrameworkToExecutor {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    UpdateFramework {
        framework_id: FrameworkId,
        pid: Pid,
    },
    StatusUpdateAcknowledged {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    RegisterExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: Pid,
    },
    StatusUpdate {
        update: StatusUpdate,
    },
    ExecutorToFramework {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    /// Delayed self-message arming the reliable-update retry.
    StatusUpdateTimeout {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    ExecutorStarted {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: u32,
    },
    /// Authoritative executor termination signal from the isolation module.
    ExecutorExited {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    /// A remote endpoint became unreachable.
    ExitedPid {
        pid: Pid,
    },
    Ping {
        result: oneshot::Sender<()>,
    },
    GetSnapshot {
        result: oneshot::Sender<AgentSnapshot>,
    },
    Shutdown,
}
