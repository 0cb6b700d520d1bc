use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use flotilla_server::retry::RetryStrategy;
use log::{debug, warn};
use tokio::sync::mpsc;
use tonic::transport::Channel;

use crate::error::AgentResult;
use crate::gen;
use crate::gen::executor::executor_service_client::ExecutorServiceClient;
use crate::gen::framework::framework_service_client::FrameworkServiceClient;
use crate::gen::master::master_service_client::MasterServiceClient;
use crate::id::{ExecutorId, FrameworkId, Pid, SlaveId, TaskId};
use crate::protocol::{
    ExecutorArgs, FrameworkInfo, SlaveInfo, StatusUpdate, Task, TaskDescription,
};
use crate::rpc::ClientHandle;

/// A message addressed to a remote endpoint. Each variant corresponds to one
/// wire message of the master, executor, or framework service.
#[derive(Debug, Clone)]
pub enum Outbound {
    RegisterSlave {
        slave: SlaveInfo,
        pid: Pid,
    },
    ReregisterSlave {
        slave_id: SlaveId,
        slave: SlaveInfo,
        tasks: Vec<Task>,
        pid: Pid,
    },
    StatusUpdate {
        update: StatusUpdate,
        reliable: bool,
        pid: Pid,
    },
    ExitedExecutor {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },
    ExecutorRegistered {
        args: ExecutorArgs,
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
    FrameworkToExecutor {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    ShutdownExecutor,
    ExecutorToFramework {
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
}

#[tonic::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn deliver(&self, to: &Pid, message: Outbound) -> AgentResult<()>;
}

/// Delivers outbound messages over gRPC, keeping one lazily-connected client
/// per destination.
pub struct RpcTransport {
    masters: Mutex<HashMap<Pid, ClientHandle<MasterServiceClient<Channel>>>>,
    executors: Mutex<HashMap<Pid, ClientHandle<ExecutorServiceClient<Channel>>>>,
    frameworks: Mutex<HashMap<Pid, ClientHandle<FrameworkServiceClient<Channel>>>>,
}

impl RpcTransport {
    pub fn new() -> Self {
        Self {
            masters: Mutex::new(HashMap::new()),
            executors: Mutex::new(HashMap::new()),
            frameworks: Mutex::new(HashMap::new()),
        }
    }

    fn master(&self, pid: &Pid) -> ClientHandle<MasterServiceClient<Channel>> {
        let mut masters = self.masters.lock().unwrap_or_else(|e| e.into_inner());
        masters
            .entry(pid.clone())
            .or_insert_with(|| ClientHandle::new(pid.clone()))
            .clone()
    }

    fn executor(&self, pid: &Pid) -> ClientHandle<ExecutorServiceClient<Channel>> {
        let mut executors = self.executors.lock().unwrap_or_else(|e| e.into_inner());
        executors
            .entry(pid.clone())
            .or_insert_with(|| ClientHandle::new(pid.clone()))
            .clone()
    }

    fn framework(&self, pid: &Pid) -> ClientHandle<FrameworkServiceClient<Channel>> {
        let mut frameworks = self.frameworks.lock().unwrap_or_else(|e| e.into_inner());
        frameworks
            .entry(pid.clone())
            .or_insert_with(|| ClientHandle::new(pid.clone()))
            .clone()
    }
}

impl Default for RpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[tonic::async_trait]
impl Transport for RpcTransport {
    async fn deliver(&self, to: &Pid, message: Outbound) -> AgentResult<()> {
        match message {
            Outbound::RegisterSlave { slave, pid } => {
                let mut client = self.master(to).get().await?;
                let request = tonic::Request::new(gen::master::RegisterSlaveRequest {
                    slave: Some((&slave).into()),
                    pid: pid.to_string(),
                });
                let response = client.register_slave(request).await?;
                let gen::master::RegisterSlaveResponse {} = response.into_inner();
            }
            Outbound::ReregisterSlave {
                slave_id,
                slave,
                tasks,
                pid,
            } => {
                let mut client = self.master(to).get().await?;
                let request = tonic::Request::new(gen::master::ReregisterSlaveRequest {
                    slave_id: slave_id.to_string(),
                    slave: Some((&slave).into()),
                    tasks: tasks.iter().map(gen::messages::Task::from).collect(),
                    pid: pid.to_string(),
                });
                let response = client.reregister_slave(request).await?;
                let gen::master::ReregisterSlaveResponse {} = response.into_inner();
            }
            Outbound::StatusUpdate {
                update,
                reliable,
                pid,
            } => {
                let mut client = self.master(to).get().await?;
                let request = tonic::Request::new(gen::master::StatusUpdateRequest {
                    update: Some((&update).into()),
                    reliable,
                    pid: pid.to_string(),
                });
                let response = client.status_update(request).await?;
                let gen::master::StatusUpdateResponse {} = response.into_inner();
            }
            Outbound::ExitedExecutor {
                slave_id,
                framework_id,
                executor_id,
                status,
            } => {
                let mut client = self.master(to).get().await?;
                let request = tonic::Request::new(gen::master::ExitedExecutorRequest {
                    slave_id: slave_id.to_string(),
                    framework_id: framework_id.to_string(),
                    executor_id: executor_id.to_string(),
                    status,
                });
                let response = client.exited_executor(request).await?;
                let gen::master::ExitedExecutorResponse {} = response.into_inner();
            }
            Outbound::ExecutorRegistered { args } => {
                let mut client = self.executor(to).get().await?;
                let request = tonic::Request::new(gen::executor::ExecutorRegisteredRequest {
                    args: Some((&args).into()),
                });
                let response = client.executor_registered(request).await?;
                let gen::executor::ExecutorRegisteredResponse {} = response.into_inner();
            }
            Outbound::RunTask {
                framework,
                framework_id,
                pid,
                task,
            } => {
                let mut client = self.executor(to).get().await?;
                let request = tonic::Request::new(gen::executor::RunTaskRequest {
                    framework: Some((&framework).into()),
                    framework_id: framework_id.to_string(),
                    pid: pid.to_string(),
                    task: Some((&task).into()),
                });
                let response = client.run_task(request).await?;
                let gen::executor::RunTaskResponse {} = response.into_inner();
            }
            Outbound::KillTask {
                framework_id,
                task_id,
            } => {
                let mut client = self.executor(to).get().await?;
                let request = tonic::Request::new(gen::executor::KillTaskRequest {
                    framework_id: framework_id.to_string(),
                    task_id: task_id.to_string(),
                });
                let response = client.kill_task(request).await?;
                let gen::executor::KillTaskResponse {} = response.into_inner();
            }
            Outbound::FrameworkToExecutor {
                slave_id,
                framework_id,
                executor_id,
                data,
            } => {
                let mut client = self.executor(to).get().await?;
                let request = tonic::Request::new(gen::executor::FrameworkToExecutorRequest {
                    slave_id: slave_id.to_string(),
                    framework_id: framework_id.to_string(),
                    executor_id: executor_id.to_string(),
                    data,
                });
                let response = client.framework_to_executor(request).await?;
                let gen::executor::FrameworkToExecutorResponse {} = response.into_inner();
            }
            Outbound::ShutdownExecutor => {
                let mut client = self.executor(to).get().await?;
                let request = tonic::Request::new(gen::executor::ShutdownRequest {});
                let response = client.shutdown(request).await?;
                let gen::executor::ShutdownResponse {} = response.into_inner();
            }
            Outbound::ExecutorToFramework {
                slave_id,
                framework_id,
                executor_id,
                data,
            } => {
                let mut client = self.framework(to).get().await?;
                let request = tonic::Request::new(gen::framework::ExecutorToFrameworkRequest {
                    slave_id: slave_id.to_string(),
                    framework_id: framework_id.to_string(),
                    executor_id: executor_id.to_string(),
                    data,
                });
                let response = client.executor_to_framework(request).await?;
                let gen::framework::ExecutorToFrameworkResponse {} = response.into_inner();
            }
        }
        Ok(())
    }
}

/// Serializes outbound messages per destination. One drain task per pid keeps
/// the delivery order equal to the order the agent produced the messages,
/// which is what makes `ExecutorRegistered` reach an executor before any
/// `RunTask`. Delivery failures are reported through the failure channel as
/// the transport-level analogue of a broken link.
pub struct Outbox {
    transport: Arc<dyn Transport>,
    retry: RetryStrategy,
    senders: HashMap<Pid, mpsc::UnboundedSender<Outbound>>,
    failure_tx: mpsc::UnboundedSender<Pid>,
    failure_rx: Option<mpsc::UnboundedReceiver<Pid>>,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryStrategy) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            retry,
            senders: HashMap::new(),
            failure_tx,
            failure_rx: Some(failure_rx),
        }
    }

    /// Take the stream of destinations that failed delivery. Can be taken once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<Pid>> {
        self.failure_rx.take()
    }

    pub fn send(&mut self, to: &Pid, message: Outbound) {
        if !self.senders.contains_key(to) {
            let sender = drain(
                Arc::clone(&self.transport),
                self.retry.clone(),
                to.clone(),
                self.failure_tx.clone(),
            );
            self.senders.insert(to.clone(), sender);
        }
        if let Some(sender) = self.senders.get(to) {
            if sender.send(message).is_err() {
                warn!("outbound channel to {to} is closed");
            }
        }
    }

    /// Drop the outbound channel for a destination that is going away.
    /// Messages already enqueued are still delivered.
    pub fn close(&mut self, to: &Pid) {
        self.senders.remove(to);
    }
}

fn drain(
    transport: Arc<dyn Transport>,
    retry: RetryStrategy,
    pid: Pid,
    failures: mpsc::UnboundedSender<Pid>,
) -> mpsc::UnboundedSender<Outbound> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            debug!("delivering message to {pid}: {message:?}");
            let out = retry
                .run(|| {
                    let transport = Arc::clone(&transport);
                    let message = message.clone();
                    let pid = pid.clone();
                    async move { transport.deliver(&pid, message).await }
                })
                .await;
            if let Err(e) = out {
                warn!("failed to deliver message to {pid}: {e}");
                let _ = failures.send(pid.clone());
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::AgentError;

    struct RecordingTransport {
        delivered: mpsc::UnboundedSender<(Pid, Outbound)>,
    }

    #[tonic::async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, to: &Pid, message: Outbound) -> AgentResult<()> {
            self.delivered
                .send((to.clone(), message))
                .map_err(|_| AgentError::InternalError("receiver dropped".to_string()))
        }
    }

    fn retry() -> RetryStrategy {
        RetryStrategy::Fixed {
            max_count: 0,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_outbox_preserves_per_destination_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new(Arc::new(RecordingTransport { delivered: tx }), retry());
        let executor: Pid = "executor:7070".parse().unwrap();

        outbox.send(
            &executor,
            Outbound::ExecutorRegistered {
                args: ExecutorArgs {
                    framework_id: "f1".into(),
                    executor_id: "e1".into(),
                    slave_id: "s1".into(),
                    hostname: "host".to_string(),
                    data: vec![],
                },
            },
        );
        for i in 0..10 {
            outbox.send(
                &executor,
                Outbound::KillTask {
                    framework_id: "f1".into(),
                    task_id: format!("t{i}").into(),
                },
            );
        }

        let (to, first) = rx.recv().await.unwrap();
        assert_eq!(to, executor);
        assert!(matches!(first, Outbound::ExecutorRegistered { .. }));
        for i in 0..10 {
            let (_, message) = rx.recv().await.unwrap();
            match message {
                Outbound::KillTask { task_id, .. } => {
                    assert_eq!(task_id, format!("t{i}").into());
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_outbox_reports_delivery_failures() {
        struct FailingTransport;

        #[tonic::async_trait]
        impl Transport for FailingTransport {
            async fn deliver(&self, _to: &Pid, _message: Outbound) -> AgentResult<()> {
                Err(AgentError::InternalError("unreachable".to_string()))
            }
        }

        let mut outbox = Outbox::new(Arc::new(FailingTransport), retry());
        let mut failures = outbox.take_failures().unwrap();
        let master: Pid = "master:5050".parse().unwrap();
        outbox.send(&master, Outbound::ShutdownExecutor);
        assert_eq!(failures.recv().await, Some(master));
    }
}
