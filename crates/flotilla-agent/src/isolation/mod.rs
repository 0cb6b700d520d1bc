mod process;

use std::path::PathBuf;
use std::sync::Arc;

use flotilla_server::actor::ActorHandle;
use log::warn;
use tokio::sync::mpsc;

use crate::agent::AgentActor;
use crate::id::{ExecutorId, FrameworkId, Pid};
use crate::protocol::{ExecutorInfo, FrameworkInfo};
use crate::resources::Resources;

pub use process::ProcessIsolationModule;

/// The subsystem that forks, polices, and reaps executor processes. All calls
/// are asynchronous; lifecycle callbacks re-enter the agent through its
/// mailbox as `ExecutorStarted` / `ExecutorExited` events.
#[tonic::async_trait]
pub trait IsolationModule: Send + Sync + 'static {
    /// Called once, before any executor is launched, with the handle and
    /// advertised address used for callbacks and executor registration.
    async fn initialize(&self, agent: ActorHandle<AgentActor>, address: Pid);

    /// Fork and start an executor; must eventually produce an
    /// `ExecutorStarted` or `ExecutorExited` callback.
    async fn launch_executor(
        &self,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        executor: ExecutorInfo,
        directory: PathBuf,
    );

    /// Terminate a running executor.
    async fn kill_executor(&self, framework_id: FrameworkId, executor_id: ExecutorId);

    /// Advise the isolation layer of the new aggregate resource limits for an
    /// executor.
    async fn resources_changed(
        &self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        resources: Resources,
    );

    /// Stop all executors on a best-effort basis and wait for their
    /// termination.
    async fn stop(&self);
}

enum IsolationCall {
    Initialize {
        agent: ActorHandle<AgentActor>,
        address: Pid,
    },
    LaunchExecutor {
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        executor: ExecutorInfo,
        directory: PathBuf,
    },
    KillExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
    ResourcesChanged {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        resources: Resources,
    },
}

/// Serializes calls into the isolation module so they are observed in the
/// order the agent produced them, while keeping the agent's handlers free of
/// suspension points.
#[derive(Clone)]
pub struct IsolationDispatcher {
    module: Arc<dyn IsolationModule>,
    calls: mpsc::UnboundedSender<IsolationCall>,
}

impl IsolationDispatcher {
    pub fn new(module: Arc<dyn IsolationModule>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let drain = Arc::clone(&module);
        tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                match call {
                    IsolationCall::Initialize { agent, address } => {
                        drain.initialize(agent, address).await;
                    }
                    IsolationCall::LaunchExecutor {
                        framework_id,
                        framework,
                        executor,
                        directory,
                    } => {
                        drain
                            .launch_executor(framework_id, framework, executor, directory)
                            .await;
                    }
                    IsolationCall::KillExecutor {
                        framework_id,
                        executor_id,
                    } => {
                        drain.kill_executor(framework_id, executor_id).await;
                    }
                    IsolationCall::ResourcesChanged {
                        framework_id,
                        executor_id,
                        resources,
                    } => {
                        drain
                            .resources_changed(framework_id, executor_id, resources)
                            .await;
                    }
                }
            }
        });
        Self { module, calls: tx }
    }

    pub fn initialize(&self, agent: ActorHandle<AgentActor>, address: Pid) {
        self.dispatch(IsolationCall::Initialize { agent, address });
    }

    pub fn launch_executor(
        &self,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        executor: ExecutorInfo,
        directory: PathBuf,
    ) {
        self.dispatch(IsolationCall::LaunchExecutor {
            framework_id,
            framework,
            executor,
            directory,
        });
    }

    pub fn kill_executor(&self, framework_id: FrameworkId, executor_id: ExecutorId) {
        self.dispatch(IsolationCall::KillExecutor {
            framework_id,
            executor_id,
        });
    }

    pub fn resources_changed(
        &self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        resources: Resources,
    ) {
        self.dispatch(IsolationCall::ResourcesChanged {
            framework_id,
            executor_id,
            resources,
        });
    }

    pub async fn stop(&self) {
        self.module.stop().await;
    }

    fn dispatch(&self, call: IsolationCall) {
        if self.calls.send(call).is_err() {
            warn!("isolation module is no longer accepting calls");
        }
    }
}
