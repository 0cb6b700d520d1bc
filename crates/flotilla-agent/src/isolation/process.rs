use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use flotilla_server::actor::ActorHandle;
use log::{debug, info, warn};
use nix::sys::signal::{self, Signal};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::agent::{AgentActor, AgentEvent, AgentOptions};
use crate::id::{ExecutorId, FrameworkId, Pid};
use crate::isolation::IsolationModule;
use crate::protocol::{ExecutorInfo, FrameworkInfo};
use crate::resources::Resources;

// Reported when the executor could not be forked at all.
const LAUNCH_FAILURE_STATUS: i32 = 127;

struct ExecutorProcess {
    kill: oneshot::Sender<()>,
    waiter: JoinHandle<()>,
}

struct ProcessState {
    agent: Option<(ActorHandle<AgentActor>, Pid)>,
    children: HashMap<(FrameworkId, ExecutorId), ExecutorProcess>,
}

/// Runs each executor as a child process of the agent. Resource limits are
/// advisory only; this module does not enforce them.
pub struct ProcessIsolationModule {
    frameworks_home: Option<PathBuf>,
    switch_user: bool,
    shutdown_grace: Duration,
    state: Mutex<ProcessState>,
}

impl ProcessIsolationModule {
    pub fn new(options: &AgentOptions) -> Self {
        Self {
            frameworks_home: options.frameworks_home.clone(),
            switch_user: options.switch_user,
            shutdown_grace: options.executor_shutdown_grace,
            state: Mutex::new(ProcessState {
                agent: None,
                children: HashMap::new(),
            }),
        }
    }

    fn resolve_command(&self, uri: &str) -> Option<PathBuf> {
        if uri.is_empty() {
            return None;
        }
        let path = Path::new(uri);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        match &self.frameworks_home {
            Some(home) => Some(home.join(path)),
            None => Some(path.to_path_buf()),
        }
    }
}

#[tonic::async_trait]
impl IsolationModule for ProcessIsolationModule {
    async fn initialize(&self, agent: ActorHandle<AgentActor>, address: Pid) {
        let mut state = self.state.lock().await;
        state.agent = Some((agent, address));
    }

    async fn launch_executor(
        &self,
        framework_id: FrameworkId,
        framework: FrameworkInfo,
        executor: ExecutorInfo,
        directory: PathBuf,
    ) {
        let executor_id = executor.executor_id.clone();
        let Some((agent, address)) = self.state.lock().await.agent.clone() else {
            warn!("cannot launch executor '{executor_id}' before initialization");
            return;
        };
        let exited = |status: i32| AgentEvent::ExecutorExited {
            framework_id: framework_id.clone(),
            executor_id: executor_id.clone(),
            status,
        };

        if let Err(e) = tokio::fs::create_dir_all(&directory).await {
            warn!(
                "failed to create work directory '{}' for executor '{executor_id}': {e}",
                directory.display()
            );
            let _ = agent.send(exited(LAUNCH_FAILURE_STATUS)).await;
            return;
        }

        let Some(program) = self.resolve_command(&executor.uri) else {
            warn!("executor '{executor_id}' of framework {framework_id} has no uri");
            let _ = agent.send(exited(LAUNCH_FAILURE_STATUS)).await;
            return;
        };

        let mut command = Command::new(&program);
        command
            .current_dir(&directory)
            .env("FLOTILLA_AGENT_PID", address.to_string())
            .env("FLOTILLA_FRAMEWORK_ID", framework_id.to_string())
            .env("FLOTILLA_EXECUTOR_ID", executor_id.to_string())
            .env("FLOTILLA_DIRECTORY", &directory)
            .kill_on_drop(true);
        if self.switch_user {
            match nix::unistd::User::from_name(&framework.user) {
                Ok(Some(user)) => {
                    command.uid(user.uid.as_raw()).gid(user.gid.as_raw());
                }
                Ok(None) => {
                    warn!(
                        "user '{}' of framework {framework_id} not found, running executor as the agent user",
                        framework.user
                    );
                }
                Err(e) => {
                    warn!("failed to look up user '{}': {e}", framework.user);
                }
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "failed to launch executor '{executor_id}' of framework {framework_id} from '{}': {e}",
                    program.display()
                );
                let _ = agent.send(exited(LAUNCH_FAILURE_STATUS)).await;
                return;
            }
        };

        let os_pid = child.id().unwrap_or(0);
        info!("launched executor '{executor_id}' of framework {framework_id} with pid {os_pid}");
        let _ = agent
            .send(AgentEvent::ExecutorStarted {
                framework_id: framework_id.clone(),
                executor_id: executor_id.clone(),
                pid: os_pid,
            })
            .await;

        let (kill_tx, mut kill_rx) = oneshot::channel();
        let grace = self.shutdown_grace;
        let waiter_framework_id = framework_id.clone();
        let waiter_executor_id = executor_id.clone();
        let waiter = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = &mut kill_rx => {
                    // The agent has already sent a shutdown message; give the
                    // executor the grace period before killing it outright.
                    if let Some(id) = child.id() {
                        let _ = signal::kill(nix::unistd::Pid::from_raw(id as i32), Signal::SIGTERM);
                    }
                    tokio::select! {
                        status = child.wait() => status,
                        _ = tokio::time::sleep(grace) => {
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    }
                }
            };
            let status = exit_code(status);
            info!(
                "executor '{waiter_executor_id}' of framework {waiter_framework_id} exited with status {status}"
            );
            let _ = agent
                .send(AgentEvent::ExecutorExited {
                    framework_id: waiter_framework_id,
                    executor_id: waiter_executor_id,
                    status,
                })
                .await;
        });

        let mut state = self.state.lock().await;
        state.children.insert(
            (framework_id, executor_id),
            ExecutorProcess {
                kill: kill_tx,
                waiter,
            },
        );
    }

    async fn kill_executor(&self, framework_id: FrameworkId, executor_id: ExecutorId) {
        let child = {
            let mut state = self.state.lock().await;
            state.children.remove(&(framework_id.clone(), executor_id.clone()))
        };
        match child {
            Some(process) => {
                let _ = process.kill.send(());
            }
            None => {
                warn!("asked to kill unknown executor '{executor_id}' of framework {framework_id}");
            }
        }
    }

    async fn resources_changed(
        &self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        resources: Resources,
    ) {
        // Advisory only; a cgroup-based module would adjust limits here.
        debug!(
            "resources of executor '{executor_id}' of framework {framework_id} changed to {resources}"
        );
    }

    async fn stop(&self) {
        let children: Vec<ExecutorProcess> = {
            let mut state = self.state.lock().await;
            state.children.drain().map(|(_, process)| process).collect()
        };
        let mut waiters = vec![];
        for process in children {
            // A send error means the waiter already reaped the child.
            let _ = process.kill.send(());
            waiters.push(process.waiter);
        }
        for waiter in waiters {
            let _ = waiter.await;
        }
    }
}

fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)),
        Err(_) => -1,
    }
}
