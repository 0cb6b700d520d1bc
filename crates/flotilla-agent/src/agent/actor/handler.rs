use std::mem;

use flotilla_server::actor::{ActorAction, ActorContext};
use log::{error, info, warn};
use tokio::sync::oneshot;

use crate::agent::actor::AgentActor;
use crate::agent::state::{Executor, Framework};
use crate::agent::AgentEvent;
use crate::id::{ExecutorId, FrameworkId, Pid, SlaveId, TaskId};
use crate::introspection::{
    AgentSnapshot, ExecutorSnapshot, FrameworkSnapshot, InfoSnapshot, StatsSnapshot, TaskSnapshot,
    BUILD_DATE, BUILD_USER,
};
use crate::protocol::{
    timestamp, ExecutorArgs, FrameworkInfo, StatusUpdate, Task, TaskDescription, TaskState,
    TaskStatus,
};
use crate::transport::Outbound;
use crate::workdir;

impl AgentActor {
    pub(super) fn handle_server_ready(
        &mut self,
        ctx: &mut ActorContext<Self>,
        port: u16,
        signal: oneshot::Sender<()>,
    ) -> ActorAction {
        let server = mem::take(&mut self.server);
        self.server = match server.ready(signal) {
            Ok(x) => x,
            Err(e) => {
                error!("{e}");
                return ActorAction::Stop;
            }
        };
        info!("agent server is ready on port {port}");
        let host = self
            .options
            .external_host
            .clone()
            .unwrap_or_else(|| self.options.hostname.clone());
        let port = self.options.external_port.unwrap_or(port);
        let advertised = Pid::new(host, port);
        self.advertised = Some(advertised.clone());
        self.isolation.initialize(ctx.handle().clone(), advertised);
        // A master detected before the listener was up could not be
        // registered with; catch up now.
        self.register_with_master();
        ActorAction::Continue
    }

    pub(super) fn handle_new_master_detected(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        pid: Pid,
    ) -> ActorAction {
        info!("new master detected at {pid}");
        self.master = Some(pid);
        self.register_with_master();
        ActorAction::Continue
    }

    pub(super) fn handle_no_master_detected(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> ActorAction {
        info!("lost master(s) ... waiting");
        self.master = None;
        ActorAction::Continue
    }

    pub(super) fn handle_registered(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
    ) -> ActorAction {
        match &self.slave_id {
            None => {
                info!("registered with master; given slave ID {slave_id}");
                self.slave_id = Some(slave_id);
                ActorAction::Continue
            }
            Some(current) if *current == slave_id => ActorAction::Continue,
            Some(current) => {
                error!("agent already has slave ID {current} but master assigned {slave_id}");
                ActorAction::Stop
            }
        }
    }

    pub(super) fn handle_reregistered(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
    ) -> ActorAction {
        info!("re-registered with master");
        match &self.slave_id {
            Some(current) if *current == slave_id => ActorAction::Continue,
            _ => {
                // The agent has been re-identified mid-flight.
                error!("agent re-registered but got wrong slave ID {slave_id}");
                ActorAction::Stop
            }
        }
    }

    pub(super) fn handle_run_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework: FrameworkInfo,
        framework_id: FrameworkId,
        pid: Pid,
        task: TaskDescription,
    ) -> ActorAction {
        info!(
            "got assigned task {} for framework {framework_id}",
            task.task_id
        );

        if self.registry.get(&framework_id).is_none() {
            self.registry
                .insert(Framework::new(framework_id.clone(), framework, pid));
        }
        let slave_id = self.slave_id.clone().unwrap_or_default();
        let work_root = self.options.work_directory_root.clone();
        let Some(framework) = self.registry.get_mut(&framework_id) else {
            return ActorAction::Continue;
        };
        let framework_info = framework.info.clone();
        let framework_pid = framework.pid.clone();

        // Either hand the task to an existing executor, queue it while that
        // executor starts up, or create a new executor for it.
        let executor_info = task
            .executor
            .clone()
            .unwrap_or_else(|| framework_info.executor.clone());
        let executor_id = executor_info.executor_id.clone();

        match framework.executors.get_mut(&executor_id) {
            Some(executor) => match executor.pid.clone() {
                None => {
                    // Queue the task until the executor registers.
                    executor.queued_tasks.insert(task.task_id.clone(), task);
                }
                Some(executor_pid) => {
                    executor.add_task(task.clone());
                    let aggregate = executor.resources.clone();
                    self.stats.record_task_state(TaskState::Starting);
                    self.outbox.send(
                        &executor_pid,
                        Outbound::RunTask {
                            framework: framework_info,
                            framework_id: framework_id.clone(),
                            pid: framework_pid,
                            task,
                        },
                    );
                    self.isolation
                        .resources_changed(framework_id, executor_id, aggregate);
                }
            },
            None => {
                let directory = workdir::unique_work_directory(
                    &work_root,
                    &slave_id,
                    &framework_id,
                    &executor_id,
                );
                info!(
                    "using '{}' as work directory for executor '{executor_id}' of framework {framework_id}",
                    directory.display()
                );
                let executor = framework.create_executor(executor_info.clone(), directory.clone());
                executor.queued_tasks.insert(task.task_id.clone(), task);
                self.isolation
                    .launch_executor(framework_id, framework_info, executor_info, directory);
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_kill_task(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        info!("asked to kill task {task_id} of framework {framework_id}");

        if self.registry.get(&framework_id).is_none() {
            warn!(
                "cannot kill task {task_id} of framework {framework_id} because no such framework is running"
            );
            self.send_unreliable_update(framework_id, None, task_id, TaskState::Lost, -1);
            return ActorAction::Continue;
        }

        let Some(executor_id) = self
            .registry
            .get(&framework_id)
            .and_then(|f| f.executor_id_for_task(&task_id))
        else {
            warn!(
                "cannot kill task {task_id} of framework {framework_id} because no such task is running"
            );
            self.send_unreliable_update(framework_id, None, task_id, TaskState::Lost, -1);
            return ActorAction::Continue;
        };

        let Some(executor) = self
            .registry
            .get_mut(&framework_id)
            .and_then(|f| f.executors.get_mut(&executor_id))
        else {
            return ActorAction::Continue;
        };

        match executor.pid.clone() {
            None => {
                // The executor has not registered yet, so the task is still
                // queued; remove it and report the kill directly.
                executor.remove_task(&task_id);
                let aggregate = executor.resources.clone();
                self.isolation.resources_changed(
                    framework_id.clone(),
                    executor_id.clone(),
                    aggregate,
                );
                self.send_unreliable_update(
                    framework_id,
                    Some(executor_id),
                    task_id,
                    TaskState::Killed,
                    0,
                );
            }
            Some(executor_pid) => {
                // Let the executor drive the transition via a status update.
                self.outbox.send(
                    &executor_pid,
                    Outbound::KillTask {
                        framework_id,
                        task_id,
                    },
                );
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_kill_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
    ) -> ActorAction {
        info!("asked to kill framework {framework_id}");
        if let Some(framework) = self.registry.remove(&framework_id) {
            self.remove_framework_record(framework, true);
        }
        ActorAction::Continue
    }

    pub(super) fn handle_framework_to_executor(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) -> ActorAction {
        let Some(framework) = self.registry.get(&framework_id) else {
            warn!("dropping message for framework {framework_id} because framework does not exist");
            self.stats.invalid_framework_messages += 1;
            return ActorAction::Continue;
        };
        let Some(executor) = framework.executors.get(&executor_id) else {
            warn!(
                "dropping message for executor '{executor_id}' of framework {framework_id} because executor does not exist"
            );
            self.stats.invalid_framework_messages += 1;
            return ActorAction::Continue;
        };
        // Messages for executors that have not registered yet are dropped,
        // not queued; frameworks can wait for the executor to announce itself.
        let Some(executor_pid) = executor.pid.clone() else {
            warn!(
                "dropping message for executor '{executor_id}' of framework {framework_id} because executor is not running"
            );
            self.stats.invalid_framework_messages += 1;
            return ActorAction::Continue;
        };
        self.outbox.send(
            &executor_pid,
            Outbound::FrameworkToExecutor {
                slave_id,
                framework_id,
                executor_id,
                data,
            },
        );
        self.stats.valid_framework_messages += 1;
        ActorAction::Continue
    }

    pub(super) fn handle_update_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        pid: Pid,
    ) -> ActorAction {
        match self.registry.get_mut(&framework_id) {
            Some(framework) => {
                info!("updating framework {framework_id} pid to {pid}");
                framework.pid = pid;
            }
            None => {
                warn!("ignoring pid update for unknown framework {framework_id}");
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_status_update_acknowledged(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        _slave_id: SlaveId,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        if let Some(framework) = self.registry.get_mut(&framework_id) {
            if framework.updates.remove(&task_id).is_some() {
                info!(
                    "got acknowledgement of status update for task {task_id} of framework {framework_id}"
                );
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_register_executor(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: Pid,
    ) -> ActorAction {
        info!("got registration for executor '{executor_id}' of framework {framework_id}");

        let slave_id = self.slave_id.clone().unwrap_or_default();
        let hostname = self.options.hostname.clone();

        let Some(framework) = self.registry.get_mut(&framework_id) else {
            warn!(
                "framework {framework_id} does not exist (it may have been killed), telling executor to exit"
            );
            self.outbox.send(&pid, Outbound::ShutdownExecutor);
            return ActorAction::Continue;
        };
        let framework_info = framework.info.clone();
        let framework_pid = framework.pid.clone();
        let Some(executor) = framework.executors.get_mut(&executor_id) else {
            warn!("unexpected executor '{executor_id}' registering for framework {framework_id}");
            self.outbox.send(&pid, Outbound::ShutdownExecutor);
            return ActorAction::Continue;
        };
        if executor.pid.is_some() {
            warn!("executor '{executor_id}' of framework {framework_id} is already running");
            self.outbox.send(&pid, Outbound::ShutdownExecutor);
            return ActorAction::Continue;
        }

        executor.pid = Some(pid.clone());

        // The executor must observe its registration before any task.
        self.outbox.send(
            &pid,
            Outbound::ExecutorRegistered {
                args: ExecutorArgs {
                    framework_id: framework_id.clone(),
                    executor_id: executor_id.clone(),
                    slave_id,
                    hostname,
                    data: executor.info.data.clone(),
                },
            },
        );

        info!("flushing queued tasks for framework {framework_id}");
        let queued: Vec<TaskDescription> = executor
            .queued_tasks
            .drain(..)
            .map(|(_, task)| task)
            .collect();
        for task in queued {
            executor.add_task(task.clone());
            self.stats.record_task_state(TaskState::Starting);
            self.outbox.send(
                &pid,
                Outbound::RunTask {
                    framework: framework_info.clone(),
                    framework_id: framework_id.clone(),
                    pid: framework_pid.clone(),
                    task,
                },
            );
        }
        let aggregate = executor.resources.clone();
        self.isolation
            .resources_changed(framework_id, executor_id, aggregate);
        ActorAction::Continue
    }

    pub(super) fn handle_status_update(
        &mut self,
        ctx: &mut ActorContext<Self>,
        update: StatusUpdate,
    ) -> ActorAction {
        info!(
            "status update: task {} of framework {} is now in state {}",
            update.status.task_id, update.framework_id, update.status.state
        );

        let Some(framework) = self.registry.get_mut(&update.framework_id) else {
            warn!(
                "status update error: couldn't lookup framework {}",
                update.framework_id
            );
            self.stats.invalid_status_updates += 1;
            return ActorAction::Continue;
        };
        let Some(executor_id) = framework.executor_id_for_task(&update.status.task_id) else {
            warn!(
                "status update error: couldn't lookup executor for framework {}",
                update.framework_id
            );
            self.stats.invalid_status_updates += 1;
            return ActorAction::Continue;
        };

        let freed = match framework.executors.get_mut(&executor_id) {
            Some(executor) => {
                executor.update_task_state(&update.status.task_id, update.status.state);
                if update.status.state.is_terminal() {
                    executor.remove_task(&update.status.task_id);
                    Some(executor.resources.clone())
                } else {
                    None
                }
            }
            None => None,
        };

        // Record the update for reliable delivery; the latest state for a
        // task is authoritative and overwrites any pending one.
        framework
            .updates
            .insert(update.status.task_id.clone(), update.clone());

        if let Some(aggregate) = freed {
            self.isolation.resources_changed(
                update.framework_id.clone(),
                executor_id,
                aggregate,
            );
        }

        if let Some(master) = self.master.clone() {
            let pid = self.advertised_pid();
            self.outbox.send(
                &master,
                Outbound::StatusUpdate {
                    update: update.clone(),
                    reliable: true,
                    pid,
                },
            );
        }
        ctx.send_with_delay(
            AgentEvent::StatusUpdateTimeout {
                framework_id: update.framework_id.clone(),
                task_id: update.status.task_id.clone(),
            },
            self.options.status_update_retry_interval,
        );

        self.stats.record_task_state(update.status.state);
        self.stats.valid_status_updates += 1;
        ActorAction::Continue
    }

    pub(super) fn handle_status_update_timeout(
        &mut self,
        ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> ActorAction {
        // Resend only while an acknowledgement is still outstanding. The
        // journal holds the latest update for the task, which supersedes the
        // one this timer was armed for.
        let Some(update) = self
            .registry
            .get(&framework_id)
            .and_then(|f| f.updates.get(&task_id))
            .cloned()
        else {
            return ActorAction::Continue;
        };
        info!("resending status update for task {task_id} of framework {framework_id}");
        if let Some(master) = self.master.clone() {
            let pid = self.advertised_pid();
            self.outbox.send(
                &master,
                Outbound::StatusUpdate {
                    update,
                    reliable: true,
                    pid,
                },
            );
        }
        ctx.send_with_delay(
            AgentEvent::StatusUpdateTimeout {
                framework_id,
                task_id,
            },
            self.options.status_update_retry_interval,
        );
        ActorAction::Continue
    }

    pub(super) fn handle_executor_to_framework(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        slave_id: SlaveId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) -> ActorAction {
        let Some(framework) = self.registry.get(&framework_id) else {
            warn!(
                "cannot send framework message from slave {slave_id} to framework {framework_id} because framework does not exist"
            );
            self.stats.invalid_framework_messages += 1;
            return ActorAction::Continue;
        };
        info!("sending message for framework {framework_id} to {}", framework.pid);
        let framework_pid = framework.pid.clone();
        self.outbox.send(
            &framework_pid,
            Outbound::ExecutorToFramework {
                slave_id,
                framework_id,
                executor_id,
                data,
            },
        );
        self.stats.valid_framework_messages += 1;
        ActorAction::Continue
    }

    pub(super) fn handle_executor_started(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: u32,
    ) -> ActorAction {
        info!("executor '{executor_id}' of framework {framework_id} started under pid {pid}");
        ActorAction::Continue
    }

    pub(super) fn handle_executor_exited(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) -> ActorAction {
        let Some(framework) = self.registry.get_mut(&framework_id) else {
            warn!(
                "unknown executor '{executor_id}' of unknown framework {framework_id} has exited with status {status}"
            );
            return ActorAction::Continue;
        };
        let Some(executor) = framework.executors.remove(&executor_id) else {
            warn!(
                "unknown executor '{executor_id}' of framework {framework_id} has exited with status {status}"
            );
            return ActorAction::Continue;
        };
        info!(
            "exited executor '{executor_id}' of framework {framework_id} with status {status}"
        );

        if let Some(master) = self.master.clone() {
            let slave_id = self.slave_id.clone().unwrap_or_default();
            self.outbox.send(
                &master,
                Outbound::ExitedExecutor {
                    slave_id,
                    framework_id: framework_id.clone(),
                    executor_id,
                    status,
                },
            );
        }

        // The executor is already gone, so nothing is killed here. Pending
        // status updates for its tasks stay in the framework journal and keep
        // retrying until acknowledged.
        self.remove_executor_record(&framework_id, executor, false);

        let framework_is_empty = self
            .registry
            .get(&framework_id)
            .map(|f| f.executors.is_empty())
            .unwrap_or(false);
        if framework_is_empty {
            if let Some(framework) = self.registry.remove(&framework_id) {
                self.remove_framework_record(framework, false);
            }
        }
        ActorAction::Continue
    }

    pub(super) fn handle_exited_pid(
        &mut self,
        _ctx: &mut ActorContext<Self>,
        pid: Pid,
    ) -> ActorAction {
        info!("process exited: {pid}");
        if self.master.as_ref() == Some(&pid) {
            warn!("master disconnected! waiting for a new master to be elected");
            self.master = None;
        } else {
            // Executor link breaks are advisory; the authoritative signal is
            // the isolation module's exit callback.
            self.outbox.close(&pid);
        }
        ActorAction::Continue
    }

    pub(super) fn register_with_master(&mut self) {
        let Some(master) = self.master.clone() else {
            return;
        };
        let Some(advertised) = self.advertised.clone() else {
            return;
        };
        match self.slave_id.clone() {
            None => {
                // Slave started before master.
                let slave = self.info.clone();
                self.outbox.send(
                    &master,
                    Outbound::RegisterSlave {
                        slave,
                        pid: advertised,
                    },
                );
            }
            Some(slave_id) => {
                // Re-registering, so send every launched task along.
                let tasks: Vec<Task> = self
                    .registry
                    .iter()
                    .flat_map(|f| f.executors.values())
                    .flat_map(|e| e.launched_tasks.values())
                    .cloned()
                    .collect();
                let slave = self.info.clone();
                self.outbox.send(
                    &master,
                    Outbound::ReregisterSlave {
                        slave_id,
                        slave,
                        tasks,
                        pid: advertised,
                    },
                );
            }
        }
    }

    /// Send a non-reliable, non-journaled status update to the master. Used
    /// for kill replies about tasks the agent holds no live executor for;
    /// duplicates are harmless so no retry is scheduled.
    fn send_unreliable_update(
        &mut self,
        framework_id: FrameworkId,
        executor_id: Option<ExecutorId>,
        task_id: TaskId,
        state: TaskState,
        sequence: i64,
    ) {
        let Some(master) = self.master.clone() else {
            return;
        };
        let pid = self.advertised_pid();
        let update = StatusUpdate {
            framework_id,
            executor_id,
            slave_id: self.slave_id.clone().unwrap_or_default(),
            status: TaskStatus { task_id, state },
            timestamp: timestamp(),
            sequence,
        };
        self.outbox.send(
            &master,
            Outbound::StatusUpdate {
                update,
                reliable: false,
                pid,
            },
        );
    }

    pub(super) fn remove_framework_record(&mut self, mut framework: Framework, kill: bool) {
        info!("cleaning up framework {}", framework.id);
        let executor_ids: Vec<ExecutorId> = framework.executors.keys().cloned().collect();
        for executor_id in executor_ids {
            if let Some(executor) = framework.executors.remove(&executor_id) {
                self.remove_executor_record(&framework.id, executor, kill);
            }
        }
    }

    /// Destroy an executor record, optionally killing the process. Dropping
    /// the record drops its task tables with it.
    fn remove_executor_record(
        &mut self,
        framework_id: &FrameworkId,
        executor: Executor,
        kill: bool,
    ) {
        if kill {
            info!(
                "shutting down executor '{}' of framework {framework_id}",
                executor.id
            );
            if let Some(pid) = &executor.pid {
                self.outbox.send(pid, Outbound::ShutdownExecutor);
            }
            self.isolation
                .kill_executor(framework_id.clone(), executor.id.clone());
        }
        if let Some(pid) = &executor.pid {
            self.outbox.close(pid);
        }
    }

    fn advertised_pid(&self) -> Pid {
        self.advertised
            .clone()
            .unwrap_or_else(|| Pid::new(self.options.hostname.clone(), 0))
    }

    pub(super) fn snapshot(&self) -> AgentSnapshot {
        let start_time = self
            .started_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let frameworks = self
            .registry
            .iter()
            .map(|framework| FrameworkSnapshot {
                id: framework.id.to_string(),
                name: framework.info.name.clone(),
                user: framework.info.user.clone(),
                executors: framework
                    .executors
                    .values()
                    .map(|executor| ExecutorSnapshot {
                        id: executor.id.to_string(),
                        pid: executor.pid.as_ref().map(|p| p.to_string()),
                        directory: executor.directory.display().to_string(),
                        resources: executor.resources.to_string(),
                        queued_tasks: executor
                            .queued_tasks
                            .keys()
                            .map(|t| t.to_string())
                            .collect(),
                        launched_tasks: executor
                            .launched_tasks
                            .keys()
                            .map(|t| t.to_string())
                            .collect(),
                    })
                    .collect(),
                pending_updates: framework.updates.keys().map(|t| t.to_string()).collect(),
            })
            .collect();
        let tasks = self
            .registry
            .iter()
            .flat_map(|f| f.executors.values())
            .flat_map(|e| e.launched_tasks.values())
            .map(|task| TaskSnapshot {
                task_id: task.task_id.to_string(),
                framework_id: task.framework_id.to_string(),
                slave_id: task.slave_id.to_string(),
                name: task.name.clone(),
                state: task.state.to_string(),
                cpus: task.resources.get_scalar("cpus"),
                mem: task.resources.get_scalar("mem"),
            })
            .collect();
        let stats = StatsSnapshot {
            uptime: self.start_instant.elapsed().as_secs_f64(),
            total_frameworks: self.registry.len(),
            started_tasks: self.stats.task_count(TaskState::Starting),
            finished_tasks: self.stats.task_count(TaskState::Finished),
            killed_tasks: self.stats.task_count(TaskState::Killed),
            failed_tasks: self.stats.task_count(TaskState::Failed),
            lost_tasks: self.stats.task_count(TaskState::Lost),
            valid_status_updates: self.stats.valid_status_updates,
            invalid_status_updates: self.stats.invalid_status_updates,
            valid_framework_messages: self.stats.valid_framework_messages,
            invalid_framework_messages: self.stats.invalid_framework_messages,
        };
        AgentSnapshot {
            info: InfoSnapshot {
                built_date: BUILD_DATE.to_string(),
                build_user: BUILD_USER.to_string(),
                start_time,
                pid: self.advertised_pid().to_string(),
            },
            frameworks,
            tasks,
            stats,
            vars: self.options.config_vars.clone(),
        }
    }
}
