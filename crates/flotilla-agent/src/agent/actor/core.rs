use std::mem;
use std::time::{Instant, SystemTime};

use fastrace::future::FutureExt;
use fastrace::Span;
use flotilla_server::actor::{Actor, ActorAction, ActorContext};
use log::info;

use crate::agent::actor::{AgentActor, AgentActorOptions};
use crate::agent::state::Registry;
use crate::agent::AgentEvent;
use crate::isolation::IsolationDispatcher;
use crate::protocol::SlaveInfo;
use crate::rpc::ServerMonitor;
use crate::stats::AgentStats;
use crate::transport::Outbox;

#[tonic::async_trait]
impl Actor for AgentActor {
    type Message = AgentEvent;
    type Options = AgentActorOptions;

    fn name() -> &'static str {
        "AgentActor"
    }

    fn new(options: AgentActorOptions) -> Self {
        let AgentActorOptions {
            options,
            transport,
            isolation,
        } = options;
        let outbox = Outbox::new(transport, options.rpc_retry_strategy.clone());
        let isolation = IsolationDispatcher::new(isolation);
        let info = SlaveInfo {
            hostname: options.hostname.clone(),
            public_hostname: options.public_hostname.clone(),
            resources: options.resources.clone(),
            attributes: options.attributes.clone(),
        };
        Self {
            options,
            server: ServerMonitor::new(),
            outbox,
            isolation,
            info,
            slave_id: None,
            master: None,
            advertised: None,
            registry: Registry::new(),
            stats: AgentStats::new(),
            started_at: SystemTime::now(),
            start_instant: Instant::now(),
        }
    }

    async fn start(&mut self, ctx: &mut ActorContext<Self>) {
        info!("agent resources: {}", self.options.resources);
        let addr = (
            self.options.listen_host.clone(),
            self.options.listen_port,
        );
        let server = mem::take(&mut self.server);
        let span = Span::enter_with_local_parent("AgentActor::serve");
        self.server = server
            .start(Self::serve(ctx.handle().clone(), addr).in_span(span))
            .await;
        if let Some(mut failures) = self.outbox.take_failures() {
            let handle = ctx.handle().clone();
            ctx.spawn(async move {
                while let Some(pid) = failures.recv().await {
                    if handle.send(AgentEvent::ExitedPid { pid }).await.is_err() {
                        break;
                    }
                }
            });
        }
    }

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction {
        match message {
            AgentEvent::ServerReady { port, signal } => {
                self.handle_server_ready(ctx, port, signal)
            }
            AgentEvent::NewMasterDetected { pid } => self.handle_new_master_detected(ctx, pid),
            AgentEvent::NoMasterDetected => self.handle_no_master_detected(ctx),
            AgentEvent::Registered { slave_id } => self.handle_registered(ctx, slave_id),
            AgentEvent::Reregistered { slave_id } => self.handle_reregistered(ctx, slave_id),
            AgentEvent::RunTask {
                framework,
                framework_id,
                pid,
                task,
            } => self.handle_run_task(ctx, framework, framework_id, pid, task),
            AgentEvent::KillTask {
                framework_id,
                task_id,
            } => self.handle_kill_task(ctx, framework_id, task_id),
            AgentEvent::KillFramework { framework_id } => {
                self.handle_kill_framework(ctx, framework_id)
            }
            AgentEvent::FrameworkToExecutor {
                slave_id,
                framework_id,
                executor_id,
                data,
            } => self.handle_framework_to_executor(ctx, slave_id, framework_id, executor_id, data),
            AgentEvent::UpdateFramework { framework_id, pid } => {
                self.handle_update_framework(ctx, framework_id, pid)
            }
            AgentEvent::StatusUpdateAcknowledged {
                slave_id,
                framework_id,
                task_id,
            } => self.handle_status_update_acknowledged(ctx, slave_id, framework_id, task_id),
            AgentEvent::RegisterExecutor {
                framework_id,
                executor_id,
                pid,
            } => self.handle_register_executor(ctx, framework_id, executor_id, pid),
            AgentEvent::StatusUpdate { update } => self.handle_status_update(ctx, update),
            AgentEvent::ExecutorToFramework {
                slave_id,
                framework_id,
                executor_id,
                data,
            } => self.handle_executor_to_framework(ctx, slave_id, framework_id, executor_id, data),
            AgentEvent::StatusUpdateTimeout {
                framework_id,
                task_id,
            } => self.handle_status_update_timeout(ctx, framework_id, task_id),
            AgentEvent::ExecutorStarted {
                framework_id,
                executor_id,
                pid,
            } => self.handle_executor_started(ctx, framework_id, executor_id, pid),
            AgentEvent::ExecutorExited {
                framework_id,
                executor_id,
                status,
            } => self.handle_executor_exited(ctx, framework_id, executor_id, status),
            AgentEvent::ExitedPid { pid } => self.handle_exited_pid(ctx, pid),
            AgentEvent::Ping { result } => {
                let _ = result.send(());
                ActorAction::Continue
            }
            AgentEvent::GetSnapshot { result } => {
                let _ = result.send(self.snapshot());
                ActorAction::Continue
            }
            AgentEvent::Shutdown => ActorAction::Stop,
        }
    }

    async fn stop(mut self, _ctx: &mut ActorContext<Self>) {
        // Remove every framework, killing its executors, before stopping the
        // isolation module and the server.
        for framework_id in self.registry.ids() {
            if let Some(framework) = self.registry.remove(&framework_id) {
                self.remove_framework_record(framework, true);
            }
        }
        self.isolation.stop().await;
        let server = mem::take(&mut self.server);
        server.stop().await;
        info!("agent has stopped");
    }
}
