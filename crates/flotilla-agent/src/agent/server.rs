use flotilla_server::actor::ActorHandle;
use log::debug;
use tonic::{Request, Response, Status};

use crate::agent::actor::AgentActor;
use crate::agent::AgentEvent;
use crate::error::AgentError;
use crate::gen::agent::agent_service_server::AgentService;
use crate::gen::agent::{
    ExecutorToFrameworkRequest, ExecutorToFrameworkResponse, FrameworkToExecutorRequest,
    FrameworkToExecutorResponse, KillFrameworkRequest, KillFrameworkResponse, KillTaskRequest,
    KillTaskResponse, NewMasterDetectedRequest, NewMasterDetectedResponse, NoMasterDetectedRequest,
    NoMasterDetectedResponse, PingRequest, PongResponse, RegisterExecutorRequest,
    RegisterExecutorResponse, RunTaskRequest, RunTaskResponse, SlaveRegisteredRequest,
    SlaveRegisteredResponse, SlaveReregisteredRequest, SlaveReregisteredResponse,
    StatusUpdateAcknowledgementRequest, StatusUpdateAcknowledgementResponse, StatusUpdateRequest,
    StatusUpdateResponse, UpdateFrameworkRequest, UpdateFrameworkResponse,
};
use crate::id::Pid;
use crate::protocol::{FrameworkInfo, StatusUpdate, TaskDescription};

/// Translates inbound rpcs into agent mailbox events. All state lives in the
/// actor; this type only validates and converts.
pub struct AgentServer {
    handle: ActorHandle<AgentActor>,
}

impl AgentServer {
    pub fn new(handle: ActorHandle<AgentActor>) -> Self {
        Self { handle }
    }

    async fn post(&self, event: AgentEvent) -> Result<(), Status> {
        self.handle
            .send(event)
            .await
            .map_err(AgentError::from)
            .map_err(Status::from)
    }
}

#[tonic::async_trait]
impl AgentService for AgentServer {
    async fn new_master_detected(
        &self,
        request: Request<NewMasterDetectedRequest>,
    ) -> Result<Response<NewMasterDetectedResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let NewMasterDetectedRequest { pid } = request;
        let pid: Pid = pid.parse().map_err(Status::from)?;
        self.post(AgentEvent::NewMasterDetected { pid }).await?;
        Ok(Response::new(NewMasterDetectedResponse {}))
    }

    async fn no_master_detected(
        &self,
        request: Request<NoMasterDetectedRequest>,
    ) -> Result<Response<NoMasterDetectedResponse>, Status> {
        let NoMasterDetectedRequest {} = request.into_inner();
        self.post(AgentEvent::NoMasterDetected).await?;
        Ok(Response::new(NoMasterDetectedResponse {}))
    }

    async fn slave_registered(
        &self,
        request: Request<SlaveRegisteredRequest>,
    ) -> Result<Response<SlaveRegisteredResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let SlaveRegisteredRequest { slave_id } = request;
        self.post(AgentEvent::Registered {
            slave_id: slave_id.into(),
        })
        .await?;
        Ok(Response::new(SlaveRegisteredResponse {}))
    }

    async fn slave_reregistered(
        &self,
        request: Request<SlaveReregisteredRequest>,
    ) -> Result<Response<SlaveReregisteredResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let SlaveReregisteredRequest { slave_id } = request;
        self.post(AgentEvent::Reregistered {
            slave_id: slave_id.into(),
        })
        .await?;
        Ok(Response::new(SlaveReregisteredResponse {}))
    }

    async fn run_task(
        &self,
        request: Request<RunTaskRequest>,
    ) -> Result<Response<RunTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let RunTaskRequest {
            framework,
            framework_id,
            pid,
            task,
        } = request;
        let framework: FrameworkInfo = framework
            .ok_or_else(|| Status::invalid_argument("missing framework info"))?
            .try_into()
            .map_err(Status::from)?;
        let task: TaskDescription = task
            .ok_or_else(|| Status::invalid_argument("missing task description"))?
            .try_into()
            .map_err(Status::from)?;
        let pid: Pid = pid.parse().map_err(Status::from)?;
        self.post(AgentEvent::RunTask {
            framework,
            framework_id: framework_id.into(),
            pid,
            task,
        })
        .await?;
        Ok(Response::new(RunTaskResponse {}))
    }

    async fn kill_task(
        &self,
        request: Request<KillTaskRequest>,
    ) -> Result<Response<KillTaskResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let KillTaskRequest {
            framework_id,
            task_id,
        } = request;
        self.post(AgentEvent::KillTask {
            framework_id: framework_id.into(),
            task_id: task_id.into(),
        })
        .await?;
        Ok(Response::new(KillTaskResponse {}))
    }

    async fn kill_framework(
        &self,
        request: Request<KillFrameworkRequest>,
    ) -> Result<Response<KillFrameworkResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let KillFrameworkRequest { framework_id } = request;
        self.post(AgentEvent::KillFramework {
            framework_id: framework_id.into(),
        })
        .await?;
        Ok(Response::new(KillFrameworkResponse {}))
    }

    async fn update_framework(
        &self,
        request: Request<UpdateFrameworkRequest>,
    ) -> Result<Response<UpdateFrameworkResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let UpdateFrameworkRequest { framework_id, pid } = request;
        let pid: Pid = pid.parse().map_err(Status::from)?;
        self.post(AgentEvent::UpdateFramework {
            framework_id: framework_id.into(),
            pid,
        })
        .await?;
        Ok(Response::new(UpdateFrameworkResponse {}))
    }

    async fn status_update_acknowledgement(
        &self,
        request: Request<StatusUpdateAcknowledgementRequest>,
    ) -> Result<Response<StatusUpdateAcknowledgementResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let StatusUpdateAcknowledgementRequest {
            slave_id,
            framework_id,
            task_id,
        } = request;
        self.post(AgentEvent::StatusUpdateAcknowledged {
            slave_id: slave_id.into(),
            framework_id: framework_id.into(),
            task_id: task_id.into(),
        })
        .await?;
        Ok(Response::new(StatusUpdateAcknowledgementResponse {}))
    }

    async fn framework_to_executor(
        &self,
        request: Request<FrameworkToExecutorRequest>,
    ) -> Result<Response<FrameworkToExecutorResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let FrameworkToExecutorRequest {
            slave_id,
            framework_id,
            executor_id,
            data,
        } = request;
        self.post(AgentEvent::FrameworkToExecutor {
            slave_id: slave_id.into(),
            framework_id: framework_id.into(),
            executor_id: executor_id.into(),
            data,
        })
        .await?;
        Ok(Response::new(FrameworkToExecutorResponse {}))
    }

    async fn ping(
        &self,
        request: Request<PingRequest>,
    ) -> Result<Response<PongResponse>, Status> {
        let PingRequest {} = request.into_inner();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.post(AgentEvent::Ping { result: tx }).await?;
        rx.await
            .map_err(|_| Status::unavailable("agent is shutting down"))?;
        Ok(Response::new(PongResponse {}))
    }

    async fn register_executor(
        &self,
        request: Request<RegisterExecutorRequest>,
    ) -> Result<Response<RegisterExecutorResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let RegisterExecutorRequest {
            framework_id,
            executor_id,
            pid,
        } = request;
        let pid: Pid = pid.parse().map_err(Status::from)?;
        self.post(AgentEvent::RegisterExecutor {
            framework_id: framework_id.into(),
            executor_id: executor_id.into(),
            pid,
        })
        .await?;
        Ok(Response::new(RegisterExecutorResponse {}))
    }

    async fn status_update(
        &self,
        request: Request<StatusUpdateRequest>,
    ) -> Result<Response<StatusUpdateResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let StatusUpdateRequest { update } = request;
        let update: StatusUpdate = update
            .ok_or_else(|| Status::invalid_argument("missing status update"))?
            .try_into()
            .map_err(Status::from)?;
        self.post(AgentEvent::StatusUpdate { update }).await?;
        Ok(Response::new(StatusUpdateResponse {}))
    }

    async fn executor_to_framework(
        &self,
        request: Request<ExecutorToFrameworkRequest>,
    ) -> Result<Response<ExecutorToFrameworkResponse>, Status> {
        let request = request.into_inner();
        debug!("{request:?}");
        let ExecutorToFrameworkRequest {
            slave_id,
            framework_id,
            executor_id,
            data,
        } = request;
        self.post(AgentEvent::ExecutorToFramework {
            slave_id: slave_id.into(),
            framework_id: framework_id.into(),
            executor_id: executor_id.into(),
            data,
        })
        .await?;
        Ok(Response::new(ExecutorToFrameworkResponse {}))
    }
}
