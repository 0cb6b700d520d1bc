use flotilla_server::actor::ActorHandle;
use log::info;

use crate::agent::{AgentActor, AgentEvent};
use crate::id::Pid;

/// The leader-detection collaborator. Implementations announce master changes
/// by posting `NewMasterDetected` / `NoMasterDetected` into the agent mailbox.
#[tonic::async_trait]
pub trait MasterDetector: Send + Sync + 'static {
    async fn start(&self, agent: ActorHandle<AgentActor>);
}

/// Announces a single statically-configured master, or the absence of one.
pub struct StandaloneMasterDetector {
    master: Option<Pid>,
}

impl StandaloneMasterDetector {
    pub fn new(master: Option<Pid>) -> Self {
        Self { master }
    }
}

#[tonic::async_trait]
impl MasterDetector for StandaloneMasterDetector {
    async fn start(&self, agent: ActorHandle<AgentActor>) {
        let event = match &self.master {
            Some(pid) => AgentEvent::NewMasterDetected { pid: pid.clone() },
            None => {
                info!("no master configured, waiting for detection");
                AgentEvent::NoMasterDetected
            }
        };
        let _ = agent.send(event).await;
    }
}
