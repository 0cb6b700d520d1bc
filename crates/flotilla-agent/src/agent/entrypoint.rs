use std::sync::Arc;

use flotilla_common::config::AppConfig;
use flotilla_server::actor::ActorSystem;
use log::info;
use tokio::net::TcpListener;

use crate::agent::actor::{AgentActor, AgentActorOptions};
use crate::agent::options::AgentOptions;
use crate::agent::AgentEvent;
use crate::detector::{MasterDetector, StandaloneMasterDetector};
use crate::introspection;
use crate::isolation::{IsolationModule, ProcessIsolationModule};
use crate::transport::{RpcTransport, Transport};

pub async fn run_agent(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let options = AgentOptions::try_new(config)?;
    let introspection_port = options.introspection_port;
    let master = options.master.clone();
    let transport: Arc<dyn Transport> = Arc::new(RpcTransport::new());
    let isolation: Arc<dyn IsolationModule> = Arc::new(ProcessIsolationModule::new(&options));

    let mut system = ActorSystem::new();
    let handle = system.spawn::<AgentActor>(AgentActorOptions {
        options,
        transport,
        isolation,
    });

    let listener = TcpListener::bind(("0.0.0.0", introspection_port)).await?;
    info!(
        "introspection endpoints listening on port {}",
        listener.local_addr()?.port()
    );
    tokio::spawn(introspection::serve(handle.clone(), listener));

    StandaloneMasterDetector::new(master).start(handle.clone()).await;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("asked to terminate");
            let _ = handle.send(AgentEvent::Shutdown).await;
        }
    });

    system.join().await;
    Ok(())
}
