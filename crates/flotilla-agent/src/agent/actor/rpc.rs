use flotilla_server::actor::ActorHandle;
use flotilla_server::ServerBuilder;
use tokio::net::{TcpListener, ToSocketAddrs};
use tonic::codec::CompressionEncoding;

use crate::agent::actor::AgentActor;
use crate::agent::server::AgentServer;
use crate::agent::AgentEvent;
use crate::error::{AgentError, AgentResult};
use crate::gen;
use crate::gen::agent::agent_service_server::AgentServiceServer;

impl AgentActor {
    pub(super) async fn serve(
        handle: ActorHandle<AgentActor>,
        addr: impl ToSocketAddrs,
    ) -> AgentResult<()> {
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let server = AgentServer::new(handle.clone());
        let service = AgentServiceServer::new(server)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Zstd)
            .send_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Zstd);

        handle
            .send(AgentEvent::ServerReady { port, signal: tx })
            .await
            .map_err(AgentError::from)?;

        ServerBuilder::new("flotilla_agent", Default::default())
            .add_service(service, Some(gen::FILE_DESCRIPTOR_SET))
            .await
            .serve(listener, async {
                let _ = rx.await;
            })
            .await
            .map_err(|e| AgentError::InternalError(e.to_string()))
    }
}
