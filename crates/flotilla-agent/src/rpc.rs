use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tonic::transport::Channel;

use crate::error::{AgentError, AgentResult};
use crate::gen::executor::executor_service_client::ExecutorServiceClient;
use crate::gen::framework::framework_service_client::FrameworkServiceClient;
use crate::gen::master::master_service_client::MasterServiceClient;
use crate::id::Pid;

pub enum ServerMonitor {
    Stopped,
    Pending {
        handle: JoinHandle<AgentResult<()>>,
    },
    Running {
        /// The shutdown signal to send to the server.
        signal: oneshot::Sender<()>,
        /// The join handle of the server task.
        handle: JoinHandle<AgentResult<()>>,
    },
}

impl Default for ServerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMonitor {
    pub fn new() -> Self {
        Self::Stopped
    }

    pub async fn start(self, f: impl Future<Output = AgentResult<()>> + Send + 'static) -> Self {
        self.stop().await;
        Self::Pending {
            handle: tokio::spawn(f),
        }
    }

    pub fn ready(self, signal: oneshot::Sender<()>) -> AgentResult<Self> {
        match self {
            Self::Pending { handle } => Ok(Self::Running { signal, handle }),
            _ => Err(AgentError::InternalError(
                "the server must be in pending state before it can be ready".to_string(),
            )),
        }
    }

    pub async fn stop(self) {
        match self {
            Self::Stopped => {}
            Self::Pending { handle } => {
                handle.abort();
            }
            Self::Running { signal, handle } => {
                let _ = signal.send(());
                let _ = handle.await;
            }
        }
    }
}

#[tonic::async_trait]
pub trait ClientBuilder: Sized {
    async fn connect(pid: &Pid) -> AgentResult<Self>;
}

macro_rules! impl_client_builder {
    ($client_type:ty) => {
        #[tonic::async_trait]
        impl ClientBuilder for $client_type {
            async fn connect(pid: &Pid) -> AgentResult<Self> {
                Ok(<$client_type>::connect(pid.to_url_string()).await?)
            }
        }
    };
}

impl_client_builder!(MasterServiceClient<Channel>);
impl_client_builder!(ExecutorServiceClient<Channel>);
impl_client_builder!(FrameworkServiceClient<Channel>);

/// A handle to a gRPC client to support connection reuse.
/// The handle can be cheaply cloned and the underlying connection is shared.
/// The inner type must be `Arc<OnceCell<T>>`; cloning an uninitialized
/// `OnceCell` directly would let each clone connect independently and
/// overwhelm the server with connections.
#[derive(Debug, Clone)]
pub struct ClientHandle<T> {
    pid: Pid,
    inner: Arc<OnceCell<T>>,
}

impl<T: ClientBuilder + Clone> ClientHandle<T> {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            inner: Arc::new(OnceCell::new()),
        }
    }

    pub async fn get(&self) -> AgentResult<T> {
        let client = self
            .inner
            .get_or_try_init(|| T::connect(&self.pid))
            .await?;
        Ok(client.clone())
    }
}
