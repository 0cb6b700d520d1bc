use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tonic::body::BoxBody;
use tonic::codegen::http::{Request, Response};
use tonic::codegen::Service;
use tonic::server::NamedService;
use tonic::transport::server::{Router, TcpIncoming};
use tonic_health::server::HealthReporter;

pub struct ServerBuilderOptions {
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
    pub http2_keepalive_interval: Option<Duration>,
    pub http2_keepalive_timeout: Option<Duration>,
    pub http2_adaptive_window: Option<bool>,
}

impl Default for ServerBuilderOptions {
    fn default() -> Self {
        Self {
            // Disables Nagle's algorithm
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
            http2_keepalive_interval: Some(Duration::from_secs(60)),
            http2_keepalive_timeout: Some(Duration::from_secs(10)),
            http2_adaptive_window: Some(true),
        }
    }
}

pub struct ServerBuilder<'b> {
    #[allow(dead_code)]
    name: &'static str,
    options: ServerBuilderOptions,
    health_reporter: HealthReporter,
    reflection_server_builder: tonic_reflection::server::Builder<'b>,
    router: Router,
}

impl<'b> ServerBuilder<'b> {
    pub fn new(name: &'static str, options: ServerBuilderOptions) -> Self {
        let (health_reporter, health_server) = tonic_health::server::health_reporter();

        let reflection_server_builder = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);

        let router = tonic::transport::Server::builder()
            .tcp_nodelay(options.nodelay)
            .tcp_keepalive(options.keepalive)
            .http2_keepalive_interval(options.http2_keepalive_interval)
            .http2_keepalive_timeout(options.http2_keepalive_timeout)
            .http2_adaptive_window(options.http2_adaptive_window)
            .add_service(health_server);

        Self {
            name,
            options,
            health_reporter,
            reflection_server_builder,
            router,
        }
    }

    pub async fn add_service<S>(mut self, service: S, file_descriptor_set: Option<&'b [u8]>) -> Self
    where
        S: Service<Request<BoxBody>, Response = Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        self.health_reporter.set_serving::<S>().await;
        if let Some(file_descriptor_set) = file_descriptor_set {
            self.reflection_server_builder = self
                .reflection_server_builder
                .register_encoded_file_descriptor_set(file_descriptor_set);
        }
        self.router = self.router.add_service(service);
        self
    }

    pub async fn serve<F>(
        self,
        // The TCP listener must come from tokio since the one from the
        // standard library does not work with graceful shutdown.
        listener: TcpListener,
        signal: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()>,
    {
        let reflection_server = self.reflection_server_builder.build_v1()?;
        let router = self.router.add_service(reflection_server);

        let incoming =
            TcpIncoming::from_listener(listener, self.options.nodelay, self.options.keepalive)?;

        router.serve_with_incoming_shutdown(incoming, signal).await?;

        Ok(())
    }
}
