//! Registry of started clients, one per logical server.

use crate::client::{ClientOptions, McpClient};
use crate::config::{McpSettings, ServerEndpoint};
use crate::error::{McpError, McpResult};
use crate::output::ToolOutput;
use crate::transport::{ContainerExecTransport, LocalProcessTransport, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use toolwire_container::{ContainerRuntime, DockerRuntime};
use tracing::{debug, info, warn};

/// Builds the transport for a resolved endpoint.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        name: &str,
        endpoint: &ServerEndpoint,
    ) -> McpResult<Arc<dyn Transport>>;
}

/// Local endpoints get a subprocess; container endpoints share one engine
/// connection, opened on first use.
pub struct DefaultTransportFactory {
    docker_host: Option<String>,
    runtime: OnceCell<Arc<dyn ContainerRuntime>>,
}

impl DefaultTransportFactory {
    pub fn new(docker_host: Option<String>) -> Self {
        Self {
            docker_host,
            runtime: OnceCell::new(),
        }
    }

    /// Use an already connected runtime instead of the Docker Engine.
    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            docker_host: None,
            runtime: OnceCell::new_with(Some(runtime)),
        }
    }

    async fn runtime(&self) -> McpResult<Arc<dyn ContainerRuntime>> {
        let runtime = self
            .runtime
            .get_or_try_init(|| async {
                let docker = DockerRuntime::connect(self.docker_host.as_deref()).await?;
                Ok::<_, McpError>(Arc::new(docker) as Arc<dyn ContainerRuntime>)
            })
            .await?;
        Ok(runtime.clone())
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create(
        &self,
        name: &str,
        endpoint: &ServerEndpoint,
    ) -> McpResult<Arc<dyn Transport>> {
        debug!(server = %name, endpoint = %endpoint, "Creating transport");
        match endpoint {
            ServerEndpoint::Local(config) => {
                Ok(Arc::new(LocalProcessTransport::new(config.clone())))
            }
            ServerEndpoint::Container(config) => {
                let runtime = self.runtime().await?;
                Ok(Arc::new(ContainerExecTransport::new(config.clone(), runtime)))
            }
        }
    }
}

type ClientSlot = Arc<OnceCell<Arc<McpClient>>>;

/// One started [`McpClient`] per logical server, created on first use.
pub struct ClientManager {
    settings: McpSettings,
    factory: Arc<dyn TransportFactory>,
    clients: Mutex<HashMap<String, ClientSlot>>,
}

impl ClientManager {
    pub fn new(settings: McpSettings, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            settings,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// A manager using [`DefaultTransportFactory`].
    pub fn with_default_factory(settings: McpSettings) -> Self {
        let factory = Arc::new(DefaultTransportFactory::new(settings.docker_host.clone()));
        Self::new(settings, factory)
    }

    pub fn settings(&self) -> &McpSettings {
        &self.settings
    }

    /// Every configured logical server name.
    pub fn server_names(&self) -> Vec<String> {
        self.settings.server_names()
    }

    /// Get the client for `name`, starting it on first use.
    ///
    /// Concurrent first calls share one start. A failed start is not
    /// remembered; the next call tries again. A start that finishes after
    /// [`stop_all`](Self::stop_all) or [`evict`](Self::evict) removed its
    /// slot is stopped and reported as [`McpError::TransportClosed`].
    pub async fn get_client(&self, name: &str) -> McpResult<Arc<McpClient>> {
        if !self.settings.is_known(name) {
            return Err(McpError::ServerNotFound(name.to_string()));
        }

        let slot = self
            .clients
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone();

        let client = slot.get_or_try_init(|| self.launch(name)).await?.clone();

        let registered = self
            .clients
            .lock()
            .await
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !registered {
            warn!(server = %name, "MCP client was dropped from the registry while starting");
            if let Err(e) = client.stop().await {
                debug!(server = %name, error = %e, "Failed to stop orphaned MCP client");
            }
            return Err(McpError::TransportClosed);
        }
        Ok(client)
    }

    async fn launch(&self, name: &str) -> McpResult<Arc<McpClient>> {
        let endpoint = self.settings.endpoint(name)?;
        let transport = self.factory.create(name, &endpoint).await?;

        let options = ClientOptions {
            request_timeout: self.settings.request_timeout(),
        };
        let client = Arc::new(McpClient::new(name, transport, options));
        client.start().await?;

        info!(server = %name, endpoint = %endpoint, "MCP server ready");
        Ok(client)
    }

    /// Start the server if needed and call one of its tools.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> McpResult<ToolOutput> {
        self.get_client(server).await?.call_tool(tool, arguments).await
    }

    /// Names of servers with a started client, sorted.
    pub async fn started(&self) -> Vec<String> {
        let clients = self.clients.lock().await;
        let mut names: Vec<String> = clients
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop and forget one server's client so the next
    /// [`get_client`](Self::get_client) launches a fresh worker.
    ///
    /// Returns `false` if no client was started for `name`.
    pub async fn evict(&self, name: &str) -> McpResult<bool> {
        let slot = self.clients.lock().await.remove(name);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(client) => {
                client.stop().await?;
                info!(server = %name, "Evicted MCP client");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop every started client and clear the registry.
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.clients.lock().await.drain().collect();

        for (name, slot) in slots {
            let Some(client) = slot.get() else {
                continue;
            };
            if let Err(e) = client.stop().await {
                warn!(server = %name, error = %e, "Failed to stop MCP client");
            }
        }
        info!("Stopped all MCP clients");
    }
}
