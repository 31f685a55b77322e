//! Container resolution and one-shot exec sessions.

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::compiler::CompiledCommand;
use crate::demux::{AccumulatedOutput, StreamDemux, DEFAULT_MAX_FRAME_LEN};
use crate::error::{BridgeError, NotFound};

pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// A running container hosting the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub names: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerHandle {
    /// First name without the leading `/` the runtime adds.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|name| name.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }

    fn name_matches(&self, pattern: &str) -> bool {
        self.names
            .iter()
            .any(|name| name.trim_start_matches('/').contains(pattern))
    }

    fn name_equals(&self, pattern: &str) -> bool {
        self.names
            .iter()
            .any(|name| name.trim_start_matches('/') == pattern)
    }
}

/// How a caller names the target container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerSelector {
    Id(String),
    Name(String),
}

impl ContainerSelector {
    /// `name:<pattern>` selects by name, anything else is an id.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("name:") {
            Some(pattern) => ContainerSelector::Name(pattern.to_string()),
            None => ContainerSelector::Id(raw.to_string()),
        }
    }
}

impl std::fmt::Display for ContainerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerSelector::Id(id) => f.write_str(id),
            ContainerSelector::Name(pattern) => write!(f, "name:{pattern}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecToken(pub String);

/// Raw bytes of a hijacked exec stream.
pub type ExecStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such container: {0}")]
    NoSuchContainer(String),
    #[error("runtime api returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("runtime transport error: {0}")]
    Transport(String),
    #[error("runtime response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>, RuntimeError>;
    async fn get_container(&self, id: &str) -> Result<ContainerHandle, RuntimeError>;
}

#[async_trait]
pub trait ExecFacility: Send + Sync {
    /// Creates an exec with stdin, stdout and stderr attached and no tty.
    async fn create_exec(
        &self,
        container: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecToken, RuntimeError>;

    /// Starts the exec and hands back the hijacked multiplexed stream.
    async fn start_exec(&self, token: &ExecToken) -> Result<ExecStream, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_EXEC_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[derive(Clone)]
pub struct ExecutionBridge {
    registry: Arc<dyn ContainerRegistry>,
    exec: Arc<dyn ExecFacility>,
    settings: ExecSettings,
}

impl ExecutionBridge {
    pub fn new(registry: Arc<dyn ContainerRegistry>, exec: Arc<dyn ExecFacility>) -> Self {
        Self {
            registry,
            exec,
            settings: ExecSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    pub async fn list_containers(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ContainerHandle>, BridgeError> {
        self.with_deadline("list", self.filtered_containers(name_filter))
            .await
    }

    /// Resolves a selector to exactly one container. Registry calls run under
    /// the same timeout as exec sessions.
    pub async fn resolve(&self, selector: &ContainerSelector) -> Result<ContainerHandle, BridgeError> {
        self.with_deadline("resolve", self.resolve_inner(selector))
            .await
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, BridgeError>>,
    ) -> Result<T, BridgeError> {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "container registry timed out"
                );
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    async fn filtered_containers(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ContainerHandle>, BridgeError> {
        let containers = self
            .registry
            .list_containers()
            .await
            .map_err(registry_failure)?;
        Ok(match name_filter {
            Some(pattern) => containers
                .into_iter()
                .filter(|container| container.name_matches(pattern))
                .collect(),
            None => containers,
        })
    }

    async fn resolve_inner(
        &self,
        selector: &ContainerSelector,
    ) -> Result<ContainerHandle, BridgeError> {
        match selector {
            ContainerSelector::Id(id) => match self.registry.get_container(id).await {
                Ok(handle) => Ok(handle),
                Err(RuntimeError::NoSuchContainer(_)) => Err(BridgeError::ContainerNotFound(
                    NotFound::NoSuchContainer(id.clone()),
                )),
                Err(err) => Err(registry_failure(err)),
            },
            ContainerSelector::Name(pattern) => {
                let mut candidates = self.filtered_containers(Some(pattern.as_str())).await?;
                if let Some(exact) = candidates.iter().position(|c| c.name_equals(pattern)) {
                    return Ok(candidates.swap_remove(exact));
                }
                match candidates.len() {
                    0 => Err(BridgeError::ContainerNotFound(NotFound::NoMatch(
                        pattern.clone(),
                    ))),
                    1 => Ok(candidates.remove(0)),
                    matches => Err(BridgeError::ContainerNotFound(NotFound::Ambiguous {
                        pattern: pattern.clone(),
                        matches,
                    })),
                }
            }
        }
    }

    /// Runs one command in a fresh exec session under the configured timeout.
    /// On expiry the session's stream is dropped, which closes the hijacked
    /// connection.
    pub async fn execute(
        &self,
        container: &ContainerHandle,
        command: &CompiledCommand,
    ) -> Result<AccumulatedOutput, BridgeError> {
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, self.run_session(container, command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    container = %container.display_name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "exec session timed out; closing stream"
                );
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    async fn run_session(
        &self,
        container: &ContainerHandle,
        command: &CompiledCommand,
    ) -> Result<AccumulatedOutput, BridgeError> {
        let argv = command.argv();
        let token = self
            .exec
            .create_exec(container, &argv)
            .await
            .map_err(spawn_failure)?;
        debug!(
            container = %container.display_name(),
            exec_id = %token.0,
            argc = argv.len(),
            "exec created"
        );
        let stream = self.exec.start_exec(&token).await.map_err(spawn_failure)?;
        let output = drain_stream(stream, self.settings.max_frame_len).await?;
        debug!(
            exec_id = %token.0,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "exec stream drained"
        );
        Ok(output)
    }
}

/// Feeds every chunk of the stream through a private demultiplexer and
/// finalizes it once the stream ends.
pub async fn drain_stream(
    mut stream: ExecStream,
    max_frame_len: usize,
) -> Result<AccumulatedOutput, BridgeError> {
    let mut demux = StreamDemux::with_max_frame_len(max_frame_len);
    while let Some(chunk) = stream.next().await {
        demux.push(&chunk?)?;
    }
    Ok(demux.finish()?)
}

fn spawn_failure(err: RuntimeError) -> BridgeError {
    BridgeError::ExecSpawnFailed(err.to_string())
}

// The registry being unreachable is an infrastructure failure, not a miss.
fn registry_failure(err: RuntimeError) -> BridgeError {
    match err {
        RuntimeError::NoSuchContainer(id) => {
            BridgeError::ContainerNotFound(NotFound::NoSuchContainer(id))
        }
        other => BridgeError::ExecSpawnFailed(format!("container registry: {other}")),
    }
}
