//! In-memory container runtime for tests.

use std::collections::{HashMap, VecDeque};
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, stream};
use parking_lot::Mutex;

use crate::demux::{encode_frame, StreamKind};
use crate::exec::{
    ContainerHandle, ContainerRegistry, ExecFacility, ExecStream, ExecToken, RuntimeError,
};

/// What the next exec session does.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Delivers these chunks, then ends the stream.
    Chunks(Vec<Bytes>),
    /// Exec creation fails.
    SpawnFailure(String),
    /// Delivers the chunks, then fails the stream with an I/O error.
    Broken {
        chunks: Vec<Bytes>,
        error: io::ErrorKind,
    },
    /// Never produces a byte or ends.
    Hang,
}

impl MockResponse {
    pub fn chunks(chunks: Vec<Bytes>) -> Self {
        MockResponse::Chunks(chunks)
    }

    pub fn stdout(text: &str) -> Self {
        MockResponse::Chunks(vec![encode_frame(StreamKind::Stdout, text.as_bytes())])
    }

    pub fn stderr(text: &str) -> Self {
        MockResponse::Chunks(vec![encode_frame(StreamKind::Stderr, text.as_bytes())])
    }

    /// Stdout text framed once, then re-cut into chunks of `size` bytes.
    pub fn chunked(text: &str, size: usize) -> Self {
        let frame = encode_frame(StreamKind::Stdout, text.as_bytes());
        let size = size.max(1);
        MockResponse::Chunks(
            frame
                .chunks(size)
                .map(Bytes::copy_from_slice)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExec {
    pub container_id: String,
    pub argv: Vec<String>,
}

#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<Vec<ContainerHandle>>,
    responses: Mutex<VecDeque<MockResponse>>,
    created: Mutex<HashMap<String, MockResponse>>,
    execs: Mutex<Vec<RecordedExec>>,
    registry_hangs: Mutex<bool>,
}

impl MockRuntime {
    pub fn new(containers: Vec<ContainerHandle>) -> Self {
        Self {
            containers: Mutex::new(containers),
            ..Self::default()
        }
    }

    pub fn push_response(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn execs(&self) -> Vec<RecordedExec> {
        self.execs.lock().clone()
    }

    /// Makes every later registry call wait forever.
    pub fn hang_registry(&self) {
        *self.registry_hangs.lock() = true;
    }

    async fn registry_delay(&self) {
        let hangs = *self.registry_hangs.lock();
        if hangs {
            future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl ContainerRegistry for MockRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>, RuntimeError> {
        self.registry_delay().await;
        Ok(self.containers.lock().clone())
    }

    async fn get_container(&self, id: &str) -> Result<ContainerHandle, RuntimeError> {
        self.registry_delay().await;
        self.containers
            .lock()
            .iter()
            .find(|container| container.id == id)
            .cloned()
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))
    }
}

#[async_trait]
impl ExecFacility for MockRuntime {
    async fn create_exec(
        &self,
        container: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecToken, RuntimeError> {
        let id = {
            let mut execs = self.execs.lock();
            execs.push(RecordedExec {
                container_id: container.id.clone(),
                argv: argv.to_vec(),
            });
            format!("exec-{}", execs.len())
        };
        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockResponse::Chunks(Vec::new()));
        if let MockResponse::SpawnFailure(message) = response {
            return Err(RuntimeError::Api {
                status: 500,
                message,
            });
        }
        self.created.lock().insert(id.clone(), response);
        Ok(ExecToken(id))
    }

    async fn start_exec(&self, token: &ExecToken) -> Result<ExecStream, RuntimeError> {
        let response = self.created.lock().remove(&token.0).ok_or_else(|| RuntimeError::Api {
            status: 404,
            message: format!("no such exec instance: {}", token.0),
        })?;
        let stream: ExecStream = match response {
            MockResponse::Chunks(chunks) => {
                Box::pin(stream::iter(chunks.into_iter().map(Ok::<Bytes, io::Error>)))
            }
            MockResponse::Broken { chunks, error } => Box::pin(stream::iter(
                chunks
                    .into_iter()
                    .map(Ok::<Bytes, io::Error>)
                    .chain(std::iter::once(Err(io::Error::from(error)))),
            )),
            MockResponse::Hang => Box::pin(stream::pending::<io::Result<Bytes>>()),
            MockResponse::SpawnFailure(message) => {
                return Err(RuntimeError::Api {
                    status: 500,
                    message,
                })
            }
        };
        Ok(stream)
    }
}
