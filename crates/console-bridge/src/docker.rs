//! Docker Engine API client for container lookup and hijacked exec sessions.
//!
//! Each API call opens its own connection. `POST /exec/{id}/start` asks for a
//! protocol upgrade; once the daemon answers `101` the raw connection carries
//! the multiplexed stdio stream.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream;
use hyper::body::HttpBody;
use hyper::client::conn::{self, SendRequest};
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::exec::{
    ContainerHandle, ContainerRegistry, ExecFacility, ExecStream, ExecToken, RuntimeError,
};

pub const API_VERSION: &str = "v1.41";
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerEndpoint {
    /// Accepts `unix:///path`, a bare absolute socket path, `tcp://host:port`
    /// or `http://host:port`.
    pub fn parse(host: &str) -> Result<Self, RuntimeError> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(DockerEndpoint::Unix(PathBuf::from(path)));
        }
        if host.starts_with('/') {
            return Ok(DockerEndpoint::Unix(PathBuf::from(host)));
        }
        let addr = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
            .map(|addr| addr.trim_end_matches('/'))
            .filter(|addr| !addr.is_empty() && !addr.contains('/'));
        match addr {
            Some(addr) => Ok(DockerEndpoint::Tcp(addr.to_string())),
            None => Err(RuntimeError::Transport(format!(
                "unsupported docker host `{host}`"
            ))),
        }
    }
}

impl std::fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DockerEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerEndpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateExecBody<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartExecBody {
    detach: bool,
    tty: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedExec {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DaemonMessage {
    message: String,
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    endpoint: DockerEndpoint,
}

impl DockerClient {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_host(host: &str) -> Result<Self, RuntimeError> {
        DockerEndpoint::parse(host).map(Self::new)
    }

    pub fn endpoint(&self) -> &DockerEndpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<SendRequest<Body>, RuntimeError> {
        match &self.endpoint {
            #[cfg(unix)]
            DockerEndpoint::Unix(path) => {
                let io = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|err| {
                        RuntimeError::Transport(format!("connect {}: {err}", path.display()))
                    })?;
                handshake(io).await
            }
            #[cfg(not(unix))]
            DockerEndpoint::Unix(path) => Err(RuntimeError::Transport(format!(
                "unix sockets are unavailable on this platform: {}",
                path.display()
            ))),
            DockerEndpoint::Tcp(addr) => {
                let io = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|err| RuntimeError::Transport(format!("connect {addr}: {err}")))?;
                handshake(io).await
            }
        }
    }

    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, RuntimeError> {
        trace!(method = %request.method(), uri = %request.uri(), "docker request");
        let mut sender = self.connect().await?;
        sender
            .send_request(request)
            .await
            .map_err(|err| RuntimeError::Transport(err.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<(StatusCode, Result<T, RuntimeError>), RuntimeError> {
        let response = self.send(request(Method::GET, path, Body::empty())?).await?;
        let status = response.status();
        let body = read_body(response).await?;
        if !status.is_success() {
            return Ok((status, Err(api_error(status, &body))));
        }
        Ok((status, decode(&body)))
    }
}

async fn handshake<T>(io: T) -> Result<SendRequest<Body>, RuntimeError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = conn::handshake(io)
        .await
        .map_err(|err| RuntimeError::Transport(format!("handshake: {err}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            debug!(error = %err, "docker connection closed with error");
        }
    });
    Ok(sender)
}

fn request(method: Method, path: &str, body: Body) -> Result<Request<Body>, RuntimeError> {
    Request::builder()
        .method(method)
        .uri(format!("/{API_VERSION}{path}"))
        .header(HOST, "docker")
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .map_err(|err| RuntimeError::Transport(err.to_string()))
}

fn json_body<T: Serialize>(value: &T) -> Result<Body, RuntimeError> {
    serde_json::to_vec(value)
        .map(Body::from)
        .map_err(|err| RuntimeError::Decode(err.to_string()))
}

async fn read_body(response: Response<Body>) -> Result<bytes::Bytes, RuntimeError> {
    hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|err| RuntimeError::Transport(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, RuntimeError> {
    serde_json::from_slice(body).map_err(|err| RuntimeError::Decode(err.to_string()))
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<DaemonMessage>(body)
        .map(|msg| msg.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}

// Ids and names go straight into the request path.
fn valid_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}

fn body_stream(body: Body) -> ExecStream {
    Box::pin(stream::unfold(body, |mut body| async move {
        body.data().await.map(|chunk| {
            let chunk = chunk.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
            (chunk, body)
        })
    }))
}

#[async_trait]
impl ContainerRegistry for DockerClient {
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>, RuntimeError> {
        let (_, listed) = self
            .get_json::<Vec<ContainerSummary>>("/containers/json")
            .await?;
        let containers: Vec<ContainerHandle> = listed?
            .into_iter()
            .map(|summary| ContainerHandle {
                id: summary.id,
                names: summary.names,
                labels: summary.labels.unwrap_or_default(),
            })
            .collect();
        debug!(count = containers.len(), "listed containers");
        Ok(containers)
    }

    async fn get_container(&self, id: &str) -> Result<ContainerHandle, RuntimeError> {
        if !valid_reference(id) {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        let (status, inspected) = self
            .get_json::<ContainerInspect>(&format!("/containers/{id}/json"))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        let inspected = inspected?;
        Ok(ContainerHandle {
            id: inspected.id,
            names: if inspected.name.is_empty() {
                Vec::new()
            } else {
                vec![inspected.name]
            },
            labels: inspected
                .config
                .and_then(|config| config.labels)
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ExecFacility for DockerClient {
    async fn create_exec(
        &self,
        container: &ContainerHandle,
        argv: &[String],
    ) -> Result<ExecToken, RuntimeError> {
        let body = json_body(&CreateExecBody {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
            cmd: argv,
        })?;
        let path = format!("/containers/{}/exec", container.id);
        let response = self.send(request(Method::POST, &path, body)?).await?;
        let status = response.status();
        let body = read_body(response).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let created: CreatedExec = decode(&body)?;
        Ok(ExecToken(created.id))
    }

    async fn start_exec(&self, token: &ExecToken) -> Result<ExecStream, RuntimeError> {
        let body = json_body(&StartExecBody {
            detach: false,
            tty: false,
        })?;
        let mut req = request(Method::POST, &format!("/exec/{}/start", token.0), body)?;
        req.headers_mut()
            .insert(CONNECTION, hyper::header::HeaderValue::from_static("Upgrade"));
        req.headers_mut()
            .insert(UPGRADE, hyper::header::HeaderValue::from_static("tcp"));

        let response = self.send(req).await?;
        match response.status() {
            StatusCode::SWITCHING_PROTOCOLS => {
                let upgraded = hyper::upgrade::on(response)
                    .await
                    .map_err(|err| RuntimeError::Transport(format!("upgrade: {err}")))?;
                debug!(exec_id = %token.0, "exec stream hijacked");
                Ok(Box::pin(ReaderStream::new(upgraded)))
            }
            status if status.is_success() => {
                debug!(exec_id = %token.0, %status, "exec stream served as response body");
                Ok(body_stream(response.into_body()))
            }
            status => {
                let body = read_body(response).await?;
                Err(api_error(status, &body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{encode_frame, StreamKind};
    use crate::exec::drain_stream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn endpoints_parse() {
        assert_eq!(
            DockerEndpoint::parse(DEFAULT_DOCKER_HOST).unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(
            DockerEndpoint::parse("tcp://127.0.0.1:2375").unwrap(),
            DockerEndpoint::Tcp("127.0.0.1:2375".into())
        );
        assert_eq!(
            DockerEndpoint::parse("/run/docker.sock").unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/run/docker.sock"))
        );
        assert!(DockerEndpoint::parse("ssh://host").is_err());
        assert!(DockerEndpoint::parse("tcp://").is_err());
    }

    #[test]
    fn daemon_messages_become_api_errors() {
        let err = api_error(
            StatusCode::CONFLICT,
            br#"{"message":"container abc is not running"}"#,
        );
        assert!(matches!(
            err,
            RuntimeError::Api { status: 409, ref message } if message == "container abc is not running"
        ));
    }

    #[test]
    fn path_references_are_restricted() {
        assert!(valid_reference("4f2a9c"));
        assert!(valid_reference("net1_miner.1"));
        assert!(!valid_reference("../images"));
        assert!(!valid_reference(""));
    }

    // Reads one request (headers plus Content-Length body) from the socket.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            socket.read_exact(&mut byte).await.unwrap();
            raw.push(byte[0]);
        }
        let head = String::from_utf8(raw).unwrap();
        let len = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();
        format!("{head}{}", String::from_utf8_lossy(&body))
    }

    async fn serve_once(response: Vec<u8>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (addr, task)
    }

    fn json_response(status: &str, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn lists_containers_over_tcp() {
        let (addr, server) = serve_once(json_response(
            "200 OK",
            r#"[{"Id":"4f2a","Names":["/net1_miner_1"],"Labels":{"role":"miner"}},{"Id":"9b1c","Names":["/net1_peer_1"],"Labels":null}]"#,
        ))
        .await;
        let client = DockerClient::new(DockerEndpoint::Tcp(addr));

        let containers = client.list_containers().await.unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].display_name(), "net1_miner_1");
        assert_eq!(containers[0].labels.get("role").map(String::as_str), Some("miner"));
        assert!(containers[1].labels.is_empty());

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v1.41/containers/json HTTP/1.1"));
    }

    #[tokio::test]
    async fn inspect_404_is_no_such_container() {
        let (addr, _server) =
            serve_once(json_response("404 Not Found", r#"{"message":"No such container: zz"}"#)).await;
        let client = DockerClient::new(DockerEndpoint::Tcp(addr));
        let err = client.get_container("zz").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NoSuchContainer(id) if id == "zz"));
    }

    #[tokio::test]
    async fn create_exec_sends_argv_without_tty() {
        let (addr, server) = serve_once(json_response("201 Created", r#"{"Id":"e77"}"#)).await;
        let client = DockerClient::new(DockerEndpoint::Tcp(addr));
        let container = ContainerHandle {
            id: "4f2a".into(),
            names: vec![],
            labels: BTreeMap::new(),
        };
        let argv: Vec<String> = ["geth", "--exec", "eth.blockNumber", "attach"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let token = client.create_exec(&container, &argv).await.unwrap();
        assert_eq!(token, ExecToken("e77".into()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1.41/containers/4f2a/exec HTTP/1.1"));
        assert!(request.contains(r#""Cmd":["geth","--exec","eth.blockNumber","attach"]"#));
        assert!(request.contains(r#""Tty":false"#));
        assert!(request.contains(r#""AttachStdin":true"#));
    }

    #[tokio::test]
    async fn start_exec_hijacks_the_connection() {
        let mut response = b"HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n".to_vec();
        response.extend_from_slice(&encode_frame(StreamKind::Stdout, b"1234\n"));
        let (addr, server) = serve_once(response).await;
        let client = DockerClient::new(DockerEndpoint::Tcp(addr));

        let stream = client.start_exec(&ExecToken("e77".into())).await.unwrap();
        let output = drain_stream(stream, 1024).await.unwrap();
        assert_eq!(output.stdout, "1234\n");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1.41/exec/e77/start HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("upgrade: tcp"));
        assert!(request.contains(r#"{"Detach":false,"Tty":false}"#));
    }

    #[tokio::test]
    async fn start_failure_carries_daemon_message() {
        let (addr, _server) = serve_once(json_response(
            "409 Conflict",
            r#"{"message":"container 4f2a is not running"}"#,
        ))
        .await;
        let client = DockerClient::new(DockerEndpoint::Tcp(addr));
        let err = client
            .start_exec(&ExecToken("e77".into()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("is not running"));
    }
}
