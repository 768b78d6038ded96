//! Docker Engine backend.
//!
//! Speaks the Engine HTTP API over its Unix socket with a bare hyper http1
//! connection per call. Status codes that mean "already in the requested
//! state" are folded into success.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use serde_json::json;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::error::{ExecError, ExecResult};
use crate::executor::InstanceExecutor;
use crate::spec::{InstanceHandle, InstanceSpec, NetworkMode};

pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Subset of `GET /containers/{name}/json` the executor reads.
#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "State", default)]
    state: ContainerState,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerState {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "Health", default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
struct ContainerHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Executor driving containers through the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerExecutor {
    socket_path: PathBuf,
    /// Optional API version prefix, e.g. `/v1.43`.
    api_prefix: String,
}

impl Default for DockerExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET)
    }
}

impl DockerExecutor {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            api_prefix: String::new(),
        }
    }

    /// Pin requests to an Engine API version.
    pub fn with_api_version(mut self, version: &str) -> Self {
        self.api_prefix = format!("/v{}", version.trim_start_matches('v'));
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issue one request and collect the full response body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ExecResult<(StatusCode, Bytes)> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ExecError::Connect(format!("{}: {e}", self.socket_path.display()))
        })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ExecError::Connect(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker connection closed with error");
            }
        });

        let uri = format!("{}{path}", self.api_prefix);
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header("host", "docker")
            .header("user-agent", "fleet-executor/0.1");

        let payload = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                let bytes = serde_json::to_vec(&value)
                    .map_err(|e| ExecError::InvalidSpec(e.to_string()))?;
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };

        let req = builder
            .body(payload)
            .map_err(|e| ExecError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ExecError::Request(format!("{method} {uri}: {e}")))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ExecError::Request(e.to_string()))?
            .to_bytes();

        debug!(%method, %uri, %status, "docker request");
        Ok((status, bytes))
    }

    async fn inspect(&self, name: &str) -> ExecResult<Option<ContainerInspect>> {
        let (status, body) = self
            .request(Method::GET, &format!("/containers/{name}/json"), None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| ExecError::Decode(e.to_string())),
            s => Err(api_error(s, &body)),
        }
    }
}

impl InstanceExecutor for DockerExecutor {
    async fn exists(&self, name: &str) -> ExecResult<bool> {
        Ok(self.inspect(name).await?.is_some())
    }

    async fn is_running(&self, name: &str) -> ExecResult<bool> {
        Ok(self
            .inspect(name)
            .await?
            .is_some_and(|c| c.state.running))
    }

    async fn is_healthy(&self, name: &str) -> ExecResult<bool> {
        Ok(self.inspect(name).await?.is_some_and(|c| {
            c.state
                .health
                .is_some_and(|h| h.status.eq_ignore_ascii_case("healthy"))
        }))
    }

    async fn create(&self, spec: &InstanceSpec) -> ExecResult<InstanceHandle> {
        if let Some(existing) = self.inspect(&spec.name).await? {
            info!(server = %spec.name, "instance already exists");
            return Ok(InstanceHandle {
                name: spec.name.clone(),
                id: Some(existing.id),
                created: false,
            });
        }

        let body = create_body(spec)?;
        let (status, bytes) = self
            .request(
                Method::POST,
                &format!("/containers/create?name={}", spec.name),
                Some(body),
            )
            .await?;

        match status {
            StatusCode::CONFLICT => {
                info!(server = %spec.name, "instance created concurrently");
                Ok(InstanceHandle::existing(&spec.name))
            }
            s if s.is_success() => {
                let created: CreateResponse = serde_json::from_slice(&bytes)
                    .map_err(|e| ExecError::Decode(e.to_string()))?;
                info!(server = %spec.name, id = %created.id, "instance created");
                Ok(InstanceHandle {
                    name: spec.name.clone(),
                    id: Some(created.id),
                    created: true,
                })
            }
            s => Err(api_error(s, &bytes)),
        }
    }

    async fn start(&self, handle: &InstanceHandle) -> ExecResult<()> {
        let target = handle.id.as_deref().unwrap_or(&handle.name);
        let (status, body) = self
            .request(Method::POST, &format!("/containers/{target}/start"), None)
            .await?;
        match status {
            StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!(server = %handle.name, "cannot start missing instance");
                Ok(())
            }
            s if s.is_success() => Ok(()),
            s => Err(api_error(s, &body)),
        }
    }

    async fn stop(&self, name: &str) -> ExecResult<()> {
        let (status, body) = self
            .request(Method::POST, &format!("/containers/{name}/stop"), None)
            .await?;
        match status {
            StatusCode::NOT_MODIFIED | StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            s => Err(api_error(s, &body)),
        }
    }

    async fn remove(&self, name: &str) -> ExecResult<()> {
        let (status, body) = self
            .request(Method::DELETE, &format!("/containers/{name}"), None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => {
                debug!(server = %name, "instance already removed");
                Ok(())
            }
            s if s.is_success() => Ok(()),
            s => Err(api_error(s, &body)),
        }
    }

    async fn restart(&self, name: &str) -> ExecResult<()> {
        let (status, body) = self
            .request(Method::POST, &format!("/containers/{name}/restart"), None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => {
                warn!(server = %name, "cannot restart missing instance");
                Ok(())
            }
            s if s.is_success() => Ok(()),
            s => Err(api_error(s, &body)),
        }
    }
}

/// Build the `POST /containers/create` body for a spec.
pub(crate) fn create_body(spec: &InstanceSpec) -> ExecResult<serde_json::Value> {
    if spec.name.is_empty() || spec.image.is_empty() {
        return Err(ExecError::InvalidSpec("name and image are required".to_string()));
    }

    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let mounts: Vec<serde_json::Value> = spec
        .mounts
        .iter()
        .map(|m| {
            json!({
                "Type": "volume",
                "Source": m.source,
                "Target": m.target,
                "ReadOnly": m.read_only,
            })
        })
        .collect();
    let volumes: serde_json::Map<String, serde_json::Value> = spec
        .mounts
        .iter()
        .map(|m| (m.target.clone(), json!({})))
        .collect();

    let mut host_config = json!({ "Mounts": mounts });
    let mut exposed = serde_json::Map::new();
    match &spec.network {
        NetworkMode::Host => {
            host_config["NetworkMode"] = json!("host");
        }
        NetworkMode::Ports { ports } => {
            let mut bindings = serde_json::Map::new();
            for port in ports {
                let key = format!("{port}/tcp");
                bindings.insert(key.clone(), json!([{ "HostPort": port.to_string() }]));
                exposed.insert(key, json!({}));
            }
            host_config["PortBindings"] = serde_json::Value::Object(bindings);
        }
    }
    if let Some(mb) = spec.memory_mb {
        host_config["Memory"] = json!(u64::from(mb) * 1024 * 1024);
    }
    if let Some(cpus) = spec.cpus {
        host_config["NanoCpus"] = json!(u64::from(cpus) * 1_000_000_000);
    }

    let mut body = json!({
        "Image": spec.image,
        "Env": env,
        "HostConfig": host_config,
        "ExposedPorts": exposed,
        "Volumes": volumes,
        "Labels": { "fleet.instance": spec.name },
    });
    if let Some(dir) = &spec.working_dir {
        body["WorkingDir"] = json!(dir);
    }
    if !spec.cmd.is_empty() {
        body["Cmd"] = json!(spec.cmd);
    }
    Ok(body)
}

fn api_error(status: StatusCode, body: &[u8]) -> ExecError {
    #[derive(Deserialize)]
    struct Message {
        message: String,
    }
    let message = serde_json::from_slice::<Message>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    ExecError::Api {
        status: status.as_u16(),
        message,
    }
}
