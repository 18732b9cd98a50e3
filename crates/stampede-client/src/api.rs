//! Management-server API client
//!
//! A thin wrapper over `reqwest` shaped around the endpoints a converge
//! run touches: client/node CRUD, role and environment lookup, dependency
//! solving, cookbook file downloads, caller-configured extra GETs, the
//! reporting endpoint, and the server-proxied telemetry path.
//!
//! Request signing is a boundary concern: the client attaches its identity
//! headers and leaves signature construction to the deployment in front of
//! the server under test.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use stampede_core::{
    Cookbooks, CoreError, Node, RequestRecord, Role, RoleSource, RunList,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

const API_VERSION: &str = "1";
const REPORTING_PROTOCOL_VERSION: &str = "0.1.0";

/// Configuration for the management-server client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Organization-scoped base URL, e.g.
    /// `https://server.example/organizations/capacity/`
    pub base_url: String,
    /// Authenticating client identity
    pub client_name: String,
    /// Value for the `X-Agent-Version` header
    pub agent_version: String,
    /// Request timeout
    pub timeout: Duration,
}

/// A decoded response: status plus body (or `Null` when the body was empty
/// or not JSON). Non-2xx statuses are data here, not errors, because
/// callers branch on them.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Shared HTTP client for the management server.
pub struct ApiClient {
    http: Client,
    base_url: String,
    client_name: String,
    agent_version: String,
    requests: UnboundedSender<RequestRecord>,
}

impl ApiClient {
    /// Build a client. The base URL is normalized to end with a slash so
    /// relative paths join cleanly.
    pub fn new(config: ApiConfig, requests: UnboundedSender<RequestRecord>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        let mut base_url = config.base_url;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            http,
            base_url,
            client_name: config.client_name,
            agent_version: config.agent_version,
            requests,
        })
    }

    /// A handle that tags every request with the node it is made for.
    pub fn for_node<'a>(&'a self, node: &'a str) -> NodeApi<'a> {
        NodeApi { client: self, node }
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn request(
        &self,
        node: &str,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = self.resolve(path);

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .header("X-Api-Version", API_VERSION)
            .header("X-Agent-Version", &self.agent_version)
            .header("X-Client-Name", &self.client_name);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let outcome = builder.send().await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                self.report(node, &method, &url, status, elapsed);
                let body = response.json::<Value>().await.unwrap_or(Value::Null);
                Ok(ApiResponse { status, body })
            }
            Err(err) => {
                // No response: record the sentinel status so failed
                // requests still show up in the profile.
                self.report(node, &method, &url, 999, elapsed);
                Err(ClientError::Http(err))
            }
        }
    }

    fn report(&self, node: &str, method: &Method, url: &str, status: u16, elapsed: Duration) {
        tracing::info!(
            node,
            method = %method,
            url,
            status_code = status,
            request_time_seconds = elapsed.as_secs_f64(),
            "API request"
        );
        let _ = self.requests.send(RequestRecord {
            method: method.to_string(),
            url: url.to_string(),
            status_code: status,
        });
    }

    #[cfg(test)]
    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Per-node view of the API client: every request is logged against the
/// node it simulates.
pub struct NodeApi<'a> {
    client: &'a ApiClient,
    node: &'a str,
}

impl NodeApi<'_> {
    /// Register the node's client object (first run only).
    pub async fn create_client(&self, server_creates_key: bool) -> Result<ApiResponse> {
        let mut body = json!({
            "admin": false,
            "name": self.node,
            "validator": false,
        });
        if server_creates_key {
            body["create_key"] = Value::Bool(true);
        }
        self.client
            .request(self.node, Method::POST, "clients", &[], Some(&body))
            .await
    }

    /// Fetch the node object; 404 means the node does not exist yet.
    pub async fn fetch_node(&self) -> Result<ApiResponse> {
        self.client
            .request(
                self.node,
                Method::GET,
                &format!("nodes/{}", self.node),
                &[],
                None,
            )
            .await
    }

    /// Create the node object.
    pub async fn create_node(&self, node: &Node) -> Result<ApiResponse> {
        let body = serde_json::to_value(node)?;
        self.client
            .request(self.node, Method::POST, "nodes", &[], Some(&body))
            .await
    }

    /// Save the node object after the run.
    pub async fn update_node(&self, node: &Node) -> Result<ApiResponse> {
        let body = serde_json::to_value(node)?;
        self.client
            .request(
                self.node,
                Method::PUT,
                &format!("nodes/{}", node.name),
                &[],
                Some(&body),
            )
            .await
    }

    /// Fetch the environment document, as a converging agent would.
    pub async fn fetch_environment(&self, environment: &str) -> Result<ApiResponse> {
        self.client
            .request(
                self.node,
                Method::GET,
                &format!("environments/{environment}"),
                &[],
                None,
            )
            .await
    }

    /// Submit the expanded run list to the dependency solver.
    pub async fn solve_cookbooks(
        &self,
        environment: &str,
        expanded_run_list: &[String],
    ) -> Result<Cookbooks> {
        let path = format!("environments/{environment}/cookbook_versions");
        let body = json!({ "run_list": expanded_run_list });
        let response = self
            .client
            .request(self.node, Method::POST, &path, &[], Some(&body))
            .await?;
        if !response.is_success() {
            return Err(ClientError::Api {
                status: response.status,
                path,
            });
        }
        Ok(serde_json::from_value(response.body)?)
    }

    /// Download one cookbook file by its fully-qualified URL.
    pub async fn download_file(&self, url: &str) -> Result<ApiResponse> {
        self.client
            .request(self.node, Method::GET, url, &[], None)
            .await
    }

    /// Caller-configured extra GET (absolute or server-relative).
    pub async fn get(&self, path_or_url: &str) -> Result<ApiResponse> {
        self.client
            .request(self.node, Method::GET, path_or_url, &[], None)
            .await
    }

    /// POST a telemetry body through the server's collector proxy.
    pub async fn proxy_telemetry(&self, body: &Value) -> Result<ApiResponse> {
        self.client
            .request(self.node, Method::POST, "data-collector", &[], Some(body))
            .await
    }

    /// Announce a run start to the reporting endpoint.
    pub async fn reporting_run_start(&self, body: &Value) -> Result<ApiResponse> {
        self.client
            .request(
                self.node,
                Method::POST,
                &format!("reports/nodes/{}/runs", self.node),
                &[("X-Reporting-Protocol-Version", REPORTING_PROTOCOL_VERSION)],
                Some(body),
            )
            .await
    }

    /// Announce a run end to the reporting endpoint.
    pub async fn reporting_run_stop(&self, run_id: &str, body: &Value) -> Result<ApiResponse> {
        self.client
            .request(
                self.node,
                Method::POST,
                &format!("reports/nodes/{}/runs/{run_id}", self.node),
                &[("X-Reporting-Protocol-Version", REPORTING_PROTOCOL_VERSION)],
                Some(body),
            )
            .await
    }
}

#[async_trait]
impl RoleSource for NodeApi<'_> {
    async fn role_run_list(
        &self,
        role: &str,
        environment: &str,
    ) -> std::result::Result<RunList, CoreError> {
        let response = self
            .client
            .request(
                self.node,
                Method::GET,
                &format!("roles/{role}"),
                &[],
                None,
            )
            .await
            .map_err(|err| CoreError::RoleFetch {
                role: role.to_string(),
                message: err.to_string(),
            })?;

        if !response.is_success() {
            return Err(CoreError::RoleFetch {
                role: role.to_string(),
                message: format!("status {}", response.status),
            });
        }

        let document: Role =
            serde_json::from_value(response.body).map_err(|err| CoreError::RoleFetch {
                role: role.to_string(),
                message: err.to_string(),
            })?;
        Ok(document.run_list_for(environment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn client(base_url: &str) -> ApiClient {
        let (tx, _rx) = mpsc::unbounded_channel();
        ApiClient::new(
            ApiConfig {
                base_url: base_url.to_string(),
                client_name: "loader".to_string(),
                agent_version: "15.0.0".to_string(),
                timeout: Duration::from_secs(30),
            },
            tx,
        )
        .unwrap()
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let api = client("https://server.example/organizations/capacity");
        assert_eq!(
            api.base_url(),
            "https://server.example/organizations/capacity/"
        );
    }

    #[test]
    fn relative_paths_join_the_base_url() {
        let api = client("https://server.example/organizations/capacity/");
        assert_eq!(
            api.resolve("nodes/stampede-1"),
            "https://server.example/organizations/capacity/nodes/stampede-1"
        );
    }

    #[test]
    fn absolute_urls_pass_through() {
        let api = client("https://server.example/organizations/capacity/");
        assert_eq!(
            api.resolve("https://cdn.example/blobstore/abc"),
            "https://cdn.example/blobstore/abc"
        );
    }
}
