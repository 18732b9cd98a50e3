//! Load-generator configuration
//!
//! One immutable configuration value, loaded from a TOML file with a few
//! flag overrides, validated once before the scheduler starts, and then
//! threaded through the scheduler and every run.

use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use stampede_core::run_list::DEFAULT_ENVIRONMENT;

/// When each converge run downloads cookbook files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Never download
    Never,
    /// Download on a node's first run only
    First,
    /// Download on every run
    Always,
}

impl DownloadMode {
    /// Whether this run should download, given the node's first-run flag.
    pub fn applies(self, first_run: bool) -> bool {
        match self {
            DownloadMode::Never => false,
            DownloadMode::First => first_run,
            DownloadMode::Always => true,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Append-only request log (line-delimited JSON)
    pub log_file: String,

    /// Organization-scoped management server URL; empty disables server
    /// traffic (telemetry-only mode)
    pub server_url: String,

    /// Client identity used against the management server
    pub client_name: String,

    /// Path to the client's private key
    pub client_key: String,

    /// Direct telemetry collector URL; empty routes telemetry through the
    /// server proxy instead
    pub collector_url: String,

    /// Authorization token for the collector
    pub collector_token: String,

    /// JSON file with node automatic attributes
    pub node_attributes_file: String,

    /// JSON file with captured converge status data, replayed verbatim
    pub converge_json_file: String,

    /// JSON file with a captured compliance report
    pub compliance_json_file: String,

    /// Number of nodes to simulate
    pub num_nodes: usize,

    /// Minutes between one node's converge runs
    pub interval: u64,

    /// Converge runs per node; 0 runs until the process is stopped
    pub runs: u32,

    /// Prefix for generated node names
    pub node_name_prefix: String,

    /// Environment each node converges in
    pub environment: String,

    /// Run list used for each node
    pub run_list: Vec<String>,

    /// Fail startup on unrecognized run-list entries instead of silently
    /// dropping them
    pub strict_run_list: bool,

    /// Seconds each run sleeps to simulate convergence work
    pub sleep_duration: u64,

    /// Which runs download cookbook files
    pub download_cookbooks: DownloadMode,

    /// Probability that any single cookbook file is downloaded,
    /// approximating partial cache hits
    pub download_probability: f64,

    /// Extra GET requests made during each run (absolute or
    /// server-relative), simulating cookbook-driven API traffic
    pub api_get_requests: Vec<String>,

    /// Value of the X-Agent-Version header
    pub agent_version: String,

    /// Ask the server to create client keys instead of simulating local
    /// key generation
    pub server_creates_client_key: bool,

    /// Probability that a completed node is retired and replaced by a
    /// fresh identity
    pub node_replacement_rate: f64,

    /// Send run data to the server's reporting service
    pub enable_reporting: bool,

    /// Derived at validation: whether server traffic is exercised
    #[serde(skip)]
    pub use_server: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: "/var/log/stampede/requests.log".to_string(),
            server_url: String::new(),
            client_name: String::new(),
            client_key: String::new(),
            collector_url: String::new(),
            collector_token: "93a49a4f2482c64126f7b6015e6b0f30284287ee4054ff8807fb63d9cbd1c506"
                .to_string(),
            node_attributes_file: String::new(),
            converge_json_file: String::new(),
            compliance_json_file: String::new(),
            num_nodes: 30,
            interval: 30,
            runs: 0,
            node_name_prefix: "stampede".to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            run_list: Vec::new(),
            strict_run_list: false,
            sleep_duration: 0,
            download_cookbooks: DownloadMode::Never,
            download_probability: 1.0,
            api_get_requests: Vec::new(),
            agent_version: "15.8.23".to_string(),
            server_creates_client_key: false,
            node_replacement_rate: 0.0,
            enable_reporting: false,
            use_server: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply command-line overrides on top of the file values.
    pub fn apply_overrides(
        &mut self,
        nodes: Option<usize>,
        interval: Option<u64>,
        prefix: Option<String>,
    ) {
        if let Some(nodes) = nodes {
            self.num_nodes = nodes;
        }
        if let Some(interval) = interval {
            self.interval = interval;
        }
        if let Some(prefix) = prefix {
            self.node_name_prefix = prefix;
        }
    }

    /// Validate and finish the configuration. Errors here are fatal and
    /// happen before the scheduler starts.
    pub fn validate(&mut self) -> CliResult<()> {
        if self.server_url.is_empty() && self.collector_url.is_empty() {
            return Err(CliError::Config(
                "set server_url or collector_url (or both)".to_string(),
            ));
        }

        if !self.server_url.is_empty() {
            self.use_server = true;
            if !self.server_url.ends_with('/') {
                self.server_url.push('/');
            }
            if self.client_name.is_empty() || self.client_key.is_empty() {
                return Err(CliError::Config(
                    "client_name and client_key are required when server_url is set".to_string(),
                ));
            }
        } else {
            // Telemetry-only mode still derives organization context from a
            // server URL, so give it a placeholder.
            self.server_url = "https://server.example/organizations/demo/".to_string();
        }

        if self.num_nodes == 0 {
            return Err(CliError::Config("num_nodes must be at least 1".to_string()));
        }
        if self.interval == 0 {
            return Err(CliError::Config("interval must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.download_probability) {
            return Err(CliError::Config(
                "download_probability must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.node_replacement_rate) {
            return Err(CliError::Config(
                "node_replacement_rate must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.strict_run_list {
            stampede_core::parse_strict(&self.run_list)
                .map_err(|err| CliError::Config(err.to_string()))?;
        }

        Ok(())
    }

    /// Host part of the server URL.
    pub fn server_fqdn(&self) -> String {
        let rest = self
            .server_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.server_url);
        rest.split('/').next().unwrap_or_default().to_string()
    }

    /// Organization name from the server URL path.
    pub fn organization(&self) -> String {
        let rest = self
            .server_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.server_url);
        let mut segments = rest.split('/').skip(1);
        while let Some(segment) = segments.next() {
            if segment == "organizations" {
                return segments.next().unwrap_or_default().to_string();
            }
        }
        String::new()
    }
}

/// Commented sample configuration printed by `stampede init`.
pub const SAMPLE_CONFIG: &str = r#"# log_file specifies where stampede appends its request log.
# Each line is a JSON record of one API request: method, url, status_code.
# The `stampede report` subcommand replays these files into a profile.
# log_file = "/var/log/stampede/requests.log"

# The server_url, client_name and client_key parameters must be set if you
# want to generate API traffic against a management server. Include the
# organization in the URL.
# For example: server_url = "https://server.example/organizations/demo/"
#
# When the server exposes an authenticated collector proxy, run telemetry is
# forwarded through it automatically; if the proxy answers 404 the telemetry
# calls are disabled for the remainder of that run.
# server_url = ""
# client_name = "CLIENT_NAME"
# client_key = "/path/to/CLIENT_NAME.pem"

# The collector_url must be set if you want to send telemetry directly to an
# ingestion service instead of through the server proxy.
# For example: collector_url = "https://ingest.example/data-collector/v0/"
# collector_url = ""

# Authorization token for the collector. The default value matches a stock
# collector deployment; the literal "dev" selects bearer auth.
# collector_token = "93a49a4f2482c64126f7b6015e6b0f30284287ee4054ff8807fb63d9cbd1c506"

# Automatic attributes for every node are loaded from this JSON file.
# node_attributes_file = "/path/to/attributes.json"

# Captured converge status data is replayed verbatim into each node's
# run-converge telemetry instead of being synthesized from the run list.
# converge_json_file = "/path/to/converge-status.json"

# A captured compliance report sent at the end of each run.
# compliance_json_file = "/path/to/compliance-status.json"

# stampede spreads num_nodes converge runs evenly across the interval
# (minutes). Examples:
#   30 nodes / 30 minute interval =  1 converge run per minute
# 1800 nodes / 30 minute interval = 60 converge runs per minute
# num_nodes = 30
# interval = 30

# Converge runs per node; 0 keeps running until the process is stopped.
# runs = 0

# This prefix will go at the beginning of each node name, so multiple
# stampede instances can share a backend without colliding. A value of
# "stampede" results in nodes named "stampede-0", "stampede-1", ...
# node_name_prefix = "stampede"

# Probability that a node is retired and replaced by a brand-new identity
# after completing a run, simulating fleet churn.
# node_replacement_rate = 0.0

# Environment used for each node.
# environment = "_default"

# run_list is the run list used for each node.
# For example: run_list = [ "role[base]", "nginx", "recipe[apt@2.9.2]" ]
# run_list = [ ]

# Unrecognized run-list entries are dropped silently by default; set
# strict_run_list = true to fail startup on them instead.
# strict_run_list = false

# sleep_duration (seconds) simulates the time an agent spends actually
# converging resources.
# sleep_duration = 0

# download_cookbooks controls which converge runs download cookbook files.
# Options: "never", "first" (a node's first run only), "always".
# Downloading can significantly increase the number of API requests
# depending on the run_list.
# download_cookbooks = "never"

# Probability that any single cookbook file is downloaded, approximating
# partial cache hits. 1.0 downloads everything the solver returns.
# download_probability = 1.0

# api_get_requests is an optional list of extra GET requests made during
# each run, simulating API calls the cookbooks would make. Values can be
# absolute URLs or paths relative to server_url.
# api_get_requests = [ ]

# agent_version sets the X-Agent-Version header, i.e. the agent version the
# simulated nodes claim to run.
# agent_version = "15.8.23"

# Agents normally create their client keys locally; set this to ask the
# server to create them instead.
# server_creates_client_key = false

# Send run data to the server's reporting service.
# enable_reporting = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_telemetry_friendly() {
        let config = Config::default();
        assert_eq!(config.num_nodes, 30);
        assert_eq!(config.interval, 30);
        assert_eq!(config.environment, "_default");
        assert_eq!(config.download_cookbooks, DownloadMode::Never);
        assert!(!config.use_server);
    }

    #[test]
    fn validation_requires_a_backend() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn server_mode_requires_credentials() {
        let mut config = Config {
            server_url: "https://server.example/organizations/capacity".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CliError::Config(_))));

        config.client_name = "loader".to_string();
        config.client_key = "/etc/stampede/loader.pem".to_string();
        config.validate().unwrap();
        assert!(config.use_server);
        assert!(config.server_url.ends_with('/'));
    }

    #[test]
    fn collector_only_mode_synthesizes_a_server_url() {
        let mut config = Config {
            collector_url: "https://ingest.example/data-collector/v0/".to_string(),
            ..Config::default()
        };
        config.validate().unwrap();
        assert!(!config.use_server);
        assert_eq!(config.organization(), "demo");
    }

    #[test]
    fn strict_run_list_fails_validation_on_junk() {
        let mut config = Config {
            collector_url: "https://ingest.example/".to_string(),
            run_list: vec!["recipe[apt]".to_string(), "@".to_string()],
            strict_run_list: true,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CliError::Config(_))));

        config.strict_run_list = false;
        config.validate().unwrap();
    }

    #[test]
    fn url_context_extraction() {
        let config = Config {
            server_url: "https://server.example/organizations/capacity/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.server_fqdn(), "server.example");
        assert_eq!(config.organization(), "capacity");
    }

    #[test]
    fn sample_config_is_valid_toml() {
        let parsed: Config = toml::from_str(SAMPLE_CONFIG).unwrap();
        // everything in the sample is commented out, so defaults apply
        assert_eq!(parsed.num_nodes, Config::default().num_nodes);
    }

    #[test]
    fn file_values_and_overrides_compose() {
        let mut config: Config = toml::from_str(
            r#"
            num_nodes = 100
            interval = 10
            run_list = [ "role[base]" ]
            collector_url = "https://ingest.example/"
            "#,
        )
        .unwrap();
        config.apply_overrides(Some(500), None, Some("burst".to_string()));
        config.validate().unwrap();
        assert_eq!(config.num_nodes, 500);
        assert_eq!(config.interval, 10);
        assert_eq!(config.node_name_prefix, "burst");
    }
}
