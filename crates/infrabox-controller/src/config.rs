use crate::error::{ControllerError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the key used to sign job tokens
pub const DEFAULT_RSA_PRIVATE_KEY_PATH: &str = "/var/run/secrets/infrabox.net/rsa/id_rsa";

/// Default location of the docker daemon configuration handed to jobs
pub const DEFAULT_DAEMON_JSON_PATH: &str = "/etc/docker/daemon.json";

/// Source-control proxy settings passed to both job containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GerritConfig {
    pub hostname: String,
    pub username: String,
    pub port: String,
}

/// Configuration for the job controller, fixed at process start
#[derive(Debug, Clone)]
pub struct JobControllerConfig {
    pub dont_check_certificates: bool,
    /// Host path of the shared cache; `None` disables the cache volume
    pub local_cache_host_path: Option<String>,
    pub job_max_output_size: String,
    pub mount_docker_socket: bool,
    /// Docker daemon configuration, passed verbatim to the job
    pub daemon_json: String,
    /// Public root URL of the InfraBox installation
    pub root_url: String,
    /// Image tag of the job images
    pub version: String,
    pub docker_registry: String,
    pub gerrit: Option<GerritConfig>,
    /// Re-read on every token mint
    pub rsa_private_key_path: PathBuf,
    /// Delay between passes while services or deletions are in progress
    pub poll_interval: Duration,
}

impl JobControllerConfig {
    /// Read the daemon configuration file; an unreadable file is fatal at startup
    pub fn read_daemon_json(path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| {
            ControllerError::invalid_config(
                format!("cannot read daemon config {}: {}", path.display(), e),
                "Mount the docker daemon.json or pass --daemon-json-path",
            )
        })
    }

    pub fn local_cache_enabled(&self) -> bool {
        self.local_cache_host_path.is_some()
    }
}

impl Default for JobControllerConfig {
    fn default() -> Self {
        Self {
            dont_check_certificates: false,
            local_cache_host_path: None,
            job_max_output_size: String::new(),
            mount_docker_socket: false,
            daemon_json: "{}".to_string(),
            root_url: String::new(),
            version: "latest".to_string(),
            docker_registry: String::new(),
            gerrit: None,
            rsa_private_key_path: PathBuf::from(DEFAULT_RSA_PRIVATE_KEY_PATH),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for the GKE cluster controller
#[derive(Debug, Clone)]
pub struct GkeControllerConfig {
    /// Compute zone clusters are created in
    pub zone: String,
    /// gcloud binary to invoke
    pub gcloud: String,
    /// Prefix prepended to the resource name to form the remote cluster name
    pub name_prefix: String,
    /// Delay between passes while a cluster is provisioning or being deleted
    pub poll_interval: Duration,
}

impl Default for GkeControllerConfig {
    fn default() -> Self {
        Self {
            zone: "us-east1-b".to_string(),
            gcloud: "gcloud".to_string(),
            name_prefix: "ib-".to_string(),
            poll_interval: Duration::from_secs(30),
        }
    }
}
