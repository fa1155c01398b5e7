use super::ClusterOperation;
use crate::command::exec;
use crate::config::GkeControllerConfig;
use crate::error::{ControllerError, Result};
use crate::traits::{ClusterProvider, RemoteCluster};
use async_trait::async_trait;
use infrabox_core::crd::GkeClusterSpec;
use tracing::{debug, info, warn};

/// Cluster provider backed by the `gcloud` CLI
pub struct GcloudProvider {
    config: GkeControllerConfig,
}

impl GcloudProvider {
    pub fn new(config: GkeControllerConfig) -> Self {
        Self { config }
    }

    /// Remote cluster name for a local resource name
    pub fn remote_name(&self, name: &str) -> String {
        format!("{}{}", self.config.name_prefix, name)
    }

    pub fn list_args(&self, name: &str) -> Vec<String> {
        vec![
            "container".to_string(),
            "clusters".to_string(),
            "list".to_string(),
            "--filter".to_string(),
            format!("name={}", self.remote_name(name)),
            "--format".to_string(),
            "json".to_string(),
        ]
    }

    /// Arguments for `clusters create`; unset spec values keep gcloud's defaults
    pub fn create_args(&self, name: &str, spec: &GkeClusterSpec) -> Vec<String> {
        let mut args: Vec<String> = [
            "container",
            "clusters",
            "create",
            self.remote_name(name).as_str(),
            "--async",
            "--zone",
            self.config.zone.as_str(),
            "--enable-autorepair",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        push_value(&mut args, "--disk-size", spec.disk_size());
        push_value(&mut args, "--machine-type", spec.machine_type());
        if spec.network_policy_enabled() {
            args.push("--enable-network-policy".to_string());
        }
        push_value(&mut args, "--num-nodes", spec.num_nodes());

        if spec.preemptible() {
            args.push("--preemptible".to_string());
        }

        if spec.autoscaling_enabled() {
            args.push("--enable-autoscaling".to_string());
            push_value(&mut args, "--max-nodes", spec.max_nodes());
            push_value(&mut args, "--min-nodes", spec.min_nodes());
        }

        args
    }

    pub fn delete_args(&self, name: &str) -> Vec<String> {
        [
            "-q",
            "container",
            "clusters",
            "delete",
            self.remote_name(name).as_str(),
            "--async",
            "--zone",
            self.config.zone.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = exec(&self.config.gcloud, &args).await?;
        Ok(output.stdout)
    }
}

fn push_value(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// Parse `clusters list --format json` output
pub fn parse_cluster_list(output: &str) -> Result<Vec<RemoteCluster>> {
    serde_json::from_str(output)
        .map_err(|e| ControllerError::malformed_output("container clusters list", e.to_string()))
}

#[async_trait]
impl ClusterProvider for GcloudProvider {
    async fn find(&self, name: &str) -> Result<Option<RemoteCluster>> {
        let output = self.run(&self.list_args(name)).await?;
        let clusters = parse_cluster_list(&output).inspect_err(|_| {
            warn!("Unexpected cluster list output: {}", output);
        })?;

        let remote = self.remote_name(name);
        let cluster = clusters.into_iter().find(|c| c.name == remote);
        debug!(
            "Cluster {}: {}",
            remote,
            cluster.as_ref().map_or("not found", |c| c.status.as_str())
        );
        Ok(cluster)
    }

    async fn create(&self, name: &str, spec: &GkeClusterSpec) -> Result<ClusterOperation> {
        info!("Creating gke cluster {}", self.remote_name(name));
        self.run(&self.create_args(name, spec)).await?;
        Ok(ClusterOperation::create(name))
    }

    async fn delete(&self, name: &str) -> Result<ClusterOperation> {
        info!("Deleting gke cluster {}", self.remote_name(name));
        self.run(&self.delete_args(name)).await?;
        Ok(ClusterOperation::delete(name))
    }
}
