use super::job::SERVICE_SECRET_NAME_LABEL;
use super::status::ResourceStatus;
use crate::error::{InfraboxError, Result};
use crate::resources::{is_valid_name, CustomResource, Resource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Finalizer the GCP service controller places on every cluster it manages
pub const GKE_FINALIZER: &str = "gcp.service.infrabox.net";

/// A GKE cluster requested as a job service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GkeCluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GkeClusterSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

/// Creation parameters; unset fields leave the provider defaults in place
///
/// Values are strings on the wire, flags are enabled by the literal "true".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GkeClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_network_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_nodes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_autoscaling: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_nodes: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

/// A value counts as set only when non-empty
fn set(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl GkeClusterSpec {
    pub fn disk_size(&self) -> Option<&str> {
        set(&self.disk_size)
    }

    pub fn machine_type(&self) -> Option<&str> {
        set(&self.machine_type)
    }

    pub fn num_nodes(&self) -> Option<&str> {
        set(&self.num_nodes)
    }

    pub fn max_nodes(&self) -> Option<&str> {
        set(&self.max_nodes)
    }

    pub fn min_nodes(&self) -> Option<&str> {
        set(&self.min_nodes)
    }

    pub fn network_policy_enabled(&self) -> bool {
        flag(&self.enable_network_policy)
    }

    pub fn preemptible(&self) -> bool {
        flag(&self.preemptible)
    }

    pub fn autoscaling_enabled(&self) -> bool {
        flag(&self.enable_autoscaling)
    }
}

impl GkeCluster {
    /// Name of the credentials secret, taken from the secret-name label
    pub fn secret_name(&self) -> Result<&str> {
        let name = self.label(SERVICE_SECRET_NAME_LABEL).ok_or_else(|| {
            InfraboxError::invalid_resource(
                format!("cluster {} has no secret name", self.object_key()),
                format!("Set the '{}' label", SERVICE_SECRET_NAME_LABEL),
            )
        })?;

        if !is_valid_name(name) {
            return Err(InfraboxError::invalid_resource(
                format!("secret name '{}' is not a valid object name", name),
                "Use a lowercase DNS-1123 name for the secret-name label",
            ));
        }

        Ok(name)
    }
}

impl Resource for GkeCluster {
    const API_VERSION: &'static str = "gcp.service.infrabox.net/v1alpha1";
    const KIND: &'static str = "GKECluster";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CustomResource for GkeCluster {
    fn status(&self) -> &ResourceStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status
    }
}
