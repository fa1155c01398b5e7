use crate::error::{ControllerError, Result};
use crate::traits::RemoteCluster;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use infrabox_core::k8s_openapi::ByteString;
use infrabox_core::{GkeCluster, ObjectMeta, Resource, Secret};
use std::collections::BTreeMap;

fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value.trim()).map_err(|e| {
        ControllerError::malformed_output(
            "container clusters list",
            format!("masterAuth.{} is not valid base64: {}", field, e),
        )
    })
}

/// Build the credentials secret for a running cluster
///
/// Named after the cluster's secret-name label and owned by the cluster.
pub fn cluster_secret(cluster: &GkeCluster, remote: &RemoteCluster) -> Result<Secret> {
    let auth = &remote.master_auth;

    let data = BTreeMap::from([
        (
            "ca.crt".to_string(),
            ByteString(decode("clusterCaCertificate", &auth.cluster_ca_certificate)?),
        ),
        (
            "client.key".to_string(),
            ByteString(decode("clientKey", &auth.client_key)?),
        ),
        (
            "client.crt".to_string(),
            ByteString(decode("clientCertificate", &auth.client_certificate)?),
        ),
        (
            "username".to_string(),
            ByteString(auth.username.clone().into_bytes()),
        ),
        (
            "password".to_string(),
            ByteString(auth.password.clone().into_bytes()),
        ),
        (
            "endpoint".to_string(),
            ByteString(format!("https://{}", remote.endpoint).into_bytes()),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(cluster.secret_name()?.to_string()),
            namespace: Some(cluster.namespace().to_string()),
            owner_references: Some(vec![cluster.controller_ref()]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}
