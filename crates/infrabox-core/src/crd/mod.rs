//! Custom resource kinds reconciled by the InfraBox controllers

pub mod gke;
pub mod job;
pub mod status;

pub use gke::{GkeCluster, GkeClusterSpec, GKE_FINALIZER};
pub use job::{
    Job, JobService, JobSpec, JOB_FINALIZER, SERVICE_ID_LABEL, SERVICE_SECRET_NAME_LABEL,
};
pub use status::{ResourceStatus, SyncStatus};
