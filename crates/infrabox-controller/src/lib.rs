// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod command;
pub mod config;
pub mod error;
pub mod gke;
pub mod informer;
pub mod job;
pub mod mock;
pub mod reconciler;
pub mod state;
pub mod traits;

// Re-export primary types
pub use config::{GerritConfig, GkeControllerConfig, JobControllerConfig};
pub use error::{ControllerError, Result};
pub use reconciler::{Lifecycle, LifecycleController, Teardown};
pub use state::{ResourceState, Triage};
pub use traits::{ApiResource, ClusterProvider, DynamicApi, ObjectStore, RemoteCluster};

// Re-export controller types
pub use api_client::{ApiClient, HttpStore};
pub use gke::{GcloudProvider, GkeController, GkeLifecycle};
pub use informer::{Informer, InformerConfig};
pub use job::{JobController, JobLifecycle};
pub use mock::{MockClusterProvider, MockDynamicApi, MockStore};
