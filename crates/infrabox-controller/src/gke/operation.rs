use crate::error::Result;
use crate::traits::{ClusterProvider, RemoteCluster};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Delete,
}

/// Handle to an asynchronous create or delete issued to the cluster provider
///
/// The provider's own listing is the only source of truth, so polling is a
/// fresh lookup every time; nothing about the remote cluster is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterOperation {
    pub kind: OperationKind,
    /// Name of the local resource the cluster belongs to
    pub cluster: String,
}

/// One observation of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub done: bool,
    pub cluster: Option<RemoteCluster>,
}

impl ClusterOperation {
    pub fn create(cluster: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Create,
            cluster: cluster.into(),
        }
    }

    pub fn delete(cluster: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Delete,
            cluster: cluster.into(),
        }
    }

    /// A create is done once the cluster runs; a delete once it is no longer listed
    pub fn is_done(&self, remote: Option<&RemoteCluster>) -> bool {
        match self.kind {
            OperationKind::Create => remote.is_some_and(RemoteCluster::is_running),
            OperationKind::Delete => remote.is_none(),
        }
    }

    pub async fn poll(&self, provider: &dyn ClusterProvider) -> Result<OperationSnapshot> {
        let cluster = provider.find(&self.cluster).await?;
        Ok(OperationSnapshot {
            done: self.is_done(cluster.as_ref()),
            cluster,
        })
    }
}

impl fmt::Display for ClusterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperationKind::Create => write!(f, "create of cluster {}", self.cluster),
            OperationKind::Delete => write!(f, "delete of cluster {}", self.cluster),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClusterProvider;

    #[tokio::test]
    async fn test_create_done_when_running() {
        let provider = MockClusterProvider::new();
        provider.insert(MockClusterProvider::running("c1"));
        provider.script_status("c1", &["PROVISIONING", "RUNNING"]);

        let op = ClusterOperation::create("c1");
        assert!(!op.poll(&provider).await.unwrap().done);

        let snapshot = op.poll(&provider).await.unwrap();
        assert!(snapshot.done);
        assert_eq!(snapshot.cluster.unwrap().status, "RUNNING");
    }

    #[tokio::test]
    async fn test_create_not_done_while_unlisted() {
        let provider = MockClusterProvider::new();
        let snapshot = ClusterOperation::create("c1").poll(&provider).await.unwrap();
        assert!(!snapshot.done);
        assert!(snapshot.cluster.is_none());
    }

    #[tokio::test]
    async fn test_delete_done_when_absent() {
        let provider = MockClusterProvider::new();
        provider.insert(MockClusterProvider::running("c1"));

        let op = ClusterOperation::delete("c1");
        assert!(!op.poll(&provider).await.unwrap().done);

        provider.remove("c1");
        assert!(op.poll(&provider).await.unwrap().done);
    }
}
