use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle status reported on both custom resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncStatus {
    /// Never reported (empty string on the wire)
    #[default]
    Unset,
    Pending,
    Ready,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Unset => "",
            SyncStatus::Pending => "pending",
            SyncStatus::Ready => "ready",
            SyncStatus::Error => "error",
        }
    }
}

// Unknown values read back as Unset.
impl From<String> for SyncStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => SyncStatus::Pending,
            "ready" => SyncStatus::Ready,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Unset,
        }
    }
}

impl From<SyncStatus> for String {
    fn from(s: SyncStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `status` sub-document of a custom resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default)]
    pub status: SyncStatus,
    /// Set only when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
