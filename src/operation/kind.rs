//! The closed set of operation kinds the engine knows how to resume.

use crate::error::RecoveryError;
use crate::operation::cluster::ClusterStatus;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateCluster,
    DeleteCluster,
    AddNodes,
    RemoveNodes,
    UpgradeCluster,
    BackupCluster,
    RestoreCluster,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::CreateCluster,
        OperationKind::DeleteCluster,
        OperationKind::AddNodes,
        OperationKind::RemoveNodes,
        OperationKind::UpgradeCluster,
        OperationKind::BackupCluster,
        OperationKind::RestoreCluster,
    ];

    /// Persisted type tag.
    pub fn tag(&self) -> &'static str {
        match self {
            OperationKind::CreateCluster => "create-cluster",
            OperationKind::DeleteCluster => "delete-cluster",
            OperationKind::AddNodes => "add-nodes",
            OperationKind::RemoveNodes => "remove-nodes",
            OperationKind::UpgradeCluster => "upgrade-cluster",
            OperationKind::BackupCluster => "backup-cluster",
            OperationKind::RestoreCluster => "restore-cluster",
        }
    }

    /// Parameters that must be persisted with the operation for recovery.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            OperationKind::CreateCluster | OperationKind::DeleteCluster => &[],
            OperationKind::AddNodes | OperationKind::RemoveNodes => &["nodes"],
            OperationKind::UpgradeCluster => &["version"],
            OperationKind::BackupCluster | OperationKind::RestoreCluster => &["backup_name"],
        }
    }

    /// Cluster status while an operation of this kind runs.
    pub fn in_flight_status(&self) -> ClusterStatus {
        match self {
            OperationKind::CreateCluster => ClusterStatus::Installing,
            OperationKind::DeleteCluster => ClusterStatus::Terminating,
            OperationKind::AddNodes | OperationKind::RemoveNodes => ClusterStatus::Updating,
            OperationKind::UpgradeCluster => ClusterStatus::Upgrading,
            OperationKind::BackupCluster => ClusterStatus::BackingUp,
            OperationKind::RestoreCluster => ClusterStatus::Restoring,
        }
    }

    pub fn done_status(&self) -> ClusterStatus {
        match self {
            OperationKind::DeleteCluster => ClusterStatus::Terminated,
            _ => ClusterStatus::Running,
        }
    }

    /// Destructive kinds leave the cluster in an unknown state when they fail.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateCluster
                | OperationKind::DeleteCluster
                | OperationKind::UpgradeCluster
                | OperationKind::RestoreCluster
        )
    }

    /// Compensating cluster status applied when an operation of this kind fails.
    pub fn error_status(&self) -> ClusterStatus {
        if self.is_destructive() {
            ClusterStatus::Error
        } else {
            ClusterStatus::Running
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OperationKind {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| RecoveryError::UnsupportedType(s.to_string()))
    }
}
