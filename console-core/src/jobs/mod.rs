//! Job payloads and their type tags.
//!
//! A job crosses the network as `{ task_type, timestamp, data }` where
//! `data` is the serialized payload. The payload structs live here so the
//! outer gateway can build and sign off work without linking any cluster
//! code; the executable side of each job lives in `console-inner`.

mod transport;

pub use transport::{TaskSender, TaskSendError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable string tag selecting the handler class for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "auth.register_user")]
    RegisterUser,
    #[serde(rename = "auth.user_audit")]
    UserAudit,
    #[serde(rename = "worker.deploy_worker")]
    DeployWorker,
    #[serde(rename = "worker.delete_worker_cr")]
    DeleteWorkerCr,
    #[serde(rename = "worker.sync_env")]
    SyncEnv,
    #[serde(rename = "worker.sync_secret")]
    SyncSecret,
    #[serde(rename = "combinator.create_rdb")]
    CreateRdb,
    #[serde(rename = "combinator.delete_rdb")]
    DeleteRdb,
    #[serde(rename = "combinator.create_kv")]
    CreateKv,
    #[serde(rename = "combinator.delete_kv")]
    DeleteKv,
    #[serde(rename = "domain.verify")]
    DomainVerify,
    #[serde(rename = "domain.check")]
    DomainCheck,
    #[serde(rename = "domain.detach")]
    DomainDetach,
}

impl JobKind {
    /// Every known tag, used by the registry to prove full coverage.
    pub const ALL: &'static [JobKind] = &[
        JobKind::RegisterUser,
        JobKind::UserAudit,
        JobKind::DeployWorker,
        JobKind::DeleteWorkerCr,
        JobKind::SyncEnv,
        JobKind::SyncSecret,
        JobKind::CreateRdb,
        JobKind::DeleteRdb,
        JobKind::CreateKv,
        JobKind::DeleteKv,
        JobKind::DomainVerify,
        JobKind::DomainCheck,
        JobKind::DomainDetach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RegisterUser => "auth.register_user",
            JobKind::UserAudit => "auth.user_audit",
            JobKind::DeployWorker => "worker.deploy_worker",
            JobKind::DeleteWorkerCr => "worker.delete_worker_cr",
            JobKind::SyncEnv => "worker.sync_env",
            JobKind::SyncSecret => "worker.sync_secret",
            JobKind::CreateRdb => "combinator.create_rdb",
            JobKind::DeleteRdb => "combinator.delete_rdb",
            JobKind::CreateKv => "combinator.create_kv",
            JobKind::DeleteKv => "combinator.delete_kv",
            JobKind::DomainVerify => "domain.verify",
            JobKind::DomainCheck => "domain.check",
            JobKind::DomainDetach => "domain.detach",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format of a forwarded job.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptTaskRequest {
    pub task_type: JobKind,
    pub timestamp: i64,
    pub data: serde_json::Value,
}

/// Initializes a freshly registered tenant: database plus combinator CR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserPayload {
    pub user_uid: String,
}

/// Cross-checks users, CRs, and tenant databases. Carries no data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAuditPayload {}

/// Turns a deploy version into a `WorkerApp` custom resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployWorkerPayload {
    pub worker_id: String,
    pub user_uid: String,
    pub version_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteWorkerCrPayload {
    pub worker_id: String,
    pub user_uid: String,
}

/// Pushes the merged env map into the worker's ConfigMap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvPayload {
    pub worker_id: String,
    pub user_uid: String,
    pub data: std::collections::BTreeMap<String, String>,
}

/// Pushes one secret entry into the worker's Secret. Deletes remove the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSecretPayload {
    pub worker_id: String,
    pub user_uid: String,
    pub key: String,
    pub value: String,
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRdbPayload {
    pub user_uid: String,
    pub resource_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRdbPayload {
    pub user_uid: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKvPayload {
    pub user_uid: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteKvPayload {
    pub user_uid: String,
    pub resource_id: String,
}

/// Polls the TXT challenge for a pending domain and attaches it on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainVerifyPayload {
    pub cdid: String,
}

/// Re-verifies every bound domain. Carries no data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainCheckPayload {}

/// Removes the cluster objects of a deleted domain binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainDetachPayload {
    pub cdid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_serializes_to_stable_tags() {
        for kind in JobKind::ALL {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let parsed: JobKind = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, *kind);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(serde_json::from_str::<JobKind>("\"worker.reticulate\"").is_err());
    }

    #[test]
    fn accept_task_request_round_trips() {
        let request = AcceptTaskRequest {
            task_type: JobKind::DeployWorker,
            timestamp: 1_700_000_000,
            data: serde_json::to_value(DeployWorkerPayload {
                worker_id: "w1".into(),
                user_uid: "uid1".into(),
                version_id: 7,
            })
            .unwrap(),
        };

        let wire = serde_json::to_string(&request).unwrap();
        assert!(wire.contains("worker.deploy_worker"));

        let parsed: AcceptTaskRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.task_type, JobKind::DeployWorker);
        let payload: DeployWorkerPayload = serde_json::from_value(parsed.data).unwrap();
        assert_eq!(payload.version_id, 7);
    }
}
