//! Executable jobs and the registry that revives them from the wire.
//!
//! Payload types live in `console-core`; here each payload is paired with
//! the shared [`Env`] into a runnable [`Job`]. The registry is the single
//! place that knows every tag, and the compiler keeps it exhaustive.

pub mod auth;
pub mod combinator;
pub mod domain;
pub mod worker;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

use console_core::jobs::JobKind;

use crate::env::Env;
use crate::processor::BoxedJob;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to deserialize job data for {0}: {1}")]
    BadPayload(JobKind, serde_json::Error),
}

/// Builds runnable jobs from `(tag, payload)` pairs received over the wire.
pub struct JobRegistry {
    env: Arc<Env>,
}

impl JobRegistry {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }

    /// Deserializes `data` according to the tag and wraps it into a
    /// runnable job.
    pub fn build(&self, kind: JobKind, data: serde_json::Value) -> Result<BoxedJob, RegistryError> {
        let env = self.env.clone();
        let job: BoxedJob = match kind {
            JobKind::RegisterUser => Box::new(auth::RegisterUserJob::new(env, decode(kind, data)?)),
            JobKind::UserAudit => {
                decode::<console_core::jobs::UserAuditPayload>(kind, data)?;
                Box::new(auth::UserAuditJob::new(env))
            }
            JobKind::DeployWorker => Box::new(worker::DeployWorkerJob::new(env, decode(kind, data)?)),
            JobKind::DeleteWorkerCr => {
                Box::new(worker::DeleteWorkerCrJob::new(env, decode(kind, data)?))
            }
            JobKind::SyncEnv => Box::new(worker::SyncEnvJob::new(env, decode(kind, data)?)),
            JobKind::SyncSecret => Box::new(worker::SyncSecretJob::new(env, decode(kind, data)?)),
            JobKind::CreateRdb => Box::new(combinator::CreateRdbJob::new(env, decode(kind, data)?)),
            JobKind::DeleteRdb => Box::new(combinator::DeleteRdbJob::new(env, decode(kind, data)?)),
            JobKind::CreateKv => Box::new(combinator::CreateKvJob::new(env, decode(kind, data)?)),
            JobKind::DeleteKv => Box::new(combinator::DeleteKvJob::new(env, decode(kind, data)?)),
            JobKind::DomainVerify => Box::new(domain::VerifyDomainJob::new(env, decode(kind, data)?)),
            JobKind::DomainCheck => {
                decode::<console_core::jobs::DomainCheckPayload>(kind, data)?;
                Box::new(domain::DomainCheckJob::new(env))
            }
            JobKind::DomainDetach => {
                Box::new(domain::DomainDetachJob::new(env, decode(kind, data)?))
            }
        };

        Ok(job)
    }
}

fn decode<T: DeserializeOwned>(kind: JobKind, data: serde_json::Value) -> Result<T, RegistryError> {
    serde_json::from_value(data).map_err(|e| RegistryError::BadPayload(kind, e))
}
