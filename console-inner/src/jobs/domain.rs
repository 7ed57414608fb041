use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use console_core::db::custom_domains::{self, DomainStatus};
use console_core::jobs::{DomainDetachPayload, DomainVerifyPayload, JobKind};

use crate::cluster::custom_domain::CustomDomainAttachment;
use crate::dns::TxtLookup;
use crate::env::Env;
use crate::processor::{Job, JobError};

/// How many TXT polls a verification attempt makes.
const VERIFY_ATTEMPTS: u32 = 12;

/// Delay before each TXT poll.
const VERIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Polls the challenge record until it matches or the attempts run out.
///
/// Returns true on the first poll whose answers contain `txt_value`.
pub async fn poll_txt_until_match(
    resolver: &dyn TxtLookup,
    txt_name: &str,
    txt_value: &str,
) -> bool {
    for _ in 0..VERIFY_ATTEMPTS {
        tokio::time::sleep(VERIFY_INTERVAL).await;
        let records = resolver.lookup_txt(txt_name).await;
        if records.iter().any(|record| record == txt_value) {
            return true;
        }
    }
    false
}

/// One TXT check, used by the recurring recheck.
pub async fn txt_matches(resolver: &dyn TxtLookup, txt_name: &str, txt_value: &str) -> bool {
    resolver
        .lookup_txt(txt_name)
        .await
        .iter()
        .any(|record| record == txt_value)
}

/// Drives a pending custom domain through its TXT challenge.
///
/// On the first matching poll the row becomes `success` and the ingress
/// wiring is attached; after the final failed poll the row becomes
/// `error` and nothing is created.
pub struct VerifyDomainJob {
    env: Arc<Env>,
    payload: DomainVerifyPayload,
}

impl VerifyDomainJob {
    pub fn new(env: Arc<Env>, payload: DomainVerifyPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for VerifyDomainJob {
    fn kind(&self) -> JobKind {
        JobKind::DomainVerify
    }

    fn id(&self) -> String {
        self.payload.cdid.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        let cdid = &self.payload.cdid;

        let Some(domain) = custom_domains::read_custom_domain(&self.env.pool, cdid)
            .await
            .map_err(|e| JobError::new(e.to_string()))?
        else {
            // Deleted while queued; nothing to verify.
            return Ok(());
        };

        if domain.status != DomainStatus::Pending {
            return Ok(());
        }

        if !poll_txt_until_match(self.env.resolver.as_ref(), &domain.txt_name, &domain.txt_value)
            .await
        {
            custom_domains::update_domain_status(&self.env.pool, cdid, DomainStatus::Error)
                .await
                .map_err(|e| JobError::new(e.to_string()))?;
            info!(cdid = %cdid, domain = %domain.domain, "domain verification failed");
            return Ok(());
        }

        custom_domains::update_domain_status(&self.env.pool, cdid, DomainStatus::Success)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;
        info!(cdid = %cdid, domain = %domain.domain, "domain verified, attaching ingress");

        let attachment = CustomDomainAttachment {
            cdid: domain.cdid,
            user_uid: domain.user_uid,
            domain: domain.domain,
            target: domain.target,
        };
        attachment
            .attach(&self.env.kube)
            .await
            .map_err(|e| JobError::new(format!("attach custom domain: {e}")))?;

        Ok(())
    }
}

/// Recurring recheck of every verified domain. A missing record demotes
/// the row to `error`; demoted rows never recover on their own.
pub struct DomainCheckJob {
    env: Arc<Env>,
}

impl DomainCheckJob {
    pub fn new(env: Arc<Env>) -> Self {
        Self { env }
    }
}

#[async_trait::async_trait]
impl Job for DomainCheckJob {
    fn kind(&self) -> JobKind {
        JobKind::DomainCheck
    }

    fn id(&self) -> String {
        "periodic".to_string()
    }

    async fn run(&self) -> Result<(), JobError> {
        let domains = custom_domains::list_verified_domains(&self.env.pool)
            .await
            .map_err(|e| JobError::new(e.to_string()))?;

        let count = domains.len();
        for domain in domains {
            if txt_matches(self.env.resolver.as_ref(), &domain.txt_name, &domain.txt_value).await {
                continue;
            }
            warn!(cdid = %domain.cdid, domain = %domain.domain, "txt record missing, demoting");
            if let Err(e) =
                custom_domains::update_domain_status(&self.env.pool, &domain.cdid, DomainStatus::Error)
                    .await
            {
                warn!(cdid = %domain.cdid, "failed to demote domain: {e}");
            }
        }

        info!(count, "domain check completed");
        Ok(())
    }
}

/// Removes the ingress wiring of a deleted domain binding.
pub struct DomainDetachJob {
    env: Arc<Env>,
    payload: DomainDetachPayload,
}

impl DomainDetachJob {
    pub fn new(env: Arc<Env>, payload: DomainDetachPayload) -> Self {
        Self { env, payload }
    }
}

#[async_trait::async_trait]
impl Job for DomainDetachJob {
    fn kind(&self) -> JobKind {
        JobKind::DomainDetach
    }

    fn id(&self) -> String {
        self.payload.cdid.clone()
    }

    async fn run(&self) -> Result<(), JobError> {
        CustomDomainAttachment::detach(&self.env.kube, &self.payload.cdid).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Resolver returning a scripted answer per call, then repeating the
    /// last one. Records how many lookups were made.
    struct ScriptedResolver {
        answers: Mutex<Vec<Vec<String>>>,
        lookups: Mutex<u32>,
    }

    impl ScriptedResolver {
        fn new(answers: Vec<Vec<String>>) -> Self {
            Self {
                answers: Mutex::new(answers),
                lookups: Mutex::new(0),
            }
        }

        fn empty() -> Self {
            Self::new(vec![])
        }

        fn lookup_count(&self) -> u32 {
            *self.lookups.lock().unwrap()
        }
    }

    #[async_trait]
    impl TxtLookup for ScriptedResolver {
        async fn lookup_txt(&self, _name: &str) -> Vec<String> {
            *self.lookups.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers.first().cloned().unwrap_or_default()
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_exhausts_all_attempts() {
        let resolver = ScriptedResolver::empty();
        let started = tokio::time::Instant::now();

        let matched =
            poll_txt_until_match(&resolver, "_combinator-verify.example.com", "combinator-verify=x")
                .await;

        assert!(!matched);
        assert_eq!(resolver.lookup_count(), 12);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_matching_poll() {
        let resolver = ScriptedResolver::new(vec![
            vec![],
            vec!["unrelated".to_string()],
            vec!["combinator-verify=tok".to_string(), "other".to_string()],
        ]);

        let matched = poll_txt_until_match(&resolver, "name", "combinator-verify=tok").await;

        assert!(matched);
        assert_eq!(resolver.lookup_count(), 3);
    }

    #[tokio::test]
    async fn single_check_matches_exact_value_only() {
        let resolver = ScriptedResolver::new(vec![vec!["combinator-verify=tok".to_string()]]);
        assert!(txt_matches(&resolver, "name", "combinator-verify=tok").await);

        let resolver = ScriptedResolver::new(vec![vec!["combinator-verify=tok2".to_string()]]);
        assert!(!txt_matches(&resolver, "name", "combinator-verify=tok").await);
    }
}
