use crate::dns::name::DnsName;
use crate::error::{IssuanceError, IssueResult};
use crate::session::AuthorizationChallenge;
use async_trait::async_trait;
use hickory_resolver::proto::rr::RecordType;
use tracing::{debug, info, warn};

/// A DNS hosting API that can create and remove records on demand.
///
/// Records are addressed by the zone they belong to (the top domain) plus the label below it.
/// Implementations must add records next to existing ones with the same name: several DNS-01
/// proofs share `_acme-challenge.<top domain>`.
#[async_trait]
pub trait DynamicDnsProvider: Send + Sync {
    /// Human-readable provider name, used in logs and errors.
    fn name(&self) -> &str;

    /// Remove every record at `sub_label` in `domain`. Removing nothing is not an error.
    async fn delete(&self, domain: &DnsName, sub_label: &str) -> anyhow::Result<()>;

    async fn add(
        &self,
        domain: &DnsName,
        sub_label: &str,
        record_type: RecordType,
        value: &str,
    ) -> anyhow::Result<()>;
}

/// Result of one publication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicDnsOutcome {
    pub provider: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl DynamicDnsOutcome {
    fn succeeded(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            success: true,
            error_message: None,
        }
    }

    fn failed(provider: &str, message: String) -> Self {
        Self {
            provider: provider.to_string(),
            success: false,
            error_message: Some(message),
        }
    }

    /// Turn a failed outcome into [`IssuanceError::Provider`].
    pub fn into_result(self) -> IssueResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(IssuanceError::Provider {
                provider: self.provider,
                message: self
                    .error_message
                    .unwrap_or_else(|| "unknown failure".to_string()),
            })
        }
    }
}

/// Replace the challenge records of `challenges` through `provider`.
///
/// Every challenge record name is cleared once, then one TXT record is added per challenge. The
/// first failure ends the run and becomes the outcome. Records added before the failure stay in
/// place; running again is safe because of the initial delete.
pub async fn publish_challenges(
    provider: &dyn DynamicDnsProvider,
    challenges: &[AuthorizationChallenge],
) -> DynamicDnsOutcome {
    let provider_name = provider.name();
    let mut cleared: Vec<&DnsName> = Vec::new();
    for challenge in challenges {
        if cleared.contains(&&challenge.challenge_name) {
            continue;
        }
        debug!(
            "Removing stale records at {} via {provider_name}",
            challenge.challenge_name
        );
        if let Err(e) = provider
            .delete(&challenge.top_domain, challenge.sub_label())
            .await
        {
            warn!(
                "{provider_name} failed to delete records at {}: {e:#}",
                challenge.challenge_name
            );
            return DynamicDnsOutcome::failed(
                provider_name,
                format!(
                    "failed to delete records at {}: {e:#}",
                    challenge.challenge_name
                ),
            );
        }
        cleared.push(&challenge.challenge_name);
    }

    for challenge in challenges {
        if let Err(e) = provider
            .add(
                &challenge.top_domain,
                challenge.sub_label(),
                challenge.record_type,
                &challenge.expected_value,
            )
            .await
        {
            warn!(
                "{provider_name} failed to add the challenge record for {}: {e:#}",
                challenge.domain
            );
            return DynamicDnsOutcome::failed(provider_name, format!("{}: {e:#}", challenge.domain));
        }
        info!(
            "Published DNS-01 record for {} at {} via {provider_name}",
            challenge.domain, challenge.challenge_name
        );
    }
    DynamicDnsOutcome::succeeded(provider_name)
}
