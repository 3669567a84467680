//! MX resolution for direct-delivery mode.

use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveErrorKind,
    TokioAsyncResolver,
};
use mailward_common::log;

use crate::error::SendError;

/// One candidate mail server, MX preference order preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailHost {
    pub host: String,
    pub preference: u16,
}

impl MailHost {
    pub fn literal(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            preference: 0,
        }
    }
}

/// Resolve the mail servers of a recipient domain, best preference first.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<MailHost>, SendError>;
}

/// System-configured DNS via hickory. A domain without MX records falls
/// back to the domain itself per RFC 5321 §5.1; lookup failures are
/// temporary (the next poll retries).
pub struct HickoryMxResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryMxResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(
                ResolverConfig::default(),
                ResolverOpts::default(),
            ),
        }
    }
}

impl Default for HickoryMxResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MxResolver for HickoryMxResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<MailHost>, SendError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut hosts: Vec<MailHost> = lookup
                    .iter()
                    .map(|mx| MailHost {
                        host: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
                        preference: mx.preference(),
                    })
                    .collect();
                hosts.sort_by(|a, b| a.preference.cmp(&b.preference));

                if hosts.is_empty() {
                    Ok(vec![MailHost::literal(domain)])
                } else {
                    Ok(hosts)
                }
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    log!(internal, "No MX records for {domain}, using the domain itself");
                    Ok(vec![MailHost::literal(domain)])
                }
                _ => Err(SendError::Temporary {
                    host: domain.to_string(),
                    reason: format!("MX lookup failed: {e}"),
                }),
            },
        }
    }
}

/// Fixed answers, for tests and for deployments with a pinned host list.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: Vec<MailHost>,
}

impl StaticResolver {
    pub fn new(hosts: Vec<MailHost>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl MxResolver for StaticResolver {
    async fn resolve(&self, _domain: &str) -> Result<Vec<MailHost>, SendError> {
        Ok(self.hosts.clone())
    }
}
