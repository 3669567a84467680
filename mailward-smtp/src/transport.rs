//! The transport contract consumed by the dispatcher, and its SMTP
//! implementation.

use std::sync::Arc;

use async_trait::async_trait;
use mailward_common::log;

use crate::{
    client::SmtpClient,
    dns::{MailHost, MxResolver},
    error::SendError,
    options::SmtpOptions,
};

/// The SMTP envelope: sender without angle brackets, plus the recipient
/// list for `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

/// The server's acceptance line, kept for logging and telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt(pub String);

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(
        &self,
        envelope: &Envelope,
        message: &[u8],
        options: &SmtpOptions,
    ) -> Result<Receipt, SendError>;
}

/// Delivery over SMTP: resolve candidates, walk them on connect-level
/// failure, and run the conversation on the first host that answers,
/// re-trying a deferring host until its attempt budget is spent.
pub struct SmtpTransport {
    resolver: Option<Arc<dyn MxResolver>>,
}

impl SmtpTransport {
    /// A transport that treats every relay as a literal host.
    pub fn new() -> Self {
        Self { resolver: None }
    }

    /// A transport that resolves MX records in direct mode.
    pub fn with_resolver(resolver: Arc<dyn MxResolver>) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    async fn candidates(&self, options: &SmtpOptions) -> Result<Vec<MailHost>, SendError> {
        if options.no_mx_lookups {
            return Ok(vec![MailHost::literal(options.relay.clone())]);
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve(&options.relay).await,
            None => Ok(vec![MailHost::literal(options.relay.clone())]),
        }
    }

    /// Run the delivery against one host, re-trying the session on
    /// temporary failures until the per-host budget runs out. An
    /// exhausted budget reports [`SendError::RetriesExceeded`]; with a
    /// budget of one the single temporary failure passes through as-is.
    async fn deliver_with_budget(
        &self,
        host: &MailHost,
        envelope: &Envelope,
        message: &[u8],
        options: &SmtpOptions,
    ) -> Result<Receipt, SendError> {
        let attempts = options.host_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.deliver_via(host, envelope, message, options).await {
                Ok(receipt) => return Ok(receipt),
                Err(e @ SendError::Temporary { .. }) => {
                    if attempt >= attempts {
                        return if attempts > 1 {
                            Err(SendError::RetriesExceeded {
                                host: host.host.clone(),
                            })
                        } else {
                            Err(e)
                        };
                    }
                    log!(
                        internal,
                        level = DEBUG,
                        "Attempt {attempt}/{attempts} to {} deferred ({e}), retrying",
                        host.host
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn deliver_via(
        &self,
        host: &MailHost,
        envelope: &Envelope,
        message: &[u8],
        options: &SmtpOptions,
    ) -> Result<Receipt, SendError> {
        let mut client = SmtpClient::connect(&host.host, options.port, options.timeouts).await?;

        client.ehlo(&options.helo_name).await?;

        if options.ssl {
            client = client.starttls().await?;
            client.ehlo(&options.helo_name).await?;
        }

        if let Some(credentials) = &options.auth {
            client.auth_plain(credentials).await?;
        }

        client.mail_from(&envelope.sender).await?;
        for recipient in &envelope.recipients {
            client.rcpt_to(recipient).await?;
        }

        let accepted = client.data(message).await?;
        let receipt = Receipt(format!("{} {}", accepted.code, accepted.message()));
        client.quit().await;

        Ok(receipt)
    }
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        envelope: &Envelope,
        message: &[u8],
        options: &SmtpOptions,
    ) -> Result<Receipt, SendError> {
        if envelope.recipients.is_empty() {
            return Err(SendError::InvalidOptions(
                "envelope has no recipients".to_string(),
            ));
        }

        let candidates = self.candidates(options).await?;
        if candidates.is_empty() {
            return Err(SendError::NoMoreHosts {
                last: format!("no mail servers for {}", options.relay),
            });
        }

        let mut last = String::new();
        for host in &candidates {
            match self.deliver_with_budget(host, envelope, message, options).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_connect_level() => {
                    log!(
                        internal,
                        level = DEBUG,
                        "Host {} unreachable ({e}), trying next candidate",
                        host.host
                    );
                    last = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(SendError::NoMoreHosts { last })
    }
}

#[cfg(test)]
mod tests {
    use mailward_common::config::{Settings, Snapshot};

    use super::*;
    use crate::dns::StaticResolver;

    fn direct_options() -> SmtpOptions {
        let snapshot = Snapshot::resolve(Settings {
            email_domain: "example.com".to_string(),
            ..Default::default()
        });
        SmtpOptions::for_direct("customer.org", &snapshot)
    }

    #[tokio::test]
    async fn test_candidates_literal_without_resolver() {
        let transport = SmtpTransport::new();
        let hosts = transport.candidates(&direct_options()).await.unwrap();
        assert_eq!(hosts, vec![MailHost::literal("customer.org")]);
    }

    #[tokio::test]
    async fn test_candidates_use_resolver_in_direct_mode() {
        let transport = SmtpTransport::with_resolver(Arc::new(StaticResolver::new(vec![
            MailHost {
                host: "mx1.customer.org".to_string(),
                preference: 10,
            },
            MailHost {
                host: "mx2.customer.org".to_string(),
                preference: 20,
            },
        ])));

        let hosts = transport.candidates(&direct_options()).await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "mx1.customer.org");
    }

    #[tokio::test]
    async fn test_no_mx_lookups_bypasses_resolver() {
        let transport = SmtpTransport::with_resolver(Arc::new(StaticResolver::new(vec![
            MailHost::literal("mx1.customer.org"),
        ])));

        let mut options = direct_options();
        options.no_mx_lookups = true;
        let hosts = transport.candidates(&options).await.unwrap();
        assert_eq!(hosts, vec![MailHost::literal("customer.org")]);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_no_more_hosts() {
        let transport = SmtpTransport::with_resolver(Arc::new(StaticResolver::default()));
        let envelope = Envelope {
            sender: "noreply+id@example.com".to_string(),
            recipients: vec!["a@customer.org".to_string()],
        };
        let result = transport.send(&envelope, b"msg", &direct_options()).await;
        assert!(matches!(result, Err(SendError::NoMoreHosts { .. })));
    }

    #[tokio::test]
    async fn test_empty_recipient_list_is_invalid() {
        let transport = SmtpTransport::new();
        let envelope = Envelope {
            sender: "noreply+id@example.com".to_string(),
            recipients: Vec::new(),
        };
        let result = transport.send(&envelope, b"msg", &direct_options()).await;
        assert!(matches!(result, Err(SendError::InvalidOptions(_))));
    }
}
