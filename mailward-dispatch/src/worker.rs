//! The per-message dispatch worker.

use std::{sync::Arc, time::SystemTime};

use mailward_common::{
    address,
    config::Snapshot,
    log,
    message::EmailRequest,
    notify::{DeliveryEvent, Notifier},
    pickle::ContextCodec,
};
use mailward_mime::{EncodeContext, RenderHooks};
use mailward_queue::{retry, QueueEntry, QueueStore};
use mailward_smtp::{Envelope, MailTransport, SendError, SmtpOptions};

use crate::spamd;

/// Shared handles every worker needs; one `Arc<WorkerEnv>` lives for the
/// whole server.
pub(crate) struct WorkerEnv<C> {
    pub store: Arc<dyn QueueStore>,
    pub transport: Arc<dyn MailTransport>,
    pub hooks: RenderHooks,
    pub codec: Arc<dyn ContextCodec<C>>,
    pub notifier: Arc<dyn Notifier<C>>,
}

/// Restore the entry's context snapshot and publish an event with it.
/// A snapshot that no longer restores drops the event with a warning; the
/// queue transition itself has already happened.
pub(crate) fn emit<C>(env: &WorkerEnv<C>, entry: &QueueEntry, event: DeliveryEvent) {
    match env.codec.depickle(&entry.pickled_context) {
        Ok(ctx) => env.notifier.notify(event, &ctx),
        Err(e) => {
            log!(
                internal,
                level = WARN,
                "Dropping event for {}: stored context did not restore: {e}",
                entry.id
            );
        }
    }
}

/// One outbound delivery attempt for a due queue entry.
///
/// Spawned as a detached task; all outcomes are translated into queue
/// transitions and events here, nothing propagates to the supervisor.
pub(crate) async fn dispatch_entry<C>(env: Arc<WorkerEnv<C>>, snapshot: Snapshot, entry: QueueEntry)
where
    C: Send + Sync + 'static,
{
    let verp = address::bounce_address(entry.id.as_str(), snapshot.bounce_domain());

    let from = resolve_from(&entry.email, &verp, &snapshot);

    let recipient = match &snapshot.override_to {
        Some(override_to) => format!(
            "{} (override) <{}>",
            address::escape_address(&address::single_line(&entry.recipient)),
            override_to
        ),
        None => entry.recipient.clone(),
    };

    let recipient_line = address::single_line(&recipient);
    let recipient_email = address::extract_email(&recipient_line);
    let (_local, recipient_domain) = address::split_address(&recipient_email);

    let options = SmtpOptions::for_recipient(&recipient_domain, &snapshot);

    let encode_ctx = EncodeContext {
        message_id: entry.id.as_str(),
        from: &from,
        to: &recipient_line,
        snapshot: &snapshot,
    };
    let encoded = match mailward_mime::encode(&entry.email, &encode_ctx, &env.hooks) {
        Ok(bytes) => bytes,
        Err(e) => {
            // A message that cannot encode will never encode; retrying
            // would loop forever.
            log!(
                internal,
                level = ERROR,
                "Message {} could not be encoded, dropping: {e}",
                entry.id
            );
            remove_failed(&env, &entry).await;
            return;
        }
    };

    log!(
        outgoing,
        level = DEBUG,
        "Submitting {} to <{}> via {} (sender {verp})",
        entry.id,
        recipient_email,
        options.relay
    );

    let envelope = Envelope {
        sender: verp.clone(),
        recipients: vec![recipient_email.clone()],
    };

    match env.transport.send(&envelope, &encoded, &options).await {
        Ok(receipt) => {
            log!(
                internal,
                level = INFO,
                "Message {} accepted for <{}>: {}",
                entry.id,
                recipient_email,
                receipt.0
            );

            if let Err(e) = retry::mark_sent(env.store.as_ref(), &entry.id, SystemTime::now()).await
            {
                // A bounce may have raced us and removed the entry.
                log!(internal, level = WARN, "Could not mark {} sent: {e}", entry.id);
            }

            if let Some(bcc) = &snapshot.bcc {
                spawn_bcc_copy(&env, bcc, &verp, &encoded, &options);
            }

            if let Some(spamd) = &snapshot.spamd {
                match spamd::check(spamd, &encoded).await {
                    Ok(verdict) => emit(
                        &env,
                        &entry,
                        DeliveryEvent::SpamStatus {
                            id: entry.id.to_string(),
                            verdict,
                        },
                    ),
                    Err(e) => {
                        log!(internal, level = DEBUG, "spamd probe for {} failed: {e}", entry.id);
                    }
                }
            }
        }
        Err(e) if e.is_retriable() => {
            // The entry keeps its current retry_on; the next poll that
            // finds it due tries again.
            log!(internal, level = DEBUG, "Delivery of {} deferred: {e}", entry.id);
        }
        Err(e @ SendError::NoMoreHosts { .. }) => {
            log!(
                internal,
                level = INFO,
                "No host accepted {} for <{}>: {e}",
                entry.id,
                recipient_email
            );
            remove_failed(&env, &entry).await;
        }
        Err(e) => {
            log!(
                internal,
                level = ERROR,
                "Delivery of {} to <{}> failed permanently: {e}",
                entry.id,
                recipient_email
            );
            remove_failed(&env, &entry).await;
        }
    }
}

/// Resolve the From header per the dispatch contract: default the sender
/// when the request has none, rewrite the address to the VERP when
/// configured, and synthesize an address for display-name-only senders.
fn resolve_from(email: &EmailRequest, verp: &str, snapshot: &Snapshot) -> String {
    let base = match email.from_address() {
        Some(from) => address::single_line(from),
        None => snapshot.default_from(),
    };

    let email_part = address::extract_email(&base);
    let has_address = email_part.contains('@');
    let name = address::display_name(&base)
        .or_else(|| (!has_address).then(|| base.clone()));

    if snapshot.verp_as_from {
        match &name {
            Some(name) => format!("{name} <{verp}>"),
            None => format!("<{verp}>"),
        }
    } else if !has_address {
        match &name {
            Some(name) => format!("{name} <{}>", snapshot.default_from()),
            None => snapshot.default_from(),
        }
    } else {
        base
    }
}

async fn remove_failed<C>(env: &WorkerEnv<C>, entry: &QueueEntry) {
    if let Err(e) = env.store.delete(&entry.id).await {
        log!(internal, level = WARN, "Could not remove failed entry {}: {e}", entry.id);
    }
    emit(
        env,
        entry,
        DeliveryEvent::Failed {
            id: entry.id.to_string(),
            recipient: entry.recipient.clone(),
        },
    );
}

/// Fire-and-forget copy of the accepted message to the configured BCC
/// address. Failures only get a log line.
fn spawn_bcc_copy<C>(
    env: &WorkerEnv<C>,
    bcc: &str,
    verp: &str,
    encoded: &[u8],
    options: &SmtpOptions,
) {
    let transport = env.transport.clone();
    let bcc_email = address::extract_email(bcc);
    let envelope = Envelope {
        sender: verp.to_string(),
        recipients: vec![bcc_email],
    };
    let bytes = encoded.to_vec();
    let options = options.clone();

    tokio::spawn(async move {
        if let Err(e) = transport.send(&envelope, &bytes, &options).await {
            log!(internal, level = DEBUG, "BCC copy to {:?} failed: {e}", envelope.recipients);
        }
    });
}

#[cfg(test)]
mod tests {
    use mailward_common::config::{Settings, Snapshot};

    use super::*;

    fn snapshot(settings: Settings) -> Snapshot {
        Snapshot::resolve(Settings {
            email_domain: "example.com".to_string(),
            ..settings
        })
    }

    const VERP: &str = "noreply+a1b2c3d4e5f6g7h8i9j0@example.com";

    #[test]
    fn test_from_defaults_when_absent() {
        let request = EmailRequest::to("a@x");
        let from = resolve_from(&request, VERP, &snapshot(Settings::default()));
        assert_eq!(from, "noreply@example.com");
    }

    #[test]
    fn test_from_prefers_configured_site_sender() {
        let request = EmailRequest::to("a@x");
        let snapshot = snapshot(Settings {
            email_from: Some("Site <site@example.com>".to_string()),
            ..Default::default()
        });
        assert_eq!(resolve_from(&request, VERP, &snapshot), "Site <site@example.com>");
    }

    #[test]
    fn test_from_keeps_caller_address() {
        let request = EmailRequest {
            from: Some("Alice <alice@example.com>".to_string()),
            ..EmailRequest::to("a@x")
        };
        assert_eq!(
            resolve_from(&request, VERP, &snapshot(Settings::default())),
            "Alice <alice@example.com>"
        );
    }

    #[test]
    fn test_verp_as_from_keeps_display_name() {
        let request = EmailRequest {
            from: Some("Alice <alice@example.com>".to_string()),
            ..EmailRequest::to("a@x")
        };
        let snapshot = snapshot(Settings {
            smtp_verp_as_from: true,
            ..Default::default()
        });
        assert_eq!(
            resolve_from(&request, VERP, &snapshot),
            format!("Alice <{VERP}>")
        );
    }

    #[test]
    fn test_verp_as_from_without_name() {
        let request = EmailRequest {
            from: Some("alice@example.com".to_string()),
            ..EmailRequest::to("a@x")
        };
        let snapshot = snapshot(Settings {
            smtp_verp_as_from: true,
            ..Default::default()
        });
        assert_eq!(resolve_from(&request, VERP, &snapshot), format!("<{VERP}>"));
    }

    #[test]
    fn test_display_name_only_sender_gets_default_address() {
        let request = EmailRequest {
            from: Some("Notifications".to_string()),
            ..EmailRequest::to("a@x")
        };
        assert_eq!(
            resolve_from(&request, VERP, &snapshot(Settings::default())),
            "Notifications <noreply@example.com>"
        );
    }
}
