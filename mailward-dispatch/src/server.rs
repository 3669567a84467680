//! The long-lived dispatch supervisor and its caller-facing handle.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use mailward_common::{
    config::{SettingsSource, Snapshot},
    log,
    message::EmailRequest,
    notify::{DeliveryEvent, Notifier},
    pickle::ContextCodec,
    Signal,
};
use mailward_mime::RenderHooks;
use mailward_queue::{retry, Companion, MessageId, QueueEntry, QueueStore};
use mailward_smtp::MailTransport;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::MissedTickBehavior,
};

use crate::{
    bounce,
    error::DispatchError,
    worker::{self, WorkerEnv},
};

const COMMAND_BACKLOG: usize = 128;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Poll timer period. Each tick purges and dispatches due entries.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

enum Command<C> {
    Send {
        id: Option<MessageId>,
        request: EmailRequest,
        ctx: C,
        reply: oneshot::Sender<Result<MessageId, DispatchError>>,
    },
    Bounced {
        address: String,
    },
}

/// Cloneable handle to a running [`DispatchServer`].
pub struct Mailer<C> {
    commands: mpsc::Sender<Command<C>>,
}

impl<C> Clone for Mailer<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<C: Send + 'static> Mailer<C> {
    /// Queue an email with a generated id. The returned id is only handed
    /// out after the store commit, so a bounce arriving right away can
    /// already be correlated.
    pub async fn send(&self, request: EmailRequest, ctx: C) -> Result<MessageId, DispatchError> {
        self.send_with_id(None, request, ctx).await
    }

    /// Queue an email under a caller-chosen id.
    pub async fn send_with_id(
        &self,
        id: Option<MessageId>,
        request: EmailRequest,
        ctx: C,
    ) -> Result<MessageId, DispatchError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                id,
                request,
                ctx,
                reply,
            })
            .await
            .map_err(|_| DispatchError::ServerStopped)?;
        response.await.map_err(|_| DispatchError::ServerStopped)?
    }

    /// Report an inbound bounce notification addressed to a VERP sender.
    pub async fn bounced(&self, address: impl Into<String>) -> Result<(), DispatchError> {
        self.commands
            .send(Command::Bounced {
                address: address.into(),
            })
            .await
            .map_err(|_| DispatchError::ServerStopped)
    }
}

/// The dispatcher supervisor. One instance runs per process; workers are
/// the short-lived tasks it spawns.
pub struct DispatchServer<C> {
    env: Arc<WorkerEnv<C>>,
    settings: Arc<dyn SettingsSource>,
    config: DispatchConfig,
    commands_tx: mpsc::Sender<Command<C>>,
    commands_rx: mpsc::Receiver<Command<C>>,
}

impl<C> DispatchServer<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn MailTransport>,
        settings: Arc<dyn SettingsSource>,
        codec: Arc<dyn ContextCodec<C>>,
        notifier: Arc<dyn Notifier<C>>,
        hooks: RenderHooks,
        config: DispatchConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BACKLOG);
        Self {
            env: Arc::new(WorkerEnv {
                store,
                transport,
                hooks,
                codec,
                notifier,
            }),
            settings,
            config,
            commands_tx,
            commands_rx,
        }
    }

    /// A handle for submitting send/bounce requests.
    pub fn handle(&self) -> Mailer<C> {
        Mailer {
            commands: self.commands_tx.clone(),
        }
    }

    /// Run until a shutdown signal arrives.
    ///
    /// Requests are handled serially on this task; deliveries are spawned
    /// and never block the supervisor. Poll ticks that would land while a
    /// previous poll is still executing are coalesced by the skipped-tick
    /// behavior of the interval.
    pub async fn serve(
        mut self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        log!(internal, "Email dispatcher starting");

        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup does not
        // race the caller's first send.
        poll_timer.tick().await;

        loop {
            tokio::select! {
                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command).await;
                }
                _ = poll_timer.tick() => {
                    self.poll().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            log!(internal, "Email dispatcher shutting down");
                        }
                        Err(e) => {
                            log!(internal, level = WARN, "Shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_command(&self, command: Command<C>) {
        match command {
            Command::Send {
                id,
                request,
                ctx,
                reply,
            } => match self.accept_send(id, request, ctx).await {
                Ok((id, immediate)) => {
                    let _ = reply.send(Ok(id));
                    if !immediate.is_empty() {
                        let snapshot = Snapshot::resolve(self.settings.fetch());
                        for entry in immediate {
                            tokio::spawn(worker::dispatch_entry(
                                self.env.clone(),
                                snapshot.clone(),
                                entry,
                            ));
                        }
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Bounced { address } => self.handle_bounce(&address).await,
        }
    }

    /// Persist the request as one entry per non-empty recipient field.
    /// The reply to the caller happens only after every entry is
    /// committed.
    async fn accept_send(
        &self,
        id: Option<MessageId>,
        request: EmailRequest,
        ctx: C,
    ) -> Result<(MessageId, Vec<QueueEntry>), DispatchError> {
        let id = match id {
            Some(id) => id,
            None => MessageId::generate(),
        };
        let pickled = self.env.codec.pickle(&ctx)?;
        let now = SystemTime::now();

        let mut entries = Vec::new();
        if !request.to.trim().is_empty() {
            entries.push(QueueEntry::new(
                id.clone(),
                request.to.clone(),
                request.clone(),
                pickled.clone(),
                now,
            ));
        }
        if let Some(cc) = request.cc.as_deref().filter(|cc| !cc.trim().is_empty()) {
            entries.push(QueueEntry::new(
                id.companion(Companion::Cc),
                cc,
                request.clone(),
                pickled.clone(),
                now,
            ));
        }
        if let Some(bcc) = request.bcc.as_deref().filter(|bcc| !bcc.trim().is_empty()) {
            entries.push(QueueEntry::new(
                id.companion(Companion::Bcc),
                bcc,
                request.clone(),
                pickled,
                now,
            ));
        }

        for entry in &entries {
            self.env.store.put(entry).await?;
        }

        log!(
            incoming,
            level = DEBUG,
            "Accepted {} as {} entries (queue={})",
            id,
            entries.len(),
            request.queue
        );

        let immediate = if request.queue { Vec::new() } else { entries };
        Ok((id, immediate))
    }

    async fn handle_bounce(&self, address: &str) {
        match bounce::correlate(self.env.store.as_ref(), address).await {
            Ok(Some(entry)) => {
                log!(incoming, level = INFO, "Bounce for {} from <{}>", entry.id, address);
                worker::emit(
                    &self.env,
                    &entry,
                    DeliveryEvent::Bounced {
                        id: entry.id.to_string(),
                        recipient: entry.recipient.clone(),
                    },
                );
            }
            Ok(None) => {
                log!(incoming, level = DEBUG, "Ignoring orphan bounce to <{address}>");
            }
            Err(e) => {
                log!(internal, level = WARN, "Bounce handling for <{address}> failed: {e}");
            }
        }
    }

    /// One poll cycle: refresh configuration, purge aged-out and exhausted
    /// entries, then dispatch everything due. `update_retry` runs before
    /// each worker spawn so a given entry is only ever in flight once.
    async fn poll(&self) {
        let snapshot = Snapshot::resolve(self.settings.fetch());
        let now = SystemTime::now();

        match self
            .env
            .store
            .select(&|entry: &QueueEntry| entry.sent_expired(now))
            .await
        {
            Ok(aged_out) => {
                for entry in aged_out {
                    match self.env.store.delete(&entry.id).await {
                        Ok(Some(entry)) => {
                            worker::emit(
                                &self.env,
                                &entry,
                                DeliveryEvent::Sent {
                                    id: entry.id.to_string(),
                                    recipient: entry.recipient.clone(),
                                },
                            );
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log!(internal, level = WARN, "Could not purge sent entry {}: {e}", entry.id);
                        }
                    }
                }
            }
            Err(e) => log!(internal, level = ERROR, "Poll could not scan for sent entries: {e}"),
        }

        match self
            .env
            .store
            .select(&|entry: &QueueEntry| entry.is_exhausted())
            .await
        {
            Ok(exhausted) => {
                for entry in exhausted {
                    match self.env.store.delete(&entry.id).await {
                        Ok(Some(entry)) => {
                            log!(
                                internal,
                                level = INFO,
                                "Giving up on {} after {} attempts",
                                entry.id,
                                entry.retry
                            );
                            worker::emit(
                                &self.env,
                                &entry,
                                DeliveryEvent::Failed {
                                    id: entry.id.to_string(),
                                    recipient: entry.recipient.clone(),
                                },
                            );
                        }
                        Ok(None) => {}
                        Err(e) => {
                            log!(
                                internal,
                                level = WARN,
                                "Could not purge exhausted entry {}: {e}",
                                entry.id
                            );
                        }
                    }
                }
            }
            Err(e) => log!(internal, level = ERROR, "Poll could not scan for exhausted entries: {e}"),
        }

        match self
            .env
            .store
            .select(&|entry: &QueueEntry| entry.is_due(now))
            .await
        {
            Ok(due) => {
                for entry in due {
                    let updated = match self
                        .env
                        .store
                        .update(&entry.id, Box::new(move |e| retry::update_retry(e, now)))
                        .await
                    {
                        Ok(updated) => updated,
                        // Deleted since the scan (bounce or worker), skip.
                        Err(_) => continue,
                    };

                    tokio::spawn(worker::dispatch_entry(
                        self.env.clone(),
                        snapshot.clone(),
                        updated,
                    ));
                }
            }
            Err(e) => log!(internal, level = ERROR, "Poll could not scan for due entries: {e}"),
        }
    }
}
