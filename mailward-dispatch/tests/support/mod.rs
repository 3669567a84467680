//! Test doubles and a small harness for driving a live dispatch server.
#![allow(dead_code)] // Not every helper is used by every test binary.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use mailward_common::{
    config::{Settings, StaticSettings},
    notify::{DeliveryEvent, Notifier},
    pickle::JsonCodec,
    Signal,
};
use mailward_dispatch::{DispatchConfig, DispatchServer, Mailer};
use mailward_mime::RenderHooks;
use mailward_queue::{MemoryStore, MessageId, QueueEntry, QueueStore};
use mailward_smtp::{Envelope, MailTransport, Receipt, SendError, SmtpOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The application context type used across the dispatch tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCtx {
    pub site: String,
}

impl TestCtx {
    pub fn new() -> Self {
        Self {
            site: "testsite".to_string(),
        }
    }
}

/// One recorded SMTP submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub envelope: Envelope,
    pub message: Vec<u8>,
    pub relay: String,
}

impl Submission {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// Scripted outcome for one transport call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Temporary,
    NoMoreHosts,
    Rejected,
}

/// Transport double: records every submission and replays a script of
/// outcomes, defaulting to acceptance once the script runs dry.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    submissions: Mutex<Vec<Submission>>,
}

impl MockTransport {
    pub fn scripted(outcomes: Vec<Outcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            submissions: Mutex::default(),
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(
        &self,
        envelope: &Envelope,
        message: &[u8],
        options: &SmtpOptions,
    ) -> Result<Receipt, SendError> {
        self.submissions.lock().unwrap().push(Submission {
            envelope: envelope.clone(),
            message: message.to_vec(),
            relay: options.relay.clone(),
        });

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Accept);

        match outcome {
            Outcome::Accept => Ok(Receipt("250 OK: accepted".to_string())),
            Outcome::Temporary => Err(SendError::Temporary {
                host: options.relay.clone(),
                reason: "451 deferred".to_string(),
            }),
            Outcome::NoMoreHosts => Err(SendError::NoMoreHosts {
                last: "connection refused".to_string(),
            }),
            Outcome::Rejected => Err(SendError::Rejected {
                host: options.relay.clone(),
                code: 550,
                reason: "unknown user".to_string(),
            }),
        }
    }
}

/// Notifier double: records events with their restored context.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(DeliveryEvent, TestCtx)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(DeliveryEvent, TestCtx)> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier<TestCtx> for RecordingNotifier {
    fn notify(&self, event: DeliveryEvent, ctx: &TestCtx) {
        self.events.lock().unwrap().push((event, ctx.clone()));
    }
}

/// A running dispatch server plus handles to all of its seams.
pub struct Harness {
    pub store: MemoryStore,
    pub settings: StaticSettings,
    pub transport: Arc<MockTransport>,
    pub notifier: Arc<RecordingNotifier>,
    pub mailer: Mailer<TestCtx>,
    shutdown: broadcast::Sender<Signal>,
}

impl Harness {
    pub async fn start(settings: Settings, outcomes: Vec<Outcome>) -> Self {
        Self::start_with_poll(settings, outcomes, Duration::from_millis(25)).await
    }

    pub async fn start_with_poll(
        settings: Settings,
        outcomes: Vec<Outcome>,
        poll_interval: Duration,
    ) -> Self {
        let store = MemoryStore::new();
        let settings = StaticSettings::new(settings);
        let transport = Arc::new(MockTransport::scripted(outcomes));
        let notifier = Arc::new(RecordingNotifier::default());

        let server = DispatchServer::new(
            Arc::new(store.clone()),
            transport.clone(),
            Arc::new(settings.clone()),
            Arc::new(JsonCodec::<TestCtx>::new()),
            notifier.clone(),
            RenderHooks::default(),
            DispatchConfig { poll_interval },
        );
        let mailer = server.handle();

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(server.serve(shutdown_rx));

        Self {
            store,
            settings,
            transport,
            notifier,
            mailer,
            shutdown,
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }
}

/// Poll a synchronous condition until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the store until the entry under `id` satisfies the predicate.
pub async fn wait_for_entry(
    store: &MemoryStore,
    id: &MessageId,
    deadline: Duration,
    predicate: impl Fn(Option<&QueueEntry>) -> bool,
) -> bool {
    let start = tokio::time::Instant::now();
    loop {
        let entry = store.get(id).await.expect("store read");
        if predicate(entry.as_ref()) {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
