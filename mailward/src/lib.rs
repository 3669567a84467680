//! Standalone dispatcher server: configuration file, logging, and the
//! wiring of the default store, transport and hooks.
//!
//! Applications normally embed
//! [`DispatchServer`](mailward_dispatch::DispatchServer) directly with
//! their own notifier, codec and template engine; this crate is the
//! runnable skeleton around it.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use mailward_common::{
    config::TomlSettings,
    log, logging,
    notify::{DeliveryEvent, Notifier},
    pickle::JsonCodec,
    Signal,
};
use mailward_dispatch::{DispatchConfig, DispatchServer, Mailer};
use mailward_mime::RenderHooks;
use mailward_queue::FileStore;
use mailward_smtp::{HickoryMxResolver, SmtpTransport};
use serde::Deserialize;
use tokio::sync::broadcast;

/// The application context carried by the standalone server. Embedders
/// use their own type; the skeleton keeps it schemaless.
pub type Context = serde_json::Value;

fn default_queue_dir() -> PathBuf {
    PathBuf::from("/var/spool/mailward")
}

fn default_mailer_config() -> PathBuf {
    PathBuf::from("./mailer.toml")
}

const fn default_poll_interval_secs() -> u64 {
    5
}

/// Static process configuration. The relay/override/spamd options live in
/// the separate file named by `mailer_config`, which is re-read on every
/// poll cycle so they can change without a restart.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub queue_dir: PathBuf,
    pub mailer_config: PathBuf,
    pub poll_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_dir: default_queue_dir(),
            mailer_config: default_mailer_config(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Event sink of the standalone server: one log line per event.
struct LogNotifier;

impl Notifier<Context> for LogNotifier {
    fn notify(&self, event: DeliveryEvent, _ctx: &Context) {
        match &event {
            DeliveryEvent::Sent { id, recipient } => {
                log!(internal, level = INFO, "sent {id} to <{recipient}>");
            }
            DeliveryEvent::Failed { id, recipient } => {
                log!(internal, level = WARN, "failed {id} to <{recipient}>");
            }
            DeliveryEvent::Bounced { id, recipient } => {
                log!(internal, level = INFO, "bounced {id} from <{recipient}>");
            }
            DeliveryEvent::SpamStatus { id, verdict } => {
                log!(
                    internal,
                    level = INFO,
                    "spam status for {id}: {:?} {:?}",
                    verdict.status,
                    verdict.tags
                );
            }
        }
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Load the server configuration from a TOML file.
    ///
    /// # Errors
    /// If the configuration file doesn't exist, is not readable, or does
    /// not parse.
    pub fn from_config(file: &str) -> std::io::Result<Self> {
        let file = Path::new(file);
        let mut reader = BufReader::new(File::open(file)?);
        let mut raw = String::new();
        reader.read_to_string(&mut raw)?;

        let config = toml::from_str(&raw)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;

        Ok(Self { config })
    }

    /// Run the dispatcher until ctrl-c.
    ///
    /// # Errors
    /// If the queue directory cannot be opened.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        log!(
            internal,
            level = INFO,
            "Queue at {}, mailer settings from {}",
            self.config.queue_dir.display(),
            self.config.mailer_config.display()
        );

        let store = FileStore::open(self.config.queue_dir).await?;
        let transport = SmtpTransport::with_resolver(Arc::new(HickoryMxResolver::new()));
        let settings = TomlSettings::new(self.config.mailer_config);

        let server = DispatchServer::new(
            Arc::new(store),
            Arc::new(transport),
            Arc::new(settings),
            Arc::new(JsonCodec::<Context>::new()),
            Arc::new(LogNotifier),
            RenderHooks::default(),
            DispatchConfig {
                poll_interval: std::time::Duration::from_secs(self.config.poll_interval_secs),
            },
        );
        let _mailer: Mailer<Context> = server.handle();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(Signal::Shutdown);
            }
        });

        server.serve(shutdown_rx).await?;
        log!(internal, level = INFO, "Shut down cleanly");

        Ok(())
    }
}
