//! Configuration lookup and the per-cycle snapshot.
//!
//! The dispatcher never reads configuration ad hoc: at the start of every
//! poll cycle (and of every immediate send) it fetches the full set of
//! recognized options from a [`SettingsSource`] and resolves them into an
//! immutable [`Snapshot`]. Operational changes therefore take effect on the
//! next cycle without a restart.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::log;

/// The raw option set, as fetched from the surrounding application.
///
/// Field names match the option keys of the deployment configuration.
/// All fields are optional or defaulted so a partial configuration file
/// still deserializes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The site's email domain, used for reply addresses and for defaulted
    /// senders.
    pub email_domain: String,
    /// Default sender for requests without a `from`.
    pub email_from: Option<String>,

    pub smtp_relay: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_ssl: bool,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_no_mx_lookups: bool,
    pub smtp_verp_as_from: bool,
    pub smtp_bcc: Option<String>,
    pub email_override: Option<String>,
    pub smtp_spamd_ip: Option<String>,
    pub smtp_spamd_port: Option<u16>,
    pub smtp_bounce_domain: Option<String>,
}

/// A spamd endpoint, present iff both ip and port were configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamdEndpoint {
    pub host: String,
    pub port: u16,
}

impl SpamdEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The resolved, immutable configuration for one dispatch cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub email_domain: String,
    pub email_from: Option<String>,
    pub relay: bool,
    pub host: Option<String>,
    pub port: u16,
    pub ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub no_mx_lookups: bool,
    pub verp_as_from: bool,
    pub bcc: Option<String>,
    pub override_to: Option<String>,
    pub spamd: Option<SpamdEndpoint>,
    bounce_domain: Option<String>,
}

impl Snapshot {
    /// Resolve raw settings into a snapshot.
    ///
    /// Empty strings count as unset for the address-valued options, and the
    /// spamd endpoint exists only when both halves were given.
    pub fn resolve(settings: Settings) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let spamd = match (
            non_empty(settings.smtp_spamd_ip),
            settings.smtp_spamd_port,
        ) {
            (Some(host), Some(port)) => Some(SpamdEndpoint { host, port }),
            _ => None,
        };

        Self {
            email_domain: settings.email_domain,
            email_from: non_empty(settings.email_from),
            relay: settings.smtp_relay,
            host: non_empty(settings.smtp_host),
            port: settings.smtp_port.unwrap_or(25),
            ssl: settings.smtp_ssl,
            username: non_empty(settings.smtp_username),
            password: settings.smtp_password,
            no_mx_lookups: settings.smtp_no_mx_lookups,
            verp_as_from: settings.smtp_verp_as_from,
            bcc: non_empty(settings.smtp_bcc),
            override_to: non_empty(settings.email_override),
            spamd,
            bounce_domain: non_empty(settings.smtp_bounce_domain),
        }
    }

    /// Domain used in VERP bounce addresses: the configured override, or
    /// the site's email domain.
    pub fn bounce_domain(&self) -> &str {
        self.bounce_domain.as_deref().unwrap_or(&self.email_domain)
    }

    /// Default sender used when a request carries no `from`.
    pub fn default_from(&self) -> String {
        self.email_from
            .clone()
            .unwrap_or_else(|| format!("noreply@{}", self.email_domain))
    }
}

/// Pure configuration read, invoked once per cycle.
pub trait SettingsSource: Send + Sync {
    fn fetch(&self) -> Settings;
}

/// In-process settings, mutable between cycles. The source used by tests
/// and by applications that manage configuration themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    inner: Arc<RwLock<Settings>>,
}

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace the settings; the change is visible to the next fetch.
    pub fn replace(&self, settings: Settings) {
        *self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = settings;
    }

    /// Mutate the settings in place.
    pub fn update(&self, apply: impl FnOnce(&mut Settings)) {
        apply(
            &mut self
                .inner
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
    }
}

impl SettingsSource for StaticSettings {
    fn fetch(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

/// Settings backed by a TOML file, re-read on every fetch so that edits to
/// the file are picked up by the next poll cycle.
#[derive(Debug)]
pub struct TomlSettings {
    path: PathBuf,
    last_good: RwLock<Settings>,
}

impl TomlSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: RwLock::new(Settings::default()),
        }
    }
}

impl SettingsSource for TomlSettings {
    fn fetch(&self) -> Settings {
        let parsed = std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| toml::from_str::<Settings>(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(settings) => {
                *self
                    .last_good
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = settings.clone();
                settings
            }
            Err(e) => {
                log!(
                    internal,
                    level = WARN,
                    "Could not reload {}: {e}; keeping previous settings",
                    self.path.display()
                );
                self.last_good
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone()
            }
        }
    }
}
