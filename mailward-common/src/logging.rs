//! Logging for the dispatcher.
//!
//! Every event names the channel it belongs to through its target:
//! `mailward::internal` for queue and supervisor state,
//! `mailward::outgoing` for SMTP client traffic, `mailward::incoming` for
//! send and bounce handling. `LOG_LEVEL` accepts either a bare level
//! (`debug`) or a full filter directive list
//! (`mailward=info,mailward::outgoing=trace`).

use tracing_subscriber::EnvFilter;

/// Emit an event on one of the dispatcher's log channels.
///
/// ```ignore
/// log!(outgoing, "{host} >> MAIL FROM:<{sender}>");
/// log!(internal, level = WARN, "could not purge {id}: {e}");
/// ```
///
/// The channel becomes the event target (`mailward::<channel>`), so a
/// filter directive can select one channel without touching the others.
#[macro_export]
macro_rules! log {
    ($channel:ident, level = $level:ident, $($arg:tt)+) => {
        $crate::tracing::event!(
            target: concat!("mailward::", stringify!($channel)),
            $crate::tracing::Level::$level,
            $($arg)+
        )
    };

    ($channel:ident, $($arg:tt)+) => {
        $crate::log!($channel, level = TRACE, $($arg)+)
    };
}

/// Install the process-wide subscriber.
///
/// Falls back to `mailward=info` (`mailward=trace` in debug builds) when
/// `LOG_LEVEL` is unset or does not parse as a filter.
pub fn init() {
    let fallback = if cfg!(debug_assertions) {
        "mailward=trace"
    } else {
        "mailward=info"
    };

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .init();
}
