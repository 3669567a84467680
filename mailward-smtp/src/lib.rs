//! SMTP client backend for the dispatcher.
//!
//! The dispatcher talks to [`MailTransport`]; the implementation here,
//! [`SmtpTransport`], resolves candidate hosts (the configured relay, or
//! the recipient domain's MX records in direct mode), walks them on
//! connect-level failure and runs the SMTP conversation with per-operation
//! timeouts. STARTTLS and AUTH PLAIN are applied according to the options
//! of the current configuration snapshot.

pub mod client;
pub mod dns;
pub mod error;
pub mod options;
pub mod response;
pub mod transport;

pub use dns::{HickoryMxResolver, MailHost, MxResolver, StaticResolver};
pub use error::SendError;
pub use options::{Credentials, SmtpOptions, SmtpTimeouts, DEFAULT_HOST_ATTEMPTS};
pub use response::Response;
pub use transport::{Envelope, MailTransport, Receipt, SmtpTransport};
