pub mod address;
pub mod config;
pub mod logging;
pub mod message;
pub mod notify;
pub mod pickle;

pub use tracing;

/// Product identity emitted in the `X-Mailer` header.
pub const PRODUCT: &str = "Mailward";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PRODUCT_URL: &str = "https://github.com/mailward/mailward";

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
