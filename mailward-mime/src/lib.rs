//! MIME encoding for outbound messages.
//!
//! Turns an [`EmailRequest`](mailward_common::message::EmailRequest) plus
//! the envelope strings resolved by the dispatcher into final wire bytes:
//! header emission rules, multipart/alternative assembly, and CR/LF
//! normalization. Template rendering, the plain-text projection of HTML and
//! inline image embedding are consumed through the hook traits in
//! [`hooks`].

pub mod encode;
pub mod error;
pub mod headers;
pub mod hooks;

pub use encode::{encode, expand_cr, extract_title, EncodeContext};
pub use error::EncodeError;
pub use headers::{Header, HeaderValue, ListItem};
pub use hooks::{ImageEmbedder, RenderHooks, TagStripper, TemplateEngine, TextAlternative};
