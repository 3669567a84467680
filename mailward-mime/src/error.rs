use thiserror::Error;

/// Encoding failures are permanent: the dispatcher removes the entry
/// rather than retrying a message that can never render.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no template engine configured, cannot render '{0}'")]
    NoTemplateEngine(String),

    #[error("template '{template}' failed to render: {reason}")]
    Render { template: String, reason: String },

    #[error("rendered template '{0}' is not valid UTF-8")]
    RenderedNotUtf8(String),
}
