//! Seams to the surrounding application's rendering machinery.
//!
//! The encoder never interprets templates or HTML itself: templates render
//! through [`TemplateEngine`], the plain-text alternative of an HTML-only
//! message comes from [`TextAlternative`], and inline image rewriting is
//! [`ImageEmbedder`]'s business. The defaults here are deliberately small:
//! no templates, a whitespace-collapsing tag stripper, identity embedding.

use std::sync::Arc;

use ahash::AHashMap;
use mailward_common::message::MimePart;

use crate::error::EncodeError;

/// Render a named template with the request's variables mapping.
pub trait TemplateEngine: Send + Sync {
    fn render(
        &self,
        template: &str,
        vars: &AHashMap<String, serde_json::Value>,
    ) -> Result<Vec<u8>, EncodeError>;
}

/// Project HTML onto a plain-text body, used when a request supplies only
/// an HTML part.
pub trait TextAlternative: Send + Sync {
    fn html_to_text(&self, html: &str) -> String;
}

/// Rewrite the parts list of a message with an HTML part: may replace
/// inline `<img>` references and append related parts.
pub trait ImageEmbedder: Send + Sync {
    fn embed(&self, parts: Vec<MimePart>) -> Vec<MimePart>;
}

/// Minimal [`TextAlternative`]: drops tags, collapses whitespace. A real
/// deployment plugs in its markdown projection instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStripper;

impl TextAlternative for TagStripper {
    fn html_to_text(&self, html: &str) -> String {
        let mut text = String::with_capacity(html.len());
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => {
                    in_tag = false;
                    text.push(' ');
                }
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

struct IdentityEmbedder;

impl ImageEmbedder for IdentityEmbedder {
    fn embed(&self, parts: Vec<MimePart>) -> Vec<MimePart> {
        parts
    }
}

/// The hook bundle handed to the encoder.
#[derive(Clone)]
pub struct RenderHooks {
    pub templates: Option<Arc<dyn TemplateEngine>>,
    pub text_alternative: Arc<dyn TextAlternative>,
    pub images: Arc<dyn ImageEmbedder>,
}

impl Default for RenderHooks {
    fn default() -> Self {
        Self {
            templates: None,
            text_alternative: Arc::new(TagStripper),
            images: Arc::new(IdentityEmbedder),
        }
    }
}

impl RenderHooks {
    pub(crate) fn render(
        &self,
        template: &str,
        vars: &AHashMap<String, serde_json::Value>,
    ) -> Result<Vec<u8>, EncodeError> {
        match &self.templates {
            Some(engine) => engine.render(template, vars),
            None => Err(EncodeError::NoTemplateEngine(template.to_string())),
        }
    }
}
