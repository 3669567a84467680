//! Message encoding: request in, wire bytes out.

use std::sync::LazyLock;

use chrono::Utc;
use mailward_common::{
    address,
    config::Snapshot,
    message::{Body, EmailRequest, MimePart, MultipartSpec, ReplyTo},
    PRODUCT, PRODUCT_URL, VERSION,
};
use regex::Regex;

use crate::{
    error::EncodeError,
    headers::{Header, ListItem},
    hooks::RenderHooks,
};

/// Envelope strings resolved by the dispatcher before encoding, plus the
/// configuration snapshot of the current cycle.
pub struct EncodeContext<'a> {
    pub message_id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub snapshot: &'a Snapshot,
}

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title>(.*?)</title>").expect("title regex compiles"));

/// The `<title>` of an HTML document, collapsed onto a single line.
/// Documents without a title yield `None` (and an empty subject upstream).
pub fn extract_title(html: &str) -> Option<String> {
    TITLE
        .captures(html)
        .map(|captures| address::single_line(&captures[1]))
}

/// Normalize line endings to CRLF: bare CR and bare LF each become CRLF,
/// existing CRLF pairs are preserved. Idempotent.
pub fn expand_cr(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if input.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            byte => out.push(byte),
        }
        i += 1;
    }
    out
}

fn x_mailer() -> String {
    format!("{PRODUCT} {VERSION} ({PRODUCT_URL})")
}

/// Encode a request into final wire bytes.
///
/// Mode selection: a raw body is passed through untouched apart from the
/// `X-Mailer` header; a structured body goes straight to the multipart
/// encoder under the canonical header set; otherwise text/html are
/// rendered and wrapped in `multipart/alternative`.
pub fn encode(
    request: &EmailRequest,
    ctx: &EncodeContext<'_>,
    hooks: &RenderHooks,
) -> Result<Vec<u8>, EncodeError> {
    match &request.body {
        Some(Body::Raw(bytes)) => Ok(encode_raw(bytes)),
        Some(Body::Structured(spec)) => Ok(encode_structured(request, spec, ctx)),
        None => encode_rendered(request, ctx, hooks),
    }
}

fn encode_raw(bytes: &[u8]) -> Vec<u8> {
    let mut out = format!("X-Mailer: {}\r\n", x_mailer()).into_bytes();
    out.extend_from_slice(bytes);
    out
}

/// The headers every non-raw message carries.
fn canonical_headers(ctx: &EncodeContext<'_>) -> Vec<Header> {
    let verp = address::bounce_address(ctx.message_id, ctx.snapshot.bounce_domain());
    vec![
        Header::text("From", ctx.from),
        Header::text("To", ctx.to),
        Header::text("Message-ID", format!("<{verp}>")),
        Header::text("X-Mailer", x_mailer()),
    ]
}

fn encode_structured(
    request: &EmailRequest,
    spec: &MultipartSpec,
    ctx: &EncodeContext<'_>,
) -> Vec<u8> {
    let mut headers = canonical_headers(ctx);
    for (name, value) in &request.headers {
        headers.push(Header::text(name, value));
    }
    for (name, value) in &spec.headers {
        headers.push(Header::text(name, value));
    }

    encode_multipart(
        &spec.mime_type,
        &spec.subtype,
        headers,
        &spec.params,
        &spec.parts,
        ctx.message_id,
    )
}

fn encode_rendered(
    request: &EmailRequest,
    ctx: &EncodeContext<'_>,
    hooks: &RenderHooks,
) -> Result<Vec<u8>, EncodeError> {
    let text = rendered_body(request.text.as_deref(), request.text_template.as_deref(), request, hooks)?;
    let html = rendered_body(request.html.as_deref(), request.html_template.as_deref(), request, hooks)?;

    let subject = match &request.subject {
        Some(subject) => subject.clone(),
        None => extract_title(&html).unwrap_or_default(),
    };

    let mut headers = vec![
        Header::text("From", ctx.from),
        Header::text("To", ctx.to),
        Header::text("Subject", subject),
        Header::text("Date", Utc::now().format("%a, %d %b %Y %H:%M:%S +0000").to_string()),
        Header::text("MIME-Version", "1.0"),
        Header::text(
            "Message-ID",
            format!(
                "<{}>",
                address::bounce_address(ctx.message_id, ctx.snapshot.bounce_domain())
            ),
        ),
        Header::text("X-Mailer", x_mailer()),
    ];

    if let Some(cc) = request.cc.as_deref().filter(|cc| !cc.is_empty()) {
        headers.push(Header::text("Cc", cc));
    }

    if let Some(reply_to) = &request.reply_to {
        headers.push(reply_to_header(reply_to, ctx));
    }

    for (name, value) in &request.headers {
        headers.push(Header::text(name, value));
    }

    let mut parts: Vec<MimePart> = Vec::new();
    if text.is_empty() && html.is_empty() {
        // No body at all: an empty multipart/alternative still goes out.
    } else if text.is_empty() {
        parts.push(MimePart::text(
            "plain",
            hooks.text_alternative.html_to_text(&html),
        ));
    } else {
        parts.push(MimePart::text("plain", text));
    }

    if !html.is_empty() {
        parts.push(MimePart {
            mime_type: "text".to_string(),
            subtype: "html".to_string(),
            headers: Vec::new(),
            body: html.into_bytes(),
        });
        parts = hooks.images.embed(parts);
    }

    Ok(encode_multipart(
        "multipart",
        "alternative",
        headers,
        &[],
        &parts,
        ctx.message_id,
    ))
}

fn rendered_body(
    prerendered: Option<&str>,
    template: Option<&str>,
    request: &EmailRequest,
    hooks: &RenderHooks,
) -> Result<String, EncodeError> {
    match (prerendered, template) {
        (Some(body), _) => Ok(body.to_string()),
        (None, Some(template)) => {
            let rendered = hooks.render(template, &request.vars)?;
            String::from_utf8(rendered)
                .map_err(|_| EncodeError::RenderedNotUtf8(template.to_string()))
        }
        (None, None) => Ok(String::new()),
    }
}

fn reply_to_header(reply_to: &ReplyTo, ctx: &EncodeContext<'_>) -> Header {
    match reply_to {
        ReplyTo::Null => Header::text("Reply-To", "<>"),
        ReplyTo::MessageId => Header::text(
            "Reply-To",
            address::reply_address(ctx.message_id, &ctx.snapshot.email_domain),
        ),
        ReplyTo::Address(addr) => {
            let email = address::ensure_domain(
                &address::extract_email(addr),
                &ctx.snapshot.email_domain,
            );
            let value = match address::display_name(addr) {
                Some(name) => format!("{name} <{email}>"),
                None => format!("<{email}>"),
            };
            Header::text("Reply-To", value)
        }
    }
}

/// The encoder backend: headers plus parts to wire bytes, with a boundary
/// derived from the message id so encoding is reproducible per entry.
fn encode_multipart(
    mime_type: &str,
    subtype: &str,
    mut headers: Vec<Header>,
    params: &[(String, String)],
    parts: &[MimePart],
    message_id: &str,
) -> Vec<u8> {
    let boundary = format!("=_{message_id}");

    let mut content_type = vec![
        ListItem::bare(format!("{mime_type}/{subtype}")),
        ListItem::param("boundary", format!("\"{boundary}\"")),
    ];
    for (key, value) in params {
        content_type.push(ListItem::param(key.clone(), value.clone()));
    }
    headers.push(Header::list("Content-Type", content_type));

    let mut out = Vec::new();
    for header in &headers {
        header.emit(&mut out);
    }
    out.extend_from_slice(b"\r\n");

    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());

        let mut part_type = vec![ListItem::bare(format!(
            "{}/{}",
            part.mime_type, part.subtype
        ))];
        if part.mime_type == "text" {
            part_type.push(ListItem::param("charset", "\"utf-8\""));
        }
        Header::list("Content-Type", part_type).emit(&mut out);
        for (name, value) in &part.headers {
            Header::text(name, value).emit(&mut out);
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&expand_cr(&part.body));
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    out
}
