//! Rendering one recipient's copy of a message.

use crate::error::RenderError;
use crate::recipient::{DEFAULT_OPENING_LINE, Recipient};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use lettre::Message;
use lettre::message::{Mailbox, MultiPart};
use multi_emailer_core::MessageId;
use pulldown_cmark::{Options, Parser, html};

/// A message ready to hand to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message_id: MessageId,
    /// The RFC 5322 message, base64url-encoded.
    pub raw: String,
}

/// Trims the opening line and makes sure it ends with a comma.
#[must_use]
pub fn salutation(opening_line: &str) -> String {
    let line = match opening_line.trim() {
        "" => DEFAULT_OPENING_LINE,
        line => line,
    };
    if line.ends_with(',') {
        line.to_string()
    } else {
        format!("{line},")
    }
}

/// Renders Markdown to an HTML fragment.
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Renders a multipart/alternative message for `recipient`.
///
/// The same `message_id` must be passed for every retry of one send so the
/// receiving side can recognise duplicates.
///
/// # Errors
///
/// Returns [`RenderError`] if lettre rejects the headers.
pub fn render(
    from: &Mailbox,
    recipient: &Recipient,
    subject: &str,
    body: &str,
    message_id: MessageId,
) -> Result<RenderedMessage, RenderError> {
    let salutation = salutation(&recipient.opening_line);
    let plain = format!("{salutation}\n\n{body}");
    let html = format!("{salutation}<br />\n{}", markdown_to_html(body));

    let mut builder = Message::builder()
        .from(from.clone())
        .to(recipient.address.clone())
        .subject(subject.trim())
        .message_id(Some(message_id.header_value(from.email.domain())));
    for cc in &recipient.cc {
        builder = builder.cc(cc.clone());
    }
    let message = builder.multipart(MultiPart::alternative_plain_html(plain, html))?;

    Ok(RenderedMessage {
        message_id,
        raw: URL_SAFE.encode(message.formatted()),
    })
}
