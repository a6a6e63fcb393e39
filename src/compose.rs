//! Outbound message derivation
//!
//! Send, reply and forward are first reduced to a plain [`Draft`]; only
//! [`Draft::into_message`] touches `lettre`. Keeping the header rules here
//! lets them be checked without a relay.

use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};

use crate::email::{Email, OutboundAttachment, SendRequest};
use crate::errors::{AppError, AppResult};

const FORWARD_BANNER: &str = "---------- Forwarded message ---------";
const FORWARD_DATE_FORMAT: &str = "%a, %b %-d, %Y at %-I:%M %p";
const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// Fully derived outbound message, not yet rendered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    /// Bracketed message-id used for both In-Reply-To and References
    pub in_reply_to: Option<String>,
    pub attachments: Vec<OutboundAttachment>,
}

pub fn draft_send(request: SendRequest) -> Draft {
    Draft {
        to: request.to,
        cc: request.cc,
        bcc: request.bcc,
        subject: request.subject,
        body: request.body,
        is_html: request.is_html,
        in_reply_to: None,
        attachments: request.attachments,
    }
}

/// Reply to the first sender of `original`
///
/// With `reply_all` the original To list followed by its Cc list becomes
/// the Cc header, duplicates included.
pub fn draft_reply(original: &Email, body: &str, reply_all: bool, is_html: bool) -> AppResult<Draft> {
    let sender = original.first_sender().ok_or_else(|| {
        AppError::invalid(format!("email {} has no From address to reply to", original.id))
    })?;

    let cc = if reply_all {
        original
            .to
            .iter()
            .chain(original.cc.iter())
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    Ok(Draft {
        to: vec![sender.to_owned()],
        cc,
        bcc: Vec::new(),
        subject: reply_subject(&original.subject),
        body: body.to_owned(),
        is_html,
        in_reply_to: bracketed_message_id(&original.message_id),
        attachments: Vec::new(),
    })
}

/// Forward `original` with its attachments to `to`
///
/// The HTML body is preferred over the text body when both exist.
pub fn draft_forward(original: &Email, to: Vec<String>, message: Option<&str>) -> Draft {
    let (body, is_html) = forwarded_body(original, message);
    Draft {
        to,
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: forward_subject(&original.subject),
        body,
        is_html,
        in_reply_to: None,
        attachments: original.attachments.iter().map(OutboundAttachment::from).collect(),
    }
}

pub fn reply_subject(subject: &str) -> String {
    if has_prefix_ignore_case(subject, "re:") {
        subject.to_owned()
    } else {
        format!("Re: {subject}")
    }
}

pub fn forward_subject(subject: &str) -> String {
    if has_prefix_ignore_case(subject, "fwd:") || has_prefix_ignore_case(subject, "fw:") {
        subject.to_owned()
    } else {
        format!("Fwd: {subject}")
    }
}

/// Leading note, banner, then the original body; returns `(body, is_html)`
pub fn forwarded_body(original: &Email, message: Option<&str>) -> (String, bool) {
    let mut body = String::new();
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        body.push_str(message);
        body.push_str("\n\n");
    }

    let date = original
        .date
        .map(|d| d.format(FORWARD_DATE_FORMAT).to_string())
        .unwrap_or_default();
    body.push_str(FORWARD_BANNER);
    body.push('\n');
    body.push_str(&format!("From: {}\n", original.from.join(", ")));
    body.push_str(&format!("Date: {date}\n"));
    body.push_str(&format!("Subject: {}\n", original.subject));
    body.push_str(&format!("To: {}\n", original.to.join(", ")));
    body.push_str("\n\n");

    match (&original.html_body, &original.text_body) {
        (Some(html), _) => {
            body.push_str(html);
            (body, true)
        }
        (None, Some(text)) => {
            body.push_str(text);
            (body, false)
        }
        (None, None) => (body, false),
    }
}

impl Draft {
    /// Render to a `lettre` message sent from `from`
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unparseable addresses or a draft without
    /// recipients.
    pub fn into_message(self, from: &str) -> AppResult<Message> {
        if self.to.is_empty() {
            return Err(AppError::invalid("at least one recipient is required"));
        }

        let mut builder = Message::builder()
            .from(parse_mailbox(from, "from")?)
            .subject(self.subject);
        for addr in &self.to {
            builder = builder.to(parse_mailbox(addr, "to")?);
        }
        for addr in &self.cc {
            builder = builder.cc(parse_mailbox(addr, "cc")?);
        }
        for addr in &self.bcc {
            builder = builder.bcc(parse_mailbox(addr, "bcc")?);
        }
        if let Some(id) = self.in_reply_to {
            builder = builder.in_reply_to(id.clone()).references(id);
        }

        let result = if self.attachments.is_empty() {
            let content_type = if self.is_html {
                ContentType::TEXT_HTML
            } else {
                ContentType::TEXT_PLAIN
            };
            builder.header(content_type).body(self.body)
        } else {
            let text = if self.is_html {
                SinglePart::html(self.body)
            } else {
                SinglePart::plain(self.body)
            };
            let mut multipart = MultiPart::mixed().singlepart(text);
            for att in self.attachments {
                let content_type = attachment_content_type(att.content_type.as_deref());
                multipart = multipart.singlepart(Attachment::new(att.filename).body(att.data, content_type));
            }
            builder.multipart(multipart)
        };

        result.map_err(|e| AppError::invalid(format!("failed to build message: {e}")))
    }
}

fn parse_mailbox(value: &str, field: &str) -> AppResult<Mailbox> {
    value
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| AppError::invalid(format!("invalid {field} address '{value}': {e}")))
}

fn attachment_content_type(value: Option<&str>) -> ContentType {
    value
        .and_then(|v| ContentType::parse(v).ok())
        .or_else(|| ContentType::parse(DEFAULT_ATTACHMENT_TYPE).ok())
        .unwrap_or(ContentType::TEXT_PLAIN)
}

/// Wrap a message-id in angle brackets; `None` when empty
fn bracketed_message_id(message_id: &str) -> Option<String> {
    let id = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    if id.is_empty() {
        None
    } else {
        Some(format!("<{id}>"))
    }
}

fn has_prefix_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
