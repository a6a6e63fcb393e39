//! Normalized email records and per-call request values
//!
//! `Email` instances are built fresh by the decoder for every fetch; nothing
//! here is cached or carries identity beyond the call that produced it.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Default mailbox for folder-scoped operations
pub const DEFAULT_FOLDER: &str = "INBOX";
/// Default and hard cap for search results
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Normalized email
///
/// `id` is a sequence number scoped to the mailbox it was fetched from. An
/// expunge or re-sync can renumber it, so callers must re-resolve it per
/// operation against the same mailbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Email {
    pub id: u32,
    /// Protocol-level Message-ID (empty for malformed mail)
    pub message_id: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub subject: String,
    /// `None` when the envelope carried no parseable date
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    /// Populated only when the caller asked for attachments
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    pub flags: BTreeSet<String>,
    /// Size of the full raw message as reported by the store
    pub size: u32,
}

impl Email {
    /// First sender address, the reply target
    pub fn first_sender(&self) -> Option<&str> {
        self.from.first().map(String::as_str)
    }
}

/// Attachment materialized from a fetched message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
}

/// Search filters for one mailbox
///
/// `seen` and `unseen` are independent; when both are set the store ANDs
/// them, which matches nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub unseen: bool,
    pub seen: bool,
    /// Target mailbox; `None` means `INBOX`
    pub folder: Option<String>,
    /// Requested cap; `0` means the default
    pub limit: usize,
}

impl SearchCriteria {
    /// Mailbox the search runs against
    pub fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or(DEFAULT_FOLDER)
    }

    /// Limit actually applied, clamped to `1..=50` with `0` meaning 50
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            MAX_SEARCH_RESULTS
        } else {
            self.limit.min(MAX_SEARCH_RESULTS)
        }
    }
}

/// Outbound message request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub attachments: Vec<OutboundAttachment>,
}

/// Attachment to be sent; `content_type` falls back to octet-stream
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundAttachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl From<&Attachment> for OutboundAttachment {
    fn from(att: &Attachment) -> Self {
        Self {
            filename: att.filename.clone(),
            content_type: Some(att.content_type.clone()),
            data: att.data.clone(),
        }
    }
}

fn serialize_base64<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(data))
}
