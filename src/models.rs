//! Tool input DTOs and the response envelope
//!
//! Every tool input derives `JsonSchema` so rmcp can publish its schema.
//! Omitted optional fields take the documented defaults through serde.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::email::DEFAULT_FOLDER;

/// Metadata included in all tool responses
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with a human-readable summary and execution
/// metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ToolEnvelope<T> {
    pub summary: String,
    pub data: T,
    pub meta: Meta,
}

/// Input: search one mailbox
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Substring match on the From header
    pub from: Option<String>,
    /// Substring match on the To header
    pub to: Option<String>,
    /// Substring match on the Subject header
    pub subject: Option<String>,
    /// Only messages on or after this date (RFC 3339 or YYYY-MM-DD)
    pub since: Option<String>,
    /// Only messages before this date (RFC 3339 or YYYY-MM-DD)
    pub before: Option<String>,
    /// Only messages without `\Seen`
    #[serde(default)]
    pub unseen: bool,
    /// Only messages with `\Seen`
    #[serde(default)]
    pub seen: bool,
    /// Mailbox to search (default `INBOX`)
    pub folder: Option<String>,
    /// Maximum results, 1..50 (0 or omitted means 50)
    #[serde(default)]
    pub limit: usize,
}

/// Input: fetch one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Sequence number within `folder`
    pub id: u32,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Include attachment bytes (base64) in the result
    #[serde(default)]
    pub include_attachments: bool,
}

/// Outbound attachment supplied by the caller
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AttachmentInput {
    pub filename: String,
    /// MIME type (default `application/octet-stream`)
    pub content_type: Option<String>,
    /// File contents, base64 encoded
    pub data: String,
}

/// Input: send a new message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Send `body` as HTML instead of plain text
    #[serde(default)]
    pub is_html: bool,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

/// Input: reply to a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplyToEmailInput {
    /// Sequence number of the message being answered
    pub email_id: u32,
    pub body: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Also copy the original To and Cc recipients
    #[serde(default)]
    pub reply_all: bool,
    #[serde(default)]
    pub is_html: bool,
}

/// Input: forward a message with its attachments
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ForwardEmailInput {
    pub email_id: u32,
    pub to: Vec<String>,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Note placed above the forwarded content
    pub message: Option<String>,
}

/// Input: mark messages read or unread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MarkEmailsInput {
    pub email_ids: Vec<u32>,
    #[serde(default = "default_folder")]
    pub folder: String,
}

/// Input: move a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveEmailInput {
    pub email_id: u32,
    pub to_folder: String,
    #[serde(default = "default_folder")]
    pub from_folder: String,
}

/// Input: delete a message
///
/// `permanent` expunges the folder, which also purges every other message
/// already flagged `\Deleted` there.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteEmailInput {
    pub email_id: u32,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default)]
    pub permanent: bool,
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DeleteEmailInput, GetEmailInput, MoveEmailInput, SearchEmailsInput};

    #[test]
    fn omitted_fields_take_defaults() {
        let get: GetEmailInput = serde_json::from_value(json!({ "id": 3 })).expect("parses");
        assert_eq!(get.folder, "INBOX");
        assert!(!get.include_attachments);

        let mv: MoveEmailInput =
            serde_json::from_value(json!({ "email_id": 3, "to_folder": "Archive" }))
                .expect("parses");
        assert_eq!(mv.from_folder, "INBOX");

        let del: DeleteEmailInput =
            serde_json::from_value(json!({ "email_id": 1 })).expect("parses");
        assert!(!del.permanent);

        let search: SearchEmailsInput = serde_json::from_value(json!({})).expect("parses");
        assert_eq!(search.limit, 0);
        assert!(search.folder.is_none());
    }

    #[test]
    fn required_fields_are_enforced() {
        assert!(serde_json::from_value::<GetEmailInput>(json!({ "folder": "INBOX" })).is_err());
        assert!(
            serde_json::from_value::<MoveEmailInput>(json!({ "email_id": 1 })).is_err()
        );
    }
}
