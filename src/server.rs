//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the ten email tools.
//! Handles input validation, orchestration of the mailbox driver and the
//! composer, and response formatting. Tool failures are reported in-band as
//! error results; the JSON-RPC call itself always succeeds.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, Utc};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::compose::{self, Draft};
use crate::config::ServerConfig;
use crate::email::{OutboundAttachment, SearchCriteria, SendRequest};
use crate::errors::{AppError, AppResult};
use crate::imap::ImapConnector;
use crate::mailbox::MailboxDriver;
use crate::models::{
    AttachmentInput, DeleteEmailInput, ForwardEmailInput, GetEmailInput, MarkEmailsInput, Meta,
    MoveEmailInput, ReplyToEmailInput, SearchEmailsInput, SendEmailInput, ToolEnvelope,
};
use crate::smtp::Composer;
use crate::store::StoreConnector;

/// Maximum length of mailbox names and search text
const MAX_FIELD_CHARS: usize = 256;

/// Email MCP server
///
/// Cheap to clone: every clone (one per HTTP session) shares the same
/// mutex-guarded mailbox driver, so protocol commands never interleave.
#[derive(Clone)]
pub struct EmailServer {
    driver: Arc<Mutex<MailboxDriver>>,
    composer: Composer,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl EmailServer {
    /// Create a server backed by the configured IMAP account
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let connector = Arc::new(ImapConnector::new(Arc::clone(&config)));
        Self::with_connector(&config, connector)
    }

    /// Create a server over an arbitrary mail store connector
    pub fn with_connector(config: &ServerConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            driver: Arc::new(Mutex::new(MailboxDriver::new(connector))),
            composer: Composer::new(config.smtp.clone(), config.socket_timeout_ms),
            tool_router: Self::tool_router(),
        }
    }

    /// Try to open the mail store session ahead of the first tool call
    ///
    /// Failure is logged only; the next tool call tries again.
    pub async fn warm_up(&self) {
        match self.driver.lock().await.ensure_connected().await {
            Ok(()) => info!("mail store session ready"),
            Err(e) => warn!(error = %e, "initial mail store connection failed"),
        }
    }

    /// Run [`Self::warm_up`] in the background so transports start at once
    pub fn spawn_warm_up(&self) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move { server.warm_up().await })
    }

    #[tool(
        name = "list_mailboxes",
        description = "List all mailboxes (folders) in the account"
    )]
    async fn list_mailboxes(&self) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = self
            .driver
            .lock()
            .await
            .list_mailboxes()
            .await
            .map(|data| (format!("{} mailbox(es)", data.len()), data));
        finalize_tool("list_mailboxes", started, result)
    }

    /// Tool: Search one mailbox
    ///
    /// Results are newest first and capped at 50.
    #[tool(
        name = "search_emails",
        description = "Search emails in a folder by sender, recipient, subject, date range, and read state. Returns newest first (max 50)."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match search_criteria(input) {
            Ok(criteria) => self
                .driver
                .lock()
                .await
                .search(&criteria)
                .await
                .map(|data| (format!("{} email(s) found", data.len()), data)),
            Err(e) => Err(e),
        };
        finalize_tool("search_emails", started, result)
    }

    #[tool(
        name = "get_email",
        description = "Get a single email by id, optionally with base64 attachment contents"
    )]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match validate_mailbox(&input.folder) {
            Ok(()) => self
                .driver
                .lock()
                .await
                .get(input.id, &input.folder, input.include_attachments)
                .await
                .map(|email| (format!("Email {} retrieved", email.id), email)),
            Err(e) => Err(e),
        };
        finalize_tool("get_email", started, result)
    }

    #[tool(name = "send_email", description = "Send a new email")]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = self.send_email_impl(input).await;
        finalize_tool("send_email", started, result)
    }

    /// Tool: Reply to the first sender of a message
    #[tool(
        name = "reply_to_email",
        description = "Reply to an email; reply_all also copies the original To and Cc recipients"
    )]
    async fn reply_to_email(
        &self,
        Parameters(input): Parameters<ReplyToEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = self.reply_impl(input).await;
        finalize_tool("reply_to_email", started, result)
    }

    #[tool(
        name = "forward_email",
        description = "Forward an email, including its attachments, with an optional note"
    )]
    async fn forward_email(
        &self,
        Parameters(input): Parameters<ForwardEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = self.forward_impl(input).await;
        finalize_tool("forward_email", started, result)
    }

    #[tool(name = "mark_as_read", description = "Mark emails as read")]
    async fn mark_as_read(
        &self,
        Parameters(input): Parameters<MarkEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match validate_mailbox(&input.folder) {
            Ok(()) => self
                .driver
                .lock()
                .await
                .mark_read(&input.email_ids, &input.folder)
                .await
                .map(|()| status(format!("{} email(s) marked as read", input.email_ids.len()))),
            Err(e) => Err(e),
        };
        finalize_tool("mark_as_read", started, result)
    }

    #[tool(name = "mark_as_unread", description = "Mark emails as unread")]
    async fn mark_as_unread(
        &self,
        Parameters(input): Parameters<MarkEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match validate_mailbox(&input.folder) {
            Ok(()) => self
                .driver
                .lock()
                .await
                .mark_unread(&input.email_ids, &input.folder)
                .await
                .map(|()| status(format!("{} email(s) marked as unread", input.email_ids.len()))),
            Err(e) => Err(e),
        };
        finalize_tool("mark_as_unread", started, result)
    }

    #[tool(name = "move_email", description = "Move an email to another folder")]
    async fn move_email(
        &self,
        Parameters(input): Parameters<MoveEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match validate_mailbox(&input.from_folder)
            .and_then(|()| validate_mailbox(&input.to_folder))
        {
            Ok(()) => self
                .driver
                .lock()
                .await
                .move_message(input.email_id, &input.from_folder, &input.to_folder)
                .await
                .map(|()| {
                    status(format!(
                        "Email {} moved from {} to {}",
                        input.email_id, input.from_folder, input.to_folder
                    ))
                }),
            Err(e) => Err(e),
        };
        finalize_tool("move_email", started, result)
    }

    /// Tool: Delete a message
    ///
    /// `permanent` expunges the folder, which also removes every other
    /// message already flagged deleted there.
    #[tool(
        name = "delete_email",
        description = "Delete an email. permanent=true expunges the folder, which also purges any other messages already flagged as deleted in it."
    )]
    async fn delete_email(
        &self,
        Parameters(input): Parameters<DeleteEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        let started = Instant::now();
        let result = match validate_mailbox(&input.folder) {
            Ok(()) => self
                .driver
                .lock()
                .await
                .delete(input.email_id, &input.folder, input.permanent)
                .await
                .map(|outcome| {
                    if input.permanent {
                        status(format!(
                            "Email {} permanently deleted ({} message(s) expunged)",
                            input.email_id,
                            outcome.expunged.len()
                        ))
                    } else {
                        status(format!("Email {} flagged as deleted", input.email_id))
                    }
                }),
            Err(e) => Err(e),
        };
        finalize_tool("delete_email", started, result)
    }
}

/// MCP server handler implementation
#[tool_handler(router = self.tool_router)]
impl ServerHandler for EmailServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Email MCP server. Read, search and organize mail over IMAP and send, reply and forward over SMTP. Email ids are sequence numbers scoped to the folder they came from; re-search after moves or permanent deletes.",
        )
    }
}

/// Tool implementation methods
///
/// The mailbox lock is released before any SMTP dial.
impl EmailServer {
    async fn send_email_impl(&self, input: SendEmailInput) -> AppResult<(String, String)> {
        validate_recipients(&input.to, "to")?;
        let attachments = input
            .attachments
            .iter()
            .map(decode_attachment)
            .collect::<AppResult<Vec<_>>>()?;
        let recipients = input.to.len() + input.cc.len() + input.bcc.len();

        self.composer
            .send(SendRequest {
                to: input.to,
                cc: input.cc,
                bcc: input.bcc,
                subject: input.subject,
                body: input.body,
                is_html: input.is_html,
                attachments,
            })
            .await?;
        Ok(status(format!("Email sent to {recipients} recipient(s)")))
    }

    async fn reply_impl(&self, input: ReplyToEmailInput) -> AppResult<(String, String)> {
        let draft = self.reply_draft(&input).await?;
        self.composer.deliver(draft).await?;
        Ok(status(format!("Reply to email {} sent", input.email_id)))
    }

    async fn forward_impl(&self, input: ForwardEmailInput) -> AppResult<(String, String)> {
        let draft = self.forward_draft(&input).await?;
        self.composer.deliver(draft).await?;
        Ok(status(format!("Email {} forwarded", input.email_id)))
    }

    /// Fetch the original without attachment bytes and derive the reply
    async fn reply_draft(&self, input: &ReplyToEmailInput) -> AppResult<Draft> {
        validate_mailbox(&input.folder)?;
        let original = self
            .driver
            .lock()
            .await
            .get(input.email_id, &input.folder, false)
            .await?;
        compose::draft_reply(&original, &input.body, input.reply_all, input.is_html)
    }

    /// Fetch the original with attachment bytes so they can be re-attached
    async fn forward_draft(&self, input: &ForwardEmailInput) -> AppResult<Draft> {
        validate_mailbox(&input.folder)?;
        validate_recipients(&input.to, "to")?;
        let original = self
            .driver
            .lock()
            .await
            .get(input.email_id, &input.folder, true)
            .await?;
        Ok(compose::draft_forward(
            &original,
            input.to.clone(),
            input.message.as_deref(),
        ))
    }
}

fn status(message: String) -> (String, String) {
    (message.clone(), message)
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build the tool result from business logic output
///
/// Success wraps `data` in a [`ToolEnvelope`]; failure becomes an error
/// result carrying `"<code>: <message>"` and a `{code, message}` object.
fn finalize_tool<T>(
    tool: &str,
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<CallToolResult, ErrorData>
where
    T: Serialize,
{
    let elapsed = duration_ms(started);
    let content = result.and_then(|(summary, data)| {
        let envelope = ToolEnvelope {
            summary,
            data,
            meta: Meta::now(elapsed),
        };
        Content::json(&envelope)
            .map_err(|e| AppError::Internal(format!("serialization failure: {}", e.message)))
    });
    match content {
        Ok(content) => {
            info!(tool, duration_ms = elapsed, "tool call succeeded");
            Ok(CallToolResult::success(vec![content]))
        }
        Err(e) => {
            warn!(tool, code = e.code(), error = %e, duration_ms = elapsed, "tool call failed");
            Ok(error_result(&e))
        }
    }
}

fn error_result(error: &AppError) -> CallToolResult {
    let mut result =
        CallToolResult::error(vec![Content::text(format!("{}: {error}", error.code()))]);
    result.structured_content = Some(error.to_payload());
    result
}

/// Validate and convert search input into driver criteria
fn search_criteria(input: SearchEmailsInput) -> AppResult<SearchCriteria> {
    for value in [&input.from, &input.to, &input.subject].into_iter().flatten() {
        validate_search_text(value)?;
    }
    if let Some(folder) = &input.folder {
        validate_mailbox(folder)?;
    }
    let since = input
        .since
        .as_deref()
        .map(|v| parse_date_bound(v, "since"))
        .transpose()?;
    let before = input
        .before
        .as_deref()
        .map(|v| parse_date_bound(v, "before"))
        .transpose()?;
    if let (Some(since), Some(before)) = (since, before)
        && since > before
    {
        return Err(AppError::invalid("since must be <= before"));
    }

    Ok(SearchCriteria {
        from: input.from,
        to: input.to,
        subject: input.subject,
        since,
        before,
        unseen: input.unseen,
        seen: input.seen,
        folder: input.folder,
        limit: input.limit,
    })
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date
fn parse_date_bound(input: &str, field: &str) -> AppResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid {field} '{input}', expected RFC 3339 or YYYY-MM-DD"
            ))
        })
}

fn decode_attachment(input: &AttachmentInput) -> AppResult<OutboundAttachment> {
    if input.filename.trim().is_empty() {
        return Err(AppError::invalid("attachment filename must not be empty"));
    }
    validate_no_controls(&input.filename, "attachment filename")?;
    let data = STANDARD.decode(input.data.trim()).map_err(|e| {
        AppError::InvalidInput(format!(
            "attachment '{}' is not valid base64: {e}",
            input.filename
        ))
    })?;
    Ok(OutboundAttachment {
        filename: input.filename.clone(),
        content_type: input.content_type.clone(),
        data,
    })
}

fn validate_recipients(addresses: &[String], field: &str) -> AppResult<()> {
    if addresses.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "{field} must contain at least one address"
        )));
    }
    for addr in addresses {
        validate_no_controls(addr, field)?;
    }
    Ok(())
}

/// Validate mailbox name format
fn validate_mailbox(mailbox: &str) -> AppResult<()> {
    if mailbox.is_empty() || mailbox.len() > MAX_FIELD_CHARS {
        return Err(AppError::InvalidInput(
            "mailbox must be 1..256 characters".to_owned(),
        ));
    }
    validate_no_controls(mailbox, "mailbox")
}

/// Reject IMAP control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate search text field bounds and characters
fn validate_search_text(input: &str) -> AppResult<()> {
    if input.is_empty() || input.len() > MAX_FIELD_CHARS {
        return Err(AppError::InvalidInput(
            "search text fields must be 1..256 chars".to_owned(),
        ));
    }
    validate_no_controls(input, "search text")
}
