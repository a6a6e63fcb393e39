//! Mail store session seam
//!
//! `MailStore` is the narrow set of stateful protocol primitives the mailbox
//! driver sequences. The production implementation lives in [`crate::imap`];
//! tests substitute an in-memory store that records every command.

use async_trait::async_trait;

use crate::errors::AppResult;

/// Fetch item set used for both search results and single-message reads
///
/// `BODY.PEEK[]` returns the full literal without setting `\Seen`.
pub const FETCH_ITEMS: &str = "(ENVELOPE FLAGS UID RFC822.SIZE BODY.PEEK[])";

/// Flag token for read state
pub const SEEN_FLAG: &str = "\\Seen";
/// Flag token marking a message for expunge
pub const DELETED_FLAG: &str = "\\Deleted";

/// State reported by a mailbox select
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// Number of messages; valid sequence numbers are `1..=exists`
    pub exists: u32,
}

/// Whether a flag store adds or removes flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOperation {
    Add,
    Remove,
}

impl FlagOperation {
    /// IMAP STORE data item name (silent, no untagged FETCH echo)
    pub fn store_item(self) -> &'static str {
        match self {
            Self::Add => "+FLAGS.SILENT",
            Self::Remove => "-FLAGS.SILENT",
        }
    }
}

/// Envelope fields as delivered by the store, still undecoded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeData {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

/// One fetched message: metadata plus the raw RFC 5322 literal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedMessage {
    /// Sequence number in the selected mailbox
    pub seq: u32,
    pub uid: Option<u32>,
    pub size: Option<u32>,
    /// Flags as protocol tokens (`\Seen`, `$Label`)
    pub flags: Vec<String>,
    pub envelope: Option<EnvelopeData>,
    pub body: Option<Vec<u8>>,
}

/// Stateful session primitives
///
/// Every folder-scoped call assumes the caller has just issued `select` on
/// the right mailbox. Streamed responses are fully drained, including their
/// terminal status, before a method returns.
#[async_trait]
pub trait MailStore: Send {
    /// Wildcard LIST of every visible mailbox, names decoded
    async fn list_mailboxes(&mut self) -> AppResult<Vec<String>>;

    /// SELECT a mailbox read-write
    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus>;

    /// SEARCH in the selected mailbox, returning sequence numbers
    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>>;

    /// FETCH [`FETCH_ITEMS`] for the given sequence numbers
    async fn fetch(&mut self, ids: &[u32]) -> AppResult<Vec<FetchedMessage>>;

    /// One batched STORE of `flags` across all `ids`
    async fn store_flags(
        &mut self,
        ids: &[u32],
        operation: FlagOperation,
        flags: &[&str],
    ) -> AppResult<()>;

    /// Move messages to another mailbox by whatever means the server offers
    async fn move_messages(&mut self, ids: &[u32], mailbox: &str) -> AppResult<()>;

    /// EXPUNGE the selected mailbox, returning expunged sequence numbers
    async fn expunge(&mut self) -> AppResult<Vec<u32>>;

    /// LOGOUT and drop the connection
    async fn logout(&mut self) -> AppResult<()>;
}

/// Opens authenticated [`MailStore`] sessions
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> AppResult<Box<dyn MailStore>>;
}

/// Render ids as an IMAP sequence set, collapsing consecutive runs
///
/// `[1, 2, 3, 7, 9, 10]` becomes `1:3,7,9:10`. Input order is irrelevant.
pub fn sequence_set(ids: &[u32]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut end) = (first, first);
    for id in iter {
        if id == end + 1 {
            end = id;
            continue;
        }
        parts.push(format_range(start, end));
        start = id;
        end = id;
    }
    parts.push(format_range(start, end));
    parts.join(",")
}

fn format_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}
