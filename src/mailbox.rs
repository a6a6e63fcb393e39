//! Mailbox session driver
//!
//! Owns the single authenticated [`MailStore`] session and sequences its
//! primitives into mailbox operations. Every folder-scoped operation selects
//! its folder first; nothing assumes an earlier select is still current.
//!
//! The driver is not safe for interleaved use. Callers share it behind one
//! `tokio::sync::Mutex` so commands on the session never overlap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::email::{Email, SearchCriteria};
use crate::errors::{AppError, AppResult};
use crate::mime;
use crate::store::{DELETED_FLAG, FlagOperation, MailStore, SEEN_FLAG, StoreConnector};

/// Result of a delete, reporting what an expunge actually removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Sequence numbers as the server reported them, each relative to the
    /// mailbox after the previous removals; empty unless `permanent`
    pub expunged: Vec<u32>,
}

pub struct MailboxDriver {
    connector: Arc<dyn StoreConnector>,
    store: Option<Box<dyn MailStore>>,
}

impl MailboxDriver {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            store: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Establish the session if none exists yet
    pub async fn ensure_connected(&mut self) -> AppResult<()> {
        self.session().await.map(|_| ())
    }

    /// Log out of the current session (errors ignored) and log in afresh
    pub async fn reconnect(&mut self) -> AppResult<()> {
        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.logout().await {
                debug!(error = %e, "ignoring logout failure during reconnect");
            }
        }
        self.store = Some(self.connector.connect().await?);
        info!("mail store session re-established");
        Ok(())
    }

    /// Every visible mailbox, in server order
    pub async fn list_mailboxes(&mut self) -> AppResult<Vec<String>> {
        let store = self.session().await?;
        store
            .list_mailboxes()
            .await
            .map_err(|e| e.context("list mailboxes"))
    }

    /// Search one mailbox, newest first
    ///
    /// Only the highest `effective_limit()` sequence numbers are fetched.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> AppResult<Vec<Email>> {
        let folder = criteria.folder();
        let query = search_query(criteria);
        let store = self.session().await?;
        store
            .select(folder)
            .await
            .map_err(|e| e.context("select mailbox"))?;

        let mut ids = store
            .search(&query)
            .await
            .map_err(|e| e.context("search"))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort_unstable();
        let keep = ids.len().saturating_sub(criteria.effective_limit());
        let ids = ids.split_off(keep);

        let fetched = store
            .fetch(&ids)
            .await
            .map_err(|e| e.context("fetch search results"))?;
        let mut emails: Vec<Email> = fetched.iter().map(|m| mime::decode(m, false)).collect();
        emails.sort_by_key(|e| e.id);
        emails.reverse();
        debug!(folder, matched = ids.len(), returned = emails.len(), "search complete");
        Ok(emails)
    }

    /// Fetch and decode one message
    pub async fn get(
        &mut self,
        id: u32,
        folder: &str,
        include_attachments: bool,
    ) -> AppResult<Email> {
        let store = self.session().await?;
        let status = store
            .select(folder)
            .await
            .map_err(|e| e.context("select mailbox"))?;
        check_ids(&[id], status.exists, folder)?;

        let fetched = store
            .fetch(&[id])
            .await
            .map_err(|e| e.context("fetch message"))?;
        let message = fetched
            .iter()
            .find(|m| m.seq == id)
            .ok_or_else(|| AppError::NotFound(format!("message {id} not found in {folder}")))?;
        debug!(id, uid = ?message.uid, folder, "message fetched");
        Ok(mime::decode(message, include_attachments))
    }

    pub async fn mark_read(&mut self, ids: &[u32], folder: &str) -> AppResult<()> {
        self.set_seen(ids, folder, FlagOperation::Add).await
    }

    pub async fn mark_unread(&mut self, ids: &[u32], folder: &str) -> AppResult<()> {
        self.set_seen(ids, folder, FlagOperation::Remove).await
    }

    /// Move one message between mailboxes
    pub async fn move_message(&mut self, id: u32, from: &str, to: &str) -> AppResult<()> {
        let store = self.session().await?;
        let status = store
            .select(from)
            .await
            .map_err(|e| e.context("select mailbox"))?;
        check_ids(&[id], status.exists, from)?;
        store
            .move_messages(&[id], to)
            .await
            .map_err(|e| e.context("move message"))
    }

    /// Flag a message deleted, expunging the whole mailbox when `permanent`
    ///
    /// The expunge removes every message in `folder` that carries
    /// `\Deleted`, not only `id`.
    pub async fn delete(
        &mut self,
        id: u32,
        folder: &str,
        permanent: bool,
    ) -> AppResult<DeleteOutcome> {
        let store = self.session().await?;
        let status = store
            .select(folder)
            .await
            .map_err(|e| e.context("select mailbox"))?;
        check_ids(&[id], status.exists, folder)?;
        store
            .store_flags(&[id], FlagOperation::Add, &[DELETED_FLAG])
            .await
            .map_err(|e| e.context("flag message deleted"))?;

        if !permanent {
            return Ok(DeleteOutcome::default());
        }
        let expunged = store
            .expunge()
            .await
            .map_err(|e| e.context("expunge mailbox"))?;
        if expunged.len() > 1 {
            warn!(folder, count = expunged.len(), "expunge removed additional deleted messages");
        }
        Ok(DeleteOutcome { expunged })
    }

    async fn set_seen(&mut self, ids: &[u32], folder: &str, op: FlagOperation) -> AppResult<()> {
        if ids.is_empty() {
            return Err(AppError::invalid("at least one email id is required"));
        }
        let store = self.session().await?;
        let status = store
            .select(folder)
            .await
            .map_err(|e| e.context("select mailbox"))?;
        check_ids(ids, status.exists, folder)?;
        store
            .store_flags(ids, op, &[SEEN_FLAG])
            .await
            .map_err(|e| e.context("update seen flag"))
    }

    async fn session(&mut self) -> AppResult<&mut Box<dyn MailStore>> {
        if self.store.is_none() {
            let store = self.connector.connect().await?;
            info!("mail store session established");
            self.store = Some(store);
        }
        self.store
            .as_mut()
            .ok_or_else(|| AppError::Connection("mail store session unavailable".to_owned()))
    }
}

/// Reject ids outside the selected mailbox's `1..=exists` range
///
/// Id 0 is never a valid sequence number. Ids past the end are stale,
/// typically renumbered by an expunge.
fn check_ids(ids: &[u32], exists: u32, folder: &str) -> AppResult<()> {
    if ids.contains(&0) {
        return Err(AppError::invalid("email id 0 is not a valid sequence number"));
    }
    match ids.iter().find(|id| **id > exists) {
        Some(id) => Err(AppError::NotFound(format!(
            "message {id} not found in {folder} ({exists} messages)"
        ))),
        None => Ok(()),
    }
}

/// Translate criteria into an IMAP SEARCH key list
///
/// Text filters become header substring matches, dates use the
/// `d-Mon-yyyy` form and only their date part. Seen and unseen are
/// independent keys; setting both yields an empty result on the server.
/// Non-ASCII text filters prefix the keys with `CHARSET UTF-8`.
pub fn search_query(criteria: &SearchCriteria) -> String {
    let mut keys = Vec::new();
    if let Some(from) = &criteria.from {
        keys.push(format!("FROM {}", quote(from)));
    }
    if let Some(to) = &criteria.to {
        keys.push(format!("TO {}", quote(to)));
    }
    if let Some(subject) = &criteria.subject {
        keys.push(format!("SUBJECT {}", quote(subject)));
    }
    if let Some(since) = criteria.since {
        keys.push(format!("SINCE {}", imap_date(since)));
    }
    if let Some(before) = criteria.before {
        keys.push(format!("BEFORE {}", imap_date(before)));
    }
    if criteria.unseen {
        keys.push("UNSEEN".to_owned());
    }
    if criteria.seen {
        keys.push("SEEN".to_owned());
    }
    if keys.is_empty() {
        return "ALL".to_owned();
    }
    let query = keys.join(" ");
    if query.is_ascii() {
        query
    } else {
        format!("CHARSET UTF-8 {query}")
    }
}

/// IMAP quoted string with backslash and quote escaped
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn imap_date(value: DateTime<Utc>) -> String {
    value.format("%-d-%b-%Y").to_string()
}
