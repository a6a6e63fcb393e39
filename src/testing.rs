//! In-memory mail store for driver and tool tests
//!
//! Keeps per-mailbox message lists, numbers them by position (sequence
//! number = index + 1) and records every command it receives.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::errors::{AppError, AppResult};
use crate::store::{
    DELETED_FLAG, FetchedMessage, FlagOperation, MailStore, MailboxStatus, StoreConnector,
};

/// Command as seen by the fake store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Select(String),
    Search(String),
    Fetch(Vec<u32>),
    Store {
        ids: Vec<u32>,
        operation: FlagOperation,
        flags: Vec<String>,
    },
    Move {
        ids: Vec<u32>,
        mailbox: String,
    },
    Expunge,
    Logout,
}

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub raw: Vec<u8>,
    pub flags: BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub mailboxes: BTreeMap<String, Vec<FakeMessage>>,
    pub selected: Option<String>,
    pub commands: Vec<Command>,
    /// Scripted SEARCH answer; `None` returns every sequence number
    pub search_results: Option<Vec<u32>>,
    /// FETCH answers with no messages, as after a concurrent expunge
    pub empty_fetch: bool,
    pub connects: usize,
    pub fail_connect: bool,
}

/// Shared handle; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to `mailbox`, creating the mailbox if needed
    pub fn with_message(self, mailbox: &str, raw: &[u8], flags: &[&str]) -> Self {
        self.state()
            .mailboxes
            .entry(mailbox.to_owned())
            .or_default()
            .push(FakeMessage {
                raw: raw.to_vec(),
                flags: flags.iter().map(|f| (*f).to_owned()).collect(),
            });
        self
    }

    pub fn with_mailbox(self, mailbox: &str) -> Self {
        self.state().mailboxes.entry(mailbox.to_owned()).or_default();
        self
    }

    pub fn with_search_results(self, ids: Vec<u32>) -> Self {
        self.state().search_results = Some(ids);
        self
    }

    pub fn failing_connect(self) -> Self {
        self.state().fail_connect = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    /// Flags of every message in `mailbox`, in sequence order
    pub fn flags_in(&self, mailbox: &str) -> Vec<BTreeSet<String>> {
        self.state()
            .mailboxes
            .get(mailbox)
            .map(|msgs| msgs.iter().map(|m| m.flags.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, mailbox: &str) -> usize {
        self.state().mailboxes.get(mailbox).map_or(0, Vec::len)
    }

    pub fn connector(&self) -> Arc<dyn StoreConnector> {
        Arc::new(FakeConnector {
            store: self.clone(),
        })
    }
}

fn selected_messages(state: &mut FakeState) -> AppResult<&mut Vec<FakeMessage>> {
    let name = state
        .selected
        .clone()
        .ok_or_else(|| AppError::Protocol("no mailbox selected".to_owned()))?;
    state
        .mailboxes
        .get_mut(&name)
        .ok_or_else(|| AppError::Protocol(format!("mailbox {name} vanished")))
}

#[async_trait]
impl MailStore for FakeStore {
    async fn list_mailboxes(&mut self) -> AppResult<Vec<String>> {
        let mut state = self.state();
        state.commands.push(Command::List);
        Ok(state.mailboxes.keys().cloned().collect())
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        let mut state = self.state();
        state.commands.push(Command::Select(mailbox.to_owned()));
        let exists = state
            .mailboxes
            .get(mailbox)
            .map(Vec::len)
            .ok_or_else(|| AppError::Protocol(format!("NO mailbox {mailbox} does not exist")))?;
        state.selected = Some(mailbox.to_owned());
        Ok(MailboxStatus {
            exists: u32::try_from(exists).unwrap_or(u32::MAX),
        })
    }

    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        let mut state = self.state();
        state.commands.push(Command::Search(query.to_owned()));
        if let Some(ids) = state.search_results.clone() {
            return Ok(ids);
        }
        let count = selected_messages(&mut state)?.len();
        Ok((1..=u32::try_from(count).unwrap_or(u32::MAX)).collect())
    }

    async fn fetch(&mut self, ids: &[u32]) -> AppResult<Vec<FetchedMessage>> {
        let mut state = self.state();
        state.commands.push(Command::Fetch(ids.to_vec()));
        if state.empty_fetch {
            return Ok(Vec::new());
        }
        let messages = selected_messages(&mut state)?;
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        Ok(sorted
            .into_iter()
            .filter_map(|seq| {
                let msg = messages.get(seq.checked_sub(1)? as usize)?;
                Some(FetchedMessage {
                    seq,
                    uid: Some(1000 + seq),
                    size: u32::try_from(msg.raw.len()).ok(),
                    flags: msg.flags.iter().cloned().collect(),
                    envelope: None,
                    body: Some(msg.raw.clone()),
                })
            })
            .collect())
    }

    async fn store_flags(
        &mut self,
        ids: &[u32],
        operation: FlagOperation,
        flags: &[&str],
    ) -> AppResult<()> {
        let mut state = self.state();
        state.commands.push(Command::Store {
            ids: ids.to_vec(),
            operation,
            flags: flags.iter().map(|f| (*f).to_owned()).collect(),
        });
        let messages = selected_messages(&mut state)?;
        for id in ids {
            let Some(msg) = id
                .checked_sub(1)
                .and_then(|idx| messages.get_mut(idx as usize))
            else {
                continue;
            };
            for flag in flags {
                match operation {
                    FlagOperation::Add => {
                        msg.flags.insert((*flag).to_owned());
                    }
                    FlagOperation::Remove => {
                        msg.flags.remove(*flag);
                    }
                }
            }
        }
        Ok(())
    }

    async fn move_messages(&mut self, ids: &[u32], mailbox: &str) -> AppResult<()> {
        let mut state = self.state();
        state.commands.push(Command::Move {
            ids: ids.to_vec(),
            mailbox: mailbox.to_owned(),
        });
        if !state.mailboxes.contains_key(mailbox) {
            return Err(AppError::Protocol(format!(
                "NO [TRYCREATE] mailbox {mailbox} does not exist"
            )));
        }
        let messages = selected_messages(&mut state)?;
        let mut indexes: Vec<usize> = ids
            .iter()
            .filter_map(|id| id.checked_sub(1).map(|i| i as usize))
            .filter(|i| *i < messages.len())
            .collect();
        indexes.sort_unstable();
        indexes.dedup();
        let mut moved = Vec::new();
        for idx in indexes.into_iter().rev() {
            moved.push(messages.remove(idx));
        }
        moved.reverse();
        state
            .mailboxes
            .entry(mailbox.to_owned())
            .or_default()
            .extend(moved);
        Ok(())
    }

    async fn expunge(&mut self) -> AppResult<Vec<u32>> {
        let mut state = self.state();
        state.commands.push(Command::Expunge);
        let messages = selected_messages(&mut state)?;
        // Each EXPUNGE response carries the sequence number at the time of
        // that removal, so later numbers shift down.
        let mut expunged = Vec::new();
        let mut seq = 0u32;
        messages.retain(|msg| {
            seq += 1;
            let deleted = msg.flags.contains(DELETED_FLAG);
            if deleted {
                let removed = u32::try_from(expunged.len()).unwrap_or(u32::MAX);
                expunged.push(seq - removed);
            }
            !deleted
        });
        Ok(expunged)
    }

    async fn logout(&mut self) -> AppResult<()> {
        let mut state = self.state();
        state.commands.push(Command::Logout);
        state.selected = None;
        Ok(())
    }
}

/// Connector handing out handles to one shared [`FakeStore`]
pub struct FakeConnector {
    store: FakeStore,
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(&self) -> AppResult<Box<dyn MailStore>> {
        let mut state = self.store.state();
        if state.fail_connect {
            return Err(AppError::Connection("connection refused".to_owned()));
        }
        state.connects += 1;
        drop(state);
        Ok(Box::new(self.store.clone()))
    }
}

/// Minimal RFC 5322 message with a plain-text body
pub fn plain_message(from: &str, to: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMessage-ID: <{subject}@example.com>\r\nDate: Wed, 1 Jan 2025 10:30:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
    )
    .into_bytes()
}

/// Multipart message with a text body and one PDF attachment
pub fn message_with_attachment(from: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\nMessage-ID: <{subject}@example.com>\r\nMIME-Version: 1.0\r\nContent-Type: multipart/mixed; boundary=\"b1\"\r\n\r\n--b1\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nsee attached\r\n--b1\r\nContent-Type: application/pdf; name=\"report.pdf\"\r\nContent-Disposition: attachment; filename=\"report.pdf\"\r\nContent-Transfer-Encoding: base64\r\n\r\nJVBERi0xLjQ=\r\n--b1--\r\n"
    )
    .into_bytes()
}
