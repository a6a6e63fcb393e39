//! IMAP transport and session primitives
//!
//! Implements [`MailStore`] on top of `async-imap`. Every network call is
//! bounded by the timeouts from server config. Connections use implicit TLS
//! (rustls + webpki roots) unless `IMAP_TLS=false`, in which case the
//! session stays on plain TCP.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::imap_proto::types::Address;
use async_imap::types::{Fetch, Flag};
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::store::{
    DELETED_FLAG, EnvelopeData, FETCH_ITEMS, FetchedMessage, FlagOperation, MailStore,
    MailboxStatus, StoreConnector, sequence_set,
};

/// Byte stream under an IMAP session, plain or TLS-wrapped
#[derive(Debug)]
pub enum ImapStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Authenticated IMAP session over either stream kind
pub type ImapSession = Session<ImapStream>;

/// Connect to the IMAP server and authenticate
///
/// Performs the full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates (when TLS is enabled)
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
///
/// # Errors
///
/// - `InvalidInput` if the hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if LOGIN is rejected
/// - `Connection` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(config: &ServerConfig) -> AppResult<ImapSession> {
    let imap = &config.imap;
    let connect_duration = Duration::from_millis(config.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(config.greeting_timeout_ms);

    let tcp = timeout(
        connect_duration,
        TcpStream::connect((imap.host.as_str(), imap.port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Connection(format!("tcp connect failed: {e}"))))?;

    let stream = if imap.tls {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(imap.host.clone())
            .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
        let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
            .await
            .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Connection(format!("TLS handshake failed: {e}")))
            })?;
        ImapStream::Tls(Box::new(tls_stream))
    } else {
        ImapStream::Plain(tcp)
    };

    let mut client = Client::new(stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|e| AppError::Connection(format!("IMAP greeting failed: {e}")))
        })?;

    if greeting.is_none() {
        return Err(AppError::Connection(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let password = imap.password.expose_secret();
    let session = timeout(
        greeting_duration,
        client.login(imap.username.as_str(), password),
    )
    .await
    .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
    .and_then(|r| r.map_err(|(e, _)| AppError::AuthFailed(e.to_string())))?;

    info!(host = %imap.host, port = imap.port, tls = imap.tls, "IMAP session established");
    Ok(session)
}

/// [`MailStore`] backed by a live `async-imap` session
pub struct ImapStore {
    session: ImapSession,
    socket_timeout: Duration,
}

impl ImapStore {
    pub fn new(session: ImapSession, config: &ServerConfig) -> Self {
        Self {
            session,
            socket_timeout: Duration::from_millis(config.socket_timeout_ms),
        }
    }

    async fn supports_move(&mut self) -> AppResult<bool> {
        let caps = timeout(self.socket_timeout, self.session.capabilities())
            .await
            .map_err(|_| AppError::Timeout("CAPABILITY timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("CAPABILITY failed: {e}"))))?;
        Ok(caps.has_str("MOVE"))
    }

    async fn copy(&mut self, set: &str, mailbox: &str) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.copy(set, mailbox))
            .await
            .map_err(|_| AppError::Timeout("COPY timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("COPY failed: {e}"))))
    }
}

#[async_trait]
impl MailStore for ImapStore {
    async fn list_mailboxes(&mut self) -> AppResult<Vec<String>> {
        let timeout_duration = self.socket_timeout;
        let stream = timeout(timeout_duration, self.session.list(Some(""), Some("*")))
            .await
            .map_err(|_| AppError::Timeout("LIST timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("LIST failed: {e}"))))?;

        let names = timeout(timeout_duration, stream.try_collect::<Vec<_>>())
            .await
            .map_err(|_| AppError::Timeout("LIST stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Connection(format!("LIST stream failed: {e}")))
            })?;

        Ok(names
            .iter()
            .map(|name| utf7_imap::decode_utf7_imap(name.name().to_owned()))
            .collect())
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
        debug!(mailbox, "SELECT");
        let selected = timeout(self.socket_timeout, self.session.select(&encoded))
            .await
            .map_err(|_| AppError::Timeout(format!("SELECT timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| AppError::Protocol(format!("cannot select mailbox '{mailbox}': {e}")))
            })?;
        Ok(MailboxStatus {
            exists: selected.exists,
        })
    }

    async fn search(&mut self, query: &str) -> AppResult<Vec<u32>> {
        debug!(query, "SEARCH");
        let set = timeout(self.socket_timeout, self.session.search(query))
            .await
            .map_err(|_| AppError::Timeout("SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("search failed: {e}"))))?;
        let mut ids: Vec<u32> = set.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch(&mut self, ids: &[u32]) -> AppResult<Vec<FetchedMessage>> {
        let timeout_duration = self.socket_timeout;
        let set = sequence_set(ids);
        debug!(set = %set, "FETCH");
        let stream = timeout(timeout_duration, self.session.fetch(&set, FETCH_ITEMS))
            .await
            .map_err(|_| AppError::Timeout("FETCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("fetch failed: {e}"))))?;
        let fetches: Vec<Fetch> = timeout(timeout_duration, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("FETCH stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("fetch stream failed: {e}"))))?;

        Ok(fetches.iter().map(to_fetched_message).collect())
    }

    async fn store_flags(
        &mut self,
        ids: &[u32],
        operation: FlagOperation,
        flags: &[&str],
    ) -> AppResult<()> {
        let timeout_duration = self.socket_timeout;
        let set = sequence_set(ids);
        let query = format!("{} ({})", operation.store_item(), flags.join(" "));
        debug!(set = %set, query = %query, "STORE");
        let stream = timeout(timeout_duration, self.session.store(&set, &query))
            .await
            .map_err(|_| AppError::Timeout("STORE timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("store failed: {e}"))))?;
        let _: Vec<Fetch> = timeout(timeout_duration, stream.try_collect())
            .await
            .map_err(|_| AppError::Timeout("STORE stream timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("store stream failed: {e}"))))?;
        Ok(())
    }

    /// Uses `MOVE` (RFC 6851) when advertised, otherwise copy + delete +
    /// expunge. The fallback expunge also purges any other message already
    /// flagged `\Deleted` in the source mailbox.
    async fn move_messages(&mut self, ids: &[u32], mailbox: &str) -> AppResult<()> {
        let set = sequence_set(ids);
        let encoded = utf7_imap::encode_utf7_imap(mailbox.to_owned());
        if self.supports_move().await? {
            debug!(set = %set, mailbox, "MOVE");
            return timeout(self.socket_timeout, self.session.mv(&set, &encoded))
                .await
                .map_err(|_| AppError::Timeout("MOVE timed out".to_owned()))
                .and_then(|r| r.map_err(|e| AppError::Protocol(format!("MOVE failed: {e}"))));
        }

        debug!(set = %set, mailbox, "COPY + EXPUNGE fallback");
        self.copy(&set, &encoded).await?;
        self.store_flags(ids, FlagOperation::Add, &[DELETED_FLAG])
            .await?;
        self.expunge().await?;
        Ok(())
    }

    async fn expunge(&mut self) -> AppResult<Vec<u32>> {
        let timeout_duration = self.socket_timeout;
        let stream = timeout(timeout_duration, self.session.expunge())
            .await
            .map_err(|_| AppError::Timeout("EXPUNGE timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Protocol(format!("EXPUNGE failed: {e}"))))?;
        timeout(timeout_duration, stream.try_collect::<Vec<u32>>())
            .await
            .map_err(|_| AppError::Timeout("EXPUNGE stream timed out".to_owned()))
            .and_then(|r| {
                r.map_err(|e| AppError::Protocol(format!("EXPUNGE stream failed: {e}")))
            })
    }

    async fn logout(&mut self) -> AppResult<()> {
        timeout(self.socket_timeout, self.session.logout())
            .await
            .map_err(|_| AppError::Timeout("LOGOUT timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Connection(format!("LOGOUT failed: {e}"))))
    }
}

/// Opens fresh [`ImapStore`] sessions from server config
pub struct ImapConnector {
    config: Arc<ServerConfig>,
}

impl ImapConnector {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for ImapConnector {
    async fn connect(&self) -> AppResult<Box<dyn MailStore>> {
        let session = connect_authenticated(&self.config).await?;
        Ok(Box::new(ImapStore::new(session, &self.config)))
    }
}

/// Convert an `async-imap` fetch response into the store-neutral shape
fn to_fetched_message(fetch: &Fetch) -> FetchedMessage {
    FetchedMessage {
        seq: fetch.message,
        uid: fetch.uid,
        size: fetch.size,
        flags: fetch.flags().map(|flag| flag_token(&flag)).collect(),
        envelope: fetch.envelope().map(|env| EnvelopeData {
            date: env.date.as_deref().map(lossy),
            subject: env.subject.as_deref().map(lossy),
            message_id: env.message_id.as_deref().map(lossy),
            from: addresses(env.from.as_deref()),
            to: addresses(env.to.as_deref()),
            cc: addresses(env.cc.as_deref()),
            bcc: addresses(env.bcc.as_deref()),
        }),
        body: fetch.body().map(<[u8]>::to_vec),
    }
}

/// Render a flag as its protocol token
fn flag_token(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_owned(),
        Flag::Answered => "\\Answered".to_owned(),
        Flag::Flagged => "\\Flagged".to_owned(),
        Flag::Deleted => "\\Deleted".to_owned(),
        Flag::Draft => "\\Draft".to_owned(),
        Flag::Recent => "\\Recent".to_owned(),
        Flag::MayCreate => "\\*".to_owned(),
        Flag::Custom(c) => c.to_string(),
    }
}

/// Envelope addresses as `mailbox@host`, skipping group markers
fn addresses(list: Option<&[Address<'_>]>) -> Vec<String> {
    list.unwrap_or_default()
        .iter()
        .filter_map(|addr| {
            let mailbox = addr.mailbox.as_deref().map(lossy)?;
            let host = addr.host.as_deref().map(lossy)?;
            Some(format!("{mailbox}@{host}"))
        })
        .collect()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use async_imap::imap_proto::types::Address;
    use async_imap::types::Flag;

    use super::{addresses, flag_token};

    fn address(mailbox: Option<&'static str>, host: Option<&'static str>) -> Address<'static> {
        Address {
            name: None,
            adl: None,
            mailbox: mailbox.map(|m| Cow::Borrowed(m.as_bytes())),
            host: host.map(|h| Cow::Borrowed(h.as_bytes())),
        }
    }

    #[test]
    fn flags_render_as_protocol_tokens() {
        assert_eq!(flag_token(&Flag::Seen), "\\Seen");
        assert_eq!(flag_token(&Flag::Deleted), "\\Deleted");
        assert_eq!(flag_token(&Flag::Custom(Cow::Borrowed("$Label1"))), "$Label1");
    }

    #[test]
    fn addresses_skip_group_markers() {
        let list = vec![
            address(Some("team"), None),
            address(Some("alice"), Some("example.com")),
            address(None, None),
            address(Some("bob"), Some("example.org")),
        ];
        assert_eq!(
            addresses(Some(&list)),
            vec!["alice@example.com", "bob@example.org"]
        );
        assert!(addresses(None).is_empty());
    }
}
