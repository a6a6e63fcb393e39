//! SMTP delivery of composed drafts
//!
//! Each call dials a fresh relay connection; nothing is pooled between
//! calls.

use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::compose::{self, Draft};
use crate::config::SmtpConfig;
use crate::email::SendRequest;
use crate::errors::{AppError, AppResult};

/// Port on which relays expect TLS from the first byte
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone)]
pub struct Composer {
    config: SmtpConfig,
    timeout: Duration,
}

impl Composer {
    pub fn new(config: SmtpConfig, timeout_ms: u64) -> Self {
        Self {
            config,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub async fn send(&self, request: SendRequest) -> AppResult<()> {
        self.deliver(compose::draft_send(request)).await
    }

    /// Render `draft` and hand it to a freshly dialed relay
    pub async fn deliver(&self, draft: Draft) -> AppResult<()> {
        let recipients = draft.to.len() + draft.cc.len() + draft.bcc.len();
        let message = draft.into_message(&self.config.username)?;
        let transport = self.transport()?;
        let response = transport
            .send(message)
            .await
            .map_err(|e| AppError::Delivery(format!("relay {}: {e}", self.config.host)))?;
        info!(
            host = %self.config.host,
            recipients,
            code = %response.code(),
            "message accepted by relay"
        );
        Ok(())
    }

    /// Transport for the configured TLS policy
    ///
    /// Port 465 uses implicit TLS, other ports require STARTTLS, and with
    /// TLS disabled no upgrade is attempted at all.
    fn transport(&self) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let host = self.config.host.as_str();
        let builder = if !self.config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        } else if self.config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| AppError::Delivery(format!("invalid SMTP host '{host}': {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| AppError::Delivery(format!("invalid SMTP host '{host}': {e}")))?
        };

        let mut builder = builder.port(self.config.port).timeout(Some(self.timeout));
        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_owned(),
            ));
        }
        Ok(builder.build())
    }
}
