//! Email transport: IMAP polling for requests, SMTP via lettre for replies.
//!
//! Fetch claims request mails by flagging them `\Deleted` and expunging once
//! per batch; other unseen mails are flagged `\Seen` and left alone. Both
//! directions use blocking sockets, so they run on `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::email_types::{
    DEFAULT_REQUEST_PREFIX, is_request_subject, parse_request_body, subject_request_id,
};
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::{Request, RequestTransport, local_request_id};
use crate::web::strip_html;

const CHANNEL_NAME: &str = "email";

/// IMAP socket read timeout.
const IMAP_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Where replies and digests are delivered.
    pub status_recipient: String,
    /// Subject prefix of request mails.
    pub request_prefix: String,
}

impl EmailConfig {
    /// Build config from environment variables. `EMAIL_IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let imap_host =
            var("EMAIL_IMAP_HOST").ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let imap_port: u16 = var("EMAIL_IMAP_PORT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(993);

        let smtp_host = var("EMAIL_SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = var("EMAIL_SMTP_PORT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(587);

        let username = var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = var("EMAIL_FROM_ADDRESS").unwrap_or_else(|| username.clone());
        let status_recipient = var("EMAIL_STATUS_RECIPIENT").unwrap_or_else(|| from_address.clone());
        let request_prefix =
            var("EMAIL_REQUEST_PREFIX").unwrap_or_else(|| DEFAULT_REQUEST_PREFIX.to_string());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            status_recipient,
            request_prefix,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Mailbox transport: IMAP (inbound) + SMTP (outbound).
pub struct EmailTransport {
    config: Arc<EmailConfig>,
}

impl EmailTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl RequestTransport for EmailTransport {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn fetch_requests(&self) -> Result<Vec<Request>, ChannelError> {
        let config = Arc::clone(&self.config);
        let requests = tokio::task::spawn_blocking(move || fetch_requests_imap(&config))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task failed: {e}")))??;
        if !requests.is_empty() {
            info!(count = requests.len(), "Fetched request mails");
        }
        Ok(requests)
    }

    async fn send(
        &self,
        origin_id: Option<&str>,
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError> {
        debug!(origin = origin_id.unwrap_or("-"), subject, "Sending mail");
        let config = Arc::clone(&self.config);
        let subject = subject.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || send_email(&config, &subject, &body))
            .await
            .map_err(|e| send_failed(format!("SMTP task failed: {e}")))?
    }
}

fn fetch_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: CHANNEL_NAME.into(),
        reason: reason.into(),
    }
}

fn send_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL_NAME.into(),
        reason: reason.into(),
    }
}

/// Send one mail to the status recipient via SMTP with STARTTLS (blocking).
fn send_email(config: &EmailConfig, subject: &str, body: &str) -> Result<(), ChannelError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::starttls_relay(&config.smtp_host)
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| ChannelError::InvalidMessage(format!("Invalid from address: {e}")))?,
        )
        .to(config
            .status_recipient
            .parse()
            .map_err(|e| ChannelError::InvalidMessage(format!("Invalid to address: {e}")))?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| ChannelError::InvalidMessage(format!("Failed to build email: {e}")))?;

    transport
        .send(&email)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;

    info!(subject, to = %config.status_recipient, "Mail sent");
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Minimal tagged IMAP session over TLS.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn connect(host: &str, port: u16) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(IMAP_READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a command and collect response lines through the tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.tls.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.tls.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }
}

fn status_ok(lines: &[String]) -> bool {
    lines
        .last()
        .and_then(|l| l.split_whitespace().nth(1))
        .is_some_and(|status| status.eq_ignore_ascii_case("OK"))
}

/// Quote a string for an IMAP command.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Message sequence numbers from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2).map(str::to_string))
        .collect()
}

/// Raw message text between the FETCH header line and its closing lines.
fn fetched_message(lines: &[String]) -> String {
    lines
        .iter()
        .skip(1)
        .take(lines.len().saturating_sub(3))
        .cloned()
        .collect()
}

/// Readable text of a parsed mail: plain part preferred, HTML stripped.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Fetch, parse and claim request mails (blocking).
fn fetch_requests_imap(config: &EmailConfig) -> Result<Vec<Request>, ChannelError> {
    let mut session =
        ImapSession::connect(&config.imap_host, config.imap_port).map_err(|e| fetch_failed(e.to_string()))?;
    let imap = |e: ImapError| fetch_failed(e.to_string());

    let login = session
        .command(&format!(
            "LOGIN {} {}",
            quoted(&config.username),
            quoted(config.password.expose_secret())
        ))
        .map_err(imap)?;
    if !status_ok(&login) {
        return Err(ChannelError::AuthFailed {
            name: CHANNEL_NAME.into(),
            reason: "IMAP login rejected".into(),
        });
    }

    let select = session.command("SELECT \"INBOX\"").map_err(imap)?;
    if !status_ok(&select) {
        return Err(fetch_failed("SELECT INBOX failed"));
    }

    let search = session
        .command(&format!("SEARCH UNSEEN SUBJECT {}", quoted(&config.request_prefix)))
        .map_err(imap)?;

    let mut requests = Vec::new();
    for seq in parse_search(&search) {
        let fetch = session.command(&format!("FETCH {seq} RFC822")).map_err(imap)?;
        let raw = fetched_message(&fetch);
        let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) else {
            warn!(seq = %seq, "Unparseable mail, marking seen");
            let _ = session.command(&format!("STORE {seq} +FLAGS (\\Seen)"));
            continue;
        };

        let subject = parsed.subject().unwrap_or_default().to_string();
        if !is_request_subject(&subject, &config.request_prefix) {
            debug!(seq = %seq, subject = %subject, "Not a request mail, marking seen");
            let _ = session.command(&format!("STORE {seq} +FLAGS (\\Seen)"));
            continue;
        }

        let mut fallback_id = subject_request_id(&subject);
        if fallback_id.is_empty() {
            fallback_id = local_request_id(Utc::now());
        }
        let request = parse_request_body(&extract_text(&parsed), &fallback_id, &seq);
        debug!(seq = %seq, id = %request.id, "Parsed request mail");
        requests.push(request);

        let _ = session.command(&format!("STORE {seq} +FLAGS (\\Deleted)"));
    }

    if !requests.is_empty()
        && let Err(e) = session.command("EXPUNGE")
    {
        warn!(error = %e, "EXPUNGE failed; claimed mails may reappear");
    }

    let _ = session.command("LOGOUT");
    Ok(requests)
}

// ── Tests ───────────────────────────────────────────────────────────
