use crate::config::{Mailbox, SmtpConfig, SmtpSecurity};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsConnector};
use tracing::{debug, trace};

/// One complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

#[derive(Debug, Error)]
pub enum SMTPClientError {
    #[error("invalid TLS server name {0:?}")]
    InvalidDomain(String),
    #[error("TLS setup failed: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    ConnectionClosed,
    #[error("malformed server reply {0:?}")]
    InvalidBuffer(String),
    #[error("server greeting rejected: {0}")]
    GreetingFailed(Reply),
    #[error("EHLO rejected: {0}")]
    HELOFailed(Reply),
    #[error("STARTTLS rejected: {0}")]
    StartTlsFailed(Reply),
    #[error("authentication rejected: {0}")]
    AUTHFailed(Reply),
    #[error("message rejected: {0}")]
    SendEmailFailed(Reply),
}

/// A single-part plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: Mailbox,
    pub to: Mailbox,
    pub reply_to: Mailbox,
    pub subject: String,
    pub body: String,
}

impl Email {
    /// Headers and a base64 body wrapped at 76 columns, joined with CRLF and
    /// ready for DATA (before dot-stuffing).
    pub fn render(&self, date: DateTime<Utc>) -> String {
        let mut content = String::new();
        for (name, value) in [
            ("From", mailbox_header(&self.from)),
            ("To", mailbox_header(&self.to)),
            ("Reply-To", mailbox_header(&self.reply_to)),
            ("Subject", encode_word(&self.subject)),
            ("Date", date.to_rfc2822()),
            ("MIME-Version", "1.0".to_string()),
            ("Content-Type", "text/plain; charset=utf-8".to_string()),
            ("Content-Transfer-Encoding", "base64".to_string()),
        ] {
            content.push_str(&format!("{name}: {value}\r\n"));
        }
        content.push_str("\r\n");
        let body = self.body.replace("\r\n", "\n").replace('\n', "\r\n");
        content.push_str(&encode_body(&body));
        content
    }
}

const BODY_LINE_WIDTH: usize = 76;

fn encode_body(body: &str) -> String {
    let encoded = BASE64_STANDARD.encode(body.as_bytes());
    encoded
        .as_bytes()
        .chunks(BODY_LINE_WIDTH)
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for values that are not plain ASCII.
fn encode_word(value: &str) -> String {
    let value = header_safe(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?utf-8?B?{}?=", BASE64_STANDARD.encode(value.as_bytes()))
    }
}

fn mailbox_header(mailbox: &Mailbox) -> String {
    let name = encode_word(&mailbox.name);
    let address = header_safe(&mailbox.address);
    if name.trim().is_empty() {
        format!("<{address}>")
    } else {
        format!("{name} <{address}>")
    }
}

/// Escapes lines that start with a dot.
fn dot_stuff(content: &str) -> String {
    content
        .split("\r\n")
        .map(|line| {
            if line.starts_with('.') {
                format!(".{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

pub struct SMTPClient<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    buffer: String,
}

impl<S> SMTPClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> SMTPClient<S> {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            buffer: String::new(),
        }
    }

    /// Hands the stream back, e.g. to wrap it in TLS after STARTTLS.
    pub fn into_inner(self) -> S {
        self.reader.into_inner().unsplit(self.writer.into_inner())
    }

    async fn recv(&mut self) -> Result<Reply, SMTPClientError> {
        let mut text = Vec::new();
        loop {
            self.buffer.clear();
            if self.reader.read_line(&mut self.buffer).await? == 0 {
                return Err(SMTPClientError::ConnectionClosed);
            }
            let line = self.buffer.trim_end();
            trace!("S: {line}");
            let code = line
                .get(..3)
                .and_then(|code| code.parse::<u16>().ok())
                .ok_or_else(|| SMTPClientError::InvalidBuffer(line.to_string()))?;
            text.push(line.get(4..).unwrap_or_default().to_string());
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(Reply {
                    code,
                    text: text.join("\n"),
                });
            }
        }
    }

    async fn write_line(&mut self, data: &[u8]) -> Result<(), SMTPClientError> {
        self.writer.write_all(data).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn send_cmd(&mut self, data: &str) -> Result<Reply, SMTPClientError> {
        trace!("C: {data}");
        self.write_line(data.as_bytes()).await?;
        self.recv().await
    }

    async fn send_secret(&mut self, data: &str) -> Result<Reply, SMTPClientError> {
        trace!("C: <credentials>");
        self.write_line(data.as_bytes()).await?;
        self.recv().await
    }

    async fn send_data(&mut self, content: &str) -> Result<Reply, SMTPClientError> {
        trace!("C: <{} bytes of message data>", content.len());
        self.writer.write_all(dot_stuff(content).as_bytes()).await?;
        self.writer.write_all(b"\r\n.\r\n").await?;
        self.writer.flush().await?;
        self.recv().await
    }

    pub async fn greeting(&mut self) -> Result<Reply, SMTPClientError> {
        check_success(self.recv().await?, &[220], SMTPClientError::GreetingFailed)
    }

    pub async fn ehlo(&mut self, domain: &str) -> Result<Reply, SMTPClientError> {
        let reply = self.send_cmd(&format!("EHLO {domain}")).await?;
        check_success(reply, &[250], SMTPClientError::HELOFailed)
    }

    pub async fn starttls(&mut self) -> Result<(), SMTPClientError> {
        let reply = self.send_cmd("STARTTLS").await?;
        check_success(reply, &[220], SMTPClientError::StartTlsFailed)?;
        Ok(())
    }

    pub async fn login(&mut self, user: &str, pass: &str) -> Result<(), SMTPClientError> {
        let reply = self.send_cmd("AUTH LOGIN").await?;
        check_success(reply, &[334], SMTPClientError::AUTHFailed)?;

        let reply = self.send_secret(&BASE64_STANDARD.encode(user)).await?;
        check_success(reply, &[334], SMTPClientError::AUTHFailed)?;

        let reply = self.send_secret(&BASE64_STANDARD.encode(pass)).await?;
        check_success(reply, &[235], SMTPClientError::AUTHFailed)?;
        Ok(())
    }

    pub async fn send(&mut self, email: &Email, date: DateTime<Utc>) -> Result<(), SMTPClientError> {
        let reply = self
            .send_cmd(&format!("MAIL FROM:<{}>", header_safe(&email.from.address)))
            .await?;
        check_success(reply, &[250], SMTPClientError::SendEmailFailed)?;

        let reply = self
            .send_cmd(&format!("RCPT TO:<{}>", header_safe(&email.to.address)))
            .await?;
        check_success(reply, &[250, 251], SMTPClientError::SendEmailFailed)?;

        let reply = self.send_cmd("DATA").await?;
        check_success(reply, &[354], SMTPClientError::SendEmailFailed)?;

        let reply = self.send_data(&email.render(date)).await?;
        check_success(reply, &[250], SMTPClientError::SendEmailFailed)?;
        Ok(())
    }

    /// Ends the session. The message is already accepted, so the reply is ignored.
    pub async fn quit(&mut self) {
        if let Err(e) = self.send_cmd("QUIT").await {
            debug!("QUIT failed: {e}");
        }
    }

    async fn authenticate_and_send(
        &mut self,
        config: &SmtpConfig,
        email: &Email,
    ) -> Result<(), SMTPClientError> {
        self.login(&config.user, &config.pass).await?;
        self.send(email, Utc::now()).await?;
        self.quit().await;
        Ok(())
    }
}

fn check_success(
    reply: Reply,
    expected: &[u16],
    err: fn(Reply) -> SMTPClientError,
) -> Result<Reply, SMTPClientError> {
    if expected.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(err(reply))
    }
}

fn tls_connector() -> Result<TlsConnector, SMTPClientError> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_cert_store)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Connects to the configured server and delivers one message.
///
/// With [`SmtpSecurity::ImplicitTls`] the TLS handshake happens before any SMTP
/// traffic. With [`SmtpSecurity::StartTls`] the session starts in plaintext and is
/// upgraded before credentials are sent.
pub async fn deliver(
    config: &SmtpConfig,
    security: SmtpSecurity,
    email: &Email,
) -> Result<(), SMTPClientError> {
    let connector = tls_connector()?;
    let domain = rustls_pki_types::ServerName::try_from(config.domain.as_str())
        .map_err(|_| SMTPClientError::InvalidDomain(config.domain.clone()))?
        .to_owned();

    let stream = TcpStream::connect((config.server.as_str(), config.port)).await?;
    debug!("Connected to {}:{} ({:?})", config.server, config.port, security);

    match security {
        SmtpSecurity::ImplicitTls => {
            let stream = connector
                .connect(domain, stream)
                .await
                .map_err(SMTPClientError::Handshake)?;
            let mut smtp = SMTPClient::new(stream);
            smtp.greeting().await?;
            smtp.ehlo(&config.domain).await?;
            smtp.authenticate_and_send(config, email).await
        }
        SmtpSecurity::StartTls => {
            let mut smtp = SMTPClient::new(stream);
            smtp.greeting().await?;
            smtp.ehlo(&config.domain).await?;
            smtp.starttls().await?;
            let stream = connector
                .connect(domain, smtp.into_inner())
                .await
                .map_err(SMTPClientError::Handshake)?;
            let mut smtp = SMTPClient::new(stream);
            smtp.ehlo(&config.domain).await?;
            smtp.authenticate_and_send(config, email).await
        }
    }
}
