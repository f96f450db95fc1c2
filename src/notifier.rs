use crate::config::{Mailbox, ServerConfig, SmtpConfig, SmtpSecurity};
use crate::smtpclient::{self, Email};
use crate::submission::StoredSubmission;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Best-effort delivery of a stored submission to operators.
///
/// Implementations log their own failures and report them only through the
/// returned flag, so a notifier can never fail the request that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns whether the notification was delivered.
    async fn notify(&self, submission: &StoredSubmission) -> bool;
}

pub struct EmailNotifier {
    smtp: SmtpConfig,
    security: Option<SmtpSecurity>,
    sender: Mailbox,
    rcpt: Mailbox,
    subject: String,
    timeout: Duration,
}

impl EmailNotifier {
    pub fn new(config: &ServerConfig) -> EmailNotifier {
        EmailNotifier {
            smtp: config.smtp.clone(),
            security: config.smtp.security(),
            sender: config.sender.clone(),
            rcpt: config.rcpt.clone(),
            subject: config.subject.clone(),
            timeout: config.notify_timeout,
        }
    }

    /// The message sent for a submission; replies go to the submitter.
    pub fn email_for(&self, submission: &StoredSubmission) -> Email {
        let form = submission.form();
        Email {
            from: self.sender.clone(),
            to: self.rcpt.clone(),
            reply_to: Mailbox::new(form.name.clone(), form.email.clone()),
            subject: self.subject.clone(),
            body: submission.email_text(&self.sender.name),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, submission: &StoredSubmission) -> bool {
        let Some(security) = self.security else {
            warn!(
                "SMTP port {} is not supported, use 465/587. Email not sent",
                self.smtp.port
            );
            return false;
        };

        let email = self.email_for(submission);
        match tokio::time::timeout(self.timeout, smtpclient::deliver(&self.smtp, security, &email)).await {
            Ok(Ok(())) => {
                info!("Email sent for submission {}", submission.id);
                true
            }
            Ok(Err(e)) => {
                error!("Email sending failed for submission {}: {e}", submission.id);
                false
            }
            Err(_) => {
                error!(
                    "Email sending timed out after {:?} for submission {}",
                    self.timeout, submission.id
                );
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts `{"content": ...}` to a chat webhook; a 204 reply means delivered.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    site_name: String,
}

impl WebhookNotifier {
    pub fn new(config: &ServerConfig) -> Result<WebhookNotifier, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.notify_timeout)
            .build()?;
        Ok(WebhookNotifier {
            client,
            url: config.webhook_url.clone(),
            site_name: config.sender.name.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, submission: &StoredSubmission) -> bool {
        let content = submission.notification_text(&self.site_name);
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookMessage { content: &content })
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                info!("Webhook notified for submission {}", submission.id);
                true
            }
            Ok(response) => {
                warn!(
                    "Webhook rejected submission {} with status {}",
                    submission.id,
                    response.status()
                );
                false
            }
            Err(e) => {
                error!("Webhook request failed for submission {}: {e}", submission.id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::tests::jane;
    use crate::submission::Submission;
    use axum::{extract::State, http::StatusCode as HttpStatus, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn config(smtp_port: u16, webhook_url: &str) -> ServerConfig {
        let port = smtp_port.to_string();
        let env = HashMap::from([
            ("POSTGRES_URL", "sqlite::memory:"),
            ("DISCORD_WEBHOOK_URL", webhook_url),
            ("SENDER_NAME", "Acme Site"),
            ("SENDER_EMAIL", "noreply@acme.test"),
            ("RECIPIENT_NAME", "Acme Ops"),
            ("RECIPIENT_EMAIL", "ops@acme.test"),
            ("SMTP_SERVER", "127.0.0.1"),
            ("SMTP_DOMAIN", "localhost"),
            ("SMTP_PORT", port.as_str()),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "hunter2"),
            ("NOTIFY_TIMEOUT_SECS", "5"),
        ]);
        ServerConfig::from_lookup(|name| env.get(name).map(|v| v.to_string())).unwrap()
    }

    fn stored() -> StoredSubmission {
        StoredSubmission {
            id: 7,
            submission: Submission {
                form: jane(),
                created_at: "2024-05-01 08:02:03".to_string(),
            },
        }
    }

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Serves a webhook endpoint that answers every POST with `status`.
    async fn fake_webhook(status: HttpStatus) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (url, received)
    }

    #[test]
    fn email_replies_to_the_submitter() {
        let notifier = EmailNotifier::new(&config(587, "http://unused"));
        let email = notifier.email_for(&stored());
        assert_eq!(email.from, Mailbox::new("Acme Site", "noreply@acme.test"));
        assert_eq!(email.to, Mailbox::new("Acme Ops", "ops@acme.test"));
        assert_eq!(email.reply_to, Mailbox::new("Jane Doe", "jane@example.com"));
        assert_eq!(email.subject, "[Acme Site] New Contact Form Submission");
        assert!(email.body.starts_with("[Acme Site] New Contact Form Submission\n\n"));
        assert!(email.body.contains("- Phone: +1234567890"));
        assert!(email.body.contains("*Time: 2024-05-01 08:02:03*"));
    }

    #[tokio::test]
    async fn unsupported_port_never_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let notifier = EmailNotifier::new(&config(port, "http://unused"));

        assert!(!notifier.notify(&stored()).await);
        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_logged_not_raised() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // STARTTLS is chosen from 587 at construction; the socket goes to a closed port.
        let mut notifier = EmailNotifier::new(&config(587, "http://unused"));
        notifier.smtp.port = port;
        assert!(!notifier.notify(&stored()).await);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let mut notifier = EmailNotifier::new(&config(465, "http://unused"));
        notifier.smtp.port = port;
        notifier.timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        assert!(!notifier.notify(&stored()).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        silent.abort();
    }

    #[tokio::test]
    async fn webhook_204_is_success() {
        let (url, received) = fake_webhook(HttpStatus::NO_CONTENT).await;
        let notifier = WebhookNotifier::new(&config(587, &url)).unwrap();

        assert!(notifier.notify(&stored()).await);
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let content = received[0]["content"].as_str().unwrap();
        assert!(content.starts_with("[Acme Site] New contact form submission:"));
        for value in ["Jane Doe", "jane@example.com", "+1234567890", "Hello", "Test", "2024-05-01 08:02:03"] {
            assert!(content.contains(value), "missing {value}");
        }
    }

    #[tokio::test]
    async fn webhook_other_statuses_are_failures() {
        for status in [HttpStatus::OK, HttpStatus::BAD_REQUEST, HttpStatus::INTERNAL_SERVER_ERROR] {
            let (url, received) = fake_webhook(status).await;
            let notifier = WebhookNotifier::new(&config(587, &url)).unwrap();
            assert!(!notifier.notify(&stored()).await, "{status} counted as delivered");
            assert_eq!(received.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn webhook_transport_error_is_swallowed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);
        let notifier = WebhookNotifier::new(&config(587, &url)).unwrap();
        assert!(!notifier.notify(&stored()).await);
    }
}
