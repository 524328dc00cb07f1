use anyhow::{Context, Result};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use common::SmtpConfig;

pub mod templates;

/// Category label attached to every outbound message. The delivery provider
/// echoes it back in webhook events, where it becomes the metrics bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Welcome,
    Story,
    AdminApproval,
    Alert,
}

impl EmailKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EmailKind::Welcome => "welcome",
            EmailKind::Story => "story",
            EmailKind::AdminApproval => "admin_approval",
            EmailKind::Alert => "alert",
        }
    }
}

/// Category header carried on every outbound message so a tag-echoing
/// delivery provider can return it in webhook events.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailTypeHeader(pub String);

impl Header for EmailTypeHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Email-Type")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// One message for the transport.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub kind: EmailKind,
}

/// "Send one message" abstraction over the email transport.
/// Everything below this seam (SMTP mechanics, retries at the provider) is
/// out of scope for the core.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

/// SMTP mailer over lettre's async Tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Build the mailer from the `[smtp]` config section. The password is
    /// resolved from the env var named by `password_env`.
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid smtp.from address: {}", cfg.from))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .with_context(|| format!("failed to configure SMTP relay for {}", cfg.host))?;

        if let Some(port) = cfg.port {
            builder = builder.port(port);
        }

        if let Some(ref username) = cfg.username {
            let password_env = cfg.password_env.as_deref().unwrap_or("STORYLETTER_SMTP_PASSWORD");
            let password = std::env::var(password_env)
                .with_context(|| format!("SMTP password env var '{}' not set", password_env))?;
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("invalid recipient address: {}", email.to))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .header(EmailTypeHeader(email.kind.tag().to_string()))
            .body(email.html.clone())
            .context("failed to build message")?;

        self.transport
            .send(message)
            .await
            .with_context(|| format!("SMTP send to {} failed", email.to))?;

        info!(to = %email.to, kind = email.kind.tag(), "Message sent");
        Ok(())
    }
}

/// Personalized unsubscribe link embedding the recipient's email.
pub fn unsubscribe_url(app_url: &str, email: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(email.as_bytes()).collect();
    format!("{}/api/unsubscribe?email={}", app_url.trim_end_matches('/'), encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_messages_carry_the_category_header() {
        let message = Message::builder()
            .from("Stories <stories@example.com>".parse().unwrap())
            .to("parent@example.com".parse().unwrap())
            .subject("Test")
            .header(ContentType::TEXT_HTML)
            .header(EmailTypeHeader(EmailKind::Story.tag().to_string()))
            .body(String::from("<p>hi</p>"))
            .unwrap();

        let rendered = String::from_utf8(message.formatted()).unwrap();
        assert!(rendered.contains("X-Email-Type: story"));
    }

    #[test]
    fn unsubscribe_url_percent_encodes_email() {
        let url = unsubscribe_url("http://localhost:8000/", "a+b@example.com");
        assert_eq!(
            url,
            "http://localhost:8000/api/unsubscribe?email=a%2Bb%40example.com"
        );
    }
}
