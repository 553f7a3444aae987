use crate::config::{AppConfig, Config, EmailConfig, MailTransport};
use crate::error::app_error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, email: OutgoingEmail) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, email: OutgoingEmail) -> Result<(), AppError> {
        let message = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_address)
                    .parse()
                    .map_err(|e| AppError::email(format!("Invalid from address: {}", e)))?,
            )
            .to(email
                .to_email
                .parse()
                .map_err(|e| AppError::email(format!("Invalid to address: {}", e)))?)
            .subject(email.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(email.text_body.clone()))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(email.html_body.clone())),
            )
            .map_err(|e| AppError::email(format!("Failed to build email: {}", e)))?;

        let creds = Credentials::new(self.config.smtp_username.clone(), self.config.smtp_password.clone());
        let transport = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| AppError::email(format!("Failed to create SMTP transport: {}", e)))?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        // lettre's SMTP transport blocks
        let result = tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| AppError::email(format!("Failed to spawn email sending task: {}", e)))?;
        result.map_err(|e| AppError::email(format!("Failed to send email: {}", e)))?;

        tracing::info!(subject = %email.subject, "email sent");
        Ok(())
    }
}

/// Keeps every delivered message in memory. Used in development and tests.
#[derive(Clone, Default)]
pub struct OutboxMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_to(&self, to_email: &str) -> Vec<OutgoingEmail> {
        self.sent.lock().await.iter().filter(|e| e.to_email == to_email).cloned().collect()
    }
}

#[async_trait]
impl Mailer for OutboxMailer {
    async fn deliver(&self, email: OutgoingEmail) -> Result<(), AppError> {
        tracing::debug!(to = %email.to_email, subject = %email.subject, "email stored in outbox");
        self.sent.lock().await.push(email);
        Ok(())
    }
}

/// Renders account emails and hands them to the configured [`Mailer`].
#[derive(Clone)]
pub struct EmailService {
    enabled: bool,
    app: AppConfig,
    mailer: Arc<dyn Mailer>,
}

impl EmailService {
    pub fn new(enabled: bool, app: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self { enabled, app, mailer }
    }

    /// Builds the service from configuration. The outbox is returned so it can be inspected.
    pub fn from_config(config: &Config) -> (Self, Option<OutboxMailer>) {
        match config.email.transport {
            MailTransport::Smtp => {
                let mailer = Arc::new(SmtpMailer::new(config.email.clone()));
                (Self::new(config.email.enabled, config.app.clone(), mailer), None)
            }
            MailTransport::Outbox => {
                let outbox = OutboxMailer::new();
                let service = Self::new(config.email.enabled, config.app.clone(), Arc::new(outbox.clone()));
                (service, Some(outbox))
            }
        }
    }

    pub async fn send_verification_email(&self, to_email: &str, to_name: &str, token: &str) -> Result<(), AppError> {
        let link = self.app.link(&format!("/verify-email?token={}", urlencoding::encode(token)));
        let app = &self.app.name;
        let intro = format!("Thank you for signing up for {}. Please verify your email address by clicking the button below:", escape_html(app));
        let html = render_html(
            &format!("Verify your {} email", app),
            to_name,
            &[intro.as_str()],
            Some(("Verify Email", link.as_str())),
            &[
                "If you didn't create an account, you can safely ignore this email.",
                "This link will expire in 24 hours.",
            ],
            app,
        );
        let text = format!(
            "Hello {},\n\nThank you for signing up for {}. Verify your email address using the link below:\n{}\n\nIf you didn't create an account, you can safely ignore this email.\nThis link will expire in 24 hours.\n\nBest regards,\nThe {} Team\n",
            to_name, app, link, app
        );
        self.send(to_email, to_name, &format!("Verify your {} email", app), html, text).await
    }

    pub async fn send_password_reset_email(&self, to_email: &str, to_name: &str, token: &str) -> Result<(), AppError> {
        let link = self.app.link(&format!("/reset-password?token={}", urlencoding::encode(token)));
        let app = &self.app.name;
        let html = render_html(
            &format!("Reset your {} password", app),
            to_name,
            &["We received a request to reset your password. Click the button below to create a new password:"],
            Some(("Reset Password", link.as_str())),
            &[
                "If you didn't request a password reset, you can safely ignore this email.",
                "This link will expire in 1 hour.",
            ],
            app,
        );
        let text = format!(
            "Hello {},\n\nWe received a request to reset your password. Create a new password using the link below:\n{}\n\nIf you didn't request a password reset, you can safely ignore this email.\nThis link will expire in 1 hour.\n\nBest regards,\nThe {} Team\n",
            to_name, link, app
        );
        self.send(to_email, to_name, &format!("Reset your {} password", app), html, text).await
    }

    pub async fn send_login_notification_email(&self, to_email: &str, to_name: &str, at: DateTime<Utc>, device: &str, location: &str) -> Result<(), AppError> {
        let app = &self.app.name;
        let time = at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let details = format!(
            "<strong>Time:</strong> {}<br><strong>Device:</strong> {}<br><strong>Location:</strong> {}",
            escape_html(&time),
            escape_html(device),
            escape_html(location)
        );
        let intro = format!("We detected a new login to your {} account:", escape_html(app));
        let html = render_html(
            &format!("New login to your {} account", app),
            to_name,
            &[intro.as_str(), details.as_str()],
            None,
            &[
                "If this was you, no further action is needed.",
                "If you don't recognize this activity, please reset your password immediately and contact our support team.",
            ],
            app,
        );
        let text = format!(
            "Hello {},\n\nWe detected a new login to your {} account:\n\nTime: {}\nDevice: {}\nLocation: {}\n\nIf this was you, no further action is needed.\nIf you don't recognize this activity, please reset your password immediately.\n\nBest regards,\nThe {} Team\n",
            to_name, app, time, device, location, app
        );
        self.send(to_email, to_name, &format!("New login to your {} account", app), html, text).await
    }

    async fn send(&self, to_email: &str, to_name: &str, subject: &str, html_body: String, text_body: String) -> Result<(), AppError> {
        if !self.enabled {
            tracing::warn!(to = %to_email, subject = %subject, "email service is disabled, skipping message");
            return Ok(());
        }

        self.mailer
            .deliver(OutgoingEmail {
                to_email: to_email.to_string(),
                to_name: to_name.to_string(),
                subject: subject.to_string(),
                html_body,
                text_body,
            })
            .await
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Shared layout. `intro` paragraphs may contain markup; the name, title and link are escaped here.
fn render_html(title: &str, to_name: &str, intro: &[&str], action: Option<(&str, &str)>, outro: &[&str], app_name: &str) -> String {
    let paragraphs = |lines: &[&str]| lines.iter().map(|l| format!("<p>{}</p>", l)).collect::<Vec<_>>().join("\n      ");
    let button = match action {
        Some((label, link)) => format!(
            r#"<p style="text-align:center;margin:28px 0;"><a href="{link}" style="background-color:#5865F2;color:#FFFFFF;padding:12px 24px;border-radius:6px;text-decoration:none;font-weight:600;">{label}</a></p>
      <p style="font-size:13px;color:#5C5F66;">Or copy this link into your browser:<br>{link}</p>"#,
            link = escape_html(link),
            label = escape_html(label)
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{title}</title>
</head>
<body style="margin:0;padding:0;background-color:#F2F3F5;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Arial,sans-serif;color:#141517;line-height:1.6;">
  <div style="max-width:600px;margin:0 auto;padding:28px 12px;">
    <div style="background-color:#FFFFFF;border-radius:12px;padding:32px;">
      <h1 style="font-size:22px;margin:0 0 16px;">{title}</h1>
      <p>Hello {name},</p>
      {intro}
      {button}
      {outro}
      <p>Best regards,<br>The {app} Team</p>
    </div>
  </div>
</body>
</html>
"#,
        title = escape_html(title),
        name = escape_html(to_name),
        intro = paragraphs(intro),
        button = button,
        outro = paragraphs(outro),
        app = escape_html(app_name)
    )
}
