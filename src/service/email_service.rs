//! Email Service
//!
//! Delivery of verification and password reset codes. SMTP delivery renders
//! Tera templates and sends through lettre; without SMTP configuration codes
//! are written to the log instead.

use async_trait::async_trait;
use chrono::Datelike;
use lettre::{
    message::{header, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use log::{debug, error, info};
use tera::{Context, Tera};
use thiserror::Error;

use crate::config::EmailConfig;
use crate::models::verification::CodePurpose;
use crate::utils::error::AppError;

const CODE_EMAIL_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{ heading }}</title>
    <style>
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px; }
        .code { font-size: 32px; font-weight: bold; letter-spacing: 4px; text-align: center; margin: 20px 0; padding: 15px; background: #f8f9fa; border-radius: 4px; }
        .footer { font-size: 12px; color: #666; text-align: center; }
    </style>
</head>
<body>
    <h1>{{ heading }}</h1>
    <p>{{ intro }}</p>
    <div class="code">{{ code }}</div>
    <p>This code expires in <strong>{{ expires_in_minutes }} minutes</strong> and can be used once.</p>
    <p>If you did not request it, you can safely ignore this email.</p>
    <div class="footer">&copy; {{ current_year }} {{ app_name }}</div>
</body>
</html>
"#;

const CODE_EMAIL_TEXT: &str = r#"{{ heading }}

{{ intro }}

Code: {{ code }}

This code expires in {{ expires_in_minutes }} minutes and can be used once.
If you did not request it, you can safely ignore this email.

(c) {{ current_year }} {{ app_name }}
"#;

/// Email delivery errors
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Email transport error: {0}")]
    Transport(String),

    #[error("Email configuration error: {0}")]
    Configuration(String),
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::InvalidAddress(msg) => AppError::Validation(msg),
            EmailError::Transport(msg) => AppError::ExternalService(msg),
            EmailError::Template(msg) | EmailError::Configuration(msg) => AppError::Internal(msg),
        }
    }
}

pub type EmailResult<T> = Result<T, EmailError>;

/// A one-time code addressed to a recipient
#[derive(Debug, Clone)]
pub struct CodeEmail {
    pub to: String,
    pub purpose: CodePurpose,
    pub code: String,
    pub expires_in_minutes: i64,
}

impl CodeEmail {
    fn subject(&self) -> &'static str {
        match self.purpose {
            CodePurpose::EmailVerify => "Verify your email address",
            CodePurpose::PasswordReset => "Reset your password",
        }
    }

    fn intro(&self) -> &'static str {
        match self.purpose {
            CodePurpose::EmailVerify => "Enter this code to confirm your email address:",
            CodePurpose::PasswordReset => "Enter this code to choose a new password:",
        }
    }
}

/// Outbound email gateway
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_code(&self, email: &CodeEmail) -> EmailResult<()>;
}

/// SMTP delivery with templated bodies
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    templates: Tera,
    config: EmailConfig,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> EmailResult<Self> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| EmailError::Configuration(format!("Failed to configure SMTP relay: {}", e)))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            templates: code_templates()?,
            config,
        })
    }

    /// Check that the SMTP server accepts connections
    pub async fn test_connection(&self) -> EmailResult<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))
    }
}

fn code_templates() -> EmailResult<Tera> {
    let mut templates = Tera::default();
    templates
        .add_raw_template("code_email.html", CODE_EMAIL_HTML)
        .map_err(|e| EmailError::Template(format!("Failed to add HTML template: {}", e)))?;
    templates
        .add_raw_template("code_email.txt", CODE_EMAIL_TEXT)
        .map_err(|e| EmailError::Template(format!("Failed to add text template: {}", e)))?;
    Ok(templates)
}

fn render_code_email(templates: &Tera, email: &CodeEmail, app_name: &str) -> EmailResult<(String, String)> {
    let mut context = Context::new();
    context.insert("heading", email.subject());
    context.insert("intro", email.intro());
    context.insert("code", &email.code);
    context.insert("expires_in_minutes", &email.expires_in_minutes);
    context.insert("app_name", app_name);
    context.insert("current_year", &chrono::Utc::now().year());

    let html = templates
        .render("code_email.html", &context)
        .map_err(|e| EmailError::Template(format!("Failed to render HTML template: {}", e)))?;
    let text = templates
        .render("code_email.txt", &context)
        .map_err(|e| EmailError::Template(format!("Failed to render text template: {}", e)))?;

    Ok((html, text))
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_code(&self, email: &CodeEmail) -> EmailResult<()> {
        let (html_body, text_body) = render_code_email(&self.templates, email, &self.config.from_name)?;

        let message = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_email)
                    .parse()
                    .map_err(|e| EmailError::Configuration(format!("Invalid from address: {}", e)))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|e| EmailError::InvalidAddress(format!("Invalid recipient email: {}", e)))?)
            .subject(email.subject())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| EmailError::Template(format!("Failed to build email message: {}", e)))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Sent {} email to {}", email.purpose, email.to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send {} email to {}: {}", email.purpose, email.to, e);
                Err(EmailError::Transport(e.to_string()))
            }
        }
    }
}

/// Development sender that writes codes to the log
#[derive(Debug, Default, Clone)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_code(&self, email: &CodeEmail) -> EmailResult<()> {
        info!("SMTP not configured; {} email to {} not delivered", email.purpose, email.to);
        debug!("{} code for {}: {}", email.purpose, email.to, email.code);
        Ok(())
    }
}
