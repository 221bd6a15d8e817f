use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, warn};

const BREVO_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";
const OTP_SUBJECT: &str = "Email Verification OTP";

/// Out-of-band delivery of OTP codes.
///
/// Delivery is best effort: registration staging succeeds whatever this
/// returns, the result only tells the client whether an email went out.
pub trait Mailer: Send + Sync {
    fn send_otp<'a>(&'a self, to: &'a str, code: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone)]
pub struct BrevoConfig {
    pub api_key: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
}

/// Sends mail through the Brevo transactional email API.
pub struct BrevoMailer {
    client: reqwest::Client,
    config: BrevoConfig,
    endpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoSendBody<'a> {
    sender: BrevoAddress<'a>,
    to: Vec<BrevoAddress<'a>>,
    subject: &'a str,
    html_content: String,
    text_content: String,
}

impl BrevoMailer {
    pub fn new(config: BrevoConfig) -> Result<Self> {
        Self::with_endpoint(config, BREVO_ENDPOINT)
    }

    pub fn with_endpoint(config: BrevoConfig, endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("chaingrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config,
            endpoint: endpoint.to_string(),
        })
    }

    async fn send(&self, to: &str, code: &str) -> Result<()> {
        let body = BrevoSendBody {
            sender: BrevoAddress {
                email: &self.config.sender_email,
                name: self.config.sender_name.as_deref(),
            },
            to: vec![BrevoAddress { email: to, name: None }],
            subject: OTP_SUBJECT,
            html_content: render_otp_html(to, code),
            text_content: render_otp_text(code),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("api-key", &self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!("OTP email accepted by Brevo for {}", to);
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        Err(anyhow!("Brevo send failed (status={}): {}", status, text))
    }
}

impl Mailer for BrevoMailer {
    fn send_otp<'a>(&'a self, to: &'a str, code: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.send(to, code))
    }
}

/// Used when no mail provider is configured. Every send fails, so clients
/// are told that no email went out.
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn send_otp<'a>(&'a self, to: &'a str, _code: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            warn!("Mail delivery disabled, OTP for {} was not sent", to);
            Err(anyhow!("mail delivery is not configured"))
        })
    }
}

fn render_otp_text(code: &str) -> String {
    format!(
        "Your ChainGrid verification code is {}.\n\nPlease don't share this code with anyone.\n",
        code
    )
}

fn render_otp_html(to: &str, code: &str) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<body style="margin:0;padding:24px;background:#f9fafb;font-family:Inter,Arial,sans-serif;">
  <div style="max-width:400px;margin:0 auto;background:#fff;border-radius:12px;padding:32px;text-align:center;">
    <h1 style="font-size:24px;color:#111827;margin:0 0 8px 0;">Verification Code</h1>
    <p style="font-size:14px;color:#4b5563;margin:0 0 32px 0;">Use this one-time password to finish creating your ChainGrid account.</p>
    <div style="background:#f3f4f6;border-radius:8px;padding:24px 20px;margin-bottom:32px;">
      <p style="font-weight:600;color:#374151;margin:0 0 8px 0;">Email Address</p>
      <p style="color:#111827;margin:0 0 16px 0;">{email}</p>
      <p style="font-weight:600;color:#374151;margin:0 0 8px 0;">Your OTP Code</p>
      <p style="font-size:32px;font-weight:800;letter-spacing:0.2em;color:#4f46e5;margin:0;">{code}</p>
    </div>
    <p style="font-size:12px;color:#6b7280;margin:0;">Please don't share this code with anyone.</p>
  </div>
</body>
</html>"#,
        email = escape_html(to),
        code = escape_html(code),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
