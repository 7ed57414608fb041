use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Transactional email API endpoint.
const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Sender address for verification mail.
const FROM_ADDRESS: &str = "Console <no-reply@app238.com>";

/// Timeout for one delivery attempt.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("failed to reach the email provider: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("the email provider rejected the message with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Thin client for the Resend HTTP API.
pub struct EmailClient {
    client: reqwest::Client,
    api_key: String,
}

impl EmailClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
            api_key,
        }
    }

    /// Delivers a verification code to a tenant.
    pub async fn send_verification_code(&self, to: &str, code: &str) -> Result<(), EmailError> {
        let body = json!({
            "from": FROM_ADDRESS,
            "to": [to],
            "subject": "Your console verification code",
            "text": format!("Your verification code is {code}. It expires in 10 minutes."),
        });

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmailError::Rejected(response.status()));
        }

        Ok(())
    }
}
