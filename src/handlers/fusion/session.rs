use chrono::{DateTime, Utc};
use log::{debug, error, info};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::errors::AuthError;
use crate::models::fusion_models::{ApiResponse, LoginRequest, XSRF_TOKEN};

// --------------------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_name:   String,
    pub system_code: String,
}

/// An authenticated northbound session. The token is echoed back as header on every call.
#[derive(Debug, Clone)]
pub struct Session {
    pub token:          String,
    pub base_url:       String,
    pub established_at: DateTime<Utc>,
}

// --------------------------------------------------------------------------------------------------------------

/// Owns the HTTP client, the credentials and the current session (if any).
pub struct SessionManager {
    client:      Client,
    base_url:    String,
    credentials: Credentials,
    session:     Option<Session>,
}

impl SessionManager {
    pub fn new(base_url: &str, credentials: Credentials, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            session: None,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.session.is_some()
    }

    /// Forget the current session after the API reported it expired.
    pub fn invalidate(&mut self) {
        if let Some(session) = self.session.take() {
            info!(
                "[Fusion] Session established at {} marked expired.",
                session.established_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    /// POST /login. Replaces the stored session only on success; a failed attempt leaves
    /// any previous session untouched.
    pub async fn login(&mut self) -> Result<&Session, AuthError> {
        match self.request_token().await {
            Ok(token) => {
                info!("[Fusion] Login successful.");
                Ok(self.session.insert(Session {
                    token,
                    base_url:       self.base_url.clone(),
                    established_at: Utc::now(),
                }))
            }
            Err(e) => {
                error!("[Fusion] Login failed: {}", e);
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> Result<String, AuthError> {
        let url = format!("{}/login", self.base_url);
        let payload = LoginRequest {
            user_name:   &self.credentials.user_name,
            system_code: &self.credentials.system_code,
        };
        debug!("[Fusion] POST {} as '{}'", url, self.credentials.user_name);

        let response = self.client.post(&url).json(&payload).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status { status: status.as_u16(), body });
        }

        let token = response
            .cookies()
            .find(|c| c.name() == XSRF_TOKEN)
            .map(|c| c.value().to_string());

        let body = response.text().await?;
        let result: ApiResponse<serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| AuthError::Malformed(e.to_string()))?;

        if !result.success {
            return Err(AuthError::Rejected(result.message));
        }

        token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)
    }
}

// --------------------------------------------------------------------------------------------------------------
