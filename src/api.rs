use crate::capture::Keystroke;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Client-side error taxonomy for collaborator calls.
///
/// A scoring rejection (`authenticated == false`, `is_enrolled == false`) is
/// a normal response and never surfaces here.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// Recovered locally; blocks submission, no collaborator call is made.
    #[error("{0}")]
    Validation(String),
    /// The collaborator answered with a non-success status.
    #[error("{0}")]
    Api(String),
    /// The call itself failed (connect, timeout, decode).
    #[error("request failed: {0}")]
    Transport(String),
}

impl ApiError {
    /// An invalidated/expired-session indication additionally clears the
    /// stored credential (matching the server's 401 detail wording).
    pub fn is_session_invalid(&self) -> bool {
        match self {
            ApiError::Api(msg) | ApiError::Transport(msg) => {
                msg.contains("Invalid") || msg.contains("expired")
            }
            ApiError::Validation(_) => false,
        }
    }
}

// ── Requests ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub name: String,
    pub keystrokes: Vec<Keystroke>,
    pub device_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollRequest {
    pub username: String,
    pub keystrokes: Vec<Keystroke>,
    pub device_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub username: String,
    pub keystrokes: Vec<Keystroke>,
    pub device_type: String,
}

// ── Responses ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnrollmentStatus {
    pub username: String,
    pub name: String,
    pub samples_collected: u32,
    pub samples_required: u32,
    pub is_enrolled: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub authenticated: bool,
    pub confidence_score: f64,
    pub message: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub name: String,
    pub device_type: String,
    pub is_enrolled: bool,
    pub enrollment_samples: u32,
    #[serde(default)]
    pub security_score: Option<f64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthLogEntry {
    pub id: String,
    /// Percent in [0, 100] as reported by the history endpoint.
    pub confidence_score: f64,
    pub result: String,
    pub device_type: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthHistory {
    pub username: String,
    pub total_attempts: u32,
    pub success_rate: f64,
    pub avg_confidence: f64,
    pub history: Vec<AuthLogEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

// ── Backend boundary ────────────────────────────────────────────

/// The external scorer/registration collaborator. Implementations block; the
/// app runs them on worker threads so the capture loop never waits.
pub trait AuthBackend: Send + Sync {
    fn register(&self, req: &RegisterRequest) -> Result<EnrollmentStatus, ApiError>;
    fn enroll(&self, req: &EnrollRequest) -> Result<EnrollmentStatus, ApiError>;
    fn authenticate(&self, req: &AuthRequest) -> Result<AuthResponse, ApiError>;
    fn profile(&self, token: &str) -> Result<UserProfile, ApiError>;
    fn auth_history(&self, token: &str) -> Result<AuthHistory, ApiError>;
}

/// HTTP implementation against the FastAPI backend.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decode<R: serde::de::DeserializeOwned>(
        response: reqwest::blocking::Response,
    ) -> Result<R, ApiError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .map_err(|e| ApiError::Transport(e.to_string()))
        } else {
            let detail = response
                .json::<ErrorBody>()
                .map(|b| b.detail)
                .unwrap_or_else(|_| format!("server returned {}", status));
            Err(ApiError::Api(detail))
        }
    }

    fn post<T: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, ApiError> {
        log::debug!("POST {}", path);
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::decode(response)
    }

    fn get<R: serde::de::DeserializeOwned>(&self, path: &str, token: &str) -> Result<R, ApiError> {
        log::debug!("GET {}", path);
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Self::decode(response)
    }
}

impl AuthBackend for HttpBackend {
    fn register(&self, req: &RegisterRequest) -> Result<EnrollmentStatus, ApiError> {
        self.post("/api/register", req)
    }

    fn enroll(&self, req: &EnrollRequest) -> Result<EnrollmentStatus, ApiError> {
        self.post("/api/enroll", req)
    }

    fn authenticate(&self, req: &AuthRequest) -> Result<AuthResponse, ApiError> {
        self.post("/api/authenticate", req)
    }

    fn profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.get("/api/user/profile", token)
    }

    fn auth_history(&self, token: &str) -> Result<AuthHistory, ApiError> {
        self.get("/api/user/auth-history", token)
    }
}
