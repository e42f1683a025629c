use crate::config::types::CollectorConfig;
use crate::record::LogRecord;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Collector returned error status {status}: {body}")]
    CollectorError { status: u16, body: String },

    #[error("Collector response is missing '{0}'")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, CollectorClientError>;

/// Where uploaded records end up.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Ship one batch. Succeeds on any 2xx response.
    async fn upload_batch(
        &self,
        session_id: &str,
        tag: Option<&str>,
        records: &[LogRecord],
    ) -> Result<()>;
}

/// Hands out session identifiers.
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    async fn create_session(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UserCreated {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: Option<String>,
}

/// HTTP client for the collector service
#[derive(Debug, Clone)]
pub struct CollectorClient {
    base_url: String,
    api_key: Option<String>,
    user_id: Option<String>,
    provision_timeout: Duration,
    client: reqwest::Client,
}

impl CollectorClient {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            user_id: config.user_id.clone(),
            provision_timeout: config.provision_timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Register an anonymous user and return its id.
    pub async fn create_user(&self) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("/user/create"))
            .timeout(self.provision_timeout)
            .send()
            .await?;
        let created: UserCreated = check_status(response).await?.json().await?;
        created
            .user_id
            .filter(|id| !id.is_empty())
            .ok_or(CollectorClientError::MissingField("user_id"))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(CollectorClientError::CollectorError {
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    })
}

#[async_trait]
impl SessionProvisioner for CollectorClient {
    async fn create_session(&self) -> Result<String> {
        let user_id = match &self.user_id {
            Some(id) => id.clone(),
            None => {
                let id = self.create_user().await?;
                tracing::debug!(user_id = %id, "Registered anonymous user");
                id
            }
        };

        let request = self
            .client
            .post(self.endpoint("/session/create"))
            .timeout(self.provision_timeout)
            .header("User-Id", &user_id);
        let response = self.authorized(request).send().await?;
        let created: SessionCreated = check_status(response).await?.json().await?;
        created
            .session_id
            .filter(|id| !id.is_empty())
            .ok_or(CollectorClientError::MissingField("session_id"))
    }
}

#[async_trait]
impl Collector for CollectorClient {
    async fn upload_batch(
        &self,
        session_id: &str,
        tag: Option<&str>,
        records: &[LogRecord],
    ) -> Result<()> {
        let request = self
            .client
            .post(self.endpoint("/session/upload"))
            .query(&[("session_id", session_id), ("tag", tag.unwrap_or(""))])
            .json(records);
        let response = self.authorized(request).send().await?;
        check_status(response).await?;
        Ok(())
    }
}
