//! HTTP client for the project service.
//!
//! Configuration is via environment variables:
//! - `PROJECT_SYNC_URL` - Base URL (default: `http://localhost:8888/jupyter-project`)
//! - `PROJECT_SYNC_TOKEN` - Token sent as bearer authentication (optional)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use super::ProjectService;
use crate::error::Result;
use crate::models::{ProjectModel, ProjectResponse};

/// Default URL of a local notebook server.
pub const DEFAULT_URL: &str = "http://localhost:8888/jupyter-project";

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Project service returned no project for '{0}'")]
    MissingProject(String),
}

/// HTTP client for the project service.
#[derive(Debug, Clone)]
pub struct HttpProjectService {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpProjectService {
    /// Create client from environment variables.
    pub fn from_env() -> Self {
        let base_url = std::env::var("PROJECT_SYNC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let token = std::env::var("PROJECT_SYNC_TOKEN").ok();
        Self::new(base_url, token)
    }

    /// Create with explicit configuration.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    /// `/projects` or `/projects/<encoded path>`.
    fn endpoint(path: &str) -> String {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        if segments.is_empty() {
            "/projects".to_string()
        } else {
            format!("/projects/{}", segments.join("/"))
        }
    }

    /// Build a request with optional auth header.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, Self::endpoint(path));
        let mut req = self.client.request(method, &url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Handle response, converting HTTP errors to ClientError.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<ProjectResponse, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::status_error(status, response).await)
        }
    }

    /// Handle response that may return empty body (204 No Content).
    async fn handle_empty_response(
        &self,
        response: reqwest::Response,
    ) -> std::result::Result<(), ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::status_error(status, response).await)
        }
    }

    async fn status_error(status: StatusCode, response: reqwest::Response) -> ClientError {
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(body),
            StatusCode::BAD_REQUEST => ClientError::BadRequest(body),
            _ => ClientError::Server(format!("{}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ProjectService for HttpProjectService {
    async fn create(&self, path: &str, params: &Value) -> Result<ProjectModel> {
        tracing::debug!("POST /projects/{}", path);
        let response = self
            .request(reqwest::Method::POST, path)
            .json(params)
            .send()
            .await
            .map_err(ClientError::from)?;
        let answer = self.handle_response(response).await?;
        Ok(answer
            .project
            .ok_or_else(|| ClientError::MissingProject(path.to_string()))?)
    }

    async fn open(&self, path: &str) -> Result<Option<ProjectModel>> {
        tracing::debug!("GET /projects/{}", path);
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(ClientError::from)?;
        Ok(self.handle_response(response).await?.project)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tracing::debug!("DELETE /projects/{}", path);
        let response = self
            .request(reqwest::Method::DELETE, path)
            .send()
            .await
            .map_err(ClientError::from)?;
        Ok(self.handle_empty_response(response).await?)
    }
}
