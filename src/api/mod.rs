//! Client for the issue management server's JSON API.

pub mod models;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use self::models::{
    IssueDetail, IssuePriority, IssueStatus, IssueSummary, MessagesPage, PriorityUpdate, Program,
    StatusUpdate,
};

/// Page size used for every thread request.
pub const PAGE_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {status}")]
    Status { status: StatusCode },
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait IssueApi: Send + Sync {
    async fn list_issues(&self) -> Result<Vec<IssueSummary>, ApiError>;
    async fn list_programs(&self) -> Result<Vec<Program>, ApiError>;
    async fn issue_detail(&self, issue_id: &str) -> Result<IssueDetail, ApiError>;
    async fn messages(
        &self,
        issue_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<MessagesPage, ApiError>;
    async fn update_status(&self, issue_id: &str, status: IssueStatus) -> Result<(), ApiError>;
    async fn update_priority(
        &self,
        issue_id: &str,
        priority: IssuePriority,
    ) -> Result<(), ApiError>;
}

pub struct HttpIssueApi {
    http: reqwest::Client,
    base: Url,
}

impl HttpIssueApi {
    pub fn new(base: &str) -> Result<Self, ApiError> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        debug!(%url, "GET");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { status });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn patch_json<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(), ApiError> {
        debug!(%url, "PATCH");
        let response = self.http.patch(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { status });
        }
        Ok(())
    }
}

#[async_trait]
impl IssueApi for HttpIssueApi {
    #[instrument(skip(self))]
    async fn list_issues(&self) -> Result<Vec<IssueSummary>, ApiError> {
        self.get_json(self.endpoint("api/issues")?).await
    }

    #[instrument(skip(self))]
    async fn list_programs(&self) -> Result<Vec<Program>, ApiError> {
        self.get_json(self.endpoint("api/programs")?).await
    }

    #[instrument(skip(self))]
    async fn issue_detail(&self, issue_id: &str) -> Result<IssueDetail, ApiError> {
        self.get_json(self.endpoint(&format!("api/issues/{issue_id}"))?)
            .await
    }

    #[instrument(skip(self))]
    async fn messages(
        &self,
        issue_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<MessagesPage, ApiError> {
        let mut url = self.endpoint(&format!("api/issues/{issue_id}/messages"))?;
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    #[instrument(skip(self))]
    async fn update_status(&self, issue_id: &str, status: IssueStatus) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("api/issues/{issue_id}/status"))?;
        self.patch_json(url, &StatusUpdate { status }).await
    }

    #[instrument(skip(self))]
    async fn update_priority(
        &self,
        issue_id: &str,
        priority: IssuePriority,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("api/issues/{issue_id}/priority"))?;
        self.patch_json(url, &PriorityUpdate { priority }).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoints_under_base_path() {
        let api = HttpIssueApi::new("http://localhost:8000/triage").expect("api");
        let url = api.endpoint("api/issues/42").expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/triage/api/issues/42");

        let api = HttpIssueApi::new("http://localhost:8000").expect("api");
        let url = api.endpoint("api/issues").expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/api/issues");
    }

    #[test]
    fn rejects_invalid_base() {
        assert!(matches!(
            HttpIssueApi::new("not a url"),
            Err(ApiError::Url(_))
        ));
    }
}
