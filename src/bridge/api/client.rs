use super::types::{MessageDetail, MessagePage, MessageSummary, Tag};
use super::{ApiError, MailApi};
use crate::bridge::mailbox::MessageFilter;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};

/// HTTP client for the backend REST API
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Send an authenticated request and reject non-2xx responses
    async fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<Response, ApiError> {
        let response = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl MailApi for ApiClient {
    async fn health(&self, token: &str) -> Result<(), ApiError> {
        self.request(Method::GET, "/health", token, &[]).await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        token: &str,
        filter: &MessageFilter,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageSummary>, ApiError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        if let Some(ref tag) = filter.tag {
            query.push(("tag", tag.clone()));
        }
        if let Some(ref exclude) = filter.exclude_tag {
            query.push(("excludeTag", exclude.clone()));
        }
        if let Some(archived) = filter.archived {
            query.push(("archived", archived.to_string()));
        }

        let page: MessagePage = self
            .request(Method::GET, "/messages", token, &query)
            .await?
            .json()
            .await?;
        Ok(page.items)
    }

    async fn get_message(&self, token: &str, id: &str) -> Result<MessageDetail, ApiError> {
        let path = format!("/messages/{}", id);
        Ok(self.request(Method::GET, &path, token, &[]).await?.json().await?)
    }

    async fn get_raw_message(&self, token: &str, id: &str) -> Option<Vec<u8>> {
        let path = format!("/messages/{}/raw", id);
        let response = match self.request(Method::GET, &path, token, &[]).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("No raw source for {}: {}", id, e);
                return None;
            }
        };
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::debug!("Failed to read raw source for {}: {}", id, e);
                None
            }
        }
    }

    async fn mark_read(&self, token: &str, id: &str) -> Result<(), ApiError> {
        // The backend marks a message read when its detail is fetched
        let path = format!("/messages/{}", id);
        self.request(Method::GET, &path, token, &[]).await?;
        Ok(())
    }

    async fn archive_message(&self, token: &str, id: &str) -> Result<(), ApiError> {
        let path = format!("/messages/{}/archive", id);
        self.request(Method::POST, &path, token, &[]).await?;
        Ok(())
    }

    async fn list_tags(&self, token: &str) -> Result<Vec<Tag>, ApiError> {
        Ok(self.request(Method::GET, "/tags", token, &[]).await?.json().await?)
    }
}
