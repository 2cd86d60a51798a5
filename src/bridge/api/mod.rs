//! Backend REST mail API
//!
//! The IMAP side only consumes this contract. Every call carries the bearer
//! token of the IMAP connection that issued it.

mod client;
mod types;

pub use client::ApiClient;
pub use types::{MessageDetail, MessageSummary, Tag};

use crate::bridge::mailbox::MessageFilter;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Page size used when walking a full mailbox listing
pub const PAGE_SIZE: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API {status}: {body}")]
    Status { status: u16, body: String },
}

/// Operations the bridge needs from the backend
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Lightweight probe, also validates the token
    async fn health(&self, token: &str) -> Result<(), ApiError>;

    /// One page of messages, newest first, strictly older than `before`
    async fn list_messages(
        &self,
        token: &str,
        filter: &MessageFilter,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageSummary>, ApiError>;

    async fn get_message(&self, token: &str, id: &str) -> Result<MessageDetail, ApiError>;

    /// Original RFC 5322 source, if the backend kept it
    async fn get_raw_message(&self, token: &str, id: &str) -> Option<Vec<u8>>;

    async fn mark_read(&self, token: &str, id: &str) -> Result<(), ApiError>;

    async fn archive_message(&self, token: &str, id: &str) -> Result<(), ApiError>;

    async fn list_tags(&self, token: &str) -> Result<Vec<Tag>, ApiError>;

    /// Every message matching `filter`, paging until the backend runs dry
    async fn list_all_messages(
        &self,
        token: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageSummary>, ApiError> {
        let mut all = Vec::new();
        let mut seen = HashSet::new();
        let mut before = None;

        loop {
            let page = self.list_messages(token, filter, before, PAGE_SIZE).await?;
            let page_len = page.len();
            let Some(last) = page.last() else {
                break;
            };
            before = Some(last.received_at);

            all.extend(page.into_iter().filter(|m| seen.insert(m.id.clone())));

            if page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(all)
    }
}

/// Backend handle bound to one authenticated IMAP connection
#[derive(Clone)]
pub struct ApiSession {
    api: Arc<dyn MailApi>,
    token: String,
}

impl ApiSession {
    pub fn new(api: Arc<dyn MailApi>, token: impl Into<String>) -> Self {
        Self {
            api,
            token: token.into(),
        }
    }

    pub async fn health(&self) -> Result<(), ApiError> {
        self.api.health(&self.token).await
    }

    pub async fn list_all_messages(
        &self,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageSummary>, ApiError> {
        self.api.list_all_messages(&self.token, filter).await
    }

    pub async fn get_message(&self, id: &str) -> Result<MessageDetail, ApiError> {
        self.api.get_message(&self.token, id).await
    }

    pub async fn get_raw_message(&self, id: &str) -> Option<Vec<u8>> {
        self.api.get_raw_message(&self.token, id).await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>, ApiError> {
        self.api.list_tags(&self.token).await
    }

    /// Propagate `\Seen` to the backend without waiting for it
    pub fn mark_read_in_background(&self, id: &str) {
        let session = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = session.api.mark_read(&session.token, &id).await {
                tracing::warn!("Failed to mark {} as read: {}", id, e);
            }
        });
    }

    /// Propagate `\Deleted` to the backend as an archive, without waiting
    pub fn archive_in_background(&self, id: &str) {
        let session = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = session.api.archive_message(&session.token, &id).await {
                tracing::warn!("Failed to archive {}: {}", id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves `total` messages, newest first, in pages
    struct PagedApi {
        total: i64,
        calls: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl MailApi for PagedApi {
        async fn health(&self, _token: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn list_messages(
            &self,
            _token: &str,
            _filter: &MessageFilter,
            before: Option<i64>,
            limit: usize,
        ) -> Result<Vec<MessageSummary>, ApiError> {
            self.calls.lock().unwrap().push(before);
            let start = before.unwrap_or(self.total + 1);
            Ok((1..start)
                .rev()
                .take(limit)
                .map(|n| MessageSummary {
                    id: format!("m{}", n),
                    received_at: n,
                    ..MessageSummary::default()
                })
                .collect())
        }

        async fn get_message(&self, _token: &str, _id: &str) -> Result<MessageDetail, ApiError> {
            Err(ApiError::Status {
                status: 404,
                body: String::new(),
            })
        }

        async fn get_raw_message(&self, _token: &str, _id: &str) -> Option<Vec<u8>> {
            None
        }

        async fn mark_read(&self, _token: &str, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn archive_message(&self, _token: &str, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn list_tags(&self, _token: &str) -> Result<Vec<Tag>, ApiError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_list_all_pages_until_short_page() {
        let api = PagedApi {
            total: 450,
            calls: Mutex::new(Vec::new()),
        };
        let all = api
            .list_all_messages("token", &MessageFilter::default())
            .await
            .unwrap();

        assert_eq!(all.len(), 450);
        assert_eq!(all[0].id, "m450");
        assert_eq!(all[449].id, "m1");
        assert_eq!(*api.calls.lock().unwrap(), vec![None, Some(251), Some(51)]);
    }

    #[tokio::test]
    async fn test_list_all_stops_on_empty_page() {
        let api = PagedApi {
            total: 400,
            calls: Mutex::new(Vec::new()),
        };
        let all = api
            .list_all_messages("token", &MessageFilter::default())
            .await
            .unwrap();

        assert_eq!(all.len(), 400);
        assert_eq!(api.calls.lock().unwrap().len(), 3);
    }
}
