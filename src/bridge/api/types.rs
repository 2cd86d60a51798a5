use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Message record as returned by the listing endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub received_at: i64,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_read: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from_addr: Option<String>,
    #[serde(default)]
    pub to_addr: Option<String>,
    #[serde(default)]
    pub date_header: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Full message record with bodies and original headers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub summary: MessageSummary,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    /// JSON-encoded map of header name to value
    #[serde(default)]
    pub headers_json: Option<String>,
}

impl MessageDetail {
    /// Detail built from listing data only, used when the detail call fails
    pub fn from_summary(summary: MessageSummary) -> Self {
        Self {
            summary,
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Decoded `headers_json`; missing or malformed input yields an empty map
    pub fn headers(&self) -> HashMap<String, String> {
        let Some(raw) = self.headers_json.as_deref() else {
            return HashMap::new();
        };
        match serde_json::from_str::<HashMap<String, serde_json::Value>>(raw) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(name, value)| match value {
                    serde_json::Value::String(s) => Some((name, s)),
                    serde_json::Value::Null => None,
                    other => Some((name, other.to_string())),
                })
                .collect(),
            Err(e) => {
                tracing::debug!("Ignoring malformed headers for {}: {}", self.id(), e);
                HashMap::new()
            }
        }
    }

    /// Case-insensitive header lookup; empty values count as absent
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers()
            .into_iter()
            .find(|(key, value)| key.eq_ignore_ascii_case(name) && !value.is_empty())
            .map(|(_, value)| value)
    }

    pub fn text_body(&self) -> Option<&str> {
        self.text_body.as_deref().filter(|b| !b.is_empty())
    }

    pub fn html_body(&self) -> Option<&str> {
        self.html_body.as_deref().filter(|b| !b.is_empty())
    }
}

/// Tag as returned by the tags endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// Listing page wrapper: `{ "items": [...] }`
#[derive(Debug, Deserialize)]
pub(super) struct MessagePage {
    #[serde(default)]
    pub items: Vec<MessageSummary>,
}

/// The backend stores booleans as SQLite integers in some records
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_accepts_integer_flags() {
        let json = r#"{"id":"m1","received_at":1700000000000,"is_read":1,"subject":"Hi","extra":true}"#;
        let summary: MessageSummary = serde_json::from_str(json).unwrap();
        assert!(summary.is_read);
        assert_eq!(summary.received_at, 1_700_000_000_000);

        let summary: MessageSummary =
            serde_json::from_str(r#"{"id":"m2","is_read":false}"#).unwrap();
        assert!(!summary.is_read);
    }

    #[test]
    fn test_detail_headers() {
        let json = r#"{
            "id": "m1",
            "text_body": "hello",
            "html_body": "",
            "headers_json": "{\"Message-Id\":\"<abc@x>\",\"In-Reply-To\":\"\"}"
        }"#;
        let detail: MessageDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.id(), "m1");
        assert_eq!(detail.header("message-id").as_deref(), Some("<abc@x>"));
        assert_eq!(detail.header("In-Reply-To"), None);
        assert_eq!(detail.text_body(), Some("hello"));
        assert_eq!(detail.html_body(), None);
    }

    #[test]
    fn test_malformed_headers_are_empty() {
        let detail = MessageDetail {
            headers_json: Some("not json".to_string()),
            ..MessageDetail::default()
        };
        assert!(detail.headers().is_empty());
    }
}
