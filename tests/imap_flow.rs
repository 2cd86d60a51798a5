//! End-to-end IMAP conversations over a real TCP socket

use async_trait::async_trait;
use inboxer_bridge::bridge::api::{ApiError, MailApi, MessageDetail, MessageSummary, Tag};
use inboxer_bridge::bridge::mailbox::MessageFilter;
use inboxer_bridge::bridge::{run_imap_listener, BridgeContext, UidStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const TOKEN: &str = "goodtoken";

/// Backend with a fixed message set that records notifications
struct FakeBackend {
    messages: Vec<MessageDetail>,
    marked_read: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn new(ids: &[&str]) -> Self {
        let messages = ids
            .iter()
            .enumerate()
            .map(|(i, id)| MessageDetail {
                summary: MessageSummary {
                    id: id.to_string(),
                    received_at: 1_700_000_000_000 + i as i64,
                    subject: Some(format!("Message {}", id)),
                    from_addr: Some("sender@example.com".to_string()),
                    to_addr: Some("me@example.com".to_string()),
                    ..MessageSummary::default()
                },
                text_body: Some("Hello there".to_string()),
                html_body: Some("<p>Hello there</p>".to_string()),
                headers_json: None,
            })
            .collect();
        Self {
            messages,
            marked_read: Mutex::new(Vec::new()),
        }
    }

    fn marked_read(&self) -> Vec<String> {
        self.marked_read.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailApi for FakeBackend {
    async fn health(&self, token: &str) -> Result<(), ApiError> {
        if token == TOKEN {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 401,
                body: String::new(),
            })
        }
    }

    async fn list_messages(
        &self,
        _token: &str,
        filter: &MessageFilter,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageSummary>, ApiError> {
        if filter.archived == Some(true) || filter.tag.is_some() {
            return Ok(Vec::new());
        }
        let mut items: Vec<MessageSummary> = self
            .messages
            .iter()
            .map(|m| m.summary.clone())
            .filter(|m| before.map_or(true, |b| m.received_at < b))
            .collect();
        items.sort_by_key(|m| std::cmp::Reverse(m.received_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn get_message(&self, _token: &str, id: &str) -> Result<MessageDetail, ApiError> {
        self.messages
            .iter()
            .find(|m| m.id() == id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn get_raw_message(&self, _token: &str, _id: &str) -> Option<Vec<u8>> {
        None
    }

    async fn mark_read(&self, _token: &str, id: &str) -> Result<(), ApiError> {
        self.marked_read.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn archive_message(&self, _token: &str, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn list_tags(&self, _token: &str) -> Result<Vec<Tag>, ApiError> {
        Ok(Vec::new())
    }
}

struct TestClient {
    stream: BufReader<TcpStream>,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Self {
            stream: BufReader::new(stream),
        };
        let greeting = client.read_line().await;
        assert!(greeting.starts_with("* OK [CAPABILITY IMAP4rev1 IDLE NAMESPACE ID]"));
        client
    }

    async fn write(&mut self, data: &str) {
        self.stream.get_mut().write_all(data.as_bytes()).await.unwrap();
        self.stream.get_mut().flush().await.unwrap();
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_line(&mut line))
            .await
            .expect("timed out waiting for server")
            .unwrap();
        line
    }

    /// Send a command and collect every line up to its tagged completion
    async fn command(&mut self, tag: &str, command: &str) -> Vec<String> {
        self.write(&format!("{} {}\r\n", tag, command)).await;
        self.read_until_tagged(tag).await
    }

    async fn read_until_tagged(&mut self, tag: &str) -> Vec<String> {
        let prefix = format!("{} ", tag);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await;
            assert!(!line.is_empty(), "connection closed early");
            let done = line.starts_with(&prefix);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }
}

async fn start_bridge(backend: Arc<FakeBackend>) -> (std::net::SocketAddr, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(BridgeContext {
        api: backend,
        uid_store: Arc::new(UidStore::open(dir.path()).unwrap()),
        server_name: "Test bridge".to_string(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(run_imap_listener(listener, ctx));
    (addr, dir)
}

async fn wait_for_mark_read(backend: &FakeBackend, expected: usize) {
    for _ in 0..50 {
        if backend.marked_read().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_login_select_fetch() {
    let backend = Arc::new(FakeBackend::new(&["m1"]));
    let (addr, _dir) = start_bridge(backend.clone()).await;
    let mut client = TestClient::connect(addr).await;

    assert_eq!(client.command("a1", "LOGIN user goodtoken").await, vec!["a1 OK LOGIN completed\r\n"]);

    let select = client.command("a2", "SELECT INBOX").await;
    assert_eq!(select[0], "* 1 EXISTS\r\n");
    assert_eq!(select[1], "* 0 RECENT\r\n");
    assert!(select.iter().any(|l| l.starts_with("* OK [UIDVALIDITY ")));
    assert!(select.contains(&"* OK [UIDNEXT 2]\r\n".to_string()));
    assert_eq!(select.last().unwrap(), "a2 OK [READ-WRITE] SELECT completed\r\n");

    assert_eq!(
        client.command("a3", "UID FETCH 1 (FLAGS)").await,
        vec!["* 1 FETCH (FLAGS () UID 1)\r\n", "a3 OK UID FETCH completed\r\n"]
    );

    let body = client.command("a4", "FETCH 1 (BODY[])").await;
    assert!(body[0].starts_with("* 1 FETCH (BODY[] {"));
    assert!(body.contains(&"Content-Type: text/plain; charset=utf-8\r\n".to_string()));
    assert_eq!(body.last().unwrap(), "a4 OK FETCH completed\r\n");

    assert_eq!(
        client.command("a5", "FETCH 1 (FLAGS)").await,
        vec!["* 1 FETCH (FLAGS (\\Seen))\r\n", "a5 OK FETCH completed\r\n"]
    );

    wait_for_mark_read(&backend, 1).await;
    assert_eq!(backend.marked_read(), vec!["m1"]);

    let structure = client.command("a6", "FETCH 1 (BODYSTRUCTURE)").await;
    assert!(structure[0].ends_with(" \"alternative\"))\r\n"));

    let logout = client.command("a7", "LOGOUT").await;
    assert_eq!(logout, vec!["* BYE Test bridge logging out\r\n", "a7 OK LOGOUT completed\r\n"]);
    assert_eq!(client.read_line().await, "");
}

#[tokio::test]
async fn test_literal_split_across_writes() {
    let backend = Arc::new(FakeBackend::new(&[]));
    let (addr, _dir) = start_bridge(backend).await;
    let mut client = TestClient::connect(addr).await;

    client.write("a1 LOGIN user {9}\r\n").await;
    assert_eq!(client.read_line().await, "+ Ready\r\n");

    client.write("good").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write("token\r\n").await;

    assert_eq!(client.read_until_tagged("a1").await, vec!["a1 OK LOGIN completed\r\n"]);
}

#[tokio::test]
async fn test_uids_stable_across_connections() {
    let backend = Arc::new(FakeBackend::new(&["m1", "m2", "m3"]));
    let (addr, _dir) = start_bridge(backend).await;

    let mut first = TestClient::connect(addr).await;
    let mut second = TestClient::connect(addr).await;
    for client in [&mut first, &mut second] {
        client.command("a1", "LOGIN user goodtoken").await;
        let select = client.command("a2", "EXAMINE INBOX").await;
        assert_eq!(select.last().unwrap(), "a2 OK [READ-ONLY] EXAMINE completed\r\n");
        assert!(select.contains(&"* OK [UIDNEXT 4]\r\n".to_string()));
    }

    assert_eq!(
        second.command("a3", "UID SEARCH UNSEEN").await,
        vec!["* SEARCH 1 2 3\r\n", "a3 OK UID SEARCH completed\r\n"]
    );
}

#[tokio::test]
async fn test_bad_token_stays_unauthenticated() {
    let backend = Arc::new(FakeBackend::new(&["m1"]));
    let (addr, _dir) = start_bridge(backend).await;
    let mut client = TestClient::connect(addr).await;

    assert_eq!(
        client.command("a1", "LOGIN user nope").await,
        vec!["a1 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"]
    );
    assert_eq!(client.command("a2", "LIST \"\" *").await, vec!["a2 NO Not authenticated\r\n"]);
    assert_eq!(
        client.command("a3", "ID NIL").await,
        vec![
            format!("* ID (\"name\" \"Inboxer Bridge\" \"version\" \"{}\")\r\n", env!("CARGO_PKG_VERSION")),
            "a3 OK ID completed\r\n".to_string(),
        ]
    );
}
