//! IMAP session handler
use super::command::{
    normalize_flag, parse_fetch_items, parse_flag_list, strip_parens, tokenize, CommandKind,
    FetchAttr, ImapCommand, SequenceSet, StoreAction, StoreMode,
};
use super::framer::{CommandFramer, Frame};
use super::response;
use crate::bridge::api::{ApiSession, MailApi, MessageDetail, MessageSummary};
use crate::bridge::mailbox::{self, DELIMITER};
use crate::bridge::uid_store::{UidStore, UidStoreError};
use std::sync::Arc;

/// Longest argument text echoed into debug logs
const LOGGED_ARGS_LIMIT: usize = 100;

const SEEN: &str = "\\Seen";
const DELETED: &str = "\\Deleted";

/// Flags a SEARCH key can test, by keyword
const SEARCH_FLAG_KEYS: &[&str] = &["SEEN", "FLAGGED", "DELETED", "ANSWERED", "DRAFT"];

/// IMAP session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapState {
    /// Not authenticated
    NotAuthenticated,
    /// Authenticated but no mailbox selected
    Authenticated,
    /// Mailbox selected
    Selected,
    /// Logout requested
    Logout,
}

/// Failures that abort a single command. The connection answers
/// `BAD Internal error` and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    UidStore(#[from] UidStoreError),
}

/// One message of the selected mailbox
#[derive(Debug)]
pub struct MessageEntry {
    pub backend_id: String,
    pub uid: u32,
    /// 1-based position by ascending receive time, fixed at SELECT
    pub seq: u32,
    pub flags: Vec<String>,
    pub summary: MessageSummary,
    detail: Option<MessageDetail>,
    content: Option<Vec<u8>>,
}

impl MessageEntry {
    fn new(summary: MessageSummary, uid: u32, seq: u32) -> Self {
        let flags = if summary.is_read {
            vec![SEEN.to_string()]
        } else {
            Vec::new()
        };
        Self {
            backend_id: summary.id.clone(),
            uid,
            seq,
            flags,
            summary,
            detail: None,
            content: None,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Add a flag; returns whether it was absent
    pub fn add_flag(&mut self, flag: &str) -> bool {
        if self.has_flag(flag) {
            return false;
        }
        self.flags.push(flag.to_string());
        true
    }

    /// Full record, fetched once per snapshot. Falls back to the listing
    /// data if the backend cannot produce it.
    async fn detail(&mut self, api: &ApiSession) -> &MessageDetail {
        if self.detail.is_none() {
            match api.get_message(&self.backend_id).await {
                Ok(detail) => self.detail = Some(detail),
                Err(e) => tracing::warn!("Failed to load message {}: {}", self.backend_id, e),
            }
        }
        self.detail
            .get_or_insert_with(|| MessageDetail::from_summary(self.summary.clone()))
    }

    /// RFC 5322 bytes: the original source if the backend kept it,
    /// otherwise rebuilt from the record
    async fn content(&mut self, api: &ApiSession) -> &[u8] {
        if self.content.is_none() {
            let content = match api.get_raw_message(&self.backend_id).await {
                Some(raw) if !raw.is_empty() => raw,
                _ => response::synthesize_rfc5322(self.detail(api).await).into_bytes(),
            };
            self.content = Some(content);
        }
        self.content.as_deref().unwrap_or_default()
    }

    /// Data for `BODY[section]`
    async fn section(&mut self, api: &ApiSession, section: &str) -> Vec<u8> {
        let upper = section.to_uppercase();

        if !upper.is_empty() && upper.chars().all(|c| c.is_ascii_digit()) {
            let detail = self.detail(api).await;
            let part = match (detail.text_body(), detail.html_body(), upper.as_str()) {
                (Some(text), Some(_), "1") => Some(text),
                (Some(_), Some(html), "2") => Some(html),
                (Some(text), None, "1") => Some(text),
                (None, Some(html), "1") => Some(html),
                _ => None,
            };
            if let Some(part) = part {
                return part.as_bytes().to_vec();
            }
        }

        let content = self.content(api).await;
        match upper.as_str() {
            "HEADER" => response::split_message(content).0,
            "TEXT" => response::split_message(content).1.to_vec(),
            s if s.starts_with("HEADER.FIELDS") => response::extract_header_fields(content, section),
            _ => content.to_vec(),
        }
    }
}

/// Per-connection view of the selected mailbox
#[derive(Debug)]
pub struct MailboxSnapshot {
    pub name: String,
    pub read_only: bool,
    pub entries: Vec<MessageEntry>,
}

impl MailboxSnapshot {
    /// Indices of the entries addressed by a sequence set or UID set,
    /// in sequence order
    fn resolve(&self, set: &SequenceSet, use_uid: bool) -> Vec<usize> {
        if use_uid {
            let max_uid = self.entries.iter().map(|e| e.uid).max().unwrap_or(0);
            self.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| set.contains(e.uid, max_uid))
                .map(|(i, _)| i)
                .collect()
        } else {
            set.expand(self.entries.len() as u32)
                .into_iter()
                .map(|seq| (seq - 1) as usize)
                .collect()
        }
    }
}

/// IMAP session for one client connection
pub struct ImapSession {
    pub state: ImapState,
    api: Arc<dyn MailApi>,
    uid_store: Arc<UidStore>,
    server_name: String,
    /// Backend handle bound to the LOGIN token
    client: Option<ApiSession>,
    selected: Option<MailboxSnapshot>,
    /// Tag of the IDLE command waiting for DONE
    idle_tag: Option<String>,
    framer: CommandFramer,
}

impl ImapSession {
    pub fn new(api: Arc<dyn MailApi>, uid_store: Arc<UidStore>, server_name: &str) -> Self {
        Self {
            state: ImapState::NotAuthenticated,
            api,
            uid_store,
            server_name: server_name.to_string(),
            client: None,
            selected: None,
            idle_tag: None,
            framer: CommandFramer::new(),
        }
    }

    /// Generate the initial greeting
    pub fn greeting(&self) -> Vec<u8> {
        response::greeting(&self.server_name).into_bytes()
    }

    /// Process incoming IMAP data
    /// Returns (response_data, should_close)
    pub async fn process_input(&mut self, data: &[u8]) -> (Vec<u8>, bool) {
        self.framer.push(data);
        let mut out = Vec::new();

        while let Some(frame) = self.framer.next_frame() {
            match frame {
                Frame::Continuation => out.extend_from_slice(response::continuation("Ready").as_bytes()),
                Frame::TooLong(head) => {
                    let head = String::from_utf8_lossy(&head);
                    let tag = head.split_whitespace().next().unwrap_or("*");
                    tracing::warn!("Dropped oversized command from tag {}", tag);
                    out.extend_from_slice(response::bad(tag, "Command too long").as_bytes());
                }
                Frame::Command(line) => {
                    let line = String::from_utf8_lossy(&line).into_owned();
                    out.extend(self.handle_line(&line).await);
                    if self.state == ImapState::Logout {
                        return (out, true);
                    }
                }
            }
        }

        (out, false)
    }

    async fn handle_line(&mut self, line: &str) -> Vec<u8> {
        if let Some(tag) = self.idle_tag.take() {
            if line.trim().eq_ignore_ascii_case("DONE") {
                return response::ok(&tag, "IDLE completed").into_bytes();
            }
            tracing::debug!("Ignoring input while idling");
            self.idle_tag = Some(tag);
            return Vec::new();
        }

        if line.trim().is_empty() {
            return Vec::new();
        }

        let Some(cmd) = ImapCommand::parse(line) else {
            return response::untagged("BAD Invalid command").into_bytes();
        };

        tracing::debug!(
            tag = %cmd.tag,
            command = %cmd.name,
            args = %loggable_args(&cmd),
            "IMAP command"
        );

        match self.handle_command(&cmd).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!("{} failed: {}", cmd.name, e);
                response::bad(&cmd.tag, "Internal error").into_bytes()
            }
        }
    }

    /// Handle a parsed IMAP command
    async fn handle_command(&mut self, cmd: &ImapCommand) -> Result<Vec<u8>, SessionError> {
        let Some(kind) = cmd.kind() else {
            return Ok(response::bad(&cmd.tag, &format!("Unknown command {}", cmd.name)).into_bytes());
        };

        let reply = match kind {
            CommandKind::Capability => self.cmd_capability(cmd),
            CommandKind::Noop => self.cmd_noop(cmd),
            CommandKind::Logout => self.cmd_logout(cmd),
            CommandKind::Namespace => self.cmd_namespace(cmd),
            CommandKind::Id => self.cmd_id(cmd),
            CommandKind::Login => self.cmd_login(cmd).await,
            CommandKind::List => self.cmd_list(cmd, "LIST").await,
            CommandKind::Lsub => self.cmd_list(cmd, "LSUB").await,
            CommandKind::Status => self.cmd_status(cmd).await,
            CommandKind::Select => self.cmd_select(cmd, false).await?,
            CommandKind::Examine => self.cmd_select(cmd, true).await?,
            CommandKind::Close => self.cmd_close(cmd),
            CommandKind::Expunge => self.cmd_acknowledge(cmd, "EXPUNGE completed"),
            CommandKind::Check => self.cmd_acknowledge(cmd, "CHECK completed"),
            CommandKind::Idle => self.cmd_idle(cmd),
            CommandKind::Fetch => return Ok(self.cmd_fetch(cmd, false).await),
            CommandKind::Store => self.cmd_store(cmd, false),
            CommandKind::Search => self.cmd_search(cmd, false),
            CommandKind::Uid => return Ok(self.cmd_uid(cmd).await),
        };

        Ok(reply.into_bytes())
    }

    /// Backend handle, present once LOGIN succeeded
    fn authenticated(&self, cmd: &ImapCommand) -> Result<ApiSession, String> {
        match (&self.client, self.state) {
            (Some(client), ImapState::Authenticated | ImapState::Selected) => Ok(client.clone()),
            _ => Err(response::no(&cmd.tag, "Not authenticated")),
        }
    }

    fn cmd_capability(&self, cmd: &ImapCommand) -> String {
        let mut resp = response::capability();
        resp.push_str(&response::ok(&cmd.tag, "CAPABILITY completed"));
        resp
    }

    fn cmd_noop(&self, cmd: &ImapCommand) -> String {
        response::ok(&cmd.tag, "NOOP completed")
    }

    fn cmd_logout(&mut self, cmd: &ImapCommand) -> String {
        self.state = ImapState::Logout;
        self.selected = None;
        let mut resp = response::bye(&format!("{} logging out", self.server_name));
        resp.push_str(&response::ok(&cmd.tag, "LOGOUT completed"));
        resp
    }

    fn cmd_namespace(&self, cmd: &ImapCommand) -> String {
        if let Err(resp) = self.authenticated(cmd) {
            return resp;
        }
        let mut resp = response::untagged(&format!("NAMESPACE ((\"\" \"{}\")) NIL NIL", DELIMITER));
        resp.push_str(&response::ok(&cmd.tag, "NAMESPACE completed"));
        resp
    }

    fn cmd_id(&self, cmd: &ImapCommand) -> String {
        let mut resp = response::untagged(&format!(
            "ID (\"name\" \"Inboxer Bridge\" \"version\" \"{}\")",
            env!("CARGO_PKG_VERSION")
        ));
        resp.push_str(&response::ok(&cmd.tag, "ID completed"));
        resp
    }

    async fn cmd_login(&mut self, cmd: &ImapCommand) -> String {
        if self.state != ImapState::NotAuthenticated {
            return response::bad(&cmd.tag, "Already authenticated");
        }

        let args = tokenize(&cmd.args);
        if args.len() < 2 {
            return response::bad(&cmd.tag, "Missing username or password");
        }

        let client = ApiSession::new(self.api.clone(), args[1].as_str());
        match client.health().await {
            Ok(()) => {
                tracing::info!("Client authenticated as {}", args[0]);
                self.client = Some(client);
                self.state = ImapState::Authenticated;
                response::ok(&cmd.tag, "LOGIN completed")
            }
            Err(e) => {
                tracing::warn!("Login rejected: {}", e);
                response::no(&cmd.tag, "[AUTHENTICATIONFAILED] Invalid credentials")
            }
        }
    }

    async fn cmd_list(&self, cmd: &ImapCommand, keyword: &str) -> String {
        let client = match self.authenticated(cmd) {
            Ok(client) => client,
            Err(resp) => return resp,
        };

        let args = tokenize(&cmd.args);
        if args.len() < 2 {
            return response::bad(&cmd.tag, "Missing reference or mailbox pattern");
        }

        let mut resp = String::new();
        if args[1].is_empty() {
            resp.push_str(&response::untagged(&format!(
                "{} (\\Noselect) \"{}\" \"\"",
                keyword, DELIMITER
            )));
        } else {
            let pattern = format!("{}{}", args[0], args[1]);
            let tags: Vec<String> = match client.list_tags().await {
                Ok(tags) => tags.into_iter().map(|t| t.name).collect(),
                Err(e) => {
                    tracing::warn!("Failed to list tags: {}", e);
                    Vec::new()
                }
            };

            for folder in mailbox::list_folders(&tags) {
                if mailbox::glob_matches(&pattern, &folder.name) {
                    resp.push_str(&response::untagged(&format!(
                        "{} ({}) \"{}\" {}",
                        keyword,
                        folder.attributes,
                        DELIMITER,
                        response::quote_string(Some(folder.name.as_str()))
                    )));
                }
            }
        }

        resp.push_str(&response::ok(&cmd.tag, &format!("{} completed", keyword)));
        resp
    }

    async fn cmd_status(&self, cmd: &ImapCommand) -> String {
        let client = match self.authenticated(cmd) {
            Ok(client) => client,
            Err(resp) => return resp,
        };

        let args = tokenize(&cmd.args);
        let Some(name) = args.first() else {
            return response::bad(&cmd.tag, "Missing mailbox name");
        };
        let requested: Vec<String> = match args.get(1) {
            Some(items) => strip_parens(items)
                .split_whitespace()
                .map(str::to_uppercase)
                .collect(),
            None => ["MESSAGES", "UNSEEN", "UIDVALIDITY", "UIDNEXT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let items = match client.list_all_messages(&mailbox::filter_for(name)).await {
            Ok(messages) => {
                let unseen = messages.iter().filter(|m| !m.is_read).count();
                let uid_next = self.uid_store.uid_next(&mailbox::canonical_name(name));
                requested
                    .iter()
                    .filter_map(|item| match item.as_str() {
                        "MESSAGES" => Some(format!("MESSAGES {}", messages.len())),
                        "RECENT" => Some("RECENT 0".to_string()),
                        "UNSEEN" => Some(format!("UNSEEN {}", unseen)),
                        "UIDVALIDITY" => Some(format!("UIDVALIDITY {}", self.uid_store.uid_validity())),
                        "UIDNEXT" => Some(format!("UIDNEXT {}", uid_next)),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Err(e) => {
                tracing::warn!("STATUS {} failed: {}", name, e);
                "MESSAGES 0 UNSEEN 0".to_string()
            }
        };

        let mut resp = response::untagged(&format!(
            "STATUS {} ({})",
            response::quote_string(Some(name.as_str())),
            items
        ));
        resp.push_str(&response::ok(&cmd.tag, "STATUS completed"));
        resp
    }

    async fn cmd_select(&mut self, cmd: &ImapCommand, read_only: bool) -> Result<String, SessionError> {
        let client = match self.authenticated(cmd) {
            Ok(client) => client,
            Err(resp) => return Ok(resp),
        };

        let args = tokenize(&cmd.args);
        let Some(name) = args.first() else {
            return Ok(response::bad(&cmd.tag, "Missing mailbox name"));
        };

        // A failed SELECT leaves no mailbox selected
        self.selected = None;
        self.state = ImapState::Authenticated;

        let mut messages = match client.list_all_messages(&mailbox::filter_for(name)).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("{} {} failed: {}", cmd.name, name, e);
                return Ok(response::no(&cmd.tag, &format!("{} failed", cmd.name)));
            }
        };
        messages.sort_by_key(|m| m.received_at);

        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        let assignment = self
            .uid_store
            .assign_uids(&mailbox::canonical_name(name), &ids)?;

        let entries: Vec<MessageEntry> = messages
            .into_iter()
            .zip(assignment.uids)
            .enumerate()
            .map(|(i, (summary, uid))| MessageEntry::new(summary, uid, i as u32 + 1))
            .collect();
        let first_unseen = entries.iter().find(|e| !e.has_flag(SEEN)).map(|e| e.seq);

        let mut resp = response::mailbox_status(
            entries.len() as u32,
            first_unseen,
            assignment.uid_validity,
            assignment.uid_next,
        );
        resp.push_str(&response::ok(
            &cmd.tag,
            &format!(
                "[{}] {} completed",
                if read_only { "READ-ONLY" } else { "READ-WRITE" },
                cmd.name
            ),
        ));

        tracing::info!("Selected {} ({} messages)", name, entries.len());
        self.selected = Some(MailboxSnapshot {
            name: name.clone(),
            read_only,
            entries,
        });
        self.state = ImapState::Selected;

        Ok(resp)
    }

    fn cmd_close(&mut self, cmd: &ImapCommand) -> String {
        if self.state != ImapState::Selected {
            return response::no(&cmd.tag, "No mailbox selected");
        }
        if let Some(snapshot) = self.selected.take() {
            tracing::debug!("Closed {}", snapshot.name);
        }
        self.state = ImapState::Authenticated;
        response::ok(&cmd.tag, "CLOSE completed")
    }

    /// Commands with nothing to do beyond answering OK in SELECTED state
    fn cmd_acknowledge(&self, cmd: &ImapCommand, message: &str) -> String {
        if self.state != ImapState::Selected {
            return response::no(&cmd.tag, "No mailbox selected");
        }
        response::ok(&cmd.tag, message)
    }

    fn cmd_idle(&mut self, cmd: &ImapCommand) -> String {
        if self.state != ImapState::Selected {
            return response::no(&cmd.tag, "No mailbox selected");
        }
        self.idle_tag = Some(cmd.tag.clone());
        response::continuation("idling")
    }

    async fn cmd_uid(&mut self, cmd: &ImapCommand) -> Vec<u8> {
        let (subcommand, args) = cmd.args.split_once(' ').unwrap_or((cmd.args.as_str(), ""));
        let sub = ImapCommand {
            tag: cmd.tag.clone(),
            name: subcommand.to_uppercase(),
            args: args.trim().to_string(),
        };

        match sub.kind() {
            Some(CommandKind::Fetch) => self.cmd_fetch(&sub, true).await,
            Some(CommandKind::Store) => self.cmd_store(&sub, true).into_bytes(),
            Some(CommandKind::Search) => self.cmd_search(&sub, true).into_bytes(),
            _ => response::bad(&cmd.tag, "Unknown UID subcommand").into_bytes(),
        }
    }

    async fn cmd_fetch(&mut self, cmd: &ImapCommand, use_uid: bool) -> Vec<u8> {
        let completed = completion(use_uid, "FETCH");
        let (Some(client), Some(snapshot)) = (self.client.clone(), self.selected.as_mut()) else {
            return response::no(&cmd.tag, "No mailbox selected").into_bytes();
        };

        let Some((set, items)) = cmd.args.split_once(' ') else {
            return response::bad(&cmd.tag, "Missing sequence set or data items").into_bytes();
        };
        let Some(set) = SequenceSet::parse(set) else {
            return response::bad(&cmd.tag, "Invalid sequence set").into_bytes();
        };
        let items = parse_fetch_items(items);
        let marks_seen = !snapshot.read_only && items.iter().any(FetchAttr::marks_seen);

        let mut resp = Vec::new();
        for index in snapshot.resolve(&set, use_uid) {
            let entry = &mut snapshot.entries[index];

            if marks_seen && entry.add_flag(SEEN) {
                client.mark_read_in_background(&entry.backend_id);
            }

            let parts = fetch_items(entry, &client, &items, use_uid).await;
            resp.extend(response::fetch_response(entry.seq, &parts));
        }

        resp.extend_from_slice(response::ok(&cmd.tag, &completed).as_bytes());
        resp
    }

    fn cmd_store(&mut self, cmd: &ImapCommand, use_uid: bool) -> String {
        let completed = completion(use_uid, "STORE");
        let (Some(client), Some(snapshot)) = (self.client.clone(), self.selected.as_mut()) else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        let args = tokenize(&cmd.args);
        if args.len() < 3 {
            return response::bad(&cmd.tag, "Missing arguments");
        }
        let Some(set) = SequenceSet::parse(&args[0]) else {
            return response::bad(&cmd.tag, "Invalid sequence set");
        };
        let Some(action) = StoreAction::parse(&args[1]) else {
            return response::bad(&cmd.tag, "Invalid STORE data item");
        };
        if snapshot.read_only {
            return response::no(&cmd.tag, "[READ-ONLY] Mailbox is read-only");
        }
        let flags = parse_flag_list(&args[2..]);

        let mut resp = String::new();
        for index in snapshot.resolve(&set, use_uid) {
            let entry = &mut snapshot.entries[index];
            let had_seen = entry.has_flag(SEEN);
            let had_deleted = entry.has_flag(DELETED);

            match action.mode {
                StoreMode::Replace => entry.flags = flags.clone(),
                StoreMode::Add => {
                    for flag in &flags {
                        entry.add_flag(flag);
                    }
                }
                StoreMode::Remove => entry.flags.retain(|f| !flags.contains(f)),
            }

            if !had_seen && entry.has_flag(SEEN) {
                client.mark_read_in_background(&entry.backend_id);
            }
            if !had_deleted && entry.has_flag(DELETED) {
                client.archive_in_background(&entry.backend_id);
            }

            if !action.silent {
                let mut echo = format!("FLAGS {}", response::format_flags(&entry.flags));
                if use_uid {
                    echo.push_str(&format!(" UID {}", entry.uid));
                }
                resp.push_str(&response::untagged(&format!("{} FETCH ({})", entry.seq, echo)));
            }
        }

        resp.push_str(&response::ok(&cmd.tag, &completed));
        resp
    }

    fn cmd_search(&self, cmd: &ImapCommand, use_uid: bool) -> String {
        let Some(snapshot) = self.selected.as_ref() else {
            return response::no(&cmd.tag, "No mailbox selected");
        };

        // Each flag key narrows the result; other keys are ignored
        let mut tests: Vec<(String, bool)> = Vec::new();
        let mut negate = false;
        for word in cmd.args.to_uppercase().split_whitespace() {
            if word == "NOT" {
                negate = true;
                continue;
            }
            if let Some((flag, present)) = search_flag(word) {
                tests.push((flag, present != negate));
            }
            negate = false;
        }

        let ids: Vec<String> = snapshot
            .entries
            .iter()
            .filter(|e| tests.iter().all(|(flag, present)| e.has_flag(flag) == *present))
            .map(|e| (if use_uid { e.uid } else { e.seq }).to_string())
            .collect();

        let mut resp = if ids.is_empty() {
            response::untagged("SEARCH")
        } else {
            response::untagged(&format!("SEARCH {}", ids.join(" ")))
        };
        resp.push_str(&response::ok(&cmd.tag, &completion(use_uid, "SEARCH")));
        resp
    }
}

/// Build the FETCH data items for one message, in request order
async fn fetch_items(
    entry: &mut MessageEntry,
    client: &ApiSession,
    items: &[FetchAttr],
    use_uid: bool,
) -> Vec<Vec<u8>> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    let mut uid_sent = false;

    for item in items {
        let part = match item {
            FetchAttr::Uid => {
                uid_sent = true;
                format!("UID {}", entry.uid).into_bytes()
            }
            FetchAttr::Flags => format!("FLAGS {}", response::format_flags(&entry.flags)).into_bytes(),
            FetchAttr::InternalDate => format!(
                "INTERNALDATE {}",
                response::format_internal_date(&response::timestamp_to_datetime(
                    entry.summary.received_at
                ))
            )
            .into_bytes(),
            FetchAttr::Rfc822Size => {
                format!("RFC822.SIZE {}", entry.content(client).await.len()).into_bytes()
            }
            FetchAttr::Envelope => {
                format!("ENVELOPE {}", response::build_envelope(entry.detail(client).await))
                    .into_bytes()
            }
            FetchAttr::BodyStructure => format!(
                "BODYSTRUCTURE {}",
                response::build_body_structure(entry.detail(client).await)
            )
            .into_bytes(),
            FetchAttr::Body => {
                format!("BODY {}", response::build_body_structure(entry.detail(client).await))
                    .into_bytes()
            }
            FetchAttr::BodySection {
                section, partial, ..
            } => {
                let data = entry.section(client, section).await;
                let mut label = format!("BODY[{}]", section);
                let data = match partial {
                    Some((offset, length)) => {
                        label.push_str(&format!("<{}>", offset));
                        let start = (*offset as usize).min(data.len());
                        let end = start.saturating_add(*length as usize).min(data.len());
                        data[start..end].to_vec()
                    }
                    None => data,
                };
                labelled_literal(&label, &data)
            }
            FetchAttr::Rfc822 => labelled_literal("RFC822", entry.content(client).await),
            FetchAttr::Rfc822Header => {
                let (header, _) = response::split_message(entry.content(client).await);
                labelled_literal("RFC822.HEADER", &header)
            }
            FetchAttr::Rfc822Text => {
                let (_, body) = response::split_message(entry.content(client).await);
                labelled_literal("RFC822.TEXT", body)
            }
            FetchAttr::Unknown(name) => {
                tracing::debug!("Skipping unsupported FETCH item {}", name);
                continue;
            }
        };
        parts.push(part);
    }

    if use_uid && !uid_sent {
        parts.push(format!("UID {}", entry.uid).into_bytes());
    }

    parts
}

fn labelled_literal(label: &str, data: &[u8]) -> Vec<u8> {
    let mut part = format!("{} ", label).into_bytes();
    part.extend(response::literal(data));
    part
}

/// Tagged completion text, e.g. "UID FETCH completed"
fn completion(use_uid: bool, command: &str) -> String {
    if use_uid {
        format!("UID {} completed", command)
    } else {
        format!("{} completed", command)
    }
}

/// Map a SEARCH key to the flag it tests and whether the flag must be set
fn search_flag(word: &str) -> Option<(String, bool)> {
    let flag = |key: &str| normalize_flag(&format!("\\{}", key));
    if SEARCH_FLAG_KEYS.contains(&word) {
        return Some((flag(word), true));
    }
    let key = word.strip_prefix("UN")?;
    SEARCH_FLAG_KEYS.contains(&key).then(|| (flag(key), false))
}

/// Command arguments safe for logs: LOGIN carries a bearer token
fn loggable_args(cmd: &ImapCommand) -> String {
    if cmd.kind() == Some(CommandKind::Login) {
        return "<redacted>".to_string();
    }
    cmd.args.chars().take(LOGGED_ARGS_LIMIT).collect()
}
