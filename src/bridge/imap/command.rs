//! IMAP command parsing

/// Parsed IMAP command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapCommand {
    pub tag: String,
    /// Command word, uppercased
    pub name: String,
    /// Everything after the command word, untouched
    pub args: String,
}

impl ImapCommand {
    /// Split an assembled command into tag, command word and arguments.
    ///
    /// Returns `None` when there is not even a tag and a command word.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_start();
        let (tag, rest) = line.split_once(' ')?;
        let rest = rest.trim_start();
        if tag.is_empty() || rest.is_empty() {
            return None;
        }

        let (name, args) = match rest.split_once(' ') {
            Some((name, args)) => (name, args.trim()),
            None => (rest.trim_end(), ""),
        };

        Some(ImapCommand {
            tag: tag.to_string(),
            name: name.to_uppercase(),
            args: args.to_string(),
        })
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_name(&self.name)
    }
}

/// Commands understood by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Capability,
    Login,
    Logout,
    Namespace,
    Id,
    Noop,
    List,
    Lsub,
    Status,
    Select,
    Examine,
    Close,
    Expunge,
    Fetch,
    Store,
    Search,
    Idle,
    Check,
    Uid,
}

impl CommandKind {
    /// Look up an (already uppercased) command word
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "CAPABILITY" => Self::Capability,
            "LOGIN" => Self::Login,
            "LOGOUT" => Self::Logout,
            "NAMESPACE" => Self::Namespace,
            "ID" => Self::Id,
            "NOOP" => Self::Noop,
            "LIST" => Self::List,
            "LSUB" => Self::Lsub,
            "STATUS" => Self::Status,
            "SELECT" => Self::Select,
            "EXAMINE" => Self::Examine,
            "CLOSE" => Self::Close,
            "EXPUNGE" => Self::Expunge,
            "FETCH" => Self::Fetch,
            "STORE" => Self::Store,
            "SEARCH" => Self::Search,
            "IDLE" => Self::Idle,
            "CHECK" => Self::Check,
            "UID" => Self::Uid,
            _ => return None,
        })
    }
}

/// Split an argument string into atoms, quoted strings and parenthesized
/// groups.
///
/// Quoted strings are returned without their quotes and with backslash
/// escapes resolved. Parenthesized groups are returned verbatim, parens
/// included, with nested groups and quoted parens matched.
pub fn tokenize(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\r' | '\n' | ')' => i += 1,
            '"' => {
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        i += 1;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                tokens.push(value);
                i += 1;
            }
            '(' => {
                let start = i;
                let mut depth = 0;
                let mut in_quotes = false;
                while i < chars.len() {
                    match chars[i] {
                        '\\' if in_quotes => i += 1,
                        '"' => in_quotes = !in_quotes,
                        '(' if !in_quotes => depth += 1,
                        ')' if !in_quotes => {
                            depth -= 1;
                            if depth == 0 {
                                i += 1;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                let end = i.min(chars.len());
                tokens.push(chars[start..end].iter().collect());
            }
            _ => {
                let start = i;
                let mut in_brackets = false;
                while i < chars.len() {
                    match chars[i] {
                        '[' => in_brackets = true,
                        ']' => in_brackets = false,
                        ' ' | ')' if !in_brackets => break,
                        _ => {}
                    }
                    i += 1;
                }
                tokens.push(chars[start..i].iter().collect());
            }
        }
    }

    tokens
}

/// Strip one level of surrounding parentheses, if present
pub fn strip_parens(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(s)
}

/// One end of a sequence range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqBound {
    Number(u32),
    /// `*`, the largest value in use
    Star,
}

impl SeqBound {
    fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            Some(SeqBound::Star)
        } else {
            s.parse().ok().map(SeqBound::Number)
        }
    }

    fn resolve(self, max: u32) -> u32 {
        match self {
            SeqBound::Number(n) => n,
            SeqBound::Star => max,
        }
    }
}

/// Sequence set for FETCH/STORE/SEARCH (e.g. "1", "1:5", "2,4:*")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<(SeqBound, SeqBound)>);

impl SequenceSet {
    /// Parse a sequence set string; any malformed part rejects the whole set
    pub fn parse(s: &str) -> Option<Self> {
        let mut ranges = Vec::new();

        for part in s.trim().split(',') {
            let range = match part.split_once(':') {
                Some((start, end)) => (SeqBound::parse(start)?, SeqBound::parse(end)?),
                None => {
                    let bound = SeqBound::parse(part)?;
                    (bound, bound)
                }
            };
            ranges.push(range);
        }

        Some(SequenceSet(ranges))
    }

    /// Expand against sequence numbers `1..=max`: ascending, deduplicated,
    /// clipped to the mailbox
    pub fn expand(&self, max: u32) -> Vec<u32> {
        let mut result = Vec::new();
        for &(start, end) in &self.0 {
            let (a, b) = (start.resolve(max), end.resolve(max));
            let lo = a.min(b).max(1);
            let hi = a.max(b).min(max);
            if lo <= hi {
                result.extend(lo..=hi);
            }
        }
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Whether `value` falls in the set, with `*` standing for `max`
    pub fn contains(&self, value: u32, max: u32) -> bool {
        self.0.iter().any(|&(start, end)| {
            let (a, b) = (start.resolve(max), end.resolve(max));
            value >= a.min(b) && value <= a.max(b)
        })
    }
}

/// A single FETCH data item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttr {
    Uid,
    Flags,
    InternalDate,
    Rfc822Size,
    Envelope,
    BodyStructure,
    /// Bare `BODY`: structure without extension data
    Body,
    /// `BODY[section]<partial>` or `BODY.PEEK[...]`
    BodySection {
        /// Section text as the client sent it
        section: String,
        peek: bool,
        /// `<offset.length>`
        partial: Option<(u32, u32)>,
    },
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Unknown(String),
}

impl FetchAttr {
    fn parse(token: &str) -> Self {
        let upper = token.to_uppercase();
        match upper.as_str() {
            "UID" => return FetchAttr::Uid,
            "FLAGS" => return FetchAttr::Flags,
            "INTERNALDATE" => return FetchAttr::InternalDate,
            "RFC822.SIZE" => return FetchAttr::Rfc822Size,
            "ENVELOPE" => return FetchAttr::Envelope,
            "BODYSTRUCTURE" => return FetchAttr::BodyStructure,
            "BODY" => return FetchAttr::Body,
            "RFC822" => return FetchAttr::Rfc822,
            "RFC822.HEADER" => return FetchAttr::Rfc822Header,
            "RFC822.TEXT" => return FetchAttr::Rfc822Text,
            _ => {}
        }

        let (peek, prefix_len) = if upper.starts_with("BODY.PEEK[") {
            (true, "BODY.PEEK[".len())
        } else if upper.starts_with("BODY[") {
            (false, "BODY[".len())
        } else {
            return FetchAttr::Unknown(token.to_string());
        };

        let Some(close) = token.rfind(']') else {
            return FetchAttr::Unknown(token.to_string());
        };
        if close < prefix_len {
            return FetchAttr::Unknown(token.to_string());
        }

        FetchAttr::BodySection {
            section: token[prefix_len..close].to_string(),
            peek,
            partial: parse_partial(&token[close + 1..]),
        }
    }

    /// Whether fetching this item sets `\Seen`
    pub fn marks_seen(&self) -> bool {
        matches!(
            self,
            FetchAttr::BodySection { peek: false, .. } | FetchAttr::Rfc822 | FetchAttr::Rfc822Text
        )
    }
}

/// Parse a `<offset.length>` suffix
fn parse_partial(s: &str) -> Option<(u32, u32)> {
    let inner = s.strip_prefix('<')?.strip_suffix('>')?;
    let (offset, length) = inner.split_once('.')?;
    Some((offset.parse().ok()?, length.parse().ok()?))
}

/// Parse a FETCH item list like "(FLAGS BODY.PEEK[HEADER.FIELDS (FROM)])",
/// a single item, or one of the ALL/FAST/FULL macros
pub fn parse_fetch_items(s: &str) -> Vec<FetchAttr> {
    let s = s.trim();
    let expanded = match s.to_uppercase().as_str() {
        "ALL" => "FLAGS INTERNALDATE RFC822.SIZE ENVELOPE",
        "FAST" => "FLAGS INTERNALDATE RFC822.SIZE",
        "FULL" => "FLAGS INTERNALDATE RFC822.SIZE ENVELOPE BODY",
        _ => strip_parens(s),
    };

    split_fetch_tokens(expanded)
        .into_iter()
        .map(FetchAttr::parse)
        .collect()
}

/// Split on spaces that are outside `[...]` and `<...>`
fn split_fetch_tokens(s: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in s.char_indices() {
        match c {
            '[' | '<' => depth += 1,
            ']' | '>' => depth = depth.saturating_sub(1),
            ' ' if depth == 0 => {
                if let Some(begin) = start.take() {
                    tokens.push(&s[begin..i]);
                }
                continue;
            }
            _ => {}
        }
        if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(begin) = start {
        tokens.push(&s[begin..]);
    }

    tokens
}

/// How STORE combines the given flags with the current ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Replace,
    Add,
    Remove,
}

/// STORE data item name, e.g. `+FLAGS.SILENT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAction {
    pub mode: StoreMode,
    pub silent: bool,
}

impl StoreAction {
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_uppercase();
        let (base, silent) = match upper.strip_suffix(".SILENT") {
            Some(base) => (base, true),
            None => (upper.as_str(), false),
        };
        let mode = match base {
            "FLAGS" => StoreMode::Replace,
            "+FLAGS" => StoreMode::Add,
            "-FLAGS" => StoreMode::Remove,
            _ => return None,
        };
        Some(StoreAction { mode, silent })
    }
}

/// System flags in their canonical spelling
pub const SYSTEM_FLAGS: &[&str] = &["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"];

/// Canonical spelling of a flag: system flags are matched case-insensitively
pub fn normalize_flag(flag: &str) -> String {
    SYSTEM_FLAGS
        .iter()
        .find(|f| f.eq_ignore_ascii_case(flag))
        .map(|f| f.to_string())
        .unwrap_or_else(|| flag.to_string())
}

/// Parse flags from tokens such as `(\Seen \Deleted)` or `\Seen`
pub fn parse_flag_list<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
    let mut flags: Vec<String> = Vec::new();
    for token in tokens {
        for flag in strip_parens(token.as_ref()).split_whitespace() {
            let flag = normalize_flag(flag);
            if !flags.contains(&flag) {
                flags.push(flag);
            }
        }
    }
    flags
}
