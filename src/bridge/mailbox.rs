//! Virtual mailbox directory
//!
//! The backend has no folders, only tags and an archived bit. Every IMAP
//! mailbox name maps onto a filter over those two. The mapping is lossy:
//! Drafts is always empty and Trash is the same set as Archive.

/// Tag that no backend message ever carries
pub const NEVER_MATCH_TAG: &str = "__never_match__";

/// Prefix for mailboxes that expose a single backend tag
pub const TAG_FOLDER_PREFIX: &str = "Tags/";

/// Hierarchy delimiter announced in LIST and NAMESPACE
pub const DELIMITER: char = '/';

/// Backend listing criteria for one virtual mailbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Only messages carrying this tag (or a `tag/...` child)
    pub tag: Option<String>,
    /// Skip messages carrying this tag
    pub exclude_tag: Option<String>,
    /// Restrict on the archived bit; `None` leaves the backend default
    pub archived: Option<bool>,
}

impl MessageFilter {
    fn tagged(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            ..Self::default()
        }
    }
}

/// Resolve a mailbox name into backend filter criteria
pub fn filter_for(name: &str) -> MessageFilter {
    match name.to_uppercase().as_str() {
        "INBOX" => MessageFilter {
            tag: None,
            exclude_tag: Some("Spam".to_string()),
            archived: Some(false),
        },
        "SENT" => MessageFilter::tagged("Sent"),
        "SPAM" | "JUNK" => MessageFilter::tagged("Spam"),
        "ARCHIVE" | "TRASH" => MessageFilter {
            archived: Some(true),
            ..MessageFilter::default()
        },
        "DRAFTS" => MessageFilter::tagged(NEVER_MATCH_TAG),
        _ => MessageFilter {
            tag: Some(tag_name(name).to_string()),
            exclude_tag: None,
            archived: Some(false),
        },
    }
}

/// Strip the `Tags/` prefix; any other name is itself an implicit tag
fn tag_name(name: &str) -> &str {
    match name.get(..TAG_FOLDER_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(TAG_FOLDER_PREFIX) => {
            &name[TAG_FOLDER_PREFIX.len()..]
        }
        _ => name,
    }
}

/// Key under which UIDs for a mailbox are persisted.
///
/// Aliases that list the same backend set (JUNK/Spam, Trash/Archive) share
/// one key so that a message keeps its UID regardless of which alias the
/// client opened.
pub fn canonical_name(name: &str) -> String {
    match name.to_uppercase().as_str() {
        "INBOX" => "INBOX".to_string(),
        "SENT" => "Sent".to_string(),
        "SPAM" | "JUNK" => "Spam".to_string(),
        "ARCHIVE" | "TRASH" => "Archive".to_string(),
        "DRAFTS" => "Drafts".to_string(),
        _ => format!("{}{}", TAG_FOLDER_PREFIX, tag_name(name)),
    }
}

/// A mailbox as announced by LIST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub attributes: &'static str,
}

impl Folder {
    fn new(name: &str, attributes: &'static str) -> Self {
        Self {
            name: name.to_string(),
            attributes,
        }
    }
}

/// Fixed folders present for every account
pub fn system_folders() -> Vec<Folder> {
    vec![
        Folder::new("INBOX", ""),
        Folder::new("Sent", "\\Sent"),
        Folder::new("Spam", "\\Junk"),
        Folder::new("Archive", "\\Archive"),
        Folder::new("Drafts", "\\Drafts \\Noselect"),
    ]
}

/// System folders followed by one `Tags/<name>` folder per backend tag.
///
/// Tags already surfaced as a system folder (Sent, Spam) are skipped.
pub fn list_folders<S: AsRef<str>>(tags: &[S]) -> Vec<Folder> {
    let system = system_folders();
    let mut folders = system.clone();
    for tag in tags {
        let tag = tag.as_ref();
        if tag.is_empty() {
            continue;
        }
        if system.iter().any(|f| f.name.eq_ignore_ascii_case(tag)) {
            continue;
        }
        folders.push(Folder {
            name: format!("{}{}", TAG_FOLDER_PREFIX, tag),
            attributes: "",
        });
    }
    folders
}

/// Match a mailbox name against a LIST pattern.
///
/// `*` matches any run of characters, `%` any run without the hierarchy
/// delimiter. Comparison is case-insensitive.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    let mut wildcards: Vec<char> = Vec::new();
    for c in pattern.to_lowercase().chars() {
        let prev = wildcards.last().copied();
        match (prev, c) {
            // `**`, `*%` and `%*` all mean `*`; `%%` means `%`
            (Some('%'), '*') => {
                wildcards.pop();
                wildcards.push('*');
            }
            (Some('*' | '%'), '*' | '%') => {}
            _ => wildcards.push(c),
        }
    }
    let name: Vec<char> = name.to_lowercase().chars().collect();

    // row[j]: pattern[i..] matches name[j..], filled from the last pattern
    // char backwards so the whole match is O(pattern * name)
    let mut row = vec![false; name.len() + 1];
    row[name.len()] = true;
    for &p in wildcards.iter().rev() {
        let mut next = vec![false; name.len() + 1];
        for j in (0..=name.len()).rev() {
            next[j] = match p {
                '*' => row[j] || (j < name.len() && next[j + 1]),
                '%' => row[j] || (j < name.len() && name[j] != DELIMITER && next[j + 1]),
                c => j < name.len() && name[j] == c && row[j + 1],
            };
        }
        row = next;
    }
    row[0]
}
