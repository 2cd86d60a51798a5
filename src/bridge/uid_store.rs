use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// File name of the UID map inside the data directory
pub const UID_MAP_FILE: &str = "uid-map.json";

#[derive(Debug, thiserror::Error)]
pub enum UidStoreError {
    #[error("UID store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UID store encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace UID store file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Persisted UID allocation state for every mailbox
///
/// Stored as `{"uidValidity": .., "mailboxes": {name: {"nextUid": .., "map": {id: uid}}}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UidMapping {
    pub uid_validity: u64,
    #[serde(default)]
    pub mailboxes: HashMap<String, MailboxUids>,
}

impl UidMapping {
    /// Fresh mapping with a newly generated UIDVALIDITY
    pub fn fresh() -> Self {
        Self {
            uid_validity: Utc::now().timestamp().max(1) as u64,
            mailboxes: HashMap::new(),
        }
    }
}

/// UID allocation for one mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxUids {
    #[serde(default = "first_uid")]
    pub next_uid: u32,
    /// Backend message id -> UID
    #[serde(default)]
    pub map: HashMap<String, u32>,
}

fn first_uid() -> u32 {
    1
}

impl Default for MailboxUids {
    fn default() -> Self {
        Self {
            next_uid: first_uid(),
            map: HashMap::new(),
        }
    }
}

impl MailboxUids {
    /// Return the UID for `id`, allocating the next one on first sight
    fn assign(&mut self, id: &str) -> (u32, bool) {
        if let Some(&uid) = self.map.get(id) {
            return (uid, false);
        }
        let uid = self.next_uid;
        self.map.insert(id.to_string(), uid);
        self.next_uid += 1;
        (uid, true)
    }

    /// Restore `next_uid > max(uid)` for files edited by hand or older writers
    fn repair(&mut self) {
        let floor = self.map.values().max().map_or(1, |max| max + 1);
        if self.next_uid < floor {
            self.next_uid = floor;
        }
    }
}

/// Result of assigning UIDs for a mailbox listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// UIDs in the same order as the ids passed in
    pub uids: Vec<u32>,
    pub uid_validity: u64,
    pub uid_next: u32,
}

/// Process-wide UID store shared by every connection.
///
/// All mutations run under one lock as load-mutate-persist, so two
/// connections selecting the same mailbox always agree on the UID of a
/// message. Each mutation is written to a temporary file and renamed over
/// the previous one.
pub struct UidStore {
    path: PathBuf,
    data: Mutex<UidMapping>,
}

impl UidStore {
    /// Open (or create) the UID map in `data_dir`.
    ///
    /// A missing or unparseable file starts a fresh mapping with a new
    /// UIDVALIDITY, which tells clients to drop their cached UIDs.
    pub fn open(data_dir: &Path) -> Result<Self, UidStoreError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(UID_MAP_FILE);

        let loaded = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<UidMapping>(&content) {
                Ok(mapping) => Some(mapping),
                Err(e) => {
                    tracing::warn!("UID map {:?} is corrupt ({}), starting fresh", path, e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let store = match loaded {
            Some(mut mapping) => {
                mapping.mailboxes.values_mut().for_each(MailboxUids::repair);
                tracing::debug!(
                    "Loaded UID map with {} mailboxes (UIDVALIDITY {})",
                    mapping.mailboxes.len(),
                    mapping.uid_validity
                );
                Self {
                    path,
                    data: Mutex::new(mapping),
                }
            }
            None => {
                let store = Self {
                    path,
                    data: Mutex::new(UidMapping::fresh()),
                };
                store.persist(&store.lock())?;
                store
            }
        };

        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, UidMapping> {
        // Entries are only ever inserted, so a poisoned map is still consistent
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn uid_validity(&self) -> u64 {
        self.lock().uid_validity
    }

    /// Next UID that would be assigned in `mailbox`
    pub fn uid_next(&self, mailbox: &str) -> u32 {
        self.lock()
            .mailboxes
            .get(mailbox)
            .map_or(first_uid(), |m| m.next_uid)
    }

    /// Assign UIDs for `ids`, given oldest first.
    ///
    /// Ids seen before keep their UID; new ones get consecutive UIDs in the
    /// order given. The file is rewritten only when something was added.
    pub fn assign_uids<S: AsRef<str>>(
        &self,
        mailbox: &str,
        ids: &[S],
    ) -> Result<Assignment, UidStoreError> {
        let mut data = self.lock();
        let entry = data.mailboxes.entry(mailbox.to_string()).or_default();

        let mut changed = false;
        let uids = ids
            .iter()
            .map(|id| {
                let (uid, added) = entry.assign(id.as_ref());
                changed |= added;
                uid
            })
            .collect();
        let uid_next = entry.next_uid;

        if changed {
            self.persist(&data)?;
        }

        Ok(Assignment {
            uids,
            uid_validity: data.uid_validity,
            uid_next,
        })
    }

    fn persist(&self, data: &UidMapping) -> Result<(), UidStoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut file, data)?;
        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(&self.path)?;
        Ok(())
    }
}
