//! Core types for pubsync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::normalize_link;

/// Stable external identifier of a tracked account
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create a new AccountId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Stored as TEXT
impl sqlx::Type<sqlx::Sqlite> for AccountId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AccountId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AccountId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// One tracked content source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable external identifier
    pub id: AccountId,
    /// Human-readable name, used for export directories
    pub display_name: String,
    /// Whole history has been synced at least once
    pub completed: bool,
    /// Top-level messages synced so far
    pub message_count: u64,
    /// Individual items synced so far (always >= message_count)
    pub item_count: u64,
    /// Total reported by the remote on the last sync
    pub total_count: u64,
    /// Unix timestamp of the last sync that started from the newest page
    pub last_sync_time: Option<i64>,
    /// Whether public pagination is allowed for this account
    pub searchable: bool,
}

impl Account {
    /// A freshly discovered account with no sync history
    pub fn new(id: impl Into<AccountId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            completed: false,
            message_count: 0,
            item_count: 0,
            total_count: 0,
            last_sync_time: None,
            searchable: true,
        }
    }

    /// Fold the counters of a later sync into this record
    ///
    /// `completed` only ever turns on, message and item counts accumulate,
    /// the remote total keeps its maximum, and the newer sync time wins.
    pub fn merge_counters(&mut self, update: &Account) {
        self.completed |= update.completed;
        self.message_count += update.message_count;
        self.item_count += update.item_count;
        self.total_count = self.total_count.max(update.total_count);
        if update.last_sync_time.is_some() {
            self.last_sync_time = update.last_sync_time;
        }
    }
}

/// An item as returned by the page fetcher, before normalization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    /// Remote id of the parent message
    pub message_id: String,
    /// Position within the parent message, starting at 1
    pub sequence_index: u32,
    /// Item title
    pub title: String,
    /// Link as reported by the remote (may carry tracking parameters)
    pub link: String,
    /// Creation time in epoch seconds
    pub create_time: i64,
}

impl RawItem {
    /// Whether this item opens a new message
    pub fn starts_message(&self) -> bool {
        self.sequence_index == 1
    }
}

/// One cached content unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// `{message_id}:{sequence_index}`, unique within the account
    pub item_id: String,
    /// Owning account
    pub account_id: AccountId,
    /// Item title
    pub title: String,
    /// Normalized link, the dedup and payload key
    pub canonical_link: String,
    /// Creation time in epoch seconds
    pub create_time: i64,
    /// Position within the parent message
    pub sequence_index: u32,
    /// Set once the remote reports the item gone
    pub deleted: bool,
}

impl Item {
    /// Build a cache record from a fetched item
    pub fn from_raw(account_id: &AccountId, raw: &RawItem) -> Self {
        Self {
            item_id: format!("{}:{}", raw.message_id, raw.sequence_index),
            account_id: account_id.clone(),
            title: raw.title.clone(),
            canonical_link: normalize_link(&raw.link),
            create_time: raw.create_time,
            sequence_index: raw.sequence_index,
            deleted: false,
        }
    }
}

/// One page of a paginated listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Items newest first
    pub items: Vec<RawItem>,
    /// The remote has no further pages
    pub exhausted: bool,
    /// Total reported by the remote
    pub total_count: u64,
    /// Remote-provided cursor for the next page (privileged path only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u64>,
}

/// Which pagination path a page request goes through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPath {
    /// Public search, cursor counts messages
    Public,
    /// Credentialed listing, cursor counts items
    Privileged,
}

/// What the downloader fetches for each URL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Raw content page
    Content,
    /// Read/like counters and similar side data
    Metadata,
    /// Comment thread
    Comments,
    /// Content page fetched only to learn the owning account
    IdentityFix,
}

impl FetchMode {
    /// Storage key for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Content => "content",
            FetchMode::Metadata => "metadata",
            FetchMode::Comments => "comments",
            FetchMode::IdentityFix => "identity_fix",
        }
    }

    /// Parse a storage key back into a mode
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "content" => Some(FetchMode::Content),
            "metadata" => Some(FetchMode::Metadata),
            "comments" => Some(FetchMode::Comments),
            "identity_fix" => Some(FetchMode::IdentityFix),
            _ => None,
        }
    }
}

/// Classified outcome of a payload fetch
///
/// Transient and permanent failures are reported through `Err`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadResponse {
    /// Body retrieved
    Success {
        /// Raw body
        body: String,
        /// Owning account discovered in the body, if any
        corrected_account_id: Option<AccountId>,
    },
    /// The remote says the item no longer exists
    Deleted,
}

/// Raw fetched body for one item, keyed by canonical link and mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Canonical link of the item
    pub url: String,
    /// What was fetched
    pub mode: FetchMode,
    /// Raw body
    pub body: String,
    /// Owning account discovered while fetching
    pub corrected_account_id: Option<AccountId>,
    /// When the payload was stored
    pub fetched_at: DateTime<Utc>,
}

/// Pipeline phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Not running
    #[default]
    Idle,
    /// Paginating accounts into the cache
    Sync,
    /// Fetching missing payloads
    Download,
    /// Writing documents to the destination
    Export,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Sync => "sync",
            Phase::Download => "download",
            Phase::Export => "export",
        };
        f.write_str(name)
    }
}

/// Progress counters for one phase
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    /// Units done
    pub current: u64,
    /// Units planned
    pub total: u64,
    /// Free-form status line
    pub detail: String,
}

impl PhaseProgress {
    /// Reset to an empty record with a known total
    pub fn begin(total: u64) -> Self {
        Self {
            current: 0,
            total,
            detail: String::new(),
        }
    }
}

/// Severity of an operator-facing log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational
    Info,
    /// Something was skipped or degraded
    Warn,
    /// Something failed
    Error,
    /// A unit of work finished cleanly
    Success,
}

/// One entry in the pipeline's bounded log tail
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the entry was written
    pub time: DateTime<Utc>,
    /// Entry severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
}

/// Per-batch download tallies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSummary {
    /// URLs not yet at a terminal state
    pub pending: u64,
    /// URLs fetched successfully
    pub completed: u64,
    /// URLs that exhausted their retries
    pub failed: u64,
    /// URLs the remote reported as gone
    pub deleted: u64,
}

/// Event emitted by the downloader and the pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A download batch started
    #[serde(rename = "download:begin")]
    DownloadBegin {
        /// Worker pool width
        concurrency: usize,
        /// URLs in the batch
        total: usize,
    },

    /// One URL reached a terminal state
    #[serde(rename = "download:progress")]
    DownloadProgress {
        /// The URL
        url: String,
        /// Whether a payload was stored
        success: bool,
        /// Tallies after this URL
        summary: DownloadSummary,
    },

    /// The remote reported the item gone
    #[serde(rename = "download:deleted")]
    DownloadDeleted {
        /// The URL
        url: String,
    },

    /// A fetch attempt failed
    #[serde(rename = "download:exception")]
    DownloadException {
        /// The URL
        url: String,
        /// Error message
        message: String,
    },

    /// An identity-fix fetch learned the item's owning account
    #[serde(rename = "fix:fakeid")]
    FixFakeid {
        /// The URL
        url: String,
        /// Owning account reported by the content page
        corrected_account_id: AccountId,
    },

    /// The batch finished
    #[serde(rename = "download:finish")]
    DownloadFinish {
        /// Wall-clock duration of the batch
        elapsed_secs: u64,
        /// Final tallies
        summary: DownloadSummary,
    },

    /// The batch was stopped before finishing
    #[serde(rename = "download:stop")]
    DownloadStop {
        /// Tallies at the time all workers stopped
        summary: DownloadSummary,
    },

    /// The pipeline moved to another phase
    #[serde(rename = "pipeline:phase")]
    PhaseChanged {
        /// New phase
        phase: Phase,
        /// Account being worked on, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        account_id: Option<AccountId>,
    },

    /// One account went through sync, download and export
    #[serde(rename = "pipeline:account_completed")]
    AccountCompleted {
        /// The account
        account_id: AccountId,
        /// Items newly merged into the cache
        new_items: u64,
        /// Documents written
        exported: u64,
    },

    /// A round over all accounts finished
    #[serde(rename = "pipeline:round_completed")]
    RoundCompleted {
        /// Accounts visited this round
        accounts: usize,
    },

    /// The pipeline paused, by request or on its own
    #[serde(rename = "pipeline:paused")]
    Paused {
        /// Why the pipeline paused
        reason: String,
    },

    /// The pipeline resumed
    #[serde(rename = "pipeline:resumed")]
    Resumed,

    /// The pipeline stopped and cleared its state
    #[serde(rename = "pipeline:stopped")]
    Stopped,
}
