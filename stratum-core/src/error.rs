//! Error types for topology and codec operations

use stratum_types::LbaRange;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Both GPT header copies failed validation. Each field names the
    /// header that failed and why; neither is silently preferred.
    #[error("corrupt partition table (primary: {primary}; backup: {backup})")]
    Corrupt { primary: String, backup: String },

    /// No recognized partition table. A normal outcome, distinct from
    /// `Corrupt`.
    #[error("no recognized partition table")]
    NoTable,

    #[error("insufficient space: requested {requested} sectors, largest free extent is {largest_free}")]
    InsufficientSpace { requested: u64, largest_free: u64 },

    #[error("duplicate partition name: {0:?}")]
    DuplicateName(String),

    #[error("duplicate partition GUID: {0}")]
    DuplicateUuid(Uuid),

    #[error("requested range {}..{} overlaps partition {existing}", requested.start, requested.end())]
    Overlap { requested: LbaRange, existing: u32 },

    #[error("invalid attribute flag value: {0:#x} (must be a single bit)")]
    InvalidFlag(u64),

    #[error("invalid partition type code: {0}")]
    InvalidTypeCode(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A rescan or reset is in flight for the device; the mutation was
    /// aborted with no state change.
    #[error("device is busy: {0}")]
    Busy(String),

    #[error("misaligned extent access at byte offset {offset}")]
    Misaligned { offset: u64 },

    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
