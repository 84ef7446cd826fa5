use crate::tree::EntryKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("file or folder {0:?} already exists")]
    NameConflict(String),

    #[error("no such file or folder: {0:?}")]
    NotFound(String),

    #[error("{name:?} is a {found}, not a {expected}")]
    TypeMismatch {
        name: String,
        expected: EntryKind,
        found: EntryKind,
    },

    #[error("out of space: no free segment large enough")]
    OutOfSpace,

    #[error("address {0} does not name an allocated segment")]
    InvalidLocator(usize),

    #[error("no segment at {0}")]
    NoSuchSegment(usize),

    #[error("invalid name {0:?}: empty or contains a reserved character")]
    InvalidName(String),

    #[error("parse error at byte {offset}: {msg}")]
    Parse { offset: usize, msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
