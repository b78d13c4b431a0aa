use thiserror::Error;

use crate::right::Right;

pub type Result<T> = std::result::Result<T, SgroupsError>;

/// Broad classification of errors, used by callers to choose a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any write
    Validation,
    /// The user lacks the required right
    Authorization,
    /// The mutation would break an invariant of the hierarchy
    Consistency,
    NotFound,
    /// Backing store or remote source failure
    External,
}

#[derive(Error, Debug)]
pub enum SgroupsError {
    #[error("invalid sgroup id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("invalid attributes: {0}")]
    InvalidAttrs(String),

    #[error("invalid remote query: {0}")]
    InvalidRemoteQuery(String),

    #[error("invalid periodicity {0:?}")]
    InvalidPeriodicity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no {right} right on sgroup {id:?}")]
    NoRight { id: String, right: Right },

    #[error("{0}")]
    Forbidden(String),

    #[error("recursive membership not allowed: {subject} would include {id:?}")]
    RecursiveMembership { id: String, subject: String },

    #[error("members not allowed for stems ({0:?})")]
    StemNoMembers(String),

    #[error("members of synchronized group {0:?} come from its remote query")]
    SynchronizedGroupMembers(String),

    #[error("can not remove stem with existing children ({0:?})")]
    DeleteNonEmptyStem(String),

    #[error("sgroup {0:?} does not exist")]
    SgroupNotFound(String),

    #[error("unknown remote {0:?}")]
    UnknownRemote(String),

    #[error("unknown subject source {0:?}")]
    UnknownSubjectSource(String),

    #[error("remote query failed: {0}")]
    RemoteQuery(String),

    #[error("backing store error: {0}")]
    BackingStore(#[from] directory::DirectoryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SgroupsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SgroupsError::InvalidId { .. }
            | SgroupsError::InvalidAttrs(_)
            | SgroupsError::InvalidRemoteQuery(_)
            | SgroupsError::InvalidPeriodicity(_)
            | SgroupsError::Config(_)
            | SgroupsError::Yaml(_) => ErrorKind::Validation,
            SgroupsError::NoRight { .. } | SgroupsError::Forbidden(_) => ErrorKind::Authorization,
            SgroupsError::RecursiveMembership { .. }
            | SgroupsError::StemNoMembers(_)
            | SgroupsError::SynchronizedGroupMembers(_)
            | SgroupsError::DeleteNonEmptyStem(_) => ErrorKind::Consistency,
            SgroupsError::SgroupNotFound(_)
            | SgroupsError::UnknownRemote(_)
            | SgroupsError::UnknownSubjectSource(_) => ErrorKind::NotFound,
            SgroupsError::RemoteQuery(_)
            | SgroupsError::BackingStore(_)
            | SgroupsError::Io(_)
            | SgroupsError::Json(_) => ErrorKind::External,
        }
    }
}
