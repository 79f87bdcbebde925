//! Error types for the engine adapter.
//!
//! Two error domains exist. [`EngineCode`] is the translation of the numeric
//! codes the engine reports through its callbacks. [`CompositionError`] is the
//! vocabulary for consumers layering structured data over raw content
//! addressing; this crate never produces it itself. [`NodeError`] is what the
//! public API returns.

use thiserror::Error;

/// Raw engine code for a successful call.
pub const CODE_SUCCESS: i32 = 0;
/// Raw engine code: the repository could not be opened or created.
pub const CODE_REPO_CREATION_FAILED: i32 = 1;
/// Raw engine code: a name could not be resolved.
pub const CODE_RESOLVE_FAILED: i32 = 2;
/// Raw engine code: data could not be added.
pub const CODE_ADD_FAILED: i32 = 3;
/// Raw engine code: no reader could be obtained for a CID.
pub const CODE_CAT_FAILED: i32 = 4;
/// Raw engine code: reading content failed midway.
pub const CODE_READ_FAILED: i32 = 5;
/// Raw engine code: a CID could not be published.
pub const CODE_PUBLISH_FAILED: i32 = 6;
/// Raw engine code: pinning failed.
pub const CODE_PIN_FAILED: i32 = 7;
/// Raw engine code: unpinning failed.
pub const CODE_UNPIN_FAILED: i32 = 8;

/// A translated engine status code.
///
/// Engines speak in bare integers; those never travel past the node facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum EngineCode {
    /// The call succeeded.
    #[error("success")]
    Success,
    /// The repository could not be opened or created.
    #[error("failed to create IPFS repository")]
    RepoCreationFailed,
    /// A name could not be resolved.
    #[error("failed to resolve IPNS entry")]
    ResolveFailed,
    /// Data could not be added.
    #[error("failed to add data")]
    AddFailed,
    /// No reader could be obtained for the content.
    #[error("failed to get data reader")]
    CatFailed,
    /// Reading content failed.
    #[error("failed to read data")]
    ReadFailed,
    /// Publishing failed.
    #[error("failed to publish CID")]
    PublishFailed,
    /// Pinning failed.
    #[error("failed to pin")]
    PinFailed,
    /// Unpinning failed.
    #[error("failed to unpin")]
    UnpinFailed,
    /// A code this crate does not know about.
    #[error("unknown ipfs error ({0})")]
    Unknown(i32),
}

impl EngineCode {
    /// Translates a raw engine code.
    #[must_use]
    pub const fn from_raw(code: i32) -> Self {
        match code {
            CODE_SUCCESS => Self::Success,
            CODE_REPO_CREATION_FAILED => Self::RepoCreationFailed,
            CODE_RESOLVE_FAILED => Self::ResolveFailed,
            CODE_ADD_FAILED => Self::AddFailed,
            CODE_CAT_FAILED => Self::CatFailed,
            CODE_READ_FAILED => Self::ReadFailed,
            CODE_PUBLISH_FAILED => Self::PublishFailed,
            CODE_PIN_FAILED => Self::PinFailed,
            CODE_UNPIN_FAILED => Self::UnpinFailed,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw engine code.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Success => CODE_SUCCESS,
            Self::RepoCreationFailed => CODE_REPO_CREATION_FAILED,
            Self::ResolveFailed => CODE_RESOLVE_FAILED,
            Self::AddFailed => CODE_ADD_FAILED,
            Self::CatFailed => CODE_CAT_FAILED,
            Self::ReadFailed => CODE_READ_FAILED,
            Self::PublishFailed => CODE_PUBLISH_FAILED,
            Self::PinFailed => CODE_PIN_FAILED,
            Self::UnpinFailed => CODE_UNPIN_FAILED,
            Self::Unknown(code) => code,
        }
    }

    /// Returns true for [`EngineCode::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Errors for consumers composing structured data on top of content addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum CompositionError {
    /// A database could not be downloaded.
    #[error("database download failed")]
    DbDownloadFailed,
    /// A downloaded database has the wrong format.
    #[error("invalid database format")]
    InvalidDbFormat,
    /// A database entry could not be parsed.
    #[error("malformed database entry")]
    MalformedDbEntry,
    /// An entry points at content that is not linked.
    #[error("missing IPFS link to content")]
    MissingIpfsLink,
}

impl CompositionError {
    /// Returns the numeric code. Codes start at 1; 0 means success.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::DbDownloadFailed => 1,
            Self::InvalidDbFormat => 2,
            Self::MalformedDbEntry => 3,
            Self::MissingIpfsLink => 4,
        }
    }

    /// Looks up an error by numeric code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::DbDownloadFailed),
            2 => Some(Self::InvalidDbFormat),
            3 => Some(Self::MalformedDbEntry),
            4 => Some(Self::MissingIpfsLink),
            _ => None,
        }
    }
}

/// The main error type for node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A CID did not have the fixed textual length.
    #[error("invalid CID: expected {expected} bytes, got {len}")]
    InvalidCid {
        /// Length of the rejected input.
        len: usize,
        /// Required length.
        expected: usize,
    },

    /// A name to resolve was empty.
    #[error("name must not be empty")]
    EmptyName,

    /// The node is shutting down or has shut down.
    #[error("node has been stopped")]
    Stopped,

    /// The engine reported a failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineCode),

    /// The operation was cancelled or torn down before the engine answered.
    #[error("operation aborted")]
    Aborted,

    /// The engine could not report an identity for this node.
    #[error("node identity unavailable")]
    IdentityUnavailable,

    /// No usable event loop was available.
    #[error("event loop error: {0}")]
    Loop(#[from] crate::runtime::LoopError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Returns true if this is the distinguished aborted outcome.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the input was rejected before reaching the engine.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(self, Self::InvalidCid { .. } | Self::EmptyName)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
