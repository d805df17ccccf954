use thiserror::Error;

use crate::registry::CapabilityKind;

#[derive(Debug, Error)]
pub enum ExtError {
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("load error: {reason}")]
    LoadError { reason: String },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("no entry point `{0}` in module")]
    NoEntryPoint(String),

    #[error("incompatible extension: requires host ABI v{required}, host is v{actual}")]
    IncompatibleVersion { required: u32, actual: u32 },

    #[error("a {kind} named `{name}` is already registered")]
    NameConflict { kind: CapabilityKind, name: String },

    #[error("invalid signature for `{name}`: {reason}")]
    InvalidSignature { name: String, reason: String },

    /// `max == -1` means unbounded.
    #[error("`{name}` called with {given} argument(s), declared arity {min}..{max}")]
    ArityMismatch {
        name: String,
        given: usize,
        min: i32,
        max: i32,
    },

    #[error("no such {kind}: {name}")]
    NotFound { kind: CapabilityKind, name: String },

    #[error("extension backing `{0}` has been unloaded")]
    ExtensionUnloaded(String),

    #[error("load already in progress for {0}")]
    LoadInProgress(String),

    #[error("extension busy: {0} call(s) in flight")]
    Busy(usize),

    #[error("extension loading is disabled for this engine instance")]
    LoadingDisabled,

    #[error("extension already unloaded")]
    AlreadyUnloaded,

    #[error("`{capability}` reported a native error (code {code})")]
    NativeError { capability: String, code: i32 },

    #[error("`{capability}` produced a malformed result (tag {tag})")]
    MalformedResult { capability: String, tag: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtError>;
