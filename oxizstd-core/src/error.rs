//! Error types for OxiZstd operations.
//!
//! Every failure the engine can report belongs to a closed taxonomy
//! ([`ErrorCode`]). The richer [`ZstdError`] carries context for humans,
//! while [`ZstdError::code`] gives callers something stable to match on.

use std::fmt;
use std::io;
use thiserror::Error;

/// Closed taxonomy of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unspecified failure.
    Generic,
    /// The workspace could not be sized or allocated.
    MemoryAllocation,
    /// The parameter is not supported in this configuration.
    ParameterUnsupported,
    /// The parameter value lies outside its bounds.
    ParameterOutOfBound,
    /// The operation is not allowed at the current stream stage.
    StageWrong,
    /// The amount of input differs from what was pledged.
    SrcSizeWrong,
    /// The destination buffer is too small.
    DstSizeTooSmall,
    /// The dictionary does not match the frame.
    DictionaryWrong,
    /// The dictionary content is malformed.
    DictionaryCorrupted,
    /// Input data (frame or externally supplied sequences) is invalid.
    CorruptionDetected,
    /// The content checksum does not match.
    ChecksumWrong,
    /// A context was used before it was initialized.
    InitMissing,
    /// A buffer declared stable changed between calls.
    StabilityConditionNotRespected,
}

impl ErrorCode {
    /// Short stable name of the error kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Generic => "generic",
            ErrorCode::MemoryAllocation => "memory_allocation",
            ErrorCode::ParameterUnsupported => "parameter_unsupported",
            ErrorCode::ParameterOutOfBound => "parameter_outOfBound",
            ErrorCode::StageWrong => "stage_wrong",
            ErrorCode::SrcSizeWrong => "srcSize_wrong",
            ErrorCode::DstSizeTooSmall => "dstSize_tooSmall",
            ErrorCode::DictionaryWrong => "dictionary_wrong",
            ErrorCode::DictionaryCorrupted => "dictionary_corrupted",
            ErrorCode::CorruptionDetected => "corruption_detected",
            ErrorCode::ChecksumWrong => "checksum_wrong",
            ErrorCode::InitMissing => "init_missing",
            ErrorCode::StabilityConditionNotRespected => "stabilityCondition_notRespected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The main error type for OxiZstd operations.
#[derive(Debug, Error)]
pub enum ZstdError {
    /// I/O error from an underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic failure with a description.
    #[error("{message}")]
    Generic {
        /// Description of the failure.
        message: String,
    },

    /// Workspace allocation failed.
    #[error("Memory allocation failed: {needed} bytes requested")]
    MemoryAllocation {
        /// Number of bytes that were requested.
        needed: usize,
    },

    /// Parameter not supported.
    #[error("Unsupported parameter: {message}")]
    ParameterUnsupported {
        /// Description of the unsupported combination.
        message: String,
    },

    /// Parameter value outside its documented bounds.
    #[error("Parameter {param} out of bounds: {value} not in [{min}, {max}]")]
    ParameterOutOfBound {
        /// Parameter name.
        param: &'static str,
        /// Rejected value.
        value: i64,
        /// Lower bound (inclusive).
        min: i64,
        /// Upper bound (inclusive).
        max: i64,
    },

    /// API called out of order.
    #[error("Operation not allowed at this stage: {message}")]
    StageWrong {
        /// Description of the misuse.
        message: String,
    },

    /// Pledged source size not honoured.
    #[error("Source size mismatch: pledged {pledged}, got {actual}")]
    SrcSizeWrong {
        /// Size announced before compression.
        pledged: u64,
        /// Size actually consumed so far.
        actual: u64,
    },

    /// Destination buffer too small.
    #[error("Destination buffer too small: need {needed} bytes, have {available}")]
    DstSizeTooSmall {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },

    /// Dictionary does not match the frame.
    #[error("Wrong dictionary: {message}")]
    DictionaryWrong {
        /// Description of the mismatch.
        message: String,
    },

    /// Dictionary content is malformed.
    #[error("Corrupted dictionary: {message}")]
    DictionaryCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Corrupted input detected.
    #[error("Corrupted data at offset {offset}: {message}")]
    CorruptionDetected {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Content checksum mismatch.
    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumWrong {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed from the decoded content.
        computed: u32,
    },

    /// Context used before initialization.
    #[error("Context not initialized: {message}")]
    InitMissing {
        /// Description of what is missing.
        message: String,
    },

    /// Stable buffer moved or changed between calls.
    #[error("Stable buffer condition not respected: {message}")]
    StabilityConditionNotRespected {
        /// Description of the change.
        message: String,
    },
}

/// Result type alias for OxiZstd operations.
pub type Result<T> = std::result::Result<T, ZstdError>;

impl ZstdError {
    /// Taxonomy of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ZstdError::Io(_) | ZstdError::Generic { .. } => ErrorCode::Generic,
            ZstdError::MemoryAllocation { .. } => ErrorCode::MemoryAllocation,
            ZstdError::ParameterUnsupported { .. } => ErrorCode::ParameterUnsupported,
            ZstdError::ParameterOutOfBound { .. } => ErrorCode::ParameterOutOfBound,
            ZstdError::StageWrong { .. } => ErrorCode::StageWrong,
            ZstdError::SrcSizeWrong { .. } => ErrorCode::SrcSizeWrong,
            ZstdError::DstSizeTooSmall { .. } => ErrorCode::DstSizeTooSmall,
            ZstdError::DictionaryWrong { .. } => ErrorCode::DictionaryWrong,
            ZstdError::DictionaryCorrupted { .. } => ErrorCode::DictionaryCorrupted,
            ZstdError::CorruptionDetected { .. } => ErrorCode::CorruptionDetected,
            ZstdError::ChecksumWrong { .. } => ErrorCode::ChecksumWrong,
            ZstdError::InitMissing { .. } => ErrorCode::InitMissing,
            ZstdError::StabilityConditionNotRespected { .. } => ErrorCode::StabilityConditionNotRespected,
        }
    }

    /// Create a generic error.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Create a memory allocation error.
    pub fn memory_allocation(needed: usize) -> Self {
        Self::MemoryAllocation { needed }
    }

    /// Create an unsupported parameter error.
    pub fn parameter_unsupported(message: impl Into<String>) -> Self {
        Self::ParameterUnsupported {
            message: message.into(),
        }
    }

    /// Create an out-of-bound parameter error.
    pub fn parameter_out_of_bound(param: &'static str, value: i64, min: i64, max: i64) -> Self {
        Self::ParameterOutOfBound {
            param,
            value,
            min,
            max,
        }
    }

    /// Create a wrong-stage error.
    pub fn stage_wrong(message: impl Into<String>) -> Self {
        Self::StageWrong {
            message: message.into(),
        }
    }

    /// Create a source size mismatch error.
    pub fn src_size_wrong(pledged: u64, actual: u64) -> Self {
        Self::SrcSizeWrong { pledged, actual }
    }

    /// Create a destination-too-small error.
    pub fn dst_size_too_small(needed: usize, available: usize) -> Self {
        Self::DstSizeTooSmall { needed, available }
    }

    /// Create a wrong dictionary error.
    pub fn dictionary_wrong(message: impl Into<String>) -> Self {
        Self::DictionaryWrong {
            message: message.into(),
        }
    }

    /// Create a corrupted dictionary error.
    pub fn dictionary_corrupted(message: impl Into<String>) -> Self {
        Self::DictionaryCorrupted {
            message: message.into(),
        }
    }

    /// Create a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptionDetected {
            offset,
            message: message.into(),
        }
    }

    /// Create a checksum mismatch error.
    pub fn checksum_wrong(expected: u32, computed: u32) -> Self {
        Self::ChecksumWrong { expected, computed }
    }

    /// Create an init-missing error.
    pub fn init_missing(message: impl Into<String>) -> Self {
        Self::InitMissing {
            message: message.into(),
        }
    }

    /// Create a stable-buffer violation error.
    pub fn stability_not_respected(message: impl Into<String>) -> Self {
        Self::StabilityConditionNotRespected {
            message: message.into(),
        }
    }
}
