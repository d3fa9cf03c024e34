//! # OxiZstd Core
//!
//! Core components shared by the OxiZstd crates:
//!
//! - [`bitstream`]: forward bit writer and backward bit reader
//! - [`error`]: the closed error taxonomy ([`ErrorCode`]) and [`ZstdError`]
//! - [`traits`]: streaming buffers and the [`StreamCompressor`] trait
//!
//! ## Example
//!
//! ```rust
//! use oxizstd_core::{ErrorCode, InBuffer, ZstdError};
//!
//! let input = InBuffer::new(b"payload");
//! assert_eq!(input.remaining().len(), 7);
//!
//! let err = ZstdError::stage_wrong("parameters are frozen");
//! assert_eq!(err.code(), ErrorCode::StageWrong);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bitstream;
pub mod error;
pub mod traits;

// Re-exports for convenience
pub use bitstream::{BitWriter, ReverseBitReader};
pub use error::{ErrorCode, Result, ZstdError};
pub use traits::{EndDirective, InBuffer, OutBuffer, StreamCompressor};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCode, Result, ZstdError};
    pub use crate::traits::{EndDirective, InBuffer, OutBuffer, StreamCompressor};
}
