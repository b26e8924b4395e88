//! Error taxonomy for PBF decoding and encoding.

use osmerge_core::StoreError;
use thiserror::Error;

pub use crate::wire::WireError;

/// Errors raised while reading or writing a PBF stream.
///
/// Format errors are fatal to the current decode: iteration stops and no
/// partially decoded store is handed out.
#[derive(Debug, Error)]
pub enum PbfError {
    /// A protobuf wire-level decode failure.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The stream ended before any `OSMHeader` blob was decoded.
    #[error("missing OSMHeader block at the start of the stream")]
    MissingHeader,
    /// A second `OSMHeader` blob appeared after the first.
    #[error("encountered a second OSMHeader block")]
    DuplicateHeader,
    /// A blob header declared a type other than `OSMHeader`/`OSMData`.
    #[error("unknown blob type {found:?}")]
    UnknownBlobType {
        /// The declared type string.
        found: String,
    },
    /// A blob carried no zlib-compressed payload.
    #[error("blob has no zlib data")]
    NoZlibData,
    /// The zlib payload could not be inflated.
    #[error("failed to inflate blob payload: {source}")]
    Inflate {
        /// Decompressor error.
        #[source]
        source: std::io::Error,
    },
    /// The byte stream ended in the middle of a blob.
    #[error("byte stream ended inside a blob")]
    TruncatedStream,
    /// A tag or role referenced a string index outside the block's table.
    #[error("string index {index} outside table of {len} entries")]
    BadStringIndex {
        /// The out-of-range index.
        index: usize,
        /// Size of the block's string table.
        len: usize,
    },
    /// A relation member carried an unknown type discriminant.
    #[error("unknown relation member type {found}")]
    BadMemberType {
        /// The unrecognised discriminant.
        found: i64,
    },
    /// Parallel columns of a primitive group disagreed in length.
    #[error("primitive block columns disagree: {what}")]
    ColumnMismatch {
        /// Which columns disagreed.
        what: &'static str,
    },
    /// Writing the output stream failed.
    #[error("failed to write PBF output: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The entity store rejected decoded data.
    #[error(transparent)]
    Store(#[from] StoreError),
}
