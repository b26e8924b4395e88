//! Streaming reader and writer for the OSM PBF container format.
//!
//! A PBF file is a sequence of length-prefixed blobs: a 4-byte big-endian
//! size, a protobuf `BlobHeader` naming the blob type, then a protobuf
//! `Blob` carrying a zlib-compressed payload. The first blob decodes to a
//! header block, every later blob to a primitive block of dense nodes,
//! ways, and relations. [`BlockReader`] decodes that layout incrementally
//! from arbitrarily chunked input; [`writer`] re-serialises a store into
//! the same layout.

#![forbid(unsafe_code)]

mod error;
mod fileformat;
pub mod osmformat;
pub mod reader;
mod wire;
pub mod writer;

pub use error::{PbfError, WireError};
pub use osmformat::PrimitiveBlock;
pub use reader::{Block, BlockReader, from_bytes, read_osm};
pub use writer::{to_bytes, write_osm};
