//! Incremental PBF block reader.
//!
//! [`BlockReader`] is an explicit state machine driven by the caller:
//! every [`BlockReader::feed`] consumes as many complete blobs as the
//! buffered bytes allow and returns the decoded blocks. Chunk boundaries
//! are arbitrary; bytes left over from one chunk are spliced with the
//! next. Running out of bytes mid-state suspends the machine, it never
//! errors — truncation is only diagnosed by [`BlockReader::finish`].

use std::io::Read;

use log::debug;
use osmerge_core::{Header, Osm};

use crate::error::PbfError;
use crate::fileformat::{
    BLOB_TYPE_DATA, BLOB_TYPE_HEADER, decode_blob_header, decode_blob_payload,
};
use crate::osmformat::{PrimitiveBlock, decode_header_block, decode_primitive_block};

/// Size of the big-endian blob-header length prefix.
const LENGTH_PREFIX_BYTES: usize = 4;
/// Chunk size used when draining an `io::Read` source.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// One decoded block of a PBF stream.
#[derive(Debug)]
pub enum Block {
    /// The file header; exactly one per stream, always first.
    Header(Header),
    /// A batch of dense nodes, ways, and relations.
    Primitives(PrimitiveBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Expecting a 4-byte big-endian blob-header length.
    Length,
    /// Expecting the blob header message.
    BlobHeader,
    /// Expecting the blob payload.
    Blob,
}

/// Resumable PBF demultiplexer.
///
/// # Examples
/// ```
/// use osmerge_pbf::BlockReader;
///
/// # fn main() -> Result<(), osmerge_pbf::PbfError> {
/// # let bytes = osmerge_pbf::to_bytes(&{
/// #     let mut osm = osmerge_core::Osm::new();
/// #     osm.finish()?;
/// #     osm
/// # })?;
/// let mut reader = BlockReader::new();
/// // Bytes may arrive in chunks of any size.
/// let mut blocks = Vec::new();
/// for chunk in bytes.chunks(7) {
///     blocks.extend(reader.feed(chunk)?);
/// }
/// reader.finish()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BlockReader {
    buf: Vec<u8>,
    pos: usize,
    state: ReadState,
    bytes_needed: usize,
    pending_is_header: bool,
    header_seen: bool,
}

impl BlockReader {
    /// Create a reader at the start of a stream.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: ReadState::Length,
            bytes_needed: LENGTH_PREFIX_BYTES,
            pending_is_header: false,
            header_seen: false,
        }
    }

    /// Feed the next chunk of bytes, returning every block completed by it.
    ///
    /// Insufficient bytes suspend the machine (the normal streaming case);
    /// malformed data fails fatally and the reader must be discarded.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Block>, PbfError> {
        // Splice unread bytes from the previous chunk with the new one.
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);

        let mut blocks = Vec::new();
        loop {
            let available = self.buf.len() - self.pos;
            if available < self.bytes_needed {
                break;
            }
            let window = &self.buf[self.pos..self.pos + self.bytes_needed];
            match self.state {
                ReadState::Length => {
                    let mut prefix = [0_u8; LENGTH_PREFIX_BYTES];
                    prefix.copy_from_slice(window);
                    self.pos += LENGTH_PREFIX_BYTES;
                    self.bytes_needed = u32::from_be_bytes(prefix) as usize;
                    self.state = ReadState::BlobHeader;
                }
                ReadState::BlobHeader => {
                    let blob_header = decode_blob_header(window)?;
                    self.pos += self.bytes_needed;
                    self.pending_is_header = match blob_header.blob_type.as_str() {
                        BLOB_TYPE_HEADER => true,
                        BLOB_TYPE_DATA => false,
                        _ => {
                            return Err(PbfError::UnknownBlobType {
                                found: blob_header.blob_type,
                            });
                        }
                    };
                    self.bytes_needed = blob_header.datasize;
                    self.state = ReadState::Blob;
                }
                ReadState::Blob => {
                    let payload = decode_blob_payload(window)?;
                    self.pos += self.bytes_needed;
                    self.state = ReadState::Length;
                    self.bytes_needed = LENGTH_PREFIX_BYTES;

                    if self.pending_is_header {
                        if self.header_seen {
                            return Err(PbfError::DuplicateHeader);
                        }
                        self.header_seen = true;
                        blocks.push(Block::Header(decode_header_block(&payload)?));
                    } else {
                        if !self.header_seen {
                            return Err(PbfError::MissingHeader);
                        }
                        blocks.push(Block::Primitives(decode_primitive_block(&payload)?));
                    }
                }
            }
        }
        Ok(blocks)
    }

    /// Validate stream termination once the source is exhausted.
    pub fn finish(&self) -> Result<(), PbfError> {
        if !self.header_seen {
            return Err(PbfError::MissingHeader);
        }
        if self.state != ReadState::Length || self.buf.len() > self.pos {
            return Err(PbfError::TruncatedStream);
        }
        Ok(())
    }

    /// Whether the reader sits at a clean blob boundary with an empty
    /// buffer and has decoded the header block.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.header_seen && self.state == ReadState::Length && self.buf.len() == self.pos
    }
}

impl Default for BlockReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete in-memory PBF buffer into a frozen [`Osm`] store.
pub fn from_bytes(bytes: &[u8]) -> Result<Osm, PbfError> {
    let mut reader = BlockReader::new();
    let blocks = reader.feed(bytes)?;
    reader.finish()?;
    build_store(blocks)
}

/// Decode a PBF byte stream into a frozen [`Osm`] store.
///
/// Reads in fixed-size chunks and pipelines decoding with ingestion, so
/// peak memory stays bounded by the largest block rather than the file.
pub fn read_osm<R: Read>(mut source: R) -> Result<Osm, PbfError> {
    let mut reader = BlockReader::new();
    let mut osm = Osm::new();
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut chunks = 0_u64;
    loop {
        let read = source
            .read(&mut chunk)
            .map_err(|source| PbfError::Io { source })?;
        if read == 0 {
            break;
        }
        chunks += 1;
        for block in reader.feed(&chunk[..read])? {
            ingest_block(&mut osm, block)?;
        }
    }
    reader.finish()?;
    debug!("decoded PBF stream from {chunks} chunks");
    osm.finish()?;
    Ok(osm)
}

fn build_store(blocks: Vec<Block>) -> Result<Osm, PbfError> {
    let mut osm = Osm::new();
    for block in blocks {
        ingest_block(&mut osm, block)?;
    }
    osm.finish()?;
    Ok(osm)
}

fn ingest_block(osm: &mut Osm, block: Block) -> Result<(), PbfError> {
    match block {
        Block::Header(header) => osm.header = header,
        Block::Primitives(primitives) => {
            for entity in primitives.entities() {
                osm.add_entity(&entity?)?;
            }
        }
    }
    Ok(())
}
