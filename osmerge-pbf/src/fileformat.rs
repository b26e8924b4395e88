//! Blob container codecs: `BlobHeader` and `Blob`.

use std::io::Read;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::Write;

use crate::error::PbfError;
use crate::wire::{WireReader, WireWriter};

/// Declared type of an `OSMHeader` blob.
pub(crate) const BLOB_TYPE_HEADER: &str = "OSMHeader";
/// Declared type of an `OSMData` blob.
pub(crate) const BLOB_TYPE_DATA: &str = "OSMData";

/// Decoded `BlobHeader` message: the blob's type and payload size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlobHeader {
    pub(crate) blob_type: String,
    pub(crate) datasize: usize,
}

pub(crate) fn decode_blob_header(bytes: &[u8]) -> Result<BlobHeader, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut blob_type = String::new();
    let mut datasize = 0_usize;
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => blob_type = reader.read_string()?.to_owned(),
            3 => {
                datasize = usize::try_from(reader.read_varint()?).unwrap_or(usize::MAX);
            }
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(BlobHeader {
        blob_type,
        datasize,
    })
}

pub(crate) fn encode_blob_header(blob_type: &str, datasize: usize) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.string_field(1, blob_type);
    writer.varint_field(3, datasize as u64);
    writer.into_bytes()
}

/// Decode a `Blob` message and inflate its payload.
///
/// Only the zlib variant is supported; a blob without `zlib_data` fails
/// with [`PbfError::NoZlibData`].
pub(crate) fn decode_blob_payload(bytes: &[u8]) -> Result<Vec<u8>, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut zlib_data: Option<&[u8]> = None;
    let mut raw_size: Option<usize> = None;
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            2 => {
                raw_size = usize::try_from(reader.read_varint()?).ok();
            }
            3 => zlib_data = Some(reader.read_bytes()?),
            _ => reader.skip(wire_type)?,
        }
    }
    let compressed = zlib_data.filter(|data| !data.is_empty()).ok_or(PbfError::NoZlibData)?;

    let mut decoder = ZlibDecoder::new(compressed);
    let mut inflated = Vec::with_capacity(raw_size.unwrap_or(0));
    decoder
        .read_to_end(&mut inflated)
        .map_err(|source| PbfError::Inflate { source })?;
    Ok(inflated)
}

/// Deflate a block payload and wrap it in a `Blob` message.
pub(crate) fn encode_blob_payload(block_bytes: &[u8]) -> Result<Vec<u8>, PbfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(block_bytes)
        .map_err(|source| PbfError::Io { source })?;
    let compressed = encoder.finish().map_err(|source| PbfError::Io { source })?;

    let mut writer = WireWriter::new();
    writer.varint_field(2, block_bytes.len() as u64);
    writer.bytes_field(3, &compressed);
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_header_round_trips() {
        let bytes = encode_blob_header(BLOB_TYPE_DATA, 1234);
        let header = decode_blob_header(&bytes).expect("decode");
        assert_eq!(header.blob_type, BLOB_TYPE_DATA);
        assert_eq!(header.datasize, 1234);
    }

    #[test]
    fn blob_payload_round_trips_through_zlib() {
        let payload = b"columnar entity data".repeat(50);
        let blob = encode_blob_payload(&payload).expect("encode");
        let inflated = decode_blob_payload(&blob).expect("decode");
        assert_eq!(inflated, payload);
    }

    #[test]
    fn blob_without_zlib_data_is_rejected() {
        // A blob carrying only the `raw` variant (field 1).
        let mut writer = WireWriter::new();
        writer.bytes_field(1, b"uncompressed");
        let error = decode_blob_payload(&writer.into_bytes()).expect_err("must reject");
        assert!(matches!(error, PbfError::NoZlibData));
    }

    #[test]
    fn corrupt_zlib_payload_surfaces_inflate_error() {
        let mut writer = WireWriter::new();
        writer.bytes_field(3, b"not zlib at all");
        let error = decode_blob_payload(&writer.into_bytes()).expect_err("must reject");
        assert!(matches!(error, PbfError::Inflate { .. }));
    }
}
