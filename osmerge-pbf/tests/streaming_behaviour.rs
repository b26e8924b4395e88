//! Chunk-boundary invariance and failure modes of the streaming reader.

mod support;

use osmerge_core::Entity;
use osmerge_pbf::{Block, BlockReader, PbfError, to_bytes};
use proptest::prelude::*;
use rstest::rstest;
use support::sample_store;

/// Decode a byte stream fed in fixed-size chunks, returning every entity
/// in decode order.
fn decode_in_chunks(bytes: &[u8], chunk_size: usize) -> Vec<Entity> {
    let mut reader = BlockReader::new();
    let mut entities = Vec::new();
    for chunk in bytes.chunks(chunk_size.max(1)) {
        for block in reader.feed(chunk).expect("feed") {
            if let Block::Primitives(primitives) = block {
                for entity in primitives.entities() {
                    entities.push(entity.expect("expand"));
                }
            }
        }
    }
    reader.finish().expect("complete stream");
    entities
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(4096)]
fn chunked_decoding_matches_one_shot(#[case] chunk_size: usize) {
    let bytes = to_bytes(&sample_store()).expect("encode");
    let one_shot = decode_in_chunks(&bytes, bytes.len());
    let chunked = decode_in_chunks(&bytes, chunk_size);
    assert_eq!(one_shot, chunked);
    assert_eq!(one_shot.len(), 9);
}

#[test]
fn header_block_arrives_first_and_once() {
    let bytes = to_bytes(&sample_store()).expect("encode");
    let mut reader = BlockReader::new();
    let blocks = reader.feed(&bytes).expect("feed");
    reader.finish().expect("complete");

    assert!(matches!(blocks.first(), Some(Block::Header(_))));
    let header_count = blocks
        .iter()
        .filter(|block| matches!(block, Block::Header(_)))
        .count();
    assert_eq!(header_count, 1);
}

#[test]
fn empty_input_reports_missing_header() {
    let mut reader = BlockReader::new();
    assert!(reader.feed(&[]).expect("feed").is_empty());
    assert!(matches!(reader.finish(), Err(PbfError::MissingHeader)));
}

#[test]
fn truncated_stream_is_detected() {
    let bytes = to_bytes(&sample_store()).expect("encode");
    let mut reader = BlockReader::new();
    reader.feed(&bytes[..bytes.len() - 5]).expect("feed");
    assert!(matches!(reader.finish(), Err(PbfError::TruncatedStream)));
    assert!(!reader.is_complete());
}

#[test]
fn is_complete_tracks_blob_boundaries() {
    let bytes = to_bytes(&sample_store()).expect("encode");
    let mut reader = BlockReader::new();
    assert!(!reader.is_complete());
    reader.feed(&bytes).expect("feed");
    assert!(reader.is_complete());
    reader.finish().expect("complete");
}

proptest! {
    #[test]
    fn any_chunk_size_yields_the_same_entities(chunk_size in 1_usize..512) {
        let bytes = to_bytes(&sample_store()).expect("encode");
        let one_shot = decode_in_chunks(&bytes, bytes.len());
        let chunked = decode_in_chunks(&bytes, chunk_size);
        prop_assert_eq!(one_shot, chunked);
    }
}
