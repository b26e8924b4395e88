//! PBF encoder: the reader's dual.
//!
//! Serialises a frozen store back into the blob layout the reader
//! consumes: one `OSMHeader` blob, then `OSMData` blobs holding one
//! primitive group each — dense nodes first, then ways, then relations.
//! Encoding mirrors the decoder's delta and granularity rules, so a
//! decode/encode/decode cycle reproduces an equivalent store.

use std::io::Write;

use osmerge_core::{Header, Info, Node, Osm, Relation, StringTable, Tags, Way};

use crate::error::PbfError;
use crate::fileformat::{
    BLOB_TYPE_DATA, BLOB_TYPE_HEADER, encode_blob_header, encode_blob_payload,
};
use crate::osmformat::encode_header_block;
use crate::wire::WireWriter;

/// Entities per primitive group; matches the sizing convention of common
/// OSM writers.
const ENTITIES_PER_GROUP: usize = 8000;
/// Coordinate granularity written by this encoder, in nanodegrees.
const GRANULARITY: i64 = 100;

/// Serialise a store to an in-memory PBF buffer.
pub fn to_bytes(osm: &Osm) -> Result<Vec<u8>, PbfError> {
    let mut buffer = Vec::new();
    write_osm(osm, &mut buffer)?;
    Ok(buffer)
}

/// Serialise a store as a PBF byte stream.
///
/// The store must be frozen; exporting a store that is still loading
/// fails rather than emitting partial data.
pub fn write_osm<W: Write>(osm: &Osm, mut sink: W) -> Result<(), PbfError> {
    if !osm.is_ready() {
        return Err(PbfError::Store(osmerge_core::StoreError::NotFrozen));
    }
    let header_bytes = encode_header_block(&effective_header(osm));
    write_blob(&mut sink, BLOB_TYPE_HEADER, &header_bytes)?;

    chunked(osm.iter_nodes(), |nodes| {
        write_blob(&mut sink, BLOB_TYPE_DATA, &encode_dense_block(nodes))
    })?;
    chunked(osm.iter_ways(), |ways| {
        write_blob(&mut sink, BLOB_TYPE_DATA, &encode_way_block(ways))
    })?;
    chunked(osm.iter_relations(), |relations| {
        write_blob(&mut sink, BLOB_TYPE_DATA, &encode_relation_block(relations))
    })?;
    Ok(())
}

fn effective_header(osm: &Osm) -> Header {
    let mut header = osm.header.clone();
    if header.bbox.is_none() {
        header.bbox = osm.bbox();
    }
    if header.required_features.is_empty() {
        header.required_features = vec!["OsmSchema-V0.6".to_owned(), "DenseNodes".to_owned()];
    }
    if header.writing_program.is_none() {
        header.writing_program = Some(concat!("osmerge/", env!("CARGO_PKG_VERSION")).to_owned());
    }
    header
}

fn chunked<T>(
    items: impl Iterator<Item = T>,
    mut emit: impl FnMut(&[T]) -> Result<(), PbfError>,
) -> Result<(), PbfError> {
    let mut pending = Vec::with_capacity(ENTITIES_PER_GROUP);
    for item in items {
        pending.push(item);
        if pending.len() == ENTITIES_PER_GROUP {
            emit(&pending)?;
            pending.clear();
        }
    }
    if !pending.is_empty() {
        emit(&pending)?;
    }
    Ok(())
}

fn write_blob<W: Write>(sink: &mut W, blob_type: &str, block_bytes: &[u8]) -> Result<(), PbfError> {
    let blob = encode_blob_payload(block_bytes)?;
    let blob_header = encode_blob_header(blob_type, blob.len());
    let prefix = u32::try_from(blob_header.len()).unwrap_or(u32::MAX).to_be_bytes();
    sink.write_all(&prefix)
        .and_then(|()| sink.write_all(&blob_header))
        .and_then(|()| sink.write_all(&blob))
        .map_err(|source| PbfError::Io { source })
}

fn to_raw_coordinate(degrees: f64) -> i64 {
    // granularity 100 nanodegrees: 1e7 raw units per degree.
    (degrees * 1e9 / GRANULARITY as f64).round() as i64
}

fn encode_block(strings: &StringTable, group: WireWriter) -> Vec<u8> {
    let mut table = WireWriter::new();
    for entry in strings.iter() {
        table.bytes_field(1, entry.as_bytes());
    }
    let mut block = WireWriter::new();
    block.message_field(1, table);
    block.message_field(2, group);
    block.into_bytes()
}

fn encode_dense_block(nodes: &[Node]) -> Vec<u8> {
    let mut strings = StringTable::new();

    let mut ids = Vec::with_capacity(nodes.len());
    let mut lats = Vec::with_capacity(nodes.len());
    let mut lons = Vec::with_capacity(nodes.len());
    let mut keys_vals = Vec::new();
    let mut previous = (0_i64, 0_i64, 0_i64);
    let mut any_tags = false;
    for node in nodes {
        let lat = to_raw_coordinate(node.lat);
        let lon = to_raw_coordinate(node.lon);
        ids.push(node.id - previous.0);
        lats.push(lat - previous.1);
        lons.push(lon - previous.2);
        previous = (node.id, lat, lon);

        for (key, value) in &node.tags {
            any_tags = true;
            keys_vals.push(u64::from(strings.intern(key)));
            keys_vals.push(u64::from(strings.intern(value)));
        }
        keys_vals.push(0);
    }

    let mut dense = WireWriter::new();
    dense.packed_sint_field(1, ids.into_iter());
    if let Some(info) = encode_dense_info(nodes, &mut strings) {
        dense.message_field(5, info);
    }
    dense.packed_sint_field(8, lats.into_iter());
    dense.packed_sint_field(9, lons.into_iter());
    if any_tags {
        dense.packed_varint_field(10, keys_vals.into_iter());
    }

    let mut group = WireWriter::new();
    group.message_field(2, dense);
    encode_block(&strings, group)
}

fn encode_dense_info(nodes: &[Node], strings: &mut StringTable) -> Option<WireWriter> {
    if nodes.iter().all(|node| node.info.is_none()) {
        return None;
    }
    let mut versions = Vec::with_capacity(nodes.len());
    let mut timestamps = Vec::with_capacity(nodes.len());
    let mut changesets = Vec::with_capacity(nodes.len());
    let mut uids = Vec::with_capacity(nodes.len());
    let mut user_sids = Vec::with_capacity(nodes.len());
    let mut visibles = Vec::with_capacity(nodes.len());
    let mut previous = (0_i64, 0_i64, 0_i64, 0_i64);
    let fallback = Info::default();
    for node in nodes {
        let info = node.info.as_ref().unwrap_or(&fallback);
        let user_sid = info
            .user
            .as_deref()
            .map_or(0_i64, |user| i64::from(strings.intern(user)));
        versions.push(i64::from(info.version) as u64);
        timestamps.push(info.timestamp - previous.0);
        changesets.push(info.changeset - previous.1);
        uids.push(i64::from(info.uid) - previous.2);
        user_sids.push(user_sid - previous.3);
        visibles.push(u64::from(info.visible || node.info.is_none()));
        previous = (
            info.timestamp,
            info.changeset,
            i64::from(info.uid),
            user_sid,
        );
    }

    let mut writer = WireWriter::new();
    writer.packed_varint_field(1, versions.into_iter());
    writer.packed_sint_field(2, timestamps.into_iter());
    writer.packed_sint_field(3, changesets.into_iter());
    writer.packed_sint_field(4, uids.into_iter());
    writer.packed_sint_field(5, user_sids.into_iter());
    writer.packed_varint_field(6, visibles.into_iter());
    Some(writer)
}

fn encode_info(info: &Info, strings: &mut StringTable) -> WireWriter {
    let mut writer = WireWriter::new();
    if info.version != 0 {
        writer.varint_field(1, i64::from(info.version) as u64);
    }
    if info.timestamp != 0 {
        writer.varint_field(2, info.timestamp as u64);
    }
    if info.changeset != 0 {
        writer.varint_field(3, info.changeset as u64);
    }
    if info.uid != 0 {
        writer.varint_field(4, i64::from(info.uid) as u64);
    }
    if let Some(user) = info.user.as_deref() {
        writer.varint_field(5, u64::from(strings.intern(user)));
    }
    if !info.visible {
        writer.varint_field(6, 0);
    }
    writer
}

fn encode_tag_indices(writer: &mut WireWriter, strings: &mut StringTable, tags: &Tags) {
    let mut keys = Vec::with_capacity(tags.len());
    let mut vals = Vec::with_capacity(tags.len());
    for (key, value) in tags {
        keys.push(u64::from(strings.intern(key)));
        vals.push(u64::from(strings.intern(value)));
    }
    writer.packed_varint_field(2, keys.into_iter());
    writer.packed_varint_field(3, vals.into_iter());
}

fn encode_way_block(ways: &[Way]) -> Vec<u8> {
    let mut strings = StringTable::new();
    let mut group = WireWriter::new();
    for way in ways {
        let mut message = WireWriter::new();
        message.varint_field(1, way.id as u64);
        encode_tag_indices(&mut message, &mut strings, &way.tags);
        if let Some(info) = &way.info {
            let info = encode_info(info, &mut strings);
            message.message_field(4, info);
        }
        let mut previous = 0_i64;
        let deltas: Vec<i64> = way
            .refs
            .iter()
            .map(|&reference| {
                let delta = reference - previous;
                previous = reference;
                delta
            })
            .collect();
        message.packed_sint_field(8, deltas.into_iter());
        group.message_field(3, message);
    }
    encode_block(&strings, group)
}

fn encode_relation_block(relations: &[Relation]) -> Vec<u8> {
    let mut strings = StringTable::new();
    let mut group = WireWriter::new();
    for relation in relations {
        let mut message = WireWriter::new();
        message.varint_field(1, relation.id as u64);
        encode_tag_indices(&mut message, &mut strings, &relation.tags);
        if let Some(info) = &relation.info {
            let info = encode_info(info, &mut strings);
            message.message_field(4, info);
        }
        let mut roles = Vec::with_capacity(relation.members.len());
        let mut memids = Vec::with_capacity(relation.members.len());
        let mut types = Vec::with_capacity(relation.members.len());
        let mut previous = 0_i64;
        for member in &relation.members {
            roles.push(u64::from(strings.intern(&member.role)));
            memids.push(member.member_ref - previous);
            previous = member.member_ref;
            types.push(member.kind as u64);
        }
        message.packed_varint_field(8, roles.into_iter());
        message.packed_sint_field(9, memids.into_iter());
        message.packed_varint_field(10, types.into_iter());
        group.message_field(4, message);
    }
    encode_block(&strings, group)
}
