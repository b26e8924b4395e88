//! Header and primitive block codecs.
//!
//! A decoded [`PrimitiveBlock`] keeps the columnar arrays of the wire
//! format (delta-encoded IDs, coordinates, refs, and the block's string
//! table) and expands them into [`Entity`] values only when iterated, so a
//! block of tens of thousands of nodes never materialises per-entity
//! objects ahead of consumption.

use osmerge_core::{Bbox, Entity, EntityKind, Header, Info, Member, Node, Relation, Tags, Way};

use crate::error::PbfError;
use crate::wire::{WireReader, WireWriter};

/// Nanodegrees per degree.
const NANO: f64 = 1e-9;
/// Default coordinate granularity in nanodegrees.
const DEFAULT_GRANULARITY: i64 = 100;
/// Default timestamp granularity in milliseconds.
const DEFAULT_DATE_GRANULARITY: i64 = 1000;

/// Decode an `OSMHeader` block payload.
pub(crate) fn decode_header_block(bytes: &[u8]) -> Result<Header, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut header = Header::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => header.bbox = Some(decode_header_bbox(reader.read_bytes()?)?),
            4 => header.required_features.push(reader.read_string()?.to_owned()),
            5 => header.optional_features.push(reader.read_string()?.to_owned()),
            16 => header.writing_program = Some(reader.read_string()?.to_owned()),
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(header)
}

fn decode_header_bbox(bytes: &[u8]) -> Result<Bbox, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut bbox = Bbox {
        left: 0.0,
        bottom: 0.0,
        right: 0.0,
        top: 0.0,
    };
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => bbox.left = NANO * reader.read_sint()? as f64,
            2 => bbox.right = NANO * reader.read_sint()? as f64,
            3 => bbox.top = NANO * reader.read_sint()? as f64,
            4 => bbox.bottom = NANO * reader.read_sint()? as f64,
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(bbox)
}

/// Encode an `OSMHeader` block payload.
pub(crate) fn encode_header_block(header: &Header) -> Vec<u8> {
    let mut writer = WireWriter::new();
    if let Some(bbox) = header.bbox {
        let mut bbox_writer = WireWriter::new();
        bbox_writer.sint_field(1, to_nanodegrees(bbox.left));
        bbox_writer.sint_field(2, to_nanodegrees(bbox.right));
        bbox_writer.sint_field(3, to_nanodegrees(bbox.top));
        bbox_writer.sint_field(4, to_nanodegrees(bbox.bottom));
        writer.message_field(1, bbox_writer);
    }
    for feature in &header.required_features {
        writer.string_field(4, feature);
    }
    for feature in &header.optional_features {
        writer.string_field(5, feature);
    }
    if let Some(program) = &header.writing_program {
        writer.string_field(16, program);
    }
    writer.into_bytes()
}

fn to_nanodegrees(degrees: f64) -> i64 {
    (degrees * 1e9).round() as i64
}

/// A decoded `OSMData` block, still in columnar wire shape.
#[derive(Debug, Default)]
pub struct PrimitiveBlock {
    strings: Vec<String>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
    groups: Vec<Group>,
}

#[derive(Debug, Default)]
struct Group {
    nodes: Vec<RawNode>,
    dense: Option<RawDense>,
    ways: Vec<RawWay>,
    relations: Vec<RawRelation>,
}

#[derive(Debug, Default)]
struct RawNode {
    id: i64,
    keys: Vec<u64>,
    vals: Vec<u64>,
    lat: i64,
    lon: i64,
    info: Option<RawInfo>,
}

#[derive(Debug, Default)]
struct RawDense {
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    keys_vals: Vec<i64>,
    info: Option<RawDenseInfo>,
}

#[derive(Debug, Default)]
struct RawDenseInfo {
    versions: Vec<i64>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,
    uids: Vec<i64>,
    user_sids: Vec<i64>,
    visibles: Vec<i64>,
}

#[derive(Debug, Default)]
struct RawWay {
    id: i64,
    keys: Vec<u64>,
    vals: Vec<u64>,
    refs: Vec<i64>,
    info: Option<RawInfo>,
}

#[derive(Debug, Default)]
struct RawRelation {
    id: i64,
    keys: Vec<u64>,
    vals: Vec<u64>,
    roles: Vec<i64>,
    memids: Vec<i64>,
    types: Vec<i64>,
    info: Option<RawInfo>,
}

#[derive(Debug, Default, Clone)]
struct RawInfo {
    version: i64,
    timestamp: i64,
    changeset: i64,
    uid: i64,
    user_sid: u64,
    visible: Option<bool>,
}

/// Decode an `OSMData` block payload.
pub(crate) fn decode_primitive_block(bytes: &[u8]) -> Result<PrimitiveBlock, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut block = PrimitiveBlock {
        granularity: DEFAULT_GRANULARITY,
        date_granularity: DEFAULT_DATE_GRANULARITY,
        ..PrimitiveBlock::default()
    };
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => block.strings = decode_string_table(reader.read_bytes()?)?,
            2 => block.groups.push(decode_group(reader.read_bytes()?)?),
            17 => block.granularity = reader.read_varint()? as i64,
            18 => block.date_granularity = reader.read_varint()? as i64,
            19 => block.lat_offset = reader.read_varint()? as i64,
            20 => block.lon_offset = reader.read_varint()? as i64,
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(block)
}

fn decode_string_table(bytes: &[u8]) -> Result<Vec<String>, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut strings = Vec::new();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        if field == 1 {
            strings.push(reader.read_string()?.to_owned());
        } else {
            reader.skip(wire_type)?;
        }
    }
    Ok(strings)
}

fn decode_group(bytes: &[u8]) -> Result<Group, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut group = Group::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => group.nodes.push(decode_node(reader.read_bytes()?)?),
            2 => group.dense = Some(decode_dense(reader.read_bytes()?)?),
            3 => group.ways.push(decode_way(reader.read_bytes()?)?),
            4 => group.relations.push(decode_relation(reader.read_bytes()?)?),
            // Changesets are not part of the data model.
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(group)
}

fn decode_node(bytes: &[u8]) -> Result<RawNode, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut node = RawNode::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => node.id = reader.read_sint()?,
            2 => node.keys = reader.read_packed_varint()?,
            3 => node.vals = reader.read_packed_varint()?,
            4 => node.info = Some(decode_info(reader.read_bytes()?)?),
            8 => node.lat = reader.read_sint()?,
            9 => node.lon = reader.read_sint()?,
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(node)
}

fn decode_dense(bytes: &[u8]) -> Result<RawDense, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut dense = RawDense::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => dense.ids = reader.read_packed_sint()?,
            5 => dense.info = Some(decode_dense_info(reader.read_bytes()?)?),
            8 => dense.lats = reader.read_packed_sint()?,
            9 => dense.lons = reader.read_packed_sint()?,
            10 => dense.keys_vals = reader.read_packed_int()?,
            _ => reader.skip(wire_type)?,
        }
    }
    if dense.ids.len() != dense.lats.len() || dense.ids.len() != dense.lons.len() {
        return Err(PbfError::ColumnMismatch {
            what: "dense ids/lats/lons",
        });
    }
    Ok(dense)
}

fn decode_dense_info(bytes: &[u8]) -> Result<RawDenseInfo, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut info = RawDenseInfo::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => info.versions = reader.read_packed_int()?,
            2 => info.timestamps = reader.read_packed_sint()?,
            3 => info.changesets = reader.read_packed_sint()?,
            4 => info.uids = reader.read_packed_sint()?,
            5 => info.user_sids = reader.read_packed_sint()?,
            6 => info.visibles = reader.read_packed_int()?,
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(info)
}

fn decode_way(bytes: &[u8]) -> Result<RawWay, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut way = RawWay::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => way.id = reader.read_varint()? as i64,
            2 => way.keys = reader.read_packed_varint()?,
            3 => way.vals = reader.read_packed_varint()?,
            4 => way.info = Some(decode_info(reader.read_bytes()?)?),
            8 => way.refs = reader.read_packed_sint()?,
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(way)
}

fn decode_relation(bytes: &[u8]) -> Result<RawRelation, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut relation = RawRelation::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => relation.id = reader.read_varint()? as i64,
            2 => relation.keys = reader.read_packed_varint()?,
            3 => relation.vals = reader.read_packed_varint()?,
            4 => relation.info = Some(decode_info(reader.read_bytes()?)?),
            8 => relation.roles = reader.read_packed_int()?,
            9 => relation.memids = reader.read_packed_sint()?,
            10 => relation.types = reader.read_packed_int()?,
            _ => reader.skip(wire_type)?,
        }
    }
    if relation.memids.len() != relation.types.len()
        || relation.memids.len() != relation.roles.len()
    {
        return Err(PbfError::ColumnMismatch {
            what: "relation memids/types/roles",
        });
    }
    Ok(relation)
}

fn decode_info(bytes: &[u8]) -> Result<RawInfo, PbfError> {
    let mut reader = WireReader::new(bytes);
    let mut info = RawInfo::default();
    while !reader.is_at_end() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            1 => info.version = reader.read_varint()? as i64,
            2 => info.timestamp = reader.read_varint()? as i64,
            3 => info.changeset = reader.read_varint()? as i64,
            4 => info.uid = reader.read_varint()? as i64,
            5 => info.user_sid = reader.read_varint()?,
            6 => info.visible = Some(reader.read_varint()? != 0),
            _ => reader.skip(wire_type)?,
        }
    }
    Ok(info)
}

impl PrimitiveBlock {
    /// Total number of entities across the block's groups.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.groups
            .iter()
            .map(|group| {
                group.nodes.len()
                    + group.dense.as_ref().map_or(0, |dense| dense.ids.len())
                    + group.ways.len()
                    + group.relations.len()
            })
            .sum()
    }

    /// Iterate the block's entities, expanding them on demand.
    ///
    /// A format error (bad string index, unknown member type) ends the
    /// iteration; no entity is silently skipped.
    #[must_use]
    pub fn entities(&self) -> Entities<'_> {
        Entities {
            block: self,
            group: 0,
            cursor: GroupCursor::Nodes(0),
            failed: false,
        }
    }

    fn string(&self, index: u64) -> Result<&str, PbfError> {
        let index = usize::try_from(index).unwrap_or(usize::MAX);
        self.strings
            .get(index)
            .map(String::as_str)
            .ok_or(PbfError::BadStringIndex {
                index,
                len: self.strings.len(),
            })
    }

    fn latitude(&self, raw: i64) -> f64 {
        NANO * (self.lat_offset + self.granularity * raw) as f64
    }

    fn longitude(&self, raw: i64) -> f64 {
        NANO * (self.lon_offset + self.granularity * raw) as f64
    }

    fn timestamp_seconds(&self, raw: i64) -> i64 {
        raw * self.date_granularity / 1000
    }

    fn tags_from_indices(&self, keys: &[u64], vals: &[u64]) -> Result<Tags, PbfError> {
        if keys.len() != vals.len() {
            return Err(PbfError::ColumnMismatch { what: "keys/vals" });
        }
        let mut tags = Tags::with_capacity(keys.len());
        for (&key, &val) in keys.iter().zip(vals) {
            tags.insert(self.string(key)?.to_owned(), self.string(val)?.to_owned());
        }
        Ok(tags)
    }

    fn info_from_raw(&self, raw: &RawInfo) -> Result<Info, PbfError> {
        let user = if raw.user_sid == 0 {
            None
        } else {
            Some(self.string(raw.user_sid)?.to_owned())
        };
        Ok(Info {
            version: raw.version as i32,
            timestamp: self.timestamp_seconds(raw.timestamp),
            changeset: raw.changeset,
            uid: raw.uid as i32,
            user,
            visible: raw.visible.unwrap_or(true),
        })
    }
}

/// Running delta state for dense-node expansion.
#[derive(Debug, Default)]
struct DenseCursor {
    index: usize,
    id: i64,
    lat: i64,
    lon: i64,
    kv: usize,
    timestamp: i64,
    changeset: i64,
    uid: i64,
    user_sid: i64,
}

#[derive(Debug)]
enum GroupCursor {
    Nodes(usize),
    Dense(DenseCursor),
    Ways(usize),
    Relations(usize),
}

/// Lazy iterator over a block's entities.
#[derive(Debug)]
pub struct Entities<'a> {
    block: &'a PrimitiveBlock,
    group: usize,
    cursor: GroupCursor,
    failed: bool,
}

impl Entities<'_> {
    fn next_dense(&mut self, group: &Group) -> Option<Result<Entity, PbfError>> {
        let dense = group.dense.as_ref()?;
        let GroupCursor::Dense(cursor) = &mut self.cursor else {
            return None;
        };
        let index = cursor.index;
        if index >= dense.ids.len() {
            return None;
        }
        cursor.index += 1;
        cursor.id += dense.ids[index];
        cursor.lat += dense.lats[index];
        cursor.lon += dense.lons[index];

        let mut tags = Tags::new();
        while cursor.kv < dense.keys_vals.len() && dense.keys_vals[cursor.kv] != 0 {
            let key = dense.keys_vals[cursor.kv];
            let val = dense.keys_vals.get(cursor.kv + 1).copied().unwrap_or(0);
            cursor.kv += 2;
            let key = match self.block.string(key as u64) {
                Ok(key) => key.to_owned(),
                Err(error) => return Some(Err(error)),
            };
            let val = match self.block.string(val as u64) {
                Ok(val) => val.to_owned(),
                Err(error) => return Some(Err(error)),
            };
            tags.insert(key, val);
        }
        if cursor.kv < dense.keys_vals.len() {
            cursor.kv += 1; // consume the 0 separator
        }

        let info = match &dense.info {
            Some(dense_info) if index < dense_info.versions.len() => {
                cursor.timestamp += dense_info.timestamps.get(index).copied().unwrap_or(0);
                cursor.changeset += dense_info.changesets.get(index).copied().unwrap_or(0);
                cursor.uid += dense_info.uids.get(index).copied().unwrap_or(0);
                cursor.user_sid += dense_info.user_sids.get(index).copied().unwrap_or(0);
                let user = if cursor.user_sid <= 0 {
                    None
                } else {
                    match self.block.string(cursor.user_sid as u64) {
                        Ok(user) if !user.is_empty() => Some(user.to_owned()),
                        Ok(_) => None,
                        Err(error) => return Some(Err(error)),
                    }
                };
                Some(Info {
                    version: dense_info.versions[index] as i32,
                    timestamp: self.block.timestamp_seconds(cursor.timestamp),
                    changeset: cursor.changeset,
                    uid: cursor.uid as i32,
                    user,
                    visible: dense_info
                        .visibles
                        .get(index)
                        .map_or(true, |&visible| visible != 0),
                })
            }
            _ => None,
        };

        Some(Ok(Entity::Node(Node {
            id: cursor.id,
            lon: self.block.longitude(cursor.lon),
            lat: self.block.latitude(cursor.lat),
            tags,
            info,
        })))
    }
}

impl Iterator for Entities<'_> {
    type Item = Result<Entity, PbfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let group = self.block.groups.get(self.group)?;
            match &mut self.cursor {
                GroupCursor::Nodes(index) => {
                    if let Some(raw) = group.nodes.get(*index) {
                        *index += 1;
                        let item = self.raw_node_entity(raw);
                        return self.emit(item);
                    }
                    self.cursor = GroupCursor::Dense(DenseCursor::default());
                }
                GroupCursor::Dense(_) => {
                    if let Some(item) = self.next_dense(group) {
                        return self.emit(item);
                    }
                    self.cursor = GroupCursor::Ways(0);
                }
                GroupCursor::Ways(index) => {
                    if let Some(raw) = group.ways.get(*index) {
                        *index += 1;
                        let item = self.raw_way_entity(raw);
                        return self.emit(item);
                    }
                    self.cursor = GroupCursor::Relations(0);
                }
                GroupCursor::Relations(index) => {
                    if let Some(raw) = group.relations.get(*index) {
                        *index += 1;
                        let item = self.raw_relation_entity(raw);
                        return self.emit(item);
                    }
                    self.group += 1;
                    self.cursor = GroupCursor::Nodes(0);
                }
            }
        }
    }
}

impl Entities<'_> {
    fn emit(&mut self, item: Result<Entity, PbfError>) -> Option<Result<Entity, PbfError>> {
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }

    fn raw_node_entity(&self, raw: &RawNode) -> Result<Entity, PbfError> {
        let tags = self.block.tags_from_indices(&raw.keys, &raw.vals)?;
        let info = raw
            .info
            .as_ref()
            .map(|info| self.block.info_from_raw(info))
            .transpose()?;
        Ok(Entity::Node(Node {
            id: raw.id,
            lon: self.block.longitude(raw.lon),
            lat: self.block.latitude(raw.lat),
            tags,
            info,
        }))
    }

    fn raw_way_entity(&self, raw: &RawWay) -> Result<Entity, PbfError> {
        let tags = self.block.tags_from_indices(&raw.keys, &raw.vals)?;
        let info = raw
            .info
            .as_ref()
            .map(|info| self.block.info_from_raw(info))
            .transpose()?;
        let mut refs = Vec::with_capacity(raw.refs.len());
        let mut current = 0_i64;
        for &delta in &raw.refs {
            current += delta;
            refs.push(current);
        }
        Ok(Entity::Way(Way {
            id: raw.id,
            refs,
            tags,
            info,
        }))
    }

    fn raw_relation_entity(&self, raw: &RawRelation) -> Result<Entity, PbfError> {
        let tags = self.block.tags_from_indices(&raw.keys, &raw.vals)?;
        let info = raw
            .info
            .as_ref()
            .map(|info| self.block.info_from_raw(info))
            .transpose()?;
        let mut members = Vec::with_capacity(raw.memids.len());
        let mut current = 0_i64;
        for ((&delta, &member_type), &role) in
            raw.memids.iter().zip(&raw.types).zip(&raw.roles)
        {
            current += delta;
            let kind = u8::try_from(member_type)
                .ok()
                .and_then(EntityKind::from_u8)
                .ok_or(PbfError::BadMemberType { found: member_type })?;
            let role = self.block.string(role as u64)?.to_owned();
            members.push(Member {
                kind,
                member_ref: current,
                role,
            });
        }
        Ok(Entity::Relation(Relation {
            id: raw.id,
            members,
            tags,
            info,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_block_bytes() -> Vec<u8> {
        // String table: "", "name", "alpha".
        let mut strings = WireWriter::new();
        strings.bytes_field(1, b"");
        strings.bytes_field(1, b"name");
        strings.bytes_field(1, b"alpha");

        // Two dense nodes: IDs 5 and 8; the first carries name=alpha.
        let mut dense = WireWriter::new();
        let mut ids = WireWriter::new();
        dense.packed_sint_field(1, [5, 3].into_iter());
        dense.packed_sint_field(8, [525_000_000, 10].into_iter());
        dense.packed_sint_field(9, [134_000_000, -10].into_iter());
        ids.packed_varint_field(10, [1_u64, 2, 0, 0].into_iter());
        let mut group = WireWriter::new();
        group.bytes_field(2, &{
            let mut combined = dense.into_bytes();
            combined.extend_from_slice(&ids.into_bytes());
            combined
        });

        let mut block = WireWriter::new();
        block.message_field(1, strings);
        block.message_field(2, group);
        block.into_bytes()
    }

    #[test]
    fn dense_nodes_expand_with_deltas_and_tags() {
        let block = decode_primitive_block(&dense_block_bytes()).expect("decode");
        assert_eq!(block.entity_count(), 2);

        let entities: Vec<Entity> = block
            .entities()
            .collect::<Result<_, _>>()
            .expect("expand");
        let Entity::Node(first) = &entities[0] else {
            panic!("expected node");
        };
        let Entity::Node(second) = &entities[1] else {
            panic!("expected node");
        };
        assert_eq!(first.id, 5);
        assert_eq!(second.id, 8);
        assert!((first.lat - 52.5).abs() < 1e-7);
        assert!((first.lon - 13.4).abs() < 1e-7);
        assert!(second.lat > first.lat && second.lon < first.lon);
        assert_eq!(first.tags.get("name"), Some(&"alpha".to_owned()));
        assert!(second.tags.is_empty());
    }

    #[test]
    fn bad_string_index_stops_iteration() {
        let mut strings = WireWriter::new();
        strings.bytes_field(1, b"");

        let mut dense = WireWriter::new();
        dense.packed_sint_field(1, [1].into_iter());
        dense.packed_sint_field(8, [0].into_iter());
        dense.packed_sint_field(9, [0].into_iter());
        // Key index 9 is outside the one-entry string table.
        dense.packed_varint_field(10, [9_u64, 9, 0].into_iter());

        let mut group = WireWriter::new();
        group.message_field(2, dense);
        let mut block = WireWriter::new();
        block.message_field(1, strings);
        block.message_field(2, group);

        let decoded = decode_primitive_block(&block.into_bytes()).expect("decode");
        let mut entities = decoded.entities();
        assert!(matches!(
            entities.next(),
            Some(Err(PbfError::BadStringIndex { .. }))
        ));
        assert!(entities.next().is_none());
    }

    #[test]
    fn header_block_round_trips() {
        let header = Header {
            bbox: Some(Bbox {
                left: 13.0,
                bottom: 52.0,
                right: 13.5,
                top: 52.6,
            }),
            required_features: vec!["OsmSchema-V0.6".to_owned(), "DenseNodes".to_owned()],
            optional_features: Vec::new(),
            writing_program: Some("osmerge".to_owned()),
        };
        let bytes = encode_header_block(&header);
        let decoded = decode_header_block(&bytes).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn granularity_defaults_apply() {
        let mut block = WireWriter::new();
        let strings = WireWriter::new();
        block.message_field(1, strings);
        let decoded = decode_primitive_block(&block.into_bytes()).expect("decode");
        assert_eq!(decoded.granularity, DEFAULT_GRANULARITY);
        assert_eq!(decoded.date_granularity, DEFAULT_DATE_GRANULARITY);
    }
}
