//! Columnar tables for the three entity kinds.
//!
//! Every table is a set of parallel columns over [`GrowableBuffer`]s plus
//! an [`IdIndex`]. Variable-length fields (tags, way refs, relation
//! members) are flattened into one shared column with a per-entity end
//! offset column, so a row is reconstructed from the offset window
//! `[end[i - 1], end[i])`.

use crate::buffer::GrowableBuffer;
use crate::entity::{EntityKind, Info, Member, Node, Relation, Tags, Way};
use crate::index::{IdIndex, IdIndexParts};
use crate::strings::{StringTable, StringTableParts};

use super::StoreError;

/// Flattened tag storage: interleaved key/value string indices plus one
/// end offset per entity.
#[derive(Debug, Default)]
pub(crate) struct TagColumns {
    kv: GrowableBuffer<u32>,
    end: GrowableBuffer<u32>,
}

impl TagColumns {
    pub(crate) fn append(
        &mut self,
        strings: &mut StringTable,
        tags: &Tags,
    ) -> Result<(), StoreError> {
        for (key, value) in tags {
            let key_id = strings.intern(key);
            let value_id = strings.intern(value);
            self.kv.push(key_id)?;
            self.kv.push(value_id)?;
        }
        self.end
            .push(u32::try_from(self.kv.len()).unwrap_or(u32::MAX))?;
        Ok(())
    }

    pub(crate) fn read(&self, position: usize, strings: &StringTable) -> Tags {
        let start = if position == 0 {
            0
        } else {
            self.end.get(position - 1).unwrap_or(0) as usize
        };
        let end = self.end.get(position).unwrap_or(0) as usize;
        let mut tags = Tags::new();
        let Ok(window) = self.kv.slice(start, end) else {
            return tags;
        };
        for pair in window.chunks_exact(2) {
            let key = strings.get(pair[0]).unwrap_or_default();
            let value = strings.get(pair[1]).unwrap_or_default();
            tags.insert(key.to_owned(), value.to_owned());
        }
        tags
    }

    pub(crate) fn compact(&mut self) {
        self.kv.compact();
        self.end.compact();
    }

    pub(crate) fn into_parts(self) -> TagColumnsParts {
        TagColumnsParts {
            kv: self.kv.into_block(),
            end: self.end.into_block(),
        }
    }

    pub(crate) fn from_parts(parts: TagColumnsParts) -> Self {
        Self {
            kv: GrowableBuffer::from_block(parts.kv),
            end: GrowableBuffer::from_block(parts.end),
        }
    }
}

/// Transferable blocks behind [`TagColumns`].
#[derive(Debug)]
pub struct TagColumnsParts {
    /// Interleaved key/value string indices.
    pub kv: Box<[u32]>,
    /// Exclusive end offset per entity into `kv`.
    pub end: Box<[u32]>,
}

/// Presence flag bit in the info `flags` column.
const INFO_PRESENT: u8 = 1;
/// Visibility flag bit in the info `flags` column.
const INFO_VISIBLE: u8 = 2;

/// Columnar authorship metadata; one row per entity, zeroed when absent.
#[derive(Debug, Default)]
pub(crate) struct InfoColumns {
    flags: GrowableBuffer<u8>,
    version: GrowableBuffer<i32>,
    timestamp: GrowableBuffer<i64>,
    changeset: GrowableBuffer<i64>,
    uid: GrowableBuffer<i32>,
    user: GrowableBuffer<u32>,
}

impl InfoColumns {
    pub(crate) fn append(
        &mut self,
        strings: &mut StringTable,
        info: Option<&Info>,
    ) -> Result<(), StoreError> {
        match info {
            Some(info) => {
                let mut flags = INFO_PRESENT;
                if info.visible {
                    flags |= INFO_VISIBLE;
                }
                self.flags.push(flags)?;
                self.version.push(info.version)?;
                self.timestamp.push(info.timestamp)?;
                self.changeset.push(info.changeset)?;
                self.uid.push(info.uid)?;
                let user = info.user.as_deref().map_or(0, |user| strings.intern(user));
                self.user.push(user)?;
            }
            None => {
                self.flags.push(0)?;
                self.version.push(0)?;
                self.timestamp.push(0)?;
                self.changeset.push(0)?;
                self.uid.push(0)?;
                self.user.push(0)?;
            }
        }
        Ok(())
    }

    pub(crate) fn read(&self, position: usize, strings: &StringTable) -> Option<Info> {
        let flags = self.flags.get(position)?;
        if flags & INFO_PRESENT == 0 {
            return None;
        }
        let user_id = self.user.get(position)?;
        let user = if user_id == 0 {
            None
        } else {
            strings.get(user_id).map(str::to_owned)
        };
        Some(Info {
            version: self.version.get(position)?,
            timestamp: self.timestamp.get(position)?,
            changeset: self.changeset.get(position)?,
            uid: self.uid.get(position)?,
            user,
            visible: flags & INFO_VISIBLE != 0,
        })
    }

    pub(crate) fn compact(&mut self) {
        self.flags.compact();
        self.version.compact();
        self.timestamp.compact();
        self.changeset.compact();
        self.uid.compact();
        self.user.compact();
    }

    pub(crate) fn into_parts(self) -> InfoColumnsParts {
        InfoColumnsParts {
            flags: self.flags.into_block(),
            version: self.version.into_block(),
            timestamp: self.timestamp.into_block(),
            changeset: self.changeset.into_block(),
            uid: self.uid.into_block(),
            user: self.user.into_block(),
        }
    }

    pub(crate) fn from_parts(parts: InfoColumnsParts) -> Self {
        Self {
            flags: GrowableBuffer::from_block(parts.flags),
            version: GrowableBuffer::from_block(parts.version),
            timestamp: GrowableBuffer::from_block(parts.timestamp),
            changeset: GrowableBuffer::from_block(parts.changeset),
            uid: GrowableBuffer::from_block(parts.uid),
            user: GrowableBuffer::from_block(parts.user),
        }
    }
}

/// Transferable blocks behind [`InfoColumns`].
#[derive(Debug)]
pub struct InfoColumnsParts {
    /// Presence and visibility flags per entity.
    pub flags: Box<[u8]>,
    /// Edit versions.
    pub version: Box<[i32]>,
    /// Timestamps in epoch seconds.
    pub timestamp: Box<[i64]>,
    /// Changeset identifiers.
    pub changeset: Box<[i64]>,
    /// User IDs.
    pub uid: Box<[i32]>,
    /// User name string indices (0 = none).
    pub user: Box<[u32]>,
}

/// Columnar node storage: ID index plus coordinate, tag, and info columns.
#[derive(Debug, Default)]
pub struct NodeTable {
    ids: IdIndex,
    lon: GrowableBuffer<f64>,
    lat: GrowableBuffer<f64>,
    tags: TagColumns,
    info: InfoColumns,
    strings: StringTable,
}

impl NodeTable {
    /// Number of stored nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether [`Self::finish`] has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ids.is_ready()
    }

    pub(crate) fn add(&mut self, node: &Node) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::Frozen {
                kind: EntityKind::Node,
            });
        }
        self.ids.push(node.id)?;
        self.lon.push(node.lon)?;
        self.lat.push(node.lat)?;
        self.tags.append(&mut self.strings, &node.tags)?;
        self.info.append(&mut self.strings, node.info.as_ref())?;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), StoreError> {
        self.ids.finish()?;
        self.lon.compact();
        self.lat.compact();
        self.tags.compact();
        self.info.compact();
        Ok(())
    }

    /// Reconstruct the node at a dense position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<Node> {
        let id = self.ids.id_at(position)?;
        Some(Node {
            id,
            lon: self.lon.get(position)?,
            lat: self.lat.get(position)?,
            tags: self.tags.read(position, &self.strings),
            info: self.info.read(position, &self.strings),
        })
    }

    /// Coordinates at a dense position, `(lon, lat)`.
    #[must_use]
    pub fn coordinates(&self, position: usize) -> Option<(f64, f64)> {
        Some((self.lon.get(position)?, self.lat.get(position)?))
    }

    /// The ID stored at a dense position.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.id_at(position)
    }

    /// Dense position of an ID; requires a frozen table.
    pub fn position_of(&self, id: i64) -> Result<Option<usize>, StoreError> {
        Ok(self.ids.position_of(id)?)
    }

    /// Look a node up by ID; requires a frozen table.
    pub fn by_id(&self, id: i64) -> Result<Option<Node>, StoreError> {
        Ok(self.position_of(id)?.and_then(|position| self.get(position)))
    }

    /// Iterate nodes in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Node> + '_ {
        (0..self.len()).filter_map(|position| self.get(position))
    }

    pub(crate) fn into_parts(self) -> Result<NodeTableParts, StoreError> {
        Ok(NodeTableParts {
            ids: self.ids.into_parts()?,
            lon: self.lon.into_block(),
            lat: self.lat.into_block(),
            tags: self.tags.into_parts(),
            info: self.info.into_parts(),
            strings: self.strings.into_parts(),
        })
    }

    pub(crate) fn from_parts(parts: NodeTableParts) -> Self {
        Self {
            ids: IdIndex::from_parts(parts.ids),
            lon: GrowableBuffer::from_block(parts.lon),
            lat: GrowableBuffer::from_block(parts.lat),
            tags: TagColumns::from_parts(parts.tags),
            info: InfoColumns::from_parts(parts.info),
            strings: StringTable::from_parts(&parts.strings),
        }
    }
}

/// Transferable blocks behind a [`NodeTable`].
#[derive(Debug)]
pub struct NodeTableParts {
    /// ID index blocks.
    pub ids: IdIndexParts,
    /// Longitudes in storage order.
    pub lon: Box<[f64]>,
    /// Latitudes in storage order.
    pub lat: Box<[f64]>,
    /// Tag columns.
    pub tags: TagColumnsParts,
    /// Info columns.
    pub info: InfoColumnsParts,
    /// String table blocks.
    pub strings: StringTableParts,
}

/// Columnar way storage: ID index, a flat ref column with per-way end
/// offsets, and tag/info columns.
#[derive(Debug, Default)]
pub struct WayTable {
    ids: IdIndex,
    refs: GrowableBuffer<i64>,
    ref_end: GrowableBuffer<u32>,
    tags: TagColumns,
    info: InfoColumns,
    strings: StringTable,
}

impl WayTable {
    /// Number of stored ways.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether [`Self::finish`] has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ids.is_ready()
    }

    pub(crate) fn add(&mut self, way: &Way) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::Frozen {
                kind: EntityKind::Way,
            });
        }
        self.ids.push(way.id)?;
        self.refs.push_many(&way.refs)?;
        self.ref_end
            .push(u32::try_from(self.refs.len()).unwrap_or(u32::MAX))?;
        self.tags.append(&mut self.strings, &way.tags)?;
        self.info.append(&mut self.strings, way.info.as_ref())?;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), StoreError> {
        self.ids.finish()?;
        self.refs.compact();
        self.ref_end.compact();
        self.tags.compact();
        self.info.compact();
        Ok(())
    }

    /// Reconstruct the way at a dense position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<Way> {
        let id = self.ids.id_at(position)?;
        let start = if position == 0 {
            0
        } else {
            self.ref_end.get(position - 1)? as usize
        };
        let end = self.ref_end.get(position)? as usize;
        let refs = self.refs.slice(start, end).ok()?.to_vec();
        Some(Way {
            id,
            refs,
            tags: self.tags.read(position, &self.strings),
            info: self.info.read(position, &self.strings),
        })
    }

    /// The ID stored at a dense position.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.id_at(position)
    }

    /// Dense position of an ID; requires a frozen table.
    pub fn position_of(&self, id: i64) -> Result<Option<usize>, StoreError> {
        Ok(self.ids.position_of(id)?)
    }

    /// Look a way up by ID; requires a frozen table.
    pub fn by_id(&self, id: i64) -> Result<Option<Way>, StoreError> {
        Ok(self.position_of(id)?.and_then(|position| self.get(position)))
    }

    /// Iterate ways in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Way> + '_ {
        (0..self.len()).filter_map(|position| self.get(position))
    }

    pub(crate) fn into_parts(self) -> Result<WayTableParts, StoreError> {
        Ok(WayTableParts {
            ids: self.ids.into_parts()?,
            refs: self.refs.into_block(),
            ref_end: self.ref_end.into_block(),
            tags: self.tags.into_parts(),
            info: self.info.into_parts(),
            strings: self.strings.into_parts(),
        })
    }

    pub(crate) fn from_parts(parts: WayTableParts) -> Self {
        Self {
            ids: IdIndex::from_parts(parts.ids),
            refs: GrowableBuffer::from_block(parts.refs),
            ref_end: GrowableBuffer::from_block(parts.ref_end),
            tags: TagColumns::from_parts(parts.tags),
            info: InfoColumns::from_parts(parts.info),
            strings: StringTable::from_parts(&parts.strings),
        }
    }
}

/// Transferable blocks behind a [`WayTable`].
#[derive(Debug)]
pub struct WayTableParts {
    /// ID index blocks.
    pub ids: IdIndexParts,
    /// Flat node reference column.
    pub refs: Box<[i64]>,
    /// Exclusive end offset per way into `refs`.
    pub ref_end: Box<[u32]>,
    /// Tag columns.
    pub tags: TagColumnsParts,
    /// Info columns.
    pub info: InfoColumnsParts,
    /// String table blocks.
    pub strings: StringTableParts,
}

/// Columnar relation storage: ID index, flat member columns with per-
/// relation end offsets, and tag/info columns.
#[derive(Debug, Default)]
pub struct RelationTable {
    ids: IdIndex,
    member_ref: GrowableBuffer<i64>,
    member_kind: GrowableBuffer<u8>,
    member_role: GrowableBuffer<u32>,
    member_end: GrowableBuffer<u32>,
    tags: TagColumns,
    info: InfoColumns,
    strings: StringTable,
}

impl RelationTable {
    /// Number of stored relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether [`Self::finish`] has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ids.is_ready()
    }

    pub(crate) fn add(&mut self, relation: &Relation) -> Result<(), StoreError> {
        if self.is_ready() {
            return Err(StoreError::Frozen {
                kind: EntityKind::Relation,
            });
        }
        self.ids.push(relation.id)?;
        for member in &relation.members {
            let role_id = self.strings.intern(&member.role);
            self.member_ref.push(member.member_ref)?;
            self.member_kind.push(member.kind as u8)?;
            self.member_role.push(role_id)?;
        }
        self.member_end
            .push(u32::try_from(self.member_ref.len()).unwrap_or(u32::MAX))?;
        self.tags.append(&mut self.strings, &relation.tags)?;
        self.info.append(&mut self.strings, relation.info.as_ref())?;
        Ok(())
    }

    pub(crate) fn finish(&mut self) -> Result<(), StoreError> {
        self.ids.finish()?;
        self.member_ref.compact();
        self.member_kind.compact();
        self.member_role.compact();
        self.member_end.compact();
        self.tags.compact();
        self.info.compact();
        Ok(())
    }

    /// Reconstruct the relation at a dense position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<Relation> {
        let id = self.ids.id_at(position)?;
        let start = if position == 0 {
            0
        } else {
            self.member_end.get(position - 1)? as usize
        };
        let end = self.member_end.get(position)? as usize;
        let mut members = Vec::with_capacity(end - start);
        for offset in start..end {
            let kind = EntityKind::from_u8(self.member_kind.get(offset)?)?;
            let role_id = self.member_role.get(offset)?;
            members.push(Member {
                kind,
                member_ref: self.member_ref.get(offset)?,
                role: self.strings.get(role_id).unwrap_or_default().to_owned(),
            });
        }
        Some(Relation {
            id,
            members,
            tags: self.tags.read(position, &self.strings),
            info: self.info.read(position, &self.strings),
        })
    }

    /// The ID stored at a dense position.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.id_at(position)
    }

    /// Dense position of an ID; requires a frozen table.
    pub fn position_of(&self, id: i64) -> Result<Option<usize>, StoreError> {
        Ok(self.ids.position_of(id)?)
    }

    /// Look a relation up by ID; requires a frozen table.
    pub fn by_id(&self, id: i64) -> Result<Option<Relation>, StoreError> {
        Ok(self.position_of(id)?.and_then(|position| self.get(position)))
    }

    /// Iterate relations in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Relation> + '_ {
        (0..self.len()).filter_map(|position| self.get(position))
    }

    pub(crate) fn into_parts(self) -> Result<RelationTableParts, StoreError> {
        Ok(RelationTableParts {
            ids: self.ids.into_parts()?,
            member_ref: self.member_ref.into_block(),
            member_kind: self.member_kind.into_block(),
            member_role: self.member_role.into_block(),
            member_end: self.member_end.into_block(),
            tags: self.tags.into_parts(),
            info: self.info.into_parts(),
            strings: self.strings.into_parts(),
        })
    }

    pub(crate) fn from_parts(parts: RelationTableParts) -> Self {
        Self {
            ids: IdIndex::from_parts(parts.ids),
            member_ref: GrowableBuffer::from_block(parts.member_ref),
            member_kind: GrowableBuffer::from_block(parts.member_kind),
            member_role: GrowableBuffer::from_block(parts.member_role),
            member_end: GrowableBuffer::from_block(parts.member_end),
            tags: TagColumns::from_parts(parts.tags),
            info: InfoColumns::from_parts(parts.info),
            strings: StringTable::from_parts(&parts.strings),
        }
    }
}

/// Transferable blocks behind a [`RelationTable`].
#[derive(Debug)]
pub struct RelationTableParts {
    /// ID index blocks.
    pub ids: IdIndexParts,
    /// Flat member reference column.
    pub member_ref: Box<[i64]>,
    /// Flat member kind column (wire discriminants).
    pub member_kind: Box<[u8]>,
    /// Flat member role string indices.
    pub member_role: Box<[u32]>,
    /// Exclusive end offset per relation into the member columns.
    pub member_end: Box<[u32]>,
    /// Tag columns.
    pub tags: TagColumnsParts,
    /// Info columns.
    pub info: InfoColumnsParts,
    /// String table blocks.
    pub strings: StringTableParts,
}
