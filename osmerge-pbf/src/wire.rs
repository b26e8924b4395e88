//! Protobuf wire primitives: LEB128 varints, zigzag, tags, packed runs.

use thiserror::Error;

/// Errors raised at the protobuf wire level.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input ended inside a varint, tag, or length-delimited field.
    #[error("unexpected end of protobuf input")]
    UnexpectedEof,
    /// A varint did not fit in 64 bits.
    #[error("varint exceeds 64 bits")]
    VarintOverflow,
    /// A field used a wire type this decoder does not handle.
    #[error("unsupported wire type {wire_type} for field {field}")]
    UnsupportedWireType {
        /// Field number carrying the unexpected type.
        field: u32,
        /// The raw wire type bits.
        wire_type: u8,
    },
    /// A string field held invalid UTF-8.
    #[error("invalid UTF-8 in string field: {source}")]
    InvalidUtf8 {
        /// Underlying UTF-8 error.
        #[source]
        source: std::str::Utf8Error,
    },
}

/// Protobuf wire types used by the PBF format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_bits(field: u32, bits: u8) -> Result<Self, WireError> {
        match bits {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            wire_type => Err(WireError::UnsupportedWireType { field, wire_type }),
        }
    }
}

/// Zigzag-encode a signed value: 0 → 0, −1 → 1, 1 → 2, −2 → 3, …
#[inline]
pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Invert [`zigzag_encode`].
#[inline]
pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

/// Cursor over a protobuf message payload.
#[derive(Debug)]
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Read one LEB128 varint.
    pub(crate) fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = *self.buf.get(self.pos).ok_or(WireError::UnexpectedEof)?;
            self.pos += 1;
            let payload = u64::from(byte & 0x7F);
            // The tenth byte may only contribute a single bit.
            if shift >= 63 && payload > 1 {
                return Err(WireError::VarintOverflow);
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read a zigzag-encoded signed varint.
    pub(crate) fn read_sint(&mut self) -> Result<i64, WireError> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    /// Read a field tag: `(field number, wire type)`.
    pub(crate) fn read_tag(&mut self) -> Result<(u32, WireType), WireError> {
        let key = self.read_varint()?;
        let field = u32::try_from(key >> 3).map_err(|_| WireError::VarintOverflow)?;
        let wire_type = WireType::from_bits(field, (key & 0x7) as u8)?;
        Ok((field, wire_type))
    }

    /// Read a length-delimited payload as a borrowed slice.
    pub(crate) fn read_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = usize::try_from(self.read_varint()?).map_err(|_| WireError::VarintOverflow)?;
        let end = self.pos.checked_add(len).ok_or(WireError::UnexpectedEof)?;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    /// Read a length-delimited UTF-8 string.
    pub(crate) fn read_string(&mut self) -> Result<&'a str, WireError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|source| WireError::InvalidUtf8 { source })
    }

    /// Skip a field of the given wire type.
    pub(crate) fn skip(&mut self, wire_type: WireType) -> Result<(), WireError> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => self.advance(8)?,
            WireType::LengthDelimited => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => self.advance(4)?,
        }
        Ok(())
    }

    /// Decode a packed run of unsigned varints.
    pub(crate) fn read_packed_varint(&mut self) -> Result<Vec<u64>, WireError> {
        let mut inner = Self::new(self.read_bytes()?);
        let mut values = Vec::new();
        while !inner.is_at_end() {
            values.push(inner.read_varint()?);
        }
        Ok(values)
    }

    /// Decode a packed run of zigzag-encoded signed varints.
    pub(crate) fn read_packed_sint(&mut self) -> Result<Vec<i64>, WireError> {
        let mut inner = Self::new(self.read_bytes()?);
        let mut values = Vec::new();
        while !inner.is_at_end() {
            values.push(inner.read_sint()?);
        }
        Ok(values)
    }

    /// Decode a packed run of plain (non-zigzag) signed varints.
    pub(crate) fn read_packed_int(&mut self) -> Result<Vec<i64>, WireError> {
        let mut inner = Self::new(self.read_bytes()?);
        let mut values = Vec::new();
        while !inner.is_at_end() {
            values.push(inner.read_varint()? as i64);
        }
        Ok(values)
    }

    fn advance(&mut self, by: usize) -> Result<(), WireError> {
        let end = self.pos.checked_add(by).ok_or(WireError::UnexpectedEof)?;
        if end > self.buf.len() {
            return Err(WireError::UnexpectedEof);
        }
        self.pos = end;
        Ok(())
    }
}

/// Append-only protobuf message builder.
#[derive(Debug, Default)]
pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn write_varint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn write_tag(&mut self, field: u32, wire_type_bits: u64) {
        self.write_varint((u64::from(field) << 3) | wire_type_bits);
    }

    /// Unsigned (or plain two's-complement signed) varint field.
    pub(crate) fn varint_field(&mut self, field: u32, value: u64) {
        self.write_tag(field, 0);
        self.write_varint(value);
    }

    /// Zigzag-encoded signed varint field.
    pub(crate) fn sint_field(&mut self, field: u32, value: i64) {
        self.write_tag(field, 0);
        self.write_varint(zigzag_encode(value));
    }

    /// Length-delimited bytes field.
    pub(crate) fn bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, 2);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    /// Length-delimited string field.
    pub(crate) fn string_field(&mut self, field: u32, value: &str) {
        self.bytes_field(field, value.as_bytes());
    }

    /// Nested message field.
    pub(crate) fn message_field(&mut self, field: u32, message: Self) {
        self.bytes_field(field, &message.into_bytes());
    }

    /// Packed run of unsigned varints; skipped entirely when empty.
    pub(crate) fn packed_varint_field(&mut self, field: u32, values: impl Iterator<Item = u64>) {
        let mut inner = Self::new();
        for value in values {
            inner.write_varint(value);
        }
        if !inner.buf.is_empty() {
            self.bytes_field(field, &inner.buf);
        }
    }

    /// Packed run of zigzag-encoded signed varints.
    pub(crate) fn packed_sint_field(&mut self, field: u32, values: impl Iterator<Item = i64>) {
        self.packed_varint_field(field, values.map(zigzag_encode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_varint(value: u64) {
        let mut writer = WireWriter::new();
        writer.write_varint(value);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_varint().expect("decode"), value);
        assert!(reader.is_at_end());
    }

    #[test]
    fn varint_round_trips_across_widths() {
        for value in [0, 1, 127, 128, 300, 65_535, 65_536, u64::from(u32::MAX), u64::MAX] {
            round_trip_varint(value);
        }
    }

    #[test]
    fn varint_boundary_lengths() {
        let mut writer = WireWriter::new();
        writer.write_varint(127);
        assert_eq!(writer.into_bytes().len(), 1);
        let mut writer = WireWriter::new();
        writer.write_varint(128);
        assert_eq!(writer.into_bytes().len(), 2);
    }

    #[test]
    fn varint_eof_is_detected() {
        let mut reader = WireReader::new(&[]);
        assert!(matches!(
            reader.read_varint(),
            Err(WireError::UnexpectedEof)
        ));
        // A continuation bit with nothing after it.
        let mut reader = WireReader::new(&[0x80]);
        assert!(matches!(
            reader.read_varint(),
            Err(WireError::UnexpectedEof)
        ));
    }

    #[test]
    fn varint_overflow_is_detected() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let mut reader = WireReader::new(&bytes);
        assert!(matches!(
            reader.read_varint(),
            Err(WireError::VarintOverflow)
        ));
    }

    #[test]
    fn zigzag_maps_small_magnitudes_to_small_codes() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for value in [0, 1, -1, 100, -100, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(value)), value);
        }
    }

    #[test]
    fn packed_sint_round_trips() {
        let values = [0_i64, -5, 7, 1_000_000, -1_000_000];
        let mut writer = WireWriter::new();
        writer.packed_sint_field(1, values.iter().copied());
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        let (field, wire_type) = reader.read_tag().expect("tag");
        assert_eq!(field, 1);
        assert_eq!(wire_type, WireType::LengthDelimited);
        assert_eq!(reader.read_packed_sint().expect("packed"), values);
    }

    #[test]
    fn skip_passes_over_unknown_fields() {
        let mut writer = WireWriter::new();
        writer.varint_field(1, 42);
        writer.string_field(2, "skipped");
        writer.varint_field(3, 7);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        let mut seen = Vec::new();
        while !reader.is_at_end() {
            let (field, wire_type) = reader.read_tag().expect("tag");
            if field == 2 {
                reader.skip(wire_type).expect("skip");
            } else {
                seen.push(reader.read_varint().expect("varint"));
            }
        }
        assert_eq!(seen, vec![42, 7]);
    }
}
