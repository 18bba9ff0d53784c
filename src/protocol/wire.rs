//! Low-level protobuf wire primitives: tags, varints, zig-zag and fixed-width values.
//!
//! ```text
//! tag    = varint((field_id << 3) | wire_type)
//! field  = tag payload
//!
//! wire_type 0: varint
//! wire_type 1: 8 bytes little-endian
//! wire_type 2: varint length, then that many bytes
//! wire_type 5: 4 bytes little-endian
//! ```

use bytes::{BufMut, BytesMut};

/// Largest field id protobuf allows (2^29 - 1)
pub const MAX_FIELD_ID: u32 = (1 << 29) - 1;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Wire type carried in the low three bits of every tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Base-128 varint
    Varint = 0,
    /// Eight little-endian bytes
    Fixed64 = 1,
    /// Length prefix followed by raw bytes
    LengthDelimited = 2,
    /// Deprecated group start, rejected by this codec
    StartGroup = 3,
    /// Deprecated group end, rejected by this codec
    EndGroup = 4,
    /// Four little-endian bytes
    Fixed32 = 5,
}

impl WireType {
    /// Convert from the low three tag bits
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            3 => Some(Self::StartGroup),
            4 => Some(Self::EndGroup),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }

    /// Convert to the tag bits
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Why a read from a frame failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Input ended in the middle of a value
    Truncated,
    /// Varint longer than ten bytes
    VarintOverflow,
    /// Tag carried an unassigned wire type
    InvalidWireType(u8),
    /// Tag carried field id zero
    ZeroFieldId,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "frame truncated mid-field"),
            Self::VarintOverflow => write!(f, "varint exceeds 10 bytes"),
            Self::InvalidWireType(bits) => write!(f, "invalid wire type {bits}"),
            Self::ZeroFieldId => write!(f, "field id 0 is reserved"),
        }
    }
}

/// Zig-zag map a signed 32-bit value so small magnitudes stay short
#[must_use]
pub const fn zigzag_encode32(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`]
#[must_use]
pub const fn zigzag_decode32(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Zig-zag map a signed 64-bit value
#[must_use]
pub const fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode64`]
#[must_use]
pub const fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Number of bytes `value` occupies as a varint
#[must_use]
pub const fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append `value` as a base-128 varint
pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Append a field tag
pub fn put_tag(buf: &mut BytesMut, field_id: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(field_id) << 3) | u64::from(wire_type.as_u8()));
}

/// Append a length prefix followed by `bytes`
pub fn put_length_delimited(buf: &mut BytesMut, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.put_slice(bytes);
}

/// Cursor over an inbound frame
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading at the beginning of `buf`
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// True once every byte has been consumed
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Current offset into the frame
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Read one varint
    pub fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self.buf.get(self.pos).ok_or(WireError::Truncated)?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow)
    }

    /// Read a tag, returning the field id and wire type
    pub fn read_tag(&mut self) -> Result<(u32, WireType), WireError> {
        let raw = self.read_varint()?;
        let bits = (raw & 0x7) as u8;
        let wire_type = WireType::from_u8(bits).ok_or(WireError::InvalidWireType(bits))?;
        let field_id = u32::try_from(raw >> 3).map_err(|_| WireError::VarintOverflow)?;
        if field_id == 0 {
            return Err(WireError::ZeroFieldId);
        }
        Ok((field_id, wire_type))
    }

    /// Read exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    /// Read a length prefix and the bytes it covers
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::Truncated)?;
        self.read_bytes(len)
    }

    /// Read four little-endian bytes
    pub fn read_fixed32(&mut self) -> Result<u32, WireError> {
        let raw = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read eight little-endian bytes
    pub fn read_fixed64(&mut self) -> Result<u64, WireError> {
        let raw = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]))
    }

    /// Skip over the payload of a field with the given wire type
    pub fn skip(&mut self, wire_type: WireType) -> Result<(), WireError> {
        match wire_type {
            WireType::Varint => self.read_varint().map(drop),
            WireType::Fixed64 => self.read_bytes(8).map(drop),
            WireType::LengthDelimited => self.read_length_delimited().map(drop),
            WireType::Fixed32 => self.read_bytes(4).map(drop),
            WireType::StartGroup | WireType::EndGroup => {
                Err(WireError::InvalidWireType(wire_type.as_u8()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_vectors() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
        assert_eq!(zigzag_encode32(i32::MAX), 0xFFFF_FFFE);
        assert_eq!(zigzag_encode32(i32::MIN), 0xFFFF_FFFF);

        for value in [0, 1, -1, 4, -300, i32::MAX, i32::MIN] {
            assert_eq!(zigzag_decode32(zigzag_encode32(value)), value);
        }
        for value in [0, 1, -1, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode64(zigzag_encode64(value)), value);
        }
    }

    #[test]
    fn test_varint_known_bytes() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 300);
        assert_eq!(buf.as_ref(), &[0xAC, 0x02]);
        assert_eq!(varint_len(300), 2);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_varint(), Ok(300));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_varint_max_len() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
        assert_eq!(WireReader::new(&buf).read_varint(), Ok(u64::MAX));
    }

    #[test]
    fn test_varint_overflow_and_truncation() {
        let overlong = [0xFFu8; 11];
        assert_eq!(
            WireReader::new(&overlong).read_varint(),
            Err(WireError::VarintOverflow)
        );

        let cut = [0x80u8, 0x80];
        assert_eq!(WireReader::new(&cut).read_varint(), Err(WireError::Truncated));
    }

    #[test]
    fn test_tag_parsing() {
        let mut buf = BytesMut::new();
        put_tag(&mut buf, 2, WireType::LengthDelimited);
        assert_eq!(buf.as_ref(), &[0x12]);
        assert_eq!(
            WireReader::new(&buf).read_tag(),
            Ok((2, WireType::LengthDelimited))
        );

        assert_eq!(WireReader::new(&[0x07]).read_tag(), Err(WireError::InvalidWireType(7)));
        assert_eq!(WireReader::new(&[0x00]).read_tag(), Err(WireError::ZeroFieldId));
    }

    #[test]
    fn test_skip_each_wire_type() {
        let frame = [
            0x00, // varint 0
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // fixed64
            0x02, 0xAA, 0xBB, // length-delimited (2)
            0x01, 0x02, 0x03, 0x04, // fixed32
        ];
        let mut reader = WireReader::new(&frame);
        reader.skip(WireType::Varint).unwrap();
        reader.skip(WireType::Fixed64).unwrap();
        reader.skip(WireType::LengthDelimited).unwrap();
        reader.skip(WireType::Fixed32).unwrap();
        assert!(reader.is_empty());

        assert!(WireReader::new(&frame).skip(WireType::StartGroup).is_err());
    }

    #[test]
    fn test_length_delimited_truncated() {
        let frame = [0x05, 0x01, 0x02];
        assert_eq!(
            WireReader::new(&frame).read_length_delimited(),
            Err(WireError::Truncated)
        );
    }
}
