//! Decoder for Minecraft's Named Binary Tag format: a tagged tree of typed
//! values, each serialized as `tag_id | name_len: u16be | name | payload`.
//!
//! The decoder is pure: it borrows nothing from its input past the call.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as Flate2Compression;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

#[derive(Debug, thiserror::Error)]
pub enum NbtError {
    #[error("truncated NBT stream: wanted {wanted} bytes, had {available}")]
    Truncated { wanted: usize, available: usize },
    #[error("unknown NBT tag id {0}")]
    UnknownTag(u8),
    #[error("declared length {len} exceeds remaining input")]
    LengthOverflow { len: i64 },
    #[error("invalid UTF-8 in NBT string")]
    InvalidString,
    #[error("I/O error decompressing NBT stream: {0}")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, NbtError>;

/// How the raw chunk blob is compressed, per the region-file blob header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
    Uncompressed,
}

/// A decoded NBT value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

/// An ordered `name -> Tag` mapping (order preserved so re-encoding is
/// byte-identical to the original stream).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) {
        self.entries.push((name.into(), tag));
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Tag)> {
        self.entries.iter()
    }

    pub fn get_i8(&self, name: &str) -> Option<i8> {
        match self.get(name) {
            Some(Tag::Byte(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(Tag::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64_array(&self, name: &str) -> Option<&[i64]> {
        match self.get(name) {
            Some(Tag::LongArray(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Tag::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_compound(&self, name: &str) -> Option<&Compound> {
        match self.get(name) {
            Some(Tag::Compound(c)) => Some(c),
            _ => None,
        }
    }

    pub fn get_list(&self, name: &str) -> Option<&[Tag]> {
        match self.get(name) {
            Some(Tag::List(v)) => Some(v),
            _ => None,
        }
    }
}

/// Decodes a chunk's tagged binary blob into a tree of typed values.
pub fn decode(bytes: &[u8], compression: Compression) -> Result<Compound> {
    let decompressed;
    let plain = match compression {
        Compression::Uncompressed => bytes,
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut out)?;
            decompressed = out;
            &decompressed
        }
        Compression::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(bytes).read_to_end(&mut out)?;
            decompressed = out;
            &decompressed
        }
    };

    let mut cursor = Cursor { data: plain, pos: 0 };
    let (_name, tag_id) = cursor.read_named_tag_header()?;
    if tag_id != TAG_COMPOUND {
        // Not invalid per se by NBT's grammar, but every caller in this
        // crate expects a compound root.
        return Err(NbtError::UnknownTag(tag_id));
    }
    cursor.read_compound_payload()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn need(&self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            Err(NbtError::Truncated {
                wanted: n,
                available: self.data.len().saturating_sub(self.pos),
            })
        } else {
            Ok(())
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i16()? as u16 as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NbtError::InvalidString)
    }

    fn read_named_tag_header(&mut self) -> Result<(String, u8)> {
        let tag_id = self.read_u8()?;
        if tag_id == TAG_END {
            return Ok((String::new(), TAG_END));
        }
        let name = self.read_string()?;
        Ok((name, tag_id))
    }

    fn read_payload(&mut self, tag_id: u8) -> Result<Tag> {
        Ok(match tag_id {
            TAG_BYTE => Tag::Byte(self.read_i8()?),
            TAG_SHORT => Tag::Short(self.read_i16()?),
            TAG_INT => Tag::Int(self.read_i32()?),
            TAG_LONG => Tag::Long(self.read_i64()?),
            TAG_FLOAT => Tag::Float(self.read_f32()?),
            TAG_DOUBLE => Tag::Double(self.read_f64()?),
            TAG_BYTE_ARRAY => {
                let len = self.read_array_len()?;
                let bytes = self.take(len)?;
                Tag::ByteArray(bytes.iter().map(|&b| b as i8).collect())
            }
            TAG_STRING => Tag::String(self.read_string()?),
            TAG_LIST => {
                let elem_tag = self.read_u8()?;
                let len = self.read_array_len()?;
                let mut items = Vec::with_capacity(len.min(1 << 16));
                for _ in 0..len {
                    if elem_tag == TAG_END {
                        break;
                    }
                    items.push(self.read_payload(elem_tag)?);
                }
                Tag::List(items)
            }
            TAG_COMPOUND => Tag::Compound(self.read_compound_payload()?),
            TAG_INT_ARRAY => {
                let len = self.read_array_len()?;
                let mut v = Vec::with_capacity(len.min(1 << 16));
                for _ in 0..len {
                    v.push(self.read_i32()?);
                }
                Tag::IntArray(v)
            }
            TAG_LONG_ARRAY => {
                let len = self.read_array_len()?;
                let mut v = Vec::with_capacity(len.min(1 << 16));
                for _ in 0..len {
                    v.push(self.read_i64()?);
                }
                Tag::LongArray(v)
            }
            other => return Err(NbtError::UnknownTag(other)),
        })
    }

    fn read_array_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        if len < 0 || len as i64 > (self.data.len() - self.pos) as i64 {
            return Err(NbtError::LengthOverflow { len: len as i64 });
        }
        Ok(len as usize)
    }

    fn read_compound_payload(&mut self) -> Result<Compound> {
        let mut compound = Compound::new();
        loop {
            let (name, tag_id) = self.read_named_tag_header()?;
            if tag_id == TAG_END {
                break;
            }
            let payload = self.read_payload(tag_id)?;
            compound.insert(name, payload);
        }
        Ok(compound)
    }
}

/// Re-encodes a compound tree, used only by the round-trip test fixture.
pub fn encode(root: &Compound, compression: Compression) -> Result<Vec<u8>> {
    let mut plain = Vec::new();
    plain.write_u8(TAG_COMPOUND)?;
    write_string(&mut plain, "")?;
    write_compound_payload(&mut plain, root)?;

    Ok(match compression {
        Compression::Uncompressed => plain,
        Compression::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), Flate2Compression::default());
            enc.write_all(&plain)?;
            enc.finish()?
        }
        Compression::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), Flate2Compression::default());
            enc.write_all(&plain)?;
            enc.finish()?
        }
    })
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    out.write_u16::<BigEndian>(s.len() as u16)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_payload(out: &mut Vec<u8>, tag: &Tag) -> Result<()> {
    match tag {
        Tag::Byte(v) => out.write_i8(*v)?,
        Tag::Short(v) => out.write_i16::<BigEndian>(*v)?,
        Tag::Int(v) => out.write_i32::<BigEndian>(*v)?,
        Tag::Long(v) => out.write_i64::<BigEndian>(*v)?,
        Tag::Float(v) => out.write_f32::<BigEndian>(*v)?,
        Tag::Double(v) => out.write_f64::<BigEndian>(*v)?,
        Tag::ByteArray(v) => {
            out.write_i32::<BigEndian>(v.len() as i32)?;
            for b in v {
                out.write_i8(*b)?;
            }
        }
        Tag::String(v) => write_string(out, v)?,
        Tag::List(items) => {
            let elem_tag = items.first().map(tag_id_of).unwrap_or(TAG_END);
            out.write_u8(elem_tag)?;
            out.write_i32::<BigEndian>(items.len() as i32)?;
            for item in items {
                write_payload(out, item)?;
            }
        }
        Tag::Compound(c) => write_compound_payload(out, c)?,
        Tag::IntArray(v) => {
            out.write_i32::<BigEndian>(v.len() as i32)?;
            for i in v {
                out.write_i32::<BigEndian>(*i)?;
            }
        }
        Tag::LongArray(v) => {
            out.write_i32::<BigEndian>(v.len() as i32)?;
            for i in v {
                out.write_i64::<BigEndian>(*i)?;
            }
        }
    }
    Ok(())
}

fn write_compound_payload(out: &mut Vec<u8>, compound: &Compound) -> Result<()> {
    for (name, tag) in compound.iter() {
        out.write_u8(tag_id_of(tag))?;
        write_string(out, name)?;
        write_payload(out, tag)?;
    }
    out.write_u8(TAG_END)?;
    Ok(())
}

fn tag_id_of(tag: &Tag) -> u8 {
    match tag {
        Tag::Byte(_) => TAG_BYTE,
        Tag::Short(_) => TAG_SHORT,
        Tag::Int(_) => TAG_INT,
        Tag::Long(_) => TAG_LONG,
        Tag::Float(_) => TAG_FLOAT,
        Tag::Double(_) => TAG_DOUBLE,
        Tag::ByteArray(_) => TAG_BYTE_ARRAY,
        Tag::String(_) => TAG_STRING,
        Tag::List(_) => TAG_LIST,
        Tag::Compound(_) => TAG_COMPOUND,
        Tag::IntArray(_) => TAG_INT_ARRAY,
        Tag::LongArray(_) => TAG_LONG_ARRAY,
    }
}

/// Counts, per property key, the distinct values seen -- used by
/// `BlockStateRegistry` to report which keys a block kind recognizes.
pub fn collect_property_keys(palette: &[Tag]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in palette {
        if let Tag::Compound(c) = entry {
            if let Some(Tag::Compound(props)) = c.get("Properties") {
                for (k, v) in props.iter() {
                    if let Tag::String(v) = v {
                        out.entry(k.clone()).or_default().push(v.clone());
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Compound {
        let mut inner = Compound::new();
        inner.insert("Y", Tag::Byte(3));
        inner.insert("name", Tag::String("minecraft:stone".into()));

        let mut root = Compound::new();
        root.insert("DataVersion", Tag::Int(3465));
        root.insert("section", Tag::Compound(inner));
        root.insert("ids", Tag::LongArray(vec![1, 2, 3]));
        root.insert("list", Tag::List(vec![Tag::Int(1), Tag::Int(2)]));
        root
    }

    #[test]
    fn roundtrip_uncompressed() {
        let root = sample();
        let bytes = encode(&root, Compression::Uncompressed).unwrap();
        let decoded = decode(&bytes, Compression::Uncompressed).unwrap();
        assert_eq!(root, decoded);
    }

    #[test]
    fn roundtrip_gzip() {
        let root = sample();
        let bytes = encode(&root, Compression::Gzip).unwrap();
        let decoded = decode(&bytes, Compression::Gzip).unwrap();
        assert_eq!(root, decoded);
    }

    #[test]
    fn roundtrip_zlib() {
        let root = sample();
        let bytes = encode(&root, Compression::Zlib).unwrap();
        let decoded = decode(&bytes, Compression::Zlib).unwrap();
        assert_eq!(root, decoded);
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = [TAG_COMPOUND, 0, 0]; // header says compound, then nothing
        let err = decode(&bytes, Compression::Uncompressed).unwrap_err();
        assert!(matches!(err, NbtError::Truncated { .. }));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let bytes = [TAG_COMPOUND, 0, 0, 200, 0, 0];
        let err = decode(&bytes, Compression::Uncompressed).unwrap_err();
        assert!(matches!(err, NbtError::UnknownTag(200)));
    }

    #[test]
    fn byte_array_length_overflow_is_reported() {
        // tag=byte_array(7), name="" (len 0), declared array length huge
        let mut bytes = vec![TAG_COMPOUND, 0, 0];
        bytes.push(TAG_BYTE_ARRAY);
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&i32::MAX.to_be_bytes());
        let err = decode(&bytes, Compression::Uncompressed).unwrap_err();
        assert!(matches!(err, NbtError::LengthOverflow { .. }));
    }
}
