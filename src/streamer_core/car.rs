//! CAR v1 block store reader
//!
//! Layout: `varint(header_len) | header (DAG-CBOR {version, roots})` followed
//! by sections `varint(section_len) | cid bytes | block bytes` until EOF.

use super::decode_error::DecodeError;
use ciborium::value::Value;
use cid::Cid;
use std::collections::HashMap;
use std::io::Cursor;

/// Read one unsigned LEB128 varint starting at `pos`, advancing it.
pub fn read_uvarint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| DecodeError::Car("truncated varint".to_string()))?;
        *pos += 1;

        let payload = u64::from(byte & 0x7f);
        if shift == 63 && payload > 1 {
            return Err(DecodeError::Car("varint overflows u64".to_string()));
        }
        value |= payload << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }

        shift += 7;
        if shift > 63 {
            return Err(DecodeError::Car("varint too long".to_string()));
        }
    }
}

/// Blocks of one commit, addressed by content id
#[derive(Debug, Default)]
pub struct BlockStore {
    roots: Vec<Cid>,
    blocks: HashMap<Cid, Vec<u8>>,
}

impl BlockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(|b| b.as_slice())
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Parse a complete CAR v1 payload.
pub fn read_car(bytes: &[u8]) -> Result<BlockStore, DecodeError> {
    let mut pos = 0usize;

    let header_len = read_uvarint(bytes, &mut pos)? as usize;
    let header_end = checked_end(pos, header_len, bytes.len())?;
    let header: Value = ciborium::de::from_reader(&bytes[pos..header_end])?;
    let roots = parse_header(&header)?;
    pos = header_end;

    let mut blocks = HashMap::new();
    while pos < bytes.len() {
        let section_len = read_uvarint(bytes, &mut pos)? as usize;
        if section_len == 0 {
            return Err(DecodeError::Car("empty section".to_string()));
        }
        let section_end = checked_end(pos, section_len, bytes.len())?;
        let section = &bytes[pos..section_end];

        let mut cursor = Cursor::new(section);
        let cid = Cid::read_bytes(&mut cursor)?;
        let data_start = cursor.position() as usize;

        blocks.insert(cid, section[data_start..].to_vec());
        pos = section_end;
    }

    Ok(BlockStore { roots, blocks })
}

fn checked_end(start: usize, len: usize, total: usize) -> Result<usize, DecodeError> {
    start
        .checked_add(len)
        .filter(|end| *end <= total)
        .ok_or_else(|| DecodeError::Car(format!("section of {} bytes overruns payload", len)))
}

fn parse_header(header: &Value) -> Result<Vec<Cid>, DecodeError> {
    let entries = match header {
        Value::Map(entries) => entries,
        _ => return Err(DecodeError::Car("header is not a map".to_string())),
    };

    let mut version = None;
    let mut roots = Vec::new();
    for (key, value) in entries {
        match (key, value) {
            (Value::Text(k), Value::Integer(v)) if k == "version" => {
                version = Some(i128::from(*v));
            }
            (Value::Text(k), Value::Array(items)) if k == "roots" => {
                for item in items {
                    if let Some(cid) = super::frame::cid_link(item)? {
                        roots.push(cid);
                    }
                }
            }
            _ => {}
        }
    }

    match version {
        Some(1) => Ok(roots),
        Some(other) => Err(DecodeError::Car(format!("unsupported CAR version {}", other))),
        None => Err(DecodeError::MissingField("version")),
    }
}
