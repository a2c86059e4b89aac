//! Minimal bencode codec.
//!
//! Dictionaries are backed by `BTreeMap`, which yields the sorted-key
//! encoding the BitTorrent spec requires, so encoding is canonical by
//! construction.

use std::collections::BTreeMap;

use crate::error::{TorrentError, TorrentResult};

/// One bencoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    /// Integer (`i...e`).
    Int(i64),
    /// Byte string (`<len>:<bytes>`).
    Bytes(Vec<u8>),
    /// List (`l...e`).
    List(Vec<Bencode>),
    /// Dictionary (`d...e`), keys sorted bytewise.
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

impl Bencode {
    /// Convenience constructor for string keys/values.
    #[must_use]
    pub fn str(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }

    /// Encode into bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(value) => {
                out.push(b'i');
                out.extend_from_slice(value.to_string().as_bytes());
                out.push(b'e');
            }
            Self::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Self::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Self::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    out.extend_from_slice(key.len().to_string().as_bytes());
                    out.push(b':');
                    out.extend_from_slice(key);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Decode a complete bencoded document.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or trailing garbage.
    pub fn decode(data: &[u8]) -> TorrentResult<Self> {
        let (value, consumed) = Self::decode_at(data, 0)?;
        if consumed != data.len() {
            return Err(TorrentError::Bencode {
                offset: Some(consumed),
            });
        }
        Ok(value)
    }

    fn decode_at(data: &[u8], offset: usize) -> TorrentResult<(Self, usize)> {
        match data.get(offset) {
            Some(b'i') => Self::decode_int(data, offset),
            Some(b'l') => Self::decode_list(data, offset),
            Some(b'd') => Self::decode_dict(data, offset),
            Some(b'0'..=b'9') => Self::decode_bytes(data, offset),
            _ => Err(TorrentError::Bencode {
                offset: Some(offset),
            }),
        }
    }

    fn decode_int(data: &[u8], offset: usize) -> TorrentResult<(Self, usize)> {
        let end = find_byte(data, offset + 1, b'e')?;
        let digits = std::str::from_utf8(&data[offset + 1..end]).map_err(|_| {
            TorrentError::Bencode {
                offset: Some(offset),
            }
        })?;
        let value = digits.parse::<i64>().map_err(|_| TorrentError::Bencode {
            offset: Some(offset),
        })?;
        Ok((Self::Int(value), end + 1))
    }

    fn decode_bytes(data: &[u8], offset: usize) -> TorrentResult<(Self, usize)> {
        let colon = find_byte(data, offset, b':')?;
        let length = std::str::from_utf8(&data[offset..colon])
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or(TorrentError::Bencode {
                offset: Some(offset),
            })?;
        let start = colon + 1;
        let end = start.checked_add(length).ok_or(TorrentError::Bencode {
            offset: Some(offset),
        })?;
        if end > data.len() {
            return Err(TorrentError::Bencode {
                offset: Some(offset),
            });
        }
        Ok((Self::Bytes(data[start..end].to_vec()), end))
    }

    fn decode_list(data: &[u8], offset: usize) -> TorrentResult<(Self, usize)> {
        let mut cursor = offset + 1;
        let mut items = Vec::new();
        loop {
            match data.get(cursor) {
                Some(b'e') => return Ok((Self::List(items), cursor + 1)),
                Some(_) => {
                    let (item, next) = Self::decode_at(data, cursor)?;
                    items.push(item);
                    cursor = next;
                }
                None => {
                    return Err(TorrentError::Bencode {
                        offset: Some(cursor),
                    });
                }
            }
        }
    }

    fn decode_dict(data: &[u8], offset: usize) -> TorrentResult<(Self, usize)> {
        let mut cursor = offset + 1;
        let mut entries = BTreeMap::new();
        loop {
            match data.get(cursor) {
                Some(b'e') => return Ok((Self::Dict(entries), cursor + 1)),
                Some(_) => {
                    let (key, next) = Self::decode_at(data, cursor)?;
                    let Self::Bytes(key) = key else {
                        return Err(TorrentError::Bencode {
                            offset: Some(cursor),
                        });
                    };
                    let (value, after) = Self::decode_at(data, next)?;
                    entries.insert(key, value);
                    cursor = after;
                }
                None => {
                    return Err(TorrentError::Bencode {
                        offset: Some(cursor),
                    });
                }
            }
        }
    }

    /// Borrow the dictionary entries, when this value is a dict.
    #[must_use]
    pub const fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Bencode>> {
        match self {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Borrow the byte payload, when this value is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Copy out the integer, when this value is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

fn find_byte(data: &[u8], from: usize, needle: u8) -> TorrentResult<usize> {
    data[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|pos| from + pos)
        .ok_or(TorrentError::Bencode { offset: Some(from) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_canonical_dict_order() {
        let mut dict = BTreeMap::new();
        dict.insert(b"zeta".to_vec(), Bencode::Int(1));
        dict.insert(b"alpha".to_vec(), Bencode::str("x"));
        let encoded = Bencode::Dict(dict).encode();
        assert_eq!(encoded, b"d5:alpha1:x4:zetai1ee");
    }

    #[test]
    fn round_trips_nested_structures() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::Int(42));
        info.insert(
            b"path".to_vec(),
            Bencode::List(vec![Bencode::str("a"), Bencode::str("b.mxf")]),
        );
        let value = Bencode::Dict(info);
        let encoded = value.encode();
        let decoded = Bencode::decode(&encoded).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = Bencode::decode(b"i1ejunk").expect_err("must fail");
        assert!(matches!(err, TorrentError::Bencode { .. }));
    }

    #[test]
    fn rejects_truncated_string() {
        assert!(Bencode::decode(b"10:short").is_err());
    }

    #[test]
    fn decodes_negative_integers() {
        assert_eq!(Bencode::decode(b"i-7e").expect("decode"), Bencode::Int(-7));
    }
}
