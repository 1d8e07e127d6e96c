//! Composite-key values, wire encoding, and three-way comparison.
//!
//! A key has `nparts` parts, each `INT` or `VARSTRING`, each independently
//! ascending or descending; multi-part compare is left-to-right with
//! first-difference wins.

use crate::types::{CompResult, KeyDescriptor, KeyPartType};

/// One part's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPartVal {
    Int(i32),
    Str(Vec<u8>),
}

/// A composite key value: one [`KeyPartVal`] per part named in the
/// [`KeyDescriptor`] it was built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal(pub Vec<KeyPartVal>);

impl KeyVal {
    pub fn single_int(v: i32) -> Self {
        Self(vec![KeyPartVal::Int(v)])
    }

    pub fn single_str(v: impl Into<Vec<u8>>) -> Self {
        Self(vec![KeyPartVal::Str(v.into())])
    }

    /// Encode onto the wire: `Int` as 4 big-endian bytes, `Str` as a `u16`
    /// length prefix followed by the bytes, concatenated part by part.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in &self.0 {
            match part {
                KeyPartVal::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                KeyPartVal::Str(s) => {
                    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                    out.extend_from_slice(s);
                }
            }
        }
        out
    }

    pub fn decode(desc: &KeyDescriptor, bytes: &[u8]) -> Self {
        let mut parts = Vec::with_capacity(desc.nparts);
        let mut off = 0;
        for part in &desc.parts[..desc.nparts] {
            match part.ktype {
                KeyPartType::Int => {
                    let v = i32::from_be_bytes(bytes[off..off + 4].try_into().unwrap());
                    parts.push(KeyPartVal::Int(v));
                    off += 4;
                }
                KeyPartType::VarString => {
                    let len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
                    off += 2;
                    parts.push(KeyPartVal::Str(bytes[off..off + len].to_vec()));
                    off += len;
                }
            }
        }
        Self(parts)
    }

    /// Byte length of `self`'s wire encoding, computed without allocating.
    pub fn encoded_len(&self) -> usize {
        self.0
            .iter()
            .map(|p| match p {
                KeyPartVal::Int(_) => 4,
                KeyPartVal::Str(s) => 2 + s.len(),
            })
            .sum()
    }
}

/// Left-to-right, first-difference-wins composite comparison, honoring
/// each part's ascending/descending flag.
pub fn key_compare(desc: &KeyDescriptor, a: &KeyVal, b: &KeyVal) -> CompResult {
    for (i, part) in desc.parts[..desc.nparts].iter().enumerate() {
        let ord = match (&a.0[i], &b.0[i]) {
            (KeyPartVal::Int(x), KeyPartVal::Int(y)) => x.cmp(y),
            (KeyPartVal::Str(x), KeyPartVal::Str(y)) => x.cmp(y),
            _ => panic!("key part type mismatch at index {i}"),
        };
        let ord = if part.ascending { ord } else { ord.reverse() };
        match ord {
            std::cmp::Ordering::Less => return CompResult::Less,
            std::cmp::Ordering::Greater => return CompResult::Greater,
            std::cmp::Ordering::Equal => continue,
        }
    }
    CompResult::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyPartType;

    #[test]
    fn int_key_round_trips_through_wire_encoding() {
        let desc = KeyDescriptor::single(KeyPartType::Int, true);
        let key = KeyVal::single_int(42);
        let bytes = key.encode();
        assert_eq!(KeyVal::decode(&desc, &bytes), key);
    }

    #[test]
    fn string_key_round_trips_through_wire_encoding() {
        let desc = KeyDescriptor::single(KeyPartType::VarString, true);
        let key = KeyVal::single_str(b"hello".to_vec());
        let bytes = key.encode();
        assert_eq!(KeyVal::decode(&desc, &bytes), key);
    }

    #[test]
    fn descending_flag_reverses_comparison() {
        let desc = KeyDescriptor::single(KeyPartType::Int, false);
        let a = KeyVal::single_int(10);
        let b = KeyVal::single_int(20);
        assert_eq!(key_compare(&desc, &a, &b), CompResult::Greater);
        assert_eq!(key_compare(&desc, &b, &a), CompResult::Less);
    }

    #[test]
    fn multi_part_compare_is_first_difference_wins() {
        let mut desc = KeyDescriptor::single(KeyPartType::Int, true);
        desc.nparts = 2;
        desc.parts[1] = crate::types::KeyPart {
            ktype: KeyPartType::Int,
            ascending: true,
        };
        let a = KeyVal(vec![KeyPartVal::Int(1), KeyPartVal::Int(99)]);
        let b = KeyVal(vec![KeyPartVal::Int(1), KeyPartVal::Int(5)]);
        assert_eq!(key_compare(&desc, &a, &b), CompResult::Greater);
    }
}
