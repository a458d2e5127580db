//! Minimal RLP encoder covering what a legacy transaction needs.

/// A value ready to be RLP encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Item::Bytes(value.into())
    }

    /// Unsigned integer as minimal big-endian bytes (zero encodes empty).
    pub fn uint(value: u128) -> Self {
        Item::Bytes(trim_leading_zeros(&value.to_be_bytes()).to_vec())
    }

    /// Big-endian integer given as raw bytes, e.g. a 32-byte signature scalar.
    pub fn uint_bytes(value: &[u8]) -> Self {
        Item::Bytes(trim_leading_zeros(value).to_vec())
    }
}

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(bytes) if bytes.len() == 1 && bytes[0] < 0x80 => out.push(bytes[0]),
        Item::Bytes(bytes) => {
            write_header(0x80, bytes.len(), out);
            out.extend_from_slice(bytes);
        }
        Item::List(items) => {
            let mut payload = Vec::new();
            for item in items {
                encode_into(item, &mut payload);
            }
            write_header(0xc0, payload.len(), out);
            out.extend_from_slice(&payload);
        }
    }
}

fn write_header(offset: u8, len: usize, out: &mut Vec<u8>) {
    if len <= 55 {
        out.push(offset + len as u8);
        return;
    }
    let len_bytes = (len as u64).to_be_bytes();
    let len_bytes = trim_leading_zeros(&len_bytes);
    out.push(offset + 55 + len_bytes.len() as u8);
    out.extend_from_slice(len_bytes);
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
