//! RLP encoding and decoding
//!
//! Only what the fee-market transaction needs: byte strings, big-endian
//! integers without leading zeros, and nested lists.

use ethers_core::types::U256;

use crate::error::{ChainSigError, ChainSigResult};

pub fn encode_u64(val: u64) -> Vec<u8> {
    encode_bytes(strip_leading_zeros(&val.to_be_bytes()))
}

pub fn encode_u256(val: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    val.to_big_endian(&mut buf);
    encode_bytes(strip_leading_zeros(&buf))
}

pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        return data.to_vec();
    }

    let mut result = encode_header(0x80, data.len());
    result.extend_from_slice(data);
    result
}

/// Wrap already-encoded items in a list
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut result = encode_header(0xc0, payload_len);
    for item in items {
        result.extend_from_slice(item);
    }
    result
}

fn encode_header(offset: u8, len: usize) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let len_bytes = strip_leading_zeros(&len.to_be_bytes()).to_vec();
        let mut result = vec![offset + 55 + len_bytes.len() as u8];
        result.extend_from_slice(&len_bytes);
        result
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let leading_zeros = bytes.iter().take_while(|&&b| b == 0).count();
    &bytes[leading_zeros..]
}

/// Decoded RLP item borrowing from the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<'a> {
    Bytes(&'a [u8]),
    List(Vec<Item<'a>>),
}

impl<'a> Item<'a> {
    pub fn as_bytes(&self) -> ChainSigResult<&'a [u8]> {
        match self {
            Item::Bytes(b) => Ok(*b),
            Item::List(_) => Err(ChainSigError::codec("expected byte string, found list")),
        }
    }

    pub fn as_list(&self) -> ChainSigResult<&[Item<'a>]> {
        match self {
            Item::List(items) => Ok(items.as_slice()),
            Item::Bytes(_) => Err(ChainSigError::codec("expected list, found byte string")),
        }
    }

    pub fn as_u64(&self) -> ChainSigResult<u64> {
        let bytes = self.as_canonical_integer(8)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn as_u256(&self) -> ChainSigResult<U256> {
        let bytes = self.as_canonical_integer(32)?;
        Ok(U256::from_big_endian(bytes))
    }

    fn as_canonical_integer(&self, max_len: usize) -> ChainSigResult<&'a [u8]> {
        let bytes = self.as_bytes()?;
        if bytes.len() > max_len {
            return Err(ChainSigError::codec(format!(
                "integer of {} bytes exceeds {} bytes",
                bytes.len(),
                max_len
            )));
        }
        if bytes.first() == Some(&0) {
            return Err(ChainSigError::codec("integer has leading zero bytes"));
        }
        Ok(bytes)
    }
}

/// Decode exactly one item spanning all of `input`
pub fn decode(input: &[u8]) -> ChainSigResult<Item<'_>> {
    let (item, rest) = decode_item(input)?;
    if !rest.is_empty() {
        return Err(ChainSigError::codec(format!("{} trailing bytes after RLP item", rest.len())));
    }
    Ok(item)
}

fn decode_item(input: &[u8]) -> ChainSigResult<(Item<'_>, &[u8])> {
    let prefix = *input
        .first()
        .ok_or_else(|| ChainSigError::codec("unexpected end of RLP input"))?;

    match prefix {
        0x00..=0x7f => Ok((Item::Bytes(&input[..1]), &input[1..])),
        0x80..=0xbf => {
            let (offset, len) = decode_length(input, 0x80)?;
            let payload = take(input, offset, len)?;
            if len == 1 && payload[0] < 0x80 {
                return Err(ChainSigError::codec("single byte below 0x80 must not be prefixed"));
            }
            Ok((Item::Bytes(payload), &input[offset + len..]))
        }
        0xc0..=0xff => {
            let (offset, len) = decode_length(input, 0xc0)?;
            let mut payload = take(input, offset, len)?;
            let mut items = Vec::new();
            while !payload.is_empty() {
                let (item, rest) = decode_item(payload)?;
                items.push(item);
                payload = rest;
            }
            Ok((Item::List(items), &input[offset + len..]))
        }
    }
}

/// Returns (header length, payload length)
fn decode_length(input: &[u8], offset: u8) -> ChainSigResult<(usize, usize)> {
    let short = input[0] - offset;
    if short < 56 {
        return Ok((1, short as usize));
    }

    let len_of_len = (short - 55) as usize;
    let len_bytes = take(input, 1, len_of_len)?;
    if len_bytes[0] == 0 {
        return Err(ChainSigError::codec("length has leading zero bytes"));
    }
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(ChainSigError::codec("length prefix too large"));
    }
    let len = len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    if len < 56 {
        return Err(ChainSigError::codec("long form used for short payload"));
    }
    Ok((1 + len_of_len, len))
}

fn take(input: &[u8], start: usize, len: usize) -> ChainSigResult<&[u8]> {
    let end = start
        .checked_add(len)
        .ok_or_else(|| ChainSigError::codec("RLP length overflow"))?;
    input
        .get(start..end)
        .ok_or_else(|| ChainSigError::codec("RLP item extends past end of input"))
}
