use std::collections::HashSet;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Metadata response magic: 0xCD 0xAB.
pub const METADATA_MAGIC: [u8; 2] = [0xCD, 0xAB];

/// Magic (2) + channel count (1).
pub const METADATA_HEADER_SIZE: usize = 3;

/// Decode a metadata response into the ordered channel name list.
///
/// Wire format:
/// ```text
/// ┌───────────┬─────────┬──────────┬──────────────┬─────┐
/// │ 0xCD 0xAB │ count   │ len (1B) │ name (ASCII) │ ... │
/// │ magic     │ (1B)    │          │ len bytes    │     │
/// └───────────┴─────────┴──────────┴──────────────┴─────┘
/// ```
///
/// The position of each name is the channel's index in every telemetry
/// snapshot, so the returned order must never be changed by callers.
/// Bytes after the last declared name are ignored.
pub fn decode_metadata_response(payload: &[u8]) -> Result<Vec<String>> {
    if payload.len() < METADATA_HEADER_SIZE {
        return Err(WireError::TooShort {
            len: payload.len(),
            min: METADATA_HEADER_SIZE,
        });
    }

    if payload[0..2] != METADATA_MAGIC {
        return Err(WireError::InvalidMetadataMagic);
    }

    let count = payload[2] as usize;
    let mut names = Vec::with_capacity(count);
    let mut seen = HashSet::with_capacity(count);
    let mut offset = METADATA_HEADER_SIZE;

    for index in 0..count {
        let len = *payload
            .get(offset)
            .ok_or(WireError::TruncatedName { index })? as usize;
        offset += 1;

        let raw = payload
            .get(offset..offset + len)
            .ok_or(WireError::TruncatedName { index })?;
        offset += len;

        if !raw.is_ascii() {
            return Err(WireError::NonAsciiName { index });
        }
        // ASCII is valid UTF-8.
        let name = String::from_utf8_lossy(raw).into_owned();

        if !seen.insert(name.clone()) {
            return Err(WireError::DuplicateName(name));
        }
        names.push(name);
    }

    Ok(names)
}

/// Encode a metadata response for the given ordered channel names.
pub fn encode_metadata_response<S: AsRef<str>>(names: &[S], dst: &mut BytesMut) -> Result<()> {
    if names.len() > u8::MAX as usize {
        return Err(WireError::TooManyChannels { count: names.len() });
    }

    for (index, name) in names.iter().enumerate() {
        let name = name.as_ref();
        if name.len() > u8::MAX as usize {
            return Err(WireError::NameTooLong { len: name.len() });
        }
        if !name.is_ascii() {
            return Err(WireError::NonAsciiName { index });
        }
    }

    let body: usize = names.iter().map(|n| 1 + n.as_ref().len()).sum();
    dst.reserve(METADATA_HEADER_SIZE + body);
    dst.put_slice(&METADATA_MAGIC);
    dst.put_u8(names.len() as u8);
    for name in names {
        let name = name.as_ref().as_bytes();
        dst.put_u8(name.len() as u8);
        dst.put_slice(name);
    }

    Ok(())
}
