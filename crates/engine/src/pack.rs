//! Pack encoding and decoding.
//!
//! Incoming packs (push, clone) are fully inflated and resolved — plain
//! entries, offset deltas, and reference deltas — then stored loose.
//! Outgoing packs are written undeltified, which every client accepts.

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, FlushDecompress, Status};
use sha1::{Digest, Sha1};

use crate::object::{ObjectId, ObjectKind};
use crate::{EngineError, EngineResult};

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// A fully resolved pack entry.
#[derive(Clone, Debug)]
pub struct PackedObject {
    pub kind: ObjectKind,
    pub body: Vec<u8>,
    pub id: ObjectId,
}

/// Parse and resolve a pack. `lookup` supplies bases for reference deltas
/// that are not themselves in the pack (already-stored objects).
pub fn parse_pack(
    data: &[u8],
    lookup: &dyn Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
) -> EngineResult<Vec<PackedObject>> {
    if data.len() < 12 + 20 {
        return Err(EngineError::BadPack("pack shorter than header".into()));
    }
    if &data[..4] != PACK_MAGIC {
        return Err(EngineError::BadPack("missing PACK magic".into()));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != PACK_VERSION {
        return Err(EngineError::BadPack(format!("unsupported version {version}")));
    }
    let count = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;

    // The final 20 bytes are the SHA-1 of everything before them.
    let body_end = data.len() - 20;
    let checksum = Sha1::digest(&data[..body_end]);
    if checksum.as_slice() != &data[body_end..] {
        return Err(EngineError::BadPack("checksum mismatch".into()));
    }

    let mut pos = 12;
    let mut by_offset: HashMap<usize, (ObjectKind, Vec<u8>)> = HashMap::new();
    let mut by_id: HashMap<ObjectId, (ObjectKind, Vec<u8>)> = HashMap::new();
    let mut out = Vec::with_capacity(count);

    for _ in 0..count {
        let entry_offset = pos;
        let (type_code, size, header_len) = read_entry_header(data, pos)?;
        pos += header_len;

        let (kind, body) = match type_code {
            OFS_DELTA => {
                let (rel, n) = read_ofs_offset(data, pos)?;
                pos += n;
                let base_offset = entry_offset
                    .checked_sub(rel)
                    .ok_or_else(|| EngineError::BadPack("ofs-delta offset underflow".into()))?;
                let (delta, consumed) = inflate_at(data, pos, size, body_end)?;
                pos += consumed;
                let (base_kind, base) = by_offset
                    .get(&base_offset)
                    .cloned()
                    .ok_or_else(|| EngineError::BadPack("ofs-delta base not found".into()))?;
                (base_kind, apply_delta(&base, &delta)?)
            }
            REF_DELTA => {
                if pos + 20 > body_end {
                    return Err(EngineError::BadPack("truncated ref-delta base id".into()));
                }
                let mut raw = [0u8; 20];
                raw.copy_from_slice(&data[pos..pos + 20]);
                pos += 20;
                let base_id = ObjectId::from_bytes(raw);
                let (delta, consumed) = inflate_at(data, pos, size, body_end)?;
                pos += consumed;
                let (base_kind, base) = by_id
                    .get(&base_id)
                    .cloned()
                    .or_else(|| lookup(&base_id))
                    .ok_or_else(|| {
                        EngineError::BadPack(format!("ref-delta base {base_id} not found"))
                    })?;
                (base_kind, apply_delta(&base, &delta)?)
            }
            code => {
                let kind = ObjectKind::from_pack_code(code)?;
                let (body, consumed) = inflate_at(data, pos, size, body_end)?;
                pos += consumed;
                if body.len() != size {
                    return Err(EngineError::BadPack(format!(
                        "entry size mismatch: header {size}, inflated {}",
                        body.len()
                    )));
                }
                (kind, body)
            }
        };

        let id = ObjectId::hash(kind, &body);
        by_offset.insert(entry_offset, (kind, body.clone()));
        by_id.insert(id, (kind, body.clone()));
        out.push(PackedObject { kind, body, id });
    }

    Ok(out)
}

/// Write an undeltified pack containing `objects` in order.
pub fn write_pack(objects: &[(ObjectKind, Vec<u8>)]) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(PACK_MAGIC);
    out.extend_from_slice(&PACK_VERSION.to_be_bytes());
    out.extend_from_slice(&(objects.len() as u32).to_be_bytes());

    for (kind, body) in objects {
        write_entry_header(&mut out, kind.pack_code(), body.len());
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(body)
            .and_then(|_| encoder.finish().map(|d| out.extend_from_slice(&d)))
            .map_err(|e| EngineError::BadPack(format!("deflate failed: {e}")))?;
    }

    let trailer = Sha1::digest(&out);
    out.extend_from_slice(&trailer);
    Ok(out)
}

/// Entry header: low four bits of the size plus the type code in the first
/// byte, then seven size bits per continuation byte.
fn write_entry_header(out: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut size = size;
    let mut byte = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

fn read_entry_header(data: &[u8], pos: usize) -> EngineResult<(u8, usize, usize)> {
    let mut i = pos;
    let first = *data
        .get(i)
        .ok_or_else(|| EngineError::BadPack("truncated entry header".into()))?;
    i += 1;
    let type_code = (first >> 4) & 0x07;
    let mut size = (first & 0x0f) as usize;
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *data
            .get(i)
            .ok_or_else(|| EngineError::BadPack("truncated entry header".into()))?;
        i += 1;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((type_code, size, i - pos))
}

/// The negative-offset encoding used by ofs-delta entries.
fn read_ofs_offset(data: &[u8], pos: usize) -> EngineResult<(usize, usize)> {
    let mut i = pos;
    let mut byte = *data
        .get(i)
        .ok_or_else(|| EngineError::BadPack("truncated ofs-delta offset".into()))?;
    i += 1;
    let mut value = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = *data
            .get(i)
            .ok_or_else(|| EngineError::BadPack("truncated ofs-delta offset".into()))?;
        i += 1;
        value = ((value + 1) << 7) | (byte & 0x7f) as usize;
    }
    Ok((value, i - pos))
}

/// Inflate one zlib stream starting at `pos`, returning the output and the
/// number of compressed bytes consumed.
fn inflate_at(
    data: &[u8],
    pos: usize,
    size_hint: usize,
    limit: usize,
) -> EngineResult<(Vec<u8>, usize)> {
    let input = &data[pos..limit];
    let mut inflater = flate2::Decompress::new(true);
    let mut out = Vec::with_capacity(size_hint.max(64));
    loop {
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| EngineError::BadPack(format!("zlib: {e}")))?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(8192);
                } else if inflater.total_in() as usize >= input.len() {
                    return Err(EngineError::BadPack("truncated zlib stream".into()));
                }
            }
        }
    }
    Ok((out, inflater.total_in() as usize))
}

/// Apply a delta to its base per the pack delta instruction format.
fn apply_delta(base: &[u8], delta: &[u8]) -> EngineResult<Vec<u8>> {
    let mut pos = 0;
    let base_size = read_delta_size(delta, &mut pos)?;
    if base_size != base.len() {
        return Err(EngineError::BadPack(format!(
            "delta base size mismatch: expected {base_size}, have {}",
            base.len()
        )));
    }
    let result_size = read_delta_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(result_size);

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base: offset and length bytes are flagged per bit.
            let mut offset = 0usize;
            for (i, bit) in [0x01u8, 0x02, 0x04, 0x08].iter().enumerate() {
                if cmd & bit != 0 {
                    offset |= (*delta
                        .get(pos)
                        .ok_or_else(|| EngineError::BadPack("truncated delta copy".into()))?
                        as usize)
                        << (8 * i);
                    pos += 1;
                }
            }
            let mut len = 0usize;
            for (i, bit) in [0x10u8, 0x20, 0x40].iter().enumerate() {
                if cmd & bit != 0 {
                    len |= (*delta
                        .get(pos)
                        .ok_or_else(|| EngineError::BadPack("truncated delta copy".into()))?
                        as usize)
                        << (8 * i);
                    pos += 1;
                }
            }
            if len == 0 {
                len = 0x10000;
            }
            let end = offset
                .checked_add(len)
                .filter(|&e| e <= base.len())
                .ok_or_else(|| EngineError::BadPack("delta copy out of bounds".into()))?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            // Insert literal bytes.
            let n = cmd as usize;
            if pos + n > delta.len() {
                return Err(EngineError::BadPack("truncated delta insert".into()));
            }
            out.extend_from_slice(&delta[pos..pos + n]);
            pos += n;
        } else {
            return Err(EngineError::BadPack("reserved delta opcode 0".into()));
        }
    }

    if out.len() != result_size {
        return Err(EngineError::BadPack(format!(
            "delta result size mismatch: expected {result_size}, produced {}",
            out.len()
        )));
    }
    Ok(out)
}

fn read_delta_size(delta: &[u8], pos: &mut usize) -> EngineResult<usize> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| EngineError::BadPack("truncated delta size".into()))?;
        *pos += 1;
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut e = ZlibEncoder::new(Vec::new(), Compression::default());
        e.write_all(data).unwrap();
        e.finish().unwrap()
    }

    fn no_lookup(_: &ObjectId) -> Option<(ObjectKind, Vec<u8>)> {
        None
    }

    #[test]
    fn write_then_parse_round_trips() {
        let objects = vec![
            (ObjectKind::Blob, b"first blob".to_vec()),
            (ObjectKind::Blob, vec![0u8; 5000]),
            (ObjectKind::Tree, Vec::new()),
        ];
        let pack = write_pack(&objects).unwrap();
        let parsed = parse_pack(&pack, &no_lookup).unwrap();

        assert_eq!(parsed.len(), 3);
        for (parsed, (kind, body)) in parsed.iter().zip(&objects) {
            assert_eq!(parsed.kind, *kind);
            assert_eq!(&parsed.body, body);
            assert_eq!(parsed.id, ObjectId::hash(*kind, body));
        }
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let pack = write_pack(&[(ObjectKind::Blob, b"x".to_vec())]).unwrap();
        let mut bad = pack.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert!(matches!(
            parse_pack(&bad, &no_lookup),
            Err(EngineError::BadPack(_))
        ));
    }

    #[test]
    fn apply_delta_copy_and_insert() {
        let base = b"hello world";
        // base size 11, result size 6, copy base[0..5], insert "!".
        let delta = [11u8, 6, 0x90, 5, 1, b'!'];
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello!");
    }

    #[test]
    fn ofs_delta_entries_resolve_against_earlier_entries() {
        // Hand-assemble a two-entry pack: a blob and an ofs-delta on it.
        let base = b"hello world".to_vec();
        let delta = vec![11u8, 6, 0x90, 5, 1, b'!'];

        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&2u32.to_be_bytes());

        let base_offset = pack.len();
        write_entry_header(&mut pack, ObjectKind::Blob.pack_code(), base.len());
        pack.extend_from_slice(&deflate(&base));

        let delta_offset = pack.len();
        write_entry_header(&mut pack, OFS_DELTA, delta.len());
        // Single-byte negative offset back to the base entry.
        let rel = delta_offset - base_offset;
        assert!(rel < 0x80);
        pack.push(rel as u8);
        pack.extend_from_slice(&deflate(&delta));

        let trailer = Sha1::digest(&pack);
        pack.extend_from_slice(&trailer);

        let parsed = parse_pack(&pack, &no_lookup).unwrap();
        assert_eq!(parsed[1].kind, ObjectKind::Blob);
        assert_eq!(parsed[1].body, b"hello!");
    }

    #[test]
    fn ref_delta_uses_the_lookup_for_external_bases() {
        let base_body = b"hello world".to_vec();
        let base_id = ObjectId::hash(ObjectKind::Blob, &base_body);
        let delta = vec![11u8, 6, 0x90, 5, 1, b'!'];

        let mut pack = Vec::new();
        pack.extend_from_slice(b"PACK");
        pack.extend_from_slice(&2u32.to_be_bytes());
        pack.extend_from_slice(&1u32.to_be_bytes());
        write_entry_header(&mut pack, REF_DELTA, delta.len());
        pack.extend_from_slice(base_id.as_bytes());
        pack.extend_from_slice(&deflate(&delta));
        let trailer = Sha1::digest(&pack);
        pack.extend_from_slice(&trailer);

        let lookup = move |id: &ObjectId| {
            (*id == base_id).then(|| (ObjectKind::Blob, base_body.clone()))
        };
        let parsed = parse_pack(&pack, &lookup).unwrap();
        assert_eq!(parsed[0].body, b"hello!");
    }
}
