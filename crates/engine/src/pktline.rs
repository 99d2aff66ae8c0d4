//! pkt-line framing: a 4-digit hex length prefix (covering itself) followed
//! by the payload, with `0000` as the flush packet.

use crate::{EngineError, EngineResult};

pub const FLUSH: &[u8] = b"0000";
const MAX_PAYLOAD: usize = 65516;

/// Append one data packet.
pub fn write_pkt(out: &mut Vec<u8>, data: &[u8]) {
    debug_assert!(data.len() <= MAX_PAYLOAD);
    out.extend_from_slice(format!("{:04x}", data.len() + 4).as_bytes());
    out.extend_from_slice(data);
}

/// Append one text packet.
pub fn write_pkt_str(out: &mut Vec<u8>, s: &str) {
    write_pkt(out, s.as_bytes());
}

/// Append a flush packet.
pub fn write_flush(out: &mut Vec<u8>) {
    out.extend_from_slice(FLUSH);
}

/// One parsed packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pkt<'a> {
    Flush,
    Data(&'a [u8]),
}

/// Iterator-style reader over a pkt-line stream. The unframed remainder
/// (e.g. a raw pack after the command section) stays accessible via
/// [`PktReader::rest`].
pub struct PktReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed by packet framing.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// The next packet, or `None` at end of input.
    pub fn next_pkt(&mut self) -> EngineResult<Option<Pkt<'a>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        if self.data.len() - self.pos < 4 {
            return Err(EngineError::BadRequest("truncated pkt-line length".into()));
        }
        let len_str = std::str::from_utf8(&self.data[self.pos..self.pos + 4])
            .map_err(|_| EngineError::BadRequest("pkt-line length is not utf-8".into()))?;
        let len = usize::from_str_radix(len_str, 16)
            .map_err(|_| EngineError::BadRequest(format!("bad pkt-line length {len_str:?}")))?;

        if len == 0 {
            self.pos += 4;
            return Ok(Some(Pkt::Flush));
        }
        if len < 4 || self.pos + len > self.data.len() {
            return Err(EngineError::BadRequest(format!(
                "pkt-line length {len} out of bounds"
            )));
        }
        let payload = &self.data[self.pos + 4..self.pos + len];
        self.pos += len;
        Ok(Some(Pkt::Data(payload)))
    }

    /// The next data packet as trimmed text, treating flush and end of
    /// input as `None`.
    pub fn next_line(&mut self) -> EngineResult<Option<&'a str>> {
        match self.next_pkt()? {
            Some(Pkt::Data(d)) => {
                let s = std::str::from_utf8(d)
                    .map_err(|_| EngineError::BadRequest("pkt-line payload is not utf-8".into()))?;
                Ok(Some(s.trim_end_matches('\n')))
            }
            Some(Pkt::Flush) | None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_round_trip() {
        let mut buf = Vec::new();
        write_pkt_str(&mut buf, "hello\n");
        write_flush(&mut buf);
        buf.extend_from_slice(b"RAWDATA");

        let mut reader = PktReader::new(&buf);
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Data(b"hello\n")));
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Flush));
        assert_eq!(reader.rest(), b"RAWDATA");
    }

    #[test]
    fn known_framing() {
        let mut buf = Vec::new();
        write_pkt_str(&mut buf, "a\n");
        assert_eq!(buf, b"0006a\n");
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut reader = PktReader::new(b"00");
        assert!(reader.next_pkt().is_err());
        let mut reader = PktReader::new(b"0010tooshort");
        assert!(reader.next_pkt().is_err());
    }
}
