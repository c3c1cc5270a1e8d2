//! There's an abomination called RMID, MIDI embedded in a RIFF file.
//! Support for these files is provided by unwrapping the input slice, stripping away the RIFF
//! wrappers around the raw SMF file.

use crate::prelude::*;

/// Iterates over little-endian RIFF chunks, yielding `(id, data offset, data)`.
struct ChunkIter<'a> {
    raw: Cursor<'a>,
    base: usize,
}
impl<'a> Iterator for ChunkIter<'a> {
    type Item = ([u8; 4], usize, &'a [u8]);
    fn next(&mut self) -> Option<([u8; 4], usize, &'a [u8])> {
        let head = self.raw.read_slice(8, "truncated riff chunk").ok()?;
        let mut id = [0; 4];
        id.copy_from_slice(&head[..4]);
        let len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        let offset = self.base + self.raw.offset();
        let data = match self.raw.read_slice(len, "truncated riff chunk") {
            Ok(data) => data,
            Err(_) => {
                let rest = self.raw.unread();
                self.raw.exhaust();
                rest
            }
        };
        if len % 2 == 1 {
            let _pad = self.raw.read_u8("missing riff padding");
        }
        Some((id, offset, data))
    }
}

/// Whether `raw` looks like a RIFF file rather than a bare Standard Midi File.
#[inline]
pub(crate) fn is_riff(raw: &[u8]) -> bool {
    raw.starts_with(b"RIFF")
}

/// Find the embedded Standard Midi File inside an RMID file.
///
/// Returns the offset of the embedded file along with its bytes.
pub(crate) fn unwrap(raw: &[u8]) -> Result<(usize, &[u8])> {
    let (id, offset, riff) = ChunkIter {
        raw: Cursor::new(raw),
        base: 0,
    }
    .next()
    .ok_or_else(|| Error::parse(0, "no main riff chunk"))?;
    ensure!(&id == b"RIFF", Error::parse(0, "invalid main riff chunk"));
    let mut form = Cursor::new(riff);
    let formtype = form.read_slice(4, "failed to read riff formtype")?;
    ensure!(formtype == b"RMID", Error::parse(offset, "not an rmid riff file"));
    let chunks = ChunkIter {
        raw: form,
        base: offset,
    };
    for (id, offset, data) in chunks {
        if &id == b"data" {
            return Ok((offset, data));
        }
    }
    bail!(Error::parse(raw.len(), "no rmid data chunk"))
}
