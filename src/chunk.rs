//! The generic `{id, length, payload}` block that Standard Midi Files are made of.

use crate::prelude::*;
use std::io::{Read, Write};

/// The two kinds of chunks found in a Standard Midi File.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ChunkKind {
    /// The `MThd` chunk, holding format, track count and division.
    Header,
    /// An `MTrk` chunk, holding the events of a single track.
    Track,
}
impl ChunkKind {
    /// The 4-byte ASCII tag that identifies this kind of chunk.
    #[inline]
    pub fn id(self) -> &'static [u8; 4] {
        match self {
            ChunkKind::Header => b"MThd",
            ChunkKind::Track => b"MTrk",
        }
    }

    /// Write a whole chunk into a writer, computing the length from the payload.
    pub(crate) fn write<W: Write>(self, out: &mut W, payload: &[u8]) -> Result<()> {
        let mut head = [0; 8];
        head[0..4].copy_from_slice(self.id());
        head[4..8].copy_from_slice(&check_len(payload.len())?);
        out.write_all(&head)?;
        out.write_all(payload)?;
        Ok(())
    }

    /// Write a chunk to an in-memory `Vec`, with the payload produced by `fill`.
    ///
    /// Because the output is in-memory, the chunk can simply wind back and write the chunk length
    /// last.
    pub(crate) fn write_to_vec<F>(self, out: &mut Vec<u8>, fill: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let start = out.len();
        out.extend_from_slice(self.id());
        out.extend_from_slice(&[0; 4]);
        fill(out)?;
        let len = check_len(out.len() - start - 8)?;
        out[start + 4..start + 8].copy_from_slice(&len);
        Ok(())
    }
}

/// Given an arbitrary-width length, fit it into a 32-bit big-endian integer, reporting an error if
/// it does not fit.
fn check_len(len: usize) -> Result<[u8; 4]> {
    let len =
        u32::try_from(len).map_err(|_| Error::invalid("midi chunk size exceeds 32 bit range"))?;
    Ok(len.to_be_bytes())
}

/// The payload of a chunk, along with the absolute offset at which it starts.
#[derive(Clone, Debug)]
pub(crate) struct Chunk {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Reads chunks one after another from a byte source, keeping track of the offset into the
/// source.
pub(crate) struct ChunkReader<R> {
    inner: R,
    offset: usize,
}
impl<R: Read> ChunkReader<R> {
    /// `offset` is the absolute position of the first byte that `inner` will produce.
    #[inline]
    pub fn new(inner: R, offset: usize) -> ChunkReader<R> {
        ChunkReader { inner, offset }
    }

    fn fill(&mut self, buf: &mut [u8], msg: &'static str) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len();
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(Error::parse(self.offset, msg))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read the next chunk, failing if it is not of the expected kind.
    pub fn read(&mut self, kind: ChunkKind) -> Result<Chunk> {
        let start = self.offset;
        let mut head = [0; 8];
        self.fill(&mut head, "truncated chunk header")?;
        ensure!(
            &head[0..4] == kind.id(),
            Error::parse(
                start,
                match kind {
                    ChunkKind::Header => "expected an MThd header chunk",
                    ChunkKind::Track => "expected an MTrk track chunk",
                }
            )
        );
        let len = u32::from_be_bytes([head[4], head[5], head[6], head[7]]) as usize;
        let offset = self.offset;
        //Do not trust `len` to preallocate, corrupt files may declare huge chunks
        let mut data = Vec::new();
        let got = (&mut self.inner).take(len as u64).read_to_end(&mut data)?;
        self.offset += got;
        ensure!(
            got == len,
            Error::parse(self.offset, "reached eof before chunk ended")
        );
        Ok(Chunk { offset, data })
    }
}
