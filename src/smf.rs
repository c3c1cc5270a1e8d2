//! Specific to the SMF packaging of MIDI streams.

use crate::{
    chunk::{Chunk, ChunkKind, ChunkReader},
    prelude::*,
    primitive::{Format, Timing},
    riff,
    track::Track,
};
use std::{
    fs,
    io::{Read, Write},
};
use tracing::{debug, trace};

/// How many bytes must a MIDI body have in order to enable multithreading.
///
/// When writing, the MIDI body size is estimated from the event count.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// A MIDI file header.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    pub format: Format,
    pub timing: Timing,
}
impl Header {
    #[inline]
    pub fn new(format: Format, timing: Timing) -> Header {
        Header { format, timing }
    }

    /// Read both the header and the track count from the payload of an `MThd` chunk.
    ///
    /// Offsets in errors are relative to the start of the payload.
    fn read(raw: &[u8]) -> Result<(Header, u16)> {
        let mut raw = Cursor::new(raw);
        let format = raw.read_u16("truncated header chunk")?;
        let track_count = raw.read_u16("truncated header chunk")?;
        let timing = raw.read_u16("truncated header chunk")?;
        let format =
            Format::from_bits(format).map_err(|_| Error::parse(0, "invalid smf format"))?;
        let timing =
            Timing::from_bits(timing).map_err(|_| Error::parse(4, "invalid timing division"))?;
        Ok((Header::new(format, timing), track_count))
    }

    fn encode(&self, track_count: u16) -> [u8; 6] {
        let mut bytes = [0; 6];
        bytes[0..2].copy_from_slice(&self.format.as_bits().to_be_bytes());
        bytes[2..4].copy_from_slice(&track_count.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.timing.as_bits().to_be_bytes());
        bytes
    }
}

/// Knobs for [`Sequence::write_with`](struct.Sequence.html#method.write_with).
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct WriteOptions {
    /// Omit repeated voice status bytes. Meta and SysEx events always cancel running status.
    ///
    /// Off by default, so that every event is written with its status byte.
    pub running_status: bool,
    /// Append an end-of-track event to tracks that do not end with one.
    ///
    /// On by default. When off, tracks missing the event fail to write unless their
    /// [`require_end_of_track`](struct.Track.html#method.require_end_of_track) flag is cleared.
    pub append_end_of_track: bool,
}
impl Default for WriteOptions {
    fn default() -> WriteOptions {
        WriteOptions {
            running_status: false,
            append_end_of_track: true,
        }
    }
}

/// A whole MIDI sequence: a header and an ordered list of tracks.
///
/// Single-track (format 0) sequences never hold more than one track. Every operation that could
/// break this rule fails with a validation error instead.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sequence {
    pub(crate) header: Header,
    pub(crate) tracks: Vec<Track>,
}
impl Sequence {
    /// Create an empty sequence.
    #[inline]
    pub fn new(format: Format, timing: Timing) -> Sequence {
        Sequence {
            header: Header::new(format, timing),
            tracks: Vec::new(),
        }
    }

    /// Build a sequence out of a header and a list of tracks, checking the track count against
    /// the format.
    pub fn from_tracks(header: Header, tracks: Vec<Track>) -> Result<Sequence> {
        ensure!(
            header.format != Format::SingleTrack || tracks.len() <= 1,
            Error::invalid("singletrack format sequence cannot hold multiple tracks")
        );
        Ok(Sequence { header, tracks })
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.header.format
    }

    #[inline]
    pub fn timing(&self) -> Timing {
        self.header.timing
    }

    #[inline]
    pub fn set_timing(&mut self, timing: Timing) {
        self.header.timing = timing;
    }

    /// Change the format tag, leaving the tracks untouched.
    ///
    /// Fails if the sequence has multiple tracks and the new format is single-track.
    /// See [`convert_format`](#method.convert_format) to merge the tracks instead.
    pub fn set_format(&mut self, format: Format) -> Result<()> {
        ensure!(
            format != Format::SingleTrack || self.tracks.len() <= 1,
            Error::invalid("cannot make a multitrack sequence singletrack")
        );
        self.header.format = format;
        Ok(())
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    #[inline]
    pub fn track(&self, idx: usize) -> Option<&Track> {
        self.tracks.get(idx)
    }

    #[inline]
    pub fn track_mut(&mut self, idx: usize) -> Option<&mut Track> {
        self.tracks.get_mut(idx)
    }

    #[inline]
    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }

    fn check_room(&self) -> Result<()> {
        ensure!(
            self.header.format != Format::SingleTrack || self.tracks.is_empty(),
            Error::invalid("singletrack format sequence cannot hold multiple tracks")
        );
        Ok(())
    }

    /// Append a track at the end of the sequence.
    pub fn push_track(&mut self, track: Track) -> Result<()> {
        self.check_room()?;
        self.tracks.push(track);
        Ok(())
    }

    /// Insert a track at position `idx`, shifting the later tracks.
    pub fn insert_track(&mut self, idx: usize, track: Track) -> Result<()> {
        self.check_room()?;
        ensure!(
            idx <= self.tracks.len(),
            Error::invalid("track index out of range")
        );
        self.tracks.insert(idx, track);
        Ok(())
    }

    /// Remove and return the track at position `idx`, if there is one.
    pub fn remove_track(&mut self, idx: usize) -> Option<Track> {
        if idx < self.tracks.len() {
            Some(self.tracks.remove(idx))
        } else {
            None
        }
    }

    /// The length of the sequence in ticks.
    ///
    /// Sequential (format 2) tracks play one after the other, so their durations add up.
    /// Otherwise the longest track determines the duration.
    pub fn duration(&self) -> u64 {
        let durations = self.tracks.iter().map(Track::duration);
        match self.header.format {
            Format::Sequential => durations.sum(),
            Format::SingleTrack | Format::Parallel => durations.max().unwrap_or(0),
        }
    }

    /// Parse a whole in-memory MIDI file.
    ///
    /// RMID files (Standard Midi Files wrapped in a RIFF container) are unwrapped transparently.
    /// Parse error offsets are absolute offsets into `raw`.
    pub fn parse(raw: &[u8]) -> Result<Sequence> {
        let (base, smf) = if riff::is_riff(raw) {
            riff::unwrap(raw)?
        } else {
            (0, raw)
        };
        let seq = Sequence::read_chunks(ChunkReader::new(smf, base))?;
        debug!(
            bytes = raw.len(),
            tracks = seq.tracks.len(),
            format = ?seq.header.format,
            "parsed midi file"
        );
        Ok(seq)
    }

    /// Read a Standard Midi File from an arbitrary byte source.
    ///
    /// Exactly the header chunk and the declared number of track chunks are consumed, anything
    /// after them is left unread.
    pub fn read<R: Read>(source: R) -> Result<Sequence> {
        let seq = Sequence::read_chunks(ChunkReader::new(source, 0))?;
        debug!(
            tracks = seq.tracks.len(),
            format = ?seq.header.format,
            "read midi file"
        );
        Ok(seq)
    }

    /// Read and parse the MIDI file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Sequence> {
        fn open_impl(path: &Path) -> Result<Sequence> {
            let raw = fs::read(path)?;
            Sequence::parse(&raw)
        }
        open_impl(path.as_ref())
    }

    fn read_chunks<R: Read>(mut chunks: ChunkReader<R>) -> Result<Sequence> {
        let head = chunks.read(ChunkKind::Header).context(Location::Header)?;
        let (header, track_count) = Header::read(&head.data)
            .map_err(|err| err.rebase(head.offset))
            .context(Location::Header)?;
        ensure!(
            header.format != Format::SingleTrack || track_count <= 1,
            Error::invalid("singletrack format file declares multiple tracks")
        );
        let mut raw_tracks = Vec::with_capacity(track_count as usize);
        for idx in 0..track_count as usize {
            raw_tracks.push(chunks.read(ChunkKind::Track).context(Location::Track(idx))?);
        }
        let tracks = decode_tracks(&raw_tracks)?;
        Ok(Sequence { header, tracks })
    }

    /// Encode and write the MIDI file into the given generic writer, using the default
    /// [`WriteOptions`](struct.WriteOptions.html).
    #[inline]
    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        self.write_with(out, &WriteOptions::default())
    }

    /// Encode and write the MIDI file into the given generic writer.
    ///
    /// Every track is encoded before anything is written, so validation errors never leave a
    /// partially written file behind.
    /// This function will bubble up errors from the underlying writer and produce validation
    /// errors if the sequence is empty or extremely large (like for example if there are more
    /// than 65535 tracks or chunk sizes are over 4GB).
    pub fn write_with<W: Write>(&self, out: &mut W, options: &WriteOptions) -> Result<()> {
        ensure!(
            !self.tracks.is_empty(),
            Error::invalid("cannot write a sequence with no tracks")
        );
        let track_count = u16::try_from(self.tracks.len())
            .map_err(|_| Error::invalid("track count exceeds 16 bit range"))?;
        let track_chunks = encode_tracks(&self.tracks, options)?;
        ChunkKind::Header
            .write(out, &self.header.encode(track_count))
            .context(Location::Header)?;
        for (idx, chunk) in track_chunks.iter().enumerate() {
            out.write_all(chunk).context(Location::Track(idx))?;
        }
        out.flush()?;
        debug!(
            tracks = self.tracks.len(),
            bytes = 14 + track_chunks.iter().map(Vec::len).sum::<usize>(),
            "wrote midi file"
        );
        Ok(())
    }

    /// Encode the whole MIDI file into an in-memory buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    /// Encode and write the MIDI file to the given path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fn save_impl(seq: &Sequence, path: &Path) -> Result<()> {
            seq.write(&mut File::create(path)?)
        }
        save_impl(self, path.as_ref())
    }
}

fn decode_chunk((idx, chunk): (usize, &Chunk)) -> Result<Track> {
    let track = Track::decode(&chunk.data)
        .map_err(|err| err.rebase(chunk.offset))
        .context(Location::Track(idx))?;
    trace!(track = idx, bytes = chunk.data.len(), "decoded track chunk");
    Ok(track)
}

fn decode_tracks(chunks: &[Chunk]) -> Result<Vec<Track>> {
    #[cfg(feature = "parallel")]
    {
        let body: usize = chunks.iter().map(|chunk| chunk.data.len()).sum();
        if body >= PARALLEL_ENABLE_THRESHOLD {
            use rayon::prelude::*;

            //Collect every result before short-circuiting, so that the reported error is
            //always the one of the first failing track
            let tracks: Vec<Result<Track>> =
                chunks.par_iter().enumerate().map(decode_chunk).collect();
            return tracks.into_iter().collect();
        }
    }
    chunks.iter().enumerate().map(decode_chunk).collect()
}

fn encode_chunk(idx: usize, track: &Track, options: &WriteOptions) -> Result<Vec<u8>> {
    let mut chunk = Vec::new();
    ChunkKind::Track
        .write_to_vec(&mut chunk, |out| track.encode_into(options, out))
        .context(Location::Track(idx))?;
    trace!(track = idx, bytes = chunk.len(), "encoded track chunk");
    Ok(chunk)
}

fn encode_tracks(tracks: &[Track], options: &WriteOptions) -> Result<Vec<Vec<u8>>> {
    #[cfg(feature = "parallel")]
    {
        let events: usize = tracks.iter().map(Track::len).sum();
        if events as f32 * crate::track::EVENTS_TO_BYTES >= PARALLEL_ENABLE_THRESHOLD as f32 {
            use rayon::prelude::*;

            let chunks: Vec<Result<Vec<u8>>> = tracks
                .par_iter()
                .enumerate()
                .map(|(idx, track)| encode_chunk(idx, track, options))
                .collect();
            return chunks.into_iter().collect();
        }
    }
    tracks
        .iter()
        .enumerate()
        .map(|(idx, track)| encode_chunk(idx, track, options))
        .collect()
}
