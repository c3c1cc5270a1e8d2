//! # Overview
//!
//! `midiseq` reads Standard Midi Files (`.mid`) into an owned, editable event model, writes them
//! back, and offers a handful of whole-sequence transforms.
//!
//! Usage is as simple as:
//!
//! ```rust
//! use midiseq::{Format, MidiEvent, Sequence, Timing, Track};
//!
//! let mut track = Track::new();
//! track.push(MidiEvent::program_change(0, 0, 5)?);
//! track.push(MidiEvent::note_on(0, 0, 60, 100)?);
//! track.push(MidiEvent::note_off(480, 0, 60, 0)?);
//!
//! let mut seq = Sequence::new(Format::SingleTrack, Timing::metrical(480)?);
//! seq.push_track(track)?;
//!
//! let bytes = seq.to_bytes()?;
//! let reparsed = Sequence::parse(&bytes)?;
//! assert_eq!(reparsed.tracks()[0].len(), 4);
//! # Ok::<(), midiseq::Error>(())
//! ```
//!
//! The [`Sequence`](struct.Sequence.html) struct is the main type in the crate.
//! It owns a list of [`Track`](struct.Track.html)s, which in turn own their
//! [`MidiEvent`](struct.MidiEvent.html)s.
//!
//! # Reading and writing files
//!
//! ```rust,no_run
//! use midiseq::Sequence;
//!
//! let seq = Sequence::open("song.mid")?;
//! seq.save("song-copy.mid")?;
//! # Ok::<(), midiseq::Error>(())
//! ```
//!
//! Reading from and writing to arbitrary `std::io` streams is done through
//! [`Sequence::read`](struct.Sequence.html#method.read) and
//! [`Sequence::write`](struct.Sequence.html#method.write).
//! Writing can be tuned through [`WriteOptions`](struct.WriteOptions.html).
//!
//! # Time
//!
//! Event times are stored as delta-times, in ticks relative to the previous event of the same
//! track.
//! Tracks can be temporarily switched to total (absolute) time, which is what the sorting and
//! trimming machinery works with; a track must be back in delta time before it can be written.
//! The codec knows nothing about wall-clock time.
//!
//! # About features
//!
//! - The `parallel` feature (enabled by default)
//!
//!   Decodes and encodes tracks on multiple threads when the file is large enough to make it
//!   worth it, through the `rayon` dependency.
//!   Results are identical to the single-threaded path.
//!
//! - The `serde` feature
//!
//!   Derives `Serialize` and `Deserialize` for the event model and the sequence container.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

mod prelude {
    pub(crate) use crate::{
        error::{Error, Location, Result, ResultExt},
        primitive::{u14, u15, u24, u28, u4, u7, write_varlen, write_varlen_slice, Cursor},
    };
    pub(crate) use core::fmt;
    pub(crate) use std::{fs::File, io, path::Path};
}

mod chunk;
mod decode;
mod error;
mod event;
mod primitive;
mod riff;
mod smf;
mod track;
mod transform;

pub use crate::{
    chunk::ChunkKind,
    decode::{DecoderState, TrackDecoder},
    error::{Error, ErrorKind, Location, Result},
    event::{EventKind, MetaMessage, MidiEvent, PitchBend, TimeSignature, VoiceMessage},
    primitive::{read_varlen, write_varlen, Format, Fps, SmpteTime, Timing},
    smf::{Header, Sequence, WriteOptions},
    track::{TimeMode, Track},
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u14, u15, u24, u28, u4, u7};
}

#[cfg(test)]
mod test;
