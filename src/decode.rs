//! The track decoder: turns the payload of a single `MTrk` chunk into events.

use crate::{
    event::{EventKind, MetaMessage, MidiEvent, VoiceMessage},
    prelude::*,
    track::Track,
};
use tracing::trace;

/// How many events per byte to estimate when allocating memory for events while parsing.
///
/// Real-world tests show that without running status, the average is a little above 4 bytes/event,
/// and with running status enabled it's a little above 3 bytes/event.
/// This makes sense, since it's DeltaTime [+ Status] + Key + Velocity for NoteOn and NoteOff
/// events, which should make up the bulk of most MIDI files.
///
/// Erring on the large side for events/byte, we can approximate to 3 bytes/event.
const BYTES_TO_EVENTS: f32 = 1.0 / 3.0;

/// The state carried by the decoder from one event to the next.
///
/// Two pieces of state exist:
///
/// - The running status: the last status byte seen, of any kind, which is reused when an event
///   starts with a data byte instead of a status byte.
/// - The SysEx accumulator: a System Exclusive message whose `0xF7` terminator has not been seen
///   yet. While a message is being accumulated, the only valid next event is an `0xF7`
///   continuation packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderState {
    running_status: Option<u8>,
    sysex: Option<Vec<u8>>,
    /// Delta times of the packets absorbed into `sysex` so far.
    sysex_delta: u32,
}
impl DecoderState {
    #[inline]
    pub fn new() -> DecoderState {
        DecoderState::default()
    }

    /// The status byte that a data byte at the start of an event would inherit.
    #[inline]
    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    /// Whether a System Exclusive message is waiting for continuation packets.
    #[inline]
    pub fn is_continuing_sysex(&self) -> bool {
        self.sysex.is_some()
    }

    /// The bytes accumulated so far for an unfinished System Exclusive message.
    #[inline]
    pub fn pending_sysex(&self) -> Option<&[u8]> {
        self.sysex.as_deref()
    }

    /// Decode a single delta time and event at the cursor.
    ///
    /// Yields `None` when the bytes were a SysEx packet that did not complete a message.
    /// Such packets are absorbed into the state, and the completed message carries the sum of
    /// the delta times of all its packets.
    ///
    /// In case of failure the cursor might be left in the middle of an event!
    pub(crate) fn step(&mut self, raw: &mut Cursor) -> Result<Option<MidiEvent>> {
        let delta = raw.read_varlen()?.as_int();
        let at = raw.offset();
        let peeked = raw
            .peek()
            .ok_or_else(|| Error::parse(at, "missing event after delta time"))?;
        ensure!(
            self.sysex.is_none() || peeked == 0xF7,
            Error::parse(at, "expected sysex continuation packet")
        );
        let status = if peeked < 0x80 {
            //Running status! Do not consume, the byte is the first data byte
            self.running_status.ok_or_else(|| {
                Error::parse(at, "event missing status with no running status active")
            })?
        } else {
            let status = raw.read_u8("failed to read status")?;
            self.running_status = Some(status);
            status
        };
        match status {
            0x80..=0xEF => {
                let len = VoiceMessage::data_len(status);
                let start = raw.offset();
                let data = raw.read_slice(len, "truncated voice message")?;
                let mut args = [u7::new(0); 2];
                for (i, (arg, &byte)) in args.iter_mut().zip(data).enumerate() {
                    *arg = u7::try_from(byte).ok_or_else(|| {
                        Error::parse(start + i, "voice data byte with top bit set")
                    })?;
                }
                let (channel, message) = VoiceMessage::read(status, args)
                    .ok_or_else(|| Error::parse(at, "invalid voice status"))?;
                Ok(Some(MidiEvent::new(delta, EventKind::Voice { channel, message })))
            }
            0xFF => {
                let type_byte = raw.read_u8("failed to read meta message type")?;
                let len = raw.read_varlen()?.as_int();
                let start = raw.offset();
                let data = raw.read_slice(len as usize, "truncated meta message")?;
                Ok(Some(MidiEvent::meta(
                    delta,
                    MetaMessage::decode(type_byte, data, start)?,
                )))
            }
            0xF0 => {
                let data = raw.read_varlen_slice("truncated sysex message")?;
                match data.split_last() {
                    Some((&0xF7, payload)) => Ok(Some(MidiEvent::sysex(delta, payload.to_vec()))),
                    _ => {
                        self.sysex = Some(data.to_vec());
                        self.sysex_delta = delta;
                        Ok(None)
                    }
                }
            }
            0xF7 => {
                let data = raw.read_varlen_slice("truncated sysex continuation packet")?;
                let (mut buf, delta) = match self.sysex.take() {
                    Some(buf) => (buf, self.sysex_delta.saturating_add(delta)),
                    None => (Vec::new(), delta),
                };
                buf.extend_from_slice(data);
                if data.last() == Some(&0xF7) {
                    buf.pop();
                    self.sysex_delta = 0;
                    Ok(Some(MidiEvent::sysex(delta, buf)))
                } else {
                    self.sysex = Some(buf);
                    self.sysex_delta = delta;
                    Ok(None)
                }
            }
            0xF1..=0xF6 => Err(Error::parse(
                at,
                "standard midi files cannot contain system common events",
            )),
            0xF8..=0xFE => Err(Error::parse(
                at,
                "standard midi files cannot contain system realtime events",
            )),
            0x00..=0x7F => Err(Error::parse(at, "invalid running status")),
        }
    }

    /// Check that the track did not end in the middle of a message.
    pub(crate) fn finish(&self, offset: usize) -> Result<()> {
        ensure!(
            self.sysex.is_none(),
            Error::parse(offset, "track ended inside an unterminated sysex message")
        );
        Ok(())
    }
}

/// An iterator over the events of a single track.
///
/// This iterator is lazy, it parses events as it goes, and therefore produces `Result<MidiEvent>`
/// rather than `MidiEvent`.
/// Errors are fatal: after yielding an error the iterator yields nothing else.
///
/// Error offsets are relative to the start of the slice given to [`TrackDecoder::new`].
#[derive(Clone, Debug)]
pub struct TrackDecoder<'a> {
    raw: Cursor<'a>,
    state: DecoderState,
    done: bool,
}
impl<'a> TrackDecoder<'a> {
    /// Decode the payload of an `MTrk` chunk, not including the chunk id and length.
    #[inline]
    pub fn new(raw: &'a [u8]) -> TrackDecoder<'a> {
        TrackDecoder {
            raw: Cursor::new(raw),
            state: DecoderState::new(),
            done: false,
        }
    }

    /// Get the remaining unread bytes.
    #[inline]
    pub fn unread(&self) -> &'a [u8] {
        self.raw.unread()
    }

    /// Offset of the next unread byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.raw.offset()
    }

    #[inline]
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    fn estimate_events(&self) -> usize {
        (self.unread().len() as f32 * BYTES_TO_EVENTS) as usize
    }

    /// Decode every remaining event into a `Track`.
    pub fn into_track(self) -> Result<Track> {
        let mut events = Vec::with_capacity(self.estimate_events());
        for ev in self {
            events.push(ev?);
        }
        trace!(events = events.len(), "decoded track");
        Ok(Track::from_events(events))
    }
}
impl<'a> Iterator for TrackDecoder<'a> {
    type Item = Result<MidiEvent>;

    fn next(&mut self) -> Option<Result<MidiEvent>> {
        while !self.done {
            if self.raw.is_empty() {
                self.done = true;
                return self.state.finish(self.raw.offset()).err().map(Err);
            }
            match self.state.step(&mut self.raw) {
                Ok(Some(ev)) => return Some(Ok(ev)),
                Ok(None) => {}
                Err(err) => {
                    //Make sure nothing else is read from the middle of a malformed event
                    self.raw.exhaust();
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}
