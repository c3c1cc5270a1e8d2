//! The event model and its wire encoding.

use crate::{prelude::*, primitive::SmpteTime};

/// A timed event inside a track.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MidiEvent {
    /// Ticks elapsed since the previous event of the track.
    ///
    /// While the owning track is in total-time mode (see [`Track::to_total_time`]) this holds the
    /// absolute tick of the event instead.
    ///
    /// Delta times must fit in 28 bits in order to be written.
    ///
    /// [`Track::to_total_time`]: struct.Track.html#method.to_total_time
    pub delta: u32,
    pub kind: EventKind,
}
impl MidiEvent {
    #[inline]
    pub fn new(delta: u32, kind: EventKind) -> MidiEvent {
        MidiEvent { delta, kind }
    }

    fn voice(delta: u32, channel: u8, message: VoiceMessage) -> Result<MidiEvent> {
        Ok(MidiEvent {
            delta,
            kind: EventKind::Voice {
                channel: u4::validate(channel, "midi channel must be in 0..=15")?,
                message,
            },
        })
    }

    /// A note-on event.
    ///
    /// Fails if `channel` is not in `0..=15` or `key`/`vel` are not in `0..=127`.
    pub fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::NoteOn {
            key: u7::validate(key, "note must be in 0..=127")?,
            vel: u7::validate(vel, "velocity must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A note-off event.
    pub fn note_off(delta: u32, channel: u8, key: u8, vel: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::NoteOff {
            key: u7::validate(key, "note must be in 0..=127")?,
            vel: u7::validate(vel, "velocity must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A polyphonic aftertouch event.
    pub fn aftertouch(delta: u32, channel: u8, key: u8, vel: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::Aftertouch {
            key: u7::validate(key, "note must be in 0..=127")?,
            vel: u7::validate(vel, "pressure must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A control change event.
    pub fn controller(delta: u32, channel: u8, controller: u8, value: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::Controller {
            controller: u7::validate(controller, "controller must be in 0..=127")?,
            value: u7::validate(value, "controller value must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A program change event.
    pub fn program_change(delta: u32, channel: u8, program: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::ProgramChange {
            program: u7::validate(program, "program must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A channel pressure (channel aftertouch) event.
    pub fn channel_pressure(delta: u32, channel: u8, pressure: u8) -> Result<MidiEvent> {
        let message = VoiceMessage::ChannelPressure {
            pressure: u7::validate(pressure, "pressure must be in 0..=127")?,
        };
        Self::voice(delta, channel, message)
    }

    /// A pitch wheel event, taking the raw 14-bit value (`0x2000` is centered).
    pub fn pitch_wheel(delta: u32, channel: u8, value: u16) -> Result<MidiEvent> {
        let message = VoiceMessage::PitchWheel {
            bend: PitchBend(u14::validate(value, "pitch wheel value must be in 0..=0x3FFF")?),
        };
        Self::voice(delta, channel, message)
    }

    #[inline]
    pub fn meta(delta: u32, meta: MetaMessage) -> MidiEvent {
        MidiEvent::new(delta, EventKind::Meta(meta))
    }

    /// A System Exclusive event.
    /// The payload should not include the `0xF0` prefix nor the `0xF7` terminator.
    #[inline]
    pub fn sysex(delta: u32, data: Vec<u8>) -> MidiEvent {
        MidiEvent::new(delta, EventKind::SysEx(data))
    }

    #[inline]
    pub fn end_of_track(delta: u32) -> MidiEvent {
        MidiEvent::meta(delta, MetaMessage::EndOfTrack)
    }

    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        self.kind.is_end_of_track()
    }

    /// Encode the delta time followed by the event itself.
    ///
    /// `running_status` holds the last status byte written to the same track, `None` at the start
    /// of the track or to force the status byte out.
    pub(crate) fn write(&self, running_status: &mut Option<u8>, out: &mut Vec<u8>) -> Result<()> {
        write_varlen(out, self.delta)?;
        self.kind.write(running_status, out)
    }
}

/// What an event does, independent of when it happens.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    /// A channel voice message, the notes and controls that make up most files.
    Voice {
        channel: u4,
        message: VoiceMessage,
    },
    /// Non-musical information stored in the file: tempo, names, lyrics and so on.
    Meta(MetaMessage),
    /// A manufacturer-specific System Exclusive message.
    ///
    /// Stored without the `0xF0` status and the closing `0xF7`. Messages split into several
    /// packets in the file are stored reassembled.
    SysEx(Vec<u8>),
}
impl EventKind {
    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        matches!(self, EventKind::Meta(MetaMessage::EndOfTrack))
    }

    /// The channel of a voice event.
    #[inline]
    pub fn channel(&self) -> Option<u4> {
        match self {
            EventKind::Voice { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Writes a single event to the given buffer, not including its delta time.
    fn write(&self, running_status: &mut Option<u8>, out: &mut Vec<u8>) -> Result<()> {
        //Only voice statuses take part in running status, anything else resets it
        match self {
            EventKind::Voice { channel, message } => {
                let status = message.status_nibble() << 4 | channel.as_int();
                if Some(status) != *running_status {
                    out.push(status);
                    *running_status = Some(status);
                }
                message.write(out);
            }
            EventKind::SysEx(data) => {
                *running_status = None;
                out.push(0xF0);
                let len = u32::try_from(data.len() + 1)
                    .map_err(|_| Error::invalid("sysex payload exceeds 28 bits"))?;
                write_varlen(out, len)?;
                out.extend_from_slice(data);
                out.push(0xF7);
            }
            EventKind::Meta(meta) => {
                *running_status = None;
                out.push(0xFF);
                meta.write(out)?;
            }
        }
        Ok(())
    }
}

/// A channel voice message, without its channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VoiceMessage {
    /// Status `0x8n`.
    NoteOff { key: u7, vel: u7 },
    /// Status `0x9n`.
    ///
    /// A velocity of zero is commonly used in place of a `NoteOff`, to benefit from running
    /// status.
    NoteOn { key: u7, vel: u7 },
    /// Status `0xAn`, polyphonic key pressure.
    Aftertouch { key: u7, vel: u7 },
    /// Status `0xBn`, a control change.
    Controller { controller: u7, value: u7 },
    /// Status `0xCn`, selects an instrument.
    ProgramChange { program: u7 },
    /// Status `0xDn`, pressure applied to the channel as a whole.
    ChannelPressure { pressure: u7 },
    /// Status `0xEn`.
    PitchWheel { bend: PitchBend },
}
impl VoiceMessage {
    /// Voice messages have a known length.
    pub(crate) fn data_len(status: u8) -> usize {
        const LENGTH_BY_STATUS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 2, 1, 1, 2, 0];
        LENGTH_BY_STATUS[(status >> 4) as usize] as usize
    }

    /// Receives status byte and data bytes separately.
    ///
    /// The status must be a voice status (`0x80..=0xEF`); any other value yields `None`.
    pub(crate) fn read(status: u8, data: [u7; 2]) -> Option<(u4, VoiceMessage)> {
        let channel = u4::new(status);
        let msg = match status >> 4 {
            0x8 => VoiceMessage::NoteOff {
                key: data[0],
                vel: data[1],
            },
            0x9 => VoiceMessage::NoteOn {
                key: data[0],
                vel: data[1],
            },
            0xA => VoiceMessage::Aftertouch {
                key: data[0],
                vel: data[1],
            },
            0xB => VoiceMessage::Controller {
                controller: data[0],
                value: data[1],
            },
            0xC => VoiceMessage::ProgramChange { program: data[0] },
            0xD => VoiceMessage::ChannelPressure { pressure: data[0] },
            0xE => {
                //Low 7 bits first
                let lsb = data[0].as_int() as u16;
                let msb = data[1].as_int() as u16;
                VoiceMessage::PitchWheel {
                    bend: PitchBend(u14::new(msb << 7 | lsb)),
                }
            }
            _ => return None,
        };
        Some((channel, msg))
    }

    /// Get the raw status nibble for this message type.
    pub(crate) fn status_nibble(&self) -> u8 {
        match self {
            VoiceMessage::NoteOff { .. } => 0x8,
            VoiceMessage::NoteOn { .. } => 0x9,
            VoiceMessage::Aftertouch { .. } => 0xA,
            VoiceMessage::Controller { .. } => 0xB,
            VoiceMessage::ProgramChange { .. } => 0xC,
            VoiceMessage::ChannelPressure { .. } => 0xD,
            VoiceMessage::PitchWheel { .. } => 0xE,
        }
    }

    /// The note this message refers to, for `NoteOff`, `NoteOn` and `Aftertouch`.
    #[inline]
    pub fn key(&self) -> Option<u7> {
        match self {
            VoiceMessage::NoteOff { key, .. }
            | VoiceMessage::NoteOn { key, .. }
            | VoiceMessage::Aftertouch { key, .. } => Some(*key),
            _ => None,
        }
    }

    #[inline]
    pub fn key_mut(&mut self) -> Option<&mut u7> {
        match self {
            VoiceMessage::NoteOff { key, .. }
            | VoiceMessage::NoteOn { key, .. }
            | VoiceMessage::Aftertouch { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Append the data bytes of the message.
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            VoiceMessage::NoteOff { key, vel }
            | VoiceMessage::NoteOn { key, vel }
            | VoiceMessage::Aftertouch { key, vel } => {
                out.extend_from_slice(&[key.as_int(), vel.as_int()])
            }
            VoiceMessage::Controller { controller, value } => {
                out.extend_from_slice(&[controller.as_int(), value.as_int()])
            }
            VoiceMessage::ProgramChange { program } => out.push(program.as_int()),
            VoiceMessage::ChannelPressure { pressure } => out.push(pressure.as_int()),
            VoiceMessage::PitchWheel { bend } => {
                let raw = bend.0.as_int();
                out.extend_from_slice(&[(raw & 0x7F) as u8, (raw >> 7) as u8])
            }
        }
    }
}

/// A raw 14-bit pitch wheel position, centered at `0x2000`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PitchBend(pub u14);
impl PitchBend {
    /// Fully bent down.
    #[inline]
    pub const fn min_raw_value() -> PitchBend {
        PitchBend(u14::new(0x0000))
    }

    /// Centered wheel.
    #[inline]
    pub const fn mid_raw_value() -> PitchBend {
        PitchBend(u14::new(0x2000))
    }

    /// Fully bent up.
    #[inline]
    pub const fn max_raw_value() -> PitchBend {
        PitchBend(u14::new(0x3FFF))
    }

    /// From a signed offset around the center, saturating at `-0x2000` and `0x1FFF`.
    #[inline]
    pub fn from_int(int: i16) -> PitchBend {
        PitchBend(u14::new((int.clamp(-0x2000, 0x1FFF) + 0x2000) as u16))
    }

    /// From a fraction of the full bend range, saturating at `-1.0` and just under `1.0`.
    #[inline]
    pub fn from_f32(float: f32) -> PitchBend {
        PitchBend::from_int((float.clamp(-1.0, 1.0) * 0x2000 as f32) as i16)
    }

    /// Signed offset around the center, in `-0x2000..=0x1FFF`.
    #[inline]
    pub fn as_int(self) -> i16 {
        self.0.as_int() as i16 - 0x2000
    }

    /// Fraction of the full bend range, in `-1.0..1.0`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        self.as_int() as f32 * (1.0 / 0x2000 as f32)
    }
}

/// The contents of a time signature meta message, in the order of the MIDI specification.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSignature {
    pub numerator: u8,
    /// The denominator as a power of two, ie. `2` means a quarter note.
    pub denominator_pow2: u8,
    /// MIDI clocks per metronome click.
    pub clocks_per_click: u8,
    /// Notated 32nd notes per MIDI quarter note (24 MIDI clocks).
    pub thirty_seconds_per_quarter: u8,
}
impl TimeSignature {
    /// The actual denominator, or `None` if the exponent is absurdly large.
    #[inline]
    pub fn denominator(&self) -> Option<u32> {
        1u32.checked_shl(self.denominator_pow2 as u32)
    }
}

/// The payload of a meta event (status `0xFF`), decoded according to its type byte.
///
/// Text payloads are decoded as UTF-8, replacing invalid sequences.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetaMessage {
    /// `0x00`. The number may be omitted, in which case it is implied by the position of the
    /// track.
    SequenceNumber(Option<u16>),
    Text(String),
    Copyright(String),
    TrackName(String),
    InstrumentName(String),
    Lyric(String),
    Marker(String),
    CuePoint(String),
    ProgramName(String),
    DeviceName(String),
    /// The channel that later meta and sysex events of the track apply to.
    ChannelPrefix(u8),
    MidiPort(u8),
    /// `0x2F`, the last event of every track.
    EndOfTrack,
    /// Microseconds per quarter note.
    Tempo(u24),
    /// Where the track starts, in SMPTE time.
    ///
    /// A payload with out-of-range fields fails to decode.
    SmpteOffset(SmpteTime),
    TimeSignature(TimeSignature),
    /// `sharps` counts flats when negative.
    KeySignature { sharps: i8, minor: bool },
    /// `0x7F`, opaque data for a particular sequencer.
    SequencerSpecific(Vec<u8>),
    /// Any other type byte, kept along with its raw payload.
    ///
    /// The type byte must not be one of the types above, or writing fails.
    Unknown(u8, Vec<u8>),
}
impl MetaMessage {
    /// A tempo change, in microseconds per quarter note.
    ///
    /// Fails if the value does not fit in 24 bits.
    pub fn tempo(micros_per_beat: u32) -> Result<MetaMessage> {
        Ok(MetaMessage::Tempo(u24::validate(
            micros_per_beat,
            "tempo exceeds 24 bits",
        )?))
    }

    /// The tempo in beats per minute, for `Tempo` messages.
    pub fn bpm(&self) -> Option<f64> {
        match self {
            MetaMessage::Tempo(micros) if micros.as_int() != 0 => {
                Some(60_000_000.0 / micros.as_int() as f64)
            }
            _ => None,
        }
    }

    /// The raw meta-message identifier byte.
    pub fn type_byte(&self) -> u8 {
        match self {
            MetaMessage::SequenceNumber(_) => 0x00,
            MetaMessage::Text(_) => 0x01,
            MetaMessage::Copyright(_) => 0x02,
            MetaMessage::TrackName(_) => 0x03,
            MetaMessage::InstrumentName(_) => 0x04,
            MetaMessage::Lyric(_) => 0x05,
            MetaMessage::Marker(_) => 0x06,
            MetaMessage::CuePoint(_) => 0x07,
            MetaMessage::ProgramName(_) => 0x08,
            MetaMessage::DeviceName(_) => 0x09,
            MetaMessage::ChannelPrefix(_) => 0x20,
            MetaMessage::MidiPort(_) => 0x21,
            MetaMessage::EndOfTrack => 0x2F,
            MetaMessage::Tempo(_) => 0x51,
            MetaMessage::SmpteOffset(_) => 0x54,
            MetaMessage::TimeSignature(_) => 0x58,
            MetaMessage::KeySignature { .. } => 0x59,
            MetaMessage::SequencerSpecific(_) => 0x7F,
            MetaMessage::Unknown(type_byte, _) => *type_byte,
        }
    }

    /// Whether the type byte belongs to a variant other than `Unknown`.
    pub fn is_known_type(type_byte: u8) -> bool {
        matches!(
            type_byte,
            0x00..=0x09 | 0x20 | 0x21 | 0x2F | 0x51 | 0x54 | 0x58 | 0x59 | 0x7F
        )
    }

    /// Build a meta message from its type byte and its payload.
    ///
    /// `offset` is the position of the payload, used to report errors.
    pub(crate) fn decode(type_byte: u8, data: &[u8], offset: usize) -> Result<MetaMessage> {
        let fixed = |len: usize| -> Result<()> {
            ensure!(
                data.len() == len,
                Error::parse(offset, "invalid length for fixed-size meta message")
            );
            Ok(())
        };
        let text = || String::from_utf8_lossy(data).into_owned();
        Ok(match type_byte {
            0x00 => MetaMessage::SequenceNumber(match data.len() {
                0 => None,
                _ => {
                    fixed(2)?;
                    Some(u16::from_be_bytes([data[0], data[1]]))
                }
            }),
            0x01 => MetaMessage::Text(text()),
            0x02 => MetaMessage::Copyright(text()),
            0x03 => MetaMessage::TrackName(text()),
            0x04 => MetaMessage::InstrumentName(text()),
            0x05 => MetaMessage::Lyric(text()),
            0x06 => MetaMessage::Marker(text()),
            0x07 => MetaMessage::CuePoint(text()),
            0x08 => MetaMessage::ProgramName(text()),
            0x09 => MetaMessage::DeviceName(text()),
            0x20 => {
                fixed(1)?;
                MetaMessage::ChannelPrefix(data[0])
            }
            0x21 => {
                fixed(1)?;
                MetaMessage::MidiPort(data[0])
            }
            0x2F => {
                ensure!(
                    data.is_empty(),
                    Error::parse(offset, "end of track must have no payload")
                );
                MetaMessage::EndOfTrack
            }
            0x51 => {
                fixed(3)?;
                MetaMessage::Tempo(u24::new(u32::from_be_bytes([0, data[0], data[1], data[2]])))
            }
            0x54 => {
                fixed(5)?;
                MetaMessage::SmpteOffset(
                    SmpteTime::decode(data)
                        .ok_or_else(|| Error::parse(offset, "smpte offset field out of range"))?,
                )
            }
            0x58 => {
                fixed(4)?;
                MetaMessage::TimeSignature(TimeSignature {
                    numerator: data[0],
                    denominator_pow2: data[1],
                    clocks_per_click: data[2],
                    thirty_seconds_per_quarter: data[3],
                })
            }
            0x59 => {
                fixed(2)?;
                MetaMessage::KeySignature {
                    sharps: data[0] as i8,
                    minor: data[1] != 0,
                }
            }
            0x7F => MetaMessage::SequencerSpecific(data.to_vec()),
            _ => MetaMessage::Unknown(type_byte, data.to_vec()),
        })
    }

    /// Write the type byte, the varlen length and the payload.
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut write_msg = |data: &[u8]| {
            out.push(self.type_byte());
            write_varlen_slice(out, data)
        };
        match self {
            MetaMessage::SequenceNumber(num) => match num {
                None => write_msg(&[]),
                Some(num) => write_msg(&num.to_be_bytes()[..]),
            },
            MetaMessage::Text(text)
            | MetaMessage::Copyright(text)
            | MetaMessage::TrackName(text)
            | MetaMessage::InstrumentName(text)
            | MetaMessage::Lyric(text)
            | MetaMessage::Marker(text)
            | MetaMessage::CuePoint(text)
            | MetaMessage::ProgramName(text)
            | MetaMessage::DeviceName(text) => write_msg(text.as_bytes()),
            MetaMessage::ChannelPrefix(chan) => write_msg(&[*chan]),
            MetaMessage::MidiPort(port) => write_msg(&[*port]),
            MetaMessage::EndOfTrack => write_msg(&[]),
            MetaMessage::Tempo(microsperbeat) => {
                write_msg(&microsperbeat.as_int().to_be_bytes()[1..])
            }
            MetaMessage::SmpteOffset(smpte) => write_msg(&smpte.encode()[..]),
            MetaMessage::TimeSignature(sig) => write_msg(&[
                sig.numerator,
                sig.denominator_pow2,
                sig.clocks_per_click,
                sig.thirty_seconds_per_quarter,
            ]),
            MetaMessage::KeySignature { sharps, minor } => {
                write_msg(&[*sharps as u8, *minor as u8])
            }
            MetaMessage::SequencerSpecific(data) => write_msg(data),
            MetaMessage::Unknown(type_byte, data) => {
                ensure!(
                    !MetaMessage::is_known_type(*type_byte),
                    Error::invalid("unknown meta message uses a known type byte")
                );
                write_msg(data)
            }
        }
    }
}
