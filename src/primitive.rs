//! Wire-level building blocks: bounded integers, the varlen codec and the header fields.

use crate::prelude::*;

/// A read cursor over a byte slice that remembers how far into the slice it is, so that errors
/// can report the offset at which they happened.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}
impl<'a> Cursor<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    /// Offset of the next unread byte, relative to the start of the slice.
    #[inline]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn unread(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Look at the next byte without consuming it.
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Skip the rest of the input, so that nothing else is read from a corrupted stream.
    #[inline]
    pub fn exhaust(&mut self) {
        self.pos = self.data.len();
    }

    #[inline]
    pub fn read_slice(&mut self, len: usize, msg: &'static str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::parse(self.pos, msg))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self, msg: &'static str) -> Result<u8> {
        Ok(self.read_slice(1, msg)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self, msg: &'static str) -> Result<u16> {
        let buf = self.read_slice(2, msg)?;
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }

    #[inline]
    pub fn read_u32(&mut self, msg: &'static str) -> Result<u32> {
        let buf = self.read_slice(4, msg)?;
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    /// Read a variable-length quantity of at most 4 bytes (28 bits).
    pub fn read_varlen(&mut self) -> Result<u28> {
        let start = self.pos;
        let mut int: u32 = 0;
        for _ in 0..4 {
            let byte = self.read_u8("truncated varlen integer")?;
            int <<= 7;
            int |= (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                //4 reads of 7 bits each, so there are at most 28 bits in this int
                return Ok(u28::new(int));
            }
        }
        Err(Error::parse(start, "varlen integer larger than 4 bytes"))
    }

    /// Read a slice represented in the input as a varlen `len` followed by `len` bytes.
    pub fn read_varlen_slice(&mut self, msg: &'static str) -> Result<&'a [u8]> {
        let len = self.read_varlen()?.as_int();
        self.read_slice(len as usize, msg)
    }
}

/// Declares an unsigned integer newtype that only holds values fitting in `$bits` bits.
macro_rules! restricted_int {
    {$(#[$attr:meta])* $name:ident : $inner:tt => $bits:expr} => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        #[allow(non_camel_case_types)]
        pub struct $name($inner);
        impl From<$name> for $inner {
            #[inline]
            fn from(int: $name) -> $inner {
                int.0
            }
        }
        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl $name {
            const MASK: $inner = (1 << $bits) - 1;

            /// The largest representable value, with every bit set.
            #[inline]
            pub const fn max_value() -> $name {
                $name(Self::MASK)
            }

            /// Wrap `raw`, silently dropping any bit above the width of this type.
            #[inline]
            pub const fn new(raw: $inner) -> $name {
                $name(raw & Self::MASK)
            }

            /// Wrap `raw`, or `None` if it has bits set above the width of this type.
            #[inline]
            pub fn try_from(raw: $inner) -> Option<$name> {
                match raw & !Self::MASK {
                    0 => Some($name(raw)),
                    _ => None,
                }
            }

            /// Like `try_from`, but raises a validation error naming the offending value.
            #[inline]
            pub(crate) fn validate(raw: $inner, msg: &'static str) -> Result<$name> {
                Self::try_from(raw).ok_or_else(|| Error::invalid(msg))
            }

            #[inline]
            pub fn as_int(self) -> $inner {
                self.0
            }
        }
        impl PartialEq<$inner> for $name {
            #[inline]
            fn eq(&self, other: &$inner) -> bool {
                self.0 == *other
            }
        }
        impl PartialOrd<$inner> for $name {
            #[inline]
            fn partial_cmp(&self, other: &$inner) -> Option<core::cmp::Ordering> {
                self.0.partial_cmp(other)
            }
        }
    };
}
restricted_int! {
    /// Ticks per beat in a metrical division.
    u15: u16 => 15
}
restricted_int! {
    /// The raw value of a pitch wheel message, made of two 7-bit data bytes.
    u14: u16 => 14
}
restricted_int! {
    /// A MIDI data byte: key, velocity, controller, program, pressure.
    u7: u8 => 7
}
restricted_int! {
    /// A MIDI channel, `0..=15`.
    u4: u8 => 4
}
restricted_int! {
    /// Microseconds per beat, as carried by tempo meta messages.
    u24: u32 => 24
}
restricted_int! {
    /// The largest value a 4-byte variable-length quantity can hold.
    u28: u32 => 28
}

/// Decode a variable-length quantity from the start of `raw`.
///
/// Returns the decoded value along with the amount of bytes it took.
/// Fails if the input ends before the last group, or if the quantity spans more than 4 bytes.
pub fn read_varlen(raw: &[u8]) -> Result<(u32, usize)> {
    let mut cursor = Cursor::new(raw);
    let int = cursor.read_varlen()?;
    Ok((int.as_int(), cursor.offset()))
}

/// Encode `int` as a minimal variable-length quantity, appending it to `out`.
///
/// Fails with a validation error if `int` does not fit in 28 bits.
pub fn write_varlen(out: &mut Vec<u8>, int: u32) -> Result<()> {
    ensure!(
        int <= u28::max_value().as_int(),
        Error::invalid("varlen integer exceeds 28 bits")
    );
    let mut skipping = true;
    for i in (0..4).rev() {
        let byte = ((int >> (i * 7)) & 0x7F) as u8;
        if skipping && byte == 0 && i != 0 {
            //Skip these leading zeros
        } else {
            skipping = false;
            out.push(if i == 0 { byte } else { byte | 0x80 });
        }
    }
    Ok(())
}

/// Write a slice represented as a varlen `u28` as its length and then the raw bytes.
pub(crate) fn write_varlen_slice(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| Error::invalid("varlen slice exceeds 28 bits"))?;
    write_varlen(out, len)?;
    out.extend_from_slice(data);
    Ok(())
}

/// How the tracks of a sequence relate to each other, stored in the header chunk.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Format {
    /// Format 0: one track holding the events of every channel.
    SingleTrack,
    /// Format 1: tracks that play at the same time, sharing a single timeline.
    ///
    /// By convention the first track holds tempo and other global metadata.
    Parallel,
    /// Format 2: independent patterns that play one after another.
    Sequential,
}
impl Format {
    /// Convert the raw header value (`0`, `1` or `2`) into a `Format`.
    pub fn from_bits(bits: u16) -> Result<Format> {
        match bits {
            0 => Ok(Format::SingleTrack),
            1 => Ok(Format::Parallel),
            2 => Ok(Format::Sequential),
            _ => Err(Error::invalid("smf format must be 0, 1 or 2")),
        }
    }

    #[inline]
    pub fn as_bits(self) -> u16 {
        self as u16
    }
}

/// The division field of the header: what a tick means.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Timing {
    /// A beat is split into this many ticks.
    ///
    /// How long a beat lasts is decided by the [`MetaMessage::Tempo`] events of the sequence,
    /// 120 beats per minute if there are none.
    ///
    /// [`MetaMessage::Tempo`]: enum.MetaMessage.html#variant.Tempo
    Metrical(u15),
    /// A second is split into SMPTE frames, and each frame into this many ticks.
    Timecode(Fps, u8),
}
impl Timing {
    /// Ticks-per-beat timing.
    ///
    /// Fails if `ticks_per_beat` is zero or does not fit in 15 bits.
    pub fn metrical(ticks_per_beat: u16) -> Result<Timing> {
        ensure!(
            ticks_per_beat != 0,
            Error::invalid("ticks per beat must be nonzero")
        );
        Ok(Timing::Metrical(u15::validate(
            ticks_per_beat,
            "ticks per beat exceeds 15 bits",
        )?))
    }

    /// SMPTE timing.
    ///
    /// Fails if `fps` is not one of 24, 25, 29 or 30, or if `ticks_per_frame` is zero.
    pub fn timecode(fps: u8, ticks_per_frame: u8) -> Result<Timing> {
        let fps = Fps::from_int(fps).ok_or_else(|| Error::invalid("invalid smpte fps"))?;
        ensure!(
            ticks_per_frame != 0,
            Error::invalid("ticks per frame must be nonzero")
        );
        Ok(Timing::Timecode(fps, ticks_per_frame))
    }

    /// Interpret the raw 16-bit division field of a header chunk.
    ///
    /// With the top bit set, the high byte is the negated frame rate as a two's complement `i8`
    /// and the low byte the ticks per frame.
    pub fn from_bits(raw: u16) -> Result<Timing> {
        let [high, low] = raw.to_be_bytes();
        if high & 0x80 == 0 {
            Timing::metrical(raw)
        } else {
            Timing::timecode((high as i8).wrapping_neg() as u8, low)
        }
    }

    pub fn as_bits(self) -> u16 {
        match self {
            Timing::Metrical(ticks) => ticks.as_int(),
            Timing::Timecode(fps, ticks) => {
                u16::from_be_bytes([(fps.as_int() as i8).wrapping_neg() as u8, ticks])
            }
        }
    }
}

/// A point in time expressed as SMPTE hours, minutes, seconds, frames and hundredths of a frame.
///
/// Values are always in range: the hour is below 24, minutes and seconds below 60, the frame
/// below the frame rate and the subframe below 100.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmpteTime {
    hour: u8,
    minute: u8,
    second: u8,
    frame: u8,
    subframe: u8,
    fps: Fps,
}
impl SmpteTime {
    /// Build a timestamp, or `None` if any component is out of range.
    pub fn new(
        hour: u8,
        minute: u8,
        second: u8,
        frame: u8,
        subframe: u8,
        fps: Fps,
    ) -> Option<SmpteTime> {
        let valid = hour < 24
            && minute < 60
            && second < 60
            && frame < fps.as_int()
            && subframe < 100;
        valid.then(|| SmpteTime {
            hour,
            minute,
            second,
            frame,
            subframe,
            fps,
        })
    }

    #[inline]
    pub fn hour(&self) -> u8 {
        self.hour
    }

    #[inline]
    pub fn minute(&self) -> u8 {
        self.minute
    }

    #[inline]
    pub fn second(&self) -> u8 {
        self.second
    }

    #[inline]
    pub fn frame(&self) -> u8 {
        self.frame
    }

    /// Hundredths of a frame.
    #[inline]
    pub fn subframe(&self) -> u8 {
        self.subframe
    }

    #[inline]
    pub fn fps(&self) -> Fps {
        self.fps
    }

    /// Decode the 5-byte payload of an SMPTE offset meta message.
    ///
    /// The first byte packs the frame rate code in bits 5 and 6 and the hour in the low 5 bits.
    pub(crate) fn decode(data: &[u8]) -> Option<SmpteTime> {
        match *data {
            [hh, mm, ss, fr, ff] => {
                SmpteTime::new(hh & 0x1F, mm, ss, fr, ff, Fps::from_code(hh >> 5))
            }
            _ => None,
        }
    }

    pub(crate) fn encode(&self) -> [u8; 5] {
        [
            self.fps.as_code() << 5 | self.hour,
            self.minute,
            self.second,
            self.frame,
            self.subframe,
        ]
    }
}

/// The SMPTE frame rates allowed by the MIDI standard.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Fps {
    Fps24,
    Fps25,
    /// NTSC drop-frame, `30 / 1.001` (about 29.97) frames per second.
    Fps29,
    Fps30,
}
impl Fps {
    const ALL: [Fps; 4] = [Fps::Fps24, Fps::Fps25, Fps::Fps29, Fps::Fps30];

    /// Map the 2-bit rate code of SMPTE offsets to a frame rate.
    fn from_code(code: u8) -> Fps {
        Fps::ALL[(code & 0b11) as usize]
    }

    /// The 2-bit rate code used in SMPTE offsets.
    fn as_code(self) -> u8 {
        self as u8
    }

    /// The frame rate with the given nominal frames per second (`29` for drop-frame).
    #[inline]
    pub fn from_int(fps: u8) -> Option<Fps> {
        Fps::ALL.iter().copied().find(|rate| rate.as_int() == fps)
    }

    /// The nominal frames per second, rounded down for drop-frame.
    #[inline]
    pub fn as_int(self) -> u8 {
        match self {
            Fps::Fps24 => 24,
            Fps::Fps25 => 25,
            Fps::Fps29 => 29,
            Fps::Fps30 => 30,
        }
    }

    /// The exact frames per second.
    #[inline]
    pub fn as_f32(self) -> f32 {
        match self {
            Fps::Fps29 => 30.0 / 1.001,
            other => other.as_int() as f32,
        }
    }
}
