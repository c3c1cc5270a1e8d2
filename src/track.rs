//! Tracks: ordered, owned lists of events.

use crate::{decode::TrackDecoder, event::MidiEvent, prelude::*, smf::WriteOptions};
use core::cmp::Ordering;
use tracing::trace;

/// Estimated encoded size of an event, used to preallocate track buffers.
pub(crate) const EVENTS_TO_BYTES: f32 = 3.4;

/// What the `delta` field of the events in a track currently means.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeMode {
    /// Ticks since the previous event in the track (or since the start, for the first event).
    /// This is the only mode in which a track can be written.
    Delta,
    /// Ticks since the start of the track.
    Total,
}

/// A single track: an ordered list of events.
///
/// Tracks are normally kept in delta time. Operations that need absolute times (sorting, merging,
/// trimming) switch the track to total time with [`to_total_time`](#method.to_total_time), and
/// switch it back with [`to_delta_time`](#method.to_delta_time) when done.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    events: Vec<MidiEvent>,
    require_end_of_track: bool,
    time_mode: TimeMode,
}
impl Default for Track {
    fn default() -> Track {
        Track::from_events(Vec::new())
    }
}
impl Track {
    /// Create an empty track in delta time, requiring an end-of-track event to be written.
    #[inline]
    pub fn new() -> Track {
        Track::default()
    }

    /// Create a track from a list of events in delta time.
    #[inline]
    pub fn from_events(events: Vec<MidiEvent>) -> Track {
        Track {
            events,
            require_end_of_track: true,
            time_mode: TimeMode::Delta,
        }
    }

    /// Create a track whose event times are already in the given mode.
    #[inline]
    pub(crate) fn with_time_mode(events: Vec<MidiEvent>, time_mode: TimeMode) -> Track {
        Track {
            events,
            require_end_of_track: true,
            time_mode,
        }
    }

    /// Decode the payload of an `MTrk` chunk.
    ///
    /// See [`TrackDecoder`](struct.TrackDecoder.html) for a lazy alternative.
    #[inline]
    pub fn decode(raw: &[u8]) -> Result<Track> {
        TrackDecoder::new(raw).into_track()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    #[inline]
    pub fn events_mut(&mut self) -> &mut Vec<MidiEvent> {
        &mut self.events
    }

    #[inline]
    pub fn into_events(self) -> Vec<MidiEvent> {
        self.events
    }

    #[inline]
    pub fn iter(&self) -> core::slice::Iter<MidiEvent> {
        self.events.iter()
    }

    #[inline]
    pub fn push(&mut self, event: MidiEvent) {
        self.events.push(event);
    }

    #[inline]
    pub fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    /// Whether writing this track fails when it does not end with an end-of-track event and
    /// none is appended automatically.
    #[inline]
    pub fn require_end_of_track(&self) -> bool {
        self.require_end_of_track
    }

    #[inline]
    pub fn set_require_end_of_track(&mut self, require: bool) {
        self.require_end_of_track = require;
    }

    /// Whether the last event of the track is an end-of-track meta message.
    #[inline]
    pub fn has_end_of_track(&self) -> bool {
        self.events.last().map_or(false, MidiEvent::is_end_of_track)
    }

    /// Append an end-of-track event at the time of the last event, if the track does not
    /// already end with one.
    ///
    /// Returns whether an event was appended.
    pub fn ensure_end_of_track(&mut self) -> bool {
        if self.has_end_of_track() {
            return false;
        }
        let delta = match self.time_mode {
            TimeMode::Delta => 0,
            TimeMode::Total => self.events.last().map_or(0, |ev| ev.delta),
        };
        self.events.push(MidiEvent::end_of_track(delta));
        true
    }

    /// Replace every delta time with the total time of the event since the start of the track.
    ///
    /// Does nothing if the track is already in total time.
    pub fn to_total_time(&mut self) {
        if self.time_mode == TimeMode::Total {
            return;
        }
        let mut total = 0u32;
        for ev in self.events.iter_mut() {
            total = total.saturating_add(ev.delta);
            ev.delta = total;
        }
        self.time_mode = TimeMode::Total;
    }

    /// Replace every total time with the delta from the previous event.
    ///
    /// Events should be ordered by total time. An event placed before its predecessor is treated
    /// as simultaneous with it.
    ///
    /// Does nothing if the track is already in delta time.
    pub fn to_delta_time(&mut self) {
        if self.time_mode == TimeMode::Delta {
            return;
        }
        let mut prev = 0u32;
        for ev in self.events.iter_mut() {
            let total = ev.delta;
            ev.delta = total.saturating_sub(prev);
            prev = prev.max(total);
        }
        self.time_mode = TimeMode::Delta;
    }

    /// Stable in-place sort of the events using the given comparator.
    ///
    /// The comparator sees the `delta` fields as they are stored, so comparing by time is only
    /// meaningful in total time.
    #[inline]
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&MidiEvent, &MidiEvent) -> Ordering,
    {
        self.events.sort_by(compare);
    }

    /// Stable sort of the events by their total time, keeping the current time mode.
    pub fn sort_by_time(&mut self) {
        let mode = self.time_mode;
        self.to_total_time();
        self.events.sort_by_key(|ev| ev.delta);
        if mode == TimeMode::Delta {
            self.to_delta_time();
        }
    }

    /// The total length of the track, in ticks.
    pub fn duration(&self) -> u64 {
        match self.time_mode {
            TimeMode::Delta => self.events.iter().map(|ev| ev.delta as u64).sum(),
            TimeMode::Total => self.events.iter().map(|ev| ev.delta as u64).max().unwrap_or(0),
        }
    }

    /// Encode the events of this track, producing the payload of an `MTrk` chunk.
    pub fn encode(&self, options: &WriteOptions) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_into(options, &mut out)?;
        Ok(out)
    }

    /// Append the encoded events of this track to `out`.
    pub(crate) fn encode_into(&self, options: &WriteOptions, out: &mut Vec<u8>) -> Result<()> {
        ensure!(
            self.time_mode == TimeMode::Delta,
            Error::invalid("cannot write a track in total time")
        );
        let append_end = !self.has_end_of_track() && options.append_end_of_track;
        ensure!(
            self.has_end_of_track() || append_end || !self.require_end_of_track,
            Error::invalid("track does not end with an end-of-track event")
        );
        out.reserve((self.events.len() as f32 * EVENTS_TO_BYTES) as usize);
        let mut running_status = None;
        for ev in self.events.iter() {
            if !options.running_status {
                running_status = None;
            }
            ev.write(&mut running_status, out)?;
        }
        if append_end {
            trace!("appending missing end-of-track event");
            MidiEvent::end_of_track(0).write(&mut running_status, out)?;
        }
        Ok(())
    }
}
impl IntoIterator for Track {
    type IntoIter = std::vec::IntoIter<MidiEvent>;
    type Item = MidiEvent;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}
impl<'a> IntoIterator for &'a Track {
    type IntoIter = core::slice::Iter<'a, MidiEvent>;
    type Item = &'a MidiEvent;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
impl Extend<MidiEvent> for Track {
    #[inline]
    fn extend<I: IntoIterator<Item = MidiEvent>>(&mut self, events: I) {
        self.events.extend(events);
    }
}
impl FromIterator<MidiEvent> for Track {
    #[inline]
    fn from_iter<I: IntoIterator<Item = MidiEvent>>(events: I) -> Track {
        Track::from_events(events.into_iter().collect())
    }
}
