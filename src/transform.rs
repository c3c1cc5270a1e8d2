//! Whole-sequence transforms.
//!
//! Every transform takes the sequence by reference and produces a new one, leaving the source
//! untouched.

use crate::{
    event::{EventKind, MidiEvent},
    prelude::*,
    primitive::Format,
    smf::{Header, Sequence},
    track::{TimeMode, Track},
};
use tracing::debug;

/// The channel reserved for percussion by General MIDI (channel 10, zero-based 9).
const DRUM_CHANNEL: u8 = 9;

impl Sequence {
    /// Shift every note by `steps` semitones, wrapping around the `0..=127` range.
    ///
    /// Affects `NoteOn`, `NoteOff` and `Aftertouch` messages. Events on the percussion channel
    /// are left alone unless `include_drums` is set.
    pub fn transpose(&self, steps: i32, include_drums: bool) -> Sequence {
        let shift = steps.rem_euclid(128) as u8;
        let mut seq = self.clone();
        for ev in seq.tracks.iter_mut().flat_map(|track| track.events_mut().iter_mut()) {
            if let EventKind::Voice { channel, message } = &mut ev.kind {
                if !include_drums && *channel == DRUM_CHANNEL {
                    continue;
                }
                if let Some(key) = message.key_mut() {
                    *key = u7::new((key.as_int() + shift) % 128);
                }
            }
        }
        debug!(steps, include_drums, "transposed sequence");
        seq
    }

    /// Keep only the events that happen strictly before `limit` ticks into their track.
    ///
    /// Every resulting track ends with an end-of-track event. The trimmed tracks keep their
    /// require-end-of-track flag.
    pub fn trim(&self, limit: u32) -> Sequence {
        let tracks = self
            .tracks
            .iter()
            .map(|track| {
                let mut total = track.clone();
                total.to_total_time();
                let kept = total
                    .into_events()
                    .into_iter()
                    .filter(|ev| ev.delta < limit)
                    .collect();
                let mut trimmed = Track::with_time_mode(kept, TimeMode::Total);
                trimmed.set_require_end_of_track(track.require_end_of_track());
                trimmed.to_delta_time();
                trimmed.ensure_end_of_track();
                trimmed
            })
            .collect();
        debug!(limit, "trimmed sequence");
        Sequence {
            header: self.header,
            tracks,
        }
    }

    /// Convert the sequence to another format.
    ///
    /// Converting a multitrack sequence to [`Format::SingleTrack`] merges every track into one,
    /// ordered by time, with a single end-of-track event at the end of the longest track.
    /// Events that happen at the same time keep their track order.
    /// If `copy_track_to_channel` is set, the channel of every voice event is replaced by the
    /// index of the track it came from, which fails if there are more than 16 tracks.
    ///
    /// Any other conversion only changes the format tag.
    pub fn convert_format(&self, target: Format, copy_track_to_channel: bool) -> Result<Sequence> {
        if target == self.header.format {
            return Ok(self.clone());
        }
        if target != Format::SingleTrack || self.tracks.len() <= 1 {
            let mut seq = self.clone();
            seq.header.format = target;
            return Ok(seq);
        }
        ensure!(
            !copy_track_to_channel || self.tracks.len() <= 16,
            Error::invalid("cannot map more than 16 tracks to channels")
        );
        let mut merged = Vec::with_capacity(self.tracks.iter().map(Track::len).sum());
        let mut end = 0;
        for (idx, track) in self.tracks.iter().enumerate() {
            let mut total = track.clone();
            total.to_total_time();
            for mut ev in total.into_events() {
                end = end.max(ev.delta);
                if ev.is_end_of_track() {
                    continue;
                }
                if copy_track_to_channel {
                    if let EventKind::Voice { channel, .. } = &mut ev.kind {
                        *channel = u4::new(idx as u8);
                    }
                }
                merged.push(ev);
            }
        }
        let mut track = Track::with_time_mode(merged, TimeMode::Total);
        track.sort_by_time();
        track.push(MidiEvent::end_of_track(end));
        track.to_delta_time();
        debug!(
            tracks = self.tracks.len(),
            events = track.len(),
            "merged sequence into a single track"
        );
        Ok(Sequence {
            header: Header::new(Format::SingleTrack, self.header.timing),
            tracks: vec![track],
        })
    }
}
