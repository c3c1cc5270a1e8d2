use crate::{
    num::{u4, u7},
    read_varlen, write_varlen, EventKind, Format, Location, MetaMessage, MidiEvent, PitchBend,
    Sequence, Timing, Track, TrackDecoder, WriteOptions,
};
use proptest::prelude::*;

/// Wrap a track payload in an `MTrk` chunk.
fn track_chunk(payload: &[u8]) -> Vec<u8> {
    let mut chunk = b"MTrk".to_vec();
    chunk.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    chunk.extend_from_slice(payload);
    chunk
}

/// Build a whole file out of a raw header and raw track payloads.
fn smf_bytes(format: u16, division: u16, tracks: &[&[u8]]) -> Vec<u8> {
    let mut file = b"MThd\0\0\0\x06".to_vec();
    file.extend_from_slice(&format.to_be_bytes());
    file.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    file.extend_from_slice(&division.to_be_bytes());
    for track in tracks {
        file.extend_from_slice(&track_chunk(track));
    }
    file
}

fn decode(payload: &[u8]) -> Vec<MidiEvent> {
    match Track::decode(payload) {
        Ok(track) => track.into_events(),
        Err(err) => panic!("failed to decode track: {}", err),
    }
}

fn note_on(delta: u32, key: u8) -> MidiEvent {
    MidiEvent::note_on(delta, 0, key, 100).unwrap()
}

fn sequence(format: Format, tracks: Vec<Track>) -> Sequence {
    let mut seq = Sequence::new(format, Timing::metrical(96).unwrap());
    for track in tracks {
        seq.push_track(track).unwrap();
    }
    seq
}

/// Every non-end-of-track event of a sequence, with its total time, in a canonical order.
fn timed_events(seq: &Sequence) -> Vec<(u32, String)> {
    let mut events = Vec::new();
    for track in seq.tracks() {
        let mut total = track.clone();
        total.to_total_time();
        for ev in total.iter().filter(|ev| !ev.is_end_of_track()) {
            events.push((ev.delta, format!("{:?}", ev.kind)));
        }
    }
    events.sort();
    events
}

mod varlen {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_encodings() {
        let cases: &[(u32, &[u8])] = &[
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x81, 0x00]),
            (16383, &[0xFF, 0x7F]),
            (16384, &[0x81, 0x80, 0x00]),
            (2097151, &[0xFF, 0xFF, 0x7F]),
            (0x0FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for &(int, bytes) in cases {
            let mut out = Vec::new();
            write_varlen(&mut out, int).unwrap();
            assert_eq!(out, bytes, "encoding {}", int);
            assert_eq!(read_varlen(bytes).unwrap(), (int, bytes.len()), "decoding {}", int);
        }
    }

    #[test]
    fn stops_at_last_group() {
        assert_eq!(read_varlen(&[0x81, 0x00, 0x90, 0x3C]).unwrap(), (128, 2));
    }

    #[test]
    fn rejects_oversized_values() {
        let mut out = Vec::new();
        let err = write_varlen(&mut out, 0x1000_0000).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_malformed_input() {
        let err = read_varlen(&[0x81, 0x80]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
        assert_eq!(err.offset(), Some(2));

        let err = read_varlen(&[0x81, 0x80, 0x80, 0x80, 0x00]).unwrap_err();
        assert_eq!(err.offset(), Some(0));
    }

    proptest! {
        #[test]
        fn round_trip(int in 0u32..=0x0FFF_FFFF) {
            let mut out = Vec::new();
            write_varlen(&mut out, int).unwrap();
            prop_assert!(out.len() <= 4);
            prop_assert_eq!(read_varlen(&out).unwrap(), (int, out.len()));
        }
    }
}

mod decode {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn running_status_equivalence() {
        let full = [
            0x00, 0x90, 0x3C, 0x64, 0x10, 0x90, 0x3E, 0x64, 0x10, 0x90, 0x40, 0x64,
        ];
        let compressed = [0x00, 0x90, 0x3C, 0x64, 0x10, 0x3E, 0x64, 0x10, 0x40, 0x64];
        let expected = vec![note_on(0, 0x3C), note_on(0x10, 0x3E), note_on(0x10, 0x40)];
        assert_eq!(decode(&full), expected);
        assert_eq!(decode(&compressed), expected);
    }

    #[test]
    fn meta_takes_over_running_status() {
        let raw = [
            0x00, 0x90, 0x3C, 0x64, 0x00, 0xFF, 0x01, 0x01, b'a', 0x00, 0x01, 0x01, b'b',
        ];
        assert_eq!(
            decode(&raw),
            vec![
                note_on(0, 0x3C),
                MidiEvent::meta(0, MetaMessage::Text("a".to_string())),
                MidiEvent::meta(0, MetaMessage::Text("b".to_string())),
            ]
        );

        let mut decoder = TrackDecoder::new(&raw[..9]);
        decoder.next().unwrap().unwrap();
        assert_eq!(decoder.state().running_status(), Some(0x90));
        decoder.next().unwrap().unwrap();
        assert_eq!(decoder.state().running_status(), Some(0xFF));
    }

    #[test]
    fn sysex_takes_over_running_status() {
        //The data byte after the sysex is a packet length, not a note
        let raw = [
            0x00, 0x90, 0x3C, 0x64, 0x00, 0xF0, 0x02, 0x01, 0xF7, 0x00, 0x02, 0x02, 0xF7,
        ];
        assert_eq!(
            decode(&raw),
            vec![
                note_on(0, 0x3C),
                MidiEvent::sysex(0, vec![0x01]),
                MidiEvent::sysex(0, vec![0x02]),
            ]
        );
    }

    #[test]
    fn sysex_segments_reassemble() {
        let single = [0x00, 0xF0, 0x04, 0x01, 0x02, 0x03, 0xF7];
        let split = [0x00, 0xF0, 0x02, 0x01, 0x02, 0x00, 0xF7, 0x02, 0x03, 0xF7];
        let expected = vec![MidiEvent::sysex(0, vec![0x01, 0x02, 0x03])];
        assert_eq!(decode(&single), expected);
        assert_eq!(decode(&split), expected);
    }

    #[test]
    fn sysex_segment_deltas_add_up() {
        let split = [0x05, 0xF0, 0x01, 0x01, 0x07, 0xF7, 0x02, 0x02, 0xF7];
        assert_eq!(decode(&split), vec![MidiEvent::sysex(12, vec![0x01, 0x02])]);
    }

    #[test]
    fn escape_packet_starts_fresh_sysex() {
        let raw = [0x00, 0xF7, 0x03, 0x43, 0x12, 0xF7];
        assert_eq!(decode(&raw), vec![MidiEvent::sysex(0, vec![0x43, 0x12])]);
    }

    #[test]
    fn pitch_wheel_byte_order() {
        let raw = [0x00, 0xE3, 0x01, 0x40];
        let expected = MidiEvent::pitch_wheel(0, 3, 0x2001).unwrap();
        assert_eq!(decode(&raw), vec![expected.clone()]);

        let mut track = Track::from_events(vec![expected]);
        track.set_require_end_of_track(false);
        let options = WriteOptions {
            append_end_of_track: false,
            ..WriteOptions::default()
        };
        assert_eq!(track.encode(&options).unwrap(), raw);
    }

    #[test]
    fn every_meta_survives_encoding() {
        let metas = vec![
            MetaMessage::SequenceNumber(Some(7)),
            MetaMessage::SequenceNumber(None),
            MetaMessage::Text("text".to_string()),
            MetaMessage::Copyright("(c)".to_string()),
            MetaMessage::TrackName("Piano".to_string()),
            MetaMessage::InstrumentName("Grand".to_string()),
            MetaMessage::Lyric("la".to_string()),
            MetaMessage::Marker("verse".to_string()),
            MetaMessage::CuePoint("cue".to_string()),
            MetaMessage::ProgramName("prog".to_string()),
            MetaMessage::DeviceName("dev".to_string()),
            MetaMessage::ChannelPrefix(3),
            MetaMessage::MidiPort(1),
            MetaMessage::tempo(500_000).unwrap(),
            MetaMessage::SmpteOffset(
                crate::SmpteTime::new(1, 2, 3, 4, 5, crate::Fps::Fps25).unwrap(),
            ),
            MetaMessage::TimeSignature(crate::TimeSignature {
                numerator: 6,
                denominator_pow2: 3,
                clocks_per_click: 24,
                thirty_seconds_per_quarter: 8,
            }),
            MetaMessage::KeySignature {
                sharps: -3,
                minor: true,
            },
            MetaMessage::SequencerSpecific(vec![0x00, 0x00, 0x41]),
            MetaMessage::Unknown(0x60, vec![1, 2, 3]),
        ];
        let mut track: Track = metas
            .into_iter()
            .enumerate()
            .map(|(i, meta)| MidiEvent::meta(i as u32, meta))
            .collect();
        track.ensure_end_of_track();
        let raw = track.encode(&WriteOptions::default()).unwrap();
        assert_eq!(Track::decode(&raw).unwrap(), track);
    }

    #[test]
    fn every_voice_message_survives_encoding() {
        let track = Track::from_events(vec![
            MidiEvent::note_off(0, 1, 60, 64).unwrap(),
            MidiEvent::note_on(7, 2, 61, 100).unwrap(),
            MidiEvent::aftertouch(0, 3, 62, 30).unwrap(),
            MidiEvent::controller(200, 4, 64, 127).unwrap(),
            MidiEvent::program_change(0, 5, 19).unwrap(),
            MidiEvent::channel_pressure(16384, 6, 80).unwrap(),
            MidiEvent::pitch_wheel(0, 15, 0x3FFF).unwrap(),
            MidiEvent::sysex(0, vec![0x7E, 0x7F, 0x09, 0x01]),
            MidiEvent::sysex(3, Vec::new()),
            MidiEvent::end_of_track(0),
        ]);
        for running_status in [false, true] {
            let options = WriteOptions {
                running_status,
                ..WriteOptions::default()
            };
            let raw = track.encode(&options).unwrap();
            assert_eq!(Track::decode(&raw).unwrap(), track);
        }
    }

    #[test]
    fn invalid_text_is_decoded_lossily() {
        let raw = [0x00, 0xFF, 0x03, 0x02, b'A', 0xFF];
        assert_eq!(
            decode(&raw),
            vec![MidiEvent::meta(0, MetaMessage::TrackName("A\u{FFFD}".to_string()))]
        );
    }

    #[test]
    fn smpte_offset_fields_are_checked() {
        let valid = [0x00, 0xFF, 0x54, 0x05, 0x61, 0x02, 0x03, 0x1D, 0x00];
        match &decode(&valid)[0].kind {
            EventKind::Meta(MetaMessage::SmpteOffset(time)) => {
                assert_eq!(time.fps(), crate::Fps::Fps30);
                assert_eq!(time.hour(), 1);
                assert_eq!(time.frame(), 29);
            }
            other => panic!("expected an smpte offset, got {:?}", other),
        }

        //Frame 30 at 30 fps
        let out_of_range = [0x00, 0xFF, 0x54, 0x05, 0x61, 0x02, 0x03, 0x1E, 0x00];
        let err = Track::decode(&out_of_range).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
        assert_eq!(err.offset(), Some(4));

        let short = [0x00, 0xFF, 0x54, 0x04, 0x61, 0x02, 0x03, 0x1D];
        assert_eq!(Track::decode(&short).unwrap_err().offset(), Some(4));
    }

    #[test]
    fn missing_running_status() {
        let err = Track::decode(&[0x00, 0x3C, 0x64]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
        assert_eq!(err.offset(), Some(1));
    }

    #[test]
    fn unexpected_event_inside_sysex() {
        let raw = [0x00, 0xF0, 0x02, 0x01, 0x02, 0x00, 0x90, 0x3C, 0x64];
        assert_eq!(Track::decode(&raw).unwrap_err().offset(), Some(6));
    }

    #[test]
    fn unterminated_sysex() {
        let raw = [0x00, 0xF0, 0x02, 0x01, 0x02];
        assert_eq!(Track::decode(&raw).unwrap_err().offset(), Some(5));
    }

    #[test]
    fn malformed_events() {
        let cases: &[(&[u8], usize)] = &[
            //System common
            (&[0x00, 0xF2, 0x00, 0x00], 1),
            //Data byte with the top bit set
            (&[0x00, 0x90, 0x3C, 0x80], 3),
            //Truncated voice message
            (&[0x00, 0x90, 0x3C], 2),
            //Truncated delta time
            (&[0x00, 0x90, 0x3C, 0x64, 0x81], 5),
            //Tempo with a 2-byte payload
            (&[0x00, 0xFF, 0x51, 0x02, 0x07, 0xA1], 4),
            //End of track with a payload
            (&[0x00, 0xFF, 0x2F, 0x01, 0x00], 4),
            //Meta payload past the end
            (&[0x00, 0xFF, 0x01, 0x05, b'a'], 4),
        ];
        for &(raw, offset) in cases {
            let err = Track::decode(raw).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Parse, "{:02X?}", raw);
            assert_eq!(err.offset(), Some(offset), "{:02X?}", raw);
        }
    }

    #[test]
    fn decoder_fuses_after_error() {
        let raw = [0x00, 0x90, 0x3C, 0x64, 0x00, 0xF4, 0x00, 0x90, 0x3C, 0x64];
        let mut decoder = TrackDecoder::new(&raw);
        assert_eq!(decoder.next().unwrap().unwrap(), note_on(0, 0x3C));
        assert_eq!(decoder.state().running_status(), Some(0x90));
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.next().is_none());
        assert!(decoder.unread().is_empty());
    }

    #[test]
    fn decoder_exposes_pending_sysex() {
        let raw = [0x00, 0xF0, 0x02, 0x01, 0x02, 0x00, 0xF7, 0x01, 0xF7];
        let mut decoder = TrackDecoder::new(&raw[..5]);
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.state().is_continuing_sysex());
        assert_eq!(decoder.state().pending_sysex(), Some(&[0x01, 0x02][..]));

        let events = TrackDecoder::new(&raw)
            .collect::<crate::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(events, vec![MidiEvent::sysex(0, vec![0x01, 0x02])]);
    }
}

mod events {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn checked_constructors() {
        assert_eq!(
            MidiEvent::note_on(0, 16, 60, 100).unwrap_err().kind(),
            crate::ErrorKind::Validation
        );
        assert!(MidiEvent::note_off(0, 0, 128, 0).is_err());
        assert!(MidiEvent::controller(0, 0, 7, 128).is_err());
        assert!(MidiEvent::program_change(0, 15, 127).is_ok());
        assert!(MidiEvent::pitch_wheel(0, 0, 0x4000).is_err());
        assert!(MetaMessage::tempo(0x0100_0000).is_err());

        let ev = MidiEvent::aftertouch(3, 2, 64, 10).unwrap();
        assert_eq!(ev.kind.channel(), Some(u4::new(2)));
        match ev.kind {
            EventKind::Voice { message, .. } => assert_eq!(message.key(), Some(u7::new(64))),
            _ => panic!("expected a voice event"),
        }
    }

    #[test]
    fn pitch_bend_helpers() {
        assert_eq!(PitchBend::from_int(0), PitchBend::mid_raw_value());
        assert_eq!(PitchBend::from_int(-0x4000), PitchBend::min_raw_value());
        assert_eq!(PitchBend::from_f32(2.0), PitchBend::max_raw_value());
        assert_eq!(PitchBend::min_raw_value().as_f32(), -1.0);
        assert_eq!(PitchBend::max_raw_value().as_int(), 0x1FFF);
    }

    #[test]
    fn tempo_and_signature_helpers() {
        let tempo = MetaMessage::tempo(500_000).unwrap();
        assert_eq!(tempo.bpm(), Some(120.0));
        assert_eq!(MetaMessage::EndOfTrack.bpm(), None);
        let sig = crate::TimeSignature {
            numerator: 3,
            denominator_pow2: 2,
            clocks_per_click: 24,
            thirty_seconds_per_quarter: 8,
        };
        assert_eq!(sig.denominator(), Some(4));
    }

    #[test]
    fn smpte_time_validation() {
        use crate::{Fps, SmpteTime};
        assert!(SmpteTime::new(23, 59, 59, 29, 99, Fps::Fps30).is_some());
        assert!(SmpteTime::new(24, 0, 0, 0, 0, Fps::Fps30).is_none());
        assert!(SmpteTime::new(0, 0, 0, 24, 0, Fps::Fps24).is_none());
        assert!(SmpteTime::new(0, 0, 0, 0, 100, Fps::Fps24).is_none());
    }

    #[test]
    fn unknown_meta_cannot_shadow_known_types() {
        assert!(MetaMessage::is_known_type(0x2F));
        assert!(MetaMessage::is_known_type(0x51));
        assert!(!MetaMessage::is_known_type(0x60));

        for type_byte in [0x2F, 0x51, 0x54] {
            let mut track = Track::from_events(vec![MidiEvent::meta(
                0,
                MetaMessage::Unknown(type_byte, vec![0x07, 0xA1, 0x20]),
            )]);
            track.ensure_end_of_track();
            let err = track.encode(&WriteOptions::default()).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Validation, "type {:02X}", type_byte);
        }
    }

    #[test]
    fn running_status_compression() {
        let track = Track::from_events(vec![
            note_on(0, 0x3C),
            note_on(0, 0x3E),
            MidiEvent::meta(0, MetaMessage::Marker(String::new())),
            note_on(0, 0x40),
        ]);
        let options = WriteOptions {
            running_status: true,
            ..WriteOptions::default()
        };
        let raw = track.encode(&options).unwrap();
        assert_eq!(
            raw,
            [
                0x00, 0x90, 0x3C, 0x64, 0x00, 0x3E, 0x64, 0x00, 0xFF, 0x06, 0x00, 0x00, 0x90,
                0x40, 0x64, 0x00, 0xFF, 0x2F, 0x00,
            ]
        );
        let mut expected = track.clone();
        expected.ensure_end_of_track();
        assert_eq!(Track::decode(&raw).unwrap(), expected);
        assert_eq!(track.encode(&WriteOptions::default()).unwrap().len(), raw.len() + 1);
    }

    #[test]
    fn time_modes() {
        let mut track = Track::from_events(vec![note_on(10, 60), note_on(0, 61), note_on(5, 62)]);
        track.to_total_time();
        assert_eq!(track.time_mode(), crate::TimeMode::Total);
        let times: Vec<u32> = track.iter().map(|ev| ev.delta).collect();
        assert_eq!(times, [10, 10, 15]);
        assert_eq!(track.duration(), 15);
        assert!(track.encode(&WriteOptions::default()).is_err());
        track.to_delta_time();
        let deltas: Vec<u32> = track.iter().map(|ev| ev.delta).collect();
        assert_eq!(deltas, [10, 0, 5]);
        assert_eq!(track.duration(), 15);
    }

    #[test]
    fn stable_sort_by_time() {
        let mut track = Track::from_events(vec![note_on(0, 1), note_on(0, 2), note_on(0, 3)]);
        track.to_total_time();
        track.events_mut()[0].delta = 20;
        track.events_mut()[2].delta = 10;
        track.sort_by_time();
        let order: Vec<(u32, Option<u7>)> = track
            .iter()
            .map(|ev| match &ev.kind {
                EventKind::Voice { message, .. } => (ev.delta, message.key()),
                _ => (ev.delta, None),
            })
            .collect();
        assert_eq!(
            order,
            [
                (0, Some(u7::new(2))),
                (10, Some(u7::new(3))),
                (20, Some(u7::new(1)))
            ]
        );
    }
}

mod sequence {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::ErrorKind;

    /// The bytes of a format 0 file with a single short melody.
    const SCENARIO: &[u8] = &[
        b'M', b'T', b'h', b'd', 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0, //
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x10, //
        0x00, 0xC0, 0x05, //
        0x00, 0x90, 0x3C, 0x64, //
        0x83, 0x60, 0x80, 0x3C, 0x00, //
        0x00, 0xFF, 0x2F, 0x00,
    ];

    fn scenario_events() -> Vec<MidiEvent> {
        vec![
            MidiEvent::program_change(0, 0, 5).unwrap(),
            MidiEvent::note_on(0, 0, 60, 100).unwrap(),
            MidiEvent::note_off(480, 0, 60, 0).unwrap(),
            MidiEvent::end_of_track(0),
        ]
    }

    #[test]
    fn concrete_scenario() {
        let mut seq = Sequence::new(Format::SingleTrack, Timing::metrical(480).unwrap());
        seq.push_track(Track::from_events(scenario_events())).unwrap();
        let raw = seq.to_bytes().unwrap();
        assert_eq!(raw, SCENARIO);

        let parsed = Sequence::parse(&raw).unwrap();
        assert_eq!(parsed.format(), Format::SingleTrack);
        assert_eq!(parsed.timing(), Timing::metrical(480).unwrap());
        assert_eq!(parsed.tracks()[0].events(), &scenario_events()[..]);
        assert_eq!(parsed, seq);
        assert_eq!(parsed.duration(), 480);
    }

    #[test]
    fn read_from_stream() {
        let mut raw = SCENARIO.to_vec();
        raw.extend_from_slice(b"trailing junk");
        let seq = Sequence::read(std::io::Cursor::new(raw)).unwrap();
        assert_eq!(seq.tracks()[0].events(), &scenario_events()[..]);
    }

    #[test]
    fn rmid_is_unwrapped() {
        let mut data = b"data".to_vec();
        data.extend_from_slice(&(SCENARIO.len() as u32).to_le_bytes());
        data.extend_from_slice(SCENARIO);
        let mut form = b"RMID".to_vec();
        form.extend_from_slice(b"INFO\x02\0\0\0ab");
        form.extend_from_slice(&data);
        let mut raw = b"RIFF".to_vec();
        raw.extend_from_slice(&(form.len() as u32).to_le_bytes());
        raw.extend_from_slice(&form);
        assert_eq!(Sequence::parse(&raw).unwrap(), Sequence::parse(SCENARIO).unwrap());

        //Errors point into the wrapped file
        let last = raw.len() - 1;
        raw[last] = 0x01;
        assert_eq!(Sequence::parse(&raw).unwrap_err().offset(), Some(raw.len()));
    }

    #[test]
    fn format0_holds_one_track() {
        let mut seq = sequence(Format::SingleTrack, vec![Track::new()]);
        let err = seq.push_track(Track::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(seq.insert_track(0, Track::new()).is_err());
        assert_eq!(seq.tracks().len(), 1);

        let mut multi = sequence(Format::Parallel, vec![Track::new(), Track::new()]);
        assert!(multi.set_format(Format::SingleTrack).is_err());
        assert!(multi.remove_track(1).is_some());
        assert!(multi.set_format(Format::SingleTrack).is_ok());

        let end: &[u8] = &[0x00, 0xFF, 0x2F, 0x00];
        let err = Sequence::parse(&smf_bytes(0, 96, &[end, end])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn end_of_track_requirements() {
        let track = Track::from_events(vec![note_on(0, 60)]);
        let seq = sequence(Format::Parallel, vec![Track::new(), track]);
        let strict = WriteOptions {
            append_end_of_track: false,
            ..WriteOptions::default()
        };
        let mut out = Vec::new();
        let err = seq.write_with(&mut out, &strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.location(), Some(Location::Track(0)));
        assert!(out.is_empty());

        //Appended automatically by default
        let reparsed = Sequence::parse(&seq.to_bytes().unwrap()).unwrap();
        assert!(reparsed.tracks().iter().all(Track::has_end_of_track));

        let mut lax = seq.clone();
        for track in lax.tracks_mut() {
            track.set_require_end_of_track(false);
        }
        lax.write_with(&mut out, &strict).unwrap();
        let reparsed = Sequence::parse(&out).unwrap();
        assert_eq!(reparsed.tracks()[1].events(), &[note_on(0, 60)][..]);
    }

    #[test]
    fn empty_sequence_is_not_written() {
        let seq = Sequence::new(Format::Parallel, Timing::metrical(96).unwrap());
        assert_eq!(seq.to_bytes().unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn chunk_errors() {
        let err = Sequence::parse(&SCENARIO[..10]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.location(), Some(Location::Header));

        let err = Sequence::parse(&SCENARIO[..30]).unwrap_err();
        assert_eq!(err.location(), Some(Location::Track(0)));
        assert_eq!(err.offset(), Some(30));

        let mut raw = SCENARIO.to_vec();
        raw[14..18].copy_from_slice(b"MTrx");
        let err = Sequence::parse(&raw).unwrap_err();
        assert_eq!(err.offset(), Some(14));

        let mut raw = SCENARIO.to_vec();
        raw[9] = 3;
        assert_eq!(Sequence::parse(&raw).unwrap_err().offset(), Some(8));
    }

    #[test]
    fn track_errors_have_file_offsets() {
        let good: &[u8] = &[0x00, 0xFF, 0x2F, 0x00];
        let bad: &[u8] = &[0x00, 0x90, 0x3C, 0x64, 0x00, 0xF9];
        let raw = smf_bytes(1, 96, &[good, bad]);
        let err = Sequence::parse(&raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.location(), Some(Location::Track(1)));
        //14 byte header, 12 byte first track, 8 byte chunk header
        assert_eq!(err.offset(), Some(14 + 12 + 8 + 5));
    }

    #[test]
    fn timecode_timing() {
        let timing = Timing::timecode(25, 40).unwrap();
        assert_eq!(timing.as_bits(), 0xE728);
        assert_eq!(Timing::from_bits(0xE728).unwrap(), timing);
        assert!(Timing::timecode(26, 40).is_err());
        assert!(Timing::metrical(0x8000).is_err());
    }

    #[test]
    fn large_sequence_round_trip() {
        let tracks = (0..8)
            .map(|t| {
                (0..600)
                    .map(|i| match i % 3 {
                        0 => MidiEvent::note_on(i % 7, t, (i % 128) as u8, 90).unwrap(),
                        1 => MidiEvent::note_off(12, t, (i % 128) as u8, 0).unwrap(),
                        _ => MidiEvent::controller(1, t, 7, (i % 100) as u8).unwrap(),
                    })
                    .chain(std::iter::once(MidiEvent::end_of_track(0)))
                    .collect::<Track>()
            })
            .collect();
        let seq = sequence(Format::Parallel, tracks);
        for running_status in [false, true] {
            let options = WriteOptions {
                running_status,
                ..WriteOptions::default()
            };
            let mut raw = Vec::new();
            seq.write_with(&mut raw, &options).unwrap();
            assert_eq!(Sequence::parse(&raw).unwrap(), seq);
        }
        assert_eq!(seq.into_tracks().len(), 8);
    }

    #[test]
    fn durations() {
        let a = Track::from_events(vec![note_on(100, 60), MidiEvent::end_of_track(50)]);
        let b = Track::from_events(vec![note_on(30, 60), MidiEvent::end_of_track(0)]);
        let parallel = sequence(Format::Parallel, vec![a.clone(), b.clone()]);
        assert_eq!(parallel.duration(), 150);
        let sequential = sequence(Format::Sequential, vec![a, b]);
        assert_eq!(sequential.duration(), 180);
    }
}

mod transform {
    use super::*;
    use pretty_assertions::assert_eq;

    fn keys(seq: &Sequence) -> Vec<u8> {
        seq.tracks()
            .iter()
            .flat_map(|track| track.iter())
            .filter_map(|ev| match &ev.kind {
                EventKind::Voice { message, .. } => message.key().map(u7::as_int),
                _ => None,
            })
            .collect()
    }

    fn melody() -> impl Strategy<Value = Track> {
        prop::collection::vec((0u32..200, 0u8..128), 0..40).prop_map(|notes| {
            let mut track: Track = notes.into_iter().map(|(d, k)| note_on(d, k)).collect();
            track.ensure_end_of_track();
            track
        })
    }

    #[test]
    fn transpose_wraps_and_skips_drums() {
        let track = Track::from_events(vec![
            note_on(0, 120),
            MidiEvent::note_on(0, 9, 36, 100).unwrap(),
            MidiEvent::controller(0, 0, 7, 100).unwrap(),
            MidiEvent::end_of_track(0),
        ]);
        let seq = sequence(Format::SingleTrack, vec![track]);
        assert_eq!(keys(&seq.transpose(12, false)), [4, 36]);
        assert_eq!(keys(&seq.transpose(12, true)), [4, 48]);
        assert_eq!(keys(&seq.transpose(-121, false)), [127, 36]);
        assert_eq!(keys(&seq.transpose(128 * 3 + 12, false)), [4, 36]);
        //i32::MAX is 127 mod 128 and i32::MIN is 0 mod 128
        assert_eq!(keys(&seq.transpose(i32::MAX, true)), [119, 35]);
        assert_eq!(keys(&seq.transpose(i32::MIN, true)), [120, 36]);
        assert_eq!(keys(&seq), [120, 36]);
    }

    #[test]
    fn trim_cuts_events() {
        let track = Track::from_events(vec![
            note_on(0, 60),
            note_on(100, 62),
            note_on(100, 64),
            MidiEvent::end_of_track(100),
        ]);
        let seq = sequence(Format::SingleTrack, vec![track]);
        let trimmed = seq.trim(200);
        assert_eq!(
            trimmed.tracks()[0].events(),
            &[note_on(0, 60), note_on(100, 62), MidiEvent::end_of_track(0)][..]
        );
        assert_eq!(seq.trim(1000), seq);
        assert_eq!(
            seq.trim(0).tracks()[0].events(),
            &[MidiEvent::end_of_track(0)][..]
        );
    }

    #[test]
    fn merge_into_single_track() {
        let a = Track::from_events(vec![
            note_on(0, 60),
            note_on(20, 61),
            MidiEvent::end_of_track(100),
        ]);
        let b = Track::from_events(vec![
            MidiEvent::note_on(20, 5, 70, 100).unwrap(),
            MidiEvent::end_of_track(10),
        ]);
        let seq = sequence(Format::Parallel, vec![a, b]);

        let merged = seq.convert_format(Format::SingleTrack, false).unwrap();
        assert_eq!(merged.format(), Format::SingleTrack);
        assert_eq!(
            merged.tracks()[0].events(),
            &[
                note_on(0, 60),
                note_on(20, 61),
                MidiEvent::note_on(0, 5, 70, 100).unwrap(),
                MidiEvent::end_of_track(100),
            ][..]
        );

        let stamped = seq.convert_format(Format::SingleTrack, true).unwrap();
        let channels: Vec<u8> = stamped.tracks()[0]
            .iter()
            .filter_map(|ev| ev.kind.channel().map(u4::as_int))
            .collect();
        assert_eq!(channels, [0, 0, 1]);

        assert_eq!(seq.convert_format(Format::Parallel, false).unwrap(), seq);
        let sequential = seq.convert_format(Format::Sequential, false).unwrap();
        assert_eq!(sequential.format(), Format::Sequential);
        assert_eq!(sequential.tracks(), seq.tracks());
    }

    #[test]
    fn channel_stamping_needs_few_tracks() {
        let seq = sequence(Format::Parallel, vec![Track::new(); 17]);
        let err = seq.convert_format(Format::SingleTrack, true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert!(seq.convert_format(Format::SingleTrack, false).is_ok());
    }

    proptest! {
        #[test]
        fn transpose_involution(keys in prop::collection::vec(12u8..=115, 1..40)) {
            let track: Track = keys.iter().map(|&k| note_on(1, k)).collect();
            let seq = sequence(Format::SingleTrack, vec![track]);
            prop_assert_eq!(seq.transpose(12, false).transpose(-12, false), seq);
        }

        #[test]
        fn trim_monotonicity(track in melody(), t1 in 0u32..2000, extra in 0u32..2000) {
            let seq = sequence(Format::SingleTrack, vec![track]);
            let once = seq.trim(t1);
            prop_assert_eq!(once.trim(t1 + extra), once);
        }

        #[test]
        fn format_round_trip(a in melody(), b in melody(), c in melody()) {
            let seq = sequence(Format::Parallel, vec![a, b, c]);
            let merged = seq.convert_format(Format::SingleTrack, false).unwrap();
            let back = merged.convert_format(Format::Parallel, false).unwrap();
            prop_assert_eq!(back.format(), Format::Parallel);
            prop_assert_eq!(timed_events(&back), timed_events(&seq));
            let mut total = back.tracks()[0].clone();
            total.to_total_time();
            prop_assert!(total.events().windows(2).all(|w| w[0].delta <= w[1].delta));
        }
    }
}
