//! Decode-timestamp inspection of downloaded MPEG-TS segments.

use tracing::trace;

use crate::playlist::{DtsSpan, TimingInfo};

const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const CLOCK_RATE: f64 = 90_000.0;
const ROLLOVER: i64 = 1 << 33;
const HALF_ROLLOVER: i64 = 1 << 32;

/// Extracts first/last decode timestamps from segment bytes.
pub trait TimingInspector {
    fn inspect(&mut self, data: &[u8]) -> Option<TimingInfo>;
}

/// Scans transport stream packets for PES headers and records the decode
/// timestamps of video (`0xE0..=0xEF`) and audio (`0xC0..=0xDF`) streams.
///
/// The last timestamps seen are kept across calls so that a 33-bit wrap
/// between consecutive segments is unrolled.
#[derive(Debug, Clone, Default)]
pub struct TsTimingInspector {
    last_video_dts: Option<i64>,
    last_audio_dts: Option<i64>,
}

#[derive(Debug, Default)]
struct Track {
    first: Option<i64>,
    last: Option<i64>,
}

impl Track {
    fn push(&mut self, raw: u64, cache: &mut Option<i64>) {
        let reference = self.last.or(*cache);
        let dts = match reference {
            Some(reference) => unroll(raw as i64, reference),
            None => raw as i64,
        };
        self.first.get_or_insert(dts);
        self.last = Some(dts);
        *cache = Some(dts);
    }

    fn span(&self) -> Option<DtsSpan> {
        Some(DtsSpan {
            first: self.first? as f64 / CLOCK_RATE,
            last: self.last? as f64 / CLOCK_RATE,
        })
    }
}

impl TsTimingInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the cached timestamps, e.g. across a discontinuity.
    pub fn reset(&mut self) {
        self.last_video_dts = None;
        self.last_audio_dts = None;
    }
}

impl TimingInspector for TsTimingInspector {
    fn inspect(&mut self, data: &[u8]) -> Option<TimingInfo> {
        let start = data.iter().position(|&b| b == SYNC_BYTE)?;
        let mut video = Track::default();
        let mut audio = Track::default();

        for packet in data[start..].chunks_exact(TS_PACKET_SIZE) {
            let Some(pes) = pes_payload(packet) else {
                continue;
            };
            let Some((stream_id, timestamp)) = parse_pes_timestamp(pes) else {
                continue;
            };
            match stream_id {
                0xE0..=0xEF => video.push(timestamp, &mut self.last_video_dts),
                0xC0..=0xDF => audio.push(timestamp, &mut self.last_audio_dts),
                _ => {}
            }
        }

        let timing = TimingInfo {
            video: video.span(),
            audio: audio.span(),
        };
        trace!(?timing, "Inspected segment timing");
        (!timing.is_empty()).then_some(timing)
    }
}

/// Payload of a packet that starts a PES unit.
fn pes_payload(packet: &[u8]) -> Option<&[u8]> {
    if packet[0] != SYNC_BYTE {
        return None;
    }
    let payload_unit_start = packet[1] & 0x40 != 0;
    if !payload_unit_start {
        return None;
    }
    let adaptation_field_control = (packet[3] >> 4) & 0x03;
    let mut offset = 4;
    match adaptation_field_control {
        0x01 => {}
        0x03 => offset += 1 + packet[4] as usize,
        _ => return None,
    }
    packet.get(offset..)
}

/// Stream id and decode timestamp (or presentation timestamp when no DTS is
/// present) of a PES header.
fn parse_pes_timestamp(data: &[u8]) -> Option<(u8, u64)> {
    if data.len() < 9 || data[0] != 0x00 || data[1] != 0x00 || data[2] != 0x01 {
        return None;
    }
    let stream_id = data[3];
    let pts_dts_flags = (data[7] >> 6) & 0x03;
    match pts_dts_flags {
        0b10 => Some((stream_id, parse_timestamp(data.get(9..14)?))),
        0b11 => Some((stream_id, parse_timestamp(data.get(14..19)?))),
        _ => None,
    }
}

/// 33-bit PTS/DTS from its 5-byte encoding.
fn parse_timestamp(data: &[u8]) -> u64 {
    (((data[0] as u64 >> 1) & 0x07) << 30)
        | ((data[1] as u64) << 22)
        | (((data[2] as u64 >> 1) & 0x7F) << 15)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 >> 1) & 0x7F)
}

/// Moves `value` by multiples of 2^33 to the copy closest to `reference`.
fn unroll(mut value: i64, reference: i64) -> i64 {
    while reference - value > HALF_ROLLOVER {
        value += ROLLOVER;
    }
    while value - reference > HALF_ROLLOVER {
        value -= ROLLOVER;
    }
    value
}


#[cfg(test)]
mod tests {
    use super::testing::{pes_packet, ts_segment};
    use super::*;

    #[test]
    fn reads_video_and_audio_spans() {
        let mut data = ts_segment(&[900_000, 903_000, 906_000]);
        data.extend(pes_packet(0xC0, 899_000, None));
        data.extend(pes_packet(0xC0, 909_000, None));

        let timing = TsTimingInspector::new().inspect(&data).unwrap();
        assert_eq!(timing.video, Some(DtsSpan { first: 10.0, last: 906_000.0 / 90_000.0 }));
        let audio = timing.audio.unwrap();
        assert_eq!(audio.first, 899_000.0 / 90_000.0);
        assert_eq!(audio.last, 909_000.0 / 90_000.0);
        assert_eq!(timing.first_dts(), Some(10.0));
    }

    #[test]
    fn non_ts_data_has_no_timing() {
        assert_eq!(TsTimingInspector::new().inspect(b"not a transport stream"), None);
        assert_eq!(TsTimingInspector::new().inspect(&[]), None);
    }

    #[test]
    fn unrolls_rollover_across_segments() {
        let near_wrap = (1u64 << 33) - 90_000;
        let mut inspector = TsTimingInspector::new();
        inspector.inspect(&ts_segment(&[near_wrap])).unwrap();

        let timing = inspector.inspect(&ts_segment(&[90_000])).unwrap();
        let expected = ((1u64 << 33) + 90_000) as f64 / 90_000.0;
        assert_eq!(timing.video.unwrap().first, expected);
    }

    #[test]
    fn timestamp_encoding_round_trips() {
        let packet = pes_packet(0xE0, 123_456_789, Some(123_450_000));
        let pes = pes_payload(&packet).unwrap();
        assert_eq!(parse_pes_timestamp(pes), Some((0xE0, 123_450_000)));
    }

    #[test]
    fn unroll_picks_nearest_copy() {
        assert_eq!(unroll(10, ROLLOVER - 10), ROLLOVER + 10);
        assert_eq!(unroll(ROLLOVER - 10, 10), -10);
        assert_eq!(unroll(500, 400), 500);
    }
}
