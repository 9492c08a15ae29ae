//! Symbol-synchronized bit recovery after a header detection
//!
//! Embeds a known payload directly behind the header and checks that the
//! pull-based bit readers reproduce it, hard and soft, for both polarities.

use std::io::Cursor;

use rustysonde::demod::{Demod, DemodConfig, HeaderSpec};
use rustysonde::error::DspError;
use rustysonde::pcm::PcmReader;
use rustysonde::wav::read_wav_header;

use test_utils::{filler_bits, synth_stream, wav_bytes_mono16, HDR};

const SPS: f64 = 10.0;
const BT: f64 = 0.5;
const SR: u32 = 9600;

fn session_over(samples: &[f32]) -> Demod<Cursor<Vec<u8>>> {
    let bytes = wav_bytes_mono16(samples, SR);
    let mut cursor = Cursor::new(bytes);
    let spec = read_wav_header(&mut cursor).unwrap();
    let reader = PcmReader::new(cursor, spec, 0, 1);
    let mut hdr = HeaderSpec::new(HDR, SPS);
    hdr.bt = BT;
    Demod::new(reader, DemodConfig::new(hdr)).unwrap()
}

fn expected_bits(payload: &str) -> Vec<u8> {
    payload.bytes().map(|b| b - b'0').collect()
}

#[test]
fn test_payload_bits_after_header() {
    let prefix = filler_bits(100, 7);
    let payload = filler_bits(64, 31);
    let trailer = filler_bits(704, 5);
    let samples = synth_stream(&prefix, &format!("{}{}", payload, trailer), SPS, BT, 0.8);
    let mut d = session_over(&samples);

    let det = d.find_header(0.6, 2).unwrap();
    assert!(!det.inverted());

    let mut got = Vec::new();
    for pos in 0..64 {
        got.push(d.read_hard_bit(false, 0, pos, -1.0, false).unwrap());
    }
    assert_eq!(got, expected_bits(&payload));
}

#[test]
fn test_soft_bits_track_hard_bits() {
    let prefix = filler_bits(100, 7);
    let payload = filler_bits(64, 31);
    let trailer = filler_bits(704, 5);
    let samples = synth_stream(&prefix, &format!("{}{}", payload, trailer), SPS, BT, 0.8);
    let mut d = session_over(&samples);

    d.find_header(0.6, 2).unwrap();

    for pos in 0..64 {
        let sb = d.read_soft_bit(false, 0, pos, -1.0, false).unwrap();
        if sb.bit == 1 {
            assert!(sb.sum > 0.0);
        } else {
            assert!(sb.sum <= 0.0);
        }
        // a mid-stream symbol integrates to a clearly nonzero sum
        assert!(sb.sum.abs() > 1.0, "weak symbol at {}: {}", pos, sb.sum);
    }
}

#[test]
fn test_inverted_stream_reads_complement_from_lookahead() {
    let prefix = filler_bits(100, 7);
    let payload = filler_bits(64, 31);
    let trailer = filler_bits(704, 5);
    let samples: Vec<f32> =
        synth_stream(&prefix, &format!("{}{}", payload, trailer), SPS, BT, 0.8)
            .into_iter()
            .map(|x| -x)
            .collect();
    let mut d = session_over(&samples);

    let det = d.find_header(0.6, 2).unwrap();
    assert!(det.inverted());

    // lookahead samples were ingested without inversion, so the raw bits
    // come out complemented; downstream flips them using the polarity flag
    let mut got = Vec::new();
    for pos in 0..64 {
        let bit = d.read_hard_bit(false, 0, pos, -1.0, false).unwrap();
        got.push(if det.inverted() { 1 - bit } else { bit });
    }
    assert_eq!(got, expected_bits(&payload));
}

#[test]
fn test_stream_exhaustion_during_bit_reads() {
    let prefix = filler_bits(100, 7);
    // only 16 payload bits, then the stream ends
    let payload = filler_bits(16, 31);
    let samples = synth_stream(&prefix, &payload, SPS, BT, 0.8);
    let mut d = session_over(&samples);

    // no trailing stream left for a correlation cycle beyond the header:
    // the stream is shorter than one detection stride, so the search runs
    // out of samples first
    let err = d.find_header(0.6, 2).unwrap_err();
    assert!(matches!(err, DspError::EndOfStream));
}
