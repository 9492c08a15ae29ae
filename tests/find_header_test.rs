//! End-to-end header detection on synthetic audio streams
//!
//! Each test embeds the pulse-shaped header waveform in a stream at a known
//! bit offset, wraps it as a 16-bit WAV, and runs the full
//! parse-ingest-correlate-verify path.

use std::io::Cursor;

use rustysonde::demod::{Demod, DemodConfig, HeaderSpec};
use rustysonde::error::DspError;
use rustysonde::pcm::PcmReader;
use rustysonde::wav::read_wav_header;

use test_utils::{filler_bits, synth_stream, wav_bytes_mono16, HDR};

const SPS: f64 = 10.0;
const BT: f64 = 0.5;
const SR: u32 = 9600;
const PREFIX_BITS: usize = 100;

fn session_over(samples: &[f32]) -> Demod<Cursor<Vec<u8>>> {
    let bytes = wav_bytes_mono16(samples, SR);
    let mut cursor = Cursor::new(bytes);
    let spec = read_wav_header(&mut cursor).unwrap();
    assert_eq!(spec.sample_rate, SR);

    let reader = PcmReader::new(cursor, spec, 0, 1);
    let mut hdr = HeaderSpec::new(HDR, SPS);
    hdr.bt = BT;
    Demod::new(reader, DemodConfig::new(hdr)).unwrap()
}

/// Last sample index of the embedded header
fn expected_end() -> i64 {
    ((PREFIX_BITS + HDR.len()) as f64 * SPS) as i64 - 1
}

#[test]
fn test_clean_header_found_at_exact_offset() {
    rustysonde::tracing_init::init_test_tracing();

    let prefix = filler_bits(PREFIX_BITS, 7);
    let payload = filler_bits(768, 23);
    let samples = synth_stream(&prefix, &payload, SPS, BT, 0.8);
    let mut d = session_over(&samples);

    let det = d.find_header(0.6, 2).unwrap();
    assert!(
        (det.pos - expected_end()).abs() <= 2,
        "found at {}, expected {}",
        det.pos,
        expected_end()
    );
    assert!(det.score > 0.9, "score {}", det.score);
    assert!(!det.inverted());
}

#[test]
fn test_inverted_header_still_verifies() {
    let prefix = filler_bits(PREFIX_BITS, 7);
    let payload = filler_bits(768, 23);
    let samples: Vec<f32> = synth_stream(&prefix, &payload, SPS, BT, 0.8)
        .into_iter()
        .map(|x| -x)
        .collect();
    let mut d = session_over(&samples);

    let det = d.find_header(0.6, 2).unwrap();
    assert!((det.pos - expected_end()).abs() <= 2);
    assert!(det.score < -0.9, "score {}", det.score);
    assert!(det.inverted());
}

#[test]
fn test_header_found_under_noise() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    let mut rng = StdRng::seed_from_u64(1729);
    let normal = Normal::new(0.0f32, 0.2).unwrap();

    let prefix = filler_bits(PREFIX_BITS, 7);
    let payload = filler_bits(768, 23);
    let samples: Vec<f32> = synth_stream(&prefix, &payload, SPS, BT, 0.7)
        .into_iter()
        .map(|x| x + normal.sample(&mut rng))
        .collect();
    let mut d = session_over(&samples);

    let det = d.find_header(0.5, 3).unwrap();
    assert!(
        (det.pos - expected_end()).abs() <= 2,
        "found at {}, expected {}",
        det.pos,
        expected_end()
    );
}

#[test]
fn test_headerless_stream_ends_with_end_of_stream() {
    // enough filler to trigger several correlation cycles, but well under
    // the ten-second no-signal window
    let bits = filler_bits(1200, 15);
    let parsed = rustysonde::pulse::parse_bits(&bits).unwrap();
    let samples: Vec<f32> = rustysonde::pulse::waveform(&parsed, SPS, BT)
        .into_iter()
        .map(|x| x * 0.05)
        .collect();
    let mut d = session_over(&samples);

    let err = d.find_header(0.99, 0).unwrap_err();
    assert!(matches!(err, DspError::EndOfStream), "got {:?}", err);
}

#[test]
fn test_silent_stream_declares_signal_lost() {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    // fourteen seconds of weak noise with no header anywhere
    let mut rng = StdRng::seed_from_u64(99);
    let normal = Normal::new(0.0f32, 0.05).unwrap();
    let samples: Vec<f32> = (0..14 * SR as usize)
        .map(|_| normal.sample(&mut rng))
        .collect();
    let mut d = session_over(&samples);

    let err = d.find_header(0.6, 2).unwrap_err();
    assert!(matches!(err, DspError::SignalLost), "got {:?}", err);
}
