//! Concurrent block-reader sessions over a shared FSK capture
//!
//! Two demodulation sessions on separate threads share one IQ stream
//! through the block rendezvous and must both detect the same header via
//! the dual-tone bit metric.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use rustysonde::block::{BlockConsumer, BlockReader};
use rustysonde::demod::{DecimateConfig, Demod, DemodConfig, HeaderSpec, IqMode};
use rustysonde::pcm::PcmSpec;
use rustysonde::sync::Detection;

use test_utils::{filler_bits, iq_bytes_i16, synth_cpfsk, HDR};

const SR: u32 = 48000;
const SPS: usize = 10;

fn fsk_capture() -> Vec<u8> {
    // prefix + header + payload as continuous-phase FSK at +-2400 Hz
    // (h = 1 at 4800 baud)
    let pattern = format!(
        "{}{}{}",
        filler_bits(100, 7),
        HDR,
        filler_bits(768, 23)
    );
    let f_dev = SR as f64 / (2.0 * SPS as f64);
    let iq = synth_cpfsk(&pattern, SPS, f_dev, SR as f64);
    iq_bytes_i16(&iq)
}

fn run_session(consumer: BlockConsumer<Cursor<Vec<u8>>>) -> Detection {
    let mut hdr = HeaderSpec::new(HDR, SPS as f64);
    hdr.bt = 0.5;
    let mut cfg = DemodConfig::new(hdr);
    cfg.mode = IqMode::IqDecimate;
    cfg.h = 1.0;

    let dec_cfg = DecimateConfig {
        xlt_fq: 0.0,
        taps: 0,
    };
    let mut d = Demod::with_block(consumer, cfg, dec_cfg).unwrap();
    let det = d.find_header(0.55, 4).unwrap();
    d.release_slot();
    det
}

#[test]
fn test_two_sessions_detect_same_header() {
    let spec = PcmSpec {
        sample_rate: SR,
        bits_per_sample: 16,
        channels: 2,
    };
    let reader =
        BlockReader::new(Cursor::new(fsk_capture()), spec, 2, 1, 256).unwrap();

    let mut handles = Vec::new();
    for slot in 0..2 {
        let consumer = BlockConsumer::new(Arc::clone(&reader), slot);
        handles.push(thread::spawn(move || run_session(consumer)));
    }
    let a = handles.pop().unwrap().join().unwrap();
    let b = handles.pop().unwrap().join().unwrap();

    // both sessions see the same stream, so they agree exactly
    assert_eq!(a.pos, b.pos);
    assert!((a.score - b.score).abs() < 1e-6);

    // the dual-tone metric lags by about half a symbol; allow one symbol
    let expected_end = ((100 + HDR.len()) * SPS) as i64 - 1;
    assert!(
        (a.pos - expected_end).abs() <= SPS as i64,
        "found at {}, expected near {}",
        a.pos,
        expected_end
    );
    assert!(a.score.abs() > 0.55);
}

#[test]
fn test_deactivated_session_reports_signal_lost() {
    let spec = PcmSpec {
        sample_rate: SR,
        bits_per_sample: 16,
        channels: 2,
    };
    let reader =
        BlockReader::new(Cursor::new(fsk_capture()), spec, 2, 1, 256).unwrap();

    // slot 1 is withdrawn before its session ever runs
    reader.deactivate(1);

    let consumer = BlockConsumer::new(Arc::clone(&reader), 1);
    let mut hdr = HeaderSpec::new(HDR, SPS as f64);
    hdr.bt = 0.5;
    let mut cfg = DemodConfig::new(hdr);
    cfg.mode = IqMode::IqDecimate;
    let dec_cfg = DecimateConfig {
        xlt_fq: 0.0,
        taps: 0,
    };
    let mut d = Demod::with_block(consumer, cfg, dec_cfg).unwrap();

    let err = d.find_header(0.55, 4).unwrap_err();
    assert!(matches!(err, rustysonde::error::DspError::SignalLost));
}
