//! Demodulation session
//!
//! A [`Demod`] owns every buffer of one demodulation pipeline: the circular
//! slicer-input buffer, the FM-discriminator ring, the IQ rotation ring, the
//! transform context with its scratch buffers, the matched-filter spectrum
//! and the low-pass coefficient sets. All sizes are computed once at
//! initialization from the header length and samples-per-symbol and never
//! change afterwards.
//!
//! `pull_sample` advances the pipeline by one output sample: acquire a
//! complex (or pre-demodulated real) sample, de-rotate by the tracked
//! carrier offset, IF low-pass, FM discriminator, FM low-pass, and append to
//! the rings consumed by the correlator and the bit slicer.

use std::io::Read;

use bitvec::prelude::*;
use num::complex::{Complex32, Complex64};

use crate::block::BlockConsumer;
use crate::dft::{Dft, Window};
use crate::error::{DspError, DspResult};
use crate::filter;
use crate::pcm::PcmReader;
use crate::pulse;

/// FM discriminator gain: `s = gain * arg(z * conj(z_prev)) / pi`
pub(crate) const FM_GAIN: f64 = 0.8;

/// IF low-pass transition width in Hz (tap count = 4*sr/transition)
const IF_TRANSITION_BW: f64 = 4000.0;

/// FM low-pass transition width in Hz
const FM_TRANSITION_BW: f64 = 2000.0;

/// Minimum transform size; short headers are padded up to this
const MIN_TRANSFORM: usize = 0x2000;

/// Circular buffer index
#[inline]
pub(crate) fn ring(i: i64, m: usize) -> usize {
    i.rem_euclid(m as i64) as usize
}

/// Input mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqMode {
    /// Real, already-demodulated audio samples
    Off,
    /// Raw IQ, FM discriminator output feeds the slicer
    Iq,
    /// Raw IQ, dual-tone energy-difference bit metric feeds the slicer
    IqFsk,
    /// Decimating block-reader input (implies the dual-tone metric)
    IqDecimate,
}

impl IqMode {
    pub fn is_iq(self) -> bool {
        !matches!(self, IqMode::Off)
    }

    /// Whether the slicer input is the dual-tone metric instead of the
    /// plain discriminator output
    pub fn uses_fsk_metric(self) -> bool {
        matches!(self, IqMode::IqFsk | IqMode::IqDecimate)
    }
}

/// Header template parameters supplied by the caller at session init
#[derive(Debug, Clone)]
pub struct HeaderSpec {
    /// Expected bit pattern as '0'/'1' characters
    pub pattern: String,
    /// Samples per symbol (may be fractional)
    pub sps: f64,
    /// Symbols per data bit (2 = Manchester)
    pub symlen: usize,
    /// Symbols per header bit
    pub symhd: usize,
    /// Gaussian pulse bandwidth-time product
    pub bt: f64,
}

impl HeaderSpec {
    pub fn new(pattern: &str, sps: f64) -> Self {
        HeaderSpec {
            pattern: pattern.to_string(),
            sps,
            symlen: 1,
            symhd: 1,
            bt: 0.5,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct DemodConfig {
    pub header: HeaderSpec,
    pub mode: IqMode,
    /// Track DC offset / residual carrier frequency
    pub dc_tracking: bool,
    /// Enable the IF and FM low-pass stages
    pub lowpass: bool,
    /// Disable the no-signal timeout in `find_header`
    pub continuous: bool,
    /// IF low-pass bandwidth in Hz (0 = 24 kHz default)
    pub lpiq_bw: f64,
    /// FM low-pass bandwidth in Hz (0 = 10 kHz default)
    pub lpfm_bw: f64,
    /// Modulation index; sets the dual-tone mixer frequencies
    pub h: f64,
}

impl DemodConfig {
    pub fn new(header: HeaderSpec) -> Self {
        DemodConfig {
            header,
            mode: IqMode::Off,
            dc_tracking: false,
            lowpass: false,
            continuous: false,
            lpiq_bw: 0.0,
            lpfm_bw: 0.0,
            h: 1.0,
        }
    }
}

/// Decimating front-end parameters (block-reader mode)
#[derive(Debug, Clone, Copy)]
pub struct DecimateConfig {
    /// Frequency shift relative to the raw sample rate (cycles per sample,
    /// negative shifts down)
    pub xlt_fq: f64,
    /// Anti-aliasing filter taps; 0 picks a default of `16 * dec_m + 1`
    pub taps: usize,
}

/// Per-session decimating mixer: rational-frequency rotation lookup table
/// plus a low-pass decimation ring
pub(crate) struct Decimator {
    pub(crate) m: usize,
    lut: Vec<Complex32>,
    lut_pos: usize,
    ring: Vec<Complex32>,
    ring_pos: usize,
    taps: usize,
    ws: Vec<f32>,
    pub(crate) chunk: Vec<Complex32>,
}

impl Decimator {
    /// Build the rotation table for a shift of `xlt_fq` cycles/sample at
    /// the raw rate `sr_base`.
    ///
    /// The table length is `sr_base / d` for the largest divisor `d <= 16`
    /// of `sr_base`; the shift frequency is snapped to the nearest multiple
    /// of `d` (within an 16 Hz window) so the rotation is exactly periodic
    /// over the table.
    fn new(sr_base: u32, dec_m: usize, xlt_fq: f64, taps: usize) -> Self {
        const W: i64 = 16;

        let sr = sr_base as i64;
        let freq = (xlt_fq * sr_base as f64 + 0.5).floor() as i64;

        let mut d = 1i64;
        for cand in (1..=W).rev() {
            if sr % cand == 0 {
                d = cand;
                break;
            }
        }

        let mut freq0 = freq;
        for k in 0..W / 2 {
            if (freq + k) % d == 0 {
                freq0 = freq + k;
                break;
            }
            if (freq - k) % d == 0 {
                freq0 = freq - k;
                break;
            }
        }

        let lut_len = (sr / d) as usize;
        let f0 = freq0 as f64 / sr_base as f64;
        let mut lut = Vec::with_capacity(lut_len);
        for n in 0..lut_len {
            let t = f0 * n as f64;
            let w = Complex64::from_polar(1.0, t * core::f64::consts::TAU);
            lut.push(Complex32::new(w.re as f32, w.im as f32));
        }

        let taps = if taps == 0 { 16 * dec_m + 1 } else { taps };
        let (taps, ws) = filter::lowpass_coeffs(0.5 / dec_m as f64, taps);

        Decimator {
            m: dec_m,
            lut,
            lut_pos: 0,
            ring: vec![Complex32::new(0.0, 0.0); taps],
            ring_pos: 0,
            taps,
            ws,
            chunk: vec![Complex32::new(0.0, 0.0); dec_m],
        }
    }

    /// Rotate one chunk of raw samples into the decimation ring and emit
    /// the filtered output sample
    fn push_chunk(&mut self) -> Complex32 {
        let mut z = Complex32::new(0.0, 0.0);
        for j in 0..self.m {
            z = self.chunk[j] * self.lut[self.lut_pos];
            self.lut_pos += 1;
            if self.lut_pos >= self.lut.len() {
                self.lut_pos = 0;
            }
            self.ring[self.ring_pos] = z;
            self.ring_pos += 1;
            if self.ring_pos >= self.taps {
                self.ring_pos = 0;
            }
        }
        if self.m > 1 {
            filter::lowpass_complex(&self.ring, self.ring_pos as i64, self.taps, &self.ws)
        } else {
            z
        }
    }
}

pub(crate) enum Input<R> {
    Pcm(PcmReader<R>),
    Block(BlockConsumer<R>),
}

/// Demodulation session state
pub struct Demod<R> {
    pub(crate) input: Input<R>,
    pub(crate) mode: IqMode,
    pub(crate) dc_tracking: bool,
    pub(crate) lowpass: bool,
    pub(crate) continuous: bool,

    pub(crate) sr: u32,
    pub(crate) sps: f64,
    pub(crate) symlen: usize,
    pub(crate) symhd: usize,
    pub(crate) hdr: BitVec<u8, Msb0>,

    // frame geometry: template length L, detection stride K, ring length M
    pub(crate) l: usize,
    pub(crate) k: usize,
    pub(crate) m: usize,
    pub(crate) delay: usize,

    pub(crate) sample_in: i64,
    pub(crate) sample_out: i64,
    pub(crate) buffered: i64,
    pub(crate) last_detect: i64,
    pub(crate) sc: i64,

    pub(crate) bufs: Vec<f32>,
    pub(crate) fm_buf: Vec<f32>,
    pub(crate) rot_iqbuf: Vec<Complex32>,
    pub(crate) n_iqbuf: usize,

    pub(crate) dft: Dft,
    pub(crate) xn: Vec<f32>,
    pub(crate) x_spec: Vec<Complex32>,
    pub(crate) z_spec: Vec<Complex32>,
    pub(crate) cx: Vec<Complex32>,
    pub(crate) fm_spec: Vec<Complex32>,
    pub(crate) template: Vec<f32>,

    pub(crate) mv: f32,
    pub(crate) mv_pos: i64,
    pub(crate) mv2: f32,
    pub(crate) mv2_pos: i64,
    pub(crate) dc_value: f64,
    pub(crate) d_df: f64,
    pub(crate) df: f64,
    pub(crate) locked: bool,

    lpiq_taps: usize,
    ws_lpiq_acq: Vec<f32>,
    ws_lpiq_locked: Vec<f32>,
    lpiq_buf: Vec<Complex32>,
    pub(crate) lpfm_taps: usize,
    ws_lpfm: Vec<f32>,
    lpfm_buf: Vec<f32>,

    w1: f64,
    w2: f64,
    f1sum: Complex64,
    f2sum: Complex64,

    dec: Option<Decimator>,
}

impl<R: Read> Demod<R> {
    /// Create a session over a direct PCM stream (modes `Off`, `Iq`,
    /// `IqFsk`).
    pub fn new(reader: PcmReader<R>, cfg: DemodConfig) -> DspResult<Self> {
        if cfg.mode == IqMode::IqDecimate {
            return Err(DspError::InvalidConfig {
                msg: "IqDecimate requires a block reader (use with_block)".into(),
            });
        }
        if cfg.mode.is_iq() && reader.spec().channels < 2 {
            return Err(DspError::InvalidConfig {
                msg: "IQ modes require a 2-channel stream".into(),
            });
        }
        let sr = reader.spec().sample_rate;
        Self::init(Input::Pcm(reader), sr, cfg, None)
    }

    /// Create a session on one slot of a shared block reader
    /// (mode `IqDecimate`). The session runs at the decimated rate
    /// `sr_base / dec_m`.
    pub fn with_block(
        consumer: BlockConsumer<R>,
        cfg: DemodConfig,
        dec_cfg: DecimateConfig,
    ) -> DspResult<Self> {
        if cfg.mode != IqMode::IqDecimate {
            return Err(DspError::InvalidConfig {
                msg: "with_block requires IqDecimate mode".into(),
            });
        }
        let sr_base = consumer.reader().spec().sample_rate;
        let dec_m = consumer.reader().dec_m();
        let sr = sr_base / dec_m as u32;
        let dec = Decimator::new(sr_base, dec_m, dec_cfg.xlt_fq, dec_cfg.taps);
        Self::init(Input::Block(consumer), sr, cfg, Some(dec))
    }

    fn init(
        input: Input<R>,
        sr: u32,
        cfg: DemodConfig,
        dec: Option<Decimator>,
    ) -> DspResult<Self> {
        let hdr = pulse::parse_bits(&cfg.header.pattern).ok_or_else(|| {
            DspError::InvalidConfig {
                msg: "header pattern must be '0'/'1' characters".into(),
            }
        })?;
        if hdr.is_empty() {
            return Err(DspError::InvalidConfig {
                msg: "empty header pattern".into(),
            });
        }
        let sps = cfg.header.sps;
        if !(sps >= 1.0) {
            return Err(DspError::InvalidConfig {
                msg: format!("samples per symbol must be >= 1, got {}", sps),
            });
        }
        if !matches!(cfg.header.symlen, 1 | 2) || !matches!(cfg.header.symhd, 1 | 2) {
            return Err(DspError::InvalidConfig {
                msg: "symlen and symhd must be 1 or 2".into(),
            });
        }
        if sr == 0 {
            return Err(DspError::InvalidConfig {
                msg: "zero sample rate".into(),
            });
        }

        // template length, ring length (power of two), detection stride
        let l = (hdr.len() as f64 * sps + 0.5) as usize;
        let mut m = MIN_TRANSFORM;
        while m < 3 * l {
            m <<= 1;
        }
        let delay = l / 16;
        let k = m - l - delay;

        let mut dft = Dft::new(m, sr)?;
        dft.set_window(Window::Hann);

        let template = pulse::matched_filter(&hdr, sps, cfg.header.bt);
        debug_assert_eq!(template.len(), l);

        // time-reversed template, zero-padded and pre-transformed
        let mut rev = vec![0.0f32; m];
        for i in 0..l {
            rev[l - 1 - i] = template[i];
        }
        let mut fm_spec = vec![Complex32::new(0.0, 0.0); m];
        dft.transform_real(&rev, &mut fm_spec);

        // IF and FM low-pass banks
        let mut lpiq_taps = 0;
        let mut ws_lpiq_acq = Vec::new();
        let mut ws_lpiq_locked = Vec::new();
        let mut lpiq_buf = Vec::new();
        let mut lpfm_taps = 0;
        let mut ws_lpfm = Vec::new();
        let mut lpfm_buf = Vec::new();
        if cfg.mode.is_iq() && cfg.lowpass {
            let bw = if cfg.lpiq_bw > 0.0 { cfg.lpiq_bw } else { 24000.0 };
            let f_lp = bw / sr as f64 / 2.0;
            let taps = (4.0 * sr as f64 / IF_TRANSITION_BW) as usize;
            let (taps, acq) = filter::lowpass_coeffs(1.5 * f_lp, taps);
            let (taps, locked) = filter::lowpass_coeffs(f_lp, taps);
            lpiq_taps = taps;
            ws_lpiq_acq = acq;
            ws_lpiq_locked = locked;
            lpiq_buf = vec![Complex32::new(0.0, 0.0); taps];

            let bw = if cfg.lpfm_bw > 0.0 { cfg.lpfm_bw } else { 10000.0 };
            let f_lp = bw / sr as f64;
            let taps = (4.0 * sr as f64 / FM_TRANSITION_BW) as usize;
            let (taps, ws) = filter::lowpass_coeffs(f_lp, taps);
            lpfm_taps = taps;
            ws_lpfm = ws;
            lpfm_buf = vec![0.0f32; taps];
        }

        // dual-tone mixer frequencies: +/- h * baud / 2
        let f1 = -cfg.h * sr as f64 / (2.0 * sps);
        let w1 = core::f64::consts::TAU * f1;
        let w2 = -w1;

        let n_iqbuf = if cfg.mode.is_iq() { m } else { 0 };

        Ok(Demod {
            input,
            mode: cfg.mode,
            dc_tracking: cfg.dc_tracking,
            lowpass: cfg.lowpass && cfg.mode.is_iq(),
            continuous: cfg.continuous,
            sr,
            sps,
            symlen: cfg.header.symlen,
            symhd: cfg.header.symhd,
            hdr,
            l,
            k,
            m,
            delay,
            sample_in: 0,
            sample_out: 0,
            buffered: 0,
            last_detect: 0,
            sc: 0,
            bufs: vec![0.0; m],
            fm_buf: vec![0.0; m],
            rot_iqbuf: vec![Complex32::new(0.0, 0.0); n_iqbuf],
            n_iqbuf,
            xn: vec![0.0; m],
            x_spec: vec![Complex32::new(0.0, 0.0); m],
            z_spec: vec![Complex32::new(0.0, 0.0); m],
            cx: vec![Complex32::new(0.0, 0.0); m],
            fm_spec,
            template,
            dft,
            mv: 0.0,
            mv_pos: 0,
            mv2: 0.0,
            mv2_pos: 0,
            dc_value: 0.0,
            d_df: 0.0,
            df: 0.0,
            // without DC tracking the narrow (locked) IF filter is used
            // from the start; acquisition begins wide otherwise
            locked: !cfg.dc_tracking,
            lpiq_taps,
            ws_lpiq_acq,
            ws_lpiq_locked,
            lpiq_buf,
            lpfm_taps,
            ws_lpfm,
            lpfm_buf,
            w1,
            w2,
            f1sum: Complex64::new(0.0, 0.0),
            f2sum: Complex64::new(0.0, 0.0),
            dec,
        })
    }

    /// Running sample counter of the slicer-input stream
    pub fn sample_count(&self) -> i64 {
        self.sample_out
    }

    /// Pipeline delay between `sample_in` and `sample_out`
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Tracked residual carrier frequency offset in Hz
    pub fn carrier_offset(&self) -> f64 {
        self.df
    }

    /// The unit-energy matched-filter template compiled from the header
    pub fn matched_template(&self) -> &[f32] {
        &self.template
    }

    /// Release this session's block-reader slot so the remaining consumers
    /// are not blocked on it. No-op for direct PCM input.
    pub fn release_slot(&self) {
        if let Input::Block(c) = &self.input {
            c.reader().deactivate(c.slot());
        }
    }

    pub(crate) fn slot_active(&self) -> bool {
        match &self.input {
            Input::Pcm(_) => true,
            Input::Block(c) => c.reader().is_active(c.slot()),
        }
    }

    /// Group delay applied when a detection from the FM ring is mapped back
    /// onto the slicer-input ring. Empirically tuned; kept as-is.
    pub(crate) fn fm_group_delay(&self) -> i64 {
        ((self.lpfm_taps as f64 - (self.sps - 1.0)) / 2.0) as i64
    }

    pub(crate) fn lpiq_ws(&self) -> &[f32] {
        if self.locked {
            &self.ws_lpiq_locked
        } else {
            &self.ws_lpiq_acq
        }
    }

    /// Advance the pipeline by one output sample.
    ///
    /// `inv` negates the slicer input (inverted-polarity reading).
    pub(crate) fn pull_sample(&mut self, inv: bool) -> DspResult<()> {
        let t = self.sample_in as f64 / self.sr as f64;
        let mut s: f32;

        if self.mode.is_iq() {
            let mut z = match self.mode {
                IqMode::IqDecimate => {
                    let dec = self.dec.as_mut().expect("decimator in IqDecimate mode");
                    let n = match &mut self.input {
                        Input::Block(c) => c.read_chunk(&mut dec.chunk),
                        Input::Pcm(_) => 0,
                    };
                    if n < dec.m {
                        return Err(DspError::EndOfStream);
                    }
                    dec.push_chunk()
                }
                _ => match &mut self.input {
                    Input::Pcm(p) => p.read_csample()?,
                    Input::Block(_) => {
                        return Err(DspError::InvalidConfig {
                            msg: "block input outside IqDecimate mode".into(),
                        })
                    }
                },
            };

            // de-rotate by the tracked carrier offset
            if self.dc_tracking {
                let rot =
                    Complex64::from_polar(1.0, -t * core::f64::consts::TAU * self.df);
                let zr = Complex64::new(z.re as f64, z.im as f64) * rot;
                z = Complex32::new(zr.re as f32, zr.im as f32);
            }

            if self.lowpass {
                self.lpiq_buf[ring(self.sample_in, self.lpiq_taps)] = z;
                z = filter::lowpass_complex(
                    &self.lpiq_buf,
                    self.sample_in,
                    self.lpiq_taps,
                    self.lpiq_ws(),
                );
            }

            // phase-difference discriminator
            let z0 = self.rot_iqbuf[ring(self.sample_in - 1, self.n_iqbuf)];
            let w = z * z0.conj();
            s = (FM_GAIN * w.arg() as f64 / core::f64::consts::PI) as f32;

            self.rot_iqbuf[ring(self.sample_in, self.n_iqbuf)] = z;

            if self.lowpass {
                self.lpfm_buf[ring(self.sample_in, self.lpfm_taps)] = s;
                s = filter::lowpass_real(
                    &self.lpfm_buf,
                    self.sample_in,
                    self.lpfm_taps,
                    &self.ws_lpfm,
                );
            }

            self.fm_buf[ring(self.sample_in, self.m)] = s;

            if self.mode.uses_fsk_metric() {
                // exact add-new/subtract-old update of both tone integrals
                let n = self.sps as i64;
                let tn = (self.sample_in - n) as f64 / self.sr as f64;
                let z0 = self.rot_iqbuf[ring(self.sample_in - n, self.n_iqbuf)];
                let z0 = Complex64::new(z0.re as f64, z0.im as f64);
                let zc = Complex64::new(z.re as f64, z.im as f64);

                let x0 = z0 * Complex64::from_polar(1.0, -tn * self.w1);
                let x = zc * Complex64::from_polar(1.0, -t * self.w1);
                self.f1sum += x - x0;

                let x0 = z0 * Complex64::from_polar(1.0, -tn * self.w2);
                let x = zc * Complex64::from_polar(1.0, -t * self.w2);
                self.f2sum += x - x0;

                s = ((self.f2sum.norm() - self.f1sum.norm()) / self.sps) as f32;
            }
        } else {
            s = match &mut self.input {
                Input::Pcm(p) => p.read_sample()?,
                Input::Block(_) => {
                    return Err(DspError::InvalidConfig {
                        msg: "block input outside IqDecimate mode".into(),
                    })
                }
            };
        }

        if inv {
            s = -s;
        }
        self.bufs[ring(self.sample_in, self.m)] = s;

        self.sample_out = self.sample_in - self.delay as i64;
        self.sample_in += 1;

        Ok(())
    }

    /// Nudge the carrier-offset estimate toward the measured discriminator
    /// DC bias, re-rotating the tail of the IQ ring so the dual-tone
    /// integrals stay consistent, and switch the IF filter between the
    /// acquisition and locked sets with 1 kHz hysteresis.
    pub(crate) fn track_frequency_offset(&mut self) {
        if self.d_df.abs() > 100.0 {
            let diff = self.d_df * 0.6;
            if self.mode.uses_fsk_metric() {
                let mut x1 = Complex64::new(0.0, 0.0);
                let mut x2 = Complex64::new(0.0, 0.0);
                let mut n = self.sps as i64;
                while n > 0 {
                    let tn = (self.sample_in - n) as f64 / self.sr as f64;
                    let idx = ring(self.sample_in - n, self.n_iqbuf);
                    let old = self.rot_iqbuf[idx];
                    let z = Complex64::new(old.re as f64, old.im as f64)
                        * Complex64::from_polar(1.0, -tn * core::f64::consts::TAU * diff);
                    self.rot_iqbuf[idx] = Complex32::new(z.re as f32, z.im as f32);
                    x1 += z * Complex64::from_polar(1.0, -tn * self.w1);
                    x2 += z * Complex64::from_polar(1.0, -tn * self.w2);
                    n -= 1;
                }
                self.f1sum = x1;
                self.f2sum = x2;
            }
            self.df += diff;
        }

        if self.d_df.abs() > 1e3 {
            if self.locked {
                self.locked = false; // widen back to the acquisition filter
            }
        } else if !self.locked {
            self.locked = true;
        }
    }
}
