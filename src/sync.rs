//! Correlation header detection
//!
//! The header is located by matched-filter correlation in the frequency
//! domain: the most recent `K+L` slicer-input samples are zero-padded to the
//! transform size, multiplied in the spectrum with the pre-transformed,
//! time-reversed header template, and inverse-transformed (conjugate trick,
//! unscaled). The squared-magnitude peak inside `[L-1, K+L-1]` gives the
//! header position; the peak value, normalized by the local L-sample signal
//! norm and by N, is a correlation score in roughly [-1, 1] whose sign is
//! the header polarity.
//!
//! `find_header` drives the loop: pull samples, correlate every `K-4`
//! samples, verify candidates bit-by-bit against the template, track the
//! residual carrier offset, and give up after ten seconds without a
//! confirmed header.

use std::io::Read;

use num::complex::Complex32;
use tracing::{debug, trace};

use crate::demod::{ring, Demod, FM_GAIN};
use crate::error::{DspError, DspResult};

/// Seconds without a confirmed header before the search declares the
/// signal lost
const SEC_NO_SIGNAL: i64 = 10;

/// A verified header detection
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    /// Absolute sample position of the last header sample
    pub pos: i64,
    /// Normalized correlation score; negative for inverted polarity
    pub score: f32,
}

impl Detection {
    /// Whether the header was received with inverted polarity
    pub fn inverted(&self) -> bool {
        self.score < 0.0
    }
}

impl<R: Read> Demod<R> {
    /// One correlation pass over the chosen source ring.
    ///
    /// Returns `(normalized peak value, peak index, absolute peak
    /// position)`. `remove_dc` zeroes the DC bin and rebuilds the time
    /// signal from the corrected spectrum so the sliding norm matches what
    /// was correlated.
    fn correlate_once(
        &mut self,
        from_fm: bool,
        remove_dc: bool,
        pos: i64,
    ) -> DspResult<(f32, usize, i64)> {
        let kl = self.k + self.l;
        let n = self.dft.size();

        for i in 0..kl {
            let idx = ring(pos - (kl as i64 - 1) + i as i64, self.m);
            self.xn[i] = if from_fm {
                self.fm_buf[idx]
            } else {
                self.bufs[idx]
            };
        }
        for i in kl..n {
            self.xn[i] = 0.0;
        }

        self.dft.transform_real(&self.xn, &mut self.x_spec);

        if remove_dc {
            self.x_spec[0] = Complex32::new(0.0, 0.0);
            self.dft.conjugate_transform(&self.x_spec, &mut self.cx);
            for i in 0..n {
                self.xn[i] = self.cx[i].re / n as f32;
            }
        }

        for i in 0..n {
            self.z_spec[i] = self.x_spec[i] * self.fm_spec[i];
        }
        self.dft.conjugate_transform(&self.z_spec, &mut self.cx);

        // peak of the squared real part inside the valid lag window
        let mut mx = 0.0f32;
        let mut mx2 = 0.0f32;
        let mut mp = 0usize;
        for i in self.l - 1..kl {
            let re = self.cx[i].re;
            if re * re > mx2 {
                mx = re;
                mx2 = re * re;
                mp = i;
            }
        }
        if mx2 == 0.0 || mp == self.l - 1 || mp == kl - 1 {
            // no peak at all, or an ambiguous/truncated peak at the edge
            return Err(DspError::BoundaryRejection);
        }

        let mpos = pos - (kl as i64 - 1) + mp as i64;

        // normalize by the L-sample signal norm ending at the peak
        let mut xnorm = 0.0f64;
        for i in 0..self.l {
            let x = self.xn[mp - i] as f64;
            xnorm += x * x;
        }
        let mx = mx / (xnorm.sqrt() as f32 * n as f32);

        Ok((mx, mp, mpos))
    }

    /// One detection step over the most recent `K+L` samples.
    ///
    /// Updates the current peak (`mv`, `mv_pos`), the discriminator DC
    /// estimate and the residual-carrier estimate. In DC-tracking FSK modes
    /// a weak direct score triggers one retry on the plain-FM ring with the
    /// DC bin removed; a retry score above threshold is preferred, with its
    /// position corrected for the FM low-pass group delay.
    pub(crate) fn correlate(&mut self, thres: f32) -> DspResult<()> {
        self.mv = 0.0;
        self.dc_value = 0.0;

        if self.sample_out < self.l as i64 {
            return Ok(()); // not enough history yet
        }
        let pos = self.sample_out;

        let (mx, _mp, first_pos) = self.correlate_once(false, self.dc_tracking, pos)?;
        let mut peak_pos = first_pos;

        self.mv = mx;
        self.mv_pos = peak_pos;
        self.buffered = self.sample_out - peak_pos;

        self.mv2 = 0.0;
        self.mv2_pos = 0;
        if self.dc_tracking && self.mode.uses_fsk_metric() && mx.abs() < thres {
            let (mx2, _mp2, retry_pos) = self.correlate_once(true, true, pos)?;
            peak_pos = retry_pos;
            self.mv2 = mx2;
            self.mv2_pos = retry_pos - self.fm_group_delay();

            if self.mv2 > thres || self.mv2 < -thres {
                self.mv = self.mv2;
                self.mv_pos = self.mv2_pos;
                self.buffered = self.sample_out - self.mv2_pos;
                trace!(score = self.mv2, "dc-corrected correlation preferred");
            }
        }

        if self.dc_tracking {
            // discriminator DC bias over the L samples ending at the peak
            let mp_ofs = if self.mode.uses_fsk_metric() && self.mv2_pos == 0 {
                self.fm_group_delay()
            } else {
                0
            };
            let mut dc = 0.0f64;
            for i in 0..self.l {
                dc += self.fm_buf[ring(mp_ofs + peak_pos - i as i64, self.m)] as f64;
            }
            self.dc_value = dc / self.l as f64;
        }

        self.d_df = self.sr as f64 * self.dc_value / (2.0 * FM_GAIN);

        Ok(())
    }

    /// Re-derive the raw header bits at the current peak position and count
    /// mismatches against the template, honoring inverted polarity.
    pub(crate) fn header_compare(&mut self) -> u32 {
        let inv = self.mv < 0.0;
        let nsyms = self.hdr.len() / self.symhd;
        let anchor = self.mv_pos + 1 - self.l as i64;

        let mut raw: Vec<bool> = Vec::with_capacity(self.hdr.len());
        for pos in 0..nsyms {
            self.read_bufbit(self.symhd, anchor, pos, &mut raw);
        }

        let mut errs = 0;
        for (i, bit) in raw.iter().enumerate().take(self.hdr.len()) {
            if (bit ^ inv) != self.hdr[i] {
                errs += 1;
            }
        }
        errs
    }

    /// Scan forward until a verified header or stream end.
    ///
    /// Every `K-4` samples one correlation step runs; a peak whose score
    /// magnitude exceeds `thres` is a candidate, and a candidate whose
    /// re-derived bits mismatch the template in at most `hdmax` places is a
    /// confirmed detection. While DC tracking is on, each candidate also
    /// nudges the carrier-offset estimate and switches the IF filter
    /// between its acquisition and locked sets with 1 kHz hysteresis.
    ///
    /// # Errors
    /// * `EndOfStream` - the sample source is exhausted
    /// * `SignalLost` - no header confirmed within ten seconds of samples,
    ///   or this session's consumer slot was deactivated
    pub fn find_header(&mut self, thres: f32, hdmax: u32) -> DspResult<Detection> {
        let mut k = 0usize;
        let mut prev_peak;

        loop {
            match self.pull_sample(false) {
                Ok(()) => {}
                // a deactivated consumer slot reads as stream end; report
                // it as signal loss instead
                Err(DspError::EndOfStream) if !self.slot_active() => {
                    return Err(DspError::SignalLost)
                }
                Err(e) => return Err(e),
            }

            k += 1;
            if k < self.k - 4 {
                self.mv = 0.0;
                continue;
            }
            k = 0;

            prev_peak = self.mv_pos;
            match self.correlate(thres) {
                Ok(()) => {}
                // no usable peak this cycle; keep scanning
                Err(DspError::BoundaryRejection) => {}
                Err(e) => return Err(e),
            }

            if !self.slot_active()
                || (!self.continuous
                    && self.mv_pos - self.last_detect > SEC_NO_SIGNAL * self.sr as i64)
            {
                debug!(
                    pos = self.mv_pos,
                    last = self.last_detect,
                    "signal lost, giving up"
                );
                return Err(DspError::SignalLost);
            }

            if self.mv > thres || self.mv < -thres {
                if self.dc_tracking && self.mode.is_iq() {
                    self.track_frequency_offset();
                }

                if self.mv_pos > prev_peak {
                    let errs = self.header_compare();
                    self.last_detect = self.mv_pos;

                    if errs <= hdmax {
                        debug!(
                            pos = self.mv_pos,
                            score = self.mv,
                            errs,
                            "header confirmed"
                        );
                        return Ok(Detection {
                            pos: self.mv_pos,
                            score: self.mv,
                        });
                    }
                    trace!(
                        pos = self.mv_pos,
                        score = self.mv,
                        errs,
                        "candidate rejected"
                    );
                }
            }
        }
    }
}
