//! Integrate-and-dump bit slicer
//!
//! Recovers symbol-synchronized bits from the circular slicer-input buffer,
//! pulling fresh samples through the demodulator once the lookahead left by
//! the header detection is exhausted. The hard bit is the sign of the
//! integral over one symbol period; the soft bit also carries the signed
//! sum for confidence-weighted decoding downstream.

use std::io::Read;

use crate::demod::{ring, Demod};
use crate::error::DspResult;

/// Deviation from the neighbor average above which a sample counts as a
/// spike
const SPIKE_THRESHOLD: f32 = 0.5;

/// Damping applied to a detected spike
const SPIKE_SCALE: f32 = 0.27;

/// Hard decision plus the signed symbol integral it was sliced from
#[derive(Debug, Clone, Copy)]
pub struct SoftBit {
    pub bit: u8,
    pub sum: f32,
}

impl<R: Read> Demod<R> {
    /// Integrate one header symbol (or Manchester pair) of the slicer ring
    /// relative to a fixed `anchor` position, without pulling new samples.
    /// Appends `symlen` bits; a Manchester pair maps to `10`/`01` by the
    /// sign of the half-symbol difference.
    pub(crate) fn read_bufbit(
        &self,
        symlen: usize,
        anchor: i64,
        pos: usize,
        out: &mut Vec<bool>,
    ) {
        let mut bound = pos as f64 * symlen as f64 * self.sps;
        let mut rcount = bound.ceil() as i64;

        let dc = if self.dc_tracking && !self.mode.uses_fsk_metric() {
            self.dc_value
        } else {
            0.0
        };

        let mut sum = 0.0f64;
        bound += self.sps;
        while (rcount as f64) < bound {
            sum += self.bufs[ring(rcount + anchor, self.m)] as f64 - dc;
            rcount += 1;
        }

        if symlen == 2 {
            bound += self.sps;
            while (rcount as f64) < bound {
                sum -= self.bufs[ring(rcount + anchor, self.m)] as f64 - dc;
                rcount += 1;
            }
        }

        if symlen != 2 {
            out.push(sum >= 0.0);
        } else if sum >= 0.0 {
            out.push(true);
            out.push(false);
        } else {
            out.push(false);
            out.push(true);
        }
    }

    /// Fetch the next slicer sample, consuming buffered lookahead before
    /// pulling fresh samples through the demodulator.
    fn next_slicer_sample(&mut self, inv: bool, ofs: i64, spike: bool) -> DspResult<f32> {
        if self.buffered > 0 {
            self.buffered -= 1;
        } else {
            self.pull_sample(inv)?;
        }

        let idx = self.sample_out - self.buffered + ofs;
        let mut sample = self.bufs[ring(idx, self.m)];

        if spike {
            let avg = 0.5
                * (self.bufs[ring(idx - 1, self.m)] + self.bufs[ring(idx + 1, self.m)]);
            if (sample - avg).abs() > SPIKE_THRESHOLD {
                sample = avg + SPIKE_SCALE * (sample - avg);
            }
        }

        Ok(sample)
    }

    /// Integrate the symbol at index `pos` after the last detected header.
    ///
    /// `window` restricts the integration to `+-window` samples around the
    /// symbol midpoint (negative = whole symbol). In Manchester mode the
    /// first half-symbol enters with negative sign, so `10 -> 0, 01 -> 1`.
    /// `pos == 0` re-anchors the symbol clock.
    fn integrate_symbol(
        &mut self,
        inv: bool,
        ofs: i64,
        pos: usize,
        window: f32,
        spike: bool,
    ) -> DspResult<f64> {
        let mut bound = pos as f64 * self.symlen as f64 * self.sps;

        let dc = if self.dc_tracking && !self.mode.uses_fsk_metric() {
            self.dc_value
        } else {
            0.0
        };

        if pos == 0 {
            bound = 0.0;
            self.sc = 0;
        }

        let mut sum = 0.0f64;

        if self.symlen == 2 {
            let mid = bound + (self.sps - 1.0) / 2.0;
            bound += self.sps;
            while (self.sc as f64) < bound {
                let sample = self.next_slicer_sample(inv, ofs, spike)? as f64 - dc;
                let t = self.sc as f64;
                if window < 0.0 || (mid - (window as f64) < t && t < mid + window as f64) {
                    sum -= sample;
                }
                self.sc += 1;
            }
        }

        let mid = bound + (self.sps - 1.0) / 2.0;
        bound += self.sps;
        while (self.sc as f64) < bound {
            let sample = self.next_slicer_sample(inv, ofs, spike)? as f64 - dc;
            let t = self.sc as f64;
            if window < 0.0 || (mid - (window as f64) < t && t < mid + window as f64) {
                sum += sample;
            }
            self.sc += 1;
        }

        Ok(sum)
    }

    /// Read one hard bit, symbol-synchronized to the last detected header.
    ///
    /// `inv` reads with inverted polarity, `ofs` shifts the read position,
    /// `pos` is the symbol index since the header (0 re-anchors), `window`
    /// excludes symbol edges (negative disables), `spike` enables the
    /// 3-point spike suppressor.
    pub fn read_hard_bit(
        &mut self,
        inv: bool,
        ofs: i64,
        pos: usize,
        window: f32,
        spike: bool,
    ) -> DspResult<u8> {
        let sum = self.integrate_symbol(inv, ofs, pos, window, spike)?;
        Ok(if sum >= 0.0 { 1 } else { 0 })
    }

    /// Read one soft bit: the hard decision plus the signed symbol integral
    pub fn read_soft_bit(
        &mut self,
        inv: bool,
        ofs: i64,
        pos: usize,
        window: f32,
        spike: bool,
    ) -> DspResult<SoftBit> {
        let sum = self.integrate_symbol(inv, ofs, pos, window, spike)?;
        Ok(SoftBit {
            bit: if sum >= 0.0 { 1 } else { 0 },
            sum: sum as f32,
        })
    }
}
