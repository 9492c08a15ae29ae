//! PCM sample ingestion
//!
//! Decodes 8/16/32-bit PCM frames from a byte stream into normalized floats
//! in [-1, 1] (8-bit: unsigned, centered at 128; 16-bit: signed; 32-bit:
//! IEEE float passthrough). The complex path subtracts a running DC
//! estimate, because raw IQ captures carry hardware DC bias that would
//! corrupt the FM discriminator.

use std::io::Read;

use num::complex::Complex32;

use crate::error::{DspError, DspResult};

/// Declared PCM stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

/// Running IQ DC-offset estimator with an exponentially growing window.
///
/// The averaging window starts at `sample_rate / 32` samples and doubles
/// after each completed window until it reaches `sample_rate * dec_m`; it
/// never shrinks. Early on the estimate converges fast, later it becomes a
/// slow long-term average.
#[derive(Debug, Clone)]
pub struct IqDc {
    sum_x: f64,
    sum_y: f64,
    avg_x: f32,
    avg_y: f32,
    cnt: u32,
    maxcnt: u32,
    maxlim: u32,
}

impl IqDc {
    pub fn new(sample_rate: u32, dec_m: u32) -> Self {
        let mut maxlim = sample_rate;
        let mut maxcnt = maxlim / 32;
        if dec_m > 1 {
            maxlim *= dec_m;
            maxcnt *= dec_m;
        }
        IqDc {
            sum_x: 0.0,
            sum_y: 0.0,
            avg_x: 0.0,
            avg_y: 0.0,
            cnt: 0,
            maxcnt: maxcnt.max(1),
            maxlim,
        }
    }

    /// Feed one raw (uncorrected) sample into the accumulator
    pub fn update(&mut self, x: f32, y: f32) {
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.cnt += 1;
        if self.cnt == self.maxcnt {
            self.avg_x = (self.sum_x / self.maxcnt as f64) as f32;
            self.avg_y = (self.sum_y / self.maxcnt as f64) as f32;
            self.sum_x = 0.0;
            self.sum_y = 0.0;
            self.cnt = 0;
            if self.maxcnt < self.maxlim {
                self.maxcnt *= 2;
            }
        }
    }

    /// Current DC estimate
    pub fn average(&self) -> Complex32 {
        Complex32::new(self.avg_x, self.avg_y)
    }
}

/// PCM frame reader over a byte stream positioned at the first data byte
pub struct PcmReader<R> {
    reader: R,
    spec: PcmSpec,
    channel: usize,
    pub(crate) dc: IqDc,
}

impl<R: Read> PcmReader<R> {
    /// Wrap a byte stream. `channel` selects which channel of a real frame
    /// [`read_sample`](Self::read_sample) returns; out-of-range values fall
    /// back to channel 0. `dec_m` scales the DC-estimator window limit for
    /// decimating consumers (1 otherwise).
    pub fn new(reader: R, spec: PcmSpec, channel: usize, dec_m: u32) -> Self {
        let channel = if channel < spec.channels as usize {
            channel
        } else {
            0
        };
        let dc = IqDc::new(spec.sample_rate, dec_m);
        PcmReader {
            reader,
            spec,
            channel,
            dc,
        }
    }

    pub fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn decode_one(&mut self) -> DspResult<f32> {
        match self.spec.bits_per_sample {
            8 => {
                let mut b = [0u8; 1];
                self.reader.read_exact(&mut b).map_err(DspError::from_io)?;
                Ok((b[0] as i32 - 128) as f32 / 128.0)
            }
            16 => {
                let mut b = [0u8; 2];
                self.reader.read_exact(&mut b).map_err(DspError::from_io)?;
                Ok(i16::from_le_bytes(b) as f32 / 32768.0)
            }
            32 => {
                let mut b = [0u8; 4];
                self.reader.read_exact(&mut b).map_err(DspError::from_io)?;
                Ok(f32::from_le_bytes(b))
            }
            other => Err(DspError::UnsupportedFormat {
                msg: format!("unsupported bit depth: {}", other),
            }),
        }
    }

    /// Read one frame and return the selected channel as a normalized float
    pub fn read_sample(&mut self) -> DspResult<f32> {
        let mut s = 0.0;
        for ch in 0..self.spec.channels as usize {
            let v = self.decode_one()?;
            if ch == self.channel {
                s = v;
            }
        }
        Ok(s)
    }

    /// Read one stereo frame as an I/Q pair with the running DC estimate
    /// subtracted
    pub fn read_csample(&mut self) -> DspResult<Complex32> {
        let x = self.decode_one()?;
        let y = self.decode_one()?;
        let z = Complex32::new(x - self.dc.avg_x, y - self.dc.avg_y);
        self.dc.update(x, y);
        Ok(z)
    }
}
