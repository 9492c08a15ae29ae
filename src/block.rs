//! Block-synchronized multi-consumer sample reader
//!
//! Several demodulation sessions (one per monitored frequency) share one
//! underlying IQ stream. The stream is consumed in fixed-size blocks: the
//! first consumer to arrive while no block is pending takes the producer
//! role, reads and converts one block, and wakes everyone; each consumer
//! then drains the block in `dec_m`-sample chunks at its own pace. A slot
//! bitmask tracks which consumers still hold unread data; when the last one
//! drains, the next arrival produces again.
//!
//! End-of-stream is recorded in the shared state and observed cooperatively:
//! a short read marks the flag, consumers drain whatever whole chunks the
//! final block holds, and every call after that returns 0.

use std::io::Read;
use std::sync::{Arc, Condvar, Mutex};

use num::complex::Complex32;

use crate::error::{DspError, DspResult};
use crate::pcm::{IqDc, PcmSpec};

struct BlockState<R> {
    reader: R,
    spec: PcmSpec,
    dc: IqDc,
    blk: Vec<Complex32>,
    /// Number of valid samples in `blk` (short on the final block)
    blk_valid: usize,
    /// Consumers that have not yet drained the current block (`rbf`)
    pending: u32,
    /// Registered consumer slots (`rbf1`); deactivated slots drop out
    active: u32,
    eof: bool,
}

impl<R: Read> BlockState<R> {
    /// Read and convert one block of raw IQ frames, applying the shared DC
    /// estimator. A short read marks end-of-stream and zeroes the tail.
    fn fill_block(&mut self) {
        let bl = self.blk.len();
        let mut n = 0usize;
        while n < bl {
            match self.read_frame() {
                Some(z) => {
                    self.blk[n] = z;
                    n += 1;
                }
                None => break,
            }
        }
        if n < bl {
            self.eof = true;
            for z in self.blk[n..].iter_mut() {
                *z = Complex32::new(0.0, 0.0);
            }
        }
        self.blk_valid = n;
    }

    fn read_frame(&mut self) -> Option<Complex32> {
        let (x, y) = match self.spec.bits_per_sample {
            8 => {
                let mut b = [0u8; 2];
                self.reader.read_exact(&mut b).ok()?;
                (
                    (b[0] as i32 - 128) as f32 / 128.0,
                    (b[1] as i32 - 128) as f32 / 128.0,
                )
            }
            16 => {
                let mut b = [0u8; 4];
                self.reader.read_exact(&mut b).ok()?;
                (
                    i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
                    i16::from_le_bytes([b[2], b[3]]) as f32 / 32768.0,
                )
            }
            _ => {
                let mut b = [0u8; 8];
                self.reader.read_exact(&mut b).ok()?;
                (
                    f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                    f32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                )
            }
        };
        let avg = self.dc.average();
        let z = Complex32::new(x - avg.re, y - avg.im);
        self.dc.update(x, y);
        Some(z)
    }
}

/// Shared single-producer/multi-consumer block rendezvous
pub struct BlockReader<R> {
    inner: Mutex<BlockState<R>>,
    cond: Condvar,
    dec_m: usize,
    blk_sz: usize,
}

impl<R: Read> BlockReader<R> {
    /// Create a shared reader for `consumers` sessions. Each block holds
    /// `dec_m * blk_sz` complex samples; a consumer takes `dec_m` samples
    /// per [`BlockConsumer::read_chunk`] call.
    pub fn new(
        reader: R,
        spec: PcmSpec,
        consumers: usize,
        dec_m: usize,
        blk_sz: usize,
    ) -> DspResult<Arc<Self>> {
        if consumers == 0 || consumers > 32 {
            return Err(DspError::InvalidConfig {
                msg: format!("consumer count {} out of range 1..=32", consumers),
            });
        }
        if spec.channels < 2 {
            return Err(DspError::InvalidConfig {
                msg: "block reader requires an IQ (2-channel) stream".into(),
            });
        }
        if dec_m == 0 || blk_sz == 0 {
            return Err(DspError::InvalidConfig {
                msg: "dec_m and blk_sz must be nonzero".into(),
            });
        }
        let active = if consumers == 32 {
            u32::MAX
        } else {
            (1u32 << consumers) - 1
        };
        Ok(Arc::new(BlockReader {
            inner: Mutex::new(BlockState {
                reader,
                spec,
                dc: IqDc::new(spec.sample_rate, dec_m as u32),
                blk: vec![Complex32::new(0.0, 0.0); dec_m * blk_sz],
                blk_valid: 0,
                pending: 0,
                active,
                eof: false,
            }),
            cond: Condvar::new(),
            dec_m,
            blk_sz,
        }))
    }

    pub fn spec(&self) -> PcmSpec {
        self.inner.lock().unwrap().spec
    }

    pub fn dec_m(&self) -> usize {
        self.dec_m
    }

    /// Whether a consumer slot is still registered
    pub fn is_active(&self, slot: usize) -> bool {
        self.inner.lock().unwrap().active & (1 << slot) != 0
    }

    /// Remove a consumer slot. If the departing consumer was the last
    /// holdout of the current block, refill and broadcast so the remaining
    /// consumers are not stranded waiting for it to drain.
    pub fn deactivate(&self, slot: usize) {
        let bit = 1u32 << slot;
        let mut st = self.inner.lock().unwrap();
        st.active &= !bit;
        st.pending &= !bit;
        if st.pending == 0 && st.active != 0 && !st.eof {
            st.fill_block();
            st.pending = st.active;
        }
        self.cond.notify_all();
    }
}

/// One session's handle on a [`BlockReader`]
pub struct BlockConsumer<R> {
    shared: Arc<BlockReader<R>>,
    slot: usize,
    blk_cnt: usize,
}

impl<R: Read> BlockConsumer<R> {
    pub fn new(shared: Arc<BlockReader<R>>, slot: usize) -> Self {
        BlockConsumer {
            shared,
            slot,
            blk_cnt: 0,
        }
    }

    pub fn reader(&self) -> &Arc<BlockReader<R>> {
        &self.shared
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Fetch this consumer's next `dec_m` samples, producing a fresh block
    /// if none is pending. Blocks on the rendezvous until this slot's bit is
    /// set. Returns 0 once end-of-stream is reached.
    pub fn read_chunk(&mut self, out: &mut [Complex32]) -> usize {
        let dec_m = self.shared.dec_m;
        let bit = 1u32 << self.slot;

        let mut st = self.shared.inner.lock().unwrap();
        if st.active & bit == 0 || (st.eof && st.pending & bit == 0) {
            return 0;
        }

        if st.pending == 0 {
            st.fill_block();
            st.pending = st.active;
            self.shared.cond.notify_all();
        }

        while st.pending & bit == 0 {
            if st.active & bit == 0 {
                // withdrawn while waiting
                return 0;
            }
            st = self.shared.cond.wait(st).unwrap();
        }

        let base = dec_m * self.blk_cnt;
        if base + dec_m > st.blk_valid {
            // partial tail of the final block
            return 0;
        }
        out[..dec_m].copy_from_slice(&st.blk[base..base + dec_m]);

        self.blk_cnt += 1;
        if self.blk_cnt == self.shared.blk_sz {
            st.pending &= !bit;
            self.blk_cnt = 0;
        }

        dec_m
    }
}
