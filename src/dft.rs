//! Radix-2 transform engine
//!
//! In-place Cooley-Tukey FFT over complex buffers with precomputed per-stage
//! twiddle factors, sized once to the next power of two at or above the
//! correlation frame length. The "inverse" transform is implemented as
//! conjugate-then-forward: callers that need a true inverse divide by N
//! themselves. The matched-filter correlation path deliberately skips that
//! scaling because only the relative peak matters.

use num::complex::Complex32;

use crate::error::{DspError, DspResult};

/// Window shape applied by [`Dft::set_window`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Boxcar,
    Hann,
    Hamming,
    Blackman,
}

/// Transform context: size, twiddle factors and window coefficients
///
/// Owned by a demodulation session; all buffers are sized at construction
/// and never grow.
pub struct Dft {
    n: usize,
    log2n: u32,
    sr: u32,
    /// Window length; coefficients beyond `n2` are zero
    n2: usize,
    /// Per-stage twiddle seeds: `ew[s] = exp(-i*pi/2^s)`
    ew: Vec<Complex32>,
    win: Vec<f32>,
}

impl Dft {
    /// Create a transform context for size `n` (must be a power of two)
    /// associated with sample rate `sr` for bin/frequency mapping.
    pub fn new(n: usize, sr: u32) -> DspResult<Self> {
        if n < 2 || n & (n - 1) != 0 {
            return Err(DspError::InvalidConfig {
                msg: format!("transform size must be a power of two, got {}", n),
            });
        }
        let log2n = n.trailing_zeros();

        let mut ew = Vec::with_capacity(log2n as usize);
        for s in 0..log2n {
            let k = (1u32 << s) as f32;
            let theta = -core::f32::consts::PI / k;
            ew.push(Complex32::new(theta.cos(), theta.sin()));
        }

        let mut dft = Dft {
            n,
            log2n,
            sr,
            n2: n,
            ew,
            win: vec![0.0; n],
        };
        dft.set_window(Window::Boxcar);
        Ok(dft)
    }

    /// Transform size N
    pub fn size(&self) -> usize {
        self.n
    }

    /// In-place forward transform: bit-reversal permutation followed by
    /// `log2(N)` butterfly passes. O(N log N).
    pub fn raw_transform(&self, z: &mut [Complex32]) {
        let n = self.n;
        debug_assert!(z.len() >= n);

        // Bit-reversal permutation
        let mut j = 0usize;
        for i in 0..n - 1 {
            if i < j {
                z.swap(i, j);
            }
            let mut k = n / 2;
            while k <= j {
                j -= k;
                k /= 2;
            }
            j += k;
        }

        // Butterfly passes; w1 runs through the unit circle from the
        // precomputed stage seed
        for s in 0..self.log2n {
            let l2 = 1usize << s;
            let l = l2 << 1;
            let mut w1 = Complex32::new(1.0, 0.0);
            let w2 = self.ew[s as usize];
            for j in 0..l2 {
                let mut i = j;
                while i < n {
                    let k = i + l2;
                    let t = z[k] * w1;
                    z[k] = z[i] - t;
                    z[i] = z[i] + t;
                    i += l;
                }
                w1 *= w2;
            }
        }
    }

    /// Forward transform of a real frame; input shorter than N is
    /// zero-padded.
    pub fn transform_real(&self, x: &[f32], out: &mut [Complex32]) {
        let m = x.len().min(self.n);
        for i in 0..m {
            out[i] = Complex32::new(x[i], 0.0);
        }
        for i in m..self.n {
            out[i] = Complex32::new(0.0, 0.0);
        }
        self.raw_transform(out);
    }

    /// Forward transform of a complex frame; input shorter than N is
    /// zero-padded.
    pub fn transform_complex(&self, z: &[Complex32], out: &mut [Complex32]) {
        let m = z.len().min(self.n);
        out[..m].copy_from_slice(&z[..m]);
        for i in m..self.n {
            out[i] = Complex32::new(0.0, 0.0);
        }
        self.raw_transform(out);
    }

    /// Conjugate-trick inverse: `out = DFT(conj(spec))`.
    ///
    /// For a conjugate-symmetric spectrum the result is real with an extra
    /// factor of N; a true inverse is `conj(out)/N`.
    pub fn conjugate_transform(&self, spec: &[Complex32], out: &mut [Complex32]) {
        for i in 0..self.n {
            out[i] = spec[i].conj();
        }
        self.raw_transform(out);
    }

    /// Install window coefficients over the first `n2` points (zero beyond)
    pub fn set_window(&mut self, w: Window) {
        let n2 = self.n2;
        let tau = core::f32::consts::TAU;
        for n in 0..n2 {
            let x = n as f32 / (n2 - 1) as f32;
            self.win[n] = match w {
                Window::Boxcar => 1.0,
                Window::Hann => 0.5 * (1.0 - (tau * x).cos()),
                Window::Hamming => 25.0 / 46.0 - (1.0 - 25.0 / 46.0) * (tau * x).cos(),
                Window::Blackman => {
                    7938.0 / 18608.0 - 9240.0 / 18608.0 * (tau * x).cos()
                        + 1430.0 / 18608.0 * (2.0 * tau * x).cos()
                }
            };
        }
        for n in n2..self.n {
            self.win[n] = 0.0;
        }
    }

    /// Multiply a time-domain frame by the window coefficients in place
    pub fn apply_window(&self, frame: &mut [f32]) {
        for (x, w) in frame.iter_mut().zip(self.win.iter()) {
            *x *= w;
        }
    }

    /// Signed frequency of bin `k` in Hz (bins above N/2 map to negative)
    pub fn bin_to_freq(&self, k: usize) -> f32 {
        self.bin_to_fq(k) * self.sr as f32
    }

    /// Signed frequency of bin `k` in cycles per sample
    pub fn bin_to_fq(&self, k: usize) -> f32 {
        let mut fq = k as f32 / self.n as f32;
        if fq >= 0.5 {
            fq -= 1.0;
        }
        fq
    }

    /// Index of the magnitude peak of a spectrum
    pub fn peak_bin(&self, spec: &[Complex32]) -> usize {
        let mut kmax = 0;
        let mut max = 0.0f32;
        for (k, z) in spec.iter().take(self.n).enumerate() {
            let m = z.norm_sqr();
            if m > max {
                max = m;
                kmax = k;
            }
        }
        kmax
    }
}
