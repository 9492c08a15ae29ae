//! Windowed-sinc low-pass design and circular convolution
//!
//! Coefficient sets are Blackman-windowed sinc kernels, normalized to unit
//! DC gain and duplicated into a double-length buffer so the per-sample
//! convolution over a circular ring never takes a modulo in the inner loop.

use num::complex::{Complex32, Complex64};

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (core::f64::consts::PI * x).sin() / (core::f64::consts::PI * x)
    }
}

/// Design a low-pass filter with cutoff `f` (fraction of the sample rate)
/// and roughly `taps` coefficients.
///
/// The tap count is forced odd so the kernel is symmetric (linear phase).
/// Returns the actual tap count and a `2*taps` coefficient buffer whose
/// second half repeats the first (`ws[taps + n] == ws[n]`), which lets the
/// circular convolution index `ws[taps + s - n]` without wrapping.
///
/// Invariants: `sum(ws[..taps]) == 1.0` and `ws[n] == ws[taps-1-n]`.
pub fn lowpass_coeffs(f: f64, taps: usize) -> (usize, Vec<f32>) {
    let mut taps = taps;
    if taps % 2 == 0 {
        taps += 1;
    }
    if taps < 1 {
        taps = 1;
    }

    let mut ws = vec![0.0f32; 2 * taps];
    let mut norm = 0.0f64;
    let tau = core::f64::consts::TAU;

    for n in 0..taps {
        let x = n as f64 / (taps - 1).max(1) as f64;
        let w = 7938.0 / 18608.0 - 9240.0 / 18608.0 * (tau * x).cos()
            + 1430.0 / 18608.0 * (2.0 * tau * x).cos(); // Blackman
        let h = 2.0 * f * sinc(2.0 * f * (n as f64 - (taps - 1) as f64 / 2.0));
        ws[n] = (w * h) as f32;
        norm += ws[n] as f64;
    }
    for n in 0..taps {
        ws[n] = (ws[n] as f64 / norm) as f32;
    }
    for n in 0..taps {
        ws[taps + n] = ws[n];
    }

    (taps, ws)
}

/// Circular convolution of a complex ring with a symmetric kernel.
///
/// `sample` is the running index of the most recent write into `buf`
/// (`buf[sample % taps]`). The loop is split at the wrap point instead of
/// taking `% taps` per tap; the kernel symmetry `ws[n] == ws[taps-1-n]`
/// makes the ascending read order equivalent to the time-reversed one.
pub fn lowpass_complex(buf: &[Complex32], sample: i64, taps: usize, ws: &[f32]) -> Complex32 {
    let s = sample.rem_euclid(taps as i64) as usize;
    let mut w = Complex64::new(0.0, 0.0);
    let n0 = taps - 1 - s;
    for n in 0..n0 {
        let b = buf[s + 1 + n];
        w += Complex64::new(b.re as f64, b.im as f64) * ws[n] as f64;
    }
    for n in n0..taps {
        let b = buf[s + 1 + n - taps];
        w += Complex64::new(b.re as f64, b.im as f64) * ws[n] as f64;
    }
    Complex32::new(w.re as f32, w.im as f32)
}

/// Circular convolution of a real ring, using the duplicated kernel half to
/// avoid index wrapping (`ws[taps + s - n] == ws[(taps + sample - n) % taps]`).
pub fn lowpass_real(buf: &[f32], sample: i64, taps: usize, ws: &[f32]) -> f32 {
    let s = sample.rem_euclid(taps as i64) as usize;
    let mut w = 0.0f64;
    for n in 0..taps {
        w += buf[n] as f64 * ws[taps + s - n] as f64;
    }
    w as f32
}
