//! Gaussian FM pulse shaping and matched-filter template compilation
//!
//! The header bit pattern is rendered once into a time-domain waveform with
//! Gaussian pulse shaping (including the inter-symbol tails of both
//! neighbors) and normalized to unit energy. Correlating against the
//! time-reversed copy of that template is the matched filter of the header.

use bitvec::prelude::*;

const SQRT2: f64 = core::f64::consts::SQRT_2;

/// Gaussian tail integral: `Q(x) = 0.5 - 0.5 * erf(x / sqrt(2))`
fn q(x: f64) -> f64 {
    0.5 - 0.5 * libm::erf(x / SQRT2)
}

/// Gaussian FM pulse at time `t` (in symbol periods, 0 at the symbol center)
pub fn gauss_pulse(t: f64, sigma: f64) -> f64 {
    q((t - 0.5) / sigma) - q((t + 0.5) / sigma)
}

/// Pulse width parameter for a bandwidth-time product:
/// `sigma = sqrt(ln 2) / (2*pi*BT)`
pub fn sigma_for_bt(bt: f64) -> f64 {
    (2.0f64.ln()).sqrt() / (core::f64::consts::TAU * bt)
}

/// Render a bit sequence to a pulse-shaped baseband waveform.
///
/// Bit `1` maps to +1, bit `0` to -1; each output sample sums the pulse of
/// its own symbol and the tails of the two neighboring symbols. Output
/// length is `floor(bits * sps + 0.5)` samples.
pub fn waveform(bits: &BitSlice<u8, Msb0>, sps: f64, bt: f64) -> Vec<f32> {
    let sigma = sigma_for_bt(bt);
    let len = (bits.len() as f64 * sps + 0.5) as usize;
    let mut wave = vec![0.0f32; len];

    for i in 0..len {
        let pos = ((i as f64 / sps) as usize).min(bits.len() - 1);
        let t = (i as f64 - pos as f64 * sps) / sps - 0.5;

        let b1 = if bits[pos] { 1.0 } else { -1.0 };
        let mut b = b1 * gauss_pulse(t, sigma);

        if pos > 0 {
            let b0 = if bits[pos - 1] { 1.0 } else { -1.0 };
            b += b0 * gauss_pulse(t + 1.0, sigma);
        }
        if pos < bits.len() - 1 {
            let b2 = if bits[pos + 1] { 1.0 } else { -1.0 };
            b += b2 * gauss_pulse(t - 1.0, sigma);
        }

        wave[i] = b as f32;
    }

    wave
}

/// Compile the header bit pattern into a unit-energy matched-filter
/// template of `floor(hdrlen * sps + 0.5)` samples.
pub fn matched_filter(hdr: &BitSlice<u8, Msb0>, sps: f64, bt: f64) -> Vec<f32> {
    let mut template = waveform(hdr, sps, bt);

    let norm = template
        .iter()
        .map(|&x| x as f64 * x as f64)
        .sum::<f64>()
        .sqrt();
    for x in template.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }

    template
}

/// Parse a header pattern of '0'/'1' characters into a bit vector
pub fn parse_bits(pattern: &str) -> Option<BitVec<u8, Msb0>> {
    let mut bits = BitVec::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '0' => bits.push(false),
            '1' => bits.push(true),
            _ => return None,
        }
    }
    Some(bits)
}
