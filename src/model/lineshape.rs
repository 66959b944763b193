//! Lineshapes and small numeric helpers used by the models.

use std::f64::consts::PI;

/// Boltzmann constant in meV/K.
pub const KB_MEV: f64 = 0.086_173_332_6;

/// Factor converting a half width at half maximum into a Gaussian sigma.
pub const HWHM2SIGMA: f64 = 0.849_321_800_288_019_1; // 1 / sqrt(2 ln 2)

/// Below this magnitude an excitation energy counts as zero.
pub const ENERGY_EPS: f64 = 1e-8;

/// Unnormalised Gaussian: `amp * exp(-(x-x0)^2 / 2 sigma^2) + offs`.
#[inline]
pub fn gauss(x: f64, x0: f64, sigma: f64, amp: f64, offs: f64) -> f64 {
    if sigma == 0.0 {
        return if x == x0 { amp + offs } else { offs };
    }
    let t = (x - x0) / sigma;
    amp * (-0.5 * t * t).exp() + offs
}

/// Normalised Lorentzian with half width `hwhm`.
#[inline]
pub fn lorentz(x: f64, hwhm: f64) -> f64 {
    hwhm / (PI * (x * x + hwhm * hwhm))
}

/// Damped harmonic oscillator response at energy transfer `e`.
///
/// Stokes peak at `+e0` and anti-Stokes peak at `-e0`, the latter weighted by
/// detailed balance at temperature `t`. The sum is renormalised so that the
/// Stokes side keeps weight `amp`; at `e0 == 0` both peaks coincide and the
/// result is a single Lorentzian of height `amp / (pi * hwhm)`.
pub fn dho(e: f64, t: f64, e0: f64, hwhm: f64, amp: f64) -> f64 {
    if hwhm <= 0.0 {
        return 0.0;
    }
    let balance = if e0.abs() <= ENERGY_EPS {
        1.0
    } else if t <= 0.0 {
        0.0
    } else {
        (-e0.abs() / (KB_MEV * t)).exp()
    };
    let e0 = e0.abs();
    let stokes = lorentz(e - e0, hwhm);
    let anti = lorentz(e + e0, hwhm);
    amp * (stokes + balance * anti) / (1.0 + balance)
}

/// Coherent response of one sampled excitation: a DHO in energy around
/// `e0` times a Gaussian in the q distance to the sample, scaled by `s`.
#[allow(clippy::too_many_arguments)]
pub fn excitation(e: f64, t: f64, e0: f64, e_hwhm: f64, q_dist: f64, q_hwhm: f64, s: f64) -> f64 {
    s * dho(e, t, e0, e_hwhm, 1.0).abs() * gauss(q_dist, 0.0, q_hwhm * HWHM2SIGMA, 1.0, 0.0)
}

/// Incoherent elastic background, zero when `amp` is zero.
#[inline]
pub fn incoherent(e: f64, amp: f64, sigma: f64) -> f64 {
    if amp == 0.0 {
        0.0
    } else {
        gauss(e, 0.0, sigma, amp, 0.0)
    }
}

#[inline]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
