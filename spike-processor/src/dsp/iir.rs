//! Butterworth IIR filters of arbitrary order.
//!
//! Design runs once at construction: analog prototype poles, frequency
//! transform (lowpass/highpass/bandpass), bilinear transform, polynomial
//! expansion to real transfer-function coefficients. The per-sample
//! application uses two modular-index rings (past inputs, past outputs).

use std::f64::consts::PI;

use num_complex::Complex64;

use spike_core::config::FilterType;

use crate::error::ProcessorError;

type C = Complex64;

/// Zeros, poles and gain of a filter under construction.
struct Zpk {
    z: Vec<C>,
    p: Vec<C>,
    k: f64,
}

impl Zpk {
    fn degree(&self) -> usize {
        self.p.len() - self.z.len()
    }
}

/// Analog Butterworth prototype: `order` poles on the left-half unit
/// circle, no zeros, unit gain.
fn prototype(order: usize) -> Zpk {
    let p = (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            C::from_polar(1.0, theta)
        })
        .collect();
    Zpk {
        z: Vec::new(),
        p,
        k: 1.0,
    }
}

fn lp2lp(mut zpk: Zpk, wo: f64) -> Zpk {
    let degree = zpk.degree();
    for z in &mut zpk.z {
        *z *= wo;
    }
    for p in &mut zpk.p {
        *p *= wo;
    }
    zpk.k *= wo.powi(degree as i32);
    zpk
}

fn lp2hp(zpk: Zpk, wo: f64) -> Zpk {
    let degree = zpk.degree();
    let num: C = zpk.z.iter().map(|z| -*z).product();
    let den: C = zpk.p.iter().map(|p| -*p).product();
    let mut z: Vec<C> = zpk.z.iter().map(|z| C::new(wo, 0.0) / *z).collect();
    let p: Vec<C> = zpk.p.iter().map(|p| C::new(wo, 0.0) / *p).collect();
    z.extend(std::iter::repeat(C::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p,
        k: zpk.k * (num / den).re,
    }
}

fn lp2bp(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = zpk.degree();
    let split = |roots: &[C]| -> Vec<C> {
        let mut out = Vec::with_capacity(roots.len() * 2);
        for r in roots {
            let scaled = *r * (bw / 2.0);
            let disc = (scaled * scaled - C::new(wo * wo, 0.0)).sqrt();
            out.push(scaled + disc);
            out.push(scaled - disc);
        }
        out
    };
    let mut z = split(&zpk.z);
    let p = split(&zpk.p);
    z.extend(std::iter::repeat(C::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p,
        k: zpk.k * bw.powi(degree as i32),
    }
}

/// Map the analog design onto the unit circle (Tustin), internal rate 2 Hz.
fn bilinear(zpk: Zpk, fs: f64) -> Zpk {
    let degree = zpk.degree();
    let fs2 = C::new(2.0 * fs, 0.0);
    let num: C = zpk.z.iter().map(|z| fs2 - *z).product();
    let den: C = zpk.p.iter().map(|p| fs2 - *p).product();
    let mut z: Vec<C> = zpk.z.iter().map(|z| (fs2 + *z) / (fs2 - *z)).collect();
    let p: Vec<C> = zpk.p.iter().map(|p| (fs2 + *p) / (fs2 - *p)).collect();
    z.extend(std::iter::repeat(C::new(-1.0, 0.0)).take(degree));
    Zpk {
        z,
        p,
        k: zpk.k * (num / den).re,
    }
}

/// Expand a monic polynomial from its roots, ascending powers of z^-1.
fn poly(roots: &[C]) -> Vec<C> {
    let mut coeffs = vec![C::new(1.0, 0.0)];
    for r in roots {
        let mut next = vec![C::new(0.0, 0.0); coeffs.len() + 1];
        for (i, c) in coeffs.iter().enumerate() {
            next[i] += *c;
            next[i + 1] -= *c * *r;
        }
        coeffs = next;
    }
    coeffs
}

/// Design digital Butterworth transfer-function coefficients `(b, a)` for
/// the given response type. Cutoffs in Hz.
pub fn butter_design(
    order: usize,
    sampling_rate: f64,
    filter_type: FilterType,
    lowcut: f64,
    highcut: f64,
) -> Result<(Vec<f64>, Vec<f64>), ProcessorError> {
    // Internal resampling convention: design against fs = 2 Hz with
    // pre-warped analog cutoffs, as the bilinear transform expects.
    let fs = 2.0;
    let warp = |hz: f64| 2.0 * fs * (PI * hz / sampling_rate).tan();

    let analog = match filter_type {
        FilterType::Lowpass => lp2lp(prototype(order), warp(lowcut)),
        FilterType::Highpass => lp2hp(prototype(order), warp(highcut)),
        FilterType::Bandpass => {
            let (w1, w2) = (warp(lowcut), warp(highcut));
            lp2bp(prototype(order), (w1 * w2).sqrt(), w2 - w1)
        }
    };
    let digital = bilinear(analog, fs);

    let b: Vec<f64> = poly(&digital.z).iter().map(|c| c.re * digital.k).collect();
    let a: Vec<f64> = poly(&digital.p).iter().map(|c| c.re).collect();

    if a[0].abs() < 1e-12 {
        return Err(ProcessorError::Numeric(
            "IIR design produced a zero leading denominator coefficient".into(),
        ));
    }
    Ok((b, a))
}

/// General IIR filter state: coefficient vectors plus rings of past inputs
/// and outputs.
#[derive(Debug, Clone)]
pub struct IirFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
    xi: usize,
    yi: usize,
}

impl IirFilter {
    /// Build from explicit coefficients. A zero `a[0]` is a numeric error.
    pub fn new(b: Vec<f64>, a: Vec<f64>) -> Result<Self, ProcessorError> {
        if a.is_empty() || a[0].abs() < 1e-12 {
            return Err(ProcessorError::Numeric(
                "denominator coefficient a[0] must be non-zero".into(),
            ));
        }
        Ok(Self {
            x: vec![0.0; b.len()],
            y: vec![0.0; a.len()],
            b,
            a,
            xi: 0,
            yi: 0,
        })
    }

    /// Design and build a Butterworth filter.
    pub fn design(
        order: usize,
        sampling_rate: f64,
        filter_type: FilterType,
        lowcut: f64,
        highcut: f64,
    ) -> Result<Self, ProcessorError> {
        let (b, a) = butter_design(order, sampling_rate, filter_type, lowcut, highcut)?;
        Self::new(b, a)
    }

    pub fn coefficients(&self) -> (&[f64], &[f64]) {
        (&self.b, &self.a)
    }

    /// Process one sample.
    #[inline]
    pub fn step(&mut self, input: f64) -> f64 {
        let xlen = self.x.len();
        let ylen = self.y.len();
        self.x[self.xi] = input;

        let mut acc = 0.0;
        for (i, b) in self.b.iter().enumerate() {
            acc += b * self.x[(self.xi + xlen - i) % xlen];
        }
        for (i, a) in self.a.iter().enumerate().skip(1) {
            acc -= a * self.y[(self.yi + ylen - i) % ylen];
        }
        acc /= self.a[0];

        self.y[self.yi] = acc;
        self.xi = (self.xi + 1) % xlen;
        self.yi = (self.yi + 1) % ylen;
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// |H(e^{jw})| from transfer-function coefficients.
    fn magnitude(b: &[f64], a: &[f64], w: f64) -> f64 {
        let zinv = C::from_polar(1.0, -w);
        let eval = |coeffs: &[f64]| -> C {
            let mut acc = C::new(0.0, 0.0);
            let mut zp = C::new(1.0, 0.0);
            for &c in coeffs {
                acc += zp * c;
                zp *= zinv;
            }
            acc
        };
        (eval(b) / eval(a)).norm()
    }

    #[test]
    fn denominator_is_monic() {
        let (_, a) = butter_design(4, 1000.0, FilterType::Lowpass, 100.0, 0.0).unwrap();
        assert!((a[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lowpass_response() {
        let (b, a) = butter_design(4, 1000.0, FilterType::Lowpass, 100.0, 0.0).unwrap();
        assert_eq!(b.len(), 5);
        assert_eq!(a.len(), 5);
        assert!((magnitude(&b, &a, 0.0) - 1.0).abs() < 1e-9, "DC gain");
        assert!(magnitude(&b, &a, PI) < 1e-6, "Nyquist gain");
        // -3 dB at the cutoff, the Butterworth signature.
        let wc = 2.0 * PI * 100.0 / 1000.0;
        let g = magnitude(&b, &a, wc);
        assert!((g - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6, "cutoff gain {}", g);
    }

    #[test]
    fn highpass_response() {
        let (b, a) = butter_design(3, 1000.0, FilterType::Highpass, 0.0, 200.0).unwrap();
        assert!(magnitude(&b, &a, 0.0) < 1e-9, "DC gain");
        assert!((magnitude(&b, &a, PI) - 1.0).abs() < 1e-9, "Nyquist gain");
    }

    #[test]
    fn bandpass_response() {
        let (b, a) = butter_design(2, 30_000.0, FilterType::Bandpass, 300.0, 3000.0).unwrap();
        // Order-2 prototype doubles: 5 coefficients each.
        assert_eq!(b.len(), 5);
        assert_eq!(a.len(), 5);
        assert!(magnitude(&b, &a, 0.0) < 1e-9, "DC gain");
        assert!(magnitude(&b, &a, PI) < 1e-9, "Nyquist gain");

        // Unity at the design center (geometric mean in the warped domain).
        let warp = |hz: f64| 4.0 * (PI * hz / 30_000.0).tan();
        let w0 = 2.0 * ((warp(300.0) * warp(3000.0)).sqrt() / 4.0).atan();
        let g = magnitude(&b, &a, w0);
        assert!((g - 1.0).abs() < 1e-9, "center gain {}", g);
    }

    #[test]
    fn step_tracks_designed_response() {
        let mut f = IirFilter::design(4, 1000.0, FilterType::Lowpass, 100.0, 0.0).unwrap();
        let mut last = 0.0;
        for _ in 0..5000 {
            last = f.step(1.0);
        }
        assert!((last - 1.0).abs() < 1e-6, "settled DC output {}", last);
    }

    #[test]
    fn zero_a0_is_a_numeric_error() {
        let err = IirFilter::new(vec![1.0, 0.5], vec![0.0, 1.0]).unwrap_err();
        assert!(matches!(err, ProcessorError::Numeric(_)));
    }

    #[test]
    fn filter_is_linear() {
        let mk = || IirFilter::design(2, 30_000.0, FilterType::Bandpass, 300.0, 3000.0).unwrap();
        let (mut fa, mut fb, mut fc) = (mk(), mk(), mk());
        let (alpha, beta) = (1.5, 2.25);
        for n in 0..1000 {
            let x = (n as f64 * 0.17).sin();
            let y = (n as f64 * 0.31).cos();
            let lhs = fc.step(alpha * x + beta * y);
            let rhs = alpha * fa.step(x) + beta * fb.step(y);
            assert!((lhs - rhs).abs() < 1e-9);
        }
    }
}
