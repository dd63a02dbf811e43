use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

/// Forward real-to-complex DFT of a fixed length.
///
/// The plan is built once and reused on every call. Buffers are borrowed per
/// call so a single frame buffer can feed several transforms. The transform
/// length is fixed at construction; passing buffers of any other length is a
/// programming error.
pub struct Fft {
    len: usize,
    plan: Arc<dyn RealToComplex<f64>>,
}

impl Fft {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        Fft {
            len,
            plan: planner.plan_fft_forward(len),
        }
    }

    /// Number of complex bins produced: N/2 + 1.
    pub fn spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Transform `frame` into `spectrum`.
    ///
    /// The frame buffer is used as scratch space and holds garbage afterwards.
    pub fn exec(&self, frame: &mut [f64], spectrum: &mut [Complex<f64>]) {
        self.plan
            .process(frame, spectrum)
            .expect("forward transform length mismatch");
    }
}

/// Inverse complex-to-real DFT of a fixed length.
///
/// The underlying transform is unnormalized; `exec` divides every output
/// sample by N. Bins 0 and N/2 of a real spectrum carry no phase, their
/// imaginary parts are forced to zero before transforming.
pub struct Ifft {
    len: usize,
    plan: Arc<dyn ComplexToReal<f64>>,
}

impl Ifft {
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        Ifft {
            len,
            plan: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Transform `spectrum` back into `frame`, normalizing by 1/N.
    ///
    /// The spectrum buffer is used as scratch space and holds garbage
    /// afterwards.
    pub fn exec(&self, spectrum: &mut [Complex<f64>], frame: &mut [f64]) {
        spectrum[0].im = 0.0;
        if self.len % 2 == 0 {
            let nyquist = spectrum.len() - 1;
            spectrum[nyquist].im = 0.0;
        }
        self.plan
            .process(spectrum, frame)
            .expect("inverse transform length mismatch");

        let scale = 1.0 / self.len as f64;
        for s in frame.iter_mut() {
            *s *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn sine_peaks_at_its_bin() {
        let n = 256;
        let fft = Fft::new(n);
        let mut frame: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 16.0 * i as f64 / n as f64).sin())
            .collect();
        let mut spectrum = vec![Complex::default(); fft.spectrum_len()];
        fft.exec(&mut frame, &mut spectrum);

        let peak = (0..spectrum.len())
            .max_by(|&a, &b| spectrum[a].norm().partial_cmp(&spectrum[b].norm()).unwrap())
            .unwrap();
        assert_eq!(peak, 16);
        // a full-scale sine carries N/2 in its bin
        assert!((spectrum[16].norm() - n as f64 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn forward_inverse_roundtrip() {
        let n = 128;
        let fft = Fft::new(n);
        let ifft = Ifft::new(n);
        let original: Vec<f64> = (0..n).map(|i| ((i * 7919) % 101) as f64 / 101.0 - 0.5).collect();

        let mut frame = original.clone();
        let mut spectrum = vec![Complex::default(); fft.spectrum_len()];
        fft.exec(&mut frame, &mut spectrum);

        let mut rebuilt = vec![0.0; n];
        ifft.exec(&mut spectrum, &mut rebuilt);
        for (a, b) in original.iter().zip(&rebuilt) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
