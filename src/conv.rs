use rustfft::num_complex::Complex;

use crate::fft::{Fft, Ifft};

/// Streaming linear convolution of a frame-sized signal with an FIR kernel.
///
/// The computation happens in the frequency domain; continuity across frame
/// boundaries is kept with the overlap-add method. The kernel buffer may be
/// mutated between calls.
pub struct OverlapAdd {
    signal_len: usize,
    conv_len: usize,
    padded_len: usize,

    padded_x: Vec<f64>,
    padded_kernel: Vec<f64>,
    dft_x: Vec<Complex<f64>>,
    dft_kernel: Vec<Complex<f64>>,

    // overlap-add history, kernel_len - 1 samples
    olap: Vec<f64>,

    fft: Fft,
    ifft: Ifft,
}

impl OverlapAdd {
    pub fn new(signal_len: usize, kernel_len: usize) -> Self {
        let conv_len = signal_len + kernel_len - 1;
        let padded_len = conv_len.next_power_of_two();
        let fft = Fft::new(padded_len);
        let bins = fft.spectrum_len();
        OverlapAdd {
            signal_len,
            conv_len,
            padded_len,
            padded_x: vec![0.0; padded_len],
            padded_kernel: vec![0.0; padded_len],
            dft_x: vec![Complex::default(); bins],
            dft_kernel: vec![Complex::default(); bins],
            olap: vec![0.0; kernel_len - 1],
            fft,
            ifft: Ifft::new(padded_len),
        }
    }

    /// Required length of the output buffer passed to [`exec`](Self::exec).
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    /// Convolve one frame.
    ///
    /// `out` must hold `padded_len()` samples. On return its first
    /// `signal_len` slots hold the convolution stream, consistent with the
    /// frames passed to earlier calls; the remaining slots are scratch.
    pub fn exec(&mut self, x: &[f64], kernel: &[f64], out: &mut [f64]) {
        debug_assert_eq!(x.len(), self.signal_len);
        debug_assert_eq!(kernel.len(), self.olap.len() + 1);

        // the forward transform scratches its input, so the zero padding
        // has to be refreshed every call
        self.padded_x[..x.len()].copy_from_slice(x);
        self.padded_x[x.len()..].fill(0.0);
        self.padded_kernel[..kernel.len()].copy_from_slice(kernel);
        self.padded_kernel[kernel.len()..].fill(0.0);

        self.fft.exec(&mut self.padded_x, &mut self.dft_x);
        self.fft.exec(&mut self.padded_kernel, &mut self.dft_kernel);

        // the convolution, reusing the kernel spectrum for the product
        for (k, x) in self.dft_kernel.iter_mut().zip(&self.dft_x) {
            *k *= *x;
        }

        self.ifft.exec(&mut self.dft_kernel, out);

        // overlap add from the previous frame
        for (o, h) in out.iter_mut().zip(&self.olap) {
            *o += *h;
        }

        // save the tail as the overlap for the next frame
        self.olap
            .copy_from_slice(&out[self.signal_len..self.conv_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_convolution(x: &[f64], h: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; x.len() + h.len() - 1];
        for (i, &xi) in x.iter().enumerate() {
            for (j, &hj) in h.iter().enumerate() {
                out[i + j] += xi * hj;
            }
        }
        out
    }

    #[test]
    fn matches_direct_convolution_across_frames() {
        let frame = 64;
        let kernel = [0.5, 0.0, 0.0, -0.25, 0.0, 1.0];
        let signal: Vec<f64> = (0..3 * frame)
            .map(|i| ((i * 2654435761usize) % 1000) as f64 / 1000.0 - 0.5)
            .collect();
        let expected = direct_convolution(&signal, &kernel);

        let mut conv = OverlapAdd::new(frame, kernel.len());
        let mut out = vec![0.0; conv.padded_len()];
        let mut streamed = Vec::new();
        for chunk in signal.chunks(frame) {
            conv.exec(chunk, &kernel, &mut out);
            streamed.extend_from_slice(&out[..frame]);
        }

        for (a, b) in expected.iter().zip(&streamed) {
            assert!((a - b).abs() < 1e-9, "{a} != {b}");
        }
    }

    #[test]
    fn delayed_impulse_shifts_the_signal() {
        let frame = 32;
        let delay = 5;
        let mut kernel = vec![0.0; delay];
        kernel[delay - 1] = 1.0;

        let signal: Vec<f64> = (0..frame).map(|i| i as f64).collect();
        let mut conv = OverlapAdd::new(frame, kernel.len());
        let mut out = vec![0.0; conv.padded_len()];
        conv.exec(&signal, &kernel, &mut out);

        for i in delay - 1..frame {
            assert!((out[i] - signal[i - (delay - 1)]).abs() < 1e-9);
        }
    }
}
