use rustfft::num_complex::Complex;

use crate::fft::{Fft, Ifft};

/// Real cepstrum of a signal's autocorrelation.
///
/// Echoes hidden at delay d show up as a peak near index d - 1 of the
/// output.
pub struct Autocepstrum {
    input_len: usize,
    padded_len: usize,

    padded: Vec<f64>,
    dft: Vec<Complex<f64>>,

    fft: Fft,
    ifft: Ifft,
}

impl Autocepstrum {
    pub fn new(input_len: usize) -> Self {
        // pad with zeroes to avoid circular convolution
        let padded_len = (2 * input_len - 1).next_power_of_two();
        let fft = Fft::new(padded_len);
        let bins = fft.spectrum_len();
        Autocepstrum {
            input_len,
            padded_len,
            padded: vec![0.0; padded_len],
            dft: vec![Complex::default(); bins],
            fft,
            ifft: Ifft::new(padded_len),
        }
    }

    /// Required length of the output buffer passed to [`exec`](Self::exec).
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn exec(&mut self, input: &[f64], out: &mut [f64]) {
        debug_assert_eq!(input.len(), self.input_len);

        // the forward transform scratches its input, refresh the padding too
        self.padded[..input.len()].copy_from_slice(input);
        self.padded[input.len()..].fill(0.0);
        self.fft.exec(&mut self.padded, &mut self.dft);

        for x in self.dft.iter_mut() {
            // autocorrelation in the frequency domain: X * conj(X)
            let power = x.norm_sqr();
            // cepstrum: complex log of the (real, non-negative) power
            *x = Complex::new(power.ln(), 0.0);
        }

        self.ifft.exec(&mut self.dft, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_delay_shows_as_peak() {
        let len = 1024;
        let delay = 100;
        let amp = 0.6;

        // white noise plus a delayed copy of itself
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        let base: Vec<f64> = (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut signal = base.clone();
        for i in delay..len {
            signal[i] += amp * base[i - delay];
        }

        let mut cepstrum = Autocepstrum::new(len);
        let mut out = vec![0.0; cepstrum.padded_len()];
        cepstrum.exec(&signal, &mut out);

        // the cepstral coefficient at the echo lag dominates its neighborhood
        let peak = out[delay];
        for offset in 20..80 {
            assert!(peak > out[delay + offset]);
            assert!(peak > out[delay - offset]);
        }
    }
}
