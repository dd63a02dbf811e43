use anyhow::{bail, Result};
use rustfft::num_complex::Complex;

use crate::bitstream::{InBits, OutBits};
use crate::dsp::{avg_power, freq_to_bin, is_pow2};
use crate::fft::{Fft, Ifft};
use crate::method::{Embedder, EmbedderVariant, Extractor, ExtractorVariant, Method};
use crate::params::Params;

// share of the frame's average power given to the marker tone
const EMBEDDING_PWR_PCT: f64 = 0.25;
// share of the marker power left at the other frequency
const OTHER_PWR_PCT: f64 = 0.001;

/// Tone insertion: one bit per frame, encoded in the power balance of two
/// frequency bins.
pub struct ToneMethod {
    frame_size: usize,
    samplerate: u32,
    freq0: u32,
    freq1: u32,
}

impl ToneMethod {
    pub fn boxed(params: &Params) -> Result<Box<dyn Method>> {
        let frame_size: usize = params.get_or("framesize", 1024)?;
        if !is_pow2(frame_size) {
            bail!("framesize must be a power of 2");
        }

        let samplerate: u32 = params.get("samplerate")?;

        let freq0: u32 = params.get_or("freq0", 1875)?;
        if freq0 > samplerate / 2 {
            bail!("freq0 must be lower than samplerate / 2");
        }
        let freq1: u32 = params.get_or("freq1", 2625)?;
        if freq1 > samplerate / 2 {
            bail!("freq1 must be lower than samplerate / 2");
        }

        Ok(Box::new(ToneMethod {
            frame_size,
            samplerate,
            freq0,
            freq1,
        }))
    }

    fn bins(&self) -> (usize, usize) {
        let n = self.frame_size;
        let fs = self.samplerate as f64;
        (
            freq_to_bin(self.freq0 as f64, fs, n),
            freq_to_bin(self.freq1 as f64, fs, n),
        )
    }
}

impl Method for ToneMethod {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant {
        let (bin0, bin1) = self.bins();
        EmbedderVariant::Float(Box::new(ToneEmbedder::new(
            input,
            self.frame_size,
            bin0,
            bin1,
        )))
    }

    fn make_extractor(&self) -> ExtractorVariant {
        let (bin0, bin1) = self.bins();
        ExtractorVariant::Float(Box::new(ToneExtractor::new(self.frame_size, bin0, bin1)))
    }

    fn capacity(&self, samples: u64) -> i64 {
        let frame = self.frame_size as u64;
        ((samples + frame - 1) / frame) as i64
    }
}

struct ToneEmbedder {
    data: Box<dyn InBits>,
    in_frame: Vec<f64>,
    out_frame: Vec<f64>,
    dft: Vec<Complex<f64>>,
    fft: Fft,
    ifft: Ifft,
    bin0: usize,
    bin1: usize,
}

impl ToneEmbedder {
    fn new(data: Box<dyn InBits>, frame_size: usize, bin0: usize, bin1: usize) -> Self {
        let fft = Fft::new(frame_size);
        let dft = vec![Complex::default(); fft.spectrum_len()];
        ToneEmbedder {
            data,
            in_frame: vec![0.0; frame_size],
            out_frame: vec![0.0; frame_size],
            dft,
            fft,
            ifft: Ifft::new(frame_size),
            bin0,
            bin1,
        }
    }
}

impl Embedder<f64> for ToneEmbedder {
    fn embed(&mut self) -> bool {
        let bit = match self.data.next_bit() {
            Some(bit) => bit,
            None => {
                self.out_frame.copy_from_slice(&self.in_frame);
                return true;
            }
        };

        let avg_pwr = avg_power(&self.in_frame);

        self.fft.exec(&mut self.in_frame, &mut self.dft);

        let phase0 = self.dft[self.bin0].arg();
        let phase1 = self.dft[self.bin1].arg();

        let pwr = avg_pwr * EMBEDDING_PWR_PCT;
        let magnitude = pwr.sqrt();
        let magnitude_other = (pwr * OTHER_PWR_PCT).sqrt();

        if bit {
            self.dft[self.bin1] = Complex::from_polar(magnitude, phase1);
            self.dft[self.bin0] = Complex::from_polar(magnitude_other, phase0);
        } else {
            self.dft[self.bin0] = Complex::from_polar(magnitude, phase0);
            self.dft[self.bin1] = Complex::from_polar(magnitude_other, phase1);
        }

        self.ifft.exec(&mut self.dft, &mut self.out_frame);
        false
    }

    fn input_mut(&mut self) -> &mut [f64] {
        &mut self.in_frame
    }

    fn output(&self) -> &[f64] {
        &self.out_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}

struct ToneExtractor {
    in_frame: Vec<f64>,
    dft: Vec<Complex<f64>>,
    fft: Fft,
    bin0: usize,
    bin1: usize,
}

impl ToneExtractor {
    fn new(frame_size: usize, bin0: usize, bin1: usize) -> Self {
        let fft = Fft::new(frame_size);
        let dft = vec![Complex::default(); fft.spectrum_len()];
        ToneExtractor {
            in_frame: vec![0.0; frame_size],
            dft,
            fft,
            bin0,
            bin1,
        }
    }
}

impl Extractor<f64> for ToneExtractor {
    fn extract(&mut self, out: &mut dyn OutBits) -> bool {
        let avg_pwr = avg_power(&self.in_frame);

        self.fft.exec(&mut self.in_frame, &mut self.dft);

        let p0 = self.dft[self.bin0].norm_sqr();
        let p1 = self.dft[self.bin1].norm_sqr();

        out.output_bit(avg_pwr / p0 > avg_pwr / p1);
        true
    }

    fn input_mut(&mut self) -> &mut [f64] {
        &mut self.in_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}
