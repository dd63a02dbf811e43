use std::f64::consts::PI;

use anyhow::{bail, Result};
use rustfft::num_complex::Complex;

use crate::bitstream::{InBits, OutBits};
use crate::dsp::{amplitude, angle, freq_to_bin, is_pow2, polar_to_cartesian};
use crate::fft::{Fft, Ifft};
use crate::method::{Embedder, EmbedderVariant, Extractor, ExtractorVariant, Method};
use crate::params::Params;

// number of quantization steps per half turn
const MODULE: u32 = 12;
const STEP: f64 = PI / MODULE as f64;

// the band carrying the payload
const FREQ_FROM: f64 = 1000.0;
const FREQ_TO: f64 = 8000.0;

/// Phase coding: the payload is quantized into the phases of the first
/// frame's DFT band; later frames are phase shifted to keep the relative
/// phases, and with them the waveform, consistent.
pub struct PhaseMethod {
    frame_size: usize,
    bin_from: usize,
    bin_to: usize,
}

impl PhaseMethod {
    pub fn boxed(params: &Params) -> Result<Box<dyn Method>> {
        let frame_size: usize = params.get_or("framesize", 1024)?;
        if !is_pow2(frame_size) {
            bail!("framesize must be a power of 2");
        }

        let samplerate: u32 = params.get("samplerate")?;

        let bin_from = freq_to_bin(FREQ_FROM, samplerate as f64, frame_size);
        // the band is clipped at the Nyquist bin
        let bin_to = freq_to_bin(FREQ_TO, samplerate as f64, frame_size).min(frame_size / 2);
        if bin_from >= bin_to {
            bail!("the embedding band is empty at samplerate {samplerate}");
        }

        Ok(Box::new(PhaseMethod {
            frame_size,
            bin_from,
            bin_to,
        }))
    }
}

impl Method for PhaseMethod {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant {
        EmbedderVariant::Float(Box::new(PhaseEmbedder::new(
            input,
            self.frame_size,
            self.bin_from,
            self.bin_to,
        )))
    }

    fn make_extractor(&self) -> ExtractorVariant {
        ExtractorVariant::Float(Box::new(PhaseExtractor::new(
            self.frame_size,
            self.bin_from,
            self.bin_to,
        )))
    }

    fn capacity(&self, _samples: u64) -> i64 {
        (self.bin_to - self.bin_from) as i64
    }
}

struct PhaseEmbedder {
    data: Box<dyn InBits>,
    bin_from: usize,
    bin_to: usize,
    frame: usize,
    // bins modified beyond bin_from in the first frame
    encoded: usize,

    in_frame: Vec<f64>,
    out_frame: Vec<f64>,

    amps: Vec<f64>,
    phases: Vec<f64>,
    phases_prev: Vec<f64>,
    backup: Vec<f64>,
    diff: Vec<f64>,

    dft: Vec<Complex<f64>>,
    fft: Fft,
    ifft: Ifft,
}

impl PhaseEmbedder {
    fn new(data: Box<dyn InBits>, frame_size: usize, bin_from: usize, bin_to: usize) -> Self {
        let fft = Fft::new(frame_size);
        let bins = fft.spectrum_len();
        PhaseEmbedder {
            data,
            bin_from,
            bin_to,
            frame: 0,
            encoded: 0,
            in_frame: vec![0.0; frame_size],
            out_frame: vec![0.0; frame_size],
            amps: vec![0.0; bins],
            phases: vec![0.0; bins],
            phases_prev: vec![0.0; bins],
            backup: vec![0.0; bins],
            diff: vec![0.0; bins],
            dft: vec![Complex::default(); bins],
            fft,
            ifft: Ifft::new(frame_size),
        }
    }

    /// Quantize payload bits into the first frame's phases.
    ///
    /// A 1 lands on a multiple of STEP, a 0 halfway between two multiples.
    /// Returns the number of bins actually modified.
    fn encode_first_frame(&mut self) -> usize {
        let mut i = self.bin_from;
        while i < self.bin_to {
            let bit = match self.data.next_bit() {
                Some(bit) => bit,
                None => break,
            };

            let phase = self.phases[i];
            if phase > 0.0 {
                self.phases[i] = if bit {
                    (phase / STEP).ceil() * STEP
                } else {
                    (phase / STEP).floor() * STEP + STEP / 2.0
                };
            } else if phase < 0.0 {
                self.phases[i] = if bit {
                    (phase / STEP).floor() * STEP
                } else {
                    (phase / STEP).ceil() * STEP - STEP / 2.0
                };
            }

            // zero is not a code point, move to the nearest one
            if self.phases[i] == 0.0 {
                self.phases[i] = if bit {
                    (2.0 * MODULE as f64 - 1.0) * (STEP / 2.0)
                } else {
                    STEP / 2.0
                };
            }

            i += 1;
        }
        i - self.bin_from
    }
}

impl Embedder<f64> for PhaseEmbedder {
    fn embed(&mut self) -> bool {
        self.fft.exec(&mut self.in_frame, &mut self.dft);
        amplitude(&self.dft, &mut self.amps);
        angle(&self.dft, &mut self.phases);

        if self.frame == 0 {
            self.backup.copy_from_slice(&self.phases);
            self.encoded = self.encode_first_frame();
            self.phases_prev.copy_from_slice(&self.phases);
        } else {
            // shift the touched bins by this frame's natural phase advance
            for i in 0..self.diff.len() {
                self.diff[i] = self.phases[i] - self.backup[i];
            }
            self.backup.copy_from_slice(&self.phases);
            for i in self.bin_from..self.bin_from + self.encoded {
                self.phases[i] = self.phases_prev[i] + self.diff[i];
            }
            self.phases_prev.copy_from_slice(&self.phases);
        }

        polar_to_cartesian(&mut self.dft, &self.amps, &self.phases);
        self.ifft.exec(&mut self.dft, &mut self.out_frame);

        self.frame += 1;
        // every remaining frame needs the phase shift
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

struct PhaseExtractor {
    bin_from: usize,
    bin_to: usize,
    in_frame: Vec<f64>,
    phases: Vec<f64>,
    dft: Vec<Complex<f64>>,
    fft: Fft,
}

impl PhaseExtractor {
    fn new(frame_size: usize, bin_from: usize, bin_to: usize) -> Self {
        let fft = Fft::new(frame_size);
        let bins = fft.spectrum_len();
        PhaseExtractor {
            bin_from,
            bin_to,
            in_frame: vec![0.0; frame_size],
            phases: vec![0.0; bins],
            dft: vec![Complex::default(); bins],
            fft,
        }
    }
}

impl Extractor<f64> for PhaseExtractor {
    fn extract(&mut self, out: &mut dyn OutBits) -> bool {
        self.fft.exec(&mut self.in_frame, &mut self.dft);
        angle(&self.dft, &mut self.phases);

        for i in self.bin_from..self.bin_to {
            let module = (self.phases[i] / (STEP / 2.0)).round() as i64;
            out.output_bit(module % 2 == 0);
        }

        // the whole payload lives in the first frame
        false
    }

    fn input_mut(&mut self) -> &mut [f64] {
        &mut self.in_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}
