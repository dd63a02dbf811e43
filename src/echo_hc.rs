use std::f64::consts::PI;

use anyhow::{bail, Result};
use log::debug;

use crate::bitstream::{InBits, OutBits};
use crate::cepstrum::Autocepstrum;
use crate::conv::OverlapAdd;
use crate::dsp::is_pow2;
use crate::method::{Embedder, EmbedderVariant, Extractor, ExtractorVariant, Method};
use crate::params::Params;

const N_ECHOES: usize = 4;
// share of the frame tapered in and out by the mixer
const SMOOTHING_PCT: f64 = 0.25;

/// High-capacity echo hiding: four bits per frame, two in the position of a
/// positive echo and two in the position of a negative one.
pub struct EchoHcMethod {
    frame_size: usize,
    interval: usize,
    amp: f64,
    smoothing: bool,
}

impl EchoHcMethod {
    pub fn boxed(params: &Params) -> Result<Box<dyn Method>> {
        let frame_size: usize = params.get_or("framesize", 4096)?;
        if !is_pow2(frame_size) {
            bail!("framesize must be a power of 2");
        }

        let amp: f64 = params.get_or("amp", 0.4)?;
        if amp <= 0.0 {
            bail!("amp must be positive");
        }

        let interval: usize = params.get_or("interval", 50)?;
        if interval == 0 {
            bail!("echo interval must be positive");
        }
        if frame_size < interval * 10 {
            bail!("echo interval must be smaller than {}", frame_size / 10);
        }

        let smoothing = params.get_or("smoothing", 1u32)? != 0;

        Ok(Box::new(EchoHcMethod {
            frame_size,
            interval,
            amp,
            smoothing,
        }))
    }
}

impl Method for EchoHcMethod {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant {
        EmbedderVariant::Float(Box::new(EchoHcEmbedder::new(
            input,
            self.frame_size,
            self.interval,
            self.amp,
            self.smoothing,
        )))
    }

    fn make_extractor(&self) -> ExtractorVariant {
        ExtractorVariant::Float(Box::new(EchoHcExtractor::new(self.frame_size, self.interval)))
    }

    fn capacity(&self, samples: u64) -> i64 {
        let frame = self.frame_size as u64;
        (((samples + frame - 1) / frame) * N_ECHOES as u64) as i64
    }
}

/// Tap position selector: two bits pick one of four echo distances.
fn distance_multiplier(hi: bool, lo: bool) -> usize {
    ((hi as usize) << 1 | lo as usize) + 1
}

/// Put the two taps encoding a 4-bit group into a cleared kernel.
fn make_kernel(kernel: &mut [f64], bits: &[bool; N_ECHOES], interval: usize, amp: f64) {
    kernel.fill(0.0);

    let delay = interval * distance_multiplier(bits[0], bits[1]);
    kernel[delay - 1] = amp;

    let neg_offset = interval / 2;
    let delay = neg_offset + interval * distance_multiplier(bits[2], bits[3]);
    kernel[delay - 1] = -amp;
}

/// Read one 4-bit group; a partial group counts as end of stream.
fn read_group(data: &mut dyn InBits) -> Option<[bool; N_ECHOES]> {
    let mut bits = [false; N_ECHOES];
    for bit in bits.iter_mut() {
        *bit = data.next_bit()?;
    }
    Some(bits)
}

struct EchoHcEmbedder {
    data: Box<dyn InBits>,
    interval: usize,
    amp: f64,
    smoothing: bool,
    // whether `kernel` holds a group still waiting to be embedded
    have_group: bool,

    in_frame: Vec<f64>,
    out_frame: Vec<f64>,

    prev_kernel: Vec<f64>,
    kernel: Vec<f64>,
    next_kernel: Vec<f64>,
    prev_echo: Vec<f64>,
    echo: Vec<f64>,
    next_echo: Vec<f64>,
    mixer: Vec<f64>,

    prev_conv: OverlapAdd,
    conv: OverlapAdd,
    next_conv: OverlapAdd,
}

impl EchoHcEmbedder {
    fn new(
        mut data: Box<dyn InBits>,
        frame_size: usize,
        interval: usize,
        amp: f64,
        smoothing: bool,
    ) -> Self {
        let kernel_len = interval * 9 / 2;

        let mut prev_kernel = vec![0.0; kernel_len];
        let mut kernel = vec![0.0; kernel_len];
        let next_kernel = vec![0.0; kernel_len];

        let prev_conv = OverlapAdd::new(frame_size, kernel_len);
        let conv = OverlapAdd::new(frame_size, kernel_len);
        let next_conv = OverlapAdd::new(frame_size, kernel_len);
        let prev_echo = vec![0.0; prev_conv.padded_len()];
        let echo = vec![0.0; conv.padded_len()];
        let next_echo = vec![0.0; next_conv.padded_len()];

        let mut mixer = vec![0.0; frame_size];
        make_mixer(&mut mixer);

        // seed the frame before the first with valid but arbitrary peaks
        prev_kernel[2 * interval] = amp;
        prev_kernel[interval / 2 + 3 * interval] = -amp;
        debug!(
            "echo-hc: previous kernel seeded with taps at {} and {}",
            2 * interval,
            interval / 2 + 3 * interval
        );

        let have_group = match read_group(data.as_mut()) {
            Some(bits) => {
                make_kernel(&mut kernel, &bits, interval, amp);
                true
            }
            None => false,
        };

        EchoHcEmbedder {
            data,
            interval,
            amp,
            smoothing,
            have_group,
            in_frame: vec![0.0; frame_size],
            out_frame: vec![0.0; frame_size],
            prev_kernel,
            kernel,
            next_kernel,
            prev_echo,
            echo,
            next_echo,
            mixer,
            prev_conv,
            conv,
            next_conv,
        }
    }
}

/// Fill `seg` with (sin(2x) + 1) / 2 for x running linearly from `from`
/// towards `to`.
fn sin_slope(seg: &mut [f64], from: f64, to: f64) {
    let step = (to - from) / seg.len() as f64;
    let mut x = from;
    for m in seg.iter_mut() {
        *m = ((2.0 * x).sin() + 1.0) / 2.0;
        x += step;
    }
}

/// Raised-cosine taper: a plateau of 1 with sine ramps over the leading and
/// trailing SMOOTHING_PCT of the frame.
fn make_mixer(mixer: &mut [f64]) {
    let n = mixer.len();
    let start = (SMOOTHING_PCT * n as f64) as usize;
    let end = n - start;

    for m in &mut mixer[start..end] {
        *m = 1.0;
    }

    let sin_half = PI / 4.0;
    let sin_end = PI / 2.0;
    sin_slope(&mut mixer[..start], 0.0, sin_half);
    sin_slope(&mut mixer[end..], sin_half, sin_end);
}

impl Embedder<f64> for EchoHcEmbedder {
    fn embed(&mut self) -> bool {
        if !self.have_group {
            self.out_frame.copy_from_slice(&self.in_frame);
            return true;
        }

        let next_group = read_group(self.data.as_mut());

        if self.smoothing {
            match &next_group {
                Some(bits) => make_kernel(&mut self.next_kernel, bits, self.interval, self.amp),
                // nothing follows, fade out into the plain cover
                None => self.next_kernel.fill(0.0),
            }

            self.prev_conv
                .exec(&self.in_frame, &self.prev_kernel, &mut self.prev_echo);
            self.conv.exec(&self.in_frame, &self.kernel, &mut self.echo);
            self.next_conv
                .exec(&self.in_frame, &self.next_kernel, &mut self.next_echo);

            let half = self.in_frame.len() / 2;
            for i in 0..half {
                self.out_frame[i] = self.in_frame[i]
                    + self.echo[i] * self.mixer[i]
                    + self.prev_echo[i] * (1.0 - self.mixer[i]);
            }
            for i in half..self.in_frame.len() {
                self.out_frame[i] = self.in_frame[i]
                    + self.echo[i] * self.mixer[i]
                    + self.next_echo[i] * (1.0 - self.mixer[i]);
            }

            // rotate the kernels one frame forward
            std::mem::swap(&mut self.prev_kernel, &mut self.kernel);
            std::mem::swap(&mut self.kernel, &mut self.next_kernel);
        } else {
            self.conv.exec(&self.in_frame, &self.kernel, &mut self.echo);
            for i in 0..self.in_frame.len() {
                self.out_frame[i] = self.in_frame[i] + self.echo[i];
            }
            if let Some(bits) = &next_group {
                make_kernel(&mut self.kernel, bits, self.interval, self.amp);
            }
        }

        self.have_group = next_group.is_some();
        next_group.is_none()
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

struct EchoHcExtractor {
    interval: usize,
    in_frame: Vec<f64>,
    cepstrum: Vec<f64>,
    autocepstrum: Autocepstrum,
}

impl EchoHcExtractor {
    fn new(frame_size: usize, interval: usize) -> Self {
        let autocepstrum = Autocepstrum::new(frame_size);
        let cepstrum = vec![0.0; autocepstrum.padded_len()];
        EchoHcExtractor {
            interval,
            in_frame: vec![0.0; frame_size],
            cepstrum,
            autocepstrum,
        }
    }
}

fn argmax(coefs: &[f64; N_ECHOES]) -> usize {
    let mut best = 0;
    for (i, &c) in coefs.iter().enumerate() {
        if c > coefs[best] {
            best = i;
        }
    }
    best
}

fn argmin(coefs: &[f64; N_ECHOES]) -> usize {
    let mut best = 0;
    for (i, &c) in coefs.iter().enumerate() {
        if c < coefs[best] {
            best = i;
        }
    }
    best
}

impl Extractor<f64> for EchoHcExtractor {
    fn extract(&mut self, out: &mut dyn OutBits) -> bool {
        self.autocepstrum.exec(&self.in_frame, &mut self.cepstrum);

        // the first 2 bits sit in the positive echo position
        let mut pos = [0.0; N_ECHOES];
        for i in 1..=N_ECHOES {
            pos[i - 1] = self.cepstrum[i * self.interval - 1];
        }
        let peak = argmax(&pos);
        out.output_bit(peak >> 1 & 1 == 1);
        out.output_bit(peak & 1 == 1);

        // the other 2 bits in the negative echo position
        let neg_offset = self.interval / 2;
        let mut neg = [0.0; N_ECHOES];
        for i in 1..=N_ECHOES {
            neg[i - 1] = self.cepstrum[neg_offset + i * self.interval - 1];
        }
        let dip = argmin(&neg);
        out.output_bit(dip >> 1 & 1 == 1);
        out.output_bit(dip & 1 == 1);

        true
    }

    fn input_mut(&mut self) -> &mut [f64] {
        &mut self.in_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{BitVecReader, BitVecWriter};
    use crate::bitvec::BitVector;

    fn method(key: &str) -> Result<Box<dyn Method>> {
        EchoHcMethod::boxed(&Params::parse_key(key).unwrap())
    }

    fn noise(len: usize, seed: u64) -> Vec<f64> {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-0.5..0.5)).collect()
    }

    #[test]
    fn parameter_validation() {
        assert!(method("framesize=4000").is_err());
        assert!(method("interval=0").is_err());
        assert!(method("framesize=1024,interval=200").is_err());
        assert!(method("amp=0").is_err());
    }

    #[test]
    fn four_bits_per_frame_capacity() {
        let m = method("").unwrap();
        assert_eq!(m.capacity(4096), 4);
        assert_eq!(m.capacity(4097), 8);
        assert_eq!(m.capacity(16 * 4096), 64);
    }

    #[test]
    fn kernel_taps_follow_the_bit_pairs() {
        let interval = 50;
        let mut kernel = vec![0.0; interval * 9 / 2];

        make_kernel(&mut kernel, &[false, false, true, true], interval, 0.4);
        assert_eq!(kernel[interval - 1], 0.4);
        assert_eq!(kernel[interval / 2 + 4 * interval - 1], -0.4);

        make_kernel(&mut kernel, &[true, true, false, false], interval, 0.4);
        assert_eq!(kernel[4 * interval - 1], 0.4);
        assert_eq!(kernel[interval / 2 + interval - 1], -0.4);
        // the old taps are gone
        assert_eq!(kernel[interval - 1], 0.0);
    }

    fn roundtrip(key: &str, payload_bytes: &[u8]) {
        let m = method(key).unwrap();
        let payload = BitVector::from_bytes(payload_bytes);
        let groups = payload.len() / 4;

        let mut embedder = match m.make_embedder(Box::new(BitVecReader::new(payload.clone()))) {
            EmbedderVariant::Float(e) => e,
            EmbedderVariant::Int(_) => unreachable!("echo-hc is a float method"),
        };
        let mut extractor = match m.make_extractor() {
            ExtractorVariant::Float(e) => e,
            ExtractorVariant::Int(_) => unreachable!(),
        };

        let mut sink = BitVecWriter::new();
        let mut done = false;
        for frame in 0..groups {
            assert!(!done, "payload ended early at frame {frame}");
            embedder.input_mut().copy_from_slice(&noise(4096, frame as u64));
            done = embedder.embed();
            extractor.input_mut().copy_from_slice(embedder.output());
            assert!(extractor.extract(&mut sink));
        }
        assert!(done, "the last group must report done");

        let decoded = sink.into_vector();
        for i in 0..payload.len() {
            assert_eq!(decoded.get(i), payload.get(i), "bit {i}");
        }
    }

    #[test]
    fn bits_survive_a_smoothed_roundtrip() {
        roundtrip("", &[0xC3, 0x5A]);
    }

    #[test]
    fn bits_survive_without_smoothing() {
        roundtrip("smoothing=0", &[0x3C, 0xA5]);
    }
}
