use anyhow::{bail, Result};

use crate::bitstream::{InBits, OutBits};
use crate::cepstrum::Autocepstrum;
use crate::conv::OverlapAdd;
use crate::dsp::is_pow2;
use crate::method::{Embedder, EmbedderVariant, Extractor, ExtractorVariant, Method};
use crate::params::Params;

// share of the frame left before the crossfade ramp starts
const SMOOTHING_PCT: f64 = 0.95;

/// Echo hiding: every frame carries one bit in the delay of a faint echo,
/// decoded from the autocepstrum peak.
pub struct EchoMethod {
    frame_size: usize,
    delay0: usize,
    delay1: usize,
    amp: f64,
    smoothing: bool,
}

impl EchoMethod {
    pub fn boxed(params: &Params) -> Result<Box<dyn Method>> {
        let frame_size: usize = params.get_or("framesize", 4096)?;
        if !is_pow2(frame_size) {
            bail!("framesize must be a power of 2");
        }

        let delay0: usize = params.get_or("delay0", 250)?;
        if delay0 == 0 || delay0 > frame_size {
            bail!("delay0 must be positive and smaller than framesize");
        }
        let delay1: usize = params.get_or("delay1", 300)?;
        if delay1 == 0 || delay1 > frame_size {
            bail!("delay1 must be positive and smaller than framesize");
        }

        let amp: f64 = params.get_or("amp", 0.4)?;
        if amp <= 0.0 {
            bail!("amp must be positive");
        }

        let smoothing = params.get_or("smoothing", 1u32)? != 0;

        Ok(Box::new(EchoMethod {
            frame_size,
            delay0,
            delay1,
            amp,
            smoothing,
        }))
    }
}

impl Method for EchoMethod {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant {
        EmbedderVariant::Float(Box::new(EchoEmbedder::new(
            input,
            self.frame_size,
            self.amp,
            self.delay0,
            self.delay1,
            self.smoothing,
        )))
    }

    fn make_extractor(&self) -> ExtractorVariant {
        ExtractorVariant::Float(Box::new(EchoExtractor::new(
            self.frame_size,
            self.delay0,
            self.delay1,
        )))
    }

    fn capacity(&self, samples: u64) -> i64 {
        let frame = self.frame_size as u64;
        ((samples + frame - 1) / frame) as i64
    }
}

struct EchoEmbedder {
    data: Box<dyn InBits>,
    // single bit lookahead so the crossfade knows where it is heading
    next_bit: Option<bool>,
    smoothing: bool,

    in_frame: Vec<f64>,
    out_frame: Vec<f64>,

    kernel0: Vec<f64>,
    kernel1: Vec<f64>,
    echo0: Vec<f64>,
    echo1: Vec<f64>,
    mixer: Vec<f64>,

    conv0: OverlapAdd,
    conv1: OverlapAdd,
}

impl EchoEmbedder {
    fn new(
        mut data: Box<dyn InBits>,
        frame_size: usize,
        amp: f64,
        delay0: usize,
        delay1: usize,
        smoothing: bool,
    ) -> Self {
        let mut kernel0 = vec![0.0; delay0];
        kernel0[delay0 - 1] = amp;
        let mut kernel1 = vec![0.0; delay1];
        kernel1[delay1 - 1] = amp;

        let conv0 = OverlapAdd::new(frame_size, delay0);
        let conv1 = OverlapAdd::new(frame_size, delay1);
        let echo0 = vec![0.0; conv0.padded_len()];
        let echo1 = vec![0.0; conv1.padded_len()];

        let next_bit = data.next_bit();
        let mixer = vec![
            if next_bit == Some(true) { 1.0 } else { 0.0 };
            2 * frame_size
        ];

        EchoEmbedder {
            data,
            next_bit,
            smoothing,
            in_frame: vec![0.0; frame_size],
            out_frame: vec![0.0; frame_size],
            kernel0,
            kernel1,
            echo0,
            echo1,
            mixer,
            conv0,
            conv1,
        }
    }

    /// Refresh the crossfade between the two echoes.
    ///
    /// The ramp occupies [SMOOTHING_PCT * N, 2N - SMOOTHING_PCT * N); samples
    /// before it keep the values shifted in from the previous frame, samples
    /// after it hold `to`.
    fn update_mixer(&mut self, from: bool, to: bool) {
        let n = self.in_frame.len();
        let start = (SMOOTHING_PCT * n as f64) as usize;
        let end = self.mixer.len() - start;

        let from = from as u32 as f64;
        let to = to as u32 as f64;

        if from == to {
            for m in &mut self.mixer[start..] {
                *m = from;
            }
            return;
        }

        let step = (to - from) / (end - start) as f64;
        let mut val = from;
        for m in &mut self.mixer[start..end] {
            val += step;
            *m = val;
        }
        for m in &mut self.mixer[end..] {
            *m = to;
        }
    }
}

impl Embedder<f64> for EchoEmbedder {
    fn embed(&mut self) -> bool {
        let bit = match self.next_bit {
            Some(bit) => bit,
            None => {
                self.out_frame.copy_from_slice(&self.in_frame);
                return true;
            }
        };
        self.next_bit = self.data.next_bit();

        self.conv1.exec(&self.in_frame, &self.kernel1, &mut self.echo1);
        self.conv0.exec(&self.in_frame, &self.kernel0, &mut self.echo0);

        if self.smoothing {
            let upcoming = self.next_bit.unwrap_or(false);
            self.update_mixer(bit, upcoming);

            for i in 0..self.in_frame.len() {
                self.out_frame[i] = self.in_frame[i]
                    + self.echo1[i] * self.mixer[i]
                    + self.echo0[i] * (1.0 - self.mixer[i]);
            }

            // align the mixer with the next frame
            let n = self.in_frame.len();
            self.mixer.copy_within(n.., 0);
        } else {
            for i in 0..self.in_frame.len() {
                let echo = if bit { self.echo1[i] } else { self.echo0[i] };
                self.out_frame[i] = self.in_frame[i] + echo;
            }
        }

        self.next_bit.is_none()
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

struct EchoExtractor {
    delay0: usize,
    delay1: usize,
    in_frame: Vec<f64>,
    cepstrum: Vec<f64>,
    autocepstrum: Autocepstrum,
}

impl EchoExtractor {
    fn new(frame_size: usize, delay0: usize, delay1: usize) -> Self {
        let autocepstrum = Autocepstrum::new(frame_size);
        let cepstrum = vec![0.0; autocepstrum.padded_len()];
        EchoExtractor {
            delay0,
            delay1,
            in_frame: vec![0.0; frame_size],
            cepstrum,
            autocepstrum,
        }
    }
}

impl Extractor<f64> for EchoExtractor {
    fn extract(&mut self, out: &mut dyn OutBits) -> bool {
        self.autocepstrum.exec(&self.in_frame, &mut self.cepstrum);

        let c0 = self.cepstrum[self.delay0 - 1];
        let c1 = self.cepstrum[self.delay1 - 1];

        out.output_bit(c0 < c1);
        true
    }

    fn input_mut(&mut self) -> &mut [f64] {
        &mut self.in_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}
