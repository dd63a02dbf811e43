use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;

use crate::bitstream::OutBits;
use crate::dsp::{demultiplex, multiplex};
use crate::method::{Embedder, EmbedderVariant, Extractor, ExtractorVariant};
use crate::params::Params;

/// How interleaved channels are routed through a method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// Channel 0 carries the payload, the others pass through untouched.
    #[default]
    First,
    /// Every channel is driven through the method in index order.
    Each,
    /// Channel 0 carries the payload and its samples replace every channel.
    Mirror,
}

impl ChannelPolicy {
    /// Policy selected by the `channels` key.
    pub fn from_params(params: &Params) -> Result<Self> {
        match params.get_raw("channels") {
            None | Some("first") => Ok(ChannelPolicy::First),
            Some("each") => Ok(ChannelPolicy::Each),
            Some("mirror") => Ok(ChannelPolicy::Mirror),
            Some(other) => {
                bail!("unknown channel policy {other:?}, expected first, each or mirror")
            }
        }
    }
}

/// Format parameters of an opened audio file.
#[derive(Clone, Copy, Debug)]
pub struct AudioParams {
    pub samplerate: u32,
    pub channels: u16,
    /// Samples per channel.
    pub frames: u32,
    pub bits_per_sample: u16,
    pub float_samples: bool,
}

impl AudioParams {
    fn new(spec: WavSpec, frames: u32) -> Self {
        AudioParams {
            samplerate: spec.sample_rate,
            channels: spec.channels,
            frames,
            bits_per_sample: spec.bits_per_sample,
            float_samples: spec.sample_format == SampleFormat::Float,
        }
    }

    /// Bit depth as injected into method parameters: -1 for float samples.
    pub fn bit_depth(&self) -> i32 {
        if self.float_samples {
            -1
        } else {
            self.bits_per_sample as i32
        }
    }

    fn int_scale(&self) -> f64 {
        (1u64 << (self.bits_per_sample - 1)) as f64
    }

    fn int_range(&self) -> (i64, i64) {
        let half = 1i64 << (self.bits_per_sample - 1);
        (-half, half - 1)
    }
}

/// The audio file a message is embedded into.
pub struct CoverFile {
    reader: WavReader<BufReader<File>>,
    path: PathBuf,
}

impl CoverFile {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("failed to open file {}", path.display()))?;
        Ok(CoverFile {
            reader,
            path: path.to_path_buf(),
        })
    }

    pub fn params(&self) -> AudioParams {
        AudioParams::new(self.reader.spec(), self.reader.duration())
    }

    /// Run the cover through `embedder` frame by frame, writing the stego
    /// file. The stego file keeps the cover's format and sample count.
    pub fn embed(
        self,
        stego_path: &Path,
        embedder: EmbedderVariant,
        policy: ChannelPolicy,
    ) -> Result<()> {
        let audio = self.params();
        let spec = self.reader.spec();
        let mut writer = WavWriter::create(stego_path, spec)
            .with_context(|| format!("failed to open file {}", stego_path.display()))?;

        debug!(
            "embedding {} -> {} ({:?} policy)",
            self.path.display(),
            stego_path.display(),
            policy
        );

        match embedder {
            EmbedderVariant::Int(mut embedder) => {
                if audio.float_samples {
                    bail!("method requires integer samples");
                }
                let mut samples = self.reader.into_samples::<i32>();
                let (min, max) = audio.int_range();
                embed_frames(
                    &mut || samples.next().map(|s| s.map_err(anyhow::Error::from)),
                    &mut |s: i32| {
                        let clipped = (s as i64).clamp(min, max) as i32;
                        writer.write_sample(clipped).map_err(anyhow::Error::from)
                    },
                    embedder.as_mut(),
                    audio.channels as usize,
                    policy,
                )?;
            }
            EmbedderVariant::Float(mut embedder) => {
                if audio.float_samples {
                    let mut samples = self.reader.into_samples::<f32>();
                    embed_frames(
                        &mut || samples.next().map(|s| s.map(f64::from).map_err(anyhow::Error::from)),
                        &mut |s: f64| {
                            let clipped = s.clamp(-1.0, 1.0) as f32;
                            writer.write_sample(clipped).map_err(anyhow::Error::from)
                        },
                        embedder.as_mut(),
                        audio.channels as usize,
                        policy,
                    )?;
                } else {
                    let scale = audio.int_scale();
                    let (min, max) = audio.int_range();
                    let mut samples = self.reader.into_samples::<i32>();
                    embed_frames(
                        &mut || {
                            samples
                                .next()
                                .map(|s| s.map(|v| v as f64 / scale).map_err(anyhow::Error::from))
                        },
                        &mut |s: f64| {
                            let clipped = ((s * scale).round() as i64).clamp(min, max) as i32;
                            writer.write_sample(clipped).map_err(anyhow::Error::from)
                        },
                        embedder.as_mut(),
                        audio.channels as usize,
                        policy,
                    )?;
                }
            }
        }

        writer.finalize().context("failed to finish the stego file")
    }
}

/// The audio file a message is recovered from.
pub struct StegoFile {
    reader: WavReader<BufReader<File>>,
}

impl StegoFile {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("failed to open file {}", path.display()))?;
        Ok(StegoFile { reader })
    }

    pub fn params(&self) -> AudioParams {
        AudioParams::new(self.reader.spec(), self.reader.duration())
    }

    /// Run the stego file through `extractor` frame by frame, writing
    /// recovered bits into `output`.
    pub fn extract(
        self,
        extractor: ExtractorVariant,
        output: &mut dyn OutBits,
        policy: ChannelPolicy,
    ) -> Result<()> {
        let audio = self.params();

        match extractor {
            ExtractorVariant::Int(mut extractor) => {
                if audio.float_samples {
                    bail!("method requires integer samples");
                }
                let mut samples = self.reader.into_samples::<i32>();
                extract_frames(
                    &mut || samples.next().map(|s| s.map_err(anyhow::Error::from)),
                    extractor.as_mut(),
                    audio.channels as usize,
                    policy,
                    output,
                )
            }
            ExtractorVariant::Float(mut extractor) => {
                if audio.float_samples {
                    let mut samples = self.reader.into_samples::<f32>();
                    extract_frames(
                        &mut || samples.next().map(|s| s.map(f64::from).map_err(anyhow::Error::from)),
                        extractor.as_mut(),
                        audio.channels as usize,
                        policy,
                        output,
                    )
                } else {
                    let scale = audio.int_scale();
                    let mut samples = self.reader.into_samples::<i32>();
                    extract_frames(
                        &mut || {
                            samples
                                .next()
                                .map(|s| s.map(|v| v as f64 / scale).map_err(anyhow::Error::from))
                        },
                        extractor.as_mut(),
                        audio.channels as usize,
                        policy,
                        output,
                    )
                }
            }
        }
    }
}

/// Fill `buffer` from `read_sample`; returns how many samples arrived.
fn read_frame<T: Copy>(
    buffer: &mut [T],
    read_sample: &mut dyn FnMut() -> Option<Result<T>>,
) -> Result<usize> {
    let mut got = 0;
    for slot in buffer.iter_mut() {
        match read_sample() {
            Some(sample) => {
                *slot = sample.context("failed to read samples")?;
                got += 1;
            }
            None => break,
        }
    }
    Ok(got)
}

/// The embedding loop: frame at a time, channels in index order.
///
/// A short final frame, and every frame after the embedder reports done, is
/// written through unchanged.
fn embed_frames<T: Copy + Default>(
    read_sample: &mut dyn FnMut() -> Option<Result<T>>,
    write_sample: &mut dyn FnMut(T) -> Result<()>,
    embedder: &mut dyn Embedder<T>,
    channels: usize,
    policy: ChannelPolicy,
) -> Result<()> {
    let mut buffer = vec![T::default(); embedder.frame_size() * channels];
    let mut done = false;

    loop {
        let got = read_frame(&mut buffer, read_sample)?;
        if got == 0 {
            break;
        }

        if got == buffer.len() && !done {
            match policy {
                ChannelPolicy::First => {
                    demultiplex(&buffer, embedder.input_mut(), 0, channels);
                    done = embedder.embed();
                    multiplex(embedder.output(), &mut buffer, 0, channels);
                }
                ChannelPolicy::Each => {
                    for ch in 0..channels {
                        demultiplex(&buffer, embedder.input_mut(), ch, channels);
                        done = embedder.embed();
                        multiplex(embedder.output(), &mut buffer, ch, channels);
                        if done {
                            break;
                        }
                    }
                }
                ChannelPolicy::Mirror => {
                    demultiplex(&buffer, embedder.input_mut(), 0, channels);
                    done = embedder.embed();
                    for ch in 0..channels {
                        multiplex(embedder.output(), &mut buffer, ch, channels);
                    }
                }
            }
        }

        for &sample in &buffer[..got] {
            write_sample(sample)?;
        }
        if got < buffer.len() {
            break;
        }
    }
    Ok(())
}

/// The extraction loop; stops on a short read, a full output stream, or an
/// extractor that has everything it needs.
fn extract_frames<T: Copy + Default>(
    read_sample: &mut dyn FnMut() -> Option<Result<T>>,
    extractor: &mut dyn Extractor<T>,
    channels: usize,
    policy: ChannelPolicy,
    output: &mut dyn OutBits,
) -> Result<()> {
    let mut buffer = vec![T::default(); extractor.frame_size() * channels];

    loop {
        let got = read_frame(&mut buffer, read_sample)?;
        if got < buffer.len() {
            break;
        }

        let read_channels = match policy {
            ChannelPolicy::Each => channels,
            ChannelPolicy::First | ChannelPolicy::Mirror => 1,
        };
        for ch in 0..read_channels {
            if output.eof() {
                return Ok(());
            }
            demultiplex(&buffer, extractor.input_mut(), ch, channels);
            if !extractor.extract(output) {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_policy_from_key() {
        let params = Params::parse_key("").unwrap();
        assert_eq!(ChannelPolicy::from_params(&params).unwrap(), ChannelPolicy::First);

        let params = Params::parse_key("channels=each").unwrap();
        assert_eq!(ChannelPolicy::from_params(&params).unwrap(), ChannelPolicy::Each);

        let params = Params::parse_key("channels=mirror").unwrap();
        assert_eq!(ChannelPolicy::from_params(&params).unwrap(), ChannelPolicy::Mirror);

        let params = Params::parse_key("channels=both").unwrap();
        assert!(ChannelPolicy::from_params(&params).is_err());
    }

    #[test]
    fn bit_depth_of_float_files_is_flagged() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let params = AudioParams::new(spec, 1000);
        assert_eq!(params.bit_depth(), -1);

        let spec = WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let params = AudioParams::new(spec, 1000);
        assert_eq!(params.bit_depth(), 16);
        assert_eq!(params.int_range(), (-32768, 32767));
    }
}
