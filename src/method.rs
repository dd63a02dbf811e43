use anyhow::{anyhow, Result};

use crate::bitstream::{InBits, OutBits};
use crate::params::Params;
use crate::{echo, echo_hc, lsb, phase, tone};

/// Frame size used by methods that have no inherent transform length.
pub const DEF_FRAME_SIZE: usize = 4096;

/// Embeds payload bits into successive sample frames of one channel.
///
/// The pipeline fills `input_mut`, calls `embed`, and interleaves `output`
/// back. Any buffers and transforms a method needs live inside the
/// implementation; one instance serves one pass over a cover channel.
pub trait Embedder<T> {
    /// Process the current input frame into the output frame.
    ///
    /// Returns true once no further frames should be fed, for example when
    /// the payload is exhausted.
    fn embed(&mut self) -> bool;

    fn input_mut(&mut self) -> &mut [T];

    fn output(&self) -> &[T];

    fn frame_size(&self) -> usize;
}

/// Recovers payload bits from successive sample frames of one channel.
pub trait Extractor<T> {
    /// Extract bits from the current input frame into `out`.
    ///
    /// Returns false once no further frames are needed.
    fn extract(&mut self, out: &mut dyn OutBits) -> bool;

    fn input_mut(&mut self) -> &mut [T];

    fn frame_size(&self) -> usize;
}

/// A method works either on raw integer samples or on floats in [-1, 1].
pub enum EmbedderVariant {
    Int(Box<dyn Embedder<i32>>),
    Float(Box<dyn Embedder<f64>>),
}

pub enum ExtractorVariant {
    Int(Box<dyn Extractor<i32>>),
    Float(Box<dyn Extractor<f64>>),
}

/// A steganographic hiding method.
pub trait Method {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant;

    fn make_extractor(&self) -> ExtractorVariant;

    /// Embedding capacity in bits for a cover with `samples` samples per
    /// channel.
    fn capacity(&self, samples: u64) -> i64;
}

type Constructor = fn(&Params) -> Result<Box<dyn Method>>;

const REGISTRY: &[(&str, Constructor)] = &[
    ("echo", echo::EchoMethod::boxed),
    ("echo-hc", echo_hc::EchoHcMethod::boxed),
    ("lsb", lsb::LsbMethod::boxed),
    ("phase", phase::PhaseMethod::boxed),
    ("tone", tone::ToneMethod::boxed),
];

/// Construct the named method, validating its parameters eagerly.
pub fn create(name: &str, params: &Params) -> Result<Box<dyn Method>> {
    let (_, constructor) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| anyhow!("unknown method: {name}"))?;
    constructor(params)
}

/// Names of all registered methods.
pub fn list_methods() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_for(key: &str) -> Params {
        let mut params = Params::parse_key(key).unwrap();
        params.insert("samplerate", 44100u32);
        params.insert("bit_depth", 16i32);
        params
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert!(create("watermark", &params_for("")).is_err());
    }

    #[test]
    fn every_listed_method_constructs() {
        let params = params_for("");
        for name in list_methods() {
            assert!(create(name, &params).is_ok(), "{name} failed to construct");
        }
    }

    #[test]
    fn capacity_is_monotonic_in_cover_length() {
        let params = params_for("");
        for name in list_methods() {
            let method = create(name, &params).unwrap();
            let mut previous = i64::MIN;
            for samples in [0u64, 1, 4095, 4096, 8192, 44100, 1 << 20] {
                let capacity = method.capacity(samples);
                assert!(
                    capacity >= previous,
                    "{name} capacity shrank at {samples} samples"
                );
                previous = capacity;
            }
        }
    }
}
