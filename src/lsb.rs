use anyhow::{bail, Result};

use crate::bitstream::{InBits, OutBits};
use crate::method::{
    Embedder, EmbedderVariant, Extractor, ExtractorVariant, Method, DEF_FRAME_SIZE,
};
use crate::params::Params;

/// LSB substitution: the payload replaces the lowest `lsbs` bits of every
/// integer sample.
pub struct LsbMethod {
    lsbs: u32,
}

impl LsbMethod {
    pub fn boxed(params: &Params) -> Result<Box<dyn Method>> {
        let lsbs: u32 = params.get_or("lsbs", 1)?;
        if lsbs == 0 {
            bail!("number of LSBs must be > 0");
        }

        let bit_depth: i32 = params.get_or("bit_depth", 16)?;
        if bit_depth == -1 {
            bail!("lsb method works only with integer samples");
        }
        if lsbs > bit_depth as u32 {
            bail!("lsbs must not exceed the sample bit depth ({bit_depth})");
        }

        Ok(Box::new(LsbMethod { lsbs }))
    }
}

impl Method for LsbMethod {
    fn make_embedder(&self, input: Box<dyn InBits>) -> EmbedderVariant {
        EmbedderVariant::Int(Box::new(LsbEmbedder::new(input, self.lsbs)))
    }

    fn make_extractor(&self) -> ExtractorVariant {
        ExtractorVariant::Int(Box::new(LsbExtractor::new(self.lsbs)))
    }

    fn capacity(&self, samples: u64) -> i64 {
        (samples * self.lsbs as u64) as i64
    }
}

struct LsbEmbedder {
    data: Box<dyn InBits>,
    lsbs: u32,
    in_frame: Vec<i32>,
    out_frame: Vec<i32>,
}

impl LsbEmbedder {
    fn new(data: Box<dyn InBits>, lsbs: u32) -> Self {
        LsbEmbedder {
            data,
            lsbs,
            in_frame: vec![0; DEF_FRAME_SIZE],
            out_frame: vec![0; DEF_FRAME_SIZE],
        }
    }
}

impl Embedder<i32> for LsbEmbedder {
    fn embed(&mut self) -> bool {
        let mask = ((1u64 << self.lsbs) - 1) as u32;
        for i in 0..self.in_frame.len() {
            // make room for the embedded bits
            let mut sample = self.in_frame[i] as u32 & !mask;
            for j in 0..self.lsbs {
                match self.data.next_bit() {
                    Some(bit) => sample |= (bit as u32) << j,
                    None => {
                        // keep the partially filled sample, the rest of the
                        // frame passes through untouched
                        self.out_frame[i] = if j == 0 { self.in_frame[i] } else { sample as i32 };
                        self.out_frame[i + 1..].copy_from_slice(&self.in_frame[i + 1..]);
                        return true;
                    }
                }
            }
            self.out_frame[i] = sample as i32;
        }
        false
    }

    fn input_mut(&mut self) -> &mut [i32] {
        &mut self.in_frame
    }

    fn output(&self) -> &[i32] {
        &self.out_frame
    }

    fn frame_size(&self) -> usize {
        self.in_frame.len()
    }
}

struct LsbExtractor {
    lsbs: u32,
    in_frame: Vec<i32>,
}

impl LsbExtractor {
    fn new(lsbs: u32) -> Self {
        LsbExtractor {
            lsbs,
            in_frame: vec![0; DEF_FRAME_SIZE],
        }
    }
}

impl Extractor<i32> for LsbExtractor {
    fn extract(&mut self, out: &mut dyn OutBits) -> bool {
        for &sample in &self.in_frame {
            let sample = sample as u32;
            for j in 0..self.lsbs {
                out.output_bit(sample >> j & 1 == 1);
            }
        }
        true
    }

    fn input_mut(&mut self) -> &mut [i32] {
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

    fn method(key: &str) -> Box<dyn Method> {
        let mut params = Params::parse_key(key).unwrap();
        params.insert("bit_depth", 16i32);
        LsbMethod::boxed(&params).unwrap()
    }

    fn int_embedder(m: &dyn Method, payload: &[u8]) -> Box<dyn Embedder<i32>> {
        let bits = BitVecReader::new(BitVector::from_bytes(payload));
        match m.make_embedder(Box::new(bits)) {
            EmbedderVariant::Int(e) => e,
            EmbedderVariant::Float(_) => unreachable!("lsb is an integer method"),
        }
    }

    #[test]
    fn parameter_validation() {
        let mut params = Params::parse_key("lsbs=0").unwrap();
        params.insert("bit_depth", 16i32);
        assert!(LsbMethod::boxed(&params).is_err());

        let mut params = Params::new();
        params.insert("bit_depth", -1i32);
        assert!(LsbMethod::boxed(&params).is_err());

        let mut params = Params::parse_key("lsbs=17").unwrap();
        params.insert("bit_depth", 16i32);
        assert!(LsbMethod::boxed(&params).is_err());
    }

    #[test]
    fn capacity_counts_every_sample() {
        assert_eq!(method("").capacity(44100), 44100);
        assert_eq!(method("lsbs=2").capacity(44100), 88200);
    }

    #[test]
    fn substitutes_only_the_low_bits() {
        let m = method("");
        let mut embedder = int_embedder(m.as_ref(), &[0b1010_0101]);
        for (i, s) in embedder.input_mut().iter_mut().enumerate() {
            *s = (i as i32 - 100) << 3;
        }
        let done = embedder.embed();
        assert!(done);

        for i in 0..8 {
            let expected_bit = (0b1010_0101 >> i) & 1;
            assert_eq!(embedder.output()[i] & 1, expected_bit, "sample {i}");
            assert_eq!(embedder.output()[i] & !1, (i as i32 - 100) << 3);
        }
        // past the payload the cover passes through
        for i in 8..DEF_FRAME_SIZE {
            assert_eq!(embedder.output()[i], (i as i32 - 100) << 3);
        }
    }

    #[test]
    fn embeds_and_extracts_negative_samples() {
        let m = method("lsbs=3");
        let payload = [0xDE, 0xAD, 0xBE];
        let mut embedder = int_embedder(m.as_ref(), &payload);
        for s in embedder.input_mut().iter_mut() {
            *s = -12345;
        }
        assert!(embedder.embed());

        let mut extractor = match m.make_extractor() {
            ExtractorVariant::Int(e) => e,
            ExtractorVariant::Float(_) => unreachable!(),
        };
        extractor.input_mut().copy_from_slice(embedder.output());
        let mut sink = BitVecWriter::new();
        assert!(extractor.extract(&mut sink));

        let bits = sink.into_vector();
        for (i, byte) in payload.iter().enumerate() {
            assert_eq!(bits.read(i * 8, 8) as u8, *byte);
        }
    }
}
