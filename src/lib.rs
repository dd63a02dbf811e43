//! Audio steganography for uncompressed PCM files.
//!
//! A payload bit stream is hidden inside a cover file by one of five
//! methods (LSB substitution, phase coding, tone insertion, echo hiding and
//! a high-capacity echo variant) and recovered from the resulting stego
//! file. The signal work is frame oriented: covers stream through a
//! demultiplex / embed / multiplex loop one frame at a time.

pub mod audio;
pub mod bitstream;
pub mod bitvec;
pub mod cepstrum;
pub mod conv;
pub mod dsp;
pub mod echo;
pub mod echo_hc;
pub mod fft;
pub mod lsb;
pub mod method;
pub mod params;
pub mod phase;
pub mod tone;
