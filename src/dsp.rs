use rustfft::num_complex::Complex;

/// Demultiplex (deinterleave) one channel out of an interleaved buffer.
///
/// # Arguments
///
/// * `interleaved` - The interleaved multi-channel signal.
/// * `chan` - The buffer receiving the selected channel.
/// * `chnum` - Which channel to pull out.
/// * `channels` - Total number of channels in the interleaved signal.
pub fn demultiplex<T: Copy>(interleaved: &[T], chan: &mut [T], chnum: usize, channels: usize) {
    for (dst, src) in chan
        .iter_mut()
        .zip(interleaved.iter().skip(chnum).step_by(channels))
    {
        *dst = *src;
    }
}

/// Multiplex (interleave) one channel back into an interleaved buffer.
pub fn multiplex<T: Copy>(chan: &[T], interleaved: &mut [T], chnum: usize, channels: usize) {
    for (src, dst) in chan
        .iter()
        .zip(interleaved.iter_mut().skip(chnum).step_by(channels))
    {
        *dst = *src;
    }
}

/// Magnitude of every DFT coefficient.
pub fn amplitude(dft: &[Complex<f64>], amps: &mut [f64]) {
    for (a, x) in amps.iter_mut().zip(dft) {
        *a = x.norm();
    }
}

/// Phase angle of every DFT coefficient.
pub fn angle(dft: &[Complex<f64>], phases: &mut [f64]) {
    for (p, x) in phases.iter_mut().zip(dft) {
        *p = x.arg();
    }
}

/// Rebuild DFT coefficients from magnitudes and phases.
pub fn polar_to_cartesian(dft: &mut [Complex<f64>], amps: &[f64], phases: &[f64]) {
    for (x, (a, p)) in dft.iter_mut().zip(amps.iter().zip(phases)) {
        *x = Complex::from_polar(*a, *p);
    }
}

/// The DFT bin closest to `freq` for an `n`-point transform at sample rate `fs`.
pub fn freq_to_bin(freq: f64, fs: f64, n: usize) -> usize {
    (freq / (fs / n as f64)).round() as usize
}

/// Average power of a real signal.
pub fn avg_power(signal: &[f64]) -> f64 {
    // the signal is real, no absolute value needed
    signal.iter().map(|s| s * s).sum::<f64>() / signal.len() as f64
}

/// Whether `x` is a power of two.
pub fn is_pow2(x: usize) -> bool {
    x != 0 && x & (x - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freq_to_bin_picks_nearest() {
        assert_eq!(freq_to_bin(1000.0, 44100.0, 1024), 23);
        assert_eq!(freq_to_bin(8000.0, 44100.0, 1024), 186);
        assert_eq!(freq_to_bin(0.0, 44100.0, 1024), 0);
    }

    #[test]
    fn mux_demux_roundtrip() {
        let interleaved: Vec<i32> = (0..12).collect();
        let mut left = vec![0; 6];
        let mut right = vec![0; 6];
        demultiplex(&interleaved, &mut left, 0, 2);
        demultiplex(&interleaved, &mut right, 1, 2);
        assert_eq!(left, vec![0, 2, 4, 6, 8, 10]);
        assert_eq!(right, vec![1, 3, 5, 7, 9, 11]);

        let mut rebuilt = vec![0; 12];
        multiplex(&left, &mut rebuilt, 0, 2);
        multiplex(&right, &mut rebuilt, 1, 2);
        assert_eq!(rebuilt, interleaved);
    }

    #[test]
    fn pow2_checks() {
        assert!(is_pow2(1));
        assert!(is_pow2(1024));
        assert!(!is_pow2(0));
        assert!(!is_pow2(1000));
    }

    #[test]
    fn avg_power_of_constant() {
        let signal = vec![2.0; 64];
        assert!((avg_power(&signal) - 4.0).abs() < 1e-12);
    }
}
