/// Interleaves the two channels of a stereo signal.
pub fn interleave_stereo(left: &[f32], right: &[f32], output: &mut [f32]) {
    let lr = left.iter().zip(right.iter());
    for (i, (&ls, &rs)) in lr.enumerate() {
        output[2 * i] = ls;
        output[2 * i + 1] = rs;
    }
}

/// Uninterleaves the two channels of a stereo signal.
pub fn uninterleave_stereo(input: &[f32], left: &mut [f32], right: &mut [f32]) {
    for (i, samples) in input.chunks_exact(2).enumerate() {
        left[i] = samples[0];
        right[i] = samples[1];
    }
}

/// Converts a mono signal to a LR signal
pub fn mono_to_leftright(mono: &[f32], left: &mut [f32], right: &mut [f32]) {
    left.copy_from_slice(mono);
    right.copy_from_slice(mono);
}

/// Converts float samples in [-1, 1] to 16-bit PCM.
/// Out-of-range input is clamped rather than wrapped.
pub fn pcm16_from_f32(input: &[f32], output: &mut [i16]) {
    for (&s, out) in input.iter().zip(output.iter_mut()) {
        *out = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
    }
}

/// Converts a relative gain in dB to the corresponding voltage ratio/scaling factor.
pub fn scale_from_gain(gain: f32) -> f32 {
    10.0_f32.powf(gain / 20.0)
}
