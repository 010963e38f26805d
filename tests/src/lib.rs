//! Cross-crate integration tests for the jxt workspace.
//!
//! These exercise full encode/decode cycles through the public surface of
//! both crates; per-module behavior is covered by the unit and
//! integration tests inside each crate.

#[cfg(test)]
mod codec;

/// Deterministic pixels shared by the test modules.
#[cfg(test)]
pub(crate) fn test_image(width: usize, height: usize, channels: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width * height * channels);
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                out.push(((x * 13 + y * 31 + c * 101) % 256) as u8);
            }
        }
    }
    out
}
