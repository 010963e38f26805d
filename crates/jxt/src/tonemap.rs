//! Tone mapping lookup tables.
//!
//! A tone map connects the 8 bit base layer to the HDR sample domain: the
//! decoder lifts base samples through the forward LUT, the encoder runs
//! source samples through the inverted LUT to obtain the base layer. The
//! inversion walks the forward table from the top down, fills flat regions
//! with the midpoint of their preimage, spreads jumps across half-old,
//! half-new values, and finally stabilizes the endpoints where a
//! near-zero slope would otherwise leave a visible step.

use jxt_core::options::ToneMapSpec;
use jxt_core::sample::f32_to_f16_bits;

/// Forward and inverse lookup tables of one tone mapping.
pub struct ToneMap {
    /// LDR (8 bit, `0..=255`) to HDR output value.
    pub forward: Vec<u16>,
    /// HDR domain (up to 16 bits) back to LDR.
    pub inverse: Vec<u16>,
    /// Bits of the HDR domain index.
    pub hdr_bits: u8
}

impl ToneMap {
    /// Build a tone map from its specification.
    ///
    /// `float_domain` selects half-float output values rather than plain
    /// integers, `hdr_bits` the width of the HDR side.
    #[must_use]
    pub fn from_spec(spec: ToneMapSpec, hdr_bits: u8, float_domain: bool) -> ToneMap {
        let forward = match spec {
            ToneMapSpec::Linear => build_linear_mapping(hdr_bits, float_domain),
            ToneMapSpec::Gamma { gamma, exposure } => {
                build_gamma_mapping(gamma, exposure, hdr_bits, float_domain)
            }
        };
        let inverse = invert_table(&forward, 8, hdr_bits);
        ToneMap {
            forward,
            inverse,
            hdr_bits
        }
    }

    /// Lift one base sample into the HDR domain.
    #[inline(always)]
    #[must_use]
    pub fn lift(&self, ldr: u16) -> u16 {
        self.forward[usize::from(ldr.min(255))]
    }

    /// Map one HDR sample down to the base layer.
    #[inline(always)]
    #[must_use]
    pub fn squash(&self, hdr: u16) -> u16 {
        self.inverse[usize::from(hdr) & ((1 << self.hdr_bits) - 1)]
    }
}

/// Straight linear scaling between the 8 bit range and the HDR range.
fn build_linear_mapping(hdr_bits: u8, float_domain: bool) -> Vec<u16> {
    let out_max = if float_domain {
        // 0x7c00 is infinity in half-float, stay just below
        0x7bff_u32
    } else {
        (1_u32 << hdr_bits) - 1
    };

    (0..256_u32)
        .map(|i| {
            let norm = i as f64 / 255.0;
            if float_domain {
                f32_to_f16_bits(norm as f32)
            } else {
                ((norm * f64::from(out_max)) + 0.5) as u16
            }
        })
        .collect()
}

/// Gamma curve with an sRGB style linear knee, the static mapping of the
/// original tone mapper.
fn build_gamma_mapping(gamma: f64, exposure: f64, hdr_bits: u8, float_domain: bool) -> Vec<u16> {
    let out_max = if float_domain {
        0x7bff_i64
    } else {
        (1_i64 << hdr_bits) - 1
    };
    let knee = 0.04045_f64;
    let divs = ((knee + 0.055) / 1.055).powf(gamma) / knee;
    let shift = 1.0 / f64::from(1_u32 << 12);

    (0..256_u32)
        .map(|i| {
            let input = f64::from(i) / 255.0;
            let out = if gamma == 1.0 {
                input / exposure
            } else if input > knee {
                ((input + 0.055) / 1.055).powf(gamma) / exposure
            } else {
                input * divs / exposure
            };

            let value = if float_domain {
                i64::from(f32_to_f16_bits((out + shift) as f32))
            } else {
                (f64::from(out_max as u32) * (out + shift) + 0.5) as i64
            };
            value.clamp(0, out_max) as u16
        })
        .collect()
}

/// Invert a monotone-ish forward table.
///
/// Walks the input domain from its maximum down to zero. A run of equal
/// outputs (a flat region) maps back to the midpoint of the run; a jump
/// between successive outputs is filled half with the previous input and
/// half with the next. Afterwards the first and last entries are clipped
/// when their step is more than twice the neighbouring step, which absorbs
/// endpoint wobble from near-zero slopes.
#[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
#[must_use]
pub fn invert_table(input: &[u16], in_bits: u8, out_bits: u8) -> Vec<u16> {
    assert!(in_bits <= 16 && out_bits <= 16);

    let in_max = (1_i64 << in_bits) - 1;
    let out_max = (1_i64 << out_bits) - 1;
    let mut output = vec![0_u16; 1 << out_bits];

    let mut j: i64 = in_max;
    let mut last_j = in_max;
    let mut last_anchor = in_max;
    let mut last_filled = false;

    let mut last = i64::from(input[j as usize]).min(out_max);
    // if the top of the range is never produced, extend towards full range
    // so out-of-range pixels in the source still land somewhere sensible
    if last < ((out_max + 1) * 3) >> 2 {
        last = out_max;
    }

    loop {
        let current = i64::from(input[j as usize]).min(out_max);

        if current == last {
            // flat region, midpoint of the preimage
            output[last as usize] = ((last_anchor + j) >> 1) as u16;
            last_filled = true;
        } else {
            // a jump; fill half with the old input, half with the new
            let mid = if last > current {
                ((current + last + 1) >> 1) - 1
            } else {
                ((current + last - 1) >> 1) - 1
            };

            let mut cursor = last;
            while cursor != mid {
                if !last_filled {
                    output[cursor as usize] = last_j as u16;
                }
                if cursor > mid {
                    cursor -= 1;
                } else {
                    cursor += 1;
                }
                last_filled = false;
            }
            while cursor != current {
                if !last_filled {
                    output[cursor as usize] = j as u16;
                }
                if cursor > current {
                    cursor -= 1;
                } else {
                    cursor += 1;
                }
                last_filled = false;
            }
            last_anchor = j;
        }

        last_j = j;
        last = current;

        if j == 0 {
            break;
        }
        j -= 1;
    }

    if !last_filled {
        output[last as usize] = last_j as u16;
    }

    // endpoint stabilizer
    if out_max > 4 {
        let i1 = i64::from(output[0]);
        let i2 = i64::from(output[1]);
        let i3 = i64::from(output[2]);
        if (i1 - i2).abs() > 2 * (i3 - i2).abs() {
            output[0] = (2 * i2 - i3).clamp(0, in_max) as u16;
        }

        let i1 = i64::from(output[out_max as usize]);
        let i2 = i64::from(output[out_max as usize - 1]);
        let i3 = i64::from(output[out_max as usize - 2]);
        if (i1 - i2).abs() > 2 * (i3 - i2).abs() {
            output[out_max as usize] = (2 * i2 - i3).clamp(0, in_max) as u16;
        }
    }

    // force monotonicity where the smoothing could not: clamp each step to
    // its predecessor
    let mut previous = output[0];
    for value in output.iter_mut().skip(1) {
        if *value < previous {
            *value = previous;
        }
        previous = *value;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_forward_then_inverse_is_near_identity() {
        let map = ToneMap::from_spec(ToneMapSpec::Linear, 16, false);

        for v in 0..=255_u16 {
            let lifted = map.lift(v);
            let back = map.squash(lifted);
            assert!(
                (i32::from(back) - i32::from(v)).abs() <= 1,
                "{v} -> {lifted} -> {back}"
            );
        }
    }

    #[test]
    fn gamma_forward_then_inverse_is_near_identity() {
        let map = ToneMap::from_spec(
            ToneMapSpec::Gamma {
                gamma:    2.4,
                exposure: 1.0
            },
            16,
            false
        );

        for v in 0..=255_u16 {
            let back = map.squash(map.lift(v));
            assert!(
                (i32::from(back) - i32::from(v)).abs() <= 1,
                "{v} -> {} -> {back}",
                map.lift(v)
            );
        }
    }

    #[test]
    fn inverse_is_monotone() {
        let map = ToneMap::from_spec(
            ToneMapSpec::Gamma {
                gamma:    2.2,
                exposure: 0.5
            },
            16,
            false
        );

        let mut last = 0_u16;
        for &v in &map.inverse {
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn flat_table_inverts_without_panicking() {
        let forward = vec![512_u16; 256];
        let inverse = invert_table(&forward, 8, 12);
        // the single produced value maps back inside the flat run
        assert!(inverse[512] <= 255);
    }
}
