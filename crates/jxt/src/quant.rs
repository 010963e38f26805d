//! Quantization tables and quantizers.
//!
//! Tables are kept in natural order everywhere inside the codec; the
//! zig-zag reordering happens at the DQT segment boundary.

use crate::errors::EncodeErrors;

/// Bits of precision in the reciprocal quantizer multipliers.
pub const QUANTIZER_BITS: u32 = 30;

/// The Annex K luminance base table.
#[rustfmt::skip]
pub const DEFAULT_LUMA_QT: [u16; 64] = [
    16,  11,  10,  16,  24,  40,  51,  61,
    12,  12,  14,  19,  26,  58,  60,  55,
    14,  13,  16,  24,  40,  57,  69,  56,
    14,  17,  22,  29,  51,  87,  80,  62,
    18,  22,  37,  56,  68, 109, 103,  77,
    24,  35,  55,  64,  81, 104, 113,  92,
    49,  64,  78,  87, 103, 121, 120, 101,
    72,  92,  95,  98, 112, 100, 103,  99
];

/// The Annex K chrominance base table.
#[rustfmt::skip]
pub const DEFAULT_CHROMA_QT: [u16; 64] = [
    17,  18,  24,  47,  99,  99,  99,  99,
    18,  21,  26,  66,  99,  99,  99,  99,
    24,  26,  56,  99,  99,  99,  99,  99,
    47,  66,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99,
    99,  99,  99,  99,  99,  99,  99,  99
];

/// Scale a base table by a quality factor in `1..=100` using the classic
/// curve: `s = Q < 50 ? 5000/Q : 200 - 2Q`, entries clamped to
/// `1..=32767`.
#[must_use]
pub fn scale_quality(base: &[u16; 64], quality: u8) -> [u16; 64] {
    let quality = u32::from(quality.clamp(1, 100));
    let scale = if quality < 50 {
        5000 / quality
    } else {
        200 - 2 * quality
    };

    let mut out = [0_u16; 64];
    for (dst, &src) in out.iter_mut().zip(base.iter()) {
        let scaled = (u32::from(src) * scale + 50) / 100;
        *dst = scaled.clamp(1, 32767) as u16;
    }
    out
}

/// Validate a user supplied table the way a DQT parser would.
pub fn validate_table(table: &[u16; 64]) -> Result<(), EncodeErrors> {
    if table.iter().any(|&q| q == 0) {
        return Err(EncodeErrors::InvalidParameter(
            "quantization entries must be in 1..=32767".to_string()
        ));
    }
    if table.iter().any(|&q| q > 32767) {
        return Err(EncodeErrors::Overflow("quantization entry beyond 15 bits"));
    }
    Ok(())
}

/// A quantizer for the integer (lifting) DCT path: reciprocal multipliers
/// for the forward direction, plain deltas for the inverse.
pub struct IntQuantizer {
    /// `round((1 << QUANTIZER_BITS) / q)` per band.
    pub inv:   [i64; 64],
    /// The quantization deltas themselves.
    pub step:  [i32; 64],
    /// Enlarged zero bin on AC bands.
    pub dead_zone: bool
}

impl IntQuantizer {
    #[must_use]
    pub fn new(table: &[u16; 64], dead_zone: bool) -> IntQuantizer {
        let mut quant = IntQuantizer {
            inv: [0; 64],
            step: [0; 64],
            dead_zone
        };
        for i in 0..64 {
            let q = i64::from(table[i]);
            quant.step[i] = q as i32;
            quant.inv[i] = ((1_i64 << QUANTIZER_BITS) + q / 2) / q;
        }
        quant
    }

    /// Quantize one coefficient, rounding half away from zero.
    ///
    /// The dead-zone variant widens the zero bin to 3/8 of a step and only
    /// applies to AC bands.
    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn quantize(&self, n: i32, band: usize) -> i32 {
        let wide = i64::from(n) * self.inv[band];

        if !self.dead_zone || band == 0 {
            let negative = i64::from(n < 0);
            ((wide + (1_i64 << (QUANTIZER_BITS - 1)) - negative) >> QUANTIZER_BITS) as i32
        } else {
            // shrink towards zero by an extra eighth of a step
            let mask = i64::from(n >> 31);
            let offset = mask << (QUANTIZER_BITS - 2);
            ((wide + (!offset & mask) + (3_i64 << (QUANTIZER_BITS - 3))) >> QUANTIZER_BITS) as i32
        }
    }

    /// Undo quantization for one coefficient.
    #[inline(always)]
    pub fn dequantize(&self, n: i32, band: usize) -> i32 {
        n * self.step[band]
    }
}

/// Lagrangian coefficient re-selection over one block.
///
/// Given the unquantized (but transformed) coefficients and a first-cut
/// quantization, nudge each AC coefficient towards zero when the rate
/// saved outweighs the distortion added, at slope `lambda`.
pub fn rd_optimize_block(
    unquantized: &[i32; 64], quantized: &mut [i32; 64], step: &[i32; 64], lambda: f64
) {
    for band in 1..64 {
        let x = f64::from(unquantized[band]);
        let delta = f64::from(step[band]);

        let mut best = quantized[band];
        let mut best_cost = rd_cost(x, best, delta, lambda);

        // candidates walking towards zero; magnitudes rarely improve past
        // two steps
        let mut candidate = best;
        for _ in 0..2 {
            if candidate == 0 {
                break;
            }
            candidate -= candidate.signum();
            let cost = rd_cost(x, candidate, delta, lambda);
            if cost < best_cost {
                best_cost = cost;
                best = candidate;
            }
        }
        quantized[band] = best;
    }
}

fn rd_cost(x: f64, level: i32, delta: f64, lambda: f64) -> f64 {
    let error = x - f64::from(level) * delta;
    let rate = if level == 0 {
        // zeroes mostly ride along in run lengths
        0.5
    } else {
        f64::from(crate::misc::bit_category(level)) + 1.0
    };
    error * error + lambda * delta * delta * rate
}

/// Estimate the critical slope for a block from its unquantized AC energy.
#[must_use]
pub fn estimate_critical_slope(unquantized: &[i32; 64]) -> f64 {
    let s1 = 2.0_f64.powf(14.75);
    let s2 = 2.0_f64.powf(16.5);
    let scale = 1.0 / 8.0;

    let mut energy = 0.0_f64;
    for &coeff in &unquantized[1..] {
        let val = f64::from(coeff) / scale;
        energy += val * val;
    }
    energy /= 63.0;

    s1 / (s2 + energy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_scaling_is_monotone() {
        let mut last = scale_quality(&DEFAULT_LUMA_QT, 1);
        for quality in 2..=100 {
            let current = scale_quality(&DEFAULT_LUMA_QT, quality);
            for (now, before) in current.iter().zip(last.iter()) {
                assert!(now <= before, "quality {quality} raised a step size");
            }
            last = current;
        }
    }

    #[test]
    fn quality_fifty_is_the_base_table() {
        assert_eq!(scale_quality(&DEFAULT_LUMA_QT, 50), DEFAULT_LUMA_QT);
    }

    #[test]
    fn quality_hundred_is_all_ones_for_small_entries() {
        let table = scale_quality(&DEFAULT_LUMA_QT, 100);
        assert!(table.iter().all(|&q| q == 1));
    }

    #[test]
    fn quantizer_rounds_half_away_from_zero() {
        let mut table = [1_u16; 64];
        table[1] = 8;
        let quant = IntQuantizer::new(&table, false);

        assert_eq!(quant.quantize(4, 1), 1);
        assert_eq!(quant.quantize(3, 1), 0);
        assert_eq!(quant.quantize(-4, 1), -1);
        assert_eq!(quant.quantize(-3, 1), 0);
        assert_eq!(quant.quantize(12, 1), 2);
    }

    #[test]
    fn dead_zone_widens_the_zero_bin() {
        let mut table = [1_u16; 64];
        table[1] = 16;
        let plain = IntQuantizer::new(&table, false);
        let dz = IntQuantizer::new(&table, true);

        // 8/16 rounds to one normally but the dead zone swallows it
        assert_eq!(plain.quantize(8, 1), 1);
        assert_eq!(dz.quantize(8, 1), 0);
        // DC is exempt
        assert_eq!(dz.quantize(8, 0), plain.quantize(8, 0));
        // large values are unaffected beyond the 1/8 shift
        assert_eq!(dz.quantize(32, 1), 2);
    }
}
