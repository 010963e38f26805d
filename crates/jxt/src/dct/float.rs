//! The AA&N float kernel.
//!
//! Eight point DCT in the Arai, Agui and Nakajima factorization. The
//! factorization leaves a per-cell scale of `dctscale[x] * dctscale[y] / 8`
//! on the coefficients, which is folded into the quantization multipliers
//! so the transform itself spends no multiplies on normalization.

/// `cos(k*pi/16) * sqrt(2)` for the AA&N output scaling, `k = 0..8`
/// folded to eight entries.
const DCT_SCALE: [f64; 8] = [
    1.0, 1.387_039_845, 1.306_562_965, 1.175_875_602,
    1.0, 0.785_694_958, 0.541_196_100, 0.275_899_379
];

/// Float forward/inverse DCT with quantization baked into per-cell
/// multipliers.
pub struct FloatDct {
    /// Forward multipliers, `2^preshift / (8 * q * scale)` per cell.
    fwd: [f32; 64],
    /// Inverse multipliers, `8 * q * scale / 2^preshift / 64` folded so a
    /// plain multiply dequantizes and rescales.
    inv: [f32; 64],
    /// Effective step per band, for rate estimation.
    step: [i32; 64],
    /// Unquantized coefficients of the last forward call, scaled to step
    /// units, kept when rate-distortion optimization wants them.
    transform: Option<Box<[i32; 64]>>,
    /// Enlarged zero bin on the AC bands.
    dead_zone: bool
}

impl FloatDct {
    /// Fold a quantization table and a coefficient preshift into the
    /// kernel multipliers.
    #[must_use]
    pub fn new(table: &[u16; 64], preshift: u8) -> FloatDct {
        FloatDct::new_with_optimize(table, preshift, false)
    }

    #[must_use]
    pub fn new_with_optimize(table: &[u16; 64], preshift: u8, optimize: bool) -> FloatDct {
        let mut kernel = FloatDct {
            fwd:  [0.0; 64],
            inv:  [0.0; 64],
            step: [0; 64],
            transform: if optimize { Some(Box::new([0; 64])) } else { None },
            dead_zone: false
        };
        let lift = f64::from(1_u32 << preshift);

        for y in 0..8 {
            for x in 0..8 {
                let cell = y * 8 + x;
                let scale = f64::from(table[cell]) * DCT_SCALE[x] * DCT_SCALE[y];

                kernel.fwd[cell] = (0.125 * lift / scale) as f32;
                kernel.inv[cell] = (0.125 * scale / lift) as f32;
                kernel.step[cell] = i32::from(table[cell]);
            }
        }
        kernel
    }

    /// Same kernel with the noise suppressing zero bin on the AC bands.
    #[must_use]
    pub fn new_with_deadzone(table: &[u16; 64], preshift: u8, optimize: bool) -> FloatDct {
        let mut kernel = FloatDct::new_with_optimize(table, preshift, optimize);
        kernel.dead_zone = true;
        kernel
    }

    #[must_use]
    pub fn steps(&self) -> [i32; 64] {
        self.step
    }

    #[must_use]
    pub fn unquantized(&self) -> Option<&[i32; 64]> {
        self.transform.as_deref()
    }

    /// Round to nearest, ties away from zero; records the unquantized
    /// value in step units when the optimizer asked for it.
    #[inline(always)]
    #[allow(clippy::cast_possible_truncation)]
    fn quantize(&mut self, value: f32, band: usize) -> i32 {
        let scaled = value * self.fwd[band];
        if let Some(transform) = self.transform.as_deref_mut() {
            transform[band] = (scaled * self.step[band] as f32).round() as i32;
        }
        if self.dead_zone && band != 0 {
            // zero bin enlarged to 3/8 of a step on each side
            let shrunk = (scaled.abs() + 0.375).floor();
            return if scaled < 0.0 { -shrunk as i32 } else { shrunk as i32 };
        }
        scaled.round() as i32
    }

    /// Forward DCT and quantization of one block, natural order.
    #[allow(clippy::similar_names, clippy::too_many_lines)]
    pub fn forward(&mut self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        let mut d = [0.0_f32; 64];
        // the DC path accumulates all 64 samples, so the level shift is
        // removed once, scaled up by the block size
        let dc_bias = (dc_offset * 64) as f32;

        // rows
        for (row, src) in d.chunks_exact_mut(8).zip(source.chunks_exact(8)) {
            let tmp0 = (src[0] + src[7]) as f32;
            let tmp7 = (src[0] - src[7]) as f32;
            let tmp1 = (src[1] + src[6]) as f32;
            let tmp6 = (src[1] - src[6]) as f32;
            let tmp2 = (src[2] + src[5]) as f32;
            let tmp5 = (src[2] - src[5]) as f32;
            let tmp3 = (src[3] + src[4]) as f32;
            let tmp4 = (src[3] - src[4]) as f32;

            let tmp10 = tmp0 + tmp3;
            let tmp13 = tmp0 - tmp3;
            let tmp11 = tmp1 + tmp2;
            let tmp12 = tmp1 - tmp2;

            row[0] = tmp10 + tmp11;
            row[4] = tmp10 - tmp11;

            let z1 = (tmp12 + tmp13) * 0.707_106_781;
            row[2] = tmp13 + z1;
            row[6] = tmp13 - z1;

            let tmp10 = tmp4 + tmp5;
            let tmp11 = tmp5 + tmp6;
            let tmp12 = tmp6 + tmp7;

            let z5 = (tmp10 - tmp12) * 0.382_683_433;
            let z2 = 0.541_196_100 * tmp10 + z5;
            let z4 = 1.306_562_965 * tmp12 + z5;
            let z3 = tmp11 * 0.707_106_781;

            let z11 = tmp7 + z3;
            let z13 = tmp7 - z3;

            row[5] = z13 + z2;
            row[3] = z13 - z2;
            row[1] = z11 + z4;
            row[7] = z11 - z4;
        }

        // columns, quantizing on the way out
        for col in 0..8 {
            let tmp0 = d[col] + d[col + 56];
            let tmp7 = d[col] - d[col + 56];
            let tmp1 = d[col + 8] + d[col + 48];
            let tmp6 = d[col + 8] - d[col + 48];
            let tmp2 = d[col + 16] + d[col + 40];
            let tmp5 = d[col + 16] - d[col + 40];
            let tmp3 = d[col + 24] + d[col + 32];
            let tmp4 = d[col + 24] - d[col + 32];

            let tmp10 = tmp0 + tmp3;
            let tmp13 = tmp0 - tmp3;
            let tmp11 = tmp1 + tmp2;
            let tmp12 = tmp1 - tmp2;

            let dc = tmp10 + tmp11 - if col == 0 { dc_bias } else { 0.0 };
            target[col] = self.quantize(dc, col);
            target[col + 32] = self.quantize(tmp10 - tmp11, col + 32);

            let z1 = (tmp12 + tmp13) * 0.707_106_781;
            target[col + 16] = self.quantize(tmp13 + z1, col + 16);
            target[col + 48] = self.quantize(tmp13 - z1, col + 48);

            let tmp10 = tmp4 + tmp5;
            let tmp11 = tmp5 + tmp6;
            let tmp12 = tmp6 + tmp7;

            let z5 = (tmp10 - tmp12) * 0.382_683_433;
            let z2 = 0.541_196_100 * tmp10 + z5;
            let z4 = 1.306_562_965 * tmp12 + z5;
            let z3 = tmp11 * 0.707_106_781;

            let z11 = tmp7 + z3;
            let z13 = tmp7 - z3;

            target[col + 40] = self.quantize(z13 + z2, col + 40);
            target[col + 24] = self.quantize(z13 - z2, col + 24);
            target[col + 8] = self.quantize(z11 + z4, col + 8);
            target[col + 56] = self.quantize(z11 - z4, col + 56);
        }
    }

    /// Dequantize and inverse transform one block, natural order.
    #[allow(clippy::similar_names, clippy::too_many_lines)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn inverse(&self, source: &[i32; 64], target: &mut [i32; 64], dc_offset: i32) {
        let mut d = [0.0_f32; 64];
        let dc_bias = dc_offset as f32;

        // columns
        for col in 0..8 {
            let tmp0 = source[col] as f32 * self.inv[col]
                + if col == 0 { dc_bias } else { 0.0 };
            let tmp1 = source[col + 16] as f32 * self.inv[col + 16];
            let tmp2 = source[col + 32] as f32 * self.inv[col + 32];
            let tmp3 = source[col + 48] as f32 * self.inv[col + 48];

            let tmp10 = tmp0 + tmp2;
            let tmp11 = tmp0 - tmp2;

            let tmp13 = tmp1 + tmp3;
            let tmp12 = (tmp1 - tmp3) * 1.414_213_562 - tmp13;

            let t0 = tmp10 + tmp13;
            let t3 = tmp10 - tmp13;
            let t1 = tmp11 + tmp12;
            let t2 = tmp11 - tmp12;

            let tmp4 = source[col + 8] as f32 * self.inv[col + 8];
            let tmp5 = source[col + 24] as f32 * self.inv[col + 24];
            let tmp6 = source[col + 40] as f32 * self.inv[col + 40];
            let tmp7 = source[col + 56] as f32 * self.inv[col + 56];

            let z13 = tmp6 + tmp5;
            let z10 = tmp6 - tmp5;
            let z11 = tmp4 + tmp7;
            let z12 = tmp4 - tmp7;

            let t7 = z11 + z13;
            let t11 = (z11 - z13) * 1.414_213_562;
            let z5 = (z10 + z12) * 1.847_759_065;
            let t10 = 1.082_392_200 * z12 - z5;
            let t12 = -2.613_125_930 * z10 + z5;

            let t6 = t12 - t7;
            let t5 = t11 - t6;
            let t4 = t10 + t5;

            d[col] = t0 + t7;
            d[col + 56] = t0 - t7;
            d[col + 8] = t1 + t6;
            d[col + 48] = t1 - t6;
            d[col + 16] = t2 + t5;
            d[col + 40] = t2 - t5;
            d[col + 32] = t3 + t4;
            d[col + 24] = t3 - t4;
        }

        // rows
        for (row, dst) in d.chunks_exact(8).zip(target.chunks_exact_mut(8)) {
            let tmp0 = row[0];
            let tmp1 = row[2];
            let tmp2 = row[4];
            let tmp3 = row[6];

            let tmp10 = tmp0 + tmp2;
            let tmp11 = tmp0 - tmp2;

            let tmp13 = tmp1 + tmp3;
            let tmp12 = (tmp1 - tmp3) * 1.414_213_562 - tmp13;

            let t0 = tmp10 + tmp13;
            let t3 = tmp10 - tmp13;
            let t1 = tmp11 + tmp12;
            let t2 = tmp11 - tmp12;

            let tmp4 = row[1];
            let tmp5 = row[3];
            let tmp6 = row[5];
            let tmp7 = row[7];

            let z13 = tmp6 + tmp5;
            let z10 = tmp6 - tmp5;
            let z11 = tmp4 + tmp7;
            let z12 = tmp4 - tmp7;

            let t7 = z11 + z13;
            let t11 = (z11 - z13) * 1.414_213_562;
            let z5 = (z10 + z12) * 1.847_759_065;
            let t10 = 1.082_392_200 * z12 - z5;
            let t12 = -2.613_125_930 * z10 + z5;

            let t6 = t12 - t7;
            let t5 = t11 - t6;
            let t4 = t10 + t5;

            dst[0] = (t0 + t7).round() as i32;
            dst[7] = (t0 - t7).round() as i32;
            dst[1] = (t1 + t6).round() as i32;
            dst[6] = (t1 - t6).round() as i32;
            dst[2] = (t2 + t5).round() as i32;
            dst[5] = (t2 - t5).round() as i32;
            dst[4] = (t3 + t4).round() as i32;
            dst[3] = (t3 - t4).round() as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_block_is_dc_only() {
        let table = [16_u16; 64];
        let mut kernel = FloatDct::new(&table, 0);

        let source = [128_i32; 64];
        let mut coeffs = [0_i32; 64];
        kernel.forward(&source, &mut coeffs, 128);

        // mean equals the level shift, everything quantizes to zero
        assert_eq!(coeffs, [0; 64]);

        let mut recon = [0_i32; 64];
        kernel.inverse(&coeffs, &mut recon, 128);
        assert_eq!(recon, [128; 64]);
    }

    #[test]
    fn round_trip_stays_close() {
        // a gradient block survives quality-90-ish quantization to within
        // a couple of codes
        let table = crate::quant::scale_quality(&crate::quant::DEFAULT_LUMA_QT, 90);
        let mut kernel = FloatDct::new(&table, 0);

        let source: [i32; 64] = core::array::from_fn(|i| ((i % 8) * 16 + (i / 8) * 8) as i32);
        let mut coeffs = [0_i32; 64];
        kernel.forward(&source, &mut coeffs, 128);

        let mut recon = [0_i32; 64];
        kernel.inverse(&coeffs, &mut recon, 128);

        for (orig, back) in source.iter().zip(recon.iter()) {
            assert!((orig - back).abs() <= 8, "{orig} vs {back}");
        }
    }

    #[test]
    fn preshift_scales_coefficients_up() {
        let table = [16_u16; 64];
        let mut plain = FloatDct::new(&table, 0);
        let mut lifted = FloatDct::new(&table, 2);

        let source: [i32; 64] = core::array::from_fn(|i| (i as i32 * 3) % 256);
        let mut coarse = [0_i32; 64];
        let mut fine = [0_i32; 64];
        plain.forward(&source, &mut coarse, 128);
        lifted.forward(&source, &mut fine, 128);

        // the preshifted kernel carries two extra fractional bits
        for (c, f) in coarse.iter().zip(fine.iter()) {
            assert!((f - (c << 2)).abs() <= 2, "{c} vs {f}");
        }
    }
}
