//! Sample domain color transforms.
//!
//! All transforms work on rows of component planes at MCU width, and all
//! integer paths use 13 fractional bits. The reversible transform uses
//! modular wraparound so it is exact at any precision.

use jxt_core::options::ColorTransformKind;

/// Fixed point fractional bits of the YCbCr matrices.
const FIX_BITS: i32 = 13;
const FIX_HALF: i32 = 1 << (FIX_BITS - 1);

#[allow(dead_code)]
#[inline(always)]
fn fix(x: f64) -> i32 {
    (x * f64::from(1 << FIX_BITS) + 0.5) as i32
}

#[inline(always)]
fn clamp_to(x: i32, max_sample: i32) -> u16 {
    x.clamp(0, max_sample) as u16
}

/// Forward BT.601 RGB to YCbCr, full range, `half` is `2^(P-1)`.
pub fn rgb_to_ycbcr_row(
    r: &[u16], g: &[u16], b: &[u16], y: &mut [u16], cb: &mut [u16], cr: &mut [u16], half: i32,
    max_sample: i32
) {
    // 0.299 / 0.587 / 0.114 and friends at 13 bit precision
    let (cy_r, cy_g, cy_b) = (2449, 4809, 934);
    let (cb_r, cb_g, cb_b) = (-1382, -2714, 4096);
    let (cr_r, cr_g, cr_b) = (4096, -3430, -666);

    for i in 0..r.len() {
        let (rv, gv, bv) = (i32::from(r[i]), i32::from(g[i]), i32::from(b[i]));

        let yv = (cy_r * rv + cy_g * gv + cy_b * bv + FIX_HALF) >> FIX_BITS;
        let cbv = ((cb_r * rv + cb_g * gv + cb_b * bv + FIX_HALF) >> FIX_BITS) + half;
        let crv = ((cr_r * rv + cr_g * gv + cr_b * bv + FIX_HALF) >> FIX_BITS) + half;

        y[i] = clamp_to(yv, max_sample);
        cb[i] = clamp_to(cbv, max_sample);
        cr[i] = clamp_to(crv, max_sample);
    }
}

/// Inverse BT.601 YCbCr to RGB, full range.
pub fn ycbcr_to_rgb_row(
    y: &[u16], cb: &[u16], cr: &[u16], r: &mut [u16], g: &mut [u16], b: &mut [u16], half: i32,
    max_sample: i32
) {
    // 1.402 / 0.344136 / 0.714136 / 1.772 at 13 bit precision
    let (c_r_cr, c_g_cb, c_g_cr, c_b_cb) = (11485, 2819, 5850, 14516);

    for i in 0..y.len() {
        let yv = i32::from(y[i]);
        let cbv = i32::from(cb[i]) - half;
        let crv = i32::from(cr[i]) - half;

        let rv = yv + ((c_r_cr * crv + FIX_HALF) >> FIX_BITS);
        let gv = yv - ((c_g_cb * cbv + c_g_cr * crv + FIX_HALF) >> FIX_BITS);
        let bv = yv + ((c_b_cb * cbv + FIX_HALF) >> FIX_BITS);

        r[i] = clamp_to(rv, max_sample);
        g[i] = clamp_to(gv, max_sample);
        b[i] = clamp_to(bv, max_sample);
    }
}

/// Forward reversible transform, the JPEG-LS part 2 pseudo-RCT.
///
/// Green passes through as the luma channel, the chroma channels are
/// differences against green taken modulo `2^P` with a half-range offset.
/// Every tap is modular, which is what makes the inverse exact at any
/// precision.
pub fn rct_forward_row(
    r: &[u16], g: &[u16], b: &[u16], y: &mut [u16], cb: &mut [u16], cr: &mut [u16], half: i32,
    modulo: i32
) {
    for i in 0..r.len() {
        let (rv, gv, bv) = (i32::from(r[i]), i32::from(g[i]), i32::from(b[i]));

        let db = (bv - gv + half).rem_euclid(modulo);
        let dr = (rv - gv + half).rem_euclid(modulo);

        y[i] = g[i];
        cb[i] = db as u16;
        cr[i] = dr as u16;
    }
}

/// Inverse of [`rct_forward_row`]; exact.
pub fn rct_inverse_row(
    y: &[u16], cb: &[u16], cr: &[u16], r: &mut [u16], g: &mut [u16], b: &mut [u16], half: i32,
    modulo: i32
) {
    for i in 0..y.len() {
        let gv = i32::from(y[i]);
        let bv = (i32::from(cb[i]) - half + gv).rem_euclid(modulo);
        let rv = (i32::from(cr[i]) - half + gv).rem_euclid(modulo);

        g[i] = gv as u16;
        b[i] = bv as u16;
        r[i] = rv as u16;
    }
}

/// Free-form 3x3 matrix application over one row triple.
pub fn matrix_row(
    matrix: &[[f32; 3]; 3], c0: &[u16], c1: &[u16], c2: &[u16], o0: &mut [u16], o1: &mut [u16],
    o2: &mut [u16], max_sample: i32
) {
    for i in 0..c0.len() {
        let v = [f32::from(c0[i]), f32::from(c1[i]), f32::from(c2[i])];

        for (out, row) in [&mut *o0, &mut *o1, &mut *o2].into_iter().zip(matrix.iter()) {
            let mixed = row[0] * v[0] + row[1] * v[1] + row[2] * v[2];
            out[i] = clamp_to(mixed.round() as i32, max_sample);
        }
    }
}

/// A color transformer bound to one direction of one frame.
///
/// Stateless apart from the configuration; rows can be pushed through it
/// in any order.
pub struct ColorTransform {
    kind:       ColorTransformKind,
    half:       i32,
    max_sample: i32,
    modulo:     i32
}

impl ColorTransform {
    #[must_use]
    pub fn new(kind: ColorTransformKind, precision: u8) -> ColorTransform {
        ColorTransform {
            kind,
            half: 1 << (precision - 1),
            max_sample: (1 << precision) - 1,
            modulo: 1 << precision
        }
    }

    /// Number of planes this transform touches; one means pass-through.
    #[must_use]
    pub fn is_pass_through(&self) -> bool {
        matches!(self.kind, ColorTransformKind::None)
    }

    /// Forward transform (capture side): RGB-ish planes into coding
    /// planes. Planes beyond the first three pass through.
    pub fn forward_rows(&self, rows: &mut [&mut [u16]]) {
        if rows.len() < 3 {
            return;
        }
        let (first, rest) = rows.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);
        let c0 = &mut *first[0];
        let c1 = &mut *second[0];
        let c2 = &mut *third[0];

        let len = c0.len();
        let mut t0 = vec![0_u16; len];
        let mut t1 = vec![0_u16; len];
        let mut t2 = vec![0_u16; len];

        match &self.kind {
            ColorTransformKind::None => return,
            ColorTransformKind::YCbCr => {
                rgb_to_ycbcr_row(c0, c1, c2, &mut t0, &mut t1, &mut t2, self.half, self.max_sample);
            }
            ColorTransformKind::Rct => {
                rct_forward_row(c0, c1, c2, &mut t0, &mut t1, &mut t2, self.half, self.modulo);
            }
            ColorTransformKind::FreeForm { forward, .. } => {
                matrix_row(forward, c0, c1, c2, &mut t0, &mut t1, &mut t2, self.max_sample);
            }
        }

        c0.copy_from_slice(&t0);
        c1.copy_from_slice(&t1);
        c2.copy_from_slice(&t2);
    }

    /// Inverse transform (render side): coding planes back into RGB-ish
    /// planes.
    pub fn inverse_rows(&self, rows: &mut [&mut [u16]]) {
        if rows.len() < 3 {
            return;
        }
        let (first, rest) = rows.split_at_mut(1);
        let (second, third) = rest.split_at_mut(1);
        let c0 = &mut *first[0];
        let c1 = &mut *second[0];
        let c2 = &mut *third[0];

        let len = c0.len();
        let mut t0 = vec![0_u16; len];
        let mut t1 = vec![0_u16; len];
        let mut t2 = vec![0_u16; len];

        match &self.kind {
            ColorTransformKind::None => return,
            ColorTransformKind::YCbCr => {
                ycbcr_to_rgb_row(c0, c1, c2, &mut t0, &mut t1, &mut t2, self.half, self.max_sample);
            }
            ColorTransformKind::Rct => {
                rct_inverse_row(c0, c1, c2, &mut t0, &mut t1, &mut t2, self.half, self.modulo);
            }
            ColorTransformKind::FreeForm { inverse, .. } => {
                matrix_row(inverse, c0, c1, c2, &mut t0, &mut t1, &mut t2, self.max_sample);
            }
        }

        c0.copy_from_slice(&t0);
        c1.copy_from_slice(&t1);
        c2.copy_from_slice(&t2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_point_constants_match_their_floats() {
        assert_eq!(fix(0.299), 2449);
        assert_eq!(fix(0.587), 4809);
        assert_eq!(fix(0.114), 934);
        assert_eq!(fix(1.402), 11485);
        assert_eq!(fix(0.344_136), 2819);
        assert_eq!(fix(0.714_136), 5850);
        assert_eq!(fix(1.772), 14516);
        assert_eq!(fix(0.5), 4096);
    }

    #[test]
    fn ycbcr_round_trip_is_close() {
        let r: Vec<u16> = (0..=255).step_by(5).collect();
        let g: Vec<u16> = r.iter().map(|&v| 255 - v).collect();
        let b: Vec<u16> = r.iter().map(|&v| (v * 3) % 256).collect();

        let n = r.len();
        let (mut y, mut cb, mut cr) = (vec![0; n], vec![0; n], vec![0; n]);
        rgb_to_ycbcr_row(&r, &g, &b, &mut y, &mut cb, &mut cr, 128, 255);

        let (mut r2, mut g2, mut b2) = (vec![0; n], vec![0; n], vec![0; n]);
        ycbcr_to_rgb_row(&y, &cb, &cr, &mut r2, &mut g2, &mut b2, 128, 255);

        for i in 0..n {
            assert!((i32::from(r[i]) - i32::from(r2[i])).abs() <= 2);
            assert!((i32::from(g[i]) - i32::from(g2[i])).abs() <= 2);
            assert!((i32::from(b[i]) - i32::from(b2[i])).abs() <= 2);
        }
    }

    #[test]
    fn rct_round_trip_is_exact() {
        for precision in [8_u8, 12, 16] {
            let modulo = 1_i32 << precision;
            let half = modulo / 2;
            let max = (modulo - 1) as u16;

            let r: Vec<u16> = vec![0, 1, max, max / 2, 3, max - 1];
            let g: Vec<u16> = vec![max, 0, max, 1, max / 3, 7];
            let b: Vec<u16> = vec![0, max, 0, max / 5, 2, max - 2];

            let n = r.len();
            let (mut y, mut cb, mut cr) = (vec![0; n], vec![0; n], vec![0; n]);
            rct_forward_row(&r, &g, &b, &mut y, &mut cb, &mut cr, half, modulo);

            let (mut r2, mut g2, mut b2) = (vec![0; n], vec![0; n], vec![0; n]);
            rct_inverse_row(&y, &cb, &cr, &mut r2, &mut g2, &mut b2, half, modulo);

            assert_eq!(r, r2, "precision {precision}");
            assert_eq!(g, g2, "precision {precision}");
            assert_eq!(b, b2, "precision {precision}");
        }
    }
}
