//! Shared constants and small helpers.

use core::fmt;

/// Maximum number of components in a scan, and the number of table slots.
pub const MAX_COMPONENTS: usize = 4;

/// Size of one coefficient block.
pub const DCT_BLOCK: usize = 64;

/// Natural order position of each zig-zag index.
///
/// The extra 16 entries absorb over-running run lengths from corrupt
/// streams without a bounds check in the hot loop.
#[rustfmt::skip]
pub const UN_ZIGZAG: [usize; 64 + 16] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
    // overflow guard
    63, 63, 63, 63, 63, 63, 63, 63,
    63, 63, 63, 63, 63, 63, 63, 63
];

/// Zig-zag position of each natural order index, the inverse of
/// [`UN_ZIGZAG`].
#[rustfmt::skip]
pub const ZIGZAG: [usize; 64] = [
     0,  1,  5,  6, 14, 15, 27, 28,
     2,  4,  7, 13, 16, 26, 29, 42,
     3,  8, 12, 17, 25, 30, 41, 43,
     9, 11, 18, 24, 31, 40, 44, 53,
    10, 19, 23, 32, 39, 45, 52, 54,
    20, 22, 33, 38, 46, 51, 55, 60,
    21, 34, 37, 47, 50, 56, 59, 61,
    35, 36, 48, 49, 57, 58, 62, 63
];

/// The frame type identified by a start-of-frame marker.
#[derive(Eq, PartialEq, Copy, Clone)]
pub enum SofMarker {
    /// SOF0, 8 bit sequential DCT.
    BaselineDct,
    /// SOF1, up to 12 bit sequential DCT.
    ExtendedSequentialHuffman,
    /// SOF2, progressive DCT.
    ProgressiveDctHuffman,
    /// SOF3, lossless predictive.
    LosslessHuffman,
    /// SOF5, differential sequential (hierarchical only).
    DifferentialSequentialHuffman,
    /// SOF6, differential progressive (hierarchical only).
    DifferentialProgressiveHuffman,
    /// SOF7, differential lossless (hierarchical only).
    DifferentialLosslessHuffman,
    /// SOF9, sequential DCT, arithmetic coding.
    ExtendedSequentialArithmetic,
    /// SOF10, progressive DCT, arithmetic coding.
    ProgressiveDctArithmetic,
    /// SOF11, lossless predictive, arithmetic coding.
    LosslessArithmetic,
    /// SOF13, differential sequential, arithmetic (hierarchical only).
    DifferentialSequentialArithmetic,
    /// SOF14, differential progressive, arithmetic (hierarchical only).
    DifferentialProgressiveArithmetic
}

impl SofMarker {
    /// Map an SOF index (the `n` of `SOFn`) to a frame type.
    #[must_use]
    pub fn from_sof_index(n: u8) -> Option<SofMarker> {
        match n {
            0 => Some(Self::BaselineDct),
            1 => Some(Self::ExtendedSequentialHuffman),
            2 => Some(Self::ProgressiveDctHuffman),
            3 => Some(Self::LosslessHuffman),
            5 => Some(Self::DifferentialSequentialHuffman),
            6 => Some(Self::DifferentialProgressiveHuffman),
            7 => Some(Self::DifferentialLosslessHuffman),
            9 => Some(Self::ExtendedSequentialArithmetic),
            10 => Some(Self::ProgressiveDctArithmetic),
            11 => Some(Self::LosslessArithmetic),
            13 => Some(Self::DifferentialSequentialArithmetic),
            14 => Some(Self::DifferentialProgressiveArithmetic),
            _ => None
        }
    }

    /// The `n` of the `SOFn` marker this frame type is announced with.
    #[must_use]
    pub fn sof_index(self) -> u8 {
        match self {
            Self::BaselineDct => 0,
            Self::ExtendedSequentialHuffman => 1,
            Self::ProgressiveDctHuffman => 2,
            Self::LosslessHuffman => 3,
            Self::DifferentialSequentialHuffman => 5,
            Self::DifferentialProgressiveHuffman => 6,
            Self::DifferentialLosslessHuffman => 7,
            Self::ExtendedSequentialArithmetic => 9,
            Self::ProgressiveDctArithmetic => 10,
            Self::LosslessArithmetic => 11,
            Self::DifferentialSequentialArithmetic => 13,
            Self::DifferentialProgressiveArithmetic => 14
        }
    }

    /// Whether this frame type is DCT based and sequential.
    #[must_use]
    pub fn is_sequential_dct(self) -> bool {
        matches!(
            self,
            Self::BaselineDct
                | Self::ExtendedSequentialHuffman
                | Self::ExtendedSequentialArithmetic
        )
    }

    #[must_use]
    pub fn is_progressive(self) -> bool {
        matches!(
            self,
            Self::ProgressiveDctHuffman | Self::ProgressiveDctArithmetic
        )
    }

    #[must_use]
    pub fn is_lossless(self) -> bool {
        matches!(self, Self::LosslessHuffman | Self::LosslessArithmetic)
    }

    /// Whether the entropy coder is the arithmetic one.
    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::ExtendedSequentialArithmetic
                | Self::ProgressiveDctArithmetic
                | Self::LosslessArithmetic
                | Self::DifferentialSequentialArithmetic
                | Self::DifferentialProgressiveArithmetic
        )
    }

    /// Differential frame types only occur inside a hierarchical image.
    #[must_use]
    pub fn is_differential(self) -> bool {
        matches!(
            self,
            Self::DifferentialSequentialHuffman
                | Self::DifferentialProgressiveHuffman
                | Self::DifferentialLosslessHuffman
                | Self::DifferentialSequentialArithmetic
                | Self::DifferentialProgressiveArithmetic
        )
    }
}

impl Default for SofMarker {
    fn default() -> Self {
        Self::BaselineDct
    }
}

impl fmt::Debug for SofMarker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BaselineDct => write!(f, "Baseline DCT"),
            Self::ExtendedSequentialHuffman => write!(f, "Extended sequential DCT, Huffman"),
            Self::ProgressiveDctHuffman => write!(f, "Progressive DCT, Huffman"),
            Self::LosslessHuffman => write!(f, "Lossless (sequential), Huffman"),
            Self::DifferentialSequentialHuffman => write!(f, "Differential sequential DCT"),
            Self::DifferentialProgressiveHuffman => write!(f, "Differential progressive DCT"),
            Self::DifferentialLosslessHuffman => write!(f, "Differential lossless"),
            Self::ExtendedSequentialArithmetic => {
                write!(f, "Extended sequential DCT, arithmetic")
            }
            Self::ProgressiveDctArithmetic => write!(f, "Progressive DCT, arithmetic"),
            Self::LosslessArithmetic => write!(f, "Lossless (sequential), arithmetic"),
            Self::DifferentialSequentialArithmetic => {
                write!(f, "Differential sequential DCT, arithmetic")
            }
            Self::DifferentialProgressiveArithmetic => {
                write!(f, "Differential progressive DCT, arithmetic")
            }
        }
    }
}

/// Number of bits needed to represent `value`'s magnitude, the JPEG
/// "category" of a difference.
#[inline]
#[must_use]
pub fn bit_category(value: i32) -> u8 {
    let magnitude = value.unsigned_abs();
    (32 - magnitude.leading_zeros()) as u8
}

/// Reduce a DC or prediction difference modulo 2^16 into the coding
/// window `-32767..=32768`, where 32768 is the no-magnitude-bits special
/// case of category 16.
#[inline]
#[must_use]
pub fn reduce_dc_diff(diff: i32) -> i32 {
    let reduced = diff.rem_euclid(65536);
    if reduced > 32768 {
        reduced - 65536
    } else {
        reduced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zig_zag_tables_are_inverses() {
        for i in 0..64 {
            assert_eq!(ZIGZAG[UN_ZIGZAG[i]], i);
        }
    }

    #[test]
    fn diff_reduction_window() {
        assert_eq!(reduce_dc_diff(0), 0);
        assert_eq!(reduce_dc_diff(32767), 32767);
        assert_eq!(reduce_dc_diff(-32768), 32768);
        assert_eq!(reduce_dc_diff(32768), 32768);
        assert_eq!(reduce_dc_diff(40000), 40000 - 65536);
        assert_eq!(reduce_dc_diff(-40000), 65536 - 40000);
    }

    #[test]
    fn categories() {
        assert_eq!(bit_category(0), 0);
        assert_eq!(bit_category(1), 1);
        assert_eq!(bit_category(-1), 1);
        assert_eq!(bit_category(255), 8);
        assert_eq!(bit_category(-32768), 16);
    }
}
