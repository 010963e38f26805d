//! Colorspaces the codec can consume and produce.

#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ColorSpace {
    RGB,
    /// RGB with a don't-care fourth channel, useful for alignment.
    RGBX,
    YCbCr,
    Luma,
    Unknown
}

impl ColorSpace {
    #[must_use]
    pub const fn num_components(&self) -> usize {
        match self {
            Self::RGB | Self::YCbCr => 3,
            Self::RGBX => 4,
            Self::Luma => 1,
            Self::Unknown => 0
        }
    }

    #[must_use]
    pub const fn is_grayscale(&self) -> bool {
        matches!(self, Self::Luma)
    }
}

/// All colorspaces the codec understands.
pub static ALL_COLORSPACES: [ColorSpace; 4] = [
    ColorSpace::RGB,
    ColorSpace::RGBX,
    ColorSpace::YCbCr,
    ColorSpace::Luma
];
