//! # Privilege Levels (x86-64)
//!
//! The two-bit privilege level appears in two places this crate encodes:
//!
//! | Concept | Stored in | Meaning |
//! |---------|-----------|---------|
//! | [`Rpl`] | the low 2 bits of a selector | requested privilege level |
//! | [`Dpl`] | bits 45..46 of a descriptor | descriptor privilege level |
//!
//! Long-mode kernels use only two of the four architectural rings: 0 for
//! the kernel, 3 for userland. The variants for rings 1 and 2 exist so
//! decoding arbitrary selector/descriptor bits is total.

/// Requested Privilege Level, the low 2 bits of a segment selector.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Rpl {
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

/// RPL mask in a 16-bit selector.
pub const RPL_MASK: u16 = 0b11;

impl Rpl {
    /// Encode as the low two bits of a selector.
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u16 {
        self as u16
    }

    /// Decode from the low two bits.
    #[inline]
    #[must_use]
    pub const fn from_bits(value_low2: u16) -> Self {
        match value_low2 & RPL_MASK {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }
}

/// Descriptor Privilege Level, stored in the descriptor itself.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Dpl {
    Ring0 = 0,
    Ring1 = 1,
    Ring2 = 2,
    Ring3 = 3,
}

impl Dpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Ring0,
            1 => Self::Ring1,
            2 => Self::Ring2,
            _ => Self::Ring3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpl_bits_roundtrip() {
        for b in 0u16..=3 {
            assert_eq!(Rpl::from_bits(b).into_bits(), b);
        }
    }

    #[test]
    fn dpl_decoding_masks_high_bits() {
        assert_eq!(Dpl::from_bits(0b111), Dpl::Ring3);
        assert_eq!(Dpl::from_bits(0b100), Dpl::Ring0);
    }
}
