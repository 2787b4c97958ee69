//! 64-bit GDT code/data descriptor encodings.
//!
//! In long mode the base and limit of code/data descriptors are ignored;
//! paging provides memory protection. What still matters is the type
//! (code vs data), S, DPL, P, and for code segments the L bit (64-bit)
//! with DB forced to 0. The constructors here set those invariants so no
//! caller twiddles bits by hand.

use crate::privilege::Dpl;
use bitfield_struct::bitfield;

/// Bit layout of a 64-bit code segment descriptor.
///
/// `from_code_dpl` fixes `typ = 0b1010` (execute + read), `s = 1`,
/// `l = 1`, `db = 0`, `p = 1`; base and limit stay zero.
#[bitfield(u64)]
pub struct CodeDescBits {
    pub limit_lo: u16, // [15:0]   (ignored in long mode)
    pub base_lo: u16,  // [31:16]  (ignored in long mode)
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0b1010 (exec+read)
    pub s: bool,       // [44]     = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]  = 0 or 3
    pub p: bool,       // [47]     = 1
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 1 (64-bit code)
    pub db: bool,      // [54]     = 0 when L=1
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// Bit layout of a data/stack segment descriptor.
///
/// `from_data_dpl` fixes `typ = 0b0010` (read/write), `s = 1`, `l = 0`,
/// `p = 1`. DB has no meaning for 64-bit data segments and stays 0.
#[bitfield(u64)]
pub struct DataDescBits {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0b0010 (read/write data)
    pub s: bool,       // [44]     = 1
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]     = 1
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 0 for data
    pub db: bool,      // [54]
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// A single 8-byte GDT entry with code or data view.
///
/// Use the constructors to build valid 64-bit descriptors; `raw` exists
/// for table emission.
#[repr(C)]
#[derive(Copy, Clone)]
pub union Desc64 {
    pub raw: u64,
    pub code: CodeDescBits,
    pub data: DataDescBits,
}

impl Desc64 {
    /// The null descriptor required at GDT index 0.
    #[must_use]
    pub const fn null() -> Self {
        Self { raw: 0 }
    }

    /// Build a 64-bit code descriptor (execute+read, `L=1`, `DB=0`).
    #[must_use]
    pub const fn from_code_dpl(dpl: Dpl) -> Self {
        let code = CodeDescBits::new()
            .with_typ(0b1010)
            .with_s(true)
            .with_dpl(dpl.into_bits())
            .with_p(true)
            .with_l(true) // 64-bit code
            .with_db(false); // must be 0 with L=1
        Self { code }
    }

    /// Build a data/stack descriptor (read/write, `L=0`).
    #[must_use]
    pub const fn from_data_dpl(dpl: Dpl) -> Self {
        let data = DataDescBits::new()
            .with_typ(0b0010)
            .with_s(true)
            .with_dpl(dpl.into_bits())
            .with_p(true);
        Self { data }
    }

    /// Raw 64-bit encoding (valid to read for either variant).
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        // Reading the `raw` field is always valid.
        unsafe { self.raw }
    }
}

// Size guards: each descriptor is exactly 8 bytes.
const _: () = {
    assert!(size_of::<CodeDescBits>() == 8);
    assert!(size_of::<DataDescBits>() == 8);
    assert!(size_of::<Desc64>() == 8);
};

#[cfg(test)]
mod tests {
    use super::*;

    // Reference encodings for the SDM flat model.
    #[test]
    fn known_encodings() {
        assert_eq!(Desc64::null().to_u64(), 0);
        assert_eq!(Desc64::from_code_dpl(Dpl::Ring0).to_u64(), 0x0020_9A00_0000_0000);
        assert_eq!(Desc64::from_data_dpl(Dpl::Ring0).to_u64(), 0x0000_9200_0000_0000);
        assert_eq!(Desc64::from_code_dpl(Dpl::Ring3).to_u64(), 0x0020_FA00_0000_0000);
        assert_eq!(Desc64::from_data_dpl(Dpl::Ring3).to_u64(), 0x0000_F200_0000_0000);
    }
}
