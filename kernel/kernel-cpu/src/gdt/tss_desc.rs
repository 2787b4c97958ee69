//! 16-byte TSS system descriptor (two consecutive GDT entries).

use bitfield_struct::bitfield;
use kernel_addr::VirtAddr;

/// Low 8 bytes of a 64-bit *Available TSS* descriptor (type = 0x9, S=0).
#[bitfield(u64)]
pub struct TssDescLow {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]

    pub base_mid: u8, // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0x9 (Available 64-bit TSS)
    pub s: bool,      // [44]    = 0 (system)
    #[bits(2)]
    pub dpl: u8, // [46:45] typically 0
    pub p: bool,      // [47]    = 1

    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,   // [52]    = 0
    pub zero1: bool, // [53]    = 0 (must be 0 for system types)
    pub zero2: bool, // [54]    = 0 (must be 0 for system types)
    pub g: bool,     // [55] granularity (0 for byte granularity)
    pub base_hi: u8, // [63:56]
}

/// High 8 bytes of a 64-bit TSS descriptor: `base[63:32]`, reserved=0.
#[bitfield(u64)]
pub struct TssDescHigh {
    pub base_upper: u32, // [31:0]  base[63:32]
    reserved: u32,       // [63:32] must be 0
}

/// The full 16-byte TSS system descriptor.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct TssDesc64 {
    pub low: TssDescLow,
    pub high: TssDescHigh,
}

impl TssDesc64 {
    /// Build a 64-bit *Available TSS* descriptor (type 0x9).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(tss_base: VirtAddr, tss_limit: u32) -> Self {
        let limit_lo = (tss_limit & 0xFFFF) as u16;
        let limit_hi = ((tss_limit >> 16) & 0xF) as u8;

        let base_lo = (tss_base.as_u64() & 0xFFFF) as u16;
        let base_mid = ((tss_base.as_u64() >> 16) & 0xFF) as u8;
        let base_hi = ((tss_base.as_u64() >> 24) & 0xFF) as u8;
        let base_upper = (tss_base.as_u64() >> 32) as u32;

        let low = TssDescLow::new()
            .with_limit_lo(limit_lo)
            .with_base_lo(base_lo)
            .with_base_mid(base_mid)
            .with_typ(0x9) // Available 64-bit TSS
            .with_s(false) // system descriptor
            .with_dpl(0)
            .with_p(true)
            .with_limit_hi(limit_hi)
            .with_base_hi(base_hi);

        let high = TssDescHigh::new().with_base_upper(base_upper);

        Self { low, high }
    }
}

const _: () = {
    assert!(size_of::<TssDescLow>() == 8);
    assert!(size_of::<TssDescHigh>() == 8);
    assert!(size_of::<TssDesc64>() == 16);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_splits_across_both_words() {
        let base = VirtAddr::new(0xffff_ff10_1234_5678);
        let d = TssDesc64::new(base, 103);

        assert_eq!(d.low.limit_lo(), 103);
        assert_eq!(d.low.base_lo(), 0x5678);
        assert_eq!(d.low.base_mid(), 0x34);
        assert_eq!(d.low.base_hi(), 0x12);
        assert_eq!(d.high.base_upper(), 0xffff_ff10);
        assert_eq!(d.low.typ(), 0x9);
        assert!(d.low.p());
        assert!(!d.low.s());
    }
}
