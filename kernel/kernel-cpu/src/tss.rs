//! # 64-bit Task State Segment
//!
//! In long mode the CPU no longer performs hardware task switching, but it
//! still consults the TSS for two things:
//!
//! 1. **`rsp0`**: the Ring-0 stack loaded on a privilege-raising interrupt
//!    or exception (user to kernel). Refreshed on every dispatch so kernel
//!    entry always lands on the incoming task's own stack.
//! 2. **`ist1..ist7`**: the Interrupt Stack Table. An IDT gate carrying a
//!    non-zero IST index makes the CPU switch to that stack before pushing
//!    the frame, regardless of privilege level. Used for faults that must
//!    not trust the current stack (double fault, NMI, machine check).
//!
//! One TSS exists per CPU; it is referenced by a 16-byte system descriptor
//! in that CPU's GDT and loaded into the task register with `ltr`.

use kernel_addr::VirtAddr;

/// Errors from IST slot programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TssError {
    /// The hardware defines IST slots 1 through 7; slot 0 means "no IST"
    /// in an IDT gate and is not a programmable slot.
    #[error("IST slot {0} out of range 1..=7")]
    SlotOutOfRange(u8),
    /// Stack tops must be 16-byte aligned per the ABI.
    #[error("IST stack top {0:#x} not 16-byte aligned")]
    MisalignedStackTop(u64),
}

/// Named IST slot assignments for the fatal-fault handlers.
///
/// The numbering matches the hardware slot written into the IDT gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ist {
    /// Double fault; the one slot that is never optional, since #DF is
    /// precisely the case where the current stack cannot be trusted.
    DoubleFault = 1,
    /// Non-maskable interrupt.
    Nmi = 2,
    /// Machine check.
    MachineCheck = 3,
    /// Debug exception.
    Debug = 4,
}

impl Ist {
    /// The hardware IST slot number (1..=7).
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u8 {
        self as u8
    }
}

/// 64-bit Task State Segment, exactly as the hardware reads it.
///
/// All reserved fields must stay zero. `iopb_offset` equal to the size of
/// the structure means no I/O permission bitmap is present, so user port
/// I/O is governed purely by IOPL and always faults.
#[repr(C, packed)]
pub struct Tss64 {
    _reserved0: u32,

    /// Ring-0 stack pointer loaded on privilege elevation to CPL 0.
    rsp0: VirtAddr,
    /// Ring-1 stack pointer; unused.
    rsp1: VirtAddr,
    /// Ring-2 stack pointer; unused.
    rsp2: VirtAddr,

    _reserved1: u64,

    /// Interrupt Stack Table entries 1..=7.
    ist: [VirtAddr; 7],

    _reserved2: u64,
    _reserved3: u16,

    /// Byte offset from the TSS base to the I/O permission bitmap.
    iopb_offset: u16,
}

impl Tss64 {
    /// An empty TSS with the I/O bitmap disabled.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new() -> Self {
        Self {
            _reserved0: 0,
            rsp0: VirtAddr::zero(),
            rsp1: VirtAddr::zero(),
            rsp2: VirtAddr::zero(),
            _reserved1: 0,
            ist: [VirtAddr::zero(); 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }

    /// Update the Ring-0 stack used on user-to-kernel transitions.
    pub const fn set_rsp0(&mut self, top: VirtAddr) {
        self.rsp0 = top;
    }

    /// The currently programmed Ring-0 stack top.
    #[must_use]
    pub const fn rsp0(&self) -> VirtAddr {
        self.rsp0
    }

    /// Program IST slot `slot` (1..=7) with a 16-byte-aligned stack top.
    ///
    /// # Errors
    /// [`TssError::SlotOutOfRange`] for slot 0 or anything above 7,
    /// [`TssError::MisalignedStackTop`] if `top` is not 16-byte aligned.
    pub const fn set_ist_slot(&mut self, slot: u8, top: VirtAddr) -> Result<(), TssError> {
        if slot < 1 || slot > 7 {
            return Err(TssError::SlotOutOfRange(slot));
        }
        if !top.is_aligned(16) {
            return Err(TssError::MisalignedStackTop(top.as_u64()));
        }
        self.ist[(slot - 1) as usize] = top;
        Ok(())
    }

    /// Read back IST slot `slot` (1..=7).
    ///
    /// # Errors
    /// [`TssError::SlotOutOfRange`] for slot 0 or anything above 7.
    pub const fn ist_slot(&self, slot: u8) -> Result<VirtAddr, TssError> {
        if slot < 1 || slot > 7 {
            return Err(TssError::SlotOutOfRange(slot));
        }
        Ok(self.ist[(slot - 1) as usize])
    }
}

impl Default for Tss64 {
    fn default() -> Self {
        Self::new()
    }
}

// The hardware layout is exactly 104 bytes; anything else means a field
// or reserved gap is wrong and the CPU would read garbage stack pointers.
const _: () = assert!(size_of::<Tss64>() == 104);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ist_slots_roundtrip() {
        let mut tss = Tss64::new();
        for slot in 1u8..=7 {
            let top = VirtAddr::new(0xffff_ff10_0000_0000 + u64::from(slot) * 0x2_0000);
            tss.set_ist_slot(slot, top).unwrap();
            assert_eq!(tss.ist_slot(slot).unwrap(), top);
        }
        // Slots are independent.
        assert_ne!(tss.ist_slot(1).unwrap(), tss.ist_slot(7).unwrap());
    }

    #[test]
    fn slot_zero_and_eight_rejected() {
        let mut tss = Tss64::new();
        let top = VirtAddr::new(0x1000);
        assert_eq!(tss.set_ist_slot(0, top), Err(TssError::SlotOutOfRange(0)));
        assert_eq!(tss.set_ist_slot(8, top), Err(TssError::SlotOutOfRange(8)));
        assert_eq!(tss.ist_slot(0), Err(TssError::SlotOutOfRange(0)));
        assert_eq!(tss.ist_slot(8), Err(TssError::SlotOutOfRange(8)));
    }

    #[test]
    fn misaligned_top_rejected() {
        let mut tss = Tss64::new();
        let err = tss.set_ist_slot(1, VirtAddr::new(0x1008)).unwrap_err();
        assert_eq!(err, TssError::MisalignedStackTop(0x1008));
        // The slot stays untouched after a failed write.
        assert!(tss.ist_slot(1).unwrap().is_null());
    }

    #[test]
    fn named_slots_match_hardware_numbering() {
        assert_eq!(Ist::DoubleFault.slot(), 1);
        assert_eq!(Ist::Nmi.slot(), 2);
        assert_eq!(Ist::MachineCheck.slot(), 3);
        assert_eq!(Ist::Debug.slot(), 4);
    }

    #[test]
    fn rsp0_updates() {
        let mut tss = Tss64::new();
        assert!(tss.rsp0().is_null());
        tss.set_rsp0(VirtAddr::new(0xffff_ff00_0000_9000));
        assert_eq!(tss.rsp0().as_u64(), 0xffff_ff00_0000_9000);
    }
}
