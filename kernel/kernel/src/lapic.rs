//! # Local APIC (x2APIC mode)
//!
//! Thin driver over the MSR-mapped x2APIC register file: enabling the
//! unit on the current CPU, end-of-interrupt signaling, and composing
//! interrupt command register writes for fixed-vector IPIs and the
//! INIT/STARTUP sequence that wakes application processors.
//!
//! Register layout and command encodings follow the Intel SDM vol. 3A;
//! everything that touches an MSR is gated to bare metal while the ICR
//! composition stays testable anywhere.

use bitfield_struct::bitfield;

use crate::ipi::IpiController;

/// `IA32_APIC_BASE`, holds the global enable and x2APIC mode bits.
#[cfg(target_os = "none")]
const IA32_APIC_BASE: u32 = 0x1B;
/// xAPIC global enable in `IA32_APIC_BASE`.
#[cfg(target_os = "none")]
const APIC_EN: u64 = 1 << 11;
/// x2APIC mode select in `IA32_APIC_BASE`.
#[cfg(target_os = "none")]
const APIC_EXTD: u64 = 1 << 10;

/// Read-only local APIC id.
#[cfg(target_os = "none")]
const IA32_X2APIC_ID: u32 = 0x802;
/// End-of-interrupt register, write-only, value ignored.
#[cfg(target_os = "none")]
const IA32_X2APIC_EOI: u32 = 0x80B;
/// Spurious interrupt vector register, bit 8 is the software enable.
#[cfg(target_os = "none")]
const IA32_X2APIC_SIVR: u32 = 0x80F;
/// Interrupt command register; in x2APIC mode a single 64-bit write
/// with the destination APIC id in the upper half.
#[cfg(target_os = "none")]
const IA32_X2APIC_ICR: u32 = 0x830;

/// Vector delivered for spurious interrupts once the APIC is enabled.
#[cfg(target_os = "none")]
const SPURIOUS_VECTOR: u8 = 0xFF;

/// ICR delivery mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    /// Deliver the vector in the low byte.
    Fixed = 0b000,
    /// INIT assert, resets the target into wait-for-SIPI.
    Init = 0b101,
    /// STARTUP, vector encodes the real-mode entry page.
    Startup = 0b110,
}

impl DeliveryMode {
    const fn into_bits(self) -> u64 {
        self as u64
    }

    const fn from_bits(bits: u64) -> Self {
        match bits {
            0b101 => Self::Init,
            0b110 => Self::Startup,
            _ => Self::Fixed,
        }
    }
}

/// x2APIC interrupt command register.
#[bitfield(u64)]
pub struct IcrBits {
    vector: u8,
    #[bits(3)]
    delivery_mode: DeliveryMode,
    /// Logical destination mode; we always address by physical APIC id.
    logical_destination: bool,
    /// Delivery status (bit 12) is read-only and reserved bit 13 must be 0.
    #[bits(2)]
    __res12_13: u8,
    /// Level assert, must be set for everything except INIT de-assert.
    assert: bool,
    /// Level-triggered; only meaningful for INIT.
    level_triggered: bool,
    /// Reserved (bits 16..31): must be 0.
    #[bits(16)]
    __res16_31: u16,
    destination: u32,
}

/// ICR value for a fixed-vector IPI to one CPU.
pub const fn icr_fixed(apic_id: u32, vector: u8) -> u64 {
    IcrBits::new()
        .with_vector(vector)
        .with_delivery_mode(DeliveryMode::Fixed)
        .with_assert(true)
        .with_destination(apic_id)
        .into_bits()
}

/// ICR value asserting INIT on one CPU.
pub const fn icr_init(apic_id: u32) -> u64 {
    IcrBits::new()
        .with_delivery_mode(DeliveryMode::Init)
        .with_assert(true)
        .with_level_triggered(true)
        .with_destination(apic_id)
        .into_bits()
}

/// ICR value for a STARTUP IPI. The target begins real-mode execution
/// at `vector * 0x1000`, so `vector` is the page number of the AP
/// trampoline below 1 MiB.
pub const fn icr_startup(apic_id: u32, vector: u8) -> u64 {
    IcrBits::new()
        .with_vector(vector)
        .with_delivery_mode(DeliveryMode::Startup)
        .with_assert(true)
        .with_destination(apic_id)
        .into_bits()
}

#[cfg(target_os = "none")]
fn rdmsr(msr: u32) -> u64 {
    let (low, high): (u32, u32);
    // SAFETY: reading an architectural MSR has no side effects beyond
    // the returned value; callers pass valid MSR numbers.
    unsafe {
        core::arch::asm!(
            "rdmsr",
            in("ecx") msr,
            out("eax") low,
            out("edx") high,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(high) << 32) | u64::from(low)
}

#[cfg(target_os = "none")]
unsafe fn wrmsr(msr: u32, value: u64) {
    // SAFETY: the caller vouches that writing this MSR with this value
    // is sound on the current CPU.
    unsafe {
        core::arch::asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") value as u32,
            in("edx") (value >> 32) as u32,
            options(nomem, nostack, preserves_flags),
        );
    }
}

/// Put the current CPU's APIC into x2APIC mode and software-enable it.
/// Each CPU runs this once during its own initialization.
#[cfg(target_os = "none")]
pub fn enable_current_cpu() {
    let base = rdmsr(IA32_APIC_BASE);
    // SAFETY: setting EN and EXTD is the architecturally documented
    // transition into x2APIC mode; EXTD without EN is the only illegal
    // combination and we set both.
    unsafe {
        wrmsr(IA32_APIC_BASE, base | APIC_EN | APIC_EXTD);
        wrmsr(IA32_X2APIC_SIVR, (1 << 8) | u64::from(SPURIOUS_VECTOR));
    }
    log::debug!("x2APIC enabled, id {}", current_apic_id());
}

/// APIC id of the executing CPU.
#[cfg(target_os = "none")]
pub fn current_apic_id() -> u32 {
    rdmsr(IA32_X2APIC_ID) as u32
}

/// Signal end-of-interrupt for the in-service vector.
#[cfg(target_os = "none")]
pub fn eoi() {
    // SAFETY: the EOI register accepts any value and only acknowledges
    // the highest in-service interrupt of this CPU.
    unsafe { wrmsr(IA32_X2APIC_EOI, 0) };
}

/// IPI backend driving the real interrupt command register.
pub struct X2Apic;

#[cfg(target_os = "none")]
impl X2Apic {
    /// Assert INIT on an AP, putting it into wait-for-SIPI.
    pub fn send_init(&self, apic_id: u32) {
        // SAFETY: a single 64-bit ICR write is the complete command in
        // x2APIC mode; no delivery-status polling is required.
        unsafe { wrmsr(IA32_X2APIC_ICR, icr_init(apic_id)) };
    }

    /// Send a STARTUP IPI pointing the AP at trampoline page `vector`.
    pub fn send_sipi(&self, apic_id: u32, vector: u8) {
        // SAFETY: as above.
        unsafe { wrmsr(IA32_X2APIC_ICR, icr_startup(apic_id, vector)) };
    }
}

#[cfg(target_os = "none")]
impl IpiController for X2Apic {
    fn send(&self, apic_id: u32, vector: u8) {
        // SAFETY: as in send_init.
        unsafe { wrmsr(IA32_X2APIC_ICR, icr_fixed(apic_id, vector)) };
    }
}

#[cfg(not(target_os = "none"))]
impl IpiController for X2Apic {
    fn send(&self, apic_id: u32, vector: u8) {
        log::trace!("x2APIC (hosted stub): IPI vector {vector:#x} to APIC {apic_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_icr_encoding() {
        // Vector 0xF2 to APIC id 3: assert bit 14, destination in the
        // upper dword.
        assert_eq!(icr_fixed(3, 0xF2), 0x0000_0003_0000_40F2);
    }

    #[test]
    fn init_icr_encoding() {
        // INIT is level-triggered and asserted, no vector.
        assert_eq!(icr_init(1), 0x0000_0001_0000_C500);
    }

    #[test]
    fn startup_icr_encoding() {
        // SIPI with trampoline at 0x8000 (page 8).
        assert_eq!(icr_startup(2, 0x08), 0x0000_0002_0000_4608);
    }

    #[test]
    fn delivery_mode_roundtrip() {
        for mode in [DeliveryMode::Fixed, DeliveryMode::Init, DeliveryMode::Startup] {
            assert_eq!(DeliveryMode::from_bits(mode.into_bits()), mode);
        }
    }
}
