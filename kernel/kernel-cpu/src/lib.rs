//! # Per-CPU Descriptors & Privilege-Stack Management
//!
//! Everything one logical processor needs to take interrupts and switch
//! privilege levels safely: a private GDT, a private 64-bit TSS with its
//! Ring-0 and IST stack pointers, and the bookkeeping that ties a CPU to
//! its identity, kernel stack and currently running task.
//!
//! The [`CpuRegistry`] is the fixed-capacity table of all [`PerCpu`]
//! descriptors, populated exactly once during bring-up from the firmware
//! enumeration. Each CPU installs its own tables (`lgdt`, segment reload,
//! `ltr`) and publishes its descriptor through the GS base so
//! [`PerCpu::current`] resolves without locks.
//!
//! Hardware table encodings follow the Intel SDM bit for bit and are
//! checked by compile-time size and selector asserts. On hosted targets
//! the install paths compile out and `current()` falls back to a settable
//! thread-local, which is what the unit tests use.

#![cfg_attr(target_os = "none", no_std)]
#![allow(unsafe_code)]

pub mod gdt;
pub mod per_cpu;
pub mod privilege;
pub mod registry;
pub mod stack_layout;
pub mod tss;

pub use per_cpu::{CpuTables, PerCpu};
pub use registry::{CpuInfo, CpuRegistry, RegistryError};
pub use tss::{Ist, Tss64, TssError};
