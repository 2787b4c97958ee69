//! # Kernel Configuration Constants
//!
//! Compile-time configuration shared by the concurrency and SMP-coordination
//! subsystem. Centralizing these here keeps the per-CPU layout, bring-up
//! timing and capacity limits in one place and prevents configuration drift
//! between the crates that consume them.

#![no_std]

pub mod memory;
pub mod smp;
