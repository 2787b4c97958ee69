//! # SMP Bring-up Parameters

/// Maximum number of logical CPUs the registry can hold.
pub const MAX_CPUS: usize = 16;

/// How many coarse clock ticks `smp_init` waits for a started application
/// processor to report itself online before giving up on it.
///
/// The platform tick source is expected to run at roughly 100 Hz, making
/// this a ~500 ms window per CPU. A processor that misses it is logged and
/// excluded; boot continues with fewer CPUs rather than hanging.
pub const AP_START_TIMEOUT_TICKS: u64 = 50;

const _: () = {
    assert!(MAX_CPUS >= 1);
    assert!(AP_START_TIMEOUT_TICKS > 0);
};
