#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use std::time::SystemTime;

mod id;
pub use id::*;

/// Subnets are carried in CIDR form, e.g. `10.1.0.0/24`.
pub use ipnet::IpNet;

/// Rates are carried as kilobits per second throughout the control loop.
pub type Kbps = f64;

/// Returns the current UNIX timestamp in microseconds.
///
/// Returns 0 if the system clock is set before the UNIX epoch.
#[inline]
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Converts a bits-per-second reading into [`Kbps`].
#[inline]
pub fn bps_to_kbps(bps: f64) -> Kbps {
    bps / 1_000.0
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;
}
