// SPDX-License-Identifier: GPL-2.0
//
// exynos_dvfs: error taxonomy
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use crate::platform::DomainId;

pub type Result<T> = std::result::Result<T, DvfsError>;

/// Failures surfaced by the controller core.
///
/// Reaching the edge of a frequency table is not an error: table walks return
/// `None` and callers treat that as "no change".
#[derive(Debug, thiserror::Error)]
pub enum DvfsError {
    #[error("invalid value {value:?} for tunable {name}: {reason}")]
    InvalidTunable {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unknown tunable: {0}")]
    UnknownTunable(String),

    #[error("tunable {0} is read-only")]
    ReadOnlyTunable(String),

    #[error("invalid frequency table: {0}")]
    InvalidTable(String),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("frequency request for {domain} to {target_khz} kHz failed: {reason}")]
    PlatformRequestFailed {
        domain: DomainId,
        target_khz: u32,
        reason: String,
    },

    #[error("platform not ready: {0}")]
    PlatformNotReady(String),

    #[error("thermal emergency on {zone}: {temp_c} C reached shutdown threshold {shutdown_c} C")]
    ThermalEmergency {
        zone: String,
        temp_c: i32,
        shutdown_c: i32,
    },

    #[error("voltage {volt_uv} uV out of range [{min_uv}, {max_uv}]")]
    VoltageOutOfRange { volt_uv: u32, min_uv: u32, max_uv: u32 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn sampling task {name}: {source}")]
    TaskSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sampling task {name} panicked")]
    TaskPanicked { name: String },
}

impl DvfsError {
    pub(crate) fn invalid(name: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        DvfsError::InvalidTunable {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
