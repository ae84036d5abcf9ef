/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Daemon-wide counters, exposed through the root container's
//! `porto_stat` data key.

use std::fmt::{Display, Formatter};

#[derive(Debug, Default)]
pub struct Stats {
    /// Payloads started, respawns included.
    pub spawned: u64,
    /// Containers restored after a worker restart.
    pub restored: u64,
    /// Containers whose restore failed.
    pub restore_failed: u64,
    /// Errors swallowed by the reactor (signal handling, rotation).
    pub errors: u64,
    pub warnings: u64,
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "spawned:{};restored:{};restore_failed:{};errors:{};warnings:{}",
            self.spawned,
            self.restored,
            self.restore_failed,
            self.errors,
            self.warnings
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let stats = Stats { spawned: 3, errors: 1, ..Stats::default() };
        assert_eq!(
            stats.to_string(),
            "spawned:3;restored:0;restore_failed:0;errors:1;warnings:0"
        );
    }
}
