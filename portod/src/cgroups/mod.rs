/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Cgroup-v1 subsystem management.
//!
//! Every container owns one directory per subsystem. The freezer
//! hierarchy keeps the container path as-is under `porto/`, all other
//! subsystems flatten it with `%` separators (`porto%a%b`), so a nested
//! container's non-freezer knobs are not subject to hierarchical
//! accounting from its parent.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{trace, warn};

pub use error::{CgroupsError, Result};

mod error;

const FROZEN: &str = "FROZEN";
const THAWED: &str = "THAWED";

/// Delay between freezer state polls. The freezer reports `FREEZING`
/// until every task in the subtree has been stopped.
const FREEZER_POLL_DELAY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Freezer,
    Memory,
    Cpu,
    Cpuacct,
    Devices,
    NetCls,
    Blkio,
}

impl Subsystem {
    pub const ALL: [Subsystem; 7] = [
        Subsystem::Freezer,
        Subsystem::Memory,
        Subsystem::Cpu,
        Subsystem::Cpuacct,
        Subsystem::Devices,
        Subsystem::NetCls,
        Subsystem::Blkio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Freezer => "freezer",
            Subsystem::Memory => "memory",
            Subsystem::Cpu => "cpu",
            Subsystem::Cpuacct => "cpuacct",
            Subsystem::Devices => "devices",
            Subsystem::NetCls => "net_cls",
            Subsystem::Blkio => "blkio",
        }
    }

    pub fn from_name(name: &str) -> Option<Subsystem> {
        Subsystem::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Path of a container's cgroup relative to the subsystem mount.
    pub fn relpath(&self, container: &str) -> String {
        match self {
            Subsystem::Freezer => format!("porto/{container}"),
            _ => {
                let mut path = String::from("porto");
                for segment in container.split('/') {
                    path.push('%');
                    path.push_str(segment);
                }
                path
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CgroupManager {
    root: PathBuf,
    freezer_timeout: Duration,
}

impl CgroupManager {
    pub fn new(freezer_timeout: Duration) -> Self {
        Self::with_root(PathBuf::from("/sys/fs/cgroup"), freezer_timeout)
    }

    pub fn with_root(root: PathBuf, freezer_timeout: Duration) -> Self {
        Self { root, freezer_timeout }
    }

    /// Absolute directory of a container's cgroup in one subsystem.
    pub fn dir(&self, subsystem: Subsystem, container: &str) -> PathBuf {
        self.root.join(subsystem.name()).join(subsystem.relpath(container))
    }

    /// True when the base hierarchies this daemon writes under exist.
    pub fn base_available(&self) -> bool {
        Subsystem::ALL
            .iter()
            .all(|subsystem| self.root.join(subsystem.name()).is_dir())
    }

    /// Creates the cgroup directory; repeated calls succeed.
    pub fn ensure(&self, subsystem: Subsystem, container: &str) -> Result<()> {
        let dir = self.dir(subsystem, container);
        fs::create_dir_all(&dir)
            .map_err(|e| CgroupsError::classify(dir.clone(), e))?;
        trace!("cgroup ensure {}", dir.display());
        Ok(())
    }

    /// Removes the cgroup directory. A missing directory is not an
    /// error. A busy directory gets one stray-migration pass: tasks
    /// that were manually moved in are pushed to the parent cgroup
    /// before the removal is retried.
    pub fn remove(&self, subsystem: Subsystem, container: &str) -> Result<()> {
        let dir = self.dir(subsystem, container);

        match fs::remove_dir(&dir) {
            Ok(_) => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(()),
            Err(e)
                if e.raw_os_error() == Some(libc::EBUSY)
                    || e.raw_os_error() == Some(libc::ENOTEMPTY) =>
            {
                warn!(
                    "cgroup {} busy on remove, migrating strays",
                    dir.display()
                );
                self.migrate_to_parent(&dir)?;
            }
            Err(e) => return Err(CgroupsError::classify(dir, e)),
        }

        match fs::remove_dir(&dir) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(CgroupsError::classify(dir, e)),
        }
    }

    /// Attaches a process to the cgroup.
    pub fn attach(
        &self,
        subsystem: Subsystem,
        container: &str,
        pid: Pid,
    ) -> Result<()> {
        let procs = self.dir(subsystem, container).join("cgroup.procs");
        append(&procs, &pid.as_raw().to_string())
            .map_err(|e| CgroupsError::classify(procs.clone(), e))
    }

    pub fn read_knob(
        &self,
        subsystem: Subsystem,
        container: &str,
        key: &str,
    ) -> Result<String> {
        let path = self.dir(subsystem, container).join(key);
        let value = fs::read_to_string(&path)
            .map_err(|e| CgroupsError::classify(path, e))?;
        Ok(value.trim_end().to_string())
    }

    pub fn write_knob(
        &self,
        subsystem: Subsystem,
        container: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let path = self.dir(subsystem, container).join(key);
        fs::write(&path, value)
            .map_err(|e| CgroupsError::classify(path.clone(), e))?;
        trace!("cgroup write {} = {value}", path.display());
        Ok(())
    }

    /// Pids of every process in the cgroup.
    pub fn list_procs(
        &self,
        subsystem: Subsystem,
        container: &str,
    ) -> Result<Vec<Pid>> {
        let path = self.dir(subsystem, container).join("cgroup.procs");
        let procs = fs::read_to_string(&path)
            .map_err(|e| CgroupsError::classify(path, e))?;

        Ok(procs
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .map(Pid::from_raw)
            .collect())
    }

    /// Signals every process in the container's freezer cgroup.
    pub fn kill_all(&self, container: &str, signal: Signal) -> Result<()> {
        for pid in self.list_procs(Subsystem::Freezer, container)? {
            if let Err(e) = kill(pid, signal) {
                // the task may have exited between the listing and the kill
                trace!("kill {pid} failed: {e}");
            }
        }
        Ok(())
    }

    /// Freezes the container subtree and polls until the kernel reports
    /// the transition complete.
    pub async fn freeze(&self, container: &str) -> Result<()> {
        self.write_knob(Subsystem::Freezer, container, "freezer.state", FROZEN)?;
        self.await_freezer_state(container, FROZEN).await
    }

    /// Thaws the container subtree.
    pub async fn thaw(&self, container: &str) -> Result<()> {
        self.write_knob(Subsystem::Freezer, container, "freezer.state", THAWED)?;
        self.await_freezer_state(container, THAWED).await
    }

    pub fn frozen(&self, container: &str) -> Result<bool> {
        let state =
            self.read_knob(Subsystem::Freezer, container, "freezer.state")?;
        Ok(state == FROZEN)
    }

    /// True once the freezer cgroup holds no processes.
    pub fn empty(&self, container: &str) -> Result<bool> {
        Ok(self.list_procs(Subsystem::Freezer, container)?.is_empty())
    }

    /// Reads `memory.oom_control` and reports whether the kernel's OOM
    /// killer fired inside the container.
    pub fn oom_killed(&self, container: &str) -> bool {
        let Ok(control) =
            self.read_knob(Subsystem::Memory, container, "memory.oom_control")
        else {
            return false;
        };

        for line in control.lines() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("oom_kill"), Some(count)) => {
                    return count.parse::<u64>().map(|c| c > 0).unwrap_or(false)
                }
                (Some("under_oom"), Some("1")) => return true,
                _ => {}
            }
        }

        false
    }

    /// Polls until the freezer cgroup holds no processes, bounded by
    /// the freezer timeout.
    pub async fn await_empty(&self, container: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.freezer_timeout;

        loop {
            if self.empty(container)? {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CgroupsError::FreezerStuck {
                    path: self.dir(Subsystem::Freezer, container),
                });
            }

            tokio::time::sleep(FREEZER_POLL_DELAY).await;
        }
    }

    async fn await_freezer_state(
        &self,
        container: &str,
        want: &str,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.freezer_timeout;

        loop {
            let state =
                self.read_knob(Subsystem::Freezer, container, "freezer.state")?;
            if state == want {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(CgroupsError::FreezerStuck {
                    path: self.dir(Subsystem::Freezer, container),
                });
            }

            tokio::time::sleep(FREEZER_POLL_DELAY).await;
        }
    }

    fn migrate_to_parent(&self, dir: &Path) -> Result<()> {
        let procs_path = dir.join("cgroup.procs");
        let procs = fs::read_to_string(&procs_path)
            .map_err(|e| CgroupsError::classify(procs_path, e))?;

        let parent_procs = dir
            .parent()
            .map(|parent| parent.join("cgroup.procs"))
            .ok_or_else(|| CgroupsError::NotFound { path: dir.to_path_buf() })?;

        for pid in procs.lines() {
            append(&parent_procs, pid.trim())
                .map_err(|e| CgroupsError::classify(parent_procs.clone(), e))?;
        }

        Ok(())
    }
}

fn append(path: &Path, value: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(value.as_bytes())
}
