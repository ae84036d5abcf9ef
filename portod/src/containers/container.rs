/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! One container: configuration, runtime state and transitions.
//!
//! The stored state is never `meta`. A started container that holds no
//! payload reports `meta` while anything below it is alive and falls
//! back to `running` once the subtree quiets down; [`Container::
//! display_state`] implements that rule for the tree.

use super::container_name::ContainerName;
use super::error::{ContainersError, Result};
use super::properties;
use crate::cgroups::{CgroupManager, Subsystem};
use crate::task::TaskEnv;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{Gid, Group, Pid, Uid, User};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default ceiling for captured stdout/stderr before rotation.
pub const DEFAULT_STDOUT_LIMIT: u64 = 8 << 20;

/// Seconds a dead container lingers before it is auto-stopped.
pub const DEFAULT_AGING_TIME_S: u64 = 60 * 60 * 24;

/// Bytes of captured output returned by the stdout/stderr data keys.
const OUTPUT_READ_BYTES: u64 = 8 << 10;

const DEFAULT_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Stopped,
    Running,
    Paused,
    Meta,
    Dead,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Stopped => "stopped",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Meta => "meta",
            ContainerState::Dead => "dead",
        }
    }

    pub fn from_str(state: &str) -> Option<ContainerState> {
        match state {
            "stopped" => Some(ContainerState::Stopped),
            "running" => Some(ContainerState::Running),
            "paused" => Some(ContainerState::Paused),
            "meta" => Some(ContainerState::Meta),
            "dead" => Some(ContainerState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Container {
    name: ContainerName,
    owner_uid: Uid,
    owner_gid: Gid,
    /// Only explicitly-set properties; defaults are computed on read.
    properties: BTreeMap<String, String>,
    state: ContainerState,
    root_pid: Option<Pid>,
    exit_status: Option<i32>,
    oom_killed: bool,
    respawn_count: u32,
    death_time: Option<Instant>,
    stdout_file: Option<PathBuf>,
    stderr_file: Option<PathBuf>,
}

impl Container {
    pub fn new(name: ContainerName, owner_uid: Uid, owner_gid: Gid) -> Self {
        Self {
            name,
            owner_uid,
            owner_gid,
            properties: BTreeMap::new(),
            state: ContainerState::Stopped,
            root_pid: None,
            exit_status: None,
            oom_killed: false,
            respawn_count: 0,
            death_time: None,
            stdout_file: None,
            stderr_file: None,
        }
    }

    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    pub fn owner_uid(&self) -> Uid {
        self.owner_uid
    }

    pub fn owner_gid(&self) -> Gid {
        self.owner_gid
    }

    /// Stored state; `meta` is derived, see [`Container::display_state`].
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// State as reported to clients. A started container with no
    /// payload of its own presents as `meta` while a descendant is
    /// alive.
    pub fn display_state(&self, active_descendants: bool) -> ContainerState {
        match self.state {
            ContainerState::Running
                if self.root_pid.is_none() && active_descendants =>
            {
                ContainerState::Meta
            }
            state => state,
        }
    }

    pub fn root_pid(&self) -> Option<Pid> {
        self.root_pid
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn oom_killed(&self) -> bool {
        self.oom_killed
    }

    pub fn respawn_count(&self) -> u32 {
        self.respawn_count
    }

    /// Only the owner or root may mutate a container.
    pub fn check_owner(&self, caller: Uid) -> Result<()> {
        if caller.is_root() || caller == self.owner_uid {
            Ok(())
        } else {
            Err(ContainersError::Permission {
                msg: format!("container '{}' is not owned by the caller", self.name),
            })
        }
    }

    // property surface

    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let def = properties::find(key).ok_or_else(|| {
            ContainersError::InvalidProperty { property: key.to_string() }
        })?;

        if self.state != ContainerState::Stopped && !def.dynamic {
            return Err(ContainersError::InvalidState {
                name: self.name.to_string(),
                state: self.state.to_string(),
            });
        }

        (def.validate)(value)
            .map_err(|msg| ContainersError::InvalidValue { msg })?;

        let _ = self.properties.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get_property(&self, key: &str) -> Result<String> {
        let _ = properties::find(key).ok_or_else(|| {
            ContainersError::InvalidProperty { property: key.to_string() }
        })?;

        if let Some(value) = self.properties.get(key) {
            return Ok(value.clone());
        }

        Ok(self.default_for(key))
    }

    /// Explicitly-set properties, for persistence.
    pub fn raw_properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Rolls a property back to its previous value after a failed
    /// persistence write.
    pub fn rollback_property(&mut self, key: &str, old: Option<String>) {
        match old {
            Some(value) => {
                let _ = self.properties.insert(key.to_string(), value);
            }
            None => {
                let _ = self.properties.remove(key);
            }
        }
    }

    fn default_for(&self, key: &str) -> String {
        match key {
            "root" => String::from("/"),
            "user" => self.owner_user_name(),
            "group" => self.owner_group_name(),
            "capabilities" => properties::DEFAULT_CAPABILITIES.to_string(),
            "stdin_path" => String::from("/dev/null"),
            "stdout_path" => String::from("stdout"),
            "stderr_path" => String::from("stderr"),
            "stdout_limit" => DEFAULT_STDOUT_LIMIT.to_string(),
            "isolate" => String::from("true"),
            "respawn" => String::from("false"),
            "root_readonly" => String::from("false"),
            "enable_porto" => String::from("true"),
            "max_respawns" => String::from("-1"),
            "aging_time" => DEFAULT_AGING_TIME_S.to_string(),
            "cpu_limit" | "cpu_guarantee" => String::from("100"),
            _ => String::new(),
        }
    }

    fn owner_user_name(&self) -> String {
        User::from_uid(self.owner_uid)
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| self.owner_uid.to_string())
    }

    fn owner_group_name(&self) -> String {
        Group::from_gid(self.owner_gid)
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| self.owner_gid.to_string())
    }

    // typed getters

    pub fn command(&self) -> String {
        self.properties.get("command").cloned().unwrap_or_default()
    }

    pub fn isolate(&self) -> bool {
        self.flag("isolate", true)
    }

    pub fn respawn(&self) -> bool {
        self.flag("respawn", false)
    }

    pub fn max_respawns(&self) -> i64 {
        self.properties
            .get("max_respawns")
            .and_then(|v| v.parse().ok())
            .unwrap_or(-1)
    }

    pub fn aging_time(&self) -> Duration {
        let seconds = self
            .properties
            .get("aging_time")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_AGING_TIME_S);
        properties::aging_duration(seconds)
    }

    pub fn stdout_limit(&self) -> u64 {
        self.properties
            .get("stdout_limit")
            .and_then(|v| properties::parse_size(v).ok())
            .unwrap_or(DEFAULT_STDOUT_LIMIT)
    }

    pub fn memory_guarantee(&self) -> u64 {
        self.properties
            .get("memory_guarantee")
            .and_then(|v| properties::parse_size(v).ok())
            .unwrap_or(0)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.properties
            .get(key)
            .and_then(|v| properties::parse_bool(v).ok())
            .unwrap_or(default)
    }

    /// Working directory; defaults to a per-container directory under
    /// the daemon working tree.
    pub fn cwd(&self, working_dir: &std::path::Path) -> PathBuf {
        match self.properties.get("cwd") {
            Some(cwd) => PathBuf::from(cwd),
            None => working_dir.join(self.name.as_str()),
        }
    }

    pub fn root(&self) -> Option<PathBuf> {
        match self.properties.get("root") {
            Some(root) if root != "/" => Some(PathBuf::from(root)),
            _ => None,
        }
    }

    // lifecycle

    /// Creates this container's cgroups and applies resource knobs.
    /// On failure every cgroup created for this node is removed again.
    pub fn materialize_cgroups(
        &self,
        cgroups: &CgroupManager,
        host_cores: u32,
    ) -> Result<()> {
        let name = self.name.as_str();

        let mut created = Vec::new();
        for subsystem in Subsystem::ALL {
            if let Err(e) = cgroups.ensure(subsystem, name) {
                for subsystem in created {
                    let _ = cgroups.remove(subsystem, name);
                }
                return Err(e.into());
            }
            created.push(subsystem);
        }

        if let Err(e) = self.apply_limits(cgroups, host_cores) {
            for subsystem in Subsystem::ALL {
                let _ = cgroups.remove(subsystem, name);
            }
            return Err(e);
        }

        Ok(())
    }

    /// Re-applies resource knobs after a dynamic property change on a
    /// started container.
    pub fn refresh_limits(
        &self,
        cgroups: &CgroupManager,
        host_cores: u32,
    ) -> Result<()> {
        if self.state == ContainerState::Stopped {
            return Ok(());
        }
        self.apply_limits(cgroups, host_cores)
    }

    fn apply_limits(
        &self,
        cgroups: &CgroupManager,
        host_cores: u32,
    ) -> Result<()> {
        let name = self.name.as_str();

        if let Some(limit) = self.properties.get("memory_limit") {
            let bytes = properties::parse_size(limit)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            cgroups.write_knob(
                Subsystem::Memory,
                name,
                "memory.limit_in_bytes",
                &bytes.to_string(),
            )?;
        }

        if let Some(guarantee) = self.properties.get("memory_guarantee") {
            let bytes = properties::parse_size(guarantee)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            cgroups.write_knob(
                Subsystem::Memory,
                name,
                "memory.soft_limit_in_bytes",
                &bytes.to_string(),
            )?;
        }

        if let Some(limit) = self.properties.get("cpu_limit") {
            let limit = properties::parse_cpu(limit)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            cgroups.write_knob(
                Subsystem::Cpu,
                name,
                "cpu.cfs_period_us",
                &properties::CPU_PERIOD_US.to_string(),
            )?;
            cgroups.write_knob(
                Subsystem::Cpu,
                name,
                "cpu.cfs_quota_us",
                &properties::cpu_cfs_quota(limit, host_cores).to_string(),
            )?;
        }

        if let Some(guarantee) = self.properties.get("cpu_guarantee") {
            let guarantee = properties::parse_cpu(guarantee)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            cgroups.write_knob(
                Subsystem::Cpu,
                name,
                "cpu.shares",
                &properties::cpu_shares(guarantee, host_cores).to_string(),
            )?;
        }

        // fs throttles exist only on kernels carrying the porto memory
        // controller patches; silently skip elsewhere
        if let Some(limit) = self.properties.get("io_limit") {
            let bytes = properties::parse_size(limit)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            if let Err(e) = cgroups.write_knob(
                Subsystem::Memory,
                name,
                "memory.fs_bps_limit",
                &bytes.to_string(),
            ) {
                warn!("io_limit not applied for {name}: {e}");
            }
        }

        if let Some(limit) = self.properties.get("io_ops_limit") {
            if let Err(e) = cgroups.write_knob(
                Subsystem::Memory,
                name,
                "memory.fs_iops_limit",
                limit,
            ) {
                warn!("io_ops_limit not applied for {name}: {e}");
            }
        }

        if let Some(devices) = self.properties.get("devices") {
            if !devices.trim().is_empty() {
                cgroups.write_knob(Subsystem::Devices, name, "devices.deny", "a")?;
                for entry in devices.split(';') {
                    let entry = entry.trim();
                    if entry.is_empty() {
                        continue;
                    }
                    // knob syntax is resolved from the device node by the
                    // kernel on modern systems; pass entries through
                    cgroups.write_knob(
                        Subsystem::Devices,
                        name,
                        "devices.allow",
                        entry,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Assembles the launcher envelope for this container's payload.
    pub fn task_env(
        &self,
        working_dir: &std::path::Path,
        host_name: &str,
    ) -> Result<TaskEnv> {
        // without a private mount namespace a pivot would rearrange the
        // host's mounts
        if self.root().is_some() && !self.isolate() {
            return Err(ContainersError::InvalidValue {
                msg: "a root directory requires isolate=true".to_string(),
            });
        }

        let (user, uid, gid) = self.resolve_credentials()?;
        let cwd = self.cwd(working_dir);

        let mut env: Vec<(String, String)> = vec![
            ("PATH".to_string(), DEFAULT_PATH.to_string()),
            ("HOME".to_string(), cwd.display().to_string()),
            ("USER".to_string(), user.clone()),
            ("container".to_string(), "lxc".to_string()),
            ("PORTO_NAME".to_string(), self.name.to_string()),
            ("PORTO_HOST".to_string(), host_name.to_string()),
            ("PORTO_USER".to_string(), self.owner_user_name()),
        ];

        if let Some(extra) = self.properties.get("env") {
            let entries = properties::split_env_list(extra)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            env.extend(entries);
        }

        let keep_caps = match self.properties.get("capabilities") {
            Some(list) => properties::parse_capabilities(list)
                .map_err(|msg| ContainersError::InvalidValue { msg })?,
            None => properties::parse_capabilities(
                properties::DEFAULT_CAPABILITIES,
            )
            .map_err(|msg| ContainersError::InvalidValue { msg })?,
        };

        let ulimits = match self.properties.get("ulimit") {
            Some(list) => properties::parse_ulimits(list)
                .map_err(|msg| ContainersError::InvalidValue { msg })?
                .into_iter()
                .map(|u| (u.resource, u.soft, u.hard))
                .collect(),
            None => Vec::new(),
        };

        let resolve = |key: &str, default: &str| -> PathBuf {
            let raw = self
                .properties
                .get(key)
                .map(String::as_str)
                .unwrap_or(default);
            if raw.starts_with('/') {
                PathBuf::from(raw)
            } else {
                cwd.join(raw)
            }
        };

        let stdin_path = resolve("stdin_path", "/dev/null");
        let stdout_path = resolve("stdout_path", "stdout");
        let stderr_path = resolve("stderr_path", "stderr");

        Ok(TaskEnv {
            container: self.name.to_string(),
            command: self.command(),
            cwd,
            root: self.root(),
            root_readonly: self.flag("root_readonly", false),
            hostname: self
                .properties
                .get("hostname")
                .filter(|h| !h.is_empty())
                .cloned(),
            user,
            uid,
            gid,
            env,
            stdin_path,
            stdout_path,
            stderr_path,
            cgroups: Subsystem::ALL.to_vec(),
            ulimits,
            isolate: self.isolate(),
            keep_caps,
        })
    }

    fn resolve_credentials(&self) -> Result<(String, Uid, Gid)> {
        let user_value = self.get_property("user")?;

        let (user, uid, gid) = if let Ok(uid) = user_value.parse::<u32>() {
            let uid = Uid::from_raw(uid);
            let user = User::from_uid(uid)
                .map_err(|e| ContainersError::InvalidValue {
                    msg: format!("getpwuid({uid}): {e}"),
                })?
                .ok_or_else(|| ContainersError::InvalidValue {
                    msg: format!("unknown uid {uid}"),
                })?;
            (user.name, uid, user.gid)
        } else {
            let user = User::from_name(&user_value)
                .map_err(|e| ContainersError::InvalidValue {
                    msg: format!("getpwnam({user_value}): {e}"),
                })?
                .ok_or_else(|| ContainersError::InvalidValue {
                    msg: format!("unknown user '{user_value}'"),
                })?;
            (user.name, user.uid, user.gid)
        };

        let gid = match self.properties.get("group") {
            None => gid,
            Some(group_value) => {
                if let Ok(gid) = group_value.parse::<u32>() {
                    Gid::from_raw(gid)
                } else {
                    Group::from_name(group_value)
                        .map_err(|e| ContainersError::InvalidValue {
                            msg: format!("getgrnam({group_value}): {e}"),
                        })?
                        .ok_or_else(|| ContainersError::InvalidValue {
                            msg: format!("unknown group '{group_value}'"),
                        })?
                        .gid
                }
            }
        };

        Ok((user, uid, gid))
    }

    /// Marks the container started.
    pub fn started(&mut self, pid: Option<Pid>, stdout: Option<PathBuf>, stderr: Option<PathBuf>) {
        self.state = ContainerState::Running;
        self.root_pid = pid;
        self.exit_status = None;
        self.oom_killed = false;
        self.death_time = None;
        self.stdout_file = stdout;
        self.stderr_file = stderr;
        info!("container {} started, pid {:?}", self.name, self.root_pid);
    }

    /// Payload exit observed; transitions to `dead`.
    pub fn deliver_exit(&mut self, status: i32, oom_killed: bool) {
        self.exit_status = Some(status);
        self.oom_killed = oom_killed;
        self.root_pid = None;
        self.state = ContainerState::Dead;
        self.death_time = Some(Instant::now());
        info!("container {} died, status {status}, oom {oom_killed}", self.name);
    }

    /// Clears runtime state after the subtree was torn down.
    pub fn stopped(&mut self) {
        self.state = ContainerState::Stopped;
        self.root_pid = None;
        self.exit_status = None;
        self.oom_killed = false;
        self.respawn_count = 0;
        self.death_time = None;
        self.stdout_file = None;
        self.stderr_file = None;
    }

    pub fn paused(&mut self) {
        self.state = ContainerState::Paused;
    }

    pub fn resumed(&mut self) {
        self.state = ContainerState::Running;
    }

    pub fn kill(&self, signal: Signal) -> Result<()> {
        let pid = match (self.state, self.root_pid) {
            (ContainerState::Running | ContainerState::Paused, Some(pid)) => {
                pid
            }
            _ => {
                return Err(ContainersError::InvalidState {
                    name: self.name.to_string(),
                    state: self.state.to_string(),
                })
            }
        };

        kill(pid, signal).map_err(|e| ContainersError::Unknown {
            msg: format!("kill({pid}): {e}"),
        })
    }

    /// True once a dead container outlived its aging time.
    pub fn aged_out(&self) -> bool {
        match (self.state, self.death_time) {
            (ContainerState::Dead, Some(death_time)) => {
                death_time.elapsed() >= self.aging_time()
            }
            _ => false,
        }
    }

    pub fn bump_respawn_count(&mut self) -> u32 {
        self.respawn_count += 1;
        self.respawn_count
    }

    /// Whether a dead payload should be restarted automatically.
    pub fn wants_respawn(&self) -> bool {
        if self.state != ContainerState::Dead || !self.respawn() {
            return false;
        }
        let max = self.max_respawns();
        max < 0 || i64::from(self.respawn_count) < max
    }

    /// Truncates captured output files that outgrew `stdout_limit`.
    pub fn rotate_logs(&self) {
        let limit = self.stdout_limit();
        for file in [&self.stdout_file, &self.stderr_file].into_iter().flatten()
        {
            let Ok(metadata) = std::fs::metadata(file) else {
                continue;
            };
            if metadata.len() > limit {
                if let Err(e) =
                    std::fs::OpenOptions::new().write(true).open(file).and_then(
                        |f| f.set_len(0),
                    )
                {
                    warn!("can't rotate {}: {e}", file.display());
                }
            }
        }
    }

    /// Tail of a captured output file.
    pub fn read_output(&self, stderr: bool) -> Result<String> {
        use std::io::{Read, Seek, SeekFrom};

        let file = if stderr { &self.stderr_file } else { &self.stdout_file };
        let Some(path) = file else {
            return Ok(String::new());
        };

        let mut file =
            std::fs::File::open(path).map_err(|e| ContainersError::Unknown {
                msg: format!("open({}): {e}", path.display()),
            })?;

        let len = file
            .metadata()
            .map_err(|e| ContainersError::Unknown { msg: e.to_string() })?
            .len();
        if len > OUTPUT_READ_BYTES {
            let _ = file
                .seek(SeekFrom::Start(len - OUTPUT_READ_BYTES))
                .map_err(|e| ContainersError::Unknown { msg: e.to_string() })?;
        }

        let mut tail = String::new();
        let _ = file
            .read_to_string(&mut tail)
            .map_err(|e| ContainersError::Unknown { msg: e.to_string() })?;
        Ok(tail)
    }

    pub fn output_files(&self) -> (Option<&PathBuf>, Option<&PathBuf>) {
        (self.stdout_file.as_ref(), self.stderr_file.as_ref())
    }

    // recovery hooks

    pub fn restore_runtime(
        &mut self,
        state: ContainerState,
        pid: Option<Pid>,
        exit_status: Option<i32>,
        oom_killed: bool,
        respawn_count: u32,
        stdout: Option<PathBuf>,
        stderr: Option<PathBuf>,
    ) {
        self.state = state;
        self.root_pid = pid;
        self.exit_status = exit_status;
        self.oom_killed = oom_killed;
        self.respawn_count = respawn_count;
        self.death_time = match state {
            ContainerState::Dead => Some(Instant::now()),
            _ => None,
        };
        self.stdout_file = stdout;
        self.stderr_file = stderr;
    }

    pub fn restore_property(&mut self, key: String, value: String) {
        let _ = self.properties.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_container(name: &str) -> Container {
        Container::new(
            ContainerName::parse(name).expect("name"),
            Uid::from_raw(0),
            Gid::from_raw(0),
        )
    }

    #[test]
    fn test_new_container_is_stopped() {
        let container = test_container("a");
        assert_eq!(container.state(), ContainerState::Stopped);
        assert_eq!(container.root_pid(), None);
        assert_eq!(container.exit_status(), None);
    }

    #[test]
    fn test_static_property_rejected_while_running() {
        let mut container = test_container("a");
        container.started(Some(Pid::from_raw(1234)), None, None);

        let err = container
            .set_property("command", "/bin/true")
            .expect_err("static set while running");
        assert!(matches!(err, ContainersError::InvalidState { .. }));

        container
            .set_property("memory_limit", "128M")
            .expect("dynamic set while running");
    }

    #[test]
    fn test_unknown_property_rejected() {
        let mut container = test_container("a");
        assert!(matches!(
            container.set_property("flux_capacitor", "1.21GW"),
            Err(ContainersError::InvalidProperty { .. })
        ));
        assert!(matches!(
            container.get_property("flux_capacitor"),
            Err(ContainersError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let mut container = test_container("a");
        assert!(matches!(
            container.set_property("isolate", "maybe"),
            Err(ContainersError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let container = test_container("a");
        assert_eq!(container.get_property("root").expect("root"), "/");
        assert_eq!(container.get_property("isolate").expect("isolate"), "true");
        assert_eq!(
            container.get_property("stdin_path").expect("stdin"),
            "/dev/null"
        );
        assert_eq!(
            container.get_property("capabilities").expect("caps"),
            properties::DEFAULT_CAPABILITIES
        );
        assert_eq!(container.get_property("command").expect("command"), "");
    }

    #[test]
    fn test_task_env_carries_fixed_prefix() {
        let mut container = test_container("a");
        // only gates porto API access, never the env prefix
        container.set_property("enable_porto", "false").expect("set");
        container
            .set_property("env", "EXTRA=1")
            .expect("set env");

        let env = container
            .task_env(std::path::Path::new("/tmp/porto-test-workdir"), "host1")
            .expect("task env");

        let keys: Vec<&str> =
            env.env.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            &keys[..7],
            &[
                "PATH",
                "HOME",
                "USER",
                "container",
                "PORTO_NAME",
                "PORTO_HOST",
                "PORTO_USER"
            ]
        );
        assert_eq!(keys[7], "EXTRA");

        let lookup = |key: &str| -> &str {
            env.env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .expect(key)
        };
        assert_eq!(lookup("PORTO_NAME"), "a");
        assert_eq!(lookup("PORTO_HOST"), "host1");
        assert_eq!(lookup("container"), "lxc");
    }

    #[test]
    fn test_exit_clears_on_stop() {
        let mut container = test_container("a");
        container.started(Some(Pid::from_raw(1234)), None, None);
        container.deliver_exit(0, false);

        assert_eq!(container.state(), ContainerState::Dead);
        assert_eq!(container.exit_status(), Some(0));

        container.stopped();
        assert_eq!(container.state(), ContainerState::Stopped);
        assert_eq!(container.exit_status(), None);
        assert!(!container.oom_killed());
    }

    #[test]
    fn test_display_state_meta_rule() {
        let mut container = test_container("a");

        // stopped never shows meta
        assert_eq!(
            container.display_state(true),
            ContainerState::Stopped
        );

        // started without payload: meta while the subtree is active
        container.started(None, None, None);
        assert_eq!(container.display_state(true), ContainerState::Meta);
        assert_eq!(container.display_state(false), ContainerState::Running);

        // with a payload of its own it is running either way
        container.started(Some(Pid::from_raw(1234)), None, None);
        assert_eq!(container.display_state(true), ContainerState::Running);
    }

    #[test]
    fn test_respawn_accounting() {
        let mut container = test_container("a");
        container.set_property("respawn", "true").expect("set respawn");
        container.set_property("max_respawns", "2").expect("set max");

        container.started(Some(Pid::from_raw(1)), None, None);
        container.deliver_exit(1, false);
        assert!(container.wants_respawn());

        assert_eq!(container.bump_respawn_count(), 1);
        assert_eq!(container.bump_respawn_count(), 2);
        assert!(!container.wants_respawn());
    }

    #[test]
    fn test_kill_requires_payload() {
        let container = test_container("a");
        assert!(matches!(
            container.kill(Signal::SIGTERM),
            Err(ContainersError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_owner_check() {
        let container = Container::new(
            ContainerName::parse("a").expect("name"),
            Uid::from_raw(1000),
            Gid::from_raw(1000),
        );

        container.check_owner(Uid::from_raw(1000)).expect("owner");
        container.check_owner(Uid::from_raw(0)).expect("root");
        assert!(matches!(
            container.check_owner(Uid::from_raw(1001)),
            Err(ContainersError::Permission { .. })
        ));
    }
}
