/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Durable container records and worker crash recovery.
//!
//! One file per container, named by the escaped container path, holding
//! a prost-encoded [`ContainerRecord`]. Replay restores configuration
//! through the ordinary property setters and then resurrects runtime
//! state by inspecting `/proc` and the live cgroups: a record may claim
//! `running`, but only a live pid sitting in the container's freezer
//! cgroup is believed.

use crate::containers::{ContainerName, ContainerState, Containers};
use nix::fcntl::{flock, FlockArg};
use nix::unistd::{Gid, Pid, Uid};
use prost::Message;
use std::fs::{self, File};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

pub use porto_proto::state::{ContainerRecord, PropertyEntry};

const LOCK_FILE: &str = "porto.lock";

pub type Result<T> = std::result::Result<T, PersistError>;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("state io error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("corrupt record '{path}': {source}")]
    Decode { path: PathBuf, source: prost::DecodeError },
    #[error("state directory '{path}' is locked by another worker")]
    Locked { path: PathBuf },
}

#[derive(Debug)]
pub struct Persist {
    state_dir: PathBuf,
    // advisory lock held for the worker's lifetime
    _lock: File,
}

impl Persist {
    /// Opens the state directory, taking the advisory worker lock.
    pub fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(|e| PersistError::Io {
            path: state_dir.to_path_buf(),
            source: e,
        })?;

        let lock_path = state_dir.join(LOCK_FILE);
        let lock = File::create(&lock_path).map_err(|e| PersistError::Io {
            path: lock_path.clone(),
            source: e,
        })?;

        flock(lock.as_raw_fd(), FlockArg::LockExclusiveNonblock)
            .map_err(|_| PersistError::Locked { path: lock_path })?;

        Ok(Self { state_dir: state_dir.to_path_buf(), _lock: lock })
    }

    fn record_path(&self, name: &ContainerName) -> PathBuf {
        self.state_dir.join(name.escaped())
    }

    /// Writes a record atomically (tmp file + rename).
    pub fn save(&self, record: &ContainerRecord) -> Result<()> {
        let name = ContainerName::parse(&record.name).map_err(|_| {
            PersistError::Io {
                path: self.state_dir.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("bad record name '{}'", record.name),
                ),
            }
        })?;

        let path = self.record_path(&name);
        let tmp = path.with_extension("tmp");

        let mut buf = Vec::with_capacity(record.encoded_len());
        record.encode(&mut buf).map_err(|e| PersistError::Io {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

        fs::write(&tmp, &buf)
            .map_err(|e| PersistError::Io { path: tmp.clone(), source: e })?;
        fs::rename(&tmp, &path)
            .map_err(|e| PersistError::Io { path, source: e })
    }

    pub fn remove(&self, name: &ContainerName) -> Result<()> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::Io { path, source: e }),
        }
    }

    /// Loads every record, parents before children.
    pub fn load_all(&self) -> Result<Vec<ContainerRecord>> {
        let entries =
            fs::read_dir(&self.state_dir).map_err(|e| PersistError::Io {
                path: self.state_dir.clone(),
                source: e,
            })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PersistError::Io {
                path: self.state_dir.clone(),
                source: e,
            })?;

            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name == LOCK_FILE || file_name.ends_with(".tmp") {
                continue;
            }

            let path = entry.path();
            let bytes = fs::read(&path).map_err(|e| PersistError::Io {
                path: path.clone(),
                source: e,
            })?;

            match ContainerRecord::decode(bytes.as_slice()) {
                Ok(record) => records.push(record),
                Err(source) => {
                    // one corrupt record must not block recovery of the rest
                    warn!("skipping corrupt record {}: {source}", path.display());
                }
            }
        }

        records.sort_by_key(|record| record.name.matches('/').count());
        Ok(records)
    }
}

/// Builds the durable record for a container's current configuration
/// and runtime state.
pub fn record(container: &crate::containers::Container) -> ContainerRecord {
    let (stdout, stderr) = container.output_files();

    ContainerRecord {
        name: container.name().to_string(),
        owner_uid: container.owner_uid().as_raw(),
        owner_gid: container.owner_gid().as_raw(),
        properties: container
            .raw_properties()
            .iter()
            .map(|(key, value)| PropertyEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        state: container.state().as_str().to_string(),
        root_pid: container.root_pid().map(Pid::as_raw).unwrap_or(0),
        exit_status: container.exit_status(),
        oom_killed: container.oom_killed(),
        respawn_count: container.respawn_count(),
        death_time_ms: match container.state() {
            ContainerState::Dead => now_ms(),
            _ => 0,
        },
        stdout_path: stdout
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        stderr_path: stderr
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rebuilds the container tree from persisted records and live kernel
/// state. Returns the number of restored containers.
pub fn replay(tree: &mut Containers, persist: &Persist) -> Result<usize> {
    let records = persist.load_all()?;
    let mut restored = 0;

    for record in records {
        let Ok(name) = ContainerName::parse(&record.name) else {
            warn!("skipping record with invalid name '{}'", record.name);
            continue;
        };

        if let Err(e) = tree.restore_node(
            &name,
            Uid::from_raw(record.owner_uid),
            Gid::from_raw(record.owner_gid),
        ) {
            warn!("can't recreate container {name}: {e}");
            continue;
        }

        if let Ok(container) = tree.get_mut(&name) {
            for entry in &record.properties {
                container.restore_property(entry.key.clone(), entry.value.clone());
            }
        }

        restore_runtime(tree, &name, &record);
        restored += 1;
    }

    info!("recovered {restored} containers");
    Ok(restored)
}

fn restore_runtime(
    tree: &mut Containers,
    name: &ContainerName,
    record: &ContainerRecord,
) {
    let recorded_state = ContainerState::from_str(&record.state)
        .unwrap_or(ContainerState::Stopped);

    let stdout = non_empty_path(&record.stdout_path);
    let stderr = non_empty_path(&record.stderr_path);

    match recorded_state {
        ContainerState::Stopped => {}
        ContainerState::Dead => {
            if let Ok(container) = tree.get_mut(name) {
                container.restore_runtime(
                    ContainerState::Dead,
                    None,
                    record.exit_status,
                    record.oom_killed,
                    record.respawn_count,
                    stdout,
                    stderr,
                );
            }
        }
        ContainerState::Running
        | ContainerState::Paused
        | ContainerState::Meta => {
            let pid = Pid::from_raw(record.root_pid);
            let live = record.root_pid > 0 && payload_alive(name, pid);

            // a started container without a payload is legitimate (meta)
            let had_payload = record.root_pid != 0;

            if live || !had_payload {
                let state = match recorded_state {
                    ContainerState::Paused => ContainerState::Paused,
                    _ => ContainerState::Running,
                };
                if let Ok(container) = tree.get_mut(name) {
                    container.restore_runtime(
                        state,
                        live.then_some(pid),
                        None,
                        false,
                        record.respawn_count,
                        stdout,
                        stderr,
                    );
                }
                if live {
                    // the new worker is not the payload's parent; exits
                    // are observed by polling
                    tree.register_foreign_pid(pid, name.clone());
                }
            } else {
                // the payload vanished while the worker was down; the
                // exit status is unknowable
                if let Ok(container) = tree.get_mut(name) {
                    container.restore_runtime(
                        ContainerState::Dead,
                        None,
                        None,
                        false,
                        record.respawn_count,
                        stdout,
                        stderr,
                    );
                }
            }
        }
    }
}

fn non_empty_path(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// A recorded payload is believed only when the pid is alive and every
/// porto-managed cgroup it sits in matches the container's own set.
fn payload_alive(name: &ContainerName, pid: Pid) -> bool {
    if procfs::process::Process::new(pid.as_raw()).is_err() {
        return false;
    }

    match validate_cgroups(name, pid) {
        Ok(valid) => valid,
        Err(e) => {
            warn!("can't validate cgroups of pid {pid}: {e}");
            false
        }
    }
}

fn validate_cgroups(name: &ContainerName, pid: Pid) -> io::Result<bool> {
    let cgroup_lines =
        fs::read_to_string(format!("/proc/{}/cgroup", pid.as_raw()))?;
    Ok(cgroup_memberships_valid(name, &cgroup_lines))
}

/// Every `/proc/<pid>/cgroup` line must name a managed subsystem whose
/// path is the container's own cgroup. A task sitting in a hierarchy
/// this daemon does not manage was not placed by it, so the restore is
/// refused.
fn cgroup_memberships_valid(name: &ContainerName, cgroup_lines: &str) -> bool {
    use crate::cgroups::Subsystem;

    for line in cgroup_lines.lines() {
        let mut fields = line.splitn(3, ':');
        let (Some(_), Some(subsystems), Some(path)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        for subsystem_name in subsystems.split(',') {
            let Some(subsystem) = Subsystem::from_name(subsystem_name) else {
                warn!(
                    "task of {name} belongs to unknown subsystem \
                     {subsystem_name}:{path}"
                );
                return false;
            };

            let expected = format!("/{}", subsystem.relpath(name.as_str()));
            if path != expected {
                // the task belongs to a cgroup this worker never made
                warn!(
                    "task of {name} in foreign cgroup {subsystem_name}:{path}"
                );
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("portod-persist-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = temp_dir("round-trip");
        let persist = Persist::open(&dir).expect("open");

        let record = ContainerRecord {
            name: "a/b".to_string(),
            owner_uid: 1000,
            owner_gid: 1000,
            properties: vec![PropertyEntry {
                key: "command".to_string(),
                value: "/bin/sleep 5".to_string(),
            }],
            state: "running".to_string(),
            root_pid: 4242,
            exit_status: None,
            oom_killed: false,
            respawn_count: 1,
            death_time_ms: 0,
            stdout_path: "/tmp/stdout".to_string(),
            stderr_path: String::new(),
        };

        persist.save(&record).expect("save");
        let loaded = persist.load_all().expect("load");
        assert_eq!(loaded, vec![record]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_orders_parents_first() {
        let dir = temp_dir("ordering");
        let persist = Persist::open(&dir).expect("open");

        for name in ["x/y/z", "x", "x/y"] {
            persist
                .save(&ContainerRecord {
                    name: name.to_string(),
                    state: "stopped".to_string(),
                    ..ContainerRecord::default()
                })
                .expect("save");
        }

        let names: Vec<String> = persist
            .load_all()
            .expect("load")
            .into_iter()
            .map(|record| record.name)
            .collect();
        assert_eq!(names, vec!["x", "x/y", "x/y/z"]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = temp_dir("remove");
        let persist = Persist::open(&dir).expect("open");

        let name = ContainerName::parse("gone").expect("name");
        persist.remove(&name).expect("remove of missing record");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_second_worker_is_locked_out() {
        let dir = temp_dir("lock");
        let _persist = Persist::open(&dir).expect("first open");

        assert!(matches!(
            Persist::open(&dir),
            Err(PersistError::Locked { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_replay_restores_config_and_dead_state() {
        use crate::cgroups::CgroupManager;
        use std::time::Duration;

        let dir = temp_dir("replay");
        let persist = Persist::open(&dir).expect("open");

        persist
            .save(&ContainerRecord {
                name: "x".to_string(),
                owner_uid: 1000,
                owner_gid: 1000,
                properties: vec![PropertyEntry {
                    key: "command".to_string(),
                    value: "sleep 5".to_string(),
                }],
                state: "stopped".to_string(),
                ..ContainerRecord::default()
            })
            .expect("save parent");

        // recorded as running, but the pid is long gone: resolves to
        // dead with unknown status
        persist
            .save(&ContainerRecord {
                name: "x/y".to_string(),
                owner_uid: 1001,
                owner_gid: 1001,
                state: "running".to_string(),
                root_pid: 999_999_999,
                respawn_count: 2,
                ..ContainerRecord::default()
            })
            .expect("save child");

        let mut tree = Containers::new(
            CgroupManager::with_root(
                PathBuf::from("/nonexistent-cgroup-root"),
                Duration::from_millis(10),
            ),
            16,
            0,
            8 << 30,
            4,
            "host".to_string(),
            std::env::temp_dir(),
        );

        let restored = replay(&mut tree, &persist).expect("replay");
        assert_eq!(restored, 2);

        let x = ContainerName::parse("x").expect("name");
        let parent = tree.get(&x).expect("x");
        assert_eq!(parent.state(), ContainerState::Stopped);
        assert_eq!(parent.command(), "sleep 5");
        assert_eq!(parent.owner_uid(), Uid::from_raw(1000));

        let xy = ContainerName::parse("x/y").expect("name");
        let child = tree.get(&xy).expect("x/y");
        assert_eq!(child.state(), ContainerState::Dead);
        assert_eq!(child.exit_status(), None);
        assert_eq!(child.respawn_count(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cgroup_membership_validation() {
        let name = ContainerName::parse("a/b").expect("name");

        let own = "6:freezer:/porto/a/b\n\
                   5:memory:/porto%a%b\n\
                   4:cpu,cpuacct:/porto%a%b\n\
                   3:devices:/porto%a%b\n\
                   2:net_cls:/porto%a%b\n\
                   1:blkio:/porto%a%b\n";
        assert!(cgroup_memberships_valid(&name, own));

        // another container's cgroup is not ours
        let foreign = "6:freezer:/porto/other\n";
        assert!(!cgroup_memberships_valid(&name, foreign));

        // a host-side cgroup is not ours either
        let host = "5:memory:/system.slice/cron.service\n";
        assert!(!cgroup_memberships_valid(&name, host));

        // a task in a subsystem this daemon does not manage is fatal
        let unknown = "6:freezer:/porto/a/b\n2:pids:/porto%a%b\n";
        assert!(!cgroup_memberships_valid(&name, unknown));
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = temp_dir("corrupt");
        let persist = Persist::open(&dir).expect("open");

        persist
            .save(&ContainerRecord {
                name: "ok".to_string(),
                state: "stopped".to_string(),
                ..ContainerRecord::default()
            })
            .expect("save");
        fs::write(dir.join("broken"), [0xffu8; 16]).expect("write garbage");

        let loaded = persist.load_all().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "ok");

        let _ = fs::remove_dir_all(&dir);
    }
}
