/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The container tree: every cross-container rule lives here.
//!
//! Nodes are kept in an ordered map keyed by path, so a container's
//! descendants are exactly the keys between it and the next sibling.
//! The tree owns the pid reverse map the SIGCHLD path resolves exits
//! through.

use super::container::{Container, ContainerState};
use super::container_name::ContainerName;
use super::error::{ContainersError, Result};
use crate::cgroups::{CgroupManager, Subsystem};
use crate::task;
use nix::sys::signal::Signal;
use nix::unistd::{Gid, Pid, Uid};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Containers {
    cache: BTreeMap<String, Container>,
    pids: HashMap<Pid, ContainerName>,
    /// Payloads recovered from a previous worker: not our children, so
    /// their exits are observed by polling /proc, not SIGCHLD.
    foreign: HashSet<Pid>,
    cgroups: CgroupManager,
    max_containers: usize,
    memory_reserve: u64,
    host_memory: u64,
    host_cores: u32,
    host_name: String,
    working_dir: PathBuf,
}

impl Containers {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cgroups: CgroupManager,
        max_containers: usize,
        memory_reserve: u64,
        host_memory: u64,
        host_cores: u32,
        host_name: String,
        working_dir: PathBuf,
    ) -> Self {
        let mut cache = BTreeMap::new();

        // the root container exists for the lifetime of the worker and
        // is always considered started
        let mut root = Container::new(
            ContainerName::root(),
            Uid::from_raw(0),
            Gid::from_raw(0),
        );
        root.started(None, None, None);
        let _ = cache.insert(ContainerName::root().to_string(), root);

        Self {
            cache,
            pids: HashMap::new(),
            foreign: HashSet::new(),
            cgroups,
            max_containers,
            memory_reserve,
            host_memory,
            host_cores,
            host_name,
            working_dir,
        }
    }

    pub fn cgroups(&self) -> &CgroupManager {
        &self.cgroups
    }

    pub fn get(&self, name: &ContainerName) -> Result<&Container> {
        self.cache.get(name.as_str()).ok_or_else(|| {
            ContainersError::NotFound { name: name.to_string() }
        })
    }

    pub fn get_mut(&mut self, name: &ContainerName) -> Result<&mut Container> {
        self.cache.get_mut(name.as_str()).ok_or_else(|| {
            ContainersError::NotFound { name: name.to_string() }
        })
    }

    /// All container names except the root, in tree order.
    pub fn list(&self) -> Vec<String> {
        self.cache
            .keys()
            .filter(|name| *name != "/")
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Proper descendants of a node, in tree order.
    fn descendants(&self, name: &ContainerName) -> Vec<ContainerName> {
        self.cache
            .values()
            .map(|c| c.name().clone())
            .filter(|other| other.is_descendant_of(name))
            .collect()
    }

    fn has_active_descendant(&self, name: &ContainerName) -> bool {
        self.descendants(name).iter().any(|descendant| {
            self.cache
                .get(descendant.as_str())
                .map(|c| c.state() != ContainerState::Stopped)
                .unwrap_or(false)
        })
    }

    fn has_children(&self, name: &ContainerName) -> bool {
        self.cache.values().any(|c| c.name().parent().as_ref() == Some(name))
    }

    /// Client-visible state, with the `meta` rule applied.
    pub fn display_state(&self, name: &ContainerName) -> Result<ContainerState> {
        let container = self.get(name)?;
        Ok(container.display_state(self.has_active_descendant(name)))
    }

    // operations

    pub fn create(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
        caller_gid: Gid,
    ) -> Result<()> {
        if name.is_root() {
            return Err(ContainersError::Permission {
                msg: "the root container is not client-managed".to_string(),
            });
        }

        if self.cache.contains_key(name.as_str()) {
            return Err(ContainersError::Exists { name: name.to_string() });
        }

        if self.len() >= self.max_containers {
            return Err(ContainersError::ResourceNotAvailable {
                msg: format!("container limit {} reached", self.max_containers),
            });
        }

        let parent_name = name.parent().ok_or_else(|| {
            ContainersError::InvalidValue { msg: "no parent".to_string() }
        })?;
        let parent = self.get(&parent_name)?;
        if !parent_name.is_root() {
            parent.check_owner(caller_uid)?;
        }

        let container = Container::new(name.clone(), caller_uid, caller_gid);
        let _ = self.cache.insert(name.to_string(), container);
        info!("created container {name} for uid {caller_uid}");
        Ok(())
    }

    /// Recreates a node from a persisted record. Skips the caller
    /// checks of [`Containers::create`]: the record was authorized when
    /// it was written.
    pub fn restore_node(
        &mut self,
        name: &ContainerName,
        owner_uid: Uid,
        owner_gid: Gid,
    ) -> Result<()> {
        if name.is_root() || self.cache.contains_key(name.as_str()) {
            return Err(ContainersError::Exists { name: name.to_string() });
        }

        let parent_name = name.parent().ok_or_else(|| {
            ContainersError::InvalidValue { msg: "no parent".to_string() }
        })?;
        let _ = self.get(&parent_name)?;

        let container = Container::new(name.clone(), owner_uid, owner_gid);
        let _ = self.cache.insert(name.to_string(), container);
        Ok(())
    }

    /// Recursively stops and removes a subtree. Returns every removed
    /// name so the caller can drop the persisted records.
    pub async fn destroy(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
    ) -> Result<Vec<ContainerName>> {
        if name.is_root() {
            return Err(ContainersError::Permission {
                msg: "the root container cannot be destroyed".to_string(),
            });
        }

        self.get(name)?.check_owner(caller_uid)?;

        // a frozen subtree cannot be torn down; the client must resume
        // first
        for other in std::iter::once(name.clone())
            .chain(self.descendants(name))
        {
            if self.get(&other)?.state() == ContainerState::Paused {
                return Err(ContainersError::InvalidState {
                    name: other.to_string(),
                    state: ContainerState::Paused.to_string(),
                });
            }
        }

        self.stop_subtree(name).await?;

        let mut removed = self.descendants(name);
        removed.push(name.clone());
        for gone in &removed {
            let _ = self.cache.remove(gone.as_str());
        }

        info!("destroyed container {name}");
        Ok(removed)
    }

    /// Starts a container; intermediate stopped ancestors transition to
    /// `meta` by materializing their cgroups without a payload.
    pub async fn start(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
    ) -> Result<Vec<ContainerName>> {
        let container = self.get(name)?;
        container.check_owner(caller_uid)?;

        if container.state() != ContainerState::Stopped {
            return Err(ContainersError::InvalidState {
                name: name.to_string(),
                state: container.state().to_string(),
            });
        }

        if container.command().is_empty() && !self.has_children(name) {
            return Err(ContainersError::InvalidValue {
                msg: format!("container '{name}' has no command"),
            });
        }

        self.check_guarantees(name, None)?;

        // ancestors must be running or meta; promote stopped ones
        let mut touched = Vec::new();
        let mut ancestors = name.ancestors();
        ancestors.reverse();
        for ancestor in ancestors {
            if ancestor.is_root() {
                continue;
            }

            match self.get(&ancestor)?.state() {
                ContainerState::Running => {}
                ContainerState::Stopped => {
                    self.get(&ancestor)?
                        .materialize_cgroups(&self.cgroups, self.host_cores)?;
                    self.get_mut(&ancestor)?.started(None, None, None);
                    touched.push(ancestor);
                }
                state => {
                    return Err(ContainersError::InvalidState {
                        name: ancestor.to_string(),
                        state: state.to_string(),
                    })
                }
            }
        }

        match self.start_leaf(name) {
            Ok(()) => {
                touched.push(name.clone());
                Ok(touched)
            }
            Err(e) => {
                // unwind the promoted ancestors so a failed start has no
                // visible side effects
                for ancestor in touched.iter().rev() {
                    let _ = self.teardown(ancestor).await;
                }
                Err(e)
            }
        }
    }

    fn start_leaf(&mut self, name: &ContainerName) -> Result<()> {
        let container = self.get(name)?;
        container.materialize_cgroups(&self.cgroups, self.host_cores)?;

        if container.command().is_empty() {
            self.get_mut(name)?.started(None, None, None);
            return Ok(());
        }

        let env = match self.prepare_workdir(name) {
            Ok(env) => env,
            Err(e) => {
                self.remove_cgroups(name);
                return Err(e);
            }
        };

        match task::spawn(&env, &self.cgroups) {
            Ok(pid) => {
                let _ = self.pids.insert(pid, name.clone());
                self.get_mut(name)?.started(
                    Some(pid),
                    Some(env.stdout_path.clone()),
                    Some(env.stderr_path.clone()),
                );
                Ok(())
            }
            Err(e) => {
                self.remove_cgroups(name);
                Err(e.into())
            }
        }
    }

    fn prepare_workdir(&self, name: &ContainerName) -> Result<task::TaskEnv> {
        let container = self.get(name)?;
        let env = container.task_env(&self.working_dir, &self.host_name)?;

        if !env.cwd.exists() {
            std::fs::create_dir_all(&env.cwd).map_err(|e| {
                ContainersError::InvalidPath {
                    msg: format!("mkdir({}): {e}", env.cwd.display()),
                }
            })?;
            let _ = nix::unistd::chown(
                &env.cwd,
                Some(container.owner_uid()),
                Some(container.owner_gid()),
            );
        }

        Ok(env)
    }

    /// Stops a container and its whole subtree, descendants first.
    pub async fn stop(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
    ) -> Result<Vec<ContainerName>> {
        let container = self.get(name)?;
        container.check_owner(caller_uid)?;

        if container.state() == ContainerState::Stopped {
            return Err(ContainersError::InvalidState {
                name: name.to_string(),
                state: ContainerState::Stopped.to_string(),
            });
        }

        self.stop_subtree(name).await
    }

    async fn stop_subtree(
        &mut self,
        name: &ContainerName,
    ) -> Result<Vec<ContainerName>> {
        let mut subtree = self.descendants(name);
        subtree.push(name.clone());
        // deepest first
        subtree.sort_by_key(|b| std::cmp::Reverse(b.depth()));

        let mut stopped = Vec::new();
        for member in subtree {
            if member.is_root() {
                continue;
            }
            if self.get(&member)?.state() == ContainerState::Stopped {
                continue;
            }
            self.teardown(&member).await?;
            stopped.push(member);
        }

        Ok(stopped)
    }

    /// Kills the payload, drains and removes the cgroups, clears the
    /// runtime state of one node.
    async fn teardown(&mut self, name: &ContainerName) -> Result<()> {
        let cname = name.as_str().to_string();

        if self.cgroups.dir(Subsystem::Freezer, &cname).exists() {
            if self.cgroups.frozen(&cname).unwrap_or(false) {
                self.cgroups.thaw(&cname).await?;
            }

            self.cgroups.kill_all(&cname, Signal::SIGKILL)?;
            self.cgroups.await_empty(&cname).await?;
            self.remove_cgroups(name);
        }

        if let Some(pid) = self.get(name)?.root_pid() {
            let _ = self.pids.remove(&pid);
        }
        self.get_mut(name)?.stopped();
        info!("container {name} stopped");
        Ok(())
    }

    fn remove_cgroups(&self, name: &ContainerName) {
        for subsystem in Subsystem::ALL {
            if let Err(e) = self.cgroups.remove(subsystem, name.as_str()) {
                warn!("can't remove {} cgroup of {name}: {e}", subsystem.name());
            }
        }
    }

    /// Freezes a subtree. Pausing below an already-paused ancestor is
    /// refused; the freezer already holds those tasks.
    pub async fn pause(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
    ) -> Result<Vec<ContainerName>> {
        let container = self.get(name)?;
        container.check_owner(caller_uid)?;

        if container.state() != ContainerState::Running {
            return Err(ContainersError::InvalidState {
                name: name.to_string(),
                state: container.state().to_string(),
            });
        }

        if let Some(paused) = self.paused_ancestor(name) {
            return Err(ContainersError::InvalidState {
                name: paused.to_string(),
                state: ContainerState::Paused.to_string(),
            });
        }

        self.cgroups.freeze(name.as_str()).await?;

        let mut touched = vec![name.clone()];
        touched.extend(self.descendants(name));
        touched.retain(|member| {
            self.cache
                .get(member.as_str())
                .map(|c| c.state() == ContainerState::Running)
                .unwrap_or(false)
        });
        for member in &touched {
            self.get_mut(member)?.paused();
        }

        Ok(touched)
    }

    /// Thaws a subtree frozen by [`Containers::pause`].
    pub async fn resume(
        &mut self,
        name: &ContainerName,
        caller_uid: Uid,
    ) -> Result<Vec<ContainerName>> {
        let container = self.get(name)?;
        container.check_owner(caller_uid)?;

        if container.state() != ContainerState::Paused {
            return Err(ContainersError::InvalidState {
                name: name.to_string(),
                state: container.state().to_string(),
            });
        }

        // resuming below the pause point would leave the ancestor's
        // freezer in charge anyway
        if let Some(paused) = self.paused_ancestor(name) {
            return Err(ContainersError::InvalidState {
                name: paused.to_string(),
                state: ContainerState::Paused.to_string(),
            });
        }

        self.cgroups.thaw(name.as_str()).await?;

        let mut touched = vec![name.clone()];
        touched.extend(self.descendants(name));
        touched.retain(|member| {
            self.cache
                .get(member.as_str())
                .map(|c| c.state() == ContainerState::Paused)
                .unwrap_or(false)
        });

        for member in &touched {
            // nested freezers stay FROZEN after the ancestor thaws
            if self.cgroups.frozen(member.as_str()).unwrap_or(false) {
                self.cgroups.thaw(member.as_str()).await?;
            }
            self.get_mut(member)?.resumed();
        }

        Ok(touched)
    }

    fn paused_ancestor(&self, name: &ContainerName) -> Option<ContainerName> {
        name.ancestors().into_iter().find(|ancestor| {
            self.cache
                .get(ancestor.as_str())
                .map(|c| c.state() == ContainerState::Paused)
                .unwrap_or(false)
        })
    }

    pub fn kill(
        &self,
        name: &ContainerName,
        caller_uid: Uid,
        signal: Signal,
    ) -> Result<()> {
        let container = self.get(name)?;
        container.check_owner(caller_uid)?;
        container.kill(signal)
    }

    // exit delivery and respawn

    /// Resolves a reaped pid to its container and delivers the exit.
    /// Returns the container name when the pid belonged to a payload.
    pub fn deliver_exit(
        &mut self,
        pid: Pid,
        status: i32,
    ) -> Option<ContainerName> {
        let name = self.pids.remove(&pid)?;

        let oom_killed = self.cgroups.oom_killed(name.as_str());
        if let Ok(container) = self.get_mut(&name) {
            // an oom kill surfaces as SIGKILL with the oom flag set
            let status = if oom_killed { 9 } else { status };
            container.deliver_exit(status, oom_killed);
        }

        Some(name)
    }

    /// Restarts a dead payload in its existing envelope.
    pub fn respawn(&mut self, name: &ContainerName) -> Result<()> {
        let container = self.get(name)?;
        if !container.wants_respawn() {
            return Err(ContainersError::InvalidState {
                name: name.to_string(),
                state: container.state().to_string(),
            });
        }

        let env = self.prepare_workdir(name)?;
        let pid = task::spawn(&env, &self.cgroups)?;
        let _ = self.pids.insert(pid, name.clone());

        let container = self.get_mut(name)?;
        let count = container.bump_respawn_count();
        container.started(
            Some(pid),
            Some(env.stdout_path.clone()),
            Some(env.stderr_path.clone()),
        );
        info!("container {name} respawned, attempt {count}");
        Ok(())
    }

    // guarantees

    /// Enforces the guarantee invariant along `name`'s ancestor chain:
    /// at every level, the guarantees of that level's children plus
    /// what that ancestor and the ancestors above it claim for
    /// themselves must fit in host memory minus the reserve. Unrelated
    /// branches of the tree do not compete. `proposed` stands in for
    /// `name`'s own guarantee when set.
    pub fn check_guarantees(
        &self,
        name: &ContainerName,
        proposed: Option<u64>,
    ) -> Result<()> {
        let available = self.host_memory.saturating_sub(self.memory_reserve);

        let guarantee_of = |member: &ContainerName| -> u64 {
            if let Some(proposed) = proposed {
                if member == name {
                    return proposed;
                }
            }
            self.cache
                .get(member.as_str())
                .map(|container| container.memory_guarantee())
                .unwrap_or(0)
        };

        let lineage = name.ancestors();
        for (level, parent) in lineage.iter().enumerate() {
            let siblings: u64 = self
                .cache
                .values()
                .map(|container| container.name())
                .filter(|member| member.parent().as_ref() == Some(parent))
                .map(guarantee_of)
                .sum();

            let ancestors_own: u64 =
                lineage[level..].iter().map(guarantee_of).sum();

            if siblings.saturating_add(ancestors_own) > available {
                return Err(ContainersError::ResourceNotAvailable {
                    msg: format!(
                        "memory guarantees under '{parent}' exceed \
                         {available} available bytes"
                    ),
                });
            }
        }

        Ok(())
    }

    // timer-driven maintenance

    /// Dead containers whose aging time expired.
    pub fn aged_out(&self) -> Vec<ContainerName> {
        self.cache
            .values()
            .filter(|container| container.aged_out())
            .map(|container| container.name().clone())
            .collect()
    }

    pub async fn age_tick(&mut self) -> Vec<ContainerName> {
        let mut stopped = Vec::new();
        for name in self.aged_out() {
            match self.stop_subtree(&name).await {
                Ok(names) => stopped.extend(names),
                Err(e) => warn!("aging stop of {name} failed: {e}"),
            }
        }
        stopped
    }

    pub fn rotate_logs(&self) {
        for container in self.cache.values() {
            container.rotate_logs();
        }
    }

    /// Pids of dead payloads the tree still tracks; used after restart
    /// recovery to re-register exits.
    pub fn register_pid(&mut self, pid: Pid, name: ContainerName) {
        let _ = self.pids.insert(pid, name);
    }

    /// Registers a payload recovered from a previous worker. It is not
    /// a child of this process, so its exit never raises SIGCHLD here.
    pub fn register_foreign_pid(&mut self, pid: Pid, name: ContainerName) {
        let _ = self.pids.insert(pid, name);
        let _ = self.foreign.insert(pid);
    }

    /// Polls recovered payloads for exits the kernel delivered to
    /// someone else. The exit status of such payloads is unknowable.
    pub fn reap_foreign(&mut self) -> Vec<ContainerName> {
        let gone: Vec<Pid> = self
            .foreign
            .iter()
            .copied()
            .filter(|pid| {
                procfs::process::Process::new(pid.as_raw()).is_err()
            })
            .collect();

        let mut dead = Vec::new();
        for pid in gone {
            let _ = self.foreign.remove(&pid);
            let Some(name) = self.pids.remove(&pid) else {
                continue;
            };

            let oom_killed = self.cgroups.oom_killed(name.as_str());
            if let Ok(container) = self.get_mut(&name) {
                let (stdout, stderr) = {
                    let (o, e) = container.output_files();
                    (o.cloned(), e.cloned())
                };
                let respawn_count = container.respawn_count();
                container.restore_runtime(
                    ContainerState::Dead,
                    None,
                    if oom_killed { Some(9) } else { None },
                    oom_killed,
                    respawn_count,
                    stdout,
                    stderr,
                );
            }
            dead.push(name);
        }

        dead
    }

    pub fn host_cores(&self) -> u32 {
        self.host_cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_tree() -> Containers {
        Containers::new(
            CgroupManager::with_root(
                PathBuf::from("/nonexistent-cgroup-root"),
                Duration::from_millis(10),
            ),
            16,
            1 << 30,
            8 << 30,
            4,
            "host".to_string(),
            PathBuf::from("/tmp/porto-test-workdir"),
        )
    }

    fn root_uid() -> Uid {
        Uid::from_raw(0)
    }

    #[test]
    fn test_create_requires_parent() {
        let mut tree = test_tree();
        let name = ContainerName::parse("a/b").expect("name");

        let err = tree
            .create(&name, root_uid(), Gid::from_raw(0))
            .expect_err("parent is missing");
        assert!(matches!(err, ContainersError::NotFound { .. }));

        let parent = ContainerName::parse("a").expect("name");
        tree.create(&parent, root_uid(), Gid::from_raw(0)).expect("create a");
        tree.create(&name, root_uid(), Gid::from_raw(0)).expect("create a/b");
        assert_eq!(tree.list(), vec!["a", "a/b"]);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let mut tree = test_tree();
        let name = ContainerName::parse("a").expect("name");

        tree.create(&name, root_uid(), Gid::from_raw(0)).expect("create");
        let err = tree
            .create(&name, root_uid(), Gid::from_raw(0))
            .expect_err("duplicate");
        assert!(matches!(err, ContainersError::Exists { .. }));
    }

    #[test]
    fn test_create_enforces_capacity() {
        let mut tree = Containers::new(
            CgroupManager::with_root(
                PathBuf::from("/nonexistent-cgroup-root"),
                Duration::from_millis(10),
            ),
            1,
            0,
            8 << 30,
            4,
            "host".to_string(),
            PathBuf::from("/tmp/porto-test-workdir"),
        );

        let a = ContainerName::parse("a").expect("name");
        let b = ContainerName::parse("b").expect("name");
        tree.create(&a, root_uid(), Gid::from_raw(0)).expect("create");
        assert!(matches!(
            tree.create(&b, root_uid(), Gid::from_raw(0)),
            Err(ContainersError::ResourceNotAvailable { .. })
        ));
    }

    #[test]
    fn test_create_under_foreign_parent_denied() {
        let mut tree = test_tree();
        let parent = ContainerName::parse("a").expect("name");
        tree.create(&parent, Uid::from_raw(1000), Gid::from_raw(1000))
            .expect("create");

        let child = ContainerName::parse("a/b").expect("name");
        assert!(matches!(
            tree.create(&child, Uid::from_raw(1001), Gid::from_raw(1001)),
            Err(ContainersError::Permission { .. })
        ));

        // root may create anywhere
        tree.create(&child, root_uid(), Gid::from_raw(0)).expect("create");
    }

    #[test]
    fn test_guarantee_check_scoped_to_siblings_and_ancestors() {
        let mut tree = Containers::new(
            CgroupManager::with_root(
                PathBuf::from("/nonexistent-cgroup-root"),
                Duration::from_millis(10),
            ),
            16,
            1 << 30,       // reserve 1G
            4 << 30,       // host has 4G, so 3G are grantable
            4,
            "host".to_string(),
            PathBuf::from("/tmp/porto-test-workdir"),
        );

        for name in ["a", "a/x", "a/y", "b"] {
            let name = ContainerName::parse(name).expect("name");
            tree.create(&name, root_uid(), Gid::from_raw(0)).expect("create");
        }

        let ax = ContainerName::parse("a/x").expect("name");
        let ay = ContainerName::parse("a/y").expect("name");
        let a = ContainerName::parse("a").expect("name");
        let b = ContainerName::parse("b").expect("name");

        tree.get_mut(&ax)
            .expect("a/x")
            .set_property("memory_guarantee", "2G")
            .expect("set guarantee");
        tree.get_mut(&b)
            .expect("b")
            .set_property("memory_guarantee", "2G")
            .expect("set guarantee");

        // a/y competes with its sibling a/x only; b sits in another
        // branch and its 2G must not count here
        tree.check_guarantees(&ay, Some(1 << 30))
            .expect("2G + 1G fits under 'a'");

        assert!(matches!(
            tree.check_guarantees(&ay, Some(2 << 30)),
            Err(ContainersError::ResourceNotAvailable { .. })
        ));

        // the root level sums top-level containers' own guarantees, not
        // their subtrees
        tree.check_guarantees(&b, Some(3 << 30))
            .expect("3G for 'b' next to 'a' with no own guarantee");
        assert!(matches!(
            tree.check_guarantees(&b, Some(4u64 << 30)),
            Err(ContainersError::ResourceNotAvailable { .. })
        ));

        // an ancestor's own guarantee burdens its children's level
        tree.get_mut(&a)
            .expect("a")
            .set_property("memory_guarantee", "1G")
            .expect("set guarantee");
        assert!(matches!(
            tree.check_guarantees(&ay, Some(1 << 30)),
            Err(ContainersError::ResourceNotAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_destroy_refuses_paused_descendant() {
        let mut tree = test_tree();
        let a = ContainerName::parse("a").expect("name");
        let ab = ContainerName::parse("a/b").expect("name");
        tree.create(&a, root_uid(), Gid::from_raw(0)).expect("create");
        tree.create(&ab, root_uid(), Gid::from_raw(0)).expect("create");

        tree.get_mut(&ab).expect("get").started(None, None, None);
        tree.get_mut(&ab).expect("get").paused();

        let err = tree.destroy(&a, root_uid()).await.expect_err("paused child");
        assert!(matches!(err, ContainersError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_destroy_removes_subtree() {
        let mut tree = test_tree();
        for name in ["a", "a/b", "a/b/c"] {
            let name = ContainerName::parse(name).expect("name");
            tree.create(&name, root_uid(), Gid::from_raw(0)).expect("create");
        }

        let a = ContainerName::parse("a").expect("name");
        let removed = tree.destroy(&a, root_uid()).await.expect("destroy");
        assert_eq!(removed.len(), 3);
        assert!(tree.is_empty());

        // destroy is idempotent per subtree: a second call reports the
        // container as gone
        assert!(matches!(
            tree.destroy(&a, root_uid()).await,
            Err(ContainersError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_requires_command_on_leaf() {
        let mut tree = test_tree();
        let a = ContainerName::parse("a").expect("name");
        tree.create(&a, root_uid(), Gid::from_raw(0)).expect("create");

        assert!(matches!(
            tree.start(&a, root_uid()).await,
            Err(ContainersError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_meta_state_derivation() {
        let mut tree = test_tree();
        let a = ContainerName::parse("a").expect("name");
        let ab = ContainerName::parse("a/b").expect("name");
        tree.create(&a, root_uid(), Gid::from_raw(0)).expect("create");
        tree.create(&ab, root_uid(), Gid::from_raw(0)).expect("create");

        // fake the engine transitions without touching cgroups
        tree.get_mut(&a).expect("a").started(None, None, None);
        tree.get_mut(&ab)
            .expect("a/b")
            .started(Some(Pid::from_raw(4242)), None, None);

        assert_eq!(
            tree.display_state(&a).expect("state"),
            ContainerState::Meta
        );
        assert_eq!(
            tree.display_state(&ab).expect("state"),
            ContainerState::Running
        );

        // once the child stops, the parent reads back as running
        tree.get_mut(&ab).expect("a/b").stopped();
        assert_eq!(
            tree.display_state(&a).expect("state"),
            ContainerState::Running
        );
    }

    #[test]
    fn test_deliver_exit_resolves_pid() {
        let mut tree = test_tree();
        let a = ContainerName::parse("a").expect("name");
        tree.create(&a, root_uid(), Gid::from_raw(0)).expect("create");

        let pid = Pid::from_raw(31337);
        tree.get_mut(&a).expect("a").started(Some(pid), None, None);
        tree.register_pid(pid, a.clone());

        let delivered = tree.deliver_exit(pid, 0).expect("known pid");
        assert_eq!(delivered, a);
        assert_eq!(
            tree.get(&a).expect("a").state(),
            ContainerState::Dead
        );
        assert_eq!(tree.get(&a).expect("a").exit_status(), Some(0));

        // unknown pids are not ours
        assert!(tree.deliver_exit(Pid::from_raw(1), 0).is_none());
    }
}
