/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Request dispatch.
//!
//! The whole engine sits behind one mutex and every request holds it
//! for its full duration, so requests are processed one at a time
//! globally and each one observes all effects of the previous. Only
//! `Wait` releases the lock, parking on a registration instead.

use super::wait::WaitRegistry;
use crate::containers::{
    paths, properties, ContainerName, ContainerState, Containers,
    ContainersError,
};
use crate::persist::{self, Persist};
use crate::stats::Stats;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{Gid, Pid, Uid};
use porto_proto::rpc::{
    ContainerRequest, ContainerResponse, ConvertPathRequest,
    ConvertPathResponse, DataSchema, GetDataResponse, GetPropertyResponse,
    GetVersionResponse, KillRequest, ListDataResponse, ListPropertiesResponse,
    ListResponse, PropertySchema, SetPropertyRequest, WaitRequest,
    WaitResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, trace, warn};

/// Dynamic properties that map onto cgroup knobs and are re-applied
/// immediately when changed on a started container.
const RESOURCE_PROPERTIES: &[&str] = &[
    "memory_limit",
    "cpu_limit",
    "cpu_guarantee",
    "io_limit",
    "io_ops_limit",
];

/// Runtime data keys served by `GetData`.
const DATA_KEYS: &[(&str, &str)] = &[
    ("state", "current container state"),
    ("exit_status", "payload exit status, valid while dead"),
    ("oom_killed", "true when the payload was oom-killed"),
    ("root_pid", "payload pid, valid while running"),
    ("respawn_count", "respawns since the last start"),
    ("parent", "parent container"),
    ("stdout", "tail of captured stdout"),
    ("stderr", "tail of captured stderr"),
    ("porto_stat", "daemon counters, root container only"),
];

#[derive(Debug)]
pub struct Engine {
    pub tree: Containers,
    pub persist: Persist,
    pub waits: WaitRegistry,
    pub stats: Stats,
}

impl Engine {
    fn persist_one(&mut self, name: &ContainerName) {
        if name.is_root() {
            return;
        }
        if let Ok(container) = self.tree.get(name) {
            if let Err(e) = self.persist.save(&persist::record(container)) {
                warn!("can't persist {name}: {e}");
                self.stats.errors += 1;
            }
        }
    }

    fn persist_and_notify(&mut self, names: &[ContainerName]) {
        for name in names {
            self.persist_one(name);
            if let Ok(state) = self.tree.display_state(name) {
                self.waits.notify(name, state);
            }
        }
    }

    /// Delivers one reaped exit, fires waits, persists the transition
    /// and respawns when asked to.
    pub fn deliver_exit(&mut self, pid: Pid, status: i32) {
        let Some(name) = self.tree.deliver_exit(pid, status) else {
            // not a payload; most likely a launcher stub
            trace!("reaped unrelated pid {pid}");
            return;
        };

        self.persist_and_notify(std::slice::from_ref(&name));

        let wants_respawn = self
            .tree
            .get(&name)
            .map(|container| container.wants_respawn())
            .unwrap_or(false);
        if wants_respawn {
            match self.tree.respawn(&name) {
                Ok(()) => {
                    self.stats.spawned += 1;
                    self.persist_and_notify(std::slice::from_ref(&name));
                }
                Err(e) => {
                    warn!("respawn of {name} failed: {e}");
                    self.stats.errors += 1;
                }
            }
        }
    }
}

/// Identity of the requesting client, read from `SO_PEERCRED`.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub uid: Uid,
    pub gid: Gid,
}

#[derive(Debug, Clone)]
pub struct ContainerService {
    engine: Arc<Mutex<Engine>>,
}

impl ContainerService {
    pub fn new(engine: Engine) -> Self {
        Self { engine: Arc::new(Mutex::new(engine)) }
    }

    /// Handles one request. Every error becomes a response; only the
    /// transport may fail.
    pub async fn dispatch(
        &self,
        request: ContainerRequest,
        caller: Caller,
    ) -> ContainerResponse {
        let result = self.route(request, caller).await;

        match result {
            Ok(response) => response,
            Err(e) => ContainerResponse::error_response(e.wire(), e.to_string()),
        }
    }

    async fn route(
        &self,
        request: ContainerRequest,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        if let Some(r) = request.create {
            return self.create(&r.name, caller).await;
        }
        if let Some(r) = request.destroy {
            return self.destroy(&r.name, caller).await;
        }
        if let Some(_r) = request.list {
            return self.list().await;
        }
        if let Some(r) = request.start {
            return self.start(&r.name, caller).await;
        }
        if let Some(r) = request.stop {
            return self.stop(&r.name, caller).await;
        }
        if let Some(r) = request.pause {
            return self.pause(&r.name, caller).await;
        }
        if let Some(r) = request.resume {
            return self.resume(&r.name, caller).await;
        }
        if let Some(r) = request.kill {
            return self.kill(r, caller).await;
        }
        if let Some(r) = request.get_property {
            return self.get_property(&r.name, &r.property).await;
        }
        if let Some(r) = request.set_property {
            return self.set_property(r, caller).await;
        }
        if let Some(r) = request.get_data {
            return self.get_data(&r.name, &r.data).await;
        }
        if let Some(r) = request.wait {
            return self.wait(r).await;
        }
        if let Some(_r) = request.list_properties {
            return Ok(list_properties());
        }
        if let Some(_r) = request.list_data {
            return Ok(list_data());
        }
        if let Some(_r) = request.get_version {
            return Ok(get_version());
        }
        if let Some(r) = request.convert_path {
            return self.convert_path(r).await;
        }

        Err(ContainersError::Unknown { msg: "empty request".to_string() })
    }

    async fn create(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        engine.tree.create(&name, caller.uid, caller.gid)?;

        if let Ok(container) = engine.tree.get(&name) {
            if let Err(e) = engine.persist.save(&persist::record(container)) {
                // the tree must not advertise what the journal lost
                let _ = engine.tree.destroy(&name, Uid::from_raw(0)).await;
                return Err(ContainersError::Unknown {
                    msg: format!("can't persist new container: {e}"),
                });
            }
        }

        Ok(ContainerResponse::ok())
    }

    async fn destroy(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        let removed = engine.tree.destroy(&name, caller.uid).await?;
        for gone in &removed {
            if let Err(e) = engine.persist.remove(gone) {
                warn!("can't remove record of {gone}: {e}");
                engine.stats.errors += 1;
            }
        }

        Ok(ContainerResponse::ok())
    }

    async fn list(&self) -> Result<ContainerResponse, ContainersError> {
        let engine = self.engine.lock().await;
        Ok(ContainerResponse {
            list: Some(ListResponse { names: engine.tree.list() }),
            ..ContainerResponse::ok()
        })
    }

    async fn start(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        let touched = engine.tree.start(&name, caller.uid).await?;
        engine.stats.spawned += 1;
        engine.persist_and_notify(&touched);

        Ok(ContainerResponse::ok())
    }

    async fn stop(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        let touched = engine.tree.stop(&name, caller.uid).await?;
        engine.persist_and_notify(&touched);

        Ok(ContainerResponse::ok())
    }

    async fn pause(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        let touched = engine.tree.pause(&name, caller.uid).await?;
        engine.persist_and_notify(&touched);

        Ok(ContainerResponse::ok())
    }

    async fn resume(
        &self,
        name: &str,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let mut engine = self.engine.lock().await;

        let touched = engine.tree.resume(&name, caller.uid).await?;
        engine.persist_and_notify(&touched);

        Ok(ContainerResponse::ok())
    }

    async fn kill(
        &self,
        request: KillRequest,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(&request.name)?;
        let signal = Signal::try_from(request.signal).map_err(|_| {
            ContainersError::InvalidValue {
                msg: format!("invalid signal {}", request.signal),
            }
        })?;

        let engine = self.engine.lock().await;
        engine.tree.kill(&name, caller.uid, signal)?;
        Ok(ContainerResponse::ok())
    }

    async fn get_property(
        &self,
        name: &str,
        property: &str,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let engine = self.engine.lock().await;

        let value = engine.tree.get(&name)?.get_property(property)?;
        Ok(ContainerResponse {
            get_property: Some(GetPropertyResponse { value }),
            ..ContainerResponse::ok()
        })
    }

    async fn set_property(
        &self,
        request: SetPropertyRequest,
        caller: Caller,
    ) -> Result<ContainerResponse, ContainersError> {
        let SetPropertyRequest { name, property, value } = request;
        let name = ContainerName::parse(&name)?;
        let mut engine = self.engine.lock().await;

        engine.tree.get(&name)?.check_owner(caller.uid)?;

        if property == "memory_guarantee" {
            let proposed = properties::parse_size(&value)
                .map_err(|msg| ContainersError::InvalidValue { msg })?;
            engine.tree.check_guarantees(&name, Some(proposed))?;
        }

        let old = engine
            .tree
            .get(&name)?
            .raw_properties()
            .get(&property)
            .cloned();

        engine.tree.get_mut(&name)?.set_property(&property, &value)?;

        if RESOURCE_PROPERTIES.contains(&property.as_str()) {
            let cores = engine.tree.host_cores();
            if let Err(e) = engine
                .tree
                .get(&name)?
                .refresh_limits(engine.tree.cgroups(), cores)
            {
                engine
                    .tree
                    .get_mut(&name)?
                    .rollback_property(&property, old);
                return Err(e);
            }
        }

        if let Ok(container) = engine.tree.get(&name) {
            let record = persist::record(container);
            if let Err(e) = engine.persist.save(&record) {
                engine
                    .tree
                    .get_mut(&name)?
                    .rollback_property(&property, old);
                return Err(ContainersError::Unknown {
                    msg: format!("can't persist property change: {e}"),
                });
            }
        }

        info!("set {name} {property} = {value}");
        Ok(ContainerResponse::ok())
    }

    async fn get_data(
        &self,
        name: &str,
        key: &str,
    ) -> Result<ContainerResponse, ContainersError> {
        let name = ContainerName::parse(name)?;
        let engine = self.engine.lock().await;

        let container = engine.tree.get(&name)?;
        let state = engine.tree.display_state(&name)?;

        let value = match key {
            "state" => state.to_string(),
            "exit_status" => match (state, container.exit_status()) {
                (ContainerState::Dead, Some(status)) => status.to_string(),
                (ContainerState::Dead, None) => "unknown".to_string(),
                _ => {
                    return Err(ContainersError::InvalidState {
                        name: name.to_string(),
                        state: state.to_string(),
                    })
                }
            },
            "oom_killed" => match state {
                ContainerState::Dead => container.oom_killed().to_string(),
                _ => {
                    return Err(ContainersError::InvalidState {
                        name: name.to_string(),
                        state: state.to_string(),
                    })
                }
            },
            "root_pid" => match container.root_pid() {
                Some(pid) => pid.to_string(),
                None => {
                    return Err(ContainersError::InvalidState {
                        name: name.to_string(),
                        state: state.to_string(),
                    })
                }
            },
            "respawn_count" => container.respawn_count().to_string(),
            "parent" => match name.parent() {
                Some(parent) => parent.to_string(),
                None => {
                    return Err(ContainersError::InvalidData {
                        data: key.to_string(),
                    })
                }
            },
            "stdout" => container.read_output(false)?,
            "stderr" => container.read_output(true)?,
            "porto_stat" if name.is_root() => engine.stats.to_string(),
            _ => {
                return Err(ContainersError::InvalidData {
                    data: key.to_string(),
                })
            }
        };

        Ok(ContainerResponse {
            get_data: Some(GetDataResponse { value }),
            ..ContainerResponse::ok()
        })
    }

    async fn wait(
        &self,
        request: WaitRequest,
    ) -> Result<ContainerResponse, ContainersError> {
        let mut states = Vec::new();
        for state in &request.states {
            let state = ContainerState::from_str(state).ok_or_else(|| {
                ContainersError::InvalidValue {
                    msg: format!("invalid state '{state}'"),
                }
            })?;
            states.push(state);
        }

        let (id, rx) = {
            let mut engine = self.engine.lock().await;

            let mut names = Vec::new();
            for name in &request.names {
                let name = ContainerName::parse(name)?;
                let _ = engine.tree.get(&name)?;
                names.push(name);
            }

            if names.is_empty() {
                return Err(ContainersError::InvalidValue {
                    msg: "no containers to wait for".to_string(),
                });
            }

            // a transition that already happened satisfies the wait
            let predicate: &[ContainerState] = if states.is_empty() {
                &[ContainerState::Dead]
            } else {
                &states
            };
            for name in &names {
                let state = engine.tree.display_state(name)?;
                if predicate.contains(&state) {
                    return Ok(wait_response(name.to_string(), state.to_string()));
                }
            }

            engine.waits.register(names, states)
        };

        let resolution = if request.deadline_ms == 0 {
            rx.await.ok()
        } else {
            match tokio::time::timeout(
                Duration::from_millis(request.deadline_ms),
                rx,
            )
            .await
            {
                Ok(Ok(resolution)) => Some(resolution),
                _ => None,
            }
        };

        match resolution {
            Some((name, state)) => Ok(wait_response(name, state)),
            None => {
                let mut engine = self.engine.lock().await;
                engine.waits.remove(id);
                Ok(ContainerResponse {
                    wait: Some(WaitResponse {
                        name: String::new(),
                        state: String::new(),
                        timed_out: true,
                    }),
                    ..ContainerResponse::ok()
                })
            }
        }
    }

    async fn convert_path(
        &self,
        request: ConvertPathRequest,
    ) -> Result<ContainerResponse, ContainersError> {
        let engine = self.engine.lock().await;

        let source_chain = self.root_chain(&engine.tree, &request.source)?;
        let destination_chain =
            self.root_chain(&engine.tree, &request.destination)?;

        let absolute = paths::join_path(&source_chain, &request.path);
        let converted = paths::inner_path(&destination_chain, &absolute)
            .ok_or_else(|| ContainersError::InvalidPath {
                msg: format!(
                    "'{absolute}' is not reachable from '{}'",
                    request.destination
                ),
            })?;

        Ok(ContainerResponse {
            convert_path: Some(ConvertPathResponse { path: converted }),
            ..ContainerResponse::ok()
        })
    }

    /// Host path of a container's root: the join of every root on the
    /// way down from the host.
    fn root_chain(
        &self,
        tree: &Containers,
        name: &str,
    ) -> Result<String, ContainersError> {
        if name.is_empty() || name == "/" {
            return Ok(String::from("/"));
        }

        let name = ContainerName::parse(name)?;
        let mut chain = String::from("/");

        let mut lineage = name.ancestors();
        lineage.reverse();
        lineage.push(name);

        for member in lineage {
            if member.is_root() {
                continue;
            }
            let root = tree.get(&member)?.get_property("root")?;
            if root != "/" {
                chain = paths::join_path(&chain, &root);
            }
        }

        Ok(chain)
    }

    /// Reaps every child the kernel has for us and routes payload exits
    /// into the tree. Runs to completion before the next request.
    pub async fn reap_children(&self) {
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    let mut engine = self.engine.lock().await;
                    engine.deliver_exit(pid, code);
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    let mut engine = self.engine.lock().await;
                    engine.deliver_exit(pid, signal as i32);
                }
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    warn!("waitpid failed: {e}");
                    let mut engine = self.engine.lock().await;
                    engine.stats.errors += 1;
                    break;
                }
            }
        }
    }

    /// Periodic maintenance: aging, log rotation and foreign-payload
    /// liveness.
    pub async fn tick(&self) {
        let mut engine = self.engine.lock().await;

        let lost = engine.tree.reap_foreign();
        for name in &lost {
            engine.persist_and_notify(std::slice::from_ref(name));
        }

        let aged = engine.tree.age_tick().await;
        engine.persist_and_notify(&aged);

        engine.tree.rotate_logs();
        engine.waits.sweep_closed();
    }
}

fn wait_response(name: String, state: String) -> ContainerResponse {
    ContainerResponse {
        wait: Some(WaitResponse { name, state, timed_out: false }),
        ..ContainerResponse::ok()
    }
}

fn list_properties() -> ContainerResponse {
    ContainerResponse {
        list_properties: Some(ListPropertiesResponse {
            properties: properties::PROPERTIES
                .iter()
                .map(|def| PropertySchema {
                    name: def.name.to_string(),
                    description: def.description.to_string(),
                    dynamic: def.dynamic,
                })
                .collect(),
        }),
        ..ContainerResponse::ok()
    }
}

fn list_data() -> ContainerResponse {
    ContainerResponse {
        list_data: Some(ListDataResponse {
            data: DATA_KEYS
                .iter()
                .map(|(name, description)| DataSchema {
                    name: name.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        }),
        ..ContainerResponse::ok()
    }
}

fn get_version() -> ContainerResponse {
    ContainerResponse {
        get_version: Some(GetVersionResponse {
            tag: env!("CARGO_PKG_VERSION").to_string(),
            revision: String::new(),
        }),
        ..ContainerResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroups::CgroupManager;
    use porto_proto::rpc::{
        CreateRequest, GetPropertyRequest, StartRequest,
    };
    use porto_proto::Error as WireError;
    use std::path::PathBuf;

    fn test_service(tag: &str) -> (ContainerService, PathBuf) {
        let state_dir = std::env::temp_dir().join(format!(
            "portod-service-test-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&state_dir);

        let tree = Containers::new(
            CgroupManager::with_root(
                PathBuf::from("/nonexistent-cgroup-root"),
                Duration::from_millis(10),
            ),
            64,
            0,
            8 << 30,
            4,
            "host".to_string(),
            std::env::temp_dir(),
        );

        let persist =
            Persist::open(&state_dir).expect("open state directory");

        let service = ContainerService::new(Engine {
            tree,
            persist,
            waits: WaitRegistry::default(),
            stats: Stats::default(),
        });

        (service, state_dir)
    }

    fn caller(uid: u32) -> Caller {
        Caller { uid: Uid::from_raw(uid), gid: Gid::from_raw(uid) }
    }

    async fn create(
        service: &ContainerService,
        name: &str,
        as_uid: u32,
    ) -> ContainerResponse {
        service
            .dispatch(
                ContainerRequest {
                    create: Some(CreateRequest { name: name.to_string() }),
                    ..ContainerRequest::default()
                },
                caller(as_uid),
            )
            .await
    }

    async fn set(
        service: &ContainerService,
        name: &str,
        property: &str,
        value: &str,
        as_uid: u32,
    ) -> ContainerResponse {
        service
            .dispatch(
                ContainerRequest {
                    set_property: Some(SetPropertyRequest {
                        name: name.to_string(),
                        property: property.to_string(),
                        value: value.to_string(),
                    }),
                    ..ContainerRequest::default()
                },
                caller(as_uid),
            )
            .await
    }

    #[tokio::test]
    async fn test_convert_path_round_trip() {
        let (service, state_dir) = test_service("convert");

        for (name, root) in [
            ("abc", "/root_abc"),
            ("abc/def", "/root_def"),
            ("abc/def/gik", "/root_gik"),
        ] {
            let response = create(&service, name, 0).await;
            assert_eq!(response.error_kind(), WireError::Success);
            let response = set(&service, name, "root", root, 0).await;
            assert_eq!(response.error_kind(), WireError::Success);
        }

        let response = service
            .dispatch(
                ContainerRequest {
                    convert_path: Some(ConvertPathRequest {
                        path: "/".to_string(),
                        source: "abc/def/gik".to_string(),
                        destination: String::new(),
                    }),
                    ..ContainerRequest::default()
                },
                caller(0),
            )
            .await;

        assert_eq!(response.error_kind(), WireError::Success);
        assert_eq!(
            response.convert_path.expect("payload").path,
            "/root_abc/root_def/root_gik"
        );

        let _ = std::fs::remove_dir_all(&state_dir);
    }

    #[tokio::test]
    async fn test_foreign_caller_may_read_but_not_mutate() {
        let (service, state_dir) = test_service("permission");

        let response = create(&service, "a", 1000).await;
        assert_eq!(response.error_kind(), WireError::Success);
        let response = set(&service, "a", "command", "/bin/true", 1000).await;
        assert_eq!(response.error_kind(), WireError::Success);

        // a different user can neither start nor reconfigure
        let response = service
            .dispatch(
                ContainerRequest {
                    start: Some(StartRequest { name: "a".to_string() }),
                    ..ContainerRequest::default()
                },
                caller(1001),
            )
            .await;
        assert_eq!(response.error_kind(), WireError::Permission);

        let response = set(&service, "a", "command", "id", 1001).await;
        assert_eq!(response.error_kind(), WireError::Permission);

        // but reading is open to any authenticated user
        let response = service
            .dispatch(
                ContainerRequest {
                    get_property: Some(GetPropertyRequest {
                        name: "a".to_string(),
                        property: "command".to_string(),
                    }),
                    ..ContainerRequest::default()
                },
                caller(1001),
            )
            .await;
        assert_eq!(response.error_kind(), WireError::Success);
        assert_eq!(
            response.get_property.expect("payload").value,
            "/bin/true"
        );

        let _ = std::fs::remove_dir_all(&state_dir);
    }

    #[tokio::test]
    async fn test_wait_resolves_on_exit_delivery() {
        let (service, state_dir) = test_service("wait");

        let response = create(&service, "w", 0).await;
        assert_eq!(response.error_kind(), WireError::Success);

        // fake a started payload without touching cgroups
        {
            let engine = service.engine.clone();
            let mut engine = engine.lock().await;
            let name = ContainerName::parse("w").expect("name");
            let pid = Pid::from_raw(424_242);
            engine
                .tree
                .get_mut(&name)
                .expect("node")
                .started(Some(pid), None, None);
            engine.tree.register_pid(pid, name);
        }

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .dispatch(
                        ContainerRequest {
                            wait: Some(WaitRequest {
                                names: vec!["w".to_string()],
                                states: vec![],
                                deadline_ms: 5_000,
                            }),
                            ..ContainerRequest::default()
                        },
                        caller(0),
                    )
                    .await
            })
        };

        // let the waiter register before the exit arrives
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let engine = service.engine.clone();
            let mut engine = engine.lock().await;
            engine.deliver_exit(Pid::from_raw(424_242), 0);
        }

        let response = waiter.await.expect("join");
        let wait = response.wait.expect("payload");
        assert!(!wait.timed_out);
        assert_eq!(wait.name, "w");
        assert_eq!(wait.state, "dead");

        let _ = std::fs::remove_dir_all(&state_dir);
    }
}
