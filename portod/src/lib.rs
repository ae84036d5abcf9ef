/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! portod is a Linux container supervisor daemon.
//!
//! Clients connect over a unix stream socket and manage named,
//! hierarchical containers: create, configure, start, stop, pause,
//! resume, wait and destroy, with per-container namespaces, cgroups,
//! resource limits, captured output and exit-status reporting.
//!
//! The process splits in two: a master that owns the listening socket
//! and respawns the worker, and the worker that owns the container
//! engine. Containers outlive worker restarts; the worker rebuilds its
//! tree from the persisted records and the live kernel objects.

// Lint groups: https://doc.rust-lang.org/rustc/lints/groups.html
#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    unconditional_recursion,
    unused_comparisons,
    while_true
)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
#![warn(clippy::unwrap_used)]

use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

pub mod cgroups;
pub mod containers;
pub mod init;
pub mod master;
pub mod persist;
pub mod rpc;
pub mod stats;
pub mod task;

/// Default unix socket path for portod.
pub const PORTO_SOCKET: &str = "/run/porto.socket";

/// Default directory for persisted container records.
pub const PORTO_STATE_DIR: &str = "/var/lib/porto/state";

/// Default parent directory of per-container working directories.
pub const PORTO_WORKING_DIR: &str = "/var/lib/porto/containers";

/// Default exit code for successful termination of portod.
pub const EXIT_OKAY: i32 = 0;

/// Default exit code for a fatal initialization error of portod.
pub const EXIT_ERROR: i32 = 1;

/// Per-instance settings, populated from the command line.
#[derive(Debug, Clone)]
pub struct PortodRuntime {
    pub socket_path: PathBuf,
    pub state_dir: PathBuf,
    /// Containers without an explicit `cwd` get a directory below this.
    pub working_dir: PathBuf,
    pub max_containers: usize,
    /// Memory withheld from the guarantee accounting.
    pub memory_reserve: u64,
    /// Upper bound on freezer state transitions and teardown drains.
    pub freezer_timeout: Duration,
    /// Period of the maintenance timer (aging, log rotation).
    pub tick_interval: Duration,
    /// Pause between worker respawns.
    pub respawn_backoff: Duration,
}

impl Default for PortodRuntime {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(PORTO_SOCKET),
            state_dir: PathBuf::from(PORTO_STATE_DIR),
            working_dir: PathBuf::from(PORTO_WORKING_DIR),
            max_containers: 512,
            memory_reserve: 1 << 30,
            freezer_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(5),
            respawn_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs the worker on the given (already bound) listening socket.
/// Returns the process exit code.
pub fn run_worker(
    runtime: &PortodRuntime,
    listener: std::os::unix::net::UnixListener,
) -> i32 {
    info!("worker is pid {}", std::process::id());

    if let Err(e) = init::become_subreaper() {
        error!("can't become child subreaper: {e}");
        return EXIT_ERROR;
    }

    let tokio_runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(tokio_runtime) => tokio_runtime,
        Err(e) => {
            error!("can't build runtime: {e}");
            return EXIT_ERROR;
        }
    };

    match tokio_runtime.block_on(worker_main(runtime, listener)) {
        Ok(()) => EXIT_OKAY,
        Err(e) => {
            error!("{e:?}");
            EXIT_ERROR
        }
    }
}

async fn worker_main(
    runtime: &PortodRuntime,
    listener: std::os::unix::net::UnixListener,
) -> anyhow::Result<()> {
    listener
        .set_nonblocking(true)
        .context("set_nonblocking on inherited socket")?;
    let listener = tokio::net::UnixListener::from_std(listener)
        .context("adopting inherited socket")?;

    let persist = persist::Persist::open(&runtime.state_dir)
        .context("opening state directory")?;

    let cgroup_manager = cgroups::CgroupManager::new(runtime.freezer_timeout);
    if !cgroup_manager.base_available() {
        anyhow::bail!("cgroup hierarchies are not mounted");
    }

    std::fs::create_dir_all(&runtime.working_dir)
        .context("creating container working directory")?;

    let host_memory = init::host_memory().context("reading host memory")?;

    let mut tree = containers::Containers::new(
        cgroup_manager,
        runtime.max_containers,
        runtime.memory_reserve,
        host_memory,
        init::host_cores(),
        init::host_name(),
        runtime.working_dir.clone(),
    );

    let mut stats = stats::Stats::default();
    match persist::replay(&mut tree, &persist) {
        Ok(restored) => stats.restored = restored as u64,
        Err(e) => {
            // recovery failures must not take containers down with them
            error!("state replay failed: {e}");
            stats.restore_failed += 1;
        }
    }

    let service = rpc::ContainerService::new(rpc::Engine {
        tree,
        persist,
        waits: rpc::wait::WaitRegistry::default(),
        stats,
    });

    rpc::serve(listener, service, runtime.tick_interval)
        .await
        .context("reactor failed")?;

    info!("worker exiting");
    Ok(())
}
