/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use clap::Parser;
use portod::{init, master, PortodRuntime, EXIT_ERROR};
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

/// Command line options for portod.
///
/// Defines the configurable options which populate a [`PortodRuntime`].
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct PortodOptions {
    /// Listening socket path. Defaults to /run/porto.socket.
    #[clap(short, long, value_parser)]
    socket: Option<String>,
    /// Directory for persisted container records.
    /// Defaults to /var/lib/porto/state.
    #[clap(long, value_parser)]
    state_dir: Option<String>,
    /// Parent directory for per-container working directories.
    /// Defaults to /var/lib/porto/containers.
    #[clap(long, value_parser)]
    working_dir: Option<String>,
    /// Maximum number of containers.
    #[clap(long, value_parser)]
    max_containers: Option<usize>,
    /// Memory reserve withheld from guarantees, in bytes.
    #[clap(long, value_parser)]
    memory_reserve: Option<u64>,
    /// Freezer operation timeout in milliseconds.
    #[clap(long, value_parser)]
    freezer_timeout_ms: Option<u64>,
    /// Maintenance timer period in milliseconds.
    #[clap(long, value_parser)]
    tick_interval_ms: Option<u64>,
    /// Pause between worker respawns in milliseconds.
    #[clap(long, value_parser)]
    respawn_backoff_ms: Option<u64>,
    /// Toggle verbosity. Default false.
    #[clap(short, long)]
    verbose: bool,
    /// Run the container engine directly, without the supervising
    /// master process.
    #[clap(long)]
    worker: bool,
}

fn main() {
    let options = PortodOptions::parse();

    if let Err(e) = init::init_logging(options.verbose) {
        eprintln!("can't initialize logging: {e}");
        std::process::exit(EXIT_ERROR);
    }

    let defaults = PortodRuntime::default();
    let runtime = PortodRuntime {
        socket_path: options
            .socket
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_path),
        state_dir: options
            .state_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir),
        working_dir: options
            .working_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.working_dir),
        max_containers: options
            .max_containers
            .unwrap_or(defaults.max_containers),
        memory_reserve: options
            .memory_reserve
            .unwrap_or(defaults.memory_reserve),
        freezer_timeout: options
            .freezer_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.freezer_timeout),
        tick_interval: options
            .tick_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval),
        respawn_backoff: options
            .respawn_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.respawn_backoff),
    };

    let exit_code = if options.worker {
        match init::bind_socket(&runtime.socket_path) {
            Ok(listener) => portod::run_worker(&runtime, listener),
            Err(e) => {
                error!("{e}");
                EXIT_ERROR
            }
        }
    } else {
        master::run(runtime)
    };

    std::process::exit(exit_code);
}
