/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The master process: owns the listening socket, forks the worker and
//! respawns it on crash. The master never touches containers, so a
//! worker crash leaves every payload running.
//!
//! This process stays synchronous: forking from inside an async runtime
//! is not safe, and the master has nothing to multiplex.

use crate::{init, PortodRuntime, EXIT_ERROR, EXIT_OKAY};
use nix::sys::signal::{kill, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{error, info, warn};

static SHUTDOWN_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_shutdown(signal: libc::c_int) {
    SHUTDOWN_SIGNAL.store(signal, Ordering::Relaxed);
}

fn pending_shutdown() -> Option<Signal> {
    match SHUTDOWN_SIGNAL.load(Ordering::Relaxed) {
        0 => None,
        signal => Signal::try_from(signal).ok(),
    }
}

fn install_signal_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_shutdown),
        SaFlags::empty(),
        SigSet::empty(),
    );

    unsafe {
        let _ = nix::sys::signal::sigaction(Signal::SIGTERM, &action)?;
        let _ = nix::sys::signal::sigaction(Signal::SIGINT, &action)?;
    }
    Ok(())
}

/// Runs the supervisor loop. Only returns in the master process or in
/// a worker that finished.
pub fn run(runtime: PortodRuntime) -> i32 {
    let listener = match init::bind_socket(&runtime.socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            error!("can't create listening socket: {e}");
            return EXIT_ERROR;
        }
    };

    if let Err(e) = install_signal_handlers() {
        error!("can't install signal handlers: {e}");
        return EXIT_ERROR;
    }

    info!("master is pid {}", std::process::id());

    let mut respawns: u64 = 0;
    loop {
        let worker_listener = match listener.try_clone() {
            Ok(worker_listener) => worker_listener,
            Err(e) => {
                error!("can't clone listener for worker: {e}");
                return EXIT_ERROR;
            }
        };

        match unsafe { fork() } {
            Err(e) => {
                error!("fork(): {e}");
                return EXIT_ERROR;
            }
            Ok(ForkResult::Child) => {
                drop(listener);
                return crate::run_worker(&runtime, worker_listener);
            }
            Ok(ForkResult::Parent { child }) => {
                info!("spawned worker pid {child}");

                match supervise(child) {
                    WorkerExit::Clean => {
                        info!("worker shut down cleanly");
                        return EXIT_OKAY;
                    }
                    WorkerExit::Shutdown => {
                        return EXIT_OKAY;
                    }
                    WorkerExit::Crashed(describe) => {
                        respawns += 1;
                        warn!(
                            "worker died ({describe}), respawn {respawns} in {:?}",
                            runtime.respawn_backoff
                        );
                        std::thread::sleep(runtime.respawn_backoff);
                    }
                }
            }
        }
    }
}

enum WorkerExit {
    /// Exit code zero or a shutdown signal: do not respawn.
    Clean,
    /// The master itself was asked to shut down.
    Shutdown,
    /// Anything else: respawn.
    Crashed(String),
}

fn supervise(child: Pid) -> WorkerExit {
    loop {
        if let Some(signal) = pending_shutdown() {
            info!("master received {signal}, stopping worker");
            let _ = kill(child, signal);
            // reap before leaving; containers keep running regardless
            loop {
                match waitpid(child, None) {
                    Err(nix::errno::Errno::EINTR) => continue,
                    _ => break,
                }
            }
            return WorkerExit::Shutdown;
        }

        match waitpid(child, None) {
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return WorkerExit::Crashed(format!("waitpid: {e}")),
            Ok(WaitStatus::Exited(_, 0)) => return WorkerExit::Clean,
            Ok(WaitStatus::Exited(_, code)) => {
                return WorkerExit::Crashed(format!("exit code {code}"))
            }
            Ok(WaitStatus::Signaled(_, Signal::SIGTERM, _))
            | Ok(WaitStatus::Signaled(_, Signal::SIGINT, _)) => {
                return WorkerExit::Clean
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return WorkerExit::Crashed(format!("signal {signal}"))
            }
            Ok(_) => continue,
        }
    }
}
