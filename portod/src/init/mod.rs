/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Process initialization shared by master and worker.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::Path;
use tracing::info;

pub(crate) mod logging;

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Logging(#[from] logging::LoggingError),
    #[error("can't bind '{path}': {source}")]
    Bind { path: String, source: io::Error },
}

pub fn init_logging(verbose: bool) -> Result<(), InitError> {
    let level = if verbose { log::Level::Debug } else { log::Level::Info };
    logging::init(level)?;
    Ok(())
}

/// Binds the daemon listening socket. Any user may connect; requests
/// are authorized per container against `SO_PEERCRED`.
pub fn bind_socket(path: &Path) -> Result<UnixListener, InitError> {
    if path.exists() {
        let _ = fs::remove_file(path);
    }

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let listener = UnixListener::bind(path).map_err(|e| InitError::Bind {
        path: path.display().to_string(),
        source: e,
    })?;

    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o666));

    info!("listening on {}", path.display());
    Ok(listener)
}

/// Makes the worker the reaper for orphaned descendants. The launcher's
/// stub exits immediately after cloning the payload, so payloads are
/// reparented here and their exits arrive as SIGCHLD.
pub fn become_subreaper() -> io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Total host memory in bytes.
pub fn host_memory() -> io::Result<u64> {
    let meminfo = {
        use procfs::Current;
        procfs::Meminfo::current()
    }
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(meminfo.mem_total)
}

pub fn host_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

pub fn host_name() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("localhost"))
}
