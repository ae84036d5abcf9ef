/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CgroupsError>;

#[derive(Error, Debug)]
pub enum CgroupsError {
    #[error("cgroup '{path}' not found")]
    NotFound { path: PathBuf },
    #[error("cgroup '{path}' is busy: {source}")]
    Busy { path: PathBuf, source: io::Error },
    #[error("cgroup '{path}' access denied: {source}")]
    Denied { path: PathBuf, source: io::Error },
    #[error("cgroup '{path}' io error: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("freezer stuck on '{path}'")]
    FreezerStuck { path: PathBuf },
}

impl CgroupsError {
    /// Classifies a raw io error by errno the way the wire layer needs it.
    pub fn classify(path: PathBuf, source: io::Error) -> Self {
        match source.raw_os_error() {
            Some(libc::ENOENT) => CgroupsError::NotFound { path },
            Some(libc::EBUSY) | Some(libc::ENOTEMPTY) => {
                CgroupsError::Busy { path, source }
            }
            Some(libc::EACCES) | Some(libc::EPERM) => {
                CgroupsError::Denied { path, source }
            }
            _ => CgroupsError::Io { path, source },
        }
    }
}
