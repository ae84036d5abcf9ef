/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TaskError>;

#[derive(Error, Debug)]
pub enum TaskError {
    /// The payload binary could not be executed.
    #[error("invalid command: {msg}")]
    InvalidCommand { msg: String },
    /// The working directory or root could not be entered.
    #[error("invalid path: {msg}")]
    InvalidPath { msg: String },
    /// The command string failed word expansion.
    #[error("invalid command line: {msg}")]
    InvalidValue { msg: String },
    #[error("spawn failed: {msg}")]
    Unknown { msg: String },
    #[error("spawn io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

pub(super) fn strerror(errno: i32) -> String {
    io::Error::from_raw_os_error(errno).to_string()
}
