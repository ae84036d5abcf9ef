/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use crate::cgroups::CgroupsError;
use crate::persist::PersistError;
use crate::task::TaskError;
use porto_proto::Error as WireError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContainersError>;

#[derive(Error, Debug)]
pub enum ContainersError {
    #[error("container '{name}' already exists")]
    Exists { name: String },
    #[error("container '{name}' does not exist")]
    NotFound { name: String },
    #[error("container '{name}' in invalid state {state}")]
    InvalidState { name: String, state: String },
    #[error("invalid property '{property}'")]
    InvalidProperty { property: String },
    #[error("invalid data '{data}'")]
    InvalidData { data: String },
    #[error("invalid value: {msg}")]
    InvalidValue { msg: String },
    #[error("invalid path: {msg}")]
    InvalidPath { msg: String },
    #[error("permission denied: {msg}")]
    Permission { msg: String },
    #[error("resource not available: {msg}")]
    ResourceNotAvailable { msg: String },
    #[error(transparent)]
    Cgroups(#[from] CgroupsError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("{msg}")]
    Unknown { msg: String },
}

impl ContainersError {
    /// Wire error kind for the RPC response.
    pub fn wire(&self) -> WireError {
        match self {
            ContainersError::Exists { .. } => WireError::ContainerAlreadyExists,
            ContainersError::NotFound { .. } => {
                WireError::ContainerDoesNotExist
            }
            ContainersError::InvalidState { .. } => WireError::InvalidState,
            ContainersError::InvalidProperty { .. } => {
                WireError::InvalidProperty
            }
            ContainersError::InvalidData { .. } => WireError::InvalidData,
            ContainersError::InvalidValue { .. } => WireError::InvalidValue,
            ContainersError::InvalidPath { .. } => WireError::InvalidPath,
            ContainersError::Permission { .. } => WireError::Permission,
            ContainersError::ResourceNotAvailable { .. } => {
                WireError::ResourceNotAvailable
            }
            ContainersError::Task(e) => match e {
                TaskError::InvalidCommand { .. } => WireError::InvalidCommand,
                TaskError::InvalidPath { .. } => WireError::InvalidPath,
                TaskError::InvalidValue { .. } => WireError::InvalidValue,
                _ => WireError::Unknown,
            },
            ContainersError::Cgroups(_)
            | ContainersError::Persist(_)
            | ContainersError::Unknown { .. } => WireError::Unknown,
        }
    }
}
