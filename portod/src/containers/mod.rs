/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

pub use container::{Container, ContainerState};
pub use container_name::ContainerName;
pub use containers::Containers;
pub use error::{ContainersError, Result};

mod container;
mod container_name;
#[allow(clippy::module_inception)]
mod containers;
mod error;
pub mod paths;
pub mod properties;
