/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

pub use error::{Result, TaskError};
pub use launcher::{spawn, TaskEnv};
pub use wordexp::WordExpError;

mod error;
mod launcher;
pub mod ns;
pub mod wordexp;
