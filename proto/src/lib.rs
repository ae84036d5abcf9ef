/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Message definitions shared by the portod daemon and its clients.
//!
//! Every record that crosses the daemon socket or lands in the persisted
//! state directory is defined here as a hand-written [`prost::Message`],
//! so the daemon and the client agree on one schema without a codegen
//! step. Framing on the socket is a varint length prefix followed by the
//! encoded record; [`codec`] implements both directions.

#![warn(future_incompatible, nonstandard_style, unused)]
#![warn(clippy::unwrap_used)]

pub mod codec;
pub mod rpc;
pub mod state;

pub use rpc::Error;
