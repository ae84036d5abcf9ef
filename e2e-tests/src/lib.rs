/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Helpers for the end-to-end scenarios. The tests talk to a running
//! portod at the default socket (override with `PORTO_E2E_SOCKET`) and
//! skip themselves when no daemon or insufficient privileges are
//! around.

use porto_client::PortoClient;

pub const DEFAULT_SOCKET: &str = "/run/porto.socket";

pub fn socket_path() -> String {
    std::env::var("PORTO_E2E_SOCKET")
        .unwrap_or_else(|_| DEFAULT_SOCKET.to_string())
}

/// Connects to the daemon; `None` means the environment has no daemon
/// and the test should skip.
pub async fn client_or_skip(test: &str) -> Option<PortoClient> {
    match PortoClient::connect(socket_path()).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("skipping {test}: no daemon at {} ({e})", socket_path());
            None
        }
    }
}

/// A container name no other test run collides with.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Skips tests that drive real containers when not running as root.
#[macro_export]
macro_rules! require_root {
    ($test:expr) => {
        if !nix::unistd::Uid::effective().is_root() {
            eprintln!("skipping {}: requires root", $test);
            return;
        }
    };
}
