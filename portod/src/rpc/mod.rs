/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The worker reactor: socket accept, per-connection request framing,
//! signal handling and the maintenance timer, multiplexed on one
//! thread.

use nix::unistd::{Gid, Uid};
use porto_proto::codec;
use porto_proto::rpc::ContainerRequest;
use std::io;
use std::time::Duration;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, trace, warn};

pub use service::{Caller, ContainerService, Engine};

mod service;
pub mod wait;

/// Runs the reactor until a shutdown signal arrives.
pub async fn serve(
    listener: UnixListener,
    service: ContainerService,
    tick_interval: Duration,
) -> io::Result<()> {
    let mut sigchld = signal(SignalKind::child())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("worker serving requests");

    loop {
        tokio::select! {
            // exits observed by the kernel must be visible to the next
            // request on any connection
            biased;

            _ = sigchld.recv() => {
                service.reap_children().await;
            }
            _ = sigterm.recv() => {
                info!("worker received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("worker received SIGINT");
                break;
            }
            _ = sighup.recv() => {
                trace!("ignoring SIGHUP");
            }
            _ = ticker.tick() => {
                service.tick().await;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let service = service.clone();
                        let _ = tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, service).await {
                                trace!("connection closed: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }

    Ok(())
}

/// Serves one client connection. Requests are strictly serial: the
/// next request is not read until the previous response is written.
async fn handle_connection(
    stream: UnixStream,
    service: ContainerService,
) -> io::Result<()> {
    let credentials = stream.peer_cred()?;
    let caller = Caller {
        uid: Uid::from_raw(credentials.uid()),
        gid: Gid::from_raw(credentials.gid()),
    };

    trace!("new client, uid {}", credentials.uid());

    let (mut reader, mut writer) = stream.into_split();

    loop {
        let Some(request) =
            codec::read_message::<ContainerRequest, _>(&mut reader).await?
        else {
            return Ok(());
        };

        let response = if request.wait.is_some() {
            // a long wait dies with its connection; anything else runs
            // to completion
            tokio::select! {
                response = service.dispatch(request, caller) => Some(response),
                _ = connection_closed(&mut reader) => None,
            }
        } else {
            Some(service.dispatch(request, caller).await)
        };

        let Some(response) = response else {
            trace!("client went away mid-wait");
            return Ok(());
        };

        codec::write_message(&mut writer, &response).await?;
    }
}

/// Resolves when the peer closes (or violates the serial protocol by
/// sending while a response is pending).
async fn connection_closed(reader: &mut OwnedReadHalf) {
    use tokio::io::AsyncReadExt;

    let mut byte = [0u8; 1];
    let _ = reader.read(&mut byte).await;
}
