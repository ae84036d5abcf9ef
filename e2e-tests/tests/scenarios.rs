/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! End-to-end lifecycle scenarios against a running daemon.

use e2e_tests::{client_or_skip, unique_name, socket_path};
use porto_client::PortoClient;
use porto_proto::Error;

fn api_error(e: &porto_client::ClientError) -> Option<Error> {
    PortoClient::api_error(e)
}

#[tokio::test]
async fn test_simple_run() {
    e2e_tests::require_root!("test_simple_run");
    let Some(mut client) = client_or_skip("test_simple_run").await else {
        return;
    };

    let name = unique_name("simple");
    client.create(&name).await.expect("create");
    client
        .set_property(&name, "command", "/bin/true")
        .await
        .expect("set command");
    client.start(&name).await.expect("start");

    let wait = client.wait(&[&name], &[], 5_000).await.expect("wait");
    assert!(!wait.timed_out, "payload should die within 5s");
    assert_eq!(wait.state, "dead");

    assert_eq!(client.get_data(&name, "state").await.expect("state"), "dead");
    assert_eq!(
        client.get_data(&name, "exit_status").await.expect("exit status"),
        "0"
    );
    assert_eq!(
        client.get_data(&name, "oom_killed").await.expect("oom flag"),
        "false"
    );

    client.destroy(&name).await.expect("destroy");
}

#[tokio::test]
async fn test_oom_kill() {
    e2e_tests::require_root!("test_oom_kill");
    let Some(mut client) = client_or_skip("test_oom_kill").await else {
        return;
    };

    let name = unique_name("oom");
    client.create(&name).await.expect("create");
    client
        .set_property(&name, "command", "sort -S 1G /dev/urandom")
        .await
        .expect("set command");
    client
        .set_property(&name, "memory_limit", "32M")
        .await
        .expect("set memory limit");
    client.start(&name).await.expect("start");

    let wait = client.wait(&[&name], &[], 60_000).await.expect("wait");
    assert!(!wait.timed_out, "sort should be oom-killed within 60s");

    assert_eq!(
        client.get_data(&name, "exit_status").await.expect("exit status"),
        "9"
    );
    assert_eq!(
        client.get_data(&name, "oom_killed").await.expect("oom flag"),
        "true"
    );

    client.destroy(&name).await.expect("destroy");
}

#[tokio::test]
async fn test_hierarchy_cascade() {
    e2e_tests::require_root!("test_hierarchy_cascade");
    let Some(mut client) = client_or_skip("test_hierarchy_cascade").await
    else {
        return;
    };

    let a = unique_name("casc");
    let ab = format!("{a}/b");
    let abc = format!("{a}/b/c");

    for name in [&a, &ab, &abc] {
        client.create(name).await.expect("create");
    }
    client
        .set_property(&abc, "command", "sleep 1000")
        .await
        .expect("set command");

    client.start(&abc).await.expect("start leaf");
    assert_eq!(client.get_data(&a, "state").await.expect("state"), "meta");
    assert_eq!(client.get_data(&ab, "state").await.expect("state"), "meta");
    assert_eq!(
        client.get_data(&abc, "state").await.expect("state"),
        "running"
    );

    client.stop(&ab).await.expect("stop middle");
    assert_eq!(client.get_data(&a, "state").await.expect("state"), "running");
    assert_eq!(client.get_data(&ab, "state").await.expect("state"), "stopped");
    assert_eq!(
        client.get_data(&abc, "state").await.expect("state"),
        "stopped"
    );

    client.destroy(&a).await.expect("destroy");
}

#[tokio::test]
async fn test_pause_subtree() {
    e2e_tests::require_root!("test_pause_subtree");
    let Some(mut client) = client_or_skip("test_pause_subtree").await else {
        return;
    };

    let a = unique_name("pause");
    let ab = format!("{a}/b");

    for name in [&a, &ab] {
        client.create(name).await.expect("create");
        client
            .set_property(name, "command", "sleep 1000")
            .await
            .expect("set command");
    }

    client.start(&a).await.expect("start parent");
    client.start(&ab).await.expect("start child");

    client.pause(&a).await.expect("pause");
    assert_eq!(client.get_data(&a, "state").await.expect("state"), "paused");
    assert_eq!(client.get_data(&ab, "state").await.expect("state"), "paused");

    // resuming below the pause point must fail
    let err = client.resume(&ab).await.expect_err("resume of child");
    assert_eq!(api_error(&err), Some(Error::InvalidState));

    client.resume(&a).await.expect("resume");
    assert_eq!(client.get_data(&a, "state").await.expect("state"), "running");
    assert_eq!(
        client.get_data(&ab, "state").await.expect("state"),
        "running"
    );

    client.destroy(&a).await.expect("destroy");
}

/// Kills the worker with SIGKILL and expects the respawned worker to
/// pick the container back up and deliver its exit.
#[tokio::test]
async fn test_worker_crash_recovery() {
    e2e_tests::require_root!("test_worker_crash_recovery");
    let Some(mut client) = client_or_skip("test_worker_crash_recovery").await
    else {
        return;
    };

    let name = unique_name("recovery");
    client.create(&name).await.expect("create");
    client
        .set_property(&name, "command", "sleep 3")
        .await
        .expect("set command");
    client.start(&name).await.expect("start");

    let Some(worker) = find_worker_pid() else {
        eprintln!("skipping test_worker_crash_recovery: can't find worker");
        return;
    };
    nix::sys::signal::kill(worker, nix::sys::signal::Signal::SIGKILL)
        .expect("kill worker");

    // the old connection died with the worker
    let mut client = reconnect().await.expect("reconnect after respawn");

    let wait = client.wait(&[&name], &[], 30_000).await.expect("wait");
    assert!(!wait.timed_out, "exit must be delivered after recovery");
    assert_eq!(
        client.get_data(&name, "state").await.expect("state"),
        "dead"
    );

    client.stop(&name).await.expect("stop");
    client.destroy(&name).await.expect("destroy");
}

#[tokio::test]
async fn test_permissions() {
    e2e_tests::require_root!("test_permissions");
    let Some(mut client) = client_or_skip("test_permissions").await else {
        return;
    };

    let name = unique_name("perm");
    client.create(&name).await.expect("create as root");
    client
        .set_property(&name, "command", "/bin/true")
        .await
        .expect("set command");

    // an unprivileged caller may read but not mutate
    let outcome = as_nobody(&name);
    assert_eq!(outcome, NobodyOutcome::Expected, "unprivileged access rules");

    client.destroy(&name).await.expect("destroy");
}

#[derive(Debug, PartialEq, Eq)]
enum NobodyOutcome {
    Expected,
    Unexpected,
}

/// Forks, drops to `nobody`, and checks that Start and SetProperty are
/// refused while GetProperty succeeds. Credentials are per-process, so
/// a plain thread would not do.
fn as_nobody(name: &str) -> NobodyOutcome {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    match unsafe { fork() } {
        Err(_) => NobodyOutcome::Unexpected,
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => NobodyOutcome::Expected,
            _ => NobodyOutcome::Unexpected,
        },
        Ok(ForkResult::Child) => {
            let code = nobody_checks(name);
            unsafe { libc::_exit(code) }
        }
    }
}

fn nobody_checks(name: &str) -> i32 {
    if unsafe { libc::setgid(65534) } < 0 || unsafe { libc::setuid(65534) } < 0
    {
        return 2;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(_) => return 3,
    };

    runtime.block_on(async {
        let Ok(mut client) = PortoClient::connect(socket_path()).await else {
            return 4;
        };

        let start = client.start(name).await;
        let denied_start = matches!(
            start.as_ref().map_err(api_error),
            Err(Some(Error::Permission))
        );

        let set = client.set_property(name, "command", "id").await;
        let denied_set = matches!(
            set.as_ref().map_err(api_error),
            Err(Some(Error::Permission))
        );

        let readable = client.get_property(name, "command").await.is_ok();

        if denied_start && denied_set && readable {
            0
        } else {
            1
        }
    })
}

async fn reconnect() -> Option<PortoClient> {
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        if let Ok(client) = PortoClient::connect(socket_path()).await {
            return Some(client);
        }
    }
    None
}

/// The worker is the portod process whose parent is also portod.
fn find_worker_pid() -> Option<nix::unistd::Pid> {
    let processes = procfs::process::all_processes().ok()?;

    let mut portod_pids = std::collections::HashMap::new();
    let mut candidates = Vec::new();

    for process in processes.flatten() {
        let Ok(stat) = process.stat() else { continue };
        if stat.comm == "portod" {
            let _ = portod_pids.insert(stat.pid, stat.ppid);
            candidates.push((stat.pid, stat.ppid));
        }
    }

    candidates
        .into_iter()
        .find(|(_, ppid)| portod_pids.contains_key(ppid))
        .map(|(pid, _)| nix::unistd::Pid::from_raw(pid))
}
