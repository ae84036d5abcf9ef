/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Namespace plumbing that runs inside the payload process, between the
//! namespace clone and the final exec. Nothing here may be called from
//! the daemon itself: every function assumes it owns a private mount
//! namespace and changes process-global state.

use nix::mount::{mount, MsFlags};
use nix::unistd::{chdir, chroot, sethostname};
use std::path::Path;

/// Host paths bound into a container root when it provides none of its
/// own. `/sys` is read-only; the rest stay writable.
const BIND_PATHS: &[&str] = &["/dev", "/run", "/var", "/tmp"];

/// Procfs entries masked with a read-only bind of themselves, so a
/// root-owned payload cannot poke the host through them.
const PROC_MASK: &[&str] = &[
    "/proc/sysrq-trigger",
    "/proc/irq",
    "/proc/bus",
    "/proc/sys",
    "/proc/kcore",
];

/// Disconnects mount propagation from the host. A cloned mount
/// namespace keeps the host's peer groups, so without this every
/// mount below would leak back out.
pub fn make_private() -> nix::Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}

/// Mounts a fresh proc over `/proc` so the new pid namespace is
/// reflected there.
pub fn remount_proc() -> nix::Result<()> {
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
}

/// Makes the masked proc entries read-only binds over themselves.
pub fn mask_proc() -> nix::Result<()> {
    for path in PROC_MASK {
        if !Path::new(path).exists() {
            continue;
        }
        bind(*path, *path, true)?;
    }
    Ok(())
}

/// Moves the process into `root`: binds the root onto itself, brings in
/// the minimum set of host paths, mounts proc, then chroots and lands
/// in `/`.
pub fn pivot_into(root: &Path, readonly: bool) -> nix::Result<()> {
    bind(root, root, false)?;

    bind("/sys", &root.join("sys"), true)?;
    for path in BIND_PATHS {
        let target = root.join(&path[1..]);
        if Path::new(path).exists() && target.exists() {
            bind(*path, &target, false)?;
        }
    }

    mount(
        Some("proc"),
        &root.join("proc"),
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )?;

    if readonly {
        remount_readonly(root)?;
    }

    chdir(root)?;
    chroot(".")?;
    chdir("/")?;

    mask_proc()
}

/// Sets the container hostname. Only valid once the uts namespace is
/// owned by this process.
pub fn apply_hostname(name: &str) -> nix::Result<()> {
    sethostname(name)
}

fn bind<P1: ?Sized + nix::NixPath, P2: ?Sized + nix::NixPath>(
    source: &P1,
    target: &P2,
    readonly: bool,
) -> nix::Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )?;

    if readonly {
        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND
                | MsFlags::MS_REMOUNT
                | MsFlags::MS_RDONLY
                | MsFlags::MS_REC,
            None::<&str>,
        )?;
    }

    Ok(())
}

fn remount_readonly(root: &Path) -> nix::Result<()> {
    mount(
        None::<&str>,
        root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
}
