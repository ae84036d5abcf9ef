/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Payload spawning.
//!
//! The parent forks a short-lived stub which clones the payload into its
//! namespaces. The stub writes the payload pid onto a close-on-exec pipe
//! and exits immediately, so the payload is reparented and the parent
//! learns a pid the payload itself could never report (inside its pid
//! namespace it is pid 1). The payload then prepares its envelope and
//! execs; any failure travels back over the same pipe as a single int:
//! `-errno` before exec, `+errno` from a failed exec, nothing on success
//! (the pipe closes on exec).

use super::error::strerror;
use super::{ns, wordexp, Result, TaskError};
use crate::cgroups::{CgroupManager, CgroupsError, Subsystem};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Gid, Pid, Uid};
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use tracing::error;

/// Marks a reported errno as coming from chdir/chroot so the parent can
/// classify it as `InvalidPath` instead of `Unknown`.
const STAGE_PATH: i32 = 1 << 16;

/// Marks a reported errno as a word-expansion failure of the command
/// string, classified as `InvalidValue`.
const STAGE_WORDEXP: i32 = 1 << 17;

/// Everything the payload needs to build its envelope before exec.
#[derive(Debug, Clone)]
pub struct TaskEnv {
    /// Container path, used for cgroup attachment.
    pub container: String,
    pub command: String,
    pub cwd: PathBuf,
    pub root: Option<PathBuf>,
    pub root_readonly: bool,
    pub hostname: Option<String>,
    pub user: String,
    pub uid: Uid,
    pub gid: Gid,
    /// Final payload environment, prefix entries first.
    pub env: Vec<(String, String)>,
    pub stdin_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Subsystems whose cgroups the payload attaches itself to.
    pub cgroups: Vec<Subsystem>,
    /// `(resource, soft, hard)` rlimits applied before exec.
    pub ulimits: Vec<(u32, u64, u64)>,
    pub isolate: bool,
    /// Bitmask of capabilities kept in the bounding set for a non-root
    /// payload.
    pub keep_caps: u64,
}

/// Spawns the payload and waits for the synchronous verdict from the
/// status pipe. Returns the payload pid as seen from the host.
pub fn spawn(env: &TaskEnv, cgroups: &CgroupManager) -> Result<Pid> {
    let mut pipe = [0i32; 2];
    if unsafe { libc::pipe2(pipe.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let [rfd, wfd] = pipe;

    match unsafe { fork() } {
        Err(e) => {
            unsafe {
                let _ = libc::close(rfd);
                let _ = libc::close(wfd);
            }
            Err(TaskError::Unknown { msg: format!("fork(): {e}") })
        }
        Ok(ForkResult::Child) => stub(env, cgroups, rfd, wfd),
        Ok(ForkResult::Parent { child }) => {
            let _ = waitpid(child, None);
            unsafe {
                let _ = libc::close(wfd);
            }

            let verdict = await_verdict(rfd, &env.command);
            unsafe {
                let _ = libc::close(rfd);
            }
            verdict
        }
    }
}

/// The intermediate child: detaches into its own session, clones the
/// payload with the requested namespaces, reports the payload pid and
/// exits.
fn stub(
    env: &TaskEnv,
    cgroups: &CgroupManager,
    rfd: RawFd,
    wfd: RawFd,
) -> ! {
    let _ = nix::unistd::setsid();

    let mut clone = clone3::Clone3::default();
    let _ = clone.exit_signal(libc::SIGCHLD as u64);

    if env.isolate {
        let _ = clone.flag_newpid();
        let _ = clone.flag_newns();
        let _ = clone.flag_newuts();
        let _ = clone.flag_newipc();
    }

    match unsafe { clone.call() } {
        Err(e) => {
            // a non-positive pid tells the parent the clone itself failed
            write_int(wfd, -e.0);
            unsafe { libc::_exit(libc::EXIT_FAILURE) }
        }
        Ok(0) => payload(env, cgroups, rfd, wfd),
        Ok(pid) => {
            write_int(wfd, pid);
            unsafe { libc::_exit(libc::EXIT_SUCCESS) }
        }
    }
}

fn await_verdict(rfd: RawFd, command: &str) -> Result<Pid> {
    let pid = match read_int(rfd) {
        Ok(Some(pid)) if pid > 0 => pid,
        Ok(Some(errno)) => {
            return Err(TaskError::Unknown {
                msg: format!("clone(): {}", strerror(-errno)),
            })
        }
        Ok(None) | Err(_) => {
            return Err(TaskError::Unknown {
                msg: "can't read pid from the child".to_string(),
            })
        }
    };

    match read_int(rfd) {
        // pipe closed on exec
        Ok(None) => Ok(Pid::from_raw(pid)),
        Ok(Some(code)) if code > 0 => match code {
            libc::ENOENT | libc::EACCES => Err(TaskError::InvalidCommand {
                msg: format!("{command}: {}", strerror(code)),
            }),
            _ => Err(TaskError::Unknown {
                msg: format!("child exec: {}", strerror(code)),
            }),
        },
        Ok(Some(code)) => {
            let errno = -code;
            if errno & STAGE_PATH != 0 {
                Err(TaskError::InvalidPath {
                    msg: strerror(errno & !STAGE_PATH),
                })
            } else if errno & STAGE_WORDEXP != 0 {
                Err(TaskError::InvalidValue {
                    msg: format!(
                        "word expansion of '{command}' failed"
                    ),
                })
            } else {
                Err(TaskError::Unknown {
                    msg: format!("child prepare: {}", strerror(errno)),
                })
            }
        }
        // a short read leaves the payload state unknowable
        Err(_) => Err(TaskError::Unknown {
            msg: "can't read result from the child".to_string(),
        }),
    }
}

/// Runs in the payload process. Never returns: either execs the command
/// or reports an errno on the pipe and exits.
fn payload(
    env: &TaskEnv,
    cgroups: &CgroupManager,
    rfd: RawFd,
    wfd: RawFd,
) -> ! {
    unsafe {
        let _ = libc::close(rfd);
    }

    reset_signal_handlers();

    if unsafe { libc::prctl(libc::PR_SET_KEEPCAPS, 0, 0, 0, 0) } < 0 {
        report(wfd, -errno());
    }

    if env.isolate {
        if let Err(e) = ns::make_private() {
            report(wfd, -(e as i32));
        }
        if let Err(e) = ns::remount_proc() {
            report(wfd, -(e as i32));
        }
    }

    for subsystem in &env.cgroups {
        if let Err(e) =
            cgroups.attach(*subsystem, &env.container, nix::unistd::getpid())
        {
            report(wfd, -cgroups_errno(&e));
        }
    }

    let wfd = close_all_fds(wfd);

    // stdio must land on fds 0, 1, 2 in order
    if open_cstr(&env.stdin_path, libc::O_RDONLY, 0) < 0 {
        report(wfd, -errno());
    }

    for path in [&env.stdout_path, &env.stderr_path] {
        let fd = open_cstr(
            path,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND,
            0o700,
        );
        if fd < 0 {
            report(wfd, -errno());
        }
        if unsafe { libc::fchown(fd, env.uid.as_raw(), env.gid.as_raw()) } < 0
        {
            report(wfd, -errno());
        }
    }

    if let Some(root) = &env.root {
        if let Err(e) = ns::pivot_into(root, env.root_readonly) {
            report(wfd, -(STAGE_PATH | e as i32));
        }
    }

    if env.isolate {
        if let Some(hostname) = &env.hostname {
            if let Err(e) = ns::apply_hostname(hostname) {
                report(wfd, -(e as i32));
            }
        }
    }

    if let Err(e) = nix::unistd::chdir(&env.cwd) {
        report(wfd, -(STAGE_PATH | e as i32));
    }

    for (resource, soft, hard) in &env.ulimits {
        let limit = libc::rlimit {
            rlim_cur: *soft as libc::rlim_t,
            rlim_max: *hard as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(*resource as _, &limit) } < 0 {
            report(wfd, -errno());
        }
    }

    if !env.uid.is_root() {
        drop_bounding_caps(env.keep_caps);
    }

    if unsafe { libc::setgid(env.gid.as_raw()) } < 0 {
        report(wfd, -errno());
    }

    let user = CString::new(env.user.as_str()).unwrap_or_default();
    if unsafe { libc::initgroups(user.as_ptr(), env.gid.as_raw()) } < 0 {
        report(wfd, -errno());
    }

    if unsafe { libc::setuid(env.uid.as_raw()) } < 0 {
        report(wfd, -errno());
    }

    unsafe {
        let _ = libc::umask(0);
        let _ = libc::clearenv();
    }

    let words = match wordexp::expand(&env.command, &env.env) {
        Ok(words) if !words.is_empty() => words,
        _ => report(wfd, -(STAGE_WORDEXP | libc::EINVAL)),
    };

    let argv: Vec<CString> = words
        .into_iter()
        .filter_map(|word| CString::new(word).ok())
        .collect();
    if argv.is_empty() {
        report(wfd, -(STAGE_WORDEXP | libc::EINVAL));
    }

    let envp: Vec<CString> = env
        .env
        .iter()
        .filter_map(|(key, value)| CString::new(format!("{key}={value}")).ok())
        .collect();

    let mut argv_ptrs: Vec<*const libc::c_char> =
        argv.iter().map(|arg| arg.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let mut envp_ptrs: Vec<*const libc::c_char> =
        envp.iter().map(|entry| entry.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    unsafe {
        let _ = libc::execvpe(
            argv[0].as_ptr(),
            argv_ptrs.as_ptr(),
            envp_ptrs.as_ptr(),
        );
    }

    report(wfd, errno())
}

/// Writes the verdict and exits. A failed write still exits with
/// `EXIT_FAILURE`; the parent maps the resulting short read to an
/// unknown error.
fn report(wfd: RawFd, result: i32) -> ! {
    write_int(wfd, result);
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

fn write_int(fd: RawFd, value: i32) {
    let bytes = value.to_ne_bytes();
    let _ = unsafe {
        libc::write(fd, bytes.as_ptr().cast(), bytes.len())
    };
}

fn read_int(fd: RawFd) -> io::Result<Option<i32>> {
    let mut bytes = [0u8; 4];
    let mut read = 0usize;

    while read < bytes.len() {
        let n = unsafe {
            libc::read(
                fd,
                bytes[read..].as_mut_ptr().cast(),
                bytes.len() - read,
            )
        };
        match n {
            0 if read == 0 => return Ok(None),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read on status pipe",
                ))
            }
            n if n < 0 => {
                let e = io::Error::last_os_error();
                if e.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(e);
            }
            n => read += n as usize,
        }
    }

    Ok(Some(i32::from_ne_bytes(bytes)))
}

fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
}

fn cgroups_errno(e: &CgroupsError) -> i32 {
    match e {
        CgroupsError::NotFound { .. } => libc::ENOENT,
        CgroupsError::Busy { source, .. }
        | CgroupsError::Denied { source, .. }
        | CgroupsError::Io { source, .. } => {
            source.raw_os_error().unwrap_or(libc::EINVAL)
        }
        CgroupsError::FreezerStuck { .. } => libc::EBUSY,
    }
}

fn reset_signal_handlers() {
    for signal in 1..32 {
        if signal == libc::SIGKILL || signal == libc::SIGSTOP {
            continue;
        }
        unsafe {
            let _ = libc::signal(signal, libc::SIG_DFL);
        }
    }

    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        let _ = libc::sigemptyset(&mut set);
        let _ = libc::sigprocmask(libc::SIG_SETMASK, &set, std::ptr::null_mut());
    }
}

/// Closes every inherited descriptor except the status pipe.
fn close_all_fds(wfd: RawFd) -> RawFd {
    let max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    let max = if max > 0 { max as RawFd } else { 1024 };

    for fd in 0..max {
        if fd != wfd {
            unsafe {
                let _ = libc::close(fd);
            }
        }
    }

    wfd
}

fn drop_bounding_caps(keep: u64) {
    for cap in 0..64u64 {
        if keep & (1 << cap) != 0 {
            continue;
        }
        // EINVAL just means the kernel has fewer capabilities than we
        // iterate over
        let ret = unsafe {
            libc::prctl(libc::PR_CAPBSET_DROP, cap as libc::c_ulong, 0, 0, 0)
        };
        if ret < 0 && errno() != libc::EINVAL {
            error!("can't drop capability {cap}: {}", strerror(errno()));
        }
    }
}

fn open_cstr(path: &std::path::Path, flags: i32, mode: libc::mode_t) -> RawFd {
    use std::os::unix::ffi::OsStrExt;

    let Ok(path) = CString::new(path.as_os_str().as_bytes()) else {
        return -1;
    };

    unsafe { libc::open(path.as_ptr(), flags, mode as libc::c_uint) }
}
