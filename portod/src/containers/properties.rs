/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! The container property surface.
//!
//! Properties are described by a table of validators rather than one
//! type per property: the daemon stores the raw string a client set and
//! re-parses it with the same functions whenever the typed value is
//! needed (at start, and when replaying persisted records).

use std::time::Duration;

/// CFS scheduling period used for cpu quotas.
pub const CPU_PERIOD_US: u64 = 100_000;

/// The kernel refuses cfs quotas below this.
pub const CPU_MIN_QUOTA_US: u64 = 1_000;

/// Upper bound for `stdout_limit`.
pub const MAX_STDOUT_LIMIT: u64 = 1 << 30;

/// Capabilities granted to a payload when `capabilities` is unset.
pub const DEFAULT_CAPABILITIES: &str = "CHOWN;DAC_OVERRIDE;FOWNER;FSETID;\
KILL;SETGID;SETUID;SETPCAP;LINUX_IMMUTABLE;NET_BIND_SERVICE;NET_ADMIN;\
NET_RAW;IPC_LOCK;SYS_CHROOT;SYS_PTRACE;SYS_ADMIN;SYS_BOOT;SYS_NICE;\
SYS_RESOURCE;MKNOD;AUDIT_WRITE;SETFCAP";

type Validate = fn(&str) -> Result<(), String>;

pub struct PropertyDef {
    pub name: &'static str,
    pub description: &'static str,
    /// Settable while the container is not `stopped`.
    pub dynamic: bool,
    pub validate: Validate,
}

pub static PROPERTIES: &[PropertyDef] = &[
    PropertyDef {
        name: "command",
        description: "command executed upon container start",
        dynamic: false,
        validate: validate_any,
    },
    PropertyDef {
        name: "cwd",
        description: "container working directory",
        dynamic: false,
        validate: validate_abs_path,
    },
    PropertyDef {
        name: "root",
        description: "container root directory",
        dynamic: false,
        validate: validate_abs_path,
    },
    PropertyDef {
        name: "root_readonly",
        description: "mount root directory read-only",
        dynamic: false,
        validate: validate_bool,
    },
    PropertyDef {
        name: "user",
        description: "user the command is executed as",
        dynamic: false,
        validate: validate_name,
    },
    PropertyDef {
        name: "group",
        description: "group the command is executed as",
        dynamic: false,
        validate: validate_name,
    },
    PropertyDef {
        name: "env",
        description: "container environment variables, semicolon separated",
        dynamic: false,
        validate: validate_env,
    },
    PropertyDef {
        name: "bind",
        description: "bind mounts: <source> <target> [ro|rw], semicolon separated",
        dynamic: false,
        validate: validate_binds,
    },
    PropertyDef {
        name: "devices",
        description: "devices exposed to the container: <device> [rwm]",
        dynamic: false,
        validate: validate_devices,
    },
    PropertyDef {
        name: "capabilities",
        description: "capabilities kept in the payload bounding set",
        dynamic: false,
        validate: validate_capabilities,
    },
    PropertyDef {
        name: "hostname",
        description: "hostname inside the container",
        dynamic: false,
        validate: validate_hostname,
    },
    PropertyDef {
        name: "memory_limit",
        description: "memory usage hard limit in bytes",
        dynamic: true,
        validate: validate_size,
    },
    PropertyDef {
        name: "memory_guarantee",
        description: "guaranteed amount of memory in bytes",
        dynamic: false,
        validate: validate_size,
    },
    PropertyDef {
        name: "cpu_limit",
        description: "cpu limit: <cores>c or percentage",
        dynamic: true,
        validate: validate_cpu,
    },
    PropertyDef {
        name: "cpu_guarantee",
        description: "guaranteed cpu share: <cores>c or percentage",
        dynamic: true,
        validate: validate_cpu,
    },
    PropertyDef {
        name: "io_limit",
        description: "io bandwidth limit in bytes per second",
        dynamic: true,
        validate: validate_size,
    },
    PropertyDef {
        name: "io_ops_limit",
        description: "io operations per second limit",
        dynamic: true,
        validate: validate_u64,
    },
    PropertyDef {
        name: "ulimit",
        description: "resource limits: <name>: <soft> <hard>, semicolon separated",
        dynamic: false,
        validate: validate_ulimits,
    },
    PropertyDef {
        name: "stdin_path",
        description: "payload stdin path",
        dynamic: false,
        validate: validate_any_path,
    },
    PropertyDef {
        name: "stdout_path",
        description: "payload stdout path",
        dynamic: false,
        validate: validate_any_path,
    },
    PropertyDef {
        name: "stderr_path",
        description: "payload stderr path",
        dynamic: false,
        validate: validate_any_path,
    },
    PropertyDef {
        name: "stdout_limit",
        description: "maximum size of captured stdout/stderr before rotation",
        dynamic: true,
        validate: validate_stdout_limit,
    },
    PropertyDef {
        name: "isolate",
        description: "create new pid/mnt/ipc/uts namespaces",
        dynamic: false,
        validate: validate_bool,
    },
    PropertyDef {
        name: "private",
        description: "user-defined label",
        dynamic: true,
        validate: validate_private,
    },
    PropertyDef {
        name: "respawn",
        description: "restart the payload when it dies",
        dynamic: true,
        validate: validate_bool,
    },
    PropertyDef {
        name: "max_respawns",
        description: "respawn attempts before giving up, -1 for unlimited",
        dynamic: true,
        validate: validate_max_respawns,
    },
    PropertyDef {
        name: "aging_time",
        description: "seconds a dead container is kept before auto-stop",
        dynamic: true,
        validate: validate_u64,
    },
    PropertyDef {
        name: "enable_porto",
        description: "allow access to the porto socket from inside the container",
        dynamic: false,
        validate: validate_bool,
    },
];

pub fn find(name: &str) -> Option<&'static PropertyDef> {
    PROPERTIES.iter().find(|p| p.name == name)
}

// parsers

pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("invalid boolean '{value}'")),
    }
}

/// Byte sizes with optional K/M/G suffix.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1u64 << 10),
        Some((i, 'm' | 'M')) => (&value[..i], 1u64 << 20),
        Some((i, 'g' | 'G')) => (&value[..i], 1u64 << 30),
        _ => (value, 1),
    };

    let number: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{value}'"))?;

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{value}' overflows"))
}

pub fn parse_u64(value: &str) -> Result<u64, String> {
    value.trim().parse().map_err(|_| format!("invalid number '{value}'"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpuLimit {
    Unlimited,
    Cores(f64),
    Percent(f64),
}

/// `<n>c` means absolute cores, a bare number means a percentage of the
/// whole machine.
pub fn parse_cpu(value: &str) -> Result<CpuLimit, String> {
    let value = value.trim();

    if let Some(cores) = value.strip_suffix('c') {
        let cores: f64 = cores
            .trim()
            .parse()
            .map_err(|_| format!("invalid cpu value '{value}'"))?;
        if cores < 0.0 {
            return Err(format!("negative cpu value '{value}'"));
        }
        return Ok(CpuLimit::Cores(cores));
    }

    let percent: f64 = value
        .parse()
        .map_err(|_| format!("invalid cpu value '{value}'"))?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(format!("cpu percentage '{value}' out of range"));
    }
    Ok(CpuLimit::Percent(percent))
}

/// CFS quota in microseconds; -1 means unlimited.
pub fn cpu_cfs_quota(limit: CpuLimit, host_cores: u32) -> i64 {
    let cores = match limit {
        CpuLimit::Unlimited => return -1,
        CpuLimit::Cores(cores) if cores >= f64::from(host_cores) => return -1,
        CpuLimit::Cores(cores) if cores == 0.0 => return -1,
        CpuLimit::Percent(percent) if percent >= 100.0 || percent == 0.0 => {
            return -1
        }
        CpuLimit::Cores(cores) => cores,
        CpuLimit::Percent(percent) => {
            f64::from(host_cores) * percent / 100.0
        }
    };

    let quota = (cores * CPU_PERIOD_US as f64) as u64;
    quota.max(CPU_MIN_QUOTA_US) as i64
}

/// cpu.shares weight for a guarantee; the kernel minimum is 2.
pub fn cpu_shares(guarantee: CpuLimit, host_cores: u32) -> u64 {
    let percent = match guarantee {
        CpuLimit::Unlimited => return 1024,
        CpuLimit::Percent(percent) => percent,
        CpuLimit::Cores(cores) => {
            cores / f64::from(host_cores.max(1)) * 100.0
        }
    };

    ((1024.0 * percent / 100.0) as u64).max(2)
}

/// Splits a `;`-separated environment list. `\;` escapes a literal
/// semicolon; entries are trimmed and empty entries skipped.
pub fn split_env_list(value: &str) -> Result<Vec<(String, String)>, String> {
    let mut raw_entries = Vec::new();
    let mut entry = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                entry.push(';');
                let _ = chars.next();
            }
            ';' => raw_entries.push(std::mem::take(&mut entry)),
            c => entry.push(c),
        }
    }
    raw_entries.push(entry);

    let mut entries = Vec::new();
    for raw in raw_entries {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (key, val) = trimmed
            .split_once('=')
            .ok_or_else(|| format!("invalid env entry '{trimmed}'"))?;
        entries.push((key.to_string(), val.to_string()));
    }

    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ulimit {
    pub resource: u32,
    pub soft: u64,
    pub hard: u64,
}

const RLIMITS: &[(&str, u32)] = &[
    ("core", libc::RLIMIT_CORE as u32),
    ("cpu", libc::RLIMIT_CPU as u32),
    ("data", libc::RLIMIT_DATA as u32),
    ("fsize", libc::RLIMIT_FSIZE as u32),
    ("locks", libc::RLIMIT_LOCKS as u32),
    ("memlock", libc::RLIMIT_MEMLOCK as u32),
    ("msgqueue", libc::RLIMIT_MSGQUEUE as u32),
    ("nice", libc::RLIMIT_NICE as u32),
    ("nofile", libc::RLIMIT_NOFILE as u32),
    ("nproc", libc::RLIMIT_NPROC as u32),
    ("rss", libc::RLIMIT_RSS as u32),
    ("rtprio", libc::RLIMIT_RTPRIO as u32),
    ("sigpending", libc::RLIMIT_SIGPENDING as u32),
    ("stack", libc::RLIMIT_STACK as u32),
];

/// Parses `<name>: <soft> <hard>` entries, semicolon separated.
/// `unlim`/`unlimited` map to `RLIM_INFINITY`.
pub fn parse_ulimits(value: &str) -> Result<Vec<Ulimit>, String> {
    let mut ulimits = Vec::new();

    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (name, limits) = entry
            .split_once(':')
            .ok_or_else(|| format!("invalid ulimit entry '{entry}'"))?;

        let resource = RLIMITS
            .iter()
            .find(|(n, _)| *n == name.trim())
            .map(|(_, r)| *r)
            .ok_or_else(|| format!("unknown ulimit '{}'", name.trim()))?;

        let mut values = limits.split_whitespace();
        let (Some(soft), Some(hard), None) =
            (values.next(), values.next(), values.next())
        else {
            return Err(format!("invalid ulimit entry '{entry}'"));
        };

        let parse = |v: &str| -> Result<u64, String> {
            if v == "unlim" || v == "unlimited" {
                Ok(libc::RLIM_INFINITY)
            } else {
                v.parse().map_err(|_| format!("invalid ulimit value '{v}'"))
            }
        };

        ulimits.push(Ulimit {
            resource,
            soft: parse(soft)?,
            hard: parse(hard)?,
        });
    }

    Ok(ulimits)
}

const CAPABILITIES: &[(&str, u8)] = &[
    ("CHOWN", 0),
    ("DAC_OVERRIDE", 1),
    ("DAC_READ_SEARCH", 2),
    ("FOWNER", 3),
    ("FSETID", 4),
    ("KILL", 5),
    ("SETGID", 6),
    ("SETUID", 7),
    ("SETPCAP", 8),
    ("LINUX_IMMUTABLE", 9),
    ("NET_BIND_SERVICE", 10),
    ("NET_BROADCAST", 11),
    ("NET_ADMIN", 12),
    ("NET_RAW", 13),
    ("IPC_LOCK", 14),
    ("IPC_OWNER", 15),
    ("SYS_MODULE", 16),
    ("SYS_RAWIO", 17),
    ("SYS_CHROOT", 18),
    ("SYS_PTRACE", 19),
    ("SYS_PACCT", 20),
    ("SYS_ADMIN", 21),
    ("SYS_BOOT", 22),
    ("SYS_NICE", 23),
    ("SYS_RESOURCE", 24),
    ("SYS_TIME", 25),
    ("SYS_TTY_CONFIG", 26),
    ("MKNOD", 27),
    ("LEASE", 28),
    ("AUDIT_WRITE", 29),
    ("AUDIT_CONTROL", 30),
    ("SETFCAP", 31),
    ("MAC_OVERRIDE", 32),
    ("MAC_ADMIN", 33),
    ("SYSLOG", 34),
    ("WAKE_ALARM", 35),
    ("BLOCK_SUSPEND", 36),
    ("AUDIT_READ", 37),
];

/// Parses a `;`-separated capability list into a bitmask.
pub fn parse_capabilities(value: &str) -> Result<u64, String> {
    let mut mask = 0u64;

    for name in value.split(';') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        let bit = CAPABILITIES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bit)| *bit)
            .ok_or_else(|| format!("unknown capability '{name}'"))?;

        mask |= 1 << bit;
    }

    Ok(mask)
}

pub fn aging_duration(seconds: u64) -> Duration {
    Duration::from_secs(seconds)
}

// validators

fn validate_any(_: &str) -> Result<(), String> {
    Ok(())
}

fn validate_bool(value: &str) -> Result<(), String> {
    parse_bool(value).map(|_| ())
}

fn validate_size(value: &str) -> Result<(), String> {
    parse_size(value).map(|_| ())
}

fn validate_u64(value: &str) -> Result<(), String> {
    parse_u64(value).map(|_| ())
}

fn validate_cpu(value: &str) -> Result<(), String> {
    parse_cpu(value).map(|_| ())
}

fn validate_env(value: &str) -> Result<(), String> {
    split_env_list(value).map(|_| ())
}

fn validate_ulimits(value: &str) -> Result<(), String> {
    parse_ulimits(value).map(|_| ())
}

fn validate_capabilities(value: &str) -> Result<(), String> {
    parse_capabilities(value).map(|_| ())
}

fn validate_abs_path(value: &str) -> Result<(), String> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(format!("path '{value}' is not absolute"))
    }
}

fn validate_any_path(value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err("empty path".to_string())
    } else {
        Ok(())
    }
}

fn validate_name(value: &str) -> Result<(), String> {
    if value.is_empty() || value.contains([' ', '\n', ':']) {
        Err(format!("invalid name '{value}'"))
    } else {
        Ok(())
    }
}

fn validate_hostname(value: &str) -> Result<(), String> {
    if value.len() > 64 {
        Err("hostname too long".to_string())
    } else {
        Ok(())
    }
}

fn validate_private(value: &str) -> Result<(), String> {
    if value.len() > 4096 {
        Err("label too long".to_string())
    } else {
        Ok(())
    }
}

fn validate_stdout_limit(value: &str) -> Result<(), String> {
    let size = parse_size(value)?;
    if size > MAX_STDOUT_LIMIT {
        Err(format!("stdout limit above {MAX_STDOUT_LIMIT}"))
    } else {
        Ok(())
    }
}

fn validate_max_respawns(value: &str) -> Result<(), String> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n >= -1)
        .map(|_| ())
        .ok_or_else(|| format!("invalid respawn count '{value}'"))
}

fn validate_binds(value: &str) -> Result<(), String> {
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let fields: Vec<&str> = entry.split_whitespace().collect();
        match fields.as_slice() {
            [source, target] | [source, target, "ro" | "rw"]
                if source.starts_with('/') && target.starts_with('/') => {}
            _ => return Err(format!("invalid bind entry '{entry}'")),
        }
    }
    Ok(())
}

fn validate_devices(value: &str) -> Result<(), String> {
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut fields = entry.split_whitespace();
        match fields.next() {
            Some(device) if device.starts_with("/dev/") => {}
            _ => return Err(format!("invalid device entry '{entry}'")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_knows_dynamic_properties() {
        for name in [
            "memory_limit",
            "cpu_limit",
            "cpu_guarantee",
            "io_limit",
            "io_ops_limit",
            "stdout_limit",
            "respawn",
            "max_respawns",
            "aging_time",
            "private",
        ] {
            assert!(find(name).expect(name).dynamic, "{name}");
        }

        for name in ["command", "root", "user", "env", "isolate"] {
            assert!(!find(name).expect(name).dynamic, "{name}");
        }
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("32").expect("plain"), 32);
        assert_eq!(parse_size("32K").expect("kib"), 32 << 10);
        assert_eq!(parse_size("32M").expect("mib"), 32 << 20);
        assert_eq!(parse_size("2g").expect("gib"), 2 << 30);
        assert!(parse_size("porto").is_err());
    }

    #[test]
    fn test_parse_cpu_forms() {
        assert_eq!(parse_cpu("2c").expect("cores"), CpuLimit::Cores(2.0));
        assert_eq!(parse_cpu("50").expect("percent"), CpuLimit::Percent(50.0));
        assert!(parse_cpu("150").is_err());
        assert!(parse_cpu("-1c").is_err());
    }

    #[test]
    fn test_cpu_quota_conversion() {
        // half of a 4-core machine
        assert_eq!(cpu_cfs_quota(CpuLimit::Percent(50.0), 4), 200_000);
        assert_eq!(cpu_cfs_quota(CpuLimit::Cores(2.0), 4), 200_000);
        // full machine and more are unlimited
        assert_eq!(cpu_cfs_quota(CpuLimit::Percent(100.0), 4), -1);
        assert_eq!(cpu_cfs_quota(CpuLimit::Cores(8.0), 4), -1);
        // kernel floor
        assert_eq!(cpu_cfs_quota(CpuLimit::Cores(0.001), 4), 1_000);
    }

    #[test]
    fn test_env_list_split() {
        let entries =
            split_env_list("A=1; B=x\\;y ;;C=").expect("split env list");
        assert_eq!(
            entries,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x;y".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_env_entry_requires_assignment() {
        assert!(split_env_list("JUSTANAME").is_err());
    }

    #[test]
    fn test_ulimit_parse() {
        let ulimits =
            parse_ulimits("nofile: 1024 2048; core: 0 unlimited")
                .expect("parse ulimits");
        assert_eq!(ulimits.len(), 2);
        assert_eq!(ulimits[0].resource, libc::RLIMIT_NOFILE as u32);
        assert_eq!(ulimits[0].soft, 1024);
        assert_eq!(ulimits[1].hard, libc::RLIM_INFINITY);
        assert!(parse_ulimits("bogus: 1 2").is_err());
    }

    #[test]
    fn test_default_capabilities_parse() {
        let mask =
            parse_capabilities(DEFAULT_CAPABILITIES).expect("default caps");
        // CAP_CHOWN and CAP_SETFCAP are in, CAP_SYS_MODULE is out
        assert_ne!(mask & 1, 0);
        assert_ne!(mask & (1 << 31), 0);
        assert_eq!(mask & (1 << 16), 0);
        assert!(parse_capabilities("NOT_A_CAP").is_err());
    }

    #[test]
    fn test_validators_via_table() {
        let isolate = find("isolate").expect("isolate");
        assert!((isolate.validate)("true").is_ok());
        assert!((isolate.validate)("yes").is_err());

        let limit = find("memory_limit").expect("memory_limit");
        assert!((limit.validate)("128M").is_ok());
        assert!((limit.validate)("lots").is_err());

        let binds = find("bind").expect("bind");
        assert!((binds.validate)("/src /dst ro; /a /b").is_ok());
        assert!((binds.validate)("relative /dst").is_err());
    }
}
