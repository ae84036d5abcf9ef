/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Filesystem path arithmetic for containers with non-host roots.
//!
//! These are pure string operations: nothing here touches the
//! filesystem, so they hold for paths that do not exist yet.

/// Lexically canonicalizes a path: collapses duplicate separators,
/// resolves `.` and `..` (never escaping the root), and strips trailing
/// separators. Idempotent.
pub fn normal_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    let _ = segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            segment => segments.push(segment),
        }
    }

    match (absolute, segments.is_empty()) {
        (true, true) => String::from("/"),
        (true, false) => format!("/{}", segments.join("/")),
        (false, true) => String::from("."),
        (false, false) => segments.join("/"),
    }
}

/// Joins `base` and `path`; an absolute `path` is grafted under `base`.
pub fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    if path.is_empty() {
        normal_path(if base.is_empty() { "/" } else { base })
    } else {
        normal_path(&format!("{base}/{path}"))
    }
}

/// Expresses `path` relative to `base`, keeping it absolute. Returns
/// `None` when `path` is outside `base`.
pub fn inner_path(base: &str, path: &str) -> Option<String> {
    let base = normal_path(base);
    let path = normal_path(path);

    if base == "/" {
        return Some(path);
    }

    if path == base {
        return Some(String::from("/"));
    }

    path.strip_prefix(&base)
        .filter(|rest| rest.starts_with('/'))
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_collapses() {
        assert_eq!(normal_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(normal_path("/a/b/../c"), "/a/c");
        assert_eq!(normal_path("/../.."), "/");
        assert_eq!(normal_path("/"), "/");
        assert_eq!(normal_path("a/./b"), "a/b");
        assert_eq!(normal_path("../a"), "../a");
    }

    #[test]
    fn test_normal_is_idempotent() {
        for path in ["/a//b/../c", "/", "a/b/c/..", "//x///y"] {
            let once = normal_path(path);
            assert_eq!(normal_path(&once), once, "{path}");
        }
    }

    #[test]
    fn test_join() {
        assert_eq!(join_path("/root_a", "/bin/true"), "/root_a/bin/true");
        assert_eq!(join_path("/", "/etc"), "/etc");
        assert_eq!(join_path("/root_a", ""), "/root_a");
    }

    #[test]
    fn test_inner() {
        assert_eq!(
            inner_path("/root_a", "/root_a/bin/true"),
            Some(String::from("/bin/true"))
        );
        assert_eq!(inner_path("/root_a", "/root_a"), Some(String::from("/")));
        assert_eq!(inner_path("/", "/etc"), Some(String::from("/etc")));
        assert_eq!(inner_path("/root_a", "/root_ab/x"), None);
        assert_eq!(inner_path("/root_a", "/etc"), None);
    }

    #[test]
    fn test_inner_of_join_recovers_child() {
        let base = normal_path("/roots/a/");
        let child = normal_path("/bin/sh");
        let joined = join_path(&base, &child);
        assert_eq!(inner_path(&base, &joined), Some(child));
    }
}
