/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use super::error::{ContainersError, Result};
use fancy_regex::Regex;
use lazy_static::lazy_static;
use std::fmt::{Display, Formatter};

pub const SEPARATOR: char = '/';

/// Longest single path segment, in bytes.
const MAX_SEGMENT_LEN: usize = 128;

/// Longest full container path, in bytes.
const MAX_NAME_LEN: usize = 200;

lazy_static! {
    static ref SEGMENT_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_\-@:.]+$")
        .expect("failed to parse 'SEGMENT_REGEX'");
}

/// A slash-separated container path (`a/b/c`). The root container is
/// the special name `/`.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn root() -> Self {
        Self(String::from("/"))
    }

    pub fn parse(input: &str) -> Result<Self> {
        if input == "/" {
            return Ok(Self::root());
        }

        // Forgiving of paths that start or end with the separator.
        let input = input.trim_matches(SEPARATOR);

        if input.is_empty() {
            return Err(ContainersError::InvalidValue {
                msg: "empty container name".to_string(),
            });
        }

        if input.len() > MAX_NAME_LEN {
            return Err(ContainersError::InvalidValue {
                msg: format!(
                    "container name longer than {MAX_NAME_LEN} bytes"
                ),
            });
        }

        for segment in input.split(SEPARATOR) {
            if segment.len() > MAX_SEGMENT_LEN {
                return Err(ContainersError::InvalidValue {
                    msg: format!(
                        "name segment longer than {MAX_SEGMENT_LEN} bytes"
                    ),
                });
            }

            let valid =
                SEGMENT_REGEX.is_match(segment).unwrap_or(false);
            if !valid {
                return Err(ContainersError::InvalidValue {
                    msg: format!("invalid name segment '{segment}'"),
                });
            }
        }

        Ok(Self(input.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment.
    pub fn leaf(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or(&self.0)
    }

    /// Immediate parent; the root for top-level containers, `None` for
    /// the root itself.
    pub fn parent(&self) -> Option<ContainerName> {
        if self.is_root() {
            return None;
        }

        match self.0.rsplit_once(SEPARATOR) {
            Some((parent, _)) => Some(Self(parent.to_string())),
            None => Some(Self::root()),
        }
    }

    /// Proper ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> Vec<ContainerName> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(name) = current {
            current = name.parent();
            ancestors.push(name);
        }
        ancestors
    }

    /// True when `self` lives strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &ContainerName) -> bool {
        if self == ancestor {
            return false;
        }
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0.starts_with(&ancestor.0)
            && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/')
    }

    pub fn child(&self, leaf: &str) -> Result<ContainerName> {
        if self.is_root() {
            Self::parse(leaf)
        } else {
            Self::parse(&format!("{}/{leaf}", self.0))
        }
    }

    /// Number of path segments; zero for the root.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split(SEPARATOR).count()
        }
    }

    /// Filename-safe encoding for the persisted state directory.
    pub fn escaped(&self) -> String {
        if self.is_root() {
            String::from("%")
        } else {
            self.0.replace(SEPARATOR, "%")
        }
    }

    pub fn unescape(escaped: &str) -> Result<ContainerName> {
        if escaped == "%" {
            return Ok(Self::root());
        }
        Self::parse(&escaped.replace('%', "/"))
    }
}

impl Display for ContainerName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let name = ContainerName::parse("a").expect("parse");
        assert_eq!(name.as_str(), "a");
        assert_eq!(name.leaf(), "a");
        assert_eq!(name.parent(), Some(ContainerName::root()));
        assert_eq!(name.depth(), 1);
    }

    #[test]
    fn test_parse_nested() {
        let name = ContainerName::parse("a/b/c").expect("parse");
        assert_eq!(name.leaf(), "c");
        assert_eq!(
            name.parent().expect("parent").as_str(),
            "a/b"
        );
        assert_eq!(name.depth(), 3);

        let ancestors = name.ancestors();
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[0].as_str(), "a/b");
        assert_eq!(ancestors[1].as_str(), "a");
        assert!(ancestors[2].is_root());
    }

    #[test]
    fn test_parse_trims_separators() {
        let name = ContainerName::parse("/a/b/").expect("parse");
        assert_eq!(name.as_str(), "a/b");
    }

    #[test]
    fn test_parse_allows_porto_charset() {
        for name in ["web@2", "job:1", "a.b", "under_score", "da-sh"] {
            ContainerName::parse(name).expect("valid name");
        }
    }

    #[test]
    fn test_parse_rejects_bad_segments() {
        for name in ["", "a//b", "sp ace", "a/*", "пример"] {
            assert!(ContainerName::parse(name).is_err(), "{name}");
        }
    }

    #[test]
    fn test_parse_rejects_long_names() {
        let long_segment = "x".repeat(129);
        assert!(ContainerName::parse(&long_segment).is_err());

        let long_path =
            vec!["x".repeat(100), "y".repeat(100), "z".repeat(100)].join("/");
        assert!(ContainerName::parse(&long_path).is_err());
    }

    #[test]
    fn test_descendants() {
        let a = ContainerName::parse("a").expect("parse");
        let ab = ContainerName::parse("a/b").expect("parse");
        let abc = ContainerName::parse("a/b/c").expect("parse");
        let ax = ContainerName::parse("ax").expect("parse");

        assert!(ab.is_descendant_of(&a));
        assert!(abc.is_descendant_of(&a));
        assert!(abc.is_descendant_of(&ab));
        assert!(!a.is_descendant_of(&ab));
        assert!(!ax.is_descendant_of(&a));
        assert!(a.is_descendant_of(&ContainerName::root()));
        assert!(!a.is_descendant_of(&a));
    }

    #[test]
    fn test_escaping_round_trip() {
        let name = ContainerName::parse("a/b/c").expect("parse");
        assert_eq!(name.escaped(), "a%b%c");
        assert_eq!(
            ContainerName::unescape("a%b%c").expect("unescape"),
            name
        );
        assert_eq!(
            ContainerName::unescape("%").expect("unescape root"),
            ContainerName::root()
        );
    }
}
