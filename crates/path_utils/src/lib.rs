//! Path Normalizer (C1).
//!
//! Unix-style path canonicalization, alias-value normalization, and
//! relative-path promotion. Every other component in this workspace that
//! touches a request string or an alias table config routes it through
//! here first, so the substring/prefix conventions stay in one place.

use anyhow::{Context, Result};
use path_slash::PathExt;
use relative_path::RelativePathBuf;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `toUnix`: replaces platform separators with `/`. Idempotent.
pub fn to_unix(p: &str) -> String {
    if std::path::MAIN_SEPARATOR == '/' {
        p.to_owned()
    } else {
        p.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// An alias table entry as it appears in `IInitOptions.alias`, before
/// normalization: either a bare path string, or a record with an optional
/// `dist` output-directory prefix.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AliasConfigEntry {
    Path(String),
    Record { path: String, dist: Option<String> },
}

/// The normalized form of an alias entry: every alias value normalizes to
/// one of these, with `dist: None` standing in for "no dist override".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub path: String,
    pub dist: Option<String>,
}

impl From<AliasEntry> for AliasConfigEntry {
    fn from(v: AliasEntry) -> Self {
        AliasConfigEntry::Record {
            path: v.path,
            dist: v.dist,
        }
    }
}

/// `normalizeAlias`: turns a string or `{path, dist?}` into `{path, dist}`.
pub fn normalize_alias(v: AliasConfigEntry) -> AliasEntry {
    match v {
        AliasConfigEntry::Path(path) => AliasEntry { path, dist: None },
        AliasConfigEntry::Record { path, dist } => AliasEntry { path, dist },
    }
}

/// `promoteRelative`: if `p` does not begin with `.` or `/`, prefix with
/// `./`; used to produce `require`-style relative strings.
pub fn promote_relative(p: &str) -> String {
    if p.starts_with('.') || p.starts_with('/') {
        p.to_owned()
    } else {
        format!("./{p}")
    }
}

/// Converts an absolute or relative filesystem path into a unix-slashed,
/// relative-path string. Used when turning a resolved dist path into a
/// `require`-style specifier.
pub fn as_relative_slash_path<P: AsRef<Path>>(p: P) -> Result<RelativePathBuf> {
    let pref = p.as_ref();
    let relative_path: RelativePathBuf = RelativePathBuf::from_path(pref).with_context(|| {
        let pref_str = pref.to_string_lossy();
        format!("failed to convert path to relative-path: \"{pref_str}\"")
    })?;
    let slashed_pbuf = PathBuf::from(relative_path.as_str())
        .to_slash()
        .map(|s| s.to_string())
        .with_context(|| {
            let rel_str = relative_path.as_str();
            format!("failed to convert relative-path to a slashed path: \"{rel_str}\"")
        })?;
    Ok(RelativePathBuf::from(slashed_pbuf))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn to_unix_idempotent() {
        let p = "a/b\\c/d";
        assert_eq!(to_unix(&to_unix(p)), to_unix(p));
    }

    #[test]
    fn to_unix_replaces_backslash_on_windows_semantics() {
        // we can't flip std::path::MAIN_SEPARATOR at test time, but we can
        // assert the unix-only identity path always holds
        assert_eq!(to_unix("a/b/c"), "a/b/c");
    }

    #[test]
    fn normalize_alias_string_becomes_record_with_no_dist() {
        let normalized = normalize_alias(AliasConfigEntry::Path("./src/utils".to_owned()));
        assert_eq!(
            normalized,
            AliasEntry {
                path: "./src/utils".to_owned(),
                dist: None
            }
        );
    }

    #[test]
    fn normalize_alias_is_idempotent() {
        let raw = AliasConfigEntry::Record {
            path: "./node_modules/miniprogram-navigation-bar".to_owned(),
            dist: Some("pages/aliasComponent/".to_owned()),
        };
        let once = normalize_alias(raw.clone());
        let twice = normalize_alias(once.clone().into());
        assert_eq!(once, twice);
    }

    #[test]
    fn promote_relative_prefixes_bare_names() {
        assert_eq!(promote_relative("utils/index"), "./utils/index");
        assert_eq!(promote_relative("./utils"), "./utils");
        assert_eq!(promote_relative("../utils"), "../utils");
        assert_eq!(promote_relative("/abs/utils"), "/abs/utils");
    }

    #[test]
    fn promote_relative_is_idempotent() {
        let p = "utils/index";
        assert_eq!(promote_relative(&promote_relative(p)), promote_relative(p));
    }
}
