//! Alias substitution: the global alias table and package-level
//! (`source`/`alias`/`browser`) alias maps.

use packagejson::StringOrBool;
use path_utils::{promote_relative, to_unix, AliasEntry};
use std::path::Path;

/// Splits a module specifier into its head and tail. `@scope/name` counts
/// as a single head; everything else splits on the first path separator.
pub fn get_module_parts(name: &str) -> (String, String) {
    let mut parts = name.splitn(3, '/');
    let first = parts.next().unwrap_or("");

    if first.starts_with('@') {
        match parts.next() {
            Some(second) => {
                let head = format!("{first}/{second}");
                let tail = parts.next().unwrap_or("").to_owned();
                (head, tail)
            }
            None => (first.to_owned(), String::new()),
        }
    } else {
        match name.split_once('/') {
            Some((head, tail)) => (head.to_owned(), tail.to_owned()),
            None => (name.to_owned(), String::new()),
        }
    }
}

/// Scans the global alias table (order significant) for the first key that
/// appears as a substring of the unix-slashed request and substitutes it,
/// mirroring JS `String.prototype.replace` with a plain-string pattern
/// (first occurrence only). When `dir` is given the result is promoted to
/// a relative require-style path; otherwise it is returned as-is, which may
/// make it absolute.
pub fn load_resolve_alias(
    request: &str,
    dir: Option<&Path>,
    alias: &[(String, AliasEntry)],
) -> Option<String> {
    let unixified = to_unix(request);
    for (key, entry) in alias {
        if let Some(pos) = unixified.find(key.as_str()) {
            let mut substituted = String::with_capacity(unixified.len());
            substituted.push_str(&unixified[..pos]);
            substituted.push_str(&entry.path);
            substituted.push_str(&unixified[pos + key.len()..]);
            return Some(match dir {
                Some(_) => promote_relative(&substituted),
                None => substituted,
            });
        }
    }
    None
}

fn alias_value_to_string(value: &StringOrBool) -> String {
    match value {
        StringOrBool::Str(s) => s.clone(),
        StringOrBool::Bool(_) => String::new(),
    }
}

/// Looks up `request` in a package-level alias map. Absolute requests are
/// relativized to `pkgdir` first. Falls back to a module-head lookup
/// (`@scope/name` counts as one head) with the tail re-appended. A literal
/// `false` alias value resolves to the empty string -- the file is
/// intentionally elided.
pub fn get_alias(
    request: &str,
    pkgdir: &Path,
    aliases: &packagejson::AliasMap,
) -> Option<String> {
    let request = if Path::new(request).is_absolute() {
        let rel = pathdiff::diff_paths(request, pkgdir)?;
        promote_relative(&to_unix(&rel.to_string_lossy()))
    } else {
        request.to_owned()
    };

    if let Some(value) = aliases.get(&request) {
        return Some(alias_value_to_string(value));
    }

    let (head, tail) = get_module_parts(&request);
    if let Some(value) = aliases.get(&head) {
        let resolved_head = alias_value_to_string(value);
        if resolved_head.is_empty() || tail.is_empty() {
            return Some(resolved_head);
        }
        return Some(format!("{resolved_head}/{tail}"));
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn module_parts_splits_scoped_name() {
        assert_eq!(
            get_module_parts("@scope/name/sub/path"),
            ("@scope/name".to_owned(), "sub/path".to_owned())
        );
    }

    #[test]
    fn module_parts_splits_plain_name() {
        assert_eq!(
            get_module_parts("lodash/fp"),
            ("lodash".to_owned(), "fp".to_owned())
        );
    }

    #[test]
    fn module_parts_no_tail() {
        assert_eq!(get_module_parts("lodash"), ("lodash".to_owned(), String::new()));
    }

    #[test]
    fn load_resolve_alias_replaces_first_substring_match() {
        let alias = vec![(
            "@/".to_owned(),
            AliasEntry {
                path: "./src/".to_owned(),
                dist: None,
            },
        )];
        let result = load_resolve_alias("@/components/button", None, &alias);
        assert_eq!(result, Some("./src/components/button".to_owned()));
    }

    #[test]
    fn load_resolve_alias_promotes_relative_when_dir_given() {
        let alias = vec![(
            "utils".to_owned(),
            AliasEntry {
                path: "shared-utils".to_owned(),
                dist: None,
            },
        )];
        let result = load_resolve_alias("utils/index", Some(Path::new("/proj/src")), &alias);
        assert_eq!(result, Some("./shared-utils/index".to_owned()));
    }

    #[test]
    fn get_alias_returns_empty_string_for_false_value() {
        let mut aliases = packagejson::AliasMap::default();
        aliases.insert("./legacy".to_owned(), StringOrBool::Bool(false));
        let result = get_alias("./legacy", Path::new("/proj/pkg"), &aliases);
        assert_eq!(result, Some(String::new()));
    }

    #[test]
    fn get_alias_falls_back_to_module_head() {
        let mut aliases = packagejson::AliasMap::default();
        aliases.insert(
            "lodash".to_owned(),
            StringOrBool::Str("lodash-es".to_owned()),
        );
        let result = get_alias("lodash/fp", Path::new("/proj/pkg"), &aliases);
        assert_eq!(result, Some("lodash-es/fp".to_owned()));
    }
}
