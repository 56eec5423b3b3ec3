//! Package Reader (C2).
//!
//! Reads and caches `package.json`, exposing the subset of fields consumed
//! during resolution: `main`, `module`, `source`, `browser`, `alias`,
//! `miniprogram`. The `source` field is stripped unless the package is
//! reached through a symlink, since an un-linked `source` field describes a
//! compiled artifact rather than a linked source checkout.

use ahashmap::AHashMap;
use anyhow::{Context, Result};
use ftree_cache::context_data::{ContextData, CtxOptRef, CtxRef, FileContextCache};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

pub const PACKAGE_JSON_FNAME: &str = "package.json";

/// A package.json value that is either a plain string or a literal boolean.
/// `false` marks an intentionally-elided alias target.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringOrBool {
    Str(String),
    Bool(bool),
}

impl StringOrBool {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StringOrBool::Str(s) => Some(s),
            StringOrBool::Bool(_) => None,
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, StringOrBool::Bool(false))
    }
}

pub type AliasMap = AHashMap<String, StringOrBool>;

/// The `.source` field: either a bare entry-point path, the same shape as
/// `main`/`module`, or an alias map (babel/miniprogram-bundler convention).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceField {
    Entry(String),
    Map(AliasMap),
}

impl SourceField {
    pub fn as_entry(&self) -> Option<&str> {
        match self {
            SourceField::Entry(s) => Some(s),
            SourceField::Map(_) => None,
        }
    }

    pub fn as_alias_map(&self) -> Option<&AliasMap> {
        match self {
            SourceField::Map(m) => Some(m),
            SourceField::Entry(_) => None,
        }
    }
}

/// The `.browser` field, same dual shape as `source`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BrowserField {
    Entry(String),
    Map(AliasMap),
}

impl BrowserField {
    pub fn as_entry(&self) -> Option<&str> {
        match self {
            BrowserField::Entry(s) => Some(s),
            BrowserField::Map(_) => None,
        }
    }

    pub fn as_alias_map(&self) -> Option<&AliasMap> {
        match self {
            BrowserField::Map(m) => Some(m),
            BrowserField::Entry(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PackageJsonRaw {
    name: Option<String>,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    source: Option<SourceField>,
    #[serde(default)]
    browser: Option<BrowserField>,
    #[serde(default)]
    alias: Option<AliasMap>,
    #[serde(default)]
    miniprogram: Option<String>,
}

/// The subset of a package.json consumed during resolution, plus the
/// location it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub pkgfile: PathBuf,
    pub pkgdir: PathBuf,
    pub name: Option<String>,
    pub main: Option<String>,
    pub module: Option<String>,
    pub source: Option<SourceField>,
    pub browser: Option<BrowserField>,
    pub alias: Option<AliasMap>,
    pub miniprogram: Option<String>,
    /// The full parsed manifest, for lookups outside the fixed fields above
    /// (the Asset Pipeline's `packageKey` config lookup reads this).
    pub raw: serde_json::Value,
}

impl ContextData for PackageRecord {
    fn read_context_data(_: (), path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let raw: PackageJsonRaw = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let raw_value: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let pkgdir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        // a `source` field only means "linked source checkout" when this
        // package.json was actually reached through a symlink; otherwise it
        // describes a compiled artifact and should be ignored.
        let source = raw.source.filter(|_| {
            std::fs::canonicalize(path)
                .map(|canonical| canonical != path)
                .unwrap_or(false)
        });

        Ok(Some(PackageRecord {
            pkgfile: path.to_owned(),
            pkgdir,
            name: raw.name,
            main: raw.main,
            module: raw.module,
            source,
            browser: raw.browser,
            alias: raw.alias,
            miniprogram: raw.miniprogram,
            raw: raw_value,
        }))
    }
}

/// Returns `pkg.browser` for `target == "browser"`, the default; any other
/// target sees no browser field. If the browser map is keyed by the
/// package's own name, that entry is dereferenced once so callers see the
/// package's self-override rather than the raw map.
pub fn get_browser_field<'a>(pkg: &'a PackageRecord, target: &str) -> Option<Cow<'a, BrowserField>> {
    if target != "browser" {
        return None;
    }
    let browser = pkg.browser.as_ref()?;
    if let BrowserField::Map(map) = browser {
        if let Some(name) = &pkg.name {
            if let Some(StringOrBool::Str(s)) = map.get(name) {
                return Some(Cow::Owned(BrowserField::Entry(s.clone())));
            }
        }
    }
    Some(Cow::Borrowed(browser))
}

/// Ordered candidate entry paths `[source, browser, main, module]`,
/// dropping non-string values and resolving each against `pkgdir`.
pub fn get_package_entries(pkg: &PackageRecord) -> Vec<PathBuf> {
    let candidates: [Option<&str>; 4] = [
        pkg.source.as_ref().and_then(SourceField::as_entry),
        pkg.browser.as_ref().and_then(BrowserField::as_entry),
        pkg.main.as_deref(),
        pkg.module.as_deref(),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|candidate| {
            let normalized = match candidate {
                "." | "./" | "" => "index",
                other => other,
            };
            pkg.pkgdir.join(normalized)
        })
        .collect()
}

/// Reads and caches `package.json` by absolute directory.
#[derive(Debug, Default)]
pub struct PackageReader {
    cache: FileContextCache<PackageRecord, PACKAGE_JSON_FNAME>,
}

impl PackageReader {
    pub fn new() -> Self {
        Self {
            cache: FileContextCache::new(),
        }
    }

    /// Reads and caches `dir/package.json`, memoized by absolute `dir`.
    pub fn read(&self, dir: &Path) -> Result<CtxRef<'_, Option<PackageRecord>>> {
        self.cache.check_dir(dir)
    }

    /// `readSync` has identical semantics to `read` in this core; there is
    /// no async I/O boundary to straddle.
    pub fn read_sync(&self, dir: &Path) -> Result<CtxRef<'_, Option<PackageRecord>>> {
        self.read(dir)
    }

    /// Walks parents upward from `dir` (inclusive) and returns the first
    /// successful read, stopping when the current segment's basename is
    /// `node_modules` -- a node_modules directory is never itself probed,
    /// and the walk never crosses above one.
    pub fn find_package(&self, dir: &Path) -> Result<Option<CtxOptRef<'_, PackageRecord>>> {
        let mut head: Option<&Path> = Some(dir);
        loop {
            let cur = match head {
                None => return Ok(None),
                Some(p) => p,
            };
            if cur.file_name().map(|n| n == "node_modules").unwrap_or(false) {
                return Ok(None);
            }

            let probe_result = self.cache.check_dir(cur)?;
            if let Ok(res) = probe_result.try_map(|x| x.as_ref()) {
                return Ok(Some(res));
            }

            head = cur.parent();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_tmpdir::test_tmpdir;

    #[test]
    fn reads_basic_fields() {
        let tmp = test_tmpdir! {
            "pkg/package.json" => r#"{"name": "demo", "main": "./lib/index.js"}"#
        };
        let reader = PackageReader::new();
        let dir = tmp.root_join("pkg");
        let found = reader.read(&dir).unwrap();
        let record = found.as_ref().expect("package.json should be found");
        assert_eq!(record.name.as_deref(), Some("demo"));
        assert_eq!(record.main.as_deref(), Some("./lib/index.js"));
        assert_eq!(record.pkgdir, dir);
    }

    #[test]
    fn missing_package_json_is_none_not_error() {
        let tmp = test_tmpdir! {
            "pkg/.keep" => ""
        };
        let reader = PackageReader::new();
        let found = reader.read(&tmp.root_join("pkg")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn non_symlinked_source_field_is_stripped() {
        let tmp = test_tmpdir! {
            "pkg/package.json" => r#"{"name": "demo", "source": "./src/index.js"}"#
        };
        let reader = PackageReader::new();
        let found = reader.read(&tmp.root_join("pkg")).unwrap();
        let record = found.as_ref().unwrap();
        assert_eq!(record.source, None);
    }

    #[test]
    fn find_package_stops_at_node_modules_boundary() {
        let tmp = test_tmpdir! {
            "root/package.json" => r#"{"name": "root"}"#,
            "root/node_modules/dep/lib/index.js" => "module.exports = {};"
        };
        let reader = PackageReader::new();
        let deep = tmp.root_join("root/node_modules/dep/lib");
        let found = reader.find_package(&deep).unwrap();
        assert!(
            found.is_none(),
            "should not find a package.json by crossing above node_modules"
        );
    }

    #[test]
    fn find_package_walks_up_to_nearest_manifest() {
        let tmp = test_tmpdir! {
            "root/package.json" => r#"{"name": "root"}"#,
            "root/src/components/button.js" => "module.exports = {};"
        };
        let reader = PackageReader::new();
        let nested = tmp.root_join("root/src/components");
        let found = reader.find_package(&nested).unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("root"));
    }

    #[test]
    fn get_package_entries_defaults_dot_to_index() {
        let tmp = test_tmpdir! {
            "pkg/package.json" => r#"{"name": "demo", "main": "."}"#
        };
        let reader = PackageReader::new();
        let found = reader.read(&tmp.root_join("pkg")).unwrap();
        let record = found.as_ref().unwrap();
        let entries = get_package_entries(record);
        assert_eq!(entries, vec![record.pkgdir.join("index")]);
    }

    #[test]
    fn get_browser_field_dereferences_self_keyed_entry() {
        let tmp = test_tmpdir! {
            "pkg/package.json" => r#"{"name": "demo", "browser": {"demo": "./browser.js"}}"#
        };
        let reader = PackageReader::new();
        let found = reader.read(&tmp.root_join("pkg")).unwrap();
        let record = found.as_ref().unwrap();
        let browser = get_browser_field(record, "browser").unwrap();
        assert_eq!(browser.as_entry(), Some("./browser.js"));
    }

    #[test]
    fn get_browser_field_is_none_for_other_targets() {
        let tmp = test_tmpdir! {
            "pkg/package.json" => r#"{"name": "demo", "browser": "./browser.js"}"#
        };
        let reader = PackageReader::new();
        let found = reader.read(&tmp.root_join("pkg")).unwrap();
        let record = found.as_ref().unwrap();
        assert!(get_browser_field(record, "node").is_none());
    }
}
