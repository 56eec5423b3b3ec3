use crate::alias::{get_alias, get_module_parts, load_resolve_alias};
use crate::extensions::extension_probe_order;
use dashmap::DashMap;
use packagejson::{get_browser_field, get_package_entries, PackageReader, PackageRecord, SourceField};
use path_clean::PathClean;
use path_utils::AliasEntry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("module not found: \"{request}\" from \"{}\"", from_dir.display())]
pub struct ModuleNotFound {
    pub request: String,
    pub from_dir: PathBuf,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    ModuleNotFound(#[from] ModuleNotFound),
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub real_path: PathBuf,
    pub pkg: Option<Arc<PackageRecord>>,
}

/// `IInitOptions`' resolution-relevant subset.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub extensions: Vec<String>,
    /// Order-significant: the first key found as a substring of a request
    /// wins.
    pub alias: Vec<(String, AliasEntry)>,
    pub target: String,
}

enum Located {
    /// Resolved into `dirname/node_modules/<request>`, with `sub_path`
    /// tracking whether anything followed the module head.
    InNodeModules { sub_path: String, file_path: PathBuf },
    /// Already absolute, or the result of `resolveFilename`.
    FilePath(PathBuf),
    /// No node_modules hit; the caller decides what to do (sibling of
    /// parent, or `ModuleNotFound`).
    Bare,
}

pub struct Resolver {
    config: ResolverConfig,
    packages: PackageReader,
    cache: DashMap<String, Result<ResolutionResult, ResolveError>>,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            packages: PackageReader::new(),
            cache: DashMap::new(),
        }
    }

    /// `resolve(request, parent) -> {realPath, pkg?}`. Cached for the
    /// lifetime of this Resolver, keyed by `dirname(parent) + ":" +
    /// request`; the cache is never invalidated mid-build.
    pub fn resolve(
        &self,
        request: &str,
        parent: Option<&Path>,
    ) -> Result<ResolutionResult, ResolveError> {
        let key = self.cache_key(request, parent);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }

        let result = self.resolve_uncached(request, parent);
        tracing::debug!(
            "resolve {:?} from {:?} -> {:?}",
            request,
            parent,
            result.as_ref().map(|r| &r.real_path)
        );
        self.cache.insert(key, result.clone());
        result
    }

    fn cache_key(&self, request: &str, parent: Option<&Path>) -> String {
        let dir = parent
            .and_then(Path::parent)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{dir}:{request}")
    }

    fn resolve_uncached(
        &self,
        request: &str,
        parent: Option<&Path>,
    ) -> Result<ResolutionResult, ResolveError> {
        let base_dir = match parent {
            Some(p) => p
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.config.source_dir.clone()),
            None => self.config.source_dir.clone(),
        };

        // warm the root package's cache entry, matching the documented
        // "ensure the root package is loaded" step.
        let _ = self.packages.read(&self.config.root_dir);
        let nearest_pkg = self.nearest_package(&base_dir);

        let mut current = request.to_owned();
        if let Some(p) = parent {
            let parent_dir = p.parent().unwrap_or(&base_dir);
            current = self.resolve_filename(&current, parent_dir);
        }
        current = self.load_alias(&current, &base_dir, nearest_pkg.as_deref());

        let parent_ext = parent
            .and_then(Path::extension)
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"));
        let exts = extension_probe_order(&self.config.extensions, parent_ext.as_deref());

        let real_path = match self.locate(&current, &base_dir) {
            Located::InNodeModules { sub_path, file_path } => {
                let file_hit = if !sub_path.is_empty() {
                    self.load_as_file(&file_path, nearest_pkg.as_deref(), &exts)
                } else {
                    None
                };
                file_hit.or_else(|| self.load_directory(&file_path, &exts))
            }
            Located::FilePath(path) => self
                .load_as_file(&path, nearest_pkg.as_deref(), &exts)
                .or_else(|| self.load_directory(&path, &exts)),
            Located::Bare => parent.and_then(|p| {
                let sibling = p.parent().unwrap_or(&base_dir).join(&current);
                self.load_as_file(&sibling, nearest_pkg.as_deref(), &exts)
                    .or_else(|| self.load_directory(&sibling, &exts))
            }),
        };

        real_path
            .map(|real_path| {
                let pkg = self.nearest_package(real_path.parent().unwrap_or(&base_dir));
                ResolutionResult { real_path, pkg }
            })
            .ok_or_else(|| {
                ModuleNotFound {
                    request: request.to_owned(),
                    from_dir: base_dir.clone(),
                }
                .into()
            })
    }

    /// Canonicalizes `request` by its first character:
    /// `/` source-root-absolute unless the literal path already exists,
    /// `~` nearest node_modules or rootDir, `.` relative to `dir`,
    /// anything else a bare module name.
    pub fn resolve_filename(&self, request: &str, dir: &Path) -> String {
        match request.chars().next() {
            Some('/') => {
                if Path::new(request).exists() {
                    request.to_owned()
                } else {
                    abspath::join_abspath(&self.config.source_dir, &request[1..])
                        .unwrap_or_else(|_| self.config.source_dir.join(&request[1..]))
                        .to_string_lossy()
                        .into_owned()
                }
            }
            Some('~') => self
                .resolve_tilde(request[1..].trim_start_matches('/'), dir)
                .to_string_lossy()
                .into_owned(),
            Some('.') => abspath::join_abspath(dir, request)
                .unwrap_or_else(|_| dir.join(request))
                .to_string_lossy()
                .into_owned(),
            _ => PathBuf::from(request).clean().to_string_lossy().into_owned(),
        }
    }

    fn resolve_tilde(&self, tail: &str, dir: &Path) -> PathBuf {
        let mut cur = dir.to_path_buf();
        loop {
            if cur == self.config.root_dir {
                break;
            }
            match cur.parent() {
                Some(parent) if parent.file_name().map(|n| n == "node_modules").unwrap_or(false) => {
                    break;
                }
                Some(parent) => cur = parent.to_path_buf(),
                None => break,
            }
        }
        cur.join(tail)
    }

    fn load_alias(&self, request: &str, dir: &Path, pkg: Option<&PackageRecord>) -> String {
        if let Some(global) = load_resolve_alias(request, Some(dir), &self.config.alias) {
            return global;
        }
        if let Some(pkg) = pkg {
            if let Some(aliased) = self.get_package_alias(request, pkg) {
                return aliased;
            }
        }
        request.to_owned()
    }

    fn get_package_alias(&self, request: &str, pkg: &PackageRecord) -> Option<String> {
        if let Some(map) = pkg.source.as_ref().and_then(SourceField::as_alias_map) {
            if let Some(v) = get_alias(request, &pkg.pkgdir, map) {
                return Some(v);
            }
        }
        if let Some(map) = &pkg.alias {
            if let Some(v) = get_alias(request, &pkg.pkgdir, map) {
                return Some(v);
            }
        }
        if let Some(browser) = get_browser_field(pkg, &self.config.target) {
            if let Some(map) = browser.as_alias_map() {
                if let Some(v) = get_alias(request, &pkg.pkgdir, map) {
                    return Some(v);
                }
            }
        }
        None
    }

    fn locate(&self, current: &str, base_dir: &Path) -> Located {
        if Path::new(current).is_absolute() {
            return Located::FilePath(PathBuf::from(current));
        }

        let (module_name, sub_path) = get_module_parts(current);
        let mut dir = base_dir.to_path_buf();
        loop {
            let is_already_node_modules = dir.file_name().map(|n| n == "node_modules").unwrap_or(false);
            if !is_already_node_modules {
                let candidate = dir.join("node_modules").join(&module_name);
                if candidate.exists() {
                    let file_path = dir.join("node_modules").join(current);
                    return Located::InNodeModules { sub_path, file_path };
                }
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Located::Bare,
            }
        }
    }

    fn load_as_file(&self, path: &Path, pkg: Option<&PackageRecord>, exts: &[String]) -> Option<PathBuf> {
        for candidate in self.expand_file(path, exts, pkg, true) {
            if is_loadable_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// For each extension, emits `path+ext`; if alias expansion is on,
    /// recursively expands the aliased form of that candidate one level
    /// deep (alias expansion off on the recursive call).
    fn expand_file(
        &self,
        path: &Path,
        exts: &[String],
        pkg: Option<&PackageRecord>,
        expand_alias: bool,
    ) -> Vec<PathBuf> {
        let path_str = path.to_string_lossy();
        let mut out = Vec::with_capacity(exts.len());
        for ext in exts {
            let candidate = format!("{path_str}{ext}");
            out.push(PathBuf::from(&candidate));

            if expand_alias {
                if let Some(pkg) = pkg {
                    if let Some(aliased) = self.get_package_alias(&candidate, pkg) {
                        if !aliased.is_empty() {
                            out.extend(self.expand_file(Path::new(&aliased), exts, Some(pkg), false));
                        }
                    }
                }
            }
        }
        out
    }

    fn load_directory(&self, dir: &Path, exts: &[String]) -> Option<PathBuf> {
        let pkg = {
            let found = self.packages.read(dir).ok()?;
            found.as_ref().cloned()
        };

        if let Some(pkg) = &pkg {
            for entry in get_package_entries(pkg) {
                if let Some(hit) = self.load_as_file(&entry, Some(pkg), exts) {
                    return Some(hit);
                }
                if let Some(hit) = self.load_directory(&entry, exts) {
                    return Some(hit);
                }
            }
        }

        self.load_as_file(&dir.join("index"), pkg.as_ref(), exts)
    }

    fn nearest_package(&self, dir: &Path) -> Option<Arc<PackageRecord>> {
        let found = self.packages.find_package(dir).ok()?;
        found.map(|pkg| Arc::new(pkg.clone()))
    }
}

fn is_loadable_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => {
            if meta.is_file() {
                return true;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileTypeExt;
                return meta.file_type().is_fifo();
            }
            #[cfg(not(unix))]
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_tmpdir::test_tmpdir;

    fn config(tmp: &test_tmpdir::TmpDir) -> ResolverConfig {
        ResolverConfig {
            source_dir: tmp.root_join("src"),
            root_dir: tmp.root().to_owned(),
            extensions: vec![".js".to_owned(), ".json".to_owned()],
            alias: vec![],
            target: "browser".to_owned(),
        }
    }

    #[test]
    fn resolves_sibling_relative_file() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('./b')",
            "src/b.js" => "module.exports = 1;"
        };
        let resolver = Resolver::new(config(&tmp));
        let result = resolver
            .resolve("./b", Some(&tmp.root_join("src/a.js")))
            .unwrap();
        assert_eq!(result.real_path, tmp.root_join("src/b.js"));
    }

    #[test]
    fn resolves_bare_module_via_node_modules() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('left-pad')",
            "node_modules/left-pad/package.json" => r#"{"name": "left-pad", "main": "index.js"}"#,
            "node_modules/left-pad/index.js" => "module.exports = () => {};"
        };
        let resolver = Resolver::new(config(&tmp));
        let result = resolver
            .resolve("left-pad", Some(&tmp.root_join("src/a.js")))
            .unwrap();
        assert_eq!(result.real_path, tmp.root_join("node_modules/left-pad/index.js"));
        assert_eq!(result.pkg.unwrap().name.as_deref(), Some("left-pad"));
    }

    #[test]
    fn missing_module_is_module_not_found() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('nope')"
        };
        let resolver = Resolver::new(config(&tmp));
        let err = resolver
            .resolve("nope", Some(&tmp.root_join("src/a.js")))
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::ModuleNotFound(ModuleNotFound {
                request: "nope".to_owned(),
                from_dir: tmp.root_join("src"),
            })
        );
    }

    #[test]
    fn resolution_is_cached_across_calls() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('./b')",
            "src/b.js" => "module.exports = 1;"
        };
        let resolver = Resolver::new(config(&tmp));
        let parent = tmp.root_join("src/a.js");
        let first = resolver.resolve("./b", Some(&parent)).unwrap();
        let second = resolver.resolve("./b", Some(&parent)).unwrap();
        assert_eq!(first.real_path, second.real_path);
    }

    #[test]
    fn global_alias_substitutes_substring_in_request() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('@/button')",
            "src/components/button.js" => "module.exports = 1;"
        };
        let mut cfg = config(&tmp);
        cfg.alias = vec![(
            "@/".to_owned(),
            AliasEntry {
                path: "./components/".to_owned(),
                dist: None,
            },
        )];
        let resolver = Resolver::new(cfg);
        let result = resolver
            .resolve("@/button", Some(&tmp.root_join("src/a.js")))
            .unwrap();
        assert_eq!(result.real_path, tmp.root_join("src/components/button.js"));
    }

    #[test]
    fn tilde_resolves_against_root_dir() {
        let tmp = test_tmpdir! {
            "src/deep/nested/a.js" => "require('~/shared')",
            "shared.js" => "module.exports = 1;"
        };
        let resolver = Resolver::new(config(&tmp));
        let result = resolver
            .resolve("~/shared", Some(&tmp.root_join("src/deep/nested/a.js")))
            .unwrap();
        assert_eq!(result.real_path, tmp.root_join("shared.js"));
    }

    #[test]
    fn package_main_entry_is_used_for_directory_load() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('./lib')",
            "src/lib/package.json" => r#"{"main": "./entry.js"}"#,
            "src/lib/entry.js" => "module.exports = 1;"
        };
        let resolver = Resolver::new(config(&tmp));
        let result = resolver
            .resolve("./lib", Some(&tmp.root_join("src/a.js")))
            .unwrap();
        assert_eq!(result.real_path, tmp.root_join("src/lib/entry.js"));
    }

    #[test]
    fn scoped_module_resolves_through_node_modules() {
        let tmp = test_tmpdir! {
            "src/a.js" => "require('@scope/pkg/sub')",
            "node_modules/@scope/pkg/sub.js" => "module.exports = 1;"
        };
        let resolver = Resolver::new(config(&tmp));
        let result = resolver
            .resolve("@scope/pkg/sub", Some(&tmp.root_join("src/a.js")))
            .unwrap();
        assert_eq!(
            result.real_path,
            tmp.root_join("node_modules/@scope/pkg/sub.js")
        );
    }
}
