//! Dist-Path Mapper (C4): maps a real source path to its output path under
//! `outDir`, applying the alias-dist and `node_modules -> npm/` rules, and
//! centralizing extension reconciliation for both this mapper and the
//! Asset Pipeline's own `output()`.

use dashmap::DashMap;
use path_utils::AliasEntry;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DistPathConfig {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Order-significant, as in the Resolver's alias table: the first
    /// matching entry wins.
    pub alias: Vec<(String, AliasEntry)>,
}

/// Process-wide memoized `generateDistPath`.
#[derive(Debug)]
pub struct DistPathMapper {
    config: DistPathConfig,
    cache: DashMap<PathBuf, PathBuf>,
}

impl DistPathMapper {
    pub fn new(config: DistPathConfig) -> Self {
        Self {
            config,
            cache: DashMap::new(),
        }
    }

    /// `generateDistPath(sourcePath, ext) -> distPath`. Memoized by
    /// `sourcePath`; idempotent and deterministic for a fixed config.
    pub fn generate_dist_path(&self, source_path: &Path, ext: &str) -> PathBuf {
        if let Some(hit) = self.cache.get(source_path) {
            return hit.clone();
        }
        let result = reconcile_extension(&self.map_raw(source_path), ext);
        self.cache.insert(source_path.to_owned(), result.clone());
        result
    }

    fn map_raw(&self, source_path: &Path) -> PathBuf {
        if let Ok(rel) = source_path.strip_prefix(&self.config.source_dir) {
            return self.config.out_dir.join(rel);
        }

        for (alias_name, entry) in &self.config.alias {
            let alias_root = abspath::join_abspath(&self.config.root_dir, &entry.path)
                .unwrap_or_else(|_| self.config.root_dir.join(&entry.path));
            if let Ok(rel) = source_path.strip_prefix(&alias_root) {
                let dist_prefix = entry.dist.as_deref().unwrap_or("npm");
                return self.config.out_dir.join(dist_prefix).join(alias_name).join(rel);
            }
        }

        if let Some(remainder) = strip_to_last_package_root_segment(source_path) {
            return self.config.out_dir.join("npm").join(remainder);
        }

        let rel = pathdiff::diff_paths(source_path, &self.config.source_dir)
            .unwrap_or_else(|| source_path.to_owned());
        self.config.out_dir.join(rel)
    }
}

/// If `path` contains a `node_modules` or `npm` path segment, returns
/// everything after the *last* such segment; otherwise `None`.
fn strip_to_last_package_root_segment(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component> = path.components().collect();
    let last_idx = components.iter().rposition(|c| {
        matches!(c, Component::Normal(n) if *n == "node_modules" || *n == "npm")
    })?;
    let remainder: PathBuf = components[last_idx + 1..].iter().collect();
    if remainder.as_os_str().is_empty() {
        None
    } else {
        Some(remainder)
    }
}

/// Reconciles `path`'s extension against `ext`: appends it if `path` has
/// none, replaces it if `ext` is set and differs from the current one,
/// and leaves `path` untouched if `ext` is empty. Encodes rewrites such as
/// `.es6 -> .js` and `.less -> .wxss`. Shared by `generate_dist_path` and
/// the Asset Pipeline's `Asset::output`.
pub fn reconcile_extension(path: &Path, ext: &str) -> PathBuf {
    if ext.is_empty() {
        return path.to_owned();
    }
    let ext_no_dot = ext.trim_start_matches('.');

    match path.extension().and_then(|e| e.to_str()) {
        None => {
            let mut s = path.as_os_str().to_owned();
            s.push(".");
            s.push(ext_no_dot);
            PathBuf::from(s)
        }
        Some(current) if current == ext_no_dot => path.to_owned(),
        Some(_) => path.with_extension(ext_no_dot),
    }
}
