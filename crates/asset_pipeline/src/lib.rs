//! Asset Pipeline (C5): the per-file lifecycle (`load`, `pretransform`,
//! `getDependencies`, `transform`, `generate`, `output*`) that turns a
//! source path into zero or more files under `outDir`, plus the helpers
//! capability hooks use to rewrite require-style references
//! (`resolve_alias_name`, `add_url_dependency`) and read sibling config
//! files (`get_config`).

mod capability;
mod error;

pub use capability::{AssetCapability, DependencyOpts, GeneratedOutput, SourceMap};
pub use error::AssetError;

use ahashmap::AHashMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dist_path::DistPathMapper;
use import_resolver::{PackageRecord, Resolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AssetPipelineConfig {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub out_dir: PathBuf,
}

/// Shared across every Asset in a build: the Resolver and Dist-Path Mapper
/// are process-wide caches, not per-Asset state.
pub struct AssetContext {
    pub resolver: Arc<Resolver>,
    pub dist_path: Arc<DistPathMapper>,
    pub config: AssetPipelineConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetConfigOptions<'a> {
    pub package_key: Option<&'a str>,
    pub load: bool,
}

#[derive(Debug, Clone)]
pub enum ConfigResult {
    Path(PathBuf),
    Content(String),
    Value(serde_json::Value),
}

pub struct ResolvedAliasName {
    pub real_name: String,
    pub absolute_path: PathBuf,
    pub dist_path: PathBuf,
    pub relative_require_path: String,
}

pub struct Asset {
    pub name: PathBuf,
    pub id: String,
    pub basename: String,
    pub relative_name: String,
    pub contents: Vec<u8>,
    /// Opaque: parsing is an external, pluggable capability.
    pub ast: Option<Box<dyn std::any::Any + Send + Sync>>,
    pub generated: Option<Vec<GeneratedOutput>>,
    pub hash: Option<String>,
    pub dist_path: Option<PathBuf>,
    pub dependencies: AHashMap<String, DependencyOpts>,
    pub processed: bool,
    pub pkg: Option<Arc<PackageRecord>>,
    ctx: Arc<AssetContext>,
}

impl Asset {
    pub fn new(name: PathBuf, ctx: Arc<AssetContext>) -> Self {
        let basename = name
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_name = relative_name_of(&name, &ctx.config.source_dir);
        Self {
            id: relative_name.clone(),
            basename,
            relative_name,
            contents: Vec::new(),
            ast: None,
            generated: None,
            hash: None,
            dist_path: None,
            dependencies: AHashMap::default(),
            processed: false,
            pkg: None,
            name,
            ctx,
        }
    }

    /// `process()`: `load, pretransform, getDependencies, transform,
    /// generate, output*`, strictly in that order, exactly once per Asset.
    /// Returns the `(distPath, ignore)` pair produced by each `output` call.
    pub fn process(
        &mut self,
        capability: &dyn AssetCapability,
    ) -> Result<Vec<(PathBuf, bool)>, AssetError> {
        let started = Instant::now();

        self.load_if_needed()?;
        capability.pretransform(self).map_err(AssetError::Capability)?;

        if capability.might_have_dependencies(self) {
            self.parse_if_needed(capability)?;
            capability
                .collect_dependencies(self)
                .map_err(AssetError::Capability)?;
        }

        capability.transform(self).map_err(AssetError::Capability)?;

        let generated = capability.generate(self).map_err(AssetError::Capability)?;
        let generated = capability
            .post_process(self, generated)
            .map_err(AssetError::Capability)?;

        self.hash = Some(hash_generated(&generated));

        let mut results = Vec::with_capacity(generated.len());
        for output in generated {
            let (dist_path, ignore) =
                self.output(&output.code, &output.ext, output.map.as_deref())?;
            if !ignore {
                tracing::debug!(
                    asset = %self.relative_name,
                    dist_path = %dist_path.display(),
                    elapsed = ?started.elapsed(),
                    "wrote asset",
                );
            }
            results.push((dist_path, ignore));
        }

        self.processed = true;
        Ok(results)
    }

    /// Clears derived state so the Asset can be reprocessed from scratch.
    /// Identity (`name`, `id`, `basename`, `relative_name`, `pkg`) survives.
    pub fn invalidate(&mut self) {
        self.contents.clear();
        self.ast = None;
        self.generated = None;
        self.hash = None;
        self.dependencies.clear();
        self.processed = false;
    }

    fn load_if_needed(&mut self) -> Result<(), AssetError> {
        if self.contents.is_empty() {
            self.contents = std::fs::read(&self.name).map_err(|source| AssetError::ReadFile {
                path: self.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn parse_if_needed(&mut self, capability: &dyn AssetCapability) -> Result<(), AssetError> {
        if self.ast.is_none() {
            capability.parse(self).map_err(AssetError::Capability)?;
        }
        Ok(())
    }

    /// `distPath ?? generateDistPath(name, ext) ?? outDir/relativeName`,
    /// extension-reconciled. If the result lands outside `outDir`, the
    /// write is skipped and `ignore=true` is returned instead.
    pub fn output(
        &mut self,
        code: &str,
        ext: &str,
        map: Option<&dyn SourceMap>,
    ) -> Result<(PathBuf, bool), AssetError> {
        let candidate = self
            .dist_path
            .clone()
            .unwrap_or_else(|| self.ctx.dist_path.generate_dist_path(&self.name, ext));
        let dist_path = dist_path::reconcile_extension(&candidate, ext);

        let pretty_dist = pathdiff::diff_paths(&dist_path, &self.ctx.config.out_dir)
            .map(|p| path_utils::promote_relative(&path_utils::to_unix(&p.to_string_lossy())))
            .unwrap_or_default();

        if pretty_dist.starts_with("..") {
            return Ok((dist_path, true));
        }

        let mut final_code = code.to_owned();
        if let Some(map) = map {
            let basename = dist_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let encoded = BASE64.encode(map.stringify(&basename, "/"));
            final_code.push_str(&format!(
                "\r\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded}"
            ));
        }

        if let Some(parent) = dist_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AssetError::WriteFile {
                path: dist_path.clone(),
                source,
            })?;
        }
        std::fs::write(&dist_path, final_code.as_bytes()).map_err(|source| {
            AssetError::WriteFile {
                path: dist_path.clone(),
                source,
            }
        })?;

        self.dist_path = Some(dist_path.clone());
        Ok((dist_path, false))
    }

    /// Resolves `name` against this Asset and computes both sides' dist
    /// paths, producing a require-style path relative to this Asset's own
    /// output location. Downstream dependency-rewrite hooks use this to
    /// turn a resolved request back into emitted-code text.
    pub fn resolve_alias_name(&self, name: &str, ext: &str) -> Result<ResolvedAliasName, AssetError> {
        let resolution = self.ctx.resolver.resolve(name, Some(&self.name))?;
        let dependency_dist_path = self
            .ctx
            .dist_path
            .generate_dist_path(&resolution.real_path, ext);
        let own_dist_path = self
            .dist_path
            .clone()
            .unwrap_or_else(|| self.ctx.dist_path.generate_dist_path(&self.name, ""));
        let parent_dir = own_dist_path
            .parent()
            .unwrap_or(&self.ctx.config.out_dir);
        let relative_require_path = pathdiff::diff_paths(&dependency_dist_path, parent_dir)
            .map(|p| path_utils::promote_relative(&path_utils::to_unix(&p.to_string_lossy())))
            .unwrap_or_else(|| dependency_dist_path.to_string_lossy().into_owned());

        Ok(ResolvedAliasName {
            real_name: name.to_owned(),
            absolute_path: resolution.real_path,
            dist_path: dependency_dist_path,
            relative_require_path,
        })
    }

    /// Registers a URL-shaped dependency found inside emitted code (a CSS
    /// `url(...)`, an image `src`, ...) and returns the rewritten URL to
    /// substitute in its place. Full URLs (`http://`, `//`, `data:`) pass
    /// through untouched.
    pub fn add_url_dependency(&mut self, url: &str, from: &Path) -> Result<String, AssetError> {
        if is_full_url(url) {
            return Ok(url.to_owned());
        }

        let (pathname, suffix) = match url.find(['?', '#']) {
            Some(idx) => (&url[..idx], &url[idx..]),
            None => (url, ""),
        };
        let decoded = percent_decode(pathname);
        let dir = from.parent().unwrap_or(from);

        let dep_name = match decoded.chars().next() {
            Some('/') if !self.name.starts_with(&self.ctx.config.source_dir) => {
                self.rewrite_against_package_root(&decoded)
            }
            Some('~') | Some('/') => self.ctx.resolver.resolve_filename(&decoded, dir),
            _ => {
                let resolution = self.ctx.resolver.resolve(&decoded, Some(from))?;
                pathdiff::diff_paths(&resolution.real_path, dir)
                    .map(|p| path_utils::promote_relative(&path_utils::to_unix(&p.to_string_lossy())))
                    .unwrap_or_else(|| resolution.real_path.to_string_lossy().into_owned())
            }
        };

        self.dependencies.insert(
            dep_name.clone(),
            DependencyOpts {
                dynamic: true,
                ..Default::default()
            },
        );

        Ok(format!("{dep_name}{suffix}"))
    }

    /// Rewrites a `/`-prefixed URL relative to the owning package's own root
    /// (or `main`'s dist dir, when `main` lives in a subdirectory) rather
    /// than `source_dir`, for an Asset that lives outside `source_dir`
    /// entirely (a `node_modules` package, typically).
    fn rewrite_against_package_root(&self, decoded: &str) -> String {
        let tail = decoded.trim_start_matches('/');
        let Some(pkg) = &self.pkg else {
            return decoded.to_owned();
        };
        let base_dir = match &pkg.main {
            Some(main) if main.contains('/') => Path::new(main)
                .parent()
                .map(|parent| pkg.pkgdir.join(parent))
                .unwrap_or_else(|| pkg.pkgdir.clone()),
            _ => pkg.pkgdir.clone(),
        };
        base_dir.join(tail).to_string_lossy().into_owned()
    }

    /// `opts.packageKey`, if set and present on the nearest package, wins
    /// outright. Otherwise walks up from this Asset's directory looking for
    /// any of `filenames`, registering the first hit as a dependency.
    pub fn get_config(
        &mut self,
        filenames: &[&str],
        opts: &GetConfigOptions,
    ) -> Result<Option<ConfigResult>, AssetError> {
        if let Some(key) = opts.package_key {
            if let Some(pkg) = &self.pkg {
                if let Some(value) = pkg.raw.get(key) {
                    return Ok(Some(ConfigResult::Value(value.clone())));
                }
            }
        }

        let mut dir = self
            .name
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.ctx.config.source_dir.clone());

        loop {
            for filename in filenames {
                let candidate = dir.join(filename);
                if candidate.is_file() {
                    self.dependencies.insert(
                        candidate.to_string_lossy().into_owned(),
                        DependencyOpts {
                            included_in_parent: true,
                            ..Default::default()
                        },
                    );
                    if opts.load {
                        let content = std::fs::read_to_string(&candidate).map_err(|source| {
                            AssetError::ReadFile {
                                path: candidate.clone(),
                                source,
                            }
                        })?;
                        return Ok(Some(ConfigResult::Content(content)));
                    }
                    return Ok(Some(ConfigResult::Path(candidate)));
                }
            }

            if dir == self.ctx.config.root_dir {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }
}

fn relative_name_of(name: &Path, source_dir: &Path) -> String {
    pathdiff::diff_paths(name, source_dir)
        .map(|p| path_utils::to_unix(&p.to_string_lossy()))
        .unwrap_or_else(|| name.to_string_lossy().into_owned())
}

fn is_full_url(s: &str) -> bool {
    s.starts_with("//") || s.starts_with("data:") || s.contains("://")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) =
                u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16)
            {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hash_generated(outputs: &[GeneratedOutput]) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for output in outputs {
        output.code.hash(&mut hasher);
        output.ext.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod test {
    use super::*;
    use import_resolver::ResolverConfig;
    use pretty_assertions::assert_eq;
    use test_tmpdir::test_tmpdir;

    fn ctx(tmp: &test_tmpdir::TmpDir) -> Arc<AssetContext> {
        let root = tmp.root().to_owned();
        let source_dir = tmp.root_join("src");
        let out_dir = tmp.root_join("dist");
        let resolver = Resolver::new(ResolverConfig {
            source_dir: source_dir.clone(),
            root_dir: root.clone(),
            extensions: vec![".js".to_owned()],
            alias: Vec::new(),
            target: "browser".to_owned(),
        });
        let dist_path = DistPathMapper::new(dist_path::DistPathConfig {
            source_dir: source_dir.clone(),
            root_dir: root.clone(),
            out_dir: out_dir.clone(),
            alias: Vec::new(),
        });
        Arc::new(AssetContext {
            resolver: Arc::new(resolver),
            dist_path: Arc::new(dist_path),
            config: AssetPipelineConfig {
                source_dir,
                root_dir: root,
                out_dir,
            },
        })
    }

    struct NoopCapability;
    impl AssetCapability for NoopCapability {}

    #[test]
    fn construction_derives_relative_and_base_names() {
        let tmp = test_tmpdir! {
            "src/components/a.js" => "module.exports = 1;"
        };
        let context = ctx(&tmp);
        let asset = Asset::new(tmp.root_join("src/components/a.js"), context);
        assert_eq!(asset.basename, "a.js");
        assert_eq!(asset.relative_name, "components/a.js");
        assert_eq!(asset.id, "components/a.js");
    }

    #[test]
    fn process_runs_phases_in_order_and_writes_default_output() {
        let tmp = test_tmpdir! {
            "src/a.js" => "console.log(1)"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/a.js"), context);
        let results = asset.process(&NoopCapability).unwrap();

        assert_eq!(results.len(), 1);
        let (dist_path, ignore) = &results[0];
        assert!(!ignore);
        assert_eq!(*dist_path, tmp.root_join("dist/a.js"));
        assert!(asset.processed);
        assert!(asset.hash.is_some());
    }

    #[test]
    fn output_ignores_paths_outside_out_dir() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("outside/a.js"), context);
        asset.dist_path = Some(tmp.root_join("elsewhere/a.js"));

        let (_, ignore) = asset.output("code", "", None).unwrap();
        assert!(ignore);
    }

    #[test]
    fn add_url_dependency_passes_through_full_urls() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/a.js"), context);

        let rewritten = asset
            .add_url_dependency("https://example.com/a.png", &tmp.root_join("src"))
            .unwrap();
        assert_eq!(rewritten, "https://example.com/a.png");
        assert!(asset.dependencies.is_empty());
    }

    #[test]
    fn add_url_dependency_resolves_relative_request() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x",
            "src/assets/logo.png" => ""
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/a.js"), context);
        let rewritten = asset
            .add_url_dependency("./assets/logo.png", &tmp.root_join("src/a.js"))
            .unwrap();

        assert_eq!(rewritten, "./assets/logo.png");
        assert_eq!(asset.dependencies.len(), 1);
        assert!(asset.dependencies.values().next().unwrap().dynamic);
    }

    #[test]
    fn add_url_dependency_rewrites_root_relative_url_against_package_dir() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x",
            "node_modules/demo-pkg/dist/main.js" => "x",
            "node_modules/demo-pkg/dist/images/logo.png" => ""
        };
        let context = ctx(&tmp);
        let pkgdir = tmp.root_join("node_modules/demo-pkg");
        let mut asset = Asset::new(pkgdir.join("dist/main.js"), context);
        asset.pkg = Some(Arc::new(PackageRecord {
            pkgfile: pkgdir.join("package.json"),
            pkgdir: pkgdir.clone(),
            name: Some("demo-pkg".to_owned()),
            main: Some("dist/main.js".to_owned()),
            module: None,
            source: None,
            browser: None,
            alias: None,
            miniprogram: None,
            raw: serde_json::json!({}),
        }));

        let rewritten = asset
            .add_url_dependency("/images/logo.png", &pkgdir.join("dist"))
            .unwrap();

        let expected = pkgdir
            .join("dist/images/logo.png")
            .to_string_lossy()
            .into_owned();
        assert_eq!(rewritten, expected);
        assert_eq!(asset.dependencies.len(), 1);
        assert!(asset.dependencies.contains_key(&expected));
    }

    #[test]
    fn get_config_finds_nearest_file_and_registers_dependency() {
        let tmp = test_tmpdir! {
            "src/nested/a.js" => "x",
            "src/.babelrc" => "{}"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/nested/a.js"), context);
        let result = asset
            .get_config(&[".babelrc"], &GetConfigOptions::default())
            .unwrap();

        match result {
            Some(ConfigResult::Path(path)) => assert_eq!(path, tmp.root_join("src/.babelrc")),
            other => panic!("expected Some(Path(..)), got {other:?}"),
        }
        assert!(asset
            .dependencies
            .get(&tmp.root_join("src/.babelrc").to_string_lossy().into_owned())
            .unwrap()
            .included_in_parent);
    }

    #[test]
    fn get_config_prefers_package_key_over_file_walk() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/a.js"), context);
        asset.pkg = Some(Arc::new(PackageRecord {
            pkgfile: tmp.root_join("package.json"),
            pkgdir: tmp.root().to_owned(),
            name: Some("demo".to_owned()),
            main: None,
            module: None,
            source: None,
            browser: None,
            alias: None,
            miniprogram: None,
            raw: serde_json::json!({ "babel": { "presets": ["es2015"] } }),
        }));

        let opts = GetConfigOptions {
            package_key: Some("babel"),
            load: false,
        };
        let result = asset.get_config(&[".babelrc"], &opts).unwrap();
        match result {
            Some(ConfigResult::Value(value)) => {
                assert_eq!(value, serde_json::json!({ "presets": ["es2015"] }))
            }
            other => panic!("expected Some(Value(..)), got {other:?}"),
        }
    }

    #[test]
    fn invalidate_clears_derived_state_but_keeps_identity() {
        let tmp = test_tmpdir! {
            "src/a.js" => "x"
        };
        let context = ctx(&tmp);
        let mut asset = Asset::new(tmp.root_join("src/a.js"), context);
        asset.process(&NoopCapability).unwrap();
        assert!(asset.processed);

        asset.invalidate();
        assert!(!asset.processed);
        assert!(asset.contents.is_empty());
        assert!(asset.hash.is_none());
        assert_eq!(asset.relative_name, "a.js");
    }

    #[test]
    fn hash_generated_is_stable_for_same_outputs() {
        let outputs = vec![GeneratedOutput {
            code: "x".to_owned(),
            ext: ".js".to_owned(),
            map: None,
        }];
        assert_eq!(hash_generated(&outputs), hash_generated(&outputs));
    }
}
