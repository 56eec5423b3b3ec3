//! Glue: turns an `IInitOptions`-shaped config into a running build.
//! `Bundler::build()` drives the Asset graph to completion, starting from
//! `entryFiles` and expanding the frontier with each Asset's discovered
//! dependencies until nothing new turns up.

mod config;
mod error;

pub use config::{BundlerConfig, IInitOptions};
pub use error::BuildError;

use ahashmap::AHashSet;
use asset_pipeline::{Asset, AssetCapability, AssetContext, AssetError, AssetPipelineConfig};
use dashmap::DashMap;
use dist_path::{DistPathConfig, DistPathMapper};
use import_resolver::{PackageRecord, Resolver, ResolverConfig};
use logger::Logger;
use multi_err::MultiErr;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct BuildReport {
    pub outputs: Vec<(PathBuf, bool)>,
    pub asset_count: usize,
}

pub struct Bundler<L: Logger> {
    ctx: Arc<AssetContext>,
    config: BundlerConfig,
    logger: L,
    assets: DashMap<PathBuf, Asset>,
    /// Remembers the owning package of a dependency path discovered via a
    /// `Resolver::resolve` call, so the Asset created for it next round
    /// doesn't have to re-walk for its own package.
    pkg_hints: DashMap<PathBuf, Arc<PackageRecord>>,
}

impl<L: Logger> Bundler<L> {
    pub fn new(config: BundlerConfig, logger: L) -> Self {
        let resolver = Resolver::new(ResolverConfig {
            source_dir: config.source_dir.clone(),
            root_dir: config.root_dir.clone(),
            extensions: config.extensions.clone(),
            alias: config.alias.clone(),
            target: config.target.clone(),
        });
        let dist_path = DistPathMapper::new(DistPathConfig {
            source_dir: config.source_dir.clone(),
            root_dir: config.root_dir.clone(),
            out_dir: config.out_dir.clone(),
            alias: config.alias.clone(),
        });
        let ctx = Arc::new(AssetContext {
            resolver: Arc::new(resolver),
            dist_path: Arc::new(dist_path),
            config: AssetPipelineConfig {
                source_dir: config.source_dir.clone(),
                root_dir: config.root_dir.clone(),
                out_dir: config.out_dir.clone(),
            },
        });
        Self {
            ctx,
            config,
            logger,
            assets: DashMap::new(),
            pkg_hints: DashMap::new(),
        }
    }

    /// Same frontier-expansion loop as `build`, but drives it on the calling
    /// thread instead of fanning it out via rayon, for capabilities and
    /// loggers that bridge into a single-threaded host (a JS callback
    /// object, say) and so aren't `Sync`.
    pub fn build_sequential(
        &self,
        capability: &dyn AssetCapability,
    ) -> Result<BuildReport, MultiErr<BuildError>> {
        let mut frontier: AHashSet<PathBuf> = self.config.entry_files.iter().cloned().collect();
        let mut outputs = Vec::new();
        let mut errors = MultiErr::new();

        while !frontier.is_empty() {
            let batch: Vec<PathBuf> = frontier.drain().collect();
            for path in batch {
                match self.process_one(&path, capability) {
                    Ok((asset_outputs, discovered)) => {
                        outputs.extend(asset_outputs);
                        for dep in discovered {
                            if !self.assets.contains_key(&dep) {
                                frontier.insert(dep);
                            }
                        }
                    }
                    Err(err) => {
                        self.logger.error(format!("{}: {err}", path.display()));
                        errors.add_single(err);
                    }
                }
            }
        }

        match errors.into_result() {
            Ok(()) => Ok(BuildReport {
                outputs,
                asset_count: self.assets.len(),
            }),
            Err(errors) => Err(errors),
        }
    }

    /// Runs one Asset through `process()` and resolves its raw dependency
    /// requests into the absolute paths the next frontier round needs.
    /// `dependencies` keys that are already absolute, existing files (as
    /// `get_config`'s `includedInParent` entries are) are taken as-is;
    /// everything else is treated as a require-style specifier and resolved
    /// relative to this Asset.
    fn process_one(
        &self,
        path: &Path,
        capability: &dyn AssetCapability,
    ) -> Result<(Vec<(PathBuf, bool)>, Vec<PathBuf>), BuildError> {
        if self.assets.contains_key(path) {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut asset = Asset::new(path.to_owned(), Arc::clone(&self.ctx));
        asset.pkg = self.pkg_hints.get(path).map(|entry| Arc::clone(entry.value()));

        let outputs = asset
            .process(capability)
            .map_err(|source| BuildError {
                path: path.to_owned(),
                source,
            })?;

        let mut discovered = Vec::with_capacity(asset.dependencies.len());
        for request in asset.dependencies.keys() {
            let as_path = Path::new(request);
            if as_path.is_absolute() && as_path.is_file() {
                discovered.push(as_path.to_owned());
                continue;
            }

            match self.ctx.resolver.resolve(request, Some(&asset.name)) {
                Ok(resolution) => {
                    if let Some(pkg) = resolution.pkg.clone() {
                        self.pkg_hints.insert(resolution.real_path.clone(), pkg);
                    }
                    discovered.push(resolution.real_path);
                }
                Err(err) => {
                    return Err(BuildError {
                        path: path.to_owned(),
                        source: AssetError::from(err),
                    });
                }
            }
        }

        self.assets.insert(path.to_owned(), asset);
        Ok((outputs, discovered))
    }
}

impl<L: Logger + Send + Sync> Bundler<L> {
    /// Drives every entry file, and everything they transitively depend on,
    /// through `Asset::process`. Runs each round's frontier in parallel and
    /// expands it with whatever new dependency paths that round discovered,
    /// until the frontier runs dry. Errors are accumulated, not fatal: one
    /// Asset's failure doesn't stop its batch-mates from finishing.
    ///
    /// Needs `L: Send + Sync` because the logger is shared across the rayon
    /// fan-out below; `build_sequential` doesn't have that requirement.
    pub fn build(
        &self,
        capability: &(dyn AssetCapability + Sync),
    ) -> Result<BuildReport, MultiErr<BuildError>> {
        let mut frontier: AHashSet<PathBuf> = self.config.entry_files.iter().cloned().collect();
        let mut outputs = Vec::new();
        let mut errors = MultiErr::new();

        while !frontier.is_empty() {
            let batch: Vec<PathBuf> = frontier.drain().collect();
            let results: Vec<(PathBuf, Result<(Vec<(PathBuf, bool)>, Vec<PathBuf>), BuildError>)> = batch
                .into_par_iter()
                .map(|path| {
                    let result = self.process_one(&path, capability);
                    (path, result)
                })
                .collect();

            for (path, result) in results {
                match result {
                    Ok((asset_outputs, discovered)) => {
                        outputs.extend(asset_outputs);
                        for dep in discovered {
                            if !self.assets.contains_key(&dep) {
                                frontier.insert(dep);
                            }
                        }
                    }
                    Err(err) => {
                        self.logger.error(format!("{}: {err}", path.display()));
                        errors.add_single(err);
                    }
                }
            }
        }

        match errors.into_result() {
            Ok(()) => Ok(BuildReport {
                outputs,
                asset_count: self.assets.len(),
            }),
            Err(errors) => Err(errors),
        }
    }
}
