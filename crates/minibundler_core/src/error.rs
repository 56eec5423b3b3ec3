use std::path::PathBuf;

/// One Asset's failure during a `Bundler::build()` run. Accumulated via
/// `multi_err::MultiErr` rather than short-circuiting the whole build, so one
/// bad file doesn't hide every other error in the same batch.
#[derive(Debug, thiserror::Error)]
#[error("failed to build {}: {source}", path.display())]
pub struct BuildError {
    pub path: PathBuf,
    #[source]
    pub source: asset_pipeline::AssetError,
}
