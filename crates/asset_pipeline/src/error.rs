use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Resolve(#[from] import_resolver::ResolveError),

    /// A capability hook (pretransform/parse/transform/generate/...) failed.
    /// Propagates unchanged and aborts the enclosing `process()` call.
    #[error(transparent)]
    Capability(#[from] anyhow::Error),
}
