use crate::Asset;
use anyhow::Result;

/// A source map, kept opaque the same way `Asset::ast` is: parsing and
/// source-map generation are both external, pluggable capabilities. `output`
/// only needs to serialize one to embed it as a data URL.
pub trait SourceMap: std::fmt::Debug + Send + Sync {
    fn stringify(&self, file: &str, source_root: &str) -> String;
}

#[derive(Debug, Default)]
pub struct GeneratedOutput {
    pub code: String,
    pub ext: String,
    pub map: Option<Box<dyn SourceMap>>,
}

/// Arbitrary per-dependency metadata a capability wants to carry alongside a
/// request string (`from -> to`). `extra` is a bag for plugin-specific data
/// that doesn't warrant its own field.
#[derive(Debug, Clone, Default)]
pub struct DependencyOpts {
    pub dynamic: bool,
    pub included_in_parent: bool,
    pub extra: serde_json::Value,
}

/// Asset lifecycle hooks, dynamically dispatched. Mirrors a subclassable
/// Asset with overridable phases; every method defaults to a no-op so a
/// capability only needs to implement the phases it cares about.
///
/// Deliberately has no `Send`/`Sync` supertrait: a capability that bridges
/// into a single-threaded host (a JS callback object, say) isn't either, and
/// still needs to implement this trait. Callers that fan a capability out
/// across threads (`minibundler_core::Bundler::build`) add `+ Sync` at the
/// point they need it instead.
pub trait AssetCapability {
    fn pretransform(&self, _asset: &mut Asset) -> Result<()> {
        Ok(())
    }

    fn parse(&self, _asset: &mut Asset) -> Result<()> {
        Ok(())
    }

    fn collect_dependencies(&self, _asset: &mut Asset) -> Result<()> {
        Ok(())
    }

    fn transform(&self, _asset: &mut Asset) -> Result<()> {
        Ok(())
    }

    fn generate(&self, _asset: &Asset) -> Result<Vec<GeneratedOutput>> {
        Ok(vec![GeneratedOutput::default()])
    }

    fn post_process(
        &self,
        _asset: &mut Asset,
        outputs: Vec<GeneratedOutput>,
    ) -> Result<Vec<GeneratedOutput>> {
        Ok(outputs)
    }

    fn should_invalidate(&self, _asset: &Asset) -> bool {
        false
    }

    fn might_have_dependencies(&self, _asset: &Asset) -> bool {
        true
    }
}
