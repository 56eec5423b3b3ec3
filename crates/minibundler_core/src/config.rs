//! `IInitOptions`: the JSON-serializable config shape accepted at the
//! external boundary, and its conversion into the internal,
//! already-normalized `BundlerConfig` the core actually runs on. Mirrors
//! `UnusedFinderJSONConfig -> UnusedFinderConfig`: a `camelCase` wire
//! struct plus a `From` that normalizes it once instead of repeating
//! `normalize_alias` calls at every use site.

use indexmap::IndexMap;
use path_utils::{normalize_alias, AliasConfigEntry, AliasEntry};
use serde::Deserialize;
use std::path::PathBuf;

fn default_target() -> String {
    "browser".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IInitOptions {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub out_dir: PathBuf,
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Order-significant: alias keys are matched as substrings, first
    /// match wins, so the declared order of this map must survive.
    #[serde(default)]
    pub alias: IndexMap<String, AliasConfigEntry>,
    #[serde(default = "default_target")]
    pub target: String,
    pub entry_files: Vec<PathBuf>,
    /// Reserved; does not affect core semantics.
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Clone)]
pub struct BundlerConfig {
    pub source_dir: PathBuf,
    pub root_dir: PathBuf,
    pub out_dir: PathBuf,
    pub extensions: Vec<String>,
    pub alias: Vec<(String, AliasEntry)>,
    pub target: String,
    pub entry_files: Vec<PathBuf>,
}

impl From<IInitOptions> for BundlerConfig {
    fn from(value: IInitOptions) -> Self {
        let alias = value
            .alias
            .into_iter()
            .map(|(key, entry)| (key, normalize_alias(entry)))
            .collect();

        BundlerConfig {
            source_dir: value.source_dir,
            root_dir: value.root_dir,
            out_dir: value.out_dir,
            extensions: value.extensions,
            alias,
            target: value.target,
            entry_files: value.entry_files,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_camel_case_keys_and_defaults_target() {
        let json = r#"{
            "sourceDir": "/proj/src",
            "rootDir": "/proj",
            "outDir": "/proj/dist",
            "entryFiles": ["/proj/src/index.js"]
        }"#;
        let options: IInitOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.target, "browser");
        assert!(options.extensions.is_empty());
        assert_eq!(options.entry_files, vec![PathBuf::from("/proj/src/index.js")]);
    }

    #[test]
    fn alias_order_survives_the_round_trip_into_bundler_config() {
        let json = r#"{
            "sourceDir": "/proj/src",
            "rootDir": "/proj",
            "outDir": "/proj/dist",
            "entryFiles": [],
            "alias": {
                "@/": "./src/",
                "@navbar": {"path": "./node_modules/nav", "dist": "pages"}
            }
        }"#;
        let options: IInitOptions = serde_json::from_str(json).unwrap();
        let config: BundlerConfig = options.into();
        let keys: Vec<&str> = config.alias.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["@/", "@navbar"]);
        assert_eq!(config.alias[1].1.dist.as_deref(), Some("pages"));
    }
}
