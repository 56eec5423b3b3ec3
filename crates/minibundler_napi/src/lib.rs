//! Napi entrypoint: converts a JS-shaped config object into
//! `minibundler_core::BundlerConfig` and drives a build, optionally letting a
//! plain JS object supply a `transform` hook. `JsErr`'s napi conversion is
//! folded in here directly rather than kept as its own crate, since this is
//! the only place that ever needs it.

use std::fmt::Display;
use std::path::PathBuf;

use anyhow::anyhow;
use asset_pipeline::{Asset, AssetCapability, GeneratedOutput};
use js_err::{JsErr, Status};
use logger::Logger;
use minibundler_core::{Bundler, BundlerConfig};
use napi::{Env, JsFunction, JsObject, JsString};
use napi_derive::napi;
use path_utils::AliasEntry;

fn status_to_napi(status: Status) -> napi::Status {
    match status {
        Status::Ok => napi::Status::Ok,
        Status::InvalidArg => napi::Status::InvalidArg,
        Status::ObjectExpected => napi::Status::ObjectExpected,
        Status::StringExpected => napi::Status::StringExpected,
        Status::NameExpected => napi::Status::NameExpected,
        Status::FunctionExpected => napi::Status::FunctionExpected,
        Status::NumberExpected => napi::Status::NumberExpected,
        Status::BooleanExpected => napi::Status::BooleanExpected,
        Status::ArrayExpected => napi::Status::ArrayExpected,
        Status::GenericFailure => napi::Status::GenericFailure,
        Status::PendingException => napi::Status::PendingException,
        Status::Cancelled => napi::Status::Cancelled,
        Status::EscapeCalledTwice => napi::Status::EscapeCalledTwice,
        Status::HandleScopeMismatch => napi::Status::HandleScopeMismatch,
        Status::CallbackScopeMismatch => napi::Status::CallbackScopeMismatch,
        Status::QueueFull => napi::Status::QueueFull,
        Status::Closing => napi::Status::Closing,
        Status::BigintExpected => napi::Status::BigintExpected,
        Status::DateExpected => napi::Status::DateExpected,
        Status::ArrayBufferExpected => napi::Status::ArrayBufferExpected,
        Status::DetachableArraybufferExpected => napi::Status::DetachableArraybufferExpected,
        Status::WouldDeadlock => napi::Status::WouldDeadlock,
        Status::NoExternalBuffersAllowed => napi::Status::NoExternalBuffersAllowed,
        Status::Unknown => napi::Status::Unknown,
    }
}

fn err_to_napi(err: JsErr) -> napi::Error {
    napi::Error::new(status_to_napi(err.status()), err.message())
}

fn to_napi<T>(result: Result<T, JsErr>) -> napi::Result<T> {
    result.map_err(err_to_napi)
}

/// `console`-shaped logger, same calling convention as the teacher's
/// `logger_console::ConsoleLogger`, except invoked directly (single
/// threaded, synchronous) since the whole build runs on the calling JS
/// thread here rather than fanning out across OS threads.
#[derive(Clone, Copy)]
struct JsConsoleLogger {
    console: JsObject,
}

impl Logger for JsConsoleLogger {
    fn log(&self, message: impl Into<String>) {
        let _ = self.call("log", message.into());
    }
    fn warn(&self, message: impl Into<String>) {
        let _ = self.call("warn", message.into());
    }
    fn error(&self, message: impl Into<String>) {
        let _ = self.call("error", message.into());
    }
}

impl JsConsoleLogger {
    fn call(&self, method: &str, message: String) -> napi::Result<()> {
        let method: JsFunction = self.console.get_named_property(method)?;
        let arg = self.console.env.create_string(&message)?;
        method.call(Some(&self.console), &[arg])?;
        Ok(())
    }
}

#[derive(Debug)]
#[napi(object)]
pub struct AliasOption {
    pub key: String,
    pub path: String,
    pub dist: Option<String>,
}

#[derive(Debug)]
#[napi(object)]
pub struct BundleOptions {
    pub source_dir: String,
    pub root_dir: String,
    pub out_dir: String,
    pub extensions: Option<Vec<String>>,
    /// An array rather than a map, so the first-match-wins order the
    /// resolver and dist-path mapper both depend on survives the trip
    /// through JS (plain JS objects don't reliably preserve key order
    /// across every engine/serialization path; arrays always do).
    pub alias: Option<Vec<AliasOption>>,
    pub target: Option<String>,
    pub entry_files: Vec<String>,
}

impl From<BundleOptions> for BundlerConfig {
    fn from(value: BundleOptions) -> Self {
        let alias = value
            .alias
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AliasEntry {
                        path: entry.path,
                        dist: entry.dist,
                    },
                )
            })
            .collect();

        BundlerConfig {
            source_dir: PathBuf::from(value.source_dir),
            root_dir: PathBuf::from(value.root_dir),
            out_dir: PathBuf::from(value.out_dir),
            extensions: value.extensions.unwrap_or_default(),
            alias,
            target: value.target.unwrap_or_else(|| "browser".to_owned()),
            entry_files: value.entry_files.into_iter().map(PathBuf::from).collect(),
        }
    }
}

#[napi(object)]
pub struct BundleOutput {
    pub dist_path: String,
    pub ignored: bool,
}

#[napi(object)]
pub struct BundleResult {
    pub outputs: Vec<BundleOutput>,
    pub asset_count: u32,
}

/// Bridges a plain JS object's optional `transform(asset)` hook into
/// `AssetCapability`. `asset` is handed to JS as `{ id, name, contents }`;
/// the hook may return `{ code?, ext?, dependencies? }` to rewrite the
/// Asset's contents, pin its output extension, and register further
/// require-style dependencies, all in one round trip. Runs entirely on the
/// calling JS thread (via `Bundler::build_sequential`): `JsFunction` isn't
/// `Send`, so it can never be shared across the rayon fan-out `build()` uses.
struct JsTransformCapability {
    env: Env,
    transform: Option<JsFunction>,
}

impl AssetCapability for JsTransformCapability {
    fn transform(&self, asset: &mut Asset) -> anyhow::Result<()> {
        let Some(transform) = &self.transform else {
            return Ok(());
        };

        let snapshot = self.asset_snapshot(asset).map_err(js_to_anyhow)?;
        let result = transform
            .call(None, &[snapshot])
            .map_err(js_to_anyhow)?;
        if result.get_type().map_err(js_to_anyhow)? == napi::ValueType::Undefined
            || result.get_type().map_err(js_to_anyhow)? == napi::ValueType::Null
        {
            return Ok(());
        }
        let result: JsObject = result.coerce_to_object().map_err(js_to_anyhow)?;

        if let Ok(code) = result.get_named_property::<JsString>("code") {
            let code = code.into_utf8().map_err(js_to_anyhow)?.as_str().map_err(js_to_anyhow)?.to_owned();
            asset.contents = code.into_bytes();
        }

        if result.has_named_property("dependencies").unwrap_or(false) {
            let deps: JsObject = result.get_named_property("dependencies").map_err(js_to_anyhow)?;
            let len = deps.get_array_length().map_err(js_to_anyhow)?;
            for i in 0..len {
                let request: JsString = deps.get_element(i).map_err(js_to_anyhow)?;
                let request = request.into_utf8().map_err(js_to_anyhow)?.as_str().map_err(js_to_anyhow)?.to_owned();
                asset.dependencies.entry(request).or_default();
            }
        }

        Ok(())
    }

    fn generate(&self, asset: &Asset) -> anyhow::Result<Vec<GeneratedOutput>> {
        let ext = asset
            .name
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(vec![GeneratedOutput {
            code: String::from_utf8_lossy(&asset.contents).into_owned(),
            ext,
            map: None,
        }])
    }
}

impl JsTransformCapability {
    fn asset_snapshot(&self, asset: &Asset) -> napi::Result<JsObject> {
        let mut obj = self.env.create_object()?;
        obj.set_named_property("id", self.env.create_string(&asset.id)?)?;
        obj.set_named_property(
            "name",
            self.env.create_string(&asset.name.to_string_lossy())?,
        )?;
        obj.set_named_property(
            "contents",
            self.env
                .create_string(&String::from_utf8_lossy(&asset.contents))?,
        )?;
        Ok(obj)
    }
}

fn js_to_anyhow(err: napi::Error) -> anyhow::Error {
    anyhow!("{err}")
}

impl Display for BundleOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (ignored={})", self.dist_path, self.ignored)
    }
}

/// Runs a build with no JS-side transform: every Asset's contents pass
/// through untouched, written to `outDir` as-is.
#[napi]
pub fn bundle(options: BundleOptions, console: Option<JsObject>) -> napi::Result<BundleResult> {
    run_build(options, console, None)
}

/// Runs a build where `transform` (and the dependencies it reports) comes
/// from a JS function.
#[napi]
pub fn bundle_with_transform(
    env: Env,
    options: BundleOptions,
    transform: JsFunction,
    console: Option<JsObject>,
) -> napi::Result<BundleResult> {
    run_build(options, console, Some((env, transform)))
}

fn run_build(
    options: BundleOptions,
    console: Option<JsObject>,
    transform: Option<(Env, JsFunction)>,
) -> napi::Result<BundleResult> {
    let config: BundlerConfig = options.into();

    let report = match console {
        Some(console) => {
            let logger = JsConsoleLogger { console };
            run_with_logger(config, logger, transform)
        }
        None => {
            let stdio = logger::StdioLogger::new();
            run_with_logger(config, &stdio, transform)
        }
    };

    let report = to_napi(report.map_err(|err| JsErr::generic_failure(anyhow!("{err}"))))?;

    Ok(BundleResult {
        outputs: report
            .outputs
            .into_iter()
            .map(|(dist_path, ignored)| BundleOutput {
                dist_path: dist_path.to_string_lossy().into_owned(),
                ignored,
            })
            .collect(),
        asset_count: report.asset_count as u32,
    })
}

fn run_with_logger<L: Logger>(
    config: BundlerConfig,
    logger: L,
    transform: Option<(Env, JsFunction)>,
) -> Result<minibundler_core::BuildReport, String> {
    let bundler = Bundler::new(config, logger);

    let result = match transform {
        Some((env, transform)) => {
            let capability = JsTransformCapability {
                env,
                transform: Some(transform),
            };
            bundler.build_sequential(&capability)
        }
        None => bundler.build_sequential(&NoopTransformCapability),
    };

    result.map_err(|errs| {
        let errs: Vec<minibundler_core::BuildError> = errs.into();
        errs.iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    })
}

/// Default capability for `bundle()`: copies every Asset's contents through
/// untouched, same as `asset_pipeline`'s own no-op default `generate`.
struct NoopTransformCapability;
impl AssetCapability for NoopTransformCapability {}
