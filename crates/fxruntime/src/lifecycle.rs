//! Incremental effect reload: one compile step per presented frame.
//!
//! ```text
//!   Idle ─▶ FileChangePending ─▶ Preprocessing ─▶ ParsePending ─▶ Compiling ─▶ PostProcessing ─▶ Idle
//!    ▲            │ empty / unchanged / missing       │ parse error      │ compile error
//!    └────────────┴───────────────────────────────────┴──────────────────┘
//! ```
//!
//! Any failure returns to `Idle` and leaves the previously compiled effect
//! running. A reload request while a step is pending throws away what was
//! built so far and starts again at `FileChangePending`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Receiver;
use fxconfig::RuntimeConfig;

use crate::device::GraphicsDevice;
use crate::effect::{BuildEnvironment, Effect, EffectBuilder, TextureOrigin};
use crate::pragma::{apply_pragmas, EffectSettings};
use crate::toolchain::{CompileOptions, EffectToolchain, PreprocessRequest};
use crate::upload::{convert_for_upload, load_texture_source};

pub const STATUS_LOADING: &str = "Loading effect ...";
pub const STATUS_COMPILING: &str = "Compiling effect ...";
pub const STATUS_FAILED: &str = " Failed!";
pub const STATUS_ALREADY_COMPILED: &str = " Already compiled.";
pub const STATUS_SUCCEEDED: &str = " Succeeded!";
pub const STATUS_NOT_FOUND: &str = " No effect found!";

/// Pending compile step together with what the previous step produced.
#[derive(Debug, Default)]
pub enum CompileStep<Tree> {
    #[default]
    Idle,
    FileChangePending,
    Preprocessing {
        source: String,
    },
    ParsePending {
        source: String,
    },
    Compiling {
        source: String,
        tree: Tree,
    },
    PostProcessing {
        source: String,
        effect: Effect,
    },
}

impl<Tree> CompileStep<Tree> {
    pub fn index(&self) -> u8 {
        match self {
            CompileStep::Idle => 0,
            CompileStep::FileChangePending => 1,
            CompileStep::Preprocessing { .. } => 2,
            CompileStep::ParsePending { .. } => 3,
            CompileStep::Compiling { .. } => 4,
            CompileStep::PostProcessing { .. } => 5,
        }
    }
}

/// Collaborators a single step may need.
pub struct TickContext<'a, T: EffectToolchain> {
    pub toolchain: &'a mut T,
    pub device: &'a mut dyn GraphicsDevice,
    pub environment: BuildEnvironment,
    pub defines: Vec<(String, String)>,
    pub now: Duration,
}

/// Resolves the configured effect, falling back to the fallback name next
/// to it.
pub fn resolve_effect_path(config: &RuntimeConfig) -> Option<PathBuf> {
    if config.effect.path.is_file() {
        return Some(config.effect.path.clone());
    }
    let fallback = config.effect_dir().join(config.effect.fallback.as_deref()?);
    fallback.is_file().then_some(fallback)
}

pub struct EffectLifecycle<Tree> {
    step: CompileStep<Tree>,
    config: RuntimeConfig,
    status: String,
    diagnostics: String,
    message: String,
    settings: EffectSettings,
    compile_count: u32,
    effect_path: Option<PathBuf>,
    included_files: BTreeSet<PathBuf>,
    compiled_source: Option<String>,
    changes: Option<Receiver<PathBuf>>,
    last_activity: Duration,
}

impl<Tree> EffectLifecycle<Tree> {
    pub fn new(config: RuntimeConfig) -> Self {
        let settings = EffectSettings::from_config(&config);
        Self {
            step: CompileStep::Idle,
            config,
            status: String::new(),
            diagnostics: String::new(),
            message: String::new(),
            settings,
            compile_count: 0,
            effect_path: None,
            included_files: BTreeSet::new(),
            compiled_source: None,
            changes: None,
            last_activity: Duration::ZERO,
        }
    }

    pub fn step(&self) -> &CompileStep<Tree> {
        &self.step
    }

    pub fn step_index(&self) -> u8 {
        self.step.index()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.step, CompileStep::Idle)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    pub fn compile_count(&self) -> u32 {
        self.compile_count
    }

    pub fn included_files(&self) -> impl Iterator<Item = &Path> {
        self.included_files.iter().map(PathBuf::as_path)
    }

    /// Sets a status line outside the compile flow (toggle messages).
    pub fn set_status(&mut self, status: impl Into<String>, now: Duration) {
        self.status = status.into();
        self.last_activity = now;
    }

    /// Connects the external file watcher.
    pub fn attach_watcher(&mut self, changes: Receiver<PathBuf>) {
        self.changes = Some(changes);
    }

    /// Drains pending change notifications. Returns whether any of them
    /// touched the effect or one of its includes.
    pub fn poll_changes(&mut self) -> bool {
        let Some(changes) = &self.changes else {
            return false;
        };
        let mut relevant = false;
        for path in changes.try_iter() {
            if self.included_files.contains(&path) {
                tracing::debug!(path = %path.display(), "effect file changed");
                relevant = true;
            }
        }
        relevant
    }

    /// Restarts the machine at `FileChangePending`, dropping any effect that
    /// was built but not yet swapped in.
    pub fn request_reload(&mut self, device: &mut dyn GraphicsDevice) {
        if let CompileStep::PostProcessing { effect, .. } = std::mem::take(&mut self.step) {
            effect.release(device);
        }
        self.step = CompileStep::FileChangePending;
    }

    /// Abandons any pending step and forgets which source is compiled, so
    /// the next reload compiles again. The compile counter is kept.
    pub fn reset(&mut self, device: &mut dyn GraphicsDevice) {
        if let CompileStep::PostProcessing { effect, .. } = std::mem::take(&mut self.step) {
            effect.release(device);
        }
        self.compiled_source = None;
    }

    /// Clears the status line and the effect's message once they have been
    /// shown long enough.
    pub fn expire_status(&mut self, now: Duration, has_effect: bool) {
        if !self.is_idle() || !has_effect || self.status.is_empty() {
            return;
        }
        let timeout = if self.diagnostics.is_empty() {
            self.config.overlay.status_timeout
        } else {
            self.config.overlay.error_status_timeout
        };
        if now.saturating_sub(self.last_activity) > timeout {
            self.status.clear();
            self.message.clear();
        }
    }

    fn fail(&mut self, diagnostics: String) {
        self.status.push_str(STATUS_FAILED);
        tracing::error!(diagnostics = %diagnostics, "effect compile step failed");
        self.diagnostics = diagnostics;
    }

    /// Advances by at most one step. Returns `true` when `current` was
    /// replaced by a freshly compiled effect.
    pub fn tick<T>(&mut self, ctx: TickContext<'_, T>, current: &mut Option<Effect>) -> bool
    where
        T: EffectToolchain<Tree = Tree>,
    {
        let step = std::mem::take(&mut self.step);
        if matches!(step, CompileStep::Idle) {
            return false;
        }
        self.last_activity = ctx.now;

        match step {
            CompileStep::Idle => false,
            CompileStep::FileChangePending => {
                self.preprocess(ctx);
                false
            }
            CompileStep::Preprocessing { source } => {
                self.status = STATUS_COMPILING.to_string();
                self.step = CompileStep::ParsePending { source };
                false
            }
            CompileStep::ParsePending { source } => {
                match ctx.toolchain.parse(&source) {
                    Ok(tree) => self.step = CompileStep::Compiling { source, tree },
                    Err(errors) => self.fail(errors),
                }
                false
            }
            CompileStep::Compiling { source, tree } => {
                let options = CompileOptions {
                    skip_optimization: self.settings.skip_optimization,
                };
                let mut builder = EffectBuilder::new(ctx.device, ctx.environment);
                match ctx.toolchain.compile(&tree, &options, &mut builder) {
                    Ok(()) => {
                        let (effect, warnings) = builder.finish();
                        for warning in &warnings {
                            tracing::warn!(warning = %warning, "effect compiled with warning");
                        }
                        if effect.techniques.is_empty() {
                            tracing::warn!("effect does not contain any techniques");
                        }
                        self.compile_count += 1;
                        self.status.push_str(STATUS_SUCCEEDED);
                        self.diagnostics = warnings.join("\n");
                        tracing::info!(compile = self.compile_count, "effect compiled");
                        self.step = CompileStep::PostProcessing { source, effect };
                    }
                    Err(err) => {
                        builder.discard();
                        self.fail(err.to_string());
                    }
                }
                false
            }
            CompileStep::PostProcessing { source, mut effect } => {
                self.load_texture_sources(ctx.device, &mut effect);
                for technique in &mut effect.techniques {
                    technique.apply_annotations();
                }
                if let Some(previous) = current.replace(effect) {
                    previous.release(ctx.device);
                }
                self.compiled_source = Some(source);
                true
            }
        }
    }

    fn preprocess<T: EffectToolchain<Tree = Tree>>(&mut self, ctx: TickContext<'_, T>) {
        self.status = STATUS_LOADING.to_string();

        let Some(path) = resolve_effect_path(&self.config) else {
            self.status.push_str(STATUS_NOT_FOUND);
            tracing::error!(path = %self.config.effect.path.display(), "no effect found");
            return;
        };
        tracing::info!(path = %path.display(), "loading effect");

        let include_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let request = PreprocessRequest {
            path: path.clone(),
            include_paths: vec![include_dir],
            defines: ctx.defines,
        };
        let preprocessed = ctx.toolchain.preprocess(&request);

        self.included_files = preprocessed.included_files.into_iter().collect();
        self.included_files.insert(path.clone());
        self.effect_path = Some(path);

        if preprocessed.output.is_empty() {
            self.fail(preprocessed.errors);
            return;
        }
        if self.compiled_source.as_deref() == Some(preprocessed.output.as_str()) {
            self.status.push_str(STATUS_ALREADY_COMPILED);
            tracing::info!("effect source unchanged, skipping compile");
            return;
        }

        self.diagnostics = preprocessed.errors;
        self.settings = EffectSettings::from_config(&self.config);
        let outcome = apply_pragmas(
            &mut self.settings,
            &preprocessed.pragmas,
            self.compile_count == 0,
        );
        if let Some(message) = outcome.message {
            self.message = message;
        }
        for warning in outcome.warnings {
            tracing::warn!(warning = %warning, "ignoring pragma");
            if !self.diagnostics.is_empty() {
                self.diagnostics.push('\n');
            }
            self.diagnostics.push_str(&warning);
        }
        self.step = CompileStep::Preprocessing {
            source: preprocessed.output,
        };
    }

    fn load_texture_sources(&mut self, device: &mut dyn GraphicsDevice, effect: &mut Effect) {
        let base = self
            .effect_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        for texture in &mut effect.textures {
            let Some(source) = texture.annotations.string("source") else {
                continue;
            };
            if source.is_empty() || texture.origin != TextureOrigin::Image {
                continue;
            }
            let Some(handle) = texture.handle else {
                continue;
            };
            let path = base.join(source);
            let uploaded = load_texture_source(&path, texture)
                .map_err(|err| err.to_string())
                .and_then(|data| {
                    let converted = convert_for_upload(texture.format, &data);
                    device
                        .update_texture(handle, &converted)
                        .map(|()| data.len())
                        .map_err(|err| err.to_string())
                });
            match uploaded {
                Ok(size) => texture.storage_size = size,
                Err(reason) => {
                    tracing::error!(texture = %texture.name, path = %path.display(), %reason, "unable to load texture source");
                    if !self.diagnostics.is_empty() {
                        self.diagnostics.push('\n');
                    }
                    self.diagnostics
                        .push_str(&format!("Unable to load source for texture '{}'!", texture.name));
                }
            }
        }
    }
}
