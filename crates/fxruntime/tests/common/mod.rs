#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use fxconfig::RuntimeConfig;
use fxruntime::device::headless::HeadlessDevice;
use fxruntime::device::{Format, SurfaceDesc, SurfaceId};
use fxruntime::effect::{AnnotationValue, Annotations, CompileError, EffectBuilder, Pass, Technique};
use fxruntime::toolchain::CompileOptions;
use fxruntime::{
    EffectToolchain, GraphicsDevice, PreprocessRequest, Preprocessed, Runtime, SteppedTimeSource,
};
use tempfile::TempDir;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 32;
pub const FRAME_STEP: Duration = Duration::from_millis(100);

pub type BuildFn = Box<dyn FnMut(&mut EffectBuilder<'_>) -> Result<(), CompileError>>;

/// Toolchain whose "source" is the raw effect file and whose compile step
/// is a closure describing the effect.
pub struct ScriptedToolchain {
    build: BuildFn,
    pub compiles: usize,
}

impl ScriptedToolchain {
    pub fn new(build: impl FnMut(&mut EffectBuilder<'_>) -> Result<(), CompileError> + 'static) -> Self {
        Self {
            build: Box::new(build),
            compiles: 0,
        }
    }
}

impl EffectToolchain for ScriptedToolchain {
    type Tree = String;

    fn preprocess(&mut self, request: &PreprocessRequest) -> Preprocessed {
        let source = fs::read_to_string(&request.path).unwrap_or_default();
        let pragmas = source
            .lines()
            .filter_map(|line| line.trim().strip_prefix("#pragma "))
            .map(str::to_string)
            .collect();
        let errors = if source.is_empty() {
            format!("{}: error: empty effect", request.path.display())
        } else {
            String::new()
        };
        Preprocessed {
            output: source,
            errors,
            pragmas,
            included_files: vec![request.path.clone()],
        }
    }

    fn parse(&mut self, source: &str) -> Result<String, String> {
        if source.contains("syntax error") {
            return Err("1:1: syntax error".to_string());
        }
        Ok(source.to_string())
    }

    fn compile(
        &mut self,
        _tree: &String,
        _options: &CompileOptions,
        builder: &mut EffectBuilder<'_>,
    ) -> Result<(), CompileError> {
        self.compiles += 1;
        (self.build)(builder)
    }
}

/// Single-pass technique rendering to the back buffer.
pub fn technique(
    builder: &mut EffectBuilder<'_>,
    name: &str,
    annotations: Annotations,
) -> Result<usize, CompileError> {
    let block = builder.record_pass_state(&[])?;
    let mut technique = Technique::new(name);
    technique.passes.push(Pass::new(block));
    technique.annotations = annotations;
    Ok(builder.add_technique(technique))
}

pub fn enabled() -> Annotations {
    Annotations::new().with("enabled", AnnotationValue::Bool(vec![true]))
}

pub fn source(name: &str) -> Annotations {
    Annotations::new().with("source", AnnotationValue::String(name.into()))
}

pub fn start_time() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .and_then(|date| date.and_hms_opt(12, 0, 0))
        .unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub effect_path: PathBuf,
    pub backbuffer: SurfaceId,
    pub runtime: Runtime<HeadlessDevice, ScriptedToolchain>,
}

impl Harness {
    pub fn new(contents: &str, toolchain: ScriptedToolchain) -> Self {
        Self::with_config(contents, toolchain, |_| {})
    }

    pub fn with_config(
        contents: &str,
        toolchain: ScriptedToolchain,
        configure: impl FnOnce(&mut RuntimeConfig),
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let effect_path = dir.path().join("ReShade.fx");
        fs::write(&effect_path, contents).unwrap();

        let mut config = RuntimeConfig::default();
        config.effect.path = effect_path.clone();
        config.uniforms.seed = Some(7);
        configure(&mut config);

        let mut device = HeadlessDevice::new(HeadlessDevice::default_caps());
        let backbuffer = device.create_host_surface(SurfaceDesc {
            width: WIDTH,
            height: HEIGHT,
            format: Format::X8R8G8B8,
            samples: 0,
        });
        device.set_render_target(0, Some(backbuffer));

        let runtime = Runtime::new(device, toolchain, config)
            .with_application("game.exe")
            .with_time_source(Box::new(SteppedTimeSource::new(FRAME_STEP, start_time())));
        Self {
            dir,
            effect_path,
            backbuffer,
            runtime,
        }
    }

    /// Initialises the runtime and presents until the lifecycle is idle.
    pub fn start(&mut self) {
        assert!(self.runtime.init(self.backbuffer));
        self.settle();
    }

    pub fn settle(&mut self) {
        for _ in 0..8 {
            self.runtime.present();
            if self.runtime.lifecycle().is_idle() {
                return;
            }
        }
        panic!("lifecycle did not settle");
    }

    pub fn frames(&mut self, count: usize) {
        for _ in 0..count {
            self.runtime.present();
        }
    }

    pub fn rewrite(&self, contents: &str) {
        fs::write(&self.effect_path, contents).unwrap();
    }
}
