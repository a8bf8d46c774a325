//! JSON effect manifests and the toolchain that compiles them.
//!
//! A manifest stands in for effect source: it declares textures, uniforms
//! and techniques directly, may pull in further manifests through
//! `includes`, and carries the `#pragma` lines the preprocessor would have
//! collected. Includes are resolved against the effect directory and merged
//! ahead of the including file's own declarations.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use fxruntime::device::{AddressMode, SamplerState, TextureFilter, MAX_RENDER_TARGETS};
use fxruntime::effect::{
    AnnotationValue, Annotations, CompileError, EffectBuilder, Pass, PixelFormat, SamplerBinding,
    Technique, TextureDecl, TextureOrigin, UniformDecl,
};
use fxruntime::storage::BaseType;
use fxruntime::toolchain::CompileOptions;
use fxruntime::{EffectToolchain, PreprocessRequest, Preprocessed};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EffectManifest {
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub pragmas: Vec<String>,
    /// Macros the preprocessor defined; filled in by preprocessing.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub textures: Vec<TextureSpec>,
    #[serde(default)]
    pub uniforms: Vec<UniformSpec>,
    #[serde(default)]
    pub techniques: Vec<TechniqueSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TextureSpec {
    pub name: String,
    /// 0 means the back buffer width.
    #[serde(default)]
    pub width: u32,
    /// 0 means the back buffer height.
    #[serde(default)]
    pub height: u32,
    #[serde(default = "default_levels")]
    pub levels: u32,
    #[serde(default = "default_texture_format")]
    pub format: String,
    #[serde(default)]
    pub origin: OriginSpec,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
}

fn default_levels() -> u32 {
    1
}

fn default_texture_format() -> String {
    "rgba8".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OriginSpec {
    #[default]
    Image,
    Color,
    Depth,
}

impl From<OriginSpec> for TextureOrigin {
    fn from(origin: OriginSpec) -> Self {
        match origin {
            OriginSpec::Image => TextureOrigin::Image,
            OriginSpec::Color => TextureOrigin::ColorBuffer,
            OriginSpec::Depth => TextureOrigin::DepthBuffer,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UniformSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ScalarSpec,
    #[serde(default = "default_one")]
    pub rows: u32,
    #[serde(default = "default_one")]
    pub columns: u32,
    #[serde(default = "default_one")]
    pub elements: u32,
    #[serde(default)]
    pub initial: Vec<f64>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScalarSpec {
    Bool,
    Int,
    Uint,
    Float,
}

impl From<ScalarSpec> for BaseType {
    fn from(kind: ScalarSpec) -> Self {
        match kind {
            ScalarSpec::Bool => BaseType::Bool,
            ScalarSpec::Int => BaseType::Int,
            ScalarSpec::Uint => BaseType::Uint,
            ScalarSpec::Float => BaseType::Float,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TechniqueSpec {
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    #[serde(default)]
    pub passes: Vec<PassSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct PassSpec {
    #[serde(default)]
    pub samplers: Vec<SamplerSpec>,
    /// Texture names bound to render target slots in order; empty slot 0
    /// renders to the back buffer.
    #[serde(default)]
    pub render_targets: Vec<String>,
    /// Render states the pass sets, keyed by state number.
    #[serde(default)]
    pub render_states: BTreeMap<u32, u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SamplerSpec {
    pub texture: String,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default)]
    pub address: AddressSpec,
    #[serde(default)]
    pub srgb: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterSpec {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpec {
    Wrap,
    Mirror,
    #[default]
    Clamp,
    Border,
}

impl SamplerSpec {
    fn state(&self) -> SamplerState {
        let filter = match self.filter {
            FilterSpec::Point => TextureFilter::Point,
            FilterSpec::Linear => TextureFilter::Linear,
            FilterSpec::Anisotropic => TextureFilter::Anisotropic,
        };
        let address = match self.address {
            AddressSpec::Wrap => AddressMode::Wrap,
            AddressSpec::Mirror => AddressMode::Mirror,
            AddressSpec::Clamp => AddressMode::Clamp,
            AddressSpec::Border => AddressMode::Border,
        };
        SamplerState {
            address_u: address,
            address_v: address,
            address_w: address,
            mag_filter: filter,
            min_filter: filter,
            mip_filter: filter,
            srgb: self.srgb,
            ..SamplerState::default()
        }
    }
}

impl EffectManifest {
    /// Returns human-readable issues; an empty list means the manifest can
    /// be compiled.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let textures: BTreeSet<&str> = self.textures.iter().map(|t| t.name.as_str()).collect();
        let mut techniques = BTreeSet::new();
        for technique in &self.techniques {
            if !techniques.insert(technique.name.as_str()) {
                issues.push(format!("technique '{}' declared twice", technique.name));
            }
            for (index, pass) in technique.passes.iter().enumerate() {
                if pass.render_targets.len() > MAX_RENDER_TARGETS {
                    issues.push(format!(
                        "technique '{}' pass {index} binds {} render targets (maximum {MAX_RENDER_TARGETS})",
                        technique.name,
                        pass.render_targets.len()
                    ));
                }
                let names = pass
                    .samplers
                    .iter()
                    .map(|s| &s.texture)
                    .chain(pass.render_targets.iter().filter(|name| !name.is_empty()));
                for name in names {
                    if !textures.contains(name.as_str()) {
                        issues.push(format!(
                            "technique '{}' pass {index} references undeclared texture '{name}'",
                            technique.name
                        ));
                    }
                }
            }
        }
        issues
    }

    fn merge(&mut self, included: EffectManifest) {
        self.pragmas.splice(0..0, included.pragmas);
        self.textures.splice(0..0, included.textures);
        self.uniforms.splice(0..0, included.uniforms);
        self.techniques.splice(0..0, included.techniques);
    }
}

/// Converts a JSON annotation value; arrays take the type of their elements.
pub fn annotation_value(value: &Value) -> Option<AnnotationValue> {
    match value {
        Value::Bool(flag) => Some(AnnotationValue::Bool(vec![*flag])),
        Value::Number(_) => annotation_value(&Value::Array(vec![value.clone()])),
        Value::String(text) => Some(AnnotationValue::String(text.clone())),
        Value::Array(items) if !items.is_empty() => {
            if let Some(flags) = items.iter().map(Value::as_bool).collect::<Option<Vec<_>>>() {
                return Some(AnnotationValue::Bool(flags));
            }
            let ints = items
                .iter()
                .map(|item| item.as_i64().and_then(|v| i32::try_from(v).ok()))
                .collect::<Option<Vec<_>>>();
            if let Some(ints) = ints {
                return Some(AnnotationValue::Int(ints));
            }
            let uints = items
                .iter()
                .map(|item| item.as_u64().and_then(|v| u32::try_from(v).ok()))
                .collect::<Option<Vec<_>>>();
            if let Some(uints) = uints {
                return Some(AnnotationValue::Uint(uints));
            }
            items
                .iter()
                .map(|item| item.as_f64().map(|v| v as f32))
                .collect::<Option<Vec<_>>>()
                .map(AnnotationValue::Float)
        }
        _ => None,
    }
}

fn annotations(
    builder: &mut EffectBuilder<'_>,
    owner: &str,
    values: &BTreeMap<String, Value>,
) -> Annotations {
    let mut annotations = Annotations::new();
    for (name, value) in values {
        match annotation_value(value) {
            Some(value) => annotations.insert(name.clone(), value),
            None => builder.warning(format!("ignoring annotation '{name}' on '{owner}'")),
        }
    }
    annotations
}

fn resolve_include(include: &Path, base: &Path, include_paths: &[PathBuf]) -> Option<PathBuf> {
    if include.is_absolute() {
        return include.is_file().then(|| include.to_path_buf());
    }
    std::iter::once(base)
        .chain(include_paths.iter().map(PathBuf::as_path))
        .map(|dir| dir.join(include))
        .find(|candidate| candidate.is_file())
}

/// Toolchain compiling JSON effect manifests.
#[derive(Debug, Default)]
pub struct ManifestToolchain;

impl ManifestToolchain {
    pub fn new() -> Self {
        Self
    }

    fn load(
        &self,
        path: &Path,
        include_paths: &[PathBuf],
        stack: &mut Vec<PathBuf>,
        visited: &mut Vec<PathBuf>,
        errors: &mut Vec<String>,
    ) -> Option<EffectManifest> {
        if stack.iter().any(|open| open == path) {
            errors.push(format!("{}: error: recursive include", path.display()));
            return None;
        }
        // Each file contributes its declarations once.
        if visited.iter().any(|seen| seen == path) {
            return None;
        }
        visited.push(path.to_path_buf());

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                errors.push(format!("{}: error: {err}", path.display()));
                return None;
            }
        };
        let mut manifest: EffectManifest = match serde_json::from_str(&text) {
            Ok(manifest) => manifest,
            Err(err) => {
                errors.push(format!(
                    "{}({},{}): error: {err}",
                    path.display(),
                    err.line(),
                    err.column()
                ));
                return None;
            }
        };

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for include in std::mem::take(&mut manifest.includes).into_iter().rev() {
            let Some(resolved) = resolve_include(&include, base, include_paths) else {
                errors.push(format!(
                    "{}: error: cannot open include file '{}'",
                    path.display(),
                    include.display()
                ));
                continue;
            };
            stack.push(path.to_path_buf());
            let included = self.load(&resolved, include_paths, stack, visited, errors);
            stack.pop();
            if let Some(included) = included {
                manifest.merge(included);
            }
        }
        Some(manifest)
    }
}

impl EffectToolchain for ManifestToolchain {
    type Tree = EffectManifest;

    fn preprocess(&mut self, request: &PreprocessRequest) -> Preprocessed {
        let mut visited = Vec::new();
        let mut errors = Vec::new();
        let manifest = self.load(
            &request.path,
            &request.include_paths,
            &mut Vec::new(),
            &mut visited,
            &mut errors,
        );

        let mut preprocessed = Preprocessed {
            included_files: visited,
            errors: errors.join("\n"),
            ..Preprocessed::default()
        };
        let Some(mut manifest) = manifest.filter(|_| errors.is_empty()) else {
            return preprocessed;
        };
        manifest.defines = request.defines.iter().cloned().collect();
        preprocessed.pragmas = manifest.pragmas.clone();
        match serde_json::to_string_pretty(&manifest) {
            Ok(output) => preprocessed.output = output,
            Err(err) => preprocessed.errors = format!("{}: error: {err}", request.path.display()),
        }
        preprocessed
    }

    fn parse(&mut self, source: &str) -> Result<EffectManifest, String> {
        let manifest: EffectManifest = serde_json::from_str(source)
            .map_err(|err| format!("({},{}): error: {err}", err.line(), err.column()))?;
        let issues = manifest.validate();
        if issues.is_empty() {
            Ok(manifest)
        } else {
            Err(issues.join("\n"))
        }
    }

    fn compile(
        &mut self,
        tree: &EffectManifest,
        options: &CompileOptions,
        builder: &mut EffectBuilder<'_>,
    ) -> Result<(), CompileError> {
        if options.skip_optimization {
            tracing::debug!("compiling without optimisation");
        }
        let environment = *builder.environment();

        for spec in &tree.textures {
            let format = PixelFormat::parse(&spec.format).ok_or_else(|| {
                CompileError::Invalid(format!(
                    "texture '{}' has unknown format '{}'",
                    spec.name, spec.format
                ))
            })?;
            let annotations = annotations(builder, &spec.name, &spec.annotations);
            builder.add_texture(TextureDecl {
                name: spec.name.clone(),
                width: if spec.width == 0 { environment.width } else { spec.width },
                height: if spec.height == 0 { environment.height } else { spec.height },
                levels: spec.levels,
                format,
                origin: spec.origin.into(),
                annotations,
            })?;
        }

        for spec in &tree.uniforms {
            let annotations = annotations(builder, &spec.name, &spec.annotations);
            let index = builder.add_uniform(UniformDecl {
                name: spec.name.clone(),
                base: spec.kind.into(),
                rows: spec.rows,
                columns: spec.columns,
                elements: spec.elements,
                annotations,
            })?;
            if spec.initial.is_empty() {
                continue;
            }
            match spec.kind {
                ScalarSpec::Bool => {
                    let values: Vec<bool> = spec.initial.iter().map(|v| *v != 0.0).collect();
                    builder.initialize_uniform(index, &values);
                }
                ScalarSpec::Int => {
                    let values: Vec<i32> = spec.initial.iter().map(|v| *v as i32).collect();
                    builder.initialize_uniform(index, &values);
                }
                ScalarSpec::Uint => {
                    let values: Vec<u32> = spec.initial.iter().map(|v| *v as u32).collect();
                    builder.initialize_uniform(index, &values);
                }
                ScalarSpec::Float => {
                    let values: Vec<f32> = spec.initial.iter().map(|v| *v as f32).collect();
                    builder.initialize_uniform(index, &values);
                }
            }
        }

        for spec in &tree.techniques {
            let mut technique = Technique::new(spec.name.clone());
            technique.annotations = annotations(builder, &spec.name, &spec.annotations);
            for pass_spec in &spec.passes {
                let render_states: Vec<(u32, u32)> = pass_spec
                    .render_states
                    .iter()
                    .map(|(state, value)| (*state, *value))
                    .collect();
                let mut pass = Pass::new(builder.record_pass_state(&render_states)?);
                for sampler in &pass_spec.samplers {
                    let texture = builder.texture_index(&sampler.texture).ok_or_else(|| {
                        CompileError::Invalid(format!("unknown texture '{}'", sampler.texture))
                    })?;
                    pass.samplers.push(SamplerBinding {
                        texture,
                        state: sampler.state(),
                    });
                }
                for (slot, name) in pass_spec.render_targets.iter().enumerate().take(MAX_RENDER_TARGETS) {
                    if name.is_empty() {
                        continue;
                    }
                    let index = builder.texture_index(name).ok_or_else(|| {
                        CompileError::Invalid(format!("unknown render target '{name}'"))
                    })?;
                    if builder.texture(index).map(|t| t.origin) != Some(TextureOrigin::Image) {
                        return Err(CompileError::Invalid(format!(
                            "texture '{name}' mirrors a frame buffer and cannot be rendered to"
                        )));
                    }
                    let surface = builder.texture_surface(index, 0).ok_or_else(|| {
                        CompileError::Invalid(format!("texture '{name}' has no surface"))
                    })?;
                    pass.render_targets[slot] = Some(surface);
                }
                technique.passes.push(pass);
            }
            builder.add_technique(technique);
        }
        Ok(())
    }
}
