//! Host traces: a scripted sequence of the calls a game would make between
//! presents, replayed against the runtime's hooks.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fxruntime::device::headless::HeadlessDevice;
use fxruntime::device::{Format, PrimitiveKind, SurfaceDesc, SurfaceId};
use fxruntime::{EffectToolchain, GraphicsDevice, Runtime};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HostTrace {
    /// Depth-stencil surfaces the host owns, created before the first frame.
    #[serde(default)]
    pub surfaces: Vec<SurfaceSpec>,
    #[serde(default)]
    pub frames: Vec<TraceFrame>,
    /// Loop the frame list instead of going quiet once it runs out.
    #[serde(default)]
    pub repeat: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SurfaceSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_depth_format")]
    pub format: String,
    #[serde(default)]
    pub samples: u32,
}

fn default_depth_format() -> String {
    "d24s8".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TraceFrame {
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    BindDepth {
        surface: String,
    },
    UnbindDepth,
    Draw {
        #[serde(default)]
        kind: DrawKind,
        primitives: u32,
    },
    KeyDown {
        key: u8,
    },
    KeyUp {
        key: u8,
    },
    Network {
        bytes: u64,
    },
    /// The host drops its reference to a surface.
    ReleaseDepth {
        surface: String,
    },
    Reload,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DrawKind {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl From<DrawKind> for PrimitiveKind {
    fn from(kind: DrawKind) -> Self {
        match kind {
            DrawKind::PointList => PrimitiveKind::PointList,
            DrawKind::LineList => PrimitiveKind::LineList,
            DrawKind::LineStrip => PrimitiveKind::LineStrip,
            DrawKind::TriangleList => PrimitiveKind::TriangleList,
            DrawKind::TriangleStrip => PrimitiveKind::TriangleStrip,
            DrawKind::TriangleFan => PrimitiveKind::TriangleFan,
        }
    }
}

pub fn parse_depth_format(value: &str) -> Option<Format> {
    let format = match value.trim().to_ascii_lowercase().as_str() {
        "d16" => Format::D16,
        "d24s8" => Format::D24S8,
        "d24x8" => Format::D24X8,
        "d32" => Format::D32,
        "intz" => Format::Intz,
        _ => return None,
    };
    Some(format)
}

impl HostTrace {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let trace: HostTrace = serde_json::from_str(input).context("failed to parse host trace")?;
        let issues = trace.validate();
        if !issues.is_empty() {
            bail!("invalid host trace:\n  {}", issues.join("\n  "));
        }
        Ok(trace)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let input = fs::read_to_string(path)
            .with_context(|| format!("failed to read host trace {}", path.display()))?;
        Self::from_json_str(&input).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut names = Vec::new();
        for surface in &self.surfaces {
            if names.contains(&surface.name.as_str()) {
                issues.push(format!("surface '{}' declared twice", surface.name));
            }
            names.push(surface.name.as_str());
            if parse_depth_format(&surface.format).is_none() {
                issues.push(format!(
                    "surface '{}' has unsupported depth format '{}'",
                    surface.name, surface.format
                ));
            }
            if surface.width == 0 || surface.height == 0 {
                issues.push(format!("surface '{}' must have a non-zero size", surface.name));
            }
        }
        for (index, frame) in self.frames.iter().enumerate() {
            for event in &frame.events {
                let surface = match event {
                    TraceEvent::BindDepth { surface } | TraceEvent::ReleaseDepth { surface } => surface,
                    _ => continue,
                };
                if !names.contains(&surface.as_str()) {
                    issues.push(format!("frame {index} references unknown surface '{surface}'"));
                }
            }
        }
        issues
    }

    pub fn frame(&self, index: usize) -> &[TraceEvent] {
        let frame = if self.repeat && !self.frames.is_empty() {
            self.frames.get(index % self.frames.len())
        } else {
            self.frames.get(index)
        };
        frame.map(|frame| frame.events.as_slice()).unwrap_or(&[])
    }
}

/// Replays a [`HostTrace`], owning the host surfaces it declares.
#[derive(Debug)]
pub struct TracePlayer {
    trace: HostTrace,
    surfaces: HashMap<String, SurfaceId>,
}

impl TracePlayer {
    pub fn new(trace: HostTrace, device: &mut HeadlessDevice) -> Result<Self> {
        let mut surfaces = HashMap::new();
        for spec in &trace.surfaces {
            let format = parse_depth_format(&spec.format)
                .with_context(|| format!("unsupported depth format '{}'", spec.format))?;
            let surface = device.create_host_surface(SurfaceDesc {
                width: spec.width,
                height: spec.height,
                format,
                samples: spec.samples,
            });
            tracing::debug!(name = %spec.name, width = spec.width, height = spec.height, "created host depth surface");
            surfaces.insert(spec.name.clone(), surface);
        }
        Ok(Self { trace, surfaces })
    }

    pub fn surface(&self, name: &str) -> Option<SurfaceId> {
        self.surfaces.get(name).copied()
    }

    /// Forwards the events scripted for `frame` to the runtime's hooks.
    pub fn apply<T: EffectToolchain>(
        &mut self,
        frame: usize,
        runtime: &mut Runtime<HeadlessDevice, T>,
    ) -> Result<()> {
        for event in self.trace.frame(frame).to_vec() {
            match event {
                TraceEvent::BindDepth { surface } => {
                    let id = self
                        .surface(&surface)
                        .with_context(|| format!("surface '{surface}' was already released"))?;
                    runtime.on_set_depth_stencil(Some(id));
                }
                TraceEvent::UnbindDepth => runtime.on_set_depth_stencil(None),
                TraceEvent::Draw { kind, primitives } => runtime.on_draw(kind.into(), primitives),
                TraceEvent::KeyDown { key } => runtime.key_down(key),
                TraceEvent::KeyUp { key } => runtime.key_up(key),
                TraceEvent::Network { bytes } => runtime.record_network_traffic(bytes),
                TraceEvent::ReleaseDepth { surface } => {
                    if let Some(id) = self.surfaces.remove(&surface) {
                        let remaining = runtime.device_mut().release(id);
                        tracing::debug!(name = %surface, remaining, "host released depth surface");
                    }
                }
                TraceEvent::Reload => runtime.reload(),
            }
        }
        Ok(())
    }
}
