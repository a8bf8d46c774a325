//! Seam to the effect language frontend and backend.
//!
//! The runtime never looks inside effect source: it asks the toolchain to
//! preprocess, parse and compile, and the toolchain describes the resulting
//! effect through an [`EffectBuilder`].

use std::path::PathBuf;

use chrono::{Datelike, NaiveDate};

use crate::device::DeviceCaps;
use crate::effect::{CompileError, EffectBuilder};

/// Device identifier the `__RENDERER__` define reports.
pub const RENDERER_ID: u32 = 0x9300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessRequest {
    pub path: PathBuf,
    pub include_paths: Vec<PathBuf>,
    pub defines: Vec<(String, String)>,
}

/// Preprocessor output. An empty `output` means preprocessing failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    pub output: String,
    pub errors: String,
    pub pragmas: Vec<String>,
    /// The effect file and every file it transitively included.
    pub included_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub skip_optimization: bool,
}

pub trait EffectToolchain {
    type Tree;

    fn preprocess(&mut self, request: &PreprocessRequest) -> Preprocessed;
    fn parse(&mut self, source: &str) -> Result<Self::Tree, String>;
    /// Lowers `tree` into device resources through `builder`.
    fn compile(
        &mut self,
        tree: &Self::Tree,
        options: &CompileOptions,
        builder: &mut EffectBuilder<'_>,
    ) -> Result<(), CompileError>;
}

/// 32-bit FNV-1a, used to give the host application a stable identifier.
pub fn application_hash(name: &str) -> u32 {
    name.bytes().fold(0x811C_9DC5u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Macros every effect sees.
pub fn standard_defines(
    caps: &DeviceCaps,
    width: u32,
    height: u32,
    application: &str,
    date: NaiveDate,
) -> Vec<(String, String)> {
    let version = env!("CARGO_PKG_VERSION_MAJOR").parse::<u32>().unwrap_or(0) * 10000
        + env!("CARGO_PKG_VERSION_MINOR").parse::<u32>().unwrap_or(0) * 100
        + env!("CARGO_PKG_VERSION_PATCH").parse::<u32>().unwrap_or(0);
    [
        ("__RESHADE__", version.to_string()),
        ("__VENDOR__", format!("0x{:X}", caps.vendor_id)),
        ("__DEVICE__", format!("0x{:X}", caps.device_id)),
        ("__RENDERER__", format!("0x{RENDERER_ID:X}")),
        (
            "__APPLICATION__",
            format!("0x{:X}", application_hash(application)),
        ),
        ("__DATE_YEAR__", date.year().to_string()),
        ("__DATE_MONTH__", date.month().to_string()),
        ("__DATE_DAY__", date.day().to_string()),
        ("BUFFER_WIDTH", width.to_string()),
        ("BUFFER_HEIGHT", height.to_string()),
        ("BUFFER_RCP_WIDTH", "(1.0 / BUFFER_WIDTH)".to_string()),
        ("BUFFER_RCP_HEIGHT", "(1.0 / BUFFER_HEIGHT)".to_string()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}
