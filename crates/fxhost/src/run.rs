use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Local;
use fxconfig::RuntimeConfig;
use fxruntime::device::headless::HeadlessDevice;
use fxruntime::device::SurfaceDesc;
use fxruntime::{GraphicsDevice, Runtime, SteppedTimeSource};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::manifest::ManifestToolchain;
use crate::paths::{screenshot_file_name, AppPaths};
use crate::snapshot;
use crate::trace::{HostTrace, TracePlayer};

const APPLICATION: &str = "fxhost";

pub fn initialise_tracing(verbose: bool) {
    let fallback = if verbose { "trace" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    if let Some(effect) = &cli.effect {
        config.effect.path = effect.clone();
    }
    if cli.seed.is_some() {
        config.uniforms.seed = cli.seed;
    }
    config.validate().context("invalid runtime configuration")?;
    tracing::debug!(
        effect = %config.effect.path.display(),
        fallback = ?config.effect.fallback,
        seed = ?config.uniforms.seed,
        "resolved runtime configuration"
    );

    let (width, height) = cli.size;
    let mut device = HeadlessDevice::new(HeadlessDevice::default_caps());
    let backbuffer = device.create_host_surface(SurfaceDesc {
        width,
        height,
        format: cli.format,
        samples: cli.samples,
    });
    device.set_render_target(0, Some(backbuffer));

    let mut player = match &cli.trace {
        Some(path) => Some(TracePlayer::new(HostTrace::load(path)?, &mut device)?),
        None => None,
    };

    let clock = SteppedTimeSource::new(cli.frame_time, Local::now().naive_local());
    let mut runtime = Runtime::new(device, ManifestToolchain::new(), config)
        .with_application(APPLICATION)
        .with_time_source(Box::new(clock));
    if !runtime.init(backbuffer) {
        bail!("failed to initialise the effect runtime for a {width}x{height} back buffer");
    }

    for frame in 0..cli.frames as usize {
        runtime.device_mut().fill_surface(backbuffer, cli.clear_color);
        if let Some(player) = player.as_mut() {
            player.apply(frame, &mut runtime)?;
        }
        if runtime.screenshot_requested() {
            capture_requested(&mut runtime)?;
        }
        runtime.present();
    }
    tracing::info!(frames = cli.frames, compiles = runtime.lifecycle().compile_count(), "finished");

    if !runtime.status().is_empty() {
        println!("{}", runtime.status());
    }
    if !runtime.diagnostics().is_empty() {
        println!("{}", runtime.diagnostics());
    }
    if !runtime.message().is_empty() {
        println!("{}", runtime.message());
    }
    if cli.statistics {
        print!("{}", runtime.statistics());
    }

    let result = match &cli.screenshot {
        Some(path) => write_screenshot(&mut runtime, path),
        None => Ok(()),
    };
    runtime.reset();
    result
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    if let Some(path) = &cli.config {
        return RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let paths = AppPaths::discover()?;
    let path = paths.config_file();
    if path.is_file() {
        tracing::debug!(config = %path.display(), "using user configuration");
        return RuntimeConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    Ok(RuntimeConfig::default())
}

fn capture_requested(runtime: &mut Runtime<HeadlessDevice, ManifestToolchain>) -> Result<()> {
    let settings = runtime.settings();
    let format = settings.screenshot_format;
    let directory = match &settings.screenshot_location {
        Some(location) => location.clone(),
        None => env::current_dir().context("failed to resolve the working directory")?,
    };
    let name = screenshot_file_name(APPLICATION, Local::now().naive_local(), format.extension());
    let path = directory.join(name);
    match runtime.screenshot() {
        Ok(screenshot) => snapshot::save(&screenshot, &path, format),
        Err(err) => {
            tracing::warn!(error = %err, "screenshot failed");
            Ok(())
        }
    }
}

fn write_screenshot(
    runtime: &mut Runtime<HeadlessDevice, ManifestToolchain>,
    path: &Path,
) -> Result<()> {
    let format = snapshot::format_for(path, runtime.settings().screenshot_format);
    let screenshot = runtime.screenshot().context("failed to capture the back buffer")?;
    snapshot::save(&screenshot, path, format)
}
