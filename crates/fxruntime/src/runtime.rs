use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, Timelike};
use fxconfig::RuntimeConfig;

use crate::depth::DepthSourceTracker;
use crate::device::{ClearFlags, GraphicsDevice, PrimitiveKind, SurfaceId, TextureFilter};
use crate::effect::{Effect, ToggleCause};
use crate::executor::{render_technique, FrameResources};
use crate::guard::DeviceStateGuard;
use crate::input::InputState;
use crate::lifecycle::{CompileStep, EffectLifecycle, TickContext};
use crate::pragma::EffectSettings;
use crate::screenshot::{self, Screenshot, ScreenshotError};
use crate::sources::{date_vector, write_timeleft, FrameSignals, UniformSources};
use crate::stats::{FrameStats, StatisticsReport, TechniqueStats, TextureStats};
use crate::toolchain::{standard_defines, EffectToolchain};

/// Snapshot of the clock supplied to the runtime once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    /// Time since the source was created or reset.
    pub elapsed: Duration,
    /// Local wall-clock time, used for `date` uniforms and scheduled toggles.
    pub local: NaiveDateTime,
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock and local time.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn sample(&mut self) -> TimeSample {
        TimeSample {
            elapsed: self.origin.elapsed(),
            local: Local::now().naive_local(),
        }
    }
}

/// Time source that advances by a fixed step on every sample.
#[derive(Debug, Clone, Copy)]
pub struct SteppedTimeSource {
    step: Duration,
    elapsed: Duration,
    start: NaiveDateTime,
}

impl SteppedTimeSource {
    /// `start` is the local time reported before the first step.
    pub fn new(step: Duration, start: NaiveDateTime) -> Self {
        Self {
            step,
            elapsed: Duration::ZERO,
            start,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }
}

impl TimeSource for SteppedTimeSource {
    fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    fn sample(&mut self) -> TimeSample {
        self.elapsed += self.step;
        let local = chrono::Duration::from_std(self.elapsed)
            .ok()
            .and_then(|offset| self.start.checked_add_signed(offset))
            .unwrap_or(self.start);
        TimeSample {
            elapsed: self.elapsed,
            local,
        }
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Post-processing runtime for one host device.
///
/// The host forwards its present, draw and depth-stencil calls; everything
/// else (effect reloads, depth source selection, uniform updates and pass
/// execution) happens inside [`Runtime::present`]. Call [`Runtime::reset`]
/// before dropping the runtime or losing the device, otherwise device
/// resources stay alive.
pub struct Runtime<D: GraphicsDevice, T: EffectToolchain> {
    device: D,
    toolchain: T,
    config: RuntimeConfig,
    application: String,
    clock: BoxedTimeSource,
    last_elapsed: Duration,
    lifecycle: EffectLifecycle<T::Tree>,
    effect: Option<Effect>,
    frame: Option<FrameResources>,
    depth: DepthSourceTracker,
    sources: UniformSources,
    input: InputState,
    stats: FrameStats,
}

impl<D: GraphicsDevice, T: EffectToolchain> Runtime<D, T> {
    pub fn new(device: D, toolchain: T, config: RuntimeConfig) -> Self {
        Self {
            device,
            toolchain,
            lifecycle: EffectLifecycle::new(config.clone()),
            depth: DepthSourceTracker::new(config.depth.clone()),
            sources: UniformSources::new(config.uniforms.seed),
            config,
            application: String::new(),
            clock: Box::new(SystemTimeSource::new()),
            last_elapsed: Duration::ZERO,
            effect: None,
            frame: None,
            input: InputState::new(),
            stats: FrameStats::default(),
        }
    }

    /// Replaces the clock; the next frame time is measured from zero.
    pub fn with_time_source(mut self, clock: BoxedTimeSource) -> Self {
        self.clock = clock;
        self.last_elapsed = Duration::ZERO;
        self
    }

    /// Host executable name, hashed into `__APPLICATION__`.
    pub fn with_application(mut self, name: impl Into<String>) -> Self {
        self.application = name.into();
        self
    }

    /// Creates per-device resources for `backbuffer` and schedules the
    /// first compile. Returns `false` when resource creation failed.
    pub fn init(&mut self, backbuffer: SurfaceId) -> bool {
        if self.frame.is_some() {
            self.reset();
        }
        let frame = match FrameResources::create(&mut self.device, backbuffer) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "failed to create runtime resources");
                return false;
            }
        };
        tracing::info!(
            width = frame.backbuffer_desc.width,
            height = frame.backbuffer_desc.height,
            format = ?frame.backbuffer_desc.format,
            resolve = frame.needs_resolve(),
            "runtime initialised"
        );
        self.depth.set_backbuffer(frame.backbuffer_desc);
        self.frame = Some(frame);
        self.lifecycle.request_reload(&mut self.device);
        true
    }

    /// Releases every device resource the runtime holds. The compile counter
    /// survives so pragma messages are not repeated.
    pub fn reset(&mut self) {
        self.lifecycle.reset(&mut self.device);
        if let Some(effect) = self.effect.take() {
            effect.release(&mut self.device);
        }
        self.depth.reset(&mut self.device);
        if let Some(frame) = self.frame.take() {
            frame.release(&mut self.device);
        }
        tracing::info!("runtime reset");
    }

    /// Forces the effect to be reloaded on the next frame.
    pub fn reload(&mut self) {
        self.lifecycle.request_reload(&mut self.device);
    }

    pub fn attach_watcher(&mut self, changes: crossbeam_channel::Receiver<std::path::PathBuf>) {
        self.lifecycle.attach_watcher(changes);
    }

    /// Runs one frame of post-processing on the host's back buffer.
    pub fn present(&mut self) {
        let Self {
            device,
            toolchain,
            config,
            application,
            clock,
            last_elapsed,
            lifecycle,
            effect,
            frame,
            depth,
            sources,
            input,
            stats,
        } = self;
        let Some(frame) = frame.as_ref() else {
            tracing::trace!("present before init");
            return;
        };

        let sample = clock.sample();
        let frame_time = sample.elapsed.saturating_sub(*last_elapsed);
        *last_elapsed = sample.elapsed;
        let now = sample.elapsed;

        if lifecycle.poll_changes() {
            lifecycle.request_reload(&mut *device);
        }

        let defines = if matches!(lifecycle.step(), CompileStep::FileChangePending) {
            standard_defines(
                &device.caps(),
                frame.backbuffer_desc.width,
                frame.backbuffer_desc.height,
                application.as_str(),
                sample.local.date(),
            )
        } else {
            Vec::new()
        };
        let ctx = TickContext {
            toolchain,
            device: &mut *device,
            environment: frame.build_environment(depth.texture()),
            defines,
            now,
        };
        if lifecycle.tick(ctx, effect) {
            if let Some(effect) = effect.as_mut() {
                effect.rebind_depth_textures(depth.texture());
            }
        }

        let network_traffic = stats.pending_network_bytes() > 0;
        match depth.update(&mut *device, network_traffic) {
            Ok(false) => {}
            Ok(true) => {
                if let Some(effect) = effect.as_mut() {
                    effect.rebind_depth_textures(depth.texture());
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "depth source selection failed");
                if let Some(effect) = effect.as_mut() {
                    effect.rebind_depth_textures(None);
                }
            }
        }

        if let Some(effect) = effect.as_mut() {
            let started = Instant::now();
            match device.begin_scene() {
                Ok(()) => {
                    let mut guard = DeviceStateGuard::new(&mut *device, frame.state_block);
                    let target: &mut dyn GraphicsDevice = &mut *guard;

                    if frame.needs_resolve() {
                        target.stretch_rect(frame.backbuffer, frame.resolved, TextureFilter::None);
                    }

                    let signals = FrameSignals {
                        frame_time,
                        frame_count: stats.frame_count,
                        timer: sample.elapsed,
                        local_time: sample.local,
                        input,
                    };
                    sources.update(effect, &signals);
                    target.set_stream_source(Some(frame.triangle));

                    let second_of_day = sample.local.num_seconds_from_midnight();
                    let frame_ms = i32::try_from(frame_time.as_millis()).unwrap_or(i32::MAX);
                    for index in 0..effect.techniques.len() {
                        let technique = &mut effect.techniques[index];
                        let cause = technique.update_toggle(input, second_of_day, frame_ms);
                        if cause == Some(ToggleCause::KeyPressed)
                            && lifecycle.settings().show_toggle_message
                        {
                            let state = if technique.enabled { "enabled" } else { "disabled" };
                            lifecycle.set_status(format!("{} {state}.", technique.name), now);
                        }
                        if let Some(cause) = cause {
                            tracing::debug!(technique = %technique.name, enabled = technique.enabled, ?cause, "technique toggled");
                        }
                        if !technique.enabled {
                            technique.last_duration = Duration::ZERO;
                            continue;
                        }
                        let timeleft = technique.timeleft;
                        write_timeleft(effect, timeleft);

                        let technique_started = Instant::now();
                        render_technique(target, frame, effect, index, stats);
                        effect.techniques[index].record_duration(
                            now,
                            technique_started.elapsed(),
                            config.techniques.duration_refresh,
                        );
                    }

                    target.set_render_target(0, Some(frame.resolved));
                    target.set_depth_stencil(Some(frame.default_depth));
                    target.clear(ClearFlags::DEPTH | ClearFlags::STENCIL, 0, 1.0, 0);
                    if frame.needs_resolve() {
                        target.stretch_rect(frame.resolved, frame.backbuffer, TextureFilter::None);
                    }
                    drop(guard);
                    device.end_scene();
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping post-processing, scene could not begin");
                }
            }
            stats.post_processing = started.elapsed();
        }

        stats.date = date_vector(&sample.local);
        stats.end_frame(frame_time);
        input.next_frame();
        lifecycle.expire_status(now, effect.is_some());
    }

    /// Host draw call, attributed to the bound depth candidate.
    pub fn on_draw(&mut self, kind: PrimitiveKind, primitive_count: u32) {
        self.stats.record_draw(kind.vertex_count(primitive_count));
        self.depth.on_draw(&self.device, kind, primitive_count);
    }

    /// Host binds `surface` as depth-stencil; the selected depth source is
    /// swapped for its replacement.
    pub fn on_set_depth_stencil(&mut self, surface: Option<SurfaceId>) {
        let bound = self.depth.on_set_depth_stencil(&mut self.device, surface);
        self.device.set_depth_stencil(bound);
    }

    /// Host queries its depth-stencil binding. The returned surface carries
    /// a reference the host must release.
    pub fn on_get_depth_stencil(&mut self) -> Option<SurfaceId> {
        let bound = self.device.depth_stencil();
        if let Some(surface) = bound {
            self.device.add_ref(surface);
        }
        self.depth.on_get_depth_stencil(&mut self.device, bound)
    }

    pub fn record_network_traffic(&mut self, bytes: u64) {
        self.stats.record_network(bytes);
    }

    pub fn key_down(&mut self, key: u8) {
        self.input.key_down(key);
    }

    pub fn key_up(&mut self, key: u8) {
        self.input.key_up(key);
    }

    /// Whether the screenshot key was pressed this frame. Only meaningful
    /// before [`Runtime::present`] clears the frame's presses.
    pub fn screenshot_requested(&self) -> bool {
        self.input.just_pressed(self.lifecycle.settings().screenshot_key)
    }

    /// Reads the back buffer as RGBA8.
    pub fn screenshot(&mut self) -> Result<Screenshot, ScreenshotError> {
        let frame = self.frame.as_ref().ok_or(ScreenshotError::NotInitialized)?;
        screenshot::capture(&mut self.device, frame.backbuffer)
    }

    pub fn statistics(&self) -> StatisticsReport {
        let (textures, techniques) = match &self.effect {
            Some(effect) => (
                effect
                    .textures
                    .iter()
                    .map(|texture| TextureStats {
                        name: texture.name.clone(),
                        width: texture.width,
                        height: texture.height,
                        levels: texture.levels,
                        storage_size: texture.storage_size,
                    })
                    .collect(),
                effect
                    .techniques
                    .iter()
                    .map(|technique| TechniqueStats {
                        name: technique.name.clone(),
                        enabled: technique.enabled,
                        passes: technique.passes.len(),
                        duration: technique.last_duration,
                    })
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        StatisticsReport {
            frame_count: self.stats.frame_count,
            draw_calls: self.stats.draw_calls,
            vertices: self.stats.vertices,
            frame_rate: self.stats.frame_rate.average(),
            date: self.stats.date,
            post_processing: self.stats.post_processing,
            network_bytes: self.stats.network_bytes,
            textures,
            techniques,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.frame.is_some()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn toolchain_mut(&mut self) -> &mut T {
        &mut self.toolchain
    }

    pub fn effect(&self) -> Option<&Effect> {
        self.effect.as_ref()
    }

    pub fn effect_mut(&mut self) -> Option<&mut Effect> {
        self.effect.as_mut()
    }

    pub fn frame_resources(&self) -> Option<&FrameResources> {
        self.frame.as_ref()
    }

    pub fn lifecycle(&self) -> &EffectLifecycle<T::Tree> {
        &self.lifecycle
    }

    pub fn depth(&self) -> &DepthSourceTracker {
        &self.depth
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn settings(&self) -> &EffectSettings {
        self.lifecycle.settings()
    }

    pub fn status(&self) -> &str {
        self.lifecycle.status()
    }

    pub fn diagnostics(&self) -> &str {
        self.lifecycle.diagnostics()
    }

    pub fn message(&self) -> &str {
        self.lifecycle.message()
    }
}
