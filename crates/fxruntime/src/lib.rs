//! Effect execution core of a Direct3D 9 post-processing layer.
//!
//! The host hooks its device and forwards present, draw and depth-stencil
//! calls to a [`Runtime`]. Each present advances the effect reload state
//! machine by one step, refreshes the scene depth source, updates
//! runtime-driven uniforms and executes every enabled technique against the
//! back buffer, restoring the host's device state afterwards:
//!
//! ```text
//!   host present()
//!        │
//!        ▼
//!   Runtime::present ──▶ EffectLifecycle::tick ──▶ EffectToolchain (preprocess/parse/compile)
//!        │          └──▶ DepthSourceTracker::update
//!        ▼
//!   DeviceStateGuard ──▶ UniformSources::update ──▶ render_technique() per pass ──▶ GraphicsDevice
//! ```
//!
//! Everything that touches the GPU goes through [`GraphicsDevice`];
//! [`device::headless::HeadlessDevice`] is an in-memory implementation used by
//! tests and the command line harness.

pub mod depth;
pub mod device;
pub mod effect;
pub mod executor;
pub mod guard;
pub mod input;
pub mod lifecycle;
pub mod pragma;
pub mod runtime;
pub mod screenshot;
pub mod sources;
pub mod stats;
pub mod storage;
pub mod toolchain;
pub mod upload;

pub use depth::{DepthError, DepthSourceTracker};
pub use device::{GraphicsDevice, SurfaceId, TextureId};
pub use effect::{CompileError, Effect, EffectBuilder};
pub use input::keys;
pub use lifecycle::{CompileStep, EffectLifecycle};
pub use runtime::{
    BoxedTimeSource, Runtime, SteppedTimeSource, SystemTimeSource, TimeSample, TimeSource,
};
pub use screenshot::{Screenshot, ScreenshotError};
pub use stats::StatisticsReport;
pub use toolchain::{EffectToolchain, PreprocessRequest, Preprocessed};
