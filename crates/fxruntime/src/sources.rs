//! Runtime-driven uniform values selected by the `source` annotation.

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::effect::{Effect, Uniform};
use crate::input::InputState;
use crate::storage::{BaseType, ConstantStorage};

/// Float counters wrap here to stay exactly representable.
const FLOAT_WRAP: f64 = 16_777_216.0;
/// Smallest pingpong speed, in units per second.
const PINGPONG_MIN_INCREMENT: f32 = 0.05;

/// Per-frame signals the sources read from.
#[derive(Debug, Clone, Copy)]
pub struct FrameSignals<'a> {
    pub frame_time: Duration,
    pub frame_count: u64,
    /// Time since the runtime started.
    pub timer: Duration,
    pub local_time: NaiveDateTime,
    pub input: &'a InputState,
}

/// Year, month, day and seconds since midnight.
pub fn date_vector(local: &NaiveDateTime) -> [f32; 4] {
    [
        local.year() as f32,
        local.month() as f32,
        local.day() as f32,
        local.num_seconds_from_midnight() as f32,
    ]
}

/// Updates every uniform whose `source` the runtime understands.
#[derive(Debug)]
pub struct UniformSources {
    rng: StdRng,
}

impl UniformSources {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Runs once per frame before any technique executes.
    pub fn update(&mut self, effect: &mut Effect, signals: &FrameSignals<'_>) {
        let Effect {
            uniforms, storage, ..
        } = effect;
        for uniform in uniforms.iter() {
            let Some(source) = uniform.source() else {
                continue;
            };
            match source {
                "frametime" => {
                    let ms = signals.frame_time.as_secs_f64() * 1000.0;
                    storage.set(&uniform.layout, &[ms as f32]);
                }
                "framecount" | "framecounter" => {
                    write_counter(storage, uniform, signals.frame_count, 1.0);
                }
                "pingpong" => self.update_pingpong(storage, uniform, signals.frame_time),
                "date" => {
                    storage.set(&uniform.layout, &date_vector(&signals.local_time));
                }
                "timer" => {
                    let nanos = u64::try_from(signals.timer.as_nanos()).unwrap_or(u64::MAX);
                    write_counter(storage, uniform, nanos, 1e-6);
                }
                "key" => update_key(storage, uniform, signals.input),
                "random" => {
                    let mut min = uniform.annotations.int("min");
                    let mut max = uniform.annotations.int("max");
                    if max < min {
                        std::mem::swap(&mut min, &mut max);
                    }
                    let value = self.rng.gen_range(min..=max);
                    storage.set(&uniform.layout, &[value]);
                }
                "timeleft" => {}
                other => {
                    tracing::trace!(uniform = %uniform.name, source = other, "unknown uniform source");
                }
            }
        }
    }

    fn update_pingpong(&mut self, storage: &mut ConstantStorage, uniform: &Uniform, frame_time: Duration) {
        let mut value = [0.0f32; 2];
        storage.get(&uniform.layout, &mut value);

        let annotations = &uniform.annotations;
        let min = annotations.float("min");
        let max = annotations.float("max");
        let step_min = annotations.float_at("step", 0);
        let step_max = annotations.float_at("step", 1);
        let smoothing = annotations.float("smoothing");
        let mut increment = if step_max == 0.0 || step_max <= step_min {
            step_min
        } else {
            self.rng.gen_range(step_min..=step_max)
        };
        let seconds = frame_time.as_secs_f32();

        if value[1] >= 0.0 {
            increment = (increment - (smoothing - (max - value[0])).max(0.0))
                .max(PINGPONG_MIN_INCREMENT);
            value[0] += increment * seconds;
            if value[0] >= max {
                value = [max, -1.0];
            }
        } else {
            increment = (increment - (smoothing - (value[0] - min)).max(0.0))
                .max(PINGPONG_MIN_INCREMENT);
            value[0] -= increment * seconds;
            if value[0] <= min {
                value = [min, 1.0];
            }
        }
        storage.set(&uniform.layout, &value);
    }
}

/// Writes the technique countdown into every `timeleft` uniform.
pub fn write_timeleft(effect: &mut Effect, timeleft: i32) {
    let Effect {
        uniforms, storage, ..
    } = effect;
    for uniform in uniforms.iter().filter(|u| u.source() == Some("timeleft")) {
        storage.set(&uniform.layout, &[timeleft]);
    }
}

/// Bool slots get the parity, integer slots the wrapped count and float slots
/// the scaled count wrapped at 2^24.
fn write_counter(storage: &mut ConstantStorage, uniform: &Uniform, count: u64, float_scale: f64) {
    match uniform.base_type() {
        BaseType::Bool => {
            storage.set(&uniform.layout, &[count % 2 == 0]);
        }
        BaseType::Int | BaseType::Uint => {
            storage.set(&uniform.layout, &[(count % u64::from(u32::MAX)) as u32]);
        }
        BaseType::Float => {
            let value = (count as f64 * float_scale) % FLOAT_WRAP;
            storage.set(&uniform.layout, &[value as f32]);
        }
    }
}

fn update_key(storage: &mut ConstantStorage, uniform: &Uniform, input: &InputState) {
    let keycode = uniform.annotations.int("keycode");
    let Ok(key) = u8::try_from(keycode) else {
        return;
    };
    if key == 0 {
        return;
    }
    if uniform.annotations.bool("toggle") {
        if input.just_pressed(key) {
            let current: bool = storage.get_one(&uniform.layout);
            storage.set(&uniform.layout, &[!current]);
        }
    } else {
        storage.set(&uniform.layout, &[input.is_down(key)]);
    }
}
