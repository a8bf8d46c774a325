use std::time::Duration;

use crate::device::{SamplerState, StateBlockId, SurfaceId, MAX_RENDER_TARGETS};
use crate::input::{keys, InputState};

use super::annotation::Annotations;

/// Texture bound to one sampler slot of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerBinding {
    /// Index into the effect's texture list.
    pub texture: usize,
    pub state: SamplerState,
}

/// One full-screen draw with its captured state. Immutable after compile.
#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    pub state_block: StateBlockId,
    pub samplers: Vec<SamplerBinding>,
    pub render_targets: [Option<SurfaceId>; MAX_RENDER_TARGETS],
}

impl Pass {
    pub fn new(state_block: StateBlockId) -> Self {
        Self {
            state_block,
            samplers: Vec::new(),
            render_targets: [None; MAX_RENDER_TARGETS],
        }
    }
}

/// Key and modifiers that flip a technique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleBinding {
    pub key: u8,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl ToggleBinding {
    fn triggered(&self, input: &InputState) -> bool {
        self.key != 0
            && input.just_pressed(self.key)
            && (!self.ctrl || input.is_down(keys::CONTROL))
            && (!self.shift || input.is_down(keys::SHIFT))
            && (!self.alt || input.is_down(keys::MENU))
    }
}

/// Why a technique flipped this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleCause {
    Scheduled,
    Expired,
    KeyPressed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Technique {
    pub name: String,
    pub enabled: bool,
    pub passes: Vec<Pass>,
    pub toggle: ToggleBinding,
    /// Milliseconds a toggle lasts before flipping back; 0 disables.
    pub timeout: i32,
    /// Remaining milliseconds of the running countdown.
    pub timeleft: i32,
    /// Second of the day at which to flip once; 0 disables.
    pub toggle_time: u32,
    pub last_duration: Duration,
    pub(crate) last_duration_update: Option<Duration>,
    pub annotations: Annotations,
}

impl Technique {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            passes: Vec::new(),
            toggle: ToggleBinding::default(),
            timeout: 0,
            timeleft: 0,
            toggle_time: 0,
            last_duration: Duration::ZERO,
            last_duration_update: None,
            annotations: Annotations::new(),
        }
    }

    /// Reads `enabled`, `timeout`, `toggle*` and `toggletime` annotations.
    pub fn apply_annotations(&mut self) {
        let annotations = &self.annotations;
        self.enabled = annotations.bool("enabled");
        self.timeout = annotations.int("timeout");
        self.timeleft = self.timeout;
        self.toggle = ToggleBinding {
            key: annotations.uint("toggle").min(255) as u8,
            ctrl: annotations.bool("togglectrl"),
            shift: annotations.bool("toggleshift"),
            alt: annotations.bool("togglealt"),
        };
        self.toggle_time = annotations.int("toggletime").max(0) as u32;
    }

    /// Advances the toggle state machine by one frame.
    ///
    /// A scheduled toggle time takes precedence over a running countdown,
    /// which in turn takes precedence over the toggle key.
    pub fn update_toggle(
        &mut self,
        input: &InputState,
        second_of_day: u32,
        frame_ms: i32,
    ) -> Option<ToggleCause> {
        if self.toggle_time != 0 && self.toggle_time == second_of_day {
            self.enabled = !self.enabled;
            self.timeleft = self.timeout;
            self.toggle_time = 0;
            return Some(ToggleCause::Scheduled);
        }
        if self.timeleft > 0 {
            self.timeleft -= frame_ms;
            if self.timeleft <= 0 {
                self.enabled = !self.enabled;
                self.timeleft = 0;
                return Some(ToggleCause::Expired);
            }
            return None;
        }
        if self.toggle.triggered(input) {
            self.enabled = !self.enabled;
            self.timeleft = self.timeout;
            return Some(ToggleCause::KeyPressed);
        }
        None
    }

    /// Stores a duration measurement if `refresh` has passed since the last one.
    pub(crate) fn record_duration(&mut self, now: Duration, measured: Duration, refresh: Duration) {
        let due = match self.last_duration_update {
            Some(previous) => now.saturating_sub(previous) > refresh,
            None => true,
        };
        if due {
            self.last_duration = measured;
            self.last_duration_update = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::AnnotationValue;

    fn technique(timeout: i32, key: u8) -> Technique {
        let mut technique = Technique::new("Bloom");
        technique.timeout = timeout;
        technique.toggle.key = key;
        technique
    }

    #[test]
    fn key_press_flips_and_arms_countdown() {
        let mut technique = technique(500, keys::F1);
        let mut input = InputState::new();
        input.key_down(keys::F1);
        assert_eq!(
            technique.update_toggle(&input, 0, 16),
            Some(ToggleCause::KeyPressed)
        );
        assert!(technique.enabled);
        assert_eq!(technique.timeleft, 500);
    }

    #[test]
    fn held_key_does_not_retrigger() {
        let mut technique = technique(0, keys::F1);
        let mut input = InputState::new();
        input.key_down(keys::F1);
        technique.update_toggle(&input, 0, 16);
        input.next_frame();
        assert_eq!(technique.update_toggle(&input, 0, 16), None);
        assert!(technique.enabled);
    }

    #[test]
    fn countdown_flips_back_when_expired() {
        let mut technique = technique(40, keys::F1);
        technique.enabled = true;
        technique.timeleft = 40;
        let input = InputState::new();
        assert_eq!(technique.update_toggle(&input, 0, 16), None);
        assert_eq!(technique.update_toggle(&input, 0, 16), None);
        assert_eq!(
            technique.update_toggle(&input, 0, 16),
            Some(ToggleCause::Expired)
        );
        assert!(!technique.enabled);
        assert_eq!(technique.timeleft, 0);
    }

    #[test]
    fn modifiers_are_required_when_flagged() {
        let mut technique = technique(0, keys::F1);
        technique.toggle.ctrl = true;
        let mut input = InputState::new();
        input.key_down(keys::F1);
        assert_eq!(technique.update_toggle(&input, 0, 16), None);
        input.key_up(keys::F1);
        input.next_frame();
        input.key_down(keys::CONTROL);
        input.key_down(keys::F1);
        assert_eq!(
            technique.update_toggle(&input, 0, 16),
            Some(ToggleCause::KeyPressed)
        );
    }

    #[test]
    fn scheduled_toggle_fires_once() {
        let mut technique = technique(0, 0);
        technique.toggle_time = 3600;
        let input = InputState::new();
        assert_eq!(
            technique.update_toggle(&input, 3600, 16),
            Some(ToggleCause::Scheduled)
        );
        assert_eq!(technique.update_toggle(&input, 3600, 16), None);
        assert!(technique.enabled);
    }

    #[test]
    fn annotations_configure_toggle() {
        let mut technique = Technique::new("Tonemap");
        technique.annotations = Annotations::new()
            .with("enabled", AnnotationValue::Bool(vec![true]))
            .with("timeout", AnnotationValue::Int(vec![1000]))
            .with("toggle", AnnotationValue::Uint(vec![0x70]))
            .with("toggleshift", AnnotationValue::Bool(vec![true]));
        technique.apply_annotations();
        assert!(technique.enabled);
        assert_eq!(technique.timeleft, 1000);
        assert_eq!(technique.toggle.key, 0x70);
        assert!(technique.toggle.shift);
        assert!(!technique.toggle.ctrl);
    }

    #[test]
    fn durations_refresh_at_most_once_per_interval() {
        let mut technique = Technique::new("Blur");
        let refresh = Duration::from_millis(250);
        technique.record_duration(Duration::from_millis(0), Duration::from_micros(10), refresh);
        technique.record_duration(Duration::from_millis(100), Duration::from_micros(20), refresh);
        assert_eq!(technique.last_duration, Duration::from_micros(10));
        technique.record_duration(Duration::from_millis(300), Duration::from_micros(30), refresh);
        assert_eq!(technique.last_duration, Duration::from_micros(30));
    }
}
