//! Keyboard state observed from the host window.

/// Virtual key codes the runtime refers to by name.
pub mod keys {
    pub const SHIFT: u8 = 0x10;
    pub const CONTROL: u8 = 0x11;
    pub const MENU: u8 = 0x12;
    pub const SNAPSHOT: u8 = 0x2C;
    pub const F1: u8 = 0x70;
}

/// Held keys plus keys pressed since the previous frame.
#[derive(Debug, Clone)]
pub struct InputState {
    down: [bool; 256],
    pressed: [bool; 256],
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            down: [false; 256],
            pressed: [false; 256],
        }
    }
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, key: u8) {
        let index = usize::from(key);
        if !self.down[index] {
            self.pressed[index] = true;
        }
        self.down[index] = true;
    }

    pub fn key_up(&mut self, key: u8) {
        self.down[usize::from(key)] = false;
    }

    pub fn is_down(&self, key: u8) -> bool {
        self.down[usize::from(key)]
    }

    /// Pressed during the current frame; cleared by [`InputState::next_frame`].
    pub fn just_pressed(&self, key: u8) -> bool {
        self.pressed[usize::from(key)]
    }

    pub fn next_frame(&mut self) {
        self.pressed = [false; 256];
    }
}
