//! Input tables for retrohost-core.
//!
//! The presentation side writes button and key state before each frame; the
//! plugin reads it back through the input-state callback while the frame runs.
//!
//! Notes / constraints:
//! - Joypad state is a `port x button` table (16 x 16).
//! - Keyboard state is indexed by libretro keycode (`0..KEYCODE_COUNT`).
//! - Out-of-range writes are ignored; out-of-range reads report "not pressed".

use crate::abi::{
    DEVICE_ID_JOYPAD_MASK, DEVICE_JOYPAD, DEVICE_KEYBOARD, JoypadButton, KEYCODE_COUNT,
    MAX_BUTTONS, MAX_PORTS,
};

#[derive(Clone, Debug)]
pub struct InputState {
    joypad: [[bool; MAX_BUTTONS]; MAX_PORTS],
    keyboard: Box<[bool; KEYCODE_COUNT]>,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            joypad: [[false; MAX_BUTTONS]; MAX_PORTS],
            keyboard: Box::new([false; KEYCODE_COUNT]),
        }
    }
}

impl InputState {
    pub fn set_button(&mut self, port: u32, button: u32, pressed: bool) {
        if let Some(slot) = self
            .joypad
            .get_mut(port as usize)
            .and_then(|p| p.get_mut(button as usize))
        {
            *slot = pressed;
        }
    }

    pub fn set_joypad(&mut self, port: u32, button: JoypadButton, pressed: bool) {
        self.set_button(port, button as u32, pressed);
    }

    pub fn set_key(&mut self, keycode: u32, pressed: bool) {
        if let Some(slot) = self.keyboard.get_mut(keycode as usize) {
            *slot = pressed;
        }
    }

    pub fn button(&self, port: u32, button: u32) -> bool {
        self.joypad
            .get(port as usize)
            .and_then(|p| p.get(button as usize))
            .copied()
            .unwrap_or(false)
    }

    pub fn key(&self, keycode: u32) -> bool {
        self.keyboard.get(keycode as usize).copied().unwrap_or(false)
    }

    /// All buttons of a port packed as a bitmask (bit n = button id n).
    pub fn button_mask(&self, port: u32) -> u16 {
        self.joypad.get(port as usize).map_or(0, |buttons| {
            buttons
                .iter()
                .enumerate()
                .filter(|&(_, &down)| down)
                .fold(0u16, |mask, (id, _)| mask | (1 << id))
        })
    }

    /// Release everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Copy `other` into `self` without reallocating the keyboard table.
    pub fn latch_from(&mut self, other: &InputState) {
        self.joypad = other.joypad;
        self.keyboard.copy_from_slice(&other.keyboard[..]);
    }

    /// Answer an input-state query from the plugin.
    pub fn query(&self, port: u32, device: u32, _index: u32, id: u32) -> i16 {
        if port as usize >= MAX_PORTS {
            return 0;
        }
        match device {
            DEVICE_JOYPAD if id == DEVICE_ID_JOYPAD_MASK => self.button_mask(port) as i16,
            DEVICE_JOYPAD => self.button(port, id) as i16,
            DEVICE_KEYBOARD => self.key(id) as i16,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joypad_query_reads_table() {
        let mut input = InputState::default();
        input.set_joypad(1, JoypadButton::Start, true);
        assert_eq!(input.query(1, DEVICE_JOYPAD, 0, JoypadButton::Start as u32), 1);
        assert_eq!(input.query(0, DEVICE_JOYPAD, 0, JoypadButton::Start as u32), 0);
    }

    #[test]
    fn out_of_range_is_ignored() {
        let mut input = InputState::default();
        input.set_button(16, 0, true);
        input.set_button(0, 16, true);
        input.set_key(KEYCODE_COUNT as u32, true);
        assert_eq!(input.query(16, DEVICE_JOYPAD, 0, 0), 0);
        assert_eq!(input.query(0, DEVICE_JOYPAD, 0, 16), 0);
        assert_eq!(input.query(0, DEVICE_KEYBOARD, 0, KEYCODE_COUNT as u32), 0);
    }

    #[test]
    fn bitmask_query_packs_buttons() {
        let mut input = InputState::default();
        input.set_joypad(0, JoypadButton::B, true);
        input.set_joypad(0, JoypadButton::A, true);
        let mask = input.query(0, DEVICE_JOYPAD, 0, DEVICE_ID_JOYPAD_MASK) as u16;
        assert_eq!(mask, (1 << 0) | (1 << 8));
    }

    #[test]
    fn keyboard_query() {
        let mut input = InputState::default();
        input.set_key(13, true);
        assert_eq!(input.query(0, DEVICE_KEYBOARD, 0, 13), 1);
        input.clear();
        assert_eq!(input.query(0, DEVICE_KEYBOARD, 0, 13), 0);
    }

    #[test]
    fn unknown_device_reads_zero() {
        let mut input = InputState::default();
        input.set_button(0, 0, true);
        assert_eq!(input.query(0, 2, 0, 0), 0);
    }
}
