//! Abstract input commands emitted by the core
//!
//! The core never touches the OS. Everything it wants to press goes through
//! an [`InputSink`] supplied by the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One of the four primitive arrow keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

impl DirectionKey {
    pub const ALL: [DirectionKey; 4] = [
        DirectionKey::Left,
        DirectionKey::Up,
        DirectionKey::Right,
        DirectionKey::Down,
    ];

    pub fn opposite(self) -> DirectionKey {
        match self {
            DirectionKey::Up => DirectionKey::Down,
            DirectionKey::Down => DirectionKey::Up,
            DirectionKey::Left => DirectionKey::Right,
            DirectionKey::Right => DirectionKey::Left,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, DirectionKey::Left | DirectionKey::Right)
    }

    /// Windows virtual-key code.
    pub fn vk_code(self) -> u16 {
        match self {
            DirectionKey::Left => 37,
            DirectionKey::Up => 38,
            DirectionKey::Right => 39,
            DirectionKey::Down => 40,
        }
    }
}

/// Every key the core may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Direction(DirectionKey),
    /// Ability slot bound to a letter key.
    Skill(char),
    /// Basic attack, also used to collect loot.
    Attack,
    /// Pull nearby drops together.
    Gather,
    Buff,
    StatPanel,
    Retry,
    Exit,
}

impl Key {
    pub fn is_direction(self) -> bool {
        matches!(self, Key::Direction(_))
    }

    /// Windows virtual-key code as expected by the injection layer.
    pub fn vk_code(self) -> u16 {
        match self {
            Key::Direction(d) => d.vk_code(),
            Key::Skill(c) => c.to_ascii_uppercase() as u16,
            Key::Attack => 88,
            Key::Gather => 86,
            Key::Buff => 17,
            Key::StatPanel => 77,
            Key::Retry => 121,
            Key::Exit => 123,
        }
    }
}

impl From<DirectionKey> for Key {
    fn from(d: DirectionKey) -> Self {
        Key::Direction(d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
}

/// Low-level input injection. Implementations block for `hold` inside
/// `press_and_release`.
pub trait InputSink {
    fn press_and_release(&mut self, key: Key, hold: Duration) -> Result<()>;
    fn hold_key(&mut self, key: Key) -> Result<()>;
    fn release_key(&mut self, key: Key) -> Result<()>;
    fn click_at(&mut self, x: i32, y: i32, button: MouseButton) -> Result<()>;
}
