use chatbox_status_core::{DisplayMode, ModeError};
use std::sync::atomic::{AtomicU8, Ordering};

/// Operator-selected display mode shared between the control surface and
/// the aggregator. Reads are a single atomic load.
#[derive(Debug)]
pub struct ModeControl {
    current: AtomicU8,
}

impl ModeControl {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            current: AtomicU8::new(mode as u8),
        }
    }

    pub fn mode(&self) -> DisplayMode {
        DisplayMode::from_u8(self.current.load(Ordering::Acquire)).unwrap_or(DisplayMode::Full)
    }

    /// Returns the previous mode.
    pub fn set(&self, mode: DisplayMode) -> DisplayMode {
        let prev = self.current.swap(mode as u8, Ordering::AcqRel);
        DisplayMode::from_u8(prev).unwrap_or(DisplayMode::Full)
    }

    /// Switches by name. Unknown names leave the mode untouched.
    pub fn set_mode(&self, name: &str) -> Result<DisplayMode, ModeError> {
        let mode: DisplayMode = name.parse()?;
        self.set(mode);
        Ok(mode)
    }
}

impl Default for ModeControl {
    fn default() -> Self {
        Self::new(DisplayMode::Full)
    }
}
