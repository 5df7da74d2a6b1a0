//! Process-wide matching engine switch.
//!
//! Readers (the match loop entry) take the shared side of the lock, the
//! admin toggle takes the exclusive side.

use std::sync::Arc;

use parking_lot::RwLock;

/// Global enable/disable flag for the matching engine.
#[derive(Clone)]
pub struct EngineSwitch {
    enabled: Arc<RwLock<bool>>,
}

impl EngineSwitch {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(RwLock::new(enabled)),
        }
    }

    /// Shared-lock read of the flag.
    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    /// Exclusive-lock write. Returns the previous value.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut guard = self.enabled.write();
        std::mem::replace(&mut *guard, enabled)
    }
}

impl Default for EngineSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_toggles_and_reports_previous_state() {
        let switch = EngineSwitch::new(true);
        assert!(switch.is_enabled());

        assert!(switch.set_enabled(false));
        assert!(!switch.is_enabled());

        assert!(!switch.set_enabled(true));
        assert!(switch.is_enabled());
    }

    #[test]
    fn test_clones_share_state() {
        let switch = EngineSwitch::new(true);
        let clone = switch.clone();

        switch.set_enabled(false);
        assert!(!clone.is_enabled());
    }
}
