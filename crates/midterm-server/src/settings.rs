//! Read-through settings cache.
//!
//! The settings record itself is owned and persisted by an external
//! collaborator, configured into this process at startup; this store just
//! holds the latest copy in memory and republishes `settings-changed` on
//! the hub when it's told the value changed.

use std::sync::RwLock;

use midterm_proto::Settings;

use crate::hub::BroadcastHub;

pub struct SettingsStore {
    current: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> Settings {
        self.current.read().expect("settings lock poisoned").clone()
    }

    /// Replace the settings record and notify listeners via the hub.
    pub fn replace(&self, settings: Settings, hub: &BroadcastHub) {
        *self.current.write().expect("settings lock poisoned") = settings;
        hub.publish_settings_changed();
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
