//! Extension pour lire les réglages du lecteur depuis podconfig
//!
//! ```rust,ignore
//! use podconfig::get_config;
//! use podplayer::PlayerConfigExt;
//!
//! let config = get_config();
//! let session = PlaybackSession::builder(factory, store)
//!     .config(config.session_config())
//!     .build()?;
//! ```

use std::time::Duration;

use podconfig::Config;

use crate::session::SessionConfig;
use crate::swipe::SwipeThresholds;

pub trait PlayerConfigExt {
    /// Réglages de la session (pas de saut, période du tick, persistance)
    fn session_config(&self) -> SessionConfig;

    /// Seuils des gestes de balayage
    fn swipe_thresholds(&self) -> SwipeThresholds;
}

impl PlayerConfigExt for Config {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            skip_interval: self.get_skip_seconds() as f64,
            tick_interval: Duration::from_millis(self.get_tick_interval_ms().max(1)),
            persist_interval: Duration::from_millis(self.get_persist_interval_ms()),
        }
    }

    fn swipe_thresholds(&self) -> SwipeThresholds {
        SwipeThresholds {
            reveal: self.get_swipe_reveal_threshold(),
            delete: self.get_swipe_delete_threshold(),
            velocity: self.get_swipe_velocity_threshold(),
            commit_animation: Duration::from_millis(self.get_swipe_commit_animation_ms()),
        }
    }
}
