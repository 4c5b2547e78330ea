//! Configuration and counters for the bonding engine.
//!
//! This module manages:
//! - The configuration surface (primary channel, maximum bonded width, split mode)
//! - Per-engine counters exposed for health reporting

use serde::{Deserialize, Serialize};

use crate::splitter::SplitMode;
use crate::topology::ChannelId;

fn default_primary_channel() -> ChannelId {
    ChannelId(36)
}

fn default_max_bonded_width() -> u32 {
    160
}

/// Configuration for one managed link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondingConfig {
    /// Always-monitored base channel
    #[serde(default = "default_primary_channel")]
    pub primary_channel: ChannelId,

    /// Widest bonded channel the engine may use, in MHz
    #[serde(default = "default_max_bonded_width")]
    pub max_bonded_width: u32,

    /// How outgoing frames are laid out over the base channels.
    ///
    /// Both ends of a link must agree: with `prorated` the receiver
    /// reassembles aggregate fragments instead of delivering the primary copy.
    #[serde(default)]
    pub split_mode: SplitMode,

    /// Start in reservation (handshake) mode instead of idle probing.
    ///
    /// The engine also switches into this mode by itself once it sees a
    /// reservation exchange on its primary channel or addressed to it.
    #[serde(default)]
    pub requires_handshake: bool,
}

impl Default for BondingConfig {
    fn default() -> Self {
        Self {
            primary_channel: default_primary_channel(),
            max_bonded_width: default_max_bonded_width(),
            split_mode: SplitMode::default(),
            requires_handshake: false,
        }
    }
}

/// Counters kept by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames accepted from any sub-channel
    pub frames_received: u64,
    /// Frames rejected because their header could not be parsed
    pub malformed_frames: u64,
    /// Merged frames handed to the link layer
    pub merges_delivered: u64,
    /// Reception records dropped as inconsistent with the primary
    pub records_pruned: u64,
    /// Correlation windows closed by the timer
    pub windows_expired: u64,
    /// Outgoing frames split and sent
    pub frames_sent: u64,
    /// Per-sub-channel pieces handed to the radios
    pub pieces_sent: u64,
    /// Width resolutions that found no usable bonded channel
    pub underruns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bonding_config_default() {
        let config = BondingConfig::default();
        assert_eq!(config.primary_channel, ChannelId(36));
        assert_eq!(config.max_bonded_width, 160);
        assert_eq!(config.split_mode, SplitMode::Replicate);
        assert!(!config.requires_handshake);
    }

    #[test]
    fn test_bonding_config_from_toml() {
        let config: BondingConfig = toml::from_str(
            r#"
            primary_channel = 44
            max_bonded_width = 80
            split_mode = "prorated"
            "#,
        )
        .unwrap();
        assert_eq!(config.primary_channel, ChannelId(44));
        assert_eq!(config.max_bonded_width, 80);
        assert_eq!(config.split_mode, SplitMode::Prorated);
        assert!(!config.requires_handshake);
    }

    #[test]
    fn test_bonding_config_toml_round_trip() {
        let config = BondingConfig {
            requires_handshake: true,
            ..Default::default()
        };
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: BondingConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
