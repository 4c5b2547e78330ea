//! Static channel topology for bonded operation.
//!
//! Every channel id maps to its paired sibling and its width. Pairs of equal
//! width combine into the channel numbered halfway between them, giving a
//! binary tree of dyadic widths:
//!
//! ```text
//! 36   40   44   48    52   56   60   64      20 MHz
//!   \  /      \  /       \  /      \  /
//!    38        46         54        62        40 MHz
//!        \   /                \   /
//!         42                   58             80 MHz
//!                  \    /
//!                    50                       160 MHz
//! ```
//!
//! The table is built once and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Width of the narrowest (base) channel, in MHz
pub const UNIT_WIDTH: u32 = 20;

/// Radio channel identifier (IEEE channel number)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(pub u16);

impl ChannelId {
    /// Create a channel id from its channel number
    pub const fn new(number: u16) -> Self {
        Self(number)
    }

    /// Channel number
    pub const fn number(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ChannelId {
    fn from(number: u16) -> Self {
        Self(number)
    }
}

/// One row of the topology table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyEntry {
    /// The channel this row describes
    pub channel: ChannelId,
    /// Sibling channel it bonds with (the root is paired with itself)
    pub paired: ChannelId,
    /// Channel width in MHz
    pub width: u32,
}

impl TopologyEntry {
    /// Whether this is a base (unit-width) channel
    pub fn is_unit(&self) -> bool {
        self.width == UNIT_WIDTH
    }

    /// Whether this is the root of the tree
    pub fn is_root(&self) -> bool {
        self.channel == self.paired
    }

    /// Distance in channel numbers from this channel to each half
    fn side(&self) -> u16 {
        (self.width / UNIT_WIDTH) as u16
    }
}

/// Topology errors. All of them indicate a wiring bug and are not recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Unknown channel id: {0}")]
    UnknownChannel(ChannelId),

    #[error("Asymmetric pairing: {channel} pairs with {paired}, which does not pair back")]
    AsymmetricPair { channel: ChannelId, paired: ChannelId },

    #[error("Invalid width {width} MHz for channel {channel}")]
    InvalidWidth { channel: ChannelId, width: u32 },

    #[error("Channel {channel} is missing constituent sub-channel {sub}")]
    MissingSubChannel { channel: ChannelId, sub: ChannelId },

    #[error("Topology has no channels")]
    Empty,
}

/// Immutable channel -> (sibling, width) table
#[derive(Debug, Clone)]
pub struct ChannelTopology {
    entries: BTreeMap<ChannelId, TopologyEntry>,
}

impl ChannelTopology {
    /// The 5 GHz table: eight 20 MHz channels 36..=64 bonded up to 160 MHz at 50.
    pub fn standard() -> Self {
        const TABLE: [(u16, u16, u32); 15] = [
            (36, 40, 20),
            (40, 36, 20),
            (44, 48, 20),
            (48, 44, 20),
            (52, 56, 20),
            (56, 52, 20),
            (60, 64, 20),
            (64, 60, 20),
            (38, 46, 40),
            (46, 38, 40),
            (54, 62, 40),
            (62, 54, 40),
            (42, 58, 80),
            (58, 42, 80),
            (50, 50, 160),
        ];

        let entries = TABLE
            .iter()
            .map(|&(channel, paired, width)| {
                (
                    ChannelId(channel),
                    TopologyEntry {
                        channel: ChannelId(channel),
                        paired: ChannelId(paired),
                        width,
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Build and validate a topology from `(channel, paired, width)` rows.
    pub fn from_entries<I>(rows: I) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = (u16, u16, u32)>,
    {
        let entries: BTreeMap<ChannelId, TopologyEntry> = rows
            .into_iter()
            .map(|(channel, paired, width)| {
                (
                    ChannelId(channel),
                    TopologyEntry {
                        channel: ChannelId(channel),
                        paired: ChannelId(paired),
                        width,
                    },
                )
            })
            .collect();

        if entries.is_empty() {
            return Err(TopologyError::Empty);
        }

        let topology = Self { entries };
        topology.validate()?;
        Ok(topology)
    }

    fn validate(&self) -> Result<(), TopologyError> {
        for entry in self.entries.values() {
            let width_ok = entry.width >= UNIT_WIDTH
                && entry.width % UNIT_WIDTH == 0
                && (entry.width / UNIT_WIDTH).is_power_of_two();
            if !width_ok {
                return Err(TopologyError::InvalidWidth {
                    channel: entry.channel,
                    width: entry.width,
                });
            }

            let sibling = self.pair_of(entry.paired)?;
            if sibling.paired != entry.channel {
                return Err(TopologyError::AsymmetricPair {
                    channel: entry.channel,
                    paired: entry.paired,
                });
            }
            if sibling.width != entry.width {
                return Err(TopologyError::InvalidWidth {
                    channel: entry.paired,
                    width: sibling.width,
                });
            }

            if let Some((low, high)) = self.children_of(entry.channel)? {
                for sub in [low, high] {
                    match self.entries.get(&sub) {
                        Some(s) if s.width * 2 == entry.width => {}
                        _ => {
                            return Err(TopologyError::MissingSubChannel {
                                channel: entry.channel,
                                sub,
                            })
                        }
                    }
                }
            }

            if let Some(parent) = self.parent_of(entry.channel)? {
                match self.entries.get(&parent) {
                    Some(p) if p.width == entry.width * 2 => {}
                    _ => return Err(TopologyError::UnknownChannel(parent)),
                }
            }
        }
        Ok(())
    }

    /// Look up the sibling and width of `channel`
    pub fn pair_of(&self, channel: ChannelId) -> Result<TopologyEntry, TopologyError> {
        self.entries
            .get(&channel)
            .copied()
            .ok_or(TopologyError::UnknownChannel(channel))
    }

    /// Width of `channel` in MHz
    pub fn width_of(&self, channel: ChannelId) -> Result<u32, TopologyError> {
        Ok(self.pair_of(channel)?.width)
    }

    /// The wider channel formed by bonding `channel` with its sibling.
    ///
    /// Returns `None` for the root.
    pub fn parent_of(&self, channel: ChannelId) -> Result<Option<ChannelId>, TopologyError> {
        let entry = self.pair_of(channel)?;
        if entry.is_root() {
            return Ok(None);
        }
        let mid = (u32::from(entry.channel.0) + u32::from(entry.paired.0)) / 2;
        Ok(Some(ChannelId(mid as u16)))
    }

    /// The two half-width channels composing `channel`, low side first.
    ///
    /// Returns `None` for base channels.
    pub fn children_of(
        &self,
        channel: ChannelId,
    ) -> Result<Option<(ChannelId, ChannelId)>, TopologyError> {
        let entry = self.pair_of(channel)?;
        if entry.is_unit() {
            return Ok(None);
        }
        let side = entry.side();
        let low = channel
            .0
            .checked_sub(side)
            .ok_or(TopologyError::UnknownChannel(channel))?;
        let high = channel
            .0
            .checked_add(side)
            .ok_or(TopologyError::UnknownChannel(channel))?;
        Ok(Some((ChannelId(low), ChannelId(high))))
    }

    /// Climb from `start` toward the root while `accept` approves the wider
    /// channel and its width stays within `max_width`. Returns the last
    /// channel reached.
    pub fn widest_ancestor<F, E>(
        &self,
        start: ChannelId,
        max_width: u32,
        mut accept: F,
    ) -> Result<ChannelId, E>
    where
        F: FnMut(ChannelId) -> Result<bool, E>,
        E: From<TopologyError>,
    {
        let mut current = start;
        while let Some(parent) = self.parent_of(current)? {
            if self.width_of(parent)? > max_width || !accept(parent)? {
                break;
            }
            current = parent;
        }
        Ok(current)
    }

    /// The channel on the path from `start` to the root whose width is `width`.
    pub fn ancestor_with_width(&self, start: ChannelId, width: u32) -> Option<ChannelId> {
        let mut current = start;
        loop {
            let entry = self.entries.get(&current)?;
            if entry.width == width {
                return Some(current);
            }
            if entry.width > width {
                return None;
            }
            current = self.parent_of(current).ok()??;
        }
    }

    /// All base (unit-width) channels in ascending order
    pub fn base_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.entries
            .values()
            .filter(|e| e.is_unit())
            .map(|e| e.channel)
    }

    /// All rows in ascending channel order
    pub fn iter(&self) -> impl Iterator<Item = &TopologyEntry> {
        self.entries.values()
    }
}

impl Default for ChannelTopology {
    fn default() -> Self {
        Self::standard()
    }
}
