//! Outgoing frame splitting across the base channels of a bonded channel.
//!
//! Two modes are supported:
//!
//! - **Replicate**: every base channel carries an identical copy of the frame
//! - **Prorated**: aggregate payloads are cut into one fragment per base
//!   channel, each re-wrapped with the original headers; non-aggregate frames
//!   are still replicated
//!
//! The receiving side must be configured with the same mode so that it knows
//! whether to deliver the primary copy or reassemble the fragments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::BondingError;
use crate::frame::{Frame, FrameError};
use crate::topology::{ChannelId, ChannelTopology, TopologyError, UNIT_WIDTH};

/// How a frame is laid out over the base channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Identical full copy on every base channel
    #[default]
    Replicate,
    /// Byte-prorated aggregate fragments, one per base channel
    Prorated,
}

/// Per-base-channel outgoing frames for one transmission
#[derive(Debug, Clone, Default)]
pub struct OutgoingSplit {
    pieces: BTreeMap<ChannelId, Option<Vec<u8>>>,
}

impl OutgoingSplit {
    /// Empty split over the given base channels
    pub fn new(base_channels: impl IntoIterator<Item = ChannelId>) -> Self {
        Self {
            pieces: base_channels.into_iter().map(|ch| (ch, None)).collect(),
        }
    }

    /// Frame queued for `channel`, if any
    pub fn get(&self, channel: ChannelId) -> Option<&[u8]> {
        self.pieces.get(&channel)?.as_deref()
    }

    /// Queued frames in ascending channel order
    pub fn pieces(&self) -> impl Iterator<Item = (ChannelId, &[u8])> {
        self.pieces
            .iter()
            .filter_map(|(ch, piece)| piece.as_deref().map(|p| (*ch, p)))
    }

    /// Number of channels with a queued frame
    pub fn occupied(&self) -> usize {
        self.pieces.values().filter(|p| p.is_some()).count()
    }

    /// Move the queued frames out, leaving every slot empty
    pub fn take_pieces(&mut self) -> Vec<(ChannelId, Vec<u8>)> {
        self.pieces
            .iter_mut()
            .filter_map(|(ch, piece)| piece.take().map(|p| (*ch, p)))
            .collect()
    }

    /// Empty every slot
    pub fn clear(&mut self) {
        for piece in self.pieces.values_mut() {
            *piece = None;
        }
    }

    fn put(&mut self, channel: ChannelId, frame: Vec<u8>) -> Result<(), TopologyError> {
        let slot = self
            .pieces
            .get_mut(&channel)
            .ok_or(TopologyError::UnknownChannel(channel))?;
        *slot = Some(frame);
        Ok(())
    }
}

/// Splits frames according to the topology and the configured mode
pub struct FrameSplitter<'a> {
    topology: &'a ChannelTopology,
    mode: SplitMode,
}

impl<'a> FrameSplitter<'a> {
    pub fn new(topology: &'a ChannelTopology, mode: SplitMode) -> Self {
        Self { topology, mode }
    }

    /// Base channels composing `channel`, low side first
    pub fn enumerate_sub_channels(
        &self,
        channel: ChannelId,
    ) -> Result<Vec<ChannelId>, TopologyError> {
        let mut result = Vec::new();
        self.collect_sub_channels(channel, &mut result)?;
        Ok(result)
    }

    fn collect_sub_channels(
        &self,
        channel: ChannelId,
        out: &mut Vec<ChannelId>,
    ) -> Result<(), TopologyError> {
        match self.topology.children_of(channel)? {
            None => out.push(channel),
            Some((low, high)) => {
                self.collect_sub_channels(low, out)?;
                self.collect_sub_channels(high, out)?;
            }
        }
        Ok(())
    }

    /// Lay `frame` out over the base channels of `channel`.
    ///
    /// `out` is cleared first; channels outside `channel` stay empty.
    pub fn split(
        &self,
        frame: &[u8],
        channel: ChannelId,
        out: &mut OutgoingSplit,
    ) -> Result<(), BondingError> {
        out.clear();
        let sub_channels = self.enumerate_sub_channels(channel)?;

        let fragments = match self.mode {
            SplitMode::Replicate => None,
            SplitMode::Prorated => {
                let decoded = Frame::decode(frame)?;
                if decoded.is_aggregate() {
                    Some(fragment(&decoded, sub_channels.len())?)
                } else {
                    None
                }
            }
        };

        match fragments {
            Some(fragments) => {
                for (sub, piece) in sub_channels.into_iter().zip(fragments) {
                    out.put(sub, piece)?;
                }
            }
            None => {
                for sub in sub_channels {
                    out.put(sub, frame.to_vec())?;
                }
            }
        }
        Ok(())
    }

    /// On-air size of the largest piece `frame` turns into when sent over
    /// `width` MHz.
    pub fn converted_size(&self, frame: &[u8], width: u32) -> Result<usize, FrameError> {
        if self.mode == SplitMode::Replicate {
            return Ok(frame.len());
        }
        let decoded = Frame::decode(frame)?;
        if !decoded.is_aggregate() {
            return Ok(frame.len());
        }
        let parts = (width / UNIT_WIDTH).max(1) as usize;
        let largest = prorate(decoded.payload.len(), parts)
            .first()
            .copied()
            .unwrap_or(0);
        Ok(Frame::overhead(true) + largest)
    }
}

/// Fragment lengths for `len` bytes over `parts` channels. The remainder goes
/// one byte each to the leading fragments.
pub fn prorate(len: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let unit = len / parts;
    let remainder = len % parts;
    (0..parts)
        .map(|i| if i < remainder { unit + 1 } else { unit })
        .collect()
}

fn fragment(frame: &Frame, parts: usize) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut offset = 0;
    prorate(frame.payload.len(), parts)
        .into_iter()
        .map(|len| {
            let piece = frame.payload[offset..offset + len].to_vec();
            offset += len;
            Ok(frame.with_payload(piece)?.encode())
        })
        .collect()
}
