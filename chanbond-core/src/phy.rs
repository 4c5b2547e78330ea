//! Collaborator interfaces around the bonding core.
//!
//! The core never talks to a radio, a MAC or a clock directly. It is handed:
//!
//! - one [`SubChannelPhy`] per base channel,
//! - a [`LinkLayer`] that receives merged frames,
//! - an [`EventScheduler`] that owns time.
//!
//! Receive callbacks flow the other way: whoever owns the PHYs calls
//! [`BondingEngine::receive_ok`](crate::engine::BondingEngine::receive_ok) and
//! [`BondingEngine::receive_error`](crate::engine::BondingEngine::receive_error)
//! with the channel the frame arrived on, and hands fired timers back through
//! [`BondingEngine::on_timer`](crate::engine::BondingEngine::on_timer).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::frame::MacAddress;
use crate::topology::{ChannelId, UNIT_WIDTH};

/// Transmission parameters attached to every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParameters {
    /// Total channel width the frame was (or is to be) sent over, in MHz
    pub channel_width: u32,
    /// Modulation and coding scheme index
    #[serde(default)]
    pub mcs: u8,
}

impl Default for TxParameters {
    fn default() -> Self {
        Self {
            channel_width: UNIT_WIDTH,
            mcs: 0,
        }
    }
}

/// Reception quality reported by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalInfo {
    /// Signal-to-noise ratio (linear)
    pub snr: f64,
}

/// Preamble format of a received or sent frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preamble {
    #[default]
    Legacy,
    Ht,
    Vht,
}

/// Radio bound to one base channel
pub trait SubChannelPhy {
    /// Whether the medium on this channel is currently idle
    fn is_idle(&self) -> bool;

    /// Transmit a frame on this channel
    fn send(&mut self, frame: Vec<u8>, tx: TxParameters, preamble: Preamble);

    /// Tune the radio to `channel`
    fn bind_channel(&mut self, channel: ChannelId);

    /// Enable or disable bonded operation on this radio
    fn enable_bonding(&mut self, enable: bool);
}

/// Link layer sitting above the bonding core
pub trait LinkLayer {
    /// Hand up a merged reception. Ownership of the buffer moves to the link layer.
    fn deliver(&mut self, frame: Vec<u8>, signal: SignalInfo, tx: TxParameters, preamble: Preamble);

    /// Pass through a PHY reception error
    fn deliver_error(&mut self, frame: Vec<u8>, signal: SignalInfo);

    /// Short inter-frame gap, used as the correlation window length
    fn inter_frame_gap(&self) -> Duration;

    /// Address of this station
    fn address(&self) -> MacAddress;
}

/// Handle identifying one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// Timed events the core schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The reception correlation window has run out
    WindowExpired,
}

/// Clock and timer service
pub trait EventScheduler {
    /// Current time, measured from an arbitrary epoch
    fn now(&self) -> Duration;

    /// Schedule `event` to fire after `delay`
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}
