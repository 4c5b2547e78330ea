//! Bonding decision engine.
//!
//! The engine owns the per-channel radios, the correlation window and the
//! negotiation state of one link. It decides, per transmission, which bonded
//! channel to use, and merges concurrent sub-channel receptions into one
//! delivery for the link layer.
//!
//! Width selection works in one of two modes:
//!
//! - **Contention**: climb from the primary channel while every base channel
//!   of the wider channel is idle
//! - **Reservation**: climb while every base channel of the wider channel
//!   heard the same reservation request/grant as the primary
//!
//! The engine starts in contention mode (unless configured otherwise) and
//! switches to reservation mode for good once it takes part in a reservation
//! exchange.

use std::collections::BTreeMap;

use crate::control::{BondingConfig, EngineStats};
use crate::correlator::{CorrelationWindow, ReceptionCorrelator};
use crate::frame::{CapturedHeader, Frame, FrameError};
use crate::phy::{
    EventScheduler, LinkLayer, Preamble, SignalInfo, SubChannelPhy, TimerEvent, TimerHandle,
    TxParameters,
};
use crate::prober::IdleChannelProber;
use crate::splitter::{FrameSplitter, OutgoingSplit, SplitMode};
use crate::timer::ReceptionWindowTimer;
use crate::topology::{ChannelId, ChannelTopology, TopologyError, UNIT_WIDTH};

/// Bonding engine errors
#[derive(Debug, thiserror::Error)]
pub enum BondingError {
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("No sub-channel radio bound to channel {0}")]
    PhyNotBound(ChannelId),

    #[error("No channel of width {width} MHz contains primary {primary} within {max_width} MHz")]
    WidthUnreachable {
        primary: ChannelId,
        width: u32,
        max_width: u32,
    },

    #[error("No bonded channel available")]
    NoBondedChannel,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No active correlation window
    Idle,
    /// Window armed, accumulating receptions
    Collecting,
    /// Reservation exchange in progress
    Handshake,
    /// Outgoing split in flight
    Sending,
}

/// Negotiation state of one link, kept across windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondingSession {
    pub primary: ChannelId,
    pub max_width: u32,
    /// Reservation mode; once set by a received exchange it stays set
    pub requires_handshake: bool,
    /// `None` when the last resolution found no usable channel
    pub requested_channel: Option<ChannelId>,
    /// Width of `requested_channel`, or 0 when there is none
    pub requested_width: u32,
    /// Header of the primary channel's record in the current window
    pub last_primary_header: Option<CapturedHeader>,
}

impl BondingSession {
    fn new(primary: ChannelId, max_width: u32, requires_handshake: bool) -> Self {
        Self {
            primary,
            max_width,
            requires_handshake,
            requested_channel: Some(primary),
            requested_width: UNIT_WIDTH,
            last_primary_header: None,
        }
    }
}

/// What became of one reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// A merged frame was handed to the link layer
    Delivered,
    /// Recorded; waiting for more sub-channels or for the primary
    Held,
}

/// Result of one outgoing transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Bonded channel used
    pub channel: ChannelId,
    /// Its width in MHz
    pub width: u32,
    /// Number of base channels a piece was sent on
    pub pieces: usize,
}

/// Channel-bonding control for one link
pub struct BondingEngine<P, L, S> {
    topology: ChannelTopology,
    phys: BTreeMap<ChannelId, P>,
    link: L,
    scheduler: S,
    session: BondingSession,
    correlator: ReceptionCorrelator,
    timer: ReceptionWindowTimer,
    split: OutgoingSplit,
    split_mode: SplitMode,
    state: EngineState,
    stats: EngineStats,
}

impl<P, L, S> BondingEngine<P, L, S>
where
    P: SubChannelPhy,
    L: LinkLayer,
    S: EventScheduler,
{
    /// Wire up an engine.
    ///
    /// Every base channel of `topology` needs exactly one radio in `phys`.
    /// Each radio is tuned to its channel and switched to bonded operation.
    pub fn new(
        config: &BondingConfig,
        topology: ChannelTopology,
        phys: impl IntoIterator<Item = (ChannelId, P)>,
        link: L,
        scheduler: S,
    ) -> Result<Self, BondingError> {
        let mut phys: BTreeMap<ChannelId, P> = phys.into_iter().collect();

        for channel in phys.keys() {
            if !topology.pair_of(*channel)?.is_unit() {
                return Err(BondingError::InvalidConfig(format!(
                    "radio bound to bonded channel {channel}; radios belong to base channels"
                )));
            }
        }
        for base in topology.base_channels() {
            if !phys.contains_key(&base) {
                return Err(BondingError::PhyNotBound(base));
            }
        }

        validate_primary(&topology, config.primary_channel)?;
        validate_max_width(&topology, config.primary_channel, config.max_bonded_width)?;

        for (channel, phy) in phys.iter_mut() {
            phy.bind_channel(*channel);
            phy.enable_bonding(true);
        }

        let split = OutgoingSplit::new(topology.base_channels());
        tracing::debug!(
            primary = %config.primary_channel,
            max_width = config.max_bonded_width,
            split_mode = ?config.split_mode,
            handshake = config.requires_handshake,
            "bonding engine ready"
        );

        Ok(Self {
            topology,
            phys,
            link,
            scheduler,
            session: BondingSession::new(
                config.primary_channel,
                config.max_bonded_width,
                config.requires_handshake,
            ),
            correlator: ReceptionCorrelator::new(),
            timer: ReceptionWindowTimer::new(),
            split,
            split_mode: config.split_mode,
            state: EngineState::Idle,
            stats: EngineStats::default(),
        })
    }

    /// Change the primary channel. Drops the current window.
    pub fn set_primary_channel(&mut self, primary: ChannelId) -> Result<(), BondingError> {
        validate_primary(&self.topology, primary)?;
        validate_max_width(&self.topology, primary, self.session.max_width)?;

        self.timer.cancel(&mut self.scheduler);
        self.clear_window();
        self.session.primary = primary;
        self.session.requested_channel = Some(primary);
        self.session.requested_width = UNIT_WIDTH;
        Ok(())
    }

    /// Change the widest bonded channel the engine may use.
    ///
    /// A requested channel wider than the new limit is narrowed to the
    /// primary's ancestor of that width.
    pub fn set_max_bonded_width(&mut self, max_width: u32) -> Result<(), BondingError> {
        validate_max_width(&self.topology, self.session.primary, max_width)?;
        self.session.max_width = max_width;

        if self.session.requested_width > max_width {
            let narrowed = self
                .topology
                .ancestor_with_width(self.session.primary, max_width)
                .unwrap_or(self.session.primary);
            self.session.requested_channel = Some(narrowed);
            self.session.requested_width = self.topology.width_of(narrowed)?;
        }
        Ok(())
    }

    /// Turn reservation mode on or off
    pub fn set_requires_handshake(&mut self, requires_handshake: bool) {
        self.session.requires_handshake = requires_handshake;
    }

    /// Successful reception on `channel`.
    ///
    /// Records the frame in the current window and delivers a merged frame to
    /// the link layer once the receptions seen so far allow it.
    pub fn receive_ok(
        &mut self,
        channel: ChannelId,
        frame: Vec<u8>,
        signal: SignalInfo,
        tx: TxParameters,
        preamble: Preamble,
    ) -> Result<Reception, BondingError> {
        if !self.phys.contains_key(&channel) {
            return Err(BondingError::PhyNotBound(channel));
        }

        let captured = match Frame::peek_header(&frame) {
            Ok(captured) => captured,
            Err(e) => {
                self.stats.malformed_frames += 1;
                tracing::warn!(channel = %channel, "dropping unparseable reception: {e}");
                return Err(e.into());
            }
        };

        // A frame with an unreachable announced width never enters the window.
        let announced = if captured.is_aggregate && !self.session.requires_handshake {
            Some(self.resolve_channel_with_width(tx.channel_width)?)
        } else {
            None
        };

        self.stats.frames_received += 1;
        if self.state == EngineState::Idle {
            self.state = EngineState::Collecting;
        }
        self.record_reception(channel, frame, captured);

        let primary = self.session.primary;
        if captured.is_aggregate {
            if let Some(requested) = announced {
                self.session.requested_channel = Some(requested);
                self.session.requested_width = tx.channel_width;
            }

            let needed = (self.session.requested_width / UNIT_WIDTH) as usize;
            let before = self.correlator.window().len();
            let consistent = self.correlator.count_consistent(primary);
            self.stats.records_pruned += (before - self.correlator.window().len()) as u64;

            tracing::debug!(
                channel = %channel,
                consistent,
                needed,
                "aggregate sub-channel reception"
            );
            if needed > 0 && consistent == needed {
                return self.manage_received(captured, signal, tx, preamble);
            }
            Ok(Reception::Held)
        } else if captured.class().is_reservation() {
            if channel == primary || captured.destination() == self.link.address() {
                if !self.session.requires_handshake {
                    tracing::info!(
                        channel = %channel,
                        class = ?captured.class(),
                        "reservation exchange seen, switching to handshake width negotiation"
                    );
                }
                self.session.requires_handshake = true;
                self.state = EngineState::Handshake;
            }

            let resolved = self.refresh_requested_channel()?;
            tracing::debug!(
                channel = %channel,
                requested = ?resolved,
                width = self.session.requested_width,
                "reservation frame"
            );

            if channel == primary {
                return self.manage_received(captured, signal, tx, preamble);
            }
            Ok(Reception::Held)
        } else if channel == primary {
            self.manage_received(captured, signal, tx, preamble)
        } else {
            Ok(Reception::Held)
        }
    }

    /// Reception error on `channel`, handed to the link layer untouched
    pub fn receive_error(&mut self, channel: ChannelId, frame: Vec<u8>, signal: SignalInfo) {
        tracing::debug!(channel = %channel, len = frame.len(), "passing reception error up");
        self.link.deliver_error(frame, signal);
    }

    /// A scheduled timer fired. Returns `true` if it closed the window.
    pub fn on_timer(&mut self, handle: TimerHandle, event: TimerEvent) -> bool {
        match event {
            TimerEvent::WindowExpired => {
                if !self.timer.fire(handle) {
                    return false;
                }
                tracing::debug!(
                    records = self.correlator.window().len(),
                    "correlation window expired"
                );
                self.stats.windows_expired += 1;
                self.clear_window();
                true
            }
        }
    }

    /// Split `frame` over the current bonded channel and send each piece on
    /// its radio.
    ///
    /// In contention mode the channel is re-probed first. In reservation mode
    /// the channel from the last handshake resolution is used; if that found
    /// nothing, [`BondingError::NoBondedChannel`] is returned and nothing is
    /// sent.
    pub fn send(
        &mut self,
        frame: &[u8],
        tx: TxParameters,
        preamble: Preamble,
    ) -> Result<SendReport, BondingError> {
        self.state = EngineState::Sending;
        let result = self.send_split(frame, tx, preamble);
        self.split.clear();
        self.state = EngineState::Idle;
        result
    }

    fn send_split(
        &mut self,
        frame: &[u8],
        tx: TxParameters,
        preamble: Preamble,
    ) -> Result<SendReport, BondingError> {
        let channel = if self.session.requires_handshake {
            match self.session.requested_channel {
                Some(channel) => channel,
                None => {
                    self.stats.underruns += 1;
                    return Err(BondingError::NoBondedChannel);
                }
            }
        } else {
            self.refresh_requested_channel()?
                .ok_or(BondingError::NoBondedChannel)?
        };
        let width = self.session.requested_width;

        FrameSplitter::new(&self.topology, self.split_mode).split(
            frame,
            channel,
            &mut self.split,
        )?;
        self.clear_window();

        let tx = TxParameters {
            channel_width: width,
            ..tx
        };
        let pieces = self.split.take_pieces();
        let count = pieces.len();
        for (sub, piece) in pieces {
            let phy = self
                .phys
                .get_mut(&sub)
                .ok_or(BondingError::PhyNotBound(sub))?;
            phy.send(piece, tx, preamble);
        }

        self.stats.frames_sent += 1;
        self.stats.pieces_sent += count as u64;
        tracing::debug!(channel = %channel, width, pieces = count, "sent bonded frame");

        Ok(SendReport {
            channel,
            width,
            pieces: count,
        })
    }

    /// Resolve the bonded channel for the next transmission, updating the
    /// session. Reports [`BondingError::NoBondedChannel`] when reservation
    /// mode finds none; the caller decides whether to fall back or give up.
    pub fn usable_bonded_channel(&mut self) -> Result<ChannelId, BondingError> {
        self.refresh_requested_channel()?
            .ok_or(BondingError::NoBondedChannel)
    }

    fn refresh_requested_channel(&mut self) -> Result<Option<ChannelId>, BondingError> {
        let primary = self.session.primary;
        let max_width = self.session.max_width;

        let resolved = if self.session.requires_handshake {
            self.correlator
                .handshake_channel(&self.topology, primary, max_width)?
        } else {
            Some(
                IdleChannelProber::new(&self.topology, &self.phys)
                    .widest_idle_channel(primary, max_width)?,
            )
        };

        match resolved {
            Some(channel) => {
                self.session.requested_channel = Some(channel);
                self.session.requested_width = self.topology.width_of(channel)?;
            }
            None => {
                self.stats.underruns += 1;
                self.session.requested_channel = None;
                self.session.requested_width = 0;
            }
        }
        Ok(resolved)
    }

    /// Channel on the primary's path to the root whose width is `width`
    pub fn resolve_channel_with_width(&self, width: u32) -> Result<ChannelId, BondingError> {
        let primary = self.session.primary;
        let max_width = self.session.max_width;
        let unreachable = BondingError::WidthUnreachable {
            primary,
            width,
            max_width,
        };
        if width > max_width {
            return Err(unreachable);
        }
        self.topology
            .ancestor_with_width(primary, width)
            .ok_or(unreachable)
    }

    /// Store a reception. The first record of a window arms the expiry timer
    /// and every primary reception re-arms it, so no record outlives the gap.
    fn record_reception(&mut self, channel: ChannelId, frame: Vec<u8>, captured: CapturedHeader) {
        let opens_window = self.correlator.window().armed_at().is_none();
        self.correlator.record(channel, frame, captured);

        let on_primary = channel == self.session.primary;
        if on_primary {
            self.session.last_primary_header = Some(captured);
        }
        if on_primary || opens_window {
            let window = self.link.inter_frame_gap();
            self.timer.rearm(&mut self.scheduler, window);
            self.correlator.mark_armed(self.scheduler.now());
        }
    }

    fn manage_received(
        &mut self,
        trigger: CapturedHeader,
        signal: SignalInfo,
        tx: TxParameters,
        preamble: Preamble,
    ) -> Result<Reception, BondingError> {
        let primary = self.session.primary;
        let Some(record) = self.correlator.window().get(primary) else {
            return Ok(Reception::Held);
        };

        let merged = match (self.split_mode, trigger.is_aggregate, self.session.requested_channel) {
            (SplitMode::Prorated, true, Some(requested)) => {
                let sub_channels = FrameSplitter::new(&self.topology, self.split_mode)
                    .enumerate_sub_channels(requested)?;
                match self.correlator.reassemble(primary, &sub_channels)? {
                    Some(merged) => merged,
                    None => {
                        tracing::warn!(
                            requested = %requested,
                            "fragments missing, delivering primary fragment only"
                        );
                        record.frame.clone()
                    }
                }
            }
            _ => record.frame.clone(),
        };

        // Reservation frames keep the window open so the remaining
        // sub-channels can still correlate within this gap.
        if trigger.is_aggregate || !trigger.class().is_reservation() {
            self.clear_window();
        }

        self.stats.merges_delivered += 1;
        self.link.deliver(merged, signal, tx, preamble);
        Ok(Reception::Delivered)
    }

    /// Drop every reception record of the current window
    pub fn clear_window(&mut self) {
        self.correlator.clear();
        self.session.last_primary_header = None;
        if self.state != EngineState::Sending {
            self.state = EngineState::Idle;
        }
    }

    /// Whether every base channel under `channel` is idle
    pub fn is_fully_idle(&self, channel: ChannelId) -> Result<bool, BondingError> {
        IdleChannelProber::new(&self.topology, &self.phys).is_fully_idle(channel)
    }

    /// Widest fully idle channel above the primary, without touching the session
    pub fn find_widest_idle_bonded_channel(&self) -> Result<ChannelId, BondingError> {
        IdleChannelProber::new(&self.topology, &self.phys)
            .widest_idle_channel(self.session.primary, self.session.max_width)
    }

    /// Whether every base channel under `channel` holds a reception matching
    /// the primary's destination and class
    pub fn is_fully_correlated(&self, channel: ChannelId) -> Result<bool, BondingError> {
        Ok(self
            .correlator
            .is_fully_correlated(&self.topology, self.session.primary, channel)?)
    }

    /// Widest channel confirmed by the reservation exchange, without touching the session
    pub fn find_usable_bonded_channel_via_handshake(
        &self,
    ) -> Result<Option<ChannelId>, BondingError> {
        Ok(self.correlator.handshake_channel(
            &self.topology,
            self.session.primary,
            self.session.max_width,
        )?)
    }

    /// Count receptions consistent with the primary's, pruning the rest
    pub fn count_consistent_receptions(&mut self) -> usize {
        let before = self.correlator.window().len();
        let count = self.correlator.count_consistent(self.session.primary);
        self.stats.records_pruned += (before - self.correlator.window().len()) as u64;
        count
    }

    /// Base channels composing `channel`, low side first
    pub fn enumerate_sub_channels(&self, channel: ChannelId) -> Result<Vec<ChannelId>, BondingError> {
        Ok(FrameSplitter::new(&self.topology, self.split_mode).enumerate_sub_channels(channel)?)
    }

    /// On-air size of the largest piece `frame` becomes at the current width
    pub fn converted_size(&self, frame: &[u8]) -> Result<usize, BondingError> {
        Ok(FrameSplitter::new(&self.topology, self.split_mode)
            .converted_size(frame, self.session.requested_width)?)
    }

    /// Hand the radios back with bonded operation switched off
    pub fn into_phys(mut self) -> BTreeMap<ChannelId, P> {
        for phy in self.phys.values_mut() {
            phy.enable_bonding(false);
        }
        self.phys
    }

    pub fn session(&self) -> &BondingSession {
        &self.session
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn window(&self) -> &CorrelationWindow {
        self.correlator.window()
    }

    pub fn topology(&self) -> &ChannelTopology {
        &self.topology
    }

    pub fn primary_channel(&self) -> ChannelId {
        self.session.primary
    }

    pub fn max_bonded_width(&self) -> u32 {
        self.session.max_width
    }

    pub fn requested_channel(&self) -> Option<ChannelId> {
        self.session.requested_channel
    }

    pub fn requested_width(&self) -> u32 {
        self.session.requested_width
    }

    pub fn requires_handshake(&self) -> bool {
        self.session.requires_handshake
    }

    pub fn window_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn phy(&self, channel: ChannelId) -> Option<&P> {
        self.phys.get(&channel)
    }

    pub fn phy_mut(&mut self, channel: ChannelId) -> Option<&mut P> {
        self.phys.get_mut(&channel)
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }
}

fn validate_primary(topology: &ChannelTopology, primary: ChannelId) -> Result<(), BondingError> {
    if !topology.pair_of(primary)?.is_unit() {
        return Err(BondingError::InvalidConfig(format!(
            "primary channel {primary} is not a base channel"
        )));
    }
    Ok(())
}

fn validate_max_width(
    topology: &ChannelTopology,
    primary: ChannelId,
    max_width: u32,
) -> Result<(), BondingError> {
    if topology.ancestor_with_width(primary, max_width).is_none() {
        return Err(BondingError::InvalidConfig(format!(
            "no {max_width} MHz channel contains primary {primary}"
        )));
    }
    Ok(())
}
