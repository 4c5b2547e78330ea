//! Deterministic discrete-event collaborators.
//!
//! [`SimPhy`], [`SimLink`] and [`SimScheduler`] implement the collaborator
//! traits against a virtual clock. [`Simulation`] drives a [`BondingEngine`]
//! built from them: every call advances the clock, fires the timers that fell
//! due (in schedule order), and then performs the requested step. Receptions
//! sharing a timestamp are processed in ascending channel order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use crate::control::BondingConfig;
use crate::engine::{BondingEngine, BondingError, Reception, SendReport};
use crate::frame::MacAddress;
use crate::phy::{
    EventScheduler, LinkLayer, Preamble, SignalInfo, SubChannelPhy, TimerEvent, TimerHandle,
    TxParameters,
};
use crate::topology::{ChannelId, ChannelTopology};

/// Frame handed to a radio
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub frame: Vec<u8>,
    pub tx: TxParameters,
    pub preamble: Preamble,
}

/// Radio whose medium state is set by hand
#[derive(Debug, Clone)]
pub struct SimPhy {
    channel: Option<ChannelId>,
    idle: bool,
    bonding: bool,
    sent: Vec<SentFrame>,
}

impl SimPhy {
    pub fn new() -> Self {
        Self {
            channel: None,
            idle: true,
            bonding: false,
            sent: Vec::new(),
        }
    }

    pub fn set_idle(&mut self, idle: bool) {
        self.idle = idle;
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn bonding_enabled(&self) -> bool {
        self.bonding
    }

    pub fn sent(&self) -> &[SentFrame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }
}

impl Default for SimPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl SubChannelPhy for SimPhy {
    fn is_idle(&self) -> bool {
        self.idle
    }

    fn send(&mut self, frame: Vec<u8>, tx: TxParameters, preamble: Preamble) {
        self.sent.push(SentFrame {
            frame,
            tx,
            preamble,
        });
    }

    fn bind_channel(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
    }

    fn enable_bonding(&mut self, enable: bool) {
        self.bonding = enable;
    }
}

/// Merged frame handed to the link layer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub frame: Vec<u8>,
    pub signal: SignalInfo,
    pub tx: TxParameters,
    pub preamble: Preamble,
}

/// Link layer that records what it is given
#[derive(Debug, Clone)]
pub struct SimLink {
    address: MacAddress,
    sifs: Duration,
    delivered: Vec<Delivery>,
    errors: Vec<Vec<u8>>,
}

impl SimLink {
    pub fn new(address: MacAddress, sifs: Duration) -> Self {
        Self {
            address,
            sifs,
            delivered: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn delivered(&self) -> &[Delivery] {
        &self.delivered
    }

    pub fn errors(&self) -> &[Vec<u8>] {
        &self.errors
    }
}

impl LinkLayer for SimLink {
    fn deliver(&mut self, frame: Vec<u8>, signal: SignalInfo, tx: TxParameters, preamble: Preamble) {
        self.delivered.push(Delivery {
            frame,
            signal,
            tx,
            preamble,
        });
    }

    fn deliver_error(&mut self, frame: Vec<u8>, _signal: SignalInfo) {
        self.errors.push(frame);
    }

    fn inter_frame_gap(&self) -> Duration {
        self.sifs
    }

    fn address(&self) -> MacAddress {
        self.address
    }
}

/// Virtual clock with a timer queue
#[derive(Debug, Default)]
pub struct SimScheduler {
    now: Duration,
    next_id: u64,
    queue: BinaryHeap<Reverse<(Duration, u64)>>,
    pending: HashMap<u64, TimerEvent>,
}

impl SimScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the earliest live timer due at or before `until`, moving the clock
    /// to its deadline.
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerHandle, TimerEvent)> {
        while let Some(Reverse((at, id))) = self.queue.peek().copied() {
            if at > until {
                return None;
            }
            self.queue.pop();
            if let Some(event) = self.pending.remove(&id) {
                self.now = self.now.max(at);
                return Some((TimerHandle(id), event));
            }
        }
        None
    }

    /// Move the clock forward to `to` (never backward)
    pub fn advance_clock(&mut self, to: Duration) {
        self.now = self.now.max(to);
    }

    /// Number of timers scheduled and not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl EventScheduler for SimScheduler {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.queue.push(Reverse((self.now + delay, id)));
        self.pending.insert(id, event);
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle.0);
    }
}

/// Engine wired to the simulated collaborators
pub type SimEngine = BondingEngine<SimPhy, SimLink, SimScheduler>;

/// Time-ordered driver around a [`SimEngine`]
pub struct Simulation {
    engine: SimEngine,
}

impl Simulation {
    /// Simulation over the standard 5 GHz topology
    pub fn new(
        config: &BondingConfig,
        address: MacAddress,
        sifs: Duration,
    ) -> Result<Self, BondingError> {
        Self::with_topology(config, ChannelTopology::standard(), address, sifs)
    }

    pub fn with_topology(
        config: &BondingConfig,
        topology: ChannelTopology,
        address: MacAddress,
        sifs: Duration,
    ) -> Result<Self, BondingError> {
        let phys: Vec<(ChannelId, SimPhy)> = topology
            .base_channels()
            .map(|ch| (ch, SimPhy::new()))
            .collect();
        let engine = BondingEngine::new(
            config,
            topology,
            phys,
            SimLink::new(address, sifs),
            SimScheduler::new(),
        )?;
        Ok(Self { engine })
    }

    pub fn now(&self) -> Duration {
        self.engine.scheduler().now()
    }

    /// Fire every timer due at or before `at`, then move the clock to `at`.
    /// Returns the number of timers fired.
    pub fn advance_to(&mut self, at: Duration) -> usize {
        let mut fired = 0;
        while let Some((handle, event)) = self.engine.scheduler_mut().pop_due(at) {
            self.engine.on_timer(handle, event);
            fired += 1;
        }
        self.engine.scheduler_mut().advance_clock(at);
        fired
    }

    /// Deliver a successful reception on `channel` at time `at`
    pub fn receive_at(
        &mut self,
        at: Duration,
        channel: ChannelId,
        frame: Vec<u8>,
        tx: TxParameters,
    ) -> Result<Reception, BondingError> {
        self.advance_to(at);
        self.engine
            .receive_ok(channel, frame, SignalInfo::default(), tx, Preamble::default())
    }

    /// Deliver the same frame on several channels at time `at`, in ascending
    /// channel order. Stops at the first error.
    pub fn receive_all_at(
        &mut self,
        at: Duration,
        channels: &[ChannelId],
        frame: &[u8],
        tx: TxParameters,
    ) -> Result<Vec<Reception>, BondingError> {
        let mut ordered = channels.to_vec();
        ordered.sort();
        ordered.dedup();
        ordered
            .into_iter()
            .map(|channel| self.receive_at(at, channel, frame.to_vec(), tx))
            .collect()
    }

    /// Deliver a reception error on `channel` at time `at`
    pub fn receive_error_at(&mut self, at: Duration, channel: ChannelId, frame: Vec<u8>) {
        self.advance_to(at);
        self.engine
            .receive_error(channel, frame, SignalInfo::default());
    }

    /// Send `frame` at time `at`
    pub fn send_at(
        &mut self,
        at: Duration,
        frame: &[u8],
        tx: TxParameters,
    ) -> Result<SendReport, BondingError> {
        self.advance_to(at);
        self.engine.send(frame, tx, Preamble::default())
    }

    /// Mark the medium on a base channel busy or idle
    pub fn set_busy(&mut self, channel: ChannelId, busy: bool) -> Result<(), BondingError> {
        self.engine
            .phy_mut(channel)
            .ok_or(BondingError::PhyNotBound(channel))?
            .set_idle(!busy);
        Ok(())
    }

    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SimEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> SimEngine {
        self.engine
    }

    pub fn delivered(&self) -> &[Delivery] {
        self.engine.link().delivered()
    }
}
