use anyhow::Result;
use chanbond_core::control::BondingConfig;
use chanbond_core::frame::{Frame, FrameClass, MacAddress, MacHeader};
use chanbond_core::topology::ChannelId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const STATION: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const PEER: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);

fn default_station() -> MacAddress {
    STATION
}

fn default_sifs() -> Duration {
    Duration::from_micros(16)
}

fn default_tx_width() -> u32 {
    20
}

/// Scenario file: the link configuration plus a timeline of radio events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(flatten)]
    pub bonding: BondingConfig,

    /// Address of the simulated station
    #[serde(default = "default_station")]
    pub station: MacAddress,

    /// Inter-frame gap; also the correlation window length
    #[serde(default = "default_sifs", with = "humantime_serde")]
    pub sifs: Duration,

    /// Base channels whose medium starts out busy
    #[serde(default)]
    pub busy_channels: Vec<ChannelId>,

    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            bonding: BondingConfig::default(),
            station: default_station(),
            sifs: default_sifs(),
            busy_channels: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    /// Scenario written by `init-config`: a contention send with one busy
    /// channel, a reservation exchange that widens the link, and a bonded
    /// reception from the peer.
    pub fn example() -> Self {
        let all: Vec<ChannelId> = [36, 40, 44, 48, 52, 56, 60, 64]
            .into_iter()
            .map(ChannelId)
            .collect();
        Self {
            busy_channels: vec![ChannelId(60)],
            events: vec![
                ScenarioEvent::Send {
                    at: Duration::ZERO,
                    frame: FrameSpec::new(FrameClass::Data, PEER, STATION, "hello"),
                },
                ScenarioEvent::Receive {
                    at: Duration::from_micros(100),
                    channels: all.clone(),
                    frame: FrameSpec::new(FrameClass::Rts, STATION, PEER, ""),
                    tx_width: 160,
                },
                ScenarioEvent::Send {
                    at: Duration::from_micros(110),
                    frame: FrameSpec::new(FrameClass::Cts, PEER, STATION, ""),
                },
                ScenarioEvent::Receive {
                    at: Duration::from_micros(300),
                    channels: all,
                    frame: FrameSpec {
                        aggregate: true,
                        ..FrameSpec::new(FrameClass::QosData, STATION, PEER, "bonded payload")
                    },
                    tx_width: 160,
                },
                ScenarioEvent::ReceiveError {
                    at: Duration::from_micros(400),
                    channel: ChannelId(52),
                },
            ],
            ..Self::default()
        }
    }

    /// Events in time order; ties keep file order
    pub fn timeline(&self) -> Vec<&ScenarioEvent> {
        let mut events: Vec<&ScenarioEvent> = self.events.iter().collect();
        events.sort_by_key(|e| e.at());
        events
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    /// The same frame arrives on each listed base channel
    Receive {
        #[serde(with = "humantime_serde")]
        at: Duration,
        channels: Vec<ChannelId>,
        frame: FrameSpec,
        /// Width the transmitter announced, in MHz
        #[serde(default = "default_tx_width")]
        tx_width: u32,
    },

    /// A corrupted reception on one base channel
    ReceiveError {
        #[serde(with = "humantime_serde")]
        at: Duration,
        channel: ChannelId,
    },

    /// The link layer hands a frame down for transmission
    Send {
        #[serde(with = "humantime_serde")]
        at: Duration,
        frame: FrameSpec,
    },

    /// Medium on the listed base channels turns busy or idle
    SetBusy {
        #[serde(with = "humantime_serde")]
        at: Duration,
        channels: Vec<ChannelId>,
        busy: bool,
    },
}

impl ScenarioEvent {
    pub fn at(&self) -> Duration {
        match self {
            Self::Receive { at, .. }
            | Self::ReceiveError { at, .. }
            | Self::Send { at, .. }
            | Self::SetBusy { at, .. } => *at,
        }
    }
}

/// Frame description inside a scenario file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSpec {
    pub class: FrameClass,
    pub destination: MacAddress,
    pub originator: MacAddress,
    #[serde(default)]
    pub aggregate: bool,
    /// Payload as text
    #[serde(default)]
    pub payload: String,
}

impl FrameSpec {
    pub fn new(
        class: FrameClass,
        destination: MacAddress,
        originator: MacAddress,
        payload: &str,
    ) -> Self {
        Self {
            class,
            destination,
            originator,
            aggregate: false,
            payload: payload.to_string(),
        }
    }

    pub fn build(&self) -> Result<Frame> {
        let header = MacHeader::new(self.class, self.destination, self.originator);
        let payload = self.payload.as_bytes().to_vec();
        if self.aggregate {
            Ok(Frame::aggregated(header, payload)?)
        } else {
            Ok(Frame::new(header, payload))
        }
    }
}
