//! Core library for dynamic channel bonding.
//!
//! This library decides, per transmission opportunity, which contiguous set of
//! base channels a multi-channel radio link should bond together; splits
//! outgoing frames across that set; and merges receptions that arrive on
//! several base channels at once into a single delivery for the link layer.
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - `topology`: Static channel tree (channel -> sibling, width)
//! - `frame`: Frame layout and header inspection
//! - `phy`: Interfaces of the radios, the link layer and the clock
//! - `prober`: Recursive idle probing of bonded channels
//! - `correlator`: Reception records, cross-channel consistency and pruning
//! - `splitter`: Sub-channel enumeration and outgoing frame splitting
//! - `timer`: The correlation window timer
//! - `engine`: The bonding decision state machine
//! - `control`: Configuration and counters
//! - `sim`: Deterministic collaborators for tests and scenario runs
//!
//! # Example
//!
//! ```
//! use chanbond_core::control::BondingConfig;
//! use chanbond_core::frame::{Frame, FrameClass, MacAddress, MacHeader};
//! use chanbond_core::phy::TxParameters;
//! use chanbond_core::sim::Simulation;
//! use chanbond_core::topology::ChannelId;
//! use std::time::Duration;
//!
//! let me = MacAddress::new([2, 0, 0, 0, 0, 1]);
//! let mut sim = Simulation::new(&BondingConfig::default(), me, Duration::from_micros(16)).unwrap();
//!
//! // Everything idle: a 160 MHz transmission over all eight base channels.
//! let frame = Frame::new(MacHeader::new(FrameClass::Data, MacAddress::BROADCAST, me), vec![0; 64]);
//! let report = sim.send_at(Duration::ZERO, &frame.encode(), TxParameters::default()).unwrap();
//! assert_eq!(report.channel, ChannelId::new(50));
//! assert_eq!(report.pieces, 8);
//! ```

pub mod control;
pub mod correlator;
pub mod engine;
pub mod frame;
pub mod phy;
pub mod prober;
pub mod sim;
pub mod splitter;
pub mod timer;
pub mod topology;

pub use engine::{BondingEngine, BondingError, EngineState, Reception, SendReport};
pub use frame::{Frame, FrameClass, MacAddress, MacHeader};
pub use topology::{ChannelId, ChannelTopology};
