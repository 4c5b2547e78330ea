//! Idle probing of bonded channels.
//!
//! A bonded channel is usable for a contention-based transmission only when
//! every base channel underneath it is idle. The probe is read-only and stops
//! at the first busy branch.

use std::collections::BTreeMap;

use crate::engine::BondingError;
use crate::phy::SubChannelPhy;
use crate::topology::{ChannelId, ChannelTopology};

/// Read-only view over the topology and the per-channel radios
pub struct IdleChannelProber<'a, P> {
    topology: &'a ChannelTopology,
    phys: &'a BTreeMap<ChannelId, P>,
}

impl<'a, P: SubChannelPhy> IdleChannelProber<'a, P> {
    pub fn new(topology: &'a ChannelTopology, phys: &'a BTreeMap<ChannelId, P>) -> Self {
        Self { topology, phys }
    }

    /// Whether every base channel composing `channel` is idle
    pub fn is_fully_idle(&self, channel: ChannelId) -> Result<bool, BondingError> {
        match self.topology.children_of(channel)? {
            None => {
                let phy = self
                    .phys
                    .get(&channel)
                    .ok_or(BondingError::PhyNotBound(channel))?;
                Ok(phy.is_idle())
            }
            Some((low, high)) => Ok(self.is_fully_idle(low)? && self.is_fully_idle(high)?),
        }
    }

    /// Widest channel containing `primary` that is entirely idle and no wider
    /// than `max_width`. Falls back to `primary` itself.
    pub fn widest_idle_channel(
        &self,
        primary: ChannelId,
        max_width: u32,
    ) -> Result<ChannelId, BondingError> {
        self.topology
            .widest_ancestor(primary, max_width, |wider| self.is_fully_idle(wider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::{Preamble, TxParameters};
    use crate::topology::TopologyError;

    struct StubPhy {
        idle: bool,
    }

    impl SubChannelPhy for StubPhy {
        fn is_idle(&self) -> bool {
            self.idle
        }

        fn send(&mut self, _frame: Vec<u8>, _tx: TxParameters, _preamble: Preamble) {}

        fn bind_channel(&mut self, _channel: ChannelId) {}

        fn enable_bonding(&mut self, _enable: bool) {}
    }

    fn phys_with_busy(busy: &[u16]) -> BTreeMap<ChannelId, StubPhy> {
        ChannelTopology::standard()
            .base_channels()
            .map(|ch| {
                let idle = !busy.contains(&ch.number());
                (ch, StubPhy { idle })
            })
            .collect()
    }

    #[test]
    fn test_one_busy_leaf_blocks_every_ancestor() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[48]);
        let prober = IdleChannelProber::new(&topology, &phys);

        assert!(!prober.is_fully_idle(ChannelId(48)).unwrap());
        assert!(!prober.is_fully_idle(ChannelId(46)).unwrap());
        assert!(!prober.is_fully_idle(ChannelId(42)).unwrap());
        assert!(!prober.is_fully_idle(ChannelId(50)).unwrap());

        assert!(prober.is_fully_idle(ChannelId(38)).unwrap());
        assert!(prober.is_fully_idle(ChannelId(58)).unwrap());
    }

    #[test]
    fn test_all_idle() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[]);
        let prober = IdleChannelProber::new(&topology, &phys);

        for entry in topology.iter() {
            assert!(prober.is_fully_idle(entry.channel).unwrap());
        }
        assert_eq!(
            prober.widest_idle_channel(ChannelId(36), 160).unwrap(),
            ChannelId(50)
        );
    }

    #[test]
    fn test_widest_idle_stops_below_busy_branch() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[60]);
        let prober = IdleChannelProber::new(&topology, &phys);

        assert_eq!(
            prober.widest_idle_channel(ChannelId(36), 160).unwrap(),
            ChannelId(42)
        );
    }

    #[test]
    fn test_widest_idle_respects_max_width() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[]);
        let prober = IdleChannelProber::new(&topology, &phys);

        assert_eq!(
            prober.widest_idle_channel(ChannelId(44), 40).unwrap(),
            ChannelId(46)
        );
        assert_eq!(
            prober.widest_idle_channel(ChannelId(44), 20).unwrap(),
            ChannelId(44)
        );
    }

    #[test]
    fn test_widest_idle_falls_back_to_primary() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[40]);
        let prober = IdleChannelProber::new(&topology, &phys);

        assert_eq!(
            prober.widest_idle_channel(ChannelId(36), 160).unwrap(),
            ChannelId(36)
        );
    }

    #[test]
    fn test_unknown_channel_is_a_configuration_error() {
        let topology = ChannelTopology::standard();
        let phys = phys_with_busy(&[]);
        let prober = IdleChannelProber::new(&topology, &phys);

        assert!(matches!(
            prober.is_fully_idle(ChannelId(37)),
            Err(BondingError::Topology(TopologyError::UnknownChannel(_)))
        ));
    }

    #[test]
    fn test_missing_phy() {
        let topology = ChannelTopology::standard();
        let mut phys = phys_with_busy(&[]);
        phys.remove(&ChannelId(64));
        let prober = IdleChannelProber::new(&topology, &phys);

        assert!(matches!(
            prober.is_fully_idle(ChannelId(62)),
            Err(BondingError::PhyNotBound(ChannelId(64)))
        ));
    }
}
