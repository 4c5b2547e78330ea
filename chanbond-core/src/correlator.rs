//! Cross-channel reception correlation.
//!
//! Receptions arriving on different base channels within one correlation
//! window are candidates for the same logical frame. This module keeps the
//! per-channel records of the current window and decides which of them are
//! mutually consistent with the primary channel's reception.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::frame::{CapturedHeader, Frame, FrameError};
use crate::topology::{ChannelId, ChannelTopology, TopologyError};

/// Last reception seen on one base channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionRecord {
    /// Received frame bytes
    pub frame: Vec<u8>,
    /// Header captured at reception time
    pub header: CapturedHeader,
}

/// Reception records of the current window
#[derive(Debug, Clone, Default)]
pub struct CorrelationWindow {
    records: BTreeMap<ChannelId, ReceptionRecord>,
    armed_at: Option<Duration>,
}

impl CorrelationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: ChannelId) -> Option<&ReceptionRecord> {
        self.records.get(&channel)
    }

    pub fn has_reception(&self, channel: ChannelId) -> bool {
        self.records.contains_key(&channel)
    }

    /// Channels holding a record, in ascending order
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Time the window timer was last armed, if it was armed since the last clear
    pub fn armed_at(&self) -> Option<Duration> {
        self.armed_at
    }
}

/// Owner of the correlation window
#[derive(Debug, Default)]
pub struct ReceptionCorrelator {
    window: CorrelationWindow,
}

impl ReceptionCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> &CorrelationWindow {
        &self.window
    }

    /// Store (or overwrite) the record for `channel`
    pub fn record(&mut self, channel: ChannelId, frame: Vec<u8>, header: CapturedHeader) {
        self.window
            .records
            .insert(channel, ReceptionRecord { frame, header });
    }

    /// Note that the window timer was (re)armed at `now`
    pub fn mark_armed(&mut self, now: Duration) {
        self.window.armed_at = Some(now);
    }

    /// Drop every record and the arming time together
    pub fn clear(&mut self) {
        self.window = CorrelationWindow::new();
    }

    /// Whether every base channel under `channel` holds a reception addressed
    /// like the primary's, with the same frame class.
    pub fn is_fully_correlated(
        &self,
        topology: &ChannelTopology,
        primary: ChannelId,
        channel: ChannelId,
    ) -> Result<bool, TopologyError> {
        match topology.children_of(channel)? {
            None => {
                let (Some(record), Some(reference)) =
                    (self.window.get(channel), self.window.get(primary))
                else {
                    return Ok(false);
                };
                Ok(record.header.destination() == reference.header.destination()
                    && record.header.class() == reference.header.class())
            }
            Some((low, high)) => Ok(self.is_fully_correlated(topology, primary, low)?
                && self.is_fully_correlated(topology, primary, high)?),
        }
    }

    /// Widest channel over which a reservation exchange was heard on every
    /// base channel, climbing from `primary` but no wider than `max_width`.
    ///
    /// Returns `None` when not even the primary holds a correlated reception.
    pub fn handshake_channel(
        &self,
        topology: &ChannelTopology,
        primary: ChannelId,
        max_width: u32,
    ) -> Result<Option<ChannelId>, TopologyError> {
        if !self.is_fully_correlated(topology, primary, primary)? {
            return Ok(None);
        }
        let channel = topology.widest_ancestor(primary, max_width, |wider| {
            self.is_fully_correlated(topology, primary, wider)
        })?;
        Ok(Some(channel))
    }

    /// Count receptions consistent with the primary's and prune the rest.
    ///
    /// A record is consistent when its aggregate flag, originator and frame
    /// class all equal the primary record's. Inconsistent records are removed
    /// from the window. The primary itself is counted. Without a primary
    /// record nothing is pruned and the count is zero.
    pub fn count_consistent(&mut self, primary: ChannelId) -> usize {
        let Some(reference) = self.window.get(primary).map(|r| r.header) else {
            return 0;
        };

        self.window.records.retain(|channel, record| {
            let consistent = record.header.is_aggregate == reference.is_aggregate
                && record.header.originator() == reference.originator()
                && record.header.class() == reference.class();
            if !consistent {
                tracing::debug!(
                    channel = %channel,
                    originator = %record.header.originator(),
                    class = ?record.header.class(),
                    "pruning reception inconsistent with primary"
                );
            }
            consistent
        });

        self.window.records.len()
    }

    /// Rebuild one frame from the payload fragments held on `sub_channels`,
    /// in the given order, under the headers of the `primary` record.
    ///
    /// Returns `None` if any of the sub-channels has no record.
    pub fn reassemble(
        &self,
        primary: ChannelId,
        sub_channels: &[ChannelId],
    ) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(reference) = self.window.get(primary) else {
            return Ok(None);
        };

        let mut payload = Vec::new();
        for channel in sub_channels {
            let Some(record) = self.window.get(*channel) else {
                return Ok(None);
            };
            payload.extend_from_slice(&Frame::decode(&record.frame)?.payload);
        }

        let merged = Frame::decode(&reference.frame)?.with_payload(payload)?;
        Ok(Some(merged.encode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameClass, MacAddress, MacHeader};

    const A: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x0A]);
    const B: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x0B]);
    const ME: MacAddress = MacAddress([0x02, 0, 0, 0, 0, 0x01]);

    fn ch(n: u16) -> ChannelId {
        ChannelId(n)
    }

    fn record(
        correlator: &mut ReceptionCorrelator,
        channel: u16,
        class: FrameClass,
        destination: MacAddress,
        originator: MacAddress,
        aggregate: bool,
    ) {
        let header = MacHeader::new(class, destination, originator);
        let frame = if aggregate {
            Frame::aggregated(header, vec![channel as u8; 4]).unwrap()
        } else {
            Frame::new(header, vec![channel as u8; 4])
        };
        correlator.record(
            ch(channel),
            frame.encode(),
            CapturedHeader {
                header,
                is_aggregate: aggregate,
            },
        );
    }

    #[test]
    fn test_inconsistent_originator_is_pruned() {
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 36, FrameClass::Data, ME, A, false);
        record(&mut correlator, 40, FrameClass::Data, ME, B, false);

        assert_eq!(correlator.count_consistent(ch(36)), 1);
        assert!(correlator.window().has_reception(ch(36)));
        assert!(!correlator.window().has_reception(ch(40)));
    }

    #[test]
    fn test_aggregate_flag_and_class_must_match() {
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 36, FrameClass::QosData, ME, A, true);
        record(&mut correlator, 40, FrameClass::QosData, ME, A, true);
        record(&mut correlator, 44, FrameClass::QosData, ME, A, false);
        record(&mut correlator, 48, FrameClass::Data, ME, A, true);

        assert_eq!(correlator.count_consistent(ch(36)), 2);
        let left: Vec<ChannelId> = correlator.window().channels().collect();
        assert_eq!(left, vec![ch(36), ch(40)]);
    }

    #[test]
    fn test_count_without_primary_is_zero_and_keeps_records() {
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 40, FrameClass::Data, ME, A, true);
        record(&mut correlator, 44, FrameClass::Data, ME, B, true);

        assert_eq!(correlator.count_consistent(ch(36)), 0);
        assert_eq!(correlator.window().len(), 2);
    }

    #[test]
    fn test_fully_correlated_across_all_channels() {
        let topology = ChannelTopology::standard();
        let mut correlator = ReceptionCorrelator::new();
        for channel in [36, 40, 44, 48, 52, 56, 60, 64] {
            record(&mut correlator, channel, FrameClass::Rts, ME, A, false);
        }

        assert!(correlator.is_fully_correlated(&topology, ch(36), ch(50)).unwrap());
        assert_eq!(
            correlator.handshake_channel(&topology, ch(36), 160).unwrap(),
            Some(ch(50))
        );
        assert_eq!(
            correlator.handshake_channel(&topology, ch(36), 80).unwrap(),
            Some(ch(42))
        );
    }

    #[test]
    fn test_correlation_requires_matching_destination() {
        let topology = ChannelTopology::standard();
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 36, FrameClass::Rts, ME, A, false);
        record(&mut correlator, 40, FrameClass::Rts, ME, A, false);
        record(&mut correlator, 44, FrameClass::Rts, ME, A, false);
        record(&mut correlator, 48, FrameClass::Rts, B, A, false);

        assert!(correlator.is_fully_correlated(&topology, ch(36), ch(38)).unwrap());
        assert!(!correlator.is_fully_correlated(&topology, ch(36), ch(46)).unwrap());
        assert_eq!(
            correlator.handshake_channel(&topology, ch(36), 160).unwrap(),
            Some(ch(38))
        );
    }

    #[test]
    fn test_handshake_channel_without_primary() {
        let topology = ChannelTopology::standard();
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 40, FrameClass::Cts, ME, A, false);

        assert!(!correlator.is_fully_correlated(&topology, ch(36), ch(40)).unwrap());
        assert_eq!(
            correlator.handshake_channel(&topology, ch(36), 160).unwrap(),
            None
        );
    }

    #[test]
    fn test_clear_resets_records_and_arm_time() {
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 36, FrameClass::Data, ME, A, false);
        correlator.mark_armed(Duration::from_micros(5));
        assert_eq!(correlator.window().armed_at(), Some(Duration::from_micros(5)));

        correlator.clear();
        assert!(correlator.window().is_empty());
        assert_eq!(correlator.window().armed_at(), None);
    }

    #[test]
    fn test_reassemble_in_sub_channel_order() {
        let mut correlator = ReceptionCorrelator::new();
        record(&mut correlator, 44, FrameClass::QosData, ME, A, true);
        record(&mut correlator, 48, FrameClass::QosData, ME, A, true);

        let merged = correlator
            .reassemble(ch(44), &[ch(44), ch(48)])
            .unwrap()
            .unwrap();
        let frame = Frame::decode(&merged).unwrap();
        assert_eq!(frame.payload, vec![44, 44, 44, 44, 48, 48, 48, 48]);
        assert_eq!(frame.aggregate.unwrap().mpdu_len as usize, MacHeader::SIZE + 8);

        assert_eq!(correlator.reassemble(ch(44), &[ch(44), ch(52)]).unwrap(), None);
    }
}
