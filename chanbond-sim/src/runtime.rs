use anyhow::{Context, Result};
use chanbond_core::control::EngineStats;
use chanbond_core::engine::{BondingError, Reception};
use chanbond_core::frame::Frame;
use chanbond_core::phy::TxParameters;
use chanbond_core::sim::Simulation;
use chanbond_core::topology::ChannelId;

use crate::scenario::{ScenarioConfig, ScenarioEvent};

pub type LogFn = Box<dyn Fn(String) + Send + Sync + 'static>;

/// What a finished scenario produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Merged frames handed to the link layer
    pub delivered: usize,
    /// Reception errors passed through
    pub errors: usize,
    /// Bonded channel and piece count per successful send
    pub sends: Vec<(ChannelId, usize)>,
    /// Sends abandoned for lack of a bonded channel
    pub aborted_sends: usize,
    pub stats: EngineStats,
}

pub fn run_scenario(cfg: &ScenarioConfig, log: LogFn) -> Result<RunSummary> {
    let mut sim = Simulation::new(&cfg.bonding, cfg.station, cfg.sifs)
        .context("failed to build bonding engine from scenario config")?;

    (log.as_ref())(format!(
        "Scenario starting: station={} primary={} max_width={} split_mode={:?} handshake={} sifs={:?}",
        cfg.station,
        cfg.bonding.primary_channel,
        cfg.bonding.max_bonded_width,
        cfg.bonding.split_mode,
        cfg.bonding.requires_handshake,
        cfg.sifs
    ));

    for &channel in &cfg.busy_channels {
        sim.set_busy(channel, true)
            .with_context(|| format!("busy_channels lists unknown base channel {channel}"))?;
    }

    let mut summary = RunSummary::default();

    for event in cfg.timeline() {
        match event {
            ScenarioEvent::Receive {
                at,
                channels,
                frame,
                tx_width,
            } => {
                let wire = frame.build().context("invalid frame in receive event")?.encode();
                let tx = TxParameters {
                    channel_width: *tx_width,
                    ..TxParameters::default()
                };
                let outcome = sim
                    .receive_all_at(*at, channels, &wire, tx)
                    .with_context(|| format!("receive event at {at:?} failed"))?;
                let merged = outcome
                    .iter()
                    .filter(|r| **r == Reception::Delivered)
                    .count();
                (log.as_ref())(format!(
                    "[{at:?}] recv {:?} on {} channel(s): {merged} delivered, window now {:?}",
                    frame.class,
                    outcome.len(),
                    sim.engine().window().channels().collect::<Vec<_>>()
                ));
            }
            ScenarioEvent::ReceiveError { at, channel } => {
                sim.receive_error_at(*at, *channel, Vec::new());
                (log.as_ref())(format!("[{at:?}] recv error on {channel}"));
            }
            ScenarioEvent::Send { at, frame } => {
                let wire = frame.build().context("invalid frame in send event")?.encode();
                match sim.send_at(*at, &wire, TxParameters::default()) {
                    Ok(report) => {
                        (log.as_ref())(format!(
                            "[{at:?}] sent {:?} on {} ({} MHz, {} piece(s))",
                            frame.class, report.channel, report.width, report.pieces
                        ));
                        summary.sends.push((report.channel, report.pieces));
                    }
                    Err(BondingError::NoBondedChannel) => {
                        (log.as_ref())(format!(
                            "[{at:?}] send of {:?} abandoned: no bonded channel",
                            frame.class
                        ));
                        summary.aborted_sends += 1;
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("send event at {at:?} failed"));
                    }
                }
            }
            ScenarioEvent::SetBusy { at, channels, busy } => {
                sim.advance_to(*at);
                for &channel in channels {
                    sim.set_busy(channel, *busy)
                        .with_context(|| format!("set_busy lists unknown base channel {channel}"))?;
                }
                (log.as_ref())(format!("[{at:?}] busy={busy} on {channels:?}"));
            }
        }
    }

    // Let the last correlation window run out.
    let end = sim.now() + cfg.sifs;
    let expired = sim.advance_to(end);
    if expired > 0 {
        (log.as_ref())(format!("[{end:?}] {expired} window timer(s) expired"));
    }

    let engine = sim.engine();
    for delivery in engine.link().delivered() {
        match Frame::decode(&delivery.frame) {
            Ok(frame) => (log.as_ref())(format!(
                "Delivered {:?} from {} ({} bytes payload, {} MHz)",
                frame.header.class,
                frame.header.originator,
                frame.payload.len(),
                delivery.tx.channel_width
            )),
            Err(e) => (log.as_ref())(format!("Delivered undecodable frame: {e}")),
        }
    }

    summary.delivered = engine.link().delivered().len();
    summary.errors = engine.link().errors().len();
    summary.stats = engine.stats().clone();

    (log.as_ref())(format!("Scenario finished: {:?}", summary.stats));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::FrameSpec;
    use chanbond_core::frame::{FrameClass, MacAddress};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn quiet() -> LogFn {
        Box::new(|_| {})
    }

    #[test]
    fn test_example_scenario() {
        let summary = run_scenario(&ScenarioConfig::example(), quiet()).unwrap();

        // Contention stops below the busy channel; the handshake then opens 160 MHz.
        assert_eq!(summary.sends, vec![(ChannelId(42), 4), (ChannelId(50), 8)]);
        assert_eq!(summary.aborted_sends, 0);
        // The RTS on the primary and the merged aggregate.
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.stats.frames_sent, 2);
        assert_eq!(summary.stats.pieces_sent, 12);
        assert_eq!(summary.stats.frames_received, 16);
    }

    #[test]
    fn test_reservation_missing_on_primary_aborts_send() {
        let mut cfg = ScenarioConfig::default();
        let peer = MacAddress::new([2, 0, 0, 0, 0, 9]);
        cfg.events = vec![
            ScenarioEvent::Receive {
                at: Duration::ZERO,
                channels: vec![ChannelId(40)],
                frame: FrameSpec::new(FrameClass::Rts, cfg.station, peer, ""),
                tx_width: 20,
            },
            ScenarioEvent::Send {
                at: Duration::from_micros(5),
                frame: FrameSpec::new(FrameClass::Cts, peer, cfg.station, ""),
            },
        ];

        let summary = run_scenario(&cfg, quiet()).unwrap();
        assert!(summary.sends.is_empty());
        assert_eq!(summary.aborted_sends, 1);
        assert_eq!(summary.stats.frames_sent, 0);
    }

    #[test]
    fn test_set_busy_narrows_later_sends() {
        let mut cfg = ScenarioConfig::default();
        let frame = FrameSpec::new(FrameClass::Data, MacAddress::BROADCAST, cfg.station, "x");
        cfg.events = vec![
            ScenarioEvent::Send {
                at: Duration::from_micros(50),
                frame: frame.clone(),
            },
            ScenarioEvent::SetBusy {
                at: Duration::from_micros(10),
                channels: vec![ChannelId(40)],
                busy: true,
            },
            ScenarioEvent::Send {
                at: Duration::ZERO,
                frame,
            },
        ];

        let summary = run_scenario(&cfg, quiet()).unwrap();
        assert_eq!(summary.sends, vec![(ChannelId(50), 8), (ChannelId(36), 1)]);
    }

    #[test]
    fn test_unknown_busy_channel_is_rejected() {
        let cfg = ScenarioConfig {
            busy_channels: vec![ChannelId(38)],
            ..ScenarioConfig::default()
        };
        let err = run_scenario(&cfg, quiet()).unwrap_err();
        assert!(err.to_string().contains("busy_channels"));
    }

    #[test]
    fn test_log_lines_are_emitted() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        run_scenario(
            &ScenarioConfig::example(),
            Box::new(move |m| sink.lock().unwrap().push(m)),
        )
        .unwrap();

        let lines = lines.lock().unwrap();
        assert!(lines.first().unwrap().starts_with("Scenario starting"));
        assert!(lines.last().unwrap().starts_with("Scenario finished"));
    }
}
