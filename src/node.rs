//! # Sensor Node - Duty Cycle Driver
//!
//! A [`SensorNode`] owns everything one node needs: its configuration, the
//! radio, the optional upload path and frame log, the relay state and the
//! single frame buffer. All protocol work happens inside its methods, so the
//! frame buffer and the tables are only ever borrowed by one phase at a time.
//!
//! ```text
//! start ──▶ ┌─ transmit_sample ─┐
//!           │                   ▼
//!           └─── receive_cycle ◀┘   (duty_cycle, repeated by run)
//! ```

use embassy_time::{Duration, Timer};
use log::log;
use rand_core::SeedableRng;
use rand_wyrand::WyRand;

use crate::rx_handler::{listen, Heard};
use crate::tx_path::TxPath;
use crate::{
    Board, BusDevice, ConfigError, DataRegisters, DeliveryError, FrameKind, FrameLog, ListenWindow, NoFrameLog, NoUplink, NodeConfiguration, RadioChannel,
    RelayManager, RelayResult, RxOutcome, SensorLookup, SharedBus, TxReport, Uplink, Upstream, PROTOCOL_VERSION, RADIO_PACKET_SIZE,
};

/// Outcome of one duty cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DutyCycleReport {
    pub transmitted: Result<TxReport, DeliveryError>,
    pub received: RxOutcome,
}

/// One sensor node of the relay network
///
/// # Generic Parameters
/// * `R` - Radio device
/// * `U` - Upload client, unused when no upstream is configured
/// * `L` - Local frame log
pub struct SensorNode<'a, R: RadioChannel, U: Uplink = NoUplink, L: FrameLog = NoFrameLog> {
    config: NodeConfiguration,
    registers: DataRegisters<'a>,
    radio: R,
    upstream: Option<Upstream<'a, U>>,
    frame_log: Option<L>,
    bus: SharedBus,
    relay_manager: RelayManager,
    tx_path: TxPath,
    listen_window: ListenWindow,
    rng: WyRand,
    frame_buffer: [u8; RADIO_PACKET_SIZE],
    radio_ready: bool,
}

impl<'a, R: RadioChannel, U: Uplink, L: FrameLog> SensorNode<'a, R, U, L> {
    /// Creates a node; the radio is not touched until [`SensorNode::start`]
    ///
    /// # Arguments
    /// * `config` - Session constants
    /// * `registers` - Reading type of every payload slot
    /// * `radio` - Radio device
    /// * `upstream` - Upload path, `None` to send everything over the radio
    /// * `frame_log` - Local log, used only when there is no upstream
    /// * `rng_seed` - Seed of the listen window generator, should differ per node
    ///
    /// # Errors
    /// `ConfigError::InvalidListenWindow` if the configured window is empty
    pub fn new(
        config: NodeConfiguration,
        registers: DataRegisters<'a>,
        radio: R,
        upstream: Option<Upstream<'a, U>>,
        frame_log: Option<L>,
        rng_seed: u64,
    ) -> Result<Self, ConfigError> {
        let listen_window = config.listen_window()?;
        Ok(SensorNode {
            config,
            registers,
            radio,
            upstream,
            frame_log,
            bus: SharedBus::new(),
            relay_manager: RelayManager::with(config.node_id, config.network_id, PROTOCOL_VERSION, config.reset_threshold),
            tx_path: TxPath::with(config.node_id, config.network_id, config.retransmit_delay_ms),
            listen_window,
            rng: WyRand::seed_from_u64(rng_seed),
            frame_buffer: [0u8; RADIO_PACKET_SIZE],
            radio_ready: false,
        })
    }

    /// Initializes the radio, retrying until it comes up
    ///
    /// Nothing is sent or received before this returns.
    ///
    /// # Returns
    /// Number of init attempts it took
    pub async fn start(&mut self) -> u32 {
        let node_id = self.config.node_id;
        let retry_delay = Duration::from_millis(self.config.radio_init_retry_delay_ms);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = {
                let _lease = self.bus.activate(BusDevice::Radio).await;
                self.radio.init(&self.config.radio).await
            };
            match result {
                Ok(()) => break,
                Err(error) => {
                    log!(log::Level::Error, "[{}] Radio init failed ({}), attempt {}", node_id, error, attempts);
                    if retry_delay.as_ticks() > 0 {
                        Timer::after(retry_delay).await;
                    }
                }
            }
        }
        self.radio_ready = true;
        log!(
            log::Level::Info,
            "[{}] Node started on network {} at {} MHz{}",
            node_id,
            self.config.network_id,
            self.config.radio.frequency_mhz,
            if self.config.is_collector() { " as collector" } else { "" }
        );
        attempts
    }

    /// Samples the sensors and delivers a new local frame
    pub async fn transmit_sample<S, B>(&mut self, sensors: &mut S, board: &mut B) -> Result<TxReport, DeliveryError>
    where
        S: SensorLookup + ?Sized,
        B: Board + ?Sized,
    {
        let frame = self.tx_path.build_sample_frame(&self.registers, sensors, board);
        let route = self
            .tx_path
            .deliver(
                &frame,
                FrameKind::LocalSample,
                &mut self.frame_buffer,
                &mut self.radio,
                self.upstream.as_mut(),
                self.frame_log.as_mut(),
                &self.bus,
            )
            .await?;
        Ok(TxReport {
            sequence_id: frame.sequence_id,
            route,
        })
    }

    /// Listens for one randomized window and handles at most one frame
    pub async fn receive_cycle(&mut self) -> RxOutcome {
        let listen_ms = self.listen_window.draw(&mut self.rng);
        let heard = match listen(self.config.node_id, &mut self.radio, &mut self.frame_buffer, listen_ms, &self.bus).await {
            Ok(heard) => heard,
            Err(error) => return RxOutcome::RadioFailed(error),
        };

        let frame = match heard {
            Heard::Nothing => return RxOutcome::Timeout,
            Heard::Malformed(malformed) => return RxOutcome::Malformed(malformed),
            Heard::Frame(frame) => frame,
        };

        match self.relay_manager.evaluate(frame) {
            RelayResult::Reject(reason) => RxOutcome::Rejected(reason),
            RelayResult::Ack { lost } => RxOutcome::Acknowledged { lost },
            RelayResult::Relay(relayed) => {
                match self
                    .tx_path
                    .deliver(
                        &relayed,
                        FrameKind::Relay,
                        &mut self.frame_buffer,
                        &mut self.radio,
                        self.upstream.as_mut(),
                        self.frame_log.as_mut(),
                        &self.bus,
                    )
                    .await
                {
                    Ok(route) => RxOutcome::Relayed { frame: relayed, route },
                    Err(error) => RxOutcome::RelayFailed(error),
                }
            }
        }
    }

    /// One transmit pass followed by one receive pass
    pub async fn duty_cycle<S, B>(&mut self, sensors: &mut S, board: &mut B) -> DutyCycleReport
    where
        S: SensorLookup + ?Sized,
        B: Board + ?Sized,
    {
        let transmitted = self.transmit_sample(sensors, board).await;
        let received = self.receive_cycle().await;
        DutyCycleReport { transmitted, received }
    }

    /// Starts the node if needed and runs duty cycles forever
    pub async fn run<S, B>(&mut self, sensors: &mut S, board: &mut B) -> !
    where
        S: SensorLookup + ?Sized,
        B: Board + ?Sized,
    {
        if !self.radio_ready {
            self.start().await;
        }
        loop {
            let report = self.duty_cycle(sensors, board).await;
            log!(log::Level::Trace, "[{}] Duty cycle: {:?}", self.config.node_id, report);
        }
    }

    pub fn config(&self) -> &NodeConfiguration {
        &self.config
    }

    pub fn node_id(&self) -> u8 {
        self.config.node_id
    }

    pub fn is_started(&self) -> bool {
        self.radio_ready
    }

    pub fn relay_manager(&self) -> &RelayManager {
        &self.relay_manager
    }

    /// Last own sequence id heard back from a neighbour
    pub fn last_ack_sequence(&self) -> u32 {
        self.relay_manager.last_ack_sequence()
    }

    /// Sequence id of the most recent local sample
    pub fn last_sequence_id(&self) -> u32 {
        self.tx_path.last_sequence_id()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn upstream(&self) -> Option<&Upstream<'a, U>> {
        self.upstream.as_ref()
    }

    pub fn frame_log(&self) -> Option<&L> {
        self.frame_log.as_ref()
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }
}


#[cfg(all(test, feature = "std", feature = "radio-device-simulator"))]
mod network_tests {
    use super::*;
    use crate::radio_devices::simulator::{RadioDevice as SimRadio, SimulatedEther};
    use crate::sensors::StaticBoard;
    use crate::{DeliveryRoute, RejectReason, SensorRegistry};
    use futures::executor::block_on;

    type Node = SensorNode<'static, SimRadio>;

    fn node_on(ether: &mut SimulatedEther, node_id: u8) -> Node {
        let mut config = NodeConfiguration::new(node_id, 1);
        config.retransmit_delay_ms = 0;
        config.listen_window_min_ms = 1;
        config.listen_window_max_ms = 3;
        let mut node = SensorNode::new(config, DataRegisters::new(), ether.attach(node_id), None, None, node_id as u64).unwrap();
        block_on(node.start());
        node
    }

    fn board() -> StaticBoard {
        StaticBoard {
            battery_volts: 4.0,
            unix_time: 1_600_000_000,
        }
    }

    #[test]
    fn relayed_frame_comes_back_as_ack_and_stops() {
        let mut ether = SimulatedEther::new();
        let mut a = node_on(&mut ether, 2);
        let mut b = node_on(&mut ether, 3);
        let mut sensors: SensorRegistry<'_, 1> = SensorRegistry::new();

        block_on(async {
            let report = a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            assert_eq!(report.sequence_id, 1);
            assert_eq!(ether.deliver_pending(), 1);

            match b.receive_cycle().await {
                RxOutcome::Relayed { frame, route } => {
                    assert_eq!(frame.origin_id, 2);
                    assert_eq!(frame.sender_id, 3);
                    assert_eq!(frame.sequence_id, 1);
                    assert_eq!(route, DeliveryRoute::Radio);
                }
                other => panic!("Expected Relayed, got: {:?}", other),
            }
            assert_eq!(ether.deliver_pending(), 1);

            assert_eq!(a.receive_cycle().await, RxOutcome::Acknowledged { lost: 0 });
            assert_eq!(ether.deliver_pending(), 0);
        });
        assert_eq!(a.last_ack_sequence(), 1);
        assert_eq!(b.relay_manager().sequence_table().last_seen(2), Some(1));
    }

    #[test]
    fn frame_crosses_a_line_of_nodes_once() {
        let mut ether = SimulatedEther::new();
        let mut a = node_on(&mut ether, 2);
        let mut b = node_on(&mut ether, 3);
        let mut c = node_on(&mut ether, 4);
        ether.set_link(2, 4, false);
        let mut sensors: SensorRegistry<'_, 1> = SensorRegistry::new();

        block_on(async {
            a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            assert_eq!(ether.deliver_pending(), 1);

            assert!(matches!(b.receive_cycle().await, RxOutcome::Relayed { .. }));
            assert_eq!(ether.deliver_pending(), 2);

            match c.receive_cycle().await {
                RxOutcome::Relayed { frame, .. } => {
                    assert_eq!(frame.origin_id, 2);
                    assert_eq!(frame.sender_id, 4);
                }
                other => panic!("Expected Relayed, got: {:?}", other),
            }
            assert_eq!(a.receive_cycle().await, RxOutcome::Acknowledged { lost: 0 });
            assert_eq!(ether.deliver_pending(), 1);

            assert_eq!(
                b.receive_cycle().await,
                RxOutcome::Rejected(RejectReason::StaleSequence {
                    origin_id: 2,
                    sequence_id: 1,
                    last_seen: 1
                })
            );
            assert_eq!(ether.deliver_pending(), 0);
        });
    }

    #[test]
    fn lost_relays_show_up_in_the_next_ack() {
        let mut ether = SimulatedEther::new();
        let mut a = node_on(&mut ether, 2);
        let mut b = node_on(&mut ether, 3);
        let mut sensors: SensorRegistry<'_, 1> = SensorRegistry::new();

        block_on(async {
            ether.set_link(2, 3, false);
            a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            assert_eq!(ether.deliver_pending(), 0);

            ether.set_link(2, 3, true);
            a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            assert_eq!(ether.deliver_pending(), 1);
            assert!(matches!(b.receive_cycle().await, RxOutcome::Relayed { .. }));
            ether.deliver_pending();

            assert_eq!(a.receive_cycle().await, RxOutcome::Acknowledged { lost: 2 });
        });
    }

    #[test]
    fn rebooted_origin_is_relayed_again() {
        let mut ether = SimulatedEther::new();
        let mut b = node_on(&mut ether, 3);
        let mut sensors: SensorRegistry<'_, 1> = SensorRegistry::new();

        let mut a = node_on(&mut ether, 2);
        block_on(async {
            for _ in 0..10 {
                a.transmit_sample(&mut sensors, &mut board()).await.unwrap();
                ether.deliver_pending();
                assert!(matches!(b.receive_cycle().await, RxOutcome::Relayed { .. }));
            }
        });
        assert_eq!(b.relay_manager().sequence_table().last_seen(2), Some(10));

        let mut rebooted = node_on(&mut ether, 2);
        block_on(async {
            rebooted.transmit_sample(&mut sensors, &mut board()).await.unwrap();
            ether.deliver_pending();
            match b.receive_cycle().await {
                RxOutcome::Relayed { frame, .. } => assert_eq!(frame.sequence_id, 1),
                other => panic!("Expected Relayed, got: {:?}", other),
            }
        });
        assert_eq!(b.relay_manager().sequence_table().last_seen(2), Some(1));
    }
}
