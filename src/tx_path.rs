//! # Transmit Path - Frame Assembly and Delivery
//!
//! Local samples get the next sequence id of this node and their payload from
//! the data registers. Every outbound frame, local or relayed, then runs
//! through the same delivery chain:
//!
//! ```text
//! no upstream? ──▶ append CSV line to the frame log
//!      │
//! upstream? ──▶ post ── accepted ──▶ done (Uplink)
//!      │            └── rejected ─┐
//!      ▼                          ▼
//!   [relay: wait retransmit delay] ──▶ radio broadcast ──▶ done (Radio)
//! ```
//!
//! Only a failed radio broadcast is an error, and it is never retried. Each
//! device is activated under its own lease of the shared bus.

use embassy_time::{Duration, Timer};
use log::log;

use crate::messages::hundredths_from_f32;
use crate::{
    Board, BusDevice, DataRegisters, FrameLog, LogLine, RadioChannel, RadioError, SensorFrame, SensorLookup, SharedBus, Uplink,
    Upstream, PROTOCOL_VERSION,
};

/// Origin of an outbound frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Sample created by this node
    LocalSample,
    /// Accepted foreign frame going out again
    Relay,
}

/// Transport that carried a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryRoute {
    Uplink,
    Radio,
}

/// Delivery failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The radio broadcast, the last resort, failed
    Radio(RadioError),
}

impl core::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DeliveryError::Radio(error) => write!(f, "delivery failed: {}", error),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeliveryError {}

/// Result of one local sample transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReport {
    pub sequence_id: u32,
    pub route: DeliveryRoute,
}

/// Outbound state of one node
pub struct TxPath {
    node_id: u8,
    network_id: u8,
    next_sequence_id: u32,
    retransmit_delay: Duration,
}

impl TxPath {
    /// Creates a transmit path whose first sample gets sequence id 1
    pub const fn with(node_id: u8, network_id: u8, retransmit_delay_ms: u64) -> Self {
        TxPath {
            node_id,
            network_id,
            next_sequence_id: 0,
            retransmit_delay: Duration::from_millis(retransmit_delay_ms),
        }
    }

    /// Sequence id of the most recent local sample, 0 before the first one
    pub fn last_sequence_id(&self) -> u32 {
        self.next_sequence_id
    }

    pub fn retransmit_delay(&self) -> Duration {
        self.retransmit_delay
    }

    /// Takes the next local sequence id
    ///
    /// Ids are not persisted; a rebooted node starts at 1 again and its
    /// neighbours recover through the sequence reset heuristic.
    pub fn assign_sequence_id(&mut self) -> u32 {
        self.next_sequence_id = self.next_sequence_id.wrapping_add(1);
        self.next_sequence_id
    }

    /// Builds the next local sample frame
    ///
    /// Sender and origin are this node, the battery level is stored in
    /// hundredths of a volt.
    pub fn build_sample_frame<L, B>(&mut self, registers: &DataRegisters<'_>, sensors: &mut L, board: &mut B) -> SensorFrame
    where
        L: SensorLookup + ?Sized,
        B: Board + ?Sized,
    {
        let sequence_id = self.assign_sequence_id();
        let payload = registers.read_all(sensors);
        let frame = SensorFrame::new_sample(
            PROTOCOL_VERSION,
            self.network_id,
            self.node_id,
            sequence_id,
            hundredths_from_f32(board.battery_level()),
            board.unix_time(),
            payload,
        );
        log!(log::Level::Debug, "[{}] Built frame {}.{}: {:?}", self.node_id, self.node_id, sequence_id, frame.payload);
        frame
    }

    /// Runs the delivery chain for one frame
    ///
    /// # Arguments
    /// * `frame` - Frame to deliver
    /// * `kind` - Relayed frames wait the retransmit delay before the radio
    /// * `buffer` - Frame buffer of the node, at least `SENSOR_FRAME_SIZE` long
    /// * `upstream` - Upload path, `None` if no endpoint is configured
    /// * `frame_log` - Local log, written only when there is no upstream
    ///
    /// # Errors
    /// `DeliveryError::Radio` if the frame ended up on the radio and the send failed
    #[allow(clippy::too_many_arguments)]
    pub async fn deliver<R, U, L>(
        &self,
        frame: &SensorFrame,
        kind: FrameKind,
        buffer: &mut [u8],
        radio: &mut R,
        upstream: Option<&mut Upstream<'_, U>>,
        frame_log: Option<&mut L>,
        bus: &SharedBus,
    ) -> Result<DeliveryRoute, DeliveryError>
    where
        R: RadioChannel + ?Sized,
        U: Uplink,
        L: FrameLog + ?Sized,
    {
        let length = frame.encode_into(buffer);
        let bytes = &buffer[..length];

        match upstream {
            None => {
                if let Some(frame_log) = frame_log {
                    let line = LogLine::from_frame(frame);
                    let _lease = bus.activate(BusDevice::Storage).await;
                    if let Err(error) = frame_log.append(line.as_str()) {
                        log!(log::Level::Warn, "[{}] LOGLINE not written: {}", self.node_id, error);
                    } else {
                        log!(log::Level::Debug, "[{}] LOGLINE ({}): {}", self.node_id, line.len(), line);
                    }
                }
            }
            Some(upstream) => {
                let _lease = bus.activate(BusDevice::Network).await;
                if upstream.post(bytes) {
                    log!(
                        log::Level::Info,
                        "[{}] Frame {}.{} uploaded",
                        self.node_id,
                        frame.origin_id,
                        frame.sequence_id
                    );
                    return Ok(DeliveryRoute::Uplink);
                }
            }
        }

        if kind == FrameKind::Relay && self.retransmit_delay.as_ticks() > 0 {
            Timer::after(self.retransmit_delay).await;
        }

        let _lease = bus.activate(BusDevice::Radio).await;
        match radio.send(bytes).await {
            Ok(()) => {
                log!(
                    log::Level::Info,
                    "[{}] {} frame {}.{} (snd: {})",
                    self.node_id,
                    match kind {
                        FrameKind::LocalSample => "Sent",
                        FrameKind::Relay => "Retransmitted",
                    },
                    frame.origin_id,
                    frame.sequence_id,
                    frame.sender_id
                );
                Ok(DeliveryRoute::Radio)
            }
            Err(error) => {
                log!(
                    log::Level::Error,
                    "[{}] Frame {}.{} lost: {}",
                    self.node_id,
                    frame.origin_id,
                    frame.sequence_id,
                    error
                );
                Err(DeliveryError::Radio(error))
            }
        }
    }
}

#[cfg(all(test, feature = "std", feature = "radio-device-echo"))]
mod tests {
    use super::*;
    use crate::frame_log::MemoryFrameLog;
    use crate::radio_devices::echo::RadioDevice as EchoRadio;
    use crate::sensors::{FakeSensor, StaticBoard};
    use crate::uplink::RecordingUplink;
    use crate::{NoFrameLog, NoUplink, RadioSettings, SensorRegistry, UplinkSettings, PAYLOAD_SLOTS, RADIO_PACKET_SIZE};
    use futures::executor::block_on;
    use proptest::prelude::*;

    const NODE_ID: u8 = 2;
    const NETWORK_ID: u8 = 1;
    const SETTINGS: UplinkSettings<'static> = UplinkSettings {
        ssid: "",
        password: "",
        host: "collector.local",
        port: 80,
    };

    fn board() -> StaticBoard {
        StaticBoard {
            battery_volts: 4.12,
            unix_time: 1_530_000_000,
        }
    }

    fn ready_radio() -> EchoRadio {
        let mut radio = EchoRadio::new();
        block_on(radio.init(&RadioSettings::new())).unwrap();
        radio
    }

    fn sample() -> SensorFrame {
        SensorFrame::new_sample(PROTOCOL_VERSION, NETWORK_ID, NODE_ID, 1, 412, 1_530_000_000, [0; PAYLOAD_SLOTS])
    }

    /// Devices that fail the test if they are used without a bus lease
    struct LeaseCheckingRadio<'b> {
        bus: &'b SharedBus,
        sends: u32,
    }

    impl RadioChannel for LeaseCheckingRadio<'_> {
        async fn init(&mut self, _settings: &RadioSettings) -> Result<(), RadioError> {
            Ok(())
        }

        async fn send(&mut self, _packet: &[u8]) -> Result<(), RadioError> {
            assert!(self.bus.is_busy());
            assert!(self.bus.try_activate(BusDevice::Network).is_none());
            self.sends += 1;
            Ok(())
        }

        async fn receive(&mut self, _buffer: &mut [u8], _timeout: Duration) -> Result<Option<usize>, RadioError> {
            assert!(self.bus.is_busy());
            Ok(None)
        }
    }

    struct LeaseCheckingLog<'b> {
        bus: &'b SharedBus,
        appends: u32,
    }

    impl FrameLog for LeaseCheckingLog<'_> {
        fn append(&mut self, _line: &str) -> Result<(), crate::FrameLogError> {
            assert!(self.bus.is_busy());
            assert!(self.bus.try_activate(BusDevice::Radio).is_none());
            self.appends += 1;
            Ok(())
        }
    }

    struct LeaseCheckingUplink<'b> {
        bus: &'b SharedBus,
        posts: u32,
    }

    impl Uplink for LeaseCheckingUplink<'_> {
        fn post(&mut self, _settings: &UplinkSettings<'_>, _frame: &[u8]) -> bool {
            assert!(self.bus.is_busy());
            assert!(self.bus.try_activate(BusDevice::Radio).is_none());
            self.posts += 1;
            false
        }
    }

    #[test]
    fn log_and_radio_each_run_under_a_bus_lease() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let bus = SharedBus::new();
        let mut radio = LeaseCheckingRadio { bus: &bus, sends: 0 };
        let mut frame_log = LeaseCheckingLog { bus: &bus, appends: 0 };
        let mut buffer = [0u8; RADIO_PACKET_SIZE];

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            None::<&mut Upstream<'_, NoUplink>>,
            Some(&mut frame_log),
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
        assert_eq!(frame_log.appends, 1);
        assert_eq!(radio.sends, 1);
        assert!(!bus.is_busy());
    }

    #[test]
    fn upload_and_radio_fallback_each_run_under_a_bus_lease() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let bus = SharedBus::new();
        let mut radio = LeaseCheckingRadio { bus: &bus, sends: 0 };
        let mut upstream = Upstream::new(LeaseCheckingUplink { bus: &bus, posts: 0 }, SETTINGS);
        let mut buffer = [0u8; RADIO_PACKET_SIZE];

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::Relay,
            &mut buffer,
            &mut radio,
            Some(&mut upstream),
            None::<&mut NoFrameLog>,
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
        assert_eq!(upstream.client().posts, 1);
        assert_eq!(radio.sends, 1);
        assert!(!bus.is_busy());
    }

    #[test]
    fn sequence_ids_start_at_one_and_increase() {
        let mut path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        assert_eq!(path.last_sequence_id(), 0);
        let ids: Vec<u32> = (0..5).map(|_| path.assign_sequence_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(path.last_sequence_id(), 5);
    }

    proptest! {
        #[test]
        fn consecutive_samples_take_consecutive_ids(start in 0u32..u32::MAX - 256, count in 1u32..256) {
            let mut path = TxPath::with(NODE_ID, NETWORK_ID, 0);
            path.next_sequence_id = start;
            let mut registry: SensorRegistry<'_, 1> = SensorRegistry::new();
            let registers = DataRegisters::new();
            let ids: Vec<u32> = (0..count)
                .map(|_| path.build_sample_frame(&registers, &mut registry, &mut board()).sequence_id)
                .collect();
            prop_assert_eq!(ids, (start + 1..=start + count).collect::<Vec<u32>>());
            prop_assert_eq!(path.last_sequence_id(), start + count);
        }
    }

    #[test]
    fn sequence_id_wraps_instead_of_overflowing() {
        let mut path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        path.next_sequence_id = u32::MAX;
        assert_eq!(path.assign_sequence_id(), 0);
    }

    #[test]
    fn sample_frame_carries_node_identity_and_readings() {
        let mut path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut fake = FakeSensor;
        let mut sensors: SensorRegistry<'_, 1> = SensorRegistry::new();
        sensors.register(&mut fake);
        let registers = DataRegisters::with_names([Some("FAKE_3"), None, None, None, None, None, None, None, None, Some("FAKE_9")]);

        let frame = path.build_sample_frame(&registers, &mut sensors, &mut board());
        assert_eq!(frame.protocol_version, PROTOCOL_VERSION);
        assert_eq!(frame.network_id, NETWORK_ID);
        assert_eq!(frame.origin_id, NODE_ID);
        assert_eq!(frame.sender_id, NODE_ID);
        assert_eq!(frame.sequence_id, 1);
        assert_eq!(frame.battery_level, 412);
        assert_eq!(frame.timestamp, 1_530_000_000);
        assert_eq!(frame.payload[0], 3_333_333);
        assert_eq!(frame.payload[9], 9_999_999);

        let next = path.build_sample_frame(&registers, &mut sensors, &mut board());
        assert_eq!(next.sequence_id, 2);
    }

    #[test]
    fn without_upstream_frame_is_logged_and_broadcast() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut radio = ready_radio();
        let mut frame_log = MemoryFrameLog::default();
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            None::<&mut Upstream<'_, NoUplink>>,
            Some(&mut frame_log),
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
        assert_eq!(radio.sent_count(), 1);
        assert_eq!(frame_log.lines.len(), 1);
        assert!(frame_log.lines[0].starts_with("1.00,1,2,2,1,4.12,1530000000,"));
        assert!(!bus.is_busy());
    }

    #[test]
    fn accepted_upload_skips_radio_and_log() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut radio = ready_radio();
        let mut upstream = Upstream::new(RecordingUplink::accepting(true), SETTINGS);
        let mut frame_log = MemoryFrameLog::default();
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            Some(&mut upstream),
            Some(&mut frame_log),
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Uplink));
        assert_eq!(radio.sent_count(), 0);
        assert!(frame_log.lines.is_empty());
        assert_eq!(upstream.client().posts, vec![sample().encode().to_vec()]);
    }

    #[test]
    fn rejected_upload_falls_back_to_radio() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut radio = ready_radio();
        let mut upstream = Upstream::new(RecordingUplink::accepting(false), SETTINGS);
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            Some(&mut upstream),
            None::<&mut NoFrameLog>,
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
        assert_eq!(upstream.client().posts.len(), 1);
        assert_eq!(radio.sent_count(), 1);
    }

    #[test]
    fn relay_waits_retransmit_delay_before_radio() {
        let path = TxPath::with(3, NETWORK_ID, 20);
        let mut radio = ready_radio();
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();
        let mut relayed = sample();
        relayed.sender_id = 3;

        let started = embassy_time::Instant::now();
        let route = block_on(path.deliver(
            &relayed,
            FrameKind::Relay,
            &mut buffer,
            &mut radio,
            None::<&mut Upstream<'_, NoUplink>>,
            None::<&mut NoFrameLog>,
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(SensorFrame::decode(&buffer[..crate::SENSOR_FRAME_SIZE]), Ok(relayed));
    }

    #[test]
    fn failed_log_write_does_not_stop_delivery() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut radio = ready_radio();
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            None::<&mut Upstream<'_, NoUplink>>,
            Some(&mut NoFrameLog),
            &bus,
        ));
        assert_eq!(route, Ok(DeliveryRoute::Radio));
    }

    #[test]
    fn radio_failure_is_surfaced() {
        let path = TxPath::with(NODE_ID, NETWORK_ID, 0);
        let mut radio = EchoRadio::new();
        let mut buffer = [0u8; RADIO_PACKET_SIZE];
        let bus = SharedBus::new();

        let route = block_on(path.deliver(
            &sample(),
            FrameKind::LocalSample,
            &mut buffer,
            &mut radio,
            None::<&mut Upstream<'_, NoUplink>>,
            None::<&mut NoFrameLog>,
            &bus,
        ));
        assert_eq!(route, Err(DeliveryError::Radio(RadioError::NotInitialized)));
        assert!(!bus.is_busy());
    }
}
