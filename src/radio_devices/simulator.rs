//! # Radio Device Simulator - Multi-Node Testing Without Hardware
//!
//! A simulated radio talks to a network simulator through two queues:
//! - **Output Queue**: tune requests and packets put on air by this node
//! - **Input Queue**: packets heard by this node, with their RSSI
//!
//! On hosted targets [`SimulatedEther`] plays the network simulator. It drains
//! every output queue and copies each transmitted packet into the input queue
//! of every other node tuned to the same frequency, unless the link between
//! the two nodes was cut with [`SimulatedEther::set_link`].
//!
//! Packets queued while a node is not listening are heard on its next listen.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::TrySendError;
use embassy_time::{Duration, Timer};
use log::{log, Level};

use crate::radio_devices::{frequency_khz, RadioChannel, RadioError};
use crate::{RadioSettings, RADIO_PACKET_SIZE};

/// Size of the radio output message queue
const RADIO_OUTPUT_QUEUE_SIZE: usize = 10;

/// Size of the radio input message queue
const RADIO_INPUT_QUEUE_SIZE: usize = 10;

/// Signal strength assigned to every simulated delivery
pub const SIMULATED_RSSI: i16 = -70;

pub type RadioOutputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;
pub type RadioOutputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioOutputMessage, RADIO_OUTPUT_QUEUE_SIZE>;

pub type RadioInputQueue = embassy_sync::channel::Channel<CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;
pub type RadioInputQueueSender = embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, RadioInputMessage, RADIO_INPUT_QUEUE_SIZE>;

/// Packet as it travels through the simulated ether
#[derive(Clone, Copy)]
pub struct SimPacket {
    data: [u8; RADIO_PACKET_SIZE],
    length: usize,
}

impl SimPacket {
    /// Copies `bytes` into a packet, `None` if it does not fit
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > RADIO_PACKET_SIZE {
            return None;
        }
        let mut data = [0u8; RADIO_PACKET_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(SimPacket { data, length: bytes.len() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }
}

impl core::fmt::Debug for SimPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SimPacket({} bytes)", self.length)
    }
}

/// Messages sent from a simulated radio to the network simulator
#[derive(Debug)]
pub enum RadioOutputMessage {
    /// Radio (re)initialized on this frequency
    Tune { frequency_khz: u32 },
    /// Packet put on air
    SendPacket(SimPacket),
}

/// Messages received by a simulated radio from the network simulator
#[derive(Debug)]
pub enum RadioInputMessage {
    /// Packet heard from another node, with its RSSI in dBm
    ReceivePacket(SimPacket, i16),
}

/// Simulated radio device
pub struct RadioDevice {
    own_node_id: u8,
    output_queue_sender: RadioOutputQueueSender,
    input_queue_receiver: RadioInputQueueReceiver,
    frequency_khz: Option<u32>,
    last_rssi: Option<i16>,
}

impl RadioDevice {
    /// Creates a simulated radio device
    ///
    /// # Example
    /// ```rust,ignore
    /// use embassy_sync::channel::Channel;
    /// use sensorgrid_relay::radio_devices::simulator::*;
    ///
    /// static OUTPUT_QUEUE: RadioOutputQueue = Channel::new();
    /// static INPUT_QUEUE: RadioInputQueue = Channel::new();
    ///
    /// let radio = RadioDevice::with(2, OUTPUT_QUEUE.sender(), INPUT_QUEUE.receiver());
    /// ```
    pub const fn with(own_node_id: u8, output_queue_sender: RadioOutputQueueSender, input_queue_receiver: RadioInputQueueReceiver) -> Self {
        RadioDevice {
            own_node_id,
            output_queue_sender,
            input_queue_receiver,
            frequency_khz: None,
            last_rssi: None,
        }
    }

    pub fn frequency_khz(&self) -> Option<u32> {
        self.frequency_khz
    }
}

impl RadioChannel for RadioDevice {
    async fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        let khz = frequency_khz(settings)?;
        self.output_queue_sender
            .try_send(RadioOutputMessage::Tune { frequency_khz: khz })
            .map_err(|_| RadioError::InitFailed)?;
        log!(Level::Info, "[{}] Simulated radio tuned to {} kHz", self.own_node_id, khz);
        self.frequency_khz = Some(khz);
        Ok(())
    }

    async fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        if self.frequency_khz.is_none() {
            return Err(RadioError::NotInitialized);
        }
        let packet = SimPacket::from_bytes(packet).ok_or(RadioError::TransmissionFailed)?;
        match self.output_queue_sender.try_send(RadioOutputMessage::SendPacket(packet)) {
            Ok(()) => {
                log!(Level::Trace, "[{}] Packet on air: {:?}", self.own_node_id, packet);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                log!(Level::Warn, "[{}] Output queue full, packet not sent", self.own_node_id);
                Err(RadioError::TransmissionFailed)
            }
        }
    }

    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, RadioError> {
        if self.frequency_khz.is_none() {
            return Err(RadioError::NotInitialized);
        }
        match select(self.input_queue_receiver.receive(), Timer::after(timeout)).await {
            Either::First(RadioInputMessage::ReceivePacket(packet, rssi)) => {
                let bytes = packet.as_bytes();
                if bytes.len() > buffer.len() {
                    return Err(RadioError::ReceiveFailed);
                }
                buffer[..bytes.len()].copy_from_slice(bytes);
                self.last_rssi = Some(rssi);
                log!(Level::Trace, "[{}] Received packet: {:?}, rssi: {}", self.own_node_id, packet, rssi);
                Ok(Some(bytes.len()))
            }
            Either::Second(()) => Ok(None),
        }
    }

    fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }
}

#[cfg(feature = "std")]
pub use ether::SimulatedEther;

#[cfg(feature = "std")]
mod ether {
    use super::*;

    struct EtherPort {
        node_id: u8,
        output: &'static RadioOutputQueue,
        input: &'static RadioInputQueue,
        frequency_khz: Option<u32>,
    }

    /// Network simulator connecting simulated radios
    ///
    /// Every pair of attached nodes is in range until its link is cut.
    pub struct SimulatedEther {
        ports: Vec<EtherPort>,
        cut_links: Vec<(u8, u8)>,
    }

    impl Default for SimulatedEther {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SimulatedEther {
        pub fn new() -> Self {
            SimulatedEther {
                ports: Vec::new(),
                cut_links: Vec::new(),
            }
        }

        /// Creates a radio for `node_id` attached to this ether
        pub fn attach(&mut self, node_id: u8) -> RadioDevice {
            let output: &'static RadioOutputQueue = Box::leak(Box::new(RadioOutputQueue::new()));
            let input: &'static RadioInputQueue = Box::leak(Box::new(RadioInputQueue::new()));
            self.ports.push(EtherPort {
                node_id,
                output,
                input,
                frequency_khz: None,
            });
            RadioDevice::with(node_id, output.sender(), input.receiver())
        }

        /// Puts two nodes in or out of range of each other
        pub fn set_link(&mut self, a: u8, b: u8, connected: bool) {
            let link = (a.min(b), a.max(b));
            self.cut_links.retain(|cut| *cut != link);
            if !connected {
                self.cut_links.push(link);
            }
        }

        pub fn is_linked(&self, a: u8, b: u8) -> bool {
            !self.cut_links.contains(&(a.min(b), a.max(b)))
        }

        /// Moves every queued transmission to the radios in range
        ///
        /// # Returns
        /// Number of packet copies handed to receiving radios
        pub fn deliver_pending(&mut self) -> usize {
            let mut transmissions = Vec::new();
            for (index, port) in self.ports.iter_mut().enumerate() {
                while let Ok(message) = port.output.try_receive() {
                    match message {
                        RadioOutputMessage::Tune { frequency_khz } => port.frequency_khz = Some(frequency_khz),
                        RadioOutputMessage::SendPacket(packet) => transmissions.push((index, port.frequency_khz, packet)),
                    }
                }
            }

            let mut delivered = 0;
            for (from, frequency_khz, packet) in transmissions {
                let sender_id = self.ports[from].node_id;
                for (index, port) in self.ports.iter().enumerate() {
                    if index == from || port.frequency_khz.is_none() || port.frequency_khz != frequency_khz {
                        continue;
                    }
                    if !self.is_linked(sender_id, port.node_id) {
                        continue;
                    }
                    match port.input.try_send(RadioInputMessage::ReceivePacket(packet, SIMULATED_RSSI)) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            log!(Level::Warn, "Input queue of node {} full, packet from {} lost", port.node_id, sender_id);
                        }
                    }
                }
            }
            delivered
        }

        /// Delivers pending transmissions every `period`, forever
        pub async fn run(mut self, period: Duration) -> ! {
            loop {
                self.deliver_pending();
                Timer::after(period).await;
            }
        }
    }
}
