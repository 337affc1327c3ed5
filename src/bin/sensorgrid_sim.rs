//! Three simulated sensor nodes in a line, the outer two out of each other's
//! range, so every frame of node 2 and node 4 reaches the other end only
//! through the relay of node 3.
//!
//! Node 4 is the collector. It has no uplink, so every frame it sends or
//! relays is appended to its `LOG_FILE`.
//!
//! Log verbosity follows `RUST_LOG`, the default is `info`.

use std::time::{SystemTime, UNIX_EPOCH};

use embassy_executor::Spawner;
use embassy_time::Duration;
use env_logger::Builder;
use log::{log, LevelFilter};
use sensorgrid_relay::config::log_file;
use sensorgrid_relay::frame_log::FileFrameLog;
use sensorgrid_relay::radio_devices::simulator::{RadioDevice, SimulatedEther};
use sensorgrid_relay::sensors::{FakeSensor, GpsReading, GpsSensor, Si7021Reading, Si7021Sensor};
use sensorgrid_relay::{Board, DataRegisters, KeyValueConfig, NoUplink, NodeConfiguration, SensorNode, SensorRegistry};

const NODE_COUNT: usize = 3;

/// How often the ether moves packets between radios
const ETHER_PERIOD: Duration = Duration::from_millis(10);

static NODE_CONFIGS: [KeyValueConfig<'static>; NODE_COUNT] = [
    KeyValueConfig::new(
        "NODE_ID=2\nNETWORK_ID=1\nCOLLECTOR_ID=4\nGPS_MODULE=1\nDATA_3=FAKE_3\nRETRANSMIT_DELAY=300\nLISTEN_WINDOW_MIN=1000\nLISTEN_WINDOW_MAX=2000\n",
    ),
    KeyValueConfig::new(
        "NODE_ID=3\nNETWORK_ID=1\nCOLLECTOR_ID=4\nDATA_0=FAKE_5\nDATA_1=SI7021_TEMP\nDATA_2=SI7021_HUMIDITY\nRETRANSMIT_DELAY=300\n",
    ),
    KeyValueConfig::new(
        "NODE_ID=4\nNETWORK_ID=1\nCOLLECTOR_ID=4\nDATA_0=FAKE_9\nRETRANSMIT_DELAY=300\nLISTEN_WINDOW_MIN=800\nLOG_FILE=sensorgrid_collector.csv\n",
    ),
];

type SimNode = SensorNode<'static, RadioDevice, NoUplink, FileFrameLog>;

/// Board with a slowly draining battery and the host clock
struct SimBoard {
    battery_volts: f32,
}

impl Board for SimBoard {
    fn battery_level(&mut self) -> f32 {
        self.battery_volts = (self.battery_volts - 0.001).max(3.3);
        self.battery_volts
    }

    fn unix_time(&mut self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0)
    }
}

#[embassy_executor::task(pool_size = NODE_COUNT)]
async fn node_task(mut node: SimNode) -> ! {
    let mut fake = FakeSensor;
    let mut gps = GpsSensor::new();
    gps.update(GpsReading {
        fix: true,
        satellites: 6,
        latitude_degrees: 42.0565,
        longitude_degrees: -87.6753,
    });
    let mut si7021 = Si7021Sensor::new();
    si7021.update(Si7021Reading {
        temperature_celsius: 21.4,
        relative_humidity: 48.0,
    });
    let mut sensors: SensorRegistry<'_, 3> = SensorRegistry::new();
    sensors.register(&mut fake);
    sensors.register(&mut gps);
    sensors.register(&mut si7021);
    let mut board = SimBoard { battery_volts: 4.2 };
    node.run(&mut sensors, &mut board).await
}

#[embassy_executor::task]
async fn ether_task(ether: SimulatedEther) -> ! {
    ether.run(ETHER_PERIOD).await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Info).parse_default_env().init();

    let mut ether = SimulatedEther::new();
    let mut nodes: Vec<SimNode> = Vec::with_capacity(NODE_COUNT);
    for source in NODE_CONFIGS.iter() {
        let config = match NodeConfiguration::from_source(source) {
            Ok(config) => config,
            Err(error) => {
                log!(log::Level::Error, "Invalid node configuration: {}", error);
                return;
            }
        };
        let frame_log = if config.is_collector() {
            let path = log_file(source);
            match FileFrameLog::open(path) {
                Ok(frame_log) => {
                    log!(log::Level::Info, "Collector {} logs frames to {}", config.node_id, path);
                    Some(frame_log)
                }
                Err(error) => {
                    log!(log::Level::Warn, "Collector {} runs without a frame log: {}", config.node_id, error);
                    None
                }
            }
        } else {
            None
        };
        let radio = ether.attach(config.node_id);
        let registers = DataRegisters::from_source(source);
        let seed = 0x5EED_0000 + config.node_id as u64;
        match SensorNode::new(config, registers, radio, None, frame_log, seed) {
            Ok(node) => nodes.push(node),
            Err(error) => {
                log!(log::Level::Error, "Node {} not created: {}", config.node_id, error);
                return;
            }
        }
    }
    ether.set_link(2, 4, false);
    log!(log::Level::Info, "Simulating {} nodes, 2 and 4 out of range", nodes.len());

    if let Err(error) = spawner.spawn(ether_task(ether)) {
        log!(log::Level::Error, "Cannot spawn ether task: {:?}", error);
        return;
    }
    for node in nodes {
        let node_id = node.node_id();
        if let Err(error) = spawner.spawn(node_task(node)) {
            log!(log::Level::Error, "Cannot spawn node {}: {:?}", node_id, error);
        }
    }
}
