//! # Sensors - Reading Acquisition for Outbound Frames
//!
//! Every payload slot of a frame is filled from a *data register*
//! (`DATA_0`..`DATA_9`) whose configured value names a reading type, for
//! example `GPS_SATFIX` or `FAKE_5`. The name is resolved through a
//! [`SensorLookup`], normally a [`SensorRegistry`] of [`SensorDriver`]s.
//!
//! ```text
//! DataRegisters ──type name──▶ SensorRegistry ──▶ driver 0 ─ None
//!                                              └─▶ driver 1 ─ Some(value)
//! ```
//!
//! Unconfigured registers and unknown type names read as 0.

use log::log;

use crate::config::{is_enabled, ConfigSource};
use crate::PAYLOAD_SLOTS;

const REGISTER_KEYS: [&str; PAYLOAD_SLOTS] = [
    "DATA_0", "DATA_1", "DATA_2", "DATA_3", "DATA_4", "DATA_5", "DATA_6", "DATA_7", "DATA_8", "DATA_9",
];

/// Defaults of the first registers when a GPS module is fitted
const GPS_REGISTER_DEFAULTS: [&str; 3] = ["GPS_SATFIX", "GPS_LAT_DEG", "GPS_LON_DEG"];

/// Resolves a reading type name to a value
pub trait SensorLookup {
    /// Current value of `type_name`, 0 when the type is unknown
    fn lookup(&mut self, type_name: &str) -> i32;

    /// Called once before the registers of one frame are read
    fn begin_sample(&mut self) {}

    /// Called once after the registers of one frame were read
    fn end_sample(&mut self) {}
}

/// One physical or virtual sensor
pub trait SensorDriver {
    fn name(&self) -> &str;

    /// Powers the sensor up before a sample, false if it is not available
    fn start(&mut self) -> bool {
        true
    }

    /// Value of `type_name`, `None` if this driver does not provide it
    fn read(&mut self, type_name: &str) -> Option<i32>;

    /// Powers the sensor down after a sample
    fn stop(&mut self) {}
}

/// Borrowed sensor drivers, queried in registration order
///
/// # Generic Parameters
/// * `N` - Maximum number of drivers
pub struct SensorRegistry<'d, const N: usize> {
    drivers: [Option<&'d mut dyn SensorDriver>; N],
    started: [bool; N],
}

impl<const N: usize> Default for SensorRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'d, const N: usize> SensorRegistry<'d, N> {
    pub fn new() -> Self {
        SensorRegistry {
            drivers: core::array::from_fn(|_| None),
            started: [true; N],
        }
    }

    /// Adds a driver, false if the registry is full
    pub fn register(&mut self, driver: &'d mut dyn SensorDriver) -> bool {
        match self.drivers.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(driver);
                true
            }
            None => {
                log!(log::Level::Warn, "Sensor registry full, {} not registered", driver.name());
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.drivers.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> SensorLookup for SensorRegistry<'_, N> {
    fn lookup(&mut self, type_name: &str) -> i32 {
        for (driver, started) in self.drivers.iter_mut().zip(self.started.iter()) {
            let Some(driver) = driver else { continue };
            if !*started {
                continue;
            }
            if let Some(value) = driver.read(type_name) {
                return value;
            }
        }
        log!(log::Level::Warn, "Unknown named data type: {}", type_name);
        0
    }

    fn begin_sample(&mut self) {
        for (driver, started) in self.drivers.iter_mut().zip(self.started.iter_mut()) {
            if let Some(driver) = driver {
                *started = driver.start();
                if !*started {
                    log!(log::Level::Warn, "Sensor {} failed to start, skipping it", driver.name());
                }
            }
        }
    }

    fn end_sample(&mut self) {
        for (driver, started) in self.drivers.iter_mut().zip(self.started.iter()) {
            if let (Some(driver), true) = (driver, *started) {
                driver.stop();
            }
        }
    }
}

/// Constant readings for bench testing, `FAKE_3` reads 3333333 up to `FAKE_9`
#[derive(Clone, Copy, Debug, Default)]
pub struct FakeSensor;

impl SensorDriver for FakeSensor {
    fn name(&self) -> &str {
        "fake"
    }

    fn read(&mut self, type_name: &str) -> Option<i32> {
        let digit = type_name.strip_prefix("FAKE_")?.parse::<i32>().ok()?;
        if !(3..=9).contains(&digit) {
            return None;
        }
        Some(digit * 1_111_111)
    }
}

/// Last fix reported by the GPS module
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GpsReading {
    pub fix: bool,
    pub satellites: u8,
    pub latitude_degrees: f32,
    pub longitude_degrees: f32,
}

/// GPS readings
///
/// | Type | Value |
/// |------|-------|
/// | `GPS_FIX` | 1 with a fix, else 0 |
/// | `GPS_SATS` | satellites in view |
/// | `GPS_SATFIX` | satellites, negated without a fix |
/// | `GPS_LAT_DEG` / `GPS_LON_DEG` | degrees × 1000, rounded |
#[derive(Clone, Copy, Debug, Default)]
pub struct GpsSensor {
    reading: GpsReading,
}

impl GpsSensor {
    pub const fn new() -> Self {
        GpsSensor {
            reading: GpsReading {
                fix: false,
                satellites: 0,
                latitude_degrees: 0.0,
                longitude_degrees: 0.0,
            },
        }
    }

    /// Stores the latest parsed position
    pub fn update(&mut self, reading: GpsReading) {
        self.reading = reading;
    }

    pub fn reading(&self) -> GpsReading {
        self.reading
    }
}

impl SensorDriver for GpsSensor {
    fn name(&self) -> &str {
        "gps"
    }

    fn read(&mut self, type_name: &str) -> Option<i32> {
        let satellites = self.reading.satellites as i32;
        match type_name {
            "GPS_FIX" => Some(self.reading.fix as i32),
            "GPS_SATS" => Some(satellites),
            "GPS_SATFIX" => Some(if self.reading.fix { satellites } else { -satellites }),
            "GPS_LAT_DEG" => Some(round_to_i32(self.reading.latitude_degrees * 1000.0)),
            "GPS_LON_DEG" => Some(round_to_i32(self.reading.longitude_degrees * 1000.0)),
            _ => None,
        }
    }
}

/// Rounds half away from zero, saturating at the i32 range
fn round_to_i32(value: f32) -> i32 {
    if value >= 0.0 {
        (value + 0.5) as i32
    } else {
        (value - 0.5) as i32
    }
}

/// Last values measured by an SI7021
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Si7021Reading {
    pub temperature_celsius: f32,
    pub relative_humidity: f32,
}

/// SI7021 temperature and humidity, both in hundredths, truncated
///
/// | Type | Value |
/// |------|-------|
/// | `SI7021_TEMP` | °C × 100 |
/// | `SI7021_HUMIDITY` | %RH × 100 |
#[derive(Clone, Copy, Debug, Default)]
pub struct Si7021Sensor {
    reading: Si7021Reading,
}

impl Si7021Sensor {
    pub const fn new() -> Self {
        Si7021Sensor {
            reading: Si7021Reading {
                temperature_celsius: 0.0,
                relative_humidity: 0.0,
            },
        }
    }

    pub fn update(&mut self, reading: Si7021Reading) {
        self.reading = reading;
    }
}

impl SensorDriver for Si7021Sensor {
    fn name(&self) -> &str {
        "si7021"
    }

    fn read(&mut self, type_name: &str) -> Option<i32> {
        match type_name {
            "SI7021_TEMP" => Some((self.reading.temperature_celsius * 100.0) as i32),
            "SI7021_HUMIDITY" => Some((self.reading.relative_humidity * 100.0) as i32),
            _ => None,
        }
    }
}

/// Raw light channels of an SI1145
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Si1145Reading {
    pub visible: u16,
    pub infrared: u16,
    /// UV index × 100, as the sensor reports it
    pub uv_index: u16,
}

/// SI1145 light sensor, `SI1145_VIS`, `SI1145_IR` and `SI1145_UV` unscaled
#[derive(Clone, Copy, Debug, Default)]
pub struct Si1145Sensor {
    reading: Si1145Reading,
}

impl Si1145Sensor {
    pub const fn new() -> Self {
        Si1145Sensor {
            reading: Si1145Reading {
                visible: 0,
                infrared: 0,
                uv_index: 0,
            },
        }
    }

    pub fn update(&mut self, reading: Si1145Reading) {
        self.reading = reading;
    }
}

impl SensorDriver for Si1145Sensor {
    fn name(&self) -> &str {
        "si1145"
    }

    fn read(&mut self, type_name: &str) -> Option<i32> {
        match type_name {
            "SI1145_VIS" => Some(self.reading.visible as i32),
            "SI1145_IR" => Some(self.reading.infrared as i32),
            "SI1145_UV" => Some(self.reading.uv_index as i32),
            _ => None,
        }
    }
}

/// Full scale of the dust sensor ADC
const DUST_ADC_STEPS: f32 = 1024.0;

/// Sharp GP2Y1010AU0F optical dust sensor
///
/// The sensor output voltage `V` converts to a density of `0.17 × V - 0.1`
/// mg/m³. `DUST_DENSITY` reports it in µg/m³, rounded.
#[derive(Clone, Copy, Debug)]
pub struct DustSensor {
    supply_volts: f32,
    adc_counts: u16,
}

impl DustSensor {
    /// Dust sensor sampled by an ADC referenced to `supply_volts`
    pub const fn with_supply(supply_volts: f32) -> Self {
        DustSensor {
            supply_volts,
            adc_counts: 0,
        }
    }

    /// Stores the latest raw ADC sample, 0..1023
    pub fn update(&mut self, adc_counts: u16) {
        self.adc_counts = adc_counts;
    }

    /// Output voltage of the last sample
    pub fn voltage(&self) -> f32 {
        self.adc_counts as f32 * (self.supply_volts / DUST_ADC_STEPS)
    }

    /// Dust density of the last sample in mg/m³
    pub fn density(&self) -> f32 {
        0.17 * self.voltage() - 0.1
    }
}

impl SensorDriver for DustSensor {
    fn name(&self) -> &str {
        "gp2y1010au0f"
    }

    fn read(&mut self, type_name: &str) -> Option<i32> {
        match type_name {
            "DUST_DENSITY" => Some(round_to_i32(self.density() * 1000.0)),
            _ => None,
        }
    }
}

/// Configured reading type of every payload slot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataRegisters<'a> {
    names: [Option<&'a str>; PAYLOAD_SLOTS],
}

impl<'a> DataRegisters<'a> {
    /// Registers with every slot unconfigured
    pub const fn new() -> Self {
        DataRegisters {
            names: [None; PAYLOAD_SLOTS],
        }
    }

    pub const fn with_names(names: [Option<&'a str>; PAYLOAD_SLOTS]) -> Self {
        DataRegisters { names }
    }

    /// Reads `DATA_0`..`DATA_9`
    ///
    /// With `GPS_MODULE` enabled the first three registers default to
    /// `GPS_SATFIX`, `GPS_LAT_DEG` and `GPS_LON_DEG`.
    pub fn from_source<S: ConfigSource + ?Sized>(source: &'a S) -> Self {
        let gps_module = is_enabled(source, "GPS_MODULE");
        let mut names = [None; PAYLOAD_SLOTS];
        for (slot, key) in REGISTER_KEYS.iter().enumerate() {
            names[slot] = source.get(key);
            if gps_module && names[slot].is_none() && slot < GPS_REGISTER_DEFAULTS.len() {
                names[slot] = Some(GPS_REGISTER_DEFAULTS[slot]);
            }
            if let (Some(name), false) = (names[slot], gps_module) {
                if name.starts_with("GPS_") {
                    log!(log::Level::Warn, "GPS data {} in {}, but no GPS_MODULE in config", name, key);
                }
            }
        }
        DataRegisters { names }
    }

    /// Reading type of `slot`, `None` when unconfigured
    pub fn name(&self, slot: usize) -> Option<&'a str> {
        self.names.get(slot).copied().flatten()
    }

    /// Reads every slot through `sensors`, unconfigured slots read 0
    pub fn read_all<L: SensorLookup + ?Sized>(&self, sensors: &mut L) -> [i32; PAYLOAD_SLOTS] {
        let mut payload = [0; PAYLOAD_SLOTS];
        sensors.begin_sample();
        for (slot, name) in self.names.iter().enumerate() {
            match name {
                Some(name) => payload[slot] = sensors.lookup(name),
                None => log!(log::Level::Trace, "Data register {} not configured", REGISTER_KEYS[slot]),
            }
        }
        sensors.end_sample();
        payload
    }
}

/// Board services used when building a frame
pub trait Board {
    /// Battery voltage in volts
    fn battery_level(&mut self) -> f32;

    /// Real-time clock in unix seconds
    fn unix_time(&mut self) -> u32;
}

/// Board with fixed battery and clock values
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticBoard {
    pub battery_volts: f32,
    pub unix_time: u32,
}

impl Board for StaticBoard {
    fn battery_level(&mut self) -> f32 {
        self.battery_volts
    }

    fn unix_time(&mut self) -> u32 {
        self.unix_time
    }
}
