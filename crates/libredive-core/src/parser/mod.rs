//! Dive parsers
//!
//! A parser binds to the raw bytes of exactly one dive and exposes them as
//! typed summary fields plus a chronological sample stream. The numeric
//! identity of [`SampleKind`] and [`FieldKind`] entries is part of the wire
//! contract with downstream applications: new kinds are appended, existing
//! ones are never renumbered.

pub mod reefnet;
pub mod suunto;

pub use reefnet::SensusParser;
pub use suunto::VyperParser;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;

use crate::device::Family;
use crate::error::{Error, Result};

/// Standard atmospheric pressure, in bar.
pub const DEF_ATMOSPHERIC: f64 = 1.01325;

/// Density of salt water, in kg/m³.
pub const DEF_DENSITY_SALT: f64 = 1025.0;

/// Density of fresh water, in kg/m³.
pub const DEF_DENSITY_FRESH: f64 = 1000.0;

/// Standard gravitational acceleration, in m/s².
pub const GRAVITY: f64 = 9.80665;

/// Gas mix index value meaning "unknown mix".
pub const GASMIX_UNKNOWN: u32 = 0xFFFFFFFF;

/// Sensor index value meaning "no sensor".
pub const SENSOR_NONE: u32 = 0xFFFFFFFF;

/// Convert an absolute pressure (bar) to a depth (m) for the given
/// atmospheric pressure (bar) and water density (kg/m³).
pub(crate) fn pressure_to_depth(absolute: f64, atmospheric: f64, density: f64) -> f64 {
    ((absolute - atmospheric).max(0.0) * 1e5) / (density * GRAVITY)
}

/// Discriminant of a [`Sample`] variant. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SampleKind {
    /// Elapsed time
    Time = 0,
    /// Depth
    Depth = 1,
    /// Tank pressure
    Pressure = 2,
    /// Water temperature
    Temperature = 3,
    /// Discrete event
    Event = 4,
    /// Remaining bottom time
    Rbt = 5,
    /// Heart rate
    Heartbeat = 6,
    /// Compass bearing
    Bearing = 7,
    /// Vendor-specific blob
    Vendor = 8,
    /// Rebreather setpoint
    Setpoint = 9,
    /// Oxygen partial pressure
    Ppo2 = 10,
    /// Central nervous system oxygen toxicity
    Cns = 11,
    /// Decompression stop / no-decompression limit
    Deco = 12,
    /// Active gas mix
    GasMix = 13,
    /// Time to surface
    Tts = 14,
}

/// Discriminant of a [`FieldValue`] variant. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FieldKind {
    /// Total dive time
    DiveTime = 0,
    /// Maximum depth
    MaxDepth = 1,
    /// Average depth
    AvgDepth = 2,
    /// Number of gas mixes
    GasMixCount = 3,
    /// One gas mix, by index
    GasMix = 4,
    /// Water type and density
    Salinity = 5,
    /// Atmospheric pressure
    Atmospheric = 6,
    /// Surface temperature
    TemperatureSurface = 7,
    /// Minimum water temperature
    TemperatureMinimum = 8,
    /// Maximum water temperature
    TemperatureMaximum = 9,
    /// Number of tanks
    TankCount = 10,
    /// One tank, by index
    Tank = 11,
    /// Dive mode
    DiveMode = 12,
    /// Decompression model
    DecoModel = 13,
    /// Arbitrary key/value string
    String = 14,
}

/// Discrete sample event types. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventKind {
    /// No event
    None = 0,
    /// Mandatory decompression stop
    DecoStop = 1,
    /// Remaining bottom time warning
    Rbt = 2,
    /// Ascent rate warning
    Ascent = 3,
    /// Decompression ceiling violation
    Ceiling = 4,
    /// Workload indication
    Workload = 5,
    /// Tank pressure transmitter event
    Transmitter = 6,
    /// Generic violation
    Violation = 7,
    /// User bookmark
    Bookmark = 8,
    /// Surfaced mid-dive
    Surface = 9,
    /// Safety stop
    SafetyStop = 10,
    /// Voluntary safety stop
    SafetyStopVoluntary = 11,
    /// Mandatory safety stop
    SafetyStopMandatory = 12,
    /// Deep stop
    DeepStop = 13,
    /// Ceiling reached during a safety stop
    CeilingSafetyStop = 14,
    /// Floor reached
    Floor = 15,
    /// Dive time alarm
    DiveTime = 16,
    /// Maximum depth alarm
    MaxDepth = 17,
    /// Oxygen limit fraction warning
    Olf = 18,
    /// Oxygen partial pressure warning
    Po2 = 19,
    /// Remaining air time warning
    AirTime = 20,
    /// RGBM model warning
    Rgbm = 21,
    /// Compass heading recorded
    Heading = 22,
    /// Tissue saturation level
    TissueLevel = 23,
}

bitflags! {
    /// Flags qualifying a sample event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u32 {
        /// Start of an interval event
        const BEGIN = 1 << 0;
        /// End of an interval event
        const END = 1 << 1;
    }
}

bitflags! {
    /// Tank type bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TankInfo: u32 {
        /// Volume given as metric water capacity
        const METRIC = 1 << 0;
        /// Volume given as imperial air capacity
        const IMPERIAL = 1 << 1;
        /// Closed-circuit diluent tank
        const CC_DILUENT = 1 << 2;
        /// Closed-circuit oxygen tank
        const CC_O2 = 1 << 3;
    }
}

/// Water type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterKind {
    /// Fresh water
    Fresh,
    /// Salt water
    Salt,
}

/// Dive mode. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DiveMode {
    /// Breath-hold diving
    Freedive = 0,
    /// Depth/time recording without decompression tracking
    Gauge = 1,
    /// Open circuit scuba
    OpenCircuit = 2,
    /// Closed circuit rebreather
    ClosedCircuit = 3,
    /// Semi-closed circuit rebreather
    SemiClosed = 4,
}

/// Decompression algorithm. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DecoModelKind {
    /// Unknown or none
    None = 0,
    /// Bühlmann ZH-L variants
    Buhlmann = 1,
    /// Varying permeability model
    Vpm = 2,
    /// Reduced gradient bubble model
    Rgbm = 3,
    /// DCIEM tables
    Dciem = 4,
}

/// Kind of a [`Sample::Deco`] entry. Values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DecoKind {
    /// Within the no-decompression limit
    Ndl = 0,
    /// Recommended safety stop
    SafetyStop = 1,
    /// Mandatory decompression stop
    DecoStop = 2,
    /// Deep stop
    DeepStop = 3,
}

/// Water type and density, in kg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Salinity {
    /// Fresh or salt water
    pub water: WaterKind,
    /// Density in kg/m³
    pub density: f64,
}

/// One breathing gas, as volume fractions summing to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GasMix {
    /// Helium fraction
    pub helium: f64,
    /// Oxygen fraction
    pub oxygen: f64,
    /// Nitrogen fraction
    pub nitrogen: f64,
}

/// One tank and its pressures, metric units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    /// Index of the gas mix carried, or [`GASMIX_UNKNOWN`]
    pub gasmix: u32,
    /// Tank type bits
    pub info: TankInfo,
    /// Water capacity in litres
    pub volume: f64,
    /// Working pressure in bar
    pub workpressure: f64,
    /// Pressure at the start of the dive in bar
    pub beginpressure: f64,
    /// Pressure at the end of the dive in bar
    pub endpressure: f64,
}

/// Decompression model descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecoModel {
    /// Algorithm family
    pub kind: DecoModelKind,
    /// Personal adjustment; zero is the neutral setting
    pub conservatism: i32,
    /// Gradient factors (low, high) when the model exposes them
    pub gf: Option<(u32, u32)>,
}

/// Arbitrary vendor string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldString {
    /// Key describing the value
    pub desc: String,
    /// The value itself
    pub value: String,
}

/// One decoded sample. Exactly one variant per emitted sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample<'a> {
    /// Elapsed time since the dive start, in milliseconds.
    Time(u32),
    /// Depth in metres.
    Depth(f64),
    /// Tank pressure in bar.
    Pressure {
        /// Tank index
        tank: u32,
        /// Pressure in bar
        value: f64,
    },
    /// Water temperature in °C.
    Temperature(f64),
    /// Discrete event.
    Event {
        /// Event type
        kind: EventKind,
        /// Event duration in seconds, zero for instantaneous events
        time: u32,
        /// Qualifying flags
        flags: EventFlags,
        /// Event-specific value
        value: u32,
    },
    /// Remaining bottom time in minutes.
    Rbt(u32),
    /// Heart rate in beats per minute.
    Heartbeat(u32),
    /// Compass bearing in degrees.
    Bearing(u32),
    /// Vendor-specific blob, passed through undecoded.
    Vendor {
        /// Vendor-defined type tag
        kind: u32,
        /// Raw bytes, borrowed from the dive data
        data: &'a [u8],
    },
    /// Rebreather setpoint in bar.
    Setpoint(f64),
    /// Oxygen partial pressure in bar.
    Ppo2 {
        /// Sensor index, or [`SENSOR_NONE`]
        sensor: u32,
        /// Partial pressure in bar
        value: f64,
    },
    /// CNS oxygen toxicity as a fraction (1.0 = 100%).
    Cns(f64),
    /// Decompression obligation.
    Deco {
        /// Stop type
        kind: DecoKind,
        /// Stop or no-deco time in seconds
        time: u32,
        /// Stop depth in metres
        depth: f64,
        /// Time to surface in seconds
        tts: u32,
    },
    /// Switch to the gas mix with this index.
    GasMix(u32),
    /// Time to surface in seconds.
    Tts(u32),
}

impl Sample<'_> {
    /// The stable discriminant of this sample.
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Time(_) => SampleKind::Time,
            Sample::Depth(_) => SampleKind::Depth,
            Sample::Pressure { .. } => SampleKind::Pressure,
            Sample::Temperature(_) => SampleKind::Temperature,
            Sample::Event { .. } => SampleKind::Event,
            Sample::Rbt(_) => SampleKind::Rbt,
            Sample::Heartbeat(_) => SampleKind::Heartbeat,
            Sample::Bearing(_) => SampleKind::Bearing,
            Sample::Vendor { .. } => SampleKind::Vendor,
            Sample::Setpoint(_) => SampleKind::Setpoint,
            Sample::Ppo2 { .. } => SampleKind::Ppo2,
            Sample::Cns(_) => SampleKind::Cns,
            Sample::Deco { .. } => SampleKind::Deco,
            Sample::GasMix(_) => SampleKind::GasMix,
            Sample::Tts(_) => SampleKind::Tts,
        }
    }
}

/// One decoded summary field. Exactly one variant per query.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Total dive time in seconds.
    DiveTime(u32),
    /// Maximum depth in metres.
    MaxDepth(f64),
    /// Average depth in metres.
    AvgDepth(f64),
    /// Number of gas mixes.
    GasMixCount(u32),
    /// One gas mix.
    GasMix(GasMix),
    /// Water type and density.
    Salinity(Salinity),
    /// Atmospheric pressure in bar.
    Atmospheric(f64),
    /// Surface temperature in °C.
    TemperatureSurface(f64),
    /// Minimum water temperature in °C.
    TemperatureMinimum(f64),
    /// Maximum water temperature in °C.
    TemperatureMaximum(f64),
    /// Number of tanks.
    TankCount(u32),
    /// One tank.
    Tank(Tank),
    /// Dive mode.
    DiveMode(DiveMode),
    /// Decompression model.
    DecoModel(DecoModel),
    /// Arbitrary key/value string.
    String(FieldString),
}

impl FieldValue {
    /// The stable discriminant of this field.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::DiveTime(_) => FieldKind::DiveTime,
            FieldValue::MaxDepth(_) => FieldKind::MaxDepth,
            FieldValue::AvgDepth(_) => FieldKind::AvgDepth,
            FieldValue::GasMixCount(_) => FieldKind::GasMixCount,
            FieldValue::GasMix(_) => FieldKind::GasMix,
            FieldValue::Salinity(_) => FieldKind::Salinity,
            FieldValue::Atmospheric(_) => FieldKind::Atmospheric,
            FieldValue::TemperatureSurface(_) => FieldKind::TemperatureSurface,
            FieldValue::TemperatureMinimum(_) => FieldKind::TemperatureMinimum,
            FieldValue::TemperatureMaximum(_) => FieldKind::TemperatureMaximum,
            FieldValue::TankCount(_) => FieldKind::TankCount,
            FieldValue::Tank(_) => FieldKind::Tank,
            FieldValue::DiveMode(_) => FieldKind::DiveMode,
            FieldValue::DecoModel(_) => FieldKind::DecoModel,
            FieldValue::String(_) => FieldKind::String,
        }
    }
}

/// Per-sample callback invoked in non-decreasing elapsed-time order.
pub type SampleCallback<'a> = dyn FnMut(Sample<'_>) + 'a;

/// Clock correlation: a device-relative time and the host time it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockCalibration {
    /// Device-relative time in device ticks (seconds)
    pub devtime: u32,
    /// Host time equivalent
    pub systime: DateTime<Utc>,
}

/// Caller-adjustable decoding parameters shared by all parsers.
///
/// Configuration is only accepted before the first query; afterwards the
/// parser is locked and setters fail with [`Error::InvalidArgs`]. Queries
/// themselves are idempotent.
#[derive(Debug, Default)]
pub(crate) struct ParserSettings {
    clock: Option<ClockCalibration>,
    atmospheric: Option<f64>,
    density: Option<f64>,
    locked: Cell<bool>,
}

impl ParserSettings {
    fn writable(&self) -> Result<()> {
        if self.locked.get() {
            Err(Error::InvalidArgs("parser already queried"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_clock(&mut self, calibration: ClockCalibration) -> Result<()> {
        self.writable()?;
        self.clock = Some(calibration);
        Ok(())
    }

    pub(crate) fn set_atmospheric(&mut self, pressure: f64) -> Result<()> {
        self.writable()?;
        if !(0.0..10.0).contains(&pressure) {
            return Err(Error::InvalidArgs("atmospheric pressure out of range"));
        }
        self.atmospheric = Some(pressure);
        Ok(())
    }

    pub(crate) fn set_density(&mut self, density: f64) -> Result<()> {
        self.writable()?;
        if !(800.0..1200.0).contains(&density) {
            return Err(Error::InvalidArgs("water density out of range"));
        }
        self.density = Some(density);
        Ok(())
    }

    /// Mark the first query; configuration is rejected from here on.
    pub(crate) fn lock(&self) {
        self.locked.set(true);
    }

    pub(crate) fn clock(&self) -> Option<ClockCalibration> {
        self.clock
    }

    pub(crate) fn atmospheric(&self) -> f64 {
        self.atmospheric.unwrap_or(DEF_ATMOSPHERIC)
    }

    pub(crate) fn density(&self) -> f64 {
        self.density.unwrap_or(DEF_DENSITY_SALT)
    }

    pub(crate) fn salinity(&self) -> Salinity {
        let density = self.density();
        let water = if density > 1010.0 {
            WaterKind::Salt
        } else {
            WaterKind::Fresh
        };
        Salinity { water, density }
    }
}

/// Uniform decoder interface over one dive's raw bytes.
pub trait Parser {
    /// Family whose byte layout this parser decodes.
    fn family(&self) -> Family;

    /// Set the clock correlation used to express timestamps in host time.
    fn set_clock(&mut self, calibration: ClockCalibration) -> Result<()>;

    /// Override the atmospheric pressure (bar) used for depth conversion.
    fn set_atmospheric(&mut self, pressure: f64) -> Result<()>;

    /// Override the water density (kg/m³) used for depth conversion.
    fn set_density(&mut self, density: f64) -> Result<()>;

    /// Decoded start of the dive, in host time.
    fn datetime(&self) -> Result<DateTime<Utc>>;

    /// Query one summary field. `index` selects the ordinal for
    /// multi-valued kinds (gas mixes, tanks) and is ignored otherwise.
    /// Unsupported kinds and out-of-range indices yield
    /// [`Error::Unsupported`].
    fn field(&self, kind: FieldKind, index: u32) -> Result<FieldValue>;

    /// Stream all samples in non-decreasing elapsed-time order.
    fn samples_foreach(&self, callback: &mut SampleCallback<'_>) -> Result<()>;
}

/// Construct the parser matching a device family, bound to one dive's raw
/// bytes as produced by the dive walk.
pub fn new_parser<'a>(family: Family, data: &'a [u8]) -> Result<Box<dyn Parser + 'a>> {
    match family {
        Family::ReefnetSensusPro => Ok(Box::new(SensusParser::new(data)?)),
        Family::SuuntoVyper2 => Ok(Box::new(VyperParser::new(data)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_kind_codes_are_stable() {
        assert_eq!(SampleKind::Time as u32, 0);
        assert_eq!(SampleKind::Depth as u32, 1);
        assert_eq!(SampleKind::Pressure as u32, 2);
        assert_eq!(SampleKind::Temperature as u32, 3);
        assert_eq!(SampleKind::Event as u32, 4);
        assert_eq!(SampleKind::Rbt as u32, 5);
        assert_eq!(SampleKind::Heartbeat as u32, 6);
        assert_eq!(SampleKind::Bearing as u32, 7);
        assert_eq!(SampleKind::Vendor as u32, 8);
        assert_eq!(SampleKind::Setpoint as u32, 9);
        assert_eq!(SampleKind::Ppo2 as u32, 10);
        assert_eq!(SampleKind::Cns as u32, 11);
        assert_eq!(SampleKind::Deco as u32, 12);
        assert_eq!(SampleKind::GasMix as u32, 13);
        assert_eq!(SampleKind::Tts as u32, 14);
    }

    #[test]
    fn test_field_kind_codes_are_stable() {
        assert_eq!(FieldKind::DiveTime as u32, 0);
        assert_eq!(FieldKind::MaxDepth as u32, 1);
        assert_eq!(FieldKind::AvgDepth as u32, 2);
        assert_eq!(FieldKind::GasMixCount as u32, 3);
        assert_eq!(FieldKind::GasMix as u32, 4);
        assert_eq!(FieldKind::Salinity as u32, 5);
        assert_eq!(FieldKind::Atmospheric as u32, 6);
        assert_eq!(FieldKind::TemperatureSurface as u32, 7);
        assert_eq!(FieldKind::TemperatureMinimum as u32, 8);
        assert_eq!(FieldKind::TemperatureMaximum as u32, 9);
        assert_eq!(FieldKind::TankCount as u32, 10);
        assert_eq!(FieldKind::Tank as u32, 11);
        assert_eq!(FieldKind::DiveMode as u32, 12);
        assert_eq!(FieldKind::DecoModel as u32, 13);
        assert_eq!(FieldKind::String as u32, 14);
    }

    #[test]
    fn test_tank_serde_round_trip() {
        let tank = Tank {
            gasmix: 0,
            info: TankInfo::METRIC | TankInfo::CC_O2,
            volume: 12.0,
            workpressure: 232.0,
            beginpressure: 200.0,
            endpressure: 50.0,
        };
        let json = serde_json::to_string(&tank).unwrap();
        let back: Tank = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tank);
    }

    #[test]
    fn test_sample_reports_matching_kind() {
        assert_eq!(Sample::Time(1000).kind(), SampleKind::Time);
        assert_eq!(Sample::Depth(10.0).kind(), SampleKind::Depth);
        assert_eq!(
            Sample::Deco {
                kind: DecoKind::Ndl,
                time: 0,
                depth: 0.0,
                tts: 0
            }
            .kind(),
            SampleKind::Deco
        );
    }

    #[test]
    fn test_settings_lock() {
        let mut settings = ParserSettings::default();
        settings.set_atmospheric(1.0).unwrap();
        settings.lock();
        assert!(matches!(
            settings.set_atmospheric(1.0),
            Err(Error::InvalidArgs(_))
        ));
        assert!(matches!(settings.set_density(1000.0), Err(Error::InvalidArgs(_))));
        assert_eq!(settings.atmospheric(), 1.0);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ParserSettings::default();
        assert_eq!(settings.atmospheric(), DEF_ATMOSPHERIC);
        assert_eq!(settings.density(), DEF_DENSITY_SALT);
        assert_eq!(settings.salinity().water, WaterKind::Salt);
    }

    #[test]
    fn test_settings_range_checks() {
        let mut settings = ParserSettings::default();
        assert!(settings.set_atmospheric(-1.0).is_err());
        assert!(settings.set_density(1.0).is_err());
    }

    #[test]
    fn test_pressure_to_depth() {
        // 2 atm absolute in salt water is roughly 10 m.
        let depth = pressure_to_depth(2.0 * DEF_ATMOSPHERIC, DEF_ATMOSPHERIC, DEF_DENSITY_SALT);
        assert!((depth - 10.08).abs() < 0.05);
        // Never negative above the surface.
        assert_eq!(pressure_to_depth(0.5, DEF_ATMOSPHERIC, DEF_DENSITY_SALT), 0.0);
    }
}
