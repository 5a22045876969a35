//! Suunto Vyper2 dive decoder
//!
//! Dive layout: 4-byte zero start marker, the little-endian 32-bit start
//! timestamp in seconds since 2000-01-01, the maximum depth in centimetres
//! (little-endian 16-bit), the sample interval (s), three oxygen
//! percentages (zero marks an unused slot), then the profile byte stream,
//! closed by the 3-byte all-ones stop marker. Profile bytes are signed
//! depth deltas in decimetres, except for three escape codes that each take
//! one operand byte: 0x7E temperature, 0x7D gas switch, 0x7C event.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, Utc};

use super::{
    ClockCalibration, DecoModel, DecoModelKind, DiveMode, EventFlags, EventKind, FieldKind,
    FieldValue, GasMix, Parser, ParserSettings, Sample, SampleCallback,
};
use crate::device::Family;
use crate::error::{Error, Result};

/// Fixed dive header size, start marker included.
const HEADER_SIZE: usize = 14;

/// Stop marker size.
const FOOTER_SIZE: usize = 3;

/// Offset of the little-endian start timestamp.
const TIMESTAMP_OFFSET: usize = 4;

/// Offset of the little-endian maximum depth, in centimetres.
const MAXDEPTH_OFFSET: usize = 8;

/// Offset of the sample interval.
const INTERVAL_OFFSET: usize = 10;

/// Offset and count of the oxygen percentage slots.
const GASMIX_OFFSET: usize = 11;
const GASMIX_COUNT: usize = 3;

/// Profile escape codes. Each consumes one operand byte.
const ESC_TEMPERATURE: u8 = 0x7E;
const ESC_GASMIX: u8 = 0x7D;
const ESC_EVENT: u8 = 0x7C;

/// 2000-01-01 00:00:00 UTC as a unix timestamp, the epoch of the on-device
/// clock.
const DEVICE_EPOCH: i64 = 946_684_800;

/// Parser for one Vyper2 dive.
pub struct VyperParser<'a> {
    data: &'a [u8],
    settings: ParserSettings,
}

/// Profile statistics gathered in one pass.
#[derive(Default)]
struct Profile {
    samples: u32,
    depth_sum: f64,
    temperature: Option<(f64, f64)>, // (min, max)
}

fn event_kind(code: u8) -> EventKind {
    match code {
        1 => EventKind::Ascent,
        2 => EventKind::Bookmark,
        3 => EventKind::Surface,
        4 => EventKind::DecoStop,
        5 => EventKind::SafetyStop,
        _ => EventKind::None,
    }
}

impl<'a> VyperParser<'a> {
    /// Bind a parser to one dive's raw bytes.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::DataFormat("dive shorter than header and footer"));
        }
        if !data[..4].iter().all(|&byte| byte == 0x00) {
            return Err(Error::DataFormat("missing dive start marker"));
        }
        if !data[data.len() - FOOTER_SIZE..].iter().all(|&byte| byte == 0xFF) {
            return Err(Error::DataFormat("missing dive stop marker"));
        }
        let interval = data[INTERVAL_OFFSET];
        if !(1..=127).contains(&interval) {
            return Err(Error::DataFormat("sample interval out of range"));
        }
        for &oxygen in &data[GASMIX_OFFSET..GASMIX_OFFSET + GASMIX_COUNT] {
            if oxygen > 100 {
                return Err(Error::DataFormat("oxygen percentage out of range"));
            }
        }

        // Every escape code needs its operand inside the profile region.
        let profile = &data[HEADER_SIZE..data.len() - FOOTER_SIZE];
        let mut offset = 0;
        while offset < profile.len() {
            match profile[offset] {
                ESC_TEMPERATURE | ESC_GASMIX | ESC_EVENT => {
                    if offset + 1 >= profile.len() {
                        return Err(Error::DataFormat("truncated profile escape"));
                    }
                    offset += 2;
                }
                _ => offset += 1,
            }
        }

        Ok(Self {
            data,
            settings: ParserSettings::default(),
        })
    }

    fn interval(&self) -> u32 {
        u32::from(self.data[INTERVAL_OFFSET])
    }

    fn timestamp(&self) -> u32 {
        LittleEndian::read_u32(&self.data[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4])
    }

    fn maxdepth(&self) -> f64 {
        f64::from(LittleEndian::read_u16(
            &self.data[MAXDEPTH_OFFSET..MAXDEPTH_OFFSET + 2],
        )) / 100.0
    }

    fn gasmixes(&self) -> &[u8] {
        let slots = &self.data[GASMIX_OFFSET..GASMIX_OFFSET + GASMIX_COUNT];
        let count = slots.iter().position(|&oxygen| oxygen == 0).unwrap_or(GASMIX_COUNT);
        &slots[..count]
    }

    fn decode(&self, emit: &mut dyn FnMut(Sample<'_>)) {
        let interval = self.interval();
        let profile = &self.data[HEADER_SIZE..self.data.len() - FOOTER_SIZE];

        let mut time = 0u32;
        let mut depth = 0.0f64;
        let mut offset = 0;
        while offset < profile.len() {
            match profile[offset] {
                ESC_TEMPERATURE => {
                    emit(Sample::Temperature(f64::from(profile[offset + 1] as i8)));
                    offset += 2;
                }
                ESC_GASMIX => {
                    emit(Sample::GasMix(u32::from(profile[offset + 1])));
                    offset += 2;
                }
                ESC_EVENT => {
                    emit(Sample::Event {
                        kind: event_kind(profile[offset + 1]),
                        time: 0,
                        flags: EventFlags::empty(),
                        value: 0,
                    });
                    offset += 2;
                }
                delta => {
                    time += interval;
                    depth = (depth + f64::from(delta as i8) / 10.0).max(0.0);
                    emit(Sample::Time(time * 1000));
                    emit(Sample::Depth(depth));
                    offset += 1;
                }
            }
        }
    }

    fn profile(&self) -> Profile {
        let mut profile = Profile::default();
        self.decode(&mut |sample| match sample {
            Sample::Depth(depth) => {
                profile.samples += 1;
                profile.depth_sum += depth;
            }
            Sample::Temperature(temp) => {
                profile.temperature = Some(match profile.temperature {
                    Some((min, max)) => (min.min(temp), max.max(temp)),
                    None => (temp, temp),
                });
            }
            _ => {}
        });
        profile
    }
}

impl Parser for VyperParser<'_> {
    fn family(&self) -> Family {
        Family::SuuntoVyper2
    }

    fn set_clock(&mut self, calibration: ClockCalibration) -> Result<()> {
        self.settings.set_clock(calibration)
    }

    fn set_atmospheric(&mut self, pressure: f64) -> Result<()> {
        self.settings.set_atmospheric(pressure)
    }

    fn set_density(&mut self, density: f64) -> Result<()> {
        self.settings.set_density(density)
    }

    fn datetime(&self) -> Result<DateTime<Utc>> {
        self.settings.lock();

        let timestamp = self.timestamp();

        // A clock correlation, when present, beats the on-device calendar:
        // it absorbs a wrongly set device clock.
        if let Some(clock) = self.settings.clock() {
            let delta = i64::from(timestamp) - i64::from(clock.devtime);
            return Ok(clock.systime + Duration::seconds(delta));
        }

        DateTime::<Utc>::from_timestamp(DEVICE_EPOCH + i64::from(timestamp), 0)
            .ok_or(Error::DataFormat("dive timestamp out of range"))
    }

    fn field(&self, kind: FieldKind, index: u32) -> Result<FieldValue> {
        self.settings.lock();

        match kind {
            FieldKind::DiveTime => {
                Ok(FieldValue::DiveTime(self.profile().samples * self.interval()))
            }
            FieldKind::MaxDepth => Ok(FieldValue::MaxDepth(self.maxdepth())),
            FieldKind::AvgDepth => {
                let profile = self.profile();
                if profile.samples == 0 {
                    return Err(Error::Unsupported);
                }
                Ok(FieldValue::AvgDepth(
                    profile.depth_sum / f64::from(profile.samples),
                ))
            }
            FieldKind::GasMixCount => Ok(FieldValue::GasMixCount(self.gasmixes().len() as u32)),
            FieldKind::GasMix => {
                let slots = self.gasmixes();
                let oxygen = *slots.get(index as usize).ok_or(Error::Unsupported)?;
                let oxygen = f64::from(oxygen) / 100.0;
                Ok(FieldValue::GasMix(GasMix {
                    helium: 0.0,
                    oxygen,
                    nitrogen: 1.0 - oxygen,
                }))
            }
            FieldKind::TemperatureMinimum => self
                .profile()
                .temperature
                .map(|(min, _)| FieldValue::TemperatureMinimum(min))
                .ok_or(Error::Unsupported),
            FieldKind::TemperatureMaximum => self
                .profile()
                .temperature
                .map(|(_, max)| FieldValue::TemperatureMaximum(max))
                .ok_or(Error::Unsupported),
            // No tank pressure hardware on this family.
            FieldKind::TankCount => Ok(FieldValue::TankCount(0)),
            FieldKind::DiveMode => {
                let mode = if self.gasmixes().is_empty() {
                    DiveMode::Gauge
                } else {
                    DiveMode::OpenCircuit
                };
                Ok(FieldValue::DiveMode(mode))
            }
            FieldKind::DecoModel => Ok(FieldValue::DecoModel(DecoModel {
                kind: DecoModelKind::Rgbm,
                conservatism: 0,
                gf: None,
            })),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&self, callback: &mut SampleCallback<'_>) -> Result<()> {
        self.settings.lock();
        self.decode(&mut |sample| callback(sample));
        Ok(())
    }
}
