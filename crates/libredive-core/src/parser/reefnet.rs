//! ReefNet Sensus Pro dive decoder
//!
//! Dive layout: 4-byte zero start marker, sample interval (s), a reserved
//! byte, the little-endian 32-bit start timestamp in device seconds, then
//! little-endian 16-bit sample words, closed by the 2-byte all-ones stop
//! marker. Each word carries a 4-bit tag in the high nibble: tag 0 is
//! absolute pressure in quarter feet of sea water, tag 1 is temperature in
//! tenths of a degree Celsius offset by -100. The recorder has no clock of
//! its own beyond a relative tick counter, so wall-clock dive times need
//! the handshake's clock correlation.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, Utc};

use super::{
    pressure_to_depth, ClockCalibration, DiveMode, FieldKind, FieldValue, Parser, ParserSettings,
    Sample, SampleCallback,
};
use crate::device::Family;
use crate::error::{Error, Result};

/// Fixed dive header size, start marker included.
const HEADER_SIZE: usize = 10;

/// Stop marker size.
const FOOTER_SIZE: usize = 2;

/// Offset of the little-endian start timestamp.
const TIMESTAMP_OFFSET: usize = 6;

/// One foot of sea water, in bar.
const FSW_TO_BAR: f64 = 0.0306391;

/// Sample word tags.
const TAG_PRESSURE: u16 = 0;
const TAG_TEMPERATURE: u16 = 1;

/// Parser for one Sensus Pro dive.
pub struct SensusParser<'a> {
    data: &'a [u8],
    settings: ParserSettings,
}

/// Profile statistics gathered in one pass.
#[derive(Default)]
struct Profile {
    samples: u32,
    maxdepth: f64,
    depth_sum: f64,
    temperature: Option<(f64, f64)>, // (min, max)
}

impl<'a> SensusParser<'a> {
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
        if (data.len() - HEADER_SIZE - FOOTER_SIZE) % 2 != 0 {
            return Err(Error::DataFormat("truncated sample word"));
        }
        let interval = data[4];
        if !(1..=127).contains(&interval) {
            return Err(Error::DataFormat("sample interval out of range"));
        }

        Ok(Self {
            data,
            settings: ParserSettings::default(),
        })
    }

    fn interval(&self) -> u32 {
        u32::from(self.data[4])
    }

    fn timestamp(&self) -> u32 {
        LittleEndian::read_u32(&self.data[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4])
    }

    fn words(&self) -> impl Iterator<Item = u16> + '_ {
        self.data[HEADER_SIZE..self.data.len() - FOOTER_SIZE]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
    }

    fn depth_from_word(&self, value: u16) -> f64 {
        let absolute = f64::from(value) / 4.0 * FSW_TO_BAR;
        pressure_to_depth(absolute, self.settings.atmospheric(), self.settings.density())
    }

    fn temperature_from_word(value: u16) -> f64 {
        f64::from(value) * 0.1 - 100.0
    }

    fn decode(&self, emit: &mut dyn FnMut(Sample<'_>)) {
        let interval = self.interval();
        let mut time = 0u32;
        for word in self.words() {
            let tag = word >> 12;
            let value = word & 0x0FFF;
            match tag {
                TAG_PRESSURE => {
                    time += interval;
                    emit(Sample::Time(time * 1000));
                    emit(Sample::Depth(self.depth_from_word(value)));
                }
                TAG_TEMPERATURE => {
                    emit(Sample::Temperature(Self::temperature_from_word(value)));
                }
                // Reserved tags are skipped, not an error.
                _ => {}
            }
        }
    }

    fn profile(&self) -> Profile {
        let mut profile = Profile::default();
        self.decode(&mut |sample| match sample {
            Sample::Depth(depth) => {
                profile.samples += 1;
                profile.depth_sum += depth;
                profile.maxdepth = profile.maxdepth.max(depth);
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

impl Parser for SensusParser<'_> {
    fn family(&self) -> Family {
        Family::ReefnetSensusPro
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

        // The tick counter only becomes wall-clock time relative to a
        // handshake correlation.
        let clock = self.settings.clock().ok_or(Error::Unsupported)?;
        let delta = i64::from(self.timestamp()) - i64::from(clock.devtime);
        Ok(clock.systime + Duration::seconds(delta))
    }

    fn field(&self, kind: FieldKind, _index: u32) -> Result<FieldValue> {
        self.settings.lock();

        let profile = self.profile();
        match kind {
            FieldKind::DiveTime => Ok(FieldValue::DiveTime(profile.samples * self.interval())),
            FieldKind::MaxDepth => Ok(FieldValue::MaxDepth(profile.maxdepth)),
            FieldKind::AvgDepth => {
                if profile.samples == 0 {
                    return Err(Error::Unsupported);
                }
                Ok(FieldValue::AvgDepth(
                    profile.depth_sum / f64::from(profile.samples),
                ))
            }
            FieldKind::TemperatureMinimum => profile
                .temperature
                .map(|(min, _)| FieldValue::TemperatureMinimum(min))
                .ok_or(Error::Unsupported),
            FieldKind::TemperatureMaximum => profile
                .temperature
                .map(|(_, max)| FieldValue::TemperatureMaximum(max))
                .ok_or(Error::Unsupported),
            FieldKind::Atmospheric => Ok(FieldValue::Atmospheric(self.settings.atmospheric())),
            FieldKind::Salinity => Ok(FieldValue::Salinity(self.settings.salinity())),
            // A gauge-mode recorder: no gas, tank or deco data exists.
            FieldKind::DiveMode => Ok(FieldValue::DiveMode(DiveMode::Gauge)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&self, callback: &mut SampleCallback<'_>) -> Result<()> {
        self.settings.lock();
        self.decode(&mut |sample| callback(sample));
        Ok(())
    }
}
