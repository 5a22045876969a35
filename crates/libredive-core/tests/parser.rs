//! Parser contract tests through the family dispatcher

use chrono::{Duration, Utc};
use libredive_core::device::Family;
use libredive_core::error::Error;
use libredive_core::parser::{
    new_parser, ClockCalibration, FieldKind, FieldValue, Sample, SampleKind,
};

fn sensus_dive(timestamp: u32, words: &[u16]) -> Vec<u8> {
    let mut data = vec![0x00; 4];
    data.push(10);
    data.push(0x00);
    data.extend_from_slice(&timestamp.to_le_bytes());
    for word in words {
        data.extend_from_slice(&word.to_le_bytes());
    }
    data.extend_from_slice(&[0xFF, 0xFF]);
    data
}

fn vyper_dive(timestamp: u32, deltas: &[u8]) -> Vec<u8> {
    let mut data = vec![0x00; 4];
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(&800u16.to_le_bytes());
    data.push(20);
    data.extend_from_slice(&[21, 32, 0]);
    data.extend_from_slice(deltas);
    data.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
    data
}

#[test]
fn test_dispatch_matches_family() {
    let sensus = sensus_dive(1000, &[150]);
    let vyper = vyper_dive(1000, &[50]);

    let parser = new_parser(Family::ReefnetSensusPro, &sensus).unwrap();
    assert_eq!(parser.family(), Family::ReefnetSensusPro);

    let parser = new_parser(Family::SuuntoVyper2, &vyper).unwrap();
    assert_eq!(parser.family(), Family::SuuntoVyper2);
}

#[test]
fn test_dispatch_rejects_foreign_bytes() {
    // A Vyper dive is not a valid Sensus dive: the interval byte position
    // holds a timestamp byte and the footer is three bytes, not two.
    let vyper = vyper_dive(0, &[50]);
    assert!(new_parser(Family::ReefnetSensusPro, &vyper).is_err());

    assert!(matches!(
        new_parser(Family::SuuntoVyper2, &[0u8; 5]),
        Err(Error::DataFormat(_))
    ));
}

#[test]
fn test_lifecycle_configure_then_query() {
    let data = sensus_dive(5000, &[150, 200]);
    let mut parser = new_parser(Family::ReefnetSensusPro, &data).unwrap();

    // Created -> Configured: overrides accepted in any order.
    parser.set_density(1000.0).unwrap();
    parser.set_atmospheric(0.98).unwrap();
    let systime = Utc::now();
    parser
        .set_clock(ClockCalibration {
            devtime: 6000,
            systime,
        })
        .unwrap();

    // Configured -> Queried: first query locks the configuration.
    assert_eq!(parser.datetime().unwrap(), systime - Duration::seconds(1000));
    assert!(matches!(
        parser.set_density(1025.0),
        Err(Error::InvalidArgs(_))
    ));
    assert!(matches!(
        parser.set_atmospheric(1.0),
        Err(Error::InvalidArgs(_))
    ));
    assert!(matches!(
        parser.set_clock(ClockCalibration {
            devtime: 0,
            systime
        }),
        Err(Error::InvalidArgs(_))
    ));
}

#[test]
fn test_queries_idempotent_after_lock() {
    let data = vyper_dive(1000, &[50, 30]);
    let parser = new_parser(Family::SuuntoVyper2, &data).unwrap();

    let first = parser.field(FieldKind::DiveTime, 0).unwrap();
    let second = parser.field(FieldKind::DiveTime, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(parser.datetime().unwrap(), parser.datetime().unwrap());
}

#[test]
fn test_unsupported_fields_and_indices() {
    let data = vyper_dive(1000, &[50]);
    let parser = new_parser(Family::SuuntoVyper2, &data).unwrap();

    // Out-of-range gas index.
    assert!(matches!(
        parser.field(FieldKind::GasMix, 9),
        Err(Error::Unsupported)
    ));
    // Field the device never records.
    assert!(matches!(
        parser.field(FieldKind::String, 0),
        Err(Error::Unsupported)
    ));

    let data = sensus_dive(1000, &[150]);
    let parser = new_parser(Family::ReefnetSensusPro, &data).unwrap();
    assert!(matches!(
        parser.field(FieldKind::GasMixCount, 0),
        Err(Error::Unsupported)
    ));
}

#[test]
fn test_sample_order_and_kinds() {
    for (family, data) in [
        (
            Family::ReefnetSensusPro,
            sensus_dive(1000, &[150, 0x1000 | 1150, 170, 160]),
        ),
        (
            Family::SuuntoVyper2,
            vyper_dive(1000, &[50, 0x7E, 15, 30, 0x7D, 1, 0xEC]),
        ),
    ] {
        let parser = new_parser(family, &data).unwrap();

        let mut last = 0u32;
        let mut ordered = true;
        let mut kinds = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Time(ms) = sample {
                    ordered &= ms >= last;
                    last = ms;
                }
                kinds.push(sample.kind());
            })
            .unwrap();

        assert!(ordered, "{:?} emitted samples out of order", family);
        assert!(kinds.contains(&SampleKind::Time));
        assert!(kinds.contains(&SampleKind::Depth));
        assert!(kinds.contains(&SampleKind::Temperature));
    }
}

#[test]
fn test_stable_codes_via_values() {
    let data = vyper_dive(1000, &[50]);
    let parser = new_parser(Family::SuuntoVyper2, &data).unwrap();

    // The discriminants applications persist.
    assert_eq!(
        parser.field(FieldKind::MaxDepth, 0).unwrap().kind() as u32,
        1
    );
    assert_eq!(
        parser.field(FieldKind::DiveTime, 0).unwrap().kind() as u32,
        0
    );
    assert_eq!(SampleKind::GasMix as u32, 13);
    assert_eq!(SampleKind::Tts as u32, 14);
}

#[test]
fn test_field_values_consistent_with_samples() {
    let data = vyper_dive(1000, &[50, 30, 20]);
    let parser = new_parser(Family::SuuntoVyper2, &data).unwrap();

    let mut depth_sum = 0.0;
    let mut count = 0u32;
    parser
        .samples_foreach(&mut |sample| {
            if let Sample::Depth(depth) = sample {
                depth_sum += depth;
                count += 1;
            }
        })
        .unwrap();

    let FieldValue::AvgDepth(avg) = parser.field(FieldKind::AvgDepth, 0).unwrap() else {
        panic!("wrong variant");
    };
    assert!((avg - depth_sum / count as f64).abs() < 1e-9);

    let FieldValue::DiveTime(time) = parser.field(FieldKind::DiveTime, 0).unwrap() else {
        panic!("wrong variant");
    };
    assert_eq!(time, count * 20);
}
