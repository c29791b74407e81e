//! DBC files on disk flowing through the codec, packer and parser.

mod helpers;

use std::path::Path;
use std::sync::Arc;

use oc_dbc::{
    CanPacker, CanParser, Catalog, ChecksumKind, DbcError, Subscription, parse, unpack,
};
use oc_protocol::{CanBatch, CanFrame};

const BODY_DBC: &str = r#"
BO_ 1552 BODY_CONTROL: 8 XXX
 SG_ DOOR_OPEN : 0|1@0+ (1,0) [0|1] "" XXX
 SG_ GEAR : 8|3@1+ (1,0) [0|7] "" XXX

VAL_ 1552 GEAR 0 "park" 1 "reverse" 2 "neutral" 3 "drive" ;
"#;

const STEERING_DBC: &str = r#"
CM_ "IMPORT _body.dbc";

BO_ 608 STEER_TORQUE_SENSOR: 8 XXX
 SG_ STEER_TORQUE_DRIVER : 15|16@0- (1,0) [-32768|32767] "" XXX
 SG_ STEER_ANGLE : 31|16@0- (0.5,0) [-16384|16383] "deg" XXX
 SG_ CHECKSUM : 63|8@0+ (1,0) [0|255] "" XXX
"#;

fn write_dbc(dir: &Path) -> anyhow::Result<()> {
    std::fs::write(dir.join("_body.dbc"), BODY_DBC)?;
    std::fs::write(dir.join("toyota_e2e.dbc"), STEERING_DBC)?;
    Ok(())
}

/// The little-endian speed signal decodes from a raw frame.
#[test]
fn e2e_speed_signal_decodes() -> anyhow::Result<()> {
    let catalog = parse(
        "BO_ 512 TEST_MSG: 8 XXX\n SG_ SPEED : 0|16@1+ (0.01,0) [0|655.35] \"kph\" XXX\n",
    )?;
    let values = unpack(&catalog, 512, &[0x10, 0x27, 0, 0, 0, 0, 0, 0])?;
    assert_eq!(values["SPEED"], 100.0);
    Ok(())
}

/// A DBC with an include loads from disk, picks up the checksum layout
/// from its name and round-trips through packer and parser.
#[test]
fn e2e_dbc_file_pack_and_parse() -> anyhow::Result<()> {
    helpers::init_tracing();
    let dir = tempfile::tempdir()?;
    write_dbc(dir.path())?;

    let catalog = Arc::new(Catalog::from_file(dir.path().join("toyota_e2e.dbc"))?);
    assert_eq!(catalog.name(), "toyota_e2e");
    assert_eq!(catalog.len(), 2);
    assert_eq!(
        catalog.checksum_layout().map(|l| l.kind),
        Some(ChecksumKind::Toyota)
    );
    assert_eq!(catalog.label(1552, "GEAR", 3.0), Some("DRIVE"));

    let mut packer = CanPacker::new(catalog.clone());
    let mut parser = CanParser::new(
        catalog,
        0,
        [Subscription::from("STEER_TORQUE_SENSOR"), Subscription::from(1552)],
    )?;

    let steering = packer.pack(608, &[("STEER_TORQUE_DRIVER", -12.0), ("STEER_ANGLE", -45.5)])?;
    let body = packer.pack_by_name("BODY_CONTROL", &[("DOOR_OPEN", 1.0), ("GEAR", 2.0)])?;
    let updated = parser.update(&[CanBatch::new(
        1_000,
        vec![CanFrame::new(608, steering, 0), CanFrame::new(1552, body, 0)],
    )]);
    assert_eq!(updated, vec![608, 1552]);

    let steering = parser.vl_by_name("STEER_TORQUE_SENSOR").expect("steering decoded");
    assert_eq!(steering["STEER_TORQUE_DRIVER"], -12.0);
    assert_eq!(steering["STEER_ANGLE"], -45.5);
    let body = parser.vl(1552).expect("body decoded");
    assert_eq!(body["DOOR_OPEN"], 1.0);
    assert_eq!(body["GEAR"], 2.0);
    assert!(parser.can_valid());
    assert_eq!(parser.ts(608), Some(1_000));
    Ok(())
}

/// Frames corrupted in transit never reach the decoded values.
#[test]
fn e2e_corrupted_frame_is_dropped() -> anyhow::Result<()> {
    helpers::init_tracing();
    let dir = tempfile::tempdir()?;
    write_dbc(dir.path())?;

    let catalog = Arc::new(Catalog::from_file(dir.path().join("toyota_e2e.dbc"))?);
    let mut packer = CanPacker::new(catalog.clone());
    let mut parser = CanParser::new(catalog, 0, [Subscription::from(608)])?;

    let good = packer.pack(608, &[("STEER_TORQUE_DRIVER", 100.0)])?;
    let mut bad = packer.pack(608, &[("STEER_TORQUE_DRIVER", -100.0)])?;
    bad[2] ^= 0x01;

    parser.update(&[CanBatch::new(1, vec![CanFrame::new(608, good, 0)])]);
    let updated = parser.update(&[CanBatch::new(2, vec![CanFrame::new(608, bad, 0)])]);
    assert!(updated.is_empty());
    assert_eq!(parser.vl(608).expect("first frame kept")["STEER_TORQUE_DRIVER"], 100.0);
    assert_eq!(parser.ts(608), Some(1));
    Ok(())
}

/// A missing include surfaces as an I/O error naming the file.
#[test]
fn e2e_missing_include_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("toyota_e2e.dbc"), STEERING_DBC)?;

    match Catalog::from_file(dir.path().join("toyota_e2e.dbc")) {
        Err(DbcError::Io { path, .. }) => assert!(path.ends_with("_body.dbc")),
        other => panic!("expected I/O error, got {other:?}"),
    }
    Ok(())
}
