//! Platform tables compiled into the crate.

use oc_protocol::{Ecu, EcuKey};

use super::{
    BrandConfig, FwBytes, FwEntry, FwRequest, NonEssentialEcu, PlatformDatabase, PlatformDef,
    VinFuzzyRule, VinPattern,
};

// ── Request building blocks ─────────────────────────────────────

const TESTER_PRESENT: &[u8] = &[0x3E, 0x00];
const TESTER_PRESENT_RESPONSE: &[u8] = &[0x7E, 0x00];
const EXTENDED_SESSION: &[u8] = &[0x10, 0x03];
const EXTENDED_SESSION_RESPONSE: &[u8] = &[0x50, 0x03];
const UDS_VERSION: &[u8] = &[0x22, 0xF1, 0x81];
const UDS_VERSION_RESPONSE: &[u8] = &[0x62, 0xF1, 0x81];
const OBD_VERSION: &[u8] = &[0x09, 0x04];
const OBD_VERSION_RESPONSE: &[u8] = &[0x49, 0x04];

const TOYOTA_VERSION_KWP: &[u8] = &[0x1A, 0x88, 0x01];
const TOYOTA_VERSION_KWP_RESPONSE: &[u8] = &[0x5A, 0x88, 0x01];
const HONDA_VERSION: &[u8] = &[0x22, 0xF1, 0x01];
const HONDA_VERSION_RESPONSE: &[u8] = &[0x62, 0xF1, 0x01];
const HYUNDAI_VERSION: &[u8] = &[0x22, 0xF1, 0x00];
const HYUNDAI_VERSION_RESPONSE: &[u8] = &[0x62, 0xF1, 0x00];
const VW_SPARE_PART: &[u8] = &[0x22, 0xF1, 0x87];
const VW_SPARE_PART_RESPONSE: &[u8] = &[0x62, 0xF1, 0x87];

const VW_RX_OFFSET: u32 = 0x6A;

fn steps(parts: &[&[u8]]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.to_vec()).collect()
}

fn fw(ecu: Ecu, address: u32, sub_address: Option<u8>, versions: &[&[u8]]) -> FwEntry {
    FwEntry {
        ecu,
        address,
        sub_address,
        versions: versions
            .iter()
            .map(|v| match std::str::from_utf8(v) {
                Ok(text) => FwBytes::Text(text.to_string()),
                Err(_) => FwBytes::Raw(v.to_vec()),
            })
            .collect(),
    }
}

fn platform(name: &str, brand: &str, dbc: Option<&str>) -> PlatformDef {
    PlatformDef {
        name: name.to_string(),
        brand: brand.to_string(),
        dbc: dbc.map(str::to_string),
        fingerprints: Vec::new(),
        fw: Vec::new(),
        vin: None,
    }
}

fn vin(wmis: &[&str], chassis_codes: &[&str]) -> Option<VinPattern> {
    Some(VinPattern {
        wmis: wmis.iter().map(|s| s.to_string()).collect(),
        chassis_codes: chassis_codes.iter().map(|s| s.to_string()).collect(),
        model_years: None,
    })
}

pub(super) fn database() -> PlatformDatabase {
    PlatformDatabase {
        brands: vec![toyota(), honda(), hyundai(), volkswagen()],
        platforms: [toyota_platforms(), honda_platforms(), hyundai_platforms(), volkswagen_platforms()]
            .concat(),
    }
}

// ── Toyota ──────────────────────────────────────────────────────

fn toyota() -> BrandConfig {
    let mut brand = BrandConfig::new(
        "toyota",
        vec![
            FwRequest::new(steps(&[TOYOTA_VERSION_KWP]), steps(&[TOYOTA_VERSION_KWP_RESPONSE]))
                .whitelist(&[
                    Ecu::FwdCamera,
                    Ecu::FwdRadar,
                    Ecu::Abs,
                    Ecu::Eps,
                    Ecu::Srs,
                    Ecu::Transmission,
                    Ecu::Hvac,
                ])
                .bus(0),
            FwRequest::new(
                steps(&[TESTER_PRESENT, OBD_VERSION]),
                steps(&[TESTER_PRESENT_RESPONSE, OBD_VERSION_RESPONSE]),
            )
            .whitelist(&[Ecu::Engine, Ecu::Hybrid])
            .bus(0),
            FwRequest::new(
                steps(&[EXTENDED_SESSION, UDS_VERSION]),
                steps(&[EXTENDED_SESSION_RESPONSE, UDS_VERSION_RESPONSE]),
            )
            .whitelist(&[Ecu::Engine])
            .bus(0)
            .logging(),
        ],
    );
    brand.non_essential_ecus = vec![NonEssentialEcu {
        ecu: Ecu::Engine,
        platforms: vec!["TOYOTA_CAMRY".to_string()],
    }];
    brand.extra_ecus = vec![
        EcuKey::new(Ecu::Hybrid, 0x7D2, None),
        EcuKey::new(Ecu::Srs, 0x780, None),
    ];
    brand
}

fn toyota_platforms() -> Vec<PlatformDef> {
    let mut rav4 = platform("TOYOTA_RAV4", "toyota", Some("toyota_nodsu_pt_generated"));
    rav4.fingerprints = vec![vec![
        (0x24, 8),
        (0x25, 8),
        (0xAA, 8),
        (0xB4, 8),
        (0x1D2, 8),
        (0x1D3, 8),
        (0x224, 8),
        (0x260, 8),
        (0x262, 5),
        (0x2E4, 5),
        (0x3BC, 8),
        (0x614, 8),
    ]];
    rav4.fw = vec![
        fw(Ecu::Engine, 0x7E0, None, &[b"\x01896630R58000\x00\x00\x00\x00", b"\x01896630R58100\x00\x00\x00\x00"]),
        fw(Ecu::Abs, 0x7B0, None, &[b"F152642561\x00\x00\x00\x00\x00\x00", b"F152642531\x00\x00\x00\x00\x00\x00"]),
        fw(Ecu::Eps, 0x7A1, None, &[b"8965B42170\x00\x00\x00\x00\x00\x00"]),
        fw(Ecu::FwdRadar, 0x750, Some(0x0F), &[b"\x018821F3301400\x00\x00\x00\x00"]),
        fw(
            Ecu::FwdCamera,
            0x750,
            Some(0x6D),
            &[b"\x028646F4203400\x00\x00\x00\x008646G26011A0\x00\x00\x00\x00"],
        ),
    ];
    rav4.vin = vin(&["2T3", "JTM"], &["W1", "RF"]);

    let mut camry = platform("TOYOTA_CAMRY", "toyota", Some("toyota_nodsu_pt_generated"));
    camry.fingerprints = vec![vec![
        (0x24, 8),
        (0x25, 8),
        (0xAA, 8),
        (0xB4, 8),
        (0x1D2, 8),
        (0x1D3, 8),
        (0x224, 8),
        (0x260, 8),
        (0x262, 5),
        (0x2E4, 8),
        (0x3BC, 8),
        (0x4CB, 8),
        (0x614, 8),
    ]];
    camry.fw = vec![
        fw(Ecu::Engine, 0x7E0, None, &[b"\x018966306Q5000\x00\x00\x00\x00"]),
        fw(Ecu::Abs, 0x7B0, None, &[b"F152606210\x00\x00\x00\x00\x00\x00"]),
        fw(Ecu::Eps, 0x7A1, None, &[b"8965B33540\x00\x00\x00\x00\x00\x00"]),
        fw(Ecu::Transmission, 0x7E1, None, &[b"\x018966306L9000\x00\x00\x00\x00"]),
        fw(Ecu::FwdRadar, 0x750, Some(0x0F), &[b"\x018821F6201200\x00\x00\x00\x00"]),
        fw(
            Ecu::FwdCamera,
            0x750,
            Some(0x6D),
            &[b"\x028646F0602100\x00\x00\x00\x008646G5301200\x00\x00\x00\x00"],
        ),
    ];
    camry.vin = vin(&["4T1"], &["B1", "K1"]);

    vec![rav4, camry]
}

// ── Honda ───────────────────────────────────────────────────────

fn honda() -> BrandConfig {
    BrandConfig::new(
        "honda",
        vec![
            FwRequest::new(steps(&[UDS_VERSION]), steps(&[UDS_VERSION_RESPONSE])).bus(1),
            FwRequest::new(steps(&[HONDA_VERSION]), steps(&[HONDA_VERSION_RESPONSE]))
                .bus(1)
                .logging(),
            // powertrain bus on cars without a gateway
            FwRequest::new(steps(&[UDS_VERSION]), steps(&[UDS_VERSION_RESPONSE])).bus(0),
            FwRequest::new(steps(&[UDS_VERSION]), steps(&[UDS_VERSION_RESPONSE]))
                .bus(1)
                .obd_multiplexing(false),
        ],
    )
}

fn honda_platforms() -> Vec<PlatformDef> {
    let mut civic = platform("HONDA_CIVIC", "honda", Some("honda_civic_touring_2016_can_generated"));
    civic.fingerprints = vec![vec![
        (0x14A, 8),
        (0x158, 8),
        (0x17C, 8),
        (0x191, 8),
        (0x1A6, 8),
        (0x1D0, 8),
        (0x255, 8),
        (0x296, 4),
        (0x309, 8),
        (0x324, 8),
    ]];
    civic.fw = vec![
        fw(Ecu::Engine, 0x18DA_10F1, None, &[b"37805-5AA-A640\x00\x00", b"37805-5AA-A650\x00\x00"]),
        fw(Ecu::Transmission, 0x18DA_1EF1, None, &[b"28101-5CG-A040\x00\x00"]),
        fw(Ecu::Eps, 0x18DA_30F1, None, &[b"39990-TBA-A030\x00\x00"]),
        fw(Ecu::Vsa, 0x18DA_28F1, None, &[b"57114-TBA-A550\x00\x00"]),
        fw(Ecu::FwdRadar, 0x18DA_B0F1, None, &[b"36161-TBA-A030\x00\x00"]),
    ];
    civic.vin = vin(&["2HG", "19X"], &["FC"]);

    let mut accord = platform("HONDA_ACCORD", "honda", Some("honda_accord_2018_can_generated"));
    accord.fingerprints = vec![vec![
        (0x14A, 8),
        (0x158, 8),
        (0x17C, 8),
        (0x191, 8),
        (0x1A6, 8),
        (0x1D0, 8),
        (0x255, 8),
        (0x296, 8),
        (0x309, 8),
    ]];
    accord.fw = vec![
        fw(Ecu::Engine, 0x18DA_10F1, None, &[b"37805-6B2-A650\x00\x00"]),
        fw(Ecu::Eps, 0x18DA_30F1, None, &[b"39990-TVA-A150\x00\x00"]),
        fw(Ecu::Vsa, 0x18DA_28F1, None, &[b"57114-TVA-C040\x00\x00"]),
        fw(Ecu::FwdRadar, 0x18DA_B0F1, None, &[b"36802-TVA-A160\x00\x00"]),
        fw(Ecu::FwdCamera, 0x18DA_B5F1, None, &[b"36161-TVA-A060\x00\x00"]),
        fw(Ecu::Srs, 0x18DA_53F1, None, &[b"77959-TVA-A460\x00\x00"]),
    ];
    accord.vin = vin(&["1HG"], &["CV"]);

    vec![civic, accord]
}

// ── Hyundai ─────────────────────────────────────────────────────

fn hyundai() -> BrandConfig {
    BrandConfig::new(
        "hyundai",
        vec![
            FwRequest::new(
                steps(&[TESTER_PRESENT, HYUNDAI_VERSION]),
                steps(&[TESTER_PRESENT_RESPONSE, HYUNDAI_VERSION_RESPONSE]),
            )
            .whitelist(&[
                Ecu::Engine,
                Ecu::Transmission,
                Ecu::Eps,
                Ecu::Abs,
                Ecu::FwdRadar,
                Ecu::FwdCamera,
            ])
            .bus(0)
            .auxiliary(),
        ],
    )
}

fn hyundai_platforms() -> Vec<PlatformDef> {
    let mut sonata = platform("HYUNDAI_SONATA", "hyundai", Some("hyundai_kia_generic"));
    sonata.fingerprints = vec![vec![
        (0x251, 8),
        (0x260, 8),
        (0x2B0, 6),
        (0x340, 8),
        (0x381, 8),
        (0x386, 8),
        (0x394, 8),
        (0x47F, 8),
        (0x4F1, 4),
    ]];
    sonata.fw = vec![
        fw(Ecu::FwdRadar, 0x7D0, None, &[b"\xf1\x00DN8_ SCC F-CU-      1.00 1.00 99110-L0000         "]),
        fw(Ecu::FwdCamera, 0x7C4, None, &[b"\xf1\x00DN8 MFC  AT USA LHD 1.00 1.00 99211-L0000 191016"]),
        fw(Ecu::Eps, 0x7D4, None, &[b"\xf1\x00DN8 MDPS C 1.00 1.01 56310L0010\x00 4DNAC101"]),
        fw(Ecu::Abs, 0x7D1, None, &[b"\xf1\x00DN ESC \x01 102\x19\x04\x13 58910-L1300"]),
        fw(Ecu::Engine, 0x7E0, None, &[b"HM6M2_0a0_BD0", b"HM6M2_0a0_BG0"]),
        fw(Ecu::Transmission, 0x7E1, None, &[b"\xf1\x00HT6TA260BLHT6TA800A1TDN8C20KS4\x00\x00\x00\x00\x00\x00"]),
    ];
    sonata.vin = vin(&["5NP", "KMH"], &["L4"]);

    // CAN FD platform; identified by firmware only
    let mut ioniq = platform("HYUNDAI_IONIQ_5", "hyundai", Some("hyundai_canfd"));
    ioniq.fw = vec![
        fw(Ecu::FwdRadar, 0x7D0, None, &[b"\xf1\x00NE1_ RDR -----      1.00 1.00 99110-GI000         "]),
        fw(Ecu::FwdCamera, 0x7C4, None, &[b"\xf1\x00NE1 MFC  AT USA LHD 1.00 1.02 99211-GI010 211206"]),
        fw(Ecu::Eps, 0x7D4, None, &[b"\xf1\x00NE  MDPS R 1.00 1.06 57700GI000  4NEDR106"]),
    ];
    ioniq.vin = vin(&["KM8"], &["KN"]);

    vec![sonata, ioniq]
}

// ── Volkswagen ──────────────────────────────────────────────────

fn volkswagen() -> BrandConfig {
    let mut brand = BrandConfig::new(
        "volkswagen",
        vec![
            FwRequest::new(
                steps(&[EXTENDED_SESSION, VW_SPARE_PART]),
                steps(&[EXTENDED_SESSION_RESPONSE, VW_SPARE_PART_RESPONSE]),
            )
            .whitelist(&[Ecu::Srs, Ecu::Eps, Ecu::FwdRadar])
            .rx_offset(VW_RX_OFFSET),
            FwRequest::new(
                steps(&[EXTENDED_SESSION, VW_SPARE_PART]),
                steps(&[EXTENDED_SESSION_RESPONSE, VW_SPARE_PART_RESPONSE]),
            )
            .whitelist(&[Ecu::Engine, Ecu::Transmission]),
        ],
    );
    brand.vin_rule = Some(VinFuzzyRule {
        check_ecus: vec![Ecu::Engine, Ecu::Transmission, Ecu::Srs],
    });
    brand
}

fn volkswagen_platforms() -> Vec<PlatformDef> {
    let mut golf = platform("VOLKSWAGEN_GOLF_MK7", "volkswagen", Some("vw_mqb_2010"));
    golf.fingerprints = vec![vec![
        (0x86, 8),
        (0x9F, 8),
        (0xAD, 8),
        (0xFD, 8),
        (0x101, 8),
        (0x106, 8),
        (0x116, 8),
        (0x117, 8),
        (0x120, 8),
        (0x121, 8),
        (0x126, 8),
        (0x12B, 8),
    ]];
    golf.fw = vec![
        fw(
            Ecu::Engine,
            0x7E0,
            None,
            &[b"\xf1\x8704E906016A \xf1\x890003", b"\xf1\x8704E906024AH\xf1\x899970"],
        ),
        fw(Ecu::Transmission, 0x7E1, None, &[b"\xf1\x870CW300047D \xf1\x895261"]),
        fw(Ecu::Srs, 0x715, None, &[b"\xf1\x875Q0959655J \xf1\x890830\xf1\x82\x13131111111111--1134"]),
        fw(Ecu::Eps, 0x712, None, &[b"\xf1\x875Q0909144AA\xf1\x891081\xf1\x82\x0521A10A0520"]),
        fw(Ecu::FwdRadar, 0x757, None, &[b"\xf1\x875Q0907572A \xf1\x890141\xf1\x82\x0101"]),
    ];
    golf.vin = vin(&["WVW", "WVG", "3VW"], &["5G", "AU", "BA", "BE"]);

    let mut passat = platform("VOLKSWAGEN_PASSAT_MK8", "volkswagen", Some("vw_mqb_2010"));
    passat.fingerprints = vec![vec![
        (0x86, 8),
        (0x9F, 8),
        (0xAD, 8),
        (0xFD, 8),
        (0x101, 8),
        (0x106, 8),
        (0x116, 8),
        (0x117, 8),
        (0x120, 8),
        (0x121, 8),
        (0x126, 8),
        (0x12B, 8),
        (0x30B, 8),
    ]];
    passat.fw = vec![
        fw(
            Ecu::Engine,
            0x7E0,
            None,
            &[b"\xf1\x8704E906016A \xf1\x890003", b"\xf1\x8703N906026E \xf1\x892114"],
        ),
        fw(Ecu::Transmission, 0x7E1, None, &[b"\xf1\x870D9300043  \xf1\x895202"]),
        fw(
            Ecu::Srs,
            0x715,
            None,
            &[b"\xf1\x873Q0959655BH\xf1\x890703\xf1\x82\x0e1616001613121157161111572900"],
        ),
        fw(Ecu::Eps, 0x712, None, &[b"\xf1\x873Q0909144J \xf1\x895063\xf1\x82\x0566A01513A1"]),
        fw(Ecu::FwdRadar, 0x757, None, &[b"\xf1\x873Q0907572C \xf1\x890195"]),
    ];
    passat.vin = vin(&["WVW", "WV2"], &["3C", "3G"]);

    vec![golf, passat]
}
