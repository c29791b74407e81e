//! ECU roles and addressing.

use serde::{Deserialize, Serialize};

/// Functional role of an ECU on the vehicle bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ecu {
    Eps,
    Abs,
    FwdRadar,
    FwdCamera,
    Engine,
    Unknown,
    Transmission,
    Hybrid,
    Srs,
    Gateway,
    Hud,
    CombinationMeter,
    Vsa,
    ProgrammedFuelInjection,
    ElectricBrakeBooster,
    ShiftByWire,
    Adas,
    CornerRadar,
    Hvac,
    ParkingAdas,
    Epb,
    Telematics,
    Body,
    /// Virtual ECU used to log data from a non-standard request; never matched.
    Debug,
}

/// ECUs that must be present (and match) for an exact firmware match unless
/// a platform explicitly marks them non-essential.
pub const ESSENTIAL_ECUS: &[Ecu] = &[
    Ecu::Engine,
    Ecu::Eps,
    Ecu::Abs,
    Ecu::FwdRadar,
    Ecu::FwdCamera,
    Ecu::Vsa,
];

/// ECUs whose firmware is shared across platforms often enough to produce
/// false fuzzy matches.
pub const FUZZY_EXCLUDE_ECUS: &[Ecu] = &[Ecu::FwdCamera, Ecu::FwdRadar, Ecu::Eps, Ecu::Debug];

impl Ecu {
    pub fn is_essential(self) -> bool {
        ESSENTIAL_ECUS.contains(&self)
    }

    /// Wire name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Ecu::Eps => "eps",
            Ecu::Abs => "abs",
            Ecu::FwdRadar => "fwdRadar",
            Ecu::FwdCamera => "fwdCamera",
            Ecu::Engine => "engine",
            Ecu::Unknown => "unknown",
            Ecu::Transmission => "transmission",
            Ecu::Hybrid => "hybrid",
            Ecu::Srs => "srs",
            Ecu::Gateway => "gateway",
            Ecu::Hud => "hud",
            Ecu::CombinationMeter => "combinationMeter",
            Ecu::Vsa => "vsa",
            Ecu::ProgrammedFuelInjection => "programmedFuelInjection",
            Ecu::ElectricBrakeBooster => "electricBrakeBooster",
            Ecu::ShiftByWire => "shiftByWire",
            Ecu::Adas => "adas",
            Ecu::CornerRadar => "cornerRadar",
            Ecu::Hvac => "hvac",
            Ecu::ParkingAdas => "parkingAdas",
            Ecu::Epb => "epb",
            Ecu::Telematics => "telematics",
            Ecu::Body => "body",
            Ecu::Debug => "debug",
        }
    }
}

impl std::fmt::Display for Ecu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transmit address of an ECU plus the optional sub-address byte some
/// gateways prefix to every ISO-TP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EcuAddr {
    pub address: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_address: Option<u8>,
}

impl EcuAddr {
    pub fn new(address: u32, sub_address: Option<u8>) -> Self {
        Self {
            address,
            sub_address,
        }
    }
}

impl std::fmt::Display for EcuAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub_address {
            Some(sub) => write!(f, "0x{:X}/0x{sub:02X}", self.address),
            None => write!(f, "0x{:X}", self.address),
        }
    }
}

/// An ECU role at a concrete address, the key of firmware tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EcuKey {
    pub ecu: Ecu,
    pub address: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_address: Option<u8>,
}

impl EcuKey {
    pub fn new(ecu: Ecu, address: u32, sub_address: Option<u8>) -> Self {
        Self {
            ecu,
            address,
            sub_address,
        }
    }

    pub fn addr(&self) -> EcuAddr {
        EcuAddr::new(self.address, self.sub_address)
    }
}

/// An ECU that answered a presence check: response address, sub-address, bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EcuAddrBus {
    pub address: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_address: Option<u8>,
    pub bus: u8,
}

impl EcuAddrBus {
    pub fn new(address: u32, sub_address: Option<u8>, bus: u8) -> Self {
        Self {
            address,
            sub_address,
            bus,
        }
    }
}
