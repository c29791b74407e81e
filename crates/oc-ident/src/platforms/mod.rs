//! Known platforms and per-brand firmware query configuration.
//!
//! A [`PlatformRegistry`] is built once, either from the tables compiled
//! into the crate ([`PlatformRegistry::builtin`]) or from a TOML
//! [`PlatformDatabase`], and is immutable afterwards.

mod builtin;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use oc_dbc::ChecksumLayout;
use oc_protocol::{Ecu, EcuKey, Vin};
use serde::{Deserialize, Serialize};

use crate::error::{IdentError, IdentResult};

// ── Firmware queries ────────────────────────────────────────────

/// One firmware query a brand runs: a request sequence, the expected
/// response prefix for each step, and where to send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FwRequest {
    #[serde(with = "hex_steps")]
    pub request: Vec<Vec<u8>>,
    #[serde(with = "hex_steps")]
    pub response: Vec<Vec<u8>>,
    /// Only query ECUs with these roles. Empty means all.
    #[serde(default)]
    pub whitelist_ecus: Vec<Ecu>,
    #[serde(default = "default_rx_offset")]
    pub rx_offset: u32,
    #[serde(default = "default_bus")]
    pub bus: u8,
    /// Also run on the first auxiliary interface (bus + 4).
    #[serde(default)]
    pub auxiliary: bool,
    /// Responses are collected for logging only.
    #[serde(default)]
    pub logging: bool,
    #[serde(default = "default_true")]
    pub obd_multiplexing: bool,
}

fn default_rx_offset() -> u32 {
    0x8
}

fn default_bus() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

impl FwRequest {
    pub fn new(request: Vec<Vec<u8>>, response: Vec<Vec<u8>>) -> Self {
        Self {
            request,
            response,
            whitelist_ecus: Vec::new(),
            rx_offset: default_rx_offset(),
            bus: default_bus(),
            auxiliary: false,
            logging: false,
            obd_multiplexing: true,
        }
    }

    pub fn whitelist(mut self, ecus: &[Ecu]) -> Self {
        self.whitelist_ecus = ecus.to_vec();
        self
    }

    pub fn rx_offset(mut self, offset: u32) -> Self {
        self.rx_offset = offset;
        self
    }

    pub fn bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    pub fn auxiliary(mut self) -> Self {
        self.auxiliary = true;
        self
    }

    pub fn logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn obd_multiplexing(mut self, enabled: bool) -> Self {
        self.obd_multiplexing = enabled;
        self
    }

    /// Whether an ECU role is targeted by this request.
    pub fn targets(&self, ecu: Ecu) -> bool {
        self.whitelist_ecus.is_empty() || self.whitelist_ecus.contains(&ecu)
    }

    /// Final request step, recorded with every response.
    pub fn last_request(&self) -> Vec<u8> {
        self.request.last().cloned().unwrap_or_default()
    }
}

/// ECU role that may be missing for some platforms without failing an
/// exact match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonEssentialEcu {
    pub ecu: Ecu,
    pub platforms: Vec<String>,
}

/// Brand-level VIN fuzzy matching: every listed role must be present with
/// firmware the brand has shipped somewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinFuzzyRule {
    pub check_ecus: Vec<Ecu>,
}

/// VIN substructure identifying one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VinPattern {
    /// Accepted world manufacturer identifiers (VIN[0..3]).
    pub wmis: Vec<String>,
    /// Accepted chassis codes (VIN[6..8]).
    pub chassis_codes: Vec<String>,
    /// Accepted model-year characters (VIN[9]); any when absent.
    #[serde(default)]
    pub model_years: Option<String>,
}

impl VinPattern {
    pub fn matches(&self, vin: &Vin) -> bool {
        if vin.is_unknown() {
            return false;
        }
        self.wmis.iter().any(|w| w == vin.wmi())
            && self.chassis_codes.iter().any(|c| c == vin.chassis_code())
            && self
                .model_years
                .as_ref()
                .is_none_or(|years| years.contains(vin.model_year_code()))
    }
}

/// Firmware query behaviour of one brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandConfig {
    pub name: String,
    pub requests: Vec<FwRequest>,
    #[serde(default)]
    pub non_essential_ecus: Vec<NonEssentialEcu>,
    /// Queried for data collection; never used for matching.
    #[serde(default)]
    pub extra_ecus: Vec<EcuKey>,
    #[serde(default)]
    pub vin_rule: Option<VinFuzzyRule>,
}

impl BrandConfig {
    pub fn new(name: &str, requests: Vec<FwRequest>) -> Self {
        Self {
            name: name.to_string(),
            requests,
            non_essential_ecus: Vec::new(),
            extra_ecus: Vec::new(),
            vin_rule: None,
        }
    }

    pub fn is_non_essential(&self, ecu: Ecu, platform: &str) -> bool {
        self.non_essential_ecus
            .iter()
            .any(|n| n.ecu == ecu && n.platforms.iter().any(|p| p == platform))
    }

    /// Append a copy of every auxiliary request on the auxiliary bus.
    fn expand_auxiliary(&mut self) {
        let extra: Vec<FwRequest> = self
            .requests
            .iter()
            .filter(|r| r.auxiliary)
            .map(|r| {
                let mut copy = r.clone();
                copy.bus += 4;
                copy.auxiliary = false;
                copy
            })
            .collect();
        self.requests.extend(extra);
    }
}

// ── Platforms ───────────────────────────────────────────────────

/// Firmware version as written in a table: text, or raw bytes for
/// versions that are not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FwBytes {
    Text(String),
    Raw(Vec<u8>),
}

impl FwBytes {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Raw(b) => b,
        }
    }
}

/// Known firmware of one ECU of one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FwEntry {
    pub ecu: Ecu,
    pub address: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_address: Option<u8>,
    pub versions: Vec<FwBytes>,
}

/// A platform as written in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDef {
    pub name: String,
    pub brand: String,
    #[serde(default)]
    pub dbc: Option<String>,
    /// Fingerprint snapshots as `[address, length]` pairs.
    #[serde(default)]
    pub fingerprints: Vec<Vec<(u32, usize)>>,
    #[serde(default)]
    pub fw: Vec<FwEntry>,
    #[serde(default)]
    pub vin: Option<VinPattern>,
}

/// Serialized form of a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDatabase {
    #[serde(default)]
    pub brands: Vec<BrandConfig>,
    #[serde(default)]
    pub platforms: Vec<PlatformDef>,
}

/// A known vehicle platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub brand: String,
    pub dbc: Option<String>,
    pub fingerprints: Vec<BTreeMap<u32, usize>>,
    pub fw_versions: BTreeMap<EcuKey, BTreeSet<Vec<u8>>>,
    pub vin: Option<VinPattern>,
}

impl From<PlatformDef> for Platform {
    fn from(def: PlatformDef) -> Self {
        let mut fw_versions: BTreeMap<EcuKey, BTreeSet<Vec<u8>>> = BTreeMap::new();
        for entry in def.fw {
            fw_versions
                .entry(EcuKey::new(entry.ecu, entry.address, entry.sub_address))
                .or_default()
                .extend(entry.versions.into_iter().map(FwBytes::into_bytes));
        }
        Self {
            name: def.name,
            brand: def.brand,
            dbc: def.dbc,
            fingerprints: def
                .fingerprints
                .into_iter()
                .map(|snapshot| snapshot.into_iter().collect())
                .collect(),
            fw_versions,
            vin: def.vin,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────

static BUILTIN: LazyLock<PlatformRegistry> =
    LazyLock::new(|| PlatformRegistry::build(builtin::database()));

/// Immutable index of brands and platforms.
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    brands: BTreeMap<String, BrandConfig>,
    platforms: BTreeMap<String, Platform>,
}

impl PlatformRegistry {
    /// Validate and index a database.
    pub fn new(db: PlatformDatabase) -> IdentResult<Self> {
        validate(&db)?;
        Ok(Self::build(db))
    }

    /// Platforms compiled into the crate.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    pub fn from_toml_str(s: &str) -> IdentResult<Self> {
        Self::new(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> IdentResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| IdentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn build(db: PlatformDatabase) -> Self {
        let brands = db
            .brands
            .into_iter()
            .map(|mut brand| {
                brand.expand_auxiliary();
                (brand.name.clone(), brand)
            })
            .collect();
        let platforms = db
            .platforms
            .into_iter()
            .map(|def| (def.name.clone(), Platform::from(def)))
            .collect();
        Self { brands, platforms }
    }

    pub fn brands(&self) -> impl Iterator<Item = &BrandConfig> {
        self.brands.values()
    }

    pub fn brand(&self, name: &str) -> Option<&BrandConfig> {
        self.brands.get(name)
    }

    pub fn platform(&self, name: &str) -> Option<&Platform> {
        self.platforms.get(name)
    }

    pub fn platforms(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.values()
    }

    pub fn platforms_of<'a>(&'a self, brand: &'a str) -> impl Iterator<Item = &'a Platform> {
        self.platforms.values().filter(move |p| p.brand == brand)
    }

    /// Every (brand, request) pair, brands in name order.
    pub fn requests(&self) -> impl Iterator<Item = (&BrandConfig, &FwRequest)> {
        self.brands
            .values()
            .flat_map(|b| b.requests.iter().map(move |r| (b, r)))
    }

    /// ECUs in any of the brand's firmware tables, plus its extra ECUs.
    pub fn brand_ecus(&self, brand: &str, include_extra: bool) -> BTreeSet<EcuKey> {
        let mut ecus: BTreeSet<EcuKey> = self
            .platforms_of(brand)
            .flat_map(|p| p.fw_versions.keys().copied())
            .collect();
        if include_extra && let Some(config) = self.brands.get(brand) {
            ecus.extend(config.extra_ecus.iter().copied());
        }
        ecus
    }

    /// Checksum layout of the platform's DBC, if it uses one.
    pub fn checksum_layout(&self, platform: &str) -> Option<ChecksumLayout> {
        let dbc = self.platforms.get(platform)?.dbc.as_deref()?;
        ChecksumLayout::for_dbc(dbc)
    }
}

fn validate(db: &PlatformDatabase) -> IdentResult<()> {
    let mut brands = BTreeSet::new();
    for brand in &db.brands {
        if !brands.insert(brand.name.as_str()) {
            return Err(IdentError::DuplicateBrand(brand.name.clone()));
        }
        for request in &brand.requests {
            if request.request.is_empty() || request.request.len() != request.response.len() {
                return Err(IdentError::Table(format!(
                    "brand '{}': {} request steps for {} responses",
                    brand.name,
                    request.request.len(),
                    request.response.len()
                )));
            }
        }
    }

    let mut platforms = BTreeSet::new();
    for platform in &db.platforms {
        if !platforms.insert(platform.name.as_str()) {
            return Err(IdentError::DuplicatePlatform(platform.name.clone()));
        }
        if !brands.contains(platform.brand.as_str()) {
            return Err(IdentError::UnknownBrand {
                platform: platform.name.clone(),
                brand: platform.brand.clone(),
            });
        }
    }
    Ok(())
}

/// Request steps written as hex strings, e.g. `"22F181"`.
mod hex_steps {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(steps: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(
            steps
                .iter()
                .map(|step| step.iter().map(|b| format!("{b:02X}")).collect::<String>()),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| parse(s).ok_or_else(|| D::Error::custom(format!("invalid hex '{s}'"))))
            .collect()
    }

    pub fn parse(s: &str) -> Option<Vec<u8>> {
        let digits: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return None;
        }
        digits
            .chunks(2)
            .map(|pair| {
                let hi = pair[0].to_digit(16)?;
                let lo = pair[1].to_digit(16)?;
                Some((hi * 16 + lo) as u8)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"
[[brands]]
name = "acme"
extra_ecus = [{ ecu = "debug", address = 0x7E3 }]
non_essential_ecus = [{ ecu = "engine", platforms = ["ACME_EV"] }]

[[brands.requests]]
request = ["1003", "22 F1 81"]
response = ["5003", "62F181"]
whitelist_ecus = ["engine", "eps"]
bus = 0
auxiliary = true

[[brands.requests]]
request = ["22F188"]
response = ["62F188"]
logging = true
obd_multiplexing = false

[[platforms]]
name = "ACME_SEDAN"
brand = "acme"
dbc = "toyota_nodsu_pt_generated"
fingerprints = [[[0x24, 8], [0x25, 8]], [[0x24, 8]]]

[[platforms.fw]]
ecu = "engine"
address = 0x7E0
versions = ["E1", [0xF1, 0x00, 0x41]]

[[platforms.fw]]
ecu = "fwdRadar"
address = 0x750
sub_address = 0x0F
versions = ["R1"]

[[platforms]]
name = "ACME_EV"
brand = "acme"

[[platforms.fw]]
ecu = "eps"
address = 0x7A1
versions = ["S1"]
"#;

    #[test]
    fn loads_toml_database() {
        let registry = PlatformRegistry::from_toml_str(DB).unwrap();
        let brand = registry.brand("acme").unwrap();

        // auxiliary request duplicated on bus 4
        assert_eq!(brand.requests.len(), 3);
        assert_eq!(brand.requests[2].bus, 4);
        assert_eq!(brand.requests[0].request, vec![vec![0x10, 0x03], vec![0x22, 0xF1, 0x81]]);
        assert_eq!(brand.requests[1].bus, 1); // default
        assert_eq!(brand.requests[1].rx_offset, 8);
        assert!(!brand.requests[1].obd_multiplexing);
        assert!(brand.requests[1].targets(Ecu::Hvac));
        assert!(!brand.requests[0].targets(Ecu::Hvac));
        assert!(brand.is_non_essential(Ecu::Engine, "ACME_EV"));
        assert!(!brand.is_non_essential(Ecu::Engine, "ACME_SEDAN"));

        let sedan = registry.platform("ACME_SEDAN").unwrap();
        assert_eq!(sedan.fingerprints.len(), 2);
        assert_eq!(sedan.fingerprints[0][&0x25], 8);
        let engine = &sedan.fw_versions[&EcuKey::new(Ecu::Engine, 0x7E0, None)];
        assert!(engine.contains(b"E1".as_slice()));
        assert!(engine.contains([0xF1, 0x00, 0x41].as_slice()));
    }

    #[test]
    fn brand_ecus_include_extras() {
        let registry = PlatformRegistry::from_toml_str(DB).unwrap();
        let all = registry.brand_ecus("acme", true);
        assert_eq!(all.len(), 4);
        assert!(all.contains(&EcuKey::new(Ecu::Debug, 0x7E3, None)));
        assert!(all.contains(&EcuKey::new(Ecu::FwdRadar, 0x750, Some(0x0F))));
        assert_eq!(registry.brand_ecus("acme", false).len(), 3);
        assert!(registry.brand_ecus("nobody", true).is_empty());
    }

    #[test]
    fn checksum_layout_from_dbc() {
        let registry = PlatformRegistry::from_toml_str(DB).unwrap();
        let layout = registry.checksum_layout("ACME_SEDAN").unwrap();
        assert_eq!(layout.kind, oc_dbc::ChecksumKind::Toyota);
        assert!(registry.checksum_layout("ACME_EV").is_none());
    }

    #[test]
    fn rejects_bad_tables() {
        let unknown_brand = r#"
[[platforms]]
name = "X"
brand = "nobody"
"#;
        assert!(matches!(
            PlatformRegistry::from_toml_str(unknown_brand),
            Err(IdentError::UnknownBrand { .. })
        ));

        let steps = r#"
[[brands]]
name = "acme"
[[brands.requests]]
request = ["1003", "22F181"]
response = ["5003"]
"#;
        assert!(matches!(PlatformRegistry::from_toml_str(steps), Err(IdentError::Table(_))));

        let bad_hex = r#"
[[brands]]
name = "acme"
[[brands.requests]]
request = ["22F18"]
response = ["62F181"]
"#;
        assert!(matches!(PlatformRegistry::from_toml_str(bad_hex), Err(IdentError::Toml(_))));

        let duplicate = r#"
[[brands]]
name = "acme"
requests = []
[[brands]]
name = "acme"
requests = []
"#;
        assert!(matches!(
            PlatformRegistry::from_toml_str(duplicate),
            Err(IdentError::DuplicateBrand(_))
        ));
    }

    #[test]
    fn builtin_tables_are_valid() {
        assert!(validate(&builtin::database()).is_ok());
        let registry = PlatformRegistry::builtin();
        assert!(registry.brands().count() >= 4);
        for platform in registry.platforms() {
            assert!(registry.brand(&platform.brand).is_some(), "{}", platform.name);
            assert!(!platform.fw_versions.is_empty(), "{}", platform.name);
        }
    }

    #[test]
    fn vin_pattern() {
        let pattern = VinPattern {
            wmis: vec!["WVW".into()],
            chassis_codes: vec!["AU".into()],
            model_years: Some("FGH".into()),
        };
        assert!(pattern.matches(&Vin::parse("WVWZZZAUZGW000001").unwrap()));
        assert!(!pattern.matches(&Vin::parse("WVWZZZAUZJW000001").unwrap()));
        assert!(!pattern.matches(&Vin::parse("WVWZZZ3CZGW000001").unwrap()));
        assert!(!pattern.matches(&Vin::unknown()));
    }

    #[test]
    fn request_serializes_as_hex() {
        let request = FwRequest::new(vec![vec![0x22, 0xF1, 0x81]], vec![vec![0x62, 0xF1, 0x81]]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["request"][0], "22F181");
    }
}
