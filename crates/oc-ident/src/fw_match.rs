//! Firmware version matching against platform tables.
//!
//! Exact matching requires every known ECU of a platform that is present to
//! report a known version, and every essential ECU to be present. Fuzzy
//! matching looks for firmware versions that only one platform has ever
//! shipped and accepts a platform when at least two ECUs agree on it.

use std::collections::{BTreeMap, BTreeSet};

use oc_protocol::{CarFw, Ecu, EcuAddr, Vin};
use serde::Serialize;

use crate::config::IdentConfig;
use crate::platforms::{BrandConfig, Platform, PlatformRegistry, VinFuzzyRule};

/// Live firmware versions by `(address, sub_address)`.
pub type LiveFwVersions = BTreeMap<EcuAddr, BTreeSet<Vec<u8>>>;

/// Minimum number of uniquely resolving ECUs for a fuzzy match.
const MIN_FUZZY_ECUS: usize = 2;

/// Outcome of firmware matching. Ambiguity is a value, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FwMatch {
    /// Whether the candidates came from exact matching.
    pub exact: bool,
    pub candidates: BTreeSet<String>,
}

impl FwMatch {
    /// Exactly one candidate.
    pub fn confident(&self) -> bool {
        self.candidates.len() == 1
    }

    /// The single candidate, if confident.
    pub fn platform(&self) -> Option<&str> {
        if self.confident() {
            self.candidates.iter().next().map(String::as_str)
        } else {
            None
        }
    }
}

/// Index collected firmware by address, dropping logging-only responses
/// and, when `brand` is given, responses to other brands' queries.
pub fn build_fw_dict(fws: &[CarFw], brand: Option<&str>) -> LiveFwVersions {
    let mut dict = LiveFwVersions::new();
    for fw in fws {
        if fw.logging || brand.is_some_and(|b| fw.brand != b) {
            continue;
        }
        dict.entry(fw.addr()).or_default().insert(fw.fw_version.clone());
    }
    dict
}

fn in_brand<'a>(
    registry: &'a PlatformRegistry,
    brand: Option<&'a str>,
) -> impl Iterator<Item = &'a Platform> {
    registry
        .platforms()
        .filter(move |p| brand.is_none_or(|b| p.brand == b))
}

/// Platforms whose firmware tables are fully consistent with the live
/// versions.
pub fn match_fw_to_car_exact(
    registry: &PlatformRegistry,
    live: &LiveFwVersions,
    brand: Option<&str>,
) -> BTreeSet<String> {
    let mut matches = BTreeSet::new();
    'platforms: for platform in in_brand(registry, brand) {
        let config = registry.brand(&platform.brand);
        for (key, expected) in &platform.fw_versions {
            if key.ecu == Ecu::Debug {
                continue;
            }
            match live.get(&key.addr()) {
                None => {
                    let non_essential = !key.ecu.is_essential()
                        || config.is_some_and(|c| c.is_non_essential(key.ecu, &platform.name));
                    if !non_essential {
                        continue 'platforms;
                    }
                }
                Some(found) => {
                    if found.is_disjoint(expected) {
                        continue 'platforms;
                    }
                }
            }
        }
        matches.insert(platform.name.clone());
    }
    matches
}

/// Fuzzy match: every ECU whose live version belongs to exactly one
/// platform votes for it. Any disagreement between votes invalidates the
/// match.
pub fn match_fw_to_car_fuzzy(
    registry: &PlatformRegistry,
    live: &LiveFwVersions,
    brand: Option<&str>,
    exclude: &[Ecu],
) -> BTreeSet<String> {
    let mut index: BTreeMap<(EcuAddr, &[u8]), BTreeSet<&str>> = BTreeMap::new();
    for platform in in_brand(registry, brand) {
        for (key, versions) in &platform.fw_versions {
            if exclude.contains(&key.ecu) {
                continue;
            }
            for version in versions {
                index
                    .entry((key.addr(), version.as_slice()))
                    .or_default()
                    .insert(platform.name.as_str());
            }
        }
    }

    let mut matched_ecus = BTreeSet::new();
    let mut candidate: Option<&str> = None;
    for (addr, versions) in live {
        for version in versions {
            let Some(platforms) = index.get(&(*addr, version.as_slice())) else {
                continue;
            };
            if platforms.len() != 1 {
                continue;
            }
            let Some(&platform) = platforms.iter().next() else {
                continue;
            };
            matched_ecus.insert(*addr);
            match candidate {
                None => candidate = Some(platform),
                Some(previous) if previous != platform => {
                    tracing::error!(
                        first = previous,
                        second = platform,
                        address = %addr,
                        "fuzzy match invalidated by conflicting unique versions"
                    );
                    return BTreeSet::new();
                }
                Some(_) => {}
            }
        }
    }

    match candidate {
        Some(platform) if matched_ecus.len() >= MIN_FUZZY_ECUS => {
            tracing::info!(platform, ecus = matched_ecus.len(), "fuzzy firmware match");
            BTreeSet::from([platform.to_string()])
        }
        _ => BTreeSet::new(),
    }
}

/// Brand VIN rule: the checked ECUs must all report firmware the brand has
/// shipped on that ECU, and the VIN must fit the platform's pattern.
pub fn match_vin_fuzzy(
    registry: &PlatformRegistry,
    live: &LiveFwVersions,
    vin: &Vin,
    brand: &BrandConfig,
    rule: &VinFuzzyRule,
) -> BTreeSet<String> {
    let check: BTreeSet<Ecu> = rule.check_ecus.iter().copied().collect();
    let mut superset: BTreeMap<_, BTreeSet<&[u8]>> = BTreeMap::new();
    for platform in registry.platforms_of(&brand.name) {
        for (key, versions) in &platform.fw_versions {
            superset
                .entry(*key)
                .or_default()
                .extend(versions.iter().map(Vec::as_slice));
        }
    }

    registry
        .platforms_of(&brand.name)
        .filter(|platform| {
            let mut valid = BTreeSet::new();
            for key in platform.fw_versions.keys().filter(|k| check.contains(&k.ecu)) {
                let known = superset.get(key);
                let found = live.get(&key.addr()).is_some_and(|versions| {
                    versions
                        .iter()
                        .any(|v| known.is_some_and(|k| k.contains(v.as_slice())))
                });
                if !found {
                    return false;
                }
                valid.insert(key.ecu);
            }
            valid == check && platform.vin.as_ref().is_some_and(|pattern| pattern.matches(vin))
        })
        .map(|platform| platform.name.clone())
        .collect()
}

/// Match collected firmware to a platform, brand by brand.
///
/// Exact matching runs first; a single exact candidate is returned as is.
/// Otherwise fuzzy matching (with brand VIN rules as a last resort) runs,
/// and its result wins when non-empty. Failing both, the possibly
/// ambiguous exact set is returned.
pub fn match_fw_to_car(
    registry: &PlatformRegistry,
    fws: &[CarFw],
    vin: &Vin,
    config: &IdentConfig,
) -> FwMatch {
    let mut exact = BTreeSet::new();
    if config.allow_exact {
        for brand in registry.brands() {
            let live = build_fw_dict(fws, Some(&brand.name));
            exact.extend(match_fw_to_car_exact(registry, &live, Some(&brand.name)));
        }
        if exact.len() == 1 {
            return FwMatch {
                exact: true,
                candidates: exact,
            };
        }
    }

    if config.allow_fuzzy {
        let mut fuzzy = BTreeSet::new();
        for brand in registry.brands() {
            let live = build_fw_dict(fws, Some(&brand.name));
            fuzzy.extend(match_fw_to_car_fuzzy(
                registry,
                &live,
                Some(&brand.name),
                &config.fuzzy_exclude_ecus,
            ));
            if fuzzy.is_empty() && let Some(rule) = &brand.vin_rule {
                fuzzy.extend(match_vin_fuzzy(registry, &live, vin, brand, rule));
            }
        }
        if !fuzzy.is_empty() {
            return FwMatch {
                exact: false,
                candidates: fuzzy,
            };
        }
    }

    FwMatch {
        exact: true,
        candidates: exact,
    }
}
