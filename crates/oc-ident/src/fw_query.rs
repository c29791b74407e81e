//! Firmware query pipeline: find present ECUs, rank brands by how many of
//! their known ECUs answered, and read firmware versions brand by brand.

use std::collections::{BTreeMap, BTreeSet};

use oc_canbus_tools::CanTransport;
use oc_canbus_tools::ecu_addrs::get_ecu_addrs;
use oc_canbus_tools::parallel_query::IsoTpParallelQuery;
use oc_canbus_tools::uds::{rx_addr_for_tx_addr, tx_addr_for_rx_addr};
use oc_protocol::{CarFw, Ecu, EcuAddr, EcuAddrBus, EcuKey, Vin, hex_bytes};

use crate::config::IdentConfig;
use crate::fw_match::match_fw_to_car;
use crate::platforms::{BrandConfig, FwRequest, PlatformRegistry};

/// For each brand, the known ECU addresses that answered a presence check
/// under any of the brand's response offsets.
pub fn get_brand_ecu_matches(
    registry: &PlatformRegistry,
    present: &BTreeSet<EcuAddrBus>,
) -> BTreeMap<String, BTreeSet<EcuAddr>> {
    let brand_addrs: BTreeMap<&str, BTreeSet<EcuAddr>> = registry
        .brands()
        .map(|b| {
            let addrs = registry.brand_ecus(&b.name, true).iter().map(EcuKey::addr).collect();
            (b.name.as_str(), addrs)
        })
        .collect();
    let rx_offsets: BTreeSet<(&str, u32)> = registry
        .requests()
        .map(|(b, r)| (b.name.as_str(), r.rx_offset))
        .collect();

    let mut matches: BTreeMap<String, BTreeSet<EcuAddr>> = registry
        .brands()
        .map(|b| (b.name.clone(), BTreeSet::new()))
        .collect();
    for found in present {
        // the answering request is unknown, so try every offset
        for &(brand, offset) in &rx_offsets {
            let Some(tx) = tx_addr_for_rx_addr(found.address, offset) else {
                continue;
            };
            let addr = EcuAddr::new(tx, found.sub_address);
            if brand_addrs.get(brand).is_some_and(|known| known.contains(&addr)) {
                matches.entry(brand.to_string()).or_default().insert(addr);
            }
        }
    }
    matches
}

/// Runs firmware queries over one transport.
pub struct FwQuery<'a> {
    transport: &'a dyn CanTransport,
    registry: &'a PlatformRegistry,
    config: &'a IdentConfig,
}

impl<'a> FwQuery<'a> {
    pub fn new(
        transport: &'a dyn CanTransport,
        registry: &'a PlatformRegistry,
        config: &'a IdentConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
        }
    }

    async fn set_obd_multiplexing(&self, enabled: bool) {
        if let Err(e) = self.transport.set_obd_multiplexing(enabled).await {
            tracing::warn!(enabled, error = %e, "failed to set OBD multiplexing");
        }
    }

    /// TesterPresent scan of every ECU any brand could query, grouped by
    /// multiplexing mode. Sub-addressed ECUs are scanned one at a time.
    pub async fn get_present_ecus(&self) -> BTreeSet<EcuAddrBus> {
        let max_bus = self.config.max_bus();
        let mut parallel: BTreeMap<bool, BTreeSet<EcuAddrBus>> = BTreeMap::new();
        let mut single: BTreeMap<bool, BTreeSet<EcuAddrBus>> = BTreeMap::new();
        let mut responses = BTreeSet::new();

        for (brand, request) in self.registry.requests() {
            if request.bus > max_bus {
                continue;
            }
            for key in self.registry.brand_ecus(&brand.name, true) {
                if !request.targets(key.ecu) {
                    continue;
                }
                let query = EcuAddrBus::new(key.address, key.sub_address, request.bus);
                let group = if key.sub_address.is_none() {
                    &mut parallel
                } else {
                    &mut single
                };
                group.entry(request.obd_multiplexing).or_default().insert(query);

                match rx_addr_for_tx_addr(key.address, request.rx_offset) {
                    Ok(Some(rx)) => {
                        responses.insert(EcuAddrBus::new(rx, key.sub_address, request.bus));
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(brand = brand.name, error = %e, "no response address"),
                }
            }
        }

        let mut present = BTreeSet::new();
        for mode in [true, false] {
            let mut groups: Vec<BTreeSet<EcuAddrBus>> = single
                .get(&mode)
                .into_iter()
                .flatten()
                .map(|q| BTreeSet::from([*q]))
                .collect();
            if let Some(targets) = parallel.get(&mode) {
                let targets: Vec<EcuAddrBus> = targets.iter().copied().collect();
                groups.extend(targets.chunks(self.config.chunk()).map(|c| c.iter().copied().collect()));
            }
            if groups.is_empty() {
                continue;
            }

            self.set_obd_multiplexing(mode).await;
            for group in &groups {
                present.extend(
                    get_ecu_addrs(self.transport, group, &responses, self.config.presence_timeout())
                        .await,
                );
            }
        }
        tracing::info!(count = present.len(), "present ECUs");
        present
    }

    /// Query firmware of every known ECU of `brand` (or of all brands).
    pub async fn get_fw_versions(&self, brand: Option<&str>) -> Vec<CarFw> {
        let brands: Vec<&BrandConfig> = self
            .registry
            .brands()
            .filter(|b| brand.is_none_or(|q| b.name == q))
            .collect();

        let mut ecu_types: BTreeMap<(&str, EcuAddr), Ecu> = BTreeMap::new();
        let mut parallel: Vec<(&str, EcuAddr)> = Vec::new();
        let mut groups: Vec<Vec<(&str, EcuAddr)>> = Vec::new();
        for b in &brands {
            for key in self.registry.brand_ecus(&b.name, true) {
                let target = (b.name.as_str(), key.addr());
                ecu_types.entry(target).or_insert(key.ecu);
                if key.sub_address.is_none() {
                    if !parallel.contains(&target) {
                        parallel.push(target);
                    }
                } else if !groups.iter().any(|g| g.first() == Some(&target)) {
                    groups.push(vec![target]);
                }
            }
        }
        groups.insert(0, parallel);

        let max_bus = self.config.max_bus();
        let mut car_fw = Vec::new();
        for group in &groups {
            for chunk in group.chunks(self.config.chunk()) {
                for b in &brands {
                    for request in &b.requests {
                        if request.bus > max_bus {
                            continue;
                        }
                        if request.bus % 4 == 1 {
                            self.set_obd_multiplexing(request.obd_multiplexing).await;
                        }

                        let addrs: Vec<EcuAddr> = chunk
                            .iter()
                            .filter(|(qb, _)| *qb == b.name)
                            .filter(|target| ecu_types.get(*target).is_some_and(|e| request.targets(*e)))
                            .map(|(_, addr)| *addr)
                            .collect();
                        if addrs.is_empty() {
                            continue;
                        }

                        for (addr, version) in self.query(request, addrs).await {
                            let ecu = ecu_types
                                .get(&(b.name.as_str(), addr))
                                .copied()
                                .unwrap_or(Ecu::Unknown);
                            car_fw.push(self.car_fw(b, request, ecu, addr, version));
                        }
                    }
                }
            }
        }
        car_fw
    }

    fn car_fw(
        &self,
        brand: &BrandConfig,
        request: &FwRequest,
        ecu: Ecu,
        addr: EcuAddr,
        version: Vec<u8>,
    ) -> CarFw {
        let fw = CarFw {
            ecu,
            fw_version: version,
            address: addr.address,
            response_address: rx_addr_for_tx_addr(addr.address, request.rx_offset)
                .ok()
                .flatten()
                .unwrap_or(addr.address),
            sub_address: addr.sub_address,
            request: request.last_request(),
            brand: brand.name.clone(),
            bus: request.bus,
            logging: request.logging
                || brand
                    .extra_ecus
                    .contains(&EcuKey::new(ecu, addr.address, addr.sub_address)),
            obd_multiplexing: request.obd_multiplexing,
        };
        tracing::debug!(
            brand = fw.brand,
            ecu = %fw.ecu,
            address = %addr,
            bus = fw.bus,
            version = fw.version_lossy(),
            "firmware version"
        );
        fw
    }

    /// One parallel query, retried on transport failure.
    async fn query(&self, request: &FwRequest, addrs: Vec<EcuAddr>) -> BTreeMap<EcuAddr, Vec<u8>> {
        let query = match IsoTpParallelQuery::new(
            self.transport,
            request.bus,
            addrs,
            request.request.clone(),
            request.response.clone(),
        ) {
            Ok(q) => q
                .with_response_offset(request.rx_offset)
                .with_separation_time(self.config.separation_time()),
            Err(e) => {
                tracing::warn!(
                    bus = request.bus,
                    request = hex_bytes(&request.last_request()),
                    error = %e,
                    "FW query rejected"
                );
                return BTreeMap::new();
            }
        };

        for attempt in 0..=self.config.query_retries {
            match query
                .get_data(self.config.query_timeout(), self.config.total_timeout())
                .await
            {
                Ok(results) => return results,
                Err(e) => tracing::warn!(
                    attempt = attempt + 1,
                    bus = request.bus,
                    error = %e,
                    "FW query failed"
                ),
            }
        }
        BTreeMap::new()
    }

    /// Query brands in descending order of present-ECU hits (ratio breaks
    /// ties), stopping once one brand's firmware identifies a single
    /// platform.
    pub async fn get_fw_versions_ordered(
        &self,
        vin: &Vin,
        present: &BTreeSet<EcuAddrBus>,
    ) -> Vec<CarFw> {
        let matches = get_brand_ecu_matches(self.registry, present);
        let mut ranked: Vec<(&str, usize, f64)> = matches
            .iter()
            .map(|(brand, hits)| {
                let expected = self.registry.brand_ecus(brand, true).len().max(1);
                (brand.as_str(), hits.len(), hits.len() as f64 / expected as f64)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.total_cmp(&a.2)));

        let mut all = Vec::new();
        for (brand, hits, _) in ranked {
            if hits == 0 {
                continue;
            }
            tracing::info!(brand, hits, "querying brand firmware");
            let fws = self.get_fw_versions(Some(brand)).await;
            let result = match_fw_to_car(self.registry, &fws, vin, self.config);
            all.extend(fws);
            if result.confident() {
                tracing::info!(brand, candidates = ?result.candidates, "brand firmware matched");
                break;
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use oc_canbus_tools::mock::{MockCanTransport, MockEcu};
    use oc_canbus_tools::{CanError, CanResult};
    use oc_protocol::{CanBatch, CanFrame};

    use super::*;

    const DB: &str = r#"
[[brands]]
name = "acme"
extra_ecus = [{ ecu = "debug", address = 0x7E3 }]

[[brands.requests]]
request = ["22F181"]
response = ["62F181"]
bus = 0
auxiliary = true

[[brands.requests]]
request = ["1003", "22F188"]
response = ["5003", "62F188"]
whitelist_ecus = ["engine"]
bus = 0
logging = true

[[brands]]
name = "globex"

[[brands.requests]]
request = ["22F1A0"]
response = ["62F1A0"]
whitelist_ecus = ["engine"]
bus = 1
obd_multiplexing = false

[[platforms]]
name = "ACME_SEDAN"
brand = "acme"
fw = [
  { ecu = "engine", address = 0x7E0, versions = ["E1"] },
  { ecu = "eps", address = 0x7A1, versions = ["S1"] },
  { ecu = "fwdRadar", address = 0x750, sub_address = 0x0F, versions = ["R1"] },
]

[[platforms]]
name = "GLOBEX_TRUCK"
brand = "globex"
fw = [
  { ecu = "engine", address = 0x7E0, versions = ["G1"] },
  { ecu = "abs", address = 0x7B0, versions = ["G2"] },
]
"#;

    fn registry() -> PlatformRegistry {
        PlatformRegistry::from_toml_str(DB).unwrap()
    }

    fn answer(prefix: &[u8], body: &[u8]) -> Vec<u8> {
        [prefix, body].concat()
    }

    fn acme_ecus() -> Vec<MockEcu> {
        vec![
            MockEcu::new(0x7E0, 0x7E8, 0)
                .on_request(&[0x22, 0xF1, 0x81], &answer(&[0x62, 0xF1, 0x81], b"E1"))
                .on_request(&[0x10, 0x03], &[0x50, 0x03])
                .on_request(&[0x22, 0xF1, 0x88], &answer(&[0x62, 0xF1, 0x88], b"LOGGED-PART")),
            MockEcu::new(0x7A1, 0x7A9, 0)
                .on_request(&[0x22, 0xF1, 0x81], &answer(&[0x62, 0xF1, 0x81], b"S1")),
            MockEcu::new(0x750, 0x758, 0)
                .with_sub_addr(0x0F)
                .on_request(&[0x22, 0xF1, 0x81], &answer(&[0x62, 0xF1, 0x81], b"R1")),
            MockEcu::new(0x7E3, 0x7EB, 0)
                .on_request(&[0x22, 0xF1, 0x81], &answer(&[0x62, 0xF1, 0x81], b"DBG")),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn present_ecus() {
        let registry = registry();
        let config = IdentConfig::default();
        let mock = MockCanTransport::with_ecus(acme_ecus());
        let present = FwQuery::new(&mock, &registry, &config).get_present_ecus().await;

        assert!(present.contains(&EcuAddrBus::new(0x7E8, None, 0)));
        assert!(present.contains(&EcuAddrBus::new(0x7A9, None, 0)));
        assert!(present.contains(&EcuAddrBus::new(0x758, Some(0x0F), 0)));
        assert!(present.contains(&EcuAddrBus::new(0x7EB, None, 0)));
        assert!(!present.contains(&EcuAddrBus::new(0x7B8, None, 0)));

        // auxiliary copy on bus 4 needs a second interface
        assert!(mock.sent_frames().iter().all(|f| f.src < 4));
        // both modes have queries
        assert_eq!(mock.multiplexing_calls(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplexing_only_for_modes_with_queries() {
        let registry = PlatformRegistry::from_toml_str(
            r#"
[[brands]]
name = "acme"
[[brands.requests]]
request = ["22F181"]
response = ["62F181"]
[[platforms]]
name = "ACME_SEDAN"
brand = "acme"
fw = [{ ecu = "engine", address = 0x7E0, versions = ["E1"] }]
"#,
        )
        .unwrap();
        let config = IdentConfig::default();
        let mock = MockCanTransport::new();
        FwQuery::new(&mock, &registry, &config).get_present_ecus().await;
        assert_eq!(mock.multiplexing_calls(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_firmware_versions() {
        let registry = registry();
        let config = IdentConfig::default();
        let mock = MockCanTransport::with_ecus(acme_ecus());
        let fws = FwQuery::new(&mock, &registry, &config)
            .get_fw_versions(Some("acme"))
            .await;

        let find = |address: u32, logging: bool| {
            fws.iter()
                .find(|f| f.address == address && f.logging == logging)
                .unwrap_or_else(|| panic!("no FW for 0x{address:X}"))
        };

        let engine = find(0x7E0, false);
        assert_eq!(engine.ecu, Ecu::Engine);
        assert_eq!(engine.fw_version, b"E1");
        assert_eq!(engine.response_address, 0x7E8);
        assert_eq!(engine.request, vec![0x22, 0xF1, 0x81]);
        assert_eq!(engine.brand, "acme");
        assert_eq!(engine.bus, 0);

        // second request is logging-only and multi-step
        let logged = find(0x7E0, true);
        assert_eq!(logged.fw_version, b"LOGGED-PART");
        assert_eq!(logged.request, vec![0x22, 0xF1, 0x88]);

        let radar = find(0x750, false);
        assert_eq!(radar.sub_address, Some(0x0F));
        assert_eq!(radar.ecu, Ecu::FwdRadar);

        // extra ECUs are collected for logging
        let debug = find(0x7E3, true);
        assert_eq!(debug.ecu, Ecu::Debug);

        assert_eq!(fws.len(), 5);
        assert!(mock.multiplexing_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_multiplexing_on_bus_one() {
        let registry = registry();
        let config = IdentConfig::default();
        let mock = MockCanTransport::with_ecus([MockEcu::new(0x7E0, 0x7E8, 1)
            .with_obd_multiplexing(false)
            .on_request(&[0x22, 0xF1, 0xA0], &answer(&[0x62, 0xF1, 0xA0], b"G1"))]);
        let fws = FwQuery::new(&mock, &registry, &config)
            .get_fw_versions(Some("globex"))
            .await;
        assert_eq!(fws.len(), 1);
        assert_eq!(fws[0].fw_version, b"G1");
        assert!(!fws[0].obd_multiplexing);
        assert_eq!(mock.multiplexing_calls(), vec![false]);
    }

    #[test]
    fn brand_matches_use_every_offset() {
        let registry = registry();
        let present = BTreeSet::from([
            EcuAddrBus::new(0x7E8, None, 0),
            EcuAddrBus::new(0x7A9, None, 0),
            EcuAddrBus::new(0x758, Some(0x0F), 0),
        ]);
        let matches = get_brand_ecu_matches(&registry, &present);
        assert_eq!(matches["acme"].len(), 3);
        assert_eq!(matches["globex"], BTreeSet::from([EcuAddr::new(0x7E0, None)]));
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_query_stops_after_confident_brand() {
        let registry = registry();
        let config = IdentConfig::default();
        let mock = MockCanTransport::with_ecus(acme_ecus());
        let query = FwQuery::new(&mock, &registry, &config);
        let present = query.get_present_ecus().await;
        let fws = query.get_fw_versions_ordered(&Vin::unknown(), &present).await;

        assert!(fws.iter().all(|f| f.brand == "acme"));
        let globex_requests = mock
            .sent_frames()
            .iter()
            .filter(|f| f.data.windows(3).any(|w| w == [0x22, 0xF1, 0xA0]))
            .count();
        assert_eq!(globex_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_query_continues_without_match() {
        let registry = registry();
        let config = IdentConfig::default();
        // engine answers with an unknown version: acme cannot match
        let mock = MockCanTransport::with_ecus([MockEcu::new(0x7E0, 0x7E8, 0)
            .on_request(&[0x22, 0xF1, 0x81], &answer(&[0x62, 0xF1, 0x81], b"E9"))]);
        let query = FwQuery::new(&mock, &registry, &config);
        let present = BTreeSet::from([EcuAddrBus::new(0x7E8, None, 0)]);
        query.get_fw_versions_ordered(&Vin::unknown(), &present).await;

        let globex_requests = mock
            .sent_frames()
            .iter()
            .filter(|f| f.src == 1 && f.data.windows(3).any(|w| w == [0x22, 0xF1, 0xA0]))
            .count();
        assert_eq!(globex_requests, 1);
    }

    /// Transport whose sends always fail.
    #[derive(Default)]
    struct BrokenTransport {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl CanTransport for BrokenTransport {
        async fn send(&self, _frames: &[CanFrame]) -> CanResult<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(CanError::Interface("bus off".into()))
        }

        async fn recv(&self, _wait_for_one: bool) -> CanResult<Vec<CanBatch>> {
            Ok(Vec::new())
        }

        async fn set_obd_multiplexing(&self, _enabled: bool) -> CanResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_queries_are_retried_then_skipped() {
        let registry = registry();
        let config = IdentConfig {
            query_retries: 2,
            ..IdentConfig::default()
        };
        let transport = BrokenTransport::default();
        let fws = FwQuery::new(&transport, &registry, &config)
            .get_fw_versions(Some("globex"))
            .await;
        assert!(fws.is_empty());
        // one request, one chunk, three attempts
        assert_eq!(transport.sends.load(Ordering::SeqCst), 3);
    }
}
