//! Cross-source verification of physical entities.
//!
//! STATE_DB is the source of truth for what hardware is installed; the
//! SNMP entity MIB must expose exactly the rows derived from it. The
//! verifier loads both, derives the expected rows and reports every field
//! that differs, by identifier.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use sonic_dut_common::{
    poll, DutError, DutResult, EntityMibRecord, EntityMibSource, SnmpCredentials, StateStore,
};

use crate::config::VerifyConfig;
use crate::entity::{EntityKind, EntityTable, EntityTree, PhysicalEntity};
use crate::entity_id::{
    derive, derive_transceiver, find_collisions, ExpectedEntity, Expectation, NumberingScheme,
    PsuSensor,
};

/// One difference between an expected and an observed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub id: i64,
    /// STATE_DB entity the row was derived from.
    pub owner: String,
    /// `entPhys*` field name, or `row` for a missing/unexpected row.
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

impl FieldMismatch {
    fn new(
        id: i64,
        owner: &str,
        field: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            field,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} expected '{}', got '{}'",
            self.owner, self.id, self.field, self.expected, self.actual
        )
    }
}

/// Compares one expected row with the snapshot record at its identifier.
pub fn compare(expected: &ExpectedEntity, actual: &EntityMibRecord) -> Vec<FieldMismatch> {
    let mut out = Vec::new();
    let id = expected.id;
    let owner = expected.owner.as_str();

    let mut check_int = |field: &'static str, want: i64, got: i64| {
        if want != got {
            out.push(FieldMismatch::new(id, owner, field, want.to_string(), got.to_string()));
        }
    };
    check_int("entPhysContainedIn", expected.contained_in, actual.contained_in);
    check_int("entPhysClass", expected.class.code(), actual.class);
    check_int("entPhyParentRelPos", expected.parent_rel_pos, actual.parent_rel_pos);
    check_int("entPhysIsFRU", expected.fru.code(), actual.is_fru);

    let strings: [(&'static str, Option<&str>, &str); 8] = [
        ("entPhysName", expected.name.as_deref(), actual.name.as_str()),
        ("entPhysDescr", expected.descr.as_deref(), actual.descr.as_str()),
        ("entPhysHwVer", Some(expected.hw_ver.as_str()), actual.hw_ver.as_str()),
        ("entPhysFwVer", Some(expected.fw_ver.as_str()), actual.fw_ver.as_str()),
        ("entPhysSwVer", Some(expected.sw_ver.as_str()), actual.sw_ver.as_str()),
        ("entPhysSerialNum", Some(expected.serial.as_str()), actual.serial.as_str()),
        ("entPhysMfgName", Some(expected.mfg_name.as_str()), actual.mfg_name.as_str()),
        ("entPhysModelName", Some(expected.model_name.as_str()), actual.model_name.as_str()),
    ];
    for (field, want, got) in strings {
        if let Some(want) = want {
            if want != got {
                out.push(FieldMismatch::new(id, owner, field, want, got));
            }
        }
    }
    out
}

/// Result of one verification pass.
#[derive(Debug, Default)]
pub struct VerificationReport {
    /// Tables that had entities to verify.
    pub verified: Vec<EntityTable>,
    /// Tables with no STATE_DB entries.
    pub skipped: Vec<EntityTable>,
    /// Entities examined.
    pub entities: usize,
    /// Identifiers checked against the snapshot.
    pub checked: usize,
    pub mismatches: Vec<FieldMismatch>,
    /// Entities that could not be verified (unresolvable parent, colliding
    /// identifiers, bad records).
    pub errors: Vec<DutError>,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty() && self.errors.is_empty()
    }

    /// Turns a failed report into a [`DutError::EntityMismatch`] listing
    /// every mismatch and error.
    pub fn into_result(self) -> DutResult<Self> {
        if self.is_ok() {
            return Ok(self);
        }
        let mismatches = self
            .mismatches
            .iter()
            .map(ToString::to_string)
            .chain(self.errors.iter().map(ToString::to_string))
            .collect();
        Err(DutError::EntityMismatch { mismatches })
    }
}

/// Verifies STATE_DB physical entities against the SNMP entity MIB.
pub struct EntityVerifier<'a, S: ?Sized, M: ?Sized> {
    store: &'a S,
    mib: &'a M,
    scheme: NumberingScheme,
    credentials: SnmpCredentials,
}

impl<'a, S, M> EntityVerifier<'a, S, M>
where
    S: StateStore + ?Sized,
    M: EntityMibSource + ?Sized,
{
    pub fn new(store: &'a S, mib: &'a M) -> Self {
        Self {
            store,
            mib,
            scheme: NumberingScheme::default(),
            credentials: SnmpCredentials::default(),
        }
    }

    /// Creates a verifier using the numbering scheme and SNMP credentials
    /// of `config`.
    pub fn from_config(store: &'a S, mib: &'a M, config: &VerifyConfig) -> Self {
        Self::new(store, mib)
            .with_scheme(config.numbering.clone())
            .with_credentials(config.snmp.clone())
    }

    pub fn with_scheme(mut self, scheme: NumberingScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_credentials(mut self, credentials: SnmpCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn scheme(&self) -> &NumberingScheme {
        &self.scheme
    }

    /// Verifies every entity table.
    pub async fn verify_all(&self) -> DutResult<VerificationReport> {
        self.verify(&EntityTable::ALL).await
    }

    /// Verifies the entities of `tables`.
    ///
    /// The whole inventory is always loaded so parents in other tables
    /// resolve. Store and snapshot failures propagate; a problem with one
    /// entity is recorded in the report and the pass continues.
    #[instrument(skip(self))]
    pub async fn verify(&self, tables: &[EntityTable]) -> DutResult<VerificationReport> {
        let (tree, load_errors) = EntityTree::load(self.store, &EntityTable::ALL).await?;
        let snapshot = self.mib.get_snapshot(&self.credentials).await?;
        debug!(
            "Loaded {} entities and {} entity MIB rows",
            tree.len(),
            snapshot.len()
        );

        let mut report = VerificationReport {
            errors: load_errors,
            ..Default::default()
        };

        let by_name: HashMap<&str, i64> = snapshot
            .iter()
            .map(|(id, rec)| (rec.name.as_str(), *id))
            .collect();

        let mut expectations = Vec::new();
        for table in EntityTable::ALL.iter().filter(|t| tables.contains(t)) {
            let entities: Vec<&PhysicalEntity> = tree.of_table(*table).collect();
            if entities.is_empty() {
                info!("No {} entries in STATE_DB, skipping", table.table_name());
                report.skipped.push(*table);
                continue;
            }
            report.verified.push(*table);

            for entity in entities {
                report.entities += 1;
                let derived = match &entity.kind {
                    EntityKind::Transceiver { .. } => match by_name.get(entity.name.as_str()) {
                        Some(id) => Ok(derive_transceiver(entity, *id, &self.scheme)),
                        None => {
                            report.mismatches.push(FieldMismatch::new(
                                0,
                                &entity.name,
                                "row",
                                "present",
                                "missing",
                            ));
                            continue;
                        }
                    },
                    _ => derive(entity, &tree, &self.scheme),
                };
                match derived {
                    Ok(rows) => expectations.extend(rows),
                    Err(e) => {
                        warn!("Cannot derive identifiers for {}: {}", entity.name, e);
                        report.errors.push(e);
                    }
                }
            }
        }

        let mut colliding = BTreeSet::new();
        for (id, owners) in find_collisions(&expectations) {
            let names: Vec<&str> = owners.iter().map(String::as_str).collect();
            warn!("Identifier {} derived by {:?}", id, names);
            report.errors.push(DutError::inconsistent_hierarchy(
                names.join(", "),
                format!("identifier {} derived more than once", id),
            ));
            colliding.extend(owners);
        }

        for exp in expectations
            .iter()
            .filter(|e| !colliding.contains(e.owner()))
        {
            report.checked += 1;
            match exp {
                Expectation::Present(expected) => match snapshot.get(&expected.id) {
                    Some(actual) => report.mismatches.extend(compare(expected, actual)),
                    None => report.mismatches.push(FieldMismatch::new(
                        expected.id,
                        &expected.owner,
                        "row",
                        "present",
                        "missing",
                    )),
                },
                Expectation::Absent { id, owner, reason } => {
                    if snapshot.contains_key(id) {
                        report.mismatches.push(FieldMismatch::new(
                            *id,
                            owner,
                            "row",
                            format!("absent ({})", reason),
                            "present",
                        ));
                    }
                }
            }
        }

        if report.is_ok() {
            info!(
                "Verified {} entities ({} identifiers)",
                report.entities, report.checked
            );
        } else {
            warn!(
                "Entity verification found {} mismatches and {} errors",
                report.mismatches.len(),
                report.errors.len()
            );
        }
        Ok(report)
    }

    /// Polls until the SNMP agent has withdrawn the sensor rows of at
    /// least one powered-off PSU.
    ///
    /// Only PSUs that are present and report no power are judged; PSU
    /// records that fail to load are logged and ignored. A powered-off PSU
    /// must keep its own row; losing it fails the poll immediately.
    #[instrument(skip(self))]
    pub async fn wait_psu_sensor_retraction(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> DutResult<bool> {
        let store = self.store;
        let mib = self.mib;
        let scheme = &self.scheme;
        let credentials = &self.credentials;

        poll::wait_until(timeout, interval, move || async move {
            let snapshot = mib.get_snapshot(credentials).await?;
            let (tree, errors) = EntityTree::load(store, &[EntityTable::Psu]).await?;
            for e in &errors {
                warn!("Ignoring PSU record while waiting for retraction: {}", e);
            }

            let mut retracted = false;
            for psu in tree.of_table(EntityTable::Psu) {
                let EntityKind::PowerSupply {
                    present, powered, ..
                } = &psu.kind
                else {
                    continue;
                };
                if !*present || *powered {
                    continue;
                }
                let psu_id = scheme.psu_id(psu.require_position()?);
                if !snapshot.contains_key(&psu_id) {
                    return Err(DutError::EntityMismatch {
                        mismatches: vec![FieldMismatch::new(
                            psu_id, &psu.name, "row", "present", "missing",
                        )
                        .to_string()],
                    });
                }
                let missing: Vec<i64> = PsuSensor::ALL
                    .iter()
                    .map(|s| scheme.psu_sensor_id(psu_id, *s))
                    .filter(|id| !snapshot.contains_key(id))
                    .collect();
                if !missing.is_empty() {
                    debug!("Sensors {:?} of {} retracted", missing, psu.name);
                    retracted = true;
                }
            }
            Ok::<_, DutError>(retracted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FruStatus, PhysicalClass};
    use async_trait::async_trait;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use sonic_dut_common::{DbId, EntitySnapshot, Record};

    mock! {
        Source {}

        #[async_trait]
        impl EntityMibSource for Source {
            async fn get_snapshot(&self, credentials: &SnmpCredentials) -> DutResult<EntitySnapshot>;
        }
    }

    mock! {
        Store {}

        #[async_trait]
        impl StateStore for Store {
            async fn get_record(&self, db: DbId, key: &str) -> DutResult<Record>;
            async fn list_keys(&self, db: DbId, pattern: &str) -> DutResult<Vec<String>>;
        }
    }

    fn expected_fan() -> ExpectedEntity {
        ExpectedEntity {
            id: 501_020_020,
            owner: "fan1".to_string(),
            contained_in: 501_000_000,
            class: PhysicalClass::Fan,
            parent_rel_pos: 1,
            name: Some("fan1".to_string()),
            descr: Some("fan1".to_string()),
            hw_ver: String::new(),
            fw_ver: String::new(),
            sw_ver: String::new(),
            serial: "SN1".to_string(),
            mfg_name: String::new(),
            model_name: String::new(),
            fru: FruStatus::Replaceable,
        }
    }

    fn observed_fan() -> EntityMibRecord {
        EntityMibRecord {
            descr: "fan1".to_string(),
            contained_in: 501_000_000,
            class: 7,
            parent_rel_pos: 1,
            name: "fan1".to_string(),
            serial: "SN1".to_string(),
            is_fru: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_compare_matching_row() {
        assert!(compare(&expected_fan(), &observed_fan()).is_empty());
    }

    #[test]
    fn test_compare_reports_each_field() {
        let mut observed = observed_fan();
        observed.serial = "SN2".to_string();
        observed.is_fru = 2;

        let mismatches = compare(&expected_fan(), &observed);
        assert_eq!(
            mismatches,
            vec![
                FieldMismatch::new(501_020_020, "fan1", "entPhysIsFRU", "1", "2"),
                FieldMismatch::new(501_020_020, "fan1", "entPhysSerialNum", "SN1", "SN2"),
            ]
        );
        assert_eq!(
            mismatches[1].to_string(),
            "fan1 [501020020]: entPhysSerialNum expected 'SN1', got 'SN2'"
        );
    }

    #[test]
    fn test_compare_unchecked_name() {
        let mut expected = expected_fan();
        expected.name = None;
        expected.descr = None;
        let mut observed = observed_fan();
        observed.name = "anything".to_string();
        observed.descr = String::new();
        assert!(compare(&expected, &observed).is_empty());
    }

    #[test]
    fn test_report_into_result() {
        let report = VerificationReport::default();
        assert!(report.into_result().is_ok());

        let report = VerificationReport {
            mismatches: vec![FieldMismatch::new(7, "PSU 1", "row", "present", "missing")],
            errors: vec![DutError::inconsistent_hierarchy("fan9", "parent 'x' not found")],
            ..Default::default()
        };
        let err = report.into_result().unwrap_err();
        let DutError::EntityMismatch { mismatches } = err else {
            panic!("expected an entity mismatch error");
        };
        assert_eq!(mismatches.len(), 2);
        assert!(mismatches[0].contains("PSU 1 [7]"));
        assert!(mismatches[1].contains("fan9"));
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_credentials() {
        let mut store = MockStore::new();
        store.expect_list_keys().returning(|_, _| Ok(Vec::new()));
        let mut source = MockSource::new();
        source
            .expect_get_snapshot()
            .withf(|c: &SnmpCredentials| c.community == "private" && c.version == "v3")
            .times(1)
            .returning(|_| Ok(EntitySnapshot::new()));

        let mut config = VerifyConfig::default();
        config.snmp.community = "private".to_string();
        config.snmp.version = "v3".to_string();
        config.numbering.psu_base = 700_000_000;

        let verifier = EntityVerifier::from_config(&store, &source, &config);
        assert_eq!(verifier.scheme().psu_id(1), 701_000_000);

        let report = verifier.verify_all().await.unwrap();
        assert_eq!(report.skipped, EntityTable::ALL.to_vec());
        assert!(report.is_ok());
    }
}
