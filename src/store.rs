//! sled-backed persistence for unit documents.
//!
//! Every unit is one CBOR document keyed by its id. Mutations go through
//! [`UnitStore::update`]: read, re-evaluate the operation against the fresh
//! document, and commit with a compare-and-swap on the raw bytes. Losing a
//! race re-runs the whole operation against the new state (a bid's floor
//! may have moved), bounded by the caller's retry budget.

use std::sync::Arc;

use crate::error::MarketError;
use crate::unit::TradableUnit;

/// Unit ids are bech32 strings with this human-readable prefix, which
/// doubles as the key prefix separating unit documents from listing
/// snapshots in the same tree.
pub const UNIT_KEY_PREFIX: &str = "unit_";

pub struct UnitStore {
    db: Arc<sled::Db>,
}

impl UnitStore {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    pub fn load(&self, unit_id: &str) -> Result<TradableUnit, MarketError> {
        let bytes = self
            .db
            .get(unit_id.as_bytes())?
            .ok_or_else(|| MarketError::UnitNotFound {
                unit_id: unit_id.to_string(),
            })?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Insert a freshly finalised unit together with its listing snapshot
    /// as one batch.
    pub fn insert_new(
        &self,
        unit: &TradableUnit,
        listing_hash: &str,
        listing_cbor: Vec<u8>,
    ) -> Result<(), MarketError> {
        let mut batch = sled::Batch::default();
        batch.insert(listing_hash.as_bytes(), listing_cbor);
        batch.insert(unit.unit_id.as_bytes(), minicbor::to_vec(unit)?);
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Store a content-addressed blob (listing snapshots).
    pub fn insert_blob(&self, hash: &str, cbor: Vec<u8>) -> Result<(), MarketError> {
        self.db.insert(hash.as_bytes(), cbor)?;
        Ok(())
    }

    /// Atomic read-modify-write on one unit document.
    ///
    /// `op` must be a pure function of the document: it is re-run from
    /// scratch on every attempt. Business-rule rejections abort immediately;
    /// only CAS losses are retried, and exhausting `retries` surfaces
    /// [`MarketError::TransientConflict`].
    pub fn update<T>(
        &self,
        unit_id: &str,
        retries: u32,
        op: impl Fn(&mut TradableUnit) -> Result<T, MarketError>,
    ) -> Result<T, MarketError> {
        for _ in 0..=retries {
            let old = self
                .db
                .get(unit_id.as_bytes())?
                .ok_or_else(|| MarketError::UnitNotFound {
                    unit_id: unit_id.to_string(),
                })?;
            let mut unit: TradableUnit = minicbor::decode(&old)?;

            let out = op(&mut unit)?;
            unit.version += 1;
            let new = minicbor::to_vec(&unit)?;

            match self
                .db
                .compare_and_swap(unit_id.as_bytes(), Some(&old), Some(new))?
            {
                Ok(()) => return Ok(out),
                // Lost the race; loop around and re-evaluate on fresh state.
                Err(_) => continue,
            }
        }
        Err(MarketError::TransientConflict {
            unit_id: unit_id.to_string(),
        })
    }

    /// Iterate every unit document. Used by the preparation sweep and the
    /// work-queue/earnings scans.
    pub fn units(&self) -> impl Iterator<Item = Result<TradableUnit, MarketError>> + '_ {
        self.db
            .scan_prefix(UNIT_KEY_PREFIX.as_bytes())
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(minicbor::decode(&bytes)?)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeStamp;
    use crate::unit::UnitDraft;
    use tempfile::tempdir;

    fn store() -> (UnitStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("store_tests.db")).unwrap();
        (UnitStore::new(Arc::new(db)), dir)
    }

    fn seeded_unit(store: &UnitStore) -> TradableUnit {
        let (unit, hash, cbor) = UnitDraft::new()
            .set_producer("farmer_1s")
            .set_description("2kg sourdough starter")
            .set_quantity(2)
            .set_base_price(1_500)
            .validate_and_finalise(TimeStamp::new())
            .unwrap();
        store.insert_new(&unit, &hash, cbor).unwrap();
        unit
    }

    #[test]
    fn round_trips_a_unit_document() {
        let (store, _dir) = store();
        let unit = seeded_unit(&store);

        let loaded = store.load(&unit.unit_id).unwrap();
        assert_eq!(loaded.unit_id, unit.unit_id);
        assert_eq!(loaded.base_price, 1_500);
        assert_eq!(loaded.version, 0);
    }

    #[test]
    fn missing_unit_is_a_named_error() {
        let (store, _dir) = store();
        let err = store.load("unit_1missing").unwrap_err();
        assert!(matches!(err, MarketError::UnitNotFound { .. }));
    }

    #[test]
    fn update_bumps_version_and_commits() {
        let (store, _dir) = store();
        let unit = seeded_unit(&store);
        let now = TimeStamp::new();

        store
            .update(&unit.unit_id, 3, |u| u.place_bid("buyer_1z", 2_000, &now))
            .unwrap();

        let loaded = store.load(&unit.unit_id).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.bids.len(), 1);
    }

    #[test]
    fn business_rejection_leaves_the_document_untouched() {
        let (store, _dir) = store();
        let unit = seeded_unit(&store);
        let now = TimeStamp::new();

        let err = store
            .update(&unit.unit_id, 3, |u| u.place_bid("buyer_1z", 1_000, &now))
            .unwrap_err();
        assert!(matches!(err, MarketError::BidTooLow { .. }));

        let loaded = store.load(&unit.unit_id).unwrap();
        assert_eq!(loaded.version, 0);
        assert!(loaded.bids.is_empty());
    }
}
