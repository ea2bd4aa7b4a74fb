//! Stock ledger: per warehouse and item bin balances

use std::collections::BTreeMap;

use anyhow::Result;
use sled::Db;

use crate::details::MovementDetails;
use crate::error::ValidationError;
use crate::movement::StockEffect;

const KEY_PREFIX: &str = "bin/";

fn bin_key(warehouse: &str, item_code: &str) -> String {
    format!("{KEY_PREFIX}{warehouse}|{item_code}")
}

#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Bin {
    #[n(0)]
    pub actual_qty: f64,
    #[n(1)]
    pub reserved_qty: f64,
}

impl Bin {
    pub fn available_qty(&self) -> f64 {
        self.actual_qty - self.reserved_qty
    }
}

/// Bin balances keyed on `warehouse|item`. One ledger per database.
pub struct StockLedger<'a> {
    db: &'a Db,
}

impl<'a> StockLedger<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn bin(&self, warehouse: &str, item_code: &str) -> Result<Bin> {
        match self.db.get(bin_key(warehouse, item_code))? {
            Some(contents) => Ok(minicbor::decode(&contents)?),
            None => Ok(Bin::default()),
        }
    }

    pub fn available_qty(&self, warehouse: &str, item_code: &str) -> Result<f64> {
        Ok(self.bin(warehouse, item_code)?.available_qty())
    }

    fn put_bin(&self, batch: &mut sled::Batch, warehouse: &str, item_code: &str, bin: &Bin) -> Result<()> {
        batch.insert(
            bin_key(warehouse, item_code).into_bytes(),
            minicbor::to_vec(bin)?,
        );
        Ok(())
    }

    pub fn reserve(&self, warehouse: &str, item_code: &str, qty: f64) -> Result<()> {
        let mut bin = self.bin(warehouse, item_code)?;
        bin.reserved_qty += qty;
        self.db
            .insert(bin_key(warehouse, item_code), minicbor::to_vec(&bin)?)?;
        Ok(())
    }

    pub fn release(&self, warehouse: &str, item_code: &str, qty: f64) -> Result<()> {
        let mut bin = self.bin(warehouse, item_code)?;
        bin.reserved_qty = (bin.reserved_qty - qty).max(0.0);
        self.db
            .insert(bin_key(warehouse, item_code), minicbor::to_vec(&bin)?)?;
        Ok(())
    }

    /// Check that every decrease or transfer line has cover in its
    /// source bin. Returns the first shortfall found.
    pub fn check_availability(
        &self,
        details: &MovementDetails,
        effect: StockEffect,
    ) -> Result<()> {
        if effect == StockEffect::Increase {
            return Ok(());
        }

        // lines drawing on the same bin are summed before the check
        let mut required: BTreeMap<(String, String), f64> = BTreeMap::new();
        for line in details.items() {
            if let Some(warehouse) = line.source_warehouse.as_deref() {
                *required
                    .entry((warehouse.to_string(), line.item_code.clone()))
                    .or_default() += line.qty;
            }
        }

        for ((warehouse, item_code), qty) in &required {
            let available = self.available_qty(warehouse, item_code)?;
            if available < *qty {
                return Err(ValidationError::InsufficientStock {
                    item_code: item_code.clone(),
                    warehouse: warehouse.clone(),
                    available,
                    required: *qty,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Apply the movement to the ledger in a single batch, so a multi
    /// line movement lands whole or not at all.
    ///
    /// Deltas are accumulated per bin first; two lines hitting the same
    /// bin must both land.
    pub fn apply(&self, details: &MovementDetails, effect: StockEffect) -> Result<()> {
        let mut deltas: BTreeMap<(String, String), f64> = BTreeMap::new();
        let mut add = |warehouse: &str, item_code: &str, qty: f64| {
            *deltas
                .entry((warehouse.to_string(), item_code.to_string()))
                .or_default() += qty;
        };

        for line in details.items() {
            let takes_from_source = effect != StockEffect::Increase;
            let lands_in_target = effect != StockEffect::Decrease;
            if takes_from_source {
                if let Some(source) = line.source_warehouse.as_deref() {
                    add(source, &line.item_code, -line.qty);
                }
            }
            if lands_in_target {
                if let Some(target) = line.target_warehouse.as_deref() {
                    add(target, &line.item_code, line.qty);
                }
            }
        }

        let mut batch = sled::Batch::default();
        for ((warehouse, item_code), delta) in &deltas {
            let mut bin = self.bin(warehouse, item_code)?;
            bin.actual_qty += delta;
            self.put_bin(&mut batch, warehouse, item_code, &bin)?;
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Actual quantity of an item across all bins.
    pub fn total_qty(&self, item_code: &str) -> Result<f64> {
        let mut total = 0.0;
        for entry in self.db.scan_prefix(KEY_PREFIX) {
            let (key, contents) = entry?;
            let key = String::from_utf8(key.to_vec())?;
            if key.ends_with(&format!("|{item_code}")) {
                let bin: Bin = minicbor::decode(&contents)?;
                total += bin.actual_qty;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn transfer_moves_stock_between_bins() {
        let (_dir, db) = open_db();
        let ledger = StockLedger::new(&db);

        let receipt = MovementDetails::new()
            .set_movement_code("101")
            .add_item("BOLT-M8", 100.0, None, Some("RM Main"));
        ledger.apply(&receipt, StockEffect::Increase).unwrap();

        let transfer = MovementDetails::new()
            .set_movement_code("301")
            .add_item("BOLT-M8", 40.0, Some("RM Main"), Some("Kitting"));
        ledger.apply(&transfer, StockEffect::Transfer).unwrap();

        assert_eq!(ledger.bin("RM Main", "BOLT-M8").unwrap().actual_qty, 60.0);
        assert_eq!(ledger.bin("Kitting", "BOLT-M8").unwrap().actual_qty, 40.0);
        assert_eq!(ledger.total_qty("BOLT-M8").unwrap(), 100.0);
    }

    #[test]
    fn repeated_lines_on_one_bin_both_land() {
        let (_dir, db) = open_db();
        let ledger = StockLedger::new(&db);

        let receipt = MovementDetails::new()
            .set_movement_code("101")
            .add_item("BOLT-M8", 10.0, None, Some("RM Main"))
            .add_item("BOLT-M8", 5.0, None, Some("RM Main"));
        ledger.apply(&receipt, StockEffect::Increase).unwrap();

        assert_eq!(ledger.bin("RM Main", "BOLT-M8").unwrap().actual_qty, 15.0);
    }

    #[test]
    fn availability_counts_reservations() {
        let (_dir, db) = open_db();
        let ledger = StockLedger::new(&db);

        let receipt = MovementDetails::new()
            .set_movement_code("101")
            .add_item("BOLT-M8", 10.0, None, Some("RM Main"));
        ledger.apply(&receipt, StockEffect::Increase).unwrap();
        ledger.reserve("RM Main", "BOLT-M8", 8.0).unwrap();

        let issue = MovementDetails::new()
            .set_movement_code("201")
            .add_item("BOLT-M8", 5.0, Some("RM Main"), None);
        let err = ledger
            .check_availability(&issue, StockEffect::Decrease)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ValidationError>(),
            Some(ValidationError::InsufficientStock { .. })
        ));

        ledger.release("RM Main", "BOLT-M8", 8.0).unwrap();
        assert!(ledger
            .check_availability(&issue, StockEffect::Decrease)
            .is_ok());
    }
}
