//! Material readiness: work orders and their Red/Green zone assessment
//!
//! A work order sits in the Green zone only when every bill line has
//! full cover in its source bin. Anything less is Red, partial cover
//! never releases a build.

use std::fmt;

use anyhow::Result;
use chrono::Utc;
use sled::Db;

use crate::details::TimeStamp;
use crate::error::ValidationError;
use crate::stock::StockLedger;

const WO_PREFIX: &str = "wo/";
const ASSESSMENT_PREFIX: &str = "asm/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum ZoneStatus {
    #[n(0)]
    Red,
    #[n(1)]
    Green,
}

impl fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneStatus::Red => write!(f, "Red"),
            ZoneStatus::Green => write!(f, "Green"),
        }
    }
}

/// One component requirement of a work order.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct BomLine {
    #[n(0)]
    pub item_code: String,
    #[n(1)]
    pub qty_per_unit: f64,
    #[n(2)]
    pub source_warehouse: String,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct WorkOrder {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub item_code: String,
    #[n(2)]
    pub qty: f64,
    #[n(3)]
    pub bom: Vec<BomLine>,
}

impl WorkOrder {
    pub fn new(id: &str, item_code: &str, qty: f64) -> Self {
        Self {
            id: id.to_string(),
            item_code: item_code.to_string(),
            qty,
            bom: Vec::new(),
        }
    }

    pub fn require(mut self, item_code: &str, qty_per_unit: f64, source_warehouse: &str) -> Self {
        self.bom.push(BomLine {
            item_code: item_code.to_string(),
            qty_per_unit,
            source_warehouse: source_warehouse.to_string(),
        });
        self
    }

    pub fn save_to_db(&self, db: &Db) -> Result<()> {
        let contents = minicbor::to_vec(self)?;
        db.insert(format!("{WO_PREFIX}{}", self.id), contents)?;
        Ok(())
    }

    pub fn load_from_db(db: &Db, id: &str) -> Result<Self> {
        let Some(contents) = db.get(format!("{WO_PREFIX}{id}"))? else {
            return Err(ValidationError::WorkOrderNotFound(id.to_string()).into());
        };
        Ok(minicbor::decode(&contents)?)
    }

    pub fn all_ids(db: &Db) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in db.scan_prefix(WO_PREFIX) {
            let (key, _) = entry?;
            let key = String::from_utf8(key.to_vec())?;
            ids.push(key[WO_PREFIX.len()..].to_string());
        }
        Ok(ids)
    }

    /// Does this work order draw from the given warehouse at all.
    pub fn draws_from(&self, warehouse: &str) -> bool {
        self.bom.iter().any(|line| line.source_warehouse == warehouse)
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Shortage {
    #[n(0)]
    pub item_code: String,
    #[n(1)]
    pub warehouse: String,
    #[n(2)]
    pub required: f64,
    #[n(3)]
    pub available: f64,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct MaterialAssessment {
    #[n(0)]
    pub work_order: String,
    #[n(1)]
    pub zone: ZoneStatus,
    /// Share of bill lines with full cover, 0 to 100.
    #[n(2)]
    pub completion_percentage: f64,
    #[n(3)]
    pub shortages: Vec<Shortage>,
    #[n(4)]
    pub assessed_at: TimeStamp<Utc>,
    /// Who ran the assessment; sweeps and post-movement recomputes record
    /// the system as assessor.
    #[n(5)]
    pub assessed_by: String,
}

impl MaterialAssessment {
    pub fn assessed_by(mut self, actor: &str) -> Self {
        self.assessed_by = actor.to_string();
        self
    }

    /// Compare required against available for every bill line.
    pub fn compute(work_order: &WorkOrder, ledger: &StockLedger<'_>) -> Result<Self> {
        let mut shortages = Vec::new();
        let mut covered = 0usize;
        for line in &work_order.bom {
            let required = line.qty_per_unit * work_order.qty;
            let available = ledger.available_qty(&line.source_warehouse, &line.item_code)?;
            if available >= required {
                covered += 1;
            } else {
                shortages.push(Shortage {
                    item_code: line.item_code.clone(),
                    warehouse: line.source_warehouse.clone(),
                    required,
                    available,
                });
            }
        }

        let total = work_order.bom.len();
        let completion_percentage = if total == 0 {
            100.0
        } else {
            covered as f64 / total as f64 * 100.0
        };
        let zone = if shortages.is_empty() {
            ZoneStatus::Green
        } else {
            ZoneStatus::Red
        };

        Ok(Self {
            work_order: work_order.id.clone(),
            zone,
            completion_percentage,
            shortages,
            assessed_at: TimeStamp::new(),
            assessed_by: "system".to_string(),
        })
    }
}

/// Append-only log of assessments, keyed on work order and sequence so
/// zone transitions stay reconstructible after the fact.
pub struct AssessmentLog<'a> {
    db: &'a Db,
}

impl<'a> AssessmentLog<'a> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    fn prefix(work_order: &str) -> String {
        format!("{ASSESSMENT_PREFIX}{work_order}/")
    }

    pub fn record(&self, assessment: &MaterialAssessment) -> Result<()> {
        let seq = self.history(&assessment.work_order)?.len() as u64;
        let key = format!("{}{seq:08}", Self::prefix(&assessment.work_order));
        self.db.insert(key, minicbor::to_vec(assessment)?)?;
        Ok(())
    }

    pub fn history(&self, work_order: &str) -> Result<Vec<MaterialAssessment>> {
        let mut entries = Vec::new();
        for entry in self.db.scan_prefix(Self::prefix(work_order)) {
            let (_, contents) = entry?;
            entries.push(minicbor::decode(&contents)?);
        }
        Ok(entries)
    }

    pub fn latest(&self, work_order: &str) -> Result<Option<MaterialAssessment>> {
        Ok(self.history(work_order)?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::details::MovementDetails;
    use crate::movement::StockEffect;

    fn open_db() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (dir, db)
    }

    fn stocked_ledger(db: &Db) -> StockLedger<'_> {
        let ledger = StockLedger::new(db);
        let receipt = MovementDetails::new()
            .set_movement_code("101")
            .add_item("PCB-01", 50.0, None, Some("RM Main"))
            .add_item("CASE-01", 10.0, None, Some("RM Main"));
        ledger.apply(&receipt, StockEffect::Increase).unwrap();
        ledger
    }

    #[test]
    fn partial_cover_stays_red() {
        let (_dir, db) = open_db();
        let ledger = stocked_ledger(&db);

        let wo = WorkOrder::new("WO-0001", "WIDGET", 20.0)
            .require("PCB-01", 1.0, "RM Main")
            .require("CASE-01", 1.0, "RM Main");

        let assessment = MaterialAssessment::compute(&wo, &ledger).unwrap();
        assert_eq!(assessment.zone, ZoneStatus::Red);
        assert_eq!(assessment.completion_percentage, 50.0);
        assert_eq!(assessment.shortages.len(), 1);
        assert_eq!(assessment.shortages[0].item_code, "CASE-01");
        assert_eq!(assessment.shortages[0].required, 20.0);
        assert_eq!(assessment.shortages[0].available, 10.0);
    }

    #[test]
    fn full_cover_goes_green() {
        let (_dir, db) = open_db();
        let ledger = stocked_ledger(&db);

        let wo = WorkOrder::new("WO-0002", "WIDGET", 10.0)
            .require("PCB-01", 1.0, "RM Main")
            .require("CASE-01", 1.0, "RM Main");

        let assessment = MaterialAssessment::compute(&wo, &ledger).unwrap();
        assert_eq!(assessment.zone, ZoneStatus::Green);
        assert_eq!(assessment.completion_percentage, 100.0);
        assert!(assessment.shortages.is_empty());
    }

    #[test]
    fn assessment_log_keeps_transitions_in_order() {
        let (_dir, db) = open_db();
        let ledger = stocked_ledger(&db);
        let log = AssessmentLog::new(&db);

        let wo = WorkOrder::new("WO-0003", "WIDGET", 20.0)
            .require("CASE-01", 1.0, "RM Main");
        wo.save_to_db(&db).unwrap();

        log.record(&MaterialAssessment::compute(&wo, &ledger).unwrap())
            .unwrap();

        let top_up = MovementDetails::new()
            .set_movement_code("101")
            .add_item("CASE-01", 10.0, None, Some("RM Main"));
        ledger.apply(&top_up, StockEffect::Increase).unwrap();

        log.record(&MaterialAssessment::compute(&wo, &ledger).unwrap())
            .unwrap();

        let history = log.history("WO-0003").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].zone, ZoneStatus::Red);
        assert_eq!(history[1].zone, ZoneStatus::Green);
        assert_eq!(log.latest("WO-0003").unwrap().unwrap().zone, ZoneStatus::Green);
    }
}
