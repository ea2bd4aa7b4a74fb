//! Warehouse master data: kinds, naming, hierarchy and utilization

use std::fmt;

use anyhow::Result;
use sled::Db;

use crate::error::ValidationError;
use crate::temperature::TemperatureSpec;

const KEY_PREFIX: &str = "wh/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
#[cbor(index_only)]
pub enum WarehouseKind {
    #[n(0)]
    RawMaterial,
    #[n(1)]
    WorkInProgress,
    #[n(2)]
    FinishedGoods,
    #[n(3)]
    Transit,
    #[n(4)]
    Rejected,
}

impl WarehouseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseKind::RawMaterial => "Raw Material",
            WarehouseKind::WorkInProgress => "Work In Progress",
            WarehouseKind::FinishedGoods => "Finished Goods",
            WarehouseKind::Transit => "Transit",
            WarehouseKind::Rejected => "Rejected",
        }
    }

    /// Best-effort classification from a warehouse name.
    pub fn infer(name: &str) -> Option<Self> {
        let lowered = name.to_lowercase();
        if lowered.contains("raw material") || lowered.contains("stores") {
            Some(WarehouseKind::RawMaterial)
        } else if lowered.contains("work in progress") || lowered.contains("wip") {
            Some(WarehouseKind::WorkInProgress)
        } else if lowered.contains("finished") {
            Some(WarehouseKind::FinishedGoods)
        } else if lowered.contains("transit") {
            Some(WarehouseKind::Transit)
        } else if lowered.contains("reject") || lowered.contains("scrap") {
            Some(WarehouseKind::Rejected)
        } else {
            None
        }
    }
}

impl fmt::Display for WarehouseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Warehouse {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub kind: WarehouseKind,
    #[n(2)]
    pub parent: Option<String>,
    /// Capacity in stock-keeping units, when the site tracks one.
    #[n(3)]
    pub capacity: Option<f64>,
    /// Storage condition string, e.g. "2-8°C". Validated on the way in,
    /// kept as text so the record stays a plain CBOR map.
    #[n(4)]
    storage_spec: Option<String>,
}

impl Warehouse {
    pub fn new(name: &str, kind: WarehouseKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent: None,
            capacity: None,
            storage_spec: None,
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Mark the warehouse temperature controlled. The spec string is
    /// parsed here so a bad one never reaches the master record.
    pub fn with_storage_spec(mut self, spec: &str) -> Result<Self, ValidationError> {
        TemperatureSpec::parse(spec)?;
        self.storage_spec = Some(spec.to_string());
        Ok(self)
    }

    pub fn temperature_spec(&self) -> Option<TemperatureSpec> {
        self.storage_spec
            .as_deref()
            .and_then(|spec| TemperatureSpec::parse(spec).ok())
    }

    /// Naming is advisory, a mismatch warns rather than fails.
    pub fn check_naming(&self, site_code: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        let suffix = format!(" - {site_code}");
        if !self.name.ends_with(&suffix) {
            warnings.push(format!(
                "warehouse '{}' does not carry the site suffix '{suffix}'",
                self.name
            ));
        }
        if let Some(inferred) = WarehouseKind::infer(&self.name) {
            if inferred != self.kind {
                warnings.push(format!(
                    "warehouse '{}' is named like {} but registered as {}",
                    self.name, inferred, self.kind
                ));
            }
        }
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        warnings
    }

    /// Percent of capacity in use, when a capacity is tracked.
    pub fn utilization(&self, used_qty: f64) -> Option<f64> {
        self.capacity
            .filter(|cap| *cap > 0.0)
            .map(|cap| used_qty / cap * 100.0)
    }

    pub fn save_to_db(&self, db: &Db) -> Result<()> {
        let contents = minicbor::to_vec(self)?;
        db.insert(format!("{KEY_PREFIX}{}", self.name), contents)?;
        Ok(())
    }

    pub fn load_from_db(db: &Db, name: &str) -> Result<Option<Self>> {
        match db.get(format!("{KEY_PREFIX}{name}"))? {
            Some(contents) => Ok(Some(minicbor::decode(&contents)?)),
            None => Ok(None),
        }
    }
}

/// The default tree a new site gets, one warehouse per kind under a
/// site root.
pub fn standard_hierarchy(site_code: &str) -> Vec<Warehouse> {
    let root = format!("All Warehouses - {site_code}");
    [
        ("Stores", WarehouseKind::RawMaterial),
        ("Work In Progress", WarehouseKind::WorkInProgress),
        ("Finished Goods", WarehouseKind::FinishedGoods),
        ("Goods In Transit", WarehouseKind::Transit),
        ("Rejected Material", WarehouseKind::Rejected),
    ]
    .into_iter()
    .map(|(name, kind)| {
        Warehouse::new(&format!("{name} - {site_code}"), kind).with_parent(&root)
    })
    .collect()
}
