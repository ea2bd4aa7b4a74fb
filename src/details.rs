//! Movement details: the immutable payload of a stock movement request
//!
//! A details record has no id field; its storage key is the sha256 hash
//! of its CBOR encoding. Every revision therefore gets its own record and
//! the audit chain references revisions by hash.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::ValidationError;
use crate::expr::{Scope, Value};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A captured sign-off on a movement, one per signing role.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Signature {
    #[n(0)]
    pub user: String,
    #[n(1)]
    pub signed_at: TimeStamp<Utc>,
}

/// One line of a movement: an item quantity leaving and/or entering a bin.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct MovementLine {
    #[n(0)]
    pub item_code: String,
    #[n(1)]
    pub qty: f64,
    #[n(2)]
    pub source_warehouse: Option<String>,
    #[n(3)]
    pub target_warehouse: Option<String>,
}

// Also used for constructing drafts
// Key is the hash of this struct encoded into CBOR
#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct MovementDetails {
    #[n(0)]
    movement_code: Option<String>,
    #[n(1)]
    items: Vec<MovementLine>,
    #[n(2)]
    work_order: Option<String>,
    #[n(3)]
    posting_date: Option<TimeStamp<Utc>>,
    #[n(4)]
    operator_signature: Option<Signature>,
    #[n(5)]
    supervisor_signature: Option<Signature>,
    #[n(6)]
    remarks: Option<String>,
}

impl MovementDetails {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_movement_code(mut self, code: &str) -> Self {
        self.movement_code = Some(code.to_string());
        self
    }

    pub fn add_item(
        mut self,
        item_code: &str,
        qty: f64,
        source_warehouse: Option<&str>,
        target_warehouse: Option<&str>,
    ) -> Self {
        self.items.push(MovementLine {
            item_code: item_code.to_string(),
            qty,
            source_warehouse: source_warehouse.map(str::to_string),
            target_warehouse: target_warehouse.map(str::to_string),
        });
        self
    }

    pub fn set_work_order(mut self, work_order: &str) -> Self {
        self.work_order = Some(work_order.to_string());
        self
    }

    pub fn set_posting_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.posting_date = Some(date);
        self
    }

    pub fn sign_as_operator(mut self, user: &str, signed_at: TimeStamp<Utc>) -> Self {
        self.operator_signature = Some(Signature {
            user: user.to_string(),
            signed_at,
        });
        self
    }

    pub fn sign_as_supervisor(mut self, user: &str, signed_at: TimeStamp<Utc>) -> Self {
        self.supervisor_signature = Some(Signature {
            user: user.to_string(),
            signed_at,
        });
        self
    }

    pub fn set_remarks(mut self, remarks: &str) -> Self {
        self.remarks = Some(remarks.to_string());
        self
    }

    pub fn movement_code(&self) -> Option<&str> {
        self.movement_code.as_deref()
    }

    pub fn items(&self) -> &[MovementLine] {
        &self.items
    }

    pub fn work_order(&self) -> Option<&str> {
        self.work_order.as_deref()
    }

    pub fn operator_signature(&self) -> Option<&Signature> {
        self.operator_signature.as_ref()
    }

    pub fn supervisor_signature(&self) -> Option<&Signature> {
        self.supervisor_signature.as_ref()
    }

    pub fn qty_total(&self) -> f64 {
        self.items.iter().map(|line| line.qty).sum()
    }

    pub fn has_source_warehouse(&self) -> bool {
        self.items
            .iter()
            .any(|line| line.source_warehouse.is_some())
    }

    pub fn has_target_warehouse(&self) -> bool {
        self.items
            .iter()
            .any(|line| line.target_warehouse.is_some())
    }

    /// Every warehouse this movement touches, deduplicated.
    pub fn affected_warehouses(&self) -> Vec<String> {
        let mut warehouses: Vec<String> = Vec::new();
        for line in &self.items {
            for warehouse in [&line.source_warehouse, &line.target_warehouse]
                .into_iter()
                .flatten()
            {
                if !warehouses.contains(warehouse) {
                    warehouses.push(warehouse.clone());
                }
            }
        }
        warehouses
    }

    /// Field scope exposed to rule and movement-type conditions.
    pub fn scope(&self) -> Scope {
        let mut scope = Scope::new();
        scope.insert(
            "movement_code".into(),
            Value::Str(self.movement_code.clone().unwrap_or_default()),
        );
        scope.insert("qty_total".into(), Value::Num(self.qty_total()));
        scope.insert("item_count".into(), Value::Num(self.items.len() as f64));
        scope.insert(
            "has_work_order".into(),
            Value::Bool(self.work_order.is_some()),
        );
        scope.insert(
            "work_order".into(),
            Value::Str(self.work_order.clone().unwrap_or_default()),
        );
        scope.insert(
            "source_warehouse".into(),
            Value::Str(
                self.items
                    .iter()
                    .find_map(|l| l.source_warehouse.clone())
                    .unwrap_or_default(),
            ),
        );
        scope.insert(
            "target_warehouse".into(),
            Value::Str(
                self.items
                    .iter()
                    .find_map(|l| l.target_warehouse.clone())
                    .unwrap_or_default(),
            ),
        );
        scope.insert(
            "has_dual_signatures".into(),
            Value::Bool(self.operator_signature.is_some() && self.supervisor_signature.is_some()),
        );
        scope
    }

    // Checks fields, then returns the hash of the details and its contents
    // serialised into CBOR.
    pub fn validate_and_finalise(&self) -> anyhow::Result<(String, Vec<u8>)> {
        if self.movement_code.is_none() {
            return Err(anyhow::Error::msg("Movement code is not set"));
        }
        if self.items.is_empty() {
            return Err(ValidationError::EmptyMovement.into());
        }
        for line in &self.items {
            if line.qty <= 0.0 {
                return Err(ValidationError::NonPositiveQty(line.qty).into());
            }
        }

        let contents = minicbor::to_vec(self)?;
        let hash = crate::utils::content_hash(&contents);

        Ok((hash, contents))
    }
}
