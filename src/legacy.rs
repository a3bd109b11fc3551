//! Import of documents written by earlier versions of the app.
//!
//! Three overlapping shapes exist: `collections`, `gastos_grupales` and
//! `gastos_individuales`. They share Spanish field names and store
//! denormalized totals. Import maps them onto [`ExpenseCollection`], picks
//! the kind from the source collection, and drops the stored totals. When a
//! stored grand total disagrees with the items, the report says so.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

use crate::expense::{CollectionKind, ExpenseCollection, LineItem, NewCollection};
use crate::money::Money;
use crate::totals;

/// Which legacy collection a batch of documents came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacySource {
    #[serde(rename = "collections", alias = "colecciones")]
    Collections,
    #[serde(rename = "gastos_grupales")]
    GroupExpenses,
    #[serde(rename = "gastos_individuales")]
    IndividualExpenses,
}

impl LegacySource {
    fn kind(self) -> CollectionKind {
        match self {
            LegacySource::Collections | LegacySource::GroupExpenses => CollectionKind::Group,
            LegacySource::IndividualExpenses => CollectionKind::Individual,
        }
    }
}

/// Accept a string, a number, or null where the old screens were inconsistent
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyProduct {
    #[serde(default, rename = "nombre", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, rename = "cantidad", deserialize_with = "lenient_string")]
    pub quantity: String,
    #[serde(default, rename = "precio", deserialize_with = "lenient_string")]
    pub price: String,
    #[serde(default, rename = "usuario", deserialize_with = "lenient_opt_string")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "nombre", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, rename = "descripcion", deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, rename = "usuarios")]
    pub users: Vec<String>,
    #[serde(default, rename = "productos")]
    pub products: Vec<LegacyProduct>,
    #[serde(default, rename = "totalGeneral", deserialize_with = "lenient_opt_string")]
    pub stored_total: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<Value>,
}

/// Request body of a legacy import
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyImport {
    pub source: LegacySource,
    pub documents: Vec<LegacyDocument>,
}

/// A stored legacy total that does not match its own items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalDrift {
    pub id: String,
    pub name: String,
    pub stored: String,
    pub recomputed: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub ids: Vec<String>,
    pub drift: Vec<TotalDrift>,
}

/// Firestore exports carry `{seconds, nanoseconds}`; hand-made ones carry RFC 3339
fn parse_created_at(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            Utc.timestamp_opt(seconds, nanos).single()
        }
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Convert one legacy document into the current schema for `owner`
pub fn migrate_document(
    owner: &str,
    source: LegacySource,
    legacy: LegacyDocument,
    now: DateTime<Utc>,
) -> (ExpenseCollection, Option<TotalDrift>) {
    let kind = source.kind();
    let items: Vec<LineItem> = legacy
        .products
        .into_iter()
        .map(|product| LineItem {
            name: product.name,
            quantity: product.quantity,
            unit_price: product.price,
            assignee: if kind.has_members() { product.user } else { None },
        })
        .collect();
    let members = if kind.has_members() { legacy.users } else { Vec::new() };

    let created_at = parse_created_at(legacy.created_at.as_ref()).unwrap_or(now);
    let mut document = ExpenseCollection::from_new(
        owner,
        NewCollection {
            kind,
            name: legacy.name,
            description: legacy.description,
            members,
            items,
        },
        created_at,
    );
    if let Some(id) = legacy.id.filter(|id| !id.trim().is_empty()) {
        document.id = id;
    }
    document.updated_at = now;

    let recomputed = totals::grand_total(&document.items);
    let drift = legacy
        .stored_total
        .filter(|stored| Money::parse_lenient(stored) != recomputed)
        .map(|stored| TotalDrift {
            id: document.id.clone(),
            name: document.name.clone(),
            stored,
            recomputed,
        });

    (document, drift)
}

/// Convert a whole batch, collecting drift into a report
pub fn migrate_batch(owner: &str, import: LegacyImport) -> (Vec<ExpenseCollection>, ImportReport) {
    let now = Utc::now();
    let mut report = ImportReport::default();
    let mut documents = Vec::with_capacity(import.documents.len());

    let mut seen = HashSet::new();
    for legacy in import.documents {
        let (mut document, mut drift) = migrate_document(owner, import.source, legacy, now);
        if !seen.insert(document.id.clone()) {
            let fresh = Uuid::new_v4().to_string();
            log::warn!(
                "legacy id {} appears twice in one import, storing the copy as {fresh}",
                document.id
            );
            document.id = fresh.clone();
            seen.insert(fresh.clone());
            if let Some(drift) = drift.as_mut() {
                drift.id = fresh;
            }
        }
        if let Some(drift) = drift {
            log::warn!(
                "legacy collection {} stored total {} but items add up to {}",
                drift.id,
                drift.stored,
                drift.recomputed
            );
            report.drift.push(drift);
        }
        report.ids.push(document.id.clone());
        documents.push(document);
    }

    report.imported = documents.len();
    (documents, report)
}
