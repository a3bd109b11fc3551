use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::form;
use crate::money::Money;
use crate::totals;

/// Current version of the stored document layout
pub const SCHEMA_VERSION: u32 = 1;

/// Discriminant between shared and personal expense collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Items are assigned to named members and summed per member
    Group,
    /// A single person's list, no members and no assignees
    Individual,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Group => "group",
            CollectionKind::Individual => "individual",
        }
    }

    pub fn has_members(self) -> bool {
        matches!(self, CollectionKind::Group)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" => Ok(CollectionKind::Group),
            "individual" => Ok(CollectionKind::Individual),
            other => Err(AppError::BadRequest(format!(
                "Unknown collection kind '{other}'"
            ))),
        }
    }
}

/// One product entry: quantity and price are kept exactly as entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: String,
    pub unit_price: String,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl LineItem {
    pub fn new(
        name: impl Into<String>,
        quantity: impl Into<String>,
        unit_price: impl Into<String>,
    ) -> Self {
        LineItem {
            name: name.into(),
            quantity: quantity.into(),
            unit_price: unit_price.into(),
            assignee: None,
        }
    }

    pub fn assigned_to(mut self, member: impl Into<String>) -> Self {
        self.assignee = Some(member.into());
        self
    }

    pub fn line_total(&self) -> Money {
        totals::line_total(&self.quantity, &self.unit_price)
    }
}

/// A collection as submitted, before the store gives it an id and owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCollection {
    pub kind: CollectionKind,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

/// A stored expense collection document
///
/// Totals are never stored. They are derived from `items` on every read, so
/// there is no way to write a total that disagrees with the items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseCollection {
    pub id: String,
    pub owner: String,
    pub schema_version: u32,
    pub kind: CollectionKind,
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpenseCollection {
    /// Materialize a submitted collection with a fresh id
    pub fn from_new(owner: &str, new: NewCollection, now: DateTime<Utc>) -> Self {
        ExpenseCollection {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            schema_version: SCHEMA_VERSION,
            kind: new.kind,
            name: new.name,
            description: new.description,
            members: new.members,
            items: new.items,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn grand_total(&self) -> Money {
        totals::grand_total(&self.items)
    }

    pub fn card(&self) -> CollectionCard {
        CollectionCard {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            description: self.description.clone(),
            member_count: self.members.len(),
            item_count: self.items.len(),
            grand_total: self.grand_total(),
            created_at: self.created_at,
        }
    }
}

/// The row shown for a collection on the list screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionCard {
    pub id: String,
    pub kind: CollectionKind,
    pub name: String,
    pub description: String,
    pub member_count: usize,
    pub item_count: usize,
    pub grand_total: Money,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller may change on an existing collection
///
/// This is the only update path. `kind`, `owner` and timestamps are not
/// patchable. Changing `members` may leave existing items pointing at a
/// removed member; those show up as unassigned in the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<String>>,
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
}

impl CollectionPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.members.is_none()
            && self.items.is_none()
    }

    /// Validate the patched document and apply it in place
    ///
    /// # Errors
    /// * `AppError::Validation` if the result would fail the form rules;
    ///   `target` is left untouched in that case
    pub fn apply(&self, target: &mut ExpenseCollection, now: DateTime<Utc>) -> AppResult<()> {
        let mut candidate = target.clone();
        if let Some(name) = &self.name {
            candidate.name = name.clone();
        }
        if let Some(description) = &self.description {
            candidate.description = description.clone();
        }
        if let Some(members) = &self.members {
            candidate.members = members.clone();
        }
        if let Some(items) = &self.items {
            candidate.items = items.clone();
            if !candidate.kind.has_members() {
                for item in &mut candidate.items {
                    item.assignee = None;
                }
            }
        }

        form::validate_fields(
            candidate.kind,
            &candidate.name,
            &candidate.description,
            &candidate.members,
            &candidate.items,
            self.items.is_some(),
        )
        .into_result()?;

        candidate.updated_at = now;
        *target = candidate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ExpenseCollection {
        ExpenseCollection::from_new(
            "owner-1",
            NewCollection {
                kind: CollectionKind::Group,
                name: "Trip".into(),
                description: "Beach weekend".into(),
                members: vec!["Ana".into(), "Luis".into()],
                items: vec![
                    LineItem::new("Bread", "2", "3.00").assigned_to("Ana"),
                    LineItem::new("Fish", "1", "10.00").assigned_to("Luis"),
                ],
            },
            Utc::now(),
        )
    }

    #[test]
    fn kind_round_trips_through_text() {
        assert_eq!("group".parse::<CollectionKind>().unwrap(), CollectionKind::Group);
        assert_eq!(
            " Individual ".parse::<CollectionKind>().unwrap(),
            CollectionKind::Individual
        );
        assert!("shared".parse::<CollectionKind>().is_err());
        assert_eq!(
            serde_json::to_string(&CollectionKind::Individual).unwrap(),
            "\"individual\""
        );
    }

    #[test]
    fn card_carries_derived_total() {
        let card = group().card();
        assert_eq!(card.grand_total.to_string(), "16.00");
        assert_eq!(card.member_count, 2);
        assert_eq!(card.item_count, 2);
    }

    #[test]
    fn patch_renames_and_bumps_updated_at() {
        let mut doc = group();
        let later = doc.updated_at + chrono::Duration::seconds(5);
        let patch = CollectionPatch {
            name: Some("Trip 2".into()),
            ..Default::default()
        };
        patch.apply(&mut doc, later).unwrap();
        assert_eq!(doc.name, "Trip 2");
        assert_eq!(doc.updated_at, later);
    }

    #[test]
    fn removing_a_member_keeps_their_items() {
        let mut doc = group();
        let patch = CollectionPatch {
            members: Some(vec!["Ana".into()]),
            ..Default::default()
        };
        patch.apply(&mut doc, Utc::now()).unwrap();
        assert_eq!(doc.members, vec!["Ana".to_string()]);
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.grand_total().to_string(), "16.00");
    }

    #[test]
    fn invalid_patch_leaves_document_untouched() {
        let mut doc = group();
        let before = doc.clone();
        let patch = CollectionPatch {
            name: Some("   ".into()),
            ..Default::default()
        };
        let err = patch.apply(&mut doc, Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains("name")));
        assert_eq!(doc, before);
    }

    #[test]
    fn patched_items_must_name_a_member() {
        let mut doc = group();
        let patch = CollectionPatch {
            items: Some(vec![LineItem::new("Wine", "1", "8").assigned_to("Carla")]),
            ..Default::default()
        };
        assert!(patch.apply(&mut doc, Utc::now()).is_err());
    }

    #[test]
    fn patched_individual_items_drop_assignees() {
        let mut doc = ExpenseCollection::from_new(
            "owner-1",
            NewCollection {
                kind: CollectionKind::Individual,
                name: "Groceries".into(),
                description: "Week 1".into(),
                members: Vec::new(),
                items: vec![LineItem::new("Bread", "1", "2.00")],
            },
            Utc::now(),
        );
        let patch = CollectionPatch {
            items: Some(vec![LineItem::new("Milk", "1", "1.20").assigned_to("Carla")]),
            ..Default::default()
        };
        patch.apply(&mut doc, Utc::now()).unwrap();
        assert_eq!(doc.items[0].name, "Milk");
        assert_eq!(doc.items[0].assignee, None);
        assert!(crate::export::to_csv(&crate::totals::summarize(&doc)).contains("Milk,,1,1.20,1.20"));
    }
}
