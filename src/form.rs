//! Create-collection form state and its required-field validation.
//!
//! The form is a plain value. Every edit goes through a `with_*` function
//! that returns a new state and leaves the old one alone, so a handler can
//! recompute derived values (line totals) after each keystroke without
//! copying and splicing arrays by hand.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ValidationErrors};
use crate::expense::{CollectionKind, LineItem, NewCollection};
use crate::money::Money;
use crate::totals;

/// Editable column of an item row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Name,
    Quantity,
    UnitPrice,
    Assignee,
}

/// An item row as typed into the form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit_price: String,
    #[serde(default)]
    pub assignee: String,
}

impl ItemDraft {
    pub fn line_total(&self) -> Money {
        totals::line_total(&self.quantity, &self.unit_price)
    }

    fn with_field(&self, field: ItemField, value: &str) -> Self {
        let mut next = self.clone();
        match field {
            ItemField::Name => next.name = value.to_string(),
            ItemField::Quantity => next.quantity = value.to_string(),
            ItemField::UnitPrice => next.unit_price = value.to_string(),
            ItemField::Assignee => next.assignee = value.to_string(),
        }
        next
    }

    fn into_line_item(self, kind: CollectionKind) -> LineItem {
        LineItem {
            name: self.name,
            quantity: self.quantity,
            unit_price: self.unit_price,
            assignee: kind.has_members().then_some(self.assignee),
        }
    }
}

/// State of the create form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionForm {
    pub kind: CollectionKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub items: Vec<ItemDraft>,
}

impl CollectionForm {
    pub fn new(kind: CollectionKind) -> Self {
        CollectionForm {
            kind,
            name: String::new(),
            description: String::new(),
            members: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn with_name(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.name = name.to_string();
        next
    }

    pub fn with_description(&self, description: &str) -> Self {
        let mut next = self.clone();
        next.description = description.to_string();
        next
    }

    /// Resize the member list: new slots are blank, extra slots are cut from the end
    pub fn with_member_count(&self, count: usize) -> Self {
        let mut next = self.clone();
        next.members.resize(count, String::new());
        next
    }

    /// Set the name of member `index`; out-of-range indices change nothing
    pub fn with_member(&self, index: usize, name: &str) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.members.get_mut(index) {
            *slot = name.to_string();
        }
        next
    }

    pub fn with_added_item(&self) -> Self {
        let mut next = self.clone();
        next.items.push(ItemDraft::default());
        next
    }

    /// Set one field of item `index`; out-of-range indices change nothing
    pub fn with_line_item(&self, index: usize, field: ItemField, value: &str) -> Self {
        let mut next = self.clone();
        if let Some(item) = next.items.get_mut(index) {
            *item = item.with_field(field, value);
        }
        next
    }

    pub fn without_item(&self, index: usize) -> Self {
        let mut next = self.clone();
        if index < next.items.len() {
            next.items.remove(index);
        }
        next
    }

    /// Running total of every row, as shown under the form
    pub fn grand_total(&self) -> Money {
        self.items.iter().map(ItemDraft::line_total).sum()
    }

    /// Required-field check, keyed by form field
    pub fn validate(&self) -> ValidationErrors {
        let items: Vec<LineItem> = self
            .items
            .iter()
            .cloned()
            .map(|draft| draft.into_line_item(self.kind))
            .collect();
        validate_fields(
            self.kind,
            &self.name,
            &self.description,
            &self.members,
            &items,
            true,
        )
    }

    /// Validate and turn the form into a collection ready to store
    ///
    /// # Errors
    /// * `AppError::Validation` with every failing field; nothing is written
    pub fn submit(&self) -> AppResult<NewCollection> {
        self.validate().into_result()?;

        let members = if self.kind.has_members() {
            self.members.clone()
        } else {
            Vec::new()
        };

        Ok(NewCollection {
            kind: self.kind,
            name: self.name.clone(),
            description: self.description.clone(),
            members,
            items: self
                .items
                .iter()
                .cloned()
                .map(|draft| draft.into_line_item(self.kind))
                .collect(),
        })
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Shared required-field rules for new and patched collections
///
/// `check_assignees` turns on the rule that every group item must name a
/// current member. Member edits alone skip it, so removing a member never
/// blocks the edit; the summary reports those items as unassigned.
pub fn validate_fields(
    kind: CollectionKind,
    name: &str,
    description: &str,
    members: &[String],
    items: &[LineItem],
    check_assignees: bool,
) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if is_blank(name) {
        errors.add("name", "Name is required.");
    }
    if is_blank(description) {
        errors.add("description", "Description is required.");
    }

    match kind {
        CollectionKind::Group => {
            if members.is_empty() {
                errors.add("members", "At least one member is required.");
            } else if members.iter().any(|m| is_blank(m)) {
                errors.add("members", "Every member needs a name.");
            } else if members
                .iter()
                .enumerate()
                .any(|(i, m)| members[..i].contains(m))
            {
                errors.add("members", "Member names must be unique.");
            }
        }
        CollectionKind::Individual => {
            if !members.is_empty() {
                errors.add("members", "Individual collections have no members.");
            }
        }
    }

    for item in items {
        let assignee = item.assignee.as_deref().unwrap_or("");
        let missing_core =
            is_blank(&item.name) || is_blank(&item.quantity) || is_blank(&item.unit_price);

        if kind.has_members() {
            if missing_core || is_blank(assignee) {
                errors.add(
                    "items",
                    "Every item needs a name, quantity, price and assignee.",
                );
            } else if check_assignees && !members.iter().any(|m| m == assignee) {
                errors.add(
                    "items",
                    format!("'{assignee}' is not a member of this collection."),
                );
            }
        } else if missing_core {
            errors.add("items", "Every item needs a name, quantity and price.");
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn filled_group() -> CollectionForm {
        CollectionForm::new(CollectionKind::Group)
            .with_name("Trip")
            .with_description("Beach")
            .with_member_count(2)
            .with_member(0, "Ana")
            .with_member(1, "Luis")
            .with_added_item()
            .with_line_item(0, ItemField::Name, "Bread")
            .with_line_item(0, ItemField::Quantity, "2")
            .with_line_item(0, ItemField::UnitPrice, "3.00")
            .with_line_item(0, ItemField::Assignee, "Ana")
    }

    #[test]
    fn updates_do_not_touch_the_original() {
        let empty = CollectionForm::new(CollectionKind::Group);
        let named = empty.with_name("Trip");
        assert_eq!(empty.name, "");
        assert_eq!(named.name, "Trip");
    }

    #[test]
    fn member_count_grows_and_truncates() {
        let form = CollectionForm::new(CollectionKind::Group)
            .with_member_count(3)
            .with_member(0, "Ana")
            .with_member(2, "Luis");
        assert_eq!(form.members, vec!["Ana", "", "Luis"]);

        let shrunk = form.with_member_count(1);
        assert_eq!(shrunk.members, vec!["Ana"]);
    }

    #[test]
    fn out_of_range_edits_are_ignored() {
        let form = filled_group();
        assert_eq!(form.with_member(9, "X"), form);
        assert_eq!(form.with_line_item(4, ItemField::Name, "X"), form);
        assert_eq!(form.without_item(4), form);
    }

    #[test]
    fn line_total_follows_edits() {
        let form = filled_group();
        assert_eq!(form.items[0].line_total().to_string(), "6.00");
        let form = form.with_line_item(0, ItemField::Quantity, "");
        assert_eq!(form.items[0].line_total().to_string(), "0.00");
        assert_eq!(form.grand_total().to_string(), "0.00");
    }

    #[test]
    fn complete_group_form_submits() {
        let new = filled_group().submit().unwrap();
        assert_eq!(new.members, vec!["Ana", "Luis"]);
        assert_eq!(new.items[0].assignee.as_deref(), Some("Ana"));
    }

    #[test]
    fn empty_form_reports_each_field() {
        let errors = CollectionForm::new(CollectionKind::Group).validate();
        assert!(errors.contains("name"));
        assert!(errors.contains("description"));
        assert!(errors.contains("members"));
        assert!(!errors.contains("items"));
    }

    #[test]
    fn blank_member_is_rejected() {
        let errors = filled_group().with_member(1, "  ").validate();
        assert_eq!(errors.get("members"), Some("Every member needs a name."));
    }

    #[test]
    fn duplicate_member_is_rejected() {
        let errors = filled_group().with_member(1, "Ana").validate();
        assert_eq!(errors.get("members"), Some("Member names must be unique."));
    }

    #[test]
    fn incomplete_item_is_rejected() {
        let form = filled_group().with_added_item().with_line_item(1, ItemField::Name, "Fish");
        let err = form.submit().unwrap_err();
        assert!(matches!(err, AppError::Validation(ref e) if e.contains("items")));
    }

    #[test]
    fn assignee_must_be_a_member() {
        let errors = filled_group()
            .with_line_item(0, ItemField::Assignee, "Carla")
            .validate();
        assert_eq!(
            errors.get("items"),
            Some("'Carla' is not a member of this collection.")
        );
    }

    #[test]
    fn numeric_format_is_not_checked() {
        let form = filled_group().with_line_item(0, ItemField::UnitPrice, "free");
        assert!(form.validate().is_empty());
    }

    #[test]
    fn individual_form_drops_assignees() {
        let form = CollectionForm::new(CollectionKind::Individual)
            .with_name("Groceries")
            .with_description("Week 3")
            .with_added_item()
            .with_line_item(0, ItemField::Name, "Milk")
            .with_line_item(0, ItemField::Quantity, "2")
            .with_line_item(0, ItemField::UnitPrice, "1.10");
        let new = form.submit().unwrap();
        assert!(new.members.is_empty());
        assert_eq!(new.items[0].assignee, None);
    }

    #[test]
    fn deserializes_from_json() {
        let form: CollectionForm = serde_json::from_str(
            r#"{"kind":"group","name":"A","description":"B","members":["X"],
                "items":[{"name":"n","quantity":"1","unit_price":"2","assignee":"X"}]}"#,
        )
        .unwrap();
        assert!(form.validate().is_empty());
    }
}
