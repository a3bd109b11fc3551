//! Line totals, grand totals and the per-member breakdown shown on the
//! summary screen.

use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::expense::{CollectionKind, ExpenseCollection, LineItem};
use crate::money::{Money, parse_amount};

/// Total for one line: `quantity * unit_price`, rounded to cents
///
/// Both inputs are read with [`parse_amount`], so empty or non-numeric text
/// counts as zero and negative values pass through.
///
/// # Examples
/// ```
/// use splitbill::totals::line_total;
///
/// assert_eq!(line_total("2", "3.00").to_string(), "6.00");
/// assert_eq!(line_total("", "5").to_string(), "0.00");
/// assert_eq!(line_total("3", "0.333").to_string(), "1.00");
/// ```
pub fn line_total(quantity: &str, unit_price: &str) -> Money {
    Money::from_f64_rounded(parse_amount(quantity) * parse_amount(unit_price))
}

/// Sum of every line total, whoever the items are assigned to
pub fn grand_total(items: &[LineItem]) -> Money {
    items.iter().map(LineItem::line_total).sum()
}

/// An item as displayed, with its computed line total
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemLine {
    pub name: String,
    pub quantity: String,
    pub unit_price: String,
    pub assignee: Option<String>,
    pub line_total: Money,
}

impl From<&LineItem> for ItemLine {
    fn from(item: &LineItem) -> Self {
        ItemLine {
            name: item.name.clone(),
            quantity: item.quantity.clone(),
            unit_price: item.unit_price.clone(),
            assignee: item.assignee.clone(),
            line_total: item.line_total(),
        }
    }
}

/// One member's section of the summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSubtotal {
    pub member: String,
    pub items: Vec<ItemLine>,
    pub subtotal: Money,
}

/// Group items by assignee, one section per member
///
/// Members come out in stored order and items keep storage order within a
/// member. A member with no items gets an empty section with a zero total.
/// A member name listed twice gets one section. Items assigned to anyone
/// not in `members` are left out here; see [`unassigned_items`].
pub fn per_member(members: &[String], items: &[LineItem]) -> Vec<MemberSubtotal> {
    let mut sections: Vec<MemberSubtotal> = Vec::with_capacity(members.len());

    for member in members {
        if sections.iter().any(|s| &s.member == member) {
            continue;
        }

        let lines: Vec<ItemLine> = items
            .iter()
            .filter(|item| item.assignee.as_deref() == Some(member.as_str()))
            .map(ItemLine::from)
            .collect();
        let subtotal: Money = lines.iter().map(|line| line.line_total).sum();

        sections.push(MemberSubtotal {
            member: member.clone(),
            items: lines,
            subtotal,
        });
    }

    sections
}

/// Items whose assignee is missing or not one of `members`
pub fn unassigned_items<'a>(members: &[String], items: &'a [LineItem]) -> Vec<&'a LineItem> {
    items
        .iter()
        .filter(|item| match &item.assignee {
            Some(assignee) => !members.iter().any(|m| m == assignee),
            None => true,
        })
        .collect()
}

/// Everything the summary screen renders for one collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub id: String,
    pub kind: CollectionKind,
    pub name: String,
    pub description: String,
    pub items: Vec<ItemLine>,
    pub members: Vec<MemberSubtotal>,
    pub unassigned: Vec<ItemLine>,
    pub unassigned_total: Money,
    pub grand_total: Money,
    pub warning: Option<String>,
}

/// Build the summary for a stored collection
///
/// The grand total always covers every item. For group collections, items
/// that point at a member no longer in the list are reported under
/// `unassigned` with a warning instead of being dropped silently, so the
/// member subtotals plus `unassigned_total` add up to the grand total.
pub fn summarize(collection: &ExpenseCollection) -> Summary {
    let items: Vec<ItemLine> = collection.items.iter().map(ItemLine::from).collect();
    let grand_total: Money = items.iter().map(|line| line.line_total).sum();

    let (members, unassigned) = match collection.kind {
        CollectionKind::Group => (
            per_member(&collection.members, &collection.items),
            unassigned_items(&collection.members, &collection.items)
                .into_iter()
                .map(ItemLine::from)
                .collect::<Vec<_>>(),
        ),
        CollectionKind::Individual => (Vec::new(), Vec::new()),
    };

    let unassigned_total: Money = unassigned.iter().map(|line| line.line_total).sum();
    let warning = if unassigned.is_empty() {
        None
    } else {
        Some(format!(
            "{} item(s) totalling {} are assigned to someone who is not a member",
            unassigned.len(),
            unassigned_total
        ))
    };

    Summary {
        id: collection.id.clone(),
        kind: collection.kind,
        name: collection.name.clone(),
        description: collection.description.clone(),
        items,
        members,
        unassigned,
        unassigned_total,
        grand_total,
        warning,
    }
}

/// Split `total` evenly between `members` people
///
/// Shares are whole cents. Leftover cents go one each to the first members,
/// so the shares always add back up to `total`.
///
/// # Errors
/// * `AppError::Validation` if `total` is not positive or `members` is zero
pub fn split_evenly(total: Money, members: usize) -> AppResult<Vec<Money>> {
    if !total.is_positive() {
        return Err(AppError::validation("total", "Enter an amount greater than zero."));
    }
    if members == 0 {
        return Err(AppError::validation("members", "Enter at least one member."));
    }

    let count = members as i64;
    let base = total.cents() / count;
    let remainder = total.cents() % count;

    Ok((0..count)
        .map(|i| Money::from_cents(base + i64::from(i < remainder)))
        .collect())
}
