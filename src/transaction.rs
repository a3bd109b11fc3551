//! Quick expense log.
//!
//! A flat list of one-line expenses (what, how much, which group) kept
//! apart from the itemized collections. Entries are only ever added and
//! listed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult, ValidationErrors};
use crate::money::{Money, parse_amount};

/// One logged expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEntry {
    pub id: String,
    pub owner: String,
    pub expense: String,
    pub amount: Money,
    pub group: String,
    pub timestamp: DateTime<Utc>,
}

/// The quick-add form as submitted; `amount` is the text the user typed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    #[serde(default)]
    pub expense: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub group: String,
}

impl NewEntry {
    /// Check every field and read the amount
    ///
    /// # Errors
    /// * `AppError::Validation` keyed by `expense`, `amount` or `group`
    pub fn validate(&self) -> AppResult<Money> {
        let mut errors = ValidationErrors::new();
        if self.expense.trim().is_empty() {
            errors.add("expense", "Please fill in every field.");
        }
        if self.group.trim().is_empty() {
            errors.add("group", "Please fill in every field.");
        }

        let amount = Money::from_f64_rounded(parse_amount(&self.amount));
        if self.amount.trim().is_empty() {
            errors.add("amount", "Please fill in every field.");
        } else if !amount.is_positive() {
            errors.add("amount", "Amount must be greater than zero.");
        }

        errors.into_result().map(|_| amount)
    }

    pub fn into_entry(self, owner: &str, amount: Money, now: DateTime<Utc>) -> ExpenseEntry {
        ExpenseEntry {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            expense: self.expense.trim().to_string(),
            amount,
            group: self.group.trim().to_string(),
            timestamp: now,
        }
    }
}

#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Validate and append an entry
    async fn add(&self, owner: &str, new: NewEntry) -> AppResult<ExpenseEntry>;

    /// `owner`'s entries, newest first, optionally for one group only
    async fn list(&self, owner: &str, group: Option<&str>) -> AppResult<Vec<ExpenseEntry>>;
}

/// [`TransactionLog`] kept in one JSON file, written the same way as the document store
pub struct JsonTransactionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonTransactionLog {
    /// The file is created on the first write
    pub fn new(path: impl AsRef<Path>) -> Self {
        JsonTransactionLog {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> AppResult<Vec<ExpenseEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Storage(format!("{} is unreadable: {e}", self.path.display())))
    }

    fn write_all(&self, entries: &[ExpenseEntry]) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl TransactionLog for JsonTransactionLog {
    async fn add(&self, owner: &str, new: NewEntry) -> AppResult<ExpenseEntry> {
        let amount = new.validate()?;

        let _guard = self.lock.lock().await;
        let mut entries = self.read_all()?;
        let entry = new.into_entry(owner, amount, Utc::now());
        entries.push(entry.clone());
        self.write_all(&entries)?;

        log::info!("logged expense {} of {} for {owner}", entry.id, entry.amount);
        Ok(entry)
    }

    async fn list(&self, owner: &str, group: Option<&str>) -> AppResult<Vec<ExpenseEntry>> {
        let _guard = self.lock.lock().await;
        let mut entries: Vec<ExpenseEntry> = self
            .read_all()?
            .into_iter()
            .filter(|entry| entry.owner == owner)
            .filter(|entry| group.is_none_or(|g| entry.group.eq_ignore_ascii_case(g.trim())))
            .collect();
        // appended in time order
        entries.reverse();
        Ok(entries)
    }
}
