/*!
# Splitbill

Shared and personal expense tracking, served over HTTP.

## Overview

Users sign in with an email and password (or Google) and keep two kinds of
expense collections:

- **Group** collections list members and assign each item to one of them.
  The summary shows one section per member with a subtotal, plus the
  grand total.
- **Individual** collections are one person's list of items with a total.

Every item is a name, a quantity, a unit price and (for groups) an
assignee. Quantities and prices are stored exactly as typed; totals are
always derived from the items when a collection is read, never stored.

## Architecture

### Domain
- **money**: lenient numeric parsing and the `Money` cents type
- **expense**: the collection document, its kind discriminant and patches
- **totals**: line totals, grand totals, per-member breakdown, even split
- **form**: the create form state and its required-field validation
- **legacy**: import of documents written by earlier versions of the app
- **export**: CSV and HTML renderings of a summary (XLSX with `web`)

### Persistence
- **store**: the `DocumentStore` trait and its JSON-file implementation
- **saving**: whole-store snapshots with gzip compression and bincode
- **transaction**: the quick expense log (one line per expense, by group)

### Web (feature `web`, on by default)
- **auth**: users, passwords, sessions and the auth middleware
- **oauth**: Google sign-in and one-time state values
- **chart**: group vs individual totals as JSON or a PNG chart
- **app**: routing and handlers

## REST API Endpoints

All `/api` routes need a session cookie.

- `GET /api/expenses?kind=` - Collection cards for the signed-in user
- `POST /api/expenses` - Create from a submitted form
- `GET|PATCH|DELETE /api/expenses/:id` - Read, update, delete one collection
- `GET /api/expenses/:id/summary` - Per-member summary
- `GET /api/expenses/:id/export?format=csv|xlsx` - Download a summary
- `GET /api/charts/totals` - Chart data
- `GET|POST /api/transactions?group=` - Quick expense log
- `POST /api/import/legacy` - Import legacy documents
*/

pub mod config;
pub mod error;
pub mod expense;
pub mod export;
pub mod form;
pub mod legacy;
pub mod money;
pub mod saving;
pub mod store;
pub mod totals;
pub mod transaction;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod auth;
#[cfg(feature = "web")]
pub mod chart;
#[cfg(feature = "web")]
pub mod oauth;

pub use config::AppConfig;
pub use error::{AppError, AppResult, ValidationErrors};
pub use expense::{CollectionKind, ExpenseCollection, LineItem, NewCollection};
pub use money::Money;
pub use store::{DocumentStore, JsonFileStore};
pub use totals::{Summary, summarize};
