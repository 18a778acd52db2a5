//! # huddle
//!
//! Group accountability engine: members join a group by invite code, share
//! daily tasks or keep personal ones, submit one proof-backed completion per
//! task per day, verify each other's completions and follow streaks and
//! completion rates.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!   HTTP (api) ──▶│  MembershipManager   │── gates ──┐
//!                 └──────────┬───────────┘           ▼
//!                            │              ┌─────────────────┐
//!                            │              │  TaskRegistry   │
//!                            │              │ CompletionLedger│
//!                            ▼              └────────┬────────┘
//!                 ┌──────────────────────┐           │
//!                 │    MetricsEngine     │◀── folds ─┘
//!                 └──────────┬───────────┘
//!                            ▼
//!                 ┌──────────────────────┐
//!                 │ Store: memory|sqlite │
//!                 └──────────────────────┘
//! ```
//!
//! ## Modules
//! - `store`: persistence trait and backends; every race-sensitive write is one call
//! - `membership`, `tasks`, `ledger`, `metrics`: the core components
//! - `calendar`: clock injection and UTC calendar-day helpers
//! - `identity`: user lookup, registration and profiles
//! - `api`: HTTP boundary

pub mod api;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod invite;
pub mod ledger;
pub mod membership;
pub mod metrics;
pub mod model;
pub mod seed;
pub mod store;
pub mod tasks;

pub use config::Config;
pub use engine::{Core, CoreContext};
pub use error::{Error, ErrorKind, Result};
