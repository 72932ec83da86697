//! Meridian Core -- the planning model of a production planning engine.
//!
//! This crate holds the supply chain model (items, locations, buffers,
//! resources, operations, demands), the operationplans a solver places on
//! it, and everything derived from those plans: material and capacity
//! timelines, levels and clusters, problems and pegging.
//!
//! # Plan Lifecycle
//!
//! 1. **Model** -- Build the network through [`plan::Plan`] methods. Every
//!    structural edit bumps the plan's generation.
//! 2. **Plan** -- A [`solver::Solver`] creates, resizes and moves
//!    operationplans, usually wrapped in reversible [`command`] objects.
//!    Flowplans and loadplans follow every change immediately.
//! 3. **Derive** -- Levels and clusters ([`level`]) and problems
//!    ([`detect`]) are recomputed lazily when first queried after a change.
//! 4. **Report** -- [`query`] snapshots and [`pegging`] walks expose the
//!    result; [`hash`] and [`validation`] compare plans.
//!
//! # Creating an Operationplan
//!
//! ```rust,ignore
//! let key = plan.create_operationplan(NewPlan::new(op, qty(10.0)).ending(due))?;
//! match plan.activate(key)? {
//!     Activation::Activated(k) | Activation::Merged(k) => { /* use k */ }
//!     Activation::Deleted => { /* empty plan discarded */ }
//! }
//! ```
//!
//! # Key Types
//!
//! - [`plan::Plan`] -- Owns every arena; all edits go through it.
//! - [`operationplan::OperationPlan`] -- A planned execution of an operation.
//! - [`timeline::Timeline`] -- Ordered on-hand events with running totals.
//! - [`problem::Problem`] -- A detected infeasibility with a stable identity.
//! - [`fixed::Quantity`] -- Q32.32 fixed-point quantity for exact arithmetic.
//! - [`time::Date`] / [`time::Duration`] -- Second-resolution plan time.

pub mod buffer;
pub mod cache;
pub mod calendar;
pub mod command;
pub mod config;
pub mod demand;
pub mod detect;
pub mod error;
pub mod fixed;
pub mod flow;
pub mod flowplan;
pub mod hash;
pub mod id;
pub mod item;
pub mod level;
pub mod location;
pub mod operation;
pub mod operationplan;
pub mod params;
pub mod pegging;
pub mod plan;
pub mod problem;
pub mod query;
pub mod resource;
pub mod setup;
pub mod solver;
pub mod state;
pub mod time;
pub mod timeline;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
