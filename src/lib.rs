//! Webhook-dispatched work queue.
//!
//! Queue items move through unlocked -> locked -> completed. A periodic
//! dispatcher claims the next item for an idle worker and notifies the worker
//! over its trigger URL; a second periodic loop reclaims locks that have gone
//! stale; a reconciler enriches items with expected record counts pulled from
//! an external analytics warehouse.

pub mod analytics;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod model;
pub mod reaper;
pub mod reconcile;
pub mod worker;
