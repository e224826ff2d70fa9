//! Domain layer - call flows, call records and the carrier-facing contracts

/// Flow definitions and step types
pub mod flow_definition;

/// Block and cursor addressing of nested steps
pub mod arena;

/// Call records, segments and the merge-patch
pub mod call_record;

/// Time-of-day schedule evaluation
pub mod schedule;

/// Control documents rendered for the carrier
pub mod control;

/// Callback URL contract
pub mod resumption;

/// Carrier webhook payloads
pub mod webhook;

/// Repository traits
pub mod repository;
