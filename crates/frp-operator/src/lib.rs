//! FRP operator: config index, aggregation, controllers and the config API

#![deny(missing_docs)]

/// Selector-based aggregation of endpoints into client configs
pub mod aggregate;
/// HTTP query boundary
pub mod api;
/// FRPServer and FRPClient controllers
pub mod controller;
/// Namespaces and endpoints known to the operator
pub mod index;
/// CRD installation
pub mod startup;
/// Logging setup
pub mod telemetry;
/// Watch loops feeding the index
pub mod watch;
