//! Logging facilities for lattice-graphql.
//!
//! lattice-graphql uses the `tracing` crate for instrumentation. The library
//! never installs a subscriber; to see logs, install one in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("lattice_graphql::protocol=debug,lattice_graphql::store=trace")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Signal emission.
    pub const SIGNAL: &str = "lattice_graphql_core::signal";
    /// Normalized node store (retain, release, eviction).
    pub const STORE: &str = "lattice_graphql::store";
    /// Payload merges.
    pub const MERGE: &str = "lattice_graphql::merge";
    /// Operation handler lifecycle.
    pub const OPERATION: &str = "lattice_graphql::operation";
    /// graphql-transport-ws state machine and WebSocket driver.
    pub const PROTOCOL: &str = "lattice_graphql::protocol";
    /// Non-streaming transports.
    pub const TRANSPORT: &str = "lattice_graphql::transport";
    /// Environment registry.
    pub const ENVIRONMENT: &str = "lattice_graphql::environment";
}
