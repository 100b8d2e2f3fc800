//! Reactive primitives for lattice-graphql.
//!
//! This crate provides the small observer toolkit the GraphQL runtime builds on:
//!
//! - **Signal/Slot System**: [`Signal<Args>`] delivers notifications to connected closures
//! - **Property System**: [`Property<T>`] stores a value and reports whether a write changed it
//! - **Logging**: target names used by every subsystem for `tracing` filtering
//!
//! # Signal/Slot Example
//!
//! ```
//! use lattice_graphql_core::Signal;
//!
//! let name_changed = Signal::<String>::new();
//!
//! let conn_id = name_changed.connect(|name| {
//!     println!("name is now {}", name);
//! });
//!
//! name_changed.emit("Ann".to_string());
//! name_changed.disconnect(conn_id);
//! ```
//!
//! # Property Example
//!
//! ```
//! use lattice_graphql_core::{Property, Signal};
//!
//! struct User {
//!     name: Property<String>,
//!     name_changed: Signal<()>,
//! }
//!
//! impl User {
//!     fn set_name(&self, name: &str) {
//!         if self.name.set(name.to_string()) {
//!             self.name_changed.emit(());
//!         }
//!     }
//! }
//!
//! let user = User { name: Property::new(String::new()), name_changed: Signal::new() };
//! user.set_name("Ann");
//! assert_eq!(user.name.get(), "Ann");
//! ```

pub mod logging;
pub mod property;
pub mod signal;

pub use property::Property;
pub use signal::{ConnectionId, Signal};
