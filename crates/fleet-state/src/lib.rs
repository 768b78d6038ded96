//! fleet-state: the shared fleet state store.
//!
//! Holds two kinds of records:
//!
//! - **Server groups**: flat string hashes under `servergroups.{name}`,
//!   indexed by the `servergroups` set. Registration is first-write-wins per
//!   field, so re-registering an existing group never overwrites policy an
//!   operator has edited.
//! - **Server statuses**: one JSON document per instance under
//!   `{namespace}{name}`. Written by the running instance itself; the
//!   controller only creates the placeholder and deletes it on retirement.
//!
//! # Backends
//!
//! ```text
//! FleetStore (trait)
//!   ├── RedisStore shared store, visible to every game server
//!   └── StateStore embedded redb store (single host, tests)
//! Fleet<S>         typed view: ServerGroup / ServerRecord decoding
//! ```
//!
//! Group records are decoded by a validating deserializer that fails closed
//! with [`StateError::MalformedPolicy`] instead of yielding half-filled
//! policy.

pub mod error;
pub mod fleet;
pub mod redis_store;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use fleet::{Fleet, StatusEntry};
pub use redis_store::RedisStore;
pub use store::{FleetStore, StateStore};
pub use types::*;
