//! Lock-striped concurrent hash map.
//!
//! # [`HashMap`]
//! A concurrent hash map with a lock per bucket, lock-free reads, lock-free value replacement,
//! and online growth; the bucket array is replaced by a larger one without blocking readers.
//!
//! # [`Key`]
//! A tagged key type for maps that mix heterogeneous keys.
//!
//! # Features
//! * `serde`: [`HashMap`] and [`Key`] implement `Serialize` and `Deserialize`.
//! * `json`: [`HashMap`] can be directly encoded to and decoded from JSON.
//! * `equivalent`: uses the [`equivalent`](https://crates.io/crates/equivalent) crate instead of
//!   the built-in [`Equivalent`] trait.

#[cfg(not(feature = "equivalent"))]
mod equivalent;
#[cfg(not(feature = "equivalent"))]
pub use equivalent::Equivalent;
#[cfg(feature = "equivalent")]
pub use equivalent::Equivalent;

pub mod hash_map;
pub use hash_map::{HashMap, DEFAULT_CAPACITY, DEFAULT_LOAD_FACTOR};

mod hash_table;

mod hasher;
pub use hasher::{fnv1a, index_of, MapKey};

mod key;
pub use key::Key;

#[cfg(feature = "serde")]
mod serde;
