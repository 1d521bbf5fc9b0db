//! External player profile collaborator

pub mod lookup;

pub use lookup::{InMemoryPlayerDirectory, OpenPlayerLookup, PlayerLookup};
