#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod store;

pub use repo_types::{AccountState, NewUser, User};
pub use store::UserStore;
