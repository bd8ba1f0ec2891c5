//! strongbox - Personal secret vault
//!
//! "Every secret is its own file, and every file is ciphertext."
//!
//! Secrets live under hierarchical service paths (`email/work`,
//! `bank/checking`). Each one is a gpg-encrypted file inside the vault
//! directory, addressed to the recipient named in the vault's `.gpg-id`.
//! Mutations are all-or-nothing: a failed insert leaves no file and no
//! directory behind, and removing the last secret in a directory prunes it.
//!
//! The same store can be served as a local HTTP JSON API by a detached
//! server process (see [`server`]).

pub mod error;
pub mod gateway;
pub mod protocol;
pub mod pwgen;
pub mod server;
pub mod service;
pub mod store;

pub use error::VaultError;
pub use gateway::{Gateway, GatewayError, GpgGateway, MemoryGateway};
pub use service::ServicePath;
pub use store::{Overwrite, Store, TreeNode};
