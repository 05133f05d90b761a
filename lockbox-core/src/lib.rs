//! Client-side credential and key-management core for the Lockbox wallet.
//!
//! Given a username and password (and optionally recovery answers), this
//! crate derives the account key hierarchy with scrypt, negotiates account
//! creation and authentication with the auth server, and maintains the
//! encrypted on-disk account: the public CarePackage (scrypt parameters
//! plus encrypted recovery questions) and the LoginPackage (encrypted
//! master key, sync key, and recovery cross-wraps).
//!
//! The public surface is [`login::LoginContext`]; everything else exists
//! to serve it. Wallet logic, the bitcoin network watcher, and the
//! content-addressed sync engine live outside this crate and are reached
//! only through the narrow seams in [`server`] and [`sync`].

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod cache;
pub mod crypto;
pub mod error;
pub mod login;
pub mod package;
pub mod server;
pub mod store;
pub mod sync;

pub use error::{LoginError, LoginResult};
pub use login::{LoginContext, SyncKeys};
