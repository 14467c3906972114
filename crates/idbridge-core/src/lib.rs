//! Core types for identity brokering.
//!
//! This crate holds everything the protocol crates share:
//! - the [`IdentityDraft`] produced by token/assertion verification
//! - key, user, and federation-link models
//! - the [`KeyStore`] and [`UserStore`] traits with in-memory
//!   implementations for tests and embedding
//! - JSON claim flattening
//! - the tiered [`ResolutionEngine`] that matches a draft against the
//!   local user store and upserts the federation link

pub mod draft;
pub mod error;
pub mod flatten;
pub mod keys;
pub mod link;
pub mod resolver;
pub mod store;
pub mod user;
pub mod verifier;

pub use draft::IdentityDraft;
pub use error::{CoreError, CoreResult};
pub use flatten::{flatten, flatten_into};
pub use keys::{KeyEntry, KeyStatus, KeyUse};
pub use link::FederationLink;
pub use resolver::{ResolutionEngine, ResolutionOutcome, ResolverConfig};
pub use store::{InMemoryKeyStore, InMemoryUserStore, KeyStore, UserStore};
pub use user::User;
pub use verifier::Verifier;
