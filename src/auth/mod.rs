//! Authentication state machine: challenge parsing, scope accumulation,
//! token caching, and the 401-triggered retry loop.

pub mod cache;
pub mod challenge;
pub mod client;
pub mod credential;
pub mod scope;

pub use cache::Cache;
pub use challenge::{Challenge, Scheme};
pub use client::{AuthClient, ClientConfig, CustomHeaders, PreparedRequest};
pub use credential::{Credential, CredentialProvider, MultiCredentialProvider, StaticCredentialProvider};
pub use scope::{Action, Scope, ScopeManager};
