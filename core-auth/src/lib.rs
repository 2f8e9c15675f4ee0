//! # Core Auth
//!
//! Credential and endpoint collaborators for the mirror.
//!
//! - [`TokenProvider`]: supplies the bearer token for data requests. Either a
//!   fixed token ([`StaticTokenProvider`]) or an OAuth2 client-credentials
//!   grant cached until shortly before expiry ([`ClientCredentialsProvider`]).
//! - [`EndpointResolver`]: yields the data endpoint URL. Either fixed
//!   ([`StaticEndpoint`]) or looked up by account name in a directory service
//!   ([`DirectoryEndpointResolver`]).
//!
//! All failures here are [`AuthError`]s, which stop the run.

pub mod directory;
pub mod error;
pub mod token;

pub use directory::{DirectoryEndpointResolver, EndpointResolver, StaticEndpoint};
pub use error::{AuthError, Result};
pub use token::{ClientCredentialsProvider, StaticTokenProvider, TokenProvider};
