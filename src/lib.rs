//! Redshift provider for Hemmer.
//!
//! Manages Amazon Redshift users, groups, roles, databases, schemas,
//! privileges and datashares as declarative resources. Each resource turns its
//! attributes into DDL/DCL and reads them back from the system catalog so
//! drift shows up in the next plan.
//!
//! # Resources
//!
//! | Type | Object |
//! | --- | --- |
//! | `redshift_user` | User, its password and options |
//! | `redshift_group` | Group and its members |
//! | `redshift_role` | Role |
//! | `redshift_database` | Local database, or one created from a datashare |
//! | `redshift_schema` | Local or external schema |
//! | `redshift_grant` | Privileges of a user, group, role or `PUBLIC` on one kind of object |
//! | `redshift_default_privileges` | Privileges granted on objects created later |
//! | `redshift_datashare` | Outbound datashare and its schemas |
//! | `redshift_datashare_privilege` | Share granted to an account or namespace |
//!
//! Data sources `redshift_user`, `redshift_group`, `redshift_database`,
//! `redshift_schema`, `redshift_namespace` and `redshift_datashare` look up
//! existing objects.
//!
//! # Running
//!
//! The binary speaks the Hemmer provider protocol. On start it prints
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! on stdout and serves gRPC on that address until SIGTERM or SIGINT. Logs go
//! to stderr; see [`logging`].
//!
//! # Embedding
//!
//! ```ignore
//! use redshift_provider::{serve, RedshiftProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     redshift_provider::init_logging();
//!     serve(RedshiftProvider::new()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acl;
pub mod client;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod server;
pub mod sql;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use client::{Client, RetryPolicy};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::RedshiftProvider;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
