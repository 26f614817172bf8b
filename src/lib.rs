//! Datafixers
//!
//! A versioned data-migration engine for persisted tree-shaped records.
//! Producers describe how their data looked at each version as a chain of
//! schemas, attach fixers that upgrade one logical type across one version
//! step, and register the resulting chains per namespace. At load time the
//! registry brings every record up to date and restamps it.
//!
//! ## Features
//!
//! - **Schema Chains**: Versions inherit types from their parent and only
//!   declare what changed
//! - **Discriminator Maps**: Entity ids are registered, renamed and removed per version
//! - **Template-driven Fixers**: Rewrites reach every nested sub-value of a type,
//!   including self-referential passengers
//! - **Lockable Registry**: Registration closes once the host is running
//! - **Failure Snapshots**: Aborted records are fingerprinted with SHA256
//!
//! ## Architecture
//!
//! ```text
//! SchemaChain            FixerChain (per namespace)         Registry
//! ├── v10 (root)         ├── entity: [v11 rename, v12 ...]  ├── example → chain, target 12
//! │   └── v11            └── chunk:  [v12 ...] @ Level      └── other   → chain, target 3
//! │       └── v12
//!
//! record {…, example_DataVersion: 10} ──migrate──▶ {…, example_DataVersion: 12}
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod fixer;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod template;
pub mod version;

pub use checksum::{Checksum, RecordSnapshot};
pub use config::FixerConfig;
pub use error::{FixerError, Result};
pub use fixer::{FixOptions, Fixer, FixerChain, RecordPath, Rewrite};
pub use plan::MigrationPlan;
pub use registry::Registry;
pub use schema::{ChoiceKind, DiscriminatorMap, Schema, SchemaChain, SchemaId};
pub use template::TypeTemplate;
pub use version::{version_key, DataVersion};
