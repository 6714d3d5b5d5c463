//! # ORM adapter
//!
//! [`Adapter`] is what the ORM talks to. It keeps a table of named
//! connections, each backed by a [`DatabaseBackend`](crate::database::DatabaseBackend),
//! and implements the collection operations on top of it: `create`,
//! `create_each`, `find`, `find_one`, `update`, `destroy`, `define` and
//! `drop_collection`. `count` and `avg` are reported as unsupported.
//!
//! Records cross the boundary through the [`transcoder`]: `id` becomes `_id`,
//! dates are stored as ISO-8601 strings and arrays the database returned as
//! keyed maps are restored.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use firebase_orm_adapter::adapter::{
//!     record_from_json, Adapter, ConnectionConfig, Criteria, Definition, FieldType, ModelSchema,
//! };
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = Adapter::new();
//! let users = ModelSchema::new(Definition::new().with_field("born", FieldType::Date));
//! adapter
//!     .register_connection(
//!         ConnectionConfig::new("default").with_database_url("https://demo.firebaseio.com"),
//!         BTreeMap::from([("users".to_owned(), users)]),
//!     )
//!     .await?;
//!
//! adapter
//!     .create("default", "users", record_from_json(json!({"name": "Ada", "born": "1815-12-10"})))
//!     .await?;
//! let ada = adapter
//!     .find_one("default", "users", &Criteria::all().where_eq("name", "Ada"))
//!     .await?;
//! # let _ = ada;
//! # Ok(())
//! # }
//! ```

mod api;
mod config;
pub mod criteria;
mod error;
mod operations;
mod registry;
pub mod schema;
pub mod transcoder;
mod types;
pub mod value;

use std::sync::LazyLock;

use crate::logger::Logger;

#[doc(inline)]
pub use api::Adapter;

#[doc(inline)]
pub use config::ConnectionConfig;

#[doc(inline)]
pub use criteria::{Condition, Criteria, Filter, SortDirection, SortKey};

#[doc(inline)]
pub use error::{AdapterError, AdapterResult};

#[doc(inline)]
pub use schema::{Attribute, Definition, FieldType, ModelSchema};

#[doc(inline)]
pub use transcoder::{deserialize, serialize};

#[doc(inline)]
pub use types::{DropOutcome, OneOrMany};

#[doc(inline)]
pub use value::{record_from_json, record_to_json, Document, FieldValue, Record};

pub(crate) static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@orm-adapter/registry"));
