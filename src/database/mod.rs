//! # Realtime Database storage layer
//!
//! The pieces of a Firebase Realtime Database client the adapter needs: a
//! [`DatabaseBackend`] abstraction with an in-memory implementation for tests and
//! local development, a REST implementation for hosted databases and the
//! emulator, credential handling (database secrets, OAuth access tokens and
//! service-account keys) and the push-id generator used to mint record keys.
//!
//! The persisted layout is fixed: model schemas live under
//! `definitions/<collection>` and records under
//! `documents/<collection>/<recordId>`.

mod backend;
mod credential;
pub mod error;
pub mod path;
mod push_id;

use std::sync::LazyLock;

use crate::logger::Logger;

#[doc(inline)]
pub use backend::{DatabaseBackend, InMemoryBackend, RestBackend};

pub(crate) use backend::select_backend;

#[doc(inline)]
pub use credential::{Credential, ServiceAccountKey};

#[doc(inline)]
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseResult};

#[doc(inline)]
pub use push_id::PushIdGenerator;

pub(crate) static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@orm-adapter/database"));
