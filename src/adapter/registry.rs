use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::adapter::config::ConnectionConfig;
use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::schema::ModelSchema;
use crate::database::{DatabaseBackend, PushIdGenerator};

/// One registered connection: the backend handle plus the schemas known for
/// each collection.
pub(crate) struct Datastore {
    identity: String,
    config: ConnectionConfig,
    backend: Arc<dyn DatabaseBackend>,
    ids: PushIdGenerator,
    schemas: RwLock<BTreeMap<String, ModelSchema>>,
}

impl Datastore {
    pub(crate) fn new(
        identity: String,
        config: ConnectionConfig,
        backend: Arc<dyn DatabaseBackend>,
        schemas: BTreeMap<String, ModelSchema>,
    ) -> Self {
        Self {
            identity,
            config,
            backend,
            ids: PushIdGenerator::new(),
            schemas: RwLock::new(schemas),
        }
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }

    pub(crate) fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// Schema for `collection`; collections never defined get an empty one.
    pub(crate) fn schema(&self, collection: &str) -> ModelSchema {
        self.schemas
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn define(&self, collection: &str, schema: ModelSchema) {
        self.schemas
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(collection.to_owned(), schema);
    }

    pub(crate) fn forget(&self, collection: &str) {
        self.schemas
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .remove(collection);
    }

    pub(crate) fn collections(&self) -> Vec<String> {
        self.schemas
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

/// Identity-keyed table of live connections. The lock is only held for map
/// access, never across an `.await`.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<String, Arc<Datastore>>>,
}

impl Registry {
    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<Datastore>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn contains(&self, identity: &str) -> bool {
        self.guard().contains_key(identity)
    }

    pub(crate) fn lookup(&self, identity: &str) -> AdapterResult<Arc<Datastore>> {
        self.guard()
            .get(identity)
            .cloned()
            .ok_or_else(|| AdapterError::InvalidConnection {
                identity: identity.to_owned(),
            })
    }

    /// Stores `datastore` unless its identity was registered in the meantime.
    pub(crate) fn insert(&self, datastore: Arc<Datastore>) -> AdapterResult<()> {
        let mut entries = self.guard();
        if entries.contains_key(datastore.identity()) {
            return Err(AdapterError::IdentityDuplicate {
                identity: datastore.identity().to_owned(),
            });
        }
        entries.insert(datastore.identity().to_owned(), datastore);
        Ok(())
    }

    pub(crate) fn remove(&self, identity: &str) -> Option<Arc<Datastore>> {
        self.guard().remove(identity)
    }

    pub(crate) fn drain(&self) -> Vec<Arc<Datastore>> {
        self.guard().drain().map(|(_, datastore)| datastore).collect()
    }

    pub(crate) fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.guard().keys().cloned().collect();
        identities.sort();
        identities
    }
}
