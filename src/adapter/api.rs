use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::config::ConnectionConfig;
use crate::adapter::criteria::Criteria;
use crate::adapter::error::{AdapterError, AdapterResult};
use crate::adapter::operations;
use crate::adapter::registry::{Datastore, Registry};
use crate::adapter::schema::ModelSchema;
use crate::adapter::types::{DropOutcome, OneOrMany};
use crate::adapter::value::Record;
use crate::adapter::LOGGER;
use crate::database::{select_backend, DatabaseBackend};

/// Entry point used by the ORM: owns every registered connection and
/// dispatches collection operations to them.
///
/// Every operation first resolves `connection`; an identity that is not
/// registered fails with [`AdapterError::InvalidConnection`] before any
/// database call is made.
#[derive(Default)]
pub struct Adapter {
    registry: Registry,
}

impl Adapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities of the registered connections, sorted.
    pub fn identities(&self) -> Vec<String> {
        self.registry.identities()
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.registry.contains(identity)
    }

    /// Opens the database described by `config`, persists every model
    /// definition under `definitions/<collection>` and registers the
    /// connection.
    ///
    /// If persisting a definition fails the connection is not registered.
    /// Definitions already written are left in the database.
    pub async fn register_connection(
        &self,
        config: ConnectionConfig,
        models: BTreeMap<String, ModelSchema>,
    ) -> AdapterResult<()> {
        let identity = self.vacant_identity(&config)?;
        let backend = select_backend(config.database_url(), config.credential.clone())?;
        self.register(identity, config, backend, models).await
    }

    /// Like [`Adapter::register_connection`] but with a caller-supplied backend.
    pub async fn register_connection_with_backend(
        &self,
        config: ConnectionConfig,
        backend: Arc<dyn DatabaseBackend>,
        models: BTreeMap<String, ModelSchema>,
    ) -> AdapterResult<()> {
        let identity = self.vacant_identity(&config)?;
        self.register(identity, config, backend, models).await
    }

    fn vacant_identity(&self, config: &ConnectionConfig) -> AdapterResult<String> {
        let identity = config.normalized_identity()?;
        if self.registry.contains(&identity) {
            return Err(AdapterError::IdentityDuplicate { identity });
        }
        Ok(identity)
    }

    async fn register(
        &self,
        identity: String,
        config: ConnectionConfig,
        backend: Arc<dyn DatabaseBackend>,
        models: BTreeMap<String, ModelSchema>,
    ) -> AdapterResult<()> {
        if let Err(err) = operations::persist_definitions(backend.as_ref(), &models).await {
            LOGGER.warn(format!(
                "Registering connection '{identity}' failed: {err}"
            ));
            backend.close().await;
            return Err(err);
        }

        let collections = models.len();
        let datastore = Arc::new(Datastore::new(
            identity.clone(),
            config,
            backend.clone(),
            models,
        ));
        if let Err(err) = self.registry.insert(datastore) {
            backend.close().await;
            return Err(err);
        }

        LOGGER.info(format!(
            "Registered connection '{identity}' with {collections} collection(s)"
        ));
        Ok(())
    }

    /// Releases the named connection, or every connection when `identity` is
    /// `None`. Unknown identities are ignored.
    pub async fn teardown(&self, identity: Option<&str>) -> AdapterResult<()> {
        let datastores = match identity {
            Some(identity) => {
                let removed = self.registry.remove(identity);
                if removed.is_none() {
                    LOGGER.debug(format!(
                        "Teardown of unknown connection '{identity}' ignored"
                    ));
                }
                removed.into_iter().collect()
            }
            None => self.registry.drain(),
        };

        for datastore in datastores {
            datastore.backend().close().await;
            LOGGER.info(format!(
                "Tore down connection '{}' ({}; collections: {:?})",
                datastore.identity(),
                datastore.config().database_url().unwrap_or("in-memory"),
                datastore.collections()
            ));
        }
        Ok(())
    }

    /// Records the schema of `collection` and persists its definition.
    pub async fn define(
        &self,
        connection: &str,
        collection: &str,
        schema: impl Into<ModelSchema>,
    ) -> AdapterResult<()> {
        let store = self.registry.lookup(connection)?;
        operations::define_collection(&store, collection, schema.into()).await
    }

    /// Removes the definition and every document of `collection`.
    ///
    /// Dropping a collection that does not exist succeeds. `relations` is
    /// accepted for interface compatibility; related collections are not
    /// touched.
    pub async fn drop_collection(
        &self,
        connection: &str,
        collection: &str,
        relations: &[String],
    ) -> AdapterResult<DropOutcome> {
        let store = self.registry.lookup(connection)?;
        if !relations.is_empty() {
            LOGGER.debug(format!(
                "Ignoring relations {relations:?} while dropping '{collection}'"
            ));
        }
        operations::drop_collection(&store, collection).await
    }

    pub async fn create(
        &self,
        connection: &str,
        collection: &str,
        values: impl Into<OneOrMany<Record>>,
    ) -> AdapterResult<OneOrMany<Record>> {
        let store = self.registry.lookup(connection)?;
        let schema = store.schema(collection);
        match values.into() {
            OneOrMany::One(record) => {
                operations::create_document(&store, collection, &schema, record)
                    .await
                    .map(OneOrMany::One)
            }
            OneOrMany::Many(records) => {
                operations::create_documents(&store, collection, &schema, records)
                    .await
                    .map(OneOrMany::Many)
            }
        }
    }

    /// Creates every record concurrently. The result keeps the input order and
    /// the first failure is returned.
    pub async fn create_each(
        &self,
        connection: &str,
        collection: &str,
        records: Vec<Record>,
    ) -> AdapterResult<Vec<Record>> {
        let store = self.registry.lookup(connection)?;
        let schema = store.schema(collection);
        operations::create_documents(&store, collection, &schema, records).await
    }

    pub async fn find(
        &self,
        connection: &str,
        collection: &str,
        criteria: &Criteria,
    ) -> AdapterResult<Vec<Record>> {
        let store = self.registry.lookup(connection)?;
        operations::find_records(&store, collection, criteria).await
    }

    /// Reads the whole collection and returns the first record matching
    /// `criteria`.
    pub async fn find_one(
        &self,
        connection: &str,
        collection: &str,
        criteria: &Criteria,
    ) -> AdapterResult<Option<Record>> {
        Ok(self
            .find(connection, collection, criteria)
            .await?
            .into_iter()
            .next())
    }

    /// Applies `values` to every matching record and returns the updated
    /// records. `id` cannot be changed.
    pub async fn update(
        &self,
        connection: &str,
        collection: &str,
        criteria: &Criteria,
        values: Record,
    ) -> AdapterResult<Vec<Record>> {
        let store = self.registry.lookup(connection)?;
        operations::update_records(&store, collection, criteria, values).await
    }

    /// Removes every matching record and returns what was removed.
    pub async fn destroy(
        &self,
        connection: &str,
        collection: &str,
        criteria: &Criteria,
    ) -> AdapterResult<Vec<Record>> {
        let store = self.registry.lookup(connection)?;
        operations::destroy_records(&store, collection, criteria).await
    }

    pub async fn count(
        &self,
        connection: &str,
        _collection: &str,
        _criteria: &Criteria,
    ) -> AdapterResult<usize> {
        self.registry.lookup(connection)?;
        Err(AdapterError::NotImplemented { operation: "count" })
    }

    pub async fn avg(
        &self,
        connection: &str,
        _collection: &str,
        _criteria: &Criteria,
    ) -> AdapterResult<f64> {
        self.registry.lookup(connection)?;
        Err(AdapterError::NotImplemented { operation: "avg" })
    }
}
