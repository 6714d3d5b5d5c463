//! Per-operation database calls. Each function assumes the connection has
//! already been resolved and works on one collection.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::try_join_all;
use serde_json::Value;

use crate::adapter::criteria::Criteria;
use crate::adapter::error::AdapterResult;
use crate::adapter::registry::Datastore;
use crate::adapter::schema::{Definition, ModelSchema};
use crate::adapter::transcoder::{
    deserialize, serialize, CREATED_AT, DOCUMENT_ID, RECORD_ID, UPDATED_AT,
};
use crate::adapter::types::DropOutcome;
use crate::adapter::value::{format_date, Document, FieldValue, Record};
use crate::adapter::LOGGER;
use crate::database::error::internal_error;
use crate::database::path::{collection_path, definition_path, document_path};
use crate::database::DatabaseBackend;

const PRIORITY_KEY: &str = ".priority";

/// A document read back from the database together with the key it is
/// stored under and its record form.
struct Stored {
    key: String,
    document: Document,
    record: Record,
}

pub(crate) async fn persist_definitions(
    backend: &dyn DatabaseBackend,
    schemas: &BTreeMap<String, ModelSchema>,
) -> AdapterResult<()> {
    try_join_all(
        schemas
            .iter()
            .map(|(collection, schema)| write_definition(backend, collection, &schema.definition)),
    )
    .await?;
    Ok(())
}

async fn write_definition(
    backend: &dyn DatabaseBackend,
    collection: &str,
    definition: &Definition,
) -> AdapterResult<()> {
    let path = definition_path(collection)?;
    let raw = definition.to_json().map_err(|err| {
        internal_error(format!(
            "Failed to encode the definition of '{collection}': {err}"
        ))
    })?;
    backend.set(&path, raw).await?;
    Ok(())
}

pub(crate) async fn define_collection(
    store: &Datastore,
    collection: &str,
    schema: ModelSchema,
) -> AdapterResult<()> {
    write_definition(store.backend(), collection, &schema.definition).await?;
    store.define(collection, schema);
    LOGGER.debug(format!(
        "Defined collection '{collection}' on '{}'",
        store.identity()
    ));
    Ok(())
}

pub(crate) async fn drop_collection(
    store: &Datastore,
    collection: &str,
) -> AdapterResult<DropOutcome> {
    let definition = definition_path(collection)?;
    let documents = collection_path(collection)?;
    let backend = store.backend();

    let (definition, documents) = futures::join!(
        backend.delete(&definition),
        backend.delete(&documents)
    );
    store.forget(collection);

    let outcome = DropOutcome {
        definition,
        documents,
    };
    if !outcome.is_complete() {
        LOGGER.warn(format!(
            "Dropping '{collection}' on '{}' was incomplete: {outcome:?}",
            store.identity()
        ));
    }
    Ok(outcome)
}

pub(crate) async fn create_document(
    store: &Datastore,
    collection: &str,
    schema: &ModelSchema,
    record: Record,
) -> AdapterResult<Record> {
    let mut document = serialize(&record, &schema.definition);

    let existing_id = match document.get(DOCUMENT_ID) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    let id = match existing_id {
        Some(id) => id,
        None => {
            let id = store.next_id();
            document.insert(DOCUMENT_ID.to_owned(), Value::String(id.clone()));
            id
        }
    };

    let now = Value::String(format_date(&Utc::now()));
    let created_at_blank = document
        .get(CREATED_AT)
        .map_or(true, |value| FieldValue::from(value.clone()).is_blank());
    if created_at_blank {
        document.insert(CREATED_AT.to_owned(), now.clone());
    }
    document.insert(UPDATED_AT.to_owned(), now);

    let path = document_path(collection, &id)?;
    store
        .backend()
        .set(&path, Value::Object(document.clone()))
        .await?;

    Ok(deserialize(
        &document,
        &schema.definition,
        schema.prototype.as_ref(),
    ))
}

/// Creates every record concurrently; the output keeps the input order.
pub(crate) async fn create_documents(
    store: &Datastore,
    collection: &str,
    schema: &ModelSchema,
    records: Vec<Record>,
) -> AdapterResult<Vec<Record>> {
    try_join_all(
        records
            .into_iter()
            .map(|record| create_document(store, collection, schema, record)),
    )
    .await
}

pub(crate) async fn find_records(
    store: &Datastore,
    collection: &str,
    criteria: &Criteria,
) -> AdapterResult<Vec<Record>> {
    let schema = store.schema(collection);
    Ok(find_stored(store, collection, &schema, criteria)
        .await?
        .into_iter()
        .map(|stored| stored.record)
        .collect())
}

pub(crate) async fn update_records(
    store: &Datastore,
    collection: &str,
    criteria: &Criteria,
    values: Record,
) -> AdapterResult<Vec<Record>> {
    let schema = store.schema(collection);
    let matches = find_stored(store, collection, &schema, criteria).await?;
    if matches.is_empty() {
        return Ok(Vec::new());
    }

    let mut changes = serialize(&values, &schema.definition);
    changes.remove(DOCUMENT_ID);
    changes.remove(RECORD_ID);
    let now = Value::String(format_date(&Utc::now()));

    let mut writes = Vec::with_capacity(matches.len());
    let mut updated = Vec::with_capacity(matches.len());
    for Stored {
        key, mut document, ..
    } in matches
    {
        for (field, value) in &changes {
            document.insert(field.clone(), value.clone());
        }
        document.insert(UPDATED_AT.to_owned(), now.clone());

        updated.push(deserialize(
            &document,
            &schema.definition,
            schema.prototype.as_ref(),
        ));
        writes.push((document_path(collection, &key)?, Value::Object(document)));
    }

    store
        .backend()
        .update(&collection_path(collection)?, writes)
        .await?;
    Ok(updated)
}

pub(crate) async fn destroy_records(
    store: &Datastore,
    collection: &str,
    criteria: &Criteria,
) -> AdapterResult<Vec<Record>> {
    let schema = store.schema(collection);
    let matches = find_stored(store, collection, &schema, criteria).await?;
    if matches.is_empty() {
        return Ok(Vec::new());
    }

    let mut removals = Vec::with_capacity(matches.len());
    let mut destroyed = Vec::with_capacity(matches.len());
    for stored in matches {
        removals.push((document_path(collection, &stored.key)?, Value::Null));
        destroyed.push(stored.record);
    }

    store
        .backend()
        .update(&collection_path(collection)?, removals)
        .await?;
    Ok(destroyed)
}

async fn find_stored(
    store: &Datastore,
    collection: &str,
    schema: &ModelSchema,
    criteria: &Criteria,
) -> AdapterResult<Vec<Stored>> {
    let stored = fetch_documents(store.backend(), collection)
        .await?
        .into_iter()
        .map(|(key, document)| Stored {
            record: deserialize(&document, &schema.definition, schema.prototype.as_ref()),
            key,
            document,
        })
        .collect();
    Ok(criteria.apply_by(stored, |stored| &stored.record))
}

/// Reads every document of a collection. Children that are not objects are
/// skipped and a missing `_id` is taken from the child's key.
async fn fetch_documents(
    backend: &dyn DatabaseBackend,
    collection: &str,
) -> AdapterResult<Vec<(String, Document)>> {
    let children: Vec<(String, Value)> = match backend.get(&collection_path(collection)?).await? {
        Value::Object(map) => map.into_iter().collect(),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        _ => Vec::new(),
    };

    Ok(children
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Object(mut document) => {
                document.remove(PRIORITY_KEY);
                document
                    .entry(DOCUMENT_ID)
                    .or_insert_with(|| Value::String(key.clone()));
                Some((key, document))
            }
            other => {
                LOGGER.debug(format!(
                    "Skipping non-document child '{key}' in '{collection}': {other}"
                ));
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::config::ConnectionConfig;
    use crate::adapter::schema::FieldType;
    use crate::adapter::value::record_from_json;
    use crate::database::InMemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn store_with(backend: Arc<InMemoryBackend>) -> Datastore {
        Datastore::new(
            "main".into(),
            ConnectionConfig::new("main"),
            backend,
            BTreeMap::new(),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_generates_id_and_timestamps() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());
        let schema = ModelSchema::new(Definition::new().with_field("name", FieldType::String));

        let created = create_document(
            &store,
            "users",
            &schema,
            record_from_json(json!({"name": "Ada"})),
        )
        .await
        .unwrap();

        let id = created["id"].as_str().unwrap().to_owned();
        assert_eq!(id.len(), 20);
        assert!(created["createdAt"].as_date().is_some());
        assert_eq!(created["createdAt"], created["updatedAt"]);

        let stored = &backend.snapshot()["documents"]["users"][&id];
        assert_eq!(stored["_id"], json!(id));
        assert_eq!(stored["name"], json!("Ada"));
        assert!(stored["createdAt"].is_string());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_keeps_supplied_id_and_created_at() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());

        let created = create_document(
            &store,
            "users",
            &ModelSchema::default(),
            record_from_json(json!({"id": "ada", "createdAt": "2020-01-01T00:00:00.000Z"})),
        )
        .await
        .unwrap();

        assert_eq!(created["id"], FieldValue::from("ada"));
        assert_eq!(
            backend.snapshot()["documents"]["users"]["ada"]["createdAt"],
            json!("2020-01-01T00:00:00.000Z")
        );
        assert_ne!(created["createdAt"], created["updatedAt"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn create_treats_empty_created_at_as_missing() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());

        let created = create_document(
            &store,
            "users",
            &ModelSchema::default(),
            record_from_json(json!({"id": "a", "createdAt": ""})),
        )
        .await
        .unwrap();

        assert!(created["createdAt"].as_date().is_some());
        assert_eq!(created["createdAt"], created["updatedAt"]);
        let stored = &backend.snapshot()["documents"]["users"]["a"];
        assert_eq!(stored["createdAt"], stored["updatedAt"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fetch_fills_missing_ids_and_skips_scalars() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .set(
                &collection_path("users").unwrap(),
                json!({
                    "a": {"name": "Ada", ".priority": 1},
                    "b": {"_id": "b", "name": "Grace"},
                    "junk": 42
                }),
            )
            .await
            .unwrap();

        let documents = fetch_documents(backend.as_ref(), "users").await.unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(
            Value::Object(documents[0].1.clone()),
            json!({"_id": "a", "name": "Ada"})
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn update_merges_values_and_ignores_ids() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());
        for name in ["Ada", "Grace"] {
            create_document(
                &store,
                "users",
                &ModelSchema::default(),
                record_from_json(json!({"id": name.to_lowercase(), "name": name, "lang": "en"})),
            )
            .await
            .unwrap();
        }

        let updated = update_records(
            &store,
            "users",
            &Criteria::all().where_eq("name", "grace"),
            record_from_json(json!({"id": "hijack", "lang": "cobol"})),
        )
        .await
        .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["id"], FieldValue::from("grace"));
        let documents = &backend.snapshot()["documents"]["users"];
        assert_eq!(documents["grace"]["lang"], json!("cobol"));
        assert_eq!(documents["ada"]["lang"], json!("en"));
        assert!(documents.get("hijack").is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn destroy_removes_matches_only() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());
        create_documents(
            &store,
            "users",
            &ModelSchema::default(),
            vec![
                record_from_json(json!({"id": "a", "age": 30})),
                record_from_json(json!({"id": "b", "age": 50})),
            ],
        )
        .await
        .unwrap();

        let destroyed = destroy_records(
            &store,
            "users",
            &Criteria::from_value(json!({"age": {">": 40}})).unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(destroyed.len(), 1);
        assert_eq!(destroyed[0]["id"], FieldValue::from("b"));
        let remaining = find_records(&store, "users", &Criteria::all()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drop_removes_definition_and_documents() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = store_with(backend.clone());
        define_collection(
            &store,
            "users",
            Definition::new().with_field("born", FieldType::Date).into(),
        )
        .await
        .unwrap();
        create_document(&store, "users", &store.schema("users"), Record::new())
            .await
            .unwrap();

        let outcome = drop_collection(&store, "users").await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(backend.snapshot(), json!({}));
        assert!(store.schema("users").definition.is_empty());
    }
}
