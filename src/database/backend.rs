use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use crate::database::credential::{Credential, CredentialProvider};
use crate::database::error::{
    internal_error, invalid_argument, permission_denied, unavailable, DatabaseError,
    DatabaseResult,
};
use crate::database::LOGGER;

/// Storage operations the adapter needs from a Realtime Database.
///
/// Paths are slices of already validated keys. Writing `null` removes the node,
/// reading a missing node yields `null`.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()>;

    /// Applies several writes relative to `base_path` in a single request.
    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()>;

    async fn delete(&self, path: &[String]) -> DatabaseResult<()>;

    async fn get(&self, path: &[String]) -> DatabaseResult<Value>;

    /// Releases the resources held by the backend.
    async fn close(&self) {}
}

/// Picks the REST backend when a database URL is configured and the in-memory
/// backend otherwise.
pub(crate) fn select_backend(
    database_url: Option<&str>,
    credential: Option<Credential>,
) -> DatabaseResult<Arc<dyn DatabaseBackend>> {
    match database_url {
        Some(url) => {
            let backend = RestBackend::new(url, credential)?;
            LOGGER.debug(format!("Using REST backend at {}", backend.base_url));
            Ok(Arc::new(backend))
        }
        None => {
            LOGGER.info("No database_url configured; using the in-memory backend");
            Ok(Arc::new(InMemoryBackend::default()))
        }
    }
}

/// Process-local database tree, used when no database URL is configured.
pub struct InMemoryBackend {
    data: Mutex<Value>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self {
            data: Mutex::new(Value::Object(Default::default())),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the whole tree.
    pub fn snapshot(&self) -> Value {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl DatabaseBackend for InMemoryBackend {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()> {
        let mut data = self.lock();
        set_at_path(&mut data, path, value);
        Ok(())
    }

    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()> {
        for (path, _) in &updates {
            check_update_path(path, base_path)?;
        }
        let mut data = self.lock();
        for (path, value) in updates {
            set_at_path(&mut data, &path, value);
        }
        Ok(())
    }

    async fn delete(&self, path: &[String]) -> DatabaseResult<()> {
        let mut data = self.lock();
        set_at_path(&mut data, path, Value::Null);
        Ok(())
    }

    async fn get(&self, path: &[String]) -> DatabaseResult<Value> {
        let data = self.lock();
        Ok(get_at_path(&data, path).cloned().unwrap_or(Value::Null))
    }
}

/// Talks to a hosted database or the emulator through the REST protocol.
pub struct RestBackend {
    client: Client,
    base_url: Url,
    base_query: Vec<(String, String)>,
    credentials: CredentialProvider,
    closed: AtomicBool,
}

impl RestBackend {
    pub fn new(raw_url: &str, credential: Option<Credential>) -> DatabaseResult<Self> {
        let mut url = Url::parse(raw_url)
            .map_err(|err| invalid_argument(format!("Invalid database_url '{raw_url}': {err}")))?;

        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_owned();
            path.push('/');
            url.set_path(&path);
        }

        let base_query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.set_query(None);

        let client = Client::builder()
            .build()
            .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            credentials: CredentialProvider::new(credential, client.clone()),
            client,
            base_url: url,
            base_query,
            closed: AtomicBool::new(false),
        })
    }

    fn url_for_path(&self, path: &[String], query: &[(String, String)]) -> DatabaseResult<Url> {
        let relative = if path.is_empty() {
            ".json".to_string()
        } else {
            format!("{}.json", path.join("/"))
        };
        let mut url = self
            .base_url
            .join(&relative)
            .map_err(|err| internal_error(format!("Failed to compose database URL: {err}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in self.base_query.iter().chain(query.iter()) {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    async fn send_request(
        &self,
        method: Method,
        path: &[String],
        mut query: Vec<(String, String)>,
        body: Option<&Value>,
    ) -> DatabaseResult<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(unavailable("The database connection has been closed"));
        }
        if let Some(param) = self.credentials.query_param().await? {
            query.push(param);
        }
        let url = self.url_for_path(path, &query)?;
        let mut request = self.client.request(method, url);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        request.send().await.map_err(handle_reqwest_error)
    }

    async fn ensure_success(response: Response) -> DatabaseResult<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.ok();
            Err(handle_http_error(status, body))
        }
    }
}

fn silent() -> Vec<(String, String)> {
    vec![("print".to_string(), "silent".to_string())]
}

#[async_trait]
impl DatabaseBackend for RestBackend {
    async fn set(&self, path: &[String], value: Value) -> DatabaseResult<()> {
        let response = self
            .send_request(Method::PUT, path, silent(), Some(&value))
            .await?;
        Self::ensure_success(response).await.map(|_| ())
    }

    async fn update(
        &self,
        base_path: &[String],
        updates: Vec<(Vec<String>, Value)>,
    ) -> DatabaseResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut payload = Map::with_capacity(updates.len());
        for (absolute_path, value) in updates {
            check_update_path(&absolute_path, base_path)?;
            payload.insert(absolute_path[base_path.len()..].join("/"), value);
        }

        let body = Value::Object(payload);
        let response = self
            .send_request(Method::PATCH, base_path, silent(), Some(&body))
            .await?;
        Self::ensure_success(response).await.map(|_| ())
    }

    async fn delete(&self, path: &[String]) -> DatabaseResult<()> {
        let response = self
            .send_request(Method::DELETE, path, silent(), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response).await.map(|_| ())
    }

    async fn get(&self, path: &[String]) -> DatabaseResult<Value> {
        let query = vec![("format".to_string(), "export".to_string())];
        let response = self.send_request(Method::GET, path, query, None).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Value::Null);
        }

        let response = Self::ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|err| internal_error(format!("Failed to decode database response: {err}")))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.credentials.clear().await;
    }
}

fn handle_reqwest_error(err: reqwest::Error) -> DatabaseError {
    if let Some(status) = err.status() {
        return handle_http_error(status, None);
    }
    unavailable(format!("Database request failed: {err}"))
}

fn handle_http_error(status: StatusCode, body: Option<String>) -> DatabaseError {
    let message = body.as_deref().and_then(extract_error_message);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            invalid_argument(message.unwrap_or_else(|| "Invalid data payload".to_string()))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            permission_denied(message.unwrap_or_else(|| "Permission denied".to_string()))
        }
        _ => internal_error(format!(
            "Database request failed with status {}{}",
            status.as_str(),
            message.map(|b| format!(": {b}")).unwrap_or_default()
        )),
    }
}

fn extract_error_message(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = obj.get("error") {
            return Some(message.clone());
        }
    }

    Some(raw.to_string())
}

fn check_update_path(path: &[String], base_path: &[String]) -> DatabaseResult<()> {
    if !path.starts_with(base_path) {
        return Err(internal_error(
            "Database update contained a path outside the reference",
        ));
    }
    if path.len() == base_path.len() {
        return Err(invalid_argument(
            "Database update path cannot be empty relative to the reference",
        ));
    }
    Ok(())
}

/// Drops `null` and empty children the way the database does; a node left
/// with nothing becomes `null`.
fn prune_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(key, child)| (key, prune_empty(child)))
                .filter(|(_, child)| !child.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        Value::Array(items) => {
            let items: Vec<Value> = items.into_iter().map(prune_empty).collect();
            if items.iter().all(Value::is_null) {
                Value::Null
            } else {
                Value::Array(items)
            }
        }
        other => other,
    }
}

/// Writes `value` at `path`; `null` removes the node and prunes parents left empty.
fn set_at_path(root: &mut Value, path: &[String], value: Value) {
    let value = prune_empty(value);
    let Some((last, parents)) = path.split_last() else {
        *root = if value.is_null() {
            Value::Object(Default::default())
        } else {
            value
        };
        return;
    };

    if value.is_null() {
        remove_at_path(root, parents, last);
        return;
    }

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        let Value::Object(map) = current else {
            unreachable!("node was just replaced by an object");
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

/// Removes `parents/last`, returning whether the node at `parents` became empty.
fn remove_at_path(node: &mut Value, parents: &[String], last: &str) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    match parents.split_first() {
        None => {
            map.remove(last);
        }
        Some((head, rest)) => {
            let emptied = match map.get_mut(head) {
                Some(child) => remove_at_path(child, rest, last),
                None => false,
            };
            if emptied {
                map.remove(head);
            }
        }
    }
    map.is_empty()
}

fn get_at_path<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|segment| segment.to_string()).collect()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn in_memory_set_get_roundtrip() {
        let backend = InMemoryBackend::new();
        backend
            .set(&path(&["documents", "users", "a"]), json!({"_id": "a"}))
            .await
            .unwrap();

        let value = backend.get(&path(&["documents", "users"])).await.unwrap();
        assert_eq!(value, json!({"a": {"_id": "a"}}));
        assert_eq!(
            backend.get(&path(&["documents", "pets"])).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn in_memory_null_write_prunes_empty_parents() {
        let backend = InMemoryBackend::new();
        backend
            .set(&path(&["documents", "users", "a"]), json!({"name": "x"}))
            .await
            .unwrap();
        backend
            .set(&path(&["definitions", "users"]), json!({"name": {"type": "string"}}))
            .await
            .unwrap();

        backend
            .set(&path(&["documents", "users", "a"]), Value::Null)
            .await
            .unwrap();

        assert_eq!(
            backend.snapshot(),
            json!({"definitions": {"users": {"name": {"type": "string"}}}})
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn in_memory_writes_drop_null_and_empty_children() {
        let backend = InMemoryBackend::new();
        backend
            .set(
                &path(&["documents", "users", "a"]),
                json!({"_id": "a", "lang": "en", "meta": {"n": 1}}),
            )
            .await
            .unwrap();

        backend
            .update(
                &path(&["documents", "users"]),
                vec![(
                    path(&["documents", "users", "a"]),
                    json!({"_id": "a", "lang": null, "meta": {}, "tags": {"x": null}}),
                )],
            )
            .await
            .unwrap();
        backend
            .set(&path(&["documents", "users", "b"]), json!({"empty": {}}))
            .await
            .unwrap();

        assert_eq!(
            backend.snapshot(),
            json!({"documents": {"users": {"a": {"_id": "a"}}}})
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn in_memory_update_rejects_paths_outside_base() {
        let backend = InMemoryBackend::new();
        let err = backend
            .update(
                &path(&["documents", "users"]),
                vec![(path(&["definitions", "users"]), json!(1))],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "database/internal");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rest_backend_preserves_namespace_and_attaches_secret() {
        let server = MockServer::start_async().await;
        let get_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/documents/users.json")
                    .query_param("ns", "demo")
                    .query_param("auth", "s3cret")
                    .query_param("format", "export");
                then.status(200).json_body(json!({"a": {"_id": "a"}}));
            })
            .await;

        let backend = RestBackend::new(
            &server.url("/?ns=demo"),
            Some(Credential::DatabaseSecret {
                database_secret: "s3cret".into(),
            }),
        )
        .unwrap();

        let value = backend.get(&path(&["documents", "users"])).await.unwrap();
        assert_eq!(value, json!({"a": {"_id": "a"}}));
        get_mock.assert_async().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rest_backend_update_sends_relative_patch() {
        let server = MockServer::start_async().await;
        let patch_mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/documents/users.json")
                    .query_param("print", "silent")
                    .json_body(json!({"a": {"_id": "a"}, "b": null}));
                then.status(204);
            })
            .await;

        let backend = RestBackend::new(&server.url("/"), None).unwrap();
        backend
            .update(
                &path(&["documents", "users"]),
                vec![
                    (path(&["documents", "users", "a"]), json!({"_id": "a"})),
                    (path(&["documents", "users", "b"]), Value::Null),
                ],
            )
            .await
            .unwrap();

        patch_mock.assert_async().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rest_backend_maps_permission_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/definitions/users.json");
                then.status(401).body("{\"error\": \"Permission denied\"}");
            })
            .await;

        let backend = RestBackend::new(&server.url("/"), None).unwrap();
        let err = backend
            .set(&path(&["definitions", "users"]), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "database/permission-denied");
        assert_eq!(err.message(), "Permission denied");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rest_backend_refuses_requests_after_close() {
        let backend = RestBackend::new("http://127.0.0.1:9/", None).unwrap();
        backend.close().await;
        let err = backend.get(&path(&["documents"])).await.unwrap_err();
        assert_eq!(err.code_str(), "database/unavailable");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = RestBackend::new("not a url", None).err().unwrap();
        assert_eq!(err.code_str(), "database/invalid-argument");
    }
}
