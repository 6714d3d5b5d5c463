use crate::database::error::{invalid_argument, DatabaseResult};

/// Root of the persisted model schemas, one child per collection.
pub const DEFINITIONS_ROOT: &str = "definitions";
/// Root of the persisted documents, `documents/<collection>/<recordId>`.
pub const DOCUMENTS_ROOT: &str = "documents";

const MAX_KEY_BYTES: usize = 768;
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Rejects keys the Realtime Database refuses to store.
pub fn validate_key(key: &str) -> DatabaseResult<()> {
    if key.is_empty() {
        return Err(invalid_argument("Database keys cannot be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(invalid_argument(format!(
            "Database key '{}…' exceeds {MAX_KEY_BYTES} bytes",
            key.chars().take(16).collect::<String>()
        )));
    }
    if let Some(ch) = key
        .chars()
        .find(|ch| FORBIDDEN_KEY_CHARS.contains(ch) || ch.is_control())
    {
        return Err(invalid_argument(format!(
            "Database key '{key}' contains the forbidden character {ch:?}"
        )));
    }
    Ok(())
}

pub fn definition_path(collection: &str) -> DatabaseResult<Vec<String>> {
    validate_key(collection)?;
    Ok(vec![DEFINITIONS_ROOT.to_string(), collection.to_string()])
}

pub fn collection_path(collection: &str) -> DatabaseResult<Vec<String>> {
    validate_key(collection)?;
    Ok(vec![DOCUMENTS_ROOT.to_string(), collection.to_string()])
}

pub fn document_path(collection: &str, id: &str) -> DatabaseResult<Vec<String>> {
    let mut path = collection_path(collection)?;
    validate_key(id)?;
    path.push(id.to_string());
    Ok(path)
}
