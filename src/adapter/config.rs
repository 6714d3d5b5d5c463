use std::env;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::error::{AdapterError, AdapterResult};
use crate::database::Credential;

pub const DATABASE_URL_ENV: &str = "FIREBASE_DATABASE_URL";
pub const EMULATOR_HOST_ENV: &str = "FIREBASE_DATABASE_EMULATOR_HOST";
pub const PROJECT_ID_ENV: &str = "FIREBASE_PROJECT_ID";
pub const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const DATABASE_SECRET_ENV: &str = "FIREBASE_DATABASE_SECRET";

/// Settings for one named connection.
///
/// Without a `database_url` the connection is served by the in-memory backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ConnectionConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Default::default()
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn from_json(value: Value) -> AdapterResult<Self> {
        serde_json::from_value(value).map_err(|err| AdapterError::invalid_config(err.to_string()))
    }

    /// Builds a config from the process environment.
    ///
    /// `FIREBASE_DATABASE_EMULATOR_HOST` takes precedence over
    /// `FIREBASE_DATABASE_URL`; the emulator namespace is the project id.
    /// `GOOGLE_APPLICATION_CREDENTIALS` names a service-account key file and
    /// `FIREBASE_DATABASE_SECRET` a legacy database secret.
    pub fn from_env(identity: impl Into<String>) -> AdapterResult<Self> {
        Self::from_env_with(identity, |name| env::var(name).ok())
    }

    pub(crate) fn from_env_with<F>(identity: impl Into<String>, lookup: F) -> AdapterResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let credential = match (var(CREDENTIALS_FILE_ENV), var(DATABASE_SECRET_ENV)) {
            (Some(path), _) => {
                let raw = fs::read_to_string(&path).map_err(|err| {
                    AdapterError::invalid_config(format!(
                        "Failed to read {CREDENTIALS_FILE_ENV} '{path}': {err}"
                    ))
                })?;
                Some(Credential::service_account_from_json(&raw)?)
            }
            (None, Some(secret)) => Some(Credential::DatabaseSecret {
                database_secret: secret,
            }),
            (None, None) => None,
        };

        let project_id = var(PROJECT_ID_ENV).or_else(|| {
            credential
                .as_ref()
                .and_then(Credential::project_id)
                .map(str::to_owned)
        });

        let database_url = match var(EMULATOR_HOST_ENV) {
            Some(host) => {
                let namespace = project_id.as_deref().ok_or_else(|| {
                    AdapterError::invalid_config(format!(
                        "{EMULATOR_HOST_ENV} is set but no project id is available for the namespace"
                    ))
                })?;
                Some(format!("http://{host}/?ns={namespace}"))
            }
            None => var(DATABASE_URL_ENV),
        };

        Ok(Self {
            identity: Some(identity.into()),
            database_url,
            credential,
            project_id,
        })
    }

    pub(crate) fn normalized_identity(&self) -> AdapterResult<String> {
        self.identity
            .as_deref()
            .map(str::trim)
            .filter(|identity| !identity.is_empty())
            .map(str::to_owned)
            .ok_or(AdapterError::IdentityMissing)
    }

    pub(crate) fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
