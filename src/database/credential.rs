use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::database::error::{internal_error, invalid_argument, unavailable, DatabaseResult};
use crate::database::LOGGER;

const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DATABASE_SCOPES: &str = "https://www.googleapis.com/auth/firebase.database \
https://www.googleapis.com/auth/userinfo.email";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_TOLERANCE_SECS: i64 = 5 * 60;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// The JSON key file of a Google service account, as downloaded from the
/// Firebase console.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// How requests against the database are authorized.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Credential {
    ServiceAccount(ServiceAccountKey),
    DatabaseSecret {
        #[serde(rename = "databaseSecret")]
        database_secret: String,
    },
    AccessToken {
        #[serde(rename = "accessToken")]
        access_token: String,
    },
}

impl Credential {
    pub fn service_account_from_json(raw: &str) -> DatabaseResult<Self> {
        serde_json::from_str::<ServiceAccountKey>(raw)
            .map(Credential::ServiceAccount)
            .map_err(|err| invalid_argument(format!("Invalid service account key: {err}")))
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Credential::ServiceAccount(key) => key.project_id.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Credential::DatabaseSecret { .. } => f.write_str("DatabaseSecret(<redacted>)"),
            Credential::AccessToken { .. } => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

#[derive(Clone, Debug)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_TOLERANCE_SECS) < self.expires_at
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Turns a [`Credential`] into the query parameter that authorizes a REST call,
/// caching exchanged service-account tokens until shortly before they expire.
pub(crate) struct CredentialProvider {
    credential: Option<Credential>,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialProvider {
    pub(crate) fn new(credential: Option<Credential>, client: Client) -> Self {
        Self {
            credential,
            client,
            cached: Mutex::new(None),
        }
    }

    pub(crate) async fn query_param(&self) -> DatabaseResult<Option<(String, String)>> {
        match &self.credential {
            None => Ok(None),
            Some(Credential::DatabaseSecret { database_secret }) => {
                Ok(Some(("auth".to_string(), database_secret.clone())))
            }
            Some(Credential::AccessToken { access_token }) => {
                Ok(Some(("access_token".to_string(), access_token.clone())))
            }
            Some(Credential::ServiceAccount(key)) => {
                let token = self.service_account_token(key).await?;
                Ok(Some(("access_token".to_string(), token)))
            }
        }
    }

    pub(crate) async fn clear(&self) {
        self.cached.lock().await.take();
    }

    async fn service_account_token(&self, key: &ServiceAccountKey) -> DatabaseResult<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        LOGGER.debug(format!(
            "Exchanging service account assertion for {}",
            key.client_email
        ));
        let assertion = sign_assertion(key, now)?;
        let response = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|err| unavailable(format!("Token exchange failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            LOGGER.warn(format!("Token exchange rejected with status {status}"));
            return Err(internal_error(format!(
                "Token exchange failed with status {}: {body}",
                status.as_str()
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| internal_error(format!("Failed to decode token response: {err}")))?;
        let expires_in = payload.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        let token = CachedToken {
            access_token: payload.access_token,
            expires_at: now + chrono::Duration::seconds(expires_in),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

fn sign_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> DatabaseResult<String> {
    let issued_at = now.timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: DATABASE_SCOPES,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| invalid_argument(format!("Invalid service account private key: {err}")))?;
    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|err| internal_error(format!("Failed to sign token assertion: {err}")))
}
