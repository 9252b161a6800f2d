//! Secrets in their two representations
//!
//! [`EncodedSecret`] is the wire form: every value base64 encoded, the only
//! form that is ever persisted. [`DecodedSecret`] holds plaintext in a typed
//! payload and can only be written back after [`DecodedSecret::encode`].
//! Both conversions copy; the receiver is left untouched.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::object::{NoStatus, Object, ObjectMeta, ObjectSpec, OwnerScope};
use crate::store::{ApiType, ObjectStore};
use crate::{Error, Result};

/// Core v1 Secret
pub const SECRET_API: ApiType = ApiType {
    group: "",
    version: "v1",
    kind: "Secret",
    plural: "secrets",
    namespaced: true,
};

/// Secret `data` as stored remotely: key to base64 value
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct EncodedData(pub BTreeMap<String, String>);

impl ObjectSpec for EncodedData {
    type Status = NoStatus;
    const API: ApiType = SECRET_API;
    const SPEC_FIELD: &'static str = "data";
}

/// A Secret in wire form
pub type EncodedSecret = Object<EncodedData>;

/// Typed plaintext content of a secret
pub trait SecretPayload: Sized + Clone {
    /// Plaintext entries to store
    fn to_entries(&self) -> BTreeMap<String, String>;

    /// Build from plaintext entries; `Err` names the first missing key
    fn from_entries(entries: BTreeMap<String, String>) -> std::result::Result<Self, String>;
}

impl SecretPayload for BTreeMap<String, String> {
    fn to_entries(&self) -> BTreeMap<String, String> {
        self.clone()
    }

    fn from_entries(entries: BTreeMap<String, String>) -> std::result::Result<Self, String> {
        Ok(entries)
    }
}

fn take(entries: &mut BTreeMap<String, String>, key: &str) -> std::result::Result<String, String> {
    entries.remove(key).ok_or_else(|| key.to_string())
}

/// Shared token secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenData {
    /// The token
    pub token: String,
}

impl TokenData {
    /// A fresh random URL-safe token (32 bytes of entropy)
    pub fn generate() -> Self {
        let raw: [u8; 32] = rand::thread_rng().gen();
        Self {
            token: URL_SAFE_NO_PAD.encode(raw),
        }
    }
}

impl SecretPayload for TokenData {
    fn to_entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("token".to_string(), self.token.clone())])
    }

    fn from_entries(mut entries: BTreeMap<String, String>) -> std::result::Result<Self, String> {
        Ok(Self {
            token: take(&mut entries, "token")?,
        })
    }
}

/// Username and password pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuthData {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl SecretPayload for BasicAuthData {
    fn to_entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("username".to_string(), self.username.clone()),
            ("password".to_string(), self.password.clone()),
        ])
    }

    fn from_entries(mut entries: BTreeMap<String, String>) -> std::result::Result<Self, String> {
        Ok(Self {
            username: take(&mut entries, "username")?,
            password: take(&mut entries, "password")?,
        })
    }
}

/// A Secret in plaintext form. Never persisted directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedSecret<D: SecretPayload> {
    /// Metadata
    pub metadata: ObjectMeta,
    /// Plaintext payload
    pub data: D,
}

impl<D: SecretPayload> DecodedSecret<D> {
    /// Construct locally, owned by the active owner in `owners` if any
    pub fn new(mut metadata: ObjectMeta, data: D, owners: Option<&OwnerScope>) -> Self {
        if metadata.owner_references.is_empty() {
            if let Some(scope) = owners {
                metadata.owner_references = scope.default_owner_references();
            }
        }
        Self { metadata, data }
    }

    /// Wire form of this secret
    pub fn encode(&self) -> EncodedSecret {
        let data = self
            .data
            .to_entries()
            .into_iter()
            .map(|(k, v)| (k, STANDARD.encode(v)))
            .collect();
        Object {
            metadata: self.metadata.clone(),
            spec: EncodedData(data),
            status: None,
        }
    }
}

impl EncodedSecret {
    /// Plaintext form of this secret.
    ///
    /// A missing key is reported as [`Error::MissingSecret`]; a value that is
    /// not base64-encoded UTF-8 as [`Error::Serialization`].
    pub fn decode<D: SecretPayload>(&self) -> Result<DecodedSecret<D>> {
        let mut entries = BTreeMap::new();
        for (key, value) in &self.spec.0 {
            let plain = STANDARD
                .decode(value)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| {
                    Error::serialization_for_kind(
                        SECRET_API.kind,
                        format!(
                            "{}: key {key} is not base64-encoded UTF-8",
                            self.key().qualified_name()
                        ),
                    )
                })?;
            entries.insert(key.clone(), plain);
        }
        let data = D::from_entries(entries).map_err(|missing| {
            Error::missing_secret(
                self.namespace().unwrap_or_default(),
                self.name(),
                format!("key {missing} not found"),
            )
        })?;
        Ok(DecodedSecret {
            metadata: self.metadata.clone(),
            data,
        })
    }
}

/// Fetch secret `name` from `namespace` and decode it.
///
/// Absence is [`Error::MissingSecret`], never an empty credential.
pub async fn fetch<D: SecretPayload>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<DecodedSecret<D>> {
    EncodedSecret::find(store, Some(namespace), name)
        .await?
        .ok_or_else(|| Error::missing_secret(namespace, name, "secret not found"))?
        .decode()
}
