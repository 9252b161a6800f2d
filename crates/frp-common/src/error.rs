//! Error types for the FRP operator
//!
//! Errors carry the identity of the object they concern so that a failed
//! render or store round-trip can be traced back to a single resource.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for FRP operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// The remote object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` (or bare name for cluster-scoped kinds)
        name: String,
    },

    /// The remote object already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Kind of the conflicting object
        kind: String,
        /// `namespace/name` (or bare name for cluster-scoped kinds)
        name: String,
    },

    /// Malformed selector, spec or schema input
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Object (or schema) the error concerns
        object: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.remote")
        field: Option<String>,
    },

    /// A renderer needed a credential that does not exist
    #[error("missing secret {namespace}/{name}: {message}")]
    MissingSecret {
        /// Namespace of the referenced secret
        namespace: String,
        /// Name of the referenced secret
        name: String,
        /// What was missing (the whole secret or a key)
        message: String,
    },

    /// Transport-level failure talking to the remote store
    #[error("remote store unavailable: {message}")]
    RemoteUnavailable {
        /// Description of the transport failure
        message: String,
    },

    /// Kubernetes API rejected the request
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given kind and object name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given kind and object name
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            object: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context and field path
    pub fn validation_for_field(
        object: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a missing-secret error
    pub fn missing_secret(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::MissingSecret {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a remote-unavailable error
    pub fn remote_unavailable(msg: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Classify a kube-rs error raised while operating on `kind` `name`.
    ///
    /// 404 becomes [`Error::NotFound`], 409 `AlreadyExists` becomes
    /// [`Error::AlreadyExists`], transport failures become
    /// [`Error::RemoteUnavailable`]; other API rejections stay [`Error::Kube`].
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ref ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ref ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::already_exists(kind, name)
            }
            kube::Error::Api(_) => Self::Kube { source: err },
            other => Self::remote_unavailable(other.to_string()),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and missing-secret errors need a spec (or
    /// secret) change. Transport failures and conflicts may clear up.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::Validation { .. } => false,
            Error::MissingSecret { .. } => false,
            Error::RemoteUnavailable { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// True for [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for [`Error::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
