//! Front end wire types
//!
//! The API is JSON over HTTP. `GET /ping` and `GET /list` take no body; every
//! other route is a `POST` whose JSON body names the service. Every reply is
//! a [`Response`] whose `status` mirrors the HTTP status code.

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::pwgen::PasswordPolicy;

/// Body of `POST /get`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBody {
    pub service: String,
    /// Unlocks the secret key without a pinentry prompt. Empty means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_password: Option<String>,
}

/// Body of `POST /insert` and `POST /update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretBody {
    pub service: String,
    pub secret: String,
}

/// Body of `POST /delete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBody {
    pub service: String,
}

/// Body of `POST /generate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateBody {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PasswordPolicy>,
}

/// An operation against the store, decoded from a route and its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    List,
    Get {
        service: String,
        passphrase: Option<String>,
    },
    Insert {
        service: String,
        secret: String,
    },
    Update {
        service: String,
        secret: String,
    },
    Delete {
        service: String,
    },
    Generate {
        service: String,
        policy: Option<PasswordPolicy>,
    },
}

impl Request {
    /// Route name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::List => "list",
            Self::Get { .. } => "get",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Generate { .. } => "generate",
        }
    }
}

impl From<GetBody> for Request {
    fn from(body: GetBody) -> Self {
        Self::Get {
            service: body.service,
            passphrase: body.gpg_password.filter(|p| !p.is_empty()),
        }
    }
}

impl From<GenerateBody> for Request {
    fn from(body: GenerateBody) -> Self {
        Self::Generate {
            service: body.service,
            policy: body.policy,
        }
    }
}

/// Outcome of a request. Every store error maps to its own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    NotFound,
    AlreadyExists,
    InvalidPath,
    NotInitialized,
    DecryptionFailed,
    EncryptionFailed,
    BadRequest,
    InternalError,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Self::Ok,
        Self::NotFound,
        Self::AlreadyExists,
        Self::InvalidPath,
        Self::NotInitialized,
        Self::DecryptionFailed,
        Self::EncryptionFailed,
        Self::BadRequest,
        Self::InternalError,
    ];

    /// HTTP status code carrying this outcome; no two statuses share one
    pub fn http_code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::DecryptionFailed => 403,
            Self::NotFound => 404,
            Self::AlreadyExists => 409,
            Self::InvalidPath => 422,
            Self::InternalError => 500,
            Self::EncryptionFailed => 502,
            Self::NotInitialized => 503,
        }
    }
}

impl From<&VaultError> for Status {
    fn from(err: &VaultError) -> Self {
        match err {
            VaultError::NotFound(_) => Self::NotFound,
            VaultError::AlreadyExists(_) => Self::AlreadyExists,
            VaultError::InvalidPath { .. } => Self::InvalidPath,
            VaultError::NotInitialized(_) => Self::NotInitialized,
            VaultError::DecryptionFailed { .. } => Self::DecryptionFailed,
            VaultError::EncryptionFailed { .. } => Self::EncryptionFailed,
            VaultError::Io { .. } => Self::InternalError,
        }
    }
}

/// Server reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
            services: None,
            password: None,
        }
    }

    pub fn pong() -> Self {
        Self {
            message: Some("pong".to_string()),
            ..Self::ok()
        }
    }

    pub fn with_services(services: Vec<String>) -> Self {
        Self {
            services: Some(services),
            ..Self::ok()
        }
    }

    pub fn with_password(password: String) -> Self {
        Self {
            password: Some(password),
            ..Self::ok()
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            ..Self::ok()
        }
    }
}

impl From<VaultError> for Response {
    fn from(err: VaultError) -> Self {
        Self::error(Status::from(&err), err.to_string())
    }
}
