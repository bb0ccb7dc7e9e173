//! Error types for two-party MLS sessions.

use openmls::{
    error::LibraryError,
    prelude::{KeyPackageNewError, KeyPackageVerifyError},
};
use openmls_rust_crypto::MemoryStorageError;
use openmls_traits::types::CryptoError;

use crate::api::GroupState;

/// Result type alias for MLS operations.
pub type Result<T> = std::result::Result<T, MlsError>;

/// Identity-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Failed to create new key package: {0}")]
    UnableToCreateKeyPackage(#[from] KeyPackageNewError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error("Unable to create new signer: {0}")]
    UnableToCreateSigner(#[from] CryptoError),

    #[error("Unable to save signature key: {0}")]
    UnableToSaveSignatureKey(#[from] MemoryStorageError),
}

/// Group session operation errors.
///
/// Several openmls error types carry a storage type parameter that has
/// changed between releases, so their messages are captured as text.
#[derive(Debug, thiserror::Error)]
pub enum MlsServiceError {
    #[error("Invalid MLS wire encoding: {0}")]
    Codec(#[from] openmls::prelude::Error),

    #[error("Failed to convert to protocol message: {0}")]
    ProtocolMessage(#[from] openmls::framing::errors::ProtocolMessageError),

    #[error("Failed to serialize MLS message: {0}")]
    MlsMessage(#[from] openmls::framing::errors::MlsMessageError),

    #[error("Invalid key package: {0}")]
    InvalidKeyPackage(#[from] KeyPackageVerifyError),

    #[error("Failed to create MLS group: {0}")]
    NewGroup(String),

    #[error("Failed to add member: {0}")]
    AddMember(String),

    #[error("Failed to merge pending commit: {0}")]
    MergePendingCommit(String),

    #[error("Failed to join MLS group: {0}")]
    Welcome(String),

    #[error("Failed to create MLS message: {0}")]
    CreateMessage(String),

    #[error("Failed to process MLS message: {0}")]
    ProcessMessage(String),

    #[error("Unexpected MLS message type")]
    UnexpectedMessageType,

    #[error("Message belongs to another group")]
    ForeignGroup,

    #[error("Operation not allowed in group state {0:?}")]
    InvalidState(GroupState),
}

/// Unified MLS error type.
#[derive(Debug, thiserror::Error)]
pub enum MlsError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Service(#[from] MlsServiceError),
}

impl From<KeyPackageNewError> for MlsError {
    fn from(e: KeyPackageNewError) -> Self {
        MlsError::Identity(IdentityError::UnableToCreateKeyPackage(e))
    }
}

impl From<CryptoError> for MlsError {
    fn from(e: CryptoError) -> Self {
        MlsError::Identity(IdentityError::UnableToCreateSigner(e))
    }
}

impl From<MemoryStorageError> for MlsError {
    fn from(e: MemoryStorageError) -> Self {
        MlsError::Identity(IdentityError::UnableToSaveSignatureKey(e))
    }
}

impl From<openmls::prelude::Error> for MlsError {
    fn from(e: openmls::prelude::Error) -> Self {
        MlsError::Service(MlsServiceError::Codec(e))
    }
}

impl From<openmls::framing::errors::ProtocolMessageError> for MlsError {
    fn from(e: openmls::framing::errors::ProtocolMessageError) -> Self {
        MlsError::Service(MlsServiceError::ProtocolMessage(e))
    }
}

impl From<openmls::framing::errors::MlsMessageError> for MlsError {
    fn from(e: openmls::framing::errors::MlsMessageError) -> Self {
        MlsError::Service(MlsServiceError::MlsMessage(e))
    }
}

impl From<KeyPackageVerifyError> for MlsError {
    fn from(e: KeyPackageVerifyError) -> Self {
        MlsError::Service(MlsServiceError::InvalidKeyPackage(e))
    }
}
