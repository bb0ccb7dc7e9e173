//! Ephemeral per-connection identity.

use openmls::{credentials::CredentialWithKey, prelude::BasicCredential};
use openmls_basic_credential::SignatureKeyPair;
use openmls_traits::OpenMlsProvider;
use rand::RngCore;

use crate::openmls_provider::{MlsProvider, CIPHERSUITE};
use crate::IdentityError;

/// Length of the random basic-credential identity.
pub const IDENTITY_LEN: usize = 32;

/// Credential and signing keys for one side of a peer connection.
///
/// Peers are anonymous, so the credential content is random bytes rather
/// than a long-lived name. A fresh identity is created per connection.
pub struct Identity {
    pub(crate) credential_with_key: CredentialWithKey,
    pub(crate) signer: SignatureKeyPair,
}

impl Identity {
    pub fn random(provider: &MlsProvider) -> Result<Identity, IdentityError> {
        let mut raw = [0u8; IDENTITY_LEN];
        rand::thread_rng().fill_bytes(&mut raw);
        Identity::new(provider, &raw)
    }

    pub fn new(provider: &MlsProvider, identity: &[u8]) -> Result<Identity, IdentityError> {
        let credential = BasicCredential::new(identity.to_vec());
        let signer = SignatureKeyPair::new(CIPHERSUITE.signature_algorithm())?;
        signer.store(provider.storage())?;

        Ok(Identity {
            credential_with_key: CredentialWithKey {
                credential: credential.into(),
                signature_key: signer.to_public_vec().into(),
            },
            signer,
        })
    }

    /// Get the plain identity as byte slice.
    pub fn identity(&self) -> &[u8] {
        self.credential_with_key.credential.serialized_content()
    }

    pub fn signature_pub_key(&self) -> Vec<u8> {
        self.signer.to_public_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_identities_differ() {
        let provider = MlsProvider::default();
        let a = Identity::random(&provider).unwrap();
        let b = Identity::random(&provider).unwrap();

        assert_eq!(a.identity().len(), IDENTITY_LEN);
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.signature_pub_key(), b.signature_pub_key());
    }

    #[test]
    fn explicit_identity_is_kept() {
        let provider = MlsProvider::default();
        let id = Identity::new(&provider, b"alice").unwrap();
        assert_eq!(id.identity(), b"alice");
    }
}
