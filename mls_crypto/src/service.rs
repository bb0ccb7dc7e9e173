//! openmls-backed [`GroupSession`].

use openmls::group::{GroupId, MlsGroup, MlsGroupCreateConfig, MlsGroupJoinConfig};
use openmls::prelude::{
    tls_codec::{Deserialize as _, Serialize as _},
    DeserializeBytes, KeyPackage, KeyPackageIn, MlsMessageBodyIn, MlsMessageIn,
    ProcessedMessageContent, ProtocolMessage, ProtocolVersion, StagedWelcome,
};
use openmls_traits::OpenMlsProvider;
use rand::RngCore;
use tracing::debug;

use crate::{
    api::{GroupSession, GroupState},
    error::{MlsError, MlsServiceError, Result},
    identity::Identity,
    openmls_provider::{MlsProvider, CIPHERSUITE},
};

/// Length of the random group id chosen by the initiator.
pub const GROUP_ID_LEN: usize = 24;

/// One side of a two-party MLS group.
///
/// Owns its provider, identity and (once created or joined) the group.
/// Nothing is persisted: the session lives exactly as long as the peer
/// connection it protects.
pub struct MlsSession {
    provider: MlsProvider,
    identity: Identity,
    group: Option<MlsGroup>,
    state: GroupState,
}

impl MlsSession {
    pub fn new() -> Result<Self> {
        let provider = MlsProvider::default();
        let identity = Identity::random(&provider)?;
        Ok(Self {
            provider,
            identity,
            group: None,
            state: GroupState::Initial,
        })
    }

    pub fn identity(&self) -> &[u8] {
        self.identity.identity()
    }

    /// Number of members in the group, 0 before one exists.
    pub fn member_count(&self) -> usize {
        self.group
            .as_ref()
            .map(|group| group.members().count())
            .unwrap_or(0)
    }

    fn expect_state(&self, expected: GroupState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MlsServiceError::InvalidState(self.state).into())
        }
    }
}

impl GroupSession for MlsSession {
    fn state(&self) -> GroupState {
        self.state
    }

    fn create_group(&mut self) -> Result<()> {
        self.expect_state(GroupState::Initial)?;

        let mut group_id = [0u8; GROUP_ID_LEN];
        rand::thread_rng().fill_bytes(&mut group_id);

        let config = MlsGroupCreateConfig::builder()
            .use_ratchet_tree_extension(true)
            .build();

        let group = MlsGroup::new_with_group_id(
            &self.provider,
            &self.identity.signer,
            &config,
            GroupId::from_slice(&group_id),
            self.identity.credential_with_key.clone(),
        )
        .map_err(|e| MlsServiceError::NewGroup(e.to_string()))?;

        self.group = Some(group);
        self.state = GroupState::GroupCreated;
        debug!("created group");
        Ok(())
    }

    fn key_package(&mut self) -> Result<Vec<u8>> {
        self.expect_state(GroupState::Initial)?;

        let bundle = KeyPackage::builder().build(
            CIPHERSUITE,
            &self.provider,
            &self.identity.signer,
            self.identity.credential_with_key.clone(),
        )?;
        Ok(bundle.key_package().tls_serialize_detached()?)
    }

    fn add_member(&mut self, key_package: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(GroupState::GroupCreated)?;

        let mut input = key_package;
        let key_package = KeyPackageIn::tls_deserialize(&mut input)?
            .validate(self.provider.crypto(), ProtocolVersion::Mls10)?;

        let Self {
            provider,
            identity,
            group,
            state,
        } = self;
        let group = group
            .as_mut()
            .ok_or(MlsError::Service(MlsServiceError::InvalidState(*state)))?;

        let (_commit, welcome, _group_info) = group
            .add_members(&*provider, &identity.signer, &[key_package])
            .map_err(|e| MlsServiceError::AddMember(e.to_string()))?;
        group
            .merge_pending_commit(&*provider)
            .map_err(|e| MlsServiceError::MergePendingCommit(e.to_string()))?;

        *state = GroupState::Secure;
        debug!(members = group.members().count(), "added peer to group");
        Ok(welcome.to_bytes()?)
    }

    fn join_group(&mut self, welcome: &[u8]) -> Result<()> {
        self.expect_state(GroupState::Initial)?;

        let (mls_message, _) = MlsMessageIn::tls_deserialize_bytes(welcome)?;
        let welcome = match mls_message.extract() {
            MlsMessageBodyIn::Welcome(w) => w,
            _ => return Err(MlsError::Service(MlsServiceError::UnexpectedMessageType)),
        };

        let config = MlsGroupJoinConfig::builder().build();
        let group = StagedWelcome::new_from_welcome(&self.provider, &config, welcome, None)
            .map_err(|e| MlsServiceError::Welcome(e.to_string()))?
            .into_group(&self.provider)
            .map_err(|e| MlsServiceError::Welcome(e.to_string()))?;

        self.group = Some(group);
        self.state = GroupState::GroupJoined;
        debug!(members = self.member_count(), "joined group");

        if self.member_count() >= 2 {
            self.state = GroupState::Secure;
        }
        Ok(())
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(GroupState::Secure)?;

        let Self {
            provider,
            identity,
            group,
            state,
        } = self;
        let group = group
            .as_mut()
            .ok_or(MlsError::Service(MlsServiceError::InvalidState(*state)))?;

        let message = group
            .create_message(&*provider, &identity.signer, plaintext)
            .map_err(|e| MlsServiceError::CreateMessage(e.to_string()))?;
        Ok(message.to_bytes()?)
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.expect_state(GroupState::Secure)?;

        let (mls_message, _) = MlsMessageIn::tls_deserialize_bytes(ciphertext)?;
        let protocol_message: ProtocolMessage = mls_message.try_into_protocol_message()?;

        let provider = &self.provider;
        let group = self
            .group
            .as_mut()
            .ok_or(MlsError::Service(MlsServiceError::InvalidState(GroupState::Secure)))?;

        if protocol_message.group_id().as_slice() != group.group_id().as_slice() {
            return Err(MlsError::Service(MlsServiceError::ForeignGroup));
        }

        let processed = group
            .process_message(provider, protocol_message)
            .map_err(|e| MlsServiceError::ProcessMessage(e.to_string()))?;

        match processed.into_content() {
            ProcessedMessageContent::ApplicationMessage(app) => Ok(app.into_bytes()),
            _ => Err(MlsError::Service(MlsServiceError::UnexpectedMessageType)),
        }
    }
}
