use crate::Result;

/// Lifecycle of the group key agreement for one peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    /// No group yet. The responder publishes its key package from here.
    Initial,
    /// The initiator created a group and waits for the responder's key package.
    GroupCreated,
    /// The responder processed a welcome.
    GroupJoined,
    /// Both peers share the group and application messages can be sealed.
    Secure,
}

/// Two-party group session used by the peer transport.
///
/// The initiator calls [`create_group`](GroupSession::create_group) and later
/// [`add_member`](GroupSession::add_member) with the responder's key package.
/// The responder calls [`key_package`](GroupSession::key_package) and then
/// [`join_group`](GroupSession::join_group) with the welcome it receives.
/// All byte strings are MLS wire encodings.
pub trait GroupSession: Send {
    fn state(&self) -> GroupState;

    fn create_group(&mut self) -> Result<()>;

    fn key_package(&mut self) -> Result<Vec<u8>>;

    /// Commit the peer into the group and return the welcome for it.
    fn add_member(&mut self, key_package: &[u8]) -> Result<Vec<u8>>;

    fn join_group(&mut self, welcome: &[u8]) -> Result<()>;

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    fn is_secure(&self) -> bool {
        self.state() == GroupState::Secure
    }
}
