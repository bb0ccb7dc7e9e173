//! Two-party MLS group sessions for peer data channels.
//!
//! ```ignore
//! use mls_crypto::{GroupSession, MlsSession};
//!
//! let mut initiator = MlsSession::new()?;
//! let mut responder = MlsSession::new()?;
//!
//! initiator.create_group()?;
//! let welcome = initiator.add_member(&responder.key_package()?)?;
//! responder.join_group(&welcome)?;
//!
//! let sealed = initiator.encrypt(b"hi")?;
//! assert_eq!(responder.decrypt(&sealed)?, b"hi");
//! ```

mod api;
mod error;
pub mod identity;
pub mod openmls_provider;
mod service;

pub use api::{GroupSession, GroupState};
pub use error::{IdentityError, MlsError, MlsServiceError, Result};
pub use openmls_provider::{MlsProvider, CIPHERSUITE};
pub use service::{MlsSession, GROUP_ID_LEN};
