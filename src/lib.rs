//! BitChat secure session core.
//!
//! Noise XX (`Noise_XX_25519_ChaChaPoly_SHA256`) sessions for peer-to-peer
//! chat: the handshake engine, the per-peer session state machine, a
//! manager that multiplexes handshakes and transport traffic across many
//! peers, and the `bitchat1:` framing used when payloads fall back to the
//! relay network.
//!
//! The transport and the relay client live outside this crate: inbound
//! bytes are fed to [`SessionManager::handle_incoming`], and bytes returned
//! from [`SessionManager::initiate`], `handle_incoming` or
//! [`SessionManager::encrypt`] are handed back to the transport for
//! delivery after every lock has been released.

pub mod crypto;
pub mod keychain;
pub mod peer;
pub mod relay;
pub mod session;

pub use crypto::noise::{NoiseError, NoiseRole};
pub use keychain::{Keychain, MemoryKeychain};
pub use peer::{fingerprint, PeerId};
pub use session::{Session, SessionManager, SessionStatus};
