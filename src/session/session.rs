//! Per-peer session state machine.
//!
//! A session moves `Uninit -> Handshaking -> Established`; any cryptographic
//! error during the handshake lands in `Failed`, and `reset` returns every
//! state to `Uninit`. The session exclusively owns its handshake state while
//! handshaking and its two cipher states once established.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use x25519_dalek::StaticSecret;

use crate::crypto::cipher::CipherState;
use crate::crypto::noise::{HandshakeState, NoiseError, NoiseRole, MAX_MESSAGE_SIZE};
use crate::crypto::primitives::TAG_SIZE;
use crate::peer::PeerId;

/// Messages sent under one set of keys before a rekey is due.
pub const REKEY_AFTER_MESSAGES: u64 = 1 << 20;
/// Plaintext bytes sent under one set of keys before a rekey is due.
pub const REKEY_AFTER_BYTES: u64 = 1 << 32;
/// Wall-clock key age before a rekey is due.
pub const REKEY_AFTER_AGE: Duration = Duration::from_secs(60 * 60);

/// Observable session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninit,
    Handshaking,
    Established,
    Failed,
}

struct EstablishedState {
    send: CipherState,
    recv: CipherState,
    remote_static: [u8; 32],
    handshake_hash: [u8; 32],
    established_at: Instant,
    bytes_sent: u64,
    messages_sent: u64,
}

enum SessionState {
    Uninit,
    Handshaking(HandshakeState),
    Established(EstablishedState),
    Failed(NoiseError),
}

/// A secure session with a single peer.
pub struct Session {
    peer: PeerId,
    role: NoiseRole,
    state: SessionState,
    local_static: StaticSecret,
    created_at: Instant,
    self_dial: bool,
}

impl Session {
    pub fn new(peer: PeerId, role: NoiseRole, local_static: StaticSecret) -> Self {
        Self {
            peer,
            role,
            state: SessionState::Uninit,
            local_static,
            created_at: Instant::now(),
            self_dial: false,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn role(&self) -> NoiseRole {
        self.role
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            SessionState::Uninit => SessionStatus::Uninit,
            SessionState::Handshaking(_) => SessionStatus::Handshaking,
            SessionState::Established(_) => SessionStatus::Established,
            SessionState::Failed(_) => SessionStatus::Failed,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, SessionState::Established(_))
    }

    /// Begin the handshake. The initiator returns message 1; the responder
    /// returns an empty byte string that must not be transmitted.
    pub fn start_handshake(&mut self) -> Result<Vec<u8>, NoiseError> {
        if !matches!(self.state, SessionState::Uninit) {
            return Err(NoiseError::InvalidState);
        }
        match self.role {
            NoiseRole::Initiator => {
                let mut handshake =
                    HandshakeState::new(NoiseRole::Initiator, self.local_static.clone());
                match handshake.write_message() {
                    Ok(msg1) => {
                        debug!(peer = %self.peer, "initiating noise handshake");
                        self.state = SessionState::Handshaking(handshake);
                        Ok(msg1)
                    }
                    Err(cause) => Err(self.fail(cause)),
                }
            }
            NoiseRole::Responder => {
                self.state = SessionState::Handshaking(HandshakeState::new(
                    NoiseRole::Responder,
                    self.local_static.clone(),
                ));
                Ok(Vec::new())
            }
        }
    }

    /// Consume an inbound handshake message and produce the response, if the
    /// pattern calls for one. Transitions to `Established` exactly when the
    /// final pattern message has been processed.
    pub fn process_handshake(&mut self, message: &[u8]) -> Result<Option<Vec<u8>>, NoiseError> {
        if matches!(self.state, SessionState::Uninit) {
            // Implicit creation on first inbound message, responder only.
            if self.role != NoiseRole::Responder {
                return Err(NoiseError::InvalidState);
            }
            self.start_handshake()?;
        }

        let step: Result<Option<Vec<u8>>, NoiseError> = match &mut self.state {
            SessionState::Handshaking(handshake) => {
                handshake.read_message(message).and_then(|()| {
                    if !handshake.is_complete() && handshake.is_my_turn() {
                        handshake.write_message().map(Some)
                    } else {
                        Ok(None)
                    }
                })
            }
            _ => return Err(NoiseError::InvalidState),
        };

        match step {
            Err(cause) => Err(self.fail(cause)),
            Ok(response) => {
                let complete = matches!(
                    &self.state,
                    SessionState::Handshaking(handshake) if handshake.is_complete()
                );
                if complete {
                    self.finish_handshake()?;
                }
                Ok(response)
            }
        }
    }

    /// Encrypt application plaintext with empty associated data.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if plaintext.len() > MAX_MESSAGE_SIZE - TAG_SIZE {
            return Err(NoiseError::MessageTooLarge(plaintext.len()));
        }
        let SessionState::Established(established) = &mut self.state else {
            return Err(NoiseError::NotEstablished);
        };
        let ciphertext = established.send.encrypt_with_ad(&[], plaintext)?;
        established.messages_sent += 1;
        established.bytes_sent += plaintext.len() as u64;
        Ok(ciphertext)
    }

    /// Decrypt an inbound transport ciphertext. A failed tag check leaves
    /// the receive counter untouched.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if ciphertext.len() > MAX_MESSAGE_SIZE {
            return Err(NoiseError::MessageTooLarge(ciphertext.len()));
        }
        let SessionState::Established(established) = &mut self.state else {
            return Err(NoiseError::NotEstablished);
        };
        established.recv.decrypt_with_ad(&[], ciphertext)
    }

    /// Drop all key material and return to `Uninit`. Logs the expiry when an
    /// established session is torn down.
    pub fn reset(&mut self) {
        let was_established = self.is_established();
        self.state = SessionState::Uninit;
        self.self_dial = false;
        if was_established {
            info!(peer = %self.peer, "session expired");
        } else {
            debug!(peer = %self.peer, "session reset");
        }
    }

    /// True once any rekey threshold has been crossed since establishment.
    pub fn needs_rekey(&self) -> bool {
        match &self.state {
            SessionState::Established(established) => {
                established.messages_sent >= REKEY_AFTER_MESSAGES
                    || established.bytes_sent >= REKEY_AFTER_BYTES
                    || established.established_at.elapsed() >= REKEY_AFTER_AGE
            }
            _ => false,
        }
    }

    /// Remote long-term key, available once established.
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        match &self.state {
            SessionState::Established(established) => Some(established.remote_static),
            _ => None,
        }
    }

    /// Channel-binding handshake hash, available once established.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        match &self.state {
            SessionState::Established(established) => Some(established.handshake_hash),
            _ => None,
        }
    }

    /// Cause of the most recent handshake failure, if any.
    pub fn failure_cause(&self) -> Option<&NoiseError> {
        match &self.state {
            SessionState::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// True when the peer authenticated with our own static key.
    pub fn is_self_dial(&self) -> bool {
        self.self_dial
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Send-direction counter, for diagnostics.
    pub fn send_nonce(&self) -> Option<u64> {
        match &self.state {
            SessionState::Established(established) => Some(established.send.nonce()),
            _ => None,
        }
    }

    /// Receive-direction counter, for diagnostics.
    pub fn recv_nonce(&self) -> Option<u64> {
        match &self.state {
            SessionState::Established(established) => Some(established.recv.nonce()),
            _ => None,
        }
    }

    fn finish_handshake(&mut self) -> Result<(), NoiseError> {
        match std::mem::replace(&mut self.state, SessionState::Uninit) {
            SessionState::Handshaking(mut handshake) if handshake.is_complete() => {
                let (send, recv) = handshake.split()?;
                let remote_static = handshake.remote_static().ok_or(NoiseError::InvalidState)?;
                let handshake_hash = handshake.handshake_hash().ok_or(NoiseError::InvalidState)?;
                self.self_dial = handshake.is_self_dial();
                if self.self_dial {
                    warn!(peer = %self.peer, "peer presented our own static key");
                }
                self.state = SessionState::Established(EstablishedState {
                    send,
                    recv,
                    remote_static,
                    handshake_hash,
                    established_at: Instant::now(),
                    bytes_sent: 0,
                    messages_sent: 0,
                });
                info!(peer = %self.peer, role = %self.role, "noise session established");
                Ok(())
            }
            other => {
                self.state = other;
                Err(NoiseError::InvalidState)
            }
        }
    }

    fn fail(&mut self, cause: NoiseError) -> NoiseError {
        warn!(peer = %self.peer, error = %cause, "handshake failed");
        self.state = SessionState::Failed(cause.clone());
        NoiseError::HandshakeFailed(Box::new(cause))
    }

    #[cfg(test)]
    pub(crate) fn force_send_nonce(&mut self, nonce: u64) {
        if let SessionState::Established(established) = &mut self.state {
            established.send.set_nonce(nonce);
        }
    }

    #[cfg(test)]
    pub(crate) fn force_traffic(&mut self, messages: u64, bytes: u64) {
        if let SessionState::Established(established) = &mut self.state {
            established.messages_sent = messages;
            established.bytes_sent = bytes;
        }
    }
}
