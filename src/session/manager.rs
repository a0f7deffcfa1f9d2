//! Multi-peer session management.
//!
//! Owns the peer-keyed session table and arbitrates concurrent handshakes.
//! Observers share a read lock on the table; mutations take it exclusively,
//! and each session is additionally serialized behind its own lock. The
//! `on_established` / `on_failed` sinks are injected at construction and are
//! invoked from a dedicated event thread, never while a lock is held.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::noise::{NoiseError, NoiseRole, HANDSHAKE_MSG1_SIZE};
use crate::keychain::Keychain;
use crate::peer::{fingerprint, PeerId};
use crate::session::session::{Session, SessionStatus};

/// Sink invoked after a session reaches `Established`.
pub type EstablishedCallback = Box<dyn Fn(PeerId, [u8; 32]) + Send + Sync>;

/// Sink invoked after a handshake fails and the session is evicted.
pub type FailedCallback = Box<dyn Fn(PeerId, NoiseError) + Send + Sync>;

enum SessionEvent {
    Established { peer: PeerId, remote_static: [u8; 32] },
    Failed { peer: PeerId, cause: NoiseError },
}

/// Session table plus handshake arbitration for many peers.
pub struct SessionManager {
    local_static: StaticSecret,
    sessions: RwLock<HashMap<PeerId, Arc<Mutex<Session>>>>,
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SessionManager {
    /// Build a manager around the keychain's identity key and the two event
    /// sinks. Events are delivered in establishment order from a dedicated
    /// thread so sinks may block without re-entering the manager.
    pub fn new(
        keychain: &dyn Keychain,
        on_established: EstablishedCallback,
        on_failed: FailedCallback,
    ) -> Self {
        let local_static = keychain.load_or_create_static();
        let (sender, receiver) = mpsc::channel::<SessionEvent>();
        let dispatcher = thread::Builder::new()
            .name("bitchat-session-events".into())
            .spawn(move || {
                for event in receiver {
                    match event {
                        SessionEvent::Established { peer, remote_static } => {
                            on_established(peer, remote_static)
                        }
                        SessionEvent::Failed { peer, cause } => on_failed(peer, cause),
                    }
                }
            })
            .expect("failed to spawn session event dispatcher");

        Self {
            local_static,
            sessions: RwLock::new(HashMap::new()),
            events: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Public half of the local identity key.
    pub fn local_static_public(&self) -> [u8; 32] {
        PublicKey::from(&self.local_static).to_bytes()
    }

    /// Start a handshake with `peer` and return message 1 for transmission.
    ///
    /// A live established session is left alone (`AlreadyEstablished`); a
    /// partial one is evicted and replaced.
    pub fn initiate(&self, peer: PeerId) -> Result<Vec<u8>, NoiseError> {
        let entry = {
            let mut table = self.sessions.write();
            if let Some(existing) = table.get(&peer) {
                if existing.lock().is_established() {
                    return Err(NoiseError::AlreadyEstablished(peer.to_string()));
                }
                debug!(%peer, "evicting partial session before initiate");
                if let Some(old) = table.remove(&peer) {
                    old.lock().reset();
                }
            }
            let entry = Arc::new(Mutex::new(Session::new(
                peer,
                NoiseRole::Initiator,
                self.local_static.clone(),
            )));
            table.insert(peer, entry.clone());
            entry
        };

        let mut session = entry.lock();
        match session.start_handshake() {
            Ok(msg1) => Ok(msg1),
            Err(error) => {
                drop(session);
                self.evict(peer);
                self.dispatch(SessionEvent::Failed {
                    peer,
                    cause: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Route an inbound handshake message to `peer`'s session, creating or
    /// replacing sessions per the arbitration rules:
    ///
    /// 1. an established session receiving a handshake message is torn down
    ///    and restarted as responder (the peer cleared its state);
    /// 2. a handshaking session receiving a 32-byte message (the size of XX
    ///    message 1) is torn down and restarted as responder, recovering
    ///    both-sides-initiator races and mid-handshake peer restarts;
    /// 3. anything else is delivered to the existing session.
    pub fn handle_incoming(
        &self,
        peer: PeerId,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        let entry = {
            let mut table = self.sessions.write();
            let restart = match table.get(&peer) {
                Some(existing) => {
                    let session = existing.lock();
                    if session.is_established() {
                        info!(%peer, "handshake message on established session, restarting as responder");
                        true
                    } else if session.status() == SessionStatus::Handshaking
                        && message.len() == HANDSHAKE_MSG1_SIZE
                    {
                        info!(%peer, "handshake restart detected, becoming responder");
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            if restart {
                if let Some(old) = table.remove(&peer) {
                    old.lock().reset();
                }
            }
            table
                .entry(peer)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Session::new(
                        peer,
                        NoiseRole::Responder,
                        self.local_static.clone(),
                    )))
                })
                .clone()
        };

        let mut session = entry.lock();
        match session.process_handshake(message) {
            Ok(response) => {
                let remote_static = session.remote_static().filter(|_| session.is_established());
                drop(session);
                if let Some(remote_static) = remote_static {
                    self.dispatch(SessionEvent::Established { peer, remote_static });
                }
                Ok(response)
            }
            Err(error) => {
                drop(session);
                self.evict(peer);
                self.dispatch(SessionEvent::Failed {
                    peer,
                    cause: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Encrypt application plaintext for `peer`.
    pub fn encrypt(&self, peer: PeerId, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let entry = self
            .get_session(peer)
            .ok_or_else(|| NoiseError::SessionNotFound(peer.to_string()))?;
        let mut session = entry.lock();
        session.encrypt(plaintext)
    }

    /// Decrypt transport ciphertext from `peer`.
    pub fn decrypt(&self, peer: PeerId, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let entry = self
            .get_session(peer)
            .ok_or_else(|| NoiseError::SessionNotFound(peer.to_string()))?;
        let mut session = entry.lock();
        session.decrypt(ciphertext)
    }

    /// Shared handle to `peer`'s session, if one exists.
    pub fn get_session(&self, peer: PeerId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(&peer).cloned()
    }

    pub fn is_established(&self, peer: PeerId) -> bool {
        self.get_session(peer)
            .map(|entry| entry.lock().is_established())
            .unwrap_or(false)
    }

    /// Remote static key for `peer`, once established.
    pub fn remote_static(&self, peer: PeerId) -> Option<[u8; 32]> {
        self.get_session(peer).and_then(|entry| entry.lock().remote_static())
    }

    /// Identity fingerprint of `peer`'s static key, once established.
    pub fn remote_fingerprint(&self, peer: PeerId) -> Option<String> {
        self.remote_static(peer).map(|key| fingerprint(&key))
    }

    /// Peers with a session in any state.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Reset and evict `peer`'s session. Returns whether one existed.
    pub fn remove(&self, peer: PeerId) -> bool {
        let removed = self.sessions.write().remove(&peer);
        match removed {
            Some(entry) => {
                entry.lock().reset();
                true
            }
            None => false,
        }
    }

    /// Reset and evict every session. Backs the transport layer's emergency
    /// disconnect; no per-session callbacks fire.
    pub fn remove_all(&self) {
        let drained: Vec<_> = {
            let mut table = self.sessions.write();
            table.drain().collect()
        };
        for (_, entry) in &drained {
            entry.lock().reset();
        }
        info!(count = drained.len(), "removed all sessions");
    }

    /// Peers whose established session crossed a rekey threshold.
    pub fn sessions_needing_rekey(&self) -> Vec<PeerId> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, entry)| entry.lock().needs_rekey())
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// Rekey `peer` by tearing the session down and starting a fresh
    /// handshake. Returns the new message 1.
    pub fn initiate_rekey(&self, peer: PeerId) -> Result<Vec<u8>, NoiseError> {
        info!(%peer, "rekeying session");
        self.remove(peer);
        self.initiate(peer)
    }

    fn evict(&self, peer: PeerId) {
        if let Some(old) = self.sessions.write().remove(&peer) {
            old.lock().reset();
        }
    }

    fn dispatch(&self, event: SessionEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            let _ = sender.send(event);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Close the channel first so the dispatcher drains and exits.
        self.events.lock().take();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }
}
