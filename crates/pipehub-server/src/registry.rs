//! Session registry for connection and pipeline identity tracking.
//!
//! The registry maintains bidirectional mappings: session → identity (for
//! outbound delivery) and identity → session (so at most one live session
//! holds a given pipeline identifier). Both directions are O(1).
//!
//! Only the dispatch loop mutates the registry. The listening socket has no
//! entry; it is addressed through the [`Handle::Listener`] sentinel.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    net::SocketAddr,
};

/// Connection handle assigned by the dispatch loop.
///
/// Allocated from a monotonic counter and never reused while the relay runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw handle value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline identifier declared by a client in its `graph` message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Anything the dispatch loop checks for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Handle {
    /// The listening socket (sentinel, has no session)
    Listener,
    /// A live session socket
    Session(SessionId),
}

/// Information about a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Remote address of the connection
    pub peer: SocketAddr,
    client_id: Option<ClientId>,
}

impl Session {
    /// Create a new unidentified session.
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer, client_id: None }
    }

    /// Pipeline identifier, `None` until the client registers.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Whether the client has registered an identifier.
    pub fn is_identified(&self) -> bool {
        self.client_id.is_some()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client_id {
            Some(id) => write!(f, "{} ({id})", self.peer),
            None => write!(f, "{} (unidentified)", self.peer),
        }
    }
}

/// Outcome of assigning an identifier to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Identifier the session held before, if any
    pub previous: Option<ClientId>,
    /// Other session that held the identifier and lost it
    pub displaced: Option<SessionId>,
}

/// Registry for tracking live sessions and their pipeline identifiers.
///
/// Maintains bidirectional mappings for efficient lookups:
/// - Session metadata for a handle (for logging and outbound routing)
/// - Session holding an identifier (enforces one session per identifier)
///
/// Sessions are kept in handle order, which is accept order.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Session ID → session info
    sessions: BTreeMap<SessionId, Session>,
    /// Client ID → session ID (reverse index)
    client_sessions: HashMap<ClientId, SessionId>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unidentified session.
    ///
    /// Returns `false` if the handle is already registered.
    pub fn add(&mut self, session_id: SessionId, peer: SocketAddr) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        self.sessions.insert(session_id, Session::new(peer));
        true
    }

    /// Unregister a session and release its identifier.
    ///
    /// Returns the session info if it existed.
    pub fn remove(&mut self, session_id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&session_id)?;

        if let Some(client_id) = &session.client_id {
            if self.client_sessions.get(client_id) == Some(&session_id) {
                self.client_sessions.remove(client_id);
            }
        }

        Some(session)
    }

    /// Session metadata. `None` if session doesn't exist.
    pub fn lookup(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Check if a session is registered.
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Assign `client_id` to a session, replacing any identifier it held.
    ///
    /// If another live session holds `client_id`, that session becomes
    /// unidentified. Returns `None` if the session doesn't exist.
    pub fn identify(
        &mut self,
        session_id: SessionId,
        client_id: ClientId,
    ) -> Option<Identification> {
        if !self.sessions.contains_key(&session_id) {
            return None;
        }

        let displaced =
            self.client_sessions.get(&client_id).copied().filter(|holder| *holder != session_id);

        if let Some(holder) = displaced {
            if let Some(session) = self.sessions.get_mut(&holder) {
                session.client_id = None;
            }
        }

        let session = self.sessions.get_mut(&session_id)?;
        let previous = session.client_id.replace(client_id.clone());

        if let Some(prev) = &previous {
            if *prev != client_id {
                self.client_sessions.remove(prev);
            }
        }

        self.client_sessions.insert(client_id, session_id);

        Some(Identification { previous, displaced })
    }

    /// Session currently holding `client_id`.
    pub fn session_for_client(&self, client_id: &ClientId) -> Option<SessionId> {
        self.client_sessions.get(client_id).copied()
    }

    /// All live session handles in accept order.
    pub fn session_ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.keys().copied()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// No live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn add_and_lookup() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::new(1);

        assert!(registry.add(id, peer(4000)));
        assert!(!registry.add(id, peer(4001)), "duplicate handle must be rejected");

        let session = registry.lookup(id).unwrap();
        assert_eq!(session.peer, peer(4000));
        assert!(!session.is_identified());
        assert_eq!(session.to_string(), "127.0.0.1:4000 (unidentified)");
    }

    #[test]
    fn identify_sets_identifier_once() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::new(1);
        registry.add(id, peer(1));

        let outcome = registry.identify(id, ClientId::from("abc")).unwrap();
        assert_eq!(outcome, Identification { previous: None, displaced: None });
        assert_eq!(registry.lookup(id).unwrap().client_id(), Some(&ClientId::from("abc")));
        assert_eq!(registry.session_for_client(&ClientId::from("abc")), Some(id));
    }

    #[test]
    fn reidentify_releases_previous_identifier() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::new(1);
        registry.add(id, peer(1));
        registry.identify(id, ClientId::from("old"));

        let outcome = registry.identify(id, ClientId::from("new")).unwrap();
        assert_eq!(outcome.previous, Some(ClientId::from("old")));
        assert_eq!(registry.session_for_client(&ClientId::from("old")), None);
        assert_eq!(registry.session_for_client(&ClientId::from("new")), Some(id));
    }

    #[test]
    fn identify_displaces_other_holder() {
        let mut registry = SessionRegistry::new();
        let first = SessionId::new(1);
        let second = SessionId::new(2);
        registry.add(first, peer(1));
        registry.add(second, peer(2));
        registry.identify(first, ClientId::from("abc"));

        let outcome = registry.identify(second, ClientId::from("abc")).unwrap();
        assert_eq!(outcome.displaced, Some(first));
        assert!(!registry.lookup(first).unwrap().is_identified());
        assert_eq!(registry.session_for_client(&ClientId::from("abc")), Some(second));
    }

    #[test]
    fn identify_unknown_session() {
        let mut registry = SessionRegistry::new();
        assert!(registry.identify(SessionId::new(9), ClientId::from("abc")).is_none());
        assert_eq!(registry.session_for_client(&ClientId::from("abc")), None);
    }

    #[test]
    fn remove_releases_identifier() {
        let mut registry = SessionRegistry::new();
        let id = SessionId::new(1);
        registry.add(id, peer(1));
        registry.identify(id, ClientId::from("abc"));

        let session = registry.remove(id).unwrap();
        assert_eq!(session.client_id(), Some(&ClientId::from("abc")));
        assert!(!registry.contains(id));
        assert_eq!(registry.session_for_client(&ClientId::from("abc")), None);
        assert!(registry.remove(id).is_none());
    }
}
