//! Browser-profile token storage
//!
//! `ProfileStorage` plays the role of the same-origin storage area shared by
//! every tab of one browser profile: a string→string map, optionally backed
//! by a JSON file written with atomic temp-file + rename. Each tab opens a
//! `TokenStore` on it, which owns five namespaced keys and sees change
//! notifications from the *other* tabs only.
//!
//! A tokio Mutex serializes all access. Multi-key writes (`write_session`,
//! `write_tokens`, `clear_all`) happen under a single lock and emit a single
//! notification, so another tab can never observe half a session.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::StorageConfig;
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Session, User};

/// Buffered notifications per profile before slow tabs start lagging.
const EVENT_CAPACITY: usize = 64;

/// Identity of one tab (one `TokenStore` handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

/// The five slots this system owns inside its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    User,
    Role,
    PortalToken,
}

impl StorageKey {
    pub const ALL: [StorageKey; 5] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::User,
        StorageKey::Role,
        StorageKey::PortalToken,
    ];

    pub fn slot(&self) -> &'static str {
        match self {
            StorageKey::AccessToken => "access_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::User => "user",
            StorageKey::Role => "role",
            StorageKey::PortalToken => "portal_token",
        }
    }

    fn from_slot(slot: &str) -> Option<Self> {
        StorageKey::ALL.into_iter().find(|key| key.slot() == slot)
    }
}

/// A change made by some tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Full (namespaced) key names that changed.
    pub keys: Vec<String>,
    /// Writing tab; `None` for the synthetic event emitted after lagging.
    pub source: Option<TabId>,
}

/// Storage shared by all tabs of one browser profile.
pub struct ProfileStorage {
    path: Option<PathBuf>,
    state: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<StorageEvent>,
}

impl ProfileStorage {
    /// Open file-backed storage.
    ///
    /// A missing file is a cold start and is created as `{}`. An unreadable
    /// or unparsable file is logged and treated as empty so a corrupted
    /// profile never blocks startup; the next write replaces it.
    pub async fn load(path: PathBuf) -> Result<Arc<Self>> {
        let state = if path.exists() {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                    Ok(entries) => {
                        info!(path = %path.display(), keys = entries.len(), "loaded profile storage");
                        entries
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "profile storage unparsable, starting empty");
                        HashMap::new()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "profile storage unreadable, starting empty");
                    HashMap::new()
                }
            }
        } else {
            info!(path = %path.display(), "profile storage not found, starting empty");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Arc::new(Self::with_state(Some(path), state)))
    }

    /// Open storage as the `[storage]` section describes: file-backed when a
    /// path is set, in-memory otherwise.
    pub async fn from_config(config: &StorageConfig) -> Result<Arc<Self>> {
        match &config.path {
            Some(path) => Self::load(path.clone()).await,
            None => Ok(Self::in_memory()),
        }
    }

    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::with_state(None, HashMap::new()))
    }

    fn with_state(path: Option<PathBuf>, state: HashMap<String, String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            path,
            state: Mutex::new(state),
            events,
        }
    }

    /// Open a new tab on this profile.
    pub fn open_tab(self: &Arc<Self>, namespace: &str) -> TokenStore {
        TokenStore {
            storage: Arc::clone(self),
            namespace: namespace.to_owned(),
            tab: TabId::new(),
        }
    }

    /// Read any key, owned or not.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.state.lock().await.get(key).cloned()
    }

    /// Write any key on behalf of `source`. Used for keys outside a
    /// namespace and for simulating foreign writers.
    pub async fn set_raw(&self, source: TabId, key: &str, value: &str) -> Result<()> {
        self.apply(source, vec![(key.to_owned(), Some(value.to_owned()))])
            .await
    }

    /// Number of keys currently stored, owned or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply a batch of writes (`Some`) and removals (`None`) atomically.
    async fn apply(&self, source: TabId, changes: Vec<(String, Option<String>)>) -> Result<()> {
        let state = self.state.lock().await;
        self.commit(state, source, changes).await
    }

    /// Like `apply`, but only if `precondition` holds for the current map.
    /// The check and the write happen under the same lock.
    async fn apply_if<F>(
        &self,
        source: TabId,
        precondition: F,
        changes: Vec<(String, Option<String>)>,
    ) -> Result<WriteOutcome>
    where
        F: FnOnce(&HashMap<String, String>) -> bool,
    {
        let state = self.state.lock().await;
        if !precondition(&state) {
            debug!(tab = %source, "conditional write superseded");
            return Ok(WriteOutcome::Superseded);
        }
        self.commit(state, source, changes).await?;
        Ok(WriteOutcome::Applied)
    }

    /// Only keys whose value actually changed are reported to other tabs; a
    /// batch that changes nothing is neither persisted nor announced.
    ///
    /// The notification goes out before the durable write, so a change that
    /// is visible in memory is always announced. The in-memory change stands
    /// even if the durable write fails.
    async fn commit(
        &self,
        mut state: MutexGuard<'_, HashMap<String, String>>,
        source: TabId,
        changes: Vec<(String, Option<String>)>,
    ) -> Result<()> {
        let mut changed = Vec::new();
        for (key, value) in changes {
            let previous = match value {
                Some(value) => state.insert(key.clone(), value.clone()).filter(|old| *old == value),
                None => match state.remove(&key) {
                    Some(_) => None,
                    None => continue,
                },
            };
            if previous.is_none() {
                changed.push(key);
            }
        }

        if changed.is_empty() {
            return Ok(());
        }

        debug!(tab = %source, keys = ?changed, "profile storage changed");
        // No receivers is fine: single-tab profiles never subscribe.
        let _ = self.events.send(StorageEvent {
            keys: changed,
            source: Some(source),
        });

        match &self.path {
            Some(path) => write_atomic(path, &state).await,
            None => Ok(()),
        }
    }
}

/// Result of a write that is conditional on the session still being the
/// one the caller started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Another tab replaced or cleared the session first; nothing written.
    Superseded,
}

/// Raw values of the five owned slots, read under one lock.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub portal_token: Option<String>,
}

impl StoredSnapshot {
    /// No owned key present at all.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.user.is_none()
            && self.role.is_none()
            && self.portal_token.is_none()
    }
}

impl fmt::Debug for StoredSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSnapshot")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .field("role", &self.role)
            .field("portal_token", &self.portal_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// One tab's view of the profile storage, restricted to its namespace.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<ProfileStorage>,
    namespace: String,
    tab: TabId,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("namespace", &self.namespace)
            .field("tab", &self.tab)
            .finish()
    }
}

impl TokenStore {
    pub fn tab_id(&self) -> TabId {
        self.tab
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn storage(&self) -> &Arc<ProfileStorage> {
        &self.storage
    }

    /// Full key name, e.g. `portal.access_token`.
    pub fn key_name(&self, key: StorageKey) -> String {
        format!("{}.{}", self.namespace, key.slot())
    }

    /// Whether a full key name is one of the five owned slots.
    pub fn owns(&self, key: &str) -> bool {
        owned_slot(&self.namespace, key).is_some()
    }

    pub async fn get(&self, key: StorageKey) -> Option<String> {
        self.storage.get_raw(&self.key_name(key)).await
    }

    pub async fn set(&self, key: StorageKey, value: &str) -> Result<()> {
        self.storage
            .apply(self.tab, vec![(self.key_name(key), Some(value.to_owned()))])
            .await
    }

    pub async fn remove(&self, key: StorageKey) -> Result<()> {
        self.storage
            .apply(self.tab, vec![(self.key_name(key), None)])
            .await
    }

    /// Remove every owned key. Keys outside the namespace are left alone.
    pub async fn clear_all(&self) -> Result<()> {
        let removals = StorageKey::ALL
            .into_iter()
            .map(|key| (self.key_name(key), None))
            .collect();
        self.storage.apply(self.tab, removals).await
    }

    pub async fn snapshot(&self) -> StoredSnapshot {
        let state = self.storage.state.lock().await;
        let read = |key: StorageKey| state.get(&self.key_name(key)).cloned();
        StoredSnapshot {
            access_token: read(StorageKey::AccessToken),
            refresh_token: read(StorageKey::RefreshToken),
            user: read(StorageKey::User),
            role: read(StorageKey::Role),
            portal_token: read(StorageKey::PortalToken),
        }
    }

    /// Persist a whole session. Optional tokens the session lacks are
    /// removed so nothing from a previous identity lingers.
    pub async fn write_session(&self, session: &Session) -> Result<()> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| Error::Storage(format!("serializing user: {e}")))?;
        let optional = |secret: &Option<common::Secret<String>>| {
            secret.as_ref().map(|s| s.expose_str().to_owned())
        };

        let changes = vec![
            (
                self.key_name(StorageKey::AccessToken),
                Some(session.access_token.expose_str().to_owned()),
            ),
            (
                self.key_name(StorageKey::RefreshToken),
                optional(&session.refresh_token),
            ),
            (self.key_name(StorageKey::User), Some(user)),
            (
                self.key_name(StorageKey::Role),
                Some(session.role.as_str().to_owned()),
            ),
            (
                self.key_name(StorageKey::PortalToken),
                optional(&session.portal_token),
            ),
        ];
        self.storage.apply(self.tab, changes).await
    }

    /// Replace the stored user record, provided the stored session still
    /// carries `expected_access` with a user and a role.
    pub async fn write_user(&self, expected_access: &str, user: &User) -> Result<WriteOutcome> {
        let user = serde_json::to_string(user)
            .map_err(|e| Error::Storage(format!("serializing user: {e}")))?;
        let changes = vec![(self.key_name(StorageKey::User), Some(user))];
        self.storage
            .apply_if(self.tab, |state| self.holds_session(state, expected_access), changes)
            .await
    }

    /// Replace the token pair, provided the stored session still carries
    /// `expected_access` with a user and a role. A `None` refresh token
    /// keeps the stored one.
    pub async fn write_tokens(
        &self,
        expected_access: &str,
        access: &str,
        refresh: Option<&str>,
    ) -> Result<WriteOutcome> {
        let mut changes = vec![(
            self.key_name(StorageKey::AccessToken),
            Some(access.to_owned()),
        )];
        if let Some(refresh) = refresh {
            changes.push((
                self.key_name(StorageKey::RefreshToken),
                Some(refresh.to_owned()),
            ));
        }
        self.storage
            .apply_if(self.tab, |state| self.holds_session(state, expected_access), changes)
            .await
    }

    /// Remove every owned key, provided the stored access token is still
    /// `expected_access`.
    pub async fn clear_if_current(&self, expected_access: &str) -> Result<WriteOutcome> {
        let removals = StorageKey::ALL
            .into_iter()
            .map(|key| (self.key_name(key), None))
            .collect();
        let access = self.key_name(StorageKey::AccessToken);
        self.storage
            .apply_if(
                self.tab,
                |state| state.get(&access).map(String::as_str) == Some(expected_access),
                removals,
            )
            .await
    }

    fn holds_session(&self, state: &HashMap<String, String>, expected_access: &str) -> bool {
        state.get(&self.key_name(StorageKey::AccessToken)).map(String::as_str)
            == Some(expected_access)
            && state.contains_key(&self.key_name(StorageKey::User))
            && state.contains_key(&self.key_name(StorageKey::Role))
    }

    /// Listen for changes other tabs make to this namespace's owned keys.
    pub fn subscribe(&self) -> StorageListener {
        StorageListener {
            rx: self.storage.events.subscribe(),
            tab: self.tab,
            namespace: self.namespace.clone(),
        }
    }
}

/// Receives storage notifications relevant to one tab.
pub struct StorageListener {
    rx: broadcast::Receiver<StorageEvent>,
    tab: TabId,
    namespace: String,
}

impl StorageListener {
    /// Next change from another tab touching an owned key.
    ///
    /// Returns `None` once the profile storage is gone. If this listener fell
    /// behind, a synthetic event (`source: None`) is returned so the caller
    /// re-reads storage instead of trusting stale state.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if event.source == Some(self.tab) {
                        continue;
                    }
                    if event
                        .keys
                        .iter()
                        .any(|key| owned_slot(&self.namespace, key).is_some())
                    {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(tab = %self.tab, skipped, "storage listener lagged, forcing re-read");
                    return Some(StorageEvent {
                        keys: Vec::new(),
                        source: None,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn owned_slot(namespace: &str, key: &str) -> Option<StorageKey> {
    key.strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(StorageKey::from_slot)
}

/// Write the storage map to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds bearer tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing profile storage: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("storage path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "profile".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp storage file: {e}")))?;

    debug!(path = %path.display(), "persisted profile storage");
    Ok(())
}
