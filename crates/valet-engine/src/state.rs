//! The persistent state document and its manager.
//!
//! All mutable runtime state — root users, per-chat settings, installed
//! service instances with their roles and storage, blacklists, and live
//! interactive sessions — lives in one logical [`BotState`] document.
//! The [`StateManager`] owns it behind an async `RwLock`, persists it
//! through a [`StateStore`] after every mutation, and hands out per-chat
//! locks so the router can serialize the pipeline per chat.
//!
//! Dots in map keys are a persistence concern only: [`JsonFileStore`]
//! escapes them reversibly on save and reverses the escape on load, so
//! the in-memory model never sees escaped keys.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use valet_gateway::Participant;
use valet_schema::catalog::ServiceDef;
use valet_types::{ChatId, ParticipantChange, UserId, ValetError};

use crate::session::Session;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// Kind of chat, fixed at first contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Group,
    Private,
}

/// A deny rule: matches a user, optionally narrowed to specific groups,
/// services, or commands. A missing set or a `*` entry matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<BTreeSet<String>>,
}

impl BlacklistEntry {
    /// A rule matching the user everywhere.
    pub fn all(user_id: UserId) -> Self {
        Self {
            user_id,
            groups: None,
            services: None,
            commands: None,
        }
    }
}

/// The args-only binding of a chat: bare lines run this command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgsOnlyTarget {
    pub service: String,
    pub command: String,
}

/// Per-chat admin-scope settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminSettings {
    #[serde(default = "default_true")]
    pub bot_enabled: bool,
    #[serde(default)]
    pub reply_on_parsing_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_only_command: Option<ArgsOnlyTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_service_prefix: Option<String>,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bot_enabled: true,
            reply_on_parsing_error: false,
            args_only_command: None,
            disable_service_prefix: None,
        }
    }
}

/// Global root-scope settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSettings {
    #[serde(default = "default_true")]
    pub bot_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_prefix_pattern: Option<String>,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            bot_enabled: true,
            invoke_prefix_pattern: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One role's member list. Role order mirrors the service declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub name: String,
    #[serde(default)]
    pub users: Vec<UserId>,
}

/// A service installed into one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub roles: Vec<RoleEntry>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub storage: BTreeMap<String, Vec<serde_json::Value>>,
}

impl ServiceInstance {
    pub fn role(&self, name: &str) -> Option<&RoleEntry> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut RoleEntry> {
        self.roles.iter_mut().find(|r| r.name == name)
    }
}

/// State of one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub chat_type: ChatType,
    #[serde(default)]
    pub admin_settings: AdminSettings,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceInstance>,
    #[serde(default)]
    pub display_names: BTreeMap<UserId, String>,
    #[serde(default)]
    pub blacklist: Vec<BlacklistEntry>,
    #[serde(default)]
    pub sessions: BTreeMap<UserId, Session>,
}

impl ChatState {
    pub fn new(chat_type: ChatType) -> Self {
        Self {
            chat_type,
            admin_settings: AdminSettings::default(),
            services: BTreeMap::new(),
            display_names: BTreeMap::new(),
            blacklist: Vec::new(),
            sessions: BTreeMap::new(),
        }
    }
}

/// Global (cross-chat) state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootState {
    pub root_users: BTreeSet<UserId>,
    #[serde(default)]
    pub settings: RootSettings,
    #[serde(default)]
    pub blacklist: Vec<BlacklistEntry>,
}

/// The single logical state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub root: RootState,
    #[serde(default)]
    pub chats: BTreeMap<ChatId, ChatState>,
}

impl BotState {
    /// The first-boot document, seeded with one root user.
    pub fn seeded(root_user: &str) -> Self {
        Self {
            root: RootState {
                root_users: BTreeSet::from([UserId::new(root_user)]),
                settings: RootSettings::default(),
                blacklist: Vec::new(),
            },
            chats: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key escaping
// ---------------------------------------------------------------------------

/// Escape a map key for backends that forbid dots: `~` becomes `~~` and
/// `.` becomes `~.`.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '~' => out.push_str("~~"),
            '.' => out.push_str("~."),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_key`].
pub fn unescape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('~') => out.push('~'),
                Some('.') => out.push('.'),
                Some(other) => {
                    out.push('~');
                    out.push(other);
                }
                None => out.push('~'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively escape every object key in a JSON value.
fn encode_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (escape_key(&k), encode_keys(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(encode_keys).collect())
        }
        other => other,
    }
}

/// Recursively reverse [`encode_keys`].
fn decode_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (unescape_key(&k), decode_keys(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(decode_keys).collect())
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A durable home for the state document.
pub trait StateStore: Send + Sync {
    /// Load the document; `None` on first boot.
    fn load(&self) -> Result<Option<BotState>, ValetError>;

    /// Persist the document atomically.
    fn save(&self, state: &BotState) -> Result<(), ValetError>;
}

/// JSON-file store with atomic save (write tmp, then rename) and key
/// escaping at the serialization boundary.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<BotState>, ValetError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ValetError::State(format!("failed to read state file: {e}"))),
        };
        let raw: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| ValetError::State(format!("failed to parse state file: {e}")))?;
        let state = serde_json::from_value(decode_keys(raw))
            .map_err(|e| ValetError::State(format!("state file has unexpected shape: {e}")))?;
        Ok(Some(state))
    }

    fn save(&self, state: &BotState) -> Result<(), ValetError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ValetError::State(format!("failed to create state dir: {e}")))?;
            }
        }
        let raw = serde_json::to_value(state)
            .map_err(|e| ValetError::State(format!("failed to serialize state: {e}")))?;
        let json = serde_json::to_string_pretty(&encode_keys(raw))
            .map_err(|e| ValetError::State(format!("failed to serialize state: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)
            .map_err(|e| ValetError::State(format!("failed to write state tmp: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| ValetError::State(format!("failed to rename state file: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owner of the state document.
///
/// Reads and mutations go through closures under the document lock;
/// every mutation is persisted before the call returns. The per-chat
/// locks serialize the whole pipeline for one chat while leaving other
/// chats free to proceed.
pub struct StateManager {
    doc: RwLock<BotState>,
    store: Box<dyn StateStore>,
    chat_locks: StdMutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl StateManager {
    /// Load the document from the store, seeding it on first boot.
    pub fn open(store: Box<dyn StateStore>, initial_root_user: &str) -> Result<Self, ValetError> {
        let doc = match store.load()? {
            Some(state) => state,
            None => {
                let state = BotState::seeded(initial_root_user);
                store.save(&state)?;
                info!(root_user = initial_root_user, "seeded fresh bot state");
                state
            }
        };
        Ok(Self {
            doc: RwLock::new(doc),
            store,
            chat_locks: StdMutex::new(HashMap::new()),
        })
    }

    /// The lock handle for a chat, created on first use.
    pub fn chat_lock(&self, chat_id: &ChatId) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().expect("chat lock map poisoned");
        locks
            .entry(chat_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read the document.
    pub async fn read<R>(&self, f: impl FnOnce(&BotState) -> R) -> R {
        let guard = self.doc.read().await;
        f(&guard)
    }

    /// Mutate the document and persist the result.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut BotState) -> R) -> Result<R, ValetError> {
        let mut guard = self.doc.write().await;
        let result = f(&mut guard);
        self.store.save(&guard)?;
        Ok(result)
    }

    /// Create the chat lazily on first contact.
    pub async fn ensure_chat(&self, chat_id: &ChatId) -> Result<(), ValetError> {
        let exists = self.read(|s| s.chats.contains_key(chat_id.as_str())).await;
        if exists {
            return Ok(());
        }
        let chat_type = if chat_id.is_group() {
            ChatType::Group
        } else {
            ChatType::Private
        };
        self.mutate(|s| {
            s.chats
                .entry(chat_id.clone())
                .or_insert_with(|| ChatState::new(chat_type));
        })
        .await?;
        info!(chat = %chat_id, ?chat_type, "chat state created");
        Ok(())
    }

    /// Record the sender's display name.
    pub async fn set_display_name(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        name: &str,
    ) -> Result<(), ValetError> {
        if name.is_empty() {
            return Ok(());
        }
        let current = self
            .read(|s| {
                s.chats
                    .get(chat_id.as_str())
                    .and_then(|c| c.display_names.get(user_id.as_str()).cloned())
            })
            .await;
        if current.as_deref() == Some(name) {
            return Ok(());
        }
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id.as_str()) {
                chat.display_names.insert(user_id.clone(), name.to_string());
            }
        })
        .await
    }

    // -- services ----------------------------------------------------------

    /// Install a service: current participants are partitioned into the
    /// `admin` and `member` roles, every other declared role starts
    /// empty, and settings take their declared defaults.
    pub async fn install_service(
        &self,
        chat_id: &ChatId,
        def: &ServiceDef,
        participants: &[Participant],
    ) -> Result<(), ValetError> {
        let roles: Vec<RoleEntry> = def
            .roles
            .iter()
            .map(|name| RoleEntry {
                name: name.clone(),
                users: match name.as_str() {
                    "admin" => participants
                        .iter()
                        .filter(|p| p.admin)
                        .map(|p| UserId::new(p.jid.as_str()))
                        .collect(),
                    "member" => participants
                        .iter()
                        .filter(|p| !p.admin)
                        .map(|p| UserId::new(p.jid.as_str()))
                        .collect(),
                    _ => Vec::new(),
                },
            })
            .collect();

        let settings = def
            .settings
            .iter()
            .map(|s| (s.name.clone(), s.default.clone()))
            .collect();
        let storage = def
            .storage
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();

        let instance = ServiceInstance {
            enabled: true,
            roles,
            settings,
            storage,
        };

        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id.as_str()) {
                chat.services.insert(def.id.clone(), instance);
            }
        })
        .await?;
        info!(chat = %chat_id, service = %def.id, "service installed");
        Ok(())
    }

    /// Remove a service instance; `false` when it was not installed.
    pub async fn uninstall_service(
        &self,
        chat_id: &ChatId,
        service: &str,
    ) -> Result<bool, ValetError> {
        self.mutate(|s| {
            s.chats
                .get_mut(chat_id.as_str())
                .map(|chat| chat.services.remove(service).is_some())
                .unwrap_or(false)
        })
        .await
    }

    // -- roles -------------------------------------------------------------

    /// Add a user to a role list. `Ok(false)` when the user already held
    /// the role; errors when the service or role does not exist.
    pub async fn add_user_role(
        &self,
        chat_id: &ChatId,
        service: &str,
        role: &str,
        user_id: &UserId,
    ) -> Result<bool, ValetError> {
        self.mutate(|s| {
            let entry = s
                .chats
                .get_mut(chat_id.as_str())
                .and_then(|chat| chat.services.get_mut(service))
                .and_then(|instance| instance.role_mut(role))
                .ok_or_else(|| {
                    ValetError::Handler(format!("no role '{role}' in service '{service}'"))
                })?;
            if entry.users.contains(user_id) {
                Ok(false)
            } else {
                entry.users.push(user_id.clone());
                Ok(true)
            }
        })
        .await?
    }

    /// Remove a user from a role list. `Ok(false)` when absent.
    pub async fn remove_user_role(
        &self,
        chat_id: &ChatId,
        service: &str,
        role: &str,
        user_id: &UserId,
    ) -> Result<bool, ValetError> {
        self.mutate(|s| {
            let entry = s
                .chats
                .get_mut(chat_id.as_str())
                .and_then(|chat| chat.services.get_mut(service))
                .and_then(|instance| instance.role_mut(role))
                .ok_or_else(|| {
                    ValetError::Handler(format!("no role '{role}' in service '{service}'"))
                })?;
            let before = entry.users.len();
            entry.users.retain(|u| u != user_id);
            Ok(before != entry.users.len())
        })
        .await?
    }

    /// The users holding a role in a service.
    pub async fn users_with_role(
        &self,
        chat_id: &ChatId,
        service: &str,
        role: &str,
    ) -> Vec<UserId> {
        self.read(|s| {
            s.chats
                .get(chat_id.as_str())
                .and_then(|chat| chat.services.get(service))
                .and_then(|instance| instance.role(role))
                .map(|entry| entry.users.clone())
                .unwrap_or_default()
        })
        .await
    }

    /// Resolve a user's display name, falling back to the id itself.
    pub async fn resolve_user_name(&self, chat_id: &ChatId, user_id: &UserId) -> String {
        self.read(|s| {
            s.chats
                .get(chat_id.as_str())
                .and_then(|chat| chat.display_names.get(user_id.as_str()).cloned())
                .unwrap_or_else(|| user_id.to_string())
        })
        .await
    }

    /// Apply a group membership change to every installed service.
    ///
    /// `join`/`demote` restore plain membership, `promote` moves the
    /// user into `admin`, and `leave` removes the user from every role
    /// list.
    pub async fn apply_participants(
        &self,
        chat_id: &ChatId,
        change: ParticipantChange,
        jids: &[UserId],
    ) -> Result<(), ValetError> {
        self.mutate(|s| {
            let Some(chat) = s.chats.get_mut(chat_id.as_str()) else {
                return;
            };
            for instance in chat.services.values_mut() {
                for user in jids {
                    match change {
                        ParticipantChange::Join => {
                            add_to_role(instance, "member", user);
                        }
                        ParticipantChange::Promote => {
                            remove_from_role(instance, "member", user);
                            add_to_role(instance, "admin", user);
                        }
                        ParticipantChange::Demote => {
                            remove_from_role(instance, "admin", user);
                            add_to_role(instance, "member", user);
                        }
                        ParticipantChange::Leave => {
                            for entry in instance.roles.iter_mut() {
                                entry.users.retain(|u| u != user);
                            }
                        }
                    }
                }
            }
        })
        .await
    }

    // -- sessions ----------------------------------------------------------

    /// The live session for `(chat, user)`, if any.
    pub async fn session(&self, chat_id: &ChatId, user_id: &UserId) -> Option<Session> {
        self.read(|s| {
            s.chats
                .get(chat_id.as_str())
                .and_then(|chat| chat.sessions.get(user_id.as_str()).cloned())
        })
        .await
    }

    /// Store (or replace) the session for `(chat, user)`.
    pub async fn put_session(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
        session: Session,
    ) -> Result<(), ValetError> {
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id.as_str()) {
                chat.sessions.insert(user_id.clone(), session);
            }
        })
        .await
    }

    /// Delete the session for `(chat, user)`; `false` when none existed.
    pub async fn remove_session(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
    ) -> Result<bool, ValetError> {
        self.mutate(|s| {
            s.chats
                .get_mut(chat_id.as_str())
                .map(|chat| chat.sessions.remove(user_id.as_str()).is_some())
                .unwrap_or(false)
        })
        .await
    }

    // -- blacklists --------------------------------------------------------

    pub async fn add_global_blacklist(&self, entry: BlacklistEntry) -> Result<(), ValetError> {
        warn!(user = %entry.user_id, "global blacklist entry added");
        self.mutate(|s| s.root.blacklist.push(entry)).await
    }

    /// Remove every global entry for a user; returns how many were removed.
    pub async fn remove_global_blacklist(&self, user_id: &UserId) -> Result<usize, ValetError> {
        self.mutate(|s| {
            let before = s.root.blacklist.len();
            s.root.blacklist.retain(|e| &e.user_id != user_id);
            before - s.root.blacklist.len()
        })
        .await
    }

    pub async fn add_group_blacklist(
        &self,
        chat_id: &ChatId,
        entry: BlacklistEntry,
    ) -> Result<(), ValetError> {
        warn!(chat = %chat_id, user = %entry.user_id, "group blacklist entry added");
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id.as_str()) {
                chat.blacklist.push(entry);
            }
        })
        .await
    }

    pub async fn remove_group_blacklist(
        &self,
        chat_id: &ChatId,
        user_id: &UserId,
    ) -> Result<usize, ValetError> {
        self.mutate(|s| {
            let Some(chat) = s.chats.get_mut(chat_id.as_str()) else {
                return 0;
            };
            let before = chat.blacklist.len();
            chat.blacklist.retain(|e| &e.user_id != user_id);
            before - chat.blacklist.len()
        })
        .await
    }

    // -- settings ----------------------------------------------------------

    /// Update the chat's admin settings in place.
    pub async fn update_admin_settings(
        &self,
        chat_id: &ChatId,
        f: impl FnOnce(&mut AdminSettings),
    ) -> Result<(), ValetError> {
        self.mutate(|s| {
            if let Some(chat) = s.chats.get_mut(chat_id.as_str()) {
                f(&mut chat.admin_settings);
            }
        })
        .await
    }

    /// Toggle the global kill switch.
    pub async fn set_bot_enabled(&self, enabled: bool) -> Result<(), ValetError> {
        self.mutate(|s| s.root.settings.bot_enabled = enabled).await
    }

    /// Grant root to a user; `false` when already root.
    pub async fn add_root_user(&self, user_id: &UserId) -> Result<bool, ValetError> {
        self.mutate(|s| s.root.root_users.insert(user_id.clone())).await
    }

    /// Set a service setting; `false` when the service is not installed.
    pub async fn set_service_setting(
        &self,
        chat_id: &ChatId,
        service: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, ValetError> {
        self.mutate(|s| {
            match s
                .chats
                .get_mut(chat_id.as_str())
                .and_then(|chat| chat.services.get_mut(service))
            {
                Some(instance) => {
                    instance.settings.insert(key.to_string(), value);
                    true
                }
                None => false,
            }
        })
        .await
    }
}

fn add_to_role(instance: &mut ServiceInstance, role: &str, user: &UserId) {
    if let Some(entry) = instance.role_mut(role) {
        if !entry.users.contains(user) {
            entry.users.push(user.clone());
        }
    }
}

fn remove_from_role(instance: &mut ServiceInstance, role: &str, user: &UserId) {
    if let Some(entry) = instance.role_mut(role) {
        entry.users.retain(|u| u != user);
    }
}
