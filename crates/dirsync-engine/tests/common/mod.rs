//! In-memory directory and registry fakes for engine tests.
//!
//! Both fakes implement the full collaborator boundaries with plain maps
//! behind a mutex, record every write for assertions, and support the
//! failure toggles the tests need (rename refusal, credential checks).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use dirsync_connector::entry::DirectoryEntry;
use dirsync_connector::error::{DirectoryError, DirectoryResult};
use dirsync_connector::ops::{AttributeChange, ModifyOp, RenameRequest, WriteValue};
use dirsync_connector::traits::{
    DirectoryModify, DirectorySchema, DirectorySearch, DirectoryService, EntryPages,
    GroupExpansion, GroupMembers,
};
use dirsync_registry::{
    ContactDraft, ContactEntry, ContactId, Photo, RegistryError, RegistryResult, RegistryStore,
    RegistryUser, StatusId, StatusRecord, UserId, UserPatch,
};

/// Route engine logs through the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dirsync_engine=debug")
        .with_test_writer()
        .try_init();
}

// --- Directory fake ---

#[derive(Default)]
struct DirectoryState {
    entries: Vec<DirectoryEntry>,
    /// Direct members per group DN (lowercased).
    group_members: HashMap<String, GroupMembers>,
    /// Group account name to DN.
    group_dns: HashMap<String, String>,
    single_valued: HashMap<String, bool>,
    passwords: HashMap<String, String>,
    fail_rename: bool,
    modifications: Vec<(String, Vec<AttributeChange>)>,
    renames: Vec<RenameRequest>,
}

pub struct MemoryDirectory {
    name: String,
    page_size: usize,
    state: Mutex<DirectoryState>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            name: "memory directory".to_string(),
            page_size: 2,
            state: Mutex::new(DirectoryState::default()),
        }
    }

    pub fn add_entry(&self, entry: DirectoryEntry) {
        self.state.lock().unwrap().entries.push(entry);
    }

    pub fn add_group(&self, name: &str, dn: &str, users: &[&str], subgroups: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.group_dns.insert(name.to_string(), dn.to_string());
        state.group_members.insert(
            dn.to_lowercase(),
            GroupMembers {
                users: users.iter().map(|u| (*u).to_string()).collect(),
                groups: subgroups.iter().map(|g| (*g).to_string()).collect(),
            },
        );
    }

    /// Register a subgroup expansion without a lookup name.
    pub fn add_subgroup(&self, dn: &str, users: &[&str], subgroups: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.group_members.insert(
            dn.to_lowercase(),
            GroupMembers {
                users: users.iter().map(|u| (*u).to_string()).collect(),
                groups: subgroups.iter().map(|g| (*g).to_string()).collect(),
            },
        );
    }

    pub fn set_single_valued(&self, attribute: &str, single: bool) {
        self.state
            .lock()
            .unwrap()
            .single_valued
            .insert(attribute.to_lowercase(), single);
    }

    pub fn set_password(&self, dn: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(dn.to_string(), password.to_string());
    }

    pub fn fail_renames(&self) {
        self.state.lock().unwrap().fail_rename = true;
    }

    pub fn modifications(&self) -> Vec<(String, Vec<AttributeChange>)> {
        self.state.lock().unwrap().modifications.clone()
    }

    pub fn renames(&self) -> Vec<RenameRequest> {
        self.state.lock().unwrap().renames.clone()
    }

    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|e| e.dn().eq_ignore_ascii_case(dn))
            .cloned()
    }
}

struct MemoryPages {
    pages: VecDeque<Vec<DirectoryEntry>>,
}

#[async_trait]
impl EntryPages for MemoryPages {
    async fn next_page(&mut self) -> DirectoryResult<Option<Vec<DirectoryEntry>>> {
        Ok(self.pages.pop_front())
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn bind(&self) -> DirectoryResult<()> {
        Ok(())
    }

    async fn rebind(&self, dn: &str, password: &str) -> DirectoryResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.passwords.get(dn).is_some_and(|p| p == password))
    }
}

#[async_trait]
impl DirectorySearch for MemoryDirectory {
    async fn search(
        &self,
        filter: &str,
        _attributes: &[String],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        // Supports the simple equality form used in tests.
        let Some((attribute, value)) = filter
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split_once('=')
        else {
            return Ok(Vec::new());
        };
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.value(attribute) == Some(value))
            .cloned()
            .collect())
    }

    async fn find_user(&self, username: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let attribute = if username.contains('@') {
            "userPrincipalName"
        } else {
            "uid"
        };
        let state = self.state.lock().unwrap();
        let matches: Vec<&DirectoryEntry> = state
            .entries
            .iter()
            .filter(|e| e.value(attribute) == Some(username))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0].clone())),
            count => Err(DirectoryError::AmbiguousResult {
                filter: format!("({attribute}={username})"),
                count,
            }),
        }
    }

    async fn find_by_guid(&self, guid_hex: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .find(|e| e.guid_hex("objectGUID").as_deref() == Some(guid_hex))
            .cloned())
    }

    async fn entry_by_dn(&self, dn: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .find(|e| e.dn().eq_ignore_ascii_case(dn))
            .cloned())
    }

    async fn all_users(&self, _attributes: &[String]) -> DirectoryResult<Box<dyn EntryPages>> {
        let state = self.state.lock().unwrap();
        let mut pages = VecDeque::new();
        for chunk in state.entries.chunks(self.page_size) {
            pages.push_back(chunk.to_vec());
        }
        Ok(Box::new(MemoryPages { pages }))
    }
}

#[async_trait]
impl DirectoryModify for MemoryDirectory {
    async fn modify(&self, dn: &str, changes: Vec<AttributeChange>) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.dn().eq_ignore_ascii_case(dn))
        else {
            return Err(DirectoryError::entry_not_found(dn));
        };
        for change in &changes {
            match change.op {
                ModifyOp::Delete => entry.remove(&change.attribute),
                ModifyOp::Add | ModifyOp::Replace => {
                    let mut texts = Vec::new();
                    let mut blobs = Vec::new();
                    for value in &change.values {
                        match value {
                            WriteValue::Text(s) => texts.push(s.clone()),
                            WriteValue::Binary(b) => blobs.push(b.clone()),
                        }
                    }
                    if !texts.is_empty() {
                        entry.set_text(&change.attribute, texts);
                    }
                    if !blobs.is_empty() {
                        entry.set_binary(&change.attribute, blobs);
                    }
                }
            }
        }
        state.modifications.push((dn.to_string(), changes));
        Ok(())
    }

    async fn rename(&self, request: &RenameRequest) -> DirectoryResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_rename {
            return Err(DirectoryError::operation_failed(
                "rename",
                "insufficientAccessRights",
            ));
        }
        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.dn().eq_ignore_ascii_case(&request.dn))
        else {
            return Err(DirectoryError::entry_not_found(&request.dn));
        };
        entry.replace_rdn(&request.new_rdn)?;
        state.renames.push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl DirectorySchema for MemoryDirectory {
    async fn is_single_valued(&self, attribute: &str) -> DirectoryResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .single_valued
            .get(&attribute.to_lowercase())
            .copied()
            .unwrap_or(false))
    }
}

#[async_trait]
impl GroupExpansion for MemoryDirectory {
    async fn find_group(&self, name: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.group_dns.get(name).map(DirectoryEntry::new))
    }

    async fn expand_group(&self, group_dn: &str) -> DirectoryResult<GroupMembers> {
        let state = self.state.lock().unwrap();
        Ok(state
            .group_members
            .get(&group_dn.to_lowercase())
            .map(|m| GroupMembers {
                users: m.users.clone(),
                groups: m.groups.clone(),
            })
            .unwrap_or_default())
    }
}

// --- Registry fake ---

#[derive(Default)]
struct RegistryState {
    users: BTreeMap<i64, RegistryUser>,
    contacts: BTreeMap<i64, ContactEntry>,
    photos: HashMap<i64, Vec<Photo>>,
    statuses: Vec<StatusRecord>,
    kinds: Vec<String>,
    next_user: i64,
    next_contact: i64,
    writes: u32,
    commits: u32,
}

pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_user: 1,
                next_contact: 1,
                ..Default::default()
            }),
        }
    }

    pub fn add_status(&self, status: StatusRecord) {
        self.state.lock().unwrap().statuses.push(status);
    }

    pub fn set_contact_kinds(&self, kinds: &[&str]) {
        self.state.lock().unwrap().kinds = kinds.iter().map(|k| (*k).to_string()).collect();
    }

    pub fn add_user(&self, user: RegistryUser) -> UserId {
        let mut state = self.state.lock().unwrap();
        let id = user.id;
        state.next_user = state.next_user.max(id.0 + 1);
        state.users.insert(id.0, user);
        id
    }

    pub fn add_contact(&self, id: i64, user: UserId, kind: &str, value: &str, order: u32) {
        let mut state = self.state.lock().unwrap();
        state.next_contact = state.next_contact.max(id + 1);
        state.contacts.insert(
            id,
            ContactEntry {
                id: ContactId(id),
                user,
                kind: kind.to_string(),
                value: value.to_string(),
                order,
            },
        );
    }

    pub fn set_photos(&self, user: UserId, photos: Vec<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.photos.insert(
            user.0,
            photos
                .into_iter()
                .enumerate()
                .map(|(i, content)| Photo {
                    id: i as i64 + 1,
                    content,
                    added_at: Utc::now(),
                })
                .collect(),
        );
    }

    pub fn get_user(&self, username: &str) -> Option<RegistryUser> {
        let state = self.state.lock().unwrap();
        state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub fn get_contacts(&self, user: UserId) -> Vec<ContactEntry> {
        let state = self.state.lock().unwrap();
        let mut contacts: Vec<ContactEntry> = state
            .contacts
            .values()
            .filter(|c| c.user == user)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.order.cmp(&b.order)));
        contacts
    }

    pub fn write_count(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    pub fn commit_count(&self) -> u32 {
        self.state.lock().unwrap().commits
    }
}

fn apply_patch(user: &mut RegistryUser, patch: &UserPatch) {
    use dirsync_registry::PropertyValue;

    let text = |value: &PropertyValue| value.as_text().map(str::to_string);
    for (name, value) in patch.iter() {
        match name.as_str() {
            "username" => {
                if let Some(v) = text(value) {
                    user.username = v;
                }
            }
            "first_name" => user.first_name = text(value),
            "last_name" => user.last_name = text(value),
            "display_name" => user.display_name = text(value),
            "nickname" => user.nickname = text(value),
            "domain" => user.domain = text(value),
            "title" => user.title = text(value),
            "department" => user.department = text(value),
            "room" => user.room = text(value),
            "guid" => user.guid = text(value),
            "supervisor" => user.supervisor = value.as_link(),
            "substitute" => user.substitute = value.as_link(),
            _ => {}
        }
    }
    if let Some(status) = patch.status {
        user.status = status;
    }
    if let Some(ref roles) = patch.roles {
        user.roles = roles.clone();
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistry {
    async fn lookup_username(&self, username: &str) -> RegistryResult<UserId> {
        let state = self.state.lock().unwrap();
        state
            .users
            .values()
            .find(|u| u.username == username)
            .map(|u| u.id)
            .ok_or_else(|| RegistryError::user_not_found(username))
    }

    async fn find_by_guid(&self, guid_hex: &str) -> RegistryResult<Option<UserId>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .values()
            .find(|u| u.guid.as_deref() == Some(guid_hex))
            .map(|u| u.id))
    }

    async fn user(&self, id: UserId) -> RegistryResult<RegistryUser> {
        let state = self.state.lock().unwrap();
        state
            .users
            .get(&id.0)
            .cloned()
            .ok_or_else(|| RegistryError::user_not_found(id.to_string()))
    }

    async fn create_user(&self, patch: UserPatch) -> RegistryResult<UserId> {
        let mut state = self.state.lock().unwrap();
        let id = UserId(state.next_user);
        state.next_user += 1;
        let mut user = RegistryUser {
            id,
            ..Default::default()
        };
        apply_patch(&mut user, &patch);
        if user.username.is_empty() {
            return Err(RegistryError::Constraint {
                message: "user created without a username".to_string(),
            });
        }
        state.users.insert(id.0, user);
        state.writes += 1;
        Ok(id)
    }

    async fn update_user(&self, id: UserId, patch: UserPatch) -> RegistryResult<()> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .users
            .get_mut(&id.0)
            .ok_or_else(|| RegistryError::user_not_found(id.to_string()))?;
        apply_patch(user, &patch);
        state.writes += 1;
        Ok(())
    }

    async fn all_usernames(&self) -> RegistryResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.users.values().map(|u| u.username.clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn usernames_with_status(&self, statuses: &[StatusId]) -> RegistryResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .users
            .values()
            .filter(|u| statuses.contains(&u.status))
            .map(|u| u.username.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn statuses(&self) -> RegistryResult<Vec<StatusRecord>> {
        Ok(self.state.lock().unwrap().statuses.clone())
    }

    async fn status(&self, id: StatusId) -> RegistryResult<StatusRecord> {
        let state = self.state.lock().unwrap();
        state
            .statuses
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::status_not_found(id.to_string()))
    }

    async fn lookup_status(&self, name: &str) -> RegistryResult<StatusId> {
        let state = self.state.lock().unwrap();
        state
            .statuses
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .ok_or_else(|| RegistryError::status_not_found(name))
    }

    async fn contact_kinds(&self) -> RegistryResult<Vec<String>> {
        Ok(self.state.lock().unwrap().kinds.clone())
    }

    async fn contacts(&self, user: UserId) -> RegistryResult<Vec<ContactEntry>> {
        Ok(self.get_contacts(user))
    }

    async fn create_contact(&self, draft: ContactDraft) -> RegistryResult<ContactId> {
        let mut state = self.state.lock().unwrap();
        let user = draft.user.ok_or_else(|| RegistryError::Constraint {
            message: "contact created without an owner".to_string(),
        })?;
        let id = ContactId(state.next_contact);
        state.next_contact += 1;
        state.contacts.insert(
            id.0,
            ContactEntry {
                id,
                user,
                kind: draft.kind,
                value: draft.value,
                order: draft.order,
            },
        );
        state.writes += 1;
        Ok(id)
    }

    async fn set_contact_order(&self, id: ContactId, order: u32) -> RegistryResult<()> {
        let mut state = self.state.lock().unwrap();
        let contact = state
            .contacts
            .get_mut(&id.0)
            .ok_or_else(|| RegistryError::contact_not_found(id.to_string()))?;
        contact.order = order;
        state.writes += 1;
        Ok(())
    }

    async fn retire_contact(&self, id: ContactId) -> RegistryResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .contacts
            .remove(&id.0)
            .ok_or_else(|| RegistryError::contact_not_found(id.to_string()))?;
        state.writes += 1;
        Ok(())
    }

    async fn photos(&self, user: UserId) -> RegistryResult<Vec<Photo>> {
        let state = self.state.lock().unwrap();
        Ok(state.photos.get(&user.0).cloned().unwrap_or_default())
    }

    async fn commit(&self) -> RegistryResult<()> {
        self.state.lock().unwrap().commits += 1;
        Ok(())
    }
}
