//! LDAP directory implementation.
//!
//! Implements the `dirsync-connector` capability traits over `ldap3`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use dirsync_connector::entry::DirectoryEntry;
use dirsync_connector::error::{DirectoryError, DirectoryResult};
use dirsync_connector::ops::{AttributeChange, ModifyOp, RenameRequest};
use dirsync_connector::traits::{
    DirectoryModify, DirectorySchema, DirectorySearch, DirectoryService, EntryPages,
    GroupExpansion, GroupMembers,
};

use crate::config::LdapConfig;
use crate::filter;

/// The recursive "in transitive chain" matching rule understood by Active
/// Directory. Servers without it still answer with direct members, which the
/// engine's breadth-first traversal handles the same way.
const TRANSITIVE_MEMBER_RULE: &str = "memberOf:1.2.840.113556.1.4.1941:";

/// No-attributes request per RFC 4511.
const NO_ATTRS: &str = "1.1";

/// LDAP-backed directory for the reconciliation engine.
pub struct LdapDirectory {
    config: LdapConfig,
    display_name: String,

    /// Cached connection handle (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,

    /// Attribute multiplicity map parsed from the server sub-schema,
    /// keyed by lowercased attribute name (lazily initialized).
    single_valued: Arc<RwLock<Option<HashMap<String, bool>>>>,
}

impl LdapDirectory {
    /// Create a new directory handle with the given configuration.
    pub fn new(config: LdapConfig) -> DirectoryResult<Self> {
        config.validate()?;
        let display_name = format!("LDAP: {}", config.uri);
        Ok(Self {
            config,
            display_name,
            connection: Arc::new(RwLock::new(None)),
            single_valued: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the cached connection handle, creating one if necessary.
    async fn handle(&self) -> DirectoryResult<Ldap> {
        {
            let guard = self.connection.read().await;
            if let Some(ref ldap) = *guard {
                return Ok(ldap.clone());
            }
        }

        let ldap = self.create_connection(&self.config.bind_dn, &self.config.bind_password).await?;

        {
            let mut guard = self.connection.write().await;
            *guard = Some(ldap.clone());
        }

        Ok(ldap)
    }

    /// Open a connection, negotiate TLS per policy and bind.
    async fn create_connection(&self, bind_dn: &str, password: &str) -> DirectoryResult<Ldap> {
        debug!(uri = %self.config.uri, "Connecting to directory");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(
                self.config.connection_timeout_secs,
            ))
            .set_starttls(self.config.wants_starttls());

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.uri)
            .await
            .map_err(|e| {
                DirectoryError::connection_failed_with_source(
                    format!("failed to connect to {}", self.config.uri),
                    e,
                )
            })?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        debug!(bind_dn = %bind_dn, "Performing bind");
        let result = ldap.simple_bind(bind_dn, password).await.map_err(|e| {
            DirectoryError::connection_failed_with_source(
                format!("bind failed for {bind_dn}"),
                e,
            )
        })?;

        if result.rc == 49 {
            return Err(DirectoryError::AuthenticationFailed);
        }
        if result.rc != 0 {
            return Err(DirectoryError::connection_failed(format!(
                "bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(uri = %self.config.uri, tls = self.config.uses_ldaps() || self.config.wants_starttls(),
            "Directory connection established");

        Ok(ldap)
    }

    /// Run a subtree search and convert the results.
    async fn search_subtree(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        let mut ldap = self.handle().await?;
        let result = ldap
            .search(&self.config.base_dn, Scope::Subtree, filter, attributes)
            .await
            .map_err(|e| DirectoryError::operation_failed("search", e.to_string()))?;

        let (rows, _res) = result
            .success()
            .map_err(|e| DirectoryError::operation_failed("search", e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| to_entry(SearchEntry::construct(row)))
            .collect())
    }

    /// Run a search that must return at most one entry.
    async fn find_one(&self, filter: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let mut entries = self.search_subtree(filter, &all_attributes()).await?;
        match entries.len() {
            0 => Ok(None),
            1 => Ok(entries.pop()),
            count => Err(DirectoryError::AmbiguousResult {
                filter: filter.to_string(),
                count,
            }),
        }
    }

    /// Collect the DNs matched by a filter, without attributes.
    async fn search_dns(&self, filter: &str) -> DirectoryResult<Vec<String>> {
        let entries = self
            .search_subtree(filter, &[NO_ATTRS.to_string()])
            .await?;
        Ok(entries.into_iter().map(|e| e.dn().to_string()).collect())
    }

    /// Load the attribute multiplicity map from the server sub-schema.
    async fn load_schema(&self) -> DirectoryResult<HashMap<String, bool>> {
        let mut ldap = self.handle().await?;

        // The root DSE names the sub-schema subentry.
        let result = ldap
            .search(
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["subschemaSubentry"],
            )
            .await
            .map_err(|e| DirectoryError::SchemaDiscoveryFailed {
                message: format!("root DSE read failed: {e}"),
            })?;
        let (rows, _) = result
            .success()
            .map_err(|e| DirectoryError::SchemaDiscoveryFailed {
                message: format!("root DSE read failed: {e}"),
            })?;

        let subschema_dn = rows
            .into_iter()
            .next()
            .map(|row| to_entry(SearchEntry::construct(row)))
            .and_then(|e| e.value("subschemaSubentry").map(str::to_string))
            .ok_or_else(|| DirectoryError::SchemaDiscoveryFailed {
                message: "root DSE does not advertise a subschemaSubentry".to_string(),
            })?;

        let result = ldap
            .search(
                &subschema_dn,
                Scope::Base,
                "(objectClass=subschema)",
                vec!["attributeTypes"],
            )
            .await
            .map_err(|e| DirectoryError::SchemaDiscoveryFailed {
                message: format!("sub-schema read failed: {e}"),
            })?;
        let (rows, _) = result
            .success()
            .map_err(|e| DirectoryError::SchemaDiscoveryFailed {
                message: format!("sub-schema read failed: {e}"),
            })?;

        let mut map = HashMap::new();
        for row in rows {
            let entry = to_entry(SearchEntry::construct(row));
            if let Some(definitions) = entry.values("attributeTypes") {
                for definition in definitions {
                    if let Some((names, single)) = parse_attribute_type(definition) {
                        for name in names {
                            map.insert(name.to_lowercase(), single);
                        }
                    }
                }
            }
        }

        debug!(attribute_types = map.len(), "Loaded directory attribute schema");
        Ok(map)
    }
}

/// Convert an `ldap3` search entry into the connector read view.
fn to_entry(raw: SearchEntry) -> DirectoryEntry {
    let mut entry = DirectoryEntry::new(raw.dn);
    for (name, values) in raw.attrs {
        entry.set_text(&name, values);
    }
    for (name, values) in raw.bin_attrs {
        entry.set_binary(&name, values);
    }
    entry
}

fn all_attributes() -> Vec<String> {
    vec!["*".to_string()]
}

/// Parse one `attributeTypes` sub-schema definition.
///
/// Returns the declared names and whether the attribute is single-valued,
/// e.g. `( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name SINGLE-VALUE )`.
pub(crate) fn parse_attribute_type(definition: &str) -> Option<(Vec<String>, bool)> {
    let name_idx = definition.find("NAME")?;
    let after = definition[name_idx + 4..].trim_start();

    let mut names = Vec::new();
    if let Some(rest) = after.strip_prefix('(') {
        // NAME ( 'a' 'b' ) form
        let end = rest.find(')')?;
        let list = &rest[..end];
        let mut cursor = list;
        while let Some(start) = cursor.find('\'') {
            let tail = &cursor[start + 1..];
            let close = tail.find('\'')?;
            names.push(tail[..close].to_string());
            cursor = &tail[close + 1..];
        }
    } else if let Some(rest) = after.strip_prefix('\'') {
        let close = rest.find('\'')?;
        names.push(rest[..close].to_string());
    }

    if names.is_empty() {
        return None;
    }
    Some((names, definition.contains("SINGLE-VALUE")))
}

#[async_trait]
impl DirectoryService for LdapDirectory {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn bind(&self) -> DirectoryResult<()> {
        self.handle().await.map(|_| ())
    }

    async fn rebind(&self, dn: &str, password: &str) -> DirectoryResult<bool> {
        // Empty passwords would be treated as an anonymous bind by the
        // server and must never verify a user.
        if password.is_empty() {
            return Ok(false);
        }
        // A separate short-lived connection keeps the service bind intact.
        match self.create_connection(dn, password).await {
            Ok(mut ldap) => {
                let _ = ldap.unbind().await;
                Ok(true)
            }
            Err(DirectoryError::AuthenticationFailed) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DirectorySearch for LdapDirectory {
    async fn search(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> DirectoryResult<Vec<DirectoryEntry>> {
        self.search_subtree(filter, attributes).await
    }

    async fn find_user(&self, username: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        // Domain-qualified names match the principal name; bare names use
        // the legacy short account attribute.
        let name_attr = if username.contains('@') {
            &self.config.username_attribute
        } else {
            &self.config.account_name_attribute
        };
        let query = filter::and(&[
            filter::eq(name_attr, username),
            filter::eq("objectclass", &self.config.object_class),
        ]);
        self.find_one(&query).await
    }

    async fn find_by_guid(&self, guid_hex: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let bytes = hex::decode(guid_hex).map_err(|e| {
            DirectoryError::operation_failed("guid search", format!("invalid guid hex: {e}"))
        })?;
        let query = format!(
            "(&({}={})(objectclass={}))",
            self.config.guid_attribute,
            filter::escape_binary(&bytes),
            self.config.object_class,
        );
        self.find_one(&query).await
    }

    async fn entry_by_dn(&self, dn: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let mut ldap = self.handle().await?;
        let result = ldap
            .search(dn, Scope::Base, "(objectclass=*)", all_attributes())
            .await
            .map_err(|e| DirectoryError::operation_failed("base search", e.to_string()))?;

        match result.success() {
            Ok((rows, _)) => Ok(rows
                .into_iter()
                .next()
                .map(|row| to_entry(SearchEntry::construct(row)))),
            // noSuchObject: the DN does not exist
            Err(ldap3::LdapError::LdapResult { result }) if result.rc == 32 => Ok(None),
            Err(e) => Err(DirectoryError::operation_failed("base search", e.to_string())),
        }
    }

    async fn all_users(&self, attributes: &[String]) -> DirectoryResult<Box<dyn EntryPages>> {
        let ldap = self.handle().await?;
        Ok(Box::new(LdapPagedCursor {
            ldap,
            base_dn: self.config.base_dn.clone(),
            filter: filter::eq("objectclass", &self.config.object_class),
            attributes: attributes.to_vec(),
            page_size: self.config.page_size as i32,
            cookie: Vec::new(),
            done: false,
        }))
    }
}

/// Lazy page sequence over a paged-results search.
struct LdapPagedCursor {
    ldap: Ldap,
    base_dn: String,
    filter: String,
    attributes: Vec<String>,
    page_size: i32,
    cookie: Vec<u8>,
    done: bool,
}

#[async_trait]
impl EntryPages for LdapPagedCursor {
    async fn next_page(&mut self) -> DirectoryResult<Option<Vec<DirectoryEntry>>> {
        if self.done {
            return Ok(None);
        }

        let control = PagedResults {
            size: self.page_size,
            cookie: self.cookie.clone(),
        };
        let result = self
            .ldap
            .with_controls(control)
            .search(&self.base_dn, Scope::Subtree, &self.filter, &self.attributes)
            .await
            .map_err(|e| DirectoryError::operation_failed("paged search", e.to_string()))?;

        let (rows, res) = result
            .success()
            .map_err(|e| DirectoryError::operation_failed("paged search", e.to_string()))?;

        self.cookie.clear();
        for Control(control_type, raw) in &res.ctrls {
            if matches!(control_type, Some(ControlType::PagedResults)) {
                let parsed: PagedResults = raw.parse();
                self.cookie = parsed.cookie;
            }
        }
        if self.cookie.is_empty() {
            self.done = true;
        }

        let entries: Vec<DirectoryEntry> = rows
            .into_iter()
            .map(|row| to_entry(SearchEntry::construct(row)))
            .collect();

        if entries.is_empty() && self.done {
            return Ok(None);
        }
        Ok(Some(entries))
    }
}

#[async_trait]
impl DirectoryModify for LdapDirectory {
    async fn modify(&self, dn: &str, changes: Vec<AttributeChange>) -> DirectoryResult<()> {
        let mut mods: Vec<Mod<Vec<u8>>> = Vec::with_capacity(changes.len());
        for change in changes {
            let attribute = change.attribute.clone().into_bytes();
            let values: HashSet<Vec<u8>> = change
                .values
                .iter()
                .map(|v| v.as_bytes().to_vec())
                .collect();
            mods.push(match change.op {
                ModifyOp::Add => Mod::Add(attribute, values),
                ModifyOp::Replace => Mod::Replace(attribute, values),
                ModifyOp::Delete => Mod::Delete(attribute, HashSet::new()),
            });
        }

        if mods.is_empty() {
            return Ok(());
        }

        let mut ldap = self.handle().await?;
        let result = ldap
            .modify(dn, mods)
            .await
            .map_err(|e| DirectoryError::operation_failed("modify", e.to_string()))?;

        if result.rc == 32 {
            return Err(DirectoryError::entry_not_found(dn));
        }
        if result.rc != 0 {
            return Err(DirectoryError::operation_failed(
                "modify",
                format!("code {}: {}", result.rc, result.text),
            ));
        }

        debug!(dn = %dn, "Directory entry modified");
        Ok(())
    }

    async fn rename(&self, request: &RenameRequest) -> DirectoryResult<()> {
        let mut ldap = self.handle().await?;
        let result = ldap
            .modifydn(&request.dn, &request.new_rdn, true, None)
            .await
            .map_err(|e| DirectoryError::operation_failed("rename", e.to_string()))?;

        if result.rc == 32 {
            return Err(DirectoryError::entry_not_found(&request.dn));
        }
        if result.rc != 0 {
            return Err(DirectoryError::operation_failed(
                "rename",
                format!("code {}: {}", result.rc, result.text),
            ));
        }

        info!(dn = %request.dn, new_rdn = %request.new_rdn, "Directory entry renamed");
        Ok(())
    }
}

#[async_trait]
impl DirectorySchema for LdapDirectory {
    async fn is_single_valued(&self, attribute: &str) -> DirectoryResult<bool> {
        {
            let guard = self.single_valued.read().await;
            if let Some(ref map) = *guard {
                return Ok(map.get(&attribute.to_lowercase()).copied().unwrap_or(false));
            }
        }

        let map = self.load_schema().await?;
        let single = map.get(&attribute.to_lowercase()).copied().unwrap_or(false);

        let mut guard = self.single_valued.write().await;
        *guard = Some(map);

        Ok(single)
    }
}

#[async_trait]
impl GroupExpansion for LdapDirectory {
    async fn find_group(&self, name: &str) -> DirectoryResult<Option<DirectoryEntry>> {
        let query = filter::and(&[
            filter::eq(&self.config.group_name_attribute, name),
            filter::eq("objectclass", &self.config.group_object_class),
        ]);
        self.find_one(&query).await
    }

    async fn expand_group(&self, group_dn: &str) -> DirectoryResult<GroupMembers> {
        let member_filter = |object_class: &str| {
            format!(
                "(&({}={})(objectclass={}))",
                TRANSITIVE_MEMBER_RULE,
                filter::escape_value(group_dn),
                object_class,
            )
        };

        let users = self.search_dns(&member_filter(&self.config.object_class)).await?;
        let groups = self
            .search_dns(&member_filter(&self.config.group_object_class))
            .await?;

        debug!(group = %group_dn, users = users.len(), subgroups = groups.len(),
            "Expanded group membership");

        Ok(GroupMembers { users, groups })
    }
}
