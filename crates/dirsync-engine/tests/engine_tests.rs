//! End-to-end engine tests over in-memory collaborators.
//!
//! Covers the engine's observable contracts: obsolescence handling,
//! idempotence, contact ordering, the change-count circuit breaker, rename
//! failure isolation and group priority tie-breaking.

mod common;

use std::sync::Arc;

use common::{MemoryDirectory, MemoryRegistry};

use dirsync_connector::DirectoryEntry;
use dirsync_engine::{SyncConfig, SyncError, SyncSession};
use dirsync_registry::{RegistryUser, StatusId, StatusRecord, UserId};

const STAFF_DN: &str = "CN=Staff,OU=Groups,DC=example,DC=com";
const PARTNERS_DN: &str = "CN=Partners,OU=Groups,DC=example,DC=com";

fn status(id: i64, name: &str, group: Option<&str>, priority: i32, roles: &[&str]) -> StatusRecord {
    StatusRecord {
        id: StatusId(id),
        name: name.to_string(),
        directory_group: group.map(str::to_string),
        group_priority: priority,
        roles: roles.iter().map(|r| (*r).to_string()).collect(),
        is_system: false,
    }
}

fn person_dn(first: &str, last: &str) -> String {
    format!("CN={first} {last},OU=Staff,DC=example,DC=com")
}

fn person(first: &str, last: &str, upn: &str, guid: u8) -> DirectoryEntry {
    DirectoryEntry::new(person_dn(first, last))
        .with_text("userPrincipalName", [upn])
        .with_text("givenName", [first])
        .with_text("sn", [last])
        .with_text("cn", [format!("{first} {last}")])
        .with_binary("objectGUID", vec![vec![guid; 16]])
}

fn registry_user(id: i64, username: &str, status: i64, first: &str, last: &str) -> RegistryUser {
    RegistryUser {
        id: UserId(id),
        username: username.to_string(),
        status: StatusId(status),
        roles: vec!["User".to_string()],
        first_name: Some(first.to_string()),
        last_name: Some(last.to_string()),
        domain: username.split_once('@').map(|(_, d)| d.to_string()),
        ..Default::default()
    }
}

fn world() -> (Arc<MemoryDirectory>, Arc<MemoryRegistry>) {
    common::init_tracing();
    let directory = Arc::new(MemoryDirectory::new());
    let registry = Arc::new(MemoryRegistry::new());

    registry.add_status(status(1, "obsolete", None, 0, &[]));
    registry.add_status(status(2, "active", Some("staff"), 5, &["User"]));
    registry.add_status(status(3, "external", Some("partners"), 2, &["External"]));
    registry.set_contact_kinds(&["email", "phone", "mobile", "fax"]);

    directory.add_group("staff", STAFF_DN, &[], &[]);
    directory.add_group("partners", PARTNERS_DN, &[], &[]);

    for (attribute, single) in [
        ("mail", true),
        ("telephoneNumber", true),
        ("mobile", true),
        ("pager", true),
        ("otherMobile", false),
        ("otherTelephone", false),
        ("otherPager", false),
    ] {
        directory.set_single_valued(attribute, single);
    }

    (directory, registry)
}

fn inbound_config() -> SyncConfig {
    SyncConfig {
        update_directory: false,
        ..SyncConfig::default()
    }
}

fn outbound_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.allowed_dn_suffixes.insert(
        "example.com".to_string(),
        vec!["dc=example,dc=com".to_string()],
    );
    config
}

async fn connect(
    directory: &Arc<MemoryDirectory>,
    registry: &Arc<MemoryRegistry>,
    config: SyncConfig,
) -> SyncSession {
    SyncSession::connect(directory.clone(), registry.clone(), config)
        .await
        .expect("session construction")
}

#[tokio::test]
async fn inbound_retires_user_without_group_and_changes_nothing_else() {
    let (directory, registry) = world();
    // Bob has a directory entry but belongs to no configured group.
    directory.add_entry(person("Bob", "Builder", "bob@example.com", 0x10));
    registry.add_user(registry_user(10, "bob@example.com", 2, "Bob", "Builder"));

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("bob@example.com")
        .await
        .unwrap();

    let bob = registry.get_user("bob@example.com").unwrap();
    assert_eq!(bob.status, StatusId(1));
    // No other attribute changes accompany the retirement.
    assert_eq!(bob.first_name.as_deref(), Some("Bob"));
    assert_eq!(bob.last_name.as_deref(), Some("Builder"));
    assert_eq!(bob.roles, vec!["User".to_string()]);
    assert_eq!(registry.write_count(), 1);
    assert_eq!(registry.commit_count(), 1);
}

#[tokio::test]
async fn inbound_already_obsolete_user_is_a_noop() {
    let (directory, registry) = world();
    registry.add_user(registry_user(10, "bob@example.com", 1, "Bob", "Builder"));

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("bob@example.com")
        .await
        .unwrap();

    assert_eq!(registry.write_count(), 0);
    assert!(session.changed_registry_users().is_empty());
}

#[tokio::test]
async fn inbound_creates_user_from_directory() {
    let (directory, registry) = world();
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01);
    let ada_dn = ada.dn().to_string();
    directory.add_entry(ada.with_text("mail", ["ada@example.com"]));
    directory.add_group("staff", STAFF_DN, &[&ada_dn], &[]);

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("ada@example.com")
        .await
        .unwrap();

    let ada = registry.get_user("ada@example.com").expect("user created");
    assert_eq!(ada.status, StatusId(2));
    assert_eq!(ada.roles, vec!["User".to_string()]);
    assert_eq!(ada.first_name.as_deref(), Some("Ada"));
    assert_eq!(ada.last_name.as_deref(), Some("Lovelace"));
    assert_eq!(ada.domain.as_deref(), Some("example.com"));
    assert_eq!(ada.guid.as_deref(), Some(hex::encode([0x01u8; 16]).as_str()));

    let contacts = registry.get_contacts(ada.id);
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].kind, "email");
    assert_eq!(contacts[0].value, "ada@example.com");
    assert_eq!(contacts[0].order, 1);
}

#[tokio::test]
async fn inbound_second_run_is_a_noop() {
    let (directory, registry) = world();
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01);
    let ada_dn = ada.dn().to_string();
    directory.add_entry(ada.with_text("mail", ["ada@example.com"]));
    directory.add_group("staff", STAFF_DN, &[&ada_dn], &[]);

    let mut first = connect(&directory, &registry, inbound_config()).await;
    first
        .sync_user_from_directory("ada@example.com")
        .await
        .unwrap();
    let writes_after_first = registry.write_count();
    assert!(writes_after_first > 0);

    let mut second = connect(&directory, &registry, inbound_config()).await;
    second
        .sync_user_from_directory("ada@example.com")
        .await
        .unwrap();

    assert!(second.changed_registry_users().is_empty());
    assert_eq!(registry.write_count(), writes_after_first);
}

#[tokio::test]
async fn inbound_contact_order_follows_primary_then_overflow() {
    let (directory, registry) = world();
    let carol = person("Carol", "Shaw", "carol@example.com", 0x02)
        .with_text("mobile", ["a"])
        .with_text("otherMobile", ["b", "c"]);
    let carol_dn = carol.dn().to_string();
    directory.add_entry(carol);
    directory.add_group("staff", STAFF_DN, &[&carol_dn], &[]);

    let id = registry.add_user(registry_user(20, "carol@example.com", 2, "Carol", "Shaw"));
    // Deliberately scrambled input row ordering.
    registry.add_contact(1, id, "mobile", "c", 1);
    registry.add_contact(2, id, "mobile", "a", 2);
    registry.add_contact(3, id, "mobile", "b", 3);

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("carol@example.com")
        .await
        .unwrap();

    let by_value = |value: &str| {
        registry
            .get_contacts(id)
            .into_iter()
            .find(|c| c.value == value)
            .unwrap()
    };
    assert_eq!(by_value("a").order, 1);
    assert_eq!(by_value("b").order, 2);
    assert_eq!(by_value("c").order, 3);
}

#[tokio::test]
async fn inbound_keeps_extra_email_rows_and_retires_stale_phone_rows() {
    let (directory, registry) = world();
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01)
        .with_text("mail", ["ada@example.com"]);
    let ada_dn = ada.dn().to_string();
    directory.add_entry(ada);
    directory.add_group("staff", STAFF_DN, &[&ada_dn], &[]);

    let id = registry.add_user(registry_user(30, "ada@example.com", 2, "Ada", "Lovelace"));
    registry.add_contact(1, id, "email", "ada@example.com", 1);
    registry.add_contact(2, id, "email", "ada@old.example", 7);
    registry.add_contact(3, id, "email", "countess@old.example", 9);
    // Mapped kind with no directory counterpart: retired.
    registry.add_contact(4, id, "phone", "555-0100", 1);
    // Kind outside the mapping registry: never touched.
    registry.add_contact(5, id, "fax", "555-0199", 4);

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("ada@example.com")
        .await
        .unwrap();

    let contacts = registry.get_contacts(id);
    let by_value = |value: &str| contacts.iter().find(|c| c.value == value);

    assert_eq!(by_value("ada@example.com").unwrap().order, 1);
    // Kept orphans are renumbered densely after the directory-sourced rows.
    assert_eq!(by_value("ada@old.example").unwrap().order, 2);
    assert_eq!(by_value("countess@old.example").unwrap().order, 3);
    assert!(by_value("555-0100").is_none());
    assert_eq!(by_value("555-0199").unwrap().order, 4);
}

#[tokio::test]
async fn sync_all_aborts_when_change_budget_is_exceeded() {
    let (directory, registry) = world();
    let carol = person("Carol", "Shaw", "carol@example.com", 0x02);
    let dave = person("Dave", "Cutler", "dave@example.com", 0x03);
    let dns = [carol.dn().to_string(), dave.dn().to_string()];
    directory.add_entry(carol);
    directory.add_entry(dave);
    directory.add_group("staff", STAFF_DN, &[&dns[0], &dns[1]], &[]);

    // Two users would be created; the budget allows one.
    let mut session = connect(&directory, &registry, inbound_config()).await;
    let err = session.sync_all_from_directory(Some(1)).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::BudgetExceeded {
            would_change: 2,
            max_changes: 1,
            ..
        }
    ));
    assert_eq!(registry.write_count(), 0);
    assert!(registry.get_user("carol@example.com").is_none());
    // The probe's change map stays around for inspection.
    assert_eq!(session.changed_registry_users().len(), 2);
}

#[tokio::test]
async fn sync_all_proceeds_within_change_budget() {
    let (directory, registry) = world();
    let carol = person("Carol", "Shaw", "carol@example.com", 0x02);
    let dave = person("Dave", "Cutler", "dave@example.com", 0x03);
    let dns = [carol.dn().to_string(), dave.dn().to_string()];
    directory.add_entry(carol);
    directory.add_entry(dave);
    directory.add_group("staff", STAFF_DN, &[&dns[0], &dns[1]], &[]);

    let mut session = connect(&directory, &registry, inbound_config()).await;
    let summary = session.sync_all_from_directory(Some(2)).await.unwrap();

    assert!(!summary.dry_run);
    assert_eq!(summary.users_changed, 2);
    // Exactly the two creations were written.
    assert_eq!(registry.write_count(), 2);
    assert!(registry.get_user("carol@example.com").is_some());
    assert!(registry.get_user("dave@example.com").is_some());
}

#[tokio::test]
async fn outbound_rename_failure_does_not_block_other_updates() {
    let (directory, registry) = world();
    // The directory still carries the old presentation name and title.
    let eve = DirectoryEntry::new("CN=Old Name,OU=Staff,DC=example,DC=com")
        .with_text("userPrincipalName", ["eve@example.com"])
        .with_text("cn", ["Old Name"])
        .with_text("displayName", ["Old Name"])
        .with_text("givenName", ["Eve"])
        .with_text("sn", ["Adams"])
        .with_text("title", ["Worker"])
        .with_text("employeeNumber", ["40"])
        .with_binary("objectGUID", vec![vec![0x04; 16]]);
    let eve_dn = eve.dn().to_string();
    directory.add_entry(eve);
    directory.add_group("staff", STAFF_DN, &[&eve_dn], &[]);
    directory.fail_renames();

    let mut eve_user = registry_user(40, "eve@example.com", 2, "Eve", "Adams");
    eve_user.title = Some("Boss".to_string());
    registry.add_user(eve_user);

    let mut session = connect(&directory, &registry, outbound_config()).await;
    session
        .sync_user_to_directory("eve@example.com")
        .await
        .unwrap();

    // The rename failed and was counted...
    assert!(directory.renames().is_empty());
    assert!(session.counters().errors >= 1);

    // ...but the remaining modifications were applied against the old DN.
    let modifications = directory.modifications();
    assert_eq!(modifications.len(), 1);
    let (dn, changes) = &modifications[0];
    assert!(dn.eq_ignore_ascii_case(&eve_dn));
    assert!(
        changes
            .iter()
            .any(|c| c.attribute == "title"
                && c.values.first().and_then(|v| v.as_text()) == Some("Boss"))
    );
    assert!(
        changes
            .iter()
            .any(|c| c.attribute == "displayName"
                && c.values.first().and_then(|v| v.as_text()) == Some("Eve Adams"))
    );

    let updated = directory.entry(&eve_dn).unwrap();
    assert_eq!(updated.value("title"), Some("Boss"));
}

#[tokio::test]
async fn outbound_rename_rewrites_dn_for_following_operations() {
    let (directory, registry) = world();
    let eve = DirectoryEntry::new("CN=Old Name,OU=Staff,DC=example,DC=com")
        .with_text("userPrincipalName", ["eve@example.com"])
        .with_text("cn", ["Old Name"])
        .with_text("displayName", ["Old Name"])
        .with_text("givenName", ["Eve"])
        .with_text("sn", ["Adams"])
        .with_text("employeeNumber", ["40"]);
    let old_dn = eve.dn().to_string();
    directory.add_entry(eve);
    directory.add_group("staff", STAFF_DN, &[&old_dn], &[]);

    registry.add_user(registry_user(40, "eve@example.com", 2, "Eve", "Adams"));

    let mut session = connect(&directory, &registry, outbound_config()).await;
    session
        .sync_user_to_directory("eve@example.com")
        .await
        .unwrap();

    assert_eq!(directory.renames().len(), 1);
    let modifications = directory.modifications();
    assert_eq!(modifications.len(), 1);
    // The modify went to the renamed DN.
    assert!(modifications[0]
        .0
        .eq_ignore_ascii_case("CN=Eve Adams,OU=Staff,DC=example,DC=com"));
}

#[tokio::test]
async fn outbound_pushes_budgeted_photo() {
    let (directory, registry) = world();
    let grace = DirectoryEntry::new("CN=Grace Hopper,OU=Staff,DC=example,DC=com")
        .with_text("userPrincipalName", ["grace@example.com"])
        .with_text("cn", ["Grace Hopper"])
        .with_text("givenName", ["Grace"])
        .with_text("sn", ["Hopper"])
        .with_text("employeeNumber", ["70"]);
    let grace_dn = grace.dn().to_string();
    directory.add_entry(grace);
    directory.add_group("staff", STAFF_DN, &[&grace_dn], &[]);

    let id = registry.add_user(registry_user(70, "grace@example.com", 2, "Grace", "Hopper"));

    // A PNG portrait in the registry; the directory wants budgeted JPEG.
    let portrait = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
        image::Rgb([x as u8 * 4, y as u8 * 4, 64])
    }));
    let mut png = Vec::new();
    portrait
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    registry.set_photos(id, vec![png]);

    let mut session = connect(&directory, &registry, outbound_config()).await;
    session
        .sync_user_to_directory("grace@example.com")
        .await
        .unwrap();

    let modifications = directory.modifications();
    assert_eq!(modifications.len(), 1);
    let photo_change = modifications[0]
        .1
        .iter()
        .find(|c| c.attribute == "thumbnailPhoto")
        .expect("photo pushed");
    let payload = photo_change.values[0].as_bytes();
    assert!(payload.len() <= 10_240);
    // JPEG magic: the payload was transcoded, not copied.
    assert_eq!(&payload[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn group_priority_tie_break_prefers_lowest_rank() {
    let (directory, registry) = world();
    registry.add_status(status(5, "guest", Some("guests"), 9, &["Guest"]));
    let guests_dn = "CN=Guests,OU=Groups,DC=example,DC=com";

    let frank = person("Frank", "Stone", "frank@example.com", 0x05);
    let frank_dn = frank.dn().to_string();
    directory.add_entry(frank);
    // Transitively in groups with ranks {5, 2, 9}.
    directory.add_group("staff", STAFF_DN, &[&frank_dn], &[]);
    directory.add_group("partners", PARTNERS_DN, &[&frank_dn], &[]);
    directory.add_group("guests", guests_dn, &[&frank_dn], &[]);

    registry.add_user(registry_user(50, "frank@example.com", 2, "Frank", "Stone"));

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session
        .sync_user_from_directory("frank@example.com")
        .await
        .unwrap();

    let frank = registry.get_user("frank@example.com").unwrap();
    // Rank 2 wins over ranks 5 and 9.
    assert_eq!(frank.status, StatusId(3));
    assert_eq!(frank.roles, vec!["External".to_string()]);
}

#[tokio::test]
async fn group_cycles_terminate_and_members_resolve() {
    let (directory, registry) = world();
    let sub_dn = "CN=Substaff,OU=Groups,DC=example,DC=com";
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01);
    let grace = person("Grace", "Hopper", "grace@example.com", 0x06);
    let dns = [ada.dn().to_string(), grace.dn().to_string()];
    directory.add_entry(ada);
    directory.add_entry(grace);

    // staff -> substaff -> staff cycle; one user at each level.
    directory.add_group("staff", STAFF_DN, &[&dns[0]], &[sub_dn]);
    directory.add_subgroup(sub_dn, &[&dns[1]], &[STAFF_DN]);

    let session = connect(&directory, &registry, inbound_config()).await;

    assert!(session.groups().status_for(&dns[0]).is_some());
    assert!(session.groups().status_for(&dns[1]).is_some());
}

#[tokio::test]
async fn dry_run_computes_changes_without_writing() {
    let (directory, registry) = world();
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01);
    let ada_dn = ada.dn().to_string();
    directory.add_entry(ada);
    directory.add_group("staff", STAFF_DN, &[&ada_dn], &[]);

    let mut session = connect(&directory, &registry, inbound_config())
        .await
        .with_dry_run(true);
    session
        .sync_user_from_directory("ada@example.com")
        .await
        .unwrap();

    assert_eq!(session.changed_registry_users().len(), 1);
    assert_eq!(registry.write_count(), 0);
    assert_eq!(registry.commit_count(), 0);
    assert!(registry.get_user("ada@example.com").is_none());
}

#[tokio::test]
async fn reserved_identities_are_never_touched() {
    let (directory, registry) = world();
    registry.add_user(registry_user(60, "admin", 2, "Site", "Admin"));

    let mut session = connect(&directory, &registry, inbound_config()).await;
    session.sync_user_from_directory("admin").await.unwrap();

    assert_eq!(registry.write_count(), 0);
    assert!(session.changed_registry_users().is_empty());
}

#[tokio::test]
async fn bind_as_user_verifies_directory_credentials() {
    let (directory, registry) = world();
    let ada = person("Ada", "Lovelace", "ada@example.com", 0x01);
    let ada_dn = ada.dn().to_string();
    directory.add_entry(ada);
    directory.set_password(&ada_dn, "correct horse");

    let mut session = connect(&directory, &registry, inbound_config()).await;
    assert!(
        session
            .bind_as_user("ada@example.com", "correct horse")
            .await
            .unwrap()
    );
    assert!(
        !session
            .bind_as_user("ada@example.com", "wrong")
            .await
            .unwrap()
    );
    assert!(!session.bind_as_user("nobody@example.com", "x").await.unwrap());
}
