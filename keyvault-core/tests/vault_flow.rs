//! End-to-end flows through the public vault API: cold start, export and
//! import across vaults, re-keying, and the audit bound.

use keyvault_core::{
    EntryFilter, ManualClock, MergePolicy, NewEntry, VaultError, VaultManager,
};
use std::sync::Arc;
use tempfile::TempDir;

fn record(service_name: &str, plaintext: &str) -> NewEntry {
    NewEntry {
        service_name: service_name.to_string(),
        plaintext: plaintext.to_string(),
        ..Default::default()
    }
}

#[test]
fn cold_start() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();

    let before = vault.status();
    assert!(!before.initialized);

    vault.initialize("correct horse battery staple").unwrap();

    let status = vault.status();
    assert!(status.initialized);
    assert!(!status.unlocked);
    assert_eq!(status.entry_count, 0);
    assert!(tmp.path().join("vault.json").exists());
}

#[test]
fn add_and_retrieve() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();

    let mut input = record("OpenAI", "sk-AAA");
    input.environment = "development".parse().unwrap();
    input.tags.insert("ai".to_string());
    let id = vault.add(input).unwrap();

    assert_eq!(vault.get(&id).unwrap().plaintext, "sk-AAA");

    let views = vault
        .list(&EntryFilter {
            environment: Some("development".parse().unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].service_name, "OpenAI");
}

#[test]
fn wrong_password_then_locked() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();

    assert!(matches!(vault.unlock("wrong"), Err(VaultError::BadPassword)));
    assert!(matches!(vault.get("anything"), Err(VaultError::Locked)));
}

#[test]
fn export_import_roundtrip_rekeys() {
    let tmp1 = TempDir::new().unwrap();
    let mut v1 = VaultManager::open(tmp1.path()).unwrap();
    v1.initialize("master-one").unwrap();
    v1.unlock("master-one").unwrap();
    let a = v1.add(record("Alpha", "α")).unwrap();
    v1.add(record("Beta", "β")).unwrap();

    let blob = v1.export("backup-pw").unwrap();

    // A fresh vault with a different master password.
    let tmp2 = TempDir::new().unwrap();
    let mut v2 = VaultManager::open(tmp2.path()).unwrap();
    v2.initialize("new-pw").unwrap();
    v2.unlock("new-pw").unwrap();

    let report = v2
        .import(&blob, "backup-pw", MergePolicy::SkipDuplicate)
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped, 0);

    // Ids were free in the fresh vault, so they were preserved, and the
    // imported entries decrypt under the new master.
    assert_eq!(v2.get(&a).unwrap().plaintext, "α");

    // The importing vault's envelopes answer to its own master password,
    // not the exporter's.
    let mut reopened = VaultManager::open(tmp2.path()).unwrap();
    assert!(matches!(
        reopened.unlock("master-one"),
        Err(VaultError::BadPassword)
    ));
    reopened.unlock("new-pw").unwrap();
    assert_eq!(reopened.get(&a).unwrap().plaintext, "α");
}

#[test]
fn import_wrong_backup_password() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();
    vault.add(record("Alpha", "a")).unwrap();

    let blob = vault.export("right").unwrap();
    assert!(matches!(
        vault.import(&blob, "wrong", MergePolicy::SkipDuplicate),
        Err(VaultError::BadBackupPassword)
    ));
}

#[test]
fn import_merge_policies() {
    let tmp1 = TempDir::new().unwrap();
    let mut source = VaultManager::open(tmp1.path()).unwrap();
    source.initialize("src").unwrap();
    source.unlock("src").unwrap();
    source.add(record("GitHub", "incoming-token")).unwrap();
    source.add(record("Fresh", "fresh-token")).unwrap();
    let blob = source.export("b").unwrap();

    // skip_duplicate keeps the resident secret.
    let tmp2 = TempDir::new().unwrap();
    let mut skip = VaultManager::open(tmp2.path()).unwrap();
    skip.initialize("dst").unwrap();
    skip.unlock("dst").unwrap();
    let resident = skip.add(record("github", "resident-token")).unwrap();
    let report = skip.import(&blob, "b", MergePolicy::SkipDuplicate).unwrap();
    assert_eq!((report.inserted, report.skipped), (1, 1));
    assert_eq!(skip.get(&resident).unwrap().plaintext, "resident-token");

    // overwrite replaces it.
    let tmp3 = TempDir::new().unwrap();
    let mut over = VaultManager::open(tmp3.path()).unwrap();
    over.initialize("dst").unwrap();
    over.unlock("dst").unwrap();
    let resident = over.add(record("GitHub", "resident-token")).unwrap();
    let report = over.import(&blob, "b", MergePolicy::Overwrite).unwrap();
    assert_eq!((report.inserted, report.overwritten), (1, 1));
    assert_eq!(over.get(&resident).unwrap().plaintext, "incoming-token");

    // rename keeps both.
    let tmp4 = TempDir::new().unwrap();
    let mut renamed = VaultManager::open(tmp4.path()).unwrap();
    renamed.initialize("dst").unwrap();
    renamed.unlock("dst").unwrap();
    renamed.add(record("GitHub", "resident-token")).unwrap();
    let report = renamed.import(&blob, "b", MergePolicy::Rename).unwrap();
    assert_eq!((report.inserted, report.renamed), (1, 1));
    let hits = renamed.search("github").unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().any(|v| v.service_name == "GitHub (2)"));
}

#[test]
fn auto_lock_scenario() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let mut vault = VaultManager::open_with_clock(tmp.path(), clock.clone()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();

    let mut settings = vault.settings().clone();
    settings.auto_lock_minutes = 1;
    vault.update_settings(settings).unwrap();

    clock.advance_ms(59_000);
    assert!(vault.list(&EntryFilter::default()).is_ok());

    clock.advance_ms(61_000);
    assert!(matches!(
        vault.list(&EntryFilter::default()),
        Err(VaultError::Locked)
    ));
}

#[test]
fn search_scenario() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();

    vault.add(record("Stripe Test", "a")).unwrap();
    vault.add(record("Stripe Live", "b")).unwrap();
    let mut ai = record("OpenAI", "c");
    ai.tags.insert("ai".to_string());
    vault.add(ai).unwrap();

    let stripes = vault.search("stripe").unwrap();
    let names: Vec<&str> = stripes.iter().map(|v| v.service_name.as_str()).collect();
    assert_eq!(stripes.len(), 2);
    assert!(names.contains(&"Stripe Test") && names.contains(&"Stripe Live"));

    let ai_hits = vault.search("ai").unwrap();
    assert!(ai_hits.iter().any(|v| v.service_name == "OpenAI"));
}

#[test]
fn audit_bound_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();

    let id = vault.add(record("Busy", "secret")).unwrap();
    for _ in 0..1500 {
        vault.record_usage(&id, None).unwrap();
    }

    let tail = vault.audit_tail(2000);
    assert_eq!(tail.len(), 1000);
    // Newest first.
    assert!(tail.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[test]
fn default_listing_order_across_entries() {
    let tmp = TempDir::new().unwrap();
    let mut vault = VaultManager::open(tmp.path()).unwrap();
    vault.initialize("pw").unwrap();
    vault.unlock("pw").unwrap();

    let plain = vault.add(record("Plain", "a")).unwrap();
    let used = vault.add(record("Used", "b")).unwrap();
    let mut fav = record("Fav", "c");
    fav.favorite = true;
    let fav = vault.add(fav).unwrap();

    vault.record_usage(&used, None).unwrap();

    let views = vault.list(&EntryFilter::default()).unwrap();
    let ids: Vec<&str> = views.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec![fav.as_str(), used.as_str(), plain.as_str()]);
}
