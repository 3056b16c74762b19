use keepsake::{
    Account,
    saving::{SaveName, SaveScope},
};

use crate::helpers::*;

#[tokio::test]
async fn committed_changes_become_visible() {
    let (storage, saving) = local_saving();

    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.write_file("world.json", b"{\"day\":1}".to_vec()).unwrap();
    writer.write_file("player.json", "{}").unwrap();
    // Not visible before commit
    assert_eq!(storage.archive_count(), 0);
    assert_eq!(
        writer.enumerate_files().await.unwrap(),
        vec!["player.json", "world.json"]
    );
    writer.commit().await.unwrap();
    assert!(!writer.is_valid());
    assert_eq!(saving.open_handle_count(), 0);

    assert!(saving.exists("slot-1").await.unwrap());
    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(
        reader.enumerate_files().await.unwrap(),
        vec!["player.json", "world.json"]
    );
}

#[tokio::test]
async fn failed_commit_keeps_the_previous_files() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("a", "1"), ("b", "2")]);

    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.delete_file("a").unwrap();
    writer.write_file("c", "3").unwrap();
    storage.fail_commits(1);
    assert!(writer.commit().await.unwrap_err().is_transient());

    // The slot is released even though the commit failed
    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(reader.enumerate_files().await.unwrap(), vec!["a", "b"]);
    reader.close().await;

    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.delete_file("a").unwrap();
    writer.write_file("c", "3").unwrap();
    writer.commit().await.unwrap();
    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(reader.enumerate_files().await.unwrap(), vec!["b", "c"]);
}

#[tokio::test]
async fn deleting_the_only_file_is_refused() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("save1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("only-file", "x")]);

    let mut writer = saving.open_writable("save1").await.unwrap();
    writer.delete_file("only-file").unwrap();
    let err = writer.commit().await.unwrap_err();
    assert!(err.is_programmer_error());

    assert_eq!(
        storage.files(&SaveScope::Local, &name).unwrap(),
        vec!["only-file"]
    );
    assert_eq!(saving.open_handle_count(), 0);
    // The handle is gone after a failed commit as well
    assert!(writer.write_file("x", "y").unwrap_err().is_invalidated());
}

#[tokio::test]
async fn empty_new_save_is_refused() {
    let (storage, saving) = local_saving();
    let writer_err = saving
        .open_writable("fresh")
        .await
        .unwrap()
        .commit()
        .await
        .unwrap_err();
    assert!(writer_err.is_programmer_error());
    assert_eq!(storage.archive_count(), 0);
}

#[tokio::test]
async fn later_staging_call_wins() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("a", "1")]);

    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.delete_file("a").unwrap();
    writer.write_file("a", "2").unwrap();
    writer.write_file("b", "3").unwrap();
    writer.delete_file("b").unwrap();
    writer.commit().await.unwrap();

    assert_eq!(storage.files(&SaveScope::Local, &name).unwrap(), vec!["a"]);
    assert_eq!(
        storage.contents(&SaveScope::Local, &name, "a").unwrap(),
        b"2"
    );
}

#[tokio::test]
async fn closing_discards_staged_changes() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("a", "1")]);

    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.write_file("a", "changed").unwrap();
    writer.close().await;
    assert!(writer.commit().await.unwrap_err().is_invalidated());

    assert_eq!(
        storage.contents(&SaveScope::Local, &name, "a").unwrap(),
        b"1"
    );
}

#[tokio::test]
async fn enumeration_waits_for_open_handles() {
    let (_storage, saving) = local_saving();
    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.write_file("a", "1").unwrap();
    assert!(saving.enumerate_names().await.unwrap_err().is_conflict());
    writer.commit().await.unwrap();

    let names = saving.enumerate_names().await.unwrap();
    assert_eq!(names, vec![SaveName::new("slot-1").unwrap()]);

    saving.delete("slot-1").await.unwrap();
    assert!(!saving.exists("slot-1").await.unwrap());
}

#[tokio::test]
async fn account_saves_are_separate_from_local_saves() {
    let (storage, local) = local_saving();
    let a = Account::new("steam:a", "A");
    let registry = keepsake::AccountRegistry::new();
    sign_in(&registry, &[&a], None).await;
    let account_saving = keepsake::SavingSystem::for_account(
        &a,
        storage.clone(),
        keepsake::config::SavingConfig::default(),
    )
    .unwrap();
    assert_eq!(account_saving.scope(), &SaveScope::Account("steam:a".to_string()));

    let mut writer = account_saving.open_writable("slot-1").await.unwrap();
    writer.write_file("a", "1").unwrap();
    writer.commit().await.unwrap();
    // Same name, different scope: no conflict and no shared content
    assert!(!local.exists("slot-1").await.unwrap());
    let mut local_writer = local.open_writable("slot-1").await.unwrap();
    local_writer.write_file("b", "2").unwrap();
    local_writer.commit().await.unwrap();

    assert_eq!(
        storage.files(&SaveScope::account(&a), &SaveName::new("slot-1").unwrap()),
        Some(vec!["a".to_string()])
    );
}

#[tokio::test]
async fn account_saves_survive_signing_in_again() {
    let storage = std::sync::Arc::new(keepsake::memory::MemoryStorage::new());
    let registry = keepsake::AccountRegistry::new();
    let first = Account::new("steam:1", "Ada");
    sign_in(&registry, &[&first], Some(&first)).await;
    let saving = keepsake::SavingSystem::for_account(
        &first,
        storage.clone(),
        keepsake::config::SavingConfig::default(),
    )
    .unwrap();
    let mut writer = saving.open_writable("slot-1").await.unwrap();
    writer.write_file("world.json", "{}").unwrap();
    writer.commit().await.unwrap();

    registry.sign_out(&first).await.unwrap();
    assert!(saving.enumerate_names().await.unwrap_err().is_invalidated());

    // A new sign-in of the same identity gets a new account with the same saves
    let second = Account::new("steam:1", "Ada");
    assert_ne!(first.id(), second.id());
    sign_in(&registry, &[&second], Some(&second)).await;
    let saving = keepsake::SavingSystem::for_account(
        &second,
        storage.clone(),
        keepsake::config::SavingConfig::default(),
    )
    .unwrap();
    assert_eq!(
        saving.enumerate_names().await.unwrap(),
        vec![SaveName::new("slot-1").unwrap()]
    );
    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(reader.read_file("world.json").await.unwrap(), b"{}");
    assert_eq!(storage.archive_count(), 1);

    // Another identity does not see them
    let other = Account::new("steam:2", "Bob");
    sign_in(&registry, &[&other], None).await;
    let other_saving = keepsake::SavingSystem::for_account(
        &other,
        storage,
        keepsake::config::SavingConfig::default(),
    )
    .unwrap();
    assert!(other_saving.enumerate_names().await.unwrap().is_empty());
}
