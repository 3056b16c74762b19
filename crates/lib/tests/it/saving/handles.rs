use std::time::Duration;

use keepsake::saving::{HandleMode, SaveName, SaveScope};

use crate::helpers::*;

#[tokio::test]
async fn second_open_fails_until_the_first_is_closed() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("world.json", "{}")]);

    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(saving.open_mode("slot-1"), Some(HandleMode::Read));
    for _ in 0..3 {
        assert!(saving.open_readable("slot-1").await.unwrap_err().is_conflict());
        assert!(saving.open_writable("slot-1").await.unwrap_err().is_conflict());
        assert!(saving.delete("slot-1").await.unwrap_err().is_conflict());
    }

    reader.close().await;
    // Closing twice is harmless
    reader.close().await;
    assert!(!saving.is_open("slot-1"));
    let writer = saving.open_writable("slot-1").await.unwrap();
    assert_eq!(saving.open_mode("slot-1"), Some(HandleMode::Write));
    drop(writer);
    assert!(saving.open_readable("slot-1").await.is_ok());
}

#[tokio::test]
async fn closed_handles_are_invalid() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("a", "1")]);

    let reader = saving.open_readable("slot-1").await.unwrap();
    reader.close().await;
    assert!(reader.read_file("a").await.unwrap_err().is_invalidated());
    assert!(reader.enumerate_files().await.unwrap_err().is_invalidated());
}

#[tokio::test]
async fn reading_files() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("slot-1").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, [("b", "2"), ("a", "1")]);

    let reader = saving.open_readable("slot-1").await.unwrap();
    assert_eq!(reader.enumerate_files().await.unwrap(), vec!["a", "b"]);
    assert!(reader.file_exists("a").await.unwrap());
    assert!(!reader.file_exists("c").await.unwrap());
    assert_eq!(reader.read_file("b").await.unwrap(), b"2");
    assert!(reader.read_file("c").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn empty_saves_read_as_corrupted() {
    let (storage, saving) = local_saving();
    let name = SaveName::new("broken").unwrap();
    storage.insert_archive(&SaveScope::Local, &name, Vec::<(String, Vec<u8>)>::new());

    let err = saving.open_readable("broken").await.unwrap_err();
    assert!(err.is_corruption());
    assert!(!err.is_io_error());
    // The failed open released its slot
    assert_eq!(saving.open_handle_count(), 0);
    saving.delete("broken").await.unwrap();
}

#[tokio::test]
async fn missing_saves_and_bad_names() {
    let (_storage, saving) = local_saving();
    assert!(saving.open_readable("nope").await.unwrap_err().is_not_found());
    assert!(saving.open_readable("Nope!").await.unwrap_err().is_programmer_error());
    assert!(saving.exists("UPPER").await.unwrap_err().is_programmer_error());
    assert_eq!(saving.open_handle_count(), 0);
}

#[tokio::test]
async fn storage_calls_are_serialized() {
    let (storage, saving) = local_saving();
    storage.set_latency(Duration::from_millis(2));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let saving = saving.clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("slot-{i}");
            let mut writer = saving.open_writable(&name).await.unwrap();
            writer.write_file("data", vec![i as u8]).unwrap();
            writer.commit().await.unwrap();
            let reader = saving.open_readable(&name).await.unwrap();
            assert_eq!(reader.read_file("data").await.unwrap(), vec![i as u8]);
        }));
    }
    for task in tasks {
        within(task).await.unwrap();
    }

    assert_eq!(storage.max_concurrent_calls(), 1);
    assert_eq!(saving.enumerate_names().await.unwrap().len(), 6);
}
