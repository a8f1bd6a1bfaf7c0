use std::fs;
use std::io::Read;

use harvester_core::{ItemIdentity, ObjectCategory};
use harvester_engine::{ensure_dir, AtomicFileWriter, FileItemStore, ItemStore, ResourceType};
use tempfile::TempDir;

#[test]
fn creates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("out");
    assert!(!new_dir.exists());
    ensure_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_replaces_existing() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path());

    let first = writer.write("state.ron", "one").unwrap();
    assert_eq!(first.file_name().unwrap(), "state.ron");
    assert_eq!(fs::read_to_string(&first).unwrap(), "one");

    let second = writer.write("state.ron", "two").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "two");
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    assert!(writer.write("item.xml", "data").is_err());
    assert!(!file_path.with_file_name("item.xml").exists());
}

#[test]
fn file_store_round_trips_and_deletes() {
    let temp = TempDir::new().unwrap();
    let store = FileItemStore::new(temp.path());
    let grant = ItemIdentity::object(ObjectCategory::Grant, 77);

    let item = store
        .store_item(&grant, ResourceType::RAW_OBJECT, b"<entry/>")
        .unwrap();
    let path = item.path.clone().unwrap();
    assert_eq!(path, temp.path().join("raw").join("grant").join("77.xml"));

    let mut text = String::new();
    store.open(&item).unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "<entry/>");

    assert!(store.delete_item(&grant, ResourceType::RAW_OBJECT).unwrap());
    assert!(!path.exists());
    assert!(!store.delete_item(&grant, ResourceType::RAW_OBJECT).unwrap());
    assert!(store.open(&item).err().unwrap().is_not_found());
}

#[test]
fn file_store_separates_kinds() {
    let temp = TempDir::new().unwrap();
    let store = FileItemStore::new(temp.path());

    store
        .store_item(&ItemIdentity::Relationship(5), ResourceType::RAW_RELATIONSHIP, b"r")
        .unwrap();
    store
        .store_item(&ItemIdentity::Group(5), ResourceType::RAW_GROUP, b"g")
        .unwrap();
    store
        .store_item(&ItemIdentity::Group(5), ResourceType::TRANSLATED_GROUP, b"t")
        .unwrap();

    assert_eq!(
        fs::read_to_string(store.item_path(&ItemIdentity::Relationship(5), ResourceType::RAW_RELATIONSHIP)).unwrap(),
        "r"
    );
    assert_eq!(
        fs::read_to_string(store.item_path(&ItemIdentity::Group(5), ResourceType::RAW_GROUP)).unwrap(),
        "g"
    );
    assert_eq!(
        fs::read_to_string(store.item_path(&ItemIdentity::Group(5), ResourceType::TRANSLATED_GROUP)).unwrap(),
        "t"
    );
    assert!(store
        .store_item(&ItemIdentity::Group(5), ResourceType::RAW_RELATIONSHIP, b"x")
        .is_err());
}
