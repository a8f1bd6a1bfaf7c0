use harvester_core::{ItemIdentity, ObjectCategory};
use harvester_engine::{extract_pagination, scan_feed, FeedError};
use pretty_assertions::assert_eq;
use quick_xml::events::Event;
use quick_xml::Reader;

const USERS_PAGE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:api="http://www.symplectic.co.uk/publications/api">
  <api:schema-version>4.9</api:schema-version>
  <api:pagination results-count="3" items-per-page="50">
    <api:page position="this" href="https://elements.example.org/secure-api/users?per-page=50"/>
    <api:page position="next" href="https://elements.example.org/secure-api/users?per-page=50&amp;after-id=2"/>
  </api:pagination>
  <entry>
    <title>First</title>
    <api:object category="user" id="1" type="person">
      <api:photo href="https://elements.example.org/secure-api/users/1/photo?type=original"/>
    </api:object>
  </entry>
  <entry>
    <api:object category="publication" id="2">
      <api:photo href="https://elements.example.org/ignored"/>
    </api:object>
  </entry>
  <entry>
    <api:deleted-object category="user" id="3"/>
  </entry>
</feed>"#;

#[test]
fn pagination_is_read_and_reader_continues_after_it() {
    let mut reader = Reader::from_reader(USERS_PAGE.as_bytes());
    let pagination = extract_pagination(&mut reader).unwrap();

    assert_eq!(pagination.items_per_page, Some(50));
    assert_eq!(
        pagination.next.as_deref(),
        Some("https://elements.example.org/secure-api/users?per-page=50&after-id=2")
    );
    assert!(!pagination.is_final_page());

    // The next element the reader sees is the first entry.
    let mut buf = Vec::new();
    let next_element = loop {
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(e) => break String::from_utf8(e.local_name().as_ref().to_vec()).unwrap(),
            Event::Eof => panic!("feed ended early"),
            _ => {}
        }
        buf.clear();
    };
    assert_eq!(next_element, "entry");
}

#[test]
fn feed_without_pagination_is_final_page() {
    let xml = r#"<feed><entry><api:user-group id="5"/></entry></feed>"#;
    let mut reader = Reader::from_reader(xml.as_bytes());
    let pagination = extract_pagination(&mut reader).unwrap();
    assert!(pagination.is_final_page());
    assert_eq!(pagination.items_per_page, None);
}

#[test]
fn pagination_of_non_feed_is_an_error() {
    let mut reader = Reader::from_reader(&b"<error>nope</error>"[..]);
    assert_eq!(
        extract_pagination(&mut reader),
        Err(FeedError::NotAFeed("error".to_string()))
    );
}

#[test]
fn scan_splits_entries_and_reads_schema_version() {
    let page = scan_feed(USERS_PAGE.as_bytes()).unwrap();

    assert_eq!(page.schema_version.as_deref(), Some("4.9"));
    assert_eq!(page.pagination.items_per_page, Some(50));
    let identities: Vec<_> = page.entries.iter().map(|e| (e.identity, e.deleted)).collect();
    assert_eq!(
        identities,
        vec![
            (ItemIdentity::object(ObjectCategory::User, 1), false),
            (ItemIdentity::object(ObjectCategory::Publication, 2), false),
            (ItemIdentity::object(ObjectCategory::User, 3), true),
        ]
    );

    // Photos are only kept for users.
    assert_eq!(
        page.entries[0].photo_url.as_deref(),
        Some("https://elements.example.org/secure-api/users/1/photo?type=original")
    );
    assert_eq!(page.entries[1].photo_url, None);
}

#[test]
fn captured_entries_are_standalone_documents() {
    let page = scan_feed(USERS_PAGE.as_bytes()).unwrap();
    let xml = String::from_utf8(page.entries[0].xml.clone()).unwrap();

    assert!(xml.starts_with("<entry"));
    assert!(xml.ends_with("</entry>"));
    assert!(xml.contains(r#"xmlns:api="http://www.symplectic.co.uk/publications/api""#));
    assert!(xml.contains(r#"<api:object category="user" id="1" type="person">"#));
    assert!(xml.contains("<title>First</title>"));
    assert!(!xml.contains(r#"id="2""#));

    // Each captured entry parses on its own.
    let reparsed = scan_feed(format!("<feed>{xml}</feed>").as_bytes()).unwrap();
    assert_eq!(reparsed.entries.len(), 1);
    assert_eq!(reparsed.entries[0].identity, page.entries[0].identity);
}

#[test]
fn relationship_feeds_identify_relationships() {
    let xml = r#"<feed xmlns:api="urn:api">
        <entry><api:relationship id="10" type-id="8"/></entry>
        <entry><api:deleted-relationship id="11"/></entry>
        <entry><api:relationship-type id="8"/></entry>
    </feed>"#;
    let page = scan_feed(xml.as_bytes()).unwrap();
    let identities: Vec<_> = page.entries.iter().map(|e| (e.identity, e.deleted)).collect();
    assert_eq!(
        identities,
        vec![
            (ItemIdentity::Relationship(10), false),
            (ItemIdentity::Relationship(11), true),
            (ItemIdentity::RelationshipType(8), false),
        ]
    );
}

#[test]
fn truncated_entry_is_an_error() {
    let err = scan_feed(br#"<feed><entry><object category="user" id="1">"#).unwrap_err();
    assert!(matches!(err, FeedError::TruncatedEntry | FeedError::Xml { .. }));
}
