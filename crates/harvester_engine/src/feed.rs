//! Streaming reads of feed pages.
//!
//! [`extract_pagination`] pulls only the pagination element out of a feed and
//! leaves the reader positioned right after it. [`scan_feed`] makes one pass
//! over a whole page and also splits out its entries.

use std::io::BufRead;

use engine_logging::engine_warn;
use harvester_core::{ItemIdentity, ObjectCategory, PaginationState};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("malformed feed xml at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("document root is <{0}>, expected <feed>")]
    NotAFeed(String),
    #[error("feed ended inside an entry")]
    TruncatedEntry,
}

/// One entry of a feed page, as a standalone XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub identity: ItemIdentity,
    /// Entry describes a deleted item.
    pub deleted: bool,
    /// Photo link of a full-detail user record.
    pub photo_url: Option<String>,
    pub xml: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedPage {
    pub pagination: PaginationState,
    pub schema_version: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Reads forward to the pagination element of a feed and returns its links.
///
/// Stops right after `</pagination>` so the caller can keep reading. A feed
/// without pagination yields an empty state, which marks the final page.
pub fn extract_pagination<R: BufRead>(
    reader: &mut Reader<R>,
) -> Result<PaginationState, FeedError> {
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(reader, err))?;
        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 1 {
                    check_root(&e)?;
                } else if depth == 2 && e.local_name().as_ref() == b"pagination" {
                    return read_pagination(reader, &e);
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    check_root(&e)?;
                    return Ok(PaginationState::default());
                }
                if depth == 1 && e.local_name().as_ref() == b"pagination" {
                    return Ok(pagination_from(&e));
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(PaginationState::default());
                }
            }
            Event::Eof => return Ok(PaginationState::default()),
            _ => {}
        }
        buf.clear();
    }
}

/// Single pass over a feed page: pagination, schema version and entries.
///
/// Entries whose item element cannot be identified are skipped with a warning.
pub fn scan_feed(bytes: &[u8]) -> Result<FeedPage, FeedError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut page = FeedPage::default();
    let mut namespaces = Vec::new();
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(&reader, err))?;
        match event {
            Event::Start(e) => {
                depth += 1;
                if depth == 1 {
                    check_root(&e)?;
                    namespaces = namespace_declarations(&e);
                } else if depth == 2 {
                    // Each reader below consumes through the matching end tag.
                    match e.local_name().as_ref() {
                        b"pagination" => {
                            page.pagination = read_pagination(&mut reader, &e)?;
                            depth -= 1;
                        }
                        b"schema-version" => {
                            page.schema_version = Some(read_text(&mut reader)?);
                            depth -= 1;
                        }
                        b"entry" => {
                            if let Some(entry) = capture_entry(&mut reader, &e, &namespaces)? {
                                page.entries.push(entry);
                            }
                            depth -= 1;
                        }
                        _ => {}
                    }
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    check_root(&e)?;
                } else if depth == 1 && e.local_name().as_ref() == b"pagination" {
                    page.pagination = pagination_from(&e);
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

fn check_root(e: &BytesStart) -> Result<(), FeedError> {
    if e.local_name().as_ref() == b"feed" {
        Ok(())
    } else {
        Err(FeedError::NotAFeed(
            String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ))
    }
}

fn pagination_from(e: &BytesStart) -> PaginationState {
    PaginationState {
        items_per_page: attribute(e, "items-per-page").and_then(|v| v.trim().parse().ok()),
        ..PaginationState::default()
    }
}

fn read_pagination<R: BufRead>(
    reader: &mut Reader<R>,
    start: &BytesStart,
) -> Result<PaginationState, FeedError> {
    let mut state = pagination_from(start);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(reader, err))?;
        match event {
            Event::Start(e) => {
                depth += 1;
                record_page_link(&mut state, &e);
            }
            Event::Empty(e) => record_page_link(&mut state, &e),
            Event::End(_) => {
                if depth == 0 {
                    return Ok(state);
                }
                depth -= 1;
            }
            Event::Eof => return Ok(state),
            _ => {}
        }
        buf.clear();
    }
}

fn record_page_link(state: &mut PaginationState, e: &BytesStart) {
    if e.local_name().as_ref() != b"page" {
        return;
    }
    if let (Some(position), Some(href)) = (attribute(e, "position"), attribute(e, "href")) {
        state.set_link(&position, href);
    }
}

fn read_text<R: BufRead>(reader: &mut Reader<R>) -> Result<String, FeedError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(reader, err))?;
        match event {
            Event::Text(e) => {
                if let Ok(value) = e.unescape() {
                    text.push_str(&value);
                }
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(text.trim().to_string());
                }
                depth -= 1;
            }
            Event::Eof => return Ok(text.trim().to_string()),
            _ => {}
        }
        buf.clear();
    }
}

fn capture_entry<R: BufRead>(
    reader: &mut Reader<R>,
    start: &BytesStart,
    namespaces: &[(String, String)],
) -> Result<Option<FeedEntry>, FeedError> {
    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes().flatten() {
        root.push_attribute(attr);
    }
    for (name, value) in namespaces {
        if attribute(start, name).is_none() {
            root.push_attribute((name.as_str(), value.as_str()));
        }
    }
    writer
        .write_event(Event::Start(root))
        .map_err(|err| write_error(reader, err))?;

    let mut item: Option<(ItemIdentity, bool)> = None;
    let mut photo_url: Option<String> = None;
    let mut buf = Vec::new();
    let mut depth = 0usize;
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error(reader, err))?;
        let done = match &event {
            Event::Start(e) => {
                depth += 1;
                inspect(e, &mut item, &mut photo_url);
                false
            }
            Event::Empty(e) => {
                inspect(e, &mut item, &mut photo_url);
                false
            }
            Event::End(_) if depth == 0 => true,
            Event::End(_) => {
                depth -= 1;
                false
            }
            Event::Eof => return Err(FeedError::TruncatedEntry),
            _ => false,
        };
        writer
            .write_event(event)
            .map_err(|err| write_error(reader, err))?;
        if done {
            break;
        }
        buf.clear();
    }

    match item {
        Some((identity, deleted)) => Ok(Some(FeedEntry {
            identity,
            deleted,
            photo_url: photo_url.filter(|_| identity.object_category() == Some(ObjectCategory::User)),
            xml: writer.into_inner(),
        })),
        None => {
            engine_warn!("Skipping feed entry without a recognisable item element");
            Ok(None)
        }
    }
}

fn inspect(e: &BytesStart, item: &mut Option<(ItemIdentity, bool)>, photo_url: &mut Option<String>) {
    if item.is_none() {
        *item = identify(e);
    } else if photo_url.is_none() && e.local_name().as_ref() == b"photo" {
        *photo_url = attribute(e, "href").filter(|href| !href.trim().is_empty());
    }
}

fn identify(e: &BytesStart) -> Option<(ItemIdentity, bool)> {
    let id = || attribute(e, "id").and_then(|v| v.trim().parse::<u32>().ok());
    match e.local_name().as_ref() {
        name @ (b"object" | b"deleted-object") => {
            let category: ObjectCategory = attribute(e, "category")?.parse().ok()?;
            Some((ItemIdentity::object(category, id()?), name.starts_with(b"deleted")))
        }
        name @ (b"relationship" | b"deleted-relationship") => {
            Some((ItemIdentity::Relationship(id()?), name.starts_with(b"deleted")))
        }
        b"user-group" => Some((ItemIdentity::Group(id()?), false)),
        b"relationship-type" => Some((ItemIdentity::RelationshipType(id()?), false)),
        _ => None,
    }
}

fn namespace_declarations(e: &BytesStart) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter(|attr| attr.key.as_ref().starts_with(b"xmlns"))
        .filter_map(|attr| {
            let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().ok()?.into_owned();
            Some((name, value))
        })
        .collect()
}

/// Unescaped attribute value; malformed attributes read as absent.
fn attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn xml_error<R>(reader: &Reader<R>, err: quick_xml::Error) -> FeedError {
    FeedError::Xml {
        position: reader.buffer_position() as u64,
        message: err.to_string(),
    }
}

fn write_error<R, E: std::fmt::Display>(reader: &Reader<R>, err: E) -> FeedError {
    FeedError::Xml {
        position: reader.buffer_position() as u64,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_deleted_objects() {
        let xml = br#"<feed><entry><deleted-object category="grant" id="12"/></entry></feed>"#;
        let page = scan_feed(xml).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(
            page.entries[0].identity,
            ItemIdentity::object(ObjectCategory::Grant, 12)
        );
        assert!(page.entries[0].deleted);
    }

    #[test]
    fn non_feed_root_is_rejected() {
        assert_eq!(
            scan_feed(b"<html><body/></html>"),
            Err(FeedError::NotAFeed("html".to_string()))
        );
    }

    #[test]
    fn unparseable_ids_skip_the_entry() {
        let xml = br#"<feed><entry><relationship id="abc"/></entry><entry><relationship id="4"/></entry></feed>"#;
        let page = scan_feed(xml).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].identity, ItemIdentity::Relationship(4));
    }
}
