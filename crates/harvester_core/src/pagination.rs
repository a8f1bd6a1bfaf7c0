use std::collections::VecDeque;

use url::Url;

use crate::{ApiAdapter, ConfigurationError, FeedQuery};

/// Page links reported by one fetched feed page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaginationState {
    pub items_per_page: Option<u32>,
    pub first: Option<String>,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub last: Option<String>,
}

impl PaginationState {
    /// Without a `next` link the page is the final one.
    pub fn is_final_page(&self) -> bool {
        self.next.is_none()
    }

    /// Records an href for a `position` attribute value. Unknown positions are ignored.
    pub fn set_link(&mut self, position: &str, href: String) {
        match position {
            "first" => self.first = Some(href),
            "previous" => self.previous = Some(href),
            "next" => self.next = Some(href),
            "last" => self.last = Some(href),
            _ => {}
        }
    }
}

/// Lazily yields the request URLs needed to exhaust a query.
///
/// Seed URLs come from the adapter; after each fetched page the caller passes
/// that page's pagination back in, and a `next` link is followed before the
/// remaining seeds when the query processes all pages.
#[derive(Debug, Clone)]
pub struct QueryIterator {
    seeds: VecDeque<String>,
    process_all_pages: bool,
    pending_next: Option<String>,
}

impl QueryIterator {
    pub fn new(
        base: &Url,
        adapter: &ApiAdapter,
        query: &FeedQuery,
    ) -> Result<Self, ConfigurationError> {
        let seeds = adapter
            .resolve_query_urls(base, query)?
            .into_iter()
            .map(String::from)
            .collect();
        Ok(Self {
            seeds,
            // Unpaginated resources never follow links.
            process_all_pages: query.options.process_all_pages && query.is_paginated(),
            pending_next: None,
        })
    }

    /// Feeds back the pagination of the page fetched from the last URL.
    pub fn record_page(&mut self, pagination: &PaginationState) {
        self.pending_next = if self.process_all_pages {
            pagination.next.clone()
        } else {
            None
        };
    }

    pub fn remaining_seeds(&self) -> usize {
        self.seeds.len()
    }
}

impl Iterator for QueryIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.pending_next.take().or_else(|| self.seeds.pop_front())
    }
}
