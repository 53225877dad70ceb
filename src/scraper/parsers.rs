//! XML page parsing for the Onbid listing feeds.
//!
//! A response body is read into a small element tree. DOCTYPE declarations are
//! refused outright and no entity beyond the five predefined XML ones is ever
//! expanded, so a hostile upstream cannot smuggle external entities in.
//!
//! The provider's layout varies (`response/body/items/item`, bare
//! `items/item`, ...), so items are searched by tag name rather than by path.
//! Documents nested deeper than [`MAX_DEPTH`] are refused.

use crate::models::{ListingRecord, RawListingRow};
use crate::scraper::cleaner::row_to_record;
use crate::scraper::error::FeedError;
use crate::utils::snippet;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, error, info, warn};

/// Max characters of payload echoed into diagnostics.
pub const SNIPPET_LEN: usize = 500;

const SUCCESS_CODES: [&str; 4] = ["00", "0", "000", "0000"];

/// Deepest element nesting accepted. Real pages are about five levels deep;
/// the tree walkers recurse per level, so this also bounds stack use.
pub const MAX_DEPTH: usize = 64;

// ── Element tree ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Element {
    pub name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self { name, ..Default::default() }
    }

    /// Concatenated text of this element and all of its descendants.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }

    /// All elements named `name` in document order, `self` included.
    pub fn elements_named<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut out = Vec::new();
        self.collect_named(name, &mut out);
        out
    }

    fn collect_named<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        if self.name == name {
            out.push(self);
        }
        for child in &self.children {
            child.collect_named(name, out);
        }
    }

    pub fn first_named(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.first_named(name))
    }

    fn descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            out.push(child);
            child.descendants(out);
        }
    }
}

/// Parse a whole document into its root element.
pub fn parse_document(xml: &str) -> Result<Element, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::DocType(_) => return Err(FeedError::DoctypeRejected),
            Event::Start(e) => {
                if root.is_some() {
                    return Err(FeedError::Malformed("content after root element".into()));
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(FeedError::Malformed("nesting too deep".into()));
                }
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(Element::new(name));
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Element::new(name)),
                    None if root.is_none() => root = Some(Element::new(name)),
                    None => {
                        return Err(FeedError::Malformed("content after root element".into()));
                    }
                }
            }
            Event::End(_) => {
                let done = stack
                    .pop()
                    .ok_or_else(|| FeedError::Malformed("unbalanced closing tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => root = Some(done),
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match stack.last_mut() {
                    Some(current) => current.text.push_str(&text),
                    None if text.trim().is_empty() => {}
                    None => return Err(FeedError::Malformed("text outside root element".into())),
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(FeedError::Malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| FeedError::Malformed("no root element".into()))
}

// ── Envelope / items ──────────────────────────────────────────────────────────

/// `resultCode`/`resultMsg` pair when the code is not a success code.
pub fn provider_error(root: &Element) -> Option<FeedError> {
    let code = root.first_named("resultCode")?.text_content().trim().to_string();
    if SUCCESS_CODES.contains(&code.as_str()) {
        return None;
    }
    let message = root
        .first_named("resultMsg")
        .map(|m| m.text_content().trim().to_string())
        .unwrap_or_default();
    Some(FeedError::Provider { code, message })
}

/// Every `item` element in document order. The search covers the whole
/// tree, so items nested under a `body` wrapper need no second pass.
pub fn find_items(root: &Element) -> Vec<&Element> {
    let items = root.elements_named("item");
    debug!("Found {} items", items.len());
    items
}

/// Tag texts of one `<item>`.
pub fn read_item(item: &Element) -> RawListingRow {
    let mut nodes = Vec::new();
    item.descendants(&mut nodes);

    let mut row = RawListingRow::default();
    for node in nodes {
        row.set(&node.name, node.text_content());
    }
    row
}

// ── Page entry point ──────────────────────────────────────────────────────────

/// Outcome of parsing one page body.
#[derive(Debug, Default)]
pub struct ParseReport {
    pub records: Vec<ListingRecord>,
    pub items_seen: usize,
    /// Items dropped for lacking a listing id.
    pub dropped: usize,
}

/// Parse one page body into listing records. Never fails: anything that
/// cannot be read yields an empty report and a logged diagnostic.
pub fn parse_listing_page(xml: &str) -> ParseReport {
    if xml.trim().is_empty() {
        warn!("Empty response body");
        return ParseReport::default();
    }

    let root = match parse_document(xml) {
        Ok(root) => root,
        Err(e) => {
            error!("Could not parse listing XML: {}", e);
            error!("Payload (first {} chars): {}", SNIPPET_LEN, snippet(xml, SNIPPET_LEN));
            return ParseReport::default();
        }
    };
    debug!("Root element: <{}>", root.name);

    if let Some(e) = provider_error(&root) {
        warn!("{} | payload: {}", e, snippet(xml, SNIPPET_LEN));
    }

    let items = find_items(&root);
    let mut report = ParseReport {
        items_seen: items.len(),
        ..Default::default()
    };

    for item in items {
        let record = row_to_record(&read_item(item));
        if record.listing_id.is_some() {
            report.records.push(record);
        } else {
            report.dropped += 1;
        }
    }

    info!(
        "Parsed {} of {} items ({} without listing id)",
        report.records.len(),
        report.items_seen,
        report.dropped
    );
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────
