use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use sieve_core::ListingSummary;
use thiserror::Error;

/// Site markup knowledge lives behind this trait, so a markup change touches
/// only the parser and never the crawl loop.
pub trait ListingParser: Send + Sync {
    /// Listing tiles of one category page. Tiles missing fields are still
    /// returned; the crawler drops them.
    fn parse_listings(&self, page: &str) -> Vec<ListingSummary>;

    /// The detail page's signal, only when present and well-formed.
    fn parse_signal(&self, page: &str) -> Option<String>;
}

#[derive(Debug, Error)]
#[error("invalid markup selector {field}: {message}")]
pub struct MarkupError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupSelectors {
    pub tile: String,
    pub identifier_attr: String,
    pub owner_attr: String,
    pub link: String,
    pub title: String,
    pub signal: String,
    pub signal_pattern: String,
}

impl Default for MarkupSelectors {
    fn default() -> Self {
        Self {
            tile: "[data-listing-id]".to_string(),
            identifier_attr: "data-listing-id".to_string(),
            owner_attr: "data-owner-id".to_string(),
            link: "a[href]".to_string(),
            title: ".title".to_string(),
            signal: "[data-signal]".to_string(),
            signal_pattern: r"\S".to_string(),
        }
    }
}

/// CSS-selector driven parser configured by [`MarkupSelectors`].
#[derive(Debug)]
pub struct SelectorParser {
    tile: Selector,
    link: Selector,
    title: Selector,
    signal: Selector,
    signal_pattern: Regex,
    identifier_attr: String,
    owner_attr: String,
}

impl SelectorParser {
    pub fn new(markup: &MarkupSelectors) -> Result<Self, MarkupError> {
        Ok(Self {
            tile: selector("tile", &markup.tile)?,
            link: selector("link", &markup.link)?,
            title: selector("title", &markup.title)?,
            signal: selector("signal", &markup.signal)?,
            signal_pattern: Regex::new(&markup.signal_pattern).map_err(|err| MarkupError {
                field: "signal_pattern",
                message: err.to_string(),
            })?,
            identifier_attr: markup.identifier_attr.clone(),
            owner_attr: markup.owner_attr.clone(),
        })
    }

    fn summary(&self, tile: ElementRef<'_>) -> ListingSummary {
        let attr = |name: &str| tile.value().attr(name).map(|v| v.trim().to_string());
        ListingSummary {
            identifier: attr(&self.identifier_attr),
            owner_id: attr(&self.owner_attr),
            item_ref: tile
                .select(&self.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| href.trim().to_string()),
            display_title: tile.select(&self.title).next().map(element_text),
        }
    }
}

impl ListingParser for SelectorParser {
    fn parse_listings(&self, page: &str) -> Vec<ListingSummary> {
        let doc = Html::parse_document(page);
        doc.select(&self.tile).map(|tile| self.summary(tile)).collect()
    }

    fn parse_signal(&self, page: &str) -> Option<String> {
        let doc = Html::parse_document(page);
        let text = doc.select(&self.signal).next().map(element_text)?;
        if text.is_empty() || !self.signal_pattern.is_match(&text) {
            return None;
        }
        Some(text)
    }
}

fn selector(field: &'static str, css: &str) -> Result<Selector, MarkupError> {
    Selector::parse(css).map_err(|err| MarkupError {
        field,
        message: err.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
