//! Builds the month-by-month link catalog from the publisher's listing page.
//!
//! The page groups the trip-record files by year: one `div.faq-answers`
//! section per year, each holding a table whose cells contain one `ul` per
//! month. The first link of a month is the yellow-taxi file, the second the
//! green-taxi file. Catalog order is document order and nothing else.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use libxml::parser::Parser;
use libxml::readonly::RoNode;
use libxml::tree::Document;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// At most this many year sections are consulted.
pub const MAX_YEAR_SECTIONS: usize = 2;

const SECTION_XPATH: &str =
  "//div[contains(concat(' ', normalize-space(@class), ' '), ' faq-answers ')]";
const CELL_XPATH: &str = ".//table//td";
const MONTH_XPATH: &str = ".//ul";
const LINK_XPATH: &str = ".//li/a";

lazy_static! {
  static ref YEAR_MONTH_REGEX: Regex = Regex::new(r"(\d{4})-(\d{2})").unwrap();
}

/// One month's two dataset files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPair {
  /// Green-taxi trip records.
  pub secondary_url: String,
  /// Yellow-taxi trip records.
  pub primary_url: String,
  /// First day of the month stamped in the file names, when there is one.
  /// Informational only, selection never looks at it.
  pub month: Option<NaiveDate>,
}

impl LinkPair {
  pub fn new(secondary_url: &str, primary_url: &str) -> Self {
    LinkPair {
      secondary_url: secondary_url.to_string(),
      primary_url: primary_url.to_string(),
      month: month_of(primary_url).or_else(|| month_of(secondary_url)),
    }
  }

  /// Both URLs, secondary first.
  pub fn urls(&self) -> [&str; 2] {
    [&self.secondary_url, &self.primary_url]
  }
}

/// Month stamp (`YYYY-MM`) of the file a URL points at.
pub fn month_of(url: &str) -> Option<NaiveDate> {
  let filename = url.rsplit('/').next()?;
  let cap = YEAR_MONTH_REGEX.captures(filename)?;
  let year = cap.get(1)?.as_str().parse().ok()?;
  let month = cap.get(2)?.as_str().parse().ok()?;
  NaiveDate::from_ymd_opt(year, month, 1)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCatalog {
  pairs: Vec<LinkPair>,
}

impl LinkCatalog {
  pub fn from_pairs(pairs: Vec<LinkPair>) -> Self {
    LinkCatalog { pairs }
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&LinkPair> {
    self.pairs.get(index)
  }

  pub fn pairs(&self) -> &[LinkPair] {
    &self.pairs
  }
}

/// What to do when the page does not look the way we expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutPolicy {
  /// Fail with a layout error.
  #[default]
  Strict,
  /// Skip what does not fit and carry on, possibly with an empty catalog.
  Lenient,
}

/// Where listing pages come from.
pub trait ListingSource {
  fn fetch(&self, url: &str) -> Result<String, EtlError>;
}

/// Fetches the listing page over HTTP(S), without retries.
pub struct HttpListing {
  client: Client,
}

impl HttpListing {
  pub fn new(client: Client) -> Self {
    HttpListing { client }
  }
}

impl ListingSource for HttpListing {
  fn fetch(&self, url: &str) -> Result<String, EtlError> {
    let resp = self.client.get(url).send().map_err(|e| EtlError::fetch(url, e))?;
    let status = resp.status();
    if !status.is_success() {
      return Err(EtlError::fetch(url, format!("HTTP status {}", status)));
    }
    resp.text().map_err(|e| EtlError::fetch(url, e))
  }
}

/// Fetches the listing page and parses it into a catalog.
pub fn build_catalog(
  source: &dyn ListingSource,
  listing_page_url: &str,
  layout: LayoutPolicy,
) -> Result<LinkCatalog, EtlError> {
  let html = source.fetch(listing_page_url)?;
  let catalog = parse_listing(&html, layout)?;
  log::info!("extracted {} monthly link pairs from {}", catalog.len(), listing_page_url);
  Ok(catalog)
}

/// Parses the listing page markup into a catalog, in document order.
pub fn parse_listing(html: &str, layout: LayoutPolicy) -> Result<LinkCatalog, EtlError> {
  let parser = Parser::default_html();
  let doc = match parser.parse_string(html) {
    Ok(doc) => doc,
    Err(e) => return mismatch(layout, format!("unparsable listing page: {:?}", e)),
  };
  let root = match doc.get_root_readonly() {
    Some(root) => root,
    None => return mismatch(layout, "listing page has no root element".to_string()),
  };

  let sections = find(root, SECTION_XPATH, &doc);
  if sections.is_empty() {
    return mismatch(layout, "no year sections (div.faq-answers) found".to_string());
  }

  let mut pairs = Vec::new();
  for (year_index, section) in sections.into_iter().take(MAX_YEAR_SECTIONS).enumerate() {
    for cell in find(section, CELL_XPATH, &doc) {
      for month in find(cell, MONTH_XPATH, &doc) {
        let hrefs: Vec<String> = find(month, LINK_XPATH, &doc)
          .into_iter()
          .map(|link| link.get_attribute("href").unwrap_or_default().trim().to_string())
          .collect();
        match hrefs.as_slice() {
          [primary, secondary, ..] if !primary.is_empty() && !secondary.is_empty() => {
            pairs.push(LinkPair::new(secondary, primary));
          }
          _ => {
            let reason = format!(
              "a month entry of year section #{} has {} usable links, expected at least 2",
              year_index,
              hrefs.iter().filter(|href| !href.is_empty()).count()
            );
            if layout == LayoutPolicy::Strict {
              return Err(EtlError::Layout(reason));
            }
            log::warn!("skipping {}", reason);
          }
        }
      }
    }
  }
  Ok(LinkCatalog::from_pairs(pairs))
}

fn find(node: RoNode, xpath: &str, doc: &Document) -> Vec<RoNode> {
  node.findnodes(xpath, doc).unwrap_or_default()
}

fn mismatch(layout: LayoutPolicy, reason: String) -> Result<LinkCatalog, EtlError> {
  match layout {
    LayoutPolicy::Strict => Err(EtlError::Layout(reason)),
    LayoutPolicy::Lenient => {
      log::warn!("{}; continuing with an empty catalog", reason);
      Ok(LinkCatalog::default())
    }
  }
}
