//! Source parser registry.
//!
//! Extraction rules are per-ASP configuration; the pipeline only sees the
//! [`ListingParser`] seam and looks a parser up once per item by source name.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;

use crate::config::SourcesConfig;
use crate::error::ParseError;

pub mod configured;

pub use configured::ConfiguredParser;

/// Structured fields extracted from one raw page or API payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedListing {
    pub title: String,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub thumbnail_url: Option<String>,
    pub affiliate_url: Option<String>,
    pub price: Option<i64>,
    pub sale_price: Option<i64>,
    pub discount_percent: Option<i32>,
    pub sale_ends_at: Option<DateTime<Utc>>,
    /// Performer names the source lists explicitly (hints, not yet validated).
    pub performers: Vec<String>,
    pub tags: Vec<String>,
}

pub trait ListingParser: Send + Sync {
    fn parse(&self, content: &[u8]) -> Result<ParsedListing, ParseError>;
}

impl<F> ListingParser for F
where
    F: Fn(&[u8]) -> Result<ParsedListing, ParseError> + Send + Sync,
{
    fn parse(&self, content: &[u8]) -> Result<ParsedListing, ParseError> {
        self(content)
    }
}

#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn ListingParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`ConfiguredParser`] per configured source. Sources whose rules fail
    /// to compile are logged and left unregistered.
    pub fn from_sources(sources: &SourcesConfig) -> Self {
        let mut registry = Self::new();
        for (name, source) in &sources.sources {
            match ConfiguredParser::new(&source.fields) {
                Ok(parser) => registry.register(name, parser),
                Err(err) => warn!(source = %name, error = %err, "invalid field rules; source parser disabled"),
            }
        }
        registry
    }

    pub fn register(&mut self, source: &str, parser: impl ListingParser + 'static) {
        self.parsers.insert(source.to_string(), Arc::new(parser));
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn ListingParser>> {
        self.parsers.get(source).cloned()
    }

    pub fn parse(&self, source: &str, content: &[u8]) -> Result<ParsedListing, ParseError> {
        let parser = self
            .parsers
            .get(source)
            .ok_or_else(|| ParseError::UnknownSource(source.to_string()))?;
        parser.parse(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_register_as_parsers() {
        let mut registry = ParserRegistry::new();
        registry.register("STUB", |content: &[u8]| -> Result<ParsedListing, ParseError> {
            Ok(ParsedListing {
                title: String::from_utf8_lossy(content).into_owned(),
                ..Default::default()
            })
        });
        let parsed = registry.parse("STUB", b"hello title").unwrap();
        assert_eq!(parsed.title, "hello title");
        assert!(matches!(
            registry.parse("OTHER", b""),
            Err(ParseError::UnknownSource(s)) if s == "OTHER"
        ));
    }
}
