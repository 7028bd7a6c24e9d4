//! Config-driven parser: each field is a JSON pointer (API sources) or a regex
//! whose first capture group holds the value (HTML sources).
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{ListingParser, ParsedListing};
use crate::error::ParseError;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static LIST_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[,、/／]\s*").expect("static regex"));

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    Pointer { pointer: String },
    Regex { pattern: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRules {
    pub title: FieldRule,
    #[serde(default)]
    pub description: Option<FieldRule>,
    #[serde(default)]
    pub release_date: Option<FieldRule>,
    #[serde(default)]
    pub thumbnail_url: Option<FieldRule>,
    #[serde(default)]
    pub affiliate_url: Option<FieldRule>,
    #[serde(default)]
    pub price: Option<FieldRule>,
    #[serde(default)]
    pub sale_price: Option<FieldRule>,
    #[serde(default)]
    pub discount_percent: Option<FieldRule>,
    #[serde(default)]
    pub sale_ends_at: Option<FieldRule>,
    #[serde(default)]
    pub performers: Option<FieldRule>,
    #[serde(default)]
    pub tags: Option<FieldRule>,
}

enum Extractor {
    Pointer(String),
    Regex(Regex),
}

impl Extractor {
    fn compile(rule: &FieldRule) -> Result<Self, regex::Error> {
        Ok(match rule {
            FieldRule::Pointer { pointer } => Extractor::Pointer(pointer.clone()),
            FieldRule::Regex { pattern } => Extractor::Regex(Regex::new(pattern)?),
        })
    }

    fn one(&self, doc: &Document<'_>) -> Option<String> {
        let value = match self {
            Extractor::Pointer(p) => doc.json.as_ref()?.pointer(p).and_then(scalar_to_string)?,
            Extractor::Regex(re) => clean_html(re.captures(&doc.text)?.get(1)?.as_str()),
        };
        (!value.is_empty()).then_some(value)
    }

    fn many(&self, doc: &Document<'_>) -> Vec<String> {
        let values: Vec<String> = match self {
            Extractor::Pointer(p) => match doc.json.as_ref().and_then(|j| j.pointer(p)) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| match item {
                        Value::Object(obj) => obj.get("name").and_then(scalar_to_string),
                        other => scalar_to_string(other),
                    })
                    .collect(),
                Some(other) => scalar_to_string(other)
                    .map(|s| LIST_SEPARATOR.split(&s).map(str::to_string).collect())
                    .unwrap_or_default(),
                None => Vec::new(),
            },
            Extractor::Regex(re) => re
                .captures_iter(&doc.text)
                .filter_map(|c| c.get(1).map(|m| clean_html(m.as_str())))
                .collect(),
        };
        let mut out: Vec<String> = Vec::new();
        for v in values.into_iter().map(|v| v.trim().to_string()) {
            if !v.is_empty() && !out.contains(&v) {
                out.push(v);
            }
        }
        out
    }
}

struct Document<'a> {
    text: std::borrow::Cow<'a, str>,
    json: Option<Value>,
}

pub struct ConfiguredParser {
    title: Extractor,
    description: Option<Extractor>,
    release_date: Option<Extractor>,
    thumbnail_url: Option<Extractor>,
    affiliate_url: Option<Extractor>,
    price: Option<Extractor>,
    sale_price: Option<Extractor>,
    discount_percent: Option<Extractor>,
    sale_ends_at: Option<Extractor>,
    performers: Option<Extractor>,
    tags: Option<Extractor>,
    needs_json: bool,
}

impl ConfiguredParser {
    pub fn new(rules: &FieldRules) -> Result<Self, regex::Error> {
        let opt = |r: &Option<FieldRule>| r.as_ref().map(Extractor::compile).transpose();
        let all = [
            Some(&rules.title),
            rules.description.as_ref(),
            rules.release_date.as_ref(),
            rules.thumbnail_url.as_ref(),
            rules.affiliate_url.as_ref(),
            rules.price.as_ref(),
            rules.sale_price.as_ref(),
            rules.discount_percent.as_ref(),
            rules.sale_ends_at.as_ref(),
            rules.performers.as_ref(),
            rules.tags.as_ref(),
        ];
        let needs_json = all
            .iter()
            .flatten()
            .any(|r| matches!(r, FieldRule::Pointer { .. }));
        Ok(Self {
            title: Extractor::compile(&rules.title)?,
            description: opt(&rules.description)?,
            release_date: opt(&rules.release_date)?,
            thumbnail_url: opt(&rules.thumbnail_url)?,
            affiliate_url: opt(&rules.affiliate_url)?,
            price: opt(&rules.price)?,
            sale_price: opt(&rules.sale_price)?,
            discount_percent: opt(&rules.discount_percent)?,
            sale_ends_at: opt(&rules.sale_ends_at)?,
            performers: opt(&rules.performers)?,
            tags: opt(&rules.tags)?,
            needs_json,
        })
    }
}

impl ListingParser for ConfiguredParser {
    fn parse(&self, content: &[u8]) -> Result<ParsedListing, ParseError> {
        let json = if self.needs_json {
            Some(
                serde_json::from_slice::<Value>(content)
                    .map_err(|e| ParseError::InvalidPayload(e.to_string()))?,
            )
        } else {
            None
        };
        let doc = Document {
            text: String::from_utf8_lossy(content),
            json,
        };
        let get = |e: &Option<Extractor>| e.as_ref().and_then(|e| e.one(&doc));

        let title = self.title.one(&doc).ok_or(ParseError::MissingField("title"))?;
        Ok(ParsedListing {
            title,
            description: get(&self.description),
            release_date: get(&self.release_date).as_deref().and_then(parse_date),
            thumbnail_url: get(&self.thumbnail_url),
            affiliate_url: get(&self.affiliate_url),
            price: get(&self.price).as_deref().and_then(parse_amount),
            sale_price: get(&self.sale_price).as_deref().and_then(parse_amount),
            discount_percent: get(&self.discount_percent)
                .as_deref()
                .and_then(parse_amount)
                .and_then(|v| i32::try_from(v).ok()),
            sale_ends_at: get(&self.sale_ends_at).as_deref().and_then(parse_timestamp),
            performers: self.performers.as_ref().map(|e| e.many(&doc)).unwrap_or_default(),
            tags: self.tags.as_ref().map(|e| e.many(&doc)).unwrap_or_default(),
        })
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn clean_html(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `"¥5,980"` → 5980, `"1980.0"` → 1980.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.round() as i64)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    let head: String = raw.chars().take_while(|c| !c.is_whitespace()).collect();
    ["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&head, fmt).ok())
}

/// RFC 3339 timestamps as-is; bare dates mean the end of that day (UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(ts.with_timezone(&Utc));
    }
    parse_date(raw)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}
