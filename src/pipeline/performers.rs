//! Performer entity resolution.
//!
//! Two strategies feed one resolver: exact registry matches inside the title
//! (longest name first), and heuristic candidate extraction for names the
//! registry does not know yet. Every heuristic candidate must pass
//! [`is_plausible_name`] before it can reach `find_or_create`.
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{PerformerName, PerformerRepo};
use crate::normalization::performer_name::{
    classify_script, is_plausible_name, normalize_performer_name, Script, MIN_MATCH_CHARS,
};

/// `Yua.Mikami`, `Mia-Malkova`.
static LATIN_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]+)[-.]([A-Z][a-z]+)\b").expect("static regex")
});

const MAX_TAIL_JAPANESE_CHARS: usize = 8;
const TAIL_TRIM: &[char] = &['「', '」', '【', '】', '(', ')', '（', '）', '[', ']', '『', '』', '…', '!', '！'];

/// Known names, longest first, for substring matching against titles.
#[derive(Debug, Clone, Default)]
pub struct PerformerResolver {
    names: Vec<MatchName>,
}

#[derive(Debug, Clone)]
struct MatchName {
    performer_id: i64,
    chars: Vec<char>,
    latin: bool,
}

impl MatchName {
    fn new(performer_id: i64, name: &str) -> Self {
        Self {
            performer_id,
            chars: name.chars().collect(),
            latin: classify_script(name) == Script::Latin,
        }
    }
}

impl PerformerResolver {
    pub async fn load<R: PerformerRepo + ?Sized>(repo: &R) -> Result<Self> {
        let names = repo.performer_match_names(MIN_MATCH_CHARS).await?;
        debug!(count = names.len(), "loaded performer registry");
        Ok(Self::from_names(names))
    }

    pub fn from_names(names: impl IntoIterator<Item = PerformerName>) -> Self {
        let mut resolver = Self::default();
        for n in names {
            resolver.remember(n.performer_id, &n.name);
        }
        resolver
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Make a newly created name matchable for the rest of the batch.
    pub fn remember(&mut self, performer_id: i64, name: &str) {
        if name.chars().count() < MIN_MATCH_CHARS {
            return;
        }
        let candidate = MatchName::new(performer_id, name);
        if self.names.iter().any(|n| n.chars == candidate.chars) {
            return;
        }
        let pos = self
            .names
            .partition_point(|n| n.chars.len() >= candidate.chars.len());
        self.names.insert(pos, candidate);
    }

    /// Performer ids whose name or alias occurs in `title`, in title order.
    /// Longer names claim their span first, so a short name that is a prefix
    /// of a longer one never matches inside it.
    pub fn registry_matches(&self, title: &str) -> Vec<i64> {
        let text: Vec<char> = title.chars().collect();
        let mut claimed = vec![false; text.len()];
        let mut hits: Vec<(usize, i64)> = Vec::new();
        for name in &self.names {
            let len = name.chars.len();
            if len == 0 || len > text.len() {
                continue;
            }
            let mut start = 0;
            while start + len <= text.len() {
                if claimed[start..start + len].iter().any(|c| *c)
                    || !matches_at(&text, start, name)
                {
                    start += 1;
                    continue;
                }
                claimed[start..start + len].iter_mut().for_each(|c| *c = true);
                hits.push((start, name.performer_id));
                start += len;
            }
        }
        hits.sort_by_key(|(pos, _)| *pos);
        let mut ids = Vec::new();
        for (_, id) in hits {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

fn matches_at(text: &[char], start: usize, name: &MatchName) -> bool {
    let window = &text[start..start + name.chars.len()];
    if !name.latin {
        return window == name.chars.as_slice();
    }
    let is_letter = |c: &char| c.is_ascii_alphabetic();
    let before_ok = start == 0 || !is_letter(&text[start - 1]);
    let after = start + name.chars.len();
    let after_ok = after == text.len() || !is_letter(&text[after]);
    before_ok
        && after_ok
        && window
            .iter()
            .zip(&name.chars)
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// Heuristic name candidates embedded in a title, already filtered for
/// plausibility.
pub fn extract_candidates(title: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        let candidate = normalize_performer_name(&candidate);
        if is_plausible_name(&candidate) && !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    for caps in LATIN_PAIR.captures_iter(title) {
        push(format!("{} {}", &caps[1], &caps[2]));
    }

    let tokens: Vec<&str> = title.split(char::is_whitespace).filter(|t| !t.is_empty()).collect();
    if tokens.len() >= 2 {
        if let Some(tail) = tokens.last().map(|t| t.trim_matches(TAIL_TRIM)) {
            let tail_ok = match classify_script(tail) {
                Script::Latin => !LATIN_PAIR.is_match(tail),
                Script::Katakana | Script::Japanese => {
                    tail.chars().count() <= MAX_TAIL_JAPANESE_CHARS
                }
                Script::Mixed => false,
            };
            if tail_ok {
                push(tail.to_string());
            }
        }
    }
    out
}

/// Exact name, then alias, then insert. Names are normalized first so a spaced
/// variant of an existing performer is never created.
#[instrument(skip(repo))]
pub async fn find_or_create<R: PerformerRepo + ?Sized>(repo: &R, raw_name: &str) -> Result<Option<i64>> {
    let name = normalize_performer_name(raw_name);
    if name.is_empty() {
        return Ok(None);
    }
    if let Some(id) = repo.find_performer_by_name(&name).await? {
        return Ok(Some(id));
    }
    if let Some(id) = repo.find_performer_by_alias(&name).await? {
        return Ok(Some(id));
    }
    let trimmed = raw_name.trim();
    if trimmed != name {
        if let Some(id) = repo.find_performer_by_alias(trimmed).await? {
            return Ok(Some(id));
        }
    }
    let kana = (classify_script(&name) == Script::Katakana).then_some(name.as_str());
    let id = repo.insert_performer(&name, kana).await?;
    info!(performer_id = id, %name, "created performer");
    Ok(Some(id))
}

/// Resolve the performers of one title. Registry hits are trusted; source
/// hints and, when nothing else matched, title heuristics go through the
/// plausibility filter and `find_or_create`. No confident match yields an
/// empty list.
#[instrument(skip(repo, resolver, hints))]
pub async fn resolve_performers<R: PerformerRepo + ?Sized>(
    repo: &R,
    resolver: &mut PerformerResolver,
    title: &str,
    hints: &[String],
) -> Result<Vec<i64>> {
    let mut ids = resolver.registry_matches(title);

    let mut candidates: Vec<String> = hints
        .iter()
        .map(|h| normalize_performer_name(h))
        .filter(|h| is_plausible_name(h))
        .collect();
    if ids.is_empty() && candidates.is_empty() {
        candidates = extract_candidates(title);
    }

    for candidate in candidates {
        match find_or_create(repo, &candidate).await? {
            Some(id) => {
                resolver.remember(id, &candidate);
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            None => warn!(%candidate, "empty performer name after normalization"),
        }
    }
    Ok(ids)
}

/// Returns how many new link rows were written.
pub async fn link_performers<R: PerformerRepo + ?Sized>(
    repo: &R,
    product_id: i64,
    performer_ids: &[i64],
) -> Result<usize> {
    let mut linked = 0;
    for &performer_id in performer_ids {
        if repo.link_product_performer(product_id, performer_id).await? {
            linked += 1;
        }
    }
    Ok(linked)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub examined: usize,
    pub renamed: usize,
    pub merged: usize,
}

/// Repairs performers stored with tokenization spaces (`"佐藤 えり"`). With a
/// canonical twin present the spaced row is merged into it; otherwise it is
/// renamed in place. The spaced spelling stays reachable as an alias.
#[instrument(skip(repo))]
pub async fn reconcile_spaced_performers<R: PerformerRepo + ?Sized>(
    repo: &R,
    limit: i64,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for performer in repo.spaced_performers(limit).await? {
        report.examined += 1;
        let canonical_name = normalize_performer_name(&performer.name);
        if canonical_name == performer.name {
            continue;
        }
        match repo.find_performer_by_name(&canonical_name).await? {
            Some(canonical_id) if canonical_id != performer.id => {
                repo.merge_performer(performer.id, canonical_id).await?;
                info!(duplicate_id = performer.id, canonical_id, name = %performer.name, "merged spaced performer");
                report.merged += 1;
            }
            _ => {
                repo.rename_performer(performer.id, &canonical_name).await?;
                repo.add_performer_alias(performer.id, &performer.name).await?;
                info!(performer_id = performer.id, from = %performer.name, to = %canonical_name, "renamed spaced performer");
                report.renamed += 1;
            }
        }
    }
    Ok(report)
}
