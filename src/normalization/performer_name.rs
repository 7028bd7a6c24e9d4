//! Performer name normalization, script classification, and the plausibility
//! filter every heuristic candidate must pass before it reaches the registry.

/// Registry names shorter than this are never matched inside titles.
pub const MIN_MATCH_CHARS: usize = 3;
const MIN_CJK_NAME_CHARS: usize = 2;
const MIN_LATIN_NAME_CHARS: usize = 3;
const MAX_NAME_CHARS: usize = 24;

/// Title vocabulary that looks like a name to the extractors but is not one.
const NON_NAME_VOCABULARY: &[&str] = &[
    // Latin-script tags and format markers (compared upper-cased)
    "ASMR", "AV", "BEST", "BONUS", "COMPLETE", "DEBUT", "EDITION", "FHD", "FULL", "GAL", "HD",
    "HQ", "JAV", "MAX", "NEW", "NTR", "PART", "PREMIUM", "SALE", "SEX", "SPECIAL", "SUPER",
    "UHD", "VOL", "VR",
    // Release formats and media
    "4K", "8K", "BD", "BLU RAY", "BLU-RAY", "BLURAY", "DIGITAL", "DL", "DOWNLOAD", "DVD",
    "REMASTER", "REMASTERED", "SAMPLE", "STREAMING", "TRAILER", "UNCENSORED",
    // Japanese genre/marketing vocabulary
    "美少女", "人妻", "熟女", "巨乳", "素人", "企画", "中出し", "痴漢", "限定", "特典",
    "配信", "独占", "作品", "総集編", "ベスト", "シリーズ", "デビュー", "完全", "新人",
    "女子大生", "ナンパ", "生中出し", "セット", "高画質", "期間限定", "無修正", "OL",
    "美女", "女優", "動画", "特集", "痴女", "ギャル", "新作",
];

/// Writing system of a name candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Katakana,
    /// Kanji and/or hiragana, possibly mixed with katakana.
    Japanese,
    Mixed,
}

fn is_hiragana(c: char) -> bool {
    ('\u{3041}'..='\u{309F}').contains(&c)
}

fn is_katakana(c: char) -> bool {
    ('\u{30A0}'..='\u{30FF}').contains(&c) || ('\u{31F0}'..='\u{31FF}').contains(&c)
}

fn is_kanji(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
        || ('\u{3400}'..='\u{4DBF}').contains(&c)
        || c == '々'
        || c == 'ヶ'
}

/// Characters of scripts whose names are written without word spaces.
pub fn is_cjk_name_char(c: char) -> bool {
    is_hiragana(c) || is_katakana(c) || is_kanji(c)
}

pub fn has_latin_letter(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic())
}

/// Classify the non-space characters of `s`.
pub fn classify_script(s: &str) -> Script {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return Script::Mixed;
    }
    if chars.iter().all(|c| c.is_ascii_alphabetic() || *c == '.' || *c == '-') {
        return Script::Latin;
    }
    if chars.iter().all(|c| is_katakana(*c)) {
        return Script::Katakana;
    }
    if chars.iter().all(|c| is_cjk_name_char(*c)) {
        return Script::Japanese;
    }
    Script::Mixed
}

/// Canonical spelling of a performer name.
///
/// Trims, folds ideographic spaces, collapses whitespace runs, and removes
/// inter-character spaces from names made entirely of CJK characters
/// (`"佐藤 えり"` → `"佐藤えり"`). Latin names keep their single spaces.
pub fn normalize_performer_name(raw: &str) -> String {
    let collapsed = raw
        .split(|c: char| c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let all_cjk = collapsed
        .chars()
        .filter(|c| *c != ' ')
        .all(is_cjk_name_char);
    if all_cjk && collapsed.contains(' ') {
        collapsed.replace(' ', "")
    } else {
        collapsed
    }
}

/// Plausibility filter for heuristic name candidates.
pub fn is_plausible_name(name: &str) -> bool {
    let name = name.trim();
    let count = name.chars().count();
    if count == 0 || count > MAX_NAME_CHARS {
        return false;
    }
    if name.chars().any(|c| c.is_ascii_digit() || c.is_numeric()) {
        return false;
    }
    let allowed = |c: char| {
        c.is_ascii_alphabetic() || is_cjk_name_char(c) || matches!(c, ' ' | '.' | '-' | '\'')
    };
    if !name.chars().all(allowed) {
        return false;
    }
    let min = match classify_script(name) {
        Script::Latin => MIN_LATIN_NAME_CHARS,
        Script::Katakana | Script::Japanese => MIN_CJK_NAME_CHARS,
        Script::Mixed => return false,
    };
    if count < min {
        return false;
    }
    let upper = name.to_ascii_uppercase();
    if NON_NAME_VOCABULARY.iter().any(|w| upper == *w) {
        return false;
    }
    // CJK vocabulary can be glued onto a name without separators.
    !NON_NAME_VOCABULARY
        .iter()
        .filter(|w| w.chars().any(is_cjk_name_char))
        .any(|w| name.contains(w))
}
