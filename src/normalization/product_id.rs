//! Cross-source product identifiers.
//!
//! Each ASP spells the same release differently (`259LUXU1010`, `259luxu-1010`,
//! `h_123abc00045`). A [`IdRule`] turns the source-native id into the
//! normalized id shared by every storefront selling that title.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static ALNUM_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]*[A-Z]+)-?([0-9]+)([A-Z]?)$").expect("static regex"));
static CONTENT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:H_[0-9]+)?[0-9]*([A-Z]+)0*([0-9]+)([A-Z]?)$").expect("static regex")
});

/// Normalization rule for one source, configured in the sources file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdRule {
    /// `259LUXU1010` → `259LUXU-1010`; ids that already carry a hyphen keep it.
    #[default]
    HyphenateCode,
    /// DMM-style content ids: `h_123abc00045` → `ABC-045`.
    ContentId,
    /// Trim and upper-case only.
    Verbatim,
    /// Arbitrary rewrite applied to the upper-cased id.
    Regex { pattern: String, replacement: String },
}

/// Normalize `original` under `rule`. Returns `None` for ids that are empty
/// or that a regex rule cannot compile for.
pub fn normalize_product_id(original: &str, rule: &IdRule) -> Option<String> {
    let upper = original.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    let normalized = match rule {
        IdRule::Verbatim => upper,
        IdRule::HyphenateCode => hyphenate(&upper).unwrap_or(upper),
        IdRule::ContentId => content_id(&upper).unwrap_or(upper),
        IdRule::Regex {
            pattern,
            replacement,
        } => {
            let re = Regex::new(pattern).ok()?;
            re.replace(&upper, replacement.as_str()).into_owned()
        }
    };
    Some(normalized)
}

fn hyphenate(upper: &str) -> Option<String> {
    let caps = ALNUM_CODE.captures(upper)?;
    Some(format!("{}-{}{}", &caps[1], &caps[2], &caps[3]))
}

fn content_id(upper: &str) -> Option<String> {
    let caps = CONTENT_ID.captures(upper)?;
    let number: u64 = caps[2].parse().ok()?;
    Some(format!("{}-{:03}{}", &caps[1], number, &caps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenates_numeric_prefixed_codes() {
        let rule = IdRule::HyphenateCode;
        assert_eq!(normalize_product_id("259LUXU1010", &rule).as_deref(), Some("259LUXU-1010"));
        assert_eq!(normalize_product_id("259luxu-1010", &rule).as_deref(), Some("259LUXU-1010"));
        assert_eq!(normalize_product_id(" SIRO5000 ", &rule).as_deref(), Some("SIRO-5000"));
        assert_eq!(normalize_product_id("ABP123A", &rule).as_deref(), Some("ABP-123A"));
    }

    #[test]
    fn leaves_unrecognised_shapes_upper_cased() {
        let rule = IdRule::HyphenateCode;
        assert_eq!(normalize_product_id("fc2-ppv-123456", &rule).as_deref(), Some("FC2-PPV-123456"));
        assert_eq!(normalize_product_id("   ", &rule), None);
    }

    #[test]
    fn content_ids_drop_prefix_and_pad() {
        let rule = IdRule::ContentId;
        assert_eq!(normalize_product_id("h_123abc00045", &rule).as_deref(), Some("ABC-045"));
        assert_eq!(normalize_product_id("ssis00001", &rule).as_deref(), Some("SSIS-001"));
        assert_eq!(normalize_product_id("118abp01234", &rule).as_deref(), Some("ABP-1234"));
    }

    #[test]
    fn regex_rule_rewrites() {
        let rule = IdRule::Regex {
            pattern: r"^CW3D2DBD(\d+)$".into(),
            replacement: "CW3D2DBD-$1".into(),
        };
        assert_eq!(normalize_product_id("cw3d2dbd42", &rule).as_deref(), Some("CW3D2DBD-42"));
    }
}
