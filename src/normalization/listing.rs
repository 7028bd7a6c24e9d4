//! Detection of placeholder scrapes: pages where the storefront redirected to
//! its homepage, an age gate, or a not-found page instead of the product.

/// Listings with shorter titles are never real products.
pub const MIN_TITLE_CHARS: usize = 4;

/// Titles that only ever appear on homepage/age-gate/404 redirects.
const PLACEHOLDER_TITLES: &[&str] = &[
    "fanza",
    "dmm.com",
    "dmm.r18",
    "mgs動画",
    "mgstage",
    "アダルト動画",
    "アダルト動画・エロ動画",
    "トップページ",
    "年齢認証",
    "404 not found",
    "not found",
    "access denied",
    "ページが見つかりません",
    "お探しのページは見つかりませんでした",
    "エラー",
    "error",
];

/// Description fragments that betray a redirect page.
const PLACEHOLDER_DESCRIPTION_FRAGMENTS: &[&str] = &[
    "年齢認証",
    "18歳未満",
    "お探しのページは見つかりませんでした",
    "ページが見つかりません",
    "アダルト動画・エロ動画が見放題",
    "page you requested could not be found",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidListing {
    TitleTooShort,
    PlaceholderTitle,
    PlaceholderDescription,
}

impl InvalidListing {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidListing::TitleTooShort => "title_too_short",
            InvalidListing::PlaceholderTitle => "placeholder_title",
            InvalidListing::PlaceholderDescription => "placeholder_description",
        }
    }
}

/// Classify a scraped listing; `Some` means it must not be linked.
pub fn check_listing(title: &str, description: Option<&str>) -> Option<InvalidListing> {
    let title = title.trim();
    if title.chars().count() < MIN_TITLE_CHARS {
        return Some(InvalidListing::TitleTooShort);
    }
    let lowered = title.to_lowercase();
    if PLACEHOLDER_TITLES.iter().any(|p| lowered == *p)
        || PLACEHOLDER_TITLES
            .iter()
            .any(|p| lowered.starts_with(p) && lowered[p.len()..].trim_start().starts_with(['|', '-', '｜']))
    {
        return Some(InvalidListing::PlaceholderTitle);
    }
    if let Some(desc) = description {
        let desc = desc.to_lowercase();
        if PLACEHOLDER_DESCRIPTION_FRAGMENTS.iter().any(|f| desc.contains(f)) {
            return Some(InvalidListing::PlaceholderDescription);
        }
    }
    None
}

pub fn is_invalid_listing(title: &str, description: Option<&str>) -> bool {
    check_listing(title, description).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_and_placeholder_titles() {
        assert_eq!(check_listing("abc", None), Some(InvalidListing::TitleTooShort));
        assert_eq!(check_listing("  FANZA  ", None), Some(InvalidListing::PlaceholderTitle));
        assert_eq!(
            check_listing("アダルト動画 | DMM", None),
            Some(InvalidListing::PlaceholderTitle)
        );
        assert_eq!(check_listing("404 Not Found", None), Some(InvalidListing::PlaceholderTitle));
    }

    #[test]
    fn rejects_age_gate_descriptions() {
        assert_eq!(
            check_listing(
                "素人ナンパ 259LUXU-1010",
                Some("ここから先は18歳未満の方はご利用いただけません。年齢認証")
            ),
            Some(InvalidListing::PlaceholderDescription)
        );
    }

    #[test]
    fn accepts_real_titles() {
        assert!(!is_invalid_listing("ラグジュTV 1010 美少女 ASUKA", Some("作品紹介")));
        assert!(!is_invalid_listing("Errors of Youth", None));
    }
}
