//! Normalization: canonical casing for identifiers, sanitized text, clamped
//! metrics, and URLs stripped of tracking baggage.

use std::collections::HashSet;
use std::sync::LazyLock;

use creatorpulse_common::UnifiedCreator;
use regex::Regex;

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Query params dropped during URL normalization.
const TRACKING_PARAMS: [&str; 7] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
];

fn clean_identifier(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().trim_start_matches('@').to_lowercase())
        .filter(|v| !v.is_empty())
}

/// Strip HTML tags and collapse the leftover whitespace.
pub fn strip_html(text: &str) -> String {
    let stripped = HTML_TAG_RE.replace_all(text, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Force https, drop tracking params, drop fragments. Unparseable URLs are
/// returned untouched.
pub fn normalize_url(raw: &str) -> String {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let Ok(mut parsed) = url::Url::parse(&candidate) else {
        return raw.to_string();
    };
    if parsed.scheme() == "http" {
        let _ = parsed.set_scheme("https");
    }
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Normalize a unified record in place.
pub fn normalize(creator: &mut UnifiedCreator) {
    let ids = &mut creator.platform_identifiers;
    ids.instagram_username = clean_identifier(&ids.instagram_username);
    ids.tiktok_username = clean_identifier(&ids.tiktok_username);
    ids.twitter_handle = clean_identifier(&ids.twitter_handle);
    ids.linkedin_slug = clean_identifier(&ids.linkedin_slug);
    // Channel ids are case-sensitive; trim only
    ids.youtube_channel_id = ids
        .youtube_channel_id
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    creator.name = strip_html(&creator.name);
    creator.bio = creator
        .bio
        .as_ref()
        .map(|b| strip_html(b))
        .filter(|b| !b.is_empty());

    creator.category = creator
        .category
        .as_ref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());

    let mut seen = HashSet::new();
    creator.tags = creator
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();

    creator.total_reach = creator.total_reach.max(0);
    creator.average_engagement_rate = creator
        .average_engagement_rate
        .map(|r| r.clamp(0.0, 100.0));
    creator.composite_engagement_score = creator
        .composite_engagement_score
        .map(|s| s.clamp(0.0, 100.0));

    creator.profile_image_url = creator
        .profile_image_url
        .as_ref()
        .map(|u| normalize_url(u))
        .filter(|u| !u.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use creatorpulse_common::PlatformIdentifiers;

    fn creator() -> UnifiedCreator {
        let mut c = UnifiedCreator::named("Alice", Utc::now());
        c.platform_identifiers = PlatformIdentifiers {
            instagram_username: Some("  @Alice_Cooks ".into()),
            ..Default::default()
        };
        c
    }

    #[test]
    fn identifiers_trimmed_and_lowercased() {
        let mut c = creator();
        normalize(&mut c);
        assert_eq!(
            c.platform_identifiers.instagram_username.as_deref(),
            Some("alice_cooks")
        );
    }

    #[test]
    fn youtube_channel_id_keeps_case() {
        let mut c = creator();
        c.platform_identifiers.youtube_channel_id = Some(" UCabcDEF123 ".into());
        normalize(&mut c);
        assert_eq!(
            c.platform_identifiers.youtube_channel_id.as_deref(),
            Some("UCabcDEF123")
        );
    }

    #[test]
    fn tags_deduped_lowercased() {
        let mut c = creator();
        c.tags = vec!["Food".into(), "food".into(), " FOOD ".into(), "travel".into()];
        normalize(&mut c);
        assert_eq!(c.tags, vec!["food", "travel"]);
    }

    #[test]
    fn html_stripped_from_name_and_bio() {
        let mut c = creator();
        c.name = "<b>Alice</b> <script>x</script>Cooks".into();
        c.bio = Some("line<br/>break".into());
        normalize(&mut c);
        assert_eq!(c.name, "Alice x Cooks");
        assert_eq!(c.bio.as_deref(), Some("line break"));
    }

    #[test]
    fn metrics_clamped() {
        let mut c = creator();
        c.total_reach = -50;
        c.average_engagement_rate = Some(250.0);
        normalize(&mut c);
        assert_eq!(c.total_reach, 0);
        assert_eq!(c.average_engagement_rate, Some(100.0));
    }

    #[test]
    fn urls_lose_tracking_params_and_gain_https() {
        assert_eq!(
            normalize_url("http://example.com/p?utm_source=x&id=7&fbclid=abc"),
            "https://example.com/p?id=7"
        );
        assert_eq!(
            normalize_url("http://example.com/p?utm_source=x"),
            "https://example.com/p"
        );
    }

    #[test]
    fn unparseable_url_left_alone() {
        assert_eq!(normalize_url("::::"), "::::");
    }

    #[test]
    fn category_lowercased() {
        let mut c = creator();
        c.category = Some("  Food & Drink ".into());
        normalize(&mut c);
        assert_eq!(c.category.as_deref(), Some("food & drink"));
    }
}
