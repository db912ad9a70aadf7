//! Merging a freshly scraped record into a stored duplicate.

use std::collections::HashSet;

use creatorpulse_common::UnifiedCreator;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// The incoming scrape wins wholesale.
    Newest,
    /// The stored record wins wholesale.
    Oldest,
    /// Field-wise: fill gaps from the source, union identifiers and tags,
    /// keep the larger reach and score.
    #[default]
    MostComplete,
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(MergeStrategy::Newest),
            "oldest" => Ok(MergeStrategy::Oldest),
            "most-complete" => Ok(MergeStrategy::MostComplete),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

fn prefer_filled(target: Option<String>, source: Option<String>) -> Option<String> {
    match target {
        Some(t) if !t.is_empty() => Some(t),
        _ => source,
    }
}

/// Merge `source` (incoming) into `target` (stored) per the strategy,
/// producing the record to persist.
pub fn merge(target: &UnifiedCreator, source: &UnifiedCreator, strategy: MergeStrategy) -> UnifiedCreator {
    match strategy {
        MergeStrategy::Newest => source.clone(),
        MergeStrategy::Oldest => target.clone(),
        MergeStrategy::MostComplete => {
            let mut out = target.clone();

            if out.name.trim().is_empty() {
                out.name = source.name.clone();
            }
            out.email = prefer_filled(out.email.take(), source.email.clone());
            out.bio = prefer_filled(out.bio.take(), source.bio.clone());
            out.profile_image_url =
                prefer_filled(out.profile_image_url.take(), source.profile_image_url.clone());
            out.category = prefer_filled(out.category.take(), source.category.clone());
            out.is_verified = out.is_verified || source.is_verified;

            out.platform_identifiers.union(&source.platform_identifiers);

            let mut seen: HashSet<String> = out.tags.iter().cloned().collect();
            for tag in &source.tags {
                if seen.insert(tag.clone()) {
                    out.tags.push(tag.clone());
                }
            }

            out.total_reach = out.total_reach.max(source.total_reach);
            out.composite_engagement_score =
                match (out.composite_engagement_score, source.composite_engagement_score) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
            out.average_engagement_rate =
                out.average_engagement_rate.or(source.average_engagement_rate);
            out.content_frequency = out.content_frequency.or(source.content_frequency);
            out.audience_quality_score =
                out.audience_quality_score.or(source.audience_quality_score);

            for (platform, data) in &source.platform_data {
                out.platform_data
                    .entry(*platform)
                    .or_insert_with(|| data.clone());
            }

            // The freshest scrape wins the provenance fields
            if source.scraped_at > out.scraped_at {
                out.scraped_at = source.scraped_at;
                out.source_actor_id = source.source_actor_id.clone();
                out.source_run_id = source.source_run_id.clone();
            }

            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use creatorpulse_common::{Platform, PlatformIdentifiers};
    use serde_json::json;

    fn stored() -> UnifiedCreator {
        let mut c = UnifiedCreator::named("Alice", Utc::now() - chrono::Duration::days(2));
        c.bio = Some("stored bio".into());
        c.tags = vec!["food".into()];
        c.total_reach = 5000;
        c.platform_identifiers = PlatformIdentifiers {
            instagram_username: Some("alice".into()),
            ..Default::default()
        };
        c.platform_data
            .insert(Platform::Instagram, json!({"followers": 5000}));
        c
    }

    fn incoming() -> UnifiedCreator {
        let mut c = UnifiedCreator::named("Alice", Utc::now());
        c.email = Some("alice@example.com".into());
        c.tags = vec!["food".into(), "travel".into()];
        c.total_reach = 4000;
        c.composite_engagement_score = Some(61.0);
        c.platform_identifiers = PlatformIdentifiers {
            tiktok_username: Some("alice_tt".into()),
            ..Default::default()
        };
        c.platform_data
            .insert(Platform::TikTok, json!({"fans": 4000}));
        c
    }

    #[test]
    fn newest_takes_source_wholesale() {
        let merged = merge(&stored(), &incoming(), MergeStrategy::Newest);
        assert!(merged.bio.is_none());
        assert_eq!(merged.total_reach, 4000);
    }

    #[test]
    fn oldest_keeps_target_wholesale() {
        let merged = merge(&stored(), &incoming(), MergeStrategy::Oldest);
        assert_eq!(merged.bio.as_deref(), Some("stored bio"));
        assert!(merged.email.is_none());
    }

    #[test]
    fn most_complete_fills_gaps_only() {
        let merged = merge(&stored(), &incoming(), MergeStrategy::MostComplete);
        // Target's filled field kept, source fills the gap
        assert_eq!(merged.bio.as_deref(), Some("stored bio"));
        assert_eq!(merged.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn most_complete_unions_identifiers_and_tags() {
        let merged = merge(&stored(), &incoming(), MergeStrategy::MostComplete);
        assert_eq!(
            merged.platform_identifiers.instagram_username.as_deref(),
            Some("alice")
        );
        assert_eq!(
            merged.platform_identifiers.tiktok_username.as_deref(),
            Some("alice_tt")
        );
        assert_eq!(merged.tags, vec!["food", "travel"]);
        assert_eq!(merged.platform_data.len(), 2);
    }

    #[test]
    fn most_complete_keeps_max_metrics() {
        let merged = merge(&stored(), &incoming(), MergeStrategy::MostComplete);
        assert_eq!(merged.total_reach, 5000);
        assert_eq!(merged.composite_engagement_score, Some(61.0));
    }

    #[test]
    fn most_complete_commutes_on_non_conflicting_fields() {
        let a = stored();
        let b = incoming();
        let ab = merge(&a, &b, MergeStrategy::MostComplete);
        let ba = merge(&b, &a, MergeStrategy::MostComplete);

        // Non-conflicting fields agree regardless of direction
        assert_eq!(ab.email, ba.email);
        assert_eq!(ab.platform_identifiers, ba.platform_identifiers);
        assert_eq!(ab.total_reach, ba.total_reach);
        assert_eq!(ab.composite_engagement_score, ba.composite_engagement_score);
        let mut ab_tags = ab.tags.clone();
        let mut ba_tags = ba.tags.clone();
        ab_tags.sort();
        ba_tags.sort();
        assert_eq!(ab_tags, ba_tags);
    }
}
