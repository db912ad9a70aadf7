//! Structural checks at both ends of the pipeline: untrusted payloads on
//! the way in, unified records on the way out.

use chrono::{DateTime, Utc};
use creatorpulse_common::{Platform, UnifiedCreator};
use serde_json::Value;

use crate::stage::{Stage, StageIssue};

/// Reach beyond this is flagged as implausible.
const REACH_PLAUSIBILITY_CEILING: i64 = 1_000_000_000;
/// Engagement above this percentage is flagged as implausible.
const ENGAGEMENT_PLAUSIBILITY_CEILING: f64 = 50.0;

/// Field names that must be present and non-empty per platform.
fn required_fields(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Instagram => &["username", "followersCount"],
        Platform::TikTok => &["uniqueId", "fans"],
        Platform::YouTube => &["channelId", "subscriberCount"],
        Platform::Twitter => &["userName", "followers"],
        Platform::LinkedIn => &["publicIdentifier", "followerCount"],
    }
}

/// Fields that, when present, should hold well-formed URLs.
fn url_fields(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Instagram => &["profilePicUrl"],
        Platform::TikTok => &["avatar"],
        Platform::YouTube => &["thumbnailUrl"],
        Platform::Twitter => &["profileImageUrl"],
        Platform::LinkedIn => &["profilePictureUrl"],
    }
}

/// Structural check on an untrusted item. Missing required fields and
/// negative audience counts are hard errors; malformed optional URLs and
/// suspicious magnitudes are soft warnings.
pub fn validate_input(platform: Platform, value: &Value) -> Vec<StageIssue> {
    let mut issues = Vec::new();

    let Some(obj) = value.as_object() else {
        issues.push(StageIssue::error(
            Stage::InputValidation,
            "item is not a JSON object",
        ));
        return issues;
    };

    for field in required_fields(platform) {
        let present = obj
            .get(*field)
            .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true))
            .unwrap_or(false);
        if !present {
            issues.push(StageIssue::error(
                Stage::InputValidation,
                format!("missing required field: {field}"),
            ));
        }
    }

    // Audience counts must be plausible numbers
    for field in ["followersCount", "fans", "subscriberCount", "followers", "followerCount"] {
        if let Some(n) = obj.get(field).and_then(|v| v.as_i64()) {
            if n < 0 {
                issues.push(StageIssue::error(
                    Stage::InputValidation,
                    format!("{field} is negative: {n}"),
                ));
            } else if n > REACH_PLAUSIBILITY_CEILING {
                issues.push(StageIssue::warning(
                    Stage::InputValidation,
                    format!("{field} looks implausible: {n}"),
                ));
            }
        }
    }

    for field in url_fields(platform) {
        if let Some(raw) = obj.get(*field).and_then(|v| v.as_str()) {
            if !raw.is_empty() && url::Url::parse(raw).is_err() {
                issues.push(StageIssue::warning(
                    Stage::InputValidation,
                    format!("{field} is not a well-formed URL: {raw}"),
                ));
            }
        }
    }

    issues
}

/// Final gate before a record is handed to storage.
pub fn validate_output(creator: &UnifiedCreator, now: DateTime<Utc>) -> Vec<StageIssue> {
    let mut issues = Vec::new();

    if creator.name.trim().is_empty() {
        issues.push(StageIssue::error(Stage::OutputValidation, "name is empty"));
    }
    if creator.platform_identifiers.is_empty() {
        issues.push(StageIssue::error(
            Stage::OutputValidation,
            "record carries no platform identifier",
        ));
    }
    if creator.total_reach < 0 {
        issues.push(StageIssue::error(
            Stage::OutputValidation,
            format!("total_reach is negative: {}", creator.total_reach),
        ));
    }
    if let Some(rate) = creator.average_engagement_rate {
        if !(0.0..=100.0).contains(&rate) {
            issues.push(StageIssue::error(
                Stage::OutputValidation,
                format!("average_engagement_rate out of range: {rate}"),
            ));
        } else if rate > ENGAGEMENT_PLAUSIBILITY_CEILING {
            issues.push(StageIssue::warning(
                Stage::OutputValidation,
                format!("engagement rate looks implausible: {rate:.1}%"),
            ));
        }
    }
    if creator.scraped_at > now {
        issues.push(StageIssue::error(
            Stage::OutputValidation,
            "scraped_at is in the future",
        ));
    }
    if creator.total_reach > REACH_PLAUSIBILITY_CEILING {
        issues.push(StageIssue::warning(
            Stage::OutputValidation,
            format!("total_reach looks implausible: {}", creator.total_reach),
        ));
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use creatorpulse_common::PlatformIdentifiers;
    use serde_json::json;

    #[test]
    fn complete_payload_passes() {
        let value = json!({"username": "alice", "followersCount": 1000});
        assert!(validate_input(Platform::Instagram, &value).is_empty());
    }

    #[test]
    fn missing_required_field_is_hard_error() {
        let value = json!({"followersCount": 1000});
        let issues = validate_input(Platform::Instagram, &value);
        assert!(issues.iter().any(|i| i.is_error()));
    }

    #[test]
    fn negative_followers_is_hard_error() {
        let value = json!({"username": "alice", "followersCount": -5});
        let issues = validate_input(Platform::Instagram, &value);
        assert!(issues.iter().any(|i| i.is_error()));
    }

    #[test]
    fn malformed_url_is_soft_warning() {
        let value = json!({
            "username": "alice",
            "followersCount": 10,
            "profilePicUrl": "not a url"
        });
        let issues = validate_input(Platform::Instagram, &value);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].is_error());
    }

    #[test]
    fn non_object_rejected() {
        let issues = validate_input(Platform::TikTok, &json!([1, 2, 3]));
        assert!(issues.iter().any(|i| i.is_error()));
    }

    fn creator_with_identifier() -> UnifiedCreator {
        let mut c = UnifiedCreator::named("Alice", Utc::now());
        c.platform_identifiers = PlatformIdentifiers {
            instagram_username: Some("alice".into()),
            ..Default::default()
        };
        c
    }

    #[test]
    fn output_requires_an_identifier() {
        let mut c = creator_with_identifier();
        c.platform_identifiers = PlatformIdentifiers::default();
        let issues = validate_output(&c, Utc::now());
        assert!(issues.iter().any(|i| i.is_error()));
    }

    #[test]
    fn valid_output_passes_clean() {
        let c = creator_with_identifier();
        assert!(validate_output(&c, Utc::now()).is_empty());
    }

    #[test]
    fn implausible_metrics_warn_but_pass() {
        let mut c = creator_with_identifier();
        c.total_reach = 2_000_000_000;
        c.average_engagement_rate = Some(75.0);
        let issues = validate_output(&c, Utc::now());
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| !i.is_error()));
    }

    #[test]
    fn out_of_range_engagement_is_error() {
        let mut c = creator_with_identifier();
        c.average_engagement_rate = Some(120.0);
        let issues = validate_output(&c, Utc::now());
        assert!(issues.iter().any(|i| i.is_error()));
    }

    #[test]
    fn future_scrape_time_is_error() {
        let mut c = creator_with_identifier();
        c.scraped_at = Utc::now() + chrono::Duration::hours(1);
        let issues = validate_output(&c, Utc::now());
        assert!(issues.iter().any(|i| i.is_error()));
    }
}
