//! Typed views over raw scraped payloads. Untrusted items arrive as plain
//! JSON; the pipeline boundary parses them into one tagged variant per
//! platform and nothing downstream touches loose maps again.

use creatorpulse_common::Platform;
use serde::Deserialize;
use serde_json::Value;

use crate::stage::{Stage, StageIssue};

/// A scraped Instagram profile as the actor's dataset delivers it.
#[derive(Debug, Clone, Deserialize)]
pub struct InstagramProfile {
    pub username: String,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub biography: Option<String>,
    #[serde(rename = "profilePicUrl")]
    pub profile_pic_url: Option<String>,
    #[serde(rename = "followersCount")]
    pub followers_count: i64,
    #[serde(rename = "postsCount")]
    pub posts_count: Option<u32>,
    #[serde(rename = "totalLikes")]
    pub total_likes: Option<i64>,
    #[serde(rename = "totalComments")]
    pub total_comments: Option<i64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(rename = "businessCategoryName")]
    pub business_category_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TikTokProfile {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    #[serde(rename = "nickName")]
    pub nick_name: Option<String>,
    pub signature: Option<String>,
    pub avatar: Option<String>,
    pub fans: i64,
    pub videos: Option<u32>,
    #[serde(rename = "totalHearts")]
    pub total_hearts: Option<i64>,
    #[serde(rename = "totalComments")]
    pub total_comments: Option<i64>,
    #[serde(rename = "totalShares")]
    pub total_shares: Option<i64>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YouTubeChannel {
    #[serde(rename = "channelId")]
    pub channel_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "thumbnailUrl")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "subscriberCount")]
    pub subscriber_count: i64,
    #[serde(rename = "videoCount")]
    pub video_count: Option<u32>,
    #[serde(rename = "totalViews")]
    pub total_views: Option<i64>,
    #[serde(rename = "totalLikes")]
    pub total_likes: Option<i64>,
    #[serde(rename = "totalComments")]
    pub total_comments: Option<i64>,
    pub category: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterProfile {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "profileImageUrl")]
    pub profile_image_url: Option<String>,
    pub followers: i64,
    #[serde(rename = "tweetsCount")]
    pub tweets_count: Option<u32>,
    #[serde(rename = "totalLikes")]
    pub total_likes: Option<i64>,
    #[serde(rename = "totalRetweets")]
    pub total_retweets: Option<i64>,
    #[serde(rename = "totalReplies")]
    pub total_replies: Option<i64>,
    #[serde(rename = "isVerified", default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkedInProfile {
    #[serde(rename = "publicIdentifier")]
    pub public_identifier: String,
    #[serde(rename = "fullName")]
    pub full_name: Option<String>,
    pub headline: Option<String>,
    #[serde(rename = "profilePictureUrl")]
    pub profile_picture_url: Option<String>,
    #[serde(rename = "followerCount")]
    pub follower_count: i64,
    #[serde(rename = "postsCount")]
    pub posts_count: Option<u32>,
    #[serde(rename = "totalReactions")]
    pub total_reactions: Option<i64>,
    #[serde(rename = "totalComments")]
    pub total_comments: Option<i64>,
    pub industry: Option<String>,
}

/// One scraped profile, tagged by platform.
#[derive(Debug, Clone)]
pub enum RawProfile {
    Instagram(InstagramProfile),
    TikTok(TikTokProfile),
    YouTube(YouTubeChannel),
    Twitter(TwitterProfile),
    LinkedIn(LinkedInProfile),
}

impl RawProfile {
    /// Parse an untrusted item into the platform's typed shape. Parse
    /// failures are hard input-validation errors.
    pub fn parse(platform: Platform, value: &Value) -> Result<RawProfile, StageIssue> {
        let parsed = match platform {
            Platform::Instagram => {
                serde_json::from_value(value.clone()).map(RawProfile::Instagram)
            }
            Platform::TikTok => serde_json::from_value(value.clone()).map(RawProfile::TikTok),
            Platform::YouTube => serde_json::from_value(value.clone()).map(RawProfile::YouTube),
            Platform::Twitter => serde_json::from_value(value.clone()).map(RawProfile::Twitter),
            Platform::LinkedIn => serde_json::from_value(value.clone()).map(RawProfile::LinkedIn),
        };
        parsed.map_err(|e| {
            StageIssue::error(
                Stage::InputValidation,
                format!("{platform} payload does not match schema: {e}"),
            )
        })
    }

    pub fn platform(&self) -> Platform {
        match self {
            RawProfile::Instagram(_) => Platform::Instagram,
            RawProfile::TikTok(_) => Platform::TikTok,
            RawProfile::YouTube(_) => Platform::YouTube,
            RawProfile::Twitter(_) => Platform::Twitter,
            RawProfile::LinkedIn(_) => Platform::LinkedIn,
        }
    }

    /// The platform-scoped handle this profile belongs to.
    pub fn identifier(&self) -> &str {
        match self {
            RawProfile::Instagram(p) => &p.username,
            RawProfile::TikTok(p) => &p.unique_id,
            RawProfile::YouTube(p) => &p.channel_id,
            RawProfile::Twitter(p) => &p.user_name,
            RawProfile::LinkedIn(p) => &p.public_identifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_instagram_payload() {
        let value = json!({
            "username": "alice",
            "fullName": "Alice A",
            "followersCount": 1200,
            "postsCount": 40,
            "totalLikes": 24000,
            "totalComments": 1200,
            "verified": true
        });
        let raw = RawProfile::parse(Platform::Instagram, &value).unwrap();
        assert_eq!(raw.identifier(), "alice");
        assert_eq!(raw.platform(), Platform::Instagram);
    }

    #[test]
    fn missing_required_field_is_input_error() {
        let value = json!({"fullName": "No Username"});
        let err = RawProfile::parse(Platform::Instagram, &value).unwrap_err();
        assert_eq!(err.stage, Stage::InputValidation);
        assert!(err.is_error());
    }

    #[test]
    fn parses_tiktok_payload() {
        let value = json!({
            "uniqueId": "bob_tt",
            "nickName": "Bob",
            "fans": 50000,
            "videos": 120,
            "totalHearts": 900000
        });
        let raw = RawProfile::parse(Platform::TikTok, &value).unwrap();
        assert_eq!(raw.identifier(), "bob_tt");
    }

    #[test]
    fn wrong_platform_shape_rejected() {
        let value = json!({"uniqueId": "bob_tt", "fans": 1});
        assert!(RawProfile::parse(Platform::YouTube, &value).is_err());
    }
}
