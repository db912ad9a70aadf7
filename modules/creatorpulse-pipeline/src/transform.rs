//! Platform transformers: each turns a typed raw profile into a
//! `UnifiedCreator`, computing per-post averages and the engagement rate
//! from the scrape totals.

use chrono::{DateTime, Utc};
use creatorpulse_common::{Platform, PlatformIdentifiers, UnifiedCreator};
use serde_json::json;

use crate::raw::RawProfile;

/// Where the scrape came from, stamped onto every record.
#[derive(Debug, Clone, Default)]
pub struct SourceMeta {
    pub actor_id: Option<String>,
    pub run_id: Option<String>,
}

/// `(interactions / followers / posts) * 100`, or None when either
/// denominator is zero.
fn engagement_rate(interactions: i64, followers: i64, posts: u32) -> Option<f64> {
    if followers <= 0 || posts == 0 {
        return None;
    }
    Some(interactions as f64 / followers as f64 / posts as f64 * 100.0)
}

fn per_post_average(total: Option<i64>, posts: Option<u32>) -> Option<f64> {
    match (total, posts) {
        (Some(t), Some(p)) if p > 0 => Some(t as f64 / p as f64),
        _ => None,
    }
}

/// Build the unified record for one scraped profile.
pub fn transform(raw: &RawProfile, meta: &SourceMeta, now: DateTime<Utc>) -> UnifiedCreator {
    let mut creator = match raw {
        RawProfile::Instagram(p) => {
            let interactions = p.total_likes.unwrap_or(0) + p.total_comments.unwrap_or(0);
            let mut c = UnifiedCreator::named(
                p.full_name.clone().unwrap_or_else(|| p.username.clone()),
                now,
            );
            c.email = p.email.clone();
            c.bio = p.biography.clone();
            c.profile_image_url = p.profile_pic_url.clone();
            c.category = p.business_category_name.clone();
            c.is_verified = p.verified;
            c.platform_identifiers = PlatformIdentifiers {
                instagram_username: Some(p.username.clone()),
                ..Default::default()
            };
            c.total_reach = p.followers_count;
            c.average_engagement_rate =
                engagement_rate(interactions, p.followers_count, p.posts_count.unwrap_or(0));
            c.platform_data.insert(
                Platform::Instagram,
                json!({
                    "followers": p.followers_count,
                    "posts": p.posts_count,
                    "avg_likes": per_post_average(p.total_likes, p.posts_count),
                    "avg_comments": per_post_average(p.total_comments, p.posts_count),
                }),
            );
            c
        }
        RawProfile::TikTok(p) => {
            let interactions = p.total_hearts.unwrap_or(0)
                + p.total_comments.unwrap_or(0)
                + p.total_shares.unwrap_or(0);
            let mut c = UnifiedCreator::named(
                p.nick_name.clone().unwrap_or_else(|| p.unique_id.clone()),
                now,
            );
            c.bio = p.signature.clone();
            c.profile_image_url = p.avatar.clone();
            c.is_verified = p.verified;
            c.platform_identifiers = PlatformIdentifiers {
                tiktok_username: Some(p.unique_id.clone()),
                ..Default::default()
            };
            c.total_reach = p.fans;
            c.average_engagement_rate =
                engagement_rate(interactions, p.fans, p.videos.unwrap_or(0));
            c.platform_data.insert(
                Platform::TikTok,
                json!({
                    "fans": p.fans,
                    "videos": p.videos,
                    "avg_hearts": per_post_average(p.total_hearts, p.videos),
                    "avg_comments": per_post_average(p.total_comments, p.videos),
                    "avg_shares": per_post_average(p.total_shares, p.videos),
                }),
            );
            c
        }
        RawProfile::YouTube(p) => {
            let interactions = p.total_likes.unwrap_or(0) + p.total_comments.unwrap_or(0);
            let mut c = UnifiedCreator::named(
                p.title.clone().unwrap_or_else(|| p.channel_id.clone()),
                now,
            );
            c.bio = p.description.clone();
            c.profile_image_url = p.thumbnail_url.clone();
            c.category = p.category.clone();
            c.is_verified = p.verified;
            c.platform_identifiers = PlatformIdentifiers {
                youtube_channel_id: Some(p.channel_id.clone()),
                ..Default::default()
            };
            c.total_reach = p.subscriber_count;
            c.average_engagement_rate =
                engagement_rate(interactions, p.subscriber_count, p.video_count.unwrap_or(0));
            c.platform_data.insert(
                Platform::YouTube,
                json!({
                    "subscribers": p.subscriber_count,
                    "videos": p.video_count,
                    "avg_views": per_post_average(p.total_views, p.video_count),
                    "avg_likes": per_post_average(p.total_likes, p.video_count),
                }),
            );
            c
        }
        RawProfile::Twitter(p) => {
            let interactions = p.total_likes.unwrap_or(0)
                + p.total_retweets.unwrap_or(0)
                + p.total_replies.unwrap_or(0);
            let mut c =
                UnifiedCreator::named(p.name.clone().unwrap_or_else(|| p.user_name.clone()), now);
            c.bio = p.description.clone();
            c.profile_image_url = p.profile_image_url.clone();
            c.is_verified = p.is_verified;
            c.platform_identifiers = PlatformIdentifiers {
                twitter_handle: Some(p.user_name.clone()),
                ..Default::default()
            };
            c.total_reach = p.followers;
            c.average_engagement_rate =
                engagement_rate(interactions, p.followers, p.tweets_count.unwrap_or(0));
            c.platform_data.insert(
                Platform::Twitter,
                json!({
                    "followers": p.followers,
                    "tweets": p.tweets_count,
                    "avg_likes": per_post_average(p.total_likes, p.tweets_count),
                    "avg_retweets": per_post_average(p.total_retweets, p.tweets_count),
                }),
            );
            c
        }
        RawProfile::LinkedIn(p) => {
            let interactions = p.total_reactions.unwrap_or(0) + p.total_comments.unwrap_or(0);
            let mut c = UnifiedCreator::named(
                p.full_name
                    .clone()
                    .unwrap_or_else(|| p.public_identifier.clone()),
                now,
            );
            c.bio = p.headline.clone();
            c.profile_image_url = p.profile_picture_url.clone();
            c.category = p.industry.clone();
            c.platform_identifiers = PlatformIdentifiers {
                linkedin_slug: Some(p.public_identifier.clone()),
                ..Default::default()
            };
            c.total_reach = p.follower_count;
            c.average_engagement_rate =
                engagement_rate(interactions, p.follower_count, p.posts_count.unwrap_or(0));
            c.platform_data.insert(
                Platform::LinkedIn,
                json!({
                    "followers": p.follower_count,
                    "posts": p.posts_count,
                    "avg_reactions": per_post_average(p.total_reactions, p.posts_count),
                }),
            );
            c
        }
    };

    creator.source_actor_id = meta.actor_id.clone();
    creator.source_run_id = meta.run_id.clone();
    creator.scraped_at = now;
    creator
}
