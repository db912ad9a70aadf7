use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Social platforms the orchestration plane scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    TikTok,
    YouTube,
    Twitter,
    LinkedIn,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Instagram,
        Platform::TikTok,
        Platform::YouTube,
        Platform::Twitter,
        Platform::LinkedIn,
    ];

    /// Env-var prefix for per-platform configuration (`TIKTOK_RATE_WINDOW_MS` etc.).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Platform::Instagram => "INSTAGRAM",
            Platform::TikTok => "TIKTOK",
            Platform::YouTube => "YOUTUBE",
            Platform::Twitter => "TWITTER",
            Platform::LinkedIn => "LINKEDIN",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Instagram => write!(f, "instagram"),
            Platform::TikTok => write!(f, "tiktok"),
            Platform::YouTube => write!(f, "youtube"),
            Platform::Twitter => write!(f, "twitter"),
            Platform::LinkedIn => write!(f, "linkedin"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "youtube" => Ok(Self::YouTube),
            "twitter" | "x" => Ok(Self::Twitter),
            "linkedin" => Ok(Self::LinkedIn),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Platform-scoped unique handles for one creator. A persisted record must
/// carry at least one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformIdentifiers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiktok_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_slug: Option<String>,
}

impl PlatformIdentifiers {
    /// All present identifiers as (field name, value) pairs.
    pub fn present(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = self.youtube_channel_id.as_deref() {
            out.push(("youtube_channel_id", v));
        }
        if let Some(v) = self.twitter_handle.as_deref() {
            out.push(("twitter_handle", v));
        }
        if let Some(v) = self.instagram_username.as_deref() {
            out.push(("instagram_username", v));
        }
        if let Some(v) = self.tiktok_username.as_deref() {
            out.push(("tiktok_username", v));
        }
        if let Some(v) = self.linkedin_slug.as_deref() {
            out.push(("linkedin_slug", v));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    /// Fill in any identifier missing on `self` from `other`.
    pub fn union(&mut self, other: &PlatformIdentifiers) {
        if self.youtube_channel_id.is_none() {
            self.youtube_channel_id = other.youtube_channel_id.clone();
        }
        if self.twitter_handle.is_none() {
            self.twitter_handle = other.twitter_handle.clone();
        }
        if self.instagram_username.is_none() {
            self.instagram_username = other.instagram_username.clone();
        }
        if self.tiktok_username.is_none() {
            self.tiktok_username = other.tiktok_username.clone();
        }
        if self.linkedin_slug.is_none() {
            self.linkedin_slug = other.linkedin_slug.clone();
        }
    }

    /// Count of identifier fields present on both sides with equal values.
    pub fn matching(&self, other: &PlatformIdentifiers) -> usize {
        let theirs: HashMap<&str, &str> = other.present().into_iter().collect();
        self.present()
            .into_iter()
            .filter(|(field, value)| theirs.get(field) == Some(value))
            .count()
    }

    /// The identifier for a given platform, if present.
    pub fn for_platform(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::Instagram => self.instagram_username.as_deref(),
            Platform::TikTok => self.tiktok_username.as_deref(),
            Platform::YouTube => self.youtube_channel_id.as_deref(),
            Platform::Twitter => self.twitter_handle.as_deref(),
            Platform::LinkedIn => self.linkedin_slug.as_deref(),
        }
    }
}

/// The single normalized record per creator produced by the result pipeline.
///
/// Invariants enforced at output validation: `name` non-empty, `total_reach
/// >= 0`, `average_engagement_rate` in [0, 100], at least one platform
/// identifier, `scraped_at <= now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedCreator {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub is_verified: bool,
    pub platform_identifiers: PlatformIdentifiers,
    pub total_reach: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_engagement_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_engagement_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_frequency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience_quality_score: Option<f64>,
    /// Per-platform raw snapshot kept alongside the unified fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub platform_data: HashMap<Platform, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl UnifiedCreator {
    /// An empty record for a given name; fields filled by the transformer.
    pub fn named(name: impl Into<String>, scraped_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email: None,
            bio: None,
            profile_image_url: None,
            category: None,
            tags: Vec::new(),
            is_verified: false,
            platform_identifiers: PlatformIdentifiers::default(),
            total_reach: 0,
            composite_engagement_score: None,
            average_engagement_rate: None,
            content_frequency: None,
            audience_quality_score: None,
            platform_data: HashMap::new(),
            source_actor_id: None,
            source_run_id: None,
            scraped_at,
        }
    }
}
