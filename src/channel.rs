// Channel read operations
// Tier-aware lookups against the data API; Demo answers locally

use chrono::{DateTime, TimeZone, Utc};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthTier, Handle};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http_client::RetryingHttpClient;

const MAX_PAGE_SIZE: u32 = 50;
const DEMO_VIDEO_COUNT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub subscriber_count: Option<u64>,
    pub video_count: Option<u64>,
    pub view_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Processing state of an uploaded video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStatus {
    pub id: String,
    pub title: String,
    pub privacy_status: Option<String>,
    pub upload_status: Option<String>,
    pub processing_status: Option<String>,
    pub failure_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub duration: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

// Wire types, only the fields read here

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Snippet {
    title: String,
    description: String,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Statistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    id: String,
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    statistics: Statistics,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    #[serde(default)]
    snippet: Snippet,
    content_details: PlaylistItemContent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContent {
    video_id: String,
}

#[derive(Deserialize)]
struct SearchResult {
    id: SearchResultId,
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultId {
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    status: VideoResourceStatus,
    #[serde(default)]
    processing_details: ProcessingDetails,
    #[serde(default)]
    content_details: VideoContentDetails,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct VideoResourceStatus {
    privacy_status: Option<String>,
    upload_status: Option<String>,
    failure_reason: Option<String>,
    rejection_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ProcessingDetails {
    processing_status: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VideoContentDetails {
    duration: Option<String>,
}

impl From<ChannelResource> for ChannelInfo {
    fn from(channel: ChannelResource) -> Self {
        Self {
            id: channel.id,
            title: channel.snippet.title,
            description: channel.snippet.description,
            subscriber_count: parse_count(channel.statistics.subscriber_count),
            video_count: parse_count(channel.statistics.video_count),
            view_count: parse_count(channel.statistics.view_count),
        }
    }
}

impl From<VideoResource> for VideoStatus {
    fn from(video: VideoResource) -> Self {
        Self {
            id: video.id,
            title: video.snippet.title,
            privacy_status: video.status.privacy_status,
            upload_status: video.status.upload_status,
            processing_status: video.processing_details.processing_status,
            failure_reason: video.status.failure_reason,
            rejection_reason: video.status.rejection_reason,
            duration: video.content_details.duration,
            published_at: video.snippet.published_at,
        }
    }
}

/// Counts arrive as decimal strings
fn parse_count(value: Option<String>) -> Option<u64> {
    value.and_then(|v| v.parse().ok())
}

/// Read-only channel and video lookups for any tier
pub struct ChannelClient {
    handle: Handle,
    http: RetryingHttpClient,
    api_base_url: String,
}

impl ChannelClient {
    pub fn new(handle: Handle, http: RetryingHttpClient, api_base_url: impl Into<String>) -> Self {
        Self {
            handle,
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(handle: Handle, config: &Config) -> Result<Self> {
        let http = RetryingHttpClient::from_config(config)?;
        Ok(Self::new(handle, http, config.api_base_url.clone()))
    }

    pub fn tier(&self) -> AuthTier {
        self.handle.tier()
    }

    /// The authenticated channel (FullAccess) or `channel_id` (ReadOnly)
    pub async fn channel_info(&self, channel_id: Option<&str>) -> Result<Option<ChannelInfo>> {
        if self.handle.tier() == AuthTier::Demo {
            return Ok(Some(demo_channel()));
        }

        let mut params = vec![("part", "snippet,statistics".to_string())];
        params.push(self.channel_selector(channel_id)?);

        let response: ListResponse<ChannelResource> = self.get("channels", params).await?;
        Ok(response.items.into_iter().next().map(ChannelInfo::from))
    }

    /// Most recent uploads, newest first
    pub async fn recent_uploads(
        &self,
        channel_id: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<VideoSummary>> {
        let max_results = max_results.clamp(1, MAX_PAGE_SIZE);

        match self.handle.tier() {
            AuthTier::Demo => Ok(demo_videos(max_results)),
            AuthTier::ReadOnly => {
                let (_, channel_id) = self.channel_selector(channel_id)?;
                self.search_uploads(channel_id, max_results).await
            }
            AuthTier::FullAccess => {
                let params = vec![
                    ("part", "contentDetails".to_string()),
                    self.channel_selector(channel_id)?,
                ];
                let channels: ListResponse<ChannelResource> = self.get("channels", params).await?;

                let uploads = channels
                    .items
                    .into_iter()
                    .next()
                    .and_then(|c| c.content_details)
                    .and_then(|d| d.related_playlists.uploads);

                let Some(playlist_id) = uploads else {
                    tracing::warn!("Channel has no uploads playlist");
                    return Ok(Vec::new());
                };

                let params = vec![
                    ("part", "snippet,contentDetails".to_string()),
                    ("playlistId", playlist_id),
                    ("maxResults", max_results.to_string()),
                ];
                let items: ListResponse<PlaylistItem> = self.get("playlistItems", params).await?;

                Ok(items
                    .items
                    .into_iter()
                    .map(|item| VideoSummary {
                        id: item.content_details.video_id,
                        title: item.snippet.title,
                        published_at: item.snippet.published_at,
                    })
                    .collect())
            }
        }
    }

    pub async fn video_status(&self, video_id: &str) -> Result<Option<VideoStatus>> {
        let video_id = video_id.trim();
        if video_id.is_empty() {
            return Err(Error::InvalidInput("Video id must not be empty".to_string()));
        }

        if self.handle.tier() == AuthTier::Demo {
            return Ok(Some(demo_status(video_id)));
        }

        let params = vec![
            ("part", "snippet,status,processingDetails,contentDetails".to_string()),
            ("id", video_id.to_string()),
        ];
        let response: ListResponse<VideoResource> = self.get("videos", params).await?;
        Ok(response.items.into_iter().next().map(VideoStatus::from))
    }

    async fn search_uploads(&self, channel_id: String, max_results: u32) -> Result<Vec<VideoSummary>> {
        let params = vec![
            ("part", "snippet".to_string()),
            ("channelId", channel_id),
            ("order", "date".to_string()),
            ("type", "video".to_string()),
            ("maxResults", max_results.to_string()),
        ];
        let response: ListResponse<SearchResult> = self.get("search", params).await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|r| {
                r.id.video_id.map(|id| VideoSummary {
                    id,
                    title: r.snippet.title,
                    published_at: r.snippet.published_at,
                })
            })
            .collect())
    }

    /// `mine=true` for the owner, `id=` otherwise; a static key cannot say "mine"
    fn channel_selector(&self, channel_id: Option<&str>) -> Result<(&'static str, String)> {
        match channel_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Ok(("id", id.to_string())),
            None if self.handle.tier() == AuthTier::FullAccess => {
                Ok(("mine", "true".to_string()))
            }
            None => Err(Error::InvalidInput(
                "A channel id is required with an API key".to_string(),
            )),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base_url, resource);
        tracing::debug!(resource = resource, "Data API request");

        let response = self
            .http
            .execute_with_retry(|| {
                let builder = self.http.client().get(&url).query(&params);
                authorize(self.handle.clone(), builder)
            })
            .await?;

        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|e| Error::Rejected {
            status,
            message: format!("Malformed {} response: {}", resource, e),
        })
    }
}

/// Bearer token for FullAccess, `key=` for ReadOnly
async fn authorize(handle: Handle, builder: RequestBuilder) -> Result<RequestBuilder> {
    if let Some(lifecycle) = handle.lifecycle() {
        let token = lifecycle.access_token().await?;
        return Ok(builder.bearer_auth(token));
    }

    match handle.api_key() {
        Some(key) => Ok(builder.query(&[("key", key)])),
        None => Err(Error::Permission(
            "Demo tier has no platform access".to_string(),
        )),
    }
}

fn demo_channel() -> ChannelInfo {
    ChannelInfo {
        id: "demo_channel".to_string(),
        title: "Demo YouTube Channel".to_string(),
        description: "Sample data from demo mode".to_string(),
        subscriber_count: Some(56_789),
        video_count: Some(123),
        view_count: Some(1_234_567),
    }
}

fn demo_videos(max_results: u32) -> Vec<VideoSummary> {
    (0..max_results.min(DEMO_VIDEO_COUNT))
        .map(|i| VideoSummary {
            id: format!("demo_video_{}", i + 1),
            title: format!("Demo Video {}", i + 1),
            published_at: Utc.with_ymd_and_hms(2025, 8, 21 - i, 10 + i, 0, 0).single(),
        })
        .collect()
}

fn demo_status(video_id: &str) -> VideoStatus {
    VideoStatus {
        id: video_id.to_string(),
        title: format!("Demo video {}", video_id),
        privacy_status: Some("private".to_string()),
        upload_status: Some("processed".to_string()),
        processing_status: Some("succeeded".to_string()),
        failure_reason: None,
        rejection_reason: None,
        duration: Some("PT30S".to_string()),
        published_at: None,
    }
}
