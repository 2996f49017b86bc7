//! AniList GraphQL client.

use super::types::*;
use crate::matcher::clean_title;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use shared::{ResolveError, Result, ShowType, TitleQuery};
use std::time::Duration;
use tracing::{debug, info, warn};

const MEDIA_QUERY: &str = r#"
query ($id: Int!) {
  Media(id: $id, type: ANIME) {
    id
    title { english romaji native }
    synonyms
    format
    episodes
  }
}
"#;

/// Anything that can turn an external identifier into a [`TitleQuery`]
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<TitleQuery>;
}

/// AniList GraphQL v2 client
///
/// One request per lookup and no retries; retrying is up to the caller.
pub struct AniListClient {
    client: Client,
    endpoint: String,
}

impl AniListClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("anime-resolver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::http("Failed to create AniList HTTP client", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn fetch_media(&self, id: u32) -> Result<Media> {
        let body = json!({
            "query": MEDIA_QUERY,
            "variables": { "id": id },
        });

        debug!(endpoint = %self.endpoint, anilist_id = id, "Querying AniList");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolveError::http("AniList request failed", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ResolveError::http("Failed to read AniList body", e))?;

        classify_response(id, status, &text)
    }
}

/// Turn an AniList reply into the media record or a typed error.
///
/// AniList reports unknown ids as 404, either as the HTTP status or as a
/// GraphQL error with `status: 404` next to `Media: null`.
pub(crate) fn classify_response(id: u32, status: StatusCode, text: &str) -> Result<Media> {
    if status == StatusCode::NOT_FOUND {
        return Err(ResolveError::not_found(format!("AniList has no anime with id {}", id)));
    }
    if !status.is_success() {
        warn!(status = %status, anilist_id = id, "AniList request failed");
        return Err(ResolveError::upstream(format!(
            "AniList HTTP error (status {})",
            status
        )));
    }

    let parsed: GraphQlResponse<MediaData> = serde_json::from_str(text)
        .map_err(|e| ResolveError::upstream(format!("Failed to parse AniList response: {}", e)))?;

    if !parsed.errors.is_empty() {
        let not_found = parsed.errors.iter().any(|e| e.status == Some(404));
        let message = parsed
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(if not_found {
            ResolveError::not_found(format!("AniList id {}: {}", id, message))
        } else {
            ResolveError::upstream(format!("AniList error: {}", message))
        });
    }

    parsed
        .data
        .and_then(|d| d.media)
        .ok_or_else(|| ResolveError::not_found(format!("AniList has no anime with id {}", id)))
}

#[async_trait]
impl MetadataResolver for AniListClient {
    async fn resolve(&self, identifier: &str) -> Result<TitleQuery> {
        let id: u32 = identifier.trim().parse().map_err(|_| {
            ResolveError::not_found(format!("'{}' is not an AniList id", identifier))
        })?;

        let media = self.fetch_media(id).await?;
        let query = title_query_from_media(identifier, media)?;

        info!(
            anilist_id = id,
            title = %query.primary_title(),
            alternates = query.resolved_titles.len().saturating_sub(1),
            "Resolved metadata"
        );

        Ok(query)
    }
}

/// Collect the usable name variants of a media record, English first.
pub fn title_query_from_media(identifier: &str, media: Media) -> Result<TitleQuery> {
    let Media {
        title,
        synonyms,
        format,
        episodes,
        ..
    } = media;

    let mut titles: Vec<String> = Vec::new();
    let candidates = [title.english, title.romaji, title.native]
        .into_iter()
        .flatten()
        .chain(synonyms);

    for raw in candidates {
        let cleaned = clean_title(&raw);
        if cleaned.is_empty() {
            continue;
        }
        if !titles.iter().any(|t| t.eq_ignore_ascii_case(&cleaned)) {
            titles.push(cleaned);
        }
    }

    if titles.is_empty() {
        return Err(ResolveError::not_found(format!(
            "AniList entry {} has no usable title",
            identifier
        )));
    }

    Ok(TitleQuery {
        raw_identifier: identifier.to_string(),
        resolved_titles: titles,
        total_episodes_known: episodes,
        show_type: format.as_deref().and_then(ShowType::parse),
    })
}
