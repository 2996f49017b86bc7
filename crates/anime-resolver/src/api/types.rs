//! AniList GraphQL response types.
//!
//! Only the fields needed to build a title query are modelled.

use serde::{Deserialize, Serialize};

/// GraphQL envelope
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaData {
    #[serde(rename = "Media")]
    pub media: Option<Media>,
}

/// Anime record with its name variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: u32,
    pub title: MediaTitle,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// TV, TV_SHORT, MOVIE, SPECIAL, OVA, ONA, MUSIC
    pub format: Option<String>,
    pub episodes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaTitle {
    pub english: Option<String>,
    pub romaji: Option<String>,
    pub native: Option<String>,
}
