use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::tmdb::MetadataApi;

const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev";
const MODEL: &str = "google/gemini-2.5-flash";
const MAX_REPLY_TOKENS: u32 = 600;
const MAX_CARDS: usize = 4;
const POSTER_BASE: &str = "https://image.tmdb.org/t/p/w200";

const SYSTEM_PROMPT: &str = r#"You are a friendly movie recommendation bot for PirateOne streaming platform.
Your job is to understand the user's movie/TV/anime preferences and suggest relevant content.

IMPORTANT RESPONSE FORMAT:
When recommending content, you MUST include movie/show titles in [brackets] so the system can fetch posters.
Example: I recommend [The Dark Knight], [Breaking Bad], and [Attack on Titan].

Guidelines:
1. Provide 2-4 specific recommendations with titles in [brackets]
2. Include brief descriptions (1-2 sentences each)
3. Be conversational and enthusiastic
4. Detect genre preferences from user messages (action, comedy, horror, romance, sci-fi, anime, etc.)
5. If user mentions specific titles, recommend similar ones
6. If user mentions mood (happy, sad, thrilling, relaxing), tailor recommendations

Always include at least one recommendation with the title in [brackets] format."#;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("AI gateway rate limit")]
    RateLimited,
    #[error("AI gateway credits exhausted")]
    CreditsExhausted,
    #[error("AI service not configured")]
    NotConfigured,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One prior conversation turn relayed by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, history: &[ChatTurn], message: &str) -> Result<String, ChatError>;
}

pub struct AiGatewayClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AiGatewayClient {
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("AI_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string());
        let api_key = env::var("AI_GATEWAY_KEY").ok().filter(|s| !s.is_empty());
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build AI gateway HTTP client")?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl ChatApi for AiGatewayClient {
    async fn complete(&self, history: &[ChatTurn], message: &str) -> Result<String, ChatError> {
        let Some(api_key) = &self.api_key else {
            return Err(ChatError::NotConfigured);
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": SYSTEM_PROMPT }));
        for turn in history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": message }));

        debug!("Sending request to AI gateway");
        let res = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": MODEL,
                "messages": messages,
                "max_tokens": MAX_REPLY_TOKENS,
            }))
            .send()
            .await
            .context("AI gateway request failed")?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatError::RateLimited);
        }
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Err(ChatError::CreditsExhausted);
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ChatError::Other(anyhow!(
                "AI gateway error (status {}): {}",
                status,
                body
            )));
        }

        let data: Value = res
            .json()
            .await
            .context("Failed to parse AI gateway response")?;
        let reply = data
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or("Sorry, I couldn't generate a response.")
            .to_string();
        Ok(reply)
    }
}

/// A poster card sent back alongside the chat reply.
#[derive(Debug, Clone, Serialize)]
pub struct MovieCard {
    pub id: i64,
    pub title: String,
    pub poster: Option<String>,
    pub overview: Option<String>,
    pub rating: Option<String>,
    pub year: Option<String>,
    #[serde(rename = "mediaType")]
    pub media_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UpstreamItem {
    id: i64,
    title: Option<String>,
    name: Option<String>,
    poster_path: Option<String>,
    overview: Option<String>,
    vote_average: Option<f64>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    media_type: Option<String>,
}

impl UpstreamItem {
    fn into_card(self, fallback_media_type: &str) -> MovieCard {
        MovieCard {
            id: self.id,
            title: self.title.or(self.name).unwrap_or_default(),
            poster: self.poster_path.map(|p| format!("{POSTER_BASE}{p}")),
            overview: self.overview.map(|o| truncate_overview(&o)),
            rating: self.vote_average.map(|r| format!("{r:.1}")),
            year: self
                .release_date
                .or(self.first_air_date)
                .and_then(|d| d.split('-').next().map(str::to_string)),
            media_type: self
                .media_type
                .unwrap_or_else(|| fallback_media_type.to_string()),
        }
    }
}

/// Builds poster cards for a reply: bracketed titles first, then a genre
/// keyword from the user's message, then trending.
pub async fn recommend_cards(
    metadata: &dyn MetadataApi,
    reply: &str,
    message: &str,
) -> Vec<MovieCard> {
    let mut cards = Vec::new();
    for title in bracketed_titles(reply).into_iter().take(MAX_CARDS) {
        if let Some(card) = search_first(metadata, &title).await {
            cards.push(card);
        }
    }
    if cards.is_empty() {
        cards = match detect_genre(message) {
            Some(genre) => discover_by_genre(metadata, genre).await,
            None => trending(metadata).await,
        };
    }
    cards.truncate(MAX_CARDS);
    cards
}

async fn search_first(metadata: &dyn MetadataApi, title: &str) -> Option<MovieCard> {
    let params = HashMap::from([
        ("query".to_string(), title.to_string()),
        ("page".to_string(), "1".to_string()),
    ]);
    let data = match metadata.fetch("/search/multi", &params).await {
        Ok(data) => data,
        Err(err) => {
            debug!("Search for '{}' failed: {}", title, err);
            return None;
        }
    };
    items(&data)
        .into_iter()
        .find(|item| matches!(item.media_type.as_deref(), Some("movie") | Some("tv")))
        .filter(|item| item.poster_path.is_some())
        .map(|item| item.into_card("movie"))
}

async fn discover_by_genre(metadata: &dyn MetadataApi, genre: Genre) -> Vec<MovieCard> {
    let mut cards = Vec::new();
    for (kind, genre_id) in [("movie", genre.movie_id), ("tv", genre.tv_id)] {
        let params = HashMap::from([
            ("with_genres".to_string(), genre_id.to_string()),
            ("sort_by".to_string(), "popularity.desc".to_string()),
            ("page".to_string(), "1".to_string()),
        ]);
        match metadata.fetch(&format!("/discover/{kind}"), &params).await {
            Ok(data) => {
                cards.extend(items(&data).into_iter().take(3).map(|i| i.into_card(kind)));
            }
            Err(err) => debug!("Discover {} failed: {}", kind, err),
        }
    }
    cards
}

async fn trending(metadata: &dyn MetadataApi) -> Vec<MovieCard> {
    match metadata.fetch("/trending/all/week", &HashMap::new()).await {
        Ok(data) => items(&data)
            .into_iter()
            .take(6)
            .map(|i| i.into_card("movie"))
            .collect(),
        Err(err) => {
            debug!("Trending fetch failed: {}", err);
            Vec::new()
        }
    }
}

fn items(data: &Value) -> Vec<UpstreamItem> {
    data.get("results")
        .and_then(|r| r.as_array())
        .map(|results| {
            results
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Titles the AI wrapped in [brackets], in reply order.
pub fn bracketed_titles(reply: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut rest = reply;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(']') else { break };
        if end > 0 {
            titles.push(after[..end].to_string());
        }
        rest = &after[end + 1..];
    }
    titles
}

/// Removes the [brackets] around titles for display, keeping the titles.
pub fn strip_brackets(reply: &str) -> String {
    let mut out = String::with_capacity(reply.len());
    let mut rest = reply;
    while let Some(start) = rest.find('[') {
        let after = &rest[start + 1..];
        match after.find(']') {
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                out.push_str(&after[..end]);
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str(&rest[..start + 1]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy)]
struct Genre {
    movie_id: i32,
    tv_id: i32,
}

// TMDB genre ids differ between the movie and tv catalogues.
const GENRE_KEYWORDS: &[(&str, Genre)] = &[
    ("action", Genre { movie_id: 28, tv_id: 10759 }),
    ("comedy", Genre { movie_id: 35, tv_id: 35 }),
    ("horror", Genre { movie_id: 27, tv_id: 27 }),
    ("romance", Genre { movie_id: 10749, tv_id: 10749 }),
    ("sci-fi", Genre { movie_id: 878, tv_id: 10765 }),
    ("scifi", Genre { movie_id: 878, tv_id: 10765 }),
    ("thriller", Genre { movie_id: 53, tv_id: 53 }),
    ("drama", Genre { movie_id: 18, tv_id: 18 }),
    ("animation", Genre { movie_id: 16, tv_id: 16 }),
    ("anime", Genre { movie_id: 16, tv_id: 16 }),
    ("fantasy", Genre { movie_id: 14, tv_id: 10765 }),
    ("documentary", Genre { movie_id: 99, tv_id: 99 }),
    ("crime", Genre { movie_id: 80, tv_id: 80 }),
    ("mystery", Genre { movie_id: 9648, tv_id: 9648 }),
];

fn detect_genre(message: &str) -> Option<Genre> {
    let lower = message.to_lowercase();
    GENRE_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, genre)| *genre)
}

fn truncate_overview(overview: &str) -> String {
    const MAX_CHARS: usize = 100;
    if overview.chars().count() > MAX_CHARS {
        let cut: String = overview.chars().take(MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        overview.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracketed_titles_in_order() {
        let reply = "Try [The Dark Knight] and [Breaking Bad]; also [Attack on Titan]!";
        assert_eq!(
            bracketed_titles(reply),
            vec!["The Dark Knight", "Breaking Bad", "Attack on Titan"]
        );
    }

    #[test]
    fn ignores_empty_and_unterminated_brackets() {
        assert_eq!(bracketed_titles("nothing [] here ["), Vec::<String>::new());
    }

    #[test]
    fn strip_brackets_keeps_the_titles() {
        assert_eq!(
            strip_brackets("Watch [Dune] tonight, maybe [Arrival] after."),
            "Watch Dune tonight, maybe Arrival after."
        );
        assert_eq!(strip_brackets("empty [] stays"), "empty [] stays");
    }

    #[test]
    fn detects_genre_keywords_case_insensitively() {
        assert_eq!(detect_genre("Something with ACTION please").map(|g| g.movie_id), Some(28));
        assert_eq!(detect_genre("a good sci-fi show").map(|g| g.tv_id), Some(10765));
        assert!(detect_genre("surprise me").is_none());
    }

    #[test]
    fn anime_and_animation_both_map_to_animation() {
        assert_eq!(detect_genre("any anime?").map(|g| g.movie_id), Some(16));
        assert_eq!(detect_genre("animation night").map(|g| g.movie_id), Some(16));
    }

    #[test]
    fn truncates_long_overviews_with_an_ellipsis() {
        let long = "x".repeat(150);
        let truncated = truncate_overview(&long);
        assert_eq!(truncated.chars().count(), 103);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_overview("short"), "short");
    }

    #[test]
    fn cards_prefer_title_then_name_and_take_the_year() {
        let item: UpstreamItem = serde_json::from_value(serde_json::json!({
            "id": 550,
            "name": "Fight Club",
            "poster_path": "/abc.jpg",
            "overview": "An insomniac office worker.",
            "vote_average": 8.44,
            "first_air_date": "1999-10-15"
        }))
        .expect("item deserializes");
        let card = item.into_card("tv");
        assert_eq!(card.title, "Fight Club");
        assert_eq!(card.poster.as_deref(), Some("https://image.tmdb.org/t/p/w200/abc.jpg"));
        assert_eq!(card.rating.as_deref(), Some("8.4"));
        assert_eq!(card.year.as_deref(), Some("1999"));
        assert_eq!(card.media_type, "tv");
    }
}
