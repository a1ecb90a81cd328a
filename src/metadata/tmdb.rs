//! TMDB (The Movie Database) details client.
//!
//! - Bearer-token auth against the v3 REST API.
//! - Token-bucket rate limiting at 4 requests / second via [`governor`].
//! - No retries: HTTP 429 and every other failure surface as `Upstream`.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use governor::{Quota, RateLimiter};
use mediashelf_common::{Error, MediaKind, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Details, DetailsFetcher, DetailsQuery};

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p/w500";
const LANGUAGE: &str = "en-US";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct TmdbDetails {
    title: Option<String>,
    name: Option<String>,
    original_name: Option<String>,
    vote_average: Option<f64>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    air_date: Option<String>,
    genres: Option<Vec<TmdbNamed>>,
    production_countries: Option<Vec<TmdbNamed>>,
    poster_path: Option<String>,
    still_path: Option<String>,
    runtime: Option<u32>,
    episode_run_time: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
struct TmdbNamed {
    name: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl TmdbDetails {
    fn into_details(self) -> Details {
        let title = non_empty(self.title)
            .or(non_empty(self.name))
            .or(non_empty(self.original_name))
            .unwrap_or_else(|| "Unknown".to_string());

        let year = non_empty(self.release_date)
            .or(non_empty(self.first_air_date))
            .or(non_empty(self.air_date))
            .map(|date| date.chars().take(4).collect())
            .unwrap_or_default();

        let runtime = self
            .runtime
            .filter(|r| *r > 0)
            .or_else(|| self.episode_run_time.and_then(|r| r.first().copied()))
            .unwrap_or(0);

        Details {
            title,
            year,
            genres: names(self.genres),
            countries: names(self.production_countries),
            poster_path: non_empty(self.poster_path).or(non_empty(self.still_path)),
            rating: self.vote_average.unwrap_or(0.0),
            runtime,
        }
    }
}

fn names(list: Option<Vec<TmdbNamed>>) -> Vec<String> {
    list.unwrap_or_default().into_iter().map(|n| n.name).collect()
}

/// Details endpoint for a query, relative to the API base.
fn details_path(query: &DetailsQuery) -> Result<String> {
    let id = &query.tmdb_id;
    let season = || {
        query
            .season_number
            .ok_or_else(|| Error::invalid_input("season_number is required"))
    };
    let episode = || {
        query
            .episode_number
            .ok_or_else(|| Error::invalid_input("episode_number is required"))
    };

    Ok(match query.kind {
        MediaKind::Movie => format!("/movie/{}", id),
        MediaKind::Tv => format!("/tv/{}", id),
        MediaKind::Season => format!("/tv/{}/season/{}", id, season()?),
        MediaKind::Episode => format!("/tv/{}/season/{}/episode/{}", id, season()?, episode()?),
    })
}

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct TmdbClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    rate_limiter: DirectLimiter,
}

impl TmdbClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        let quota = Quota::per_second(NonZeroU32::new(4).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            api_base: TMDB_BASE_URL.to_string(),
            token: token.into(),
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Execute a rate-limited GET. Non-success statuses are upstream failures.
    async fn get(&self, url: &str, authenticated: bool) -> Result<reqwest::Response> {
        self.rate_limiter.until_ready().await;

        let mut request = self.client.get(url);
        if authenticated {
            request = request
                .bearer_auth(&self.token)
                .header(reqwest::header::ACCEPT, "application/json");
        }
        let resp = request
            .send()
            .await
            .map_err(|e| Error::upstream(format!("TMDB request failed: {}", e)))?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!("TMDB rate limit exceeded");
            return Err(Error::upstream("TMDB rate limit exceeded"));
        }

        resp.error_for_status()
            .map_err(|e| Error::upstream(format!("TMDB returned an error: {}", e)))
    }
}

#[async_trait]
impl DetailsFetcher for TmdbClient {
    async fn fetch_details(&self, query: &DetailsQuery) -> Result<Details> {
        let url = format!("{}{}?language={}", self.api_base, details_path(query)?, LANGUAGE);
        debug!(%url, "Fetching TMDB details");

        let raw: TmdbDetails = self
            .get(&url, true)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Invalid TMDB response: {}", e)))?;
        Ok(raw.into_details())
    }

    async fn fetch_poster(&self, poster_path: &str) -> Result<Bytes> {
        let url = format!("{}{}", TMDB_IMAGE_BASE, poster_path);
        self.get(&url, false)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::upstream(format!("Poster download failed: {}", e)))
    }
}
