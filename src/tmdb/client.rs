use crate::cache::{Page, RawReply, RemoteOutcome, SyncError};
use crate::config::Config;
use crate::tmdb::api_types::{ApiCredits, ApiMovie, ApiMovieDetail, ApiPage};
use crate::tmdb::types::{Credits, Movie, MovieDetail, MovieList};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// TMDB API client wrapper
///
/// Every call is a single attempt; classification into success, empty or
/// error happens in [`RemoteOutcome::classify`].
#[derive(Clone)]
pub struct TmdbClient {
  http: reqwest::Client,
  base_url: Url,
  api_key: String,
  language: String,
}

impl TmdbClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_api_key(config, api_key)
  }

  pub fn with_api_key(config: &Config, api_key: String) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.tmdb.timeout_secs))
      .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: config.tmdb.base_url()?,
      api_key,
      language: config.language(),
    })
  }

  /// Get one page of a movie list. `None` requests the first page.
  pub async fn list_page(&self, list: MovieList, page: Option<u32>) -> RemoteOutcome<Page<Movie>> {
    self
      .get::<ApiPage<ApiMovie>>(list.endpoint(), page)
      .await
      .map(Page::from)
  }

  /// Get full details for a movie
  pub async fn movie_detail(&self, movie_id: u64) -> Result<MovieDetail> {
    self
      .get::<ApiMovieDetail>(&format!("movie/{}", movie_id), None)
      .await
      .into_result()
      .map(MovieDetail::from)
      .map_err(|e| eyre!("Failed to get movie {}: {}", movie_id, e))
  }

  /// Get cast and crew for a movie
  pub async fn credits(&self, movie_id: u64) -> Result<Credits> {
    self
      .get::<ApiCredits>(&format!("movie/{}/credits", movie_id), None)
      .await
      .into_result()
      .map(Credits::from)
      .map_err(|e| eyre!("Failed to get credits for movie {}: {}", movie_id, e))
  }

  /// Get movies similar to the given one
  pub async fn similar(&self, movie_id: u64, page: Option<u32>) -> Result<Page<Movie>> {
    self
      .get::<ApiPage<ApiMovie>>(&format!("movie/{}/similar", movie_id), page)
      .await
      .map(Page::from)
      .into_result()
      .map_err(|e| eyre!("Failed to get movies similar to {}: {}", movie_id, e))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str, page: Option<u32>) -> RemoteOutcome<T> {
    tracing::debug!(path, page, "GET");

    let reply = match self.endpoint(path, page) {
      Ok(url) => self.send(url).await,
      Err(e) => Err(e),
    };

    RemoteOutcome::classify(reply)
  }

  async fn send(&self, url: Url) -> std::result::Result<RawReply, SyncError> {
    // Errors carry the url otherwise, and with it the api key
    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| SyncError::Transport(e.without_url().to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| SyncError::Transport(e.without_url().to_string()))?;

    Ok(RawReply {
      status,
      body: body.to_vec(),
    })
  }

  fn endpoint(&self, path: &str, page: Option<u32>) -> std::result::Result<Url, SyncError> {
    let mut url = self
      .base_url
      .join(path)
      .map_err(|e| SyncError::Transport(format!("invalid endpoint {}: {}", path, e)))?;

    {
      let mut query = url.query_pairs_mut();
      query.append_pair("api_key", &self.api_key);
      query.append_pair("language", &self.language);
      if let Some(page) = page {
        query.append_pair("page", &page.to_string());
      }
    }

    Ok(url)
  }
}
