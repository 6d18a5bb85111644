//! Serde-deserializable types matching TMDB API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;

use crate::cache::Page;

use super::types::{CastMember, Credits, CrewMember, Movie, MovieDetail};

// ============================================================================
// Lists
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiMovie {
  pub id: u64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub overview: String,
  pub release_date: Option<String>,
  pub poster_path: Option<String>,
  #[serde(default)]
  pub vote_average: f64,
  #[serde(default)]
  pub popularity: f64,
}

impl From<ApiMovie> for Movie {
  fn from(movie: ApiMovie) -> Self {
    Movie {
      id: movie.id,
      title: movie.title,
      overview: movie.overview,
      // TMDB sends "" for unknown dates
      release_date: movie.release_date.filter(|d| !d.is_empty()),
      poster_path: movie.poster_path,
      vote_average: movie.vote_average,
      popularity: movie.popularity,
    }
  }
}

/// Paginated list envelope
#[derive(Debug, Deserialize)]
pub struct ApiPage<T> {
  pub page: u32,
  #[serde(default)]
  pub total_pages: u32,
  #[serde(default)]
  pub total_results: u64,
  #[serde(default = "Vec::new")]
  pub results: Vec<T>,
}

impl<T> ApiPage<T> {
  /// The page to request after this one, if any.
  pub fn next_page(&self) -> Option<u32> {
    (self.page < self.total_pages).then(|| self.page + 1)
  }
}

impl From<ApiPage<ApiMovie>> for Page<Movie> {
  fn from(page: ApiPage<ApiMovie>) -> Self {
    let next_page = page.next_page();
    Page {
      results: page.results.into_iter().map(Movie::from).collect(),
      total_results: page.total_results,
      next_page,
    }
  }
}

// ============================================================================
// Detail
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiGenre {
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiMovieDetail {
  pub id: u64,
  #[serde(default)]
  pub title: String,
  pub tagline: Option<String>,
  #[serde(default)]
  pub overview: String,
  pub release_date: Option<String>,
  pub runtime: Option<u32>,
  #[serde(default)]
  pub genres: Vec<ApiGenre>,
  #[serde(default)]
  pub vote_average: f64,
}

impl From<ApiMovieDetail> for MovieDetail {
  fn from(detail: ApiMovieDetail) -> Self {
    MovieDetail {
      id: detail.id,
      title: detail.title,
      tagline: detail.tagline.filter(|t| !t.is_empty()),
      overview: detail.overview,
      release_date: detail.release_date.filter(|d| !d.is_empty()),
      runtime: detail.runtime.filter(|r| *r > 0),
      genres: detail.genres.into_iter().map(|g| g.name).collect(),
      vote_average: detail.vote_average,
    }
  }
}

// ============================================================================
// Credits
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCast {
  pub name: String,
  #[serde(default)]
  pub character: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiCrew {
  pub name: String,
  #[serde(default)]
  pub job: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiCredits {
  #[serde(default)]
  pub cast: Vec<ApiCast>,
  #[serde(default)]
  pub crew: Vec<ApiCrew>,
}

impl From<ApiCredits> for Credits {
  fn from(credits: ApiCredits) -> Self {
    Credits {
      cast: credits
        .cast
        .into_iter()
        .map(|c| CastMember {
          name: c.name,
          character: c.character,
        })
        .collect(),
      crew: credits
        .crew
        .into_iter()
        .map(|c| CrewMember {
          name: c.name,
          job: c.job,
        })
        .collect(),
    }
  }
}
