use serde::{Deserialize, Serialize};

/// Movie summary as shown in lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
  pub id: u64,
  pub title: String,
  pub overview: String,
  pub release_date: Option<String>,
  pub poster_path: Option<String>,
  pub vote_average: f64,
  pub popularity: f64,
}

impl Movie {
  /// Release year, if the release date is known
  pub fn year(&self) -> Option<&str> {
    self
      .release_date
      .as_deref()
      .filter(|d| d.len() >= 4)
      .map(|d| &d[..4])
  }
}

/// Full movie details (not cached)
#[derive(Debug, Clone)]
pub struct MovieDetail {
  pub id: u64,
  pub title: String,
  pub tagline: Option<String>,
  pub overview: String,
  pub release_date: Option<String>,
  pub runtime: Option<u32>,
  pub genres: Vec<String>,
  pub vote_average: f64,
}

/// Cast and crew of a movie (not cached)
#[derive(Debug, Clone)]
pub struct Credits {
  pub cast: Vec<CastMember>,
  pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone)]
pub struct CastMember {
  pub name: String,
  pub character: String,
}

#[derive(Debug, Clone)]
pub struct CrewMember {
  pub name: String,
  pub job: String,
}

/// The movie lists mirrored into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MovieList {
  Popular,
  NowPlaying,
  Upcoming,
  TopRated,
}

impl MovieList {
  pub const ALL: [MovieList; 4] = [
    MovieList::Popular,
    MovieList::NowPlaying,
    MovieList::Upcoming,
    MovieList::TopRated,
  ];

  pub fn title(&self) -> &'static str {
    match self {
      MovieList::Popular => "POPULAR",
      MovieList::NowPlaying => "NOW PLAYING",
      MovieList::Upcoming => "UPCOMING",
      MovieList::TopRated => "TOP RATED",
    }
  }

  /// Name used in ledger keys
  pub fn name(&self) -> &'static str {
    match self {
      MovieList::Popular => "Popular",
      MovieList::NowPlaying => "NowPlaying",
      MovieList::Upcoming => "UpComing",
      MovieList::TopRated => "TopRated",
    }
  }

  /// API path below the base url
  pub fn endpoint(&self) -> &'static str {
    match self {
      MovieList::Popular => "movie/popular",
      MovieList::NowPlaying => "movie/now_playing",
      MovieList::Upcoming => "movie/upcoming",
      MovieList::TopRated => "movie/top_rated",
    }
  }
}
