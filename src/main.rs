mod cache;
mod config;
mod logging;
mod tmdb;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

use cache::{CachedList, Resource, Status};
use tmdb::cached_client::CachedTmdbClient;
use tmdb::types::{Movie, MovieList};

#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "A cache-first command-line browser for TMDB movie lists")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/marquee/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Use a throwaway in-memory cache
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show a movie list (every list when none is given), refreshing the cache if needed
  List {
    #[arg(value_enum)]
    list: Option<MovieList>,

    /// Keep printing as the cache changes
    #[arg(short, long, requires = "list")]
    watch: bool,
  },
  /// Load the next page of a cached list
  More {
    #[arg(value_enum)]
    list: MovieList,
  },
  /// Show details and credits for a movie
  Movie { id: u64 },
  /// Show movies similar to a movie
  Similar {
    id: u64,

    #[arg(short, long)]
    page: Option<u32>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let client = CachedTmdbClient::new(&config, args.ephemeral)?;

  match args.command {
    Command::List {
      list: Some(list),
      watch,
    } => show_list(&client, list, watch).await,
    Command::List { list: None, .. } => show_all_lists(&client).await,
    Command::More { list } => load_more(&client, list).await,
    Command::Movie { id } => show_movie(&client, id).await,
    Command::Similar { id, page } => show_similar(&client, id, page).await,
  }
}

async fn show_list(client: &CachedTmdbClient, list: MovieList, watch: bool) -> Result<()> {
  let mut stream = client.movies(list);

  while let Some(resource) = stream.next().await {
    let terminal = resource.is_terminal();
    print_resource(list, &resource);

    if !watch && terminal {
      return match resource.status {
        Status::Error => Err(eyre!(
          "Refresh failed: {}",
          resource.message.unwrap_or_default()
        )),
        _ => Ok(()),
      };
    }
  }

  Ok(())
}

async fn show_all_lists(client: &CachedTmdbClient) -> Result<()> {
  for (i, list) in MovieList::ALL.into_iter().enumerate() {
    if i > 0 {
      println!();
    }
    show_list(client, list, false).await?;
  }

  Ok(())
}

async fn load_more(client: &CachedTmdbClient, list: MovieList) -> Result<()> {
  let result = client.fetch_next_page(list).finished().await;

  match (result.status, result.data) {
    (Status::Error, _) => {
      return Err(eyre!(
        "Failed to load more {}: {}",
        list.title(),
        result.message.unwrap_or_default()
      ))
    }
    (_, Some(true)) => println!("Loaded another page of {}.", list.title()),
    _ => println!("No more pages to load for {}.", list.title()),
  }

  if let Some(cached) = client.cached_movies(list).await? {
    println!(
      "{} of {} movies cached{}",
      cached.entries.len(),
      cached.total_results,
      if cached.has_more() { "" } else { " (complete)" }
    );
  }

  Ok(())
}

async fn show_movie(client: &CachedTmdbClient, id: u64) -> Result<()> {
  let (detail, credits) = tokio::try_join!(client.movie_detail(id), client.credits(id))?;

  println!("{}", detail.title);
  if let Some(tagline) = &detail.tagline {
    println!("  \"{}\"", tagline);
  }
  let mut facts = Vec::new();
  if let Some(date) = &detail.release_date {
    facts.push(date.clone());
  }
  if let Some(runtime) = detail.runtime {
    facts.push(format!("{} min", runtime));
  }
  if !detail.genres.is_empty() {
    facts.push(detail.genres.join(", "));
  }
  facts.push(format!("★ {:.1}", detail.vote_average));
  println!("  {}", facts.join(" · "));
  println!();
  println!("{}", detail.overview);

  if let Some(director) = credits.crew.iter().find(|c| c.job == "Director") {
    println!();
    println!("Directed by {}", director.name);
  }
  if !credits.cast.is_empty() {
    println!();
    println!("Cast:");
    for member in credits.cast.iter().take(10) {
      println!("  {} as {}", member.name, member.character);
    }
  }

  Ok(())
}

async fn show_similar(client: &CachedTmdbClient, id: u64, page: Option<u32>) -> Result<()> {
  let similar = client.similar(id, page).await?;

  println!("Similar to {} ({} results)", id, similar.total_results);
  print_movies(&similar.results);
  if let Some(next) = similar.next_page {
    println!("  … more with --page {}", next);
  }

  Ok(())
}

fn print_resource(list: MovieList, resource: &Resource<CachedList<Movie>>) {
  let count = resource.data.as_ref().map_or(0, |l| l.entries.len());

  match resource.status {
    Status::Loading => println!("{}: loading… ({} cached)", list.title(), count),
    Status::Success => println!("{}: {} movies", list.title(), count),
    Status::Error => println!(
      "{}: refresh failed: {} (showing {} cached)",
      list.title(),
      resource.message.as_deref().unwrap_or("unknown error"),
      count
    ),
  }

  if resource.status != Status::Loading {
    if let Some(cached) = &resource.data {
      print_movies(&cached.entries);
      if cached.has_more() {
        println!("  … {} total, `marquee more` loads the next page", cached.total_results);
      }
    }
  }
}

fn print_movies(movies: &[Movie]) {
  for (i, movie) in movies.iter().enumerate() {
    match movie.year() {
      Some(year) => println!(
        "{:>4}. {} ({}) ★ {:.1}",
        i + 1,
        movie.title,
        year,
        movie.vote_average
      ),
      None => println!(
        "{:>4}. {} ★ {:.1}",
        i + 1,
        movie.title,
        movie.vote_average
      ),
    }
  }
}
