//! Run the client core against a live authority and print what the list view would show.
//! Usage:
//!   cargo run --bin client_probe -- [--search <text>] [--sort popularityScore|top_rated|newest]
//! Reads RATEIT_API_URL and friends from the environment (.env supported). When RATEIT_EMAIL and
//! RATEIT_PASSWORD are set the probe signs in, otherwise it reuses the persisted token.

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use rateit::aggregate::display_rows;
use rateit::api::RemoteApi;
use rateit::config::ClientConfig;
use rateit::debounce::QueryDebouncer;
use rateit::http::HttpApi;
use rateit::models::SortKey;
use rateit::session::{SessionManager, SessionState};
use rateit::store::SeriesStore;
use rateit::token_store::{FileTokenStore, TokenStore};
use std::env;
use std::sync::Arc;
use std::time::Duration;

struct Args {
    search: String,
    sort: SortKey,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        search: String::new(),
        sort: SortKey::default(),
    };
    let mut iter = env::args().skip(1);
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .with_context(|| format!("{} needs a value", flag))?;
        match flag.as_str() {
            "--search" => args.search = value,
            "--sort" => args.sort = value.parse().context("invalid --sort")?,
            other => bail!("unknown argument {}", other),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = parse_args()?;
    let config = ClientConfig::from_env()?;

    let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::from_config(&config)?);
    let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&config.token_dir));
    let session = SessionManager::new(api.clone(), tokens);

    match (env::var("RATEIT_EMAIL"), env::var("RATEIT_PASSWORD")) {
        (Ok(email), Ok(password)) => {
            let user = session.login(&email, &password).await?;
            println!("Signed in as {} <{}>", user.username, user.email);
        }
        _ => match session.bootstrap().await {
            SessionState::Authenticated(s) => println!("Session restored for {}", s.user.username),
            _ => println!("Browsing anonymously"),
        },
    }

    let store = SeriesStore::new();
    let debouncer = QueryDebouncer::spawn(api, Some(store), config.debounce);
    let mut updates = debouncer.subscribe();
    debouncer.set_sort(args.sort);
    debouncer.set_search(args.search.clone());

    let wait = config.debounce + config.http_timeout + Duration::from_secs(1);
    let state = tokio::time::timeout(wait, updates.wait_for(|s| s.generation > 0))
        .await
        .context("timed out waiting for the list query")?
        .context("list query driver stopped")?
        .clone();

    if let Some(err) = &state.error {
        bail!("List query failed: {}", err);
    }

    println!(
        "{} series for search '{}' sorted by {}",
        state.series.len(),
        state.query.search,
        state.query.sort.as_str()
    );
    for series in &state.series {
        let label = series.rank_label.map(|r| r.as_str()).unwrap_or("N/A");
        println!(
            "\n{} [{}] votes={} likes={} hates={}",
            series.title, label, series.vote_count, series.simple_likes, series.simple_hates
        );
        for row in display_rows(series) {
            println!("  {:>3} {:>4} {:>3}%", row.rank.as_str(), row.count, row.percentage);
        }
    }
    Ok(())
}
