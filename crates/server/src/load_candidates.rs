use std::env;

use anyhow::{Context, bail};
use polling_station::{PgStore, Store, VoteError, candidates, models::NewCandidate};

/// One candidate per line: `name | email | dob | gender | party [| symbol | image]`.
fn parse_line(line: &str) -> anyhow::Result<NewCandidate> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 5 {
        bail!("expected at least 5 '|'-separated fields, got {}", fields.len());
    }
    let extra = |i: usize| fields.get(i).map(|s| s.to_string());
    Ok(NewCandidate {
        name: fields[0].to_string(),
        email: fields[1].to_string(),
        dob: fields[2].to_string(),
        gender: fields[3].to_string(),
        party_name: fields[4].to_string(),
        party_symbol: extra(5),
        candidate_image: extra(6),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PgStore::connect(&database_url, 5).await?;
    store.migrate().await?;
    store.ping().await?;

    println!("Connected to database!");

    let path = env::args().nth(1).unwrap_or_else(|| "candidates.txt".to_string());
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {path} - make sure it exists!"))?;

    let mut count = 0;
    let mut skipped = 0;

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let candidate = match parse_line(line) {
            Ok(candidate) => candidate,
            Err(err) => {
                println!("✗ Line {}: {}", number + 1, err);
                skipped += 1;
                continue;
            }
        };

        match candidates::add_candidate(&store, candidate).await {
            Ok(candidate) => {
                count += 1;
                println!("✓ Loaded: {} ({})", candidate.name, candidate.party_name);
            }
            Err(VoteError::Validation(reason)) => {
                println!("⊘ Skipped line {}: {}", number + 1, reason);
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Successfully loaded {} new candidates!", count);
    if skipped > 0 {
        println!("⊘ Skipped {} lines", skipped);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    Ok(())
}
