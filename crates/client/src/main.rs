mod models;

use axum::{Router, extract::Query, response::Html, routing::get};
use colored::*;
use models::*;
use serde::{Serialize, de::DeserializeOwned};
use std::env;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const CALLBACK_PORT: u16 = 8080;

// ===== Main =====

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let supabase_url = env::var("SUPABASE_URL")
        .map_err(|_| anyhow::anyhow!("SUPABASE_URL must be set"))?;
    let backend_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());

    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}", "    🗳  COMMUNITY VOTING 🗳".bright_yellow().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    let token = match authenticate(supabase_url).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{} {}", "❌ Authentication failed:".red().bold(), e);
            return Ok(());
        }
    };

    println!("{}", "✅ Authentication successful!".green().bold());
    println!();

    let api = Api::new(backend_url, token);
    menu_loop(&api).await?;

    Ok(())
}

// ===== Authentication =====

async fn authenticate(supabase_url: String) -> anyhow::Result<String> {
    println!("Starting authentication...");
    println!();

    // Token storage shared between server and main thread
    let token_store: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let token_store_clone = token_store.clone();

    let app = Router::new().route(
        "/callback",
        get(move |query: Query<CallbackParams>| callback_handler(query, token_store_clone.clone())),
    );

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", CALLBACK_PORT)).await?;
    println!(
        "{}",
        format!("🔓 Local callback server started on port {}", CALLBACK_PORT).cyan()
    );

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    let auth_url = format!(
        "{}/auth/v1/authorize?provider=discord&redirect_to=http://localhost:{}/callback",
        supabase_url, CALLBACK_PORT
    );

    println!();
    println!("{}", "Opening browser for login...".yellow());
    println!();

    if let Err(e) = webbrowser::open(&auth_url) {
        eprintln!(
            "{} {}",
            "⚠️  Could not open browser automatically:".yellow(),
            e
        );
        println!();
        println!("{}", "Please open this URL manually:".bright_white().bold());
        println!("{}", auth_url.bright_blue().underline());
        println!();
    }

    let timeout = tokio::time::Duration::from_secs(120);
    let start = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        let token = token_store
            .lock()
            .map_err(|_| anyhow::anyhow!("token store poisoned"))?
            .clone();
        if let Some(token) = token {
            server_handle.abort();
            return Ok(token);
        }

        if start.elapsed() > timeout {
            server_handle.abort();
            anyhow::bail!("Authentication timeout (2 minutes)");
        }
    }
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <style>
        body {{ font-family: sans-serif; display: flex; justify-content: center;
               align-items: center; height: 100vh; margin: 0; background: #1f2937; }}
        .card {{ background: white; padding: 2.5rem; border-radius: 0.75rem;
                 text-align: center; max-width: 480px; }}
    </style>
</head>
<body><div class="card">{body}</div></body>
</html>"#
    ))
}

async fn callback_handler(
    Query(params): Query<CallbackParams>,
    token_store: Arc<Mutex<Option<String>>>,
) -> Html<String> {
    if let Some(error) = params.error {
        return page(
            "Login failed",
            &format!("<h1>❌ Login failed</h1><p>{error}</p><p>Close this window and try again.</p>"),
        );
    }

    if let Some(token) = params.access_token {
        let Ok(mut store) = token_store.lock() else {
            return page("Login failed", "<h1>❌ Internal error</h1>");
        };
        *store = Some(token);
        return page(
            "Logged in",
            "<h1>✅ Logged in</h1><p>You can go back to the terminal.</p>",
        );
    }

    // The provider puts the token in the URL fragment; bounce it back as a query.
    page(
        "Logging in",
        r#"<h1>Logging in…</h1>
<script>
    const params = new URLSearchParams(window.location.hash.substring(1));
    const token = params.get('access_token');
    if (token) {
        fetch('/callback?access_token=' + encodeURIComponent(token))
            .then(() => setTimeout(() => window.close(), 1000));
    } else {
        document.querySelector('.card').innerHTML =
            '<h1>❌ No token found</h1><p>Please try logging in again.</p>';
    }
</script>"#,
    )
}

// ===== Menu =====

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{} ", label.bright_green().bold());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase())
}

async fn menu_loop(api: &Api) -> anyhow::Result<()> {
    loop {
        println!("{}", "━".repeat(60).bright_black());
        println!(
            "{}",
            "[S]tatus  [V]ote  [M]y vote  [P]olls  [R]esults  [Q]uit".bright_black()
        );
        let choice = prompt(">")?;

        let result = match choice.as_str() {
            "s" | "status" => show_status(api).await,
            "v" | "vote" => vote_for_candidate(api).await,
            "m" | "my vote" => show_my_vote(api).await,
            "p" | "polls" => poll_menu(api).await,
            "r" | "results" => show_results(api).await,
            "q" | "quit" => {
                println!();
                println!("{}", "Thanks for voting! 👋".bright_cyan().bold());
                return Ok(());
            }
            _ => {
                println!("{}", "Invalid choice. Please try again.".red());
                continue;
            }
        };

        if let Err(e) = result {
            println!("{} {}", "✗".red().bold(), e.to_string().red());
        }
    }
}

async fn show_status(api: &Api) -> anyhow::Result<()> {
    let status: ElectionStatus = api.get("/election/status").await?;
    let label = match status.status.as_str() {
        "active" => status.status.green().bold(),
        "ended" => status.status.red().bold(),
        _ => status.status.yellow().bold(),
    };
    println!();
    println!("{} {}", "Election:".bright_white().bold(), label);
    if let (Some(start), Some(end)) = (status.start_at, status.end_at) {
        println!("{} {} → {}", "Window:".bright_black(), start, end);
    }
    println!();
    Ok(())
}

async fn vote_for_candidate(api: &Api) -> anyhow::Result<()> {
    let candidates: Vec<Candidate> = api.get("/candidates").await?;
    if candidates.is_empty() {
        println!("{}", "No candidates registered yet.".yellow());
        return Ok(());
    }

    println!();
    for (i, c) in candidates.iter().enumerate() {
        println!(
            "{}. {} {}",
            (i + 1).to_string().bright_cyan(),
            c.name.bright_white().bold(),
            format!("({})", c.party_name).bright_black()
        );
    }
    println!();

    let input = prompt("Candidate number (blank to cancel):")?;
    if input.is_empty() {
        return Ok(());
    }
    let Some(candidate) = input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| candidates.get(i))
    else {
        println!("{}", "No such candidate.".red());
        return Ok(());
    };

    let receipt: VoteReceipt = api
        .post(
            "/election/vote",
            &VoteRequest {
                candidate_id: candidate.id,
            },
        )
        .await?;
    let verb = if receipt.outcome == "changed" {
        "Vote changed to"
    } else {
        "Voted for"
    };
    println!("{} {}", format!("✓ {verb}").green(), candidate.name.bold());
    Ok(())
}

async fn show_my_vote(api: &Api) -> anyhow::Result<()> {
    let view: BallotView = api.get("/election/my-vote").await?;
    match (view.has_voted, view.candidate) {
        (false, _) => println!("{}", "You have not voted yet.".yellow()),
        (true, Some(c)) => println!(
            "{} {} {}",
            "Your vote:".bright_white(),
            c.name.bold(),
            format!("({})", c.party_name).bright_black()
        ),
        (true, None) => println!("{}", "Your candidate is no longer listed.".yellow()),
    }
    Ok(())
}

async fn poll_menu(api: &Api) -> anyhow::Result<()> {
    let polls: Vec<Poll> = api.get("/polls").await?;
    if polls.is_empty() {
        println!("{}", "No polls right now.".yellow());
        return Ok(());
    }

    println!();
    for (i, poll) in polls.iter().enumerate() {
        let marker = if poll.has_voted {
            "✓ voted".green()
        } else {
            poll.status.as_str().bright_black()
        };
        println!(
            "{}. {} [{}]",
            (i + 1).to_string().bright_cyan(),
            poll.question.bright_white().bold(),
            marker
        );
        for (j, option) in poll.options.iter().enumerate() {
            println!("     {}) {} - {}", j + 1, option.text, option.vote_count);
        }
    }
    println!();

    let input = prompt("Poll number (blank to cancel):")?;
    let Some(poll) = input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| polls.get(i))
    else {
        return Ok(());
    };

    let input = prompt("Option number:")?;
    let Some(option_index) = input.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) else {
        println!("{}", "No such option.".red());
        return Ok(());
    };

    let options: Vec<PollOption> = api
        .post(
            &format!("/polls/{}/vote", poll.id),
            &PollVoteRequest { option_index },
        )
        .await?;
    println!("{}", "✓ Vote recorded".green());
    for option in options {
        println!("     {} - {}", option.text, option.vote_count);
    }
    Ok(())
}

async fn show_results(api: &Api) -> anyhow::Result<()> {
    let results: Vec<TallyEntry> = api.get("/election/results").await?;

    println!();
    println!("{}", "=".repeat(60).bright_cyan());
    println!("{}", "    📊 ELECTION RESULTS".bright_yellow().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    for (i, entry) in results.iter().enumerate() {
        println!(
            "{}. {} {} - {} votes",
            (i + 1).to_string().bright_cyan(),
            entry.name.bright_white().bold(),
            format!("({})", entry.party_name).bright_black(),
            entry.vote_count.to_string().yellow()
        );
    }

    println!();
    Ok(())
}

// ===== API Calls =====

struct Api {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl Api {
    fn new(base: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;
        read(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await?;
        read(response).await
    }
}

async fn read<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await?;
        let message = serde_json::from_str::<ApiError>(&text)
            .map(|e| e.message)
            .unwrap_or(text);
        anyhow::bail!("{} ({})", message, status);
    }

    Ok(response.json().await?)
}
