//! Election schedule and the rule deciding when results are visible.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    ballots,
    error::VoteError,
    models::{PublicStatus, TallyEntry, VotingWindow, WindowView},
    store::Store,
    window::{ElectionStatus, parse_instant},
};

fn status_of(window: &VotingWindow, now: DateTime<Utc>) -> ElectionStatus {
    ElectionStatus::derive(now, Some(window.start_at), Some(window.end_at))
}

/// Results are visible only once the window has ended and an admin has
/// published them. A stored publish flag on a still-open window is ignored.
pub fn can_view_results(window: Option<&VotingWindow>, now: DateTime<Utc>) -> bool {
    match window {
        Some(window) => status_of(window, now) == ElectionStatus::Ended && window.is_published,
        None => false,
    }
}

/// The window as it looks at `now`.
pub fn window_view(window: VotingWindow, now: DateTime<Utc>) -> WindowView {
    let status = status_of(&window, now);
    WindowView {
        start_at: window.start_at,
        end_at: window.end_at,
        status,
        is_published: window.is_published && status == ElectionStatus::Ended,
        updated_at: window.updated_at,
    }
}

pub async fn current_window(
    store: &dyn Store,
    now: DateTime<Utc>,
) -> Result<Option<WindowView>, VoteError> {
    Ok(store.get_window().await?.map(|w| window_view(w, now)))
}

pub async fn public_status(store: &dyn Store, now: DateTime<Utc>) -> Result<PublicStatus, VoteError> {
    let window = store.get_window().await?;
    Ok(PublicStatus {
        status: ElectionStatus::derive(
            now,
            window.as_ref().map(|w| w.start_at),
            window.as_ref().map(|w| w.end_at),
        ),
        start_at: window.as_ref().map(|w| w.start_at),
        end_at: window.as_ref().map(|w| w.end_at),
    })
}

/// Create or replace the election schedule. Publishing is dropped unless the
/// new schedule has already ended at `now`.
pub async fn set_schedule(
    store: &dyn Store,
    start: Option<&str>,
    end: Option<&str>,
    is_published: bool,
    now: DateTime<Utc>,
) -> Result<WindowView, VoteError> {
    let (Some(start_at), Some(end_at)) = (parse_instant(start), parse_instant(end)) else {
        return Err(VoteError::validation("Invalid start or end date"));
    };
    if end_at <= start_at {
        return Err(VoteError::validation(
            "End date-time must be after start date-time",
        ));
    }

    let status = ElectionStatus::derive(now, Some(start_at), Some(end_at));
    let is_published = is_published && status == ElectionStatus::Ended;

    let window = store
        .upsert_window(start_at, end_at, is_published, now)
        .await?;
    info!(
        "Election window set to {} .. {} ({}, published: {})",
        window.start_at,
        window.end_at,
        status.as_str(),
        window.is_published
    );
    Ok(window_view(window, now))
}

pub async fn published_results(
    store: &dyn Store,
    now: DateTime<Utc>,
) -> Result<Vec<TallyEntry>, VoteError> {
    let window = store.get_window().await?;
    if !can_view_results(window.as_ref(), now) {
        let reason = match &window {
            None => "Voting has not been configured",
            Some(w) if status_of(w, now) != ElectionStatus::Ended => {
                "Results can only be published after voting ends"
            }
            Some(_) => "Results are not published yet",
        };
        return Err(VoteError::NotAvailable(reason.to_string()));
    }
    ballots::tally(store).await
}
