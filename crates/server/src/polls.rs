use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    error::VoteError,
    models::{CreatePollRequest, NewPoll, Poll, PollView},
    store::Store,
    window::{PollStatus, parse_instant},
};

fn view(poll: Poll, now: DateTime<Utc>, has_voted: Option<bool>) -> PollView {
    let status = PollStatus::derive(now, Some(poll.start_at), Some(poll.end_at));
    PollView {
        poll,
        status,
        has_voted,
    }
}

pub fn validate_poll(req: CreatePollRequest) -> Result<NewPoll, VoteError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(VoteError::validation("Question is required"));
    }
    if req.options.len() < 2 {
        return Err(VoteError::validation("Provide at least two options"));
    }

    let options: Vec<String> = req
        .options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return Err(VoteError::validation("Options must be non-empty"));
    }

    let (Some(start_at), Some(end_at)) = (
        parse_instant(req.start_at.as_deref()),
        parse_instant(req.end_at.as_deref()),
    ) else {
        return Err(VoteError::validation("Invalid start or end date"));
    };
    if end_at <= start_at {
        return Err(VoteError::validation("End time must be after start time"));
    }

    Ok(NewPoll {
        question: question.to_string(),
        options,
        start_at,
        end_at,
    })
}

pub async fn create_poll(
    store: &dyn Store,
    req: CreatePollRequest,
    now: DateTime<Utc>,
) -> Result<PollView, VoteError> {
    let poll = store.insert_poll(validate_poll(req)?).await?;
    info!("Created poll {} with {} options", poll.id, poll.options.len());
    Ok(view(poll, now, None))
}

pub async fn list_polls(store: &dyn Store, now: DateTime<Utc>) -> Result<Vec<PollView>, VoteError> {
    Ok(store
        .list_polls()
        .await?
        .into_iter()
        .map(|p| view(p, now, None))
        .collect())
}

/// Polls with the caller's own `hasVoted` flag. Nobody else's vote is exposed.
pub async fn list_polls_for_voter(
    store: &dyn Store,
    voter_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<PollView>, VoteError> {
    let voted = store.voted_poll_ids(voter_id).await?;
    Ok(store
        .list_polls()
        .await?
        .into_iter()
        .map(|p| {
            let has_voted = voted.contains(&p.id);
            view(p, now, Some(has_voted))
        })
        .collect())
}

pub async fn delete_poll(store: &dyn Store, id: i32) -> Result<(), VoteError> {
    if !store.delete_poll(id).await? {
        return Err(VoteError::NotFound("Poll"));
    }
    info!("Deleted poll {}", id);
    Ok(())
}
