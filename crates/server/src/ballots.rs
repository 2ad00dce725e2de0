//! Casting ballots.
//!
//! Election ballots can be changed freely while the window is open; poll
//! votes are one-shot. The atomic parts live in the store, the gating here.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
    error::{ClosedReason, Scope, VoteError},
    models::{BallotView, PollOption, PollVoteRecord, TallyEntry, VoteReceipt},
    store::Store,
    window::{Phase, phase},
};

/// Refuse unless `now` falls inside `[start, end]`.
pub fn ensure_open(
    scope: Scope,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), VoteError> {
    let reason = match phase(now, Some(start), Some(end)) {
        Phase::Open => return Ok(()),
        Phase::Before => ClosedReason::NotStarted,
        Phase::After => ClosedReason::Ended,
    };
    Err(VoteError::WindowClosed { scope, reason })
}

pub async fn cast_or_change_ballot(
    store: &dyn Store,
    voter_id: &str,
    candidate_id: i32,
    now: DateTime<Utc>,
) -> Result<VoteReceipt, VoteError> {
    let window = store
        .get_window()
        .await?
        .ok_or_else(|| VoteError::Configuration("Voting settings not configured".into()))?;

    if let Err(err) = ensure_open(Scope::Election, now, window.start_at, window.end_at) {
        debug!("Ballot from {} refused: {}", voter_id, err);
        return Err(err);
    }

    if store.get_candidate(candidate_id).await?.is_none() {
        return Err(VoteError::InvalidChoice(format!(
            "Candidate {candidate_id} does not exist"
        )));
    }

    let (ballot, outcome) = store.upsert_ballot(voter_id, candidate_id, now).await?;
    info!(
        "Ballot {:?} for voter {} -> candidate {}",
        outcome, ballot.voter_id, ballot.candidate_id
    );

    Ok(VoteReceipt {
        outcome,
        candidate_id: ballot.candidate_id,
        cast_at: ballot.cast_at,
    })
}

pub async fn user_ballot_view(store: &dyn Store, voter_id: &str) -> Result<BallotView, VoteError> {
    let Some(ballot) = store.find_ballot(voter_id).await? else {
        return Ok(BallotView {
            has_voted: false,
            candidate: None,
        });
    };

    // A deleted candidate leaves the ballot behind with nothing to show.
    let candidate = store.get_candidate(ballot.candidate_id).await?;
    Ok(BallotView {
        has_voted: true,
        candidate,
    })
}

/// Counts per candidate, highest first. Ballots whose candidate no longer
/// exists are left out.
pub async fn tally(store: &dyn Store) -> Result<Vec<TallyEntry>, VoteError> {
    let counts = store.ballot_counts().await?;
    let candidates = store.list_candidates().await?;

    let mut entries: Vec<TallyEntry> = counts
        .into_iter()
        .filter_map(|(candidate_id, vote_count)| {
            let candidate = candidates.iter().find(|c| c.id == candidate_id)?;
            Some(TallyEntry {
                candidate_id,
                name: candidate.name.clone(),
                party_name: candidate.party_name.clone(),
                party_symbol: candidate.party_symbol.clone(),
                candidate_image: candidate.candidate_image.clone(),
                vote_count,
            })
        })
        .collect();

    // Stable: ties keep the order the store aggregated them in.
    entries.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
    Ok(entries)
}

pub async fn cast_poll_vote(
    store: &dyn Store,
    poll_id: i32,
    voter_id: &str,
    option_index: i64,
    now: DateTime<Utc>,
) -> Result<Vec<PollOption>, VoteError> {
    let poll = store
        .get_poll(poll_id)
        .await?
        .ok_or(VoteError::NotFound("Poll"))?;

    if poll.end_at <= poll.start_at {
        return Err(VoteError::Configuration(
            "Poll schedule is not configured".into(),
        ));
    }

    if let Err(err) = ensure_open(Scope::Poll, now, poll.start_at, poll.end_at) {
        debug!("Poll {} vote from {} refused: {}", poll_id, voter_id, err);
        return Err(err);
    }

    let invalid = || VoteError::InvalidChoice("Invalid option index".into());
    let Ok(index) = usize::try_from(option_index) else {
        if store.voted_poll_ids(voter_id).await?.contains(&poll_id) {
            return Err(VoteError::AlreadyVoted);
        }
        return Err(invalid());
    };

    match store.record_poll_vote(poll_id, voter_id, index).await? {
        PollVoteRecord::Recorded(options) => {
            info!("Poll {} vote from {} -> option {}", poll_id, voter_id, index);
            Ok(options)
        }
        PollVoteRecord::AlreadyVoted => Err(VoteError::AlreadyVoted),
        PollVoteRecord::UnknownOption => Err(invalid()),
        PollVoteRecord::MissingPoll => Err(VoteError::NotFound("Poll")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        models::{BallotChange, NewCandidate, NewPoll},
        store::MemoryStore,
    };

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn candidate(name: &str) -> NewCandidate {
        NewCandidate {
            name: name.to_string(),
            email: format!("{}@example.org", name.to_lowercase()),
            dob: "1980-04-02".into(),
            gender: "others".into(),
            party_name: format!("{name} Party"),
            ..NewCandidate::default()
        }
    }

    /// Window open from t(0) to t(24), two candidates.
    async fn election() -> (MemoryStore, i32, i32) {
        let store = MemoryStore::new();
        store.upsert_window(t(0), t(24), false, t(-48)).await.unwrap();
        let a = store.insert_candidate(candidate("Ada")).await.unwrap();
        let b = store.insert_candidate(candidate("Bo")).await.unwrap();
        (store, a.id, b.id)
    }

    async fn poll(store: &MemoryStore, options: &[&str]) -> i32 {
        store
            .insert_poll(NewPoll {
                question: "Lunch?".into(),
                options: options.iter().map(|o| o.to_string()).collect(),
                start_at: t(0),
                end_at: t(24),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn refuses_without_window() {
        let store = MemoryStore::new();
        let c = store.insert_candidate(candidate("Ada")).await.unwrap();
        let err = cast_or_change_ballot(&store, "v1", c.id, t(1)).await.unwrap_err();
        assert!(matches!(err, VoteError::Configuration(_)));
    }

    #[tokio::test]
    async fn window_gates_ballots_on_both_sides() {
        let (store, a, _) = election().await;

        let err = cast_or_change_ballot(&store, "v1", a, t(-1)).await.unwrap_err();
        assert!(matches!(
            err,
            VoteError::WindowClosed {
                scope: Scope::Election,
                reason: ClosedReason::NotStarted
            }
        ));

        let err = cast_or_change_ballot(&store, "v1", a, t(24) + Duration::milliseconds(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VoteError::WindowClosed {
                reason: ClosedReason::Ended,
                ..
            }
        ));

        assert!(cast_or_change_ballot(&store, "v1", a, t(0)).await.is_ok());
        assert!(cast_or_change_ballot(&store, "v2", a, t(24)).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_candidate_is_invalid_choice() {
        let (store, _, _) = election().await;
        let err = cast_or_change_ballot(&store, "v1", 999, t(1)).await.unwrap_err();
        assert!(matches!(err, VoteError::InvalidChoice(_)));
        assert!(store.find_ballot("v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_ballot_keeps_one_row() {
        let (store, a, _) = election().await;
        let first = cast_or_change_ballot(&store, "v1", a, t(1)).await.unwrap();
        let second = cast_or_change_ballot(&store, "v1", a, t(1)).await.unwrap();
        assert_eq!(first.outcome, BallotChange::Cast);
        assert_eq!(second.outcome, BallotChange::Changed);

        assert_eq!(store.ballot_counts().await.unwrap(), vec![(a, 1)]);
    }

    #[tokio::test]
    async fn changed_ballot_moves_the_vote() {
        let (store, a, b) = election().await;
        cast_or_change_ballot(&store, "v1", a, t(1)).await.unwrap();
        cast_or_change_ballot(&store, "v1", b, t(2)).await.unwrap();

        let ballot = store.find_ballot("v1").await.unwrap().unwrap();
        assert_eq!(ballot.candidate_id, b);
        assert_eq!(ballot.cast_at, t(2));

        let results = tally(&store).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate_id, b);
        assert_eq!(results[0].vote_count, 1);
    }

    #[tokio::test]
    async fn racing_changes_leave_a_single_ballot() {
        let (store, a, b) = election().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let choice = if i % 2 == 0 { a } else { b };
            handles.push(tokio::spawn(async move {
                cast_or_change_ballot(&*store, "v1", choice, t(1)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let counts = store.ballot_counts().await.unwrap();
        assert_eq!(counts.iter().map(|(_, n)| n).sum::<i64>(), 1);
    }

    #[tokio::test]
    async fn ballot_view_only_shows_own_choice() {
        let (store, a, b) = election().await;
        assert!(!user_ballot_view(&store, "v1").await.unwrap().has_voted);

        cast_or_change_ballot(&store, "v1", a, t(1)).await.unwrap();
        cast_or_change_ballot(&store, "v2", b, t(1)).await.unwrap();

        let view = user_ballot_view(&store, "v1").await.unwrap();
        assert!(view.has_voted);
        assert_eq!(view.candidate.map(|c| c.id), Some(a));
    }

    #[tokio::test]
    async fn tally_sorts_and_drops_deleted_candidates() {
        let (store, a, b) = election().await;
        let c = store.insert_candidate(candidate("Cy")).await.unwrap().id;
        for voter in ["v1", "v2"] {
            cast_or_change_ballot(&store, voter, b, t(1)).await.unwrap();
        }
        cast_or_change_ballot(&store, "v3", a, t(1)).await.unwrap();
        cast_or_change_ballot(&store, "v4", c, t(1)).await.unwrap();

        let results = tally(&store).await.unwrap();
        let order: Vec<(i32, i64)> = results.iter().map(|e| (e.candidate_id, e.vote_count)).collect();
        assert_eq!(order, vec![(b, 2), (a, 1), (c, 1)]);
        assert_eq!(results[0].party_name, "Bo Party");

        store.delete_candidate(c).await.unwrap();
        let results = tally(&store).await.unwrap();
        assert!(results.iter().all(|e| e.candidate_id != c));

        let view = user_ballot_view(&store, "v4").await.unwrap();
        assert!(view.has_voted);
        assert!(view.candidate.is_none());
    }

    #[tokio::test]
    async fn poll_forbids_second_vote() {
        let store = MemoryStore::new();
        let id = poll(&store, &["A", "B"]).await;

        let options = cast_poll_vote(&store, id, "v1", 0, t(1)).await.unwrap();
        assert_eq!(options[0].vote_count, 1);

        let err = cast_poll_vote(&store, id, "v1", 1, t(2)).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyVoted));

        let poll = store.get_poll(id).await.unwrap().unwrap();
        assert_eq!(poll.options[0].vote_count, 1);
        assert_eq!(poll.options[1].vote_count, 0);
    }

    #[tokio::test]
    async fn poll_checks_run_in_order() {
        let store = MemoryStore::new();
        let id = poll(&store, &["A", "B"]).await;

        let err = cast_poll_vote(&store, id + 100, "v1", 0, t(1)).await.unwrap_err();
        assert!(matches!(err, VoteError::NotFound("Poll")));

        let err = cast_poll_vote(&store, id, "v1", 0, t(-1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Poll has not started yet");

        let err = cast_poll_vote(&store, id, "v1", 0, t(25)).await.unwrap_err();
        assert_eq!(err.to_string(), "Poll has ended");

        for index in [2, -1] {
            let err = cast_poll_vote(&store, id, "v1", index, t(1)).await.unwrap_err();
            assert!(matches!(err, VoteError::InvalidChoice(_)));
        }

        cast_poll_vote(&store, id, "v1", 1, t(1)).await.unwrap();
        let err = cast_poll_vote(&store, id, "v1", -1, t(1)).await.unwrap_err();
        assert!(matches!(err, VoteError::AlreadyVoted));
    }

    #[tokio::test]
    async fn poll_with_inverted_schedule_is_misconfigured() {
        let store = MemoryStore::new();
        let id = store
            .insert_poll(NewPoll {
                question: "Broken?".into(),
                options: vec!["yes".into(), "no".into()],
                start_at: t(5),
                end_at: t(5),
            })
            .await
            .unwrap()
            .id;
        let err = cast_poll_vote(&store, id, "v1", 0, t(5)).await.unwrap_err();
        assert!(matches!(err, VoteError::Configuration(_)));
    }

    #[tokio::test]
    async fn two_voters_split_a_poll() {
        let store = MemoryStore::new();
        let id = poll(&store, &["A", "B"]).await;
        cast_poll_vote(&store, id, "v1", 0, t(1)).await.unwrap();
        let options = cast_poll_vote(&store, id, "v2", 1, t(1)).await.unwrap();
        assert_eq!(
            options.iter().map(|o| o.vote_count).collect::<Vec<_>>(),
            vec![1, 1]
        );

        let voted = store.voted_poll_ids("v1").await.unwrap();
        assert!(voted.contains(&id));
        for (voter, index) in [("v1", 1), ("v2", 0)] {
            let err = cast_poll_vote(&store, id, voter, index, t(2)).await.unwrap_err();
            assert!(matches!(err, VoteError::AlreadyVoted));
        }
    }

    #[tokio::test]
    async fn concurrent_poll_votes_count_once() {
        let store = Arc::new(MemoryStore::new());
        let id = poll(&store, &["A", "B", "C"]).await;

        let mut handles = Vec::new();
        for i in 0..24 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                cast_poll_vote(&*store, id, "v1", i % 3, t(1)).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(VoteError::AlreadyVoted) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 1);

        let poll = store.get_poll(id).await.unwrap().unwrap();
        let total: i64 = poll.options.iter().map(|o| o.vote_count).sum();
        assert_eq!(total, 1);
    }
}
