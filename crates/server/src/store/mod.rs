//! Persistence seam.
//!
//! The voting logic is written once against [`Store`]. Implementations must
//! make [`Store::upsert_ballot`] and [`Store::record_poll_vote`] atomic with
//! respect to concurrent calls for the same voter.

mod memory;
mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Ballot, BallotChange, Candidate, CandidatePatch, Comment, Feedback, FeedbackQuestion,
    NewCandidate, NewComment, NewFeedback, NewPoll, NewPost, Poll, PollVoteRecord, Post,
    VotingWindow,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait Store: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // ----- election window -----

    async fn get_window(&self) -> StoreResult<Option<VotingWindow>>;

    /// Create or replace the singleton window.
    async fn upsert_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        is_published: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<VotingWindow>;

    // ----- ballots -----

    /// Insert the voter's ballot or overwrite its choice, as one atomic step.
    async fn upsert_ballot(
        &self,
        voter_id: &str,
        candidate_id: i32,
        cast_at: DateTime<Utc>,
    ) -> StoreResult<(Ballot, BallotChange)>;

    async fn find_ballot(&self, voter_id: &str) -> StoreResult<Option<Ballot>>;

    /// Ballot counts grouped by candidate id, in a deterministic order that
    /// the tally keeps for ties.
    async fn ballot_counts(&self) -> StoreResult<Vec<(i32, i64)>>;

    // ----- candidates -----

    async fn list_candidates(&self) -> StoreResult<Vec<Candidate>>;

    async fn get_candidate(&self, id: i32) -> StoreResult<Option<Candidate>>;

    async fn candidate_email_taken(&self, email: &str, except: Option<i32>) -> StoreResult<bool>;

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate>;

    async fn update_candidate(
        &self,
        id: i32,
        patch: CandidatePatch,
    ) -> StoreResult<Option<Candidate>>;

    async fn delete_candidate(&self, id: i32) -> StoreResult<bool>;

    // ----- polls -----

    /// All polls, newest first.
    async fn list_polls(&self) -> StoreResult<Vec<Poll>>;

    async fn get_poll(&self, id: i32) -> StoreResult<Option<Poll>>;

    async fn insert_poll(&self, poll: NewPoll) -> StoreResult<Poll>;

    async fn delete_poll(&self, id: i32) -> StoreResult<bool>;

    async fn voted_poll_ids(&self, voter_id: &str) -> StoreResult<HashSet<i32>>;

    /// Add the voter to the poll's voter set and bump the option counter,
    /// or do nothing at all.
    async fn record_poll_vote(
        &self,
        poll_id: i32,
        voter_id: &str,
        option_index: usize,
    ) -> StoreResult<PollVoteRecord>;

    // ----- feedback -----

    async fn list_feedback_questions(&self) -> StoreResult<Vec<FeedbackQuestion>>;

    async fn feedback_question_exists(&self, id: i32) -> StoreResult<bool>;

    async fn insert_feedback_question(&self, question: String) -> StoreResult<FeedbackQuestion>;

    /// Removes the question together with its submissions.
    async fn delete_feedback_question(&self, id: i32) -> StoreResult<bool>;

    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback>;

    async fn list_feedback(&self) -> StoreResult<Vec<Feedback>>;

    async fn delete_feedback(&self, id: i32) -> StoreResult<bool>;

    // ----- feed -----

    /// All posts with reactions and comments, newest first.
    async fn list_posts(&self) -> StoreResult<Vec<Post>>;

    async fn get_post(&self, id: i32) -> StoreResult<Option<Post>>;

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post>;

    /// Removes the post together with its comments and reactions.
    async fn delete_post(&self, id: i32) -> StoreResult<bool>;

    /// Set the voter's reaction on a post, replacing any earlier one.
    /// Returns `false` when the post does not exist.
    async fn upsert_reaction(
        &self,
        post_id: i32,
        voter_id: &str,
        kind: &str,
    ) -> StoreResult<bool>;

    /// `None` when the post does not exist.
    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Option<Comment>>;

    /// Comments on one post, newest first.
    async fn list_comments(&self, post_id: i32) -> StoreResult<Vec<Comment>>;

    async fn get_comment(&self, id: i32) -> StoreResult<Option<Comment>>;

    async fn delete_comment(&self, id: i32) -> StoreResult<bool>;
}
