use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Store, StoreResult};
use crate::models::{
    Ballot, BallotChange, Candidate, CandidatePatch, Comment, Feedback, FeedbackQuestion,
    NewCandidate, NewComment, NewFeedback, NewPoll, NewPost, Poll, PollOption, PollVoteRecord,
    Post, Reaction, VotingWindow,
};

struct StoredPoll {
    poll: Poll,
    voters: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    window: Option<VotingWindow>,
    ballots: HashMap<String, Ballot>,
    // Insertion order of first ballots, used to keep counts deterministic.
    ballot_order: Vec<String>,
    candidates: Vec<Candidate>,
    polls: Vec<StoredPoll>,
    questions: Vec<FeedbackQuestion>,
    feedback: Vec<Feedback>,
    // Stored without comments; `with_comments` attaches them on read.
    posts: Vec<Post>,
    comments: Vec<Comment>,
    next_id: i32,
}

impl Inner {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn comments_on(&self, post_id: i32) -> Vec<Comment> {
        self.comments
            .iter()
            .rev()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect()
    }

    fn with_comments(&self, post: &Post) -> Post {
        Post {
            comments: self.comments_on(post.id),
            ..post.clone()
        }
    }
}

/// Process-local store. Every operation holds one lock for its whole
/// check-and-mutate sequence.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_window(&self) -> StoreResult<Option<VotingWindow>> {
        Ok(self.inner.lock().await.window.clone())
    }

    async fn upsert_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        is_published: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<VotingWindow> {
        let window = VotingWindow {
            start_at,
            end_at,
            is_published,
            updated_at: now,
        };
        self.inner.lock().await.window = Some(window.clone());
        Ok(window)
    }

    async fn upsert_ballot(
        &self,
        voter_id: &str,
        candidate_id: i32,
        cast_at: DateTime<Utc>,
    ) -> StoreResult<(Ballot, BallotChange)> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.ballots.get_mut(voter_id) {
            existing.candidate_id = candidate_id;
            existing.cast_at = cast_at;
            return Ok((existing.clone(), BallotChange::Changed));
        }

        let ballot = Ballot {
            voter_id: voter_id.to_string(),
            candidate_id,
            cast_at,
        };
        inner.ballots.insert(voter_id.to_string(), ballot.clone());
        inner.ballot_order.push(voter_id.to_string());
        Ok((ballot, BallotChange::Cast))
    }

    async fn find_ballot(&self, voter_id: &str) -> StoreResult<Option<Ballot>> {
        Ok(self.inner.lock().await.ballots.get(voter_id).cloned())
    }

    async fn ballot_counts(&self) -> StoreResult<Vec<(i32, i64)>> {
        let inner = self.inner.lock().await;
        let mut counts: Vec<(i32, i64)> = Vec::new();
        for voter in &inner.ballot_order {
            let Some(ballot) = inner.ballots.get(voter) else {
                continue;
            };
            match counts.iter_mut().find(|(id, _)| *id == ballot.candidate_id) {
                Some((_, n)) => *n += 1,
                None => counts.push((ballot.candidate_id, 1)),
            }
        }
        Ok(counts)
    }

    async fn list_candidates(&self) -> StoreResult<Vec<Candidate>> {
        Ok(self.inner.lock().await.candidates.clone())
    }

    async fn get_candidate(&self, id: i32) -> StoreResult<Option<Candidate>> {
        let inner = self.inner.lock().await;
        Ok(inner.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn candidate_email_taken(&self, email: &str, except: Option<i32>) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .candidates
            .iter()
            .any(|c| c.email == email && Some(c.id) != except))
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let candidate = Candidate {
            id,
            name: candidate.name,
            email: candidate.email,
            dob: candidate.dob,
            gender: candidate.gender,
            party_name: candidate.party_name,
            party_symbol: candidate.party_symbol,
            candidate_image: candidate.candidate_image,
            created_at: Utc::now(),
        };
        inner.candidates.push(candidate.clone());
        Ok(candidate)
    }

    async fn update_candidate(
        &self,
        id: i32,
        patch: CandidatePatch,
    ) -> StoreResult<Option<Candidate>> {
        let mut inner = self.inner.lock().await;
        let Some(candidate) = inner.candidates.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            candidate.name = name;
        }
        if let Some(email) = patch.email {
            candidate.email = email;
        }
        if let Some(dob) = patch.dob {
            candidate.dob = dob;
        }
        if let Some(gender) = patch.gender {
            candidate.gender = gender;
        }
        if let Some(party_name) = patch.party_name {
            candidate.party_name = party_name;
        }
        if patch.party_symbol.is_some() {
            candidate.party_symbol = patch.party_symbol;
        }
        if patch.candidate_image.is_some() {
            candidate.candidate_image = patch.candidate_image;
        }
        Ok(Some(candidate.clone()))
    }

    async fn delete_candidate(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.candidates.len();
        inner.candidates.retain(|c| c.id != id);
        Ok(inner.candidates.len() != before)
    }

    async fn list_polls(&self) -> StoreResult<Vec<Poll>> {
        let inner = self.inner.lock().await;
        // Stored oldest first.
        Ok(inner.polls.iter().rev().map(|p| p.poll.clone()).collect())
    }

    async fn get_poll(&self, id: i32) -> StoreResult<Option<Poll>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .polls
            .iter()
            .find(|p| p.poll.id == id)
            .map(|p| p.poll.clone()))
    }

    async fn insert_poll(&self, poll: NewPoll) -> StoreResult<Poll> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let poll = Poll {
            id,
            question: poll.question,
            options: poll
                .options
                .into_iter()
                .map(|text| PollOption {
                    text,
                    vote_count: 0,
                })
                .collect(),
            start_at: poll.start_at,
            end_at: poll.end_at,
            created_at: Utc::now(),
        };
        inner.polls.push(StoredPoll {
            poll: poll.clone(),
            voters: HashSet::new(),
        });
        Ok(poll)
    }

    async fn delete_poll(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.polls.len();
        inner.polls.retain(|p| p.poll.id != id);
        Ok(inner.polls.len() != before)
    }

    async fn voted_poll_ids(&self, voter_id: &str) -> StoreResult<HashSet<i32>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .polls
            .iter()
            .filter(|p| p.voters.contains(voter_id))
            .map(|p| p.poll.id)
            .collect())
    }

    async fn record_poll_vote(
        &self,
        poll_id: i32,
        voter_id: &str,
        option_index: usize,
    ) -> StoreResult<PollVoteRecord> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.polls.iter_mut().find(|p| p.poll.id == poll_id) else {
            return Ok(PollVoteRecord::MissingPoll);
        };
        if stored.voters.contains(voter_id) {
            return Ok(PollVoteRecord::AlreadyVoted);
        }
        let Some(option) = stored.poll.options.get_mut(option_index) else {
            return Ok(PollVoteRecord::UnknownOption);
        };
        option.vote_count += 1;
        stored.voters.insert(voter_id.to_string());
        Ok(PollVoteRecord::Recorded(stored.poll.options.clone()))
    }

    async fn list_feedback_questions(&self) -> StoreResult<Vec<FeedbackQuestion>> {
        Ok(self.inner.lock().await.questions.clone())
    }

    async fn feedback_question_exists(&self, id: i32) -> StoreResult<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.questions.iter().any(|q| q.id == id))
    }

    async fn insert_feedback_question(&self, question: String) -> StoreResult<FeedbackQuestion> {
        let mut inner = self.inner.lock().await;
        let question = FeedbackQuestion {
            id: inner.next_id(),
            question,
            created_at: Utc::now(),
        };
        inner.questions.push(question.clone());
        Ok(question)
    }

    async fn delete_feedback_question(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.questions.len();
        inner.questions.retain(|q| q.id != id);
        if inner.questions.len() == before {
            return Ok(false);
        }
        inner.feedback.retain(|f| f.question_id != id);
        Ok(true)
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback> {
        let mut inner = self.inner.lock().await;
        let question = inner
            .questions
            .iter()
            .find(|q| q.id == feedback.question_id)
            .map(|q| q.question.clone());
        let entry = Feedback {
            id: inner.next_id(),
            question_id: feedback.question_id,
            question,
            message: feedback.message,
            is_anonymous: feedback.voter_id.is_none(),
            voter_id: feedback.voter_id,
            created_at: Utc::now(),
        };
        inner.feedback.push(entry.clone());
        Ok(entry)
    }

    async fn list_feedback(&self) -> StoreResult<Vec<Feedback>> {
        let inner = self.inner.lock().await;
        Ok(inner.feedback.iter().rev().cloned().collect())
    }

    async fn delete_feedback(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.feedback.len();
        inner.feedback.retain(|f| f.id != id);
        Ok(inner.feedback.len() != before)
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .posts
            .iter()
            .rev()
            .map(|post| inner.with_comments(post))
            .collect())
    }

    async fn get_post(&self, id: i32) -> StoreResult<Option<Post>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .posts
            .iter()
            .find(|p| p.id == id)
            .map(|post| inner.with_comments(post)))
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        let mut inner = self.inner.lock().await;
        let post = Post {
            id: inner.next_id(),
            author_id: post.author_id,
            title: post.title,
            content: post.content,
            reactions: Vec::new(),
            comments: Vec::new(),
            created_at: Utc::now(),
        };
        inner.posts.push(post.clone());
        Ok(post)
    }

    async fn delete_post(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.posts.len();
        inner.posts.retain(|p| p.id != id);
        if inner.posts.len() == before {
            return Ok(false);
        }
        inner.comments.retain(|c| c.post_id != id);
        Ok(true)
    }

    async fn upsert_reaction(
        &self,
        post_id: i32,
        voter_id: &str,
        kind: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(post) = inner.posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(false);
        };
        match post.reactions.iter_mut().find(|r| r.voter_id == voter_id) {
            Some(existing) => existing.kind = kind.to_string(),
            None => post.reactions.push(Reaction {
                voter_id: voter_id.to_string(),
                kind: kind.to_string(),
            }),
        }
        Ok(true)
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Option<Comment>> {
        let mut inner = self.inner.lock().await;
        if !inner.posts.iter().any(|p| p.id == comment.post_id) {
            return Ok(None);
        }
        let comment = Comment {
            id: inner.next_id(),
            post_id: comment.post_id,
            author_id: comment.author_id,
            content: comment.content,
            created_at: Utc::now(),
        };
        inner.comments.push(comment.clone());
        Ok(Some(comment))
    }

    async fn list_comments(&self, post_id: i32) -> StoreResult<Vec<Comment>> {
        Ok(self.inner.lock().await.comments_on(post_id))
    }

    async fn get_comment(&self, id: i32) -> StoreResult<Option<Comment>> {
        let inner = self.inner.lock().await;
        Ok(inner.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn delete_comment(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.comments.len();
        inner.comments.retain(|c| c.id != id);
        Ok(inner.comments.len() != before)
    }
}
