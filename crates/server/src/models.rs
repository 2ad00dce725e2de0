use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::window::{ElectionStatus, PollStatus};

// ===== Election =====

/// The singleton election schedule as stored.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VotingWindow {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub is_published: bool,
    pub updated_at: DateTime<Utc>,
}

/// A window as observed at a given instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowView {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: ElectionStatus,
    pub is_published: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStatus {
    pub status: ElectionStatus,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    #[serde(default)]
    pub is_published: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub voter_id: String,
    pub candidate_id: i32,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotChange {
    Cast,
    Changed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub candidate_id: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub outcome: BallotChange,
    pub candidate_id: i32,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotView {
    pub has_voted: bool,
    pub candidate: Option<Candidate>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub candidate_id: i32,
    pub name: String,
    pub party_name: String,
    pub party_symbol: Option<String>,
    pub candidate_image: Option<String>,
    pub vote_count: i64,
}

// ===== Candidates =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub dob: String,
    pub gender: String,
    pub party_name: String,
    pub party_symbol: Option<String>,
    pub candidate_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCandidate {
    pub name: String,
    pub email: String,
    pub dob: String,
    pub gender: String,
    pub party_name: String,
    pub party_symbol: Option<String>,
    pub candidate_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub party_name: Option<String>,
    pub party_symbol: Option<String>,
    pub candidate_image: Option<String>,
}

// ===== Polls =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub text: String,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: i32,
    pub question: String,
    pub options: Vec<PollOption>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollVoteRequest {
    pub option_index: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub status: PollStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_voted: Option<bool>,
}

/// Outcome of the store's atomic "record voter and bump option" step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVoteRecord {
    Recorded(Vec<PollOption>),
    AlreadyVoted,
    UnknownOption,
    MissingPoll,
}

// ===== Feedback =====

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQuestion {
    pub id: i32,
    pub question: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub question_id: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub question_id: i32,
    pub message: String,
    pub voter_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i32,
    pub question_id: i32,
    pub question: Option<String>,
    pub message: String,
    pub is_anonymous: bool,
    pub voter_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ===== Feed =====

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub voter_id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i32,
    pub post_id: i32,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A post with its reactions (one per voter) and comments, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i32,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub reactions: Vec<Reaction>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i32,
    pub author_id: String,
    pub content: String,
}
