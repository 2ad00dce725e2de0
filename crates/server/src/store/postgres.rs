use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};

use super::{Store, StoreResult};
use crate::models::{
    Ballot, BallotChange, Candidate, CandidatePatch, Comment, Feedback, FeedbackQuestion,
    NewCandidate, NewComment, NewFeedback, NewPoll, NewPost, Poll, PollOption, PollVoteRecord,
    Post, Reaction, VotingWindow,
};

const CANDIDATE_COLUMNS: &str =
    "id, name, email, dob, gender, party_name, party_symbol, candidate_image, created_at";

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i32,
    question: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl PollRow {
    fn into_poll(self, options: Vec<PollOption>) -> Poll {
        Poll {
            id: self.id,
            question: self.question,
            options,
            start_at: self.start_at,
            end_at: self.end_at,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i32,
    author_id: String,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl PostRow {
    fn into_post(self, reactions: Vec<Reaction>, comments: Vec<Comment>) -> Post {
        Post {
            id: self.id,
            author_id: self.author_id,
            title: self.title,
            content: self.content,
            reactions,
            comments,
            created_at: self.created_at,
        }
    }
}

const COMMENT_COLUMNS: &str = "id, post_id, author_id, content, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.db).await
    }

    async fn options_for(&self, poll_id: i32) -> StoreResult<Vec<PollOption>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT text, vote_count FROM poll_options WHERE poll_id = $1 ORDER BY position",
        )
        .bind(poll_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(text, vote_count)| PollOption { text, vote_count })
            .collect())
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn get_window(&self) -> StoreResult<Option<VotingWindow>> {
        sqlx::query_as(
            "SELECT start_at, end_at, is_published, updated_at FROM voting_window WHERE id = 1",
        )
        .fetch_optional(&self.db)
        .await
    }

    async fn upsert_window(
        &self,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        is_published: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<VotingWindow> {
        sqlx::query_as(
            "INSERT INTO voting_window (id, start_at, end_at, is_published, updated_at)
             VALUES (1, $1, $2, $3, $4)
             ON CONFLICT (id)
             DO UPDATE SET start_at = EXCLUDED.start_at,
                           end_at = EXCLUDED.end_at,
                           is_published = EXCLUDED.is_published,
                           updated_at = EXCLUDED.updated_at
             RETURNING start_at, end_at, is_published, updated_at",
        )
        .bind(start_at)
        .bind(end_at)
        .bind(is_published)
        .bind(now)
        .fetch_one(&self.db)
        .await
    }

    async fn upsert_ballot(
        &self,
        voter_id: &str,
        candidate_id: i32,
        cast_at: DateTime<Utc>,
    ) -> StoreResult<(Ballot, BallotChange)> {
        // xmax is zero only for a freshly inserted row version.
        let (voter_id, candidate_id, cast_at, inserted): (String, i32, DateTime<Utc>, bool) =
            sqlx::query_as(
                "INSERT INTO ballots (voter_id, candidate_id, cast_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (voter_id)
                 DO UPDATE SET candidate_id = EXCLUDED.candidate_id, cast_at = EXCLUDED.cast_at
                 RETURNING voter_id, candidate_id, cast_at, (xmax = 0) AS inserted",
            )
            .bind(voter_id)
            .bind(candidate_id)
            .bind(cast_at)
            .fetch_one(&self.db)
            .await?;

        let change = if inserted {
            BallotChange::Cast
        } else {
            BallotChange::Changed
        };
        Ok((
            Ballot {
                voter_id,
                candidate_id,
                cast_at,
            },
            change,
        ))
    }

    async fn find_ballot(&self, voter_id: &str) -> StoreResult<Option<Ballot>> {
        sqlx::query_as("SELECT voter_id, candidate_id, cast_at FROM ballots WHERE voter_id = $1")
            .bind(voter_id)
            .fetch_optional(&self.db)
            .await
    }

    async fn ballot_counts(&self) -> StoreResult<Vec<(i32, i64)>> {
        sqlx::query_as(
            "SELECT candidate_id, COUNT(*) FROM ballots
             GROUP BY candidate_id
             ORDER BY MIN(cast_at), candidate_id",
        )
        .fetch_all(&self.db)
        .await
    }

    async fn list_candidates(&self) -> StoreResult<Vec<Candidate>> {
        sqlx::query_as(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY id"
        ))
        .fetch_all(&self.db)
        .await
    }

    async fn get_candidate(&self, id: i32) -> StoreResult<Option<Candidate>> {
        sqlx::query_as(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
    }

    async fn candidate_email_taken(&self, email: &str, except: Option<i32>) -> StoreResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM candidates WHERE email = $1 AND id IS DISTINCT FROM $2)",
        )
        .bind(email)
        .bind(except)
        .fetch_one(&self.db)
        .await
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> StoreResult<Candidate> {
        sqlx::query_as(&format!(
            "INSERT INTO candidates
                (name, email, dob, gender, party_name, party_symbol, candidate_image)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {CANDIDATE_COLUMNS}"
        ))
        .bind(candidate.name)
        .bind(candidate.email)
        .bind(candidate.dob)
        .bind(candidate.gender)
        .bind(candidate.party_name)
        .bind(candidate.party_symbol)
        .bind(candidate.candidate_image)
        .fetch_one(&self.db)
        .await
    }

    async fn update_candidate(
        &self,
        id: i32,
        patch: CandidatePatch,
    ) -> StoreResult<Option<Candidate>> {
        sqlx::query_as(&format!(
            "UPDATE candidates SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                dob = COALESCE($4, dob),
                gender = COALESCE($5, gender),
                party_name = COALESCE($6, party_name),
                party_symbol = COALESCE($7, party_symbol),
                candidate_image = COALESCE($8, candidate_image)
             WHERE id = $1
             RETURNING {CANDIDATE_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.name)
        .bind(patch.email)
        .bind(patch.dob)
        .bind(patch.gender)
        .bind(patch.party_name)
        .bind(patch.party_symbol)
        .bind(patch.candidate_image)
        .fetch_optional(&self.db)
        .await
    }

    async fn delete_candidate(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM candidates WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_polls(&self) -> StoreResult<Vec<Poll>> {
        let rows: Vec<PollRow> = sqlx::query_as(
            "SELECT id, question, start_at, end_at, created_at FROM polls
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;

        let options: Vec<(i32, String, i64)> = sqlx::query_as(
            "SELECT poll_id, text, vote_count FROM poll_options ORDER BY poll_id, position",
        )
        .fetch_all(&self.db)
        .await?;

        let mut by_poll: HashMap<i32, Vec<PollOption>> = HashMap::new();
        for (poll_id, text, vote_count) in options {
            by_poll
                .entry(poll_id)
                .or_default()
                .push(PollOption { text, vote_count });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let options = by_poll.remove(&row.id).unwrap_or_default();
                row.into_poll(options)
            })
            .collect())
    }

    async fn get_poll(&self, id: i32) -> StoreResult<Option<Poll>> {
        let row: Option<PollRow> = sqlx::query_as(
            "SELECT id, question, start_at, end_at, created_at FROM polls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let options = self.options_for(row.id).await?;
                Ok(Some(row.into_poll(options)))
            }
        }
    }

    async fn insert_poll(&self, poll: NewPoll) -> StoreResult<Poll> {
        let mut tx = self.db.begin().await?;

        let row: PollRow = sqlx::query_as(
            "INSERT INTO polls (question, start_at, end_at) VALUES ($1, $2, $3)
             RETURNING id, question, start_at, end_at, created_at",
        )
        .bind(&poll.question)
        .bind(poll.start_at)
        .bind(poll.end_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut options = Vec::with_capacity(poll.options.len());
        for (position, text) in poll.options.into_iter().enumerate() {
            sqlx::query("INSERT INTO poll_options (poll_id, position, text) VALUES ($1, $2, $3)")
                .bind(row.id)
                .bind(position as i32)
                .bind(&text)
                .execute(&mut *tx)
                .await?;
            options.push(PollOption {
                text,
                vote_count: 0,
            });
        }

        tx.commit().await?;
        Ok(row.into_poll(options))
    }

    async fn delete_poll(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM polls WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn voted_poll_ids(&self, voter_id: &str) -> StoreResult<HashSet<i32>> {
        let ids: Vec<i32> = sqlx::query_scalar("SELECT poll_id FROM poll_voters WHERE voter_id = $1")
            .bind(voter_id)
            .fetch_all(&self.db)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn record_poll_vote(
        &self,
        poll_id: i32,
        voter_id: &str,
        option_index: usize,
    ) -> StoreResult<PollVoteRecord> {
        let Ok(position) = i32::try_from(option_index) else {
            return Ok(PollVoteRecord::UnknownOption);
        };

        let mut tx = self.db.begin().await?;

        // Holds off a concurrent delete until this vote commits.
        let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM polls WHERE id = $1 FOR SHARE")
            .bind(poll_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(PollVoteRecord::MissingPoll);
        }

        // A concurrent insert for the same voter blocks on the primary key
        // until the first transaction settles, then inserts nothing.
        let recorded = sqlx::query(
            "INSERT INTO poll_voters (poll_id, voter_id) VALUES ($1, $2)
             ON CONFLICT (poll_id, voter_id) DO NOTHING",
        )
        .bind(poll_id)
        .bind(voter_id)
        .execute(&mut *tx)
        .await?;
        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(PollVoteRecord::AlreadyVoted);
        }

        let bumped = sqlx::query(
            "UPDATE poll_options SET vote_count = vote_count + 1
             WHERE poll_id = $1 AND position = $2",
        )
        .bind(poll_id)
        .bind(position)
        .execute(&mut *tx)
        .await?;
        if bumped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(PollVoteRecord::UnknownOption);
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT text, vote_count FROM poll_options WHERE poll_id = $1 ORDER BY position",
        )
        .bind(poll_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PollVoteRecord::Recorded(
            rows.into_iter()
                .map(|(text, vote_count)| PollOption { text, vote_count })
                .collect(),
        ))
    }

    async fn list_feedback_questions(&self) -> StoreResult<Vec<FeedbackQuestion>> {
        sqlx::query_as("SELECT id, question, created_at FROM feedback_questions ORDER BY id")
            .fetch_all(&self.db)
            .await
    }

    async fn feedback_question_exists(&self, id: i32) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM feedback_questions WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.db)
            .await
    }

    async fn insert_feedback_question(&self, question: String) -> StoreResult<FeedbackQuestion> {
        sqlx::query_as(
            "INSERT INTO feedback_questions (question) VALUES ($1)
             RETURNING id, question, created_at",
        )
        .bind(question)
        .fetch_one(&self.db)
        .await
    }

    async fn delete_feedback_question(&self, id: i32) -> StoreResult<bool> {
        // Submissions go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM feedback_questions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<Feedback> {
        let is_anonymous = feedback.voter_id.is_none();
        sqlx::query_as(
            "WITH inserted AS (
                INSERT INTO feedback (question_id, voter_id, message, is_anonymous)
                VALUES ($1, $2, $3, $4)
                RETURNING id, question_id, voter_id, message, is_anonymous, created_at
             )
             SELECT i.id, i.question_id, q.question, i.message, i.is_anonymous,
                    i.voter_id, i.created_at
             FROM inserted i
             LEFT JOIN feedback_questions q ON q.id = i.question_id",
        )
        .bind(feedback.question_id)
        .bind(feedback.voter_id)
        .bind(feedback.message)
        .bind(is_anonymous)
        .fetch_one(&self.db)
        .await
    }

    async fn list_feedback(&self) -> StoreResult<Vec<Feedback>> {
        sqlx::query_as(
            "SELECT f.id, f.question_id, q.question, f.message, f.is_anonymous,
                    f.voter_id, f.created_at
             FROM feedback f
             LEFT JOIN feedback_questions q ON q.id = f.question_id
             ORDER BY f.created_at DESC, f.id DESC",
        )
        .fetch_all(&self.db)
        .await
    }

    async fn delete_feedback(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM feedback WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(
            "SELECT id, author_id, title, content, created_at FROM posts
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.db)
        .await?;

        let reactions: Vec<(i32, String, String)> = sqlx::query_as(
            "SELECT post_id, voter_id, kind FROM post_reactions ORDER BY reacted_at, voter_id",
        )
        .fetch_all(&self.db)
        .await?;

        let comments: Vec<Comment> = sqlx::query_as(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.db)
        .await?;

        let mut reactions_by_post: HashMap<i32, Vec<Reaction>> = HashMap::new();
        for (post_id, voter_id, kind) in reactions {
            reactions_by_post
                .entry(post_id)
                .or_default()
                .push(Reaction { voter_id, kind });
        }
        let mut comments_by_post: HashMap<i32, Vec<Comment>> = HashMap::new();
        for comment in comments {
            comments_by_post
                .entry(comment.post_id)
                .or_default()
                .push(comment);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let reactions = reactions_by_post.remove(&row.id).unwrap_or_default();
                let comments = comments_by_post.remove(&row.id).unwrap_or_default();
                row.into_post(reactions, comments)
            })
            .collect())
    }

    async fn get_post(&self, id: i32) -> StoreResult<Option<Post>> {
        let row: Option<PostRow> = sqlx::query_as(
            "SELECT id, author_id, title, content, created_at FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let reactions: Vec<Reaction> = sqlx::query_as(
            "SELECT voter_id, kind FROM post_reactions WHERE post_id = $1
             ORDER BY reacted_at, voter_id",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        let comments = self.list_comments(id).await?;

        Ok(Some(row.into_post(reactions, comments)))
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        let row: PostRow = sqlx::query_as(
            "INSERT INTO posts (author_id, title, content) VALUES ($1, $2, $3)
             RETURNING id, author_id, title, content, created_at",
        )
        .bind(post.author_id)
        .bind(post.title)
        .bind(post.content)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into_post(Vec::new(), Vec::new()))
    }

    async fn delete_post(&self, id: i32) -> StoreResult<bool> {
        // Comments and reactions go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_reaction(
        &self,
        post_id: i32,
        voter_id: &str,
        kind: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO post_reactions (post_id, voter_id, kind)
             SELECT id, $2, $3 FROM posts WHERE id = $1
             ON CONFLICT (post_id, voter_id) DO UPDATE SET kind = EXCLUDED.kind",
        )
        .bind(post_id)
        .bind(voter_id)
        .bind(kind)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<Option<Comment>> {
        sqlx::query_as(&format!(
            "INSERT INTO comments (post_id, author_id, content)
             SELECT id, $2, $3 FROM posts WHERE id = $1
             RETURNING {COMMENT_COLUMNS}"
        ))
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(comment.content)
        .fetch_optional(&self.db)
        .await
    }

    async fn list_comments(&self, post_id: i32) -> StoreResult<Vec<Comment>> {
        sqlx::query_as(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(post_id)
        .fetch_all(&self.db)
        .await
    }

    async fn get_comment(&self, id: i32) -> StoreResult<Option<Comment>> {
        sqlx::query_as(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
    }

    async fn delete_comment(&self, id: i32) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
