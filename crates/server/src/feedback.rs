use tracing::info;

use crate::{
    error::VoteError,
    models::{Feedback, FeedbackQuestion, FeedbackRequest, NewFeedback},
    store::Store,
};

pub async fn create_question(
    store: &dyn Store,
    question: &str,
) -> Result<FeedbackQuestion, VoteError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(VoteError::validation("Question is required"));
    }
    let question = store.insert_feedback_question(question.to_string()).await?;
    info!("Added feedback question {}", question.id);
    Ok(question)
}

pub async fn delete_question(store: &dyn Store, id: i32) -> Result<(), VoteError> {
    if !store.delete_feedback_question(id).await? {
        return Err(VoteError::NotFound("Feedback question"));
    }
    info!("Deleted feedback question {} and its submissions", id);
    Ok(())
}

/// Store a submission. `voter_id` of `None` makes it anonymous; nothing
/// about the sender is kept in that case.
pub async fn submit(
    store: &dyn Store,
    req: FeedbackRequest,
    voter_id: Option<String>,
) -> Result<Feedback, VoteError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(VoteError::validation("Message is required"));
    }
    if !store.feedback_question_exists(req.question_id).await? {
        return Err(VoteError::NotFound("Feedback question"));
    }

    store
        .insert_feedback(NewFeedback {
            question_id: req.question_id,
            message: message.to_string(),
            voter_id,
        })
        .await
        .map_err(VoteError::from)
}

pub async fn delete(store: &dyn Store, id: i32) -> Result<(), VoteError> {
    if !store.delete_feedback(id).await? {
        return Err(VoteError::NotFound("Feedback"));
    }
    Ok(())
}
