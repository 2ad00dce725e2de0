use tracing::info;

use crate::{
    error::VoteError,
    models::{Comment, NewComment, NewPost, Post, PostRequest},
    store::Store,
};

const MAX_REACTION_LEN: usize = 32;

fn required(field: &str, value: &str) -> Result<String, VoteError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(VoteError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

pub async fn create_post(
    store: &dyn Store,
    author_id: &str,
    req: PostRequest,
) -> Result<Post, VoteError> {
    let post = NewPost {
        author_id: author_id.to_string(),
        title: required("Title", &req.title)?,
        content: required("Content", &req.content)?,
    };
    let post = store.insert_post(post).await?;
    info!("Post {} created by {}", post.id, author_id);
    Ok(post)
}

/// Only the author may delete a post; its comments go with it.
pub async fn delete_post(store: &dyn Store, id: i32, requester: &str) -> Result<(), VoteError> {
    let post = store.get_post(id).await?.ok_or(VoteError::NotFound("Post"))?;
    if post.author_id != requester {
        return Err(VoteError::NotOwner("post"));
    }
    if !store.delete_post(id).await? {
        return Err(VoteError::NotFound("Post"));
    }
    info!("Post {} deleted by its author", id);
    Ok(())
}

/// Set the voter's reaction, replacing an earlier one, and return the post.
pub async fn react(
    store: &dyn Store,
    post_id: i32,
    voter_id: &str,
    kind: &str,
) -> Result<Post, VoteError> {
    let kind = required("Reaction type", kind)?;
    if kind.chars().count() > MAX_REACTION_LEN {
        return Err(VoteError::validation(format!(
            "Reaction type must be at most {MAX_REACTION_LEN} characters"
        )));
    }
    if !store.upsert_reaction(post_id, voter_id, &kind).await? {
        return Err(VoteError::NotFound("Post"));
    }
    store.get_post(post_id).await?.ok_or(VoteError::NotFound("Post"))
}

pub async fn add_comment(
    store: &dyn Store,
    post_id: i32,
    author_id: &str,
    content: &str,
) -> Result<Comment, VoteError> {
    let comment = NewComment {
        post_id,
        author_id: author_id.to_string(),
        content: required("Content", content)?,
    };
    store
        .insert_comment(comment)
        .await?
        .ok_or(VoteError::NotFound("Post"))
}

pub async fn comments(store: &dyn Store, post_id: i32) -> Result<Vec<Comment>, VoteError> {
    if store.get_post(post_id).await?.is_none() {
        return Err(VoteError::NotFound("Post"));
    }
    Ok(store.list_comments(post_id).await?)
}

pub async fn delete_comment(store: &dyn Store, id: i32, requester: &str) -> Result<(), VoteError> {
    let comment = store
        .get_comment(id)
        .await?
        .ok_or(VoteError::NotFound("Comment"))?;
    if comment.author_id != requester {
        return Err(VoteError::NotOwner("comment"));
    }
    if !store.delete_comment(id).await? {
        return Err(VoteError::NotFound("Comment"));
    }
    Ok(())
}
