use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::Utc;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    AppState,
    auth::{verify_admin, verify_voter},
    ballots, candidates,
    error::AppError,
    extract::ApiJson,
    feed, feedback,
    models::{
        BallotView, Candidate, CandidatePatch, Comment, CommentRequest, CreatePollRequest,
        Feedback, FeedbackQuestion, FeedbackRequest, NewCandidate, PollOption, PollView,
        PollVoteRequest, Post, PostRequest, PublicStatus, QuestionRequest, ReactionRequest,
        ScheduleRequest, TallyEntry, VoteReceipt, VoteRequest, WindowView,
    },
    polls, publication,
};

pub fn build_router(state: AppState) -> Router {
    let cors = match state.config.cors_origin.as_deref().map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::permissive().allow_origin(origin),
        Some(Err(_)) => {
            tracing::warn!("CORS_ORIGIN is not a valid header value, allowing any origin");
            CorsLayer::permissive()
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        // election
        .route("/election/status", get(election_status))
        .route("/election/vote", post(cast_vote))
        .route("/election/my-vote", get(my_vote))
        .route("/election/results", get(results))
        .route("/admin/election", get(get_window).put(set_window))
        // candidates
        .route("/candidates", get(list_candidates))
        .route("/candidates/:id", get(get_candidate))
        .route("/admin/candidates", post(add_candidate))
        .route(
            "/admin/candidates/:id",
            put(update_candidate).delete(delete_candidate),
        )
        // polls
        .route("/polls", get(voter_polls))
        .route("/polls/public", get(public_polls))
        .route("/polls/:id/vote", post(vote_poll))
        .route("/admin/polls", get(admin_polls).post(create_poll))
        .route("/admin/polls/:id", delete(delete_poll))
        // feedback
        .route("/feedback/questions", get(feedback_questions))
        .route("/feedback", post(submit_feedback))
        .route("/feedback/anonymous", post(submit_anonymous_feedback))
        .route("/admin/feedback", get(all_feedback))
        .route("/admin/feedback/:id", delete(delete_feedback))
        .route("/admin/feedback/questions", post(create_feedback_question))
        .route(
            "/admin/feedback/questions/:id",
            delete(delete_feedback_question),
        )
        // feed
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/:id", delete(delete_post))
        .route("/posts/:id/reaction", post(react))
        .route("/posts/:id/comments", get(post_comments).post(add_comment))
        .route("/comments/:id", delete(delete_comment))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

// ===== Service =====

async fn root() -> &'static str {
    "Polling station backend - use /health to check status"
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.store.backend_tag();
    match state.store.ping().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": backend })),
        ),
        Err(err) => {
            tracing::error!("Health check failed: {:?}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "store": backend })),
            )
        }
    }
}

// ===== Election =====

async fn election_status(State(state): State<AppState>) -> Result<Json<PublicStatus>, AppError> {
    Ok(Json(
        publication::public_status(state.store.as_ref(), Utc::now()).await?,
    ))
}

async fn cast_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<VoteRequest>,
) -> Result<Json<VoteReceipt>, AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    let receipt =
        ballots::cast_or_change_ballot(state.store.as_ref(), &voter_id, req.candidate_id, Utc::now())
            .await?;
    Ok(Json(receipt))
}

async fn my_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BallotView>, AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    Ok(Json(
        ballots::user_ballot_view(state.store.as_ref(), &voter_id).await?,
    ))
}

async fn results(State(state): State<AppState>) -> Result<Json<Vec<TallyEntry>>, AppError> {
    Ok(Json(
        publication::published_results(state.store.as_ref(), Utc::now()).await?,
    ))
}

async fn get_window(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Option<WindowView>>, AppError> {
    verify_admin(&state, &headers).await?;
    Ok(Json(
        publication::current_window(state.store.as_ref(), Utc::now()).await?,
    ))
}

async fn set_window(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<ScheduleRequest>,
) -> Result<Json<WindowView>, AppError> {
    let admin = verify_admin(&state, &headers).await?;
    let view = publication::set_schedule(
        state.store.as_ref(),
        req.start_at.as_deref(),
        req.end_at.as_deref(),
        req.is_published,
        Utc::now(),
    )
    .await?;
    tracing::info!("Election schedule updated by {}", admin);
    Ok(Json(view))
}

// ===== Candidates =====

async fn list_candidates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Candidate>>, AppError> {
    verify_voter(&state, &headers).await?;
    Ok(Json(state.store.list_candidates().await?))
}

async fn get_candidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<Json<Candidate>, AppError> {
    verify_voter(&state, &headers).await?;
    Ok(Json(candidates::get_candidate(state.store.as_ref(), id).await?))
}

async fn add_candidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<NewCandidate>,
) -> Result<(StatusCode, Json<Candidate>), AppError> {
    verify_admin(&state, &headers).await?;
    let candidate = candidates::add_candidate(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

async fn update_candidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    ApiJson(patch): ApiJson<CandidatePatch>,
) -> Result<Json<Candidate>, AppError> {
    verify_admin(&state, &headers).await?;
    Ok(Json(
        candidates::update_candidate(state.store.as_ref(), id, patch).await?,
    ))
}

async fn delete_candidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    verify_admin(&state, &headers).await?;
    candidates::delete_candidate(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ===== Polls =====

async fn voter_polls(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PollView>>, AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    Ok(Json(
        polls::list_polls_for_voter(state.store.as_ref(), &voter_id, Utc::now()).await?,
    ))
}

async fn public_polls(State(state): State<AppState>) -> Result<Json<Vec<PollView>>, AppError> {
    Ok(Json(
        polls::list_polls(state.store.as_ref(), Utc::now()).await?,
    ))
}

async fn vote_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    ApiJson(req): ApiJson<PollVoteRequest>,
) -> Result<Json<Vec<PollOption>>, AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    let options = ballots::cast_poll_vote(
        state.store.as_ref(),
        id,
        &voter_id,
        req.option_index,
        Utc::now(),
    )
    .await?;
    Ok(Json(options))
}

async fn admin_polls(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PollView>>, AppError> {
    verify_admin(&state, &headers).await?;
    Ok(Json(
        polls::list_polls(state.store.as_ref(), Utc::now()).await?,
    ))
}

async fn create_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), AppError> {
    verify_admin(&state, &headers).await?;
    let poll = polls::create_poll(state.store.as_ref(), req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

async fn delete_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    verify_admin(&state, &headers).await?;
    polls::delete_poll(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ===== Feedback =====

async fn feedback_questions(
    State(state): State<AppState>,
) -> Result<Json<Vec<FeedbackQuestion>>, AppError> {
    Ok(Json(state.store.list_feedback_questions().await?))
}

async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    let entry = feedback::submit(state.store.as_ref(), req, Some(voter_id)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn submit_anonymous_feedback(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    let entry = feedback::submit(state.store.as_ref(), req, None).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn all_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Feedback>>, AppError> {
    verify_admin(&state, &headers).await?;
    Ok(Json(state.store.list_feedback().await?))
}

async fn delete_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    verify_admin(&state, &headers).await?;
    feedback::delete(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_feedback_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<QuestionRequest>,
) -> Result<(StatusCode, Json<FeedbackQuestion>), AppError> {
    verify_admin(&state, &headers).await?;
    let question = feedback::create_question(state.store.as_ref(), &req.question).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

async fn delete_feedback_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    verify_admin(&state, &headers).await?;
    feedback::delete_question(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ===== Feed =====

async fn list_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, AppError> {
    Ok(Json(state.store.list_posts().await?))
}

async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<PostRequest>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let author = verify_voter(&state, &headers).await?;
    let post = feed::create_post(state.store.as_ref(), &author, req).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let requester = verify_voter(&state, &headers).await?;
    feed::delete_post(state.store.as_ref(), id, &requester).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn react(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> Result<Json<Post>, AppError> {
    let voter_id = verify_voter(&state, &headers).await?;
    Ok(Json(
        feed::react(state.store.as_ref(), id, &voter_id, &req.kind).await?,
    ))
}

async fn post_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Comment>>, AppError> {
    verify_voter(&state, &headers).await?;
    Ok(Json(feed::comments(state.store.as_ref(), id).await?))
}

async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
    ApiJson(req): ApiJson<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let author = verify_voter(&state, &headers).await?;
    let comment = feed::add_comment(state.store.as_ref(), id, &author, &req.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let requester = verify_voter(&state, &headers).await?;
    feed::delete_comment(state.store.as_ref(), id, &requester).await?;
    Ok(StatusCode::NO_CONTENT)
}
