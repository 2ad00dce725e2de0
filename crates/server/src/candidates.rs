use tracing::info;

use crate::{
    error::VoteError,
    models::{Candidate, CandidatePatch, NewCandidate},
    store::Store,
};

const GENDERS: [&str; 3] = ["male", "female", "others"];

fn required(field: &str, value: &str) -> Result<String, VoteError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(VoteError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn gender(value: &str) -> Result<String, VoteError> {
    let value = required("gender", value)?.to_lowercase();
    if !GENDERS.contains(&value.as_str()) {
        return Err(VoteError::validation(format!(
            "gender must be one of {}",
            GENDERS.join(", ")
        )));
    }
    Ok(value)
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// A concurrent add can slip past the email check; the unique index still
/// catches it.
fn duplicate_email(err: sqlx::Error) -> VoteError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return VoteError::validation("Candidate already exists");
        }
    }
    VoteError::Storage(err)
}

pub async fn add_candidate(store: &dyn Store, req: NewCandidate) -> Result<Candidate, VoteError> {
    let candidate = NewCandidate {
        name: required("name", &req.name)?,
        email: required("email", &req.email)?.to_lowercase(),
        dob: required("dob", &req.dob)?,
        gender: gender(&req.gender)?,
        party_name: required("partyName", &req.party_name)?,
        party_symbol: optional(req.party_symbol),
        candidate_image: optional(req.candidate_image),
    };

    if store.candidate_email_taken(&candidate.email, None).await? {
        return Err(VoteError::validation("Candidate already exists"));
    }

    let candidate = store
        .insert_candidate(candidate)
        .await
        .map_err(duplicate_email)?;
    info!("Added candidate {} ({})", candidate.id, candidate.name);
    Ok(candidate)
}

pub async fn update_candidate(
    store: &dyn Store,
    id: i32,
    patch: CandidatePatch,
) -> Result<Candidate, VoteError> {
    let patch = CandidatePatch {
        name: patch.name.as_deref().map(|v| required("name", v)).transpose()?,
        email: patch
            .email
            .as_deref()
            .map(|v| required("email", v).map(|e| e.to_lowercase()))
            .transpose()?,
        dob: patch.dob.as_deref().map(|v| required("dob", v)).transpose()?,
        gender: patch.gender.as_deref().map(gender).transpose()?,
        party_name: patch
            .party_name
            .as_deref()
            .map(|v| required("partyName", v))
            .transpose()?,
        party_symbol: optional(patch.party_symbol),
        candidate_image: optional(patch.candidate_image),
    };

    if let Some(email) = &patch.email {
        if store.candidate_email_taken(email, Some(id)).await? {
            return Err(VoteError::validation("Candidate already exists"));
        }
    }

    store
        .update_candidate(id, patch)
        .await
        .map_err(duplicate_email)?
        .ok_or(VoteError::NotFound("Candidate"))
}

/// Ballots cast for the candidate stay in place and drop out of the tally.
pub async fn delete_candidate(store: &dyn Store, id: i32) -> Result<(), VoteError> {
    if !store.delete_candidate(id).await? {
        return Err(VoteError::NotFound("Candidate"));
    }
    info!("Deleted candidate {}", id);
    Ok(())
}

pub async fn get_candidate(store: &dyn Store, id: i32) -> Result<Candidate, VoteError> {
    store
        .get_candidate(id)
        .await?
        .ok_or(VoteError::NotFound("Candidate"))
}
