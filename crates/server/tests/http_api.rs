use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use polling_station::{AppState, Authenticator, Config, MemoryStore, build_router};
use reqwest::StatusCode;
use serde_json::{Value, json};

const ADMIN: &str = "admin-token";

/// Tokens are `<subject>-token`.
struct StaticTokens;

#[async_trait]
impl Authenticator for StaticTokens {
    async fn subject(&self, token: &str) -> Option<String> {
        token.strip_suffix("-token").map(str::to_string)
    }
}

struct TestServer {
    base: String,
    http: reqwest::Client,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = Config {
            admin_ids: vec!["admin".to_string()],
            ..Config::default()
        };
        let state = AppState::new(Arc::new(MemoryStore::new()), Arc::new(StaticTokens), config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, build_router(state))
                .await
                .expect("serve");
        });

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.expect("request");
        let status = resp.status();
        let text = resp.text().await.expect("body");
        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        (status, value)
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(reqwest::Method::GET, path, token, None).await
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, token, Some(body)).await
    }

    async fn put(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::PUT, path, token, Some(body)).await
    }

    async fn delete(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(reqwest::Method::DELETE, path, token, None).await
    }

    async fn add_candidate(&self, name: &str) -> i64 {
        let (status, body) = self
            .post(
                "/admin/candidates",
                Some(ADMIN),
                json!({
                    "name": name,
                    "email": format!("{}@example.org", name.to_lowercase()),
                    "dob": "1990-01-01",
                    "gender": "others",
                    "partyName": format!("{name} Party"),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().expect("candidate id")
    }

    async fn schedule(&self, start: Duration, end: Duration, publish: bool) -> Value {
        let now = Utc::now();
        let (status, body) = self
            .put(
                "/admin/election",
                Some(ADMIN),
                json!({
                    "startAt": (now + start).to_rfc3339(),
                    "endAt": (now + end).to_rfc3339(),
                    "isPublished": publish,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

#[tokio::test]
async fn health_and_access_control() {
    let server = TestServer::spawn().await;

    let (status, body) = server.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");

    let (status, body) = server
        .post("/election/vote", None, json!({ "candidateId": 1 }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = server.get("/admin/election", Some("v1-token")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = server.get("/admin/election", Some(ADMIN)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    let (status, body) = server.get("/election/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not-started");
}

#[tokio::test]
async fn election_vote_change_and_publication() {
    let server = TestServer::spawn().await;
    let ada = server.add_candidate("Ada").await;
    let bo = server.add_candidate("Bo").await;

    let (status, body) = server
        .post("/election/vote", Some("v1-token"), json!({ "candidateId": ada }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "configuration");

    // Publishing an open window is silently refused.
    let window = server
        .schedule(Duration::hours(-1), Duration::hours(1), true)
        .await;
    assert_eq!(window["status"], "active");
    assert_eq!(window["isPublished"], false);

    let (status, body) = server
        .post("/election/vote", Some("v1-token"), json!({ "candidateId": ada }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "cast");

    let (status, body) = server
        .post("/election/vote", Some("v1-token"), json!({ "candidateId": bo }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "changed");

    let (status, body) = server
        .post("/election/vote", Some("v2-token"), json!({ "candidateId": 4242 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_choice");

    let (_, body) = server.get("/election/my-vote", Some("v1-token")).await;
    assert_eq!(body["hasVoted"], true);
    assert_eq!(body["candidate"]["id"], bo);

    let (_, body) = server.get("/election/my-vote", Some("v2-token")).await;
    assert_eq!(body["hasVoted"], false);
    assert!(body["candidate"].is_null());

    let (status, body) = server.get("/election/results", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "not_available");

    server
        .schedule(Duration::hours(-2), Duration::hours(-1), true)
        .await;

    let (status, body) = server
        .post("/election/vote", Some("v2-token"), json!({ "candidateId": ada }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "window_closed");
    assert_eq!(body["message"], "Voting has ended");

    let (status, body) = server.get("/election/results", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let results = body.as_array().expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["candidateId"], bo);
    assert_eq!(results[0]["voteCount"], 1);
}

#[tokio::test]
async fn poll_lifecycle() {
    let server = TestServer::spawn().await;
    let now = Utc::now();

    let (status, body) = server
        .post(
            "/admin/polls",
            Some(ADMIN),
            json!({
                "question": "Park or library?",
                "options": ["Park", "Library", "  "],
                "startAt": (now - Duration::hours(1)).to_rfc3339(),
                "endAt": (now + Duration::hours(1)).to_rfc3339(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["status"], "active");
    assert_eq!(body["options"].as_array().map(Vec::len), Some(2));
    let id = body["id"].as_i64().expect("poll id");

    let (status, _) = server
        .post("/admin/polls", Some(ADMIN), json!({ "question": "Q", "options": ["one"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let vote = format!("/polls/{id}/vote");
    let (status, body) = server
        .post(&vote, Some("v1-token"), json!({ "optionIndex": 0 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body[0]["voteCount"], 1);

    let (status, body) = server
        .post(&vote, Some("v1-token"), json!({ "optionIndex": 1 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_voted");

    let (status, body) = server
        .post(&vote, Some("v2-token"), json!({ "optionIndex": 7 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_choice");

    let (_, body) = server.get("/polls", Some("v1-token")).await;
    assert_eq!(body[0]["hasVoted"], true);
    assert_eq!(body[0]["options"][1]["voteCount"], 0);
    assert!(body[0].get("voters").is_none());

    let (_, body) = server.get("/polls", Some("v2-token")).await;
    assert_eq!(body[0]["hasVoted"], false);

    let (status, body) = server.get("/polls/public", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body[0].get("hasVoted").is_none());

    let (status, _) = server.delete(&format!("/admin/polls/{id}"), Some(ADMIN)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = server
        .post(&vote, Some("v2-token"), json!({ "optionIndex": 0 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Poll not found");
}

#[tokio::test]
async fn simultaneous_poll_votes_from_one_voter() {
    let server = Arc::new(TestServer::spawn().await);
    let now = Utc::now();
    let (_, body) = server
        .post(
            "/admin/polls",
            Some(ADMIN),
            json!({
                "question": "Race?",
                "options": ["a", "b"],
                "startAt": (now - Duration::minutes(5)).to_rfc3339(),
                "endAt": (now + Duration::minutes(5)).to_rfc3339(),
            }),
        )
        .await;
    let id = body["id"].as_i64().expect("poll id");

    let mut handles = Vec::new();
    for i in 0..10 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            server
                .post(
                    &format!("/polls/{id}/vote"),
                    Some("racer-token"),
                    json!({ "optionIndex": i % 2 }),
                )
                .await
                .0
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.expect("join") {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 1);

    let (_, body) = server.get("/polls/public", None).await;
    let total: i64 = body[0]["options"]
        .as_array()
        .expect("options")
        .iter()
        .map(|o| o["voteCount"].as_i64().unwrap_or(0))
        .sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn feedback_round() {
    let server = TestServer::spawn().await;

    let (status, body) = server
        .post(
            "/admin/feedback/questions",
            Some(ADMIN),
            json!({ "question": "Was voting easy?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let question = body["id"].as_i64().expect("question id");

    let (status, _) = server
        .post(
            "/feedback/anonymous",
            None,
            json!({ "questionId": question, "message": "Yes" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = server
        .post(
            "/feedback",
            Some("v1-token"),
            json!({ "questionId": question, "message": "Mostly" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = server
        .post("/feedback", None, json!({ "questionId": question, "message": "x" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = server.get("/admin/feedback", Some(ADMIN)).await;
    let entries = body.as_array().expect("feedback list");
    assert_eq!(entries.len(), 2);
    let anonymous: Vec<&Value> = entries.iter().filter(|e| e["isAnonymous"] == true).collect();
    assert_eq!(anonymous.len(), 1);
    assert!(anonymous[0]["voterId"].is_null());
    assert_eq!(anonymous[0]["question"], "Was voting easy?");

    let (status, _) = server
        .delete(&format!("/admin/feedback/questions/{question}"), Some(ADMIN))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = server.get("/admin/feedback", Some(ADMIN)).await;
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let server = TestServer::spawn().await;
    let now = Utc::now();
    let (_, body) = server
        .post(
            "/admin/polls",
            Some(ADMIN),
            json!({
                "question": "Bus or tram?",
                "options": ["Bus", "Tram"],
                "startAt": (now - Duration::hours(1)).to_rfc3339(),
                "endAt": (now + Duration::hours(1)).to_rfc3339(),
            }),
        )
        .await;
    let vote = format!("/polls/{}/vote", body["id"].as_i64().expect("poll id"));

    let (status, body) = server.post(&vote, Some("v1-token"), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert!(body["message"].as_str().is_some_and(|m| m.contains("optionIndex")));

    let (status, body) = server
        .post(&vote, Some("v1-token"), json!({ "optionIndex": "zero" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = server
        .post("/feedback/anonymous", None, json!({ "message": "hello" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    // Nothing was counted along the way.
    let (_, body) = server.get("/polls/public", None).await;
    assert_eq!(body[0]["options"][0]["voteCount"], 0);
}

#[tokio::test]
async fn feed_round() {
    let server = TestServer::spawn().await;

    let (status, _) = server
        .post("/posts", None, json!({ "title": "Hi", "content": "there" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server
        .post(
            "/posts",
            Some("ann-token"),
            json!({ "title": "Polling hours", "content": "Open till eight?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["authorId"], "ann");
    let id = body["id"].as_i64().expect("post id");

    let react = format!("/posts/{id}/reaction");
    server
        .post(&react, Some("bob-token"), json!({ "type": "like" }))
        .await;
    let (status, body) = server
        .post(&react, Some("bob-token"), json!({ "type": "love" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reactions"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["reactions"][0]["type"], "love");

    let comments = format!("/posts/{id}/comments");
    let (status, body) = server
        .post(&comments, Some("bob-token"), json!({ "content": "Yes" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment = body["id"].as_i64().expect("comment id");

    let (_, body) = server.get("/posts", None).await;
    assert_eq!(body[0]["comments"][0]["content"], "Yes");

    let (status, body) = server
        .delete(&format!("/posts/{id}"), Some("bob-token"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Not authorized to delete this post");

    let (status, _) = server
        .delete(&format!("/comments/{comment}"), Some("ann-token"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server.delete(&format!("/posts/{id}"), Some("ann-token")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = server.get(&comments, Some("bob-token")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = server.get("/posts", None).await;
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}
