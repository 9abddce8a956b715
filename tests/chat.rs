//! Chat flow and storage integration tests

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use talkback::stream::Role;
use talkback::{ChatFlow, ChatSettings, DbPool, KeyStore, SessionRepo, StreamClient, db};
use tempfile::TempDir;

mod common;

use common::{setup_test_db, spawn_server, sse_body, sse_response};

type Bodies = Arc<Mutex<Vec<serde_json::Value>>>;

async fn recording_server(reply: &'static [&'static str]) -> (String, Bodies) {
    let bodies: Bodies = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route(
            "/v1/messages",
            post(
                move |State(bodies): State<Bodies>, Json(body): Json<serde_json::Value>| async move {
                    bodies.lock().unwrap().push(body);
                    sse_response(sse_body(reply))
                },
            ),
        )
        .with_state(Arc::clone(&bodies));

    (spawn_server(app).await, bodies)
}

fn flow(pool: DbPool, base_url: &str, settings: ChatSettings) -> ChatFlow {
    let client = StreamClient::new(SecretString::from("sk-test")).with_base_url(base_url);
    ChatFlow::new(SessionRepo::new(pool), client, settings)
}

/// Drive the flow until the turn in flight is over
async fn settle(flow: &mut ChatFlow) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while flow.next_event().await.is_some() {}
    })
    .await
    .expect("turn did not finish");
}

// ── Storage ────────────────────────────────────────────────────────

#[test]
fn test_sessions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("talkback.db");

    let session_id = {
        let repo = SessionRepo::new(db::init(&path).unwrap());
        let session = repo.create("Morning plans").unwrap();
        repo.add_message(&session.id, Role::User, "What should I do today?")
            .unwrap();
        repo.add_message(&session.id, Role::Assistant, "Go for a walk.")
            .unwrap();
        session.id
    };

    let repo = SessionRepo::new(db::init(&path).unwrap());
    let loaded = repo.with_messages(&session_id).unwrap();
    assert_eq!(loaded.session.topic, "Morning plans");
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[0].role, Role::User);
    assert_eq!(loaded.messages[1].content, "Go for a walk.");
}

#[test]
fn test_api_key_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("talkback.db");

    KeyStore::new(db::init(&path).unwrap())
        .set("  sk-ant-stored  ")
        .unwrap();

    let keys = KeyStore::new(db::init(&path).unwrap());
    let key = keys.get().unwrap().unwrap();
    assert_eq!(key.expose_secret(), "sk-ant-stored");

    tokio_test::assert_ok!(keys.remove());
    assert!(keys.get().unwrap().is_none());
}

#[test]
fn test_deleting_session_removes_messages() {
    let repo = SessionRepo::new(setup_test_db());
    let session = repo.create("Short lived").unwrap();
    let message = repo.add_message(&session.id, Role::User, "hello").unwrap();

    repo.delete(&session.id).unwrap();
    assert!(repo.get(&session.id).unwrap().is_none());
    assert!(repo.get_message(&message.id).unwrap().is_none());
}

// ── Chat flow ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_turn_creates_session_and_persists_answer() {
    let (base_url, bodies) = recording_server(&["It is ", "sunny. ", "Enjoy!"]).await;
    let pool = setup_test_db();
    let mut flow = flow(pool.clone(), &base_url, ChatSettings::default());

    flow.send("What is the weather like in Paris today?").unwrap();
    assert!(flow.is_loading());
    settle(&mut flow).await;

    assert!(!flow.is_loading());
    assert!(flow.error().is_none());
    assert_eq!(flow.response_text(), "It is sunny. Enjoy!");

    let session = flow.session().unwrap().clone();
    assert_eq!(session.topic, "What is the weather like");

    let stored = SessionRepo::new(pool).messages(&session.id).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content, "What is the weather like in Paris today?");
    assert_eq!(stored[1].role, Role::Assistant);
    assert_eq!(stored[1].content, "It is sunny. Enjoy!");

    let body = bodies.lock().unwrap()[0].clone();
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_follow_up_sends_history_and_system_prompt() {
    let (base_url, bodies) = recording_server(&["Sure."]).await;
    let settings = ChatSettings {
        system_prompt: Some("Answer in one sentence.".into()),
        ..ChatSettings::default()
    };
    let mut flow = flow(setup_test_db(), &base_url, settings);

    flow.send("Hi").unwrap();
    settle(&mut flow).await;
    flow.send("Tell me more").unwrap();
    settle(&mut flow).await;

    assert_eq!(flow.history().len(), 4);

    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[1]["system"], "Answer in one sentence.");
    let roles: Vec<&str> = bodies[1]["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["user", "assistant", "user"]);
}

#[tokio::test]
async fn test_multi_line_answer_is_stored_verbatim() {
    let (base_url, bodies) =
        recording_server(&["Here is ", "a list:\n\n1", ". First.\n", "2. Sec", "ond."]).await;
    let pool = setup_test_db();
    let mut flow = flow(pool.clone(), &base_url, ChatSettings::default());

    flow.send("Give me a list").unwrap();
    settle(&mut flow).await;

    let expected = "Here is a list:\n\n1. First.\n2. Second.";
    assert_eq!(flow.response_text(), expected);
    let chunks: Vec<&str> = flow.response().iter().map(|c| c.text.as_str()).collect();
    assert_eq!(chunks, vec!["Here is a list:\n\n1.", "First.", "2.", "Second."]);

    let session_id = flow.session().unwrap().id.clone();
    let stored = SessionRepo::new(pool).messages(&session_id).unwrap();
    assert_eq!(stored[1].content, expected);

    // The next turn sends the answer back unchanged
    flow.send("Thanks").unwrap();
    settle(&mut flow).await;
    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies[1]["messages"][1]["content"], expected);
}

#[tokio::test]
async fn test_failed_turn_rolls_back_user_message() {
    let app = Router::new().route(
        "/v1/messages",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"type":"error","error":{"type":"api_error","message":"boom"}}"#,
            )
                .into_response()
        }),
    );
    let base_url = spawn_server(app).await;
    let pool = setup_test_db();
    let mut flow = flow(pool.clone(), &base_url, ChatSettings::default());

    flow.send("Hello?").unwrap();
    settle(&mut flow).await;

    assert!(flow.history().is_empty());
    assert!(flow.error().unwrap().contains("internal error"));

    let snapshot = flow.snapshot();
    assert!(!snapshot.is_loading);
    assert!(snapshot.chunks.is_empty());
    assert!(snapshot.error.is_some());

    let session_id = flow.session().unwrap().id.clone();
    assert!(SessionRepo::new(pool).messages(&session_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_load_restores_history() {
    let (base_url, _bodies) = recording_server(&["Noted."]).await;
    let pool = setup_test_db();

    let session_id = {
        let mut first = flow(pool.clone(), &base_url, ChatSettings::default());
        first.send("Remember the milk").unwrap();
        settle(&mut first).await;
        first.session().unwrap().id.clone()
    };

    let mut resumed = flow(pool, &base_url, ChatSettings::default());
    resumed.load(&session_id).unwrap();
    assert_eq!(resumed.history().len(), 2);
    assert_eq!(resumed.history()[1].content, "Noted.");

    tokio_test::assert_err!(resumed.load("missing"));
}

#[tokio::test]
async fn test_stop_keeps_partial_answer_unsaved() {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let rx = Arc::new(Mutex::new(Some(rx)));

    let app = Router::new().route(
        "/v1/messages",
        post(move || {
            let rx = rx.lock().unwrap().take();
            async move {
                match rx {
                    Some(rx) => common::channel_response(rx),
                    None => StatusCode::CONFLICT.into_response(),
                }
            }
        }),
    );
    let base_url = spawn_server(app).await;
    let pool = setup_test_db();
    let mut flow = flow(pool.clone(), &base_url, ChatSettings::default());

    flow.send("Tell me a story").unwrap();
    tx.send(common::delta_event("Once upon a time. ")).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), flow.next_event())
        .await
        .unwrap();
    assert!(first.is_some());
    assert_eq!(flow.response_text(), "Once upon a time.");

    flow.stop();
    assert!(!flow.is_loading());
    assert!(flow.next_event().await.is_none());
    assert_eq!(flow.response_text(), "Once upon a time.");

    let session_id = flow.session().unwrap().id.clone();
    let stored = SessionRepo::new(pool).messages(&session_id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
    drop(tx);
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let (base_url, bodies) = recording_server(&["unused"]).await;
    let mut flow = flow(setup_test_db(), &base_url, ChatSettings::default());

    assert!(matches!(
        flow.send(" \n "),
        Err(talkback::Error::InvalidInput(_))
    ));
    assert!(flow.session().is_none());
    assert!(bodies.lock().unwrap().is_empty());
}
