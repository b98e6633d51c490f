use std::collections::HashMap;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::{Value, json};
use vetchat::session::{AuthError, FirebaseConfig, FirebaseIdentity, Session};

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{address}")
}

async fn sign_in(Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>) -> Response {
    if query.get("key").map(String::as_str) != Some("test-key") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "API_KEY_INVALID"}})),
        )
            .into_response();
    }
    if body["password"] != "hunter2" || body["returnSecureToken"] != true {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "INVALID_PASSWORD"}})),
        )
            .into_response();
    }

    Json(json!({
        "idToken": "id-1",
        "refreshToken": "refresh-1",
        "localId": "uid-7",
        "email": body["email"],
        "expiresIn": "3600"
    }))
    .into_response()
}

async fn refresh(Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("grant_type").map(String::as_str) != Some("refresh_token")
        || form.get("refresh_token").map(String::as_str) != Some("refresh-1")
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": 400, "message": "INVALID_REFRESH_TOKEN"}})),
        )
            .into_response();
    }

    Json(json!({
        "id_token": "id-2",
        "refresh_token": "refresh-2",
        "user_id": "uid-7",
        "expires_in": "3600"
    }))
    .into_response()
}

async fn identity_server() -> FirebaseIdentity {
    let base = serve(
        Router::new()
            .route("/v1/accounts:signInWithPassword", post(sign_in))
            .route("/v1/token", post(refresh)),
    )
    .await;

    let mut config = FirebaseConfig::new("test-key");
    config.identity_endpoint = base.clone();
    config.token_endpoint = base;
    FirebaseIdentity::new(config).unwrap()
}

#[tokio::test]
async fn sign_in_then_refresh_updates_the_session() {
    let provider = identity_server().await;
    let session = Session::new();

    let identity = session
        .sign_in(&provider, "maria@clinic.test", "hunter2")
        .await
        .unwrap();
    assert_eq!(identity.user_id, "uid-7");
    assert_eq!(identity.email, "maria@clinic.test");
    assert_eq!(session.credential().as_deref(), Some("id-1"));

    session.refresh(&provider).await.unwrap();
    assert_eq!(session.credential().as_deref(), Some("id-2"));
    assert_eq!(session.email().as_deref(), Some("maria@clinic.test"));
}

#[tokio::test]
async fn provider_error_code_is_surfaced() {
    let provider = identity_server().await;
    let session = Session::new();

    let error = session
        .sign_in(&provider, "maria@clinic.test", "wrong")
        .await
        .unwrap_err();

    match error {
        AuthError::Rejected {
            status, message, ..
        } => {
            assert_eq!(status, 400);
            assert_eq!(message, "INVALID_PASSWORD");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn unknown_route_is_rejected_with_raw_body() {
    let provider = identity_server().await;

    let error = Session::new()
        .sign_up(&provider, "new@clinic.test", "hunter2")
        .await
        .unwrap_err();

    assert!(matches!(error, AuthError::Rejected { status: 404, .. }));
}
