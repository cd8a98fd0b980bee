//! HTTP-level tests for the completion client, against a wiremock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcbridge_llm::client::{AiClient, AiProvider, Responder};
use mcbridge_llm::error::LlmError;
use mcbridge_llm::types::{ChatTurn, TurnRole};

fn client_for(server: &MockServer, timeout: Duration) -> AiClient {
    AiClient::new(
        AiProvider::OpenAiCompatible {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
        },
        "test-model",
        timeout,
        256,
        0.7,
    )
}

#[tokio::test]
async fn successful_completion_returns_the_reply_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "test-model" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "role": "assistant", "content": "hello there" } } ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(2));
    let reply = client
        .complete(&[], "hello", "be helpful")
        .await
        .expect("completion succeeds");
    assert_eq!(reply, "hello there");
}

#[tokio::test]
async fn context_turns_are_sent_with_their_roles() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "sys" },
                { "role": "user", "content": "earlier" },
                { "role": "assistant", "content": "answer" },
                { "role": "user", "content": "now" },
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "content": "ok" } } ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let context = vec![
        ChatTurn::new(TurnRole::User, "earlier"),
        ChatTurn::new(TurnRole::Assistant, "answer"),
    ];
    let client = client_for(&server, Duration::from_secs(2));
    client
        .complete(&context, "now", "sys")
        .await
        .expect("completion succeeds");
}

#[tokio::test]
async fn http_error_surfaces_as_request_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(2));
    let err = client
        .complete(&[], "hello", "")
        .await
        .expect_err("must fail");
    assert!(matches!(err, LlmError::RequestFailed(_)));
}

#[tokio::test]
async fn slow_backend_surfaces_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({ "choices": [] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_millis(100));
    let err = client
        .complete(&[], "hello", "")
        .await
        .expect_err("must time out");
    assert!(matches!(err, LlmError::Timeout(_)));
}

#[tokio::test]
async fn malformed_body_surfaces_as_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .mount(&server)
        .await;

    let client = client_for(&server, Duration::from_secs(2));
    let err = client
        .complete(&[], "hello", "")
        .await
        .expect_err("must fail");
    assert!(matches!(err, LlmError::ParseError(_)));
}

#[tokio::test]
async fn disabled_client_is_unavailable() {
    let client = AiClient::disabled();
    assert!(!client.is_available());
    let err = client
        .complete(&[], "hello", "")
        .await
        .expect_err("must fail");
    assert!(matches!(err, LlmError::Unavailable(_)));
}
