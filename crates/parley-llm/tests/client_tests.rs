// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use parley_app::Role;
use parley_llm::{ApiKeyHandle, ChatMessage, Client, CompletionApi};
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};

fn json_response(body: &str, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(
            Header::from_bytes("Content-Type", "application/json")
                .expect("valid content type header"),
        )
}

fn header_value(request: &tiny_http::Request, field: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|header| header.field.as_str().as_str().eq_ignore_ascii_case(field))
        .map(|header| header.value.as_str().to_owned())
}

#[test]
fn list_models_sends_bearer_auth_and_parses_catalog() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/v1", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        assert_eq!(request.url(), "/v1/models");
        assert_eq!(
            header_value(&request, "Authorization").as_deref(),
            Some("Bearer sk-or-test")
        );
        assert_eq!(header_value(&request, "X-Title").as_deref(), Some("parley"));

        let body = r#"{"data":[{"id":"m1"},{"id":"m2","name":"Model Two","top_provider":{"context_length":4096}}]}"#;
        request
            .respond(json_response(body, 200))
            .expect("response should succeed");
    });

    let keys = ApiKeyHandle::new("sk-or-test");
    let client = Client::new(&addr, Duration::from_secs(1), keys.provider())?;
    let models = client.list_models()?;

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].id, "m1");
    assert_eq!(models[0].name, "m1");
    assert_eq!(models[1].name, "Model Two");
    assert_eq!(models[1].context_length, Some(4096));

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn missing_key_omits_authorization_header() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/v1", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        assert_eq!(header_value(&request, "Authorization"), None);
        request
            .respond(json_response(r#"{"data":[]}"#, 200))
            .expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1), Arc::new(|| None))?;
    let models = client.list_models()?;
    assert!(models.is_empty());

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn http_failure_surfaces_server_message() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/v1", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        request
            .respond(json_response(
                r#"{"error":{"message":"No auth credentials found"}}"#,
                401,
            ))
            .expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1), Arc::new(|| None))?;
    let error = client
        .list_models()
        .expect_err("401 should surface as an error");
    let message = error.to_string();
    assert!(message.contains("401"));
    assert!(message.contains("No auth credentials found"));

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn chat_completion_posts_ordered_messages_and_reads_first_choice() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/v1", server.server_addr());

    let handle = thread::spawn(move || {
        let mut request = server.recv().expect("request expected");
        assert_eq!(request.url(), "/v1/chat/completions");

        let mut body = String::new();
        request
            .as_reader()
            .read_to_string(&mut body)
            .expect("request body should read");
        let payload: serde_json::Value = serde_json::from_str(&body).expect("body should be JSON");
        assert_eq!(payload["model"], "m1");
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "hi");
        assert_eq!(payload["messages"][1]["role"], "assistant");
        assert!(payload.get("temperature").is_none());

        let reply = r#"{"choices":[{"message":{"content":"hello"}},{"message":{"content":"ignored"}}]}"#;
        request
            .respond(json_response(reply, 200))
            .expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1), Arc::new(|| None))?;
    let content = client.chat_completion(
        "m1",
        &[
            ChatMessage::new(Role::User, "hi"),
            ChatMessage::new(Role::Assistant, "earlier reply"),
        ],
        None,
    )?;
    assert_eq!(content, "hello");

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn chat_completion_with_zero_choices_is_empty_success() -> Result<()> {
    let server =
        Server::http("127.0.0.1:0").map_err(|error| anyhow!("start mock server: {error}"))?;
    let addr = format!("http://{}/v1", server.server_addr());

    let handle = thread::spawn(move || {
        let request = server.recv().expect("request expected");
        request
            .respond(json_response(r#"{"choices":[]}"#, 200))
            .expect("response should succeed");
    });

    let client = Client::new(&addr, Duration::from_secs(1), Arc::new(|| None))?;
    let content =
        client.chat_completion("m1", &[ChatMessage::new(Role::User, "anyone?")], None)?;
    assert_eq!(content, "");

    handle.join().expect("server thread should join");
    Ok(())
}

#[test]
fn unreachable_endpoint_reports_base_url() {
    let client = Client::new(
        "http://127.0.0.1:1/v1",
        Duration::from_millis(50),
        Arc::new(|| None),
    )
    .expect("client should initialize");

    let error = client
        .list_models()
        .expect_err("list should fail for unreachable endpoint");
    assert!(error.to_string().contains("127.0.0.1:1"));
}
