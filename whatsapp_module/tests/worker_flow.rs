mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use mockito::Matcher;
use serde_json::json;
use whatsapp_module::event_queue::MemoryEventQueue;
use whatsapp_module::transcribe::TranscriptionClient;
use whatsapp_module::worker::{ProcessError, Worker};

use test_support::*;

const SENDER: &str = "14155551234";

fn text_payload(message_id: &str, body: &str) -> String {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "1",
            "changes": [{
                "value": {
                    "contacts": [{"wa_id": SENDER}],
                    "messages": [{
                        "id": message_id,
                        "from": SENDER,
                        "type": "text",
                        "text": {"body": body}
                    }]
                },
                "field": "messages"
            }]
        }]
    })
    .to_string()
}

fn audio_payload(message_id: &str, media_id: &str) -> String {
    json!({
        "entry": [{
            "changes": [{
                "value": {
                    "contacts": [{"wa_id": SENDER}],
                    "messages": [{
                        "id": message_id,
                        "from": SENDER,
                        "type": "audio",
                        "audio": {"id": media_id, "mime_type": "audio/ogg"}
                    }]
                }
            }]
        }]
    })
    .to_string()
}

fn build_worker(server: &mockito::ServerGuard) -> Arc<Worker> {
    let config = test_config(&server.url(), &server.url());
    let transcriber = Arc::new(
        TranscriptionClient::from_config(&config).with_poll_interval(Duration::from_millis(10)),
    );
    Arc::new(Worker::new(
        config,
        Arc::new(MemoryEventQueue::new()),
        test_backend(server),
        test_sender(server),
        test_orchestrator(server),
        transcriber,
    ))
}

fn mock_idempotency(
    server: &mut mockito::ServerGuard,
    message_id: &str,
    exists: bool,
) -> mockito::Mock {
    server
        .mock("GET", format!("/internals/idempotency/{message_id}").as_str())
        .with_status(200)
        .with_body(json!({"exists": exists}).to_string())
        .create()
}

#[test]
fn unknown_sender_gets_registration_reply_without_llm() {
    let Some(mut server) =
        start_mockito_server("unknown_sender_gets_registration_reply_without_llm")
    else {
        return;
    };

    let _idempotency = mock_idempotency(&mut server, "wamid.a1", false);
    let _user_not_found = server
        .mock("GET", "/internals/user")
        .match_query(Matcher::UrlEncoded("phone".into(), SENDER.into()))
        .with_status(404)
        .create();
    // Both turns are persisted and tagged with the idempotency key.
    let store_in = server
        .mock("POST", "/internals/message")
        .match_body(Matcher::PartialJson(json!({
            "direction": "in",
            "message_text": "hi",
            "payload": {"whatsapp_id": "wamid.a1"},
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create();
    let store_out = server
        .mock("POST", "/internals/message")
        .match_body(Matcher::PartialJson(json!({
            "direction": "out",
            "payload": {"whatsapp_id": "wamid.a1"},
        })))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create();
    let reply_send = server
        .mock("POST", messages_path().as_str())
        .match_body(Matcher::PartialJson(json!({"to": SENDER})))
        .with_status(200)
        .with_body(json!({"messages": [{"id": "wamid.out1"}]}).to_string())
        .expect(1)
        .create();
    // The unknown sender must never reach the orchestrator.
    let llm = server.mock("POST", "/responses").expect(0).create();

    let worker = build_worker(&server);
    Worker::handle_event(&worker, &text_payload("wamid.a1", "hi")).expect("handled");

    store_in.assert();
    store_out.assert();
    reply_send.assert();
    llm.assert();
}

#[test]
fn duplicate_delivery_is_silently_absorbed() {
    let Some(mut server) = start_mockito_server("duplicate_delivery_is_silently_absorbed") else {
        return;
    };

    let _idempotency = mock_idempotency(&mut server, "wamid.dup", true);
    let user_lookup = server
        .mock("GET", "/internals/user")
        .match_query(Matcher::Any)
        .expect(0)
        .create();
    let store = server.mock("POST", "/internals/message").expect(0).create();

    let worker = build_worker(&server);
    Worker::handle_event(&worker, &text_payload("wamid.dup", "hello again"))
        .expect("duplicate is not an error");

    user_lookup.assert();
    store.assert();
}

#[test]
fn registered_text_flows_through_orchestrator() {
    let Some(mut server) = start_mockito_server("registered_text_flows_through_orchestrator")
    else {
        return;
    };

    let _idempotency = mock_idempotency(&mut server, "wamid.t1", false);
    let _user_by_phone = server
        .mock("GET", "/internals/user")
        .match_query(Matcher::UrlEncoded("phone".into(), SENDER.into()))
        .with_status(200)
        .with_body(
            json!({"id": 7, "org_id": 2, "name": "Asha", "phone": SENDER, "department": "Design"})
                .to_string(),
        )
        .create();
    let _user_with_role = server
        .mock("GET", "/internals/user")
        .match_query(Matcher::UrlEncoded("user_id".into(), "7".into()))
        .with_status(200)
        .with_body(
            json!({
                "id": 7, "org_id": 2, "name": "Asha", "phone": SENDER,
                "department": "Design", "role": "manager"
            })
            .to_string(),
        )
        .create();
    let _history = server
        .mock("GET", "/internals/history/7")
        .match_query(Matcher::UrlEncoded("limit".into(), "15".into()))
        .with_status(200)
        .with_body("[]")
        .create();
    let llm = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(
            json!({
                "output": [
                    {"type": "message", "content": [{"type": "output_text", "text": "Done."}]}
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create();
    let store = server
        .mock("POST", "/internals/message")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create();
    let reply_send = server
        .mock("POST", messages_path().as_str())
        .match_body(Matcher::PartialJson(json!({"text": {"body": "Done."}})))
        .with_status(200)
        .with_body(json!({"messages": [{"id": "wamid.out2"}]}).to_string())
        .expect(1)
        .create();

    let worker = build_worker(&server);
    Worker::handle_event(&worker, &text_payload("wamid.t1", "create a task for the audit"))
        .expect("handled");

    llm.assert();
    store.assert();
    reply_send.assert();
}

#[test]
fn backend_outage_is_a_transient_failure() {
    let Some(mut server) = start_mockito_server("backend_outage_is_a_transient_failure") else {
        return;
    };

    let _idempotency_down = server
        .mock("GET", "/internals/idempotency/wamid.down")
        .with_status(500)
        .create();

    let worker = build_worker(&server);
    let err = Worker::handle_event(&worker, &text_payload("wamid.down", "hi"))
        .expect_err("backend outage must not ack");
    assert!(matches!(err, ProcessError::Transient(_)));
}

#[test]
fn status_envelopes_and_unsupported_types_are_noops() {
    let Some(mut server) =
        start_mockito_server("status_envelopes_and_unsupported_types_are_noops")
    else {
        return;
    };

    let status_payload = json!({
        "entry": [{
            "changes": [{
                "value": {"statuses": [{"id": "wamid.s1", "status": "delivered"}]}
            }]
        }]
    })
    .to_string();

    let sticker_payload = json!({
        "entry": [{
            "changes": [{
                "value": {
                    "messages": [{"id": "wamid.st1", "from": SENDER, "type": "sticker"}]
                }
            }]
        }]
    })
    .to_string();

    let _idempotency = mock_idempotency(&mut server, "wamid.st1", false);
    let store = server.mock("POST", "/internals/message").expect(0).create();

    let worker = build_worker(&server);
    Worker::handle_event(&worker, &status_payload).expect("status is a no-op");
    Worker::handle_event(&worker, &sticker_payload).expect("unsupported is a no-op");

    store.assert();
}

#[test]
fn malformed_payload_is_permanent() {
    let Some(server) = start_mockito_server("malformed_payload_is_permanent") else {
        return;
    };

    let worker = build_worker(&server);
    let err = Worker::handle_event(&worker, "{not json").expect_err("must fail");
    assert!(matches!(err, ProcessError::Permanent(_)));
}

#[test]
fn audio_message_is_processed_in_background() {
    let Some(mut server) = start_mockito_server("audio_message_is_processed_in_background") else {
        return;
    };

    let _idempotency = mock_idempotency(&mut server, "wamid.v1", false);
    let courtesy = server
        .mock("POST", messages_path().as_str())
        .match_body(Matcher::PartialJson(
            json!({"text": {"body": "🎧 Processing your voice note…"}}),
        ))
        .with_status(200)
        .with_body(json!({"messages": [{"id": "wamid.c1"}]}).to_string())
        .expect(1)
        .create();
    // Two-step media download.
    let _media_metadata = server
        .mock("GET", format!("/{TEST_API_VERSION}/media-77").as_str())
        .with_status(200)
        .with_body(json!({"url": format!("{}/media/blob-77", server.url())}).to_string())
        .create();
    let _media_blob = server
        .mock("GET", "/media/blob-77")
        .with_status(200)
        .with_body("ogg-bytes")
        .create();
    let _user = server
        .mock("GET", "/internals/user")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "id": 7, "org_id": 2, "name": "Asha", "phone": SENDER,
                "department": "Design", "role": "manager"
            })
            .to_string(),
        )
        .create();
    // Short clip: the realtime path answers directly.
    let _realtime = server
        .mock("POST", "/speech-to-text")
        .with_status(200)
        .with_body(json!({"transcript": "remind me to call the client"}).to_string())
        .create();
    let _history = server
        .mock("GET", "/internals/history/7")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .create();
    let _llm = server
        .mock("POST", "/responses")
        .with_status(200)
        .with_body(
            json!({
                "output": [
                    {"type": "message", "content": [{"type": "output_text", "text": "Noted."}]}
                ]
            })
            .to_string(),
        )
        .create();
    let store = server
        .mock("POST", "/internals/message")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create();
    let reply_send = server
        .mock("POST", messages_path().as_str())
        .match_body(Matcher::PartialJson(json!({"text": {"body": "Noted."}})))
        .with_status(200)
        .with_body(json!({"messages": [{"id": "wamid.out3"}]}).to_string())
        .expect(1)
        .create();

    let worker = build_worker(&server);
    // The consumer-loop call returns as soon as the dispatch happened.
    Worker::handle_event(&worker, &audio_payload("wamid.v1", "media-77")).expect("dispatched");
    courtesy.assert();

    // The rest of the pipeline runs on the background thread.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !reply_send.matched() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
    store.assert();
    reply_send.assert();
}
