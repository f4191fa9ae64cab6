mod test_support;

use std::time::Duration;

use serde_json::json;
use whatsapp_module::transcribe::{is_transcription_error, TranscriptionClient};

use test_support::start_mockito_server;

fn client_for(server: &mockito::ServerGuard) -> TranscriptionClient {
    TranscriptionClient::new(Some("speech-key".to_string()), &server.url())
        .with_poll_interval(Duration::from_millis(10))
}

#[test]
fn short_clip_uses_realtime_path() {
    let Some(mut server) = start_mockito_server("short_clip_uses_realtime_path") else {
        return;
    };

    let realtime = server
        .mock("POST", "/speech-to-text")
        .match_header("api-subscription-key", "speech-key")
        .with_status(200)
        .with_body(json!({"transcript": "hello there"}).to_string())
        .expect(1)
        .create();
    let batch_init = server
        .mock("POST", "/speech-to-text/job/init")
        .expect(0)
        .create();

    let transcript = client_for(&server).transcribe(b"short-ogg");
    assert_eq!(transcript, "hello there");
    realtime.assert();
    batch_init.assert();
}

#[test]
fn size_limit_error_falls_back_to_batch() {
    let Some(mut server) = start_mockito_server("size_limit_error_falls_back_to_batch") else {
        return;
    };

    // A 45-second clip: the realtime endpoint rejects it on size.
    let _realtime = server
        .mock("POST", "/speech-to-text")
        .with_status(413)
        .create();
    let init = server
        .mock("POST", "/speech-to-text/job/init")
        .with_status(200)
        .with_body(json!({"job_id": "job-1"}).to_string())
        .expect(1)
        .create();
    let upload = server
        .mock("POST", "/speech-to-text/job/job-1/upload")
        .with_status(200)
        .expect(1)
        .create();
    let start = server
        .mock("POST", "/speech-to-text/job/job-1/start")
        .with_status(200)
        .expect(1)
        .create();
    let _status = server
        .mock("GET", "/speech-to-text/job/job-1/status")
        .with_status(200)
        .with_body(json!({"job_state": "Completed"}).to_string())
        .create();
    let _results = server
        .mock("GET", "/speech-to-text/job/job-1/results")
        .with_status(200)
        .with_body(
            json!({
                "successful": [{"output_url": format!("{}/artifacts/job-1.json", server.url())}],
                "failed": []
            })
            .to_string(),
        )
        .create();
    let artifact = server
        .mock("GET", "/artifacts/job-1.json")
        .with_status(200)
        .with_body(json!({"transcript": "the long form transcript"}).to_string())
        .expect(1)
        .create();

    let transcript = client_for(&server).transcribe(b"a-long-voice-note");
    assert_eq!(transcript, "the long form transcript");
    init.assert();
    upload.assert();
    start.assert();
    artifact.assert();
}

#[test]
fn batch_output_accepts_alternate_field_name() {
    let Some(mut server) = start_mockito_server("batch_output_accepts_alternate_field_name")
    else {
        return;
    };

    let _realtime = server
        .mock("POST", "/speech-to-text")
        .with_status(400)
        .create();
    let _init = server
        .mock("POST", "/speech-to-text/job/init")
        .with_status(200)
        .with_body(json!({"job_id": "job-2"}).to_string())
        .create();
    let _upload = server
        .mock("POST", "/speech-to-text/job/job-2/upload")
        .with_status(200)
        .create();
    let _start = server
        .mock("POST", "/speech-to-text/job/job-2/start")
        .with_status(200)
        .create();
    let _status = server
        .mock("GET", "/speech-to-text/job/job-2/status")
        .with_status(200)
        .with_body(json!({"job_state": "Completed"}).to_string())
        .create();
    let _results = server
        .mock("GET", "/speech-to-text/job/job-2/results")
        .with_status(200)
        .with_body(
            json!({
                "successful": [{"output_url": format!("{}/artifacts/job-2.json", server.url())}],
                "failed": []
            })
            .to_string(),
        )
        .create();
    // Older artifact shape carries `text` instead of `transcript`.
    let _artifact = server
        .mock("GET", "/artifacts/job-2.json")
        .with_status(200)
        .with_body(json!({"text": "alternate field"}).to_string())
        .create();

    let transcript = client_for(&server).transcribe(b"another-long-clip");
    assert_eq!(transcript, "alternate field");
}

#[test]
fn batch_per_file_failure_yields_error_marker() {
    let Some(mut server) = start_mockito_server("batch_per_file_failure_yields_error_marker")
    else {
        return;
    };

    let _realtime = server
        .mock("POST", "/speech-to-text")
        .with_status(413)
        .create();
    let _init = server
        .mock("POST", "/speech-to-text/job/init")
        .with_status(200)
        .with_body(json!({"job_id": "job-3"}).to_string())
        .create();
    let _upload = server
        .mock("POST", "/speech-to-text/job/job-3/upload")
        .with_status(200)
        .create();
    let _start = server
        .mock("POST", "/speech-to-text/job/job-3/start")
        .with_status(200)
        .create();
    let _status = server
        .mock("GET", "/speech-to-text/job/job-3/status")
        .with_status(200)
        .with_body(json!({"job_state": "Completed"}).to_string())
        .create();
    let _results = server
        .mock("GET", "/speech-to-text/job/job-3/results")
        .with_status(200)
        .with_body(
            json!({
                "successful": [],
                "failed": [{"file_name": "input.ogg", "error_message": "unsupported codec"}]
            })
            .to_string(),
        )
        .create();

    let transcript = client_for(&server).transcribe(b"broken-clip");
    assert!(is_transcription_error(&transcript));
    assert!(transcript.contains("unsupported codec"));
}

#[test]
fn provider_outage_yields_error_marker() {
    let Some(mut server) = start_mockito_server("provider_outage_yields_error_marker") else {
        return;
    };

    let _realtime = server
        .mock("POST", "/speech-to-text")
        .with_status(503)
        .create();

    let transcript = client_for(&server).transcribe(b"clip");
    assert!(is_transcription_error(&transcript));
}
