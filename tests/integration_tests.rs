use midjourney_rs::*;
use mockito::Matcher;
use serde_json::json;
use std::time::Duration;

fn config(url: &str) -> MjConfig {
    MjConfig::builder()
        .with_api_url(url)
        .with_api_key("test_key")
        .with_poll_interval(Duration::from_millis(10))
        .with_download(DownloadConfig {
            retries: 2,
            backoff_unit: Duration::ZERO,
            strategy_pause: Duration::ZERO,
            fallback_proxies: Vec::new(),
        })
        .build()
        .unwrap()
}

fn client(url: &str) -> MjClient {
    MjClient::with_proxy(config(url), None).unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    DecodedImage {
        width,
        height,
        channels: 3,
        pixels: vec![128; (width * height * 3) as usize],
    }
    .encode_png()
    .unwrap()
}

// --- Submission ---

#[tokio::test]
async fn test_submit_imagine_json_envelope() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/api/trigger/imagine")
        .match_header("authorization", "Bearer test_key")
        .match_header("content-type", "application/json; charset=utf-8")
        .match_body(Matcher::Json(json!({"prompt": "a cat", "picurl": ""})))
        .with_status(200)
        .with_body(json!({"code": 1, "result": "1712345"}).to_string())
        .create_async()
        .await;

    let task_id = client(&server.url()).submit_imagine("  a cat ").await.unwrap();
    assert_eq!(task_id, "1712345");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_submit_imagine_bare_text() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/api/trigger/imagine")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("  98765\n")
        .create_async()
        .await;

    let task_id = client(&server.url()).submit_imagine("a dog").await.unwrap();
    assert_eq!(task_id, "98765");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_submit_without_result_is_submission_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/api/trigger/imagine")
        .with_status(200)
        .with_body(json!({"code": 4, "description": "banned prompt"}).to_string())
        .create_async()
        .await;

    let result = client(&server.url()).submit_imagine("a dog").await;
    match result {
        Err(MjError::Submission {
            operation,
            cause: SubmissionCause::MissingResult(raw),
        }) => {
            assert_eq!(operation, "imagine");
            assert!(raw.contains("banned prompt"));
        }
        other => panic!("expected MissingResult, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_server_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/api/trigger/imagine")
        .with_status(500)
        .with_body("upstream down")
        .create_async()
        .await;

    let result = client(&server.url()).submit_imagine("a dog").await;
    assert!(matches!(
        result,
        Err(MjError::Submission {
            cause: SubmissionCause::Status { status: 500, .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_empty_prompt_never_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/api/trigger/imagine")
        .expect(0)
        .create_async()
        .await;

    let result = client(&server.url()).submit_imagine("   ").await;
    assert!(matches!(result, Err(MjError::InvalidInput(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_submit_upscale_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/api/trigger/upscale")
        .match_body(Matcher::Json(json!({
            "index": 1,
            "msg_id": "123",
            "msg_hash": "abc",
            "trigger_id": "t1"
        })))
        .with_body(json!({"result": 555}).to_string())
        .create_async()
        .await;

    let task_id = client(&server.url())
        .submit_upscale_or_vary("t1", "upscale||1||123||abc")
        .await
        .unwrap();
    assert_eq!(task_id, "555");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_custom_id_rejected() {
    let server = mockito::Server::new_async().await;
    let result = client(&server.url())
        .submit_upscale_or_vary("t1", "upscale||1||123")
        .await;
    assert!(matches!(result, Err(MjError::InvalidCustomId(_))));
}

#[tokio::test]
async fn test_submit_blend_payload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/mj/submit/blend")
        .match_body(Matcher::PartialJson(json!({
            "botType": "MID_JOURNEY",
            "dimensions": "PORTRAIT",
            "state": "s-1",
            "notifyHook": ""
        })))
        .with_body(json!({"result": "b1"}).to_string())
        .create_async()
        .await;

    let request = BlendRequest::new(vec![
        "data:image/png;base64,AAAA".into(),
        "data:image/png;base64,BBBB".into(),
    ])
    .dimensions(BlendDimensions::Portrait)
    .state("s-1");

    let task_id = client(&server.url()).submit_blend(&request).await.unwrap();
    assert_eq!(task_id, "b1");
    mock.assert_async().await;
}

// --- Polling ---

#[tokio::test]
async fn test_imagine_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let submit = server
        .mock("POST", "/v1/api/trigger/imagine")
        .with_body(json!({"result": "t1"}).to_string())
        .create_async()
        .await;
    let status = server
        .mock("GET", "/v1/api/trigger/task/t1")
        .match_header("authorization", "Bearer test_key")
        .with_body(
            json!({
                "status": "SUCCESS",
                "progress": "100%",
                "imageUrl": format!("{}/cdn/t1.png", url),
                "buttons": {
                    "msg_id": 1234567890123u64,
                    "msg_hash": "abc",
                    "U1": "upscale||1||1234567890123||abc"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let image = server
        .mock("GET", "/cdn/t1.png")
        .with_header("content-type", "image/png")
        .with_body(png(4, 2))
        .create_async()
        .await;

    let outcome = client(&url).imagine("a lighthouse").await.unwrap();

    assert_eq!(outcome.task_id, "t1");
    assert_eq!(outcome.task.status, TaskStatus::Success);
    assert_eq!(outcome.task.progress.as_deref(), Some("100%"));
    let decoded = outcome.image.unwrap();
    assert_eq!((decoded.width, decoded.height, decoded.channels), (4, 2, 3));
    assert_eq!(outcome.metadata.msg_id, 1234567890123);
    assert_eq!(outcome.metadata.msg_hash, "abc");
    assert!(outcome.metadata.custom_id_for(&Action::upscale(1)).is_some());

    submit.assert_async().await;
    status.assert_async().await;
    image.assert_async().await;
}

#[tokio::test]
async fn test_failed_task_reports_reason() {
    let mut server = mockito::Server::new_async().await;
    let _status = server
        .mock("GET", "/v1/api/trigger/task/t9")
        .with_body(json!({"status": "FAILURE", "failReason": "Job action restricted"}).to_string())
        .create_async()
        .await;

    match client(&server.url()).status("t9").await {
        Err(MjError::TaskFailed { task_id, reason }) => {
            assert_eq!(task_id, "t9");
            assert_eq!(reason, "Job action restricted");
        }
        other => panic!("expected TaskFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unparseable_status_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _status = server
        .mock("GET", "/v1/api/trigger/task/t2")
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    match client(&server.url()).status("t2").await {
        Err(MjError::Protocol { task_id, body, .. }) => {
            assert_eq!(task_id, "t2");
            assert!(body.contains("gateway"));
        }
        other => panic!("expected Protocol, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_http_error() {
    let mut server = mockito::Server::new_async().await;
    let _status = server
        .mock("GET", "/v1/api/trigger/task/missing")
        .with_status(404)
        .with_body("not found")
        .create_async()
        .await;

    assert!(matches!(
        client(&server.url()).status("missing").await,
        Err(MjError::Http { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_success_with_broken_image_is_download_exhausted() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    let _status = server
        .mock("GET", "/v1/api/trigger/task/t3")
        .with_body(json!({"status": "SUCCESS", "imageUrl": format!("{}/cdn/t3.png", url)}).to_string())
        .create_async()
        .await;
    // two standard attempts plus one fallback attempt
    let image = server
        .mock("GET", "/cdn/t3.png")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    match client(&url).status("t3").await {
        Err(MjError::DownloadExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, MjError::Http { status: 503, .. }));
        }
        other => panic!("expected DownloadExhausted, got {:?}", other),
    }
    image.assert_async().await;
}

// --- Download ---

#[tokio::test]
async fn test_download_sends_browser_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/cdn/a.png")
        .match_header("sec-fetch-dest", "image")
        .match_header("user-agent", Matcher::Regex("Mozilla/5.0".into()))
        .with_body(png(1, 1))
        .create_async()
        .await;

    let image = client(&server.url())
        .download(&format!("{}/cdn/a.png", server.url()))
        .await
        .unwrap();
    assert_eq!((image.width, image.height), (1, 1));
    mock.assert_async().await;
}

// --- Batch ---

#[tokio::test]
async fn test_batch_isolates_failed_action() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let _parent = server
        .mock("GET", "/v1/api/trigger/task/parent")
        .with_body(
            json!({
                "status": "SUCCESS",
                "buttons": {
                    "msg_id": 7,
                    "msg_hash": "h",
                    "U1": "upscale||1||7||h",
                    "U2": "upscale||2||7||h"
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _u1 = server
        .mock("POST", "/v1/api/trigger/upscale")
        .match_body(Matcher::PartialJson(json!({"index": 1, "trigger_id": "parent"})))
        .with_body(json!({"result": "s1"}).to_string())
        .create_async()
        .await;
    let _u2 = server
        .mock("POST", "/v1/api/trigger/upscale")
        .match_body(Matcher::PartialJson(json!({"index": 2})))
        .with_status(500)
        .create_async()
        .await;
    let _s1 = server
        .mock("GET", "/v1/api/trigger/task/s1")
        .with_body(json!({"status": "SUCCESS", "imageUrl": format!("{}/cdn/s1.png", url)}).to_string())
        .create_async()
        .await;
    let _img = server
        .mock("GET", "/cdn/s1.png")
        .with_body(png(2, 2))
        .create_async()
        .await;

    let actions = [Action::upscale(1), Action::upscale(2), Action::vary(1)];
    let results = client(&url).batch("parent", &actions).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().map(|i| i.width), Some(2));
    assert!(results[1].is_none());
    assert!(results[2].is_none());
}
