use std::time::Duration;

use serde_json::json;
use tablemate_core::{Request, TerminalReason};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::TestContext;

async fn mount_refresh(ctx: &TestContext, status: u16, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("x-csrf-token", "csrf-after-refresh")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(expected_calls)
        .mount(&ctx.server)
        .await;
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let ctx = TestContext::new().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "refresh_token=r1; Path=/")
                .append_header("set-cookie", "csrf_token=c1; Path=/")
                .set_body_json(json!({})),
        )
        .expect(1)
        .mount(&ctx.server)
        .await;

    // First hit on each resource is rejected, later hits succeed
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&ctx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "email": "a@example.com"})))
        .mount(&ctx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/42/register"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&ctx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/events/42/register"))
        .and(header_exists("x-csrf-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "eventId": 42, "status": "confirmed"})))
        .mount(&ctx.server)
        .await;

    mount_refresh(&ctx, 200, 1).await;

    ctx.client.login("a@example.com", "secret").await.unwrap();

    let (profile, register) = tokio::join!(
        ctx.client.fetch(Request::get("/profile")),
        ctx.client.fetch(Request::post("/events/42/register").json(&json!({})).unwrap()),
    );

    assert_eq!(profile.unwrap().status(), 200);
    assert_eq!(register.unwrap().status(), 200);
    assert!(ctx.signal_reasons().is_empty());

    // Each request was sent exactly twice: original plus one retry
    assert_eq!(ctx.requests_to("/profile").await.len(), 2);
    assert_eq!(ctx.requests_to("/events/42/register").await.len(), 2);

    // The refresh response rotated the CSRF token
    assert_eq!(
        ctx.client.context().csrf.current().as_deref(),
        Some("csrf-after-refresh")
    );
    ctx.server.verify().await;
}

#[tokio::test]
async fn test_401_after_completed_refresh_starts_a_new_one() {
    let ctx = TestContext::new().await;
    ctx.seed_cookies(&["refresh_token=r1; Path=/"]);

    for route in ["/profile", "/events"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&ctx.server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&ctx.server)
            .await;
    }
    mount_refresh(&ctx, 200, 2).await;

    let first = ctx.client.fetch(Request::get("/profile")).await.unwrap();
    assert_eq!(first.status(), 200);
    assert!(!ctx.client.refresher().is_pending());

    // The settled refresh is not reused; this 401 gets its own refresh
    let second = ctx.client.fetch(Request::get("/events")).await.unwrap();
    assert_eq!(second.status(), 200);

    let order: Vec<String> = ctx
        .server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        order,
        vec!["/profile", "/refresh", "/profile", "/events", "/refresh", "/events"]
    );
    assert!(ctx.signal_reasons().is_empty());
    ctx.server.verify().await;
}

#[tokio::test]
async fn test_second_401_after_retry_is_terminal() {
    let ctx = TestContext::new().await;
    ctx.seed_cookies(&["refresh_token=r1; Path=/"]);

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&ctx.server)
        .await;
    mount_refresh(&ctx, 200, 1).await;

    let response = ctx.client.fetch(Request::get("/profile")).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(ctx.requests_to("/profile").await.len(), 2);
    assert_eq!(ctx.signal_reasons(), vec![TerminalReason::RetryRejected]);
    ctx.server.verify().await;
}

#[tokio::test]
async fn test_no_refresh_cookie_signals_without_refresh_call() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&ctx.server)
        .await;
    mount_refresh(&ctx, 200, 0).await;

    let response = ctx.client.fetch(Request::get("/profile")).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(ctx.requests_to("/profile").await.len(), 1);
    assert_eq!(ctx.signal_reasons(), vec![TerminalReason::RefreshFailed]);
    ctx.server.verify().await;
}

#[tokio::test]
async fn test_failed_refresh_signals_and_returns_original_response() {
    let ctx = TestContext::new().await;
    ctx.seed_cookies(&["refresh_token=expired; Path=/"]);

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
        .mount(&ctx.server)
        .await;
    mount_refresh(&ctx, 401, 1).await;

    let response = ctx.client.fetch(Request::get("/profile")).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.text(), "session expired");
    assert_eq!(ctx.requests_to("/profile").await.len(), 1);
    assert_eq!(ctx.signal_reasons(), vec![TerminalReason::RefreshFailed]);

    // A later failure may try again
    assert!(!ctx.client.refresher().is_pending());
}

#[tokio::test]
async fn test_419_is_refreshed_like_401() {
    let ctx = TestContext::new().await;
    ctx.seed_cookies(&["refresh_token=r1; Path=/"]);

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(419))
        .up_to_n_times(1)
        .mount(&ctx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&ctx.server)
        .await;
    mount_refresh(&ctx, 200, 1).await;

    let response = ctx.client.fetch(Request::get("/events")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(ctx.signal_reasons().is_empty());
    ctx.server.verify().await;
}

#[tokio::test]
async fn test_csrf_rotation_observed_on_error_response() {
    let ctx = TestContext::new().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(500).insert_header("x-csrf-token", "rotated"))
        .mount(&ctx.server)
        .await;

    let response = ctx.client.fetch(Request::get("/events")).await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(ctx.client.context().csrf.current().as_deref(), Some("rotated"));
}

#[tokio::test]
async fn test_refreshed_retry_uses_new_csrf_token() {
    let ctx = TestContext::new().await;
    ctx.seed_cookies(&["refresh_token=r1; Path=/", "csrf_token=stale; Path=/"]);

    Mock::given(method("DELETE"))
        .and(path("/events/42/register"))
        .and(header("x-csrf-token", "stale"))
        .respond_with(ResponseTemplate::new(419))
        .mount(&ctx.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/events/42/register"))
        .and(header("x-csrf-token", "csrf-after-refresh"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&ctx.server)
        .await;
    mount_refresh(&ctx, 200, 1).await;

    let response = ctx
        .client
        .fetch(Request::delete("/events/42/register"))
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    ctx.server.verify().await;
}
