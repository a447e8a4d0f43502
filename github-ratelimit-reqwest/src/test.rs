use std::time::{Duration, Instant, SystemTime};

use crate::{
    client, GitHubRateLimiter, RateLimitOption, RateLimitReachedError,
    RateLimiter, ResourceCategory, SecondaryOption, SecondaryOverrides,
};

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

const SECONDARY_BODY: &str = r#"{"message":"You have exceeded a secondary rate limit. Please wait a few minutes before you try again.","documentation_url":"https://docs.github.com/en/rest/overview/rate-limits-for-the-rest-api#about-secondary-rate-limits"}"#;
const GENERIC_403_BODY: &str = r#"{"message":"not as expected"}"#;

fn epoch_secs(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs() as i64
}

fn secondary_template(retry_after: &str) -> ResponseTemplate {
    ResponseTemplate::new(403)
        .insert_header("retry-after", retry_after)
        .set_body_raw(SECONDARY_BODY, "application/json")
}

fn primary_template(reset: SystemTime, resource: &str) -> ResponseTemplate {
    ResponseTemplate::new(403)
        .insert_header("x-ratelimit-remaining", "0")
        .insert_header(
            "x-ratelimit-reset",
            epoch_secs(reset).to_string().as_str(),
        )
        .insert_header("x-ratelimit-resource", resource)
        .set_body_raw(
            r#"{"message":"API rate limit exceeded for user ID 1."}"#,
            "application/json",
        )
}

async fn mount_once(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .respond_with(template)
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

fn build_client(options: Vec<RateLimitOption>) -> ClientWithMiddleware {
    ClientBuilder::new(Client::new())
        .with(RateLimiter(GitHubRateLimiter::new(options)))
        .build()
}

#[tokio::test]
async fn secondary_limit_sleeps_and_retries() {
    let mock_server = MockServer::start().await;
    mount_once(&mock_server, secondary_template("1")).await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client = build_client(Vec::new());
    let started = Instant::now();
    let response = client.get(&url).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(request_count(&mock_server).await, 2);
}

#[tokio::test]
async fn secondary_limit_single_sleep_cap() {
    let mock_server = MockServer::start().await;
    mount_once(&mock_server, secondary_template("10")).await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client =
        build_client(vec![RateLimitOption::from(
            SecondaryOption::SingleSleepLimit {
                limit: Duration::from_secs(2),
                on_exceeded: None,
            },
        )]);
    let started = Instant::now();
    let response = client.get(&url).send().await.unwrap();

    // the triggering response is returned unchanged instead of sleeping
    assert_eq!(response.status(), 403);
    assert_eq!(
        response.headers().get("retry-after").unwrap(),
        "10"
    );
    assert!(started.elapsed() < Duration::from_millis(500));
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], SECONDARY_BODY.as_bytes());
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn primary_limit_gates_requests_until_reset() {
    let mock_server = MockServer::start().await;
    let reset = SystemTime::now() + Duration::from_secs(2);
    mount_once(&mock_server, primary_template(reset, "core")).await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client = build_client(Vec::new());

    // the response that trips the limit surfaces as a typed error
    let error = client.get(&url).send().await.unwrap_err();
    let reqwest_middleware::Error::Middleware(inner) = &error else {
        panic!("expected a middleware error, got: {error:?}");
    };
    let reached = inner.downcast_ref::<RateLimitReachedError>().unwrap();
    assert_eq!(reached.category, ResourceCategory::Core);

    // within the window requests short-circuit without a network call
    let error = client.get(&url).send().await.unwrap_err();
    let reqwest_middleware::Error::Middleware(inner) = &error else {
        panic!("expected a middleware error, got: {error:?}");
    };
    assert!(inner.downcast_ref::<RateLimitReachedError>().is_some());
    assert_eq!(request_count(&mock_server).await, 1);

    // once the reset timer fires, requests are forwarded again
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(request_count(&mock_server).await, 2);
}

#[tokio::test]
async fn unrelated_forbidden_response_passes_through() {
    let mock_server = MockServer::start().await;
    mount_once(
        &mock_server,
        ResponseTemplate::new(403)
            .set_body_raw(GENERIC_403_BODY, "application/json"),
    )
    .await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client = build_client(Vec::new());
    let response = client.get(&url).send().await.unwrap();

    // neither limiter claims the response; the caller sees it verbatim
    assert_eq!(response.status(), 403);
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], GENERIC_403_BODY.as_bytes());
    assert_eq!(request_count(&mock_server).await, 1);
}

#[tokio::test]
async fn per_request_override_disables_sleep() {
    let mock_server = MockServer::start().await;
    mount_once(&mock_server, secondary_template("1")).await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client = build_client(Vec::new());

    // this request refuses to sleep, so the 403 comes straight back
    let started = Instant::now();
    let response = client
        .get(&url)
        .with_extension(SecondaryOverrides::new([SecondaryOption::no_sleep(
            None,
        )]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(started.elapsed() < Duration::from_millis(500));

    // no cooldown was committed, so later requests proceed immediately
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn client_helper_builds_working_client() {
    let mock_server = MockServer::start().await;
    mount_ok(&mock_server).await;
    let url = format!("{}/user/repos", mock_server.uri());

    let client = client([RateLimitOption::from(SecondaryOption::no_sleep(
        None,
    ))]);
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
}
