//! Integration tests for the fetch engine against mocked backends.

use std::time::Duration;

use profile_post_fetcher::config::Config;
use profile_post_fetcher::{
    Backend, FetchError, FetchMethod, FetchOrchestrator, FetchRequest, FetchStatus,
    GraphApiCredentials,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const PROFILE_HTML: &str = r#"<html><script>{"id":"998","viewer":null,"user_id":"123"}</script></html>"#;

/// Matches GraphQL requests by the `id` and `after` fields of the `variables` parameter.
struct GraphQlVariables {
    id: &'static str,
    after: Option<&'static str>,
}

impl Match for GraphQlVariables {
    fn matches(&self, request: &Request) -> bool {
        let Some(raw) = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "variables")
            .map(|(_, v)| v.into_owned())
        else {
            return false;
        };
        let Ok(variables) = serde_json::from_str::<Value>(&raw) else {
            return false;
        };
        variables.get("id").and_then(Value::as_str) == Some(self.id)
            && variables.get("after").and_then(Value::as_str) == self.after
    }
}

fn variables(after: Option<&'static str>) -> GraphQlVariables {
    GraphQlVariables { id: "123", after }
}

/// A GraphQL timeline page with ids `start..start + count`, newest first.
fn graphql_page(start: u64, count: u64, end_cursor: Option<&str>) -> Value {
    let edges: Vec<Value> = (start..start + count)
        .map(|i| {
            json!({"node": {
                "id": i.to_string(),
                "__typename": "GraphImage",
                "display_url": format!("https://cdn.example.com/{i}.jpg"),
                "taken_at_timestamp": 1_700_000_000 - (i as i64) * 3600,
                "edge_media_to_caption": {"edges": [{"node": {"text": format!("post {i} #test")}}]},
                "edge_media_preview_like": {"count": i},
                "edge_media_to_comment": {"count": 1}
            }})
        })
        .collect();
    json!({"data": {"user": {"edge_owner_to_timeline_media": {
        "count": 1000,
        "page_info": {"has_next_page": end_cursor.is_some(), "end_cursor": end_cursor},
        "edges": edges
    }}}})
}

fn graph_api_page(ids: &[&str], after: Option<&str>) -> Value {
    let data: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "caption": "hello #graph",
                "media_type": "IMAGE",
                "media_url": format!("https://cdn.example.com/{id}.jpg"),
                "timestamp": "2024-03-05T10:15:00+0000",
                "like_count": 3,
                "comments_count": 1
            })
        })
        .collect();
    let mut body = json!({"data": data});
    if let Some(after) = after {
        body["paging"] = json!({
            "cursors": {"before": "B", "after": after},
            "next": format!("https://graph.example.com/next?after={after}")
        });
    }
    body
}

async fn mount_profile(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/nasa/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PROFILE_HTML, "text/html"))
        .mount(server)
        .await;
}

async fn graphql_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/graphql/query/")
        .count()
}

fn graphql_request(method: FetchMethod) -> FetchRequest {
    FetchRequest::new(Backend::GraphQl, method).with_username("nasa")
}

fn graph_api_config(server: &MockServer) -> Config {
    Config {
        backend: Backend::GraphApi,
        graph_api: Some(GraphApiCredentials {
            access_token: "test-token".to_string(),
            account_id: "1784".to_string(),
        }),
        ..Config::for_testing(&server.uri())
    }
}

#[tokio::test]
async fn test_graphql_paginates_until_last_page() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 50, Some("abc"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("abc")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(50, 3, None)))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should succeed");

    assert_eq!(report.status, FetchStatus::Completed);
    assert_eq!(report.records.len(), 53);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.records[0].id(), "0");
    assert_eq!(report.records[52].id(), "52");
    assert_eq!(report.records[0].hashtags(), ["test".to_string()]);
    assert_eq!(graphql_calls(&server).await, 2);
}

#[tokio::test]
async fn test_identity_prefers_user_id_token() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    // Only requests for user 123 are answered; a 998 lookup would hit the 404 fallback.
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 2, None)))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should succeed");
    assert_eq!(report.records.len(), 2);
}

#[tokio::test]
async fn test_sessions_send_browser_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/nasa/"))
        .and(header("dnt", "1"))
        .and(header("sec-fetch-site", "same-origin"))
        .and(header_exists("user-agent"))
        .and(header_exists("referer"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PROFILE_HTML, "text/html"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(header("dnt", "1"))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .and(header_exists("x-ig-app-id"))
        .and(query_param("query_hash", "472f257a40c653c64c666ce877d59d2b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 1, None)))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should succeed");
    assert_eq!(report.records.len(), 1);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 5, None)))
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should succeed after one retry");

    assert_eq!(report.records.len(), 5);
    assert_eq!(graphql_calls(&server).await, 2);
}

#[tokio::test]
async fn test_soft_block_rotates_session_and_recovers() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 4, None)))
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should recover after rotation");

    assert_eq!(report.records.len(), 4);
    assert_eq!(graphql_calls(&server).await, 3);
}

#[tokio::test]
async fn test_persistent_server_error_keeps_partial_records() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 20, Some("next"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("next")))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect_err("fetch should fail");

    assert!(matches!(
        failure.source,
        FetchError::RetriesExhausted { attempts: 3, .. }
    ));
    assert!(matches!(
        failure.source.root_cause(),
        FetchError::HttpStatus { status: 500 }
    ));
    assert_eq!(failure.partial.len(), 20);
}

#[tokio::test]
async fn test_recent_stops_at_count() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 50, Some("abc"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("abc")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(50, 50, None)))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(
            &graphql_request(FetchMethod::Recent { count: 10 }),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

    let ids: Vec<&str> = report.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
}

#[tokio::test]
async fn test_top_percentage_over_all_fetched() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 20, None)))
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(
            &graphql_request(FetchMethod::Top { percentage: 10 }),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

    // Likes grow with the id, so the two most engaging posts are the last two.
    let ids: Vec<&str> = report.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, ["19", "18"]);
}

#[tokio::test]
async fn test_date_range_stops_once_past_since() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 10, Some("abc"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("abc")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(10, 10, None)))
        .expect(0)
        .mount(&server)
        .await;

    // Posts 2..=5 fall inside the range; post 9 is already older than `since`.
    let since = chrono::DateTime::from_timestamp(1_700_000_000 - 5 * 3600, 0).unwrap();
    let until = chrono::DateTime::from_timestamp(1_700_000_000 - 2 * 3600, 0).unwrap();

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(
            &graphql_request(FetchMethod::DateRange { since, until }),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

    let ids: Vec<&str> = report.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, ["2", "3", "4", "5"]);
    assert_eq!(report.pages_fetched, 1);
}

#[tokio::test]
async fn test_missing_username_fails_before_network() {
    let server = MockServer::start().await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphQl, FetchMethod::All),
            &CancellationToken::new(),
        )
        .await
        .expect_err("username is required");

    assert!(matches!(failure.source, FetchError::UsernameRequired));
    assert!(failure.partial.is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_repeating_cursor_terminates() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(1, 1, Some("abc"))))
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&graphql_request(FetchMethod::All), &CancellationToken::new()),
    )
    .await
    .expect("pagination should stop on a repeated cursor")
    .expect("fetch should succeed");

    assert_eq!(report.status, FetchStatus::Completed);
    assert_eq!(report.records.len(), 1);
    assert_eq!(graphql_calls(&server).await, 2);
}

#[tokio::test]
async fn test_fresh_cursors_with_stale_posts_terminate() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 3, Some("c1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("c1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 3, Some("c2"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("c2")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 3, Some("c3"))))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect("fetch should succeed");

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.pages_fetched, 2);
}

#[tokio::test]
async fn test_path_like_username_rejected_before_network() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphQl, FetchMethod::All).with_username("someone/../nasa"),
            &CancellationToken::new(),
        )
        .await
        .expect_err("username with path segments must be rejected");

    assert!(matches!(failure.source, FetchError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unknown_profile_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ghost/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphQl, FetchMethod::All).with_username("ghost"),
            &CancellationToken::new(),
        )
        .await
        .expect_err("profile does not exist");

    assert!(matches!(
        failure.source,
        FetchError::IdentityNotFound { ref username } if username == "ghost"
    ));
}

#[tokio::test]
async fn test_profile_without_id_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/nasa/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>nothing</html>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(&graphql_request(FetchMethod::All), &CancellationToken::new())
        .await
        .expect_err("no id in page");

    assert!(matches!(failure.source, FetchError::IdentityNotFound { .. }));
}

#[tokio::test]
async fn test_pre_cancelled_run_makes_no_requests() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let report = orchestrator
        .run(&graphql_request(FetchMethod::All), &cancel)
        .await
        .expect("cancelled run is not an error");

    assert_eq!(report.status, FetchStatus::Cancelled);
    assert!(report.records.is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_cancel_during_page_delay_returns_partial() {
    let server = MockServer::start().await;
    mount_profile(&server).await;

    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(None))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(0, 12, Some("abc"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(variables(Some("abc")))
        .respond_with(ResponseTemplate::new(200).set_body_json(graphql_page(12, 12, None)))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        page_delay: Duration::from_secs(60),
        ..Config::for_testing(&server.uri())
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let orchestrator = FetchOrchestrator::new(config);
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        orchestrator.run(&graphql_request(FetchMethod::All), &cancel),
    )
    .await
    .expect("cancellation should interrupt the page delay")
    .expect("cancelled run is not an error");

    assert_eq!(report.status, FetchStatus::Cancelled);
    assert_eq!(report.records.len(), 12);
    assert_eq!(report.pages_fetched, 1);
}

#[tokio::test]
async fn test_graph_api_follows_cursors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v21.0/1784/media"))
        .and(query_param("access_token", "test-token"))
        .and(query_param("limit", "100"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graph_api_page(&["3", "2"], Some("AFTER1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v21.0/1784/media"))
        .and(query_param("after", "AFTER1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(graph_api_page(&["1"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(graph_api_config(&server));
    let report = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphApi, FetchMethod::All),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

    let ids: Vec<&str> = report.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, ["3", "2", "1"]);
    assert_eq!(report.records[0].hashtags(), ["graph".to_string()]);
    assert_eq!(report.records[0].engagement(), 4);
}

#[tokio::test]
async fn test_graph_api_unauthorized_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v21.0/1784/media"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(graph_api_config(&server));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphApi, FetchMethod::All),
            &CancellationToken::new(),
        )
        .await
        .expect_err("bad token");

    assert!(matches!(
        failure.source,
        FetchError::Unauthorized { soft_block: false }
    ));
}

#[tokio::test]
async fn test_graph_api_invalid_token_code_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v21.0/1784/media"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Error validating access token", "type": "OAuthException", "code": 190}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = FetchOrchestrator::new(graph_api_config(&server));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphApi, FetchMethod::All),
            &CancellationToken::new(),
        )
        .await
        .expect_err("expired token");

    assert!(matches!(
        failure.source,
        FetchError::Unauthorized { soft_block: false }
    ));
}

#[tokio::test]
async fn test_graph_api_without_credentials() {
    let server = MockServer::start().await;

    let orchestrator = FetchOrchestrator::new(Config::for_testing(&server.uri()));
    let failure = orchestrator
        .run(
            &FetchRequest::new(Backend::GraphApi, FetchMethod::All),
            &CancellationToken::new(),
        )
        .await
        .expect_err("no credentials configured");

    assert!(matches!(failure.source, FetchError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
