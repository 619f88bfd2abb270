//! Tests for the shared library: the grade contract, the retry engine and the
//! HTTP client it drives.

use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::time::Instant;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::http::{
    retry_with_backoff, AttemptError, HttpClient, RemoteCallError, RetryConfig, RetryConfigError,
    RetryDecision,
};
use crate::middleware::{client_ip, with_observability, REQUEST_ID_HEADER};
use crate::types::{AggregateResult, ContractViolation, StudentSummary, TOP_STUDENTS_LIMIT};

fn student(id: i64, average_grade: f64, grade_count: u32) -> StudentSummary {
    StudentSummary {
        student_id: id,
        student_name: format!("Student {id}"),
        average_grade,
        grade_count,
    }
}

fn retry_config(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryConfig {
    RetryConfig::new(
        max_attempts,
        Duration::from_millis(initial_ms),
        Duration::from_millis(max_ms),
        multiplier,
        Duration::from_secs(30),
    )
    .unwrap()
}

fn server_error(status: u16) -> AttemptError {
    AttemptError::Status {
        status,
        body: String::new(),
    }
}

fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
    let gap = later - earlier;
    assert!(
        gap >= expected && gap <= expected + Duration::from_millis(1),
        "expected a gap of {expected:?}, got {gap:?}"
    );
}

// ============================================================================
// AggregateResult contract
// ============================================================================

#[test]
fn test_new_sorts_top_students_descending() {
    let result = AggregateResult::new(
        "CS101",
        80.0,
        3,
        5,
        vec![student(1, 70.0, 2), student(2, 95.0, 1), student(3, 82.5, 2)],
        4,
    )
    .unwrap();

    let ids: Vec<i64> = result.top_students().iter().map(|s| s.student_id).collect();
    assert_eq!(ids, vec![2, 3, 1]);
}

#[test]
fn test_new_truncates_to_leaderboard_limit() {
    let students: Vec<StudentSummary> = (0..15).map(|i| student(i, i as f64, 1)).collect();
    let result = AggregateResult::new("MATH200", 7.0, 15, 15, students, 0).unwrap();

    assert_eq!(result.top_students().len(), TOP_STUDENTS_LIMIT);
    assert_eq!(result.top_students()[0].student_id, 14);
    assert_eq!(result.top_students()[9].student_id, 5);
}

#[test]
fn test_new_keeps_source_order_for_ties() {
    let result = AggregateResult::new(
        "CS101",
        88.0,
        3,
        3,
        vec![student(7, 88.0, 1), student(3, 88.0, 1), student(5, 88.0, 1)],
        0,
    )
    .unwrap();

    let ids: Vec<i64> = result.top_students().iter().map(|s| s.student_id).collect();
    assert_eq!(ids, vec![7, 3, 5]);
}

#[test]
fn test_empty_course_has_zero_average() {
    let result = AggregateResult::new("EMPTY", 0.0, 0, 0, Vec::new(), 1).unwrap();
    assert_eq!(result.average_grade(), 0.0);
    assert!(result.top_students().is_empty());
}

#[test]
fn test_more_students_than_grades_is_rejected() {
    let err = AggregateResult::new("CS101", 90.0, 3, 2, Vec::new(), 0).unwrap_err();
    assert_eq!(
        err,
        ContractViolation::StudentsExceedGrades {
            students: 3,
            grades: 2
        }
    );
}

#[test]
fn test_empty_course_name_is_rejected() {
    let err = AggregateResult::new("", 0.0, 0, 0, Vec::new(), 0).unwrap_err();
    assert_eq!(err, ContractViolation::EmptyCourseName);
}

#[test]
fn test_non_finite_average_is_rejected() {
    let err = AggregateResult::new("CS101", f64::NAN, 1, 1, Vec::new(), 0).unwrap_err();
    assert_eq!(err, ContractViolation::NonFiniteAverage);
}

#[test]
fn test_wire_format_uses_camel_case() {
    let result =
        AggregateResult::new("CS101", 88.0, 1, 2, vec![student(1, 88.0, 2)], 12).unwrap();
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["courseName"], "CS101");
    assert_eq!(value["totalStudents"], 1);
    assert_eq!(value["totalGrades"], 2);
    assert_eq!(value["processingTimeMs"], 12);
    assert_eq!(value["topStudents"][0]["studentId"], 1);
    assert_eq!(value["topStudents"][0]["gradeCount"], 2);
}

#[test]
fn test_deserialized_result_is_validated_against_query() {
    let body = json!({
        "courseName": "CS102",
        "averageGrade": 75.0,
        "totalStudents": 1,
        "totalGrades": 1,
        "topStudents": [],
        "processingTimeMs": 3
    });
    let result: AggregateResult = serde_json::from_value(body).unwrap();

    assert!(result.validate().is_ok());
    assert!(matches!(
        result.validate_for("CS101"),
        Err(ContractViolation::CourseMismatch { .. })
    ));
}

#[test]
fn test_deserialized_unsorted_leaderboard_fails_validation() {
    let body = json!({
        "courseName": "CS101",
        "averageGrade": 80.0,
        "totalStudents": 2,
        "totalGrades": 2,
        "topStudents": [
            {"studentId": 1, "studentName": "A", "averageGrade": 70.0, "gradeCount": 1},
            {"studentId": 2, "studentName": "B", "averageGrade": 90.0, "gradeCount": 1}
        ],
        "processingTimeMs": 3
    });
    let result: AggregateResult = serde_json::from_value(body).unwrap();

    assert_eq!(
        result.validate(),
        Err(ContractViolation::TopStudentsUnsorted(1))
    );
}

// ============================================================================
// RetryConfig
// ============================================================================

#[test]
fn test_backoff_grows_exponentially_until_cap() {
    let config = retry_config(10, 100, 500, 2.0);

    assert_eq!(config.backoff_for(1), Duration::from_millis(100));
    assert_eq!(config.backoff_for(2), Duration::from_millis(200));
    assert_eq!(config.backoff_for(3), Duration::from_millis(400));
    assert_eq!(config.backoff_for(4), Duration::from_millis(500));
    assert_eq!(config.backoff_for(1_000), Duration::from_millis(500));
}

#[test]
fn test_backoff_with_unit_multiplier_is_constant() {
    let config = retry_config(5, 250, 1_000, 1.0);
    for attempt in 1..5 {
        assert_eq!(config.backoff_for(attempt), Duration::from_millis(250));
    }
}

#[test]
fn test_retry_config_rejects_invalid_values() {
    let ms = Duration::from_millis;

    assert_eq!(
        RetryConfig::new(0, ms(1), ms(2), 2.0, ms(10)),
        Err(RetryConfigError::ZeroAttempts)
    );
    assert_eq!(
        RetryConfig::new(3, ms(1), ms(2), 0.5, ms(10)),
        Err(RetryConfigError::InvalidMultiplier(0.5))
    );
    assert!(matches!(
        RetryConfig::new(3, ms(1), ms(2), f64::INFINITY, ms(10)),
        Err(RetryConfigError::InvalidMultiplier(_))
    ));
    assert!(matches!(
        RetryConfig::new(3, ms(5), ms(2), 2.0, ms(10)),
        Err(RetryConfigError::BackoffRange { .. })
    ));
    assert_eq!(
        RetryConfig::new(3, ms(1), ms(2), 2.0, Duration::ZERO),
        Err(RetryConfigError::ZeroTimeout)
    );
}

// ============================================================================
// Failure classification
// ============================================================================

#[test]
fn test_classification_of_attempt_failures() {
    assert_eq!(
        AttemptError::Network("connection reset".into()).classify(),
        RetryDecision::RetryableNetwork
    );
    for status in [500, 502, 503, 504, 599] {
        assert_eq!(server_error(status).classify(), RetryDecision::RetryableServerError);
    }
    for status in [400, 401, 404, 409, 499] {
        assert_eq!(server_error(status).classify(), RetryDecision::NonRetryableClientError);
    }
    for status in [101, 204, 302, 304] {
        assert_eq!(server_error(status).classify(), RetryDecision::NonRetryableOther);
    }
    assert_eq!(
        AttemptError::Malformed("eof".into()).classify(),
        RetryDecision::NonRetryableOther
    );
    assert_eq!(
        AttemptError::Request("bad url".into()).classify(),
        RetryDecision::NonRetryableOther
    );
}

#[test]
fn test_terminal_mapping_and_kinds() {
    assert_eq!(
        RemoteCallError::terminal(server_error(404)),
        RemoteCallError::ClientError(404)
    );
    assert!(matches!(
        RemoteCallError::terminal(server_error(302)),
        RemoteCallError::MalformedResponse(_)
    ));
    assert!(matches!(
        RemoteCallError::terminal(AttemptError::Request("bad".into())),
        RemoteCallError::Unreachable(_)
    ));

    assert_eq!(RemoteCallError::Timeout(Duration::from_secs(1)).kind(), "deadline_exceeded");
    assert_eq!(RemoteCallError::ClientError(404).kind(), "client_error");
    assert_eq!(RemoteCallError::MalformedResponse(String::new()).kind(), "protocol_error");
}

// ============================================================================
// retry_with_backoff
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_on_first_attempt_makes_one_call() {
    let config = retry_config(3, 100, 1_000, 2.0);
    let mut calls = 0;

    let result = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Ok::<_, AttemptError>(42) }
    })
    .await;

    assert_eq!(result, Ok(42));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_then_success_backs_off_exponentially() {
    let config = retry_config(3, 100, 1_000, 2.0);
    let outcomes = [Err(server_error(500)), Err(server_error(500)), Ok("graded")];
    let mut started = Vec::new();

    let result = retry_with_backoff(&config, "test", |attempt| {
        started.push(Instant::now());
        let outcome = outcomes[attempt as usize - 1].clone();
        async move { outcome }
    })
    .await;

    assert_eq!(result, Ok("graded"));
    assert_eq!(started.len(), 3);
    assert_gap(started[0], started[1], Duration::from_millis(100));
    assert_gap(started[1], started[2], Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delay_is_capped_between_attempts() {
    let config = retry_config(4, 100, 150, 3.0);
    let mut started = Vec::new();

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        started.push(Instant::now());
        async { Err(server_error(503)) }
    })
    .await;

    assert!(matches!(result, Err(RemoteCallError::RetriesExhausted { attempts: 4, .. })));
    assert_gap(started[0], started[1], Duration::from_millis(100));
    assert_gap(started[1], started[2], Duration::from_millis(150));
    assert_gap(started[2], started[3], Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let config = retry_config(3, 100, 1_000, 2.0);
    let mut calls = 0;

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Err(server_error(404)) }
    })
    .await;

    assert_eq!(result, Err(RemoteCallError::ClientError(404)));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_not_retried() {
    let config = retry_config(3, 100, 1_000, 2.0);
    let mut calls = 0;

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Err(AttemptError::Malformed("expected value at line 1".into())) }
    })
    .await;

    assert!(matches!(result, Err(RemoteCallError::MalformedResponse(_))));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_timeouts_exhaust_attempts() {
    let config = retry_config(3, 100, 1_000, 2.0);
    let mut calls = 0;

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Err(AttemptError::Network("operation timed out".into())) }
    })
    .await;

    assert_eq!(calls, 3);
    match result {
        Err(RemoteCallError::RetriesExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last, AttemptError::Network("operation timed out".into()));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_config_never_retries() {
    let config = retry_config(1, 100, 1_000, 2.0);
    let mut calls = 0;

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Err(server_error(500)) }
    })
    .await;

    assert!(matches!(result, Err(RemoteCallError::RetriesExhausted { attempts: 1, .. })));
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_backoff_sleep() {
    let config = RetryConfig::new(
        10,
        Duration::from_secs(1),
        Duration::from_secs(10),
        2.0,
        Duration::from_secs(2),
    )
    .unwrap();
    let mut calls = 0;
    let start = Instant::now();

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async { Err(server_error(503)) }
    })
    .await;

    // Attempts at t=0s and t=1s, then the 2s backoff is cut short by the deadline.
    assert_eq!(result, Err(RemoteCallError::Timeout(Duration::from_secs(2))));
    assert_eq!(calls, 2);
    assert_gap(start, Instant::now(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_hung_attempt() {
    let config = RetryConfig::new(
        3,
        Duration::from_millis(10),
        Duration::from_millis(10),
        1.0,
        Duration::from_millis(500),
    )
    .unwrap();
    let mut calls = 0;

    let result: Result<(), _> = retry_with_backoff(&config, "test", |_| {
        calls += 1;
        async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    })
    .await;

    assert_eq!(result, Err(RemoteCallError::Timeout(Duration::from_millis(500))));
    assert_eq!(calls, 1);
}

// ============================================================================
// HttpClient
// ============================================================================

fn http_client(base_url: &str) -> HttpClient {
    HttpClient::new(base_url, Duration::from_secs(1), Duration::from_secs(2)).unwrap()
}

#[test]
fn test_url_percent_encodes_segments() {
    let client = http_client("http://localhost:8081");
    let url = client.url(&["api", "grades", "average", "Data Science/101"]).unwrap();
    assert_eq!(
        url.as_str(),
        "http://localhost:8081/api/grades/average/Data%20Science%2F101"
    );
}

#[test]
fn test_url_keeps_base_path_prefix() {
    let client = http_client("http://grades.internal/service-b/");
    let url = client.url(&["api", "grades", "health"]).unwrap();
    assert_eq!(url.as_str(), "http://grades.internal/service-b/api/grades/health");
}

#[test]
fn test_invalid_base_url_is_rejected() {
    assert!(HttpClient::new("not a url", Duration::from_secs(1), Duration::from_secs(1)).is_err());
    assert!(HttpClient::new("mailto:grades@example.com", Duration::from_secs(1), Duration::from_secs(1)).is_err());
}

#[tokio::test]
async fn test_get_json_decodes_success_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/grades/average/CS101"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "courseName": "CS101",
            "averageGrade": 90.0,
            "totalStudents": 1,
            "totalGrades": 1,
            "topStudents": [],
            "processingTimeMs": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = http_client(&server.uri());
    let url = client.url(&["api", "grades", "average", "CS101"]).unwrap();
    let result: AggregateResult = client.get_json(url).await.unwrap();

    assert_eq!(result.course_name(), "CS101");
    assert_eq!(result.total_grades(), 1);
}

#[tokio::test]
async fn test_get_json_reports_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = http_client(&server.uri());
    let url = client.url(&["anything"]).unwrap();
    let err = client.get_json::<AggregateResult>(url).await.unwrap_err();

    assert_eq!(
        err,
        AttemptError::Status {
            status: 503,
            body: "overloaded".to_string()
        }
    );
    assert_eq!(err.classify(), RetryDecision::RetryableServerError);
}

#[tokio::test]
async fn test_get_json_rejects_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"courseName\": 12"))
        .mount(&server)
        .await;

    let client = http_client(&server.uri());
    let url = client.url(&["anything"]).unwrap();
    let err = client.get_json::<AggregateResult>(url).await.unwrap_err();

    assert!(matches!(err, AttemptError::Malformed(_)));
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;

    let client = http_client(&server.uri());
    let url = client.url(&["anything"]).unwrap();
    let err = client.get_json::<AggregateResult>(url).await.unwrap_err();

    assert_eq!(err.classify(), RetryDecision::NonRetryableOther);
}

#[tokio::test]
async fn test_connection_refused_is_network_failure() {
    let client = http_client("http://127.0.0.1:1");
    let url = client.url(&["api", "grades", "health"]).unwrap();
    let err = client.get_text(url, Duration::from_secs(1)).await.unwrap_err();

    assert_eq!(err.classify(), RetryDecision::RetryableNetwork);
}

#[tokio::test]
async fn test_get_text_applies_its_own_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = http_client(&server.uri());
    let url = client.url(&["slow"]).unwrap();
    let err = client.get_text(url, Duration::from_millis(100)).await.unwrap_err();

    assert!(matches!(err, AttemptError::Network(_)));
}

// ============================================================================
// Request logging middleware
// ============================================================================

fn observed_router() -> Router {
    with_observability(Router::new().route("/ping", get(|| async { "pong" })))
}

#[tokio::test]
async fn test_response_carries_generated_request_id() {
    let response = observed_router()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers().get(REQUEST_ID_HEADER).unwrap();
    assert!(!request_id.to_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_incoming_request_id_is_propagated() {
    let response = observed_router()
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header(REQUEST_ID_HEADER, "req-1234")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-1234");
}

#[test]
fn test_client_ip_prefers_first_forwarded_hop() {
    let request = Request::builder()
        .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(client_ip(&request), "203.0.113.5");
}

#[test]
fn test_client_ip_falls_back_to_peer_address() {
    let mut request = Request::builder().body(Body::empty()).unwrap();
    assert_eq!(client_ip(&request), "unknown");

    let peer: std::net::SocketAddr = "192.0.2.7:5555".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    assert_eq!(client_ip(&request), "192.0.2.7");
}
