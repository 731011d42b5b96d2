mod common;

use common::{
    config, middleware, proxy_response, with_error_header, ENVELOPE_BAD_JSON, ENVELOPE_OK,
    ENVELOPE_SERVER_ERROR,
};
use crawlera_fetch::config::OnError;
use crawlera_fetch::{
    DownloaderMiddleware, Error, FetchError, FetchMiddleware, Request, Response, ResponseAction,
    StatsCollector,
};
use reqwest::Method;
use serde_json::json;

fn expect_response(action: ResponseAction) -> Response {
    match action {
        ResponseAction::Response(response) => response,
        ResponseAction::Retry(request) => panic!("unexpected retry of {}", request),
    }
}

fn expect_retry(action: ResponseAction) -> Request {
    match action {
        ResponseAction::Retry(request) => request,
        ResponseAction::Response(response) => panic!("unexpected response from {}", response.url),
    }
}

fn policy(on_error: OnError) -> FetchMiddleware {
    FetchMiddleware::new(config().with_on_error(on_error), StatsCollector::new())
}

#[test]
fn envelope_is_unwrapped() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://fake.host.com")).unwrap();
    let proxied = proxy_response(&wrapped, 200, ENVELOPE_OK);

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());

    assert_eq!(response.url, "https://example.org");
    assert_eq!(response.status, 123);
    assert_eq!(response.headers["fake-header"], "true");
    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.body, b"foobar");
}

#[test]
fn round_trip_restores_the_original_request() {
    let mw = middleware();
    let original = Request::new("https://httpbin.org/post")
        .with_method(Method::POST)
        .with_body("foo=bar");
    let mut wrapped = mw.process_request(&original).unwrap();
    let body = json!({"url": "https://httpbin.org/post", "original_status": 200, "headers": {}, "body": "ok"});
    let proxied = proxy_response(&wrapped, 200, &body.to_string());

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());
    let request = response.request.expect("original request attached");

    assert_eq!(request.url, original.url);
    assert_eq!(request.method, original.method);
    assert_eq!(request.body, original.body);
}

#[test]
fn missing_original_status_defaults_to_200() {
    let mw = middleware();
    for body in [
        json!({"url": "https://example.org", "headers": {}, "body": "x"}),
        json!({"url": "https://example.org", "original_status": null, "headers": {}, "body": "x"}),
        json!({"url": "https://example.org", "original_status": "nope", "headers": {}, "body": "x"}),
        json!({"url": "https://example.org", "original_status": 0, "headers": {}, "body": "x"}),
    ] {
        let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
        let proxied = proxy_response(&wrapped, 200, &body.to_string());
        let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());
        assert_eq!(response.status, 200);
    }
    assert_eq!(
        mw.stats().get_count("crawlera_fetch/response_status_count/None"),
        Some(4)
    );
}

#[test]
fn base64_body_and_header_list_are_decoded() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let body = json!({
        "url": "https://example.org",
        "original_status": 200,
        "headers": [
            {"name": "Content-Type", "value": "text/html"},
            {"name": "Content-Encoding", "value": "gzip"}
        ],
        "body": "PGh0bWw+PC9odG1sPg=="
    });
    let proxied = proxy_response(&wrapped, 200, &body.to_string());

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());

    assert_eq!(response.body, b"<html></html>");
    assert_eq!(response.headers["content-type"], "text/html");
    assert!(response.headers.get("content-encoding").is_none());
}

#[test]
fn upstream_envelope_is_kept_on_the_context() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://fake.host.com")).unwrap();
    let proxied = proxy_response(&wrapped, 200, ENVELOPE_OK);

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());

    let upstream = wrapped.fetch.as_ref().unwrap().upstream_response.as_ref().unwrap();
    assert_eq!(upstream.status, 200);
    assert_eq!(upstream.body["original_status"], 123);
    assert_eq!(upstream.headers["content-encoding"], "gzip");

    let page_ctx = response.request.as_ref().unwrap().fetch.as_ref().unwrap();
    assert!(page_ctx.upstream_response.is_some());
    assert!(page_ctx.timing.unwrap().latency.is_some());
}

#[test]
fn unwrapped_requests_pass_through() {
    let mw = middleware();
    let mut request = Request::new("https://example.org");
    let response = Response::new("https://example.org", 200).with_body("<html></html>");

    let passed = expect_response(mw.process_response(&mut request, response).unwrap());

    assert_eq!(passed.url, "https://example.org");
    assert_eq!(passed.body, b"<html></html>");
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_count"), None);
}

#[test]
fn error_header_raises_by_default() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = with_error_header(proxy_response(&wrapped, 407, ""), "bad_proxy_auth");

    let err = mw.process_response(&mut wrapped, proxied).unwrap_err();

    match err {
        Error::Fetch(FetchError::Proxy { code, message }) => {
            assert_eq!(code, "bad_proxy_auth");
            assert_eq!(
                message,
                "Error downloading <GET https://example.org> (status: 407, X-Crawlera-Error header: bad_proxy_auth)"
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
    let stats = mw.stats();
    assert_eq!(stats.get_count("crawlera_fetch/response_error"), Some(1));
    assert_eq!(stats.get_count("crawlera_fetch/response_error/bad_proxy_auth"), Some(1));
    assert_eq!(stats.get_count("crawlera_fetch/api_status_count/407"), Some(1));
}

#[test]
fn error_header_under_warn_returns_the_proxy_response() {
    let mw = policy(OnError::Warn);
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = with_error_header(proxy_response(&wrapped, 407, "denied"), "bad_proxy_auth");

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());

    assert_eq!(response.url, common::FETCH_URL);
    assert_eq!(response.status, 407);
    assert_eq!(response.body, b"denied");
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error"), Some(1));
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error/bad_proxy_auth"), Some(1));
}

#[test]
fn error_header_under_retry_targets_the_original_url() {
    let mw = policy(OnError::Retry);
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = with_error_header(proxy_response(&wrapped, 407, ""), "bad_proxy_auth");

    let retry = expect_retry(mw.process_response(&mut wrapped, proxied).unwrap());

    assert_eq!(retry.url, "https://example.org");
    assert_eq!(retry.method, Method::GET);
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error"), Some(1));
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error/bad_proxy_auth"), Some(1));
}

#[test]
fn malformed_json_raises_a_decode_error() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = proxy_response(&wrapped, 200, ENVELOPE_BAD_JSON);

    let err = mw.process_response(&mut wrapped, proxied).unwrap_err();

    assert!(matches!(err, Error::Fetch(FetchError::Decode { .. })));
    assert!(err.to_string().starts_with("Error decoding <GET https://example.org> (status: 200"));
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error/JSONDecodeError"), Some(1));
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error"), Some(1));
}

#[test]
fn server_error_in_envelope_raises() {
    let mw = middleware();
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = proxy_response(&wrapped, 200, ENVELOPE_SERVER_ERROR);

    let err = mw.process_response(&mut wrapped, proxied).unwrap_err();

    match err {
        Error::Fetch(FetchError::Upstream { code, request_id, message }) => {
            assert_eq!(code, "serverbusy");
            assert_eq!(request_id, None);
            assert!(message.contains("Original status: 503"));
            assert!(message.contains("Server busy: too many outstanding requests"));
            assert!(message.ends_with("Request ID: unknown)"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error/serverbusy"), Some(1));
}

#[test]
fn error_code_field_is_also_recognized() {
    let mw = policy(OnError::Warn);
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let body = json!({"error_code": "ERR_BAD_URL", "message": "bad url", "uncork_id": "u-1"});
    let proxied = proxy_response(&wrapped, 200, &body.to_string());

    let response = expect_response(mw.process_response(&mut wrapped, proxied).unwrap());

    assert_eq!(response.url, common::FETCH_URL);
    assert_eq!(mw.stats().get_count("crawlera_fetch/response_error/ERR_BAD_URL"), Some(1));
}

#[test]
fn warn_tolerates_malformed_json() {
    let mw = FetchMiddleware::new(config().with_on_error(OnError::Warn), StatsCollector::new());
    let mut wrapped = mw.process_request(&Request::new("https://example.org")).unwrap();
    let proxied = proxy_response(&wrapped, 200, ENVELOPE_BAD_JSON);

    assert!(mw.process_response(&mut wrapped, proxied).is_ok());
}
