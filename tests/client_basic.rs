//! End to end tests against a local scripted server.


use easy_parallel::Parallel;
use std::time::{Duration, Instant};
use fez::{Client, ClientOpts, ErrorKind, Method, Request, StatusCode};

use mock::{Opts, Server};

const RESP_200: &str = "HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n";
const RESP_404: &str = "HTTP/1.1 404 Not Found\r\ncontent-length: 2\r\n\r\nhi";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

#[test]
fn test_client_empties() {
    init_tracing();
    let server = Server::new(RESP_200);
    let client = Client::new().unwrap();

    let resp = client.get(&server.url("/foo/bar")).unwrap().wait().unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.reason(), "OK");
    assert!(resp.body().is_empty());
    let expected = format!("GET /foo/bar HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", server.port());
    server.assert(&expected);
}

#[test]
fn test_client_not_found() {
    let server = Server::new(RESP_404);
    let client = Client::new().unwrap();

    let resp = smol::block_on(async { client.get(&server.url("/x")).unwrap().await }).unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.reason(), "Not Found");
    assert_eq!(resp.headers().len(), 1);
    assert_eq!(resp.headers().get("Content-Length"), Some("2"));
    assert_eq!(resp.body(), b"hi");
    server.finish();
}

#[test]
fn test_client_body_query() {
    let server = Server::new(RESP_200);
    let client = Client::new().unwrap();

    let handle = client
        .post(
            &server.url("/foo/bar?one=two"),
            vec![("content-type", "text/plain")],
            "fez",
        )
        .unwrap();
    assert_eq!(handle.wait().unwrap().status(), StatusCode::OK);

    let expected = format!(
        "POST /foo/bar?one=two HTTP/1.1\r\nHost: 127.0.0.1:{}\r\ncontent-type: text/plain\r\nContent-Length: 3\r\n\r\nfez",
        server.port()
    );
    server.assert(&expected);
}

#[test]
fn test_completes_on_content_length_while_connection_open() {
    let server = Server::with_opts(
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello",
        Opts { hold_open: true, ..Opts::default() },
    );
    let client = Client::new().unwrap();

    let resp = client.get(&server.url("/")).unwrap().wait().unwrap();
    assert_eq!(resp.body(), b"hello");

    // the server only returns once the client closed the socket
    server.finish();
}

#[test]
fn test_response_over_several_writes() {
    let body = "x".repeat(300);
    let raw = format!(
        "HTTP/1.1 201 Created\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let server = Server::with_opts(raw.as_bytes(), Opts { writes: 7, hold_open: true, ..Opts::default() });
    let client = Client::with_opts(ClientOpts { read_chunk_size: 16, ..ClientOpts::default() }).unwrap();

    let resp = client.get(&server.url("/split")).unwrap().wait().unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.headers().get("content-type"), Some("text/plain"));
    assert_eq!(resp.text(), body);
    server.finish();
}

#[test]
fn test_close_delimited_body() {
    let server = Server::with_opts(
        b"HTTP/1.1 200 OK\r\nServer: mock\r\n\r\nuntil the server hangs up",
        Opts { writes: 3, ..Opts::default() },
    );
    let client = Client::new().unwrap();

    let resp = client.get(&server.url("/")).unwrap().wait().unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("server"), Some("mock"));
    assert_eq!(resp.body(), &b"until the server hangs up"[..]);
    server.finish();
}

#[test]
fn test_close_delimited_empty_body() {
    let server = Server::new("HTTP/1.1 204 No Content\r\nX-Empty: yes\r\n\r\n");
    let client = Client::new().unwrap();

    let resp = client.get(&server.url("/")).unwrap().wait().unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.reason(), "No Content");
    assert_eq!(resp.headers().get("x-empty"), Some("yes"));
    assert!(resp.body().is_empty());
    server.finish();
}

#[test]
fn test_many_headers_and_json_body() {
    let json = r#"{"abbreviation":"CDT","datetime":"2025-09-06T21:00:09.818553-05:00","timezone":"America/Chicago"}"#;
    let mut raw = String::from("HTTP/1.1 200 OK\r\n");
    for i in 0..24 {
        raw.push_str(&format!("x-header-{}: value {}\r\n", i, i));
    }
    raw.push_str("content-type: application/json; charset=utf-8\r\n");
    raw.push_str("x-request-from: 2601:197:500:1da0:64d9:b8bf:a899:3809\r\n");
    raw.push_str(&format!("content-length: {}\r\n\r\n{}", json.len(), json));

    let server = Server::with_opts(raw.as_bytes(), Opts { writes: 4, ..Opts::default() });
    let client = Client::new().unwrap();

    let resp = client
        .request_with(Method::GET, &server.url("/time"), vec![("accept", "application/json")], None)
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(resp.headers().len(), 27);
    assert_eq!(resp.headers().get("x-header-23"), Some("value 23"));
    assert_eq!(
        resp.headers().get("x-request-from"),
        Some("2601:197:500:1da0:64d9:b8bf:a899:3809")
    );
    assert_eq!(resp.text(), json);
    server.finish();
}

#[test]
fn test_concurrent_requests_single_dispatch() {
    const N: usize = 20;
    let server = Server::with_opts(
        b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\npong",
        Opts { conns: N, writes: 2, ..Opts::default() },
    );
    let client = Client::with_opts(ClientOpts { read_chunk_size: 8, ..ClientOpts::default() }).unwrap();
    let url = server.url("/ping");

    let handles = Parallel::new()
        .each(0..N, |i| client.schedule(Request::get(url.as_str()).header("x-n", i.to_string())).unwrap())
        .run();
    for handle in handles {
        let resp = handle.wait().unwrap();
        assert_eq!(resp.body(), b"pong");
    }

    let stats = client.stats();
    assert_eq!(stats.registered, N);
    assert_eq!(stats.peak_dispatch_per_conn, 1);
    assert_eq!(server.finish().len(), N);
}

#[test]
fn test_connection_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = Client::new().unwrap();

    let err = client
        .get(&format!("http://127.0.0.1:{}/", port))
        .unwrap()
        .wait()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert!(err.io_error().is_some());
}

#[test]
fn test_malformed_status_line() {
    let server = Server::new("HTTP/1.1 abc Broken\r\ncontent-length: 0\r\n\r\n");
    let client = Client::new().unwrap();

    let err = client.get(&server.url("/")).unwrap().wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    server.finish();
}

#[test]
fn test_failed_request_is_retired() {
    let raw = format!("HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\nhi", usize::MAX);
    let server = Server::new(&raw);
    let client = Client::new().unwrap();

    let err = client.get(&server.url("/")).unwrap().wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    server.finish();

    // the handle resolves on the worker, before the loop retires the socket
    let deadline = Instant::now() + Duration::from_secs(5);
    while client.stats().retired < 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let stats = client.stats();
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.retired, stats.registered);
}

#[test]
fn test_large_body_over_several_writes() {
    let body: Vec<u8> = (0..4 * 1024 * 1024).map(|i| b'a' + (i % 26) as u8).collect();
    let server = Server::new(RESP_200);
    let client = Client::new().unwrap();

    let resp = client
        .schedule(Request::post(server.url("/upload")).body(body.clone()))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut expected = format!(
        "POST /upload HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nContent-Length: {}\r\n\r\n",
        server.port(),
        body.len()
    )
    .into_bytes();
    expected.extend_from_slice(&body);

    let received = server.finish();
    assert_eq!(received.len(), 1);
    assert!(received[0] == expected, "request body was not sent intact");
}

#[test]
fn test_eof_before_head() {
    let server = Server::new("HTTP/1.1 200 OK\r\n");
    let client = Client::new().unwrap();

    let err = client.get(&server.url("/")).unwrap().wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    server.finish();
}

#[test]
fn test_invalid_url() {
    let client = Client::new().unwrap();
    assert_eq!(client.get("no scheme here").unwrap_err().kind(), ErrorKind::Url);
    assert_eq!(client.get("/relative").unwrap_err().kind(), ErrorKind::Url);
    assert_eq!(client.get("ftp://example.org/").unwrap_err().kind(), ErrorKind::Url);
}

#[test]
fn test_drop_client_cancels_in_flight() {
    // reads the request, never answers, and waits for the client to hang up
    let server = Server::with_opts(b"", Opts { hold_open: true, ..Opts::default() });
    let client = Client::new().unwrap();

    let handle = client.get(&server.url("/slow")).unwrap();
    // let the request reach the server before shutting down
    while server.received() == 0 {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    drop(client);

    assert_eq!(handle.wait().unwrap_err().kind(), ErrorKind::Canceled);
    assert_eq!(server.finish().len(), 1);
}
