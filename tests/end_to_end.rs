//! Cross-module integration test driving the whole C9 acceptor/worker pool
//! over a real TCP socket: registers routes through the public API, starts
//! an `HttpServer`, and speaks raw HTTP/1.1 to it.
//!
//! The server under test has no TLS material configured, so every accepted
//! socket is plaintext and hits the unconditional non-SSL gate (spec §4.5
//! S1->S3) before any routed dispatch happens; routed-dispatch behavior
//! (200/403/404 on actual rules) is exercised at the unit level in
//! `router.rs` instead.

use std::sync::Arc;
use std::time::Duration;

use redfish_core::{Cli, Config, HttpServer, Method, MethodMask, PrivilegeSet, Router, Rule, SessionStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn test_cli(bind: std::net::SocketAddr) -> Cli {
    Cli {
        bind,
        tls_cert: None,
        tls_key: None,
        mtls_trust_store: None,
        workers: Some(2),
        deadline_quantum_secs: 1,
        idle_session_timeout_mins: 60,
        server_name: "redfish_core-test".to_string(),
        shutdown_timeout_secs: 5,
    }
}

async fn send_request(addr: std::net::SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect to test server");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn full_http_round_trip_over_the_acceptor_worker_pool() {
    let mut router = Router::new();
    router
        .register(
            Rule::new_value(
                "/redfish/v1",
                MethodMask::default().with(Method::Get),
                vec![PrivilegeSet::NO_AUTH],
                || "{\"Id\":\"RootService\"}".to_string(),
            )
            .unwrap(),
        )
        .unwrap();
    router
        .register(
            Rule::new_value(
                "/redfish/v1/SecretThing",
                MethodMask::default().with(Method::Get),
                vec![PrivilegeSet::CONFIGURE_USERS],
                || "nope".to_string(),
            )
            .unwrap(),
        )
        .unwrap();
    router.finalize();
    let router = Arc::new(router);

    let sessions = Arc::new(SessionStore::new());
    let bind: std::net::SocketAddr = "127.0.0.1:18743".parse().unwrap();
    let cli = test_cli(bind);
    let config = Arc::new(Config::from_cli(&cli));

    let server = HttpServer::new(router, sessions, config, &cli).unwrap();
    let handle = server.serve(bind, cli.worker_count(), cli.shutdown_timeout()).await.unwrap();

    // Give the acceptor task a moment to actually start listening.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Plain GET/HEAD with a Host header always gets redirected, regardless
    // of whether the path matches a registered route or its privileges.
    let redirected = send_request(bind, "GET /redfish/v1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(redirected.starts_with("HTTP/1.1 301"), "unexpected response: {redirected}");
    assert!(redirected.contains("Location: https://localhost/redfish/v1"), "unexpected response: {redirected}");

    let redirected_unknown = send_request(
        bind,
        "GET /redfish/v1/DoesNotExist HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(redirected_unknown.starts_with("HTTP/1.1 301"), "unexpected response: {redirected_unknown}");

    // A non-GET/HEAD method never reaches routed dispatch over plaintext either.
    let wrong_method = send_request(bind, "POST /redfish/v1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert!(wrong_method.starts_with("HTTP/1.1 404"), "unexpected response: {wrong_method}");

    // Missing Host is a 404, not a silent close.
    let missing_host = send_request(bind, "GET /redfish/v1 HTTP/1.0\r\nConnection: close\r\n\r\n").await;
    assert!(missing_host.starts_with("HTTP/1.1 404"), "unexpected response: {missing_host}");

    handle.cancel();
    let _ = handle.wait_for_completion(Duration::from_secs(1)).await;
}
