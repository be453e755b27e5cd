#[allow(dead_code)]
mod common;

use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{TestServer, http_client, scratch_dir};

#[tokio::test]
async fn root_redirects_to_app() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[LOCATION], "/voice/");
}

#[tokio::test]
async fn app_root_serves_index_without_caching() {
    let server = TestServer::new().await;
    for path in ["/voice", "/voice/"] {
        let resp = http_client()
            .get(format!("{}{path}", server.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{path}");
        assert_eq!(resp.headers()[CACHE_CONTROL], "no-store");
        assert!(
            resp.headers()[CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let body = resp.text().await.unwrap();
        assert!(body.contains("<html"));
    }
}

#[tokio::test]
async fn assets_get_content_types() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/voice/app.js", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE],
        "text/javascript; charset=utf-8"
    );
    assert_eq!(resp.headers()[CACHE_CONTROL], "no-store");

    let resp = http_client()
        .get(format!("{}/voice/style.css", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()[CONTENT_TYPE], "text/css; charset=utf-8");
}

#[tokio::test]
async fn unknown_asset_falls_back_to_index() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/voice/settings/audio", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("<html"));
}

#[tokio::test]
async fn missing_index_is_404() {
    let root = scratch_dir();
    std::fs::write(root.join("app.js"), "console.log('hi');").unwrap();
    let server = TestServer::with_web_root(&root).await;

    for path in ["/voice/", "/voice/missing.js"] {
        let resp = http_client()
            .get(format!("{}{path}", server.base_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
    }
    let resp = http_client()
        .get(format!("{}/voice/app.js", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn traversal_is_404() {
    let root = scratch_dir();
    let web = root.join("web");
    std::fs::create_dir_all(&web).unwrap();
    std::fs::write(web.join("index.html"), "<html></html>").unwrap();
    std::fs::write(root.join("secret.txt"), "top secret").unwrap();
    let server = TestServer::with_web_root(&web).await;

    // Sent raw so no client normalizes the dot segments away.
    for path in [
        "/voice/../secret.txt",
        "/voice/%2e%2e/secret.txt",
        "/voice/assets/..%2f..%2fsecret.txt",
        "/voice/..%5csecret.txt",
    ] {
        let (status, body) = raw_get(server.addr, path).await;
        assert!(
            status == 404 || status == 400,
            "{path} answered {status}: {body}"
        );
        assert!(!body.contains("top secret"), "{path} leaked the file");
    }

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn other_paths_are_404() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/favicon.ico", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "Not found.");
}

#[tokio::test]
async fn non_get_is_405() {
    let server = TestServer::new().await;
    let client = http_client();
    for path in ["/", "/voice/", "/voice/app.js", "/nowhere"] {
        let resp = client
            .post(format!("{}{path}", server.base_url()))
            .body("x")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{path}");
        assert_eq!(resp.text().await.unwrap(), "Method not allowed.");
    }
}

#[tokio::test]
async fn dev_prefix_redirects_when_enabled() {
    let server = TestServer::with_dev_forwarding().await;
    let resp = http_client()
        .get(format!("{}/voice-dev/src/main.ts?v=3", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers()[LOCATION],
        "http://127.0.0.1:5173/src/main.ts?v=3"
    );

    // Forwarding wins over the method check.
    let resp = http_client()
        .post(format!("{}/voice-dev", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[LOCATION], "http://127.0.0.1:5173/");
}

#[tokio::test]
async fn dev_prefix_is_404_when_disabled() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/voice-dev", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server = TestServer::new().await;
    let resp = http_client()
        .get(format!("{}/voice/", server.base_url()))
        .body(vec![b'a'; 128 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn connection_close_is_honored() {
    let server = TestServer::new().await;
    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut buf = Vec::new();
    // read_to_end only returns once the server closes the connection.
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_to_end(&mut buf),
    )
    .await
    .expect("server kept the connection open")
    .unwrap();
    assert!(String::from_utf8_lossy(&buf).starts_with("HTTP/1.1 302"));
}

/// Issue a GET with the path written verbatim on the wire.
async fn raw_get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_to_end(&mut buf),
    )
    .await
    .unwrap()
    .unwrap();
    let text = String::from_utf8_lossy(&buf).into_owned();
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    (status, text)
}
