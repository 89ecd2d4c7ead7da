//! WebSocket upgrade (RFC 6455), grounded on bmcweb's Crow websocket
//! adaptor (`examples/original_source/http/websocket.h`'s `start()`, which
//! validates the handshake headers and writes a 101 response by hand) and
//! on `tokio-tungstenite`'s `server-custom-accept` example for the
//! manual-handshake pattern this requires: by the time a route has matched,
//! the connection loop has already consumed the request line and headers
//! off the wire, so the handshake can't be re-read from the socket the way
//! `accept_async` expects. Only the 101 response is written here; the
//! stream is then wrapped with `WebSocketStream::from_raw_socket`, which
//! performs no handshake I/O of its own.

use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::adaptor::Adaptor;
use crate::request::{Method, Request};

/// Spec §6: "Request must (a) be over TLS, (b) include `Upgrade: websocket`
/// with appropriate headers". TLS is checked by the caller via
/// `req.is_secure`; this checks (b).
pub fn is_upgrade_request(req: &Request) -> bool {
    if req.method != Method::Get {
        return false;
    }
    let connection_has_upgrade = req
        .headers
        .get("connection")
        .map(|v| v.split(|c: char| c == ',' || c.is_whitespace()).any(|tok| tok.eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let upgrade_is_websocket =
        req.headers.get("upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    let version_ok = req.headers.get("sec-websocket-version").map(|v| v.trim() == "13").unwrap_or(false);
    let has_key = req.headers.get("sec-websocket-key").is_some();
    connection_has_upgrade && upgrade_is_websocket && version_ok && has_key
}

fn handshake_response(req: &Request) -> Option<Vec<u8>> {
    let key = req.headers.get("sec-websocket-key")?;
    let accept = derive_accept_key(key.as_bytes());
    let mut resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(proto) = req.headers.get("sec-websocket-protocol") {
        resp.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
    }
    resp.push_str("\r\n");
    Some(resp.into_bytes())
}

/// Writes the 101 response, then wraps the adaptor (ownership of which has
/// already passed out of the Connection per spec §4.5's S6 row) in a
/// `WebSocketStream`.
pub async fn upgrade(mut adaptor: Adaptor, req: &Request) -> std::io::Result<WebSocketStream<Adaptor>> {
    let response = handshake_response(req)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "missing Sec-WebSocket-Key"))?;
    adaptor.write_all(&response).await?;
    Ok(WebSocketStream::from_raw_socket(adaptor, Role::Server, None).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;

    fn upgrade_request() -> Request {
        let mut req = Request::new(Method::Get, 11, "/ws");
        req.headers.insert("Connection", "Upgrade");
        req.headers.insert("Upgrade", "websocket");
        req.headers.insert("Sec-WebSocket-Version", "13");
        req.headers.insert("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        req
    }

    #[test]
    fn recognizes_a_well_formed_upgrade_request() {
        assert!(is_upgrade_request(&upgrade_request()));
    }

    #[test]
    fn rejects_missing_version_or_key() {
        let mut req = upgrade_request();
        req.headers = Headers::new();
        req.headers.insert("Connection", "Upgrade");
        req.headers.insert("Upgrade", "websocket");
        assert!(!is_upgrade_request(&req));
    }

    #[test]
    fn derives_the_rfc6455_example_accept_key() {
        // RFC 6455 §1.3 worked example.
        let req = upgrade_request();
        let resp = handshake_response(&req).unwrap();
        let text = String::from_utf8(resp).unwrap();
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }
}
