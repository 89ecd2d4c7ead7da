//! Request data model (spec §3), grounded on the field set of
//! `crow::Request` in `examples/original_source/http/http_request.h`
//! (method, fields, url, query params, body, `isSecure`, session, ioService)
//! re-expressed without the boost::beast/boost::asio dependency it carries.

use crate::headers::Headers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
    Connect,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        Some(match s {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            "TRACE" => Method::Trace,
            "CONNECT" => Method::Connect,
            _ => return None,
        })
    }

    /// Bit position used by [`crate::rule::MethodMask`].
    pub fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Ordered multimap of decoded query-string key/value pairs. Order matters:
/// handlers that care about repeated keys (e.g. `?tag=a&tag=b`) rely on
/// insertion order being preserved, unlike the case-insensitive [`Headers`].
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(raw: &str) -> Self {
        let mut entries = Vec::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = match pair.split_once('=') {
                Some((k, v)) => (decode(k), decode(v)),
                None => (decode(pair), String::new()),
            };
            entries.push((k, v));
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Minimal percent-decoding; `+` is left alone since Redfish query strings
/// don't use form-encoding.
fn decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Major*10 + minor, e.g. HTTP/1.1 is `11`.
    pub version: u8,
    pub path: String,
    pub raw_query: String,
    pub query: QueryParams,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub is_secure: bool,
    /// Lookup key into the process-wide Session Store rather than a direct
    /// reference, matching the "weak handle" ownership spec.md §3 calls for.
    pub session_token: Option<String>,
}

impl Request {
    pub fn new(method: Method, version: u8, target: &str) -> Self {
        let (path, raw_query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };
        let query = QueryParams::parse(&raw_query);
        Self {
            method,
            version,
            path,
            raw_query,
            query,
            headers: Headers::new(),
            body: Vec::new(),
            is_secure: false,
            session_token: None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get("host")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let req = Request::new(Method::Get, 11, "/redfish/v1/Chassis?$expand=1&tag=a&tag=b");
        assert_eq!(req.path, "/redfish/v1/Chassis");
        assert_eq!(req.query.get("$expand"), Some("1"));
        let tags: Vec<&str> = req.query.get_all("tag").collect();
        assert_eq!(tags, vec!["a", "b"]);
    }

    #[test]
    fn no_query_string() {
        let req = Request::new(Method::Get, 11, "/redfish/v1/");
        assert_eq!(req.path, "/redfish/v1/");
        assert_eq!(req.raw_query, "");
    }

    #[test]
    fn percent_decodes_query_values() {
        let q = QueryParams::parse("name=Acme%20Corp");
        assert_eq!(q.get("name"), Some("Acme Corp"));
    }
}
