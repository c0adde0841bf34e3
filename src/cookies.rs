//! Cookie extraction from stored headers.
//!
//! Pure functions, invoked on demand by the presentation layer. Malformed
//! cookies (no `=`, empty name) are skipped rather than reported.

use crate::entry::{header_values, Headers, NetworkEntry};
use indexmap::IndexMap;
use serde::Serialize;

/// A `name=value` pair from a `Cookie` request header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// One parsed `Set-Cookie` response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// Attribute name to value; flags such as `HttpOnly` map to `None`.
    pub attributes: IndexMap<String, Option<String>>,
}

impl SetCookie {
    /// Case-insensitive attribute lookup. The outer `Option` says whether the
    /// attribute is present, the inner one whether it carries a value.
    pub fn attribute(&self, name: &str) -> Option<Option<&str>> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

/// Split `name=value` on the first `=`, trimming both sides.
fn split_pair(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

/// Parse every `Cookie` header into ordered pairs.
pub fn parse_request_cookies(headers: &Headers) -> Vec<Cookie> {
    header_values(headers, "cookie")
        .flat_map(|header| header.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(split_pair)
        .map(|(name, value)| Cookie {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Render pairs back into a `Cookie` header value.
pub fn format_request_cookies(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse every `Set-Cookie` occurrence independently.
///
/// Some bridges fold repeated `Set-Cookie` headers into one value separated
/// by newlines; each line is treated as its own cookie. Commas are not split
/// on since they appear inside `Expires` dates.
pub fn parse_response_cookies(headers: &Headers) -> Vec<SetCookie> {
    header_values(headers, "set-cookie")
        .flat_map(str::lines)
        .filter_map(parse_set_cookie)
        .collect()
}

fn parse_set_cookie(line: &str) -> Option<SetCookie> {
    let mut segments = line.split(';');
    let (name, value) = split_pair(segments.next()?)?;

    let mut attributes = IndexMap::new();
    for segment in segments.map(str::trim).filter(|s| !s.is_empty()) {
        match segment.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if !key.is_empty() {
                    attributes.insert(key.to_string(), Some(value.trim().to_string()));
                }
            }
            None => {
                attributes.insert(segment.to_string(), None);
            }
        }
    }

    Some(SetCookie {
        name: name.to_string(),
        value: value.to_string(),
        attributes,
    })
}

/// Cookies exchanged by one entry, as shown in the cookie view.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EntryCookies {
    pub request: Vec<Cookie>,
    pub response: Vec<SetCookie>,
}

impl EntryCookies {
    /// HTTP entries read their request and response headers; SSE entries the
    /// headers captured at open. WebSocket entries carry no cookie view.
    pub fn of(entry: &NetworkEntry) -> Option<Self> {
        match entry {
            NetworkEntry::Http(http) => Some(Self {
                request: parse_request_cookies(&http.request.headers),
                response: http
                    .response
                    .as_ref()
                    .map(|response| parse_response_cookies(&response.headers))
                    .unwrap_or_default(),
            }),
            NetworkEntry::Sse(sse) => Some(Self {
                request: parse_request_cookies(&sse.request_headers),
                response: parse_response_cookies(&sse.response_headers),
            }),
            NetworkEntry::WebSocket(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::HeaderValue;
    use proptest::prelude::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), HeaderValue::from(*value)))
            .collect()
    }

    #[test]
    fn test_request_cookies_two_pairs() {
        let cookies = parse_request_cookies(&headers(&[("Cookie", "name=value; name2=value2")]));
        assert_eq!(
            cookies,
            vec![
                Cookie { name: "name".to_string(), value: "value".to_string() },
                Cookie { name: "name2".to_string(), value: "value2".to_string() },
            ]
        );
    }

    #[test]
    fn test_request_cookies_split_on_first_equals() {
        let cookies = parse_request_cookies(&headers(&[("cookie", "token=a=b==; x=")]));
        assert_eq!(cookies[0].value, "a=b==");
        assert_eq!(cookies[1].name, "x");
        assert_eq!(cookies[1].value, "");
    }

    #[test]
    fn test_request_cookies_skip_malformed() {
        let cookies =
            parse_request_cookies(&headers(&[("COOKIE", "broken; =nameless; ok=1;;  ")]));
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "ok");
    }

    #[test]
    fn test_request_cookies_absent_header() {
        assert!(parse_request_cookies(&headers(&[("Accept", "*/*")])).is_empty());
    }

    #[test]
    fn test_response_cookies_multiple_occurrences() {
        let mut map = headers(&[(
            "Set-Cookie",
            "session=abc; Path=/; HttpOnly",
        )]);
        map.insert(
            "set-cookie".to_string(),
            HeaderValue::Multiple(vec![
                "theme=dark; Expires=Wed, 21 Oct 2026 07:28:00 GMT".to_string(),
                "nonsense".to_string(),
            ]),
        );

        let cookies = parse_response_cookies(&map);
        assert_eq!(cookies.len(), 2);

        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].attribute("path"), Some(Some("/")));
        assert!(cookies[0].has_flag("httponly"));
        assert_eq!(cookies[0].attribute("HttpOnly"), Some(None));
        assert!(cookies[0].attribute("Expires").is_none());

        assert_eq!(cookies[1].name, "theme");
        assert_eq!(
            cookies[1].attribute("Expires"),
            Some(Some("Wed, 21 Oct 2026 07:28:00 GMT"))
        );
        assert!(!cookies[1].has_flag("HttpOnly"));
    }

    #[test]
    fn test_response_cookies_newline_folded() {
        let cookies = parse_response_cookies(&headers(&[(
            "set-cookie",
            "a=1; Secure\nb=2; SameSite=Lax",
        )]));
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].has_flag("secure"));
        assert_eq!(cookies[1].attribute("samesite"), Some(Some("Lax")));
    }

    #[test]
    fn test_entry_cookies_pending_http_has_no_response_cookies() {
        use crate::entry::{HttpEntry, HttpRequest, HttpStatus};

        let entry = NetworkEntry::Http(HttpEntry {
            id: "1".to_string(),
            url: "/a".to_string(),
            start_time: 0,
            status: HttpStatus::Pending,
            request: HttpRequest {
                method: "GET".to_string(),
                headers: headers(&[("Cookie", "a=1")]),
                body: None,
            },
            response: None,
            end_time: None,
            error: None,
        });

        let cookies = EntryCookies::of(&entry).unwrap();
        assert_eq!(cookies.request.len(), 1);
        assert!(cookies.response.is_empty());
        assert!(!cookies.is_empty());
    }

    proptest! {
        #[test]
        fn prop_request_parse_idempotent_on_output(input in "[ a-z0-9=;]{0,60}") {
            let first = parse_request_cookies(&headers(&[("Cookie", input.as_str())]));
            let rendered = format_request_cookies(&first);
            let second = parse_request_cookies(&headers(&[("Cookie", rendered.as_str())]));
            prop_assert_eq!(first, second);
        }
    }
}
