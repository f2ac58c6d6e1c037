use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use url::form_urlencoded;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const SESSION_COOKIE: &str = "session";

/// A buffered urlencoded form body. Field order is preserved so a rewrite
/// ships the same bytes the browser sent, give or take the edited fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    fields: Vec<(String, String)>,
}

impl Form {
    pub fn parse(body: &[u8]) -> Self {
        Self {
            fields: form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    pub fn from_request(req: &Request<Bytes>) -> Self {
        Self::parse(req.body())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Replaces the first occurrence in place, appending when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_owned(),
            None => self.fields.push((key.to_owned(), value.to_owned())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.fields.retain(|(k, _)| k != key);
    }

    pub fn encode(&self) -> String {
        let mut ser = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.fields {
            ser.append_pair(k, v);
        }

        ser.finish()
    }
}

/// Swaps the request body for the rewritten form, keeping the rest of the
/// head intact. Content-Length and Content-Type are recomputed so the
/// upstream never sees a stale length.
pub fn rewrite_request(req: Request<Bytes>, form: &Form) -> Request<Bytes> {
    let (mut parts, _) = req.into_parts();
    let body = Bytes::from(form.encode());

    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    Request::from_parts(parts, body)
}

/// Value of the `session` cookie on the request, if any.
pub fn session_token(req: &Request<Bytes>) -> Option<String> {
    for value in req.headers().get_all(header::COOKIE) {
        let raw = match value.to_str() {
            Ok(raw) => raw,
            Err(_) => continue,
        };

        for pair in raw.split(';') {
            if let Some((name, val)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE {
                    return Some(val.to_owned());
                }
            }
        }
    }

    None
}

/// Every `session` token the upstream response sets.
pub fn session_set_cookies(resp: &Response<Bytes>) -> Vec<String> {
    let mut tokens = Vec::new();

    for value in resp.headers().get_all(header::SET_COOKIE) {
        let raw = match value.to_str() {
            Ok(raw) => raw,
            Err(_) => continue,
        };

        if let Some((name, val)) = raw.split(';').next().and_then(|c| c.split_once('=')) {
            if name.trim() == SESSION_COOKIE {
                tokens.push(val.trim().to_owned());
            }
        }
    }

    tokens
}

pub fn html_response(body: String) -> Response<Bytes> {
    let body = Bytes::from(body);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CONTENT_LENGTH, body.len())
        .body(body)
        .expect("static response head")
}
