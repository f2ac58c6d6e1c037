use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::form::{self, Form};
use super::{Interceptor, Upstream};
use crate::flag::FlagPool;
use crate::store::TeamStore;

/// Intercepts challenge submissions: when the submitted key matches the
/// caller's per-team flag value, swaps in the value the upstream checker
/// expects and records the solve once the upstream confirms it.
pub struct CheckFlagInterceptor {
    store: Arc<TeamStore>,
    pool: Arc<FlagPool>,
    path: Regex,
}

impl CheckFlagInterceptor {
    pub fn new(store: Arc<TeamStore>, pool: Arc<FlagPool>) -> Self {
        // challenge ids are numeric or tag-shaped
        let path = Regex::new(r"/chal/[A-Za-z0-9_-]+/?$").unwrap();

        Self { store, pool, path }
    }
}

#[async_trait]
impl Interceptor for CheckFlagInterceptor {
    fn valid_request(&self, req: &Request<Bytes>) -> bool {
        req.method() == Method::POST && self.path.is_match(req.uri().path())
    }

    async fn intercept(&self, req: Request<Bytes>, upstream: &dyn Upstream) -> Response<Bytes> {
        let token = match form::session_token(&req) {
            Some(token) => token,
            None => return upstream.handle(req).await,
        };

        let team = match self.store.team_by_token(&token) {
            Ok(team) => team,
            Err(_) => {
                debug!("flag submission with unknown session, forwarding unchanged");
                return upstream.handle(req).await;
            }
        };

        let mut form = Form::from_request(&req);
        let key = match form.get("key") {
            Some(key) if !key.is_empty() => key,
            _ => return upstream.handle(req).await,
        };

        let matched = team
            .challenges()
            .into_iter()
            .find(|c| digest_eq(key.as_bytes(), c.value.as_bytes()));
        let chal = match matched {
            Some(chal) => chal,
            None => {
                // wrong flag, let the upstream reject it
                return upstream.handle(req).await;
            }
        };

        let value = match self.pool.flag_by_tag(&chal.tag) {
            Ok(value) => value,
            Err(err) => {
                warn!("flag pool lookup failed: {err}");
                return upstream.handle(req).await;
            }
        };

        form.set("key", &value);
        let req = form::rewrite_request(req, &form);

        let resp = upstream.handle(req).await;

        if upstream_accepted(resp.body()) && self.store.record_solve(&team, &chal.tag) {
            debug!("team {} completed challenge {}", team.email(), chal.tag);
        }

        resp
    }
}

/// Constant-time equality: fixed-length digests keep the comparison
/// independent of where the inputs first differ.
fn digest_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a) == Sha256::digest(b)
}

/// The upstream's checker answers `{"message":"Correct", "status": 1}` on
/// an accepted flag.
fn upstream_accepted(body: &[u8]) -> bool {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return false,
    };

    value.get("status").and_then(serde_json::Value::as_i64) == Some(1)
        || value.get("message").and_then(serde_json::Value::as_str) == Some("Correct")
}

#[cfg(test)]
mod tests {
    use http::header;
    use parking_lot::Mutex;

    use super::*;
    use crate::intercept::upstream_fn;
    use crate::flag::{FlagConfig, FlagSource};
    use crate::store::{Challenge, Tag, Team};

    const ACCEPT: &[u8] = br#"{"message":"Correct", "status": 1}"#;
    const REJECT: &[u8] = br#"{"message":"Incorrect", "status": 0}"#;

    fn tag(s: &str) -> Tag {
        Tag::new(s).unwrap()
    }

    fn submit(path: &str, key: &str, session: Option<&str>) -> Request<Bytes> {
        let mut form = Form::default();
        form.set("key", key);
        form.set("nonce", "some_nonce");
        let body = Bytes::from(form.encode());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://ctf.test{path}"))
            .header(header::CONTENT_TYPE, form::FORM_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, body.len());
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("session={session}"));
        }

        builder.body(body).unwrap()
    }

    fn echo_upstream(reply: &'static [u8]) -> (Arc<Mutex<Option<Form>>>, impl Upstream) {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);

        let upstream = upstream_fn(move |req: Request<Bytes>| {
            let record = Arc::clone(&record);
            async move {
                *record.lock() = Some(Form::from_request(&req));
                Response::new(Bytes::from_static(reply))
            }
        });

        (seen, upstream)
    }

    /// Store with one team whose per-team flag value is `abc`, pool entry
    /// `tst` resolving to the given upstream value.
    fn setup(source: FlagSource) -> (Arc<TeamStore>, Arc<FlagPool>, String) {
        let pool = Arc::new(FlagPool::new());
        let upstream_value = pool
            .add_flag(
                FlagConfig {
                    tag: tag("tst"),
                    source,
                },
                1,
            )
            .unwrap();

        let store = Arc::new(TeamStore::new());
        let team = store
            .create_team(Team::new(
                "some@email.com",
                "name_goes_here",
                "passhere",
                vec![Challenge::new(tag("tst"), "abc")],
            ))
            .unwrap();
        store.create_token_for_team("known_session", &team).unwrap();

        (store, pool, upstream_value)
    }

    #[tokio::test]
    async fn correct_static_flag_is_substituted() {
        let (store, pool, upstream_value) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(Arc::clone(&store), pool);

        let req = submit("/chal/1", "abc", Some("known_session"));
        assert!(interceptor.valid_request(&req));

        let (seen, upstream) = echo_upstream(ACCEPT);
        let resp = interceptor.intercept(req, &upstream).await;

        // response body passes through untouched
        assert_eq!(resp.body().as_ref(), ACCEPT);

        let received = seen.lock().clone().unwrap();
        assert_eq!(received.get("key").as_deref(), Some(upstream_value.as_str()));
        assert_eq!(received.get("nonce").as_deref(), Some("some_nonce"));

        let team = store.team_by_email("some@email.com").unwrap();
        assert!(team.challenge(&tag("tst")).unwrap().completed_at.is_some());
        assert_eq!(team.solved(), vec![tag("tst")]);
    }

    #[tokio::test]
    async fn correct_dynamic_flag_is_substituted() {
        std::env::set_var("FORPOST_TEST_FLAG_DYN", "env-flag-value");
        let (store, pool, upstream_value) =
            setup(FlagSource::Env("FORPOST_TEST_FLAG_DYN".to_owned()));
        assert_eq!(upstream_value, "env-flag-value");

        let interceptor = CheckFlagInterceptor::new(Arc::clone(&store), pool);
        let (seen, upstream) = echo_upstream(ACCEPT);
        interceptor
            .intercept(submit("/chal/1", "abc", Some("known_session")), &upstream)
            .await;

        let received = seen.lock().clone().unwrap();
        assert_eq!(received.get("key").as_deref(), Some("env-flag-value"));

        let team = store.team_by_email("some@email.com").unwrap();
        assert_eq!(team.solved(), vec![tag("tst")]);
    }

    #[tokio::test]
    async fn incorrect_flag_passes_through() {
        let (store, pool, _) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(Arc::clone(&store), pool);

        let (seen, upstream) = echo_upstream(REJECT);
        let resp = interceptor
            .intercept(submit("/chal/1", "incorrect", Some("known_session")), &upstream)
            .await;

        assert_eq!(resp.body().as_ref(), REJECT);

        let received = seen.lock().clone().unwrap();
        assert_eq!(received.get("key").as_deref(), Some("incorrect"));
        assert_eq!(received.get("nonce").as_deref(), Some("some_nonce"));

        let team = store.team_by_email("some@email.com").unwrap();
        assert!(team.challenge(&tag("tst")).unwrap().completed_at.is_none());
        assert!(team.solved().is_empty());
    }

    #[tokio::test]
    async fn upstream_rejection_records_nothing() {
        // right per-team key, but the upstream says no
        let (store, pool, _) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(Arc::clone(&store), pool);

        let (_, upstream) = echo_upstream(REJECT);
        interceptor
            .intercept(submit("/chal/1", "abc", Some("known_session")), &upstream)
            .await;

        let team = store.team_by_email("some@email.com").unwrap();
        assert!(team.challenge(&tag("tst")).unwrap().completed_at.is_none());
    }

    #[tokio::test]
    async fn repeated_success_is_idempotent() {
        let (store, pool, _) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(Arc::clone(&store), pool);

        let (_, upstream) = echo_upstream(ACCEPT);
        interceptor
            .intercept(submit("/chal/1", "abc", Some("known_session")), &upstream)
            .await;

        let team = store.team_by_email("some@email.com").unwrap();
        let completed = team.challenge(&tag("tst")).unwrap().completed_at.unwrap();

        interceptor
            .intercept(submit("/chal/1", "abc", Some("known_session")), &upstream)
            .await;

        assert_eq!(
            team.challenge(&tag("tst")).unwrap().completed_at.unwrap(),
            completed
        );
        assert_eq!(team.solved().len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_forwards_unchanged() {
        let (store, pool, _) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(store, pool);

        let (seen, upstream) = echo_upstream(ACCEPT);
        interceptor
            .intercept(submit("/chal/1", "abc", Some("who_dis")), &upstream)
            .await;
        let received = seen.lock().clone().unwrap();
        assert_eq!(received.get("key").as_deref(), Some("abc"));

        let (seen, upstream) = echo_upstream(ACCEPT);
        interceptor
            .intercept(submit("/chal/1", "abc", None), &upstream)
            .await;
        let received = seen.lock().clone().unwrap();
        assert_eq!(received.get("key").as_deref(), Some("abc"));
    }

    #[test]
    fn claim_predicate() {
        let (store, pool, _) = setup(FlagSource::Static("abcde".to_owned()));
        let interceptor = CheckFlagInterceptor::new(store, pool);

        assert!(interceptor.valid_request(&submit("/chal/1", "abc", None)));
        assert!(interceptor.valid_request(&submit("/chal/web-101", "abc", None)));
        assert!(!interceptor.valid_request(&submit("/login", "abc", None)));

        let index = Request::builder()
            .method(Method::GET)
            .uri("http://ctf.test/")
            .body(Bytes::new())
            .unwrap();
        assert!(!interceptor.valid_request(&index));
    }

    #[test]
    fn success_detection() {
        assert!(upstream_accepted(ACCEPT));
        assert!(upstream_accepted(br#"{"status": 1}"#));
        assert!(upstream_accepted(br#"{"message":"Correct"}"#));
        assert!(!upstream_accepted(REJECT));
        assert!(!upstream_accepted(b"<html>not json</html>"));
    }

    #[test]
    fn digest_comparison() {
        assert!(digest_eq(b"abc", b"abc"));
        assert!(!digest_eq(b"abc", b"abd"));
        assert!(!digest_eq(b"abc", b"abcd"));
    }
}
