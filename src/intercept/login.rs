use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response};
use tracing::{debug, warn};

use super::form::{self, Form};
use super::{Interceptor, Upstream};
use crate::store::TeamStore;

/// Re-injects the platform-owned password on login so participants keep
/// authenticating against credentials they never saw.
pub struct LoginInterceptor {
    store: Arc<TeamStore>,
}

impl LoginInterceptor {
    pub fn new(store: Arc<TeamStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Interceptor for LoginInterceptor {
    fn valid_request(&self, req: &Request<Bytes>) -> bool {
        req.method() == Method::POST && req.uri().path().ends_with("/login")
    }

    async fn intercept(&self, req: Request<Bytes>, upstream: &dyn Upstream) -> Response<Bytes> {
        let mut form = Form::from_request(&req);

        // the upstream's login form calls the email "name"
        let name = form.get("name").unwrap_or_default();
        let team = match self.store.team_by_email(&name) {
            Ok(team) => team,
            Err(_) => {
                // unknown team: the upstream owns the failure messaging
                debug!("login for unknown team {name:?}, forwarding unchanged");
                return upstream.handle(req).await;
            }
        };

        form.set("password", team.password());
        let req = form::rewrite_request(req, &form);

        let resp = upstream.handle(req).await;

        for token in form::session_set_cookies(&resp) {
            if let Err(err) = self.store.create_token_for_team(&token, &team) {
                warn!("failed to bind session token for {}: {err}", team.email());
            }
        }

        resp
    }
}
