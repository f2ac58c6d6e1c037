use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::Report;
use http::{Method, Request, Response};
use rand::RngCore;
use tracing::{debug, warn};

use super::form::{self, Form};
use super::{Interceptor, Upstream};
use crate::store::{Challenge, StoreError, Team, TeamStore};
use crate::survey::{self, ExtraFields};

/// Pre-registration hook, run in registration order before the upstream
/// sees anything. An error aborts the registration and surfaces on the
/// re-rendered page.
pub type RegisterHook = Box<dyn Fn(&Team) -> Result<(), Report> + Send + Sync>;

/// Rewrites the registration POST: swaps the participant's password for a
/// platform-owned secret, strips survey fields, creates the team and binds
/// the session cookie the upstream hands back.
pub struct RegisterInterceptor {
    store: Arc<TeamStore>,
    challenges: Vec<Challenge>,
    survey: Option<ExtraFields>,
    hooks: Vec<RegisterHook>,
}

impl RegisterInterceptor {
    pub fn new(store: Arc<TeamStore>) -> Self {
        Self {
            store,
            challenges: Vec::new(),
            survey: None,
            hooks: Vec::new(),
        }
    }

    /// Challenge set handed to every team created through registration.
    pub fn with_challenges(mut self, challenges: Vec<Challenge>) -> Self {
        self.challenges = challenges;
        self
    }

    pub fn with_survey(mut self, survey: ExtraFields) -> Self {
        self.survey = Some(survey);
        self
    }

    pub fn with_hook(mut self, hook: RegisterHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// 128 bits of CSPRNG output. The participant never learns this value,
    /// so the platform stays the only way into the upstream account.
    fn generate_password() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        hex::encode(bytes)
    }

    /// Local re-render shown when registration data is rejected before the
    /// upstream is involved. Identity fields come back empty; the nonce is
    /// kept so the participant can resubmit.
    fn registration_page(&self, alert: &str, nonce: &str) -> Response<Bytes> {
        let survey_html = self
            .survey
            .as_ref()
            .map(ExtraFields::html)
            .unwrap_or_default();

        let body = format!(
            r#"<!doctype html>
<html>
<head><title>Register</title></head>
<body>
<div class="alert alert-danger" role="alert">{alert}</div>
<form class="form-horizontal" method="post">
<input type="text" name="name" value="">
<input type="email" name="email" value="">
<input type="password" name="password" value="">
{survey_html}
<input type="hidden" name="nonce" value="{nonce}">
<button type="submit">Submit</button>
</form>
</body>
</html>
"#,
            alert = survey::escape(alert),
            nonce = survey::escape(nonce),
        );

        form::html_response(body)
    }
}

#[async_trait]
impl Interceptor for RegisterInterceptor {
    fn valid_request(&self, req: &Request<Bytes>) -> bool {
        req.method() == Method::POST && req.uri().path().ends_with("/register")
    }

    async fn intercept(&self, req: Request<Bytes>, upstream: &dyn Upstream) -> Response<Bytes> {
        let mut form = Form::from_request(&req);

        let email = form.get("email").unwrap_or_default();
        let name = form.get("name").unwrap_or_default();
        if email.is_empty() || name.is_empty() || form.get("password").unwrap_or_default().is_empty()
        {
            // incomplete form, the upstream renders its own complaint
            debug!("registration form incomplete, forwarding unchanged");
            return upstream.handle(req).await;
        }

        let nonce = form.get("nonce").unwrap_or_default();

        let password = Self::generate_password();
        let team = Team::new(&email, &name, &password, self.challenges.clone());

        if let Some(survey) = &self.survey {
            if survey.agreed(&form) {
                for selector in survey.selectors() {
                    if let Err(err) = selector.read_metadata(&form, &team) {
                        debug!("rejected registration for {email}: {err}");
                        return self.registration_page(&err.to_string(), &nonce);
                    }
                }
            }

            // the upstream has no use for the survey answers
            for selector in survey.selectors() {
                form.remove(selector.name());
            }
            form.remove(survey::CARRIER_FIELD);
        }

        for hook in &self.hooks {
            if let Err(err) = hook(&team) {
                debug!("registration hook rejected {email}: {err}");
                return self.registration_page(&err.to_string(), &nonce);
            }
        }

        let team = match self.store.create_team(team) {
            Ok(team) => team,
            Err(StoreError::TeamExists) => {
                debug!("duplicate registration for {email}");
                return self.registration_page("Team already exists", &nonce);
            }
            Err(err) => return self.registration_page(&err.to_string(), &nonce),
        };
        debug!("created team {}", team.email());

        form.set("password", &password);
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
