use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

pub mod form;

mod register;
pub use register::{RegisterHook, RegisterInterceptor};
mod login;
pub use login::LoginInterceptor;
mod checkflag;
pub use checkflag::CheckFlagInterceptor;

/// The next handler a claimed request is forwarded to. The gateway's
/// forwarder implements this; tests wrap async closures via [`upstream_fn`].
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn handle(&self, req: Request<Bytes>) -> Response<Bytes>;
}

pub struct UpstreamFn<F>(F);

/// Adapts an async closure into an [`Upstream`] handler.
pub fn upstream_fn<F, Fut>(f: F) -> UpstreamFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Response<Bytes>> + Send,
{
    UpstreamFn(f)
}

#[async_trait]
impl<F, Fut> Upstream for UpstreamFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Response<Bytes>> + Send,
{
    async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        (self.0)(req).await
    }
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Side-effect free claim predicate.
    fn valid_request(&self, req: &Request<Bytes>) -> bool;

    /// Handles a claimed request end to end. The interceptor owns the
    /// response; `upstream` is the next handler in line.
    async fn intercept(&self, req: Request<Bytes>, upstream: &dyn Upstream) -> Response<Bytes>;
}

/// Ordered front door: the first interceptor claiming a request handles
/// it; unclaimed requests pass straight through to the upstream.
pub struct Chain {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Box<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    pub async fn handle(&self, req: Request<Bytes>, upstream: &dyn Upstream) -> Response<Bytes> {
        for interceptor in &self.interceptors {
            if interceptor.valid_request(&req) {
                return interceptor.intercept(req, upstream).await;
            }
        }

        upstream.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use http::Method;

    use super::*;

    struct Claimer {
        suffix: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Interceptor for Claimer {
        fn valid_request(&self, req: &Request<Bytes>) -> bool {
            req.uri().path().ends_with(self.suffix)
        }

        async fn intercept(&self, _req: Request<Bytes>, _upstream: &dyn Upstream) -> Response<Bytes> {
            Response::new(Bytes::from_static(self.reply.as_bytes()))
        }
    }

    fn get(path: &str) -> Request<Bytes> {
        Request::builder()
            .method(Method::GET)
            .uri(format!("http://ctf.test{path}"))
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn unclaimed_requests_pass_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let upstream = upstream_fn(move |_req: Request<Bytes>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Response::new(Bytes::from_static(b"upstream"))
            }
        });

        let chain = Chain::new(vec![Box::new(Claimer {
            suffix: "/register",
            reply: "claimed",
        })]);

        let resp = chain.handle(get("/"), &upstream).await;
        assert_eq!(resp.body().as_ref(), b"upstream");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_claiming_interceptor_wins() {
        let upstream = upstream_fn(|_req: Request<Bytes>| async move {
            Response::new(Bytes::from_static(b"upstream"))
        });

        let chain = Chain::new(vec![
            Box::new(Claimer {
                suffix: "/register",
                reply: "first",
            }),
            Box::new(Claimer {
                suffix: "/register",
                reply: "second",
            }),
        ]);

        let resp = chain.handle(get("/register"), &upstream).await;
        assert_eq!(resp.body().as_ref(), b"first");
    }
}
