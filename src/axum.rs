//! Axum integration: a tower layer running the request pipeline and a
//! [`Principal`] extractor for handlers behind it.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::context::Principal;
use crate::error::Error;
use crate::pipeline::{Admission, RequestPipeline};
use crate::policy::{PolicyEngine, RbacPolicyEngine};
use crate::store::TokenStore;

use ::axum::body::Body;
use ::axum::extract::FromRequestParts;
use ::axum::http::header::AUTHORIZATION;
use ::axum::http::request::Parts;
use ::axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use ::axum::response::{IntoResponse, Response};
use ::tower::{Layer, Service};

/// Response header carrying the machine-readable reason of a rejection.
pub const REASON_HEADER: &str = "x-reason-code";

/// Rejection produced by [`GuardService`] and the [`Principal`] extractor.
#[derive(Debug)]
pub struct GuardRejection {
    status: StatusCode,
    reason: &'static str,
}

impl GuardRejection {
    /// HTTP status sent to the client.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Value of the [`REASON_HEADER`] header.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl From<&Error> for GuardRejection {
    fn from(err: &Error) -> Self {
        let code = err.reason_code();
        let status = if code.is_unauthenticated() {
            StatusCode::UNAUTHORIZED
        } else if code.is_denial() {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            reason: code.as_str(),
        }
    }
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.reason).into_response();
        response
            .headers_mut()
            .insert(REASON_HEADER, HeaderValue::from_static(self.reason));
        response
    }
}

/// Middleware layer that runs [`RequestPipeline::authorize`] for every request.
#[derive(Debug)]
pub struct GuardLayer<S, P = RbacPolicyEngine> {
    pipeline: Arc<RequestPipeline<S, P>>,
}

impl<S, P> Clone for GuardLayer<S, P> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<S, P> GuardLayer<S, P> {
    /// Creates a new guard layer.
    pub fn new(pipeline: Arc<RequestPipeline<S, P>>) -> Self {
        Self { pipeline }
    }
}

impl<S, P, Inner> Layer<Inner> for GuardLayer<S, P> {
    type Service = GuardService<Inner, S, P>;

    fn layer(&self, inner: Inner) -> Self::Service {
        GuardService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

/// Middleware service that admits or rejects requests.
///
/// Granted requests carry their [`Principal`] and
/// [`Grant`](crate::pipeline::Grant) in the request extensions.
#[derive(Debug)]
pub struct GuardService<Inner, S, P = RbacPolicyEngine> {
    inner: Inner,
    pipeline: Arc<RequestPipeline<S, P>>,
}

impl<Inner: Clone, S, P> Clone for GuardService<Inner, S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

impl<Inner, S, P> Service<Request<Body>> for GuardService<Inner, S, P>
where
    Inner: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    S: TokenStore + 'static,
    P: PolicyEngine + 'static,
{
    type Response = Response;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let pipeline = Arc::clone(&self.pipeline);

        Box::pin(async move {
            let operation = req.uri().path().to_string();
            let bearer = bearer_token(req.headers());

            match pipeline.authorize(&operation, bearer.as_deref()).await {
                Ok(Admission::Public) => {}
                Ok(Admission::Granted(grant)) => {
                    req.extensions_mut().insert(grant.principal.clone());
                    req.extensions_mut().insert(grant);
                }
                Err(err) => {
                    let rejection = GuardRejection::from(&err);
                    if rejection.status.is_server_error() {
                        tracing::error!(error = %err, operation = %operation, "authorization failed");
                    }
                    return Ok(rejection.into_response());
                }
            }

            poll_fn(|cx| inner.poll_ready(cx)).await?;
            inner.call(req).await
        })
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = GuardRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or_else(|| {
                GuardRejection::from(&Error::InvalidToken("no authenticated principal".to_string()))
            })
    }
}

/// Returns the token with any `Bearer ` prefix removed, or `None` without a header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?;
    let value = value.to_str().unwrap_or_default();
    Some(value.strip_prefix("Bearer ").unwrap_or(value).to_string())
}
