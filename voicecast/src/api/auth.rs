//! Bearer-token middleware guarding the control plane.

use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};

use crate::error::ApiError;

/// Middleware factory requiring a bearer token on every request when one
/// is configured. The token may be supplied via the `Authorization:
/// Bearer <token>` header or a `?token=` query parameter.
#[derive(Clone, Debug)]
pub struct Auth {
    token: Option<Rc<String>>,
}

impl Auth {
    /// Creates the middleware. With `token == None`, every request is
    /// allowed through unauthenticated.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Rc::new),
        }
    }
}

impl<S, B> Transform<S> for Auth
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error>
        + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = futures::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        futures::future::ready(Ok(AuthMiddleware {
            service: Rc::new(service),
            token: self.token.clone(),
        }))
    }
}

/// The actual per-request guard, wrapping the inner service.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    service: Rc<S>,
    token: Option<Rc<String>>,
}

impl<S, B> Service for AuthMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error>
        + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: ServiceRequest) -> Self::Future {
        let expected = self.token.clone();
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let expected = match expected {
                Some(token) => token,
                None => return service.call(req).await,
            };

            if token_matches(&req, &expected) {
                service.call(req).await
            } else {
                Err(ApiError::from(crate::error::CoreError::Unauthorized).into())
            }
        })
    }
}

fn token_matches(req: &ServiceRequest, expected: &str) -> bool {
    if let Some(header) = req.headers().get(actix_web::http::header::AUTHORIZATION) {
        if let Ok(value) = header.to_str() {
            if let Some(bearer) = value.strip_prefix("Bearer ") {
                return bearer == expected;
            }
        }
    }
    req.query_string()
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map_or(false, |token| token == expected)
}
