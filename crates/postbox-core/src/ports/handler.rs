//! RequestHandler port - 下流（downstream）への配送先

use async_trait::async_trait;

use crate::domain::{Request, Response};

/// The downstream target a stored request is replayed against.
///
/// Transport is not assumed: an HTTP client, an in-process service or a plain
/// function all fit. A handler that cannot reach its target should answer
/// with a non-success `Response` rather than panic.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Request) -> Response;
}

#[async_trait]
impl<F> RequestHandler for F
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    async fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Method, Status};

    #[tokio::test]
    async fn plain_functions_are_handlers() {
        let handler = |req: &Request| {
            if req.uri.starts_with("/ok") {
                Response::new(Status::OK)
            } else {
                Response::new(Status::NOT_FOUND)
            }
        };

        let ok = handler.handle(&Request::new(Method::Get, "/ok")).await;
        let missing = handler.handle(&Request::new(Method::Get, "/nope")).await;

        assert_eq!(ok.status, Status::OK);
        assert_eq!(missing.status, Status::NOT_FOUND);
    }
}
