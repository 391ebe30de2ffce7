use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::ResponderError;
use crate::models::{ResponseOutcome, RespondParams, RetrievalResult};
use crate::responder::Responder;

pub struct ApiError(pub ResponderError);

impl From<ResponderError> for ApiError {
    fn from(err: ResponderError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ResponderError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ResponderError::Dataset(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ResponderError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    responder: Arc<Responder>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    k: Option<usize>,
}

async fn respond_handler(
    State(state): State<AppState>,
    Json(params): Json<RespondParams>,
) -> Result<Json<ResponseOutcome>, ApiError> {
    let outcome = state
        .responder
        .respond(&params.text, params.rating, params.brand_voice.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<RetrievalResult>, ApiError> {
    let q = params.q.unwrap_or_default();
    Ok(Json(state.responder.search(&q, params.k).await?))
}

async fn reload_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = state.responder.reload().await?;
    Ok(Json(json!({ "status": "reloaded", "entries": count })))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let index = state.responder.snapshot().await;
    Json(json!({
        "status": "ok",
        "faq_entries": index.len(),
        "embedding_model": index.model_id(),
    }))
}

pub fn api_router(responder: Arc<Responder>) -> Router {
    let state = AppState { responder };
    Router::new()
        .route("/api/respond", post(respond_handler))
        .route("/api/faqs/search", get(search_handler))
        .route("/api/faqs/reload", post(reload_handler))
        .route("/api/health", get(health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::ResponseComposer;
    use crate::embedding::HashEmbedder;
    use crate::error::{ResponderResult, ServiceFailure};
    use crate::generation::{CompletionRequest, Generate};
    use crate::models::FaqEntry;
    use crate::sentiment::SentimentClassifier;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl Generate for Canned {
        async fn complete(&self, _request: &CompletionRequest) -> ResponderResult<String> {
            match self.0 {
                Some(text) => Ok(text.to_string()),
                None => Err(ResponderError::external(
                    "generation",
                    ServiceFailure::RateLimited,
                    "slow down",
                )),
            }
        }
    }

    async fn app(reply: Option<&'static str>) -> Router {
        let responder = Responder::new(
            Arc::new(HashEmbedder::new(128)),
            SentimentClassifier::lexicon(),
            ResponseComposer::new(Arc::new(Canned(reply)), "Acme"),
        );
        responder
            .install(vec![FaqEntry::new("Freeze card", "Tap Freeze in the Cards tab.")])
            .await
            .unwrap();
        api_router(Arc::new(responder))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn respond_returns_outcome() {
        let resp = app(Some("Thanks for the review."))
            .await
            .oneshot(post_json("/api/respond", json!({ "text": "Love it", "rating": 5 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body["reply"]["text"], "Thanks for the review.");
        assert_eq!(body["sentiment"], "positive");
        assert_eq!(body["rating"], 5);
    }

    #[tokio::test]
    async fn bad_rating_is_400() {
        let resp = app(Some("unused"))
            .await
            .oneshot(post_json("/api/respond", json!({ "text": "ok", "rating": 7 })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(read_body(resp).await["error"].as_str().unwrap().contains("rating"));
    }

    #[tokio::test]
    async fn generation_failure_is_502() {
        let resp = app(None)
            .await
            .oneshot(post_json("/api/respond", json!({ "text": "Card got frozen" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn reload_without_dataset_is_422() {
        let resp = app(None)
            .await
            .oneshot(Request::post("/api/faqs/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn search_and_health() {
        let router = app(None).await;
        let resp = router
            .clone()
            .oneshot(
                Request::get("/api/faqs/search?q=freeze%20card&k=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body[0]["entry"]["question"], "Freeze card");

        let resp = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = read_body(resp).await;
        assert_eq!(body["faq_entries"], 1);
        assert_eq!(body["embedding_model"], "hash-128");
    }

    #[tokio::test]
    async fn empty_search_is_400() {
        let resp = app(None)
            .await
            .oneshot(Request::get("/api/faqs/search").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
