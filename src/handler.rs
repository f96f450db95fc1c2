use crate::error::{AppError, ErrorResponse};
use crate::notifier::Notifier;
use crate::openapi::ApiDoc;
use crate::store::SubmissionStore;
use crate::submission::{ContactForm, Submission};
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{HeaderValue, Method},
    routing::{get, post},
    Form, Json, Router,
};
use futures::future::join_all;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubmissionStore>,
    pub notifiers: Arc<[Arc<dyn Notifier>]>,
}

impl AppState {
    pub fn new(store: Arc<dyn SubmissionStore>, notifiers: Vec<Arc<dyn Notifier>>) -> AppState {
        AppState {
            store,
            notifiers: notifiers.into(),
        }
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api", get(api))
        .route("/submit-contact-form", post(receive_form))
        .route("/submit_contact_form", post(receive_form))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(cors(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid allowed origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Contact",
    responses((status = 200, description = "Liveness message", body = MessageResponse))
)]
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Hello World".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api",
    tag = "Contact",
    responses((status = 200, description = "Static API message", body = MessageResponse))
)]
pub async fn api() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Hello API".to_string(),
    })
}

/// A contact form whose five fields are all present and non-blank.
pub struct ValidatedForm(pub ContactForm);

#[async_trait]
impl<S> FromRequest<S> for ValidatedForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(form) = Form::<ContactForm>::from_request(req, state).await?;

        let blank = form.blank_fields();
        if !blank.is_empty() {
            return Err(AppError::Validation(format!(
                "Missing required fields: {}",
                blank.join(", ")
            )));
        }
        Ok(ValidatedForm(form))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
    pub id: i64,
}

/// Stores the submission, then notifies operators. Only a storage failure
/// fails the request. Also served at `/submit_contact_form`.
#[utoipa::path(
    post,
    path = "/submit-contact-form",
    tag = "Contact",
    request_body(content = ContactForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Submission stored", body = SubmitResponse),
        (status = 422, description = "Missing or blank field", body = ErrorResponse),
        (status = 500, description = "Submission could not be stored", body = ErrorResponse)
    )
)]
pub async fn receive_form(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    ValidatedForm(form): ValidatedForm,
) -> Result<Json<SubmitResponse>, AppError> {
    info!("Client connected {}", addr.ip());
    let submission = Submission::received(form);
    debug!(
        name = %submission.form.name,
        email = %submission.form.email,
        phone = %submission.form.phone,
        title = %submission.form.title,
        created_at = %submission.created_at,
        "Contact form received"
    );

    let stored = state.store.save(submission).await?;
    info!("Stored submission {} from {}", stored.id, addr.ip());

    let outcomes = join_all(state.notifiers.iter().map(|n| n.notify(&stored))).await;
    for (notifier, delivered) in state.notifiers.iter().zip(outcomes) {
        if !delivered {
            warn!(
                "{} notification for submission {} was not delivered",
                notifier.name(),
                stored.id
            );
        }
    }

    Ok(Json(SubmitResponse {
        success: true,
        message: "Form submitted successfully".to_string(),
        id: stored.id,
    }))
}
