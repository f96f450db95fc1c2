//! OpenAPI document served next to a Swagger UI at `/api/docs`.

use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handler::{self, MessageResponse, SubmitResponse};
use crate::submission::ContactForm;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Contact Form API",
        version = "1.0.0",
        description = "Accepts contact form submissions, stores them and notifies the site owner by email and chat webhook.",
        license(name = "MIT License"),
        contact(name = "Site owner")
    ),
    paths(handler::root, handler::api, handler::receive_form),
    components(schemas(ContactForm, SubmitResponse, MessageResponse, ErrorResponse)),
    tags((name = "Contact", description = "Contact form submission"))
)]
pub struct ApiDoc;
