use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod assignments;
pub mod auth;
pub mod health;
pub mod imports;
pub mod projects;
pub mod users;

fn cors_layer(allowed: Option<&String>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_ref());
    let body_limit = state.config.max_upload_bytes();

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/password", post(auth::change_password));

    let projects_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route("/imports", post(imports::stage_new_project_import))
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:id/map", get(projects::project_map))
        .route("/:id/strip-building", post(projects::strip_building))
        .route("/:id/complete", post(projects::complete_project))
        .route("/:id/imports", post(imports::stage_project_import))
        .route(
            "/:id/assignments/bulk",
            post(assignments::bulk_update_assignments),
        )
        .route(
            "/:id/assignments/:assignment_id",
            get(assignments::get_assignment).patch(assignments::update_assignment),
        )
        .route(
            "/:id/assignments/:assignment_id/photos",
            post(assignments::upload_photo),
        )
        .route(
            "/:id/assignments/:assignment_id/photos/:photo_type",
            axum::routing::delete(assignments::delete_photos),
        );

    let imports_routes = Router::new()
        .route(
            "/customers/:token",
            get(imports::get_customer_import).delete(imports::cancel_customer_import),
        )
        .route(
            "/customers/:token/rows/:row_id",
            patch(imports::update_customer_row).delete(imports::delete_customer_row),
        )
        .route(
            "/customers/:token/confirm",
            post(imports::confirm_customer_import),
        )
        .route("/users", post(imports::stage_user_import))
        .route(
            "/users/:token",
            get(imports::get_user_import).delete(imports::cancel_user_import),
        )
        .route(
            "/users/:token/rows/:row_id",
            patch(imports::update_user_row).delete(imports::delete_user_row),
        )
        .route("/users/:token/confirm", post(imports::confirm_user_import));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route("/choices", get(users::user_choices))
        .route("/bulk-delete", post(users::bulk_delete_users))
        .route("/:id", patch(users::update_user));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/projects", projects_routes)
        .nest("/api/imports", imports_routes)
        .nest("/api/users", users_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
