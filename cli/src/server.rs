use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::Query as RepeatedQuery;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::generate_token;
use potluck_core::error::{MembershipError, ValidationError};
use potluck_core::models::{
    AuthorWithRecipes, Ingredient, NewRecipe, NewUser, RecipeDetail, RecipeFilter, RecipeSummary,
    Tag, User, UserView,
};
use potluck_core::service::PotluckService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<PotluckService>>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, PotluckService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The user behind the request's bearer token, if any.
#[derive(Clone)]
struct Viewer(Option<User>);

impl Viewer {
    fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|u| u.id)
    }

    fn require(self) -> Result<User, ApiError> {
        self.0.ok_or(ApiError::Unauthorized(
            "Authentication credentials were not provided".to_string(),
        ))
    }
}

// --- Request / Response types ---

#[derive(Serialize)]
struct RegisteredUser {
    #[serde(flatten)]
    user: User,
    token: String,
}

#[derive(Deserialize)]
struct RecipesLimitQuery {
    recipes_limit: Option<usize>,
}

#[derive(Deserialize)]
struct IngredientQuery {
    name: Option<String>,
}

/// `tags` may repeat (`tags=a&tags=b`) or carry a comma list (`tags=a,b`).
#[derive(Deserialize)]
struct RecipeListQuery {
    author: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
    is_favorited: Option<String>,
    is_in_shopping_cart: Option<String>,
}

impl RecipeListQuery {
    fn into_filter(self) -> RecipeFilter {
        RecipeFilter {
            author: self.author,
            tags: self
                .tags
                .iter()
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            is_favorited: is_truthy(self.is_favorited.as_deref()),
            is_in_shopping_cart: is_truthy(self.is_in_shopping_cart.as_deref()),
        }
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "True"))
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ValidationError>() {
            Ok(invalid) => Self::BadRequest(invalid.to_string()),
            Err(err) => Self::Internal(err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<MembershipError> for ApiError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::TargetNotFound { .. } => Self::NotFound(err.to_string()),
            MembershipError::AlreadyExists { .. }
            | MembershipError::NotFound { .. }
            | MembershipError::SelfReference { .. } => Self::BadRequest(err.to_string()),
            MembershipError::Store(err) => Self::Internal(err),
        }
    }
}

// --- Middleware ---

/// Resolve the bearer token to a user. A token that matches nobody is
/// rejected outright; a missing header leaves the request anonymous.
async fn resolve_viewer(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim().to_string());

    let viewer = match token {
        None => Viewer(None),
        Some(token) => {
            let found = state.service().user_by_token(&token);
            match found {
                Ok(Some(user)) => Viewer(Some(user)),
                Ok(None) => {
                    warn!("rejected unknown API token");
                    return ApiError::Unauthorized("Invalid token".to_string()).into_response();
                }
                Err(err) => return ApiError::Internal(err).into_response(),
            }
        }
    };

    request.extensions_mut().insert(viewer);
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Users ---

async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let Json(req) = payload?;
    let token = generate_token();
    let user = state.service().register_user(&req, &token)?;
    Ok((StatusCode::CREATED, Json(RegisteredUser { user, token })))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<Json<UserView>, ApiError> {
    let view = state
        .service()
        .user_view(id, viewer.id())?
        .ok_or_else(|| ApiError::NotFound(format!("User {id} not found")))?;
    Ok(Json(view))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Query(query): Query<RecipesLimitQuery>,
) -> Result<Json<Vec<AuthorWithRecipes>>, ApiError> {
    let viewer = viewer.require()?;
    let authors = state
        .service()
        .subscriptions(&viewer, query.recipes_limit)?;
    Ok(Json(authors))
}

async fn subscribe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
    Query(query): Query<RecipesLimitQuery>,
) -> Result<(StatusCode, Json<AuthorWithRecipes>), ApiError> {
    let viewer = viewer.require()?;
    let author = state
        .service()
        .subscribe(&viewer, id, query.recipes_limit)?;
    Ok((StatusCode::CREATED, Json(author)))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let viewer = viewer.require()?;
    state.service().unsubscribe(&viewer, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Catalogue ---

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.service().list_tags()?))
}

async fn search_ingredients(
    State(state): State<AppState>,
    Query(query): Query<IngredientQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let prefix = query.name.unwrap_or_default();
    Ok(Json(state.service().search_ingredients(&prefix)?))
}

// --- Recipes ---

async fn list_recipes(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    RepeatedQuery(query): RepeatedQuery<RecipeListQuery>,
) -> Result<Json<Vec<RecipeDetail>>, ApiError> {
    let filter = query.into_filter();
    Ok(Json(state.service().list_recipes(&filter, viewer.id())?))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    payload: Result<Json<NewRecipe>, JsonRejection>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let viewer = viewer.require()?;
    let Json(req) = payload?;
    let detail = state.service().create_recipe(&viewer, &req)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let detail = state
        .service()
        .recipe_detail(id, viewer.id())?
        .ok_or_else(|| ApiError::NotFound(format!("Recipe {id} not found")))?;
    Ok(Json(detail))
}

async fn add_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    let viewer = viewer.require()?;
    let summary = state.service().add_favorite(&viewer, id)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let viewer = viewer.require()?;
    state.service().remove_favorite(&viewer, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_to_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    let viewer = viewer.require()?;
    let summary = state.service().add_to_cart(&viewer, id)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn remove_from_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let viewer = viewer.require()?;
    state.service().remove_from_cart(&viewer, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_shopping_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Response, ApiError> {
    let viewer = viewer.require()?;
    let report = state.service().shopping_list(&viewer)?;
    let disposition = HeaderValue::from_str(&report.content_disposition())
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(report.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.body,
    )
        .into_response())
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/subscriptions", get(list_subscriptions))
        .route("/api/users/{id}", get(get_user))
        .route(
            "/api/users/{id}/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .route("/api/tags", get(list_tags))
        .route("/api/ingredients", get(search_ingredients))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/download_shopping_cart",
            get(download_shopping_cart),
        )
        .route("/api/recipes/{id}", get(get_recipe))
        .route(
            "/api/recipes/{id}/favorite",
            post(add_favorite).delete(remove_favorite),
        )
        .route(
            "/api/recipes/{id}/shopping_cart",
            post(add_to_cart).delete(remove_from_cart),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: PotluckService, port: u16, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(Mutex::new(service)),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!("listening on {bind}; anyone who can reach this address can register users");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
