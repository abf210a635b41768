use crate::handlers::common::{success_response, validate_input};
use crate::{
    errors::{ApiError, ServiceError},
    services::{AddToCartInput, CartView, RemoveCartItemInput, UpdateCartItemInput},
    AppState,
};
use axum::{
    extract::{Json, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

const SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_cart)).route(
        "/items",
        axum::routing::post(add_to_cart)
            .put(update_cart_item)
            .delete(remove_cart_item),
    )
}

/// Reads the session cart token from the `Cookie` header(s).
pub fn session_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Existing session token, or a freshly issued one that must be set on the response.
fn resolve_session(headers: &HeaderMap, cookie_name: &str) -> (String, bool) {
    match session_from_headers(headers, cookie_name) {
        Some(session) => (session, false),
        None => (Uuid::new_v4().to_string(), true),
    }
}

fn with_session_cookie(
    mut response: Response,
    cookie_name: &str,
    session: &str,
    secure: bool,
) -> Response {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        cookie_name, session, SESSION_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}

fn cart_response(
    state: &AppState,
    cart: &crate::entities::CartModel,
    issued_session: Option<&str>,
) -> Result<Response, ApiError> {
    let response = success_response(CartView::from_model(cart)?);
    Ok(match issued_session {
        Some(session) => with_session_cookie(
            response,
            &state.config.session_cookie_name,
            session,
            state.config.is_production(),
        ),
        None => response,
    })
}

/// Get (or start) the session cart
#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Session cart", body = CartView),
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let (session, issued) = resolve_session(&headers, &state.config.session_cookie_name);
    let cart = state.services.cart.get_or_create_cart(&session).await?;
    cart_response(&state, &cart, issued.then_some(session.as_str()))
}

/// Add a product to the session cart
#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddToCartInput,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Not enough stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let (session, issued) = resolve_session(&headers, &state.config.session_cookie_name);
    let cart = state.services.cart.add_item(&session, payload).await?;
    cart_response(&state, &cart, issued.then_some(session.as_str()))
}

/// Set a line's quantity; zero removes it
#[utoipa::path(
    put,
    path = "/api/cart/items",
    request_body = UpdateCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 400, description = "No session cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCartItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_from_headers(&headers, &state.config.session_cookie_name)
        .ok_or_else(|| ServiceError::CartNotFound("Cart not found".to_string()))?;
    let cart = state
        .services
        .cart
        .update_item_quantity(&session, payload)
        .await?;
    cart_response(&state, &cart, None)
}

/// Remove a line from the session cart
#[utoipa::path(
    delete,
    path = "/api/cart/items",
    request_body = RemoveCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RemoveCartItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session_from_headers(&headers, &state.config.session_cookie_name)
        .ok_or_else(|| ServiceError::CartNotFound("Cart not found".to_string()))?;
    let cart = state.services.cart.remove_item(&session, payload).await?;
    cart_response(&state, &cart, None)
}
