//! Route definitions for the studio operations API

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use shared::Role;

use crate::{
    handlers,
    middleware::{auth_middleware, require_roles},
    AppState,
};

const ANY_STAFF: &[Role] = Role::ALL;
const MANAGEMENT: &[Role] = &[Role::Manager];
const WAREHOUSE: &[Role] = &[Role::Manager, Role::Stockman, Role::Okz];
const STOCKMEN: &[Role] = &[Role::Manager, Role::Stockman];
const OKZ: &[Role] = &[Role::Manager, Role::Okz];
const PHOTO_STAFF: &[Role] = &[
    Role::Manager,
    Role::Stockman,
    Role::Photographer,
    Role::SeniorPhotographer,
];
const PHOTOGRAPHERS: &[Role] = &[Role::Photographer, Role::SeniorPhotographer];
const SENIOR_PHOTOGRAPHERS: &[Role] = &[Role::Manager, Role::SeniorPhotographer];
const RETOUCH_STAFF: &[Role] = &[Role::Manager, Role::Retoucher, Role::SeniorRetoucher];
const RETOUCHERS: &[Role] = &[Role::Retoucher, Role::SeniorRetoucher];
const SENIOR_RETOUCHERS: &[Role] = &[Role::Manager, Role::SeniorRetoucher];
const RENDER_CHECKERS: &[Role] = &[Role::Manager, Role::RenderChecker];
const MODERATORS: &[Role] = &[Role::Manager, Role::Moderator];
const ADMINS: &[Role] = &[Role::Admin];

/// Require a valid token and one of `roles` for every route in `router`
fn guarded(router: Router<AppState>, roles: &'static [Role], state: &AppState) -> Router<AppState> {
    router
        .route_layer(from_fn_with_state(roles, require_roles))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware))
}

/// Create API routes
pub fn api_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        .nest("/auth", auth_routes(state))
        .nest("/users", guarded(user_routes(), ADMINS, state))
        .nest("/products", product_routes(state))
        .nest("/st-requests", st_request_routes(state))
        .nest("/retouch-requests", retouch_routes(state))
        .nest("/orders", guarded(order_routes(), OKZ, state))
        .nest("/invoices", guarded(invoice_routes(), STOCKMEN, state))
        .nest("/renders", guarded(render_routes(), RENDER_CHECKERS, state))
        .nest("/moderation", guarded(moderation_routes(), MODERATORS, state))
        .nest("/reports", guarded(report_routes(), MANAGEMENT, state))
        .nest("/notifications", guarded(notification_routes(), ADMINS, state))
}

/// Authentication routes
fn auth_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(handlers::me))
        .route("/telegram", post(handlers::link_telegram));

    Router::new()
        .route("/login", post(handlers::login))
        .merge(guarded(protected, ANY_STAFF, state))
}

/// User administration (admin only)
fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_users).post(handlers::create_user))
        .route("/:user_id", get(handlers::get_user).put(handlers::update_user))
}

/// Product routes
fn product_routes(state: &AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/", get(handlers::list_products))
        .route("/:barcode", get(handlers::get_product))
        .route("/:barcode/history", get(handlers::get_product_history));

    let warehouse = Router::new()
        .route("/receive", post(handlers::receive_products))
        .route("/:barcode/defect", post(handlers::mark_defective));

    let flags = Router::new()
        .route("/:barcode/priority", put(handlers::set_product_priority))
        .route("/:barcode/retouch-block", put(handlers::set_product_retouch_block));

    guarded(read, ANY_STAFF, state)
        .merge(guarded(warehouse, WAREHOUSE, state))
        .merge(guarded(flags, MANAGEMENT, state))
}

/// Photo-shoot request routes
fn st_request_routes(state: &AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/", get(handlers::list_st_requests))
        .route("/:request_id", get(handlers::get_st_request));

    let stock = Router::new()
        .route("/", post(handlers::create_st_request))
        .route("/bulk", post(handlers::bulk_create_st_requests))
        .route("/:request_id/products", post(handlers::add_st_products))
        .route(
            "/:request_id/products/:barcode",
            delete(handlers::remove_st_product),
        )
        .route("/:request_id/finalize", post(handlers::finalize_st_request))
        .route("/:request_id/draft", post(handlers::return_st_request_to_draft))
        .route("/:request_id/cancel", post(handlers::cancel_st_request));

    let shooting = Router::new()
        .route(
            "/:request_id/products/:barcode/photo",
            put(handlers::set_photo_status),
        )
        .route("/:request_id/finish", post(handlers::finish_shooting));

    let review = Router::new()
        .route("/:request_id/photographer", put(handlers::assign_photographer))
        .route(
            "/:request_id/products/:barcode/review",
            put(handlers::review_photo),
        )
        .route("/:request_id/review", post(handlers::complete_photo_review));

    guarded(read, PHOTO_STAFF, state)
        .merge(guarded(stock, STOCKMEN, state))
        .merge(guarded(shooting, PHOTOGRAPHERS, state))
        .merge(guarded(review, SENIOR_PHOTOGRAPHERS, state))
}

/// Retouch request routes
fn retouch_routes(state: &AppState) -> Router<AppState> {
    let read = Router::new()
        .route("/", get(handlers::list_retouch_requests))
        .route("/:request_id", get(handlers::get_retouch_request));

    let work = Router::new()
        .route("/next", post(handlers::take_next_retouch))
        .route(
            "/:request_id/products/:barcode/result",
            put(handlers::set_retouch_status),
        )
        .route("/:request_id/submit", post(handlers::submit_retouch_for_review));

    let review = Router::new()
        .route("/auto-create", post(handlers::auto_create_retouch))
        .route("/:request_id/retoucher", put(handlers::assign_retoucher))
        .route(
            "/:request_id/products/:barcode/review",
            put(handlers::review_retouch),
        )
        .route("/:request_id/review", post(handlers::complete_retouch_review))
        .route("/:request_id/cancel", post(handlers::cancel_retouch_request));

    guarded(read, RETOUCH_STAFF, state)
        .merge(guarded(work, RETOUCHERS, state))
        .merge(guarded(review, SENIOR_RETOUCHERS, state))
}

/// Order routes
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_orders).post(handlers::create_order))
        .route("/assembly/next", post(handlers::start_assembly))
        .route("/:order_id", get(handlers::get_order))
        .route("/:order_id/release", post(handlers::release_assembly))
        .route(
            "/:order_id/products/:barcode/assembled",
            post(handlers::mark_assembled),
        )
        .route("/:order_id/assembled", post(handlers::finish_assembly))
        .route("/:order_id/acceptance", post(handlers::start_acceptance))
        .route(
            "/:order_id/products/:barcode/accept",
            post(handlers::accept_product),
        )
        .route("/:order_id/cancel", post(handlers::cancel_order))
}

/// Invoice routes
fn invoice_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_invoices).post(handlers::create_invoice))
        .route("/:invoice_id", get(handlers::get_invoice))
        .route("/:invoice_id/send", post(handlers::send_invoice))
}

/// Render check routes
fn render_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_renders))
        .route("/next", post(handlers::start_render_check))
        .route("/:render_id", get(handlers::get_render))
        .route("/:render_id/verdict", post(handlers::finish_render_check))
}

/// Moderation upload routes
fn moderation_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_uploads))
        .route("/next", post(handlers::start_upload))
        .route("/studio/next", post(handlers::start_studio_upload))
        .route("/:upload_id", get(handlers::get_upload))
        .route("/:upload_id/finish", post(handlers::finish_upload))
}

/// Reporting routes
fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(handlers::get_dashboard))
        .route("/daily", get(handlers::get_daily_report))
        .route("/daily/:day", post(handlers::aggregate_day))
        .route("/productivity", get(handlers::get_productivity_report))
}

/// Telegram outbox routes
fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_outbox))
        .route("/dispatch", post(handlers::dispatch_outbox))
        .route("/:message_id/retry", post(handlers::retry_message))
}
