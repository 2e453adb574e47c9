use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
    Router,
};
use serde_json::{json, Value};

use crate::{
    auth::{authentication_middleware, AuthenticatedUser},
    cqrs::{
        audit::{AuditFilters, GetAuditLogsQuery},
        auth::{
            GetCurrentUserQuery, LoginCommand, LogoutCommand, LogoutRequest, ProfileChanges, RefreshTokenCommand,
            RegisterUserCommand, UpdateProfileCommand,
        },
        customers::{
            AddFavoriteCommand, CreateAddressCommand, DeleteAddressCommand, GetAddressesQuery, GetFavoritesQuery,
            NewAddress, RemoveFavoriteCommand,
        },
        orders::{
            CancelOrderCommand, CreateOrderCommand, GetAllOrdersQuery, GetMyOrdersQuery, GetOrderQuery,
            GetOrderStatsQuery, GetVendorOrdersQuery, NewOrder, OrderFilters, StatusChange, UpdateOrderStatusCommand,
        },
        products::{
            CreateProductServiceCommand, DeleteProductServiceCommand, GetMyProductsServicesQuery,
            GetProductServiceQuery, GetProductsServicesQuery, GetVendorProductsServicesQuery, NewProductService,
            ProductServiceChanges, ProductServiceFilters, UpdateProductServiceCommand,
        },
        reviews::{CreateReviewCommand, GetMyReviewsQuery, GetReviewQuery, GetVendorReviewsQuery, NewReview},
        vendors::{
            DeleteVendorCommand, GetMyVendorQuery, GetVendorQuery, GetVendorStatsQuery, GetVendorsQuery,
            RegisterVendorCommand, UpdateVendorProfileCommand, VendorChanges, VendorFilters, VendorRegistration,
            VerifyVendorCommand,
        },
        CommandHandler, QueryHandler,
    },
    error::AppError,
    extract::{ApiJson, ApiQuery},
    state::AppState,
};

type ApiResult = Result<(StatusCode, Json<Value>), AppError>;

pub async fn index() -> &'static str {
    "ReachHub marketplace API"
}

/// Every `/api` route. `/metrics` and the HTTP layers are added by the caller.
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = || from_fn_with_state(state.clone(), authentication_middleware);

    Router::new()
        .route("/", get(index))
        // auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/token/refresh", post(refresh_token))
        .route("/api/auth/logout", post(logout).route_layer(auth()))
        .route("/api/auth/user", get(current_user).patch(update_profile).route_layer(auth()))
        // vendors
        .route("/api/vendors", get(get_vendors))
        .route("/api/vendors/register", post(register_vendor).route_layer(auth()))
        .route("/api/vendors/profile", get(my_vendor).patch(update_vendor_profile).route_layer(auth()))
        .route("/api/vendors/{id}", delete(delete_vendor).route_layer(auth()).get(get_vendor))
        .route("/api/vendors/{id}/products-services", get(vendor_products_services))
        .route("/api/vendors/{id}/reviews", get(vendor_reviews))
        .route("/api/vendors/{id}/stats", get(vendor_stats).route_layer(auth()))
        .route("/api/vendors/{id}/verify", post(verify_vendor).route_layer(auth()))
        // products/services
        .route(
            "/api/vendors/products-services",
            post(create_product_service).route_layer(auth()).get(get_products_services),
        )
        .route(
            "/api/vendors/products-services/{id}",
            patch(update_product_service)
                .delete(delete_product_service)
                .route_layer(auth())
                .get(get_product_service),
        )
        .route("/api/vendors/profile/products-services", get(my_products_services).route_layer(auth()))
        // orders
        .route("/api/orders", post(create_order).route_layer(auth()))
        .route("/api/orders/all", get(all_orders).route_layer(auth()))
        .route("/api/orders/my-orders", get(my_orders).route_layer(auth()))
        .route("/api/orders/vendor-orders", get(vendor_orders).route_layer(auth()))
        .route("/api/orders/stats", get(order_stats).route_layer(auth()))
        .route("/api/orders/{id}", get(get_order).route_layer(auth()))
        .route("/api/orders/{id}/status", patch(update_order_status).route_layer(auth()))
        .route("/api/orders/{id}/cancel", post(cancel_order).route_layer(auth()))
        // reviews
        .route("/api/orders/{id}/review", post(create_review).route_layer(auth()))
        .route("/api/orders/my-reviews", get(my_reviews).route_layer(auth()))
        .route("/api/orders/reviews/{id}", get(get_review))
        // customers
        .route("/api/customers/addresses", get(addresses).post(create_address).route_layer(auth()))
        .route("/api/customers/addresses/{id}", delete(delete_address).route_layer(auth()))
        .route("/api/customers/favorites", get(favorites).route_layer(auth()))
        .route(
            "/api/customers/favorites/{vendor_id}",
            post(add_favorite).delete(remove_favorite).route_layer(auth()),
        )
        // audit
        .route("/api/audit-logs", get(audit_logs).route_layer(auth()))
        .with_state(state)
}

// auth
pub async fn register(State(state): State<Arc<AppState>>, ApiJson(command): ApiJson<RegisterUserCommand>) -> ApiResult {
    let response = state.auth.register.handle(&command).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn login(State(state): State<Arc<AppState>>, ApiJson(command): ApiJson<LoginCommand>) -> ApiResult {
    let response = state.auth.login.handle(&command).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn refresh_token(State(state): State<Arc<AppState>>, ApiJson(command): ApiJson<RefreshTokenCommand>) -> ApiResult {
    let response = state.auth.refresh.handle(&command).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    body: Option<ApiJson<LogoutRequest>>,
) -> ApiResult {
    let body = body.map_or(LogoutRequest { refresh: None }, |ApiJson(body)| body);
    let response = state.auth.logout.handle(&LogoutCommand { caller, body }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn current_user(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.auth.current_user.handle(&GetCurrentUserQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<ProfileChanges>,
) -> ApiResult {
    let response = state.auth.update_profile.handle(&UpdateProfileCommand { caller, body }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

// vendors
pub async fn get_vendors(State(state): State<Arc<AppState>>, ApiQuery(filters): ApiQuery<VendorFilters>) -> ApiResult {
    let response = state.vendors.list.handle(&GetVendorsQuery { filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn get_vendor(State(state): State<Arc<AppState>>, Path(vendor_id): Path<String>) -> ApiResult {
    let response = state.vendors.get.handle(&GetVendorQuery { vendor_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn register_vendor(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<VendorRegistration>,
) -> ApiResult {
    let response = state.vendors.register.handle(&RegisterVendorCommand { caller, body }).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn my_vendor(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.vendors.mine.handle(&GetMyVendorQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn update_vendor_profile(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<VendorChanges>,
) -> ApiResult {
    let response = state
        .vendors
        .update_profile
        .handle(&UpdateVendorProfileCommand { caller, body })
        .await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn vendor_stats(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    caller: AuthenticatedUser,
) -> ApiResult {
    let response = state.vendors.stats.handle(&GetVendorStatsQuery { caller, vendor_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn verify_vendor(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    caller: AuthenticatedUser,
) -> ApiResult {
    let response = state.vendors.verify.handle(&VerifyVendorCommand { caller, vendor_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn delete_vendor(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    caller: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    state.vendors.delete.handle(&DeleteVendorCommand { caller, vendor_id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn vendor_products_services(State(state): State<Arc<AppState>>, Path(vendor_id): Path<String>) -> ApiResult {
    let response = state
        .products_services
        .for_vendor
        .handle(&GetVendorProductsServicesQuery { vendor_id })
        .await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn vendor_reviews(State(state): State<Arc<AppState>>, Path(vendor_id): Path<String>) -> ApiResult {
    let response = state.reviews.for_vendor.handle(&GetVendorReviewsQuery { vendor_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

// products/services
pub async fn get_products_services(
    State(state): State<Arc<AppState>>,
    ApiQuery(filters): ApiQuery<ProductServiceFilters>,
) -> ApiResult {
    let response = state.products_services.list.handle(&GetProductsServicesQuery { filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn get_product_service(State(state): State<Arc<AppState>>, Path(product_service_id): Path<String>) -> ApiResult {
    let response = state
        .products_services
        .get
        .handle(&GetProductServiceQuery { product_service_id })
        .await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn my_products_services(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.products_services.mine.handle(&GetMyProductsServicesQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn create_product_service(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<NewProductService>,
) -> ApiResult {
    let response = state
        .products_services
        .create
        .handle(&CreateProductServiceCommand { caller, body })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn update_product_service(
    State(state): State<Arc<AppState>>,
    Path(product_service_id): Path<String>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<ProductServiceChanges>,
) -> ApiResult {
    let command = UpdateProductServiceCommand {
        caller,
        product_service_id,
        body,
    };
    let response = state.products_services.update.handle(&command).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn delete_product_service(
    State(state): State<Arc<AppState>>,
    Path(product_service_id): Path<String>,
    caller: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    state
        .products_services
        .delete
        .handle(&DeleteProductServiceCommand {
            caller,
            product_service_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<NewOrder>,
) -> ApiResult {
    let response = state.orders.create.handle(&CreateOrderCommand { caller, body }).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn all_orders(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiQuery(filters): ApiQuery<OrderFilters>,
) -> ApiResult {
    let response = state.orders.all.handle(&GetAllOrdersQuery { caller, filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    caller: AuthenticatedUser,
) -> ApiResult {
    let response = state.orders.get.handle(&GetOrderQuery { caller, order_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn my_orders(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiQuery(filters): ApiQuery<OrderFilters>,
) -> ApiResult {
    let response = state.orders.mine.handle(&GetMyOrdersQuery { caller, filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn vendor_orders(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiQuery(filters): ApiQuery<OrderFilters>,
) -> ApiResult {
    let response = state.orders.for_vendor.handle(&GetVendorOrdersQuery { caller, filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<StatusChange>,
) -> ApiResult {
    let command = UpdateOrderStatusCommand { caller, order_id, body };
    let response = state.orders.update_status.handle(&command).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    caller: AuthenticatedUser,
) -> ApiResult {
    let response = state.orders.update_status.handle(&CancelOrderCommand { caller, order_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn order_stats(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.orders.stats.handle(&GetOrderStatsQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

// reviews
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<NewReview>,
) -> ApiResult {
    let command = CreateReviewCommand { caller, order_id, body };
    let response = state.reviews.create.handle(&command).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn my_reviews(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.reviews.mine.handle(&GetMyReviewsQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn get_review(State(state): State<Arc<AppState>>, Path(review_id): Path<String>) -> ApiResult {
    let response = state.reviews.get.handle(&GetReviewQuery { review_id }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

// customers
pub async fn addresses(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.customers.addresses.handle(&GetAddressesQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn create_address(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiJson(body): ApiJson<NewAddress>,
) -> ApiResult {
    let response = state.customers.create_address.handle(&CreateAddressCommand { caller, body }).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn delete_address(
    State(state): State<Arc<AppState>>,
    Path(address_id): Path<String>,
    caller: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    state
        .customers
        .delete_address
        .handle(&DeleteAddressCommand { caller, address_id })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn favorites(State(state): State<Arc<AppState>>, caller: AuthenticatedUser) -> ApiResult {
    let response = state.customers.favorites.handle(&GetFavoritesQuery { caller }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}

pub async fn add_favorite(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    caller: AuthenticatedUser,
) -> ApiResult {
    let response = state.customers.add_favorite.handle(&AddFavoriteCommand { caller, vendor_id }).await?;
    Ok((StatusCode::CREATED, Json(json!(response))))
}

pub async fn remove_favorite(
    State(state): State<Arc<AppState>>,
    Path(vendor_id): Path<String>,
    caller: AuthenticatedUser,
) -> Result<StatusCode, AppError> {
    state
        .customers
        .remove_favorite
        .handle(&RemoveFavoriteCommand { caller, vendor_id })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// audit
pub async fn audit_logs(
    State(state): State<Arc<AppState>>,
    caller: AuthenticatedUser,
    ApiQuery(filters): ApiQuery<AuditFilters>,
) -> ApiResult {
    let response = state.audit.list.handle(&GetAuditLogsQuery { caller, filters }).await?;
    Ok((StatusCode::OK, Json(json!(response))))
}
