use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::{AuditLog, Order, OrderLineItem, OrderStatus, Role, Vendor},
    dtos::{GetOrdersResponse, OrderResponse, OrderStatsResponse},
    error::AppError,
    events::Event,
    metrics::BusinessMetrics,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{audit, publish, vendors::vendor_for_user, Command, CommandHandler, Query, QueryHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_service_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub discount_applied_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub vendor_id: String,
    pub line_items: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub current_status: OrderStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
}

// commands
pub struct CreateOrderCommand {
    pub caller: AuthenticatedUser,
    pub body: NewOrder,
}
impl Command for CreateOrderCommand {}

pub struct UpdateOrderStatusCommand {
    pub caller: AuthenticatedUser,
    pub order_id: String,
    pub body: StatusChange,
}
impl Command for UpdateOrderStatusCommand {}

pub struct CancelOrderCommand {
    pub caller: AuthenticatedUser,
    pub order_id: String,
}
impl Command for CancelOrderCommand {}

// queries
pub struct GetOrderQuery {
    pub caller: AuthenticatedUser,
    pub order_id: String,
}
impl Query for GetOrderQuery {}

pub struct GetAllOrdersQuery {
    pub caller: AuthenticatedUser,
    pub filters: OrderFilters,
}
impl Query for GetAllOrdersQuery {}

pub struct GetMyOrdersQuery {
    pub caller: AuthenticatedUser,
    pub filters: OrderFilters,
}
impl Query for GetMyOrdersQuery {}

pub struct GetVendorOrdersQuery {
    pub caller: AuthenticatedUser,
    pub filters: OrderFilters,
}
impl Query for GetVendorOrdersQuery {}

pub struct GetOrderStatsQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetOrderStatsQuery {}

/// Loads an order the caller is allowed to see. Orders outside the caller's
/// scope are reported as missing.
pub(crate) async fn visible_order(
    repositories: &RepositoryContext,
    caller: &AuthenticatedUser,
    order_id: &str,
) -> Result<Order, AppError> {
    let hidden = || AppError::NotFound(String::from("Order"));

    let order = match repositories.orders.read(order_id).await {
        Ok(order) => order,
        Err(AppError::NotFound(_)) => return Err(hidden()),
        Err(e) => return Err(e),
    };

    if caller.is_admin() || order.customer_id == caller.id {
        return Ok(order);
    }

    match vendor_for_user(repositories, &caller.id).await? {
        Some(vendor) if vendor.id == order.vendor_id => Ok(order),
        _ => Err(hidden()),
    }
}

fn orders_filter(filters: &OrderFilters) -> Filter {
    match filters.status {
        Some(status) => Filter::new().eq("current_status", status.as_str()),
        None => Filter::new(),
    }
}

fn newest_first(mut orders: Vec<Order>) -> GetOrdersResponse {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    GetOrdersResponse {
        orders: orders.iter().map(OrderResponse::from).collect(),
    }
}

/// Checks whether `caller` may move `order` to `next`, given the vendor
/// profile the caller owns (if any).
fn authorize_transition(
    caller: &AuthenticatedUser,
    callers_vendor: Option<&Vendor>,
    order: &Order,
    next: OrderStatus,
) -> Result<(), AppError> {
    if caller.is_admin() {
        return Ok(());
    }

    if callers_vendor.is_some_and(|v| v.id == order.vendor_id) {
        return if next == OrderStatus::Refunded {
            Err(AppError::Forbidden(String::from("Only an administrator can refund an order")))
        } else {
            Ok(())
        };
    }

    if order.customer_id == caller.id {
        if next != OrderStatus::Cancelled {
            return Err(AppError::Forbidden(String::from("Customers can only cancel their orders")));
        }
        if !matches!(order.current_status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(AppError::Validation(format!(
                "Order can no longer be cancelled once it is {}",
                order.current_status
            )));
        }
        return Ok(());
    }

    Err(AppError::Forbidden(String::from("You cannot change this order")))
}

// command handlers
#[derive(Clone)]
pub struct CreateOrderCommandHandler {
    repositories: Arc<RepositoryContext>,
    metrics: Arc<BusinessMetrics>,
}

impl CommandHandler<CreateOrderCommand, OrderResponse> for CreateOrderCommandHandler {
    async fn handle(&self, input: &CreateOrderCommand) -> Result<OrderResponse, AppError> {
        let body = &input.body;

        let vendor = match self.repositories.vendors.read(&body.vendor_id).await {
            Ok(vendor) if !vendor.is_deleted() => vendor,
            Ok(_) | Err(AppError::NotFound(_)) => return Err(AppError::NotFound(String::from("Vendor"))),
            Err(e) => return Err(e),
        };
        if !vendor.can_accept_orders() {
            return Err(AppError::Validation(String::from("Vendor is not accepting orders")));
        }
        if vendor.user_id == input.caller.id {
            return Err(AppError::Forbidden(String::from("You cannot order from your own shop")));
        }
        if body.line_items.is_empty() {
            return Err(AppError::Validation(String::from("An order needs at least one line item")));
        }

        let mut line_items = Vec::with_capacity(body.line_items.len());
        for line in &body.line_items {
            let product = match self.repositories.products_services.read(&line.product_service_id).await {
                Ok(product) => product,
                Err(AppError::NotFound(_)) => {
                    return Err(AppError::Validation(format!("Unknown item {}", line.product_service_id)))
                }
                Err(e) => return Err(e),
            };
            if product.vendor_id != vendor.id {
                return Err(AppError::Validation(format!("{} is not sold by this vendor", product.name)));
            }
            if !product.is_orderable() {
                return Err(AppError::Validation(format!("{} is not available", product.name)));
            }
            line_items.push(OrderLineItem::snapshot(&product, line.quantity, line.discount_applied_cents)?);
        }

        let order = Order::new(vendor.id.clone(), input.caller.id.clone(), line_items)?;
        let mut uow = self.repositories.begin();
        uow.stage(Event::order_created(&order));
        let order = match self.repositories.orders.create(order).await {
            Ok(order) => order,
            Err(e) => {
                uow.rollback();
                return Err(e);
            }
        };

        // the order is stored, a stale counter must not fail the request
        if let Err(e) = self.repositories.vendors.increment(&vendor.id, "total_orders", 1).await {
            event!(Level::WARN, "Failed to count order {} for vendor {}: {}", order.id, vendor.id, e);
        }

        publish(uow).await;
        self.metrics.order_created();
        event!(
            Level::INFO,
            "Order {} placed by {} for {} cents",
            order.id,
            input.caller.username,
            order.total_amount_cents
        );

        Ok(OrderResponse::from(&order))
    }
}

#[derive(Clone)]
pub struct UpdateOrderStatusCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl UpdateOrderStatusCommandHandler {
    async fn apply(&self, caller: &AuthenticatedUser, order_id: &str, next: OrderStatus) -> Result<OrderResponse, AppError> {
        let mut order = visible_order(&self.repositories, caller, order_id).await?;
        let previous = order.current_status;
        let entry = AuditLog::new("orders", "update_status", "orders", &order.id, Some(&caller.id));

        let changed = match self.transition(caller, &mut order, next).await {
            Ok(changed) => changed,
            Err(e) => {
                let payload = json!({"from": previous, "to": next, "error": e.to_string()});
                audit::record(&self.repositories, entry.with_payload(payload).failed()).await;
                return Err(e);
            }
        };
        if !changed {
            return Ok(OrderResponse::from(&order));
        }

        let mut uow = self.repositories.begin();
        uow.stage(Event::order_updated(&order));
        let order = match self.repositories.orders.update(order).await {
            Ok(order) => order,
            Err(e) => {
                uow.rollback();
                return Err(e);
            }
        };
        publish(uow).await;
        audit::record(
            &self.repositories,
            entry.with_payload(json!({"from": previous, "to": order.current_status})),
        )
        .await;

        event!(Level::INFO, "Order {} moved to {} by {}", order.id, order.current_status, caller.username);
        Ok(OrderResponse::from(&order))
    }

    async fn transition(&self, caller: &AuthenticatedUser, order: &mut Order, next: OrderStatus) -> Result<bool, AppError> {
        let callers_vendor = vendor_for_user(&self.repositories, &caller.id).await?;
        authorize_transition(caller, callers_vendor.as_ref(), order, next)?;
        order.transition(next, &caller.id)
    }
}

impl CommandHandler<UpdateOrderStatusCommand, OrderResponse> for UpdateOrderStatusCommandHandler {
    async fn handle(&self, input: &UpdateOrderStatusCommand) -> Result<OrderResponse, AppError> {
        self.apply(&input.caller, &input.order_id, input.body.current_status).await
    }
}

impl CommandHandler<CancelOrderCommand, OrderResponse> for UpdateOrderStatusCommandHandler {
    async fn handle(&self, input: &CancelOrderCommand) -> Result<OrderResponse, AppError> {
        self.apply(&input.caller, &input.order_id, OrderStatus::Cancelled).await
    }
}

// query handlers
#[derive(Clone)]
pub struct GetOrderQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetOrderQuery, OrderResponse> for GetOrderQueryHandler {
    async fn handle(&self, input: &GetOrderQuery) -> Result<OrderResponse, AppError> {
        let order = visible_order(&self.repositories, &input.caller, &input.order_id).await?;
        Ok(OrderResponse::from(&order))
    }
}

#[derive(Clone)]
pub struct GetAllOrdersQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetAllOrdersQuery, GetOrdersResponse> for GetAllOrdersQueryHandler {
    async fn handle(&self, input: &GetAllOrdersQuery) -> Result<GetOrdersResponse, AppError> {
        input.caller.require_admin()?;
        let orders = self.repositories.orders.find(&orders_filter(&input.filters)).await?;
        Ok(newest_first(orders))
    }
}

#[derive(Clone)]
pub struct GetMyOrdersQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetMyOrdersQuery, GetOrdersResponse> for GetMyOrdersQueryHandler {
    async fn handle(&self, input: &GetMyOrdersQuery) -> Result<GetOrdersResponse, AppError> {
        let filter = orders_filter(&input.filters).eq("customer_id", input.caller.id.as_str());
        let orders = self.repositories.orders.find(&filter).await?;
        Ok(newest_first(orders))
    }
}

#[derive(Clone)]
pub struct GetVendorOrdersQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorOrdersQuery, GetOrdersResponse> for GetVendorOrdersQueryHandler {
    async fn handle(&self, input: &GetVendorOrdersQuery) -> Result<GetOrdersResponse, AppError> {
        input.caller.require_role(Role::Vendor)?;
        let vendor = vendor_for_user(&self.repositories, &input.caller.id)
            .await?
            .ok_or_else(|| AppError::Forbidden(String::from("A vendor profile is required")))?;

        let filter = orders_filter(&input.filters).eq("vendor_id", vendor.id.as_str());
        let orders = self.repositories.orders.find(&filter).await?;
        Ok(newest_first(orders))
    }
}

#[derive(Clone)]
pub struct GetOrderStatsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl GetOrderStatsQueryHandler {
    async fn scoped_orders(&self, caller: &AuthenticatedUser) -> Result<Vec<Order>, AppError> {
        if caller.is_admin() {
            return self.repositories.orders.read_all().await;
        }

        if caller.role == Role::Vendor {
            if let Some(vendor) = vendor_for_user(&self.repositories, &caller.id).await? {
                return self.repositories.orders.find(&Filter::new().eq("vendor_id", vendor.id.as_str())).await;
            }
        }

        self.repositories
            .orders
            .find(&Filter::new().eq("customer_id", caller.id.as_str()))
            .await
    }
}

impl QueryHandler<GetOrderStatsQuery, OrderStatsResponse> for GetOrderStatsQueryHandler {
    async fn handle(&self, input: &GetOrderStatsQuery) -> Result<OrderStatsResponse, AppError> {
        let orders = self.scoped_orders(&input.caller).await?;

        let total_orders = orders.len();
        let pending_orders = orders.iter().filter(|o| o.is_pending()).count();
        let completed: Vec<&Order> = orders.iter().filter(|o| o.is_completed).collect();
        let total_revenue_cents = completed.iter().map(|o| o.total_amount_cents).sum();
        let completion_rate = if total_orders == 0 {
            0.0
        } else {
            (completed.len() as f64 / total_orders as f64 * 1000.0).round() / 10.0
        };

        Ok(OrderStatsResponse {
            total_orders,
            pending_orders,
            completed_orders: completed.len(),
            total_revenue_cents,
            completion_rate,
        })
    }
}

pub struct OrderHandlers {
    pub create: CreateOrderCommandHandler,
    pub update_status: UpdateOrderStatusCommandHandler,
    pub get: GetOrderQueryHandler,
    pub all: GetAllOrdersQueryHandler,
    pub mine: GetMyOrdersQueryHandler,
    pub for_vendor: GetVendorOrdersQueryHandler,
    pub stats: GetOrderStatsQueryHandler,
}

impl OrderHandlers {
    pub fn new(repositories: Arc<RepositoryContext>, metrics: Arc<BusinessMetrics>) -> Self {
        OrderHandlers {
            create: CreateOrderCommandHandler {
                repositories: repositories.clone(),
                metrics,
            },
            update_status: UpdateOrderStatusCommandHandler {
                repositories: repositories.clone(),
            },
            get: GetOrderQueryHandler {
                repositories: repositories.clone(),
            },
            all: GetAllOrdersQueryHandler {
                repositories: repositories.clone(),
            },
            mine: GetMyOrdersQueryHandler {
                repositories: repositories.clone(),
            },
            for_vendor: GetVendorOrdersQueryHandler {
                repositories: repositories.clone(),
            },
            stats: GetOrderStatsQueryHandler { repositories },
        }
    }
}
