use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Anything stored through a [`crate::repositories::Repository`].
pub trait Entity: Clone + Send + Sync + Unpin + Serialize + serde::de::DeserializeOwned + 'static {
    const COLLECTION: &'static str;

    /// Field groups whose combined values must be unique across the collection.
    const UNIQUE_KEYS: &'static [&'static [&'static str]] = &[];

    fn id(&self) -> &str;
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Largest amount a price, line or order may carry: 99 999 999.99.
pub const MAX_AMOUNT_CENTS: i64 = 9_999_999_999;

fn amount_too_large(what: &str) -> AppError {
    AppError::Validation(format!("{} exceeds the maximum amount of {} cents", what, MAX_AMOUNT_CENTS))
}

pub fn validate_price(price_cents: i64) -> Result<(), AppError> {
    if price_cents < 0 {
        return Err(AppError::Validation(String::from("Price cannot be negative")));
    }
    if price_cents > MAX_AMOUNT_CENTS {
        return Err(amount_too_large("Price"));
    }
    Ok(())
}

// users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Customer,
    Vendor,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub username_lower: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Case-folded username, stored so lookups and the unique index ignore case.
    pub fn username_key(username: &str) -> String {
        username.trim().to_lowercase()
    }
}

impl Entity for User {
    const COLLECTION: &'static str = "users";
    const UNIQUE_KEYS: &'static [&'static [&'static str]] = &[&["username_lower"], &["email"]];

    fn id(&self) -> &str {
        &self.id
    }
}

// vendors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub category: String,
    pub profile_description: String,
    pub phone_number: String,
    pub email: String,
    pub address: String,
    pub is_verified: bool,
    pub average_rating: f64,
    pub review_count: u32,
    pub total_orders: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Vendor {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Only verified, live vendors are listed publicly.
    pub fn is_public(&self) -> bool {
        self.is_verified && !self.is_deleted()
    }

    pub fn can_accept_orders(&self) -> bool {
        self.is_public()
    }
}

impl Entity for Vendor {
    const COLLECTION: &'static str = "vendors";
    const UNIQUE_KEYS: &'static [&'static [&'static str]] = &[&["user_id"]];

    fn id(&self) -> &str {
        &self.id
    }
}

/// Mean rating rounded to one decimal place, 0.0 when there are no ratings.
pub fn average_rating(ratings: &[u8]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }

    let total: u32 = ratings.iter().map(|r| *r as u32).sum();
    let mean = total as f64 / ratings.len() as f64;
    (mean * 10.0).round() / 10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductService {
    pub id: String,
    pub vendor_id: String,
    pub name: String,
    pub description: String,
    pub current_price_cents: i64,
    pub is_service: bool,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ProductService {
    pub fn is_orderable(&self) -> bool {
        self.is_available && self.deleted_at.is_none()
    }
}

impl Entity for ProductService {
    const COLLECTION: &'static str = "products_services";

    fn id(&self) -> &str {
        &self.id
    }
}

// orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;

        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered, Cancelled],
            Delivered => &[Refunded],
            Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: String,
    pub product_service_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_snapshot_cents: i64,
    pub discount_applied_cents: i64,
    pub line_total_cents: i64,
    pub quantity_fulfilled: u32,
}

impl OrderLineItem {
    /// Snapshots the item's current price into a new line.
    pub fn snapshot(product: &ProductService, quantity: u32, discount_cents: i64) -> Result<Self, AppError> {
        if quantity == 0 {
            return Err(AppError::Validation(String::from("Quantity must be at least 1")));
        }
        if discount_cents < 0 {
            return Err(AppError::Validation(String::from("Discount cannot be negative")));
        }

        let base_total = product
            .current_price_cents
            .checked_mul(i64::from(quantity))
            .filter(|total| *total <= MAX_AMOUNT_CENTS)
            .ok_or_else(|| amount_too_large(&format!("Line total for {}", product.name)))?;
        if discount_cents > base_total {
            return Err(AppError::Validation(format!(
                "Discount exceeds line total for {}",
                product.name
            )));
        }

        Ok(OrderLineItem {
            id: new_id(),
            product_service_id: product.id.clone(),
            product_name: product.name.clone(),
            quantity,
            unit_price_snapshot_cents: product.current_price_cents,
            discount_applied_cents: discount_cents,
            line_total_cents: base_total - discount_cents,
            quantity_fulfilled: 0,
        })
    }

    pub fn quantity_remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.quantity_fulfilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusHistory {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub confirmed_by_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_uid: String,
    pub vendor_id: String,
    pub customer_id: String,
    pub line_items: Vec<OrderLineItem>,
    pub total_amount_cents: i64,
    pub current_status: OrderStatus,
    pub is_completed: bool,
    pub status_history: Vec<OrderStatusHistory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(vendor_id: String, customer_id: String, line_items: Vec<OrderLineItem>) -> Result<Self, AppError> {
        let now = Utc::now();
        let total_amount_cents = line_items
            .iter()
            .try_fold(0i64, |total, line| total.checked_add(line.line_total_cents))
            .filter(|total| *total <= MAX_AMOUNT_CENTS)
            .ok_or_else(|| amount_too_large("Order total"))?;

        Ok(Order {
            id: new_id(),
            order_uid: new_id(),
            status_history: vec![OrderStatusHistory {
                status: OrderStatus::Confirmed,
                timestamp: now,
                confirmed_by_user_id: customer_id.clone(),
            }],
            vendor_id,
            customer_id,
            line_items,
            total_amount_cents,
            current_status: OrderStatus::Confirmed,
            is_completed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a status change, returning `false` when the status is unchanged.
    pub fn transition(&mut self, next: OrderStatus, by_user_id: &str) -> Result<bool, AppError> {
        if self.current_status == next {
            return Ok(false);
        }

        if !self.current_status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "Cannot transition from {} to {}",
                self.current_status, next
            )));
        }

        let now = Utc::now();
        self.current_status = next;
        // only a delivered order counts as completed, a refund reopens it
        self.is_completed = next == OrderStatus::Delivered;
        self.updated_at = now;
        self.status_history.push(OrderStatusHistory {
            status: next,
            timestamp: now,
            confirmed_by_user_id: by_user_id.to_string(),
        });

        Ok(true)
    }

    pub fn is_pending(&self) -> bool {
        !self.is_completed && !self.current_status.is_terminal()
    }
}

impl Entity for Order {
    const COLLECTION: &'static str = "orders";

    fn id(&self) -> &str {
        &self.id
    }
}

// reviews
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub order_id: String,
    pub vendor_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Review {
    const COLLECTION: &'static str = "reviews";
    const UNIQUE_KEYS: &'static [&'static [&'static str]] = &[&["order_id"]];

    fn id(&self) -> &str {
        &self.id
    }
}

// customer extras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Billing,
    Shipping,
    Residential,
    Delivery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub address_type: AddressType,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state_province: Option<String>,
    pub postal_code: String,
    pub country_code: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn full_address(&self) -> String {
        let parts = [
            Some(self.line1.as_str()),
            self.line2.as_deref(),
            Some(self.city.as_str()),
            self.state_province.as_deref(),
            Some(self.postal_code.as_str()),
            self.country_code.as_deref(),
        ];

        parts
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Entity for Address {
    const COLLECTION: &'static str = "addresses";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub user_id: String,
    pub vendor_id: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for Favorite {
    const COLLECTION: &'static str = "favorites";
    const UNIQUE_KEYS: &'static [&'static [&'static str]] = &[&["user_id", "vendor_id"]];

    fn id(&self) -> &str {
        &self.id
    }
}

// audit
/// Append-only record of an administrative or state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub event_time: DateTime<Utc>,
    /// `None` for actions the service performs on its own.
    pub user_id: Option<String>,
    pub service_name: String,
    pub action_name: String,
    pub table_name: String,
    pub row_id: String,
    pub data_payload: serde_json::Value,
    pub success: bool,
}

impl AuditLog {
    pub fn new(service_name: &str, action_name: &str, table_name: &str, row_id: &str, user_id: Option<&str>) -> Self {
        AuditLog {
            id: new_id(),
            event_time: Utc::now(),
            user_id: user_id.map(String::from),
            service_name: service_name.to_string(),
            action_name: action_name.to_string(),
            table_name: table_name.to_string(),
            row_id: row_id.to_string(),
            data_payload: serde_json::Value::Object(serde_json::Map::new()),
            success: true,
        }
    }

    pub fn with_payload(mut self, data_payload: serde_json::Value) -> Self {
        self.data_payload = data_payload;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

impl Entity for AuditLog {
    const COLLECTION: &'static str = "audit_logs";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: i64) -> ProductService {
        let now = Utc::now();
        ProductService {
            id: new_id(),
            vendor_id: new_id(),
            name: String::from("Kota"),
            description: String::new(),
            current_price_cents: price,
            is_service: false,
            is_available: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn line_item_snapshots_price_and_applies_discount() {
        let line = OrderLineItem::snapshot(&product(4500), 3, 500).unwrap();

        assert_eq!(line.unit_price_snapshot_cents, 4500);
        assert_eq!(line.line_total_cents, 13000);
        assert_eq!(line.quantity_remaining(), 3);
    }

    #[test]
    fn line_item_rejects_zero_quantity_and_oversized_discount() {
        assert!(OrderLineItem::snapshot(&product(100), 0, 0).is_err());
        assert!(OrderLineItem::snapshot(&product(100), 1, 101).is_err());
        assert!(OrderLineItem::snapshot(&product(100), 1, -1).is_err());
    }

    #[test]
    fn new_order_totals_lines_and_records_initial_history() {
        let lines = vec![
            OrderLineItem::snapshot(&product(1000), 2, 0).unwrap(),
            OrderLineItem::snapshot(&product(550), 1, 50).unwrap(),
        ];
        let order = Order::new(new_id(), String::from("customer-1"), lines).unwrap();

        assert_eq!(order.total_amount_cents, 2500);
        assert_eq!(order.current_status, OrderStatus::Confirmed);
        assert_eq!(order.status_history.len(), 1);
        assert_eq!(order.status_history[0].confirmed_by_user_id, "customer-1");
    }

    #[test]
    fn order_walks_the_fulfilment_path() {
        let mut order = Order::new(new_id(), new_id(), vec![]).unwrap();

        for next in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            assert!(order.transition(next, "vendor-user").unwrap());
        }

        assert!(order.is_completed);
        assert!(!order.is_pending());
        assert_eq!(order.status_history.len(), 4);
    }

    #[test]
    fn refund_clears_completion() {
        let mut order = Order::new(new_id(), new_id(), vec![]).unwrap();
        for next in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered, OrderStatus::Refunded] {
            order.transition(next, "admin").unwrap();
        }

        assert_eq!(order.current_status, OrderStatus::Refunded);
        assert!(!order.is_completed);
        assert!(!order.is_pending());
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let huge = product(5_000_000_000_000_000_000);
        assert!(matches!(OrderLineItem::snapshot(&huge, 2, 0), Err(AppError::Validation(_))));

        let near_cap = product(MAX_AMOUNT_CENTS);
        assert!(matches!(OrderLineItem::snapshot(&near_cap, 2, 0), Err(AppError::Validation(_))));

        let lines = vec![
            OrderLineItem::snapshot(&near_cap, 1, 0).unwrap(),
            OrderLineItem::snapshot(&near_cap, 1, 0).unwrap(),
        ];
        assert!(matches!(Order::new(new_id(), new_id(), lines), Err(AppError::Validation(_))));
    }

    #[test]
    fn price_validation_caps_amounts() {
        assert!(validate_price(0).is_ok());
        assert!(validate_price(MAX_AMOUNT_CENTS).is_ok());
        assert!(validate_price(-1).is_err());
        assert!(validate_price(MAX_AMOUNT_CENTS + 1).is_err());
    }

    #[test]
    fn order_rejects_skipping_states_and_leaving_terminal_ones() {
        let mut order = Order::new(new_id(), new_id(), vec![]).unwrap();
        assert!(order.transition(OrderStatus::Delivered, "u").is_err());

        order.transition(OrderStatus::Cancelled, "u").unwrap();
        assert!(order.transition(OrderStatus::Processing, "u").is_err());
    }

    #[test]
    fn same_status_is_a_noop() {
        let mut order = Order::new(new_id(), new_id(), vec![]).unwrap();

        assert!(!order.transition(OrderStatus::Confirmed, "u").unwrap());
        assert_eq!(order.status_history.len(), 1);
    }

    #[test]
    fn average_rating_rounds_to_one_decimal() {
        assert_eq!(average_rating(&[]), 0.0);
        assert_eq!(average_rating(&[5, 4, 4]), 4.3);
        assert_eq!(average_rating(&[1, 2]), 1.5);
    }

    #[test]
    fn full_address_skips_missing_parts() {
        let address = Address {
            id: new_id(),
            user_id: new_id(),
            address_type: AddressType::Delivery,
            line1: String::from("12 Vilakazi St"),
            line2: None,
            city: String::from("Soweto"),
            state_province: Some(String::new()),
            postal_code: String::from("1804"),
            country_code: Some(String::from("ZA")),
            is_default: true,
            created_at: Utc::now(),
        };

        assert_eq!(address.full_address(), "12 Vilakazi St, Soweto, 1804, ZA");
    }
}
