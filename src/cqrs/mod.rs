pub mod audit;
pub mod auth;
pub mod customers;
pub mod orders;
pub mod products;
pub mod reviews;
pub mod vendors;

use std::cmp::Ordering;

use tracing::{event, Level};

use crate::{dtos::Response, error::AppError, uow::UnitOfWork};

// traits
pub trait Command {}
pub trait Query {}

pub trait CommandHandler<C: Command, R: Response> {
    async fn handle(&self, input: &C) -> Result<R, AppError>;
}

pub trait QueryHandler<Q: Query, R: Response> {
    async fn handle(&self, input: &Q) -> Result<R, AppError>;
}

/// Publishes staged events. The write has already happened, so a broker
/// failure is logged rather than surfaced to the caller.
pub(crate) async fn publish(uow: UnitOfWork) {
    if let Err(e) = uow.commit().await {
        event!(Level::WARN, "Failed to publish events: {}", e);
    }
}

/// Parses an `ordering` parameter such as `-created_at` against the allowed field names.
pub(crate) fn parse_ordering<'a>(
    ordering: Option<&'a str>,
    allowed: &[&str],
    default: (&'a str, bool),
) -> Result<(&'a str, bool), AppError> {
    let Some(raw) = ordering.map(str::trim).filter(|o| !o.is_empty()) else {
        return Ok(default);
    };

    let (field, descending) = match raw.strip_prefix('-') {
        Some(field) => (field, true),
        None => (raw, false),
    };

    if allowed.iter().any(|a| *a == field) {
        Ok((field, descending))
    } else {
        Err(AppError::Validation(format!(
            "Unsupported ordering '{}', expected one of: {}",
            raw,
            allowed.join(", ")
        )))
    }
}

pub(crate) fn directed(ordering: Ordering, descending: bool) -> Ordering {
    if descending {
        ordering.reverse()
    } else {
        ordering
    }
}

pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        Err(AppError::Validation(format!("{} may not be blank", field)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::Utc;

    use crate::{
        auth::{hash_password, AuthenticatedUser},
        domain::{new_id, ProductService, Role, User, Vendor},
        events::LoggingMessageBroker,
        uow::RepositoryContext,
    };

    pub fn repositories() -> Arc<RepositoryContext> {
        Arc::new(RepositoryContext::in_memory(Arc::new(LoggingMessageBroker)))
    }

    pub async fn seed_user(repositories: &RepositoryContext, username: &str, role: Role) -> AuthenticatedUser {
        let now = Utc::now();
        let user = User {
            id: new_id(),
            username: username.to_string(),
            username_lower: User::username_key(username),
            email: format!("{}@example.com", username),
            password_hash: hash_password("password123").unwrap(),
            first_name: String::new(),
            last_name: String::new(),
            display_name: username.to_string(),
            phone_number: None,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        repositories.users.create(user.clone()).await.unwrap();
        AuthenticatedUser::from(&user)
    }

    pub async fn seed_vendor(repositories: &RepositoryContext, owner: &AuthenticatedUser, verified: bool) -> Vendor {
        let now = Utc::now();
        let vendor = Vendor {
            id: new_id(),
            user_id: owner.id.clone(),
            name: format!("{} Kitchen", owner.username),
            category: String::from("street_food"),
            profile_description: String::from("Kota and chips"),
            phone_number: String::from("0110000000"),
            email: format!("{}@example.com", owner.username),
            address: String::from("Soweto"),
            is_verified: verified,
            average_rating: 0.0,
            review_count: 0,
            total_orders: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        repositories.vendors.create(vendor).await.unwrap()
    }

    pub async fn seed_product(repositories: &RepositoryContext, vendor: &Vendor, name: &str, price: i64) -> ProductService {
        let now = Utc::now();
        let product = ProductService {
            id: new_id(),
            vendor_id: vendor.id.clone(),
            name: name.to_string(),
            description: String::new(),
            current_price_cents: price,
            is_service: false,
            is_available: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        repositories.products_services.create(product).await.unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_defaults_and_parses_direction() {
        let allowed = ["name", "created_at"];

        assert_eq!(parse_ordering(None, &allowed, ("created_at", true)).unwrap(), ("created_at", true));
        assert_eq!(parse_ordering(Some("-name"), &allowed, ("created_at", true)).unwrap(), ("name", true));
        assert_eq!(parse_ordering(Some("name"), &allowed, ("created_at", true)).unwrap(), ("name", false));
        assert!(parse_ordering(Some("password_hash"), &allowed, ("created_at", true)).is_err());
    }

    #[test]
    fn search_is_case_insensitive() {
        assert!(contains_ignore_case("Mama Thandi's Kitchen", "thandi"));
        assert!(!contains_ignore_case("Bakery", "kota"));
    }
}
