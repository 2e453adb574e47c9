use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::{new_id, validate_price, AuditLog, ProductService, Role, Vendor},
    dtos::{EmptyResponse, GetProductsServicesResponse, ProductServiceResponse},
    error::AppError,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{
    audit, contains_ignore_case, directed, parse_ordering, require_non_empty,
    vendors::{public_vendor, vendor_for_user},
    Command, CommandHandler, Query, QueryHandler,
};

const PRODUCT_ORDERINGS: [&str; 3] = ["name", "current_price", "created_at"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProductService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub current_price_cents: i64,
    #[serde(default)]
    pub is_service: bool,
    #[serde(default = "available_by_default")]
    pub is_available: bool,
}

fn available_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductServiceChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub current_price_cents: Option<i64>,
    pub is_service: Option<bool>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductServiceFilters {
    pub vendor: Option<String>,
    pub is_service: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

// commands
pub struct CreateProductServiceCommand {
    pub caller: AuthenticatedUser,
    pub body: NewProductService,
}
impl Command for CreateProductServiceCommand {}

pub struct UpdateProductServiceCommand {
    pub caller: AuthenticatedUser,
    pub product_service_id: String,
    pub body: ProductServiceChanges,
}
impl Command for UpdateProductServiceCommand {}

pub struct DeleteProductServiceCommand {
    pub caller: AuthenticatedUser,
    pub product_service_id: String,
}
impl Command for DeleteProductServiceCommand {}

// queries
pub struct GetProductsServicesQuery {
    pub filters: ProductServiceFilters,
}
impl Query for GetProductsServicesQuery {}

pub struct GetProductServiceQuery {
    pub product_service_id: String,
}
impl Query for GetProductServiceQuery {}

pub struct GetVendorProductsServicesQuery {
    pub vendor_id: String,
}
impl Query for GetVendorProductsServicesQuery {}

pub struct GetMyProductsServicesQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetMyProductsServicesQuery {}

async fn callers_vendor(repositories: &RepositoryContext, caller: &AuthenticatedUser) -> Result<Vendor, AppError> {
    caller.require_role(Role::Vendor)?;
    vendor_for_user(repositories, &caller.id)
        .await?
        .ok_or_else(|| AppError::Forbidden(String::from("A vendor profile is required")))
}

async fn live_items(repositories: &RepositoryContext, vendor_id: &str) -> Result<Vec<ProductService>, AppError> {
    repositories
        .products_services
        .find(&Filter::new().eq("vendor_id", vendor_id).is_null("deleted_at"))
        .await
}

async fn ensure_unique_name(
    repositories: &RepositoryContext,
    vendor_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> Result<(), AppError> {
    let taken = live_items(repositories, vendor_id)
        .await?
        .iter()
        .any(|p| p.name.eq_ignore_ascii_case(name) && Some(p.id.as_str()) != except_id);

    if taken {
        Err(AppError::Conflict(format!("An item named '{}' already exists", name)))
    } else {
        Ok(())
    }
}

/// Resolves an item for a write by its owning vendor.
async fn owned_item(
    repositories: &RepositoryContext,
    caller: &AuthenticatedUser,
    product_service_id: &str,
) -> Result<ProductService, AppError> {
    let vendor = callers_vendor(repositories, caller).await?;

    match repositories.products_services.read(product_service_id).await {
        Ok(item) if item.deleted_at.is_some() => Err(AppError::NotFound(String::from("Product/service"))),
        Ok(item) if item.vendor_id != vendor.id => Err(AppError::Forbidden(String::from(
            "You can only manage your own products and services",
        ))),
        Ok(item) => Ok(item),
        Err(AppError::NotFound(_)) => Err(AppError::NotFound(String::from("Product/service"))),
        Err(e) => Err(e),
    }
}

fn sort_items(items: &mut [ProductService], field: &str, descending: bool) {
    items.sort_by(|a, b| {
        let ordering = match field {
            "name" => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            "current_price" => a.current_price_cents.cmp(&b.current_price_cents),
            _ => a.created_at.cmp(&b.created_at),
        };
        directed(ordering, descending)
    });
}

fn to_response(items: &[ProductService]) -> GetProductsServicesResponse {
    GetProductsServicesResponse {
        products_services: items.iter().map(ProductServiceResponse::from).collect(),
    }
}

// command handlers
#[derive(Clone)]
pub struct CreateProductServiceCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<CreateProductServiceCommand, ProductServiceResponse> for CreateProductServiceCommandHandler {
    async fn handle(&self, input: &CreateProductServiceCommand) -> Result<ProductServiceResponse, AppError> {
        let body = &input.body;
        let vendor = callers_vendor(&self.repositories, &input.caller).await?;

        require_non_empty("name", &body.name)?;
        validate_price(body.current_price_cents)?;
        let name = body.name.trim();
        ensure_unique_name(&self.repositories, &vendor.id, name, None).await?;

        let now = Utc::now();
        let item = self
            .repositories
            .products_services
            .create(ProductService {
                id: new_id(),
                vendor_id: vendor.id.clone(),
                name: name.to_string(),
                description: body.description.trim().to_string(),
                current_price_cents: body.current_price_cents,
                is_service: body.is_service,
                is_available: body.is_available,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            })
            .await?;

        event!(Level::INFO, "Vendor {} added {}", vendor.id, item.name);
        Ok(ProductServiceResponse::from(&item))
    }
}

#[derive(Clone)]
pub struct UpdateProductServiceCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<UpdateProductServiceCommand, ProductServiceResponse> for UpdateProductServiceCommandHandler {
    async fn handle(&self, input: &UpdateProductServiceCommand) -> Result<ProductServiceResponse, AppError> {
        let mut item = owned_item(&self.repositories, &input.caller, &input.product_service_id).await?;
        let changes = &input.body;

        if let Some(name) = &changes.name {
            require_non_empty("name", name)?;
            let name = name.trim();
            ensure_unique_name(&self.repositories, &item.vendor_id, name, Some(&item.id)).await?;
            item.name = name.to_string();
        }
        if let Some(description) = &changes.description {
            item.description = description.trim().to_string();
        }
        if let Some(price) = changes.current_price_cents {
            validate_price(price)?;
            item.current_price_cents = price;
        }
        if let Some(is_service) = changes.is_service {
            item.is_service = is_service;
        }
        if let Some(is_available) = changes.is_available {
            item.is_available = is_available;
        }
        item.updated_at = Utc::now();

        let item = self.repositories.products_services.update(item).await?;
        Ok(ProductServiceResponse::from(&item))
    }
}

#[derive(Clone)]
pub struct DeleteProductServiceCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<DeleteProductServiceCommand, EmptyResponse> for DeleteProductServiceCommandHandler {
    async fn handle(&self, input: &DeleteProductServiceCommand) -> Result<EmptyResponse, AppError> {
        let mut item = owned_item(&self.repositories, &input.caller, &input.product_service_id).await?;

        // existing order lines keep their snapshot, so the row stays
        let now = Utc::now();
        item.deleted_at = Some(now);
        item.is_available = false;
        item.updated_at = now;
        let item = self.repositories.products_services.update(item).await?;
        audit::record(
            &self.repositories,
            AuditLog::new("products_services", "delete", "products_services", &item.id, Some(&input.caller.id))
                .with_payload(json!({"name": item.name, "vendor_id": item.vendor_id, "soft_delete": true})),
        )
        .await;

        Ok(EmptyResponse {})
    }
}

// query handlers
#[derive(Clone)]
pub struct GetProductsServicesQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetProductsServicesQuery, GetProductsServicesResponse> for GetProductsServicesQueryHandler {
    async fn handle(&self, input: &GetProductsServicesQuery) -> Result<GetProductsServicesResponse, AppError> {
        let filters = &input.filters;
        let (field, descending) = parse_ordering(filters.ordering.as_deref(), &PRODUCT_ORDERINGS, ("created_at", true))?;

        let mut filter = Filter::new().is_null("deleted_at").flag("is_available", true);
        if let Some(vendor_id) = &filters.vendor {
            filter = filter.eq("vendor_id", vendor_id.as_str());
        }
        if let Some(is_service) = filters.is_service {
            filter = filter.flag("is_service", is_service);
        }

        let public_vendor_ids: Vec<String> = self
            .repositories
            .vendors
            .find(&Filter::new().flag("is_verified", true).is_null("deleted_at"))
            .await?
            .into_iter()
            .map(|v| v.id)
            .collect();

        let mut items: Vec<ProductService> = self
            .repositories
            .products_services
            .find(&filter)
            .await?
            .into_iter()
            .filter(|p| public_vendor_ids.contains(&p.vendor_id))
            .filter(|p| match filters.search.as_deref().map(str::trim) {
                Some(term) if !term.is_empty() => {
                    contains_ignore_case(&p.name, term) || contains_ignore_case(&p.description, term)
                }
                _ => true,
            })
            .collect();

        sort_items(&mut items, field, descending);
        Ok(to_response(&items))
    }
}

#[derive(Clone)]
pub struct GetProductServiceQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetProductServiceQuery, ProductServiceResponse> for GetProductServiceQueryHandler {
    async fn handle(&self, input: &GetProductServiceQuery) -> Result<ProductServiceResponse, AppError> {
        let item = match self.repositories.products_services.read(&input.product_service_id).await {
            Ok(item) if item.deleted_at.is_none() => item,
            Ok(_) | Err(AppError::NotFound(_)) => return Err(AppError::NotFound(String::from("Product/service"))),
            Err(e) => return Err(e),
        };
        match public_vendor(&self.repositories, &item.vendor_id).await {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => return Err(AppError::NotFound(String::from("Product/service"))),
            Err(e) => return Err(e),
        }

        Ok(ProductServiceResponse::from(&item))
    }
}

#[derive(Clone)]
pub struct GetVendorProductsServicesQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorProductsServicesQuery, GetProductsServicesResponse> for GetVendorProductsServicesQueryHandler {
    async fn handle(&self, input: &GetVendorProductsServicesQuery) -> Result<GetProductsServicesResponse, AppError> {
        let vendor = public_vendor(&self.repositories, &input.vendor_id).await?;

        let mut items: Vec<ProductService> = live_items(&self.repositories, &vendor.id)
            .await?
            .into_iter()
            .filter(|p| p.is_available)
            .collect();
        sort_items(&mut items, "name", false);

        Ok(to_response(&items))
    }
}

#[derive(Clone)]
pub struct GetMyProductsServicesQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetMyProductsServicesQuery, GetProductsServicesResponse> for GetMyProductsServicesQueryHandler {
    async fn handle(&self, input: &GetMyProductsServicesQuery) -> Result<GetProductsServicesResponse, AppError> {
        let vendor = callers_vendor(&self.repositories, &input.caller).await?;

        // owners also see unavailable items
        let mut items = live_items(&self.repositories, &vendor.id).await?;
        sort_items(&mut items, "created_at", true);

        Ok(to_response(&items))
    }
}

pub struct ProductServiceHandlers {
    pub create: CreateProductServiceCommandHandler,
    pub update: UpdateProductServiceCommandHandler,
    pub delete: DeleteProductServiceCommandHandler,
    pub list: GetProductsServicesQueryHandler,
    pub get: GetProductServiceQueryHandler,
    pub for_vendor: GetVendorProductsServicesQueryHandler,
    pub mine: GetMyProductsServicesQueryHandler,
}

impl ProductServiceHandlers {
    pub fn new(repositories: Arc<RepositoryContext>) -> Self {
        ProductServiceHandlers {
            create: CreateProductServiceCommandHandler {
                repositories: repositories.clone(),
            },
            update: UpdateProductServiceCommandHandler {
                repositories: repositories.clone(),
            },
            delete: DeleteProductServiceCommandHandler {
                repositories: repositories.clone(),
            },
            list: GetProductsServicesQueryHandler {
                repositories: repositories.clone(),
            },
            get: GetProductServiceQueryHandler {
                repositories: repositories.clone(),
            },
            for_vendor: GetVendorProductsServicesQueryHandler {
                repositories: repositories.clone(),
            },
            mine: GetMyProductsServicesQueryHandler { repositories },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cqrs::test_support::{repositories, seed_product, seed_user, seed_vendor},
        domain::MAX_AMOUNT_CENTS,
        events::LoggingMessageBroker,
        repositories::MockRepository,
    };

    fn new_item(name: &str, price: i64) -> NewProductService {
        NewProductService {
            name: name.to_string(),
            description: String::from("Made to order"),
            current_price_cents: price,
            is_service: false,
            is_available: true,
        }
    }

    #[tokio::test]
    async fn vendors_create_items_with_unique_names() {
        let repositories = repositories();
        let handlers = ProductServiceHandlers::new(repositories.clone());
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        seed_vendor(&repositories, &owner, true).await;

        let command = CreateProductServiceCommand {
            caller: owner.clone(),
            body: new_item("Vetkoek", 1500),
        };
        let created = handlers.create.handle(&command).await.unwrap();
        assert_eq!(created.current_price_cents, 1500);

        let duplicate = CreateProductServiceCommand {
            caller: owner.clone(),
            body: new_item("vetkoek", 900),
        };
        assert!(matches!(handlers.create.handle(&duplicate).await, Err(AppError::Conflict(_))));

        let negative = CreateProductServiceCommand {
            caller: owner.clone(),
            body: new_item("Scones", -1),
        };
        assert!(matches!(handlers.create.handle(&negative).await, Err(AppError::Validation(_))));

        let too_dear = CreateProductServiceCommand {
            caller: owner,
            body: new_item("Golden kota", MAX_AMOUNT_CENTS + 1),
        };
        assert!(matches!(handlers.create.handle(&too_dear).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn detail_surfaces_storage_failures_instead_of_not_found() {
        let seeded = repositories();
        let owner = seed_user(&seeded, "lerato", Role::Vendor).await;
        let vendor = seed_vendor(&seeded, &owner, true).await;
        let item = seed_product(&seeded, &vendor, "Vetkoek", 1500).await;

        let mut vendors = MockRepository::<Vendor>::new();
        vendors
            .expect_read()
            .returning(|_| Err(AppError::Repository(String::from("connection reset"))));
        let mut broken = RepositoryContext::in_memory(Arc::new(LoggingMessageBroker));
        broken.products_services = seeded.products_services.clone();
        broken.vendors = Arc::new(vendors);
        let handlers = ProductServiceHandlers::new(Arc::new(broken));

        let get = GetProductServiceQuery {
            product_service_id: item.id,
        };
        assert!(matches!(handlers.get.handle(&get).await, Err(AppError::Repository(_))));
    }

    #[tokio::test]
    async fn customers_cannot_create_items() {
        let repositories = repositories();
        let handlers = ProductServiceHandlers::new(repositories.clone());
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;

        let command = CreateProductServiceCommand {
            caller: customer,
            body: new_item("Vetkoek", 1500),
        };
        assert!(matches!(handlers.create.handle(&command).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn only_the_owner_updates_and_deletes() {
        let repositories = repositories();
        let handlers = ProductServiceHandlers::new(repositories.clone());
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let rival = seed_user(&repositories, "amara", Role::Vendor).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;
        seed_vendor(&repositories, &rival, true).await;
        let item = seed_product(&repositories, &vendor, "Vetkoek", 1500).await;

        let hijack = UpdateProductServiceCommand {
            caller: rival.clone(),
            product_service_id: item.id.clone(),
            body: ProductServiceChanges {
                current_price_cents: Some(1),
                ..ProductServiceChanges::default()
            },
        };
        assert!(matches!(handlers.update.handle(&hijack).await, Err(AppError::Forbidden(_))));

        let reprice = UpdateProductServiceCommand {
            caller: owner.clone(),
            product_service_id: item.id.clone(),
            body: ProductServiceChanges {
                current_price_cents: Some(1800),
                ..ProductServiceChanges::default()
            },
        };
        assert_eq!(handlers.update.handle(&reprice).await.unwrap().current_price_cents, 1800);

        let delete = DeleteProductServiceCommand {
            caller: owner.clone(),
            product_service_id: item.id.clone(),
        };
        handlers.delete.handle(&delete).await.unwrap();

        let stored = repositories.products_services.read(&item.id).await.unwrap();
        assert!(stored.deleted_at.is_some());
        let audited = repositories.audit_logs.find(&Filter::new().eq("row_id", item.id.as_str())).await.unwrap();
        assert_eq!(audited.len(), 1);
        assert_eq!(audited[0].action_name, "delete");
        let get = GetProductServiceQuery {
            product_service_id: item.id,
        };
        assert!(matches!(handlers.get.handle(&get).await, Err(AppError::NotFound(_))));
        assert!(handlers.mine.handle(&GetMyProductsServicesQuery { caller: owner }).await.unwrap().products_services.is_empty());
    }

    #[tokio::test]
    async fn public_listing_hides_unverified_vendors_and_unavailable_items() {
        let repositories = repositories();
        let handlers = ProductServiceHandlers::new(repositories.clone());
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let pending = seed_user(&repositories, "amara", Role::Vendor).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;
        let unverified = seed_vendor(&repositories, &pending, false).await;

        seed_product(&repositories, &vendor, "Vetkoek", 1500).await;
        seed_product(&repositories, &vendor, "Amagwinya", 900).await;
        let mut sold_out = seed_product(&repositories, &vendor, "Scones", 700).await;
        sold_out.is_available = false;
        repositories.products_services.update(sold_out).await.unwrap();
        seed_product(&repositories, &unverified, "Pap", 500).await;

        let query = GetProductsServicesQuery {
            filters: ProductServiceFilters {
                ordering: Some(String::from("current_price")),
                ..ProductServiceFilters::default()
            },
        };
        let listed = handlers.list.handle(&query).await.unwrap();
        let names: Vec<&str> = listed.products_services.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Amagwinya", "Vetkoek"]);

        let for_vendor = GetVendorProductsServicesQuery {
            vendor_id: unverified.id,
        };
        assert!(matches!(handlers.for_vendor.handle(&for_vendor).await, Err(AppError::NotFound(_))));

        let mine = handlers.mine.handle(&GetMyProductsServicesQuery { caller: owner }).await.unwrap();
        assert_eq!(mine.products_services.len(), 3);
    }
}
