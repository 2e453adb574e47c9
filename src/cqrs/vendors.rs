use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::{new_id, AuditLog, Role, Vendor},
    dtos::{GetVendorsResponse, VendorResponse, VendorStatsResponse},
    error::AppError,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{audit, contains_ignore_case, directed, parse_ordering, require_non_empty, Command, CommandHandler, Query, QueryHandler};

const VENDOR_ORDERINGS: [&str; 4] = ["name", "average_rating", "review_count", "created_at"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRegistration {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub profile_description: String,
    #[serde(default)]
    pub phone_number: String,
    pub email: Option<String>,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorChanges {
    pub name: Option<String>,
    pub category: Option<String>,
    pub profile_description: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorFilters {
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_rating: Option<f64>,
    pub ordering: Option<String>,
}

// commands
pub struct RegisterVendorCommand {
    pub caller: AuthenticatedUser,
    pub body: VendorRegistration,
}
impl Command for RegisterVendorCommand {}

pub struct UpdateVendorProfileCommand {
    pub caller: AuthenticatedUser,
    pub body: VendorChanges,
}
impl Command for UpdateVendorProfileCommand {}

pub struct VerifyVendorCommand {
    pub caller: AuthenticatedUser,
    pub vendor_id: String,
}
impl Command for VerifyVendorCommand {}

pub struct DeleteVendorCommand {
    pub caller: AuthenticatedUser,
    pub vendor_id: String,
}
impl Command for DeleteVendorCommand {}

// queries
pub struct GetVendorsQuery {
    pub filters: VendorFilters,
}
impl Query for GetVendorsQuery {}

pub struct GetVendorQuery {
    pub vendor_id: String,
}
impl Query for GetVendorQuery {}

pub struct GetMyVendorQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetMyVendorQuery {}

pub struct GetVendorStatsQuery {
    pub caller: AuthenticatedUser,
    pub vendor_id: String,
}
impl Query for GetVendorStatsQuery {}

/// The live vendor profile owned by `user_id`, if any.
pub(crate) async fn vendor_for_user(repositories: &RepositoryContext, user_id: &str) -> Result<Option<Vendor>, AppError> {
    let filter = Filter::new().eq("user_id", user_id).is_null("deleted_at");
    repositories.vendors.find_one(&filter).await
}

/// Looks up a vendor that is visible to the public.
pub(crate) async fn public_vendor(repositories: &RepositoryContext, vendor_id: &str) -> Result<Vendor, AppError> {
    match repositories.vendors.read(vendor_id).await {
        Ok(vendor) if vendor.is_public() => Ok(vendor),
        Ok(_) | Err(AppError::NotFound(_)) => Err(AppError::NotFound(String::from("Vendor"))),
        Err(e) => Err(e),
    }
}

const PROFILE_FIELDS: [&str; 7] = [
    "name",
    "category",
    "profile_description",
    "phone_number",
    "email",
    "address",
    "updated_at",
];

/// Writes only `fields` of `vendor`, so counters and ratings maintained by
/// other requests are not overwritten with a stale copy.
async fn write_fields(repositories: &RepositoryContext, vendor: &Vendor, fields: &[&str]) -> Result<Vendor, AppError> {
    let value = serde_json::to_value(vendor)
        .map_err(|e| AppError::Internal(format!("Failed to serialize vendor {}: {}", vendor.id, e)))?;

    let mut changes = Map::new();
    for field in fields {
        if let Some(v) = value.get(*field) {
            changes.insert(field.to_string(), v.clone());
        }
    }

    repositories.vendors.set_fields(&vendor.id, changes).await?;
    repositories.vendors.read(&vendor.id).await
}

fn sort_vendors(vendors: &mut [Vendor], field: &str, descending: bool) {
    vendors.sort_by(|a, b| {
        let ordering = match field {
            "name" => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            "average_rating" => a.average_rating.total_cmp(&b.average_rating),
            "review_count" => a.review_count.cmp(&b.review_count),
            _ => a.created_at.cmp(&b.created_at),
        };
        directed(ordering, descending)
    });
}

// command handlers
#[derive(Clone)]
pub struct RegisterVendorCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<RegisterVendorCommand, VendorResponse> for RegisterVendorCommandHandler {
    async fn handle(&self, input: &RegisterVendorCommand) -> Result<VendorResponse, AppError> {
        let body = &input.body;
        require_non_empty("name", &body.name)?;

        let already = || AppError::Conflict(String::from("User already has a vendor profile"));

        // one vendor per user for good, a soft-deleted profile still counts
        let existing = self
            .repositories
            .vendors
            .find_one(&Filter::new().eq("user_id", input.caller.id.as_str()))
            .await?;
        if existing.is_some() {
            return Err(already());
        }

        let mut user = self.repositories.users.read(&input.caller.id).await?;
        let now = Utc::now();
        let vendor = Vendor {
            id: new_id(),
            user_id: user.id.clone(),
            name: body.name.trim().to_string(),
            category: body.category.trim().to_string(),
            profile_description: body.profile_description.trim().to_string(),
            phone_number: body.phone_number.trim().to_string(),
            email: body
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .unwrap_or(&user.email)
                .to_string(),
            address: body.address.trim().to_string(),
            is_verified: false,
            average_rating: 0.0,
            review_count: 0,
            total_orders: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let vendor = match self.repositories.vendors.create(vendor).await {
            Ok(vendor) => vendor,
            Err(AppError::Conflict(_)) => return Err(already()),
            Err(e) => return Err(e),
        };

        if user.role != Role::Admin {
            user.role = Role::Vendor;
            user.updated_at = now;
            self.repositories.users.update(user).await?;
        }

        event!(Level::INFO, "User {} registered vendor {}", input.caller.username, vendor.id);
        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct UpdateVendorProfileCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<UpdateVendorProfileCommand, VendorResponse> for UpdateVendorProfileCommandHandler {
    async fn handle(&self, input: &UpdateVendorProfileCommand) -> Result<VendorResponse, AppError> {
        let mut vendor = vendor_for_user(&self.repositories, &input.caller.id)
            .await?
            .ok_or_else(|| AppError::NotFound(String::from("Vendor profile")))?;
        let changes = &input.body;

        if let Some(name) = &changes.name {
            require_non_empty("name", name)?;
            vendor.name = name.trim().to_string();
        }
        if let Some(category) = &changes.category {
            vendor.category = category.trim().to_string();
        }
        if let Some(description) = &changes.profile_description {
            vendor.profile_description = description.trim().to_string();
        }
        if let Some(phone_number) = &changes.phone_number {
            vendor.phone_number = phone_number.trim().to_string();
        }
        if let Some(email) = &changes.email {
            require_non_empty("email", email)?;
            vendor.email = email.trim().to_string();
        }
        if let Some(address) = &changes.address {
            vendor.address = address.trim().to_string();
        }
        vendor.updated_at = Utc::now();

        let vendor = write_fields(&self.repositories, &vendor, &PROFILE_FIELDS).await?;
        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct VerifyVendorCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<VerifyVendorCommand, VendorResponse> for VerifyVendorCommandHandler {
    async fn handle(&self, input: &VerifyVendorCommand) -> Result<VendorResponse, AppError> {
        input.caller.require_admin()?;

        let mut vendor = self.repositories.vendors.read(&input.vendor_id).await?;
        if vendor.is_deleted() {
            return Err(AppError::NotFound(String::from("Vendor")));
        }
        if !vendor.is_verified {
            vendor.is_verified = true;
            vendor.updated_at = Utc::now();
            vendor = write_fields(&self.repositories, &vendor, &["is_verified", "updated_at"]).await?;
            audit::record(
                &self.repositories,
                AuditLog::new("vendors", "verify", "vendors", &vendor.id, Some(&input.caller.id))
                    .with_payload(json!({"name": vendor.name})),
            )
            .await;
            event!(Level::INFO, "Vendor {} verified by {}", vendor.id, input.caller.username);
        }

        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct DeleteVendorCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<DeleteVendorCommand, VendorResponse> for DeleteVendorCommandHandler {
    async fn handle(&self, input: &DeleteVendorCommand) -> Result<VendorResponse, AppError> {
        input.caller.require_admin()?;

        let mut vendor = self.repositories.vendors.read(&input.vendor_id).await?;
        if vendor.is_deleted() {
            return Err(AppError::NotFound(String::from("Vendor")));
        }

        let now = Utc::now();
        vendor.deleted_at = Some(now);
        vendor.updated_at = now;
        let vendor = write_fields(&self.repositories, &vendor, &["deleted_at", "updated_at"]).await?;
        audit::record(
            &self.repositories,
            AuditLog::new("vendors", "delete", "vendors", &vendor.id, Some(&input.caller.id))
                .with_payload(json!({"name": vendor.name, "soft_delete": true})),
        )
        .await;

        event!(Level::INFO, "Vendor {} soft-deleted by {}", vendor.id, input.caller.username);
        Ok(VendorResponse::from(&vendor))
    }
}

// query handlers
#[derive(Clone)]
pub struct GetVendorsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorsQuery, GetVendorsResponse> for GetVendorsQueryHandler {
    async fn handle(&self, input: &GetVendorsQuery) -> Result<GetVendorsResponse, AppError> {
        let filters = &input.filters;
        let (field, descending) = parse_ordering(filters.ordering.as_deref(), &VENDOR_ORDERINGS, ("created_at", true))?;

        let filter = Filter::new().flag("is_verified", true).is_null("deleted_at");
        let mut vendors: Vec<Vendor> = self
            .repositories
            .vendors
            .find(&filter)
            .await?
            .into_iter()
            .filter(|v| match filters.search.as_deref().map(str::trim) {
                Some(term) if !term.is_empty() => {
                    contains_ignore_case(&v.name, term)
                        || contains_ignore_case(&v.profile_description, term)
                        || contains_ignore_case(&v.category, term)
                }
                _ => true,
            })
            .filter(|v| match filters.category.as_deref() {
                Some(category) => v.category.eq_ignore_ascii_case(category.trim()),
                None => true,
            })
            .filter(|v| filters.min_rating.map_or(true, |min| v.average_rating >= min))
            .collect();

        sort_vendors(&mut vendors, field, descending);

        Ok(GetVendorsResponse {
            vendors: vendors.iter().map(VendorResponse::from).collect(),
        })
    }
}

#[derive(Clone)]
pub struct GetVendorQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorQuery, VendorResponse> for GetVendorQueryHandler {
    async fn handle(&self, input: &GetVendorQuery) -> Result<VendorResponse, AppError> {
        let vendor = public_vendor(&self.repositories, &input.vendor_id).await?;
        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct GetMyVendorQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetMyVendorQuery, VendorResponse> for GetMyVendorQueryHandler {
    async fn handle(&self, input: &GetMyVendorQuery) -> Result<VendorResponse, AppError> {
        let vendor = vendor_for_user(&self.repositories, &input.caller.id)
            .await?
            .ok_or_else(|| AppError::NotFound(String::from("Vendor profile")))?;
        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct GetVendorStatsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorStatsQuery, VendorStatsResponse> for GetVendorStatsQueryHandler {
    async fn handle(&self, input: &GetVendorStatsQuery) -> Result<VendorStatsResponse, AppError> {
        let vendor = self.repositories.vendors.read(&input.vendor_id).await?;
        if vendor.user_id != input.caller.id && !input.caller.is_admin() {
            return Err(AppError::Forbidden(String::from("Only the vendor owner can view these statistics")));
        }

        let products = self
            .repositories
            .products_services
            .find(&Filter::new().eq("vendor_id", vendor.id.as_str()).is_null("deleted_at"))
            .await?;

        Ok(VendorStatsResponse {
            total_products: products.len(),
            total_reviews: vendor.review_count,
            average_rating: vendor.average_rating,
            total_orders: vendor.total_orders,
            can_accept_orders: vendor.can_accept_orders(),
        })
    }
}

pub struct VendorHandlers {
    pub register: RegisterVendorCommandHandler,
    pub update_profile: UpdateVendorProfileCommandHandler,
    pub verify: VerifyVendorCommandHandler,
    pub delete: DeleteVendorCommandHandler,
    pub list: GetVendorsQueryHandler,
    pub get: GetVendorQueryHandler,
    pub mine: GetMyVendorQueryHandler,
    pub stats: GetVendorStatsQueryHandler,
}

impl VendorHandlers {
    pub fn new(repositories: Arc<RepositoryContext>) -> Self {
        VendorHandlers {
            register: RegisterVendorCommandHandler {
                repositories: repositories.clone(),
            },
            update_profile: UpdateVendorProfileCommandHandler {
                repositories: repositories.clone(),
            },
            verify: VerifyVendorCommandHandler {
                repositories: repositories.clone(),
            },
            delete: DeleteVendorCommandHandler {
                repositories: repositories.clone(),
            },
            list: GetVendorsQueryHandler {
                repositories: repositories.clone(),
            },
            get: GetVendorQueryHandler {
                repositories: repositories.clone(),
            },
            mine: GetMyVendorQueryHandler {
                repositories: repositories.clone(),
            },
            stats: GetVendorStatsQueryHandler { repositories },
        }
    }
}
