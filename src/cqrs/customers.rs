use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::{new_id, Address, AddressType, Favorite},
    dtos::{AddressResponse, EmptyResponse, GetAddressesResponse, GetVendorsResponse, VendorResponse},
    error::AppError,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{require_non_empty, vendors::public_vendor, Command, CommandHandler, Query, QueryHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddress {
    pub address_type: AddressType,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state_province: Option<String>,
    pub postal_code: String,
    pub country_code: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

// commands
pub struct CreateAddressCommand {
    pub caller: AuthenticatedUser,
    pub body: NewAddress,
}
impl Command for CreateAddressCommand {}

pub struct DeleteAddressCommand {
    pub caller: AuthenticatedUser,
    pub address_id: String,
}
impl Command for DeleteAddressCommand {}

pub struct AddFavoriteCommand {
    pub caller: AuthenticatedUser,
    pub vendor_id: String,
}
impl Command for AddFavoriteCommand {}

pub struct RemoveFavoriteCommand {
    pub caller: AuthenticatedUser,
    pub vendor_id: String,
}
impl Command for RemoveFavoriteCommand {}

// queries
pub struct GetAddressesQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetAddressesQuery {}

pub struct GetFavoritesQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetFavoritesQuery {}

fn optional_text(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

fn favorite_filter(user_id: &str, vendor_id: &str) -> Filter {
    Filter::new().eq("user_id", user_id).eq("vendor_id", vendor_id)
}

// command handlers
#[derive(Clone)]
pub struct CreateAddressCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<CreateAddressCommand, AddressResponse> for CreateAddressCommandHandler {
    async fn handle(&self, input: &CreateAddressCommand) -> Result<AddressResponse, AppError> {
        let body = &input.body;
        require_non_empty("line1", &body.line1)?;
        require_non_empty("city", &body.city)?;
        require_non_empty("postal_code", &body.postal_code)?;

        if body.is_default {
            let defaults = self
                .repositories
                .addresses
                .find(&Filter::new().eq("user_id", input.caller.id.as_str()).flag("is_default", true))
                .await?;
            for mut previous in defaults {
                previous.is_default = false;
                self.repositories.addresses.update(previous).await?;
            }
        }

        let address = self
            .repositories
            .addresses
            .create(Address {
                id: new_id(),
                user_id: input.caller.id.clone(),
                address_type: body.address_type,
                line1: body.line1.trim().to_string(),
                line2: optional_text(&body.line2),
                city: body.city.trim().to_string(),
                state_province: optional_text(&body.state_province),
                postal_code: body.postal_code.trim().to_string(),
                country_code: optional_text(&body.country_code).map(|c| c.to_uppercase()),
                is_default: body.is_default,
                created_at: Utc::now(),
            })
            .await?;

        Ok(AddressResponse::from(&address))
    }
}

#[derive(Clone)]
pub struct DeleteAddressCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<DeleteAddressCommand, EmptyResponse> for DeleteAddressCommandHandler {
    async fn handle(&self, input: &DeleteAddressCommand) -> Result<EmptyResponse, AppError> {
        match self.repositories.addresses.read(&input.address_id).await {
            Ok(address) if address.user_id == input.caller.id => {
                self.repositories.addresses.delete(&address.id).await?;
                Ok(EmptyResponse {})
            }
            Ok(_) | Err(AppError::NotFound(_)) => Err(AppError::NotFound(String::from("Address"))),
            Err(e) => Err(e),
        }
    }
}

#[derive(Clone)]
pub struct AddFavoriteCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<AddFavoriteCommand, VendorResponse> for AddFavoriteCommandHandler {
    async fn handle(&self, input: &AddFavoriteCommand) -> Result<VendorResponse, AppError> {
        let vendor = public_vendor(&self.repositories, &input.vendor_id).await?;

        let existing = self
            .repositories
            .favorites
            .find_one(&favorite_filter(&input.caller.id, &vendor.id))
            .await?;
        if existing.is_none() {
            let favorite = Favorite {
                id: new_id(),
                user_id: input.caller.id.clone(),
                vendor_id: vendor.id.clone(),
                created_at: Utc::now(),
            };
            // a concurrent add won the unique key, the favorite exists either way
            match self.repositories.favorites.create(favorite).await {
                Ok(_) | Err(AppError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
            event!(Level::DEBUG, "User {} favorited vendor {}", input.caller.username, vendor.id);
        }

        Ok(VendorResponse::from(&vendor))
    }
}

#[derive(Clone)]
pub struct RemoveFavoriteCommandHandler {
    repositories: Arc<RepositoryContext>,
}

impl CommandHandler<RemoveFavoriteCommand, EmptyResponse> for RemoveFavoriteCommandHandler {
    async fn handle(&self, input: &RemoveFavoriteCommand) -> Result<EmptyResponse, AppError> {
        let favorite = self
            .repositories
            .favorites
            .find_one(&favorite_filter(&input.caller.id, &input.vendor_id))
            .await?
            .ok_or_else(|| AppError::NotFound(String::from("Favorite")))?;

        self.repositories.favorites.delete(&favorite.id).await?;
        Ok(EmptyResponse {})
    }
}

// query handlers
#[derive(Clone)]
pub struct GetAddressesQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetAddressesQuery, GetAddressesResponse> for GetAddressesQueryHandler {
    async fn handle(&self, input: &GetAddressesQuery) -> Result<GetAddressesResponse, AppError> {
        let mut addresses = self
            .repositories
            .addresses
            .find(&Filter::new().eq("user_id", input.caller.id.as_str()))
            .await?;
        // default first, then newest
        addresses.sort_by(|a, b| b.is_default.cmp(&a.is_default).then(b.created_at.cmp(&a.created_at)));

        Ok(GetAddressesResponse {
            addresses: addresses.iter().map(AddressResponse::from).collect(),
        })
    }
}

#[derive(Clone)]
pub struct GetFavoritesQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetFavoritesQuery, GetVendorsResponse> for GetFavoritesQueryHandler {
    async fn handle(&self, input: &GetFavoritesQuery) -> Result<GetVendorsResponse, AppError> {
        let mut favorites = self
            .repositories
            .favorites
            .find(&Filter::new().eq("user_id", input.caller.id.as_str()))
            .await?;
        favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut vendors = Vec::with_capacity(favorites.len());
        for favorite in favorites {
            // vendors that were unverified or removed since drop out of the list
            match public_vendor(&self.repositories, &favorite.vendor_id).await {
                Ok(vendor) => vendors.push(VendorResponse::from(&vendor)),
                Err(AppError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(GetVendorsResponse { vendors })
    }
}

pub struct CustomerHandlers {
    pub create_address: CreateAddressCommandHandler,
    pub delete_address: DeleteAddressCommandHandler,
    pub add_favorite: AddFavoriteCommandHandler,
    pub remove_favorite: RemoveFavoriteCommandHandler,
    pub addresses: GetAddressesQueryHandler,
    pub favorites: GetFavoritesQueryHandler,
}

impl CustomerHandlers {
    pub fn new(repositories: Arc<RepositoryContext>) -> Self {
        CustomerHandlers {
            create_address: CreateAddressCommandHandler {
                repositories: repositories.clone(),
            },
            delete_address: DeleteAddressCommandHandler {
                repositories: repositories.clone(),
            },
            add_favorite: AddFavoriteCommandHandler {
                repositories: repositories.clone(),
            },
            remove_favorite: RemoveFavoriteCommandHandler {
                repositories: repositories.clone(),
            },
            addresses: GetAddressesQueryHandler {
                repositories: repositories.clone(),
            },
            favorites: GetFavoritesQueryHandler { repositories },
        }
    }
}
