use std::sync::Arc;

use crate::{
    auth::TokenService,
    cqrs::{
        audit::AuditHandlers, auth::AuthHandlers, customers::CustomerHandlers, orders::OrderHandlers,
        products::ProductServiceHandlers, reviews::ReviewHandlers, vendors::VendorHandlers,
    },
    metrics::BusinessMetrics,
    uow::RepositoryContext,
};

pub struct AppState {
    pub repositories: Arc<RepositoryContext>,
    pub token_service: Arc<TokenService>,
    pub auth: AuthHandlers,
    pub vendors: VendorHandlers,
    pub products_services: ProductServiceHandlers,
    pub orders: OrderHandlers,
    pub reviews: ReviewHandlers,
    pub customers: CustomerHandlers,
    pub audit: AuditHandlers,
}

impl AppState {
    pub fn new(
        repositories: Arc<RepositoryContext>,
        token_service: Arc<TokenService>,
        metrics: Arc<BusinessMetrics>,
    ) -> AppState {
        AppState {
            auth: AuthHandlers::new(repositories.clone(), token_service.clone(), metrics.clone()),
            vendors: VendorHandlers::new(repositories.clone()),
            products_services: ProductServiceHandlers::new(repositories.clone()),
            orders: OrderHandlers::new(repositories.clone(), metrics.clone()),
            reviews: ReviewHandlers::new(repositories.clone(), metrics),
            customers: CustomerHandlers::new(repositories.clone()),
            audit: AuditHandlers::new(repositories.clone()),
            repositories,
            token_service,
        }
    }
}
