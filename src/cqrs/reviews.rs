use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::{average_rating, new_id, Review},
    dtos::{GetReviewsResponse, ReviewResponse},
    error::AppError,
    events::Event,
    metrics::BusinessMetrics,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{orders::visible_order, publish, vendors::public_vendor, Command, CommandHandler, Query, QueryHandler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    pub rating: u8,
    pub comment: Option<String>,
}

// commands
pub struct CreateReviewCommand {
    pub caller: AuthenticatedUser,
    pub order_id: String,
    pub body: NewReview,
}
impl Command for CreateReviewCommand {}

// queries
pub struct GetVendorReviewsQuery {
    pub vendor_id: String,
}
impl Query for GetVendorReviewsQuery {}

pub struct GetMyReviewsQuery {
    pub caller: AuthenticatedUser,
}
impl Query for GetMyReviewsQuery {}

pub struct GetReviewQuery {
    pub review_id: String,
}
impl Query for GetReviewQuery {}

fn newest_first(mut reviews: Vec<Review>) -> GetReviewsResponse {
    reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    GetReviewsResponse {
        reviews: reviews.iter().map(ReviewResponse::from).collect(),
    }
}

// command handlers
#[derive(Clone)]
pub struct CreateReviewCommandHandler {
    repositories: Arc<RepositoryContext>,
    metrics: Arc<BusinessMetrics>,
}

impl CommandHandler<CreateReviewCommand, ReviewResponse> for CreateReviewCommandHandler {
    async fn handle(&self, input: &CreateReviewCommand) -> Result<ReviewResponse, AppError> {
        let order = visible_order(&self.repositories, &input.caller, &input.order_id).await?;

        if order.customer_id != input.caller.id {
            return Err(AppError::Forbidden(String::from("Only the customer who placed the order can review it")));
        }
        if !order.is_completed {
            return Err(AppError::Validation(String::from("Only completed orders can be reviewed")));
        }
        if !(1..=5).contains(&input.body.rating) {
            return Err(AppError::Validation(String::from("Rating must be between 1 and 5")));
        }

        let existing = self
            .repositories
            .reviews
            .find_one(&Filter::new().eq("order_id", order.id.as_str()))
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(String::from("This order has already been reviewed")));
        }

        let customer = self.repositories.users.read(&input.caller.id).await?;
        let review = Review {
            id: new_id(),
            order_id: order.id.clone(),
            vendor_id: order.vendor_id.clone(),
            customer_id: customer.id.clone(),
            customer_name: customer.display_name.clone(),
            rating: input.body.rating,
            comment: input
                .body
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
            created_at: Utc::now(),
        };

        let mut uow = self.repositories.begin();
        // the unique index on order_id settles concurrent submissions
        let review = match self.repositories.reviews.create(review).await {
            Ok(review) => review,
            Err(AppError::Conflict(_)) => {
                return Err(AppError::Conflict(String::from("This order has already been reviewed")))
            }
            Err(e) => return Err(e),
        };
        uow.stage(Event::ReviewCreated {
            review_id: review.id.clone(),
            order_id: review.order_id.clone(),
            vendor_id: review.vendor_id.clone(),
            rating: review.rating,
        });

        let ratings: Vec<u8> = self
            .repositories
            .reviews
            .find(&Filter::new().eq("vendor_id", review.vendor_id.as_str()))
            .await?
            .iter()
            .map(|r| r.rating)
            .collect();
        let average = average_rating(&ratings);
        let mut rating = Map::new();
        rating.insert(String::from("average_rating"), json!(average));
        rating.insert(String::from("review_count"), json!(ratings.len()));
        rating.insert(String::from("updated_at"), json!(Utc::now()));
        self.repositories.vendors.set_fields(&review.vendor_id, rating).await?;

        publish(uow).await;
        self.metrics.review_created();
        event!(
            Level::INFO,
            "Review {} left for vendor {}, rating now {}",
            review.id,
            review.vendor_id,
            average
        );

        Ok(ReviewResponse::from(&review))
    }
}

// query handlers
#[derive(Clone)]
pub struct GetVendorReviewsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetVendorReviewsQuery, GetReviewsResponse> for GetVendorReviewsQueryHandler {
    async fn handle(&self, input: &GetVendorReviewsQuery) -> Result<GetReviewsResponse, AppError> {
        let vendor = public_vendor(&self.repositories, &input.vendor_id).await?;
        let reviews = self
            .repositories
            .reviews
            .find(&Filter::new().eq("vendor_id", vendor.id.as_str()))
            .await?;
        Ok(newest_first(reviews))
    }
}

#[derive(Clone)]
pub struct GetMyReviewsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetMyReviewsQuery, GetReviewsResponse> for GetMyReviewsQueryHandler {
    async fn handle(&self, input: &GetMyReviewsQuery) -> Result<GetReviewsResponse, AppError> {
        let reviews = self
            .repositories
            .reviews
            .find(&Filter::new().eq("customer_id", input.caller.id.as_str()))
            .await?;
        Ok(newest_first(reviews))
    }
}

#[derive(Clone)]
pub struct GetReviewQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetReviewQuery, ReviewResponse> for GetReviewQueryHandler {
    async fn handle(&self, input: &GetReviewQuery) -> Result<ReviewResponse, AppError> {
        match self.repositories.reviews.read(&input.review_id).await {
            Ok(review) => Ok(ReviewResponse::from(&review)),
            Err(AppError::NotFound(_)) => Err(AppError::NotFound(String::from("Review"))),
            Err(e) => Err(e),
        }
    }
}

pub struct ReviewHandlers {
    pub create: CreateReviewCommandHandler,
    pub for_vendor: GetVendorReviewsQueryHandler,
    pub mine: GetMyReviewsQueryHandler,
    pub get: GetReviewQueryHandler,
}

impl ReviewHandlers {
    pub fn new(repositories: Arc<RepositoryContext>, metrics: Arc<BusinessMetrics>) -> Self {
        ReviewHandlers {
            create: CreateReviewCommandHandler {
                repositories: repositories.clone(),
                metrics,
            },
            for_vendor: GetVendorReviewsQueryHandler {
                repositories: repositories.clone(),
            },
            mine: GetMyReviewsQueryHandler {
                repositories: repositories.clone(),
            },
            get: GetReviewQueryHandler { repositories },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cqrs::test_support::{repositories, seed_product, seed_user, seed_vendor},
        domain::{Order, OrderLineItem, OrderStatus, Role, Vendor},
    };

    async fn completed_order(
        repositories: &RepositoryContext,
        vendor: &Vendor,
        customer: &AuthenticatedUser,
    ) -> Order {
        let product = seed_product(repositories, vendor, &format!("Plate {}", new_id()), 3000).await;
        let mut order = Order::new(
            vendor.id.clone(),
            customer.id.clone(),
            vec![OrderLineItem::snapshot(&product, 1, 0).unwrap()],
        )
        .unwrap();
        for status in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            order.transition(status, &vendor.user_id).unwrap();
        }
        repositories.orders.create(order).await.unwrap()
    }

    fn review(caller: &AuthenticatedUser, order: &Order, rating: u8) -> CreateReviewCommand {
        CreateReviewCommand {
            caller: caller.clone(),
            order_id: order.id.clone(),
            body: NewReview {
                rating,
                comment: Some(String::from("  Lekker!  ")),
            },
        }
    }

    #[tokio::test]
    async fn reviews_recompute_the_vendor_rating() {
        let repositories = repositories();
        let metrics = Arc::new(BusinessMetrics::new().unwrap());
        let handlers = ReviewHandlers::new(repositories.clone(), metrics.clone());
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;
        repositories.vendors.increment(&vendor.id, "total_orders", 7).await.unwrap();

        for rating in [5, 4, 4] {
            let order = completed_order(&repositories, &vendor, &customer).await;
            let created = handlers.create.handle(&review(&customer, &order, rating)).await.unwrap();
            assert_eq!(created.comment.as_deref(), Some("Lekker!"));
            assert_eq!(created.customer_name, "sipho");
        }

        let vendor = repositories.vendors.read(&vendor.id).await.unwrap();
        assert_eq!(vendor.review_count, 3);
        assert_eq!(vendor.average_rating, 4.3);
        assert_eq!(vendor.total_orders, 7);
        assert!(metrics.render().contains("reachhub_reviews_created_total 3"));

        let listed = handlers
            .for_vendor
            .handle(&GetVendorReviewsQuery {
                vendor_id: vendor.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(listed.reviews.len(), 3);
        let mine = handlers.mine.handle(&GetMyReviewsQuery { caller: customer }).await.unwrap();
        assert_eq!(mine.reviews.len(), 3);
    }

    #[tokio::test]
    async fn one_review_per_completed_order_by_its_customer() {
        let repositories = repositories();
        let handlers = ReviewHandlers::new(repositories.clone(), Arc::new(BusinessMetrics::new().unwrap()));
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;
        let order = completed_order(&repositories, &vendor, &customer).await;

        assert!(matches!(handlers.create.handle(&review(&owner, &order, 5)).await, Err(AppError::Forbidden(_))));
        assert!(matches!(handlers.create.handle(&review(&customer, &order, 6)).await, Err(AppError::Validation(_))));

        let created = handlers.create.handle(&review(&customer, &order, 5)).await.unwrap();
        assert!(matches!(handlers.create.handle(&review(&customer, &order, 4)).await, Err(AppError::Conflict(_))));

        let fetched = handlers
            .get
            .handle(&GetReviewQuery {
                review_id: created.id,
            })
            .await
            .unwrap();
        assert_eq!(fetched.rating, 5);
    }

    #[tokio::test]
    async fn refunded_orders_cannot_be_reviewed() {
        let repositories = repositories();
        let handlers = ReviewHandlers::new(repositories.clone(), Arc::new(BusinessMetrics::new().unwrap()));
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;
        let admin = seed_user(&repositories, "admin", Role::Admin).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;

        let mut order = completed_order(&repositories, &vendor, &customer).await;
        order.transition(OrderStatus::Refunded, &admin.id).unwrap();
        let order = repositories.orders.update(order).await.unwrap();

        assert!(matches!(handlers.create.handle(&review(&customer, &order, 5)).await, Err(AppError::Validation(_))));
        assert!(repositories.reviews.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_orders_cannot_be_reviewed() {
        let repositories = repositories();
        let handlers = ReviewHandlers::new(repositories.clone(), Arc::new(BusinessMetrics::new().unwrap()));
        let owner = seed_user(&repositories, "lerato", Role::Vendor).await;
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;
        let vendor = seed_vendor(&repositories, &owner, true).await;
        let product = seed_product(&repositories, &vendor, "Kota", 4500).await;

        let order = Order::new(
            vendor.id.clone(),
            customer.id.clone(),
            vec![OrderLineItem::snapshot(&product, 1, 0).unwrap()],
        )
        .unwrap();
        let order = repositories.orders.create(order).await.unwrap();

        assert!(matches!(handlers.create.handle(&review(&customer, &order, 5)).await, Err(AppError::Validation(_))));
    }
}
