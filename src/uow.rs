use std::sync::Arc;

use tracing::{event, Level};

use crate::{
    domain::{Address, AuditLog, Favorite, Order, ProductService, Review, User, Vendor},
    error::AppError,
    events::{Event, MessageBroker},
    repositories::{InMemoryRepository, MongoDbInitializationInfo, MongoDbRepository, Repository},
};

/// Repositories shared by every handler, plus the broker that units of work publish to.
#[derive(Clone)]
pub struct RepositoryContext {
    pub users: Arc<dyn Repository<User>>,
    pub vendors: Arc<dyn Repository<Vendor>>,
    pub products_services: Arc<dyn Repository<ProductService>>,
    pub orders: Arc<dyn Repository<Order>>,
    pub reviews: Arc<dyn Repository<Review>>,
    pub addresses: Arc<dyn Repository<Address>>,
    pub favorites: Arc<dyn Repository<Favorite>>,
    pub audit_logs: Arc<dyn Repository<AuditLog>>,
    message_broker: Arc<dyn MessageBroker>,
}

impl RepositoryContext {
    pub fn in_memory(message_broker: Arc<dyn MessageBroker>) -> RepositoryContext {
        RepositoryContext {
            users: Arc::new(InMemoryRepository::new()),
            vendors: Arc::new(InMemoryRepository::new()),
            products_services: Arc::new(InMemoryRepository::new()),
            orders: Arc::new(InMemoryRepository::new()),
            reviews: Arc::new(InMemoryRepository::new()),
            addresses: Arc::new(InMemoryRepository::new()),
            favorites: Arc::new(InMemoryRepository::new()),
            audit_logs: Arc::new(InMemoryRepository::new()),
            message_broker,
        }
    }

    pub async fn mongodb(
        info: &MongoDbInitializationInfo,
        client: &mongodb::Client,
        message_broker: Arc<dyn MessageBroker>,
    ) -> Result<RepositoryContext, AppError> {
        Ok(RepositoryContext {
            users: Arc::new(MongoDbRepository::new(info, client).await?),
            vendors: Arc::new(MongoDbRepository::new(info, client).await?),
            products_services: Arc::new(MongoDbRepository::new(info, client).await?),
            orders: Arc::new(MongoDbRepository::new(info, client).await?),
            reviews: Arc::new(MongoDbRepository::new(info, client).await?),
            addresses: Arc::new(MongoDbRepository::new(info, client).await?),
            favorites: Arc::new(MongoDbRepository::new(info, client).await?),
            audit_logs: Arc::new(MongoDbRepository::new(info, client).await?),
            message_broker,
        })
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork {
            message_broker: self.message_broker.clone(),
            pending_events: Vec::new(),
        }
    }
}

/// Events staged by a single operation.
///
/// Handlers write through the repositories, `stage` the domain events that
/// follow from the write, then `commit` to publish them. `rollback` drops them.
pub struct UnitOfWork {
    message_broker: Arc<dyn MessageBroker>,
    pending_events: Vec<Event>,
}

impl UnitOfWork {
    pub fn stage(&mut self, event: Event) {
        self.pending_events.push(event);
    }

    pub async fn commit(self) -> Result<(), AppError> {
        event!(Level::DEBUG, "Committing {} staged events", self.pending_events.len());

        for staged in &self.pending_events {
            self.message_broker.publish_message(staged, staged.destination()).await?;
        }

        Ok(())
    }

    pub fn rollback(self) {
        event!(Level::DEBUG, "Rolling back {} staged events", self.pending_events.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MockMessageBroker;

    #[tokio::test]
    async fn commit_publishes_staged_events_once() {
        let mut broker = MockMessageBroker::new();
        broker
            .expect_publish_message()
            .withf(|_, destination| destination == "order.events")
            .times(1)
            .returning(|_, _| Ok(()));

        let context = RepositoryContext::in_memory(Arc::new(broker));
        let order = Order::new(String::from("v1"), String::from("c1"), vec![]).unwrap();

        let mut uow = context.begin();
        uow.stage(Event::order_created(&order));
        uow.commit().await.unwrap();
        context.begin().commit().await.unwrap();
    }

    #[tokio::test]
    async fn rollback_discards_staged_events() {
        let mut broker = MockMessageBroker::new();
        broker.expect_publish_message().times(0);

        let context = RepositoryContext::in_memory(Arc::new(broker));
        let order = Order::new(String::from("v1"), String::from("c1"), vec![]).unwrap();

        let mut uow = context.begin();
        uow.stage(Event::order_updated(&order));
        uow.rollback();
        context.begin().commit().await.unwrap();
    }
}
