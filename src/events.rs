use amqprs::{
    callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments, ExchangeType, QueueBindArguments, QueueDeclareArguments},
    connection::{Connection, OpenConnectionArguments},
    BasicProperties, DELIVERY_MODE_PERSISTENT,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::{domain::{Order, OrderStatus}, error::AppError};

pub static ORDER_EVENTS_EXCHANGE_NAME: &str = "order.events";
pub static REVIEW_EVENTS_EXCHANGE_NAME: &str = "review.events";

pub struct RabbitMqInitializationInfo {
    uri: String,
    port: u16,
    username: String,
    password: String,
}

impl RabbitMqInitializationInfo {
    pub fn new(uri: String, port: u16, username: String, password: String) -> RabbitMqInitializationInfo {
        RabbitMqInitializationInfo {
            uri,
            port,
            username,
            password,
        }
    }
}

pub fn vendor_group(vendor_id: &str) -> String {
    format!("vendor_{}_orders", vendor_id)
}

pub fn customer_group(customer_id: &str) -> String {
    format!("customer_{}_orders", customer_id)
}

// events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: String,
        vendor_id: String,
        customer_id: String,
        status: OrderStatus,
        total_amount_cents: i64,
        groups: Vec<String>,
    },
    OrderUpdated {
        order_id: String,
        vendor_id: String,
        customer_id: String,
        status: OrderStatus,
        groups: Vec<String>,
    },
    ReviewCreated {
        review_id: String,
        order_id: String,
        vendor_id: String,
        rating: u8,
    },
}

impl Event {
    pub fn order_created(order: &Order) -> Self {
        Event::OrderCreated {
            order_id: order.id.clone(),
            vendor_id: order.vendor_id.clone(),
            customer_id: order.customer_id.clone(),
            status: order.current_status,
            total_amount_cents: order.total_amount_cents,
            groups: vec![vendor_group(&order.vendor_id), customer_group(&order.customer_id)],
        }
    }

    pub fn order_updated(order: &Order) -> Self {
        Event::OrderUpdated {
            order_id: order.id.clone(),
            vendor_id: order.vendor_id.clone(),
            customer_id: order.customer_id.clone(),
            status: order.current_status,
            groups: vec![vendor_group(&order.vendor_id), customer_group(&order.customer_id)],
        }
    }

    pub fn destination(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } | Event::OrderUpdated { .. } => ORDER_EVENTS_EXCHANGE_NAME,
            Event::ReviewCreated { .. } => REVIEW_EVENTS_EXCHANGE_NAME,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish_message(&self, event: &Event, destination_name: &str) -> Result<(), AppError>;
}

// event brokers
pub struct RabbitMqMessageBroker {
    // kept alive for the channel's lifetime
    _connection: Connection,
    channel: Channel,
}

impl RabbitMqMessageBroker {
    pub async fn new(init_info: RabbitMqInitializationInfo) -> Result<RabbitMqMessageBroker, AppError> {
        let connection = Connection::open(&OpenConnectionArguments::new(
            &init_info.uri,
            init_info.port,
            &init_info.username,
            &init_info.password,
        ))
        .await
        .map_err(|e| AppError::Broker(format!("Failed to open RabbitMQ connection: {}", e)))?;

        connection
            .register_callback(DefaultConnectionCallback)
            .await
            .map_err(|e| AppError::Broker(format!("Failed to register connection callback: {}", e)))?;

        let channel = Self::get_channel(&connection).await?;

        Ok(RabbitMqMessageBroker {
            _connection: connection,
            channel,
        })
    }

    async fn get_channel(connection: &Connection) -> Result<Channel, AppError> {
        let channel = connection
            .open_channel(None)
            .await
            .map_err(|e| AppError::Broker(format!("Failed to get channel: {}", e)))?;

        channel
            .register_callback(DefaultChannelCallback)
            .await
            .map_err(|e| AppError::Broker(format!("Failed to register channel callback: {}", e)))?;

        for destination in [ORDER_EVENTS_EXCHANGE_NAME, REVIEW_EVENTS_EXCHANGE_NAME] {
            channel
                .exchange_declare(ExchangeDeclareArguments::new(destination, &ExchangeType::Fanout.to_string()))
                .await
                .map_err(|e| AppError::Broker(format!("Failed to declare exchange {}: {}", destination, e)))?;
            channel
                .queue_declare(QueueDeclareArguments::durable_client_named(destination))
                .await
                .map_err(|e| AppError::Broker(format!("Failed to declare queue {}: {}", destination, e)))?;
            channel
                .queue_bind(QueueBindArguments::new(destination, destination, ""))
                .await
                .map_err(|e| AppError::Broker(format!("Failed to bind queue {}: {}", destination, e)))?;
        }

        Ok(channel)
    }
}

#[async_trait]
impl MessageBroker for RabbitMqMessageBroker {
    async fn publish_message(&self, event: &Event, destination_name: &str) -> Result<(), AppError> {
        let mut delivery_properties = BasicProperties::default();
        delivery_properties.with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Broker(format!("Failed to serialize event: {}", e)))?;
        event!(Level::DEBUG, "Publishing to {}: {}", destination_name, payload);

        self.channel
            .basic_publish(delivery_properties, payload.into_bytes(), BasicPublishArguments::new(destination_name, ""))
            .await
            .map_err(|e| AppError::Broker(format!("Failed to publish event to broker: {}", e)))
    }
}

/// Stands in for RabbitMQ when no broker is configured.
pub struct LoggingMessageBroker;

#[async_trait]
impl MessageBroker for LoggingMessageBroker {
    async fn publish_message(&self, event: &Event, destination_name: &str) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Broker(format!("Failed to serialize event: {}", e)))?;
        event!(Level::INFO, "Event for {}: {}", destination_name, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::new_id;

    #[test]
    fn order_events_target_vendor_and_customer_groups() {
        let order = Order::new(String::from("v1"), String::from("c1"), vec![]).unwrap();

        match Event::order_created(&order) {
            Event::OrderCreated { groups, status, .. } => {
                assert_eq!(groups, vec!["vendor_v1_orders", "customer_c1_orders"]);
                assert_eq!(status, OrderStatus::Confirmed);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn events_route_to_their_exchange() {
        let review = Event::ReviewCreated {
            review_id: new_id(),
            order_id: new_id(),
            vendor_id: new_id(),
            rating: 5,
        };
        let order = Event::order_updated(&Order::new(new_id(), new_id(), vec![]).unwrap());

        assert_eq!(review.destination(), REVIEW_EVENTS_EXCHANGE_NAME);
        assert_eq!(order.destination(), ORDER_EVENTS_EXCHANGE_NAME);
    }

    #[tokio::test]
    async fn logging_broker_accepts_events() {
        let order = Order::new(new_id(), new_id(), vec![]).unwrap();
        let event = Event::order_created(&order);

        assert!(LoggingMessageBroker.publish_message(&event, event.destination()).await.is_ok());
    }
}
