use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{event, Level};

use crate::error::AppError;

pub enum LoginOutcome {
    Success,
    Failure,
}

impl LoginOutcome {
    fn label(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::Failure => "failure",
        }
    }
}

/// Marketplace counters, rendered next to the HTTP metrics on `/metrics`.
pub struct BusinessMetrics {
    registry: Registry,
    orders_created: IntCounter,
    reviews_created: IntCounter,
    logins: IntCounterVec,
}

impl BusinessMetrics {
    pub fn new() -> Result<BusinessMetrics, AppError> {
        let registry = Registry::new();

        let orders_created = IntCounter::with_opts(Opts::new(
            "reachhub_orders_created_total",
            "Orders placed by customers",
        ))
        .map_err(metric_error)?;
        let reviews_created = IntCounter::with_opts(Opts::new(
            "reachhub_reviews_created_total",
            "Reviews left on completed orders",
        ))
        .map_err(metric_error)?;
        let logins = IntCounterVec::new(
            Opts::new("reachhub_logins_total", "Login attempts by outcome"),
            &["outcome"],
        )
        .map_err(metric_error)?;

        registry.register(Box::new(orders_created.clone())).map_err(metric_error)?;
        registry.register(Box::new(reviews_created.clone())).map_err(metric_error)?;
        registry.register(Box::new(logins.clone())).map_err(metric_error)?;

        Ok(BusinessMetrics {
            registry,
            orders_created,
            reviews_created,
            logins,
        })
    }

    pub fn order_created(&self) {
        self.orders_created.inc();
    }

    pub fn review_created(&self) {
        self.reviews_created.inc();
    }

    pub fn login(&self, outcome: LoginOutcome) {
        self.logins.with_label_values(&[outcome.label()]).inc();
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        match encoder.encode_to_string(&self.registry.gather()) {
            Ok(text) => text,
            Err(e) => {
                event!(Level::WARN, "Error occurred while encoding business metrics: {}", e);
                String::new()
            }
        }
    }
}

fn metric_error(e: prometheus::Error) -> AppError {
    AppError::Internal(format!("Failed to register metric: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        let metrics = BusinessMetrics::new().unwrap();
        metrics.order_created();
        metrics.order_created();
        metrics.login(LoginOutcome::Failure);

        let text = metrics.render();

        assert!(text.contains("reachhub_orders_created_total 2"));
        assert!(text.contains("reachhub_logins_total{outcome=\"failure\"} 1"));
        assert!(text.contains("reachhub_reviews_created_total 0"));
    }
}
