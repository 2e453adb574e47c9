use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::{
    auth::AuthenticatedUser,
    domain::AuditLog,
    dtos::{AuditLogResponse, GetAuditLogsResponse},
    error::AppError,
    repositories::Filter,
    uow::RepositoryContext,
};

use super::{Query, QueryHandler};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilters {
    pub table_name: Option<String>,
    pub row_id: Option<String>,
    pub user_id: Option<String>,
}

pub struct GetAuditLogsQuery {
    pub caller: AuthenticatedUser,
    pub filters: AuditFilters,
}
impl Query for GetAuditLogsQuery {}

/// Stores an audit entry. The audited action has already run, so a failed
/// write is logged and swallowed.
pub(crate) async fn record(repositories: &RepositoryContext, entry: AuditLog) {
    let summary = format!(
        "{}.{} on {}#{}",
        entry.service_name, entry.action_name, entry.table_name, entry.row_id
    );

    if let Err(e) = repositories.audit_logs.create(entry).await {
        event!(Level::WARN, "Failed to record audit entry {}: {}", summary, e);
    }
}

#[derive(Clone)]
pub struct GetAuditLogsQueryHandler {
    repositories: Arc<RepositoryContext>,
}

impl QueryHandler<GetAuditLogsQuery, GetAuditLogsResponse> for GetAuditLogsQueryHandler {
    async fn handle(&self, input: &GetAuditLogsQuery) -> Result<GetAuditLogsResponse, AppError> {
        input.caller.require_admin()?;

        let filters = &input.filters;
        let mut filter = Filter::new();
        if let Some(table_name) = &filters.table_name {
            filter = filter.eq("table_name", table_name.as_str());
        }
        if let Some(row_id) = &filters.row_id {
            filter = filter.eq("row_id", row_id.as_str());
        }
        if let Some(user_id) = &filters.user_id {
            filter = filter.eq("user_id", user_id.as_str());
        }

        let mut entries = self.repositories.audit_logs.find(&filter).await?;
        entries.sort_by(|a, b| b.event_time.cmp(&a.event_time));

        Ok(GetAuditLogsResponse {
            audit_logs: entries.iter().map(AuditLogResponse::from).collect(),
        })
    }
}

pub struct AuditHandlers {
    pub list: GetAuditLogsQueryHandler,
}

impl AuditHandlers {
    pub fn new(repositories: Arc<RepositoryContext>) -> Self {
        AuditHandlers {
            list: GetAuditLogsQueryHandler { repositories },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cqrs::test_support::{repositories, seed_user},
        domain::Role,
    };
    use serde_json::json;

    #[tokio::test]
    async fn admins_read_filtered_entries_newest_first() {
        let repositories = repositories();
        let handlers = AuditHandlers::new(repositories.clone());
        let admin = seed_user(&repositories, "admin", Role::Admin).await;

        record(&repositories, AuditLog::new("vendors", "verify", "vendors", "v1", Some(&admin.id))).await;
        record(
            &repositories,
            AuditLog::new("orders", "update_status", "orders", "o1", Some(&admin.id))
                .with_payload(json!({"from": "Delivered", "to": "Refunded"})),
        )
        .await;
        record(&repositories, AuditLog::new("orders", "update_status", "orders", "o2", None).failed()).await;

        let orders = handlers
            .list
            .handle(&GetAuditLogsQuery {
                caller: admin.clone(),
                filters: AuditFilters {
                    table_name: Some(String::from("orders")),
                    ..AuditFilters::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(orders.audit_logs.len(), 2);
        assert!(orders.audit_logs[0].event_time >= orders.audit_logs[1].event_time);

        let refund = handlers
            .list
            .handle(&GetAuditLogsQuery {
                caller: admin,
                filters: AuditFilters {
                    row_id: Some(String::from("o1")),
                    ..AuditFilters::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(refund.audit_logs[0].data_payload["to"], "Refunded");
        assert!(refund.audit_logs[0].success);
    }

    #[tokio::test]
    async fn non_admins_are_forbidden() {
        let repositories = repositories();
        let handlers = AuditHandlers::new(repositories.clone());
        let customer = seed_user(&repositories, "sipho", Role::Customer).await;

        let result = handlers
            .list
            .handle(&GetAuditLogsQuery {
                caller: customer,
                filters: AuditFilters::default(),
            })
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }
}
