use async_trait::async_trait;
use futures_util::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use mongodb::{
    bson::{self, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{event, Level};
use std::{collections::HashMap, sync::Arc};

use crate::{domain::Entity, error::AppError};

#[derive(Debug)]
pub struct MongoDbInitializationInfo {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Bool(bool),
    Null,
}

/// Conjunction of field equalities, evaluated against an entity's serialized form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, FilterValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.conditions.push((field.to_string(), FilterValue::Str(value.into())));
        self
    }

    pub fn flag(mut self, field: &str, value: bool) -> Self {
        self.conditions.push((field.to_string(), FilterValue::Bool(value)));
        self
    }

    pub fn is_null(mut self, field: &str) -> Self {
        self.conditions.push((field.to_string(), FilterValue::Null));
        self
    }

    pub fn matches(&self, entity: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = entity.get(field).unwrap_or(&Value::Null);
            match expected {
                FilterValue::Str(s) => actual.as_str() == Some(s.as_str()),
                FilterValue::Bool(b) => actual.as_bool() == Some(*b),
                FilterValue::Null => actual.is_null(),
            }
        })
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();

        for (field, value) in &self.conditions {
            let bson = match value {
                FilterValue::Str(s) => Bson::String(s.clone()),
                FilterValue::Bool(b) => Bson::Boolean(*b),
                FilterValue::Null => Bson::Null,
            };
            document.insert(field.clone(), bson);
        }

        document
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn create(&self, entity: T) -> Result<T, AppError>;
    async fn read(&self, id: &str) -> Result<T, AppError>;
    async fn find(&self, filter: &Filter) -> Result<Vec<T>, AppError>;
    async fn read_all(&self) -> Result<Vec<T>, AppError>;
    async fn update(&self, entity: T) -> Result<T, AppError>;
    async fn delete(&self, id: &str) -> Result<(), AppError>;

    /// Adds `by` to a numeric field without rewriting the rest of the document.
    async fn increment(&self, id: &str, field: &str, by: i64) -> Result<(), AppError>;

    /// Overwrites the given top-level fields without rewriting the rest of the document.
    async fn set_fields(&self, id: &str, fields: Map<String, Value>) -> Result<(), AppError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>, AppError> {
        Ok(self.find(filter).await?.into_iter().next())
    }
}

fn not_found<T: Entity>(id: &str) -> AppError {
    AppError::NotFound(format!("{} with id {}", T::COLLECTION, id))
}

fn duplicate<T: Entity>(fields: &[&str]) -> AppError {
    AppError::Conflict(format!("{} with the same {} already exists", T::COLLECTION, fields.join(", ")))
}

fn to_value<T: Entity>(entity: &T) -> Result<Value, AppError> {
    serde_json::to_value(entity)
        .map_err(|e| AppError::Repository(format!("Failed to serialize {}: {}", T::COLLECTION, e)))
}

fn from_value<T: Entity>(value: Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Repository(format!("Failed to deserialize {}: {}", T::COLLECTION, e)))
}

#[derive(Clone)]
pub struct InMemoryRepository<T: Entity> {
    entities: Arc<Mutex<HashMap<String, T>>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        InMemoryRepository {
            entities: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> InMemoryRepository<T> {
    /// Finds the first unique key `candidate` shares with another stored entity.
    fn clashing_key(entities: &HashMap<String, T>, candidate: &T) -> Result<Option<&'static [&'static str]>, AppError> {
        if T::UNIQUE_KEYS.is_empty() {
            return Ok(None);
        }

        let candidate_value = to_value(candidate)?;
        for existing in entities.values().filter(|e| e.id() != candidate.id()) {
            let existing_value = to_value(existing)?;
            for key in T::UNIQUE_KEYS {
                if key.iter().all(|field| existing_value.get(field) == candidate_value.get(field)) {
                    return Ok(Some(*key));
                }
            }
        }

        Ok(None)
    }

    async fn modify(&self, id: &str, change: impl FnOnce(&mut Map<String, Value>)) -> Result<(), AppError> {
        let mut lock = self.entities.lock().await;
        let existing = lock.get_mut(id).ok_or_else(|| not_found::<T>(id))?;

        let mut value = to_value(existing)?;
        match value.as_object_mut() {
            Some(document) => change(document),
            None => return Err(AppError::Repository(format!("{} is not a document", T::COLLECTION))),
        }
        *existing = from_value(value)?;

        Ok(())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn create(&self, entity: T) -> Result<T, AppError> {
        let mut lock = self.entities.lock().await;
        if lock.contains_key(entity.id()) {
            return Err(AppError::Conflict(format!("{} with id {} already exists", T::COLLECTION, entity.id())));
        }
        if let Some(key) = Self::clashing_key(&lock, &entity)? {
            return Err(duplicate::<T>(key));
        }
        lock.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    async fn read(&self, id: &str) -> Result<T, AppError> {
        let lock = self.entities.lock().await;
        match lock.get(id) {
            Some(x) => Ok(x.clone()),
            None => Err(not_found::<T>(id)),
        }
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<T>, AppError> {
        let lock = self.entities.lock().await;
        let mut found = Vec::new();

        for entity in lock.values() {
            if filter.matches(&to_value(entity)?) {
                found.push(entity.clone());
            }
        }

        Ok(found)
    }

    async fn read_all(&self) -> Result<Vec<T>, AppError> {
        let lock = self.entities.lock().await;
        Ok(lock.values().cloned().collect())
    }

    async fn update(&self, entity: T) -> Result<T, AppError> {
        let mut lock = self.entities.lock().await;
        if !lock.contains_key(entity.id()) {
            return Err(not_found::<T>(entity.id()));
        }
        if let Some(key) = Self::clashing_key(&lock, &entity)? {
            return Err(duplicate::<T>(key));
        }
        lock.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        let mut lock = self.entities.lock().await;
        match lock.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found::<T>(id)),
        }
    }

    async fn increment(&self, id: &str, field: &str, by: i64) -> Result<(), AppError> {
        self.modify(id, |document| {
            let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
            document.insert(field.to_string(), Value::from(current + by));
        })
        .await
    }

    async fn set_fields(&self, id: &str, fields: Map<String, Value>) -> Result<(), AppError> {
        self.modify(id, |document| document.extend(fields)).await
    }
}

#[derive(Clone)]
pub struct MongoDbRepository<T: Entity> {
    collection: Collection<T>,
}

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

impl<T: Entity> MongoDbRepository<T> {
    /// Opens the collection and makes sure its unique indexes exist.
    pub async fn new(info: &MongoDbInitializationInfo, client: &Client) -> Result<Self, AppError> {
        let database = client.database(&info.database);
        let repository = MongoDbRepository {
            collection: database.collection(T::COLLECTION),
        };

        repository.ensure_unique_index(&["id"]).await?;
        for key in T::UNIQUE_KEYS {
            repository.ensure_unique_index(key).await?;
        }

        Ok(repository)
    }

    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), AppError> {
        let mut keys = Document::new();
        for field in fields {
            keys.insert(*field, 1i32);
        }

        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();

        match self.collection.create_index(index).await {
            Ok(result) => {
                event!(Level::DEBUG, "Index {} ready on {}", result.index_name, T::COLLECTION);
                Ok(())
            }
            Err(e) => Err(AppError::Repository(format!(
                "Failed to create index on {} ({}): {}",
                T::COLLECTION,
                fields.join(", "),
                e
            ))),
        }
    }

    fn by_id(id: &str) -> Document {
        Filter::new().eq("id", id).to_document()
    }

    fn write_error(action: &str, e: mongodb::error::Error) -> AppError {
        if is_duplicate_key(&e) {
            AppError::Conflict(format!("{} already exists: {}", T::COLLECTION, e))
        } else {
            AppError::Repository(format!("Failed to {} {}: {}", action, T::COLLECTION, e))
        }
    }

    async fn update_fields(&self, id: &str, update: Document) -> Result<(), AppError> {
        match self.collection.update_one(Self::by_id(id), update).await {
            Ok(result) if result.matched_count == 0 => Err(not_found::<T>(id)),
            Ok(_) => Ok(()),
            Err(e) => Err(Self::write_error("update", e)),
        }
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MongoDbRepository<T> {
    async fn create(&self, entity: T) -> Result<T, AppError> {
        match self.collection.insert_one(&entity).await {
            Ok(_) => Ok(entity),
            Err(e) => Err(Self::write_error("insert", e)),
        }
    }

    async fn read(&self, id: &str) -> Result<T, AppError> {
        match self.collection.find_one(Self::by_id(id)).await {
            Ok(Some(entity)) => Ok(entity),
            Ok(None) => Err(not_found::<T>(id)),
            Err(e) => Err(AppError::Repository(format!("Failed to read {}: {}", T::COLLECTION, e))),
        }
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<T>, AppError> {
        let mut found = Vec::new();

        match self.collection.find(filter.to_document()).await {
            Ok(mut cursor) => {
                while let Some(entity) = cursor
                    .try_next()
                    .await
                    .map_err(|e| AppError::Repository(format!("Failed to read {}: {}", T::COLLECTION, e)))?
                {
                    found.push(entity);
                }

                Ok(found)
            }
            Err(e) => Err(AppError::Repository(format!("Failed to find {}: {}", T::COLLECTION, e))),
        }
    }

    async fn read_all(&self) -> Result<Vec<T>, AppError> {
        self.find(&Filter::new()).await
    }

    async fn update(&self, entity: T) -> Result<T, AppError> {
        match self.collection.replace_one(Self::by_id(entity.id()), &entity).await {
            Ok(result) if result.matched_count == 0 => Err(not_found::<T>(entity.id())),
            Ok(_) => Ok(entity),
            Err(e) => Err(Self::write_error("update", e)),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        match self.collection.delete_one(Self::by_id(id)).await {
            Ok(result) if result.deleted_count == 0 => Err(not_found::<T>(id)),
            Ok(_) => {
                event!(Level::DEBUG, "Deleted {} {}", T::COLLECTION, id);
                Ok(())
            }
            Err(e) => Err(AppError::Repository(format!("Failed to delete {}: {}", T::COLLECTION, e))),
        }
    }

    async fn increment(&self, id: &str, field: &str, by: i64) -> Result<(), AppError> {
        let mut inc = Document::new();
        inc.insert(field, by);
        let mut update = Document::new();
        update.insert("$inc", inc);

        self.update_fields(id, update).await
    }

    async fn set_fields(&self, id: &str, fields: Map<String, Value>) -> Result<(), AppError> {
        let set = bson::to_document(&fields)
            .map_err(|e| AppError::Repository(format!("Failed to encode {} fields: {}", T::COLLECTION, e)))?;
        let mut update = Document::new();
        update.insert("$set", set);

        self.update_fields(id, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{new_id, Favorite, Vendor};
    use chrono::Utc;
    use serde_json::json;

    fn favorite(user_id: &str, vendor_id: &str) -> Favorite {
        Favorite {
            id: new_id(),
            user_id: user_id.to_string(),
            vendor_id: vendor_id.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_round_trips_and_reports_missing_ids() {
        let repository = InMemoryRepository::<Favorite>::new();
        let created = repository.create(favorite("u1", "v1")).await.unwrap();

        assert_eq!(repository.read(&created.id).await.unwrap().vendor_id, "v1");
        assert!(matches!(repository.read("missing").await, Err(AppError::NotFound(_))));

        repository.delete(&created.id).await.unwrap();
        assert!(repository.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_memory_rejects_duplicate_ids() {
        let repository = InMemoryRepository::<Favorite>::new();
        let entity = favorite("u1", "v1");

        repository.create(entity.clone()).await.unwrap();
        assert!(matches!(repository.create(entity).await, Err(AppError::Conflict(_))));
    }

    fn vendor(user_id: &str) -> Vendor {
        let now = Utc::now();
        Vendor {
            id: new_id(),
            user_id: user_id.to_string(),
            name: String::from("Kasi Grill"),
            category: String::from("street_food"),
            profile_description: String::new(),
            phone_number: String::new(),
            email: String::from("grill@example.com"),
            address: String::new(),
            is_verified: true,
            average_rating: 0.0,
            review_count: 0,
            total_orders: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn in_memory_enforces_unique_keys_on_create_and_update() {
        let repository = InMemoryRepository::<Favorite>::new();
        repository.create(favorite("u1", "v1")).await.unwrap();

        let again = repository.create(favorite("u1", "v1")).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let mut other = repository.create(favorite("u1", "v2")).await.unwrap();
        other.vendor_id = String::from("v1");
        assert!(matches!(repository.update(other).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_creates_keep_one_row_per_unique_key() {
        let repository = Arc::new(InMemoryRepository::<Favorite>::new());

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let repository = repository.clone();
                tokio::spawn(async move { repository.create(favorite("u1", "v1")).await })
            })
            .collect();

        let mut created = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(repository.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn increments_are_not_lost_under_concurrency() {
        let repository = Arc::new(InMemoryRepository::<Vendor>::new());
        let stored = repository.create(vendor("u1")).await.unwrap();

        let bumps: Vec<_> = (0..10)
            .map(|_| {
                let repository = repository.clone();
                let id = stored.id.clone();
                tokio::spawn(async move { repository.increment(&id, "total_orders", 1).await })
            })
            .collect();
        for bump in bumps {
            bump.await.unwrap().unwrap();
        }

        assert_eq!(repository.read(&stored.id).await.unwrap().total_orders, 10);
    }

    #[tokio::test]
    async fn set_fields_leaves_other_fields_alone() {
        let repository = InMemoryRepository::<Vendor>::new();
        let stored = repository.create(vendor("u1")).await.unwrap();
        repository.increment(&stored.id, "total_orders", 3).await.unwrap();

        let mut rating = Map::new();
        rating.insert(String::from("average_rating"), json!(4.5));
        rating.insert(String::from("review_count"), json!(2));
        repository.set_fields(&stored.id, rating).await.unwrap();

        let reloaded = repository.read(&stored.id).await.unwrap();
        assert_eq!(reloaded.average_rating, 4.5);
        assert_eq!(reloaded.review_count, 2);
        assert_eq!(reloaded.total_orders, 3);
        assert!(matches!(repository.increment("missing", "total_orders", 1).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_applies_every_condition() {
        let repository = InMemoryRepository::<Favorite>::new();
        repository.create(favorite("u1", "v1")).await.unwrap();
        repository.create(favorite("u1", "v2")).await.unwrap();
        repository.create(favorite("u2", "v1")).await.unwrap();

        let filter = Filter::new().eq("user_id", "u1").eq("vendor_id", "v1");
        let found = repository.find(&filter).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(repository.find(&Filter::new().eq("user_id", "u1")).await.unwrap().len(), 2);
    }

    #[test]
    fn filter_matches_null_and_bool_fields() {
        let value = serde_json::json!({"deleted_at": null, "is_verified": true});

        assert!(Filter::new().is_null("deleted_at").flag("is_verified", true).matches(&value));
        assert!(Filter::new().is_null("missing_field").matches(&value));
        assert!(!Filter::new().flag("is_verified", false).matches(&value));
    }

    #[test]
    fn filter_builds_mongo_document() {
        let document = Filter::new().eq("vendor_id", "v1").is_null("deleted_at").to_document();

        assert_eq!(document.get_str("vendor_id").unwrap(), "v1");
        assert_eq!(document.get("deleted_at"), Some(&Bson::Null));
    }
}
