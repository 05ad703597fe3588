use std::collections::HashMap;

use derive_new::new;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu};
use surrealdb::engine::any::Any;
use surrealdb::error::Api;
use surrealdb::opt::auth;
use surrealdb::Surreal;
use tracing::instrument;
use url::Url;

use super::*;
use crate::Located;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConnectionError {
    #[snafu(display("cannot connect to the store `{url}` at {location}: {source}"))]
    StoreConnection {
        url: Url,
        source: surrealdb::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("url `{url}` is missing a namespace parameter (ns) at {location}"))]
    NoNamespace {
        url: Url,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("url `{url}` is missing a database parameter (db) at {location}"))]
    NoDatabase {
        url: Url,
        #[snafu(implicit)]
        location: Location,
    },
}

impl Located for ConnectionError {
    fn location(&self) -> Location {
        match self {
            ConnectionError::StoreConnection { location, .. }
            | ConnectionError::NoNamespace { location, .. }
            | ConnectionError::NoDatabase { location, .. } => *location,
        }
    }
}

/// Where and as whom to connect, read from a store url.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct Target {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<(String, String)>,
}

/// A trait for reading a connection [Target] out of a type.
pub trait AsTarget {
    fn as_target(&self) -> Result<Target, ConnectionError>;
}

impl AsTarget for Url {
    /// The namespace and database come from the `ns` and `db` query parameters, credentials from
    /// the user info. Both are stripped from the endpoint handed to the driver.
    fn as_target(&self) -> Result<Target, ConnectionError> {
        let mut query: HashMap<String, String> = self
            .query_pairs()
            .map(|(key, val)| (key.to_string(), val.to_string()))
            .collect();

        let namespace = query
            .remove("ns")
            .context(NoNamespaceSnafu { url: self.clone() })?;
        let database = query
            .remove("db")
            .context(NoDatabaseSnafu { url: self.clone() })?;

        let credentials = match self.username() {
            "" => None,
            username => Some((
                username.to_string(),
                self.password().unwrap_or("").to_string(),
            )),
        };

        let mut endpoint = self.clone();
        endpoint.set_query(None);
        let _ = endpoint.set_username("");
        let _ = endpoint.set_password(None);

        Ok(Target {
            endpoint: endpoint.to_string(),
            namespace,
            database,
            credentials,
        })
    }
}

/// A [DocumentStore] on SurrealDB.
///
/// Each document is one record `collection:id` holding `doc_id`, `created_at`, `acl` and the
/// document's own fields nested under `fields`, which keeps user fields clear of the record id.
#[derive(Debug, Clone)]
pub struct SurrealStore {
    database: Surreal<Any>,
}

impl SurrealStore {
    /// Connects to the store at `url`, e.g. `ws://user:pass@localhost:8000?ns=clipfeed&db=main`
    /// or `mem://?ns=clipfeed&db=main` for an embedded instance.
    #[instrument]
    pub async fn connect(url: &Url) -> Result<Self, ConnectionError> {
        let target = url.as_target()?;

        let database = surrealdb::engine::any::connect(target.endpoint.as_str())
            .await
            .context(StoreConnectionSnafu { url: url.clone() })?;

        if let Some((username, password)) = &target.credentials {
            database
                .signin(auth::Database {
                    username: username.as_str(),
                    password: password.as_str(),
                    namespace: &target.namespace,
                    database: &target.database,
                })
                .await
                .context(StoreConnectionSnafu { url: url.clone() })?;
        }

        database
            .use_ns(target.namespace.as_str())
            .use_db(target.database.as_str())
            .await
            .context(StoreConnectionSnafu { url: url.clone() })?;

        tracing::info!(endpoint = %target.endpoint, namespace = %target.namespace, database = %target.database, "connected to the store");
        Ok(Self { database })
    }

    async fn run(&self, statement: Statement) -> Result<surrealdb::Response, StoreError> {
        tracing::debug!(query = %statement.text, "executing query");

        let mut query = self.database.query(statement.text);
        for binding in statement.bindings {
            query = query.bind(binding);
        }

        let response = query.await.map_err(store_error)?;
        response.check().map_err(store_error)
    }

    async fn fetch(&self, statement: Statement) -> Result<Vec<Row>, StoreError> {
        let mut response = self.run(statement).await?;
        response.take::<Vec<Row>>(0).map_err(store_error)
    }
}

impl DocumentStore for SurrealStore {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let statement = Statement::new(
            "SELECT doc_id, created_at, fields FROM type::thing($table, $id)",
            collection,
        )
        .with("id", id);

        let mut rows = self.fetch(statement).await?;
        rows.pop()
            .map(Document::from)
            .ok_or_else(|| not_found(collection, id))
    }

    #[instrument(skip(self))]
    async fn list(
        &self, collection: &str, filters: &[Filter], limit: u32,
    ) -> Result<Page, StoreError> {
        let query = Query::parse(filters)?;

        let mut statement = Statement::new("", collection);
        let mut conditions = query
            .conditions
            .iter()
            .map(|condition| statement.condition(condition))
            .collect::<Vec<_>>();
        let count_clause = where_clause(&conditions);

        let (field, direction) = &query.order;
        if let Some(cursor) = &query.cursor {
            let cursor = self.get(collection, cursor).await.map_err(|error| {
                StoreError::new(
                    code::BAD_REQUEST,
                    format!("cursor document is unavailable: {}", error.message),
                )
            })?;
            let operator = match direction {
                Direction::Ascending => ">",
                Direction::Descending => "<",
            };
            let value = statement.bind(cursor.field(field).unwrap_or(Value::Null));
            let id = statement.bind(Value::String(cursor.id));
            let path = path(field);
            conditions.push(format!(
                "({path} {operator} {value} OR ({path} = {value} AND doc_id {operator} {id}))"
            ));
        }

        statement.text = format!(
            "SELECT doc_id, created_at, fields FROM type::table($table){} \
             ORDER BY {} {order}, doc_id {order} LIMIT {limit}; \
             SELECT count() AS total FROM type::table($table){count_clause} GROUP ALL;",
            where_clause(&conditions),
            path(field),
            order = direction.to_order(),
        );

        let mut response = self.run(statement).await?;
        let rows: Vec<Row> = response.take(0).map_err(store_error)?;
        let totals: Vec<Total> = response.take(1).map_err(store_error)?;

        Ok(Page {
            documents: rows
                .into_iter()
                .map(|row| query.project(Document::from(row)))
                .collect(),
            total: totals.first().map_or(0, |total| total.total),
        })
    }

    #[instrument(skip(self, fields, acl))]
    async fn create(
        &self, collection: &str, id: DocumentId, fields: Fields, acl: Acl,
    ) -> Result<Document, StoreError> {
        let document = Document {
            id: id.resolve(),
            created_at: Timestamp::now(),
            fields,
        };

        let row = NewRow {
            doc_id: &document.id,
            created_at: document.created_at,
            acl: &acl,
            fields: &document.fields,
        };
        let row = serde_json::to_value(&row)
            .map_err(|error| StoreError::new(code::BAD_REQUEST, error.to_string()))?;

        let statement = Statement::new(
            "CREATE type::thing($table, $id) CONTENT $row RETURN NONE",
            collection,
        )
        .with("id", document.id.as_str())
        .with("row", row);

        self.run(statement).await?;
        Ok(document)
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self, collection: &str, id: &str, fields: Fields,
    ) -> Result<Document, StoreError> {
        // UPDATE creates missing records, so existence is checked first.
        let mut document = self.get(collection, id).await?;

        let statement = Statement::new(
            "UPDATE type::thing($table, $id) MERGE { fields: $fields } RETURN NONE",
            collection,
        )
        .with("id", id)
        .with("fields", Value::Object(fields.clone()));

        self.run(statement).await?;

        document.fields.extend(fields);
        Ok(document)
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let statement = Statement::new(
            "DELETE type::thing($table, $id) RETURN BEFORE",
            collection,
        )
        .with("id", id);

        // a missing record comes back as `[NONE]`
        let mut response = self.run(statement).await?;
        let removed: Vec<Option<Row>> = response.take(0).map_err(store_error)?;
        if removed.into_iter().flatten().next().is_none() {
            return Err(not_found(collection, id));
        }

        Ok(())
    }
}

/// Query text plus its bound parameters.
#[derive(Debug)]
struct Statement {
    text: String,
    bindings: Vec<(String, Value)>,
}

impl Statement {
    fn new(text: &str, collection: &str) -> Self {
        Self {
            text: text.to_string(),
            bindings: vec![("table".to_string(), Value::String(collection.to_string()))],
        }
    }

    fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.push((name.to_string(), value.into()));
        self
    }

    /// Binds an anonymous parameter and returns its reference.
    fn bind(&mut self, value: Value) -> String {
        let name = format!("p{}", self.bindings.len());
        let reference = format!("${name}");
        self.bindings.push((name, value));
        reference
    }

    fn condition(&mut self, condition: &Condition) -> String {
        let field = path(condition.field());
        match condition {
            Condition::Equal(_, value) => format!("{field} = {}", self.bind(value.clone())),
            Condition::NotEqual(_, value) => format!("{field} != {}", self.bind(value.clone())),
            Condition::EqualAny(_, values) => {
                format!("{field} INSIDE {}", self.bind(Value::Array(values.clone())))
            }
        }
    }
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn path(field: &str) -> String {
    match field {
        ID => "doc_id".to_string(),
        CREATED_AT => CREATED_AT.to_string(),
        _ => format!("fields.{field}"),
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    doc_id: String,
    created_at: Timestamp,
    #[serde(default)]
    fields: Fields,
}

impl From<Row> for Document {
    fn from(row: Row) -> Self {
        Document {
            id: row.doc_id,
            created_at: row.created_at,
            fields: row.fields,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewRow<'a> {
    doc_id: &'a str,
    created_at: Timestamp,
    acl: &'a Acl,
    fields: &'a Fields,
}

#[derive(Debug, Deserialize)]
struct Total {
    total: u64,
}

/// Only a lost connection is worth retrying. Query and decoding failures are not.
fn store_error(error: surrealdb::Error) -> StoreError {
    let message = error.to_string();
    let code = if message.contains("already exists") {
        code::CONFLICT
    } else if matches!(
        error,
        surrealdb::Error::Api(
            Api::Http(_) | Api::Ws(_) | Api::ConnectionUninitialised
        )
    ) {
        code::UNAVAILABLE
    } else {
        code::INTERNAL
    };

    StoreError::new(code, message)
}

#[track_caller]
fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::new(
        code::NOT_FOUND,
        format!("document `{id}` does not exist in `{collection}`"),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn target_from_url() {
        let url = Url::parse("ws://root:secret@localhost:8000?ns=clipfeed&db=main").unwrap();
        let target = url.as_target().unwrap();

        assert_eq!(target.endpoint, "ws://localhost:8000/");
        assert_eq!(target.namespace, "clipfeed");
        assert_eq!(target.database, "main");
        assert_eq!(
            target.credentials,
            Some(("root".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn target_requires_namespace_and_database() {
        let url = Url::parse("mem://?db=main").unwrap();
        assert!(matches!(
            url.as_target(),
            Err(ConnectionError::NoNamespace { .. })
        ));

        let url = Url::parse("mem://?ns=clipfeed").unwrap();
        assert!(matches!(
            url.as_target(),
            Err(ConnectionError::NoDatabase { .. })
        ));
    }

    #[test]
    fn field_paths() {
        assert_eq!(path("id"), "doc_id");
        assert_eq!(path("created_at"), "created_at");
        assert_eq!(path("like_count"), "fields.like_count");
    }

    #[test]
    fn conditions_bind_values() {
        let mut statement = Statement::new("", "videos");
        let text = statement.condition(&Condition::Equal("category".into(), json!("music")));
        assert_eq!(text, "fields.category = $p1");
        let text = statement.condition(&Condition::EqualAny("id".into(), vec![json!("a")]));
        assert_eq!(text, "doc_id INSIDE $p2");
        assert_eq!(statement.bindings.len(), 3);
    }

    #[test]
    fn only_lost_connections_are_transient() {
        let error = store_error(surrealdb::Error::Api(Api::Ws("connection reset".into())));
        assert_eq!(error.kind(), StoreErrorKind::Transient);

        let error = store_error(surrealdb::Error::Api(Api::Query("parse error".into())));
        assert_eq!(error.code, code::INTERNAL);
        assert_eq!(error.kind(), StoreErrorKind::Unknown);
    }

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        }
    }

    #[tokio::test]
    async fn embedded_round_trip() {
        let url = Url::parse("mem://?ns=clipfeed&db=test").unwrap();
        let store = SurrealStore::connect(&url).await.unwrap();

        for n in 0..3 {
            store
                .create(
                    "videos",
                    DocumentId::Exact(format!("v{n}")),
                    fields(json!({ "n": n, "category": "music" })),
                    Acl::default(),
                )
                .await
                .unwrap();
        }

        let error = store
            .create("videos", DocumentId::Exact("v1".into()), Fields::new(), Acl::default())
            .await
            .unwrap_err();
        assert!(error.is_conflict(), "{error}");

        let fetched = store.get("videos", "v1").await.unwrap();
        assert_eq!(fetched.fields["n"], json!(1));

        let first = store
            .list("videos", &[Filter::newest_first()], 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["v2", "v1"]);
        assert_eq!(first.total, 3);

        let rest = store
            .list(
                "videos",
                &[Filter::newest_first(), Filter::cursor_after("v1")],
                2,
            )
            .await
            .unwrap();
        let ids: Vec<_> = rest.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["v0"]);

        let updated = store
            .update("videos", "v0", fields(json!({ "n": 10 })))
            .await
            .unwrap();
        assert_eq!(updated.fields["n"], json!(10));
        assert_eq!(updated.fields["category"], json!("music"));

        let error = store.delete("videos", "ghost").await.unwrap_err();
        assert_eq!(error.code, code::NOT_FOUND, "{error}");

        store.delete("videos", "v2").await.unwrap();
        let error = store.delete("videos", "v2").await.unwrap_err();
        assert_eq!(error.code, code::NOT_FOUND);
        let error = store.update("videos", "v2", Fields::new()).await.unwrap_err();
        assert_eq!(error.code, code::NOT_FOUND);
    }
}
