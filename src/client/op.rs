//! # Pending Operations
//!
//! [`Op`] and [`Find`] hold a fully compiled command. The execution mode is
//! picked by the terminal: `run`, `to_list`, `cursor` and friends suspend
//! on the non-blocking transport, their `_sync` twins block the calling
//! thread. The command itself is identical either way.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Map, Value};

use super::collection::Collection;
use super::database::Database;
use crate::core::{Command, CountCmd, DbError, DbResult, DistinctCmd, FindCmd};
use crate::dispatch::{BlockingCursor, Cursor, Dispatcher};
use crate::response::Response;

// =============================================================================
// Op
// =============================================================================

/// A compiled command waiting for a terminal
pub struct Op<'a> {
    db: &'a Database,
    command: Command,
    deadline: Option<Duration>,
}

impl<'a> Op<'a> {
    pub(crate) fn new(db: &'a Database, command: Command) -> Self {
        Self {
            db,
            command,
            deadline: db.config().deadline(),
        }
    }

    /// Override the configured deadline for this operation
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub async fn run(&self) -> Response {
        self.db.dispatcher().run(&self.command, self.deadline).await
    }

    pub fn run_sync(&self) -> Response {
        self.db.dispatcher().run_blocking(&self.command, self.deadline)
    }

    /// Open a lazy cursor; on failure the error envelope is returned
    pub async fn cursor(&self) -> Result<Cursor, Response> {
        self.db.dispatcher().open_cursor(&self.command, self.deadline).await
    }

    pub fn cursor_sync(&self) -> Result<BlockingCursor, Response> {
        self.db.dispatcher().open_cursor_blocking(&self.command, self.deadline)
    }
}

// =============================================================================
// Find
// =============================================================================

/// Chainable find query
pub struct Find<'a> {
    collection: Collection<'a>,
    filter: Value,
    sort: Vec<(String, i32)>,
    projection: Option<Map<String, Value>>,
    skip: u64,
    limit: Option<u64>,
    deadline: Option<Duration>,
}

impl<'a> Find<'a> {
    pub(crate) fn new(collection: Collection<'a>, filter: Value) -> Self {
        let deadline = collection.database().config().deadline();
        Self {
            collection,
            filter,
            sort: Vec::new(),
            projection: None,
            skip: 0,
            limit: None,
            deadline,
        }
    }

    /// Sort by a spec such as `"-created_at"` or `"status,-amount"`
    ///
    /// A leading `-` sorts descending. Replaces any earlier sort.
    pub fn sort(self, spec: &str) -> DbResult<Self> {
        let fields = spec
            .split(',')
            .map(str::trim)
            .map(|field| match field.strip_prefix('-') {
                Some(name) => (name, -1),
                None => (field.strip_prefix('+').unwrap_or(field), 1),
            })
            .collect::<Vec<_>>();
        self.sort_by(&fields)
    }

    /// Sort by explicit `(field, direction)` pairs in tie-break order
    pub fn sort_by(mut self, fields: &[(&str, i32)]) -> DbResult<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        let mut keys = Vec::with_capacity(fields.len());
        for &(field, direction) in fields {
            if field.is_empty() {
                return Err(DbError::compile("sort field name cannot be empty"));
            }
            if direction != 1 && direction != -1 {
                return Err(DbError::compile(format!(
                    "sort direction for '{}' must be 1 or -1, got {}",
                    field, direction
                )));
            }
            if !seen.insert(field) {
                return Err(DbError::compile(format!("sort field '{}' appears twice", field)));
            }
            keys.push((field.to_string(), direction));
        }
        self.sort = keys;
        Ok(self)
    }

    /// Return only the listed fields; `-field` excludes instead
    pub fn project(mut self, fields: &[&str]) -> DbResult<Self> {
        let mut projection = Map::with_capacity(fields.len());
        let (mut includes, mut excludes) = (false, false);
        for field in fields {
            let (name, include) = match field.strip_prefix('-') {
                Some(name) => (name, false),
                None => (*field, true),
            };
            if name.is_empty() {
                return Err(DbError::compile("projection field name cannot be empty"));
            }
            if name != "_id" {
                includes |= include;
                excludes |= !include;
            }
            projection.insert(name.to_string(), Value::from(i32::from(include)));
        }
        if includes && excludes {
            return Err(DbError::compile("projection cannot mix inclusion and exclusion"));
        }
        self.projection = (!projection.is_empty()).then_some(projection);
        Ok(self)
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = n;
        self
    }

    /// Cap the number of documents; `0` means no limit
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = (n > 0).then_some(n);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The find command this query sends
    pub fn command(&self) -> Command {
        self.find_command(self.limit)
    }

    fn find_command(&self, limit: Option<u64>) -> Command {
        let sort = (!self.sort.is_empty()).then(|| {
            Value::Object(
                self.sort
                    .iter()
                    .map(|(field, dir)| (field.clone(), Value::from(*dir)))
                    .collect(),
            )
        });
        Command::Find(FindCmd {
            collection: self.collection.name().to_string(),
            filter: self.filter.clone(),
            sort,
            projection: self.projection.clone().map(Value::Object),
            skip: self.skip,
            limit,
        })
    }

    fn count_command(&self) -> Command {
        Command::Count(CountCmd {
            collection: self.collection.name().to_string(),
            filter: self.filter.clone(),
        })
    }

    fn distinct_command(&self, field: &str) -> Command {
        Command::Distinct(DistinctCmd {
            collection: self.collection.name().to_string(),
            field: field.to_string(),
            filter: self.filter.clone(),
        })
    }

    fn dispatcher(&self) -> &'a Dispatcher {
        self.collection.database().dispatcher()
    }

    // =========================================================================
    // Non-blocking terminals
    // =========================================================================

    pub async fn to_list(&self) -> Response {
        self.dispatcher().run(&self.command(), self.deadline).await
    }

    /// First matching document, or `null` data when none matches
    pub async fn first(&self) -> Response {
        let response = self.dispatcher().run(&self.find_command(Some(1)), self.deadline).await;
        into_single(response)
    }

    /// Count of matching documents; skip and limit are ignored
    pub async fn count(&self) -> Response {
        self.dispatcher().run(&self.count_command(), self.deadline).await
    }

    /// Distinct values of `field` across matching documents
    pub async fn distinct(&self, field: &str) -> Response {
        self.dispatcher().run(&self.distinct_command(field), self.deadline).await
    }

    pub async fn cursor(&self) -> Result<Cursor, Response> {
        self.dispatcher().open_cursor(&self.command(), self.deadline).await
    }

    // =========================================================================
    // Blocking terminals
    // =========================================================================

    pub fn to_list_sync(&self) -> Response {
        self.dispatcher().run_blocking(&self.command(), self.deadline)
    }

    pub fn first_sync(&self) -> Response {
        let response = self.dispatcher().run_blocking(&self.find_command(Some(1)), self.deadline);
        into_single(response)
    }

    pub fn count_sync(&self) -> Response {
        self.dispatcher().run_blocking(&self.count_command(), self.deadline)
    }

    pub fn distinct_sync(&self, field: &str) -> Response {
        self.dispatcher().run_blocking(&self.distinct_command(field), self.deadline)
    }

    pub fn cursor_sync(&self) -> Result<BlockingCursor, Response> {
        self.dispatcher().open_cursor_blocking(&self.command(), self.deadline)
    }
}

fn into_single(response: Response) -> Response {
    if !response.is_success() {
        return response;
    }
    Response::single(response.into_docs().into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ClientConfig, ErrorKind};
    use crate::filter::Filter;
    use crate::memory::MemoryStore;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn database(store: &MemoryStore) -> Database {
        Database::new(
            ClientConfig::default(),
            SchemaRegistry::new(),
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    fn find_cmd(find: &Find<'_>) -> FindCmd {
        match find.command() {
            Command::Find(cmd) => cmd,
            other => panic!("expected find, got {}", other.name()),
        }
    }

    #[test]
    fn test_sort_spec() {
        let db = database(&MemoryStore::default());
        let find = db
            .collection("posts")
            .find(&Filter::new())
            .unwrap()
            .sort("status, -created_at")
            .unwrap();
        assert_eq!(
            serde_json::to_string(&find_cmd(&find).sort).unwrap(),
            r#"{"status":1,"created_at":-1}"#
        );

        let users = db.collection("users");
        let err = users.find(&Filter::new()).unwrap().sort("a,-a").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Compile);
        assert!(users.find(&Filter::new()).unwrap().sort("").is_err());
    }

    #[test]
    fn test_projection() {
        let db = database(&MemoryStore::default());
        let users = db.collection("users");
        let find = users.find(&Filter::new()).unwrap().project(&["-_id", "name"]).unwrap();
        assert_eq!(find_cmd(&find).projection, Some(json!({"_id": 0, "name": 1})));
        assert!(users.find(&Filter::new()).unwrap().project(&["a", "-b"]).is_err());
    }

    #[test]
    fn test_skip_and_limit() {
        let db = database(&MemoryStore::default());
        let find = db.collection("users").find(&Filter::new()).unwrap().skip(3).limit(0);
        let cmd = find_cmd(&find);
        assert_eq!(cmd.skip, 3);
        assert_eq!(cmd.limit, None);
    }

    #[tokio::test]
    async fn test_first_and_count() {
        let store = MemoryStore::default();
        store.seed("users", vec![json!({"_id": 1, "n": 1}), json!({"_id": 2, "n": 2})]);
        let db = database(&store);
        let find = db.collection("users").find(&Filter::new()).unwrap().sort("-n").unwrap();

        let first = find.first().await;
        assert_eq!(first.first(), Some(&json!({"_id": 2, "n": 2})));
        assert_eq!(first.count, 1);

        let none = db
            .collection("users")
            .find(&Filter::by_id(9))
            .unwrap()
            .first_sync();
        assert!(none.is_success());
        assert_eq!(none.count, 0);

        assert_eq!(find.skip(1).limit(1).count().await.count, 2);
    }

    #[test]
    fn test_distinct_sync() {
        let store = MemoryStore::default();
        store.seed(
            "users",
            vec![json!({"_id": 1, "c": "a"}), json!({"_id": 2, "c": "b"}), json!({"_id": 3, "c": "a"})],
        );
        let db = database(&store);
        let response = db.collection("users").find(&Filter::new()).unwrap().distinct_sync("c");
        assert_eq!(response.count, 2);
        assert_eq!(response.docs(), &[json!("a"), json!("b")]);
    }
}
