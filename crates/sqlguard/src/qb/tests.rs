//! Builder tests: assembly, validation no-ops, immutability and execution.

use super::*;
use crate::args;
use crate::dialect::count_placeholders;
use crate::error::OrmError;
use crate::memory::MemoryClient;
use crate::record::tests::User;

fn users() -> QueryBuilder {
    QueryBuilder::new(Dialect::Generic).table("users")
}

fn scenario(dialect: Dialect) -> QueryBuilder {
    QueryBuilder::new(dialect)
        .table("users")
        .and_where("status = ?", "active")
        .or_where("role = ?", "admin")
        .or_where("role = ?", "owner")
        .order("created_at DESC")
        .limit(10)
}

#[test]
fn test_select_basic() {
    let stmt = users().build().unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users");
    assert!(stmt.args.is_empty());
}

#[test]
fn test_and_or_scenario_generic() {
    let stmt = scenario(Dialect::Generic).build().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = ? OR (role = ? OR role = ?) ORDER BY created_at DESC LIMIT 10"
    );
    assert_eq!(stmt.args, args!["active", "admin", "owner"]);
}

#[test]
fn test_and_or_scenario_postgres() {
    let stmt = scenario(Dialect::Postgres).build().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = $1 OR (role = $2 OR role = $3) ORDER BY created_at DESC LIMIT 10"
    );
    assert_eq!(stmt.args, args!["active", "admin", "owner"]);
}

#[test]
fn test_only_or_conditions() {
    let stmt = users()
        .or_where("a = ?", 1)
        .or_where("b = ?", 2)
        .build()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE (a = ? OR b = ?)");
}

#[test]
fn test_list_argument_expands() {
    let stmt = users()
        .and_where("status = ? AND id IN ?", args!["active", vec![1, 2, 3]])
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = ? AND id IN (?, ?, ?)"
    );
    assert_eq!(stmt.args, args!["active", 1, 2, 3]);
}

#[test]
fn test_list_expansion_is_positional() {
    let stmt = users()
        .and_where("note = '?' AND a = ? AND id IN ?", args![5, vec!["x", "y"]])
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE note = '?' AND a = ? AND id IN (?, ?)"
    );
    assert_eq!(stmt.args, args![5, "x", "y"]);
}

#[test]
fn test_empty_list_is_false_predicate() {
    let stmt = users()
        .and_where("id IN ?", [Vec::<i64>::new()])
        .build()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE 1=0");
    assert!(stmt.args.is_empty());

    let stmt = users()
        .or_where("id IN ?", [Vec::<i64>::new()])
        .build()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE (1=0)");
}

#[test]
fn test_placeholders_match_args() {
    let q = users()
        .join("LEFT JOIN orders AS o ON o.user_id = users.id AND o.kind = ?", "paid")
        .and_where("status = ?", "active")
        .and_where("id IN ?", [vec![1, 2, 3]])
        .or_where("role = ?", "admin")
        .group_by(&["status"])
        .having(&["COUNT(o.id) > ?"], 2);
    let stmt = q.build().unwrap();
    assert_eq!(count_placeholders(&stmt.sql), stmt.args.len());
    assert_eq!(stmt.args.first(), Some(&Value::from("paid")));
    assert_eq!(stmt.args.last(), Some(&Value::from(2)));

    let count = q.build_count().unwrap();
    assert_eq!(count_placeholders(&count.sql), count.args.len());
}

#[test]
fn test_count_projection_omits_tail_clauses() {
    let stmt = users()
        .and_where("status = ?", "active")
        .group_by(&["status"])
        .having(&["COUNT(1) > ?"], 1)
        .order("id")
        .limit(5)
        .offset(10)
        .build_count()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT COUNT(1) FROM users WHERE status = ?");
    assert_eq!(stmt.args, args!["active"]);
}

#[test]
fn test_full_statement_order() {
    let stmt = QueryBuilder::new(Dialect::Postgres)
        .table("users")
        .select(&["status"])
        .join("INNER JOIN orders AS o ON o.user_id = users.id", ())
        .and_where("users.active = ?", true)
        .group_by(&["status"])
        .having(&["SUM(o.total) > ?", "COUNT(o.id) < ?"], args![100, 5])
        .order("status DESC")
        .limit(20)
        .offset(40)
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT status FROM users INNER JOIN orders AS o ON o.user_id = users.id \
         WHERE users.active = $1 GROUP BY status HAVING SUM(o.total) > $2 AND COUNT(o.id) < $3 \
         ORDER BY status DESC LIMIT 20 OFFSET 40"
    );
    assert_eq!(stmt.args, args![true, 100, 5]);
}

#[test]
fn test_group_by_rejects_dotted_names() {
    // group_by takes plain column names only
    let q = users().group_by(&["users.id"]);
    assert!(q.build().unwrap().sql.ends_with("FROM users"));
    assert!(users().safe_group_by(&["users.id"]).is_err());
}

#[test]
fn test_invalid_input_is_a_no_op() {
    let base = users().and_where("status = ?", "active");
    let expected = base.build();

    assert_eq!(base.select(&["id; DROP TABLE x"]).build(), expected);
    assert_eq!(base.order("name; DROP TABLE users; --").build(), expected);
    assert_eq!(base.join("LEFT JOIN t ON 1=1; DELETE FROM users", ()).build(), expected);
    assert_eq!(base.group_by(&["a b"]).build(), expected);
    assert_eq!(base.having(&["1=1 UNION SELECT password"], ()).build(), expected);
    assert_eq!(base.table("users; DROP").build(), expected);
    assert_eq!(base.where_op("name--", "=", "x").build(), expected);
    assert_eq!(base.where_op("name", "= 1 OR", "x").build(), expected);
}

#[test]
fn test_miscounted_filters_match_nothing() {
    let stmt = users()
        .and_where("status = ?", "active")
        .and_where("a = ?", ())
        .or_where("b = ? OR c = ?", 1)
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = ? AND 1=0 OR (1=0)"
    );
    assert_eq!(stmt.args, args!["active"]);
    assert_eq!(count_placeholders(&stmt.sql), stmt.args.len());

    // quoted markers and sequences are counted the way they render
    let ok = users().and_where("note = '?' AND id IN ?", [vec![1, 2]]).build().unwrap();
    assert_eq!(ok.sql, "SELECT * FROM users WHERE note = '?' AND id IN (?, ?)");

    let err = users().safe_where("a = ? AND b = ?", 1).unwrap_err();
    assert!(matches!(
        err,
        ValidationError::ArgumentCount { placeholders: 2, args: 1, .. }
    ));
    assert!(users().safe_or_where("a = ?", args![1, 2]).is_err());
    assert!(users().safe_where("a = ?", 1).is_ok());

    let base = users().having(&["COUNT(1) > ?"], 1);
    assert_eq!(base.having(&["COUNT(1) > ?"], ()).build(), base.build());
    assert!(users().safe_having(&["COUNT(1) > ?"], ()).is_err());
}

#[test]
fn test_safe_variants_surface_rejection() {
    let err = users().safe_order("name; DROP TABLE users; --").unwrap_err();
    assert!(matches!(err, ValidationError::SuspiciousPattern(_)));

    assert!(matches!(
        users().safe_select(&["id; DROP TABLE x"]).unwrap_err(),
        ValidationError::InvalidIdentifier(_)
    ));
    assert!(matches!(
        users().safe_join("CROSS APPLY x", ()).unwrap_err(),
        ValidationError::InvalidJoinClause(_)
    ));
    assert!(users().try_table("bad name").is_err());

    let ok = users().safe_order(" name ASC, id DESC ").unwrap();
    assert!(ok.build().unwrap().sql.ends_with("ORDER BY name ASC, id DESC"));
}

#[test]
fn test_unchecked_variants_bypass_validation() {
    let stmt = users()
        .select_unchecked(&["COUNT(*) AS n"])
        .order_unchecked("RANDOM()")
        .build()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT COUNT(*) AS n FROM users ORDER BY RANDOM()");
}

#[test]
fn test_empty_select_and_order_reset() {
    let q = users().select(&["id"]).order("id");
    let empty: [&str; 0] = [];
    let stmt = q.select(&empty).order("").build().unwrap();
    assert_eq!(stmt.sql, "SELECT id FROM users");
}

#[test]
fn test_having_replaces_clauses_and_args() {
    let stmt = users()
        .group_by(&["status"])
        .having(&["COUNT(1) > ?"], 1)
        .having(&["COUNT(1) < ?"], 9)
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users GROUP BY status HAVING COUNT(1) < ?"
    );
    assert_eq!(stmt.args, args![9]);
}

#[test]
fn test_where_op() {
    let stmt = users()
        .where_op("age", ">=", 18)
        .where_op("users.role", "not in", vec!["a", "b"])
        .where_op("deleted_at", "IS", Value::Null)
        .where_op("score", "BETWEEN", vec![1, 10])
        .build()
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE age >= ? AND users.role NOT IN (?, ?) \
         AND deleted_at IS NULL AND score BETWEEN ? AND ?"
    );
    assert_eq!(stmt.args, args![18, "a", "b", 1, 10]);

    let unchanged = users().where_op("a", "AND", 1).where_op("b", "BETWEEN", 3);
    assert_eq!(unchanged.build().unwrap().sql, "SELECT * FROM users");
}

#[test]
fn test_receiver_is_never_mutated() {
    let base = users().and_where("status = ?", "active");
    let before = base.build();
    let _a = base.and_where("role = ?", "admin").limit(1);
    let _b = base.or_where("x = ?", 1).order("id").select(&["id"]);
    assert_eq!(base.build(), before);
}

#[test]
fn test_clone_rederivation_is_idempotent() {
    let base = users().and_where("status = ?", "active");
    let copy = base.clone();
    let derive = |q: &QueryBuilder| {
        q.or_where("role = ?", "admin")
            .join("JOIN teams AS t ON t.id = users.team_id", ())
            .order("id DESC")
            .limit(3)
            .build()
    };
    assert_eq!(derive(&base), derive(&copy));
}

#[test]
fn test_branches_are_independent_across_threads() {
    let base = users().and_where("status = ?", "active");
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let base = base.clone();
            std::thread::spawn(move || base.and_where("shard = ?", i).build().unwrap())
        })
        .collect();
    for (i, h) in handles.into_iter().enumerate() {
        let stmt = h.join().unwrap();
        assert_eq!(stmt.args, args!["active", i as i64]);
    }
    assert_eq!(base.build().unwrap().args.len(), 1);
}

#[test]
fn test_detach_keeps_bindings_only() {
    let ctx = ExecContext::new().debug(true);
    let base = QueryBuilder::new(Dialect::Postgres)
        .model::<User>()
        .with_context(ctx)
        .and_where("a = ?", 1)
        .order("id")
        .limit(2);
    let detached = base.detach();
    assert_eq!(detached.dialect(), Dialect::Postgres);
    assert!(detached.context().debug);
    assert_eq!(detached.model_binding().map(|m| m.table()), Some("users"));
    assert_eq!(detached.build().unwrap().sql, "SELECT * FROM users");
}

#[test]
fn test_group_strips_shared_parent_prefix() {
    let base = users().and_where("tenant_id = ?", 7);
    let roles = base.or_where("role = ?", "admin").or_where("role = ?", "owner");
    let stmt = base.where_group(&roles).build().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE tenant_id = ? AND ((role = ? OR role = ?))"
    );
    assert_eq!(stmt.args, args![7, "admin", "owner"]);
}

#[test]
fn test_group_from_detached_builder() {
    let base = users().and_where("tenant_id = ?", 7);
    let group = base
        .detach()
        .and_where("verified = ?", true)
        .or_where("role = ?", "admin");
    let stmt = base.where_condition(&group).build().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE tenant_id = ? AND (verified = ? OR (role = ?))"
    );
    assert_eq!(stmt.args, args![7, true, "admin"]);
}

#[test]
fn test_group_prefix_strip_is_textual() {
    // An unrelated chain that happens to start with the same fragment is stripped as well,
    // including its own argument for that fragment.
    let parent = users().and_where("tenant_id = ?", 7);
    let unrelated = users().and_where("tenant_id = ?", 9).and_where("x = ?", 1);
    let stmt = parent.where_group(&unrelated).build().unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE tenant_id = ? AND (x = ?)");
    assert_eq!(stmt.args, args![7, 1]);
}

#[test]
fn test_group_prefix_kept_for_other_binding() {
    let parent = users().and_where("tenant_id = ?", 7);
    let other = QueryBuilder::new(Dialect::Generic)
        .table("accounts")
        .and_where("tenant_id = ?", 7);
    let stmt = parent.where_group(&other).build().unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE tenant_id = ? AND (tenant_id = ?)"
    );
    assert_eq!(stmt.args.len(), 2);
}

#[test]
fn test_empty_group_is_ignored() {
    let base = users().and_where("a = ?", 1);
    let stmt = base.where_group(&base.clone()).build().unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE a = ?");
    assert_eq!(stmt.args.len(), 1);
}

#[test]
fn test_or_group() {
    let group = users().detach().and_where("a = ?", 1).and_where("b = ?", 2);
    let stmt = users()
        .and_where("c = ?", 3)
        .or_condition(&group)
        .build()
        .unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users WHERE c = ? OR ((a = ? AND b = ?))");
    assert_eq!(stmt.args, args![3, 1, 2]);
}

#[test]
fn test_no_table_builds_nothing() {
    assert!(QueryBuilder::new(Dialect::Generic).build().is_none());
    assert_eq!(
        QueryBuilder::of::<User>(Dialect::Generic).build().unwrap().sql,
        "SELECT * FROM users"
    );
    // an explicit table wins over the record's
    assert_eq!(
        QueryBuilder::of::<User>(Dialect::Generic)
            .table("archived_users")
            .table_name(),
        Some("archived_users")
    );
}

// ── execution ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_count_runs_count_projection() {
    let client = MemoryClient::postgres();
    client.push_rows(["count"], vec![vec![Value::Int(42)]]);
    let q = QueryBuilder::for_client(&client)
        .table("users")
        .and_where("status = ?", "active")
        .limit(3);
    assert_eq!(q.count(&client).await.unwrap(), 42);

    let sent = client.last_statement().unwrap();
    assert_eq!(sent.sql, "SELECT COUNT(1) FROM users WHERE status = $1");
    assert_eq!(sent.args, args!["active"]);
}

#[tokio::test]
async fn test_scan_without_binding_fails() {
    let client = MemoryClient::new();
    let q = QueryBuilder::for_client(&client);
    assert!(matches!(
        q.count(&client).await.unwrap_err(),
        OrmError::NoRecordBinding
    ));
    let mut rows: Vec<crate::materialize::RowMap> = Vec::new();
    assert!(matches!(
        q.scan(&client, &mut rows).await.unwrap_err(),
        OrmError::NoRecordBinding
    ));
    assert!(client.executed().is_empty());
}

#[tokio::test]
async fn test_scan_takes_table_from_destination() {
    let client = MemoryClient::new();
    client.push_rows(
        ["id", "name", "ignored"],
        vec![
            vec![Value::Int(1), Value::from("ann"), Value::Bool(true)],
            vec![Value::Int(2), Value::from("bob"), Value::Null],
        ],
    );
    let mut rows: Vec<User> = Vec::new();
    let n = QueryBuilder::for_client(&client)
        .order("id")
        .scan(&client, &mut rows)
        .await
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(rows[1].name, "bob");
    assert_eq!(
        client.last_statement().unwrap().sql,
        "SELECT * FROM users ORDER BY id"
    );
}

#[tokio::test]
async fn test_first_adds_limit_and_reports_not_found() {
    let client = MemoryClient::new();
    client.push_rows(["id"], vec![vec![Value::Int(5)]]);
    let q = QueryBuilder::of::<User>(Dialect::Generic).and_where("id = ?", 5);

    let user: User = q.fetch_one(&client).await.unwrap();
    assert_eq!(user.id, 5);
    assert_eq!(
        client.last_statement().unwrap().sql,
        "SELECT * FROM users WHERE id = ? LIMIT 1"
    );

    client.push_rows(["id"], Vec::new());
    let err = q.fetch_one::<User, _>(&client).await.unwrap_err();
    assert!(err.is_not_found());

    client.push_rows(["id"], Vec::new());
    assert_eq!(q.fetch_optional::<User, _>(&client).await.unwrap(), None);
}

#[tokio::test]
async fn test_first_keeps_explicit_limit() {
    let client = MemoryClient::new();
    client.push_rows(["id"], vec![vec![Value::Int(1)]]);
    let mut dest: Option<User> = None;
    QueryBuilder::of::<User>(Dialect::Generic)
        .limit(5)
        .first(&client, &mut dest)
        .await
        .unwrap();
    assert!(client.last_statement().unwrap().sql.ends_with("LIMIT 5"));
    assert!(dest.is_some());
}

#[tokio::test]
async fn test_fetch_all_collects_records() {
    let client = MemoryClient::new();
    client.push_rows(
        ["id", "email_address", "tags"],
        vec![
            vec![Value::Int(1), Value::Null, Value::from("{a,b}")],
            vec![Value::Int(2), Value::from("x@y.z"), Value::Null],
        ],
    );
    let users: Vec<User> = QueryBuilder::new(Dialect::Generic)
        .fetch_all(&client)
        .await
        .unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].email, None);
    assert_eq!(users[0].tags, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(users[1].email.as_deref(), Some("x@y.z"));
}

#[tokio::test]
async fn test_execution_errors_propagate() {
    let client = MemoryClient::new();
    client.push_error("connection reset");
    let err = QueryBuilder::of::<User>(Dialect::Generic)
        .fetch_all::<User, _>(&client)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Other(ref m) if m == "connection reset"));
}

#[tokio::test]
async fn test_timeout_from_bound_context() {
    let client = MemoryClient::new().with_latency(std::time::Duration::from_secs(60));
    let q = QueryBuilder::of::<User>(Dialect::Generic)
        .with_context(ExecContext::new().timeout(std::time::Duration::from_millis(20)));
    let err = q.fetch_all::<User, _>(&client).await.unwrap_err();
    assert!(err.is_timeout());
}
