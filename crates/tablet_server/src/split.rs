//! Split planner: partitions a full-table scan into primary-key ranges
//! that can be consumed in parallel.
//!
//! For boundaries `b1 < b2 < ... < bn` the splits are
//! `pk < b1`, `b1 <= pk < b2`, ..., `pk >= bn`, each ANDed with the
//! original WHERE clause. The ranges are half-open and unbounded at both
//! ends, so every row falls in exactly one split whatever the statistics
//! say.

use std::sync::Arc;

use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, Query, SetExpr, Statement, TableFactor,
    Value as SqlValue,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tablet_common::error::{TabletError, TabletResult};
use tablet_protocol::types::{
    BindVariable, BoundQuery, QuerySplit, SplitQueryRequest, SplitQueryResult, Value,
};

use crate::engine::{QueryEngine, TableStats};
use crate::executor::decode_query;

/// Bind variable carrying a split's inclusive lower bound.
pub const SPLIT_START: &str = "_splitquery_start";
/// Bind variable carrying a split's exclusive upper bound.
pub const SPLIT_END: &str = "_splitquery_end";

/// Upper bound on splits per request.
pub const MAX_SPLITS: u64 = 1 << 16;

fn bad_request(msg: impl Into<String>) -> TabletError {
    TabletError::BadRequest(msg.into())
}

/// Parse `sql` and check that it is a plain single-table SELECT.
/// Returns the query and its table name.
fn parse_splittable(sql: &str) -> TabletResult<(Box<Query>, String)> {
    let mut stmts = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|e| bad_request(format!("cannot parse query: {}", e)))?;
    if stmts.len() != 1 {
        return Err(bad_request("split query must be exactly one statement"));
    }
    let Statement::Query(query) = stmts.remove(0) else {
        return Err(bad_request("only SELECT statements can be split"));
    };
    if query.with.is_some() {
        return Err(bad_request("WITH is not supported in split queries"));
    }
    if query.order_by.is_some() {
        return Err(bad_request("ORDER BY is not supported in split queries"));
    }
    if query.limit.is_some() || query.offset.is_some() || query.fetch.is_some() {
        return Err(bad_request("LIMIT/OFFSET is not supported in split queries"));
    }
    if !query.locks.is_empty() {
        return Err(bad_request("locking reads cannot be split"));
    }
    let table = {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(bad_request("only a plain SELECT can be split"));
        };
        if select.distinct.is_some() {
            return Err(bad_request("DISTINCT is not supported in split queries"));
        }
        if select.having.is_some() {
            return Err(bad_request("HAVING is not supported in split queries"));
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs, modifiers) if exprs.is_empty() && modifiers.is_empty() => {}
            _ => return Err(bad_request("GROUP BY is not supported in split queries")),
        }
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return Err(bad_request("split query must read exactly one table"));
        }
        match &select.from[0].relation {
            TableFactor::Table {
                name, args: None, ..
            } => name
                .0
                .last()
                .map(|ident| ident.value.clone())
                .ok_or_else(|| bad_request("missing table name"))?,
            _ => return Err(bad_request("split query must read a base table")),
        }
    };
    Ok((query, table))
}

/// Primary-key domain reported by the engine.
#[derive(Debug, Clone, PartialEq)]
enum KeyRange {
    Empty,
    Int(i64, i64),
    Uint(u64, u64),
    Float(f64, f64),
}

impl KeyRange {
    fn from_stats(stats: &TableStats) -> TabletResult<Self> {
        let range = match (&stats.pk_min, &stats.pk_max) {
            (Value::Null, _) | (_, Value::Null) => KeyRange::Empty,
            (Value::Int(lo), Value::Int(hi)) => KeyRange::Int(*lo, *hi),
            (Value::Uint(lo), Value::Uint(hi)) => KeyRange::Uint(*lo, *hi),
            (Value::Float(lo), Value::Float(hi)) if lo.is_finite() && hi.is_finite() => {
                KeyRange::Float(*lo, *hi)
            }
            (lo, hi) => {
                return Err(bad_request(format!(
                    "primary key {} of type {}/{} cannot be split",
                    stats.pk_column,
                    lo.type_name(),
                    hi.type_name()
                )))
            }
        };
        Ok(range)
    }

    /// Interior boundaries for `k` evenly sized ranges, strictly increasing
    /// and strictly above the minimum.
    fn boundaries(&self, k: u64) -> Vec<BindVariable> {
        let mut out = Vec::new();
        match *self {
            KeyRange::Empty => {}
            KeyRange::Int(lo, hi) => {
                let span = hi as i128 - lo as i128;
                let mut last = lo;
                for i in 1..k {
                    let b = (lo as i128 + span * i as i128 / k as i128) as i64;
                    if b > last {
                        out.push(BindVariable::Int(b));
                        last = b;
                    }
                }
            }
            KeyRange::Uint(lo, hi) => {
                let span = (hi as u128).saturating_sub(lo as u128);
                let mut last = lo;
                for i in 1..k {
                    let b = (lo as u128 + span * i as u128 / k as u128) as u64;
                    if b > last {
                        out.push(BindVariable::Uint(b));
                        last = b;
                    }
                }
            }
            KeyRange::Float(lo, hi) => {
                let mut last = lo;
                for i in 1..k {
                    let b = lo + (hi - lo) * (i as f64 / k as f64);
                    if b > last {
                        out.push(BindVariable::Float(b));
                        last = b;
                    }
                }
            }
        }
        out
    }
}

/// Number of ranges to aim for: at least one, at most one per row.
fn split_target(split_count: i64, row_count: u64) -> u64 {
    let requested = u64::try_from(split_count).unwrap_or(0).max(1);
    requested.min(row_count.max(1)).min(MAX_SPLITS)
}

/// Spread `total` over `n` splits, remainder to the first ones.
fn distribute(total: u64, n: usize) -> Vec<i64> {
    let n64 = n as u64;
    let (base, rem) = (total / n64, total % n64);
    (0..n64)
        .map(|i| {
            let c = if i < rem { base + 1 } else { base };
            i64::try_from(c).unwrap_or(i64::MAX)
        })
        .collect()
}

fn key_bound(pk: &str, op: BinaryOperator, var: &str) -> Expr {
    Expr::BinaryOp {
        left: Box::new(Expr::Identifier(Ident::new(pk))),
        op,
        right: Box::new(Expr::Value(SqlValue::Placeholder(format!(":{}", var)))),
    }
}

/// `query` with `[start, end)` on `pk` ANDed into its WHERE clause.
fn restrict(query: &Query, pk: &str, start: bool, end: bool) -> Query {
    let mut query = query.clone();
    if let SetExpr::Select(select) = query.body.as_mut() {
        let mut terms = Vec::with_capacity(3);
        if let Some(original) = select.selection.take() {
            terms.push(Expr::Nested(Box::new(original)));
        }
        if start {
            terms.push(key_bound(pk, BinaryOperator::GtEq, SPLIT_START));
        }
        if end {
            terms.push(key_bound(pk, BinaryOperator::Lt, SPLIT_END));
        }
        select.selection = terms.into_iter().reduce(|acc, term| Expr::BinaryOp {
            left: Box::new(acc),
            op: BinaryOperator::And,
            right: Box::new(term),
        });
    }
    query
}

pub struct SplitPlanner {
    engine: Arc<dyn QueryEngine>,
}

impl SplitPlanner {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Split `request.query` into at most `request.split_count` primary-key
    /// ranges. No cursor is held while planning.
    pub fn split_query(&self, request: &SplitQueryRequest) -> TabletResult<SplitQueryResult> {
        let original = &request.query;
        for reserved in [SPLIT_START, SPLIT_END] {
            if original.bind_variables.contains_key(reserved) {
                return Err(bad_request(format!(
                    "bind variable name {} is reserved",
                    reserved
                )));
            }
        }
        let (sql, _) = decode_query(original)?;
        let (query, table) = parse_splittable(&sql)?;
        let stats = self.engine.table_stats(&table)?;
        let range = KeyRange::from_stats(&stats)?;

        let k = split_target(request.split_count, stats.row_count);
        let boundaries = range.boundaries(k);
        let counts = distribute(stats.row_count, boundaries.len() + 1);

        if boundaries.is_empty() {
            tablet_observability::record_split_query(1);
            return Ok(SplitQueryResult {
                splits: vec![QuerySplit {
                    query: original.clone(),
                    row_count: counts[0],
                }],
            });
        }

        let last = boundaries.len();
        let splits: Vec<QuerySplit> = counts
            .into_iter()
            .enumerate()
            .map(|(i, row_count)| {
                let start = (i > 0).then(|| boundaries[i - 1].clone());
                let end = (i < last).then(|| boundaries[i].clone());
                let rewritten = restrict(&query, &stats.pk_column, start.is_some(), end.is_some());
                let mut bind_variables = original.bind_variables.clone();
                if let Some(v) = start {
                    bind_variables.insert(SPLIT_START.to_string(), v);
                }
                if let Some(v) = end {
                    bind_variables.insert(SPLIT_END.to_string(), v);
                }
                QuerySplit {
                    query: BoundQuery {
                        sql: rewritten.to_string().into_bytes(),
                        bind_variables,
                    },
                    row_count,
                }
            })
            .collect();

        tracing::debug!(
            table = %table,
            pk = %stats.pk_column,
            requested = request.split_count,
            planned = splits.len(),
            "split query planned"
        );
        tablet_observability::record_split_query(splits.len());
        Ok(SplitQueryResult { splits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;
    use tablet_common::error::ErrorKind;

    fn planner(stats: TableStats) -> SplitPlanner {
        let engine = MemoryEngine::new();
        engine.set_table_stats("t", stats);
        SplitPlanner::new(Arc::new(engine))
    }

    fn int_stats(row_count: u64, lo: i64, hi: i64) -> TableStats {
        TableStats {
            row_count,
            pk_column: "id".into(),
            pk_min: Value::Int(lo),
            pk_max: Value::Int(hi),
        }
    }

    fn request(sql: &str, split_count: i64) -> SplitQueryRequest {
        SplitQueryRequest {
            query: BoundQuery::new(sql),
            split_count,
        }
    }

    fn int_bound(q: &BoundQuery, name: &str) -> Option<i64> {
        match q.bind_variables.get(name) {
            Some(BindVariable::Int(v)) => Some(*v),
            None => None,
            other => panic!("unexpected bound {:?}", other),
        }
    }

    fn contains(q: &BoundQuery, key: i64) -> bool {
        int_bound(q, SPLIT_START).map_or(true, |s| key >= s)
            && int_bound(q, SPLIT_END).map_or(true, |e| key < e)
    }

    #[test]
    fn test_splits_cover_every_key_exactly_once() {
        let p = planner(int_stats(100, 1, 100));
        let result = p.split_query(&request("select * from t", 4)).unwrap();
        assert_eq!(result.splits.len(), 4);
        for key in -10..=110 {
            let owners = result
                .splits
                .iter()
                .filter(|s| contains(&s.query, key))
                .count();
            assert_eq!(owners, 1, "key {}", key);
        }
        let total: i64 = result.splits.iter().map(|s| s.row_count).sum();
        assert_eq!(total, 100);
        assert!(result.splits.iter().all(|s| s.row_count >= 0));
    }

    #[test]
    fn test_rewritten_predicates() {
        let p = planner(int_stats(100, 1, 100));
        let result = p
            .split_query(&request("select id, name from t where name = 'x'", 3))
            .unwrap();
        let sqls: Vec<String> = result
            .splits
            .iter()
            .map(|s| s.query.sql_lossy().into_owned())
            .collect();
        assert!(sqls[0].contains("(name = 'x') AND id < :_splitquery_end"), "{}", sqls[0]);
        assert!(!sqls[0].contains(SPLIT_START));
        assert!(sqls[1].contains("id >= :_splitquery_start AND id < :_splitquery_end"), "{}", sqls[1]);
        assert!(sqls[2].ends_with("id >= :_splitquery_start"), "{}", sqls[2]);
        assert!(!result.splits[2].query.bind_variables.contains_key(SPLIT_END));
    }

    #[test]
    fn test_single_split_returns_original() {
        let p = planner(int_stats(100, 1, 100));
        for count in [1, 0, -5] {
            let req = request("select * from t", count);
            let result = p.split_query(&req).unwrap();
            assert_eq!(result.splits.len(), 1);
            assert_eq!(result.splits[0].query, req.query);
            assert_eq!(result.splits[0].row_count, 100);
        }
    }

    #[test]
    fn test_more_splits_than_rows() {
        let p = planner(int_stats(3, 10, 12));
        let result = p.split_query(&request("select * from t", 50)).unwrap();
        assert!(result.splits.len() <= 3);
        assert!(result.splits.len() > 1);
        let total: i64 = result.splits.iter().map(|s| s.row_count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_narrow_key_range_dedups_boundaries() {
        // 1000 rows but only two distinct key values.
        let p = planner(int_stats(1000, 5, 6));
        let result = p.split_query(&request("select * from t", 10)).unwrap();
        assert!(result.splits.len() <= 2);
        for key in 0..10 {
            let owners = result.splits.iter().filter(|s| contains(&s.query, key)).count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_empty_table() {
        let p = planner(TableStats {
            row_count: 0,
            pk_column: "id".into(),
            pk_min: Value::Null,
            pk_max: Value::Null,
        });
        let result = p.split_query(&request("select * from t", 8)).unwrap();
        assert_eq!(result.splits.len(), 1);
        assert_eq!(result.splits[0].row_count, 0);
    }

    #[test]
    fn test_uint_and_float_keys() {
        let p = planner(TableStats {
            row_count: 10,
            pk_column: "id".into(),
            pk_min: Value::Uint(u64::MAX - 100),
            pk_max: Value::Uint(u64::MAX),
        });
        let result = p.split_query(&request("select * from t", 2)).unwrap();
        assert_eq!(result.splits.len(), 2);
        assert_eq!(
            result.splits[0].query.bind_variables.get(SPLIT_END),
            Some(&BindVariable::Uint(u64::MAX - 50))
        );

        let p = planner(TableStats {
            row_count: 10,
            pk_column: "score".into(),
            pk_min: Value::Float(0.0),
            pk_max: Value::Float(1.0),
        });
        let result = p.split_query(&request("select * from t", 4)).unwrap();
        assert_eq!(result.splits.len(), 4);
        assert_eq!(
            result.splits[1].query.bind_variables.get(SPLIT_START),
            Some(&BindVariable::Float(0.25))
        );
    }

    #[test]
    fn test_extreme_int_range() {
        let p = planner(int_stats(1 << 40, i64::MIN, i64::MAX));
        let result = p.split_query(&request("select * from t", 4)).unwrap();
        assert_eq!(result.splits.len(), 4);
        let bounds: Vec<i64> = result.splits[1..]
            .iter()
            .filter_map(|s| int_bound(&s.query, SPLIT_START))
            .collect();
        assert_eq!(bounds.len(), 3);
        assert!(bounds.windows(2).all(|w| w[0] < w[1]));
        assert!(bounds[0] < 0 && bounds[2] > 0);
    }

    #[test]
    fn test_unsplittable_queries() {
        let p = planner(int_stats(100, 1, 100));
        for sql in [
            "select * from t order by id",
            "select * from t limit 10",
            "select distinct name from t",
            "select name, count(*) from t group by name",
            "select * from t join u on t.id = u.id",
            "select * from t union select * from t",
            "update t set x = 1",
            "select * from t; select * from t",
            "not sql at all",
        ] {
            let err = p.split_query(&request(sql, 4)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "{}", sql);
        }
    }

    #[test]
    fn test_reserved_bind_variable() {
        let p = planner(int_stats(100, 1, 100));
        let mut req = request("select * from t", 4);
        req.query
            .bind_variables
            .insert(SPLIT_START.into(), BindVariable::Int(1));
        let err = p.split_query(&req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_unsupported_key_type() {
        let p = planner(TableStats {
            row_count: 10,
            pk_column: "name".into(),
            pk_min: Value::from("a"),
            pk_max: Value::from("z"),
        });
        let err = p.split_query(&request("select * from t", 4)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_original_binds_are_kept() {
        let p = planner(int_stats(100, 1, 100));
        let mut req = request("select * from t", 2);
        req.query
            .bind_variables
            .insert("tenant".into(), BindVariable::Int(7));
        let result = p.split_query(&req).unwrap();
        for split in &result.splits {
            assert_eq!(
                split.query.bind_variables.get("tenant"),
                Some(&BindVariable::Int(7))
            );
        }
    }

    #[test]
    fn test_distribute() {
        assert_eq!(distribute(10, 3), vec![4, 3, 3]);
        assert_eq!(distribute(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(split_target(-1, 100), 1);
        assert_eq!(split_target(500, 20), 20);
        assert_eq!(split_target(5, 0), 1);
    }
}
