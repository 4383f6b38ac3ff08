//! Query model: `where` clauses and find options.
//!
//! A `where` mapping is parsed into a list of tagged [`Clause`]s, one per
//! column. Equality clauses carry a literal; range clauses carry an optional
//! lower and upper [`Bound`].

use std::cmp::Ordering;

use chrono::DateTime;

use crate::error::{StashError, StashResult};
use crate::schema::{ColumnSchema, ColumnType, EntitySchema};
use crate::value::{Number, Value};

/// One end of a numeric interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    /// The bound value.
    pub value: Number,
    /// Whether the bound itself is part of the interval.
    pub inclusive: bool,
}

impl Bound {
    /// An inclusive bound.
    #[must_use]
    pub fn inclusive(value: impl Into<Number>) -> Self {
        Self {
            value: value.into(),
            inclusive: true,
        }
    }

    /// An exclusive bound.
    #[must_use]
    pub fn exclusive(value: impl Into<Number>) -> Self {
        Self {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// A numeric interval with optional ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericRange {
    /// Lower end; `None` is unbounded.
    pub lower: Option<Bound>,
    /// Upper end; `None` is unbounded.
    pub upper: Option<Bound>,
}

impl NumericRange {
    /// Whether `value` lies inside the interval, honouring open and closed
    /// ends literally.
    #[must_use]
    pub fn contains(&self, value: &Number) -> bool {
        let above = self.lower.is_none_or(|b| match value.cmp_total(&b.value) {
            Ordering::Greater => true,
            Ordering::Equal => b.inclusive,
            Ordering::Less => false,
        });
        let below = self.upper.is_none_or(|b| match value.cmp_total(&b.value) {
            Ordering::Less => true,
            Ordering::Equal => b.inclusive,
            Ordering::Greater => false,
        });
        above && below
    }

    /// Whether no value can satisfy the interval.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => match lo.value.cmp_total(&hi.value) {
                Ordering::Greater => true,
                Ordering::Equal => !(lo.inclusive && hi.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    fn check(&self) -> StashResult<()> {
        for bound in [self.lower, self.upper].into_iter().flatten() {
            if let Number::Float(f) = bound.value
                && f.is_nan()
            {
                return Err(StashError::Query("range bound must not be NaN".into()));
            }
        }
        Ok(())
    }
}

/// A single `where` condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `column == value`.
    Equality {
        /// Column name.
        column: String,
        /// Literal to match.
        value: Value,
    },
    /// `lower (<|<=) column (<|<=) upper`.
    Range {
        /// Column name.
        column: String,
        /// Interval to match.
        range: NumericRange,
    },
}

impl Clause {
    /// The column the clause constrains.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Equality { column, .. } | Self::Range { column, .. } => column,
        }
    }

    /// Whether a record value satisfies the clause.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Equality { value: expected, .. } => {
                match (expected.as_number(), value.as_number()) {
                    (Some(a), Some(b)) if !matches!(expected, Value::Date(_)) => {
                        a.cmp_total(&b) == Ordering::Equal
                    },
                    _ => expected == value,
                }
            },
            Self::Range { range, .. } => value.as_number().is_some_and(|n| range.contains(&n)),
        }
    }
}

/// A conjunction of clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    /// All clauses must hold.
    pub clauses: Vec<Clause>,
}

impl Where {
    /// Matches every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether there are no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Add an equality clause.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Equality {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Add a range clause.
    #[must_use]
    pub fn range(
        mut self,
        column: impl Into<String>,
        lower: Option<Bound>,
        upper: Option<Bound>,
    ) -> Self {
        self.clauses.push(Clause::Range {
            column: column.into(),
            range: NumericRange { lower, upper },
        });
        self
    }

    /// Whether a record's values satisfy every clause.
    pub fn matches<'a>(&self, lookup: impl Fn(&str) -> &'a Value) -> bool {
        self.clauses.iter().all(|c| c.matches(lookup(c.column())))
    }

    /// Check the clauses against a schema and coerce literals to column types.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Query`] for unknown columns, range clauses on
    /// non-numeric or unindexed columns, or NaN bounds.
    pub fn normalize(&self, schema: &EntitySchema) -> StashResult<Self> {
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let column = schema.require_column(clause.column())?;
            let clause = match clause {
                Clause::Equality { column: name, value } => Clause::Equality {
                    column: name.clone(),
                    value: coerce_literal(column, value.clone())?,
                },
                Clause::Range { column: name, range } => {
                    if !column.ty.is_numeric() {
                        return Err(StashError::Query(format!(
                            "range operators need a numeric column, {name} is {}",
                            column.ty
                        )));
                    }
                    if !column.index {
                        return Err(StashError::Query(format!(
                            "range query on unindexed column {name}"
                        )));
                    }
                    range.check()?;
                    clause.clone()
                },
            };
            clauses.push(clause);
        }
        Ok(Self { clauses })
    }

    /// Parse a `{"column": literal | {"$op": value, ...}}` mapping.
    ///
    /// Supported operators are `$eq`, `$gt`, `$gte`, `$lt` and `$lte`. An
    /// object literal on a JSON column without `$` keys is an equality.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Query`] for unknown columns or operators,
    /// conflicting operators, or range operators on non-numeric columns.
    pub fn from_json(schema: &EntitySchema, json: &serde_json::Value) -> StashResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| StashError::Query("where must be a JSON object".into()))?;
        let mut clauses = Vec::with_capacity(object.len());
        for (name, spec) in object {
            let column = schema.require_column(name)?;
            let clause = match spec.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    parse_operators(column, ops)?
                },
                _ => Clause::Equality {
                    column: name.clone(),
                    value: literal(column, spec)?,
                },
            };
            clauses.push(clause);
        }
        Self { clauses }.normalize(schema)
    }
}

fn literal(column: &ColumnSchema, json: &serde_json::Value) -> StashResult<Value> {
    if column.ty == ColumnType::Integer {
        // Fractional literals are legal; they simply match nothing.
        if let Some(f) = json.as_f64().filter(|_| !json.is_i64()) {
            return Ok(Value::Float(f));
        }
    }
    column
        .value_from_json(json)
        .map_err(|e| StashError::Query(e.to_string()))
}

fn parse_operators(
    column: &ColumnSchema,
    ops: &serde_json::Map<String, serde_json::Value>,
) -> StashResult<Clause> {
    let name = &column.name;
    if let Some(eq) = ops.get("$eq") {
        if ops.len() > 1 {
            return Err(StashError::Query(format!(
                "$eq cannot be combined with other operators on {name}"
            )));
        }
        return Ok(Clause::Equality {
            column: name.clone(),
            value: literal(column, eq)?,
        });
    }

    if !column.ty.is_numeric() {
        return Err(StashError::Query(format!(
            "range operators need a numeric column, {name} is {}",
            column.ty
        )));
    }

    let mut range = NumericRange::default();
    for (op, raw) in ops {
        let (slot, inclusive) = match op.as_str() {
            "$gt" => (&mut range.lower, false),
            "$gte" => (&mut range.lower, true),
            "$lt" => (&mut range.upper, false),
            "$lte" => (&mut range.upper, true),
            other => {
                return Err(StashError::Query(format!("unknown operator {other} on {name}")));
            },
        };
        if slot.is_some() {
            return Err(StashError::Query(format!(
                "conflicting operators on {name}: at most one lower and one upper bound"
            )));
        }
        *slot = Some(Bound {
            value: bound_number(column, raw)?,
            inclusive,
        });
    }
    Ok(Clause::Range {
        column: name.clone(),
        range,
    })
}

fn bound_number(column: &ColumnSchema, json: &serde_json::Value) -> StashResult<Number> {
    let bad = || {
        StashError::Query(format!(
            "bound for {} must be a number, got {json}",
            column.name
        ))
    };
    match json {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Number::Int(i)),
            None => n.as_f64().map(Number::Float).ok_or_else(bad),
        },
        serde_json::Value::String(s) if column.ty == ColumnType::Date => {
            DateTime::parse_from_rfc3339(s)
                .map(|d| Number::Int(d.timestamp_millis()))
                .map_err(|_| bad())
        },
        _ => Err(bad()),
    }
}

fn coerce_literal(column: &ColumnSchema, value: Value) -> StashResult<Value> {
    match (&column.ty, value) {
        // Kept as a float so it can only match numerically equal integers.
        (ColumnType::Integer, v @ Value::Float(_)) => Ok(v),
        (_, v) => column
            .coerce(v)
            .map_err(|e| StashError::Query(e.to_string())),
    }
}

/// Sort key for `find`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort by.
    pub column: String,
    /// Reverse the order (nulls then sort last).
    pub descending: bool,
}

impl OrderBy {
    /// Ascending order on `column`.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Descending order on `column`.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse `column` or `column:desc` / `column:asc`.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Query`] for an unknown direction.
    pub fn parse(spec: &str) -> StashResult<Self> {
        match spec.split_once(':') {
            None => Ok(Self::asc(spec)),
            Some((column, "asc")) => Ok(Self::asc(column)),
            Some((column, "desc")) => Ok(Self::desc(column)),
            Some((_, dir)) => Err(StashError::Query(format!("unknown sort direction {dir}"))),
        }
    }
}

/// Options for [`Stash::find`](crate::Stash::find).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Conditions records must satisfy.
    pub filter: Where,
    /// Sort keys, applied in order; ties break on id.
    pub order: Vec<OrderBy>,
    /// Maximum number of records returned.
    pub limit: Option<usize>,
    /// Number of sorted records skipped.
    pub offset: usize,
    /// Attach matched numeric values to [`Record::scores`](crate::Record::scores).
    pub scores: bool,
}

impl FindOptions {
    /// Options matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    #[must_use]
    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = filter;
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn order(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    /// Cap the result size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip leading results.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Request scores.
    #[must_use]
    pub fn with_scores(mut self) -> Self {
        self.scores = true;
        self
    }
}
