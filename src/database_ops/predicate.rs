//! Structured filter predicates.
//!
//! A predicate is a list of typed (field, operator, value) conditions joined
//! with AND. Column names come from a closed set of fields and every value is
//! bound as a query parameter, so no caller-supplied text ever reaches the SQL
//! string. The same predicate can be evaluated in memory against any
//! [`FieldSource`].

use sqlx::{Postgres, QueryBuilder};

use crate::database_ops::catalog::{GameId, SetId};
use crate::normalization::variation::Dimension;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    GameId,
    SetId,
    Dimension(Dimension),
}

impl Field {
    pub fn column(&self) -> &'static str {
        match self {
            Field::GameId => "game_id",
            Field::SetId => "set_id",
            Field::Dimension(dim) => dim.column(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq(Value),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub field: Field,
    pub op: Operator,
}

/// Rows a predicate can be evaluated against without a database.
pub trait FieldSource {
    fn field_value(&self, field: Field) -> Option<Value>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(game_id: GameId) -> Self {
        Self::new().eq(Field::GameId, game_id)
    }

    pub fn set(set_id: SetId) -> Self {
        Self::new().eq(Field::SetId, set_id)
    }

    pub fn eq(mut self, field: Field, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field,
            op: Operator::Eq(value.into()),
        });
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, field: Field, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition {
            field,
            op: Operator::In(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    pub fn is_null(mut self, field: Field) -> Self {
        self.conditions.push(Condition {
            field,
            op: Operator::IsNull,
        });
        self
    }

    pub fn is_not_null(mut self, field: Field) -> Self {
        self.conditions.push(Condition {
            field,
            op: Operator::IsNotNull,
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Append ` WHERE ...` (nothing when empty) with every value bound.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for (i, cond) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            let column = cond.field.column();
            match &cond.op {
                Operator::Eq(value) => {
                    qb.push(column).push(" = ");
                    push_value(qb, value);
                }
                Operator::In(values) if values.is_empty() => {
                    qb.push("FALSE");
                }
                Operator::In(values) => {
                    qb.push(column).push(" IN (");
                    for (j, value) in values.iter().enumerate() {
                        if j > 0 {
                            qb.push(", ");
                        }
                        push_value(qb, value);
                    }
                    qb.push(")");
                }
                Operator::IsNull => {
                    qb.push(column).push(" IS NULL");
                }
                Operator::IsNotNull => {
                    qb.push(column).push(" IS NOT NULL");
                }
            }
        }
    }

    pub fn matches(&self, row: &impl FieldSource) -> bool {
        self.conditions.iter().all(|cond| {
            let actual = row.field_value(cond.field);
            match &cond.op {
                Operator::Eq(value) => actual.as_ref() == Some(value),
                Operator::In(values) => actual.is_some_and(|a| values.contains(&a)),
                Operator::IsNull => actual.is_none(),
                Operator::IsNotNull => actual.is_some(),
            }
        })
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &Value) {
    match value {
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
    }
}
