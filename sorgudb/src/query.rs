//! Query predicates and their rewriting into token predicates.
//!
//! Application code builds a [`QueryPredicate`] over plaintext literals. The
//! [`PredicateRewriter`] turns it into a [`StoragePredicate`] that a storage
//! backend can evaluate without keys: literals on encrypted fields become
//! tokens compared by byte equality or unsigned lexicographic order, every
//! other literal passes through. AND/OR structure is kept as is.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::FieldCodec;
use crate::context::KeyId;
use crate::error::Error;
use crate::key_manager::KeyManager;
use crate::schema::{CollectionSchema, FieldSchema, Rounding, SchemaRegistry, Strategy};
use crate::value::FieldValue;

/// Binary comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// `=`
    Eq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl Comparison {
    /// Returns whether `stored <op> literal` holds given `stored.cmp(literal)`.
    #[must_use]
    pub const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Gte => !matches!(ordering, Ordering::Less),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Lte => !matches!(ordering, Ordering::Greater),
        }
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A boolean predicate over document fields, generic over its literals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate<T> {
    /// `field <op> value`
    Compare {
        /// Field name
        field: String,
        /// Operator
        op: Comparison,
        /// Literal operand
        value: T,
    },
    /// `low <= field <= high`
    Between {
        /// Field name
        field: String,
        /// Inclusive lower bound
        low: T,
        /// Inclusive upper bound
        high: T,
    },
    /// Conjunction; empty is true.
    And(Vec<Predicate<T>>),
    /// Disjunction; empty is false.
    Or(Vec<Predicate<T>>),
}

impl<T> Predicate<T> {
    /// `field <op> value`
    pub fn compare(field: impl Into<String>, op: Comparison, value: impl Into<T>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<T>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<T>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<T>) -> Self {
        Self::compare(field, Comparison::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<T>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<T>) -> Self {
        Self::compare(field, Comparison::Lte, value)
    }

    /// `low <= field <= high`
    pub fn between(field: impl Into<String>, low: impl Into<T>, high: impl Into<T>) -> Self {
        Self::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// Conjunction of `predicates`.
    pub fn and(predicates: impl IntoIterator<Item = Self>) -> Self {
        Self::And(predicates.into_iter().collect())
    }

    /// Disjunction of `predicates`.
    pub fn or(predicates: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(predicates.into_iter().collect())
    }
}

/// Predicate over plaintext literals, as written by application code.
pub type QueryPredicate = Predicate<FieldValue>;

/// Literal of a storage predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOperand {
    /// Compared against clear-text values.
    Plain(FieldValue),
    /// Compared bytewise against the tokens of values encrypted under
    /// `key_id`. Values under any other key never match.
    Token {
        /// Key the token was computed under
        key_id: KeyId,
        /// Token bytes
        bytes: Vec<u8>,
    },
}

/// Predicate a storage backend evaluates without keys.
pub type StoragePredicate = Predicate<StorageOperand>;

/// Rewrites [`QueryPredicate`]s into [`StoragePredicate`]s.
///
/// Literals are encoded with each field's *active* key, so only documents
/// written under that key match. Documents encrypted under a retired key
/// are not found until they are rewritten.
///
/// Range literals finer than the field's precision are moved onto the
/// precision grid in the direction that keeps the comparison exact: up for
/// `>=` and `<` and the low bound of `between`, down for `>` and `<=` and
/// the high bound. An `=` literal with no exact grid value matches nothing.
#[derive(Debug, Clone, Copy)]
pub struct PredicateRewriter<'a> {
    registry: &'a SchemaRegistry,
    codec: FieldCodec<'a>,
}

impl<'a> PredicateRewriter<'a> {
    /// Creates a rewriter.
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry, keys: &'a KeyManager) -> Self {
        Self {
            registry,
            codec: FieldCodec::new(keys),
        }
    }

    /// Rewrites a predicate against `collection`.
    ///
    /// # Errors
    ///
    /// - `Error::SchemaMismatch` if the collection is not registered
    /// - `Error::UnsupportedPredicate` for a comparison the field's strategy
    ///   cannot answer: anything but `=` on an equality field, or any
    ///   predicate on a randomized field
    /// - `Error::ValueOutOfDomain` if a range literal lies outside the domain
    /// - `Error::KeyUnavailable` if an encrypted field has no active key
    pub fn rewrite(
        &self,
        predicate: &QueryPredicate,
        collection: &str,
    ) -> Result<StoragePredicate, Error> {
        self.rewrite_node(predicate, self.registry.collection(collection)?)
    }

    fn rewrite_node(
        &self,
        predicate: &QueryPredicate,
        collection: &CollectionSchema,
    ) -> Result<StoragePredicate, Error> {
        match predicate {
            Predicate::And(children) => self.rewrite_all(children, collection).map(Predicate::And),
            Predicate::Or(children) => self.rewrite_all(children, collection).map(Predicate::Or),
            Predicate::Compare { field, op, value } => {
                let Some(schema) = collection.field(field) else {
                    let value = StorageOperand::Plain(value.clone());
                    return Ok(Predicate::compare(field.as_str(), *op, value));
                };
                let value = match (schema.strategy(), op) {
                    (Strategy::None, _) => StorageOperand::Plain(value.clone()),
                    (Strategy::Equality, Comparison::Eq) | (Strategy::Range(_), _) => {
                        match self.token(value, schema, rounding_for(*op))? {
                            Some(token) => token,
                            None => return Ok(Predicate::Or(Vec::new())),
                        }
                    }
                    (Strategy::Equality | Strategy::Randomized, op) => {
                        return Err(unsupported(schema, op.symbol()));
                    }
                };
                Ok(Predicate::Compare {
                    field: field.clone(),
                    op: *op,
                    value,
                })
            }
            Predicate::Between { field, low, high } => {
                let Some(schema) = collection.field(field) else {
                    return Ok(Predicate::between(
                        field.as_str(),
                        StorageOperand::Plain(low.clone()),
                        StorageOperand::Plain(high.clone()),
                    ));
                };
                let (low, high) = match schema.strategy() {
                    Strategy::None => (
                        StorageOperand::Plain(low.clone()),
                        StorageOperand::Plain(high.clone()),
                    ),
                    Strategy::Range(_) => {
                        let low = self.token(low, schema, Rounding::Ceil)?;
                        let high = self.token(high, schema, Rounding::Floor)?;
                        match low.zip(high) {
                            Some(bounds) => bounds,
                            None => return Ok(Predicate::Or(Vec::new())),
                        }
                    }
                    Strategy::Equality | Strategy::Randomized => {
                        return Err(unsupported(schema, "between"));
                    }
                };
                Ok(Predicate::Between {
                    field: field.clone(),
                    low,
                    high,
                })
            }
        }
    }

    fn rewrite_all(
        &self,
        children: &[QueryPredicate],
        collection: &CollectionSchema,
    ) -> Result<Vec<StoragePredicate>, Error> {
        children
            .iter()
            .map(|child| self.rewrite_node(child, collection))
            .collect()
    }

    fn token(
        &self,
        literal: &FieldValue,
        schema: &FieldSchema,
        rounding: Rounding,
    ) -> Result<Option<StorageOperand>, Error> {
        let token = self.codec.search_token(literal, schema, rounding)?;
        Ok(token.map(|(key_id, bytes)| StorageOperand::Token { key_id, bytes }))
    }
}

/// Grid rounding that keeps `stored <op> literal` exact for on-grid values.
const fn rounding_for(op: Comparison) -> Rounding {
    match op {
        Comparison::Eq => Rounding::Exact,
        Comparison::Gte | Comparison::Lt => Rounding::Ceil,
        Comparison::Gt | Comparison::Lte => Rounding::Floor,
    }
}

fn unsupported(schema: &FieldSchema, op: &str) -> Error {
    Error::UnsupportedPredicate {
        field: schema.field_ref().to_string(),
        op: op.to_string(),
    }
}
