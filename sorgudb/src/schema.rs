//! Field-level encryption schema.
//!
//! Strategies are declared per `(collection, field)` in a [`SchemaRegistry`]
//! that is built and validated once at startup and is immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::context::FieldRef;
use crate::document::Entity;
use crate::error::Error;

/// Largest supported `precision` (decimal places).
pub const MAX_PRECISION: u32 = 15;

/// Largest magnitude a scaled range bound may have: 2^53, the last integer
/// an `f64` represents exactly.
pub const MAX_SCALED_MAGNITUDE: i64 = 1 << 53;

/// Numeric domain of a range-encrypted field.
///
/// Values are scaled to integers with `round(v * 10^precision)` and must lie
/// within the scaled bounds. A validated domain always fits the 8-byte token
/// width of the order-preserving transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeDomain {
    min: f64,
    max: f64,
    precision: u32,
    scaled_min: i64,
    scaled_max: i64,
}

/// Relative slack for values that are on the precision grid but picked up
/// an error from the `v * 10^precision` multiplication, such as `0.29`.
const GRID_TOLERANCE: f64 = 16.0 * f64::EPSILON;

/// Why a value could not be scaled into a [`RangeDomain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleError {
    /// The value is NaN or infinite.
    NotFinite,
    /// The scaled value lies outside the domain.
    OutOfDomain,
    /// The value lies between two representable values and
    /// [`Rounding::Exact`] was requested.
    Inexact,
}

/// How a value finer than the domain precision is mapped to a scaled
/// integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Half away from zero. Stored values use this.
    Nearest,
    /// Toward negative infinity.
    Floor,
    /// Toward positive infinity.
    Ceil,
    /// Only values on the precision grid are accepted.
    Exact,
}

impl RangeDomain {
    /// Creates and validates a domain.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` unless both bounds are finite,
    /// `min < max`, `precision <= MAX_PRECISION` and both scaled bounds stay
    /// within `±MAX_SCALED_MAGNITUDE`.
    pub fn new(min: f64, max: f64, precision: u32) -> Result<Self, Error> {
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::InvalidSchema("range bounds must be finite".to_string()));
        }
        if min >= max {
            return Err(Error::InvalidSchema(format!("range min {min} must be below max {max}")));
        }
        if precision > MAX_PRECISION {
            return Err(Error::InvalidSchema(format!(
                "range precision {precision} exceeds {MAX_PRECISION}"
            )));
        }

        let factor = power_of_ten(precision);
        let scaled_min = scale_bound(min * factor)?;
        let scaled_max = scale_bound(max * factor)?;
        if scaled_min >= scaled_max {
            return Err(Error::InvalidSchema(format!(
                "range [{min}, {max}] collapses at precision {precision}"
            )));
        }

        Ok(Self {
            min,
            max,
            precision,
            scaled_min,
            scaled_max,
        })
    }

    /// Returns the declared lower bound.
    #[must_use]
    pub const fn min(&self) -> f64 {
        self.min
    }

    /// Returns the declared upper bound.
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Returns the number of decimal places kept.
    #[must_use]
    pub const fn precision(&self) -> u32 {
        self.precision
    }

    /// Returns the scaled lower bound.
    #[must_use]
    pub const fn scaled_min(&self) -> i64 {
        self.scaled_min
    }

    /// Returns the scaled upper bound.
    #[must_use]
    pub const fn scaled_max(&self) -> i64 {
        self.scaled_max
    }

    /// Number of distinct scaled values in the domain.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn size(&self) -> u64 {
        // Bounded by 2^54, see MAX_SCALED_MAGNITUDE.
        (self.scaled_max - self.scaled_min) as u64 + 1
    }

    fn factor(&self) -> f64 {
        power_of_ten(self.precision)
    }

    /// Scales a value into the domain, rounding half away from zero.
    /// Out-of-range values fail, they are never clamped.
    ///
    /// # Errors
    ///
    /// Returns a [`ScaleError`] describing the failure.
    pub fn scale(&self, value: f64) -> Result<i64, ScaleError> {
        self.scale_with(value, Rounding::Nearest)
    }

    /// Scales a value into the domain with an explicit rounding mode.
    ///
    /// # Errors
    ///
    /// Returns a [`ScaleError`] describing the failure.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn scale_with(&self, value: f64, rounding: Rounding) -> Result<i64, ScaleError> {
        if !value.is_finite() {
            return Err(ScaleError::NotFinite);
        }
        let raw = value * self.factor();
        if !raw.is_finite() {
            return Err(ScaleError::NotFinite);
        }
        let nearest = raw.round();
        let on_grid = (raw - nearest).abs() <= GRID_TOLERANCE * raw.abs().max(1.0);
        let scaled = match rounding {
            Rounding::Nearest => nearest,
            _ if on_grid => nearest,
            Rounding::Floor => raw.floor(),
            Rounding::Ceil => raw.ceil(),
            Rounding::Exact => return Err(ScaleError::Inexact),
        };
        // Compare as f64 first so huge values never reach the integer cast.
        if scaled < self.scaled_min as f64 || scaled > self.scaled_max as f64 {
            return Err(ScaleError::OutOfDomain);
        }
        Ok(scaled as i64)
    }

    /// Maps a scaled integer back to a value rounded to `precision` places.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn unscale(&self, scaled: i64) -> f64 {
        scaled as f64 / self.factor()
    }

    /// Returns `true` if the scaled value lies inside the domain.
    #[must_use]
    pub const fn contains_scaled(&self, scaled: i64) -> bool {
        scaled >= self.scaled_min && scaled <= self.scaled_max
    }

    /// Offset of a scaled value from the domain minimum.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn offset(&self, scaled: i64) -> u64 {
        (scaled - self.scaled_min) as u64
    }
}

fn power_of_ten(precision: u32) -> f64 {
    10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX))
}

#[allow(clippy::cast_possible_truncation)]
fn scale_bound(scaled: f64) -> Result<i64, Error> {
    let scaled = scaled.round();
    #[allow(clippy::cast_precision_loss)]
    let limit = MAX_SCALED_MAGNITUDE as f64;
    if scaled.abs() > limit {
        return Err(Error::InvalidSchema(
            "scaled range bound exceeds 2^53 and would overflow the token width".to_string(),
        ));
    }
    Ok(scaled as i64)
}

/// How a field is protected at rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// Stored in clear.
    None,
    /// Deterministic encryption: supports equality predicates.
    Equality,
    /// Order-preserving token plus reversible ciphertext: supports equality
    /// and range predicates within the domain.
    Range(RangeDomain),
    /// Randomized authenticated encryption: not queryable.
    Randomized,
}

impl Strategy {
    /// Returns `true` for every strategy except [`Strategy::None`].
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the strategy name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Equality => "equality",
            Self::Range(_) => "range",
            Self::Randomized => "randomized",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range(domain) => write!(
                f,
                "range[{}, {}; {}]",
                domain.min(),
                domain.max(),
                domain.precision()
            ),
            other => f.write_str(other.name()),
        }
    }
}

/// Strategy declaration for one field.
///
/// The field's key slot is its `(collection, field)` pair; the key manager
/// resolves which version of that slot is active.
///
/// # Example
///
/// ```
/// use sorgudb::schema::{FieldSchema, RangeDomain};
///
/// let ssn = FieldSchema::equality("accounts", "ssn");
/// let balance = FieldSchema::range(
///     "accounts",
///     "balance",
///     RangeDomain::new(0.0, 10_000_000.0, 2).unwrap(),
/// );
/// assert_eq!(balance.field_ref().to_string(), "accounts.balance");
/// assert!(ssn.strategy().is_encrypted());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    field: FieldRef,
    strategy: Strategy,
}

impl FieldSchema {
    /// Creates a field declaration with an explicit strategy.
    #[must_use]
    pub fn new(
        collection: impl Into<String>,
        field: impl Into<String>,
        strategy: Strategy,
    ) -> Self {
        Self {
            field: FieldRef::new(collection, field),
            strategy,
        }
    }

    /// Declares a clear-text field.
    #[must_use]
    pub fn plain(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(collection, field, Strategy::None)
    }

    /// Declares a deterministically encrypted field.
    #[must_use]
    pub fn equality(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(collection, field, Strategy::Equality)
    }

    /// Declares a range-queryable field.
    #[must_use]
    pub fn range(
        collection: impl Into<String>,
        field: impl Into<String>,
        domain: RangeDomain,
    ) -> Self {
        Self::new(collection, field, Strategy::Range(domain))
    }

    /// Declares a randomized (non-queryable) encrypted field.
    #[must_use]
    pub fn randomized(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(collection, field, Strategy::Randomized)
    }

    /// Returns the field reference, which is also the key slot.
    #[must_use]
    pub const fn field_ref(&self) -> &FieldRef {
        &self.field
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.field.field()
    }

    /// Returns the strategy.
    #[must_use]
    pub const fn strategy(&self) -> &Strategy {
        &self.strategy
    }
}

/// All field declarations of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    name: String,
    fields: BTreeMap<String, FieldSchema>,
}

impl CollectionSchema {
    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declaration for a field, if any.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    /// Returns the strategy of a field. Undeclared fields are clear text.
    #[must_use]
    pub fn strategy_of(&self, name: &str) -> Strategy {
        self.fields.get(name).map_or(Strategy::None, |f| f.strategy)
    }

    /// Iterates over every declared field.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.values()
    }

    /// Iterates over the encrypted fields.
    pub fn encrypted_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.values().filter(|f| f.strategy.is_encrypted())
    }
}

/// Immutable table of every collection's field declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaRegistry {
    collections: BTreeMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Returns the schema of a collection.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` if the collection is not registered.
    pub fn collection(&self, name: &str) -> Result<&CollectionSchema, Error> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::schema_mismatch(name, "collection is not registered"))
    }

    /// Returns the declaration of a field, if registered.
    #[must_use]
    pub fn field(&self, collection: &str, field: &str) -> Option<&FieldSchema> {
        self.collections.get(collection)?.field(field)
    }

    /// Iterates over every collection.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }

    /// Iterates over every encrypted field of every collection.
    pub fn encrypted_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.collections
            .values()
            .flat_map(CollectionSchema::encrypted_fields)
    }
}

/// Builder for [`SchemaRegistry`]. Validation happens in [`Self::build`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    collections: Vec<(String, Vec<FieldSchema>)>,
    error: Option<Error>,
}

impl SchemaRegistryBuilder {
    /// Adds a collection with its field declarations.
    #[must_use]
    pub fn collection(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = FieldSchema>,
    ) -> Self {
        let fields = fields.into_iter().collect();
        self.collections.push((name.into(), fields));
        self
    }

    /// Adds the collection declared by an entity type. A declaration error
    /// is reported by [`Self::build`].
    #[must_use]
    pub fn register<E: Entity>(mut self) -> Self {
        match E::field_schemas() {
            Ok(fields) => self.collection(E::COLLECTION, fields),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    /// Validates every declaration and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` on invalid names, duplicate collections
    /// or fields, or a field declared under a foreign collection.
    pub fn build(self) -> Result<SchemaRegistry, Error> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut collections = BTreeMap::new();
        for (name, declared) in self.collections {
            validate_name(&name)?;
            let mut fields = BTreeMap::new();
            for schema in declared {
                validate_name(schema.name())?;
                if schema.field_ref().collection() != name {
                    return Err(Error::InvalidSchema(format!(
                        "{} declared under collection {name}",
                        schema.field_ref()
                    )));
                }
                let field = schema.name().to_string();
                if fields.insert(field, schema).is_some() {
                    return Err(Error::InvalidSchema(format!("duplicate field in {name}")));
                }
            }
            let schema = CollectionSchema {
                name: name.clone(),
                fields,
            };
            if collections.insert(name.clone(), schema).is_some() {
                return Err(Error::InvalidSchema(format!("duplicate collection {name}")));
            }
        }

        let registry = SchemaRegistry { collections };
        info!(
            collections = registry.collections.len(),
            encrypted_fields = registry.encrypted_fields().count(),
            "schema registry built"
        );
        Ok(registry)
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!("invalid name {name:?}")))
    }
}
