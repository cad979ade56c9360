//! Dynamic filter builder
//!
//! Turns a flat, untyped query specification (`{"pl_tags": ["red"], "pl_active": false}`)
//! into an ordered [`FilteredCollection`]. Each entity type declares its
//! semantic keys once with [`filter_keys!`](crate::filter_keys): the lookup
//! each key maps to, and the strict order in which keys are applied.

use std::marker::PhantomData;

use serde_json::Value as JsonValue;

use crate::query_builders::collection::FilteredCollection;
use crate::types::{FieldOp, Predicate, RefractionError, RefractionResult};

/// Suffix marking a key as negated: `pl_tags_exclude: true`
pub const EXCLUDE_SUFFIX: &str = "_exclude";

/// Structured predicate descriptor behind a semantic key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub path: &'static str,
    pub op: FieldOp,
    /// Traverses a many-valued relation; duplicates must be suppressed right after
    pub distinct: bool,
}

impl Lookup {
    pub const fn new(path: &'static str, op: FieldOp) -> Self {
        Self {
            path,
            op,
            distinct: false,
        }
    }

    pub const fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn predicate(&self, value: JsonValue) -> Predicate {
        Predicate::new(self.path, self.op, value)
    }
}

/// Semantic query keys of one entity type
pub trait FilterKey: Copy + Eq + 'static {
    /// Entity type the keys filter
    const ENTITY: &'static str;
    /// Every declared key
    const ALL: &'static [Self];
    /// Evaluation order. Keys missing here are never applied.
    const PRIORITY: &'static [Self];

    fn as_str(self) -> &'static str;

    /// `None` for keys that are declared but have no lookup
    fn lookup(self) -> Option<Lookup>;

    fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == key)
    }
}

/// Declare an entity's filter keys, their lookups and their priority
#[macro_export]
macro_rules! filter_keys {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident for $entity:literal {
            $( $variant:ident = $key:literal => $lookup:expr ),+ $(,)?
        }
        priority = [ $( $prio:ident ),* $(,)? ];
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $variant ),+
        }

        impl $crate::FilterKey for $name {
            const ENTITY: &'static str = $entity;
            const ALL: &'static [Self] = &[ $( $name::$variant ),+ ];
            const PRIORITY: &'static [Self] = &[ $( $name::$prio ),* ];

            fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $key ),+
                }
            }

            fn lookup(self) -> ::std::option::Option<$crate::Lookup> {
                match self {
                    $( $name::$variant => $lookup ),+
                }
            }
        }
    };
}

/// Whether a query-spec value activates its filter.
///
/// `false` and `0` are real filter values; `null` and empty strings,
/// lists or mappings mean "not provided".
pub fn is_provided(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(_) | JsonValue::Number(_) => true,
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Plain JSON truthiness, used for the exclusion flags
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Builds filtered collections for the entity type behind `K`
#[derive(Debug, Clone, Copy)]
pub struct FilterBuilder<K: FilterKey> {
    _keys: PhantomData<K>,
}

impl<K: FilterKey> Default for FilterBuilder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FilterKey> FilterBuilder<K> {
    pub fn new() -> Self {
        Self { _keys: PhantomData }
    }

    pub fn build(&self, query_spec: &JsonValue) -> RefractionResult<FilteredCollection> {
        let spec = query_spec
            .as_object()
            .ok_or_else(|| RefractionError::invalid_specification(query_spec))?;

        let mut collection = FilteredCollection::all(K::ENTITY);
        for key in K::PRIORITY {
            let Some(lookup) = key.lookup() else {
                continue;
            };
            let Some(value) = spec.get(key.as_str()) else {
                continue;
            };
            if !is_provided(value) {
                continue;
            }

            let predicate = lookup.predicate(value.clone());
            let negated = spec
                .get(&format!("{}{}", key.as_str(), EXCLUDE_SUFFIX))
                .is_some_and(is_truthy);
            collection = if negated {
                collection.exclude(predicate)
            } else {
                collection.filter(predicate)
            };
            if lookup.distinct {
                collection = collection.distinct();
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            let ignored: Vec<&str> = spec
                .keys()
                .map(String::as_str)
                .filter(|k| {
                    let base = k.strip_suffix(EXCLUDE_SUFFIX).unwrap_or(k);
                    K::from_key(k).is_none() && K::from_key(base).is_none()
                })
                .collect();
            if !ignored.is_empty() {
                log::debug!("{}: ignoring unknown query keys {:?}", K::ENTITY, ignored);
            }
            log::debug!("built {}", collection.describe());
        }

        Ok(collection)
    }
}
