use crate::types::{Predicate, QueryStep};

/// Lazy handle over one entity type's rows: an ordered list of filter,
/// exclude and distinct steps. Nothing is materialised until an executor
/// evaluates it.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCollection {
    entity: String,
    steps: Vec<QueryStep>,
}

impl FilteredCollection {
    /// Every row of `entity`
    pub fn all(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            steps: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.steps.push(QueryStep::Filter(predicate));
        self
    }

    pub fn exclude(mut self, predicate: Predicate) -> Self {
        self.steps.push(QueryStep::Exclude(predicate));
        self
    }

    /// Suppress duplicate rows from the joins applied so far
    pub fn distinct(mut self) -> Self {
        self.steps.push(QueryStep::Distinct);
        self
    }

    /// The same rows with every distinct step dropped
    pub fn without_distinct(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            steps: self
                .steps
                .iter()
                .filter(|s| !matches!(s, QueryStep::Distinct))
                .cloned()
                .collect(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn steps(&self) -> &[QueryStep] {
        &self.steps
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&Predicate, bool)> {
        self.steps.iter().filter_map(|step| match step {
            QueryStep::Filter(p) => Some((p, false)),
            QueryStep::Exclude(p) => Some((p, true)),
            QueryStep::Distinct => None,
        })
    }

    pub fn is_distinct(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, QueryStep::Distinct))
    }

    /// Deterministic text form of the composed query
    pub fn describe(&self) -> String {
        let mut out = self.entity.clone();
        for step in &self.steps {
            out.push('.');
            out.push_str(&step.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldOp;
    use serde_json::json;

    #[test]
    fn test_describe_keeps_step_order() {
        let collection = FilteredCollection::all("widget")
            .filter(Predicate::new("tags__name", FieldOp::In, json!(["red"])))
            .distinct()
            .exclude(Predicate::new("is_active", FieldOp::Exact, json!(false)));
        assert_eq!(
            collection.describe(),
            "widget.filter(tags__name__in=[\"red\"]).distinct().exclude(is_active__exact=false)"
        );
        assert!(collection.is_distinct());
        let negations: Vec<bool> = collection.predicates().map(|(_, neg)| neg).collect();
        assert_eq!(negations, vec![false, true]);
    }

    #[test]
    fn test_without_distinct_keeps_predicates() {
        let collection = FilteredCollection::all("widget")
            .filter(Predicate::new("tags__name", FieldOp::In, json!(["red"])))
            .distinct()
            .exclude(Predicate::new("is_active", FieldOp::Exact, json!(false)));
        let plain = collection.without_distinct();
        assert!(!plain.is_distinct());
        assert_eq!(
            plain.describe(),
            "widget.filter(tags__name__in=[\"red\"]).exclude(is_active__exact=false)"
        );
    }

    #[test]
    fn test_all_is_empty() {
        let collection = FilteredCollection::all("widget");
        assert_eq!(collection.describe(), "widget");
        assert!(!collection.is_distinct());
    }
}
