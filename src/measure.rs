use std::collections::HashMap;

/// A measure value together with its dimensional sub-totals.
///
/// Supports one dimension per measure, under which any number of keys can
/// accumulate values. An adjustment factor scales the base value and every
/// dimension entry whenever they are read via [`Measure::value`] or
/// [`Measure::dimension_values`]; the stored totals are never rescaled, so
/// repeated reads before a factor change stay consistent.
#[derive(Debug, Clone)]
pub struct Measure {
    value: f64,
    adjustment_factor: f64,
    dimension: Option<String>,
    dimension_values: HashMap<String, f64>,
}

impl Measure {
    /// Creates an empty measure without a dimension.
    pub fn new() -> Self {
        Self {
            value: 0.0,
            adjustment_factor: 1.0,
            dimension: None,
            dimension_values: HashMap::new(),
        }
    }

    /// Creates an empty measure whose sub-totals are keyed under `dimension`.
    pub fn with_dimension(dimension: impl Into<String>) -> Self {
        Self {
            dimension: Some(dimension.into()),
            ..Self::new()
        }
    }

    /// Increments the base value by one.
    pub fn increment(&mut self) {
        self.value += 1.0;
    }

    /// Adds `amount` to the base value.
    pub fn add(&mut self, amount: f64) {
        self.value += amount;
    }

    /// Adds `amount` to the sub-total for `key`, creating it on demand.
    pub fn add_dimension(&mut self, key: &str, amount: f64) {
        *self.dimension_values.entry(key.to_string()).or_insert(0.0) += amount;
    }

    /// Sets the factor applied to all values at read time.
    pub fn set_adjustment_factor(&mut self, factor: f64) {
        self.adjustment_factor = factor;
    }

    /// Returns the base value scaled by the adjustment factor.
    pub fn value(&self) -> f64 {
        self.value * self.adjustment_factor
    }

    /// Returns the dimension name, if this measure carries sub-totals.
    pub fn dimension(&self) -> Option<&str> {
        self.dimension.as_deref()
    }

    /// Returns a fresh map of all sub-totals scaled by the adjustment factor.
    pub fn dimension_values(&self) -> HashMap<String, f64> {
        self.dimension_values
            .iter()
            .map(|(key, value)| (key.clone(), value * self.adjustment_factor))
            .collect()
    }
}

impl Default for Measure {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_measure_is_zero_with_unit_factor() {
        let measure = Measure::new();
        assert_eq!(measure.value(), 0.0);
        assert!(measure.dimension().is_none());
        assert!(measure.dimension_values().is_empty());
    }

    #[test]
    fn test_increment_and_add() {
        let mut measure = Measure::new();
        measure.increment();
        measure.increment();
        measure.add(0.5);
        assert_eq!(measure.value(), 2.5);
    }

    #[test]
    fn test_adjustment_factor_scales_value_on_read() {
        let mut measure = Measure::new();
        measure.add(10.0);
        measure.set_adjustment_factor(0.5);
        assert_eq!(measure.value(), 5.0);

        // The factor is not baked in: changing it rescales from the raw total.
        measure.set_adjustment_factor(2.0);
        assert_eq!(measure.value(), 20.0);
    }

    #[test]
    fn test_adjustment_factor_applies_to_every_dimension_entry() {
        let mut measure = Measure::with_dimension("Usage");
        measure.add_dimension("CoE", 4.0);
        measure.add_dimension("MapReduce", 6.0);
        measure.set_adjustment_factor(1.5);

        let values = measure.dimension_values();
        assert_eq!(values.get("CoE"), Some(&6.0));
        assert_eq!(values.get("MapReduce"), Some(&9.0));
    }

    #[test]
    fn test_dimension_values_is_idempotent() {
        let mut measure = Measure::with_dimension("Status");
        measure.add_dimension("running", 3.0);
        measure.set_adjustment_factor(0.25);

        let first = measure.dimension_values();
        let second = measure.dimension_values();
        assert_eq!(first, second);
        assert_eq!(measure.value(), measure.value());
    }

    #[test]
    fn test_add_dimension_accumulates_per_key() {
        let mut measure = Measure::with_dimension("Class");
        measure.add_dimension("db.m1.small", 1.0);
        measure.add_dimension("db.m1.small", 1.0);
        measure.add_dimension("db.m1.large", 1.0);

        let values = measure.dimension_values();
        assert_eq!(values.get("db.m1.small"), Some(&2.0));
        assert_eq!(values.get("db.m1.large"), Some(&1.0));
    }

    #[test]
    fn test_value_matches_total_times_factor_for_various_factors() {
        for factor in [0.0, 0.5, 1.0, 2.0, 24.0] {
            let mut measure = Measure::with_dimension("Usage");
            measure.add(0.32);
            measure.add(0.48);
            measure.add_dimension("CoE", 0.32);
            measure.add_dimension("CloudDemo", 0.48);
            measure.set_adjustment_factor(factor);

            let total = 0.32 + 0.48;
            assert!((measure.value() - total * factor).abs() < 1e-12);
            let values = measure.dimension_values();
            assert!((values["CoE"] - 0.32 * factor).abs() < 1e-12);
            assert!((values["CloudDemo"] - 0.48 * factor).abs() < 1e-12);
        }
    }
}
