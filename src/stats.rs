//! Descriptive statistics over raw value lists

/// Arithmetic mean, 0 for an empty list
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator), NaN below two values
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Mean, deviation and extremes of one non-empty value list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub first: f64,
    pub last: f64,
}

impl Summary {
    /// `None` for an empty list
    pub fn of(values: &[f64]) -> Option<Self> {
        let first = *values.first()?;
        let last = *values.last()?;
        Some(Self {
            count: values.len(),
            sum: values.iter().sum(),
            mean: mean(values),
            stddev: stddev(values),
            min: min(values)?,
            max: max(values)?,
            first,
            last,
        })
    }
}
