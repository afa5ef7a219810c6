//! Request dimensions (time, elevation, ...) that partition the cache key.
//!
//! Each [`Dimension`] validates incoming values and returns the canonical
//! string stored in the tile key. Canonicalization keeps equivalent requests
//! (`"10.0"` and `"10"` on an interval, `"Foo"` and `"foo"` on a
//! case-insensitive list) on the same cached tile.

use regex::Regex;

use crate::error::DimensionError;

/// Separator between dimension values in the cache key string.
pub const DIMENSION_SEPARATOR: &str = "#";

/// One `start/end/resolution` interval. A resolution of 0 accepts any value
/// in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
    pub resolution: f64,
}

impl Interval {
    /// Parse `start/end/resolution`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('/').map(|p| p.trim().parse::<f64>());
        let interval = Interval {
            start: parts.next()?.ok()?,
            end: parts.next()?.ok()?,
            resolution: parts.next()?.ok()?,
        };
        if parts.next().is_some()
            || interval.start > interval.end
            || interval.resolution < 0.0
            || !interval.start.is_finite()
            || !interval.end.is_finite()
        {
            return None;
        }
        Some(interval)
    }

    fn accepts(&self, value: f64) -> bool {
        if value < self.start || value > self.end {
            return false;
        }
        if self.resolution == 0.0 {
            return true;
        }
        let rem = (value - self.start) % self.resolution;
        let slack = self.resolution * 1e-9;
        rem <= slack || self.resolution - rem <= slack
    }
}

/// How a dimension validates its values.
#[derive(Debug, Clone)]
pub enum DimensionKind {
    /// Value must be one of a fixed list.
    Values {
        values: Vec<String>,
        case_sensitive: bool,
    },
    /// Value must match a regular expression.
    Regex(Regex),
    /// Value must be a number inside one of the intervals.
    Intervals(Vec<Interval>),
}

/// A named, validated request parameter.
#[derive(Debug, Clone)]
pub struct Dimension {
    name: String,
    default_value: String,
    kind: DimensionKind,
}

impl Dimension {
    /// Build a dimension and check its default against its own validator.
    pub fn new(
        name: impl Into<String>,
        default_value: impl Into<String>,
        kind: DimensionKind,
    ) -> Result<Self, DimensionError> {
        let name = name.into();
        let invalid = |reason: String| DimensionError::InvalidDefinition {
            dimension: name.clone(),
            reason,
        };
        match &kind {
            DimensionKind::Values { values, .. } if values.is_empty() => {
                return Err(invalid("no allowed values".to_string()));
            }
            DimensionKind::Intervals(intervals) if intervals.is_empty() => {
                return Err(invalid("no intervals".to_string()));
            }
            _ => {}
        }
        let mut dimension = Self {
            name,
            default_value: default_value.into(),
            kind,
        };
        dimension.default_value = dimension
            .validate(&dimension.default_value)
            .map_err(|_| DimensionError::InvalidDefinition {
                dimension: dimension.name.clone(),
                reason: format!("default value '{}' is not valid", dimension.default_value),
            })?;
        Ok(dimension)
    }

    /// Enumerated values.
    pub fn values(
        name: impl Into<String>,
        default_value: impl Into<String>,
        values: Vec<String>,
        case_sensitive: bool,
    ) -> Result<Self, DimensionError> {
        Self::new(
            name,
            default_value,
            DimensionKind::Values {
                values,
                case_sensitive,
            },
        )
    }

    /// Values matching `pattern`.
    pub fn regex(
        name: impl Into<String>,
        default_value: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, DimensionError> {
        let name = name.into();
        let regex = Regex::new(pattern).map_err(|e| DimensionError::InvalidDefinition {
            dimension: name.clone(),
            reason: e.to_string(),
        })?;
        Self::new(name, default_value, DimensionKind::Regex(regex))
    }

    /// Numbers inside `start/end/resolution` intervals.
    pub fn intervals(
        name: impl Into<String>,
        default_value: impl Into<String>,
        intervals: &[String],
    ) -> Result<Self, DimensionError> {
        let name = name.into();
        let parsed = intervals
            .iter()
            .map(|s| {
                Interval::parse(s).ok_or_else(|| DimensionError::InvalidDefinition {
                    dimension: name.clone(),
                    reason: format!("invalid interval '{}'", s),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, default_value, DimensionKind::Intervals(parsed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    pub fn kind(&self) -> &DimensionKind {
        &self.kind
    }

    /// Validate `value` and return its canonical form.
    pub fn validate(&self, value: &str) -> Result<String, DimensionError> {
        let canonical = match &self.kind {
            DimensionKind::Values {
                values,
                case_sensitive: true,
            } => values.iter().find(|v| v.as_str() == value).cloned(),
            DimensionKind::Values {
                values,
                case_sensitive: false,
            } => values.iter().find(|v| v.eq_ignore_ascii_case(value)).cloned(),
            DimensionKind::Regex(regex) => regex.is_match(value).then(|| value.to_string()),
            DimensionKind::Intervals(intervals) => value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && intervals.iter().any(|i| i.accepts(*v)))
                .map(|v| v.to_string()),
        };
        canonical.ok_or_else(|| DimensionError::InvalidValue {
            dimension: self.name.clone(),
            value: value.to_string(),
        })
    }

    /// Allowed values as advertised in capability documents.
    pub fn allowed_values(&self) -> Vec<String> {
        match &self.kind {
            DimensionKind::Values { values, .. } => values.clone(),
            DimensionKind::Regex(regex) => vec![regex.as_str().to_string()],
            DimensionKind::Intervals(intervals) => intervals
                .iter()
                .map(|i| format!("{}/{}/{}", i.start, i.end, i.resolution))
                .collect(),
        }
    }
}
