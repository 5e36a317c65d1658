//! Predicates understood by the table engine for file pruning.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use super::models::Stats;
use super::scalars::Scalar;
use super::schema::{ColumnMappingMode, StructType};

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// The operator with swapped operands, `a op b` == `b op.flip() a`.
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            op => op,
        }
    }

    /// The logical negation, `!(a op b)` == `a op.negate() b` for non-null operands.
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::NotEq,
            CompareOp::NotEq => CompareOp::Eq,
            CompareOp::Lt => CompareOp::GtEq,
            CompareOp::LtEq => CompareOp::Gt,
            CompareOp::Gt => CompareOp::LtEq,
            CompareOp::GtEq => CompareOp::Lt,
        }
    }

    fn matches(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
        }
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{op}")
    }
}

/// A predicate over logical table columns.
///
/// Evaluation answers "may this file contain a matching row". Answers based
/// on partition values are exact; answers based on statistics are
/// conservative, so a file is only skipped when it provably has no match.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanPredicate {
    /// `column op value`
    Compare {
        /// logical column name
        column: String,
        /// comparison operator
        op: CompareOp,
        /// literal to compare with
        value: Scalar,
    },
    /// `column IS NULL`
    IsNull(String),
    /// `column IS NOT NULL`
    IsNotNull(String),
    /// All children hold
    And(Vec<ScanPredicate>),
    /// At least one child holds
    Or(Vec<ScanPredicate>),
}

impl ScanPredicate {
    /// Conjunction of `predicates`, or `None` if there are none.
    pub fn and_all(predicates: impl IntoIterator<Item = ScanPredicate>) -> Option<Self> {
        let mut predicates = predicates.into_iter().collect::<Vec<_>>();
        match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(ScanPredicate::And(predicates)),
        }
    }

    /// Names of all columns referenced by this predicate.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            ScanPredicate::Compare { column, .. }
            | ScanPredicate::IsNull(column)
            | ScanPredicate::IsNotNull(column) => refs.push(column),
            ScanPredicate::And(children) | ScanPredicate::Or(children) => {
                children.iter().for_each(|c| c.collect_references(refs))
            }
        }
    }

    /// Whether a file described by `file` may hold rows matching this predicate.
    pub fn may_match(&self, file: &FileSkippingView<'_>) -> bool {
        match self {
            ScanPredicate::And(children) => children.iter().all(|c| c.may_match(file)),
            ScanPredicate::Or(children) => children.iter().any(|c| c.may_match(file)),
            ScanPredicate::Compare { column, op, value } => {
                if value.is_null() {
                    // comparisons with null never hold
                    return false;
                }
                match file.column(column) {
                    ColumnView::Constant(Scalar::Null) => false,
                    ColumnView::Constant(constant) => constant
                        .compare(value)
                        .map(|ord| op.matches(ord))
                        .unwrap_or(true),
                    ColumnView::Stats {
                        min,
                        max,
                        null_count,
                        num_records,
                    } => {
                        if matches!((null_count, num_records), (Some(n), Some(r)) if n >= r) {
                            return false;
                        }
                        may_match_range(*op, min.as_ref(), max.as_ref(), value)
                    }
                    ColumnView::Unknown => true,
                }
            }
            ScanPredicate::IsNull(column) => match file.column(column) {
                ColumnView::Constant(constant) => constant.is_null(),
                ColumnView::Stats { null_count, .. } => null_count.map(|n| n > 0).unwrap_or(true),
                ColumnView::Unknown => true,
            },
            ScanPredicate::IsNotNull(column) => match file.column(column) {
                ColumnView::Constant(constant) => !constant.is_null(),
                ColumnView::Stats {
                    null_count,
                    num_records,
                    ..
                } => match (null_count, num_records) {
                    (Some(n), Some(r)) => n < r,
                    _ => true,
                },
                ColumnView::Unknown => true,
            },
        }
    }
}

fn may_match_range(op: CompareOp, min: Option<&Scalar>, max: Option<&Scalar>, value: &Scalar) -> bool {
    let min_ord = min.and_then(|m| m.compare(value));
    let max_ord = max.and_then(|m| m.compare(value));
    match op {
        CompareOp::Eq => {
            min_ord.map(|o| o != Ordering::Greater).unwrap_or(true)
                && max_ord.map(|o| o != Ordering::Less).unwrap_or(true)
        }
        CompareOp::NotEq => !(min_ord == Some(Ordering::Equal) && max_ord == Some(Ordering::Equal)),
        CompareOp::Lt => min_ord.map(|o| o == Ordering::Less).unwrap_or(true),
        CompareOp::LtEq => min_ord.map(|o| o != Ordering::Greater).unwrap_or(true),
        CompareOp::Gt => max_ord.map(|o| o == Ordering::Greater).unwrap_or(true),
        CompareOp::GtEq => max_ord.map(|o| o != Ordering::Less).unwrap_or(true),
    }
}

impl Display for ScanPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPredicate::Compare { column, op, value } => write!(f, "{column} {op} {value}"),
            ScanPredicate::IsNull(column) => write!(f, "{column} IS NULL"),
            ScanPredicate::IsNotNull(column) => write!(f, "{column} IS NOT NULL"),
            ScanPredicate::And(children) | ScanPredicate::Or(children) => {
                let sep = if matches!(self, ScanPredicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                write!(f, "(")?;
                for (idx, child) in children.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// What is known about a column of one file.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnView {
    /// Partition column, every row holds this value.
    Constant(Scalar),
    /// Data column with (possibly partial) statistics.
    Stats {
        /// minimum non-null value
        min: Option<Scalar>,
        /// maximum non-null value
        max: Option<Scalar>,
        /// number of null values
        null_count: Option<i64>,
        /// number of rows in the file
        num_records: Option<i64>,
    },
    /// Nothing is known.
    Unknown,
}

/// Per-file information used for data skipping.
#[derive(Debug)]
pub struct FileSkippingView<'a> {
    /// logical table schema
    pub schema: &'a StructType,
    /// logical partition column names
    pub partition_columns: &'a [String],
    /// column mapping mode of the table
    pub column_mapping_mode: ColumnMappingMode,
    /// serialized partition values, keyed by physical name
    pub partition_values: &'a HashMap<String, Option<String>>,
    /// parsed file statistics, keyed by physical name
    pub stats: Option<&'a Stats>,
}

impl FileSkippingView<'_> {
    /// Resolve what is known about the logical column `name`.
    pub fn column(&self, name: &str) -> ColumnView {
        let Some(field) = self.schema.field_ignore_case(name) else {
            return ColumnView::Unknown;
        };
        let Ok(physical) = field.physical_name(self.column_mapping_mode) else {
            return ColumnView::Unknown;
        };
        let Some(ty) = field.data_type().as_primitive() else {
            return ColumnView::Unknown;
        };

        if self
            .partition_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(field.name()))
        {
            let raw = self
                .partition_values
                .get(physical)
                .or_else(|| self.partition_values.get(field.name()))
                .and_then(|v| v.as_deref());
            return match Scalar::from_partition_value(raw, ty) {
                Ok(value) => ColumnView::Constant(value),
                Err(_) => ColumnView::Unknown,
            };
        }

        let Some(stats) = self.stats else {
            return ColumnView::Unknown;
        };
        let value_of = |values: &HashMap<String, serde_json::Value>| {
            values
                .get(physical)
                .and_then(|v| Scalar::from_stats_value(v, ty))
                .filter(|v| !v.is_null())
        };
        let mut max = value_of(&stats.max_values);
        // timestamp statistics are truncated to milliseconds
        if let Some(Scalar::Timestamp(ts)) = max.as_mut() {
            *ts = ts.saturating_add(999);
        }
        ColumnView::Stats {
            min: value_of(&stats.min_values),
            max,
            null_count: stats.null_count.get(physical).and_then(|v| v.as_i64()),
            num_records: Some(stats.num_records),
        }
    }
}
