//! Filter expressions handed to a scan by the host.
//!
//! Expressions are translated into [`ScanPredicate`]s for file pruning and
//! evaluated row by row with arrow kernels, so filtering stays exact even
//! where pruning can only approximate.

use std::sync::Arc;

use arrow_arith::boolean::{and_kleene, is_not_null, is_null, not, or_kleene};
use arrow_array::{Array, ArrayRef, BooleanArray, RecordBatch};
use arrow_cast::cast;
use arrow_ord::cmp;
use arrow_select::filter::{filter_record_batch, prep_null_mask_filter};

use crate::kernel::{CompareOp, Scalar, ScanPredicate};
use crate::{DeltaResult, DeltaTableError};

/// Binary operators of [`Expr::BinaryExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl Operator {
    fn compare_op(self) -> Option<CompareOp> {
        match self {
            Operator::Eq => Some(CompareOp::Eq),
            Operator::NotEq => Some(CompareOp::NotEq),
            Operator::Lt => Some(CompareOp::Lt),
            Operator::LtEq => Some(CompareOp::LtEq),
            Operator::Gt => Some(CompareOp::Gt),
            Operator::GtEq => Some(CompareOp::GtEq),
            Operator::And | Operator::Or => None,
        }
    }
}

/// A host filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to an output column
    Column(String),
    /// Constant value
    Literal(Scalar),
    /// `left op right`
    BinaryExpr {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    /// `expr IS NULL`
    IsNull(Box<Expr>),
    /// `expr IS NOT NULL`
    IsNotNull(Box<Expr>),
    /// `expr [NOT] IN (list)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `NOT expr`
    Not(Box<Expr>),
}

/// Reference the column `name`.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// A literal value.
pub fn lit(value: impl Into<Scalar>) -> Expr {
    Expr::Literal(value.into())
}

impl Expr {
    fn binary(self, op: Operator, other: Expr) -> Expr {
        Expr::BinaryExpr {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(Operator::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.binary(Operator::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(Operator::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(Operator::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(Operator::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(Operator::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(Operator::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(Operator::Or, other)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn in_list(self, list: Vec<Expr>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Names of all columns this expression reads.
    pub fn column_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_column_refs(&mut refs);
        refs
    }

    fn collect_column_refs<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            Expr::Column(name) => refs.push(name),
            Expr::Literal(_) => {}
            Expr::BinaryExpr { left, right, .. } => {
                left.collect_column_refs(refs);
                right.collect_column_refs(refs);
            }
            Expr::IsNull(expr) | Expr::IsNotNull(expr) | Expr::Not(expr) => {
                expr.collect_column_refs(refs)
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_column_refs(refs);
                list.iter().for_each(|e| e.collect_column_refs(refs));
            }
        }
    }

    /// Translate into a predicate usable for file pruning.
    ///
    /// The result never excludes a file this expression could match: parts of
    /// a conjunction that can not be translated are dropped, a disjunction is
    /// only kept when all of its parts translate.
    pub fn to_scan_predicate(&self) -> Option<ScanPredicate> {
        self.to_predicate(false)
    }

    fn to_predicate(&self, negated: bool) -> Option<ScanPredicate> {
        match self {
            Expr::Not(inner) => inner.to_predicate(!negated),
            Expr::BinaryExpr {
                left,
                op: op @ (Operator::And | Operator::Or),
                right,
            } => {
                let children = [left, right].map(|e| e.to_predicate(negated));
                let conjunction = (*op == Operator::And) != negated;
                if conjunction {
                    ScanPredicate::and_all(children.into_iter().flatten())
                } else {
                    let [Some(l), Some(r)] = children else {
                        return None;
                    };
                    Some(ScanPredicate::Or(vec![l, r]))
                }
            }
            Expr::BinaryExpr { left, op, right } => {
                let op = op.compare_op()?;
                let (column, op, value) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(v)) => (c, op, v),
                    (Expr::Literal(v), Expr::Column(c)) => (c, op.flip(), v),
                    _ => return None,
                };
                Some(ScanPredicate::Compare {
                    column: column.clone(),
                    op: if negated { op.negate() } else { op },
                    value: value.clone(),
                })
            }
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
                let Expr::Column(column) = inner.as_ref() else {
                    return None;
                };
                let null_check = matches!(self, Expr::IsNull(_)) != negated;
                Some(if null_check {
                    ScanPredicate::IsNull(column.clone())
                } else {
                    ScanPredicate::IsNotNull(column.clone())
                })
            }
            Expr::InList {
                expr,
                list,
                negated: list_negated,
            } => {
                let Expr::Column(column) = expr.as_ref() else {
                    return None;
                };
                let negated = negated != *list_negated;
                let op = if negated {
                    CompareOp::NotEq
                } else {
                    CompareOp::Eq
                };
                let children = list
                    .iter()
                    .map(|e| match e {
                        Expr::Literal(value) => Some(ScanPredicate::Compare {
                            column: column.clone(),
                            op,
                            value: value.clone(),
                        }),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                if negated {
                    ScanPredicate::and_all(children)
                } else {
                    Some(ScanPredicate::Or(children))
                }
            }
            Expr::Column(column) => Some(ScanPredicate::Compare {
                column: column.clone(),
                op: CompareOp::Eq,
                value: Scalar::Boolean(!negated),
            }),
            Expr::Literal(_) => None,
        }
    }

    /// Evaluate this expression against every row of `batch`.
    pub fn evaluate(&self, batch: &RecordBatch) -> DeltaResult<ArrayRef> {
        match self {
            Expr::Column(name) => column_by_name(batch, name),
            Expr::Literal(value) => value.to_array(batch.num_rows()),
            Expr::BinaryExpr { left, op, right } => {
                let lhs = left.evaluate(batch)?;
                let rhs = right.evaluate(batch)?;
                let result = match op {
                    Operator::And => and_kleene(as_boolean(&lhs)?, as_boolean(&rhs)?)?,
                    Operator::Or => or_kleene(as_boolean(&lhs)?, as_boolean(&rhs)?)?,
                    _ => compare(*op, &lhs, &rhs)?,
                };
                Ok(Arc::new(result))
            }
            Expr::IsNull(inner) => Ok(Arc::new(is_null(inner.evaluate(batch)?.as_ref())?)),
            Expr::IsNotNull(inner) => {
                Ok(Arc::new(is_not_null(inner.evaluate(batch)?.as_ref())?))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.evaluate(batch)?;
                let mut result = BooleanArray::from(vec![false; batch.num_rows()]);
                for item in list {
                    let matches = compare(Operator::Eq, &value, &item.evaluate(batch)?)?;
                    result = or_kleene(&result, &matches)?;
                }
                if *negated {
                    result = not(&result)?;
                }
                Ok(Arc::new(result))
            }
            Expr::Not(inner) => Ok(Arc::new(not(as_boolean(&inner.evaluate(batch)?)?)?)),
        }
    }
}

fn column_by_name(batch: &RecordBatch, name: &str) -> DeltaResult<ArrayRef> {
    let schema = batch.schema();
    let idx = schema
        .index_of(name)
        .ok()
        .or_else(|| {
            schema
                .fields()
                .iter()
                .position(|f| f.name().eq_ignore_ascii_case(name))
        })
        .ok_or_else(|| DeltaTableError::generic(format!("Filter references unknown column '{name}'")))?;
    Ok(batch.column(idx).clone())
}

fn as_boolean(array: &ArrayRef) -> DeltaResult<&BooleanArray> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| {
            DeltaTableError::generic(format!(
                "Expected a boolean expression, got {}",
                array.data_type()
            ))
        })
}

fn compare(op: Operator, lhs: &ArrayRef, rhs: &ArrayRef) -> DeltaResult<BooleanArray> {
    let rhs = if lhs.data_type() != rhs.data_type() {
        cast(rhs, lhs.data_type())?
    } else {
        rhs.clone()
    };
    let result = match op {
        Operator::Eq => cmp::eq(lhs, &rhs)?,
        Operator::NotEq => cmp::neq(lhs, &rhs)?,
        Operator::Lt => cmp::lt(lhs, &rhs)?,
        Operator::LtEq => cmp::lt_eq(lhs, &rhs)?,
        Operator::Gt => cmp::gt(lhs, &rhs)?,
        Operator::GtEq => cmp::gt_eq(lhs, &rhs)?,
        Operator::And | Operator::Or => {
            return Err(DeltaTableError::generic(format!(
                "{op:?} is not a comparison"
            )))
        }
    };
    Ok(result)
}

/// Keep the rows of `batch` for which every filter evaluates to true.
pub fn filter_batch(batch: &RecordBatch, filters: &[Expr]) -> DeltaResult<RecordBatch> {
    if filters.is_empty() || batch.num_rows() == 0 {
        return Ok(batch.clone());
    }
    let mut mask = BooleanArray::from(vec![true; batch.num_rows()]);
    for filter in filters {
        let result = filter.evaluate(batch)?;
        mask = and_kleene(&mask, as_boolean(&result)?)?;
    }
    let mask = if mask.null_count() > 0 {
        prep_null_mask_filter(&mask)
    } else {
        mask
    };
    Ok(filter_record_batch(batch, &mask)?)
}
