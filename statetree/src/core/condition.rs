//! Typed comparison of two variable handles.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::variables::{
    ConstantTable, ObjectRef, VariableHandle, VariableKind, VariablePool, VariableValue, Vec3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl Comparator {
    /// Ordering comparators are only defined for numeric kinds.
    pub fn is_valid_for(self, kind: VariableKind) -> bool {
        match kind {
            VariableKind::Int | VariableKind::Float => true,
            VariableKind::Bool | VariableKind::Vector | VariableKind::Object => {
                matches!(self, Comparator::Equal | Comparator::NotEqual)
            }
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
        }
    }

    fn apply<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Comparator::Equal => a == b,
            Comparator::NotEqual => a != b,
            Comparator::Less => a < b,
            Comparator::LessOrEqual => a <= b,
            Comparator::Greater => a > b,
            Comparator::GreaterOrEqual => a >= b,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// `left <comparator> right`, both read as `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    pub left: VariableHandle,
    pub right: VariableHandle,
    pub kind: VariableKind,
    pub comparator: Comparator,
}

impl Condition {
    pub fn new(
        left: VariableHandle,
        comparator: Comparator,
        right: VariableHandle,
        kind: VariableKind,
    ) -> Self {
        Self {
            left,
            right,
            kind,
            comparator,
        }
    }

    /// False for invalid comparator/kind pairs and unreadable handles.
    pub fn evaluate(&self, pool: &VariablePool, constants: &ConstantTable) -> bool {
        if !self.comparator.is_valid_for(self.kind) {
            return false;
        }
        let left = VariableValue::read(self.kind, pool, constants, self.left);
        let right = VariableValue::read(self.kind, pool, constants, self.right);
        match (left, right) {
            (Some(VariableValue::Bool(a)), Some(VariableValue::Bool(b))) => {
                self.comparator.apply(a, b)
            }
            (Some(VariableValue::Int(a)), Some(VariableValue::Int(b))) => {
                self.comparator.apply(a, b)
            }
            (Some(VariableValue::Float(a)), Some(VariableValue::Float(b))) => {
                self.comparator.apply(a, b)
            }
            (Some(VariableValue::Vector(a)), Some(VariableValue::Vector(b))) => {
                vectors_match(self.comparator, a, b)
            }
            (Some(VariableValue::Object(a)), Some(VariableValue::Object(b))) => {
                objects_match(self.comparator, a, b)
            }
            _ => false,
        }
    }
}

fn vectors_match(comparator: Comparator, a: Vec3, b: Vec3) -> bool {
    match comparator {
        Comparator::Equal => a == b,
        Comparator::NotEqual => a != b,
        _ => false,
    }
}

fn objects_match(comparator: Comparator, a: ObjectRef, b: ObjectRef) -> bool {
    match comparator {
        Comparator::Equal => a == b,
        Comparator::NotEqual => a != b,
        _ => false,
    }
}

/// True when every condition passes; stops at the first failure.
pub fn all_pass(conditions: &[Condition], pool: &VariablePool, constants: &ConstantTable) -> bool {
    conditions
        .iter()
        .all(|condition| condition.evaluate(pool, constants))
}
