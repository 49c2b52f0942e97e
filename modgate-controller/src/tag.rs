//! Tag data model: operation masks, value kinds and configured points.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::policy::{ChangeDetection, UpdatePolicy};

/// Tag construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error(
        "Unsupported operation '{0}' (use read_uint, read_float, write_uint or write_float)"
    )]
    UnsupportedOperation(String),
}

/// A value that cannot be written to a tag's register.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ValueError {
    #[error("{0} is not a finite number")]
    NotFinite(f64),
    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

/// Bitset of register operations allowed on a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation(u8);

impl Operation {
    /// Read a holding register as an unsigned 16-bit integer.
    pub const READ_UINT: Operation = Operation(0x1);
    /// Read two holding registers as a 32-bit float.
    pub const READ_FLOAT: Operation = Operation(0x2);
    /// Write a single holding register.
    pub const WRITE_UINT: Operation = Operation(0x4);
    /// Write two holding registers as a 32-bit float.
    pub const WRITE_FLOAT: Operation = Operation(0x8);

    const NAMES: [(&'static str, Operation); 4] = [
        ("read_uint", Operation::READ_UINT),
        ("read_float", Operation::READ_FLOAT),
        ("write_uint", Operation::WRITE_UINT),
        ("write_float", Operation::WRITE_FLOAT),
    ];

    /// Parse an operation string such as `"read_float,write_float"`.
    ///
    /// Every recognised keyword found anywhere in the string sets its bit;
    /// separators are not significant. A string matching none of the four
    /// keywords is rejected.
    pub fn parse(op: &str) -> Result<Self, TagError> {
        let bits = Self::NAMES
            .iter()
            .filter(|(name, _)| op.contains(name))
            .fold(0u8, |acc, (_, flag)| acc | flag.0);

        if bits == 0 {
            return Err(TagError::UnsupportedOperation(op.to_string()));
        }

        Ok(Operation(bits))
    }

    /// Raw bit representation.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check whether every bit of `other` is set.
    pub fn contains(self, other: Operation) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_uint(self) -> bool {
        self.contains(Self::READ_UINT)
    }

    pub fn is_float(self) -> bool {
        self.contains(Self::READ_FLOAT)
    }

    pub fn is_write_uint(self) -> bool {
        self.contains(Self::WRITE_UINT)
    }

    pub fn is_write_float(self) -> bool {
        self.contains(Self::WRITE_FLOAT)
    }

    /// True when the poll engine has something to read.
    pub fn is_readable(self) -> bool {
        self.is_uint() || self.is_float()
    }

    /// True when any write bit is set.
    pub fn is_writable(self) -> bool {
        self.is_write_uint() || self.is_write_float()
    }
}

impl BitOr for Operation {
    type Output = Operation;

    fn bitor(self, rhs: Operation) -> Operation {
        Operation(self.0 | rhs.0)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

/// Numeric interpretation of a tag, fixed when the tag is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unsigned,
    Float,
}

impl ValueKind {
    /// Derive the kind from the operation mask. Read bits win over write bits,
    /// unsigned wins over float.
    pub fn from_operation(op: Operation) -> Self {
        if op.is_uint() {
            ValueKind::Unsigned
        } else if op.is_float() {
            ValueKind::Float
        } else if op.is_write_uint() {
            ValueKind::Unsigned
        } else {
            ValueKind::Float
        }
    }
}

/// Last observed value of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Unsigned(u16),
    Float(f32),
}

impl TagValue {
    /// Value as exported through gauges.
    pub fn as_f64(self) -> f64 {
        match self {
            TagValue::Unsigned(v) => f64::from(v),
            TagValue::Float(v) => f64::from(v),
        }
    }

    /// Change-detection equality.
    ///
    /// Unsigned values compare numerically, floats compare bit patterns so a
    /// NaN reading is stable and a sign flip on zero is reported. Values of
    /// different kinds never match.
    pub fn same_as(self, other: TagValue) -> bool {
        match (self, other) {
            (TagValue::Unsigned(a), TagValue::Unsigned(b)) => a == b,
            (TagValue::Float(a), TagValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            TagValue::Unsigned(_) => ValueKind::Unsigned,
            TagValue::Float(_) => ValueKind::Float,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Unsigned(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{:.2}", v),
        }
    }
}

/// Render an optional value for chat replies; unread tags show `0`.
pub fn value_to_string(value: Option<TagValue>) -> String {
    value.map_or_else(|| "0".to_string(), |v| v.to_string())
}

/// A configured register point.
#[derive(Debug, Clone)]
pub struct Tag {
    name: String,
    display_name: Option<String>,
    group: Option<String>,
    address: u16,
    operation: Operation,
    kind: ValueKind,
    policy: Arc<dyn UpdatePolicy>,
}

impl Tag {
    /// Create a tag with the default change-detection policy.
    pub fn new(name: impl Into<String>, address: u16, operation: Operation) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            group: None,
            address,
            operation,
            kind: ValueKind::from_operation(operation),
            policy: Arc::new(ChangeDetection),
        }
    }

    /// Set a human-readable name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        self.display_name = (!display_name.is_empty()).then_some(display_name);
        self
    }

    /// Set the presentation group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        self.group = (!group.is_empty()).then_some(group);
        self
    }

    /// Replace the update policy applied to fresh readings.
    pub fn with_policy(mut self, policy: Arc<dyn UpdatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn policy(&self) -> &dyn UpdatePolicy {
        self.policy.as_ref()
    }

    /// Display name if set, otherwise the tag name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Group membership; an empty filter matches every tag.
    pub fn in_group(&self, group: &str) -> bool {
        group.is_empty() || self.group.as_deref() == Some(group)
    }

    pub fn is_writable(&self) -> bool {
        self.operation.is_writable()
    }

    /// Register kind used for writes: the write bits decide (unsigned
    /// first), else the value kind.
    pub fn writes_unsigned(&self) -> bool {
        let op = self.operation;
        op.is_write_uint() || (!op.is_write_float() && self.kind == ValueKind::Unsigned)
    }

    /// Check that `value` fits the register a write would target.
    pub fn check_value(&self, value: f64) -> Result<(), ValueError> {
        if !value.is_finite() {
            return Err(ValueError::NotFinite(value));
        }

        let (min, max) = if self.writes_unsigned() {
            (0.0, f64::from(u16::MAX))
        } else {
            (f64::from(f32::MIN), f64::from(f32::MAX))
        };
        if !(min..=max).contains(&value) {
            return Err(ValueError::OutOfRange { value, min, max });
        }

        Ok(())
    }
}

/// Check whether a tag accepts writes.
pub fn writable(tag: &Tag) -> bool {
    tag.is_writable()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_operations() {
        assert_eq!(Operation::parse("read_uint").unwrap(), Operation::READ_UINT);
        assert_eq!(Operation::parse("read_float").unwrap(), Operation::READ_FLOAT);
        assert_eq!(Operation::parse("write_uint").unwrap(), Operation::WRITE_UINT);
        assert_eq!(
            Operation::parse("write_float").unwrap(),
            Operation::WRITE_FLOAT
        );
    }

    #[test]
    fn test_parse_combined_operation() {
        let op = Operation::parse("read_float,write_float").unwrap();

        assert!(op.is_float());
        assert!(op.is_write_float());
        assert!(!op.is_uint());
        assert!(!op.is_write_uint());
        assert_eq!(op.bits(), 0x2 | 0x8);
    }

    #[test]
    fn test_parse_ignores_separators() {
        let op = Operation::parse("read_uint write_uint").unwrap();
        assert_eq!(op, Operation::READ_UINT | Operation::WRITE_UINT);
    }

    #[test]
    fn test_parse_unsupported_operation() {
        let err = Operation::parse("read_coil").unwrap_err();
        assert_eq!(err, TagError::UnsupportedOperation("read_coil".to_string()));

        assert!(Operation::parse("").is_err());
    }

    #[test]
    fn test_operation_display() {
        let op = Operation::READ_FLOAT | Operation::WRITE_FLOAT;
        assert_eq!(op.to_string(), "read_float,write_float");
    }

    #[test]
    fn test_value_kind_from_operation() {
        assert_eq!(
            ValueKind::from_operation(Operation::READ_UINT | Operation::WRITE_FLOAT),
            ValueKind::Unsigned
        );
        assert_eq!(
            ValueKind::from_operation(Operation::READ_FLOAT),
            ValueKind::Float
        );
        assert_eq!(
            ValueKind::from_operation(Operation::WRITE_UINT),
            ValueKind::Unsigned
        );
        assert_eq!(
            ValueKind::from_operation(Operation::WRITE_FLOAT),
            ValueKind::Float
        );
    }

    #[test]
    fn test_writable() {
        let read_only = Tag::new("t1", 1, Operation::READ_UINT);
        let write_only = Tag::new("t2", 2, Operation::WRITE_FLOAT);

        assert!(!writable(&read_only));
        assert!(writable(&write_only));
        assert!(!write_only.operation().is_readable());
    }

    #[test]
    fn test_write_kind() {
        let mixed = Tag::new("m", 1, Operation::READ_FLOAT | Operation::WRITE_UINT);
        let float = Tag::new("f", 2, Operation::READ_UINT | Operation::WRITE_FLOAT);
        let read_uint = Tag::new("u", 3, Operation::READ_UINT);

        assert!(mixed.writes_unsigned());
        assert!(!float.writes_unsigned());
        assert!(read_uint.writes_unsigned());
    }

    #[test]
    fn test_check_value_unsigned() {
        let tag = Tag::new("mode", 1, Operation::READ_UINT | Operation::WRITE_UINT);

        assert!(tag.check_value(0.0).is_ok());
        assert!(tag.check_value(65535.0).is_ok());
        assert!(matches!(
            tag.check_value(65536.0),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            tag.check_value(-1.0),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            tag.check_value(f64::NAN),
            Err(ValueError::NotFinite(_))
        ));
    }

    #[test]
    fn test_check_value_float() {
        let tag = Tag::new("day", 1, Operation::READ_FLOAT | Operation::WRITE_FLOAT);

        assert!(tag.check_value(-40.5).is_ok());
        assert!(tag.check_value(70000.0).is_ok());
        assert!(tag.check_value(f64::INFINITY).is_err());
        assert!(tag.check_value(1e300).is_err());
    }

    #[test]
    fn test_same_as() {
        assert!(TagValue::Unsigned(42).same_as(TagValue::Unsigned(42)));
        assert!(!TagValue::Unsigned(42).same_as(TagValue::Unsigned(43)));
        assert!(TagValue::Float(f32::NAN).same_as(TagValue::Float(f32::NAN)));
        assert!(!TagValue::Float(0.0).same_as(TagValue::Float(-0.0)));
        assert!(!TagValue::Unsigned(1).same_as(TagValue::Float(1.0)));
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(TagValue::Unsigned(42).to_string(), "42");
        assert_eq!(TagValue::Float(21.456).to_string(), "21.46");
        assert_eq!(value_to_string(None), "0");
        assert_eq!(value_to_string(Some(TagValue::Float(3.0))), "3.00");
    }

    #[test]
    fn test_value_serializes_as_number() {
        let json = serde_json::to_string(&TagValue::Unsigned(7)).unwrap();
        assert_eq!(json, "7");

        let json = serde_json::to_string(&TagValue::Float(21.5)).unwrap();
        assert_eq!(json, "21.5");
    }

    #[test]
    fn test_label_and_group() {
        let tag = Tag::new("boiler_temp", 10, Operation::READ_FLOAT)
            .with_display_name("Boiler temperature")
            .with_group("state");

        assert_eq!(tag.label(), "Boiler temperature");
        assert!(tag.in_group("state"));
        assert!(tag.in_group(""));
        assert!(!tag.in_group("ust"));

        let bare = Tag::new("pump", 11, Operation::READ_UINT).with_display_name("");
        assert_eq!(bare.label(), "pump");
        assert_eq!(bare.group(), None);
    }
}
