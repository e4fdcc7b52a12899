//! IR type system and literals.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A type in the Tessel IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IrType {
    Void,
    Bool,
    Int32,
    Int64,
    Float,
    Double,
    Pointer(Box<IrType>),
    /// Named struct declared on the module.
    Struct(String),
    Array(Box<IrType>, usize),
}

impl IrType {
    pub fn pointer_to(self) -> IrType {
        IrType::Pointer(Box::new(self))
    }

    pub fn array_of(self, len: usize) -> IrType {
        IrType::Array(Box::new(self), len)
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Pointer(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, IrType::Int32 | IrType::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, IrType::Float | IrType::Double)
    }

    /// Integer or floating point.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Bool, integer, or floating point.
    pub fn is_scalar(&self) -> bool {
        matches!(self, IrType::Bool) || self.is_numeric()
    }

    /// The C spelling used in generated headers.
    pub fn c_name(&self) -> String {
        match self {
            IrType::Void => "void".into(),
            IrType::Bool => "bool".into(),
            IrType::Int32 => "int32_t".into(),
            IrType::Int64 => "int64_t".into(),
            IrType::Float => "float".into(),
            IrType::Double => "double".into(),
            IrType::Pointer(inner) => format!("{}*", inner.c_name()),
            IrType::Struct(name) => name.clone(),
            IrType::Array(inner, _) => format!("{}*", inner.c_name()),
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "i1"),
            IrType::Int32 => write!(f, "i32"),
            IrType::Int64 => write!(f, "i64"),
            IrType::Float => write!(f, "float"),
            IrType::Double => write!(f, "double"),
            IrType::Pointer(inner) => write!(f, "{inner}*"),
            IrType::Struct(name) => write!(f, "%{name}"),
            IrType::Array(inner, len) => write!(f, "[{len} x {inner}]"),
        }
    }
}

/// A constant scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Literal {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
}

impl Literal {
    pub fn ty(&self) -> IrType {
        match self {
            Literal::Bool(_) => IrType::Bool,
            Literal::Int32(_) => IrType::Int32,
            Literal::Int64(_) => IrType::Int64,
            Literal::Float(_) => IrType::Float,
            Literal::Double(_) => IrType::Double,
        }
    }

    /// The zero value of a scalar type.
    pub fn zero(ty: &IrType) -> Option<Literal> {
        match ty {
            IrType::Bool => Some(Literal::Bool(false)),
            IrType::Int32 => Some(Literal::Int32(0)),
            IrType::Int64 => Some(Literal::Int64(0)),
            IrType::Float => Some(Literal::Float(0.0)),
            IrType::Double => Some(Literal::Double(0.0)),
            _ => None,
        }
    }

    /// The literal one of a numeric type.
    pub fn one(ty: &IrType) -> Option<Literal> {
        match ty {
            IrType::Int32 => Some(Literal::Int32(1)),
            IrType::Int64 => Some(Literal::Int64(1)),
            IrType::Float => Some(Literal::Float(1.0)),
            IrType::Double => Some(Literal::Double(1.0)),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{v}"),
            Literal::Int32(v) => write!(f, "{v}"),
            Literal::Int64(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v:?}"),
            Literal::Double(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int32(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int64(v)
    }
}

impl From<f32> for Literal {
    fn from(v: f32) -> Self {
        Literal::Float(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Double(v)
    }
}

/// A named struct type with ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, IrType)>,
}

impl StructDef {
    pub fn ty(&self) -> IrType {
        IrType::Struct(self.name.clone())
    }

    pub fn field_type(&self, field: u32) -> Option<&IrType> {
        self.fields.get(field as usize).map(|(_, ty)| ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_helpers() {
        let ptr = IrType::Float.pointer_to();
        assert!(ptr.is_pointer());
        assert_eq!(ptr.pointee(), Some(&IrType::Float));
        assert_eq!(ptr.to_string(), "float*");
        assert_eq!(IrType::Int32.array_of(4).to_string(), "[4 x i32]");
    }

    #[test]
    fn c_names() {
        assert_eq!(IrType::Int32.c_name(), "int32_t");
        assert_eq!(
            IrType::Struct("TensorShape".into()).pointer_to().c_name(),
            "TensorShape*"
        );
    }

    #[test]
    fn literal_types_and_zero() {
        assert_eq!(Literal::from(3i64).ty(), IrType::Int64);
        assert_eq!(Literal::zero(&IrType::Double), Some(Literal::Double(0.0)));
        assert_eq!(Literal::zero(&IrType::Void), None);
        assert_eq!(Literal::one(&IrType::Bool), None);
        assert_eq!(Literal::Float(2.0).to_string(), "2.0");
    }

    #[test]
    fn struct_field_lookup() {
        let def = StructDef {
            name: "Pair".into(),
            fields: vec![("a".into(), IrType::Int32), ("b".into(), IrType::Double)],
        };
        assert_eq!(def.field_type(1), Some(&IrType::Double));
        assert_eq!(def.field_type(2), None);
        assert_eq!(def.ty(), IrType::Struct("Pair".into()));
    }
}
