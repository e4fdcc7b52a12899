//! Node kinds and the Node struct.
//!
//! A node represents one operation in a model. The set of operations is
//! closed: every kind is a variant of [`NodeKind`], and the kind alone
//! determines the node's output ports from its inputs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::port::{InputPort, OutputPort, PortType};
use crate::shape::TensorShape;

/// Index of a node within its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A typed scalar literal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalarValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl ScalarValue {
    pub fn port_type(&self) -> PortType {
        match self {
            ScalarValue::Boolean(_) => PortType::Boolean,
            ScalarValue::Int32(_) => PortType::Int32,
            ScalarValue::Int64(_) => PortType::Int64,
            ScalarValue::Float32(_) => PortType::Float32,
            ScalarValue::Float64(_) => PortType::Float64,
        }
    }

    /// Convert a real number into a literal of the given port type.
    ///
    /// Integer types only accept whole numbers within their range.
    pub fn from_f64(port_type: PortType, value: f64) -> Option<Self> {
        let whole = value.fract() == 0.0;
        match port_type {
            PortType::Boolean => Some(ScalarValue::Boolean(value != 0.0)),
            PortType::Int32 => (whole && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX))
                .then_some(ScalarValue::Int32(value as i32)),
            // 2^63 is exact in f64; i64::MAX is not.
            PortType::Int64 => (whole && value >= -(2f64.powi(63)) && value < 2f64.powi(63))
                .then_some(ScalarValue::Int64(value as i64)),
            PortType::Float32 => Some(ScalarValue::Float32(value as f32)),
            PortType::Float64 => Some(ScalarValue::Float64(value)),
            PortType::None | PortType::Categorical => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ScalarValue::Boolean(b) => f64::from(u8::from(b)),
            ScalarValue::Int32(v) => f64::from(v),
            ScalarValue::Int64(v) => v as f64,
            ScalarValue::Float32(v) => f64::from(v),
            ScalarValue::Float64(v) => v,
        }
    }
}

/// Element-wise binary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Minimum,
    Maximum,
}

/// Element-wise unary arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnaryOp {
    Negate,
    Square,
    Abs,
}

/// Element-wise comparison producing booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

/// The operation a node performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Model input of the given type and shape.
    Input {
        port_type: PortType,
        shape: TensorShape,
    },
    /// Materializes its input as a whole port with a declared shape.
    Output { shape: TensorShape },
    /// Literal values.
    Constant { values: Vec<ScalarValue> },
    Binary(BinaryOp),
    Unary(UnaryOp),
    Comparison(ComparisonOp),
    /// `input * scale + offset`; expressed through refinement.
    Affine { scale: f64, offset: f64 },
    /// Reduction of a vector to its scalar sum.
    Sum,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Input { .. } => write!(f, "Input"),
            NodeKind::Output { .. } => write!(f, "Output"),
            NodeKind::Constant { .. } => write!(f, "Constant"),
            NodeKind::Binary(op) => write!(f, "Binary({op:?})"),
            NodeKind::Unary(op) => write!(f, "Unary({op:?})"),
            NodeKind::Comparison(op) => write!(f, "Comparison({op:?})"),
            NodeKind::Affine { .. } => write!(f, "Affine"),
            NodeKind::Sum => write!(f, "Sum"),
        }
    }
}

impl NodeKind {
    /// Names of the input ports this kind expects.
    pub fn input_names(&self) -> &'static [&'static str] {
        match self {
            NodeKind::Input { .. } | NodeKind::Constant { .. } => &[],
            NodeKind::Output { .. } | NodeKind::Unary(_) | NodeKind::Affine { .. } | NodeKind::Sum => {
                &["input"]
            }
            NodeKind::Binary(_) | NodeKind::Comparison(_) => &["input1", "input2"],
        }
    }

    /// Compute output ports from the `(type, size)` of each input.
    pub fn output_ports(&self, inputs: &[(PortType, usize)]) -> Result<Vec<OutputPort>, ModelError> {
        let expected = self.input_names().len();
        if inputs.len() != expected {
            return Err(self.invalid(format!(
                "expected {expected} input(s), found {}",
                inputs.len()
            )));
        }

        let output = |port_type, size| {
            vec![OutputPort {
                name: "output".into(),
                port_type,
                size,
            }]
        };

        match self {
            NodeKind::Input { port_type, shape } => {
                if matches!(port_type, PortType::None | PortType::Categorical) {
                    return Err(self.invalid(format!("unsupported input type {port_type}")));
                }
                Ok(output(*port_type, shape.size()))
            }
            // The declared shape is metadata; the port follows the input.
            NodeKind::Output { .. } => {
                let (ty, size) = inputs[0];
                Ok(output(ty, size))
            }
            NodeKind::Constant { values } => {
                let first = values
                    .first()
                    .ok_or_else(|| self.invalid("constant has no values".into()))?;
                let ty = first.port_type();
                if let Some(other) = values.iter().find(|v| v.port_type() != ty) {
                    return Err(ModelError::TypeMismatch {
                        context: "constant values".into(),
                        expected: ty,
                        found: other.port_type(),
                    });
                }
                Ok(output(ty, values.len()))
            }
            NodeKind::Binary(_) | NodeKind::Comparison(_) => {
                let (lhs_ty, lhs_size) = inputs[0];
                let (rhs_ty, rhs_size) = inputs[1];
                if lhs_ty != rhs_ty {
                    return Err(ModelError::TypeMismatch {
                        context: format!("{self} input2"),
                        expected: lhs_ty,
                        found: rhs_ty,
                    });
                }
                if lhs_size != rhs_size {
                    return Err(ModelError::SizeMismatch {
                        context: format!("{self} input2"),
                        expected: lhs_size,
                        found: rhs_size,
                    });
                }
                if !lhs_ty.is_numeric() {
                    return Err(self.invalid(format!("non-numeric operand type {lhs_ty}")));
                }
                let out_ty = match self {
                    NodeKind::Comparison(_) => PortType::Boolean,
                    _ => lhs_ty,
                };
                Ok(output(out_ty, lhs_size))
            }
            NodeKind::Unary(_) | NodeKind::Affine { .. } => {
                let (ty, size) = inputs[0];
                if !ty.is_numeric() {
                    return Err(self.invalid(format!("non-numeric operand type {ty}")));
                }
                Ok(output(ty, size))
            }
            NodeKind::Sum => {
                let (ty, size) = inputs[0];
                if !ty.is_numeric() {
                    return Err(self.invalid(format!("non-numeric operand type {ty}")));
                }
                if size == 0 {
                    return Err(self.invalid("cannot sum an empty input".into()));
                }
                Ok(output(ty, 1))
            }
        }
    }

    fn invalid(&self, reason: String) -> ModelError {
        ModelError::InvalidNode {
            kind: self.to_string(),
            reason,
        }
    }
}

/// A node in the model graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<OutputPort>,
}

impl Node {
    pub fn output(&self, port: usize) -> Option<&OutputPort> {
        self.outputs.get(port)
    }

    /// The declared shape of an input or output node.
    pub fn shape(&self) -> Option<TensorShape> {
        match &self.kind {
            NodeKind::Input { shape, .. } | NodeKind::Output { shape } => Some(*shape),
            _ => None,
        }
    }
}
