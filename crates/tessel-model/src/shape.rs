//! Tensor layout descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A (rows, columns, channels) triple describing a port's tensor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TensorShape {
    pub rows: usize,
    pub columns: usize,
    pub channels: usize,
}

impl TensorShape {
    pub fn new(rows: usize, columns: usize, channels: usize) -> Self {
        Self {
            rows,
            columns,
            channels,
        }
    }

    /// A flat shape of `size` rows.
    pub fn vector(size: usize) -> Self {
        Self::new(size, 1, 1)
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.rows * self.columns * self.channels
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.rows, self.columns, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_shape_size() {
        let shape = TensorShape::vector(12);
        assert_eq!(shape, TensorShape::new(12, 1, 1));
        assert_eq!(shape.size(), 12);
    }

    #[test]
    fn image_shape_size() {
        assert_eq!(TensorShape::new(224, 224, 3).size(), 150_528);
        assert_eq!(TensorShape::default().size(), 0);
    }

    #[test]
    fn display() {
        assert_eq!(TensorShape::new(2, 3, 4).to_string(), "(2, 3, 4)");
    }
}
