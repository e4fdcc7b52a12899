//! Ports, port references, and element selections.
//!
//! An output port is a typed, possibly multi-lane value produced by a node.
//! Consumers never hold ports directly; they hold [`PortElements`], an ordered
//! list of ranges over one or more output ports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Runtime element type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortType {
    None,
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Categorical,
}

impl PortType {
    /// Whether values of this type support arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PortType::Int32 | PortType::Int64 | PortType::Float32 | PortType::Float64
        )
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortType::None => "none",
            PortType::Boolean => "boolean",
            PortType::Int32 => "int32",
            PortType::Int64 => "int64",
            PortType::Float32 => "float32",
            PortType::Float64 => "float64",
            PortType::Categorical => "categorical",
        };
        f.write_str(name)
    }
}

/// Reference to one output port of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputPortRef {
    pub node: NodeId,
    pub port: usize,
}

impl OutputPortRef {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

impl fmt::Display for OutputPortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out{}", self.node, self.port)
    }
}

/// A single lane of an output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortElement {
    pub port: OutputPortRef,
    pub index: usize,
}

/// A contiguous run of lanes `[start, start + count)` of one output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub port: OutputPortRef,
    pub start: usize,
    pub count: usize,
}

impl PortRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// An ordered selection of lanes drawn from one or more output ports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortElements {
    ranges: Vec<PortRange>,
}

impl fmt::Display for PortElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            write!(f, "{}[{}..{}]", range.port, range.start, range.end())?;
        }
        Ok(())
    }
}

impl PortElements {
    /// Every lane of `port`, which has `size` lanes.
    pub fn full(port: OutputPortRef, size: usize) -> Self {
        Self::range(port, 0, size)
    }

    pub fn range(port: OutputPortRef, start: usize, count: usize) -> Self {
        let mut elements = Self::default();
        elements.push(PortRange { port, start, count });
        elements
    }

    pub fn single(element: PortElement) -> Self {
        Self::range(element.port, element.index, 1)
    }

    /// Concatenate several selections in order.
    pub fn concat<I: IntoIterator<Item = PortElements>>(parts: I) -> Self {
        let mut elements = Self::default();
        for part in parts {
            for range in part.ranges {
                elements.push(range);
            }
        }
        elements
    }

    fn push(&mut self, range: PortRange) {
        if range.count == 0 {
            return;
        }
        if let Some(last) = self.ranges.last_mut() {
            if last.port == range.port && last.end() == range.start {
                last.count += range.count;
                return;
            }
        }
        self.ranges.push(range);
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// Total number of lanes selected.
    pub fn size(&self) -> usize {
        self.ranges.iter().map(|r| r.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The `index`-th selected lane.
    pub fn element(&self, index: usize) -> Option<PortElement> {
        let mut remaining = index;
        for range in &self.ranges {
            if remaining < range.count {
                return Some(PortElement {
                    port: range.port,
                    index: range.start + remaining,
                });
            }
            remaining -= range.count;
        }
        None
    }

    pub fn elements(&self) -> impl Iterator<Item = PortElement> + '_ {
        self.ranges.iter().flat_map(|r| {
            (r.start..r.end()).map(move |index| PortElement {
                port: r.port,
                index,
            })
        })
    }

    /// Sub-selection of `count` lanes starting at lane `start`.
    pub fn slice(&self, start: usize, count: usize) -> Option<PortElements> {
        if start + count > self.size() {
            return None;
        }
        let mut out = PortElements::default();
        let mut skip = start;
        let mut take = count;
        for range in &self.ranges {
            if take == 0 {
                break;
            }
            if skip >= range.count {
                skip -= range.count;
                continue;
            }
            let n = (range.count - skip).min(take);
            out.push(PortRange {
                port: range.port,
                start: range.start + skip,
                count: n,
            });
            skip = 0;
            take -= n;
        }
        Some(out)
    }

    /// The port referenced when every lane comes from a single port.
    pub fn referenced_port(&self) -> Option<OutputPortRef> {
        let first = self.ranges.first()?.port;
        self.ranges
            .iter()
            .all(|r| r.port == first)
            .then_some(first)
    }

    /// Distinct ports referenced, in first-seen order.
    pub fn referenced_ports(&self) -> Vec<OutputPortRef> {
        let mut ports = Vec::new();
        for range in &self.ranges {
            if !ports.contains(&range.port) {
                ports.push(range.port);
            }
        }
        ports
    }

    /// Whether this selection is exactly one whole port, given that port's size.
    pub fn is_full_port_output(&self, port_size: impl Fn(OutputPortRef) -> Option<usize>) -> bool {
        match self.ranges.as_slice() {
            [range] => range.start == 0 && port_size(range.port) == Some(range.count),
            _ => false,
        }
    }
}

/// A named, typed input of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    pub port_type: PortType,
    pub elements: PortElements,
}

impl InputPort {
    pub fn size(&self) -> usize {
        self.elements.size()
    }

    /// The lane at `index` of this input.
    pub fn element(&self, index: usize) -> Option<PortElement> {
        self.elements.element(index)
    }
}

/// A named, typed output of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    pub port_type: PortType,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_ranges() {
        let elements = PortElements::concat([
            PortElements::range(OutputPortRef::new(NodeId(1), 0), 2, 2),
            PortElements::range(OutputPortRef::new(NodeId(0), 0), 0, 1),
        ]);
        assert_eq!(elements.to_string(), "n1.out0[2..4] + n0.out0[0..1]");
    }

    fn port(node: usize) -> OutputPortRef {
        OutputPortRef::new(NodeId(node), 0)
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let elements = PortElements::concat([
            PortElements::range(port(0), 0, 2),
            PortElements::range(port(0), 2, 3),
        ]);
        assert_eq!(elements.ranges().len(), 1);
        assert_eq!(elements.size(), 5);
    }

    #[test]
    fn element_lookup_spans_ranges() {
        let elements = PortElements::concat([
            PortElements::range(port(0), 1, 2),
            PortElements::range(port(1), 0, 3),
        ]);
        assert_eq!(
            elements.element(1),
            Some(PortElement {
                port: port(0),
                index: 2
            })
        );
        assert_eq!(
            elements.element(2),
            Some(PortElement {
                port: port(1),
                index: 0
            })
        );
        assert_eq!(elements.element(5), None);
        assert_eq!(elements.elements().count(), 5);
    }

    #[test]
    fn slice_crosses_range_boundary() {
        let elements = PortElements::concat([
            PortElements::range(port(0), 0, 2),
            PortElements::range(port(1), 4, 4),
        ]);
        let slice = elements.slice(1, 3).unwrap();
        assert_eq!(
            slice.ranges(),
            &[
                PortRange {
                    port: port(0),
                    start: 1,
                    count: 1
                },
                PortRange {
                    port: port(1),
                    start: 4,
                    count: 2
                },
            ]
        );
        assert!(elements.slice(5, 2).is_none());
    }

    #[test]
    fn full_port_detection() {
        let size = |_| Some(4);
        assert!(PortElements::full(port(0), 4).is_full_port_output(size));
        assert!(!PortElements::range(port(0), 1, 3).is_full_port_output(size));
        assert!(!PortElements::range(port(0), 0, 3).is_full_port_output(size));
        let split = PortElements::concat([
            PortElements::range(port(0), 0, 2),
            PortElements::range(port(1), 0, 2),
        ]);
        assert!(!split.is_full_port_output(size));
    }

    #[test]
    fn referenced_port_requires_single_source() {
        let single = PortElements::range(port(3), 0, 2);
        assert_eq!(single.referenced_port(), Some(port(3)));
        let split = PortElements::concat([
            PortElements::range(port(0), 0, 1),
            PortElements::range(port(1), 0, 1),
        ]);
        assert_eq!(split.referenced_port(), None);
        assert_eq!(split.referenced_ports(), vec![port(0), port(1)]);
    }

    #[test]
    fn port_type_display() {
        assert_eq!(PortType::Float32.to_string(), "float32");
        assert!(PortType::Int64.is_numeric());
        assert!(!PortType::Boolean.is_numeric());
    }
}
