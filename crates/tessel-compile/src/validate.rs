//! Map validation and normalization.

use tessel_model::{Map, PortType, TensorShape};

use crate::error::CompileError;

/// Check that `map` has exactly one input and one output, and make the
/// output a whole port.
///
/// A partial output (a slice or concatenation of lanes) gets a new output
/// node, and the map output is rebound to that node's port. The new node
/// takes the shape of the model's first output node if there is one, else
/// `(size, 1, 1)`.
pub fn ensure_valid_map(map: &mut Map) -> Result<(), CompileError> {
    if map.num_input_ports() != 1 {
        return Err(CompileError::InvalidArgument(format!(
            "compiled maps must have a single input, found {}",
            map.num_input_ports()
        )));
    }
    if map.num_output_ports() != 1 {
        return Err(CompileError::InvalidArgument(format!(
            "compiled maps must have a single output, found {}",
            map.num_output_ports()
        )));
    }

    if map.is_full_port_output(0)? {
        return Ok(());
    }

    let out = map.output(0)?.clone();
    let shape = match map.output_nodes().first() {
        Some(&node) => map.model().node(node)?.shape().unwrap_or_default(),
        None => TensorShape::vector(out.size()),
    };
    match map.output_type(0)? {
        PortType::Boolean
        | PortType::Int32
        | PortType::Int64
        | PortType::Float32
        | PortType::Float64 => {}
        found => {
            return Err(CompileError::TypeMismatch {
                context: "map output".into(),
                found,
            })
        }
    }

    let output = map.model_mut().add_terminal_output(out, shape)?;
    let port = map.model().full_port(output, 0)?;
    map.reset_output(0, port)?;
    log::debug!("added output node {output} with shape {shape} for partial map output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_model::{BinaryOp, Model, NodeKind, OutputPortRef, PortElements};

    fn input_model(size: usize) -> (Model, tessel_model::NodeId) {
        let mut model = Model::new();
        let input = model
            .add_input(PortType::Float32, TensorShape::vector(size))
            .unwrap();
        (model, input)
    }

    #[test]
    fn rejects_two_inputs() {
        let (mut model, a) = input_model(2);
        let b = model
            .add_input(PortType::Float32, TensorShape::vector(2))
            .unwrap();
        let out = model.full_port(a, 0).unwrap();
        let mut map = Map::new(
            model,
            vec![("a".into(), a), ("b".into(), b)],
            vec![("out".into(), out)],
        )
        .unwrap();
        let err = ensure_valid_map(&mut map).unwrap_err();
        assert!(matches!(err, CompileError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_missing_output() {
        let (model, a) = input_model(2);
        let mut map = Map::new(model, vec![("a".into(), a)], vec![]).unwrap();
        assert!(matches!(
            ensure_valid_map(&mut map),
            Err(CompileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn whole_port_output_is_unchanged() {
        let (mut model, a) = input_model(3);
        let doubled = model
            .add_binary(
                BinaryOp::Add,
                model.full_port(a, 0).unwrap(),
                model.full_port(a, 0).unwrap(),
            )
            .unwrap();
        let out = model.full_port(doubled, 0).unwrap();
        let mut map = Map::new(model, vec![("in".into(), a)], vec![("out".into(), out.clone())]).unwrap();
        ensure_valid_map(&mut map).unwrap();
        assert_eq!(map.model().size(), 2);
        assert_eq!(map.output(0).unwrap(), &out);
    }

    #[test]
    fn partial_output_gets_vector_output_node() {
        let (model, a) = input_model(4);
        let slice = PortElements::range(OutputPortRef::new(a, 0), 1, 2);
        let mut map = Map::new(model, vec![("in".into(), a)], vec![("out".into(), slice)]).unwrap();
        ensure_valid_map(&mut map).unwrap();

        assert!(map.is_full_port_output(0).unwrap());
        let outputs = map.output_nodes();
        assert_eq!(outputs.len(), 1);
        let node = map.model().node(outputs[0]).unwrap();
        assert_eq!(node.shape(), Some(TensorShape::new(2, 1, 1)));
        assert_eq!(
            map.output(0).unwrap().referenced_port(),
            Some(OutputPortRef::new(outputs[0], 0))
        );
    }

    #[test]
    fn partial_output_inherits_existing_output_shape() {
        let (mut model, a) = input_model(4);
        let out_node = model
            .add_output(model.full_port(a, 0).unwrap(), TensorShape::new(2, 2, 1))
            .unwrap();
        let port = OutputPortRef::new(out_node, 0);
        let swapped = PortElements::concat([
            PortElements::range(port, 2, 2),
            PortElements::range(port, 0, 2),
        ]);
        let mut map = Map::new(model, vec![("in".into(), a)], vec![("out".into(), swapped)]).unwrap();
        ensure_valid_map(&mut map).unwrap();

        let bound = map.output(0).unwrap().referenced_port().unwrap();
        let node = map.model().node(bound.node).unwrap();
        assert!(matches!(node.kind, NodeKind::Output { .. }));
        assert_ne!(bound.node, out_node);
        assert_eq!(node.shape(), Some(TensorShape::new(2, 2, 1)));
    }

    #[test]
    fn sliced_output_keeps_a_larger_inherited_shape() {
        let (mut model, a) = input_model(4);
        let out_node = model
            .add_output(model.full_port(a, 0).unwrap(), TensorShape::new(2, 2, 1))
            .unwrap();
        let half = PortElements::range(OutputPortRef::new(out_node, 0), 0, 2);
        let mut map = Map::new(model, vec![("in".into(), a)], vec![("out".into(), half)]).unwrap();
        ensure_valid_map(&mut map).unwrap();

        let bound = map.output(0).unwrap().referenced_port().unwrap();
        assert_eq!(map.model().port_size(bound), Some(2));
        assert_eq!(
            map.model().node(bound.node).unwrap().shape(),
            Some(TensorShape::new(2, 2, 1))
        );
    }

    #[test]
    fn empty_output_is_a_type_mismatch() {
        let (model, a) = input_model(1);
        let mut map = Map::new(
            model,
            vec![("in".into(), a)],
            vec![("out".into(), PortElements::default())],
        )
        .unwrap();
        assert!(matches!(
            ensure_valid_map(&mut map),
            Err(CompileError::TypeMismatch { found: PortType::None, .. })
        ));
    }
}
