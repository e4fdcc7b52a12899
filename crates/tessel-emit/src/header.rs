//! C header generation for the public surface of a module.

use std::fmt::Write;

use crate::ir::{IrFunction, IrModule};

fn prototype(function: &IrFunction) -> String {
    let params = if function.params.is_empty() {
        "void".to_string()
    } else {
        function
            .params
            .iter()
            .map(|(name, ty)| {
                // Read-only pointers by convention are named "input".
                let qualifier = if ty.is_pointer() && name == "input" { "const " } else { "" };
                format!("{qualifier}{} {name}", ty.c_name())
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} {}({params});", function.return_type.c_name(), function.name)
}

/// Render the C header declaring every type and function tagged for it.
pub fn write_header(module: &IrModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "//");
    let _ = writeln!(out, "// Generated header for module {}", module.name);
    let _ = writeln!(out, "//");
    let _ = writeln!(out);
    let _ = writeln!(out, "#pragma once");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include <stdbool.h>");
    let _ = writeln!(out, "#include <stdint.h>");
    let _ = writeln!(out);

    for (name, value) in &module.preprocessor_definitions {
        let _ = writeln!(out, "#define {name} {value}");
    }
    if !module.preprocessor_definitions.is_empty() {
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "#if defined(__cplusplus)");
    let _ = writeln!(out, "extern \"C\"");
    let _ = writeln!(out, "{{");
    let _ = writeln!(out, "#endif");
    let _ = writeln!(out);

    for name in &module.header_types {
        let Some(def) = module.struct_def(name) else {
            continue;
        };
        let _ = writeln!(out, "typedef struct {name}");
        let _ = writeln!(out, "{{");
        for (field, ty) in &def.fields {
            let _ = writeln!(out, "    {} {field};", ty.c_name());
        }
        let _ = writeln!(out, "}} {name};");
        let _ = writeln!(out);
    }

    let (predict, other): (Vec<&IrFunction>, Vec<&IrFunction>) = module
        .header_functions()
        .partition(|f| f.include_in_predict_interface);

    for function in other {
        let _ = writeln!(out, "{}", prototype(function));
    }
    if !predict.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "// Predict interface");
        for function in predict {
            let _ = writeln!(out, "{}", prototype(function));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "#if defined(__cplusplus)");
    let _ = writeln!(out, "}} // extern \"C\"");
    let _ = writeln!(out, "#endif");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BlockId};
    use crate::types::{IrType, StructDef};

    fn function(name: &str, return_type: IrType, params: Vec<(String, IrType)>) -> IrFunction {
        IrFunction {
            name: name.into(),
            return_type,
            params,
            blocks: vec![BasicBlock::new("entry")],
            layout: vec![BlockId(0)],
            value_types: vec![],
            regions: vec![],
            include_in_header: true,
            include_in_predict_interface: false,
        }
    }

    #[test]
    fn header_lists_tagged_surface() {
        let mut predict = function(
            "predict",
            IrType::Void,
            vec![
                ("input".into(), IrType::Float.pointer_to()),
                ("output".into(), IrType::Float.pointer_to()),
            ],
        );
        predict.include_in_predict_interface = true;
        let mut hidden = function("helper", IrType::Void, vec![]);
        hidden.include_in_header = false;

        let module = IrModule {
            name: "m".into(),
            structs: vec![StructDef {
                name: "TensorShape".into(),
                fields: vec![
                    ("rows".into(), IrType::Int32),
                    ("columns".into(), IrType::Int32),
                    ("channels".into(), IrType::Int32),
                ],
            }],
            header_types: vec!["TensorShape".into()],
            preprocessor_definitions: vec![("m_PROFILING".into(), "1".into())],
            functions: vec![
                function("m_GetInputSize", IrType::Int32, vec![]),
                hidden,
                predict,
            ],
            ..IrModule::default()
        };

        let header = write_header(&module);
        assert!(header.contains("#define m_PROFILING 1"));
        assert!(header.contains("typedef struct TensorShape"));
        assert!(header.contains("    int32_t channels;"));
        assert!(header.contains("int32_t m_GetInputSize(void);"));
        assert!(header.contains("void predict(const float* input, float* output);"));
        assert!(!header.contains("helper"));
        let predict_at = header.find("// Predict interface").unwrap();
        assert!(header.find("void predict(").unwrap() > predict_at);
    }
}
