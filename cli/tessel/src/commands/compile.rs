//! `tessel compile`: compile a map and write artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tessel_compile::{CompiledMap, MapCompilerParameters};

use crate::config::load_map;

/// Compile the map at `map_path` and write each artifact in `emit`.
pub fn run(map_path: &Path, parameters: MapCompilerParameters, emit: &[String], output_dir: &Path) -> Result<()> {
    let map = load_map(map_path)?;
    let compiled = tessel_compile::compile(map, parameters)
        .with_context(|| format!("compiling {}", map_path.display()))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    for path in write_artifacts(&compiled, emit, output_dir)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// Write the requested artifacts, named after the module.
pub fn write_artifacts(compiled: &CompiledMap, emit: &[String], output_dir: &Path) -> Result<Vec<PathBuf>> {
    let stem = compiled.module().name.clone();
    let mut written = Vec::with_capacity(emit.len());
    for kind in emit {
        let path = match kind.as_str() {
            "ir" => write(output_dir.join(format!("{stem}.tir")), compiled.ir_text())?,
            "header" => write(output_dir.join(format!("{stem}.h")), compiled.header())?,
            "json" => {
                let json = compiled
                    .module()
                    .to_json()
                    .context("serializing module")?;
                write(output_dir.join(format!("{stem}.json")), json)?
            }
            "llvm-ir" | "bitcode" | "object" => write_llvm(compiled, kind, output_dir, &stem)?,
            other => bail!(
                "unknown emit kind: '{other}'. Choose: ir, header, json, llvm-ir, bitcode, object"
            ),
        };
        written.push(path);
    }
    Ok(written)
}

fn write(path: PathBuf, contents: String) -> Result<PathBuf> {
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(feature = "llvm")]
fn write_llvm(compiled: &CompiledMap, kind: &str, output_dir: &Path, stem: &str) -> Result<PathBuf> {
    use tessel_emit::llvm::EmitTarget;

    let target = match kind {
        "llvm-ir" => EmitTarget::LlvmIr,
        "bitcode" => EmitTarget::Bitcode,
        _ => EmitTarget::ObjectFile,
    };
    let path = output_dir.join(format!("{stem}.{}", target.extension()));
    compiled
        .write_llvm(target, &path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(not(feature = "llvm"))]
fn write_llvm(_compiled: &CompiledMap, kind: &str, _output_dir: &Path, _stem: &str) -> Result<PathBuf> {
    bail!(
        "LLVM code generation is not available.\n\
         Rebuild tessel with LLVM support:\n  \
         LLVM_SYS_181_PREFIX=/usr/lib/llvm-18 cargo build -p tessel --features llvm\n\
         Requested emit kind: {kind}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_model::{Map, Model, PortType, TensorShape, UnaryOp};

    fn compiled() -> CompiledMap {
        let mut model = Model::new();
        let x = model
            .add_input(PortType::Float32, TensorShape::vector(2))
            .unwrap();
        let y = model
            .add_unary(UnaryOp::Negate, model.full_port(x, 0).unwrap())
            .unwrap();
        let out = model.full_port(y, 0).unwrap();
        let map = Map::new(model, vec![("x".into(), x)], vec![("y".into(), out)]).unwrap();
        let parameters = MapCompilerParameters {
            module_name: "neg".into(),
            ..Default::default()
        };
        tessel_compile::compile(map, parameters).unwrap()
    }

    #[test]
    fn writes_text_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let emit = ["ir", "header", "json"].map(String::from);
        let written = write_artifacts(&compiled(), &emit, dir.path()).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("neg.tir"),
                dir.path().join("neg.h"),
                dir.path().join("neg.json"),
            ]
        );
        let header = fs::read_to_string(dir.path().join("neg.h")).unwrap();
        assert!(header.contains("int32_t neg_GetInputSize(void);"));
    }

    #[test]
    fn unknown_emit_kind_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_artifacts(&compiled(), &["pdf".to_string()], dir.path()).unwrap_err();
        assert!(err.to_string().contains("unknown emit kind"));
    }

    #[cfg(not(feature = "llvm"))]
    #[test]
    fn llvm_kinds_need_the_feature() {
        let dir = tempfile::tempdir().unwrap();
        let err = write_artifacts(&compiled(), &["object".to_string()], dir.path()).unwrap_err();
        assert!(err.to_string().contains("LLVM code generation is not available"));
    }

    #[cfg(feature = "llvm")]
    #[test]
    fn writes_llvm_ir() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_artifacts(&compiled(), &["llvm-ir".to_string()], dir.path()).unwrap();
        let ir = fs::read_to_string(&written[0]).unwrap();
        assert!(ir.contains("define void @predict"));
    }
}
