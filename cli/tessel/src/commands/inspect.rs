//! `tessel inspect`: describe a map before and after refinement.

use std::path::Path;

use anyhow::{bail, Result};
use serde::Serialize;
use tessel_compile::nodes::is_compilable;
use tessel_model::{Map, NodeAction, TransformContext};

use crate::config::load_map;

#[derive(Debug, Serialize)]
struct MapSummary {
    inputs: Vec<String>,
    outputs: Vec<String>,
    input_size: usize,
    output_size: usize,
    nodes: Vec<String>,
    refined_nodes: Option<Vec<String>>,
    refinement_error: Option<String>,
}

fn describe_nodes(map: &Map) -> Vec<String> {
    map.model()
        .nodes()
        .iter()
        .map(|node| {
            let inputs: Vec<String> = node.inputs.iter().map(|i| i.elements.to_string()).collect();
            format!("{} {} [{}]", node.id, node.kind, inputs.join(", "))
        })
        .collect()
}

fn summarize(map: &Map) -> MapSummary {
    let names = |count: usize, name: &dyn Fn(usize) -> Option<String>| {
        (0..count).filter_map(name).collect::<Vec<_>>()
    };
    let mut refined = map.clone();
    let context = TransformContext::new(|node| {
        if is_compilable(node) {
            NodeAction::Compile
        } else {
            NodeAction::Refine
        }
    });
    let (refined_nodes, refinement_error) = match refined.refine(&context) {
        Ok(_) => (Some(describe_nodes(&refined)), None),
        Err(e) => (None, Some(e.to_string())),
    };
    MapSummary {
        inputs: names(map.num_input_ports(), &|i| map.input_name(i).map(str::to_string)),
        outputs: names(map.num_output_ports(), &|i| map.output_name(i).map(str::to_string)),
        input_size: map.input_size(),
        output_size: map.output_size(),
        nodes: describe_nodes(map),
        refined_nodes,
        refinement_error,
    }
}

pub fn run(map_path: &Path, format: &str) -> Result<()> {
    let map = load_map(map_path)?;
    let summary = summarize(&map);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        "text" => {
            println!("--- Map ({}) ---", map_path.display());
            println!("  Inputs:  {} ({} lane(s))", summary.inputs.join(", "), summary.input_size);
            println!("  Outputs: {} ({} lane(s))", summary.outputs.join(", "), summary.output_size);
            println!();
            println!("--- Nodes ({}) ---", summary.nodes.len());
            for node in &summary.nodes {
                println!("  {node}");
            }
            match (&summary.refined_nodes, &summary.refinement_error) {
                (Some(nodes), _) => {
                    println!();
                    println!("--- Refined nodes ({}) ---", nodes.len());
                    for node in nodes {
                        println!("  {node}");
                    }
                }
                (None, Some(error)) => {
                    println!();
                    println!("Refinement failed: {error}");
                }
                (None, None) => {}
            }
        }
        other => bail!("unknown format: '{other}'. Choose: text, json"),
    }
    Ok(())
}
