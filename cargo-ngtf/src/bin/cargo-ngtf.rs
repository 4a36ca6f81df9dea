//! Cargo subcommand: `cargo ngtf`
//!
//! Usage:
//!   cargo ngtf translate graph.json --input 1x28x28x1
//!   cargo ngtf translate graph.json --input 2x6 --input 2 --static 1=3,-1

use std::collections::BTreeMap;
use std::fs;
use std::process;

use ngtf_compiler::ir::{DataType, SourceGraph, TensorValue};
use ngtf_compiler::{parse, Compiler, TensorArg};

fn main() {
    env_logger::init();

    // When invoked as `cargo ngtf`, cargo passes "ngtf" as argv[1]. Strip it.
    let args: Vec<String> = std::env::args().collect();
    let args = if args.get(1).map(|s| s.as_str()) == Some("ngtf") {
        &args[2..]
    } else {
        &args[1..]
    };

    match args.first().map(|s| s.as_str()) {
        Some("translate") => cmd_translate(&args[1..]),
        Some("--help") | Some("-h") | None => print_usage(),
        Some(other) => {
            eprintln!("error: unknown subcommand '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("cargo ngtf: dataflow graph translator");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  cargo ngtf translate <graph.json> [--input <shape>]... [--static <i>=<values>]...");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  translate   Translate a GraphDef JSON file and print the resulting function");
}

const TRANSLATE_USAGE: &str =
    "Usage: cargo ngtf translate <graph.json> [--input <shape>]... [--static <i>=<values>]...";

fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    eprintln!("{TRANSLATE_USAGE}");
    process::exit(1);
}

/// `1x28x28x1` -> `[1, 28, 28, 1]`; `scalar` -> `[]`.
fn parse_shape(s: &str) -> Option<Vec<i64>> {
    if s == "scalar" {
        return Some(Vec::new());
    }
    s.split('x').map(|d| d.parse().ok()).collect()
}

/// `1=3,-1` -> `(1, [3, -1])`.
fn parse_static(s: &str) -> Option<(usize, Vec<i64>)> {
    let (index, values) = s.split_once('=')?;
    let values = values
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<Vec<i64>>>()?;
    Some((index.parse().ok()?, values))
}

/// Declared data type of each `_Arg`, keyed by index.
fn argument_types(graph: &SourceGraph) -> BTreeMap<usize, DataType> {
    graph
        .nodes()
        .iter()
        .filter(|n| n.is_arg())
        .filter_map(|n| {
            let index = usize::try_from(n.attr_i64("index").ok()?).ok()?;
            Some((index, n.attr_type("T").ok()?))
        })
        .collect()
}

fn static_value(dtype: DataType, values: Vec<i64>) -> TensorValue {
    match dtype {
        DataType::Int32 => TensorValue::vector_i32(values.into_iter().map(|v| v as i32).collect()),
        _ => TensorValue::vector_i64(values),
    }
}

fn cmd_translate(args: &[String]) {
    let mut graph_path: Option<String> = None;
    let mut shapes: Vec<Vec<i64>> = Vec::new();
    let mut statics: BTreeMap<usize, Vec<i64>> = BTreeMap::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                i += 1;
                let shape = args
                    .get(i)
                    .and_then(|s| parse_shape(s))
                    .unwrap_or_else(|| usage_error("--input requires a shape such as 1x28x28x1"));
                shapes.push(shape);
            }
            "--static" | "-s" => {
                i += 1;
                let (index, values) = args
                    .get(i)
                    .and_then(|s| parse_static(s))
                    .unwrap_or_else(|| usage_error("--static requires <index>=<v,v,..>"));
                statics.insert(index, values);
            }
            "--help" | "-h" => {
                eprintln!("{TRANSLATE_USAGE}");
                eprintln!();
                eprintln!("Translate a GraphDef JSON file and print the target function.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  -i, --input <SHAPE>     Shape of the next argument, e.g. 1x28x28x1 or scalar");
                eprintln!("  -s, --static <I=VALS>   Value of static argument I, e.g. 1=3,-1");
                eprintln!();
                eprintln!("Set RUST_LOG=debug to trace each translated op.");
                process::exit(0);
            }
            _ => {
                if graph_path.is_none() {
                    graph_path = Some(args[i].clone());
                } else {
                    usage_error(&format!("Unexpected argument: {}", args[i]));
                }
            }
        }
        i += 1;
    }

    let graph_path = graph_path.unwrap_or_else(|| usage_error("missing <graph.json>"));

    let json = fs::read_to_string(&graph_path).unwrap_or_else(|err| {
        eprintln!("Error reading {graph_path}: {err}");
        process::exit(1);
    });
    let graph = parse::from_json(&json).unwrap_or_else(|err| {
        eprintln!("Error loading {graph_path}: {err}");
        process::exit(1);
    });

    let types = argument_types(&graph);
    let compiler = Compiler::prepare(graph).unwrap_or_else(|err| {
        eprintln!("Error: {err}");
        process::exit(1);
    });

    let inputs: Vec<TensorArg> = shapes
        .into_iter()
        .enumerate()
        .map(|(index, shape)| {
            let dtype = types.get(&index).copied().unwrap_or(DataType::Float);
            let arg = TensorArg::new(dtype, shape);
            match statics.remove(&index) {
                Some(values) => arg.with_value(static_value(dtype, values)),
                None => {
                    if compiler.input_is_static(index) {
                        log::warn!("argument {index} is static but no --static value was given");
                    }
                    arg
                }
            }
        })
        .collect();
    for index in statics.keys() {
        log::warn!("--static {index} has no matching --input");
    }

    let function = compiler.translate(&inputs).unwrap_or_else(|err| {
        eprintln!("Error translating {graph_path}: {err}");
        process::exit(1);
    });
    print!("{function}");
    eprintln!(
        "Translated {graph_path}: {} parameter(s), {} result(s), {} node(s)",
        function.parameters.len(),
        function.results.len(),
        function.graph.len()
    );
}
