//! End-to-end: GraphDef JSON -> prepared compiler -> target function.

use ngtf_compiler::ir::{ElementType, NgOp, TensorValue};
use ngtf_compiler::{parse, Compiler, DataType, Error, TensorArg};

const CONV_NET: &str = r#"{"node": [
    {"name": "image", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
    {"name": "conv/filter", "op": "Const", "attr": {
        "dtype": {"type": "DT_FLOAT"},
        "value": {"tensor": {"dtype": "DT_FLOAT", "shape": [5, 5, 1, 8], "val": [0.01]}}}},
    {"name": "conv", "op": "Conv2D", "input": ["image", "conv/filter"], "attr": {
        "strides": {"list": {"i": [1, 1, 1, 1]}},
        "padding": {"s": "SAME"},
        "data_format": {"s": "NHWC"}}},
    {"name": "conv/bias", "op": "Const", "attr": {
        "value": {"tensor": {"dtype": "DT_FLOAT", "shape": [8], "val": [0.0]}}}},
    {"name": "conv/biased", "op": "BiasAdd", "input": ["conv", "conv/bias"]},
    {"name": "conv/relu", "op": "Relu", "input": ["conv/biased"]},
    {"name": "pool", "op": "MaxPool", "input": ["conv/relu"], "attr": {
        "ksize": {"list": {"i": [1, 2, 2, 1]}},
        "strides": {"list": {"i": [1, 2, 2, 1]}},
        "padding": {"s": "VALID"}}},
    {"name": "flat/shape", "op": "Const", "attr": {
        "value": {"tensor": {"dtype": "DT_INT32", "shape": [2], "val": [-1, 1568]}}}},
    {"name": "flat", "op": "Reshape", "input": ["pool", "flat/shape"]},
    {"name": "dense/w", "op": "Const", "attr": {
        "value": {"tensor": {"dtype": "DT_FLOAT", "shape": [1568, 10], "val": [0.001]}}}},
    {"name": "dense", "op": "MatMul", "input": ["flat", "dense/w"]},
    {"name": "probs", "op": "Softmax", "input": ["dense"]},
    {"name": "probs/out", "op": "_Retval", "input": ["probs"], "attr": {"index": {"i": 0}}}
]}"#;

fn float_arg(shape: &[i64]) -> TensorArg {
    TensorArg::new(DataType::Float, shape.to_vec())
}

#[test]
fn conv_net_translates() {
    let graph = parse::from_json(CONV_NET).unwrap();
    let compiler = Compiler::prepare(graph).unwrap();
    assert_eq!(compiler.num_params(), 1);
    assert!(!compiler.input_is_static(0));

    let f = compiler.translate(&[float_arg(&[1, 28, 28, 1])]).unwrap();
    assert_eq!(f.parameters.len(), 1);
    assert_eq!(f.results.len(), 1);

    let out = f.graph.node(f.results[0]);
    assert_eq!(out.op, NgOp::Softmax { axes: vec![1] });
    assert_eq!(out.shape, vec![1, 10]);
    assert_eq!(out.element_type, ElementType::F32);

    let text = f.to_string();
    assert!(text.contains("Convolution"), "got: {text}");
    assert!(text.contains("MaxPool"), "got: {text}");
}

#[test]
fn batch_size_follows_input_shape() {
    let compiler = Compiler::prepare(parse::from_json(CONV_NET).unwrap()).unwrap();
    let f = compiler.translate(&[float_arg(&[4, 28, 28, 1])]).unwrap();
    assert_eq!(f.graph.node(f.results[0]).shape, vec![4, 10]);

    // 30x30 pools to 15x15x8, which does not split into rows of 1568
    let err = compiler.translate(&[float_arg(&[1, 30, 30, 1])]).unwrap_err();
    match err {
        Error::Translation { node, .. } => assert_eq!(node, "flat"),
        other => panic!("expected Translation error, got {other:?}"),
    }
}

#[test]
fn split_outputs_feed_separate_results() {
    let json = r#"{"node": [
        {"name": "x", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
        {"name": "axis", "op": "Const", "attr": {"value": {"tensor": {"dtype": "DT_INT32", "val": [1]}}}},
        {"name": "halves", "op": "Split", "input": ["axis", "x"], "attr": {"num_split": {"i": 2}}},
        {"name": "hi", "op": "_Retval", "input": ["halves:1"], "attr": {"index": {"i": 0}}},
        {"name": "lo", "op": "_Retval", "input": ["halves"], "attr": {"index": {"i": 1}}}
    ]}"#;
    let compiler = Compiler::prepare(parse::from_json(json).unwrap()).unwrap();
    let f = compiler.translate(&[float_arg(&[3, 8])]).unwrap();

    let bounds: Vec<_> = f
        .results
        .iter()
        .map(|&id| match &f.graph.node(id).op {
            NgOp::Slice { lower, .. } => lower[1],
            other => panic!("expected Slice, got {other:?}"),
        })
        .collect();
    assert_eq!(bounds, vec![4, 0]);
}

#[test]
fn static_concat_axis_from_argument() {
    let json = r#"{"node": [
        {"name": "a", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
        {"name": "b", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 1}}},
        {"name": "axis", "op": "_Arg", "attr": {"T": {"type": "DT_INT32"}, "index": {"i": 2}}},
        {"name": "cat", "op": "ConcatV2", "input": ["a", "b", "axis"]},
        {"name": "out", "op": "_Retval", "input": ["cat"], "attr": {"index": {"i": 0}}}
    ]}"#;
    let compiler = Compiler::prepare(parse::from_json(json).unwrap()).unwrap();
    assert!(!compiler.input_is_static(0));
    assert!(!compiler.input_is_static(1));
    assert!(compiler.input_is_static(2));

    let inputs = [
        float_arg(&[2, 3]),
        float_arg(&[4, 3]),
        TensorArg::new(DataType::Int32, vec![]).with_value(TensorValue::vector_i32(vec![0])),
    ];
    let f = compiler.translate(&inputs).unwrap();
    assert_eq!(f.graph.node(f.results[0]).shape, vec![6, 3]);
}

#[test]
fn control_dependencies_order_but_carry_no_data() {
    let json = r#"{"node": [
        {"name": "x", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
        {"name": "y", "op": "Tanh", "input": ["x", "^barrier"]},
        {"name": "barrier", "op": "NoOp", "input": ["^x"]},
        {"name": "out", "op": "_Retval", "input": ["y"], "attr": {"index": {"i": 0}}}
    ]}"#;
    let compiler = Compiler::prepare(parse::from_json(json).unwrap()).unwrap();
    let f = compiler.translate(&[float_arg(&[5])]).unwrap();
    assert_eq!(f.graph.node(f.results[0]).op, NgOp::Tanh);
}

#[test]
fn while_loop_rejected() {
    let json = r#"{"node": [
        {"name": "x", "op": "_Arg", "attr": {"T": {"type": "DT_FLOAT"}, "index": {"i": 0}}},
        {"name": "while/Enter", "op": "Enter", "input": ["x"]}
    ]}"#;
    let err = Compiler::prepare(parse::from_json(json).unwrap()).unwrap_err();
    assert!(matches!(err, Error::ControlFlowUnsupported { .. }), "got: {err}");
}

#[test]
fn shared_across_threads() {
    let compiler = Compiler::prepare(parse::from_json(CONV_NET).unwrap()).unwrap();
    let reference = compiler.translate(&[float_arg(&[2, 28, 28, 1])]).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| compiler.translate(&[float_arg(&[2, 28, 28, 1])]).unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), reference);
        }
    });
}
