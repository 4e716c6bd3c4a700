use hashflow::{pipeline, EdgesBag, Result, TransformLayer, Value};
use proptest::prelude::*;

fn int(args: &[Value], at: usize) -> i64 {
    args.get(at).and_then(Value::as_int).unwrap_or(0)
}

/// sum, sub, squared, cube over inputs x and y, with x passed through.
fn first_simple() -> Result<EdgesBag> {
    TransformLayer::builder()
        .output("sum", &["x", "y"], |args| {
            Ok(Value::Int(int(args, 0) + int(args, 1)))
        })
        .output("sub", &["x", "y"], |args| {
            Ok(Value::Int(int(args, 0) - int(args, 1)))
        })
        .output("squared", &["x"], |args| Ok(Value::Int(int(args, 0).pow(2))))
        .output("cube", &["x"], |args| Ok(Value::Int(int(args, 0).pow(3))))
        .output("x", &["x"], |args| Ok(args[0].clone()))
        .build()
}

fn second_simple() -> Result<EdgesBag> {
    TransformLayer::builder()
        .output("prod", &["squared", "cube"], |args| {
            Ok(Value::Int(int(args, 0) * int(args, 1)))
        })
        .output("min", &["squared", "cube"], |args| {
            Ok(Value::Int(int(args, 0).min(int(args, 1))))
        })
        .output("sub", &["sub"], |args| Ok(args[0].clone()))
        .output("sum", &["sum"], |args| Ok(args[0].clone()))
        .output("x", &["x"], |args| Ok(args[0].clone()))
        .build()
}

fn third_simple() -> Result<EdgesBag> {
    TransformLayer::builder()
        .output("div", &["prod", "x"], |args| {
            Ok(Value::Int(int(args, 0) / int(args, 1)))
        })
        .output("original", &["sum", "sub"], |args| {
            Ok(Value::Int((int(args, 0) + int(args, 1)) / 2))
        })
        .build()
}

#[test]
fn test_two_layer_chain_squares_the_sum() {
    let first = TransformLayer::builder()
        .output("x", &["a", "b"], |args| {
            Ok(Value::Int(int(args, 0) + int(args, 1)))
        })
        .output("y", &["a", "b"], |args| {
            Ok(Value::Int(int(args, 0) - int(args, 1)))
        })
        .build()
        .unwrap();
    let second = TransformLayer::builder()
        .output("z", &["x"], |args| Ok(Value::Int(int(args, 0).pow(2))))
        .build()
        .unwrap();

    let chain = pipeline(&[first, second]).unwrap();
    let z = chain.forward_method("z").unwrap();
    assert_eq!(z.signature(), vec!["a", "b"]);
    assert_eq!(
        z.call_positional(&[Value::from(3), Value::from(5)]).unwrap(),
        Value::from(64)
    );

    // the output hash is a pure function of the inputs
    let (h1, _) = z.get_hash(&[Value::from(3), Value::from(5)]).unwrap();
    let (h2, _) = z.get_hash(&[Value::from(3), Value::from(5)]).unwrap();
    assert_eq!(h1, h2);
    let (h3, _) = z.get_hash(&[Value::from(3), Value::from(6)]).unwrap();
    assert_ne!(h1, h3);
}

#[test]
fn test_single_layer_methods() {
    let first = first_simple().unwrap();
    let sum = first.forward_method("sum").unwrap();
    assert_eq!(
        sum.call_positional(&[Value::from(1), Value::from(2)])
            .unwrap(),
        Value::from(3)
    );
    let sub = first.forward_method("sub").unwrap();
    assert_eq!(
        sub.call_positional(&[Value::from(1), Value::from(2)])
            .unwrap(),
        Value::from(-1)
    );
    let squared = first.forward_method("squared").unwrap();
    assert_eq!(
        squared.call_positional(&[Value::from(9)]).unwrap(),
        Value::from(81)
    );
}

#[test]
fn test_repeated_layer_composes_with_itself() {
    let double = TransformLayer::builder()
        .output("x", &["x"], |args| Ok(Value::Int(int(args, 0) * 2)))
        .build()
        .unwrap();
    assert_eq!(
        double
            .forward_method("x")
            .unwrap()
            .call_positional(&[Value::from(4)])
            .unwrap(),
        Value::from(8)
    );

    let eight = pipeline(&[double.clone(), double.clone(), double]).unwrap();
    assert_eq!(
        eight
            .forward_method("x")
            .unwrap()
            .call_positional(&[Value::from(4)])
            .unwrap(),
        Value::from(32)
    );
}

#[test]
fn test_three_layer_chain() {
    let chain = pipeline(&[first_simple().unwrap(), second_simple().unwrap()]).unwrap();
    assert_eq!(
        chain
            .forward_method("prod")
            .unwrap()
            .call_positional(&[Value::from(7)])
            .unwrap(),
        Value::from(7i64.pow(5))
    );
    assert_eq!(
        chain
            .forward_method("min")
            .unwrap()
            .call_positional(&[Value::from(3)])
            .unwrap(),
        Value::from(9)
    );
    assert_eq!(
        chain
            .forward_method("sub")
            .unwrap()
            .call_positional(&[Value::from(5), Value::from(3)])
            .unwrap(),
        Value::from(2)
    );

    let chain = pipeline(&[
        first_simple().unwrap(),
        second_simple().unwrap(),
        third_simple().unwrap(),
    ])
    .unwrap();
    assert_eq!(
        chain
            .forward_method("div")
            .unwrap()
            .call_positional(&[Value::from(7)])
            .unwrap(),
        Value::from(2401)
    );
    assert_eq!(
        chain
            .forward_method("original")
            .unwrap()
            .call(&[("x", Value::from(9)), ("y", Value::from(10))])
            .unwrap(),
        Value::from(9)
    );
}

#[test]
fn test_backward_methods_round_trip() {
    let layer = TransformLayer::builder()
        .output("prod", &["x"], |args| Ok(Value::Int(int(args, 0) * 2)))
        .inverse("prod", &["prod"], |args| Ok(Value::Int(int(args, 0) / 2)))
        .build()
        .unwrap();

    let backward = layer.backward_method("prod").unwrap();
    assert_eq!(
        backward.call_positional(&[Value::from(10)]).unwrap(),
        Value::from(5)
    );

    let forward = layer.forward_method("prod").unwrap();
    let forwarded = forward.call_positional(&[Value::from(15)]).unwrap();
    assert_eq!(
        backward.call_positional(&[forwarded]).unwrap(),
        Value::from(15)
    );

    // a single-layer pipeline behaves identically
    let chained = pipeline(&[layer]).unwrap();
    assert_eq!(
        chained
            .backward_method("prod")
            .unwrap()
            .call_positional(&[Value::from(10)])
            .unwrap(),
        Value::from(5)
    );
}

#[test]
fn test_backward_chains_right_to_left() {
    let first = TransformLayer::builder()
        .output("prod", &["x"], |args| Ok(Value::Int(int(args, 0) * 2)))
        .inverse("prod", &["prod"], |args| Ok(Value::Int(int(args, 0) / 2)))
        .build()
        .unwrap();
    let second = TransformLayer::builder()
        .output("prod", &["prod"], |args| Ok(Value::Int(int(args, 0) * 3)))
        .inverse("prod", &["prod"], |args| Ok(Value::Int(int(args, 0) / 3)))
        .build()
        .unwrap();

    let chain = pipeline(&[first, second]).unwrap();
    let forward = chain.forward_method("prod").unwrap();
    let backward = chain.backward_method("prod").unwrap();
    assert_eq!(
        forward.call_positional(&[Value::from(5)]).unwrap(),
        Value::from(30)
    );
    assert_eq!(
        backward.call_positional(&[Value::from(30)]).unwrap(),
        Value::from(5)
    );
}

proptest! {
    #[test]
    fn test_outputs_and_hashes_are_deterministic(x in -1000i64..1000, y in -1000i64..1000) {
        let chain = pipeline(&[first_simple().unwrap(), second_simple().unwrap()]).unwrap();
        let method = chain.forward_method("prod").unwrap();

        let first = method.call_positional(&[Value::from(x)]).unwrap();
        let second = method.call_positional(&[Value::from(x)]).unwrap();
        prop_assert_eq!(first, second);

        let (h1, _) = method.get_hash(&[Value::from(x)]).unwrap();
        let (h2, _) = method.get_hash(&[Value::from(x)]).unwrap();
        prop_assert_eq!(&h1, &h2);

        let sub = chain.forward_method("sub").unwrap();
        prop_assert_eq!(
            sub.call_positional(&[Value::from(x), Value::from(y)]).unwrap(),
            Value::from(x - y)
        );
    }
}
