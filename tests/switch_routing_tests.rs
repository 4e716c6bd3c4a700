use hashflow::{Error, Result, SwitchLayer, TransformLayer, Value};

fn tagging_layer(tag: &'static str) -> Result<hashflow::EdgesBag> {
    TransformLayer::builder()
        .output_labeled("val", tag, &["id"], move |args| {
            let id = args[0].as_str().unwrap_or("?");
            Ok(Value::from(format!("{id}-{tag}")))
        })
        .build()
}

fn switched() -> Result<hashflow::EdgesBag> {
    SwitchLayer::new(
        vec![(Value::from("a"), 0), (Value::from("b"), 1)],
        &[tagging_layer("zero")?, tagging_layer("one")?],
        "keys",
    )
}

#[test]
fn test_routing_by_identifier() {
    let bag = switched().unwrap();
    let val = bag.forward_method("val").unwrap();
    assert_eq!(
        val.call_positional(&[Value::from("a")]).unwrap(),
        Value::from("a-zero")
    );
    assert_eq!(
        val.call_positional(&[Value::from("b")]).unwrap(),
        Value::from("b-one")
    );
}

#[test]
fn test_unknown_identifier_is_reported() {
    let bag = switched().unwrap();
    let val = bag.forward_method("val").unwrap();
    let err = val.call_positional(&[Value::from("c")]).unwrap_err();
    assert!(matches!(err, Error::Identifier(_)));
}

#[test]
fn test_keys_output_lists_known_identifiers() {
    let bag = switched().unwrap();
    let keys = bag.forward_method("keys").unwrap();
    assert_eq!(
        keys.call_positional(&[]).unwrap(),
        Value::Seq(vec![Value::from("a"), Value::from("b")])
    );
}

#[test]
fn test_only_the_selected_branch_runs() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let zero_runs = Arc::new(AtomicUsize::new(0));
    let one_runs = Arc::new(AtomicUsize::new(0));

    let counting = |tag: &'static str, runs: &Arc<AtomicUsize>| {
        let runs = runs.clone();
        TransformLayer::builder()
            .output_labeled("val", tag, &["id"], move |args| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(args[0].clone())
            })
            .build()
            .unwrap()
    };

    let bag = SwitchLayer::new(
        vec![(Value::from("a"), 0), (Value::from("b"), 1)],
        &[counting("zero", &zero_runs), counting("one", &one_runs)],
        "keys",
    )
    .unwrap();

    let val = bag.forward_method("val").unwrap();
    val.call_positional(&[Value::from("a")]).unwrap();
    assert_eq!(zero_runs.load(Ordering::SeqCst), 1);
    assert_eq!(one_runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_branches_may_share_a_layer() {
    let branch = tagging_layer("same").unwrap();
    let bag = SwitchLayer::new(
        vec![(Value::from("a"), 0), (Value::from("b"), 1)],
        &[branch.clone(), branch],
        "keys",
    )
    .unwrap();
    let val = bag.forward_method("val").unwrap();
    assert_eq!(
        val.call_positional(&[Value::from("b")]).unwrap(),
        Value::from("b-same")
    );
}
