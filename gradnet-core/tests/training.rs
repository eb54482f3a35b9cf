//! End-to-end training behavior: forward determinism, known loss values,
//! full train loops with both optimizers, dropout statistics and weight
//! snapshot round trips.

use approx::assert_relative_eq;
use gradnet_core::{
    Adam, Fixed, GraphDef, Optimizer, Runtime, Scalar, TensorKind, WeightsSnapshot,
};

mod common;
use common::{graph, op, tensor};

fn init_logging() {
    // May already be initialized by another test; that's fine.
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two-class linear model: logits = W·x, fused softmax cross-entropy loss.
fn two_class_model(w: &[Scalar]) -> GraphDef {
    graph(
        vec![
            tensor(0, TensorKind::Input, &[2], &[1.0, 0.0]),
            tensor(1, TensorKind::Param, &[2, 2], w),
            tensor(2, TensorKind::Intermediate, &[2], &[]),
            tensor(3, TensorKind::Target, &[2], &[0.0, 1.0]),
            tensor(4, TensorKind::Loss, &[], &[]),
        ],
        vec![
            op(0, "matmul", &[1, 0], 2),
            op(1, "softmax_ce_logits", &[2, 3], 4),
        ],
        Some(4),
        Some(2),
        vec![1],
    )
}

/// Scalar linear regression: loss = MSE(x·w - target).
fn regression_model() -> GraphDef {
    graph(
        vec![
            tensor(0, TensorKind::Input, &[2], &[1.0, 2.0]),
            tensor(1, TensorKind::Param, &[2], &[0.0, 0.0]),
            tensor(2, TensorKind::Intermediate, &[], &[]),
            tensor(3, TensorKind::Target, &[], &[3.0]),
            tensor(4, TensorKind::Intermediate, &[], &[]),
            tensor(5, TensorKind::Loss, &[], &[]),
        ],
        vec![
            op(0, "dot", &[0, 1], 2),
            op(1, "sub", &[2, 3], 4),
            op(2, "MSE", &[4], 5),
        ],
        Some(5),
        Some(2),
        vec![1],
    )
}

#[test]
fn uniform_logits_give_ln2_loss() {
    // W rows chosen so both logits come out equal for x = [1, 0].
    let mut rt = Runtime::from_graph(&two_class_model(&[1.0, 0.0, 1.0, 1.0])).unwrap();
    rt.forward().unwrap();

    assert_relative_eq!(rt.output().unwrap()[0], 1.0);
    assert_relative_eq!(rt.output().unwrap()[1], 1.0);
    assert_relative_eq!(rt.error().unwrap(), 2.0_f64.ln(), epsilon = 1e-9);

    rt.backward().unwrap();
    // dlogits = softmax - target = [0.5, -0.5], dW = outer(dlogits, x).
    let dw = rt.grad(1).unwrap();
    assert_relative_eq!(dw[0], 0.5, epsilon = 1e-9);
    assert_relative_eq!(dw[1], 0.0, epsilon = 1e-9);
    assert_relative_eq!(dw[2], -0.5, epsilon = 1e-9);
    assert_relative_eq!(dw[3], 0.0, epsilon = 1e-9);
}

#[test]
fn dense_layer_softmax_hand_computed() {
    // One-sample batch through a full dense layer: x·W + b, then softmax.
    let def = graph(
        vec![
            tensor(0, TensorKind::Input, &[1, 2], &[1.0, 0.0]),
            tensor(1, TensorKind::Param, &[2, 2], &[1.0, 1.0, 0.0, 1.0]),
            tensor(2, TensorKind::Param, &[2], &[0.0, 0.0]),
            tensor(3, TensorKind::Intermediate, &[1, 2], &[]),
            tensor(4, TensorKind::Intermediate, &[1, 2], &[]),
            tensor(5, TensorKind::Intermediate, &[1, 2], &[]),
        ],
        vec![
            op(0, "matmul", &[0, 1], 3),
            op(1, "add", &[3, 2], 4),
            op(2, "softmax", &[4], 5),
        ],
        None,
        Some(5),
        vec![1, 2],
    );
    let mut rt = Runtime::from_graph(&def).unwrap();
    rt.forward().unwrap();

    // [1,0]·[[1,1],[0,1]] + [0,0] = [1,1]
    assert_eq!(rt.data(4).unwrap(), &[1.0, 1.0]);
    let probs = rt.output().unwrap();
    assert_relative_eq!(probs[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(probs[1], 0.5, epsilon = 1e-12);
}

#[test]
fn cross_entropy_known_value() {
    let def = graph(
        vec![
            tensor(0, TensorKind::Param, &[2], &[0.7, 0.3]),
            tensor(1, TensorKind::Target, &[2], &[1.0, 0.0]),
            tensor(2, TensorKind::Loss, &[], &[]),
        ],
        vec![op(0, "CE", &[0, 1], 2)],
        Some(2),
        None,
        vec![0],
    );
    let mut rt = Runtime::from_graph(&def).unwrap();
    rt.forward().unwrap();
    assert_relative_eq!(rt.error().unwrap(), 0.356_674_943_9, epsilon = 1e-6);
}

#[test]
fn forward_is_pure() {
    let mut rt = Runtime::from_graph(&two_class_model(&[0.4, -0.2, 0.1, 0.9])).unwrap();
    rt.forward().unwrap();
    let first = rt.output().unwrap();
    let first_loss = rt.error().unwrap();

    for _ in 0..5 {
        rt.forward().unwrap();
    }
    assert_eq!(rt.output().unwrap(), first);
    assert_relative_eq!(rt.error().unwrap(), first_loss);
    // Forward never touches gradients.
    assert!(rt.grad(1).unwrap().iter().all(|&g| g == 0.0));
    assert_eq!(rt.acc_steps(), 0);
}

#[test]
fn batched_loss_error_is_row_mean() {
    let def = graph(
        vec![
            tensor(0, TensorKind::Param, &[2, 2], &[1.0, 1.0, 0.0, 10.0]),
            tensor(1, TensorKind::Target, &[2, 2], &[1.0, 0.0, 0.0, 1.0]),
            tensor(2, TensorKind::Loss, &[2], &[]),
        ],
        vec![op(0, "softmax_ce_logits", &[0, 1], 2)],
        Some(2),
        None,
        vec![0],
    );
    let mut rt = Runtime::from_graph(&def).unwrap();
    rt.forward().unwrap();

    let rows = rt.loss().unwrap().to_vec();
    assert_eq!(rows.len(), 2);
    assert_relative_eq!(
        rt.error().unwrap(),
        (rows[0] + rows[1]) / 2.0,
        epsilon = 1e-12
    );
}

#[test]
fn fixed_sgd_converges_on_regression() {
    init_logging();
    let mut rt = Runtime::from_graph(&regression_model()).unwrap();
    let mut opt = Fixed::new(0.1).unwrap();

    for _ in 0..30 {
        rt.reset_grad();
        rt.forward().unwrap();
        rt.backward().unwrap();
        opt.step(&mut rt).unwrap();
    }

    rt.forward().unwrap();
    assert!(rt.error().unwrap() < 1e-10, "loss {}", rt.error().unwrap());
    let y = rt.predict(&[1.0, 2.0]).unwrap();
    assert_relative_eq!(y[0], 3.0, epsilon = 1e-4);
}

#[test]
fn adam_drives_classification_loss_down() {
    init_logging();
    let mut rt = Runtime::from_graph(&two_class_model(&[0.0, 0.0, 0.0, 0.0])).unwrap();
    rt.set_target(&[1.0, 0.0]).unwrap();

    let mut opt = Adam::new(0.1, 0.9, 0.999, 1.0e-8).unwrap();

    rt.forward().unwrap();
    let initial = rt.error().unwrap();
    assert_relative_eq!(initial, 2.0_f64.ln(), epsilon = 1e-9);

    for _ in 0..100 {
        rt.reset_grad();
        rt.forward().unwrap();
        rt.backward().unwrap();
        opt.step(&mut rt).unwrap();
    }

    rt.forward().unwrap();
    let trained = rt.error().unwrap();
    assert!(trained < 0.05, "loss only reached {trained}");
    assert!(trained < initial);
}

#[test]
fn gradient_accumulation_matches_average() {
    // Two backward passes on the same batch, then one averaged step, must
    // equal one pass and one step.
    let mut accumulated = Runtime::from_graph(&regression_model()).unwrap();
    accumulated.forward().unwrap();
    accumulated.backward().unwrap();
    accumulated.forward().unwrap();
    accumulated.backward().unwrap();
    let mut opt = Fixed::new(0.1).unwrap();
    opt.step(&mut accumulated).unwrap();

    let mut single = Runtime::from_graph(&regression_model()).unwrap();
    single.forward().unwrap();
    single.backward().unwrap();
    let mut opt = Fixed::new(0.1).unwrap();
    opt.step(&mut single).unwrap();

    assert_eq!(accumulated.data(1).unwrap(), single.data(1).unwrap());
}

#[test]
fn dropout_preserves_expectation() {
    let def = graph(
        vec![
            tensor(0, TensorKind::Input, &[1], &[1.0]),
            tensor(1, TensorKind::Intermediate, &[1], &[]),
        ],
        vec![op(0, "dropout", &[0], 1)],
        None,
        Some(1),
        vec![],
    );
    let mut rt = Runtime::from_graph(&def).unwrap();
    rt.seed_rng(123);

    let rounds = 2000;
    let mut sum = 0.0;
    for _ in 0..rounds {
        rt.forward().unwrap();
        sum += rt.output().unwrap()[0];
    }
    let mean = sum / rounds as Scalar;
    assert!((mean - 1.0).abs() < 0.1, "mean {mean}");
}

#[test]
fn snapshot_round_trip_restores_predictions() {
    let def = regression_model();
    let mut rt = Runtime::from_graph(&def).unwrap();
    let mut opt = Fixed::new(0.1).unwrap();
    for _ in 0..10 {
        rt.reset_grad();
        rt.forward().unwrap();
        rt.backward().unwrap();
        opt.step(&mut rt).unwrap();
    }

    let json = rt.weights_snapshot().to_json().unwrap();
    let restored = WeightsSnapshot::from_json(&json).unwrap();
    let mut fresh = Runtime::from_graph_with_weights(&def, &restored).unwrap();

    let trained = rt.predict(&[1.0, 2.0]).unwrap();
    let reloaded = fresh.predict(&[1.0, 2.0]).unwrap();
    assert_relative_eq!(trained[0], reloaded[0], epsilon = 1e-12);
}

#[test]
fn stats_survive_a_training_loop() {
    let mut rt = Runtime::from_graph(&regression_model()).unwrap();
    let mut opt = Fixed::new(0.1).unwrap();
    for _ in 0..4 {
        rt.reset_grad();
        rt.forward().unwrap();
        rt.backward().unwrap();
        opt.step(&mut rt).unwrap();
    }
    assert_eq!(rt.stats().forward_passes, 4);
    assert_eq!(rt.stats().backward_passes, 4);
    assert_eq!(rt.stats().op_invocations, 4 * 2 * 3);
}
