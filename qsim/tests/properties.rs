use approx::assert_relative_eq;
use num_complex::Complex64;
use proptest::prelude::*;
use qsim::gates::{Arity, GateKind, Matrix, kron};
use qsim::measurements::{expectation_value, probabilities, sample};
use qsim::{Circuit, Gate, Observable, SimulatorApi, StateVector, StatevectorSimulator, adjoint_jacobian};
use std::f64::consts::PI;

const WIRES: usize = 4;

fn random_state(parts: &[(f64, f64)]) -> Option<StateVector> {
    let norm = parts.iter().map(|(re, im)| re * re + im * im).sum::<f64>().sqrt();
    if norm < 1e-3 {
        return None;
    }
    let amplitudes = parts
        .iter()
        .map(|&(re, im)| Complex64::new(re / norm, im / norm))
        .collect();
    StateVector::from_amplitudes(amplitudes).ok()
}

fn arity(kind: GateKind) -> usize {
    match kind.spec().arity {
        Arity::Fixed(n) => n,
        Arity::Any => 2,
    }
}

/// Neither Hermitian nor symmetric, so a wrong conjugate or transpose shows.
fn skewed_unitary(params: &[f64]) -> Matrix {
    let rot = GateKind::Rot.target_matrix(params, 1);
    let s = GateKind::S.target_matrix(&[], 1);
    GateKind::ISWAP.target_matrix(&[], 2).dot(&kron(&rot, &s))
}

fn build_gate(kind: GateKind, wires: &[usize], params: &[f64]) -> Gate {
    let wires = wires[..arity(kind)].to_vec();
    match kind {
        GateKind::QubitUnitary => Gate::unitary(skewed_unitary(params), wires),
        GateKind::DiagonalQubitUnitary => {
            let phases: Vec<Complex64> = [params[0], params[1], params[2], params[0] - params[1]]
                .iter()
                .map(|&phi| Complex64::from_polar(1.0, phi))
                .collect();
            Gate::diagonal_unitary(&phases, wires)
        }
        _ => Gate::new(kind, wires, params[..kind.num_params()].to_vec()),
    }
}

/// Adds one extra control on the first wire the gate leaves free.
fn with_control(gate: Gate, wires: &[usize], value: Option<bool>) -> Gate {
    let used = arity(gate.kind);
    match value {
        Some(v) if used < wires.len() => gate.controlled(vec![wires[used]], vec![v]),
        _ => gate,
    }
}

fn gate_strategy() -> impl Strategy<Value = Gate> {
    (
        0..GateKind::ALL.len(),
        Just((0..WIRES).collect::<Vec<usize>>()).prop_shuffle(),
        proptest::collection::vec(-PI..PI, 3),
        any::<bool>(),
        any::<Option<bool>>(),
    )
        .prop_map(|(k, wires, params, inverse, control)| {
            let gate = build_gate(GateKind::ALL[k], &wires, &params);
            let gate = with_control(gate, &wires, control);
            if inverse { gate.inverted() } else { gate }
        })
}

fn state_strategy() -> impl Strategy<Value = Vec<(f64, f64)>> {
    proptest::collection::vec((-1.0..1.0f64, -1.0..1.0f64), 1 << WIRES)
}

fn assert_states_close(a: &StateVector, b: &StateVector, tol: f64) -> Result<(), TestCaseError> {
    for (x, y) in a.amplitudes().iter().zip(b.amplitudes()) {
        prop_assert!((x - y).norm() < tol, "{x} != {y}");
    }
    Ok(())
}

proptest! {
    /// Property: a gate followed by its adjoint is the identity.
    #[test]
    fn prop_inverse_restores_state(parts in state_strategy(), gate in gate_strategy()) {
        let Some(state) = random_state(&parts) else { return Ok(()) };
        let mut evolved = state.clone();
        evolved.apply_gate(&gate, false).unwrap();
        evolved.apply_gate(&gate, true).unwrap();
        assert_states_close(&evolved, &state, 1e-10)?;

        let mut evolved = state.clone();
        evolved.apply_gate(&gate, false).unwrap();
        evolved.apply_gate(&gate.clone().inverted(), false).unwrap();
        assert_states_close(&evolved, &state, 1e-10)?;
    }

    /// Property: unitary gates preserve the norm.
    #[test]
    fn prop_gates_preserve_norm(parts in state_strategy(), gates in proptest::collection::vec(gate_strategy(), 1..12)) {
        let Some(mut state) = random_state(&parts) else { return Ok(()) };
        for gate in &gates {
            state.apply_gate(gate, false).unwrap();
        }
        prop_assert!((state.norm() - 1.0).abs() < 1e-10);
        let total: f64 = probabilities(&state).iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-10);
    }

    /// Property: Pauli-word expectations lie in [-1, 1] and Hamiltonians
    /// within the sum of absolute coefficients.
    #[test]
    fn prop_expectations_are_bounded(
        parts in state_strategy(),
        word in proptest::collection::vec(0..4usize, WIRES),
        coeffs in proptest::collection::vec(-2.0..2.0f64, 2),
    ) {
        let Some(state) = random_state(&parts) else { return Ok(()) };
        let factors: Vec<Observable> = word
            .iter()
            .enumerate()
            .map(|(w, &p)| match p {
                0 => Observable::named(qsim::NamedObservable::Identity, w),
                1 => Observable::x(w),
                2 => Observable::y(w),
                _ => Observable::z(w),
            })
            .collect();
        let pauli = Observable::tensor(factors);
        let value = expectation_value(&state, &pauli).unwrap();
        prop_assert!(value.abs() <= 1.0 + 1e-12);

        let h = Observable::hamiltonian(coeffs.clone(), vec![pauli, Observable::x(1)]);
        let value = expectation_value(&state, &h).unwrap();
        let bound: f64 = coeffs.iter().map(|c| c.abs()).sum();
        prop_assert!(value.abs() <= bound + 1e-12);
    }

    /// Property: a Hermitian expectation lies between its extreme eigenvalues.
    #[test]
    fn prop_hermitian_expectation_within_spectrum(
        parts in state_strategy(),
        (a, d, b, c) in (-2.0..2.0f64, -2.0..2.0f64, -2.0..2.0f64, -2.0..2.0f64),
        wire in 0..WIRES,
    ) {
        let Some(state) = random_state(&parts) else { return Ok(()) };
        let matrix = Matrix::from_shape_vec(
            (2, 2),
            vec![
                Complex64::new(a, 0.0),
                Complex64::new(b, -c),
                Complex64::new(b, c),
                Complex64::new(d, 0.0),
            ],
        )
        .unwrap();
        let mid = (a + d) / 2.0;
        let radius = (((a - d) / 2.0).powi(2) + b * b + c * c).sqrt();
        let value = expectation_value(&state, &Observable::hermitian(matrix, vec![wire])).unwrap();
        prop_assert!(value >= mid - radius - 1e-10, "{value} < {}", mid - radius);
        prop_assert!(value <= mid + radius + 1e-10, "{value} > {}", mid + radius);
    }
}

fn run(circuit: &Circuit) -> StateVector {
    let mut sim = StatevectorSimulator::new(circuit.num_wires);
    sim.run(circuit).unwrap();
    sim.statevector().clone()
}

fn finite_difference(circuit: &Circuit, observables: &[Observable], step: f64) -> Vec<Vec<f64>> {
    let params = circuit.params();
    let trainable: Vec<usize> = circuit.trainable().iter().copied().collect();
    let mut rows = vec![vec![0.0; trainable.len()]; observables.len()];
    for (col, &p) in trainable.iter().enumerate() {
        let mut shifted = circuit.clone();
        let mut values = params.clone();
        values[p] += step;
        shifted.set_params(&values).unwrap();
        let plus = run(&shifted);
        values[p] -= 2.0 * step;
        shifted.set_params(&values).unwrap();
        let minus = run(&shifted);
        for (j, obs) in observables.iter().enumerate() {
            let up = expectation_value(&plus, obs).unwrap();
            let down = expectation_value(&minus, obs).unwrap();
            rows[j][col] = (up - down) / (2.0 * step);
        }
    }
    rows
}

#[test]
fn adjoint_matches_finite_differences_for_every_parametrized_kind() {
    let observables = vec![
        Observable::z(0),
        Observable::x(1),
        Observable::tensor(vec![Observable::y(0), Observable::z(2)]),
        Observable::hamiltonian(vec![0.7, -1.2], vec![Observable::y(2), Observable::z(1)]),
    ];
    let wires = [1, 3, 0, 2];
    for kind in GateKind::ALL.iter().copied().filter(|k| k.num_params() > 0) {
        for inverse in [false, true] {
            for control in [None, Some(true), Some(false)] {
                let mut circuit = Circuit::new(WIRES);
                for w in 0..WIRES {
                    circuit.add_gate(Gate::h(w)).unwrap();
                    circuit.add_gate(Gate::ry(w, 0.3 + 0.2 * w as f64)).unwrap();
                }
                circuit.add_gate(Gate::cnot(0, 2)).unwrap();
                let gate = build_gate(kind, &wires, &[0.41, -0.87, 1.33]);
                let gate = with_control(gate, &wires, control);
                circuit
                    .add_gate(if inverse { gate.inverted() } else { gate })
                    .unwrap();
                circuit.add_gate(Gate::cnot(2, 1)).unwrap();
                circuit.add_gate(Gate::rx(0, -0.5)).unwrap();
                circuit.train_all();

                let jac = adjoint_jacobian(&circuit, &observables).unwrap();
                let fd = finite_difference(&circuit, &observables, 1e-6);
                for (j, row) in fd.iter().enumerate() {
                    for (col, expected) in row.iter().enumerate() {
                        assert!(
                            (jac[[j, col]] - expected).abs() < 1e-5,
                            "{kind} inverse={inverse} control={control:?} obs {j} param {col}: {} vs {expected}",
                            jac[[j, col]]
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn inverted_unitary_is_the_conjugate_transpose() {
    let params = [0.41, -0.87, 1.33];
    let u = skewed_unitary(&params);
    let mut state = StateVector::new(WIRES);
    for w in 0..WIRES {
        state.apply_gate(&Gate::ry(w, 0.2 + 0.3 * w as f64), false).unwrap();
    }
    let mut via_gate = state.clone();
    via_gate
        .apply_gate(&Gate::unitary(u.clone(), vec![2, 0]).inverted(), false)
        .unwrap();
    let mut via_matrix = state.clone();
    let dagger = u.t().mapv(|c| c.conj());
    via_matrix.apply_matrix(&dagger, &[2, 0], false).unwrap();
    let mut via_flag = state;
    via_flag.apply_matrix(&u, &[2, 0], true).unwrap();
    for ((a, b), c) in via_gate
        .amplitudes()
        .iter()
        .zip(via_matrix.amplitudes())
        .zip(via_flag.amplitudes())
    {
        assert!((a - b).norm() < 1e-12 && (b - c).norm() < 1e-12, "{a} {b} {c}");
    }
}

#[test]
fn two_wire_three_rotation_circuit_against_z() {
    let mut circuit = Circuit::new(2);
    circuit
        .add("RX", &[0], &[0.5])
        .unwrap()
        .add("RY", &[1], &[1.2])
        .unwrap()
        .add("CNOT", &[0, 1], &[])
        .unwrap()
        .add("RZ", &[0], &[-0.7])
        .unwrap();
    circuit.train_all();
    let observables = vec![Observable::z(0), Observable::z(1)];
    let jac = adjoint_jacobian(&circuit, &observables).unwrap();
    let fd = finite_difference(&circuit, &observables, 1e-6);
    for (j, row) in fd.iter().enumerate() {
        for (col, expected) in row.iter().enumerate() {
            assert_relative_eq!(jac[[j, col]], *expected, epsilon = 1e-5);
        }
    }
    // ⟨Z0⟩ = cos(0.5) does not depend on RY or RZ.
    assert_relative_eq!(jac[[0, 0]], -(0.5f64).sin(), epsilon = 1e-12);
    assert_relative_eq!(jac[[0, 1]], 0.0, epsilon = 1e-12);
    assert_relative_eq!(jac[[0, 2]], 0.0, epsilon = 1e-12);
}

fn total_variation(state: &StateVector, count: usize, seed: u64) -> f64 {
    let probs = probabilities(state);
    let mut freq = vec![0.0; probs.len()];
    for label in sample(state, count, seed).unwrap() {
        freq[label] += 1.0 / count as f64;
    }
    0.5 * probs.iter().zip(&freq).map(|(p, f)| (p - f).abs()).sum::<f64>()
}

#[test]
fn sampling_converges_in_total_variation() {
    let mut state = StateVector::new(WIRES);
    for (w, theta) in [(0, 0.4), (1, 1.9), (2, 2.6)] {
        state.apply_gate(&Gate::ry(w, theta), false).unwrap();
    }
    state.apply_gate(&Gate::cnot(0, 1), false).unwrap();

    let coarse = total_variation(&state, 200, 1);
    let medium = total_variation(&state, 20_000, 1);
    let fine = total_variation(&state, 200_000, 1);
    assert!(fine < coarse, "{fine} !< {coarse}");
    assert!(medium < 0.03, "{medium}");
    assert!(fine < 0.01, "{fine}");
}

#[test]
fn rx_pi_and_hadamard_scenarios() {
    let mut state = StateVector::new(1);
    state.apply_gate(&Gate::rx(0, PI), false).unwrap();
    assert_relative_eq!(state.probability(1), 1.0, epsilon = 1e-12);

    let mut state = StateVector::new(1);
    state.apply_gate(&Gate::h(0), false).unwrap();
    assert_relative_eq!(state.probability(0), 0.5, epsilon = 1e-12);
    assert_relative_eq!(state.probability(1), 0.5, epsilon = 1e-12);
}

#[test]
fn bell_states_from_qasm() {
    let zz = Observable::tensor(vec![Observable::z(0), Observable::z(1)]);
    let phi = qsim::facade::run_qasm_expectation(
        "qreg q[2];\nh q[0];\ncx q[0],q[1];",
        std::slice::from_ref(&zz),
    )
    .unwrap();
    assert_relative_eq!(phi[0], 1.0, epsilon = 1e-12);
    let psi = qsim::facade::run_qasm_expectation(
        "qreg q[2];\nx q[1];\nh q[0];\ncx q[0],q[1];",
        std::slice::from_ref(&zz),
    )
    .unwrap();
    assert_relative_eq!(psi[0], -1.0, epsilon = 1e-12);
}

#[test]
fn empty_circuit_yields_initial_state() {
    let state = run(&Circuit::new(4));
    assert_eq!(state, StateVector::new(4));
}

#[test]
fn qasm_jacobian_trains_every_parameter() {
    let jac = qsim::facade::run_qasm_jacobian(
        "qreg q[1];\nrx(pi/3) q[0];\nrz(0.2) q[0];",
        &[Observable::z(0)],
    )
    .unwrap();
    assert_eq!(jac.dim(), (1, 2));
    assert_relative_eq!(jac[[0, 0]], -(PI / 3.0).sin(), epsilon = 1e-12);
    assert_relative_eq!(jac[[0, 1]], 0.0, epsilon = 1e-12);
}
