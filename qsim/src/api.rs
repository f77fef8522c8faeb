// src/api.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::StateVector;
use crate::adjoint::Jacobian;
use crate::circuit::{Circuit, Gate};
use crate::error::SimResult;
use crate::observables::Observable;

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// Shot count for `expectation` and `sample`. `None` gives exact
    /// expectation values; sampling then needs an explicit count.
    pub shots: Option<usize>,
    /// Seed for every random draw the device makes.
    pub seed: u64,
    /// Observables per adjoint sweep. `None` runs them all at once.
    pub batch_obs: Option<usize>,
    /// When set, Jacobian calls check the final state's norm.
    pub norm_tolerance: Option<f64>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            shots: None,
            seed: 42,
            batch_obs: None,
            norm_tolerance: None,
        }
    }
}

/// A stateful single-register device.
pub trait SimulatorApi {
    fn reset(&mut self, num_wires: usize);
    fn num_wires(&self) -> usize;

    /// Resets to the circuit's register, prepares its initial state and
    /// applies every gate.
    fn run(&mut self, circuit: &Circuit) -> SimResult<()>;

    /// Applies `gates` to the current state, all or nothing.
    fn apply(&mut self, gates: &[Gate]) -> SimResult<()>;

    fn statevector(&self) -> &StateVector;

    /// ⟨ψ|O|ψ⟩, exact or estimated from `shots` samples.
    fn expectation(&mut self, observable: &Observable) -> SimResult<f64>;

    fn variance(&self, observable: &Observable) -> SimResult<f64>;

    /// Probabilities over `wires` (all wires when `None`).
    fn probabilities(&self, wires: Option<&[usize]>) -> SimResult<Vec<f64>>;

    /// Bitstring counts of `shots` computational-basis samples, without
    /// collapsing the state.
    fn sample(&mut self, shots: usize) -> SimResult<BTreeMap<String, usize>>;

    fn jacobian(&self, circuit: &Circuit, observables: &[Observable]) -> SimResult<Jacobian>;

    fn vjp(&self, circuit: &Circuit, observables: &[Observable], dy: &[f64]) -> SimResult<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Location, SimError};
    use crate::statevector_backend::StatevectorSimulator;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    fn bell_circuit() -> Circuit {
        let qasm = r#"
        OPENQASM 2.0;
        include "qelib1.inc";
        qreg q[2];
        h q[0];
        cx q[0], q[1];
        "#;
        Circuit::from_qasm(qasm).expect("qasm parse")
    }

    #[test]
    fn bell_state_expectations() {
        let circ = bell_circuit();
        let mut sim = StatevectorSimulator::new(circ.num_wires);
        sim.run(&circ).expect("run");

        let zz = sim
            .expectation(&Observable::tensor(vec![Observable::z(0), Observable::z(1)]))
            .unwrap();
        let xx = sim
            .expectation(&Observable::tensor(vec![Observable::x(0), Observable::x(1)]))
            .unwrap();
        let z0 = sim.expectation(&Observable::z(0)).unwrap();
        let z1 = sim.expectation(&Observable::z(1)).unwrap();

        assert!(approx_eq(zz, 1.0, 1e-9), "ZZ exp was {}", zz);
        assert!(approx_eq(xx, 1.0, 1e-9), "XX exp was {}", xx);
        assert!(approx_eq(z0, 0.0, 1e-9), "Z⊗I exp was {}", z0);
        assert!(approx_eq(z1, 0.0, 1e-9), "I⊗Z exp was {}", z1);
    }

    #[test]
    fn flipped_target_anticorrelates() {
        let qasm = "qreg q[2];\nx q[1];\nh q[0];\ncx q[0], q[1];";
        let circ = Circuit::from_qasm(qasm).unwrap();
        let mut sim = StatevectorSimulator::new(2);
        sim.run(&circ).unwrap();
        let zz = sim
            .expectation(&Observable::tensor(vec![Observable::z(0), Observable::z(1)]))
            .unwrap();
        assert!(approx_eq(zz, -1.0, 1e-9), "ZZ exp was {}", zz);
    }

    #[test]
    fn sampling_plus_state_is_balanced() {
        let circ = Circuit::from_qasm("qreg q[1];\nh q[0];").unwrap();
        let mut sim = StatevectorSimulator::new(circ.num_wires);
        sim.run(&circ).expect("run");

        let shots = 4000;
        let counts = sim.sample(shots).expect("sample");
        let p0 = *counts.get("0").unwrap_or(&0) as f64 / shots as f64;
        let p1 = *counts.get("1").unwrap_or(&0) as f64 / shots as f64;

        // ±0.05 is more than 6σ at 4000 shots.
        assert!(approx_eq(p0, 0.5, 0.05), "p(0) ~ 0.5, got {}", p0);
        assert!(approx_eq(p1, 0.5, 0.05), "p(1) ~ 0.5, got {}", p1);
        // sampling leaves the state alone
        assert!(approx_eq(sim.statevector().probability(0), 0.5, 1e-12));
    }

    #[test]
    fn can_reuse_simulator_with_reset() {
        let c1 = Circuit::from_qasm("qreg q[1];\nx q[0];").unwrap();
        let c2 = Circuit::from_qasm("qreg q[2];\nh q[1];").unwrap();

        let mut sim = StatevectorSimulator::new(1);
        sim.run(&c1).unwrap();
        assert!(approx_eq(sim.statevector().probability(1), 1.0, 1e-12));

        // run() resizes to the new register
        sim.run(&c2).unwrap();
        assert_eq!(sim.num_wires(), 2);
        let ex = sim.expectation(&Observable::x(1)).unwrap();
        assert!(approx_eq(ex, 1.0, 1e-9), "⟨X⟩ was {}", ex);
    }

    #[test]
    fn failed_apply_leaves_state_untouched() {
        let mut sim = StatevectorSimulator::new(2);
        sim.apply(&[Gate::h(0)]).unwrap();
        let before = sim.statevector().clone();
        let err = sim.apply(&[Gate::x(1), Gate::cnot(0, 5)]).unwrap_err();
        assert!(matches!(
            err,
            SimError::InvalidWire {
                at: Location::Gate(1),
                wire: 5,
                ..
            }
        ));
        assert_eq!(sim.statevector(), &before);
    }

    #[test]
    fn shot_mode_estimates_expectations() {
        let mut sim = StatevectorSimulator::with_options(
            1,
            DeviceOptions {
                shots: Some(20_000),
                seed: 3,
                ..Default::default()
            },
        );
        sim.apply(&[Gate::ry(0, 1.0)]).unwrap();
        let estimate = sim.expectation(&Observable::z(0)).unwrap();
        assert!(approx_eq(estimate, 1.0f64.cos(), 0.03), "got {estimate}");
        // probabilities stay exact
        let probs = sim.probabilities(None).unwrap();
        assert!(approx_eq(probs[0], (0.5f64).cos().powi(2), 1e-12));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: DeviceOptions = serde_json::from_str(r#"{"shots": 100}"#).unwrap();
        assert_eq!(options.shots, Some(100));
        assert_eq!(options.seed, DeviceOptions::default().seed);
        assert_eq!(options.batch_obs, None);
    }
}
