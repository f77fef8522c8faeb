// src/statevector_backend.rs
use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::StateVector;
use crate::adjoint::{AdjointJacobian, AdjointOptions, Jacobian};
use crate::api::{DeviceOptions, SimulatorApi};
use crate::circuit::{Circuit, Gate};
use crate::error::{Location, SimError, SimResult};
use crate::measurements;
use crate::observables::Observable;

pub struct StatevectorSimulator {
    options: DeviceOptions,
    state: StateVector,
    /// Hands out per-call seeds so repeated draws differ but stay
    /// reproducible from `options.seed`.
    rng: StdRng,
}

impl StatevectorSimulator {
    pub fn new(num_wires: usize) -> Self {
        Self::with_options(num_wires, DeviceOptions::default())
    }

    pub fn with_options(num_wires: usize, options: DeviceOptions) -> Self {
        Self {
            rng: StdRng::seed_from_u64(options.seed),
            state: StateVector::new(num_wires),
            options,
        }
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    fn adjoint(&self) -> AdjointJacobian {
        AdjointJacobian::new(AdjointOptions {
            batch_size: self.options.batch_obs,
            norm_tolerance: self.options.norm_tolerance,
        })
    }
}

impl SimulatorApi for StatevectorSimulator {
    fn reset(&mut self, num_wires: usize) {
        if num_wires == self.state.num_wires() {
            self.state.reset();
        } else {
            self.state = StateVector::new(num_wires);
        }
    }

    fn num_wires(&self) -> usize {
        self.state.num_wires()
    }

    fn run(&mut self, circuit: &Circuit) -> SimResult<()> {
        circuit.validate()?;
        // Build the new register aside so a failure leaves the device as it was.
        let mut state = StateVector::new(circuit.num_wires);
        if let Some(prep) = circuit.state_prep() {
            state.prepare(prep)?;
        }
        debug!(
            wires = circuit.num_wires,
            gates = circuit.gates().len(),
            "running circuit"
        );
        for gate in circuit.gates() {
            state.apply_gate_unchecked(gate, false);
        }
        self.state = state;
        Ok(())
    }

    fn apply(&mut self, gates: &[Gate]) -> SimResult<()> {
        let n = self.state.num_wires();
        for (i, gate) in gates.iter().enumerate() {
            gate.validate(i, n)?;
        }
        for gate in gates {
            self.state.apply_gate_unchecked(gate, false);
        }
        Ok(())
    }

    fn statevector(&self) -> &StateVector {
        &self.state
    }

    fn expectation(&mut self, observable: &Observable) -> SimResult<f64> {
        match self.options.shots {
            Some(shots) => {
                let seed = self.rng.next_u64();
                measurements::estimate_expectation(&self.state, observable, shots, seed)
            }
            None => measurements::expectation_value(&self.state, observable),
        }
    }

    fn variance(&self, observable: &Observable) -> SimResult<f64> {
        measurements::variance(&self.state, observable)
    }

    fn probabilities(&self, wires: Option<&[usize]>) -> SimResult<Vec<f64>> {
        match wires {
            Some(wires) => measurements::marginal_probabilities(&self.state, wires),
            None => Ok(measurements::probabilities(&self.state)),
        }
    }

    fn sample(&mut self, shots: usize) -> SimResult<BTreeMap<String, usize>> {
        if shots == 0 {
            return Err(SimError::InvalidParameter {
                at: Location::Operation,
                reason: "shot count must be positive".to_string(),
            });
        }
        let seed = self.rng.next_u64();
        let samples = measurements::sample(&self.state, shots, seed)?;
        Ok(measurements::counts(&samples, self.state.num_wires()))
    }

    fn jacobian(&self, circuit: &Circuit, observables: &[Observable]) -> SimResult<Jacobian> {
        self.adjoint().jacobian(circuit, observables)
    }

    fn vjp(&self, circuit: &Circuit, observables: &[Observable], dy: &[f64]) -> SimResult<Vec<f64>> {
        self.adjoint()
            .vector_jacobian_product(circuit, observables, dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_samples() {
        let options = DeviceOptions {
            seed: 9,
            ..Default::default()
        };
        let mut a = StatevectorSimulator::with_options(2, options.clone());
        let mut b = StatevectorSimulator::with_options(2, options);
        for sim in [&mut a, &mut b] {
            sim.apply(&[Gate::h(0), Gate::h(1)]).unwrap();
        }
        assert_eq!(a.sample(500).unwrap(), b.sample(500).unwrap());
        assert!(a.sample(0).is_err());
    }

    #[test]
    fn failed_run_keeps_previous_state() {
        let mut sim = StatevectorSimulator::new(1);
        sim.apply(&[Gate::x(0)]).unwrap();
        let before = sim.statevector().clone();

        // Deserialized circuits skip the builder, so run() must re-check them.
        let bad: Circuit = serde_json::from_value(serde_json::json!({
            "num_wires": 2,
            "gates": [],
            "prep": { "Amplitudes": { "amplitudes": [[1.0, 0.0], [1.0, 0.0]], "wires": [0] } },
            "trainable": []
        }))
        .unwrap();
        let err = sim.run(&bad).unwrap_err();
        assert!(matches!(
            err,
            SimError::InvalidState {
                at: Location::StatePreparation,
                ..
            }
        ));
        assert_eq!(sim.statevector(), &before);
        assert_eq!(sim.num_wires(), 1);
    }

    #[test]
    fn jacobian_uses_device_batching() {
        let mut circuit = Circuit::new(2);
        circuit
            .add("RX", &[0], &[0.3])
            .unwrap()
            .add("CNOT", &[0, 1], &[])
            .unwrap();
        circuit.train_all();
        let observables = vec![Observable::z(0), Observable::z(1)];
        let sim = StatevectorSimulator::with_options(
            2,
            DeviceOptions {
                batch_obs: Some(1),
                ..Default::default()
            },
        );
        let jac = sim.jacobian(&circuit, &observables).unwrap();
        let expected = -(0.3f64).sin();
        assert!((jac[[0, 0]] - expected).abs() < 1e-12);
        assert!((jac[[1, 0]] - expected).abs() < 1e-12);
        let vjp = sim.vjp(&circuit, &observables, &[1.0, 1.0]).unwrap();
        assert!((vjp[0] - 2.0 * expected).abs() < 1e-12);
    }
}
