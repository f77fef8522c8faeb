// src/facade.rs
use std::collections::BTreeMap;

use crate::StateVector;
use crate::adjoint::Jacobian;
use crate::api::{DeviceOptions, SimulatorApi};
use crate::circuit::Circuit;
use crate::error::SimResult;
use crate::observables::Observable;
use crate::statevector_backend::StatevectorSimulator;

fn run(circuit: &Circuit, options: DeviceOptions) -> SimResult<StatevectorSimulator> {
    let mut sim = StatevectorSimulator::with_options(circuit.num_wires, options);
    sim.run(circuit)?;
    Ok(sim)
}

pub fn run_qasm_return_statevector(qasm: &str) -> SimResult<StateVector> {
    let circ = Circuit::from_qasm(qasm)?;
    let sim = run(&circ, DeviceOptions::default())?;
    Ok(sim.statevector().clone())
}

pub fn run_qasm_expectation(qasm: &str, observables: &[Observable]) -> SimResult<Vec<f64>> {
    let circ = Circuit::from_qasm(qasm)?;
    let mut sim = run(&circ, DeviceOptions::default())?;
    observables.iter().map(|obs| sim.expectation(obs)).collect()
}

pub fn run_qasm_counts(qasm: &str, shots: usize, seed: u64) -> SimResult<BTreeMap<String, usize>> {
    let circ = Circuit::from_qasm(qasm)?;
    let options = DeviceOptions {
        seed,
        ..Default::default()
    };
    let mut sim = run(&circ, options)?;
    sim.sample(shots)
}

/// Jacobian with every circuit parameter trainable.
pub fn run_qasm_jacobian(qasm: &str, observables: &[Observable]) -> SimResult<Jacobian> {
    let mut circ = Circuit::from_qasm(qasm)?;
    circ.train_all();
    StatevectorSimulator::new(circ.num_wires).jacobian(&circ, observables)
}
