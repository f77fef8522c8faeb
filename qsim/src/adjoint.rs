//! Adjoint-method Jacobians.
//!
//! One forward pass produces |ψ_T⟩, each observable seeds a bra
//! `|λ_j⟩ = O_j|ψ_T⟩`, and a single reverse sweep undoes the gates on the
//! ket and on every bra while reading off `∂⟨O_j⟩/∂θ = Im⟨λ_j|G ψ⟩` at each
//! trainable gate. Memory stays at one ket, one scratch and one bra per
//! observable in the current batch.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::circuit::{Circuit, Gate};
use crate::error::{Location, SimError, SimResult};
use crate::observables::Observable;
use crate::state::StateVector;

/// Rows are observables, columns are trainable parameters in ascending
/// index order.
pub type Jacobian = Array2<f64>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjointOptions {
    /// Maximum number of bras alive at once. `None` keeps one per observable.
    pub batch_size: Option<usize>,
    /// When set, |ψ_T⟩ must have unit norm within this tolerance.
    pub norm_tolerance: Option<f64>,
}

/// A single-parameter step of the expanded circuit.
struct Op {
    gate: Gate,
    /// Jacobian column fed by this step, if its parameter is trainable.
    column: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AdjointJacobian {
    options: AdjointOptions,
}

impl AdjointJacobian {
    pub fn new(options: AdjointOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AdjointOptions {
        &self.options
    }

    /// `num_observables × num_trainable` table of `∂⟨O_j⟩/∂θ_k`.
    pub fn jacobian(&self, circuit: &Circuit, observables: &[Observable]) -> SimResult<Jacobian> {
        let ops = prepare(circuit, observables)?;
        let trainable = circuit.trainable().len();
        let mut jac = Array2::zeros((observables.len(), trainable));
        if trainable == 0 || observables.is_empty() {
            return Ok(jac);
        }
        let ket = self.forward(circuit, &ops)?;

        let batch = self
            .options
            .batch_size
            .filter(|&b| b > 0)
            .unwrap_or(observables.len());
        debug!(
            wires = circuit.num_wires,
            ops = ops.len(),
            observables = observables.len(),
            trainable,
            batch,
            "adjoint jacobian"
        );
        for (b, chunk) in observables.chunks(batch).enumerate() {
            let bras: Vec<StateVector> = chunk
                .par_iter()
                .map(|obs| obs.apply_unchecked(&ket))
                .collect();
            let rows = sweep(&ket, bras, &ops, trainable);
            for (j, row) in rows.into_iter().enumerate() {
                for (col, value) in row.into_iter().enumerate() {
                    jac[[b * batch + j, col]] = value;
                }
            }
        }
        Ok(jac)
    }

    /// `dyᵀ·J` from one sweep with the bra seeded by `Σ dy_j O_j`.
    pub fn vector_jacobian_product(
        &self,
        circuit: &Circuit,
        observables: &[Observable],
        dy: &[f64],
    ) -> SimResult<Vec<f64>> {
        if dy.len() != observables.len() {
            return Err(SimError::DimensionMismatch {
                at: Location::Observable(0),
                what: "cotangent vector",
                expected: observables.len(),
                found: dy.len(),
            });
        }
        let ops = prepare(circuit, observables)?;
        let trainable = circuit.trainable().len();
        if trainable == 0 || dy.iter().all(|&d| d == 0.0) {
            return Ok(vec![0.0; trainable]);
        }
        let ket = self.forward(circuit, &ops)?;
        let combined = Observable::hamiltonian(dy.to_vec(), observables.to_vec());
        let bra = combined.apply_unchecked(&ket);
        debug!(wires = circuit.num_wires, ops = ops.len(), trainable, "adjoint vjp");
        Ok(sweep(&ket, vec![bra], &ops, trainable)
            .pop()
            .unwrap_or_default())
    }

    fn forward(&self, circuit: &Circuit, ops: &[Op]) -> SimResult<StateVector> {
        let mut ket = StateVector::new(circuit.num_wires);
        if let Some(prep) = circuit.state_prep() {
            ket.prepare(prep)?;
        }
        for op in ops {
            ket.apply_gate_unchecked(&op.gate, false);
        }
        if let Some(tolerance) = self.options.norm_tolerance {
            ket.check_norm(tolerance, Location::Operation)?;
        }
        Ok(ket)
    }
}

/// Jacobian with default options.
pub fn adjoint_jacobian(circuit: &Circuit, observables: &[Observable]) -> SimResult<Jacobian> {
    AdjointJacobian::default().jacobian(circuit, observables)
}

/// Validates everything up front and flattens the circuit into
/// single-parameter steps tagged with their Jacobian column.
fn prepare(circuit: &Circuit, observables: &[Observable]) -> SimResult<Vec<Op>> {
    circuit.validate()?;
    for (j, obs) in observables.iter().enumerate() {
        obs.validate(circuit.num_wires, j)?;
    }

    let mut columns = vec![None; circuit.num_params()];
    for (col, &p) in circuit.trainable().iter().enumerate() {
        columns[p] = Some(col);
    }

    let mut ops = Vec::with_capacity(circuit.gates().len());
    let mut offset = 0;
    for (i, gate) in circuit.gates().iter().enumerate() {
        for (part, slot) in gate.expand() {
            let column = slot.and_then(|s| columns[offset + s]);
            if column.is_some() {
                check_differentiable(&part, gate, i)?;
            }
            ops.push(Op { gate: part, column });
        }
        offset += gate.params.len();
    }
    Ok(ops)
}

/// Fails when a trainable step has no single-parameter generator. Every
/// parametrized kind in the gate table either has one or decomposes into
/// steps that do, so this only fires if a new kind is added without one.
fn check_differentiable(part: &Gate, source: &Gate, index: usize) -> SimResult<()> {
    if part.is_differentiable() {
        return Ok(());
    }
    Err(SimError::NonDifferentiableGate {
        at: Location::Gate(index),
        name: source.kind.to_string(),
    })
}

/// Reverse sweep from |ψ_T⟩ with the given bras; returns one row per bra.
fn sweep(
    ket: &StateVector,
    mut bras: Vec<StateVector>,
    ops: &[Op],
    trainable: usize,
) -> Vec<Vec<f64>> {
    let mut rows = vec![vec![0.0; trainable]; bras.len()];
    let mut psi = ket.clone();
    let mut mu = ket.clone();
    // Steps before the first trainable one never feed a column.
    let first = ops.iter().position(|op| op.column.is_some()).unwrap_or(ops.len());
    for op in ops[first..].iter().rev() {
        psi.apply_gate_unchecked(&op.gate, true);
        bras.par_iter_mut()
            .for_each(|bra| bra.apply_gate_unchecked(&op.gate, true));
        let Some(col) = op.column else { continue };
        mu.copy_from(&psi);
        mu.apply_generator(&op.gate);
        let values: Vec<f64> = bras.par_iter().map(|bra| bra.inner(&mu).im).collect();
        for (row, value) in rows.iter_mut().zip(values) {
            row[col] = value;
        }
    }
    rows
}
