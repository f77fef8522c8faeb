use num_complex::Complex64;
use rayon::prelude::*;
use serde::Serialize;

use crate::circuit::{Gate, StatePrep};
use crate::error::{Location, SimError, SimResult, check_wires};
use crate::gates::{Matrix, ONE, ZERO};

/// Amplitude blocks handed to one rayon task. Kept a power of two so that a
/// block always contains whole cosets.
const MIN_BLOCK: usize = 1 << 11;

/// Default tolerance for `‖ψ‖ = 1` checks on caller-provided amplitudes.
pub const NORM_TOLERANCE: f64 = 1e-6;

/// Rejects caller-provided amplitudes whose norm is not 1.
pub(crate) fn check_amplitude_norm(amplitudes: &[Complex64], at: Location) -> SimResult<()> {
    let norm = amplitudes.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
    if (norm - 1.0).abs() > NORM_TOLERANCE {
        return Err(SimError::InvalidState {
            at,
            reason: format!("amplitudes have norm {norm}, expected 1"),
        });
    }
    Ok(())
}

/// What the kernel does with cosets whose control wires do not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inactive {
    /// Leave them untouched: a controlled unitary.
    Keep,
    /// Zero them: the operator is projected onto the control subspace,
    /// which is what a controlled gate's generator looks like.
    Zero,
}

/// Dense register of `2^num_wires` amplitudes. Wire 0 is the most
/// significant bit of a basis label.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StateVector {
    num_wires: usize,
    #[serde(rename = "amplitudes")]
    amplitudes: Vec<Complex64>,
}

impl StateVector {
    /// |0…0⟩ on `num_wires` wires.
    pub fn new(num_wires: usize) -> Self {
        let mut amplitudes = vec![ZERO; 1 << num_wires];
        amplitudes[0] = ONE;
        Self {
            num_wires,
            amplitudes,
        }
    }

    /// |label⟩; `label` must be below `2^num_wires`.
    pub fn basis_state(num_wires: usize, label: usize) -> SimResult<Self> {
        let size = 1usize << num_wires;
        if label >= size {
            return Err(SimError::InvalidState {
                at: Location::StatePreparation,
                reason: format!("basis label {label} needs more than {num_wires} wires"),
            });
        }
        let mut amplitudes = vec![ZERO; size];
        amplitudes[label] = ONE;
        Ok(Self {
            num_wires,
            amplitudes,
        })
    }

    /// Wraps an amplitude vector whose length is a power of two and whose
    /// norm is 1 within `NORM_TOLERANCE`.
    pub fn from_amplitudes(amplitudes: Vec<Complex64>) -> SimResult<Self> {
        let at = Location::StatePreparation;
        if !amplitudes.len().is_power_of_two() {
            return Err(SimError::InvalidState {
                at,
                reason: format!("length {} is not a power of two", amplitudes.len()),
            });
        }
        check_amplitude_norm(&amplitudes, at)?;
        Ok(Self {
            num_wires: amplitudes.len().trailing_zeros() as usize,
            amplitudes,
        })
    }

    pub fn num_wires(&self) -> usize {
        self.num_wires
    }

    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    pub fn amplitudes(&self) -> &[Complex64] {
        &self.amplitudes
    }

    pub fn into_amplitudes(self) -> Vec<Complex64> {
        self.amplitudes
    }

    pub(crate) fn amplitudes_mut(&mut self) -> &mut [Complex64] {
        &mut self.amplitudes
    }

    /// Copies `other`'s amplitudes into this buffer without reallocating.
    pub(crate) fn copy_from(&mut self, other: &StateVector) {
        self.amplitudes.copy_from_slice(&other.amplitudes);
    }

    /// Bit position of `wire` inside a basis label.
    fn bit(&self, wire: usize) -> usize {
        self.num_wires - 1 - wire
    }

    pub fn reset(&mut self) {
        self.amplitudes.par_iter_mut().for_each(|a| *a = ZERO);
        self.amplitudes[0] = ONE;
    }

    /// ⟨self|other⟩.
    pub fn inner(&self, other: &StateVector) -> Complex64 {
        self.amplitudes
            .par_iter()
            .zip(other.amplitudes.par_iter())
            .map(|(a, b)| a.conj() * b)
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.amplitudes
            .par_iter()
            .map(|a| a.norm_sqr())
            .sum::<f64>()
            .sqrt()
    }

    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            self.amplitudes.par_iter_mut().for_each(|a| *a /= norm);
        }
    }

    /// |⟨self|other⟩|².
    pub fn fidelity(&self, other: &StateVector) -> f64 {
        self.inner(other).norm_sqr()
    }

    pub fn probability(&self, label: usize) -> f64 {
        self.amplitudes.get(label).map_or(0.0, |a| a.norm_sqr())
    }

    /// Reports (never corrects) a norm that drifted from 1.
    pub fn check_norm(&self, tolerance: f64, at: Location) -> SimResult<()> {
        let norm = self.norm();
        if (norm - 1.0).abs() > tolerance {
            return Err(SimError::NumericalInstability {
                at,
                norm,
                tolerance,
            });
        }
        Ok(())
    }

    /// Sets the register to the basis state with `bits[j]` on `wires[j]`
    /// and |0⟩ elsewhere.
    pub fn set_basis_state(&mut self, bits: &[u8], wires: &[usize]) -> SimResult<()> {
        let at = Location::StatePreparation;
        check_wires(at, wires, self.num_wires)?;
        if bits.len() != wires.len() {
            return Err(SimError::DimensionMismatch {
                at,
                what: "basis bit list",
                expected: wires.len(),
                found: bits.len(),
            });
        }
        let mut label = 0;
        for (&b, &w) in bits.iter().zip(wires) {
            match b {
                0 => {}
                1 => label |= 1 << self.bit(w),
                _ => {
                    return Err(SimError::InvalidState {
                        at,
                        reason: format!("basis bit {b} on wire {w} is not 0 or 1"),
                    });
                }
            }
        }
        self.amplitudes.par_iter_mut().for_each(|a| *a = ZERO);
        self.amplitudes[label] = ONE;
        Ok(())
    }

    /// Loads `amplitudes` over `wires` (first wire = most significant local
    /// bit); every other wire is left in |0⟩.
    pub fn set_state(&mut self, amplitudes: &[Complex64], wires: &[usize]) -> SimResult<()> {
        let at = Location::StatePreparation;
        check_wires(at, wires, self.num_wires)?;
        let dim = 1usize << wires.len();
        if amplitudes.len() != dim {
            return Err(SimError::DimensionMismatch {
                at,
                what: "amplitude vector",
                expected: dim,
                found: amplitudes.len(),
            });
        }
        check_amplitude_norm(amplitudes, at)?;
        let offsets = self.local_offsets(wires);
        self.amplitudes.par_iter_mut().for_each(|a| *a = ZERO);
        for (&offset, &amp) in offsets.iter().zip(amplitudes) {
            self.amplitudes[offset] = amp;
        }
        Ok(())
    }

    pub fn prepare(&mut self, prep: &StatePrep) -> SimResult<()> {
        match prep {
            StatePrep::Basis { bits, wires } => self.set_basis_state(bits, wires),
            StatePrep::Amplitudes { amplitudes, wires } => self.set_state(amplitudes, wires),
        }
    }

    /// Applies `gate` (or its adjoint) in place.
    pub fn apply_gate(&mut self, gate: &Gate, adjoint: bool) -> SimResult<()> {
        gate.validate(0, self.num_wires).map_err(|e| relocate(e, Location::Operation))?;
        self.apply_gate_unchecked(gate, adjoint);
        Ok(())
    }

    /// Applies an arbitrary `2^k × 2^k` matrix to `wires`. Unitarity is the
    /// caller's business.
    pub fn apply_matrix(&mut self, matrix: &Matrix, wires: &[usize], adjoint: bool) -> SimResult<()> {
        let at = Location::Matrix;
        if wires.is_empty() {
            return Err(SimError::DimensionMismatch {
                at,
                what: "wire list",
                expected: 1,
                found: 0,
            });
        }
        check_wires(at, wires, self.num_wires)?;
        let dim = 1usize << wires.len();
        if matrix.dim() != (dim, dim) {
            return Err(SimError::DimensionMismatch {
                at,
                what: "matrix",
                expected: dim,
                found: matrix.nrows().max(matrix.ncols()),
            });
        }
        self.apply_kernel(matrix, wires, &[], &[], adjoint, Inactive::Keep);
        Ok(())
    }

    /// Gate application for callers that already validated `gate` against
    /// this register.
    pub(crate) fn apply_gate_unchecked(&mut self, gate: &Gate, adjoint: bool) {
        let (controls, values) = gate.control_pairs();
        let adjoint = adjoint && !gate.kind.is_self_adjoint();
        self.apply_kernel(
            &gate.matrix(),
            gate.targets(),
            &controls,
            &values,
            adjoint,
            Inactive::Keep,
        );
    }

    /// Replaces the state with `G|ψ⟩` where `G` is the gate's generator
    /// restricted to its control subspace. Returns `false` when the gate has
    /// no generator.
    pub(crate) fn apply_generator(&mut self, gate: &Gate) -> bool {
        let Some(generator) = gate.generator() else {
            return false;
        };
        let (controls, values) = gate.control_pairs();
        self.apply_kernel(
            &generator,
            gate.targets(),
            &controls,
            &values,
            false,
            Inactive::Zero,
        );
        true
    }

    /// Multiplies every coset of `targets` by `matrix` (or its adjoint).
    ///
    /// Local label `l` of the matrix maps `targets[0]` to its most
    /// significant bit. Only cosets whose `controls` hold `values` are
    /// multiplied; the rest follow `inactive`.
    pub(crate) fn apply_kernel(
        &mut self,
        matrix: &Matrix,
        targets: &[usize],
        controls: &[usize],
        values: &[bool],
        adjoint: bool,
        inactive: Inactive,
    ) {
        let k = targets.len();
        let dim = 1usize << k;
        let offsets = self.local_offsets(targets);

        let mut positions: Vec<usize> = targets.iter().map(|&w| self.bit(w)).collect();
        positions.sort_unstable();
        let top = positions.last().copied().unwrap_or(0);

        let (control_mask, control_value) =
            controls
                .iter()
                .zip(values)
                .fold((0usize, 0usize), |(mask, value), (&w, &on)| {
                    let b = 1 << self.bit(w);
                    (mask | b, if on { value | b } else { value })
                });

        let block = (1usize << (top + 1)).max(MIN_BLOCK).min(self.amplitudes.len());
        let cosets_per_block = block >> k;
        let entry = |r: usize, c: usize| {
            if adjoint {
                matrix[[c, r]].conj()
            } else {
                matrix[[r, c]]
            }
        };

        self.amplitudes
            .par_chunks_mut(block)
            .enumerate()
            .for_each(|(b, chunk)| {
                let origin = b * block;
                let mut gathered = vec![ZERO; dim];
                for coset in 0..cosets_per_block {
                    let base = insert_zero_bits(coset, &positions);
                    if (origin | base) & control_mask != control_value {
                        if inactive == Inactive::Zero {
                            for &o in &offsets {
                                chunk[base + o] = ZERO;
                            }
                        }
                        continue;
                    }
                    for (g, &o) in gathered.iter_mut().zip(&offsets) {
                        *g = chunk[base + o];
                    }
                    for (r, &o) in offsets.iter().enumerate() {
                        chunk[base + o] = gathered
                            .iter()
                            .enumerate()
                            .fold(ZERO, |acc, (c, &amp)| acc + entry(r, c) * amp);
                    }
                }
            });
    }

    /// Basis-label offset of every local label over `wires`.
    fn local_offsets(&self, wires: &[usize]) -> Vec<usize> {
        let k = wires.len();
        (0..1usize << k)
            .map(|l| {
                wires.iter().enumerate().fold(0, |acc, (j, &w)| {
                    if (l >> (k - 1 - j)) & 1 == 1 {
                        acc | 1 << self.bit(w)
                    } else {
                        acc
                    }
                })
            })
            .collect()
    }
}

/// Spreads the bits of `value` around zeros inserted at `positions`
/// (ascending), producing the coset base label.
fn insert_zero_bits(mut value: usize, positions: &[usize]) -> usize {
    for &p in positions {
        let low = value & ((1 << p) - 1);
        value = ((value >> p) << (p + 1)) | low;
    }
    value
}

fn relocate(err: SimError, at: Location) -> SimError {
    match err {
        SimError::InvalidWire { wire, fault, .. } => SimError::InvalidWire { at, wire, fault },
        SimError::DimensionMismatch {
            what,
            expected,
            found,
            ..
        } => SimError::DimensionMismatch {
            at,
            what,
            expected,
            found,
        },
        SimError::InvalidParameter { reason, .. } => SimError::InvalidParameter { at, reason },
        other => other,
    }
}
