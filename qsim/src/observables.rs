//! Hermitian observables: named single-wire operators, Hermitian matrices,
//! basis-state projectors, tensor products, weighted sums and CSR sparse
//! Hamiltonians.

use std::f64::consts::FRAC_PI_4;
use std::fmt;

use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::circuit::Gate;
use crate::error::{Location, SimError, SimResult, WireFault, check_wires};
use crate::gates::{GateKind, Matrix, ONE, ZERO, hadamard, identity, pauli_x, pauli_y, pauli_z};
use crate::state::{Inactive, StateVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedObservable {
    Identity,
    PauliX,
    PauliY,
    PauliZ,
    Hadamard,
}

impl NamedObservable {
    pub fn matrix(self) -> Matrix {
        match self {
            NamedObservable::Identity => identity(2),
            NamedObservable::PauliX => pauli_x(),
            NamedObservable::PauliY => pauli_y(),
            NamedObservable::PauliZ => pauli_z(),
            NamedObservable::Hadamard => hadamard(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NamedObservable::Identity => "Identity",
            NamedObservable::PauliX => "PauliX",
            NamedObservable::PauliY => "PauliY",
            NamedObservable::PauliZ => "PauliZ",
            NamedObservable::Hadamard => "Hadamard",
        }
    }

    /// Gates rotating this operator's eigenbasis onto the computational one.
    fn diagonalizing_gates(self, wire: usize) -> Vec<Gate> {
        match self {
            NamedObservable::Identity | NamedObservable::PauliZ => Vec::new(),
            NamedObservable::PauliX => vec![Gate::h(wire)],
            NamedObservable::PauliY => vec![
                Gate::new(GateKind::PauliZ, vec![wire], Vec::new()),
                Gate::new(GateKind::S, vec![wire], Vec::new()),
                Gate::h(wire),
            ],
            NamedObservable::Hadamard => vec![Gate::ry(wire, -FRAC_PI_4)],
        }
    }
}

/// Full-register Hamiltonian in compressed sparse row form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseHamiltonian {
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub data: Vec<Complex64>,
}

impl SparseHamiltonian {
    fn validate(&self, at: Location, num_wires: usize) -> SimResult<()> {
        let dim = 1usize << num_wires;
        if self.indptr.len() != dim + 1 {
            return Err(SimError::DimensionMismatch {
                at,
                what: "sparse row pointer",
                expected: dim + 1,
                found: self.indptr.len(),
            });
        }
        let nnz = self.indptr.last().copied().unwrap_or(0);
        if self.indices.len() != nnz || self.data.len() != nnz {
            return Err(SimError::DimensionMismatch {
                at,
                what: "sparse column/data arrays",
                expected: nnz,
                found: self.indices.len().min(self.data.len()),
            });
        }
        if self.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SimError::InvalidState {
                at,
                reason: "sparse row pointer is not monotone".to_string(),
            });
        }
        if let Some(&col) = self.indices.iter().find(|&&c| c >= dim) {
            return Err(SimError::DimensionMismatch {
                at,
                what: "sparse column index",
                expected: dim,
                found: col,
            });
        }
        Ok(())
    }

    fn apply(&self, state: &StateVector) -> StateVector {
        let input = state.amplitudes();
        let mut out = state.clone();
        out.amplitudes_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, amp)| {
                let (start, end) = (self.indptr[row], self.indptr[row + 1]);
                *amp = self.indices[start..end]
                    .iter()
                    .zip(&self.data[start..end])
                    .fold(ZERO, |acc, (&col, &v)| acc + v * input[col]);
            });
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observable {
    Named { kind: NamedObservable, wire: usize },
    Hermitian { matrix: Matrix, wires: Vec<usize> },
    /// |b⟩⟨b| with `basis[j]` the bit on `wires[j]`.
    Projector { basis: Vec<u8>, wires: Vec<usize> },
    Tensor(Vec<Observable>),
    Hamiltonian {
        coeffs: Vec<f64>,
        terms: Vec<Observable>,
    },
    Sparse(SparseHamiltonian),
}

impl Observable {
    pub fn named(kind: NamedObservable, wire: usize) -> Self {
        Observable::Named { kind, wire }
    }

    pub fn x(wire: usize) -> Self {
        Self::named(NamedObservable::PauliX, wire)
    }

    pub fn y(wire: usize) -> Self {
        Self::named(NamedObservable::PauliY, wire)
    }

    pub fn z(wire: usize) -> Self {
        Self::named(NamedObservable::PauliZ, wire)
    }

    pub fn hermitian(matrix: Matrix, wires: Vec<usize>) -> Self {
        Observable::Hermitian { matrix, wires }
    }

    pub fn projector(basis: Vec<u8>, wires: Vec<usize>) -> Self {
        Observable::Projector { basis, wires }
    }

    /// Tensor product; nested products are flattened.
    pub fn tensor(factors: Vec<Observable>) -> Self {
        let mut flat = Vec::with_capacity(factors.len());
        for factor in factors {
            match factor {
                Observable::Tensor(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Observable::Tensor(flat)
    }

    pub fn hamiltonian(coeffs: Vec<f64>, terms: Vec<Observable>) -> Self {
        Observable::Hamiltonian { coeffs, terms }
    }

    /// Wires the observable acts on, in factor order. A sparse Hamiltonian
    /// spans the whole register and reports no explicit wires.
    pub fn wires(&self) -> Vec<usize> {
        match self {
            Observable::Named { wire, .. } => vec![*wire],
            Observable::Hermitian { wires, .. } | Observable::Projector { wires, .. } => {
                wires.clone()
            }
            Observable::Tensor(factors) => factors.iter().flat_map(|f| f.wires()).collect(),
            Observable::Hamiltonian { terms, .. } => {
                let mut wires: Vec<usize> = terms.iter().flat_map(|t| t.wires()).collect();
                wires.sort_unstable();
                wires.dedup();
                wires
            }
            Observable::Sparse(_) => Vec::new(),
        }
    }

    /// Checks wire ranges and sizes against an `num_wires` register;
    /// `index` is the observable's position in the caller's list.
    pub fn validate(&self, num_wires: usize, index: usize) -> SimResult<()> {
        let at = Location::Observable(index);
        match self {
            Observable::Named { wire, .. } => check_wires(at, &[*wire], num_wires),
            Observable::Hermitian { matrix, wires } => {
                if wires.is_empty() {
                    return Err(SimError::DimensionMismatch {
                        at,
                        what: "wire list",
                        expected: 1,
                        found: 0,
                    });
                }
                check_wires(at, wires, num_wires)?;
                let dim = 1usize << wires.len();
                if matrix.dim() != (dim, dim) {
                    return Err(SimError::DimensionMismatch {
                        at,
                        what: "Hermitian matrix",
                        expected: dim,
                        found: matrix.nrows().max(matrix.ncols()),
                    });
                }
                Ok(())
            }
            Observable::Projector { basis, wires } => {
                if wires.is_empty() {
                    return Err(SimError::DimensionMismatch {
                        at,
                        what: "wire list",
                        expected: 1,
                        found: 0,
                    });
                }
                check_wires(at, wires, num_wires)?;
                if basis.len() != wires.len() {
                    return Err(SimError::DimensionMismatch {
                        at,
                        what: "projector basis state",
                        expected: wires.len(),
                        found: basis.len(),
                    });
                }
                if basis.iter().any(|&b| b > 1) {
                    return Err(SimError::InvalidState {
                        at,
                        reason: "projector bits must be 0 or 1".to_string(),
                    });
                }
                Ok(())
            }
            Observable::Tensor(factors) => {
                for factor in factors {
                    match factor {
                        Observable::Named { .. }
                        | Observable::Hermitian { .. }
                        | Observable::Projector { .. } => factor.validate(num_wires, index)?,
                        other => {
                            return Err(SimError::UnsupportedOperation {
                                at,
                                name: format!("tensor factor {}", other.kind_name()),
                            });
                        }
                    }
                }
                let wires = self.wires();
                for (i, w) in wires.iter().enumerate() {
                    if wires[..i].contains(w) {
                        return Err(SimError::InvalidWire {
                            at,
                            wire: *w,
                            fault: WireFault::Duplicate,
                        });
                    }
                }
                Ok(())
            }
            Observable::Hamiltonian { coeffs, terms } => {
                if coeffs.len() != terms.len() {
                    return Err(SimError::DimensionMismatch {
                        at,
                        what: "coefficient list",
                        expected: terms.len(),
                        found: coeffs.len(),
                    });
                }
                terms.iter().try_for_each(|t| t.validate(num_wires, index))
            }
            Observable::Sparse(sparse) => sparse.validate(at, num_wires),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Observable::Named { kind, .. } => kind.name(),
            Observable::Hermitian { .. } => "Hermitian",
            Observable::Projector { .. } => "Projector",
            Observable::Tensor(_) => "Tensor",
            Observable::Hamiltonian { .. } => "Hamiltonian",
            Observable::Sparse(_) => "SparseHamiltonian",
        }
    }

    /// Minimal `(wires, matrix)` factors whose ordered application gives
    /// `O|ψ⟩`. Identity factors are dropped. `None` for sums.
    pub fn expectation_operator(&self) -> Option<Vec<(Vec<usize>, Matrix)>> {
        match self {
            Observable::Named {
                kind: NamedObservable::Identity,
                ..
            } => Some(Vec::new()),
            Observable::Named { kind, wire } => Some(vec![(vec![*wire], kind.matrix())]),
            Observable::Hermitian { matrix, wires } => Some(vec![(wires.clone(), matrix.clone())]),
            Observable::Projector { basis, wires } => {
                let target = basis.iter().fold(0usize, |label, &b| label << 1 | b as usize);
                let dim = 1usize << wires.len();
                let matrix = Matrix::from_shape_fn((dim, dim), |(r, c)| {
                    if r == target && c == target { ONE } else { ZERO }
                });
                Some(vec![(wires.clone(), matrix)])
            }
            Observable::Tensor(factors) => {
                let mut ops = Vec::new();
                for factor in factors {
                    ops.extend(factor.expectation_operator()?);
                }
                Some(ops)
            }
            Observable::Hamiltonian { .. } | Observable::Sparse(_) => None,
        }
    }

    /// Bit mask of the PauliZ factors when the observable is a product of
    /// PauliZ/Identity operators, i.e. diagonal with ±1 entries.
    pub fn z_mask(&self, num_wires: usize) -> Option<usize> {
        match self {
            Observable::Named {
                kind: NamedObservable::Identity,
                ..
            } => Some(0),
            Observable::Named {
                kind: NamedObservable::PauliZ,
                wire,
            } => num_wires.checked_sub(wire + 1).map(|bit| 1 << bit),
            Observable::Tensor(factors) => factors
                .iter()
                .try_fold(0, |mask, f| Some(mask | f.z_mask(num_wires)?)),
            _ => None,
        }
    }

    /// Whether the operator is diagonal in the computational basis.
    pub fn is_diagonal(&self) -> bool {
        match self {
            Observable::Named { kind, .. } => {
                matches!(kind, NamedObservable::Identity | NamedObservable::PauliZ)
            }
            Observable::Hermitian { matrix, .. } => matrix
                .indexed_iter()
                .all(|((r, c), v)| r == c || *v == ZERO),
            Observable::Projector { .. } => true,
            Observable::Tensor(factors) => factors.iter().all(Observable::is_diagonal),
            Observable::Hamiltonian { terms, .. } => terms.iter().all(Observable::is_diagonal),
            Observable::Sparse(sparse) => sparse.indptr.windows(2).enumerate().all(|(row, w)| {
                sparse
                    .indices
                    .get(w[0]..w[1])
                    .is_some_and(|cols| cols.iter().all(|&col| col == row))
            }),
        }
    }

    /// `O|ψ⟩` as a new vector; `state` is only read.
    pub fn apply(&self, state: &StateVector) -> SimResult<StateVector> {
        self.validate(state.num_wires(), 0)?;
        Ok(self.apply_unchecked(state))
    }

    pub(crate) fn apply_unchecked(&self, state: &StateVector) -> StateVector {
        match self {
            Observable::Hamiltonian { coeffs, terms } => {
                let mut acc = state.clone();
                acc.amplitudes_mut().par_iter_mut().for_each(|a| *a = ZERO);
                for (c, term) in coeffs.iter().zip(terms) {
                    let applied = term.apply_unchecked(state);
                    acc.amplitudes_mut()
                        .par_iter_mut()
                        .zip(applied.amplitudes().par_iter())
                        .for_each(|(a, b)| *a += *b * *c);
                }
                acc
            }
            Observable::Sparse(sparse) => sparse.apply(state),
            _ => {
                let mut out = state.clone();
                for (wires, matrix) in self.expectation_operator().unwrap_or_default() {
                    out.apply_kernel(&matrix, &wires, &[], &[], false, Inactive::Keep);
                }
                out
            }
        }
    }

    /// Gates that rotate a Pauli word (or Hadamard factors) into the
    /// computational basis, plus the wires whose bits flip the eigenvalue
    /// sign afterwards.
    pub fn diagonalizing_gates(&self) -> Option<(Vec<Gate>, Vec<usize>)> {
        match self {
            Observable::Named {
                kind: NamedObservable::Identity,
                ..
            } => Some((Vec::new(), Vec::new())),
            Observable::Named { kind, wire } => Some((kind.diagonalizing_gates(*wire), vec![*wire])),
            Observable::Tensor(factors) => {
                let mut gates = Vec::new();
                let mut wires = Vec::new();
                for factor in factors {
                    let (g, w) = factor.diagonalizing_gates()?;
                    gates.extend(g);
                    wires.extend(w);
                }
                Some((gates, wires))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observable::Named { kind, wire } => write!(f, "{}({wire})", kind.name()),
            Observable::Hermitian { wires, .. } => write!(f, "Hermitian{wires:?}"),
            Observable::Projector { basis, wires } => {
                let bits: String = basis.iter().map(|b| b.to_string()).collect();
                write!(f, "Projector(|{bits}⟩, {wires:?})")
            }
            Observable::Tensor(factors) => {
                for (i, factor) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, " @ ")?;
                    }
                    write!(f, "{factor}")?;
                }
                Ok(())
            }
            Observable::Hamiltonian { coeffs, terms } => {
                for (i, (c, t)) in coeffs.iter().zip(terms).enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{c} * [{t}]")?;
                }
                Ok(())
            }
            Observable::Sparse(sparse) => {
                write!(f, "SparseHamiltonian(nnz={})", sparse.data.len())
            }
        }
    }
}
