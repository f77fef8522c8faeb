use std::collections::BTreeSet;
use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Location, SimError, SimResult, check_wires};
use crate::gates::{GateKind, Matrix, dagger};
use crate::state::check_amplitude_norm;

/// One operation of a circuit.
///
/// `wires` lists the kind's built-in controls first (e.g. `[control, target]`
/// for CNOT), then its targets. `controls`/`control_values` add extra control
/// wires on top of that, which is how multi-controlled gates are expressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub kind: GateKind,
    pub wires: Vec<usize>,
    #[serde(default)]
    pub params: Vec<f64>,
    #[serde(default)]
    pub controls: Vec<usize>,
    #[serde(default)]
    pub control_values: Vec<bool>,
    #[serde(default)]
    pub inverse: bool,
    /// Target-block matrix of a `QubitUnitary` or `DiagonalQubitUnitary`.
    #[serde(default)]
    pub matrix: Option<Matrix>,
}

impl Gate {
    pub fn new(kind: GateKind, wires: Vec<usize>, params: Vec<f64>) -> Self {
        Gate {
            kind,
            wires,
            params,
            controls: Vec::new(),
            control_values: Vec::new(),
            inverse: false,
            matrix: None,
        }
    }

    /// Looks `name` up in the gate library.
    pub fn named(name: &str, wires: Vec<usize>, params: Vec<f64>) -> SimResult<Self> {
        let kind = GateKind::from_name(name).ok_or_else(|| SimError::UnsupportedOperation {
            at: Location::Operation,
            name: name.to_string(),
        })?;
        Ok(Gate::new(kind, wires, params))
    }

    pub fn unitary(matrix: Matrix, wires: Vec<usize>) -> Self {
        Gate {
            matrix: Some(matrix),
            ..Gate::new(GateKind::QubitUnitary, wires, Vec::new())
        }
    }

    /// Diagonal unitary with `diagonal[k]` on local basis state `k`.
    pub fn diagonal_unitary(diagonal: &[Complex64], wires: Vec<usize>) -> Self {
        let dim = diagonal.len();
        let matrix = Matrix::from_shape_fn((dim, dim), |(r, c)| {
            if r == c { diagonal[r] } else { Complex64::new(0.0, 0.0) }
        });
        Gate {
            matrix: Some(matrix),
            ..Gate::new(GateKind::DiagonalQubitUnitary, wires, Vec::new())
        }
    }

    pub fn h(wire: usize) -> Self {
        Gate::new(GateKind::Hadamard, vec![wire], Vec::new())
    }

    pub fn x(wire: usize) -> Self {
        Gate::new(GateKind::PauliX, vec![wire], Vec::new())
    }

    pub fn cnot(control: usize, target: usize) -> Self {
        Gate::new(GateKind::CNOT, vec![control, target], Vec::new())
    }

    pub fn rx(wire: usize, theta: f64) -> Self {
        Gate::new(GateKind::RX, vec![wire], vec![theta])
    }

    pub fn ry(wire: usize, theta: f64) -> Self {
        Gate::new(GateKind::RY, vec![wire], vec![theta])
    }

    pub fn rz(wire: usize, theta: f64) -> Self {
        Gate::new(GateKind::RZ, vec![wire], vec![theta])
    }

    /// Adds extra control wires, each required to hold the paired value.
    pub fn controlled(mut self, wires: Vec<usize>, values: Vec<bool>) -> Self {
        self.controls.extend(wires);
        self.control_values.extend(values);
        self
    }

    /// Marks the gate to be applied as its adjoint.
    pub fn inverted(mut self) -> Self {
        self.inverse = !self.inverse;
        self
    }

    pub fn targets(&self) -> &[usize] {
        &self.wires[self.kind.num_controls().min(self.wires.len())..]
    }

    /// Every control wire with the value it must hold.
    pub fn control_pairs(&self) -> (Vec<usize>, Vec<bool>) {
        let builtin = &self.wires[..self.kind.num_controls().min(self.wires.len())];
        let wires = builtin.iter().chain(&self.controls).copied().collect();
        let values = std::iter::repeat_n(true, builtin.len())
            .chain(self.control_values.iter().copied())
            .collect();
        (wires, values)
    }

    /// Matrix of the target block, not yet accounting for `inverse`.
    pub fn base_matrix(&self) -> Matrix {
        match &self.matrix {
            Some(m) if self.kind.takes_matrix() => m.clone(),
            _ => self.kind.target_matrix(&self.params, self.targets().len()),
        }
    }

    /// Matrix of the target block including `inverse`.
    pub fn matrix(&self) -> Matrix {
        let m = self.base_matrix();
        if self.inverse && !self.kind.is_self_adjoint() {
            dagger(&m)
        } else {
            m
        }
    }

    /// Generator of the target block, negated for inverted gates so that
    /// the applied operation is always `exp(-iθ/2 · G)`.
    pub fn generator(&self) -> Option<Matrix> {
        let g = self.kind.generator(self.targets().len())?;
        Some(if self.inverse { g.mapv(|c| -c) } else { g })
    }

    pub fn is_differentiable(&self) -> bool {
        self.kind.num_params() == 1 && self.generator().is_some()
    }

    /// Single-parameter gates equivalent to this one, in application order,
    /// paired with the index of the parameter each one carries.
    pub fn expand(&self) -> Vec<(Gate, Option<usize>)> {
        let Some(parts) = self.kind.decomposition() else {
            let slot = (self.kind.num_params() == 1).then_some(0);
            return vec![(self.clone(), slot)];
        };
        let mut expanded: Vec<(Gate, Option<usize>)> = parts
            .iter()
            .map(|&(kind, slot)| {
                let gate = Gate {
                    kind,
                    wires: self.wires.clone(),
                    params: vec![self.params.get(slot).copied().unwrap_or(0.0)],
                    controls: self.controls.clone(),
                    control_values: self.control_values.clone(),
                    inverse: self.inverse,
                    matrix: None,
                };
                (gate, Some(slot))
            })
            .collect();
        if self.inverse {
            expanded.reverse();
        }
        expanded
    }

    /// Checks arity, parameter count, wire ranges and any caller-supplied
    /// matrix against an `num_wires` register.
    pub fn validate(&self, index: usize, num_wires: usize) -> SimResult<()> {
        let at = Location::Gate(index);
        self.kind.check_arity(at, &self.wires)?;
        if self.params.len() != self.kind.num_params() {
            return Err(SimError::DimensionMismatch {
                at,
                what: "parameter list",
                expected: self.kind.num_params(),
                found: self.params.len(),
            });
        }
        if let Some(bad) = self.params.iter().find(|p| !p.is_finite()) {
            return Err(SimError::InvalidParameter {
                at,
                reason: format!("parameter {bad} of {} is not finite", self.kind),
            });
        }
        if self.control_values.len() != self.controls.len() {
            return Err(SimError::DimensionMismatch {
                at,
                what: "control value list",
                expected: self.controls.len(),
                found: self.control_values.len(),
            });
        }
        let all: Vec<usize> = self.wires.iter().chain(&self.controls).copied().collect();
        check_wires(at, &all, num_wires)?;

        if !self.kind.takes_matrix() {
            return Ok(());
        }
        let dim = 1usize << self.targets().len();
        let found = self.matrix.as_ref().map_or(0, |m| m.nrows().max(m.ncols()));
        let Some(m) = self.matrix.as_ref().filter(|m| m.dim() == (dim, dim)) else {
            return Err(SimError::DimensionMismatch {
                at,
                what: "unitary matrix",
                expected: dim,
                found,
            });
        };
        let off_diagonal = m.indexed_iter().any(|((r, c), v)| r != c && v.norm() > 0.0);
        if self.kind == GateKind::DiagonalQubitUnitary && off_diagonal {
            return Err(SimError::InvalidParameter {
                at,
                reason: "DiagonalQubitUnitary matrix has off-diagonal entries".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.inverse {
            write!(f, "†")?;
        }
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| format!("{p:.6}")).collect();
            write!(f, "({})", params.join(", "))?;
        }
        write!(f, " {:?}", self.wires)?;
        if !self.controls.is_empty() {
            write!(f, " ctrl {:?}={:?}", self.controls, self.control_values)?;
        }
        Ok(())
    }
}

/// Initial state of a circuit other than |0…0⟩.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatePrep {
    /// Computational basis state; `bits[j]` is the value of `wires[j]`.
    Basis { bits: Vec<u8>, wires: Vec<usize> },
    /// Normalized amplitudes over `wires`; the remaining wires start in |0⟩.
    Amplitudes {
        amplitudes: Vec<Complex64>,
        wires: Vec<usize>,
    },
}

/// Ordered gate list on a fixed register, with the set of trainable
/// parameter indices. Parameters are numbered in gate order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub num_wires: usize,
    #[serde(default)]
    prep: Option<StatePrep>,
    #[serde(default)]
    gates: Vec<Gate>,
    #[serde(default)]
    trainable: BTreeSet<usize>,
}

impl Circuit {
    pub fn new(num_wires: usize) -> Self {
        Self {
            num_wires,
            prep: None,
            gates: Vec::new(),
            trainable: BTreeSet::new(),
        }
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn state_prep(&self) -> Option<&StatePrep> {
        self.prep.as_ref()
    }

    pub fn trainable(&self) -> &BTreeSet<usize> {
        &self.trainable
    }

    pub fn with_state_prep(mut self, prep: StatePrep) -> SimResult<Self> {
        validate_prep(&prep, self.num_wires)?;
        self.prep = Some(prep);
        Ok(self)
    }

    /// Validates and appends a gate.
    pub fn add_gate(&mut self, gate: Gate) -> SimResult<&mut Self> {
        gate.validate(self.gates.len(), self.num_wires)?;
        self.gates.push(gate);
        Ok(self)
    }

    /// Appends a gate by library name; unknown names fail here rather than
    /// during simulation.
    pub fn add(&mut self, name: &str, wires: &[usize], params: &[f64]) -> SimResult<&mut Self> {
        let gate = Gate::named(name, wires.to_vec(), params.to_vec()).map_err(|err| match err {
            SimError::UnsupportedOperation { name, .. } => SimError::UnsupportedOperation {
                at: Location::Gate(self.gates.len()),
                name,
            },
            other => other,
        })?;
        self.add_gate(gate)
    }

    pub fn num_params(&self) -> usize {
        self.gates.iter().map(|g| g.params.len()).sum()
    }

    /// All parameters, flattened in gate order.
    pub fn params(&self) -> Vec<f64> {
        self.gates.iter().flat_map(|g| g.params.iter().copied()).collect()
    }

    pub fn set_params(&mut self, params: &[f64]) -> SimResult<()> {
        if params.len() != self.num_params() {
            return Err(SimError::DimensionMismatch {
                at: Location::Parameter(0),
                what: "parameter vector",
                expected: self.num_params(),
                found: params.len(),
            });
        }
        let mut rest = params;
        for gate in &mut self.gates {
            let (head, tail) = rest.split_at(gate.params.len());
            gate.params.copy_from_slice(head);
            rest = tail;
        }
        Ok(())
    }

    /// `(gate index, slot within the gate)` for every global parameter index.
    pub fn param_owners(&self) -> Vec<(usize, usize)> {
        self.gates
            .iter()
            .enumerate()
            .flat_map(|(g, gate)| (0..gate.params.len()).map(move |slot| (g, slot)))
            .collect()
    }

    pub fn set_trainable<I: IntoIterator<Item = usize>>(&mut self, params: I) -> SimResult<()> {
        let total = self.num_params();
        let trainable: BTreeSet<usize> = params.into_iter().collect();
        if let Some(&bad) = trainable.iter().find(|&&p| p >= total) {
            return Err(SimError::InvalidParameter {
                at: Location::Parameter(bad),
                reason: format!("circuit only has {total} parameters"),
            });
        }
        self.trainable = trainable;
        Ok(())
    }

    pub fn train_all(&mut self) {
        self.trainable = (0..self.num_params()).collect();
    }

    /// Re-checks every invariant; used on circuits that did not go through
    /// the builder (e.g. deserialized ones).
    pub fn validate(&self) -> SimResult<()> {
        if let Some(prep) = &self.prep {
            validate_prep(prep, self.num_wires)?;
        }
        for (i, gate) in self.gates.iter().enumerate() {
            gate.validate(i, self.num_wires)?;
        }
        let total = self.num_params();
        match self.trainable.iter().find(|&&p| p >= total) {
            Some(&bad) => Err(SimError::InvalidParameter {
                at: Location::Parameter(bad),
                reason: format!("circuit only has {total} parameters"),
            }),
            None => Ok(()),
        }
    }
}

fn validate_prep(prep: &StatePrep, num_wires: usize) -> SimResult<()> {
    let at = Location::StatePreparation;
    match prep {
        StatePrep::Basis { bits, wires } => {
            check_wires(at, wires, num_wires)?;
            if bits.len() != wires.len() {
                return Err(SimError::DimensionMismatch {
                    at,
                    what: "basis bit list",
                    expected: wires.len(),
                    found: bits.len(),
                });
            }
            if bits.iter().any(|&b| b > 1) {
                return Err(SimError::InvalidState {
                    at,
                    reason: "basis state bits must be 0 or 1".to_string(),
                });
            }
        }
        StatePrep::Amplitudes { amplitudes, wires } => {
            check_wires(at, wires, num_wires)?;
            let expected = 1usize << wires.len();
            if amplitudes.len() != expected {
                return Err(SimError::DimensionMismatch {
                    at,
                    what: "amplitude vector",
                    expected,
                    found: amplitudes.len(),
                });
            }
            check_amplitude_norm(amplitudes, at)?;
        }
    }
    Ok(())
}
