//! Gate library: every supported gate kind with its matrix, generator and
//! adjoint behaviour.
//!
//! Controlled kinds (CNOT, CRX, Toffoli, ...) are described by the matrix of
//! their *target* block plus a count of leading control wires. The state
//! vector kernel only touches the cosets where every control is set, so a
//! CNOT costs a 2x2 product per active coset rather than a 4x4 one.

use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, arr2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Location, SimError, SimResult};

/// Dense row-major complex matrix.
pub type Matrix = Array2<Complex64>;

pub const ZERO: Complex64 = Complex64::new(0.0, 0.0);
pub const ONE: Complex64 = Complex64::new(1.0, 0.0);
pub const I: Complex64 = Complex64::new(0.0, 1.0);

pub fn identity(dim: usize) -> Matrix {
    Array2::from_shape_fn((dim, dim), |(r, c)| if r == c { ONE } else { ZERO })
}

pub fn pauli_x() -> Matrix {
    arr2(&[[ZERO, ONE], [ONE, ZERO]])
}

pub fn pauli_y() -> Matrix {
    arr2(&[[ZERO, -I], [I, ZERO]])
}

pub fn pauli_z() -> Matrix {
    arr2(&[[ONE, ZERO], [ZERO, -ONE]])
}

pub fn hadamard() -> Matrix {
    let h = Complex64::new(FRAC_1_SQRT_2, 0.0);
    arr2(&[[h, h], [h, -h]])
}

/// Conjugate transpose.
pub fn dagger(m: &Matrix) -> Matrix {
    m.t().mapv(|c| c.conj())
}

/// Kronecker product `a ⊗ b`; the rows of `a` select the high bits.
pub fn kron(a: &Matrix, b: &Matrix) -> Matrix {
    let (ar, ac) = a.dim();
    let (br, bc) = b.dim();
    Array2::from_shape_fn((ar * br, ac * bc), |(r, c)| {
        a[[r / br, c / bc]] * b[[r % br, c % bc]]
    })
}

/// Diagonal matrix whose entry for local label `k` is `f(k)`.
fn diagonal(dim: usize, f: impl Fn(usize) -> Complex64) -> Matrix {
    Array2::from_shape_fn((dim, dim), |(r, c)| if r == c { f(r) } else { ZERO })
}

fn expi(phi: f64) -> Complex64 {
    Complex64::from_polar(1.0, phi)
}

/// 16x16 matrix that acts as `block` on the {|0011⟩, |1100⟩} pair and as
/// `outer` on every other basis state.
fn double_excitation_block(outer: Complex64, block: [[Complex64; 2]; 2]) -> Matrix {
    const PAIR: [usize; 2] = [0b0011, 0b1100];
    Array2::from_shape_fn((16, 16), |(r, c)| {
        match (PAIR.iter().position(|&k| k == r), PAIR.iter().position(|&k| k == c)) {
            (Some(i), Some(j)) => block[i][j],
            (None, None) if r == c => outer,
            _ => ZERO,
        }
    })
}

/// Closed set of gate kinds understood by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    Identity,
    PauliX,
    PauliY,
    PauliZ,
    Hadamard,
    S,
    T,
    SX,
    CNOT,
    CY,
    CZ,
    SWAP,
    ISWAP,
    CSWAP,
    Toffoli,
    PhaseShift,
    ControlledPhaseShift,
    RX,
    RY,
    RZ,
    Rot,
    CRX,
    CRY,
    CRZ,
    CRot,
    IsingXX,
    IsingYY,
    IsingZZ,
    IsingXY,
    SingleExcitation,
    SingleExcitationPlus,
    SingleExcitationMinus,
    DoubleExcitation,
    DoubleExcitationPlus,
    DoubleExcitationMinus,
    MultiRZ,
    QubitUnitary,
    DiagonalQubitUnitary,
}

/// Number of wires an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    /// One or more wires; the matrix size follows the wire list.
    Any,
}

/// One row of the gate table.
#[derive(Debug, Clone, Copy)]
pub struct GateSpec {
    pub name: &'static str,
    pub arity: Arity,
    /// Leading wires that act as controls (all must be |1⟩).
    pub controls: usize,
    pub params: usize,
    pub self_adjoint: bool,
}

const fn spec(
    name: &'static str,
    arity: Arity,
    controls: usize,
    params: usize,
    self_adjoint: bool,
) -> GateSpec {
    GateSpec {
        name,
        arity,
        controls,
        params,
        self_adjoint,
    }
}

impl GateKind {
    pub const ALL: [GateKind; 38] = [
        GateKind::Identity,
        GateKind::PauliX,
        GateKind::PauliY,
        GateKind::PauliZ,
        GateKind::Hadamard,
        GateKind::S,
        GateKind::T,
        GateKind::SX,
        GateKind::CNOT,
        GateKind::CY,
        GateKind::CZ,
        GateKind::SWAP,
        GateKind::ISWAP,
        GateKind::CSWAP,
        GateKind::Toffoli,
        GateKind::PhaseShift,
        GateKind::ControlledPhaseShift,
        GateKind::RX,
        GateKind::RY,
        GateKind::RZ,
        GateKind::Rot,
        GateKind::CRX,
        GateKind::CRY,
        GateKind::CRZ,
        GateKind::CRot,
        GateKind::IsingXX,
        GateKind::IsingYY,
        GateKind::IsingZZ,
        GateKind::IsingXY,
        GateKind::SingleExcitation,
        GateKind::SingleExcitationPlus,
        GateKind::SingleExcitationMinus,
        GateKind::DoubleExcitation,
        GateKind::DoubleExcitationPlus,
        GateKind::DoubleExcitationMinus,
        GateKind::MultiRZ,
        GateKind::QubitUnitary,
        GateKind::DiagonalQubitUnitary,
    ];

    pub fn spec(self) -> GateSpec {
        use Arity::*;
        use GateKind::*;
        match self {
            Identity => spec("Identity", Fixed(1), 0, 0, true),
            PauliX => spec("PauliX", Fixed(1), 0, 0, true),
            PauliY => spec("PauliY", Fixed(1), 0, 0, true),
            PauliZ => spec("PauliZ", Fixed(1), 0, 0, true),
            Hadamard => spec("Hadamard", Fixed(1), 0, 0, true),
            S => spec("S", Fixed(1), 0, 0, false),
            T => spec("T", Fixed(1), 0, 0, false),
            SX => spec("SX", Fixed(1), 0, 0, false),
            CNOT => spec("CNOT", Fixed(2), 1, 0, true),
            CY => spec("CY", Fixed(2), 1, 0, true),
            CZ => spec("CZ", Fixed(2), 1, 0, true),
            SWAP => spec("SWAP", Fixed(2), 0, 0, true),
            ISWAP => spec("ISWAP", Fixed(2), 0, 0, false),
            CSWAP => spec("CSWAP", Fixed(3), 1, 0, true),
            Toffoli => spec("Toffoli", Fixed(3), 2, 0, true),
            PhaseShift => spec("PhaseShift", Fixed(1), 0, 1, false),
            ControlledPhaseShift => spec("ControlledPhaseShift", Fixed(2), 1, 1, false),
            RX => spec("RX", Fixed(1), 0, 1, false),
            RY => spec("RY", Fixed(1), 0, 1, false),
            RZ => spec("RZ", Fixed(1), 0, 1, false),
            Rot => spec("Rot", Fixed(1), 0, 3, false),
            CRX => spec("CRX", Fixed(2), 1, 1, false),
            CRY => spec("CRY", Fixed(2), 1, 1, false),
            CRZ => spec("CRZ", Fixed(2), 1, 1, false),
            CRot => spec("CRot", Fixed(2), 1, 3, false),
            IsingXX => spec("IsingXX", Fixed(2), 0, 1, false),
            IsingYY => spec("IsingYY", Fixed(2), 0, 1, false),
            IsingZZ => spec("IsingZZ", Fixed(2), 0, 1, false),
            IsingXY => spec("IsingXY", Fixed(2), 0, 1, false),
            SingleExcitation => spec("SingleExcitation", Fixed(2), 0, 1, false),
            SingleExcitationPlus => spec("SingleExcitationPlus", Fixed(2), 0, 1, false),
            SingleExcitationMinus => spec("SingleExcitationMinus", Fixed(2), 0, 1, false),
            DoubleExcitation => spec("DoubleExcitation", Fixed(4), 0, 1, false),
            DoubleExcitationPlus => spec("DoubleExcitationPlus", Fixed(4), 0, 1, false),
            DoubleExcitationMinus => spec("DoubleExcitationMinus", Fixed(4), 0, 1, false),
            MultiRZ => spec("MultiRZ", Any, 0, 1, false),
            QubitUnitary => spec("QubitUnitary", Any, 0, 0, false),
            DiagonalQubitUnitary => spec("DiagonalQubitUnitary", Any, 0, 0, false),
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn num_params(self) -> usize {
        self.spec().params
    }

    pub fn num_controls(self) -> usize {
        self.spec().controls
    }

    pub fn is_self_adjoint(self) -> bool {
        self.spec().self_adjoint
    }

    /// Kinds whose matrix is supplied by the caller rather than the table.
    pub fn takes_matrix(self) -> bool {
        matches!(self, GateKind::QubitUnitary | GateKind::DiagonalQubitUnitary)
    }

    /// Looks a gate up by its canonical name or a common alias.
    pub fn from_name(name: &str) -> Option<GateKind> {
        let alias = match name {
            "I" => Some(GateKind::Identity),
            "X" => Some(GateKind::PauliX),
            "Y" => Some(GateKind::PauliY),
            "Z" => Some(GateKind::PauliZ),
            "H" => Some(GateKind::Hadamard),
            "CX" => Some(GateKind::CNOT),
            "CCX" => Some(GateKind::Toffoli),
            "CPhase" => Some(GateKind::ControlledPhaseShift),
            "U1" => Some(GateKind::PhaseShift),
            _ => None,
        };
        alias.or_else(|| GateKind::ALL.into_iter().find(|k| k.name() == name))
    }

    /// Unitary acting on the target block (controls excluded). `targets` is
    /// only consulted by `MultiRZ`; kinds that take a caller matrix get the
    /// identity here.
    ///
    /// Parameters are read positionally; missing ones are treated as zero so
    /// that `matrix(&[], ..)` evaluates a rotation at the identity.
    pub fn target_matrix(self, params: &[f64], targets: usize) -> Matrix {
        use GateKind::*;
        let p = |i: usize| params.get(i).copied().unwrap_or(0.0);
        let (c, s) = ((p(0) / 2.0).cos(), (p(0) / 2.0).sin());
        match self {
            Identity => identity(2),
            PauliX | CNOT => pauli_x(),
            PauliY | CY => pauli_y(),
            PauliZ | CZ => pauli_z(),
            Hadamard => hadamard(),
            S => arr2(&[[ONE, ZERO], [ZERO, I]]),
            T => arr2(&[[ONE, ZERO], [ZERO, expi(FRAC_PI_4)]]),
            SX => {
                let a = Complex64::new(0.5, 0.5);
                let b = Complex64::new(0.5, -0.5);
                arr2(&[[a, b], [b, a]])
            }
            SWAP | CSWAP => arr2(&[
                [ONE, ZERO, ZERO, ZERO],
                [ZERO, ZERO, ONE, ZERO],
                [ZERO, ONE, ZERO, ZERO],
                [ZERO, ZERO, ZERO, ONE],
            ]),
            ISWAP => arr2(&[
                [ONE, ZERO, ZERO, ZERO],
                [ZERO, ZERO, I, ZERO],
                [ZERO, I, ZERO, ZERO],
                [ZERO, ZERO, ZERO, ONE],
            ]),
            Toffoli => pauli_x(),
            PhaseShift | ControlledPhaseShift => arr2(&[[ONE, ZERO], [ZERO, expi(p(0))]]),
            RX | CRX => {
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(0.0, -s));
                arr2(&[[c, s], [s, c]])
            }
            RY | CRY => {
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(s, 0.0));
                arr2(&[[c, -s], [s, c]])
            }
            RZ | CRZ => arr2(&[[expi(-p(0) / 2.0), ZERO], [ZERO, expi(p(0) / 2.0)]]),
            Rot | CRot => {
                let (phi, theta, omega) = (p(0), p(1), p(2));
                let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
                arr2(&[
                    [expi(-(phi + omega) / 2.0) * c, -expi((phi - omega) / 2.0) * s],
                    [expi(-(phi - omega) / 2.0) * s, expi((phi + omega) / 2.0) * c],
                ])
            }
            IsingXX => {
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(0.0, -s));
                arr2(&[
                    [c, ZERO, ZERO, s],
                    [ZERO, c, s, ZERO],
                    [ZERO, s, c, ZERO],
                    [s, ZERO, ZERO, c],
                ])
            }
            IsingYY => {
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(0.0, s));
                arr2(&[
                    [c, ZERO, ZERO, s],
                    [ZERO, c, -s, ZERO],
                    [ZERO, -s, c, ZERO],
                    [s, ZERO, ZERO, c],
                ])
            }
            IsingZZ => {
                let (m, q) = (expi(-p(0) / 2.0), expi(p(0) / 2.0));
                diagonal(4, |k| if k == 0 || k == 3 { m } else { q })
            }
            IsingXY => {
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(0.0, s));
                arr2(&[
                    [ONE, ZERO, ZERO, ZERO],
                    [ZERO, c, s, ZERO],
                    [ZERO, s, c, ZERO],
                    [ZERO, ZERO, ZERO, ONE],
                ])
            }
            SingleExcitation | SingleExcitationPlus | SingleExcitationMinus => {
                let outer = match self {
                    SingleExcitationPlus => expi(p(0) / 2.0),
                    SingleExcitationMinus => expi(-p(0) / 2.0),
                    _ => ONE,
                };
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(s, 0.0));
                arr2(&[
                    [outer, ZERO, ZERO, ZERO],
                    [ZERO, c, -s, ZERO],
                    [ZERO, s, c, ZERO],
                    [ZERO, ZERO, ZERO, outer],
                ])
            }
            DoubleExcitation | DoubleExcitationPlus | DoubleExcitationMinus => {
                let outer = match self {
                    DoubleExcitationPlus => expi(p(0) / 2.0),
                    DoubleExcitationMinus => expi(-p(0) / 2.0),
                    _ => ONE,
                };
                let (c, s) = (Complex64::new(c, 0.0), Complex64::new(s, 0.0));
                double_excitation_block(outer, [[c, -s], [s, c]])
            }
            MultiRZ => {
                let (m, q) = (expi(-p(0) / 2.0), expi(p(0) / 2.0));
                diagonal(1 << targets, |k| if k.count_ones() % 2 == 0 { m } else { q })
            }
            QubitUnitary | DiagonalQubitUnitary => identity(1 << targets),
        }
    }

    /// Generator `G` of the target block with `U(θ) = exp(-iθ/2 · G)`,
    /// or `None` for fixed and multi-parameter gates.
    pub fn generator(self, targets: usize) -> Option<Matrix> {
        use GateKind::*;
        let generator = match self {
            RX | CRX => pauli_x(),
            RY | CRY => pauli_y(),
            RZ | CRZ => pauli_z(),
            PhaseShift | ControlledPhaseShift => arr2(&[[ZERO, ZERO], [ZERO, -2.0 * ONE]]),
            IsingXX => kron(&pauli_x(), &pauli_x()),
            IsingYY => kron(&pauli_y(), &pauli_y()),
            IsingZZ => kron(&pauli_z(), &pauli_z()),
            IsingXY => {
                let xx = kron(&pauli_x(), &pauli_x());
                let yy = kron(&pauli_y(), &pauli_y());
                (xx + yy).mapv(|c| -0.5 * c)
            }
            SingleExcitation | SingleExcitationPlus | SingleExcitationMinus => {
                let outer = match self {
                    SingleExcitationPlus => -ONE,
                    SingleExcitationMinus => ONE,
                    _ => ZERO,
                };
                arr2(&[
                    [outer, ZERO, ZERO, ZERO],
                    [ZERO, ZERO, -I, ZERO],
                    [ZERO, I, ZERO, ZERO],
                    [ZERO, ZERO, ZERO, outer],
                ])
            }
            DoubleExcitation | DoubleExcitationPlus | DoubleExcitationMinus => {
                let outer = match self {
                    DoubleExcitationPlus => -ONE,
                    DoubleExcitationMinus => ONE,
                    _ => ZERO,
                };
                double_excitation_block(outer, [[ZERO, -I], [I, ZERO]])
            }
            MultiRZ => diagonal(1 << targets, |k| {
                if k.count_ones() % 2 == 0 { ONE } else { -ONE }
            }),
            _ => return None,
        };
        Some(generator)
    }

    /// Single-parameter pieces of a multi-parameter gate, in application
    /// order. Each entry is `(kind, index into the original parameters)`.
    pub fn decomposition(self) -> Option<&'static [(GateKind, usize)]> {
        match self {
            GateKind::Rot => Some(&[(GateKind::RZ, 0), (GateKind::RY, 1), (GateKind::RZ, 2)]),
            GateKind::CRot => Some(&[(GateKind::CRZ, 0), (GateKind::CRY, 1), (GateKind::CRZ, 2)]),
            _ => None,
        }
    }

    /// Checks `wires` against the kind's arity.
    pub(crate) fn check_arity(self, at: Location, wires: &[usize]) -> SimResult<()> {
        let spec = self.spec();
        let ok = match spec.arity {
            Arity::Fixed(n) => wires.len() == n,
            Arity::Any => !wires.is_empty(),
        };
        if ok {
            return Ok(());
        }
        let expected = match spec.arity {
            Arity::Fixed(n) => n,
            Arity::Any => 1,
        };
        Err(SimError::DimensionMismatch {
            at,
            what: "wire list",
            expected,
            found: wires.len(),
        })
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GateKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GateKind::from_name(s).ok_or_else(|| SimError::UnsupportedOperation {
            at: Location::Matrix,
            name: s.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f64 = 1e-12;

    fn assert_matrix_eq(a: &Matrix, b: &Matrix) {
        assert_eq!(a.dim(), b.dim());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = EPSILON);
            assert_relative_eq!(x.im, y.im, epsilon = EPSILON);
        }
    }

    fn targets_of(kind: GateKind) -> usize {
        match kind.spec().arity {
            Arity::Fixed(n) => n - kind.num_controls(),
            Arity::Any => 3,
        }
    }

    /// exp(-iθ/2 · G) for Hermitian G with G² = c·I or diagonal G, via a
    /// truncated Taylor series; plenty for the small angles used here.
    fn expm_generator(g: &Matrix, theta: f64) -> Matrix {
        let a = g.mapv(|x| x * Complex64::new(0.0, -theta / 2.0));
        let mut term = identity(g.nrows());
        let mut sum = term.clone();
        for k in 1..40 {
            term = term.dot(&a).mapv(|x| x / k as f64);
            sum = sum + &term;
        }
        sum
    }

    #[test]
    fn every_matrix_is_unitary() {
        let params = [0.37, -1.2, 2.4];
        for kind in GateKind::ALL {
            let m = kind.target_matrix(&params, targets_of(kind));
            let product = dagger(&m).dot(&m);
            assert_matrix_eq(&product, &identity(m.nrows()));
        }
    }

    #[test]
    fn self_adjoint_flag_matches_matrix() {
        for kind in GateKind::ALL.into_iter().filter(|k| k.is_self_adjoint()) {
            let m = kind.target_matrix(&[], targets_of(kind));
            assert_matrix_eq(&dagger(&m), &m);
        }
    }

    #[test]
    fn generators_reproduce_the_gate() {
        for kind in GateKind::ALL {
            let n = targets_of(kind);
            let Some(g) = kind.generator(n) else { continue };
            assert_matrix_eq(&dagger(&g), &g);
            let theta = 0.813;
            assert_matrix_eq(&expm_generator(&g, theta), &kind.target_matrix(&[theta], n));
        }
    }

    #[test]
    fn rotations_at_zero_are_identity() {
        for kind in GateKind::ALL.into_iter().filter(|k| k.num_params() > 0) {
            let n = targets_of(kind);
            assert_matrix_eq(&kind.target_matrix(&[0.0, 0.0, 0.0], n), &identity(1 << n));
        }
    }

    #[test]
    fn rot_matches_its_decomposition() {
        let (phi, theta, omega) = (0.3, -0.9, 1.7);
        let rot = GateKind::Rot.target_matrix(&[phi, theta, omega], 1);
        let composed = GateKind::RZ
            .target_matrix(&[omega], 1)
            .dot(&GateKind::RY.target_matrix(&[theta], 1))
            .dot(&GateKind::RZ.target_matrix(&[phi], 1));
        assert_matrix_eq(&rot, &composed);
    }

    #[test]
    fn double_excitation_rotates_the_paired_states() {
        let theta: f64 = 0.6;
        let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
        let m = GateKind::DoubleExcitation.target_matrix(&[theta], 4);
        // |0011⟩ -> cos|0011⟩ + sin|1100⟩
        assert_relative_eq!(m[[0b0011, 0b0011]].re, c, epsilon = EPSILON);
        assert_relative_eq!(m[[0b1100, 0b0011]].re, s, epsilon = EPSILON);
        assert_relative_eq!(m[[0b0011, 0b1100]].re, -s, epsilon = EPSILON);
        assert_relative_eq!(m[[0b0101, 0b0101]].re, 1.0, epsilon = EPSILON);

        let plus = GateKind::DoubleExcitationPlus.target_matrix(&[theta], 4);
        let minus = GateKind::DoubleExcitationMinus.target_matrix(&[theta], 4);
        assert_relative_eq!(plus[[0, 0]].im, (theta / 2.0).sin(), epsilon = EPSILON);
        assert_relative_eq!(minus[[0, 0]].im, -(theta / 2.0).sin(), epsilon = EPSILON);
        assert_relative_eq!(plus[[0b1100, 0b1100]].re, c, epsilon = EPSILON);
    }

    #[test]
    fn names_and_aliases_resolve() {
        for kind in GateKind::ALL {
            assert_eq!(GateKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!("CX".parse::<GateKind>().unwrap(), GateKind::CNOT);
        assert!(matches!(
            "Frobnicate".parse::<GateKind>(),
            Err(SimError::UnsupportedOperation { .. })
        ));
    }
}
