//! Pauli-sum Hamiltonians written as text, e.g. `0.5 * X0 Z1 - 0.2 * Y2`,
//! and their conversion into `qsim` observables.

use qsim::{NamedObservable, Observable};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pauli {
    I,
    X,
    Y,
    Z,
}

impl Pauli {
    fn named(self) -> NamedObservable {
        match self {
            Pauli::I => NamedObservable::Identity,
            Pauli::X => NamedObservable::PauliX,
            Pauli::Y => NamedObservable::PauliY,
            Pauli::Z => NamedObservable::PauliZ,
        }
    }
}

impl fmt::Display for Pauli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PauliParseError {
    #[error("empty Pauli term")]
    Empty,
    #[error("bad coefficient `{0}`")]
    Coefficient(String),
    #[error("bad Pauli operator `{0}` (expected e.g. X0, Z12)")]
    Operator(String),
    #[error("wire {0} appears twice in one term")]
    DuplicateWire(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PauliTerm {
    pub coefficient: f64,
    pub operators: Vec<(Pauli, usize)>, // Vec of (Pauli type, wire index)
}

impl PauliTerm {
    pub fn new() -> Self {
        PauliTerm {
            coefficient: 1.0,
            operators: Vec::new(),
        }
    }

    pub fn with_pauli(mut self, wire: usize, pauli: Pauli) -> Self {
        if pauli != Pauli::I {
            self.operators.push((pauli, wire));
            self.operators.sort_by_key(|&(_, w)| w);
        }
        self
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = coefficient;
        self
    }

    /// Highest wire referenced, if any.
    pub fn max_wire(&self) -> Option<usize> {
        self.operators.iter().map(|&(_, w)| w).max()
    }

    /// The Pauli word without its coefficient. A constant term becomes the
    /// identity on wire 0.
    pub fn word(&self) -> Observable {
        match self.operators.as_slice() {
            [] => Observable::named(NamedObservable::Identity, 0),
            [(p, w)] => Observable::named(p.named(), *w),
            ops => Observable::tensor(
                ops.iter()
                    .map(|&(p, w)| Observable::named(p.named(), w))
                    .collect(),
            ),
        }
    }

    /// `coefficient · word` as a one-term Hamiltonian.
    pub fn to_observable(&self) -> Observable {
        Observable::hamiltonian(vec![self.coefficient], vec![self.word()])
    }
}

impl Default for PauliTerm {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_operator(op: &str) -> Result<(Pauli, usize), PauliParseError> {
    let bad = || PauliParseError::Operator(op.to_string());
    let mut chars = op.chars();
    let pauli = match chars.next().ok_or_else(bad)? {
        'X' | 'x' => Pauli::X,
        'Y' | 'y' => Pauli::Y,
        'Z' | 'z' => Pauli::Z,
        'I' | 'i' => Pauli::I,
        _ => return Err(bad()),
    };
    let wire = chars.as_str().parse::<usize>().map_err(|_| bad())?;
    Ok((pauli, wire))
}

impl FromStr for PauliTerm {
    type Err = PauliParseError;

    /// Accepts `0.5 * X0 Z1`, `X0 Z1`, `-Y3` and bare constants like `1.5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PauliParseError::Empty);
        }
        let (coefficient, operator_str) = match s.split_once('*') {
            Some((c, ops)) => {
                let c: String = c.split_whitespace().collect();
                let value = c
                    .parse::<f64>()
                    .map_err(|_| PauliParseError::Coefficient(c.clone()))?;
                (value, ops.trim())
            }
            None => {
                let compact: String = s.split_whitespace().collect();
                if let Ok(value) = compact.parse::<f64>() {
                    return Ok(PauliTerm::new().with_coefficient(value));
                }
                match s.strip_prefix('-') {
                    Some(rest) => (-1.0, rest.trim()),
                    None => (1.0, s.strip_prefix('+').unwrap_or(s).trim()),
                }
            }
        };
        if operator_str.is_empty() {
            return Err(PauliParseError::Empty);
        }

        let mut term = PauliTerm::new().with_coefficient(coefficient);
        let mut seen = Vec::new();
        for op in operator_str.split_whitespace() {
            let (pauli, wire) = parse_operator(op)?;
            if seen.contains(&wire) {
                return Err(PauliParseError::DuplicateWire(wire));
            }
            seen.push(wire);
            term = term.with_pauli(wire, pauli);
        }

        Ok(term)
    }
}

impl fmt::Display for PauliTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.coefficient)?;
        if !self.operators.is_empty() {
            write!(f, " *")?;
            for (pauli, wire) in &self.operators {
                write!(f, " {}{}", pauli, wire)?;
            }
        }
        Ok(())
    }
}

// Hamiltonian represents a sum of Pauli terms, which can be used to describe quantum systems.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hamiltonian {
    pub terms: Vec<PauliTerm>,
}

impl Hamiltonian {
    pub fn new() -> Self {
        Hamiltonian { terms: Vec::new() }
    }

    pub fn add_term(&mut self, term: PauliTerm) {
        self.terms.push(term);
    }

    pub fn with_term(mut self, term: PauliTerm) -> Self {
        self.add_term(term);
        self
    }

    /// Smallest register that holds every referenced wire.
    pub fn num_wires(&self) -> usize {
        self.terms
            .iter()
            .filter_map(PauliTerm::max_wire)
            .max()
            .map_or(1, |w| w + 1)
    }

    pub fn to_observable(&self) -> Observable {
        Observable::hamiltonian(
            self.terms.iter().map(|t| t.coefficient).collect(),
            self.terms.iter().map(PauliTerm::word).collect(),
        )
    }
}

/// Splits a sum at `+`/`-` signs that follow a complete term. Signs at the
/// start, after `*` or inside an exponent stay with their number.
fn split_terms(s: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut prev = None;
    for c in s.chars() {
        let splits = matches!(c, '+' | '-')
            && matches!(prev, Some(p) if p != '*' && p != 'e' && p != 'E' && p != '+' && p != '-');
        if splits {
            terms.push(std::mem::take(&mut current));
            if c == '-' {
                current.push('-');
            }
        } else {
            current.push(c);
        }
        if !c.is_whitespace() {
            prev = Some(c);
        }
    }
    terms.push(current);
    terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && t != "-")
        .collect()
}

impl FromStr for Hamiltonian {
    type Err = PauliParseError;

    /// One term per `+`/`-` separated chunk; newlines also separate terms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hamiltonian = Hamiltonian::new();
        for line in s.lines() {
            for term in split_terms(line) {
                hamiltonian.add_term(term.parse()?);
            }
        }
        if hamiltonian.terms.is_empty() {
            return Err(PauliParseError::Empty);
        }
        Ok(hamiltonian)
    }
}

/// Display trait for the entire Hamiltonian.
impl fmt::Display for Hamiltonian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, "\n+ ")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}
