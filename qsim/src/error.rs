use std::fmt;

pub type SimResult<T> = Result<T, SimError>;

/// Where in a request a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Gate(usize),
    Observable(usize),
    Parameter(usize),
    StatePreparation,
    /// A standalone state-vector call outside any circuit.
    Operation,
    Matrix,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Gate(i) => write!(f, "gate #{i}"),
            Location::Observable(i) => write!(f, "observable #{i}"),
            Location::Parameter(i) => write!(f, "parameter #{i}"),
            Location::StatePreparation => write!(f, "state preparation"),
            Location::Operation => write!(f, "operation"),
            Location::Matrix => write!(f, "matrix"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFault {
    OutOfRange { num_wires: usize },
    Duplicate,
}

impl fmt::Display for WireFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFault::OutOfRange { num_wires } => {
                write!(f, "out of range for a {num_wires}-wire register")
            }
            WireFault::Duplicate => write!(f, "listed more than once"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("{at}: wire {wire} is {fault}")]
    InvalidWire {
        at: Location,
        wire: usize,
        fault: WireFault,
    },
    #[error("{at}: unsupported operation `{name}`")]
    UnsupportedOperation { at: Location, name: String },
    #[error("{at}: `{name}` has trainable parameters but no generator")]
    NonDifferentiableGate { at: Location, name: String },
    #[error("{at}: {what} has size {found}, expected {expected}")]
    DimensionMismatch {
        at: Location,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{at}: state norm drifted to {norm:.12} (tolerance {tolerance:e})")]
    NumericalInstability {
        at: Location,
        norm: f64,
        tolerance: f64,
    },
    #[error("{at}: invalid state: {reason}")]
    InvalidState { at: Location, reason: String },
    #[error("{at}: {reason}")]
    InvalidParameter { at: Location, reason: String },
    #[error("QASM parse error on line {line}: {message}")]
    Qasm { line: usize, message: String },
    #[error("sampling failed: {0}")]
    Sampling(String),
}

impl SimError {
    pub(crate) fn wire(at: Location, wire: usize, fault: WireFault) -> Self {
        SimError::InvalidWire { at, wire, fault }
    }
}

/// Checks that `wires` are distinct and addressable in an `num_wires` register.
pub(crate) fn check_wires(at: Location, wires: &[usize], num_wires: usize) -> SimResult<()> {
    for (i, &w) in wires.iter().enumerate() {
        if w >= num_wires {
            return Err(SimError::wire(at, w, WireFault::OutOfRange { num_wires }));
        }
        if wires[..i].contains(&w) {
            return Err(SimError::wire(at, w, WireFault::Duplicate));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_location() {
        let err = SimError::wire(Location::Gate(7), 4, WireFault::OutOfRange { num_wires: 3 });
        assert_eq!(
            err.to_string(),
            "gate #7: wire 4 is out of range for a 3-wire register"
        );
    }

    #[test]
    fn duplicate_wires_are_rejected() {
        let err = check_wires(Location::Observable(1), &[0, 2, 0], 3).unwrap_err();
        assert_eq!(
            err,
            SimError::wire(Location::Observable(1), 0, WireFault::Duplicate)
        );
        assert!(check_wires(Location::Matrix, &[2, 0, 1], 3).is_ok());
    }
}
