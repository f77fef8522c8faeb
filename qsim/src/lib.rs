pub mod adjoint;
pub mod api;
pub mod circuit;
pub mod error;
pub mod facade;
pub mod gates;
pub mod measurements;
pub mod observables;
pub mod parser;
pub mod state;
pub mod statevector_backend;

// Re-export key components for easier access from the binary or other libraries.
pub use adjoint::{AdjointJacobian, AdjointOptions, Jacobian, adjoint_jacobian};
pub use api::{DeviceOptions, SimulatorApi};
pub use circuit::{Circuit, Gate, StatePrep};
pub use error::{Location, SimError, SimResult};
pub use gates::GateKind;
pub use observables::{NamedObservable, Observable, SparseHamiltonian};
pub use parser::parse_qasm;
pub use state::StateVector;
pub use statevector_backend::StatevectorSimulator;
