use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hamiltonian::Hamiltonian;
use qsim::{Circuit, DeviceOptions, Observable, SimulatorApi, StatevectorSimulator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Dense state-vector simulator with adjoint gradients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The input OpenQASM file to simulate. If not provided, reads from stdin.
    #[arg(short, long, global = true)]
    input_file: Option<PathBuf>,

    /// The output file to write JSON results to. If not provided, writes to stdout.
    #[arg(short, long, global = true)]
    output_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Final amplitudes as [re, im] pairs.
    State,
    /// Basis-state probabilities, optionally marginalised onto some wires.
    Probs {
        #[arg(short, long, value_delimiter = ',')]
        wires: Option<Vec<usize>>,
    },
    /// Expectation values of Pauli sums such as "0.5 * Z0 Z1 - X2".
    Expval {
        #[arg(short = 'O', long = "observable", required = true)]
        observables: Vec<String>,
        /// Estimate from this many shots instead of exactly.
        #[arg(long)]
        shots: Option<usize>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Report variances alongside the expectation values.
        #[arg(long)]
        variance: bool,
    },
    /// Bitstring counts, wire 0 first.
    Sample {
        #[arg(short, long, default_value_t = 1000)]
        shots: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Adjoint Jacobian of the observables w.r.t. the circuit parameters.
    Jacobian {
        #[arg(short = 'O', long = "observable", required = true)]
        observables: Vec<String>,
        /// Trainable parameter indices; all parameters when omitted.
        #[arg(long, value_delimiter = ',')]
        trainable: Option<Vec<usize>>,
        /// Observables per backward sweep.
        #[arg(long)]
        batch_obs: Option<usize>,
        /// Return dyᵀ·J for this cotangent instead of the full table.
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        dy: Option<Vec<f64>>,
    },
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum Report {
    State {
        num_wires: usize,
        amplitudes: Vec<[f64; 2]>,
    },
    Probabilities {
        probabilities: Vec<f64>,
    },
    Expectations {
        observables: Vec<String>,
        expectations: Vec<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variances: Option<Vec<f64>>,
    },
    Counts {
        shots: usize,
        counts: BTreeMap<String, usize>,
    },
    Jacobian {
        trainable: Vec<usize>,
        jacobian: Vec<Vec<f64>>,
    },
    Vjp {
        trainable: Vec<usize>,
        vjp: Vec<f64>,
    },
}

fn parse_observables(specs: &[String]) -> Result<Vec<Observable>> {
    specs
        .iter()
        .map(|spec| {
            let h: Hamiltonian = spec
                .parse()
                .with_context(|| format!("Failed to parse observable `{spec}`"))?;
            Ok(h.to_observable())
        })
        .collect()
}

fn execute(command: Command, circuit: Circuit) -> Result<Report> {
    let n = circuit.num_wires;
    let report = match command {
        Command::State => {
            let mut sim = StatevectorSimulator::new(n);
            sim.run(&circuit)?;
            Report::State {
                num_wires: n,
                amplitudes: sim
                    .statevector()
                    .amplitudes()
                    .iter()
                    .map(|a| [a.re, a.im])
                    .collect(),
            }
        }
        Command::Probs { wires } => {
            let mut sim = StatevectorSimulator::new(n);
            sim.run(&circuit)?;
            Report::Probabilities {
                probabilities: sim.probabilities(wires.as_deref())?,
            }
        }
        Command::Expval {
            observables,
            shots,
            seed,
            variance,
        } => {
            let parsed = parse_observables(&observables)?;
            let options = DeviceOptions {
                shots,
                seed,
                ..Default::default()
            };
            let mut sim = StatevectorSimulator::with_options(n, options);
            sim.run(&circuit)?;
            let expectations = parsed
                .iter()
                .map(|obs| sim.expectation(obs))
                .collect::<Result<Vec<_>, _>>()?;
            let variances = if variance {
                Some(
                    parsed
                        .iter()
                        .map(|obs| sim.variance(obs))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            } else {
                None
            };
            Report::Expectations {
                observables,
                expectations,
                variances,
            }
        }
        Command::Sample { shots, seed } => {
            let options = DeviceOptions {
                seed,
                ..Default::default()
            };
            let mut sim = StatevectorSimulator::with_options(n, options);
            sim.run(&circuit)?;
            Report::Counts {
                shots,
                counts: sim.sample(shots)?,
            }
        }
        Command::Jacobian {
            observables,
            trainable,
            batch_obs,
            dy,
        } => {
            let parsed = parse_observables(&observables)?;
            let mut circuit = circuit;
            match trainable {
                Some(indices) => circuit.set_trainable(indices)?,
                None => circuit.train_all(),
            }
            let trainable: Vec<usize> = circuit.trainable().iter().copied().collect();
            let options = DeviceOptions {
                batch_obs,
                ..Default::default()
            };
            let sim = StatevectorSimulator::with_options(n, options);
            match dy {
                Some(dy) => Report::Vjp {
                    vjp: sim.vjp(&circuit, &parsed, &dy)?,
                    trainable,
                },
                None => {
                    let jac = sim.jacobian(&circuit, &parsed)?;
                    Report::Jacobian {
                        jacobian: jac.outer_iter().map(|row| row.to_vec()).collect(),
                        trainable,
                    }
                }
            }
        }
    };
    Ok(report)
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    let mut qasm_input = String::new();
    match path {
        Some(path) => {
            qasm_input = fs::read_to_string(path)
                .with_context(|| format!("Failed to read QASM file: {}", path.display()))?;
        }
        None => {
            io::stdin()
                .read_to_string(&mut qasm_input)
                .context("Failed to read QASM from stdin")?;
        }
    }
    if qasm_input.trim().is_empty() {
        bail!("No QASM input given");
    }
    Ok(qasm_input)
}

fn main() -> Result<()> {
    // Initialize tracing (for logging)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let qasm_input = read_input(cli.input_file.as_ref())?;
    let circuit = Circuit::from_qasm(&qasm_input)?;
    info!(
        wires = circuit.num_wires,
        gates = circuit.gates().len(),
        params = circuit.num_params(),
        "parsed circuit"
    );
    debug!(command = ?cli.command, "executing");

    let report = execute(cli.command, circuit)?;
    let json_output = serde_json::to_string_pretty(&report)?;

    if let Some(output_path) = cli.output_file {
        let file = File::create(&output_path)
            .with_context(|| format!("Failed to create {}", output_path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(json_output.as_bytes())?;
        writer.flush()?;
    } else {
        println!("{}", json_output);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BELL: &str = "OPENQASM 2.0;\ninclude \"qelib1.inc\";\nqreg q[2];\nh q[0];\ncx q[0], q[1];";

    fn run(args: &[&str], qasm: &str) -> serde_json::Value {
        let cli = Cli::try_parse_from(std::iter::once("qsim-cli").chain(args.iter().copied())).unwrap();
        let circuit = Circuit::from_qasm(qasm).unwrap();
        serde_json::to_value(execute(cli.command, circuit).unwrap()).unwrap()
    }

    #[test]
    fn state_reports_amplitude_pairs() {
        let out = run(&["state"], BELL);
        assert_eq!(out["num_wires"], 2);
        let first = out["amplitudes"][0][0].as_f64().unwrap();
        assert!((first - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn expval_parses_pauli_sums() {
        let out = run(&["expval", "-O", "Z0 Z1", "-O", "0.5 * X0 X1 - 1", "--variance"], BELL);
        let values: Vec<f64> = out["expectations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert!((values[0] - 1.0).abs() < 1e-12);
        assert!((values[1] + 0.5).abs() < 1e-12);
        assert!(out["variances"][0].as_f64().unwrap().abs() < 1e-12);
    }

    #[test]
    fn marginal_probabilities_follow_wire_order() {
        let out = run(&["probs", "--wires", "1"], "qreg q[2];\nx q[1];");
        assert_eq!(out["probabilities"], serde_json::json!([0.0, 1.0]));
    }

    #[test]
    fn sample_counts_sum_to_shots() {
        let out = run(&["sample", "--shots", "300", "--seed", "5"], BELL);
        let total: u64 = out["counts"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_u64().unwrap())
            .sum();
        assert_eq!(total, 300);
    }

    #[test]
    fn jacobian_and_vjp() {
        let qasm = "qreg q[1];\nrx(0.3) q[0];\nry(0.2) q[0];";
        let out = run(&["jacobian", "-O", "Z0", "--trainable", "0"], qasm);
        assert_eq!(out["trainable"], serde_json::json!([0]));
        assert_eq!(out["jacobian"].as_array().unwrap().len(), 1);

        let out = run(&["jacobian", "-O", "Z0", "-O", "X0", "--dy", "1,-1"], qasm);
        assert_eq!(out["vjp"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn io_flags_are_global() {
        let cli = Cli::try_parse_from([
            "qsim-cli",
            "probs",
            "--input-file",
            "bell.qasm",
            "--output-file",
            "out.json",
        ])
        .unwrap();
        assert_eq!(cli.input_file, Some(PathBuf::from("bell.qasm")));
        assert_eq!(cli.output_file, Some(PathBuf::from("out.json")));
        assert!(Cli::try_parse_from(["qsim-cli", "probs", "--output", "out.json"]).is_err());
    }

    #[test]
    fn bad_observables_are_reported() {
        let cli = Cli::try_parse_from(["qsim-cli", "expval", "-O", "0.5 * Q1"]).unwrap();
        let circuit = Circuit::from_qasm(BELL).unwrap();
        let err = execute(cli.command, circuit).unwrap_err();
        assert!(err.to_string().contains("Q1"), "{err}");
    }
}
