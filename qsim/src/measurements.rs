//! Expectation values, variances, probabilities and sampling. Nothing here
//! mutates the caller's state; scratch copies are owned by the call.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::trace;

use crate::error::{Location, SimError, SimResult, check_wires};
use crate::observables::Observable;
use crate::state::StateVector;

/// ⟨ψ|O|ψ⟩.
pub fn expectation_value(state: &StateVector, observable: &Observable) -> SimResult<f64> {
    observable.validate(state.num_wires(), 0)?;
    Ok(expectation_unchecked(state, observable))
}

pub(crate) fn expectation_unchecked(state: &StateVector, observable: &Observable) -> f64 {
    if let Some(mask) = observable.z_mask(state.num_wires()) {
        return parity_sum(state, mask);
    }
    match observable {
        Observable::Hamiltonian { coeffs, terms } => coeffs
            .iter()
            .zip(terms)
            .map(|(c, term)| c * expectation_unchecked(state, term))
            .sum(),
        _ => {
            let applied = observable.apply_unchecked(state);
            state.inner(&applied).re
        }
    }
}

/// Σ |a_i|² · (-1)^popcount(i & mask): the closed form for Z words.
fn parity_sum(state: &StateVector, mask: usize) -> f64 {
    state
        .amplitudes()
        .par_iter()
        .enumerate()
        .map(|(i, a)| {
            let p = a.norm_sqr();
            if (i & mask).count_ones() % 2 == 0 { p } else { -p }
        })
        .sum()
}

/// ⟨O²⟩ − ⟨O⟩², evaluated as ‖Oψ‖² − Re⟨ψ|Oψ⟩².
pub fn variance(state: &StateVector, observable: &Observable) -> SimResult<f64> {
    observable.validate(state.num_wires(), 0)?;
    if let Some(mask) = observable.z_mask(state.num_wires()) {
        let mean = parity_sum(state, mask);
        return Ok(1.0 - mean * mean);
    }
    let applied = observable.apply_unchecked(state);
    let mean = state.inner(&applied).re;
    Ok(applied.norm().powi(2) - mean * mean)
}

pub fn probabilities(state: &StateVector) -> Vec<f64> {
    state.amplitudes().par_iter().map(|a| a.norm_sqr()).collect()
}

/// Distribution over `wires`, with `wires[0]` as the most significant bit
/// of the returned index.
pub fn marginal_probabilities(state: &StateVector, wires: &[usize]) -> SimResult<Vec<f64>> {
    let n = state.num_wires();
    check_wires(Location::Operation, wires, n)?;
    let k = wires.len();
    let dim = 1usize << k;
    let marginal = state
        .amplitudes()
        .par_iter()
        .enumerate()
        .fold(
            || vec![0.0; dim],
            |mut acc, (label, a)| {
                let local = wires.iter().enumerate().fold(0, |l, (j, &w)| {
                    l | ((label >> (n - 1 - w)) & 1) << (k - 1 - j)
                });
                acc[local] += a.norm_sqr();
                acc
            },
        )
        .reduce(
            || vec![0.0; dim],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        );
    Ok(marginal)
}

/// `count` basis labels drawn independently from `|a_i|²`, reproducible
/// from `seed`.
pub fn sample(state: &StateVector, count: usize, seed: u64) -> SimResult<Vec<usize>> {
    let dist =
        WeightedIndex::new(probabilities(state)).map_err(|e| SimError::Sampling(e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(seed);
    trace!(count, seed, "sampling basis labels");
    Ok((0..count).map(|_| dist.sample(&mut rng)).collect())
}

/// Bitstring histogram of sampled labels, wire 0 first.
pub fn counts(samples: &[usize], num_wires: usize) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for &label in samples {
        let bits = format!("{label:0num_wires$b}");
        *counts.entry(bits).or_insert(0) += 1;
    }
    counts
}

/// Finite-shot estimate of ⟨O⟩ for Pauli words, projectors and sums of
/// them.
pub fn estimate_expectation(
    state: &StateVector,
    observable: &Observable,
    shots: usize,
    seed: u64,
) -> SimResult<f64> {
    observable.validate(state.num_wires(), 0)?;
    if shots == 0 {
        return Err(SimError::InvalidParameter {
            at: Location::Operation,
            reason: "shot count must be positive".to_string(),
        });
    }
    estimate_unchecked(state, observable, shots, seed)
}

fn estimate_unchecked(
    state: &StateVector,
    observable: &Observable,
    shots: usize,
    seed: u64,
) -> SimResult<f64> {
    if let Observable::Hamiltonian { coeffs, terms } = observable {
        let mut total = 0.0;
        for (k, (c, term)) in coeffs.iter().zip(terms).enumerate() {
            total += c * estimate_unchecked(state, term, shots, seed.wrapping_add(k as u64))?;
        }
        return Ok(total);
    }
    if let Observable::Projector { basis, wires } = observable {
        let n = state.num_wires();
        let hits = sample(state, shots, seed)?
            .into_iter()
            .filter(|&label| {
                wires
                    .iter()
                    .zip(basis)
                    .all(|(&w, &b)| (label >> (n - 1 - w)) & 1 == b as usize)
            })
            .count();
        return Ok(hits as f64 / shots as f64);
    }
    let (gates, wires) =
        observable
            .diagonalizing_gates()
            .ok_or_else(|| SimError::UnsupportedOperation {
                at: Location::Observable(0),
                name: format!("shot-based estimate of {observable}"),
            })?;
    let n = state.num_wires();
    let mask = wires.iter().fold(0usize, |m, &w| m | 1 << (n - 1 - w));
    let mut rotated = state.clone();
    for gate in &gates {
        rotated.apply_gate_unchecked(gate, false);
    }
    let samples = sample(&rotated, shots, seed)?;
    let sum: i64 = samples
        .iter()
        .map(|&label| if (label & mask).count_ones() % 2 == 0 { 1 } else { -1 })
        .sum();
    Ok(sum as f64 / shots as f64)
}
