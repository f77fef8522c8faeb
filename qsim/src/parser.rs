//! OpenQASM 2.0 subset: register declarations, the standard-library gates
//! that map onto `GateKind`, and parameters written as arithmetic over
//! numbers and `pi`. Statements may share a line but not span lines.

use std::f64::consts::PI;

use chumsky::prelude::*;

use crate::circuit::{Circuit, Gate};
use crate::error::{SimError, SimResult};
use crate::gates::GateKind;

/// QASM name -> (kind, applied as adjoint).
fn lookup(name: &str) -> Option<(GateKind, bool)> {
    use GateKind::*;
    let entry = match name {
        "id" => (Identity, false),
        "x" => (PauliX, false),
        "y" => (PauliY, false),
        "z" => (PauliZ, false),
        "h" => (Hadamard, false),
        "s" => (S, false),
        "sdg" => (S, true),
        "t" => (T, false),
        "tdg" => (T, true),
        "sx" => (SX, false),
        "cx" => (CNOT, false),
        "cy" => (CY, false),
        "cz" => (CZ, false),
        "swap" => (SWAP, false),
        "ccx" => (Toffoli, false),
        "cswap" => (CSWAP, false),
        "rx" => (RX, false),
        "ry" => (RY, false),
        "rz" => (RZ, false),
        "p" | "u1" => (PhaseShift, false),
        "crx" => (CRX, false),
        "cry" => (CRY, false),
        "crz" => (CRZ, false),
        "cp" | "cu1" => (ControlledPhaseShift, false),
        "rxx" => (IsingXX, false),
        "ryy" => (IsingYY, false),
        "rzz" => (IsingZZ, false),
        _ => return None,
    };
    Some(entry)
}

struct Register {
    name: String,
    offset: usize,
    size: usize,
}

/// One argument: a single wire or a whole register.
enum Operand {
    Wire(usize),
    Register(usize, usize),
}

fn qasm_error(line: usize, message: impl Into<String>) -> SimError {
    SimError::Qasm {
        line,
        message: message.into(),
    }
}

/// Parses a QASM program into a circuit over all declared quantum registers,
/// laid out in declaration order.
pub fn parse_qasm(source: &str) -> SimResult<Circuit> {
    let mut registers: Vec<Register> = Vec::new();
    let mut gates: Vec<(Gate, usize)> = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let code = raw.split("//").next().unwrap_or("");
        for statement in code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let keyword = statement
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("");
            match keyword {
                "OPENQASM" | "include" | "creg" | "barrier" | "measure" | "reset" => continue,
                "qreg" => {
                    let (name, size) = parse_declaration(&statement[4..])
                        .ok_or_else(|| qasm_error(line, format!("malformed `{statement}`")))?;
                    if registers.iter().any(|r| r.name == name) {
                        return Err(qasm_error(line, format!("register `{name}` redeclared")));
                    }
                    let offset = registers.iter().map(|r| r.size).sum();
                    registers.push(Register { name, offset, size });
                }
                _ => gates.extend(
                    parse_gate(statement, &registers)
                        .map_err(|message| qasm_error(line, message))?
                        .into_iter()
                        .map(|gate| (gate, line)),
                ),
            }
        }
    }

    let mut circuit = Circuit::new(registers.iter().map(|r| r.size).sum());
    for (gate, line) in gates {
        circuit
            .add_gate(gate)
            .map_err(|err| qasm_error(line, err.to_string()))?;
    }
    Ok(circuit)
}

impl Circuit {
    pub fn from_qasm(source: &str) -> SimResult<Circuit> {
        parse_qasm(source)
    }
}

/// `name[size]`
fn parse_declaration(text: &str) -> Option<(String, usize)> {
    let text = text.trim();
    let open = text.find('[')?;
    let close = text.find(']')?;
    let size = text.get(open + 1..close)?.trim().parse().ok()?;
    let name = text[..open].trim();
    (!name.is_empty()).then(|| (name.to_string(), size))
}

fn parse_gate(statement: &str, registers: &[Register]) -> Result<Vec<Gate>, String> {
    let (head, args) = match statement.find('(') {
        Some(open) => {
            let close = statement
                .rfind(')')
                .ok_or_else(|| format!("unbalanced parentheses in `{statement}`"))?;
            let name = statement[..open].trim();
            (
                (name, Some(&statement[open + 1..close])),
                &statement[close + 1..],
            )
        }
        None => {
            let name = statement.split_whitespace().next().unwrap_or("");
            ((name, None), &statement[name.len()..])
        }
    };
    let (name, params) = head;
    let (kind, inverse) = lookup(name).ok_or_else(|| format!("unsupported gate `{name}`"))?;

    let params = match params {
        Some(list) => split_top_level(list)
            .into_iter()
            .map(evaluate)
            .collect::<Result<Vec<f64>, String>>()?,
        None => Vec::new(),
    };

    let operands = args
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|a| resolve(a, registers))
        .collect::<Result<Vec<Operand>, String>>()?;
    if operands.is_empty() {
        return Err(format!("`{name}` has no operands"));
    }

    // Whole-register operands broadcast over equally sized registers.
    let width = operands
        .iter()
        .filter_map(|o| match o {
            Operand::Register(_, size) => Some(*size),
            Operand::Wire(_) => None,
        })
        .max();
    let rounds = width.unwrap_or(1);
    let mut out = Vec::with_capacity(rounds);
    for k in 0..rounds {
        let mut wires = Vec::with_capacity(operands.len());
        for operand in &operands {
            wires.push(match *operand {
                Operand::Wire(w) => w,
                Operand::Register(offset, size) if size == rounds => offset + k,
                Operand::Register(..) => {
                    return Err(format!("register sizes differ in `{statement}`"));
                }
            });
        }
        let gate = Gate::new(kind, wires, params.clone());
        out.push(if inverse { gate.inverted() } else { gate });
    }
    Ok(out)
}

fn resolve(arg: &str, registers: &[Register]) -> Result<Operand, String> {
    let (name, index) = match arg.find('[') {
        Some(open) => {
            let close = arg
                .find(']')
                .ok_or_else(|| format!("malformed operand `{arg}`"))?;
            let index: usize = arg[open + 1..close]
                .trim()
                .parse()
                .map_err(|_| format!("bad index in `{arg}`"))?;
            (arg[..open].trim(), Some(index))
        }
        None => (arg, None),
    };
    let reg = registers
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| format!("unknown register `{name}`"))?;
    match index {
        Some(i) if i < reg.size => Ok(Operand::Wire(reg.offset + i)),
        Some(i) => Err(format!("index {i} out of range for `{name}[{}]`", reg.size)),
        None => Ok(Operand::Register(reg.offset, reg.size)),
    }
}

/// Splits a parameter list on commas outside parentheses.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

/// `+ - * /` with the usual precedence, unary signs, parentheses, decimal
/// numbers (with optional exponent) and `pi`.
fn expression<'a>() -> impl Parser<'a, &'a str, f64, extra::Err<Rich<'a, char>>> {
    recursive(|expr| {
        let digits = text::digits(10);
        let mantissa = digits
            .clone()
            .then(just('.').then(digits.clone().or_not()).or_not())
            .ignored()
            .or(just('.').then(digits.clone()).ignored());
        let exponent = one_of("eE").then(one_of("+-").or_not()).then(digits);
        let number = mantissa
            .then(exponent.or_not())
            .to_slice()
            .try_map(|literal: &str, span| {
                literal
                    .parse::<f64>()
                    .map_err(|_| Rich::custom(span, format!("bad number `{literal}`")))
            });

        let constant = text::ident().try_map(|name: &str, span| match name {
            "pi" => Ok(PI),
            other => Err(Rich::custom(span, format!("unknown identifier `{other}`"))),
        });

        let atom = number
            .or(constant)
            .or(expr.delimited_by(just('('), just(')')))
            .padded();

        let unary = one_of("+-")
            .padded()
            .repeated()
            .foldr(atom, |sign, value: f64| if sign == '-' { -value } else { value });

        let product = unary.clone().foldl(
            one_of("*/").then(unary).repeated(),
            |lhs: f64, (op, rhs): (char, f64)| if op == '*' { lhs * rhs } else { lhs / rhs },
        );

        product.clone().foldl(
            one_of("+-").then(product).repeated(),
            |lhs: f64, (op, rhs): (char, f64)| if op == '+' { lhs + rhs } else { lhs - rhs },
        )
    })
    .then_ignore(end())
}

fn evaluate(text: &str) -> Result<f64, String> {
    expression().parse(text).into_result().map_err(|errors| {
        let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
        format!("bad parameter `{}`: {}", text.trim(), reasons.join("; "))
    })
}
