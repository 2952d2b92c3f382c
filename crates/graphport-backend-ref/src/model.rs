//! Text model format understood by the reference backend.
//!
//! One statement per line, `out = op a [b]`; `#` starts a comment. Supported ops are
//! `identity`, `relu`, `add`, `sub` and `mul`, all FLOAT32 and elementwise.

use std::collections::HashMap;

use graphport_core::abi::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Identity,
    Relu,
    Add,
    Sub,
    Mul,
}

impl Op {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "identity" => Op::Identity,
            "relu" => Op::Relu,
            "add" => Op::Add,
            "sub" => Op::Sub,
            "mul" => Op::Mul,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Op::Identity | Op::Relu => 1,
            Op::Add | Op::Sub | Op::Mul => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub output: String,
    pub op: Op,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn parse(text: &str) -> Result<Self, OnnxStatus> {
        let mut statements = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (lhs, rhs) = line.split_once('=').ok_or(ONNXIFI_STATUS_INVALID_MODEL)?;
            let output = lhs.trim();
            let mut parts = rhs.split_whitespace();
            let op = parts
                .next()
                .ok_or(ONNXIFI_STATUS_INVALID_MODEL)
                .and_then(|raw| Op::parse(raw).ok_or(ONNXIFI_STATUS_UNSUPPORTED_OPERATOR))?;
            let args: Vec<String> = parts.map(str::to_string).collect();
            if output.is_empty() || output.contains(char::is_whitespace) || args.len() != op.arity()
            {
                return Err(ONNXIFI_STATUS_INVALID_MODEL);
            }
            statements.push(Statement {
                output: output.to_string(),
                op,
                args,
            });
        }
        if statements.is_empty() {
            return Err(ONNXIFI_STATUS_INVALID_MODEL);
        }
        Ok(Self { statements })
    }

    pub fn produces(&self, name: &str) -> bool {
        self.statements.iter().any(|s| s.output == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub dims: Vec<u64>,
    pub data: Vec<f32>,
}

/// Runs every statement in order over `env`, which starts with weights and inputs.
pub fn evaluate(program: &Program, env: &mut HashMap<String, Value>) -> Result<(), OnnxStatus> {
    for stmt in &program.statements {
        let arg = |i: usize| env.get(&stmt.args[i]).ok_or(ONNXIFI_STATUS_UNIDENTIFIED_NAME);
        let value = match stmt.op {
            Op::Identity => arg(0)?.clone(),
            Op::Relu => {
                let a = arg(0)?;
                Value {
                    dims: a.dims.clone(),
                    data: a.data.iter().map(|v| v.max(0.0)).collect(),
                }
            }
            Op::Add | Op::Sub | Op::Mul => {
                let (a, b) = (arg(0)?, arg(1)?);
                if a.data.len() != b.data.len() {
                    return Err(ONNXIFI_STATUS_MISMATCHING_SHAPE);
                }
                let f: fn(f32, f32) -> f32 = match stmt.op {
                    Op::Add => |x, y| x + y,
                    Op::Sub => |x, y| x - y,
                    _ => |x, y| x * y,
                };
                Value {
                    dims: a.dims.clone(),
                    data: a.data.iter().zip(&b.data).map(|(x, y)| f(*x, *y)).collect(),
                }
            }
        };
        env.insert(stmt.output.clone(), value);
    }
    Ok(())
}
