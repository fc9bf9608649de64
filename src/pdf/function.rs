//! PDF functions
//!
//! The shading converter builds Type 4 (PostScript calculator) functions and
//! stores them in the output; those are evaluated by whatever renders the
//! result. Tint transforms of Separation and DeviceN colors found in content
//! streams are evaluated here, for function types 0, 2, 3 and 4.

use lopdf::{Dictionary, Document, Object, Stream};

use crate::color::as_number;
use crate::error::{Error, Result};
use crate::pdf::content::stream_content;
use crate::pdf::resources::resolve;

/// Operators a calculator program may use
const OPERATORS: [&str; 42] = [
    "abs", "add", "atan", "ceiling", "cos", "cvi", "cvr", "div", "exp", "floor",
    "idiv", "ln", "log", "mod", "mul", "neg", "round", "sin", "sqrt", "sub",
    "truncate", "and", "bitshift", "eq", "false", "ge", "gt", "le", "lt", "ne",
    "not", "or", "true", "xor", "copy", "dup", "exch", "index", "pop", "roll",
    "if", "ifelse",
];

/// Calculator operand stacks are limited to 100 entries
const STACK_LIMIT: usize = 100;

/// One token of a calculator program
#[derive(Debug, Clone, PartialEq)]
pub enum PsToken {
    Real(f64),
    Operator(&'static str),
    /// A `{ ... }` procedure, as consumed by `if`/`ifelse`
    Block(Vec<PsToken>),
}

/// A stack-based calculator function mapping `domain.len() / 2` inputs to
/// `range.len() / 2` outputs
#[derive(Debug, Clone, PartialEq)]
pub struct CalculatorFunction {
    pub domain: Vec<f64>,
    pub range: Vec<f64>,
    pub program: Vec<PsToken>,
}

/// A tint transform: either one this crate built, or an existing PDF object
#[derive(Debug, Clone)]
pub enum Function {
    Calculator(CalculatorFunction),
    Stored(Object),
}

impl CalculatorFunction {
    /// `gray = 0.3 R + 0.59 G + 0.11 B`, three inputs in `[0, 1]`
    pub fn rgb_to_gray() -> Self {
        use PsToken::*;
        Self {
            domain: vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            range: vec![0.0, 1.0],
            program: vec![
                Real(0.11), Operator("mul"), Operator("exch"),
                Real(0.59), Operator("mul"), Operator("add"), Operator("exch"),
                Real(0.3), Operator("mul"), Operator("add"),
            ],
        }
    }

    /// `gray = min(1, 0.3 C + 0.59 M + 0.11 Y + K)`, four inputs in `[0, 1]`
    pub fn cmyk_to_gray() -> Self {
        use PsToken::*;
        Self {
            domain: vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            range: vec![0.0, 1.0],
            program: vec![
                Operator("exch"), Real(0.11), Operator("mul"), Operator("add"),
                Operator("exch"), Real(0.59), Operator("mul"), Operator("add"),
                Operator("exch"), Real(0.3), Operator("mul"), Operator("add"),
                Operator("dup"), Real(1.0), Operator("ge"),
                Block(vec![Operator("pop"), Real(1.0)]),
                Operator("if"),
            ],
        }
    }

    pub fn inputs(&self) -> usize {
        self.domain.len() / 2
    }

    /// Program text, braces included
    pub fn program_text(&self) -> String {
        let mut text = String::new();
        write_block(&mut text, &self.program);
        text
    }

    /// Parse a calculator program, braces included
    pub fn parse(domain: Vec<f64>, range: Vec<f64>, text: &[u8]) -> Result<Self> {
        let mut tokens = text.iter().copied().peekable();
        skip_space(&mut tokens);
        if tokens.next() != Some(b'{') {
            return Err(function_error("calculator program must start with '{'"));
        }
        let program = parse_block(&mut tokens)?;
        Ok(Self { domain, range, program })
    }

    /// Run the program on `inputs`, clipped to the domain; outputs are clipped to the range
    pub fn evaluate(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        let mut stack: Vec<Value> = clip(inputs, &self.domain).into_iter().map(Value::Number).collect();
        run(&self.program, &mut stack)?;

        let outputs = self.range.len() / 2;
        if stack.len() < outputs {
            return Err(function_error("calculator program left too few results"));
        }
        let results = stack[stack.len() - outputs..]
            .iter()
            .map(|v| v.number())
            .collect::<Result<Vec<f64>>>()?;
        Ok(clip(&results, &self.range))
    }

    /// The function as a PDF stream object
    pub fn to_stream(&self) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("FunctionType", Object::Integer(4));
        dict.set("Domain", number_array(&self.domain));
        dict.set("Range", number_array(&self.range));
        Stream::new(dict, self.program_text().into_bytes())
    }
}

impl Function {
    /// Object to place in a color space array; calculator functions become new indirect streams
    pub fn store(&self, doc: &mut Document) -> Object {
        match self {
            Function::Calculator(function) => Object::Reference(doc.add_object(function.to_stream())),
            Function::Stored(object) => object.clone(),
        }
    }

    /// Evaluate the function, resolving a stored one against `doc`
    pub fn evaluate(&self, doc: &Document, inputs: &[f64]) -> Result<Vec<f64>> {
        match self {
            Function::Calculator(function) => function.evaluate(inputs),
            Function::Stored(object) => Parsed::from_object(object, doc)?.evaluate(inputs),
        }
    }
}

/// A stored function read into memory
#[derive(Debug, Clone)]
enum Parsed {
    Sampled {
        domain: Vec<f64>,
        range: Vec<f64>,
        size: Vec<usize>,
        bits: usize,
        encode: Vec<f64>,
        decode: Vec<f64>,
        samples: Vec<u8>,
    },
    Exponential {
        domain: Vec<f64>,
        range: Option<Vec<f64>>,
        c0: Vec<f64>,
        c1: Vec<f64>,
        n: f64,
    },
    Stitching {
        domain: Vec<f64>,
        range: Option<Vec<f64>>,
        functions: Vec<Parsed>,
        bounds: Vec<f64>,
        encode: Vec<f64>,
    },
    Calculator(CalculatorFunction),
}

impl Parsed {
    fn from_object(object: &Object, doc: &Document) -> Result<Self> {
        let (dict, stream) = match resolve(doc, object)? {
            Object::Dictionary(dict) => (dict, None),
            Object::Stream(stream) => (&stream.dict, Some(stream)),
            _ => return Err(function_error("function must be a dictionary or stream")),
        };
        let numbers = |key: &[u8]| number_list(dict, key, doc);
        let domain = numbers(b"Domain")?.ok_or_else(|| function_error("function has no /Domain"))?;
        let range = numbers(b"Range")?;

        let function_type = dict.get(b"FunctionType").ok().and_then(as_number);
        match (function_type, stream) {
            (Some(t), Some(stream)) if t == 0.0 => {
                let range = range.ok_or_else(|| function_error("sampled function has no /Range"))?;
                let size: Vec<usize> = numbers(b"Size")?
                    .ok_or_else(|| function_error("sampled function has no /Size"))?
                    .into_iter()
                    .map(|v| v.max(1.0) as usize)
                    .collect();
                if size.len() != domain.len() / 2 || size.len() > 8 {
                    return Err(function_error("sampled function /Size does not match /Domain"));
                }
                let bits = match dict.get(b"BitsPerSample").ok().and_then(as_number) {
                    Some(b) if [1.0, 2.0, 4.0, 8.0, 12.0, 16.0, 24.0, 32.0].contains(&b) => b as usize,
                    _ => return Err(function_error("sampled function has no valid /BitsPerSample")),
                };
                let encode = numbers(b"Encode")?
                    .unwrap_or_else(|| size.iter().flat_map(|&s| [0.0, (s - 1) as f64]).collect());
                let decode = numbers(b"Decode")?.unwrap_or_else(|| range.clone());
                Ok(Parsed::Sampled {
                    domain,
                    range,
                    size,
                    bits,
                    encode,
                    decode,
                    samples: stream_content(stream)?,
                })
            }
            (Some(t), _) if t == 2.0 => Ok(Parsed::Exponential {
                domain,
                range,
                c0: numbers(b"C0")?.unwrap_or_else(|| vec![0.0]),
                c1: numbers(b"C1")?.unwrap_or_else(|| vec![1.0]),
                n: dict
                    .get(b"N")
                    .ok()
                    .and_then(as_number)
                    .ok_or_else(|| function_error("exponential function has no /N"))?,
            }),
            (Some(t), _) if t == 3.0 => {
                let functions = match dict.get(b"Functions").map(|f| resolve(doc, f)) {
                    Ok(Ok(Object::Array(items))) => items
                        .iter()
                        .map(|item| Parsed::from_object(item, doc))
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(function_error("stitching function has no /Functions")),
                };
                let bounds = numbers(b"Bounds")?.unwrap_or_default();
                let encode = numbers(b"Encode")?.unwrap_or_default();
                if functions.is_empty() || bounds.len() + 1 != functions.len() || encode.len() != 2 * functions.len() {
                    return Err(function_error("stitching function arrays do not line up"));
                }
                Ok(Parsed::Stitching {
                    domain,
                    range,
                    functions,
                    bounds,
                    encode,
                })
            }
            (Some(t), Some(stream)) if t == 4.0 => {
                let range = range.ok_or_else(|| function_error("calculator function has no /Range"))?;
                Ok(Parsed::Calculator(CalculatorFunction::parse(
                    domain,
                    range,
                    &stream_content(stream)?,
                )?))
            }
            (t, _) => Err(function_error(format!("unsupported function type {:?}", t))),
        }
    }

    fn evaluate(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        match self {
            Parsed::Sampled {
                domain,
                range,
                size,
                bits,
                encode,
                decode,
                samples,
            } => {
                let m = size.len();
                let n = range.len() / 2;
                if inputs.len() < m {
                    return Err(function_error("sampled function got too few inputs"));
                }
                let max = ((1u64 << bits) - 1) as f64;
                let inputs = clip(&inputs[..m], domain);

                // Position of each input in sample space, split into cell and fraction
                let mut cells = Vec::with_capacity(m);
                for i in 0..m {
                    let e = interpolate(inputs[i], domain[2 * i], domain[2 * i + 1], encode[2 * i], encode[2 * i + 1])
                        .clamp(0.0, (size[i] - 1) as f64);
                    cells.push((e.floor() as usize, e - e.floor()));
                }

                let mut outputs = vec![0.0; n];
                for corner in 0..(1usize << m) {
                    let mut weight = 1.0;
                    let mut offset = 0;
                    let mut stride = 1;
                    for (i, &(cell, fraction)) in cells.iter().enumerate() {
                        let upper = corner & (1 << i) != 0;
                        weight *= if upper { fraction } else { 1.0 - fraction };
                        let index = if upper { (cell + 1).min(size[i] - 1) } else { cell };
                        offset += index * stride;
                        stride *= size[i];
                    }
                    if weight == 0.0 {
                        continue;
                    }
                    for (j, output) in outputs.iter_mut().enumerate() {
                        *output += weight * read_sample(samples, (offset * n + j) * bits, *bits)? as f64;
                    }
                }

                let decoded: Vec<f64> = outputs
                    .iter()
                    .enumerate()
                    .map(|(j, &raw)| interpolate(raw, 0.0, max, decode[2 * j], decode[2 * j + 1]))
                    .collect();
                Ok(clip(&decoded, range))
            }
            Parsed::Exponential {
                domain,
                range,
                c0,
                c1,
                n,
            } => {
                let x = clip(&inputs[..inputs.len().min(1)], domain).first().copied().unwrap_or(0.0);
                let t = x.powf(*n);
                let outputs: Vec<f64> = c0.iter().zip(c1).map(|(a, b)| a + t * (b - a)).collect();
                Ok(range.as_ref().map_or(outputs.clone(), |r| clip(&outputs, r)))
            }
            Parsed::Stitching {
                domain,
                range,
                functions,
                bounds,
                encode,
            } => {
                let x = clip(&inputs[..inputs.len().min(1)], domain).first().copied().unwrap_or(0.0);
                let k = bounds.iter().position(|&b| x < b).unwrap_or(bounds.len());
                let low = if k == 0 { domain[0] } else { bounds[k - 1] };
                let high = if k == bounds.len() { domain[1] } else { bounds[k] };
                let t = interpolate(x, low, high, encode[2 * k], encode[2 * k + 1]);
                let outputs = functions[k].evaluate(&[t])?;
                Ok(range.as_ref().map_or(outputs.clone(), |r| clip(&outputs, r)))
            }
            Parsed::Calculator(function) => function.evaluate(inputs),
        }
    }
}

/// A calculator stack entry
#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    fn number(self) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(function_error("expected a number, found a boolean")),
        }
    }

    fn int(self) -> Result<i64> {
        Ok(self.number()? as i64)
    }
}

fn run(program: &[PsToken], stack: &mut Vec<Value>) -> Result<()> {
    let mut i = 0;
    while i < program.len() {
        match &program[i] {
            PsToken::Real(value) => stack.push(Value::Number(*value)),
            PsToken::Block(_) => {
                // A block only appears as the operand of a following if/ifelse
                match (program.get(i + 1), program.get(i + 2)) {
                    (Some(PsToken::Operator("if")), _) => {
                        let condition = pop_bool(stack)?;
                        if condition {
                            run(block(&program[i])?, stack)?;
                        }
                        i += 1;
                    }
                    (Some(PsToken::Block(otherwise)), Some(PsToken::Operator("ifelse"))) => {
                        let condition = pop_bool(stack)?;
                        run(if condition { block(&program[i])? } else { otherwise.as_slice() }, stack)?;
                        i += 2;
                    }
                    _ => return Err(function_error("procedure not followed by if or ifelse")),
                }
            }
            PsToken::Operator(op) => apply(op, stack)?,
        }
        if stack.len() > STACK_LIMIT {
            return Err(function_error("calculator stack overflow"));
        }
        i += 1;
    }
    Ok(())
}

fn block(token: &PsToken) -> Result<&[PsToken]> {
    match token {
        PsToken::Block(tokens) => Ok(tokens),
        _ => Err(function_error("expected a procedure")),
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| function_error("calculator stack underflow"))
}

fn pop_number(stack: &mut Vec<Value>) -> Result<f64> {
    pop(stack)?.number()
}

fn pop_bool(stack: &mut Vec<Value>) -> Result<bool> {
    match pop(stack)? {
        Value::Bool(b) => Ok(b),
        Value::Number(_) => Err(function_error("expected a boolean, found a number")),
    }
}

fn apply(op: &str, stack: &mut Vec<Value>) -> Result<()> {
    use Value::{Bool, Number};

    let unary = |stack: &mut Vec<Value>, f: fn(f64) -> f64| -> Result<()> {
        let a = pop_number(stack)?;
        stack.push(Number(f(a)));
        Ok(())
    };
    let binary = |stack: &mut Vec<Value>, f: fn(f64, f64) -> f64| -> Result<()> {
        let b = pop_number(stack)?;
        let a = pop_number(stack)?;
        stack.push(Number(f(a, b)));
        Ok(())
    };
    let compare = |stack: &mut Vec<Value>, f: fn(f64, f64) -> bool| -> Result<()> {
        let b = pop_number(stack)?;
        let a = pop_number(stack)?;
        stack.push(Bool(f(a, b)));
        Ok(())
    };

    match op {
        "abs" => unary(stack, f64::abs),
        "neg" => unary(stack, |a| -a),
        "ceiling" => unary(stack, f64::ceil),
        "floor" => unary(stack, f64::floor),
        "round" => unary(stack, |a| (a + 0.5).floor()),
        "truncate" | "cvi" => unary(stack, f64::trunc),
        "cvr" => unary(stack, |a| a),
        "sqrt" => unary(stack, f64::sqrt),
        "sin" => unary(stack, |a| a.to_radians().sin()),
        "cos" => unary(stack, |a| a.to_radians().cos()),
        "ln" => unary(stack, f64::ln),
        "log" => unary(stack, f64::log10),
        "add" => binary(stack, |a, b| a + b),
        "sub" => binary(stack, |a, b| a - b),
        "mul" => binary(stack, |a, b| a * b),
        "div" => binary(stack, |a, b| a / b),
        "exp" => binary(stack, f64::powf),
        "atan" => binary(stack, |a, b| a.atan2(b).to_degrees().rem_euclid(360.0)),
        "idiv" | "mod" => {
            let b = pop(stack)?.int()?;
            let a = pop(stack)?.int()?;
            if b == 0 {
                return Err(function_error(format!("{} by zero", op)));
            }
            let result = if op == "idiv" { a / b } else { a % b };
            stack.push(Number(result as f64));
            Ok(())
        }
        "eq" | "ne" => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            stack.push(Bool((a == b) == (op == "eq")));
            Ok(())
        }
        "ge" => compare(stack, |a, b| a >= b),
        "gt" => compare(stack, |a, b| a > b),
        "le" => compare(stack, |a, b| a <= b),
        "lt" => compare(stack, |a, b| a < b),
        "true" => {
            stack.push(Bool(true));
            Ok(())
        }
        "false" => {
            stack.push(Bool(false));
            Ok(())
        }
        "and" | "or" | "xor" => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            let result = match (a, b) {
                (Bool(a), Bool(b)) => Bool(match op {
                    "and" => a && b,
                    "or" => a || b,
                    _ => a ^ b,
                }),
                (a, b) => {
                    let (a, b) = (a.int()?, b.int()?);
                    let bits = match op {
                        "and" => a & b,
                        "or" => a | b,
                        _ => a ^ b,
                    };
                    Number(bits as f64)
                }
            };
            stack.push(result);
            Ok(())
        }
        "not" => {
            let result = match pop(stack)? {
                Bool(b) => Bool(!b),
                Number(n) => Number(!(n as i64) as f64),
            };
            stack.push(result);
            Ok(())
        }
        "bitshift" => {
            let shift = pop(stack)?.int()?;
            let value = pop(stack)?.int()?;
            let result = if shift >= 0 {
                value.checked_shl(shift as u32).unwrap_or(0)
            } else {
                value.checked_shr(shift.unsigned_abs() as u32).unwrap_or(0)
            };
            stack.push(Number(result as f64));
            Ok(())
        }
        "pop" => pop(stack).map(|_| ()),
        "dup" => {
            let top = *stack.last().ok_or_else(|| function_error("calculator stack underflow"))?;
            stack.push(top);
            Ok(())
        }
        "exch" => {
            let b = pop(stack)?;
            let a = pop(stack)?;
            stack.push(b);
            stack.push(a);
            Ok(())
        }
        "copy" => {
            let count = pop(stack)?.int()?;
            if count < 0 || count as usize > stack.len() {
                return Err(function_error("copy count out of range"));
            }
            let from = stack.len() - count as usize;
            stack.extend_from_within(from..);
            Ok(())
        }
        "index" => {
            let index = pop(stack)?.int()?;
            if index < 0 || index as usize >= stack.len() {
                return Err(function_error("index out of range"));
            }
            let value = stack[stack.len() - 1 - index as usize];
            stack.push(value);
            Ok(())
        }
        "roll" => {
            let shift = pop(stack)?.int()?;
            let count = pop(stack)?.int()?;
            if count < 0 || count as usize > stack.len() {
                return Err(function_error("roll count out of range"));
            }
            if count > 0 {
                let from = stack.len() - count as usize;
                stack[from..].rotate_right(shift.rem_euclid(count) as usize);
            }
            Ok(())
        }
        other => Err(function_error(format!("unknown operator {}", other))),
    }
}

fn skip_space(tokens: &mut std::iter::Peekable<impl Iterator<Item = u8>>) {
    while tokens.peek().is_some_and(|c| c.is_ascii_whitespace()) {
        tokens.next();
    }
}

/// Tokens up to the matching `}`; the opening brace is already consumed
fn parse_block(tokens: &mut std::iter::Peekable<impl Iterator<Item = u8>>) -> Result<Vec<PsToken>> {
    let mut program = Vec::new();
    loop {
        skip_space(tokens);
        match tokens.next() {
            None => return Err(function_error("calculator program is missing '}'")),
            Some(b'}') => return Ok(program),
            Some(b'{') => program.push(PsToken::Block(parse_block(tokens)?)),
            Some(first) => {
                let mut word = vec![first];
                while let Some(&c) = tokens.peek() {
                    if c.is_ascii_whitespace() || c == b'{' || c == b'}' {
                        break;
                    }
                    word.push(c);
                    tokens.next();
                }
                let word = String::from_utf8_lossy(&word).into_owned();
                match word.parse::<f64>() {
                    Ok(value) => program.push(PsToken::Real(value)),
                    Err(_) => match OPERATORS.iter().find(|&&op| op == word) {
                        Some(&op) => program.push(PsToken::Operator(op)),
                        None => return Err(function_error(format!("unknown operator {}", word))),
                    },
                }
            }
        }
    }
}

/// Read one big-endian sample of `bits` bits starting at bit `position`
fn read_sample(samples: &[u8], position: usize, bits: usize) -> Result<u64> {
    let mut value = 0u64;
    for bit in position..position + bits {
        let byte = samples
            .get(bit / 8)
            .ok_or_else(|| function_error("sampled function has too little sample data"))?;
        value = (value << 1) | ((byte >> (7 - bit % 8)) & 1) as u64;
    }
    Ok(value)
}

fn interpolate(x: f64, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> f64 {
    if x_max == x_min {
        return y_min;
    }
    y_min + (x - x_min) * (y_max - y_min) / (x_max - x_min)
}

/// Clip each value to its `[min, max]` pair; values without a pair pass through
fn clip(values: &[f64], bounds: &[f64]) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| match (bounds.get(2 * i), bounds.get(2 * i + 1)) {
            (Some(&low), Some(&high)) if low <= high => v.clamp(low, high),
            _ => v,
        })
        .collect()
}

fn number_list(dict: &Dictionary, key: &[u8], doc: &Document) -> Result<Option<Vec<f64>>> {
    match dict.get(key) {
        Ok(object) => match resolve(doc, object)? {
            Object::Array(items) => Ok(Some(items.iter().filter_map(as_number).collect())),
            _ => Err(function_error(format!("/{} is not an array", String::from_utf8_lossy(key)))),
        },
        Err(_) => Ok(None),
    }
}

fn function_error(reason: impl Into<String>) -> Error {
    Error::Function(reason.into())
}

fn write_block(out: &mut String, tokens: &[PsToken]) {
    out.push('{');
    for token in tokens {
        out.push(' ');
        match token {
            PsToken::Real(value) => out.push_str(&format_real(*value)),
            PsToken::Operator(op) => out.push_str(op),
            PsToken::Block(inner) => write_block(out, inner),
        }
    }
    out.push_str(" }");
}

/// Calculator reals always carry a decimal point
fn format_real(value: f64) -> String {
    let text = format!("{}", value);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

fn number_array(values: &[f64]) -> Object {
    Object::Array(values.iter().map(|&v| Object::Integer(v as i64)).collect())
}
