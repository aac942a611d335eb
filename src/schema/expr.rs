//! Expression Evaluator - Stack-Based VM
//!
//! A small stack-based virtual machine that runs author-supplied field
//! validation snippets after [`crate::schema::script`] has compiled them to
//! bytecode. The VM is the sandbox:
//!
//! - Only the variables placed in the [`ExprContext`] are reachable
//! - Stack depth and executed instructions are bounded
//! - Every run starts from an empty stack and a fresh context

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Dynamically typed value, modelled on the values a form snippet sees
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Value {
    /// Numeric conversion (`Number(x)` semantics)
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Get as string slice if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Check if truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Identity comparison (`===`)
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }

    /// Coercing comparison (`==`)
    pub fn loose_eq(&self, other: &Value) -> bool {
        if std::mem::discriminant(self) == std::mem::discriminant(other) {
            return self.strict_eq(other);
        }
        match (self.is_nullish(), other.is_nullish()) {
            (true, true) => true,
            (true, false) | (false, true) => false,
            (false, false) => self.as_number() == other.as_number(),
        }
    }

    /// Relational ordering; strings compare lexically, everything else numerically
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => self.as_number().partial_cmp(&other.as_number()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n < 0.0 { "-" } else { "" };
        format!("{}Infinity", sign)
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Opcodes for the expression VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,

    // Stack operations
    /// Push immediate f64 value (followed by 8 bytes)
    PushNumber = 0x01,
    /// Push string literal (followed by u16 length + UTF-8 bytes)
    PushString = 0x02,
    PushTrue = 0x03,
    PushFalse = 0x04,
    PushNull = 0x05,
    PushUndefined = 0x06,
    /// Duplicate top of stack
    Dup = 0x07,
    /// Pop and discard
    Pop = 0x08,

    // Variable operations
    /// Load variable by name (followed by u8 length + name)
    LoadVar = 0x10,
    /// Pop and store into variable (followed by u8 length + name)
    StoreVar = 0x11,
    /// Replace top of stack with its `.length`
    Length = 0x12,

    // Arithmetic operations
    Add = 0x20,
    Sub = 0x21,
    Mul = 0x22,
    Div = 0x23,
    Mod = 0x24,
    Neg = 0x25,
    /// Unary plus (numeric conversion)
    ToNumber = 0x26,

    // Comparison operations
    StrictEq = 0x30,
    StrictNe = 0x31,
    Eq = 0x32,
    Ne = 0x33,
    Lt = 0x34,
    Le = 0x35,
    Gt = 0x36,
    Ge = 0x37,

    // Logical operations
    Not = 0x40,

    // String methods
    /// Pop needle and receiver, push `receiver.indexOf(needle)`
    IndexOf = 0x50,
    /// Pop needle and receiver, push `receiver.includes(needle)`
    Includes = 0x51,
    Trim = 0x52,
    ToLowerCase = 0x53,
    ToUpperCase = 0x54,

    // Control flow
    /// Jump to absolute offset (followed by u16)
    Jump = 0x60,
    /// Pop, jump if falsy (followed by u16)
    JumpIfFalse = 0x61,
    /// Pop, jump if truthy (followed by u16)
    JumpIfTrue = 0x62,

    /// Return result (terminates execution)
    Return = 0xFF,
}

impl TryFrom<u8> for Opcode {
    type Error = ExprError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Opcode::Nop),
            0x01 => Ok(Opcode::PushNumber),
            0x02 => Ok(Opcode::PushString),
            0x03 => Ok(Opcode::PushTrue),
            0x04 => Ok(Opcode::PushFalse),
            0x05 => Ok(Opcode::PushNull),
            0x06 => Ok(Opcode::PushUndefined),
            0x07 => Ok(Opcode::Dup),
            0x08 => Ok(Opcode::Pop),
            0x10 => Ok(Opcode::LoadVar),
            0x11 => Ok(Opcode::StoreVar),
            0x12 => Ok(Opcode::Length),
            0x20 => Ok(Opcode::Add),
            0x21 => Ok(Opcode::Sub),
            0x22 => Ok(Opcode::Mul),
            0x23 => Ok(Opcode::Div),
            0x24 => Ok(Opcode::Mod),
            0x25 => Ok(Opcode::Neg),
            0x26 => Ok(Opcode::ToNumber),
            0x30 => Ok(Opcode::StrictEq),
            0x31 => Ok(Opcode::StrictNe),
            0x32 => Ok(Opcode::Eq),
            0x33 => Ok(Opcode::Ne),
            0x34 => Ok(Opcode::Lt),
            0x35 => Ok(Opcode::Le),
            0x36 => Ok(Opcode::Gt),
            0x37 => Ok(Opcode::Ge),
            0x40 => Ok(Opcode::Not),
            0x50 => Ok(Opcode::IndexOf),
            0x51 => Ok(Opcode::Includes),
            0x52 => Ok(Opcode::Trim),
            0x53 => Ok(Opcode::ToLowerCase),
            0x54 => Ok(Opcode::ToUpperCase),
            0x60 => Ok(Opcode::Jump),
            0x61 => Ok(Opcode::JumpIfFalse),
            0x62 => Ok(Opcode::JumpIfTrue),
            0xFF => Ok(Opcode::Return),
            _ => Err(ExprError::InvalidOpcode(value)),
        }
    }
}

/// Errors from compiling or running an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid opcode: 0x{0:02X}")]
    InvalidOpcode(u8),
    #[error("invalid bytecode")]
    InvalidBytecode,
    #[error("execution limit exceeded")]
    ExecutionLimit,
    #[error("{0} is not defined")]
    VariableNotFound(String),
    #[error("cannot read property '{property}' of {target}")]
    TypeMismatch { property: String, target: String },
    #[error("{target}.{method} is not a function")]
    NotCallable { method: String, target: String },
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unsupported expression: {0}")]
    Unsupported(String),
    #[error("expression source exceeds {limit} bytes")]
    SourceTooLong { limit: usize },
    #[error("compiled program is too large")]
    ProgramTooLarge,
}

/// Variable bindings visible to one run
#[derive(Debug, Default)]
pub struct ExprContext {
    /// Named variables
    pub variables: HashMap<String, Value>,
}

impl ExprContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings for a custom validation snippet: `input` plus `valid = true`
    pub fn for_input(input: &str) -> Self {
        let mut ctx = Self::new();
        ctx.set_var("input", Value::Str(input.to_string()));
        ctx.set_var("valid", Value::Bool(true));
        ctx
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Stack-based expression virtual machine
pub struct ExprVM {
    /// Value stack
    stack: Vec<Value>,
    /// Maximum stack size
    max_stack: usize,
    /// Maximum instructions to execute
    max_instructions: usize,
}

impl ExprVM {
    /// Create a new VM with default limits
    pub fn new() -> Self {
        Self::with_limits(256, 10_000)
    }

    /// Create with custom limits
    pub fn with_limits(max_stack: usize, max_instructions: usize) -> Self {
        Self {
            stack: Vec::with_capacity(max_stack.min(64)),
            max_stack,
            max_instructions,
        }
    }

    /// Execute bytecode and return the value left on top of the stack
    pub fn execute(&mut self, bytecode: &[u8], ctx: &mut ExprContext) -> Result<Value, ExprError> {
        self.stack.clear();
        let mut ip = 0;
        let mut instruction_count = 0;

        while ip < bytecode.len() {
            instruction_count += 1;
            if instruction_count > self.max_instructions {
                return Err(ExprError::ExecutionLimit);
            }

            let opcode = Opcode::try_from(bytecode[ip])?;
            ip += 1;

            match opcode {
                Opcode::Nop => {}

                Opcode::PushNumber => {
                    let raw = read_array::<8>(bytecode, ip)?;
                    ip += 8;
                    self.push(Value::Number(f64::from_le_bytes(raw)))?;
                }

                Opcode::PushString => {
                    let len = u16::from_le_bytes(read_array::<2>(bytecode, ip)?) as usize;
                    ip += 2;
                    let raw = bytecode.get(ip..ip + len).ok_or(ExprError::InvalidBytecode)?;
                    let s = std::str::from_utf8(raw).map_err(|_| ExprError::InvalidBytecode)?;
                    ip += len;
                    self.push(Value::Str(s.to_string()))?;
                }

                Opcode::PushTrue => self.push(Value::Bool(true))?,
                Opcode::PushFalse => self.push(Value::Bool(false))?,
                Opcode::PushNull => self.push(Value::Null)?,
                Opcode::PushUndefined => self.push(Value::Undefined)?,

                Opcode::Dup => {
                    let val = self.peek()?.clone();
                    self.push(val)?;
                }

                Opcode::Pop => {
                    self.pop()?;
                }

                Opcode::LoadVar => {
                    let (name, next) = read_name(bytecode, ip)?;
                    ip = next;
                    let value = ctx
                        .get_var(name)
                        .cloned()
                        .ok_or_else(|| ExprError::VariableNotFound(name.to_string()))?;
                    self.push(value)?;
                }

                Opcode::StoreVar => {
                    let (name, next) = read_name(bytecode, ip)?;
                    ip = next;
                    let value = self.pop()?;
                    ctx.set_var(name, value);
                }

                Opcode::Length => {
                    let target = self.pop()?;
                    let length = match &target {
                        Value::Str(s) => Value::Number(s.chars().count() as f64),
                        Value::Undefined | Value::Null => {
                            return Err(ExprError::TypeMismatch {
                                property: "length".to_string(),
                                target: target.to_string(),
                            });
                        }
                        _ => Value::Undefined,
                    };
                    self.push(length)?;
                }

                // Arithmetic
                Opcode::Add => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let sum = match (&a, &b) {
                        (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", a, b)),
                        _ => Value::Number(a.as_number() + b.as_number()),
                    };
                    self.push(sum)?;
                }
                Opcode::Sub => self.numeric_op(|a, b| a - b)?,
                Opcode::Mul => self.numeric_op(|a, b| a * b)?,
                Opcode::Div => self.numeric_op(|a, b| a / b)?,
                Opcode::Mod => self.numeric_op(|a, b| a % b)?,
                Opcode::Neg => {
                    let a = self.pop()?.as_number();
                    self.push(Value::Number(-a))?;
                }
                Opcode::ToNumber => {
                    let a = self.pop()?.as_number();
                    self.push(Value::Number(a))?;
                }

                // Comparison
                Opcode::StrictEq => self.equality_op(|a, b| a.strict_eq(b))?,
                Opcode::StrictNe => self.equality_op(|a, b| !a.strict_eq(b))?,
                Opcode::Eq => self.equality_op(|a, b| a.loose_eq(b))?,
                Opcode::Ne => self.equality_op(|a, b| !a.loose_eq(b))?,
                Opcode::Lt => self.compare_op(|o| o == Ordering::Less)?,
                Opcode::Le => self.compare_op(|o| o != Ordering::Greater)?,
                Opcode::Gt => self.compare_op(|o| o == Ordering::Greater)?,
                Opcode::Ge => self.compare_op(|o| o != Ordering::Less)?,

                // Logical
                Opcode::Not => {
                    let a = self.pop()?.is_truthy();
                    self.push(Value::Bool(!a))?;
                }

                // String methods
                Opcode::IndexOf => {
                    let needle = self.pop()?.to_string();
                    let target = self.pop()?;
                    let haystack = string_receiver(&target, "indexOf")?;
                    // Char offsets, consistent with `.length`
                    let index = haystack
                        .find(needle.as_str())
                        .map_or(-1.0, |at| haystack[..at].chars().count() as f64);
                    self.push(Value::Number(index))?;
                }
                Opcode::Includes => {
                    let needle = self.pop()?.to_string();
                    let target = self.pop()?;
                    let found = string_receiver(&target, "includes")?.contains(needle.as_str());
                    self.push(Value::Bool(found))?;
                }
                Opcode::Trim => self.string_op("trim", |s| s.trim().to_string())?,
                Opcode::ToLowerCase => self.string_op("toLowerCase", str::to_lowercase)?,
                Opcode::ToUpperCase => self.string_op("toUpperCase", str::to_uppercase)?,

                // Control flow
                Opcode::Jump => {
                    ip = read_target(bytecode, ip)?;
                }
                Opcode::JumpIfFalse => {
                    let target = read_target(bytecode, ip)?;
                    ip += 2;
                    if !self.pop()?.is_truthy() {
                        ip = target;
                    }
                }
                Opcode::JumpIfTrue => {
                    let target = read_target(bytecode, ip)?;
                    ip += 2;
                    if self.pop()?.is_truthy() {
                        ip = target;
                    }
                }

                Opcode::Return => {
                    break;
                }
            }
        }

        self.stack.pop().ok_or(ExprError::StackUnderflow)
    }

    fn push(&mut self, value: Value) -> Result<(), ExprError> {
        if self.stack.len() >= self.max_stack {
            return Err(ExprError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, ExprError> {
        self.stack.pop().ok_or(ExprError::StackUnderflow)
    }

    fn peek(&self) -> Result<&Value, ExprError> {
        self.stack.last().ok_or(ExprError::StackUnderflow)
    }

    fn numeric_op<F>(&mut self, f: F) -> Result<(), ExprError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let b = self.pop()?.as_number();
        let a = self.pop()?.as_number();
        self.push(Value::Number(f(a, b)))
    }

    fn equality_op<F>(&mut self, f: F) -> Result<(), ExprError>
    where
        F: Fn(&Value, &Value) -> bool,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(Value::Bool(f(&a, &b)))
    }

    fn string_op<F>(&mut self, method: &str, f: F) -> Result<(), ExprError>
    where
        F: Fn(&str) -> String,
    {
        let target = self.pop()?;
        let result = f(string_receiver(&target, method)?);
        self.push(Value::Str(result))
    }

    fn compare_op<F>(&mut self, f: F) -> Result<(), ExprError>
    where
        F: Fn(Ordering) -> bool,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        // NaN on either side compares false
        let result = a.compare(&b).map_or(false, f);
        self.push(Value::Bool(result))
    }
}

impl Default for ExprVM {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver of a string method call
fn string_receiver<'v>(target: &'v Value, method: &str) -> Result<&'v str, ExprError> {
    match target {
        Value::Str(s) => Ok(s),
        Value::Undefined | Value::Null => Err(ExprError::TypeMismatch {
            property: method.to_string(),
            target: target.to_string(),
        }),
        _ => Err(ExprError::NotCallable {
            method: method.to_string(),
            target: target.to_string(),
        }),
    }
}

fn read_array<const N: usize>(bytecode: &[u8], ip: usize) -> Result<[u8; N], ExprError> {
    bytecode
        .get(ip..ip + N)
        .and_then(|raw| <[u8; N]>::try_from(raw).ok())
        .ok_or(ExprError::InvalidBytecode)
}

fn read_target(bytecode: &[u8], ip: usize) -> Result<usize, ExprError> {
    let target = u16::from_le_bytes(read_array::<2>(bytecode, ip)?) as usize;
    if target > bytecode.len() {
        return Err(ExprError::InvalidBytecode);
    }
    Ok(target)
}

fn read_name(bytecode: &[u8], ip: usize) -> Result<(&str, usize), ExprError> {
    let len = *bytecode.get(ip).ok_or(ExprError::InvalidBytecode)? as usize;
    let start = ip + 1;
    let raw = bytecode.get(start..start + len).ok_or(ExprError::InvalidBytecode)?;
    let name = std::str::from_utf8(raw).map_err(|_| ExprError::InvalidBytecode)?;
    Ok((name, start + len))
}

/// Builder for creating bytecode
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    bytecode: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { bytecode: Vec::new() }
    }

    pub fn push_number(&mut self, value: f64) -> &mut Self {
        self.bytecode.push(Opcode::PushNumber as u8);
        self.bytecode.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_string(&mut self, value: &str) -> Result<&mut Self, ExprError> {
        let len = u16::try_from(value.len()).map_err(|_| ExprError::ProgramTooLarge)?;
        self.bytecode.push(Opcode::PushString as u8);
        self.bytecode.extend_from_slice(&len.to_le_bytes());
        self.bytecode.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    pub fn load_var(&mut self, name: &str) -> Result<&mut Self, ExprError> {
        self.named(Opcode::LoadVar, name)
    }

    pub fn store_var(&mut self, name: &str) -> Result<&mut Self, ExprError> {
        self.named(Opcode::StoreVar, name)
    }

    fn named(&mut self, opcode: Opcode, name: &str) -> Result<&mut Self, ExprError> {
        let len = u8::try_from(name.len())
            .map_err(|_| ExprError::Unsupported(format!("identifier too long: {}", name)))?;
        self.bytecode.push(opcode as u8);
        self.bytecode.push(len);
        self.bytecode.extend_from_slice(name.as_bytes());
        Ok(self)
    }

    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.bytecode.push(opcode as u8);
        self
    }

    /// Emit a jump with a placeholder target; returns the offset to patch
    pub fn jump(&mut self, opcode: Opcode) -> usize {
        self.bytecode.push(opcode as u8);
        let at = self.bytecode.len();
        self.bytecode.extend_from_slice(&[0, 0]);
        at
    }

    /// Point the jump emitted at `at` to the current end of the program
    pub fn patch_jump(&mut self, at: usize) -> Result<(), ExprError> {
        let target = u16::try_from(self.bytecode.len()).map_err(|_| ExprError::ProgramTooLarge)?;
        let slot = self
            .bytecode
            .get_mut(at..at + 2)
            .ok_or(ExprError::InvalidBytecode)?;
        slot.copy_from_slice(&target.to_le_bytes());
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.bytecode.len()
    }

    pub fn build(mut self) -> Vec<u8> {
        self.bytecode.push(Opcode::Return as u8);
        self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_arithmetic() {
        let mut builder = BytecodeBuilder::new();
        builder.push_number(10.0).push_number(5.0).op(Opcode::Add);
        let bytecode = builder.build();

        let mut vm = ExprVM::new();
        let result = vm.execute(&bytecode, &mut ExprContext::new()).unwrap();

        assert_eq!(result, Value::Number(15.0));
    }

    #[test]
    fn test_string_concatenation() {
        let mut builder = BytecodeBuilder::new();
        builder.push_string("Hello ").unwrap();
        builder.load_var("input").unwrap();
        builder.op(Opcode::Add);
        let bytecode = builder.build();

        let mut ctx = ExprContext::for_input("Bob");
        let result = ExprVM::new().execute(&bytecode, &mut ctx).unwrap();

        assert_eq!(result, Value::Str("Hello Bob".to_string()));
    }

    #[test]
    fn test_store_var() {
        let mut builder = BytecodeBuilder::new();
        builder.push_string("nope").unwrap();
        builder.store_var("valid").unwrap();
        builder.load_var("valid").unwrap();
        let bytecode = builder.build();

        let mut ctx = ExprContext::for_input("");
        let result = ExprVM::new().execute(&bytecode, &mut ctx).unwrap();

        assert_eq!(result.as_str(), Some("nope"));
        assert_eq!(ctx.get_var("valid"), Some(&Value::Str("nope".to_string())));
    }

    #[test]
    fn test_conditional_jump() {
        // false ? 1 : 2
        let mut builder = BytecodeBuilder::new();
        builder.op(Opcode::PushFalse);
        let else_branch = builder.jump(Opcode::JumpIfFalse);
        builder.push_number(1.0);
        let end = builder.jump(Opcode::Jump);
        builder.patch_jump(else_branch).unwrap();
        builder.push_number(2.0);
        builder.patch_jump(end).unwrap();
        let bytecode = builder.build();

        let result = ExprVM::new().execute(&bytecode, &mut ExprContext::new()).unwrap();
        assert_eq!(result, Value::Number(2.0));
    }

    #[test]
    fn test_unknown_variable() {
        let mut builder = BytecodeBuilder::new();
        builder.load_var("window").unwrap();
        let bytecode = builder.build();

        let err = ExprVM::new()
            .execute(&bytecode, &mut ExprContext::for_input("x"))
            .unwrap_err();
        assert_eq!(err, ExprError::VariableNotFound("window".to_string()));
    }

    #[test]
    fn test_length_of_null_fails() {
        let mut builder = BytecodeBuilder::new();
        builder.op(Opcode::PushNull).op(Opcode::Length);
        let bytecode = builder.build();

        let err = ExprVM::new().execute(&bytecode, &mut ExprContext::new()).unwrap_err();
        assert!(matches!(err, ExprError::TypeMismatch { .. }));
    }

    #[test]
    fn test_string_methods() {
        let mut builder = BytecodeBuilder::new();
        builder.load_var("input").unwrap();
        builder.op(Opcode::Trim).op(Opcode::ToLowerCase);
        builder.push_string("@").unwrap();
        builder.op(Opcode::IndexOf);
        let bytecode = builder.build();

        let mut vm = ExprVM::new();
        let result = vm.execute(&bytecode, &mut ExprContext::for_input("  Zoë@Example ")).unwrap();
        assert_eq!(result, Value::Number(3.0));

        let result = vm.execute(&bytecode, &mut ExprContext::for_input("none")).unwrap();
        assert_eq!(result, Value::Number(-1.0));
    }

    #[test]
    fn test_string_method_on_number_fails() {
        let mut builder = BytecodeBuilder::new();
        builder.push_number(5.0).op(Opcode::ToUpperCase);
        let bytecode = builder.build();

        let err = ExprVM::new().execute(&bytecode, &mut ExprContext::new()).unwrap_err();
        assert_eq!(
            err,
            ExprError::NotCallable {
                method: "toUpperCase".to_string(),
                target: "5".to_string(),
            }
        );
    }

    #[test]
    fn test_builder_position_tracks_length() {
        let mut builder = BytecodeBuilder::new();
        assert_eq!(builder.position(), 0);

        builder.op(Opcode::PushTrue);
        assert_eq!(builder.position(), 1);
        builder.push_number(1.0);
        assert_eq!(builder.position(), 10);

        let at = builder.jump(Opcode::Jump);
        assert_eq!(at, 11);
        assert_eq!(builder.position(), 13);
        assert_eq!(builder.build().len(), 14);
    }

    #[test]
    fn test_stack_limit() {
        let mut builder = BytecodeBuilder::new();
        for _ in 0..5 {
            builder.op(Opcode::PushTrue);
        }
        let bytecode = builder.build();

        let mut vm = ExprVM::with_limits(4, 100);
        let err = vm.execute(&bytecode, &mut ExprContext::new()).unwrap_err();
        assert_eq!(err, ExprError::StackOverflow);
    }

    #[test]
    fn test_instruction_limit() {
        let mut builder = BytecodeBuilder::new();
        for _ in 0..10 {
            builder.op(Opcode::Nop);
        }
        builder.op(Opcode::PushTrue);
        let bytecode = builder.build();

        let mut vm = ExprVM::with_limits(16, 5);
        let err = vm.execute(&bytecode, &mut ExprContext::new()).unwrap_err();
        assert_eq!(err, ExprError::ExecutionLimit);
    }

    #[test]
    fn test_invalid_opcode() {
        let err = ExprVM::new()
            .execute(&[0xEE], &mut ExprContext::new())
            .unwrap_err();
        assert_eq!(err, ExprError::InvalidOpcode(0xEE));
    }

    #[test]
    fn test_equality_semantics() {
        let five = Value::Number(5.0);
        let five_str = Value::Str("5".to_string());

        assert!(five.loose_eq(&five_str));
        assert!(!five.strict_eq(&five_str));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(!Value::Number(f64::NAN).strict_eq(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_display_matches_script_strings() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Undefined.to_string(), "undefined");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
    }
}
