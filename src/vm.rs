use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chunk::OpCode;
use crate::object::{Heap, ObjHandle, Roots};
use crate::reporter::{Diagnostic, Reporter};
use crate::table::Table;
use crate::value::Value;

const FRAMES_MAX: usize = 64;

struct CallFrame {
    function: ObjHandle,
    ip: usize,
    /// Index into `Vm::stack` of this call's slot 0.
    slots: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// `clock()` is a plain `fn` (not a closure) per `NativeFn`'s signature, so
/// it can't carry captured start-time state; wall-clock seconds since the
/// epoch is close enough to clox's `clock()/CLOCKS_PER_SEC` for the spec's
/// "a Number, non-negative" contract.
fn clock_native(_args: &[Value]) -> Result<Value, String> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(seconds))
}

/// Dispatch loop, call frames, globals, and the heap — the VM half of
/// spec.md §4.4. One `Vm` can run several `interpret` calls in sequence
/// (the REPL reuses it across lines); a runtime error resets the stack and
/// frames but leaves globals and the heap intact.
pub struct Vm {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table,
    heap: Heap,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let mut globals = Table::new();

        let name = heap.alloc_string("clock".to_string(), Roots::empty(&globals));
        let hash = heap.hash_of_string(name);
        let native = heap.alloc_native(name, clock_native, Roots::empty(&globals));
        globals.set(name, hash, Value::Obj(native), |h| heap.hash_of_string(h));

        Vm {
            frames: Vec::new(),
            stack: Vec::new(),
            globals,
            heap,
        }
    }

    pub fn set_stress_gc(&mut self, enabled: bool) {
        self.heap.stress_gc = enabled;
    }

    pub fn gc_count(&self) -> usize {
        self.heap.gc_count
    }

    pub fn object_count(&self) -> usize {
        self.heap.object_count()
    }

    pub fn interpret(
        &mut self,
        source: &str,
        reporter: &mut dyn Reporter,
        out: &mut dyn Write,
    ) -> InterpretResult {
        let function = match crate::compiler::compile(source, &mut self.heap, &self.globals, reporter) {
            Some(f) => f,
            None => return InterpretResult::CompileError,
        };

        #[cfg(feature = "debug-bytecode")]
        disassemble_function(&self.heap, function);

        self.stack.clear();
        self.frames.clear();
        self.stack.push(Value::Obj(function));
        self.frames.push(CallFrame {
            function,
            ip: 0,
            slots: 0,
        });

        self.run(reporter, out)
    }

    // ---- frame & stack access ------------------------------------------

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let function = self.current_frame().function;
        let ip = self.current_frame().ip;
        let byte = self.heap.get_function(function).chunk.read_byte(ip);
        self.current_frame_mut().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let function = self.current_frame().function;
        let ip = self.current_frame().ip;
        let value = self.heap.get_function(function).chunk.read_u16(ip);
        self.current_frame_mut().ip += 2;
        value
    }

    fn read_constant(&self, index: u8) -> Value {
        let function = self.current_frame().function;
        self.heap.get_function(function).chunk.constant(index)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- errors -----------------------------------------------------------

    fn runtime_error(&mut self, reporter: &mut dyn Reporter, message: String) {
        let top_line = {
            let frame = self.current_frame();
            self.heap
                .get_function(frame.function)
                .chunk
                .line_at(frame.ip.saturating_sub(1))
        };
        reporter.error(Diagnostic::new(message, top_line));

        for frame in self.frames.iter().rev() {
            let func = self.heap.get_function(frame.function);
            let line = func.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match func.name {
                Some(n) => self.heap.get_string(n).chars.clone(),
                None => "script".to_string(),
            };
            reporter.error(Diagnostic::new(format!("in {name}"), line));
        }

        self.stack.clear();
        self.frames.clear();
    }

    // ---- arithmetic helpers -------------------------------------------------

    fn binary_numeric(&mut self, reporter: &mut dyn Reporter, op: impl Fn(f64, f64) -> Value) -> bool {
        let (a, b) = (self.peek(1), self.peek(0));
        match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(op(a, b));
                true
            }
            _ => {
                self.runtime_error(reporter, "Operands must be numbers.".to_string());
                false
            }
        }
    }

    fn as_string_handle(value: Value, heap: &Heap) -> Option<ObjHandle> {
        match value {
            Value::Obj(handle) if heap.is_string(handle) => Some(handle),
            _ => None,
        }
    }

    fn add(&mut self, reporter: &mut dyn Reporter) -> bool {
        let (a, b) = (self.peek(1), self.peek(0));
        if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::Number(a + b));
            return true;
        }

        if let (Some(a_handle), Some(b_handle)) = (
            Self::as_string_handle(a, &self.heap),
            Self::as_string_handle(b, &self.heap),
        ) {
            let concatenated = format!(
                "{}{}",
                self.heap.get_string(a_handle).chars,
                self.heap.get_string(b_handle).chars
            );
            self.pop();
            self.pop();
            let frame_functions: Vec<ObjHandle> = self.frames.iter().map(|f| f.function).collect();
            let roots = Roots {
                stack: &self.stack,
                frame_functions: &frame_functions,
                globals: &self.globals,
                compiler_functions: &[],
            };
            let handle = self.heap.alloc_string(concatenated, roots);
            self.push(Value::Obj(handle));
            return true;
        }

        self.runtime_error(reporter, "Operands must be two numbers or two strings.".to_string());
        false
    }

    // ---- calls --------------------------------------------------------------

    fn call_value(&mut self, reporter: &mut dyn Reporter, callee: Value, argc: u8) -> bool {
        if let Value::Obj(handle) = callee {
            if self.heap.is_function(handle) {
                return self.call_function(reporter, handle, argc);
            }
            if self.heap.is_native(handle) {
                return self.call_native(reporter, handle, argc);
            }
        }
        self.runtime_error(reporter, "Can only call functions and native functions.".to_string());
        false
    }

    fn call_function(&mut self, reporter: &mut dyn Reporter, handle: ObjHandle, argc: u8) -> bool {
        let arity = self.heap.get_function(handle).arity;
        if argc != arity {
            self.runtime_error(
                reporter,
                format!("Expected {arity} arguments but got {argc}."),
            );
            return false;
        }
        if self.frames.len() >= FRAMES_MAX {
            self.runtime_error(reporter, "Stack overflow.".to_string());
            return false;
        }
        let slots = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            function: handle,
            ip: 0,
            slots,
        });
        true
    }

    fn call_native(&mut self, reporter: &mut dyn Reporter, handle: ObjHandle, argc: u8) -> bool {
        let function = self.heap.get_native(handle).function;
        let start = self.stack.len() - argc as usize;
        match function(&self.stack[start..]) {
            Ok(value) => {
                self.stack.truncate(start - 1);
                self.push(value);
                true
            }
            Err(message) => {
                self.runtime_error(reporter, message);
                false
            }
        }
    }

    // ---- dispatch loop --------------------------------------------------------

    fn run(&mut self, reporter: &mut dyn Reporter, out: &mut dyn Write) -> InterpretResult {
        loop {
            #[cfg(feature = "debug-trace")]
            self.trace_instruction();

            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(_) => {
                    self.runtime_error(reporter, "Unknown opcode.".to_string());
                    return InterpretResult::RuntimeError;
                }
            };

            match op {
                OpCode::Constant => {
                    let idx = self.read_byte();
                    let value = self.read_constant(idx);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots;
                    let value = self.peek(0);
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let idx = self.read_byte();
                    let name_handle = match self.read_constant(idx) {
                        Value::Obj(h) => h,
                        _ => unreachable!("global name constant must be a string"),
                    };
                    let hash = self.heap.hash_of_string(name_handle);
                    match self.globals.get(name_handle, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let name = self.heap.get_string(name_handle).chars.clone();
                            self.runtime_error(reporter, format!("Undefined variable '{name}'."));
                            return InterpretResult::RuntimeError;
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let idx = self.read_byte();
                    let name_handle = match self.read_constant(idx) {
                        Value::Obj(h) => h,
                        _ => unreachable!("global name constant must be a string"),
                    };
                    let hash = self.heap.hash_of_string(name_handle);
                    let value = self.peek(0);
                    let heap = &self.heap;
                    self.globals.set(name_handle, hash, value, |h| heap.hash_of_string(h));
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let idx = self.read_byte();
                    let name_handle = match self.read_constant(idx) {
                        Value::Obj(h) => h,
                        _ => unreachable!("global name constant must be a string"),
                    };
                    let hash = self.heap.hash_of_string(name_handle);
                    if !self.globals.contains(name_handle, hash) {
                        let name = self.heap.get_string(name_handle).chars.clone();
                        self.runtime_error(reporter, format!("Undefined variable '{name}'."));
                        return InterpretResult::RuntimeError;
                    }
                    let value = self.peek(0);
                    let heap = &self.heap;
                    self.globals.set(name_handle, hash, value, |h| heap.hash_of_string(h));
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    if !self.binary_numeric(reporter, |a, b| Value::Bool(a > b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Less => {
                    if !self.binary_numeric(reporter, |a, b| Value::Bool(a < b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Add => {
                    if !self.add(reporter) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Subtract => {
                    if !self.binary_numeric(reporter, |a, b| Value::Number(a - b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Multiply => {
                    if !self.binary_numeric(reporter, |a, b| Value::Number(a * b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Divide => {
                    if !self.binary_numeric(reporter, |a, b| Value::Number(a / b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.peek(0);
                    match value.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => {
                            self.runtime_error(reporter, "Operand must be a number.".to_string());
                            return InterpretResult::RuntimeError;
                        }
                    }
                }
                OpCode::Print => {
                    let value = self.pop();
                    writeln!(out, "{}", value.display(&self.heap)).expect("write to output");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.current_frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.current_frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    if !self.call_value(reporter, callee, argc) {
                        return InterpretResult::RuntimeError;
                    }
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active frame");
                    if self.frames.is_empty() {
                        self.stack.clear();
                        return InterpretResult::Ok;
                    }
                    self.stack.truncate(frame.slots);
                    self.push(result);
                }
            }
        }
    }

    #[cfg(feature = "debug-trace")]
    fn trace_instruction(&self) {
        eprint!("          ");
        for value in &self.stack {
            eprint!("[ {} ]", value.display(&self.heap));
        }
        eprintln!();
        let frame = self.current_frame();
        let byte = self.heap.get_function(frame.function).chunk.read_byte(frame.ip);
        match OpCode::try_from(byte) {
            Ok(op) => eprintln!("{:04} {op:?}", frame.ip),
            Err(_) => eprintln!("{:04} UNKNOWN({byte})", frame.ip),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "debug-bytecode")]
fn operand_width(op: OpCode) -> usize {
    use OpCode::*;
    match op {
        Nil | True | False | Pop | Equal | Greater | Less | Add | Subtract | Multiply | Divide
        | Not | Negate | Print | Return => 0,
        Constant | GetLocal | SetLocal | GetGlobal | DefineGlobal | SetGlobal | Call => 1,
        Jump | JumpIfFalse | Loop => 2,
    }
}

#[cfg(feature = "debug-bytecode")]
fn disassemble_function(heap: &Heap, handle: ObjHandle) {
    let func = heap.get_function(handle);
    let name = match func.name {
        Some(n) => heap.get_string(n).chars.clone(),
        None => "script".to_string(),
    };
    eprintln!("== {name} ==");

    let mut offset = 0;
    while offset < func.chunk.len() {
        let byte = func.chunk.read_byte(offset);
        match OpCode::try_from(byte) {
            Ok(op) => {
                let width = operand_width(op);
                eprintln!("{offset:04} {op:?}");
                offset += 1 + width;
            }
            Err(_) => {
                eprintln!("{offset:04} UNKNOWN({byte})");
                offset += 1;
            }
        }
    }

    for constant in func.chunk.constants() {
        if let Value::Obj(h) = constant {
            if heap.is_function(*h) {
                disassemble_function(heap, *h);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;

    fn run(source: &str) -> (InterpretResult, String, Vec<String>) {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::default();
        let mut out = Vec::new();
        let result = vm.interpret(source, &mut reporter, &mut out);
        let stdout = String::from_utf8(out).unwrap();
        let errors = reporter.errors.into_iter().map(|d| d.to_string()).collect();
        (result, stdout, errors)
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, stdout, _) = run("print 1 + 2 * 3;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "7\n");
    }

    #[test]
    fn string_concatenation() {
        let (result, stdout, _) = run("var a = \"hi\"; var b = \" there\"; print a + b;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "hi there\n");
    }

    #[test]
    fn while_loop() {
        let (result, stdout, _) = run("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn recursive_fibonacci() {
        let (result, stdout, _) = run(
            "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);",
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "55\n");
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let (result, _stdout, errors) = run("print x;");
        assert_eq!(result, InterpretResult::RuntimeError);
        let joined = errors.join("\n");
        assert!(joined.contains("Undefined variable 'x'."));
        assert!(joined.contains("[line 1] in script"));
    }

    #[test]
    fn clock_returns_a_nonnegative_number() {
        let (result, stdout, _) = run("print clock() >= 0;");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(stdout, "true\n");
    }

    #[test]
    fn stack_overflow_from_unbounded_recursion() {
        let (result, _stdout, errors) = run("fun rec(n) { return rec(n) + 1; } print rec(0);");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert!(errors.iter().any(|e| e.contains("Stack overflow.")));
    }

    #[test]
    fn vm_survives_runtime_error_across_interpret_calls() {
        let mut vm = Vm::new();
        let mut reporter = CollectingReporter::default();
        let mut out = Vec::new();
        assert_eq!(
            vm.interpret("print y;", &mut reporter, &mut out),
            InterpretResult::RuntimeError
        );
        let mut out2 = Vec::new();
        assert_eq!(
            vm.interpret("print 1 + 1;", &mut reporter, &mut out2),
            InterpretResult::Ok
        );
        assert_eq!(String::from_utf8(out2).unwrap(), "2\n");
    }
}
