use crate::chunk::{Chunk, OpCode};
use crate::object::{Heap, ObjHandle, Roots};
use crate::reporter::{Diagnostic, Reporter};
use crate::table::Table;
use crate::token::{Token, TokenType};
use crate::tokenizer::Tokenizer;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    Script,
    Function,
}

struct Local {
    name: String,
    /// -1 means "declared but its initializer hasn't finished compiling yet".
    depth: i32,
}

struct FuncState {
    function: ObjHandle,
    function_type: FunctionType,
    locals: Vec<Local>,
    scope_depth: i32,
}

/// A single-pass Pratt compiler: it consumes tokens and emits bytecode
/// directly, with no intermediate AST (spec.md §1/§4.3). `chain` models
/// the compiler-chain root source of spec.md §4.5/§9 — each nested
/// function being compiled is a GC root until `function()` finishes it.
pub struct Compiler<'a> {
    tokenizer: Tokenizer<'a>,
    source: &'a str,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    reporter: &'a mut dyn Reporter,
    heap: &'a mut Heap,
    globals: &'a Table,
    chain: Vec<FuncState>,
}

/// Compiles `source` into a top-level script function, or `None` if any
/// compile error was reported (spec.md §4.3: "compile returns 'no
/// function' so the VM never runs"). `globals` is read-only here — it
/// exists purely so in-progress GC can see what the VM has already
/// defined across earlier REPL lines.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    globals: &Table,
    reporter: &mut dyn Reporter,
) -> Option<ObjHandle> {
    let mut compiler = Compiler::new(source, heap, globals, reporter);
    compiler.advance();
    while !compiler.check(TokenType::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenType::Eof, "Expect end of expression.");
    compiler.emit_return();

    let function = compiler.chain.pop().expect("script frame").function;
    if compiler.had_error {
        None
    } else {
        Some(function)
    }
}

impl<'a> Compiler<'a> {
    fn new(
        source: &'a str,
        heap: &'a mut Heap,
        globals: &'a Table,
        reporter: &'a mut dyn Reporter,
    ) -> Self {
        let dummy = Token::new(TokenType::Eof, String::new(), 0, 0, 0);
        let script_handle = {
            let roots = Roots::empty(globals);
            heap.alloc_function(None, roots)
        };

        Compiler {
            tokenizer: Tokenizer::new(source),
            source,
            previous: dummy.clone(),
            current: dummy,
            had_error: false,
            panic_mode: false,
            reporter,
            heap,
            globals,
            chain: vec![FuncState {
                function: script_handle,
                function_type: FunctionType::Script,
                locals: vec![Local {
                    name: String::new(),
                    depth: 0,
                }],
                scope_depth: 0,
            }],
        }
    }

    // ---- token stream ---------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.tokenizer.scan_token();
            if self.current.typ != TokenType::Error {
                break;
            }
            let message = self.current.lexeme.clone();
            self.error_at_current(message);
        }
    }

    fn check(&self, typ: TokenType) -> bool {
        self.current.typ == typ
    }

    fn match_token(&mut self, typ: TokenType) -> bool {
        if !self.check(typ) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, typ: TokenType, message: &str) {
        if self.current.typ == typ {
            self.advance();
        } else {
            self.error_at_current(message.to_string());
        }
    }

    // ---- diagnostics ------------------------------------------------------

    fn line_text_and_column(&self, token: &Token) -> (String, usize) {
        let mut offset = 0usize;
        for (i, line) in self.source.split('\n').enumerate() {
            if i as u32 + 1 == token.line {
                return (line.to_string(), token.start.saturating_sub(offset));
            }
            offset += line.len() + 1;
        }
        (String::new(), 0)
    }

    fn error_at(&mut self, token: Token, message: String) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let (line_text, column) = self.line_text_and_column(&token);
        let diag = Diagnostic::new(message, token.line).with_span(&line_text, column, token.length);
        self.reporter.error(diag);
    }

    fn error(&mut self, message: impl Into<String>) {
        let token = self.previous.clone();
        self.error_at(token, message.into());
    }

    fn error_at_current(&mut self, message: impl Into<String>) {
        let token = self.current.clone();
        self.error_at(token, message.into());
    }

    // ---- bytecode emission -----------------------------------------------

    fn current_func_handle(&self) -> ObjHandle {
        self.chain.last().expect("active function").function
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        let handle = self.current_func_handle();
        &mut self.heap.get_function_mut(handle).chunk
    }

    fn current_chunk_len(&self) -> usize {
        self.heap.get_function(self.current_func_handle()).chunk.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let result = self.current_chunk_mut().add_constant(value);
        match result {
            Ok(index) => {
                self.emit_op(OpCode::Constant);
                self.emit_byte(index);
            }
            Err(_) => self.error("Too many constants in one chunk."),
        }
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.current_chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.current_chunk_mut().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    // ---- interning / roots -------------------------------------------------

    fn compiler_roots(&self) -> Vec<ObjHandle> {
        self.chain.iter().map(|f| f.function).collect()
    }

    fn intern(&mut self, s: String) -> ObjHandle {
        let compiler_functions = self.compiler_roots();
        let roots = Roots {
            stack: &[],
            frame_functions: &[],
            globals: self.globals,
            compiler_functions: &compiler_functions,
        };
        self.heap.alloc_string(s, roots)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let handle = self.intern(name.to_string());
        match self.current_chunk_mut().add_constant(Value::Obj(handle)) {
            Ok(index) => index,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    // ---- scope & locals -----------------------------------------------------

    fn begin_scope(&mut self) {
        self.chain.last_mut().expect("active function").scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = {
            let func = self.chain.last_mut().expect("active function");
            func.scope_depth -= 1;
            func.scope_depth
        };
        loop {
            let should_pop = matches!(
                self.chain.last().expect("active function").locals.last(),
                Some(local) if local.depth > depth
            );
            if !should_pop {
                break;
            }
            self.chain.last_mut().unwrap().locals.pop();
            self.emit_op(OpCode::Pop);
        }
    }

    fn add_local(&mut self, name: String) {
        let too_many = self.chain.last().unwrap().locals.len() >= 256;
        if too_many {
            self.error("Too many local variables in function.");
            return;
        }
        self.chain
            .last_mut()
            .unwrap()
            .locals
            .push(Local { name, depth: -1 });
    }

    fn declare_variable(&mut self) {
        let scope_depth = self.chain.last().unwrap().scope_depth;
        if scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme.clone();
        let duplicate = {
            let func = self.chain.last().unwrap();
            let mut found = false;
            for local in func.locals.iter().rev() {
                if local.depth != -1 && local.depth < scope_depth {
                    break;
                }
                if local.name == name {
                    found = true;
                    break;
                }
            }
            found
        };
        if duplicate {
            self.error("Already variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let func = self.chain.last_mut().unwrap();
        if func.scope_depth == 0 {
            return;
        }
        let depth = func.scope_depth;
        if let Some(local) = func.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let found = {
            let func = self.chain.last().unwrap();
            func.locals
                .iter()
                .enumerate()
                .rev()
                .find(|(_, local)| local.name == name)
                .map(|(i, local)| (i as u8, local.depth))
        };
        match found {
            Some((slot, depth)) => {
                if depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                Some(slot)
            }
            None => None,
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);
        self.declare_variable();
        if self.chain.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme.clone();
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global: u8) {
        if self.chain.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn named_variable(&mut self, name: String, can_assign: bool) {
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(&name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else {
            let arg = self.identifier_constant(&name);
            (OpCode::GetGlobal, OpCode::SetGlobal, arg)
        };

        if can_assign && self.match_token(TokenType::Equal) {
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    // ---- Pratt parser -------------------------------------------------------

    fn precedence_of(&self, typ: TokenType) -> Precedence {
        use TokenType::*;
        match typ {
            Or => Precedence::Or,
            And => Precedence::And,
            BangEqual | EqualEqual => Precedence::Equality,
            Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
            Plus | Minus => Precedence::Term,
            Slash | Star => Precedence::Factor,
            LeftParen => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn prefix_rule(&mut self, typ: TokenType, can_assign: bool) -> bool {
        match typ {
            TokenType::LeftParen => self.grouping(),
            TokenType::Minus | TokenType::Bang => self.unary(),
            TokenType::Number => self.number(),
            TokenType::String => self.string_literal(),
            TokenType::True | TokenType::False | TokenType::Nil => self.literal(),
            TokenType::Identifier => self.variable(can_assign),
            _ => return false,
        }
        true
    }

    fn infix_rule(&mut self, typ: TokenType) {
        use TokenType::*;
        match typ {
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and_(),
            Or => self.or_(),
            LeftParen => self.call(),
            _ => {}
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        let previous_typ = self.previous.typ;
        if !self.prefix_rule(previous_typ, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= self.precedence_of(self.current.typ) {
            self.advance();
            let previous_typ = self.previous.typ;
            self.infix_rule(previous_typ);
        }

        if can_assign && self.match_token(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn number(&mut self) {
        let value = self.previous.lexeme.parse::<f64>().unwrap_or(f64::NAN);
        self.emit_constant(Value::Number(value));
    }

    fn string_literal(&mut self) {
        let lexeme = &self.previous.lexeme;
        let contents = lexeme[1..lexeme.len() - 1].to_string();
        let handle = self.intern(contents);
        self.emit_constant(Value::Obj(handle));
    }

    fn literal(&mut self) {
        match self.previous.typ {
            TokenType::True => self.emit_op(OpCode::True),
            TokenType::False => self.emit_op(OpCode::False),
            TokenType::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal() called for a non-literal token"),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op_type = self.previous.typ;
        self.parse_precedence(Precedence::Unary);
        match op_type {
            TokenType::Minus => self.emit_op(OpCode::Negate),
            TokenType::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() called for a non-unary token"),
        }
    }

    fn binary(&mut self) {
        let op_type = self.previous.typ;
        let rule_prec = self.precedence_of(op_type);
        self.parse_precedence(rule_prec.next());
        match op_type {
            TokenType::Plus => self.emit_op(OpCode::Add),
            TokenType::Minus => self.emit_op(OpCode::Subtract),
            TokenType::Star => self.emit_op(OpCode::Multiply),
            TokenType::Slash => self.emit_op(OpCode::Divide),
            TokenType::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenType::EqualEqual => self.emit_op(OpCode::Equal),
            TokenType::Greater => self.emit_op(OpCode::Greater),
            TokenType::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenType::Less => self.emit_op(OpCode::Less),
            TokenType::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() called for a non-binary token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.clone();
        self.named_variable(name, can_assign);
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    // ---- statements & declarations ------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else if self.match_token(TokenType::Fun) {
            self.fun_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenType::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType) {
        let name = self.previous.lexeme.clone();
        let name_handle = self.intern(name);
        let function_handle = {
            let compiler_functions = self.compiler_roots();
            let roots = Roots {
                stack: &[],
                frame_functions: &[],
                globals: self.globals,
                compiler_functions: &compiler_functions,
            };
            self.heap.alloc_function(Some(name_handle), roots)
        };

        self.chain.push(FuncState {
            function: function_handle,
            function_type,
            locals: vec![Local {
                name: String::new(),
                depth: 0,
            }],
            scope_depth: 0,
        });

        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                let arity = self.heap.get_function(function_handle).arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.heap.get_function_mut(function_handle).arity = arity + 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();
        self.emit_return();

        self.chain.pop();

        let idx = match self.current_chunk_mut().add_constant(Value::Obj(function_handle)) {
            Ok(i) => i,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        };
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
    }

    fn statement(&mut self) {
        if self.match_token(TokenType::Print) {
            self.print_statement();
        } else if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else if self.match_token(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenType::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_len();
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk_len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenType::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.chain.last().unwrap().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenType::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.typ != TokenType::Eof {
            if self.previous.typ == TokenType::Semicolon {
                return;
            }
            match self.current.typ {
                TokenType::Class
                | TokenType::Fun
                | TokenType::Var
                | TokenType::For
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return => return,
                _ => {}
            }
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;

    fn compile_ok(source: &str) -> bool {
        let mut heap = Heap::new();
        let globals = Table::new();
        let mut reporter = CollectingReporter::default();
        compile(source, &mut heap, &globals, &mut reporter).is_some()
    }

    fn compile_errors(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        let globals = Table::new();
        let mut reporter = CollectingReporter::default();
        compile(source, &mut heap, &globals, &mut reporter);
        reporter.errors.into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn compiles_arithmetic_statement() {
        assert!(compile_ok("print 1 + 2 * 3;"));
    }

    #[test]
    fn redeclaring_local_in_same_scope_errors() {
        let errors = compile_errors("{ var a = 1; var a = 2; }");
        assert!(errors
            .iter()
            .any(|m| m.contains("Already variable with this name in this scope.")));
    }

    #[test]
    fn self_reference_in_initializer_errors() {
        let errors = compile_errors("{ var a = a; }");
        assert!(errors
            .iter()
            .any(|m| m.contains("Can't read local variable in its own initializer.")));
    }

    #[test]
    fn return_from_top_level_errors() {
        let errors = compile_errors("return 1;");
        assert!(errors.iter().any(|m| m.contains("Can't return from top-level code.")));
    }

    #[test]
    fn invalid_assignment_target_errors() {
        let errors = compile_errors("a + b = c;");
        assert!(errors.iter().any(|m| m.contains("Invalid assignment target.")));
    }

    #[test]
    fn too_many_locals_errors() {
        let mut source = String::from("{\n");
        for i in 0..257 {
            source.push_str(&format!("var v{i} = {i};\n"));
        }
        source.push('}');
        let errors = compile_errors(&source);
        assert!(errors
            .iter()
            .any(|m| m.contains("Too many local variables in function.")));
    }

    #[test]
    fn function_and_call_compile() {
        assert!(compile_ok(
            "fun fib(n) { if (n < 2) return n; return fib(n-1) + fib(n-2); } print fib(10);"
        ));
    }
}
