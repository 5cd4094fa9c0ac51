//! Tree-walking evaluator
//!
//! Interprets the typed AST directly; the second back end, used for fast
//! iteration and as a differential oracle against the compiled path.
//! Control flow unwinds through the `has_return` / `has_break` /
//! `has_continue` flags, checked at every statement-list boundary.

use crate::parser::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Struct(IndexMap<String, Value>),
}

struct FnDef {
    params: Vec<String>,
    body: Node,
}

#[derive(Default)]
struct Frame {
    vars: Vec<(String, Value, bool)>,
}

enum PathSeg {
    Field(String),
    Index(usize),
}

pub struct Interp {
    functions: HashMap<String, Rc<FnDef>>,
    enums: HashMap<String, Vec<(String, i64)>>,
    frames: Vec<Frame>,
    return_value: Value,
    has_return: bool,
    has_break: bool,
    has_continue: bool,
    loop_depth: u32,
    pub had_error: bool,
}

/// Run a program through the evaluator. Returns the entry function's
/// integer return value (0 for non-integer), or 1 on any runtime error.
pub fn run(program: &Node) -> i64 {
    let mut interp = Interp::new();
    interp.run(program)
}

impl Interp {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            enums: HashMap::new(),
            frames: vec![Frame::default()],
            return_value: Value::Void,
            has_return: false,
            has_break: false,
            has_continue: false,
            loop_depth: 0,
            had_error: false,
        }
    }

    fn error(&mut self, msg: &str) {
        if !self.had_error {
            eprintln!("Runtime error: {}", msg);
        }
        self.had_error = true;
    }

    pub fn run(&mut self, program: &Node) -> i64 {
        let decls = match &program.kind {
            NodeKind::Program { decls } => decls,
            _ => {
                self.error("Invalid program");
                return 1;
            }
        };

        // Register functions and enum constants up front.
        for decl in decls {
            match &decl.kind {
                NodeKind::FnDecl {
                    name,
                    params,
                    body: Some(body),
                    is_extern: false,
                    ..
                } => {
                    let param_names = params
                        .iter()
                        .filter_map(|p| match &p.kind {
                            NodeKind::Param { name, .. } => Some(name.clone()),
                            _ => None,
                        })
                        .collect();
                    self.functions.insert(
                        name.clone(),
                        Rc::new(FnDef {
                            params: param_names,
                            body: (**body).clone(),
                        }),
                    );
                }
                NodeKind::EnumDecl { name, variants } => {
                    self.enums.insert(name.clone(), variants.clone());
                }
                _ => {}
            }
        }

        // Preferred entry is main; the REPL driver uses __repl_main__.
        let entry = if self.functions.contains_key("main") {
            "main"
        } else if self.functions.contains_key("__repl_main__") {
            "__repl_main__"
        } else {
            self.error("No main function found");
            return 1;
        };

        let result = self.call_function(entry, Vec::new());
        if self.had_error {
            return 1;
        }
        match result {
            Value::Int(n) => n,
            _ => 0,
        }
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    fn define(&mut self, name: &str, val: Value, is_mut: bool) {
        self.frames
            .last_mut()
            .unwrap()
            .vars
            .push((name.to_string(), val, is_mut));
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        for frame in self.frames.iter().rev() {
            for (n, v, _) in frame.vars.iter().rev() {
                if n == name {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Locate a binding as (frame index, var index, mutability).
    fn find_binding(&self, name: &str) -> Option<(usize, usize, bool)> {
        for (fi, frame) in self.frames.iter().enumerate().rev() {
            for (vi, (n, _, is_mut)) in frame.vars.iter().enumerate().rev() {
                if n == name {
                    return Some((fi, vi, *is_mut));
                }
            }
        }
        None
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call_function(&mut self, name: &str, args: Vec<Value>) -> Value {
        if let Some(result) = self.call_builtin(name, &args) {
            return result;
        }

        let func = match self.functions.get(name) {
            Some(f) => Rc::clone(f),
            None => {
                let msg = format!("Unknown function: {}", name);
                self.error(&msg);
                return Value::Void;
            }
        };

        // Fresh scope stack per call; functions do not close over the
        // caller's locals.
        let saved_frames = std::mem::replace(&mut self.frames, vec![Frame::default()]);
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);

        for (param, arg) in func.params.iter().zip(args.into_iter()) {
            self.define(param, arg, true);
        }

        self.has_return = false;
        self.exec_stmt(&func.body);

        let result = if self.has_return {
            std::mem::replace(&mut self.return_value, Value::Void)
        } else {
            Value::Void
        };
        self.has_return = false;

        self.frames = saved_frames;
        self.loop_depth = saved_depth;
        result
    }

    /// The interpreter's minimal runtime: host bindings recognized before
    /// user functions.
    fn call_builtin(&mut self, name: &str, args: &[Value]) -> Option<Value> {
        match name {
            "puts" | "io_print" | "print" => {
                if let Some(Value::Str(s)) = args.first() {
                    println!("{}", s);
                }
                Some(Value::Void)
            }
            "print_raw" | "printf" => {
                if let Some(Value::Str(s)) = args.first() {
                    print!("{}", s);
                    let _ = std::io::stdout().flush();
                }
                Some(Value::Void)
            }
            "print_int" => {
                if let Some(Value::Int(n)) = args.first() {
                    print!("{}", n);
                    let _ = std::io::stdout().flush();
                }
                Some(Value::Void)
            }
            "println" => {
                println!();
                Some(Value::Void)
            }
            "putchar" => {
                if let Some(Value::Int(n)) = args.first() {
                    if let Some(c) = char::from_u32(*n as u32) {
                        print!("{}", c);
                        let _ = std::io::stdout().flush();
                    }
                }
                Some(Value::Int(0))
            }
            "getchar" => {
                let mut buf = [0u8; 1];
                let n = match std::io::stdin().read(&mut buf) {
                    Ok(1) => buf[0] as i64,
                    _ => -1,
                };
                Some(Value::Int(n))
            }
            "exit" => {
                let code = match args.first() {
                    Some(Value::Int(n)) => *n as i32,
                    _ => 0,
                };
                std::process::exit(code);
            }
            _ => None,
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn unwinding(&self) -> bool {
        self.had_error || self.has_return || self.has_break || self.has_continue
    }

    fn exec_stmt(&mut self, node: &Node) {
        if self.unwinding() {
            return;
        }

        match &node.kind {
            NodeKind::Block { stmts } => {
                self.frames.push(Frame::default());
                for stmt in stmts {
                    if self.unwinding() {
                        break;
                    }
                    self.exec_stmt(stmt);
                }
                self.frames.pop();
            }

            NodeKind::VarDecl {
                name, init, is_mut, ..
            } => {
                let val = self.eval_expr(init);
                self.define(name, val, *is_mut);
            }

            NodeKind::Return { value } => {
                self.return_value = match value {
                    Some(v) => self.eval_expr(v),
                    None => Value::Void,
                };
                self.has_return = true;
            }

            NodeKind::Break => {
                if self.loop_depth == 0 {
                    self.error("'break' outside of loop");
                    return;
                }
                self.has_break = true;
            }

            NodeKind::Continue => {
                if self.loop_depth == 0 {
                    self.error("'continue' outside of loop");
                    return;
                }
                self.has_continue = true;
            }

            NodeKind::If {
                cond,
                then_block,
                elifs,
                else_block,
            } => {
                let c = self.eval_expr(cond);
                if matches!(c, Value::Bool(true)) {
                    self.exec_stmt(then_block);
                    return;
                }
                for (elif_cond, elif_body) in elifs {
                    if self.unwinding() {
                        return;
                    }
                    let c = self.eval_expr(elif_cond);
                    if matches!(c, Value::Bool(true)) {
                        self.exec_stmt(elif_body);
                        return;
                    }
                }
                if let Some(e) = else_block {
                    self.exec_stmt(e);
                }
            }

            NodeKind::While { cond, body } => {
                self.loop_depth += 1;
                while !self.has_return && !self.had_error && !self.has_break {
                    let c = self.eval_expr(cond);
                    if !matches!(c, Value::Bool(true)) {
                        break;
                    }
                    self.exec_stmt(body);
                    self.has_continue = false;
                }
                self.has_break = false;
                self.loop_depth -= 1;
            }

            NodeKind::For {
                var,
                start,
                end,
                body,
            } => {
                let start_v = self.eval_expr(start);
                let end_v = self.eval_expr(end);
                if let (Value::Int(start_i), Value::Int(end_i)) = (start_v, end_v) {
                    self.frames.push(Frame::default());
                    self.define(var, Value::Int(start_i), true);

                    self.loop_depth += 1;
                    loop {
                        let cur = match self.lookup(var) {
                            Some(Value::Int(n)) => *n,
                            _ => break,
                        };
                        if cur >= end_i
                            || self.has_return
                            || self.had_error
                            || self.has_break
                        {
                            break;
                        }
                        self.exec_stmt(body);
                        self.has_continue = false;
                        if let Some((fi, vi, _)) = self.find_binding(var) {
                            if let Value::Int(n) = &mut self.frames[fi].vars[vi].1 {
                                *n = n.wrapping_add(1);
                            }
                        }
                    }
                    self.has_break = false;
                    self.loop_depth -= 1;

                    self.frames.pop();
                }
            }

            NodeKind::ExprStmt { expr } => {
                self.eval_expr(expr);
            }

            _ => {}
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval_expr(&mut self, node: &Node) -> Value {
        if self.had_error || self.has_return {
            return Value::Void;
        }

        match &node.kind {
            NodeKind::IntLit(n) => Value::Int(*n),
            NodeKind::FloatLit(f) => Value::Float(*f),
            NodeKind::BoolLit(b) => Value::Bool(*b),
            NodeKind::StrLit(s) => Value::Str(s.clone()),

            NodeKind::Ident(name) => match self.lookup(name) {
                Some(v) => v.clone(),
                None => {
                    let msg = format!("Undefined variable: {}", name);
                    self.error(&msg);
                    Value::Void
                }
            },

            NodeKind::Binary { op, left, right } => self.eval_binary(*op, left, right),

            NodeKind::Unary { op, operand } => {
                let v = self.eval_expr(operand);
                match (op, v) {
                    (UnaryOp::Neg, Value::Int(n)) => Value::Int(n.wrapping_neg()),
                    (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
                    (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    (UnaryOp::BitNot, Value::Int(n)) => Value::Int(!n),
                    _ => Value::Void,
                }
            }

            NodeKind::Call { callee, args } => {
                let name = match &callee.kind {
                    NodeKind::Ident(n) => n.clone(),
                    _ => {
                        self.error("Invalid function call");
                        return Value::Void;
                    }
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval_expr(arg));
                }
                if self.had_error {
                    return Value::Void;
                }
                self.call_function(&name, arg_values)
            }

            NodeKind::Index { object, index } => {
                let arr = self.eval_expr(object);
                let idx = self.eval_expr(index);
                if let (Value::Array(elems), Value::Int(i)) = (&arr, &idx) {
                    if *i >= 0 && (*i as usize) < elems.len() {
                        return elems[*i as usize].clone();
                    }
                }
                self.error("Invalid array index");
                Value::Void
            }

            NodeKind::Member { object, member } => {
                let obj = self.eval_expr(object);
                if let Value::Struct(fields) = &obj {
                    if let Some(v) = fields.get(member) {
                        return v.clone();
                    }
                }
                self.error("Invalid member access");
                Value::Void
            }

            NodeKind::ArrayInit { elems } => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval_expr(elem));
                }
                Value::Array(values)
            }

            NodeKind::StructInit { fields, .. } => {
                let mut map = IndexMap::with_capacity(fields.len());
                for (name, value) in fields {
                    let v = self.eval_expr(value);
                    map.insert(name.clone(), v);
                }
                Value::Struct(map)
            }

            NodeKind::EnumVariant { enum_name, variant } => {
                match self
                    .enums
                    .get(enum_name)
                    .and_then(|vs| vs.iter().find(|(n, _)| n == variant))
                {
                    Some((_, value)) => Value::Int(*value),
                    None => {
                        let msg =
                            format!("Unknown enum variant: {}::{}", enum_name, variant);
                        self.error(&msg);
                        Value::Void
                    }
                }
            }

            NodeKind::Assign { target, value } => {
                let val = self.eval_expr(value);
                self.assign(target, val.clone());
                val
            }

            _ => Value::Void,
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> Value {
        // Short-circuit evaluation is mandatory: the right operand must
        // not run when the left side decides the result.
        if op == BinaryOp::And {
            let l = self.eval_expr(left);
            if matches!(l, Value::Bool(false)) {
                return Value::Bool(false);
            }
            let r = self.eval_expr(right);
            return match (l, r) {
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(a && b),
                _ => Value::Void,
            };
        }
        if op == BinaryOp::Or {
            let l = self.eval_expr(left);
            if matches!(l, Value::Bool(true)) {
                return Value::Bool(true);
            }
            let r = self.eval_expr(right);
            return match (l, r) {
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(a || b),
                _ => Value::Void,
            };
        }

        let l = self.eval_expr(left);
        let r = self.eval_expr(right);

        if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
            let (a, b) = (*a, *b);
            return match op {
                BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                BinaryOp::Div => Value::Int(if b != 0 { a.wrapping_div(b) } else { 0 }),
                BinaryOp::Mod => Value::Int(if b != 0 { a.wrapping_rem(b) } else { 0 }),
                BinaryOp::Eq => Value::Bool(a == b),
                BinaryOp::Ne => Value::Bool(a != b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                BinaryOp::BitAnd => Value::Int(a & b),
                BinaryOp::BitOr => Value::Int(a | b),
                BinaryOp::BitXor => Value::Int(a ^ b),
                BinaryOp::Shl => Value::Int(a.wrapping_shl(b as u32)),
                BinaryOp::Shr => Value::Int(a.wrapping_shr(b as u32)),
                _ => Value::Void,
            };
        }

        if matches!(l, Value::Float(_)) || matches!(r, Value::Float(_)) {
            let a = match l {
                Value::Float(f) => f,
                Value::Int(n) => n as f64,
                _ => return Value::Void,
            };
            let b = match r {
                Value::Float(f) => f,
                Value::Int(n) => n as f64,
                _ => return Value::Void,
            };
            return match op {
                BinaryOp::Add => Value::Float(a + b),
                BinaryOp::Sub => Value::Float(a - b),
                BinaryOp::Mul => Value::Float(a * b),
                BinaryOp::Div => Value::Float(if b != 0.0 { a / b } else { 0.0 }),
                BinaryOp::Eq => Value::Bool(a == b),
                BinaryOp::Ne => Value::Bool(a != b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Le => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Ge => Value::Bool(a >= b),
                _ => Value::Void,
            };
        }

        if let (Value::Bool(a), Value::Bool(b)) = (&l, &r) {
            return match op {
                BinaryOp::Eq => Value::Bool(a == b),
                BinaryOp::Ne => Value::Bool(a != b),
                _ => Value::Void,
            };
        }

        if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
            return match op {
                BinaryOp::Eq => Value::Bool(a == b),
                BinaryOp::Ne => Value::Bool(a != b),
                _ => Value::Void,
            };
        }

        Value::Void
    }

    // ========================================================================
    // Assignment targets
    // ========================================================================

    fn assign(&mut self, target: &Node, val: Value) {
        let (base, path) = match self.eval_path(target) {
            Some(p) => p,
            None => {
                self.error("Invalid assignment target");
                return;
            }
        };

        let (fi, vi, is_mut) = match self.find_binding(&base) {
            Some(b) => b,
            None => {
                let msg = format!("Undefined variable: {}", base);
                self.error(&msg);
                return;
            }
        };
        if !is_mut {
            let msg = format!("Cannot assign to immutable variable: {}", base);
            self.error(&msg);
            return;
        }

        let mut failure: Option<&'static str> = None;
        {
            let mut slot: Option<&mut Value> = Some(&mut self.frames[fi].vars[vi].1);
            for seg in &path {
                let cur = match slot.take() {
                    Some(s) => s,
                    None => break,
                };
                slot = match seg {
                    PathSeg::Field(name) => match cur {
                        Value::Struct(fields) => fields.get_mut(name),
                        _ => None,
                    },
                    PathSeg::Index(i) => match cur {
                        Value::Array(elems) if *i < elems.len() => Some(&mut elems[*i]),
                        _ => None,
                    },
                };
                if slot.is_none() {
                    failure = Some(match seg {
                        PathSeg::Field(_) => "Invalid member access",
                        PathSeg::Index(_) => "Invalid array index",
                    });
                    break;
                }
            }
            if failure.is_none() {
                if let Some(s) = slot {
                    *s = val;
                }
            }
        }
        if let Some(msg) = failure {
            self.error(msg);
        }
    }

    /// Flatten an assignment target into a base variable plus a path of
    /// field/index steps; index expressions are evaluated here, before
    /// the base is borrowed.
    fn eval_path(&mut self, target: &Node) -> Option<(String, Vec<PathSeg>)> {
        match &target.kind {
            NodeKind::Ident(name) => Some((name.clone(), Vec::new())),
            NodeKind::Member { object, member } => {
                let (base, mut path) = self.eval_path(object)?;
                path.push(PathSeg::Field(member.clone()));
                Some((base, path))
            }
            NodeKind::Index { object, index } => {
                let (base, mut path) = self.eval_path(object)?;
                let idx = self.eval_expr(index);
                match idx {
                    Value::Int(i) if i >= 0 => {
                        path.push(PathSeg::Index(i as usize));
                        Some((base, path))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analyzer, parser};

    fn interp_run(source: &str) -> i64 {
        let (mut program, ok) = parser::parse(source);
        assert!(ok, "parse failed: {}", source);
        assert!(analyzer::analyze(&mut program), "analysis failed");
        run(&program)
    }

    /// Run without the analyzer, for programs that are intentionally
    /// invalid at analysis time but meaningful at runtime.
    fn interp_run_unchecked(source: &str) -> i64 {
        let (program, ok) = parser::parse(source);
        assert!(ok, "parse failed: {}", source);
        run(&program)
    }

    #[test]
    fn returns_int() {
        assert_eq!(interp_run("fn main() -> i32 do\nret 42\nend"), 42);
    }

    #[test]
    fn void_entry_exits_zero() {
        assert_eq!(interp_run("fn main() -> void do\nret\nend"), 0);
    }

    #[test]
    fn arithmetic() {
        assert_eq!(
            interp_run("fn main() -> i32 do\nret 2 + 3 * 4 - 6 / 2\nend"),
            11
        );
    }

    #[test]
    fn function_calls() {
        let src = "fn double(x :: i64) -> i64 do\nret x * 2\nend\n\
                   fn main() -> i32 do\nret double(21)\nend";
        assert_eq!(interp_run(src), 42);
    }

    #[test]
    fn recursion() {
        let src = "fn fib(n :: i64) -> i64 do\n\
                   if n < 2 do\nret n\nend\n\
                   ret fib(n - 1) + fib(n - 2)\nend\n\
                   fn main() -> i32 do\nret fib(10)\nend";
        assert_eq!(interp_run(src), 55);
    }

    #[test]
    fn for_range_half_open() {
        let src = "fn main() -> i32 do\nmut s :: i64 = 0\nfor i in 0..5 do\n\
                   s = s + i\nend\nret s\nend";
        assert_eq!(interp_run(src), 10);
    }

    #[test]
    fn while_break_continue() {
        let src = "fn main() -> i32 do\nmut i :: i64 = 0\nmut s :: i64 = 0\n\
                   while i < 10 do\ni = i + 1\n\
                   if i % 2 == 0 do\ncontinue\nend\n\
                   if i > 7 do\nbreak\nend\n\
                   s = s + i\nend\nret s\nend";
        // odd values 1,3,5,7 accumulate, then i=9 breaks before adding
        assert_eq!(interp_run(src), 16);
    }

    #[test]
    fn break_outside_loop_is_runtime_error() {
        assert_eq!(interp_run("fn main() -> i32 do\nbreak\nret 0\nend"), 1);
    }

    #[test]
    fn short_circuit_and_or() {
        let src = "fn trap() -> bool do\nret (1/0) == 0\nend\n\
                   fn main() -> i32 do\n\
                   if false and trap() do\nret 1\nend\n\
                   if true or trap() do\nret 0\nend\n\
                   ret 2\nend";
        assert_eq!(interp_run(src), 0);
    }

    #[test]
    fn struct_out_of_order_init() {
        let src = "struct Point do\nx :: i64\ny :: i64\nend\n\
                   fn main() -> i32 do\nlet p = Point { y = 10, x = 5 }\n\
                   ret (p.x - 5) + (p.y - 10)\nend";
        assert_eq!(interp_run(src), 0);
    }

    #[test]
    fn member_and_index_assignment() {
        let src = "struct Point do\nx :: i64\ny :: i64\nend\n\
                   fn main() -> i32 do\n\
                   mut p = Point { x = 1, y = 2 }\n\
                   p.x = 10\n\
                   mut a = [1, 2, 3]\n\
                   a[2] = 30\n\
                   ret p.x + a[2]\nend";
        assert_eq!(interp_run(src), 40);
    }

    #[test]
    fn immutable_assignment_is_runtime_error() {
        // Analyzer rejects this too; the evaluator enforces independently.
        assert_eq!(
            interp_run_unchecked("fn main() -> i32 do\nlet x = 1\nx = 2\nret 0\nend"),
            1
        );
    }

    #[test]
    fn shadowing_restores_on_scope_exit() {
        let src = "fn main() -> i32 do\nlet x = 1\n\
                   if true do\nlet x = 100\nend\n\
                   ret x\nend";
        assert_eq!(interp_run(src), 1);
    }

    #[test]
    fn enum_values() {
        let src = "enum Color do\nRed\nGreen = 5\nBlue\nend\n\
                   fn main() -> i32 do\nlet c = Color::Blue\nret c\nend";
        assert_eq!(interp_run(src), 6);
    }

    #[test]
    fn int_extremes_survive_evaluation() {
        let src = "fn main() -> i32 do\n\
                   let hi = 9223372036854775807\n\
                   let lo = -9223372036854775808\n\
                   if hi == lo + -1 do\nret 1\nend\n\
                   ret 0\nend";
        // i64::MAX == i64::MIN - 1 under wrapping arithmetic
        assert_eq!(interp_run(src), 1);
    }

    #[test]
    fn invalid_index_is_runtime_error() {
        let src = "fn main() -> i32 do\nlet a = [1, 2]\nret a[5]\nend";
        assert_eq!(interp_run(src), 1);
    }

    #[test]
    fn repl_entry_fallback() {
        let src = "fn __repl_main__() -> i64 do\nret 7\nend";
        assert_eq!(interp_run(src), 7);
    }

    #[test]
    fn elif_chain() {
        let src = "fn classify(n :: i64) -> i64 do\n\
                   if n < 0 do\nret 0 - 1\nelif n == 0 do\nret 0\n\
                   elif n < 10 do\nret 1\nelse do\nret 2\nend\nend\n\
                   fn main() -> i32 do\n\
                   ret classify(-5) + classify(0) + classify(5) + classify(50)\nend";
        assert_eq!(interp_run(src), 2);
    }

    #[test]
    fn pipe_operator() {
        let src = "fn double(x :: i64) -> i64 do\nret x * 2\nend\n\
                   fn inc(x :: i64) -> i64 do\nret x + 1\nend\n\
                   fn main() -> i32 do\nret 10 |> double |> inc\nend";
        assert_eq!(interp_run(src), 21);
    }
}
