//! Semantic analysis for the null language
//!
//! Two passes over the AST: the first collects top-level declarations
//! (functions, structs, enums, extern functions) into the global scope;
//! the second walks function bodies, resolving names, inferring types and
//! enforcing mutability. Resolved types are written into the AST's `ty`
//! slots in place; the back ends read them without further resolution.
//!
//! Scopes live in an arena indexed by `ScopeId`. Popping a scope only
//! moves the current pointer to its parent; every scope stays allocated
//! until the analyzer is dropped, so symbols can be referenced for the
//! whole analysis without dangling.

use crate::error::{self, SourceContext};
use crate::parser::ast::{BinaryOp, Node, NodeKind, Type, UnaryOp};
use indexmap::IndexMap;
use std::collections::HashMap;

pub type ScopeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Param,
    Function,
    Struct,
    Enum,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub is_mut: bool,
    pub is_extern: bool,
    pub line: u32,
    pub column: u32,
}

struct Scope {
    symbols: HashMap<String, Symbol>,
    parent: Option<ScopeId>,
}

pub struct Analyzer {
    scopes: Vec<Scope>,
    current: ScopeId,
    structs: IndexMap<String, Type>,
    enums: IndexMap<String, Type>,
    source_lines: Vec<String>,
    pub had_error: bool,
}

/// Analyze a program in place. Returns true when no errors were found.
pub fn analyze(program: &mut Node) -> bool {
    let mut analyzer = Analyzer::new();
    analyzer.analyze(program)
}

/// Like [`analyze`], with the source text available so diagnostics can
/// show the offending line.
pub fn analyze_with_source(program: &mut Node, source: &str) -> bool {
    let mut analyzer = Analyzer::new();
    analyzer.source_lines = source.lines().map(String::from).collect();
    analyzer.analyze(program)
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                symbols: HashMap::new(),
                parent: None,
            }],
            current: 0,
            structs: IndexMap::new(),
            enums: IndexMap::new(),
            source_lines: Vec::new(),
            had_error: false,
        }
    }

    /// Registered struct types in declaration order (name -> full type).
    pub fn struct_types(&self) -> &IndexMap<String, Type> {
        &self.structs
    }

    fn error(&mut self, node: &Node, msg: &str) {
        self.had_error = true;
        let source_line = self
            .source_lines
            .get((node.line as usize).saturating_sub(1))
            .map(|s| s.as_str());
        let ctx = SourceContext {
            line: node.line,
            column: node.column,
            lexeme: None,
            source_line,
            caret_len: 1,
        };
        error::report(&ctx, msg);
    }

    // ========================================================================
    // Scopes
    // ========================================================================

    fn push_scope(&mut self) {
        let id = self.scopes.len();
        self.scopes.push(Scope {
            symbols: HashMap::new(),
            parent: Some(self.current),
        });
        self.current = id;
    }

    fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    fn define(&mut self, sym: Symbol) {
        self.scopes[self.current]
            .symbols
            .insert(sym.name.clone(), sym);
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        let mut scope = Some(self.current);
        while let Some(id) = scope {
            if let Some(sym) = self.scopes[id].symbols.get(name) {
                return Some(sym);
            }
            scope = self.scopes[id].parent;
        }
        None
    }

    fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current].symbols.get(name)
    }

    // ========================================================================
    // Entry
    // ========================================================================

    pub fn analyze(&mut self, program: &mut Node) -> bool {
        let decls = match &mut program.kind {
            NodeKind::Program { decls } => decls,
            _ => return false,
        };

        // First pass: collect top-level declarations.
        for decl in decls.iter() {
            self.collect_decl(decl);
        }

        // Second pass: analyze bodies.
        let mut decls = std::mem::take(decls);
        for decl in decls.iter_mut() {
            self.analyze_node(decl);
        }
        if let NodeKind::Program { decls: slot } = &mut program.kind {
            *slot = decls;
        }

        !self.had_error
    }

    fn collect_decl(&mut self, decl: &Node) {
        match &decl.kind {
            NodeKind::FnDecl {
                name,
                params,
                ret_type,
                is_extern,
                ..
            } => {
                self.collect_fn(decl, name, params, ret_type, *is_extern);
            }
            NodeKind::StructDecl { name, fields } => {
                if self.lookup_local(name).is_some() {
                    self.error(decl, "Duplicate struct declaration.");
                    return;
                }
                let ty = Type::Struct {
                    name: name.clone(),
                    fields: fields.clone(),
                };
                self.structs.insert(name.clone(), ty.clone());
                self.define(Symbol {
                    name: name.clone(),
                    kind: SymbolKind::Struct,
                    ty,
                    is_mut: false,
                    is_extern: false,
                    line: decl.line,
                    column: decl.column,
                });
            }
            NodeKind::EnumDecl { name, variants } => {
                if self.lookup_local(name).is_some() {
                    self.error(decl, "Duplicate enum declaration.");
                    return;
                }
                let ty = Type::Enum {
                    name: name.clone(),
                    variants: variants.clone(),
                };
                self.enums.insert(name.clone(), ty.clone());
                self.define(Symbol {
                    name: name.clone(),
                    kind: SymbolKind::Enum,
                    ty,
                    is_mut: false,
                    is_extern: false,
                    line: decl.line,
                    column: decl.column,
                });
            }
            NodeKind::Extern { fns, .. } => {
                for f in fns {
                    if let NodeKind::FnDecl {
                        name,
                        params,
                        ret_type,
                        ..
                    } = &f.kind
                    {
                        self.collect_fn(f, name, params, ret_type, true);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_fn(
        &mut self,
        decl: &Node,
        name: &str,
        params: &[Node],
        ret_type: &Type,
        is_extern: bool,
    ) {
        if self.lookup_local(name).is_some() {
            self.error(decl, "Duplicate function declaration.");
            return;
        }
        let param_types = params
            .iter()
            .map(|p| match &p.kind {
                NodeKind::Param { param_type, .. } => param_type.clone(),
                _ => Type::Unknown,
            })
            .collect();
        self.define(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            ty: Type::Fn {
                ret: Box::new(ret_type.clone()),
                params: param_types,
            },
            is_mut: false,
            is_extern,
            line: decl.line,
            column: decl.column,
        });
    }

    // ========================================================================
    // Second pass
    // ========================================================================

    fn analyze_node(&mut self, node: &mut Node) {
        match &node.kind {
            NodeKind::FnDecl { .. } => self.analyze_fn_decl(node),
            NodeKind::StructDecl { .. }
            | NodeKind::EnumDecl { .. }
            | NodeKind::Use { .. }
            | NodeKind::Extern { .. } => {}
            _ => self.analyze_stmt(node),
        }
    }

    fn analyze_fn_decl(&mut self, node: &mut Node) {
        let (line, column) = (node.line, node.column);
        if let NodeKind::FnDecl {
            params,
            body,
            is_extern,
            ..
        } = &mut node.kind
        {
            if *is_extern || body.is_none() {
                return;
            }

            let params_snapshot: Vec<(String, Type)> = params
                .iter()
                .filter_map(|p| match &p.kind {
                    NodeKind::Param { name, param_type } => {
                        Some((name.clone(), param_type.clone()))
                    }
                    _ => None,
                })
                .collect();
            let mut body = body.take();

            self.push_scope();
            for (pname, pty) in params_snapshot {
                self.define(Symbol {
                    name: pname.clone(),
                    kind: SymbolKind::Param,
                    ty: pty,
                    is_mut: false,
                    is_extern: false,
                    line,
                    column,
                });
            }

            if let Some(b) = body.as_deref_mut() {
                self.analyze_block(b);
            }

            self.pop_scope();

            if let NodeKind::FnDecl { body: slot, .. } = &mut node.kind {
                *slot = body;
            }
        }
    }

    fn analyze_block(&mut self, node: &mut Node) {
        self.push_scope();
        if let NodeKind::Block { stmts } = &mut node.kind {
            let mut stmts = std::mem::take(stmts);
            for stmt in stmts.iter_mut() {
                self.analyze_stmt(stmt);
            }
            if let NodeKind::Block { stmts: slot } = &mut node.kind {
                *slot = stmts;
            }
        }
        self.pop_scope();
    }

    fn analyze_var_decl(&mut self, node: &mut Node) {
        let (line, column) = (node.line, node.column);

        let (name, is_mut) = match &node.kind {
            NodeKind::VarDecl { name, is_mut, .. } => (name.clone(), *is_mut),
            _ => return,
        };

        if self.lookup_local(&name).is_some() {
            self.error(node, "Variable already declared in this scope.");
            return;
        }

        let inferred = if let NodeKind::VarDecl { init, .. } = &mut node.kind {
            let mut init = std::mem::replace(
                init,
                Box::new(Node::new(NodeKind::IntLit(0), line, column)),
            );
            let ty = self.analyze_expr(&mut init);
            if let NodeKind::VarDecl { init: slot, .. } = &mut node.kind {
                *slot = init;
            }
            ty
        } else {
            None
        };

        let final_ty = if let NodeKind::VarDecl { var_type, .. } = &mut node.kind {
            match var_type {
                Some(t) => Some(self.resolve_named(t.clone())),
                None => inferred,
            }
        } else {
            None
        };

        let ty = match final_ty {
            Some(t) => t,
            None => {
                self.error(node, "Cannot infer type for variable.");
                Type::Unknown
            }
        };

        if let NodeKind::VarDecl { var_type, .. } = &mut node.kind {
            *var_type = Some(ty.clone());
        }
        node.ty = Some(ty.clone());

        self.define(Symbol {
            name,
            kind: SymbolKind::Var,
            ty,
            is_mut,
            is_extern: false,
            line,
            column,
        });
    }

    /// Replace a bare named type reference with the registered struct or
    /// enum type, when one exists.
    fn resolve_named(&self, ty: Type) -> Type {
        match ty {
            Type::Struct { ref name, ref fields } if fields.is_empty() => {
                if let Some(t) = self.structs.get(name) {
                    t.clone()
                } else if let Some(t) = self.enums.get(name) {
                    t.clone()
                } else {
                    ty
                }
            }
            Type::Ptr(inner) => Type::Ptr(Box::new(self.resolve_named(*inner))),
            Type::Array { elem, size } => Type::Array {
                elem: Box::new(self.resolve_named(*elem)),
                size,
            },
            Type::Slice(elem) => Type::Slice(Box::new(self.resolve_named(*elem))),
            other => other,
        }
    }

    fn analyze_stmt(&mut self, node: &mut Node) {
        match &mut node.kind {
            NodeKind::VarDecl { .. } => self.analyze_var_decl(node),
            NodeKind::Block { .. } => self.analyze_block(node),
            NodeKind::Return { value } => {
                if let Some(v) = value.as_deref_mut() {
                    self.analyze_expr(v);
                }
            }
            NodeKind::Break | NodeKind::Continue => {}
            NodeKind::If {
                cond,
                then_block,
                elifs,
                else_block,
            } => {
                self.analyze_expr(cond);
                let mut then_block = std::mem::replace(
                    then_block,
                    Box::new(Node::new(NodeKind::Block { stmts: vec![] }, 0, 0)),
                );
                let mut elifs_taken = std::mem::take(elifs);
                let mut else_taken = else_block.take();

                self.analyze_block(&mut then_block);
                for (c, b) in elifs_taken.iter_mut() {
                    self.analyze_expr(c);
                    self.analyze_block(b);
                }
                if let Some(e) = else_taken.as_deref_mut() {
                    self.analyze_block(e);
                }

                if let NodeKind::If {
                    then_block: t,
                    elifs: e,
                    else_block: el,
                    ..
                } = &mut node.kind
                {
                    *t = then_block;
                    *e = elifs_taken;
                    *el = else_taken;
                }
            }
            NodeKind::While { cond, body } => {
                self.analyze_expr(cond);
                let mut body = std::mem::replace(
                    body,
                    Box::new(Node::new(NodeKind::Block { stmts: vec![] }, 0, 0)),
                );
                self.analyze_block(&mut body);
                if let NodeKind::While { body: slot, .. } = &mut node.kind {
                    *slot = body;
                }
            }
            NodeKind::For { .. } => self.analyze_for(node),
            NodeKind::ExprStmt { expr } => {
                self.analyze_expr(expr);
            }
            _ => {
                self.analyze_expr(node);
            }
        }
    }

    fn analyze_for(&mut self, node: &mut Node) {
        let (line, column) = (node.line, node.column);
        if let NodeKind::For {
            var, start, end, body, ..
        } = &mut node.kind
        {
            let var = var.clone();
            let mut start = std::mem::replace(
                start,
                Box::new(Node::new(NodeKind::IntLit(0), 0, 0)),
            );
            let mut end_expr = std::mem::replace(
                end,
                Box::new(Node::new(NodeKind::IntLit(0), 0, 0)),
            );
            let mut body = std::mem::replace(
                body,
                Box::new(Node::new(NodeKind::Block { stmts: vec![] }, 0, 0)),
            );

            self.push_scope();
            let start_ty = self.analyze_expr(&mut start);
            self.analyze_expr(&mut end_expr);

            let iter_ty = start_ty.unwrap_or(Type::I64);
            self.define(Symbol {
                name: var,
                kind: SymbolKind::Var,
                ty: iter_ty,
                is_mut: false,
                is_extern: false,
                line,
                column,
            });

            self.analyze_block(&mut body);
            self.pop_scope();

            if let NodeKind::For {
                start: s,
                end: e,
                body: b,
                ..
            } = &mut node.kind
            {
                *s = start;
                *e = end_expr;
                *b = body;
            }
        }
    }

    fn analyze_assign(&mut self, node: &mut Node) {
        if let NodeKind::Assign { target, value } = &mut node.kind {
            let mut target = std::mem::replace(
                target,
                Box::new(Node::new(NodeKind::IntLit(0), 0, 0)),
            );
            let mut value = std::mem::replace(
                value,
                Box::new(Node::new(NodeKind::IntLit(0), 0, 0)),
            );
            self.analyze_expr(&mut target);
            self.analyze_expr(&mut value);

            // Plain identifier targets must be mutable. Member and index
            // writes check the base identifier where there is one.
            if let Some(base_name) = assign_base_ident(&target) {
                let immutable = self
                    .lookup(&base_name)
                    .map(|sym| !sym.is_mut && sym.kind == SymbolKind::Var)
                    .unwrap_or(false);
                if immutable {
                    self.error(&target, "Cannot assign to immutable variable.");
                }
            }

            if let NodeKind::Assign {
                target: t,
                value: v,
            } = &mut node.kind
            {
                *t = target;
                *v = value;
            }
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn analyze_expr(&mut self, node: &mut Node) -> Option<Type> {
        let ty = match &mut node.kind {
            NodeKind::IntLit(_) => Some(Type::I64),
            NodeKind::FloatLit(_) => Some(Type::F64),
            NodeKind::BoolLit(_) => Some(Type::Bool),
            NodeKind::StrLit(_) => Some(Type::Slice(Box::new(Type::U8))),
            NodeKind::Ident(name) => {
                // Unresolved identifiers are not an error here: the name may
                // be a module reference resolved later by the IR builder.
                let name = name.clone();
                self.lookup(&name).map(|sym| sym.ty.clone())
            }
            NodeKind::Binary { .. } => self.analyze_binary(node),
            NodeKind::Unary { .. } => self.analyze_unary(node),
            NodeKind::Call { .. } => self.analyze_call(node),
            NodeKind::Member { .. } => self.analyze_member(node),
            NodeKind::Index { .. } => self.analyze_index(node),
            NodeKind::StructInit { .. } => self.analyze_struct_init(node),
            NodeKind::ArrayInit { .. } => self.analyze_array_init(node),
            NodeKind::EnumVariant { .. } => self.analyze_enum_variant(node),
            NodeKind::Assign { .. } => {
                self.analyze_assign(node);
                if let NodeKind::Assign { value, .. } = &node.kind {
                    value.ty.clone()
                } else {
                    None
                }
            }
            _ => None,
        };
        if node.ty.is_none() {
            node.ty = ty.clone();
        }
        ty
    }

    fn analyze_binary(&mut self, node: &mut Node) -> Option<Type> {
        let (op, lty, rty) = if let NodeKind::Binary { op, left, right } = &mut node.kind {
            let op = *op;
            let mut left = std::mem::replace(left, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let mut right =
                std::mem::replace(right, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let lty = self.analyze_expr(&mut left);
            let rty = self.analyze_expr(&mut right);
            if let NodeKind::Binary {
                left: l, right: r, ..
            } = &mut node.kind
            {
                *l = left;
                *r = right;
            }
            (op, lty, rty)
        } else {
            return None;
        };

        if let (Some(l), Some(r)) = (&lty, &rty) {
            if !l.is_unknown() && !r.is_unknown() && !compatible_for_op(l, r, op) {
                self.error(node, "Incompatible types for binary operation.");
            }
        }

        match op {
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or => Some(Type::Bool),
            _ => lty,
        }
    }

    fn analyze_unary(&mut self, node: &mut Node) -> Option<Type> {
        if let NodeKind::Unary { op, operand } = &mut node.kind {
            let op = *op;
            let mut operand =
                std::mem::replace(operand, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let oty = self.analyze_expr(&mut operand);
            if let NodeKind::Unary { operand: slot, .. } = &mut node.kind {
                *slot = operand;
            }
            return match op {
                UnaryOp::Neg | UnaryOp::BitNot => oty,
                UnaryOp::Not => Some(Type::Bool),
                UnaryOp::Addr => oty.map(|t| Type::Ptr(Box::new(t))),
                UnaryOp::Deref => match oty {
                    Some(Type::Ptr(inner)) => Some(*inner),
                    _ => None,
                },
            };
        }
        None
    }

    fn analyze_call(&mut self, node: &mut Node) -> Option<Type> {
        let callee_info = if let NodeKind::Call { callee, args } = &mut node.kind {
            let mut callee =
                std::mem::replace(callee, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let mut args = std::mem::take(args);
            self.analyze_expr(&mut callee);
            for arg in args.iter_mut() {
                self.analyze_expr(arg);
            }
            let info = match &callee.kind {
                NodeKind::Ident(name) => Some(name.clone()),
                // Module.name calls are resolved by mangled name in the IR
                // builder; the analyzer leaves them alone.
                _ => None,
            };
            if let NodeKind::Call {
                callee: c, args: a, ..
            } = &mut node.kind
            {
                *c = callee;
                *a = args;
            }
            info
        } else {
            return None;
        };

        if let Some(name) = callee_info {
            let looked_up = self
                .lookup(&name)
                .map(|sym| (sym.kind, sym.ty.clone()));
            match looked_up {
                None => {
                    let msg = format!("Unknown function: {}", name);
                    self.error(node, &msg);
                    None
                }
                Some((kind, _)) if kind != SymbolKind::Function => {
                    self.error(node, "Cannot call non-function.");
                    None
                }
                Some((_, Type::Fn { ret, .. })) => Some(*ret),
                Some(_) => None,
            }
        } else {
            None
        }
    }

    fn analyze_member(&mut self, node: &mut Node) -> Option<Type> {
        if let NodeKind::Member { object, member } = &mut node.kind {
            let member = member.clone();
            let mut object =
                std::mem::replace(object, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let oty = self.analyze_expr(&mut object);
            if let NodeKind::Member { object: slot, .. } = &mut node.kind {
                *slot = object;
            }
            if let Some(Type::Struct { name, .. }) = oty {
                if let Some(Type::Struct { fields, .. }) = self.structs.get(&name) {
                    return fields
                        .iter()
                        .find(|(n, _)| *n == member)
                        .map(|(_, t)| t.clone());
                }
            }
        }
        None
    }

    fn analyze_index(&mut self, node: &mut Node) -> Option<Type> {
        if let NodeKind::Index { object, index } = &mut node.kind {
            let mut object =
                std::mem::replace(object, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let mut index =
                std::mem::replace(index, Box::new(Node::new(NodeKind::IntLit(0), 0, 0)));
            let oty = self.analyze_expr(&mut object);
            self.analyze_expr(&mut index);
            if let NodeKind::Index {
                object: o,
                index: i,
            } = &mut node.kind
            {
                *o = object;
                *i = index;
            }
            return match oty {
                Some(Type::Array { elem, .. }) | Some(Type::Slice(elem)) => Some(*elem),
                _ => None,
            };
        }
        None
    }

    fn analyze_struct_init(&mut self, node: &mut Node) -> Option<Type> {
        let name = if let NodeKind::StructInit { name, fields } = &mut node.kind {
            let name = name.clone();
            let mut fields = std::mem::take(fields);
            for (_, value) in fields.iter_mut() {
                self.analyze_expr(value);
            }
            if let NodeKind::StructInit { fields: slot, .. } = &mut node.kind {
                *slot = fields;
            }
            name
        } else {
            return None;
        };

        let is_struct = self
            .lookup(&name)
            .map(|sym| sym.kind == SymbolKind::Struct)
            .unwrap_or(false);
        if !is_struct {
            let msg = format!("Unknown struct: {}", name);
            self.error(node, &msg);
            return None;
        }

        // Initializer fields must name declared fields.
        let declared = self.structs.get(&name).cloned();
        if let (Some(Type::Struct { fields: decl_fields, .. }), NodeKind::StructInit { fields, .. }) =
            (declared, &node.kind)
        {
            let field_names: Vec<String> = fields.iter().map(|(n, _)| n.clone()).collect();
            for fname in &field_names {
                if !decl_fields.iter().any(|(n, _)| n == fname) {
                    let msg = format!("Unknown field '{}' in struct initializer.", fname);
                    self.error(node, &msg);
                }
            }
        }

        self.structs.get(&name).cloned().or(Some(Type::Struct {
            name,
            fields: Vec::new(),
        }))
    }

    fn analyze_array_init(&mut self, node: &mut Node) -> Option<Type> {
        if let NodeKind::ArrayInit { elems } = &mut node.kind {
            let mut elems = std::mem::take(elems);
            let mut first_ty = None;
            for (i, elem) in elems.iter_mut().enumerate() {
                let t = self.analyze_expr(elem);
                if i == 0 {
                    first_ty = t;
                }
            }
            let count = elems.len();
            if let NodeKind::ArrayInit { elems: slot } = &mut node.kind {
                *slot = elems;
            }
            return first_ty.map(|elem| Type::Array {
                elem: Box::new(elem),
                size: count as i32,
            });
        }
        None
    }

    fn analyze_enum_variant(&mut self, node: &mut Node) -> Option<Type> {
        if let NodeKind::EnumVariant { enum_name, variant } = &node.kind {
            let enum_name = enum_name.clone();
            let variant = variant.clone();
            match self.enums.get(&enum_name).cloned() {
                Some(Type::Enum { name, variants }) => {
                    if !variants.iter().any(|(n, _)| *n == variant) {
                        let msg = format!(
                            "Unknown variant '{}' of enum {}.",
                            variant, enum_name
                        );
                        self.error(node, &msg);
                        return None;
                    }
                    return Some(Type::Enum { name, variants });
                }
                _ => {
                    let msg = format!("Unknown enum: {}", enum_name);
                    self.error(node, &msg);
                }
            }
        }
        None
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// The identifier at the base of an assignment target, if any.
fn assign_base_ident(target: &Node) -> Option<String> {
    match &target.kind {
        NodeKind::Ident(name) => Some(name.clone()),
        NodeKind::Member { object, .. } => assign_base_ident(object),
        NodeKind::Index { object, .. } => assign_base_ident(object),
        _ => None,
    }
}

/// Operator compatibility per the language's typing rules. Unknown operand
/// types never reach this function.
fn compatible_for_op(left: &Type, right: &Type, op: BinaryOp) -> bool {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            left.is_numeric() && right.is_numeric()
        }
        BinaryOp::Mod => left.is_integer() && right.is_integer(),
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => left.same_kind(right) || (left.is_numeric() && right.is_numeric()),
        BinaryOp::And | BinaryOp::Or => {
            matches!(left, Type::Bool) && matches!(right, Type::Bool)
        }
        BinaryOp::BitAnd
        | BinaryOp::BitOr
        | BinaryOp::BitXor
        | BinaryOp::Shl
        | BinaryOp::Shr => left.is_integer() && right.is_integer(),
    }
}
