//! Backend IR builder and JIT/object sinks
//!
//! Lowers the typed AST into an SSA module: functions, basic blocks,
//! typed values, block parameters for merges, stack slots for locals.
//! Three passes over the program: struct layouts, function declarations,
//! then bodies. The builder is generic over the module sink, so the same
//! emission drives the JIT (`run`) and the object emitter (`build`).
//!
//! Value model: scalars are SSA values; struct, array and slice values
//! are pointers to stack payloads. Every local binding is a stack slot
//! ("pointer-backed"); each read emits a load.

use crate::error::{NullError, Result};
use crate::parser::ast::{BinaryOp, Node, NodeKind, Type, UnaryOp};
use cranelift::prelude::{
    codegen, settings, types, AbiParam, Block, Configurable, FloatCC, FunctionBuilder,
    FunctionBuilderContext, InstBuilder, IntCC, MemFlags, StackSlotData, StackSlotKind, Value,
};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Field offsets for a struct; every field occupies an 8-byte slot.
#[derive(Clone)]
struct StructLayout {
    fields: IndexMap<String, usize>,
    size: u32,
}

pub struct CodeGenerator<M: Module> {
    module: M,
    ctx: codegen::Context,
    func_ids: HashMap<String, FuncId>,
    fn_types: HashMap<String, (Vec<Type>, Type)>,
    struct_layouts: IndexMap<String, StructLayout>,
    struct_defs: IndexMap<String, Vec<(String, Type)>>,
    enum_defs: HashMap<String, Vec<(String, i64)>>,
    string_count: usize,
    pub had_error: bool,
}

impl<M: Module> CodeGenerator<M> {
    pub fn new(module: M) -> Self {
        let ctx = module.make_context();
        Self {
            module,
            ctx,
            func_ids: HashMap::new(),
            fn_types: HashMap::new(),
            struct_layouts: IndexMap::new(),
            struct_defs: IndexMap::new(),
            enum_defs: HashMap::new(),
            string_count: 0,
            had_error: false,
        }
    }

    fn into_module(self) -> M {
        self.module
    }

    /// Lower the whole program. Declaration errors are fatal; body-level
    /// errors set `had_error` and emission continues best-effort.
    pub fn compile(&mut self, program: &Node) -> Result<()> {
        let decls = match &program.kind {
            NodeKind::Program { decls } => decls,
            _ => return Err(NullError::Codegen("not a program".to_string())),
        };

        // Pass 1: struct layouts and enum values.
        for decl in decls {
            match &decl.kind {
                NodeKind::StructDecl { name, fields } => self.register_struct(name, fields),
                NodeKind::EnumDecl { name, variants } => {
                    self.enum_defs.insert(name.clone(), variants.clone());
                }
                _ => {}
            }
        }

        // Pass 2: declare every function signature.
        for decl in decls {
            match &decl.kind {
                NodeKind::FnDecl {
                    name,
                    params,
                    ret_type,
                    is_extern,
                    body,
                } => {
                    let linkage = if *is_extern || body.is_none() {
                        Linkage::Import
                    } else {
                        Linkage::Export
                    };
                    self.declare_function(name, params, ret_type, linkage)?;
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
                            self.declare_function(name, params, ret_type, Linkage::Import)?;
                        }
                    }
                }
                _ => {}
            }
        }

        // Pass 3: emit bodies.
        for decl in decls {
            if let NodeKind::FnDecl {
                name,
                params,
                ret_type,
                body: Some(body),
                is_extern: false,
            } = &decl.kind
            {
                self.compile_function(name, params, ret_type, body)?;
            }
        }

        Ok(())
    }

    fn register_struct(&mut self, name: &str, fields: &[(String, Type)]) {
        let mut layout = IndexMap::new();
        let mut offset = 0usize;
        for (fname, _) in fields {
            layout.insert(fname.clone(), offset);
            offset += 8;
        }
        self.struct_layouts.insert(
            name.to_string(),
            StructLayout {
                fields: layout,
                size: offset as u32,
            },
        );
        self.struct_defs.insert(name.to_string(), fields.to_vec());
    }

    fn is_struct(&self, ty: &Type) -> bool {
        match ty {
            Type::Struct { name, .. } => self.struct_layouts.contains_key(name),
            _ => false,
        }
    }

    fn lower(&self, ty: &Type) -> types::Type {
        match ty {
            Type::Bool | Type::I8 | Type::U8 => types::I8,
            Type::I16 | Type::U16 => types::I16,
            Type::I32 | Type::U32 => types::I32,
            Type::F32 => types::F32,
            Type::F64 => types::F64,
            // Pointers, slices, arrays, structs and enum values are
            // pointer- or word-sized.
            _ => types::I64,
        }
    }

    fn declare_function(
        &mut self,
        name: &str,
        params: &[Node],
        ret_type: &Type,
        linkage: Linkage,
    ) -> Result<()> {
        let param_types: Vec<Type> = params
            .iter()
            .map(|p| match &p.kind {
                NodeKind::Param { param_type, .. } => param_type.clone(),
                _ => Type::Unknown,
            })
            .collect();

        let mut sig = self.module.make_signature();
        let returns_struct = self.is_struct(ret_type);
        if returns_struct {
            // sret convention: hidden leading pointer to caller storage.
            sig.params.push(AbiParam::new(types::I64));
        }
        for ty in &param_types {
            sig.params.push(AbiParam::new(self.lower(ty)));
        }
        if returns_struct {
            sig.returns.push(AbiParam::new(types::I64));
        } else if !matches!(ret_type, Type::Void) {
            sig.returns.push(AbiParam::new(self.lower(ret_type)));
        }

        let func_id = self
            .module
            .declare_function(name, linkage, &sig)
            .map_err(|e| NullError::Codegen(format!("Failed to declare {}: {}", name, e)))?;

        self.func_ids.insert(name.to_string(), func_id);
        self.fn_types
            .insert(name.to_string(), (param_types, ret_type.clone()));
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: &str,
        params: &[Node],
        ret_type: &Type,
        body: &Node,
    ) -> Result<()> {
        let func_id = self.func_ids[name];
        let returns_struct = self.is_struct(ret_type);

        self.ctx.func.signature = self
            .module
            .declarations()
            .get_function_decl(func_id)
            .signature
            .clone();

        let mut builder_ctx = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut self.ctx.func, &mut builder_ctx);

        let mut translator = FunctionTranslator {
            builder,
            module: &mut self.module,
            func_ids: &self.func_ids,
            fn_types: &self.fn_types,
            struct_layouts: &self.struct_layouts,
            struct_defs: &self.struct_defs,
            enum_defs: &self.enum_defs,
            string_count: &mut self.string_count,
            had_error: &mut self.had_error,
            scopes: vec![HashMap::new()],
            loop_stack: Vec::new(),
            sret_ptr: None,
            ret_type: ret_type.clone(),
            terminated: false,
        };

        let entry = translator.builder.create_block();
        translator
            .builder
            .append_block_params_for_function_params(entry);
        translator.builder.switch_to_block(entry);

        let param_offset = if returns_struct {
            translator.sret_ptr = Some(translator.builder.block_params(entry)[0]);
            1
        } else {
            0
        };

        // Spill incoming parameters into stack slots; every later use
        // loads from the slot.
        for (i, param) in params.iter().enumerate() {
            if let NodeKind::Param {
                name: pname,
                param_type,
            } = &param.kind
            {
                let incoming = translator.builder.block_params(entry)[i + param_offset];
                let addr = translator.declare_local(pname, param_type);
                translator
                    .builder
                    .ins()
                    .store(MemFlags::new(), incoming, addr, 0);
            }
        }

        translator.emit_block_stmts(body);

        if !translator.terminated {
            translator.emit_implicit_return();
        }

        translator.finish();

        if let Err(e) = self.module.define_function(func_id, &mut self.ctx) {
            eprintln!("Codegen error: function verification failed for {}: {}", name, e);
            self.had_error = true;
        }
        self.module.clear_context(&mut self.ctx);
        Ok(())
    }
}

/// Pointer-backed binding: a stack cell address plus the source type.
#[derive(Clone)]
struct Binding {
    addr: Value,
    ty: Type,
}

struct FunctionTranslator<'a, M: Module> {
    builder: FunctionBuilder<'a>,
    module: &'a mut M,
    func_ids: &'a HashMap<String, FuncId>,
    fn_types: &'a HashMap<String, (Vec<Type>, Type)>,
    struct_layouts: &'a IndexMap<String, StructLayout>,
    struct_defs: &'a IndexMap<String, Vec<(String, Type)>>,
    enum_defs: &'a HashMap<String, Vec<(String, i64)>>,
    string_count: &'a mut usize,
    had_error: &'a mut bool,
    scopes: Vec<HashMap<String, Binding>>,
    loop_stack: Vec<(Block, Block)>,
    sret_ptr: Option<Value>,
    ret_type: Type,
    terminated: bool,
}

impl<'a, M: Module> FunctionTranslator<'a, M> {
    fn finish(mut self) {
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }

    fn fail(&mut self, msg: &str) -> Value {
        if !*self.had_error {
            eprintln!("Codegen error: {}", msg);
        }
        *self.had_error = true;
        self.builder.ins().iconst(types::I64, 0)
    }

    fn lower(&self, ty: &Type) -> types::Type {
        match ty {
            Type::Bool | Type::I8 | Type::U8 => types::I8,
            Type::I16 | Type::U16 => types::I16,
            Type::I32 | Type::U32 => types::I32,
            Type::F32 => types::F32,
            Type::F64 => types::F64,
            _ => types::I64,
        }
    }

    fn is_struct(&self, ty: &Type) -> bool {
        match ty {
            Type::Struct { name, .. } => self.struct_layouts.contains_key(name),
            _ => false,
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        for scope in self.scopes.iter().rev() {
            if let Some(b) = scope.get(name) {
                return Some(b.clone());
            }
        }
        None
    }

    /// Best-known source type of an expression: the analyzer's slot, or
    /// the binding's declared type for bare identifiers.
    fn expr_type(&self, node: &Node) -> Option<Type> {
        if let Some(t) = &node.ty {
            if !t.is_unknown() {
                return Some(t.clone());
            }
        }
        if let NodeKind::Ident(name) = &node.kind {
            return self.lookup(name).map(|b| b.ty);
        }
        None
    }

    /// Allocate an 8-byte stack cell for a named binding.
    fn declare_local(&mut self, name: &str, ty: &Type) -> Value {
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 8));
        let addr = self.builder.ins().stack_addr(types::I64, slot, 0);
        self.scopes.last_mut().unwrap().insert(
            name.to_string(),
            Binding {
                addr,
                ty: ty.clone(),
            },
        );
        addr
    }

    /// Allocate raw stack payload (struct bodies, array storage).
    fn alloc_payload(&mut self, size: u32) -> Value {
        let rounded = size.max(8).next_multiple_of(8);
        let slot = self
            .builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, rounded));
        self.builder.ins().stack_addr(types::I64, slot, 0)
    }

    fn payload_size(&self, ty: &Type) -> u32 {
        match ty {
            Type::Struct { name, .. } => self
                .struct_layouts
                .get(name)
                .map(|l| l.size)
                .unwrap_or(8),
            Type::Array { elem, size } => self.lower(elem).bytes() * (*size as u32).max(1),
            _ => 8,
        }
    }

    /// Copy an aggregate value into fresh stack storage, giving the copy
    /// value semantics matching the evaluator.
    fn copy_aggregate(&mut self, src: Value, ty: &Type) -> Value {
        match ty {
            Type::Struct { name, .. } => {
                let size = self
                    .struct_layouts
                    .get(name)
                    .map(|l| l.size)
                    .unwrap_or(8);
                let dst = self.alloc_payload(size);
                self.copy_words(dst, src, size);
                dst
            }
            Type::Array { elem, size } => {
                let elem_cl = self.lower(elem);
                let bytes = elem_cl.bytes();
                let dst = self.alloc_payload(bytes * (*size as u32).max(1));
                for i in 0..*size {
                    let off = (i as u32 * bytes) as i32;
                    let v = self.builder.ins().load(elem_cl, MemFlags::new(), src, off);
                    self.builder.ins().store(MemFlags::new(), v, dst, off);
                }
                dst
            }
            _ => src,
        }
    }

    fn copy_words(&mut self, dst: Value, src: Value, size: u32) {
        let mut off = 0i32;
        while (off as u32) < size {
            let v = self.builder.ins().load(types::I64, MemFlags::new(), src, off);
            self.builder.ins().store(MemFlags::new(), v, dst, off);
            off += 8;
        }
    }

    /// Numeric coercion between value types: sign-extend/truncate between
    /// integers, signed int to float, float width changes.
    fn coerce(&mut self, val: Value, want: types::Type) -> Value {
        let have = self.builder.func.dfg.value_type(val);
        if have == want {
            return val;
        }
        match (have.is_float(), want.is_float()) {
            (false, false) => {
                if want.bytes() > have.bytes() {
                    self.builder.ins().sextend(want, val)
                } else {
                    self.builder.ins().ireduce(want, val)
                }
            }
            (false, true) => self.builder.ins().fcvt_from_sint(want, val),
            (true, true) => {
                if want.bytes() > have.bytes() {
                    self.builder.ins().fpromote(want, val)
                } else {
                    self.builder.ins().fdemote(want, val)
                }
            }
            (true, false) => self.builder.ins().fcvt_to_sint(want, val),
        }
    }

    /// Promote two numeric operands to a common type. Returns the pair
    /// and whether the common type is floating point.
    fn unify_numeric(&mut self, left: Value, right: Value) -> (Value, Value, bool) {
        let lt = self.builder.func.dfg.value_type(left);
        let rt = self.builder.func.dfg.value_type(right);
        if lt == rt {
            return (left, right, lt.is_float());
        }
        if lt.is_float() || rt.is_float() {
            let want = if lt == types::F64 || rt == types::F64 {
                types::F64
            } else {
                types::F32
            };
            let l = self.coerce(left, want);
            let r = self.coerce(right, want);
            (l, r, true)
        } else {
            let want = if lt.bytes() >= rt.bytes() { lt } else { rt };
            let l = self.coerce(left, want);
            let r = self.coerce(right, want);
            (l, r, false)
        }
    }

    fn switch_to(&mut self, block: Block) {
        self.builder.switch_to_block(block);
        self.terminated = false;
    }

    fn emit_implicit_return(&mut self) {
        if let Some(sret) = self.sret_ptr {
            self.builder.ins().return_(&[sret]);
        } else if matches!(self.ret_type, Type::Void) {
            self.builder.ins().return_(&[]);
        } else {
            let cl = self.lower(&self.ret_type);
            let zero = if cl == types::F32 {
                self.builder.ins().f32const(0.0)
            } else if cl == types::F64 {
                self.builder.ins().f64const(0.0)
            } else {
                self.builder.ins().iconst(cl, 0)
            };
            self.builder.ins().return_(&[zero]);
        }
        self.terminated = true;
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn emit_block_stmts(&mut self, block: &Node) {
        self.scopes.push(HashMap::new());
        if let NodeKind::Block { stmts } = &block.kind {
            for stmt in stmts {
                if self.terminated {
                    break;
                }
                self.emit_stmt(stmt);
            }
        }
        self.scopes.pop();
    }

    fn emit_stmt(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::VarDecl {
                name,
                var_type,
                init,
                ..
            } => {
                let ty = var_type.clone().unwrap_or(Type::I64);
                let val = self.emit_expr(init);
                let stored = if self.is_struct(&ty) || matches!(ty, Type::Array { .. }) {
                    self.copy_aggregate(val, &ty)
                } else {
                    let want = self.lower(&ty);
                    self.coerce(val, want)
                };
                let addr = self.declare_local(name, &ty);
                self.builder.ins().store(MemFlags::new(), stored, addr, 0);
            }

            NodeKind::Return { value } => {
                match value {
                    Some(v) => {
                        let val = self.emit_expr(v);
                        if let Some(sret) = self.sret_ptr {
                            let size = self.payload_size(&self.ret_type.clone());
                            self.copy_words(sret, val, size);
                            self.builder.ins().return_(&[sret]);
                        } else if matches!(self.ret_type, Type::Void) {
                            self.builder.ins().return_(&[]);
                        } else {
                            let want = self.lower(&self.ret_type);
                            let val = self.coerce(val, want);
                            self.builder.ins().return_(&[val]);
                        }
                    }
                    None => {
                        if let Some(sret) = self.sret_ptr {
                            self.builder.ins().return_(&[sret]);
                        } else if matches!(self.ret_type, Type::Void) {
                            self.builder.ins().return_(&[]);
                        } else {
                            self.emit_implicit_return();
                            return;
                        }
                    }
                }
                self.terminated = true;
            }

            NodeKind::Break => match self.loop_stack.last() {
                Some((end, _)) => {
                    let end = *end;
                    self.builder.ins().jump(end, &[]);
                    self.terminated = true;
                }
                None => {
                    self.fail("'break' outside of loop");
                }
            },

            NodeKind::Continue => match self.loop_stack.last() {
                Some((_, cont)) => {
                    let cont = *cont;
                    self.builder.ins().jump(cont, &[]);
                    self.terminated = true;
                }
                None => {
                    self.fail("'continue' outside of loop");
                }
            },

            NodeKind::If {
                cond,
                then_block,
                elifs,
                else_block,
            } => self.emit_if(cond, then_block, elifs, else_block.as_deref()),

            NodeKind::While { cond, body } => self.emit_while(cond, body),

            NodeKind::For {
                var,
                start,
                end,
                body,
            } => self.emit_for(var, start, end, body),

            NodeKind::ExprStmt { expr } => {
                self.emit_expr(expr);
            }

            NodeKind::Block { .. } => self.emit_block_stmts(node),

            _ => {}
        }
    }

    fn emit_if(
        &mut self,
        cond: &Node,
        then_block: &Node,
        elifs: &[(Node, Node)],
        else_block: Option<&Node>,
    ) {
        let merge_b = self.builder.create_block();

        let then_b = self.builder.create_block();
        let else_b = self.builder.create_block();
        let c = self.emit_expr(cond);
        self.builder.ins().brif(c, then_b, &[], else_b, &[]);

        self.switch_to(then_b);
        self.emit_block_stmts(then_block);
        if !self.terminated {
            self.builder.ins().jump(merge_b, &[]);
        }

        self.switch_to(else_b);

        // Elif chain unrolls into a cascade of else branches.
        for (elif_cond, elif_body) in elifs {
            let elif_then = self.builder.create_block();
            let elif_else = self.builder.create_block();
            let c = self.emit_expr(elif_cond);
            self.builder.ins().brif(c, elif_then, &[], elif_else, &[]);

            self.switch_to(elif_then);
            self.emit_block_stmts(elif_body);
            if !self.terminated {
                self.builder.ins().jump(merge_b, &[]);
            }

            self.switch_to(elif_else);
        }

        if let Some(else_body) = else_block {
            self.emit_block_stmts(else_body);
        }
        if !self.terminated {
            self.builder.ins().jump(merge_b, &[]);
        }

        self.switch_to(merge_b);
    }

    fn emit_while(&mut self, cond: &Node, body: &Node) {
        let cond_b = self.builder.create_block();
        let body_b = self.builder.create_block();
        let end_b = self.builder.create_block();

        self.builder.ins().jump(cond_b, &[]);

        self.switch_to(cond_b);
        let c = self.emit_expr(cond);
        self.builder.ins().brif(c, body_b, &[], end_b, &[]);

        self.switch_to(body_b);
        self.loop_stack.push((end_b, cond_b));
        self.emit_block_stmts(body);
        self.loop_stack.pop();
        if !self.terminated {
            self.builder.ins().jump(cond_b, &[]);
        }

        self.switch_to(end_b);
    }

    fn emit_for(&mut self, var: &str, start: &Node, end: &Node, body: &Node) {
        self.scopes.push(HashMap::new());

        // Both range bounds are evaluated once, before the iterator
        // binding exists.
        let start_v = self.emit_expr(start);
        let start_v = self.coerce(start_v, types::I64);
        let limit = self.emit_expr(end);
        let limit = self.coerce(limit, types::I64);

        let iter_addr = self.declare_local(var, &Type::I64);
        self.builder.ins().store(MemFlags::new(), start_v, iter_addr, 0);

        let cond_b = self.builder.create_block();
        let body_b = self.builder.create_block();
        let inc_b = self.builder.create_block();
        let end_b = self.builder.create_block();

        self.builder.ins().jump(cond_b, &[]);

        self.switch_to(cond_b);
        let cur = self
            .builder
            .ins()
            .load(types::I64, MemFlags::new(), iter_addr, 0);
        let c = self.builder.ins().icmp(IntCC::SignedLessThan, cur, limit);
        self.builder.ins().brif(c, body_b, &[], end_b, &[]);

        self.switch_to(body_b);
        self.loop_stack.push((end_b, inc_b));
        self.emit_block_stmts(body);
        self.loop_stack.pop();
        if !self.terminated {
            self.builder.ins().jump(inc_b, &[]);
        }

        self.switch_to(inc_b);
        let cur = self
            .builder
            .ins()
            .load(types::I64, MemFlags::new(), iter_addr, 0);
        let next = self.builder.ins().iadd_imm(cur, 1);
        self.builder.ins().store(MemFlags::new(), next, iter_addr, 0);
        self.builder.ins().jump(cond_b, &[]);

        self.switch_to(end_b);
        self.scopes.pop();
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn emit_expr(&mut self, node: &Node) -> Value {
        match &node.kind {
            NodeKind::IntLit(v) => self.builder.ins().iconst(types::I64, *v),
            NodeKind::FloatLit(v) => self.builder.ins().f64const(*v),
            NodeKind::BoolLit(b) => self.builder.ins().iconst(types::I8, *b as i64),
            NodeKind::StrLit(s) => self.emit_string(s),

            NodeKind::Ident(name) => match self.lookup(name) {
                Some(binding) => {
                    let cl = self.lower(&binding.ty);
                    self.builder
                        .ins()
                        .load(cl, MemFlags::new(), binding.addr, 0)
                }
                None => {
                    let msg = format!("Unknown identifier: {}", name);
                    self.fail(&msg)
                }
            },

            NodeKind::Unary { op, operand } => self.emit_unary(*op, operand, node),

            NodeKind::Binary { op, left, right } => match op {
                BinaryOp::And => self.emit_short_circuit(left, right, true),
                BinaryOp::Or => self.emit_short_circuit(left, right, false),
                _ => self.emit_binary(*op, left, right),
            },

            NodeKind::Call { callee, args } => self.emit_call(callee, args),

            NodeKind::Member { .. } | NodeKind::Index { .. } => {
                match self.lvalue_addr(node) {
                    Some((addr, ty)) => {
                        let cl = self.lower(&ty);
                        self.builder.ins().load(cl, MemFlags::new(), addr, 0)
                    }
                    None => self.fail("Invalid member or index access."),
                }
            }

            NodeKind::Assign { target, value } => self.emit_assign(target, value),

            NodeKind::StructInit { name, fields } => self.emit_struct_init(name, fields),

            NodeKind::ArrayInit { elems } => self.emit_array_init(node, elems),

            NodeKind::EnumVariant { enum_name, variant } => {
                match self
                    .enum_defs
                    .get(enum_name)
                    .and_then(|vs| vs.iter().find(|(n, _)| n == variant))
                {
                    Some((_, value)) => self.builder.ins().iconst(types::I64, *value),
                    None => {
                        let msg =
                            format!("Unknown enum variant: {}::{}", enum_name, variant);
                        self.fail(&msg)
                    }
                }
            }

            _ => self.builder.ins().iconst(types::I64, 0),
        }
    }

    fn emit_string(&mut self, s: &str) -> Value {
        let name = format!("str{}", *self.string_count);
        *self.string_count += 1;

        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);

        let data_id = match self.module.declare_data(&name, Linkage::Local, false, false) {
            Ok(id) => id,
            Err(e) => return self.fail(&format!("Failed to declare string data: {}", e)),
        };
        let mut desc = DataDescription::new();
        desc.define(bytes.into_boxed_slice());
        if let Err(e) = self.module.define_data(data_id, &desc) {
            return self.fail(&format!("Failed to define string data: {}", e));
        }

        let gv = self.module.declare_data_in_func(data_id, self.builder.func);
        self.builder.ins().symbol_value(types::I64, gv)
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Node, node: &Node) -> Value {
        match op {
            UnaryOp::Neg => {
                let v = self.emit_expr(operand);
                if self.builder.func.dfg.value_type(v).is_float() {
                    self.builder.ins().fneg(v)
                } else {
                    self.builder.ins().ineg(v)
                }
            }
            UnaryOp::Not => {
                let v = self.emit_expr(operand);
                self.builder.ins().bxor_imm(v, 1)
            }
            UnaryOp::BitNot => {
                let v = self.emit_expr(operand);
                self.builder.ins().bnot(v)
            }
            UnaryOp::Addr => match &operand.kind {
                NodeKind::Ident(name) => match self.lookup(name) {
                    Some(binding) => {
                        if self.is_struct(&binding.ty)
                            || matches!(binding.ty, Type::Array { .. })
                        {
                            // Aggregate values already are payload pointers.
                            let cl = self.lower(&binding.ty);
                            self.builder
                                .ins()
                                .load(cl, MemFlags::new(), binding.addr, 0)
                        } else {
                            binding.addr
                        }
                    }
                    None => self.fail("Unknown identifier in address-of."),
                },
                _ => match self.lvalue_addr(operand) {
                    Some((addr, _)) => addr,
                    None => self.fail("Cannot take the address of this expression."),
                },
            },
            UnaryOp::Deref => {
                let v = self.emit_expr(operand);
                let pointee = match node.ty.clone() {
                    Some(t) => t,
                    None => match self.expr_type(operand) {
                        Some(Type::Ptr(inner)) => *inner,
                        _ => Type::I64,
                    },
                };
                let cl = self.lower(&pointee);
                self.builder.ins().load(cl, MemFlags::new(), v, 0)
            }
        }
    }

    /// Short-circuit and/or through control flow: the right operand runs
    /// in its own block and a block parameter merges the result.
    fn emit_short_circuit(&mut self, left: &Node, right: &Node, is_and: bool) -> Value {
        let rhs_b = self.builder.create_block();
        let merge_b = self.builder.create_block();
        self.builder.append_block_param(merge_b, types::I8);

        let l = self.emit_expr(left);
        let skipped = self
            .builder
            .ins()
            .iconst(types::I8, if is_and { 0 } else { 1 });
        if is_and {
            // false and _ => false without evaluating the right side
            self.builder.ins().brif(l, rhs_b, &[], merge_b, &[skipped]);
        } else {
            // true or _ => true without evaluating the right side
            self.builder.ins().brif(l, merge_b, &[skipped], rhs_b, &[]);
        }

        self.switch_to(rhs_b);
        let r = self.emit_expr(right);
        let r = self.coerce(r, types::I8);
        self.builder.ins().jump(merge_b, &[r]);

        self.switch_to(merge_b);
        self.builder.block_params(merge_b)[0]
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> Value {
        let l = self.emit_expr(left);
        let r = self.emit_expr(right);
        let (l, r, is_float) = self.unify_numeric(l, r);

        match op {
            BinaryOp::Add => {
                if is_float {
                    self.builder.ins().fadd(l, r)
                } else {
                    self.builder.ins().iadd(l, r)
                }
            }
            BinaryOp::Sub => {
                if is_float {
                    self.builder.ins().fsub(l, r)
                } else {
                    self.builder.ins().isub(l, r)
                }
            }
            BinaryOp::Mul => {
                if is_float {
                    self.builder.ins().fmul(l, r)
                } else {
                    self.builder.ins().imul(l, r)
                }
            }
            BinaryOp::Div => {
                if is_float {
                    self.builder.ins().fdiv(l, r)
                } else {
                    self.builder.ins().sdiv(l, r)
                }
            }
            BinaryOp::Mod => self.builder.ins().srem(l, r),
            BinaryOp::BitAnd => self.builder.ins().band(l, r),
            BinaryOp::BitOr => self.builder.ins().bor(l, r),
            BinaryOp::BitXor => self.builder.ins().bxor(l, r),
            BinaryOp::Shl => self.builder.ins().ishl(l, r),
            BinaryOp::Shr => self.builder.ins().sshr(l, r),
            BinaryOp::Eq => self.emit_cmp(l, r, is_float, IntCC::Equal, FloatCC::Equal),
            BinaryOp::Ne => self.emit_cmp(l, r, is_float, IntCC::NotEqual, FloatCC::NotEqual),
            BinaryOp::Lt => self.emit_cmp(
                l,
                r,
                is_float,
                IntCC::SignedLessThan,
                FloatCC::LessThan,
            ),
            BinaryOp::Le => self.emit_cmp(
                l,
                r,
                is_float,
                IntCC::SignedLessThanOrEqual,
                FloatCC::LessThanOrEqual,
            ),
            BinaryOp::Gt => self.emit_cmp(
                l,
                r,
                is_float,
                IntCC::SignedGreaterThan,
                FloatCC::GreaterThan,
            ),
            BinaryOp::Ge => self.emit_cmp(
                l,
                r,
                is_float,
                IntCC::SignedGreaterThanOrEqual,
                FloatCC::GreaterThanOrEqual,
            ),
            // And/Or are handled by emit_short_circuit.
            BinaryOp::And | BinaryOp::Or => l,
        }
    }

    fn emit_cmp(
        &mut self,
        l: Value,
        r: Value,
        is_float: bool,
        int_cc: IntCC,
        float_cc: FloatCC,
    ) -> Value {
        if is_float {
            self.builder.ins().fcmp(float_cc, l, r)
        } else {
            self.builder.ins().icmp(int_cc, l, r)
        }
    }

    fn emit_call(&mut self, callee: &Node, args: &[Node]) -> Value {
        let name = match &callee.kind {
            NodeKind::Ident(n) => n.clone(),
            NodeKind::Member { object, member } => match &object.kind {
                // Module-qualified call resolves by mangled name.
                NodeKind::Ident(module_name) => format!("{}_{}", module_name, member),
                _ => return self.fail("Unknown function in call."),
            },
            _ => return self.fail("Unknown function in call."),
        };

        let func_id = match self.func_ids.get(&name) {
            Some(id) => *id,
            None => {
                let msg = format!("Unknown function: {}", name);
                return self.fail(&msg);
            }
        };
        let (param_tys, ret_ty) = self.fn_types[&name].clone();

        if args.len() != param_tys.len() {
            let msg = format!(
                "Wrong number of arguments to {} (expected {}, found {})",
                name,
                param_tys.len(),
                args.len()
            );
            return self.fail(&msg);
        }

        let mut call_args = Vec::with_capacity(args.len() + 1);

        let returns_struct = self.is_struct(&ret_ty);
        let sret_slot = if returns_struct {
            let size = self.payload_size(&ret_ty);
            let slot = self.alloc_payload(size);
            call_args.push(slot);
            Some(slot)
        } else {
            None
        };

        for (arg, pty) in args.iter().zip(&param_tys) {
            let v = self.emit_expr(arg);
            let v = if self.is_struct(pty) || matches!(pty, Type::Array { .. }) {
                // Aggregates pass by fresh copy so the callee cannot
                // mutate the caller's value.
                self.copy_aggregate(v, pty)
            } else {
                let want = self.lower(pty);
                self.coerce(v, want)
            };
            call_args.push(v);
        }

        let func_ref = self.module.declare_func_in_func(func_id, self.builder.func);
        let call = self.builder.ins().call(func_ref, &call_args);
        let results = self.builder.inst_results(call);

        if let Some(v) = results.first().copied() {
            v
        } else if let Some(slot) = sret_slot {
            slot
        } else {
            self.builder.ins().iconst(types::I64, 0)
        }
    }

    fn emit_assign(&mut self, target: &Node, value: &Node) -> Value {
        let val = self.emit_expr(value);
        match self.lvalue_addr(target) {
            Some((addr, ty)) => {
                if self.is_struct(&ty) {
                    // Copy the payload so the assignment has value
                    // semantics; the cell keeps its own storage.
                    let size = self.payload_size(&ty);
                    let dst = self.builder.ins().load(types::I64, MemFlags::new(), addr, 0);
                    self.copy_words(dst, val, size);
                } else if let Type::Array { elem, size } = &ty {
                    let elem_cl = self.lower(elem);
                    let bytes = elem_cl.bytes();
                    let dst = self.builder.ins().load(types::I64, MemFlags::new(), addr, 0);
                    for i in 0..*size {
                        let off = (i as u32 * bytes) as i32;
                        let v = self.builder.ins().load(elem_cl, MemFlags::new(), val, off);
                        self.builder.ins().store(MemFlags::new(), v, dst, off);
                    }
                } else {
                    let want = self.lower(&ty);
                    let v = self.coerce(val, want);
                    self.builder.ins().store(MemFlags::new(), v, addr, 0);
                }
                val
            }
            None => self.fail("Invalid assignment target."),
        }
    }

    /// Resolve an lvalue to (address, type stored there).
    fn lvalue_addr(&mut self, node: &Node) -> Option<(Value, Type)> {
        match &node.kind {
            NodeKind::Ident(name) => {
                let binding = self.lookup(name)?;
                Some((binding.addr, binding.ty))
            }

            NodeKind::Member { object, member } => {
                let obj_ty = self.expr_type(object)?;
                let struct_name = match &obj_ty {
                    Type::Struct { name, .. } => name.clone(),
                    _ => return None,
                };
                let offset = *self.struct_layouts.get(&struct_name)?.fields.get(member)?;
                let field_ty = self
                    .struct_defs
                    .get(&struct_name)?
                    .iter()
                    .find(|(n, _)| n == member)?
                    .1
                    .clone();
                let payload = self.emit_expr(object);
                let addr = self.builder.ins().iadd_imm(payload, offset as i64);
                Some((addr, field_ty))
            }

            NodeKind::Index { object, index } => {
                let (elem_ty, elem_bytes) = match self.expr_type(object) {
                    Some(Type::Array { elem, .. }) | Some(Type::Slice(elem)) => {
                        let bytes = self.lower(&elem).bytes();
                        ((*elem).clone(), bytes)
                    }
                    Some(Type::Ptr(inner)) => {
                        let bytes = self.lower(&inner).bytes();
                        ((*inner).clone(), bytes)
                    }
                    _ => (Type::I64, 8),
                };
                let payload = self.emit_expr(object);
                let idx = self.emit_expr(index);
                let idx = self.coerce(idx, types::I64);
                let scaled = self.builder.ins().imul_imm(idx, elem_bytes as i64);
                let addr = self.builder.ins().iadd(payload, scaled);
                Some((addr, elem_ty))
            }

            NodeKind::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let pointee = match self.expr_type(operand) {
                    Some(Type::Ptr(inner)) => *inner,
                    _ => Type::I64,
                };
                let ptr = self.emit_expr(operand);
                Some((ptr, pointee))
            }

            _ => None,
        }
    }

    fn emit_struct_init(&mut self, name: &str, fields: &[(String, Node)]) -> Value {
        let layout = match self.struct_layouts.get(name) {
            Some(l) => l.clone(),
            None => {
                let msg = format!("Unknown struct type: {}", name);
                return self.fail(&msg);
            }
        };
        let defs = self.struct_defs.get(name).cloned().unwrap_or_default();

        let payload = self.alloc_payload(layout.size);

        // Fields land at their declared index, not the initializer's
        // written order.
        for (fname, fvalue) in fields {
            let offset = match layout.fields.get(fname) {
                Some(o) => *o,
                None => {
                    let msg = format!("Unknown field '{}' in struct {}", fname, name);
                    self.fail(&msg);
                    continue;
                }
            };
            let fty = defs
                .iter()
                .find(|(n, _)| n == fname)
                .map(|(_, t)| t.clone())
                .unwrap_or(Type::I64);
            let v = self.emit_expr(fvalue);
            let v = if self.is_struct(&fty) || matches!(fty, Type::Array { .. }) {
                v
            } else {
                let want = self.lower(&fty);
                self.coerce(v, want)
            };
            self.builder
                .ins()
                .store(MemFlags::new(), v, payload, offset as i32);
        }

        payload
    }

    fn emit_array_init(&mut self, node: &Node, elems: &[Node]) -> Value {
        let elem_ty = match &node.ty {
            Some(Type::Array { elem, .. }) => (**elem).clone(),
            _ => Type::I64,
        };
        let elem_cl = self.lower(&elem_ty);
        let bytes = elem_cl.bytes();
        let payload = self.alloc_payload(bytes * (elems.len() as u32).max(1));

        for (i, elem) in elems.iter().enumerate() {
            let v = self.emit_expr(elem);
            let v = self.coerce(v, elem_cl);
            let off = (i as u32 * bytes) as i32;
            self.builder.ins().store(MemFlags::new(), v, payload, off);
        }

        payload
    }
}

// ============================================================================
// Host runtime shims (JIT symbols); libc provides puts/putchar/getchar/exit.
// Built executables link the same bodies from the C runtime file the
// driver passes to the linker.
// ============================================================================

extern "C" fn rt_print(s: *const u8) {
    if s.is_null() {
        return;
    }
    let text = unsafe { std::ffi::CStr::from_ptr(s as *const std::os::raw::c_char) };
    println!("{}", text.to_string_lossy());
}

extern "C" fn rt_print_raw(s: *const u8) {
    if s.is_null() {
        return;
    }
    let text = unsafe { std::ffi::CStr::from_ptr(s as *const std::os::raw::c_char) };
    print!("{}", text.to_string_lossy());
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

extern "C" fn rt_print_int(v: i64) {
    print!("{}", v);
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

extern "C" fn rt_println() {
    println!();
}

// ============================================================================
// JIT driver
// ============================================================================

pub struct Jit {
    generator: CodeGenerator<JITModule>,
}

impl Jit {
    pub fn new() -> Result<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| NullError::Codegen(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| NullError::Codegen(e.to_string()))?;
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| NullError::Codegen(e.to_string()))?;

        let isa_builder = cranelift_native::builder()
            .map_err(|e| NullError::Codegen(format!("host ISA unavailable: {}", e)))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| NullError::Codegen(e.to_string()))?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol("io_print", rt_print as *const u8);
        builder.symbol("print", rt_print as *const u8);
        builder.symbol("print_raw", rt_print_raw as *const u8);
        builder.symbol("printf", rt_print_raw as *const u8);
        builder.symbol("print_int", rt_print_int as *const u8);
        builder.symbol("println", rt_println as *const u8);

        let module = JITModule::new(builder);
        Ok(Self {
            generator: CodeGenerator::new(module),
        })
    }

    /// Lower the program. Returns false when codegen recorded errors; the
    /// caller must not run the module in that case.
    pub fn compile(&mut self, program: &Node) -> Result<bool> {
        self.generator.compile(program)?;
        Ok(!self.generator.had_error)
    }

    /// Finalize and execute `main`, returning its integer value (0 for a
    /// void or floating entry point).
    pub fn run_main(&mut self) -> Result<i64> {
        let (param_tys, ret_ty) = self
            .generator
            .fn_types
            .get("main")
            .cloned()
            .ok_or_else(|| NullError::Codegen("No main function found".to_string()))?;
        if !param_tys.is_empty() {
            return Err(NullError::Codegen(
                "main must not take parameters".to_string(),
            ));
        }

        self.generator
            .module
            .finalize_definitions()
            .map_err(|e| NullError::Codegen(format!("Failed to finalize: {}", e)))?;

        let func_id = self.generator.func_ids["main"];
        let ptr = self.generator.module.get_finalized_function(func_id);

        let result = unsafe {
            match ret_ty {
                Type::Void => {
                    let f: extern "C" fn() = std::mem::transmute(ptr);
                    f();
                    0
                }
                Type::Bool | Type::I8 | Type::U8 => {
                    let f: extern "C" fn() -> i8 = std::mem::transmute(ptr);
                    f() as i64
                }
                Type::I16 | Type::U16 => {
                    let f: extern "C" fn() -> i16 = std::mem::transmute(ptr);
                    f() as i64
                }
                Type::I32 | Type::U32 => {
                    let f: extern "C" fn() -> i32 = std::mem::transmute(ptr);
                    f() as i64
                }
                Type::F32 | Type::F64 => {
                    let f: extern "C" fn() -> f64 = std::mem::transmute(ptr);
                    f();
                    0
                }
                _ => {
                    let f: extern "C" fn() -> i64 = std::mem::transmute(ptr);
                    f()
                }
            }
        };

        Ok(result)
    }
}

// ============================================================================
// Object emission (build subcommand)
// ============================================================================

/// Lower a program to a native object file image.
pub fn emit_object(program: &Node) -> Result<Vec<u8>> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("is_pic", "true")
        .map_err(|e| NullError::Codegen(e.to_string()))?;
    flag_builder
        .set("opt_level", "speed")
        .map_err(|e| NullError::Codegen(e.to_string()))?;

    let isa_builder = cranelift_native::builder()
        .map_err(|e| NullError::Codegen(format!("host ISA unavailable: {}", e)))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| NullError::Codegen(e.to_string()))?;

    let builder = ObjectBuilder::new(
        isa,
        "nullc".to_string(),
        cranelift_module::default_libcall_names(),
    )
    .map_err(|e| NullError::Codegen(e.to_string()))?;
    let module = ObjectModule::new(builder);

    let mut generator = CodeGenerator::new(module);
    generator.compile(program)?;
    if generator.had_error {
        return Err(NullError::Codegen("code generation failed".to_string()));
    }

    let product = generator.into_module().finish();
    product
        .emit()
        .map_err(|e| NullError::Codegen(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analyzer, parser};

    fn jit_run(source: &str) -> i64 {
        let (mut program, ok) = parser::parse(source);
        assert!(ok, "parse failed");
        assert!(analyzer::analyze(&mut program), "analysis failed");
        let mut jit = Jit::new().expect("jit");
        assert!(jit.compile(&program).expect("compile"), "codegen errors");
        jit.run_main().expect("run")
    }

    #[test]
    fn returns_constant() {
        assert_eq!(jit_run("fn main() -> i32 do\nret 42\nend"), 42);
    }

    #[test]
    fn arithmetic_and_calls() {
        let src = "fn add(a :: i64, b :: i64) -> i64 do\nret a + b\nend\n\
                   fn main() -> i32 do\nret add(20, 22)\nend";
        assert_eq!(jit_run(src), 42);
    }

    #[test]
    fn while_loop_with_break() {
        let src = "fn main() -> i32 do\nmut i :: i64 = 0\nwhile true do\n\
                   i = i + 1\nif i >= 5 do\nbreak\nend\nend\nret i\nend";
        assert_eq!(jit_run(src), 5);
    }

    #[test]
    fn for_range_is_half_open() {
        let src = "fn main() -> i32 do\nmut s :: i64 = 0\nfor i in 0..5 do\n\
                   s = s + i\nend\nret s\nend";
        assert_eq!(jit_run(src), 10);
    }

    #[test]
    fn struct_fields_match_by_name() {
        let src = "struct Point do\nx :: i64\ny :: i64\nend\n\
                   fn main() -> i32 do\nlet p = Point { y = 10, x = 5 }\n\
                   ret (p.x - 5) + (p.y - 10)\nend";
        assert_eq!(jit_run(src), 0);
    }

    #[test]
    fn short_circuit_skips_rhs() {
        let src = "fn trap() -> bool do\nret (1/0) == 0\nend\n\
                   fn main() -> i32 do\n\
                   if false and trap() do\nret 1\nend\n\
                   if true or trap() do\nret 0\nend\n\
                   ret 2\nend";
        assert_eq!(jit_run(src), 0);
    }

    #[test]
    fn enum_variants_are_constants() {
        let src = "enum Color do\nRed\nGreen = 5\nBlue\nend\n\
                   fn main() -> i32 do\nlet c = Color::Blue\nret c\nend";
        assert_eq!(jit_run(src), 6);
    }

    #[test]
    fn array_index_read_write() {
        let src = "fn main() -> i32 do\nmut a = [1, 2, 3]\na[1] = 20\n\
                   ret a[0] + a[1] + a[2]\nend";
        assert_eq!(jit_run(src), 24);
    }

    #[test]
    fn struct_return_by_sret() {
        let src = "struct Pair do\na :: i64\nb :: i64\nend\n\
                   fn make(x :: i64) -> Pair do\nret Pair { a = x, b = x * 2 }\nend\n\
                   fn main() -> i32 do\nlet p = make(3)\nret p.a + p.b\nend";
        assert_eq!(jit_run(src), 9);
    }
}
