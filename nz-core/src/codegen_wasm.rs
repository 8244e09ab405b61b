//! Wasm code generation for checked classes.
//!
//! Every class becomes one wasm module. Values map to wasm types as
//! `Int -> i64`, `Float -> f64`, and `String`/objects -> `i32` handles.
//! A class module imports:
//!
//! - the shared memory `nz.memory`, where objects live in 8-byte cells;
//! - the constant global `<module>.$strings`, the handle of the class's
//!   first string literal;
//! - host builtins as `nz.<Type>.<name>`;
//! - methods of other classes as `<their module>.<method>`.
//!
//! and exports each of its methods under the method's name. Instance
//! methods take the receiver as parameter 0.

use std::collections::HashMap;

use tracing::{debug, trace};
use wasm_encoder::{
    CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection, GlobalType, ImportSection,
    Instruction, MemArg, MemoryType, Module, TypeSection, ValType,
};

use crate::ast::LiteralValue;
use crate::builtins::{self, BuiltinMethod, HOST_MODULE, Intrinsic};
use crate::error::{CompileResult, ErrorKind, raise};
use crate::hir::{Callee, ClassId, ClassTable, Klass, MethodRef, Param, TExpr, TExprKind, TPattern};
use crate::loc::{LineIndex, Loc};
use crate::types::{Prim, Ty};

pub const MEMORY: &str = "memory";
pub const STRINGS_GLOBAL: &str = "$strings";
/// Bytes per object field.
pub const CELL_SIZE: u32 = 8;

pub fn val_type(ty: Ty) -> ValType {
    match ty {
        Ty::Builtin(Prim::Int) => ValType::I64,
        Ty::Builtin(Prim::Float) => ValType::F64,
        Ty::Builtin(Prim::String) | Ty::Class { .. } => ValType::I32,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Ty,
    /// Byte offset from the object handle.
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub is_static: bool,
    pub params: Vec<Ty>,
    pub ret: Ty,
    /// Let-bound locals, after the wasm parameters.
    pub locals: Vec<ValType>,
    pub code: Vec<Instruction<'static>>,
    /// `(instruction index, source line)` pairs in instruction order.
    pub lines: Vec<(u32, u32)>,
}

impl MethodInfo {
    pub fn first_line(&self) -> u32 {
        self.lines.first().map_or(0, |(_, line)| *line)
    }

    /// Source line of the instruction at `op`.
    pub fn line_at(&self, op: u32) -> u32 {
        self.lines
            .iter()
            .take_while(|(start, _)| *start <= op)
            .last()
            .map_or(0, |(_, line)| *line)
    }
}

/// A class ready to be loaded.
#[derive(Debug, Clone)]
pub struct ClassArtifact {
    pub id: ClassId,
    pub class_name: String,
    /// Logical path of the class's module, the wasm import namespace of its methods.
    pub module_name: String,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    /// String literals, in handle order starting at `$strings`.
    pub strings: Vec<String>,
    pub wasm: Vec<u8>,
}

impl ClassArtifact {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn object_size(&self) -> u32 {
        self.fields.len() as u32 * CELL_SIZE
    }
}

/// Generate the wasm module of a checked class.
///
/// `source` is the class's source text, used for the line tables.
pub fn generate_class(table: &ClassTable, id: ClassId, source: &str) -> CompileResult<ClassArtifact> {
    let klass = table.get(id);
    let lines = LineIndex::new(source);
    let imports = ImportPlan::collect(klass);
    let module_name = klass.module.to_string();

    let mut types = TypeSection::new();
    let mut import_section = ImportSection::new();
    import_section.import(
        HOST_MODULE,
        MEMORY,
        MemoryType {
            minimum: 1,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        },
    );
    import_section.import(
        &module_name,
        STRINGS_GLOBAL,
        GlobalType {
            val_type: ValType::I32,
            mutable: false,
            shared: false,
        },
    );

    let mut functions = FunctionIndices::default();
    for builtin in &imports.host {
        let Some(field) = builtin.host_import() else {
            continue;
        };
        let type_index = types.len();
        types
            .ty()
            .function(
                builtin.wasm_params().map(|prim| val_type(prim.into())).collect::<Vec<_>>(),
                [val_type(builtin.ret.into())],
            );
        import_section.import(HOST_MODULE, &field, EntityType::Function(type_index));
        functions.host.insert(builtin.op, functions.next);
        functions.next += 1;
    }
    for method_ref in &imports.foreign {
        let owner = table.get(method_ref.class);
        let method = &owner.methods[method_ref.index];
        let type_index = types.len();
        types
            .ty()
            .function(wasm_params(owner, method.is_static, &method.params), [val_type(method.return_ty)]);
        import_section.import(
            &owner.module.to_string(),
            method.name.as_str(),
            EntityType::Function(type_index),
        );
        functions.foreign.insert(*method_ref, functions.next);
        functions.next += 1;
    }
    functions.own_base = functions.next;

    let mut function_section = FunctionSection::new();
    let mut exports = ExportSection::new();
    let mut code = CodeSection::new();
    let mut strings = StringPool::default();
    let mut methods = Vec::with_capacity(klass.methods.len());

    for (index, method) in klass.methods.iter().enumerate() {
        let Some(body) = &method.body else {
            return raise(method.loc, ErrorKind::NotImplemented("methods without a checked body"));
        };
        let params = wasm_params(klass, method.is_static, &method.params);
        let locals = local_types(body);

        let mut emitter = MethodEmitter {
            table,
            class: id,
            functions: &functions,
            strings: &mut strings,
            lines: &lines,
            param_base: u32::from(!method.is_static),
            local_base: params.len() as u32,
            code: Vec::new(),
            line_marks: Vec::new(),
        };
        emitter.mark(body.loc);
        emitter.emit(body)?;
        emitter.code.push(Instruction::Return);
        emitter.code.push(Instruction::End);
        let MethodEmitter {
            code: instructions,
            line_marks,
            ..
        } = emitter;

        let type_index = types.len();
        types.ty().function(params.iter().copied(), [val_type(method.return_ty)]);
        function_section.function(type_index);
        exports.export(method.name.as_str(), ExportKind::Func, functions.own_base + index as u32);

        let mut function = Function::new(locals.iter().map(|ty| (1, *ty)).collect::<Vec<_>>());
        for instruction in &instructions {
            function.instruction(instruction);
        }
        code.function(&function);
        trace!(class = %klass.name, method = %method.name, instructions = instructions.len(), "generated method");

        methods.push(MethodInfo {
            name: method.name.to_string(),
            is_static: method.is_static,
            params: method.params.iter().map(|param| param.ty).collect(),
            ret: method.return_ty,
            locals,
            code: instructions,
            lines: line_marks,
        });
    }

    let mut module = Module::new();
    module.section(&types);
    module.section(&import_section);
    module.section(&function_section);
    module.section(&exports);
    module.section(&code);
    let wasm = module.finish();
    debug!(class = %klass.name, methods = methods.len(), bytes = wasm.len(), "generated class");

    Ok(ClassArtifact {
        id,
        class_name: klass.name.to_string(),
        module_name,
        fields: klass
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| FieldInfo {
                name: slot.name.to_string(),
                ty: slot.ty,
                offset: index as u32 * CELL_SIZE,
            })
            .collect(),
        methods,
        strings: strings.texts,
        wasm,
    })
}

fn wasm_params(owner: &Klass, is_static: bool, params: &[Param]) -> Vec<ValType> {
    let receiver = if is_static { None } else { Some(val_type(owner.ty())) };
    receiver
        .into_iter()
        .chain(params.iter().map(|param| val_type(param.ty)))
        .collect()
}

/// Wasm types of the let-bound locals of one body, indexed by local id.
fn local_types(body: &TExpr) -> Vec<ValType> {
    let mut locals = Vec::new();
    body.walk(&mut |expr| {
        if let TExprKind::Let {
            pattern: TPattern::Single { id, ty, .. },
            ..
        } = &expr.kind
        {
            let index = id.0 as usize;
            if locals.len() <= index {
                locals.resize(index + 1, ValType::I32);
            }
            locals[index] = val_type(*ty);
        }
    });
    locals
}

/// Functions a class module imports, in import order.
#[derive(Default)]
struct ImportPlan {
    host: Vec<&'static BuiltinMethod>,
    foreign: Vec<MethodRef>,
}

impl ImportPlan {
    fn collect(klass: &Klass) -> Self {
        let mut plan = ImportPlan::default();
        for body in klass.methods.iter().filter_map(|method| method.body.as_ref()) {
            body.walk(&mut |expr| match &expr.kind {
                TExprKind::MethodCall { method, .. } | TExprKind::StaticMethodCall { method, .. } => {
                    plan.note(klass.id, method);
                }
                TExprKind::Quote { .. } => {
                    if let Some(concat) = builtins::by_intrinsic(Intrinsic::StringConcat) {
                        plan.note(klass.id, &Callee::Builtin(concat));
                    }
                }
                _ => {}
            });
        }
        plan
    }

    fn note(&mut self, own: ClassId, callee: &Callee) {
        match callee {
            Callee::Builtin(builtin) => {
                if !builtin.op.is_inline() && !self.host.iter().any(|known| known.op == builtin.op) {
                    self.host.push(builtin);
                }
            }
            Callee::Method(method) => {
                if method.class != own && !self.foreign.contains(method) {
                    self.foreign.push(*method);
                }
            }
        }
    }
}

#[derive(Default)]
struct FunctionIndices {
    host: HashMap<Intrinsic, u32>,
    foreign: HashMap<MethodRef, u32>,
    own_base: u32,
    next: u32,
}

#[derive(Default)]
struct StringPool {
    texts: Vec<String>,
    index: HashMap<String, i32>,
}

impl StringPool {
    fn intern(&mut self, text: &str) -> i32 {
        if let Some(index) = self.index.get(text) {
            return *index;
        }
        let index = self.texts.len() as i32;
        self.texts.push(text.to_string());
        self.index.insert(text.to_string(), index);
        index
    }
}

struct MethodEmitter<'a> {
    table: &'a ClassTable,
    class: ClassId,
    functions: &'a FunctionIndices,
    strings: &'a mut StringPool,
    lines: &'a LineIndex,
    // First wasm local of the parameters and of the let-bound locals.
    param_base: u32,
    local_base: u32,
    code: Vec<Instruction<'static>>,
    line_marks: Vec<(u32, u32)>,
}

impl MethodEmitter<'_> {
    fn mark(&mut self, loc: Loc) {
        let at = self.code.len() as u32;
        let line = self.lines.line(loc.start);
        match self.line_marks.last_mut() {
            Some(last) if last.0 == at => last.1 = line,
            Some(last) if last.1 == line => {}
            _ => self.line_marks.push((at, line)),
        }
    }

    fn emit(&mut self, expr: &TExpr) -> CompileResult<()> {
        match &expr.kind {
            TExprKind::Local { id, .. } => self.code.push(Instruction::LocalGet(self.local_base + id.0)),
            TExprKind::Parameter { index, .. } => {
                self.code.push(Instruction::LocalGet(self.param_base + *index as u32));
            }
            TExprKind::Receiver => self.code.push(Instruction::LocalGet(0)),
            TExprKind::GetSlot { target, slot } => {
                self.emit(target)?;
                let ty = self.table.get(slot.class).slots[slot.index].ty;
                let offset = u64::from(slot.index as u32 * CELL_SIZE);
                self.code.push(match val_type(ty) {
                    ValType::I64 => Instruction::I64Load(mem_arg(offset, 3)),
                    ValType::F64 => Instruction::F64Load(mem_arg(offset, 3)),
                    _ => Instruction::I32Load(mem_arg(offset, 2)),
                });
            }
            TExprKind::MethodCall { target, method, args } => {
                self.emit(target)?;
                for arg in args {
                    self.emit(arg)?;
                }
                self.call(expr.loc, method)?;
            }
            TExprKind::StaticMethodCall { method, args } => {
                for arg in args {
                    self.emit(arg)?;
                }
                self.call(expr.loc, method)?;
            }
            TExprKind::Let { pattern, value, then } => {
                self.emit(value)?;
                match pattern {
                    TPattern::Single { id, .. } => self.code.push(Instruction::LocalSet(self.local_base + id.0)),
                    TPattern::Ignore(_) => self.code.push(Instruction::Drop),
                }
                self.mark(then.loc);
                self.emit(then)?;
            }
            TExprKind::Seq { first, then } => {
                self.emit(first)?;
                self.code.push(Instruction::Drop);
                self.mark(then.loc);
                self.emit(then)?;
            }
            TExprKind::Literal(LiteralValue::Int(value)) => self.code.push(Instruction::I64Const(*value)),
            TExprKind::Literal(LiteralValue::Float(value)) => self.code.push(Instruction::F64Const((*value).into())),
            TExprKind::Literal(LiteralValue::Str(text)) => self.string(text),
            TExprKind::Quote { head, parts } => {
                let concat = builtins::by_intrinsic(Intrinsic::StringConcat).map(Callee::Builtin);
                let Some(concat) = concat else {
                    return raise(expr.loc, ErrorKind::NotImplemented("string concatenation"));
                };
                self.string(head);
                for (part, text) in parts {
                    self.emit(part)?;
                    self.call(part.loc, &concat)?;
                    if !text.is_empty() {
                        self.string(text);
                        self.call(part.loc, &concat)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn string(&mut self, text: &str) {
        let index = self.strings.intern(text);
        self.code.push(Instruction::GlobalGet(0));
        self.code.push(Instruction::I32Const(index));
        self.code.push(Instruction::I32Add);
    }

    fn call(&mut self, loc: Loc, callee: &Callee) -> CompileResult<()> {
        let index = match callee {
            Callee::Builtin(builtin) => {
                if let Some(instruction) = inline(builtin.op) {
                    self.code.push(instruction);
                    return Ok(());
                }
                self.functions.host.get(&builtin.op).copied()
            }
            Callee::Method(method) if method.class == self.class => Some(self.functions.own_base + method.index as u32),
            Callee::Method(method) => self.functions.foreign.get(method).copied(),
        };
        match index {
            Some(index) => {
                self.code.push(Instruction::Call(index));
                Ok(())
            }
            None => raise(loc, ErrorKind::NotImplemented("calls outside the import table")),
        }
    }
}

fn mem_arg(offset: u64, align: u32) -> MemArg {
    MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

fn inline(op: Intrinsic) -> Option<Instruction<'static>> {
    Some(match op {
        Intrinsic::IntAdd => Instruction::I64Add,
        Intrinsic::IntSub => Instruction::I64Sub,
        Intrinsic::IntMul => Instruction::I64Mul,
        Intrinsic::IntDiv => Instruction::I64DivS,
        Intrinsic::IntFromFloat => Instruction::I64TruncSatF64S,
        Intrinsic::FloatAdd => Instruction::F64Add,
        Intrinsic::FloatSub => Instruction::F64Sub,
        Intrinsic::FloatMul => Instruction::F64Mul,
        Intrinsic::FloatDiv => Instruction::F64Div,
        Intrinsic::FloatFromInt => Instruction::F64ConvertI64S,
        Intrinsic::IntPow
        | Intrinsic::IntParse
        | Intrinsic::IntMax
        | Intrinsic::IntMin
        | Intrinsic::FloatParse
        | Intrinsic::StringConcat
        | Intrinsic::StringFromInt
        | Intrinsic::StringFromFloat
        | Intrinsic::StringLength => return None,
    })
}
