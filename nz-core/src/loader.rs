//! Loading and running generated classes.
//!
//! A [`ClassLoader`] belongs to one compiler session. It owns the wasmi
//! store, the linker every class is linked through, the memory shared by
//! all classes and the host string table. Classes must be defined in
//! dependency order, and each module path can be defined only once.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;
use wasm_encoder::{ExportKind, ExportSection, MemorySection, MemoryType};
use wasmi::{Caller, Engine, Global, Instance, Linker, Memory, Module, Mutability, Store, Val};

use crate::builtins::{self, HOST_MODULE, Intrinsic};
use crate::codegen_wasm::{CELL_SIZE, ClassArtifact, MEMORY, MethodInfo, STRINGS_GLOBAL};
use crate::error::CoreError;
use crate::hir::ClassId;
use crate::sym::Sym;
use crate::types::{Prim, Ty};

const PAGE_SIZE: usize = 65536;

/// First object handle. Handle 0 is never a valid object.
const HEAP_START: u32 = 8;

/// A value passed into or returned from a loaded method.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    /// An instance of the class defined by module `class`.
    Object { class: String, handle: u32 },
}

impl Value {
    /// Parse a command-line argument as a value of `ty`.
    ///
    /// Objects have no textual form.
    pub fn parse(ty: Ty, text: &str) -> Option<Value> {
        match ty {
            Ty::Builtin(Prim::Int) => text.parse().ok().map(Value::Int),
            Ty::Builtin(Prim::Float) => text.parse().ok().map(Value::Float),
            Ty::Builtin(Prim::String) => Some(Value::Str(text.to_string())),
            Ty::Class { .. } => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Str(text) => f.write_str(text),
            Value::Object { class, handle } => write!(f, "<{class}@{handle}>"),
        }
    }
}

/// Strings live on the host; wasm code only sees their handles.
#[derive(Debug, Default)]
pub struct HostState {
    strings: Vec<String>,
}

impl HostState {
    fn string(&self, handle: i32) -> Result<&str, wasmi::Error> {
        usize::try_from(handle)
            .ok()
            .and_then(|index| self.strings.get(index))
            .map(String::as_str)
            .ok_or_else(|| wasmi::Error::new(format!("invalid string handle {handle}")))
    }

    /// Strings are never freed: the table only grows for the lifetime of
    /// the session, like the symbol interner.
    fn push(&mut self, text: String) -> i32 {
        self.strings.push(text);
        self.strings.len() as i32 - 1
    }
}

struct LoadedClass {
    artifact: ClassArtifact,
    instance: Instance,
}

pub struct ClassLoader {
    engine: Engine,
    store: Store<HostState>,
    linker: Linker<HostState>,
    memory: Memory,
    heap_top: u32,
    classes: HashMap<String, LoadedClass>,
    modules: HashMap<ClassId, String>,
}

impl ClassLoader {
    pub fn new() -> Result<Self, CoreError> {
        let engine = Engine::default();
        let mut store = Store::new(&engine, HostState::default());
        let memory = shared_memory(&engine, &mut store)?;
        let mut linker = Linker::new(&engine);
        // A failed `define` leaves its names behind; a retry replaces them.
        linker.allow_shadowing(true);
        linker
            .define(HOST_MODULE, MEMORY, memory)
            .map_err(|err| link_error(HOST_MODULE, err))?;
        link_host(&mut linker).map_err(|err| link_error(HOST_MODULE, err))?;
        Ok(ClassLoader {
            engine,
            store,
            linker,
            memory,
            heap_top: HEAP_START,
            classes: HashMap::new(),
            modules: HashMap::new(),
        })
    }

    pub fn is_defined(&self, module: &str) -> bool {
        self.classes.contains_key(module)
    }

    /// Link and instantiate a class, making its methods importable by
    /// classes defined later.
    pub fn define(&mut self, artifact: &ClassArtifact) -> Result<(), CoreError> {
        let module_name = artifact.module_name.clone();
        if self.is_defined(&module_name) {
            return Err(CoreError::DuplicateClass(module_name));
        }

        let module = Module::new(&self.engine, &artifact.wasm).map_err(|err| link_error(&module_name, err))?;
        let base = self.store.data().strings.len();
        self.store.data_mut().strings.extend(artifact.strings.iter().cloned());
        let instance = match self.link(artifact, &module, base as i32) {
            Ok(instance) => instance,
            Err(err) => {
                self.store.data_mut().strings.truncate(base);
                return Err(err);
            }
        };

        debug!(
            class = %artifact.class_name,
            module = %module_name,
            methods = artifact.methods.len(),
            strings = artifact.strings.len(),
            "defined class"
        );
        self.modules.insert(artifact.id, module_name.clone());
        self.classes.insert(
            module_name,
            LoadedClass {
                artifact: artifact.clone(),
                instance,
            },
        );
        Ok(())
    }

    fn link(&mut self, artifact: &ClassArtifact, module: &Module, strings_base: i32) -> Result<Instance, CoreError> {
        let module_name = &artifact.module_name;
        let strings = Global::new(&mut self.store, Val::I32(strings_base), Mutability::Const);
        self.linker
            .define(module_name, STRINGS_GLOBAL, strings)
            .map_err(|err| link_error(module_name, err))?;
        let instance = self
            .linker
            .instantiate_and_start(&mut self.store, module)
            .map_err(|err| link_error(module_name, err))?;
        for method in &artifact.methods {
            let Some(func) = instance.get_func(&self.store, &method.name) else {
                return Err(link_error(module_name, format!("method {} is not exported", method.name)));
            };
            self.linker
                .define(module_name, &method.name, func)
                .map_err(|err| link_error(module_name, err))?;
        }
        Ok(instance)
    }

    fn class(&self, module: &str) -> Result<&LoadedClass, CoreError> {
        self.classes
            .get(module)
            .ok_or_else(|| CoreError::NoSuchClass(module.to_string()))
    }

    /// Allocate an instance of `class` with its slots set to `fields`, in
    /// slot order.
    pub fn new_object(&mut self, class: &str, fields: &[Value]) -> Result<Value, CoreError> {
        let layout = self.class(class)?.artifact.fields.clone();
        if layout.len() != fields.len() {
            return Err(CoreError::BadArguments {
                method: format!("{class} constructor"),
                message: format!("expected {} fields, got {}", layout.len(), fields.len()),
            });
        }

        let mut cells = Vec::with_capacity(layout.len() * CELL_SIZE as usize);
        for (field, value) in layout.iter().zip(fields) {
            let raw = self.to_wasm(field.ty, value).map_err(|message| CoreError::BadArguments {
                method: format!("{class} constructor"),
                message: format!("field {}: {message}", field.name),
            })?;
            let mut cell = [0u8; CELL_SIZE as usize];
            match raw {
                Val::I64(value) => cell.copy_from_slice(&value.to_le_bytes()),
                Val::F64(value) => cell.copy_from_slice(&f64::from(value).to_le_bytes()),
                Val::I32(value) => cell[..4].copy_from_slice(&value.to_le_bytes()),
                _ => {}
            }
            cells.extend_from_slice(&cell);
        }

        let handle = self.allocate(cells.len().max(CELL_SIZE as usize))?;
        self.memory
            .write(&mut self.store, handle as usize, &cells)
            .map_err(|_| CoreError::OutOfMemory)?;
        Ok(Value::Object {
            class: class.to_string(),
            handle,
        })
    }

    /// Read one slot of an object.
    pub fn field(&self, object: &Value, name: &str) -> Result<Value, CoreError> {
        let Value::Object { class, handle } = object else {
            return Err(CoreError::BadArguments {
                method: name.to_string(),
                message: format!("{object} is not an object"),
            });
        };
        let loaded = self.class(class)?;
        let Some(field) = loaded.artifact.fields.iter().find(|field| field.name == name) else {
            return Err(CoreError::NoSuchMethod {
                class: class.clone(),
                method: name.to_string(),
            });
        };
        let mut cell = [0u8; CELL_SIZE as usize];
        self.memory
            .read(&self.store, (*handle + field.offset) as usize, &mut cell)
            .map_err(|_| CoreError::OutOfMemory)?;
        let mut low = [0u8; 4];
        low.copy_from_slice(&cell[..4]);
        let raw = match field.ty {
            Ty::Builtin(Prim::Int) => Val::I64(i64::from_le_bytes(cell)),
            Ty::Builtin(Prim::Float) => Val::F64(f64::from_le_bytes(cell).into()),
            Ty::Builtin(Prim::String) | Ty::Class { .. } => Val::I32(i32::from_le_bytes(low)),
        };
        self.from_wasm(field.ty, &raw)
    }

    /// Run `method` of `class`. Instance methods take the receiver as the
    /// first argument.
    pub fn invoke(&mut self, class: &str, method: &str, args: &[Value]) -> Result<Value, CoreError> {
        let loaded = self.class(class)?;
        let Some(info) = loaded.artifact.method(method).cloned() else {
            return Err(CoreError::NoSuchMethod {
                class: class.to_string(),
                method: method.to_string(),
            });
        };
        let Some(func) = loaded.instance.get_func(&self.store, method) else {
            return Err(CoreError::NoSuchMethod {
                class: class.to_string(),
                method: method.to_string(),
            });
        };
        let owner = loaded.artifact.id;
        let class_name = loaded.artifact.class_name.clone();

        let expected = expected_args(owner, &class_name, &info);
        if expected.len() != args.len() {
            return Err(CoreError::BadArguments {
                method: method.to_string(),
                message: format!("expected {} arguments, got {}", expected.len(), args.len()),
            });
        }
        let mut inputs = Vec::with_capacity(args.len());
        for (ty, arg) in expected.into_iter().zip(args) {
            let raw = self.to_wasm(ty, arg).map_err(|message| CoreError::BadArguments {
                method: method.to_string(),
                message,
            })?;
            inputs.push(raw);
        }

        let mut outputs = [zero(info.ret)];
        func.call(&mut self.store, &inputs, &mut outputs)
            .map_err(|err| CoreError::Runtime {
                class: class_name,
                method: method.to_string(),
                line: info.first_line(),
                message: err.to_string(),
            })?;
        self.from_wasm(info.ret, &outputs[0])
    }

    fn allocate(&mut self, size: usize) -> Result<u32, CoreError> {
        let handle = self.heap_top;
        let end = handle as usize + size;
        let available = self.memory.data_size(&self.store);
        if end > available {
            let pages = (end - available).div_ceil(PAGE_SIZE) as u32;
            self.memory
                .grow(&mut self.store, pages.into())
                .map_err(|_| CoreError::OutOfMemory)?;
        }
        self.heap_top = u32::try_from(end).map_err(|_| CoreError::OutOfMemory)?;
        Ok(handle)
    }

    fn to_wasm(&mut self, ty: Ty, value: &Value) -> Result<Val, String> {
        Ok(match (ty, value) {
            (Ty::Builtin(Prim::Int), Value::Int(value)) => Val::I64(*value),
            (Ty::Builtin(Prim::Float), Value::Float(value)) => Val::F64((*value).into()),
            (Ty::Builtin(Prim::String), Value::Str(text)) => Val::I32(self.store.data_mut().push(text.clone())),
            (Ty::Class { id, .. }, Value::Object { class, handle }) if self.modules.get(&id) == Some(class) => {
                Val::I32(*handle as i32)
            }
            (ty, value) => return Err(format!("expected {ty}, got {value}")),
        })
    }

    fn from_wasm(&self, ty: Ty, raw: &Val) -> Result<Value, CoreError> {
        let mismatch = || CoreError::BadArguments {
            method: "result".to_string(),
            message: format!("expected a {ty} value, got {raw:?}"),
        };
        Ok(match (ty, raw) {
            (Ty::Builtin(Prim::Int), Val::I64(value)) => Value::Int(*value),
            (Ty::Builtin(Prim::Float), Val::F64(value)) => Value::Float(f64::from(*value)),
            (Ty::Builtin(Prim::String), Val::I32(handle)) => {
                let text = self.store.data().string(*handle).map_err(|_| mismatch())?;
                Value::Str(text.to_string())
            }
            (Ty::Class { id, .. }, Val::I32(handle)) => Value::Object {
                class: self.modules.get(&id).cloned().ok_or_else(mismatch)?,
                handle: *handle as u32,
            },
            _ => return Err(mismatch()),
        })
    }
}

fn expected_args(owner: ClassId, class_name: &str, info: &MethodInfo) -> Vec<Ty> {
    let receiver = (!info.is_static).then(|| Ty::Class {
        id: owner,
        name: Sym::intern(class_name),
    });
    receiver.into_iter().chain(info.params.iter().copied()).collect()
}

fn zero(ty: Ty) -> Val {
    match ty {
        Ty::Builtin(Prim::Int) => Val::I64(0),
        Ty::Builtin(Prim::Float) => Val::F64(0.0f64.into()),
        Ty::Builtin(Prim::String) | Ty::Class { .. } => Val::I32(0),
    }
}

fn link_error(class: &str, err: impl fmt::Display) -> CoreError {
    CoreError::Link {
        class: class.to_string(),
        message: err.to_string(),
    }
}

/// The memory every class imports as `nz.memory`, exported by a one-line
/// runtime module.
fn shared_memory(engine: &Engine, store: &mut Store<HostState>) -> Result<Memory, CoreError> {
    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: 1,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    let mut exports = ExportSection::new();
    exports.export(MEMORY, ExportKind::Memory, 0);
    let mut runtime = wasm_encoder::Module::new();
    runtime.section(&memories);
    runtime.section(&exports);
    let bytes = runtime.finish();

    let module = Module::new(engine, &bytes).map_err(|err| link_error(HOST_MODULE, err))?;
    let instance = Linker::new(engine)
        .instantiate_and_start(&mut *store, &module)
        .map_err(|err| link_error(HOST_MODULE, err))?;
    instance
        .get_memory(&*store, MEMORY)
        .ok_or_else(|| link_error(HOST_MODULE, "runtime memory is not exported"))
}

fn host_name(op: Intrinsic) -> String {
    builtins::by_intrinsic(op)
        .and_then(|builtin| builtin.host_import())
        .unwrap_or_default()
}

fn link_host(linker: &mut Linker<HostState>) -> Result<(), wasmi::errors::LinkerError> {
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::IntPow),
        |base: i64, exponent: i64| -> Result<i64, wasmi::Error> {
            u32::try_from(exponent)
                .ok()
                .and_then(|exponent| base.checked_pow(exponent))
                .ok_or_else(|| wasmi::Error::new(format!("{base} ^ {exponent} is out of range")))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::IntParse),
        |caller: Caller<'_, HostState>, text: i32| -> Result<i64, wasmi::Error> {
            let text = caller.data().string(text)?;
            text.trim()
                .parse()
                .map_err(|_| wasmi::Error::new(format!("cannot parse {text:?} as Int")))
        },
    )?;
    linker.func_wrap(HOST_MODULE, &host_name(Intrinsic::IntMax), |a: i64, b: i64| a.max(b))?;
    linker.func_wrap(HOST_MODULE, &host_name(Intrinsic::IntMin), |a: i64, b: i64| a.min(b))?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::FloatParse),
        |caller: Caller<'_, HostState>, text: i32| -> Result<f64, wasmi::Error> {
            let text = caller.data().string(text)?;
            text.trim()
                .parse()
                .map_err(|_| wasmi::Error::new(format!("cannot parse {text:?} as Float")))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::StringConcat),
        |mut caller: Caller<'_, HostState>, left: i32, right: i32| -> Result<i32, wasmi::Error> {
            let joined = format!("{}{}", caller.data().string(left)?, caller.data().string(right)?);
            Ok(caller.data_mut().push(joined))
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::StringFromInt),
        |mut caller: Caller<'_, HostState>, value: i64| -> i32 { caller.data_mut().push(value.to_string()) },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::StringFromFloat),
        |mut caller: Caller<'_, HostState>, value: f64| -> i32 { caller.data_mut().push(format!("{value:?}")) },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        &host_name(Intrinsic::StringLength),
        |caller: Caller<'_, HostState>, text: i32| -> Result<i64, wasmi::Error> {
            Ok(caller.data().string(text)?.chars().count() as i64)
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_wasm::generate_class;
    use crate::hir::ClassTable;
    use crate::loc::Loc;
    use crate::parser::parse_module;
    use crate::path::ModulePath;
    use crate::typecheck::check_module;

    fn build(table: &mut ClassTable, name: &str, source: &str, imports: &[ClassId]) -> ClassArtifact {
        let ast = parse_module(source, Sym::intern(name)).expect("parse");
        let imports: Vec<_> = imports.iter().map(|id| (Loc::ZERO, *id)).collect();
        let id = check_module(table, &ModulePath::parse(name), &ast, &imports).expect("check");
        generate_class(table, id, source).expect("codegen")
    }

    fn load(name: &str, source: &str) -> ClassLoader {
        let artifact = build(&mut ClassTable::new(), name, source, &[]);
        let mut loader = ClassLoader::new().expect("loader");
        loader.define(&artifact).expect("define");
        loader
    }

    #[test]
    fn runs_static_arithmetic() {
        let mut loader = load("calc", "fun Int twice(Int y)\n\ty + y\n\nfun Int pow(Int a, Int b)\n\ta ^ b");
        assert_eq!(loader.invoke("calc", "twice", &[Value::Int(21)]).expect("twice"), Value::Int(42));
        assert_eq!(
            loader.invoke("calc", "pow", &[Value::Int(2), Value::Int(10)]).expect("pow"),
            Value::Int(1024)
        );
    }

    #[test]
    fn host_strings_round_trip() {
        let mut loader = load(
            "greet",
            "fun String hello(String name)\n\t\"hello {name}!\"\n\nfun Int size(String s)\n\tString.length s",
        );
        assert_eq!(
            loader.invoke("greet", "hello", &[Value::Str("nz".into())]).expect("hello"),
            Value::Str("hello nz!".into())
        );
        assert_eq!(loader.invoke("greet", "size", &[Value::Str("four".into())]).expect("size"), Value::Int(4));
    }

    #[test]
    fn objects_live_in_shared_memory() {
        let mut loader = load(
            "point",
            "slots\n\tval Int x\n\tval Float y\n\ndef Int getX()\n\tx\n\ndef Float getY()\n\ty",
        );
        let point = loader
            .new_object("point", &[Value::Int(3), Value::Float(1.5)])
            .expect("new");
        assert_eq!(loader.invoke("point", "getX", &[point.clone()]).expect("x"), Value::Int(3));
        assert_eq!(loader.invoke("point", "getY", &[point.clone()]).expect("y"), Value::Float(1.5));
        assert_eq!(loader.field(&point, "x").expect("field"), Value::Int(3));

        let second = loader.new_object("point", &[Value::Int(4), Value::Float(0.0)]).expect("new");
        assert_ne!(point, second);
    }

    #[test]
    fn classes_are_defined_once() {
        let artifact = build(&mut ClassTable::new(), "once", "fun Int one()\n\t1", &[]);
        let mut loader = ClassLoader::new().expect("loader");
        loader.define(&artifact).expect("first");
        assert!(matches!(loader.define(&artifact), Err(CoreError::DuplicateClass(name)) if name == "once"));
    }

    #[test]
    fn classes_call_earlier_classes() {
        let mut table = ClassTable::new();
        let point = build(&mut table, "Point", "fun Int origin()\n\t7", &[]);
        let user = build(&mut table, "user", "fun Int x()\n\tPoint.origin + 1", &[point.id]);
        let mut loader = ClassLoader::new().expect("loader");
        loader.define(&point).expect("point");
        loader.define(&user).expect("user");
        assert_eq!(loader.invoke("user", "x", &[]).expect("x"), Value::Int(8));
    }

    #[test]
    fn a_class_that_failed_to_link_can_be_defined_again() {
        let mut table = ClassTable::new();
        let point = build(&mut table, "Point", "fun Int origin()\n\t7", &[]);
        let user = build(&mut table, "user", "fun Int x()\n\tPoint.origin + String.length \"ab\"", &[point.id]);
        let mut loader = ClassLoader::new().expect("loader");

        let err = loader.define(&user).expect_err("Point is not loaded yet");
        assert!(matches!(err, CoreError::Link { ref class, .. } if class == "user"));
        assert!(!loader.is_defined("user"));
        assert!(loader.store.data().strings.is_empty());

        loader.define(&point).expect("point");
        loader.define(&user).expect("retry");
        assert_eq!(loader.store.data().strings.len(), user.strings.len());
        assert_eq!(loader.invoke("user", "x", &[]).expect("x"), Value::Int(9));
    }

    #[test]
    fn traps_report_the_method_line() {
        let mut loader = load("div", "fun Int one()\n\t1\n\nfun Int boom(Int y)\n\ty / (y - y)");
        let err = loader.invoke("div", "boom", &[Value::Int(1)]).expect_err("division by zero");
        assert!(matches!(err, CoreError::Runtime { line: 5, ref method, .. } if method == "boom"));

        let err = loader
            .invoke("div", "boom", &[Value::Str("1".into())])
            .expect_err("wrong type");
        assert!(matches!(err, CoreError::BadArguments { .. }));
        assert!(matches!(loader.invoke("div", "nope", &[]), Err(CoreError::NoSuchMethod { .. })));
        assert!(matches!(loader.invoke("nope", "boom", &[]), Err(CoreError::NoSuchClass(_))));
    }

    #[test]
    fn host_parse_failures_trap() {
        let mut loader = load("p", "fun Int read(String s)\n\tInt.parse s");
        assert_eq!(loader.invoke("p", "read", &[Value::Str(" 12 ".into())]).expect("read"), Value::Int(12));
        assert!(matches!(
            loader.invoke("p", "read", &[Value::Str("x".into())]),
            Err(CoreError::Runtime { .. })
        ));
    }

    #[test]
    fn parses_arguments_by_type() {
        assert_eq!(Value::parse(Ty::INT, "5"), Some(Value::Int(5)));
        assert_eq!(Value::parse(Ty::FLOAT, "2.5"), Some(Value::Float(2.5)));
        assert_eq!(Value::parse(Ty::STRING, "hi"), Some(Value::Str("hi".into())));
        assert_eq!(Value::parse(Ty::INT, "2.5"), None);
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
    }
}
