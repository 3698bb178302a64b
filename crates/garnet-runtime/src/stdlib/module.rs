//! `Module` and `Class`: instantiation, mixins, reflection and the
//! metaprogramming hooks used inside class bodies

use super::{define, define_private, expect_name, expect_integer, require_block};
use crate::object::{Arity, ClassId, ClassKind, MethodDef, MethodEntry, Visibility};
use crate::symbol::Symbol;
use crate::value::{HashTable, Proc, ProcBody, RObject, Value};
use crate::vm::{BlockCall, LexicalScope, Vm, VmResult};
use std::cell::RefCell;
use std::rc::Rc;

pub(super) fn install(vm: &mut Vm) {
    let m = ClassId::MODULE;
    define(vm, m, "name", Arity::exactly(0), name);
    define(vm, m, "to_s", Arity::exactly(0), to_s);
    define(vm, m, "inspect", Arity::exactly(0), to_s);
    define(vm, m, "===", Arity::exactly(1), case_equal);
    define(vm, m, "<", Arity::exactly(1), less_than);
    define(vm, m, "<=", Arity::exactly(1), less_or_equal);
    define(vm, m, "include?", Arity::exactly(1), includes);
    define(vm, m, "ancestors", Arity::exactly(0), ancestors);
    define(vm, m, "method_defined?", Arity::exactly(1), method_defined);
    define(vm, m, "const_get", Arity::exactly(1), const_get);
    define(vm, m, "class_eval", Arity::exactly(0), class_eval);
    define(vm, m, "module_eval", Arity::exactly(0), class_eval);
    define(vm, m, "instance_methods", Arity::range(0, 1), instance_methods);

    // Called from class bodies with an implicit receiver
    define_private(vm, m, "include", Arity::at_least(1), include);
    define_private(vm, m, "attr_reader", Arity::at_least(0), attr_reader);
    define_private(vm, m, "attr_writer", Arity::at_least(0), attr_writer);
    define_private(vm, m, "attr_accessor", Arity::at_least(0), attr_accessor);
    define_private(vm, m, "define_method", Arity::range(1, 2), define_method);
    define_private(vm, m, "alias_method", Arity::exactly(2), alias_method);
    define_private(vm, m, "public", Arity::at_least(0), public);
    define_private(vm, m, "private", Arity::at_least(0), private);
    define_private(vm, m, "protected", Arity::at_least(0), protected);

    let c = ClassId::CLASS;
    define(vm, c, "new", Arity::at_least(0), new);
    define(vm, c, "allocate", Arity::exactly(0), allocate);
    define(vm, c, "superclass", Arity::exactly(0), superclass);
}

/// A module argument to `include`/`extend`
pub(crate) fn expect_mixin(vm: &mut Vm, value: &Value) -> VmResult<ClassId> {
    match value {
        Value::Class(id) if vm.classes.get(*id).is_module() => Ok(*id),
        other => {
            let class = super::class_name(vm, other);
            Err(vm.raise_error(
                ClassId::TYPE_ERROR,
                format!("wrong argument type {} (expected Module)", class),
            ))
        }
    }
}

// ============================================================================
// Instantiation
// ============================================================================

/// `Foo.new(...)`: allocate, then dispatch `initialize` (private, so the
/// call is made as if from inside the object)
fn new(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    match class {
        ClassId::CLASS => return new_class(vm, args, block),
        ClassId::MODULE => {
            let module = vm.classes.define_module(None);
            return evaluate_body(vm, module, block);
        }
        _ => {}
    }
    if let Some(value) = new_builtin(vm, class, args, block)? {
        return Ok(value);
    }
    let object = allocate(vm, recv, &[], None)?;
    vm.call_method(&object, "initialize", args.to_vec(), block.cloned())?;
    Ok(object)
}

/// `Class.new(superclass = Object) { body }`
fn new_class(vm: &mut Vm, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let superclass = match args.first() {
        Some(value) => match value {
            Value::Class(id) if vm.classes.get(*id).kind == ClassKind::Class => *id,
            _ => return Err(vm.raise_error(ClassId::TYPE_ERROR, "superclass must be a Class")),
        },
        None => ClassId::OBJECT,
    };
    let class = vm.classes.define_class(None, superclass);
    evaluate_body(vm, class, block)
}

fn evaluate_body(vm: &mut Vm, class: ClassId, block: Option<&Rc<Proc>>) -> VmResult<Value> {
    if let Some(block) = block {
        module_exec(vm, class, block)?;
    }
    Ok(Value::Class(class))
}

/// Value classes build their own representation instead of a plain object
fn new_builtin(
    vm: &mut Vm,
    class: ClassId,
    args: &[Value],
    block: Option<&Rc<Proc>>,
) -> VmResult<Option<Value>> {
    let value = match class {
        ClassId::STRING => match args {
            [] => Value::string(""),
            [Value::String(s)] => Value::string(s.borrow().clone()),
            [other] => return Err(super::conversion_error(vm, other, "String")),
            _ => return Err(arity(vm, args.len(), "0..1")),
        },
        ClassId::ARRAY => match args {
            [] => Value::array(Vec::new()),
            [size, rest @ ..] if rest.len() <= 1 => {
                let size = expect_integer(vm, size)?;
                if size < 0 {
                    return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "negative array size"));
                }
                let fill = rest.first().cloned().unwrap_or(Value::Nil);
                let mut items = Vec::with_capacity(size as usize);
                for index in 0..size {
                    items.push(match block {
                        Some(block) => vm.call_block(block, vec![Value::Integer(index)])?,
                        None => fill.clone(),
                    });
                }
                Value::array(items)
            }
            _ => return Err(arity(vm, args.len(), "0..2")),
        },
        ClassId::HASH if args.is_empty() => Value::Hash(Rc::new(RefCell::new(HashTable::new()))),
        ClassId::HASH => return Err(arity(vm, args.len(), "0")),
        ClassId::PROC => Value::Proc(Rc::clone(require_block(vm, block)?)),
        ClassId::INTEGER
        | ClassId::FLOAT
        | ClassId::SYMBOL
        | ClassId::NIL_CLASS
        | ClassId::TRUE_CLASS
        | ClassId::FALSE_CLASS
        | ClassId::RANGE => {
            let recv = Value::Class(class);
            return Err(vm.no_method_error(&recv, "new"));
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn arity(vm: &mut Vm, given: usize, expected: &str) -> crate::vm::Control {
    vm.raise_error(
        ClassId::ARGUMENT_ERROR,
        format!("wrong number of arguments (given {}, expected {})", given, expected),
    )
}

fn allocate(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    if vm.classes.get(class).is_singleton() {
        return Err(vm.raise_error(ClassId::TYPE_ERROR, "can't create instance of singleton class"));
    }
    Ok(Value::Object(RObject::new(class)))
}

// ============================================================================
// Reflection
// ============================================================================

fn name(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    Ok(match &vm.classes.get(class).name {
        Some(name) => Value::string(name.as_str()),
        None => Value::Nil,
    })
}

fn to_s(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    Ok(Value::string(vm.classes.name_of(class)))
}

fn case_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    Ok(Value::bool(vm.kind_of(&args[0], class)))
}

fn less_than(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let other = vm.expect_module(&args[0])?;
    Ok(Value::bool(class != other && vm.classes.inherits(class, other)))
}

fn less_or_equal(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let other = vm.expect_module(&args[0])?;
    Ok(Value::bool(vm.classes.inherits(class, other)))
}

fn includes(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let module = vm.expect_module(&args[0])?;
    let included = vm.classes.get(module).is_module()
        && class != module
        && vm.classes.inherits(class, module);
    Ok(Value::bool(included))
}

fn ancestors(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let list = vm
        .classes
        .ancestor_modules(class)
        .into_iter()
        .filter(|id| !vm.classes.get(*id).is_singleton())
        .map(Value::Class)
        .collect();
    Ok(Value::array(list))
}

fn superclass(vm: &mut Vm, recv: &Value, _args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    Ok(vm
        .classes
        .superclass_of(class)
        .map_or(Value::Nil, Value::Class))
}

fn method_defined(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let name = expect_name(vm, &args[0])?;
    let defined = vm
        .classes
        .find_method(class, name.as_str())
        .map_or(false, |entry| entry.visibility != Visibility::Private);
    Ok(Value::bool(defined))
}

/// Public and protected method names; `false` limits to the class's own table
fn instance_methods(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let inherited = args.first().map_or(true, Value::is_truthy);
    let chain = if inherited {
        vm.classes.ancestor_modules(class)
    } else {
        vec![class]
    };
    let mut names: Vec<Symbol> = Vec::new();
    for id in chain {
        let mut own: Vec<&Rc<MethodEntry>> = vm.classes.get(id).methods.values().collect();
        own.sort_by(|a, b| a.name.cmp(&b.name));
        for entry in own {
            if names.contains(&entry.name) {
                continue;
            }
            let visible = vm
                .classes
                .find_method(class, entry.name.as_str())
                .map_or(false, |found| found.visibility != Visibility::Private);
            if visible {
                names.push(entry.name.clone());
            }
        }
    }
    Ok(Value::array(names.into_iter().map(Value::Symbol).collect()))
}

/// `Foo.const_get(:Bar)` or `Foo.const_get("Bar::Baz")`
fn const_get(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let mut scope = vm.expect_module(recv)?;
    let path = expect_name(vm, &args[0])?;
    let mut found = Value::Class(scope);
    for segment in path.as_str().split("::").filter(|s| !s.is_empty()) {
        let value = vm
            .classes
            .inherited_constant(scope, segment)
            .or_else(|| vm.classes.own_constant(ClassId::OBJECT, segment));
        found = match value {
            Some(value) => value,
            None => {
                let owner = vm.classes.name_of(scope);
                return Err(vm.raise_error(
                    ClassId::NAME_ERROR,
                    format!("uninitialized constant {}::{}", owner, segment),
                ));
            }
        };
        if let Value::Class(id) = found {
            scope = id;
        }
    }
    Ok(found)
}

// ============================================================================
// Class-body hooks
// ============================================================================

/// Run a block as a class body: `self`, `def` and constants target `class`
fn module_exec(vm: &mut Vm, class: ClassId, block: &Rc<Proc>) -> VmResult<Value> {
    let lexical = match &block.body {
        ProcBody::Block { env, .. } => Some(LexicalScope::nested(&env.lexical, class)),
        ProcBody::Symbol(_) => None,
    };
    let receiver = Value::Class(class);
    vm.call_block_with(
        block,
        vec![receiver.clone()],
        None,
        BlockCall {
            self_value: Some(receiver),
            lexical,
            ..BlockCall::default()
        },
    )
}

fn class_eval(vm: &mut Vm, recv: &Value, _args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let block = require_block(vm, block)?;
    module_exec(vm, class, block)
}

fn include(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    for module in args.iter().rev() {
        let module = expect_mixin(vm, module)?;
        vm.classes.include_module(class, module);
    }
    Ok(recv.clone())
}

fn attr_names(vm: &mut Vm, args: &[Value]) -> VmResult<Vec<Symbol>> {
    let mut names = Vec::with_capacity(args.len());
    for arg in args {
        names.push(expect_name(vm, arg)?);
    }
    Ok(names)
}

fn define_attrs(vm: &mut Vm, recv: &Value, args: &[Value], reader: bool, writer: bool) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let visibility = vm.default_visibility()?;
    let mut defined = Vec::new();
    for name in attr_names(vm, args)? {
        let ivar = Symbol::from(format!("@{}", name));
        if reader {
            vm.install_method(
                class,
                MethodEntry {
                    name: name.clone(),
                    owner: class,
                    visibility,
                    def: MethodDef::AttrReader(ivar.clone()),
                },
            );
            defined.push(Value::Symbol(name.clone()));
        }
        if writer {
            let setter = Symbol::from(format!("{}=", name));
            vm.install_method(
                class,
                MethodEntry {
                    name: setter.clone(),
                    owner: class,
                    visibility,
                    def: MethodDef::AttrWriter(ivar),
                },
            );
            defined.push(Value::Symbol(setter));
        }
    }
    Ok(Value::array(defined))
}

fn attr_reader(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    define_attrs(vm, recv, args, true, false)
}

fn attr_writer(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    define_attrs(vm, recv, args, false, true)
}

fn attr_accessor(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    define_attrs(vm, recv, args, true, true)
}

/// `define_method(:name) { |args| ... }` or `define_method(:name, a_proc)`
fn define_method(vm: &mut Vm, recv: &Value, args: &[Value], block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let name = expect_name(vm, &args[0])?;
    let body = match (args.get(1), block) {
        (Some(Value::Proc(body)), _) => Rc::clone(body),
        (Some(other), _) => {
            let shown = super::class_name(vm, other);
            return Err(vm.raise_error(
                ClassId::TYPE_ERROR,
                format!("wrong argument type {} (expected Proc/Method)", shown),
            ));
        }
        (None, Some(block)) => Rc::clone(block),
        (None, None) => return Err(vm.raise_error(ClassId::ARGUMENT_ERROR, "tried to create Proc object without a block")),
    };
    let visibility = vm.default_visibility()?;
    vm.install_method(
        class,
        MethodEntry {
            name: name.clone(),
            owner: class,
            visibility,
            def: MethodDef::Proc(body),
        },
    );
    Ok(Value::Symbol(name))
}

fn alias_method(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    let new_name = expect_name(vm, &args[0])?;
    let old_name = expect_name(vm, &args[1])?;
    vm.alias_method(class, &new_name, &old_name)?;
    Ok(Value::Symbol(new_name))
}

/// Without names, change the default for later `def`s in the class body;
/// with names, change those methods (copied into this class if inherited)
fn set_visibility(vm: &mut Vm, recv: &Value, args: &[Value], visibility: Visibility) -> VmResult<Value> {
    let class = vm.expect_module(recv)?;
    if args.is_empty() {
        vm.scope_env()?.visibility.set(visibility);
        return Ok(Value::Nil);
    }
    let mut names = Vec::new();
    for arg in args {
        match arg {
            Value::Array(items) => names.extend(items.borrow().iter().cloned()),
            other => names.push(other.clone()),
        }
    }
    for name in &names {
        let name = expect_name(vm, name)?;
        let Some(entry) = vm.classes.find_method(class, name.as_str()) else {
            let shown = vm.classes.name_of(class);
            return Err(vm.raise_error(
                ClassId::NAME_ERROR,
                format!("undefined method '{}' for class '{}'", name, shown),
            ));
        };
        vm.classes.add_method(class, entry.with_visibility(visibility));
    }
    Ok(match args {
        [single] => single.clone(),
        many => Value::array(many.to_vec()),
    })
}

fn public(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    set_visibility(vm, recv, args, Visibility::Public)
}

fn private(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    set_visibility(vm, recv, args, Visibility::Private)
}

fn protected(vm: &mut Vm, recv: &Value, args: &[Value], _block: Option<&Rc<Proc>>) -> VmResult<Value> {
    set_visibility(vm, recv, args, Visibility::Protected)
}
