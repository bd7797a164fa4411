//! End-to-end checker tests over builder-constructed libraries.

use quill_ast::{AstBuilder, BinaryOp, NodeIdGen, Stmt};
use quill_checker::{Program, check_program};
use quill_common::diagnostics::ErrorCode;
use quill_loader::{Library, LibraryGraph};
use quill_types::TypeId;
use rustc_hash::FxHashMap;
use std::sync::Arc;

fn library(path: &str, stmts: Vec<Stmt>) -> Arc<Library> {
    library_with_imports(path, stmts, &[])
}

fn library_with_imports(path: &str, stmts: Vec<Stmt>, imports: &[(&str, &str)]) -> Arc<Library> {
    let mut import_map = FxHashMap::default();
    let mut import_order = Vec::new();
    for (spec, target) in imports {
        import_map.insert((*spec).to_string(), (*target).to_string());
        import_order.push((*target).to_string());
    }
    Arc::new(Library {
        path: path.to_string(),
        is_stdlib: path.starts_with("std/"),
        text: String::new(),
        stmts,
        imports: import_map,
        import_order,
        parse_diagnostics: Vec::new(),
    })
}

fn graph(libraries: Vec<Arc<Library>>) -> LibraryGraph {
    LibraryGraph {
        libraries,
        has_cycle: false,
        cycle_participants: Vec::new(),
    }
}

fn check(libraries: Vec<Arc<Library>>) -> Program {
    let mut program = Program::new();
    check_program(&graph(libraries), &mut program);
    program
}

fn codes(program: &Program) -> Vec<ErrorCode> {
    program.sema.diagnostics().iter().map(|d| d.code).collect()
}

#[test]
fn arithmetic_and_literal_bindings() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // let x = 1; let y = x + 1;
    let one = b.int(1);
    let x_stmt = b.let_("x", one);
    let x_id = x_stmt.id;
    let x_ref = b.ident("x");
    let one_again = b.int(1);
    let sum = b.add(x_ref, one_again);
    let y_stmt = b.let_("y", sum);
    let y_id = y_stmt.id;

    let program = check(vec![library("main.ql", vec![x_stmt, y_stmt])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
    // `let` keeps the literal type.
    assert_eq!(
        program.sema.type_of(x_id),
        Some(program.types.literal_int(1))
    );
    // Arithmetic widens.
    assert_eq!(program.sema.type_of(y_id), Some(TypeId::I32));
}

#[test]
fn var_widens_literals() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let one = b.int(1);
    let stmt = b.var_("x", one);
    let id = stmt.id;
    let program = check(vec![library("main.ql", vec![stmt])]);
    assert_eq!(program.sema.type_of(id), Some(TypeId::I32));
}

#[test]
fn unknown_name_diagnoses_symbol_not_found() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let missing = b.ident("missing");
    let stmt = b.let_("x", missing);
    let program = check(vec![library("main.ql", vec![stmt])]);
    assert!(codes(&program).contains(&ErrorCode::SymbolNotFound));
}

#[test]
fn annotated_binding_mismatch() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let ann = b.ty("i32");
    let init = b.bool_(true);
    let stmt = b.let_typed("x", ann, init);
    let program = check(vec![library("main.ql", vec![stmt])]);
    assert!(codes(&program).contains(&ErrorCode::TypeMismatch));
}

#[test]
fn union_cannot_mix_scalar_and_reference() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let i32_ann = b.ty("i32");
    let string_ann = b.ty("string");
    let union_ann = b.ty_union(vec![i32_ann, string_ann]);
    let init = b.int(1);
    let stmt = b.let_typed("x", union_ann, init);
    let program = check(vec![library("main.ql", vec![stmt])]);
    assert!(codes(&program).contains(&ErrorCode::UnionMixesPrimitiveAndReference));
}

#[test]
fn abstract_class_cannot_be_instantiated() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut shape = b.class("Shape");
    shape.is_abstract = true;
    let ret = b.ty("i32");
    shape.members.push(b.abstract_method("area", vec![], Some(ret)));
    let class_stmt = b.stmt_class(shape);

    let shape_ann = b.ty("Shape");
    let new_expr = b.new_(shape_ann, vec![]);
    let stmt = b.let_("s", new_expr);

    let program = check(vec![library("main.ql", vec![class_stmt, stmt])]);
    assert!(codes(&program).contains(&ErrorCode::AbstractInstantiation));
}

#[test]
fn missing_abstract_implementation_is_diagnosed() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut shape = b.class("Shape");
    shape.is_abstract = true;
    let ret = b.ty("i32");
    shape.members.push(b.abstract_method("area", vec![], Some(ret)));
    let shape_stmt = b.stmt_class(shape);

    let mut square = b.class("Square");
    square.extends = Some(b.ty("Shape"));
    let square_stmt = b.stmt_class(square);

    let program = check(vec![library("main.ql", vec![shape_stmt, square_stmt])]);
    assert!(codes(&program).contains(&ErrorCode::MissingAbstractImplementation));
}

#[test]
fn virtual_override_through_abstract_base_checks() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // abstract class Shape { abstract area(): i32 }
    let mut shape = b.class("Shape");
    shape.is_abstract = true;
    let ret = b.ty("i32");
    shape.members.push(b.abstract_method("area", vec![], Some(ret)));
    let shape_stmt = b.stmt_class(shape);

    // class Square extends Shape { side = 5 as i32; area(): i32 { return this.side * this.side } }
    let mut square = b.class("Square");
    square.extends = Some(b.ty("Shape"));
    let five = b.int(5);
    let i32_ann = b.ty("i32");
    let five_i32 = b.cast(five, i32_ann);
    square.members.push(b.field("side", None, Some(five_i32)));
    let this1 = b.this();
    let side1 = b.member(this1, "side");
    let this2 = b.this();
    let side2 = b.member(this2, "side");
    let product = b.mul(side1, side2);
    let ret_stmt = b.ret(Some(product));
    let body = b.block(vec![ret_stmt]);
    let area_ret = b.ty("i32");
    square.members.push(b.method("area", vec![], Some(area_ret), body));
    let square_stmt = b.stmt_class(square);

    let program = check(vec![library("main.ql", vec![shape_stmt, square_stmt])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
}

#[test]
fn final_methods_cannot_be_overridden() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut base = b.class("Base");
    let ret = b.ty("i32");
    let zero = b.int(0);
    let ret_stmt = b.ret(Some(zero));
    let body = b.block(vec![ret_stmt]);
    let mut m = b.method("id", vec![], Some(ret), body);
    if let quill_ast::MemberKind::Method(method) = &mut m.kind {
        method.is_final = true;
    }
    base.members.push(m);
    let base_stmt = b.stmt_class(base);

    let mut derived = b.class("Derived");
    derived.extends = Some(b.ty("Base"));
    let ret2 = b.ty("i32");
    let one = b.int(1);
    let ret_stmt2 = b.ret(Some(one));
    let body2 = b.block(vec![ret_stmt2]);
    derived.members.push(b.method("id", vec![], Some(ret2), body2));
    let derived_stmt = b.stmt_class(derived);

    let program = check(vec![library("main.ql", vec![base_stmt, derived_stmt])]);
    assert!(codes(&program).contains(&ErrorCode::CannotOverrideFinal));
}

#[test]
fn final_classes_cannot_be_extended() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut base = b.class("Sealed");
    base.is_final = true;
    let base_stmt = b.stmt_class(base);
    let mut derived = b.class("Sub");
    derived.extends = Some(b.ty("Sealed"));
    let derived_stmt = b.stmt_class(derived);

    let program = check(vec![library("main.ql", vec![base_stmt, derived_stmt])]);
    assert!(codes(&program).contains(&ErrorCode::CannotExtendFinal));
}

#[test]
fn literal_union_match_exhaustiveness() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // let x: 1 | 2 = 1; complete match produces no diagnostic.
    let one_ann = b.ty_lit_int(1);
    let two_ann = b.ty_lit_int(2);
    let union_ann = b.ty_union(vec![one_ann, two_ann]);
    let init = b.int(1);
    let x = b.let_typed("x", union_ann, init);

    let scrut = b.ident("x");
    let p1 = b.pat_int(1);
    let b1 = b.int(10);
    let arm1 = b.arm(p1, b1);
    let p2 = b.pat_int(2);
    let b2 = b.int(20);
    let arm2 = b.arm(p2, b2);
    let m = b.match_(scrut, vec![arm1, arm2]);
    let y = b.let_("y", m);

    let program = check(vec![library("main.ql", vec![x, y])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
}

#[test]
fn incomplete_literal_match_names_the_missing_value() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let one_ann = b.ty_lit_int(1);
    let two_ann = b.ty_lit_int(2);
    let union_ann = b.ty_union(vec![one_ann, two_ann]);
    let init = b.int(1);
    let x = b.let_typed("x", union_ann, init);

    let scrut = b.ident("x");
    let p1 = b.pat_int(1);
    let b1 = b.int(10);
    let arm1 = b.arm(p1, b1);
    let m = b.match_(scrut, vec![arm1]);
    let y = b.let_("y", m);

    let program = check(vec![library("main.ql", vec![x, y])]);
    let diag = program
        .sema
        .diagnostics()
        .iter()
        .find(|d| d.code == ErrorCode::NonExhaustiveMatch)
        .expect("non-exhaustive diagnostic");
    assert!(diag.message.contains('2'), "message: {}", diag.message);
}

#[test]
fn unreachable_case_is_diagnosed() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let one_ann = b.ty_lit_int(1);
    let init = b.int(1);
    let x = b.let_typed("x", one_ann, init);

    let scrut = b.ident("x");
    let p1 = b.pat_int(1);
    let b1 = b.int(10);
    let arm1 = b.arm(p1, b1);
    let p2 = b.pat_int(1);
    let b2 = b.int(20);
    let arm2 = b.arm(p2, b2);
    let m = b.match_(scrut, vec![arm1, arm2]);
    let y = b.let_("y", m);

    let program = check(vec![library("main.ql", vec![x, y])]);
    assert!(codes(&program).contains(&ErrorCode::UnreachableCase));
}

#[test]
fn enum_match_subtracts_members() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let color = b.enum_("Color", vec!["Red", "Green", "Blue"]);
    let color_ann = b.ty("Color");
    let red = b.ident("Color");
    let red = b.member(red, "Red");
    let x = b.let_typed("x", color_ann, red);

    let scrut = b.ident("x");
    let p1 = b.pat_enum("Color", "Red");
    let b1 = b.int(1);
    let arm1 = b.arm(p1, b1);
    let p2 = b.pat_enum("Color", "Green");
    let b2 = b.int(2);
    let arm2 = b.arm(p2, b2);
    let m = b.match_(scrut, vec![arm1, arm2]);
    let y = b.let_("y", m);

    let program = check(vec![library("main.ql", vec![color, x, y])]);
    let diag = program
        .sema
        .diagnostics()
        .iter()
        .find(|d| d.code == ErrorCode::NonExhaustiveMatch)
        .expect("missing Blue");
    assert!(diag.message.contains("Blue"), "message: {}", diag.message);
}

#[test]
fn null_guard_narrows() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // let x: string | null = null;
    let s_ann = b.ty("string");
    let n_ann = b.ty_null();
    let union_ann = b.ty_union(vec![s_ann, n_ann]);
    let init = b.null();
    let x = b.let_typed("x", union_ann, init);

    // if (x != null) { let y: string = x; }
    let x_ref = b.ident("x");
    let null_lit = b.null();
    let cond = b.binary(BinaryOp::Ne, x_ref, null_lit);
    let y_ann = b.ty("string");
    let x_ref2 = b.ident("x");
    let y = b.let_typed("y", y_ann, x_ref2);
    let then_block = b.block(vec![y]);
    let if_stmt = b.if_(cond, then_block, None);

    let program = check(vec![library("main.ql", vec![x, if_stmt])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
}

#[test]
fn without_guard_nullable_assignment_fails() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let s_ann = b.ty("string");
    let n_ann = b.ty_null();
    let union_ann = b.ty_union(vec![s_ann, n_ann]);
    let init = b.null();
    let x = b.let_typed("x", union_ann, init);

    let y_ann = b.ty("string");
    let x_ref = b.ident("x");
    let y = b.let_typed("y", y_ann, x_ref);

    let program = check(vec![library("main.ql", vec![x, y])]);
    assert!(codes(&program).contains(&ErrorCode::TypeMismatch));
}

#[test]
fn generic_constraint_violation() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // class Base {} ; class Box<T ext Base> {} ; let x: Box<i32>
    let base = b.class("Base");
    let base_stmt = b.stmt_class(base);
    let mut boxed = b.class("Box");
    let mut t = b.type_param("T");
    t.constraint = Some(b.ty("Base"));
    boxed.type_params.push(t);
    let box_stmt = b.stmt_class(boxed);

    let i32_ann = b.ty("i32");
    let box_ann = b.ty_args("Box", vec![i32_ann]);
    let null_init = b.null();
    let x = b.let_typed("x", box_ann, null_init);

    let program = check(vec![library("main.ql", vec![base_stmt, box_stmt, x])]);
    assert!(codes(&program).contains(&ErrorCode::ConstraintViolation));
}

#[test]
fn generic_defaults_fill_missing_arguments() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut boxed = b.class("Box");
    let mut t = b.type_param("T");
    t.default = Some(b.ty("i32"));
    boxed.type_params.push(t);
    let value_ann = b.ty("T");
    boxed.members.push(b.field("value", Some(value_ann), None));
    let ctor_param_ann = b.ty("T");
    let ctor_param = b.param("v", ctor_param_ann);
    let this = b.this();
    let target = b.member(this, "value");
    let v = b.ident("v");
    let assign = b.assign(target, v);
    let assign_stmt = b.expr_stmt(assign);
    let ctor_body = b.block(vec![assign_stmt]);
    boxed.members.push(b.constructor(vec![ctor_param], ctor_body));
    let box_stmt = b.stmt_class(boxed);

    // let x: Box = new Box(1); -- T defaults to i32
    let box_ann = b.ty("Box");
    let box_ann2 = b.ty("Box");
    let one = b.int(1);
    let init = b.new_(box_ann2, vec![one]);
    let x = b.let_typed("x", box_ann, init);

    let program = check(vec![library("main.ql", vec![box_stmt, x])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
}

#[test]
fn imports_bind_declaration_identity_across_libraries() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);

    // a.ql: export class Handler { handle(x: i32): i32 { return x + 10 } }
    let mut handler_a = b.class("Handler");
    let p_ann = b.ty("i32");
    let p = b.param("x", p_ann);
    let x_ref = b.ident("x");
    let ten = b.int(10);
    let sum = b.add(x_ref, ten);
    let ret_stmt = b.ret(Some(sum));
    let body = b.block(vec![ret_stmt]);
    let ret_ann = b.ty("i32");
    handler_a.members.push(b.method("handle", vec![p], Some(ret_ann), body));
    let a_class = b.stmt_class(handler_a);
    let a_class = b.exported(a_class);

    // b.ql: export class Handler { process(x: i32): i32 { return x + 100 } }
    let mut handler_b = b.class("Handler");
    let p_ann = b.ty("i32");
    let p = b.param("x", p_ann);
    let x_ref = b.ident("x");
    let hundred = b.int(100);
    let sum = b.add(x_ref, hundred);
    let ret_stmt = b.ret(Some(sum));
    let body = b.block(vec![ret_stmt]);
    let ret_ann = b.ty("i32");
    handler_b
        .members
        .push(b.method("process", vec![p], Some(ret_ann), body));
    let b_class = b.stmt_class(handler_b);
    let b_class = b.exported(b_class);

    // main.ql imports both under aliases and uses both.
    let import_a = b.import_as("./a", vec![("Handler", "HandlerA")]);
    let import_b = b.import_as("./b", vec![("Handler", "HandlerB")]);
    let a_ann = b.ty("HandlerA");
    let a_new = b.new_(a_ann, vec![]);
    let a_let = b.let_("ha", a_new);
    let b_ann = b.ty("HandlerB");
    let b_new = b.new_(b_ann, vec![]);
    let b_let = b.let_("hb", b_new);
    let ha = b.ident("ha");
    let handle = b.member(ha, "handle");
    let ten = b.int(10);
    let call_a = b.call(handle, vec![ten]);
    let ra = b.let_("ra", call_a);
    let ra_id = ra.id;
    let hb = b.ident("hb");
    let process = b.member(hb, "process");
    let ten2 = b.int(10);
    let call_b = b.call(process, vec![ten2]);
    let rb = b.let_("rb", call_b);

    let program = check(vec![
        library("a.ql", vec![a_class]),
        library("b.ql", vec![b_class]),
        library_with_imports(
            "main.ql",
            vec![import_a, import_b, a_let, b_let, ra, rb],
            &[("./a", "a.ql"), ("./b", "b.ql")],
        ),
    ]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
    assert_eq!(program.sema.type_of(ra_id), Some(TypeId::I32));

    // The two Handler declarations stay distinct.
    let a_decl = program.decls.lookup("a.ql", "Handler").unwrap();
    let b_decl = program.decls.lookup("b.ql", "Handler").unwrap();
    assert_ne!(a_decl, b_decl);
}

#[test]
fn intrinsic_decorator_is_stdlib_only() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let ret_ann = b.ty("i32");
    let zero = b.int(0);
    let ret_stmt = b.ret(Some(zero));
    let body = b.block(vec![ret_stmt]);
    let mut func = b.func("probe", vec![], Some(ret_ann), body);
    if let quill_ast::StmtKind::Func(f) = &mut func.kind {
        f.decorators.push(quill_ast::Decorator {
            id: quill_ast::NodeId::DUMMY,
            span: quill_common::span::Span::dummy(),
            name: "intrinsic".to_string(),
            arg: Some("__array_len".to_string()),
        });
    }
    let program = check(vec![library("main.ql", vec![func])]);
    assert!(codes(&program).contains(&ErrorCode::DecoratorNotAllowed));
}

#[test]
fn unknown_intrinsic_name_in_stdlib() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let ret_ann = b.ty("i32");
    let zero = b.int(0);
    let ret_stmt = b.ret(Some(zero));
    let body = b.block(vec![ret_stmt]);
    let mut func = b.func("probe", vec![], Some(ret_ann), body);
    if let quill_ast::StmtKind::Func(f) = &mut func.kind {
        f.decorators.push(quill_ast::Decorator {
            id: quill_ast::NodeId::DUMMY,
            span: quill_common::span::Span::dummy(),
            name: "intrinsic".to_string(),
            arg: Some("__frobnicate".to_string()),
        });
    }
    let program = check(vec![library("std/core.ql", vec![func])]);
    assert!(codes(&program).contains(&ErrorCode::UnknownIntrinsic));
}

#[test]
fn field_initializers_cannot_read_later_fields() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let mut c = b.class("Pair");
    // a = b + 1 (reads b before its initializer ran)
    let b_ref = b.ident("b");
    let one = b.int(1);
    let sum = b.add(b_ref, one);
    let a_ann = b.ty("i32");
    c.members.push(b.field("a", Some(a_ann), Some(sum)));
    let b_ann = b.ty("i32");
    let two = b.int(2);
    c.members.push(b.field("b", Some(b_ann), Some(two)));
    let stmt = b.stmt_class(c);

    let program = check(vec![library("main.ql", vec![stmt])]);
    assert!(codes(&program).contains(&ErrorCode::FieldAccessBeforeInitialization));
}

#[test]
fn mixin_on_requirement_is_enforced() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let base = b.class("Base");
    let base_stmt = b.stmt_class(base);

    let mut logging = b.mixin("Logging");
    logging.on = Some(b.ty("Base"));
    let mixin_stmt = b.stmt_mixin(logging);

    // class Standalone with Logging -- does not extend Base.
    let mut standalone = b.class("Standalone");
    standalone.mixins.push(b.ty("Logging"));
    let standalone_stmt = b.stmt_class(standalone);

    // class Ok extends Base with Logging -- fine.
    let mut ok = b.class("Ok");
    ok.extends = Some(b.ty("Base"));
    ok.mixins.push(b.ty("Logging"));
    let ok_stmt = b.stmt_class(ok);

    let program = check(vec![library(
        "main.ql",
        vec![base_stmt, mixin_stmt, standalone_stmt, ok_stmt],
    )]);
    let all = codes(&program);
    assert_eq!(
        all.iter()
            .filter(|&&c| c == ErrorCode::MixinRequirementUnmet)
            .count(),
        1
    );
}

#[test]
fn closure_takes_parameter_types_from_context() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // let f: (i32) => i32 = (x) => x + 1;
    let p_ann = b.ty("i32");
    let r_ann = b.ty("i32");
    let f_ann = b.ty_func(vec![p_ann], r_ann);
    let x_param = b.param_untyped("x");
    let x_ref = b.ident("x");
    let one = b.int(1);
    let body = b.add(x_ref, one);
    let closure = b.closure(vec![x_param], body);
    let f = b.let_typed("f", f_ann, closure);

    let program = check(vec![library("main.ql", vec![f])]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
}

#[test]
fn uncontexted_closure_requires_annotations() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let x_param = b.param_untyped("x");
    let x_ref = b.ident("x");
    let closure = b.closure(vec![x_param], x_ref);
    let f = b.let_("f", closure);

    let program = check(vec![library("main.ql", vec![f])]);
    assert!(codes(&program).contains(&ErrorCode::ClosureParameterNeedsAnnotation));
}

#[test]
fn record_field_order_is_canonical() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    let one = b.int(1);
    let two = b.int(2);
    let xy = b.record(vec![("x", one), ("y", two)]);
    let xy_stmt = b.let_("a", xy);
    let xy_id = xy_stmt.id;
    let three = b.int(3);
    let four = b.int(4);
    let yx = b.record(vec![("y", three), ("x", four)]);
    let yx_stmt = b.let_("b", yx);
    let yx_id = yx_stmt.id;

    let program = check(vec![library("main.ql", vec![xy_stmt, yx_stmt])]);
    assert!(!program.sema.has_errors());
    assert_eq!(program.sema.type_of(xy_id), program.sema.type_of(yx_id));
}

#[test]
fn box_specializations_are_per_library_distinct() {
    let mut ids = NodeIdGen::new();
    let mut b = AstBuilder::new(&mut ids);
    // lib.ql: export class Box<T> { }
    let mut boxed = b.class("Box");
    let t = b.type_param("T");
    boxed.type_params.push(t);
    let box_stmt = b.stmt_class(boxed);
    let box_stmt = b.exported(box_stmt);

    // main.ql: import { Box } from "./lib"; let a: Box<i32>; let c: Box<string>
    let import = b.import("./lib", vec!["Box"]);
    let i32_ann = b.ty("i32");
    let a_ann = b.ty_args("Box", vec![i32_ann]);
    let a_init = b.null();
    let a = b.let_typed("a", a_ann, a_init);
    let str_ann = b.ty("string");
    let c_ann = b.ty_args("Box", vec![str_ann]);
    let c_init = b.null();
    let c = b.let_typed("c", c_ann, c_init);

    let program = check(vec![
        library("lib.ql", vec![box_stmt]),
        library_with_imports("main.ql", vec![import, a, c], &[("./lib", "lib.ql")]),
    ]);
    assert!(!program.sema.has_errors(), "{:?}", program.sema.diagnostics());
    let keys: Vec<String> = program
        .sema
        .specializations()
        .iter()
        .map(|s| quill_types::type_key(&program.types, &program.decls, s.ty))
        .collect();
    assert!(keys.contains(&"lib.ql::Box<i32>".to_string()));
    assert!(keys.contains(&"lib.ql::Box<string>".to_string()));
}
