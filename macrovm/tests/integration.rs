//! End-to-end tests driving the runtime with assembled listings

use macrovm::{DocumentId, EngineConfig, ErrorKind, Exec, GcError, NativeContext, Runtime, RuntimeError, StorageClass, Value};

fn run(rt: &mut Runtime, src: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let assembly = rt.assemble(src).expect("listing assembles");
    rt.run_to_completion(&assembly.main, args, DocumentId(1))
}

fn text(rt: &Runtime, value: Value) -> String {
    value.render(&rt.heap)
}

fn global(rt: &Runtime, name: &str) -> Value {
    let id = rt.symbols.lookup(name).expect("global exists");
    rt.symbols.get(id).value
}

/// Key/value pairs of an array value, in iteration order
fn entries(rt: &Runtime, value: Value) -> Vec<(String, String)> {
    let array = value.as_array().expect("array value");
    array
        .entries(&rt.heap)
        .map(|(k, v)| (String::from_utf8_lossy(rt.heap.string(k)).into_owned(), v.render(&rt.heap)))
        .collect()
}

// ============================================
// Arithmetic
// ============================================

const DIV_MOD_LAW: &str = "
    push_sym $1
    push_sym $2
    div
    push_sym $2
    mul
    push_sym $1
    push_sym $2
    mod
    add
    return
";

#[test]
fn test_div_mod_law() {
    let mut rt = Runtime::new();
    for a in [0, 7, -7, 13, -13, i64::MAX, i64::MIN] {
        for b in [1, -1, 3, -3, 7, i64::MAX] {
            let result = run(&mut rt, DIV_MOD_LAW, vec![Value::Int(a), Value::Int(b)]).unwrap();
            assert_eq!(result, Value::Int(a), "a = {a}, b = {b}");
        }
    }
}

#[test]
fn test_division_by_zero() {
    let mut rt = Runtime::new();
    let err = run(&mut rt, "push_sym 1\npush_sym 0\ndiv\n", vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    assert_eq!(err.message, "division by zero");
    let err = run(&mut rt, "push_sym 1\npush_sym 0\nmod\n", vec![]).unwrap_err();
    assert_eq!(err.message, "modulo by zero");
}

#[test]
fn test_numeric_strings() {
    let mut rt = Runtime::new();
    let src = "push_sym \" 40\"\npush_sym 2\nadd\nreturn\n";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(42));

    let err = run(&mut rt, "push_sym \"4x\"\nincr\n", vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotNumeric);
}

#[test]
fn test_string_comparison() {
    let mut rt = Runtime::new();
    let src = "push_sym \"12\"\npush_sym 12\neq\npush_sym \"a\"\npush_sym \"b\"\nne\nand\nreturn\n";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_power() {
    let mut rt = Runtime::new();
    let src = "push_sym $1\npush_sym $2\npower\nreturn\n";
    let pow = |rt: &mut Runtime, a, b| run(rt, src, vec![Value::Int(a), Value::Int(b)]);
    assert_eq!(pow(&mut rt, 3, 4).unwrap(), Value::Int(81));
    assert_eq!(pow(&mut rt, 2, -2).unwrap(), Value::Int(0));
    assert_eq!(pow(&mut rt, -1, -3).unwrap(), Value::Int(-1));
    assert_eq!(pow(&mut rt, 0, -1).unwrap_err().message, "exponentiation result out of range");
    assert_eq!(pow(&mut rt, 10, 19).unwrap_err().kind, ErrorKind::Range);
}

#[test]
fn test_concat() {
    let mut rt = Runtime::new();
    let value = run(&mut rt, "push_sym \"n=\"\npush_sym 5\nconcat\nreturn\n", vec![]).unwrap();
    assert_eq!(text(&rt, value), "n=5");
}

// ============================================
// Arrays
// ============================================

/// Builds `a = {"1": 10}` and `b = {"1": 20, "2": 30}` then applies `$op`
fn set_op_listing(op: &str) -> String {
    format!(
        "
        .local a b
        push_array_sym a 1
        push_sym 1
        push_sym 10
        array_assign 1
        push_array_sym b 1
        push_sym 1
        push_sym 20
        array_assign 1
        push_array_sym b 1
        push_sym 2
        push_sym 30
        array_assign 1
        push_sym a
        push_sym b
        {op}
        return
        "
    )
}

#[test]
fn test_array_union_prefers_right() {
    let mut rt = Runtime::new();
    let value = run(&mut rt, &set_op_listing("add"), vec![]).unwrap();
    assert_eq!(
        entries(&rt, value),
        [("1".to_string(), "20".to_string()), ("2".to_string(), "30".to_string())]
    );
}

#[test]
fn test_array_difference() {
    let mut rt = Runtime::new();
    let src = "
        .local a b
        push_array_sym a 1
        push_sym 1
        push_sym 1
        array_assign 1
        push_array_sym a 1
        push_sym 2
        push_sym 2
        array_assign 1
        push_array_sym b 1
        push_sym 2
        push_sym 2
        array_assign 1
        push_sym a
        push_sym b
        sub
        return
    ";
    let value = run(&mut rt, src, vec![]).unwrap();
    assert_eq!(entries(&rt, value), [("1".to_string(), "1".to_string())]);
}

#[test]
fn test_array_intersection_and_merge() {
    let mut rt = Runtime::new();
    let value = run(&mut rt, &set_op_listing("bit_and"), vec![]).unwrap();
    assert_eq!(entries(&rt, value), [("1".to_string(), "20".to_string())]);

    let value = run(&mut rt, &set_op_listing("bit_or"), vec![]).unwrap();
    assert_eq!(
        entries(&rt, value),
        [("1".to_string(), "10".to_string()), ("2".to_string(), "30".to_string())]
    );
}

#[test]
fn test_array_math_with_scalar_is_error() {
    let mut rt = Runtime::new();
    let src = ".local a\npush_array_sym a 1\npush_sym 1\npush_sym a\nadd\n";
    let err = run(&mut rt, src, vec![]).unwrap_err();
    assert_eq!(err.message, "can't mix math with arrays and non-arrays");
}

#[test]
fn test_assignment_deep_copies_arrays() {
    let mut rt = Runtime::new();
    let src = "
        .local a b
        push_array_sym a 1
        push_sym 1
        push_sym 1
        array_assign 1
        push_sym a
        assign b
        push_array_sym b 0
        push_sym 1
        push_sym 99
        array_assign 1
        push_sym a
        push_sym 1
        array_ref 1
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_multi_dimensional_keys() {
    let mut rt = Runtime::new();
    let src = "
        .global grid
        push_array_sym grid 1
        push_sym 1
        push_sym \"x\"
        push_sym 7
        array_assign 2
        push_sym grid
        push_sym 1
        push_sym $sub_sep
        concat
        push_sym \"x\"
        concat
        array_ref 1
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(7));
}

#[test]
fn test_missing_key_and_size() {
    let mut rt = Runtime::new();
    let src = ".local a\npush_array_sym a 1\npush_sym \"k\"\narray_ref 1\n";
    let err = run(&mut rt, src, vec![]).unwrap_err();
    assert_eq!(err.message, "referenced array value not in array: k");

    let src = "
        .local a
        push_array_sym a 1
        push_sym \"k\"
        push_sym 1
        array_assign 1
        push_sym a
        array_ref 0
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_compound_assignment() {
    let mut rt = Runtime::new();
    let src = "
        .local a
        push_array_sym a 1
        push_sym \"x\"
        push_sym 40
        array_assign 1
        push_array_sym a 0
        push_sym \"x\"
        push_sym 2
        array_ref_assign_setup 1 1
        add
        array_assign 1
        push_sym a
        push_sym \"x\"
        array_ref 1
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(42));
}

const ITERATE_AND_DELETE: &str = "
    .local a out k
    .iter it
    push_array_sym a 1
    push_sym \"b\"
    push_sym 1
    array_assign 1
    push_array_sym a 1
    push_sym \"c\"
    push_sym 1
    array_assign 1
    push_array_sym a 1
    push_sym \"a\"
    push_sym 1
    array_assign 1
    push_sym \"\"
    assign out
    push_sym a
    begin_array_iter it
next:
    array_iter k it done
    push_sym out
    push_sym k
    concat
    assign out
    push_array_sym a 0
    push_sym k
    array_delete 1
    branch next
done:
    push_sym a
    array_ref 0
    push_sym out
    concat
    return
";

#[test]
fn test_iteration_in_key_order_survives_deleting_current() {
    let mut rt = Runtime::new();
    let value = run(&mut rt, ITERATE_AND_DELETE, vec![]).unwrap();
    assert_eq!(text(&rt, value), "0abc");
}

#[test]
fn test_in_array() {
    let mut rt = Runtime::new();
    let src = "
        .local a
        push_array_sym a 1
        push_sym \"k\"
        push_sym 1
        array_assign 1
        push_sym \"k\"
        push_sym a
        in_array
        push_sym \"z\"
        push_sym a
        in_array
        not
        and
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_delete_all() {
    let mut rt = Runtime::new();
    let src = "
        .local a
        push_array_sym a 1
        push_sym 1
        push_sym 1
        array_assign 1
        push_array_sym a 0
        array_delete 0
        push_sym a
        array_ref 0
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(0));
}

// ============================================
// Calls and arguments
// ============================================

#[test]
fn test_macro_call_with_return_value() {
    let mut rt = Runtime::new();
    let src = "
        .macro double
            push_sym $1
            push_sym 2
            mul
            return
        .end
        push_sym 21
        subr_call double 1
        fetch_ret_val
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(42));
}

#[test]
fn test_using_missing_return_value() {
    let mut rt = Runtime::new();
    let src = "
        .macro quiet
        .end
        subr_call quiet 0
        fetch_ret_val
        return
    ";
    let err = run(&mut rt, src, vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoReturnValue);
    assert!(err.message.contains("quiet"));
}

#[test]
fn test_argument_access() {
    let mut rt = Runtime::new();
    let src = "
        push_sym 2
        push_arg
        push_arg_count
        concat
        push_arg_array
        push_sym 1
        array_ref 1
        concat
        return
    ";
    let args = vec![rt.heap.string_value("a"), rt.heap.string_value("b")];
    let value = run(&mut rt, src, args).unwrap();
    assert_eq!(text(&rt, value), "b2a");

    let err = run(&mut rt, "push_sym $3\n", vec![Value::Int(1)]).unwrap_err();
    assert_eq!(err.message, "referenced undefined argument: $3");
    let err = run(&mut rt, "push_sym 5\npush_arg\n", vec![]).unwrap_err();
    assert_eq!(err.message, "referenced undefined argument: $args[5]");
}

#[test]
fn test_assignment_to_argument_is_error() {
    let mut rt = Runtime::new();
    let err = run(&mut rt, "push_sym 1\nassign $1\n", vec![Value::Int(0)]).unwrap_err();
    assert_eq!(err.message, "assignment to function argument: $1");
}

#[test]
fn test_unset_variable() {
    let mut rt = Runtime::new();
    let err = run(&mut rt, ".local x\npush_sym x\n", vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::VariableNotSet);
    assert_eq!(err.message, "variable not set: x");
}

#[test]
fn test_call_non_function() {
    let mut rt = Runtime::new();
    let err = run(&mut rt, "push_sym 1\nassign v\nsubr_call v 0\n", vec![]).unwrap_err();
    assert_eq!(err.message, "v is not a function or subroutine");
}

#[test]
fn test_native_error_names_callee() {
    let mut rt = Runtime::new();
    let err = run(&mut rt, "subr_call length 0\n", vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Native);
    assert_eq!(err.message, "Wrong number of arguments to function length");
}

#[test]
fn test_print_output() {
    let mut rt = Runtime::new();
    run(&mut rt, "push_sym \"hi \"\npush_sym 3\nsubr_call print 2\n", vec![]).unwrap();
    assert_eq!(rt.take_output(), b"hi 3\n");
    assert!(rt.take_output().is_empty());
}

#[test]
fn test_unbounded_recursion_overflows() {
    let mut rt = Runtime::new();
    let src = "
        .macro down
            subr_call down 0
        .end
        subr_call down 0
    ";
    let err = run(&mut rt, src, vec![]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
    assert_eq!(err.message, "macro stack overflow");
}

#[test]
fn test_deep_recursion_within_stack() {
    let config = EngineConfig {
        stack_size: 100_000,
        ..EngineConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    let src = "
        .macro count
            push_sym $1
            branch_false base
            push_sym $1
            decr
            subr_call count 1
            fetch_ret_val
            incr
            return
        base:
            push_sym 0
            return
        .end
        push_sym 10000
        subr_call count 1
        fetch_ret_val
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(10000));
}

fn run_helper(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<Value, String> {
    let id = ctx.symbols.lookup("helper").ok_or("%s: no helper")?;
    match &ctx.symbols.get(id).class {
        StorageClass::MacroFunction(program) => {
            ctx.run_as_subroutine(program.clone());
            Ok(Value::NoValue)
        }
        _ => Err("%s: helper is not a macro".to_string()),
    }
}

#[test]
fn test_native_runs_macro_as_subroutine() {
    let mut rt = Runtime::new();
    rt.symbols.define_native("later", run_helper);
    let src = "
        .macro helper
            push_sym 1
            assign ran
        .end
        push_sym 0
        assign ran
        subr_call later 0
        push_sym ran
        return
    ";
    assert_eq!(run(&mut rt, src, vec![]).unwrap(), Value::Int(1));
}

#[test]
fn test_focus_document() {
    let mut rt = Runtime::new();
    let assembly = rt
        .assemble("push_sym 7\nsubr_call focus_document 1\nfetch_ret_val\npush_sym $run_document\nconcat\nreturn\n")
        .unwrap();
    let value = rt.run_to_completion(&assembly.main, vec![], DocumentId(3)).unwrap();
    assert_eq!(text(&rt, value), "33");
}

// ============================================
// Preemption and continuations
// ============================================

const COUNTER: &str = "
    .global x
    push_sym 0
    assign x
top:
    push_sym x
    incr
    assign x
    branch top
";

#[test]
fn test_time_limit_after_exactly_one_quantum() {
    let mut rt = Runtime::new();
    let assembly = rt.assemble(COUNTER).unwrap();
    let Exec::TimeLimit(k) = rt.execute(&assembly.main, vec![], DocumentId(1)) else {
        panic!("expected time limit");
    };
    // 2 setup instructions, 24 loops of 4, then push_sym and incr
    assert_eq!(global(&rt, "x"), Value::Int(24));
    assert_eq!(k.pc(), 7);
    assert_eq!(k.stack_depth(), 1);
}

#[test]
fn test_resumption_is_lossless() {
    let mut sliced = Runtime::new();
    let assembly = sliced.assemble(COUNTER).unwrap();
    let mut exec = sliced.execute(&assembly.main, vec![], DocumentId(1));
    for _ in 1..50 {
        let Exec::TimeLimit(k) = exec else {
            panic!("expected time limit");
        };
        exec = sliced.resume(k);
    }
    assert!(matches!(exec, Exec::TimeLimit(_)));

    let mut whole = Runtime::with_config(EngineConfig {
        quantum: 5000,
        ..EngineConfig::default()
    });
    let assembly = whole.assemble(COUNTER).unwrap();
    let exec = whole.execute(&assembly.main, vec![], DocumentId(1));
    assert!(matches!(exec, Exec::TimeLimit(_)));

    assert_eq!(global(&sliced, "x"), global(&whole, "x"));
    assert_eq!(global(&whole, "x"), Value::Int(1249));
}

fn ask(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<Value, String> {
    ctx.request_preempt();
    Ok(Value::NoValue)
}

const ASK: &str = "
    .local answer
    subr_call ask 0
    fetch_ret_val
    assign answer
    push_sym answer
    push_sym \"!\"
    concat
    return
";

#[test]
fn test_preempted_native_receives_supplied_result() {
    let mut rt = Runtime::new();
    rt.symbols.define_native("ask", ask);
    let assembly = rt.assemble(ASK).unwrap();

    let Exec::Preempted(mut k) = rt.execute(&assembly.main, vec![], DocumentId(1)) else {
        panic!("expected preemption");
    };
    assert_eq!(rt.suspended_count(), 1);
    let reply = rt.heap.string_value("yes");
    assert!(k.modify_pending_return_value(reply));

    let Exec::Done(value) = rt.resume(k) else {
        panic!("expected completion");
    };
    assert_eq!(text(&rt, value), "yes!");
    assert_eq!(rt.suspended_count(), 0);
}

#[test]
fn test_preempted_placeholder_is_not_a_value() {
    let mut rt = Runtime::new();
    rt.symbols.define_native("ask", ask);
    let assembly = rt.assemble(ASK).unwrap();
    let exec = rt.execute(&assembly.main, vec![], DocumentId(1));
    let err = rt.complete(exec).unwrap_err();
    assert_eq!(err.message, "variable not set: answer");
}

fn wait_in_helper(ctx: &mut NativeContext<'_>, args: &[Value]) -> Result<Value, String> {
    run_helper(ctx, args)?;
    ctx.request_preempt();
    Ok(Value::NoValue)
}

#[test]
fn test_preempt_into_subroutine_rejects_supplied_result() {
    let mut rt = Runtime::new();
    rt.symbols.define_native("wait_in_helper", wait_in_helper);
    let src = "
        .macro helper
        .end
        subr_call wait_in_helper 0
        fetch_ret_val
        return
    ";
    let assembly = rt.assemble(src).unwrap();
    let Exec::Preempted(mut k) = rt.execute(&assembly.main, vec![], DocumentId(1)) else {
        panic!("expected preemption");
    };
    // Suspended inside the helper, not after the native's fetch_ret_val
    assert_eq!(k.call_depth(), 1);
    assert_eq!(k.pc(), 0);
    let reply = rt.heap.string_value("late");
    assert!(!k.modify_pending_return_value(reply));
    assert_eq!(rt.complete(Exec::Preempted(k)).unwrap(), Value::NoValue);
}

// ============================================
// Garbage collection
// ============================================

#[test]
fn test_gc_keeps_globals() {
    let mut rt = Runtime::new();
    let src = "
        .global keep
        push_array_sym keep 1
        push_sym \"k\"
        push_sym \"v\"
        push_sym 1
        concat
        array_assign 1
        push_sym \"scratch\"
        push_sym 2
        concat
        return
    ";
    run(&mut rt, src, vec![]).unwrap();

    let stats = rt.collect_garbage().unwrap();
    assert_eq!(stats.strings_freed, 1);
    assert_eq!(stats.arrays_live, 1);
    assert_eq!(entries(&rt, global(&rt, "keep")), [("k".to_string(), "v1".to_string())]);
}

#[test]
fn test_suspended_local_array_survives_collection_attempts() {
    let mut rt = Runtime::with_config(EngineConfig {
        gc_threshold: 1,
        ..EngineConfig::default()
    });
    let src = "
        .local a n
        push_array_sym a 1
        push_sym \"k\"
        push_sym \"v\"
        push_sym 1
        concat
        array_assign 1
        push_sym 0
        assign n
    top:
        push_sym n
        incr
        assign n
        push_sym n
        push_sym 100
        lt
        branch_true top
        push_sym a
        push_sym \"k\"
        array_ref 1
        return
    ";
    let assembly = rt.assemble(src).unwrap();
    let mut exec = rt.execute(&assembly.main, vec![], DocumentId(1));
    let mut slices = 0;
    let value = loop {
        exec = match exec {
            Exec::Done(value) => break value,
            Exec::Error(e) => panic!("unexpected error: {e}"),
            Exec::TimeLimit(k) | Exec::Preempted(k) => {
                slices += 1;
                assert!(rt.maybe_collect().is_none());
                assert_eq!(rt.collect_garbage(), Err(GcError::MacrosSuspended(1)));
                // Allocations made while suspended must not land in the array's slots
                rt.heap.string_value("junk");
                rt.heap.new_array();
                rt.resume(k)
            }
        };
    };
    assert!(slices > 1);
    assert_eq!(text(&rt, value), "v1");

    // Once nothing is suspended the local array is garbage
    let stats = rt.maybe_collect().unwrap();
    assert!(stats.arrays_freed >= 1);
    assert!(stats.nodes_freed >= 1);
}

#[test]
fn test_gc_refused_while_suspended() {
    let mut rt = Runtime::new();
    let assembly = rt.assemble(COUNTER).unwrap();
    let exec = rt.execute(&assembly.main, vec![], DocumentId(1));
    assert!(exec.is_suspended());
    assert_eq!(rt.collect_garbage(), Err(GcError::MacrosSuspended(1)));
    assert!(rt.maybe_collect().is_none());

    drop(exec);
    assert!(rt.collect_garbage().is_ok());
}

// ============================================
// Disassembly
// ============================================

#[test]
fn test_disasm_main_program() {
    let mut rt = Runtime::new();
    let assembly = rt
        .assemble(".local x\ntop: push_sym \"hi\"\nassign x\nbranch top\n")
        .unwrap();
    let listing = assembly.main.disasm(&rt.symbols, &rt.heap).to_string();
    insta::assert_snapshot!(listing, @r#"
    0000  push_sym "hi"
    0002  assign x
    0004  branch -> 0000
    0006  return_no_val
    "#);
}

#[test]
fn test_disasm_iteration_macro() {
    let mut rt = Runtime::new();
    let src = "
        .macro keys
        .local k
        .iter it
            push_sym $1
            begin_array_iter it
        next:
            array_iter k it done
            push_sym k
            subr_call print 1
            branch next
        done:
        .end
    ";
    let assembly = rt.assemble(src).unwrap();
    let program = assembly.find_macro("keys").unwrap();
    let listing = program.disasm(&rt.symbols, &rt.heap).to_string();
    insta::assert_snapshot!(listing, @r"
    0000  push_sym $1
    0002  begin_array_iter aryiter #0
    0004  array_iter k aryiter #0 -> 0015
    0008  push_sym k
    0010  subr_call print 1
    0013  branch -> 0004
    0015  return_no_val
    ");
}
