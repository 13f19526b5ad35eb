//! End-to-end scenarios against the compiled QuickJS guest.
//!
//! Skipped (with a note on stderr) when the guest has not been built.

mod common;

use std::time::{Duration, Instant};

use common::js_box;
use scriptbox::{HandlerRegistry, SandboxPolicy, ScriptErrorKind};
use serde_json::{json, Value};

macro_rules! js_box_or_skip {
    ($policy:expr, $registry:expr) => {
        match js_box($policy, $registry) {
            Some(sandbox) => sandbox,
            None => return,
        }
    };
}

#[tokio::test(flavor = "multi_thread")]
async fn test_return_arithmetic() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let output = sandbox.run("return 1+1").await.unwrap();
    assert_eq!(output.value, "2");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_result_conversion_table() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let cases = [
        ("return undefined", "undefined"),
        ("return null", "null"),
        ("return true", "true"),
        ("return false", "false"),
        ("return 3.5", "3.5"),
        ("return 'plain text'", "plain text"),
        ("return [1,2,3]", "[1,2,3]"),
    ];
    for (script, expected) in cases {
        let output = sandbox.run(script).await.unwrap();
        assert_eq!(output.value, expected, "script: {script}");
    }

    let output = sandbox.run("return {a:1, b:[true, null]}").await.unwrap();
    let parsed: Value = serde_json::from_str(&output.value).unwrap();
    assert_eq!(parsed, json!({ "a": 1, "b": [true, null] }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_globals_do_not_leak_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    sandbox.run("globalThis.leaked = 42; return leaked").await.unwrap();
    let output = sandbox.run("return typeof leaked").await.unwrap();
    assert_eq!(output.value, "undefined");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_globals() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let a = sandbox.run("globalThis.x = 'first'; for (var i = 0; i < 100000; i++) {} return x");
    let b = sandbox.run("globalThis.x = 'second'; for (var i = 0; i < 100000; i++) {} return x");
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().value, "first");
    assert_eq!(b.unwrap().value, "second");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exception_message_and_stack() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let err = sandbox
        .run("function explode() { throw new Error('kaboom'); }\nexplode();")
        .await
        .unwrap_err();
    let script_err = err.script_error().expect("execution error");
    assert_eq!(script_err.kind, ScriptErrorKind::Exception);
    assert!(script_err.message.contains("kaboom"), "{}", script_err.message);
    assert!(script_err
        .stack
        .as_deref()
        .is_some_and(|s| s.contains("explode")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_infinite_loop_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let start = Instant::now();
    let err = sandbox.run_with_timeout("while(true){}", Some(100)).await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sandbox_escape_surfaces_as_script_error() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let output = sandbox
        .run(
            "try { scriptbox.fs.readText('../../etc/passwd'); return 'read'; }\n\
             catch (e) { return e.message; }",
        )
        .await
        .unwrap();
    assert!(output.value.starts_with("security violation"), "{}", output.value);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scripts_run_in_sloppy_mode() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let output = sandbox.run("undeclared = 5; return undeclared").await.unwrap();
    assert_eq!(output.value, "5");

    let output = sandbox.run("with ({a: 1}) { return a; }").await.unwrap();
    assert_eq!(output.value, "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_uncaught_sandbox_escape_is_security_violation() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let err = sandbox
        .run("return scriptbox.fs.readText('../../etc/passwd');")
        .await
        .unwrap_err();
    assert!(err.is_security_violation(), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_run_keeps_logs() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());

    let err = sandbox
        .run("console.log('step', 1);\nthrow new Error('late failure');")
        .await
        .unwrap_err();
    let script_err = err.script_error().expect("execution error");
    assert!(script_err.message.contains("late failure"));
    assert_eq!(script_err.logs, vec!["step 1".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bridge_handlers_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let registry = HandlerRegistry::builder()
        .register_fn("inventory.count", |ctx| async move {
            Ok(json!(ctx.str_arg(0)?.len()))
        })
        .bootstrap("var inventory = { count: function (s) { return scriptbox.call('inventory.count', s); } };")
        .build();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), registry);

    let output = sandbox
        .run(
            "console.log('starting');\n\
             scriptbox.log('sum', scriptbox.math.add(2, 3));\n\
             scriptbox.fs.writeText('out.txt', 'abc');\n\
             return inventory.count(scriptbox.fs.readText('out.txt'));",
        )
        .await
        .unwrap();
    assert_eq!(output.value, "3");
    assert_eq!(output.logs, vec!["starting".to_string(), "sum 5".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_self_test() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = js_box_or_skip!(SandboxPolicy::new(dir.path()), HandlerRegistry::empty());
    let text = sandbox.self_test().await.unwrap();
    assert!(text.contains('2'), "{text}");
}
