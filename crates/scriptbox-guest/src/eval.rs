//! One evaluation in a brand-new interpreter.

use rquickjs::convert::Coerced;
use rquickjs::context::EvalOptions;
use rquickjs::{Context, Ctx, Runtime, Value};

use crate::bridge;
use crate::status;

/// A failed evaluation: status code plus the text for the error region.
pub struct Failure {
    pub status: i32,
    pub message: String,
}

impl Failure {
    fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

const UNKNOWN_EXCEPTION: &str = "(unable to extract message)";

/// Evaluate `source` and convert its completion value to a transport string.
///
/// The runtime and context are created here and dropped on return.
pub fn evaluate(source: Vec<u8>) -> Result<String, Failure> {
    let runtime = Runtime::new().map_err(|e| {
        Failure::new(
            status::RUNTIME_CREATION,
            format!("Failed to create JavaScript runtime: {e}"),
        )
    })?;
    // Memory and wall-clock limits are enforced by the host.
    runtime.set_max_stack_size(0);

    let context = Context::full(&runtime).map_err(|e| {
        Failure::new(
            status::CONTEXT_CREATION,
            format!("Failed to create JavaScript context: {e}"),
        )
    })?;

    context.with(|ctx| {
        bridge::install(&ctx).map_err(|e| {
            Failure::new(
                status::BRIDGE_INSTALL,
                format!("Failed to install host bridge: {e}"),
            )
        })?;

        // Scripts are plain global code, not strict.
        let mut options = EvalOptions::default();
        options.strict = false;

        let value: Value<'_> = match ctx.eval_with_options(source, options) {
            Ok(value) => value,
            Err(rquickjs::Error::Exception) => {
                return Err(Failure::new(status::EXCEPTION, describe_exception(&ctx)))
            }
            Err(e) => return Err(Failure::new(status::EXCEPTION, format!("Exception: {e}"))),
        };

        to_transport_string(&ctx, value).ok_or_else(|| {
            Failure::new(
                status::RESULT_CONVERSION,
                "Failed to convert result to string",
            )
        })
    })
}

fn to_transport_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<String> {
    if value.is_undefined() {
        return Some("undefined".to_string());
    }
    if value.is_null() {
        return Some("null".to_string());
    }
    if let Some(b) = value.as_bool() {
        return Some(b.to_string());
    }
    if value.is_number() || value.is_string() {
        return plain_string(ctx, value);
    }

    match ctx.json_stringify(value.clone()) {
        Ok(Some(json)) => json.to_string().ok(),
        Ok(None) => plain_string(ctx, value),
        Err(_) => {
            // Drop the pending exception before falling back.
            let _ = ctx.catch();
            plain_string(ctx, value)
        }
    }
}

fn plain_string<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<String> {
    match value.get::<Coerced<String>>() {
        Ok(text) => Some(text.0),
        Err(_) => {
            let _ = ctx.catch();
            None
        }
    }
}

/// `Exception: <message>` plus `\nStack: <stack>` when the thrown value has one.
fn describe_exception(ctx: &Ctx<'_>) -> String {
    let thrown = ctx.catch();

    let message = match thrown.get::<Coerced<String>>() {
        Ok(text) => text.0,
        Err(_) => {
            let _ = ctx.catch();
            thrown
                .as_object()
                .and_then(|obj| obj.get::<_, Option<Coerced<String>>>("message").ok())
                .flatten()
                .map(|text| text.0)
                .unwrap_or_else(|| UNKNOWN_EXCEPTION.to_string())
        }
    };

    let mut text = format!("Exception: {message}");
    let stack = thrown
        .as_object()
        .and_then(|obj| obj.get::<_, Option<Coerced<String>>>("stack").ok())
        .flatten();
    if let Some(stack) = stack {
        text.push_str("\nStack: ");
        text.push_str(&stack.0);
    }
    text
}

/// Interpreter smoke test: `1+1` in a fresh runtime.
pub fn self_test() -> Result<String, Failure> {
    let runtime = Runtime::new()
        .map_err(|e| Failure::new(status::SELFTEST_RUNTIME, format!("Runtime creation failed: {e}")))?;
    let context = Context::full(&runtime)
        .map_err(|e| Failure::new(status::SELFTEST_CONTEXT, format!("Context creation failed: {e}")))?;

    context.with(|ctx| match ctx.eval::<i32, _>("1+1") {
        Ok(value) => Ok(format!("QuickJS OK: 1+1 = {value}")),
        Err(e) => Err(Failure::new(status::SELFTEST_EVAL, format!("Evaluation failed: {e}"))),
    })
}
