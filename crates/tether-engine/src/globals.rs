//! JavaScript global objects.
//!
//! Installs the host natives the prelude builds on, then evaluates the
//! prelude which defines `__host`, `__engine`, `console` and the timer
//! functions.

use std::time::Duration;

use rquickjs::convert::Coerced;
use rquickjs::function::Func;
use rquickjs::{Ctx, Value};

use crate::engine::Engine;

const PRELUDE: &str = include_str!("prelude.js");

/// Register the host natives and evaluate the prelude.
pub(crate) fn install(ctx: &Ctx<'_>, engine: &Engine) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    // __host_invoke_native(name, payload) -> bool
    globals.set(
        "__host_invoke_native",
        Func::from({
            let engine = engine.clone();
            move |name: String, payload: String| -> rquickjs::Result<bool> {
                Ok(engine.invoke_callback(&name, &payload))
            }
        }),
    )?;

    // __host_emit_native(event, payload)
    globals.set(
        "__host_emit_native",
        Func::from({
            let engine = engine.clone();
            move |event: String, payload: String| -> rquickjs::Result<()> {
                engine.emit(&event, &payload);
                Ok(())
            }
        }),
    )?;

    // __host_timer_native(delay_ms) -> timer_id
    globals.set(
        "__host_timer_native",
        Func::from({
            let engine = engine.clone();
            move |delay_ms: f64| -> rquickjs::Result<f64> {
                let delay = Duration::from_millis(delay_ms.max(0.0) as u64);
                Ok(engine.schedule_timer(delay) as f64)
            }
        }),
    )?;

    // __host_clear_timer_native(timer_id) -> bool
    globals.set(
        "__host_clear_timer_native",
        Func::from({
            let engine = engine.clone();
            move |timer_id: f64| -> rquickjs::Result<bool> { Ok(engine.cancel_timer(timer_id as u64)) }
        }),
    )?;

    // __host_log_native(level, message)
    globals.set(
        "__host_log_native",
        Func::from(|level: String, message: String| -> rquickjs::Result<()> {
            match level.as_str() {
                "error" => tracing::error!(target: "tether.js.console", "{}", message),
                "warn" => tracing::warn!(target: "tether.js.console", "{}", message),
                "debug" => tracing::debug!(target: "tether.js.console", "{}", message),
                _ => tracing::info!(target: "tether.js.console", "{}", message),
            }
            Ok(())
        }),
    )?;

    ctx.eval::<(), _>(PRELUDE)?;
    Ok(())
}

/// Turn an evaluation error into a readable message, pulling the pending
/// exception out of the context when there is one.
pub(crate) fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        let exception: Value = ctx.catch();
        return match exception.get::<Coerced<String>>() {
            Ok(Coerced(message)) => message,
            Err(_) => "Unknown exception".to_string(),
        };
    }
    err.to_string()
}
