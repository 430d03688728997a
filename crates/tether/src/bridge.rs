//! Correlated request/response over a one-way engine.
//!
//! The engine can only evaluate code and call named host callbacks, both
//! fire-and-forget. A synchronous evaluation is built from those:
//!
//! 1. allocate a call state under a fresh correlation key;
//! 2. on the engine thread, register a reply callback under the key and
//!    evaluate a wrapper script around the caller's code;
//! 3. block on the call state until the final reply, an abandoned call,
//!    or the timeout.
//!
//! The reply callback runs on the engine thread. It ignores stage pings
//! apart from logging them, publishes the decoded final reply, then
//! unregisters itself, which drops the completer and releases the engine
//! side's reference.

use std::sync::Arc;
use std::time::Duration;

use tether_engine::{Engine, EngineError, EngineHandle};

use crate::call_state::{Completer, CorrelationKey, WaitOutcome, call_state};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{self, Notification, Stage};

/// Receives stage pings of a call, on the engine thread.
pub type StageObserver = Arc<dyn Fn(Stage) + Send + Sync>;

/// Evaluate `code` (a function body) and return its result as a string.
///
/// Returns the empty sentinel on any failure: engine not ready, dispatch
/// failure, timeout, or an engine that shut down mid-call. A script that
/// throws is not a failure; its result starts with
/// [`ERROR_MARKER`](crate::protocol::ERROR_MARKER).
pub fn evaluate_sync(engine: &EngineHandle, code: &str, timeout: Duration) -> String {
    evaluate_sync_observed(engine, code, timeout, None)
}

/// [`evaluate_sync`] with a stage observer.
pub fn evaluate_sync_observed(
    engine: &EngineHandle,
    code: &str,
    timeout: Duration,
    observer: Option<StageObserver>,
) -> String {
    try_evaluate_sync(engine, code, timeout, observer).unwrap_or_else(|err| {
        tracing::debug!("[{}] Synchronous evaluation failed: {}", engine.name(), err);
        String::new()
    })
}

/// [`evaluate_sync_observed`] keeping the failure reason.
pub fn try_evaluate_sync(
    engine: &EngineHandle,
    code: &str,
    timeout: Duration,
    observer: Option<StageObserver>,
) -> BridgeResult<String> {
    // Blocking here would stall the loop that has to produce the reply.
    if engine.is_engine_thread() {
        return Err(BridgeError::Reentrant);
    }
    if !engine.is_ready() {
        return Err(EngineError::NotReady.into());
    }

    let (waiter, completer) = call_state(CorrelationKey::new(engine.id()));
    let script = protocol::wrapper_script(waiter.key().as_str(), code);
    let handler = ReplyHandler { completer, observer };

    // Posted, not submitted: a busy engine must not hold the caller past
    // its timeout. A closure dropped unrun releases the completer.
    engine.post(move |engine| {
        let key = handler.completer.key().to_string();
        engine.register_callback(key, move |engine, raw| handler.handle(engine, raw));
        engine.evaluate(script);
    })?;

    match waiter.wait(timeout) {
        WaitOutcome::Completed(payload) => Ok(payload),
        WaitOutcome::TimedOut => {
            tracing::debug!("[{}] Call abandoned after {:?}", engine.name(), timeout);
            Err(BridgeError::Timeout(timeout))
        }
        WaitOutcome::Abandoned => Err(BridgeError::Abandoned),
    }
}

struct ReplyHandler {
    completer: Completer,
    observer: Option<StageObserver>,
}

impl ReplyHandler {
    fn handle(&self, engine: &Engine, raw: &str) {
        let key = self.completer.key();
        match Notification::parse(raw) {
            Ok(Notification::Stage { stage }) => {
                tracing::debug!("[{}] {} stage: {}", engine.name(), key, stage);
                if let Some(observer) = &self.observer {
                    observer(stage);
                }
            }
            Ok(Notification::Final { data }) => {
                let payload = protocol::decode_payload(&data).unwrap_or_else(|err| {
                    tracing::warn!("[{}] {} undecodable reply: {}", engine.name(), key, err);
                    String::new()
                });
                if self.completer.publish(payload) {
                    engine.unregister_callback(key.as_str());
                } else {
                    tracing::debug!("[{}] {} duplicate final reply ignored", engine.name(), key);
                }
            }
            Err(err) => {
                tracing::warn!("[{}] {} malformed notification: {}", engine.name(), key, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use parking_lot::Mutex;
    use tether_engine::{EngineConfig, EngineServices};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn spawn(config: EngineConfig) -> Arc<EngineHandle> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Arc::new(EngineHandle::spawn(config, EngineServices::default()).unwrap())
    }

    #[test]
    fn test_trivial_expressions() {
        let engine = spawn(EngineConfig::new("bridge-values"));

        assert_eq!(evaluate_sync(&engine, "return 1 + 2", TIMEOUT), "3");
        assert_eq!(evaluate_sync(&engine, "return 'hi'", TIMEOUT), "hi");
        assert_eq!(evaluate_sync(&engine, "return true", TIMEOUT), "true");
        assert_eq!(evaluate_sync(&engine, "return null", TIMEOUT), "null");
        assert_eq!(evaluate_sync(&engine, "return [1, 'a']", TIMEOUT), r#"[1,"a"]"#);
        assert_eq!(evaluate_sync(&engine, "return { b: 2 }", TIMEOUT), r#"{"b":2}"#);
        assert_eq!(evaluate_sync(&engine, "let x = 1;", TIMEOUT), "");
    }

    #[test]
    fn test_payload_survives_quoting() {
        let engine = spawn(EngineConfig::new("bridge-quoting"));
        let tricky = "quote \" apostrophe ' backslash \\ newline \n unicode héllo ✓ 日本";
        let code = format!("return {};", serde_json::Value::String(tricky.to_string()));

        assert_eq!(evaluate_sync(&engine, &code, TIMEOUT), tricky);
    }

    #[test]
    fn test_promise_results_are_awaited() {
        let engine = spawn(EngineConfig::new("bridge-promise"));

        let result = evaluate_sync(
            &engine,
            "return new Promise((resolve) => setTimeout(() => resolve('later'), 30))",
            TIMEOUT,
        );
        assert_eq!(result, "later");
    }

    #[test]
    fn test_script_errors_become_error_strings() {
        let engine = spawn(EngineConfig::new("bridge-errors"));

        assert_eq!(evaluate_sync(&engine, "throw new Error('boom')", TIMEOUT), "Error: boom");
        assert_eq!(evaluate_sync(&engine, "throw 'plain'", TIMEOUT), "Error: plain");
        assert_eq!(
            evaluate_sync(&engine, "return Promise.reject(new Error('nope'))", TIMEOUT),
            "Error: nope"
        );
        assert!(evaluate_sync(&engine, "return (", TIMEOUT).starts_with(protocol::ERROR_MARKER));
        assert!(evaluate_sync(&engine, "return missing.field", TIMEOUT).starts_with(protocol::ERROR_MARKER));
    }

    #[test]
    fn test_unanswered_call_times_out() {
        let engine = spawn(EngineConfig::new("bridge-timeout"));
        let timeout = Duration::from_millis(200);
        let start = Instant::now();

        let result = try_evaluate_sync(&engine, "return new Promise(() => {})", timeout, None);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));

        // The engine stays usable.
        assert_eq!(evaluate_sync(&engine, "return 'still here'", TIMEOUT), "still here");
    }

    #[test]
    fn test_timeout_covers_a_busy_engine() {
        let engine = spawn(EngineConfig::new("bridge-busy"));
        engine
            .evaluate("const t = Date.now(); while (Date.now() - t < 1500) {}")
            .unwrap();

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let result = try_evaluate_sync(&engine, "return 1", timeout, None);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(elapsed < Duration::from_millis(1000), "waited {elapsed:?}");

        // Once the loop catches up, the abandoned call cleans up after itself.
        assert_eq!(evaluate_sync(&engine, "return 'caught up'", TIMEOUT), "caught up");
        let deadline = Instant::now() + TIMEOUT;
        while engine.submit(|engine| engine.callback_count()) != 0 {
            assert!(Instant::now() < deadline, "abandoned reply callback never released");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_unusual_results_still_reply() {
        let engine = spawn(EngineConfig::new("bridge-unusual"));
        let timeout = Duration::from_secs(2);

        assert_eq!(evaluate_sync(&engine, "return 'a\\uD800b'", timeout), "a\u{FFFD}b");
        assert_eq!(
            evaluate_sync(&engine, "return Promise.resolve('x\\uDC00')", timeout),
            "x\u{FFFD}"
        );
        assert_eq!(
            evaluate_sync(&engine, "return { get then() { throw new Error('trap') } }", timeout),
            "Error: trap"
        );
        assert_eq!(
            evaluate_sync(&engine, "return { toJSON() { throw new Error('no json') } }", timeout),
            "[object Object]"
        );
    }

    #[test]
    fn test_reply_callback_is_unregistered() {
        let engine = spawn(EngineConfig::new("bridge-cleanup"));

        assert_eq!(evaluate_sync(&engine, "return 1", TIMEOUT), "1");
        assert_eq!(engine.submit(|engine| engine.callback_count()), 0);
    }

    #[test]
    fn test_concurrent_calls_do_not_cross() {
        let engine = spawn(EngineConfig::new("bridge-concurrent"));

        let slow = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                evaluate_sync(
                    &engine,
                    "return new Promise((resolve) => setTimeout(() => resolve('A'), 200))",
                    TIMEOUT,
                )
            })
        };
        thread::sleep(Duration::from_millis(20));
        let fast = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || evaluate_sync(&engine, "return 'B'", TIMEOUT))
        };

        assert_eq!(fast.join().unwrap(), "B");
        assert_eq!(slow.join().unwrap(), "A");
    }

    #[test]
    fn test_stages_when_already_loaded() {
        let engine = spawn(EngineConfig::new("bridge-stage-ready"));
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stages);

        let result = evaluate_sync_observed(
            &engine,
            "return 'ok'",
            TIMEOUT,
            Some(Arc::new(move |stage| sink.lock().push(stage))),
        );

        assert_eq!(result, "ok");
        assert_eq!(*stages.lock(), vec![Stage::Ready]);
    }

    #[test]
    fn test_stages_while_loading() {
        let engine = spawn(
            EngineConfig::new("bridge-stage-loading")
                .with_content_script("new Promise((resolve) => setTimeout(resolve, 150))"),
        );
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stages);

        let start = Instant::now();
        let result = evaluate_sync_observed(
            &engine,
            "return __engine.readyState",
            TIMEOUT,
            Some(Arc::new(move |stage| sink.lock().push(stage))),
        );

        assert_eq!(result, "complete");
        assert_eq!(*stages.lock(), vec![Stage::Waiting, Stage::Loaded]);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_not_ready_engine_fails_fast() {
        let engine = spawn(
            EngineConfig::new("bridge-broken")
                .with_startup_script("throw new Error('no engine')")
                .with_init_timeout(Duration::from_secs(2)),
        );
        assert!(!engine.is_ready());

        let start = Instant::now();
        assert_eq!(evaluate_sync(&engine, "return 1", TIMEOUT), "");
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_blocking_from_engine_thread_is_refused() {
        let engine = spawn(EngineConfig::new("bridge-reentrant"));
        let inner = Arc::clone(&engine);

        let refused = engine
            .try_submit(move |_| matches!(try_evaluate_sync(&inner, "return 1", TIMEOUT, None), Err(BridgeError::Reentrant)))
            .unwrap();
        assert!(refused);
    }

    #[test]
    fn test_shutdown_abandons_in_flight_call() {
        let engine = spawn(EngineConfig::new("bridge-shutdown"));

        let stopper = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                engine.shutdown()
            })
        };

        let start = Instant::now();
        let result = try_evaluate_sync(&engine, "return new Promise(() => {})", Duration::from_secs(30), None);

        assert!(matches!(result, Err(BridgeError::Abandoned)));
        assert!(start.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap().unwrap();
    }
}
