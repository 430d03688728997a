//! Wire protocol between the wrapper script and the reply handler.
//!
//! The engine can only call a host callback with one string. Each call
//! carries a tagged JSON notification: zero or more `stage` pings followed
//! by exactly one `final` reply whose `data` is the base64 of the UTF-8
//! result, so no quoting or escaping on the way back can corrupt it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;

/// Prefix of results produced by a throwing or rejecting script.
pub const ERROR_MARKER: &str = "Error: ";

/// Progress of a call before its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The document was already loaded; running immediately.
    Ready,
    /// The document is still loading; execution is deferred.
    Waiting,
    /// The document finished loading; running now.
    Loaded,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Ready => "ready",
            Stage::Waiting => "waiting",
            Stage::Loaded => "loaded",
        };
        f.write_str(name)
    }
}

/// One invocation of a reply callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Stage { stage: Stage },
    Final { data: String },
}

impl Notification {
    pub fn parse(raw: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Decode the `data` of a final notification.
pub fn decode_payload(data: &str) -> BridgeResult<String> {
    let bytes = STANDARD.decode(data)?;
    Ok(String::from_utf8(bytes)?)
}

/// Quote `text` as a JavaScript string literal.
fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Build the script that runs `code` (a function body) and reports back
/// through the callback registered as `key`.
pub fn wrapper_script(key: &str, code: &str) -> String {
    let key = js_string(key);
    let code = js_string(code);
    let marker = js_string(ERROR_MARKER);

    format!(
        r#"(() => {{
  const fire = (message) => __host.invoke({key}, JSON.stringify(message));
  let delivered = false;
  const finish = (value) => {{
    if (delivered) return;
    let data;
    try {{
      data = __host.encode(__host.stringify(value));
    }} catch (e) {{
      data = __host.encode({marker} + __host.describe(e));
    }}
    delivered = true;
    fire({{ kind: "final", data }});
  }};
  const fail = (e) => finish({marker} + __host.describe(e));
  const run = () => {{
    let value;
    let thenable;
    try {{
      value = new Function({code})();
      thenable = value !== null && (typeof value === "object" || typeof value === "function") && typeof value.then === "function";
    }} catch (e) {{
      fail(e);
      return;
    }}
    if (thenable) {{
      Promise.resolve(value).then(finish, fail);
    }} else {{
      finish(value);
    }}
  }};
  if (__engine.readyState === "complete") {{
    fire({{ kind: "stage", stage: "ready" }});
    run();
  }} else {{
    fire({{ kind: "stage", stage: "waiting" }});
    __engine.onReady(() => {{
      fire({{ kind: "stage", stage: "loaded" }});
      run();
    }});
  }}
}})();"#
    )
}
