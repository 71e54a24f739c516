//! Bootstrap script handed to browsers.

use std::path::Path;

use remote_objects_core::{ChannelSecret, Uid};

const CLIENT_SCRIPT: &str = include_str!("../assets/client.js");

/// Values substituted into the bootstrap script.
pub struct ScriptParams<'a> {
    pub uid: &'a Uid,
    pub channel: &'a ChannelSecret,
    pub base_dir: &'a Path,
    pub path_name: &'a str,
    pub single_scope: bool,
    pub module: bool,
}

/// Render the bootstrap script.
///
/// As a module the script default-exports its entry point; otherwise it
/// declares the global `remoteObjects`.
#[must_use]
pub fn render(params: &ScriptParams<'_>) -> String {
    let mut script = CLIENT_SCRIPT
        .replace("{{UID}}", params.uid.as_str())
        .replace("{{channel}}", params.channel.as_str())
        .replace("{{path}}", &js_escape(params.path_name))
        .replace(
            "{{__dirname}}",
            &js_escape(&params.base_dir.to_string_lossy()),
        )
        .replace("{{once}}", if params.single_scope { "true" } else { "false" });

    if params.module {
        script.push_str("export default remoteObjects;\n");
    }
    script
}

// Content for a single-quoted JS string literal.
fn js_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3C"),
            c => out.push(c),
        }
    }
    out
}
