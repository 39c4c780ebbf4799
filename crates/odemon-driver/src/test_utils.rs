//! Test utilities for driver tests
//!
//! Provides `sh -c` scripted stand-ins for the real debugger REPL, each
//! returning a ready-to-use [`DriverConfig`] with short timeouts.

use crate::config::DriverConfig;

/// Base config running `script` under `sh -c`, with test-scale timeouts.
pub fn sh_tool(script: &str) -> DriverConfig {
    let mut config = DriverConfig::new("sh").with_args(["-c", script]);
    config.start_timeout_ms = 5_000;
    config.stop_timeout_ms = 5_000;
    config.kill_grace_ms = 2_000;
    config
}

/// Well-behaved tool: prints the ready prompt, then exits cleanly when it
/// reads the quit command.
pub fn prompt_tool() -> DriverConfig {
    sh_tool(
        r#"echo "(ocd)"
while read line; do
  if [ "$line" = quit ]; then exit 0; fi
  echo "> $line"
done"#,
    )
}

/// Tool that exits immediately with `code`, before any prompt.
pub fn crashing_tool(code: i32) -> DriverConfig {
    sh_tool(&format!("exit {}", code))
}

/// Tool that never prints the ready prompt.
pub fn silent_tool() -> DriverConfig {
    sh_tool("sleep 60")
}

/// Tool that prints the prompt but ignores the quit command, forcing the
/// kill escalation path during stop.
pub fn stubborn_tool() -> DriverConfig {
    sh_tool(r#"echo "(ocd)"; exec sleep 60"#)
}
