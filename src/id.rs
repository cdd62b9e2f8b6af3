//! ID generation utilities for buildloop
//!
//! Provides functions for generating unique identifiers for runs, iterations,
//! agents and tool calls.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", now_ms(), random)
}

/// Generate an iteration ID
///
/// Format: `{run_id}-iter-{number:03}-{random_hex}`
pub fn generate_iteration_id(run_id: &str, number: u32) -> String {
    let random: u16 = rand::rng().random();
    format!("{}-iter-{:03}-{:04x}", run_id, number, random)
}

/// Generate an agent (collaborator invocation) ID
///
/// Format: `agent-{sequence}-{random_hex}`
pub fn generate_agent_id() -> String {
    let random: u32 = rand::rng().random();
    format!("agent-{}-{:08x}", next_sequence(), random)
}

/// Generate a tool call ID scoped under an agent
///
/// The sequence component makes every call unique within the process, so two
/// calls of the same tool by the same agent never share an ID.
///
/// Format: `{agent_id}-tool-{sequence}`
pub fn generate_tool_call_id(agent_id: &str) -> String {
    format!("{}-tool-{}", agent_id, next_sequence())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_iteration_id_includes_number() {
        let id = generate_iteration_id("run-1-abcd", 7);
        assert!(id.starts_with("run-1-abcd-iter-007-"));
    }

    #[test]
    fn test_generate_agent_id_uniqueness() {
        let ids: HashSet<String> = (0..100).map(|_| generate_agent_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_generate_tool_call_id_never_repeats_for_same_agent() {
        let agent = generate_agent_id();
        let first = generate_tool_call_id(&agent);
        let second = generate_tool_call_id(&agent);
        assert!(first.starts_with(&agent));
        assert_ne!(first, second);
    }
}
