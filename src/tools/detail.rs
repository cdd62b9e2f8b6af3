//! Human-readable tool-call details

use serde_json::Value;

use super::definition::opt_str_arg;

/// Detail for the `in_progress` event, from the call's first meaningful argument
pub fn describe_call(tool_name: &str, input: &Value) -> String {
    let arg = |name: &str| opt_str_arg(input, name);
    let described = match tool_name {
        "write_page" => arg("url").map(|url| format!("Writing page {}", url)),
        "read_page" => arg("url").map(|url| format!("Reading page {}", url)),
        "read_file_content" => arg("file_path").map(|p| format!("Reading file {}", p)),
        "write_file" => arg("file_path").map(|p| format!("Writing file {}", p)),
        "create_directory" => arg("directory_path").map(|p| format!("Creating directory {}", p)),
        "list_pages" => Some("Listing pages".to_string()),
        "list_available_files" => Some("Listing database and API files".to_string()),
        "write_tests" => Some("Writing end-to-end tests".to_string()),
        "read_tests" => Some("Reading end-to-end tests".to_string()),
        "generate_database" => Some("Generating database".to_string()),
        _ => None,
    };
    described.unwrap_or_else(|| format!("Executing {}", tool_name))
}

pub fn describe_success(tool_name: &str) -> String {
    format!("Completed {}", tool_name)
}

pub fn describe_failure(tool_name: &str, error: &str) -> String {
    format!("Error in {}: {}", tool_name, error)
}
