//! Terminal output helpers

pub use console::style;

/// Prefix for informational lines
pub const INFO: &str = "→";

/// Prefix for success lines
pub const OK: &str = "✓";

/// Prefix for failure lines
pub const FAIL: &str = "✗";

/// Render an execution status with color
pub fn status_badge(status: crate::core::ExecutionStatus) -> String {
    use crate::core::ExecutionStatus::*;
    match status {
        Completed => style("Completed").green().to_string(),
        Failed => style("Failed").red().to_string(),
        Cancelled => style("Cancelled").yellow().to_string(),
        Running => style("Running").cyan().to_string(),
        Pending => style("Pending").dim().to_string(),
    }
}

/// Format a cost in USD for display
pub fn format_cost(cost: f64) -> String {
    if cost == 0.0 {
        "$0.00".to_string()
    } else if cost < 0.01 {
        format!("${:.5}", cost)
    } else {
        format!("${:.2}", cost)
    }
}
