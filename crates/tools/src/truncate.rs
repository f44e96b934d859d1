/// Cut `text` to `budget` characters and append a marker with the number
/// of dropped characters. Text within the budget is returned unchanged.
pub fn truncate_tool_result(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }
    let kept: String = text.chars().take(budget).collect();
    format!("{kept}\n\n[truncated {} characters]", total - budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_config::ToolsConfig;

    #[test]
    fn short_results_pass_through() {
        assert_eq!(truncate_tool_result("hello", 5), "hello");
        assert_eq!(truncate_tool_result("", 5), "");
    }

    #[test]
    fn long_results_keep_exactly_budget_chars() {
        let text = "a".repeat(5003);
        let out = truncate_tool_result(&text, ToolsConfig::default().result_char_budget);
        assert_eq!(out, format!("{}\n\n[truncated 3 characters]", "a".repeat(5000)));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let out = truncate_tool_result("ééééé", 2);
        assert_eq!(out, "éé\n\n[truncated 3 characters]");
    }

    #[test]
    fn truncating_twice_with_larger_budget_is_stable() {
        let once = truncate_tool_result(&"x".repeat(20), 10);
        assert_eq!(truncate_tool_result(&once, once.chars().count()), once);
    }
}
