//! Instruction prompt sent with every figure.
//!
//! The prompt asks for the answer inside a ```` ```figure ```` fence; the
//! describer extracts that block (see [`crate::pipeline::describe`]) and falls
//! back to the whole answer when a model ignores the format.
//!
//! Callers can override it via [`crate::config::DescribeConfig::prompt`].

/// Literal marker opening the fenced answer block.
pub const FIGURE_FENCE: &str = "```figure";

/// Default instruction prompt for describing an academic figure.
pub const DEFAULT_FIGURE_PROMPT: &str = r#"You are an expert at describing academic figures and diagrams. Your task is to convert images into clear, detailed textual descriptions.

For each image, provide a comprehensive description that includes:
1. The figure's main purpose/what it illustrates
2. All components, labels, text, and their relationships
3. Flow directions, arrows, and connections between elements
4. Any data values, formulas, or specific numbers shown
5. Color coding or visual distinctions if meaningful

Format your output as:
```figure
[Your detailed description here]
```

Guidelines:
- Preserve ALL text labels exactly as shown in the image
- Describe the logical flow and hierarchy of information
- For flowcharts/diagrams: describe each step and connections
- For charts/graphs: include axis labels, data series names, and key trends
- For tables: describe structure and key content
- Use technical terminology appropriate to the domain
- Be thorough but avoid redundancy
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_requests_figure_fence() {
        assert!(DEFAULT_FIGURE_PROMPT.contains(FIGURE_FENCE));
    }
}
