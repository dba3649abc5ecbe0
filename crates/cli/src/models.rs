/// A model the relay is known to serve well.
pub struct ModelInfo {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

pub const CATALOG: &[ModelInfo] = &[
    ModelInfo { id: "openai/gpt-3.5-turbo", label: "GPT-3.5 Turbo", description: "Fast and efficient" },
    ModelInfo { id: "openai/gpt-4o", label: "GPT-4o", description: "Most capable" },
    ModelInfo { id: "deepseek/deepseek-chat", label: "DeepSeek Chat", description: "Alternative AI model" },
    ModelInfo {
        id: "anthropic/claude-3-sonnet-20240229",
        label: "Claude 3 Sonnet",
        description: "High-quality responses",
    },
];

/// One line per catalog entry, `*` marking `current`. A current model outside
/// the catalog is listed first.
pub fn catalog_lines(current: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(CATALOG.len() + 1);
    if CATALOG.iter().all(|m| m.id != current) {
        out.push(format!("* {}  (custom)", current));
    }
    for m in CATALOG {
        let mark = if m.id == current { '*' } else { ' ' };
        out.push(format!("{} {:<36} {}: {}", mark, m.id, m.label, m.description));
    }
    out
}
