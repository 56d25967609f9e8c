// text_prep.rs - Text preparation for embedding generation.
//
// Qwen3-Embedding is instruction-aware: a task description placed before the text
// steers the vector toward that task. Clustering reviews by theme uses one fixed
// instruction for every text.

/// Prefix `text` with the instruction, if any. The instruction already carries its
/// own separator (`...\nQuery:`), so the two are concatenated as-is.
pub fn with_instruction(instruction: Option<&str>, text: &str) -> String {
    match instruction {
        Some(instruction) => format!("{instruction}{text}"),
        None => text.to_string(),
    }
}

/// Prepare every text for encoding, preserving order.
pub fn prepare_texts(texts: &[String], instruction: Option<&str>) -> Vec<String> {
    texts.iter().map(|t| with_instruction(instruction, t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::embedding::CLUSTERING_INSTRUCTION;

    #[test]
    fn test_instruction_prepended() {
        let text = with_instruction(Some(CLUSTERING_INSTRUCTION), "Great stay");
        assert_eq!(
            text,
            "Encode the texts for semantic clustering and grouping by themes\nQuery:Great stay"
        );
    }

    #[test]
    fn test_no_instruction_passes_raw_text() {
        assert_eq!(with_instruction(None, "  Great stay \n"), "  Great stay \n");
    }

    #[test]
    fn test_prepare_texts_keeps_order() {
        let texts = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        assert_eq!(prepare_texts(&texts, Some("Q:")), vec!["Q:b", "Q:a", "Q:c"]);
        assert_eq!(prepare_texts(&texts, None), texts);
    }
}
