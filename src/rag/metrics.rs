use crate::models::metrics::CompletionMetrics;
use std::time::Duration;

/// Rough characters-per-token ratio for English text with BPE tokenizers.
const CHARS_PER_TOKEN: u64 = 4;

/// Token count estimated from output length. Not an exact tokenizer count.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    (chars + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

/// Parses the backend-supplied time-to-first-token (milliseconds, possibly fractional).
pub fn parse_ttft(fragment: &str) -> Option<u64> {
    let value: f64 = fragment.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value as u64)
}

pub fn completion_metrics(answer: &str, generation: Duration, end_to_end: Duration) -> CompletionMetrics {
    let tokens = estimate_tokens(answer);
    let generation_ms = generation.as_millis() as u64;
    let seconds = generation.as_secs_f64();
    let tokens_per_sec = if seconds > 0.0 { ((tokens as f64) / seconds) as u64 } else { 0 };
    let inter_token_ms = if tokens > 0 { generation_ms / tokens } else { 0 };

    CompletionMetrics {
        generation_ms,
        e2e_ms: end_to_end.as_millis() as u64,
        tokens,
        tokens_per_sec,
        inter_token_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_four_chars_per_token() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("Hi"), 1);
        assert_eq!(estimate_tokens("Hello world!"), 3);
        assert_eq!(estimate_tokens("héllo"), 2);
    }

    #[test]
    fn ttft_accepts_fractional_milliseconds() {
        assert_eq!(parse_ttft("120"), Some(120));
        assert_eq!(parse_ttft(" 87.9\n"), Some(87));
        assert_eq!(parse_ttft("Hello"), None);
        assert_eq!(parse_ttft("-3"), None);
        assert_eq!(parse_ttft("NaN"), None);
    }

    #[test]
    fn rates_from_generation_time() {
        let done = completion_metrics(
            "a".repeat(40).as_str(),
            Duration::from_millis(500),
            Duration::from_millis(800)
        );
        assert_eq!(done.tokens, 10);
        assert_eq!(done.generation_ms, 500);
        assert_eq!(done.e2e_ms, 800);
        assert_eq!(done.tokens_per_sec, 20);
        assert_eq!(done.inter_token_ms, 50);
    }

    #[test]
    fn zero_duration_and_empty_answer_do_not_divide_by_zero() {
        let done = completion_metrics("", Duration::ZERO, Duration::ZERO);
        assert_eq!(done.tokens, 0);
        assert_eq!(done.tokens_per_sec, 0);
        assert_eq!(done.inter_token_ms, 0);
    }
}
