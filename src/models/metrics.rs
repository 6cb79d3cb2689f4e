use crate::llm::InferenceMode;
use serde::ser::{ SerializeMap, Serializer };
use serde::Serialize;
use std::collections::BTreeMap;

/// Timings known once the first token arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsRecord {
    pub inference_mode: InferenceMode,
    pub model: String,
    pub retrieval_ms: u64,
    pub ttft_ms: u64,
    pub completion: Option<CompletionMetrics>,
}

/// Timings and estimates added once the stream has finished.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionMetrics {
    pub generation_ms: u64,
    pub e2e_ms: u64,
    pub tokens: u64,
    pub tokens_per_sec: u64,
    pub inter_token_ms: u64,
}

impl MetricsRecord {
    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

impl Serialize for MetricsRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.completion.is_some() { 9 } else { 4 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("Inference Mode", self.inference_mode.label())?;
        map.serialize_entry("Model", &self.model)?;
        map.serialize_entry("Retrieval Time", &format!("{}ms", self.retrieval_ms))?;
        map.serialize_entry("Time to First Token (TTFT)", &format!("{}ms", self.ttft_ms))?;
        if let Some(done) = &self.completion {
            map.serialize_entry("Generation Time", &format!("{}ms", done.generation_ms))?;
            map.serialize_entry("End to End Time (E2E)", &format!("{}ms", done.e2e_ms))?;
            map.serialize_entry("Tokens (est.)", &format!("{} tokens", done.tokens))?;
            map.serialize_entry(
                "Tokens/Second (est.)",
                &format!("{} tokens/sec", done.tokens_per_sec)
            )?;
            map.serialize_entry(
                "Inter-Token Latency (est.)",
                &format!("{} ms", done.inter_token_ms)
            )?;
        }
        map.end()
    }
}

/// Metrics of answered turns, keyed by `Turn::metrics_index`. Serializes as `{"0": {...}, "1": {...}}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricsHistory {
    records: BTreeMap<usize, MetricsRecord>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next answered turn will be recorded under.
    pub fn next_index(&self) -> usize {
        self.records.len()
    }

    /// Records the first-token metrics of a turn. Returns the index it was stored under.
    pub fn insert_initial(&mut self, record: MetricsRecord) -> usize {
        let index = self.next_index();
        self.records.insert(index, record);
        index
    }

    /// Adds completion metrics to an existing record. Returns false when `index` has no record.
    pub fn complete(&mut self, index: usize, completion: CompletionMetrics) -> bool {
        match self.records.get_mut(&index) {
            Some(record) => {
                record.completion = Some(completion);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&MetricsRecord> {
        self.records.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &MetricsRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record() -> MetricsRecord {
        MetricsRecord {
            inference_mode: InferenceMode::LocalSystem,
            model: "nvidia/Llama3-ChatQA-1.5-8B".to_string(),
            retrieval_ms: 42,
            ttft_ms: 120,
            completion: None,
        }
    }

    #[test]
    fn initial_record_serializes_display_keys() {
        let mut history = MetricsHistory::new();
        history.insert_initial(record());
        assert_eq!(
            serde_json::to_value(&history).unwrap(),
            json!({
                "0": {
                    "Inference Mode": "Local System",
                    "Model": "nvidia/Llama3-ChatQA-1.5-8B",
                    "Retrieval Time": "42ms",
                    "Time to First Token (TTFT)": "120ms"
                }
            })
        );
    }

    #[test]
    fn completion_adds_final_keys() {
        let mut history = MetricsHistory::new();
        let index = history.insert_initial(record());
        assert!(
            history.complete(index, CompletionMetrics {
                generation_ms: 300,
                e2e_ms: 470,
                tokens: 12,
                tokens_per_sec: 40,
                inter_token_ms: 25,
            })
        );
        let value = serde_json::to_value(&history).unwrap();
        let turn = &value["0"];
        assert_eq!(turn["Retrieval Time"], "42ms");
        assert_eq!(turn["Generation Time"], "300ms");
        assert_eq!(turn["End to End Time (E2E)"], "470ms");
        assert_eq!(turn["Tokens (est.)"], "12 tokens");
        assert_eq!(turn["Tokens/Second (est.)"], "40 tokens/sec");
        assert_eq!(turn["Inter-Token Latency (est.)"], "25 ms");
    }

    #[test]
    fn completing_missing_index_is_rejected() {
        let mut history = MetricsHistory::new();
        assert!(
            !history.complete(3, CompletionMetrics {
                generation_ms: 1,
                e2e_ms: 1,
                tokens: 1,
                tokens_per_sec: 1,
                inter_token_ms: 1,
            })
        );
        assert!(history.is_empty());
    }

    #[test]
    fn indices_are_dense_and_restart_after_clear() {
        let mut history = MetricsHistory::new();
        assert_eq!(history.insert_initial(record()), 0);
        assert_eq!(history.insert_initial(record()), 1);
        assert_eq!(history.insert_initial(record()), 2);
        history.clear();
        assert_eq!(history.next_index(), 0);
    }
}
