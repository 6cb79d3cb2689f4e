use crate::llm::chat::SamplingParams;
use crate::llm::{ InferenceMode, ModelSelection };
use serde::{ Serialize, Deserialize };

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Key of this turn's entry in the session metrics. Unset for rejected and error turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_index: Option<usize>,
}

/// Ordered transcript of a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    turns: Vec<Turn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        question: &str,
        answer: &str,
        documents: Vec<Document>,
        metrics_index: Option<usize>
    ) {
        self.turns.push(Turn {
            question: question.to_string(),
            answer: answer.to_string(),
            documents,
            metrics_index,
        });
    }

    /// Copy of this history with one more turn at the end.
    pub fn with_turn(
        &self,
        question: &str,
        answer: &str,
        documents: &[Document],
        metrics_index: Option<usize>
    ) -> Self {
        let mut next = self.clone();
        next.push(question, answer, documents.to_vec(), metrics_index);
        next
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Everything the settings panel contributes to a chat request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub inference_mode: InferenceMode,
    #[serde(default)]
    pub models: ModelSelection,
    #[serde(default)]
    pub sampling: SamplingParams,
}
