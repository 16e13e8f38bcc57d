//! Remote model inference contract

use async_trait::async_trait;
use mend_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Result of a model prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predictions: HashMap<String, Value>,
    pub confidence: f64,
}

/// Abstract inference endpoint; transport is opaque to the core
#[async_trait]
pub trait ModelServer: Send + Sync {
    async fn predict(&self, endpoint: &str, features: &HashMap<String, Value>)
        -> Result<Prediction>;
}

/// Model server returning a fixed prediction, for tests and wiring checks
pub struct StaticModelServer {
    prediction: Prediction,
}

impl StaticModelServer {
    pub fn new(prediction: Prediction) -> Self {
        StaticModelServer { prediction }
    }

    /// Server answering every request with the given label and confidence
    pub fn with_label(label: &str, confidence: f64) -> Self {
        let mut predictions = HashMap::new();
        predictions.insert("label".to_string(), Value::String(label.to_string()));
        StaticModelServer {
            prediction: Prediction {
                predictions,
                confidence,
            },
        }
    }
}

#[async_trait]
impl ModelServer for StaticModelServer {
    async fn predict(
        &self,
        _endpoint: &str,
        _features: &HashMap<String, Value>,
    ) -> Result<Prediction> {
        Ok(self.prediction.clone())
    }
}
