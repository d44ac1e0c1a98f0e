//! OCR engine abstraction.
//!
//! The engine is provided by the host (a bundled recognizer, a native
//! library, a remote service). It is initialized lazily with the configured
//! language pack and may be pre-warmed at startup.

use crate::error::Result;
use crate::model::geometry::BoundingRect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One recognized text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    /// Engine confidence in [0,100]
    pub confidence: f64,
    /// Bounding box in device pixels
    pub bbox: BoundingRect,
}

impl OcrLine {
    pub fn new(text: impl Into<String>, confidence: f64, bbox: BoundingRect) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox,
        }
    }
}

/// Text recognizer over screenshot bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Load the language pack and prepare the runtime.
    async fn initialize(&self, language: &str) -> Result<()>;

    /// Recognize text lines in an encoded image.
    async fn recognize(&self, image: &[u8]) -> Result<Vec<OcrLine>>;

    /// Release the runtime.
    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted OCR engine returning queued results per recognize call.
    pub(crate) struct FakeOcrEngine {
        results: Mutex<std::collections::VecDeque<Vec<OcrLine>>>,
        pub init_count: AtomicU32,
        pub recognize_count: AtomicU32,
        /// Artificial recognition latency
        pub delay: Duration,
    }

    impl FakeOcrEngine {
        pub fn new() -> Self {
            Self {
                results: Mutex::new(std::collections::VecDeque::new()),
                init_count: AtomicU32::new(0),
                recognize_count: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        /// Queue the lines returned by the next recognize call. The last
        /// queued result repeats once the queue drains.
        pub fn push_result(&self, lines: Vec<OcrLine>) {
            self.results.lock().unwrap().push_back(lines);
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcrEngine {
        async fn initialize(&self, _language: &str) -> Result<()> {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn recognize(&self, _image: &[u8]) -> Result<Vec<OcrLine>> {
            self.recognize_count.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                Ok(results.pop_front().unwrap())
            } else {
                Ok(results.front().cloned().unwrap_or_default())
            }
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }
}
