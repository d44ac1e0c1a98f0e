//! Screenshot OCR service with caching and concurrency throttling.
//!
//! Results are cached per screenshot (sha-256 of the image bytes, TTL 2 s).
//! Concurrent recognitions are capped by a semaphore; requests for the same
//! screenshot share the single in-flight computation.

use crate::config::OcrConfig;
use crate::error::{Error, Result};
use crate::model::geometry::Point;
use crate::vision::ocr::{OcrEngine, OcrLine};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock, Semaphore};
use tracing::debug;

/// A text match located on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrMatch {
    pub line: OcrLine,
    /// Whether the line text equalled the target exactly
    pub exact: bool,
    /// Center of the line's bounding box
    pub click_point: Point,
}

struct CacheEntry {
    lines: Vec<OcrLine>,
    recognized_at: DateTime<Utc>,
}

/// Cache key: tab id + screenshot content hash.
fn screenshot_key(tab_id: &str, image: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tab_id.as_bytes());
    hasher.update(image);
    format!("{:x}", hasher.finalize())
}

/// OCR access point used by the vision strategy and conditional-click loop.
pub struct OcrService {
    engine: Arc<dyn OcrEngine>,
    config: OcrConfig,
    semaphore: Arc<Semaphore>,
    initialized: OnceCell<()>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<Vec<OcrLine>>>>>,
}

impl OcrService {
    pub fn new(engine: Arc<dyn OcrEngine>, config: OcrConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            engine,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            initialized: OnceCell::new(),
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Initialize the engine eagerly instead of on first recognition.
    pub async fn prewarm(&self) -> Result<()> {
        self.ensure_initialized().await
    }

    async fn ensure_initialized(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.engine.initialize(&self.config.language).await?;
                debug!(language = %self.config.language, "OCR engine initialized");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Recognize a screenshot, scaling bboxes from device to CSS pixels.
    ///
    /// `scale` is the device pixel ratio reported by layout metrics.
    pub async fn recognize(
        &self,
        tab_id: &str,
        image: &[u8],
        scale: f64,
    ) -> Result<Vec<OcrLine>> {
        self.ensure_initialized().await?;
        let key = screenshot_key(tab_id, image);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if Utc::now() - entry.recognized_at
                    < Duration::milliseconds(self.config.cache_ttl_ms as i64)
                {
                    return Ok(entry.lines.clone());
                }
            }
        }

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let lines = cell
            .get_or_try_init(|| async {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| Error::Ocr("OCR semaphore closed".to_string()))?;
                let raw = self.engine.recognize(image).await?;
                let scaled = scale_lines(raw, scale);
                Ok::<Vec<OcrLine>, Error>(scaled)
            })
            .await?
            .clone();

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                key.clone(),
                CacheEntry {
                    lines: lines.clone(),
                    recognized_at: Utc::now(),
                },
            );
        }
        self.inflight.lock().await.remove(&key);

        Ok(lines)
    }

    /// Drop cached results for a tab.
    pub async fn invalidate(&self, tab_id: &str) {
        // Keys embed the tab id hash, so a per-tab sweep requires tracking;
        // entries are few and short-lived, clearing all is equivalent.
        let _ = tab_id;
        self.cache.write().await.clear();
    }

    /// Find the best match for a target text among recognized lines.
    ///
    /// Lines below the configured confidence floor are ignored; exact matches
    /// beat substring matches, then higher confidence wins.
    pub fn best_match(&self, lines: &[OcrLine], target: &str, exact_only: bool) -> Option<OcrMatch> {
        let target_lower = target.to_lowercase();
        let mut best: Option<OcrMatch> = None;

        for line in lines {
            if line.confidence < self.config.min_line_confidence {
                continue;
            }
            let text_lower = line.text.to_lowercase();
            let exact = text_lower.trim() == target_lower.trim();
            let substring = text_lower.contains(&target_lower);
            if !exact && (exact_only || !substring) {
                continue;
            }

            let candidate = OcrMatch {
                line: line.clone(),
                exact,
                click_point: line.bbox.center(),
            };

            let better = match &best {
                None => true,
                Some(current) => {
                    (exact && !current.exact)
                        || (exact == current.exact
                            && candidate.line.confidence > current.line.confidence)
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best
    }

    /// Find the first search term with a match; returns the term and match.
    pub fn find_any_text(
        &self,
        lines: &[OcrLine],
        terms: &[String],
    ) -> Option<(String, OcrMatch)> {
        for term in terms {
            if let Some(found) = self.best_match(lines, term, false) {
                return Some((term.clone(), found));
            }
        }
        None
    }
}

fn scale_lines(lines: Vec<OcrLine>, scale: f64) -> Vec<OcrLine> {
    if scale <= 0.0 || (scale - 1.0).abs() < f64::EPSILON {
        return lines;
    }
    lines
        .into_iter()
        .map(|mut line| {
            line.bbox = line.bbox.scaled(1.0 / scale);
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::geometry::BoundingRect;
    use crate::vision::ocr::fake::FakeOcrEngine;
    use std::sync::atomic::Ordering;

    fn line(text: &str, confidence: f64, x: f64) -> OcrLine {
        OcrLine::new(text, confidence, BoundingRect::new(x, 0.0, 100.0, 20.0))
    }

    fn service_with(engine: Arc<FakeOcrEngine>) -> OcrService {
        OcrService::new(engine, OcrConfig::default())
    }

    #[tokio::test]
    async fn test_lazy_initialization_happens_once() {
        let engine = Arc::new(FakeOcrEngine::new());
        let service = service_with(engine.clone());

        service.recognize("tab-1", b"img-a", 1.0).await.unwrap();
        service.recognize("tab-1", b"img-b", 1.0).await.unwrap();
        assert_eq!(engine.init_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_engine() {
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![line("Allow", 90.0, 0.0)]);
        let service = service_with(engine.clone());

        service.recognize("tab-1", b"same", 1.0).await.unwrap();
        service.recognize("tab-1", b"same", 1.0).await.unwrap();
        assert_eq!(engine.recognize_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recognition() {
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![line("Allow", 90.0, 0.0)]);
        let service = service_with(engine.clone());

        service.recognize("tab-1", b"same", 1.0).await.unwrap();
        service.invalidate("tab-1").await;
        service.recognize("tab-1", b"same", 1.0).await.unwrap();
        assert_eq!(engine.recognize_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bbox_scaled_to_css_pixels() {
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![OcrLine::new(
            "Hi",
            90.0,
            BoundingRect::new(200.0, 100.0, 50.0, 20.0),
        )]);
        let service = service_with(engine);

        let lines = service.recognize("tab-1", b"img", 2.0).await.unwrap();
        assert_eq!(lines[0].bbox.x, 100.0);
        assert_eq!(lines[0].bbox.width, 25.0);
    }

    #[tokio::test]
    async fn test_best_match_prefers_exact_then_confidence() {
        let engine = Arc::new(FakeOcrEngine::new());
        let service = service_with(engine);

        let lines = vec![
            line("Allow all cookies", 95.0, 0.0),
            line("Allow", 80.0, 10.0),
            line("Allow", 70.0, 20.0),
        ];

        let best = service.best_match(&lines, "Allow", false).unwrap();
        assert!(best.exact);
        assert_eq!(best.line.confidence, 80.0);
    }

    #[tokio::test]
    async fn test_best_match_respects_confidence_floor() {
        let engine = Arc::new(FakeOcrEngine::new());
        let service = service_with(engine);

        let lines = vec![line("Allow", 40.0, 0.0)];
        assert!(service.best_match(&lines, "Allow", false).is_none());
    }

    #[tokio::test]
    async fn test_find_any_text_returns_first_term_hit() {
        let engine = Arc::new(FakeOcrEngine::new());
        let service = service_with(engine);

        let lines = vec![line("Keep browsing", 90.0, 0.0)];
        let (term, _found) = service
            .find_any_text(&lines, &["Allow".to_string(), "Keep".to_string()])
            .unwrap();
        assert_eq!(term, "Keep");
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_inflight_computation() {
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![line("Allow", 90.0, 0.0)]);
        let service = Arc::new(service_with(engine.clone()));

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.recognize("tab-1", b"shared", 1.0).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.recognize("tab-1", b"shared", 1.0).await })
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(engine.recognize_count.load(Ordering::SeqCst), 1);
    }
}
