//! Typed message surface for the UI layer, plus engine assembly.
//!
//! The UI talks to the engine through `EngineRequest`/`EngineResponse`
//! messages; the service owns the shared component graph and the registry of
//! live playback sessions. Components are wired once in `EngineBuilder` and
//! shut down together.

use crate::accessibility::AccessibilityService;
use crate::browser::types::TabHandle;
use crate::browser::BrowserControl;
use crate::conditional::ConditionalClickRunner;
use crate::config::EngineConfig;
use crate::csv::{parse_csv, CsvMapper};
use crate::engine::DecisionEngine;
use crate::error::{Error, Result};
use crate::executor::ActionExecutor;
use crate::locate::StrategySet;
use crate::migration::load_recording;
use crate::model::recording::Recording;
use crate::playback::{PlaybackController, PlaybackOptions, RunResult};
use crate::telemetry::{EventFilter, TelemetryExport, TelemetryLogger, TelemetryStore};
use crate::vision::{OcrEngine, OcrService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Where persisted recordings come from; the UI layer owns storage.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Load a recording's persisted JSON by id.
    async fn load(&self, recording_id: &str) -> Result<String>;
}

/// Inbound messages from the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineRequest {
    PlaybackStart {
        tab: String,
        recording_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        csv: Option<String>,
        #[serde(default)]
        stop_on_error: bool,
    },
    PlaybackPause {
        run_id: String,
    },
    PlaybackResume {
        run_id: String,
    },
    PlaybackStop {
        run_id: String,
    },
    PlaybackStatus {
        run_id: String,
    },
    TelemetryQuery {
        #[serde(default)]
        filter: EventFilter,
    },
    TelemetryMetrics {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    TelemetryExport,
}

/// Replies to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineResponse {
    PlaybackStarted { run_id: String },
    Ack,
    PlaybackFinished { result: RunResult },
    PlaybackRunning,
    Events { events: Vec<crate::telemetry::TelemetryEvent> },
    Metrics { metrics: Vec<crate::telemetry::StrategyMetrics> },
    Export { export: TelemetryExport },
    Error { message: String },
}

struct Session {
    controller: Arc<PlaybackController>,
    handle: tokio::task::JoinHandle<Result<RunResult>>,
}

/// Wires the component graph from configuration and backends.
pub struct EngineBuilder {
    config: EngineConfig,
    browser: Arc<dyn BrowserControl>,
    ocr_engine: Arc<dyn OcrEngine>,
    store: Arc<TelemetryStore>,
    recordings: Arc<dyn RecordingSource>,
}

impl EngineBuilder {
    pub fn new(
        config: EngineConfig,
        browser: Arc<dyn BrowserControl>,
        ocr_engine: Arc<dyn OcrEngine>,
        store: Arc<TelemetryStore>,
        recordings: Arc<dyn RecordingSource>,
    ) -> Self {
        Self {
            config,
            browser,
            ocr_engine,
            store,
            recordings,
        }
    }

    /// Validate configuration and assemble the service.
    pub async fn build(self) -> Result<EngineService> {
        self.config.validate()?;

        let ocr = Arc::new(OcrService::new(self.ocr_engine, self.config.ocr.clone()));
        if self.config.ocr.prewarm {
            ocr.prewarm().await?;
        }

        let telemetry = Arc::new(TelemetryLogger::new(
            self.store.clone(),
            self.config.telemetry.clone(),
        ));

        Ok(EngineService {
            config: self.config,
            browser: self.browser,
            ocr,
            store: self.store,
            telemetry,
            recordings: self.recordings,
            sessions: Mutex::new(HashMap::new()),
        })
    }
}

/// The engine's front door for the message surface.
pub struct EngineService {
    config: EngineConfig,
    browser: Arc<dyn BrowserControl>,
    ocr: Arc<OcrService>,
    store: Arc<TelemetryStore>,
    telemetry: Arc<TelemetryLogger>,
    recordings: Arc<dyn RecordingSource>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl EngineService {
    /// Handle one inbound message.
    pub async fn handle(&self, request: EngineRequest) -> EngineResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => EngineResponse::Error {
                message: err.to_string(),
            },
        }
    }

    async fn dispatch(&self, request: EngineRequest) -> Result<EngineResponse> {
        match request {
            EngineRequest::PlaybackStart {
                tab,
                recording_id,
                csv,
                stop_on_error,
            } => {
                self.start_playback(tab, recording_id, csv, stop_on_error)
                    .await
            }
            EngineRequest::PlaybackPause { run_id } => {
                self.with_session(&run_id, |session| session.controller.pause())
                    .await?;
                Ok(EngineResponse::Ack)
            }
            EngineRequest::PlaybackResume { run_id } => {
                self.with_session(&run_id, |session| session.controller.resume())
                    .await?;
                Ok(EngineResponse::Ack)
            }
            EngineRequest::PlaybackStop { run_id } => {
                self.with_session(&run_id, |session| session.controller.stop())
                    .await?;
                Ok(EngineResponse::Ack)
            }
            EngineRequest::PlaybackStatus { run_id } => {
                let mut sessions = self.sessions.lock().await;
                let Some(session) = sessions.remove(&run_id) else {
                    return Err(Error::PlaybackState(format!("unknown run {}", run_id)));
                };
                if !session.handle.is_finished() {
                    sessions.insert(run_id, session);
                    return Ok(EngineResponse::PlaybackRunning);
                }
                drop(sessions);
                let result = session
                    .handle
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))??;
                Ok(EngineResponse::PlaybackFinished { result })
            }
            EngineRequest::TelemetryQuery { filter } => Ok(EngineResponse::Events {
                events: self.store.query_events(&filter)?,
            }),
            EngineRequest::TelemetryMetrics { from, to } => Ok(EngineResponse::Metrics {
                metrics: self.store.strategy_metrics(from, to)?,
            }),
            EngineRequest::TelemetryExport => Ok(EngineResponse::Export {
                export: self.store.export()?,
            }),
        }
    }

    async fn with_session(
        &self,
        run_id: &str,
        f: impl FnOnce(&Session),
    ) -> Result<()> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(run_id)
            .ok_or_else(|| Error::PlaybackState(format!("unknown run {}", run_id)))?;
        f(session);
        Ok(())
    }

    async fn start_playback(
        &self,
        tab: String,
        recording_id: String,
        csv: Option<String>,
        stop_on_error: bool,
    ) -> Result<EngineResponse> {
        let json = self.recordings.load(&recording_id).await?;
        let loaded = load_recording(&json)?;
        let recording: Recording = loaded.recording;
        let csv_data = csv.as_deref().map(parse_csv).transpose()?;

        let controller = Arc::new(self.new_controller());
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(run_id = %run_id, recording = %recording.id, "playback session created");

        let handle = {
            let controller = controller.clone();
            let tab = TabHandle::new(tab);
            tokio::spawn(async move {
                controller
                    .run(
                        &tab,
                        &recording,
                        csv_data.as_ref(),
                        PlaybackOptions { stop_on_error },
                    )
                    .await
            })
        };

        self.sessions
            .lock()
            .await
            .insert(run_id.clone(), Session { controller, handle });

        Ok(EngineResponse::PlaybackStarted { run_id })
    }

    fn new_controller(&self) -> PlaybackController {
        let accessibility = Arc::new(AccessibilityService::new(self.browser.clone()));
        let strategies = Arc::new(StrategySet::new(
            self.browser.clone(),
            accessibility.clone(),
            self.ocr.clone(),
        ));
        let waiter = Arc::new(crate::waiting::AutoWaiter::new(
            self.browser.clone(),
            self.config.auto_wait.clone(),
        ));
        let executor = Arc::new(ActionExecutor::new(
            self.browser.clone(),
            self.config.executor.clone(),
        ));
        let engine = Arc::new(DecisionEngine::new(
            strategies,
            waiter,
            executor.clone(),
            self.config.decision.clone(),
        ));
        let conditional = Arc::new(ConditionalClickRunner::new(
            self.browser.clone(),
            self.ocr.clone(),
            accessibility,
            executor,
        ));
        PlaybackController::new(
            self.browser.clone(),
            engine,
            conditional,
            CsvMapper::new(self.config.csv.clone()),
            Some(self.telemetry.clone()),
        )
    }

    /// Flush telemetry and stop every live session.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.controller.stop();
        }
        drop(sessions);
        self.telemetry.flush().await;
    }
}
