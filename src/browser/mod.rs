//! Browser control layer: the abstract tab channel and its wire types.

pub mod control;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use control::{dispatch_with_retry, is_non_retryable_message, BrowserControl};
pub use types::{
    AxCheckedState, AxNode, BackendNodeId, BoxModel, KeyEventKind, KeyEventParams, LayoutMetrics,
    Modifiers, MouseButton, MouseEventKind, MouseEventParams, NodeDescription, Screenshot,
    ScreenshotFormat, TabHandle,
};
