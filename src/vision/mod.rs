//! Vision subsystem: OCR engine abstraction and the throttled, cached
//! screenshot recognition service.

pub mod ocr;
pub mod service;

pub use ocr::{OcrEngine, OcrLine};
pub use service::{OcrMatch, OcrService};
