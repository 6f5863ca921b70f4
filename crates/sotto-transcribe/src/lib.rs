pub mod engine;
pub mod error;
pub mod fold;
pub mod listing;
pub mod render;
pub mod transcript;

pub use engine::TranscriptionEngine;
pub use error::{Result, TranscribeError};
pub use fold::{fold_chunks, FoldOutcome};
pub use listing::{transcripts_for_conversation, TranscriptSummary};
pub use render::render_transcript_html;
pub use transcript::{TranscriptRecord, TranscriptStore};
