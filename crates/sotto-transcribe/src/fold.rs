//! Folding a recorded content list into final transcript text.
//!
//! The list is replayed in chronological order against two accumulators: the
//! unfinished `live` line and the committed `past` lines. Correctness does
//! not depend on cross-process write order during a handoff — offsets are
//! absolute positions in the live line, and the id-marker protocol collapses
//! the duplicated overlap chunks before they are applied.

use std::collections::HashSet;

use sotto_protocol::{ContentChunk, ContentKind};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldOutcome {
    pub transcription: String,
    pub error_count: i64,
}

/// Marker prefix written before a chunk recorded during an overlap window.
pub const ID_MARKER: &str = "id:";

/// Fold content-list entries (chronological order: oldest first) into final
/// text plus an error count. Entries are either raw chunk payloads or
/// `id:<messageId>` markers naming the chunk that follows them.
pub fn fold_chunks<I>(entries: I) -> FoldOutcome
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut live = String::new();
    let mut past: Vec<String> = Vec::new();
    let mut error_count: i64 = 0;

    // Ids seen within the current contiguous run of marked chunks. Markers
    // only exist for chunks written during an overlap window, so an unmarked
    // chunk ends the run and the set resets — stale ids can never suppress
    // later chunks.
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut pending_id: Option<String> = None;

    for entry in entries {
        let entry = entry.as_ref();
        if let Some(id) = entry.strip_prefix(ID_MARKER) {
            pending_id = Some(id.to_string());
            continue;
        }

        match pending_id.take() {
            Some(id) => {
                if !seen_ids.insert(id) {
                    debug!("skipping duplicated overlap chunk");
                    continue;
                }
            }
            None => seen_ids.clear(),
        }

        let chunk = match ContentChunk::parse(entry) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "malformed chunk in content list");
                error_count += 1;
                continue;
            }
        };

        match chunk.kind {
            ContentKind::PlaySound => {}
            ContentKind::Newline => {
                past.push(std::mem::take(&mut live));
            }
            ContentKind::Diff(0) => {
                live = chunk.text;
            }
            ContentKind::Diff(offset) => {
                let offset = offset as usize;
                let len = live.chars().count();
                if offset > len {
                    live.extend(std::iter::repeat('?').take(offset - len));
                    error_count += 1;
                } else if offset < len {
                    live = live.chars().take(offset).collect();
                }
                live.push_str(&chunk.text);
            }
            _ => {
                error_count += 1;
            }
        }
    }

    if !live.is_empty() {
        past.push(live);
    }

    FoldOutcome {
        transcription: past.join("\n"),
        error_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(entries: &[&str]) -> FoldOutcome {
        fold_chunks(entries.iter())
    }

    #[test]
    fn basic_session_folds_to_one_line() {
        let out = fold(&["0|Hello", "5| wor", "9|ld", "-1|"]);
        assert_eq!(out.transcription, "Hello world");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn gap_beyond_live_line_fills_with_question_marks() {
        let out = fold(&["0|abc", "5|z"]);
        assert_eq!(out.transcription, "abc??z");
        assert_eq!(out.error_count, 1);
    }

    #[test]
    fn shorter_offset_truncates_then_appends() {
        let out = fold(&["0|Hello world", "5|!"]);
        assert_eq!(out.transcription, "Hello!");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn offset_zero_replaces_live_line() {
        let out = fold(&["0|first", "0|second"]);
        assert_eq!(out.transcription, "second");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn trailing_live_line_is_flushed() {
        let out = fold(&["0|no newline yet"]);
        assert_eq!(out.transcription, "no newline yet");
    }

    #[test]
    fn newline_on_empty_live_line_keeps_paragraph_break() {
        let out = fold(&["0|one", "-1|", "-1|", "0|two", "-1|"]);
        assert_eq!(out.transcription, "one\n\ntwo");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn play_sound_is_ignored_other_reserved_offsets_count_errors() {
        let out = fold(&["0|hi", "-7|chime"]);
        assert_eq!(out.transcription, "hi");
        assert_eq!(out.error_count, 0);

        let out = fold(&["0|hi", "-3|live", "-8|speech"]);
        assert_eq!(out.transcription, "hi");
        assert_eq!(out.error_count, 2);
    }

    #[test]
    fn malformed_chunks_are_skipped_and_counted() {
        let out = fold(&["0|ok", "garbage", "-5|bad-offset", "x|y"]);
        assert_eq!(out.transcription, "ok");
        assert_eq!(out.error_count, 3);
    }

    #[test]
    fn duplicated_overlap_chunks_collapse() {
        // both handoff sides recorded M1
        let out = fold(&["id:M1", "0|Hi", "id:M1", "0|Hi"]);
        assert_eq!(out.transcription, "Hi");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn fold_is_idempotent_under_marked_prefix_duplication() {
        let original = ["id:M1", "0|Hello", "id:M2", "5| world", "-1|"];
        let duplicated = [
            "id:M1", "0|Hello", "id:M2", "5| world", "id:M1", "0|Hello", "id:M2", "5| world",
            "-1|",
        ];
        assert_eq!(fold(&original), fold(&duplicated));
    }

    #[test]
    fn unmarked_chunk_resets_the_id_window() {
        // M1 appears in two separate overlap windows with an unmarked chunk
        // between them — the second occurrence must NOT be suppressed.
        let out = fold(&["id:M1", "0|a", "1|b", "id:M1", "2|c"]);
        assert_eq!(out.transcription, "abc");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let out = fold(&["0|héllo", "5|!"]);
        assert_eq!(out.transcription, "héllo!");
        assert_eq!(out.error_count, 0);
    }

    #[test]
    fn empty_list_folds_to_empty_clean_transcript() {
        let out = fold(&[]);
        assert_eq!(out.transcription, "");
        assert_eq!(out.error_count, 0);
    }
}
