//! The realtime wire format: pipe-delimited "chunks" with a leading signed
//! decimal offset. Two families share the shape — content chunks carry the
//! typed-text diff stream, control chunks carry 7-field presence/handshake
//! frames. The emitted form must stay byte-identical to what mobile and
//! browser clients produce.

use crate::error::{ChunkError, Result};

/// Number of pipe-separated fields in a control chunk.
pub const CONTROL_FIELDS: usize = 7;

// ── content chunks ────────────────────────────────────────────────────────────

/// Reserved content offsets. Non-negative offsets are text diffs into the
/// live line and are represented by [`ContentKind::Diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Splice `text` into the live line at the given character position.
    Diff(u32),
    /// Commit the live line to past text, start a new live line. Wire: -1.
    Newline,
    /// Full replacement of the committed past text. Wire: -2.
    PastText,
    /// Full replacement of the live line. Wire: -3.
    LiveText,
    /// Whisperer started re-reading history to a late joiner. Wire: -4.
    StartReread,
    /// Drop all committed history. Wire: -6.
    ClearHistory,
    /// Play a named sound on listeners. Wire: -7.
    PlaySound,
    /// Speak the payload aloud on listeners. Wire: -8.
    PlaySpeech,
}

impl ContentKind {
    pub fn from_offset(offset: i64) -> Result<Self> {
        match offset {
            o if o >= 0 => {
                let o = u32::try_from(o).map_err(|_| ChunkError::UnknownOffset(offset))?;
                Ok(ContentKind::Diff(o))
            }
            -1 => Ok(ContentKind::Newline),
            -2 => Ok(ContentKind::PastText),
            -3 => Ok(ContentKind::LiveText),
            -4 => Ok(ContentKind::StartReread),
            -6 => Ok(ContentKind::ClearHistory),
            -7 => Ok(ContentKind::PlaySound),
            -8 => Ok(ContentKind::PlaySpeech),
            other => Err(ChunkError::UnknownOffset(other)),
        }
    }

    pub fn offset(&self) -> i64 {
        match self {
            ContentKind::Diff(o) => i64::from(*o),
            ContentKind::Newline => -1,
            ContentKind::PastText => -2,
            ContentKind::LiveText => -3,
            ContentKind::StartReread => -4,
            ContentKind::ClearHistory => -6,
            ContentKind::PlaySound => -7,
            ContentKind::PlaySpeech => -8,
        }
    }

    /// Diff chunks are the ones the transcript fold applies to the live line:
    /// text splices and the newline commit.
    pub fn is_diff(&self) -> bool {
        self.offset() >= -1
    }
}

/// A single frame on a conversation's content channel: `"<offset>|<text>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub kind: ContentKind,
    pub text: String,
}

impl ContentChunk {
    pub fn new(kind: ContentKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn diff(offset: u32, text: impl Into<String>) -> Self {
        Self::new(ContentKind::Diff(offset), text)
    }

    pub fn newline() -> Self {
        Self::new(ContentKind::Newline, "")
    }

    /// Parse a content frame. Only the first pipe separates offset from text,
    /// so payloads may themselves contain pipes.
    pub fn parse(raw: &str) -> Result<Self> {
        let (offset, text) = raw.split_once('|').ok_or(ChunkError::MissingSeparator)?;
        let offset: i64 = offset
            .parse()
            .map_err(|_| ChunkError::BadOffset(offset.to_string()))?;
        Ok(Self {
            kind: ContentKind::from_offset(offset)?,
            text: text.to_string(),
        })
    }

    pub fn emit(&self) -> String {
        format!("{}|{}", self.kind.offset(), self.text)
    }
}

// ── control chunks ────────────────────────────────────────────────────────────

/// Reserved control offsets — the presence/handshake verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    WhisperOffer,
    ListenRequest,
    ListenAuthYes,
    ListenAuthNo,
    Joining,
    Dropping,
    ListenOffer,
    Restart,
    RequestReread,
}

impl ControlVerb {
    pub fn from_offset(offset: i64) -> Result<Self> {
        match offset {
            -20 => Ok(ControlVerb::WhisperOffer),
            -21 => Ok(ControlVerb::ListenRequest),
            -22 => Ok(ControlVerb::ListenAuthYes),
            -23 => Ok(ControlVerb::ListenAuthNo),
            -24 => Ok(ControlVerb::Joining),
            -25 => Ok(ControlVerb::Dropping),
            -26 => Ok(ControlVerb::ListenOffer),
            -27 => Ok(ControlVerb::Restart),
            -40 => Ok(ControlVerb::RequestReread),
            other => Err(ChunkError::UnknownOffset(other)),
        }
    }

    pub fn offset(&self) -> i64 {
        match self {
            ControlVerb::WhisperOffer => -20,
            ControlVerb::ListenRequest => -21,
            ControlVerb::ListenAuthYes => -22,
            ControlVerb::ListenAuthNo => -23,
            ControlVerb::Joining => -24,
            ControlVerb::Dropping => -25,
            ControlVerb::ListenOffer => -26,
            ControlVerb::Restart => -27,
            ControlVerb::RequestReread => -40,
        }
    }
}

/// A frame on a conversation's control channel — exactly 7 pipe-separated
/// fields: `"<offset>|<convId>|<convName>|<clientId>|<profileId>|<username>|<contentId>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlChunk {
    pub verb: ControlVerb,
    pub conversation_id: String,
    pub conversation_name: String,
    pub client_id: String,
    pub profile_id: String,
    pub username: String,
    pub content_id: String,
}

impl ControlChunk {
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split('|').collect();
        if fields.len() != CONTROL_FIELDS {
            return Err(ChunkError::WrongFieldCount {
                expected: CONTROL_FIELDS,
                got: fields.len(),
            });
        }
        let offset: i64 = fields[0]
            .parse()
            .map_err(|_| ChunkError::BadOffset(fields[0].to_string()))?;
        Ok(Self {
            verb: ControlVerb::from_offset(offset)?,
            conversation_id: fields[1].to_string(),
            conversation_name: fields[2].to_string(),
            client_id: fields[3].to_string(),
            profile_id: fields[4].to_string(),
            username: fields[5].to_string(),
            content_id: fields[6].to_string(),
        })
    }

    pub fn emit(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.verb.offset(),
            self.conversation_id,
            self.conversation_name,
            self.client_id,
            self.profile_id,
            self.username,
            self.content_id,
        )
    }
}
