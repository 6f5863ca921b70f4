//! Standalone HTML rendering of a finalized transcript.

use chrono::TimeZone;
use chrono_tz::Tz;

use crate::transcript::TranscriptRecord;

/// Render a transcript as a complete HTML page: localized start time,
/// human-readable duration, and the text with empty lines as paragraph
/// breaks.
pub fn render_transcript_html(record: &TranscriptRecord, conversation_name: &str) -> String {
    let tz: Tz = record.time_zone_id.parse().unwrap_or(chrono_tz::UTC);
    let started = tz
        .timestamp_millis_opt(record.start_time)
        .single()
        .map(|dt| dt.format("%B %e, %Y at %l:%M %p %Z").to_string())
        .unwrap_or_else(|| "unknown time".to_string());
    let duration = human_duration(record.duration);
    let body = paragraphs(record.transcription.as_deref().unwrap_or(""));
    let title = escape(conversation_name);

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Transcript — {title}</title>\n\
         <style>\n\
         body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 2rem auto; padding: 0 1rem; line-height: 1.5; }}\n\
         header {{ color: #555; border-bottom: 1px solid #ddd; margin-bottom: 1.5rem; padding-bottom: 0.5rem; }}\n\
         </style>\n</head>\n<body>\n\
         <header>\n<h1>{title}</h1>\n<p>{started} &middot; {duration}</p>\n</header>\n\
         <main>\n{body}</main>\n</body>\n</html>\n"
    )
}

/// Collapse transcript lines into `<p>` blocks: empty lines split
/// paragraphs, lines within a paragraph keep their breaks.
fn paragraphs(text: &str) -> String {
    let mut out = String::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.is_empty() {
            flush_paragraph(&mut out, &mut current);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut out, &mut current);
    out
}

fn flush_paragraph(out: &mut String, lines: &mut Vec<&str>) {
    if lines.is_empty() {
        return;
    }
    out.push_str("<p>");
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push_str("<br>");
        }
        out.push_str(&escape(line));
    }
    out.push_str("</p>\n");
    lines.clear();
}

fn human_duration(ms: i64) -> String {
    let total_secs = (ms / 1000).max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    if parts.is_empty() {
        parts.push(plural(seconds, "second"));
    }
    parts.join(" ")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(transcription: &str, tz: &str) -> TranscriptRecord {
        TranscriptRecord {
            id: "t1".into(),
            whisperer_client_id: "c1".into(),
            conversation_id: "conv".into(),
            content_channel_id: "feed".into(),
            time_zone_id: tz.into(),
            start_time: 1_700_000_000_000, // 2023-11-14 22:13:20 UTC
            duration: 3_725_000,
            content_list_key: "tcp:x".into(),
            transcription: Some(transcription.into()),
            error_count: Some(0),
            ttl_seconds: 60,
        }
    }

    #[test]
    fn renders_localized_time_and_duration() {
        let html = render_transcript_html(&record("Hello", "America/New_York"), "Kitchen");
        assert!(html.contains("November 14, 2023"));
        assert!(html.contains("EST"));
        assert!(html.contains("1 hour 2 minutes"));
        assert!(html.contains("<h1>Kitchen</h1>"));
        assert!(html.contains("<p>Hello</p>"));
    }

    #[test]
    fn unknown_time_zone_falls_back_to_utc() {
        let html = render_transcript_html(&record("x", "Not/AZone"), "c");
        assert!(html.contains("UTC"));
    }

    #[test]
    fn empty_lines_split_paragraphs() {
        assert_eq!(
            paragraphs("one\ntwo\n\nthree"),
            "<p>one<br>two</p>\n<p>three</p>\n"
        );
    }

    #[test]
    fn html_is_escaped() {
        let html = render_transcript_html(&record("<script>alert(1)</script>", "UTC"), "a&b");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a&amp;b"));
    }

    #[test]
    fn short_durations_fall_back_to_seconds() {
        assert_eq!(human_duration(45_000), "45 seconds");
        assert_eq!(human_duration(61_000), "1 minute");
        assert_eq!(human_duration(0), "0 seconds");
    }
}
