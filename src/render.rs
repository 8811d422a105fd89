use std::fmt::Write;

use crate::widget::{SearchMode, SearchState};

pub const EMPTY_STATE_HINT: &str = "検索キーワードを入力してください";
pub const LOADING_TEXT: &str = "検索中...";
pub const ANSWER_HEADING: &str = "回答";
pub const SOURCES_HEADING: &str = "参照元";
pub const STREAMING_NOTE: &str =
    "⚠️ 参照元を確認したい場合は、通常モードをご利用ください。(Rag Backend の仕様による制限)";
pub const BUFFERED_NOTE: &str = "検索結果と参照元情報が表示されます。";

pub fn mode_note(mode: SearchMode) -> &'static str {
    match mode {
        SearchMode::Streaming => STREAMING_NOTE,
        SearchMode::Buffered => BUFFERED_NOTE,
    }
}

/// Plain-text view of the widget.
pub fn render(query: &str, state: &SearchState) -> String {
    let mut out = String::new();

    if let Some(error) = state.error() {
        let _ = writeln!(out, "⚠️ {error}");
    }

    if let Some(result) = state.result() {
        let _ = writeln!(out, "{ANSWER_HEADING}");
        for line in result.answer_lines() {
            // one paragraph per line
            let _ = writeln!(out, "{line}\n");
        }

        if !result.sources.is_empty() {
            let _ = writeln!(out, "{SOURCES_HEADING}");
            for source in &result.sources {
                let _ = writeln!(out, "📄 {} -> {}", source.title, source.url);
            }
        }
    } else if state.is_loading() {
        let _ = writeln!(out, "{LOADING_TEXT}");
    }

    if query.is_empty() && state.result().is_none() && state.error().is_none() {
        let _ = writeln!(out, "{EMPTY_STATE_HINT}");
    }

    out
}
