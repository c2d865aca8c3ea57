pub mod connectivity;

use terminal_size::{terminal_size, Width};

use crate::identity::RequestContext;

// Render a context's request metadata as an ASCII table.
pub fn print_context(ctx: &RequestContext) {
    println!("request metadata (state: {}):", ctx.auth().name());
    // header column is at most 13 wide plus 7 for borders and padding
    let value_width = get_terminal_width().saturating_sub(20).max(16);
    for line in render_metadata(ctx, value_width) {
        println!("{}", line);
    }
}

pub fn render_metadata(ctx: &RequestContext, max_col_width: usize) -> Vec<String> {
    let cols = vec!["header".to_string(), "value".to_string()];
    let rows: Vec<Vec<String>> = ctx.metadata().into_iter().map(|(k, v)| vec![k.to_string(), v]).collect();

    let mut widths: Vec<usize> = cols.iter().map(|s| display_len(s).min(max_col_width)).collect();
    for r in &rows {
        for (i, cell) in r.iter().enumerate() {
            let w = display_len(cell);
            if w > widths[i] { widths[i] = w.min(max_col_width); }
        }
    }

    let sep = build_separator(&widths);
    let mut out = vec![sep.clone(), build_row(&cols, &widths), sep.clone()];
    for r in &rows {
        out.push(build_row(r, &widths));
    }
    out.push(sep);
    out
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('+');
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::new();
    s.push('|');
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        s.push(' ');
        s.push_str(&text);
        s.push_str(&" ".repeat(w.saturating_sub(display_len(&text))));
        s.push(' ');
        s.push('|');
    }
    s
}

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), _)) => (w as usize).saturating_sub(4),
        None => 80,
    }
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_header_and_one_row_per_header() {
        let ctx = RequestContext::new();
        let lines = render_metadata(&ctx, 64);
        // sep, header, sep, request id, sep
        assert_eq!(lines.len(), 5);
        assert!(lines[1].contains("header"));
        assert!(lines[3].contains(&ctx.request_id));
        assert!(lines.iter().all(|l| display_len(l) == display_len(&lines[0])));
    }

    #[test]
    fn long_values_are_truncated() {
        let ctx = RequestContext::new();
        let lines = render_metadata(&ctx, 8);
        assert!(lines[3].contains('…'));
        assert!(!lines[3].contains(&ctx.request_id));
    }
}
