// Untrusted text (brew stderr, Gist API error bodies) is run through here before it is
// logged, so a hostile or noisy payload cannot repaint the terminal or flood the log file.

pub const MAX_LOG_CHARS: usize = 4096;

#[derive(Clone, Copy)]
enum Escape {
    Start,
    Csi,
    // OSC, DCS, SOS, PM and APC all run until BEL or ST (ESC \).
    String { after_esc: bool },
}

/// Strip ANSI escape sequences, control characters and bidi overrides, folding
/// newlines and tabs to single spaces. Output is capped at `max_chars`.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars));
    let mut esc: Option<Escape> = None;
    let mut count = 0usize;
    let mut last_space = false;

    for c in input.chars() {
        if let Some(state) = esc {
            esc = match state {
                Escape::Start => match c {
                    '[' => Some(Escape::Csi),
                    ']' | 'P' | 'X' | '^' | '_' => Some(Escape::String { after_esc: false }),
                    _ => None,
                },
                Escape::Csi if ('@'..='~').contains(&c) => None,
                Escape::Csi => Some(Escape::Csi),
                Escape::String { .. } if c == '\x07' => None,
                Escape::String { after_esc: true } if c == '\\' => None,
                Escape::String { .. } => Some(Escape::String {
                    after_esc: c == '\x1b',
                }),
            };
            continue;
        }

        if c == '\x1b' {
            esc = Some(Escape::Start);
            continue;
        }

        let mapped = if matches!(c, '\n' | '\r' | '\t') {
            ' '
        } else if c.is_control() || is_bidi_control(c) {
            continue;
        } else {
            c
        };

        if mapped == ' ' {
            if last_space || out.is_empty() {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }

        if count >= max_chars {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            out.push_str(" ...[truncated]");
            return out;
        }
        out.push(mapped);
        count += 1;
    }

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    out
}

/// Sanitize a single log line at the default cap.
pub fn sanitize_log_line(input: &str) -> String {
    sanitize_text(input, MAX_LOG_CHARS)
}

fn is_bidi_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_and_title_sequences() {
        let got =
            sanitize_log_line("Warning: \u{1b}[33mtap\u{1b}[0m \u{1b}]0;pwned\u{7}deprecated");
        assert_eq!(got, "Warning: tap deprecated");
    }

    #[test]
    fn strips_st_terminated_strings() {
        assert_eq!(sanitize_log_line("a\u{1b}Pdata\u{1b}\\b"), "ab");
    }

    #[test]
    fn folds_whitespace_and_drops_bidi() {
        assert_eq!(sanitize_log_line("line one\n\tline\r\ntwo\u{202e}"), "line one line two");
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(300);
        let got = sanitize_text(&body, 200);
        assert!(got.starts_with(&"x".repeat(200)));
        assert!(got.ends_with("...[truncated]"));
    }
}
