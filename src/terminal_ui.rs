//! Terminal UI helpers for SSH client output.
//!
//! Uses the `console` crate for proper text styling and width calculation.

use console::{measure_text_width, pad_str, style, Alignment};

/// Box width (inner content width, excluding borders)
const BOX_WIDTH: usize = 58;

/// Create a horizontal border line
fn top_border() -> String {
    format!("╔{}╗\r\n", "═".repeat(BOX_WIDTH + 2))
}

fn middle_border() -> String {
    format!("╠{}╣\r\n", "═".repeat(BOX_WIDTH + 2))
}

fn bottom_border() -> String {
    format!("╚{}╝\r\n", "═".repeat(BOX_WIDTH + 2))
}

/// Create a content line with proper padding using console's pad_str
fn content_line(text: &str) -> String {
    // Use console's pad_str which handles unicode width correctly
    let padded = pad_str(text, BOX_WIDTH, Alignment::Left, None);
    format!("║ {} ║\r\n", padded)
}

/// Create a centered content line
fn centered_line(text: &str) -> String {
    let padded = pad_str(text, BOX_WIDTH, Alignment::Center, None);
    format!("║ {} ║\r\n", padded)
}

/// Create an empty line
fn empty_line() -> String {
    content_line("")
}

/// Shown when a `tcpip-forward` registers a new forwarded port: the
/// identity's canonical name, the port, and a per-service URL hint.
pub fn create_registration_box(fqdn: &str, port: u16, urls: &[String]) -> String {
    let title = format!("{} FORWARDING PORT {}", style("➜").green(), port);

    let mut output = String::new();
    output.push_str("\r\n");
    output.push_str(&top_border());
    output.push_str(&centered_line(&title));
    output.push_str(&middle_border());
    output.push_str(&empty_line());
    output.push_str(&content_line(&format!("identity: {fqdn}")));
    output.push_str(&empty_line());
    for url in urls {
        let url_line = format!("{} {}", style("➜").cyan(), style(url).cyan().underlined());
        output.push_str(&content_line(&url_line));
    }
    output.push_str(&bottom_border());
    output.push_str("\r\n");

    output
}

/// Shown when a newer connection for the same identity displaces this one.
pub fn create_replacement_warning() -> String {
    let title = format!("{} REPLACED", style("⚠").yellow());

    let mut output = String::new();
    output.push_str("\r\n");
    output.push_str(&top_border());
    output.push_str(&centered_line(&title));
    output.push_str(&middle_border());
    output.push_str(&empty_line());
    output.push_str(&content_line("a newer connection for this identity took over"));
    output.push_str(&content_line("closing this session"));
    output.push_str(&empty_line());
    output.push_str(&bottom_border());
    output.push_str("\r\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_box_contains_identity_and_urls() {
        let urls = vec!["http://box.example.com:8080".to_string()];
        let box_output = create_registration_box("box.example.com", 8080, &urls);
        assert!(box_output.contains("box.example.com"));
        assert!(box_output.contains("8080"));
    }

    #[test]
    fn test_box_width_consistency() {
        // All border lines should have the same length
        let top = top_border();
        let mid = middle_border();
        let bot = bottom_border();

        // Remove \r\n for comparison
        let top_len = measure_text_width(top.trim());
        let mid_len = measure_text_width(mid.trim());
        let bot_len = measure_text_width(bot.trim());

        assert_eq!(top_len, mid_len);
        assert_eq!(mid_len, bot_len);
    }
}
