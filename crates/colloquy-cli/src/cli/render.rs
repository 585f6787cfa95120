//! Console rendering of engine output.
//!
//! The console stands in for a messaging gateway: options become a numbered
//! list of `[token] label` lines the user can type back.

use colloquy_core::dialog::{DialogOutcome, DialogReply};
use colloquy_types::render::{RenderInstruction, RenderKind};
use console::style;

/// Plain text lines for one render instruction.
pub fn render_lines(render: &RenderInstruction) -> Vec<String> {
    let mut lines: Vec<String> = render.text.lines().map(str::to_string).collect();
    for option in &render.options {
        if option.label == option.token {
            lines.push(format!("  [{}]", option.token));
        } else {
            lines.push(format!("  [{}] {}", option.token, option.label));
        }
    }
    lines
}

/// Styled block for one render instruction.
pub fn format_render(render: &RenderInstruction) -> String {
    let mut out = String::new();
    for (i, line) in render_lines(render).iter().enumerate() {
        let styled = if line.starts_with("  [") {
            style(line.as_str()).cyan().to_string()
        } else {
            match render.kind {
                RenderKind::Prompt => line.clone(),
                RenderKind::ValidationError if i == 0 => style(line.as_str()).yellow().to_string(),
                RenderKind::ValidationError => line.clone(),
                RenderKind::RecoveryMenu => style(line.as_str()).red().to_string(),
                RenderKind::Completed => style(line.as_str()).green().bold().to_string(),
                RenderKind::Cancelled => style(line.as_str()).dim().to_string(),
                RenderKind::Notice => style(line.as_str()).blue().to_string(),
            }
        };
        out.push_str("  ");
        out.push_str(&styled);
        out.push('\n');
    }
    out
}

/// Styled text for a whole reply.
pub fn format_reply(reply: &DialogReply) -> String {
    reply.renders.iter().map(format_render).collect()
}

/// Text for an engine outcome: renders as JSON lines or styled blocks.
pub fn format_outcome(outcome: &DialogOutcome, json: bool) -> String {
    match outcome {
        DialogOutcome::Replied(reply) if json => reply
            .renders
            .iter()
            .filter_map(|r| serde_json::to_string(r).ok())
            .map(|line| format!("{line}\n"))
            .collect(),
        DialogOutcome::Replied(reply) => format_reply(reply),
        DialogOutcome::NotHandled => format!(
            "  {}\n",
            style("No active dialog. Type /start to begin.").dim()
        ),
        DialogOutcome::Ignored { reason } => format!("  {}\n", style(reason).dim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::render::RenderOption;

    #[test]
    fn test_render_lines_lists_options() {
        let render = RenderInstruction::new("plan", RenderKind::Prompt, "Which plan?").with_options(vec![
            RenderOption {
                token: "free".into(),
                label: "Free".into(),
            },
            RenderOption {
                token: "pro".into(),
                label: "pro".into(),
            },
        ]);
        assert_eq!(
            render_lines(&render),
            vec!["Which plan?", "  [free] Free", "  [pro]"]
        );
    }

    #[test]
    fn test_render_lines_splits_multiline_text() {
        let render = RenderInstruction::new(
            "ask",
            RenderKind::ValidationError,
            "Too short\n\nWhat is your name?",
        );
        assert_eq!(render_lines(&render), vec!["Too short", "", "What is your name?"]);
    }

    #[test]
    fn test_json_outcome_is_one_line_per_render() {
        let reply = DialogReply {
            key: colloquy_types::session::SessionKey::new(1, 1),
            chain_id: "c".into(),
            state: colloquy_types::session::SessionState::Completed,
            step_id: "done".into(),
            retry_count: 0,
            renders: vec![
                RenderInstruction::new("a", RenderKind::Prompt, "one"),
                RenderInstruction::new("done", RenderKind::Completed, "two"),
            ],
        };
        let text = format_outcome(&DialogOutcome::Replied(reply), true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["text"], "two");
    }
}
