//! Effective prompt composition.
//!
//! The effective prompt is rebuilt every iteration from the base task prompt,
//! the optional prompt additions and the optional learnings, in that order.

const SECTION_RULE: &str = "\n\n---\n\n";
const ADDITIONS_HEADING: &str = "## Prompt Additions";
const LEARNINGS_HEADING: &str = "## Learnings";

/// Assemble the effective prompt.
///
/// Pure and deterministic. Optional sections that are absent or blank are
/// omitted entirely.
pub fn compose(base: &str, additions: Option<&str>, learnings: Option<&str>) -> String {
    let mut out = base.trim_end().to_string();
    push_section(&mut out, ADDITIONS_HEADING, additions);
    push_section(&mut out, LEARNINGS_HEADING, learnings);
    out.push('\n');
    out
}

fn push_section(out: &mut String, heading: &str, body: Option<&str>) {
    let Some(body) = body.map(str::trim).filter(|s| !s.is_empty()) else {
        return;
    };
    out.push_str(SECTION_RULE);
    out.push_str(heading);
    out.push_str("\n\n");
    out.push_str(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_only_has_no_section_markers() {
        let prompt = compose("Build the compiler.\n", None, None);
        assert_eq!(prompt, "Build the compiler.\n");
        assert!(!prompt.contains("---"));
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let prompt = compose("base", Some("extra rules"), Some("what we learned"));
        assert_eq!(
            prompt,
            "base\n\n---\n\n## Prompt Additions\n\nextra rules\n\n---\n\n## Learnings\n\nwhat we learned\n"
        );
    }

    #[test]
    fn blank_sections_are_omitted() {
        let prompt = compose("base", Some("  \n"), Some("learned"));
        assert!(!prompt.contains(ADDITIONS_HEADING));
        assert!(prompt.contains(LEARNINGS_HEADING));
    }

    #[test]
    fn compose_is_deterministic() {
        let inputs = [
            (None, None),
            (Some("a"), None),
            (None, Some("l")),
            (Some("a\n\nb"), Some("l1\nl2")),
        ];
        for (additions, learnings) in inputs {
            let first = compose("spec", additions, learnings);
            for _ in 0..3 {
                assert_eq!(compose("spec", additions, learnings), first);
            }
        }
    }
}
